// tritond: Receives framed records over a local PULL socket, re-batches
// them per stream, and forwards to the backend producer.
//
// Exposes modules for integration testing and for embedders that wire a
// real backend factory into the sink.

pub mod batcher;
pub mod config;
pub mod receiver;
pub mod sink;
