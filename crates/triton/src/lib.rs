//! triton: a data-pipeline client for sharded, append-only streams.
//!
//! Producers write records (mappings of textual keys to mixed
//! primitives) to a partitioned log or pub/sub topic through a
//! pluggable [`backend::StreamBackend`], either synchronously
//! ([`stream::Stream`]) or fire-and-forget through the tritond sidecar
//! ([`nonblocking::NonblockingStream`]).  Consumers read shards through
//! [`iterator::CombinedIterator`]s with durable resume points persisted
//! by a [`checkpoint::CheckpointStore`].
//!
//! The concrete cloud SDK layer is out of scope: embedders implement
//! [`backend::StreamBackend`] / [`pubsub::PubSubTransport`] and hand
//! them to the core through a [`config::BackendFactory`].

pub mod archive;
pub mod backend;
pub mod checkpoint;
pub mod codec;
pub mod composite;
pub mod config;
pub mod errors;
pub mod iterator;
pub mod nonblocking;
pub mod pubsub;
pub mod record;
pub mod retry;
pub mod stream;

pub use config::{TritonConfig, get_stream};
pub use errors::TritonError;
pub use nonblocking::get_nonblocking_stream;
pub use record::{FieldValue, Record, RecordData, record_data};
pub use stream::Stream;
