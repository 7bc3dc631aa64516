// triton-test-utils: Shared test doubles for the triton suite.
//
// Provides a scripted mock backend, a semantic in-memory partitioned
// log, an in-memory pub/sub transport, and an in-memory checkpoint
// store for integration testing of the producer, iterator, composite,
// and daemon components.

pub mod factory;
pub mod memory_checkpoint;
pub mod memory_log;
pub mod memory_pubsub;
pub mod mock_backend;

pub use factory::MemoryFactory;
pub use memory_checkpoint::MemoryCheckpointer;
pub use memory_log::MemoryLogBackend;
pub use memory_pubsub::MemoryPubSub;
pub use mock_backend::MockBackend;
