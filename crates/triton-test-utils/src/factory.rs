//! A [`BackendFactory`] over the in-memory backends, for wiring config
//! entries to live streams in tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use triton::backend::StreamBackend;
use triton::config::{BackendFactory, PartitionedLogEntry, PubSubEntry};
use triton::errors::TritonError;
use triton::pubsub::PubSubTransport;

use crate::{MemoryLogBackend, MemoryPubSub};

#[derive(Default)]
pub struct MemoryFactory {
    logs: Mutex<HashMap<String, Arc<MemoryLogBackend>>>,
    pubsubs: Mutex<HashMap<String, Arc<MemoryPubSub>>>,
}

impl MemoryFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// The (created-on-demand) log backend for a physical stream name.
    pub fn log(&self, name: &str) -> Arc<MemoryLogBackend> {
        let mut logs = self.logs.lock().unwrap();
        logs.entry(name.to_owned())
            .or_insert_with(|| Arc::new(MemoryLogBackend::new(&["0001"])))
            .clone()
    }

    /// The (created-on-demand) pub/sub transport for a project.
    pub fn pubsub_transport(&self, project: &str) -> Arc<MemoryPubSub> {
        let mut pubsubs = self.pubsubs.lock().unwrap();
        pubsubs
            .entry(project.to_owned())
            .or_insert_with(|| Arc::new(MemoryPubSub::new()))
            .clone()
    }
}

impl BackendFactory for MemoryFactory {
    fn partitioned_log(
        &self,
        entry: &PartitionedLogEntry,
    ) -> Result<Arc<dyn StreamBackend>, TritonError> {
        Ok(self.log(&entry.name))
    }

    fn pubsub(&self, entry: &PubSubEntry) -> Result<Arc<dyn PubSubTransport>, TritonError> {
        Ok(self.pubsub_transport(&entry.project))
    }
}
