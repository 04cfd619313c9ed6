//! Shared helpers for the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use modlink::cache::content_hash;
use modlink::ContentStore;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Start(String),
    End(String),
}

/// Content store with per-module latency that logs every fetch
#[derive(Default)]
pub struct ScriptedStore {
    payloads: Mutex<HashMap<String, String>>,
    delays: HashMap<String, Duration>,
    events: Arc<Mutex<Vec<Event>>>,
}

impl ScriptedStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_payload(self, id: &str, payload: &str) -> Self {
        self.payloads.lock().insert(id.to_string(), payload.to_string());
        self
    }

    pub fn with_delay(mut self, id: &str, delay: Duration) -> Self {
        self.delays.insert(id.to_string(), delay);
        self
    }

    pub fn set_payload(&self, id: &str, payload: &str) {
        self.payloads.lock().insert(id.to_string(), payload.to_string());
    }

    pub fn events(&self) -> Arc<Mutex<Vec<Event>>> {
        Arc::clone(&self.events)
    }
}

#[async_trait]
impl ContentStore for ScriptedStore {
    async fn fetch(&self, module_id: &str) -> anyhow::Result<String> {
        self.events.lock().push(Event::Start(module_id.to_string()));
        if let Some(delay) = self.delays.get(module_id) {
            tokio::time::sleep(*delay).await;
        }
        self.events.lock().push(Event::End(module_id.to_string()));

        self.payloads
            .lock()
            .get(module_id)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("no payload for {}", module_id))
    }

    async fn content_hash(&self, module_id: &str) -> anyhow::Result<String> {
        self.payloads
            .lock()
            .get(module_id)
            .map(|payload| content_hash(payload))
            .ok_or_else(|| anyhow::anyhow!("no payload for {}", module_id))
    }
}

pub fn ids(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

/// Position of an event in the log
pub fn position(events: &[Event], event: &Event) -> usize {
    events
        .iter()
        .position(|e| e == event)
        .unwrap_or_else(|| panic!("event {:?} not recorded", event))
}
