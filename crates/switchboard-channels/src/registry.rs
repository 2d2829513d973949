//! Adapter registry keyed by (channel, account)

use std::collections::HashMap;
use std::sync::Arc;
use switchboard_core::channel::{AdapterKey, ChannelAdapter};
use switchboard_core::types::InboundMessage;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Registered channel adapters plus the shared inbound queue they feed
pub struct AdapterRegistry {
    adapters: HashMap<AdapterKey, Arc<dyn ChannelAdapter>>,
    incoming_tx: mpsc::Sender<InboundMessage>,
    incoming_rx: Option<mpsc::Receiver<InboundMessage>>,
}

impl AdapterRegistry {
    /// Create a registry whose inbound queue holds `buffer_size` messages
    pub fn new(buffer_size: usize) -> Self {
        let (tx, rx) = mpsc::channel(buffer_size);
        debug!("Created adapter registry with buffer size {}", buffer_size);
        Self {
            adapters: HashMap::new(),
            incoming_tx: tx,
            incoming_rx: Some(rx),
        }
    }

    /// Register an adapter, replacing any previous one with the same key
    pub fn register(&mut self, adapter: Arc<dyn ChannelAdapter>) {
        let key = AdapterKey::of(adapter.as_ref());
        info!("Registering channel adapter: {}", key);
        if self.adapters.insert(key.clone(), adapter).is_some() {
            warn!("Replaced existing adapter for {}", key);
        }
    }

    /// Exact lookup, falling back to the only adapter of the channel when no
    /// account is given
    pub fn get(&self, channel: &str, account_id: Option<&str>) -> Option<Arc<dyn ChannelAdapter>> {
        let key = AdapterKey::new(channel, account_id.map(str::to_string));
        if let Some(adapter) = self.adapters.get(&key) {
            return Some(adapter.clone());
        }
        if account_id.is_some() {
            return None;
        }
        let mut candidates = self.adapters.iter().filter(|(k, _)| k.channel == channel);
        match (candidates.next(), candidates.next()) {
            (Some((_, adapter)), None) => Some(adapter.clone()),
            _ => None,
        }
    }

    /// Registered keys, sorted for stable output
    pub fn keys(&self) -> Vec<AdapterKey> {
        let mut keys: Vec<AdapterKey> = self.adapters.keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        self.adapters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }

    /// Hand out the inbound receiver; only the first caller gets it
    pub fn take_receiver(&mut self) -> Option<mpsc::Receiver<InboundMessage>> {
        self.incoming_rx.take()
    }

    /// Start every adapter. Failures are logged and do not stop the others.
    /// Returns how many adapters started.
    pub async fn start_all(&self) -> usize {
        info!("Starting {} channel adapter(s)", self.adapters.len());
        let mut started = 0;
        for (key, adapter) in &self.adapters {
            match adapter.start(self.incoming_tx.clone()).await {
                Ok(()) => {
                    info!("Started channel adapter: {}", key);
                    started += 1;
                }
                Err(e) => error!("Failed to start channel adapter {}: {}", key, e),
            }
        }
        started
    }

    /// Stop every adapter, isolating failures
    pub async fn stop_all(&self) {
        for (key, adapter) in &self.adapters {
            match adapter.stop().await {
                Ok(()) => debug!("Stopped channel adapter: {}", key),
                Err(e) => warn!("Failed to stop channel adapter {}: {}", key, e),
            }
        }
        info!("All channel adapters stopped");
    }
}
