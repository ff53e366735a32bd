// Per-channel subscription bookkeeping shared by the endpoint callbacks.
//
// One mutex guards every mapping so listener attach/detach cannot be
// interleaved with membership changes: a mapping is observable iff its bus
// listener is live.
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use weft_bus::ListenStream;

pub(crate) fn composite_id(connection_id: &str, subscription_id: &str) -> String {
    format!("{connection_id}#{subscription_id}")
}

struct ChannelMapping {
    subs: HashSet<String>,
    // Exclusively owned bus handle; closed when the mapping dies.
    listener: ListenStream,
}

#[derive(Default)]
pub(crate) struct SubscriptionRegistry {
    mappings: Mutex<HashMap<String, ChannelMapping>>,
}

pub(crate) struct Removal {
    pub existed: bool,
    pub last: bool,
}

impl SubscriptionRegistry {
    /// Record a subscriber, creating the mapping on first use. `attach`
    /// runs under the registry lock so the listener exists before any
    /// subscriber becomes eligible to receive. Returns whether the mapping
    /// was newly created.
    pub fn add(
        &self,
        channel: &str,
        composite: String,
        attach: impl FnOnce() -> weft_bus::Result<ListenStream>,
    ) -> weft_bus::Result<bool> {
        let mut mappings = self.mappings.lock().expect("registry lock");
        if let Some(mapping) = mappings.get_mut(channel) {
            mapping.subs.insert(composite);
            return Ok(false);
        }
        let listener = attach()?;
        let mut subs = HashSet::new();
        subs.insert(composite);
        mappings.insert(channel.to_string(), ChannelMapping { subs, listener });
        Ok(true)
    }

    /// Drop a subscriber. Idempotent: unknown channels and unknown
    /// composite ids are no-ops. The bus listener is detached here when the
    /// last subscriber leaves.
    pub fn remove(&self, channel: &str, composite: &str) -> Removal {
        let mut mappings = self.mappings.lock().expect("registry lock");
        let Some(mapping) = mappings.get_mut(channel) else {
            return Removal {
                existed: false,
                last: false,
            };
        };
        if !mapping.subs.remove(composite) {
            return Removal {
                existed: false,
                last: false,
            };
        }
        if mapping.subs.is_empty() {
            if let Some(mapping) = mappings.remove(channel) {
                mapping.listener.close();
            }
            return Removal {
                existed: true,
                last: true,
            };
        }
        Removal {
            existed: true,
            last: false,
        }
    }

    pub fn has_any(&self, channel: &str) -> bool {
        self.mappings
            .lock()
            .expect("registry lock")
            .contains_key(channel)
    }

    /// Stable membership snapshot for iteration outside the lock.
    pub fn snapshot(&self, channel: &str) -> Vec<String> {
        self.mappings
            .lock()
            .expect("registry lock")
            .get(channel)
            .map(|mapping| mapping.subs.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn mapping_count(&self) -> usize {
        self.mappings.lock().expect("registry lock").len()
    }

    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.mappings
            .lock()
            .expect("registry lock")
            .get(channel)
            .map(|mapping| mapping.subs.len())
            .unwrap_or(0)
    }

    /// Tear down every mapping, detaching the bus listeners.
    pub fn clear(&self) {
        let mut mappings = self.mappings.lock().expect("registry lock");
        for (_, mapping) in mappings.drain() {
            mapping.listener.close();
        }
    }
}
