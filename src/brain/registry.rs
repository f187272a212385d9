use crate::error::RegistryError;
use crate::types::*;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Tag → brain mapping with a latched default and a one-shot readiness gate.
///
/// Writes take the lock exclusively; lookups share it. The default slot is
/// set by the first default-tagged registration and never overwritten. The
/// gate is a `watch` channel that transitions from `None` to `Some` exactly
/// once, so waiters that subscribe after it fired observe it immediately.
pub struct BrainRegistry {
    by_tag: RwLock<HashMap<Tag, Arc<Brain>>>,
    ready_tx: watch::Sender<Option<Arc<Brain>>>,
    ready_timeout: Duration,
}

impl BrainRegistry {
    pub fn new(ready_timeout: Duration) -> Self {
        let (ready_tx, _) = watch::channel(None);
        Self {
            by_tag: RwLock::new(HashMap::new()),
            ready_tx,
            ready_timeout,
        }
    }

    /// Decodes a JSON registration payload and registers it.
    pub fn register_payload(&self, payload: &[u8]) -> Result<Arc<Brain>, RegistryError> {
        let descriptor: BrainDescriptor = serde_json::from_slice(payload)
            .map_err(|e| RegistryError::MalformedRegistration(e.to_string()))?;
        self.register(descriptor)
    }

    pub fn register(&self, descriptor: BrainDescriptor) -> Result<Arc<Brain>, RegistryError> {
        let brain = Arc::new(build_brain(descriptor)?);

        let latched = {
            let mut by_tag = self.by_tag.write().unwrap_or_else(PoisonError::into_inner);
            let mut latched = false;
            for tag in &brain.tags {
                if tag == DEFAULT_TAG {
                    if by_tag.contains_key(DEFAULT_TAG) {
                        debug!("Default brain already latched, ignoring default tag from {}", brain.name);
                        continue;
                    }
                    latched = true;
                }
                info!("Adding brain {} for tag {}", brain.name, tag);
                by_tag.insert(tag.clone(), brain.clone());
            }
            latched
        };

        if latched {
            let fired = self.ready_tx.send_if_modified(|slot| {
                if slot.is_none() {
                    *slot = Some(brain.clone());
                    true
                } else {
                    false
                }
            });
            if fired {
                info!("Default brain {} registered at {}", brain.name, brain.url);
            }
        }

        Ok(brain)
    }

    /// Brain registered for exactly `tag`, without falling back or waiting.
    pub fn get(&self, tag: &str) -> Option<Arc<Brain>> {
        self.by_tag
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(tag)
            .cloned()
    }

    /// Brain for `tag`, else the default brain.
    ///
    /// With no default registered yet, waits for the readiness gate up to the
    /// configured bound and then fails with [`RegistryError::NotReady`].
    pub async fn lookup(&self, tag: &str) -> Result<Arc<Brain>, RegistryError> {
        if let Some(brain) = self.resolve(tag) {
            return Ok(brain);
        }

        debug!("No brain for tag {} and no default yet, waiting", tag);
        let mut ready_rx = self.ready_tx.subscribe();
        let fired = tokio::time::timeout(self.ready_timeout, async {
            ready_rx.wait_for(Option::is_some).await.is_ok()
        })
        .await
        .unwrap_or(false);

        if !fired {
            warn!("Lookup for tag {} timed out waiting for a default brain", tag);
            return Err(RegistryError::NotReady(self.ready_timeout));
        }

        self.resolve(tag)
            .ok_or(RegistryError::NotReady(self.ready_timeout))
    }

    pub fn default_brain(&self) -> Option<Arc<Brain>> {
        self.get(DEFAULT_TAG)
    }

    pub fn is_ready(&self) -> bool {
        self.ready_tx.borrow().is_some()
    }

    /// Distinct registered brains, ordered by name.
    pub fn brains(&self) -> Vec<Arc<Brain>> {
        let by_tag = self.by_tag.read().unwrap_or_else(PoisonError::into_inner);
        let mut brains: Vec<Arc<Brain>> = Vec::new();
        for brain in by_tag.values() {
            if !brains.iter().any(|b| Arc::ptr_eq(b, brain)) {
                brains.push(brain.clone());
            }
        }
        brains.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.url.cmp(&b.url)));
        brains
    }

    pub fn tags(&self) -> Vec<Tag> {
        let mut tags: Vec<Tag> = self
            .by_tag
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        tags.sort();
        tags
    }

    fn resolve(&self, tag: &str) -> Option<Arc<Brain>> {
        let by_tag = self.by_tag.read().unwrap_or_else(PoisonError::into_inner);
        by_tag.get(tag).or_else(|| by_tag.get(DEFAULT_TAG)).cloned()
    }
}

fn build_brain(descriptor: BrainDescriptor) -> Result<Brain, RegistryError> {
    let name = descriptor.name.trim();
    let url = descriptor.url.trim();
    if name.is_empty() {
        return Err(RegistryError::MalformedRegistration("name is empty".to_string()));
    }
    if url.is_empty() {
        return Err(RegistryError::MalformedRegistration("url is empty".to_string()));
    }

    let tags = parse_tags(&descriptor.tags);
    if tags.is_empty() {
        return Err(RegistryError::MalformedRegistration(format!(
            "brain '{}' carries no tags",
            name
        )));
    }

    Ok(Brain {
        name: name.to_string(),
        url: url.trim_end_matches('/').to_string(),
        tags,
    })
}
