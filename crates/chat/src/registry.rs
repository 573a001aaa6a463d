//! Metadata builder registry.
//!
//! Features register a builder that contributes extra context to outgoing
//! chat requests. Only the builder of the currently active feature runs, so
//! the chat layer never needs to know which features exist.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use copanel_core::FeatureId;
use serde_json::{Map, Value};
use tokio::sync::watch;
use tracing::{debug, info};

/// Supplies request metadata for one feature. Must not block.
pub trait MetadataBuilder: Send + Sync {
    fn build(&self) -> Map<String, Value>;
}

impl<F> MetadataBuilder for F
where
    F: Fn() -> Map<String, Value> + Send + Sync,
{
    fn build(&self) -> Map<String, Value> {
        self()
    }
}

/// Builders keyed by feature, plus a view of the active feature.
pub struct MetadataRegistry {
    builders: RwLock<HashMap<FeatureId, Arc<dyn MetadataBuilder>>>,
    active: watch::Receiver<FeatureId>,
}

impl MetadataRegistry {
    pub fn new(active: watch::Receiver<FeatureId>) -> Self {
        Self {
            builders: RwLock::new(HashMap::new()),
            active,
        }
    }

    /// Register a builder, replacing any previous one for the feature.
    pub fn register(&self, feature: FeatureId, builder: impl MetadataBuilder + 'static) {
        self.insert(feature, Arc::new(builder));
    }

    fn insert(&self, feature: FeatureId, builder: Arc<dyn MetadataBuilder>) {
        let replaced = self
            .builders
            .write()
            .unwrap()
            .insert(feature, builder)
            .is_some();
        info!(feature = %feature, replaced, "Registered metadata builder");
    }

    /// Remove a feature's builder. Returns whether one was registered.
    pub fn unregister(&self, feature: FeatureId) -> bool {
        let removed = self.builders.write().unwrap().remove(&feature).is_some();
        if removed {
            info!(feature = %feature, "Unregistered metadata builder");
        }
        removed
    }

    /// Register a builder for as long as the returned guard lives.
    pub fn register_scoped(
        self: &Arc<Self>,
        feature: FeatureId,
        builder: impl MetadataBuilder + 'static,
    ) -> RegistrationGuard {
        let builder: Arc<dyn MetadataBuilder> = Arc::new(builder);
        self.insert(feature, Arc::clone(&builder));
        RegistrationGuard {
            registry: Arc::clone(self),
            feature,
            builder,
        }
    }

    pub fn is_registered(&self, feature: FeatureId) -> bool {
        self.builders.read().unwrap().contains_key(&feature)
    }

    pub fn active_feature(&self) -> FeatureId {
        *self.active.borrow()
    }

    /// Run the active feature's builder. `None` when it has none.
    pub fn get_metadata(&self) -> Option<Map<String, Value>> {
        let feature = self.active_feature();
        let builder = self.builders.read().unwrap().get(&feature).cloned()?;
        let metadata = builder.build();
        debug!(feature = %feature, keys = metadata.len(), "Collected request metadata");
        Some(metadata)
    }
}

impl std::fmt::Debug for MetadataRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut features: Vec<FeatureId> = self.builders.read().unwrap().keys().copied().collect();
        features.sort_by_key(|f| f.as_str());
        f.debug_struct("MetadataRegistry")
            .field("active", &self.active_feature())
            .field("registered", &features)
            .finish()
    }
}

/// Unregisters its builder when dropped, unless it has since been replaced.
#[must_use = "the builder is unregistered when the guard is dropped"]
pub struct RegistrationGuard {
    registry: Arc<MetadataRegistry>,
    feature: FeatureId,
    builder: Arc<dyn MetadataBuilder>,
}

impl RegistrationGuard {
    pub fn feature(&self) -> FeatureId {
        self.feature
    }
}

impl Drop for RegistrationGuard {
    fn drop(&mut self) {
        let mut builders = self.registry.builders.write().unwrap();
        let ours = builders
            .get(&self.feature)
            .is_some_and(|current| Arc::ptr_eq(current, &self.builder));
        if ours {
            builders.remove(&self.feature);
            debug!(feature = %self.feature, "Scoped metadata builder released");
        }
    }
}
