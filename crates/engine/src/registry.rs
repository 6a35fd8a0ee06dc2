use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use blueprint_core::{check_additive, validate, BlueprintDefinition, BlueprintId};

use crate::error::EngineError;

/// Active blueprint definitions, shared by the engine and the scheduler.
#[derive(Debug, Clone, Default)]
pub struct BlueprintRegistry {
    inner: Arc<RwLock<HashMap<BlueprintId, Arc<BlueprintDefinition>>>>,
}

impl BlueprintRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate and publish a definition. Replacing an active definition is
    /// only allowed when the change is additive.
    pub fn activate(
        &self,
        definition: BlueprintDefinition,
    ) -> Result<Arc<BlueprintDefinition>, EngineError> {
        validate(&definition)?;
        let mut map = self.inner.write().unwrap_or_else(|e| e.into_inner());
        if let Some(previous) = map.get(&definition.id) {
            check_additive(previous, &definition)?;
        }
        let definition = Arc::new(definition);
        map.insert(definition.id, Arc::clone(&definition));
        Ok(definition)
    }

    pub fn deactivate(&self, id: BlueprintId) -> Option<Arc<BlueprintDefinition>> {
        self.inner
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&id)
    }

    pub fn get(&self, id: BlueprintId) -> Option<Arc<BlueprintDefinition>> {
        self.inner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&id)
            .cloned()
    }

    pub fn require(&self, id: BlueprintId) -> Result<Arc<BlueprintDefinition>, EngineError> {
        self.get(id)
            .ok_or(EngineError::UnknownBlueprint { blueprint_id: id })
    }

    pub fn ids(&self) -> Vec<BlueprintId> {
        let mut ids: Vec<_> = self
            .inner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .copied()
            .collect();
        ids.sort();
        ids
    }
}
