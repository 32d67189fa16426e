//! Feature modules: the unit of dynamic registration.

use std::fmt;
use std::sync::Arc;

use rootstore_common::RootStoreError;

use crate::traits::{Effect, SliceReducer};

/// A self-contained slice of the application: an optional reducer for the
/// state slice named by `id`, an optional effect, and the modules it needs
/// admitted first.
pub struct FeatureModule {
    id: String,
    reducer: Option<Arc<dyn SliceReducer>>,
    effect: Option<Arc<dyn Effect>>,
    dependencies: Vec<Arc<FeatureModule>>,
}

impl FeatureModule {
    pub fn builder(id: impl Into<String>) -> FeatureModuleBuilder {
        FeatureModuleBuilder {
            id: id.into(),
            reducer: None,
            effect: None,
            dependencies: Vec::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn reducer(&self) -> Option<&Arc<dyn SliceReducer>> {
        self.reducer.as_ref()
    }

    pub fn effect(&self) -> Option<&Arc<dyn Effect>> {
        self.effect.as_ref()
    }

    /// Direct dependencies, in declared order.
    pub fn dependencies(&self) -> &[Arc<FeatureModule>] {
        &self.dependencies
    }

    pub fn has_reducer(&self) -> bool {
        self.reducer.is_some()
    }

    pub fn has_effect(&self) -> bool {
        self.effect.is_some()
    }
}

impl fmt::Debug for FeatureModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let dependencies: Vec<&str> = self.dependencies.iter().map(|d| d.id()).collect();
        f.debug_struct("FeatureModule")
            .field("id", &self.id)
            .field("reducer", &self.has_reducer())
            .field("effect", &self.has_effect())
            .field("dependencies", &dependencies)
            .finish()
    }
}

pub struct FeatureModuleBuilder {
    id: String,
    reducer: Option<Arc<dyn SliceReducer>>,
    effect: Option<Arc<dyn Effect>>,
    dependencies: Vec<Arc<FeatureModule>>,
}

impl FeatureModuleBuilder {
    pub fn reducer(mut self, reducer: impl SliceReducer + 'static) -> Self {
        self.reducer = Some(Arc::new(reducer));
        self
    }

    pub fn effect(mut self, effect: impl Effect + 'static) -> Self {
        self.effect = Some(Arc::new(effect));
        self
    }

    pub fn depends_on(mut self, module: Arc<FeatureModule>) -> Self {
        self.dependencies.push(module);
        self
    }

    pub fn build(self) -> Result<Arc<FeatureModule>, RootStoreError> {
        if self.id.trim().is_empty() {
            return Err(RootStoreError::InvalidModule(
                "module id must not be empty".to_string(),
            ));
        }
        Ok(Arc::new(FeatureModule {
            id: self.id,
            reducer: self.reducer,
            effect: self.effect,
            dependencies: self.dependencies,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reducer::ActionHandlers;

    #[test]
    fn empty_id_is_rejected() {
        let err = FeatureModule::builder("  ").build().unwrap_err();
        assert!(matches!(err, RootStoreError::InvalidModule(_)));
    }

    #[test]
    fn builder_keeps_dependency_order() {
        let a = FeatureModule::builder("a").build().unwrap();
        let b = FeatureModule::builder("b").build().unwrap();
        let m = FeatureModule::builder("m")
            .reducer(ActionHandlers::new("x"))
            .depends_on(a)
            .depends_on(b)
            .build()
            .unwrap();

        let ids: Vec<&str> = m.dependencies().iter().map(|d| d.id()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert!(m.has_reducer());
        assert!(!m.has_effect());
    }

    #[test]
    fn debug_lists_dependency_ids() {
        let a = FeatureModule::builder("a").build().unwrap();
        let m = FeatureModule::builder("m").depends_on(a).build().unwrap();
        let rendered = format!("{m:?}");
        assert!(rendered.contains("\"a\""));
        assert!(rendered.contains("effect: false"));
    }
}
