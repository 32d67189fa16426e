//! Module registry: idempotent, dependency-first admission.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use futures::channel::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, warn};

use crate::module::FeatureModule;

/// Keeps every admitted module by id and the order they were admitted in.
///
/// A module is admitted at most once per registry. Its dependencies are
/// admitted before it, depth-first in declared order.
#[derive(Default)]
pub struct ModuleRegistry {
    table: HashMap<String, Arc<FeatureModule>>,
    admitted: Vec<Arc<FeatureModule>>,
    in_progress: HashSet<String>,
    subscribers: Vec<UnboundedSender<Arc<FeatureModule>>>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Admit `module` and any of its not-yet-known dependencies. Returns the
    /// newly admitted modules in admission order; empty when `module` was
    /// already known.
    pub fn admit(&mut self, module: &Arc<FeatureModule>) -> Vec<Arc<FeatureModule>> {
        let mut admitted = Vec::new();
        self.visit(module, None, &mut admitted);
        admitted
    }

    fn visit(
        &mut self,
        module: &Arc<FeatureModule>,
        dependent: Option<&str>,
        admitted: &mut Vec<Arc<FeatureModule>>,
    ) {
        let id = module.id();
        if self.table.contains_key(id) {
            if self.in_progress.contains(id) {
                warn!(
                    module = %id,
                    dependent = dependent.unwrap_or_default(),
                    "Dependency cycle detected, skipping back edge"
                );
            }
            return;
        }

        // Entered before recursing so cycles terminate.
        self.table.insert(id.to_string(), Arc::clone(module));
        self.in_progress.insert(id.to_string());

        for dependency in module.dependencies() {
            self.visit(dependency, Some(id), admitted);
        }

        self.in_progress.remove(id);
        debug!(module = %id, "Admitted feature module");
        self.admitted.push(Arc::clone(module));
        self.subscribers
            .retain(|subscriber| subscriber.unbounded_send(Arc::clone(module)).is_ok());
        admitted.push(Arc::clone(module));
    }

    pub fn contains(&self, id: &str) -> bool {
        self.table.contains_key(id)
    }

    pub fn get(&self, id: &str) -> Option<&Arc<FeatureModule>> {
        self.table.get(id)
    }

    pub fn len(&self) -> usize {
        self.admitted.len()
    }

    pub fn is_empty(&self) -> bool {
        self.admitted.is_empty()
    }

    pub fn admission_order(&self) -> Vec<&str> {
        self.admitted.iter().map(|m| m.id()).collect()
    }

    /// Every module admitted so far, then each later admission as it happens.
    pub fn subscribe(&mut self) -> UnboundedReceiver<Arc<FeatureModule>> {
        let (tx, rx) = mpsc::unbounded();
        for module in &self.admitted {
            // The receiver is still in hand, so this cannot fail.
            let _ = tx.unbounded_send(Arc::clone(module));
        }
        self.subscribers.push(tx);
        rx
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    fn module(id: &str, dependencies: Vec<Arc<FeatureModule>>) -> Arc<FeatureModule> {
        dependencies
            .into_iter()
            .fold(FeatureModule::builder(id), |b, d| b.depends_on(d))
            .build()
            .unwrap()
    }

    fn ids(modules: &[Arc<FeatureModule>]) -> Vec<&str> {
        modules.iter().map(|m| m.id()).collect()
    }

    #[test]
    fn admission_is_idempotent() {
        let mut registry = ModuleRegistry::new();
        let sample = module("sample", vec![]);

        assert_eq!(ids(&registry.admit(&sample)), vec!["sample"]);
        assert!(registry.admit(&sample).is_empty());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn same_id_different_instance_is_ignored() {
        let mut registry = ModuleRegistry::new();
        registry.admit(&module("sample", vec![]));
        assert!(registry.admit(&module("sample", vec![])).is_empty());
    }

    #[test]
    fn dependencies_come_first_in_declared_order() {
        let d3 = module("d3", vec![]);
        let d2 = module("d2", vec![d3]);
        let d1 = module("d1", vec![]);
        let m = module("m", vec![d1, d2]);

        let mut registry = ModuleRegistry::new();
        let admitted = registry.admit(&m);
        assert_eq!(ids(&admitted), vec!["d1", "d3", "d2", "m"]);
        assert_eq!(registry.admission_order(), vec!["d1", "d3", "d2", "m"]);
    }

    #[test]
    fn shared_dependency_is_admitted_once() {
        let d3 = module("d3", vec![]);
        let d2 = module("d2", vec![d3]);
        let d1 = module("d1", vec![d2.clone()]);
        let m = module("m", vec![d1, d2]);

        let mut registry = ModuleRegistry::new();
        assert_eq!(ids(&registry.admit(&m)), vec!["d3", "d2", "d1", "m"]);
    }

    #[test]
    fn previously_admitted_dependency_is_skipped() {
        let shared = module("shared", vec![]);
        let mut registry = ModuleRegistry::new();
        registry.admit(&shared);

        let m = module("m", vec![shared]);
        assert_eq!(ids(&registry.admit(&m)), vec!["m"]);
        assert!(registry.contains("shared"));
        assert!(registry.get("m").is_some());
    }

    #[test]
    fn id_cycle_is_cut_at_the_back_edge() {
        let inner_a = module("a", vec![]);
        let b = module("b", vec![inner_a]);
        let outer_a = module("a", vec![b]);

        let mut registry = ModuleRegistry::new();
        assert_eq!(ids(&registry.admit(&outer_a)), vec!["b", "a"]);
        assert!(Arc::ptr_eq(registry.get("a").unwrap(), &outer_a));
    }

    #[tokio::test]
    async fn subscribers_see_history_then_live_admissions() {
        let mut registry = ModuleRegistry::new();
        registry.admit(&module("a", vec![]));

        let mut admissions = registry.subscribe();
        registry.admit(&module("b", vec![]));

        assert_eq!(admissions.next().await.map(|m| m.id().to_string()), Some("a".into()));
        assert_eq!(admissions.next().await.map(|m| m.id().to_string()), Some("b".into()));
    }
}
