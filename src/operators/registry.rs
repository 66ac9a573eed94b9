//! Operator registry with lock-free reads
//!
//! Dispatch only ever loads the current map; `register` and `unregister`
//! clone it, apply the change and swap the pointer. In-flight dispatches keep
//! the snapshot they started with.

use crate::operators::Operator;
use arc_swap::ArcSwap;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

type OperatorMap = HashMap<String, Arc<dyn Operator>>;

pub struct OperatorRegistry {
    operators: ArcSwap<OperatorMap>,
}

impl Default for OperatorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for OperatorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperatorRegistry")
            .field("operators", &self.ids())
            .finish()
    }
}

impl OperatorRegistry {
    pub fn new() -> Self {
        Self {
            operators: ArcSwap::new(Arc::new(HashMap::new())),
        }
    }

    /// Add or replace an operator; returns the one it replaced
    pub fn register(
        &self,
        id: impl Into<String>,
        operator: Arc<dyn Operator>,
    ) -> Option<Arc<dyn Operator>> {
        let id = id.into();
        let previous = self.operators.load().get(&id).cloned();

        self.operators.rcu(|current| {
            let mut next = OperatorMap::clone(current);
            next.insert(id.clone(), Arc::clone(&operator));
            next
        });

        tracing::debug!("Registered operator {}", id);
        previous
    }

    /// Remove an operator; returns whether it was registered
    pub fn unregister(&self, id: &str) -> bool {
        if !self.has_operator(id) {
            return false;
        }

        self.operators.rcu(|current| {
            let mut next = OperatorMap::clone(current);
            next.remove(id);
            next
        });

        tracing::debug!("Unregistered operator {}", id);
        true
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn Operator>> {
        self.operators.load().get(id).cloned()
    }

    pub fn has_operator(&self, id: &str) -> bool {
        self.operators.load().contains_key(id)
    }

    /// Registered ids, sorted
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.operators.load().keys().cloned().collect();
        ids.sort();
        ids
    }
}
