//! In-memory definition store
//!
//! Holds every definition in an immutable snapshot behind an `ArcSwap`.
//! Readers load the current snapshot without locking; writers clone it,
//! modify the clone and swap the pointer, so a run that already loaded a
//! workflow keeps seeing a consistent view.

use crate::workflow::storage::WorkflowStore;
use crate::workflow::types::{
    DefinitionBundle, Edge, Node, OperatorTemplate, Workflow, WorkflowDefinition,
};
use anyhow::Result;
use arc_swap::ArcSwap;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Clone, Default)]
struct Snapshot {
    workflows: HashMap<String, WorkflowDefinition>,
    templates: HashMap<String, OperatorTemplate>,
}

/// Lock-free definition store for tests and bundle-driven runs
#[derive(Debug)]
pub struct InMemoryWorkflowStore {
    snapshot: ArcSwap<Snapshot>,
}

impl Default for InMemoryWorkflowStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryWorkflowStore {
    pub fn new() -> Self {
        Self {
            snapshot: ArcSwap::new(Arc::new(Snapshot::default())),
        }
    }

    /// Build a store holding everything in `bundle`
    pub fn from_bundle(bundle: DefinitionBundle) -> Self {
        let store = Self::new();
        store.load_bundle(bundle);
        store
    }

    /// Merge a bundle into the current snapshot (same ids are replaced)
    pub fn load_bundle(&self, bundle: DefinitionBundle) {
        self.snapshot.rcu(|current| {
            let mut next = Snapshot::clone(current);
            for template in &bundle.templates {
                next.templates.insert(template.id.clone(), template.clone());
            }
            for definition in &bundle.workflows {
                next.workflows
                    .insert(definition.workflow.id.clone(), definition.clone());
            }
            next
        });

        tracing::debug!(
            "Loaded {} workflows and {} templates into memory store",
            bundle.workflows.len(),
            bundle.templates.len()
        );
    }

    pub fn put_workflow(&self, workflow: Workflow, nodes: Vec<Node>, edges: Vec<Edge>) {
        let definition = WorkflowDefinition {
            workflow,
            nodes,
            edges,
        };
        self.snapshot.rcu(|current| {
            let mut next = Snapshot::clone(current);
            next.workflows
                .insert(definition.workflow.id.clone(), definition.clone());
            next
        });
    }

    pub fn put_template(&self, template: OperatorTemplate) {
        self.snapshot.rcu(|current| {
            let mut next = Snapshot::clone(current);
            next.templates.insert(template.id.clone(), template.clone());
            next
        });
    }

    /// Drop a workflow; returns whether it existed
    pub fn remove_workflow(&self, workflow_id: &str) -> bool {
        let current = self.snapshot.load();
        if !current.workflows.contains_key(workflow_id) {
            return false;
        }
        self.snapshot.rcu(|current| {
            let mut next = Snapshot::clone(current);
            next.workflows.remove(workflow_id);
            next
        });
        true
    }

    pub fn workflow_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.snapshot.load().workflows.keys().cloned().collect();
        ids.sort();
        ids
    }
}

#[async_trait]
impl WorkflowStore for InMemoryWorkflowStore {
    async fn get_workflow(&self, id: &str) -> Result<Option<Workflow>> {
        Ok(self
            .snapshot
            .load()
            .workflows
            .get(id)
            .map(|definition| definition.workflow.clone()))
    }

    async fn list_nodes(&self, workflow_id: &str) -> Result<Vec<Node>> {
        Ok(self
            .snapshot
            .load()
            .workflows
            .get(workflow_id)
            .map(|definition| definition.nodes.clone())
            .unwrap_or_default())
    }

    async fn list_edges(&self, workflow_id: &str) -> Result<Vec<Edge>> {
        Ok(self
            .snapshot
            .load()
            .workflows
            .get(workflow_id)
            .map(|definition| definition.edges.clone())
            .unwrap_or_default())
    }

    async fn get_template(&self, id: &str) -> Result<Option<OperatorTemplate>> {
        Ok(self.snapshot.load().templates.get(id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::result::Payload;

    fn workflow(id: &str) -> Workflow {
        Workflow {
            id: id.into(),
            name: format!("{} name", id),
            status: None,
        }
    }

    #[tokio::test]
    async fn put_and_read() {
        let store = InMemoryWorkflowStore::new();
        store.put_workflow(
            workflow("wf"),
            vec![Node::new("a", "A", Some("t".into()))],
            vec![Edge::new("a", "ghost")],
        );
        store.put_template(OperatorTemplate {
            id: "t".into(),
            name: "T".into(),
            implementation: "http".into(),
            method: "request".into(),
            enabled: true,
            params: Payload::new(),
        });

        assert_eq!(store.get_workflow("wf").await.unwrap().unwrap().name, "wf name");
        assert_eq!(store.list_nodes("wf").await.unwrap().len(), 1);
        assert_eq!(store.list_edges("wf").await.unwrap()[0].to, "ghost");
        assert!(store.get_template("t").await.unwrap().is_some());
        assert!(store.list_nodes("other").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn snapshot_taken_before_swap_is_unaffected() {
        let store = InMemoryWorkflowStore::new();
        store.put_workflow(workflow("wf"), vec![Node::new("a", "A", None)], vec![]);

        let before = store.snapshot.load_full();
        assert!(store.remove_workflow("wf"));
        assert!(!store.remove_workflow("wf"));

        assert!(before.workflows.contains_key("wf"));
        assert!(store.get_workflow("wf").await.unwrap().is_none());
        assert!(store.workflow_ids().is_empty());
    }
}
