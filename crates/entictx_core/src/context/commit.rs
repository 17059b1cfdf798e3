//! Commit pipeline and structural isolation.

use super::{DataContext, EntityKey, EntityRef, SharedDataContext};
use crate::change_feed::ContextEvent;
use crate::context::merge::MergeOptions;
use crate::error::{CoreError, CoreResult};
use entictx_model::{Entity, EntityGraph, FetchPlan, NodeId};
use entictx_store::{EntitySet, SaveContext};
use std::collections::{BTreeSet, HashMap};
use tracing::{debug, warn};

/// Changes about to be committed, handed to pre-commit hooks.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommitChanges {
    /// Modified entities.
    pub modified: BTreeSet<EntityRef>,
    /// Removed entities.
    pub removed: BTreeSet<EntityRef>,
}

impl DataContext {
    /// Registers a pre-commit hook. A hook returning `false` vetoes the
    /// commit, which then returns an empty set.
    pub fn on_pre_commit(&mut self, hook: impl FnMut(&CommitChanges) -> bool + Send + 'static) {
        self.pre_commit.push(Box::new(hook));
    }

    /// Replaces the persistence call of top-level commits.
    pub fn set_commit_delegate(
        &mut self,
        delegate: impl FnMut(SaveContext) -> CoreResult<EntitySet> + Send + 'static,
    ) {
        self.commit_delegate = Some(Box::new(delegate));
    }

    /// Removes the commit delegate.
    pub fn clear_commit_delegate(&mut self) {
        self.commit_delegate = None;
    }

    /// Commits modified and removed entities.
    ///
    /// A top-level context saves through its commit delegate or data
    /// manager; a nested context merges its changes into the parent, which
    /// must not be locked by the caller. Either way the resulting state is
    /// merged back, so the returned handles are the ones the caller already
    /// holds.
    ///
    /// # Errors
    ///
    /// Persistence errors propagate unchanged and leave the modified and
    /// removed sets untouched.
    pub fn commit(&mut self) -> CoreResult<BTreeSet<EntityRef>> {
        let changes = CommitChanges {
            modified: self.modified.clone(),
            removed: self.removed.clone(),
        };
        self.feed.emit(ContextEvent::PreCommit {
            modified: changes.modified.len(),
            removed: changes.removed.len(),
        });
        for hook in &mut self.pre_commit {
            if !hook(&changes) {
                debug!("commit vetoed");
                return Ok(BTreeSet::new());
            }
        }

        let committed = match self.parent.clone() {
            Some(parent) => self.commit_to_parent(&parent)?,
            None => self.commit_to_store()?,
        };

        self.modified.clear();
        let removed = std::mem::take(&mut self.removed);
        if self.config.evict_removed_after_commit {
            for h in removed {
                self.drop_slot(h);
            }
        }
        self.pending.clear();
        debug!(committed = committed.len(), "commit finished");
        self.feed.emit(ContextEvent::PostCommit {
            committed: committed.iter().copied().collect(),
        });
        Ok(committed)
    }

    /// Structural clone of the entities reachable from `roots`.
    ///
    /// Returns the graph and the node of every root, in order. References to
    /// evicted entities leave the property unloaded in the copy.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UnknownEntity`] if a root is evicted.
    pub fn isolate(&self, roots: &[EntityRef]) -> CoreResult<(EntityGraph, Vec<NodeId>)> {
        let mut order: Vec<EntityRef> = Vec::new();
        let mut nodes: HashMap<EntityRef, NodeId> = HashMap::new();
        let mut stack: Vec<EntityRef> = roots.iter().rev().copied().collect();
        while let Some(h) = stack.pop() {
            if nodes.contains_key(&h) {
                continue;
            }
            let entity = self.slot(h)?;
            nodes.insert(h, NodeId::from_index(order.len())?);
            order.push(h);
            let mut next: Vec<EntityRef> = entity
                .loaded()
                .flat_map(|(_, v)| v.refs().copied())
                .filter(|r| self.entity(*r).is_some())
                .collect();
            next.reverse();
            stack.extend(next);
        }

        let mut graph = EntityGraph::new();
        for h in &order {
            let entity = self.slot(*h)?;
            let mut copy = Entity::unloaded(entity.meta().clone(), entity.system().clone());
            for (name, value) in entity.loaded() {
                if value.refs().all(|r| nodes.contains_key(r)) {
                    copy.set(name, value.map_refs(|r| nodes[r]))?;
                }
            }
            graph.add(copy)?;
        }
        let roots = roots.iter().map(|r| nodes[r]).collect();
        Ok((graph, roots))
    }

    fn commit_to_store(&mut self) -> CoreResult<BTreeSet<EntityRef>> {
        let to_save: Vec<EntityRef> = self
            .modified
            .iter()
            .copied()
            .filter(|h| !self.removed.contains(h))
            .filter(|h| self.entity(*h).is_some_and(|e| !e.meta().is_embeddable()))
            .collect();
        let to_remove: Vec<EntityRef> = self.removed.iter().copied().collect();
        if to_save.is_empty() && to_remove.is_empty() {
            return Ok(BTreeSet::new());
        }

        let roots: Vec<EntityRef> = to_save.iter().chain(&to_remove).copied().collect();
        let (graph, nodes) = self.isolate(&roots)?;
        for h in &roots {
            let entity = self.slot(*h)?;
            if entity.id().is_none() {
                self.pending.insert(entity.system().instance, *h);
            }
        }

        let mut save = SaveContext::new(graph);
        for (h, node) in to_save.iter().zip(&nodes) {
            save.to_save.push(*node);
            save.fetch_plans.insert(*node, self.plan_hint(*h)?);
        }
        save.to_remove.extend_from_slice(&nodes[to_save.len()..]);
        debug!(save = to_save.len(), remove = to_remove.len(), "committing to storage");

        let result = match self.commit_delegate.as_mut() {
            Some(delegate) => delegate(save)?,
            None => self
                .data_manager
                .as_ref()
                .ok_or_else(|| CoreError::configuration("no data manager to commit to"))?
                .save(save)?,
        };
        self.merge_saved(&result)
    }

    /// Plan of the state to get back for `h`: what is loaded now, with
    /// references loaded locally.
    fn plan_hint(&self, h: EntityRef) -> CoreResult<FetchPlan> {
        let entity = self.slot(h)?;
        let mut plan = FetchPlan::new(entity.class_name());
        for (name, _) in entity.loaded() {
            let property = entity.meta().require(name)?;
            plan = match property.kind.target() {
                Some(target) => plan.add_nested(name, FetchPlan::local(self.metadata.class(target)?)),
                None => plan.add(name),
            };
        }
        Ok(plan)
    }

    fn merge_saved(&mut self, result: &EntitySet) -> CoreResult<BTreeSet<EntityRef>> {
        let mut roots = Vec::with_capacity(result.roots.len());
        for &root in &result.roots {
            let saved = result.graph.get(root)?;
            let known = self.pending.contains_key(&saved.system().instance)
                || saved.id().is_some_and(|id| {
                    self.find_by_key(&EntityKey::persisted(saved.class_name(), id))
                        .is_some()
                });
            if known {
                roots.push(root);
            } else {
                warn!(
                    class = saved.class_name(),
                    id = ?saved.id(),
                    "committed entity has no managed counterpart, skipped"
                );
            }
        }
        let merged = self.merge_roots(&result.graph, &roots, MergeOptions::fresh())?;
        Ok(merged.into_iter().collect())
    }

    fn commit_to_parent(&mut self, parent: &SharedDataContext) -> CoreResult<BTreeSet<EntityRef>> {
        let to_save: Vec<EntityRef> = self
            .modified
            .iter()
            .copied()
            .filter(|h| !self.removed.contains(h))
            .filter(|h| self.entity(*h).is_some_and(|e| !e.meta().is_embeddable()))
            .collect();
        let (graph, nodes) = self.isolate(&to_save)?;

        let (back, back_nodes) = {
            let mut p = parent.lock();
            let merged = p.merge_roots(&graph, &nodes, MergeOptions::default())?;
            for h in &merged {
                p.mark_modified(*h);
            }
            for h in &self.removed {
                let Some(entity) = self.entity(*h) else {
                    continue;
                };
                let counterpart = p.find_instance(entity.system().instance).or_else(|| {
                    entity
                        .id()
                        .and_then(|id| p.find(entity.class_name(), &id))
                });
                if let Some(ph) = counterpart {
                    p.remove(ph)?;
                }
            }
            debug!(
                merged = merged.len(),
                removed = self.removed.len(),
                "committed to parent context"
            );
            p.isolate(&merged)?
        };

        let merged = self.merge_roots(&back, &back_nodes, MergeOptions::fresh())?;
        Ok(merged.into_iter().collect())
    }
}
