//! Tree tracker: the orchestrator that keeps the logical tree and its
//! fingerprints synchronized against a live, mutating document.
//!
//! The tracker owns the authoritative tree, a registry mapping logical ids to
//! weak live references, and a reverse index from live nodes back to ids.
//! Change notifications accumulate between [`TreeTracker::pump`] calls; each
//! pump drains them into one batch, reconciles removed fingerprints against
//! added candidates through three escalating strategies, and only then lets
//! leftover additions become brand-new nodes. Vanished nodes get a grace
//! period before they are declared lost, absorbing re-render churn.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use tracing::{debug, trace, warn};

use crate::builder::{form_state, DomTree, NodeKind, TreeBuilder, TreeNode};
use crate::clock::{Clock, SystemClock};
use crate::config::{ConfigPatch, TrackerConfig};
use crate::dom::{LiveDocument, LiveNode, LiveRef, MutationRecord, ObserverFilter, ObserverToken};
use crate::events::{EventBus, HandlerToken, NodeChanges, TrackerEvent, TrackerEventKind};
use crate::fingerprint::Fingerprint;
use crate::matcher::{MatchContext, MatchStrategy, Matcher};
use crate::result::{ActionOutcome, RastroError, RastroResult};

/// Lifecycle of a tracked node.
///
/// Transitions are `Active -> Searching -> {Active, Lost}` only. `Lost` is
/// terminal: the node is purged, never kept as a tombstone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeStatus {
    /// Live reference resolves and is attached
    Active,
    /// Reference unresolved or detached; grace period running
    Searching,
    /// Grace period expired; purged
    Lost,
}

/// Runtime pairing of a logical node with its live counterpart
#[derive(Debug)]
pub struct TrackedNode {
    /// Weak handle to the live node
    pub live: LiveRef,
    /// Identity record used for re-matching
    pub fingerprint: Fingerprint,
    /// Current lifecycle state
    pub status: NodeStatus,
    /// When the node entered `Searching`
    pub searching_since_ms: Option<u64>,
    /// Parent logical id, `None` for the root
    pub parent_id: Option<String>,
}

/// Orchestrates tree building, change batching, identity reconciliation and
/// the query/action API for one tracking session.
pub struct TreeTracker {
    config: TrackerConfig,
    clock: Rc<dyn Clock>,
    document: Option<Rc<LiveDocument>>,
    tree: Option<DomTree>,
    registry: HashMap<String, TrackedNode>,
    reverse: HashMap<usize, String>,
    known: HashSet<usize>,
    pending: Rc<RefCell<Vec<MutationRecord>>>,
    observer: Option<ObserverToken>,
    grace_deadlines: HashMap<String, u64>,
    processing: bool,
    events: EventBus,
}

impl std::fmt::Debug for TreeTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TreeTracker")
            .field("tracking", &self.document.is_some())
            .field("registry", &self.registry.len())
            .field("searching", &self.grace_deadlines.len())
            .finish()
    }
}

impl Default for TreeTracker {
    fn default() -> Self {
        Self::new(TrackerConfig::default())
    }
}

impl TreeTracker {
    /// Create a tracker with the given configuration and the system clock
    #[must_use]
    pub fn new(config: TrackerConfig) -> Self {
        Self::with_clock(config, Rc::new(SystemClock))
    }

    /// Create a tracker with an injected clock (deterministic tests)
    #[must_use]
    pub fn with_clock(config: TrackerConfig, clock: Rc<dyn Clock>) -> Self {
        Self {
            config,
            clock,
            document: None,
            tree: None,
            registry: HashMap::new(),
            reverse: HashMap::new(),
            known: HashSet::new(),
            pending: Rc::new(RefCell::new(Vec::new())),
            observer: None,
            grace_deadlines: HashMap::new(),
            processing: false,
            events: EventBus::new(),
        }
    }

    /// Build the initial tree, populate the registry, and install the change
    /// subscription. Returns a snapshot of the built tree.
    pub fn start(&mut self, document: Rc<LiveDocument>) -> RastroResult<DomTree> {
        if self.document.is_some() {
            return Err(RastroError::TrackerFault {
                message: "tracker already started".to_string(),
            });
        }
        let now = self.clock.now_ms();
        let config = self.config.clone();
        let output = TreeBuilder::new(&config).build(&document, now);
        for entry in output.entries {
            self.reverse.insert(entry.node.ptr_id(), entry.id.clone());
            self.registry.insert(
                entry.id.clone(),
                TrackedNode {
                    live: entry.node.downgrade(),
                    fingerprint: entry.fingerprint,
                    status: NodeStatus::Active,
                    searching_since_ms: None,
                    parent_id: entry.parent_id,
                },
            );
        }
        // mark everything currently attached so change batches never
        // re-discover pre-existing nodes as new
        for node in document.root().descendants() {
            self.known.insert(node.ptr_id());
        }
        let pending = Rc::clone(&self.pending);
        let token = document.observe(
            ObserverFilter {
                child_list: true,
                character_data: true,
                attributes: config.attribute_allowlist.clone(),
            },
            move |records| pending.borrow_mut().extend(records),
        );
        self.observer = Some(token);
        self.document = Some(document);
        self.tree = Some(output.tree.clone());
        debug!(nodes = self.registry.len(), "tracking started");
        self.events.emit(&TrackerEvent::TreeInitialized {
            tree: output.tree.clone(),
        });
        Ok(output.tree)
    }

    /// Start tracking and re-adopt logical ids from a previous session.
    ///
    /// Each persisted fingerprint is matched against the fresh tree; where a
    /// match is found, the freshly minted id is replaced by the persisted one
    /// so consumers keep their handles across the reload boundary.
    pub fn start_with_session(
        &mut self,
        document: Rc<LiveDocument>,
        persisted: Vec<Fingerprint>,
    ) -> RastroResult<DomTree> {
        self.start(Rc::clone(&document))?;
        let now = self.clock.now_ms();
        let ctx = MatchContext::from_config(&self.config, document.viewport(), now);
        for fingerprint in persisted {
            let candidates = document.query_tag(&fingerprint.tag);
            let Some(result) = Matcher::find_best_match(&fingerprint, &candidates, &ctx) else {
                continue;
            };
            let Some(current_id) = self.reverse.get(&result.node.ptr_id()).cloned() else {
                continue;
            };
            if current_id != fingerprint.id && !self.registry.contains_key(&fingerprint.id) {
                self.adopt_identity(&current_id, &fingerprint.id);
            }
        }
        self.tree.clone().ok_or(RastroError::NotTracking)
    }

    /// Detach the change subscription and drop all tracking state
    pub fn stop(&mut self) {
        if let (Some(document), Some(token)) = (&self.document, self.observer.take()) {
            document.disconnect(token);
        }
        self.document = None;
        self.tree = None;
        self.registry.clear();
        self.reverse.clear();
        self.known.clear();
        self.pending.borrow_mut().clear();
        self.grace_deadlines.clear();
        self.processing = false;
        debug!("tracking stopped");
    }

    /// One cooperative scheduling step: deliver pending document mutations,
    /// process them as a single batch, then expire due grace periods.
    ///
    /// Never re-entrant: if a batch is already being processed, newly
    /// delivered notifications simply accumulate for the next cycle.
    pub fn pump(&mut self) -> RastroResult<()> {
        let document = self.document.clone().ok_or(RastroError::NotTracking)?;
        document.deliver_mutations();
        if self.processing {
            trace!("batch already in flight; accumulating");
            return Ok(());
        }
        self.processing = true;
        let records: Vec<MutationRecord> = self.pending.borrow_mut().drain(..).collect();
        let result = self.process_batch(&document, records);
        self.processing = false;
        if let Err(err) = result {
            warn!(error = %err, "batch processing fault");
            self.events.emit(&TrackerEvent::TreeError {
                error: err.to_string(),
            });
        }
        self.expire_grace_periods(&document);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Batch pipeline
    // ------------------------------------------------------------------

    fn process_batch(
        &mut self,
        document: &Rc<LiveDocument>,
        records: Vec<MutationRecord>,
    ) -> RastroResult<()> {
        let now = self.clock.now_ms();

        // partition into removed ids, added candidates, updated nodes;
        // subtree records expand to their descendants
        let mut removed_ids: Vec<String> = Vec::new();
        let mut removed_seen: HashSet<String> = HashSet::new();
        let mut added: Vec<LiveNode> = Vec::new();
        let mut added_seen: HashSet<usize> = HashSet::new();
        let mut updated: Vec<(String, LiveNode)> = Vec::new();
        let mut updated_seen: HashSet<usize> = HashSet::new();
        for record in &records {
            match record {
                MutationRecord::ChildRemoved { node, .. } => {
                    for descendant in node.descendants() {
                        if let Some(id) = self.reverse.get(&descendant.ptr_id()) {
                            if removed_seen.insert(id.clone()) {
                                removed_ids.push(id.clone());
                            }
                        }
                    }
                }
                MutationRecord::ChildAdded { node, .. } => {
                    for descendant in node.descendants() {
                        let ptr = descendant.ptr_id();
                        if !self.known.contains(&ptr) && added_seen.insert(ptr) {
                            added.push(descendant);
                        }
                    }
                }
                MutationRecord::Attribute { node, .. }
                | MutationRecord::CharacterData { node, .. } => {
                    if let Some(id) = self.reverse.get(&node.ptr_id()) {
                        if updated_seen.insert(node.ptr_id()) {
                            updated.push((id.clone(), node.clone()));
                        }
                    }
                }
            }
        }

        // a searching node whose own reference reattached is restored
        // without waiting for its grace period
        let reconnected: Vec<(String, LiveNode, f64)> = self
            .registry
            .iter()
            .filter(|(_, t)| t.status == NodeStatus::Searching)
            .filter_map(|(id, t)| {
                t.live
                    .upgrade()
                    .filter(|n| document.contains(n))
                    .map(|n| (id.clone(), n, t.fingerprint.last_confidence))
            })
            .collect();
        for (id, node, confidence) in reconnected {
            self.rematch_node(document, &id, &node, confidence, MatchStrategy::Exact);
        }

        // any tracked node whose reference no longer resolves counts as
        // removed; nodes already searching take part in every batch until
        // their grace period settles them
        for (id, tracked) in &self.registry {
            let detached = tracked.status == NodeStatus::Active
                && !resolves_connected(tracked, document);
            if (detached || tracked.status == NodeStatus::Searching)
                && removed_seen.insert(id.clone())
            {
                removed_ids.push(id.clone());
            }
        }
        // a remove-then-reattach of the same node within one batch is a no-op
        removed_ids.retain(|id| {
            self.registry
                .get(id)
                .map_or(false, |t| !resolves_connected(t, document))
        });
        // keep only additions still attached at processing time
        added.retain(|n| document.contains(n));

        if !removed_ids.is_empty() || !added.is_empty() {
            debug!(
                removed = removed_ids.len(),
                added = added.len(),
                "reconciling batch"
            );
        }

        let viewport = document.viewport();
        let snapshots: Vec<(LiveNode, Fingerprint)> = added
            .iter()
            .map(|n| (n.clone(), Fingerprint::capture(n, viewport, now)))
            .collect();

        let mut consumed_ids: HashSet<String> = HashSet::new();
        let mut consumed_ptrs: HashSet<usize> = HashSet::new();

        // tier 1: weighted fingerprint matching, highest confidence first
        let ctx = MatchContext::from_config(&self.config, viewport, now);
        let fingerprints: Vec<&Fingerprint> = removed_ids
            .iter()
            .filter_map(|id| self.registry.get(id).map(|t| &t.fingerprint))
            .collect();
        let mut fuzzy = Matcher::match_all(&fingerprints, &added, &ctx);
        fuzzy.sort_by(|a, b| {
            let ca = a.1.as_ref().map_or(-1.0, |m| m.confidence);
            let cb = b.1.as_ref().map_or(-1.0, |m| m.confidence);
            cb.partial_cmp(&ca).unwrap_or(std::cmp::Ordering::Equal)
        });
        let mut rematches: Vec<(String, LiveNode, f64, MatchStrategy)> = Vec::new();
        for (id, best) in fuzzy {
            let Some(best) = best else { continue };
            if consumed_ptrs.contains(&best.node.ptr_id()) {
                continue;
            }
            consumed_ptrs.insert(best.node.ptr_id());
            consumed_ids.insert(id.clone());
            rematches.push((id, best.node, best.confidence, best.strategy));
        }

        // tier 2: exact stable-identifier matching for the rest
        for id in &removed_ids {
            if consumed_ids.contains(id) {
                continue;
            }
            let Some(tracked) = self.registry.get(id) else { continue };
            if tracked.fingerprint.strongest_identifier().is_none() {
                continue;
            }
            let found = snapshots.iter().find(|(node, snapshot)| {
                !consumed_ptrs.contains(&node.ptr_id())
                    && Matcher::exact_identifier_match(&tracked.fingerprint, snapshot)
            });
            if let Some((node, _)) = found {
                consumed_ptrs.insert(node.ptr_id());
                consumed_ids.insert(id.clone());
                rematches.push((id.clone(), node.clone(), 1.0, MatchStrategy::Exact));
            }
        }

        // tier 3: pure structural matching, only for nodes with no stable
        // identifier at all
        for id in &removed_ids {
            if consumed_ids.contains(id) {
                continue;
            }
            let Some(tracked) = self.registry.get(id) else { continue };
            if tracked.fingerprint.strongest_identifier().is_some() {
                continue;
            }
            let found = snapshots.iter().find(|(node, snapshot)| {
                !consumed_ptrs.contains(&node.ptr_id())
                    && Matcher::structural_match(&tracked.fingerprint, snapshot)
            });
            if let Some((node, _)) = found {
                consumed_ptrs.insert(node.ptr_id());
                consumed_ids.insert(id.clone());
                rematches.push((
                    id.clone(),
                    node.clone(),
                    self.config.confidence_threshold,
                    MatchStrategy::PositionFallback,
                ));
            }
        }

        for (id, node, confidence, strategy) in rematches {
            self.rematch_node(document, &id, &node, confidence, strategy);
        }

        // unmatched removed ids enter their grace period
        for id in &removed_ids {
            if consumed_ids.contains(id) {
                continue;
            }
            self.enter_searching(id, now);
        }

        // leftover additions become new tree entries
        let new_roots: Vec<LiveNode> = added
            .iter()
            .filter(|n| {
                !consumed_ptrs.contains(&n.ptr_id())
                    && document.contains(n)
                    && !n
                        .parent()
                        .is_some_and(|p| added_seen.contains(&p.ptr_id()) && !consumed_ptrs.contains(&p.ptr_id()))
            })
            .cloned()
            .collect();
        for node in new_roots {
            self.insert_new_subtree(document, &node, now);
        }

        // granular diffs for updated-in-place nodes
        for (id, node) in updated {
            if consumed_ids.contains(&id) || !document.contains(&node) {
                continue;
            }
            self.apply_update(document, &id, &node);
        }

        self.refresh_modal_state(document);
        Ok(())
    }

    fn enter_searching(&mut self, id: &str, now: u64) {
        let Some(tracked) = self.registry.get_mut(id) else {
            return;
        };
        if tracked.status == NodeStatus::Searching {
            return;
        }
        tracked.status = NodeStatus::Searching;
        tracked.searching_since_ms = Some(now);
        self.grace_deadlines
            .insert(id.to_string(), now + self.config.grace_period_ms);
        trace!(node = id, "entered grace period");
    }

    /// Update an existing tracked node in place after a successful re-match.
    /// Identity is preserved: same logical id, refreshed reference and
    /// fingerprint, canceled grace period.
    fn rematch_node(
        &mut self,
        document: &Rc<LiveDocument>,
        id: &str,
        node: &LiveNode,
        confidence: f64,
        strategy: MatchStrategy,
    ) {
        let now = self.clock.now_ms();
        let viewport = document.viewport();
        let config = self.config.clone();
        let old_ptr = {
            let Some(tracked) = self.registry.get_mut(id) else {
                return;
            };
            let old_ptr = tracked.live.upgrade().map(|old| old.ptr_id());
            tracked.live = node.downgrade();
            tracked.status = NodeStatus::Active;
            tracked.searching_since_ms = None;
            tracked.fingerprint.refresh(node, viewport, confidence, now);
            old_ptr
        };
        // release the old reverse-index slot before rebinding
        if let Some(ptr) = old_ptr {
            self.reverse.remove(&ptr);
        }
        self.reverse.insert(node.ptr_id(), id.to_string());
        self.known.insert(node.ptr_id());
        self.grace_deadlines.remove(id);
        let changes = self.diff_tree_node(document, &config, id, node);
        trace!(node = id, confidence, ?strategy, "re-matched");
        self.events.emit(&TrackerEvent::NodeMatched {
            node_id: id.to_string(),
            confidence,
            changes,
        });
    }

    /// Diff observable fields of the tree node against the live node,
    /// applying updates in place and returning what changed
    fn diff_tree_node(
        &mut self,
        document: &Rc<LiveDocument>,
        config: &TrackerConfig,
        id: &str,
        node: &LiveNode,
    ) -> NodeChanges {
        let builder = TreeBuilder::new(config);
        let Some(tree) = self.tree.as_mut() else {
            return NodeChanges::default();
        };
        let Some(tree_node) = tree.root.find_mut(id) else {
            return NodeChanges::default();
        };
        let mut changes = NodeChanges::default();
        let label = builder.extract_label(document, node, tree_node.kind);
        if label != tree_node.label {
            tree_node.label = label.clone();
            changes.label = Some(label);
        }
        let visible = node.is_visible();
        if visible != tree_node.visible {
            tree_node.visible = visible;
            changes.visible = Some(visible);
        }
        if tree_node.kind == NodeKind::Interactive {
            let form = form_state(node);
            let old = tree_node.form.clone().unwrap_or_default();
            if form.value != old.value {
                changes.value = form.value.clone();
            }
            if form.checked != old.checked {
                changes.checked = form.checked;
            }
            if form.disabled != old.disabled {
                changes.disabled = Some(form.disabled);
            }
            tree_node.form = Some(form);
        }
        changes
    }

    fn apply_update(&mut self, document: &Rc<LiveDocument>, id: &str, node: &LiveNode) {
        let config = self.config.clone();
        let changes = self.diff_tree_node(document, &config, id, node);
        if changes.is_empty() {
            return;
        }
        let now = self.clock.now_ms();
        let viewport = document.viewport();
        if let Some(tracked) = self.registry.get_mut(id) {
            let confidence = tracked.fingerprint.last_confidence;
            tracked.fingerprint.refresh(node, viewport, confidence, now);
        }
        self.events.emit(&TrackerEvent::NodeUpdated {
            node_id: id.to_string(),
            changes,
        });
    }

    /// Insert a genuinely new subtree, guarding against duplicates: if an
    /// existing entry already carries the same stable identifier, that entry
    /// is updated instead of minting a duplicate.
    fn insert_new_subtree(&mut self, document: &Rc<LiveDocument>, node: &LiveNode, now: u64) {
        let viewport = document.viewport();
        let snapshot = Fingerprint::capture(node, viewport, now);
        if let Some(existing) = self.find_by_identifier(&snapshot) {
            trace!(node = %existing, "duplicate identifier; updating existing entry");
            self.rematch_node(document, &existing, node, 1.0, MatchStrategy::Exact);
            return;
        }
        if self.registry.len() >= self.config.max_tracked_nodes {
            warn!("tracked-node ceiling reached; ignoring addition");
            return;
        }
        let Some((parent_id, parent_depth)) = self.nearest_tracked_ancestor(node) else {
            return;
        };
        let config = self.config.clone();
        let builder = TreeBuilder::new(&config);
        let (nodes, entries) = builder.build_subtree(
            document,
            node,
            parent_depth + 1,
            &parent_id,
            now,
            self.registry.len(),
        );
        if nodes.is_empty() {
            // unbuildable (skipped tag), still mark seen
            for descendant in node.descendants() {
                self.known.insert(descendant.ptr_id());
            }
            return;
        }
        for entry in entries {
            // never rebind a live node an earlier entry already claims
            if self.reverse.contains_key(&entry.node.ptr_id()) {
                continue;
            }
            self.reverse.insert(entry.node.ptr_id(), entry.id.clone());
            self.registry.insert(
                entry.id.clone(),
                TrackedNode {
                    live: entry.node.downgrade(),
                    fingerprint: entry.fingerprint,
                    status: NodeStatus::Active,
                    searching_since_ms: None,
                    parent_id: entry.parent_id,
                },
            );
        }
        for descendant in node.descendants() {
            self.known.insert(descendant.ptr_id());
        }
        let mut emitted = Vec::new();
        if let Some(tree) = self.tree.as_mut() {
            if let Some(parent) = tree.root.find_mut(&parent_id) {
                for tree_node in nodes {
                    let index = parent.children.len();
                    parent.children.push(tree_node.clone());
                    emitted.push((tree_node, index));
                }
            }
            tree.node_count = self.registry.len();
        }
        for (tree_node, index) in emitted {
            self.events.emit(&TrackerEvent::NodeAdded {
                node: tree_node,
                parent_id: Some(parent_id.clone()),
                index,
            });
        }
    }

    fn find_by_identifier(&self, snapshot: &Fingerprint) -> Option<String> {
        snapshot.strongest_identifier()?;
        self.registry
            .iter()
            .find(|(_, tracked)| Matcher::exact_identifier_match(&tracked.fingerprint, snapshot))
            .map(|(id, _)| id.clone())
    }

    fn nearest_tracked_ancestor(&self, node: &LiveNode) -> Option<(String, usize)> {
        let mut current = node.parent();
        while let Some(ancestor) = current {
            if let Some(id) = self.reverse.get(&ancestor.ptr_id()) {
                let depth = self
                    .tree
                    .as_ref()
                    .and_then(|t| t.root.find(id))
                    .map_or(0, |n| n.depth);
                return Some((id.clone(), depth));
            }
            current = ancestor.parent();
        }
        None
    }

    // ------------------------------------------------------------------
    // Grace periods
    // ------------------------------------------------------------------

    fn expire_grace_periods(&mut self, document: &Rc<LiveDocument>) {
        let now = self.clock.now_ms();
        let due: Vec<String> = self
            .grace_deadlines
            .iter()
            .filter(|(_, deadline)| **deadline <= now)
            .map(|(id, _)| id.clone())
            .collect();
        for id in due {
            self.grace_deadlines.remove(&id);
            self.finalize_or_restore(document, &id);
        }
    }

    /// Last-chance search when a grace period expires: restore the node if
    /// its reference reappeared or an unclaimed equivalent exists; otherwise
    /// finalize it as lost and purge.
    fn finalize_or_restore(&mut self, document: &Rc<LiveDocument>, id: &str) {
        let Some(tracked) = self.registry.get(id) else {
            return;
        };
        if resolves_connected(tracked, document) {
            let node = match tracked.live.upgrade() {
                Some(node) => node,
                None => return,
            };
            let confidence = tracked.fingerprint.last_confidence;
            self.rematch_node(document, id, &node, confidence, MatchStrategy::Exact);
            return;
        }
        let now = self.clock.now_ms();
        let ctx = MatchContext::from_config(&self.config, document.viewport(), now);
        let fingerprint = tracked.fingerprint.clone();
        // candidates already claimed by a different id are off limits
        let candidates: Vec<LiveNode> = document
            .query_tag(&fingerprint.tag)
            .into_iter()
            .filter(|n| {
                self.reverse
                    .get(&n.ptr_id())
                    .map_or(true, |owner| owner == id)
            })
            .collect();
        if let Some(found) = Matcher::find_best_match(&fingerprint, &candidates, &ctx) {
            self.rematch_node(document, id, &found.node, found.confidence, found.strategy);
            return;
        }
        let structural = candidates.iter().find(|n| {
            let snapshot = Fingerprint::capture(n, document.viewport(), now);
            Matcher::structural_match(&fingerprint, &snapshot)
        });
        if let Some(node) = structural.cloned() {
            self.rematch_node(
                document,
                id,
                &node,
                self.config.confidence_threshold,
                MatchStrategy::PositionFallback,
            );
            return;
        }
        self.purge_node(id);
    }

    /// Finalize a node as lost: remove it (and its logical subtree) from the
    /// tree, registry and indexes. Lost is terminal; there is no retry.
    fn purge_node(&mut self, id: &str) {
        let mut purged_ids = vec![id.to_string()];
        let mut was_modal = false;
        if let Some(tree) = self.tree.as_mut() {
            if let Some(subtree) = tree.root.remove_subtree(id) {
                purged_ids = subtree.subtree_ids();
            }
            if tree.active_modal_id.as_deref() == Some(id) {
                tree.active_modal_id = None;
                was_modal = true;
            }
        }
        for purged in &purged_ids {
            if let Some(tracked) = self.registry.remove(purged) {
                if let Some(node) = tracked.live.upgrade() {
                    self.reverse.remove(&node.ptr_id());
                }
            }
            self.grace_deadlines.remove(purged);
        }
        if let Some(tree) = self.tree.as_mut() {
            tree.node_count = self.registry.len();
        }
        for purged in purged_ids {
            debug!(node = %purged, "node lost");
            self.events.emit(&TrackerEvent::NodeRemoved { node_id: purged });
        }
        if was_modal {
            self.events.emit(&TrackerEvent::ModalClosed {
                modal_id: id.to_string(),
            });
        }
    }

    fn refresh_modal_state(&mut self, document: &Rc<LiveDocument>) {
        let config = self.config.clone();
        let builder = TreeBuilder::new(&config);
        let previous = self.tree.as_ref().and_then(|t| t.active_modal_id.clone());
        // last candidate in tree order wins
        let current = self.tree.as_ref().and_then(|tree| {
            tree.root
                .flatten()
                .iter()
                .skip(1)
                .filter_map(|n| {
                    let tracked = self.registry.get(&n.id)?;
                    let live = tracked.live.upgrade()?;
                    if document.contains(&live) && builder.is_modal_candidate(document, &live) {
                        Some(n.id.clone())
                    } else {
                        None
                    }
                })
                .next_back()
        });
        if previous == current {
            return;
        }
        if let Some(tree) = self.tree.as_mut() {
            if let Some(old) = &previous {
                if let Some(node) = tree.root.find_mut(old) {
                    node.is_modal = false;
                }
            }
            if let Some(new) = &current {
                if let Some(node) = tree.root.find_mut(new) {
                    node.is_modal = true;
                }
            }
            tree.active_modal_id = current.clone();
        }
        if let Some(old) = previous {
            self.events
                .emit(&TrackerEvent::ModalClosed { modal_id: old });
        }
        if let Some(new) = current {
            self.events
                .emit(&TrackerEvent::ModalOpened { modal_id: new });
        }
    }

    // ------------------------------------------------------------------
    // Query API
    // ------------------------------------------------------------------

    /// Snapshot of the current tree
    #[must_use]
    pub fn get_tree(&self) -> Option<DomTree> {
        self.tree.clone()
    }

    /// Snapshot of one tree node
    #[must_use]
    pub fn get_node(&self, id: &str) -> Option<TreeNode> {
        self.tree.as_ref()?.root.find(id).cloned()
    }

    /// Snapshots of every tree node in document order
    #[must_use]
    pub fn get_all_nodes(&self) -> Vec<TreeNode> {
        self.tree
            .as_ref()
            .map(|t| t.root.flatten().into_iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Lifecycle state of a tracked node
    #[must_use]
    pub fn node_status(&self, id: &str) -> Option<NodeStatus> {
        self.registry.get(id).map(|t| t.status)
    }

    /// Number of tracked logical nodes
    #[must_use]
    pub fn tracked_count(&self) -> usize {
        self.registry.len()
    }

    /// Snapshot of every tracked fingerprint, for session persistence
    #[must_use]
    pub fn export_fingerprints(&self) -> Vec<Fingerprint> {
        self.registry
            .values()
            .map(|t| t.fingerprint.clone())
            .collect()
    }

    /// Resolve the current live node for an id.
    ///
    /// If the stored reference is stale, attempts one-shot re-identification
    /// by scanning same-tag candidates through the matcher before giving up.
    pub fn get_element(&mut self, id: &str) -> Option<LiveNode> {
        let document = self.document.clone()?;
        {
            let tracked = self.registry.get(id)?;
            if resolves_connected(tracked, &document) {
                return tracked.live.upgrade();
            }
        }
        let now = self.clock.now_ms();
        let ctx = MatchContext::from_config(&self.config, document.viewport(), now);
        let fingerprint = self.registry.get(id)?.fingerprint.clone();
        let candidates: Vec<LiveNode> = document
            .query_tag(&fingerprint.tag)
            .into_iter()
            .filter(|n| {
                self.reverse
                    .get(&n.ptr_id())
                    .map_or(true, |owner| owner == id)
            })
            .collect();
        let found = Matcher::find_best_match(&fingerprint, &candidates, &ctx)?;
        self.rematch_node(&document, id, &found.node, found.confidence, found.strategy);
        Some(found.node)
    }

    /// Reverse lookup: logical id of a live node. The reverse index is
    /// rebuilt from the registry when it cannot resolve an entry.
    pub fn get_element_id(&mut self, node: &LiveNode) -> Option<String> {
        if let Some(id) = self.reverse.get(&node.ptr_id()) {
            return Some(id.clone());
        }
        self.rebuild_reverse_index();
        self.reverse.get(&node.ptr_id()).cloned()
    }

    fn rebuild_reverse_index(&mut self) {
        self.reverse.clear();
        for (id, tracked) in &self.registry {
            if let Some(node) = tracked.live.upgrade() {
                self.reverse.insert(node.ptr_id(), id.clone());
            }
        }
    }

    // ------------------------------------------------------------------
    // Action API
    // ------------------------------------------------------------------

    /// Click an element. Scrolls it into view first, then dispatches the
    /// click the host expects.
    pub fn click_element(&mut self, id: &str) -> ActionOutcome {
        let Some(document) = self.document.clone() else {
            return RastroError::NotTracking.into();
        };
        let Some(node) = self.get_element(id) else {
            return RastroError::NodeNotFound { id: id.to_string() }.into();
        };
        if node.disabled() {
            return RastroError::ActionFailed {
                message: "element is disabled".to_string(),
            }
            .into();
        }
        document.mark_scrolled_to(&node);
        document.dispatch(&node, "click");
        ActionOutcome::ok()
    }

    /// Set the value of a text input or textarea, dispatching the input and
    /// change notifications a framework expects, and syncing tracked form
    /// state immediately.
    pub fn set_input_value(&mut self, id: &str, value: &str) -> ActionOutcome {
        let Some(document) = self.document.clone() else {
            return RastroError::NotTracking.into();
        };
        let Some(node) = self.get_element(id) else {
            return RastroError::NodeNotFound { id: id.to_string() }.into();
        };
        let tag = node.tag();
        let is_text_input = match tag.as_str() {
            "textarea" => true,
            "input" => !matches!(
                node.attr("type").as_deref(),
                Some("checkbox" | "radio" | "button" | "submit" | "reset")
            ),
            _ => matches!(node.role().as_deref(), Some("textbox" | "searchbox")),
        };
        if !is_text_input {
            return RastroError::WrongKind {
                id: id.to_string(),
                expected: "text input",
            }
            .into();
        }
        document.set_value(&node, value);
        document.dispatch(&node, "input");
        document.dispatch(&node, "change");
        self.sync_form_state(&node, id);
        ActionOutcome::ok()
    }

    /// Toggle a checkbox, radio or switch. `checked: None` flips the state.
    pub fn toggle_checkbox(&mut self, id: &str, checked: Option<bool>) -> ActionOutcome {
        let Some(document) = self.document.clone() else {
            return RastroError::NotTracking.into();
        };
        let Some(node) = self.get_element(id) else {
            return RastroError::NodeNotFound { id: id.to_string() }.into();
        };
        let is_toggle = matches!(
            node.attr("type").as_deref(),
            Some("checkbox" | "radio")
        ) || matches!(
            node.role().as_deref(),
            Some("checkbox" | "switch" | "radio")
        );
        if !is_toggle {
            return RastroError::WrongKind {
                id: id.to_string(),
                expected: "checkbox",
            }
            .into();
        }
        let new_state = checked.unwrap_or(!node.checked().unwrap_or(false));
        document.set_checked(&node, new_state);
        document.dispatch(&node, "change");
        self.sync_form_state(&node, id);
        ActionOutcome::ok()
    }

    /// Select an option by value. Fails if the select has no such option.
    pub fn set_select_value(&mut self, id: &str, value: &str) -> ActionOutcome {
        let Some(document) = self.document.clone() else {
            return RastroError::NotTracking.into();
        };
        let Some(node) = self.get_element(id) else {
            return RastroError::NodeNotFound { id: id.to_string() }.into();
        };
        if node.tag() != "select" && node.role().as_deref() != Some("listbox") {
            return RastroError::WrongKind {
                id: id.to_string(),
                expected: "select",
            }
            .into();
        }
        if !node.options().iter().any(|o| o.value == value) {
            return RastroError::ActionFailed {
                message: format!("no option with value {value:?}"),
            }
            .into();
        }
        document.set_value(&node, value);
        document.dispatch(&node, "change");
        self.sync_form_state(&node, id);
        ActionOutcome::ok()
    }

    /// Scroll an element into view
    pub fn scroll_to_element(&mut self, id: &str) -> ActionOutcome {
        let Some(document) = self.document.clone() else {
            return RastroError::NotTracking.into();
        };
        let Some(node) = self.get_element(id) else {
            return RastroError::NodeNotFound { id: id.to_string() }.into();
        };
        document.mark_scrolled_to(&node);
        ActionOutcome::ok()
    }

    /// Sync tracked form state after a programmatic write so reads are
    /// consistent without waiting for the next change batch
    fn sync_form_state(&mut self, node: &LiveNode, id: &str) {
        if let Some(tree) = self.tree.as_mut() {
            if let Some(tree_node) = tree.root.find_mut(id) {
                tree_node.form = Some(form_state(node));
            }
        }
        if let Some(tracked) = self.registry.get_mut(id) {
            tracked.fingerprint.value = node.value();
        }
    }

    // ------------------------------------------------------------------
    // Events and configuration
    // ------------------------------------------------------------------

    /// Subscribe to one event kind
    pub fn on(
        &mut self,
        kind: TrackerEventKind,
        handler: impl FnMut(&TrackerEvent) + 'static,
    ) -> HandlerToken {
        self.events.on(kind, handler)
    }

    /// Subscribe to every event
    pub fn on_any(&mut self, handler: impl FnMut(&TrackerEvent) + 'static) -> HandlerToken {
        self.events.on_any(handler)
    }

    /// Remove a subscription
    pub fn off(&mut self, token: HandlerToken) {
        self.events.off(token);
    }

    /// Apply a partial configuration update
    pub fn set_config(&mut self, patch: ConfigPatch) {
        self.config.apply(patch);
    }

    /// Current configuration
    #[must_use]
    pub fn get_config(&self) -> TrackerConfig {
        self.config.clone()
    }

    fn adopt_identity(&mut self, old_id: &str, new_id: &str) {
        let Some(mut tracked) = self.registry.remove(old_id) else {
            return;
        };
        tracked.fingerprint.id = new_id.to_string();
        if let Some(node) = tracked.live.upgrade() {
            self.reverse.insert(node.ptr_id(), new_id.to_string());
        }
        self.registry.insert(new_id.to_string(), tracked);
        if let Some(deadline) = self.grace_deadlines.remove(old_id) {
            self.grace_deadlines.insert(new_id.to_string(), deadline);
        }
        for entry in self.registry.values_mut() {
            if entry.parent_id.as_deref() == Some(old_id) {
                entry.parent_id = Some(new_id.to_string());
            }
        }
        if let Some(tree) = self.tree.as_mut() {
            if let Some(node) = tree.root.find_mut(old_id) {
                node.id = new_id.to_string();
            }
            if tree.active_modal_id.as_deref() == Some(old_id) {
                tree.active_modal_id = Some(new_id.to_string());
            }
        }
    }
}

fn resolves_connected(tracked: &TrackedNode, document: &Rc<LiveDocument>) -> bool {
    tracked
        .live
        .upgrade()
        .is_some_and(|node| document.contains(&node))
}
