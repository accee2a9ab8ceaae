//! Contexts: units of serialized access to a slice of the object graph.
//!
//! A context is permanently bound to one serial queue. Its pending mutations
//! and committed in-memory view are only touched by jobs running on that
//! queue; the public mutators route through the queue (inline when the caller
//! is already on it), and the crate-internal hop operations assert they are
//! called from it.

use crate::exec::SerialQueue;
use crate::types::{
    Attributes, ChangeSet, ContextId, ContextSnapshot, Identifier, ManagedObject, ObjectRecord,
    QueueId,
};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::debug;

/// Uncommitted mutations accumulated by a context between saves.
#[derive(Debug, Default)]
pub(crate) struct PendingChanges {
    pub inserted: HashMap<Identifier, ObjectRecord>,
    pub updated: HashMap<Identifier, ObjectRecord>,
    pub deleted: HashSet<Identifier>,
}

impl PendingChanges {
    pub fn is_empty(&self) -> bool {
        self.inserted.is_empty() && self.updated.is_empty() && self.deleted.is_empty()
    }

    /// Fold a committed child batch into this set. A child's insert is an
    /// insert here too (the parent has never seen the object); updates of
    /// objects this context itself has pending-inserted collapse into the
    /// insert; deletes cancel pending upserts.
    pub fn absorb(&mut self, batch: &ChangeSet) {
        for record in &batch.inserted {
            self.deleted.remove(&record.id);
            self.inserted.insert(record.id, record.clone());
        }
        for record in &batch.updated {
            if let Some(existing) = self.inserted.get_mut(&record.id) {
                *existing = record.clone();
            } else {
                self.updated.insert(record.id, record.clone());
            }
        }
        for id in &batch.deleted {
            if self.inserted.remove(id).is_none() {
                self.updated.remove(id);
                self.deleted.insert(*id);
            }
        }
    }

    /// Drain into a batch ordered by identifier, so repeated saves of equal
    /// state produce equal batches.
    pub fn drain(&mut self) -> ChangeSet {
        let mut inserted: Vec<ObjectRecord> = self.inserted.drain().map(|(_, r)| r).collect();
        inserted.sort_by_key(|r| r.id);
        let mut updated: Vec<ObjectRecord> = self.updated.drain().map(|(_, r)| r).collect();
        updated.sort_by_key(|r| r.id);
        let mut deleted: Vec<Identifier> = self.deleted.drain().collect();
        deleted.sort();
        ChangeSet {
            inserted,
            updated,
            deleted,
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct ContextState {
    pub pending: PendingChanges,
    /// Committed in-memory view of the graph as this context knows it.
    pub rows: HashMap<Identifier, ObjectRecord>,
}

/// How one identifier looks from a context's point of view.
#[derive(Debug, Clone)]
pub(crate) enum Visibility {
    PendingUpsert(ObjectRecord),
    Committed(ObjectRecord),
    Tombstoned,
    Unknown,
}

/// A unit of serialized access to the object graph, affine to one queue and
/// chained to at most one parent. The root context (no parent) owns the
/// durable-store hop.
pub struct Context {
    id: ContextId,
    label: String,
    queue: SerialQueue,
    parent: Option<Arc<Context>>,
    /// Back-reference so `&self` methods can hop onto the affine queue.
    self_ref: Weak<Context>,
    obtain_permanent_ids: AtomicBool,
    temp_seq: AtomicU64,
    merges_applied: AtomicU64,
    state: Mutex<ContextState>,
}

impl Context {
    fn build(
        label: String,
        queue: SerialQueue,
        parent: Option<Arc<Context>>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|self_ref| Self {
            id: ContextId::next(),
            label,
            queue,
            parent,
            self_ref: self_ref.clone(),
            obtain_permanent_ids: AtomicBool::new(false),
            temp_seq: AtomicU64::new(0),
            merges_applied: AtomicU64::new(0),
            state: Mutex::new(ContextState::default()),
        })
    }

    pub(crate) fn root(label: impl Into<String>, queue: SerialQueue) -> Arc<Self> {
        Self::build(label.into(), queue, None)
    }

    pub(crate) fn child(
        label: impl Into<String>,
        queue: SerialQueue,
        parent: Arc<Context>,
    ) -> Arc<Self> {
        Self::build(label.into(), queue, Some(parent))
    }

    pub fn id(&self) -> ContextId {
        self.id
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn queue(&self) -> &SerialQueue {
        &self.queue
    }

    pub fn parent(&self) -> Option<&Arc<Context>> {
        self.parent.as_ref()
    }

    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    /// Whether saves finalize temporary identifiers before propagating.
    pub fn obtains_permanent_ids(&self) -> bool {
        self.obtain_permanent_ids.load(Ordering::SeqCst)
    }

    pub fn set_obtain_permanent_ids(&self, value: bool) {
        self.obtain_permanent_ids.store(value, Ordering::SeqCst);
    }

    /// Number of bridge merges applied to this context so far.
    pub fn merge_count(&self) -> u64 {
        self.merges_applied.load(Ordering::SeqCst)
    }

    /// True when `queue` drives this context or any of its ancestors. A
    /// synchronous save blocks on every queue in the chain, so a call from
    /// any of them would deadlock.
    pub(crate) fn chain_contains_queue(&self, queue: QueueId) -> bool {
        let mut cursor = Some(self);
        while let Some(ctx) = cursor {
            if ctx.queue.id() == queue {
                return true;
            }
            cursor = ctx.parent.as_deref();
        }
        false
    }

    // ---- caller-facing mutation and read API (routes through the queue) ----

    /// Run `f` against this context on its affine queue: inline when the
    /// caller is already there, blocking dispatch otherwise.
    fn on_queue<T, F>(&self, f: F) -> T
    where
        T: Send + 'static,
        F: FnOnce(&Context) -> T + Send + 'static,
    {
        if self.queue.is_current() {
            return f(self);
        }
        let me = self
            .self_ref
            .upgrade()
            .expect("context alive while borrowed");
        self.queue.run_sync(move || f(&me))
    }

    /// Register a new object and return its temporary identifier. The
    /// identifier stays temporary until a save finalizes it.
    pub fn insert(&self, entity: impl Into<String>, attributes: Attributes) -> Identifier {
        let entity = entity.into();
        self.on_queue(move |ctx| {
            let id = Identifier::Temporary {
                context: ctx.id,
                seq: ctx.temp_seq.fetch_add(1, Ordering::Relaxed) + 1,
            };
            let record = ObjectRecord::new(id, entity, attributes);
            ctx.state.lock().pending.inserted.insert(id, record);
            debug!(context = %ctx.id, object = %id, "registered pending insert");
            id
        })
    }

    /// Stage new state for an existing object. An update of an object this
    /// context has pending-inserted collapses into the insert.
    pub fn update(&self, record: ObjectRecord) {
        self.on_queue(move |ctx| {
            let mut state = ctx.state.lock();
            let id = record.id;
            if let Some(existing) = state.pending.inserted.get_mut(&id) {
                *existing = record;
            } else {
                state.pending.deleted.remove(&id);
                state.pending.updated.insert(id, record);
            }
            debug!(context = %ctx.id, object = %id, "registered pending update");
        });
    }

    /// Stage a deletion. Deleting a pending insert simply drops it.
    pub fn delete(&self, id: Identifier) {
        self.on_queue(move |ctx| {
            let mut state = ctx.state.lock();
            if state.pending.inserted.remove(&id).is_none() {
                state.pending.updated.remove(&id);
                state.pending.deleted.insert(id);
            }
            debug!(context = %ctx.id, object = %id, "registered pending delete");
        });
    }

    /// The object as this context currently sees it: pending state first
    /// (dirty), then the committed view. Tombstoned and unknown identifiers
    /// return None.
    pub fn object(&self, id: Identifier) -> Option<ManagedObject> {
        self.on_queue(move |ctx| match ctx.visibility(id) {
            Visibility::PendingUpsert(record) => Some(ManagedObject {
                record,
                context: ctx.id,
                dirty: true,
            }),
            Visibility::Committed(record) => Some(ManagedObject {
                record,
                context: ctx.id,
                dirty: false,
            }),
            Visibility::Tombstoned | Visibility::Unknown => None,
        })
    }

    pub fn has_pending_changes(&self) -> bool {
        self.on_queue(|ctx| !ctx.state.lock().pending.is_empty())
    }

    // ---- crate-internal operations (must already be on the affine queue) ----

    fn assert_affine(&self) {
        debug_assert!(
            self.queue.is_current(),
            "context state touched off its affine queue"
        );
    }

    pub(crate) fn visibility(&self, id: Identifier) -> Visibility {
        self.assert_affine();
        let state = self.state.lock();
        if let Some(record) = state.pending.inserted.get(&id).or_else(|| state.pending.updated.get(&id)) {
            return Visibility::PendingUpsert(record.clone());
        }
        if state.pending.deleted.contains(&id) {
            return Visibility::Tombstoned;
        }
        match state.rows.get(&id) {
            Some(record) => Visibility::Committed(record.clone()),
            None => Visibility::Unknown,
        }
    }

    /// Point-in-time copy of the visible state, for query execution.
    pub(crate) fn snapshot(&self) -> ContextSnapshot {
        self.assert_affine();
        let state = self.state.lock();
        let mut rows = state.rows.clone();
        for (id, record) in state.pending.updated.iter().chain(state.pending.inserted.iter()) {
            rows.insert(*id, record.clone());
        }
        for id in &state.pending.deleted {
            rows.remove(id);
        }
        ContextSnapshot {
            rows,
            deleted: state.pending.deleted.clone(),
        }
    }

    /// Cache a record translated onto this context into the committed view.
    pub(crate) fn adopt(&self, record: ObjectRecord) {
        self.assert_affine();
        self.state.lock().rows.insert(record.id, record);
    }

    /// Fold a child hop's committed batch into this context's pending set.
    pub(crate) fn absorb_batch(&self, batch: &ChangeSet) {
        self.assert_affine();
        self.state.lock().pending.absorb(batch);
    }

    /// Temporary identifiers among pending inserts, in drain order.
    pub(crate) fn pending_temporary_inserts(&self) -> Vec<Identifier> {
        self.assert_affine();
        let state = self.state.lock();
        let mut ids: Vec<Identifier> = state
            .pending
            .inserted
            .keys()
            .filter(|id| id.is_temporary())
            .copied()
            .collect();
        ids.sort();
        ids
    }

    /// Rewrite pending inserts under their finalized permanent identifiers.
    pub(crate) fn rewrite_inserted_ids(&self, mapping: &HashMap<Identifier, Identifier>) {
        self.assert_affine();
        let mut state = self.state.lock();
        for (from, to) in mapping {
            if let Some(mut record) = state.pending.inserted.remove(from) {
                record.id = *to;
                state.pending.inserted.insert(*to, record);
            }
        }
    }

    /// Drain pending mutations into a deterministic batch.
    pub(crate) fn drain_pending(&self) -> ChangeSet {
        self.assert_affine();
        self.state.lock().pending.drain()
    }

    /// Apply a drained batch to the committed in-memory view.
    pub(crate) fn apply_to_rows(&self, batch: &ChangeSet) {
        self.assert_affine();
        let mut state = self.state.lock();
        for record in batch.inserted.iter().chain(batch.updated.iter()) {
            state.rows.insert(record.id, record.clone());
        }
        for id in &batch.deleted {
            state.rows.remove(id);
        }
    }

    /// Apply a bridge merge: refreshed records overwrite the committed view,
    /// deletions evict rows and cancel stale pending edits of the same
    /// objects. Pending inserts are untouched (their identifiers are local).
    pub(crate) fn apply_merge(&self, refreshed: Vec<ObjectRecord>, deleted: &[Identifier]) {
        self.assert_affine();
        {
            let mut state = self.state.lock();
            for record in refreshed {
                state.rows.insert(record.id, record);
            }
            for id in deleted {
                state.rows.remove(id);
                state.pending.updated.remove(id);
                state.pending.deleted.remove(id);
            }
        }
        self.merges_applied.fetch_add(1, Ordering::SeqCst);
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("id", &self.id)
            .field("label", &self.label)
            .field("queue", &self.queue.id())
            .field("root", &self.is_root())
            .finish()
    }
}
