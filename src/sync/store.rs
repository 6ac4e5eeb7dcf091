//! Client-held collections kept in sync with the dashboard server.
//!
//! One cache entry per collection key (a dashboard id for widgets, a fixed
//! key for the dashboard tabs). Each entry is guarded by its own lock; the
//! optimistic part of a mutation runs synchronously under that lock when the
//! mutation method is called, and the returned future carries the network
//! request plus reconciliation or rollback.
//!
//! An entry keeps the last collection the server acknowledged (`base`) and
//! the log of writes still in flight. What views see is `base` with every
//! pending write replayed over it in call order. A write that succeeds is
//! folded into `base`; one that fails is dropped from the log and the view is
//! rebuilt, so it never takes other writes' effects with it.
//!
//! Mutation lifecycle: `Idle -> Mutating -> {Reconciled | RolledBack}`. A
//! successful revalidation brings the entry back to `Idle`.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::watch;

use crate::error::{DashError, ErrorPayload};
use crate::sync::delta::{self, diff, entry_id, with_id, PatchEntry};
use crate::types::{is_placeholder, placeholder_id, SyncRecord};

/// Server side of a synced collection.
#[async_trait]
pub trait RemoteCollection<R: SyncRecord>: Send + Sync {
    async fn fetch(&self, key: &str) -> Result<Vec<R>, DashError>;
    /// Create `record`, returning the server-assigned id.
    async fn create(&self, key: &str, record: &R) -> Result<String, DashError>;
    async fn update(&self, key: &str, record: &R) -> Result<(), DashError>;
    async fn delete(&self, key: &str, id: &str) -> Result<(), DashError>;
    async fn patch(&self, key: &str, changes: &[PatchEntry]) -> Result<(), DashError>;
    /// Overwrite the whole collection.
    async fn replace(&self, key: &str, records: &[R]) -> Result<(), DashError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum MutationState {
    Idle,
    Mutating,
    Reconciled,
    RolledBack,
}

/// What a view sees when it reads a collection.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuerySnapshot<R> {
    pub data: Option<Vec<R>>,
    pub is_loading: bool,
    pub is_error: bool,
    pub error: Option<ErrorPayload>,
    pub mutation: MutationState,
}

/// Optimistic effect of one write. Replayed every time the view is rebuilt,
/// so it must not assume the collection looks the way it did at call time.
type Replay<R> = Arc<dyn Fn(&mut Vec<R>, &Aliases) + Send + Sync>;

struct PendingWrite<R> {
    seq: u64,
    replay: Replay<R>,
}

/// Id bookkeeping for records created while other writes are pending.
#[derive(Default)]
struct Aliases {
    /// Placeholder id to server id, for adds that have been confirmed.
    renamed: HashMap<String, String>,
    /// Orders that settled patches gave to placeholders still waiting on their add.
    deferred_orders: HashMap<String, u32>,
}

impl Aliases {
    fn resolve<'a>(&'a self, id: &'a str) -> &'a str {
        self.renamed.get(id).map(String::as_str).unwrap_or(id)
    }

    /// Id the server knows `id` by; `None` while its add is still pending.
    fn confirmed<'a>(&'a self, id: &'a str) -> Option<&'a str> {
        if !is_placeholder(id) {
            return Some(id);
        }
        self.renamed.get(id).map(String::as_str)
    }

    fn resolve_changes(&self, changes: &[PatchEntry]) -> Vec<PatchEntry> {
        changes
            .iter()
            .map(|change| match entry_id(change).and_then(|id| self.renamed.get(id)) {
                Some(server_id) => with_id(change, server_id),
                None => change.clone(),
            })
            .collect()
    }

    /// `changes` as the server can take them: confirmed placeholders under
    /// their server id, unconfirmed ones left out.
    fn confirmed_changes(&self, changes: &[PatchEntry]) -> Vec<PatchEntry> {
        changes
            .iter()
            .filter_map(|change| {
                let id = entry_id(change)?;
                let server_id = self.confirmed(id)?;
                Some(if server_id == id {
                    change.clone()
                } else {
                    with_id(change, server_id)
                })
            })
            .collect()
    }

    fn confirmed_records<R: SyncRecord>(&self, records: &[R]) -> Vec<R> {
        records
            .iter()
            .filter_map(|record| {
                let id = self.confirmed(record.id())?.to_string();
                let mut record = record.clone();
                record.set_id(id);
                Some(record)
            })
            .collect()
    }

    fn defer_orders<R: SyncRecord>(&mut self, records: &[R]) {
        for record in records {
            if is_placeholder(record.id()) && !self.renamed.contains_key(record.id()) {
                self.deferred_orders.insert(record.id().to_string(), record.order());
            }
        }
    }
}

struct EntryState<R> {
    /// Last collection the server acknowledged.
    base: Option<Vec<R>>,
    /// `base` with `pending` replayed over it.
    data: Option<Vec<R>>,
    pending: Vec<PendingWrite<R>>,
    aliases: Aliases,
    next_seq: u64,
    is_loading: bool,
    error: Option<ErrorPayload>,
    /// Bumped on every write to `data`.
    version: u64,
    /// Bumped when a mutation starts; a revalidation that began under an
    /// older epoch is discarded.
    revalidation_epoch: u64,
    last_outcome: MutationState,
}

impl<R: SyncRecord> EntryState<R> {
    fn rebuild(&mut self) {
        if self.pending.is_empty() {
            self.aliases = Aliases::default();
            self.data = self.base.clone();
            return;
        }
        let mut data = self.base.clone().unwrap_or_default();
        for write in &self.pending {
            (write.replay)(&mut data, &self.aliases);
        }
        self.data = Some(data);
    }
}

struct CacheEntry<R> {
    state: Mutex<EntryState<R>>,
    changes: watch::Sender<u64>,
}

impl<R: SyncRecord> CacheEntry<R> {
    fn new() -> Self {
        let (changes, _) = watch::channel(0);
        Self {
            state: Mutex::new(EntryState {
                base: None,
                data: None,
                pending: Vec::new(),
                aliases: Aliases::default(),
                next_seq: 0,
                is_loading: false,
                error: None,
                version: 0,
                revalidation_epoch: 0,
                last_outcome: MutationState::Idle,
            }),
            changes,
        }
    }

    fn snapshot(&self) -> QuerySnapshot<R> {
        let state = self.state.lock();
        QuerySnapshot {
            data: state.data.clone(),
            is_loading: state.is_loading,
            is_error: state.error.is_some(),
            error: state.error.clone(),
            mutation: if state.pending.is_empty() {
                state.last_outcome
            } else {
                MutationState::Mutating
            },
        }
    }

    fn publish(&self, version: u64) {
        self.changes.send_replace(version);
    }

    fn with_aliases<T>(&self, f: impl FnOnce(&Aliases) -> T) -> T {
        f(&self.state.lock().aliases)
    }

    /// Log a write and show its optimistic effect. `prepare` sees the current
    /// view; nothing is written if it fails.
    fn begin<T>(
        &self,
        prepare: impl FnOnce(&[R]) -> Result<(T, Replay<R>), DashError>,
    ) -> Result<(u64, T), DashError> {
        let (seq, out, version) = {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            let (out, replay) = prepare(state.data.as_deref().unwrap_or(&[]))?;

            state.revalidation_epoch += 1;
            state.next_seq += 1;
            let seq = state.next_seq;
            state.pending.push(PendingWrite { seq, replay });
            state.rebuild();
            state.version += 1;
            state.last_outcome = MutationState::Mutating;
            (seq, out, state.version)
        };
        self.publish(version);
        Ok((seq, out))
    }

    /// Fold write `seq` into the acknowledged base through `confirm`.
    fn settle<T>(&self, seq: u64, confirm: impl FnOnce(&mut Vec<R>, &mut Aliases) -> T) -> T {
        let (out, version) = {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            state.pending.retain(|write| write.seq != seq);
            let mut base = state.base.take().unwrap_or_default();
            let out = confirm(&mut base, &mut state.aliases);
            state.base = Some(base);
            state.rebuild();
            state.version += 1;
            state.error = None;
            state.last_outcome = MutationState::Reconciled;
            (out, state.version)
        };
        self.publish(version);
        out
    }

    /// Drop write `seq` from the log and rebuild the view without it.
    fn fail(&self, seq: u64, err: &DashError, forget: impl FnOnce(&mut Aliases)) {
        let version = {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            state.pending.retain(|write| write.seq != seq);
            forget(&mut state.aliases);
            state.rebuild();
            state.version += 1;
            state.error = Some(ErrorPayload::from(err));
            state.last_outcome = MutationState::RolledBack;
            state.version
        };
        self.publish(version);
    }
}

/// Optimistic store for one kind of synced record.
pub struct CollectionSyncStore<R: SyncRecord> {
    remote: Arc<dyn RemoteCollection<R>>,
    entries: DashMap<String, Arc<CacheEntry<R>>>,
}

impl<R: SyncRecord> CollectionSyncStore<R> {
    pub fn new(remote: Arc<dyn RemoteCollection<R>>) -> Self {
        Self {
            remote,
            entries: DashMap::new(),
        }
    }

    fn entry(&self, key: &str) -> Arc<CacheEntry<R>> {
        if let Some(entry) = self.entries.get(key) {
            return entry.value().clone();
        }
        self.entries
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(CacheEntry::new()))
            .value()
            .clone()
    }

    /// Current snapshot of `key`. Unknown keys read as empty and idle.
    pub fn query(&self, key: &str) -> QuerySnapshot<R> {
        match self.entries.get(key) {
            Some(entry) => entry.value().snapshot(),
            None => QuerySnapshot {
                data: None,
                is_loading: false,
                is_error: false,
                error: None,
                mutation: MutationState::Idle,
            },
        }
    }

    /// Change feed for `key`: the value is the entry version after each write.
    pub fn subscribe(&self, key: &str) -> watch::Receiver<u64> {
        self.entry(key).changes.subscribe()
    }

    /// Drop the result of any revalidation of `key` that is still in flight.
    pub fn cancel_revalidation(&self, key: &str) {
        self.entry(key).state.lock().revalidation_epoch += 1;
    }

    /// Fetch the authoritative collection and replace the cache outright.
    ///
    /// Returns `Ok(false)` when the result was discarded because a mutation
    /// started (or is still in flight) since the fetch was issued.
    pub async fn revalidate(&self, key: &str) -> Result<bool, DashError> {
        let entry = self.entry(key);
        let (epoch, version) = {
            let mut state = entry.state.lock();
            state.is_loading = true;
            (state.revalidation_epoch, state.version)
        };
        entry.publish(version);

        let fetched = self.remote.fetch(key).await;

        let mut state = entry.state.lock();
        state.is_loading = false;
        if state.revalidation_epoch != epoch || !state.pending.is_empty() {
            let version = state.version;
            drop(state);
            entry.publish(version);
            log::debug!("SyncStore: discarded stale revalidation of {}", key);
            return Ok(false);
        }

        match fetched {
            Ok(mut records) => {
                records.sort_by_key(|r| r.order());
                state.base = Some(records);
                state.rebuild();
                state.error = None;
                state.last_outcome = MutationState::Idle;
                state.version += 1;
                let version = state.version;
                drop(state);
                entry.publish(version);
                Ok(true)
            }
            Err(e) => {
                state.error = Some(ErrorPayload::from(&e));
                let version = state.version;
                drop(state);
                entry.publish(version);
                Err(e)
            }
        }
    }

    /// Insert `record` under a placeholder id at the end of the collection.
    /// Resolves to the server-assigned id, which replaces the placeholder in place.
    ///
    /// If a patch moved the placeholder before the server answered, the final
    /// order is sent again under the new id.
    pub fn add(&self, key: &str, mut record: R) -> impl Future<Output = Result<String, DashError>> + Send + 'static {
        let temp_id = placeholder_id();
        record.set_id(temp_id.clone());

        let entry = self.entry(key);
        let begun = entry.begin(move |current| {
            record.set_order(current.len() as u32);
            let shown = record.clone();
            let replay: Replay<R> = Arc::new(move |data: &mut Vec<R>, aliases: &Aliases| {
                insert_record(data, &shown, aliases);
            });
            Ok((record, replay))
        });
        let remote = self.remote.clone();
        let key = key.to_string();

        async move {
            let (seq, sent) = begun?;
            let server_id = match remote.create(&key, &sent).await {
                Ok(server_id) => server_id,
                Err(e) => {
                    entry.fail(seq, &e, |aliases| {
                        aliases.deferred_orders.remove(&temp_id);
                    });
                    log::warn!("SyncStore: add on {} rolled back: {}", key, e);
                    return Err(e);
                }
            };

            let order = entry.settle(seq, |base, aliases| {
                aliases.renamed.insert(temp_id.clone(), server_id.clone());
                let order = insert_record(base, &sent, aliases);
                aliases.deferred_orders.remove(&temp_id);
                order
            });
            log::info!("SyncStore: {} on {} saved as {}", temp_id, key, server_id);

            if order != sent.order() {
                let mut moved = PatchEntry::new();
                moved.insert("id".to_string(), Value::String(server_id.clone()));
                moved.insert("order".to_string(), Value::from(order));
                if let Err(e) = remote.patch(&key, &[moved]).await {
                    log::warn!("SyncStore: order {} of {} on {} not saved: {}", order, server_id, key, e);
                }
            }
            Ok(server_id)
        }
    }

    /// Replace the record with `record.id()`, keeping its current position.
    pub fn edit(&self, key: &str, record: R) -> impl Future<Output = Result<(), DashError>> + Send + 'static {
        let entry = self.entry(key);
        let begun = entry.begin(move |current| {
            let slot = current
                .iter()
                .find(|r| r.id() == record.id())
                .ok_or_else(|| DashError::UnknownRecord(record.id().to_string()))?;
            let mut next = record;
            next.set_order(slot.order());
            let shown = next.clone();
            let replay: Replay<R> =
                Arc::new(move |data: &mut Vec<R>, aliases: &Aliases| replace_record(data, &shown, aliases));
            Ok((next, replay))
        });
        let remote = self.remote.clone();
        let key = key.to_string();

        async move {
            let (seq, sent) = begun?;
            match remote.update(&key, &sent).await {
                Ok(()) => {
                    entry.settle(seq, |base, aliases| replace_record(base, &sent, aliases));
                    Ok(())
                }
                Err(e) => {
                    entry.fail(seq, &e, |_| {});
                    log::warn!("SyncStore: edit of {} on {} rolled back: {}", sent.id(), key, e);
                    Err(e)
                }
            }
        }
    }

    /// Delete `id` from the collection.
    pub fn remove(&self, key: &str, id: &str) -> impl Future<Output = Result<(), DashError>> + Send + 'static {
        let entry = self.entry(key);
        let id = id.to_string();
        let target = id.clone();
        let begun = entry.begin(move |_| {
            let replay: Replay<R> =
                Arc::new(move |data: &mut Vec<R>, aliases: &Aliases| remove_record(data, &target, aliases));
            Ok(((), replay))
        });
        let remote = self.remote.clone();
        let key = key.to_string();

        async move {
            let (seq, ()) = begun?;
            match remote.delete(&key, &id).await {
                Ok(()) => {
                    entry.settle(seq, |base, aliases| remove_record(base, &id, aliases));
                    Ok(())
                }
                Err(e) => {
                    entry.fail(seq, &e, |_| {});
                    log::warn!("SyncStore: remove of {} on {} rolled back: {}", id, key, e);
                    Err(e)
                }
            }
        }
    }

    /// Show `new` (order recomputed from position) and send only the fields
    /// that differ from `old`. Records still waiting on their add are left out
    /// of the request. An empty delta sends nothing.
    pub fn patch(
        &self,
        key: &str,
        old: Vec<R>,
        new: Vec<R>,
    ) -> impl Future<Output = Result<Vec<PatchEntry>, DashError>> + Send + 'static {
        let next = with_dense_order(new);
        let changes = diff(&old, &next);
        let known: Arc<HashSet<String>> = Arc::new(old.iter().map(|r| r.id().to_string()).collect());
        let dropped: Vec<String> = old
            .iter()
            .filter(|r| !next.iter().any(|n| n.id() == r.id()))
            .map(|r| r.id().to_string())
            .collect();

        let entry = self.entry(key);
        let shown = changes.clone();
        let seen = known.clone();
        let begun = entry.begin(move |_| {
            let replay: Replay<R> = Arc::new(move |data: &mut Vec<R>, aliases: &Aliases| {
                data.retain(|r| !dropped.iter().any(|id| aliases.resolve(id) == r.id()));
                delta::apply(data, &aliases.resolve_changes(&shown), |id| is_new(&seen, id, aliases));
                data.sort_by_key(|r| r.order());
            });
            Ok(((), replay))
        });
        let remote = self.remote.clone();
        let key = key.to_string();

        async move {
            let (seq, ()) = begun?;
            let sendable = entry.with_aliases(|aliases| aliases.confirmed_changes(&changes));
            let sent = if sendable.is_empty() {
                log::debug!("SyncStore: patch on {} has no changes, request skipped", key);
                Ok(())
            } else {
                remote.patch(&key, &sendable).await
            };

            match sent {
                Ok(()) => {
                    entry.settle(seq, |base, aliases| {
                        let resolved: &Aliases = aliases;
                        delta::apply(base, &sendable, |id| is_new(&known, id, resolved));
                        base.sort_by_key(|r| r.order());
                        aliases.defer_orders(&next);
                    });
                    Ok(sendable)
                }
                Err(e) => {
                    entry.fail(seq, &e, |_| {});
                    log::warn!("SyncStore: patch on {} rolled back: {}", key, e);
                    Err(e)
                }
            }
        }
    }

    /// Move records into the order given by `ids`. Ids not listed keep their
    /// relative order after the listed ones.
    pub fn reorder(
        &self,
        key: &str,
        ids: &[String],
    ) -> impl Future<Output = Result<Vec<PatchEntry>, DashError>> + Send + 'static {
        let current = self.query(key).data.unwrap_or_default();
        let mut reordered: Vec<R> = ids
            .iter()
            .filter_map(|id| current.iter().find(|r| r.id() == id).cloned())
            .collect();
        reordered.extend(
            current
                .iter()
                .filter(|r| !ids.iter().any(|id| id == r.id()))
                .cloned(),
        );
        self.patch(key, current, reordered)
    }

    /// Overwrite the whole collection on the server, order reassigned 0..n-1.
    pub fn replace(&self, key: &str, records: Vec<R>) -> impl Future<Output = Result<(), DashError>> + Send + 'static {
        let next = with_dense_order(records);
        let entry = self.entry(key);
        let shown = next.clone();
        let begun = entry.begin(move |current| {
            let known: Arc<HashSet<String>> = Arc::new(current.iter().map(|r| r.id().to_string()).collect());
            let seen = known.clone();
            let replay: Replay<R> =
                Arc::new(move |data: &mut Vec<R>, aliases: &Aliases| swap_records(data, &shown, &seen, aliases));
            Ok((known, replay))
        });
        let remote = self.remote.clone();
        let key = key.to_string();

        async move {
            let (seq, known) = begun?;
            let sendable = entry.with_aliases(|aliases| aliases.confirmed_records(&next));
            match remote.replace(&key, &sendable).await {
                Ok(()) => {
                    entry.settle(seq, |base, aliases| {
                        swap_records(base, &sendable, &known, aliases);
                        aliases.defer_orders(&next);
                    });
                    Ok(())
                }
                Err(e) => {
                    entry.fail(seq, &e, |_| {});
                    log::warn!("SyncStore: replace on {} rolled back: {}", key, e);
                    Err(e)
                }
            }
        }
    }
}

fn with_dense_order<R: SyncRecord>(mut records: Vec<R>) -> Vec<R> {
    for (idx, record) in records.iter_mut().enumerate() {
        record.set_order(idx as u32);
    }
    records
}

/// Whether `id` was absent from the collection a write was computed against.
fn is_new(known: &HashSet<String>, id: &str, aliases: &Aliases) -> bool {
    !known.iter().any(|k| aliases.resolve(k) == id)
}

/// Append `record` under its current id unless it is already there. Returns
/// the order it ends up with.
fn insert_record<R: SyncRecord>(data: &mut Vec<R>, record: &R, aliases: &Aliases) -> u32 {
    let id = aliases.resolve(record.id());
    if let Some(existing) = data.iter().find(|r| r.id() == id) {
        return existing.order();
    }
    let mut placed = record.clone();
    placed.set_id(id.to_string());
    let deferred = aliases.deferred_orders.get(record.id()).copied();
    if let Some(order) = deferred {
        placed.set_order(order);
    }
    let order = placed.order();
    data.push(placed);
    if deferred.is_some() {
        data.sort_by_key(|r| r.order());
    }
    order
}

fn replace_record<R: SyncRecord>(data: &mut [R], record: &R, aliases: &Aliases) {
    let id = aliases.resolve(record.id());
    if let Some(slot) = data.iter_mut().find(|r| r.id() == id) {
        let mut next = record.clone();
        next.set_id(id.to_string());
        next.set_order(slot.order());
        *slot = next;
    }
}

fn remove_record<R: SyncRecord>(data: &mut Vec<R>, id: &str, aliases: &Aliases) {
    let id = aliases.resolve(id);
    data.retain(|r| r.id() != id);
}

/// Swap `data` for `records`. Records created after the swap was issued are
/// kept; records deleted since are not brought back.
fn swap_records<R: SyncRecord>(data: &mut Vec<R>, records: &[R], known: &HashSet<String>, aliases: &Aliases) {
    let later: Vec<R> = data
        .iter()
        .filter(|r| is_new(known, r.id(), aliases))
        .filter(|r| !records.iter().any(|n| aliases.resolve(n.id()) == r.id()))
        .cloned()
        .collect();
    let mut swapped: Vec<R> = records
        .iter()
        .filter_map(|record| {
            let id = aliases.resolve(record.id());
            let present = data.iter().any(|r| r.id() == id);
            if !present && !is_new(known, id, aliases) {
                return None;
            }
            let mut record = record.clone();
            record.set_id(id.to_string());
            Some(record)
        })
        .collect();
    swapped.extend(later);
    swapped.sort_by_key(|r| r.order());
    *data = swapped;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::fake::FakeRemote;
    use crate::types::{is_placeholder, DashboardRecord};
    use tokio::sync::Notify;

    const KEY: &str = "dash-1";

    fn tab(id: &str, order: u32) -> DashboardRecord {
        DashboardRecord {
            id: id.to_string(),
            title: format!("Tab {id}"),
            order,
        }
    }

    fn seeded() -> (Arc<FakeRemote<DashboardRecord>>, CollectionSyncStore<DashboardRecord>) {
        let remote = Arc::new(FakeRemote::new());
        remote.seed(KEY, vec![tab("a", 0), tab("b", 1), tab("c", 2)]);
        let store = CollectionSyncStore::new(remote.clone() as Arc<dyn RemoteCollection<DashboardRecord>>);
        (remote, store)
    }

    async fn loaded() -> (Arc<FakeRemote<DashboardRecord>>, CollectionSyncStore<DashboardRecord>) {
        let (remote, store) = seeded();
        assert!(store.revalidate(KEY).await.unwrap());
        remote.clear_calls();
        (remote, store)
    }

    fn ids(store: &CollectionSyncStore<DashboardRecord>) -> Vec<String> {
        store
            .query(KEY)
            .data
            .unwrap_or_default()
            .iter()
            .map(|r| r.id.clone())
            .collect()
    }

    #[tokio::test]
    async fn test_query_unknown_key_is_empty() {
        let (_, store) = seeded();
        let snapshot = store.query("nope");
        assert!(snapshot.data.is_none());
        assert!(!snapshot.is_loading);
        assert_eq!(snapshot.mutation, MutationState::Idle);
    }

    #[tokio::test]
    async fn test_add_is_visible_immediately_then_renamed_in_place() {
        let (_, store) = loaded().await;

        let pending = store.add(KEY, tab("", 0));
        let during = ids(&store);
        assert_eq!(during.len(), 4);
        assert!(is_placeholder(&during[3]));
        assert_eq!(store.query(KEY).mutation, MutationState::Mutating);
        assert_eq!(store.query(KEY).data.unwrap()[3].order, 3);

        let server_id = pending.await.unwrap();
        assert_eq!(ids(&store), vec!["a", "b", "c", server_id.as_str()]);
        assert_eq!(store.query(KEY).mutation, MutationState::Reconciled);
    }

    #[tokio::test]
    async fn test_add_failure_removes_record_entirely() {
        let (remote, store) = loaded().await;
        let before = store.query(KEY).data;
        remote.fail_writes(true);

        let pending = store.add(KEY, tab("", 0));
        assert_eq!(ids(&store).len(), 4);

        let err = pending.await.unwrap_err();
        assert!(matches!(err, DashError::Http { status: 500, .. }));
        let after = store.query(KEY);
        assert_eq!(after.data, before);
        assert!(after.is_error);
        assert_eq!(after.mutation, MutationState::RolledBack);
    }

    #[tokio::test]
    async fn test_add_into_unloaded_collection_rolls_back_to_none() {
        let (remote, store) = seeded();
        remote.fail_writes(true);
        let pending = store.add(KEY, tab("", 0));
        assert_eq!(ids(&store).len(), 1);
        assert!(pending.await.is_err());
        assert!(store.query(KEY).data.is_none());
    }

    #[tokio::test]
    async fn test_edit_keeps_position_and_order() {
        let (remote, store) = loaded().await;
        let mut renamed = tab("b", 99);
        renamed.title = "Renamed".into();

        store.edit(KEY, renamed).await.unwrap();
        let data = store.query(KEY).data.unwrap();
        assert_eq!(data[1].title, "Renamed");
        assert_eq!(data[1].order, 1);
        assert_eq!(remote.calls(), vec!["PUT dash-1/b"]);
    }

    #[tokio::test]
    async fn test_edit_unknown_id_writes_nothing() {
        let (remote, store) = loaded().await;
        let err = store.edit(KEY, tab("zzz", 0)).await.unwrap_err();
        assert_eq!(err, DashError::UnknownRecord("zzz".into()));
        assert!(remote.calls().is_empty());
        assert_eq!(store.query(KEY).mutation, MutationState::Idle);
    }

    #[tokio::test]
    async fn test_failed_edit_restores_snapshot() {
        let (remote, store) = loaded().await;
        let before = store.query(KEY).data;
        remote.fail_writes(true);

        let mut renamed = tab("a", 0);
        renamed.title = "Nope".into();
        let pending = store.edit(KEY, renamed);
        assert_eq!(store.query(KEY).data.unwrap()[0].title, "Nope");

        assert!(pending.await.is_err());
        assert_eq!(store.query(KEY).data, before);
    }

    #[tokio::test]
    async fn test_remove_and_failed_remove() {
        let (remote, store) = loaded().await;
        store.remove(KEY, "b").await.unwrap();
        assert_eq!(ids(&store), vec!["a", "c"]);

        remote.fail_writes(true);
        let pending = store.remove(KEY, "a");
        assert_eq!(ids(&store), vec!["c"]);
        assert!(pending.await.is_err());
        assert_eq!(ids(&store), vec!["a", "c"]);
    }

    #[tokio::test]
    async fn test_rollback_only_reverts_the_failed_mutation() {
        let (remote, store) = loaded().await;
        remote.fail_id("a");

        let mut renamed = tab("a", 0);
        renamed.title = "Doomed".into();
        let edit = store.edit(KEY, renamed);
        let remove = store.remove(KEY, "c");
        assert_eq!(ids(&store), vec!["a", "b"]);

        remove.await.unwrap();
        assert!(edit.await.is_err());

        let data = store.query(KEY).data.unwrap();
        assert_eq!(ids(&store), vec!["a", "b"]);
        assert_eq!(data[0].title, "Tab a");
    }

    #[tokio::test]
    async fn test_reorder_back_to_original_sends_nothing() {
        let (remote, store) = loaded().await;
        let current = store.query(KEY).data.unwrap();

        let patch = store
            .reorder(KEY, &["a".to_string(), "b".to_string(), "c".to_string()])
            .await
            .unwrap();
        assert!(patch.is_empty());
        assert!(remote.calls().is_empty());
        assert_eq!(store.query(KEY).data.unwrap(), current);
    }

    #[tokio::test]
    async fn test_reorder_sends_minimal_delta_with_dense_order() {
        let (remote, store) = loaded().await;

        let patch = store
            .reorder(KEY, &["c".to_string(), "a".to_string()])
            .await
            .unwrap();
        assert_eq!(ids(&store), vec!["c", "a", "b"]);
        let orders: Vec<u32> = store.query(KEY).data.unwrap().iter().map(|r| r.order).collect();
        assert_eq!(orders, vec![0, 1, 2]);
        assert_eq!(patch.len(), 3);
        assert_eq!(remote.calls(), vec!["PATCH dash-1 3"]);
    }

    #[tokio::test]
    async fn test_failed_patch_restores_snapshot() {
        let (remote, store) = loaded().await;
        let before = store.query(KEY).data;
        remote.fail_writes(true);

        let pending = store.reorder(KEY, &["c".to_string()]);
        assert_eq!(ids(&store), vec!["c", "a", "b"]);
        assert!(pending.await.is_err());
        assert_eq!(store.query(KEY).data, before);
    }

    #[tokio::test]
    async fn test_replace_puts_whole_collection() {
        let (remote, store) = loaded().await;
        store
            .replace(KEY, vec![tab("b", 7), tab("a", 3)])
            .await
            .unwrap();
        assert_eq!(ids(&store), vec!["b", "a"]);
        assert_eq!(remote.calls(), vec!["PUT dash-1"]);
        assert_eq!(remote.stored(KEY)[1].order, 1);
    }

    #[tokio::test]
    async fn test_mutation_discards_in_flight_revalidation() {
        let (remote, store) = loaded().await;
        let store = Arc::new(store);
        let gate = Arc::new(Notify::new());
        remote.set_fetch_gate(Some(gate.clone()));

        let poller = store.clone();
        let poll = tokio::spawn(async move { poller.revalidate(KEY).await });
        tokio::task::yield_now().await;
        assert!(store.query(KEY).is_loading);

        let mut renamed = tab("a", 0);
        renamed.title = "Mine".into();
        let edit = store.edit(KEY, renamed);
        gate.notify_one();

        assert!(!poll.await.unwrap().unwrap());
        assert_eq!(store.query(KEY).data.unwrap()[0].title, "Mine");
        edit.await.unwrap();
        assert_eq!(store.query(KEY).data.unwrap()[0].title, "Mine");
    }

    #[tokio::test]
    async fn test_revalidation_replaces_cache_and_surfaces_errors() {
        let (remote, store) = loaded().await;
        remote.seed(KEY, vec![tab("z", 1), tab("y", 0)]);
        assert!(store.revalidate(KEY).await.unwrap());
        assert_eq!(ids(&store), vec!["y", "z"]);

        remote.fail_reads(true);
        assert!(store.revalidate(KEY).await.is_err());
        let snapshot = store.query(KEY);
        assert!(snapshot.is_error);
        assert_eq!(ids(&store), vec!["y", "z"]);
    }

    #[tokio::test]
    async fn test_subscribers_see_optimistic_and_settled_writes() {
        let (_, store) = loaded().await;
        let mut changes = store.subscribe(KEY);
        let start = *changes.borrow_and_update();

        let pending = store.remove(KEY, "a");
        assert!(changes.has_changed().unwrap());
        let optimistic = *changes.borrow_and_update();
        assert!(optimistic > start);

        pending.await.unwrap();
        assert!(*changes.borrow_and_update() > optimistic);
    }

    #[tokio::test]
    async fn test_revalidation_start_is_published() {
        let (remote, store) = loaded().await;
        let store = Arc::new(store);
        let mut changes = store.subscribe(KEY);
        changes.borrow_and_update();
        let gate = Arc::new(Notify::new());
        remote.set_fetch_gate(Some(gate.clone()));

        let poller = store.clone();
        let poll = tokio::spawn(async move { poller.revalidate(KEY).await });
        tokio::task::yield_now().await;
        assert!(changes.has_changed().unwrap());
        changes.borrow_and_update();
        assert!(store.query(KEY).is_loading);

        gate.notify_one();
        assert!(poll.await.unwrap().unwrap());
        assert!(changes.has_changed().unwrap());
        assert!(!store.query(KEY).is_loading);
    }

    #[tokio::test]
    async fn test_two_failed_edits_of_one_record_restore_the_original() {
        let (remote, store) = loaded().await;
        let before = store.query(KEY).data;
        remote.fail_writes(true);

        let titled = |title: &str| {
            let mut record = tab("a", 0);
            record.title = title.into();
            record
        };

        let first = store.edit(KEY, titled("One"));
        let second = store.edit(KEY, titled("Two"));
        assert_eq!(store.query(KEY).data.unwrap()[0].title, "Two");
        assert!(first.await.is_err());
        assert_eq!(store.query(KEY).data.unwrap()[0].title, "Two");
        assert!(second.await.is_err());
        assert_eq!(store.query(KEY).data, before);

        // Same pair, settling in the opposite order.
        let first = store.edit(KEY, titled("One"));
        let second = store.edit(KEY, titled("Two"));
        assert!(second.await.is_err());
        assert_eq!(store.query(KEY).data.unwrap()[0].title, "One");
        assert!(first.await.is_err());
        assert_eq!(store.query(KEY).data, before);
        assert_eq!(store.query(KEY).mutation, MutationState::RolledBack);
    }

    #[tokio::test]
    async fn test_failed_reorder_does_not_bring_back_a_removed_record() {
        let (remote, store) = loaded().await;

        let reorder = store.reorder(KEY, &["c".to_string(), "a".to_string(), "b".to_string()]);
        let remove = store.remove(KEY, "b");
        assert_eq!(ids(&store), vec!["c", "a"]);

        remove.await.unwrap();
        assert_eq!(ids(&store), vec!["c", "a"]);

        remote.fail_writes(true);
        assert!(reorder.await.is_err());
        assert_eq!(ids(&store), vec!["a", "c"]);
        assert_eq!(remote.stored(KEY).len(), 2);
    }

    #[tokio::test]
    async fn test_failed_remove_keeps_a_concurrent_successful_edit() {
        let (remote, store) = loaded().await;
        let mut renamed = tab("b", 1);
        renamed.title = "Kept".into();

        let edit = store.edit(KEY, renamed);
        let remove = store.remove(KEY, "b");
        assert_eq!(ids(&store), vec!["a", "c"]);

        edit.await.unwrap();
        remote.fail_writes(true);
        assert!(remove.await.is_err());

        let data = store.query(KEY).data.unwrap();
        assert_eq!(ids(&store), vec!["a", "b", "c"]);
        assert_eq!(data[1].title, "Kept");
    }

    #[tokio::test]
    async fn test_successful_add_survives_a_failed_edit() {
        let (remote, store) = loaded().await;
        remote.fail_id("a");
        let mut renamed = tab("a", 0);
        renamed.title = "Doomed".into();

        let edit = store.edit(KEY, renamed);
        let add = store.add(KEY, tab("", 0));
        let server_id = add.await.unwrap();
        assert!(edit.await.is_err());

        let data = store.query(KEY).data.unwrap();
        assert_eq!(ids(&store), vec!["a", "b", "c", server_id.as_str()]);
        assert_eq!(data[0].title, "Tab a");
    }

    #[tokio::test]
    async fn test_successful_reorder_does_not_keep_a_failed_edit() {
        let (remote, store) = loaded().await;
        remote.fail_id("a");
        let mut renamed = tab("a", 0);
        renamed.title = "Doomed".into();

        let edit = store.edit(KEY, renamed);
        store
            .reorder(KEY, &["c".to_string(), "b".to_string(), "a".to_string()])
            .await
            .unwrap();
        assert!(edit.await.is_err());

        let data = store.query(KEY).data.unwrap();
        assert_eq!(ids(&store), vec!["c", "b", "a"]);
        assert_eq!(data[2].title, "Tab a");
    }

    #[tokio::test]
    async fn test_failed_add_after_reorder_drops_only_the_placeholder() {
        let (remote, store) = loaded().await;
        let add = store.add(KEY, tab("", 0));
        let temp_id = ids(&store)[3].clone();

        let moved = vec![temp_id.clone(), "a".to_string(), "b".to_string(), "c".to_string()];
        store.reorder(KEY, &moved).await.unwrap();
        assert_eq!(ids(&store), moved);

        remote.fail_writes(true);
        assert!(add.await.is_err());
        let orders: Vec<u32> = store.query(KEY).data.unwrap().iter().map(|r| r.order).collect();
        assert_eq!(ids(&store), vec!["a", "b", "c"]);
        assert_eq!(orders, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_reorder_during_add_sends_order_under_server_id() {
        let (remote, store) = loaded().await;
        let add = store.add(KEY, tab("", 0));
        let temp_id = ids(&store)[3].clone();

        let patch = store
            .reorder(KEY, &[temp_id, "a".to_string(), "b".to_string(), "c".to_string()])
            .await
            .unwrap();
        assert_eq!(patch.len(), 3);
        assert!(patch
            .iter()
            .all(|entry| !is_placeholder(entry["id"].as_str().unwrap())));

        let server_id = add.await.unwrap();
        assert_eq!(ids(&store), vec![server_id.as_str(), "a", "b", "c"]);
        assert_eq!(remote.calls(), vec!["PATCH dash-1 3", "POST dash-1", "PATCH dash-1 1"]);
        let saved = remote
            .stored(KEY)
            .into_iter()
            .find(|r| r.id == server_id)
            .unwrap();
        assert_eq!(saved.order, 0);
    }
}
