//! Board state container.
//!
//! Explicitly constructed (no global singleton) so the reconciliation logic
//! is testable without a UI tree. All mutation entry points are optimistic:
//! local state changes first, the backend write follows, and a failed write
//! reverts just the mutated row. Writes to other ids are not serialised
//! against this one, so rollback must never touch their state. Errors
//! become state (`last_error`), never panics; the board keeps
//! last-known-good data across outages.
//!
//! Refresh staleness is handled with a monotonic snapshot version: each
//! confirmed local write is stamped with the version current at confirm
//! time, and a refresh only overrides that task's status if the fetch began
//! after the write confirmed. Most recent confirmed write wins.

use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

use crate::backend::OrderBackend;
use crate::error::KdsError;
use crate::ingest::{IngestResult, OrderIngestor};
use crate::model::{BoardConfig, CompletionStats, Order, SortMode, Task};
use crate::reconcile::SyncReconciler;
use crate::status::{OrderStatus, TaskStatus};
use crate::urgency::{self, Urgency};

/// Confirmed-write key for an order-level status write. Task keys are the
/// task ids themselves; order keys are prefixed to keep the spaces apart.
fn order_write_key(order_id: &str) -> String {
    format!("order/{order_id}")
}

#[derive(Debug, Default)]
struct BoardState {
    orders: Vec<Order>,
    tasks: Vec<Task>,
    loading: bool,
    last_error: Option<String>,
    /// Bumped once per applied snapshot.
    version: u64,
    /// task id (or order write key) -> version current when the backend
    /// write confirmed.
    confirmed_writes: HashMap<String, u64>,
}

/// Read-only view handed to the presentation layer.
#[derive(Debug, Clone)]
pub struct BoardSnapshot {
    pub orders: Vec<Order>,
    pub tasks: Vec<Task>,
    pub loading: bool,
    pub last_error: Option<String>,
}

pub struct TaskStore<B: OrderBackend> {
    ingestor: OrderIngestor<B>,
    reconciler: SyncReconciler<B>,
    backend: Arc<B>,
    state: Mutex<BoardState>,
    /// Task/order ids with a backend write in flight. A second mutation
    /// against the same id returns without effect until the first lands.
    in_flight: Mutex<HashSet<String>>,
    config: Mutex<BoardConfig>,
}

/// Removes its id from the in-flight set when dropped, on every exit path.
struct InFlightGuard<'a> {
    set: &'a Mutex<HashSet<String>>,
    id: String,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.set
            .lock()
            .expect("in-flight set poisoned")
            .remove(&self.id);
    }
}

impl<B: OrderBackend> TaskStore<B> {
    pub fn new(backend: Arc<B>, config: BoardConfig) -> Self {
        Self {
            ingestor: OrderIngestor::new(backend.clone()),
            reconciler: SyncReconciler::new(backend.clone()),
            backend,
            state: Mutex::new(BoardState::default()),
            in_flight: Mutex::new(HashSet::new()),
            config: Mutex::new(config),
        }
    }

    // -- Views ---------------------------------------------------------------

    pub fn snapshot(&self) -> BoardSnapshot {
        let state = self.state.lock().expect("board state poisoned");
        BoardSnapshot {
            orders: state.orders.clone(),
            tasks: state.tasks.clone(),
            loading: state.loading,
            last_error: state.last_error.clone(),
        }
    }

    pub fn last_error(&self) -> Option<String> {
        self.state
            .lock()
            .expect("board state poisoned")
            .last_error
            .clone()
    }

    pub fn config(&self) -> BoardConfig {
        self.config.lock().expect("config poisoned").clone()
    }

    pub fn set_config(&self, config: BoardConfig) {
        *self.config.lock().expect("config poisoned") = config;
    }

    /// Tasks for display: visibility filter applied, ordered per the
    /// configured sort mode. Urgency ordering is computed fresh each call.
    pub fn tasks_view(&self) -> Vec<Task> {
        let config = self.config();
        let mut tasks: Vec<Task> = {
            let state = self.state.lock().expect("board state poisoned");
            state
                .tasks
                .iter()
                .filter(|t| config.shows(t.category))
                .cloned()
                .collect()
        };
        let now = Utc::now();
        match config.sort_mode {
            SortMode::OldestFirst => tasks.sort_by_key(|t| t.created_at),
            SortMode::NewestFirst => {
                tasks.sort_by_key(|t| std::cmp::Reverse(t.created_at))
            }
            SortMode::UrgencyFirst => tasks.sort_by(|a, b| {
                urgency::task_urgency(b, now)
                    .cmp(&urgency::task_urgency(a, now))
                    .then(a.created_at.cmp(&b.created_at))
            }),
        }
        tasks
    }

    /// Completion counts for one order (cancelled tasks excluded from the
    /// total by ingestion).
    pub fn completion_stats(&self, order_id: &str) -> CompletionStats {
        let state = self.state.lock().expect("board state poisoned");
        let mut stats = CompletionStats {
            completed: 0,
            total: 0,
        };
        for task in state.tasks.iter().filter(|t| t.order_id == order_id) {
            stats.total += 1;
            if task.status.is_done() {
                stats.completed += 1;
            }
        }
        stats
    }

    /// Order urgency from its age and completion ratio, recomputed on call.
    pub fn order_urgency(&self, order_id: &str) -> Option<Urgency> {
        let created_at = {
            let state = self.state.lock().expect("board state poisoned");
            state
                .orders
                .iter()
                .find(|o| o.id == order_id)
                .map(|o| o.created_at)?
        };
        let stats = self.completion_stats(order_id);
        Some(urgency::order_urgency(created_at, stats, Utc::now()))
    }

    // -- Fetch ---------------------------------------------------------------

    /// Repopulate the board. `silent` suppresses the loading flag for
    /// background polls. Fetch errors are recorded in state; the previous
    /// snapshot stays on the board.
    pub async fn fetch(&self, silent: bool) {
        let fetch_started_version = {
            let mut state = self.state.lock().expect("board state poisoned");
            if !silent {
                state.loading = true;
            }
            state.version
        };

        match self.ingestor.ingest(None).await {
            Ok(result) => {
                let mut state = self.state.lock().expect("board state poisoned");
                apply_snapshot(&mut state, result, fetch_started_version);
                state.loading = false;
                state.last_error = None;
            }
            Err(err) => {
                warn!(error = %err, "board refresh failed, keeping last good snapshot");
                let mut state = self.state.lock().expect("board state poisoned");
                state.loading = false;
                state.last_error = Some(err.surface_message());
            }
        }
    }

    // -- Mutations -----------------------------------------------------------

    /// Flip a task between done and its working state, reconciling the
    /// combo parent when the task is virtual.
    pub async fn toggle_task(&self, task_id: &str) -> Result<(), KdsError> {
        let target = {
            let state = self.state.lock().expect("board state poisoned");
            match state.tasks.iter().find(|t| t.id == task_id) {
                Some(task) => task.status.toggle_target(),
                None => {
                    debug!(task_id = %task_id, "toggle for unknown task ignored");
                    return Ok(());
                }
            }
        };
        self.set_task_status(task_id, target).await
    }

    /// Set one task's status. No-op when the status is already in place, so
    /// replaying a mutation produces no further state change.
    pub async fn set_task_status(
        &self,
        task_id: &str,
        status: TaskStatus,
    ) -> Result<(), KdsError> {
        let Some(_guard) = self.begin_write(task_id) else {
            debug!(task_id = %task_id, "write already in flight, ignored");
            return Ok(());
        };

        // Optimistic local application.
        let (previous, mutation) = {
            let mut state = self.state.lock().expect("board state poisoned");
            let Some(task) = state.tasks.iter_mut().find(|t| t.id == task_id) else {
                return Ok(());
            };
            if task.status == status {
                return Ok(());
            }
            let previous = task.status;
            task.status = status;
            let is_virtual = task.is_virtual;
            let parent = task.parent_combo_id.clone();
            let order_id = task.order_id.clone();
            let mutation = if is_virtual {
                let parent = parent.expect("virtual task carries parent id");
                let siblings: Vec<Task> = state
                    .tasks
                    .iter()
                    .filter(|t| t.parent_combo_id.as_deref() == Some(parent.as_str()))
                    .cloned()
                    .collect();
                PendingWrite::Virtual {
                    order_id,
                    parent,
                    siblings,
                }
            } else {
                PendingWrite::Real
            };
            (previous, mutation)
        };

        let outcome = match mutation {
            PendingWrite::Real => self.backend.update_item_status(task_id, status).await,
            PendingWrite::Virtual {
                order_id,
                parent,
                siblings,
            } => self
                .reconciler
                .reconcile_virtual_change(&order_id, &parent, &siblings)
                .await
                .map(|_| ()),
        };

        match outcome {
            Ok(()) => {
                let mut state = self.state.lock().expect("board state poisoned");
                let version = state.version;
                state.confirmed_writes.insert(task_id.to_string(), version);
                Ok(())
            }
            Err(err) => {
                let mut state = self.state.lock().expect("board state poisoned");
                // Revert only this task, and only if it still carries the
                // optimistic value; a refresh may already have replaced it.
                if let Some(task) = state.tasks.iter_mut().find(|t| t.id == task_id) {
                    if task.status == status {
                        task.status = previous;
                    }
                }
                state.last_error = Some(err.surface_message());
                Err(err)
            }
        }
    }

    /// Gated aggregate action: mark the order ready. No-op unless every
    /// task of the order is ready or served.
    pub async fn mark_order_ready(&self, order_id: &str) -> Result<(), KdsError> {
        let all_done = {
            let state = self.state.lock().expect("board state poisoned");
            let mut tasks = state.tasks.iter().filter(|t| t.order_id == order_id);
            let mut any = false;
            let done = tasks.all(|t| {
                any = true;
                t.status.is_done()
            });
            any && done
        };
        if !all_done {
            debug!(order_id = %order_id, "mark ready gated: tasks still open");
            return Ok(());
        }
        self.set_order_status(order_id, OrderStatus::Ready).await
    }

    /// Gated aggregate action: hand the order off. No-op unless the order
    /// is currently ready.
    pub async fn mark_order_served(&self, order_id: &str) -> Result<(), KdsError> {
        let is_ready = {
            let state = self.state.lock().expect("board state poisoned");
            state
                .orders
                .iter()
                .any(|o| o.id == order_id && o.status == OrderStatus::Ready)
        };
        if !is_ready {
            debug!(order_id = %order_id, "mark served gated: order not ready");
            return Ok(());
        }
        self.set_order_status(order_id, OrderStatus::Served).await
    }

    async fn set_order_status(
        &self,
        order_id: &str,
        status: OrderStatus,
    ) -> Result<(), KdsError> {
        let write_key = order_write_key(order_id);
        let Some(_guard) = self.begin_write(&write_key) else {
            debug!(order_id = %order_id, "order write already in flight, ignored");
            return Ok(());
        };

        let previous = {
            let mut state = self.state.lock().expect("board state poisoned");
            let Some(order) = state.orders.iter_mut().find(|o| o.id == order_id) else {
                return Ok(());
            };
            if order.status == status {
                return Ok(());
            }
            let previous = order.status;
            order.status = status;
            previous
        };

        match self.backend.update_order_status(order_id, status).await {
            Ok(()) => {
                let mut state = self.state.lock().expect("board state poisoned");
                let version = state.version;
                state.confirmed_writes.insert(write_key, version);
                Ok(())
            }
            Err(err) => {
                let mut state = self.state.lock().expect("board state poisoned");
                if let Some(order) = state.orders.iter_mut().find(|o| o.id == order_id) {
                    if order.status == status {
                        order.status = previous;
                    }
                }
                state.last_error = Some(err.surface_message());
                Err(err)
            }
        }
    }

    fn begin_write(&self, id: &str) -> Option<InFlightGuard<'_>> {
        let mut in_flight = self.in_flight.lock().expect("in-flight set poisoned");
        if !in_flight.insert(id.to_string()) {
            return None;
        }
        Some(InFlightGuard {
            set: &self.in_flight,
            id: id.to_string(),
        })
    }
}

enum PendingWrite {
    Real,
    Virtual {
        order_id: String,
        parent: String,
        siblings: Vec<Task>,
    },
}

/// Merge a fetched snapshot into the board. A task or order with a write
/// confirmed at or after the version the fetch started from keeps its local
/// status; everything else takes the fetched value. Stale stamps are pruned
/// once a newer fetch has passed them.
fn apply_snapshot(state: &mut BoardState, result: IngestResult, fetch_started_version: u64) {
    let IngestResult {
        orders: mut incoming_orders,
        tasks: mut incoming_tasks,
    } = result;

    for task in incoming_tasks.iter_mut() {
        if let Some(&confirmed) = state.confirmed_writes.get(&task.id) {
            if confirmed >= fetch_started_version {
                if let Some(local) = state.tasks.iter().find(|t| t.id == task.id) {
                    task.status = local.status;
                }
            }
        }
    }
    for order in incoming_orders.iter_mut() {
        if let Some(&confirmed) = state.confirmed_writes.get(&order_write_key(&order.id)) {
            if confirmed >= fetch_started_version {
                if let Some(local) = state.orders.iter().find(|o| o.id == order.id) {
                    order.status = local.status;
                }
            }
        }
    }

    state
        .confirmed_writes
        .retain(|_, &mut confirmed| confirmed >= fetch_started_version);
    state.orders = incoming_orders;
    state.tasks = incoming_tasks;
    state.version += 1;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;

    fn combo_order_row() -> serde_json::Value {
        serde_json::json!({
            "id": "order-1",
            "order_number": "A-7",
            "table_number": "2",
            "status": "preparing",
            "created_at": "2026-08-29T09:00:00+00:00",
            "metadata": {},
            "order_items": [
                {
                    "id": "item-1",
                    "product_name": "凱薩沙拉",
                    "status": "preparing"
                },
                {
                    "id": "item-9",
                    "product_name": "[套餐] Combo",
                    "status": "preparing",
                    "special_instructions": "主餐：牛排x1 雞腿x1 | 飲品：紅茶x1"
                }
            ]
        })
    }

    async fn store_with_board() -> (Arc<MemoryBackend>, TaskStore<MemoryBackend>) {
        let backend = Arc::new(MemoryBackend::new());
        backend.seed_order(combo_order_row());
        let store = TaskStore::new(backend.clone(), BoardConfig::default());
        store.fetch(false).await;
        (backend, store)
    }

    #[tokio::test]
    async fn fetch_populates_orders_and_decomposed_tasks() {
        let (_backend, store) = store_with_board().await;
        let snapshot = store.snapshot();
        assert_eq!(snapshot.orders.len(), 1);
        assert_eq!(snapshot.tasks.len(), 4);
        assert!(!snapshot.loading);
        assert_eq!(snapshot.last_error, None);
    }

    #[tokio::test]
    async fn toggling_a_real_task_writes_through_and_confirms() {
        let (backend, store) = store_with_board().await;
        store
            .toggle_task("item-1")
            .await
            .expect("toggle should succeed");
        let snapshot = store.snapshot();
        let task = snapshot
            .tasks
            .iter()
            .find(|t| t.id == "item-1")
            .expect("task should exist");
        assert_eq!(task.status, TaskStatus::Ready);
        assert_eq!(backend.item_status("item-1").as_deref(), Some("ready"));
    }

    #[tokio::test]
    async fn failed_mutation_rolls_back_and_surfaces_the_error() {
        let (backend, store) = store_with_board().await;
        backend.set_fail_writes(true);
        let err = store
            .toggle_task("item-1")
            .await
            .expect_err("write should fail");
        assert!(matches!(err, KdsError::Mutation(_)));
        let snapshot = store.snapshot();
        let task = snapshot
            .tasks
            .iter()
            .find(|t| t.id == "item-1")
            .expect("task should exist");
        assert_eq!(task.status, TaskStatus::Preparing);
        assert!(snapshot.last_error.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn failed_rollback_leaves_an_overlapping_confirmed_write_alone() {
        let backend = Arc::new(MemoryBackend::new());
        backend.seed_order(serde_json::json!({
            "id": "order-1",
            "order_number": "A-7",
            "status": "preparing",
            "created_at": "2026-08-29T09:00:00+00:00",
            "metadata": {},
            "order_items": [
                { "id": "item-1", "product_name": "凱薩沙拉", "status": "preparing" },
                { "id": "item-2", "product_name": "牛排", "status": "preparing" }
            ]
        }));
        let store = Arc::new(TaskStore::new(backend.clone(), BoardConfig::default()));
        store.fetch(false).await;

        // First write stalls in the backend and then fails; a write to the
        // other task lands while it is still in flight.
        backend.stall_item_write("item-1", std::time::Duration::from_millis(50));
        let stalled = {
            let store = store.clone();
            tokio::spawn(async move { store.set_task_status("item-1", TaskStatus::Ready).await })
        };
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        store
            .set_task_status("item-2", TaskStatus::Ready)
            .await
            .expect("overlapping write should succeed");
        stalled
            .await
            .expect("write task should run to completion")
            .expect_err("stalled write should fail");

        // Only the failed task reverts; the confirmed one keeps the status
        // the backend already holds.
        let snapshot = store.snapshot();
        let status = |id: &str| {
            snapshot
                .tasks
                .iter()
                .find(|t| t.id == id)
                .map(|t| t.status)
                .expect("task should exist")
        };
        assert_eq!(status("item-1"), TaskStatus::Preparing);
        assert_eq!(status("item-2"), TaskStatus::Ready);
        assert_eq!(backend.item_status("item-2").as_deref(), Some("ready"));
        assert!(snapshot.last_error.is_some());
    }

    #[tokio::test]
    async fn completing_every_virtual_child_reconciles_the_parent() {
        let (backend, store) = store_with_board().await;
        for child in ["item-9_g0", "item-9_g1", "item-9_g2"] {
            store
                .toggle_task(child)
                .await
                .expect("toggle should succeed");
        }
        assert_eq!(backend.item_status("item-9").as_deref(), Some("ready"));
        let doc = backend.metadata_for("order-1");
        assert_eq!(
            doc["combo_progress"]["item-9"],
            serde_json::json!({
                "item-9_g0": "ready",
                "item-9_g1": "ready",
                "item-9_g2": "ready"
            })
        );
        // Children and parent survive a refresh in their completed state.
        store.fetch(true).await;
        let snapshot = store.snapshot();
        assert!(snapshot
            .tasks
            .iter()
            .filter(|t| t.is_virtual)
            .all(|t| t.status == TaskStatus::Ready));
    }

    #[tokio::test]
    async fn replaying_a_status_write_is_a_no_op() {
        let (backend, store) = store_with_board().await;
        store
            .set_task_status("item-1", TaskStatus::Ready)
            .await
            .expect("first write should succeed");
        // Backend starts rejecting writes: a true replay must not issue one.
        backend.set_fail_writes(true);
        store
            .set_task_status("item-1", TaskStatus::Ready)
            .await
            .expect("replay should be a no-op");
        assert_eq!(store.last_error(), None);
    }

    #[tokio::test]
    async fn stale_refresh_does_not_revert_a_confirmed_write() {
        let (backend, store) = store_with_board().await;
        store
            .toggle_task("item-1")
            .await
            .expect("toggle should succeed");
        // A refresh racing ahead of the write sees the old row status.
        backend.force_item_status("item-1", "preparing");
        store.fetch(true).await;
        let snapshot = store.snapshot();
        let task = snapshot
            .tasks
            .iter()
            .find(|t| t.id == "item-1")
            .expect("task should exist");
        assert_eq!(task.status, TaskStatus::Ready, "confirmed write must win");

        // Once a later fetch has passed the stamp, the backend is
        // authoritative again.
        store.fetch(true).await;
        let snapshot = store.snapshot();
        let task = snapshot
            .tasks
            .iter()
            .find(|t| t.id == "item-1")
            .expect("task should exist");
        assert_eq!(task.status, TaskStatus::Preparing);
    }

    #[tokio::test]
    async fn mark_order_ready_is_gated_on_every_task_done() {
        let (backend, store) = store_with_board().await;
        store
            .mark_order_ready("order-1")
            .await
            .expect("gated call should not error");
        assert_eq!(backend.order_status("order-1").as_deref(), Some("preparing"));

        for task_id in ["item-1", "item-9_g0", "item-9_g1", "item-9_g2"] {
            store
                .set_task_status(task_id, TaskStatus::Ready)
                .await
                .expect("write should succeed");
        }
        store
            .mark_order_ready("order-1")
            .await
            .expect("mark ready should succeed");
        assert_eq!(backend.order_status("order-1").as_deref(), Some("ready"));
    }

    #[tokio::test]
    async fn mark_order_served_requires_a_ready_order() {
        let (backend, store) = store_with_board().await;
        store
            .mark_order_served("order-1")
            .await
            .expect("gated call should not error");
        assert_eq!(backend.order_status("order-1").as_deref(), Some("preparing"));

        for task_id in ["item-1", "item-9_g0", "item-9_g1", "item-9_g2"] {
            store
                .set_task_status(task_id, TaskStatus::Ready)
                .await
                .expect("write should succeed");
        }
        store
            .mark_order_ready("order-1")
            .await
            .expect("mark ready should succeed");
        store
            .mark_order_served("order-1")
            .await
            .expect("mark served should succeed");
        assert_eq!(backend.order_status("order-1").as_deref(), Some("served"));
    }

    #[tokio::test]
    async fn fetch_failure_keeps_last_good_snapshot() {
        let (backend, store) = store_with_board().await;
        let before = store.snapshot();

        backend.set_fail_reads(true);
        store.fetch(false).await;
        let after = store.snapshot();
        assert_eq!(before.tasks.len(), after.tasks.len());
        assert!(!after.loading);
        assert!(after.last_error.is_some());

        // Recovery clears the indicator.
        backend.set_fail_reads(false);
        store.fetch(true).await;
        assert_eq!(store.last_error(), None);
    }

    #[tokio::test]
    async fn category_filter_and_sort_modes_shape_the_view() {
        let (_backend, store) = store_with_board().await;
        store.set_config(BoardConfig {
            visible_categories: Some(
                [crate::category::KitchenCategory::Beverages]
                    .into_iter()
                    .collect(),
            ),
            ..BoardConfig::default()
        });
        let view = store.tasks_view();
        assert_eq!(view.len(), 1);
        assert_eq!(view[0].product_name, "紅茶");

        store.set_config(BoardConfig {
            sort_mode: SortMode::NewestFirst,
            ..BoardConfig::default()
        });
        let view = store.tasks_view();
        assert_eq!(view.len(), 4);
        for pair in view.windows(2) {
            assert!(pair[0].created_at >= pair[1].created_at);
        }
    }

    #[tokio::test]
    async fn completion_stats_track_done_tasks() {
        let (_backend, store) = store_with_board().await;
        assert_eq!(
            store.completion_stats("order-1"),
            CompletionStats {
                completed: 0,
                total: 4
            }
        );
        store
            .set_task_status("item-9_g0", TaskStatus::Ready)
            .await
            .expect("write should succeed");
        assert_eq!(
            store.completion_stats("order-1"),
            CompletionStats {
                completed: 1,
                total: 4
            }
        );
    }
}
