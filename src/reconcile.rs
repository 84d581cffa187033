//! Combo status reconciliation.
//!
//! A composite parent's status is a pure function of its decomposed
//! children: ready once every child is ready or served, preparing
//! otherwise. On any virtual task change the reconciler re-derives the
//! parent, persists the parent item's status field, and writes the full
//! sibling-status map into the order metadata document (the schema has no
//! normalised table for virtual sub-statuses).
//!
//! The metadata write is read-modify-write: two read-modify-write cycles on
//! the same order from different clients can still race and drop one
//! writer's children. Within one client the reconciler serialises those
//! cycles with a per-order lock; the cross-client case is an open product
//! decision recorded in DESIGN.md.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

use crate::backend::OrderBackend;
use crate::error::KdsError;
use crate::model::{Task, METADATA_COMBO_PROGRESS};
use crate::status::TaskStatus;

/// Derive a composite parent's status from its children: `Ready` iff every
/// sibling is ready or served, `Preparing` otherwise. An empty sibling set
/// never happens after decomposition but degrades to `Preparing`.
pub fn derive_parent_status<'a, I>(siblings: I) -> TaskStatus
where
    I: IntoIterator<Item = &'a TaskStatus>,
{
    let mut any = false;
    for status in siblings {
        any = true;
        match status {
            TaskStatus::Ready | TaskStatus::Served => {}
            TaskStatus::Pending
            | TaskStatus::Confirmed
            | TaskStatus::Preparing
            | TaskStatus::Cancelled => return TaskStatus::Preparing,
        }
    }
    if any {
        TaskStatus::Ready
    } else {
        TaskStatus::Preparing
    }
}

pub struct SyncReconciler<B: OrderBackend> {
    backend: Arc<B>,
    /// Serialises metadata read-modify-write cycles per order within this
    /// client. Entries live for the life of the store; a board session
    /// touches a bounded set of orders.
    order_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl<B: OrderBackend> SyncReconciler<B> {
    pub fn new(backend: Arc<B>) -> Self {
        Self {
            backend,
            order_locks: Mutex::new(HashMap::new()),
        }
    }

    fn order_lock(&self, order_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.order_locks.lock().expect("order lock map poisoned");
        locks
            .entry(order_id.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    /// Persist the outcome of one virtual task change. `siblings` is the
    /// latest known snapshot of every task sharing the parent, with the
    /// change already applied. Returns the derived parent status for
    /// immediate in-memory application.
    ///
    /// Replaying the same change recomputes from the same snapshot and
    /// writes the same values, so the operation is idempotent.
    pub async fn reconcile_virtual_change(
        &self,
        order_id: &str,
        parent_item_id: &str,
        siblings: &[Task],
    ) -> Result<TaskStatus, KdsError> {
        let lock = self.order_lock(order_id);
        let _guard = lock.lock().await;

        let derived = derive_parent_status(siblings.iter().map(|t| &t.status));
        debug!(
            order_id = %order_id,
            parent_item_id = %parent_item_id,
            derived = %derived,
            children = siblings.len(),
            "reconciling combo parent"
        );

        // Two sequential writes, not a transaction: parent row first, then
        // the sibling map in the metadata document.
        self.backend
            .update_item_status(parent_item_id, derived)
            .await?;

        let mut metadata = self.backend.fetch_order_metadata(order_id).await?;
        merge_child_statuses(&mut metadata, parent_item_id, siblings);
        self.backend
            .update_order_metadata(order_id, metadata)
            .await?;

        info!(
            order_id = %order_id,
            parent_item_id = %parent_item_id,
            status = %derived,
            "combo parent reconciled"
        );
        Ok(derived)
    }
}

/// Merge the sibling-status map for one parent into the metadata document,
/// leaving other parents' entries and unrelated metadata untouched.
fn merge_child_statuses(metadata: &mut Value, parent_item_id: &str, siblings: &[Task]) {
    if !metadata.is_object() {
        *metadata = serde_json::json!({});
    }
    let root = metadata.as_object_mut().expect("metadata forced to object");
    let progress = root
        .entry(METADATA_COMBO_PROGRESS.to_string())
        .or_insert_with(|| serde_json::json!({}));
    if !progress.is_object() {
        *progress = serde_json::json!({});
    }
    let children: serde_json::Map<String, Value> = siblings
        .iter()
        .map(|task| {
            (
                task.id.clone(),
                Value::String(task.status.as_str().to_string()),
            )
        })
        .collect();
    progress
        .as_object_mut()
        .expect("progress forced to object")
        .insert(parent_item_id.to_string(), Value::Object(children));
}
