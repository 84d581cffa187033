//! Kitchen display reconciliation engine.
//!
//! Turns raw order/order-item rows into a live task board: composite
//! ("combo") items decompose into independently trackable virtual tasks,
//! parent and child statuses stay consistent under concurrent edits, and
//! every board mutation is optimistic with rollback on backend failure.
//!
//! The host wires it up in three steps: construct an [`backend::OrderBackend`]
//! (Supabase REST in production, [`backend::MemoryBackend`] in tests),
//! build a [`store::TaskStore`] around it, and drive refreshes either
//! manually or with [`poll::start_refresh_loop`].

pub mod backend;
pub mod category;
pub mod combo;
pub mod error;
pub mod ingest;
pub mod model;
pub mod poll;
pub mod reconcile;
pub mod status;
pub mod store;
pub mod telemetry;
pub mod urgency;

pub use backend::{MemoryBackend, OrderBackend, SupabaseBackend, SupabaseConfig};
pub use category::KitchenCategory;
pub use error::KdsError;
pub use model::{BoardConfig, CompletionStats, Order, SortMode, Task};
pub use status::{OrderStatus, TaskStatus};
pub use store::{BoardSnapshot, TaskStore};
pub use urgency::Urgency;

/// First non-empty string under any of `keys`, trimmed. Backend rows mix
/// snake_case and camelCase key spellings depending on which client wrote
/// them, so lookups take the full alias list.
pub(crate) fn value_str(v: &serde_json::Value, keys: &[&str]) -> Option<String> {
    for key in keys {
        if let Some(s) = v.get(*key).and_then(|x| x.as_str()) {
            let trimmed = s.trim();
            if !trimmed.is_empty() {
                return Some(trimmed.to_string());
            }
        }
    }
    None
}

pub(crate) fn value_f64(v: &serde_json::Value, keys: &[&str]) -> Option<f64> {
    for key in keys {
        if let Some(n) = v.get(*key).and_then(|x| x.as_f64()) {
            return Some(n);
        }
    }
    None
}

pub(crate) fn value_i64(v: &serde_json::Value, keys: &[&str]) -> Option<i64> {
    for key in keys {
        if let Some(n) = v.get(*key).and_then(|x| x.as_i64()) {
            return Some(n);
        }
    }
    None
}
