//! Internal data model for the kitchen board.
//!
//! Orders and real tasks mirror persisted rows; virtual tasks exist only in
//! memory, synthesised from composite items on every decomposition pass.
//! Wire rows arrive as loosely-shaped JSON and are normalised by the
//! ingestor; everything past that boundary is typed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::category::KitchenCategory;
use crate::status::{OrderStatus, TaskStatus};

/// Key inside the order `metadata` document where decomposed child statuses
/// are persisted. The schema has no normalised table for virtual
/// sub-statuses, so the map lives in the free-form document:
/// `metadata.combo_progress[parent_item_id][child_task_id] = "status"`.
pub const METADATA_COMBO_PROGRESS: &str = "combo_progress";

/// One order as the board sees it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub id: String,
    #[serde(alias = "order_number")]
    pub order_number: String,
    #[serde(default, alias = "table_number")]
    pub table_number: Option<String>,
    pub status: OrderStatus,
    #[serde(alias = "created_at")]
    pub created_at: DateTime<Utc>,
    /// Free-form document; the only place non-normalised state persists.
    #[serde(default)]
    pub metadata: serde_json::Value,
}

/// A structured sub-row of a composite item: one selected component under a
/// combo rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComboSelection {
    #[serde(alias = "rule_id")]
    pub rule_id: String,
    #[serde(default, alias = "rule_label")]
    pub rule_label: Option<String>,
    #[serde(default, alias = "product_id")]
    pub product_id: Option<String>,
    #[serde(alias = "product_name")]
    pub product_name: String,
    pub quantity: i64,
    #[serde(default, alias = "additional_price")]
    pub additional_price: f64,
}

/// A normalised order-item row, pre-decomposition. Joined fields that were
/// missing on the wire stay `None`; classification falls back to heuristics.
#[derive(Debug, Clone)]
pub struct RawOrderItem {
    pub id: String,
    pub order_id: String,
    pub product_id: Option<String>,
    pub product_name: String,
    pub quantity: i64,
    pub status: TaskStatus,
    pub special_instructions: Option<String>,
    pub combo_id: Option<String>,
    pub priority_level: i64,
    pub category_name: Option<String>,
    /// Per-product prep estimate from the products join, when present.
    pub prep_time_minutes: Option<i64>,
    pub selections: Vec<ComboSelection>,
    pub created_at: DateTime<Utc>,
}

/// The unit the board operates on: either a real task backed 1:1 by an
/// order-item row, or a virtual task synthesised from one composite item.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    pub order_id: String,
    pub order_number: String,
    pub table_number: Option<String>,
    pub product_name: String,
    pub quantity: i64,
    pub category: KitchenCategory,
    pub status: TaskStatus,
    pub priority: i64,
    /// Per-product estimate; `None` means the 20-minute urgency default.
    pub estimated_minutes: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub is_virtual: bool,
    /// Real id of the composite item this virtual task was decomposed from.
    pub parent_combo_id: Option<String>,
}

impl Task {
    pub fn station(&self) -> &'static str {
        self.category.station()
    }
}

/// Per-order completion counts feeding the urgency ratio and the header row
/// of each order card.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionStats {
    pub completed: usize,
    pub total: usize,
}

impl CompletionStats {
    pub fn ratio(&self) -> f64 {
        if self.total == 0 {
            return 1.0;
        }
        self.completed as f64 / self.total as f64
    }
}

/// Board ordering selected in settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SortMode {
    #[default]
    OldestFirst,
    NewestFirst,
    UrgencyFirst,
}

/// Display configuration passed in from the settings collaborator as plain
/// data. Persisting it is out of scope here.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BoardConfig {
    /// Categories shown on the board; `None` shows everything.
    #[serde(default)]
    pub visible_categories: Option<HashSet<KitchenCategory>>,
    pub poll_interval_secs: u64,
    #[serde(default)]
    pub sort_mode: SortMode,
}

impl Default for BoardConfig {
    fn default() -> Self {
        Self {
            visible_categories: None,
            poll_interval_secs: 20,
            sort_mode: SortMode::default(),
        }
    }
}

impl BoardConfig {
    pub fn shows(&self, category: KitchenCategory) -> bool {
        match &self.visible_categories {
            Some(visible) => visible.contains(&category),
            None => true,
        }
    }
}
