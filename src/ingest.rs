//! Order ingestion.
//!
//! Fetches active orders (with joined items, products and combo selections)
//! for the lookback window and normalises the loosely-shaped rows into the
//! internal model, decomposing composite items into virtual tasks along the
//! way. A fetch failure surfaces as one `DataFetch` error; a missing joined
//! field never aborts the batch - classification falls back to heuristics.

use chrono::{DateTime, NaiveTime, TimeZone, Utc};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::backend::OrderBackend;
use crate::combo;
use crate::error::KdsError;
use crate::model::{ComboSelection, Order, RawOrderItem, Task};
use crate::status::{OrderStatus, TaskStatus};
use crate::{value_i64, value_str};

/// One normalised board snapshot.
#[derive(Debug, Clone, Default)]
pub struct IngestResult {
    pub orders: Vec<Order>,
    pub tasks: Vec<Task>,
}

/// Start of yesterday (UTC). The extra day of lookback tolerates timezone
/// skew between the terminal and the backend.
pub fn default_lookback_start(now: DateTime<Utc>) -> DateTime<Utc> {
    let yesterday = (now - chrono::Duration::days(1)).date_naive();
    Utc.from_utc_datetime(&yesterday.and_time(NaiveTime::MIN))
}

pub struct OrderIngestor<B: OrderBackend> {
    backend: Arc<B>,
}

impl<B: OrderBackend> OrderIngestor<B> {
    pub fn new(backend: Arc<B>) -> Self {
        Self { backend }
    }

    /// Fetch and normalise one snapshot. `since` defaults to the start of
    /// yesterday.
    pub async fn ingest(&self, since: Option<DateTime<Utc>>) -> Result<IngestResult, KdsError> {
        let since = since.unwrap_or_else(|| default_lookback_start(Utc::now()));
        let rows = self.backend.fetch_active_orders(since).await?;
        let result = normalize_snapshot(&rows);
        debug!(
            orders = result.orders.len(),
            tasks = result.tasks.len(),
            "ingested board snapshot"
        );
        Ok(result)
    }
}

/// Normalise raw backend rows into orders and decomposed tasks. Rows with no
/// id are skipped with a warning; everything else degrades field by field.
pub fn normalize_snapshot(rows: &[Value]) -> IngestResult {
    let mut result = IngestResult::default();
    for row in rows {
        let Some(order) = normalize_order(row) else {
            warn!("order row without id, skipped");
            continue;
        };
        let items = row
            .get("order_items")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default();
        for item_row in items {
            let Some(item) = normalize_item(&order, item_row) else {
                warn!(order_id = %order.id, "order item row without id, skipped");
                continue;
            };
            if item.status == TaskStatus::Cancelled {
                continue;
            }
            result.tasks.extend(combo::decompose(&order, &item));
        }
        result.orders.push(order);
    }
    result
}

fn parse_timestamp(raw: Option<String>, fallback: DateTime<Utc>) -> DateTime<Utc> {
    raw.and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or(fallback)
}

fn normalize_order(row: &Value) -> Option<Order> {
    let id = value_str(row, &["id"])?;
    let order_number =
        value_str(row, &["order_number", "orderNumber"]).unwrap_or_else(|| id.clone());
    let status = OrderStatus::from_raw(&value_str(row, &["status"]).unwrap_or_default());
    let created_at = parse_timestamp(value_str(row, &["created_at", "createdAt"]), Utc::now());
    let metadata = row
        .get("metadata")
        .filter(|v| v.is_object())
        .cloned()
        .unwrap_or_else(|| serde_json::json!({}));
    Some(Order {
        id,
        order_number,
        table_number: value_str(row, &["table_number", "tableNumber"]),
        status,
        created_at,
        metadata,
    })
}

fn normalize_item(order: &Order, row: &Value) -> Option<RawOrderItem> {
    let id = value_str(row, &["id"])?;
    let product = row.get("products").filter(|v| v.is_object());
    let product_name = value_str(row, &["product_name", "productName"])
        .or_else(|| product.and_then(|p| value_str(p, &["name"])))
        .unwrap_or_else(|| "Item".to_string());
    let category_name = product
        .and_then(|p| p.get("categories"))
        .and_then(|c| value_str(c, &["name"]))
        .or_else(|| value_str(row, &["category_name", "categoryName"]));
    let prep_time_minutes = product
        .and_then(|p| value_i64(p, &["prep_time_minutes", "prepTimeMinutes"]))
        .or_else(|| value_i64(row, &["prep_time_minutes", "prepTimeMinutes"]));
    let selections = row
        .get("combo_selections")
        .and_then(Value::as_array)
        .map(|rows| {
            rows.iter()
                .filter_map(normalize_selection)
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();
    Some(RawOrderItem {
        id,
        order_id: order.id.clone(),
        product_id: value_str(row, &["product_id", "productId"]),
        product_name,
        quantity: value_i64(row, &["quantity"]).unwrap_or(1).max(1),
        status: TaskStatus::from_raw(&value_str(row, &["status"]).unwrap_or_default()),
        special_instructions: value_str(row, &["special_instructions", "specialInstructions"]),
        combo_id: value_str(row, &["combo_id", "comboId"]),
        priority_level: value_i64(row, &["priority_level", "priorityLevel"]).unwrap_or(0),
        category_name,
        prep_time_minutes,
        selections,
        created_at: parse_timestamp(
            value_str(row, &["created_at", "createdAt"]),
            order.created_at,
        ),
    })
}

fn normalize_selection(row: &Value) -> Option<ComboSelection> {
    let rule_id = value_str(row, &["rule_id", "ruleId"])?;
    Some(ComboSelection {
        rule_id,
        rule_label: value_str(row, &["rule_label", "ruleLabel", "rule_name", "ruleName"]),
        product_id: value_str(row, &["product_id", "productId", "selected_product_id"]),
        product_name: value_str(row, &["product_name", "productName", "selected_product_name"])
            .unwrap_or_else(|| "Item".to_string()),
        quantity: value_i64(row, &["quantity"]).unwrap_or(1).max(1),
        additional_price: crate::value_f64(row, &["additional_price", "additionalPrice"])
            .unwrap_or(0.0),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use crate::category::KitchenCategory;

    fn sample_order_row() -> Value {
        serde_json::json!({
            "id": "order-1",
            "order_number": "A-12",
            "table_number": "3",
            "status": "Preparing",
            "created_at": "2026-08-28T10:00:00+00:00",
            "metadata": {},
            "order_items": [
                {
                    "id": "item-1",
                    "quantity": 2,
                    "status": "pending",
                    "products": {
                        "name": "凱薩沙拉",
                        "prep_time_minutes": 6,
                        "categories": { "name": "前菜" }
                    }
                },
                {
                    "id": "item-2",
                    "product_name": "[套餐] Combo",
                    "status": "preparing",
                    "special_instructions": "主餐：牛排x1 | 飲品：紅茶x1"
                },
                {
                    "id": "item-3",
                    "product_name": "取消的菜",
                    "status": "cancelled"
                }
            ]
        })
    }

    #[test]
    fn snapshot_normalises_orders_items_and_virtual_tasks() {
        let result = normalize_snapshot(&[sample_order_row()]);
        assert_eq!(result.orders.len(), 1);
        assert_eq!(result.orders[0].status, OrderStatus::Preparing);

        // item-1 real, item-2 decomposed into two, item-3 cancelled out.
        assert_eq!(result.tasks.len(), 3);
        let real = &result.tasks[0];
        assert_eq!(real.id, "item-1");
        assert_eq!(real.category, KitchenCategory::Appetizers);
        assert_eq!(real.estimated_minutes, Some(6));
        assert!(result.tasks[1..].iter().all(|t| t.is_virtual));
    }

    #[test]
    fn missing_joined_fields_do_not_abort_the_batch() {
        let row = serde_json::json!({
            "id": "order-2",
            "status": "pending",
            "order_items": [
                { "id": "item-9", "product_name": "神秘料理", "status": "pending" },
                { "quantity": 1 }
            ]
        });
        let result = normalize_snapshot(&[row]);
        assert_eq!(result.orders.len(), 1);
        assert_eq!(result.tasks.len(), 1);
        assert_eq!(result.tasks[0].category, KitchenCategory::ALaCarte);
        assert_eq!(result.tasks[0].estimated_minutes, None);
    }

    #[test]
    fn lookback_starts_at_yesterday_midnight() {
        let now = DateTime::parse_from_rfc3339("2026-08-29T15:30:00+00:00")
            .expect("timestamp should parse")
            .with_timezone(&Utc);
        let since = default_lookback_start(now);
        assert_eq!(since.to_rfc3339(), "2026-08-28T00:00:00+00:00");
    }

    #[tokio::test]
    async fn ingestor_fetches_through_the_backend_seam() {
        let backend = Arc::new(MemoryBackend::new());
        backend.seed_order(sample_order_row());
        let ingestor = OrderIngestor::new(backend);
        let result = ingestor
            .ingest(None)
            .await
            .expect("ingest should succeed");
        assert_eq!(result.orders.len(), 1);
        assert_eq!(result.tasks.len(), 3);
    }
}
