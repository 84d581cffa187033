//! Combo decomposition.
//!
//! Expands one composite order line into independently trackable virtual
//! tasks. Two sources exist: structured combo-selection rows, and a legacy
//! free-text encoding stored in `special_instructions` by the old ordering
//! client. Each source sits behind its own `ComboSourceParser` so the
//! legacy path can be deleted once that data is migrated.
//!
//! Virtual ids are deterministic and stable across re-fetches:
//! `{parent}_component_{i}` for structured rows, `{parent}_g{n}` for parsed
//! text. Repeated decomposition of the same row must always yield the same
//! id set; the snapshot merge in the store depends on it.

use regex::Regex;
use std::collections::HashMap;
use std::sync::OnceLock;
use tracing::{debug, warn};

use crate::category::{self, KitchenCategory};
use crate::model::{Order, RawOrderItem, Task, METADATA_COMBO_PROGRESS};
use crate::status::TaskStatus;

/// One decomposed component before it becomes a task.
#[derive(Debug, Clone, PartialEq)]
pub struct VirtualComponent {
    /// Full deterministic task id, parent id included.
    pub id: String,
    pub name: String,
    pub quantity: i64,
    pub category: KitchenCategory,
}

/// A source of decomposed components for one composite item.
pub trait ComboSourceParser {
    /// Parse the item into components. Empty output means this source does
    /// not apply (or the data is unusable) and the next source is tried.
    fn parse(&self, item: &RawOrderItem) -> Vec<VirtualComponent>;
}

// ---------------------------------------------------------------------------
// Structured source: combo_selection rows
// ---------------------------------------------------------------------------

/// Parser over structured `ComboSelection` rows joined under the item.
pub struct StructuredParser;

impl ComboSourceParser for StructuredParser {
    fn parse(&self, item: &RawOrderItem) -> Vec<VirtualComponent> {
        item.selections
            .iter()
            .enumerate()
            .map(|(index, selection)| VirtualComponent {
                id: format!("{}_component_{}", item.id, index),
                name: selection.product_name.clone(),
                quantity: selection.quantity.max(1),
                category: category::classify(
                    selection.rule_label.as_deref(),
                    &selection.product_name,
                ),
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Legacy source: free-text group encoding
// ---------------------------------------------------------------------------

/// Parser for the legacy `special_instructions` encoding: groups separated
/// by `|` or newline, each `Header: Name1xQty1 Name2xQty2 ...`. Tokens that
/// fail the `NamexQty` pattern are dropped, not errored; legacy data is
/// permitted to be partially malformed.
pub struct LegacyTextParser;

fn token_regex() -> &'static Regex {
    static TOKEN: OnceLock<Regex> = OnceLock::new();
    // Case-insensitive 'x', full-width '×' also seen in the wild.
    TOKEN.get_or_init(|| Regex::new(r"^(?P<name>.+?)[xX×](?P<qty>\d+)$").expect("token pattern"))
}

fn split_group_header(group: &str) -> Option<(&str, &str)> {
    // ASCII and full-width colons both occur in legacy rows; the header ends
    // at whichever comes first, so a stray colon later in the body cannot
    // swallow the tokens before it.
    let (pos, sep) = [':', '：']
        .into_iter()
        .filter_map(|sep| group.find(sep).map(|pos| (pos, sep)))
        .min_by_key(|&(pos, _)| pos)?;
    let header = group[..pos].trim();
    let body = group[pos + sep.len_utf8()..].trim();
    if header.is_empty() {
        return None;
    }
    Some((header, body))
}

impl ComboSourceParser for LegacyTextParser {
    fn parse(&self, item: &RawOrderItem) -> Vec<VirtualComponent> {
        let Some(text) = item.special_instructions.as_deref() else {
            return Vec::new();
        };
        let mut components = Vec::new();
        let mut token_index = 0usize;
        for group in text.split(['|', '\n']) {
            let group = group.trim();
            if group.is_empty() {
                continue;
            }
            let Some((header, body)) = split_group_header(group) else {
                debug!(item_id = %item.id, group = %group, "combo group without header, skipped");
                continue;
            };
            let group_category = category::classify_group_header(header);
            for token in body.split_whitespace() {
                match token_regex().captures(token) {
                    Some(caps) => {
                        let name = caps["name"].trim().to_string();
                        let quantity = caps["qty"].parse::<i64>().unwrap_or(1).max(1);
                        components.push(VirtualComponent {
                            id: format!("{}_g{}", item.id, token_index),
                            name,
                            quantity,
                            category: group_category,
                        });
                        token_index += 1;
                    }
                    None => {
                        warn!(
                            item_id = %item.id,
                            token = %token,
                            "malformed legacy combo token, dropped"
                        );
                    }
                }
            }
        }
        components
    }
}

// ---------------------------------------------------------------------------
// Decomposer
// ---------------------------------------------------------------------------

/// Expand one raw order-item into board tasks: either the single real task,
/// or the list of virtual tasks decomposed from it - never both.
pub fn decompose(order: &Order, item: &RawOrderItem) -> Vec<Task> {
    let components = if !item.selections.is_empty() {
        StructuredParser.parse(item)
    } else {
        LegacyTextParser.parse(item)
    };

    if components.is_empty() {
        // Not a combo, or unparsable legacy text: the composite line must
        // not disappear from the board.
        return vec![real_task(order, item)];
    }

    let persisted = persisted_child_statuses(order, &item.id);
    components
        .into_iter()
        .map(|component| {
            let status = persisted
                .get(&component.id)
                .copied()
                .unwrap_or(item.status);
            Task {
                id: component.id,
                order_id: order.id.clone(),
                order_number: order.order_number.clone(),
                table_number: order.table_number.clone(),
                product_name: component.name,
                quantity: component.quantity,
                category: component.category,
                status,
                priority: item.priority_level,
                estimated_minutes: None,
                created_at: item.created_at,
                is_virtual: true,
                parent_combo_id: Some(item.id.clone()),
            }
        })
        .collect()
}

fn real_task(order: &Order, item: &RawOrderItem) -> Task {
    Task {
        id: item.id.clone(),
        order_id: order.id.clone(),
        order_number: order.order_number.clone(),
        table_number: order.table_number.clone(),
        product_name: item.product_name.clone(),
        quantity: item.quantity,
        category: category::classify(item.category_name.as_deref(), &item.product_name),
        status: item.status,
        priority: item.priority_level,
        estimated_minutes: item.prep_time_minutes,
        created_at: item.created_at,
        is_virtual: false,
        parent_combo_id: None,
    }
}

/// Child statuses previously reconciled into the order metadata document,
/// keyed by virtual task id. Deterministic ids make this lookup stable
/// across re-fetches.
fn persisted_child_statuses(order: &Order, parent_item_id: &str) -> HashMap<String, TaskStatus> {
    order
        .metadata
        .get(METADATA_COMBO_PROGRESS)
        .and_then(|progress| progress.get(parent_item_id))
        .and_then(|map| map.as_object())
        .map(|map| {
            map.iter()
                .filter_map(|(child_id, status)| {
                    status
                        .as_str()
                        .map(|raw| (child_id.clone(), TaskStatus::from_raw(raw)))
                })
                .collect()
        })
        .unwrap_or_default()
}
