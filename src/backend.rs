//! Persistence collaborator access.
//!
//! The engine talks to its backend through the `OrderBackend` trait so the
//! store and reconciler are testable without a network. The production
//! implementation speaks Supabase REST (`/rest/v1`) with apikey + Bearer
//! auth; an in-memory implementation backs development and tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode, Url};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

use crate::error::KdsError;
use crate::status::{OrderStatus, TaskStatus};

/// Default timeout for backend requests.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(20);

/// Order statuses the board fetches, in PostgREST `in.(...)` form.
const ACTIVE_STATUS_FILTER: &str = "in.(pending,confirmed,preparing,ready)";

/// Joined row shape for one board refresh: items with their product (name,
/// category) and any combo selections.
const ORDER_SELECT: &str =
    "*,order_items(*,products(name,prep_time_minutes,categories(name)),combo_selections(*))";

/// Backend operations the engine needs. Mutations are row-level writes; the
/// metadata document is read and written whole, with read-modify-write
/// sequencing owned by the caller.
#[async_trait]
pub trait OrderBackend: Send + Sync {
    /// Active orders (with joined items) created since `since`.
    async fn fetch_active_orders(&self, since: DateTime<Utc>) -> Result<Vec<Value>, KdsError>;

    async fn update_item_status(&self, item_id: &str, status: TaskStatus)
        -> Result<(), KdsError>;

    async fn update_order_status(
        &self,
        order_id: &str,
        status: OrderStatus,
    ) -> Result<(), KdsError>;

    /// Current metadata document for one order; `{}` when absent.
    async fn fetch_order_metadata(&self, order_id: &str) -> Result<Value, KdsError>;

    /// Replace the order's metadata document.
    async fn update_order_metadata(&self, order_id: &str, metadata: Value)
        -> Result<(), KdsError>;
}

// ---------------------------------------------------------------------------
// Supabase REST implementation
// ---------------------------------------------------------------------------

/// Connection settings for the Supabase backend, passed in as plain data by
/// the host application.
#[derive(Debug, Clone)]
pub struct SupabaseConfig {
    pub url: String,
    pub anon_key: String,
    pub restaurant_id: String,
}

#[derive(Debug)]
pub struct SupabaseBackend {
    config: SupabaseConfig,
    client: Client,
}

/// Convert a transport error into a user-friendly message.
fn friendly_error(url: &str, err: &reqwest::Error) -> String {
    if err.is_connect() {
        return format!("Cannot reach backend at {url}");
    }
    if err.is_timeout() {
        return format!("Connection to {url} timed out");
    }
    format!("Network error communicating with {url}: {err}")
}

/// Convert an HTTP status code into a user-friendly message.
fn status_error(status: StatusCode) -> String {
    match status.as_u16() {
        401 | 403 => "Backend key is invalid or expired".to_string(),
        404 => "Backend endpoint not found".to_string(),
        s if s >= 500 => format!("Backend server error (HTTP {s})"),
        s => format!("Unexpected backend response (HTTP {s})"),
    }
}

impl SupabaseBackend {
    pub fn new(config: SupabaseConfig) -> Result<Self, KdsError> {
        if config.url.trim().is_empty() || config.anon_key.trim().is_empty() {
            return Err(KdsError::Config("missing Supabase URL or anon key".into()));
        }
        let client = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .map_err(|e| KdsError::Config(format!("HTTP client error: {e}")))?;
        Ok(Self { config, client })
    }

    fn rest_url(&self, table: &str, params: &[(&str, String)]) -> Result<Url, KdsError> {
        let base = self.config.url.trim_end_matches('/');
        let mut url = Url::parse(&format!("{base}/rest/v1/{table}"))
            .map_err(|e| KdsError::Config(format!("invalid Supabase URL: {e}")))?;
        {
            let mut qp = url.query_pairs_mut();
            for (k, v) in params {
                qp.append_pair(k, v);
            }
        }
        Ok(url)
    }

    async fn get_rows(&self, table: &str, params: &[(&str, String)]) -> Result<Value, KdsError> {
        let url = self.rest_url(table, params)?;
        let display_url = url.as_str().to_string();
        let resp = self
            .client
            .get(url)
            .header("apikey", &self.config.anon_key)
            .header("Authorization", format!("Bearer {}", self.config.anon_key))
            .header("Content-Type", "application/json")
            .send()
            .await
            .map_err(|e| KdsError::DataFetch(friendly_error(&display_url, &e)))?;
        if !resp.status().is_success() {
            return Err(KdsError::DataFetch(status_error(resp.status())));
        }
        resp.json::<Value>()
            .await
            .map_err(|e| KdsError::DataFetch(format!("backend JSON parse error: {e}")))
    }

    async fn patch_rows(
        &self,
        table: &str,
        params: &[(&str, String)],
        body: Value,
    ) -> Result<(), KdsError> {
        let url = self.rest_url(table, params)?;
        let display_url = url.as_str().to_string();
        // Idempotency key for write tracing, in the manner of the POS sync
        // queue entries.
        let mutation_key = Uuid::new_v4().to_string();
        debug!(table = %table, mutation_key = %mutation_key, "backend patch");
        let resp = self
            .client
            .patch(url)
            .header("apikey", &self.config.anon_key)
            .header("Authorization", format!("Bearer {}", self.config.anon_key))
            .header("Content-Type", "application/json")
            .header("Prefer", "return=minimal")
            .json(&body)
            .send()
            .await
            .map_err(|e| KdsError::Mutation(friendly_error(&display_url, &e)))?;
        if !resp.status().is_success() {
            return Err(KdsError::Mutation(status_error(resp.status())));
        }
        Ok(())
    }
}

#[async_trait]
impl OrderBackend for SupabaseBackend {
    async fn fetch_active_orders(&self, since: DateTime<Utc>) -> Result<Vec<Value>, KdsError> {
        let rows = self
            .get_rows(
                "orders",
                &[
                    ("select", ORDER_SELECT.to_string()),
                    ("restaurant_id", format!("eq.{}", self.config.restaurant_id)),
                    ("status", ACTIVE_STATUS_FILTER.to_string()),
                    ("created_at", format!("gte.{}", since.to_rfc3339())),
                    ("order", "created_at.asc".to_string()),
                ],
            )
            .await?;
        Ok(rows.as_array().cloned().unwrap_or_default())
    }

    async fn update_item_status(
        &self,
        item_id: &str,
        status: TaskStatus,
    ) -> Result<(), KdsError> {
        self.patch_rows(
            "order_items",
            &[("id", format!("eq.{item_id}"))],
            serde_json::json!({
                "status": status.as_str(),
                "updated_at": Utc::now().to_rfc3339(),
            }),
        )
        .await
    }

    async fn update_order_status(
        &self,
        order_id: &str,
        status: OrderStatus,
    ) -> Result<(), KdsError> {
        self.patch_rows(
            "orders",
            &[("id", format!("eq.{order_id}"))],
            serde_json::json!({
                "status": status.as_str(),
                "updated_at": Utc::now().to_rfc3339(),
            }),
        )
        .await
    }

    async fn fetch_order_metadata(&self, order_id: &str) -> Result<Value, KdsError> {
        let rows = self
            .get_rows(
                "orders",
                &[
                    ("select", "metadata".to_string()),
                    ("id", format!("eq.{order_id}")),
                    ("limit", "1".to_string()),
                ],
            )
            .await?;
        Ok(rows
            .as_array()
            .and_then(|arr| arr.first())
            .and_then(|row| row.get("metadata"))
            .filter(|v| v.is_object())
            .cloned()
            .unwrap_or_else(|| serde_json::json!({})))
    }

    async fn update_order_metadata(
        &self,
        order_id: &str,
        metadata: Value,
    ) -> Result<(), KdsError> {
        self.patch_rows(
            "orders",
            &[("id", format!("eq.{order_id}"))],
            serde_json::json!({ "metadata": metadata }),
        )
        .await
    }
}

// ---------------------------------------------------------------------------
// In-memory implementation (development and tests)
// ---------------------------------------------------------------------------

/// In-memory backend. Orders are raw rows in the fetch shape; writes touch
/// the stored rows so a subsequent fetch reflects them. `fail_writes` makes
/// every mutation fail and `fail_reads` every read, for rollback and
/// outage tests; `stalled_item` makes one item's status write hang before
/// failing, for overlapping-write tests.
#[derive(Default)]
pub struct MemoryBackend {
    orders: Mutex<Vec<Value>>,
    metadata: Mutex<HashMap<String, Value>>,
    pub fail_writes: std::sync::atomic::AtomicBool,
    pub fail_reads: std::sync::atomic::AtomicBool,
    stalled_item: Mutex<Option<(String, Duration)>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed_order(&self, row: Value) {
        self.orders
            .lock()
            .expect("memory backend lock poisoned")
            .push(row);
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes
            .store(fail, std::sync::atomic::Ordering::SeqCst);
    }

    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads
            .store(fail, std::sync::atomic::Ordering::SeqCst);
    }

    /// Make the next status writes for `item_id` stall for `delay` and then
    /// fail; writes to other ids are unaffected.
    pub fn stall_item_write(&self, item_id: &str, delay: Duration) {
        *self
            .stalled_item
            .lock()
            .expect("memory backend lock poisoned") = Some((item_id.to_string(), delay));
    }

    fn check_writable(&self) -> Result<(), KdsError> {
        if self.fail_writes.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(KdsError::Mutation("backend write rejected".into()));
        }
        Ok(())
    }

    fn check_readable(&self) -> Result<(), KdsError> {
        if self.fail_reads.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(KdsError::DataFetch("backend unreachable".into()));
        }
        Ok(())
    }

    /// Overwrite one stored item row's raw status, bypassing the trait.
    /// Simulates out-of-band writes (another station, a stale replica).
    pub fn force_item_status(&self, item_id: &str, raw: &str) {
        let mut orders = self.orders.lock().expect("memory backend lock poisoned");
        for row in orders.iter_mut() {
            if let Some(items) = row.get_mut("order_items").and_then(Value::as_array_mut) {
                for item in items {
                    if item.get("id").and_then(Value::as_str) == Some(item_id) {
                        if let Some(obj) = item.as_object_mut() {
                            obj.insert("status".to_string(), Value::String(raw.to_string()));
                        }
                    }
                }
            }
        }
    }

    /// Stored metadata document for assertions in tests.
    pub fn metadata_for(&self, order_id: &str) -> Value {
        self.metadata
            .lock()
            .expect("memory backend lock poisoned")
            .get(order_id)
            .cloned()
            .unwrap_or_else(|| serde_json::json!({}))
    }

    /// Stored status string for one order row, for assertions in tests.
    pub fn order_status(&self, order_id: &str) -> Option<String> {
        self.orders
            .lock()
            .expect("memory backend lock poisoned")
            .iter()
            .find(|row| row.get("id").and_then(Value::as_str) == Some(order_id))
            .and_then(|row| row.get("status").and_then(Value::as_str))
            .map(str::to_string)
    }

    /// Stored status string for one item row, for assertions in tests.
    pub fn item_status(&self, item_id: &str) -> Option<String> {
        let orders = self.orders.lock().expect("memory backend lock poisoned");
        for row in orders.iter() {
            if let Some(items) = row.get("order_items").and_then(Value::as_array) {
                for item in items {
                    if item.get("id").and_then(Value::as_str) == Some(item_id) {
                        return item
                            .get("status")
                            .and_then(Value::as_str)
                            .map(str::to_string);
                    }
                }
            }
        }
        None
    }
}

#[async_trait]
impl OrderBackend for MemoryBackend {
    async fn fetch_active_orders(&self, _since: DateTime<Utc>) -> Result<Vec<Value>, KdsError> {
        self.check_readable()?;
        let metadata = self.metadata.lock().expect("memory backend lock poisoned");
        let orders = self.orders.lock().expect("memory backend lock poisoned");
        Ok(orders
            .iter()
            .cloned()
            .map(|mut row| {
                // Reflect metadata writes back into fetched rows, as the
                // real backend would.
                if let Some(id) = row.get("id").and_then(Value::as_str) {
                    if let Some(doc) = metadata.get(id) {
                        if let Some(obj) = row.as_object_mut() {
                            obj.insert("metadata".to_string(), doc.clone());
                        }
                    }
                }
                row
            })
            .collect())
    }

    async fn update_item_status(
        &self,
        item_id: &str,
        status: TaskStatus,
    ) -> Result<(), KdsError> {
        let stalled = self
            .stalled_item
            .lock()
            .expect("memory backend lock poisoned")
            .clone();
        if let Some((stalled_id, delay)) = stalled {
            if stalled_id == item_id {
                tokio::time::sleep(delay).await;
                return Err(KdsError::Mutation("backend write rejected".into()));
            }
        }
        self.check_writable()?;
        let mut orders = self.orders.lock().expect("memory backend lock poisoned");
        for row in orders.iter_mut() {
            if let Some(items) = row.get_mut("order_items").and_then(Value::as_array_mut) {
                for item in items {
                    if item.get("id").and_then(Value::as_str) == Some(item_id) {
                        if let Some(obj) = item.as_object_mut() {
                            obj.insert("status".to_string(), Value::String(status.as_str().into()));
                        }
                    }
                }
            }
        }
        Ok(())
    }

    async fn update_order_status(
        &self,
        order_id: &str,
        status: OrderStatus,
    ) -> Result<(), KdsError> {
        self.check_writable()?;
        let mut orders = self.orders.lock().expect("memory backend lock poisoned");
        for row in orders.iter_mut() {
            if row.get("id").and_then(Value::as_str) == Some(order_id) {
                if let Some(obj) = row.as_object_mut() {
                    obj.insert("status".to_string(), Value::String(status.as_str().into()));
                }
            }
        }
        Ok(())
    }

    async fn fetch_order_metadata(&self, order_id: &str) -> Result<Value, KdsError> {
        self.check_readable()?;
        Ok(self.metadata_for(order_id))
    }

    async fn update_order_metadata(
        &self,
        order_id: &str,
        metadata: Value,
    ) -> Result<(), KdsError> {
        self.check_writable()?;
        self.metadata
            .lock()
            .expect("memory backend lock poisoned")
            .insert(order_id.to_string(), metadata);
        Ok(())
    }
}
