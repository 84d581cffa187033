//! Canonical order and task statuses.
//!
//! Persisted rows carry loosely-typed status strings written by several
//! generations of clients. Everything entering the engine is canonicalised
//! here into closed sum types; no other module compares status strings.
//! Unrecognised input maps to `Pending` rather than failing the batch.

use serde::{Deserialize, Serialize};

/// Lifecycle status of an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Confirmed,
    Preparing,
    Ready,
    Served,
    Completed,
    Cancelled,
}

/// Status of a single preparation task (real or virtual).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Confirmed,
    Preparing,
    Ready,
    Served,
    Cancelled,
}

/// Normalise a raw status string to its storage form: trimmed, lowercased,
/// with the synonyms older clients wrote mapped onto the canonical set.
fn normalize_raw(raw: &str) -> String {
    match raw.trim().to_lowercase().as_str() {
        "approved" => "confirmed".to_string(),
        "declined" | "rejected" | "canceled" => "cancelled".to_string(),
        other => other.to_string(),
    }
}

impl OrderStatus {
    pub fn from_raw(raw: &str) -> Self {
        match normalize_raw(raw).as_str() {
            "pending" => Self::Pending,
            "confirmed" => Self::Confirmed,
            "preparing" => Self::Preparing,
            "ready" => Self::Ready,
            "served" => Self::Served,
            "completed" => Self::Completed,
            "cancelled" => Self::Cancelled,
            _ => Self::Pending,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Confirmed => "confirmed",
            Self::Preparing => "preparing",
            Self::Ready => "ready",
            Self::Served => "served",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Statuses the board fetches and displays. Served/completed/cancelled
    /// orders are terminal for the kitchen.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            Self::Pending | Self::Confirmed | Self::Preparing | Self::Ready
        )
    }
}

impl TaskStatus {
    pub fn from_raw(raw: &str) -> Self {
        match normalize_raw(raw).as_str() {
            "pending" => Self::Pending,
            "confirmed" => Self::Confirmed,
            "preparing" => Self::Preparing,
            "ready" => Self::Ready,
            "served" => Self::Served,
            "cancelled" => Self::Cancelled,
            _ => Self::Pending,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Confirmed => "confirmed",
            Self::Preparing => "preparing",
            Self::Ready => "ready",
            Self::Served => "served",
            Self::Cancelled => "cancelled",
        }
    }

    /// Done for kitchen purposes: plated and waiting, or already handed off.
    pub fn is_done(&self) -> bool {
        matches!(self, Self::Ready | Self::Served)
    }

    /// The status a toggle action moves this task to: done tasks drop back
    /// to the working state, everything else completes to ready.
    pub fn toggle_target(&self) -> Self {
        if self.is_done() {
            Self::Preparing
        } else {
            Self::Ready
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
