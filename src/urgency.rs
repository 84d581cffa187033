//! Urgency signals.
//!
//! Derived on every refresh from elapsed time, per-task estimates and order
//! completion ratios; never cached beyond one refresh interval. Urgency is
//! a display prioritisation signal only.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{CompletionStats, Task};

/// Minutes allowed before a task with no estimate of its own turns urgent.
pub const DEFAULT_TASK_BUDGET_MINUTES: i64 = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Urgency {
    Low,
    Medium,
    High,
}

/// Per-task urgency: high once elapsed time exceeds the task's own estimate
/// (or the 20-minute default), low before that.
pub fn task_urgency(task: &Task, now: DateTime<Utc>) -> Urgency {
    let elapsed = elapsed_minutes(task.created_at, now);
    let budget = task
        .estimated_minutes
        .unwrap_or(DEFAULT_TASK_BUDGET_MINUTES);
    if elapsed > budget {
        Urgency::High
    } else {
        Urgency::Low
    }
}

/// Per-order urgency from elapsed minutes and completion ratio.
pub fn order_urgency(created_at: DateTime<Utc>, stats: CompletionStats, now: DateTime<Utc>) -> Urgency {
    let elapsed = elapsed_minutes(created_at, now);
    let ratio = stats.ratio();
    if elapsed > 45 && ratio < 0.5 {
        Urgency::High
    } else if elapsed > 20 && ratio < 0.75 {
        Urgency::Medium
    } else {
        Urgency::Low
    }
}

fn elapsed_minutes(created_at: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    (now - created_at).num_minutes().max(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::category::KitchenCategory;
    use crate::status::TaskStatus;
    use chrono::Duration;

    fn task_created(minutes_ago: i64, estimate: Option<i64>) -> (Task, DateTime<Utc>) {
        let now = Utc::now();
        let task = Task {
            id: "item-1".into(),
            order_id: "order-1".into(),
            order_number: "A-17".into(),
            table_number: Some("5".into()),
            product_name: "牛排".into(),
            quantity: 1,
            category: KitchenCategory::MainCourse,
            status: TaskStatus::Preparing,
            priority: 0,
            estimated_minutes: estimate,
            created_at: now - Duration::minutes(minutes_ago),
            is_virtual: false,
            parent_combo_id: None,
        };
        (task, now)
    }

    #[test]
    fn task_without_estimate_uses_twenty_minute_default() {
        let (task, now) = task_created(10, None);
        assert_eq!(task_urgency(&task, now), Urgency::Low);
        let (task, now) = task_created(35, None);
        assert_eq!(task_urgency(&task, now), Urgency::High);
    }

    #[test]
    fn task_estimate_overrides_default_budget() {
        let (task, now) = task_created(10, Some(5));
        assert_eq!(task_urgency(&task, now), Urgency::High);
        let (task, now) = task_created(10, Some(30));
        assert_eq!(task_urgency(&task, now), Urgency::Low);
    }

    fn order_urgency_at(elapsed: i64, completed: usize, total: usize) -> Urgency {
        let now = Utc::now();
        order_urgency(
            now - Duration::minutes(elapsed),
            CompletionStats { completed, total },
            now,
        )
    }

    #[test]
    fn stalled_old_order_is_high() {
        assert_eq!(order_urgency_at(50, 4, 10), Urgency::High);
    }

    #[test]
    fn nearly_complete_old_order_is_low() {
        assert_eq!(order_urgency_at(50, 9, 10), Urgency::Low);
    }

    #[test]
    fn medium_band_covers_ageing_incomplete_orders() {
        assert_eq!(order_urgency_at(35, 5, 10), Urgency::Medium);
        assert_eq!(order_urgency_at(25, 6, 10), Urgency::Medium);
        // A finished order never nags, however old.
        assert_eq!(order_urgency_at(25, 10, 10), Urgency::Low);
        assert_eq!(order_urgency_at(15, 0, 10), Urgency::Low);
    }

    #[test]
    fn urgency_is_monotonic_in_elapsed_time() {
        // Fixed completion ratio, increasing age: the signal never drops.
        let mut last = Urgency::Low;
        for elapsed in [0, 10, 21, 25, 31, 40, 46, 90] {
            let urgency = order_urgency_at(elapsed, 2, 10);
            assert!(urgency >= last, "urgency regressed at {elapsed} minutes");
            last = urgency;
        }
    }
}
