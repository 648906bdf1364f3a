//! Subscription-aware access evaluation.
//!
//! The evaluator is a pure classifier over the global subscription-mode
//! flag, the caller identity and the caller's subscription row. It is
//! recomputed on every page-list read; nothing here is memoized and nothing
//! here touches storage.

use crate::db::Subscription;
use crate::error::Result;
use serde::Serialize;

/// Pages visible to authenticated callers without an active subscription.
pub const FREE_PREVIEW_PAGES: i64 = 3;

/// Setting key for the global subscription-mode flag.
pub const SUBSCRIPTION_MODE_KEY: &str = "subscription_mode_enabled";

/// Read-only access to site settings, injectable so tests can substitute a
/// fixed value without a datastore.
pub trait SettingsReader {
    /// Read a boolean setting; missing keys read as false.
    fn get_bool(&self, key: &str) -> Result<bool>;
}

impl SettingsReader for crate::db::Database {
    fn get_bool(&self, key: &str) -> Result<bool> {
        self.get_setting_bool(key)
    }
}

/// The four terminal access classifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessType {
    /// Subscription mode is off; everyone sees everything.
    Open,
    /// Subscription mode is on and the caller is anonymous.
    Unauthenticated,
    /// Authenticated caller without an active subscription.
    NoSubscription,
    /// Active subscription on the free tier.
    FreePlan,
    /// Active paid subscription.
    Premium,
}

/// How many pages a caller may see.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageAllowance {
    /// No cap.
    Unlimited,
    /// At most this many pages, from page 1.
    Limited(i64),
}

impl PageAllowance {
    /// API representation: -1 means unlimited.
    pub fn as_i64(&self) -> i64 {
        match self {
            PageAllowance::Unlimited => -1,
            PageAllowance::Limited(n) => *n,
        }
    }

    /// Truncate a page list to this allowance. An allowance beyond the list
    /// length returns the whole list.
    pub fn apply<T>(&self, pages: Vec<T>) -> Vec<T> {
        match self {
            PageAllowance::Unlimited => pages,
            PageAllowance::Limited(n) => {
                let keep = (*n).max(0) as usize;
                pages.into_iter().take(keep).collect()
            }
        }
    }
}

/// Per-request access decision. Transient; never persisted.
#[derive(Debug, Clone, Copy)]
pub struct AccessDecision {
    /// Whether the caller sees the full edition.
    pub can_access: bool,
    /// Terminal classification.
    pub access_type: AccessType,
    /// Whether an active subscription backs the decision.
    pub is_subscriber: bool,
    /// Whether that subscription is the free tier.
    pub is_free_plan: bool,
    /// Page cap for the response.
    pub allowance: PageAllowance,
}

/// Classify a caller. Pure: the outcome depends only on the arguments.
///
/// `subscription` is the caller's most recent subscription row, if any;
/// activity (status and period end) is decided here against `now`.
pub fn evaluate(
    subscription_mode_enabled: bool,
    caller_id: Option<&str>,
    subscription: Option<&Subscription>,
    now: i64,
) -> AccessDecision {
    if !subscription_mode_enabled {
        return AccessDecision {
            can_access: true,
            access_type: AccessType::Open,
            is_subscriber: false,
            is_free_plan: false,
            allowance: PageAllowance::Unlimited,
        };
    }

    if caller_id.is_none() {
        return AccessDecision {
            can_access: false,
            access_type: AccessType::Unauthenticated,
            is_subscriber: false,
            is_free_plan: false,
            allowance: PageAllowance::Limited(0),
        };
    }

    let active = subscription.filter(|s| s.is_active(now));

    match active {
        None => AccessDecision {
            can_access: false,
            access_type: AccessType::NoSubscription,
            is_subscriber: false,
            is_free_plan: false,
            allowance: PageAllowance::Limited(FREE_PREVIEW_PAGES),
        },
        Some(sub) => AccessDecision {
            can_access: true,
            access_type: if sub.plan_is_free {
                AccessType::FreePlan
            } else {
                AccessType::Premium
            },
            is_subscriber: true,
            is_free_plan: sub.plan_is_free,
            allowance: PageAllowance::Unlimited,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Subscription;

    fn sub(status: &str, period_end: Option<i64>, free: bool) -> Subscription {
        Subscription {
            user_id: "user-1".to_string(),
            status: status.to_string(),
            current_period_end: period_end,
            plan_is_free: free,
            created_at: 0,
        }
    }

    #[test]
    fn mode_off_is_open_for_everyone() {
        for caller in [None, Some("user-1")] {
            let decision = evaluate(false, caller, None, 1000);
            assert_eq!(decision.access_type, AccessType::Open);
            assert!(decision.can_access);
            assert_eq!(decision.allowance, PageAllowance::Unlimited);
        }

        // Even an expired subscription row changes nothing when mode is off
        let expired = sub("active", Some(500), false);
        let decision = evaluate(false, Some("user-1"), Some(&expired), 1000);
        assert_eq!(decision.access_type, AccessType::Open);
    }

    #[test]
    fn anonymous_caller_gets_zero_pages() {
        let decision = evaluate(true, None, None, 1000);
        assert_eq!(decision.access_type, AccessType::Unauthenticated);
        assert!(!decision.can_access);
        assert_eq!(decision.allowance, PageAllowance::Limited(0));
    }

    #[test]
    fn no_subscription_gets_free_preview() {
        let decision = evaluate(true, Some("user-1"), None, 1000);
        assert_eq!(decision.access_type, AccessType::NoSubscription);
        assert!(!decision.can_access);
        assert_eq!(decision.allowance, PageAllowance::Limited(FREE_PREVIEW_PAGES));
    }

    #[test]
    fn expired_subscription_counts_as_none() {
        let expired = sub("active", Some(500), false);
        let decision = evaluate(true, Some("user-1"), Some(&expired), 1000);
        assert_eq!(decision.access_type, AccessType::NoSubscription);

        let canceled = sub("canceled", None, false);
        let decision = evaluate(true, Some("user-1"), Some(&canceled), 1000);
        assert_eq!(decision.access_type, AccessType::NoSubscription);
    }

    #[test]
    fn active_subscription_is_premium() {
        let active = sub("active", Some(2000), false);
        let decision = evaluate(true, Some("user-1"), Some(&active), 1000);
        assert_eq!(decision.access_type, AccessType::Premium);
        assert!(decision.can_access);
        assert!(decision.is_subscriber);
        assert!(!decision.is_free_plan);
        assert_eq!(decision.allowance, PageAllowance::Unlimited);
    }

    #[test]
    fn trialing_without_period_end_is_active() {
        let trialing = sub("trialing", None, false);
        let decision = evaluate(true, Some("user-1"), Some(&trialing), 1000);
        assert_eq!(decision.access_type, AccessType::Premium);
    }

    #[test]
    fn free_plan_subscription_is_free_plan() {
        let free = sub("active", None, true);
        let decision = evaluate(true, Some("user-1"), Some(&free), 1000);
        assert_eq!(decision.access_type, AccessType::FreePlan);
        assert!(decision.can_access);
        assert!(decision.is_free_plan);
        assert_eq!(decision.allowance, PageAllowance::Unlimited);
    }

    #[test]
    fn every_combination_classifies() {
        // Totality: every (mode, caller, subscription) combination lands in
        // exactly one of the terminal classifications.
        let subs = [
            None,
            Some(sub("active", None, false)),
            Some(sub("active", None, true)),
            Some(sub("canceled", None, false)),
            Some(sub("active", Some(1), false)),
        ];

        for mode in [false, true] {
            for caller in [None, Some("user-1")] {
                for s in &subs {
                    let decision = evaluate(mode, caller, s.as_ref(), 1000);
                    let expected_limited = matches!(
                        decision.access_type,
                        AccessType::Unauthenticated | AccessType::NoSubscription
                    );
                    assert_eq!(!decision.can_access, expected_limited);
                }
            }
        }
    }

    #[test]
    fn allowance_truncates_exactly() {
        let pages: Vec<i64> = (1..=10).collect();
        assert_eq!(
            PageAllowance::Limited(3).apply(pages.clone()),
            vec![1, 2, 3]
        );
        assert_eq!(PageAllowance::Limited(0).apply(pages.clone()), Vec::<i64>::new());
        assert_eq!(PageAllowance::Unlimited.apply(pages.clone()).len(), 10);

        // Allowance past the end returns everything, no padding
        assert_eq!(PageAllowance::Limited(25).apply(pages).len(), 10);
    }
}
