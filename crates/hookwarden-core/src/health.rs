//! Per-hook health, derived from the failure record and recent stats.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::brake::FailureRecord;
use crate::monitor::HookStats;

/// Below this success rate a hook is unhealthy.
pub const UNHEALTHY_BELOW: f64 = 50.0;
/// Below this success rate a hook is degraded.
pub const DEGRADED_BELOW: f64 = 90.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
    Braked,
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Healthy => write!(f, "healthy"),
            Self::Degraded => write!(f, "degraded"),
            Self::Unhealthy => write!(f, "unhealthy"),
            Self::Braked => write!(f, "braked"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub hook: String,
    pub status: HealthStatus,
    pub consecutive_failures: u32,
    pub brake_until: Option<DateTime<Utc>>,
    pub success_rate: Option<f64>,
    pub reasons: Vec<String>,
}

pub fn assess(
    hook: &str,
    record: Option<&FailureRecord>,
    stats: &HookStats,
    now: DateTime<Utc>,
) -> HealthReport {
    let consecutive_failures = record.map_or(0, |r| r.consecutive_failures);
    let braked_until = record
        .filter(|r| r.is_braked_at(now))
        .and_then(|r| r.brake_until);
    let mut reasons = Vec::new();

    let status = if let Some(until) = braked_until {
        reasons.push(format!("emergency brake active until {}", until.to_rfc3339()));
        HealthStatus::Braked
    } else {
        let mut status = HealthStatus::Healthy;
        if consecutive_failures > 0 {
            reasons.push(format!("{consecutive_failures} consecutive failure(s)"));
            status = HealthStatus::Degraded;
        }
        if let Some(rate) = stats.success_rate {
            if rate < UNHEALTHY_BELOW {
                reasons.push(format!("success rate {rate:.1}% below {UNHEALTHY_BELOW}%"));
                status = HealthStatus::Unhealthy;
            } else if rate < DEGRADED_BELOW {
                reasons.push(format!("success rate {rate:.1}% below {DEGRADED_BELOW}%"));
                status = status.max(HealthStatus::Degraded);
            }
        }
        status
    };

    HealthReport {
        hook: hook.to_string(),
        status,
        consecutive_failures,
        brake_until: braked_until,
        success_rate: stats.success_rate,
        reasons,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::compute_stats;
    use chrono::Duration;

    fn stats_with_rate(rate: Option<f64>) -> HookStats {
        HookStats {
            success_rate: rate,
            ..compute_stats(Some("quality-check"), 7, &[])
        }
    }

    fn failures(count: u32, brake_until: Option<DateTime<Utc>>) -> FailureRecord {
        FailureRecord {
            consecutive_failures: count,
            last_failure: Utc::now(),
            brake_active: brake_until.is_some(),
            brake_until,
        }
    }

    #[test]
    fn test_no_data_is_healthy() {
        let report = assess("quality-check", None, &stats_with_rate(None), Utc::now());
        assert_eq!(report.status, HealthStatus::Healthy);
        assert!(report.reasons.is_empty());
    }

    #[test]
    fn test_success_rate_bands() {
        let now = Utc::now();
        let cases = [
            (95.0, HealthStatus::Healthy),
            (90.0, HealthStatus::Healthy),
            (75.0, HealthStatus::Degraded),
            (49.9, HealthStatus::Unhealthy),
        ];
        for (rate, expected) in cases {
            let report = assess("h", None, &stats_with_rate(Some(rate)), now);
            assert_eq!(report.status, expected, "rate {rate}");
        }
    }

    #[test]
    fn test_consecutive_failures_degrade() {
        let record = failures(2, None);
        let report = assess("h", Some(&record), &stats_with_rate(Some(100.0)), Utc::now());
        assert_eq!(report.status, HealthStatus::Degraded);
        assert_eq!(report.consecutive_failures, 2);
    }

    #[test]
    fn test_active_brake_wins() {
        let now = Utc::now();
        let record = failures(5, Some(now + Duration::minutes(10)));
        let report = assess("h", Some(&record), &stats_with_rate(Some(10.0)), now);
        assert_eq!(report.status, HealthStatus::Braked);
        assert!(report.brake_until.is_some());
    }

    #[test]
    fn test_expired_brake_is_not_braked() {
        let now = Utc::now();
        let record = failures(5, Some(now - Duration::minutes(1)));
        let report = assess("h", Some(&record), &stats_with_rate(Some(100.0)), now);
        assert_eq!(report.status, HealthStatus::Degraded);
        assert!(report.brake_until.is_none());
    }
}
