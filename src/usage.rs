//! Monthly usage metering. Fire-and-forget from the router's point of view:
//! a metering failure is logged and swallowed, never surfaced to the caller.
//! Concurrent increments on the same organization/month are read-then-write
//! and accepted as eventually consistent.

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::Result;

#[async_trait]
pub trait UsageMeter: Send + Sync {
    async fn increment_usage(&self, organization_id: &str, image_generated: bool) -> Result<()>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MonthlyUsage {
    pub requests: u64,
    pub images: u64,
}

/// Counter store keyed by `organization:YYYY-MM`.
#[derive(Debug, Default)]
pub struct InMemoryMeter {
    counters: Mutex<HashMap<String, MonthlyUsage>>,
}

impl InMemoryMeter {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn usage(&self, organization_id: &str, month: &str) -> MonthlyUsage {
        let counters = self.counters.lock().await;
        counters
            .get(&usage_key(organization_id, month))
            .copied()
            .unwrap_or_default()
    }

    pub fn current_month() -> String {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        month_key(now.as_secs())
    }
}

#[async_trait]
impl UsageMeter for InMemoryMeter {
    async fn increment_usage(&self, organization_id: &str, image_generated: bool) -> Result<()> {
        let key = usage_key(organization_id, &Self::current_month());
        let mut counters = self.counters.lock().await;
        let entry = counters.entry(key).or_default();
        entry.requests += 1;
        if image_generated {
            entry.images += 1;
        }
        Ok(())
    }
}

/// Meter for callers that do not track usage (tests, anonymous demos).
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMeter;

#[async_trait]
impl UsageMeter for NoopMeter {
    async fn increment_usage(&self, _organization_id: &str, _image_generated: bool) -> Result<()> {
        Ok(())
    }
}

fn usage_key(organization_id: &str, month: &str) -> String {
    format!("{organization_id}:{month}")
}

/// `YYYY-MM` for a Unix timestamp, via the days-to-civil conversion
/// (Hinnant's algorithm); avoids pulling in a date crate for one key.
fn month_key(unix_secs: u64) -> String {
    let days = (unix_secs / 86_400) as i64;
    let z = days + 719_468;
    let era = z.div_euclid(146_097);
    let doe = z.rem_euclid(146_097);
    let yoe = (doe - doe / 1_460 + doe / 36_524 - doe / 146_096) / 365;
    let year = yoe + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let month = if mp < 10 { mp + 3 } else { mp - 9 };
    let year = if month <= 2 { year + 1 } else { year };
    format!("{year:04}-{month:02}")
}
