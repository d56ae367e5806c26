//! Per-user frequency cap tracking.
//!
//! Windows are rolling: the first recorded impression opens a window that
//! expires one period later. Expired entries are treated as absent and
//! overwritten lazily on the next impression; there is no background sweep.
//!
//! The ledger is a soft limit. Independent slots may race on the same key and
//! momentarily exceed a cap; that is corrected on the next evaluation.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ad::CapPeriod;

/// One user's impression count for one ad within the current window.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ImpressionLedgerEntry {
    pub count: u32,
    pub window_start: DateTime<Utc>,
}

impl ImpressionLedgerEntry {
    fn is_expired(&self, period: CapPeriod, now: DateTime<Utc>) -> bool {
        now - self.window_start >= period.duration()
    }
}

/// In-memory rolling-window impression ledger keyed by (session, ad).
#[derive(Debug, Default)]
pub struct FrequencyCapTracker {
    ledger: Mutex<HashMap<(String, String), ImpressionLedgerEntry>>,
}

impl FrequencyCapTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Impressions recorded for `(session, ad)` in the current window.
    ///
    /// An expired or absent entry reads as zero.
    pub fn count(
        &self,
        session_id: &str,
        ad_id: &str,
        period: CapPeriod,
        now: DateTime<Utc>,
    ) -> u32 {
        let ledger = self.ledger.lock().unwrap_or_else(PoisonError::into_inner);
        match ledger.get(&(session_id.to_string(), ad_id.to_string())) {
            Some(entry) if !entry.is_expired(period, now) => entry.count,
            _ => 0,
        }
    }

    /// Record one genuine view impression.
    ///
    /// Called exactly once per recorded `view` event, never from eligibility
    /// checks. Opens a fresh window when the previous one has expired.
    pub fn record_impression(
        &self,
        session_id: &str,
        ad_id: &str,
        period: CapPeriod,
        now: DateTime<Utc>,
    ) {
        let mut ledger = self.ledger.lock().unwrap_or_else(PoisonError::into_inner);
        let key = (session_id.to_string(), ad_id.to_string());
        match ledger.get_mut(&key) {
            Some(entry) if !entry.is_expired(period, now) => {
                entry.count += 1;
            }
            _ => {
                ledger.insert(
                    key,
                    ImpressionLedgerEntry {
                        count: 1,
                        window_start: now,
                    },
                );
            }
        }
    }

    /// Number of live ledger keys, expired or not. Test/diagnostic helper.
    pub fn len(&self) -> usize {
        self.ledger
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn at_noon() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).single().expect("valid")
    }

    #[test]
    fn absent_entry_reads_zero() {
        let tracker = FrequencyCapTracker::new();
        assert_eq!(tracker.count("s1", "ad-1", CapPeriod::Day, at_noon()), 0);
    }

    #[test]
    fn impressions_accumulate_within_window() {
        let tracker = FrequencyCapTracker::new();
        let now = at_noon();
        tracker.record_impression("s1", "ad-1", CapPeriod::Day, now);
        tracker.record_impression("s1", "ad-1", CapPeriod::Day, now + Duration::hours(2));
        assert_eq!(
            tracker.count("s1", "ad-1", CapPeriod::Day, now + Duration::hours(3)),
            2
        );
    }

    #[test]
    fn expired_window_reads_zero_and_reopens() {
        let tracker = FrequencyCapTracker::new();
        let now = at_noon();
        tracker.record_impression("s1", "ad-1", CapPeriod::Hour, now);
        tracker.record_impression("s1", "ad-1", CapPeriod::Hour, now + Duration::minutes(30));
        assert_eq!(
            tracker.count("s1", "ad-1", CapPeriod::Hour, now + Duration::minutes(45)),
            2
        );

        // One hour after the window opened the entry is logically absent.
        let later = now + Duration::hours(1);
        assert_eq!(tracker.count("s1", "ad-1", CapPeriod::Hour, later), 0);

        // The next impression opens a fresh window.
        tracker.record_impression("s1", "ad-1", CapPeriod::Hour, later);
        assert_eq!(tracker.count("s1", "ad-1", CapPeriod::Hour, later), 1);
    }

    #[test]
    fn sessions_and_ads_are_tracked_independently() {
        let tracker = FrequencyCapTracker::new();
        assert!(tracker.is_empty());
        let now = at_noon();
        tracker.record_impression("s1", "ad-1", CapPeriod::Day, now);
        tracker.record_impression("s1", "ad-2", CapPeriod::Day, now);
        tracker.record_impression("s2", "ad-1", CapPeriod::Day, now);
        assert_eq!(tracker.count("s1", "ad-1", CapPeriod::Day, now), 1);
        assert_eq!(tracker.count("s1", "ad-2", CapPeriod::Day, now), 1);
        assert_eq!(tracker.count("s2", "ad-1", CapPeriod::Day, now), 1);
        assert_eq!(tracker.count("s2", "ad-2", CapPeriod::Day, now), 0);
    }
}
