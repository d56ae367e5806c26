//! Performance recording and the auto-pause controller.
//!
//! Events feed lifetime counters and the frequency ledger, and counter
//! updates feed back into eligibility: once `max_views` or `max_clicks` is
//! reached the ad transitions to paused with an automatic reason, persisted
//! through the repository.
//!
//! All writes are best-effort. A failed write is retried a configured number
//! of times and then dropped with a warning; the engine favors availability
//! of ad serving over exact accounting.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ad::{Advertisement, AUTO_PAUSE_PREFIX};
use crate::context::SlotContext;
use crate::frequency::FrequencyCapTracker;
use crate::repository::{AdRepository, CounterField};
use crate::settings::RecorderSettings;

/// Kind of a recorded performance event.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    /// Creative was injected into the page.
    Load,
    /// Creative is considered visible to the user.
    View,
    /// Explicit user interaction.
    Click,
}

/// Append-only record of one ad outcome. Never mutated after creation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PerformanceEvent {
    pub ad_id: String,
    pub kind: EventKind,
    pub at: DateTime<Utc>,
    pub page: String,
    pub session_id: String,
    /// Truncated user-agent fragment, when known.
    pub user_agent: Option<String>,
}

/// Records events, maintains counters and applies auto-pause.
pub struct PerformanceRecorder {
    repository: Arc<dyn AdRepository>,
    frequency: Arc<FrequencyCapTracker>,
    settings: RecorderSettings,
}

impl PerformanceRecorder {
    pub fn new(
        repository: Arc<dyn AdRepository>,
        frequency: Arc<FrequencyCapTracker>,
        settings: RecorderSettings,
    ) -> Self {
        PerformanceRecorder {
            repository,
            frequency,
            settings,
        }
    }

    /// Record one event for an ad.
    ///
    /// `load` only appends to the event log. `view` additionally increments
    /// the frequency ledger and `view_count`; `click` increments
    /// `click_count`. Counter updates may trigger auto-pause.
    pub async fn record(
        &self,
        ad: &Advertisement,
        kind: EventKind,
        ctx: &SlotContext,
        user_agent: Option<&str>,
    ) {
        let event = PerformanceEvent {
            ad_id: ad.id.clone(),
            kind,
            at: ctx.now,
            page: ctx.page.clone(),
            session_id: ctx.session_id.clone(),
            user_agent: user_agent.map(|ua| {
                ua.chars()
                    .take(self.settings.user_agent_fragment_len)
                    .collect()
            }),
        };
        self.persist_event(&event).await;

        match kind {
            EventKind::Load => {}
            EventKind::View => {
                if let Some(cap) = &ad.frequency_cap {
                    self.frequency.record_impression(
                        &ctx.session_id,
                        &ad.id,
                        cap.time_period,
                        ctx.now,
                    );
                }
                if let Some(count) = self.bump_counter(&ad.id, CounterField::Views).await {
                    self.maybe_auto_pause(ad, "max_views", count, ad.max_views, ctx.now)
                        .await;
                }
            }
            EventKind::Click => {
                if let Some(count) = self.bump_counter(&ad.id, CounterField::Clicks).await {
                    self.maybe_auto_pause(ad, "max_clicks", count, ad.max_clicks, ctx.now)
                        .await;
                }
            }
        }
    }

    /// Flip the ad to paused once a lifetime cap is reached.
    async fn maybe_auto_pause(
        &self,
        ad: &Advertisement,
        cap_name: &str,
        count: u64,
        cap: Option<u64>,
        at: DateTime<Utc>,
    ) {
        let max = match cap {
            Some(max) if count >= max => max,
            _ => return,
        };
        let reason = format!("{AUTO_PAUSE_PREFIX} {cap_name} reached ({count}/{max})");
        log::info!("Auto-pausing ad '{}': {reason}", ad.id);

        for attempt in 1..=self.attempts() {
            match self
                .repository
                .set_pause_state(&ad.id, true, Some(&reason), at)
                .await
            {
                Ok(()) => return,
                Err(err) => {
                    log::warn!(
                        "Failed to persist auto-pause for ad '{}' (attempt {attempt}): {err:?}",
                        ad.id
                    );
                }
            }
        }
        log::warn!(
            "Dropping auto-pause write for ad '{}' after {} attempts; will retry on next event",
            ad.id,
            self.attempts()
        );
    }

    async fn bump_counter(&self, ad_id: &str, field: CounterField) -> Option<u64> {
        for attempt in 1..=self.attempts() {
            match self.repository.increment_counter(ad_id, field).await {
                Ok(updated) => return Some(updated),
                Err(err) => {
                    log::warn!(
                        "Failed to persist {field:?} counter for ad '{ad_id}' (attempt {attempt}): {err:?}"
                    );
                }
            }
        }
        log::warn!(
            "Dropping {field:?} counter update for ad '{ad_id}' after {} attempts",
            self.attempts()
        );
        None
    }

    async fn persist_event(&self, event: &PerformanceEvent) {
        for attempt in 1..=self.attempts() {
            match self.repository.append_event(event).await {
                Ok(()) => return,
                Err(err) => {
                    log::warn!(
                        "Failed to append {:?} event for ad '{}' (attempt {attempt}): {err:?}",
                        event.kind,
                        event.ad_id
                    );
                }
            }
        }
        log::warn!(
            "Dropping {:?} event for ad '{}' after {} attempts",
            event.kind,
            event.ad_id,
            self.attempts()
        );
    }

    fn attempts(&self) -> u32 {
        self.settings.write_retries.max(1)
    }
}
