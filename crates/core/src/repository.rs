//! Repository seam between the engine and the hosting application's store.
//!
//! The engine owns no persistence technology. Hosts implement
//! [`AdRepository`] over whatever backs their ad records; the bundled
//! [`InMemoryAdRepository`] serves tests and embedded single-process hosts.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use error_stack::Report;

use crate::ad::{Advertisement, SlotPosition};
use crate::error::AdServeError;
use crate::recorder::PerformanceEvent;

/// Lifetime counter selector for write-through updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CounterField {
    Views,
    Clicks,
}

/// Storage collaborator for advertisement records, counters and events.
#[async_trait]
pub trait AdRepository: Send + Sync {
    /// All ads whose static `position` matches and whose page patterns
    /// plausibly include `page`. This is a pre-filter only; fine-grained
    /// matching happens in the eligibility resolver.
    async fn find_candidates(
        &self,
        page: &str,
        position: SlotPosition,
    ) -> Result<Vec<Advertisement>, Report<AdServeError>>;

    /// Fetch a single ad by id.
    async fn get(&self, ad_id: &str) -> Result<Option<Advertisement>, Report<AdServeError>>;

    /// Increment a lifetime counter by one and return the updated value.
    async fn increment_counter(
        &self,
        ad_id: &str,
        field: CounterField,
    ) -> Result<u64, Report<AdServeError>>;

    /// Persist a pause/resume transition.
    async fn set_pause_state(
        &self,
        ad_id: &str,
        paused: bool,
        reason: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<(), Report<AdServeError>>;

    /// Append a performance event. The log is append-only and best-effort.
    async fn append_event(&self, event: &PerformanceEvent) -> Result<(), Report<AdServeError>>;
}

/// Mutex-backed in-memory repository.
#[derive(Debug, Default)]
pub struct InMemoryAdRepository {
    ads: Mutex<HashMap<String, Advertisement>>,
    events: Mutex<Vec<PerformanceEvent>>,
}

impl InMemoryAdRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace an ad record.
    pub fn upsert(&self, ad: Advertisement) {
        self.ads
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(ad.id.clone(), ad);
    }

    /// Snapshot of the recorded events, oldest first.
    pub fn events(&self) -> Vec<PerformanceEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn unknown(ad_id: &str) -> Report<AdServeError> {
        Report::new(AdServeError::UnknownAd {
            id: ad_id.to_string(),
        })
    }
}

#[async_trait]
impl AdRepository for InMemoryAdRepository {
    async fn find_candidates(
        &self,
        page: &str,
        position: SlotPosition,
    ) -> Result<Vec<Advertisement>, Report<AdServeError>> {
        let ads = self.ads.lock().unwrap_or_else(PoisonError::into_inner);
        let mut candidates: Vec<Advertisement> = ads
            .values()
            .filter(|ad| ad.position == position && ad.targeting.matches_page(page))
            .cloned()
            .collect();
        candidates.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(candidates)
    }

    async fn get(&self, ad_id: &str) -> Result<Option<Advertisement>, Report<AdServeError>> {
        let ads = self.ads.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(ads.get(ad_id).cloned())
    }

    async fn increment_counter(
        &self,
        ad_id: &str,
        field: CounterField,
    ) -> Result<u64, Report<AdServeError>> {
        let mut ads = self.ads.lock().unwrap_or_else(PoisonError::into_inner);
        let ad = ads.get_mut(ad_id).ok_or_else(|| Self::unknown(ad_id))?;
        let updated = match field {
            CounterField::Views => {
                ad.view_count += 1;
                ad.view_count
            }
            CounterField::Clicks => {
                ad.click_count += 1;
                ad.click_count
            }
        };
        Ok(updated)
    }

    async fn set_pause_state(
        &self,
        ad_id: &str,
        paused: bool,
        reason: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<(), Report<AdServeError>> {
        let mut ads = self.ads.lock().unwrap_or_else(PoisonError::into_inner);
        let ad = ads.get_mut(ad_id).ok_or_else(|| Self::unknown(ad_id))?;
        ad.paused = paused;
        if paused {
            ad.pause_reason = reason.map(ToString::to_string);
            ad.paused_at = Some(at);
        } else {
            ad.pause_reason = None;
            ad.paused_at = None;
        }
        Ok(())
    }

    async fn append_event(&self, event: &PerformanceEvent) -> Result<(), Report<AdServeError>> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event.clone());
        Ok(())
    }
}
