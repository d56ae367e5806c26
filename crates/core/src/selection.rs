//! Candidate selection and rotation.
//!
//! Only the highest-priority group of eligible ads is ever considered; a
//! lower-priority ad never shows while a higher one is eligible. Within the
//! group, varying A/B weights select weighted-random from a generator seeded
//! by the session, and equal weights rotate cyclically on the rotation tick.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rand::distributions::{Distribution, WeightedIndex};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::Duration as TokioDuration;

use crate::ad::Advertisement;
use crate::context::{Clock, SlotContext};
use crate::eligibility::filter_eligible;
use crate::frequency::FrequencyCapTracker;

/// Eligible ads from the highest-priority non-empty group, in stable id
/// order so cyclic rotation is reproducible.
pub fn select_candidates(
    ads: &[Advertisement],
    ctx: &SlotContext,
    tracker: &FrequencyCapTracker,
) -> Vec<Advertisement> {
    let eligible = filter_eligible(ads, ctx, tracker);
    let top = match eligible.iter().map(|ad| ad.effective_priority()).max() {
        Some(priority) => priority,
        None => return Vec::new(),
    };
    let mut group: Vec<Advertisement> = eligible
        .into_iter()
        .filter(|ad| ad.effective_priority() == top)
        .collect();
    group.sort_by(|a, b| a.id.cmp(&b.id));
    group
}

/// Rotation tick for an instant: `floor(unix_seconds / interval)`.
pub fn rotation_tick(now: DateTime<Utc>, interval_secs: u64) -> u64 {
    let interval = interval_secs.max(1);
    (now.timestamp().max(0) as u64) / interval
}

/// Pick one ad from a candidate group.
///
/// With varying `ab_test_weight` the pick is weighted-random from a
/// deterministic generator seeded by `(seed, tick)`; with equal weights it
/// is the stable cyclic member `tick % len`. Empty candidates yield `None`.
pub fn pick(candidates: &[Advertisement], seed: u64, tick: u64) -> Option<&Advertisement> {
    let first = candidates.first()?;
    if candidates.len() == 1 {
        return Some(first);
    }

    let weights: Vec<u32> = candidates.iter().map(|ad| ad.ab_test_weight).collect();
    let uniform = weights.iter().all(|w| *w == weights[0]);

    if uniform {
        return candidates.get((tick as usize) % candidates.len());
    }

    match WeightedIndex::new(&weights) {
        Ok(dist) => {
            let mut rng = StdRng::seed_from_u64(seed ^ tick.wrapping_mul(0x9E37_79B9_7F4A_7C15));
            candidates.get(dist.sample(&mut rng))
        }
        Err(err) => {
            // All-zero or otherwise degenerate weights: fall back to cyclic.
            log::warn!("Invalid A/B weights ({err}); falling back to rotation");
            candidates.get((tick as usize) % candidates.len())
        }
    }
}

/// Timer-driven rotation for a long-lived page.
///
/// Re-picks from a cached candidate list every interval without re-fetching
/// candidates, and stops when cancelled (slot unmount / page navigation).
pub struct Rotator {
    cancel: Arc<Notify>,
    handle: JoinHandle<()>,
}

impl Rotator {
    /// Spawn a rotation task that invokes `on_rotate` with the ad for each
    /// new tick. Requires a tokio runtime.
    pub fn start<F>(
        candidates: Vec<Advertisement>,
        seed: u64,
        interval_secs: u64,
        clock: Arc<dyn Clock>,
        on_rotate: F,
    ) -> Self
    where
        F: Fn(Advertisement) + Send + 'static,
    {
        let cancel = Arc::new(Notify::new());
        let cancelled = Arc::clone(&cancel);
        let interval = interval_secs.max(1);

        let handle = tokio::spawn(async move {
            if candidates.len() < 2 {
                // Nothing to rotate through.
                return;
            }
            loop {
                // Biased so a cancellation that raced the tick still wins.
                tokio::select! {
                    biased;
                    _ = cancelled.notified() => {
                        log::debug!("Rotation timer cancelled");
                        break;
                    }
                    _ = tokio::time::sleep(TokioDuration::from_secs(interval)) => {
                        let tick = rotation_tick(clock.now(), interval);
                        if let Some(ad) = pick(&candidates, seed, tick) {
                            on_rotate(ad.clone());
                        }
                    }
                }
            }
        });

        Rotator { cancel, handle }
    }

    /// Stop the rotation task. Idempotent.
    pub fn cancel(&self) {
        self.cancel.notify_one();
    }

    /// Whether the underlying task has exited.
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}
