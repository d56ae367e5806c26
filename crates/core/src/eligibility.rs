//! Eligibility resolution for advertisements.
//!
//! [`is_eligible`] is a pure function of the ad, the slot context and the
//! caller-supplied ledger count at a fixed instant. Checks run cheapest
//! first and short-circuit; a failure at any step yields `false` with no
//! partial matches and no side effects.

use crate::ad::Advertisement;
use crate::context::SlotContext;
use crate::frequency::FrequencyCapTracker;

/// Decide whether an ad may serve into the given slot context.
///
/// `ledger_count` is the visitor's impression count for this ad within the
/// current frequency window (zero when the ad carries no cap).
pub fn is_eligible(ad: &Advertisement, ctx: &SlotContext, ledger_count: u32) -> bool {
    // Lifecycle flags first: cheapest and most commonly disqualifying.
    if !ad.enabled || ad.paused {
        return false;
    }

    if !ad.is_within_validity(ctx.now) {
        return false;
    }

    if ad.position != ctx.position {
        return false;
    }

    if !ad.targeting.matches_page(&ctx.page) {
        return false;
    }

    if !ad.targeting.matches_device(ctx.device) {
        return false;
    }

    if !ad.targeting.matches_location(ctx.location.as_deref()) {
        return false;
    }

    if !ad.targeting.matches_language(ctx.language.as_deref()) {
        return false;
    }

    if !ad.targeting.matches_traffic_source(ctx.traffic_source) {
        return false;
    }

    if let Some(schedule) = &ad.targeting.schedule {
        if !schedule.contains(ctx.now) {
            return false;
        }
    }

    if ad.views_exhausted() || ad.clicks_exhausted() {
        return false;
    }

    if let Some(cap) = &ad.frequency_cap {
        if ledger_count >= cap.impressions_per_user {
            return false;
        }
    }

    true
}

/// Apply the resolver over a candidate list, consulting the frequency ledger
/// for each capped ad. Rejections are logged at debug level.
pub fn filter_eligible(
    ads: &[Advertisement],
    ctx: &SlotContext,
    tracker: &FrequencyCapTracker,
) -> Vec<Advertisement> {
    ads.iter()
        .filter(|ad| {
            let ledger_count = match &ad.frequency_cap {
                Some(cap) => tracker.count(&ctx.session_id, &ad.id, cap.time_period, ctx.now),
                None => 0,
            };
            let eligible = is_eligible(ad, ctx, ledger_count);
            if !eligible {
                log::debug!(
                    "Ad '{}' not eligible for {:?} slot on '{}'",
                    ad.id,
                    ctx.position,
                    ctx.page
                );
            }
            eligible
        })
        .cloned()
        .collect()
}
