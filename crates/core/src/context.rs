//! Per-render context: clock, visit attributes and the slot context handed
//! to the eligibility resolver.
//!
//! The synthetic session identifier is an HMAC-SHA256 over a configurable
//! template of visit attributes, so the same anonymous visitor maps to the
//! same id without storing anything about them.

use chrono::{DateTime, Utc};
use handlebars::Handlebars;
use hmac::{Hmac, Mac};
use serde_json::json;
use sha2::{Digest, Sha256};

use crate::ad::{Device, SlotPosition, TrafficSource};
use crate::settings::Settings;

type HmacSha256 = Hmac<Sha256>;

/// Source of "now" for the engine. Injected so eligibility and windowing are
/// reproducible in tests.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock implementation used by hosts.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock pinned to a fixed instant. Primarily for tests and replay.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

/// Host-supplied attributes of a single page view.
#[derive(Debug, Clone, Default)]
pub struct PageVisit {
    /// Path of the page being rendered (e.g. `/blog/some-post`).
    pub page: String,
    pub user_agent: Option<String>,
    pub referrer: Option<String>,
    /// Preferred language code (e.g. `en`), already stripped of quality tags.
    pub language: Option<String>,
    /// Resolved region string, when the host performed a geo lookup.
    pub location: Option<String>,
    /// Authenticated user id, when available. Overrides the synthetic id.
    pub user_id: Option<String>,
    /// Explicit traffic source, when the host already classified it
    /// (e.g. from a `utm_medium` query parameter).
    pub traffic_source: Option<TrafficSource>,
}

impl Device {
    /// Classify a device from a user agent fragment.
    pub fn from_user_agent(user_agent: Option<&str>) -> Device {
        let ua = match user_agent {
            Some(ua) => ua,
            None => return Device::Desktop,
        };
        if ua.contains("iPad") || ua.contains("Tablet") {
            Device::Tablet
        } else if ua.contains("Mobi") || ua.contains("Android") {
            Device::Mobile
        } else {
            Device::Desktop
        }
    }
}

impl TrafficSource {
    /// Classify a traffic source from the referrer.
    ///
    /// Hosts that carry richer attribution (UTM parameters) should set
    /// [`PageVisit::traffic_source`] directly instead.
    pub fn from_referrer(referrer: Option<&str>) -> TrafficSource {
        let referrer = match referrer {
            Some(r) if !r.is_empty() => r,
            _ => return TrafficSource::Direct,
        };
        const SEARCH: [&str; 4] = ["google.", "bing.", "duckduckgo.", "yandex."];
        const SOCIAL: [&str; 6] = [
            "facebook.",
            "twitter.",
            "t.co/",
            "linkedin.",
            "reddit.",
            "instagram.",
        ];
        if SEARCH.iter().any(|s| referrer.contains(s)) {
            TrafficSource::Search
        } else if SOCIAL.iter().any(|s| referrer.contains(s)) {
            TrafficSource::Social
        } else if referrer.contains("mail.") {
            TrafficSource::Email
        } else {
            TrafficSource::Referral
        }
    }
}

/// Everything the eligibility resolver needs about one render of one slot.
///
/// Ephemeral; built per render and never stored.
#[derive(Debug, Clone)]
pub struct SlotContext {
    pub page: String,
    pub position: SlotPosition,
    pub device: Device,
    pub location: Option<String>,
    pub language: Option<String>,
    pub traffic_source: Option<TrafficSource>,
    pub now: DateTime<Utc>,
    pub session_id: String,
}

impl SlotContext {
    /// Build a slot context from a visit at a fixed instant.
    pub fn build(
        visit: &PageVisit,
        position: SlotPosition,
        page: &str,
        session_id: &str,
        now: DateTime<Utc>,
    ) -> Self {
        let traffic_source = visit
            .traffic_source
            .or_else(|| Some(TrafficSource::from_referrer(visit.referrer.as_deref())));
        SlotContext {
            page: page.to_string(),
            position,
            device: Device::from_user_agent(visit.user_agent.as_deref()),
            location: visit.location.clone(),
            language: visit.language.clone(),
            traffic_source,
            now,
            session_id: session_id.to_string(),
        }
    }
}

/// Generate the synthetic session id for a visit.
///
/// Renders the configured template over the visit attributes and keys an
/// HMAC-SHA256 with the configured secret. An authenticated user id takes
/// precedence; a failed template render falls back to a random UUID so a bad
/// template never blocks serving.
pub fn synthetic_session_id(settings: &Settings, visit: &PageVisit) -> String {
    if let Some(user_id) = &visit.user_id {
        return user_id.clone();
    }

    let handlebars = Handlebars::new();
    let data = json!({
        "user_agent": visit.user_agent.as_deref().unwrap_or("unknown"),
        "referrer": visit.referrer.as_deref().unwrap_or("direct"),
        "language": visit.language.as_deref().unwrap_or("unknown"),
        "location": visit.location.as_deref().unwrap_or("unknown"),
    });

    let input = match handlebars.render_template(&settings.session.template, &data) {
        Ok(rendered) => rendered,
        Err(err) => {
            log::warn!("Session id template failed to render: {err}; using random id");
            return uuid::Uuid::new_v4().to_string();
        }
    };

    let mut mac = HmacSha256::new_from_slice(settings.session.secret_key.as_bytes())
        .expect("HMAC can take key of any size");
    mac.update(input.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// Derive the deterministic selection seed for a session.
///
/// First eight bytes of SHA-256 over the session id; stable across renders
/// so weighted selection is reproducible for a given visitor.
pub fn session_seed(session_id: &str) -> u64 {
    let digest = Sha256::digest(session_id.as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::tests::create_test_settings;

    #[test]
    fn device_classification_from_user_agent() {
        assert_eq!(
            Device::from_user_agent(Some("Mozilla/5.0 (iPhone; CPU iPhone OS 17_0) Mobile/15E148")),
            Device::Mobile
        );
        assert_eq!(
            Device::from_user_agent(Some("Mozilla/5.0 (iPad; CPU OS 17_0)")),
            Device::Tablet
        );
        assert_eq!(
            Device::from_user_agent(Some("Mozilla/5.0 (X11; Linux x86_64)")),
            Device::Desktop
        );
        assert_eq!(Device::from_user_agent(None), Device::Desktop);
    }

    #[test]
    fn traffic_source_classification() {
        assert_eq!(TrafficSource::from_referrer(None), TrafficSource::Direct);
        assert_eq!(TrafficSource::from_referrer(Some("")), TrafficSource::Direct);
        assert_eq!(
            TrafficSource::from_referrer(Some("https://www.google.com/search?q=ai")),
            TrafficSource::Search
        );
        assert_eq!(
            TrafficSource::from_referrer(Some("https://www.reddit.com/r/rust")),
            TrafficSource::Social
        );
        assert_eq!(
            TrafficSource::from_referrer(Some("https://partner.example.com/links")),
            TrafficSource::Referral
        );
    }

    #[test]
    fn synthetic_id_is_stable_for_identical_visits() {
        let settings = create_test_settings();
        let visit = PageVisit {
            page: "/blog/post".to_string(),
            user_agent: Some("Mozilla/5.0".to_string()),
            language: Some("en".to_string()),
            ..PageVisit::default()
        };
        let a = synthetic_session_id(&settings, &visit);
        let b = synthetic_session_id(&settings, &visit);
        assert_eq!(a, b);
        assert_eq!(a.len(), 64, "hex-encoded HMAC-SHA256");
    }

    #[test]
    fn authenticated_user_id_wins_over_synthetic() {
        let settings = create_test_settings();
        let visit = PageVisit {
            user_id: Some("user-77".to_string()),
            ..PageVisit::default()
        };
        assert_eq!(synthetic_session_id(&settings, &visit), "user-77");
    }

    #[test]
    fn seed_is_deterministic_per_session() {
        assert_eq!(session_seed("abc"), session_seed("abc"));
        assert_ne!(session_seed("abc"), session_seed("abd"));
    }
}
