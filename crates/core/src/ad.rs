//! Advertisement records and targeting rules.
//!
//! Every targeting dimension is an explicit optional set: an empty set means
//! "matches everything". This keeps a misconfigured ad serving rather than
//! silently never matching, and makes "unset" a distinguishable state instead
//! of an absent key.

use chrono::{DateTime, Datelike, Duration, Timelike, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

/// Creative type of an advertisement.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AdType {
    Text,
    Image,
    Video,
    Html,
    Banner,
    Adsense,
    Custom,
}

/// Named placement on a page where a single ad may render.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum SlotPosition {
    Header,
    Footer,
    Sidebar,
    InContent,
    Popup,
    Floating,
    Sticky,
}

/// Device class of a visitor, derived from the user agent.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Device {
    Mobile,
    Tablet,
    Desktop,
    /// Only meaningful inside a targeting set; a context never carries it.
    All,
}

/// How the visitor arrived at the page.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TrafficSource {
    Direct,
    Search,
    Social,
    Referral,
    Email,
    Ads,
}

/// Time period a frequency cap window spans.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CapPeriod {
    Hour,
    Day,
    Week,
    Month,
}

impl CapPeriod {
    /// Length of the rolling window for this period.
    ///
    /// A month is treated as 30 days; windows roll from the first
    /// impression, so calendar month lengths do not apply.
    pub fn duration(self) -> Duration {
        match self {
            CapPeriod::Hour => Duration::hours(1),
            CapPeriod::Day => Duration::days(1),
            CapPeriod::Week => Duration::weeks(1),
            CapPeriod::Month => Duration::days(30),
        }
    }
}

/// Per-user exposure limit within a rolling time window.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct FrequencyCap {
    /// Maximum impressions a single user may receive per window.
    pub impressions_per_user: u32,
    /// Window period.
    pub time_period: CapPeriod,
}

/// Inclusive hour-of-day range, 0-23.
///
/// A range with `start > end` wraps past midnight (e.g. 22-3 covers
/// 22:00-23:59 and 00:00-03:59).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct HourRange {
    pub start: u8,
    pub end: u8,
}

impl HourRange {
    /// Check whether `hour` (0-23) falls inside the range, inclusive.
    pub fn contains(&self, hour: u8) -> bool {
        if self.start <= self.end {
            hour >= self.start && hour <= self.end
        } else {
            hour >= self.start || hour <= self.end
        }
    }
}

/// Day-of-week and hour-of-day schedule, evaluated in a named timezone.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Schedule {
    /// Days of week, 0 = Sunday through 6 = Saturday. Empty matches all days.
    #[serde(default)]
    pub days_of_week: Vec<u8>,
    /// Inclusive hour range.
    pub hours: HourRange,
    /// Timezone the schedule is declared in.
    #[serde(default = "default_timezone")]
    pub timezone: Tz,
}

fn default_timezone() -> Tz {
    Tz::UTC
}

impl Schedule {
    /// Check whether `now` falls inside the schedule, after converting it
    /// into the schedule's declared timezone.
    pub fn contains(&self, now: DateTime<Utc>) -> bool {
        let local = now.with_timezone(&self.timezone);
        let day = local.weekday().num_days_from_sunday() as u8;
        if !self.days_of_week.is_empty() && !self.days_of_week.contains(&day) {
            return false;
        }
        self.hours.contains(local.hour() as u8)
    }
}

/// Targeting rules for an advertisement.
///
/// Every field left empty matches all values for that dimension.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Targeting {
    #[serde(default)]
    pub devices: Vec<Device>,
    #[serde(default)]
    pub locations: Vec<String>,
    #[serde(default)]
    pub languages: Vec<String>,
    #[serde(default)]
    pub traffic_sources: Vec<TrafficSource>,
    #[serde(default)]
    pub schedule: Option<Schedule>,
    /// Page path patterns. A pattern ending in `*` is a prefix match; a bare
    /// `*` matches every page.
    #[serde(default)]
    pub pages: Vec<String>,
}

impl Targeting {
    /// Check whether a page path matches the `pages` patterns.
    pub fn matches_page(&self, page: &str) -> bool {
        if self.pages.is_empty() {
            return true;
        }
        self.pages.iter().any(|pattern| {
            if pattern == "*" {
                true
            } else if let Some(prefix) = pattern.strip_suffix('*') {
                page.starts_with(prefix)
            } else {
                pattern == page
            }
        })
    }

    /// Check whether the visitor's device class is targeted.
    pub fn matches_device(&self, device: Device) -> bool {
        self.devices.is_empty()
            || self.devices.contains(&Device::All)
            || self.devices.contains(&device)
    }

    /// Check whether the visitor's resolved location is targeted.
    pub fn matches_location(&self, location: Option<&str>) -> bool {
        if self.locations.is_empty() {
            return true;
        }
        match location {
            Some(loc) => self.locations.iter().any(|l| l.eq_ignore_ascii_case(loc)),
            None => false,
        }
    }

    /// Check whether the visitor's language is targeted.
    pub fn matches_language(&self, language: Option<&str>) -> bool {
        if self.languages.is_empty() {
            return true;
        }
        match language {
            Some(lang) => self
                .languages
                .iter()
                .any(|l| l.eq_ignore_ascii_case(lang)),
            None => false,
        }
    }

    /// Check whether the visitor's traffic source is targeted.
    pub fn matches_traffic_source(&self, source: Option<TrafficSource>) -> bool {
        if self.traffic_sources.is_empty() {
            return true;
        }
        match source {
            Some(src) => self.traffic_sources.contains(&src),
            None => false,
        }
    }
}

/// Opaque creative payload. The engine only validates that the reference
/// required by the ad's type is present; content semantics belong to the host.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Payload {
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub html: Option<String>,
    #[serde(default)]
    pub script_url: Option<String>,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub video_url: Option<String>,
    #[serde(default)]
    pub link_url: Option<String>,
    /// Defer injection by this many seconds (cancellable).
    #[serde(default)]
    pub delay_seconds: Option<u64>,
}

/// Lifecycle state derived from an ad's flags and validity window.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum LifecycleState {
    Active,
    /// Paused automatically because a lifetime cap was reached.
    AutoPaused,
    /// Paused explicitly by an operator.
    ManuallyPaused,
    /// `end_date` has passed. Terminal; no flag mutation required.
    Expired,
    /// `start_date` lies in the future.
    Scheduled,
    Disabled,
}

/// Prefix used for pause reasons written by the auto-pause controller.
pub const AUTO_PAUSE_PREFIX: &str = "auto:";

/// A single advertisement record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Advertisement {
    pub id: String,
    pub name: String,
    pub ad_type: AdType,
    pub position: SlotPosition,

    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub paused: bool,
    #[serde(default)]
    pub pause_reason: Option<String>,
    #[serde(default)]
    pub paused_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub start_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end_date: Option<DateTime<Utc>>,

    /// 1-10, higher is preferred. Values outside the range are clamped.
    #[serde(default = "default_priority")]
    pub priority: u8,
    #[serde(default)]
    pub ab_test_group: Option<String>,
    #[serde(default = "default_ab_test_weight")]
    pub ab_test_weight: u32,

    #[serde(default)]
    pub targeting: Targeting,

    #[serde(default)]
    pub frequency_cap: Option<FrequencyCap>,
    #[serde(default)]
    pub max_views: Option<u64>,
    #[serde(default)]
    pub max_clicks: Option<u64>,

    #[serde(default)]
    pub view_count: u64,
    #[serde(default)]
    pub click_count: u64,

    #[serde(default)]
    pub payload: Payload,
}

fn default_enabled() -> bool {
    true
}

fn default_priority() -> u8 {
    5
}

fn default_ab_test_weight() -> u32 {
    100
}

impl Advertisement {
    /// Priority clamped into the valid 1-10 range.
    pub fn effective_priority(&self) -> u8 {
        self.priority.clamp(1, 10)
    }

    /// Check whether `now` falls inside the optional validity window
    /// (inclusive on both ends).
    pub fn is_within_validity(&self, now: DateTime<Utc>) -> bool {
        if let Some(start) = self.start_date {
            if now < start {
                return false;
            }
        }
        if let Some(end) = self.end_date {
            if now > end {
                return false;
            }
        }
        true
    }

    /// Check whether the lifetime view cap is exhausted.
    pub fn views_exhausted(&self) -> bool {
        self.max_views.is_some_and(|max| self.view_count >= max)
    }

    /// Check whether the lifetime click cap is exhausted.
    pub fn clicks_exhausted(&self) -> bool {
        self.max_clicks.is_some_and(|max| self.click_count >= max)
    }

    /// Derive the lifecycle state at a fixed instant.
    ///
    /// Expiry wins over pause flags so that an expired ad reads as terminal
    /// regardless of how it was left.
    pub fn lifecycle_state(&self, now: DateTime<Utc>) -> LifecycleState {
        if self.end_date.is_some_and(|end| now > end) {
            return LifecycleState::Expired;
        }
        if !self.enabled {
            return LifecycleState::Disabled;
        }
        if self.paused {
            let auto = self
                .pause_reason
                .as_deref()
                .is_some_and(|r| r.starts_with(AUTO_PAUSE_PREFIX));
            return if auto {
                LifecycleState::AutoPaused
            } else {
                LifecycleState::ManuallyPaused
            };
        }
        if self.start_date.is_some_and(|start| now < start) {
            return LifecycleState::Scheduled;
        }
        LifecycleState::Active
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::tests::test_ad;
    use chrono::TimeZone;

    #[test]
    fn hour_range_inclusive_bounds() {
        let range = HourRange { start: 9, end: 17 };
        assert!(range.contains(9));
        assert!(range.contains(17));
        assert!(!range.contains(8));
        assert!(!range.contains(18));
    }

    #[test]
    fn hour_range_wraps_past_midnight() {
        let range = HourRange { start: 22, end: 3 };
        assert!(range.contains(23));
        assert!(range.contains(0));
        assert!(range.contains(3));
        assert!(!range.contains(12));
    }

    #[test]
    fn schedule_converts_into_declared_timezone() {
        let schedule = Schedule {
            days_of_week: vec![5, 6],
            hours: HourRange { start: 0, end: 23 },
            timezone: chrono_tz::Asia::Riyadh,
        };
        // 2024-06-06 is a Thursday, 2024-06-07 a Friday. 07:00 UTC = 10:00 AST.
        let thursday = Utc.with_ymd_and_hms(2024, 6, 6, 7, 0, 0).single().expect("valid");
        let friday = Utc.with_ymd_and_hms(2024, 6, 7, 7, 0, 0).single().expect("valid");
        assert!(!schedule.contains(thursday));
        assert!(schedule.contains(friday));
    }

    #[test]
    fn empty_targeting_matches_everything() {
        let targeting = Targeting::default();
        assert!(targeting.matches_page("/any/page"));
        assert!(targeting.matches_device(Device::Mobile));
        assert!(targeting.matches_location(None));
        assert!(targeting.matches_language(Some("en")));
        assert!(targeting.matches_traffic_source(None));
    }

    #[test]
    fn page_patterns_support_wildcards() {
        let targeting = Targeting {
            pages: vec!["/blog/*".to_string(), "/tools".to_string()],
            ..Targeting::default()
        };
        assert!(targeting.matches_page("/blog/some-post"));
        assert!(targeting.matches_page("/tools"));
        assert!(!targeting.matches_page("/tools/ai"));
        assert!(!targeting.matches_page("/about"));

        let all = Targeting {
            pages: vec!["*".to_string()],
            ..Targeting::default()
        };
        assert!(all.matches_page("/anything"));
    }

    #[test]
    fn device_all_matches_any_device() {
        let targeting = Targeting {
            devices: vec![Device::All],
            ..Targeting::default()
        };
        assert!(targeting.matches_device(Device::Desktop));
        assert!(targeting.matches_device(Device::Tablet));
    }

    #[test]
    fn set_targeting_requires_resolved_value() {
        let targeting = Targeting {
            locations: vec!["US".to_string()],
            ..Targeting::default()
        };
        // Location targeting set, visitor location unknown: no match.
        assert!(!targeting.matches_location(None));
        assert!(targeting.matches_location(Some("us")));
    }

    #[test]
    fn validity_window_is_inclusive() {
        let mut ad = test_ad("ad-1", SlotPosition::Header);
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).single().expect("valid");
        let end = Utc.with_ymd_and_hms(2024, 1, 31, 23, 59, 59).single().expect("valid");
        ad.start_date = Some(start);
        ad.end_date = Some(end);
        assert!(ad.is_within_validity(start));
        assert!(ad.is_within_validity(end));
        assert!(!ad.is_within_validity(start - chrono::Duration::seconds(1)));
        assert!(!ad.is_within_validity(end + chrono::Duration::seconds(1)));
    }

    #[test]
    fn lifecycle_state_transitions() {
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).single().expect("valid");
        let mut ad = test_ad("ad-1", SlotPosition::Header);
        assert_eq!(ad.lifecycle_state(now), LifecycleState::Active);

        ad.paused = true;
        ad.pause_reason = Some("auto: max_views reached (100/100)".to_string());
        assert_eq!(ad.lifecycle_state(now), LifecycleState::AutoPaused);

        ad.pause_reason = Some("campaign on hold".to_string());
        assert_eq!(ad.lifecycle_state(now), LifecycleState::ManuallyPaused);

        ad.end_date = Some(now - chrono::Duration::days(1));
        assert_eq!(ad.lifecycle_state(now), LifecycleState::Expired);
    }

    #[test]
    fn advertisement_deserializes_with_permissive_defaults() {
        let json = r#"{
            "id": "ad-42",
            "name": "Sidebar promo",
            "ad_type": "image",
            "position": "in-content"
        }"#;
        let ad: Advertisement = serde_json::from_str(json).expect("should deserialize");
        assert!(ad.enabled);
        assert!(!ad.paused);
        assert_eq!(ad.priority, 5);
        assert_eq!(ad.ab_test_weight, 100);
        assert_eq!(ad.position, SlotPosition::InContent);
        assert!(ad.targeting.pages.is_empty());
        assert!(ad.frequency_cap.is_none());
    }
}
