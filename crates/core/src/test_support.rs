#[cfg(test)]
pub mod tests {
    use chrono::TimeZone;

    use crate::ad::{AdType, Advertisement, Payload, SlotPosition, Targeting, TrafficSource};
    use crate::context::{PageVisit, SlotContext};
    use crate::settings::Settings;

    pub fn create_test_settings_str() -> String {
        r#"
            [serving]
            rotation_interval_secs = 30

            [recorder]
            write_retries = 2
            user_agent_fragment_len = 64

            [session]
            secret_key = "test-secret-key"
            template = "{{user_agent}}:{{referrer}}:{{language}}:{{location}}"
            "#
        .to_string()
    }

    pub fn create_test_settings() -> Settings {
        let toml_str = create_test_settings_str();
        Settings::from_toml(&toml_str).expect("Invalid config")
    }

    /// A permissive, immediately-eligible ad for the given position.
    pub fn test_ad(id: &str, position: SlotPosition) -> Advertisement {
        Advertisement {
            id: id.to_string(),
            name: format!("Test ad {id}"),
            ad_type: AdType::Html,
            position,
            enabled: true,
            paused: false,
            pause_reason: None,
            paused_at: None,
            start_date: None,
            end_date: None,
            priority: 5,
            ab_test_group: None,
            ab_test_weight: 100,
            targeting: Targeting::default(),
            frequency_cap: None,
            max_views: None,
            max_clicks: None,
            view_count: 0,
            click_count: 0,
            payload: Payload {
                html: Some(format!("<div>{id}</div>")),
                ..Payload::default()
            },
        }
    }

    pub fn test_visit(page: &str) -> PageVisit {
        PageVisit {
            page: page.to_string(),
            user_agent: Some("Mozilla/5.0 (X11; Linux x86_64) Gecko/20100101".to_string()),
            referrer: None,
            language: Some("en".to_string()),
            location: Some("US".to_string()),
            user_id: None,
            traffic_source: None,
        }
    }

    /// Desktop, direct-traffic context pinned to Friday 2024-06-07 12:00 UTC.
    pub fn test_context(position: SlotPosition, page: &str) -> SlotContext {
        let now = chrono::Utc
            .with_ymd_and_hms(2024, 6, 7, 12, 0, 0)
            .single()
            .expect("valid timestamp");
        let mut ctx = SlotContext::build(&test_visit(page), position, page, "test-session", now);
        ctx.traffic_source = Some(TrafficSource::Direct);
        ctx
    }
}
