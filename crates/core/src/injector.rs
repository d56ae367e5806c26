//! Creative injection with per-page de-duplication.
//!
//! The injector turns an ad's payload into injectable markup exactly once
//! per page lifetime. A second request for the same ad id is a no-op, which
//! prevents duplicate script execution and double counting. Malformed
//! payloads are caught and logged; the slot silently renders nothing.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

use error_stack::Report;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::Duration as TokioDuration;

use crate::ad::{AdType, Advertisement};
use crate::error::AdServeError;

/// Markup ready to hand to the hosting page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedCreative {
    pub ad_id: String,
    pub kind: AdType,
    pub html: String,
}

/// Per-page-lifetime injector. One instance per page session.
#[derive(Debug, Default)]
pub struct Injector {
    injected: Mutex<HashSet<String>>,
}

impl Injector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Render an ad's payload, once per page lifetime.
    ///
    /// Returns `None` when the ad was already injected on this page or when
    /// the payload is malformed (logged, never propagated).
    pub fn render(&self, ad: &Advertisement) -> Option<RenderedCreative> {
        {
            let injected = self.injected.lock().unwrap_or_else(PoisonError::into_inner);
            if injected.contains(&ad.id) {
                log::debug!("Ad '{}' already injected on this page, skipping", ad.id);
                return None;
            }
        }

        match build_markup(ad) {
            Ok(html) => {
                let mut injected = self.injected.lock().unwrap_or_else(PoisonError::into_inner);
                // Re-check under the lock: two slots may race on the same ad.
                if !injected.insert(ad.id.clone()) {
                    return None;
                }
                Some(RenderedCreative {
                    ad_id: ad.id.clone(),
                    kind: ad.ad_type,
                    html,
                })
            }
            Err(err) => {
                log::warn!("Failed to render creative for ad '{}': {err:?}", ad.id);
                None
            }
        }
    }

    /// Whether the ad was injected during this page lifetime.
    pub fn was_injected(&self, ad_id: &str) -> bool {
        self.injected
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(ad_id)
    }

    /// Defer injection by `delay_secs`, delivering the creative to `sink`
    /// when the timer fires. The returned handle cancels the timer if the
    /// hosting slot unmounts first. Requires a tokio runtime.
    pub fn render_delayed<F>(
        self: &Arc<Self>,
        ad: Advertisement,
        delay_secs: u64,
        sink: F,
    ) -> DelayedInjection
    where
        F: FnOnce(RenderedCreative) + Send + 'static,
    {
        let cancel = Arc::new(Notify::new());
        let cancelled = Arc::clone(&cancel);
        let injector = Arc::clone(self);

        let handle = tokio::spawn(async move {
            // Biased so a cancellation that raced the deadline still wins.
            tokio::select! {
                biased;
                _ = cancelled.notified() => {
                    log::debug!("Delayed injection for ad '{}' cancelled", ad.id);
                }
                _ = tokio::time::sleep(TokioDuration::from_secs(delay_secs)) => {
                    if let Some(creative) = injector.render(&ad) {
                        sink(creative);
                    }
                }
            }
        });

        DelayedInjection { cancel, handle }
    }
}

/// Handle to a pending delayed injection.
pub struct DelayedInjection {
    cancel: Arc<Notify>,
    handle: JoinHandle<()>,
}

impl DelayedInjection {
    /// Cancel the pending injection. Idempotent; a no-op once fired.
    pub fn cancel(&self) {
        self.cancel.notify_one();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

fn missing(ad: &Advertisement, what: &str) -> Report<AdServeError> {
    Report::new(AdServeError::Injection {
        message: format!("Ad '{}' ({:?}) has no {what}", ad.id, ad.ad_type),
    })
}

/// Build the injectable markup for an ad's payload kind.
fn build_markup(ad: &Advertisement) -> Result<String, Report<AdServeError>> {
    let payload = &ad.payload;
    let markup = match ad.ad_type {
        AdType::Html | AdType::Banner | AdType::Custom => payload
            .html
            .as_deref()
            .or(payload.content.as_deref())
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| missing(ad, "html content"))?
            .to_string(),
        AdType::Text => {
            let text = payload
                .content
                .as_deref()
                .filter(|s| !s.trim().is_empty())
                .ok_or_else(|| missing(ad, "text content"))?;
            match payload.link_url.as_deref() {
                Some(link) => format!(r#"<a href="{link}" rel="sponsored">{text}</a>"#),
                None => format!(r#"<span class="ad-text">{text}</span>"#),
            }
        }
        AdType::Image => {
            let src = payload
                .image_url
                .as_deref()
                .filter(|s| !s.trim().is_empty())
                .ok_or_else(|| missing(ad, "image url"))?;
            let img = format!(r#"<img src="{src}" alt="{}" loading="lazy">"#, ad.name);
            match payload.link_url.as_deref() {
                Some(link) => format!(r#"<a href="{link}" rel="sponsored">{img}</a>"#),
                None => img,
            }
        }
        AdType::Video => {
            let src = payload
                .video_url
                .as_deref()
                .filter(|s| !s.trim().is_empty())
                .ok_or_else(|| missing(ad, "video url"))?;
            format!(r#"<video src="{src}" autoplay muted playsinline></video>"#)
        }
        AdType::Adsense => {
            let src = payload
                .script_url
                .as_deref()
                .filter(|s| !s.trim().is_empty())
                .ok_or_else(|| missing(ad, "script url"))?;
            format!(r#"<script async src="{src}"></script>"#)
        }
    };
    Ok(markup)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ad::SlotPosition;
    use crate::test_support::tests::test_ad;

    fn image_ad(id: &str) -> Advertisement {
        let mut ad = test_ad(id, SlotPosition::Sidebar);
        ad.ad_type = AdType::Image;
        ad.payload.image_url = Some("https://cdn.example.com/banner.png".to_string());
        ad
    }

    #[test]
    fn renders_payload_exactly_once_per_page() {
        let injector = Injector::new();
        let ad = image_ad("ad-1");

        let first = injector.render(&ad);
        assert!(first.is_some());
        assert!(injector.was_injected("ad-1"));

        // Second injection request within the same page lifetime is a no-op.
        assert!(injector.render(&ad).is_none());
    }

    #[test]
    fn different_ads_inject_independently() {
        let injector = Injector::new();
        assert!(injector.render(&image_ad("ad-1")).is_some());
        assert!(injector.render(&image_ad("ad-2")).is_some());
    }

    #[test]
    fn malformed_payload_renders_nothing_without_propagating() {
        let injector = Injector::new();
        let mut ad = test_ad("ad-broken", SlotPosition::Sidebar);
        ad.ad_type = AdType::Image;
        // No image_url set.
        assert!(injector.render(&ad).is_none());
        // The failed attempt did not consume the de-dup slot.
        assert!(!injector.was_injected("ad-broken"));
    }

    #[test]
    fn markup_matches_payload_kind() {
        let creative = Injector::new()
            .render(&image_ad("ad-img"))
            .expect("should render");
        assert!(creative.html.contains("<img"));
        assert!(creative.html.contains("banner.png"));

        let mut script = test_ad("ad-js", SlotPosition::Footer);
        script.ad_type = AdType::Adsense;
        script.payload.script_url = Some("https://ads.example.com/ads.js".to_string());
        let creative = Injector::new().render(&script).expect("should render");
        assert!(creative.html.contains("<script async"));

        let mut text = test_ad("ad-text", SlotPosition::InContent);
        text.ad_type = AdType::Text;
        text.payload.content = Some("Try our tool".to_string());
        text.payload.link_url = Some("https://example.com".to_string());
        let creative = Injector::new().render(&text).expect("should render");
        assert!(creative.html.contains(r#"rel="sponsored""#));
    }

    #[tokio::test(start_paused = true)]
    async fn delayed_injection_fires_after_delay() {
        let injector = Arc::new(Injector::new());
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();

        let handle = injector.render_delayed(image_ad("ad-1"), 5, move |creative| {
            let _ = tx.send(creative.ad_id);
        });
        // Let the task register its timer before advancing the paused clock.
        tokio::task::yield_now().await;

        tokio::time::advance(TokioDuration::from_secs(4)).await;
        tokio::task::yield_now().await;
        assert!(rx.try_recv().is_err(), "should not fire before the delay");

        tokio::time::advance(TokioDuration::from_secs(2)).await;
        tokio::task::yield_now().await;
        assert_eq!(rx.try_recv().ok().as_deref(), Some("ad-1"));
        assert!(injector.was_injected("ad-1"));
        drop(handle);
    }

    #[tokio::test(start_paused = true)]
    async fn delayed_injection_cancelled_on_unmount() {
        let injector = Arc::new(Injector::new());
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();

        let handle = injector.render_delayed(image_ad("ad-1"), 5, move |creative| {
            let _ = tx.send(creative.ad_id);
        });
        handle.cancel();

        tokio::time::advance(TokioDuration::from_secs(10)).await;
        for _ in 0..10 {
            tokio::task::yield_now().await;
            if handle.is_finished() {
                break;
            }
        }
        assert!(rx.try_recv().is_err(), "cancelled timer must not inject");
        assert!(!injector.was_injected("ad-1"));
    }
}
