//! Engine facade combining eligibility, selection, injection and recording.
//!
//! This is the surface the hosting application talks to: open a page
//! session, ask for the ad to fill a slot, render it, and notify outcome
//! events. No failure in here crashes or blocks page rendering; repository
//! trouble degrades to "no ad shown".

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::Utc;
use error_stack::{Report, ResultExt};

use crate::ad::{Advertisement, SlotPosition};
use crate::context::{synthetic_session_id, session_seed, Clock, PageVisit, SlotContext, SystemClock};
use crate::error::AdServeError;
use crate::frequency::FrequencyCapTracker;
use crate::injector::{DelayedInjection, Injector, RenderedCreative};
use crate::recorder::{EventKind, PerformanceRecorder};
use crate::repository::AdRepository;
use crate::selection::{pick, rotation_tick, select_candidates, Rotator};
use crate::settings::Settings;

/// Per-page-lifetime state: session identity, injection de-dup and the
/// timers owned by the page. Call [`PageSession::close`] on navigation or
/// unmount so no timer fires against stale state.
pub struct PageSession {
    id: String,
    seed: u64,
    visit: PageVisit,
    injector: Arc<Injector>,
    viewed: Mutex<HashSet<String>>,
    rotators: Mutex<Vec<Rotator>>,
    delayed: Mutex<Vec<DelayedInjection>>,
}

impl PageSession {
    fn new(id: String, visit: PageVisit) -> Self {
        let seed = session_seed(&id);
        PageSession {
            id,
            seed,
            visit,
            injector: Arc::new(Injector::new()),
            viewed: Mutex::new(HashSet::new()),
            rotators: Mutex::new(Vec::new()),
            delayed: Mutex::new(Vec::new()),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn visit(&self) -> &PageVisit {
        &self.visit
    }

    pub fn injector(&self) -> &Arc<Injector> {
        &self.injector
    }

    /// Mark an ad as viewed on this page. Returns `false` when it already
    /// was, so a view is only ever counted once per page lifetime.
    fn mark_viewed(&self, ad_id: &str) -> bool {
        self.viewed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(ad_id.to_string())
    }

    fn register_rotator(&self, rotator: Rotator) {
        self.rotators
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(rotator);
    }

    fn register_delayed(&self, handle: DelayedInjection) {
        self.delayed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(handle);
    }

    /// Cancel every rotation and delayed-injection timer owned by this page.
    pub fn close(&self) {
        for rotator in self
            .rotators
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
        {
            rotator.cancel();
        }
        for handle in self
            .delayed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
        {
            handle.cancel();
        }
    }
}

/// The advertisement decision engine.
pub struct AdEngine {
    repository: Arc<dyn AdRepository>,
    settings: Settings,
    clock: Arc<dyn Clock>,
    frequency: Arc<FrequencyCapTracker>,
    recorder: Arc<PerformanceRecorder>,
}

impl AdEngine {
    pub fn new(repository: Arc<dyn AdRepository>, settings: Settings, clock: Arc<dyn Clock>) -> Self {
        let frequency = Arc::new(FrequencyCapTracker::new());
        let recorder = Arc::new(PerformanceRecorder::new(
            Arc::clone(&repository),
            Arc::clone(&frequency),
            settings.recorder.clone(),
        ));
        AdEngine {
            repository,
            settings,
            clock,
            frequency,
            recorder,
        }
    }

    /// Engine over the wall clock.
    pub fn with_system_clock(repository: Arc<dyn AdRepository>, settings: Settings) -> Self {
        Self::new(repository, settings, Arc::new(SystemClock))
    }

    /// Open a session for one page view.
    pub fn open_page(&self, visit: PageVisit) -> Arc<PageSession> {
        let id = synthetic_session_id(&self.settings, &visit);
        log::debug!("Opened page session '{}' for '{}'", id, visit.page);
        Arc::new(PageSession::new(id, visit))
    }

    fn slot_context(&self, session: &PageSession, position: SlotPosition, page: &str) -> SlotContext {
        SlotContext::build(&session.visit, position, page, &session.id, self.clock.now())
    }

    /// Decide which ad, if any, fills a slot right now.
    ///
    /// Combines candidate fetch, eligibility, priority grouping and
    /// rotation/weighted selection. Repository failure is fail-closed: the
    /// slot renders nothing and the error is logged.
    pub async fn ad_for_slot(
        &self,
        session: &PageSession,
        position: SlotPosition,
        page: &str,
    ) -> Option<Advertisement> {
        let ctx = self.slot_context(session, position, page);
        let ads = match self.repository.find_candidates(page, position).await {
            Ok(ads) => ads,
            Err(err) => {
                log::warn!(
                    "Candidate fetch failed for {position:?} on '{page}', serving nothing: {err:?}"
                );
                return None;
            }
        };

        let candidates = select_candidates(&ads, &ctx, &self.frequency);
        let tick = rotation_tick(ctx.now, self.settings.serving.rotation_interval_secs);
        let chosen = pick(&candidates, session.seed, tick).cloned();

        match &chosen {
            Some(ad) => log::info!(
                "Serving ad '{}' into {position:?} on '{page}' ({} candidate(s))",
                ad.id,
                candidates.len()
            ),
            None => log::debug!("No eligible ad for {position:?} on '{page}'"),
        }
        chosen
    }

    /// Inject an ad's creative into the page, once per page lifetime.
    ///
    /// Fires the `load` event on successful injection and, per the
    /// immediate-visibility dwell heuristic, the first `view` for this ad on
    /// this page. Returns `None` on duplicate injection or malformed payload.
    pub async fn render(
        &self,
        session: &PageSession,
        ad: &Advertisement,
    ) -> Option<RenderedCreative> {
        let creative = session.injector.render(ad)?;
        let ctx = self.slot_context(session, ad.position, &session.visit.page);
        let user_agent = session.visit.user_agent.as_deref();

        self.recorder.record(ad, EventKind::Load, &ctx, user_agent).await;
        if session.mark_viewed(&ad.id) {
            self.recorder.record(ad, EventKind::View, &ctx, user_agent).await;
        }
        Some(creative)
    }

    /// Defer injection on the ad's `delay_seconds` (zero means immediate),
    /// delivering the creative to `sink` when the timer fires. The timer is
    /// cancelled if the session closes first. Load/view events fire on
    /// injection exactly as in [`AdEngine::render`].
    pub fn schedule_render<F>(&self, session: &Arc<PageSession>, ad: Advertisement, sink: F)
    where
        F: FnOnce(RenderedCreative) + Send + 'static,
    {
        let delay = ad.payload.delay_seconds.unwrap_or(0);
        let recorder = Arc::clone(&self.recorder);
        let clock = Arc::clone(&self.clock);
        let owner = Arc::clone(session);

        let ad_for_events = ad.clone();
        let handle = session.injector.render_delayed(ad, delay, move |creative| {
            sink(creative);
            tokio::spawn(async move {
                let ad = ad_for_events;
                let ctx = SlotContext::build(
                    &owner.visit,
                    ad.position,
                    &owner.visit.page,
                    &owner.id,
                    clock.now(),
                );
                let user_agent = owner.visit.user_agent.as_deref();
                recorder.record(&ad, EventKind::Load, &ctx, user_agent).await;
                if owner.mark_viewed(&ad.id) {
                    recorder.record(&ad, EventKind::View, &ctx, user_agent).await;
                }
            });
        });
        session.register_delayed(handle);
    }

    /// Start rotating a slot among its current candidates on the configured
    /// interval. Candidates are fetched once; a page that stays open rotates
    /// without re-fetching. Returns the rotation group size.
    pub async fn rotate_slot<F>(
        &self,
        session: &PageSession,
        position: SlotPosition,
        page: &str,
        on_rotate: F,
    ) -> usize
    where
        F: Fn(Advertisement) + Send + 'static,
    {
        let ctx = self.slot_context(session, position, page);
        let ads = match self.repository.find_candidates(page, position).await {
            Ok(ads) => ads,
            Err(err) => {
                log::warn!("Candidate fetch failed for rotation of {position:?}: {err:?}");
                return 0;
            }
        };
        let candidates = select_candidates(&ads, &ctx, &self.frequency);
        let size = candidates.len();
        if size >= 2 {
            let rotator = Rotator::start(
                candidates,
                session.seed,
                self.settings.serving.rotation_interval_secs,
                Arc::clone(&self.clock),
                on_rotate,
            );
            session.register_rotator(rotator);
        }
        size
    }

    /// Record an outcome event reported by the host.
    ///
    /// Unknown ads and repository trouble are logged and swallowed. A `view`
    /// only counts when the ad was actually injected on this page, and only
    /// once per page lifetime.
    pub async fn notify_event(&self, session: &PageSession, ad_id: &str, kind: EventKind) {
        let ad = match self.repository.get(ad_id).await {
            Ok(Some(ad)) => ad,
            Ok(None) => {
                log::warn!("Ignoring {kind:?} event for unknown ad '{ad_id}'");
                return;
            }
            Err(err) => {
                log::warn!("Dropping {kind:?} event for ad '{ad_id}': {err:?}");
                return;
            }
        };

        if kind == EventKind::View {
            if !session.injector.was_injected(ad_id) {
                log::debug!("Ignoring view for ad '{ad_id}': not injected on this page");
                return;
            }
            if !session.mark_viewed(ad_id) {
                log::debug!("Ignoring repeat view for ad '{ad_id}' on this page");
                return;
            }
        }

        let ctx = self.slot_context(session, ad.position, &session.visit.page);
        self.recorder
            .record(&ad, kind, &ctx, session.visit.user_agent.as_deref())
            .await;
    }

    /// Operator pause. Centralizes the lifecycle transition so pause state
    /// is never toggled ad-hoc by callers.
    pub async fn pause_ad(&self, ad_id: &str, reason: &str) -> Result<(), Report<AdServeError>> {
        self.repository
            .set_pause_state(ad_id, true, Some(reason), self.clock.now())
            .await
            .change_context(AdServeError::Repository {
                message: format!("Failed to pause ad '{ad_id}'"),
            })
    }

    /// Operator resume, from either manual or automatic pause.
    pub async fn resume_ad(&self, ad_id: &str) -> Result<(), Report<AdServeError>> {
        self.repository
            .set_pause_state(ad_id, false, None, self.clock.now())
            .await
            .change_context(AdServeError::Repository {
                message: format!("Failed to resume ad '{ad_id}'"),
            })
    }

    /// Shared frequency ledger, exposed for diagnostics and tests.
    pub fn frequency(&self) -> &Arc<FrequencyCapTracker> {
        &self.frequency
    }

    /// Instant the engine considers "now".
    pub fn now(&self) -> chrono::DateTime<Utc> {
        self.clock.now()
    }
}
