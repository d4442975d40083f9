//! Session state machine
//!
//! [`SessionStateMachine`] owns the per-page collector state. It turns host
//! events into recorded actions, decides where sessions and pages begin and
//! end, and triggers flushes. Every side effect goes through the [`Host`] it
//! was built with.
//!
//! Closing a session appends `scroll-depth` followed by the closing action
//! (`exit-page` or `end-session`) and flushes. The state becomes `Ended` and
//! stays there until the next qualifying interaction resumes tracking with a
//! `start-session` action, or a new page load starts over.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::classifier::Classifier;
use crate::config::{CollectorConfig, INITIAL_FLUSH_DELAY};
use crate::delivery::{DeliveryChannel, DeliveryOutcome, PageOrigin, UserContext};
use crate::error::CollectorError;
use crate::events::CollectorEvent;
use crate::geometry::{scroll_decile, scroll_depth};
use crate::host::{Host, NavigatorInfo, TimerId, TimerKind};
use crate::identity::IdentityStore;
use crate::inactivity::{IdleSource, IdleVerdict, InactivityMonitor, IDLE_TICK_SECONDS};
use crate::queue::ActionQueue;
use crate::target::{describe_target, ClickInfo, ElementNode};
use crate::types::{
    Action, ActionInfo, ActionType, Classification, PageBucket, ProtocolVariant, SessionState,
};
use crate::urls::{canonical_url, is_http, same_site, strip_fragment};

/// Mutable state of the tracked page
#[derive(Debug, Clone, PartialEq)]
pub struct SessionContext {
    pub visitor_id: String,
    pub state: SessionState,
    /// Furthest vertical offset reached on the current page
    pub scroll_max: f64,
    /// Canonical URL of the page the open bucket belongs to
    pub current_page: String,
    pub pointer_inside: bool,
    pub classification: Classification,
    pub navigator: NavigatorInfo,
    pub idle_timer: Option<TimerId>,
    pub announce_timer: Option<TimerId>,
}

/// How [`SessionStateMachine::init`] found the page
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InitOutcome {
    /// No open session; a new one was started with `enter-page`
    Started,
    /// A persisted session was picked up again
    Reattached,
    /// A persisted session had gone idle; it was closed and a new one started
    RestartedStale,
    /// Bot user agent; nothing is tracked
    SkippedBot,
}

/// Why a session is being closed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseReason {
    Idle,
    /// Tab hidden on a handheld device
    Hidden,
    Unload,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "result")]
pub enum FlushOutcome {
    /// The closing pair was appended and the queue transmitted
    Flushed {
        closing: ActionType,
        delivery: DeliveryOutcome,
    },
    /// Unload toward the current page; the queue is kept for re-attachment
    Deferred,
    AlreadyClosed,
    /// Idle threshold not reached
    NotNeeded,
    NotTracking,
}

impl FlushOutcome {
    pub fn flushed(&self) -> bool {
        matches!(self, FlushOutcome::Flushed { .. })
    }
}

// Which closing action an unload resolves to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Departure {
    EndSession,
    ExitPage,
    Reload,
}

pub struct SessionStateMachine<H: Host> {
    config: CollectorConfig,
    host: H,
    classifier: Box<dyn Classifier>,
    delivery: DeliveryChannel,
    queue: ActionQueue,
    monitor: InactivityMonitor,
    context: Option<SessionContext>,
}

impl<H: Host> SessionStateMachine<H> {
    pub fn new(config: CollectorConfig, host: H, classifier: Box<dyn Classifier>) -> Self {
        let now = host.now();
        Self {
            delivery: DeliveryChannel::new(&config),
            monitor: InactivityMonitor::new(config.idle_minutes, now),
            config,
            host,
            classifier,
            queue: ActionQueue::new(),
            context: None,
        }
    }

    pub fn config(&self) -> &CollectorConfig {
        &self.config
    }

    /// `None` until [`Self::init`] has run
    pub fn state(&self) -> Option<SessionState> {
        self.context.as_ref().map(|ctx| ctx.state)
    }

    pub fn context(&self) -> Option<&SessionContext> {
        self.context.as_ref()
    }

    pub fn queue(&self) -> &ActionQueue {
        &self.queue
    }

    pub fn monitor(&self) -> &InactivityMonitor {
        &self.monitor
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn host_mut(&mut self) -> &mut H {
        &mut self.host
    }

    pub fn into_host(self) -> H {
        self.host
    }

    /// Start tracking the current page.
    ///
    /// A persisted queue younger than the idle threshold is re-attached; an
    /// older one is closed (backdated) and flushed before a fresh session
    /// starts in the same call.
    pub fn init(&mut self) -> Result<InitOutcome, CollectorError> {
        self.cancel_timers();

        let navigator = self.host.navigator();
        let classification = self.classifier.classify(&navigator.user_agent);
        let now = self.host.now();

        if classification.is_bot {
            info!(user_agent = %navigator.user_agent, "Bot user agent, collector disabled");
            self.queue = ActionQueue::new();
            self.context = Some(SessionContext {
                visitor_id: String::new(),
                state: SessionState::Disabled,
                scroll_max: 0.0,
                current_page: String::new(),
                pointer_inside: false,
                classification,
                navigator,
                idle_timer: None,
                announce_timer: None,
            });
            return Ok(InitOutcome::SkippedBot);
        }

        let current_page = canonical_url(&self.host.location())?;
        let visitor_id = IdentityStore::get_or_create(&mut self.host, now);

        self.monitor = InactivityMonitor::new(self.config.idle_minutes, now);
        self.context = Some(SessionContext {
            visitor_id,
            state: SessionState::Active,
            scroll_max: 0.0,
            current_page,
            pointer_inside: false,
            classification,
            navigator,
            idle_timer: None,
            announce_timer: None,
        });

        let persisted = match ActionQueue::load(&mut self.host) {
            Ok(queue) => queue,
            Err(err) => {
                warn!(error = %err, "Failed to read stored queue");
                None
            }
        };

        let outcome = match persisted {
            Some(queue) => {
                self.queue = queue;
                let last_active = self.queue.last_action_at().unwrap_or(now);
                if now - last_active > self.monitor.threshold() {
                    self.close_stale(last_active);
                    self.begin(ActionType::EnterPage);
                    InitOutcome::RestartedStale
                } else {
                    self.reattach(now);
                    InitOutcome::Reattached
                }
            }
            None => {
                self.queue = ActionQueue::new();
                self.begin(ActionType::EnterPage);
                InitOutcome::Started
            }
        };

        debug!(outcome = ?outcome, actions = self.queue.len(), "Collector initialised");
        Ok(outcome)
    }

    /// Handle one host event, logging rather than returning failures
    pub fn dispatch(&mut self, event: CollectorEvent) {
        let name = event.name();
        match self.try_dispatch(event) {
            Ok(()) => {}
            Err(CollectorError::Disabled) | Err(CollectorError::NotInitialized) => {
                debug!(event = name, "Event ignored")
            }
            Err(err) => warn!(error = %err, event = name, "Event handling failed"),
        }
    }

    pub fn try_dispatch(&mut self, event: CollectorEvent) -> Result<(), CollectorError> {
        match self.state() {
            None => return Err(CollectorError::NotInitialized),
            Some(SessionState::Disabled) => return Err(CollectorError::Disabled),
            Some(_) => {}
        }

        if event.is_interaction() {
            self.on_interaction();
        }

        match event {
            CollectorEvent::PointerMove
            | CollectorEvent::KeyDown
            | CollectorEvent::VisibilityChange { hidden: false } => {}
            CollectorEvent::Click { target } => self.on_click(&target),
            CollectorEvent::Submit { form, search_value } => self.on_submit(&form, search_value),
            CollectorEvent::Scroll { offset_y } => self.on_scroll(offset_y),
            CollectorEvent::VisibilityChange { hidden: true } => {
                if self.is_handheld() {
                    self.end_session(CloseReason::Hidden);
                }
            }
            CollectorEvent::PageHide => {
                self.end_session(CloseReason::Unload);
            }
            CollectorEvent::PageShow { persisted } => {
                // restored from the back/forward cache
                if persisted && self.is_handheld() {
                    self.init()?;
                }
            }
            CollectorEvent::PointerEnter => self.set_pointer_inside(true),
            CollectorEvent::PointerLeave => self.set_pointer_inside(false),
            CollectorEvent::HistoryNavigation => self.on_history_navigation(),
            CollectorEvent::Timer {
                kind: TimerKind::IdleTick,
            } => {
                self.check_and_maybe_flush(IdleSource::Tick);
            }
            CollectorEvent::Timer {
                kind: TimerKind::InitialFlush,
            } => self.announce(),
        }

        Ok(())
    }

    /// Run one idle check and close the session if it expired.
    ///
    /// Both idle mechanisms come through here; the monitor latch makes the
    /// terminal flush run at most once per session.
    pub fn check_and_maybe_flush(&mut self, source: IdleSource) -> FlushOutcome {
        match self.state() {
            None | Some(SessionState::Disabled) => return FlushOutcome::NotTracking,
            Some(_) => {}
        }

        let verdict = match source {
            IdleSource::Tick => self.monitor.tick(),
            IdleSource::Interaction => {
                let now = self.host.now();
                self.monitor.check(now)
            }
        };

        match verdict {
            IdleVerdict::Active => FlushOutcome::NotNeeded,
            IdleVerdict::Latched => FlushOutcome::AlreadyClosed,
            IdleVerdict::Expired { last_active_at } => {
                debug!(source = ?source, last_active_at = %last_active_at, "Idle threshold exceeded");
                self.mark_inactive();
                self.close(CloseReason::Idle, None, None)
            }
        }
    }

    /// Close the open session for `reason`
    pub fn end_session(&mut self, reason: CloseReason) -> FlushOutcome {
        match reason {
            CloseReason::Idle => {
                self.monitor.force_expire();
                self.mark_inactive();
            }
            CloseReason::Hidden | CloseReason::Unload => {
                // a throttled background tab may have gone idle unnoticed
                let idle = self.check_and_maybe_flush(IdleSource::Interaction);
                if idle.flushed() {
                    return idle;
                }
            }
        }
        self.close(reason, None, None)
    }

    // ── Session boundaries ──────────────────────────────────────────────────

    fn begin(&mut self, opening: ActionType) {
        let now = self.host.now();
        self.monitor.rearm(now);

        let page = self.current_url();
        if let Some(ctx) = self.context.as_mut() {
            ctx.state = SessionState::Active;
            ctx.scroll_max = 0.0;
            ctx.current_page = page.clone();
        }

        self.record(&page, opening, ActionInfo::None);
        self.start_idle_timer();
        self.schedule_announce();
        debug!(opening = opening.as_str(), page = %page, "Session started");
    }

    fn reattach(&mut self, now: DateTime<Utc>) {
        self.monitor.rearm(now);

        let page = self.current_url();
        if self.queue.last_url() != Some(page.as_str()) {
            // navigated without passing through an exit path
            self.record(&page, ActionType::EnterPage, ActionInfo::None);
        }
        self.start_idle_timer();
        debug!(page = %page, actions = self.queue.len(), "Re-attached to stored session");
    }

    fn close_stale(&mut self, last_active: DateTime<Utc>) {
        self.monitor.backdate_to(last_active);
        self.monitor.force_expire();
        self.mark_inactive();

        let page = self.queue.last_url().map(str::to_string);
        let depth = ActionQueue::cached_scroll_decile(&self.host) * 10;
        self.close(CloseReason::Idle, page, Some(depth));
    }

    fn close(&mut self, reason: CloseReason, page: Option<String>, depth: Option<u8>) -> FlushOutcome {
        let (state, handheld) = match self.context.as_ref() {
            Some(ctx) => (ctx.state, ctx.classification.device.is_handheld()),
            None => return FlushOutcome::NotTracking,
        };
        match state {
            SessionState::Disabled => return FlushOutcome::NotTracking,
            SessionState::Ended => return FlushOutcome::AlreadyClosed,
            SessionState::Active | SessionState::Inactive => {}
        }

        // the focused element is read once, before anything is appended
        let departure = if reason == CloseReason::Unload && state == SessionState::Active && !handheld {
            match self.host.focused_link() {
                Some(href) => self.departure_for(&href),
                None => Departure::EndSession,
            }
        } else {
            Departure::EndSession
        };

        let closing = match departure {
            Departure::Reload => {
                debug!("Unload toward the current page, keeping queue");
                return FlushOutcome::Deferred;
            }
            Departure::ExitPage => ActionType::ExitPage,
            Departure::EndSession => ActionType::EndSession,
        };

        let page = page.unwrap_or_else(|| self.current_url());
        let depth = depth.unwrap_or_else(|| self.scroll_depth());
        self.record(&page, ActionType::ScrollDepth, ActionInfo::ScrollDepth(depth));
        self.record(&page, closing, ActionInfo::None);

        let delivery = self.flush();
        if let Some(ctx) = self.context.as_mut() {
            ctx.state = SessionState::Ended;
        }
        self.cancel_timers();

        info!(
            reason = ?reason,
            closing = closing.as_str(),
            actions = delivery.actions,
            "Session closed"
        );
        FlushOutcome::Flushed { closing, delivery }
    }

    fn departure_for(&self, href: &str) -> Departure {
        let location = self.host.location();
        let next = strip_fragment(href);
        if !same_site(href, &location) || !is_http(next) {
            return Departure::EndSession;
        }

        match canonical_url(next) {
            Ok(next) if next == self.current_url() => Departure::Reload,
            Ok(_) => Departure::ExitPage,
            Err(_) => Departure::EndSession,
        }
    }

    fn mark_inactive(&mut self) {
        if let Some(ctx) = self.context.as_mut() {
            if ctx.state == SessionState::Active {
                ctx.state = SessionState::Inactive;
            }
        }
    }

    // ── Event handlers ──────────────────────────────────────────────────────

    fn on_interaction(&mut self) {
        let now = self.host.now();
        self.check_and_maybe_flush(IdleSource::Interaction);
        self.monitor.record_activity(now);

        if self.state() == Some(SessionState::Ended) {
            self.begin(ActionType::StartSession);
        }
    }

    fn on_click(&mut self, target: &ElementNode) {
        let info = describe_target(target);
        let location = self.current_url();
        let previous = self.current_page();

        // a client-side router already moved the location to the link target
        let soft_navigation = location != previous
            && info
                .url
                .as_deref()
                .and_then(|href| canonical_url(href).ok())
                .is_some_and(|link| link == location);

        if soft_navigation {
            self.transition(&previous, &location, Some(info));
        } else {
            self.record(&location, ActionType::Click, ActionInfo::Click(info));
            if let Some(ctx) = self.context.as_mut() {
                ctx.current_page = location;
            }
        }
    }

    fn on_submit(&mut self, form: &ElementNode, search_value: Option<String>) {
        let Some(value) = search_value.filter(|v| !v.trim().is_empty()) else {
            return;
        };
        let page = self.current_url();
        let target = describe_target(form);
        self.record(&page, ActionType::Search, ActionInfo::Search { target, value });
    }

    fn on_scroll(&mut self, offset_y: f64) {
        let Some(ctx) = self.context.as_mut() else {
            return;
        };
        if offset_y <= ctx.scroll_max {
            return;
        }
        ctx.scroll_max = offset_y;

        // mobile Safari may skip unload handlers; keep the depth durable
        let cache = ctx.classification.device.is_handheld() && ctx.classification.browser == "Safari";
        if cache {
            let decile = scroll_decile(self.scroll_depth());
            if let Err(err) = ActionQueue::cache_scroll_decile(&mut self.host, decile) {
                warn!(error = %err, "Failed to cache scroll depth");
            }
        }
    }

    fn on_history_navigation(&mut self) {
        if self.context.as_ref().map_or(true, |ctx| ctx.pointer_inside) {
            return;
        }
        if self.current_url() == self.current_page() {
            return;
        }

        self.on_interaction();
        let location = self.current_url();
        let previous = self.current_page();
        if location != previous {
            self.transition(&previous, &location, None);
        }
    }

    fn set_pointer_inside(&mut self, inside: bool) {
        if let Some(ctx) = self.context.as_mut() {
            ctx.pointer_inside = inside;
        }
    }

    /// Close `previous` and open `next` without ending the session
    fn transition(&mut self, previous: &str, next: &str, click: Option<ClickInfo>) {
        let depth = self.scroll_depth();
        self.record(previous, ActionType::ScrollDepth, ActionInfo::ScrollDepth(depth));
        self.record(previous, ActionType::ExitPage, ActionInfo::None);
        self.record(next, ActionType::EnterPage, ActionInfo::None);
        if let Some(info) = click {
            self.record(next, ActionType::Click, ActionInfo::Click(info));
        }

        if let Some(ctx) = self.context.as_mut() {
            ctx.current_page = next.to_string();
            ctx.scroll_max = 0.0;
        }

        let delivery = self.flush();
        info!(from = previous, to = next, actions = delivery.actions, "Page transition flushed");
    }

    // ── Queue and delivery ──────────────────────────────────────────────────

    fn record(&mut self, page: &str, kind: ActionType, info: ActionInfo) {
        let action = Action::new(kind, self.action_time(), &info);
        debug!(action = kind.as_str(), page, "Recorded action");
        if let Err(err) = self.queue.record(&mut self.host, page, action) {
            warn!(error = %err, action = kind.as_str(), "Failed to persist action queue");
        }
    }

    // actions recorded while inactive are backdated to the last activity
    fn action_time(&self) -> DateTime<Utc> {
        match self.state() {
            Some(SessionState::Inactive) => self.monitor.last_active_at(),
            _ => self.host.now(),
        }
    }

    /// Transmit and clear the queue
    fn flush(&mut self) -> DeliveryOutcome {
        let pages = self.queue.take();
        let outcome = self.transmit(&pages);
        if let Err(err) = ActionQueue::clear_storage(&mut self.host) {
            warn!(error = %err, "Failed to clear stored queue");
        }
        outcome
    }

    /// Transmit the open queue once the session has started.
    ///
    /// Legacy keeps the queue so the closing flush carries the whole session;
    /// Beta drains it so every action is sent exactly once. The session stays
    /// Active either way.
    fn announce(&mut self) {
        if let Some(ctx) = self.context.as_mut() {
            ctx.announce_timer = None;
        }
        if self.state() != Some(SessionState::Active) {
            return;
        }

        let outcome = match self.config.variant {
            ProtocolVariant::Legacy => {
                let pages = self.queue.pages().to_vec();
                self.transmit(&pages)
            }
            ProtocolVariant::Beta => {
                let pages = self.queue.take();
                let outcome = self.transmit(&pages);
                if let Err(err) = ActionQueue::remove_stored(&mut self.host) {
                    warn!(error = %err, "Failed to clear stored queue");
                }
                outcome
            }
        };
        debug!(actions = outcome.actions, "Announced session");
    }

    fn transmit(&mut self, pages: &[PageBucket]) -> DeliveryOutcome {
        let Some(user) = self.user_context() else {
            return DeliveryOutcome::skipped();
        };
        let origin = PageOrigin::capture(&self.host);

        match self.delivery.deliver(&mut self.host, &user, &origin, pages) {
            Ok(outcome) => outcome,
            Err(err) => {
                warn!(error = %err, "Failed to build payload");
                DeliveryOutcome::skipped()
            }
        }
    }

    fn user_context(&self) -> Option<UserContext> {
        self.context.as_ref().map(|ctx| UserContext {
            visitor_id: ctx.visitor_id.clone(),
            navigator: ctx.navigator.clone(),
            classification: ctx.classification.clone(),
        })
    }

    // ── Timers ──────────────────────────────────────────────────────────────

    fn start_idle_timer(&mut self) {
        self.cancel_idle_timer();
        let id = self
            .host
            .start_timer(TimerKind::IdleTick, Duration::from_secs(IDLE_TICK_SECONDS));
        if let Some(ctx) = self.context.as_mut() {
            ctx.idle_timer = Some(id);
        }
    }

    fn cancel_idle_timer(&mut self) {
        if let Some(id) = self.context.as_mut().and_then(|ctx| ctx.idle_timer.take()) {
            self.host.cancel_timer(id);
        }
    }

    fn schedule_announce(&mut self) {
        if let Some(id) = self.context.as_mut().and_then(|ctx| ctx.announce_timer.take()) {
            self.host.cancel_timer(id);
        }
        let id = self.host.start_timer(TimerKind::InitialFlush, INITIAL_FLUSH_DELAY);
        if let Some(ctx) = self.context.as_mut() {
            ctx.announce_timer = Some(id);
        }
    }

    fn cancel_timers(&mut self) {
        self.cancel_idle_timer();
        if let Some(id) = self.context.as_mut().and_then(|ctx| ctx.announce_timer.take()) {
            self.host.cancel_timer(id);
        }
    }

    // ── Page readers ────────────────────────────────────────────────────────

    fn current_url(&self) -> String {
        let location = self.host.location();
        canonical_url(&location).unwrap_or(location)
    }

    fn current_page(&self) -> String {
        self.context
            .as_ref()
            .map(|ctx| ctx.current_page.clone())
            .unwrap_or_default()
    }

    fn scroll_depth(&self) -> u8 {
        let scroll_max = self.context.as_ref().map_or(0.0, |ctx| ctx.scroll_max);
        scroll_depth(&self.host, scroll_max)
    }

    fn is_handheld(&self) -> bool {
        self.context
            .as_ref()
            .is_some_and(|ctx| ctx.classification.device.is_handheld())
    }
}
