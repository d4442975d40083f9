//! In-memory browser and scripted replay
//!
//! [`SimulatedBrowser`] implements every host trait with deterministic
//! state: a settable clock, storage and cookie maps, scriptable geometry and
//! focus, and a log of outgoing requests. [`replay`] drives a collector
//! through a script of timed steps, firing due timers in order. The same
//! harness backs the unit tests, the CLI and the C ABI.

use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

use crate::classifier::RuleClassifier;
use crate::config::CollectorConfig;
use crate::delivery::TransportUsed;
use crate::error::{CollectorError, StorageError, TransportError};
use crate::events::CollectorEvent;
use crate::host::{
    Clock, CookieAttributes, CookieJar, GeometryProbe, NavigatorInfo, OutgoingRequest,
    PageContext, Storage, TimerId, TimerKind, Timers, Transport,
};
use crate::queue::{ActionQueue, LoggedAction};
use crate::session::{InitOutcome, SessionStateMachine};
use crate::types::{PageBucket, SessionState};

/// User agent reported by a fresh simulated browser (desktop Chrome)
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Clock origin of a fresh simulated browser (2024-01-15T14:00:00Z)
pub const SIM_EPOCH_SECONDS: i64 = 1_705_327_200;

// ═══════════════════════════════════════════════════════════════════════════════
// Storage backends
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    items: BTreeMap<String, String>,
    write_error: Option<StorageError>,
}

impl MemoryStorage {
    /// Make every subsequent write fail with `error`
    pub fn fail_writes(&mut self, error: StorageError) {
        self.write_error = Some(error);
    }

    pub fn restore_writes(&mut self) {
        self.write_error = None;
    }

    pub fn keys(&self) -> Vec<&str> {
        self.items.keys().map(String::as_str).collect()
    }
}

impl Storage for MemoryStorage {
    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.items.get(key).cloned())
    }

    fn set_item(&mut self, key: &str, value: &str) -> Result<(), StorageError> {
        if let Some(err) = &self.write_error {
            return Err(err.clone());
        }
        self.items.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove_item(&mut self, key: &str) -> Result<(), StorageError> {
        self.items.remove(key);
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct MemoryCookies {
    jar: BTreeMap<String, (String, CookieAttributes)>,
    write_error: Option<StorageError>,
}

impl MemoryCookies {
    pub fn fail_writes(&mut self, error: StorageError) {
        self.write_error = Some(error);
    }

    /// Stored value and attributes of a cookie
    pub fn entry(&self, name: &str) -> Option<(String, CookieAttributes)> {
        self.jar.get(name).cloned()
    }
}

impl CookieJar for MemoryCookies {
    fn get_cookie(&self, name: &str) -> Option<String> {
        self.jar.get(name).map(|(value, _)| value.clone())
    }

    fn set_cookie(
        &mut self,
        name: &str,
        value: &str,
        attributes: &CookieAttributes,
    ) -> Result<(), StorageError> {
        if let Some(err) = &self.write_error {
            return Err(err.clone());
        }
        self.jar
            .insert(name.to_string(), (value.to_string(), attributes.clone()));
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Simulated browser
// ═══════════════════════════════════════════════════════════════════════════════

/// A request a transport accepted
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SentRequest {
    pub transport: TransportUsed,
    pub at: DateTime<Utc>,
    pub request: OutgoingRequest,
}

impl SentRequest {
    /// Page buckets carried by the request body, for either protocol variant
    pub fn pages(&self) -> Result<Vec<PageBucket>, CollectorError> {
        let body: serde_json::Value = serde_json::from_str(&self.request.body)?;

        if let Some(session) = body.get("sessionObject").and_then(|v| v.as_str()) {
            return Ok(serde_json::from_str(session)?);
        }

        if let Some(log) = body.get("actionLog") {
            let entries: Vec<LoggedAction> = serde_json::from_value(log.clone())?;
            let mut queue = ActionQueue::new();
            for entry in entries {
                queue.push(&entry.url, entry.action);
            }
            return Ok(queue.take());
        }

        Err(CollectorError::Schema(
            "payload carries neither sessionObject nor actionLog".to_string(),
        ))
    }
}

#[derive(Debug, Clone)]
struct ScheduledTimer {
    kind: TimerKind,
    period: Duration,
    due: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct SimulatedBrowser {
    now: DateTime<Utc>,
    location: String,
    referrer: String,
    focused_link: Option<String>,
    navigator: NavigatorInfo,
    document_height: f64,
    viewport_height: f64,
    vertical_scroll: bool,
    storage: MemoryStorage,
    cookies: MemoryCookies,
    beacon_supported: bool,
    beacon_accepts: bool,
    beacon_error: Option<TransportError>,
    request_error: Option<TransportError>,
    sent: Vec<SentRequest>,
    timers: BTreeMap<u64, ScheduledTimer>,
    next_timer: u64,
}

impl SimulatedBrowser {
    pub fn new(location: impl Into<String>) -> Self {
        Self {
            now: Utc.timestamp_opt(SIM_EPOCH_SECONDS, 0).single().unwrap_or_default(),
            location: location.into(),
            referrer: String::new(),
            focused_link: None,
            navigator: NavigatorInfo {
                user_agent: DEFAULT_USER_AGENT.to_string(),
                language: "en-US".to_string(),
                platform: "MacIntel".to_string(),
                cookie_enabled: true,
            },
            document_height: 2000.0,
            viewport_height: 1000.0,
            vertical_scroll: true,
            storage: MemoryStorage::default(),
            cookies: MemoryCookies::default(),
            beacon_supported: true,
            beacon_accepts: true,
            beacon_error: None,
            request_error: None,
            sent: Vec::new(),
            timers: BTreeMap::new(),
            next_timer: 0,
        }
    }

    pub fn set_now(&mut self, now: DateTime<Utc>) {
        self.now = now;
    }

    /// Move the clock without firing timers
    pub fn advance(&mut self, by: Duration) {
        self.now += by;
    }

    pub fn set_location(&mut self, location: impl Into<String>) {
        self.location = location.into();
    }

    pub fn set_referrer(&mut self, referrer: impl Into<String>) {
        self.referrer = referrer.into();
    }

    pub fn set_focused_link(&mut self, href: Option<String>) {
        self.focused_link = href;
    }

    pub fn set_user_agent(&mut self, user_agent: impl Into<String>) {
        self.navigator.user_agent = user_agent.into();
    }

    pub fn set_navigator(&mut self, navigator: NavigatorInfo) {
        self.navigator = navigator;
    }

    pub fn set_geometry(&mut self, document_height: f64, viewport_height: f64) {
        self.document_height = document_height;
        self.viewport_height = viewport_height;
        self.vertical_scroll = document_height > viewport_height;
    }

    pub fn set_vertical_scroll(&mut self, scrolls: bool) {
        self.vertical_scroll = scrolls;
    }

    pub fn set_beacon_supported(&mut self, supported: bool) {
        self.beacon_supported = supported;
    }

    /// Whether the user agent agrees to queue beacons
    pub fn set_beacon_accepts(&mut self, accepts: bool) {
        self.beacon_accepts = accepts;
    }

    pub fn fail_beacons(&mut self, error: TransportError) {
        self.beacon_error = Some(error);
    }

    pub fn fail_requests(&mut self, error: TransportError) {
        self.request_error = Some(error);
    }

    pub fn sent(&self) -> &[SentRequest] {
        &self.sent
    }

    pub fn take_sent(&mut self) -> Vec<SentRequest> {
        std::mem::take(&mut self.sent)
    }

    pub fn storage(&self) -> &MemoryStorage {
        &self.storage
    }

    pub fn storage_mut(&mut self) -> &mut MemoryStorage {
        &mut self.storage
    }

    pub fn cookies(&self) -> &MemoryCookies {
        &self.cookies
    }

    pub fn cookies_mut(&mut self) -> &mut MemoryCookies {
        &mut self.cookies
    }

    /// Kinds of the scheduled timers, ordered by due time
    pub fn pending_timers(&self) -> Vec<TimerKind> {
        let mut timers: Vec<&ScheduledTimer> = self.timers.values().collect();
        timers.sort_by_key(|t| t.due);
        timers.into_iter().map(|t| t.kind).collect()
    }

    /// Page teardown drops every timer
    pub fn clear_timers(&mut self) {
        self.timers.clear();
    }

    /// Pop the earliest timer due at or before `until`, moving the clock to
    /// its due time. Repeating timers are rescheduled one period later.
    pub fn pop_due_timer(&mut self, until: DateTime<Utc>) -> Option<TimerKind> {
        let (&id, timer) = self
            .timers
            .iter()
            .filter(|(_, t)| t.due <= until)
            .min_by_key(|(id, t)| (t.due, **id))?;

        let kind = timer.kind;
        let due = timer.due;
        let period = timer.period;

        if kind.repeats() && period > Duration::zero() {
            if let Some(timer) = self.timers.get_mut(&id) {
                timer.due = due + period;
            }
        } else {
            self.timers.remove(&id);
        }

        if due > self.now {
            self.now = due;
        }
        Some(kind)
    }
}

impl Clock for SimulatedBrowser {
    fn now(&self) -> DateTime<Utc> {
        self.now
    }
}

impl Storage for SimulatedBrowser {
    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
        self.storage.get_item(key)
    }

    fn set_item(&mut self, key: &str, value: &str) -> Result<(), StorageError> {
        self.storage.set_item(key, value)
    }

    fn remove_item(&mut self, key: &str) -> Result<(), StorageError> {
        self.storage.remove_item(key)
    }
}

impl CookieJar for SimulatedBrowser {
    fn get_cookie(&self, name: &str) -> Option<String> {
        self.cookies.get_cookie(name)
    }

    fn set_cookie(
        &mut self,
        name: &str,
        value: &str,
        attributes: &CookieAttributes,
    ) -> Result<(), StorageError> {
        self.cookies.set_cookie(name, value, attributes)
    }
}

impl PageContext for SimulatedBrowser {
    fn location(&self) -> String {
        self.location.clone()
    }

    fn referrer(&self) -> String {
        self.referrer.clone()
    }

    fn focused_link(&self) -> Option<String> {
        self.focused_link.clone()
    }

    fn navigator(&self) -> NavigatorInfo {
        self.navigator.clone()
    }
}

impl GeometryProbe for SimulatedBrowser {
    fn document_height(&self) -> f64 {
        self.document_height
    }

    fn viewport_height(&self) -> f64 {
        self.viewport_height
    }

    fn has_vertical_scroll(&self) -> bool {
        self.vertical_scroll
    }
}

impl Transport for SimulatedBrowser {
    fn supports_beacon(&self) -> bool {
        self.beacon_supported
    }

    fn send_beacon(&mut self, request: &OutgoingRequest) -> Result<bool, TransportError> {
        if let Some(err) = &self.beacon_error {
            return Err(err.clone());
        }
        if !self.beacon_accepts {
            return Ok(false);
        }
        self.sent.push(SentRequest {
            transport: TransportUsed::Beacon,
            at: self.now,
            request: request.clone(),
        });
        Ok(true)
    }

    fn send_request(&mut self, request: &OutgoingRequest) -> Result<(), TransportError> {
        if let Some(err) = &self.request_error {
            return Err(err.clone());
        }
        self.sent.push(SentRequest {
            transport: TransportUsed::Request,
            at: self.now,
            request: request.clone(),
        });
        Ok(())
    }
}

impl Timers for SimulatedBrowser {
    fn start_timer(&mut self, kind: TimerKind, period: std::time::Duration) -> TimerId {
        let id = self.next_timer;
        self.next_timer += 1;
        let period = Duration::from_std(period).unwrap_or_else(|_| Duration::zero());
        self.timers.insert(
            id,
            ScheduledTimer {
                kind,
                period,
                due: self.now + period,
            },
        );
        TimerId(id)
    }

    fn cancel_timer(&mut self, id: TimerId) {
        self.timers.remove(&id.0);
    }
}

/// Advance the clock to `until`, dispatching every timer that falls due on
/// the way in order
pub fn advance_to(machine: &mut SessionStateMachine<SimulatedBrowser>, until: DateTime<Utc>) {
    while let Some(kind) = machine.host_mut().pop_due_timer(until) {
        machine.dispatch(CollectorEvent::Timer { kind });
    }
    if until > machine.host().now() {
        machine.host_mut().set_now(until);
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Replay scripts
// ═══════════════════════════════════════════════════════════════════════════════

/// One timed step of a replay script
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptStep {
    /// Milliseconds since the start of the replay
    #[serde(default)]
    pub at: u64,
    #[serde(flatten)]
    pub op: ScriptOp,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ScriptOp {
    /// Page load
    Init,
    Event { event: CollectorEvent },
    /// Change the location without reloading (history API)
    Navigate { url: String },
    Focus {
        #[serde(default)]
        href: Option<String>,
    },
    Geometry {
        document_height: f64,
        viewport_height: f64,
        #[serde(default = "default_true")]
        vertical_scroll: bool,
    },
    Beacon {
        supported: bool,
        #[serde(default = "default_true")]
        accepts: bool,
    },
    UserAgent { user_agent: String },
    /// Tear the page down and load it again, keeping storage and cookies
    Reload,
}

fn default_true() -> bool {
    true
}

/// Parse a script given either as a JSON array or as one step per line.
/// Blank lines and lines starting with `#` are skipped.
pub fn parse_script(input: &str) -> Result<Vec<ScriptStep>, CollectorError> {
    let trimmed = input.trim_start();
    let steps: Vec<ScriptStep> = if trimmed.starts_with('[') {
        serde_json::from_str(trimmed).map_err(|e| CollectorError::Script(e.to_string()))?
    } else {
        let mut steps = Vec::new();
        for (index, line) in input.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let step = serde_json::from_str(line)
                .map_err(|e| CollectorError::Script(format!("line {}: {e}", index + 1)))?;
            steps.push(step);
        }
        steps
    };

    if let Some(pair) = steps.windows(2).find(|pair| pair[1].at < pair[0].at) {
        return Err(CollectorError::Script(format!(
            "step at {}ms precedes step at {}ms",
            pair[1].at, pair[0].at
        )));
    }
    Ok(steps)
}

#[derive(Debug, Clone, Serialize)]
pub struct ReplayReport {
    pub init_outcomes: Vec<InitOutcome>,
    pub requests: Vec<SentRequest>,
    pub final_state: Option<SessionState>,
    /// Actions still queued when the script ended
    pub pending_actions: usize,
    pub visitor_id: Option<String>,
}

/// Run `steps` against a fresh collector on `browser`
pub fn replay(
    config: &CollectorConfig,
    browser: SimulatedBrowser,
    steps: &[ScriptStep],
) -> Result<ReplayReport, CollectorError> {
    let start = browser.now();
    let mut machine = SessionStateMachine::new(config.clone(), browser, Box::new(RuleClassifier));
    let mut init_outcomes = Vec::new();

    for step in steps {
        let offset = i64::try_from(step.at)
            .map_err(|_| CollectorError::Script(format!("step offset {} out of range", step.at)))?;
        advance_to(&mut machine, start + Duration::milliseconds(offset));
        debug!(at = step.at, op = ?step.op, "Replay step");

        match &step.op {
            ScriptOp::Init => init_outcomes.push(machine.init()?),
            ScriptOp::Event { event } => machine.dispatch(event.clone()),
            ScriptOp::Navigate { url } => machine.host_mut().set_location(url.clone()),
            ScriptOp::Focus { href } => machine.host_mut().set_focused_link(href.clone()),
            ScriptOp::Geometry {
                document_height,
                viewport_height,
                vertical_scroll,
            } => {
                let host = machine.host_mut();
                host.set_geometry(*document_height, *viewport_height);
                host.set_vertical_scroll(*vertical_scroll);
            }
            ScriptOp::Beacon { supported, accepts } => {
                let host = machine.host_mut();
                host.set_beacon_supported(*supported);
                host.set_beacon_accepts(*accepts);
            }
            ScriptOp::UserAgent { user_agent } => machine.host_mut().set_user_agent(user_agent.clone()),
            ScriptOp::Reload => {
                let mut host = machine.into_host();
                host.clear_timers();
                host.set_focused_link(None);
                machine = SessionStateMachine::new(config.clone(), host, Box::new(RuleClassifier));
                init_outcomes.push(machine.init()?);
            }
        }
    }

    let visitor_id = machine
        .context()
        .map(|ctx| ctx.visitor_id.clone())
        .filter(|id| !id.is_empty());

    Ok(ReplayReport {
        init_outcomes,
        requests: machine.host().sent().to_vec(),
        final_state: machine.state(),
        pending_actions: machine.queue().len(),
        visitor_id,
    })
}
