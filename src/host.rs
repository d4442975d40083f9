//! Host capabilities consumed by the session engine
//!
//! The collector never touches a browser directly. Every side effect goes
//! through one of these narrow traits so the engine can run inside a wasm
//! shim, a headless harness, or the in-memory [`crate::sim::SimulatedBrowser`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{StorageError, TransportError};

/// Wall clock
pub trait Clock {
    fn now(&self) -> DateTime<Utc>;
}

/// Origin-scoped durable key/value storage (synchronous writes)
pub trait Storage {
    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError>;
    fn set_item(&mut self, key: &str, value: &str) -> Result<(), StorageError>;
    fn remove_item(&mut self, key: &str) -> Result<(), StorageError>;
}

/// Cookie `SameSite` attribute
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SameSite {
    Lax,
    Strict,
    None,
}

/// Attributes written alongside a cookie value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CookieAttributes {
    pub expires: DateTime<Utc>,
    pub path: String,
    pub same_site: SameSite,
}

pub trait CookieJar {
    fn get_cookie(&self, name: &str) -> Option<String>;
    fn set_cookie(
        &mut self,
        name: &str,
        value: &str,
        attributes: &CookieAttributes,
    ) -> Result<(), StorageError>;
}

/// Navigator properties reported with every payload
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct NavigatorInfo {
    pub user_agent: String,
    pub language: String,
    pub platform: String,
    pub cookie_enabled: bool,
}

/// Read-only view of the hosting page
pub trait PageContext {
    /// Full current location (`window.location.href`)
    fn location(&self) -> String;
    fn referrer(&self) -> String;
    /// Link target of the currently focused element, if it has one
    fn focused_link(&self) -> Option<String>;
    fn navigator(&self) -> NavigatorInfo;
}

/// Scroll geometry readers
pub trait GeometryProbe {
    fn document_height(&self) -> f64;
    fn viewport_height(&self) -> f64;
    fn has_vertical_scroll(&self) -> bool;
}

/// A fully encoded request ready for a transport
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutgoingRequest {
    pub url: String,
    pub content_type: String,
    pub body: String,
}

/// Network transports. Both are fire-and-forget.
pub trait Transport {
    /// Whether the unload-safe beacon transport exists in this runtime
    fn supports_beacon(&self) -> bool;
    /// Queue a beacon; `Ok(false)` means the user agent refused it
    fn send_beacon(&mut self, request: &OutgoingRequest) -> Result<bool, TransportError>;
    /// Ordinary asynchronous POST; the response is never read
    fn send_request(&mut self, request: &OutgoingRequest) -> Result<(), TransportError>;
}

/// Timers the collector schedules on the host event loop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimerKind {
    /// Coarse repeating idle tick
    IdleTick,
    /// One-shot announce shortly after a fresh session starts
    InitialFlush,
}

impl TimerKind {
    pub fn repeats(&self) -> bool {
        matches!(self, TimerKind::IdleTick)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimerId(pub u64);

pub trait Timers {
    fn start_timer(&mut self, kind: TimerKind, period: Duration) -> TimerId;
    fn cancel_timer(&mut self, id: TimerId);
}

/// Everything the session engine needs from its environment
pub trait Host: Clock + Storage + CookieJar + PageContext + GeometryProbe + Transport + Timers {}

impl<T> Host for T where
    T: Clock + Storage + CookieJar + PageContext + GeometryProbe + Transport + Timers
{
}
