//! Delivery channel
//!
//! Encodes the flushed queue with customer and user metadata and hands it to
//! the host transport. The unload-safe beacon is preferred; runtimes without
//! it fall back to an ordinary request. Nothing is retried and no response
//! is read.

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::CollectorConfig;
use crate::error::CollectorError;
use crate::host::{NavigatorInfo, OutgoingRequest, PageContext, Transport};
use crate::queue::{flatten, LoggedAction};
use crate::types::{Classification, PageBucket, ProtocolVariant};
use crate::urls::hostname;

const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded; charset=UTF-8";
const BEACON_TEXT_CONTENT_TYPE: &str = "text/plain;charset=UTF-8";
const REQUEST_CONTENT_TYPE: &str = "text/plain; charset=UTF-8";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CustomerObject {
    pub website: String,
    #[serde(rename = "apiKey")]
    pub api_key: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserObject {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub browser: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub os: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device: Option<String>,
    #[serde(rename = "cookieEnabled", skip_serializing_if = "Option::is_none")]
    pub cookie_enabled: Option<bool>,
    pub language: String,
    pub platform: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    pub uuid: String,
}

/// The actions section of a payload
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum PayloadActions {
    /// Page buckets, JSON-encoded into a string
    #[serde(rename = "sessionObject")]
    Session(String),
    #[serde(rename = "actionLog")]
    Log(Vec<LoggedAction>),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Payload {
    #[serde(rename = "customerObject")]
    pub customer: CustomerObject,
    #[serde(rename = "userObject")]
    pub user: UserObject,
    #[serde(flatten)]
    pub actions: PayloadActions,
    pub referrer: String,
}

/// Page facts captured at send time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageOrigin {
    pub location: String,
    pub referrer: String,
}

impl PageOrigin {
    pub fn capture(page: &dyn PageContext) -> Self {
        Self {
            location: page.location(),
            referrer: page.referrer(),
        }
    }
}

/// Who the payload is about
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserContext {
    pub visitor_id: String,
    pub navigator: NavigatorInfo,
    pub classification: Classification,
}

/// Which transport carried a flush
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportUsed {
    Beacon,
    Request,
    /// Nothing to send
    Skipped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DeliveryOutcome {
    pub transport: TransportUsed,
    /// Whether the transport took the request. Not a delivery confirmation.
    pub accepted: bool,
    pub actions: usize,
}

impl DeliveryOutcome {
    pub fn attempted(&self) -> bool {
        self.transport != TransportUsed::Skipped
    }

    pub fn skipped() -> Self {
        Self {
            transport: TransportUsed::Skipped,
            accepted: false,
            actions: 0,
        }
    }
}

/// Builds and transmits payloads for one collector configuration
#[derive(Debug, Clone)]
pub struct DeliveryChannel {
    endpoint: String,
    api_key: String,
    variant: ProtocolVariant,
}

impl DeliveryChannel {
    pub fn new(config: &CollectorConfig) -> Self {
        Self {
            endpoint: config.endpoint(),
            api_key: config.api_key.clone(),
            variant: config.variant,
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn build_payload(
        &self,
        pages: &[PageBucket],
        user: &UserContext,
        origin: &PageOrigin,
    ) -> Result<Payload, CollectorError> {
        let customer = CustomerObject {
            website: hostname(&origin.location),
            api_key: self.api_key.clone(),
        };

        let (user_object, actions) = match self.variant {
            ProtocolVariant::Legacy => (
                UserObject {
                    browser: Some(user.classification.browser.clone()),
                    os: Some(user.classification.os.clone()),
                    device: Some(user.classification.device.as_str().to_string()),
                    cookie_enabled: Some(user.navigator.cookie_enabled),
                    language: user.navigator.language.clone(),
                    platform: user.navigator.platform.clone(),
                    location: Some(String::new()),
                    uuid: user.visitor_id.clone(),
                },
                PayloadActions::Session(serde_json::to_string(pages)?),
            ),
            ProtocolVariant::Beta => (
                UserObject {
                    browser: None,
                    os: None,
                    device: None,
                    cookie_enabled: None,
                    language: user.navigator.language.clone(),
                    platform: user.navigator.platform.clone(),
                    location: None,
                    uuid: user.visitor_id.clone(),
                },
                PayloadActions::Log(flatten(pages)),
            ),
        };

        Ok(Payload {
            customer,
            user: user_object,
            actions,
            referrer: origin.referrer.clone(),
        })
    }

    pub fn encode(&self, payload: &Payload) -> Result<String, CollectorError> {
        let body = match self.variant {
            ProtocolVariant::Legacy => serde_json::to_string_pretty(payload)?,
            ProtocolVariant::Beta => serde_json::to_string(payload)?,
        };
        Ok(body)
    }

    /// Transmit `pages`. Empty input is never sent.
    pub fn deliver(
        &self,
        transport: &mut dyn Transport,
        user: &UserContext,
        origin: &PageOrigin,
        pages: &[PageBucket],
    ) -> Result<DeliveryOutcome, CollectorError> {
        let actions: usize = pages.iter().map(|p| p.actions.len()).sum();
        if actions == 0 {
            return Ok(DeliveryOutcome::skipped());
        }

        let payload = self.build_payload(pages, user, origin)?;
        let body = self.encode(&payload)?;

        let outcome = if transport.supports_beacon() {
            let request = OutgoingRequest {
                url: self.endpoint.clone(),
                content_type: self.beacon_content_type().to_string(),
                body,
            };
            let accepted = match transport.send_beacon(&request) {
                Ok(true) => true,
                Ok(false) => {
                    warn!(endpoint = %self.endpoint, "Beacon refused by user agent");
                    false
                }
                Err(err) => {
                    warn!(error = %err, "Beacon delivery failed");
                    false
                }
            };
            DeliveryOutcome {
                transport: TransportUsed::Beacon,
                accepted,
                actions,
            }
        } else {
            debug!("Beacon unsupported, falling back to request");
            let request = OutgoingRequest {
                url: self.endpoint.clone(),
                content_type: REQUEST_CONTENT_TYPE.to_string(),
                body,
            };
            let accepted = match transport.send_request(&request) {
                Ok(()) => true,
                Err(err) => {
                    warn!(error = %err, "Request delivery failed");
                    false
                }
            };
            DeliveryOutcome {
                transport: TransportUsed::Request,
                accepted,
                actions,
            }
        };

        info!(
            transport = ?outcome.transport,
            accepted = outcome.accepted,
            actions,
            "Flushed action queue"
        );
        Ok(outcome)
    }

    fn beacon_content_type(&self) -> &'static str {
        match self.variant {
            ProtocolVariant::Legacy => FORM_CONTENT_TYPE,
            ProtocolVariant::Beta => BEACON_TEXT_CONTENT_TYPE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportError;
    use crate::sim::SimulatedBrowser;
    use crate::types::{Action, ActionInfo, ActionType, DeviceClass};
    use chrono::{TimeZone, Utc};
    use pretty_assertions::assert_eq;

    fn user() -> UserContext {
        UserContext {
            visitor_id: "11111111-2222-4333-8444-555555555555".to_string(),
            navigator: NavigatorInfo {
                user_agent: "test".to_string(),
                language: "en-US".to_string(),
                platform: "MacIntel".to_string(),
                cookie_enabled: true,
            },
            classification: Classification {
                is_bot: false,
                device: DeviceClass::Desktop,
                browser: "Chrome".to_string(),
                os: "Mac".to_string(),
            },
        }
    }

    fn pages() -> Vec<PageBucket> {
        let at = Utc.with_ymd_and_hms(2024, 1, 15, 14, 0, 0).unwrap();
        vec![
            PageBucket {
                url: "https://shop.test/".to_string(),
                actions: vec![
                    Action::new(ActionType::EnterPage, at, &ActionInfo::None),
                    Action::new(ActionType::ScrollDepth, at, &ActionInfo::ScrollDepth(30)),
                ],
            },
            PageBucket {
                url: "https://shop.test/cart".to_string(),
                actions: vec![Action::new(ActionType::EnterPage, at, &ActionInfo::None)],
            },
        ]
    }

    fn origin() -> PageOrigin {
        PageOrigin::capture(&browser())
    }

    fn browser() -> SimulatedBrowser {
        let mut browser = SimulatedBrowser::new("https://shop.test/");
        browser.set_referrer("https://search.test/?q=shoes");
        browser
    }

    #[test]
    fn test_legacy_payload_shape() {
        let channel = DeliveryChannel::new(&CollectorConfig::new("key-1"));
        let payload = channel.build_payload(&pages(), &user(), &origin()).unwrap();
        let value = serde_json::to_value(&payload).unwrap();

        assert_eq!(value["customerObject"]["website"], "shop.test");
        assert_eq!(value["customerObject"]["apiKey"], "key-1");
        assert_eq!(value["userObject"]["browser"], "Chrome");
        assert_eq!(value["userObject"]["device"], "desktop");
        assert_eq!(value["userObject"]["cookieEnabled"], true);
        assert_eq!(value["userObject"]["location"], "");
        assert_eq!(value["referrer"], "https://search.test/?q=shoes");

        let session: Vec<PageBucket> =
            serde_json::from_str(value["sessionObject"].as_str().unwrap()).unwrap();
        assert_eq!(session, pages());
    }

    #[test]
    fn test_beta_payload_shape() {
        let config = CollectorConfig::new("key-1").with_variant(ProtocolVariant::Beta);
        let channel = DeliveryChannel::new(&config);
        let payload = channel.build_payload(&pages(), &user(), &origin()).unwrap();
        let value = serde_json::to_value(&payload).unwrap();

        assert!(value["userObject"].get("browser").is_none());
        assert_eq!(value["userObject"]["language"], "en-US");
        assert_eq!(value["userObject"]["platform"], "MacIntel");

        let log = value["actionLog"].as_array().unwrap();
        assert_eq!(log.len(), 3);
        assert_eq!(log[1]["action"]["actionType"], "scroll-depth");
        assert_eq!(log[2]["url"], "https://shop.test/cart");
        assert!(value.get("sessionObject").is_none());
    }

    #[test]
    fn test_prefers_beacon() {
        let channel = DeliveryChannel::new(&CollectorConfig::new("k"));
        let mut transport = browser();

        let outcome = channel
            .deliver(&mut transport, &user(), &origin(), &pages())
            .unwrap();

        assert_eq!(outcome.transport, TransportUsed::Beacon);
        assert!(outcome.accepted);
        assert_eq!(outcome.actions, 3);

        let sent = transport.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].request.url, "https://collect.pagetrail.dev/data/send");
        assert_eq!(sent[0].request.content_type, FORM_CONTENT_TYPE);
        assert!(sent[0].request.body.contains("\n  \"customerObject\""));
    }

    #[test]
    fn test_falls_back_to_request() {
        let config = CollectorConfig::new("k").with_variant(ProtocolVariant::Beta);
        let channel = DeliveryChannel::new(&config);
        let mut transport = browser();
        transport.set_beacon_supported(false);

        let outcome = channel
            .deliver(&mut transport, &user(), &origin(), &pages())
            .unwrap();

        assert_eq!(outcome.transport, TransportUsed::Request);
        assert!(outcome.accepted);
        assert_eq!(transport.sent()[0].request.content_type, REQUEST_CONTENT_TYPE);
    }

    #[test]
    fn test_beacon_failure_is_not_retried() {
        let channel = DeliveryChannel::new(&CollectorConfig::new("k"));
        let mut transport = browser();
        transport.fail_beacons(TransportError::Beacon("payload too large".to_string()));

        let outcome = channel
            .deliver(&mut transport, &user(), &origin(), &pages())
            .unwrap();

        assert!(outcome.attempted());
        assert!(!outcome.accepted);
        assert!(transport.sent().is_empty());
    }

    #[test]
    fn test_empty_queue_is_skipped() {
        let channel = DeliveryChannel::new(&CollectorConfig::new("k"));
        let mut transport = browser();

        let outcome = channel
            .deliver(&mut transport, &user(), &origin(), &[])
            .unwrap();

        assert!(!outcome.attempted());
        assert!(transport.sent().is_empty());
    }
}
