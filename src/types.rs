//! Core data types for Pagetrail
//!
//! Actions, page buckets and the classification values that flow between the
//! session engine, the durable queue and the delivery channel. Wire names
//! match what the collection endpoint expects.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::target::ClickInfo;

/// Maximum text length kept verbatim before truncation kicks in
pub const TEXT_TRUNCATE_THRESHOLD: usize = 103;

/// Length a long text is cut to before the ellipsis is appended
pub const TEXT_TRUNCATE_LEN: usize = 100;

/// Kind of recorded action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ActionType {
    #[serde(rename = "enter-page")]
    EnterPage,
    #[serde(rename = "exit-page")]
    ExitPage,
    #[serde(rename = "start-session")]
    StartSession,
    #[serde(rename = "end-session")]
    EndSession,
    #[serde(rename = "onclick")]
    Click,
    #[serde(rename = "onsearch")]
    Search,
    #[serde(rename = "scroll-depth")]
    ScrollDepth,
}

impl ActionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionType::EnterPage => "enter-page",
            ActionType::ExitPage => "exit-page",
            ActionType::StartSession => "start-session",
            ActionType::EndSession => "end-session",
            ActionType::Click => "onclick",
            ActionType::Search => "onsearch",
            ActionType::ScrollDepth => "scroll-depth",
        }
    }

    /// Whether this action closes a page or a session
    pub fn is_closing(&self) -> bool {
        matches!(self, ActionType::ExitPage | ActionType::EndSession)
    }
}

/// One observed event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    #[serde(rename = "actionType")]
    pub action_type: ActionType,

    /// Instant the action happened (backdated while the session is inactive)
    #[serde(rename = "actionDate", with = "iso_millis")]
    pub timestamp: DateTime<Utc>,

    /// Structural path of the clicked or submitted element
    #[serde(rename = "actionElement", default, skip_serializing_if = "Option::is_none")]
    pub element: Option<String>,

    #[serde(rename = "actionText", default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,

    #[serde(rename = "actionURL", default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    /// Submitted search value
    #[serde(rename = "actionValue", default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,

    /// Scroll depth percentage (0-100)
    #[serde(rename = "actionNumber", default, skip_serializing_if = "Option::is_none")]
    pub number: Option<u8>,
}

impl Action {
    /// Build an action from its type-specific payload
    pub fn new(action_type: ActionType, timestamp: DateTime<Utc>, info: &ActionInfo) -> Self {
        let mut action = Action {
            action_type,
            timestamp,
            element: None,
            text: None,
            url: None,
            value: None,
            number: None,
        };

        match (action_type, info) {
            (ActionType::Click, ActionInfo::Click(click)) => {
                action.element = Some(click.element.clone());
                action.text = click.text.as_deref().and_then(normalize_text);
                action.url = click.url.as_deref().and_then(normalize_url_text);
            }
            (ActionType::Search, ActionInfo::Search { target, value }) => {
                action.element = Some(target.element.clone());
                action.value = Some(value.clone());
            }
            (ActionType::ScrollDepth, ActionInfo::ScrollDepth(depth)) => {
                action.number = Some((*depth).min(100));
            }
            _ => {}
        }

        action
    }
}

/// Type-specific payload handed to the queue alongside an action type
#[derive(Debug, Clone, PartialEq)]
pub enum ActionInfo {
    None,
    Click(ClickInfo),
    Search { target: ClickInfo, value: String },
    ScrollDepth(u8),
}

/// Ordered actions recorded against one page URL
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageBucket {
    pub url: String,
    pub actions: Vec<Action>,
}

/// Session lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Active,
    Inactive,
    Ended,
    /// The user agent was classified as a bot; nothing is tracked
    Disabled,
}

/// Device form factor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceClass {
    Desktop,
    Tablet,
    Phone,
}

impl DeviceClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceClass::Desktop => "desktop",
            DeviceClass::Tablet => "tablet",
            DeviceClass::Phone => "phone",
        }
    }

    /// Handheld devices close the session when the tab is hidden
    pub fn is_handheld(&self) -> bool {
        matches!(self, DeviceClass::Phone)
    }
}

/// Result of user-agent classification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Classification {
    pub is_bot: bool,
    pub device: DeviceClass,
    pub browser: String,
    pub os: String,
}

/// Wire protocol spoken to the collection endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProtocolVariant {
    /// `/data/send`, page buckets encoded as a JSON string
    #[default]
    Legacy,
    /// `/data/send-beta`, flat action log
    Beta,
}

impl ProtocolVariant {
    pub fn endpoint_path(&self) -> &'static str {
        match self {
            ProtocolVariant::Legacy => "/data/send",
            ProtocolVariant::Beta => "/data/send-beta",
        }
    }
}

/// Collapse newlines, truncate long text and trim. Returns `None` when empty.
pub fn normalize_text(raw: &str) -> Option<String> {
    let flattened = raw.replace('\n', " ");
    let text = if flattened.chars().count() > TEXT_TRUNCATE_THRESHOLD {
        let cut: String = flattened.chars().take(TEXT_TRUNCATE_LEN).collect();
        format!("{cut}...")
    } else {
        flattened
    };
    let trimmed = text.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn normalize_url_text(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// ISO-8601 with millisecond precision and a `Z` suffix
pub mod iso_millis {
    use chrono::{DateTime, SecondsFormat, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn format(instant: &DateTime<Utc>) -> String {
        instant.to_rfc3339_opts(SecondsFormat::Millis, true)
    }

    pub fn serialize<S: Serializer>(instant: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format(instant))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        DateTime::parse_from_rfc3339(&raw)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_action_type_wire_names() {
        let json = serde_json::to_string(&ActionType::ScrollDepth).unwrap();
        assert_eq!(json, "\"scroll-depth\"");

        let parsed: ActionType = serde_json::from_str("\"onclick\"").unwrap();
        assert_eq!(parsed, ActionType::Click);
        assert_eq!(ActionType::EndSession.as_str(), "end-session");
    }

    #[test]
    fn test_action_serializes_with_wire_fields() {
        let at = Utc.with_ymd_and_hms(2024, 1, 15, 14, 0, 0).unwrap();
        let action = Action::new(ActionType::ScrollDepth, at, &ActionInfo::ScrollDepth(42));

        let value = serde_json::to_value(&action).unwrap();
        assert_eq!(value["actionType"], "scroll-depth");
        assert_eq!(value["actionDate"], "2024-01-15T14:00:00.000Z");
        assert_eq!(value["actionNumber"], 42);
        assert!(value.get("actionElement").is_none());
    }

    #[test]
    fn test_click_action_fields() {
        let at = Utc.with_ymd_and_hms(2024, 1, 15, 14, 0, 0).unwrap();
        let click = ClickInfo {
            element: "div#main a.cta".to_string(),
            text: Some("  Sign up\nnow  ".to_string()),
            url: Some(" https://shop.test/signup ".to_string()),
        };
        let action = Action::new(ActionType::Click, at, &ActionInfo::Click(click));

        assert_eq!(action.element.as_deref(), Some("div#main a.cta"));
        assert_eq!(action.text.as_deref(), Some("Sign up now"));
        assert_eq!(action.url.as_deref(), Some("https://shop.test/signup"));
        assert_eq!(action.number, None);
    }

    #[test]
    fn test_scroll_depth_is_clamped() {
        let at = Utc.with_ymd_and_hms(2024, 1, 15, 14, 0, 0).unwrap();
        let action = Action::new(ActionType::ScrollDepth, at, &ActionInfo::ScrollDepth(250));
        assert_eq!(action.number, Some(100));
    }

    #[test]
    fn test_normalize_text_truncation() {
        let short = "a".repeat(103);
        assert_eq!(normalize_text(&short).unwrap().len(), 103);

        let long = "b".repeat(150);
        let truncated = normalize_text(&long).unwrap();
        assert_eq!(truncated.len(), 103);
        assert!(truncated.ends_with("..."));

        assert_eq!(normalize_text("   \n  "), None);
    }

    #[test]
    fn test_device_handheld() {
        assert!(DeviceClass::Phone.is_handheld());
        assert!(!DeviceClass::Tablet.is_handheld());
        assert!(!DeviceClass::Desktop.is_handheld());
    }

    #[test]
    fn test_iso_millis_round_trip() {
        let at = Utc.with_ymd_and_hms(2024, 3, 1, 8, 30, 15).unwrap();
        let formatted = iso_millis::format(&at);
        assert_eq!(formatted, "2024-03-01T08:30:15.000Z");
    }
}
