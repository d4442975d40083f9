//! Typed host events
//!
//! Every browser signal the collector reacts to arrives as one
//! [`CollectorEvent`]. Hosts translate their native listeners into these
//! values and hand them to [`crate::session::SessionStateMachine::dispatch`].

use serde::{Deserialize, Serialize};

use crate::host::TimerKind;
use crate::target::ElementNode;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CollectorEvent {
    PointerMove,
    KeyDown,
    Click {
        target: ElementNode,
    },
    /// Form submission; `search_value` is set when the form carries a search
    /// field with a value
    Submit {
        form: ElementNode,
        #[serde(default)]
        search_value: Option<String>,
    },
    /// Vertical scroll offset of the viewport
    Scroll {
        offset_y: f64,
    },
    VisibilityChange {
        hidden: bool,
    },
    /// `pagehide` / `beforeunload`
    PageHide,
    PageShow {
        #[serde(default)]
        persisted: bool,
    },
    PointerEnter,
    PointerLeave,
    /// `popstate` after back/forward history navigation
    HistoryNavigation,
    Timer {
        kind: TimerKind,
    },
}

impl CollectorEvent {
    pub fn name(&self) -> &'static str {
        match self {
            CollectorEvent::PointerMove => "pointer_move",
            CollectorEvent::KeyDown => "key_down",
            CollectorEvent::Click { .. } => "click",
            CollectorEvent::Submit { .. } => "submit",
            CollectorEvent::Scroll { .. } => "scroll",
            CollectorEvent::VisibilityChange { .. } => "visibility_change",
            CollectorEvent::PageHide => "page_hide",
            CollectorEvent::PageShow { .. } => "page_show",
            CollectorEvent::PointerEnter => "pointer_enter",
            CollectorEvent::PointerLeave => "pointer_leave",
            CollectorEvent::HistoryNavigation => "history_navigation",
            CollectorEvent::Timer { .. } => "timer",
        }
    }

    /// Whether the event counts as user activity for idle detection
    pub fn is_interaction(&self) -> bool {
        matches!(
            self,
            CollectorEvent::PointerMove
                | CollectorEvent::KeyDown
                | CollectorEvent::Click { .. }
                | CollectorEvent::Submit { .. }
                | CollectorEvent::Scroll { .. }
                | CollectorEvent::VisibilityChange { hidden: false }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_wire_format() {
        let event: CollectorEvent =
            serde_json::from_str(r#"{"type": "timer", "kind": "idle_tick"}"#).unwrap();
        assert_eq!(
            event,
            CollectorEvent::Timer {
                kind: TimerKind::IdleTick
            }
        );

        let click: CollectorEvent = serde_json::from_str(
            r#"{"type": "click", "target": {"tag": "a", "href": "https://shop.test/cart"}}"#,
        )
        .unwrap();
        assert_eq!(click.name(), "click");
        assert!(click.is_interaction());
    }

    #[test]
    fn test_hidden_is_not_interaction() {
        assert!(!CollectorEvent::VisibilityChange { hidden: true }.is_interaction());
        assert!(CollectorEvent::VisibilityChange { hidden: false }.is_interaction());
        assert!(!CollectorEvent::PageHide.is_interaction());
    }
}
