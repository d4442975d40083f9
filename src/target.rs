//! Structural descriptions of clicked and submitted elements
//!
//! The host captures an [`ElementNode`] snapshot of the event target and its
//! ancestors; [`describe_target`] turns it into the selector-like path,
//! visible text and link target recorded on `onclick`/`onsearch` actions.

use serde::{Deserialize, Serialize};

use crate::types::normalize_text;

/// Snapshot of a DOM element and its ancestor chain
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ElementNode {
    pub tag: String,
    #[serde(default)]
    pub id: Option<String>,
    /// Raw `class` attribute (for SVG elements, the base value)
    #[serde(default)]
    pub class_name: Option<String>,
    /// 1-based position among elements matching the same selector under the
    /// parent; only set when more than one element matches
    #[serde(default)]
    pub nth_of_type: Option<usize>,
    #[serde(default)]
    pub placeholder: Option<String>,
    #[serde(default)]
    pub inner_text: Option<String>,
    #[serde(default)]
    pub src: Option<String>,
    #[serde(default)]
    pub href: Option<String>,
    #[serde(default)]
    pub parent: Option<Box<ElementNode>>,
}

impl ElementNode {
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            ..Default::default()
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_class(mut self, class_name: impl Into<String>) -> Self {
        self.class_name = Some(class_name.into());
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.inner_text = Some(text.into());
        self
    }

    pub fn with_href(mut self, href: impl Into<String>) -> Self {
        self.href = Some(href.into());
        self
    }

    pub fn with_nth_of_type(mut self, position: usize) -> Self {
        self.nth_of_type = Some(position);
        self
    }

    pub fn inside(mut self, parent: ElementNode) -> Self {
        self.parent = Some(Box::new(parent));
        self
    }
}

/// Descriptor recorded for an interacted element
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClickInfo {
    pub element: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// Describe an element: selector path up to the nearest ancestor with an id,
/// visible text (placeholder first), and its `src` or `href`.
pub fn describe_target(node: &ElementNode) -> ClickInfo {
    let text = non_empty(node.placeholder.as_deref())
        .or_else(|| non_empty(node.inner_text.as_deref()))
        .and_then(normalize_text);

    let url = non_empty(node.src.as_deref())
        .or_else(|| non_empty(node.href.as_deref()))
        .map(|u| u.trim().to_string())
        .filter(|u| !u.is_empty());

    ClickInfo {
        element: element_path(node),
        text,
        url,
    }
}

fn element_path(node: &ElementNode) -> String {
    let mut segments = Vec::new();
    let mut current = Some(node);

    while let Some(el) = current {
        let mut segment = el.tag.to_lowercase();

        if let Some(id) = el.id.as_deref().filter(|id| !id.is_empty()) {
            segment.push('#');
            segment.push_str(id);
            segments.push(segment);
            break;
        }

        if let Some(class_name) = el.class_name.as_deref() {
            let classes: Vec<&str> = class_name.split_whitespace().collect();
            if !classes.is_empty() {
                segment.push('.');
                segment.push_str(&classes.join("."));
            }
        }

        if let Some(position) = el.nth_of_type {
            segment.push_str(&format!(":nth-of-type({position})"));
        }

        segments.push(segment);
        current = el.parent.as_deref();
    }

    segments.reverse();
    segments.join(" ")
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.is_empty())
}
