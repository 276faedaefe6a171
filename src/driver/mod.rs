//! Browser capability surface consumed by resolution and interaction.
//!
//! Everything above this module talks to the page through [`Driver`]. The
//! trait is deliberately small and element-handle based: lookups return opaque
//! [`ElementHandle`]s, and every read or action on a handle fails with
//! [`Error::Stale`](crate::Error::Stale) once the node has left the document.

pub mod cdp;
#[cfg(any(test, feature = "testing"))]
pub mod memory;

use async_trait::async_trait;
use serde::Deserialize;
use std::fmt;

use crate::marks::ElementDescriptor;
use crate::Result;

/// Opaque reference to a live element, valid within one driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ElementHandle(pub u64);

/// Where a lookup searches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    /// The document of the active browsing context (top page or entered frame).
    Document,
    /// Descendants of an element.
    Element(ElementHandle),
    /// The shadow root hosted by an element.
    ShadowRoot(ElementHandle),
}

impl Scope {
    /// Human-readable context type, used in not-found diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            Scope::Document => "document",
            Scope::Element(_) => "element",
            Scope::ShadowRoot(_) => "shadow root",
        }
    }
}

/// A lookup query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Query {
    Css(String),
    XPath(String),
    /// Case-insensitive substring of an element's own text.
    Text(String),
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Query::Css(s) => write!(f, "css:{}", s),
            Query::XPath(s) => write!(f, "xpath:{}", s),
            Query::Text(s) => write!(f, "text:{}", s),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MouseButton {
    Left,
    Right,
}

/// DOM events the scripted tier can synthesize.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DomEvent {
    Click,
    ContextMenu,
    MouseOver,
    MouseEnter,
    MouseMove,
    Focus,
    Input,
    Change,
    Submit,
    DragStart,
    DragOver,
    Drop,
    DragEnd,
}

impl DomEvent {
    /// DOM event type name.
    pub fn name(&self) -> &'static str {
        match self {
            DomEvent::Click => "click",
            DomEvent::ContextMenu => "contextmenu",
            DomEvent::MouseOver => "mouseover",
            DomEvent::MouseEnter => "mouseenter",
            DomEvent::MouseMove => "mousemove",
            DomEvent::Focus => "focus",
            DomEvent::Input => "input",
            DomEvent::Change => "change",
            DomEvent::Submit => "submit",
            DomEvent::DragStart => "dragstart",
            DomEvent::DragOver => "dragover",
            DomEvent::Drop => "drop",
            DomEvent::DragEnd => "dragend",
        }
    }
}

/// One `<option>` of a `<select>`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SelectOption {
    pub value: String,
    pub text: String,
}

/// Window scroll position, in CSS pixels.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScrollState {
    pub scroll_top: f64,
    pub scroll_height: f64,
    pub viewport_height: f64,
}

/// Scroll applied to a scrollable element.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ElementScroll {
    By { dx: f64, dy: f64 },
    Top,
    Bottom,
}

/// Capabilities of the underlying browser-automation driver.
#[async_trait]
pub trait Driver: Send {
    // ---- page ----

    async fn url(&mut self) -> Result<String>;

    async fn title(&mut self) -> Result<String>;

    /// Make a frame element's document the active browsing context.
    async fn enter_frame(&mut self, frame: ElementHandle) -> Result<()>;

    /// Return to the top-level document.
    async fn exit_to_top(&mut self) -> Result<()>;

    /// Enumerate interactive elements of the top-level page (Set-of-Marks pass).
    async fn mark_elements(&mut self) -> Result<Vec<ElementDescriptor>>;

    async fn scroll_state(&mut self) -> Result<ScrollState>;

    async fn scroll_to(&mut self, top: f64) -> Result<()>;

    /// Topmost element at viewport coordinates.
    async fn element_at_point(&mut self, x: f64, y: f64) -> Result<Option<ElementHandle>>;

    async fn active_element(&mut self) -> Result<Option<ElementHandle>>;

    // ---- lookup ----

    /// First match in document order.
    async fn find(&mut self, scope: Scope, query: &Query) -> Result<Option<ElementHandle>>;

    async fn find_all(&mut self, scope: Scope, query: &Query) -> Result<Vec<ElementHandle>>;

    async fn has_shadow_root(&mut self, host: ElementHandle) -> Result<bool>;

    /// Elements in `scope` that host a shadow root, in document order.
    async fn shadow_hosts(&mut self, scope: Scope) -> Result<Vec<ElementHandle>>;

    // ---- element reads ----

    /// Lowercase tag name.
    async fn tag_name(&mut self, el: ElementHandle) -> Result<String>;

    /// Rendered text, trimmed.
    async fn text(&mut self, el: ElementHandle) -> Result<String>;

    async fn attribute(&mut self, el: ElementHandle, name: &str) -> Result<Option<String>>;

    /// Current `value` property (empty for elements without one).
    async fn value(&mut self, el: ElementHandle) -> Result<String>;

    async fn is_checked(&mut self, el: ElementHandle) -> Result<bool>;

    async fn is_displayed(&mut self, el: ElementHandle) -> Result<bool>;

    async fn outer_html(&mut self, el: ElementHandle) -> Result<String>;

    async fn options(&mut self, el: ElementHandle) -> Result<Vec<SelectOption>>;

    // ---- native actions ----

    async fn scroll_into_view(&mut self, el: ElementHandle) -> Result<()>;

    /// Move the pointer over the element's center.
    async fn move_to(&mut self, el: ElementHandle) -> Result<()>;

    async fn click(&mut self, el: ElementHandle, button: MouseButton) -> Result<()>;

    async fn focus(&mut self, el: ElementHandle) -> Result<()>;

    /// Type text into the element, focusing it first.
    async fn send_keys(&mut self, el: ElementHandle, text: &str) -> Result<()>;

    /// Press a named key (`Enter`, `Tab`, ...) on the element, or on the
    /// focused element when `el` is `None`.
    async fn press_key(&mut self, el: Option<ElementHandle>, key: &str) -> Result<()>;

    async fn clear(&mut self, el: ElementHandle) -> Result<()>;

    async fn select_index(&mut self, el: ElementHandle, index: usize) -> Result<()>;

    async fn set_files(&mut self, el: ElementHandle, paths: &[String]) -> Result<()>;

    async fn drag_and_drop(&mut self, source: ElementHandle, target: ElementHandle) -> Result<()>;

    /// Submit the element's form (the element itself, or its closest form).
    /// Returns `false` when there is no form.
    async fn submit(&mut self, el: ElementHandle) -> Result<bool>;

    async fn scroll_element(&mut self, el: ElementHandle, scroll: ElementScroll) -> Result<()>;

    // ---- scripted dispatch ----

    /// Synthesize DOM events directly on the element.
    async fn dispatch(&mut self, el: ElementHandle, events: &[DomEvent]) -> Result<()>;

    /// Assign `value` and fire `input` + `change`.
    async fn set_value(&mut self, el: ElementHandle, value: &str) -> Result<()>;
}

/// Elements that accept typed text.
pub async fn accepts_text<D: Driver + ?Sized>(driver: &mut D, el: ElementHandle) -> Result<bool> {
    let tag = driver.tag_name(el).await?;
    if tag == "input" || tag == "textarea" {
        return Ok(true);
    }
    Ok(driver.attribute(el, "contenteditable").await?.as_deref() == Some("true"))
}

/// Frame-hosting elements.
pub fn is_frame_tag(tag: &str) -> bool {
    tag == "iframe" || tag == "frame"
}
