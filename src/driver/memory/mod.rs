//! In-memory DOM driver.
//!
//! Models just enough of a browser for resolution and interaction logic to be
//! exercised without Chrome: nested documents (iframes), shadow roots, layout
//! boxes for hit testing, form state, focus, scripted click effects, and a log
//! of every driver call. Built only with the `testing` feature.

mod query;

use std::collections::BTreeMap;

use async_trait::async_trait;
use tracing::debug;

use self::query::{parse_css, parse_xpath, Combinator, CssSelector, Matchable};
use super::{
    is_frame_tag, DomEvent, Driver, ElementHandle, ElementScroll, MouseButton, Query, Scope,
    ScrollState, SelectOption,
};
use crate::marks::{ElementDescriptor, Point, ViewportCoords};
use crate::{Error, Result};

/// Layout box in viewport coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    fn contains(&self, x: f64, y: f64) -> bool {
        x >= self.x && x <= self.x + self.width && y >= self.y && y <= self.y + self.height
    }

    fn center(&self) -> (f64, f64) {
        (self.x + self.width / 2.0, self.y + self.height / 2.0)
    }
}

/// Page reaction to a successful click.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    SetAttr(String, String),
    SetText(String),
    SetTitle(String),
    Navigate { url: String, title: String },
    /// Remove the clicked element from the document.
    Detach,
    /// Move focus to another element, as a launcher opening an editor does.
    Focus(ElementHandle),
}

/// Builder for one node.
#[derive(Debug, Clone, Default)]
pub struct NodeSpec {
    tag: String,
    attrs: BTreeMap<String, String>,
    text: String,
    value: String,
    checked: bool,
    hidden: bool,
    intercepts_clicks: bool,
    rejects_keys: bool,
    rect: Option<Rect>,
    options: Vec<SelectOption>,
    on_click: Vec<Effect>,
}

impl NodeSpec {
    pub fn new(tag: &str) -> Self {
        Self {
            tag: tag.to_lowercase(),
            ..Default::default()
        }
    }

    pub fn attr(mut self, name: &str, value: &str) -> Self {
        self.attrs.insert(name.into(), value.into());
        self
    }

    pub fn id(self, id: &str) -> Self {
        self.attr("id", id)
    }

    /// Own text (not including children).
    pub fn text(mut self, text: &str) -> Self {
        self.text = text.into();
        self
    }

    pub fn value(mut self, value: &str) -> Self {
        self.value = value.into();
        self
    }

    pub fn checked(mut self, checked: bool) -> Self {
        self.checked = checked;
        self
    }

    /// Not rendered (`display: none`).
    pub fn hidden(mut self) -> Self {
        self.hidden = true;
        self
    }

    /// Covered by another element: pointer clicks fail, scripted events work.
    pub fn intercepts_clicks(mut self) -> Self {
        self.intercepts_clicks = true;
        self
    }

    /// Named key presses fail; typed text still lands.
    pub fn rejects_keys(mut self) -> Self {
        self.rejects_keys = true;
        self
    }

    pub fn rect(mut self, x: f64, y: f64, width: f64, height: f64) -> Self {
        self.rect = Some(Rect {
            x,
            y,
            width,
            height,
        });
        self
    }

    pub fn option(mut self, value: &str, text: &str) -> Self {
        self.options.push(SelectOption {
            value: value.into(),
            text: text.into(),
        });
        self
    }

    pub fn on_click(mut self, effect: Effect) -> Self {
        self.on_click.push(effect);
        self
    }
}

#[derive(Debug, Clone)]
struct Node {
    tag: String,
    attrs: BTreeMap<String, String>,
    text: String,
    value: String,
    checked: bool,
    hidden: bool,
    intercepts_clicks: bool,
    rejects_keys: bool,
    rect: Option<Rect>,
    options: Vec<SelectOption>,
    selected: Option<usize>,
    on_click: Vec<Effect>,
    parent: Option<usize>,
    children: Vec<usize>,
    /// Top-level nodes of this element's shadow root.
    shadow: Option<Vec<usize>>,
    /// Whether this node is a top-level node inside a shadow root.
    shadow_top: bool,
    /// Body of the document an iframe hosts.
    frame_body: Option<usize>,
    detached: bool,
    keys: Vec<String>,
}

impl Node {
    fn from_spec(spec: NodeSpec, parent: Option<usize>) -> Self {
        let selected = if spec.options.is_empty() { None } else { Some(0) };
        Self {
            tag: spec.tag,
            attrs: spec.attrs,
            text: spec.text,
            value: spec.value,
            checked: spec.checked,
            hidden: spec.hidden,
            intercepts_clicks: spec.intercepts_clicks,
            rejects_keys: spec.rejects_keys,
            rect: spec.rect,
            options: spec.options,
            selected,
            on_click: spec.on_click,
            parent,
            children: Vec::new(),
            shadow: None,
            shadow_top: false,
            frame_body: None,
            detached: false,
            keys: Vec::new(),
        }
    }
}

impl Matchable for Node {
    fn tag(&self) -> &str {
        &self.tag
    }
    fn attr(&self, name: &str) -> Option<&str> {
        self.attrs.get(name).map(String::as_str)
    }
    fn own_text(&self) -> &str {
        &self.text
    }
}

/// In-memory [`Driver`].
#[derive(Debug, Clone)]
pub struct MemoryDriver {
    nodes: Vec<Node>,
    body: usize,
    url: String,
    title: String,
    frames: Vec<usize>,
    active: Option<usize>,
    scroll: ScrollState,
    pending_empty_scans: usize,
    marks: Option<Vec<ElementDescriptor>>,
    submissions: Vec<usize>,
    calls: Vec<String>,
}

impl MemoryDriver {
    /// Empty page with a `<body>`.
    pub fn new(url: &str, title: &str) -> Self {
        Self {
            nodes: vec![Node::from_spec(NodeSpec::new("body"), None)],
            body: 0,
            url: url.into(),
            title: title.into(),
            frames: Vec::new(),
            active: None,
            scroll: ScrollState {
                scroll_top: 0.0,
                scroll_height: 800.0,
                viewport_height: 800.0,
            },
            pending_empty_scans: 0,
            marks: None,
            submissions: Vec::new(),
            calls: Vec::new(),
        }
    }

    pub fn body(&self) -> ElementHandle {
        ElementHandle(self.body as u64)
    }

    /// Append a child element.
    pub fn append(&mut self, parent: ElementHandle, spec: NodeSpec) -> ElementHandle {
        let parent = parent.0 as usize;
        let id = self.nodes.len();
        self.nodes.push(Node::from_spec(spec, Some(parent)));
        self.nodes[parent].children.push(id);
        ElementHandle(id as u64)
    }

    /// Append an element to `host`'s shadow root, creating the root if needed.
    pub fn append_shadow(&mut self, host: ElementHandle, spec: NodeSpec) -> ElementHandle {
        let host = host.0 as usize;
        let id = self.nodes.len();
        let mut node = Node::from_spec(spec, Some(host));
        node.shadow_top = true;
        self.nodes.push(node);
        self.nodes[host].shadow.get_or_insert_with(Vec::new).push(id);
        ElementHandle(id as u64)
    }

    /// Body of the document hosted by an iframe, created on first use.
    pub fn frame_body(&mut self, frame: ElementHandle) -> ElementHandle {
        let frame = frame.0 as usize;
        if let Some(body) = self.nodes[frame].frame_body {
            return ElementHandle(body as u64);
        }
        let body = self.nodes.len();
        self.nodes.push(Node::from_spec(NodeSpec::new("body"), None));
        self.nodes[frame].frame_body = Some(body);
        ElementHandle(body as u64)
    }

    pub fn set_scroll(&mut self, state: ScrollState) {
        self.scroll = state;
    }

    /// Fixed result for [`Driver::mark_elements`] instead of deriving marks.
    pub fn set_marks(&mut self, marks: Vec<ElementDescriptor>) {
        self.marks = Some(marks);
    }

    /// Make the next `n` scans come back empty, as on a still-loading page.
    pub fn fail_scans(&mut self, n: usize) {
        self.pending_empty_scans = n;
    }

    /// Every driver call, in order.
    pub fn calls(&self) -> &[String] {
        &self.calls
    }

    /// Position of the first call starting with `prefix`.
    pub fn call_position(&self, prefix: &str) -> Option<usize> {
        self.calls.iter().position(|c| c.starts_with(prefix))
    }

    pub fn node_value(&self, el: ElementHandle) -> &str {
        &self.nodes[el.0 as usize].value
    }

    pub fn node_attr(&self, el: ElementHandle, name: &str) -> Option<&str> {
        self.nodes[el.0 as usize].attr(name)
    }

    pub fn node_checked(&self, el: ElementHandle) -> bool {
        self.nodes[el.0 as usize].checked
    }

    /// Named keys pressed on an element.
    pub fn pressed_keys(&self, el: ElementHandle) -> &[String] {
        &self.nodes[el.0 as usize].keys
    }

    /// Forms submitted so far.
    pub fn submissions(&self) -> Vec<ElementHandle> {
        self.submissions
            .iter()
            .map(|&i| ElementHandle(i as u64))
            .collect()
    }

    pub fn active(&self) -> Option<ElementHandle> {
        self.active.map(|i| ElementHandle(i as u64))
    }

    pub fn is_attached(&self, el: ElementHandle) -> bool {
        self.nodes.get(el.0 as usize).is_some_and(|n| !n.detached)
    }

    pub fn current_title(&self) -> &str {
        &self.title
    }

    fn log(&mut self, call: String) {
        debug!("memory driver: {}", call);
        self.calls.push(call);
    }

    fn live(&self, el: ElementHandle) -> Result<usize> {
        let idx = el.0 as usize;
        match self.nodes.get(idx) {
            Some(n) if !n.detached => Ok(idx),
            Some(_) => Err(Error::Stale(format!("element #{} is detached", idx))),
            None => Err(Error::Stale(format!("unknown element #{}", idx))),
        }
    }

    fn document_root(&self) -> usize {
        self.frames
            .last()
            .and_then(|&f| self.nodes[f].frame_body)
            .unwrap_or(self.body)
    }

    /// Light-tree descendants of `root` in document order.
    fn descendants(&self, root: usize, include_root: bool, out: &mut Vec<usize>) {
        if include_root {
            out.push(root);
        }
        for &child in &self.nodes[root].children {
            self.descendants(child, true, out);
        }
    }

    fn candidates(&self, scope: Scope) -> Result<Vec<usize>> {
        let mut out = Vec::new();
        match scope {
            Scope::Document => self.descendants(self.document_root(), true, &mut out),
            Scope::Element(el) => self.descendants(self.live(el)?, false, &mut out),
            Scope::ShadowRoot(host) => {
                let host = self.live(host)?;
                let tops = self.nodes[host]
                    .shadow
                    .clone()
                    .ok_or_else(|| Error::Driver(format!("element #{} has no shadow root", host)))?;
                for top in tops {
                    self.descendants(top, true, &mut out);
                }
            }
        }
        out.retain(|&i| !self.nodes[i].detached);
        Ok(out)
    }

    fn css_matches(&self, sel: &CssSelector, idx: usize) -> bool {
        self.css_matches_at(sel, sel.parts.len() - 1, idx)
    }

    fn css_matches_at(&self, sel: &CssSelector, part: usize, idx: usize) -> bool {
        let (combinator, compound) = &sel.parts[part];
        if !compound.matches(&self.nodes[idx]) {
            return false;
        }
        if part == 0 {
            return true;
        }
        let parent_of = |i: usize| {
            let n = &self.nodes[i];
            if n.shadow_top {
                None
            } else {
                n.parent
            }
        };
        match *combinator {
            Combinator::Child => parent_of(idx).is_some_and(|p| self.css_matches_at(sel, part - 1, p)),
            Combinator::Descendant => {
                let mut cur = parent_of(idx);
                while let Some(p) = cur {
                    if self.css_matches_at(sel, part - 1, p) {
                        return true;
                    }
                    cur = parent_of(p);
                }
                false
            }
        }
    }

    fn matching(&self, scope: Scope, query: &Query) -> Result<Vec<usize>> {
        let candidates = self.candidates(scope)?;
        let hits = match query {
            Query::Css(selector) => {
                let list = selector
                    .split(',')
                    .map(parse_css)
                    .collect::<Result<Vec<_>>>()?;
                candidates
                    .into_iter()
                    .filter(|&i| list.iter().any(|sel| self.css_matches(sel, i)))
                    .collect()
            }
            Query::XPath(xpath) => {
                let step = parse_xpath(xpath)?;
                candidates
                    .into_iter()
                    .filter(|&i| step.matches(&self.nodes[i]))
                    .collect()
            }
            Query::Text(needle) => {
                let needle = needle.to_lowercase();
                if needle.is_empty() {
                    return Ok(Vec::new());
                }
                candidates
                    .into_iter()
                    .filter(|&i| self.nodes[i].text.to_lowercase().contains(&needle))
                    .collect()
            }
        };
        Ok(hits)
    }

    fn displayed(&self, mut idx: usize) -> bool {
        loop {
            let node = &self.nodes[idx];
            if node.hidden {
                return false;
            }
            match node.parent {
                Some(p) => idx = p,
                None => return true,
            }
        }
    }

    fn rendered_text(&self, idx: usize) -> String {
        let mut parts = Vec::new();
        let mut all = Vec::new();
        self.descendants(idx, true, &mut all);
        for i in all {
            let t = self.nodes[i].text.trim();
            if !t.is_empty() && self.displayed(i) {
                parts.push(t.to_string());
            }
        }
        parts.join(" ")
    }

    fn html(&self, idx: usize) -> String {
        let node = &self.nodes[idx];
        let mut out = format!("<{}", node.tag);
        for (k, v) in &node.attrs {
            out.push_str(&format!(" {}=\"{}\"", k, v));
        }
        out.push('>');
        out.push_str(&node.text);
        for &child in &node.children {
            out.push_str(&self.html(child));
        }
        out.push_str(&format!("</{}>", node.tag));
        out
    }

    fn form_of(&self, idx: usize) -> Option<usize> {
        let mut cur = Some(idx);
        while let Some(i) = cur {
            if self.nodes[i].tag == "form" {
                return Some(i);
            }
            cur = self.nodes[i].parent;
        }
        None
    }

    fn is_focusable(&self, idx: usize) -> bool {
        let n = &self.nodes[idx];
        matches!(n.tag.as_str(), "input" | "textarea" | "select" | "button" | "a")
            || n.attr("contenteditable") == Some("true")
    }

    fn detach(&mut self, idx: usize) {
        if let Some(parent) = self.nodes[idx].parent {
            self.nodes[parent].children.retain(|&c| c != idx);
        }
        let mut all = Vec::new();
        self.descendants(idx, true, &mut all);
        for i in all {
            self.nodes[i].detached = true;
        }
        if self.active.is_some_and(|a| self.nodes[a].detached) {
            self.active = None;
        }
    }

    /// Default activation behavior plus registered effects.
    fn activate(&mut self, idx: usize) {
        let (tag, ty) = {
            let n = &self.nodes[idx];
            (n.tag.clone(), n.attr("type").map(str::to_string))
        };
        if tag == "input" && ty.as_deref() == Some("checkbox") {
            self.nodes[idx].checked = !self.nodes[idx].checked;
        } else if tag == "input" && ty.as_deref() == Some("radio") {
            let name = self.nodes[idx].attr("name").map(str::to_string);
            if let Some(name) = name {
                for n in self.nodes.iter_mut() {
                    if n.tag == "input" && n.attr("name") == Some(name.as_str()) {
                        n.checked = false;
                    }
                }
            }
            self.nodes[idx].checked = true;
        }
        if self.is_focusable(idx) {
            self.active = Some(idx);
        }

        for effect in self.nodes[idx].on_click.clone() {
            match effect {
                Effect::SetAttr(name, value) => {
                    self.nodes[idx].attrs.insert(name, value);
                }
                Effect::SetText(text) => self.nodes[idx].text = text,
                Effect::SetTitle(title) => self.title = title,
                Effect::Navigate { url, title } => {
                    self.url = url;
                    self.title = title;
                }
                Effect::Detach => self.detach(idx),
                Effect::Focus(target) => {
                    if let Ok(target) = self.live(target) {
                        self.active = Some(target);
                    }
                }
            }
        }
    }

    fn derive_marks(&self) -> Vec<ElementDescriptor> {
        let mut all = Vec::new();
        self.descendants(self.body, false, &mut all);
        all.into_iter()
            .filter(|&i| {
                let n = &self.nodes[i];
                let interactive = matches!(
                    n.tag.as_str(),
                    "a" | "button" | "input" | "select" | "textarea"
                ) || n.attr("role") == Some("button")
                    || n.attr("onclick").is_some();
                interactive && n.rect.is_some() && self.displayed(i)
            })
            .enumerate()
            .map(|(id, i)| {
                let n = &self.nodes[i];
                let rect = n.rect.unwrap_or(Rect {
                    x: 0.0,
                    y: 0.0,
                    width: 0.0,
                    height: 0.0,
                });
                let (cx, cy) = rect.center();
                let selector = match (n.attr("id"), n.attr("name")) {
                    (Some(id), _) => format!("#{}", id),
                    (None, Some(name)) => format!("{}[name=\"{}\"]", n.tag, name),
                    _ => String::new(),
                };
                ElementDescriptor {
                    id,
                    tag: n.tag.clone(),
                    text: self.rendered_text(i).chars().take(60).collect(),
                    selector,
                    xpath: None,
                    center: Some(Point {
                        x: cx,
                        y: cy + self.scroll.scroll_top,
                    }),
                    viewport_coords: Some(ViewportCoords {
                        center_x: cx,
                        center_y: cy,
                    }),
                    href: n.attr("href").map(str::to_string),
                }
            })
            .collect()
    }
}

fn scope_label(scope: Scope) -> String {
    match scope {
        Scope::Document => "document".into(),
        Scope::Element(el) => format!("#{}", el.0),
        Scope::ShadowRoot(el) => format!("shadow(#{})", el.0),
    }
}

#[async_trait]
impl Driver for MemoryDriver {
    async fn url(&mut self) -> Result<String> {
        Ok(self.url.clone())
    }

    async fn title(&mut self) -> Result<String> {
        Ok(self.title.clone())
    }

    async fn enter_frame(&mut self, frame: ElementHandle) -> Result<()> {
        let idx = self.live(frame)?;
        self.log(format!("enter_frame #{}", idx));
        if !is_frame_tag(&self.nodes[idx].tag) || self.nodes[idx].frame_body.is_none() {
            return Err(Error::Driver(format!("element #{} is not a frame", idx)));
        }
        self.frames.push(idx);
        Ok(())
    }

    async fn exit_to_top(&mut self) -> Result<()> {
        self.frames.clear();
        Ok(())
    }

    async fn mark_elements(&mut self) -> Result<Vec<ElementDescriptor>> {
        self.log("mark_elements".into());
        if self.pending_empty_scans > 0 {
            self.pending_empty_scans -= 1;
            return Ok(Vec::new());
        }
        Ok(match self.marks {
            Some(ref marks) => marks.clone(),
            None => self.derive_marks(),
        })
    }

    async fn scroll_state(&mut self) -> Result<ScrollState> {
        Ok(self.scroll)
    }

    async fn scroll_to(&mut self, top: f64) -> Result<()> {
        let max = (self.scroll.scroll_height - self.scroll.viewport_height).max(0.0);
        self.scroll.scroll_top = top.clamp(0.0, max);
        self.log(format!("scroll_to {}", self.scroll.scroll_top));
        Ok(())
    }

    async fn element_at_point(&mut self, x: f64, y: f64) -> Result<Option<ElementHandle>> {
        self.log(format!("element_at_point {} {}", x, y));
        let mut all = Vec::new();
        self.descendants(self.body, true, &mut all);
        let hit = all.into_iter().rev().find(|&i| {
            self.nodes[i].rect.is_some_and(|r| r.contains(x, y)) && self.displayed(i)
        });
        Ok(hit.map(|i| ElementHandle(i as u64)))
    }

    async fn active_element(&mut self) -> Result<Option<ElementHandle>> {
        Ok(self.active.map(|i| ElementHandle(i as u64)))
    }

    async fn find(&mut self, scope: Scope, query: &Query) -> Result<Option<ElementHandle>> {
        self.log(format!("find {} {}", scope_label(scope), query));
        let hits = self.matching(scope, query)?;
        Ok(hits.first().map(|&i| ElementHandle(i as u64)))
    }

    async fn find_all(&mut self, scope: Scope, query: &Query) -> Result<Vec<ElementHandle>> {
        self.log(format!("find_all {} {}", scope_label(scope), query));
        let hits = self.matching(scope, query)?;
        Ok(hits.into_iter().map(|i| ElementHandle(i as u64)).collect())
    }

    async fn has_shadow_root(&mut self, host: ElementHandle) -> Result<bool> {
        let idx = self.live(host)?;
        Ok(self.nodes[idx].shadow.is_some())
    }

    async fn shadow_hosts(&mut self, scope: Scope) -> Result<Vec<ElementHandle>> {
        self.log(format!("shadow_hosts {}", scope_label(scope)));
        Ok(self
            .candidates(scope)?
            .into_iter()
            .filter(|&i| self.nodes[i].shadow.is_some())
            .map(|i| ElementHandle(i as u64))
            .collect())
    }

    async fn tag_name(&mut self, el: ElementHandle) -> Result<String> {
        let idx = self.live(el)?;
        Ok(self.nodes[idx].tag.clone())
    }

    async fn text(&mut self, el: ElementHandle) -> Result<String> {
        let idx = self.live(el)?;
        Ok(self.rendered_text(idx))
    }

    async fn attribute(&mut self, el: ElementHandle, name: &str) -> Result<Option<String>> {
        let idx = self.live(el)?;
        Ok(self.nodes[idx].attrs.get(name).cloned())
    }

    async fn value(&mut self, el: ElementHandle) -> Result<String> {
        let idx = self.live(el)?;
        let node = &self.nodes[idx];
        if node.tag == "select" {
            return Ok(node
                .selected
                .and_then(|s| node.options.get(s))
                .map(|o| o.value.clone())
                .unwrap_or_default());
        }
        Ok(node.value.clone())
    }

    async fn is_checked(&mut self, el: ElementHandle) -> Result<bool> {
        let idx = self.live(el)?;
        Ok(self.nodes[idx].checked)
    }

    async fn is_displayed(&mut self, el: ElementHandle) -> Result<bool> {
        let idx = self.live(el)?;
        Ok(self.displayed(idx))
    }

    async fn outer_html(&mut self, el: ElementHandle) -> Result<String> {
        let idx = self.live(el)?;
        Ok(self.html(idx))
    }

    async fn options(&mut self, el: ElementHandle) -> Result<Vec<SelectOption>> {
        let idx = self.live(el)?;
        Ok(self.nodes[idx].options.clone())
    }

    async fn scroll_into_view(&mut self, el: ElementHandle) -> Result<()> {
        let idx = self.live(el)?;
        self.log(format!("scroll_into_view #{}", idx));
        Ok(())
    }

    async fn move_to(&mut self, el: ElementHandle) -> Result<()> {
        let idx = self.live(el)?;
        if !self.displayed(idx) {
            return Err(Error::Driver(format!("element #{} is not interactable", idx)));
        }
        self.log(format!("move_to #{}", idx));
        Ok(())
    }

    async fn click(&mut self, el: ElementHandle, button: MouseButton) -> Result<()> {
        let idx = self.live(el)?;
        if !self.displayed(idx) {
            return Err(Error::Driver(format!("element #{} is not interactable", idx)));
        }
        if self.nodes[idx].intercepts_clicks {
            return Err(Error::Driver(format!(
                "element click intercepted on #{}",
                idx
            )));
        }
        match button {
            MouseButton::Left => {
                self.log(format!("click #{}", idx));
                self.activate(idx);
            }
            MouseButton::Right => self.log(format!("context_click #{}", idx)),
        }
        Ok(())
    }

    async fn focus(&mut self, el: ElementHandle) -> Result<()> {
        let idx = self.live(el)?;
        self.log(format!("focus #{}", idx));
        self.active = Some(idx);
        Ok(())
    }

    async fn send_keys(&mut self, el: ElementHandle, text: &str) -> Result<()> {
        let idx = self.live(el)?;
        self.log(format!("keys #{} {}", idx, text));
        self.active = Some(idx);
        let node = &mut self.nodes[idx];
        if node.attr("contenteditable") == Some("true") {
            node.text.push_str(text);
        } else {
            node.value.push_str(text);
        }
        Ok(())
    }

    async fn press_key(&mut self, el: Option<ElementHandle>, key: &str) -> Result<()> {
        let idx = match el {
            Some(el) => self.live(el)?,
            None => self
                .active
                .ok_or_else(|| Error::Driver("no focused element".into()))?,
        };
        if self.nodes[idx].rejects_keys {
            return Err(Error::Driver(format!("key '{}' rejected by #{}", key, idx)));
        }
        self.log(format!("key #{} {}", idx, key));
        self.nodes[idx].keys.push(key.to_string());
        if key == "Enter" && self.nodes[idx].tag == "input" {
            if let Some(form) = self.form_of(idx) {
                self.submissions.push(form);
            }
        }
        Ok(())
    }

    async fn clear(&mut self, el: ElementHandle) -> Result<()> {
        let idx = self.live(el)?;
        self.log(format!("clear #{}", idx));
        let node = &mut self.nodes[idx];
        node.value.clear();
        if node.attr("contenteditable") == Some("true") {
            node.text.clear();
        }
        Ok(())
    }

    async fn select_index(&mut self, el: ElementHandle, index: usize) -> Result<()> {
        let idx = self.live(el)?;
        self.log(format!("select_index #{} {}", idx, index));
        let node = &mut self.nodes[idx];
        if index >= node.options.len() {
            return Err(Error::Driver(format!("option index {} out of range", index)));
        }
        node.selected = Some(index);
        Ok(())
    }

    async fn set_files(&mut self, el: ElementHandle, paths: &[String]) -> Result<()> {
        let idx = self.live(el)?;
        let node = &mut self.nodes[idx];
        if node.tag != "input" || node.attr("type") != Some("file") {
            return Err(Error::Driver(format!("element #{} is not a file input", idx)));
        }
        node.value = paths.join("\n");
        self.log(format!("set_files #{} {}", idx, paths.join(",")));
        Ok(())
    }

    async fn drag_and_drop(&mut self, source: ElementHandle, target: ElementHandle) -> Result<()> {
        let src = self.live(source)?;
        let dst = self.live(target)?;
        if self.nodes[src].intercepts_clicks {
            return Err(Error::Driver(format!("drag intercepted on #{}", src)));
        }
        self.log(format!("drag #{} -> #{}", src, dst));
        Ok(())
    }

    async fn submit(&mut self, el: ElementHandle) -> Result<bool> {
        let idx = self.live(el)?;
        match self.form_of(idx) {
            Some(form) => {
                self.log(format!("submit #{}", form));
                self.submissions.push(form);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn scroll_element(&mut self, el: ElementHandle, scroll: ElementScroll) -> Result<()> {
        let idx = self.live(el)?;
        self.log(format!("scroll_element #{} {:?}", idx, scroll));
        Ok(())
    }

    async fn dispatch(&mut self, el: ElementHandle, events: &[DomEvent]) -> Result<()> {
        let idx = self.live(el)?;
        for event in events {
            self.log(format!("dispatch #{} {}", idx, event.name()));
            match event {
                DomEvent::Click => self.activate(idx),
                DomEvent::Focus => self.active = Some(idx),
                DomEvent::Submit => {
                    if let Some(form) = self.form_of(idx) {
                        self.submissions.push(form);
                    }
                }
                _ => {}
            }
            if self.nodes[idx].detached {
                break;
            }
        }
        Ok(())
    }

    async fn set_value(&mut self, el: ElementHandle, value: &str) -> Result<()> {
        let idx = self.live(el)?;
        self.log(format!("set_value #{} {}", idx, value));
        let node = &mut self.nodes[idx];
        if node.tag == "select" {
            let pos = node
                .options
                .iter()
                .position(|o| o.value == value)
                .ok_or_else(|| Error::Driver(format!("no option with value '{}'", value)))?;
            node.selected = Some(pos);
        } else if node.attr("contenteditable") == Some("true") {
            node.text = value.to_string();
        } else {
            node.value = value.to_string();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn scopes_do_not_cross_boundaries() {
        let mut d = MemoryDriver::new("https://a.test/", "A");
        let body = d.body();
        let host = d.append(body, NodeSpec::new("my-widget"));
        let inner = d.append_shadow(host, NodeSpec::new("button").attr("class", "ok"));
        let frame = d.append(body, NodeSpec::new("iframe").id("f"));
        let fbody = d.frame_body(frame);
        let framed = d.append(fbody, NodeSpec::new("button").attr("class", "ok"));

        let css = Query::Css("button.ok".into());
        assert_eq!(d.find(Scope::Document, &css).await.unwrap(), None);
        assert_eq!(d.find(Scope::ShadowRoot(host), &css).await.unwrap(), Some(inner));

        d.enter_frame(frame).await.unwrap();
        assert_eq!(d.find(Scope::Document, &css).await.unwrap(), Some(framed));
        d.exit_to_top().await.unwrap();
        assert_eq!(d.find(Scope::Document, &css).await.unwrap(), None);
    }

    #[tokio::test]
    async fn hit_test_returns_topmost() {
        let mut d = MemoryDriver::new("https://a.test/", "A");
        let body = d.body();
        let card = d.append(body, NodeSpec::new("div").rect(0.0, 0.0, 300.0, 300.0));
        let btn = d.append(card, NodeSpec::new("button").rect(90.0, 190.0, 20.0, 20.0));
        assert_eq!(d.element_at_point(100.0, 200.0).await.unwrap(), Some(btn));
        assert_eq!(d.element_at_point(10.0, 10.0).await.unwrap(), Some(card));
        assert_eq!(d.element_at_point(500.0, 500.0).await.unwrap(), None);
    }

    #[tokio::test]
    async fn detached_elements_are_stale() {
        let mut d = MemoryDriver::new("https://a.test/", "A");
        let body = d.body();
        let close = d.append(body, NodeSpec::new("button").text("Close").on_click(Effect::Detach));
        d.click(close, MouseButton::Left).await.unwrap();
        assert!(matches!(d.text(close).await, Err(Error::Stale(_))));
        assert!(!d.is_attached(close));
    }

    #[tokio::test]
    async fn intercepted_click_needs_script() {
        let mut d = MemoryDriver::new("https://a.test/", "A");
        let body = d.body();
        let btn = d.append(
            body,
            NodeSpec::new("button")
                .intercepts_clicks()
                .on_click(Effect::SetAttr("aria-pressed".into(), "true".into())),
        );
        assert!(d.click(btn, MouseButton::Left).await.is_err());
        d.dispatch(btn, &[DomEvent::Click]).await.unwrap();
        assert_eq!(d.node_attr(btn, "aria-pressed"), Some("true"));
    }

    #[tokio::test]
    async fn derived_marks_use_viewport_centers() {
        let mut d = MemoryDriver::new("https://a.test/", "A");
        let body = d.body();
        d.append(body, NodeSpec::new("div").text("not interactive").rect(0.0, 0.0, 10.0, 10.0));
        d.append(body, NodeSpec::new("a").id("docs").text("Docs").rect(10.0, 20.0, 40.0, 10.0));
        d.set_scroll(ScrollState {
            scroll_top: 100.0,
            scroll_height: 2000.0,
            viewport_height: 800.0,
        });
        let marks = d.mark_elements().await.unwrap();
        assert_eq!(marks.len(), 1);
        assert_eq!(marks[0].selector, "#docs");
        assert_eq!(marks[0].hit_point(), Some((30.0, 25.0)));
        assert_eq!(marks[0].center, Some(Point { x: 30.0, y: 125.0 }));
    }
}
