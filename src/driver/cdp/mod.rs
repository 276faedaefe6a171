//! [`Driver`] over a Chrome page through `eoka`.
//!
//! Reads and scripted actions run as injected JavaScript against a handle
//! registry. Native actions go through eoka's input methods: clicks land on
//! the element's center in page coordinates, keys go to the focused element,
//! and pointer moves are raw CDP mouse events. The page is never modified to
//! address an element. A native click on a covered element fails, so the
//! executor falls through to scripted dispatch. Cross-origin frames cannot be
//! entered.

mod scripts;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use eoka::{Browser, Page};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

use super::{
    DomEvent, Driver, ElementHandle, ElementScroll, MouseButton, Query, Scope, ScrollState,
    SelectOption,
};
use crate::config::BrowserConfig;
use crate::marks::{ElementDescriptor, ElementMap};
use crate::{Error, Result};

/// Wait for the overlay to paint before capturing.
const OVERLAY_PAINT_MS: u64 = 50;

#[derive(Deserialize)]
struct Reply {
    ok: Option<Value>,
    err: Option<String>,
}

/// JSON literal usable inline in a script.
fn lit<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    Ok(serde_json::to_string(value)?)
}

fn scope_arg(scope: Scope) -> Value {
    match scope {
        Scope::Document => json!({ "kind": "document" }),
        Scope::Element(el) => json!({ "kind": "element", "id": el.0 }),
        Scope::ShadowRoot(el) => json!({ "kind": "shadow", "id": el.0 }),
    }
}

fn query_arg(query: &Query) -> Value {
    match query {
        Query::Css(s) => json!({ "css": s }),
        Query::XPath(s) => json!({ "xpath": s }),
        Query::Text(s) => json!({ "text": s }),
    }
}

fn handles(ids: Vec<u64>) -> Vec<ElementHandle> {
    ids.into_iter().map(ElementHandle).collect()
}

/// Chrome-backed driver.
pub struct CdpDriver {
    browser: Browser,
    page: Page,
    /// Entered frames, outermost first.
    frames: Vec<ElementHandle>,
}

impl CdpDriver {
    /// Launch a browser with the given configuration and open a blank page.
    pub async fn launch(config: &BrowserConfig) -> Result<Self> {
        let stealth = eoka::StealthConfig {
            headless: config.headless,
            proxy: config.proxy.clone(),
            user_agent: config.user_agent.clone(),
            viewport_width: config.viewport.as_ref().map(|v| v.width).unwrap_or(1280),
            viewport_height: config.viewport.as_ref().map(|v| v.height).unwrap_or(720),
            ..Default::default()
        };

        debug!(
            "Launching browser (headless: {}, proxy: {:?})",
            config.headless, config.proxy
        );
        let browser = Browser::launch_with_config(stealth).await?;
        let page = browser.new_page("about:blank").await?;

        Ok(Self {
            browser,
            page,
            frames: Vec::new(),
        })
    }

    pub fn page(&self) -> &Page {
        &self.page
    }

    pub async fn goto(&mut self, url: &str) -> Result<()> {
        self.frames.clear();
        self.page.goto(url).await?;
        Ok(())
    }

    pub async fn screenshot(&self) -> Result<Vec<u8>> {
        Ok(self.page.screenshot().await?)
    }

    /// PNG with every mark's index drawn at its viewport position.
    pub async fn annotated_screenshot(&mut self, marks: &ElementMap) -> Result<Vec<u8>> {
        if marks.is_empty() {
            return self.screenshot().await;
        }
        let data: Vec<Value> = marks
            .iter()
            .filter_map(|m| {
                let (x, y) = m.hit_point()?;
                Some(json!({ "i": m.id, "x": x, "y": y }))
            })
            .collect();
        let body = format!("const __marks = {};\n{}", lit(&data)?, scripts::OVERLAY_JS);
        self.call::<Value>(&body).await?;
        self.page.wait(OVERLAY_PAINT_MS).await;
        let png = self.screenshot().await;
        self.call::<Value>(scripts::REMOVE_OVERLAY_JS).await?;
        png
    }

    /// Annotated screenshot as base64, for transports that carry text.
    pub async fn annotated_screenshot_b64(&mut self, marks: &ElementMap) -> Result<String> {
        Ok(BASE64.encode(self.annotated_screenshot(marks).await?))
    }

    pub async fn close(self) -> Result<()> {
        self.browser.close().await?;
        Ok(())
    }

    /// Run a script body (which `return`s a JSON-able value) in the page with
    /// the handle helpers in scope.
    async fn call<T: DeserializeOwned>(&self, body: &str) -> Result<T> {
        let frame = match self.frames.last() {
            Some(f) => f.0.to_string(),
            None => "null".into(),
        };
        let js = format!(
            "(() => {{\nconst __frame = {};\n{}\ntry {{\nconst __v = (() => {{\n{}\n}})();\nreturn JSON.stringify({{ ok: __v === undefined ? null : __v }});\n}} catch (e) {{\nreturn JSON.stringify({{ err: String((e && e.message) || e) }});\n}}\n}})()",
            frame,
            scripts::PRELUDE,
            body
        );
        let raw: String = self.page.evaluate(&js).await?;
        let reply: Reply = serde_json::from_str(&raw)?;
        if let Some(err) = reply.err {
            return Err(if err.starts_with(scripts::STALE_MARKER) {
                Error::Stale(err)
            } else {
                Error::Driver(err)
            });
        }
        Ok(serde_json::from_value(reply.ok.unwrap_or(Value::Null))?)
    }

    /// Script against one element, bound as `el`.
    async fn on<T: DeserializeOwned>(&self, el: ElementHandle, body: &str) -> Result<T> {
        self.call(&format!("const el = __get({});\n{}", el.0, body))
            .await
    }

    /// Page coordinates of the element's center, provided the element is
    /// visible and is the topmost element there.
    async fn native_point(&self, el: ElementHandle) -> Result<(f64, f64)> {
        let point: Option<Value> = self
            .on(
                el,
                "if (!__visible(el)) return null;\n\
                 const r = el.getBoundingClientRect();\n\
                 const root = el.getRootNode();\n\
                 const doc = root.elementFromPoint ? root : el.ownerDocument;\n\
                 const hit = doc.elementFromPoint(r.left + r.width / 2, r.top + r.height / 2);\n\
                 if (hit && hit !== el && !el.contains(hit)) return { covered: hit.tagName.toLowerCase() };\n\
                 return __center(el);",
            )
            .await?;
        let point = point.ok_or_else(|| {
            Error::Driver(format!("element #{} is not interactable", el.0))
        })?;
        if let Some(cover) = point["covered"].as_str() {
            return Err(Error::Driver(format!(
                "element click intercepted on #{} by <{}>",
                el.0, cover
            )));
        }
        Ok((
            point["x"].as_f64().unwrap_or(0.0),
            point["y"].as_f64().unwrap_or(0.0),
        ))
    }

    async fn focus_element(&self, el: ElementHandle) -> Result<()> {
        self.on::<Value>(el, "el.focus(); return null;").await?;
        Ok(())
    }
}

#[async_trait]
impl Driver for CdpDriver {
    async fn url(&mut self) -> Result<String> {
        Ok(self.page.url().await?)
    }

    async fn title(&mut self) -> Result<String> {
        Ok(self.page.title().await?)
    }

    async fn enter_frame(&mut self, frame: ElementHandle) -> Result<()> {
        let ok: bool = self
            .on(
                frame,
                "return (el.tagName === 'IFRAME' || el.tagName === 'FRAME') && !!el.contentDocument;",
            )
            .await?;
        if !ok {
            return Err(Error::Driver(format!(
                "element #{} is not an accessible frame",
                frame.0
            )));
        }
        self.frames.push(frame);
        Ok(())
    }

    async fn exit_to_top(&mut self) -> Result<()> {
        self.frames.clear();
        Ok(())
    }

    async fn mark_elements(&mut self) -> Result<Vec<ElementDescriptor>> {
        let frames = std::mem::take(&mut self.frames);
        let marks = self.call(scripts::MARK_JS).await;
        self.frames = frames;
        marks
    }

    async fn scroll_state(&mut self) -> Result<ScrollState> {
        self.call(
            "return { scrollTop: window.scrollY, scrollHeight: document.documentElement.scrollHeight, viewportHeight: window.innerHeight };",
        )
        .await
    }

    async fn scroll_to(&mut self, top: f64) -> Result<()> {
        self.call::<Value>(&format!("window.scrollTo(0, {}); return null;", top))
            .await?;
        Ok(())
    }

    async fn element_at_point(&mut self, x: f64, y: f64) -> Result<Option<ElementHandle>> {
        let id: Option<u64> = self
            .call(&format!(
                "let el = document.elementFromPoint({x}, {y});\n\
                 while (el && el.shadowRoot) {{\n\
                     const inner = el.shadowRoot.elementFromPoint({x}, {y});\n\
                     if (!inner || inner === el) break;\n\
                     el = inner;\n\
                 }}\n\
                 return __reg(el);",
                x = x,
                y = y
            ))
            .await?;
        Ok(id.map(ElementHandle))
    }

    async fn active_element(&mut self) -> Result<Option<ElementHandle>> {
        let id: Option<u64> = self
            .call(
                "let el = __doc().activeElement;\n\
                 while (el && el.shadowRoot && el.shadowRoot.activeElement) el = el.shadowRoot.activeElement;\n\
                 if (!el || el === __doc().body) return null;\n\
                 return __reg(el);",
            )
            .await?;
        Ok(id.map(ElementHandle))
    }

    async fn find(&mut self, scope: Scope, query: &Query) -> Result<Option<ElementHandle>> {
        let id: Option<u64> = self
            .call(&format!(
                "const hit = __find(__scope({}), {})[0];\nreturn hit ? __reg(hit) : null;",
                scope_arg(scope),
                query_arg(query)
            ))
            .await?;
        Ok(id.map(ElementHandle))
    }

    async fn find_all(&mut self, scope: Scope, query: &Query) -> Result<Vec<ElementHandle>> {
        let ids: Vec<u64> = self
            .call(&format!(
                "return __find(__scope({}), {}).map(__reg);",
                scope_arg(scope),
                query_arg(query)
            ))
            .await?;
        Ok(handles(ids))
    }

    async fn has_shadow_root(&mut self, host: ElementHandle) -> Result<bool> {
        self.on(host, "return !!el.shadowRoot;").await
    }

    async fn shadow_hosts(&mut self, scope: Scope) -> Result<Vec<ElementHandle>> {
        let ids: Vec<u64> = self
            .call(&format!(
                "return Array.from(__scope({}).querySelectorAll('*')).filter(e => e.shadowRoot).map(__reg);",
                scope_arg(scope)
            ))
            .await?;
        Ok(handles(ids))
    }

    async fn tag_name(&mut self, el: ElementHandle) -> Result<String> {
        self.on(el, "return el.tagName.toLowerCase();").await
    }

    async fn text(&mut self, el: ElementHandle) -> Result<String> {
        self.on(el, "return (el.innerText || el.textContent || '').trim();")
            .await
    }

    async fn attribute(&mut self, el: ElementHandle, name: &str) -> Result<Option<String>> {
        self.on(el, &format!("return el.getAttribute({});", lit(name)?))
            .await
    }

    async fn value(&mut self, el: ElementHandle) -> Result<String> {
        self.on(el, "return 'value' in el ? String(el.value ?? '') : '';")
            .await
    }

    async fn is_checked(&mut self, el: ElementHandle) -> Result<bool> {
        self.on(el, "return !!el.checked;").await
    }

    async fn is_displayed(&mut self, el: ElementHandle) -> Result<bool> {
        self.on(el, "return __visible(el);").await
    }

    async fn outer_html(&mut self, el: ElementHandle) -> Result<String> {
        self.on(el, "return el.outerHTML || '';").await
    }

    async fn options(&mut self, el: ElementHandle) -> Result<Vec<SelectOption>> {
        self.on(
            el,
            "return Array.from(el.options || []).map(o => ({ value: o.value, text: o.text }));",
        )
        .await
    }

    async fn scroll_into_view(&mut self, el: ElementHandle) -> Result<()> {
        self.on::<Value>(
            el,
            "el.scrollIntoView({ block: 'center', inline: 'center' }); return null;",
        )
        .await?;
        Ok(())
    }

    async fn move_to(&mut self, el: ElementHandle) -> Result<()> {
        let point: Option<Value> = self
            .on(el, "return __visible(el) ? __center(el) : null;")
            .await?;
        let point = point.ok_or_else(|| {
            Error::Driver(format!("element #{} is not interactable", el.0))
        })?;
        let x = point["x"].as_f64().unwrap_or(0.0);
        let y = point["y"].as_f64().unwrap_or(0.0);
        self.page
            .session()
            .dispatch_mouse_event(eoka::cdp::MouseEventType::MouseMoved, x, y, None, None)
            .await?;
        Ok(())
    }

    async fn click(&mut self, el: ElementHandle, button: MouseButton) -> Result<()> {
        if button == MouseButton::Right {
            return Err(Error::Driver("native right click is not supported".into()));
        }
        let (x, y) = self.native_point(el).await?;
        self.page.click_at(x, y).await?;
        Ok(())
    }

    async fn focus(&mut self, el: ElementHandle) -> Result<()> {
        self.focus_element(el).await
    }

    async fn send_keys(&mut self, el: ElementHandle, text: &str) -> Result<()> {
        self.focus_element(el).await?;
        self.page.type_text(text).await?;
        Ok(())
    }

    async fn press_key(&mut self, el: Option<ElementHandle>, key: &str) -> Result<()> {
        if let Some(el) = el {
            self.focus_element(el).await?;
        }
        self.page.human().press_key(key).await?;
        Ok(())
    }

    async fn clear(&mut self, el: ElementHandle) -> Result<()> {
        self.on::<Value>(
            el,
            "if (el.isContentEditable) el.textContent = '';\n\
             else if ('value' in el) el.value = '';\n\
             else throw new Error('element cannot be cleared');\n\
             __fire(el, 'input');\n__fire(el, 'change');\nreturn null;",
        )
        .await?;
        Ok(())
    }

    async fn select_index(&mut self, el: ElementHandle, index: usize) -> Result<()> {
        self.on::<Value>(
            el,
            &format!(
                "if (!el.options || {i} >= el.options.length) throw new Error('option index {i} out of range');\n\
                 el.selectedIndex = {i};\n__fire(el, 'input');\n__fire(el, 'change');\nreturn null;",
                i = index
            ),
        )
        .await?;
        Ok(())
    }

    /// File inputs cannot be assigned paths from script; the file contents are
    /// shipped over and attached through a `DataTransfer`.
    async fn set_files(&mut self, el: ElementHandle, paths: &[String]) -> Result<()> {
        let mut files = Vec::with_capacity(paths.len());
        for path in paths {
            let bytes = tokio::fs::read(path).await?;
            let name = std::path::Path::new(path)
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.clone());
            files.push(json!({ "name": name, "data": BASE64.encode(bytes) }));
        }
        self.on::<Value>(
            el,
            &format!(
                "if (el.tagName !== 'INPUT' || el.type !== 'file') throw new Error('not a file input');\n\
                 const dt = new DataTransfer();\n\
                 for (const f of {}) {{\n\
                     const bin = atob(f.data);\n\
                     const buf = new Uint8Array(bin.length);\n\
                     for (let i = 0; i < bin.length; i++) buf[i] = bin.charCodeAt(i);\n\
                     dt.items.add(new File([buf], f.name));\n\
                 }}\n\
                 el.files = dt.files;\n__fire(el, 'input');\n__fire(el, 'change');\nreturn null;",
                lit(&files)?
            ),
        )
        .await?;
        Ok(())
    }

    async fn drag_and_drop(&mut self, _source: ElementHandle, _target: ElementHandle) -> Result<()> {
        Err(Error::Driver("native drag and drop is not supported".into()))
    }

    async fn submit(&mut self, el: ElementHandle) -> Result<bool> {
        self.on(
            el,
            "const form = el.tagName === 'FORM' ? el : el.closest('form');\n\
             if (!form) return false;\n\
             if (form.requestSubmit) form.requestSubmit(); else form.submit();\n\
             return true;",
        )
        .await
    }

    async fn scroll_element(&mut self, el: ElementHandle, scroll: ElementScroll) -> Result<()> {
        let body = match scroll {
            ElementScroll::By { dx, dy } => format!("el.scrollBy({}, {}); return null;", dx, dy),
            ElementScroll::Top => "el.scrollTop = 0; return null;".to_string(),
            ElementScroll::Bottom => "el.scrollTop = el.scrollHeight; return null;".to_string(),
        };
        self.on::<Value>(el, &body).await?;
        Ok(())
    }

    async fn dispatch(&mut self, el: ElementHandle, events: &[DomEvent]) -> Result<()> {
        let names: Vec<&str> = events.iter().map(DomEvent::name).collect();
        self.on::<Value>(
            el,
            &format!(
                "const c = __center(el);\n\
                 const mouse = {{ bubbles: true, cancelable: true, view: window, clientX: c.x, clientY: c.y }};\n\
                 const top = window.top;\n\
                 for (const type of {}) {{\n\
                     if (type === 'click') {{ el.click(); }}\n\
                     else if (type === 'focus') {{ el.focus(); }}\n\
                     else if (type === 'contextmenu') {{ el.dispatchEvent(new MouseEvent(type, {{ ...mouse, button: 2 }})); }}\n\
                     else if (type.startsWith('mouse')) {{ el.dispatchEvent(new MouseEvent(type, mouse)); }}\n\
                     else if (type === 'submit') {{\n\
                         const form = el.tagName === 'FORM' ? el : el.closest('form');\n\
                         if (form) {{ if (form.requestSubmit) form.requestSubmit(); else form.submit(); }}\n\
                     }}\n\
                     else if (type.startsWith('drag') || type === 'drop') {{\n\
                         if (type === 'dragstart' || !top.__eokaDrag) top.__eokaDrag = new DataTransfer();\n\
                         el.dispatchEvent(new DragEvent(type, {{ ...mouse, dataTransfer: top.__eokaDrag }}));\n\
                         if (type === 'dragend') top.__eokaDrag = null;\n\
                     }}\n\
                     else {{ __fire(el, type); }}\n\
                     if (!el.isConnected) break;\n\
                 }}\n\
                 return null;",
                lit(&names)?
            ),
        )
        .await?;
        Ok(())
    }

    async fn set_value(&mut self, el: ElementHandle, value: &str) -> Result<()> {
        // the prototype setter keeps framework-tracked inputs (React) in sync
        self.on::<Value>(
            el,
            &format!(
                "const v = {};\n\
                 if (el.isContentEditable) {{ el.textContent = v; }}\n\
                 else {{\n\
                     const proto = el instanceof HTMLTextAreaElement ? HTMLTextAreaElement.prototype\n\
                         : el instanceof HTMLSelectElement ? HTMLSelectElement.prototype\n\
                         : HTMLInputElement.prototype;\n\
                     const desc = Object.getOwnPropertyDescriptor(proto, 'value');\n\
                     if (desc && desc.set) desc.set.call(el, v); else el.value = v;\n\
                 }}\n\
                 __fire(el, 'input');\n__fire(el, 'change');\nreturn null;",
                lit(value)?
            ),
        )
        .await?;
        Ok(())
    }
}
