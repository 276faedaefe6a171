//! Interaction executor.
//!
//! Every entry point acquires its element (coordinates first for indexed
//! targets, then the context navigator), runs a fallback ladder of tiers
//! (simulated human input, native driver calls, scripted DOM events) and
//! stops at the first tier that succeeds.

mod find;
mod forms;
mod scroll;
mod text;

pub use find::{short_selector, FoundElement};
pub use forms::{choose_option, value_took, OptionMatch};
pub use scroll::{current_page, page_count, page_height, plan_scroll};

use std::fmt;

use tracing::{debug, info, warn};

use crate::config::pause_in;
use crate::driver::{DomEvent, Driver, ElementHandle, MouseButton};
use crate::journal;
use crate::locate::{describe, locate_by_coordinates, text_similar, SELECTOR_TEXT_PREFIX};
use crate::navigate::locate;
use crate::resolve::resolve;
use crate::session::Pilot;
use crate::verify;
use crate::{Error, Result};

/// Fallback tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    /// Scroll into view, randomized pauses, pointer movement, then the action.
    Human,
    /// Direct driver call, no simulated timing.
    Native,
    /// Synthesized DOM events.
    Scripted,
}

impl Tier {
    pub const ALL: [Tier; 3] = [Tier::Human, Tier::Native, Tier::Scripted];
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Tier::Human => "human",
            Tier::Native => "native",
            Tier::Scripted => "script",
        })
    }
}

/// Result of one interaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InteractionResult {
    pub success: bool,
    /// `tag - 'text'` of the element acted on, when there was one.
    pub element: Option<String>,
    pub method: Option<Tier>,
    /// Whether the element was acquired by coordinates.
    pub coordinates: bool,
    pub message: String,
}

impl InteractionResult {
    /// A successful step that did not act on a particular element.
    pub fn done(message: impl Into<String>) -> Self {
        Self {
            success: true,
            element: None,
            method: None,
            coordinates: false,
            message: message.into(),
        }
    }

    fn on(acq: &Acquired, method: Option<Tier>, message: String) -> Self {
        Self {
            success: true,
            element: Some(acq.diagnostic.clone()),
            method,
            coordinates: acq.coordinates,
            message,
        }
    }

    fn failed(mut self) -> Self {
        self.success = false;
        self
    }
}

impl fmt::Display for InteractionResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// Locator learned from an indexed action, written once the action succeeds.
#[derive(Debug, Clone)]
struct Lesson {
    url: String,
    name: String,
    xpath: String,
}

/// An element ready to be acted on.
#[derive(Debug, Clone)]
pub(crate) struct Acquired {
    pub element: ElementHandle,
    /// The target as the caller wrote it: `[5]` or the selector.
    pub label: String,
    pub diagnostic: String,
    pub coordinates: bool,
    lesson: Option<Lesson>,
}

/// Bookkeeping for one fallback ladder.
pub(crate) struct Ladder {
    action: &'static str,
    target: String,
    last: Option<Error>,
}

impl Ladder {
    pub fn new(action: &'static str, target: &str) -> Self {
        Self {
            action,
            target: target.to_string(),
            last: None,
        }
    }

    /// Record one attempt. Returns `true` when it succeeded.
    pub fn record(&mut self, tier: Tier, attempt: Result<()>) -> bool {
        match attempt {
            Ok(()) => {
                debug!("{} {} via {}", self.action, self.target, tier);
                true
            }
            Err(e) => {
                debug!("{} {} via {} failed: {}", self.action, self.target, tier, e);
                self.last = Some(e);
                false
            }
        }
    }

    pub fn exhausted(self) -> Error {
        warn!("{} {}: all tiers failed", self.action, self.target);
        Error::InteractionFailed {
            action: self.action,
            target: self.target,
            last: self
                .last
                .map(|e| e.to_string())
                .unwrap_or_else(|| "no tier attempted".into()),
        }
    }
}

fn label_for(raw: &str, index: Option<usize>) -> String {
    match index {
        Some(i) => format!("[{}]", i),
        None => raw.trim().to_string(),
    }
}

impl<D: Driver> Pilot<D> {
    /// Resolve a target to a live element.
    pub(crate) async fn acquire(&mut self, target: &str) -> Result<Acquired> {
        let resolved = resolve(target, &self.marks)?;
        let label = label_for(target, resolved.index);
        // marks are in top-level viewport coordinates
        self.driver.exit_to_top().await?;

        if resolved.index.is_some() {
            self.check_map_fresh().await?;
        }

        let mut hit = None;
        if let Some(ref descriptor) = resolved.descriptor {
            if resolved.has_coordinates() {
                match locate_by_coordinates(&mut self.driver, descriptor).await {
                    Ok(h) => hit = Some((h.element, h.diagnostic)),
                    Err(e) => debug!(
                        "{}: coordinate lookup failed ({}), trying '{}'",
                        label, e, resolved.selector
                    ),
                }
            }
        }

        let coordinates = hit.is_some();
        let (element, diagnostic) = match hit {
            Some(found) => found,
            None => {
                if resolved.selector.is_empty() {
                    return Err(Error::StaleMap(format!(
                        "element {} has no selector and no usable coordinates",
                        label
                    )));
                }
                let located =
                    locate(&mut self.driver, self.journal.as_ref(), &resolved.selector).await?;
                if let Some(ref descriptor) = resolved.descriptor {
                    let live = self.driver.text(located.element).await?;
                    if !text_similar(&descriptor.text, &live, SELECTOR_TEXT_PREFIX) {
                        return Err(Error::StaleMap(format!(
                            "DOM mismatch for {}: expected '{}', found '{}'",
                            label,
                            descriptor.text.chars().take(SELECTOR_TEXT_PREFIX).collect::<String>(),
                            live.chars().take(SELECTOR_TEXT_PREFIX).collect::<String>()
                        )));
                    }
                }
                let diagnostic = describe(&mut self.driver, located.element).await?;
                (located.element, diagnostic)
            }
        };

        let lesson = match resolved.index {
            Some(_) => self.lesson_for(element).await,
            None => None,
        };

        info!("{} -> {}{}", label, diagnostic, if coordinates { " (coords)" } else { "" });
        Ok(Acquired {
            element,
            label,
            diagnostic,
            coordinates,
            lesson,
        })
    }

    /// Indices are only meaningful on the page they were scanned on.
    async fn check_map_fresh(&mut self) -> Result<()> {
        let Some(scanned) = self.marks.url() else {
            return Ok(());
        };
        let current = self.driver.url().await?;
        if current != scanned {
            return Err(Error::StaleMap(format!(
                "scanned on {}, page is now {}",
                scanned, current
            )));
        }
        Ok(())
    }

    /// Name and locator are read before acting, while the element is
    /// certainly attached.
    async fn lesson_for(&mut self, el: ElementHandle) -> Option<Lesson> {
        self.journal.as_ref()?;
        let name = journal::extract_name(&mut self.driver, el).await.ok()??;
        let xpath = journal::generate_robust(&mut self.driver, el).await.ok()??;
        let url = self.driver.url().await.ok()?;
        Some(Lesson { url, name, xpath })
    }

    pub(crate) fn learn(&self, acq: &Acquired) {
        let (Some(journal), Some(lesson)) = (self.journal.as_ref(), acq.lesson.as_ref()) else {
            return;
        };
        if let Err(e) = journal.save(&lesson.url, &lesson.name, &lesson.xpath) {
            debug!("journal: cannot save '{}': {}", lesson.name, e);
        }
    }

    /// Scroll into view, pause, move the pointer, pause.
    pub(crate) async fn approach(&mut self, el: ElementHandle) -> Result<()> {
        self.driver.scroll_into_view(el).await?;
        pause_in(self.timing.human_pause_ms).await;
        self.driver.move_to(el).await?;
        pause_in(self.timing.pointer_pause_ms).await;
        Ok(())
    }

    /// One tier of a (left or right) click.
    pub(crate) async fn click_via(
        &mut self,
        tier: Tier,
        el: ElementHandle,
        button: MouseButton,
    ) -> Result<()> {
        match tier {
            Tier::Human => {
                self.approach(el).await?;
                self.driver.click(el, button).await
            }
            Tier::Native => self.driver.click(el, button).await,
            Tier::Scripted => {
                let event = match button {
                    MouseButton::Left => DomEvent::Click,
                    MouseButton::Right => DomEvent::ContextMenu,
                };
                self.driver.dispatch(el, &[event]).await
            }
        }
    }

    /// Click through every tier until one works.
    pub(crate) async fn click_ladder(
        &mut self,
        action: &'static str,
        acq: &Acquired,
        button: MouseButton,
    ) -> Result<Tier> {
        let mut ladder = Ladder::new(action, &acq.label);
        for tier in Tier::ALL {
            let attempt = self.click_via(tier, acq.element, button).await;
            if ladder.record(tier, attempt) {
                return Ok(tier);
            }
        }
        Err(ladder.exhausted())
    }

    /// Click and report whether the page visibly reacted.
    pub async fn click(&mut self, target: &str) -> Result<InteractionResult> {
        let acq = self.acquire(target).await?;
        let pre = verify::capture(&mut self.driver, acq.element).await?;
        let tier = self.click_ladder("click", &acq, MouseButton::Left).await?;
        let change = verify::verify(&mut self.driver, acq.element, &pre, self.timing.settle_ms).await;
        self.learn(&acq);
        Ok(InteractionResult::on(
            &acq,
            Some(tier),
            format!(
                "Clicked {} ({}) via {}. {}",
                acq.label, acq.diagnostic, tier, change
            ),
        ))
    }

    pub async fn right_click(&mut self, target: &str) -> Result<InteractionResult> {
        let acq = self.acquire(target).await?;
        let tier = self
            .click_ladder("right_click", &acq, MouseButton::Right)
            .await?;
        self.learn(&acq);
        Ok(InteractionResult::on(
            &acq,
            Some(tier),
            format!("Right-clicked {} ({}) via {}", acq.label, acq.diagnostic, tier),
        ))
    }

    pub async fn hover(&mut self, target: &str) -> Result<InteractionResult> {
        let acq = self.acquire(target).await?;
        let mut ladder = Ladder::new("hover", &acq.label);
        let mut used = None;
        for tier in [Tier::Human, Tier::Native, Tier::Scripted] {
            let attempt = match tier {
                Tier::Human => self.approach(acq.element).await,
                Tier::Native => self.driver.move_to(acq.element).await,
                Tier::Scripted => {
                    self.driver
                        .dispatch(
                            acq.element,
                            &[DomEvent::MouseOver, DomEvent::MouseEnter, DomEvent::MouseMove],
                        )
                        .await
                }
            };
            if ladder.record(tier, attempt) {
                used = Some(tier);
                break;
            }
        }
        let tier = used.ok_or_else(|| ladder.exhausted())?;
        self.learn(&acq);
        Ok(InteractionResult::on(
            &acq,
            Some(tier),
            format!("Hovered over {} ({}) via {}", acq.label, acq.diagnostic, tier),
        ))
    }

    pub async fn focus(&mut self, target: &str) -> Result<InteractionResult> {
        let acq = self.acquire(target).await?;
        let mut ladder = Ladder::new("focus", &acq.label);
        let mut used = None;
        for tier in [Tier::Native, Tier::Scripted] {
            let attempt = match tier {
                Tier::Scripted => self.driver.dispatch(acq.element, &[DomEvent::Focus]).await,
                _ => self.driver.focus(acq.element).await,
            };
            if ladder.record(tier, attempt) {
                used = Some(tier);
                break;
            }
        }
        let tier = used.ok_or_else(|| ladder.exhausted())?;
        self.learn(&acq);
        Ok(InteractionResult::on(
            &acq,
            Some(tier),
            format!("Focused {} ({})", acq.label, acq.diagnostic),
        ))
    }

    pub async fn drag_and_drop(&mut self, source: &str, target: &str) -> Result<InteractionResult> {
        let src = self.acquire(source).await?;
        let dst = self.acquire(target).await?;
        let label = format!("{} -> {}", src.label, dst.label);
        let mut ladder = Ladder::new("drag_and_drop", &label);
        let mut used = None;
        for tier in [Tier::Native, Tier::Scripted] {
            let attempt = match tier {
                Tier::Scripted => self.scripted_drag(src.element, dst.element).await,
                _ => self.driver.drag_and_drop(src.element, dst.element).await,
            };
            if ladder.record(tier, attempt) {
                used = Some(tier);
                break;
            }
        }
        let tier = used.ok_or_else(|| ladder.exhausted())?;
        Ok(InteractionResult::on(
            &src,
            Some(tier),
            format!("Dragged {} to {} via {}", src.label, dst.label, tier),
        ))
    }

    async fn scripted_drag(&mut self, src: ElementHandle, dst: ElementHandle) -> Result<()> {
        self.driver.dispatch(src, &[DomEvent::DragStart]).await?;
        self.driver
            .dispatch(dst, &[DomEvent::DragOver, DomEvent::Drop])
            .await?;
        self.driver.dispatch(src, &[DomEvent::DragEnd]).await
    }

    /// Attach a local file to an `<input type="file">`. Native only: scripts
    /// cannot populate file inputs.
    pub async fn upload(&mut self, target: &str, path: &str) -> Result<InteractionResult> {
        let file = std::path::Path::new(path);
        if !file.is_file() {
            return Err(Error::Rejected(format!("file not found: {}", path)));
        }
        let absolute = std::fs::canonicalize(file)?.to_string_lossy().into_owned();

        let acq = self.acquire(target).await?;
        let tag = self.driver.tag_name(acq.element).await?;
        let ty = self.driver.attribute(acq.element, "type").await?;
        if tag != "input" || ty.as_deref() != Some("file") {
            return Err(Error::Rejected(format!(
                "{} is not a file input ({})",
                acq.label, acq.diagnostic
            )));
        }

        self.driver
            .set_files(acq.element, std::slice::from_ref(&absolute))
            .await
            .map_err(|e| Error::InteractionFailed {
                action: "upload_file",
                target: acq.label.clone(),
                last: e.to_string(),
            })?;
        self.learn(&acq);
        Ok(InteractionResult::on(
            &acq,
            Some(Tier::Native),
            format!("Uploaded '{}' to {}", absolute, acq.label),
        ))
    }

    /// Submit the element's form: the element itself when it is a form,
    /// otherwise its closest enclosing form.
    pub async fn submit(&mut self, target: &str) -> Result<InteractionResult> {
        let acq = self.acquire(target).await?;
        let tier = match self.driver.submit(acq.element).await {
            Ok(true) => Tier::Native,
            Ok(false) => {
                return Err(Error::Rejected(format!(
                    "no form found for {} ({})",
                    acq.label, acq.diagnostic
                )))
            }
            Err(e) => {
                debug!("native submit of {} failed: {}", acq.label, e);
                self.driver
                    .dispatch(acq.element, &[DomEvent::Submit])
                    .await
                    .map_err(|last| Error::InteractionFailed {
                        action: "submit",
                        target: acq.label.clone(),
                        last: last.to_string(),
                    })?;
                Tier::Scripted
            }
        };
        self.learn(&acq);
        Ok(InteractionResult::on(
            &acq,
            Some(tier),
            format!("Submitted form via {}", acq.label),
        ))
    }

    /// Press a key on whatever element has focus.
    pub async fn press_key(&mut self, key: &str) -> Result<InteractionResult> {
        self.driver.press_key(None, key).await?;
        Ok(InteractionResult::done(format!("Pressed {}", key)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels() {
        assert_eq!(label_for("5", Some(5)), "[5]");
        assert_eq!(label_for(" #go ", None), "#go");
    }

    #[test]
    fn exhausted_ladder_reports_last_error() {
        let mut ladder = Ladder::new("click", "[3]");
        assert!(!ladder.record(Tier::Human, Err(Error::Driver("not interactable".into()))));
        assert!(!ladder.record(Tier::Native, Err(Error::Driver("intercepted".into()))));
        let err = ladder.exhausted();
        assert_eq!(
            err.to_string(),
            "click failed on [3]: all strategies exhausted (last error: driver error: intercepted)"
        );
    }

    #[test]
    fn tier_names() {
        let names: Vec<String> = Tier::ALL.iter().map(Tier::to_string).collect();
        assert_eq!(names, ["human", "native", "script"]);
    }
}
