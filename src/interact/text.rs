//! Text entry.

use tracing::{debug, info};

use super::{Acquired, InteractionResult, Ladder, Tier};
use crate::config::{pause, pause_in};
use crate::driver::{accepts_text, Driver, ElementHandle, MouseButton, Query, Scope};
use crate::session::Pilot;
use crate::{Error, Result};

/// Input types that never take typed text.
const NON_TEXT_INPUTS: &[&str] = &[
    "hidden", "submit", "button", "reset", "checkbox", "radio", "file", "image", "range",
    "color",
];

/// Queries for text-accepting descendants, in priority order.
fn text_queries() -> [Query; 3] {
    [
        Query::Css("input".into()),
        Query::Css("textarea".into()),
        Query::Css("[contenteditable=\"true\"]".into()),
    ]
}

impl<D: Driver> Pilot<D> {
    /// Type `text` into a target, optionally pressing Enter afterwards.
    ///
    /// Containers are searched for a text input: first a visible one, then a
    /// search-like one (`name="q"` or `type="search"`) even when hidden. When
    /// none exists the container is clicked and whatever takes focus is used.
    pub async fn type_text(
        &mut self,
        target: &str,
        text: &str,
        submit: bool,
    ) -> Result<InteractionResult> {
        let acq = self.acquire(target).await?;
        self.type_on(&acq, text, submit).await
    }

    pub(crate) async fn type_on(
        &mut self,
        acq: &Acquired,
        text: &str,
        submit: bool,
    ) -> Result<InteractionResult> {
        let input = self.text_input_for(acq).await?;
        if input != acq.element {
            debug!("{}: typing into descendant/focused element", acq.label);
        }

        let mut ladder = Ladder::new("type", &acq.label);
        let mut used = None;
        for tier in Tier::ALL {
            let attempt = self.type_via(tier, input, text).await;
            if ladder.record(tier, attempt) {
                used = Some(tier);
                break;
            }
        }
        let tier = used.ok_or_else(|| ladder.exhausted())?;

        let mut message = format!("Typed '{}' into {} via {}", text, acq.label, tier);
        let mut ok = true;
        if submit {
            pause(self.timing.enter_delay_ms).await;
            match self.press_enter(input).await {
                Ok(note) => message.push_str(note),
                Err(e) => {
                    ok = false;
                    message.push_str(&format!(", but ENTER failed: {}", e));
                }
            }
        }

        self.learn(acq);
        let result = InteractionResult::on(acq, Some(tier), message);
        Ok(if ok { result } else { result.failed() })
    }

    /// Enter keystroke first, form submission as fallback.
    async fn press_enter(&mut self, input: ElementHandle) -> Result<&'static str> {
        match self.driver.press_key(Some(input), "Enter").await {
            Ok(()) => Ok(" and pressed ENTER"),
            Err(e) => {
                debug!("ENTER keystroke failed ({}), submitting form", e);
                if self.driver.submit(input).await? {
                    Ok(" and submitted the form")
                } else {
                    Err(Error::Rejected("no form to submit".into()))
                }
            }
        }
    }

    async fn type_via(&mut self, tier: Tier, el: ElementHandle, text: &str) -> Result<()> {
        match tier {
            Tier::Human => {
                // hidden inputs can still take keys, just not pointer focus
                if self.driver.is_displayed(el).await? {
                    self.approach(el).await?;
                    self.driver.click(el, MouseButton::Left).await?;
                }
                self.driver.clear(el).await?;
                let mut buf = [0u8; 4];
                for ch in text.chars() {
                    self.driver.send_keys(el, ch.encode_utf8(&mut buf)).await?;
                    pause_in(self.timing.keystroke_ms).await;
                }
                Ok(())
            }
            Tier::Native => {
                self.driver.clear(el).await?;
                self.driver.send_keys(el, text).await
            }
            Tier::Scripted => self.driver.set_value(el, text).await,
        }
    }

    /// The element that should receive keystrokes for `acq`.
    async fn text_input_for(&mut self, acq: &Acquired) -> Result<ElementHandle> {
        if accepts_text(&mut self.driver, acq.element).await? {
            return Ok(acq.element);
        }

        let candidates = self.text_descendants(acq.element).await?;
        for &el in &candidates {
            if self.driver.is_displayed(el).await? {
                return Ok(el);
            }
        }
        for &el in &candidates {
            let name = self.driver.attribute(el, "name").await?;
            let ty = self.driver.attribute(el, "type").await?;
            if name.as_deref() == Some("q") || ty.as_deref() == Some("search") {
                return Ok(el);
            }
        }

        info!("{}: no text input inside, clicking to focus", acq.label);
        self.click_ladder("type", acq, MouseButton::Left).await?;
        pause(self.timing.focus_settle_ms).await;
        if let Some(active) = self.driver.active_element().await? {
            if accepts_text(&mut self.driver, active).await? {
                return Ok(active);
            }
        }
        Err(Error::Rejected(format!(
            "{} ({}) is not a text input and no text input took focus",
            acq.label, acq.diagnostic
        )))
    }

    async fn text_descendants(&mut self, container: ElementHandle) -> Result<Vec<ElementHandle>> {
        let mut out = Vec::new();
        for query in text_queries() {
            for el in self.driver.find_all(Scope::Element(container), &query).await? {
                let ty = self.driver.attribute(el, "type").await?;
                let typeable = ty
                    .as_deref()
                    .map(|t| !NON_TEXT_INPUTS.contains(&t.to_lowercase().as_str()))
                    .unwrap_or(true);
                if typeable && !out.contains(&el) {
                    out.push(el);
                }
            }
        }
        Ok(out)
    }

    pub async fn clear(&mut self, target: &str) -> Result<InteractionResult> {
        let acq = self.acquire(target).await?;
        let el = acq.element;
        let mut ladder = Ladder::new("clear", &acq.label);
        let mut used = None;
        for tier in [Tier::Native, Tier::Scripted] {
            let attempt = match tier {
                Tier::Scripted => self.driver.set_value(el, "").await,
                _ => self.driver.clear(el).await,
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
            format!("Cleared {}", acq.label),
        ))
    }
}

#[cfg(test)]
mod tests {
    use crate::driver::memory::{MemoryDriver, NodeSpec};
    use crate::{PilotConfig, Pilot, Timing};

    fn pilot(driver: MemoryDriver) -> Pilot<MemoryDriver> {
        Pilot::new(driver, &PilotConfig::default())
            .with_timing(Timing::instant())
            .with_journal(None)
    }

    #[tokio::test]
    async fn types_into_input_directly() {
        let mut driver = MemoryDriver::new("https://a.test/", "A");
        let body = driver.body();
        let input = driver.append(body, NodeSpec::new("input").id("email").value("old"));
        let mut pilot = pilot(driver);

        let result = pilot.type_text("#email", "me@a.test", false).await.unwrap();
        assert_eq!(result.message, "Typed 'me@a.test' into #email via human");
        assert_eq!(pilot.driver().node_value(input), "me@a.test");
    }

    #[tokio::test]
    async fn prefers_visible_descendant() {
        let mut driver = MemoryDriver::new("https://a.test/", "A");
        let body = driver.body();
        let wrap = driver.append(body, NodeSpec::new("div").id("wrap"));
        let hidden = driver.append(wrap, NodeSpec::new("input").attr("name", "q").hidden());
        let visible = driver.append(wrap, NodeSpec::new("input").attr("name", "other"));
        let mut pilot = pilot(driver);

        pilot.type_text("#wrap", "x", false).await.unwrap();
        assert_eq!(pilot.driver().node_value(visible), "x");
        assert_eq!(pilot.driver().node_value(hidden), "");
    }

    #[tokio::test]
    async fn falls_back_to_focused_element() {
        let mut driver = MemoryDriver::new("https://a.test/", "A");
        let body = driver.body();
        let editor = driver.append(body, NodeSpec::new("textarea").id("editor").hidden());
        driver.append(
            body,
            NodeSpec::new("div")
                .id("launcher")
                .text("Write")
                .on_click(crate::driver::memory::Effect::SetAttr("data-open".into(), "1".into())),
        );
        let mut pilot = pilot(driver);

        // clicking a div focuses nothing, and the textarea is not inside it
        let err = pilot.type_text("#launcher", "hi", false).await.unwrap_err();
        assert!(err.to_string().contains("not a text input"));
        assert_eq!(pilot.driver().node_value(editor), "");
    }

    #[tokio::test]
    async fn clear_empties_value() {
        let mut driver = MemoryDriver::new("https://a.test/", "A");
        let body = driver.body();
        let input = driver.append(body, NodeSpec::new("input").id("q").value("stale"));
        let mut pilot = pilot(driver);

        let result = pilot.clear("#q").await.unwrap();
        assert_eq!(result.method, Some(super::Tier::Native));
        assert_eq!(pilot.driver().node_value(input), "");
    }
}
