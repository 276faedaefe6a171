//! Session state and the action dispatch boundary.

use std::fmt;

use tracing::{info, warn};

use crate::command::Command;
use crate::config::{pause, PilotConfig, Timing};
use crate::driver::Driver;
use crate::interact::InteractionResult;
use crate::journal::XPathJournal;
use crate::marks::ElementMap;
use crate::{Error, Result};

/// Outcome of [`Pilot::dispatch`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    /// The action was recognized. Failures are `Error: ...` strings.
    Handled(String),
    /// No command goes by that action name.
    NotHandled,
}

impl Dispatch {
    pub fn is_handled(&self) -> bool {
        matches!(self, Dispatch::Handled(_))
    }

    /// Whether the result string signals a failed step.
    pub fn is_error(&self) -> bool {
        match self {
            Dispatch::Handled(s) => s.starts_with("Error:"),
            Dispatch::NotHandled => true,
        }
    }
}

impl fmt::Display for Dispatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dispatch::Handled(s) => f.write_str(s),
            Dispatch::NotHandled => f.write_str("Error: action not handled"),
        }
    }
}

/// Result string for a failed action. Map errors tell the caller to rescan.
pub(crate) fn error_string(err: &Error) -> String {
    if err.needs_rescan() {
        format!("Error: {}. Run 'scan' to refresh the element map.", err)
    } else {
        format!("Error: {}", err)
    }
}

/// One browser session: the driver, the element map of the current page
/// view, and the learned-locator journal.
pub struct Pilot<D: Driver> {
    pub(crate) driver: D,
    pub(crate) marks: ElementMap,
    pub(crate) journal: Option<XPathJournal>,
    pub(crate) timing: Timing,
}

impl<D: Driver> Pilot<D> {
    pub fn new(driver: D, config: &PilotConfig) -> Self {
        let journal = config
            .journal
            .enabled
            .then(|| XPathJournal::new(config.journal.path.clone()));
        Self {
            driver,
            marks: ElementMap::default(),
            journal,
            timing: config.timing.clone(),
        }
    }

    pub fn with_timing(mut self, timing: Timing) -> Self {
        self.timing = timing;
        self
    }

    pub fn with_journal(mut self, journal: Option<XPathJournal>) -> Self {
        self.journal = journal;
        self
    }

    pub fn driver(&mut self) -> &mut D {
        &mut self.driver
    }

    pub fn into_driver(self) -> D {
        self.driver
    }

    pub fn marks(&self) -> &ElementMap {
        &self.marks
    }

    /// Replace the element map wholesale.
    pub fn set_marks(&mut self, marks: ElementMap) {
        self.marks = marks;
    }

    pub fn journal(&self) -> Option<&XPathJournal> {
        self.journal.as_ref()
    }

    pub fn timing(&self) -> &Timing {
        &self.timing
    }

    /// Run the mark pass and replace the element map.
    ///
    /// Pages that are still rendering often yield nothing on the first pass,
    /// so empty results are retried up to `scan_attempts` times. An empty map
    /// after the last attempt is still installed.
    pub async fn scan(&mut self) -> Result<&ElementMap> {
        self.driver.exit_to_top().await?;
        let attempts = self.timing.scan_attempts.max(1);
        let mut elements = Vec::new();
        for attempt in 1..=attempts {
            elements = self.driver.mark_elements().await?;
            if !elements.is_empty() {
                break;
            }
            if attempt < attempts {
                info!("scan found no elements, retrying ({}/{})", attempt, attempts);
                pause(self.timing.scan_backoff_ms).await;
            }
        }
        if elements.is_empty() {
            warn!("scan found no interactive elements after {} attempts", attempts);
        }
        let url = self.driver.url().await?;
        self.marks = ElementMap::new(url, elements);
        info!("scanned {} elements", self.marks.len());
        Ok(&self.marks)
    }

    /// One line per marked element.
    pub fn element_list(&self) -> String {
        self.marks.element_list()
    }

    /// Run a typed command.
    pub async fn execute(&mut self, command: Command) -> Result<InteractionResult> {
        match command {
            Command::Scan => {
                let count = self.scan().await?.len();
                Ok(InteractionResult::done(format!(
                    "Found {} interactive elements:\n{}",
                    count,
                    self.element_list()
                )))
            }
            Command::Click { target } => self.click(&target).await,
            Command::Hover { target } => self.hover(&target).await,
            Command::Focus { target } => self.focus(&target).await,
            Command::RightClick { target } => self.right_click(&target).await,
            Command::Type {
                target,
                text,
                submit,
            } => self.type_text(&target, &text, submit).await,
            Command::Clear { target } => self.clear(&target).await,
            Command::Select { target, option } => self.select(&target, &option).await,
            Command::Checkbox { target, mode } => self.checkbox(&target, mode).await,
            Command::Radio { target } => self.radio(&target).await,
            Command::SetValue {
                target,
                kind,
                value,
            } => self.set_value(&target, kind, &value).await,
            Command::DragAndDrop { source, target } => {
                self.drag_and_drop(&source, &target).await
            }
            Command::Upload { target, path } => self.upload(&target, &path).await,
            Command::Submit { target } => self.submit(&target).await,
            Command::GetValue { target } => self.get_value(&target).await,
            Command::FillForm { fields } => self.fill_form(&fields).await,
            Command::Scroll(scroll) => self.scroll(&scroll).await,
            Command::ScrollElement { target, scroll } => {
                self.scroll_element(&target, scroll).await
            }
            Command::PressKey { key } => self.press_key(&key).await,
            Command::FindElement { text } => self.find_element(&text).await,
        }
    }

    /// Parse and run one textual action. Every recognized action yields a
    /// result string; failures are `Error: ...` strings, never panics or
    /// propagated errors.
    pub async fn dispatch(&mut self, action: &str, payload: &str) -> Dispatch {
        let command = match Command::parse(action, payload) {
            Ok(Some(command)) => command,
            Ok(None) => return Dispatch::NotHandled,
            Err(e) => return Dispatch::Handled(error_string(&e)),
        };

        // a previous action may have left us inside a frame
        if let Err(e) = self.driver.exit_to_top().await {
            return Dispatch::Handled(error_string(&e));
        }

        info!("{} {}", command.name(), payload.trim());
        match self.execute(command).await {
            Ok(result) if result.success => Dispatch::Handled(result.to_string()),
            Ok(result) => {
                warn!("{} only partly succeeded", action);
                Dispatch::Handled(format!("Error: {}", result))
            }
            Err(e) => {
                warn!("{} failed: {}", action, e);
                Dispatch::Handled(error_string(&e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::memory::{MemoryDriver, NodeSpec};

    fn pilot(driver: MemoryDriver) -> Pilot<MemoryDriver> {
        Pilot::new(driver, &PilotConfig::default())
            .with_timing(Timing::instant())
            .with_journal(None)
    }

    #[tokio::test]
    async fn scan_retries_until_elements_appear() {
        let mut driver = MemoryDriver::new("https://shop.test/", "Shop");
        let body = driver.body();
        driver.append(
            body,
            NodeSpec::new("button").id("go").text("Go").rect(0.0, 0.0, 50.0, 20.0),
        );
        driver.fail_scans(3);
        let mut pilot = pilot(driver);

        assert_eq!(pilot.scan().await.unwrap().len(), 1);
        let scans = pilot
            .driver()
            .calls()
            .iter()
            .filter(|c| *c == "mark_elements")
            .count();
        assert_eq!(scans, 4);
        assert_eq!(pilot.marks().url(), Some("https://shop.test/"));
    }

    #[tokio::test]
    async fn scan_gives_up_after_bounded_attempts() {
        let mut driver = MemoryDriver::new("https://shop.test/", "Shop");
        driver.fail_scans(100);
        let mut timing = Timing::instant();
        timing.scan_attempts = 3;
        let mut pilot = pilot(driver).with_timing(timing);

        assert!(pilot.scan().await.unwrap().is_empty());
        assert_eq!(pilot.driver().calls().len(), 3);
    }

    #[tokio::test]
    async fn unknown_action_is_not_handled() {
        let mut pilot = pilot(MemoryDriver::new("https://a.test/", "A"));
        assert_eq!(pilot.dispatch("teleport", "3").await, Dispatch::NotHandled);
    }

    #[tokio::test]
    async fn errors_become_strings() {
        let mut pilot = pilot(MemoryDriver::new("https://a.test/", "A"));

        let out = pilot.dispatch("click", "9").await;
        assert!(out.is_error());
        assert_eq!(
            out.to_string(),
            "Error: element index 9 not found in element map. Run 'scan' to refresh the element map."
        );

        let out = pilot.dispatch("type", "missing-pipe").await;
        assert!(out.to_string().starts_with("Error: invalid payload"));

        let out = pilot.dispatch("click", "#nope").await;
        assert_eq!(
            out.to_string(),
            "Error: could not find element: #nope (searched document)"
        );
    }
}
