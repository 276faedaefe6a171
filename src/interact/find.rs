//! Text search over the page's interactive elements.

use tracing::info;

use super::InteractionResult;
use crate::driver::{Driver, ElementHandle, Query, Scope};
use crate::session::Pilot;
use crate::Result;

const INTERACTIVE: &str = "a, button, input, textarea, [role=\"button\"]";
/// Hits listed in the result string.
const MAX_LISTED: usize = 10;
const LABEL_PREVIEW: usize = 50;

/// An interactive element whose label contains the searched text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FoundElement {
    pub element: ElementHandle,
    pub tag: String,
    pub label: String,
    /// `tag#id`, or `tag.class1.class2`, or the bare tag.
    pub selector: String,
}

/// Short selector in the style of the result list. Classes containing `:`
/// (utility-framework variants) are skipped.
pub fn short_selector(tag: &str, id: Option<&str>, class: Option<&str>) -> String {
    if let Some(id) = id.filter(|id| !id.is_empty()) {
        return format!("{}#{}", tag, id);
    }
    let classes: Vec<&str> = class
        .unwrap_or_default()
        .split_whitespace()
        .filter(|c| !c.contains(':'))
        .take(2)
        .collect();
    if classes.is_empty() {
        tag.to_string()
    } else {
        format!("{}.{}", tag, classes.join("."))
    }
}

/// What a user would read as the element's name: rendered text, then value,
/// `aria-label`, `title`, `alt`.
async fn label_of<D: Driver + ?Sized>(driver: &mut D, el: ElementHandle) -> Result<String> {
    let text = driver.text(el).await?;
    if !text.trim().is_empty() {
        return Ok(text.trim().to_string());
    }
    let value = driver.value(el).await?;
    if !value.trim().is_empty() {
        return Ok(value.trim().to_string());
    }
    for name in ["aria-label", "title", "alt"] {
        if let Some(v) = driver.attribute(el, name).await? {
            if !v.trim().is_empty() {
                return Ok(v.trim().to_string());
            }
        }
    }
    Ok(String::new())
}

impl<D: Driver> Pilot<D> {
    /// Visible interactive elements of the top document whose label contains
    /// `text`, case-insensitively, in document order.
    pub async fn find_elements(&mut self, text: &str) -> Result<Vec<FoundElement>> {
        let needle = text.trim().to_lowercase();
        self.driver.exit_to_top().await?;
        let candidates = self
            .driver
            .find_all(Scope::Document, &Query::Css(INTERACTIVE.into()))
            .await?;

        let mut found = Vec::new();
        for el in candidates {
            if !self.driver.is_displayed(el).await? {
                continue;
            }
            let label = label_of(&mut self.driver, el).await?;
            if !label.to_lowercase().contains(&needle) {
                continue;
            }
            let tag = self.driver.tag_name(el).await?;
            let id = self.driver.attribute(el, "id").await?;
            let class = self.driver.attribute(el, "class").await?;
            found.push(FoundElement {
                element: el,
                selector: short_selector(&tag, id.as_deref(), class.as_deref()),
                tag,
                label,
            });
        }
        Ok(found)
    }

    /// List elements matching `text` with selectors usable as targets.
    pub async fn find_element(&mut self, text: &str) -> Result<InteractionResult> {
        let found = self.find_elements(text).await?;
        info!("find_element '{}': {} hits", text.trim(), found.len());
        if found.is_empty() {
            return Ok(InteractionResult::done(format!(
                "No elements found containing '{}'",
                text.trim()
            )));
        }

        let mut message = format!("Found {} elements matching '{}':", found.len(), text.trim());
        for (i, hit) in found.iter().take(MAX_LISTED).enumerate() {
            let preview: String = hit.label.chars().take(LABEL_PREVIEW).collect();
            message.push_str(&format!("\n{}. {}: {} -> {}", i + 1, hit.tag, preview, hit.selector));
        }
        Ok(InteractionResult::done(message))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::memory::{MemoryDriver, NodeSpec};
    use crate::{PilotConfig, Timing};

    #[test]
    fn selectors_prefer_id_then_two_classes() {
        assert_eq!(short_selector("button", Some("go"), Some("btn big")), "button#go");
        assert_eq!(
            short_selector("a", None, Some("nav-link hover:underline active extra")),
            "a.nav-link.active"
        );
        assert_eq!(short_selector("input", Some(""), None), "input");
    }

    #[tokio::test]
    async fn finds_visible_matches_by_text_value_and_label() {
        let mut driver = MemoryDriver::new("https://a.test/", "A");
        let body = driver.body();
        driver.append(body, NodeSpec::new("button").id("login").text("Sign In"));
        driver.append(body, NodeSpec::new("a").attr("class", "promo").text("Sign in with Google"));
        driver.append(body, NodeSpec::new("button").text("Sign in again").hidden());
        driver.append(body, NodeSpec::new("input").attr("aria-label", "Sign-in email"));
        driver.append(body, NodeSpec::new("span").text("Sign in to continue"));
        driver.append(body, NodeSpec::new("div").attr("role", "button").text("Help"));
        let mut pilot = Pilot::new(driver, &PilotConfig::default())
            .with_timing(Timing::instant())
            .with_journal(None);

        let result = pilot.find_element("sign in").await.unwrap();
        assert_eq!(
            result.message,
            "Found 2 elements matching 'sign in':\n1. button: Sign In -> button#login\n2. a: Sign in with Google -> a.promo"
        );

        let result = pilot.find_element("HELP").await.unwrap();
        assert!(result.message.ends_with("1. div: Help -> div"));

        let result = pilot.find_element("checkout").await.unwrap();
        assert!(result.success);
        assert_eq!(result.message, "No elements found containing 'checkout'");
    }
}
