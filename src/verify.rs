//! State-change verification around an interaction.
//!
//! A heuristic signal for the outer decision loop, not a correctness check.
//! Given the same before/after captures it always produces the same verdict.

use std::fmt;

use crate::config::pause;
use crate::driver::{Driver, ElementHandle};
use crate::Result;

/// Characters of a changed value shown in a detail line.
pub const VALUE_PREVIEW: usize = 20;
/// Characters of outer HTML kept in a snapshot.
pub const HTML_SNAPSHOT: usize = 200;
/// Trailing title characters shown in a detail line.
const TITLE_TAIL: usize = 10;

/// Element attributes compared before and after an action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementState {
    pub text: String,
    pub class: Option<String>,
    pub expanded: Option<String>,
    pub label: Option<String>,
    pub html: String,
}

/// Element state plus the page title.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateSnapshot {
    pub element: ElementState,
    pub title: String,
}

/// Outcome of a verification. `changed == false` means no observable change,
/// not failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateChange {
    pub changed: bool,
    pub details: Vec<String>,
}

impl StateChange {
    fn unchanged() -> Self {
        Self {
            changed: false,
            details: Vec::new(),
        }
    }
}

impl fmt::Display for StateChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.changed {
            write!(f, "State Changed: {}", self.details.join(", "))
        } else {
            f.write_str("No State Change Detected")
        }
    }
}

pub async fn capture_element<D: Driver + ?Sized>(
    driver: &mut D,
    el: ElementHandle,
) -> Result<ElementState> {
    Ok(ElementState {
        text: driver.text(el).await?,
        class: driver.attribute(el, "class").await?,
        expanded: driver.attribute(el, "aria-expanded").await?,
        label: driver.attribute(el, "aria-label").await?,
        html: driver
            .outer_html(el)
            .await?
            .chars()
            .take(HTML_SNAPSHOT)
            .collect(),
    })
}

/// Snapshot taken before an action.
pub async fn capture<D: Driver + ?Sized>(driver: &mut D, el: ElementHandle) -> Result<StateSnapshot> {
    Ok(StateSnapshot {
        element: capture_element(driver, el).await?,
        title: driver.title().await?,
    })
}

/// Failure to re-read an element after acting on it means it left the
/// document, which usually means the action worked (dialog closed, page
/// navigated). Counted as a change.
pub fn is_likely_navigated_away(post: &Result<ElementState>) -> bool {
    post.is_err()
}

fn preview(v: Option<&str>) -> String {
    v.unwrap_or("").chars().take(VALUE_PREVIEW).collect()
}

fn title_tail(t: &str) -> String {
    let n = t.chars().count();
    t.chars().skip(n.saturating_sub(TITLE_TAIL)).collect()
}

/// Compare a snapshot with post-action reads.
pub fn diff(
    pre: &StateSnapshot,
    post: &Result<ElementState>,
    post_title: Option<&str>,
) -> StateChange {
    let mut details = Vec::new();

    match post {
        Err(_) => {
            if is_likely_navigated_away(post) {
                details.push("element removed/stale".to_string());
            }
        }
        Ok(after) => {
            let before = &pre.element;
            let fields = [
                ("text", Some(before.text.as_str()), Some(after.text.as_str())),
                ("class", before.class.as_deref(), after.class.as_deref()),
                ("aria-expanded", before.expanded.as_deref(), after.expanded.as_deref()),
                ("aria-label", before.label.as_deref(), after.label.as_deref()),
            ];
            for (name, b, a) in fields {
                if b != a {
                    details.push(format!("{}: '{}' -> '{}'", name, preview(b), preview(a)));
                }
            }
            // markup alone is a weaker signal; only reported when nothing else moved
            if details.is_empty() && before.html != after.html {
                details.push("html: changed".to_string());
            }
        }
    }

    if let Some(title) = post_title {
        if title != pre.title {
            details.push(format!(
                "title: '...{}' -> '...{}'",
                title_tail(&pre.title),
                title_tail(title)
            ));
        }
    }

    if details.is_empty() {
        return StateChange::unchanged();
    }
    StateChange {
        changed: true,
        details,
    }
}

/// Wait `settle_ms`, re-read the element and the title, and diff against `pre`.
pub async fn verify<D: Driver + ?Sized>(
    driver: &mut D,
    el: ElementHandle,
    pre: &StateSnapshot,
    settle_ms: u64,
) -> StateChange {
    pause(settle_ms).await;
    let post = capture_element(driver, el).await;
    let title = driver.title().await.ok();
    diff(pre, &post, title.as_deref())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    fn state(expanded: &str) -> ElementState {
        ElementState {
            text: "Menu".into(),
            class: Some("nav".into()),
            expanded: Some(expanded.into()),
            label: None,
            html: format!("<button aria-expanded=\"{}\">Menu</button>", expanded),
        }
    }

    fn snapshot(expanded: &str, title: &str) -> StateSnapshot {
        StateSnapshot {
            element: state(expanded),
            title: title.into(),
        }
    }

    #[test]
    fn expanded_flip_is_reported() {
        let change = diff(&snapshot("false", "Shop"), &Ok(state("true")), Some("Shop"));
        assert!(change.changed);
        assert_eq!(change.details, vec!["aria-expanded: 'false' -> 'true'"]);
        assert_eq!(
            change.to_string(),
            "State Changed: aria-expanded: 'false' -> 'true'"
        );
    }

    #[test]
    fn identical_is_unchanged() {
        let change = diff(&snapshot("false", "Shop"), &Ok(state("false")), Some("Shop"));
        assert!(!change.changed);
        assert_eq!(change.to_string(), "No State Change Detected");
    }

    #[test]
    fn stale_element_counts_as_change() {
        let post: Result<ElementState> = Err(Error::Stale("detached".into()));
        assert!(is_likely_navigated_away(&post));
        let change = diff(&snapshot("false", "Shop"), &post, Some("Shop"));
        assert!(change.changed);
        assert_eq!(change.details, vec!["element removed/stale"]);
    }

    #[test]
    fn title_always_flagged() {
        let post: Result<ElementState> = Err(Error::Stale("detached".into()));
        let change = diff(
            &snapshot("false", "Search results"),
            &post,
            Some("Order confirmation #5521"),
        );
        assert_eq!(
            change.details,
            vec![
                "element removed/stale".to_string(),
                "title: '...ch results' -> '...tion #5521'".to_string(),
            ]
        );

        let change = diff(&snapshot("false", "A"), &Ok(state("false")), Some("B"));
        assert_eq!(change.details, vec!["title: '...A' -> '...B'"]);
    }

    #[test]
    fn values_are_truncated() {
        let mut after = state("false");
        after.text = "A much longer label that keeps going".into();
        let change = diff(&snapshot("false", "T"), &Ok(after), Some("T"));
        assert_eq!(
            change.details,
            vec!["text: 'Menu' -> 'A much longer label '"]
        );
    }

    #[test]
    fn html_only_change_is_weak_signal() {
        let mut after = state("false");
        after.html.push_str("<span></span>");
        let change = diff(&snapshot("false", "T"), &Ok(after), Some("T"));
        assert_eq!(change.details, vec!["html: changed"]);
    }

    #[test]
    fn diff_is_deterministic() {
        let pre = snapshot("false", "One");
        let post = Ok(state("true"));
        assert_eq!(diff(&pre, &post, Some("Two")), diff(&pre, &post, Some("Two")));
    }
}
