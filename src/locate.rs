//! Coordinate lookup for marked elements.

use tracing::{debug, warn};

use crate::driver::{Driver, ElementHandle};
use crate::marks::ElementDescriptor;
use crate::{Error, Result};

/// Characters compared when checking a coordinate hit against the mark text.
pub const COORDINATE_TEXT_PREFIX: usize = 30;

/// Characters compared when a selector fallback is checked against the mark text.
pub const SELECTOR_TEXT_PREFIX: usize = 20;

/// Characters of live text shown in diagnostics.
const DIAGNOSTIC_TEXT: usize = 40;

/// Element found under a mark's coordinates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoordinateHit {
    pub element: ElementHandle,
    /// `tag - 'text'`, for logs and result strings.
    pub diagnostic: String,
    /// Whether the live text agreed with the mark text.
    pub text_matched: bool,
}

fn prefix(s: &str, n: usize) -> String {
    s.trim().to_lowercase().chars().take(n).collect()
}

/// Loose text agreement: case-insensitive, first `n` characters of each side,
/// either containing the other. Empty expected text always agrees.
pub fn text_similar(expected: &str, actual: &str, n: usize) -> bool {
    let expected = prefix(expected, n);
    if expected.is_empty() {
        return true;
    }
    let actual = prefix(actual, n);
    actual.contains(&expected) || (!actual.is_empty() && expected.contains(&actual))
}

/// Short `tag - 'text'` description of an element.
pub async fn describe<D: Driver + ?Sized>(driver: &mut D, el: ElementHandle) -> Result<String> {
    let tag = driver.tag_name(el).await?;
    let text: String = driver.text(el).await?.chars().take(DIAGNOSTIC_TEXT).collect();
    Ok(format!("{} - '{}'", tag, text))
}

/// Resolve a mark by hit-testing its viewport coordinates.
///
/// A text mismatch is only a warning: the element under the point is trusted
/// over text captured at scan time, which may have legitimately changed.
pub async fn locate_by_coordinates<D: Driver + ?Sized>(
    driver: &mut D,
    descriptor: &ElementDescriptor,
) -> Result<CoordinateHit> {
    let (x, y) = descriptor
        .hit_point()
        .ok_or(Error::MissingCoordinates(descriptor.id))?;

    let element = driver
        .element_at_point(x, y)
        .await?
        .ok_or(Error::NoElementAtPoint { x, y })?;

    let live = driver.text(element).await?;
    let text_matched = text_similar(&descriptor.text, &live, COORDINATE_TEXT_PREFIX);
    if !text_matched {
        warn!(
            "[{}] text mismatch at ({:.0}, {:.0}): expected '{}', found '{}'",
            descriptor.id,
            x,
            y,
            prefix(&descriptor.text, COORDINATE_TEXT_PREFIX),
            prefix(&live, COORDINATE_TEXT_PREFIX)
        );
    }

    let diagnostic = describe(driver, element).await?;
    debug!("[{}] hit {} at ({:.0}, {:.0})", descriptor.id, diagnostic, x, y);
    Ok(CoordinateHit {
        element,
        diagnostic,
        text_matched,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn similarity_either_direction() {
        assert!(text_similar("Submit", "submit order", 30));
        assert!(text_similar("Submit your order now", "submit", 30));
        assert!(text_similar("", "anything", 30));
        assert!(!text_similar("Submit", "Cancel", 30));
        assert!(!text_similar("Submit", "", 30));
    }

    #[test]
    fn similarity_truncates_both_sides() {
        let long = "Show all 1,204 results for wireless headphones";
        assert!(text_similar(long, "Show all 1,204 results for wir (updated)", 30));
        assert!(!text_similar(long, "Show all 1,204 results for wir (updated)", 45));
    }
}
