//! # eoka-pilot
//!
//! Element resolution and verified interaction for vision-driven browser agents.
//!
//! A page scan marks every interactive element with a number (Set-of-Marks).
//! The controller then refers to elements by that number, by a CSS/XPath
//! selector, or by a compound `frame >> shadow-root >> leaf` path. `eoka-pilot`
//! resolves the target, performs the interaction through a human → native →
//! scripted fallback ladder, and reports whether the page visibly changed.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use eoka_pilot::{CdpDriver, Pilot, PilotConfig};
//!
//! # #[tokio::main]
//! # async fn main() -> eoka_pilot::Result<()> {
//! let config = PilotConfig::default();
//! let driver = CdpDriver::launch(&config.browser).await?;
//! let mut pilot = Pilot::new(driver, &config);
//!
//! pilot.driver().goto("https://example.com").await?;
//! pilot.scan().await?;
//! println!("{}", pilot.element_list());
//!
//! let result = pilot.dispatch("click", "3").await;
//! println!("{}", result);
//! # Ok(())
//! # }
//! ```

mod command;
mod config;
pub mod driver;
pub mod interact;
pub mod journal;
pub mod locate;
pub mod marks;
pub mod navigate;
pub mod resolve;
mod session;
pub mod verify;

pub use command::{CheckMode, Command, ScrollCommand, ValueKind, ACTION_NAMES};
pub use config::{BrowserConfig, JournalConfig, PilotConfig, Timing, Viewport};
pub use driver::cdp::CdpDriver;
pub use driver::{Driver, ElementHandle, Query, Scope};
pub use interact::{InteractionResult, Tier};
pub use journal::XPathJournal;
pub use marks::{ElementDescriptor, ElementMap, Point, ViewportCoords};
pub use navigate::{Located, MatchTier};
pub use resolve::{Resolved, Target};
pub use session::{Dispatch, Pilot};
pub use verify::{StateChange, StateSnapshot};

/// Result type for eoka-pilot operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while resolving or interacting with elements.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A numeric index is not part of the current element map.
    #[error("element index {0} not found in element map")]
    Resolution(usize),

    /// The element map was scanned on a different page, or the page moved
    /// under a mark.
    #[error("element map is stale: {0}")]
    StaleMap(String),

    #[error("could not find element: {segment} (searched {context})")]
    NotFound {
        segment: String,
        context: &'static str,
    },

    #[error("no element at coordinates ({x:.0}, {y:.0})")]
    NoElementAtPoint { x: f64, y: f64 },

    #[error("element [{0}] has no coordinates")]
    MissingCoordinates(usize),

    /// Every tier of the fallback ladder failed.
    #[error("{action} failed on {target}: all strategies exhausted (last error: {last})")]
    InteractionFailed {
        action: &'static str,
        target: String,
        last: String,
    },

    /// The element was found but cannot take this action.
    #[error("{0}")]
    Rejected(String),

    #[error("invalid payload: {0}")]
    Payload(String),

    /// The element reference is detached from the document.
    #[error("stale element: {0}")]
    Stale(String),

    #[error("driver error: {0}")]
    Driver(String),

    #[error("browser error: {0}")]
    Browser(#[from] eoka::Error),

    #[error("config error: {0}")]
    Config(String),

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Errors that a fresh page scan would fix.
    pub fn needs_rescan(&self) -> bool {
        matches!(self, Error::Resolution(_) | Error::StaleMap(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_names_segment_and_context() {
        let err = Error::NotFound {
            segment: "button.ok".into(),
            context: "shadow root",
        };
        assert_eq!(
            err.to_string(),
            "could not find element: button.ok (searched shadow root)"
        );
    }

    #[test]
    fn rescan_hint_only_for_map_errors() {
        assert!(Error::Resolution(4).needs_rescan());
        assert!(Error::StaleMap("moved".into()).needs_rescan());
        assert!(!Error::Stale("gone".into()).needs_rescan());
        assert!(!Error::NotFound {
            segment: "#x".into(),
            context: "document"
        }
        .needs_rescan());
    }
}
