//! Page-based scrolling.
//!
//! A "page" is 90% of the viewport so consecutive pages overlap slightly and
//! nothing falls between two screenshots.

use super::{InteractionResult, Ladder, Tier};
use crate::command::ScrollCommand;
use crate::config::pause;
use crate::driver::{Driver, ElementScroll, ScrollState};
use crate::session::Pilot;
use crate::{Error, Result};

/// Share of the viewport scrolled per page.
const PAGE_FRACTION: f64 = 0.9;

pub fn page_height(state: &ScrollState) -> f64 {
    (state.viewport_height * PAGE_FRACTION).max(1.0)
}

fn max_top(state: &ScrollState) -> f64 {
    (state.scroll_height - state.viewport_height).max(0.0)
}

/// Number of pages needed to see the whole document.
pub fn page_count(state: &ScrollState) -> usize {
    1 + (max_top(state) / page_height(state)).ceil() as usize
}

/// 1-based page currently at the top of the viewport. Scrolled to the end
/// is always the last page.
pub fn current_page(state: &ScrollState) -> usize {
    let count = page_count(state);
    if state.scroll_top >= max_top(state) - 1.0 {
        return count;
    }
    let page = 1 + (state.scroll_top / page_height(state)).round() as usize;
    page.min(count)
}

/// Target scroll offset for a page-level command. Element scrolls are not
/// planned here.
pub fn plan_scroll(command: &ScrollCommand, state: &ScrollState) -> Result<f64> {
    let page = page_height(state);
    let top = match command {
        ScrollCommand::Next => state.scroll_top + page,
        ScrollCommand::Prev => state.scroll_top - page,
        ScrollCommand::Top => 0.0,
        ScrollCommand::Bottom => max_top(state),
        ScrollCommand::Page(0) => {
            return Err(Error::Payload("pages are numbered from 1".into()));
        }
        ScrollCommand::Page(n) => (*n - 1) as f64 * page,
        ScrollCommand::Element(selector) => {
            return Err(Error::Payload(format!(
                "'{}' is an element scroll, not a page scroll",
                selector
            )));
        }
    };
    Ok(top.clamp(0.0, max_top(state)))
}

impl<D: Driver> Pilot<D> {
    pub async fn scroll(&mut self, command: &ScrollCommand) -> Result<InteractionResult> {
        if let ScrollCommand::Element(target) = command {
            let acq = self.acquire(target).await?;
            self.driver.scroll_into_view(acq.element).await?;
            pause(self.timing.scroll_settle_ms).await;
            return Ok(InteractionResult::on(
                &acq,
                Some(Tier::Native),
                format!("Scrolled {} into view", acq.label),
            ));
        }

        let before = self.driver.scroll_state().await?;
        let top = plan_scroll(command, &before)?;
        self.driver.scroll_to(top).await?;
        pause(self.timing.scroll_settle_ms).await;
        let after = self.driver.scroll_state().await?;

        let mut message = format!(
            "Scrolled to page {} of {}",
            current_page(&after),
            page_count(&after)
        );
        let forward = matches!(command, ScrollCommand::Next | ScrollCommand::Bottom);
        if forward && (after.scroll_top - before.scroll_top).abs() < 1.0 {
            message.push_str(" (Already at end of page)");
        }
        Ok(InteractionResult::done(message))
    }

    pub async fn scroll_element(
        &mut self,
        target: &str,
        scroll: ElementScroll,
    ) -> Result<InteractionResult> {
        let acq = self.acquire(target).await?;
        let mut ladder = Ladder::new("scroll_element", &acq.label);
        let attempt = self.driver.scroll_element(acq.element, scroll).await;
        if !ladder.record(Tier::Native, attempt) {
            return Err(ladder.exhausted());
        }
        let how = match scroll {
            ElementScroll::Top => "to top".to_string(),
            ElementScroll::Bottom => "to bottom".to_string(),
            ElementScroll::By { dx, dy } => format!("by ({:.0}, {:.0})", dx, dy),
        };
        Ok(InteractionResult::on(
            &acq,
            Some(Tier::Native),
            format!("Scrolled {} {}", acq.label, how),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(top: f64) -> ScrollState {
        ScrollState {
            scroll_top: top,
            scroll_height: 3000.0,
            viewport_height: 1000.0,
        }
    }

    #[test]
    fn pages_overlap_by_a_tenth() {
        assert_eq!(page_height(&state(0.0)), 900.0);
        // 2000px of scroll range at 900px per page
        assert_eq!(page_count(&state(0.0)), 4);
        assert_eq!(current_page(&state(0.0)), 1);
        assert_eq!(current_page(&state(900.0)), 2);
        assert_eq!(current_page(&state(1800.0)), 3);
        assert_eq!(current_page(&state(2000.0)), 4);
    }

    #[test]
    fn plans_are_clamped() {
        assert_eq!(plan_scroll(&ScrollCommand::Next, &state(0.0)).unwrap(), 900.0);
        assert_eq!(plan_scroll(&ScrollCommand::Next, &state(1900.0)).unwrap(), 2000.0);
        assert_eq!(plan_scroll(&ScrollCommand::Prev, &state(500.0)).unwrap(), 0.0);
        assert_eq!(plan_scroll(&ScrollCommand::Bottom, &state(0.0)).unwrap(), 2000.0);
        assert_eq!(plan_scroll(&ScrollCommand::Page(2), &state(0.0)).unwrap(), 900.0);
        assert_eq!(plan_scroll(&ScrollCommand::Page(40), &state(0.0)).unwrap(), 2000.0);
        assert!(plan_scroll(&ScrollCommand::Page(0), &state(0.0)).is_err());
    }

    #[test]
    fn short_page_has_one_page() {
        let s = ScrollState {
            scroll_top: 0.0,
            scroll_height: 600.0,
            viewport_height: 800.0,
        };
        assert_eq!(page_count(&s), 1);
        assert_eq!(plan_scroll(&ScrollCommand::Next, &s).unwrap(), 0.0);
    }
}
