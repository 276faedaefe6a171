//! Context navigation: walks compound selectors across frames and shadow roots.
//!
//! A selector such as `iframe#pay >> shadow-root >> button.ok` is resolved one
//! segment at a time. Each non-final segment moves the search context exactly
//! once: into a frame's document, into a shadow root, or under the matched
//! element. Each structural segment is tried as CSS, then XPath (never inside a
//! shadow root), and the final segment falls back to a case-insensitive text
//! search.

use tracing::{debug, info};

use crate::driver::{is_frame_tag, Driver, ElementHandle, Query, Scope};
use crate::journal::{self, XPathJournal};
use crate::resolve::{is_simple, Segment, SelectorPath, SHADOW_ROOT};
use crate::{Error, Result};

/// Which strategy matched the final element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchTier {
    Journal,
    Css,
    XPath,
    Text,
}

/// A located element and how it was reached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Located {
    pub element: ElementHandle,
    /// Context switches performed on the way.
    pub switches: usize,
    pub tier: MatchTier,
}

impl Located {
    pub fn from_journal(&self) -> bool {
        self.tier == MatchTier::Journal
    }
}

/// Locate `selector` starting from the top-level document. A frame entered
/// on the way stays active afterwards.
///
/// Simple selectors consult the journal first; a text-heuristic hit on a
/// simple selector is written back to it.
pub async fn locate<D: Driver + ?Sized>(
    driver: &mut D,
    journal: Option<&XPathJournal>,
    selector: &str,
) -> Result<Located> {
    let selector = selector.trim();
    let path = SelectorPath::parse(selector)?;
    driver.exit_to_top().await?;
    let simple = !path.is_compound() && is_simple(selector);

    if simple {
        if let Some(journal) = journal {
            if let Some(located) = from_journal(driver, journal, selector).await? {
                return Ok(located);
            }
        }
    }

    let mut scope = Scope::Document;
    let mut switches = 0;
    let last = path.len() - 1;

    for (i, segment) in path.segments().iter().enumerate() {
        if *segment == Segment::ShadowRoot {
            scope = enter_shadow_root(driver, scope).await?;
            switches += 1;
            continue;
        }

        let is_last = i == last;
        let (element, tier) = match find_segment(driver, scope, segment, is_last).await? {
            Some(hit) => hit,
            None => {
                return Err(Error::NotFound {
                    segment: segment.as_written(),
                    context: scope.kind(),
                })
            }
        };

        if is_last {
            if simple && tier == MatchTier::Text {
                if let Some(journal) = journal {
                    remember(driver, journal, selector, element).await;
                }
            }
            debug!("located '{}' via {:?} after {} switches", selector, tier, switches);
            return Ok(Located {
                element,
                switches,
                tier,
            });
        }

        let tag = driver.tag_name(element).await?;
        if is_frame_tag(&tag) {
            driver.enter_frame(element).await?;
            scope = Scope::Document;
        } else {
            scope = Scope::Element(element);
        }
        switches += 1;
    }

    // SelectorPath rejects a trailing shadow-root, so the loop always returns.
    Err(Error::NotFound {
        segment: selector.to_string(),
        context: scope.kind(),
    })
}

async fn from_journal<D: Driver + ?Sized>(
    driver: &mut D,
    journal: &XPathJournal,
    name: &str,
) -> Result<Option<Located>> {
    let url = driver.url().await?;
    let Some(xpath) = journal.get(&url, name) else {
        return Ok(None);
    };

    match driver.find(Scope::Document, &Query::XPath(xpath.clone())).await {
        // a fresh read proves the node is still attached
        Ok(Some(el)) if driver.tag_name(el).await.is_ok() => {
            info!("journal hit for '{}': {}", name, xpath);
            Ok(Some(Located {
                element: el,
                switches: 0,
                tier: MatchTier::Journal,
            }))
        }
        Ok(_) => {
            debug!("journal entry for '{}' no longer matches: {}", name, xpath);
            Ok(None)
        }
        Err(e) => {
            debug!("journal entry for '{}' failed: {}", name, e);
            Ok(None)
        }
    }
}

/// Step into a shadow root. After an element segment this is that element's
/// root; right after entering a frame it is the first shadow host in the
/// frame's document.
async fn enter_shadow_root<D: Driver + ?Sized>(driver: &mut D, scope: Scope) -> Result<Scope> {
    let host = match scope {
        Scope::Element(el) => {
            if !driver.has_shadow_root(el).await? {
                return Err(Error::NotFound {
                    segment: SHADOW_ROOT.into(),
                    context: "element without shadow root",
                });
            }
            el
        }
        Scope::Document => driver
            .shadow_hosts(Scope::Document)
            .await?
            .into_iter()
            .next()
            .ok_or(Error::NotFound {
                segment: SHADOW_ROOT.into(),
                context: "document without shadow hosts",
            })?,
        Scope::ShadowRoot(_) => {
            return Err(Error::NotFound {
                segment: SHADOW_ROOT.into(),
                context: scope.kind(),
            })
        }
    };
    Ok(Scope::ShadowRoot(host))
}

/// Try one segment against a scope in tier order. Lookup errors (invalid CSS,
/// unsupported XPath) are misses, not failures.
async fn find_segment<D: Driver + ?Sized>(
    driver: &mut D,
    scope: Scope,
    segment: &Segment,
    is_last: bool,
) -> Result<Option<(ElementHandle, MatchTier)>> {
    let in_shadow = matches!(scope, Scope::ShadowRoot(_));

    let part = match segment {
        Segment::XPath(xpath) => {
            if in_shadow {
                return Ok(None);
            }
            let xpath = scoped_xpath(scope, xpath);
            return Ok(try_query(driver, scope, Query::XPath(xpath))
                .await
                .map(|el| (el, MatchTier::XPath)));
        }
        Segment::Structural(part) => part,
        Segment::ShadowRoot => return Ok(None),
    };

    if let Some(el) = try_query(driver, scope, Query::Css(part.clone())).await {
        return Ok(Some((el, MatchTier::Css)));
    }
    if !in_shadow {
        let xpath = scoped_xpath(scope, part);
        if let Some(el) = try_query(driver, scope, Query::XPath(xpath)).await {
            return Ok(Some((el, MatchTier::XPath)));
        }
    }
    if is_last && !in_shadow {
        if let Some(el) = try_query(driver, scope, Query::Text(part.clone())).await {
            return Ok(Some((el, MatchTier::Text)));
        }
    }
    Ok(None)
}

async fn try_query<D: Driver + ?Sized>(
    driver: &mut D,
    scope: Scope,
    query: Query,
) -> Option<ElementHandle> {
    match driver.find(scope, &query).await {
        Ok(hit) => hit,
        Err(e) => {
            debug!("{} in {}: {}", query, scope.kind(), e);
            None
        }
    }
}

/// Absolute XPath (`//x`) under an element is made relative (`.//x`).
fn scoped_xpath(scope: Scope, xpath: &str) -> String {
    match scope {
        Scope::Element(_) if xpath.starts_with('/') => format!(".{}", xpath),
        _ => xpath.to_string(),
    }
}

/// Cache a robust locator for a heuristically found element. Failures only
/// cost a future heuristic search, so they are logged and dropped.
async fn remember<D: Driver + ?Sized>(
    driver: &mut D,
    journal: &XPathJournal,
    name: &str,
    el: ElementHandle,
) {
    let xpath = match journal::generate_robust(driver, el).await {
        Ok(Some(xpath)) => xpath,
        Ok(None) => return,
        Err(e) => {
            debug!("journal: cannot build locator for '{}': {}", name, e);
            return;
        }
    };
    let saved = match driver.url().await {
        Ok(url) => journal.save(&url, name, &xpath),
        Err(e) => Err(e),
    };
    if let Err(e) = saved {
        debug!("journal: cannot save '{}': {}", name, e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn xpath_scoped_under_elements() {
        let el = Scope::Element(ElementHandle(3));
        assert_eq!(scoped_xpath(el, "//button"), ".//button");
        assert_eq!(scoped_xpath(el, ".//button"), ".//button");
        assert_eq!(scoped_xpath(Scope::Document, "//button"), "//button");
    }
}
