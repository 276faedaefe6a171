//! XPath journal: learned robust locators, keyed by domain and semantic name.
//!
//! The journal is a cache, not a source of truth. Every entry can be
//! regenerated by heuristic search, so writes are a plain read-modify-write of
//! one JSON file and concurrent writers simply race (last write wins).

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::driver::{Driver, ElementHandle, Query, Scope};
use crate::Result;

/// domain → (name → xpath)
type Table = BTreeMap<String, BTreeMap<String, String>>;

/// Visible text longer than this is not used as an XPath anchor.
const MAX_TEXT_ANCHOR: usize = 50;
/// Attribute-derived names at or above this length are rejected.
const MAX_LABEL_NAME: usize = 50;
const MAX_SHORT_NAME: usize = 30;
/// Visible-text names must fall in this range.
const TEXT_NAME_LEN: std::ops::Range<usize> = 2..30;

/// On-disk journal.
#[derive(Debug, Clone)]
pub struct XPathJournal {
    path: PathBuf,
}

impl XPathJournal {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Cached XPath for `name` on the domain of `url`.
    pub fn get(&self, url: &str, name: &str) -> Option<String> {
        let table = self.load();
        table.get(&domain_of(url))?.get(name).cloned()
    }

    /// Store `xpath` for `name` on the domain of `url`, replacing any previous entry.
    pub fn save(&self, url: &str, name: &str, xpath: &str) -> Result<()> {
        let domain = domain_of(url);
        let mut table = self.load();
        table
            .entry(domain.clone())
            .or_default()
            .insert(name.to_string(), xpath.to_string());

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(&self.path, serde_json::to_string_pretty(&table)?)?;
        debug!("journal: {} / {} -> {}", domain, name, xpath);
        Ok(())
    }

    /// Every entry for one domain.
    pub fn entries(&self, url: &str) -> BTreeMap<String, String> {
        self.load().remove(&domain_of(url)).unwrap_or_default()
    }

    fn load(&self) -> Table {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Table::new(),
            Err(e) => {
                warn!("journal: cannot read {}: {}", self.path.display(), e);
                return Table::new();
            }
        };
        serde_json::from_str(&content).unwrap_or_else(|e| {
            warn!("journal: ignoring corrupt {}: {}", self.path.display(), e);
            Table::new()
        })
    }
}

/// Journal domain key: URL host (with port), leading `www.` stripped.
pub fn domain_of(url: &str) -> String {
    let host = url::Url::parse(url).ok().and_then(|u| {
        let host = u.host_str()?.to_string();
        Some(match u.port() {
            Some(port) => format!("{}:{}", host, port),
            None => host,
        })
    });
    match host {
        Some(h) if !h.is_empty() => h.strip_prefix("www.").unwrap_or(&h).to_string(),
        _ => "unknown".to_string(),
    }
}

/// Ids ending in digits are usually generated per render.
pub fn looks_dynamic(id: &str) -> bool {
    id.chars().rev().take(4).any(|c| c.is_ascii_digit())
}

/// Quote a string as an XPath literal. `None` when it holds both quote kinds.
pub fn xpath_literal(s: &str) -> Option<String> {
    if !s.contains('\'') {
        Some(format!("'{}'", s))
    } else if !s.contains('"') {
        Some(format!("\"{}\"", s))
    } else {
        None
    }
}

async fn attr<D: Driver + ?Sized>(
    driver: &mut D,
    el: ElementHandle,
    name: &str,
) -> Result<Option<String>> {
    Ok(driver
        .attribute(el, name)
        .await?
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty()))
}

/// Whether `xpath` selects exactly `el` in the active document.
async fn selects_only<D: Driver + ?Sized>(
    driver: &mut D,
    xpath: &str,
    el: ElementHandle,
) -> Result<bool> {
    let hits = driver
        .find_all(Scope::Document, &Query::XPath(xpath.to_string()))
        .await?;
    Ok(hits == [el])
}

/// Build an XPath likely to survive minor page changes.
///
/// Stable attributes win over text, text over classes. The type, text and
/// class anchors are only used when they select nothing but `el`. `None`
/// means nothing usable was found and the element should not be cached.
pub async fn generate_robust<D: Driver + ?Sized>(
    driver: &mut D,
    el: ElementHandle,
) -> Result<Option<String>> {
    let tag = driver.tag_name(el).await?;

    if let Some(id) = attr(driver, el, "id").await? {
        if !looks_dynamic(&id) {
            if let Some(lit) = xpath_literal(&id) {
                return Ok(Some(format!("//*[@id={}]", lit)));
            }
        }
    }

    for name in ["name", "placeholder", "aria-label", "title"] {
        if let Some(value) = attr(driver, el, name).await? {
            if let Some(lit) = xpath_literal(&value) {
                return Ok(Some(format!("//{}[@{}={}]", tag, name, lit)));
            }
        }
    }

    if let Some(ty) = attr(driver, el, "type").await? {
        if let Some(lit) = xpath_literal(&ty) {
            let xpath = format!("//{}[@type={}]", tag, lit);
            if selects_only(driver, &xpath, el).await? {
                return Ok(Some(xpath));
            }
        }
    }

    let text = driver.text(el).await?;
    let text = text.trim();
    if !text.is_empty() && text.chars().count() < MAX_TEXT_ANCHOR && !text.contains('\n') {
        if let Some(lit) = xpath_literal(text) {
            // "Sign in" is also inside "Sign in with Google"
            for xpath in [
                format!("//{}[contains(text(), {})]", tag, lit),
                format!("//{}[text()={}]", tag, lit),
            ] {
                if selects_only(driver, &xpath, el).await? {
                    return Ok(Some(xpath));
                }
            }
        }
    }

    if let Some(class) = attr(driver, el, "class").await? {
        if let Some(first) = class.split_whitespace().next() {
            if let Some(lit) = xpath_literal(first) {
                let xpath = format!("//{}[contains(@class, {})]", tag, lit);
                if selects_only(driver, &xpath, el).await? {
                    return Ok(Some(xpath));
                }
            }
        }
    }

    Ok(None)
}

/// Pick a human-meaningful name for an element, used as the journal key.
pub async fn extract_name<D: Driver + ?Sized>(
    driver: &mut D,
    el: ElementHandle,
) -> Result<Option<String>> {
    let shorter = |v: &String, limit: usize| v.chars().count() < limit;

    if let Some(label) = attr(driver, el, "aria-label").await? {
        if shorter(&label, MAX_LABEL_NAME) {
            return Ok(Some(label));
        }
    }

    let text = driver.text(el).await?.replace('\n', " ");
    let text = text.trim();
    if TEXT_NAME_LEN.contains(&text.chars().count()) {
        return Ok(Some(text.to_string()));
    }

    if let Some(title) = attr(driver, el, "title").await? {
        if shorter(&title, MAX_LABEL_NAME) {
            return Ok(Some(title));
        }
    }
    if let Some(name) = attr(driver, el, "name").await? {
        if shorter(&name, MAX_SHORT_NAME) {
            return Ok(Some(name));
        }
    }
    if let Some(placeholder) = attr(driver, el, "placeholder").await? {
        if shorter(&placeholder, MAX_LABEL_NAME) {
            return Ok(Some(placeholder));
        }
    }
    if let Some(id) = attr(driver, el, "id").await? {
        if shorter(&id, MAX_SHORT_NAME) && !looks_dynamic(&id) {
            return Ok(Some(id));
        }
    }
    if let Some(alt) = attr(driver, el, "alt").await? {
        if shorter(&alt, MAX_LABEL_NAME) {
            return Ok(Some(alt));
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::memory::{MemoryDriver, NodeSpec};

    #[test]
    fn domain_strips_leading_www() {
        assert_eq!(domain_of("https://www.example.com/a?b=1"), "example.com");
        assert_eq!(domain_of("http://shop.www.test/"), "shop.www.test");
        assert_eq!(domain_of("http://localhost:8080/x"), "localhost:8080");
        assert_eq!(domain_of("about:blank"), "unknown");
        assert_eq!(domain_of("not a url"), "unknown");
    }

    #[test]
    fn dynamic_ids() {
        assert!(looks_dynamic("ember1234"));
        assert!(looks_dynamic("btn-3x"));
        assert!(!looks_dynamic("submit-btn"));
        assert!(!looks_dynamic("a1bcde"));
    }

    #[test]
    fn literals_pick_a_safe_quote() {
        assert_eq!(xpath_literal("Go").as_deref(), Some("'Go'"));
        assert_eq!(xpath_literal("Don't").as_deref(), Some("\"Don't\""));
        assert_eq!(xpath_literal("a'b\"c"), None);
    }

    #[test]
    fn save_twice_last_write_wins() {
        let dir = tempfile::tempdir().unwrap();
        let journal = XPathJournal::new(dir.path().join("nested").join("journal.json"));

        journal.save("https://www.shop.test/cart", "Checkout", "//a[@id='old']").unwrap();
        journal.save("https://shop.test/", "Checkout", "//a[@id='new']").unwrap();

        assert_eq!(
            journal.get("https://shop.test/other", "Checkout").as_deref(),
            Some("//a[@id='new']")
        );
        assert_eq!(journal.entries("https://shop.test/").len(), 1);
        assert_eq!(journal.get("https://other.test/", "Checkout"), None);
    }

    #[test]
    fn corrupt_file_reads_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("journal.json");
        std::fs::write(&path, "{not json").unwrap();
        let journal = XPathJournal::new(&path);
        assert_eq!(journal.get("https://a.test/", "x"), None);

        journal.save("https://a.test/", "x", "//b").unwrap();
        assert_eq!(journal.get("https://a.test/", "x").as_deref(), Some("//b"));
    }

    #[tokio::test]
    async fn robust_xpath_priority() {
        let mut d = MemoryDriver::new("https://a.test/", "A");
        let body = d.body();
        let stable = d.append(body, NodeSpec::new("button").attr("id", "save").attr("name", "s"));
        let dynamic = d.append(body, NodeSpec::new("input").attr("id", "in-4711").attr("name", "email"));
        let labelled = d.append(body, NodeSpec::new("button").attr("aria-label", "Close"));
        let typed = d.append(body, NodeSpec::new("input").attr("type", "search"));
        let texty = d.append(body, NodeSpec::new("span").text("Sign in"));
        let classy = d.append(body, NodeSpec::new("div").attr("class", "card wide"));
        let bare = d.append(body, NodeSpec::new("div"));

        let mut got = Vec::new();
        for el in [stable, dynamic, labelled, typed, texty, classy, bare] {
            got.push(generate_robust(&mut d, el).await.unwrap());
        }
        assert_eq!(
            got,
            vec![
                Some("//*[@id='save']".to_string()),
                Some("//input[@name='email']".to_string()),
                Some("//button[@aria-label='Close']".to_string()),
                Some("//input[@type='search']".to_string()),
                Some("//span[contains(text(), 'Sign in')]".to_string()),
                Some("//div[contains(@class, 'card')]".to_string()),
                None,
            ]
        );
    }

    #[tokio::test]
    async fn type_only_used_when_unique() {
        let mut d = MemoryDriver::new("https://a.test/", "A");
        let body = d.body();
        let first = d.append(body, NodeSpec::new("input").attr("type", "text"));
        d.append(body, NodeSpec::new("input").attr("type", "text"));
        assert_eq!(generate_robust(&mut d, first).await.unwrap(), None);
    }

    #[tokio::test]
    async fn robust_xpath_relocates_the_same_element() {
        let mut d = MemoryDriver::new("https://a.test/", "A");
        let body = d.body();
        let google = d.append(body, NodeSpec::new("a").text("Sign in with Google").attr("data-m", "g"));
        let plain = d.append(body, NodeSpec::new("a").text("Sign in").attr("data-m", "t"));
        let first = d.append(body, NodeSpec::new("li").attr("class", "item odd").attr("data-m", "1"));
        d.append(body, NodeSpec::new("li").attr("class", "item even").attr("data-m", "2"));
        let promo = d.append(body, NodeSpec::new("li").attr("class", "promo").attr("data-m", "p"));

        for (el, marker) in [(google, "g"), (plain, "t"), (promo, "p")] {
            let xpath = generate_robust(&mut d, el).await.unwrap().unwrap();
            let hit = d
                .find(Scope::Document, &Query::XPath(xpath.clone()))
                .await
                .unwrap()
                .unwrap();
            assert_eq!(d.node_attr(hit, "data-m"), Some(marker), "{}", xpath);
        }
        assert_eq!(
            generate_robust(&mut d, plain).await.unwrap().as_deref(),
            Some("//a[text()='Sign in']")
        );
        // a shared first class is not an anchor
        assert_eq!(generate_robust(&mut d, first).await.unwrap(), None);
    }

    #[tokio::test]
    async fn text_names_stay_short() {
        let mut d = MemoryDriver::new("https://a.test/", "A");
        let body = d.body();
        let exact = d.append(body, NodeSpec::new("button").text(&"x".repeat(30)));
        let below = d.append(body, NodeSpec::new("button").text(&"y".repeat(29)));
        assert_eq!(extract_name(&mut d, exact).await.unwrap(), None);
        assert_eq!(extract_name(&mut d, below).await.unwrap(), Some("y".repeat(29)));
    }

    #[tokio::test]
    async fn name_extraction_priority() {
        let mut d = MemoryDriver::new("https://a.test/", "A");
        let body = d.body();
        let a = d.append(body, NodeSpec::new("button").attr("aria-label", "Menu").text("≡"));
        let b = d.append(body, NodeSpec::new("a").text("Pricing\nplans").attr("title", "t"));
        let c = d.append(body, NodeSpec::new("button").text("x").attr("title", "Remove"));
        let e = d.append(body, NodeSpec::new("input").attr("placeholder", "Email address"));
        let f = d.append(body, NodeSpec::new("div").attr("id", "row-12"));
        let g = d.append(body, NodeSpec::new("img").attr("alt", "Logo"));

        let mut got = Vec::new();
        for el in [a, b, c, e, f, g] {
            got.push(extract_name(&mut d, el).await.unwrap());
        }
        assert_eq!(
            got,
            vec![
                Some("Menu".to_string()),
                Some("Pricing plans".to_string()),
                Some("Remove".to_string()),
                Some("Email address".to_string()),
                None,
                Some("Logo".to_string()),
            ]
        );
    }
}
