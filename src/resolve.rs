//! Selector resolution: raw target strings into lookup plans.

use crate::marks::{ElementDescriptor, ElementMap};
use crate::{Error, Result};

/// Delimiter between compound selector segments.
pub const CONTEXT_DELIMITER: &str = ">>";

/// Reserved segment that steps into the previous element's shadow root.
pub const SHADOW_ROOT: &str = "shadow-root";

/// Prefix forcing XPath interpretation of a segment.
pub const XPATH_PREFIX: &str = "xpath:";

/// A raw target as the controller wrote it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// Visual index from the last scan.
    Index(usize),
    /// CSS, `xpath:`-prefixed XPath, or a compound path.
    Selector(String),
}

impl Target {
    /// Parse a target string. Bare numbers are indices.
    pub fn parse(s: &str) -> Self {
        let s = s.trim();
        if let Ok(idx) = s.parse::<usize>() {
            return Target::Index(idx);
        }
        Target::Selector(s.to_string())
    }
}

/// Lookup plan for one target.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolved {
    pub selector: String,
    pub descriptor: Option<ElementDescriptor>,
    pub index: Option<usize>,
}

impl Resolved {
    /// Whether coordinate lookup can be attempted.
    pub fn has_coordinates(&self) -> bool {
        self.descriptor
            .as_ref()
            .is_some_and(|d| d.hit_point().is_some())
    }
}

/// Resolve a raw target against the element map.
///
/// A bare number absent from the map is an error, never a guess.
pub fn resolve(raw: &str, map: &ElementMap) -> Result<Resolved> {
    match Target::parse(raw) {
        Target::Index(index) => {
            let descriptor = map.get(index).ok_or(Error::Resolution(index))?;
            let selector = if descriptor.selector.is_empty() {
                descriptor
                    .xpath
                    .as_ref()
                    .map(|x| format!("{}{}", XPATH_PREFIX, x))
                    .unwrap_or_default()
            } else {
                descriptor.selector.clone()
            };
            Ok(Resolved {
                selector,
                descriptor: Some(descriptor.clone()),
                index: Some(index),
            })
        }
        Target::Selector(selector) => Ok(Resolved {
            selector,
            descriptor: None,
            index: None,
        }),
    }
}

/// One step of a compound selector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    ShadowRoot,
    /// Structural selector; CSS first, XPath second.
    Structural(String),
    /// `xpath:`-prefixed selector; XPath only.
    XPath(String),
}

impl Segment {
    fn parse(part: &str) -> Self {
        if part == SHADOW_ROOT {
            Segment::ShadowRoot
        } else if let Some(xpath) = part.strip_prefix(XPATH_PREFIX) {
            Segment::XPath(xpath.trim().to_string())
        } else {
            Segment::Structural(part.to_string())
        }
    }

    /// The text as written, for diagnostics.
    pub fn as_written(&self) -> String {
        match self {
            Segment::ShadowRoot => SHADOW_ROOT.to_string(),
            Segment::Structural(s) => s.clone(),
            Segment::XPath(x) => format!("{}{}", XPATH_PREFIX, x),
        }
    }
}

/// Ordered segments of a (possibly compound) selector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectorPath {
    segments: Vec<Segment>,
}

impl SelectorPath {
    pub fn parse(selector: &str) -> Result<Self> {
        let segments: Vec<Segment> = selector
            .split(CONTEXT_DELIMITER)
            .map(str::trim)
            .map(Segment::parse)
            .collect();

        if segments
            .iter()
            .any(|s| matches!(s, Segment::Structural(p) | Segment::XPath(p) if p.is_empty()))
        {
            return Err(Error::Payload(format!("empty selector segment in '{}'", selector)));
        }
        if segments.first() == Some(&Segment::ShadowRoot) {
            return Err(Error::Payload(format!(
                "'{}' cannot start with {}",
                selector, SHADOW_ROOT
            )));
        }
        if segments.last() == Some(&Segment::ShadowRoot) {
            return Err(Error::Payload(format!(
                "'{}' must name an element after {}",
                selector, SHADOW_ROOT
            )));
        }
        Ok(Self { segments })
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn is_compound(&self) -> bool {
        self.segments.len() > 1
    }
}

/// Selectors eligible for the journal: single segment and not path-looking.
pub fn is_simple(selector: &str) -> bool {
    let s = selector.trim();
    !s.is_empty()
        && !s.contains(CONTEXT_DELIMITER)
        && !s.starts_with(XPATH_PREFIX)
        && !s.starts_with(['/', '#', '.', '('])
        && s.parse::<usize>().is_err()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::marks::Point;

    fn map() -> ElementMap {
        ElementMap::new(
            "https://shop.test/",
            vec![
                ElementDescriptor {
                    id: 5,
                    tag: "button".into(),
                    text: "Submit".into(),
                    selector: "#submit-btn".into(),
                    xpath: None,
                    center: Some(Point { x: 100.0, y: 200.0 }),
                    viewport_coords: None,
                    href: None,
                },
                ElementDescriptor {
                    id: 7,
                    tag: "a".into(),
                    text: "Help".into(),
                    selector: String::new(),
                    xpath: Some("//a[@id='help']".into()),
                    center: None,
                    viewport_coords: None,
                    href: None,
                },
            ],
        )
    }

    #[test]
    fn parse_index_vs_selector() {
        assert_eq!(Target::parse(" 12 "), Target::Index(12));
        assert_eq!(Target::parse("#go"), Target::Selector("#go".into()));
        assert_eq!(Target::parse("-1"), Target::Selector("-1".into()));
    }

    #[test]
    fn every_index_resolves_to_its_entry() {
        let map = map();
        for el in map.iter() {
            let r = resolve(&el.id.to_string(), &map).unwrap();
            assert_eq!(r.descriptor.as_ref(), Some(el));
            assert_eq!(r.index, Some(el.id));
        }
    }

    #[test]
    fn missing_index_is_resolution_error() {
        let err = resolve("6", &map()).unwrap_err();
        assert!(matches!(err, Error::Resolution(6)));
        assert!(matches!(
            resolve("0", &ElementMap::default()),
            Err(Error::Resolution(0))
        ));
    }

    #[test]
    fn raw_xpath_descriptor_gets_prefix() {
        let r = resolve("7", &map()).unwrap();
        assert_eq!(r.selector, "xpath://a[@id='help']");
        assert!(!r.has_coordinates());
    }

    #[test]
    fn literal_selector_passes_through() {
        let r = resolve("iframe#a >> button", &map()).unwrap();
        assert_eq!(r.selector, "iframe#a >> button");
        assert!(r.descriptor.is_none());
        assert!(r.index.is_none());
    }

    #[test]
    fn splits_compound_path() {
        let path = SelectorPath::parse("iframe#a >> shadow-root >> xpath://button").unwrap();
        assert_eq!(
            path.segments(),
            &[
                Segment::Structural("iframe#a".into()),
                Segment::ShadowRoot,
                Segment::XPath("//button".into()),
            ]
        );
        assert!(path.is_compound());
    }

    #[test]
    fn rejects_malformed_paths() {
        assert!(SelectorPath::parse("shadow-root >> button").is_err());
        assert!(SelectorPath::parse("my-widget >> shadow-root").is_err());
        assert!(SelectorPath::parse("iframe >>  >> button").is_err());
        assert!(SelectorPath::parse("xpath:").is_err());
    }

    #[test]
    fn simple_selector_detection() {
        assert!(is_simple("Search"));
        assert!(is_simple("login button"));
        assert!(!is_simple("#login"));
        assert!(!is_simple(".btn"));
        assert!(!is_simple("//a"));
        assert!(!is_simple("xpath://a"));
        assert!(!is_simple("iframe >> a"));
        assert!(!is_simple("42"));
    }
}
