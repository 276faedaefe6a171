//! Set-of-Marks element map: numbered interactive elements from the last scan.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Page coordinates of an element's center.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

/// Viewport-relative center, captured at scan time.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewportCoords {
    pub center_x: f64,
    pub center_y: f64,
}

/// One marked interactive element.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ElementDescriptor {
    /// Visual index shown on the annotated screenshot.
    pub id: usize,
    pub tag: String,
    /// Truncated visible text.
    #[serde(default)]
    pub text: String,
    /// Best-effort CSS selector.
    #[serde(default)]
    pub selector: String,
    /// Raw XPath, when the scan produced one instead of a selector.
    #[serde(default)]
    pub xpath: Option<String>,
    #[serde(default)]
    pub center: Option<Point>,
    #[serde(default)]
    pub viewport_coords: Option<ViewportCoords>,
    #[serde(default)]
    pub href: Option<String>,
}

impl ElementDescriptor {
    /// Point to test with "element at point". Viewport coordinates win over
    /// `center`, which may be page-absolute and stale after scrolling.
    pub fn hit_point(&self) -> Option<(f64, f64)> {
        if let Some(vc) = self.viewport_coords {
            return Some((vc.center_x, vc.center_y));
        }
        self.center.map(|c| (c.x, c.y))
    }
}

impl fmt::Display for ElementDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] <{}>", self.id, self.tag)?;
        if !self.text.is_empty() {
            write!(f, " \"{}\"", self.text)?;
        }
        if let Some(ref href) = self.href {
            write!(f, " -> {}", href)?;
        }
        Ok(())
    }
}

/// Index → descriptor table for one page view.
///
/// Replaced wholesale on every scan, never merged. The URL it was scanned on
/// is kept so lookups after navigation can be rejected.
#[derive(Debug, Clone, Default)]
pub struct ElementMap {
    url: Option<String>,
    entries: BTreeMap<usize, ElementDescriptor>,
}

impl ElementMap {
    pub fn new(url: impl Into<String>, elements: Vec<ElementDescriptor>) -> Self {
        Self {
            url: Some(url.into()),
            entries: elements.into_iter().map(|e| (e.id, e)).collect(),
        }
    }

    pub fn get(&self, index: usize) -> Option<&ElementDescriptor> {
        self.entries.get(&index)
    }

    /// URL of the page this map was scanned on.
    pub fn url(&self) -> Option<&str> {
        self.url.as_deref()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ElementDescriptor> {
        self.entries.values()
    }

    /// Compact listing, one mark per line.
    pub fn element_list(&self) -> String {
        let mut out = String::new();
        for el in self.entries.values() {
            out.push_str(&el.to_string());
            out.push('\n');
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mark(id: usize, text: &str) -> ElementDescriptor {
        ElementDescriptor {
            id,
            tag: "button".into(),
            text: text.into(),
            selector: format!("#b{}", id),
            xpath: None,
            center: Some(Point { x: 10.0, y: 900.0 }),
            viewport_coords: None,
            href: None,
        }
    }

    #[test]
    fn hit_point_prefers_viewport_coords() {
        let mut el = mark(1, "Go");
        assert_eq!(el.hit_point(), Some((10.0, 900.0)));

        el.viewport_coords = Some(ViewportCoords {
            center_x: 10.0,
            center_y: 120.0,
        });
        assert_eq!(el.hit_point(), Some((10.0, 120.0)));

        el.center = None;
        el.viewport_coords = None;
        assert_eq!(el.hit_point(), None);
    }

    #[test]
    fn deserializes_scan_wire_format() {
        let json = r##"{"id":3,"tag":"a","text":"Docs","selector":"#docs",
            "center":{"x":40,"y":1200},"viewportCoords":{"centerX":40,"centerY":200},
            "href":"https://example.com/docs"}"##;
        let el: ElementDescriptor = serde_json::from_str(json).unwrap();
        assert_eq!(el.id, 3);
        assert_eq!(el.hit_point(), Some((40.0, 200.0)));
        assert_eq!(el.xpath, None);
        assert_eq!(
            el.to_string(),
            "[3] <a> \"Docs\" -> https://example.com/docs"
        );
    }

    #[test]
    fn map_is_keyed_by_id() {
        let map = ElementMap::new("https://a.test/", vec![mark(5, "Submit"), mark(9, "")]);
        assert_eq!(map.len(), 2);
        assert_eq!(map.get(5).unwrap().text, "Submit");
        assert!(map.get(0).is_none());
        assert_eq!(map.url(), Some("https://a.test/"));
        assert_eq!(map.element_list(), "[5] <button> \"Submit\"\n[9] <button>\n");
    }
}
