//! Selector matching for the in-memory DOM.
//!
//! CSS: compound selectors (`tag#id.class[attr][attr=value]`, `*`) joined by
//! descendant or `>` child combinators. XPath: the single-step forms the
//! journal and scanners emit, `//tag[predicate]` with `@attr=lit`,
//! `contains(@attr, lit)`, `contains(text(), lit)` or `text()=lit`.

use regex::Regex;

use crate::{Error, Result};

/// What a matcher needs to know about a node.
pub(crate) trait Matchable {
    fn tag(&self) -> &str;
    fn attr(&self, name: &str) -> Option<&str>;
    fn own_text(&self) -> &str;
}

#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct Compound {
    tag: Option<String>,
    id: Option<String>,
    classes: Vec<String>,
    attrs: Vec<(String, Option<String>)>,
}

impl Compound {
    pub(crate) fn matches(&self, node: &dyn Matchable) -> bool {
        if let Some(ref tag) = self.tag {
            if !tag.eq_ignore_ascii_case(node.tag()) {
                return false;
            }
        }
        if let Some(ref id) = self.id {
            if node.attr("id") != Some(id.as_str()) {
                return false;
            }
        }
        if !self.classes.is_empty() {
            let have: Vec<&str> = node.attr("class").unwrap_or("").split_whitespace().collect();
            if !self.classes.iter().all(|c| have.contains(&c.as_str())) {
                return false;
            }
        }
        self.attrs.iter().all(|(name, want)| match (node.attr(name), want) {
            (Some(_), None) => true,
            (Some(v), Some(w)) => v == w,
            (None, _) => false,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Combinator {
    Descendant,
    Child,
}

/// Parsed CSS selector, stored left to right.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct CssSelector {
    pub(crate) parts: Vec<(Combinator, Compound)>,
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '-' || c == '_'
}

fn invalid(selector: &str) -> Error {
    Error::Driver(format!("invalid selector: {}", selector))
}

fn take_ident(chars: &[char], pos: &mut usize) -> String {
    let start = *pos;
    while *pos < chars.len() && is_ident_char(chars[*pos]) {
        *pos += 1;
    }
    chars[start..*pos].iter().collect()
}

fn parse_compound(src: &str, whole: &str) -> Result<Compound> {
    let chars: Vec<char> = src.chars().collect();
    let mut pos = 0;
    let mut out = Compound::default();

    if chars.first() == Some(&'*') {
        pos = 1;
    } else if chars.first().is_some_and(|c| c.is_alphabetic()) {
        out.tag = Some(take_ident(&chars, &mut pos).to_lowercase());
    }

    while pos < chars.len() {
        match chars[pos] {
            '#' | '.' => {
                let marker = chars[pos];
                pos += 1;
                let ident = take_ident(&chars, &mut pos);
                if ident.is_empty() {
                    return Err(invalid(whole));
                }
                if marker == '#' {
                    out.id = Some(ident);
                } else {
                    out.classes.push(ident);
                }
            }
            '[' => {
                let close = chars[pos..]
                    .iter()
                    .position(|&c| c == ']')
                    .ok_or_else(|| invalid(whole))?;
                let inner: String = chars[pos + 1..pos + close].iter().collect();
                pos += close + 1;
                match inner.split_once('=') {
                    Some((name, value)) => {
                        let value = value.trim();
                        let value = value
                            .strip_prefix('"')
                            .and_then(|v| v.strip_suffix('"'))
                            .or_else(|| value.strip_prefix('\'').and_then(|v| v.strip_suffix('\'')))
                            .unwrap_or(value);
                        out.attrs
                            .push((name.trim().to_string(), Some(value.to_string())));
                    }
                    None => out.attrs.push((inner.trim().to_string(), None)),
                }
            }
            _ => return Err(invalid(whole)),
        }
    }
    Ok(out)
}

/// Split on top-level whitespace and `>`, keeping bracketed text intact.
fn tokenize(selector: &str) -> Result<Vec<String>> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut depth = 0usize;
    let mut quote: Option<char> = None;

    for c in selector.chars() {
        match (quote, c) {
            (Some(q), c) if c == q => {
                quote = None;
                current.push(c);
            }
            (Some(_), c) => current.push(c),
            (None, '"' | '\'') if depth > 0 => {
                quote = Some(c);
                current.push(c);
            }
            (None, '[') => {
                depth += 1;
                current.push(c);
            }
            (None, ']') => {
                depth = depth.checked_sub(1).ok_or_else(|| invalid(selector))?;
                current.push(c);
            }
            (None, c) if depth == 0 && (c.is_whitespace() || c == '>') => {
                if !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
                if c == '>' {
                    tokens.push(">".into());
                }
            }
            (None, c) => current.push(c),
        }
    }
    if depth != 0 || quote.is_some() {
        return Err(invalid(selector));
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    Ok(tokens)
}

pub(crate) fn parse_css(selector: &str) -> Result<CssSelector> {
    let mut parts = Vec::new();
    let mut pending = Combinator::Descendant;
    for token in tokenize(selector)? {
        if token == ">" {
            if parts.is_empty() || pending == Combinator::Child {
                return Err(invalid(selector));
            }
            pending = Combinator::Child;
            continue;
        }
        parts.push((pending, parse_compound(&token, selector)?));
        pending = Combinator::Descendant;
    }
    if parts.is_empty() || pending == Combinator::Child {
        return Err(invalid(selector));
    }
    Ok(CssSelector { parts })
}

/// XPath predicate.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Predicate {
    AttrEq(String, String),
    AttrContains(String, String),
    TextContains(String),
    TextEq(String),
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct XPathStep {
    tag: Option<String>,
    predicate: Option<Predicate>,
}

impl XPathStep {
    pub(crate) fn matches(&self, node: &dyn Matchable) -> bool {
        if let Some(ref tag) = self.tag {
            if !tag.eq_ignore_ascii_case(node.tag()) {
                return false;
            }
        }
        match &self.predicate {
            None => true,
            Some(Predicate::AttrEq(name, v)) => node.attr(name) == Some(v.as_str()),
            Some(Predicate::AttrContains(name, v)) => {
                node.attr(name).is_some_and(|a| a.contains(v.as_str()))
            }
            Some(Predicate::TextContains(v)) => node.own_text().contains(v.as_str()),
            Some(Predicate::TextEq(v)) => node.own_text().trim() == v,
        }
    }
}

const LITERAL: &str = r#"(?:'([^']*)'|"([^"]*)")"#;

fn regex(pattern: &str) -> Result<Regex> {
    Regex::new(pattern).map_err(|e| Error::Driver(format!("xpath matcher: {}", e)))
}

fn literal(caps: &regex::Captures, first: usize) -> String {
    caps.get(first)
        .or_else(|| caps.get(first + 1))
        .map(|m| m.as_str().to_string())
        .unwrap_or_default()
}

pub(crate) fn parse_xpath(xpath: &str) -> Result<XPathStep> {
    let unsupported = || Error::Driver(format!("unsupported xpath: {}", xpath));

    let step = regex(r"^\.?//([A-Za-z][\w-]*|\*)(?:\[(.+)\])?$")?;
    let caps = step.captures(xpath.trim()).ok_or_else(unsupported)?;
    let tag = match &caps[1] {
        "*" => None,
        t => Some(t.to_lowercase()),
    };
    let Some(pred) = caps.get(2).map(|m| m.as_str().trim()) else {
        return Ok(XPathStep {
            tag,
            predicate: None,
        });
    };

    let attr_eq = regex(&format!(r"^@([\w-]+)\s*=\s*{}$", LITERAL))?;
    let attr_contains = regex(&format!(r"^contains\(\s*@([\w-]+)\s*,\s*{}\s*\)$", LITERAL))?;
    let text_contains = regex(&format!(r"^contains\(\s*text\(\)\s*,\s*{}\s*\)$", LITERAL))?;
    let text_eq = regex(&format!(r"^text\(\)\s*=\s*{}$", LITERAL))?;

    let predicate = if let Some(c) = attr_eq.captures(pred) {
        Predicate::AttrEq(c[1].to_string(), literal(&c, 2))
    } else if let Some(c) = attr_contains.captures(pred) {
        Predicate::AttrContains(c[1].to_string(), literal(&c, 2))
    } else if let Some(c) = text_contains.captures(pred) {
        Predicate::TextContains(literal(&c, 1))
    } else if let Some(c) = text_eq.captures(pred) {
        Predicate::TextEq(literal(&c, 1))
    } else {
        return Err(unsupported());
    };

    Ok(XPathStep {
        tag,
        predicate: Some(predicate),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    struct N {
        tag: &'static str,
        attrs: BTreeMap<&'static str, &'static str>,
        text: &'static str,
    }

    impl Matchable for N {
        fn tag(&self) -> &str {
            self.tag
        }
        fn attr(&self, name: &str) -> Option<&str> {
            self.attrs.get(name).copied()
        }
        fn own_text(&self) -> &str {
            self.text
        }
    }

    fn button() -> N {
        N {
            tag: "button",
            attrs: [("id", "go"), ("class", "btn ok"), ("data-x", "a b")]
                .into_iter()
                .collect(),
            text: "Go now",
        }
    }

    #[test]
    fn compound_css() {
        let sel = parse_css(r#"button#go.ok[data-x="a b"]"#).unwrap();
        assert_eq!(sel.parts.len(), 1);
        assert!(sel.parts[0].1.matches(&button()));
        assert!(!parse_css("button.missing").unwrap().parts[0].1.matches(&button()));
        assert!(parse_css("*[data-x]").unwrap().parts[0].1.matches(&button()));
    }

    #[test]
    fn combinators() {
        let sel = parse_css("form > div  span.x").unwrap();
        let combs: Vec<Combinator> = sel.parts.iter().map(|(c, _)| *c).collect();
        assert_eq!(
            combs,
            vec![Combinator::Descendant, Combinator::Child, Combinator::Descendant]
        );
    }

    #[test]
    fn invalid_css() {
        assert!(parse_css("//div").is_err());
        assert!(parse_css("a[b").is_err());
        assert!(parse_css("> a").is_err());
        assert!(parse_css("Sign in!").is_err());
    }

    #[test]
    fn xpath_forms() {
        let b = button();
        assert!(parse_xpath("//*[@id='go']").unwrap().matches(&b));
        assert!(parse_xpath("//button[contains(@class, \"ok\")]").unwrap().matches(&b));
        assert!(parse_xpath("//button[contains(text(), 'now')]").unwrap().matches(&b));
        assert!(parse_xpath(".//button[text()='Go now']").unwrap().matches(&b));
        assert!(!parse_xpath("//a").unwrap().matches(&b));
        assert!(parse_xpath("//div/button").is_err());
        assert!(parse_xpath("button").is_err());
    }
}
