//! Typed actions and the textual `action` + `payload` compatibility parser.
//!
//! The controller speaks a pipe-delimited command language
//! (`type` / `#q|rust traits|ENTER`). Each action parses into a [`Command`]
//! variant with named fields before anything touches the page.

use serde_json::Value;

use crate::driver::ElementScroll;
use crate::{Error, Result};

/// Pixels per `scroll_element` step.
const ELEMENT_SCROLL_STEP: f64 = 300.0;

/// Desired checkbox state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckMode {
    Check,
    Uncheck,
    Toggle,
}

impl CheckMode {
    pub fn parse(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "" | "toggle" => Ok(CheckMode::Toggle),
            "check" | "true" | "on" | "1" => Ok(CheckMode::Check),
            "uncheck" | "false" | "off" | "0" => Ok(CheckMode::Uncheck),
            other => Err(Error::Payload(format!(
                "unknown checkbox mode '{}' (use check, uncheck or toggle)",
                other
            ))),
        }
    }
}

/// Input kinds set by value rather than typed into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Slider,
    Date,
    Color,
}

impl ValueKind {
    /// Accepted `type` attributes.
    pub fn input_types(&self) -> &'static [&'static str] {
        match self {
            ValueKind::Slider => &["range"],
            ValueKind::Date => &["date", "datetime-local", "time", "month", "week"],
            ValueKind::Color => &["color"],
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ValueKind::Slider => "slider",
            ValueKind::Date => "datepicker",
            ValueKind::Color => "colorpicker",
        }
    }
}

/// Page-level scroll request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScrollCommand {
    Next,
    Prev,
    Top,
    Bottom,
    /// 1-based page number.
    Page(usize),
    /// Scroll an element into view.
    Element(String),
}

impl ScrollCommand {
    pub fn parse(payload: &str) -> Result<Self> {
        let p = payload.trim();
        let lower = p.to_lowercase();
        Ok(match lower.as_str() {
            "" | "down" | "next" => ScrollCommand::Next,
            "up" | "prev" | "previous" => ScrollCommand::Prev,
            "top" => ScrollCommand::Top,
            "bottom" => ScrollCommand::Bottom,
            _ => {
                if let Some(n) = lower.strip_prefix("page ") {
                    let n = n
                        .trim()
                        .parse()
                        .map_err(|_| Error::Payload("invalid page number, use 'page N'".into()))?;
                    ScrollCommand::Page(n)
                } else if let Ok(n) = lower.parse() {
                    ScrollCommand::Page(n)
                } else {
                    ScrollCommand::Element(p.to_string())
                }
            }
        })
    }
}

/// One interaction request.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Scan,
    Click { target: String },
    Hover { target: String },
    Focus { target: String },
    RightClick { target: String },
    Type { target: String, text: String, submit: bool },
    Clear { target: String },
    Select { target: String, option: String },
    Checkbox { target: String, mode: CheckMode },
    Radio { target: String },
    SetValue { target: String, kind: ValueKind, value: String },
    DragAndDrop { source: String, target: String },
    Upload { target: String, path: String },
    Submit { target: String },
    GetValue { target: String },
    FillForm { fields: Vec<(String, String)> },
    Scroll(ScrollCommand),
    ScrollElement { target: String, scroll: ElementScroll },
    PressKey { key: String },
    FindElement { text: String },
}

/// Action names understood by [`Command::parse`].
pub const ACTION_NAMES: &[&str] = &[
    "scan",
    "snap",
    "click",
    "hover",
    "focus",
    "right_click",
    "type",
    "clear",
    "select",
    "checkbox",
    "radio",
    "slider",
    "datepicker",
    "colorpicker",
    "drag_and_drop",
    "upload_file",
    "submit",
    "get_value",
    "fill_form",
    "scroll",
    "scroll_element",
    "press_key",
    "find_element",
];

fn required(payload: &str, usage: &str) -> Result<String> {
    let p = payload.trim();
    if p.is_empty() {
        return Err(Error::Payload(format!("selector required ({})", usage)));
    }
    Ok(p.to_string())
}

fn pair(payload: &str, usage: &str) -> Result<(String, String)> {
    match payload.split_once('|') {
        Some((a, b)) if !a.trim().is_empty() => Ok((a.trim().to_string(), b.trim().to_string())),
        _ => Err(Error::Payload(format!("format is '{}'", usage))),
    }
}

fn json_scalar(v: &Value) -> Result<String> {
    match v {
        Value::String(s) => Ok(s.clone()),
        Value::Bool(b) => Ok(b.to_string()),
        Value::Number(n) => Ok(n.to_string()),
        Value::Null => Ok(String::new()),
        other => Err(Error::Payload(format!(
            "fill_form values must be scalars, got {}",
            other
        ))),
    }
}

/// Canonical key name for the driver (`enter` → `Enter`).
pub fn normalize_key(key: &str) -> String {
    let k = key.trim();
    let canonical = match k.to_lowercase().as_str() {
        "enter" | "return" => "Enter",
        "tab" => "Tab",
        "esc" | "escape" => "Escape",
        "backspace" => "Backspace",
        "delete" | "del" => "Delete",
        "space" => " ",
        "up" | "arrowup" => "ArrowUp",
        "down" | "arrowdown" => "ArrowDown",
        "left" | "arrowleft" => "ArrowLeft",
        "right" | "arrowright" => "ArrowRight",
        "home" => "Home",
        "end" => "End",
        "pageup" => "PageUp",
        "pagedown" => "PageDown",
        _ => return k.to_string(),
    };
    canonical.to_string()
}

impl Command {
    /// Parse an action and its payload. `Ok(None)` means the action is not
    /// one of ours.
    pub fn parse(action: &str, payload: &str) -> Result<Option<Command>> {
        let action = action.trim().to_lowercase();
        let cmd = match action.as_str() {
            "scan" | "snap" => Command::Scan,
            "click" => Command::Click {
                target: required(payload, "click <selector-or-index>")?,
            },
            "hover" => Command::Hover {
                target: required(payload, "hover <selector-or-index>")?,
            },
            "focus" => Command::Focus {
                target: required(payload, "focus <selector-or-index>")?,
            },
            "right_click" => Command::RightClick {
                target: required(payload, "right_click <selector-or-index>")?,
            },
            "type" => {
                let mut parts: Vec<&str> = payload.split('|').collect();
                if parts.len() < 2 || parts[0].trim().is_empty() {
                    return Err(Error::Payload(
                        "format is 'selector|text' or 'selector|text|ENTER'".into(),
                    ));
                }
                let submit = parts.len() >= 3
                    && parts
                        .last()
                        .is_some_and(|p| p.trim().eq_ignore_ascii_case("enter"));
                if submit {
                    parts.pop();
                }
                Command::Type {
                    target: parts[0].trim().to_string(),
                    text: parts[1..].join("|"),
                    submit,
                }
            }
            "clear" => Command::Clear {
                target: required(payload, "clear <selector-or-index>")?,
            },
            "select" => {
                let (target, option) = pair(payload, "selector|option")?;
                Command::Select { target, option }
            }
            "checkbox" => {
                let (target, mode) = match payload.split_once('|') {
                    Some((t, m)) => (t, CheckMode::parse(m)?),
                    None => (payload, CheckMode::Toggle),
                };
                Command::Checkbox {
                    target: required(target, "selector[|check|uncheck|toggle]")?,
                    mode,
                }
            }
            "radio" => Command::Radio {
                target: required(payload, "radio <selector-or-index>")?,
            },
            "slider" | "datepicker" | "colorpicker" => {
                let kind = match action.as_str() {
                    "slider" => ValueKind::Slider,
                    "datepicker" => ValueKind::Date,
                    _ => ValueKind::Color,
                };
                let (target, value) = pair(payload, "selector|value")?;
                Command::SetValue {
                    target,
                    kind,
                    value,
                }
            }
            "drag_and_drop" => {
                let (source, target) = pair(payload, "source|target")?;
                if target.is_empty() {
                    return Err(Error::Payload("format is 'source|target'".into()));
                }
                Command::DragAndDrop { source, target }
            }
            "upload_file" | "upload" => {
                let (target, path) = pair(payload, "selector|path")?;
                Command::Upload { target, path }
            }
            "submit" => Command::Submit {
                target: required(payload, "submit <selector-or-index>")?,
            },
            "get_value" => Command::GetValue {
                target: required(payload, "get_value <selector-or-index>")?,
            },
            "fill_form" => {
                let map: serde_json::Map<String, Value> = serde_json::from_str(payload.trim())
                    .map_err(|e| {
                        Error::Payload(format!("fill_form expects a JSON object: {}", e))
                    })?;
                let fields = map
                    .iter()
                    .map(|(k, v)| Ok((k.clone(), json_scalar(v)?)))
                    .collect::<Result<Vec<_>>>()?;
                Command::FillForm { fields }
            }
            "scroll" => Command::Scroll(ScrollCommand::parse(payload)?),
            "scroll_element" => {
                let (target, direction) = pair(
                    payload,
                    "selector|direction (up, down, left, right, top, bottom)",
                )?;
                let step = ELEMENT_SCROLL_STEP;
                let scroll = match direction.to_lowercase().as_str() {
                    "down" => ElementScroll::By { dx: 0.0, dy: step },
                    "up" => ElementScroll::By { dx: 0.0, dy: -step },
                    "left" => ElementScroll::By { dx: -step, dy: 0.0 },
                    "right" => ElementScroll::By { dx: step, dy: 0.0 },
                    "top" => ElementScroll::Top,
                    "bottom" => ElementScroll::Bottom,
                    other => {
                        return Err(Error::Payload(format!("unknown direction '{}'", other)))
                    }
                };
                Command::ScrollElement { target, scroll }
            }
            "press_key" => {
                let key = payload.trim();
                if key.is_empty() {
                    return Err(Error::Payload("key required".into()));
                }
                Command::PressKey {
                    key: normalize_key(key),
                }
            }
            "find_element" => {
                let text = payload.trim();
                if text.is_empty() {
                    return Err(Error::Payload("text to find required".into()));
                }
                Command::FindElement {
                    text: text.to_string(),
                }
            }
            _ => return Ok(None),
        };
        Ok(Some(cmd))
    }

    /// Action name, for logs.
    pub fn name(&self) -> &'static str {
        match self {
            Command::Scan => "scan",
            Command::Click { .. } => "click",
            Command::Hover { .. } => "hover",
            Command::Focus { .. } => "focus",
            Command::RightClick { .. } => "right_click",
            Command::Type { .. } => "type",
            Command::Clear { .. } => "clear",
            Command::Select { .. } => "select",
            Command::Checkbox { .. } => "checkbox",
            Command::Radio { .. } => "radio",
            Command::SetValue { kind, .. } => kind.name(),
            Command::DragAndDrop { .. } => "drag_and_drop",
            Command::Upload { .. } => "upload_file",
            Command::Submit { .. } => "submit",
            Command::GetValue { .. } => "get_value",
            Command::FillForm { .. } => "fill_form",
            Command::Scroll(_) => "scroll",
            Command::ScrollElement { .. } => "scroll_element",
            Command::PressKey { .. } => "press_key",
            Command::FindElement { .. } => "find_element",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(action: &str, payload: &str) -> Command {
        Command::parse(action, payload)
            .unwrap()
            .unwrap_or_else(|| panic!("{} not recognized", action))
    }

    #[test]
    fn unknown_action_is_not_handled() {
        assert!(Command::parse("nuke", "").unwrap().is_none());
        assert!(Command::parse("open", "https://a.test").unwrap().is_none());
    }

    #[test]
    fn type_with_enter() {
        assert_eq!(
            parse("type", "foo|bar|ENTER"),
            Command::Type {
                target: "foo".into(),
                text: "bar".into(),
                submit: true
            }
        );
        assert_eq!(
            parse("type", "#q| spaced text "),
            Command::Type {
                target: "#q".into(),
                text: " spaced text ".into(),
                submit: false
            }
        );
    }

    #[test]
    fn type_keeps_pipes_in_text() {
        if let Command::Type { text, submit, .. } = parse("type", "3|a|b|enter") {
            assert_eq!(text, "a|b");
            assert!(submit);
        } else {
            panic!("Expected Type");
        }
        assert!(Command::parse("type", "no-text").is_err());
        assert!(Command::parse("type", "|text").is_err());
    }

    #[test]
    fn checkbox_modes() {
        assert_eq!(
            parse("checkbox", "4"),
            Command::Checkbox {
                target: "4".into(),
                mode: CheckMode::Toggle
            }
        );
        assert_eq!(
            parse("checkbox", "#terms|on"),
            Command::Checkbox {
                target: "#terms".into(),
                mode: CheckMode::Check
            }
        );
        assert!(matches!(
            parse("checkbox", "#terms|0"),
            Command::Checkbox {
                mode: CheckMode::Uncheck,
                ..
            }
        ));
        assert!(Command::parse("checkbox", "#terms|maybe").is_err());
    }

    #[test]
    fn value_setters() {
        assert_eq!(
            parse("datepicker", "#dob|1990-04-01"),
            Command::SetValue {
                target: "#dob".into(),
                kind: ValueKind::Date,
                value: "1990-04-01".into()
            }
        );
        assert_eq!(parse("colorpicker", "2|#ff0000").name(), "colorpicker");
        assert!(Command::parse("slider", "#vol").is_err());
    }

    #[test]
    fn scroll_commands() {
        assert_eq!(ScrollCommand::parse("").unwrap(), ScrollCommand::Next);
        assert_eq!(ScrollCommand::parse("Previous").unwrap(), ScrollCommand::Prev);
        assert_eq!(ScrollCommand::parse("page 3").unwrap(), ScrollCommand::Page(3));
        assert_eq!(ScrollCommand::parse("4").unwrap(), ScrollCommand::Page(4));
        assert_eq!(
            ScrollCommand::parse("#footer").unwrap(),
            ScrollCommand::Element("#footer".into())
        );
        assert!(ScrollCommand::parse("page x").is_err());
    }

    #[test]
    fn scroll_element_directions() {
        assert_eq!(
            parse("scroll_element", "#list|up"),
            Command::ScrollElement {
                target: "#list".into(),
                scroll: ElementScroll::By { dx: 0.0, dy: -300.0 }
            }
        );
        assert!(Command::parse("scroll_element", "#list|sideways").is_err());
    }

    #[test]
    fn fill_form_json() {
        if let Command::FillForm { fields } =
            parse("fill_form", r##"{"#email": "a@b.c", "#terms": true, "#age": 42}"##)
        {
            assert_eq!(
                fields,
                vec![
                    ("#age".to_string(), "42".to_string()),
                    ("#email".to_string(), "a@b.c".to_string()),
                    ("#terms".to_string(), "true".to_string()),
                ]
            );
        } else {
            panic!("Expected FillForm");
        }
        assert!(Command::parse("fill_form", "[1, 2]").is_err());
        assert!(Command::parse("fill_form", r#"{"a": [1]}"#).is_err());
    }

    #[test]
    fn keys_are_normalized() {
        assert_eq!(
            parse("press_key", "enter"),
            Command::PressKey { key: "Enter".into() }
        );
        assert_eq!(normalize_key("esc"), "Escape");
        assert_eq!(normalize_key("F5"), "F5");
    }

    #[test]
    fn every_listed_action_parses() {
        for action in ACTION_NAMES {
            let payload = match *action {
                "fill_form" => "{}",
                "scroll_element" => "#a|down",
                "press_key" => "Tab",
                _ => "#a|b",
            };
            assert!(
                Command::parse(action, payload).unwrap().is_some(),
                "{} not handled",
                action
            );
        }
    }

    #[test]
    fn find_element_takes_free_text() {
        assert_eq!(
            parse("find_element", "  Sign in | now "),
            Command::FindElement {
                text: "Sign in | now".into()
            }
        );
        assert!(matches!(
            Command::parse("find_element", ""),
            Err(Error::Payload(_))
        ));
    }

    #[test]
    fn missing_selector_is_payload_error() {
        assert!(matches!(
            Command::parse("click", "  "),
            Err(Error::Payload(_))
        ));
        assert!(matches!(
            Command::parse("select", "|Canada"),
            Err(Error::Payload(_))
        ));
    }
}
