//! Form controls: selects, checkboxes, radios, value inputs, bulk fill.

use std::fmt;

use tracing::{debug, info};

use super::{Acquired, InteractionResult, Ladder, Tier};
use crate::command::{CheckMode, ValueKind};
use crate::driver::{Driver, ElementHandle, MouseButton, SelectOption};
use crate::session::{error_string, Pilot};
use crate::{Error, Result};

/// Options listed when a select has no match.
const MAX_LISTED_OPTIONS: usize = 10;

/// How an option was matched, in tie-break order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptionMatch {
    ExactText,
    Value,
    CaseInsensitiveText,
    StartsWith,
    Contains,
    Index,
}

/// Whether a value input holds `wanted` after being set. Browsers lowercase
/// colors, snap or clamp ranges to their step and bounds, and normalize
/// date/time strings, so a read-back that differs only that way still counts.
pub fn value_took(kind: ValueKind, wanted: &str, before: &str, now: &str) -> bool {
    if now == wanted {
        return true;
    }
    match kind {
        ValueKind::Color => now.eq_ignore_ascii_case(wanted.trim()),
        ValueKind::Slider => match (wanted.trim().parse::<f64>(), now.parse::<f64>()) {
            (Ok(w), Ok(n)) => (w - n).abs() < 1e-9 || now != before,
            _ => false,
        },
        ValueKind::Date => !now.is_empty() && now != before,
    }
}

impl fmt::Display for OptionMatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            OptionMatch::ExactText => "text",
            OptionMatch::Value => "value",
            OptionMatch::CaseInsensitiveText => "text, ignoring case",
            OptionMatch::StartsWith => "prefix",
            OptionMatch::Contains => "substring",
            OptionMatch::Index => "index",
        })
    }
}

/// Pick the option for `wanted`. Each rule is tried against every option
/// before the next rule runs, so the first option in document order wins
/// within a rule.
pub fn choose_option(options: &[SelectOption], wanted: &str) -> Option<(usize, OptionMatch)> {
    let wanted = wanted.trim();
    let lower = wanted.to_lowercase();

    if !lower.is_empty() {
        for rule in [
            OptionMatch::ExactText,
            OptionMatch::Value,
            OptionMatch::CaseInsensitiveText,
            OptionMatch::StartsWith,
            OptionMatch::Contains,
        ] {
            if let Some(i) = options.iter().position(|o| option_matches(rule, o, wanted, &lower)) {
                return Some((i, rule));
            }
        }
    }

    match wanted.parse::<usize>() {
        Ok(i) if i < options.len() => Some((i, OptionMatch::Index)),
        _ => None,
    }
}

fn option_matches(rule: OptionMatch, option: &SelectOption, wanted: &str, lower: &str) -> bool {
    let text = option.text.trim();
    match rule {
        OptionMatch::ExactText => text == wanted,
        OptionMatch::Value => option.value == wanted,
        OptionMatch::CaseInsensitiveText => text.to_lowercase() == lower,
        OptionMatch::StartsWith => text.to_lowercase().starts_with(lower),
        OptionMatch::Contains => text.to_lowercase().contains(lower),
        OptionMatch::Index => false,
    }
}

fn truthy(value: &str) -> bool {
    matches!(
        value.trim().to_lowercase().as_str(),
        "true" | "on" | "1" | "yes" | "check" | "checked"
    )
}

/// Form control kinds `fill_form` dispatches on.
enum Control {
    Select,
    Checkbox,
    Radio,
    Text,
}

impl<D: Driver> Pilot<D> {
    pub async fn select(&mut self, target: &str, option: &str) -> Result<InteractionResult> {
        let acq = self.acquire(target).await?;
        self.select_on(&acq, option).await
    }

    async fn select_on(&mut self, acq: &Acquired, option: &str) -> Result<InteractionResult> {
        if self.driver.tag_name(acq.element).await? != "select" {
            return Err(Error::Rejected(format!(
                "{} ({}) is not a <select>",
                acq.label, acq.diagnostic
            )));
        }
        let options = self.driver.options(acq.element).await?;
        let Some((index, matched)) = choose_option(&options, option) else {
            let available: Vec<&str> = options
                .iter()
                .take(MAX_LISTED_OPTIONS)
                .map(|o| o.text.trim())
                .collect();
            return Err(Error::Rejected(format!(
                "Option '{}' not found. Available: {}",
                option,
                available.join(", ")
            )));
        };
        let chosen = &options[index];
        debug!("{}: option {} matched by {}", acq.label, index, matched);

        let mut ladder = Ladder::new("select", &acq.label);
        let mut used = None;
        for tier in [Tier::Native, Tier::Scripted] {
            let attempt = match tier {
                Tier::Scripted => self.driver.set_value(acq.element, &chosen.value).await,
                _ => self.driver.select_index(acq.element, index).await,
            };
            if ladder.record(tier, attempt) {
                used = Some(tier);
                break;
            }
        }
        let tier = used.ok_or_else(|| ladder.exhausted())?;
        self.learn(acq);
        Ok(InteractionResult::on(
            acq,
            Some(tier),
            format!(
                "Selected '{}' in {} (matched by {})",
                chosen.text.trim(),
                acq.label,
                matched
            ),
        ))
    }

    pub async fn checkbox(&mut self, target: &str, mode: CheckMode) -> Result<InteractionResult> {
        let acq = self.acquire(target).await?;
        self.checkbox_on(&acq, mode).await
    }

    async fn checkbox_on(&mut self, acq: &Acquired, mode: CheckMode) -> Result<InteractionResult> {
        let el = acq.element;
        let Some(aria) = self.toggle_kind(el, "checkbox").await? else {
            return Err(Error::Rejected(format!(
                "{} ({}) is not a checkbox",
                acq.label, acq.diagnostic
            )));
        };

        let current = self.checked_state(el, aria).await?;
        let desired = match mode {
            CheckMode::Check => true,
            CheckMode::Uncheck => false,
            CheckMode::Toggle => !current,
        };
        let word = if desired { "checked" } else { "unchecked" };
        if current == desired {
            return Ok(InteractionResult::on(
                acq,
                None,
                format!("{} already {}", acq.label, word),
            ));
        }

        let tier = self.click_until(acq, "checkbox", aria, desired).await?;
        self.learn(acq);
        Ok(InteractionResult::on(
            acq,
            Some(tier),
            format!("{} {} via {}", capitalize(word), acq.label, tier),
        ))
    }

    pub async fn radio(&mut self, target: &str) -> Result<InteractionResult> {
        let acq = self.acquire(target).await?;
        self.radio_on(&acq).await
    }

    async fn radio_on(&mut self, acq: &Acquired) -> Result<InteractionResult> {
        let el = acq.element;
        let Some(aria) = self.toggle_kind(el, "radio").await? else {
            return Err(Error::Rejected(format!(
                "{} ({}) is not a radio button",
                acq.label, acq.diagnostic
            )));
        };
        if self.checked_state(el, aria).await? {
            return Ok(InteractionResult::on(
                acq,
                None,
                format!("{} already selected", acq.label),
            ));
        }
        let tier = self.click_until(acq, "radio", aria, true).await?;
        self.learn(acq);
        Ok(InteractionResult::on(
            acq,
            Some(tier),
            format!("Selected radio {} via {}", acq.label, tier),
        ))
    }

    /// `type` of an `<input>`, lowercased; `None` for other tags.
    async fn control_type(&mut self, el: ElementHandle) -> Result<Option<String>> {
        if self.driver.tag_name(el).await? != "input" {
            return Ok(None);
        }
        Ok(self
            .driver
            .attribute(el, "type")
            .await?
            .map(|t| t.to_lowercase()))
    }

    /// `Some(false)` for a native `<input type=kind>`, `Some(true)` for an
    /// ARIA `role=kind` widget, `None` otherwise.
    async fn toggle_kind(&mut self, el: ElementHandle, kind: &str) -> Result<Option<bool>> {
        if self.control_type(el).await?.as_deref() == Some(kind) {
            return Ok(Some(false));
        }
        let role = self.driver.attribute(el, "role").await?;
        Ok((role.as_deref() == Some(kind)).then_some(true))
    }

    async fn checked_state(&mut self, el: ElementHandle, aria: bool) -> Result<bool> {
        if aria {
            Ok(self.driver.attribute(el, "aria-checked").await?.as_deref() == Some("true"))
        } else {
            self.driver.is_checked(el).await
        }
    }

    /// Click tier by tier until the checked state reads `desired`. A click
    /// that lands but leaves the state unchanged counts as a failed tier.
    async fn click_until(
        &mut self,
        acq: &Acquired,
        action: &'static str,
        aria: bool,
        desired: bool,
    ) -> Result<Tier> {
        let mut ladder = Ladder::new(action, &acq.label);
        for tier in Tier::ALL {
            let mut attempt = self.click_via(tier, acq.element, MouseButton::Left).await;
            if attempt.is_ok() && self.checked_state(acq.element, aria).await? != desired {
                attempt = Err(Error::Driver("click did not change the checked state".into()));
            }
            if ladder.record(tier, attempt) {
                return Ok(tier);
            }
        }
        Err(ladder.exhausted())
    }

    /// Slider, date and color inputs: typed first, assigned by script second.
    /// Either way the value must read back as given, up to browser
    /// normalization.
    pub async fn set_value(
        &mut self,
        target: &str,
        kind: ValueKind,
        value: &str,
    ) -> Result<InteractionResult> {
        let acq = self.acquire(target).await?;
        let ty = self.control_type(acq.element).await?;
        if !ty
            .as_deref()
            .is_some_and(|t| kind.input_types().contains(&t))
        {
            return Err(Error::Rejected(format!(
                "{} ({}) is not a {} input (type={})",
                acq.label,
                acq.diagnostic,
                kind.name(),
                ty.as_deref().unwrap_or("none")
            )));
        }

        let el = acq.element;
        let before = self.driver.value(el).await?;
        let mut ladder = Ladder::new(kind.name(), &acq.label);
        let mut used = None;
        for tier in [Tier::Native, Tier::Scripted] {
            let mut attempt = match tier {
                Tier::Scripted => self.driver.set_value(el, value).await,
                _ => match self.driver.clear(el).await {
                    Ok(()) => self.driver.send_keys(el, value).await,
                    Err(e) => Err(e),
                },
            };
            if attempt.is_ok() {
                let now = self.driver.value(el).await?;
                if !value_took(kind, value, &before, &now) {
                    attempt = Err(Error::Driver(format!("value reads '{}'", now)));
                }
            }
            if ladder.record(tier, attempt) {
                used = Some(tier);
                break;
            }
        }
        let tier = used.ok_or_else(|| ladder.exhausted())?;
        self.learn(&acq);
        Ok(InteractionResult::on(
            &acq,
            Some(tier),
            format!("Set {} {} to '{}' via {}", kind.name(), acq.label, value, tier),
        ))
    }

    /// Current value of a control, read without changing it.
    pub async fn get_value(&mut self, target: &str) -> Result<InteractionResult> {
        let acq = self.acquire(target).await?;
        let el = acq.element;
        let tag = self.driver.tag_name(el).await?;
        let value = match (tag.as_str(), self.control_type(el).await?.as_deref()) {
            ("select", _) => {
                let value = self.driver.value(el).await?;
                let options = self.driver.options(el).await?;
                match options.iter().find(|o| o.value == value) {
                    Some(o) => format!("{} ({})", o.text.trim(), o.value),
                    None => value,
                }
            }
            ("input", Some("checkbox" | "radio")) => {
                if self.driver.is_checked(el).await? {
                    "checked".to_string()
                } else {
                    "unchecked".to_string()
                }
            }
            ("input" | "textarea", _) => self.driver.value(el).await?,
            _ => self.driver.text(el).await?,
        };
        Ok(InteractionResult::on(
            &acq,
            None,
            format!("Value of {}: '{}'", acq.label, value),
        ))
    }

    /// Fill several fields, each by the action its element kind calls for.
    /// One bad field does not stop the rest.
    pub async fn fill_form(&mut self, fields: &[(String, String)]) -> Result<InteractionResult> {
        let mut filled = 0;
        let mut failures = Vec::new();
        for (target, value) in fields {
            match self.fill_one(target, value).await {
                Ok(result) if result.success => filled += 1,
                Ok(result) => failures.push(format!("{}: {}", target, result.message)),
                Err(e) => failures.push(format!("{}: {}", target, error_string(&e))),
            }
        }
        info!("filled {}/{} fields", filled, fields.len());

        let mut message = format!("Filled {}/{} fields", filled, fields.len());
        for failure in &failures {
            message.push_str("\n  ");
            message.push_str(failure);
        }
        let result = InteractionResult::done(message);
        Ok(if failures.is_empty() { result } else { result.failed() })
    }

    async fn fill_one(&mut self, target: &str, value: &str) -> Result<InteractionResult> {
        let acq = self.acquire(target).await?;
        let tag = self.driver.tag_name(acq.element).await?;
        let control = match (tag.as_str(), self.control_type(acq.element).await?.as_deref()) {
            ("select", _) => Control::Select,
            (_, Some("checkbox")) => Control::Checkbox,
            (_, Some("radio")) => Control::Radio,
            _ => Control::Text,
        };
        match control {
            Control::Select => self.select_on(&acq, value).await,
            Control::Checkbox => {
                let mode = if truthy(value) {
                    CheckMode::Check
                } else {
                    CheckMode::Uncheck
                };
                self.checkbox_on(&acq, mode).await
            }
            Control::Radio => {
                if truthy(value) {
                    self.radio_on(&acq).await
                } else {
                    Ok(InteractionResult::on(
                        &acq,
                        None,
                        format!("Left radio {} alone", acq.label),
                    ))
                }
            }
            Control::Text => self.type_on(&acq, value, false).await,
        }
    }
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalized_read_backs_count_as_set() {
        assert!(value_took(ValueKind::Color, "#FF0000", "#000000", "#ff0000"));
        assert!(!value_took(ValueKind::Color, "#FF0000", "#000000", "#000000"));

        assert!(value_took(ValueKind::Slider, "50", "10", "50.0"));
        // snapped to step 5
        assert!(value_took(ValueKind::Slider, "52", "10", "50"));
        assert!(!value_took(ValueKind::Slider, "52", "10", "10"));
        assert!(!value_took(ValueKind::Slider, "loud", "10", "20"));

        assert!(value_took(ValueKind::Date, "2024-05-01T09:30:00", "", "2024-05-01T09:30"));
        assert!(!value_took(ValueKind::Date, "2024-13-45", "", ""));
    }

    fn opts(pairs: &[(&str, &str)]) -> Vec<SelectOption> {
        pairs
            .iter()
            .map(|(v, t)| SelectOption {
                value: v.to_string(),
                text: t.to_string(),
            })
            .collect()
    }

    #[test]
    fn tie_break_order() {
        let options = opts(&[
            ("ca-fr", "canada (french)"),
            ("CA", "Canada"),
            ("us", "United States"),
        ]);
        assert_eq!(choose_option(&options, "Canada"), Some((1, OptionMatch::ExactText)));
        assert_eq!(choose_option(&options, "us"), Some((2, OptionMatch::Value)));
        assert_eq!(
            choose_option(&options, "united states"),
            Some((2, OptionMatch::CaseInsensitiveText))
        );
        assert_eq!(choose_option(&options, "unit"), Some((2, OptionMatch::StartsWith)));
        assert_eq!(choose_option(&options, "french"), Some((0, OptionMatch::Contains)));
        assert_eq!(choose_option(&options, "2"), Some((2, OptionMatch::Index)));
        assert_eq!(choose_option(&options, "7"), None);
        assert_eq!(choose_option(&options, "Mexico"), None);
    }

    #[test]
    fn canada_falls_through_to_prefix() {
        let options = opts(&[("", "Choose..."), ("ca-fr", "canada (french)")]);
        assert_eq!(choose_option(&options, "Canada"), Some((1, OptionMatch::StartsWith)));
    }

    #[test]
    fn value_beats_case_insensitive_text() {
        let options = opts(&[("x", "yes"), ("YES", "Affirmative")]);
        assert_eq!(choose_option(&options, "YES"), Some((1, OptionMatch::Value)));
    }

    #[test]
    fn first_option_wins_within_a_rule() {
        let options = opts(&[("a", "Apple pie"), ("b", "Apple tart")]);
        assert_eq!(choose_option(&options, "apple"), Some((0, OptionMatch::StartsWith)));
    }

    #[test]
    fn truthy_values() {
        assert!(truthy("Yes"));
        assert!(truthy("1"));
        assert!(!truthy("false"));
        assert!(!truthy(""));
    }
}
