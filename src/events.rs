use super::*;

use crate::dom::{is_checkbox_input, is_form_control, is_submit_control};
use crate::scope::describe_node;

/// Result of dispatching one user interaction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EventOutcome {
    /// A matching command claimed the event and suppressed the default.
    pub default_prevented: bool,
    /// An action was executed (or queued) for the event.
    pub handled: bool,
}

impl EventOutcome {
    fn merge(self, other: EventOutcome) -> EventOutcome {
        EventOutcome {
            default_prevented: self.default_prevented || other.default_prevented,
            handled: self.handled || other.handled,
        }
    }
}

impl Runtime {
    pub fn click(&mut self, selector: &str) -> Result<EventOutcome> {
        let target = self.select_one(selector)?;
        if self.dom.disabled(target) {
            return Ok(EventOutcome::default());
        }
        stacker::grow(32 * 1024 * 1024, || self.click_node(target))
    }

    fn click_node(&mut self, target: NodeId) -> Result<EventOutcome> {
        let toggles = is_checkbox_input(&self.dom, target);
        let was_checked = self.dom.checked(target).unwrap_or(false);
        if toggles {
            self.dom.set_checked(target, !was_checked)?;
        }

        let outcome = self.dispatch_event(target, "click");
        if outcome.default_prevented {
            if toggles {
                self.dom.set_checked(target, was_checked)?;
            }
            return Ok(outcome);
        }

        if toggles {
            let input = self.dispatch_event(target, "input");
            let change = self.dispatch_event(target, "change");
            return Ok(outcome.merge(input).merge(change));
        }

        if is_submit_control(&self.dom, target) {
            if let Some(form) = self.dom.find_ancestor_by_tag(target, "form") {
                let submit = self.dispatch_event(form, "submit");
                return Ok(outcome.merge(submit));
            }
        }
        Ok(outcome)
    }

    /// Submits the selected form, or the form owning the selected control.
    pub fn submit(&mut self, selector: &str) -> Result<EventOutcome> {
        let target = self.select_one(selector)?;
        let form = if self.dom.tag_name(target) == Some("form") {
            Some(target)
        } else {
            self.dom.find_ancestor_by_tag(target, "form")
        };
        let Some(form) = form else {
            return Err(Error::TypeMismatch {
                selector: selector.to_string(),
                expected: "form or form control".into(),
                actual: self.dom.tag_name(target).unwrap_or("#node").to_string(),
            });
        };
        Ok(self.dispatch_event(form, "submit"))
    }

    /// Sets the value of a text control and fires `input`.
    pub fn type_text(&mut self, selector: &str, text: &str) -> Result<EventOutcome> {
        let target = self.select_one(selector)?;
        self.ensure_tag(selector, target, &["input", "textarea"])?;
        if self.dom.disabled(target) || self.dom.has_attr(target, "readonly") {
            return Ok(EventOutcome::default());
        }
        self.dom.set_value(target, text)?;
        Ok(self.dispatch_event(target, "input"))
    }

    /// Sets the value of a form control and fires `change`.
    pub fn change_value(&mut self, selector: &str, value: &str) -> Result<EventOutcome> {
        let target = self.select_one(selector)?;
        if !is_form_control(&self.dom, target) {
            return Err(Error::TypeMismatch {
                selector: selector.to_string(),
                expected: "form control".into(),
                actual: self.dom.tag_name(target).unwrap_or("#node").to_string(),
            });
        }
        if self.dom.disabled(target) {
            return Ok(EventOutcome::default());
        }
        self.dom.set_value(target, value)?;
        Ok(self.dispatch_event(target, "change"))
    }

    /// Checks or unchecks a checkbox or radio; fires `input` and `change`
    /// only when the state changes.
    pub fn set_checked(&mut self, selector: &str, checked: bool) -> Result<EventOutcome> {
        let target = self.select_one(selector)?;
        let kind = self.dom.attr(target, "type").unwrap_or_default();
        let checkable = self.dom.tag_name(target) == Some("input")
            && (kind.eq_ignore_ascii_case("checkbox") || kind.eq_ignore_ascii_case("radio"));
        if !checkable {
            return Err(Error::TypeMismatch {
                selector: selector.to_string(),
                expected: "checkbox or radio input".into(),
                actual: self.dom.tag_name(target).unwrap_or("#node").to_string(),
            });
        }
        if self.dom.disabled(target) || self.dom.checked(target)? == checked {
            return Ok(EventOutcome::default());
        }
        self.dom.set_checked(target, checked)?;
        let input = self.dispatch_event(target, "input");
        let change = self.dispatch_event(target, "change");
        Ok(input.merge(change))
    }

    /// Dispatches a bare event of `event_type` at the selected element.
    pub fn dispatch(&mut self, selector: &str, event_type: &str) -> Result<EventOutcome> {
        let target = self.select_one(selector)?;
        Ok(self.dispatch_event(target, event_type))
    }

    fn ensure_tag(&self, selector: &str, target: NodeId, tags: &[&str]) -> Result<()> {
        let tag = self.dom.tag_name(target).unwrap_or("#node");
        if tags.iter().any(|t| t.eq_ignore_ascii_case(tag)) {
            return Ok(());
        }
        Err(Error::TypeMismatch {
            selector: selector.to_string(),
            expected: tags.join(" or "),
            actual: tag.to_string(),
        })
    }

    // Delegated handler at the document root.
    pub(crate) fn dispatch_event(&mut self, target: NodeId, event_type: &str) -> EventOutcome {
        if !self.config.handles_event(event_type) {
            return EventOutcome::default();
        }
        let label = describe_node(&self.dom, target);
        self.trace_event_line(format!("[event] {event_type} target={label}"));

        let Some(carrier) = self
            .dom
            .closest_with_attr(target, &self.config.command_attr)
        else {
            return EventOutcome::default();
        };
        let raw = self
            .dom
            .attr(carrier, &self.config.command_attr)
            .unwrap_or_default();
        let Some(command) = parse_command(&raw, &self.config.endpoint_prefix) else {
            let err = Error::CommandParse(format!("unrecognised command {raw:?}"));
            self.warn(err.to_string());
            return EventOutcome::default();
        };
        if command.trigger != event_type {
            return EventOutcome::default();
        }

        let mut action = command.action;
        if let Action::Call(call) = &mut action {
            call.prediction = self
                .dom
                .attr(carrier, &self.config.predict_attr)
                .filter(|p| !p.trim().is_empty());
        }
        let carrier_label = describe_node(&self.dom, carrier);
        self.trace_event_line(format!(
            "[event] {event_type} handled by {carrier_label} action={}",
            action.label()
        ));
        self.execute_action(action, carrier);
        EventOutcome {
            default_prevented: true,
            handled: true,
        }
    }
}
