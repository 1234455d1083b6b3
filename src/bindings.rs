use super::*;

use crate::scalar::{display_string, is_truthy};

/// Attribute names the renderer looks for.
#[derive(Debug, Clone, Copy)]
pub(crate) struct BindingAttrs<'a> {
    pub(crate) scope: &'a str,
    pub(crate) field: &'a str,
    pub(crate) text: &'a str,
    pub(crate) class_prefix: &'a str,
}

pub(crate) fn binding_attrs(config: &RuntimeConfig) -> BindingAttrs<'_> {
    BindingAttrs {
        scope: &config.scope_attr,
        field: &config.bind_field_attr,
        text: &config.bind_text_attr,
        class_prefix: &config.bind_class_prefix,
    }
}

/// What one render pass did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RenderReport {
    /// DOM writes performed; zero when the page already reflected the state.
    pub mutations: usize,
    /// Binding expressions that failed to evaluate and were left untouched.
    pub failures: Vec<Error>,
}

impl RenderReport {
    pub(crate) fn absorb(&mut self, other: RenderReport) {
        self.mutations += other.mutations;
        self.failures.extend(other.failures);
    }
}

/// Projects `state` onto the bindings inside `scope_node`, skipping nested
/// scopes. Only values that differ from the DOM are written.
pub(crate) fn render(
    dom: &mut Dom,
    scope_node: NodeId,
    state: &ScopeState,
    attrs: BindingAttrs<'_>,
) -> RenderReport {
    let mut report = RenderReport::default();
    let mut classes = Vec::new();
    let mut stack = vec![scope_node];
    while let Some(node) = stack.pop() {
        if !dom.is_element(node) {
            continue;
        }
        if node != scope_node && dom.has_attr(node, attrs.scope) {
            continue;
        }
        render_element(dom, node, state, attrs, &mut classes, &mut report);
        stack.extend(dom.children(node).iter().rev().copied());
    }
    for (class_name, present) in classes {
        if let Ok(true) = dom.toggle_class(scope_node, &class_name, present) {
            report.mutations += 1;
        }
    }
    report
}

// Class declarations are collected rather than applied: they all target the
// scope element, and the last declaration of a class name wins.
fn render_element(
    dom: &mut Dom,
    node: NodeId,
    state: &ScopeState,
    attrs: BindingAttrs<'_>,
    classes: &mut Vec<(String, bool)>,
    report: &mut RenderReport,
) {
    if let Some(field) = dom.attr(node, attrs.field) {
        if let Some(value) = state.get(field.trim()) {
            write_text(dom, node, &display_string(value), report);
        }
    }

    if let Some(expr) = dom.attr(node, attrs.text) {
        match try_evaluate(&expr, state) {
            Ok(Some(value)) => write_text(dom, node, &display_string(&value), report),
            Ok(None) => {}
            Err(err) => report.failures.push(err),
        }
    }

    for name in dom.attr_names(node) {
        let Some(class_name) = name.strip_prefix(attrs.class_prefix) else {
            continue;
        };
        if class_name.is_empty() {
            continue;
        }
        let Some(expr) = dom.attr(node, &name) else {
            continue;
        };
        match try_evaluate(&expr, state) {
            Ok(value) => {
                classes.retain(|(seen, _)| seen != class_name);
                classes.push((class_name.to_string(), is_truthy(value.as_ref())));
            }
            Err(err) => report.failures.push(err),
        }
    }
}

fn write_text(dom: &mut Dom, node: NodeId, text: &str, report: &mut RenderReport) {
    if dom.text_content(node) == text {
        return;
    }
    if dom.set_text_content(node, text).is_ok() {
        report.mutations += 1;
    }
}
