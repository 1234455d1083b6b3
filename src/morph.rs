use super::*;

/// Structural DOM merge used to reconcile server markup with the page.
///
/// Implementations replace or patch `target` with `markup`. The runtime
/// falls back to replacing the target's inner content when no merge is
/// installed.
pub trait Morph {
    fn morph(&mut self, dom: &mut Dom, target: NodeId, markup: &str, mode: &SwapMode)
    -> Result<()>;
}

/// Merge that swaps the whole target element for the response markup.
#[derive(Debug, Default, Clone, Copy)]
pub struct OuterSwap;

impl Morph for OuterSwap {
    fn morph(
        &mut self,
        dom: &mut Dom,
        target: NodeId,
        markup: &str,
        _mode: &SwapMode,
    ) -> Result<()> {
        dom.replace_with_html(target, markup)
    }
}

/// Fallback merge: when the markup is a single element carrying the
/// target's tag, its children replace the target's children and its
/// attributes are copied over; anything else becomes the inner content.
pub(crate) fn replace_inner(dom: &mut Dom, target: NodeId, markup: &str) -> Result<()> {
    let fragment = parse_html(markup)?;
    let root = fragment.root();
    let elements = fragment
        .children(root)
        .iter()
        .copied()
        .filter(|&child| fragment.is_element(child) || !fragment.text_content(child).trim().is_empty())
        .collect::<Vec<_>>();

    let same_tag = match elements.as_slice() {
        [single] => fragment.is_element(*single) && fragment.tag_name(*single) == dom.tag_name(target),
        _ => false,
    };
    if !same_tag {
        return dom.set_inner_html(target, markup);
    }

    let source = elements[0];
    dom.set_inner_html(target, &fragment.inner_html(source)?)?;
    for name in fragment.attr_names(source) {
        if let Some(value) = fragment.attr(source, &name) {
            if dom.attr(target, &name).as_deref() != Some(value.as_str()) {
                dom.set_attr(target, &name, &value)?;
            }
        }
    }
    Ok(())
}
