use super::*;

use std::collections::BTreeMap;

use crate::html::{escape_attr, escape_text};
use crate::selector::Selector;

const ROOT: NodeId = NodeId(0);

/// Arena handle of a node. Handles stay valid after detachment; use
/// [`Dom::is_connected`] before acting on one that may be stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) usize);

#[derive(Debug, Clone)]
enum Kind {
    Document,
    Element(ElementData),
    Text(String),
}

#[derive(Debug, Clone)]
struct ElementData {
    tag: String,
    attrs: BTreeMap<String, String>,
    // live form state, seeded from the attributes
    value: String,
    checked: bool,
}

#[derive(Debug, Clone)]
struct Slot {
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    kind: Kind,
}

/// The host document the runtime operates on.
#[derive(Debug, Clone)]
pub struct Dom {
    slots: Vec<Slot>,
    ids: HashMap<String, NodeId>,
    writes: u64,
}

impl Default for Dom {
    fn default() -> Self {
        Self::new()
    }
}

impl Dom {
    pub(crate) fn new() -> Self {
        Self {
            slots: vec![Slot {
                parent: None,
                children: Vec::new(),
                kind: Kind::Document,
            }],
            ids: HashMap::new(),
            writes: 0,
        }
    }

    pub fn root(&self) -> NodeId {
        ROOT
    }

    fn push_slot(&mut self, parent: NodeId, kind: Kind) -> NodeId {
        let node = NodeId(self.slots.len());
        self.slots.push(Slot {
            parent: Some(parent),
            children: Vec::new(),
            kind,
        });
        if let Some(slot) = self.slots.get_mut(parent.0) {
            slot.children.push(node);
        }
        node
    }

    pub(crate) fn create_element(
        &mut self,
        parent: NodeId,
        tag: String,
        attrs: BTreeMap<String, String>,
    ) -> NodeId {
        let id_attr = attrs.get("id").filter(|id| !id.is_empty()).cloned();
        let data = ElementData {
            value: attrs.get("value").cloned().unwrap_or_default(),
            checked: attrs.contains_key("checked"),
            tag,
            attrs,
        };
        let node = self.push_slot(parent, Kind::Element(data));
        if let Some(id_attr) = id_attr {
            self.ids.entry(id_attr).or_insert(node);
        }
        node
    }

    pub(crate) fn create_text(&mut self, parent: NodeId, text: String) -> NodeId {
        self.push_slot(parent, Kind::Text(text))
    }

    fn data(&self, node: NodeId) -> Option<&ElementData> {
        match self.slots.get(node.0).map(|slot| &slot.kind) {
            Some(Kind::Element(data)) => Some(data),
            _ => None,
        }
    }

    fn data_mut(&mut self, node: NodeId) -> Result<&mut ElementData> {
        match self.slots.get_mut(node.0).map(|slot| &mut slot.kind) {
            Some(Kind::Element(data)) => Ok(data),
            _ => Err(not_an_element(node)),
        }
    }

    pub fn is_element(&self, node: NodeId) -> bool {
        self.data(node).is_some()
    }

    pub fn tag_name(&self, node: NodeId) -> Option<&str> {
        self.data(node).map(|data| data.tag.as_str())
    }

    pub fn parent(&self, node: NodeId) -> Option<NodeId> {
        self.slots.get(node.0).and_then(|slot| slot.parent)
    }

    pub fn children(&self, node: NodeId) -> &[NodeId] {
        self.slots
            .get(node.0)
            .map(|slot| slot.children.as_slice())
            .unwrap_or(&[])
    }

    /// `node` followed by its ancestors, nearest first.
    pub fn ancestors(&self, node: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        std::iter::successors(Some(node), move |&current| self.parent(current))
    }

    /// Nodes below `node` in document order, `node` excluded.
    pub(crate) fn descendants(&self, node: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack = self.children(node).iter().rev().copied().collect::<Vec<_>>();
        while let Some(current) = stack.pop() {
            out.push(current);
            stack.extend(self.children(current).iter().rev().copied());
        }
        out
    }

    /// Connected elements in document order.
    pub(crate) fn all_element_nodes(&self) -> Vec<NodeId> {
        let mut elements = self.descendants(ROOT);
        elements.retain(|&node| self.is_element(node));
        elements
    }

    pub fn is_connected(&self, node: NodeId) -> bool {
        self.ancestors(node).any(|current| current == ROOT)
    }

    pub fn by_id(&self, id: &str) -> Option<NodeId> {
        self.ids.get(id).copied()
    }

    /// Number of DOM writes performed so far.
    pub fn mutation_count(&self) -> u64 {
        self.writes
    }

    // First element in document order wins a duplicated id.
    fn reindex(&mut self) {
        let mut ids = HashMap::new();
        for node in self.all_element_nodes() {
            if let Some(id) = self.attr(node, "id").filter(|id| !id.is_empty()) {
                ids.entry(id).or_insert(node);
            }
        }
        self.ids = ids;
    }

    pub fn attr(&self, node: NodeId, name: &str) -> Option<String> {
        self.data(node)
            .and_then(|data| data.attrs.get(&name.to_ascii_lowercase()).cloned())
    }

    pub fn has_attr(&self, node: NodeId, name: &str) -> bool {
        self.data(node)
            .is_some_and(|data| data.attrs.contains_key(&name.to_ascii_lowercase()))
    }

    /// Attribute names of an element, sorted.
    pub fn attr_names(&self, node: NodeId) -> Vec<String> {
        self.data(node)
            .map(|data| data.attrs.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn set_attr(&mut self, node: NodeId, name: &str, value: &str) -> Result<()> {
        let name = name.to_ascii_lowercase();
        let data = self.data_mut(node)?;
        match name.as_str() {
            "value" => data.value = value.to_string(),
            "checked" => data.checked = true,
            _ => {}
        }
        let previous = data.attrs.insert(name.clone(), value.to_string());
        self.writes += 1;
        if name == "id" && previous.as_deref() != Some(value) {
            self.reindex();
        }
        Ok(())
    }

    pub fn remove_attr(&mut self, node: NodeId, name: &str) -> Result<()> {
        let name = name.to_ascii_lowercase();
        let data = self.data_mut(node)?;
        if name == "checked" {
            data.checked = false;
        }
        if data.attrs.remove(&name).is_none() {
            return Ok(());
        }
        self.writes += 1;
        if name == "id" {
            self.reindex();
        }
        Ok(())
    }

    pub fn has_class(&self, node: NodeId, class_name: &str) -> bool {
        self.data(node)
            .is_some_and(|data| class_list(data).any(|class| class == class_name))
    }

    /// Adds or removes `class_name`; writes only when the class list changes.
    pub fn toggle_class(&mut self, node: NodeId, class_name: &str, present: bool) -> Result<bool> {
        let data = self.data_mut(node)?;
        let mut classes = class_list(data).map(str::to_string).collect::<Vec<_>>();
        if classes.iter().any(|class| class == class_name) == present {
            return Ok(false);
        }
        if present {
            classes.push(class_name.to_string());
        } else {
            classes.retain(|class| class != class_name);
        }
        if classes.is_empty() {
            data.attrs.remove("class");
        } else {
            data.attrs.insert("class".to_string(), classes.join(" "));
        }
        self.writes += 1;
        Ok(true)
    }

    pub fn text_content(&self, node: NodeId) -> String {
        let mut nodes = vec![node];
        nodes.extend(self.descendants(node));
        nodes
            .into_iter()
            .filter_map(|current| match self.slots.get(current.0).map(|slot| &slot.kind) {
                Some(Kind::Text(text)) => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }

    pub fn set_text_content(&mut self, node: NodeId, text: &str) -> Result<()> {
        self.data_mut(node)?;
        let dropped_elements = self.detach_children(node);
        if !text.is_empty() {
            self.create_text(node, text.to_string());
        }
        if dropped_elements {
            self.reindex();
        }
        self.writes += 1;
        Ok(())
    }

    pub fn inner_html(&self, node: NodeId) -> Result<String> {
        if !self.is_element(node) {
            return Err(not_an_element(node));
        }
        let mut out = String::new();
        for &child in self.children(node) {
            self.write_markup(child, &mut out);
        }
        Ok(out)
    }

    pub fn set_inner_html(&mut self, node: NodeId, html: &str) -> Result<()> {
        self.data_mut(node)?;
        let fragment = parse_html(html)?;
        self.detach_children(node);
        for &child in fragment.children(ROOT) {
            self.graft(&fragment, child, node);
        }
        self.reindex();
        self.writes += 1;
        Ok(())
    }

    /// Replaces the element itself with the parsed markup.
    pub fn replace_with_html(&mut self, node: NodeId, html: &str) -> Result<()> {
        self.data_mut(node)?;
        let parent = self
            .parent(node)
            .ok_or_else(|| Error::Runtime(format!("cannot replace detached node {}", node.0)))?;
        let position = self
            .children(parent)
            .iter()
            .position(|&child| child == node)
            .ok_or_else(|| Error::Runtime(format!("node {} is not under its parent", node.0)))?;

        let fragment = parse_html(html)?;
        let appended_from = self.children(parent).len();
        for &child in fragment.children(ROOT) {
            self.graft(&fragment, child, parent);
        }
        let siblings = &mut self.slots[parent.0].children;
        let inserted = siblings.split_off(appended_from);
        siblings.splice(position..=position, inserted);
        self.slots[node.0].parent = None;

        self.reindex();
        self.writes += 1;
        Ok(())
    }

    pub fn remove_node(&mut self, node: NodeId) -> Result<()> {
        if node == ROOT {
            return Err(Error::Runtime("cannot remove the document node".into()));
        }
        let Some(parent) = self.parent(node) else {
            return Ok(());
        };
        self.slots[parent.0].children.retain(|&child| child != node);
        self.slots[node.0].parent = None;
        self.reindex();
        self.writes += 1;
        Ok(())
    }

    /// Returns whether any detached child was an element.
    fn detach_children(&mut self, node: NodeId) -> bool {
        let Some(slot) = self.slots.get_mut(node.0) else {
            return false;
        };
        let children = std::mem::take(&mut slot.children);
        let mut had_elements = false;
        for child in children {
            had_elements |= self.is_element(child);
            self.slots[child.0].parent = None;
        }
        had_elements
    }

    // Copies `node` and its subtree from another arena under `parent`.
    fn graft(&mut self, source: &Dom, node: NodeId, parent: NodeId) {
        let Some(slot) = source.slots.get(node.0) else {
            return;
        };
        if matches!(slot.kind, Kind::Document) {
            return;
        }
        let copy = self.push_slot(parent, slot.kind.clone());
        for &child in &slot.children {
            self.graft(source, child, copy);
        }
    }

    pub fn value(&self, node: NodeId) -> Result<String> {
        self.data(node)
            .map(|data| data.value.clone())
            .ok_or_else(|| not_an_element(node))
    }

    pub fn set_value(&mut self, node: NodeId, value: &str) -> Result<()> {
        self.data_mut(node)?.value = value.to_string();
        self.writes += 1;
        Ok(())
    }

    pub fn checked(&self, node: NodeId) -> Result<bool> {
        self.data(node)
            .map(|data| data.checked)
            .ok_or_else(|| not_an_element(node))
    }

    pub fn set_checked(&mut self, node: NodeId, checked: bool) -> Result<()> {
        self.data_mut(node)?.checked = checked;
        self.writes += 1;
        Ok(())
    }

    pub fn disabled(&self, node: NodeId) -> bool {
        self.has_attr(node, "disabled")
    }

    // Textareas take their text, selects their selected (or first) option.
    pub(crate) fn initialize_form_control_values(&mut self) {
        for node in self.all_element_nodes() {
            let value = match self.tag_name(node) {
                Some("textarea") => self.text_content(node),
                Some("select") => self.selected_option_value(node),
                _ => continue,
            };
            if let Ok(data) = self.data_mut(node) {
                data.value = value;
            }
        }
    }

    fn selected_option_value(&self, select: NodeId) -> String {
        let options = self
            .descendants(select)
            .into_iter()
            .filter(|&node| self.tag_name(node) == Some("option"))
            .collect::<Vec<_>>();
        options
            .iter()
            .copied()
            .find(|&option| self.has_attr(option, "selected"))
            .or_else(|| options.first().copied())
            .map(|option| {
                self.attr(option, "value")
                    .unwrap_or_else(|| self.text_content(option).trim().to_string())
            })
            .unwrap_or_default()
    }

    /// Nearest inclusive ancestor carrying `attr`.
    pub fn closest_with_attr(&self, node: NodeId, attr: &str) -> Option<NodeId> {
        self.ancestors(node).find(|&current| self.has_attr(current, attr))
    }

    pub(crate) fn find_ancestor_by_tag(&self, node: NodeId, tag: &str) -> Option<NodeId> {
        self.ancestors(node)
            .skip(1)
            .find(|&current| self.tag_name(current) == Some(tag))
    }

    pub fn query_selector(&self, selector: &str) -> Result<Option<NodeId>> {
        let selector = Selector::parse(selector)?;
        if let Some(id) = selector.as_id() {
            return Ok(self.by_id(id));
        }
        Ok(self
            .all_element_nodes()
            .into_iter()
            .find(|&node| selector.matches(self, node)))
    }

    /// Connected elements matching `selector`, in document order.
    pub fn query_selector_all(&self, selector: &str) -> Result<Vec<NodeId>> {
        let selector = Selector::parse(selector)?;
        if let Some(id) = selector.as_id() {
            return Ok(self.by_id(id).into_iter().collect());
        }
        Ok(self
            .all_element_nodes()
            .into_iter()
            .filter(|&node| selector.matches(self, node))
            .collect())
    }

    /// Serializes `node` with attributes in name order.
    pub fn dump_node(&self, node: NodeId) -> String {
        let mut out = String::new();
        self.write_markup(node, &mut out);
        out
    }

    fn write_markup(&self, node: NodeId, out: &mut String) {
        let Some(slot) = self.slots.get(node.0) else {
            return;
        };
        let data = match &slot.kind {
            Kind::Text(text) => {
                out.push_str(&escape_text(text));
                return;
            }
            Kind::Document => {
                for &child in &slot.children {
                    self.write_markup(child, out);
                }
                return;
            }
            Kind::Element(data) => data,
        };

        out.push('<');
        out.push_str(&data.tag);
        for (name, value) in &data.attrs {
            out.push_str(&format!(" {name}=\"{}\"", escape_attr(value)));
        }
        out.push('>');
        if is_void_tag(&data.tag) {
            return;
        }
        for &child in &slot.children {
            self.write_markup(child, out);
        }
        out.push_str(&format!("</{}>", data.tag));
    }

    /// Name/value pairs a form would submit, in document order.
    pub(crate) fn form_data_entries(&self, form: NodeId) -> Vec<(String, String)> {
        self.descendants(form)
            .into_iter()
            .filter_map(|node| self.data(node))
            .filter(|data| is_successful_control(data))
            .map(|data| {
                let name = data.attrs.get("name").cloned().unwrap_or_default();
                let checkable = matches!(input_type(data).as_str(), "checkbox" | "radio");
                let value = if checkable && !data.attrs.contains_key("value") {
                    "on".to_string()
                } else {
                    data.value.clone()
                };
                (name, value)
            })
            .collect()
    }
}

fn not_an_element(node: NodeId) -> Error {
    Error::Runtime(format!("node {} is not an element", node.0))
}

fn class_list(data: &ElementData) -> impl Iterator<Item = &str> {
    data.attrs
        .get("class")
        .map(String::as_str)
        .unwrap_or_default()
        .split_whitespace()
}

// Lowercased `type` of an input; empty for other elements.
fn input_type(data: &ElementData) -> String {
    if data.tag != "input" {
        return String::new();
    }
    data.attrs
        .get("type")
        .map(|kind| kind.to_ascii_lowercase())
        .unwrap_or_else(|| "text".to_string())
}

fn is_successful_control(data: &ElementData) -> bool {
    if !matches!(data.tag.as_str(), "input" | "select" | "textarea")
        || data.attrs.contains_key("disabled")
        || data.attrs.get("name").is_none_or(String::is_empty)
    {
        return false;
    }
    match input_type(data).as_str() {
        "button" | "submit" | "reset" | "file" | "image" => false,
        "checkbox" | "radio" => data.checked,
        _ => true,
    }
}

pub(crate) fn is_void_tag(tag: &str) -> bool {
    matches!(
        tag,
        "area"
            | "base"
            | "br"
            | "col"
            | "embed"
            | "hr"
            | "img"
            | "input"
            | "link"
            | "meta"
            | "param"
            | "source"
            | "track"
            | "wbr"
    )
}

pub(crate) fn is_form_control(dom: &Dom, node: NodeId) -> bool {
    dom.data(node).is_some_and(|data| {
        matches!(data.tag.as_str(), "input" | "select" | "textarea" | "button")
    })
}

/// Buttons default to `type=submit`.
pub(crate) fn is_submit_control(dom: &Dom, node: NodeId) -> bool {
    let Some(data) = dom.data(node) else {
        return false;
    };
    match data.tag.as_str() {
        "button" => data
            .attrs
            .get("type")
            .is_none_or(|kind| kind.eq_ignore_ascii_case("submit")),
        "input" => input_type(data) == "submit",
        _ => false,
    }
}

pub(crate) fn is_checkbox_input(dom: &Dom, node: NodeId) -> bool {
    dom.data(node)
        .is_some_and(|data| input_type(data) == "checkbox")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(dom: &Dom, id: &str) -> Result<NodeId> {
        dom.by_id(id)
            .ok_or_else(|| Error::SelectorNotFound(format!("#{id}")))
    }

    #[test]
    fn replacing_an_element_keeps_sibling_order() -> Result<()> {
        let mut dom = parse_html(r#"<ul id="l"><li id="a"></li><li id="b"></li><li id="c"></li></ul>"#)?;
        let b = node(&dom, "b")?;
        dom.replace_with_html(b, r#"<li id="x"></li><li id="y"></li>"#)?;

        let list = node(&dom, "l")?;
        let ids = dom
            .children(list)
            .iter()
            .filter_map(|&child| dom.attr(child, "id"))
            .collect::<Vec<_>>();
        assert_eq!(ids, vec!["a", "x", "y", "c"]);
        assert!(!dom.is_connected(b));
        assert_eq!(dom.by_id("b"), None);
        Ok(())
    }

    #[test]
    fn class_toggling_writes_only_on_change() -> Result<()> {
        let mut dom = parse_html(r#"<p id="p" class="a  b"></p>"#)?;
        let p = node(&dom, "p")?;
        let before = dom.mutation_count();
        assert!(!dom.toggle_class(p, "a", true)?);
        assert_eq!(dom.mutation_count(), before);
        assert!(dom.toggle_class(p, "c", true)?);
        assert_eq!(dom.attr(p, "class").as_deref(), Some("a b c"));
        assert!(dom.toggle_class(p, "a", false)?);
        assert!(dom.toggle_class(p, "b", false)?);
        assert!(dom.toggle_class(p, "c", false)?);
        assert!(!dom.has_attr(p, "class"));
        Ok(())
    }

    #[test]
    fn form_entries_follow_submission_rules() -> Result<()> {
        let dom = parse_html(
            r#"<form id="f">
                 <input name="t" value="hi">
                 <input type="checkbox" name="c1" checked>
                 <input type="checkbox" name="c2">
                 <input type="radio" name="r" value="b" checked>
                 <input name="off" value="x" disabled>
                 <input type="submit" name="go" value="Go">
                 <select name="s"><option>one</option><option value="2" selected>two</option></select>
                 <textarea name="ta">body</textarea>
                 <button name="b">b</button>
               </form>"#,
        )?;
        let form = node(&dom, "f")?;
        let entries = dom.form_data_entries(form);
        let expected = [("t", "hi"), ("c1", "on"), ("r", "b"), ("s", "2"), ("ta", "body")];
        assert_eq!(
            entries,
            expected
                .iter()
                .map(|(n, v)| (n.to_string(), v.to_string()))
                .collect::<Vec<_>>()
        );
        Ok(())
    }

    #[test]
    fn dump_sorts_attributes_and_escapes() -> Result<()> {
        let dom = parse_html(r#"<p title='say "hi"' id="p">a &lt; b<br></p>"#)?;
        let p = node(&dom, "p")?;
        assert_eq!(
            dom.dump_node(p),
            r#"<p id="p" title="say &quot;hi&quot;">a &lt; b<br></p>"#
        );
        Ok(())
    }

    #[test]
    fn closest_and_connectivity() -> Result<()> {
        let mut dom = parse_html(r#"<div id="s" az-scope="{}"><p><b id="b"></b></p></div>"#)?;
        let b = node(&dom, "b")?;
        let s = node(&dom, "s")?;
        assert_eq!(dom.closest_with_attr(b, "az-scope"), Some(s));
        assert_eq!(dom.closest_with_attr(s, "az-scope"), Some(s));
        dom.remove_node(s)?;
        assert!(!dom.is_connected(b));
        assert_eq!(dom.by_id("b"), None);
        assert!(dom.remove_node(dom.root()).is_err());
        Ok(())
    }
}
