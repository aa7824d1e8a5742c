//! Element locators: positional XPath, CSS hint and a snapshot of the element.
//!
//! Every function here is total. A missing signal degrades to an empty string or an
//! empty attribute map rather than failing the capture.

use crate::dom::ElementHandle;
use crate::events::{AttributeMap, TargetInfo};
use std::sync::Arc;
use tracing::debug;

/// Fixed path of the root container (`<body>` under the document element)
pub const ROOT_CONTAINER_XPATH: &str = "html/body";

// Guards against ancestor chains that loop in a broken host implementation
const MAX_DEPTH: usize = 4096;

/// Snapshot the element the user interacted with.
///
/// The returned target has no `value`; input capture fills that in.
pub fn locate(element: &dyn ElementHandle) -> TargetInfo {
    TargetInfo {
        xpath: xpath_of(element).unwrap_or_default(),
        css_selector: css_selector(element),
        tag_name: element.tag_name(),
        element_text: element_text(element),
        attributes: element.attributes().into_iter().collect::<AttributeMap>(),
        value: None,
    }
}

/// Positional XPath for `element`, or `None` when it cannot be located (detached node).
///
/// An element with an id short-circuits to `id("<id>")`; the same applies to the first
/// ancestor with an id. Otherwise each step is `<tag>[<n>]` where `n` counts the
/// preceding siblings sharing the tag name, 1-based.
pub fn xpath_of(element: &dyn ElementHandle) -> Option<String> {
    let mut steps: Vec<String> = Vec::new();
    let mut current: Option<Arc<dyn ElementHandle>> = None;

    loop {
        if steps.len() > MAX_DEPTH {
            debug!("Ancestor chain exceeds {} levels, giving up", MAX_DEPTH);
            return None;
        }

        let parent = {
            let node: &dyn ElementHandle = match &current {
                Some(node) => node.as_ref(),
                None => element,
            };

            if let Some(id) = node.id() {
                steps.push(format!("id(\"{id}\")"));
                break;
            }
            if is_root_container(node) {
                steps.push(ROOT_CONTAINER_XPATH.to_string());
                break;
            }

            let tag = node.tag_name().to_lowercase();
            match node.parent_element() {
                Some(parent) => {
                    steps.push(format!("{tag}[{}]", same_tag_ordinal(node)));
                    parent
                }
                None if node.is_connected() => {
                    steps.push(format!("/{tag}[1]"));
                    break;
                }
                None => {
                    debug!("Element <{}> is detached, locator unavailable", tag);
                    return None;
                }
            }
        };

        current = Some(parent);
    }

    steps.reverse();
    Some(steps.join("/"))
}

/// Lower-cased tag name suffixed with the `.`-joined class tokens
pub fn css_selector(element: &dyn ElementHandle) -> String {
    let tag = element.tag_name().to_lowercase();
    let classes: Vec<String> = element
        .attribute("class")
        .map(|class| class.split_whitespace().map(str::to_string).collect())
        .unwrap_or_default();

    if classes.is_empty() {
        tag
    } else {
        format!("{tag}.{}", classes.join("."))
    }
}

/// Rendered text, else the form value of an input-like control, else empty
pub fn element_text(element: &dyn ElementHandle) -> String {
    element
        .visible_text()
        .filter(|text| !text.is_empty())
        .or_else(|| element.form_value().filter(|value| !value.is_empty()))
        .unwrap_or_default()
}

/// `document.body`: the first `BODY` child of the connected document element. Any other
/// body gets a positional path.
fn is_root_container(element: &dyn ElementHandle) -> bool {
    if !element.tag_name().eq_ignore_ascii_case("body") {
        return false;
    }
    let Some(parent) = element.parent_element() else {
        return false;
    };
    if parent.parent_element().is_some() || !parent.is_connected() {
        return false;
    }
    first_body(parent.as_ref()).is_some_and(|body| body.node_key() == element.node_key())
}

fn first_body(document_element: &dyn ElementHandle) -> Option<Arc<dyn ElementHandle>> {
    document_element
        .child_elements()
        .into_iter()
        .find(|child| child.tag_name().eq_ignore_ascii_case("body"))
}

fn same_tag_ordinal(element: &dyn ElementHandle) -> usize {
    let tag = element.tag_name();
    let mut ordinal = 1;
    let mut sibling = element.previous_element_sibling();
    while let Some(node) = sibling {
        if node.tag_name().eq_ignore_ascii_case(&tag) {
            ordinal += 1;
        }
        sibling = node.previous_element_sibling();
    }
    ordinal
}

/// Re-resolve a locator produced by [`xpath_of`] against a live document.
///
/// Understands the subset of XPath the locator emits: an `id("…")`, `html/body` or
/// `/<tag>[1]` head followed by `<tag>[<n>]` steps.
pub fn resolve_xpath(
    document_element: &Arc<dyn ElementHandle>,
    xpath: &str,
) -> Option<Arc<dyn ElementHandle>> {
    let (mut current, rest) = if let Some(rest) = xpath.strip_prefix("id(\"") {
        let end = rest.find("\")")?;
        let node = find_by_id(document_element, &rest[..end])?;
        (node, &rest[end + 2..])
    } else if let Some(rest) = xpath.strip_prefix(ROOT_CONTAINER_XPATH) {
        if !(rest.is_empty() || rest.starts_with('/')) {
            return None;
        }
        let body = first_body(document_element.as_ref())?;
        (body, rest)
    } else if let Some(rest) = xpath.strip_prefix('/') {
        let (head, rest) = rest.split_once('/').unwrap_or((rest, ""));
        let (tag, ordinal) = parse_step(head)?;
        if ordinal != 1 || !document_element.tag_name().eq_ignore_ascii_case(tag) {
            return None;
        }
        (Arc::clone(document_element), rest)
    } else {
        return None;
    };

    for step in rest.split('/').filter(|step| !step.is_empty()) {
        let (tag, ordinal) = parse_step(step)?;
        current = current
            .child_elements()
            .into_iter()
            .filter(|child| child.tag_name().eq_ignore_ascii_case(tag))
            .nth(ordinal.checked_sub(1)?)?;
    }

    Some(current)
}

fn parse_step(step: &str) -> Option<(&str, usize)> {
    let (tag, rest) = step.split_once('[')?;
    let ordinal = rest.strip_suffix(']')?.parse().ok()?;
    (!tag.is_empty()).then_some((tag, ordinal))
}

fn find_by_id(root: &Arc<dyn ElementHandle>, id: &str) -> Option<Arc<dyn ElementHandle>> {
    if root.id().as_deref() == Some(id) {
        return Some(Arc::clone(root));
    }
    root.child_elements()
        .iter()
        .find_map(|child| find_by_id(child, id))
}
