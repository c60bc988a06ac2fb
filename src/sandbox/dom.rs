//! Document snapshots.
//!
//! A realm hands back its document as a [`DomNode`] tree after every change.
//! Selector matching runs over lightningcss's parsed selector components and
//! [`Cascade`] resolves the declared value of each property for an element:
//! `!important` first, then specificity, then source order, with inline
//! styles above every stylesheet rule of the same importance.

use std::collections::BTreeMap;

use lightningcss::rules::CssRule;
use lightningcss::selector::{Combinator, Component, PseudoClass, Selector};
use lightningcss::stylesheet::{ParserOptions, StyleAttribute, StyleSheet as LightningSheet};
use parcel_selectors::attr::AttrSelectorOperator;
use serde::{Deserialize, Serialize};

use crate::css::{self, block_declarations};
use crate::protocol::{ElementInfo, StyleMap};

/// Id of the element components render into.
pub const PREVIEW_ROOT_ID: &str = "preview-root";

/// Marks the diagnostic panel that replaces a failed render.
pub const DIAGNOSTIC_ATTRIBUTE: &str = "data-preview-error";

const TEXT_TAG: &str = "#text";

/// Properties whose value flows from the nearest ancestor that declares it.
const INHERITED: &[&str] = &[
    "color",
    "cursor",
    "direction",
    "font",
    "font-family",
    "font-size",
    "font-style",
    "font-weight",
    "letter-spacing",
    "line-height",
    "text-align",
    "text-transform",
    "visibility",
    "white-space",
    "word-spacing",
];

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DomNode {
    pub tag_name: String,
    pub attributes: BTreeMap<String, String>,
    /// Content of a text node, or raw inner markup an element was given.
    pub text: Option<String>,
    pub children: Vec<DomNode>,
}

/// An element and its ancestors, outermost first.
pub type ElementPath<'a> = Vec<&'a DomNode>;

impl DomNode {
    pub fn element(tag_name: &str) -> Self {
        Self {
            tag_name: tag_name.to_string(),
            ..Self::default()
        }
    }

    pub fn text_node(text: &str) -> Self {
        Self {
            tag_name: TEXT_TAG.to_string(),
            text: Some(text.to_string()),
            ..Self::default()
        }
    }

    pub fn with_attribute(mut self, name: &str, value: &str) -> Self {
        self.attributes.insert(name.to_string(), value.to_string());
        self
    }

    pub fn with_child(mut self, child: DomNode) -> Self {
        self.children.push(child);
        self
    }

    pub fn is_text(&self) -> bool {
        self.tag_name == TEXT_TAG
    }

    pub fn id(&self) -> Option<&str> {
        self.attributes.get("id").map(String::as_str).filter(|id| !id.is_empty())
    }

    pub fn class_names(&self) -> Vec<&str> {
        self.attributes
            .get("class")
            .map(|classes| classes.split_whitespace().collect())
            .unwrap_or_default()
    }

    pub fn has_class(&self, name: &str) -> bool {
        self.class_names().contains(&name)
    }

    pub fn element_children(&self) -> impl Iterator<Item = &DomNode> {
        self.children.iter().filter(|child| !child.is_text())
    }

    pub fn text_content(&self) -> String {
        if self.is_text() {
            return self.text.clone().unwrap_or_default();
        }
        if let Some(ref raw) = self.text {
            return raw.clone();
        }
        self.children.iter().map(DomNode::text_content).collect()
    }
}

// ---------------------------------------------------------------------------
// Queries
// ---------------------------------------------------------------------------

/// Every element under `root` (inclusive), in document order.
pub fn elements(root: &DomNode) -> Vec<ElementPath<'_>> {
    let mut out = Vec::new();
    let mut path = Vec::new();
    collect_elements(root, &mut path, &mut out);
    out
}

fn collect_elements<'a>(node: &'a DomNode, path: &mut Vec<&'a DomNode>, out: &mut Vec<ElementPath<'a>>) {
    if node.is_text() {
        return;
    }
    path.push(node);
    out.push(path.clone());
    for child in &node.children {
        collect_elements(child, path, out);
    }
    path.pop();
}

pub fn find_by_id<'a>(root: &'a DomNode, id: &str) -> Option<ElementPath<'a>> {
    elements(root)
        .into_iter()
        .find(|path| path.last().and_then(|element| element.id()) == Some(id))
}

/// Elements matching `selector`, in document order. An unparseable
/// selector matches nothing.
pub fn select<'a>(root: &'a DomNode, selector: &str) -> Vec<ElementPath<'a>> {
    let text = format!("{} {{}}", selector);
    let Ok(sheet) = LightningSheet::parse(&text, ParserOptions::default()) else {
        return Vec::new();
    };
    let Some(CssRule::Style(style)) = sheet.rules.0.first() else {
        return Vec::new();
    };
    elements(root)
        .into_iter()
        .filter(|path| style.selectors.0.iter().any(|s| matches(s, path)))
        .collect()
}

pub fn select_first<'a>(root: &'a DomNode, selector: &str) -> Option<ElementPath<'a>> {
    select(root, selector).into_iter().next()
}

/// The first element the component rendered into the preview root.
/// `None` before a render and while the diagnostic panel is shown.
pub fn root_element(root: &DomNode) -> Option<ElementPath<'_>> {
    let mut path = find_by_id(root, PREVIEW_ROOT_ID)?;
    let container = *path.last()?;
    let first = container.element_children().next()?;
    if first.attributes.contains_key(DIAGNOSTIC_ATTRIBUTE) {
        return None;
    }
    path.push(first);
    Some(path)
}

/// A selector that targets the element at `path`, made unique within
/// `root` by walking up through ancestors where needed.
pub fn selector_for(root: &DomNode, path: &[&DomNode]) -> String {
    let Some(element) = path.last() else {
        return String::new();
    };
    let mut selector = compound_selector(element);
    let mut depth = path.len() - 1;
    while element.id().filter(|id| is_css_ident(id)).is_none()
        && depth > 0
        && select(root, &selector).len() > 1
    {
        depth -= 1;
        let ancestor = path[depth];
        selector = format!("{} > {}", compound_selector(ancestor), selector);
        if ancestor.id().is_some_and(is_css_ident) {
            break;
        }
    }
    selector
}

fn compound_selector(element: &DomNode) -> String {
    if let Some(id) = element.id().filter(|id| is_css_ident(id)) {
        return format!("#{}", id);
    }
    let mut selector = element.tag_name.to_ascii_lowercase();
    for class in element.class_names() {
        if is_css_ident(class) {
            selector.push('.');
            selector.push_str(class);
        }
    }
    selector
}

fn is_css_ident(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' || c == '-' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

pub fn element_info(root: &DomNode, path: &[&DomNode]) -> Option<ElementInfo> {
    let element = path.last()?;
    let text = element.text_content();
    let text = text.trim();
    Some(ElementInfo {
        tag_name: element.tag_name.to_ascii_lowercase(),
        selector: selector_for(root, path),
        id: element.id().map(str::to_string),
        class_names: element.class_names().into_iter().map(str::to_string).collect(),
        text: (!text.is_empty()).then(|| text.to_string()),
    })
}

// ---------------------------------------------------------------------------
// Matching
// ---------------------------------------------------------------------------

/// Components in match order (rightmost compound first), split at
/// combinators. Each compound carries the combinator to its left.
fn compounds<'a, 'i>(selector: &'a Selector<'i>) -> Vec<(Vec<&'a Component<'i>>, Option<Combinator>)> {
    let mut out = Vec::new();
    let mut current = Vec::new();
    for component in selector.iter_raw_match_order() {
        if let Component::Combinator(combinator) = component {
            out.push((std::mem::take(&mut current), Some(*combinator)));
        } else {
            current.push(component);
        }
    }
    out.push((current, None));
    out
}

pub fn matches(selector: &Selector<'_>, path: &[&DomNode]) -> bool {
    matches_from(&compounds(selector), path)
}

fn matches_from(compounds: &[(Vec<&Component<'_>>, Option<Combinator>)], path: &[&DomNode]) -> bool {
    let Some(((compound, combinator), rest)) = compounds.split_first() else {
        return true;
    };
    let Some((element, ancestors)) = path.split_last() else {
        return false;
    };
    if !compound.iter().all(|c| matches_component(c, element, path)) {
        return false;
    }
    match combinator {
        None => true,
        Some(Combinator::Child) => matches_from(rest, ancestors),
        Some(Combinator::Descendant) => {
            (1..=ancestors.len()).rev().any(|end| matches_from(rest, &ancestors[..end]))
        }
        // Sibling combinators and pseudo-elements never match a snapshot element.
        Some(_) => false,
    }
}

fn text_of(value: &impl AsRef<str>) -> &str {
    value.as_ref()
}

fn matches_component(component: &Component<'_>, element: &DomNode, path: &[&DomNode]) -> bool {
    match component {
        Component::ExplicitUniversalType
        | Component::ExplicitAnyNamespace
        | Component::ExplicitNoNamespace
        | Component::DefaultNamespace(_) => true,
        Component::LocalName(name) => element.tag_name.eq_ignore_ascii_case(text_of(&name.name)),
        Component::ID(id) => element.id() == Some(text_of(id)),
        Component::Class(class) => element.has_class(text_of(class)),
        Component::AttributeInNoNamespaceExists { local_name, .. } => {
            element.attributes.contains_key(text_of(local_name))
        }
        Component::AttributeInNoNamespace {
            local_name,
            operator,
            value,
            never_matches,
            ..
        } => {
            !never_matches
                && element
                    .attributes
                    .get(text_of(local_name))
                    .is_some_and(|actual| attribute_matches(*operator, actual, text_of(value)))
        }
        Component::Negation(list) => !list.iter().any(|selector| matches(selector, path)),
        Component::Is(list) | Component::Where(list) | Component::Any(_, list) => {
            list.iter().any(|selector| matches(selector, path))
        }
        Component::Root => path.len() == 1,
        Component::Empty => element.text.is_none() && element.children.is_empty(),
        Component::NonTSPseudoClass(pseudo) => matches_pseudo_class(pseudo, element),
        _ => false,
    }
}

fn attribute_matches(operator: AttrSelectorOperator, actual: &str, expected: &str) -> bool {
    match operator {
        AttrSelectorOperator::Equal => actual == expected,
        AttrSelectorOperator::Includes => actual.split_whitespace().any(|word| word == expected),
        AttrSelectorOperator::DashMatch => {
            actual == expected || actual.starts_with(&format!("{}-", expected))
        }
        AttrSelectorOperator::Prefix => !expected.is_empty() && actual.starts_with(expected),
        AttrSelectorOperator::Substring => !expected.is_empty() && actual.contains(expected),
        AttrSelectorOperator::Suffix => !expected.is_empty() && actual.ends_with(expected),
    }
}

/// Only state carried by attributes can match. User-action states such as
/// `:hover` are simulated by rewriting the stylesheet instead.
fn matches_pseudo_class(pseudo: &PseudoClass<'_>, element: &DomNode) -> bool {
    let has = |name: &str| element.attributes.contains_key(name);
    match pseudo {
        PseudoClass::Disabled => has("disabled"),
        PseudoClass::Enabled => !has("disabled"),
        PseudoClass::Checked => has("checked"),
        PseudoClass::Required => has("required"),
        PseudoClass::Optional => !has("required"),
        _ => false,
    }
}

// ---------------------------------------------------------------------------
// Cascade
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
struct Candidate {
    important: bool,
    specificity: u32,
    order: usize,
    value: String,
}

impl Candidate {
    fn rank(&self) -> (bool, u32, usize) {
        (self.important, self.specificity, self.order)
    }
}

/// The document's stylesheets, flattened once and matched per query.
/// `@media` and `@container` conditions are never evaluated, so their rules
/// do not apply; `@supports` and `@layer` blocks do.
#[derive(Debug, Clone, Default)]
pub struct Cascade {
    sheets: Vec<String>,
}

impl Cascade {
    /// `sheets` in cascade order, lowest first.
    pub fn new(sheets: &[&str]) -> Self {
        let sheets = sheets
            .iter()
            .filter_map(|text| match css::parse(text) {
                Ok(sheet) => Some(sheet.to_css()),
                Err(e) => {
                    tracing::warn!("Skipping stylesheet in cascade: {}", e);
                    None
                }
            })
            .collect();
        Self { sheets }
    }

    /// Declared values for the element at `path`, with inherited properties
    /// filled from the nearest ancestor that declares them.
    pub fn computed(&self, path: &[&DomNode]) -> StyleMap {
        let parsed: Vec<_> = self
            .sheets
            .iter()
            .filter_map(|text| {
                let options = ParserOptions {
                    error_recovery: true,
                    ..ParserOptions::default()
                };
                LightningSheet::parse(text, options).ok()
            })
            .collect();

        let mut styles: StyleMap = declared(&parsed, path)
            .into_iter()
            .map(|(property, candidate)| (property, candidate.value))
            .collect();
        for depth in (1..path.len()).rev() {
            for (property, candidate) in declared(&parsed, &path[..depth]) {
                if INHERITED.contains(&property.as_str()) {
                    styles.entry(property).or_insert(candidate.value);
                }
            }
        }
        styles
    }
}

fn declared(sheets: &[LightningSheet<'_>], path: &[&DomNode]) -> BTreeMap<String, Candidate> {
    let mut winners = BTreeMap::new();
    let mut order = 0usize;
    for sheet in sheets {
        collect_declared(&sheet.rules.0, path, &mut order, &mut winners);
    }

    let inline = path.last().and_then(|element| element.attributes.get("style"));
    if let Some(inline) = inline {
        if let Ok(attribute) = StyleAttribute::parse(inline, ParserOptions::default()) {
            for declaration in block_declarations(&attribute.declarations).unwrap_or_default() {
                order += 1;
                offer(
                    &mut winners,
                    declaration.property,
                    Candidate {
                        important: declaration.important,
                        specificity: u32::MAX,
                        order,
                        value: declaration.value,
                    },
                );
            }
        }
    }
    winners
}

fn collect_declared(
    rules: &[CssRule<'_>],
    path: &[&DomNode],
    order: &mut usize,
    winners: &mut BTreeMap<String, Candidate>,
) {
    for rule in rules {
        match rule {
            CssRule::Style(style) => {
                let specificity = style
                    .selectors
                    .0
                    .iter()
                    .filter(|selector| matches(selector, path))
                    .map(|selector| selector.specificity())
                    .max();
                let Some(specificity) = specificity else {
                    continue;
                };
                let declarations = match block_declarations(&style.declarations) {
                    Ok(declarations) => declarations,
                    Err(e) => {
                        tracing::debug!("Skipping unprintable declarations: {}", e);
                        continue;
                    }
                };
                for declaration in declarations {
                    *order += 1;
                    offer(
                        winners,
                        declaration.property,
                        Candidate {
                            important: declaration.important,
                            specificity,
                            order: *order,
                            value: declaration.value,
                        },
                    );
                }
            }
            CssRule::Supports(supports) => collect_declared(&supports.rules.0, path, order, winners),
            CssRule::LayerBlock(layer) => collect_declared(&layer.rules.0, path, order, winners),
            _ => {}
        }
    }
}

fn offer(winners: &mut BTreeMap<String, Candidate>, property: String, candidate: Candidate) {
    match winners.get(&property) {
        Some(existing) if existing.rank() > candidate.rank() => {}
        _ => {
            winners.insert(property, candidate);
        }
    }
}
