//! Stylesheet rule tree.
//!
//! Incoming component stylesheets are parsed by lightningcss (with error
//! recovery) and its rule tree is converted into a small explicit tree.
//! Pseudo-state forcing and live overrides are pure functions over that
//! tree; nothing here touches a document.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use lightningcss::declaration::DeclarationBlock;
use lightningcss::rules::style::StyleRule as LightningStyleRule;
use lightningcss::rules::CssRule;
use lightningcss::stylesheet::{
    ParserOptions, PrinterOptions, StyleSheet as LightningSheet,
};
use lightningcss::traits::ToCss;
use serde::{Deserialize, Serialize};

use crate::protocol::OverrideGroup;
use crate::utils::css_property_name;
use crate::PreviewError;

// ---------------------------------------------------------------------------
// Tree
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StyleSheet {
    pub rules: Vec<Rule>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rule {
    Style(StyleRule),
    /// `@media`, `@supports` and friends.
    Group(GroupRule),
    /// Anything kept verbatim (`@keyframes`, `@font-face`, `@import`, ...).
    Other(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StyleRule {
    pub selectors: Vec<String>,
    pub declarations: Vec<Declaration>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupRule {
    /// Full prelude including the at-keyword, e.g. `@media (min-width: 640px)`.
    pub prelude: String,
    pub rules: Vec<Rule>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Declaration {
    pub property: String,
    pub value: String,
    pub important: bool,
}

impl StyleSheet {
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Every selector of every style rule, in document order.
    pub fn selectors(&self) -> Vec<&str> {
        fn walk<'a>(rules: &'a [Rule], out: &mut Vec<&'a str>) {
            for rule in rules {
                match rule {
                    Rule::Style(style) => out.extend(style.selectors.iter().map(String::as_str)),
                    Rule::Group(group) => walk(&group.rules, out),
                    Rule::Other(_) => {}
                }
            }
        }
        let mut out = Vec::new();
        walk(&self.rules, &mut out);
        out
    }

    pub fn to_css(&self) -> String {
        let mut out = String::new();
        write_rules(&self.rules, 0, &mut out);
        out
    }
}

impl fmt::Display for StyleSheet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_css())
    }
}

fn write_rules(rules: &[Rule], indent: usize, out: &mut String) {
    let pad = "  ".repeat(indent);
    for rule in rules {
        match rule {
            Rule::Style(style) => {
                out.push_str(&pad);
                out.push_str(&style.selectors.join(", "));
                out.push_str(" {\n");
                for decl in &style.declarations {
                    out.push_str(&pad);
                    out.push_str("  ");
                    out.push_str(&decl.property);
                    out.push_str(": ");
                    out.push_str(&decl.value);
                    if decl.important {
                        out.push_str(" !important");
                    }
                    out.push_str(";\n");
                }
                out.push_str(&pad);
                out.push_str("}\n");
            }
            Rule::Group(group) => {
                out.push_str(&pad);
                out.push_str(&group.prelude);
                out.push_str(" {\n");
                write_rules(&group.rules, indent + 1, out);
                out.push_str(&pad);
                out.push_str("}\n");
            }
            Rule::Other(text) => {
                out.push_str(&pad);
                out.push_str(text.trim());
                out.push('\n');
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// Parse a stylesheet into the rule tree. lightningcss drops invalid rules
/// and declarations the way a browser would; nested rules are flattened.
pub fn parse(css: &str) -> Result<StyleSheet, PreviewError> {
    let sheet = LightningSheet::parse(
        css,
        ParserOptions {
            error_recovery: true,
            ..ParserOptions::default()
        },
    )
    .map_err(|e| PreviewError::Css(e.to_string()))?;
    let rules = convert_rules(&sheet.rules.0, &[])?;
    Ok(StyleSheet { rules })
}

fn print<T: ToCss>(value: &T) -> Result<String, PreviewError> {
    value
        .to_css_string(PrinterOptions::default())
        .map_err(|e| PreviewError::Css(e.to_string()))
}

/// Convert a lightningcss rule list. `parents` are the enclosing style
/// rule's selectors when converting a nested block.
fn convert_rules(rules: &[CssRule<'_>], parents: &[String]) -> Result<Vec<Rule>, PreviewError> {
    let mut out = Vec::new();
    for rule in rules {
        match rule {
            CssRule::Style(style) => out.extend(convert_style(style, parents)?),
            CssRule::Nesting(nesting) => out.extend(convert_style(&nesting.style, parents)?),
            CssRule::Media(media) => out.push(convert_group(rule, &media.rules.0, parents)?),
            CssRule::Supports(supports) => {
                out.push(convert_group(rule, &supports.rules.0, parents)?)
            }
            CssRule::Container(container) => {
                out.push(convert_group(rule, &container.rules.0, parents)?)
            }
            CssRule::LayerBlock(layer) => out.push(convert_group(rule, &layer.rules.0, parents)?),
            CssRule::Ignored => {}
            other => {
                let text = print(other)?;
                if !text.trim().is_empty() {
                    out.push(Rule::Other(text));
                }
            }
        }
    }
    Ok(out)
}

fn convert_style(style: &LightningStyleRule<'_>, parents: &[String]) -> Result<Vec<Rule>, PreviewError> {
    let own = split_selectors(&print(&style.selectors)?);
    let selectors = if parents.is_empty() {
        own
    } else {
        nest_selectors(parents, &own)
    };
    if selectors.is_empty() {
        return Ok(Vec::new());
    }

    let declarations = block_declarations(&style.declarations)?;

    // Empty rules are kept so their selectors survive for root detection.
    let mut rules = vec![Rule::Style(StyleRule {
        selectors: selectors.clone(),
        declarations,
    })];
    rules.extend(convert_rules(&style.rules.0, &selectors)?);
    Ok(rules)
}

/// Declarations of a lightningcss block, normal ones first.
pub fn block_declarations(block: &DeclarationBlock<'_>) -> Result<Vec<Declaration>, PreviewError> {
    let mut declarations = Vec::new();
    for (properties, important) in [
        (&block.declarations, false),
        (&block.important_declarations, true),
    ] {
        for property in properties {
            let value = property
                .value_to_css_string(PrinterOptions::default())
                .map_err(|e| PreviewError::Css(e.to_string()))?;
            declarations.push(Declaration {
                property: property.property_id().name().to_string(),
                value,
                important,
            });
        }
    }
    Ok(declarations)
}

/// The prelude is the printed rule up to its block.
fn convert_group(
    rule: &CssRule<'_>,
    children: &[CssRule<'_>],
    parents: &[String],
) -> Result<Rule, PreviewError> {
    let printed = print(rule)?;
    let prelude = printed
        .split_once('{')
        .map_or(printed.as_str(), |(prelude, _)| prelude)
        .trim()
        .to_string();
    Ok(Rule::Group(GroupRule {
        prelude,
        rules: convert_rules(children, parents)?,
    }))
}

fn split_important(value: &str) -> (&str, bool) {
    if let Some(idx) = value.rfind('!') {
        let flag = value[idx + 1..].trim();
        if flag.eq_ignore_ascii_case("important") {
            return (value[..idx].trim_end(), true);
        }
    }
    (value, false)
}

/// Split a selector list on top-level commas.
pub fn split_selectors(prelude: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut depth = 0i32;
    let mut current = String::new();
    for c in prelude.chars() {
        match c {
            '(' | '[' => depth += 1,
            ')' | ']' => depth -= 1,
            ',' if depth == 0 => {
                let trimmed = current.trim();
                if !trimmed.is_empty() {
                    out.push(trimmed.to_string());
                }
                current.clear();
                continue;
            }
            _ => {}
        }
        current.push(c);
    }
    let trimmed = current.trim();
    if !trimmed.is_empty() {
        out.push(trimmed.to_string());
    }
    out
}

fn nest_selectors(parents: &[String], own: &[String]) -> Vec<String> {
    let mut out = Vec::new();
    for parent in parents {
        for child in own {
            if child.contains('&') {
                out.push(child.replace('&', parent));
            } else {
                out.push(format!("{} {}", parent, child));
            }
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Pseudo-state forcing
// ---------------------------------------------------------------------------

/// Interaction state simulated without real user input.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PseudoState {
    #[default]
    Default,
    Hover,
    Focus,
    Active,
    Disabled,
}

impl PseudoState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PseudoState::Default => "default",
            PseudoState::Hover => "hover",
            PseudoState::Focus => "focus",
            PseudoState::Active => "active",
            PseudoState::Disabled => "disabled",
        }
    }

    /// Selector conditions that represent this state. Longer tokens first.
    pub fn conditions(&self) -> &'static [&'static str] {
        match self {
            PseudoState::Default => &[],
            PseudoState::Hover => &[":hover"],
            PseudoState::Focus => &[":focus-visible", ":focus-within", ":focus"],
            PseudoState::Active => &[":active"],
            PseudoState::Disabled => &[":disabled", "[disabled]"],
        }
    }
}

impl fmt::Display for PseudoState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PseudoState {
    type Err = PreviewError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "default" | "" | "none" => Ok(PseudoState::Default),
            "hover" => Ok(PseudoState::Hover),
            "focus" | "focus-visible" => Ok(PseudoState::Focus),
            "active" | "pressed" => Ok(PseudoState::Active),
            "disabled" => Ok(PseudoState::Disabled),
            other => Err(PreviewError::Validation(format!(
                "unknown pseudo-state '{}'",
                other
            ))),
        }
    }
}

/// Synthesize the rules that make `state` look active without interaction.
///
/// Every style rule with a selector carrying one of the state's conditions is
/// copied with the condition removed and every declaration marked important.
/// Rules without the condition are left out: the result is layered on top of
/// the component stylesheet, never in place of it. `Default` yields an empty
/// sheet.
pub fn force_state(sheet: &StyleSheet, state: PseudoState) -> StyleSheet {
    StyleSheet {
        rules: force_rules(&sheet.rules, state.conditions()),
    }
}

fn force_rules(rules: &[Rule], conditions: &[&str]) -> Vec<Rule> {
    if conditions.is_empty() {
        return Vec::new();
    }
    let mut out = Vec::new();
    for rule in rules {
        match rule {
            Rule::Style(style) => {
                if style.declarations.is_empty() {
                    continue;
                }
                let selectors: Vec<String> = style
                    .selectors
                    .iter()
                    .filter_map(|sel| strip_conditions(sel, conditions))
                    .collect();
                if selectors.is_empty() {
                    continue;
                }
                out.push(Rule::Style(StyleRule {
                    selectors,
                    declarations: style
                        .declarations
                        .iter()
                        .map(|d| Declaration {
                            important: true,
                            ..d.clone()
                        })
                        .collect(),
                }));
            }
            Rule::Group(group) => {
                let nested = force_rules(&group.rules, conditions);
                if !nested.is_empty() {
                    out.push(Rule::Group(GroupRule {
                        prelude: group.prelude.clone(),
                        rules: nested,
                    }));
                }
            }
            Rule::Other(_) => {}
        }
    }
    out
}

/// Remove every occurrence of `conditions` outside `:not(...)`. `None` when
/// the selector carries none of them.
pub fn strip_conditions(selector: &str, conditions: &[&str]) -> Option<String> {
    let bytes = selector.as_bytes();
    let mut out = String::with_capacity(selector.len());
    let mut found = false;
    let mut not_depth: Option<usize> = None;
    let mut parens = 0usize;
    let mut i = 0;

    'scan: while i < selector.len() {
        let rest = &selector[i..];

        if rest.starts_with(":not(") {
            if not_depth.is_none() {
                not_depth = Some(parens);
            }
            parens += 1;
            out.push_str(":not(");
            i += 5;
            continue;
        }

        match bytes[i] {
            b'(' => parens += 1,
            b')' => {
                parens = parens.saturating_sub(1);
                if not_depth == Some(parens) {
                    not_depth = None;
                }
            }
            _ => {}
        }

        if not_depth.is_none() {
            for condition in conditions {
                if rest.starts_with(condition) {
                    let after = rest.as_bytes().get(condition.len()).copied();
                    let boundary = !matches!(after, Some(c) if c.is_ascii_alphanumeric() || c == b'-' || c == b'_');
                    if boundary {
                        found = true;
                        i += condition.len();
                        continue 'scan;
                    }
                }
            }
        }

        let ch = rest.chars().next().unwrap_or_default();
        out.push(ch);
        i += ch.len_utf8();
    }

    if !found {
        return None;
    }
    let cleaned = fill_empty_compounds(&out);
    if cleaned.is_empty() {
        None
    } else {
        Some(cleaned)
    }
}

/// `.a > ` → `.a > *`; collapses whitespace left by removed conditions.
fn fill_empty_compounds(selector: &str) -> String {
    let mut collapsed = selector.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.is_empty() {
        return "*".to_string();
    }
    if collapsed.ends_with(['>', '+', '~']) {
        collapsed.push_str(" *");
    }
    if collapsed.starts_with(['>', '+', '~']) {
        collapsed.insert_str(0, "* ");
    }
    collapsed
}

// ---------------------------------------------------------------------------
// Overrides
// ---------------------------------------------------------------------------

/// Build the live-override stylesheet: one rule per group, every property
/// converted to its CSS name and marked important.
pub fn override_stylesheet(groups: &[OverrideGroup]) -> StyleSheet {
    let rules = groups
        .iter()
        .filter(|g| !g.selector.trim().is_empty() && !g.properties.is_empty())
        .map(|g| Rule::Style(StyleRule {
            selectors: vec![g.selector.trim().to_string()],
            declarations: override_declarations(&g.properties),
        }))
        .collect();
    StyleSheet { rules }
}

fn override_declarations(properties: &BTreeMap<String, String>) -> Vec<Declaration> {
    properties
        .iter()
        .filter(|(_, value)| !value.trim().is_empty())
        .map(|(property, value)| {
            let (value, _) = split_important(value.trim());
            Declaration {
                property: css_property_name(property),
                value: value.to_string(),
                important: true,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn parses_rules_groups_and_at_statements() {
        let sheet = parse(
            "@import url(x.css);\n.btn { color: red; cursor: pointer !important }\n@media (min-width: 640px) { .btn { display: block } }\n@keyframes spin { to { opacity: 0 } }",
        )
        .unwrap();
        assert_eq!(sheet.rules.len(), 4);
        assert!(matches!(&sheet.rules[0], Rule::Other(t) if t.starts_with("@import")));
        match &sheet.rules[1] {
            Rule::Style(rule) => {
                assert_eq!(rule.selectors, vec![".btn"]);
                assert_eq!(rule.declarations.len(), 2);
                assert_eq!(rule.declarations[1].property, "cursor");
                assert!(rule.declarations[1].important);
                assert_eq!(rule.declarations[1].value, "pointer");
            }
            other => panic!("expected style rule, got {:?}", other),
        }
        match &sheet.rules[2] {
            Rule::Group(group) => {
                assert!(group.prelude.starts_with("@media"));
                assert!(!group.prelude.contains('{'));
                assert_eq!(group.rules.len(), 1);
            }
            other => panic!("expected group, got {:?}", other),
        }
        assert!(matches!(&sheet.rules[3], Rule::Other(t) if t.starts_with("@keyframes spin")));
    }

    #[test]
    fn flattens_nested_rules() {
        let sheet = parse(".card { display: block; &:hover { cursor: pointer } & .title { overflow: hidden } }").unwrap();
        assert_eq!(sheet.selectors(), vec![".card", ".card:hover", ".card .title"]);
    }

    #[test]
    fn keeps_layer_container_and_supports_groups() {
        let sheet = parse(
            "@layer base { .a { color: red } }\n@supports (display: grid) { .b { display: grid } }\n@container card (min-width: 400px) { .c { display: none } }",
        )
        .unwrap();
        let preludes: Vec<&str> = sheet
            .rules
            .iter()
            .filter_map(|rule| match rule {
                Rule::Group(group) => Some(group.prelude.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(preludes.len(), 3);
        assert_eq!(preludes[0], "@layer base");
        assert!(preludes[1].starts_with("@supports"));
        assert!(preludes[2].starts_with("@container card"));
        assert_eq!(sheet.selectors(), vec![".a", ".b", ".c"]);
    }

    #[test]
    fn nested_media_wraps_parent_selector() {
        let sheet = parse(".card { color: red; @media (hover: hover) { &:hover { color: blue } } }").unwrap();
        assert_eq!(sheet.selectors(), vec![".card", ".card:hover"]);
        assert!(matches!(&sheet.rules[1], Rule::Group(g) if g.prelude == "@media (hover: hover)"));
    }

    #[test]
    fn keeps_empty_rules_for_their_selectors() {
        let sheet = parse(".root {}\n.root > .icon { color: red }").unwrap();
        assert_eq!(sheet.selectors(), vec![".root", ".root > .icon"]);
    }

    #[test]
    fn force_hover_strips_condition_and_marks_important() {
        let sheet = parse(".btn { cursor: default }\n.btn:hover { cursor: pointer }").unwrap();
        let forced = force_state(&sheet, PseudoState::Hover);
        assert_eq!(forced.to_css(), ".btn {\n  cursor: pointer !important;\n}\n");
    }

    #[test]
    fn force_focus_prefers_longest_token() {
        assert_eq!(
            strip_conditions(".input:focus-visible", PseudoState::Focus.conditions()),
            Some(".input".into())
        );
        assert_eq!(
            strip_conditions(".input:focus", PseudoState::Focus.conditions()),
            Some(".input".into())
        );
    }

    #[test]
    fn conditions_inside_not_are_ignored() {
        assert_eq!(
            strip_conditions(".btn:not(:hover)", PseudoState::Hover.conditions()),
            None
        );
        assert_eq!(
            strip_conditions(".btn:hover:not(:disabled)", PseudoState::Hover.conditions()),
            Some(".btn:not(:disabled)".into())
        );
    }

    #[test]
    fn disabled_matches_attribute_form() {
        assert_eq!(
            strip_conditions(".btn[disabled]", PseudoState::Disabled.conditions()),
            Some(".btn".into())
        );
        assert_eq!(strip_conditions(".list > :hover", &[":hover"]), Some(".list > *".into()));
    }

    #[test]
    fn forcing_keeps_groups() {
        let sheet = parse("@media (hover: hover) { .a:hover { visibility: hidden } .b { display: none } }").unwrap();
        let forced = force_state(&sheet, PseudoState::Hover);
        assert_eq!(
            forced.to_css(),
            "@media (hover: hover) {\n  .a {\n    visibility: hidden !important;\n  }\n}\n"
        );
    }

    #[test]
    fn default_state_is_empty() {
        let sheet = parse(".a:hover { display: none }").unwrap();
        assert!(force_state(&sheet, PseudoState::Default).is_empty());
    }

    #[test]
    fn forcing_is_idempotent() {
        let sheet = parse(".a:active { display: none }").unwrap();
        let once = force_state(&sheet, PseudoState::Active);
        let twice = force_state(&sheet, PseudoState::Active);
        assert_eq!(once, twice);
    }

    #[test]
    fn parses_state_names() {
        assert_eq!("Hover".parse::<PseudoState>().unwrap(), PseudoState::Hover);
        assert_eq!("focus-visible".parse::<PseudoState>().unwrap(), PseudoState::Focus);
        assert!("wiggle".parse::<PseudoState>().is_err());
    }

    #[test]
    fn override_sheet_uses_css_property_names() {
        let groups = vec![OverrideGroup {
            selector: ".btn".into(),
            is_main_element: true,
            properties: [
                ("backgroundColor".to_string(), "red".to_string()),
                ("padding".to_string(), "4px !important".to_string()),
            ]
            .into(),
        }];
        assert_eq!(
            override_stylesheet(&groups).to_css(),
            ".btn {\n  background-color: red !important;\n  padding: 4px !important;\n}\n"
        );
    }
}
