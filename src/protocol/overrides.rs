//! Live style override grouping.
//!
//! An edit session collects property edits per `(variant, size)` combination,
//! optionally narrowed to a sub-element. The session turns them into
//! [`OverrideGroup`]s addressed by a guessed selector; the sandbox rewrites
//! that guess onto the real root selector once it is known.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::utils::css_property_name;
use crate::PreviewError;

/// One selector's worth of override declarations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OverrideGroup {
    pub selector: String,
    #[serde(default)]
    pub is_main_element: bool,
    /// CSS property → value.
    #[serde(alias = "overrides")]
    pub properties: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OverrideKey {
    pub variant: String,
    pub size: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_selector: Option<String>,
}

impl OverrideKey {
    pub fn new(variant: impl Into<String>, size: impl Into<String>) -> Self {
        Self {
            variant: variant.into(),
            size: size.into(),
            sub_selector: None,
        }
    }

    pub fn with_sub_selector(mut self, sub_selector: impl Into<String>) -> Self {
        self.sub_selector = Some(sub_selector.into());
        self
    }
}

impl fmt::Display for OverrideKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.variant, self.size)?;
        if let Some(ref sub) = self.sub_selector {
            write!(f, "::{}", sub)?;
        }
        Ok(())
    }
}

/// Override edits for one component, grouped by [`OverrideKey`].
#[derive(Debug, Clone, Default)]
pub struct OverrideSession {
    /// Best guess at the main element's selector before the sandbox reports
    /// the real one, e.g. `.Button_root`.
    main_selector: String,
    groups: BTreeMap<OverrideKey, BTreeMap<String, String>>,
}

impl OverrideSession {
    pub fn new(main_selector: impl Into<String>) -> Self {
        Self {
            main_selector: main_selector.into(),
            groups: BTreeMap::new(),
        }
    }

    pub fn main_selector(&self) -> &str {
        &self.main_selector
    }

    /// Set one property. An empty value removes it.
    pub fn set(
        &mut self,
        key: &OverrideKey,
        property: &str,
        value: &str,
    ) -> Result<(), PreviewError> {
        let property = property.trim();
        if property.is_empty() {
            return Err(PreviewError::Validation(format!(
                "empty property name in override for {}",
                key
            )));
        }
        let property = css_property_name(property);
        let value = value.trim();
        if value.is_empty() {
            self.remove(key, &property);
            return Ok(());
        }
        self.groups
            .entry(key.clone())
            .or_default()
            .insert(property, value.to_string());
        Ok(())
    }

    /// Apply a diff from the change log: `None` removes a property.
    pub fn apply_diff(
        &mut self,
        key: &OverrideKey,
        diff: &BTreeMap<String, Option<String>>,
    ) -> Result<(), PreviewError> {
        for (property, value) in diff {
            self.set(key, property, value.as_deref().unwrap_or(""))?;
        }
        Ok(())
    }

    pub fn remove(&mut self, key: &OverrideKey, property: &str) -> Option<String> {
        let property = css_property_name(property.trim());
        let group = self.groups.get_mut(key)?;
        let removed = group.remove(&property);
        if group.is_empty() {
            self.groups.remove(key);
        }
        removed
    }

    pub fn clear_key(&mut self, key: &OverrideKey) {
        self.groups.remove(key);
    }

    pub fn clear(&mut self) {
        self.groups.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Groups for one `(variant, size)` combination: the main element first,
    /// then sub-elements in key order.
    pub fn groups_for(&self, variant: &str, size: &str) -> Vec<OverrideGroup> {
        self.groups
            .iter()
            .filter(|(key, props)| key.variant == variant && key.size == size && !props.is_empty())
            .map(|(key, props)| match key.sub_selector {
                None => OverrideGroup {
                    selector: self.main_selector.clone(),
                    is_main_element: true,
                    properties: props.clone(),
                },
                Some(ref sub) => OverrideGroup {
                    selector: format!("{} {}", self.main_selector, sub.trim()),
                    is_main_element: false,
                    properties: props.clone(),
                },
            })
            .collect()
    }
}

/// Point `groups` at the real root selector. Main-element groups take it
/// verbatim; groups built on the guessed main selector get that prefix
/// replaced. Everything else is left alone.
pub fn rewrite_groups(groups: &[OverrideGroup], resolved_root: &str) -> Vec<OverrideGroup> {
    let guess = groups
        .iter()
        .find(|g| g.is_main_element)
        .map(|g| g.selector.trim().to_string());

    groups
        .iter()
        .map(|group| {
            let selector = if group.is_main_element {
                resolved_root.to_string()
            } else {
                match guess {
                    Some(ref guess) if !guess.is_empty() => {
                        match group.selector.trim().strip_prefix(guess.as_str()) {
                            Some(rest) if rest.is_empty() || rest.starts_with([' ', '>', '+', '~', ':', '.', '[']) => {
                                format!("{}{}", resolved_root, rest)
                            }
                            _ => group.selector.clone(),
                        }
                    }
                    _ => group.selector.clone(),
                }
            };
            OverrideGroup {
                selector,
                ..group.clone()
            }
        })
        .collect()
}
