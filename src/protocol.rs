//! Host ⇄ sandbox message protocol.
//!
//! Two closed tagged unions travel as JSON objects discriminated by `type`:
//! [`HostMessage`] (host → sandbox) and [`SandboxEvent`] (sandbox → host).
//! Messages are stateless and one-shot. In property maps, JSON `null` is the
//! removal sentinel.

pub mod css_cache;
pub mod host;
pub mod overrides;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::css::PseudoState;
use crate::PreviewError;

pub use css_cache::StylesheetCache;
pub use host::{Dispatch, DropReason, HostController, LoadRequest, LoadTicket};
pub use overrides::{OverrideGroup, OverrideKey, OverrideSession};

/// Property map as sent over the wire. `null` removes a key.
pub type Props = BTreeMap<String, Value>;

/// Computed style values keyed by CSS property name.
pub type StyleMap = BTreeMap<String, String>;

// ---------------------------------------------------------------------------
// Shared payload types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentType {
    #[default]
    Single,
    /// Rendered through the bundle's composite wrapper function.
    Composite,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PreviewLayout {
    #[default]
    Centered,
    Padded,
    Fullscreen,
}

/// How theme values reach the document.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThemeStrategy {
    /// Toggle a class named after the theme.
    #[default]
    Class,
    /// Set `attribute="<theme>"`.
    Attribute,
    /// Write `values` as custom properties.
    Variables,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThemeTarget {
    #[default]
    Root,
    Body,
    Container,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ThemeSettings {
    pub theme: String,
    pub values: BTreeMap<String, String>,
    pub strategy: ThemeStrategy,
    pub attribute: Option<String>,
    pub apply_to: ThemeTarget,
}

/// A named, selectable part of the rendered component.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubElement {
    pub name: String,
    /// Selector relative to the component root.
    pub selector: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

/// Description of a rendered element.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ElementInfo {
    pub tag_name: String,
    /// Selector that uniquely targets this element.
    pub selector: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub class_names: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

// ---------------------------------------------------------------------------
// Host → sandbox
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LoadComponent {
    pub code: String,
    pub css: Option<String>,
    pub props: Props,
    pub default_props: Props,
    pub component_name: String,
    /// Global name of a wrapper/provider component rendered around the root.
    pub wrapper: Option<String>,
    pub component_type: ComponentType,
    pub disable_animations: bool,
    /// Props for named sub-elements of composite components.
    pub element_props: Option<BTreeMap<String, Props>>,
    /// Monotonic load generation, echoed by the result events.
    pub generation: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HostMessage {
    LoadComponent(LoadComponent),
    UpdateProps {
        props: Props,
    },
    #[serde(rename_all = "camelCase")]
    ApplyStyleOverrides {
        #[serde(default)]
        override_groups: Vec<OverrideGroup>,
        /// Legacy single-selector form.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        selector: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        overrides: Option<BTreeMap<String, String>>,
    },
    UpdateCss {
        css: String,
    },
    UpdateThemeCss {
        #[serde(rename = "themeCSS")]
        theme_css: String,
    },
    SetTheme(ThemeSettings),
    ForceState {
        state: PseudoState,
        #[serde(rename = "componentCSS", default, skip_serializing_if = "Option::is_none")]
        component_css: Option<String>,
    },
    RequestStyles,
    #[serde(rename_all = "camelCase")]
    RequestSubStyles {
        sub_selector: String,
    },
    SetLayout {
        layout: PreviewLayout,
    },
    EnableInspector,
    DisableInspector,
    #[serde(rename_all = "camelCase")]
    UpdateInteractiveState {
        #[serde(default)]
        sub_elements: Vec<SubElement>,
        #[serde(default)]
        selected_sub_element: Option<String>,
        #[serde(default)]
        enabled: bool,
    },
}

impl HostMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            HostMessage::LoadComponent(_) => "LOAD_COMPONENT",
            HostMessage::UpdateProps { .. } => "UPDATE_PROPS",
            HostMessage::ApplyStyleOverrides { .. } => "APPLY_STYLE_OVERRIDES",
            HostMessage::UpdateCss { .. } => "UPDATE_CSS",
            HostMessage::UpdateThemeCss { .. } => "UPDATE_THEME_CSS",
            HostMessage::SetTheme(_) => "SET_THEME",
            HostMessage::ForceState { .. } => "FORCE_STATE",
            HostMessage::RequestStyles => "REQUEST_STYLES",
            HostMessage::RequestSubStyles { .. } => "REQUEST_SUB_STYLES",
            HostMessage::SetLayout { .. } => "SET_LAYOUT",
            HostMessage::EnableInspector => "ENABLE_INSPECTOR",
            HostMessage::DisableInspector => "DISABLE_INSPECTOR",
            HostMessage::UpdateInteractiveState { .. } => "UPDATE_INTERACTIVE_STATE",
        }
    }

    pub fn to_json(&self) -> Result<String, PreviewError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(text: &str) -> Result<Self, PreviewError> {
        Ok(serde_json::from_str(text)?)
    }
}

/// Normalize both override message shapes into groups. The legacy
/// `selector` + `overrides` form becomes a single main-element group.
pub fn normalize_override_groups(
    override_groups: Vec<OverrideGroup>,
    selector: Option<String>,
    overrides: Option<BTreeMap<String, String>>,
) -> Vec<OverrideGroup> {
    if !override_groups.is_empty() {
        return override_groups;
    }
    match (selector, overrides) {
        (Some(selector), Some(properties)) => vec![OverrideGroup {
            selector,
            is_main_element: true,
            properties,
        }],
        _ => Vec::new(),
    }
}

// ---------------------------------------------------------------------------
// Sandbox → host
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SandboxEvent {
    SandboxReady,
    RenderSuccess {
        generation: u64,
    },
    RenderError {
        error: String,
        generation: u64,
    },
    LoadError {
        error: String,
        generation: u64,
    },
    #[serde(rename_all = "camelCase")]
    ComputedStyles {
        styles: StyleMap,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sub_selector: Option<String>,
    },
    ComponentRootSelector {
        selector: String,
    },
    #[serde(rename_all = "camelCase")]
    InspectorSelect {
        styles: StyleMap,
        element_info: ElementInfo,
    },
    #[serde(rename_all = "camelCase")]
    InteractiveSelect {
        sub_element: SubElement,
    },
}

impl SandboxEvent {
    /// Load generation carried by result events.
    pub fn generation(&self) -> Option<u64> {
        match self {
            SandboxEvent::RenderSuccess { generation }
            | SandboxEvent::RenderError { generation, .. }
            | SandboxEvent::LoadError { generation, .. } => Some(*generation),
            _ => None,
        }
    }

    pub fn to_json(&self) -> Result<String, PreviewError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(text: &str) -> Result<Self, PreviewError> {
        Ok(serde_json::from_str(text)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn load_component_wire_shape() {
        let msg = HostMessage::LoadComponent(LoadComponent {
            code: "x".into(),
            component_name: "Button".into(),
            component_type: ComponentType::Composite,
            generation: 7,
            ..Default::default()
        });
        let value: Value = serde_json::from_str(&msg.to_json().unwrap()).unwrap();
        assert_eq!(value["type"], "LOAD_COMPONENT");
        assert_eq!(value["componentName"], "Button");
        assert_eq!(value["componentType"], "composite");
        assert_eq!(value["disableAnimations"], false);
        assert_eq!(value["generation"], 7);
    }

    #[test]
    fn decodes_host_messages_from_json() {
        let msg = HostMessage::from_json(
            r#"{"type":"FORCE_STATE","state":"hover","componentCSS":".a:hover{color:red}"}"#,
        )
        .unwrap();
        assert_eq!(
            msg,
            HostMessage::ForceState {
                state: PseudoState::Hover,
                component_css: Some(".a:hover{color:red}".into()),
            }
        );

        let msg = HostMessage::from_json(r#"{"type":"UPDATE_THEME_CSS","themeCSS":":root{}"}"#).unwrap();
        assert_eq!(msg.kind(), "UPDATE_THEME_CSS");

        let msg = HostMessage::from_json(r#"{"type":"REQUEST_STYLES"}"#).unwrap();
        assert_eq!(msg, HostMessage::RequestStyles);
    }

    #[test]
    fn update_props_keeps_null_sentinel() {
        let msg = HostMessage::from_json(r#"{"type":"UPDATE_PROPS","props":{"label":null,"size":"sm"}}"#)
            .unwrap();
        match msg {
            HostMessage::UpdateProps { props } => {
                assert_eq!(props.get("label"), Some(&Value::Null));
                assert_eq!(props.get("size"), Some(&json!("sm")));
            }
            other => panic!("unexpected message {:?}", other),
        }
    }

    #[test]
    fn legacy_override_shape_becomes_main_group() {
        let msg = HostMessage::from_json(
            r#"{"type":"APPLY_STYLE_OVERRIDES","selector":".btn","overrides":{"color":"red"}}"#,
        )
        .unwrap();
        let HostMessage::ApplyStyleOverrides { override_groups, selector, overrides } = msg else {
            panic!("wrong variant");
        };
        let groups = normalize_override_groups(override_groups, selector, overrides);
        assert_eq!(groups.len(), 1);
        assert!(groups[0].is_main_element);
        assert_eq!(groups[0].selector, ".btn");
    }

    #[test]
    fn sandbox_events_echo_generation() {
        let event = SandboxEvent::from_json(r#"{"type":"LOAD_ERROR","error":"boom","generation":3}"#).unwrap();
        assert_eq!(event.generation(), Some(3));
        let json = SandboxEvent::ComputedStyles {
            styles: StyleMap::new(),
            sub_selector: None,
        }
        .to_json()
        .unwrap();
        assert_eq!(json, r#"{"type":"COMPUTED_STYLES","styles":{}}"#);
    }
}
