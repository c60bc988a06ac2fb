//! The execution realm the sandbox drives.
//!
//! A realm owns the actual script engine and document. The sandbox decides
//! what happens and when; the realm only evaluates, renders, and reports
//! what is on screen.

use std::collections::BTreeMap;

use thiserror::Error;

use super::scope::{ComponentRef, GlobalScope};
use crate::protocol::{ElementInfo, PreviewLayout, Props, StyleMap, ThemeSettings};

#[derive(Debug, Error)]
pub enum RealmError {
    #[error("Evaluation failed: {0}")]
    Evaluation(String),

    #[error("Render failed: {0}")]
    Render(String),
}

/// What to render into the preview root.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderRequest {
    pub component: ComponentRef,
    /// Merged props with null sentinels removed.
    pub props: Props,
    pub wrapper: Option<ComponentRef>,
    /// Composite render function used instead of rendering `component`
    /// directly.
    pub composite: Option<ComponentRef>,
    pub element_props: Option<BTreeMap<String, Props>>,
}

/// Document-level state the sandbox maintains. Realms mirror it into their
/// document on every [`Realm::sync_document`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DocumentState {
    pub component_css: String,
    pub theme_css: Option<String>,
    pub theme: Option<ThemeSettings>,
    /// Synthesized forced-state rules, layered above `component_css`.
    pub forced_state_css: Option<String>,
    /// Live override rules, layered above everything else.
    pub override_css: Option<String>,
    pub animations_disabled: bool,
    pub layout: PreviewLayout,
    pub inspector_enabled: bool,
    /// Selector of the highlighted sub-element in interactive mode.
    pub highlighted: Option<String>,
    pub portal_root_id: String,
}

impl DocumentState {
    /// Stylesheets in cascade order, lowest first.
    pub fn stylesheets(&self) -> Vec<&str> {
        let mut sheets = Vec::new();
        if let Some(ref theme) = self.theme_css {
            sheets.push(theme.as_str());
        }
        sheets.push(self.component_css.as_str());
        if let Some(ref forced) = self.forced_state_css {
            sheets.push(forced.as_str());
        }
        if let Some(ref overrides) = self.override_css {
            sheets.push(overrides.as_str());
        }
        sheets
    }
}

pub trait Realm {
    /// Evaluate a bundle. Every top-level name it declares must be recorded
    /// in `scope` (which already has the new generation open).
    fn evaluate(&mut self, code: &str, scope: &mut GlobalScope) -> Result<(), RealmError>;

    /// Remove globals a dropped generation declared. Realms whose globals
    /// live only in `scope` have nothing to do.
    fn release_globals(&mut self, _names: &[String]) {}

    fn render(&mut self, request: &RenderRequest) -> Result<(), RealmError>;

    fn unmount(&mut self);

    /// Replace the render root with an error panel.
    fn show_diagnostic(&mut self, title: &str, detail: &str);

    /// The rendered component's root element, once it exists.
    fn root_element(&self) -> Option<ElementInfo>;

    fn describe_element(&self, selector: &str) -> Option<ElementInfo>;

    fn computed_styles(&self, selector: &str) -> Option<StyleMap>;

    fn sync_document(&mut self, document: &DocumentState);
}
