//! Sandbox runtime.
//!
//! Receives [`HostMessage`]s, drives a [`Realm`], and answers with
//! [`SandboxEvent`]s. All state lives in one [`Sandbox`] value and is only
//! touched from its own loop, so there is exactly one writer for the global
//! scope at any time: the latest load.
//!
//! Phases: `Idle → Loading → Rendered → (Loading | Rendered | Error)`.

#[cfg(feature = "deno")]
pub mod deno;
pub mod dom;
pub mod realm;
pub mod scope;

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tokio::time::{sleep_until, Instant};

use crate::bundle::{PREVIEW_COMPONENT_SLOT, PREVIEW_RENDER_SLOT};
use crate::css::{self, force_state, override_stylesheet, PseudoState, StyleSheet};
use crate::protocol::overrides::rewrite_groups;
use crate::protocol::{
    normalize_override_groups, ComponentType, HostMessage, LoadComponent, OverrideGroup,
    Props, SandboxEvent, SubElement,
};
use crate::stubs::DEFAULT_PORTAL_ROOT_ID;

#[cfg(feature = "deno")]
pub use deno::{BundleSignal, DenoRealm};
pub use dom::{Cascade, DomNode};
pub use realm::{DocumentState, Realm, RealmError, RenderRequest};
pub use scope::{Binding, ComponentRef, GlobalScope};

/// How many callable names a binding-not-found error lists.
const NEARBY_NAME_LIMIT: usize = 10;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SandboxConfig {
    /// Attempts at finding the rendered root before giving up.
    pub extraction_retries: u32,
    /// Delay before attempt `n` is `n * extraction_base_delay_ms`.
    pub extraction_base_delay_ms: u64,
    pub portal_root_id: String,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            extraction_retries: 5,
            extraction_base_delay_ms: 50,
            portal_root_id: DEFAULT_PORTAL_ROOT_ID.to_string(),
        }
    }
}

impl SandboxConfig {
    fn extraction_delay(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.extraction_base_delay_ms * u64::from(attempt.max(1)))
    }
}

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Phase {
    #[default]
    Idle,
    Loading,
    Rendered,
    Error,
}

/// Per-load state, reset on every `LOAD_COMPONENT`.
#[derive(Debug, Clone, Default)]
pub struct SandboxState {
    pub generation: u64,
    pub component_name: String,
    pub component: Option<ComponentRef>,
    pub composite: Option<ComponentRef>,
    pub props: Props,
    pub wrapper_name: Option<String>,
    pub wrapper: Option<ComponentRef>,
    pub element_props: Option<BTreeMap<String, Props>>,
    pub forced_state: PseudoState,
    /// Names the current bundle declared in the global scope.
    pub declared_names: Vec<String>,
    pub root_selector: Option<String>,
    scope_generation: u64,
}

#[derive(Debug, Clone, Copy)]
struct Extraction {
    attempt: u32,
    due: Instant,
}

#[derive(Debug, Clone, Default)]
struct InteractiveState {
    enabled: bool,
    sub_elements: Vec<SubElement>,
    selected: Option<String>,
}

// ---------------------------------------------------------------------------
// Sandbox
// ---------------------------------------------------------------------------

pub struct Sandbox<R: Realm> {
    realm: R,
    scope: GlobalScope,
    config: SandboxConfig,
    phase: Phase,
    state: SandboxState,
    document: DocumentState,
    component_sheet: StyleSheet,
    /// Single slot: overrides received before the root selector resolved.
    pending_overrides: Option<Vec<OverrideGroup>>,
    extraction: Option<Extraction>,
    interactive: InteractiveState,
}

impl<R: Realm> Sandbox<R> {
    pub fn new(realm: R, scope: GlobalScope, config: SandboxConfig) -> Self {
        let document = DocumentState {
            portal_root_id: config.portal_root_id.clone(),
            ..DocumentState::default()
        };
        Self {
            realm,
            scope,
            config,
            phase: Phase::Idle,
            state: SandboxState::default(),
            document,
            component_sheet: StyleSheet::default(),
            pending_overrides: None,
            extraction: None,
            interactive: InteractiveState::default(),
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn state(&self) -> &SandboxState {
        &self.state
    }

    pub fn document(&self) -> &DocumentState {
        &self.document
    }

    pub fn scope(&self) -> &GlobalScope {
        &self.scope
    }

    pub fn realm(&self) -> &R {
        &self.realm
    }

    pub fn realm_mut(&mut self) -> &mut R {
        &mut self.realm
    }

    pub fn has_pending_overrides(&self) -> bool {
        self.pending_overrides.is_some()
    }

    /// When the next root/style extraction attempt is due.
    pub fn extraction_deadline(&self) -> Option<Instant> {
        self.extraction.map(|e| e.due)
    }

    /// Handle one host message.
    pub fn handle(&mut self, message: HostMessage) -> Vec<SandboxEvent> {
        tracing::trace!("Sandbox received {}", message.kind());
        match message {
            HostMessage::LoadComponent(load) => self.load(load),
            HostMessage::UpdateProps { props } => self.update_props(props),
            HostMessage::ApplyStyleOverrides {
                override_groups,
                selector,
                overrides,
            } => self.apply_overrides(normalize_override_groups(override_groups, selector, overrides)),
            HostMessage::UpdateCss { css } => self.update_stylesheet(css),
            HostMessage::UpdateThemeCss { theme_css } => {
                self.document.theme_css = Some(theme_css);
                self.sync_document();
                Vec::new()
            }
            HostMessage::SetTheme(settings) => {
                self.document.theme = Some(settings);
                self.sync_document();
                Vec::new()
            }
            HostMessage::ForceState {
                state,
                component_css,
            } => self.force_state(state, component_css),
            HostMessage::RequestStyles => self.root_styles().into_iter().collect(),
            HostMessage::RequestSubStyles { sub_selector } => {
                self.sub_styles(&sub_selector).into_iter().collect()
            }
            HostMessage::SetLayout { layout } => {
                self.document.layout = layout;
                self.sync_document();
                Vec::new()
            }
            HostMessage::EnableInspector => self.set_inspector(true),
            HostMessage::DisableInspector => self.set_inspector(false),
            HostMessage::UpdateInteractiveState {
                sub_elements,
                selected_sub_element,
                enabled,
            } => {
                self.document.highlighted = if enabled {
                    selected_sub_element
                        .as_deref()
                        .and_then(|name| sub_elements.iter().find(|s| s.name == name))
                        .map(|s| self.sub_element_selector(&s.selector))
                } else {
                    None
                };
                self.interactive = InteractiveState {
                    enabled,
                    sub_elements,
                    selected: selected_sub_element,
                };
                self.sync_document();
                Vec::new()
            }
        }
    }

    fn set_inspector(&mut self, enabled: bool) -> Vec<SandboxEvent> {
        self.document.inspector_enabled = enabled;
        self.sync_document();
        Vec::new()
    }

    // -- load ---------------------------------------------------------------

    fn load(&mut self, load: LoadComponent) -> Vec<SandboxEvent> {
        tracing::debug!(
            "Loading {} (generation {})",
            load.component_name,
            load.generation
        );

        self.realm.unmount();
        self.extraction = None;
        self.pending_overrides = None;
        self.document.forced_state_css = None;
        self.document.override_css = None;
        self.document.highlighted = None;

        let previous = self.state.scope_generation;
        let dropped = self.scope.drop_generation(previous);
        self.realm.release_globals(&dropped);
        tracing::trace!("Cleared {} globals from the previous load", dropped.len());
        let scope_generation = self.scope.begin_generation();

        self.state = SandboxState {
            generation: load.generation,
            component_name: load.component_name.clone(),
            wrapper_name: load.wrapper.clone(),
            element_props: load.element_props.clone(),
            scope_generation,
            ..SandboxState::default()
        };
        self.phase = Phase::Loading;

        self.document.component_css = load.css.clone().unwrap_or_default();
        self.document.animations_disabled = load.disable_animations;
        self.component_sheet = self.parse_component_sheet();
        self.sync_document();

        let generation = load.generation;
        if let Err(e) = self.realm.evaluate(&load.code, &mut self.scope) {
            return vec![self.fail_load(format!("Failed to evaluate bundle: {}", e))];
        }
        self.state.declared_names = self.scope.declared_in(scope_generation);

        let Some(component) = self.resolve_component(&load.component_name) else {
            let nearby = self
                .scope
                .nearby_callables(&load.component_name, NEARBY_NAME_LIMIT);
            let error = if nearby.is_empty() {
                format!(
                    "Component '{}' not found. No functions were declared by the bundle.",
                    load.component_name
                )
            } else {
                format!(
                    "Component '{}' not found. Available: {}",
                    load.component_name,
                    nearby.join(", ")
                )
            };
            return vec![self.fail_load(error)];
        };
        self.state.component = Some(component);

        if load.component_type == ComponentType::Composite {
            self.state.composite = self
                .scope
                .get(PREVIEW_RENDER_SLOT)
                .and_then(Binding::as_callable)
                .cloned();
            if self.state.composite.is_none() {
                tracing::warn!(
                    "Composite component {} has no render wrapper, rendering it directly",
                    load.component_name
                );
            }
        }

        if let Some(ref wrapper) = load.wrapper {
            self.state.wrapper = self.scope.get(wrapper).and_then(Binding::as_callable).cloned();
            if self.state.wrapper.is_none() {
                tracing::warn!("Wrapper '{}' not found, rendering without it", wrapper);
            }
        }

        self.state.props = merge_props(&load.default_props, &load.props);

        match self.render() {
            Ok(()) => {
                self.phase = Phase::Rendered;
                self.schedule_extraction(0);
                vec![SandboxEvent::RenderSuccess { generation }]
            }
            Err(error) => vec![self.fail_render(error)],
        }
    }

    /// Component slot published by the trailer, then the bare name.
    fn resolve_component(&self, name: &str) -> Option<ComponentRef> {
        self.scope
            .get(PREVIEW_COMPONENT_SLOT)
            .and_then(Binding::as_callable)
            .or_else(|| self.scope.get(name).and_then(Binding::as_callable))
            .cloned()
    }

    fn render(&mut self) -> Result<(), String> {
        let Some(component) = self.state.component.clone() else {
            return Err("no component loaded".to_string());
        };
        let request = RenderRequest {
            component,
            props: self.state.props.clone(),
            wrapper: self.state.wrapper.clone(),
            composite: self.state.composite.clone(),
            element_props: self.state.element_props.clone(),
        };
        self.realm.render(&request).map_err(|e| e.to_string())
    }

    fn fail_load(&mut self, error: String) -> SandboxEvent {
        tracing::warn!("Load {} failed: {}", self.state.generation, error);
        self.phase = Phase::Error;
        self.realm.show_diagnostic("Failed to load component", &error);
        SandboxEvent::LoadError {
            error,
            generation: self.state.generation,
        }
    }

    fn fail_render(&mut self, error: String) -> SandboxEvent {
        tracing::warn!("Render of {} failed: {}", self.state.component_name, error);
        self.phase = Phase::Error;
        self.extraction = None;
        self.realm.show_diagnostic("Failed to render component", &error);
        SandboxEvent::RenderError {
            error,
            generation: self.state.generation,
        }
    }

    // -- props ----------------------------------------------------------------

    fn update_props(&mut self, props: Props) -> Vec<SandboxEvent> {
        if self.phase != Phase::Rendered {
            tracing::debug!("Ignoring prop update in phase {:?}", self.phase);
            return Vec::new();
        }
        self.state.props = without_removed(props);
        match self.render() {
            Ok(()) => vec![SandboxEvent::RenderSuccess {
                generation: self.state.generation,
            }],
            Err(error) => vec![self.fail_render(error)],
        }
    }

    // -- extraction -----------------------------------------------------------

    fn schedule_extraction(&mut self, attempt: u32) {
        self.extraction = Some(Extraction {
            attempt,
            due: Instant::now() + self.config.extraction_delay(attempt + 1),
        });
    }

    /// Run a due extraction attempt. Resolves the root selector, reports it
    /// with the root's computed styles, and replays buffered overrides once.
    pub fn poll_extraction(&mut self) -> Vec<SandboxEvent> {
        let Some(extraction) = self.extraction else {
            return Vec::new();
        };
        if Instant::now() < extraction.due {
            return Vec::new();
        }
        self.extraction = None;

        let Some(root) = self.realm.root_element() else {
            let next = extraction.attempt + 1;
            if next >= self.config.extraction_retries {
                tracing::warn!(
                    "Root element of {} not found after {} attempts",
                    self.state.component_name,
                    next
                );
            } else {
                tracing::debug!("Root element not ready, retry {}", next);
                self.schedule_extraction(next);
            }
            return Vec::new();
        };

        let selector = root.selector;
        self.state.root_selector = Some(selector.clone());
        let mut events = vec![SandboxEvent::ComponentRootSelector {
            selector: selector.clone(),
        }];

        if let Some(groups) = self.pending_overrides.take() {
            tracing::debug!("Replaying {} buffered override groups", groups.len());
            self.install_overrides(&groups, &selector);
        }
        events.extend(self.root_styles());
        events
    }

    // -- styles ---------------------------------------------------------------

    fn apply_overrides(&mut self, groups: Vec<OverrideGroup>) -> Vec<SandboxEvent> {
        match self.state.root_selector.clone() {
            Some(root) => {
                self.install_overrides(&groups, &root);
                self.root_styles().into_iter().collect()
            }
            None => {
                tracing::debug!("Root selector unknown, buffering {} override groups", groups.len());
                self.pending_overrides = Some(groups);
                Vec::new()
            }
        }
    }

    fn install_overrides(&mut self, groups: &[OverrideGroup], root: &str) {
        let rewritten = rewrite_groups(groups, root);
        let sheet = override_stylesheet(&rewritten);
        self.document.override_css = if sheet.is_empty() {
            None
        } else {
            Some(sheet.to_css())
        };
        self.sync_document();
    }

    fn force_state(&mut self, state: PseudoState, component_css: Option<String>) -> Vec<SandboxEvent> {
        if let Some(css) = component_css {
            self.document.component_css = css;
            self.component_sheet = self.parse_component_sheet();
        }
        self.state.forced_state = state;
        self.refresh_forced_state();
        self.sync_document();
        self.root_styles().into_iter().collect()
    }

    fn update_stylesheet(&mut self, css: String) -> Vec<SandboxEvent> {
        self.document.component_css = css;
        self.component_sheet = self.parse_component_sheet();
        self.refresh_forced_state();
        self.sync_document();
        self.root_styles().into_iter().collect()
    }

    fn refresh_forced_state(&mut self) {
        self.document.forced_state_css = match self.state.forced_state {
            PseudoState::Default => None,
            state => {
                let forced = force_state(&self.component_sheet, state);
                if forced.is_empty() {
                    None
                } else {
                    Some(forced.to_css())
                }
            }
        };
    }

    fn parse_component_sheet(&self) -> StyleSheet {
        match css::parse(&self.document.component_css) {
            Ok(sheet) => sheet,
            Err(e) => {
                tracing::warn!("Component stylesheet could not be parsed: {}", e);
                StyleSheet::default()
            }
        }
    }

    fn root_styles(&self) -> Option<SandboxEvent> {
        let root = self.state.root_selector.as_deref()?;
        let styles = self.realm.computed_styles(root)?;
        Some(SandboxEvent::ComputedStyles {
            styles,
            sub_selector: None,
        })
    }

    fn sub_styles(&self, sub_selector: &str) -> Option<SandboxEvent> {
        if self.phase != Phase::Rendered {
            return None;
        }
        let selector = self.sub_element_selector(sub_selector);
        let styles = self.realm.computed_styles(&selector)?;
        Some(SandboxEvent::ComputedStyles {
            styles,
            sub_selector: Some(sub_selector.to_string()),
        })
    }

    fn sub_element_selector(&self, sub_selector: &str) -> String {
        match self.state.root_selector {
            Some(ref root) => format!("{} {}", root, sub_selector.trim()),
            None => sub_selector.trim().to_string(),
        }
    }

    fn sync_document(&mut self) {
        self.realm.sync_document(&self.document);
    }

    // -- picking --------------------------------------------------------------

    /// The operator clicked an element. In interactive mode a matching
    /// sub-element is selected; otherwise, with the inspector on, the
    /// element is described.
    pub fn pick_element(&mut self, selector: &str) -> Vec<SandboxEvent> {
        if self.phase != Phase::Rendered {
            return Vec::new();
        }

        if self.interactive.enabled {
            let matched = self
                .interactive
                .sub_elements
                .iter()
                .find(|sub| {
                    let full = self.sub_element_selector(&sub.selector);
                    selector == full || selector == sub.selector.trim()
                })
                .cloned();
            if let Some(sub_element) = matched {
                self.interactive.selected = Some(sub_element.name.clone());
                self.document.highlighted = Some(self.sub_element_selector(&sub_element.selector));
                self.sync_document();
                return vec![SandboxEvent::InteractiveSelect { sub_element }];
            }
            return Vec::new();
        }

        if !self.document.inspector_enabled {
            return Vec::new();
        }
        let Some(element_info) = self.realm.describe_element(selector) else {
            return Vec::new();
        };
        let styles = self
            .realm
            .computed_styles(&element_info.selector)
            .unwrap_or_default();
        vec![SandboxEvent::InspectorSelect {
            styles,
            element_info,
        }]
    }

    pub fn selected_sub_element(&self) -> Option<&str> {
        self.interactive.selected.as_deref()
    }

    // -- loop -----------------------------------------------------------------

    /// Run until the host hangs up. Announces readiness first.
    pub async fn run(
        mut self,
        mut inbox: UnboundedReceiver<HostMessage>,
        outbox: UnboundedSender<SandboxEvent>,
    ) -> Self {
        if outbox.send(SandboxEvent::SandboxReady).is_err() {
            return self;
        }
        tracing::info!("Sandbox ready");

        loop {
            let deadline = self.extraction_deadline();
            let events = tokio::select! {
                message = inbox.recv() => match message {
                    Some(message) => self.handle(message),
                    None => break,
                },
                _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    self.poll_extraction()
                }
            };
            for event in events {
                if outbox.send(event).is_err() {
                    tracing::debug!("Host hung up, stopping sandbox");
                    return self;
                }
            }
        }

        tracing::debug!("Host channel closed, stopping sandbox");
        self
    }
}

/// Default props overlaid with explicit props; null sentinels remove keys
/// even when a default exists.
pub fn merge_props(default_props: &Props, props: &Props) -> Props {
    let mut merged = without_removed(default_props.clone());
    for (key, value) in props {
        if value.is_null() {
            merged.remove(key);
        } else {
            merged.insert(key.clone(), value.clone());
        }
    }
    merged
}

/// A full prop set with null sentinels stripped, so the component's own
/// defaults apply to those keys.
pub fn without_removed(mut props: Props) -> Props {
    props.retain(|_, value| !value.is_null());
    props
}
