//! Script realm backed by `deno_core`.
//!
//! One V8 isolate per realm. `runtime.js` is evaluated first and installs a
//! React-compatible renderer, an in-memory document and a `__preview` bridge.
//! Bundles run inside a function so their lexical declarations stay private;
//! the bridge then publishes the bundle's top-level names onto `globalThis`
//! and diffs the global object against a snapshot taken before evaluation.
//! Everything the diff finds is declared into the sandbox's current
//! generation, and released again when that generation is dropped.

use deno_core::{v8, JsRuntime, RuntimeOptions};
use serde::Deserialize;
use serde_json::{json, Map, Value};

use super::dom::{self, Cascade, DomNode};
use super::realm::{DocumentState, Realm, RealmError, RenderRequest};
use super::scope::{Binding, ComponentRef, GlobalScope};
use crate::bundle::BUNDLE_EVALUATED;
use crate::protocol::{ElementInfo, StyleMap, ThemeSettings, ThemeStrategy};
use crate::transform::declared_names;
use crate::utils::js_string_literal;

const RUNTIME_SOURCE: &str = include_str!("runtime.js");

/// Globals the runtime installs. Every generation sees them.
pub const RUNTIME_GLOBALS: &[&str] = &["React", "ReactDOM", "document", "window", "parent"];

/// Attribute written when a theme uses the attribute strategy without
/// naming one.
const DEFAULT_THEME_ATTRIBUTE: &str = "data-theme";

/// The ready/diagnostic message a bundle's registration trailer posts.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BundleSignal {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub found: bool,
    #[serde(default)]
    pub component_name: String,
}

#[derive(Debug, Deserialize)]
struct EvaluationReport {
    globals: Vec<PublishedGlobal>,
    #[serde(default)]
    signals: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct PublishedGlobal {
    name: String,
    #[serde(default)]
    handle: Option<u64>,
    #[serde(default)]
    value: Value,
}

pub struct DenoRealm {
    runtime: JsRuntime,
    document: DocumentState,
    snapshot: DomNode,
    signals: Vec<BundleSignal>,
}

impl DenoRealm {
    pub fn new() -> Result<Self, RealmError> {
        let runtime = JsRuntime::new(RuntimeOptions::default());
        let mut realm = Self {
            runtime,
            document: DocumentState::default(),
            snapshot: DomNode::default(),
            signals: Vec::new(),
        };
        realm
            .call("<preview-runtime>", RUNTIME_SOURCE.to_string())
            .map_err(RealmError::Evaluation)?;
        let snapshot = realm
            .call("<preview-snapshot>", "__preview.snapshot()".to_string())
            .map_err(RealmError::Evaluation)?;
        realm.snapshot = parse_snapshot(&snapshot).map_err(RealmError::Evaluation)?;
        tracing::debug!("Preview realm initialized");
        Ok(realm)
    }

    /// A scope whose baseline holds the runtime's globals.
    pub fn baseline_scope() -> GlobalScope {
        GlobalScope::with_baseline(
            RUNTIME_GLOBALS
                .iter()
                .map(|name| (name.to_string(), Binding::Value(Value::from("runtime")))),
        )
    }

    /// Signals posted by the most recent evaluation.
    pub fn signals(&self) -> &[BundleSignal] {
        &self.signals
    }

    /// The document as of the last render or document sync.
    pub fn document_snapshot(&self) -> &DomNode {
        &self.snapshot
    }

    /// The element currently highlighted in interactive mode.
    pub fn highlighted_element(&self) -> Option<ElementInfo> {
        let selector = self.document.highlighted.as_deref()?;
        let path = dom::select_first(&self.snapshot, selector)?;
        dom::element_info(&self.snapshot, &path)
    }

    /// Run a script and return its completion value as a string.
    fn call(&mut self, name: &'static str, source: String) -> Result<String, String> {
        let value = self
            .runtime
            .execute_script(name, source)
            .map_err(|e| e.to_string())?;
        let scope = &mut self.runtime.handle_scope();
        let local = v8::Local::new(scope, value);
        Ok(local.to_rust_string_lossy(scope))
    }

    /// Run a bridge call that answers with a document snapshot.
    fn call_for_snapshot(&mut self, name: &'static str, source: String) -> Result<(), String> {
        let snapshot = self.call(name, source)?;
        self.snapshot = parse_snapshot(&snapshot)?;
        Ok(())
    }
}

fn parse_snapshot(text: &str) -> Result<DomNode, String> {
    serde_json::from_str(text).map_err(|e| format!("unreadable document snapshot: {}", e))
}

/// Wrap a bundle so its top-level names are reported back to the bridge.
fn evaluation_script(code: &str) -> String {
    let published: Vec<String> = declared_names(code)
        .iter()
        .map(|name| {
            format!(
                "  {}: typeof {} !== \"undefined\" ? {} : undefined",
                js_string_literal(name),
                name,
                name
            )
        })
        .collect();
    format!(
        "__preview.evaluate(function () {{\n{}\n;return {{\n{}\n}};\n}});",
        code,
        published.join(",\n")
    )
}

fn theme_state(theme: &ThemeSettings) -> Value {
    let target = serde_json::to_value(theme.apply_to).unwrap_or(Value::Null);
    let mut state = Map::new();
    state.insert("name".into(), Value::from(theme.theme.clone()));
    state.insert("target".into(), target);
    match theme.strategy {
        ThemeStrategy::Class => {
            state.insert("className".into(), Value::from(theme.theme.clone()));
        }
        ThemeStrategy::Attribute => {
            let attribute = theme
                .attribute
                .clone()
                .unwrap_or_else(|| DEFAULT_THEME_ATTRIBUTE.to_string());
            state.insert("attribute".into(), Value::from(attribute));
        }
        ThemeStrategy::Variables => {
            let variables: Vec<String> = theme
                .values
                .iter()
                .map(|(name, value)| {
                    let name = if name.starts_with("--") {
                        name.clone()
                    } else {
                        format!("--{}", name)
                    };
                    format!("{}: {}", name, value)
                })
                .collect();
            state.insert("variables".into(), Value::from(variables.join("; ")));
        }
    }
    Value::Object(state)
}

impl Realm for DenoRealm {
    fn evaluate(&mut self, code: &str, scope: &mut GlobalScope) -> Result<(), RealmError> {
        let report = self
            .call("<preview-bundle>", evaluation_script(code))
            .map_err(RealmError::Evaluation)?;
        let report: EvaluationReport =
            serde_json::from_str(&report).map_err(|e| RealmError::Evaluation(e.to_string()))?;

        tracing::debug!("Bundle added {} globals", report.globals.len());
        for global in report.globals {
            let binding = match global.handle {
                Some(handle) => Binding::Callable(ComponentRef {
                    name: global.name.clone(),
                    handle,
                }),
                None => Binding::Value(global.value),
            };
            scope.declare(global.name, binding);
        }

        self.signals = report
            .signals
            .into_iter()
            .filter_map(|signal| serde_json::from_value::<BundleSignal>(signal).ok())
            .collect();
        for signal in &self.signals {
            if signal.kind == BUNDLE_EVALUATED && !signal.found {
                tracing::warn!(
                    "Bundle evaluated but did not register '{}'",
                    signal.component_name
                );
            }
        }
        Ok(())
    }

    fn release_globals(&mut self, names: &[String]) {
        if names.is_empty() {
            return;
        }
        let names = Value::from(names.to_vec());
        if let Err(e) = self.call("<preview-release>", format!("__preview.release({})", names)) {
            tracing::warn!("Failed to release globals: {}", e);
        }
    }

    fn render(&mut self, request: &RenderRequest) -> Result<(), RealmError> {
        let payload = json!({
            "component": request.component.handle,
            "composite": request.composite.as_ref().map(|c| c.handle),
            "wrapper": request.wrapper.as_ref().map(|w| w.handle),
            "props": request.props,
            "elementProps": request.element_props,
        });
        self.call_for_snapshot("<preview-render>", format!("__preview.render({})", payload))
            .map_err(RealmError::Render)
    }

    fn unmount(&mut self) {
        if let Err(e) = self.call_for_snapshot("<preview-unmount>", "__preview.unmount()".to_string()) {
            tracing::warn!("Failed to unmount preview root: {}", e);
        }
    }

    fn show_diagnostic(&mut self, title: &str, detail: &str) {
        let source = format!(
            "__preview.showDiagnostic({}, {})",
            js_string_literal(title),
            js_string_literal(detail)
        );
        if let Err(e) = self.call_for_snapshot("<preview-diagnostic>", source) {
            tracing::warn!("Failed to show diagnostic panel: {}", e);
        }
    }

    fn root_element(&self) -> Option<ElementInfo> {
        let path = dom::root_element(&self.snapshot)?;
        dom::element_info(&self.snapshot, &path)
    }

    fn describe_element(&self, selector: &str) -> Option<ElementInfo> {
        let path = dom::select_first(&self.snapshot, selector)?;
        dom::element_info(&self.snapshot, &path)
    }

    fn computed_styles(&self, selector: &str) -> Option<StyleMap> {
        let path = dom::select_first(&self.snapshot, selector)?;
        let cascade = Cascade::new(&self.document.stylesheets());
        Some(cascade.computed(&path))
    }

    fn sync_document(&mut self, document: &DocumentState) {
        self.document = document.clone();
        let state = json!({
            "stylesheets": document.stylesheets(),
            "portalRootId": document.portal_root_id,
            "theme": document.theme.as_ref().map(theme_state),
            "layout": document.layout,
            "animationsDisabled": document.animations_disabled,
            "inspector": document.inspector_enabled,
        });
        if let Err(e) =
            self.call_for_snapshot("<preview-document>", format!("__preview.syncDocument({})", state))
        {
            tracing::warn!("Failed to sync preview document: {}", e);
        }
    }
}
