//! Stub synthesizer.
//!
//! Produces replacement declarations for names a component expects from its
//! original project but that do not exist inside the sandbox: the class-name
//! helper, the scoped style-module accessor, rendering-runtime primitives,
//! portal helpers, catalogued icons, and a placeholder-icon factory.
//!
//! A name is emitted at most once and never when it is excluded (already
//! provided by a bundled dependency), declared by the main component itself,
//! or equal to the target component's name.

use std::collections::{BTreeMap, HashSet};

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::utils::{is_js_identifier, js_string_literal};

/// Hooks and helpers re-exported from the rendering runtime.
pub const RUNTIME_PRIMITIVES: &[&str] = &[
    "useState",
    "useEffect",
    "useLayoutEffect",
    "useRef",
    "useMemo",
    "useCallback",
    "useContext",
    "useReducer",
    "useId",
    "useImperativeHandle",
    "createContext",
    "forwardRef",
    "memo",
    "Fragment",
    "Children",
    "cloneElement",
    "isValidElement",
];

/// Factory for untyped icon-shaped properties.
pub const PLACEHOLDER_ICON_FACTORY: &str = "__createPlaceholderIcon";

/// Default id of the element portals render into.
pub const DEFAULT_PORTAL_ROOT_ID: &str = "preview-portal-root";

lazy_static! {
    static ref SVG_OPEN_RE: Regex = Regex::new(r"(?s)^\s*<svg\b([^>]*)>").unwrap();
    static ref VIEW_BOX_RE: Regex = Regex::new(r#"viewBox\s*=\s*["']([^"']+)["']"#).unwrap();
}

/// A catalogued icon asset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IconAsset {
    pub name: String,
    /// Vector markup: either a full `<svg>` document or its inner content.
    pub svg: String,
    #[serde(default)]
    pub view_box: Option<String>,
}

/// Everything the synthesizer needs for one bundle.
#[derive(Debug, Clone)]
pub struct StubRequest<'a> {
    pub component_name: &'a str,
    /// Names already defined by bundled dependencies.
    pub exclude: &'a HashSet<String>,
    /// Top-level names the main component block declares.
    pub local_names: &'a HashSet<String>,
    /// Named utility replacements: name → caller-supplied JS expression.
    pub utilities: &'a BTreeMap<String, String>,
    pub icons: &'a [IconAsset],
    pub portal_root_id: &'a str,
}

/// Accumulates stub declarations, skipping excluded or already-emitted names.
struct StubWriter<'a> {
    exclude: &'a HashSet<String>,
    local_names: &'a HashSet<String>,
    component_name: &'a str,
    emitted: HashSet<String>,
    out: String,
}

impl<'a> StubWriter<'a> {
    fn claim(&mut self, name: &str) -> bool {
        if name == self.component_name
            || self.exclude.contains(name)
            || self.local_names.contains(name)
        {
            return false;
        }
        self.emitted.insert(name.to_string())
    }

    fn declare(&mut self, name: &str, code: impl FnOnce() -> String) {
        if self.claim(name) {
            self.out.push_str(&code());
            self.out.push('\n');
        }
    }
}

/// Build the stub block for one bundle.
pub fn synthesize_stubs(request: &StubRequest<'_>) -> String {
    let mut writer = StubWriter {
        exclude: request.exclude,
        local_names: request.local_names,
        component_name: request.component_name,
        emitted: HashSet::new(),
        out: String::from("// === PREVIEW STUBS ===\n"),
    };

    // Caller-supplied utilities win over the built-in versions.
    for (name, implementation) in request.utilities {
        if !is_js_identifier(name) {
            tracing::warn!("Skipping utility stub with invalid name '{}'", name);
            continue;
        }
        writer.declare(name, || format!("const {} = {};", name, implementation));
    }

    writer.declare("cn", || {
        "function cn() {\n  return Array.prototype.slice.call(arguments).flat(Infinity).filter(Boolean).join(\" \");\n}"
            .to_string()
    });
    writer.declare("clsx", || "const clsx = cn;".to_string());

    let component_literal = js_string_literal(&format!("{}_", request.component_name));
    writer.declare("styles", || {
        format!(
            "const styles = new Proxy({{}}, {{\n  get: function (_target, prop) {{\n    return typeof prop === \"string\" ? {} + prop : undefined;\n  }}\n}});",
            component_literal
        )
    });

    for primitive in RUNTIME_PRIMITIVES {
        writer.declare(primitive, || format!("const {0} = React.{0};", primitive));
    }

    let portal_id = js_string_literal(request.portal_root_id);
    writer.declare("__previewPortalContainer", || {
        format!(
            "function __previewPortalContainer() {{\n  return document.getElementById({}) || document.body;\n}}",
            portal_id
        )
    });
    writer.declare("createPortal", || {
        "function createPortal(children) {\n  return ReactDOM.createPortal(children, __previewPortalContainer());\n}"
            .to_string()
    });
    writer.declare("createRoot", || {
        "function createRoot(_container, options) {\n  return ReactDOM.createRoot(__previewPortalContainer(), options);\n}"
            .to_string()
    });

    for icon in request.icons {
        let name = icon_binding_name(&icon.name);
        if !is_js_identifier(&name) {
            tracing::warn!("Skipping icon '{}' with unusable name", icon.name);
            continue;
        }
        writer.declare(&name, || icon_function(&name, icon));
    }

    writer.declare(PLACEHOLDER_ICON_FACTORY, placeholder_icon_factory);

    writer.out
}

/// `arrow-right` / `arrow_right` → `ArrowRight`; valid identifiers pass through.
pub fn icon_binding_name(name: &str) -> String {
    if is_js_identifier(name) && !name.contains('_') {
        return name.to_string();
    }
    name.split(|c: char| c == '-' || c == '_' || c == ' ')
        .filter(|part| !part.is_empty())
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect()
}

/// Split catalogued markup into (viewBox, inner markup).
fn split_svg(icon: &IconAsset) -> (String, String) {
    let markup = icon.svg.trim();
    let mut view_box = icon.view_box.clone();
    let mut inner = markup.to_string();

    if let Some(cap) = SVG_OPEN_RE.captures(markup) {
        if view_box.is_none() {
            view_box = VIEW_BOX_RE.captures(&cap[1]).map(|vb| vb[1].to_string());
        }
        let open_end = cap.get(0).map_or(0, |m| m.end());
        let close = markup.rfind("</svg>").unwrap_or(markup.len());
        inner = markup[open_end..close.max(open_end)].trim().to_string();
    }

    (view_box.unwrap_or_else(|| "0 0 24 24".to_string()), inner)
}

fn icon_function(name: &str, icon: &IconAsset) -> String {
    let (view_box, inner) = split_svg(icon);
    format!(
        "function {name}(props) {{\n  var size = props && props.size != null ? props.size : 24;\n  var rest = Object.assign({{}}, props);\n  delete rest.size;\n  return React.createElement(\"svg\", Object.assign({{ xmlns: \"http://www.w3.org/2000/svg\", width: size, height: size, viewBox: {view_box}, fill: \"none\", stroke: \"currentColor\", dangerouslySetInnerHTML: {{ __html: {markup} }} }}, rest));\n}}",
        name = name,
        view_box = js_string_literal(&view_box),
        markup = js_string_literal(&inner),
    )
}

fn placeholder_icon_factory() -> String {
    format!(
        "function {}(name) {{\n  return function PlaceholderIcon(props) {{\n    var size = props && props.size != null ? props.size : 16;\n    return React.createElement(\"span\", {{ \"data-placeholder-icon\": name, \"aria-hidden\": true, style: {{ display: \"inline-block\", width: size, height: size, borderRadius: 2, background: \"currentColor\", opacity: 0.3 }} }});\n  }};\n}}",
        PLACEHOLDER_ICON_FACTORY
    )
}
