//! Core bundling logic.
//!
//! This module orchestrates the full compile pipeline:
//! 1. Resolve the component's local import graph
//! 2. Synthesize stubs for every name the graph does not provide
//! 3. Transform the main component
//! 4. Concatenate everything into one flat-scope [`Bundle`]
//!
//! **Section order is fixed:** stubs → dependencies (dependency-first) →
//! main component → optional composite wrapper → registration trailer.
//! Identical inputs always produce byte-identical output.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::resolver::{resolve_dependencies, FileReader};
use crate::stubs::{synthesize_stubs, StubRequest};
use crate::transform::{declared_names, discover_exports, transform_source, DEFAULT_EXPORT_BINDING};
use crate::utils::{is_js_identifier, js_string_literal, normalize_path};
use crate::{CompiledPreview, ComponentUnit, Diagnostic, DiagnosticLevel, PreviewError, PreviewOptions};

pub const DEPENDENCIES_START_MARKER: &str = "// === PREVIEW DEPENDENCIES ===";
pub const DEPENDENCIES_END_MARKER: &str = "// === END PREVIEW DEPENDENCIES ===";
pub const REGISTRATION_MARKER: &str = "// === PREVIEW REGISTRATION ===";

/// Global slot holding the resolved component after evaluation.
pub const PREVIEW_COMPONENT_SLOT: &str = "__PREVIEW_COMPONENT__";
/// Global slot holding the composite render function, or `null`.
pub const PREVIEW_RENDER_SLOT: &str = "__PREVIEW_RENDER__";
/// Name of the composite wrapper function.
pub const COMPOSITE_RENDER_FN: &str = "__previewRender";
/// Signal type posted by the trailer once the bundle has evaluated.
pub const BUNDLE_EVALUATED: &str = "BUNDLE_EVALUATED";

// ---------------------------------------------------------------------------
// Bundle
// ---------------------------------------------------------------------------

/// One assembled executable unit. Immutable once assembled.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bundle {
    pub component_name: String,
    pub stub_block: String,
    /// Dependency-first.
    pub dependency_blocks: Vec<String>,
    pub component_block: String,
    pub composite_render_block: Option<String>,
    pub registration_trailer: String,
}

impl Bundle {
    /// Flatten into executable text, consuming the bundle.
    pub fn into_code(self) -> String {
        self.to_code()
    }

    pub fn to_code(&self) -> String {
        let mut code = String::with_capacity(
            self.stub_block.len()
                + self.dependency_blocks.iter().map(String::len).sum::<usize>()
                + self.component_block.len()
                + self.registration_trailer.len()
                + 256,
        );

        code.push_str(self.stub_block.trim_end());
        code.push_str("\n\n");

        code.push_str(DEPENDENCIES_START_MARKER);
        code.push('\n');
        for block in &self.dependency_blocks {
            code.push_str(block.trim_end());
            code.push('\n');
        }
        code.push_str(DEPENDENCIES_END_MARKER);
        code.push_str("\n\n");

        code.push_str(self.component_block.trim_end());
        code.push_str("\n\n");

        if let Some(ref composite) = self.composite_render_block {
            code.push_str(composite.trim_end());
            code.push_str("\n\n");
        }

        code.push_str(self.registration_trailer.trim_end());
        code.push('\n');
        code
    }
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

/// Run the full compile pipeline for one component.
pub async fn execute_bundle(
    unit: &ComponentUnit,
    options: &PreviewOptions,
    reader: &dyn FileReader,
) -> Result<CompiledPreview, PreviewError> {
    validate_unit(unit)?;

    let mut diagnostics: Vec<Diagnostic> = Vec::new();
    diagnostics.push(Diagnostic {
        level: DiagnosticLevel::Info,
        message: format!("Bundle started for component: {}", unit.name),
        context: Some(normalize_path(&unit.file_path)),
    });

    let resolution =
        resolve_dependencies(unit, &options.resolver, &options.transform, reader).await;
    diagnostics.extend(resolution.diagnostics.iter().cloned());

    let component_block = transform_source(&unit.raw_source, &options.transform)?;
    let local_names: HashSet<String> = declared_names(&component_block).into_iter().collect();

    let provided: HashSet<String> = resolution.published_names();
    let stub_block = synthesize_stubs(&StubRequest {
        component_name: &unit.name,
        exclude: &provided,
        local_names: &local_names,
        utilities: &options.utilities,
        icons: &options.icons,
        portal_root_id: &options.portal_root_id,
    });

    if !local_names.contains(&unit.name) {
        let has_default = discover_exports(&unit.raw_source)
            .iter()
            .any(|export| export.exported == "default");
        let message = if has_default {
            format!(
                "No declaration named '{}' found; falling back to the default export",
                unit.name
            )
        } else {
            format!(
                "No declaration named '{}' and no default export found",
                unit.name
            )
        };
        diagnostics.push(Diagnostic {
            level: DiagnosticLevel::Warning,
            message,
            context: Some(unit.file_path.clone()),
        });
    }

    let composite_render_block = match options.composite_template {
        Some(ref template) if !template.trim().is_empty() => {
            Some(composite_render_block(template, options)?)
        }
        _ => None,
    };

    let bundle = Bundle {
        component_name: unit.name.clone(),
        stub_block,
        dependency_blocks: resolution
            .dependencies
            .iter()
            .map(|dep| dep.code_block())
            .collect(),
        component_block,
        composite_render_block,
        registration_trailer: registration_trailer(&unit.name),
    };

    let code = bundle.to_code();
    diagnostics.push(Diagnostic {
        level: DiagnosticLevel::Info,
        message: format!(
            "Bundle complete: {} dependencies, {} unresolved, {} bytes",
            bundle.dependency_blocks.len(),
            resolution.unresolved.len(),
            code.len()
        ),
        context: None,
    });
    tracing::debug!(
        "Bundled {} ({} dependencies, {} bytes)",
        unit.name,
        bundle.dependency_blocks.len(),
        code.len()
    );

    Ok(CompiledPreview {
        code,
        bundle,
        component_name: unit.name.clone(),
        dependencies: resolution
            .dependencies
            .iter()
            .map(|dep| dep.absolute_path.clone())
            .collect(),
        unresolved: resolution.unresolved,
        diagnostics,
    })
}

fn validate_unit(unit: &ComponentUnit) -> Result<(), PreviewError> {
    if !is_js_identifier(&unit.name) {
        return Err(PreviewError::Validation(format!(
            "component name '{}' is not a valid identifier",
            unit.name
        )));
    }
    if unit.raw_source.trim().is_empty() {
        return Err(PreviewError::Validation(format!(
            "component '{}' has no source",
            unit.name
        )));
    }
    if unit.file_path.trim().is_empty() {
        return Err(PreviewError::Validation(format!(
            "component '{}' has no file path",
            unit.name
        )));
    }
    Ok(())
}

/// `function __previewRender(props) { return <template>; }` with markup lowered.
fn composite_render_block(template: &str, options: &PreviewOptions) -> Result<String, PreviewError> {
    let source = format!(
        "function {}(props) {{\n  return (\n{}\n  );\n}}\n",
        COMPOSITE_RENDER_FN,
        template.trim().trim_end_matches(';')
    );
    transform_source(&source, &options.transform).map_err(|e| {
        let reason = match e {
            PreviewError::Transform(reason) => reason,
            other => other.to_string(),
        };
        PreviewError::Transform(format!(
            "composite template is not valid markup ({}): {}",
            reason,
            template.trim()
        ))
    })
}

/// Trailer that finds the component after evaluation, publishes it, and
/// signals the host.
pub fn registration_trailer(component_name: &str) -> String {
    let name = component_name;
    let name_literal = js_string_literal(name);
    format!(
        r#"{marker}
(function () {{
  var component = typeof {name} !== "undefined" ? {name} : undefined;
  if (component === undefined && typeof {default} !== "undefined") component = {default};
  if (component && typeof component === "object" && typeof component.default !== "undefined") component = component.default;
  var found = component !== undefined && component !== null;
  globalThis["{component_slot}"] = found ? component : null;
  if (found) globalThis[{name_literal}] = component;
  globalThis["{render_slot}"] = typeof {render_fn} === "function" ? {render_fn} : null;
  if (typeof parent !== "undefined" && parent && typeof parent.postMessage === "function") {{
    parent.postMessage({{ type: "{signal}", found: found, componentName: {name_literal} }}, "*");
  }}
}})();
"#,
        marker = REGISTRATION_MARKER,
        name = name,
        default = DEFAULT_EXPORT_BINDING,
        component_slot = PREVIEW_COMPONENT_SLOT,
        name_literal = name_literal,
        render_slot = PREVIEW_RENDER_SLOT,
        render_fn = COMPOSITE_RENDER_FN,
        signal = BUNDLE_EVALUATED,
    )
}
