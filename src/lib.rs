//! # Preview Sandbox
//!
//! Live preview pipeline for UI components: turns a component's source plus
//! its transitive local imports into one flat, self-contained executable
//! unit, and drives an isolated sandbox runtime that loads, re-renders and
//! hot-updates that unit over a typed message protocol.
//!
//! The compilation side never evaluates code. The sandbox side never reads
//! files. The two meet only through [`protocol::HostMessage`] and
//! [`protocol::SandboxEvent`].

pub mod bundle;
pub mod css;
pub mod protocol;
pub mod resolver;
pub mod sandbox;
pub mod stubs;
pub mod transform;
pub mod utils;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::resolver::{FileReader, ResolverConfig, UnresolvedImport};
use crate::stubs::{IconAsset, DEFAULT_PORTAL_ROOT_ID};
use crate::transform::TransformOptions;

pub use crate::bundle::Bundle;

// ---------------------------------------------------------------------------
// Component Unit
// ---------------------------------------------------------------------------

/// One component to preview. Created per load request and owned by the
/// resolver for a single resolution pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentUnit {
    /// Binding name of the component inside its source.
    pub name: String,
    pub raw_source: String,
    /// Local import specifiers the caller already knows about. Merged with
    /// the imports found in `raw_source`.
    #[serde(default)]
    pub declared_local_imports: Vec<String>,
    /// Absolute path of the component file. Relative imports resolve
    /// against its directory.
    pub file_path: String,
    /// Extra files to bundle even though nothing imports them.
    #[serde(default)]
    pub explicit_dependency_paths: Vec<String>,
}

// ---------------------------------------------------------------------------
// Diagnostic
// ---------------------------------------------------------------------------

/// A structured diagnostic emitted during compilation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub level: DiagnosticLevel,
    pub message: String,
    pub context: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DiagnosticLevel {
    Error,
    Warning,
    Info,
}

// ---------------------------------------------------------------------------
// PreviewOptions
// ---------------------------------------------------------------------------

/// Describes HOW to compile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PreviewOptions {
    pub resolver: ResolverConfig,
    pub transform: TransformOptions,
    /// Icon catalogue turned into icon stubs.
    pub icons: Vec<IconAsset>,
    /// Named utility replacements: name → JS expression.
    pub utilities: BTreeMap<String, String>,
    /// Markup rendered by the composite wrapper, e.g.
    /// `<Card {...props}><Card.Header /></Card>`. Only used for composite
    /// components.
    pub composite_template: Option<String>,
    pub portal_root_id: String,
}

impl Default for PreviewOptions {
    fn default() -> Self {
        Self {
            resolver: ResolverConfig::default(),
            transform: TransformOptions::default(),
            icons: Vec::new(),
            utilities: BTreeMap::new(),
            composite_template: None,
            portal_root_id: DEFAULT_PORTAL_ROOT_ID.to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// CompiledPreview
// ---------------------------------------------------------------------------

/// The sealed output of a successful compilation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompiledPreview {
    /// Final executable text (the flattened [`Bundle`]).
    pub code: String,
    /// The assembled sections, for hosts that send them on as a
    /// `LOAD_COMPONENT`.
    #[serde(skip)]
    pub bundle: Bundle,
    pub component_name: String,
    /// Absolute paths of bundled dependencies, dependency-first.
    pub dependencies: Vec<String>,
    /// Local imports that could not be found.
    pub unresolved: Vec<UnresolvedImport>,
    pub diagnostics: Vec<Diagnostic>,
}

// ---------------------------------------------------------------------------
// PreviewError
// ---------------------------------------------------------------------------

/// Errors that abort a compilation or a protocol step.
#[derive(Debug, Error)]
pub enum PreviewError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Transform failed: {0}")]
    Transform(String),

    #[error("Stylesheet error: {0}")]
    Css(String),

    #[error("Protocol error: {0}")]
    Protocol(#[from] serde_json::Error),

    #[error("Realm error: {0}")]
    Realm(#[from] sandbox::RealmError),
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Compile one component into a preview bundle.
///
/// 1. Validates the unit
/// 2. Resolves its local import graph through `reader`
/// 3. Synthesizes stubs for everything the graph does not provide
/// 4. Assembles the bundle and returns it with the collected diagnostics
///
/// Unresolved local imports never fail the compilation; they are reported
/// in [`CompiledPreview::unresolved`].
pub async fn compile_preview(
    unit: &ComponentUnit,
    options: &PreviewOptions,
    reader: &dyn FileReader,
) -> Result<CompiledPreview, PreviewError> {
    bundle::execute_bundle(unit, options, reader).await
}
