//! Dependency resolver.
//!
//! Walks a component's local import graph depth-first and produces one
//! [`ResolvedDependency`] per distinct absolute path, ordered dependency-first
//! (a file's own dependencies always precede it).
//!
//! **Invariants:**
//! - The walk stops below `max_depth`; deeper imports are skipped, not errors.
//! - A path is marked visited before its imports are walked, so cycles
//!   terminate and no path is resolved twice in one pass.
//! - A local import that cannot be found after trying every path variant is
//!   a soft miss: it is recorded in [`Resolution::unresolved`] and dropped.
//! - Bare package imports (`react`, `@radix-ui/...`) are external and skipped.

pub mod reader;

use std::collections::{BTreeMap, HashMap, HashSet};

use arcstr::ArcStr;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};

use crate::transform::{
    discover_exports, extract_imports, transform_source, ExportedBinding, ImportBinding,
    ImportStatement, TransformOptions, DEFAULT_EXPORT_BINDING,
};
use crate::utils::{
    is_js_identifier, is_relative_specifier, join_path, js_string_literal, normalize_path,
    parent_dir,
};
use crate::{ComponentUnit, Diagnostic, DiagnosticLevel};

pub use reader::{FileReader, FsReader, MemoryReader};

/// Path variants tried, in order, for every import.
pub const CANDIDATE_SUFFIXES: &[&str] = &[
    "",
    ".tsx",
    ".ts",
    ".jsx",
    ".js",
    "/index.tsx",
    "/index.ts",
    "/index.jsx",
    "/index.js",
];

/// Imports with these extensions are assets, never code.
const ASSET_EXTENSIONS: &[&str] = &[
    "css", "scss", "sass", "less", "styl", "svg", "png", "jpg", "jpeg", "gif", "webp", "avif",
    "ico", "woff", "woff2", "ttf", "otf", "json", "md", "mdx",
];

/// Object that receives republished dependency exports.
pub const EXPORT_REGISTRY: &str = "globalThis";

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Describes WHERE to look for local imports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ResolverConfig {
    /// Deepest import level that is still resolved. Direct imports are depth 1.
    pub max_depth: usize,
    /// Root that alias targets are relative to.
    pub project_root: String,
    /// Import prefix → target path prefix (tsconfig `paths` style; a trailing
    /// `*` on either side is ignored).
    pub aliases: BTreeMap<String, String>,
    /// Fallback alias used when no configured alias matches.
    pub legacy_alias_prefix: String,
    pub legacy_alias_target: String,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            max_depth: 3,
            project_root: "/".to_string(),
            aliases: BTreeMap::new(),
            legacy_alias_prefix: "@/".to_string(),
            legacy_alias_target: "src/".to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

/// One resolved local dependency.
#[derive(Debug, Clone)]
pub struct ResolvedDependency {
    pub absolute_path: String,
    pub source_text: ArcStr,
    /// Exported runtime bindings found in the raw source.
    pub discovered_exports: Vec<ExportedBinding>,
    /// Local and external imports of this file.
    pub sub_imports: Vec<ImportStatement>,
    /// Names importers asked for (union across every importer in the pass).
    pub requested: Vec<ImportBinding>,
    pub transformed_code: String,
    pub depth: usize,
}

impl ResolvedDependency {
    pub fn discovered_export_names(&self) -> Vec<&str> {
        self.discovered_exports
            .iter()
            .map(|e| e.exported.as_str())
            .collect()
    }

    fn local_for_export(&self, exported: &str) -> Option<&str> {
        self.discovered_exports
            .iter()
            .find(|e| e.exported == exported)
            .map(|e| e.local.as_str())
    }

    /// `(published name, expression)` pairs republished after evaluation.
    fn publications(&self) -> Vec<(String, Publication)> {
        let mut out: Vec<(String, Publication)> = Vec::new();
        let mut push = |name: &str, publication: Publication| {
            if is_js_identifier(name) && !out.iter().any(|(n, _)| n == name) {
                out.push((name.to_string(), publication));
            }
        };

        for export in &self.discovered_exports {
            if export.exported != "default" {
                push(&export.exported, Publication::Binding(export.local.clone()));
            }
        }

        for request in &self.requested {
            match request.imported.as_str() {
                "default" => {
                    let local = self
                        .local_for_export("default")
                        .unwrap_or(DEFAULT_EXPORT_BINDING)
                        .to_string();
                    push(&request.local, Publication::Binding(local));
                }
                "*" => push(&request.local, Publication::Namespace),
                name => {
                    let local = self.local_for_export(name).unwrap_or(name).to_string();
                    push(&request.local, Publication::Binding(local));
                }
            }
        }

        out
    }

    /// Names this dependency makes visible to sibling units.
    pub fn published_names(&self) -> Vec<String> {
        self.publications().into_iter().map(|(name, _)| name).collect()
    }

    /// The isolated code block for this dependency: the transformed source in
    /// its own function scope, followed by conditional republication of every
    /// export into [`EXPORT_REGISTRY`].
    pub fn code_block(&self) -> String {
        let mut block = format!("// --- dependency: {} ---\n(function () {{\n", self.absolute_path);
        block.push_str(self.transformed_code.trim_end());
        block.push('\n');

        for (name, publication) in self.publications() {
            let key = js_string_literal(&name);
            match publication {
                Publication::Binding(local) => {
                    if is_js_identifier(&local) {
                        block.push_str(&format!(
                            "  if (typeof {local} !== \"undefined\") {EXPORT_REGISTRY}[{key}] = {local};\n"
                        ));
                    }
                }
                Publication::Namespace => {
                    let members: Vec<String> = self
                        .discovered_exports
                        .iter()
                        .filter(|e| is_js_identifier(&e.local))
                        .map(|e| {
                            format!(
                                "{}: typeof {local} !== \"undefined\" ? {local} : undefined",
                                js_string_literal(&e.exported),
                                local = e.local
                            )
                        })
                        .collect();
                    block.push_str(&format!(
                        "  {EXPORT_REGISTRY}[{key}] = {{ {} }};\n",
                        members.join(", ")
                    ));
                }
            }
        }

        block.push_str("})();\n");
        block
    }
}

#[derive(Debug, Clone)]
enum Publication {
    Binding(String),
    Namespace,
}

/// A local import that could not be located.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnresolvedImport {
    pub specifier: String,
    /// Absolute path of the importing file.
    pub importer: String,
    /// Every path variant that was tried.
    pub attempted: Vec<String>,
}

/// Output of one resolution pass.
#[derive(Debug, Clone, Default)]
pub struct Resolution {
    /// Dependency-first order.
    pub dependencies: Vec<ResolvedDependency>,
    pub unresolved: Vec<UnresolvedImport>,
    pub diagnostics: Vec<Diagnostic>,
}

impl Resolution {
    /// Union of every name published by the resolved dependencies.
    pub fn published_names(&self) -> HashSet<String> {
        self.dependencies
            .iter()
            .flat_map(|d| d.published_names())
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Resolver
// ---------------------------------------------------------------------------

/// One resolution pass. Create a fresh resolver per load: the visited set is
/// per-pass state.
pub struct DependencyResolver<'r> {
    reader: &'r dyn FileReader,
    config: &'r ResolverConfig,
    transform: &'r TransformOptions,
    visited: HashSet<String>,
    /// Import base path → located absolute path (`None` for misses).
    located: HashMap<String, Option<String>>,
    /// Requests that reached an already-visited path.
    late_requests: HashMap<String, Vec<ImportBinding>>,
    resolved: Vec<ResolvedDependency>,
    unresolved: Vec<UnresolvedImport>,
    diagnostics: Vec<Diagnostic>,
}

impl<'r> DependencyResolver<'r> {
    pub fn new(
        reader: &'r dyn FileReader,
        config: &'r ResolverConfig,
        transform: &'r TransformOptions,
    ) -> Self {
        Self {
            reader,
            config,
            transform,
            visited: HashSet::new(),
            located: HashMap::new(),
            late_requests: HashMap::new(),
            resolved: Vec::new(),
            unresolved: Vec::new(),
            diagnostics: Vec::new(),
        }
    }

    /// Resolve everything the component imports, plus its explicitly
    /// declared dependency paths.
    pub async fn resolve_component(mut self, unit: &ComponentUnit) -> Resolution {
        let entry = normalize_path(&unit.file_path);
        let from_dir = parent_dir(&entry);
        self.visited.insert(entry.clone());

        let mut imports: Vec<ImportStatement> = extract_imports(&unit.raw_source)
            .into_iter()
            .filter(|stmt| !stmt.type_only)
            .collect();
        for declared in &unit.declared_local_imports {
            if !imports.iter().any(|stmt| &stmt.specifier == declared) {
                imports.push(ImportStatement {
                    specifier: declared.clone(),
                    bindings: Vec::new(),
                    type_only: false,
                });
            }
        }

        for stmt in &imports {
            self.resolve(&stmt.specifier, &from_dir, 1, stmt.bindings.clone(), &entry)
                .await;
        }
        for path in &unit.explicit_dependency_paths {
            self.resolve(path, &from_dir, 1, Vec::new(), &entry).await;
        }

        self.finish()
    }

    /// Resolve one import and, recursively, its own imports.
    pub fn resolve<'a>(
        &'a mut self,
        import_path: &'a str,
        from_dir: &'a str,
        depth: usize,
        requested: Vec<ImportBinding>,
        importer: &'a str,
    ) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            if depth > self.config.max_depth {
                tracing::debug!(
                    "Depth limit {} reached, skipping '{}' from {}",
                    self.config.max_depth,
                    import_path,
                    importer
                );
                self.diagnostics.push(Diagnostic {
                    level: DiagnosticLevel::Info,
                    message: format!("Skipped '{}': depth limit reached", import_path),
                    context: Some(importer.to_string()),
                });
                return;
            }

            let Some(base) = self.to_absolute(import_path, from_dir) else {
                return;
            };
            if is_asset_path(&base) {
                return;
            }

            let Some((path, content)) = self.locate(&base, import_path, importer).await else {
                return;
            };

            if self.visited.contains(&path) {
                self.late_requests.entry(path).or_default().extend(requested);
                return;
            }
            self.visited.insert(path.clone());

            let sub_imports: Vec<ImportStatement> = extract_imports(&content)
                .into_iter()
                .filter(|stmt| !stmt.type_only)
                .collect();
            let dir = parent_dir(&path);
            for stmt in &sub_imports {
                self.resolve(&stmt.specifier, &dir, depth + 1, stmt.bindings.clone(), &path)
                    .await;
            }

            let discovered_exports = discover_exports(&content);
            let transformed_code = match transform_source(&content, self.transform) {
                Ok(code) => code,
                Err(e) => {
                    tracing::warn!("Skipping {}: {}", path, e);
                    self.diagnostics.push(Diagnostic {
                        level: DiagnosticLevel::Warning,
                        message: format!("Skipped '{}': {}", import_path, e),
                        context: Some(path),
                    });
                    return;
                }
            };
            tracing::debug!(
                "Resolved {} (depth {}, {} exports)",
                path,
                depth,
                discovered_exports.len()
            );

            self.resolved.push(ResolvedDependency {
                absolute_path: path,
                source_text: ArcStr::from(content),
                discovered_exports,
                sub_imports,
                requested,
                transformed_code,
                depth,
            });
        })
    }

    /// Turn a specifier into an absolute base path. `None` for externals.
    pub fn to_absolute(&self, specifier: &str, from_dir: &str) -> Option<String> {
        if specifier.starts_with('/') {
            return Some(normalize_path(specifier));
        }
        if is_relative_specifier(specifier) {
            return Some(join_path(from_dir, specifier));
        }

        let best = self
            .config
            .aliases
            .iter()
            .filter_map(|(prefix, target)| {
                let prefix = prefix.trim_end_matches('*');
                let rest = specifier.strip_prefix(prefix)?;
                let boundary = prefix.ends_with('/') || rest.is_empty() || rest.starts_with('/');
                boundary.then_some((prefix.len(), target.trim_end_matches('*'), rest))
            })
            .max_by_key(|(len, _, _)| *len);

        if let Some((_, target, rest)) = best {
            return Some(self.under_root(&join_alias(target, rest)));
        }

        let legacy = &self.config.legacy_alias_prefix;
        if !legacy.is_empty() {
            if let Some(rest) = specifier.strip_prefix(legacy.as_str()) {
                return Some(self.under_root(&join_alias(&self.config.legacy_alias_target, rest)));
            }
        }

        None
    }

    fn under_root(&self, target: &str) -> String {
        if target.starts_with('/') {
            normalize_path(target)
        } else {
            join_path(&self.config.project_root, target)
        }
    }

    /// Try every path variant until one reads. Records a soft miss otherwise.
    async fn locate(
        &mut self,
        base: &str,
        specifier: &str,
        importer: &str,
    ) -> Option<(String, String)> {
        if let Some(known) = self.located.get(base) {
            let path = known.clone()?;
            // Already visited: content is not needed again.
            if self.visited.contains(&path) {
                return Some((path, String::new()));
            }
        }

        let mut attempted = Vec::with_capacity(CANDIDATE_SUFFIXES.len());
        for suffix in CANDIDATE_SUFFIXES {
            let candidate = format!("{}{}", base, suffix);
            if let Some(content) = self.reader.read_file(&candidate).await {
                self.located.insert(base.to_string(), Some(candidate.clone()));
                return Some((candidate, content));
            }
            attempted.push(candidate);
        }

        tracing::warn!("Unresolved local import '{}' from {}", specifier, importer);
        self.located.insert(base.to_string(), None);
        self.diagnostics.push(Diagnostic {
            level: DiagnosticLevel::Warning,
            message: format!("Unresolved local import '{}'", specifier),
            context: Some(importer.to_string()),
        });
        self.unresolved.push(UnresolvedImport {
            specifier: specifier.to_string(),
            importer: importer.to_string(),
            attempted,
        });
        None
    }

    fn finish(mut self) -> Resolution {
        for dep in &mut self.resolved {
            if let Some(extra) = self.late_requests.remove(&dep.absolute_path) {
                for binding in extra {
                    if !dep.requested.contains(&binding) {
                        dep.requested.push(binding);
                    }
                }
            }
        }

        Resolution {
            dependencies: self.resolved,
            unresolved: self.unresolved,
            diagnostics: self.diagnostics,
        }
    }
}

fn join_alias(target: &str, rest: &str) -> String {
    let rest = rest.trim_start_matches('/');
    if target.is_empty() {
        rest.to_string()
    } else if rest.is_empty() {
        target.trim_end_matches('/').to_string()
    } else {
        format!("{}/{}", target.trim_end_matches('/'), rest)
    }
}

fn is_asset_path(path: &str) -> bool {
    let name = path.rsplit('/').next().unwrap_or(path);
    match name.rsplit_once('.') {
        Some((_, ext)) => ASSET_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()),
        None => false,
    }
}

/// Convenience wrapper: one full resolution pass for `unit`.
pub async fn resolve_dependencies(
    unit: &ComponentUnit,
    config: &ResolverConfig,
    transform: &TransformOptions,
    reader: &dyn FileReader,
) -> Resolution {
    DependencyResolver::new(reader, config, transform)
        .resolve_component(unit)
        .await
}
