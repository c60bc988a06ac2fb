//! Source transformer.
//!
//! Rewrites a component or dependency unit so it can be evaluated in one flat
//! lexical scope without a module loader:
//!
//! 1. The unit is parsed with oxc. Import declarations are dropped and export
//!    syntax is unwrapped into plain declarations. Anonymous default exports
//!    bind [`DEFAULT_EXPORT_BINDING`]; named default exports keep their name
//!    and are aliased to it.
//! 2. The flattened text is parsed again and run through `oxc_transformer`,
//!    which strips TypeScript and lowers markup into classic-runtime factory
//!    calls (`React.createElement` by default).
//! 3. The program is printed back with `oxc_codegen`.
//!
//! [`extract_imports`], [`discover_exports`] and [`declared_names`] read the
//! same AST and are used by the resolver and the assembler before any
//! rewriting happens.

use std::path::Path;

use oxc_allocator::Allocator;
use oxc_ast::ast::{
    BindingPattern, Declaration, ExportDefaultDeclaration, ExportDefaultDeclarationKind,
    ExportNamedDeclaration, ImportDeclaration, ImportDeclarationSpecifier, Program, Statement,
};
use oxc_codegen::Codegen;
use oxc_parser::Parser;
use oxc_semantic::SemanticBuilder;
use oxc_span::{GetSpan, SourceType};
use oxc_transformer::{
    JsxOptions as OxcJsxOptions, JsxRuntime, TransformOptions as OxcTransformOptions, Transformer,
};
use serde::{Deserialize, Serialize};

use crate::PreviewError;

/// Binding that receives `export default` values.
pub const DEFAULT_EXPORT_BINDING: &str = "__default_export__";

/// Path handed to the transformer. Only its extension matters.
const UNIT_PATH: &str = "unit.tsx";

fn source_type() -> SourceType {
    SourceType::default()
        .with_module(true)
        .with_typescript(true)
        .with_jsx(true)
}

// ---------------------------------------------------------------------------
// Import / export shapes
// ---------------------------------------------------------------------------

/// One name brought into scope by an import statement.
///
/// `imported` is `"default"` for default imports and `"*"` for namespace imports.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImportBinding {
    pub imported: String,
    pub local: String,
}

impl ImportBinding {
    pub fn new(imported: impl Into<String>, local: impl Into<String>) -> Self {
        Self {
            imported: imported.into(),
            local: local.into(),
        }
    }
}

/// An import statement found in raw source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportStatement {
    pub specifier: String,
    pub bindings: Vec<ImportBinding>,
    /// `import type ...`; carries no runtime binding.
    pub type_only: bool,
}

/// A name a unit exports, with the local binding that backs it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExportedBinding {
    pub exported: String,
    pub local: String,
}

/// Find every static import declaration, in source order. Unparseable
/// source yields whatever the parser recovered.
pub fn extract_imports(source: &str) -> Vec<ImportStatement> {
    let allocator = Allocator::default();
    let ret = Parser::new(&allocator, source, source_type()).parse();
    ret.program
        .body
        .iter()
        .filter_map(|stmt| match stmt {
            Statement::ImportDeclaration(decl) => Some(import_statement(decl)),
            _ => None,
        })
        .collect()
}

fn import_statement(decl: &ImportDeclaration<'_>) -> ImportStatement {
    let type_only = decl.import_kind.is_type();
    let mut bindings = Vec::new();
    if !type_only {
        for specifier in decl.specifiers.iter().flatten() {
            match specifier {
                ImportDeclarationSpecifier::ImportSpecifier(s) => {
                    if s.import_kind.is_type() {
                        continue;
                    }
                    bindings.push(ImportBinding::new(
                        s.imported.name().as_str(),
                        s.local.name.as_str(),
                    ));
                }
                ImportDeclarationSpecifier::ImportDefaultSpecifier(s) => {
                    bindings.push(ImportBinding::new("default", s.local.name.as_str()));
                }
                ImportDeclarationSpecifier::ImportNamespaceSpecifier(s) => {
                    bindings.push(ImportBinding::new("*", s.local.name.as_str()));
                }
            }
        }
    }
    ImportStatement {
        specifier: decl.source.value.to_string(),
        bindings,
        type_only,
    }
}

/// Exported runtime bindings (named and default), in source order.
/// Type-only exports and re-exports from other modules are skipped.
pub fn discover_exports(source: &str) -> Vec<ExportedBinding> {
    let allocator = Allocator::default();
    let ret = Parser::new(&allocator, source, source_type()).parse();

    let mut exports: Vec<ExportedBinding> = Vec::new();
    let mut push = |exported: &str, local: &str| {
        if !exports.iter().any(|e| e.exported == exported) {
            exports.push(ExportedBinding {
                exported: exported.to_string(),
                local: local.to_string(),
            });
        }
    };

    for stmt in &ret.program.body {
        match stmt {
            Statement::ExportNamedDeclaration(decl) => {
                if decl.export_kind.is_type() {
                    continue;
                }
                if let Some(ref declaration) = decl.declaration {
                    let mut names = Vec::new();
                    declaration_names(declaration, &mut names);
                    for name in &names {
                        push(name, name);
                    }
                } else if decl.source.is_none() {
                    for specifier in &decl.specifiers {
                        if specifier.export_kind.is_type() {
                            continue;
                        }
                        push(
                            specifier.exported.name().as_str(),
                            specifier.local.name().as_str(),
                        );
                    }
                }
            }
            Statement::ExportDefaultDeclaration(decl) => match default_export_name(decl) {
                DefaultExport::Declared(name) => {
                    push("default", name);
                    push(name, name);
                }
                DefaultExport::Reference(name) => push("default", name),
                DefaultExport::Anonymous => push("default", DEFAULT_EXPORT_BINDING),
                DefaultExport::TypeOnly => {}
            },
            _ => {}
        }
    }

    exports
}

/// Top-level runtime names a unit declares, exported or not, in source order.
pub fn declared_names(source: &str) -> Vec<String> {
    let allocator = Allocator::default();
    let ret = Parser::new(&allocator, source, source_type()).parse();

    let mut names = Vec::new();
    for stmt in &ret.program.body {
        match stmt {
            Statement::ExportNamedDeclaration(decl) => {
                if let Some(ref declaration) = decl.declaration {
                    declaration_names(declaration, &mut names);
                }
            }
            Statement::ExportDefaultDeclaration(decl) => {
                if let DefaultExport::Declared(name) = default_export_name(decl) {
                    names.push(name.to_string());
                }
            }
            other => {
                if let Some(declaration) = other.as_declaration() {
                    declaration_names(declaration, &mut names);
                }
            }
        }
    }

    let mut seen = std::collections::HashSet::new();
    names.retain(|name| seen.insert(name.clone()));
    names
}

fn declaration_names(declaration: &Declaration<'_>, out: &mut Vec<String>) {
    match declaration {
        Declaration::VariableDeclaration(var) if !var.declare => {
            for declarator in &var.declarations {
                collect_binding_names(&declarator.id, out);
            }
        }
        Declaration::FunctionDeclaration(func) if !func.declare => {
            if let Some(ref id) = func.id {
                out.push(id.name.to_string());
            }
        }
        Declaration::ClassDeclaration(class) if !class.declare => {
            if let Some(ref id) = class.id {
                out.push(id.name.to_string());
            }
        }
        Declaration::TSEnumDeclaration(decl) if !decl.declare => {
            out.push(decl.id.name.to_string());
        }
        _ => {}
    }
}

fn collect_binding_names(pattern: &BindingPattern<'_>, out: &mut Vec<String>) {
    match pattern {
        BindingPattern::BindingIdentifier(id) => out.push(id.name.to_string()),
        BindingPattern::ObjectPattern(obj) => {
            for prop in &obj.properties {
                collect_binding_names(&prop.value, out);
            }
            if let Some(ref rest) = obj.rest {
                collect_binding_names(&rest.argument, out);
            }
        }
        BindingPattern::ArrayPattern(arr) => {
            for pattern in arr.elements.iter().flatten() {
                collect_binding_names(pattern, out);
            }
            if let Some(ref rest) = arr.rest {
                collect_binding_names(&rest.argument, out);
            }
        }
        BindingPattern::AssignmentPattern(assign) => collect_binding_names(&assign.left, out),
    }
}

enum DefaultExport<'s> {
    /// `export default function Name` / `export default class Name`.
    Declared(&'s str),
    /// `export default Name`.
    Reference(&'s str),
    Anonymous,
    /// `export default interface ...`.
    TypeOnly,
}

fn default_export_name<'s>(decl: &'s ExportDefaultDeclaration<'_>) -> DefaultExport<'s> {
    match &decl.declaration {
        ExportDefaultDeclarationKind::FunctionDeclaration(func) => match func.id {
            Some(ref id) => DefaultExport::Declared(id.name.as_str()),
            None => DefaultExport::Anonymous,
        },
        ExportDefaultDeclarationKind::ClassDeclaration(class) => match class.id {
            Some(ref id) => DefaultExport::Declared(id.name.as_str()),
            None => DefaultExport::Anonymous,
        },
        ExportDefaultDeclarationKind::TSInterfaceDeclaration(_) => DefaultExport::TypeOnly,
        ExportDefaultDeclarationKind::Identifier(ident) => {
            DefaultExport::Reference(ident.name.as_str())
        }
        _ => DefaultExport::Anonymous,
    }
}

// ---------------------------------------------------------------------------
// Module syntax removal
// ---------------------------------------------------------------------------

/// `(start, end, replacement)` over byte offsets of the parsed text.
type Edit = (u32, u32, String);

fn module_syntax_edits(program: &Program<'_>) -> Vec<Edit> {
    let mut edits = Vec::new();
    for stmt in &program.body {
        match stmt {
            Statement::ImportDeclaration(decl) => {
                edits.push((decl.span.start, decl.span.end, String::new()))
            }
            Statement::ExportAllDeclaration(decl) => {
                edits.push((decl.span.start, decl.span.end, String::new()))
            }
            Statement::TSExportAssignment(decl) => {
                edits.push((decl.span.start, decl.span.end, String::new()))
            }
            Statement::TSNamespaceExportDeclaration(decl) => {
                edits.push((decl.span.start, decl.span.end, String::new()))
            }
            Statement::ExportNamedDeclaration(decl) => edits.push(named_export_edit(decl)),
            Statement::ExportDefaultDeclaration(decl) => edits.extend(default_export_edits(decl)),
            _ => {}
        }
    }
    edits
}

fn named_export_edit(decl: &ExportNamedDeclaration<'_>) -> Edit {
    if let Some(ref declaration) = decl.declaration {
        return (decl.span.start, declaration.span().start, String::new());
    }
    // `export { x as default }` still has to reach the registration trailer.
    let alias = if decl.source.is_none() && !decl.export_kind.is_type() {
        decl.specifiers
            .iter()
            .find(|s| !s.export_kind.is_type() && s.exported.name().as_str() == "default")
            .map(|s| format!("const {} = {};", DEFAULT_EXPORT_BINDING, s.local.name()))
    } else {
        None
    };
    (decl.span.start, decl.span.end, alias.unwrap_or_default())
}

fn default_export_edits(decl: &ExportDefaultDeclaration<'_>) -> Vec<Edit> {
    let start = decl.span.start;
    let end = decl.span.end;
    let body = decl.declaration.span().start;
    let bind = format!("const {} = ", DEFAULT_EXPORT_BINDING);
    match default_export_name(decl) {
        DefaultExport::Declared(name) => vec![
            (start, body, String::new()),
            (end, end, format!("\nconst {} = {};", DEFAULT_EXPORT_BINDING, name)),
        ],
        DefaultExport::TypeOnly => vec![(start, body, String::new())],
        DefaultExport::Anonymous
            if matches!(
                decl.declaration,
                ExportDefaultDeclarationKind::FunctionDeclaration(_)
                    | ExportDefaultDeclarationKind::ClassDeclaration(_)
            ) =>
        {
            vec![(start, body, bind), (end, end, ";".to_string())]
        }
        DefaultExport::Reference(_) | DefaultExport::Anonymous => vec![(start, body, bind)],
    }
}

fn apply_edits(source: &str, mut edits: Vec<Edit>) -> String {
    // Reverse order keeps earlier offsets valid.
    edits.sort_by(|a, b| b.0.cmp(&a.0));
    let mut result = source.to_string();
    for (start, end, replacement) in edits {
        result.replace_range((start as usize)..(end as usize), &replacement);
    }
    result
}

// ---------------------------------------------------------------------------
// Transform
// ---------------------------------------------------------------------------

/// Rendering runtime entry points used by lowered markup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JsxOptions {
    /// Element factory, e.g. `React.createElement`.
    pub pragma: String,
    /// Fragment component, e.g. `React.Fragment`.
    pub fragment: String,
}

impl Default for JsxOptions {
    fn default() -> Self {
        Self {
            pragma: "React.createElement".to_string(),
            fragment: "React.Fragment".to_string(),
        }
    }
}

/// Options for [`transform_source`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransformOptions {
    pub jsx: JsxOptions,
    /// Lower markup into explicit runtime calls. Disable when the realm
    /// compiles markup itself.
    pub lower_markup: bool,
}

impl Default for TransformOptions {
    fn default() -> Self {
        Self {
            jsx: JsxOptions::default(),
            lower_markup: true,
        }
    }
}

impl TransformOptions {
    fn to_oxc(&self) -> OxcTransformOptions {
        OxcTransformOptions {
            jsx: OxcJsxOptions {
                jsx_plugin: self.lower_markup,
                runtime: JsxRuntime::Classic,
                pragma: Some(self.jsx.pragma.clone()),
                pragma_frag: Some(self.jsx.fragment.clone()),
                pure: false,
                throw_if_namespace: false,
                ..OxcJsxOptions::default()
            },
            ..OxcTransformOptions::default()
        }
    }
}

/// Remove import declarations and unwrap exports without touching anything
/// else. Fails on unparseable source.
pub fn flatten_module_syntax(source: &str) -> Result<String, PreviewError> {
    let allocator = Allocator::default();
    let ret = Parser::new(&allocator, source, source_type()).parse();
    if let Some(error) = ret.errors.first() {
        return Err(PreviewError::Transform(error.to_string()));
    }
    Ok(apply_edits(source, module_syntax_edits(&ret.program)))
}

/// Full unit transform: normalize line endings, flatten module syntax, strip
/// types, lower markup, print. Applying it to its own output is a no-op.
pub fn transform_source(source: &str, options: &TransformOptions) -> Result<String, PreviewError> {
    let source = source.replace("\r\n", "\n");
    let flat = flatten_module_syntax(&source)?;

    let allocator = Allocator::default();
    let ret = Parser::new(&allocator, &flat, source_type()).parse();
    if let Some(error) = ret.errors.first() {
        return Err(PreviewError::Transform(error.to_string()));
    }
    let mut program = ret.program;

    let scoping = SemanticBuilder::new().build(&program).semantic.into_scoping();
    let ret = Transformer::new(&allocator, Path::new(UNIT_PATH), &options.to_oxc())
        .build_with_scoping(scoping, &mut program);
    if let Some(error) = ret.errors.first() {
        return Err(PreviewError::Transform(error.to_string()));
    }

    Ok(Codegen::new().build(&program).code)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn flat(source: &str) -> String {
        flatten_module_syntax(source).unwrap()
    }

    fn transform(source: &str) -> String {
        transform_source(source, &TransformOptions::default()).unwrap()
    }

    #[test]
    fn drops_every_import_form() {
        let src = "import React from 'react';\nimport { cn } from \"@/lib/utils\";\nimport './styles.css';\nimport {\n  Dialog,\n  DialogContent,\n} from './dialog';\nimport type { Props } from './types';\nconst a = 1;\n";
        assert_eq!(flat(src).trim(), "const a = 1;");
    }

    #[test]
    fn leaves_dynamic_import_alone() {
        let src = "const m = import('./lazy');\n";
        assert_eq!(flat(src), src);
    }

    #[test]
    fn unwraps_named_exports() {
        let src = "export const Button = () => null;\nexport function helper() {}\nexport interface Props { a: string }\nexport type Size = 'sm';\n";
        assert_eq!(
            flat(src),
            "const Button = () => null;\nfunction helper() {}\ninterface Props { a: string }\ntype Size = 'sm';\n"
        );
    }

    #[test]
    fn named_default_exports_keep_their_name_and_alias_it() {
        assert_eq!(
            flat("export default function Card() {}\n"),
            "function Card() {}\nconst __default_export__ = Card;\n"
        );
        assert_eq!(
            flat("export default class Widget {}\n"),
            "class Widget {}\nconst __default_export__ = Widget;\n"
        );
    }

    #[test]
    fn anonymous_default_exports_bind_the_default_name() {
        assert_eq!(
            flat("export default function () {}\n"),
            "const __default_export__ = function () {};\n"
        );
        assert_eq!(
            flat("const Card = 1;\nexport default Card;\n"),
            "const Card = 1;\nconst __default_export__ = Card;\n"
        );
        assert_eq!(
            flat("export default memo(Card);\n"),
            "const __default_export__ = memo(Card);\n"
        );
    }

    #[test]
    fn removes_export_lists_and_reexports() {
        let src = "const a = 1;\nexport { a };\nexport {\n  a as b,\n};\nexport * from './x';\nexport { c } from './c';\n";
        assert_eq!(flat(src).trim(), "const a = 1;");
    }

    #[test]
    fn default_export_lists_bind_the_default_name() {
        let src = "const Card = 1;\nexport { Card as default };\n";
        assert_eq!(flat(src), "const Card = 1;\nconst __default_export__ = Card;\n");
    }

    #[test]
    fn extracts_import_bindings() {
        let src = "import React, { useState as useS, type FC } from 'react';\nimport * as utils from './utils';\nimport {\n  Spinner,\n} from './Spinner';\nimport './global.css';\nimport type { Props } from './types';\n";
        let imports = extract_imports(src);
        assert_eq!(imports.len(), 5);
        assert_eq!(imports[0].specifier, "react");
        assert_eq!(
            imports[0].bindings,
            vec![
                ImportBinding::new("default", "React"),
                ImportBinding::new("useState", "useS"),
            ]
        );
        assert_eq!(imports[1].bindings, vec![ImportBinding::new("*", "utils")]);
        assert_eq!(imports[2].bindings, vec![ImportBinding::new("Spinner", "Spinner")]);
        assert_eq!(imports[3].specifier, "./global.css");
        assert!(imports[3].bindings.is_empty());
        assert!(imports[4].type_only);
        assert!(imports[4].bindings.is_empty());
    }

    #[test]
    fn discovers_exports() {
        let src = "export const A = 1;\nexport async function load() {}\nconst hidden = 2;\nexport { hidden as visible };\nexport interface P {}\nexport enum Tone { Warm }\nexport default function Main() {}\n";
        let names: Vec<_> = discover_exports(src)
            .into_iter()
            .map(|e| (e.exported, e.local))
            .collect();
        assert_eq!(
            names,
            vec![
                ("A".to_string(), "A".to_string()),
                ("load".to_string(), "load".to_string()),
                ("visible".to_string(), "hidden".to_string()),
                ("Tone".to_string(), "Tone".to_string()),
                ("default".to_string(), "Main".to_string()),
                ("Main".to_string(), "Main".to_string()),
            ]
        );
    }

    #[test]
    fn discovers_anonymous_default() {
        let exports = discover_exports("export default () => null;\n");
        assert_eq!(
            exports,
            vec![ExportedBinding {
                exported: "default".into(),
                local: DEFAULT_EXPORT_BINDING.into(),
            }]
        );
    }

    #[test]
    fn declared_names_cover_patterns_and_exports() {
        let src = "import { x } from './x';\nconst { a, b: [c], ...rest } = x;\nexport function f() {}\nexport default class Shell {}\ndeclare const ambient: number;\nlet a2 = 1;\n";
        assert_eq!(declared_names(src), vec!["a", "c", "rest", "f", "Shell", "a2"]);
    }

    #[test]
    fn strips_types_and_lowers_markup() {
        let out = transform(
            "interface Props { label: string }\nexport const Button = ({ label }: Props): JSX.Element => <button>{label}</button>;",
        );
        assert!(!out.contains("interface"), "{}", out);
        assert!(!out.contains(": Props"), "{}", out);
        assert!(!out.contains("JSX.Element"), "{}", out);
        assert!(!out.contains("export"), "{}", out);
        assert!(out.contains("const Button = ({ label }) =>"), "{}", out);
        assert!(out.contains("React.createElement(\"button\", null, label)"), "{}", out);
    }

    #[test]
    fn fragments_and_custom_pragma() {
        let options = TransformOptions {
            jsx: JsxOptions {
                pragma: "h".into(),
                fragment: "Frag".into(),
            },
            ..TransformOptions::default()
        };
        let out = transform_source("const A = () => <><b /></>;", &options).unwrap();
        assert!(out.contains("h(Frag, null, h(\"b\", null))"), "{}", out);
    }

    #[test]
    fn markup_can_be_left_for_the_realm() {
        let options = TransformOptions {
            lower_markup: false,
            ..TransformOptions::default()
        };
        let out = transform_source("const A = (p: { n: number }) => <b>{p.n}</b>;", &options).unwrap();
        assert!(out.contains("<b>"), "{}", out);
        assert!(!out.contains("number"), "{}", out);
    }

    #[test]
    fn syntax_errors_are_transform_errors() {
        let err = transform_source("const = ;", &TransformOptions::default()).unwrap_err();
        assert!(matches!(err, PreviewError::Transform(_)));
    }

    #[test]
    fn transform_is_idempotent() {
        let src = "import { Spinner } from './Spinner';\nexport const Button = () => <Spinner size={2} />;\n";
        let once = transform(src);
        let twice = transform(&once);
        assert_eq!(once, twice);
        assert!(!once.contains("import"));
        assert!(!once.contains("export"));
        assert!(once.contains("React.createElement(Spinner, { size: 2 })"), "{}", once);
    }

    #[test]
    fn plain_script_passes_through() {
        let src = "const a = 1;\n";
        assert_eq!(transform(src), src);
    }
}
