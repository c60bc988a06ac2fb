use std::fs;

use pretty_assertions::assert_eq;
use preview_sandbox::bundle::{DEPENDENCIES_END_MARKER, DEPENDENCIES_START_MARKER};
use preview_sandbox::resolver::{FsReader, MemoryReader};
use preview_sandbox::stubs::IconAsset;
use preview_sandbox::transform::{transform_source, TransformOptions};
use preview_sandbox::{compile_preview, ComponentUnit, PreviewError, PreviewOptions};

fn unit(name: &str, path: &str, source: &str) -> ComponentUnit {
    ComponentUnit {
        name: name.into(),
        raw_source: source.into(),
        declared_local_imports: Vec::new(),
        file_path: path.into(),
        explicit_dependency_paths: Vec::new(),
    }
}

// ============================================================================
// Button / Spinner
// ============================================================================

#[tokio::test]
async fn button_with_spinner_dependency() {
    let reader: MemoryReader = [(
        "/app/src/Spinner.tsx",
        "export const Spinner = () => <span className=\"spinner\" />;",
    )]
    .into_iter()
    .collect();
    let button = unit(
        "Button",
        "/app/src/Button.tsx",
        "import {Spinner} from './Spinner'; export const Button = () => <Spinner/>;",
    );

    let out = compile_preview(&button, &PreviewOptions::default(), &reader)
        .await
        .expect("bundle should succeed");

    assert_eq!(out.dependencies, vec!["/app/src/Spinner.tsx".to_string()]);
    assert!(out.unresolved.is_empty());

    let spinner_at = out.code.find("const Spinner = () =>").expect("spinner block");
    let button_at = out.code.find("const Button = () =>").expect("button block");
    assert!(spinner_at < button_at);

    let start = out.code.find(DEPENDENCIES_START_MARKER).unwrap();
    let end = out.code.find(DEPENDENCIES_END_MARKER).unwrap();
    assert!(start < spinner_at && spinner_at < end && end < button_at);

    // No module syntax survives.
    assert!(!out.code.contains("import {"));
    assert!(!out.code.contains("export const"));

    assert!(out.code.contains("React.createElement(Spinner, null)"));
    assert!(out
        .code
        .contains("if (typeof Spinner !== \"undefined\") globalThis[\"Spinner\"] = Spinner;"));
    assert!(out.code.contains("typeof Button !== \"undefined\" ? Button : undefined"));
    assert!(out.code.contains("globalThis[\"__PREVIEW_COMPONENT__\"]"));
}

#[tokio::test]
async fn stubs_are_not_emitted_for_bundled_names() {
    let reader: MemoryReader = [(
        "/app/src/lib/utils.ts",
        "export function cn(...parts) { return parts.filter(Boolean).join(' '); }",
    )]
    .into_iter()
    .collect();
    let card = unit(
        "Card",
        "/app/src/Card.tsx",
        "import { cn } from '@/lib/utils';\nimport { ArrowRight } from 'lucide-react';\nexport function Card() { return <div className={cn('card')}><ArrowRight size={12} /></div>; }",
    );
    let options = PreviewOptions {
        resolver: preview_sandbox::resolver::ResolverConfig {
            project_root: "/app".into(),
            ..Default::default()
        },
        icons: vec![IconAsset {
            name: "arrow-right".into(),
            svg: "<path d=\"M5 12h14\"/>".into(),
            view_box: None,
        }],
        ..Default::default()
    };

    let out = compile_preview(&card, &options, &reader).await.unwrap();
    assert!(!out.code.contains("function cn()"));
    assert!(out.code.contains("function cn(...parts)"));
    assert!(out.code.contains("function ArrowRight(props)"));
    assert!(out.code.contains("const useState = React.useState;"));
}

#[tokio::test]
async fn unresolved_imports_are_reported_to_the_caller() {
    let reader = MemoryReader::new();
    let widget = unit(
        "Widget",
        "/app/src/Widget.tsx",
        "import { Tooltip } from './Tooltip';\nexport const Widget = () => <Tooltip />;",
    );

    let out = compile_preview(&widget, &PreviewOptions::default(), &reader)
        .await
        .unwrap();
    assert_eq!(out.unresolved.len(), 1);
    assert_eq!(out.unresolved[0].specifier, "./Tooltip");
    assert!(out.dependencies.is_empty());
}

#[tokio::test]
async fn empty_source_is_rejected() {
    let reader = MemoryReader::new();
    let err = compile_preview(&unit("Empty", "/a.tsx", "   "), &PreviewOptions::default(), &reader)
        .await
        .unwrap_err();
    assert!(matches!(err, PreviewError::Validation(_)));
}

// ============================================================================
// Transform
// ============================================================================

#[test]
fn transforming_transformed_source_is_a_no_op() {
    let source = "import React, { useState } from 'react';\nimport {\n  Spinner,\n  Label,\n} from './parts';\nimport type { Props } from './types';\nexport default function Button(props: Props) {\n  return <button>{props.label}</button>;\n}\nexport { Button as Btn };\nexport * from './more';\n";
    let options = TransformOptions::default();
    let once = transform_source(source, &options).unwrap();
    let twice = transform_source(&once, &options).unwrap();
    assert_eq!(once, twice);
    assert!(!once.contains("import"));
    assert!(!once.contains("export"));
    assert!(once.contains("function Button(props)"));
    assert!(once.contains("const __default_export__ = Button;"));
}

// ============================================================================
// Filesystem
// ============================================================================

#[tokio::test]
async fn resolves_against_the_filesystem() {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let src = dir.path().join("src");
    fs::create_dir_all(src.join("icons")).expect("Failed to create dirs");
    fs::write(
        src.join("icons").join("index.ts"),
        "export const Check = () => null;",
    )
    .expect("Failed to write icons");
    fs::write(
        src.join("Badge.tsx"),
        "import { Check } from './icons';\nexport const Badge = () => <Check />;",
    )
    .expect("Failed to write badge");

    let badge_path = src.join("Badge.tsx").to_string_lossy().to_string();
    let badge_source = fs::read_to_string(&badge_path).unwrap();
    let out = compile_preview(
        &unit("Badge", &badge_path, &badge_source),
        &PreviewOptions::default(),
        &FsReader,
    )
    .await
    .unwrap();

    assert_eq!(out.dependencies.len(), 1);
    assert!(out.dependencies[0].ends_with("/src/icons/index.ts"));
    assert!(out.unresolved.is_empty());
}
