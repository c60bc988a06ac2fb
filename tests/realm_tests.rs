//! Sandbox loads against the V8-backed realm: bundles really evaluate, the
//! registration trailer really runs and the document really renders.

#![cfg(feature = "deno")]

use std::collections::BTreeMap;

use pretty_assertions::assert_eq;
use serde_json::{json, Value};

use preview_sandbox::css::PseudoState;
use preview_sandbox::protocol::{
    ComponentType, HostMessage, LoadComponent, OverrideGroup, Props, SandboxEvent, StyleMap,
};
use preview_sandbox::resolver::MemoryReader;
use preview_sandbox::sandbox::dom;
use preview_sandbox::sandbox::{
    Binding, BundleSignal, DenoRealm, Phase, Realm, Sandbox, SandboxConfig,
};
use preview_sandbox::{compile_preview, ComponentUnit, PreviewOptions};

const BUTTON_CSS: &str = ".btn { cursor: default; padding: 4px }\n.btn:hover { cursor: pointer }";

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn sandbox() -> Sandbox<DenoRealm> {
    Sandbox::new(
        DenoRealm::new().expect("realm should start"),
        DenoRealm::baseline_scope(),
        SandboxConfig::default(),
    )
}

async fn compile_with(
    name: &str,
    source: &str,
    files: &[(&str, &str)],
    options: &PreviewOptions,
) -> String {
    let reader: MemoryReader = files.iter().copied().collect();
    let unit = ComponentUnit {
        name: name.into(),
        raw_source: source.into(),
        declared_local_imports: Vec::new(),
        file_path: format!("/app/src/{}.tsx", name),
        explicit_dependency_paths: Vec::new(),
    };
    compile_preview(&unit, options, &reader)
        .await
        .expect("compile should succeed")
        .code
}

async fn compile(name: &str, source: &str) -> String {
    compile_with(name, source, &[], &PreviewOptions::default()).await
}

async fn button_bundle() -> String {
    compile_with(
        "Button",
        "import { Spinner } from './Spinner';\nexport const Button = (props) => <button className=\"btn\">{props.label}<Spinner /></button>;",
        &[(
            "/app/src/Spinner.tsx",
            "function helper() { return 1; }\nexport const Spinner = () => <span className=\"spin\" />;",
        )],
        &PreviewOptions::default(),
    )
    .await
}

fn load(code: &str, name: &str, generation: u64) -> LoadComponent {
    LoadComponent {
        code: code.into(),
        css: Some(BUTTON_CSS.into()),
        component_name: name.into(),
        generation,
        ..Default::default()
    }
}

fn props(pairs: &[(&str, Value)]) -> Props {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

fn root_tag(sandbox: &Sandbox<DenoRealm>) -> Option<String> {
    sandbox.realm().root_element().map(|root| root.tag_name)
}

fn root_text(sandbox: &Sandbox<DenoRealm>) -> Option<String> {
    sandbox.realm().root_element().and_then(|root| root.text)
}

fn count(sandbox: &Sandbox<DenoRealm>, selector: &str) -> usize {
    dom::select(sandbox.realm().document_snapshot(), selector).len()
}

fn root_styles(events: &[SandboxEvent]) -> StyleMap {
    events
        .iter()
        .find_map(|event| match event {
            SandboxEvent::ComputedStyles {
                styles,
                sub_selector: None,
            } => Some(styles.clone()),
            _ => None,
        })
        .expect("expected root computed styles")
}

async fn run_extraction(sandbox: &mut Sandbox<DenoRealm>) -> Vec<SandboxEvent> {
    let mut events = Vec::new();
    while let Some(due) = sandbox.extraction_deadline() {
        tokio::time::advance(due - tokio::time::Instant::now()).await;
        events.extend(sandbox.poll_extraction());
    }
    events
}

// ============================================================================
// Evaluation and registration
// ============================================================================

#[tokio::test(start_paused = true)]
async fn load_renders_into_the_document() {
    let code = button_bundle().await;
    let mut sandbox = sandbox();
    let mut message = load(&code, "Button", 1);
    message.props = props(&[("label", json!("Save"))]);

    let events = sandbox.handle(HostMessage::LoadComponent(message));
    assert_eq!(events, vec![SandboxEvent::RenderSuccess { generation: 1 }]);
    assert_eq!(sandbox.phase(), Phase::Rendered);

    let root = sandbox.realm().root_element().unwrap();
    assert_eq!(root.tag_name, "button");
    assert_eq!(root.selector, "button.btn");
    assert_eq!(root.text.as_deref(), Some("Save"));
    assert_eq!(count(&sandbox, "button.btn > span.spin"), 1);

    let scope = sandbox.scope();
    assert!(scope.get("Spinner").and_then(Binding::as_callable).is_some());
    assert!(scope.get("Button").and_then(Binding::as_callable).is_some());
    assert!(!scope.contains("helper"));
}

#[tokio::test(start_paused = true)]
async fn trailer_posts_the_evaluated_signal() {
    let code = button_bundle().await;
    let mut sandbox = sandbox();
    sandbox.handle(HostMessage::LoadComponent(load(&code, "Button", 1)));
    assert_eq!(
        sandbox.realm().signals(),
        &[BundleSignal {
            kind: "BUNDLE_EVALUATED".into(),
            found: true,
            component_name: "Button".into(),
        }]
    );
    assert!(sandbox
        .scope()
        .get("__PREVIEW_COMPONENT__")
        .and_then(Binding::as_callable)
        .is_some());
    assert_eq!(
        sandbox.scope().get("__PREVIEW_RENDER__"),
        Some(&Binding::Value(Value::Null))
    );
}

#[tokio::test(start_paused = true)]
async fn globals_are_released_between_loads() {
    let code = button_bundle().await;
    let mut sandbox = sandbox();
    sandbox.handle(HostMessage::LoadComponent(load(&code, "Button", 1)));
    assert!(sandbox.state().declared_names.contains(&"Spinner".to_string()));

    let leak_check = compile(
        "LeakCheck",
        "export function LeakCheck() {\n  return <p className=\"leak\">{typeof Spinner === \"undefined\" && typeof Button === \"undefined\" ? \"clean\" : \"leaked\"}</p>;\n}",
    )
    .await;
    let events = sandbox.handle(HostMessage::LoadComponent(load(&leak_check, "LeakCheck", 2)));
    assert_eq!(events, vec![SandboxEvent::RenderSuccess { generation: 2 }]);

    assert_eq!(root_text(&sandbox).as_deref(), Some("clean"));
    let scope = sandbox.scope();
    assert!(!scope.contains("Button"));
    assert!(!scope.contains("Spinner"));
    assert!(scope.contains("LeakCheck"));
    assert!(scope.contains("React"));
    assert_eq!(count(&sandbox, "button"), 0);
}

#[tokio::test(start_paused = true)]
async fn named_default_export_registers_under_the_unit_name() {
    let code = compile(
        "Button",
        "export default function MyButton() {\n  return <button className=\"mine\">Hi</button>;\n}",
    )
    .await;
    let mut sandbox = sandbox();
    let events = sandbox.handle(HostMessage::LoadComponent(load(&code, "Button", 1)));
    assert_eq!(events, vec![SandboxEvent::RenderSuccess { generation: 1 }]);

    assert_eq!(sandbox.realm().root_element().unwrap().selector, "button.mine");
    assert!(sandbox.realm().signals()[0].found);
    assert!(sandbox.scope().get("Button").and_then(Binding::as_callable).is_some());
    assert!(sandbox.scope().get("MyButton").and_then(Binding::as_callable).is_some());
}

#[tokio::test(start_paused = true)]
async fn the_name_wins_over_the_default_export() {
    let code = compile(
        "Button",
        "export function Button() { return <b>named</b>; }\nexport default function Other() { return <i>default</i>; }",
    )
    .await;
    let mut sandbox = sandbox();
    sandbox.handle(HostMessage::LoadComponent(load(&code, "Button", 1)));
    assert_eq!(root_tag(&sandbox).as_deref(), Some("b"));
}

#[tokio::test(start_paused = true)]
async fn wrapper_result_objects_are_unwrapped() {
    let code = compile(
        "Button",
        "const Button = { default: function Inner() { return <em>wrapped</em>; } };\nexport { Button };",
    )
    .await;
    let mut sandbox = sandbox();
    let events = sandbox.handle(HostMessage::LoadComponent(load(&code, "Button", 1)));
    assert_eq!(events, vec![SandboxEvent::RenderSuccess { generation: 1 }]);
    assert_eq!(root_tag(&sandbox).as_deref(), Some("em"));
    assert_eq!(root_text(&sandbox).as_deref(), Some("wrapped"));
}

#[tokio::test(start_paused = true)]
async fn missing_component_reports_nearby_names() {
    let code = compile(
        "Button",
        "export function ButtonGroup() { return <div />; }\nexport function Toolbar() { return <div />; }",
    )
    .await;
    let mut sandbox = sandbox();
    let events = sandbox.handle(HostMessage::LoadComponent(load(&code, "Button", 3)));

    match &events[..] {
        [SandboxEvent::LoadError { error, generation }] => {
            assert_eq!(*generation, 3);
            assert!(error.contains("Component 'Button' not found"), "{}", error);
            assert!(error.contains("Available: "), "{}", error);
            assert!(error.contains("ButtonGroup"), "{}", error);
        }
        other => panic!("unexpected events {:?}", other),
    }
    assert!(!sandbox.realm().signals()[0].found);
    assert_eq!(count(&sandbox, "[data-preview-error]"), 1);
    assert!(sandbox.realm().root_element().is_none());
}

#[tokio::test(start_paused = true)]
async fn evaluation_errors_leave_no_globals_behind() {
    let mut sandbox = sandbox();
    let code = "function Partial() {}\nglobalThis.stray = 1;\nthrow new Error(\"boom\");";
    let events = sandbox.handle(HostMessage::LoadComponent(load(code, "Partial", 9)));

    match &events[..] {
        [SandboxEvent::LoadError { error, generation: 9 }] => {
            assert!(error.contains("boom"), "{}", error);
        }
        other => panic!("unexpected events {:?}", other),
    }
    assert_eq!(sandbox.phase(), Phase::Error);
    assert!(!sandbox.scope().contains("stray"));
    assert!(sandbox.state().declared_names.is_empty());

    // A later bundle does not see the half-evaluated one.
    let checker = compile(
        "Check",
        "export function Check() { return <p>{typeof stray}</p>; }",
    )
    .await;
    sandbox.handle(HostMessage::LoadComponent(load(&checker, "Check", 10)));
    assert_eq!(root_text(&sandbox).as_deref(), Some("undefined"));
}

#[tokio::test(start_paused = true)]
async fn render_errors_show_the_diagnostic_panel() {
    let code = compile(
        "Bomb",
        "export function Bomb() { throw new Error(\"kaboom\"); }",
    )
    .await;
    let mut sandbox = sandbox();
    let events = sandbox.handle(HostMessage::LoadComponent(load(&code, "Bomb", 2)));

    match &events[..] {
        [SandboxEvent::RenderError { error, generation: 2 }] => {
            assert!(error.contains("kaboom"), "{}", error);
        }
        other => panic!("unexpected events {:?}", other),
    }
    assert_eq!(count(&sandbox, "#preview-root > [data-preview-error]"), 1);
    assert_eq!(sandbox.extraction_deadline(), None);
}

// ============================================================================
// Rendering
// ============================================================================

#[tokio::test(start_paused = true)]
async fn prop_updates_rerender_without_reevaluating() {
    let code = compile(
        "Label",
        "export function Label(props) {\n  return <span className=\"label\">{props.text ?? \"fallback\"}</span>;\n}",
    )
    .await;
    let mut sandbox = sandbox();
    let mut message = load(&code, "Label", 1);
    message.props = props(&[("text", json!("One"))]);
    sandbox.handle(HostMessage::LoadComponent(message));
    assert_eq!(root_text(&sandbox).as_deref(), Some("One"));

    let events = sandbox.handle(HostMessage::UpdateProps {
        props: props(&[("text", json!("Two"))]),
    });
    assert_eq!(events, vec![SandboxEvent::RenderSuccess { generation: 1 }]);
    assert_eq!(root_text(&sandbox).as_deref(), Some("Two"));

    sandbox.handle(HostMessage::UpdateProps {
        props: props(&[("text", Value::Null)]),
    });
    assert_eq!(root_text(&sandbox).as_deref(), Some("fallback"));
}

#[tokio::test(start_paused = true)]
async fn composite_templates_render_sibling_components() {
    let options = PreviewOptions {
        composite_template: Some("<Card {...props}><Badge /></Card>".into()),
        ..Default::default()
    };
    let code = compile_with(
        "Card",
        "export function Card(props) {\n  return <section className=\"card\"><h2>{props.title}</h2>{props.children}</section>;\n}\nexport function Badge() { return <i className=\"badge\">new</i>; }",
        &[],
        &options,
    )
    .await;
    let mut sandbox = sandbox();
    let mut message = load(&code, "Card", 1);
    message.component_type = ComponentType::Composite;
    message.props = props(&[("title", json!("Hello"))]);
    let events = sandbox.handle(HostMessage::LoadComponent(message));
    assert_eq!(events, vec![SandboxEvent::RenderSuccess { generation: 1 }]);

    assert!(sandbox.state().composite.is_some());
    assert_eq!(sandbox.realm().root_element().unwrap().selector, "section.card");
    assert_eq!(count(&sandbox, "section.card > i.badge"), 1);
    assert_eq!(count(&sandbox, "section.card > h2"), 1);
}

#[tokio::test(start_paused = true)]
async fn wrappers_and_element_props_apply() {
    let code = compile(
        "Field",
        "export function Frame(props) { return <div className=\"frame\">{props.children}</div>; }\nexport function Field() { return <label data-element=\"label\">Name</label>; }",
    )
    .await;
    let mut sandbox = sandbox();
    let mut message = load(&code, "Field", 1);
    message.wrapper = Some("Frame".into());
    message.element_props = Some(BTreeMap::from([(
        "label".to_string(),
        props(&[("title", json!("from host"))]),
    )]));
    sandbox.handle(HostMessage::LoadComponent(message));

    assert_eq!(sandbox.realm().root_element().unwrap().selector, "div.frame");
    let label = dom::select_first(sandbox.realm().document_snapshot(), "div.frame > label").unwrap();
    assert_eq!(
        label.last().unwrap().attributes.get("title").map(String::as_str),
        Some("from host")
    );
}

#[tokio::test(start_paused = true)]
async fn hooks_and_effects_settle_before_the_snapshot() {
    let code = compile(
        "Counter",
        "export function Counter() {\n  const [count, setCount] = useState(1);\n  useEffect(() => {\n    if (count < 3) setCount(count + 1);\n  }, [count]);\n  return <output>{count}</output>;\n}",
    )
    .await;
    let mut sandbox = sandbox();
    sandbox.handle(HostMessage::LoadComponent(load(&code, "Counter", 1)));
    assert_eq!(root_text(&sandbox).as_deref(), Some("3"));
}

#[tokio::test(start_paused = true)]
async fn portals_render_into_the_portal_root() {
    let code = compile(
        "Dialog",
        "export function Dialog() {\n  return <div className=\"dialog\">{createPortal(<p className=\"floating\">hi</p>)}</div>;\n}",
    )
    .await;
    let mut sandbox = sandbox();
    sandbox.handle(HostMessage::LoadComponent(load(&code, "Dialog", 1)));
    assert_eq!(count(&sandbox, "#preview-portal-root > p.floating"), 1);
    assert_eq!(count(&sandbox, "#preview-root p.floating"), 0);

    sandbox.handle(HostMessage::LoadComponent(load(&button_bundle().await, "Button", 2)));
    assert_eq!(count(&sandbox, "p.floating"), 0);
}

// ============================================================================
// Styles
// ============================================================================

#[tokio::test(start_paused = true)]
async fn computed_styles_follow_forced_state_and_overrides() {
    let code = button_bundle().await;
    let mut sandbox = sandbox();
    sandbox.handle(HostMessage::LoadComponent(load(&code, "Button", 1)));

    let events = run_extraction(&mut sandbox).await;
    assert_eq!(
        events[0],
        SandboxEvent::ComponentRootSelector {
            selector: "button.btn".into()
        }
    );
    let styles = root_styles(&events);
    assert_eq!(styles["cursor"], "default");
    assert_eq!(styles["padding"], "4px");

    let events = sandbox.handle(HostMessage::ForceState {
        state: PseudoState::Hover,
        component_css: None,
    });
    assert_eq!(root_styles(&events)["cursor"], "pointer");

    let events = sandbox.handle(HostMessage::ApplyStyleOverrides {
        override_groups: vec![OverrideGroup {
            selector: ".Button_root".into(),
            is_main_element: true,
            properties: BTreeMap::from([("padding".to_string(), "12px".to_string())]),
        }],
        selector: None,
        overrides: None,
    });
    assert_eq!(root_styles(&events)["padding"], "12px");

    let events = sandbox.handle(HostMessage::ForceState {
        state: PseudoState::Default,
        component_css: None,
    });
    let styles = root_styles(&events);
    assert_eq!(styles["cursor"], "default");
    assert_eq!(styles["padding"], "12px");
}

#[tokio::test(start_paused = true)]
async fn inspector_describes_rendered_elements() {
    let code = button_bundle().await;
    let mut sandbox = sandbox();
    sandbox.handle(HostMessage::LoadComponent(load(&code, "Button", 1)));
    run_extraction(&mut sandbox).await;
    sandbox.handle(HostMessage::UpdateCss {
        css: format!("{}\n.spin {{ width: 8px }}", BUTTON_CSS),
    });

    sandbox.handle(HostMessage::EnableInspector);
    match &sandbox.pick_element("button.btn .spin")[..] {
        [SandboxEvent::InspectorSelect { element_info, styles }] => {
            assert_eq!(element_info.tag_name, "span");
            assert_eq!(element_info.selector, "span.spin");
            assert_eq!(styles["width"], "8px");
            assert_eq!(styles["cursor"], "default");
        }
        other => panic!("unexpected events {:?}", other),
    }
}
