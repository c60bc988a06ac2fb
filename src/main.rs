use std::env;
use std::io::{self, Read};
use std::path::PathBuf;
use std::process;

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use tracing_subscriber::EnvFilter;

use preview_sandbox::resolver::FsReader;
use preview_sandbox::utils::normalize_path;
use preview_sandbox::{compile_preview, ComponentUnit, PreviewOptions};

/// Stdin payload: either a bare component unit, or a unit with inline
/// options.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum BundlerInput {
    WithOptions {
        unit: ComponentUnit,
        options: PreviewOptions,
    },
    Unit(ComponentUnit),
}

#[derive(Debug, Default)]
struct CliArgs {
    config: Option<PathBuf>,
    root: Option<String>,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(io::stderr)
        .init();

    if let Err(err) = run() {
        eprintln!("[preview-bundle] {:#}", err);
        process::exit(1);
    }
}

fn run() -> Result<()> {
    let args = parse_args(env::args().skip(1))?;

    let mut raw = String::new();
    io::stdin()
        .read_to_string(&mut raw)
        .context("failed to read stdin")?;
    if raw.trim().is_empty() {
        bail!("expected a component unit as JSON on stdin");
    }

    let input: BundlerInput =
        serde_json::from_str(&raw).context("invalid component unit JSON on stdin")?;
    let (unit, inline_options) = match input {
        BundlerInput::WithOptions { unit, options } => (unit, Some(options)),
        BundlerInput::Unit(unit) => (unit, None),
    };

    let mut options = match (inline_options, args.config) {
        (Some(options), _) => options,
        (None, Some(path)) => load_options(&path)?,
        (None, None) => PreviewOptions::default(),
    };
    if let Some(root) = args.root {
        options.resolver.project_root = normalize_path(&root);
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")?;
    let compiled = runtime
        .block_on(compile_preview(&unit, &options, &FsReader))
        .with_context(|| format!("failed to compile {}", unit.name))?;

    for unresolved in &compiled.unresolved {
        tracing::warn!(
            "unresolved import '{}' in {}",
            unresolved.specifier,
            unresolved.importer
        );
    }

    let output = serde_json::to_string(&compiled).context("failed to serialize output")?;
    println!("{}", output);
    Ok(())
}

fn load_options(path: &PathBuf) -> Result<PreviewOptions> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("invalid config {}", path.display()))
}

fn parse_args<I: Iterator<Item = String>>(mut args: I) -> Result<CliArgs> {
    let mut parsed = CliArgs::default();

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" => {
                let value = args.next().context("missing value for --config")?;
                parsed.config = Some(PathBuf::from(value));
            }
            "--root" => {
                let value = args.next().context("missing value for --root")?;
                parsed.root = Some(value);
            }
            _ => {
                bail!(
                    "unknown argument '{arg}'. usage: preview-bundle [--config <path>] [--root <dir>]"
                );
            }
        }
    }

    Ok(parsed)
}
