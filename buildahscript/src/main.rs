mod env;

use anyhow::{Context, Result};
use capsules_buildah::{load_from_env, Buildah, ToolConfig};
use clap::builder::FalseyValueParser;
use clap::Parser;
use engine::{BuildScript, Capabilities, Outcome};
use serde_json::json;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Command;
use std::rc::Rc;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use crate::env::{path_with_runc, DependencyEnv, RUNC_DIRS};

/// Set by `buildah unshare` inside the user namespace it creates.
const USERNS_ENV: &str = "_CONTAINERS_USERNS_CONFIGURED";

#[derive(Parser)]
#[command(name = "buildahscript", version, about = "Build container images from scripts")]
struct Cli {
    /// Build argument passed to the script (repeatable)
    #[arg(long = "build-arg", value_name = "NAME=VALUE", value_parser = parse_key_val)]
    build_args: Vec<(String, String)>,
    /// Tag applied to the produced image (repeatable)
    #[arg(short = 't', long = "tag", value_name = "NAME")]
    tags: Vec<String>,
    /// buildah executable
    #[arg(long, env = "BUILDAH_BIN")]
    buildah: Option<String>,
    /// Run in the current namespace instead of under `buildah unshare`
    #[arg(long, env = "BUILDAHSCRIPT_NO_UNSHARE", value_parser = FalseyValueParser::new())]
    no_unshare: bool,
    /// Parse and bind only; print the resolved metadata as JSON
    #[arg(long)]
    check: bool,
    /// Path to the build script
    #[arg(value_name = "FILE")]
    file: PathBuf,
}

fn parse_key_val(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((name, value)) if !name.is_empty() => Ok((name.to_string(), value.to_string())),
        _ => Err(format!("expected NAME=VALUE, got `{}`", s)),
    }
}

fn init_tracing(debug: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if debug { "info" } else { "warn" }));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

fn main() -> Result<()> {
    let tool = load_from_env();
    init_tracing(tool.debug);
    let cli = Cli::parse();
    let tool = tool.with_program(cli.buildah.as_deref());

    let script = BuildScript::from_file(&cli.file)?;
    let raw: BTreeMap<String, String> = cli.build_args.iter().cloned().collect();

    if cli.check {
        return check(&script, &raw);
    }
    if cli.no_unshare || std::env::var_os(USERNS_ENV).is_some() {
        return build(&cli, &tool, &script, &raw);
    }
    let code = reexec(&tool, &script)?;
    std::process::exit(code);
}

fn check(script: &BuildScript, raw: &BTreeMap<String, String>) -> Result<()> {
    let bound = script.bind(raw)?;
    let metadata = script.metadata();
    let report = json!({
        "dependencies": metadata.dependencies,
        "parameters": metadata.parameters,
        "bound": bound,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn build(
    cli: &Cli,
    tool: &ToolConfig,
    script: &BuildScript,
    raw: &BTreeMap<String, String>,
) -> Result<()> {
    let params = script.bind(raw)?;
    let caps = Capabilities::new(Buildah::new(Rc::new(tool.runner())));
    let outcome = script
        .execute(&params, &caps)
        .with_context(|| format!("{} failed", cli.file.display()))?;

    match outcome {
        Outcome::Produced(image) => {
            for tag in &cli.tags {
                image
                    .add_tag(tag)
                    .with_context(|| format!("failed to tag {} as {}", image, tag))?;
            }
            println!("{}", image);
        }
        Outcome::Empty => info!(file = %cli.file.display(), "script produced no image"),
    }
    Ok(())
}

/// Run this same command line again under `buildah unshare`, returning the
/// child's exit code.
fn reexec(tool: &ToolConfig, script: &BuildScript) -> Result<i32> {
    let dependencies = &script.metadata().dependencies;
    let deps = if dependencies.is_empty() {
        None
    } else {
        Some(DependencyEnv::provision(dependencies)?)
    };

    let exe = std::env::current_exe().context("cannot locate the buildahscript executable")?;
    let mut cmd = Command::new(&tool.program);
    cmd.arg("unshare").arg(exe).args(std::env::args_os().skip(1));
    let candidates: Vec<PathBuf> = RUNC_DIRS.iter().map(PathBuf::from).collect();
    if let Some(path) = path_with_runc(std::env::var_os("PATH"), &candidates) {
        cmd.env("PATH", path);
    }
    if let Some(deps) = &deps {
        deps.apply(&mut cmd)?;
    }

    info!(program = %tool.program, "re-running under buildah unshare");
    let status = cmd
        .status()
        .with_context(|| format!("failed to run {} unshare", tool.program))?;
    drop(deps);
    Ok(status.code().unwrap_or(1))
}
