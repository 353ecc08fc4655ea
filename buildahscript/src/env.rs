use anyhow::{bail, Context, Result};
use std::env;
use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tempfile::TempDir;
use tracing::info;

pub const PIP_ENV: &str = "BUILDAHSCRIPT_PIP";
pub const DEPS_DIR_ENV: &str = "BUILDAHSCRIPT_DEPS_DIR";
const DEFAULT_PIP: &str = "pip";

/// Directories searched for `runc` when it is not already on `PATH`.
pub const RUNC_DIRS: &[&str] = &["/sbin", "/usr/sbin", "/usr/local/sbin"];

/// Throwaway directory holding the script's declared dependencies. Removed
/// on drop.
#[derive(Debug)]
pub struct DependencyEnv {
    dir: TempDir,
}

impl DependencyEnv {
    pub fn provision(dependencies: &[String]) -> Result<Self> {
        let installer = match env::var(PIP_ENV) {
            Ok(val) if !val.trim().is_empty() => val.trim().to_string(),
            _ => DEFAULT_PIP.to_string(),
        };
        Self::provision_with(&installer, dependencies)
    }

    /// Run `<installer> install --target <dir> <deps…>`. The installer's
    /// stdout goes to stderr so stdout stays reserved for the image id.
    pub fn provision_with(installer: &str, dependencies: &[String]) -> Result<Self> {
        let dir = tempfile::Builder::new()
            .prefix("buildahscript-deps-")
            .tempdir()
            .context("failed to create dependency directory")?;
        info!(
            installer,
            count = dependencies.len(),
            dir = %dir.path().display(),
            "deps.install"
        );
        let status = Command::new(installer)
            .arg("install")
            .arg("--target")
            .arg(dir.path())
            .args(dependencies)
            .stdout(Stdio::from(io::stderr()))
            .status()
            .with_context(|| format!("failed to run {}", installer))?;
        if !status.success() {
            bail!(
                "{} install exited with {} for: {}",
                installer,
                status,
                dependencies.join(" ")
            );
        }
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Expose the dependency directory to a child process.
    pub fn apply(&self, cmd: &mut Command) -> Result<()> {
        let existing = env::var_os("PYTHONPATH");
        let mut entries = vec![self.path().to_path_buf()];
        if let Some(existing) = &existing {
            entries.extend(env::split_paths(existing));
        }
        let joined = env::join_paths(entries).context("dependency path is not valid in PYTHONPATH")?;
        cmd.env("PYTHONPATH", joined).env(DEPS_DIR_ENV, self.path());
        Ok(())
    }
}

/// `PATH` extended with the first of `candidates` that holds `runc`, or
/// `None` when `runc` is already reachable or nowhere to be found.
pub fn path_with_runc(path: Option<OsString>, candidates: &[PathBuf]) -> Option<OsString> {
    let mut entries: Vec<PathBuf> = path
        .as_deref()
        .map(|p| env::split_paths(p).collect())
        .unwrap_or_default();
    if entries.iter().any(|dir| dir.join("runc").is_file()) {
        return None;
    }
    let found = candidates.iter().find(|dir| dir.join("runc").is_file())?;
    entries.push(found.clone());
    env::join_paths(entries).ok()
}
