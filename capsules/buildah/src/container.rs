use serde::Serialize;
use serde_json::Value as JsonValue;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::buildah::{Buildah, InspectType, RunOptions};
use crate::error::ToolError;
use crate::image::ImageHandle;
use crate::inspect::parse_container_config;
use crate::runner::{shell_join, Streams};

/// The configuration fields of a working container that are buffered in memory.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ContainerConfig {
    pub environ: BTreeMap<String, String>,
    pub command: Vec<String>,
    pub entrypoint: Vec<String>,
    pub labels: BTreeMap<String, String>,
    pub volumes: BTreeSet<String>,
    pub workdir: String,
}

impl ContainerConfig {
    /// `buildah config` arguments that turn `self` into `target`.
    ///
    /// Mappings are compared key by key, volumes as sets, and the scalar fields
    /// (command, entrypoint, workdir) by whole-value equality.
    pub fn diff_args(&self, target: &ContainerConfig) -> Vec<String> {
        let mut args = Vec::new();
        diff_mapping("--env", &self.environ, &target.environ, &mut args);
        diff_mapping("--label", &self.labels, &target.labels, &mut args);

        for volume in target.volumes.difference(&self.volumes) {
            args.push("--volume".to_string());
            args.push(volume.clone());
        }
        for volume in self.volumes.difference(&target.volumes) {
            args.push("--volume".to_string());
            args.push(format!("{}-", volume));
        }

        if self.command != target.command {
            args.push("--cmd".to_string());
            args.push(shell_join(&target.command));
        }
        if self.entrypoint != target.entrypoint {
            args.push("--entrypoint".to_string());
            args.push(entrypoint_arg(&target.entrypoint));
        }
        if self.workdir != target.workdir {
            args.push("--workingdir".to_string());
            args.push(target.workdir.clone());
        }
        args
    }
}

fn diff_mapping(
    flag: &str,
    old: &BTreeMap<String, String>,
    new: &BTreeMap<String, String>,
    args: &mut Vec<String>,
) {
    for (key, value) in new {
        if old.get(key) != Some(value) {
            args.push(flag.to_string());
            args.push(format!("{}={}", key, value));
        }
    }
    for key in old.keys().filter(|key| !new.contains_key(*key)) {
        args.push(flag.to_string());
        args.push(format!("{}-", key));
    }
}

// Exec form; a bare string would be wrapped in `/bin/sh -c` by buildah.
fn entrypoint_arg(entrypoint: &[String]) -> String {
    if entrypoint.is_empty() {
        String::new()
    } else {
        serde_json::to_string(entrypoint).unwrap_or_default()
    }
}

/// A working container owned by one script.
///
/// Mutations go to the live configuration and are only pushed to buildah, as one
/// `buildah config` call, right before an operation that observes committed state
/// (`inspect`, `run`, `commit`). The working container is removed when the handle
/// is released or dropped.
#[derive(Debug)]
pub struct ContainerHandle {
    tool: Buildah,
    id: String,
    live: ContainerConfig,
    snapshot: ContainerConfig,
    released: bool,
}

impl ContainerHandle {
    /// `buildah from IMAGE`, then read back the inherited configuration.
    pub fn create(tool: Buildah, image: &str, name: Option<&str>) -> Result<Self, ToolError> {
        let id = tool.from_image(image, name)?;
        info!(container = %id, %image, "container.created");
        let mut handle = Self {
            tool,
            id,
            live: ContainerConfig::default(),
            snapshot: ContainerConfig::default(),
            released: false,
        };
        // The handle owns the container from here on, so a failed read-back still removes it.
        let doc = handle.tool.inspect(InspectType::Container, &handle.id)?;
        let config = parse_container_config(&doc).map_err(|message| ToolError::InvalidOutput {
            command: format!("buildah inspect {}", handle.id),
            message,
        })?;
        handle.snapshot = config.clone();
        handle.live = config;
        Ok(handle)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn config(&self) -> &ContainerConfig {
        &self.live
    }

    /// Live configuration. Changes stay in memory until the next reconcile.
    pub fn config_mut(&mut self) -> &mut ContainerConfig {
        &mut self.live
    }

    /// What buildah currently has recorded for this container.
    pub fn snapshot(&self) -> &ContainerConfig {
        &self.snapshot
    }

    pub fn is_dirty(&self) -> bool {
        self.live != self.snapshot
    }

    pub fn is_released(&self) -> bool {
        self.released
    }

    fn ensure_live(&self) -> Result<(), ToolError> {
        if self.released {
            return Err(ToolError::Released {
                id: self.id.clone(),
            });
        }
        Ok(())
    }

    /// Flush pending configuration changes. Returns whether buildah was called.
    pub fn reconcile(&mut self) -> Result<bool, ToolError> {
        self.ensure_live()?;
        let args = self.snapshot.diff_args(&self.live);
        if args.is_empty() {
            return Ok(false);
        }
        debug!(container = %self.id, changes = args.len() / 2, "container.reconcile");
        self.tool.config(&self.id, &args)?;
        self.snapshot = self.live.clone();
        Ok(true)
    }

    pub fn inspect(&mut self) -> Result<JsonValue, ToolError> {
        self.reconcile()?;
        self.tool.inspect(InspectType::Container, &self.id)
    }

    /// Finalize the current state into an image. The handle stays usable.
    pub fn commit(&mut self) -> Result<ImageHandle, ToolError> {
        self.reconcile()?;
        let image = self.tool.commit(&self.id)?;
        info!(container = %self.id, %image, "container.committed");
        Ok(ImageHandle::new(self.tool.clone(), image))
    }

    pub fn run(
        &mut self,
        command: &[String],
        options: &RunOptions,
        streams: &Streams,
    ) -> Result<Option<String>, ToolError> {
        if options.shell {
            return Err(ToolError::NotImplemented {
                feature: "run(shell=True)".to_string(),
            });
        }
        self.reconcile()?;
        self.tool.run(&self.id, command, options, streams)
    }

    pub fn copy_in(&self, src: &str, dest: &str) -> Result<(), ToolError> {
        self.ensure_live()?;
        self.tool.copy(&self.id, src, dest)
    }

    pub fn add(&self, src: &str, dest: &str) -> Result<(), ToolError> {
        self.ensure_live()?;
        self.tool.add(&self.id, src, dest)
    }

    /// Copy `src` (a path inside the container) to `dest` on the host, replacing
    /// whatever is already at `dest`. Symlinks are copied as links, never
    /// followed, since their targets only make sense inside the container.
    pub fn copy_out(&self, src: &str, dest: &Path) -> Result<(), ToolError> {
        self.ensure_live()?;
        let mount = MountGuard::acquire(&self.tool, &self.id)?;
        let source = mount.resolve(src);
        debug!(container = %self.id, src = %source.display(), dest = %dest.display(), "container.copy_out");
        copy_host_path(&source, dest)
    }

    /// Remove the working container. Safe to call more than once.
    pub fn release(&mut self) -> Result<(), ToolError> {
        if self.released {
            return Ok(());
        }
        self.released = true;
        debug!(container = %self.id, "container.release");
        self.tool.rm(&self.id)
    }
}

impl Drop for ContainerHandle {
    fn drop(&mut self) {
        if let Err(err) = self.release() {
            warn!(container = %self.id, error = %err, "failed to remove working container");
        }
    }
}

/// Scoped `buildah mount`/`buildah umount` pair.
struct MountGuard<'a> {
    tool: &'a Buildah,
    container: &'a str,
    root: PathBuf,
}

impl<'a> MountGuard<'a> {
    fn acquire(tool: &'a Buildah, container: &'a str) -> Result<Self, ToolError> {
        let root = tool.mount(container)?;
        Ok(Self {
            tool,
            container,
            root,
        })
    }

    /// Map a container path onto the mount, never escaping it.
    fn resolve(&self, path: &str) -> PathBuf {
        let mut resolved = self.root.clone();
        for component in Path::new(path).components() {
            match component {
                Component::Normal(part) => resolved.push(part),
                Component::ParentDir => {
                    if resolved != self.root {
                        resolved.pop();
                    }
                }
                Component::RootDir | Component::CurDir | Component::Prefix(_) => {}
            }
        }
        resolved
    }
}

impl Drop for MountGuard<'_> {
    fn drop(&mut self) {
        if let Err(err) = self.tool.umount(self.container) {
            warn!(container = %self.container, error = %err, "failed to unmount working container");
        }
    }
}

fn copy_host_path(source: &Path, dest: &Path) -> Result<(), ToolError> {
    let meta = fs::symlink_metadata(source)
        .map_err(|err| ToolError::io("Source not found in container", source, err))?;
    clear_destination(dest)?;

    if meta.is_dir() {
        return copy_tree(source, dest);
    }
    if let Some(parent) = dest.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .map_err(|err| ToolError::io("Failed to create destination parent", parent, err))?;
    }
    if meta.file_type().is_symlink() {
        return copy_symlink(source, dest);
    }
    fs::copy(source, dest)
        .map(|_| ())
        .map_err(|err| ToolError::io("Failed to copy file", source, err))
}

fn clear_destination(dest: &Path) -> Result<(), ToolError> {
    match fs::symlink_metadata(dest) {
        Ok(meta) if meta.is_dir() => fs::remove_dir_all(dest)
            .map_err(|err| ToolError::io("Failed to clear destination directory", dest, err)),
        Ok(_) => fs::remove_file(dest)
            .map_err(|err| ToolError::io("Failed to clear destination file", dest, err)),
        Err(_) => Ok(()),
    }
}

fn copy_tree(source: &Path, dest: &Path) -> Result<(), ToolError> {
    for entry in WalkDir::new(source).follow_links(false) {
        let entry = entry.map_err(|err| {
            let path = err.path().unwrap_or(source).to_path_buf();
            ToolError::io("Failed to walk source tree", path, err.into())
        })?;
        let relative = entry.path().strip_prefix(source).unwrap_or(entry.path());
        let target = dest.join(relative);
        let file_type = entry.file_type();

        if file_type.is_dir() {
            fs::create_dir_all(&target)
                .map_err(|err| ToolError::io("Failed to create directory", &target, err))?;
        } else if file_type.is_symlink() {
            copy_symlink(entry.path(), &target)?;
        } else {
            fs::copy(entry.path(), &target)
                .map_err(|err| ToolError::io("Failed to copy file", entry.path(), err))?;
        }
    }
    Ok(())
}

#[cfg(unix)]
fn copy_symlink(link: &Path, target: &Path) -> Result<(), ToolError> {
    let points_to =
        fs::read_link(link).map_err(|err| ToolError::io("Failed to read symlink", link, err))?;
    std::os::unix::fs::symlink(points_to, target)
        .map_err(|err| ToolError::io("Failed to create symlink", target, err))
}

#[cfg(not(unix))]
fn copy_symlink(link: &Path, target: &Path) -> Result<(), ToolError> {
    fs::copy(link, target)
        .map(|_| ())
        .map_err(|err| ToolError::io("Failed to copy file", link, err))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> ContainerConfig {
        ContainerConfig {
            environ: BTreeMap::from([
                ("PATH".to_string(), "/usr/bin".to_string()),
                ("LANG".to_string(), "C".to_string()),
            ]),
            command: vec!["/bin/sh".to_string()],
            entrypoint: vec![],
            labels: BTreeMap::new(),
            volumes: BTreeSet::from(["/data".to_string()]),
            workdir: "/".to_string(),
        }
    }

    #[test]
    fn identical_configs_produce_no_args() {
        assert!(base().diff_args(&base()).is_empty());
    }

    #[test]
    fn environment_is_diffed_key_by_key() {
        let mut live = base();
        live.environ.insert("X".to_string(), "1".to_string());
        live.environ.insert("LANG".to_string(), "C.UTF-8".to_string());
        live.environ.remove("PATH");

        assert_eq!(
            base().diff_args(&live),
            vec!["--env", "LANG=C.UTF-8", "--env", "X=1", "--env", "PATH-"]
        );
    }

    #[test]
    fn volumes_are_diffed_as_sets() {
        let mut live = base();
        live.volumes.insert("/cache".to_string());
        live.volumes.remove("/data");

        assert_eq!(
            base().diff_args(&live),
            vec!["--volume", "/cache", "--volume", "/data-"]
        );
    }

    #[test]
    fn scalar_fields_are_emitted_wholesale() {
        let mut live = base();
        live.command = vec!["/bin/sh".to_string(), "-c".to_string(), "echo hi".to_string()];
        live.entrypoint = vec!["/usr/bin/tini".to_string(), "--".to_string()];
        live.workdir = "/srv".to_string();
        live.labels.insert("org.opencontainers.image.title".to_string(), "demo".to_string());

        assert_eq!(
            base().diff_args(&live),
            vec![
                "--label",
                "org.opencontainers.image.title=demo",
                "--cmd",
                "'/bin/sh' '-c' 'echo hi'",
                "--entrypoint",
                r#"["/usr/bin/tini","--"]"#,
                "--workingdir",
                "/srv",
            ]
        );
    }

    #[test]
    fn clearing_entrypoint_emits_empty_value() {
        let mut old = base();
        old.entrypoint = vec!["/entry".to_string()];
        let args = old.diff_args(&base());
        assert_eq!(args, vec!["--entrypoint", ""]);
    }
}
