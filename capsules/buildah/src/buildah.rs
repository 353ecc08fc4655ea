use serde::Deserialize;
use serde_json::Value as JsonValue;
use std::fmt;
use std::path::PathBuf;
use std::rc::Rc;

use crate::error::ToolError;
use crate::runner::{Streams, ToolRunner};

/// Which object `buildah inspect` should look at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InspectType {
    Container,
    Image,
}

impl InspectType {
    fn as_str(self) -> &'static str {
        match self {
            InspectType::Container => "container",
            InspectType::Image => "image",
        }
    }
}

/// Options for `buildah run` beyond the command itself.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunOptions {
    pub user: Option<String>,
    pub volumes: Vec<String>,
    pub mounts: Vec<String>,
    /// Run through a shell instead of exec form. Not supported.
    pub shell: bool,
}

#[derive(Debug, Deserialize)]
struct ImageListing {
    #[serde(default)]
    names: Option<Vec<String>>,
}

/// Typed wrapper over the buildah subcommands used by container and image handles.
#[derive(Clone)]
pub struct Buildah {
    runner: Rc<dyn ToolRunner>,
}

impl fmt::Debug for Buildah {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Buildah").finish_non_exhaustive()
    }
}

impl Buildah {
    pub fn new(runner: Rc<dyn ToolRunner>) -> Self {
        Self { runner }
    }

    fn output(&self, args: Vec<String>) -> Result<String, ToolError> {
        self.runner.output(&args)
    }

    /// `buildah from [--name NAME] IMAGE`, returning the working container id.
    pub fn from_image(&self, image: &str, name: Option<&str>) -> Result<String, ToolError> {
        let mut args = vec!["from".to_string()];
        if let Some(name) = name {
            args.push("--name".to_string());
            args.push(name.to_string());
        }
        args.push(image.to_string());
        let stdout = self.output(args)?;
        last_line(&stdout).ok_or_else(|| ToolError::InvalidOutput {
            command: format!("buildah from {}", image),
            message: "no container id printed".to_string(),
        })
    }

    pub fn rm(&self, container: &str) -> Result<(), ToolError> {
        self.output(vec!["rm".to_string(), container.to_string()])
            .map(|_| ())
    }

    pub fn inspect(&self, kind: InspectType, target: &str) -> Result<JsonValue, ToolError> {
        let stdout = self.output(vec![
            "inspect".to_string(),
            "--type".to_string(),
            kind.as_str().to_string(),
            target.to_string(),
        ])?;
        serde_json::from_str(&stdout).map_err(|err| ToolError::InvalidOutput {
            command: format!("buildah inspect {}", target),
            message: err.to_string(),
        })
    }

    /// `buildah config ARGS… CONTAINER`.
    pub fn config(&self, container: &str, config_args: &[String]) -> Result<(), ToolError> {
        let mut args = vec!["config".to_string()];
        args.extend(config_args.iter().cloned());
        args.push(container.to_string());
        self.output(args).map(|_| ())
    }

    /// `buildah commit CONTAINER`, returning the new image id.
    pub fn commit(&self, container: &str) -> Result<String, ToolError> {
        let stdout = self.output(vec!["commit".to_string(), container.to_string()])?;
        last_line(&stdout).ok_or_else(|| ToolError::InvalidOutput {
            command: format!("buildah commit {}", container),
            message: "no image id printed".to_string(),
        })
    }

    pub fn mount(&self, container: &str) -> Result<PathBuf, ToolError> {
        let stdout = self.output(vec!["mount".to_string(), container.to_string()])?;
        last_line(&stdout)
            .map(PathBuf::from)
            .ok_or_else(|| ToolError::InvalidOutput {
                command: format!("buildah mount {}", container),
                message: "no mount point printed".to_string(),
            })
    }

    pub fn umount(&self, container: &str) -> Result<(), ToolError> {
        self.output(vec!["umount".to_string(), container.to_string()])
            .map(|_| ())
    }

    pub fn copy(&self, container: &str, src: &str, dest: &str) -> Result<(), ToolError> {
        self.output(vec![
            "copy".to_string(),
            container.to_string(),
            src.to_string(),
            dest.to_string(),
        ])
        .map(|_| ())
    }

    pub fn add(&self, container: &str, src: &str, dest: &str) -> Result<(), ToolError> {
        self.output(vec![
            "add".to_string(),
            container.to_string(),
            src.to_string(),
            dest.to_string(),
        ])
        .map(|_| ())
    }

    /// `buildah run [--user U] [--volume V]… [--mount M]… CONTAINER -- COMMAND…`.
    pub fn run(
        &self,
        container: &str,
        command: &[String],
        options: &RunOptions,
        streams: &Streams,
    ) -> Result<Option<String>, ToolError> {
        if options.shell {
            return Err(ToolError::NotImplemented {
                feature: "run(shell=True)".to_string(),
            });
        }
        let args = run_args(container, command, options);
        self.runner.run(&args, streams)
    }

    pub fn tag(&self, image: &str, name: &str) -> Result<(), ToolError> {
        self.output(vec!["tag".to_string(), image.to_string(), name.to_string()])
            .map(|_| ())
    }

    /// Every name currently attached to `image`, per `buildah images --json`.
    pub fn image_names(&self, image: &str) -> Result<Vec<String>, ToolError> {
        let stdout = self.output(vec![
            "images".to_string(),
            "--json".to_string(),
            image.to_string(),
        ])?;
        let listings: Vec<ImageListing> =
            serde_json::from_str(&stdout).map_err(|err| ToolError::InvalidOutput {
                command: format!("buildah images --json {}", image),
                message: err.to_string(),
            })?;
        Ok(listings
            .into_iter()
            .flat_map(|listing| listing.names.unwrap_or_default())
            .collect())
    }

    pub fn rmi(&self, image: &str) -> Result<(), ToolError> {
        self.output(vec!["rmi".to_string(), image.to_string()])
            .map(|_| ())
    }
}

pub(crate) fn run_args(container: &str, command: &[String], options: &RunOptions) -> Vec<String> {
    let mut args = vec!["run".to_string()];
    if let Some(user) = &options.user {
        args.push("--user".to_string());
        args.push(user.clone());
    }
    for volume in &options.volumes {
        args.push("--volume".to_string());
        args.push(volume.clone());
    }
    for mount in &options.mounts {
        args.push("--mount".to_string());
        args.push(mount.clone());
    }
    args.push(container.to_string());
    args.push("--".to_string());
    args.extend(command.iter().cloned());
    args
}

fn last_line(stdout: &str) -> Option<String> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .last()
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn last_line_skips_progress_output() {
        let out = "Getting image source signatures\nWriting manifest\n\nsha256:abc\n\n";
        assert_eq!(last_line(out).as_deref(), Some("sha256:abc"));
        assert_eq!(last_line(" \n"), None);
    }

    #[test]
    fn run_args_place_options_before_container_and_command_after_separator() {
        let options = RunOptions {
            user: Some("1000:1000".to_string()),
            volumes: vec!["/cache:/cache".to_string()],
            mounts: vec!["type=bind,source=/src,target=/src".to_string()],
            shell: false,
        };
        let args = run_args(
            "ctr",
            &["make".to_string(), "-j4".to_string()],
            &options,
        );
        assert_eq!(
            args,
            vec![
                "run",
                "--user",
                "1000:1000",
                "--volume",
                "/cache:/cache",
                "--mount",
                "type=bind,source=/src,target=/src",
                "ctr",
                "--",
                "make",
                "-j4",
            ]
        );
    }
}
