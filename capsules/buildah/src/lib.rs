//! # buildah capsule
//!
//! Blocking, single-threaded access to the `buildah` CLI for build scripts.
//!
//! [`ContainerHandle`] buffers configuration changes (environment, labels, volumes,
//! command, entrypoint, working directory) in memory and flushes them as a single
//! minimal `buildah config` call right before any operation that depends on
//! committed state. [`ImageHandle`] is the immutable result of a commit.
//!
//! ```no_run
//! use capsules_buildah::{load_from_env, Buildah, ContainerHandle};
//! use std::rc::Rc;
//!
//! let tool = Buildah::new(Rc::new(load_from_env().runner()));
//! let mut ctr = ContainerHandle::create(tool, "docker.io/library/alpine:3.20", None)?;
//! ctr.config_mut().environ.insert("APP_ENV".into(), "prod".into());
//! let image = ctr.commit()?; // one `buildah config`, then `buildah commit`
//! image.add_tag("localhost/app:latest")?;
//! # Ok::<(), capsules_buildah::ToolError>(())
//! ```

pub mod buildah;
pub mod config;
pub mod container;
pub mod error;
pub mod image;
pub mod inspect;
pub mod runner;
pub mod testing;

pub use buildah::{Buildah, InspectType, RunOptions};
pub use config::{load_from_env, ToolConfig};
pub use container::{ContainerConfig, ContainerHandle};
pub use error::ToolError;
pub use image::ImageHandle;
pub use runner::{shell_escape, shell_join, ProcessRunner, Streams, ToolRunner};
