//! In-memory stand-in for the buildah binary, for tests that should not need a
//! container runtime.

use serde_json::{json, Value as JsonValue};
use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use crate::error::ToolError;
use crate::runner::{Streams, ToolRunner};

/// Records every invocation and answers the subcommands handles depend on.
///
/// `from` yields `working-container-N` (or the `--name`), `commit` yields
/// `sha256:imageN`, `tag` is remembered and reported back by `images --json`.
#[derive(Debug)]
pub struct StubRunner {
    calls: RefCell<Vec<Vec<String>>>,
    inspect: RefCell<JsonValue>,
    mount_root: RefCell<PathBuf>,
    failures: RefCell<BTreeSet<String>>,
    tags: RefCell<BTreeMap<String, Vec<String>>>,
    captured: RefCell<String>,
    counter: Cell<usize>,
}

impl Default for StubRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl StubRunner {
    pub fn new() -> Self {
        Self {
            calls: RefCell::new(Vec::new()),
            inspect: RefCell::new(default_inspect()),
            mount_root: RefCell::new(std::env::temp_dir().join("buildah-stub-mount")),
            failures: RefCell::new(BTreeSet::new()),
            tags: RefCell::new(BTreeMap::new()),
            captured: RefCell::new(String::new()),
            counter: Cell::new(0),
        }
    }

    /// Document returned by `inspect --type container`.
    pub fn with_inspect(self, doc: JsonValue) -> Self {
        *self.inspect.borrow_mut() = doc;
        self
    }

    /// Directory reported by `mount`.
    pub fn with_mount_root(self, root: impl Into<PathBuf>) -> Self {
        *self.mount_root.borrow_mut() = root.into();
        self
    }

    /// Stdout returned by `run` when capture is requested.
    pub fn with_captured_output(self, stdout: impl Into<String>) -> Self {
        *self.captured.borrow_mut() = stdout.into();
        self
    }

    /// Make every invocation of `subcommand` exit nonzero.
    pub fn fail_on(self, subcommand: &str) -> Self {
        self.failures.borrow_mut().insert(subcommand.to_string());
        self
    }

    pub fn calls(&self) -> Vec<Vec<String>> {
        self.calls.borrow().clone()
    }

    pub fn calls_for(&self, subcommand: &str) -> Vec<Vec<String>> {
        self.calls
            .borrow()
            .iter()
            .filter(|call| call.first().map(String::as_str) == Some(subcommand))
            .cloned()
            .collect()
    }

    pub fn count(&self, subcommand: &str) -> usize {
        self.calls_for(subcommand).len()
    }

    /// Subcommand names in invocation order.
    pub fn subcommands(&self) -> Vec<String> {
        self.calls
            .borrow()
            .iter()
            .filter_map(|call| call.first().cloned())
            .collect()
    }

    fn next_id(&self) -> usize {
        let next = self.counter.get() + 1;
        self.counter.set(next);
        next
    }

    fn respond(&self, args: &[String]) -> Result<String, ToolError> {
        self.calls.borrow_mut().push(args.to_vec());
        let subcommand = args.first().map(String::as_str).unwrap_or_default();
        if self.failures.borrow().contains(subcommand) {
            return Err(ToolError::Failed {
                command: format!("buildah {}", args.join(" ")),
                status: Some(125),
                stderr: format!("stub: {} failed", subcommand),
            });
        }

        let out = match subcommand {
            "from" => match args.iter().position(|a| a == "--name") {
                Some(idx) => args.get(idx + 1).cloned().unwrap_or_default(),
                None => format!("working-container-{}", self.next_id()),
            },
            "inspect" => {
                if args.get(2).map(String::as_str) == Some("image") {
                    json!({ "FromImageID": args.last() }).to_string()
                } else {
                    self.inspect.borrow().to_string()
                }
            }
            "commit" => format!("sha256:image{}", self.next_id()),
            "mount" => self.mount_root.borrow().display().to_string(),
            "tag" => {
                if let [_, image, name] = args {
                    self.tags
                        .borrow_mut()
                        .entry(image.clone())
                        .or_default()
                        .push(name.clone());
                }
                String::new()
            }
            "images" => {
                let image = args.last().cloned().unwrap_or_default();
                let names = self.tags.borrow().get(&image).cloned().unwrap_or_default();
                json!([{ "id": image, "names": names }]).to_string()
            }
            _ => String::new(),
        };
        Ok(out)
    }
}

impl ToolRunner for StubRunner {
    fn output(&self, args: &[String]) -> Result<String, ToolError> {
        self.respond(args)
    }

    fn run(&self, args: &[String], streams: &Streams) -> Result<Option<String>, ToolError> {
        self.respond(args)?;
        Ok(streams.capture.then(|| self.captured.borrow().clone()))
    }
}

fn default_inspect() -> JsonValue {
    json!({
        "Type": "buildah 0.0.1",
        "OCIv1": {
            "config": {
                "Env": ["PATH=/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin"],
                "Cmd": ["/bin/sh"],
                "WorkingDir": "/"
            }
        }
    })
}
