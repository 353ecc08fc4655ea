use capsules_buildah::{Buildah, ContainerHandle, ImageHandle, RunOptions, Streams};
use serde_json::Value as JsonValue;
use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::rc::Rc;
use tracing::warn;

use super::builtins::{expect_str, mapping_entries, string_list, CallArgs};
use super::fault::Fault;
use super::ops;
use super::value::{ContainerRef, Value, ViewField};
use crate::error::ErrorKind;
use crate::literal::Literal;

const CONTAINER_METHODS: &[&str] = &[
    "commit", "inspect", "run", "copy_in", "add", "copy_out", "remove",
];
const IMAGE_METHODS: &[&str] = &["add_tag", "names", "inspect", "remove"];
const MAPPING_METHODS: &[&str] = &["get", "keys", "values", "items", "pop", "update"];
const VOLUME_METHODS: &[&str] = &["add", "remove", "discard"];

/// Everything a running script may touch outside its own memory: the
/// external tool, the working containers it opened, and where `print` goes.
pub struct Capabilities {
    tool: Buildah,
    containers: RefCell<Vec<ContainerRef>>,
    out: RefCell<Box<dyn Write>>,
}

impl fmt::Debug for Capabilities {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Capabilities")
            .field("tool", &self.tool)
            .field("open_containers", &self.open_containers())
            .finish_non_exhaustive()
    }
}

impl Capabilities {
    pub fn new(tool: Buildah) -> Self {
        Self {
            tool,
            containers: RefCell::new(Vec::new()),
            out: RefCell::new(Box::new(io::stdout())),
        }
    }

    /// Send `print` output somewhere other than stdout.
    pub fn with_output(mut self, out: impl Write + 'static) -> Self {
        self.out = RefCell::new(Box::new(out));
        self
    }

    pub fn tool(&self) -> &Buildah {
        &self.tool
    }

    /// Working containers created through this surface and not yet removed.
    pub fn open_containers(&self) -> usize {
        self.containers
            .borrow()
            .iter()
            .filter(|c| c.try_borrow().map(|c| !c.is_released()).unwrap_or(true))
            .count()
    }

    /// Remove every tracked working container. Failures are logged, not
    /// returned; this runs on error paths.
    pub fn release_all(&self) {
        let containers = std::mem::take(&mut *self.containers.borrow_mut());
        for container in containers {
            match container.try_borrow_mut() {
                Ok(mut handle) => {
                    if let Err(err) = handle.release() {
                        warn!(container = %handle.id(), error = %err, "failed to remove working container");
                    }
                }
                Err(_) => warn!("working container still borrowed during cleanup"),
            }
        }
    }

    pub(crate) fn create_container(
        &self,
        image: &str,
        name: Option<&str>,
    ) -> Result<ContainerRef, Fault> {
        let handle = Rc::new(RefCell::new(ContainerHandle::create(
            self.tool.clone(),
            image,
            name,
        )?));
        self.containers.borrow_mut().push(handle.clone());
        Ok(handle)
    }

    pub(crate) fn write(&self, text: &str) -> Result<(), Fault> {
        let mut out = self.out.borrow_mut();
        out.write_all(text.as_bytes())
            .and_then(|_| out.flush())
            .map_err(|err| Fault::new(ErrorKind::Error, format!("failed to write output: {}", err)))
    }
}

fn json_value(doc: &JsonValue) -> Value {
    Value::from_literal(&Literal::from_json(doc))
}

fn released(handle: &ContainerRef) -> Result<(), Fault> {
    if handle.borrow().is_released() {
        return Err(capsules_buildah::ToolError::Released {
            id: handle.borrow().id().to_string(),
        }
        .into());
    }
    Ok(())
}

pub(crate) fn has_method(value: &Value, name: &str) -> bool {
    let table = match value {
        Value::Container(_) => CONTAINER_METHODS,
        Value::Image(_) => IMAGE_METHODS,
        Value::View(_, ViewField::Volumes) => VOLUME_METHODS,
        Value::View(..) => MAPPING_METHODS,
        _ => return false,
    };
    table.contains(&name)
}

pub(crate) fn container_attr(handle: &ContainerRef, name: &str) -> Result<Value, Fault> {
    let value = match name {
        "id" => Value::str(handle.borrow().id()),
        "environ" => Value::View(handle.clone(), ViewField::Environ),
        "labels" => Value::View(handle.clone(), ViewField::Labels),
        "volumes" => Value::View(handle.clone(), ViewField::Volumes),
        "command" => string_values(&handle.borrow().config().command),
        "entrypoint" => string_values(&handle.borrow().config().entrypoint),
        "workdir" => Value::str(handle.borrow().config().workdir.as_str()),
        other => return Err(Fault::attribute_error("Container", other)),
    };
    Ok(value)
}

fn string_values(items: &[String]) -> Value {
    Value::list(items.iter().map(|s| Value::str(s.as_str())).collect())
}

pub(crate) fn set_container_attr(
    handle: &ContainerRef,
    name: &str,
    value: Value,
) -> Result<(), Fault> {
    match name {
        "environ" | "labels" => {
            let entries = mapping_entries(&value)?;
            let mut converted = BTreeMap::new();
            for (key, item) in entries {
                converted.insert(key, ops::config_string(&item, name)?);
            }
            let mut ctr = handle.borrow_mut();
            let config = ctr.config_mut();
            if name == "environ" {
                config.environ = converted;
            } else {
                config.labels = converted;
            }
        }
        "volumes" => {
            let volumes: BTreeSet<String> = string_list(&value, "volumes")?.into_iter().collect();
            handle.borrow_mut().config_mut().volumes = volumes;
        }
        "command" | "entrypoint" => {
            let items = string_list(&value, name)?;
            let mut ctr = handle.borrow_mut();
            let config = ctr.config_mut();
            if name == "command" {
                config.command = items;
            } else {
                config.entrypoint = items;
            }
        }
        "workdir" => {
            let workdir = expect_str(value, "workdir")?;
            handle.borrow_mut().config_mut().workdir = workdir;
        }
        "id" => {
            return Err(Fault::new(
                ErrorKind::AttributeError,
                "attribute 'id' of 'Container' is read-only",
            ))
        }
        other => return Err(Fault::attribute_error("Container", other)),
    }
    Ok(())
}

pub(crate) fn call_container_method(
    handle: &ContainerRef,
    name: &str,
    args: CallArgs,
) -> Result<Value, Fault> {
    match name {
        "commit" => {
            args.bind("commit", &[], 0)?;
            let image = handle.borrow_mut().commit()?;
            Ok(Value::Image(image))
        }
        "inspect" => {
            args.bind("inspect", &[], 0)?;
            let doc = handle.borrow_mut().inspect()?;
            Ok(json_value(&doc))
        }
        "run" => run(handle, args),
        "copy_in" | "add" => {
            let mut slots = args.bind(name, &["src", "dest"], 2)?;
            let src = expect_str(slots.value(0), &format!("{}() src", name))?;
            let dest = expect_str(slots.value(1), &format!("{}() dest", name))?;
            let ctr = handle.borrow();
            if name == "add" {
                ctr.add(&src, &dest)?;
            } else {
                ctr.copy_in(&src, &dest)?;
            }
            Ok(Value::None)
        }
        "copy_out" => {
            let mut slots = args.bind("copy_out", &["src", "dest"], 2)?;
            let src = expect_str(slots.value(0), "copy_out() src")?;
            let dest = expect_str(slots.value(1), "copy_out() dest")?;
            handle.borrow().copy_out(&src, Path::new(&dest))?;
            Ok(Value::None)
        }
        "remove" => {
            args.bind("remove", &[], 0)?;
            handle.borrow_mut().release()?;
            Ok(Value::None)
        }
        other => Err(Fault::attribute_error("Container", other)),
    }
}

fn run(handle: &ContainerRef, args: CallArgs) -> Result<Value, Fault> {
    let mut slots = args.bind(
        "run",
        &[
            "cmd", "user", "volumes", "mounts", "shell", "stdin", "stdout", "stderr", "capture",
        ],
        1,
    )?;
    let command = match slots.value(0) {
        Value::Str(cmd) => vec![cmd],
        other => string_list(&other, "run() cmd")?,
    };
    let options = RunOptions {
        user: slots
            .optional(1)
            .map(|v| expect_str(v, "run() user"))
            .transpose()?,
        volumes: slots
            .optional(2)
            .map(|v| string_list(&v, "run() volumes"))
            .transpose()?
            .unwrap_or_default(),
        mounts: slots
            .optional(3)
            .map(|v| string_list(&v, "run() mounts"))
            .transpose()?
            .unwrap_or_default(),
        shell: slots.take(4).map(|v| v.truthy()).unwrap_or(false),
    };
    if options.shell {
        return Err(Fault::new(
            ErrorKind::NotImplementedError,
            "run(shell=True) is not implemented",
        ));
    }
    let mut path = |idx: usize, what: &str| -> Result<Option<PathBuf>, Fault> {
        slots
            .optional(idx)
            .map(|v| expect_str(v, what).map(PathBuf::from))
            .transpose()
    };
    let stdin = path(5, "run() stdin")?;
    let stdout = path(6, "run() stdout")?;
    let stderr = path(7, "run() stderr")?;
    let streams = Streams {
        stdin,
        stdout,
        stderr,
        capture: slots.take(8).map(|v| v.truthy()).unwrap_or(false),
    };
    let output = handle.borrow_mut().run(&command, &options, &streams)?;
    Ok(output.map(Value::Str).unwrap_or(Value::None))
}

pub(crate) fn image_attr(image: &ImageHandle, name: &str) -> Result<Value, Fault> {
    match name {
        "id" => Ok(Value::str(image.id())),
        other => Err(Fault::attribute_error("Image", other)),
    }
}

pub(crate) fn call_image_method(
    image: &ImageHandle,
    name: &str,
    args: CallArgs,
) -> Result<Value, Fault> {
    match name {
        "add_tag" => {
            let mut slots = args.bind("add_tag", &["name"], 1)?;
            let tag = expect_str(slots.value(0), "add_tag() name")?;
            image.add_tag(&tag)?;
            Ok(Value::None)
        }
        "names" => {
            args.bind("names", &[], 0)?;
            Ok(string_values(&image.names()?))
        }
        "inspect" => {
            args.bind("inspect", &[], 0)?;
            Ok(json_value(&image.inspect()?))
        }
        "remove" => {
            args.bind("remove", &[], 0)?;
            image.remove()?;
            Ok(Value::None)
        }
        other => Err(Fault::attribute_error("Image", other)),
    }
}

pub(crate) fn call_view_method(
    handle: &ContainerRef,
    field: ViewField,
    name: &str,
    args: CallArgs,
) -> Result<Value, Fault> {
    released(handle)?;
    if field == ViewField::Volumes {
        return call_volume_method(handle, name, args);
    }
    let what = field.name();
    match name {
        "get" => {
            let mut slots = args.bind("get", &["key", "default"], 1)?;
            let key = expect_str(slots.value(0), "key")?;
            Ok(ops::mapping_get(handle, field, &key)
                .map(Value::Str)
                .or_else(|| slots.take(1))
                .unwrap_or(Value::None))
        }
        "keys" | "values" | "items" => {
            args.bind(name, &[], 0)?;
            let entries = mapping_entries(&Value::View(handle.clone(), field))?;
            let items = entries
                .into_iter()
                .map(|(k, v)| match name {
                    "keys" => Value::Str(k),
                    "values" => v,
                    _ => Value::list(vec![Value::Str(k), v]),
                })
                .collect();
            Ok(Value::list(items))
        }
        "pop" => {
            let mut slots = args.bind("pop", &["key", "default"], 1)?;
            let key = expect_str(slots.value(0), "key")?;
            match (ops::mapping_remove(handle, field, &key), slots.take(1)) {
                (Some(value), _) => Ok(Value::Str(value)),
                (None, Some(default)) => Ok(default),
                (None, None) => Err(Fault::key_error(&key)),
            }
        }
        "update" => {
            let mut slots = args.bind("update", &["other"], 1)?;
            for (key, value) in mapping_entries(&slots.value(0))? {
                let value = ops::config_string(&value, what)?;
                ops::mapping_insert(handle, field, key, value);
            }
            Ok(Value::None)
        }
        other => Err(Fault::attribute_error(what, other)),
    }
}

fn call_volume_method(handle: &ContainerRef, name: &str, args: CallArgs) -> Result<Value, Fault> {
    let mut slots = match name {
        "add" | "remove" | "discard" => args.bind(name, &["path"], 1)?,
        other => return Err(Fault::attribute_error("volumes", other)),
    };
    let path = expect_str(slots.value(0), "volume")?;
    let mut ctr = handle.borrow_mut();
    let volumes = &mut ctr.config_mut().volumes;
    match name {
        "add" => {
            volumes.insert(path);
        }
        "remove" => {
            if !volumes.remove(&path) {
                return Err(Fault::key_error(&path));
            }
        }
        _ => {
            volumes.remove(&path);
        }
    }
    Ok(Value::None)
}
