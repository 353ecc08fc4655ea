//! Binding `--build-arg NAME=VALUE` strings to declared parameters.

use std::collections::BTreeMap;
use std::fmt;
use tracing::debug;

use crate::error::BindError;
use crate::literal::Literal;
use crate::metadata::ParameterSpec;

/// Parameter values as the script sees them, one global per entry.
pub type BoundParameters = BTreeMap<String, Literal>;

/// Converts a raw build-arg string into a typed value.
pub type Caster = fn(&str) -> Result<Literal, String>;

/// Caster used for parameters that do not name one.
pub const DEFAULT_CASTER: &str = "str";

/// Named casters available to `#| arg: name:caster` declarations.
#[derive(Clone)]
pub struct CasterRegistry {
    casters: BTreeMap<String, Caster>,
}

impl Default for CasterRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

impl fmt::Debug for CasterRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.casters.keys()).finish()
    }
}

impl CasterRegistry {
    pub fn empty() -> Self {
        Self {
            casters: BTreeMap::new(),
        }
    }

    /// `str`, `int`, `float`, `bool`, `list` and `json`.
    pub fn builtin() -> Self {
        let mut registry = Self::empty();
        registry
            .register("str", cast_str)
            .register("int", cast_int)
            .register("float", cast_float)
            .register("bool", cast_bool)
            .register("list", cast_list)
            .register("json", cast_json);
        registry
    }

    pub fn register(&mut self, name: impl Into<String>, caster: Caster) -> &mut Self {
        self.casters.insert(name.into(), caster);
        self
    }

    pub fn get(&self, name: &str) -> Option<Caster> {
        self.casters.get(name).copied()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.casters.keys().map(String::as_str)
    }

    /// Defaults first, then every supplied value: cast when the name is
    /// declared, passed through untouched when it is not. Casters are only
    /// looked up for supplied names.
    pub fn bind(
        &self,
        parameters: &BTreeMap<String, ParameterSpec>,
        raw: &BTreeMap<String, String>,
    ) -> Result<BoundParameters, BindError> {
        let mut bound: BoundParameters = parameters
            .iter()
            .map(|(name, spec)| (name.clone(), spec.default.clone().unwrap_or(Literal::None)))
            .collect();

        for (name, value) in raw {
            let Some(spec) = parameters.get(name) else {
                debug!(parameter = %name, "passing undeclared build argument through");
                bound.insert(name.clone(), Literal::Str(value.clone()));
                continue;
            };
            let caster_name = spec.caster.as_deref().unwrap_or(DEFAULT_CASTER);
            let caster = self.get(caster_name).ok_or_else(|| BindError::UnknownCaster {
                name: name.clone(),
                caster: caster_name.to_string(),
            })?;
            let cast = caster(value).map_err(|reason| BindError::CastFailed {
                name: name.clone(),
                caster: caster_name.to_string(),
                raw: value.clone(),
                reason,
            })?;
            bound.insert(name.clone(), cast);
        }
        Ok(bound)
    }
}

/// Bind with the builtin casters.
pub fn bind(
    parameters: &BTreeMap<String, ParameterSpec>,
    raw: &BTreeMap<String, String>,
) -> Result<BoundParameters, BindError> {
    CasterRegistry::builtin().bind(parameters, raw)
}

fn cast_str(raw: &str) -> Result<Literal, String> {
    Ok(Literal::Str(raw.to_string()))
}

fn cast_int(raw: &str) -> Result<Literal, String> {
    raw.trim()
        .parse::<i64>()
        .map(Literal::Int)
        .map_err(|err| err.to_string())
}

fn cast_float(raw: &str) -> Result<Literal, String> {
    raw.trim()
        .parse::<f64>()
        .map(Literal::Float)
        .map_err(|err| err.to_string())
}

fn cast_bool(raw: &str) -> Result<Literal, String> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Ok(Literal::Bool(true)),
        "false" | "no" | "off" | "0" => Ok(Literal::Bool(false)),
        _ => Err("expected one of true/false, yes/no, on/off, 1/0".to_string()),
    }
}

fn cast_list(raw: &str) -> Result<Literal, String> {
    Ok(Literal::List(
        raw.split(',')
            .map(str::trim)
            .filter(|item| !item.is_empty())
            .map(|item| Literal::Str(item.to_string()))
            .collect(),
    ))
}

fn cast_json(raw: &str) -> Result<Literal, String> {
    serde_json::from_str(raw)
        .map(|doc| Literal::from_json(&doc))
        .map_err(|err| err.to_string())
}
