use serde::Serialize;
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::fmt;

use crate::script::ast::Expr;
use crate::script::parse_expression;

/// A constant value: parameter defaults, bound parameters, script constants.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Literal {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<Literal>),
    Dict(BTreeMap<String, Literal>),
}

impl Literal {
    /// Evaluate literal source text such as `3`, `'latest'`, `[1, 2]` or
    /// `{'a': True}`. Names, calls and operators (other than a leading minus)
    /// are rejected.
    pub fn parse(text: &str) -> Result<Literal, String> {
        let expr = parse_expression(text).map_err(|err| err.message)?;
        Literal::from_expr(&expr)
    }

    fn from_expr(expr: &Expr) -> Result<Literal, String> {
        match expr {
            Expr::Const(lit) => Ok(lit.clone()),
            Expr::Neg(inner) => match Literal::from_expr(inner)? {
                Literal::Int(value) => value
                    .checked_neg()
                    .map(Literal::Int)
                    .ok_or_else(|| "integer literal out of range".to_string()),
                Literal::Float(value) => Ok(Literal::Float(-value)),
                other => Err(format!("cannot negate {}", other.kind())),
            },
            Expr::List(items) => items
                .iter()
                .map(Literal::from_expr)
                .collect::<Result<Vec<_>, _>>()
                .map(Literal::List),
            Expr::Dict(pairs) => {
                let mut map = BTreeMap::new();
                for (key, value) in pairs {
                    match Literal::from_expr(key)? {
                        Literal::Str(key) => {
                            map.insert(key, Literal::from_expr(value)?);
                        }
                        other => return Err(format!("dict keys must be strings, not {}", other.kind())),
                    }
                }
                Ok(Literal::Dict(map))
            }
            Expr::Name(name) => Err(format!("'{}' is not a literal (quote strings)", name)),
            _ => Err("not a literal value".to_string()),
        }
    }

    pub fn from_json(value: &JsonValue) -> Literal {
        match value {
            JsonValue::Null => Literal::None,
            JsonValue::Bool(b) => Literal::Bool(*b),
            JsonValue::Number(n) => match n.as_i64() {
                Some(i) => Literal::Int(i),
                None => Literal::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            JsonValue::String(s) => Literal::Str(s.clone()),
            JsonValue::Array(items) => Literal::List(items.iter().map(Literal::from_json).collect()),
            JsonValue::Object(map) => Literal::Dict(
                map.iter()
                    .map(|(k, v)| (k.clone(), Literal::from_json(v)))
                    .collect(),
            ),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Literal::None => "None",
            Literal::Bool(_) => "bool",
            Literal::Int(_) => "int",
            Literal::Float(_) => "float",
            Literal::Str(_) => "str",
            Literal::List(_) => "list",
            Literal::Dict(_) => "dict",
        }
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::None => f.write_str("None"),
            Literal::Bool(true) => f.write_str("True"),
            Literal::Bool(false) => f.write_str("False"),
            Literal::Int(v) => write!(f, "{}", v),
            Literal::Float(v) => f.write_str(&format_float(*v)),
            Literal::Str(s) => write!(f, "{:?}", s),
            Literal::List(items) => {
                f.write_str("[")?;
                for (idx, item) in items.iter().enumerate() {
                    if idx > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                f.write_str("]")
            }
            Literal::Dict(map) => {
                f.write_str("{")?;
                for (idx, (key, value)) in map.iter().enumerate() {
                    if idx > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{:?}: {}", key, value)?;
                }
                f.write_str("}")
            }
        }
    }
}

/// Floats always show a fractional part or exponent, so `3.0` never prints as `3`.
pub(crate) fn format_float(value: f64) -> String {
    if value.is_nan() {
        "nan".to_string()
    } else if value.is_infinite() {
        if value > 0.0 { "inf" } else { "-inf" }.to_string()
    } else if value.fract() == 0.0 && value.abs() < 1e16 {
        format!("{:.1}", value)
    } else {
        format!("{}", value)
    }
}
