use capsules_buildah::ImageHandle;
use std::cmp::Ordering;
use std::collections::BTreeMap;

use super::capability::Capabilities;
use super::fault::Fault;
use super::ops;
use super::value::{Builtin, Value, ViewField};
use crate::error::ErrorKind;

const MAX_RANGE: i64 = ops::MAX_LIST_LEN as i64;

const STR_METHODS: &[&str] = &[
    "split",
    "strip",
    "startswith",
    "endswith",
    "replace",
    "lower",
    "upper",
    "join",
    "format",
];
const LIST_METHODS: &[&str] = &["append", "extend", "pop"];
const DICT_METHODS: &[&str] = &["get", "keys", "values", "items", "pop", "update"];

/// Arguments of one call, before they are matched to parameters.
pub(crate) struct CallArgs {
    pub positional: Vec<Value>,
    pub keywords: Vec<(String, Value)>,
}

/// Arguments matched to named parameter slots.
pub(crate) struct Slots(Vec<Option<Value>>);

impl Slots {
    pub fn take(&mut self, idx: usize) -> Option<Value> {
        self.0.get_mut(idx).and_then(Option::take)
    }

    /// A required slot; always filled after a successful bind.
    pub fn value(&mut self, idx: usize) -> Value {
        self.take(idx).unwrap_or(Value::None)
    }

    /// An optional slot, treating an explicit `None` as absent.
    pub fn optional(&mut self, idx: usize) -> Option<Value> {
        self.take(idx).filter(|v| !matches!(v, Value::None))
    }
}

impl CallArgs {
    #[cfg(test)]
    pub fn new(positional: Vec<Value>) -> Self {
        Self {
            positional,
            keywords: Vec::new(),
        }
    }

    /// Match positional and keyword arguments onto `params`; the first
    /// `required` of them must be supplied.
    pub fn bind(self, callee: &str, params: &[&str], required: usize) -> Result<Slots, Fault> {
        if self.positional.len() > params.len() {
            return Err(Fault::type_error(format!(
                "{}() takes at most {} argument{} ({} given)",
                callee,
                params.len(),
                if params.len() == 1 { "" } else { "s" },
                self.positional.len()
            )));
        }
        let mut slots: Vec<Option<Value>> = vec![None; params.len()];
        for (idx, value) in self.positional.into_iter().enumerate() {
            slots[idx] = Some(value);
        }
        for (name, value) in self.keywords {
            let idx = params.iter().position(|p| *p == name).ok_or_else(|| {
                Fault::type_error(format!(
                    "{}() got an unexpected keyword argument '{}'",
                    callee, name
                ))
            })?;
            if slots[idx].is_some() {
                return Err(Fault::type_error(format!(
                    "{}() got multiple values for argument '{}'",
                    callee, name
                )));
            }
            slots[idx] = Some(value);
        }
        if let Some(missing) = params
            .iter()
            .take(required)
            .zip(slots.iter())
            .find(|(_, slot)| slot.is_none())
            .map(|(name, _)| name)
        {
            return Err(Fault::type_error(format!(
                "{}() missing required argument '{}'",
                callee, missing
            )));
        }
        Ok(Slots(slots))
    }
}

pub(crate) fn expect_str(value: Value, what: &str) -> Result<String, Fault> {
    match value {
        Value::Str(s) => Ok(s),
        other => Err(Fault::type_error(format!(
            "{} must be str, not {}",
            what,
            other.type_name()
        ))),
    }
}

fn expect_int(value: &Value, what: &str) -> Result<i64, Fault> {
    match value {
        Value::Int(i) => Ok(*i),
        Value::Bool(b) => Ok(i64::from(*b)),
        other => Err(Fault::type_error(format!(
            "{} must be int, not {}",
            what,
            other.type_name()
        ))),
    }
}

/// A list of strings, or a container's volume set.
pub(crate) fn string_list(value: &Value, what: &str) -> Result<Vec<String>, Fault> {
    ops::iterate(value)?
        .into_iter()
        .map(|item| expect_str(item, &format!("items of {}", what)))
        .collect()
}

pub(crate) fn call(caps: &Capabilities, builtin: Builtin, args: CallArgs) -> Result<Value, Fault> {
    match builtin {
        Builtin::Print => print(caps, args),
        Builtin::Len => {
            let mut slots = args.bind("len", &["obj"], 1)?;
            let len = ops::length(&slots.value(0))?;
            Ok(Value::Int(i64::try_from(len).unwrap_or(i64::MAX)))
        }
        Builtin::Str => {
            let mut slots = args.bind("str", &["obj"], 0)?;
            Ok(Value::Str(
                slots.take(0).map(|v| v.to_display()).unwrap_or_default(),
            ))
        }
        Builtin::Int => {
            let mut slots = args.bind("int", &["x"], 0)?;
            to_int(slots.take(0).unwrap_or(Value::Int(0)))
        }
        Builtin::Float => {
            let mut slots = args.bind("float", &["x"], 0)?;
            to_float(slots.take(0).unwrap_or(Value::Float(0.0)))
        }
        Builtin::Bool => {
            let mut slots = args.bind("bool", &["x"], 0)?;
            Ok(Value::Bool(slots.take(0).map(|v| v.truthy()).unwrap_or(false)))
        }
        Builtin::List => {
            let mut slots = args.bind("list", &["iterable"], 0)?;
            match slots.take(0) {
                Some(value) => Ok(Value::list(ops::iterate(&value)?)),
                None => Ok(Value::list(Vec::new())),
            }
        }
        Builtin::Range => range(args),
        Builtin::Sorted => {
            let mut slots = args.bind("sorted", &["iterable", "reverse"], 1)?;
            let mut items = ops::iterate(&slots.value(0))?;
            let reverse = slots.take(1).map(|v| v.truthy()).unwrap_or(false);
            let mut failure = None;
            items.sort_by(|a, b| {
                ops::ordering(a, b).unwrap_or_else(|err| {
                    failure.get_or_insert(err);
                    Ordering::Equal
                })
            });
            if let Some(err) = failure {
                return Err(err);
            }
            if reverse {
                items.reverse();
            }
            Ok(Value::list(items))
        }
        Builtin::IsInstance => {
            let mut slots = args.bind("isinstance", &["obj", "type"], 2)?;
            let obj = slots.value(0);
            let Value::Builtin(kind) = slots.value(1) else {
                return Err(Fault::type_error("isinstance() arg 2 must be a type"));
            };
            let matched = match kind {
                Builtin::Str => matches!(obj, Value::Str(_)),
                Builtin::Int => matches!(obj, Value::Int(_) | Value::Bool(_)),
                Builtin::Float => matches!(obj, Value::Float(_)),
                Builtin::Bool => matches!(obj, Value::Bool(_)),
                Builtin::List => matches!(obj, Value::List(_)),
                Builtin::Container => matches!(obj, Value::Container(_)),
                Builtin::Image => matches!(obj, Value::Image(_)),
                other => {
                    return Err(Fault::type_error(format!(
                        "isinstance() arg 2 must be a type, not {}",
                        other.name()
                    )))
                }
            };
            Ok(Value::Bool(matched))
        }
        Builtin::Container => {
            let mut slots = args.bind("Container", &["image", "name"], 1)?;
            let image = match slots.value(0) {
                Value::Image(image) => image.id().to_string(),
                other => expect_str(other, "Container() image")?,
            };
            let name = slots
                .optional(1)
                .map(|v| expect_str(v, "Container() name"))
                .transpose()?;
            let handle = caps.create_container(&image, name.as_deref())?;
            Ok(Value::Container(handle))
        }
        Builtin::Image => {
            let mut slots = args.bind("Image", &["ref"], 1)?;
            let reference = expect_str(slots.value(0), "Image() ref")?;
            Ok(Value::Image(ImageHandle::new(caps.tool().clone(), reference)))
        }
    }
}

fn print(caps: &Capabilities, args: CallArgs) -> Result<Value, Fault> {
    let mut sep = " ".to_string();
    let mut end = "\n".to_string();
    for (name, value) in args.keywords {
        match name.as_str() {
            "sep" => sep = expect_str(value, "print() sep")?,
            "end" => end = expect_str(value, "print() end")?,
            other => {
                return Err(Fault::type_error(format!(
                    "print() got an unexpected keyword argument '{}'",
                    other
                )))
            }
        }
    }
    let parts: Vec<String> = args.positional.iter().map(Value::to_display).collect();
    caps.write(&format!("{}{}", parts.join(&sep), end))?;
    Ok(Value::None)
}

fn to_int(value: Value) -> Result<Value, Fault> {
    match value {
        Value::Int(i) => Ok(Value::Int(i)),
        Value::Bool(b) => Ok(Value::Int(i64::from(b))),
        Value::Float(f) => {
            if !f.is_finite() || f.abs() >= 9.2e18 {
                return Err(Fault::value_error(format!(
                    "cannot convert float {} to integer",
                    f
                )));
            }
            Ok(Value::Int(f.trunc() as i64))
        }
        Value::Str(s) => s.trim().parse::<i64>().map(Value::Int).map_err(|_| {
            Fault::value_error(format!("invalid literal for int(): '{}'", s))
        }),
        other => Err(Fault::type_error(format!(
            "int() argument must be a string or a number, not '{}'",
            other.type_name()
        ))),
    }
}

fn to_float(value: Value) -> Result<Value, Fault> {
    match value {
        Value::Float(f) => Ok(Value::Float(f)),
        Value::Int(i) => Ok(Value::Float(i as f64)),
        Value::Bool(b) => Ok(Value::Float(if b { 1.0 } else { 0.0 })),
        Value::Str(s) => s.trim().parse::<f64>().map(Value::Float).map_err(|_| {
            Fault::value_error(format!("could not convert string to float: '{}'", s))
        }),
        other => Err(Fault::type_error(format!(
            "float() argument must be a string or a number, not '{}'",
            other.type_name()
        ))),
    }
}

fn range(args: CallArgs) -> Result<Value, Fault> {
    let mut slots = args.bind("range", &["start", "stop", "step"], 1)?;
    let first = expect_int(&slots.value(0), "range() argument")?;
    let (start, stop) = match slots.take(1) {
        Some(stop) => (first, expect_int(&stop, "range() argument")?),
        None => (0, first),
    };
    let step = match slots.take(2) {
        Some(step) => expect_int(&step, "range() argument")?,
        None => 1,
    };
    if step == 0 {
        return Err(Fault::value_error("range() arg 3 must not be zero"));
    }
    let span = if step > 0 {
        stop.saturating_sub(start)
    } else {
        start.saturating_sub(stop)
    };
    if span / step.saturating_abs() > MAX_RANGE {
        return Err(Fault::value_error("range() is too large"));
    }
    let mut items = Vec::new();
    let mut current = start;
    while (step > 0 && current < stop) || (step < 0 && current > stop) {
        items.push(Value::Int(current));
        current = match current.checked_add(step) {
            Some(next) => next,
            None => break,
        };
    }
    Ok(Value::list(items))
}

pub(crate) fn has_method(value: &Value, name: &str) -> bool {
    let table = match value {
        Value::Str(_) => STR_METHODS,
        Value::List(_) => LIST_METHODS,
        Value::Dict(_) => DICT_METHODS,
        _ => return false,
    };
    table.contains(&name)
}

pub(crate) fn call_str_method(s: &str, name: &str, args: CallArgs) -> Result<Value, Fault> {
    match name {
        "format" => format_string(s, &args.positional, &args.keywords).map(Value::Str),
        "split" => {
            let mut slots = args.bind("split", &["sep"], 0)?;
            let parts: Vec<Value> = match slots.optional(0) {
                None => s.split_whitespace().map(Value::str).collect(),
                Some(sep) => {
                    let sep = expect_str(sep, "split() sep")?;
                    if sep.is_empty() {
                        return Err(Fault::value_error("empty separator"));
                    }
                    s.split(sep.as_str()).map(Value::str).collect()
                }
            };
            Ok(Value::list(parts))
        }
        "strip" => {
            let mut slots = args.bind("strip", &["chars"], 0)?;
            match slots.optional(0) {
                None => Ok(Value::str(s.trim())),
                Some(chars) => {
                    let chars: Vec<char> = expect_str(chars, "strip() chars")?.chars().collect();
                    Ok(Value::str(s.trim_matches(|c| chars.contains(&c))))
                }
            }
        }
        "startswith" | "endswith" => {
            let mut slots = args.bind(name, &["affix"], 1)?;
            let affix = expect_str(slots.value(0), &format!("{}() argument", name))?;
            Ok(Value::Bool(if name == "startswith" {
                s.starts_with(affix.as_str())
            } else {
                s.ends_with(affix.as_str())
            }))
        }
        "replace" => {
            let mut slots = args.bind("replace", &["old", "new"], 2)?;
            let old = expect_str(slots.value(0), "replace() old")?;
            let new = expect_str(slots.value(1), "replace() new")?;
            Ok(Value::Str(s.replace(old.as_str(), &new)))
        }
        "lower" => {
            args.bind("lower", &[], 0)?;
            Ok(Value::Str(s.to_lowercase()))
        }
        "upper" => {
            args.bind("upper", &[], 0)?;
            Ok(Value::Str(s.to_uppercase()))
        }
        "join" => {
            let mut slots = args.bind("join", &["iterable"], 1)?;
            let parts = string_list(&slots.value(0), "join()")?;
            Ok(Value::Str(parts.join(s)))
        }
        other => Err(Fault::attribute_error("str", other)),
    }
}

fn format_string(
    template: &str,
    positional: &[Value],
    keywords: &[(String, Value)],
) -> Result<String, Fault> {
    let mut out = String::with_capacity(template.len());
    let mut chars = template.chars().peekable();
    let mut next_auto = 0;
    while let Some(c) = chars.next() {
        match c {
            '{' if chars.peek() == Some(&'{') => {
                chars.next();
                out.push('{');
            }
            '{' => {
                let mut field = String::new();
                loop {
                    match chars.next() {
                        Some('}') => break,
                        Some(c) => field.push(c),
                        None => return Err(Fault::value_error("unmatched '{' in format string")),
                    }
                }
                if field.contains(':') || field.contains('!') {
                    return Err(Fault::value_error("format specs are not supported"));
                }
                let value = if field.is_empty() {
                    let value = positional.get(next_auto);
                    next_auto += 1;
                    value.ok_or_else(|| {
                        Fault::new(ErrorKind::IndexError, "not enough arguments for format string")
                    })?
                } else if let Ok(idx) = field.parse::<usize>() {
                    positional.get(idx).ok_or_else(|| {
                        Fault::new(ErrorKind::IndexError, format!("format index {} out of range", idx))
                    })?
                } else {
                    keywords
                        .iter()
                        .find(|(k, _)| *k == field)
                        .map(|(_, v)| v)
                        .ok_or_else(|| Fault::key_error(&field))?
                };
                out.push_str(&value.to_display());
            }
            '}' if chars.peek() == Some(&'}') => {
                chars.next();
                out.push('}');
            }
            '}' => return Err(Fault::value_error("single '}' encountered in format string")),
            c => out.push(c),
        }
    }
    Ok(out)
}

pub(crate) fn call_list_method(list: &Value, name: &str, args: CallArgs) -> Result<Value, Fault> {
    let Value::List(items) = list else {
        return Err(Fault::attribute_error(list.type_name(), name));
    };
    match name {
        "append" => {
            let mut slots = args.bind("append", &["item"], 1)?;
            items.borrow_mut().push(slots.value(0));
            Ok(Value::None)
        }
        "extend" => {
            let mut slots = args.bind("extend", &["iterable"], 1)?;
            let extra = ops::iterate(&slots.value(0))?;
            let mut list = items.borrow_mut();
            ops::grown_list(list.len(), extra.len())?;
            list.extend(extra);
            Ok(Value::None)
        }
        "pop" => {
            let mut slots = args.bind("pop", &["index"], 0)?;
            let mut items = items.borrow_mut();
            if items.is_empty() {
                return Err(Fault::new(ErrorKind::IndexError, "pop from empty list"));
            }
            let len = i64::try_from(items.len()).unwrap_or(i64::MAX);
            let raw = match slots.take(0) {
                Some(index) => expect_int(&index, "pop() index")?,
                None => -1,
            };
            let resolved = if raw < 0 { raw + len } else { raw };
            if resolved < 0 || resolved >= len {
                return Err(Fault::new(ErrorKind::IndexError, "pop index out of range"));
            }
            Ok(items.remove(resolved as usize))
        }
        other => Err(Fault::attribute_error("list", other)),
    }
}

pub(crate) fn call_dict_method(dict: &Value, name: &str, args: CallArgs) -> Result<Value, Fault> {
    let Value::Dict(map) = dict else {
        return Err(Fault::attribute_error(dict.type_name(), name));
    };
    match name {
        "get" => {
            let mut slots = args.bind("get", &["key", "default"], 1)?;
            let key = expect_str(slots.value(0), "dict key")?;
            let found = map.borrow().get(&key).cloned();
            Ok(found.or_else(|| slots.take(1)).unwrap_or(Value::None))
        }
        "keys" => {
            args.bind("keys", &[], 0)?;
            Ok(Value::list(map.borrow().keys().map(|k| Value::str(k.as_str())).collect()))
        }
        "values" => {
            args.bind("values", &[], 0)?;
            Ok(Value::list(map.borrow().values().cloned().collect()))
        }
        "items" => {
            args.bind("items", &[], 0)?;
            Ok(Value::list(
                map.borrow()
                    .iter()
                    .map(|(k, v)| Value::list(vec![Value::str(k.as_str()), v.clone()]))
                    .collect(),
            ))
        }
        "pop" => {
            let mut slots = args.bind("pop", &["key", "default"], 1)?;
            let key = expect_str(slots.value(0), "dict key")?;
            let removed = map.borrow_mut().remove(&key);
            match (removed, slots.take(1)) {
                (Some(value), _) => Ok(value),
                (None, Some(default)) => Ok(default),
                (None, None) => Err(Fault::key_error(&key)),
            }
        }
        "update" => {
            let mut slots = args.bind("update", &["other"], 1)?;
            let entries = mapping_entries(&slots.value(0))?;
            map.borrow_mut().extend(entries);
            Ok(Value::None)
        }
        other => Err(Fault::attribute_error("dict", other)),
    }
}

/// Key/value pairs of a dict or a container mapping view.
pub(crate) fn mapping_entries(value: &Value) -> Result<BTreeMap<String, Value>, Fault> {
    match value {
        Value::Dict(map) => Ok(map.borrow().clone()),
        Value::View(handle, field @ (ViewField::Environ | ViewField::Labels)) => {
            let ctr = handle.borrow();
            let config = ctr.config();
            let source = if *field == ViewField::Environ {
                &config.environ
            } else {
                &config.labels
            };
            Ok(source
                .iter()
                .map(|(k, v)| (k.clone(), Value::str(v.as_str())))
                .collect())
        }
        other => Err(Fault::type_error(format!(
            "expected a dict, not {}",
            other.type_name()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(values: Vec<Value>) -> CallArgs {
        CallArgs::new(values)
    }

    #[test]
    fn binding_reports_missing_and_unknown_arguments() {
        let err = args(vec![]).bind("f", &["a"], 1).err().unwrap();
        assert_eq!(err.describe(), "TypeError: f() missing required argument 'a'");

        let call = CallArgs {
            positional: vec![Value::Int(1)],
            keywords: vec![("a".into(), Value::Int(2))],
        };
        assert!(call.bind("f", &["a"], 1).is_err());

        let call = CallArgs {
            positional: vec![],
            keywords: vec![("zzz".into(), Value::Int(2))],
        };
        assert!(call.bind("f", &["a"], 0).is_err());
    }

    #[test]
    fn format_supports_auto_indexed_and_named_fields() {
        let out = format_string(
            "{}:{1} {name} {{x}}",
            &[Value::str("alpine"), Value::Int(3)],
            &[("name".into(), Value::Bool(true))],
        )
        .unwrap();
        assert_eq!(out, "alpine:3 True {x}");
        assert!(format_string("{", &[], &[]).is_err());
        assert!(format_string("{}", &[], &[]).is_err());
    }

    #[test]
    fn string_methods() {
        let split = call_str_method("a,b,,c", "split", args(vec![Value::str(",")])).unwrap();
        assert_eq!(split.repr(), "['a', 'b', '', 'c']");
        let words = call_str_method("  a  b ", "split", args(vec![])).unwrap();
        assert_eq!(words.repr(), "['a', 'b']");
        let joined = call_str_method(
            "-",
            "join",
            args(vec![Value::list(vec![Value::str("x"), Value::str("y")])]),
        )
        .unwrap();
        assert_eq!(joined.to_display(), "x-y");
        assert!(call_str_method("-", "join", args(vec![Value::list(vec![Value::Int(1)])])).is_err());
    }

    #[test]
    fn range_matches_half_open_semantics() {
        let r = range(args(vec![Value::Int(3)])).unwrap();
        assert_eq!(r.repr(), "[0, 1, 2]");
        let r = range(args(vec![Value::Int(5), Value::Int(0), Value::Int(-2)])).unwrap();
        assert_eq!(r.repr(), "[5, 3, 1]");
        assert!(range(args(vec![Value::Int(1), Value::Int(2), Value::Int(0)])).is_err());
    }

    #[test]
    fn numeric_conversions() {
        assert_eq!(to_int(Value::str(" 7 ")).unwrap().repr(), "7");
        assert_eq!(to_int(Value::Float(-2.9)).unwrap().repr(), "-2");
        assert!(to_int(Value::str("seven")).is_err());
        assert_eq!(to_float(Value::Int(2)).unwrap().repr(), "2.0");
    }

    #[test]
    fn list_pop_and_dict_pop() {
        let list = Value::list(vec![Value::Int(1), Value::Int(2)]);
        let popped = call_list_method(&list, "pop", args(vec![])).unwrap();
        assert_eq!(popped.repr(), "2");
        let dict = Value::dict(BTreeMap::from([("a".to_string(), Value::Int(1))]));
        let missing = call_dict_method(&dict, "pop", args(vec![Value::str("b"), Value::None])).unwrap();
        assert!(matches!(missing, Value::None));
        assert!(call_dict_method(&dict, "pop", args(vec![Value::str("b")])).is_err());
    }
}
