use std::cmp::Ordering;
use std::rc::Rc;

use super::fault::Fault;
use super::value::{ContainerRef, Value, ViewField, MAX_NESTING};
use crate::error::ErrorKind;
use crate::script::ast::{BinOp, CmpOp};

#[derive(Clone, Copy)]
enum Num {
    Int(i64),
    Float(f64),
}

impl Num {
    fn as_f64(self) -> f64 {
        match self {
            Num::Int(i) => i as f64,
            Num::Float(f) => f,
        }
    }
}

fn num(value: &Value) -> Option<Num> {
    match value {
        Value::Bool(b) => Some(Num::Int(i64::from(*b))),
        Value::Int(i) => Some(Num::Int(*i)),
        Value::Float(f) => Some(Num::Float(*f)),
        _ => None,
    }
}

/// Longest list a single operation may build.
pub(crate) const MAX_LIST_LEN: usize = 10_000_000;
/// Longest string, in bytes, a single operation may build.
pub(crate) const MAX_STR_LEN: usize = 1 << 28;

fn overflow() -> Fault {
    Fault::value_error("integer overflow")
}

fn bounded(len: Option<usize>, max: usize, what: &str) -> Result<usize, Fault> {
    match len {
        Some(len) if len <= max => Ok(len),
        _ => Err(Fault::new(ErrorKind::MemoryError, format!("{} too large", what))),
    }
}

/// Length of a list after adding `extra` items to `len`.
pub(crate) fn grown_list(len: usize, extra: usize) -> Result<usize, Fault> {
    bounded(len.checked_add(extra), MAX_LIST_LEN, "list")
}

fn repeat_count(n: i64) -> usize {
    if n <= 0 {
        0
    } else {
        usize::try_from(n).unwrap_or(usize::MAX)
    }
}

fn nested_too_deep(what: &str) -> Fault {
    Fault::new(
        ErrorKind::RecursionError,
        format!("maximum recursion depth exceeded in {}", what),
    )
}

fn unsupported(op: &str, lhs: &Value, rhs: &Value) -> Fault {
    Fault::type_error(format!(
        "unsupported operand types for {}: '{}' and '{}'",
        op,
        lhs.type_name(),
        rhs.type_name()
    ))
}

pub(crate) fn binary(op: BinOp, lhs: &Value, rhs: &Value) -> Result<Value, Fault> {
    match (op, lhs, rhs) {
        (BinOp::Add, Value::Str(a), Value::Str(b)) => {
            bounded(a.len().checked_add(b.len()), MAX_STR_LEN, "string")?;
            return Ok(Value::Str(format!("{}{}", a, b)));
        }
        (BinOp::Add, Value::List(a), Value::List(b)) => {
            let (a, b) = (a.borrow(), b.borrow());
            let mut items = Vec::with_capacity(grown_list(a.len(), b.len())?);
            items.extend(a.iter().cloned());
            items.extend(b.iter().cloned());
            return Ok(Value::list(items));
        }
        (BinOp::Mul, Value::Str(s), Value::Int(n)) | (BinOp::Mul, Value::Int(n), Value::Str(s)) => {
            let count = repeat_count(*n);
            if bounded(s.len().checked_mul(count), MAX_STR_LEN, "repeated string")? == 0 {
                return Ok(Value::str(""));
            }
            return Ok(Value::Str(s.repeat(count)));
        }
        (BinOp::Mul, Value::List(items), Value::Int(n))
        | (BinOp::Mul, Value::Int(n), Value::List(items)) => {
            let items = items.borrow();
            let count = repeat_count(*n);
            let len = bounded(items.len().checked_mul(count), MAX_LIST_LEN, "repeated list")?;
            if len == 0 {
                return Ok(Value::list(Vec::new()));
            }
            let mut out = Vec::with_capacity(len);
            for _ in 0..count {
                out.extend(items.iter().cloned());
            }
            return Ok(Value::list(out));
        }
        _ => {}
    }

    let (a, b) = match (num(lhs), num(rhs)) {
        (Some(a), Some(b)) => (a, b),
        _ => return Err(unsupported(op.symbol(), lhs, rhs)),
    };

    match (a, b) {
        (Num::Int(x), Num::Int(y)) => int_op(op, x, y),
        _ => float_op(op, a.as_f64(), b.as_f64()),
    }
}

fn int_op(op: BinOp, x: i64, y: i64) -> Result<Value, Fault> {
    let zero = || Fault::new(ErrorKind::ZeroDivisionError, "division by zero");
    let value = match op {
        BinOp::Add => x.checked_add(y).ok_or_else(overflow)?,
        BinOp::Sub => x.checked_sub(y).ok_or_else(overflow)?,
        BinOp::Mul => x.checked_mul(y).ok_or_else(overflow)?,
        BinOp::Div => {
            if y == 0 {
                return Err(zero());
            }
            return Ok(Value::Float(x as f64 / y as f64));
        }
        BinOp::FloorDiv => {
            if y == 0 {
                return Err(zero());
            }
            let q = x.checked_div(y).ok_or_else(overflow)?;
            if x % y != 0 && ((x < 0) != (y < 0)) {
                q - 1
            } else {
                q
            }
        }
        BinOp::Mod => {
            if y == 0 {
                return Err(zero());
            }
            let r = x.checked_rem(y).ok_or_else(overflow)?;
            if r != 0 && ((r < 0) != (y < 0)) {
                r + y
            } else {
                r
            }
        }
    };
    Ok(Value::Int(value))
}

fn float_op(op: BinOp, x: f64, y: f64) -> Result<Value, Fault> {
    if y == 0.0 && matches!(op, BinOp::Div | BinOp::FloorDiv | BinOp::Mod) {
        return Err(Fault::new(ErrorKind::ZeroDivisionError, "float division by zero"));
    }
    let value = match op {
        BinOp::Add => x + y,
        BinOp::Sub => x - y,
        BinOp::Mul => x * y,
        BinOp::Div => x / y,
        BinOp::FloorDiv => (x / y).floor(),
        BinOp::Mod => x - y * (x / y).floor(),
    };
    Ok(Value::Float(value))
}

pub(crate) fn negate(value: &Value) -> Result<Value, Fault> {
    match num(value) {
        Some(Num::Int(i)) => i.checked_neg().map(Value::Int).ok_or_else(overflow),
        Some(Num::Float(f)) => Ok(Value::Float(-f)),
        None => Err(Fault::type_error(format!(
            "bad operand type for unary -: '{}'",
            value.type_name()
        ))),
    }
}

pub(crate) fn equals(lhs: &Value, rhs: &Value) -> Result<bool, Fault> {
    equals_at(lhs, rhs, 0)
}

fn equals_at(lhs: &Value, rhs: &Value, depth: usize) -> Result<bool, Fault> {
    if depth > MAX_NESTING {
        return Err(nested_too_deep("comparison"));
    }
    if let (Some(a), Some(b)) = (num(lhs), num(rhs)) {
        return Ok(match (a, b) {
            (Num::Int(x), Num::Int(y)) => x == y,
            _ => a.as_f64() == b.as_f64(),
        });
    }
    let equal = match (lhs, rhs) {
        (Value::None, Value::None) => true,
        (Value::Str(a), Value::Str(b)) => a == b,
        (Value::List(a), Value::List(b)) => {
            if Rc::ptr_eq(a, b) {
                return Ok(true);
            }
            let (a, b) = (a.borrow(), b.borrow());
            if a.len() != b.len() {
                return Ok(false);
            }
            for (x, y) in a.iter().zip(b.iter()) {
                if !equals_at(x, y, depth + 1)? {
                    return Ok(false);
                }
            }
            true
        }
        (Value::Dict(a), Value::Dict(b)) => {
            if Rc::ptr_eq(a, b) {
                return Ok(true);
            }
            let (a, b) = (a.borrow(), b.borrow());
            if a.len() != b.len() {
                return Ok(false);
            }
            for (key, value) in a.iter() {
                let Some(other) = b.get(key) else {
                    return Ok(false);
                };
                if !equals_at(value, other, depth + 1)? {
                    return Ok(false);
                }
            }
            true
        }
        (Value::Function(a), Value::Function(b)) => Rc::ptr_eq(a, b),
        (Value::Class(a), Value::Class(b)) => Rc::ptr_eq(a, b),
        (Value::Builtin(a), Value::Builtin(b)) => a == b,
        (Value::Container(a), Value::Container(b)) => Rc::ptr_eq(a, b),
        (Value::Image(a), Value::Image(b)) => a == b,
        (Value::View(a, fa), Value::View(b, fb)) => Rc::ptr_eq(a, b) && fa == fb,
        _ => false,
    };
    Ok(equal)
}

/// Ordering for `<`, `<=`, `>`, `>=` and `sorted`.
pub(crate) fn ordering(lhs: &Value, rhs: &Value) -> Result<Ordering, Fault> {
    ordering_at(lhs, rhs, 0)
}

fn ordering_at(lhs: &Value, rhs: &Value, depth: usize) -> Result<Ordering, Fault> {
    if depth > MAX_NESTING {
        return Err(nested_too_deep("comparison"));
    }
    if let (Some(a), Some(b)) = (num(lhs), num(rhs)) {
        return match (a, b) {
            (Num::Int(x), Num::Int(y)) => Ok(x.cmp(&y)),
            _ => a
                .as_f64()
                .partial_cmp(&b.as_f64())
                .ok_or_else(|| Fault::value_error("cannot order NaN")),
        };
    }
    match (lhs, rhs) {
        (Value::Str(a), Value::Str(b)) => Ok(a.cmp(b)),
        (Value::List(a), Value::List(b)) => {
            if Rc::ptr_eq(a, b) {
                return Ok(Ordering::Equal);
            }
            let (a, b) = (a.borrow(), b.borrow());
            for (x, y) in a.iter().zip(b.iter()) {
                match ordering_at(x, y, depth + 1)? {
                    Ordering::Equal => continue,
                    other => return Ok(other),
                }
            }
            Ok(a.len().cmp(&b.len()))
        }
        _ => Err(Fault::type_error(format!(
            "'<' not supported between instances of '{}' and '{}'",
            lhs.type_name(),
            rhs.type_name()
        ))),
    }
}

pub(crate) fn compare(op: CmpOp, lhs: &Value, rhs: &Value) -> Result<bool, Fault> {
    Ok(match op {
        CmpOp::Eq => equals(lhs, rhs)?,
        CmpOp::Ne => !equals(lhs, rhs)?,
        CmpOp::Lt => ordering(lhs, rhs)? == Ordering::Less,
        CmpOp::Le => ordering(lhs, rhs)? != Ordering::Greater,
        CmpOp::Gt => ordering(lhs, rhs)? == Ordering::Greater,
        CmpOp::Ge => ordering(lhs, rhs)? != Ordering::Less,
        CmpOp::In => contains(rhs, lhs)?,
        CmpOp::NotIn => !contains(rhs, lhs)?,
    })
}

/// `item in container`.
pub(crate) fn contains(container: &Value, item: &Value) -> Result<bool, Fault> {
    match container {
        Value::Str(haystack) => match item {
            Value::Str(needle) => Ok(haystack.contains(needle.as_str())),
            other => Err(Fault::type_error(format!(
                "'in <string>' requires string as left operand, not {}",
                other.type_name()
            ))),
        },
        Value::List(items) => {
            for x in items.borrow().iter() {
                if equals(x, item)? {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        Value::Dict(map) => Ok(match item {
            Value::Str(key) => map.borrow().contains_key(key),
            _ => false,
        }),
        Value::View(handle, field) => Ok(match item {
            Value::Str(key) => {
                let ctr = handle.borrow();
                let config = ctr.config();
                match field {
                    ViewField::Environ => config.environ.contains_key(key),
                    ViewField::Labels => config.labels.contains_key(key),
                    ViewField::Volumes => config.volumes.contains(key),
                }
            }
            _ => false,
        }),
        other => Err(Fault::type_error(format!(
            "argument of type '{}' is not iterable",
            other.type_name()
        ))),
    }
}

/// Snapshot of the items a `for` loop visits.
pub(crate) fn iterate(value: &Value) -> Result<Vec<Value>, Fault> {
    match value {
        Value::Str(s) => Ok(s.chars().map(|c| Value::Str(c.to_string())).collect()),
        Value::List(items) => Ok(items.borrow().clone()),
        Value::Dict(map) => Ok(map.borrow().keys().map(|k| Value::str(k.as_str())).collect()),
        Value::View(handle, field) => {
            let ctr = handle.borrow();
            let config = ctr.config();
            let keys: Vec<Value> = match field {
                ViewField::Environ => config.environ.keys().map(|k| Value::str(k.as_str())).collect(),
                ViewField::Labels => config.labels.keys().map(|k| Value::str(k.as_str())).collect(),
                ViewField::Volumes => config.volumes.iter().map(|v| Value::str(v.as_str())).collect(),
            };
            Ok(keys)
        }
        other => Err(Fault::type_error(format!(
            "'{}' object is not iterable",
            other.type_name()
        ))),
    }
}

pub(crate) fn length(value: &Value) -> Result<usize, Fault> {
    match value {
        Value::Str(s) => Ok(s.chars().count()),
        Value::List(items) => Ok(items.borrow().len()),
        Value::Dict(map) => Ok(map.borrow().len()),
        Value::View(handle, field) => Ok(super::value::view_len(handle, *field)),
        other => Err(Fault::type_error(format!(
            "object of type '{}' has no len()",
            other.type_name()
        ))),
    }
}

fn list_index(len: usize, index: &Value) -> Result<usize, Fault> {
    let raw = match index {
        Value::Int(i) => *i,
        Value::Bool(b) => i64::from(*b),
        other => {
            return Err(Fault::type_error(format!(
                "indices must be integers, not {}",
                other.type_name()
            )))
        }
    };
    let len_i = i64::try_from(len).unwrap_or(i64::MAX);
    let resolved = if raw < 0 { raw + len_i } else { raw };
    if resolved < 0 || resolved >= len_i {
        return Err(Fault::new(ErrorKind::IndexError, "index out of range"));
    }
    usize::try_from(resolved).map_err(|_| Fault::new(ErrorKind::IndexError, "index out of range"))
}

fn key_of(index: &Value) -> Result<&str, Fault> {
    match index {
        Value::Str(key) => Ok(key),
        other => Err(Fault::type_error(format!(
            "keys must be str, not {}",
            other.type_name()
        ))),
    }
}

/// Coerce a value stored into a container mapping (environment, labels).
pub(crate) fn config_string(value: &Value, what: &str) -> Result<String, Fault> {
    match value {
        Value::Str(s) => Ok(s.clone()),
        Value::Int(_) | Value::Float(_) | Value::Bool(_) => Ok(value.to_display()),
        other => Err(Fault::type_error(format!(
            "{} values must be str, not {}",
            what,
            other.type_name()
        ))),
    }
}

pub(crate) fn get_item(target: &Value, index: &Value) -> Result<Value, Fault> {
    match target {
        Value::List(items) => {
            let items = items.borrow();
            let idx = list_index(items.len(), index)?;
            Ok(items[idx].clone())
        }
        Value::Str(s) => {
            let chars: Vec<char> = s.chars().collect();
            let idx = list_index(chars.len(), index)?;
            Ok(Value::Str(chars[idx].to_string()))
        }
        Value::Dict(map) => {
            let key = key_of(index)?;
            map.borrow().get(key).cloned().ok_or_else(|| Fault::key_error(key))
        }
        Value::View(handle, field @ (ViewField::Environ | ViewField::Labels)) => {
            let key = key_of(index)?;
            mapping_get(handle, *field, key)
                .map(Value::Str)
                .ok_or_else(|| Fault::key_error(key))
        }
        other => Err(Fault::type_error(format!(
            "'{}' object is not subscriptable",
            other.type_name()
        ))),
    }
}

pub(crate) fn set_item(target: &Value, index: &Value, value: Value) -> Result<(), Fault> {
    match target {
        Value::List(items) => {
            let mut items = items.borrow_mut();
            let idx = list_index(items.len(), index)?;
            items[idx] = value;
            Ok(())
        }
        Value::Dict(map) => {
            let key = key_of(index)?.to_string();
            map.borrow_mut().insert(key, value);
            Ok(())
        }
        Value::View(handle, field @ (ViewField::Environ | ViewField::Labels)) => {
            let key = key_of(index)?.to_string();
            let text = config_string(&value, field.name())?;
            mapping_insert(handle, *field, key, text);
            Ok(())
        }
        other => Err(Fault::type_error(format!(
            "'{}' object does not support item assignment",
            other.type_name()
        ))),
    }
}

pub(crate) fn del_item(target: &Value, index: &Value) -> Result<(), Fault> {
    match target {
        Value::List(items) => {
            let mut items = items.borrow_mut();
            let idx = list_index(items.len(), index)?;
            items.remove(idx);
            Ok(())
        }
        Value::Dict(map) => {
            let key = key_of(index)?;
            map.borrow_mut()
                .remove(key)
                .map(|_| ())
                .ok_or_else(|| Fault::key_error(key))
        }
        Value::View(handle, field @ (ViewField::Environ | ViewField::Labels)) => {
            let key = key_of(index)?;
            mapping_remove(handle, *field, key)
                .map(|_| ())
                .ok_or_else(|| Fault::key_error(key))
        }
        other => Err(Fault::type_error(format!(
            "'{}' object does not support item deletion",
            other.type_name()
        ))),
    }
}

pub(crate) fn mapping_get(handle: &ContainerRef, field: ViewField, key: &str) -> Option<String> {
    let ctr = handle.borrow();
    let config = ctr.config();
    match field {
        ViewField::Environ => config.environ.get(key).cloned(),
        ViewField::Labels => config.labels.get(key).cloned(),
        ViewField::Volumes => None,
    }
}

pub(crate) fn mapping_insert(handle: &ContainerRef, field: ViewField, key: String, value: String) {
    let mut ctr = handle.borrow_mut();
    let config = ctr.config_mut();
    match field {
        ViewField::Environ => {
            config.environ.insert(key, value);
        }
        ViewField::Labels => {
            config.labels.insert(key, value);
        }
        ViewField::Volumes => {}
    }
}

pub(crate) fn mapping_remove(handle: &ContainerRef, field: ViewField, key: &str) -> Option<String> {
    let mut ctr = handle.borrow_mut();
    let config = ctr.config_mut();
    match field {
        ViewField::Environ => config.environ.remove(key),
        ViewField::Labels => config.labels.remove(key),
        ViewField::Volumes => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integer_division_floors_like_the_language_expects() {
        let div = |a, b| binary(BinOp::FloorDiv, &Value::Int(a), &Value::Int(b)).unwrap();
        let rem = |a, b| binary(BinOp::Mod, &Value::Int(a), &Value::Int(b)).unwrap();
        assert!(equals(&div(7, 2), &Value::Int(3)).unwrap());
        assert!(equals(&div(-7, 2), &Value::Int(-4)).unwrap());
        assert!(equals(&rem(-7, 2), &Value::Int(1)).unwrap());
        assert!(equals(&rem(7, -2), &Value::Int(-1)).unwrap());
    }

    #[test]
    fn true_division_always_yields_float() {
        let v = binary(BinOp::Div, &Value::Int(6), &Value::Int(4)).unwrap();
        assert!(matches!(v, Value::Float(f) if f == 1.5));
        let err = binary(BinOp::Div, &Value::Int(1), &Value::Int(0)).unwrap_err();
        assert!(matches!(err, Fault::Raise { kind: ErrorKind::ZeroDivisionError, .. }));
    }

    #[test]
    fn mixed_types_are_type_errors() {
        let err = binary(BinOp::Add, &Value::str("a"), &Value::Int(1)).unwrap_err();
        assert!(matches!(err, Fault::Raise { kind: ErrorKind::TypeError, .. }));
        assert!(ordering(&Value::str("a"), &Value::Int(1)).is_err());
    }

    #[test]
    fn sequences_concatenate_and_repeat() {
        let v = binary(BinOp::Mul, &Value::str("ab"), &Value::Int(3)).unwrap();
        assert_eq!(v.to_display(), "ababab");
        let joined = binary(
            BinOp::Add,
            &Value::list(vec![Value::Int(1)]),
            &Value::list(vec![Value::Int(2)]),
        )
        .unwrap();
        assert_eq!(joined.repr(), "[1, 2]");

        let empty = binary(BinOp::Mul, &Value::list(Vec::new()), &Value::Int(i64::MAX)).unwrap();
        assert_eq!(empty.repr(), "[]");
        let none = binary(BinOp::Mul, &Value::Int(-2), &Value::str("ab")).unwrap();
        assert_eq!(none.to_display(), "");
    }

    #[test]
    fn oversized_repeats_are_memory_errors() {
        let huge = Value::Int(i64::MAX);
        let err = binary(BinOp::Mul, &Value::str("ab"), &huge).unwrap_err();
        assert!(matches!(err, Fault::Raise { kind: ErrorKind::MemoryError, .. }));

        let pair = Value::list(vec![Value::Int(1), Value::Int(2)]);
        let err = binary(BinOp::Mul, &huge, &pair).unwrap_err();
        assert_eq!(err.describe(), "MemoryError: repeated list too large");

        assert!(grown_list(MAX_LIST_LEN, 1).is_err());
        assert!(grown_list(usize::MAX, 1).is_err());
    }

    #[test]
    fn self_referencing_lists_compare_without_recursing_forever() {
        let a = Value::list(Vec::new());
        let Value::List(items) = &a else { unreachable!() };
        items.borrow_mut().push(a.clone());
        assert!(equals(&a, &a).unwrap());
        assert_eq!(ordering(&a, &a).unwrap(), Ordering::Equal);
        assert!(contains(&a, &a).unwrap());

        let b = Value::list(Vec::new());
        let Value::List(other) = &b else { unreachable!() };
        other.borrow_mut().push(b.clone());
        let err = equals(&a, &b).unwrap_err();
        assert!(matches!(err, Fault::Raise { kind: ErrorKind::RecursionError, .. }));
        assert!(ordering(&a, &b).is_err());

        items.borrow_mut().clear();
        other.borrow_mut().clear();
    }

    #[test]
    fn negative_indices_and_missing_keys() {
        let list = Value::list(vec![Value::Int(1), Value::Int(2)]);
        assert!(equals(&get_item(&list, &Value::Int(-1)).unwrap(), &Value::Int(2)).unwrap());
        assert!(get_item(&list, &Value::Int(2)).is_err());

        let dict = Value::dict(Default::default());
        let err = get_item(&dict, &Value::str("X")).unwrap_err();
        assert_eq!(err.describe(), "KeyError: 'X'");
    }

    #[test]
    fn membership() {
        assert!(contains(&Value::str("alpine:3"), &Value::str("pine")).unwrap());
        let list = Value::list(vec![Value::Int(1), Value::Float(2.0)]);
        assert!(contains(&list, &Value::Int(2)).unwrap());
        assert!(contains(&Value::Int(3), &Value::Int(3)).is_err());
    }
}
