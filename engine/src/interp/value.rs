use capsules_buildah::{ContainerHandle, ImageHandle};
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use crate::literal::{format_float, Literal};
use crate::script::ast::FunctionDef;

pub(crate) type ContainerRef = Rc<RefCell<ContainerHandle>>;
pub(crate) type ListRef = Rc<RefCell<Vec<Value>>>;
pub(crate) type DictRef = Rc<RefCell<BTreeMap<String, Value>>>;

/// How far comparison and repr descend into nested lists and dicts.
pub(crate) const MAX_NESTING: usize = 200;

#[derive(Clone)]
pub(crate) enum Value {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(ListRef),
    Dict(DictRef),
    Function(Rc<Function>),
    Class(Rc<Class>),
    Builtin(Builtin),
    Method(Rc<Method>),
    Container(ContainerRef),
    Image(ImageHandle),
    /// Live view of one mapping or set inside a working container's config.
    View(ContainerRef, ViewField),
}

pub(crate) struct Function {
    pub def: Rc<FunctionDef>,
    pub defaults: Vec<Option<Value>>,
    /// Enclosing call frame; `None` for functions defined at program level.
    pub scope: Option<Rc<Frame>>,
}

pub(crate) struct Class {
    pub name: String,
    pub attrs: RefCell<BTreeMap<String, Value>>,
}

/// A method looked up on a value, waiting to be called.
pub(crate) struct Method {
    pub receiver: Value,
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Builtin {
    Print,
    Len,
    Str,
    Int,
    Float,
    Bool,
    List,
    Range,
    Sorted,
    IsInstance,
    Container,
    Image,
}

impl Builtin {
    pub fn from_name(name: &str) -> Option<Self> {
        let builtin = match name {
            "print" => Builtin::Print,
            "len" => Builtin::Len,
            "str" => Builtin::Str,
            "int" => Builtin::Int,
            "float" => Builtin::Float,
            "bool" => Builtin::Bool,
            "list" => Builtin::List,
            "range" => Builtin::Range,
            "sorted" => Builtin::Sorted,
            "isinstance" => Builtin::IsInstance,
            "Container" => Builtin::Container,
            "Image" => Builtin::Image,
            _ => return None,
        };
        Some(builtin)
    }

    pub fn name(self) -> &'static str {
        match self {
            Builtin::Print => "print",
            Builtin::Len => "len",
            Builtin::Str => "str",
            Builtin::Int => "int",
            Builtin::Float => "float",
            Builtin::Bool => "bool",
            Builtin::List => "list",
            Builtin::Range => "range",
            Builtin::Sorted => "sorted",
            Builtin::IsInstance => "isinstance",
            Builtin::Container => "Container",
            Builtin::Image => "Image",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ViewField {
    Environ,
    Labels,
    Volumes,
}

impl ViewField {
    pub fn name(self) -> &'static str {
        match self {
            ViewField::Environ => "environ",
            ViewField::Labels => "labels",
            ViewField::Volumes => "volumes",
        }
    }
}

impl Value {
    pub fn str(s: impl Into<String>) -> Value {
        Value::Str(s.into())
    }

    pub fn list(items: Vec<Value>) -> Value {
        Value::List(Rc::new(RefCell::new(items)))
    }

    pub fn dict(map: BTreeMap<String, Value>) -> Value {
        Value::Dict(Rc::new(RefCell::new(map)))
    }

    pub fn from_literal(lit: &Literal) -> Value {
        match lit {
            Literal::None => Value::None,
            Literal::Bool(b) => Value::Bool(*b),
            Literal::Int(i) => Value::Int(*i),
            Literal::Float(f) => Value::Float(*f),
            Literal::Str(s) => Value::Str(s.clone()),
            Literal::List(items) => Value::list(items.iter().map(Value::from_literal).collect()),
            Literal::Dict(map) => Value::dict(
                map.iter()
                    .map(|(k, v)| (k.clone(), Value::from_literal(v)))
                    .collect(),
            ),
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::None => "NoneType",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "str",
            Value::List(_) => "list",
            Value::Dict(_) => "dict",
            Value::Function(_) => "function",
            Value::Class(_) => "class",
            Value::Builtin(_) => "builtin_function",
            Value::Method(_) => "method",
            Value::Container(_) => "Container",
            Value::Image(_) => "Image",
            Value::View(_, field) => field.name(),
        }
    }

    pub fn truthy(&self) -> bool {
        match self {
            Value::None => false,
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Float(f) => *f != 0.0,
            Value::Str(s) => !s.is_empty(),
            Value::List(items) => !items.borrow().is_empty(),
            Value::Dict(map) => !map.borrow().is_empty(),
            Value::View(handle, field) => view_len(handle, *field) > 0,
            _ => true,
        }
    }

    /// `str(value)`.
    pub fn to_display(&self) -> String {
        match self {
            Value::Str(s) => s.clone(),
            other => other.repr(),
        }
    }

    /// How the value is shown inside containers and error messages. A list
    /// or dict already being printed further up shows as `[...]` / `{...}`.
    pub fn repr(&self) -> String {
        self.repr_in(&mut Vec::new())
    }

    fn repr_in(&self, open: &mut Vec<*const ()>) -> String {
        match self {
            Value::None => "None".to_string(),
            Value::Bool(true) => "True".to_string(),
            Value::Bool(false) => "False".to_string(),
            Value::Int(i) => i.to_string(),
            Value::Float(f) => format_float(*f),
            Value::Str(s) => quote(s),
            Value::List(items) => {
                let ptr = Rc::as_ptr(items) as *const ();
                if open.contains(&ptr) || open.len() >= MAX_NESTING {
                    return "[...]".to_string();
                }
                open.push(ptr);
                let parts: Vec<String> = items.borrow().iter().map(|v| v.repr_in(open)).collect();
                open.pop();
                format!("[{}]", parts.join(", "))
            }
            Value::Dict(map) => {
                let ptr = Rc::as_ptr(map) as *const ();
                if open.contains(&ptr) || open.len() >= MAX_NESTING {
                    return "{...}".to_string();
                }
                open.push(ptr);
                let parts: Vec<String> = map
                    .borrow()
                    .iter()
                    .map(|(k, v)| format!("{}: {}", quote(k), v.repr_in(open)))
                    .collect();
                open.pop();
                format!("{{{}}}", parts.join(", "))
            }
            Value::Function(function) => format!("<function {}>", function.def.name),
            Value::Class(class) => format!("<class {}>", class.name),
            Value::Builtin(builtin) => format!("<builtin {}>", builtin.name()),
            Value::Method(method) => {
                format!("<method {}.{}>", method.receiver.type_name(), method.name)
            }
            Value::Container(handle) => format!("<Container {}>", handle.borrow().id()),
            Value::Image(image) => image.id().to_string(),
            Value::View(handle, field) => {
                let ctr = handle.borrow();
                let config = ctr.config();
                match field {
                    ViewField::Environ => mapping_repr(&config.environ),
                    ViewField::Labels => mapping_repr(&config.labels),
                    ViewField::Volumes => {
                        let parts: Vec<String> = config.volumes.iter().map(|v| quote(v)).collect();
                        format!("{{{}}}", parts.join(", "))
                    }
                }
            }
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.repr())
    }
}

pub(crate) fn view_len(handle: &ContainerRef, field: ViewField) -> usize {
    let ctr = handle.borrow();
    let config = ctr.config();
    match field {
        ViewField::Environ => config.environ.len(),
        ViewField::Labels => config.labels.len(),
        ViewField::Volumes => config.volumes.len(),
    }
}

fn mapping_repr(map: &BTreeMap<String, String>) -> String {
    let parts: Vec<String> = map
        .iter()
        .map(|(k, v)| format!("{}: {}", quote(k), quote(v)))
        .collect();
    format!("{{{}}}", parts.join(", "))
}

fn quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('\'');
    for c in s.chars() {
        match c {
            '\'' => out.push_str("\\'"),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            c => out.push(c),
        }
    }
    out.push('\'');
    out
}

/// A variable scope: program globals, one function call, or a class body.
pub(crate) struct Frame {
    vars: RefCell<BTreeMap<String, Value>>,
    parent: Option<Rc<Frame>>,
    class_body: bool,
}

impl Frame {
    pub fn root() -> Rc<Frame> {
        Rc::new(Frame {
            vars: RefCell::new(BTreeMap::new()),
            parent: None,
            class_body: false,
        })
    }

    pub fn call(parent: Option<Rc<Frame>>) -> Rc<Frame> {
        Rc::new(Frame {
            vars: RefCell::new(BTreeMap::new()),
            parent,
            class_body: false,
        })
    }

    pub fn class_body(parent: Rc<Frame>) -> Rc<Frame> {
        Rc::new(Frame {
            vars: RefCell::new(BTreeMap::new()),
            parent: Some(parent),
            class_body: true,
        })
    }

    pub fn is_class_body(&self) -> bool {
        self.class_body
    }

    pub fn parent(&self) -> Option<Rc<Frame>> {
        self.parent.clone()
    }

    /// Look `name` up here, then in enclosing frames.
    pub fn lookup(&self, name: &str) -> Option<Value> {
        if let Some(value) = self.vars.borrow().get(name) {
            return Some(value.clone());
        }
        self.parent.as_ref().and_then(|parent| parent.lookup(name))
    }

    pub fn set(&self, name: impl Into<String>, value: Value) {
        self.vars.borrow_mut().insert(name.into(), value);
    }

    pub fn remove(&self, name: &str) -> Option<Value> {
        self.vars.borrow_mut().remove(name)
    }

    pub fn take_vars(&self) -> BTreeMap<String, Value> {
        std::mem::take(&mut *self.vars.borrow_mut())
    }
}
