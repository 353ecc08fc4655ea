//! Tree-walking executor for build scripts.
//!
//! A run starts from a transformed [`Program`], a set of bound parameters and
//! a [`Capabilities`] surface. Statement results are threaded through as an
//! explicit [`Flow`]; errors travel as [`Fault`]s and become [`ExecError`]s at
//! the entry point.

mod builtins;
mod capability;
mod fault;
mod ops;
mod value;

use capsules_buildah::ImageHandle;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;
use tracing::info;

pub use capability::Capabilities;

use crate::args::BoundParameters;
use crate::error::{ErrorKind, ExecError};
use crate::script::ast::{BinOp, Expr, Program, Stmt, StmtKind, Target};
use builtins::CallArgs;
use fault::{Fault, Flow};
use value::{Builtin, Class, Frame, Function, Method, Value};

const MAX_CALL_DEPTH: usize = 64;
/// Blocks open at once, across all active calls.
const MAX_BLOCK_DEPTH: usize = 512;

/// What a script run left behind.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Produced(ImageHandle),
    Empty,
}

impl Outcome {
    pub fn image(&self) -> Option<&ImageHandle> {
        match self {
            Outcome::Produced(image) => Some(image),
            Outcome::Empty => None,
        }
    }
}

/// Run `program` with each bound parameter as a global. Every working
/// container the script opens is removed before this returns, whatever the
/// exit path.
pub fn execute(
    program: &Program,
    params: &BoundParameters,
    caps: &Capabilities,
) -> Result<Outcome, ExecError> {
    let globals = Frame::root();
    for (name, literal) in params {
        globals.set(name.as_str(), Value::from_literal(literal));
    }
    let _cleanup = Cleanup {
        caps,
        globals: globals.clone(),
    };

    info!(
        statements = program.body.len(),
        parameters = params.len(),
        "script.start"
    );
    let mut interp = Interpreter {
        caps,
        globals: globals.clone(),
        depth: 0,
        blocks: 0,
    };
    let flow = interp
        .exec_block(&program.body, &globals)
        .map_err(Fault::into_exec_error)?;

    let outcome = match flow {
        Flow::Produce(value, line) => produced(value, line)?,
        // Only reachable when the program was not transformed first.
        Flow::Return(value) => produced(value, 0)?,
        Flow::Normal | Flow::Break | Flow::Continue => Outcome::Empty,
    };
    info!(
        image = outcome.image().map(ImageHandle::id).unwrap_or("-"),
        "script.finish"
    );
    Ok(outcome)
}

fn produced(value: Value, line: usize) -> Result<Outcome, ExecError> {
    match value {
        Value::Image(image) => Ok(Outcome::Produced(image)),
        Value::None => Ok(Outcome::Empty),
        Value::Container(_) => Err(ExecError::UncommittedContainer { line }),
        other => Err(ExecError::ArtifactType {
            line,
            found: other.type_name().to_string(),
        }),
    }
}

struct Cleanup<'a> {
    caps: &'a Capabilities,
    globals: Rc<Frame>,
}

impl Drop for Cleanup<'_> {
    fn drop(&mut self) {
        drop(self.globals.take_vars());
        self.caps.release_all();
    }
}

struct Interpreter<'a> {
    caps: &'a Capabilities,
    globals: Rc<Frame>,
    depth: usize,
    blocks: usize,
}

impl Interpreter<'_> {
    fn exec_block(&mut self, body: &[Stmt], frame: &Rc<Frame>) -> Result<Flow, Fault> {
        if self.blocks >= MAX_BLOCK_DEPTH {
            return Err(Fault::new(
                ErrorKind::RecursionError,
                "maximum block nesting exceeded",
            ));
        }
        self.blocks += 1;
        let result = self.exec_stmts(body, frame);
        self.blocks -= 1;
        result
    }

    fn exec_stmts(&mut self, body: &[Stmt], frame: &Rc<Frame>) -> Result<Flow, Fault> {
        for stmt in body {
            match self.exec_stmt(stmt, frame).map_err(|f| f.at(stmt.line))? {
                Flow::Normal => {}
                other => return Ok(other),
            }
        }
        Ok(Flow::Normal)
    }

    fn exec_stmt(&mut self, stmt: &Stmt, frame: &Rc<Frame>) -> Result<Flow, Fault> {
        match &stmt.kind {
            StmtKind::Expr(expr) => {
                self.eval(expr, frame)?;
            }
            StmtKind::Assign { target, value } => {
                let value = self.eval(value, frame)?;
                self.assign(target, value, frame)?;
            }
            StmtKind::AugAssign { target, op, value } => self.aug_assign(target, *op, value, frame)?,
            StmtKind::Del(target) => self.delete(target, frame)?,
            StmtKind::If { branches, orelse } => {
                for (cond, body) in branches {
                    if self.eval(cond, frame)?.truthy() {
                        return self.exec_block(body, frame);
                    }
                }
                return self.exec_block(orelse, frame);
            }
            StmtKind::While { cond, body } => {
                while self.eval(cond, frame)?.truthy() {
                    match self.exec_block(body, frame)? {
                        Flow::Break => break,
                        Flow::Normal | Flow::Continue => {}
                        other => return Ok(other),
                    }
                }
            }
            StmtKind::For { vars, iter, body } => {
                let items = ops::iterate(&self.eval(iter, frame)?)?;
                for item in items {
                    bind_loop_vars(vars, item, frame)?;
                    match self.exec_block(body, frame)? {
                        Flow::Break => break,
                        Flow::Normal | Flow::Continue => {}
                        other => return Ok(other),
                    }
                }
            }
            StmtKind::Try {
                body,
                handler,
                finally,
            } => {
                let mut result = self.exec_block(body, frame);
                if let Some(handler) = handler {
                    if let Err(fault) = result {
                        if let Some(name) = &handler.name {
                            frame.set(name.as_str(), Value::Str(fault.describe()));
                        }
                        result = self.exec_block(&handler.body, frame);
                    }
                }
                match self.exec_block(finally, frame)? {
                    Flow::Normal => return result,
                    other => return Ok(other),
                }
            }
            StmtKind::With {
                context,
                name,
                body,
            } => {
                let handle = match self.eval(context, frame)? {
                    Value::Container(handle) => handle,
                    other => {
                        return Err(Fault::type_error(format!(
                            "with expects a Container, not {}",
                            other.type_name()
                        )))
                    }
                };
                if let Some(name) = name {
                    frame.set(name.as_str(), Value::Container(handle.clone()));
                }
                let result = self.exec_block(body, frame);
                let released = handle.borrow_mut().release();
                let flow = result?;
                released?;
                return Ok(flow);
            }
            StmtKind::Def(def) => {
                let mut defaults = Vec::with_capacity(def.params.len());
                for param in &def.params {
                    defaults.push(match &param.default {
                        Some(expr) => Some(self.eval(expr, frame)?),
                        None => None,
                    });
                }
                let function = Function {
                    def: def.clone(),
                    defaults,
                    scope: self.closure_scope(frame),
                };
                frame.set(def.name.as_str(), Value::Function(Rc::new(function)));
            }
            StmtKind::Class { name, body } => {
                let class_frame = Frame::class_body(frame.clone());
                self.exec_block(body, &class_frame)?;
                let class = Class {
                    name: name.clone(),
                    attrs: RefCell::new(class_frame.take_vars()),
                };
                frame.set(name.as_str(), Value::Class(Rc::new(class)));
            }
            StmtKind::Return(expr) => {
                let value = self.eval_optional(expr.as_ref(), frame)?;
                return Ok(Flow::Return(value));
            }
            StmtKind::Produce(expr) => {
                let value = self.eval_optional(expr.as_ref(), frame)?;
                return Ok(Flow::Produce(value, stmt.line));
            }
            StmtKind::Raise(expr) => {
                let message = self.eval(expr, frame)?.to_display();
                return Err(Fault::new(ErrorKind::Error, message));
            }
            StmtKind::Pass => {}
            StmtKind::Break => return Ok(Flow::Break),
            StmtKind::Continue => return Ok(Flow::Continue),
        }
        Ok(Flow::Normal)
    }

    fn eval_optional(&mut self, expr: Option<&Expr>, frame: &Rc<Frame>) -> Result<Value, Fault> {
        match expr {
            Some(expr) => self.eval(expr, frame),
            None => Ok(Value::None),
        }
    }

    /// Functions close over the nearest call frame; program-level ones
    /// resolve free names through the globals at call time.
    fn closure_scope(&self, frame: &Rc<Frame>) -> Option<Rc<Frame>> {
        let mut scope = frame.clone();
        while scope.is_class_body() {
            scope = scope.parent()?;
        }
        if Rc::ptr_eq(&scope, &self.globals) {
            None
        } else {
            Some(scope)
        }
    }

    fn assign(&mut self, target: &Target, value: Value, frame: &Rc<Frame>) -> Result<(), Fault> {
        match target {
            Target::Name(name) => {
                frame.set(name.as_str(), value);
                Ok(())
            }
            Target::Attr(object, attr) => {
                let object = self.eval(object, frame)?;
                set_attr(&object, attr, value)
            }
            Target::Index(object, index) => {
                let object = self.eval(object, frame)?;
                let index = self.eval(index, frame)?;
                ops::set_item(&object, &index, value)
            }
        }
    }

    fn aug_assign(
        &mut self,
        target: &Target,
        op: BinOp,
        value: &Expr,
        frame: &Rc<Frame>,
    ) -> Result<(), Fault> {
        match target {
            Target::Name(name) => {
                let current = lookup(name, frame)?;
                let rhs = self.eval(value, frame)?;
                let updated = combine(op, current, &rhs)?;
                frame.set(name.as_str(), updated);
            }
            Target::Attr(object, attr) => {
                let object = self.eval(object, frame)?;
                let current = get_attr(&object, attr)?;
                let rhs = self.eval(value, frame)?;
                set_attr(&object, attr, combine(op, current, &rhs)?)?;
            }
            Target::Index(object, index) => {
                let object = self.eval(object, frame)?;
                let index = self.eval(index, frame)?;
                let current = ops::get_item(&object, &index)?;
                let rhs = self.eval(value, frame)?;
                ops::set_item(&object, &index, combine(op, current, &rhs)?)?;
            }
        }
        Ok(())
    }

    fn delete(&mut self, target: &Target, frame: &Rc<Frame>) -> Result<(), Fault> {
        match target {
            Target::Name(name) => frame.remove(name).map(|_| ()).ok_or_else(|| name_error(name)),
            Target::Attr(object, attr) => match self.eval(object, frame)? {
                Value::Class(class) => class
                    .attrs
                    .borrow_mut()
                    .remove(attr.as_str())
                    .map(|_| ())
                    .ok_or_else(|| Fault::attribute_error(&class.name, attr)),
                other => Err(Fault::attribute_error(other.type_name(), attr)),
            },
            Target::Index(object, index) => {
                let object = self.eval(object, frame)?;
                let index = self.eval(index, frame)?;
                ops::del_item(&object, &index)
            }
        }
    }

    fn eval(&mut self, expr: &Expr, frame: &Rc<Frame>) -> Result<Value, Fault> {
        match expr {
            Expr::Const(literal) => Ok(Value::from_literal(literal)),
            Expr::Name(name) => lookup(name, frame),
            Expr::List(items) => {
                let mut values = Vec::with_capacity(items.len());
                for item in items {
                    values.push(self.eval(item, frame)?);
                }
                Ok(Value::list(values))
            }
            Expr::Dict(entries) => {
                let mut map = BTreeMap::new();
                for (key, value) in entries {
                    let key = builtins::expect_str(self.eval(key, frame)?, "dict key")?;
                    let value = self.eval(value, frame)?;
                    map.insert(key, value);
                }
                Ok(Value::dict(map))
            }
            Expr::Attr(object, attr) => {
                let object = self.eval(object, frame)?;
                get_attr(&object, attr)
            }
            Expr::Index(object, index) => {
                let object = self.eval(object, frame)?;
                let index = self.eval(index, frame)?;
                ops::get_item(&object, &index)
            }
            Expr::Call { func, args, kwargs } => {
                let callee = self.eval(func, frame)?;
                let mut positional = Vec::with_capacity(args.len());
                for arg in args {
                    positional.push(self.eval(arg, frame)?);
                }
                let mut keywords = Vec::with_capacity(kwargs.len());
                for (name, arg) in kwargs {
                    keywords.push((name.clone(), self.eval(arg, frame)?));
                }
                self.call(
                    callee,
                    CallArgs {
                        positional,
                        keywords,
                    },
                )
            }
            Expr::Neg(operand) => ops::negate(&self.eval(operand, frame)?),
            Expr::Not(operand) => Ok(Value::Bool(!self.eval(operand, frame)?.truthy())),
            Expr::Binary(op, lhs, rhs) => {
                let lhs = self.eval(lhs, frame)?;
                let rhs = self.eval(rhs, frame)?;
                ops::binary(*op, &lhs, &rhs)
            }
            Expr::Compare(op, lhs, rhs) => {
                let lhs = self.eval(lhs, frame)?;
                let rhs = self.eval(rhs, frame)?;
                Ok(Value::Bool(ops::compare(*op, &lhs, &rhs)?))
            }
            Expr::And(lhs, rhs) => {
                let lhs = self.eval(lhs, frame)?;
                if lhs.truthy() {
                    self.eval(rhs, frame)
                } else {
                    Ok(lhs)
                }
            }
            Expr::Or(lhs, rhs) => {
                let lhs = self.eval(lhs, frame)?;
                if lhs.truthy() {
                    Ok(lhs)
                } else {
                    self.eval(rhs, frame)
                }
            }
        }
    }

    fn call(&mut self, callee: Value, args: CallArgs) -> Result<Value, Fault> {
        match callee {
            Value::Function(function) => self.call_function(&function, args),
            Value::Builtin(builtin) => builtins::call(self.caps, builtin, args),
            Value::Method(method) => call_method(&method, args),
            Value::Class(class) => Err(Fault::type_error(format!(
                "class {} is a namespace and cannot be called",
                class.name
            ))),
            other => Err(Fault::type_error(format!(
                "'{}' object is not callable",
                other.type_name()
            ))),
        }
    }

    fn call_function(&mut self, function: &Function, args: CallArgs) -> Result<Value, Fault> {
        let def = &function.def;
        let names: Vec<&str> = def.params.iter().map(|p| p.name.as_str()).collect();
        let mut slots = args.bind(&def.name, &names, 0)?;

        let call_frame = Frame::call(Some(
            function
                .scope
                .clone()
                .unwrap_or_else(|| self.globals.clone()),
        ));
        for (idx, name) in names.iter().enumerate() {
            let value = match slots.take(idx).or_else(|| function.defaults[idx].clone()) {
                Some(value) => value,
                None => {
                    return Err(Fault::type_error(format!(
                        "{}() missing required argument '{}'",
                        def.name, name
                    )))
                }
            };
            call_frame.set(*name, value);
        }

        if self.depth >= MAX_CALL_DEPTH {
            return Err(Fault::new(
                ErrorKind::RecursionError,
                "maximum call depth exceeded",
            ));
        }
        self.depth += 1;
        let result = self.exec_block(&def.body, &call_frame);
        self.depth -= 1;
        match result? {
            Flow::Return(value) => Ok(value),
            _ => Ok(Value::None),
        }
    }
}

fn lookup(name: &str, frame: &Frame) -> Result<Value, Fault> {
    if let Some(value) = frame.lookup(name) {
        return Ok(value);
    }
    Builtin::from_name(name)
        .map(Value::Builtin)
        .ok_or_else(|| name_error(name))
}

fn name_error(name: &str) -> Fault {
    Fault::new(
        ErrorKind::NameError,
        format!("name '{}' is not defined", name),
    )
}

fn bind_loop_vars(vars: &[String], item: Value, frame: &Frame) -> Result<(), Fault> {
    if let [single] = vars {
        frame.set(single.as_str(), item);
        return Ok(());
    }
    let parts = ops::iterate(&item)?;
    if parts.len() != vars.len() {
        return Err(Fault::value_error(format!(
            "expected {} values to unpack, got {}",
            vars.len(),
            parts.len()
        )));
    }
    for (name, part) in vars.iter().zip(parts) {
        frame.set(name.as_str(), part);
    }
    Ok(())
}

/// `lhs op= rhs`. Lists are extended in place so aliases see the change.
fn combine(op: BinOp, lhs: Value, rhs: &Value) -> Result<Value, Fault> {
    if let (BinOp::Add, Value::List(items)) = (op, &lhs) {
        let extra = ops::iterate(rhs)?;
        let mut list = items.borrow_mut();
        ops::grown_list(list.len(), extra.len())?;
        list.extend(extra);
        drop(list);
        return Ok(lhs);
    }
    ops::binary(op, &lhs, rhs)
}

fn get_attr(object: &Value, attr: &str) -> Result<Value, Fault> {
    let is_method = match object {
        Value::Class(class) => {
            return class
                .attrs
                .borrow()
                .get(attr)
                .cloned()
                .ok_or_else(|| Fault::attribute_error(&class.name, attr))
        }
        Value::Str(_) | Value::List(_) | Value::Dict(_) => builtins::has_method(object, attr),
        Value::Container(_) | Value::Image(_) | Value::View(..) => {
            capability::has_method(object, attr)
        }
        other => return Err(Fault::attribute_error(other.type_name(), attr)),
    };
    if is_method {
        return Ok(Value::Method(Rc::new(Method {
            receiver: object.clone(),
            name: attr.to_string(),
        })));
    }
    match object {
        Value::Container(handle) => capability::container_attr(handle, attr),
        Value::Image(image) => capability::image_attr(image, attr),
        other => Err(Fault::attribute_error(other.type_name(), attr)),
    }
}

fn set_attr(object: &Value, attr: &str, value: Value) -> Result<(), Fault> {
    match object {
        Value::Class(class) => {
            class.attrs.borrow_mut().insert(attr.to_string(), value);
            Ok(())
        }
        Value::Container(handle) => capability::set_container_attr(handle, attr, value),
        other => Err(Fault::attribute_error(other.type_name(), attr)),
    }
}

fn call_method(method: &Method, args: CallArgs) -> Result<Value, Fault> {
    let name = method.name.as_str();
    match &method.receiver {
        Value::Str(s) => builtins::call_str_method(s, name, args),
        list @ Value::List(_) => builtins::call_list_method(list, name, args),
        dict @ Value::Dict(_) => builtins::call_dict_method(dict, name, args),
        Value::Container(handle) => capability::call_container_method(handle, name, args),
        Value::Image(image) => capability::call_image_method(image, name, args),
        Value::View(handle, field) => capability::call_view_method(handle, *field, name, args),
        other => Err(Fault::attribute_error(other.type_name(), name)),
    }
}
