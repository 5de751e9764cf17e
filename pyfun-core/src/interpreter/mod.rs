//! Tree-walking interpreter for pyfun modules.
//!
//! A source text is loaded into a [`Program`]: the module body runs once and
//! must leave exactly one global name bound to a function. The host then
//! calls that function with values converted from JSON.

mod builtins;
mod format;
mod methods;
mod operators;
#[cfg(test)]
mod tests;

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;

use crate::ast::*;
use crate::error::{PyfunError, PyfunResult};
use crate::parser::parse;
use crate::value::{Dict, ExceptionValue, Function, Globals, NativeFunction, Scope, Value};

pub(crate) use operators::iterate;

/// Default maximum depth of nested user function calls
pub const DEFAULT_RECURSION_LIMIT: usize = 200;

/// Interpreter holding host-provided natives and execution limits.
pub struct Interpreter {
    natives: HashMap<String, Value>,
    recursion_limit: usize,
    depth: Cell<usize>,
}

/// A loaded module together with the single function it defines.
pub struct Program {
    // Functions only hold a weak reference to their module; this keeps it alive.
    _globals: Globals,
    function: Rc<Function>,
}

impl Program {
    pub fn name(&self) -> &str {
        &self.function.def.name
    }

    /// Number of declared parameters, used to pick a calling convention.
    pub fn arity(&self) -> usize {
        self.function.def.params.len()
    }

    pub fn is_generator(&self) -> bool {
        self.function.def.is_generator
    }
}

/// Control flow outcome of executing a statement
enum Flow {
    Normal,
    Return(Value),
    Break,
    Continue,
}

struct Frame {
    locals: Scope,
    closure: Vec<Scope>,
    globals: Globals,
    /// Module-level code stores names in `globals`
    module_level: bool,
    /// Values produced by `yield`, present for generator calls
    yielded: Option<Vec<Value>>,
    /// Exceptions currently being handled, for bare `raise`
    handling: Vec<PyfunError>,
}

impl Frame {
    fn module(globals: Globals) -> Self {
        Self {
            locals: Scope::default(),
            closure: Vec::new(),
            globals,
            module_level: true,
            yielded: None,
            handling: Vec::new(),
        }
    }

    fn store(&mut self, name: &str, value: Value) {
        if self.module_level {
            self.globals.borrow_mut().insert(name.to_string(), value);
        } else {
            self.locals.borrow_mut().insert(name.to_string(), value);
        }
    }

    fn local(&self, name: &str) -> Option<Value> {
        if self.module_level {
            self.globals.borrow().get(name).cloned()
        } else {
            self.locals.borrow().get(name).cloned()
        }
    }

    fn remove(&mut self, name: &str) -> Option<Value> {
        if self.module_level {
            self.globals.borrow_mut().remove(name)
        } else {
            self.locals.borrow_mut().remove(name)
        }
    }

    fn restore(&mut self, name: &str, saved: Option<Value>) {
        match saved {
            Some(value) => self.store(name, value),
            None => {
                self.remove(name);
            }
        }
    }
}

struct DepthGuard<'a>(&'a Cell<usize>);

impl Drop for DepthGuard<'_> {
    fn drop(&mut self) {
        self.0.set(self.0.get() - 1);
    }
}

impl Default for Interpreter {
    fn default() -> Self {
        Self::new()
    }
}

impl Interpreter {
    pub fn new() -> Self {
        Self {
            natives: HashMap::new(),
            recursion_limit: DEFAULT_RECURSION_LIMIT,
            depth: Cell::new(0),
        }
    }

    pub fn with_recursion_limit(mut self, limit: usize) -> Self {
        self.recursion_limit = limit.max(1);
        self
    }

    /// Expose a host callback to user code under `name`.
    pub fn register_native<F>(&mut self, name: &str, func: F)
    where
        F: Fn(&[Value]) -> PyfunResult<Value> + 'static,
    {
        let native = NativeFunction {
            name: name.to_string(),
            func: Box::new(func),
        };
        self.natives
            .insert(name.to_string(), Value::Native(Rc::new(native)));
    }

    /// Parse and execute a module, returning the function it defines.
    pub fn load(&self, source: &str) -> PyfunResult<Program> {
        let module = parse(source)?;
        let globals: Globals = Rc::new(RefCell::new(HashMap::new()));
        let mut frame = Frame::module(globals.clone());
        self.exec_block(&module.body, &mut frame)?;

        let function = {
            let names = globals.borrow();
            match names.values().next() {
                Some(Value::Function(function)) if names.len() == 1 => function.clone(),
                _ => return Err(PyfunError::NotAFunction),
            }
        };

        Ok(Program {
            _globals: globals,
            function,
        })
    }

    /// Call the program's function with positional arguments.
    pub fn call(&self, program: &Program, args: Vec<Value>) -> PyfunResult<Value> {
        self.call_function(&program.function, args, Vec::new())
    }

    /// Call any callable value.
    pub fn call_value(
        &self,
        callee: &Value,
        args: Vec<Value>,
        kwargs: Vec<(String, Value)>,
    ) -> PyfunResult<Value> {
        match callee {
            Value::Function(function) => self.call_function(function, args, kwargs),
            Value::Builtin(name) => builtins::call(self, name, args, kwargs),
            Value::Native(native) => {
                if !kwargs.is_empty() {
                    return Err(PyfunError::type_error(format!(
                        "{}() takes no keyword arguments",
                        native.name
                    )));
                }
                (native.func)(&args)
            }
            Value::Method(method) => self.call_method(&method.receiver, &method.name, args, kwargs),
            Value::ExceptionClass(kind) => {
                if !kwargs.is_empty() {
                    return Err(PyfunError::type_error(format!(
                        "{}() takes no keyword arguments",
                        kind
                    )));
                }
                let message = match args.len() {
                    0 => String::new(),
                    1 => args[0].to_str(),
                    _ => Value::tuple(args).repr(),
                };
                Ok(Value::Exception(Rc::new(ExceptionValue {
                    kind: kind.to_string(),
                    message,
                })))
            }
            other => Err(PyfunError::type_error(format!(
                "'{}' object is not callable",
                other.type_name()
            ))),
        }
    }

    fn call_function(
        &self,
        function: &Rc<Function>,
        args: Vec<Value>,
        kwargs: Vec<(String, Value)>,
    ) -> PyfunResult<Value> {
        if self.depth.get() >= self.recursion_limit {
            return Err(PyfunError::exception(
                "RecursionError",
                "maximum recursion depth exceeded",
            ));
        }
        self.depth.set(self.depth.get() + 1);
        let _guard = DepthGuard(&self.depth);

        let globals = function.globals.upgrade().ok_or_else(|| {
            PyfunError::exception("RuntimeError", "function module is no longer loaded")
        })?;
        let def = function.def.clone();
        let mut frame = Frame {
            locals: Rc::new(RefCell::new(bind_arguments(function, args, kwargs)?)),
            closure: function.closure.clone(),
            globals,
            module_level: false,
            yielded: def.is_generator.then(Vec::new),
            handling: Vec::new(),
        };

        let flow = self.exec_block(&def.body, &mut frame);
        release_scope(&frame.locals);
        let flow = flow?;
        if let Some(items) = frame.yielded.take() {
            return Ok(Value::list(items));
        }
        Ok(match flow {
            Flow::Return(value) => value,
            _ => Value::None,
        })
    }

    // ==================== Statements ====================

    fn exec_block(&self, body: &[Stmt], frame: &mut Frame) -> PyfunResult<Flow> {
        for stmt in body {
            match self
                .exec_stmt(stmt, frame)
                .map_err(|err| err.at_line(stmt.line))?
            {
                Flow::Normal => {}
                flow => return Ok(flow),
            }
        }
        Ok(Flow::Normal)
    }

    fn exec_stmt(&self, stmt: &Stmt, frame: &mut Frame) -> PyfunResult<Flow> {
        match &stmt.kind {
            StmtKind::Expr(expr) => {
                self.eval(expr, frame)?;
            }
            StmtKind::Assign { targets, value } => {
                let value = self.eval(value, frame)?;
                for target in targets {
                    self.assign(target, value.clone(), frame)?;
                }
            }
            StmtKind::AugAssign { target, op, value } => match target {
                Expr::Subscript {
                    value: container,
                    index,
                } => {
                    let container = self.eval(container, frame)?;
                    let key = self.eval(index, frame)?;
                    let current = operators::get_item(&container, &key)?;
                    let rhs = self.eval(value, frame)?;
                    let updated = self.augmented(*op, current, rhs)?;
                    operators::set_item(&container, key, updated)?;
                }
                _ => {
                    let current = self.eval(target, frame)?;
                    let rhs = self.eval(value, frame)?;
                    let updated = self.augmented(*op, current, rhs)?;
                    self.assign(target, updated, frame)?;
                }
            },
            StmtKind::If { branches, orelse } => {
                for (condition, body) in branches {
                    if self.eval(condition, frame)?.truthy() {
                        return self.exec_block(body, frame);
                    }
                }
                return self.exec_block(orelse, frame);
            }
            StmtKind::For { target, iter, body } => {
                let iterable = self.eval(iter, frame)?;
                for item in iterate(&iterable)? {
                    self.assign(target, item, frame)?;
                    match self.exec_block(body, frame)? {
                        Flow::Break => break,
                        Flow::Normal | Flow::Continue => {}
                        flow @ Flow::Return(_) => return Ok(flow),
                    }
                }
            }
            StmtKind::While { condition, body } => {
                while self.eval(condition, frame)?.truthy() {
                    match self.exec_block(body, frame)? {
                        Flow::Break => break,
                        Flow::Normal | Flow::Continue => {}
                        flow @ Flow::Return(_) => return Ok(flow),
                    }
                }
            }
            StmtKind::Try {
                body,
                handlers,
                finally,
            } => {
                let outcome = match self.exec_block(body, frame) {
                    Err(err) if err.is_exception() => self.handle_exception(err, handlers, frame),
                    other => other,
                };
                if !finally.is_empty() {
                    match self.exec_block(finally, frame)? {
                        Flow::Normal => {}
                        flow => return Ok(flow),
                    }
                }
                return outcome;
            }
            StmtKind::FunctionDef(def) => {
                let function = self.make_function(def, frame)?;
                frame.store(&def.name, function);
            }
            StmtKind::Return(value) => {
                let value = match value {
                    Some(expr) => self.eval(expr, frame)?,
                    None => Value::None,
                };
                return Ok(Flow::Return(value));
            }
            StmtKind::Yield(value) => {
                let value = match value {
                    Some(expr) => self.eval(expr, frame)?,
                    None => Value::None,
                };
                match frame.yielded.as_mut() {
                    Some(items) => items.push(value),
                    None => {
                        return Err(PyfunError::exception(
                            "SyntaxError",
                            "'yield' outside function",
                        ))
                    }
                }
            }
            StmtKind::Raise(Some(expr)) => {
                return Err(match self.eval(expr, frame)? {
                    Value::Exception(exception) => {
                        PyfunError::exception(&exception.kind, &exception.message)
                    }
                    Value::ExceptionClass(kind) => PyfunError::exception(kind.to_string(), ""),
                    _ => PyfunError::type_error("exceptions must derive from BaseException"),
                });
            }
            StmtKind::Raise(None) => {
                return Err(frame.handling.last().cloned().unwrap_or_else(|| {
                    PyfunError::exception("RuntimeError", "No active exception to reraise")
                }));
            }
            StmtKind::Del(targets) => {
                for target in targets {
                    self.delete(target, frame)?;
                }
            }
            StmtKind::Break => return Ok(Flow::Break),
            StmtKind::Continue => return Ok(Flow::Continue),
            StmtKind::Pass => {}
        }
        Ok(Flow::Normal)
    }

    fn handle_exception(
        &self,
        err: PyfunError,
        handlers: &[ExceptHandler],
        frame: &mut Frame,
    ) -> PyfunResult<Flow> {
        let handler = handlers.iter().find(|handler| {
            handler.classes.is_empty() || handler.classes.iter().any(|class| err.matches(class))
        });
        let Some(handler) = handler else {
            return Err(err);
        };

        if let Some(binding) = &handler.binding {
            let exception = ExceptionValue {
                kind: err.kind().to_string(),
                message: err.message().to_string(),
            };
            frame.store(binding, Value::Exception(Rc::new(exception)));
        }
        frame.handling.push(err);
        let result = self.exec_block(&handler.body, frame);
        frame.handling.pop();
        result
    }

    fn augmented(&self, op: BinaryOperator, current: Value, rhs: Value) -> PyfunResult<Value> {
        // `+=` extends lists in place
        if let (BinaryOperator::Add, Value::List(items)) = (op, &current) {
            let extra = iterate(&rhs)?;
            items.borrow_mut().extend(extra);
            return Ok(current);
        }
        operators::binary(op, &current, &rhs)
    }

    fn assign(&self, target: &Expr, value: Value, frame: &mut Frame) -> PyfunResult<()> {
        match target {
            Expr::Name(name) => {
                frame.store(name, value);
                Ok(())
            }
            Expr::Subscript {
                value: container,
                index,
            } => {
                let container = self.eval(container, frame)?;
                let key = self.eval(index, frame)?;
                operators::set_item(&container, key, value)
            }
            Expr::Tuple(targets) | Expr::List(targets) => {
                let items = iterate(&value)?;
                if items.len() > targets.len() {
                    return Err(PyfunError::value_error(format!(
                        "too many values to unpack (expected {})",
                        targets.len()
                    )));
                }
                if items.len() < targets.len() {
                    return Err(PyfunError::value_error(format!(
                        "not enough values to unpack (expected {}, got {})",
                        targets.len(),
                        items.len()
                    )));
                }
                for (target, item) in targets.iter().zip(items) {
                    self.assign(target, item, frame)?;
                }
                Ok(())
            }
            _ => Err(PyfunError::exception(
                "SyntaxError",
                "cannot assign to expression",
            )),
        }
    }

    fn delete(&self, target: &Expr, frame: &mut Frame) -> PyfunResult<()> {
        match target {
            Expr::Name(name) => frame
                .remove(name)
                .map(|_| ())
                .ok_or_else(|| PyfunError::name_error(name)),
            Expr::Subscript { value, index } => {
                let container = self.eval(value, frame)?;
                let key = self.eval(index, frame)?;
                operators::del_item(&container, &key)
            }
            Expr::Tuple(targets) | Expr::List(targets) => targets
                .iter()
                .try_for_each(|target| self.delete(target, frame)),
            _ => Err(PyfunError::exception("SyntaxError", "cannot delete expression")),
        }
    }

    fn make_function(&self, def: &Rc<FunctionDef>, frame: &mut Frame) -> PyfunResult<Value> {
        let defaults = def
            .params
            .iter()
            .map(|param| {
                param
                    .default
                    .as_ref()
                    .map(|expr| self.eval(expr, frame))
                    .transpose()
            })
            .collect::<PyfunResult<Vec<_>>>()?;

        let closure = if frame.module_level {
            Vec::new()
        } else {
            std::iter::once(frame.locals.clone())
                .chain(frame.closure.iter().cloned())
                .collect()
        };

        Ok(Value::Function(Rc::new(Function {
            def: def.clone(),
            defaults,
            closure,
            globals: Rc::downgrade(&frame.globals),
        })))
    }

    // ==================== Expressions ====================

    fn eval(&self, expr: &Expr, frame: &mut Frame) -> PyfunResult<Value> {
        match expr {
            Expr::Literal(literal) => Ok(match literal {
                Literal::None => Value::None,
                Literal::Bool(b) => Value::Bool(*b),
                Literal::Int(i) => Value::Int(*i),
                Literal::Float(f) => Value::Float(*f),
                Literal::Str(s) => Value::Str(s.clone()),
            }),
            Expr::Name(name) => self.lookup(name, frame),
            Expr::List(items) => Ok(Value::list(self.eval_all(items, frame)?)),
            Expr::Tuple(items) => Ok(Value::tuple(self.eval_all(items, frame)?)),
            Expr::Dict(entries) => {
                let mut dict = Dict::new();
                for (key, value) in entries {
                    let key = self.eval(key, frame)?;
                    let value = self.eval(value, frame)?;
                    dict.insert(key, value)?;
                }
                Ok(Value::dict(dict))
            }
            Expr::ListComp {
                element,
                generators,
            } => self.scoped(generators, frame, |interp, frame| {
                let mut items = Vec::new();
                interp.comprehension(generators, frame, &mut |interp, frame| {
                    items.push(interp.eval(element, frame)?);
                    Ok(())
                })?;
                Ok(Value::list(items))
            }),
            Expr::DictComp {
                key,
                value,
                generators,
            } => self.scoped(generators, frame, |interp, frame| {
                let mut dict = Dict::new();
                interp.comprehension(generators, frame, &mut |interp, frame| {
                    let k = interp.eval(key, frame)?;
                    let v = interp.eval(value, frame)?;
                    dict.insert(k, v)
                })?;
                Ok(Value::dict(dict))
            }),
            Expr::Unary { op, operand } => {
                let operand = self.eval(operand, frame)?;
                operators::unary(*op, &operand)
            }
            Expr::Binary { op, left, right } => {
                let left = self.eval(left, frame)?;
                let right = self.eval(right, frame)?;
                operators::binary(*op, &left, &right)
            }
            Expr::Logical { and, left, right } => {
                let left = self.eval(left, frame)?;
                if left.truthy() == *and {
                    self.eval(right, frame)
                } else {
                    Ok(left)
                }
            }
            Expr::Compare { left, comparisons } => {
                let mut left = self.eval(left, frame)?;
                for (op, right) in comparisons {
                    let right = self.eval(right, frame)?;
                    if !operators::compare(*op, &left, &right)? {
                        return Ok(Value::Bool(false));
                    }
                    left = right;
                }
                Ok(Value::Bool(true))
            }
            Expr::IfExp {
                condition,
                body,
                orelse,
            } => {
                if self.eval(condition, frame)?.truthy() {
                    self.eval(body, frame)
                } else {
                    self.eval(orelse, frame)
                }
            }
            Expr::Call { func, args, kwargs } => {
                let callee = self.eval(func, frame)?;
                let args = self.eval_all(args, frame)?;
                let kwargs = kwargs
                    .iter()
                    .map(|(name, expr)| Ok((name.clone(), self.eval(expr, frame)?)))
                    .collect::<PyfunResult<Vec<_>>>()?;
                self.call_value(&callee, args, kwargs)
            }
            Expr::Attribute { value, attr } => {
                let receiver = self.eval(value, frame)?;
                methods::bind(receiver, attr)
            }
            Expr::Subscript { value, index } => {
                let container = self.eval(value, frame)?;
                let key = self.eval(index, frame)?;
                operators::get_item(&container, &key)
            }
            Expr::Slice {
                value,
                lower,
                upper,
                step,
            } => {
                let container = self.eval(value, frame)?;
                let lower = self.eval_optional(lower.as_deref(), frame)?;
                let upper = self.eval_optional(upper.as_deref(), frame)?;
                let step = self.eval_optional(step.as_deref(), frame)?;
                operators::slice(&container, lower, upper, step)
            }
            Expr::Lambda(def) => self.make_function(def, frame),
        }
    }

    fn eval_all(&self, exprs: &[Expr], frame: &mut Frame) -> PyfunResult<Vec<Value>> {
        exprs.iter().map(|expr| self.eval(expr, frame)).collect()
    }

    fn eval_optional(&self, expr: Option<&Expr>, frame: &mut Frame) -> PyfunResult<Option<Value>> {
        expr.map(|expr| self.eval(expr, frame)).transpose()
    }

    fn lookup(&self, name: &str, frame: &Frame) -> PyfunResult<Value> {
        if !frame.module_level {
            if let Some(value) = frame.local(name) {
                return Ok(value);
            }
            let enclosing = frame
                .closure
                .iter()
                .find_map(|scope| scope.borrow().get(name).cloned());
            if let Some(value) = enclosing {
                return Ok(value);
            }
        }
        if let Some(value) = frame.globals.borrow().get(name) {
            return Ok(value.clone());
        }
        if let Some(value) = self.natives.get(name) {
            return Ok(value.clone());
        }
        builtins::lookup(name).ok_or_else(|| PyfunError::name_error(name))
    }

    /// Run `body` with comprehension targets isolated from the enclosing scope.
    fn scoped<T>(
        &self,
        generators: &[Comprehension],
        frame: &mut Frame,
        body: impl FnOnce(&Self, &mut Frame) -> PyfunResult<T>,
    ) -> PyfunResult<T> {
        let mut names = Vec::new();
        for generator in generators {
            target_names(&generator.target, &mut names);
        }
        let saved: Vec<(String, Option<Value>)> = names
            .into_iter()
            .map(|name| {
                let value = frame.local(&name);
                (name, value)
            })
            .collect();

        let result = body(self, frame);
        for (name, value) in saved.into_iter().rev() {
            frame.restore(&name, value);
        }
        result
    }

    fn comprehension(
        &self,
        generators: &[Comprehension],
        frame: &mut Frame,
        emit: &mut dyn FnMut(&Self, &mut Frame) -> PyfunResult<()>,
    ) -> PyfunResult<()> {
        let Some((first, rest)) = generators.split_first() else {
            return emit(self, frame);
        };
        let iterable = self.eval(&first.iter, frame)?;
        'items: for item in iterate(&iterable)? {
            self.assign(&first.target, item, frame)?;
            for condition in &first.conditions {
                if !self.eval(condition, frame)?.truthy() {
                    continue 'items;
                }
            }
            self.comprehension(rest, frame, emit)?;
        }
        Ok(())
    }

    /// Sort values in place, optionally by a key function. Stable.
    pub(crate) fn sort_values(
        &self,
        items: &mut Vec<Value>,
        key: Option<&Value>,
        reverse: bool,
    ) -> PyfunResult<()> {
        let keys = match key {
            Some(key) if !matches!(key, Value::None) => items
                .iter()
                .map(|item| self.call_value(key, vec![item.clone()], Vec::new()))
                .collect::<PyfunResult<Vec<_>>>()?,
            _ => items.clone(),
        };

        let mut order: Vec<usize> = (0..items.len()).collect();
        let mut failure = None;
        order.sort_by(|&a, &b| {
            let ordering = if reverse {
                keys[b].compare(&keys[a], "<")
            } else {
                keys[a].compare(&keys[b], "<")
            };
            ordering.unwrap_or_else(|err| {
                failure.get_or_insert(err);
                std::cmp::Ordering::Equal
            })
        });
        if let Some(err) = failure {
            return Err(err);
        }

        let sorted: Vec<Value> = order.into_iter().map(|i| items[i].clone()).collect();
        *items = sorted;
        Ok(())
    }
}

fn bind_arguments(
    function: &Function,
    args: Vec<Value>,
    kwargs: Vec<(String, Value)>,
) -> PyfunResult<HashMap<String, Value>> {
    let def = &function.def;
    let params = &def.params;
    if args.len() > params.len() {
        return Err(PyfunError::type_error(format!(
            "{}() takes {} positional argument{} but {} {} given",
            def.name,
            params.len(),
            if params.len() == 1 { "" } else { "s" },
            args.len(),
            if args.len() == 1 { "was" } else { "were" }
        )));
    }

    let mut slots: Vec<Option<Value>> = args.into_iter().map(Some).collect();
    slots.resize(params.len(), None);
    for (name, value) in kwargs {
        let Some(index) = params.iter().position(|param| param.name == name) else {
            return Err(PyfunError::type_error(format!(
                "{}() got an unexpected keyword argument '{}'",
                def.name, name
            )));
        };
        if slots[index].is_some() {
            return Err(PyfunError::type_error(format!(
                "{}() got multiple values for argument '{}'",
                def.name, name
            )));
        }
        slots[index] = Some(value);
    }

    let mut locals = HashMap::with_capacity(params.len());
    for ((param, slot), default) in params.iter().zip(slots).zip(&function.defaults) {
        let value = match slot.or_else(|| default.clone()) {
            Some(value) => value,
            None => {
                return Err(PyfunError::type_error(format!(
                    "{}() missing 1 required positional argument: '{}'",
                    def.name, param.name
                )))
            }
        };
        locals.insert(param.name.clone(), value);
    }
    Ok(locals)
}

/// Clear a finished call's scope when only functions stored in it still refer to it.
///
/// Nested functions hold their defining scope, so a helper assigned in that
/// scope forms a reference cycle that would otherwise never be freed.
fn release_scope(scope: &Scope) {
    // (function, references held by this scope)
    let mut internal: Vec<(&Rc<Function>, usize)> = Vec::new();
    let locals = scope.borrow();
    for value in locals.values() {
        let Value::Function(function) = value else {
            continue;
        };
        if !function.closure.iter().any(|s| Rc::ptr_eq(s, scope)) {
            continue;
        }
        match internal.iter().position(|(f, _)| Rc::ptr_eq(f, function)) {
            Some(index) => internal[index].1 += 1,
            None => internal.push((function, 1)),
        }
    }
    let unreachable = !internal.is_empty()
        && Rc::strong_count(scope) == 1 + internal.len()
        && internal
            .iter()
            .all(|(function, count)| Rc::strong_count(function) == *count);
    drop(internal);
    drop(locals);
    if unreachable {
        // Dropped outside the borrow, since dropping values may release other scopes
        let locals = std::mem::take(&mut *scope.borrow_mut());
        drop(locals);
    }
}

fn target_names(target: &Expr, names: &mut Vec<String>) {
    match target {
        Expr::Name(name) => names.push(name.clone()),
        Expr::Tuple(items) | Expr::List(items) => {
            for item in items {
                target_names(item, names);
            }
        }
        _ => {}
    }
}
