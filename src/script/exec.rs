//==================================================
// File: script/exec.rs
//==================================================
// Author: ZobieLabs
// License: Duality Public License (DPL v1.0)
// Goal: Tree-walking evaluator for the embedded Script language
// Objective: Compile source in single, eval or file mode and run it against
//            a namespace, leaving failures in the pending error slot
//==================================================

use std::collections::HashMap;
use std::sync::Arc;

use super::ast::{AssignTarget, BinaryOp, Expr, ImportNames, Literal, Program, Stmt, UnaryOp};
use super::error::{Builtin, ErrorDetail, ScriptException};
use super::parser::{self, ParseError};
use super::state::ThreadState;
use super::value::{
    ErrorInstance, Lambda, ModuleOrigin, ModuleRef, ScriptResult, Value, format_float,
};

//==================================================
// Section 1.0 - Compilation
//==================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompileMode {
    /// One interactive statement; expression results are echoed.
    Single,
    /// One expression whose value is returned.
    Eval,
    /// A whole script.
    File,
}

#[derive(Debug, Clone)]
enum Code {
    Statements(Program),
    Expression(Expr),
}

#[derive(Debug, Clone)]
pub struct CompiledCode {
    mode: CompileMode,
    filename: String,
    code: Code,
}

impl CompiledCode {
    pub fn mode(&self) -> CompileMode {
        self.mode
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }
}

/// Parses `source`. Syntax errors raise `SyntaxError`; nesting beyond the
/// parser's limit raises `MemoryError`.
pub fn compile(
    ts: &ThreadState,
    source: &str,
    mode: CompileMode,
    filename: &str,
) -> ScriptResult<CompiledCode> {
    let code = match mode {
        CompileMode::Eval => parser::parse_expression(source).map(Code::Expression),
        CompileMode::Single | CompileMode::File => {
            parser::parse_program(source).map(Code::Statements)
        }
    };
    match code {
        Ok(code) => Ok(CompiledCode {
            mode,
            filename: filename.to_string(),
            code,
        }),
        Err(err) => Err(raise_parse_error(ts, err, filename)),
    }
}

fn raise_parse_error(ts: &ThreadState, err: ParseError, filename: &str) -> super::value::Raised {
    if !err.is_syntax() {
        return ts.raise(Builtin::Memory, err.to_string());
    }
    let position = err.position();
    let raised = ts.raise(Builtin::Syntax, err.to_string());
    ts.push_trace(filename, position.line);
    raised
}

/// Runs compiled code with `globals` as its namespace. Eval mode returns the
/// expression's value, the other modes return `None`.
pub fn exec_code(ts: &ThreadState, code: &CompiledCode, globals: &ModuleRef) -> ScriptResult<Value> {
    let scope = Scope::module(globals);
    match &code.code {
        Code::Expression(expr) => eval(ts, &scope, expr),
        Code::Statements(program) => {
            for statement in &program.statements {
                let result = exec_stmt(ts, &scope, &statement.stmt, code.mode);
                if result.is_err() {
                    ts.push_trace(&code.filename, statement.line);
                    return result.map(|_| Value::None);
                }
            }
            Ok(Value::None)
        }
    }
}

pub fn exec_source(
    ts: &ThreadState,
    source: &str,
    mode: CompileMode,
    filename: &str,
    globals: &ModuleRef,
) -> ScriptResult<Value> {
    let code = compile(ts, source, mode, filename)?;
    exec_code(ts, &code, globals)
}

//==================================================
// Section 2.0 - Scopes and statements
//==================================================

struct Scope<'a> {
    locals: Option<&'a HashMap<String, Value>>,
    globals: &'a ModuleRef,
}

impl<'a> Scope<'a> {
    fn module(globals: &'a ModuleRef) -> Self {
        Self {
            locals: None,
            globals,
        }
    }

    fn lookup(&self, ts: &ThreadState, name: &str) -> ScriptResult<Value> {
        if let Some(value) = self.locals.and_then(|locals| locals.get(name)) {
            return Ok(value.clone());
        }
        if let Some(value) = self.globals.get(name) {
            return Ok(value);
        }
        ts.builtins()
            .get(name)
            .ok_or_else(|| ts.raise(Builtin::Name, format!("name '{name}' is not defined")))
    }
}

fn exec_stmt(ts: &ThreadState, scope: &Scope<'_>, stmt: &Stmt, mode: CompileMode) -> ScriptResult<()> {
    match stmt {
        Stmt::Expr(expr) => {
            let value = eval(ts, scope, expr)?;
            if mode == CompileMode::Single && !value.is_none() {
                println!("{}", repr(ts, &value)?);
            }
            Ok(())
        }
        Stmt::Assign { target, value } => {
            let value = eval(ts, scope, value)?;
            match target {
                AssignTarget::Name(name) => {
                    scope.globals.set(name.clone(), value);
                    Ok(())
                }
                AssignTarget::Attribute { object, name } => {
                    let object = eval(ts, scope, object)?;
                    set_attr(ts, &object, name, value)
                }
                AssignTarget::Index { object, index } => {
                    let object = eval(ts, scope, object)?;
                    let index = eval(ts, scope, index)?;
                    set_item(ts, &object, &index, value)
                }
            }
        }
        Stmt::Import { path, alias } => {
            let module = import(ts, scope.globals, path, Value::None)?;
            let binding = match alias {
                Some(alias) => alias.clone(),
                None => last_segment(path).to_string(),
            };
            scope.globals.set(binding, module);
            Ok(())
        }
        Stmt::FromImport { path, names } => exec_from_import(ts, scope, path, names),
        Stmt::Raise(expr) => {
            let raised = match expr {
                Some(expr) => eval(ts, scope, expr)?,
                None => {
                    return Err(ts.raise(Builtin::Runtime, "No active exception to reraise"));
                }
            };
            Err(raise_value(ts, raised))
        }
        Stmt::Pass => Ok(()),
    }
}

fn exec_from_import(
    ts: &ThreadState,
    scope: &Scope<'_>,
    path: &str,
    names: &ImportNames,
) -> ScriptResult<()> {
    let fromlist = match names {
        ImportNames::All => Value::tuple(vec![Value::text("*")]),
        ImportNames::Listed(listed) => Value::tuple(
            listed
                .iter()
                .map(|(name, _)| Value::text(name))
                .collect(),
        ),
    };
    let module = import(ts, scope.globals, path, fromlist)?;
    match names {
        ImportNames::All => {
            let entries = match &module {
                Value::Module(module) => module.public_entries(),
                Value::Foreign(object) => {
                    let mut entries = Vec::new();
                    for name in object.attr_names() {
                        let value = object.get_attr(ts, &name)?;
                        entries.push((name, value));
                    }
                    entries
                }
                other => {
                    return Err(ts.raise(
                        Builtin::Import,
                        format!("cannot import * from '{}'", other.type_name()),
                    ));
                }
            };
            for (name, value) in entries {
                scope.globals.set(name, value);
            }
        }
        ImportNames::Listed(listed) => {
            for (name, alias) in listed {
                let value = match get_attr(ts, &module, name) {
                    Ok(value) => value,
                    Err(raised) => {
                        if !ts.error_matches(Builtin::Attribute) {
                            return Err(raised);
                        }
                        ts.clear_error();
                        return Err(ts.raise(Builtin::Import, format!("cannot import name {name}")));
                    }
                };
                scope
                    .globals
                    .set(alias.clone().unwrap_or_else(|| name.clone()), value);
            }
        }
    }
    Ok(())
}

/// Calls the `__import__` binding of the interpreter's builtins.
pub fn import(ts: &ThreadState, globals: &ModuleRef, path: &str, fromlist: Value) -> ScriptResult<Value> {
    let hook = ts
        .builtins()
        .get("__import__")
        .ok_or_else(|| ts.raise(Builtin::Import, "__import__ not found"))?;
    call(
        ts,
        &hook,
        &[
            Value::text(path),
            Value::Module(globals.clone()),
            Value::None,
            fromlist,
        ],
    )
}

/// Import machinery without any hook: the interpreter's module table first,
/// then the shared native module registry.
pub fn native_import(ts: &ThreadState, name: &str) -> ScriptResult<Value> {
    if let Some(module) = ts.module(name) {
        if module.origin() != ModuleOrigin::HostPackage {
            return Ok(Value::Module(module));
        }
    }
    if let Some(module) = ts.extensions().get(name) {
        ts.add_module(module.clone());
        return Ok(Value::Module(module));
    }
    Err(ts.raise_exception(
        ScriptException::new(Builtin::Import.get(), format!("No module named {name}"))
            .with_detail(ErrorDetail::ImportPath(name.to_string())),
    ))
}

fn raise_value(ts: &ThreadState, value: Value) -> super::value::Raised {
    match value {
        Value::ErrorType(error_type) => ts.raise_exception(ScriptException::bare(error_type)),
        Value::ErrorInstance(instance) => {
            let exception = match &instance.message {
                Some(message) => ScriptException::new(instance.error_type.clone(), message.clone()),
                None => ScriptException::bare(instance.error_type.clone()),
            };
            ts.raise_exception(exception)
        }
        other => ts.raise(
            Builtin::Type,
            format!(
                "exceptions must derive from Exception, not {}",
                other.type_name()
            ),
        ),
    }
}

fn last_segment(path: &str) -> &str {
    path.rsplit('.').next().unwrap_or(path)
}

//==================================================
// Section 3.0 - Expressions
//==================================================

fn eval(ts: &ThreadState, scope: &Scope<'_>, expr: &Expr) -> ScriptResult<Value> {
    let _nesting = ts.enter_expression()?;
    eval_node(ts, scope, expr)
}

fn eval_node(ts: &ThreadState, scope: &Scope<'_>, expr: &Expr) -> ScriptResult<Value> {
    match expr {
        Expr::Literal(literal) => Ok(match literal {
            Literal::None => Value::None,
            Literal::Bool(b) => Value::Bool(*b),
            Literal::Int(i) => Value::Int(*i),
            Literal::Long(i) => Value::Long(*i),
            Literal::Float(f) => Value::Float(*f),
            Literal::Str(s) => Value::text(s),
        }),
        Expr::Name(name) => scope.lookup(ts, name),
        Expr::Tuple(items) => {
            let values = items
                .iter()
                .map(|item| eval(ts, scope, item))
                .collect::<ScriptResult<Vec<_>>>()?;
            Ok(Value::tuple(values))
        }
        Expr::Attribute { object, name } => {
            let object = eval(ts, scope, object)?;
            get_attr(ts, &object, name)
        }
        Expr::Call { callee, args } => {
            let callee = eval(ts, scope, callee)?;
            let args = args
                .iter()
                .map(|arg| eval(ts, scope, arg))
                .collect::<ScriptResult<Vec<_>>>()?;
            call(ts, &callee, &args)
        }
        Expr::Index { object, index } => {
            let object = eval(ts, scope, object)?;
            let index = eval(ts, scope, index)?;
            get_item(ts, &object, &index)
        }
        Expr::Unary { op, operand } => {
            let operand = eval(ts, scope, operand)?;
            unary(ts, *op, operand)
        }
        Expr::Binary { op, left, right } => {
            let left = eval(ts, scope, left)?;
            let right = eval(ts, scope, right)?;
            binary(ts, *op, &left, &right)
        }
        Expr::Logical { and, left, right } => {
            let left = eval(ts, scope, left)?;
            if left.truthy() == *and {
                eval(ts, scope, right)
            } else {
                Ok(left)
            }
        }
        Expr::Lambda { params, body } => Ok(Value::Lambda(Arc::new(Lambda {
            params: params.clone(),
            body: body.clone(),
            globals: scope.globals.clone(),
        }))),
    }
}

fn unary(ts: &ThreadState, op: UnaryOp, operand: Value) -> ScriptResult<Value> {
    match op {
        UnaryOp::Not => Ok(Value::Bool(!operand.truthy())),
        UnaryOp::Negate => match numeric_view(ts, &operand)? {
            Value::Int(i) => i.checked_neg().map(Value::Int).ok_or_else(|| overflow(ts)),
            Value::Long(i) => i.checked_neg().map(Value::Long).ok_or_else(|| overflow(ts)),
            Value::Bool(b) => Ok(Value::Int(-(b as i64))),
            Value::Float(f) => Ok(Value::Float(-f)),
            other => Err(ts.raise(
                Builtin::Type,
                format!("bad operand type for unary -: '{}'", other.type_name()),
            )),
        },
    }
}

/// Numeric view used by arithmetic. `Long` is contagious over `Int`, `Float`
/// over both.
enum Number {
    Int(i64),
    Long(i64),
    Float(f64),
}

fn number(value: &Value) -> Option<Number> {
    match value {
        Value::Bool(b) => Some(Number::Int(*b as i64)),
        Value::Int(i) => Some(Number::Int(*i)),
        Value::Long(i) => Some(Number::Long(*i)),
        Value::Float(f) => Some(Number::Float(*f)),
        _ => None,
    }
}

fn as_float(number: &Number) -> f64 {
    match *number {
        Number::Int(i) | Number::Long(i) => i as f64,
        Number::Float(f) => f,
    }
}

fn overflow(ts: &ThreadState) -> super::value::Raised {
    ts.raise(Builtin::Overflow, "integer overflow")
}

fn binary(ts: &ThreadState, op: BinaryOp, left: &Value, right: &Value) -> ScriptResult<Value> {
    match op {
        BinaryOp::Equal => return equals(ts, left, right).map(Value::Bool),
        BinaryOp::NotEqual => return equals(ts, left, right).map(|eq| Value::Bool(!eq)),
        BinaryOp::In => return contains(ts, right, left).map(Value::Bool),
        BinaryOp::NotIn => return contains(ts, right, left).map(|found| Value::Bool(!found)),
        _ => {}
    }
    let left = &numeric_view(ts, left)?;
    let right = &numeric_view(ts, right)?;
    if let BinaryOp::Less | BinaryOp::Greater | BinaryOp::LessEqual | BinaryOp::GreaterEqual = op {
        return compare(ts, op, left, right);
    }
    match (left, right, op) {
        (Value::Text(a), Value::Text(b), BinaryOp::Add) => {
            return Ok(Value::text(format!("{a}{b}")));
        }
        (Value::Tuple(a), Value::Tuple(b), BinaryOp::Add) => {
            let mut items = a.as_ref().clone();
            items.extend(b.iter().cloned());
            return Ok(Value::tuple(items));
        }
        (Value::Text(text), Value::Int(count), BinaryOp::Multiply)
        | (Value::Int(count), Value::Text(text), BinaryOp::Multiply) => {
            return repeat_text(ts, text, *count).map(Value::text);
        }
        _ => {}
    }
    let (Some(a), Some(b)) = (number(left), number(right)) else {
        return Err(ts.raise(
            Builtin::Type,
            format!(
                "unsupported operand type(s) for {}: '{}' and '{}'",
                symbol(op),
                left.type_name(),
                right.type_name()
            ),
        ));
    };
    match (&a, &b) {
        (Number::Float(_), _) | (_, Number::Float(_)) => float_op(ts, op, as_float(&a), as_float(&b)),
        (Number::Int(x), Number::Int(y)) => int_op(ts, op, *x, *y).map(Value::Int),
        (Number::Int(x) | Number::Long(x), Number::Int(y) | Number::Long(y)) => {
            int_op(ts, op, *x, *y).map(Value::Long)
        }
    }
}

/// Host numbers take part in arithmetic through their Script value.
pub(crate) fn numeric_view(ts: &ThreadState, value: &Value) -> ScriptResult<Value> {
    if let Value::Foreign(foreign) = value {
        if let Some(number) = foreign.to_number(ts)? {
            return Ok(number);
        }
    }
    Ok(value.clone())
}

/// `text * count`. Sizes the platform cannot hold raise `MemoryError`.
fn repeat_text(ts: &ThreadState, text: &str, count: i64) -> ScriptResult<String> {
    if text.is_empty() || count <= 0 {
        return Ok(String::new());
    }
    let count = usize::try_from(count).unwrap_or(usize::MAX);
    let mut repeated = String::new();
    let reserved = text
        .len()
        .checked_mul(count)
        .and_then(|size| repeated.try_reserve_exact(size).ok());
    if reserved.is_none() {
        return Err(ts.raise(Builtin::Memory, "repeated string is too large"));
    }
    for _ in 0..count {
        repeated.push_str(text);
    }
    Ok(repeated)
}

fn int_op(ts: &ThreadState, op: BinaryOp, a: i64, b: i64) -> ScriptResult<i64> {
    let result = match op {
        BinaryOp::Add => a.checked_add(b),
        BinaryOp::Subtract => a.checked_sub(b),
        BinaryOp::Multiply => a.checked_mul(b),
        BinaryOp::Divide | BinaryOp::Modulo => {
            if b == 0 {
                return Err(ts.raise(
                    Builtin::ZeroDivision,
                    "integer division or modulo by zero",
                ));
            }
            let (Some(quotient), Some(remainder)) = (a.checked_div(b), a.checked_rem(b)) else {
                return Err(overflow(ts));
            };
            // floor toward negative infinity
            let adjust = remainder != 0 && ((remainder < 0) != (b < 0));
            if op == BinaryOp::Divide {
                Some(if adjust { quotient - 1 } else { quotient })
            } else {
                Some(if adjust { remainder + b } else { remainder })
            }
        }
        _ => None,
    };
    result.ok_or_else(|| overflow(ts))
}

fn float_op(ts: &ThreadState, op: BinaryOp, a: f64, b: f64) -> ScriptResult<Value> {
    let value = match op {
        BinaryOp::Add => a + b,
        BinaryOp::Subtract => a - b,
        BinaryOp::Multiply => a * b,
        BinaryOp::Divide => {
            if b == 0.0 {
                return Err(ts.raise(Builtin::ZeroDivision, "float division by zero"));
            }
            a / b
        }
        BinaryOp::Modulo => {
            if b == 0.0 {
                return Err(ts.raise(Builtin::ZeroDivision, "float modulo"));
            }
            let r = a % b;
            if r != 0.0 && ((r < 0.0) != (b < 0.0)) { r + b } else { r }
        }
        _ => return Err(ts.raise(Builtin::Type, "unsupported float operation")),
    };
    Ok(Value::Float(value))
}

fn compare(ts: &ThreadState, op: BinaryOp, left: &Value, right: &Value) -> ScriptResult<Value> {
    let ordering = match (left, right) {
        (Value::Text(a), Value::Text(b)) => a.cmp(b),
        _ => match (number(left), number(right)) {
            (Some(Number::Int(a) | Number::Long(a)), Some(Number::Int(b) | Number::Long(b))) => {
                a.cmp(&b)
            }
            (Some(a), Some(b)) => match as_float(&a).partial_cmp(&as_float(&b)) {
                Some(ordering) => ordering,
                None => return Ok(Value::Bool(false)),
            },
            _ => {
                return Err(ts.raise(
                    Builtin::Type,
                    format!(
                        "'{}' not supported between '{}' and '{}'",
                        symbol(op),
                        left.type_name(),
                        right.type_name()
                    ),
                ));
            }
        },
    };
    Ok(Value::Bool(match op {
        BinaryOp::Less => ordering.is_lt(),
        BinaryOp::Greater => ordering.is_gt(),
        BinaryOp::LessEqual => ordering.is_le(),
        _ => ordering.is_ge(),
    }))
}

fn symbol(op: BinaryOp) -> &'static str {
    match op {
        BinaryOp::Add => "+",
        BinaryOp::Subtract => "-",
        BinaryOp::Multiply => "*",
        BinaryOp::Divide => "/",
        BinaryOp::Modulo => "%",
        BinaryOp::Equal => "==",
        BinaryOp::NotEqual => "!=",
        BinaryOp::Less => "<",
        BinaryOp::Greater => ">",
        BinaryOp::LessEqual => "<=",
        BinaryOp::GreaterEqual => ">=",
        BinaryOp::In => "in",
        BinaryOp::NotIn => "not in",
    }
}

//==================================================
// Section 4.0 - Object protocol
//==================================================

pub fn equals(ts: &ThreadState, left: &Value, right: &Value) -> ScriptResult<bool> {
    Ok(match (left, right) {
        (Value::None, Value::None) => true,
        (Value::Text(a), Value::Text(b)) => a == b,
        (Value::Tuple(a), Value::Tuple(b)) => {
            if a.len() != b.len() {
                return Ok(false);
            }
            for (x, y) in a.iter().zip(b.iter()) {
                if !equals(ts, x, y)? {
                    return Ok(false);
                }
            }
            true
        }
        (Value::Module(a), Value::Module(b)) => Arc::ptr_eq(a, b),
        (Value::ErrorType(a), Value::ErrorType(b)) => Arc::ptr_eq(a, b),
        (Value::Foreign(object), other) => object.equals(ts, other)?,
        (other, Value::Foreign(object)) => object.equals(ts, other)?,
        _ => match (number(left), number(right)) {
            (Some(Number::Int(a) | Number::Long(a)), Some(Number::Int(b) | Number::Long(b))) => a == b,
            (Some(a), Some(b)) => as_float(&a) == as_float(&b),
            _ => false,
        },
    })
}

/// `item in container`.
pub fn contains(ts: &ThreadState, container: &Value, item: &Value) -> ScriptResult<bool> {
    match container {
        Value::Text(text) => match item {
            Value::Text(needle) => Ok(text.contains(&**needle)),
            other => Err(ts.raise(
                Builtin::Type,
                format!("'in <string>' requires string as left operand, not {}", other.type_name()),
            )),
        },
        Value::Tuple(items) => {
            for candidate in items.iter() {
                if equals(ts, candidate, item)? {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        Value::Module(module) => Ok(item.as_text().is_some_and(|name| module.contains(name))),
        Value::Foreign(foreign) => foreign.contains(ts, item),
        other => Err(ts.raise(
            Builtin::Type,
            format!("argument of type '{}' is not iterable", other.type_name()),
        )),
    }
}

pub fn get_attr(ts: &ThreadState, object: &Value, name: &str) -> ScriptResult<Value> {
    match object {
        Value::Module(module) => module.get(name).ok_or_else(|| {
            ts.raise(
                Builtin::Attribute,
                format!("'module' object has no attribute '{name}'"),
            )
        }),
        Value::Foreign(foreign) => foreign.get_attr(ts, name),
        Value::ErrorType(error_type) if name == "__name__" => Ok(Value::text(error_type.name())),
        Value::ErrorInstance(instance) if name == "message" => Ok(instance
            .message
            .as_ref()
            .map(Value::text)
            .unwrap_or(Value::None)),
        other => Err(ts.raise(
            Builtin::Attribute,
            format!("'{}' object has no attribute '{name}'", other.type_name()),
        )),
    }
}

pub fn set_attr(ts: &ThreadState, object: &Value, name: &str, value: Value) -> ScriptResult<()> {
    match object {
        Value::Module(module) => {
            module.set(name, value);
            Ok(())
        }
        Value::Foreign(foreign) => foreign.set_attr(ts, name, value),
        other => Err(ts.raise(
            Builtin::Attribute,
            format!("'{}' object has no attribute '{name}'", other.type_name()),
        )),
    }
}

pub(crate) fn index_of(ts: &ThreadState, index: &Value, len: usize) -> ScriptResult<usize> {
    let raw = match index {
        Value::Int(i) | Value::Long(i) => *i,
        Value::Bool(b) => *b as i64,
        other => {
            return Err(ts.raise(
                Builtin::Type,
                format!("indices must be integers, not {}", other.type_name()),
            ));
        }
    };
    let resolved = if raw < 0 { raw + len as i64 } else { raw };
    if resolved < 0 || resolved as usize >= len {
        return Err(ts.raise(Builtin::Index, "index out of range"));
    }
    Ok(resolved as usize)
}

pub fn get_item(ts: &ThreadState, object: &Value, index: &Value) -> ScriptResult<Value> {
    match object {
        Value::Tuple(items) => {
            let at = index_of(ts, index, items.len())?;
            Ok(items[at].clone())
        }
        Value::Text(text) => {
            let chars: Vec<char> = text.chars().collect();
            let at = index_of(ts, index, chars.len())?;
            Ok(Value::text(chars[at].to_string()))
        }
        Value::Foreign(foreign) => foreign.get_item(ts, index),
        other => Err(ts.raise(
            Builtin::Type,
            format!("'{}' object is not subscriptable", other.type_name()),
        )),
    }
}

pub fn set_item(ts: &ThreadState, object: &Value, index: &Value, value: Value) -> ScriptResult<()> {
    match object {
        Value::Foreign(foreign) => foreign.set_item(ts, index, value),
        other => Err(ts.raise(
            Builtin::Type,
            format!(
                "'{}' object does not support item assignment",
                other.type_name()
            ),
        )),
    }
}

pub fn len(ts: &ThreadState, object: &Value) -> ScriptResult<usize> {
    match object {
        Value::Text(text) => Ok(text.chars().count()),
        Value::Tuple(items) => Ok(items.len()),
        Value::Module(module) => Ok(module.names().len()),
        Value::Foreign(foreign) => foreign.len(ts),
        other => Err(ts.raise(
            Builtin::Type,
            format!("object of type '{}' has no len()", other.type_name()),
        )),
    }
}

pub fn call(ts: &ThreadState, callee: &Value, args: &[Value]) -> ScriptResult<Value> {
    match callee {
        Value::Native(native) => (native.func)(ts, args),
        Value::Lambda(lambda) => {
            if lambda.params.len() != args.len() {
                return Err(ts.raise(
                    Builtin::Type,
                    format!(
                        "<lambda>() takes exactly {} arguments ({} given)",
                        lambda.params.len(),
                        args.len()
                    ),
                ));
            }
            let _depth = ts.enter_call()?;
            let locals: HashMap<String, Value> = lambda
                .params
                .iter()
                .cloned()
                .zip(args.iter().cloned())
                .collect();
            let scope = Scope {
                locals: Some(&locals),
                globals: &lambda.globals,
            };
            eval(ts, &scope, &lambda.body)
        }
        Value::ErrorType(error_type) => {
            let message = match args.first() {
                Some(arg) => Some(to_text(ts, arg)?),
                None => None,
            };
            Ok(Value::ErrorInstance(Arc::new(ErrorInstance {
                error_type: error_type.clone(),
                message,
            })))
        }
        Value::Foreign(foreign) => foreign.call(ts, args),
        other => Err(ts.raise(
            Builtin::Type,
            format!("'{}' object is not callable", other.type_name()),
        )),
    }
}

/// `str()` of a value.
pub fn to_text(ts: &ThreadState, value: &Value) -> ScriptResult<String> {
    match value {
        Value::Text(text) => Ok(text.to_string()),
        Value::Float(f) => Ok(format_float(*f)),
        Value::Long(i) => Ok(i.to_string()),
        Value::ErrorInstance(instance) => Ok(instance.message.clone().unwrap_or_default()),
        Value::Foreign(foreign) => foreign.to_text(ts),
        other => repr(ts, other),
    }
}

/// `repr()` of a value. Foreign objects render through `str()`.
pub fn repr(ts: &ThreadState, value: &Value) -> ScriptResult<String> {
    match value.repr() {
        Some(text) => Ok(text),
        None => to_text(ts, value),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::state::ScriptRuntime;

    fn run(source: &str) -> (Arc<ThreadState>, ScriptResult<Value>) {
        let runtime = ScriptRuntime::new();
        let ts = runtime.new_interpreter();
        let main = ts.main().clone();
        let result = exec_source(&ts, source, CompileMode::File, "<test>", &main);
        (ts, result)
    }

    fn eval_in(ts: &ThreadState, source: &str) -> Value {
        let main = ts.main().clone();
        exec_source(ts, source, CompileMode::Eval, "<test>", &main).expect("eval")
    }

    #[test]
    fn integer_division_floors() {
        let (ts, result) = run("a = -7 / 2\nb = -7 % 2\nc = 7 % -2");
        result.expect("run");
        assert!(matches!(eval_in(&ts, "a"), Value::Int(-4)));
        assert!(matches!(eval_in(&ts, "b"), Value::Int(1)));
        assert!(matches!(eval_in(&ts, "c"), Value::Int(-1)));
    }

    #[test]
    fn long_is_contagious() {
        let (ts, result) = run("x = 1 + 2L");
        result.expect("run");
        assert!(matches!(eval_in(&ts, "x"), Value::Long(3)));
    }

    #[test]
    fn overflow_raises() {
        let (ts, result) = run("x = 9223372036854775807 + 1");
        assert!(result.is_err());
        assert!(ts.error_matches(Builtin::Overflow));
    }

    #[test]
    fn undefined_name_records_trace_line() {
        let (ts, result) = run("x = 1\ny = missing");
        assert!(result.is_err());
        let err = ts.fetch_error().expect("pending");
        assert_eq!(err.render(), "NameError: name 'missing' is not defined");
        assert_eq!(err.trace[0].line, 2);
    }

    #[test]
    fn lambdas_capture_globals() {
        let (ts, result) = run("k = 10\nadd = lambda a: a + k");
        result.expect("run");
        assert!(matches!(eval_in(&ts, "add(5)"), Value::Int(15)));
    }

    #[test]
    fn runaway_recursion_is_caught() {
        let (ts, result) = run("f = lambda n: f(n + 1)\nf(0)");
        assert!(result.is_err());
        assert!(ts.error_matches(Builtin::Runtime));
    }

    #[test]
    fn raise_uses_type_and_message() {
        let (ts, result) = run("raise ValueError('nope')");
        assert!(result.is_err());
        assert_eq!(ts.fetch_error().expect("pending").render(), "ValueError: nope");
    }

    #[test]
    fn import_of_native_module_binds_it() {
        let (ts, result) = run("import math\nfrom math import sqrt as root");
        result.expect("run");
        assert!(matches!(eval_in(&ts, "root(16.0)"), Value::Float(f) if f == 4.0));
    }

    #[test]
    fn missing_module_raises_import_error() {
        let (ts, result) = run("import nothing.here");
        assert!(result.is_err());
        let err = ts.fetch_error().expect("pending");
        assert!(err.is(Builtin::Import));
        assert_eq!(err.detail, Some(ErrorDetail::ImportPath("nothing.here".into())));
    }

    #[test]
    fn compile_distinguishes_syntax_from_depth() {
        let runtime = ScriptRuntime::new();
        let ts = runtime.new_interpreter();
        assert!(compile(&ts, "x = (", CompileMode::Single, "<input>").is_err());
        assert!(ts.error_matches(Builtin::Syntax));
        ts.clear_error();
        let depth = parser::MAX_EXPRESSION_DEPTH;
        let deep = format!("{}1{}", "(".repeat(depth), ")".repeat(depth));
        assert!(compile(&ts, &deep, CompileMode::Single, "<input>").is_err());
        assert!(ts.error_matches(Builtin::Memory));
    }

    #[test]
    fn string_repetition_is_bounded() {
        let (ts, result) = run("a = 'ab' * 3\nb = 'ab' * -2\nc = '' * 9223372036854775807");
        result.expect("run");
        assert_eq!(eval_in(&ts, "a").as_text(), Some("ababab"));
        assert_eq!(eval_in(&ts, "b").as_text(), Some(""));
        assert_eq!(eval_in(&ts, "c").as_text(), Some(""));

        let main = ts.main().clone();
        let huge = exec_source(&ts, "'ab' * 9223372036854775807", CompileMode::Eval, "<test>", &main);
        assert!(huge.is_err());
        assert!(ts.error_matches(Builtin::Memory));
    }

    #[test]
    fn deep_lambda_bodies_hit_the_nesting_limit() {
        let chain = format!("0{}", " + n".repeat(parser::MAX_TREE_HEIGHT - 2));
        let (ts, result) = run(&format!("f = lambda n: {chain} + f(n)\nf(1)"));
        assert!(result.is_err());
        assert!(ts.error_matches(Builtin::Memory));
    }

    #[test]
    fn membership_covers_text_and_tuples() {
        let (ts, result) = run("t = (1, 'a', 2.5)");
        result.expect("run");
        assert!(matches!(eval_in(&ts, "'a' in t"), Value::Bool(true)));
        assert!(matches!(eval_in(&ts, "2 not in t"), Value::Bool(true)));
        assert!(matches!(eval_in(&ts, "'ell' in 'hello'"), Value::Bool(true)));
        let main = ts.main().clone();
        assert!(exec_source(&ts, "1 in 'abc'", CompileMode::Eval, "<test>", &main).is_err());
        assert!(ts.error_matches(Builtin::Type));
    }

    #[test]
    fn logical_operators_short_circuit() {
        let (ts, result) = run("x = 0 and missing\ny = 'a' or missing");
        result.expect("run");
        assert!(matches!(eval_in(&ts, "x"), Value::Int(0)));
        assert_eq!(eval_in(&ts, "y").as_text(), Some("a"));
    }
}
