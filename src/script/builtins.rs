//==================================================
// File: script/builtins.rs
//==================================================
// Author: ZobieLabs
// License: Duality Public License (DPL v1.0)
// Goal: Builtin namespace and shared native modules
// Objective: Provide conversions, printing, error types and the default
//            `__import__` entry the import hook later replaces
//==================================================

use super::error::Builtin;
use super::exec;
use super::state::ThreadState;
use super::value::{Module, ModuleOrigin, ModuleRef, ScriptResult, Value};

/// Populates a fresh builtins namespace.
pub fn install(builtins: &ModuleRef) {
    for builtin in Builtin::ALL {
        builtins.set(builtin.name(), Value::ErrorType(builtin.get()));
    }
    builtins.set("None", Value::None);
    builtins.set("__import__", Value::native("__import__", default_import));
    builtins.set("print", Value::native("print", print));
    builtins.set("str", Value::native("str", |ts, args| {
        let value = single(ts, "str", args)?;
        exec::to_text(ts, value).map(Value::text)
    }));
    builtins.set("repr", Value::native("repr", |ts, args| {
        let value = single(ts, "repr", args)?;
        exec::repr(ts, value).map(Value::text)
    }));
    builtins.set("len", Value::native("len", |ts, args| {
        let value = single(ts, "len", args)?;
        exec::len(ts, value).map(|n| Value::Int(n as i64))
    }));
    builtins.set("bool", Value::native("bool", |ts, args| {
        let value = single(ts, "bool", args)?;
        Ok(Value::Bool(value.truthy()))
    }));
    builtins.set("int", Value::native("int", |ts, args| {
        let value = exec::numeric_view(ts, single(ts, "int", args)?)?;
        to_integer(ts, &value).map(Value::Int)
    }));
    builtins.set("long", Value::native("long", |ts, args| {
        to_integer(ts, single(ts, "long", args)?).map(Value::Long)
    }));
    builtins.set("float", Value::native("float", |ts, args| {
        let value = exec::numeric_view(ts, single(ts, "float", args)?)?;
        to_float(ts, &value).map(Value::Float)
    }));
    builtins.set("dir", Value::native("dir", |ts, args| {
        let value = single(ts, "dir", args)?;
        let names = match value {
            Value::Module(module) => module.names(),
            Value::Foreign(object) => object.attr_names(),
            _ => Vec::new(),
        };
        Ok(Value::tuple(names.into_iter().map(Value::text).collect()))
    }));
}

fn single<'a>(ts: &ThreadState, name: &str, args: &'a [Value]) -> ScriptResult<&'a Value> {
    match args {
        [value] => Ok(value),
        _ => Err(ts.raise(
            Builtin::Type,
            format!("{name}() takes exactly 1 argument ({} given)", args.len()),
        )),
    }
}

fn print(ts: &ThreadState, args: &[Value]) -> ScriptResult<Value> {
    let parts = args
        .iter()
        .map(|arg| exec::to_text(ts, arg))
        .collect::<ScriptResult<Vec<_>>>()?;
    println!("{}", parts.join(" "));
    Ok(Value::None)
}

/// `__import__(name, globals, locals, fromlist)` without any hook installed.
pub fn default_import(ts: &ThreadState, args: &[Value]) -> ScriptResult<Value> {
    let name = import_name(ts, args)?;
    exec::native_import(ts, name)
}

pub(crate) fn import_name<'a>(ts: &ThreadState, args: &'a [Value]) -> ScriptResult<&'a str> {
    match args.first() {
        Some(Value::Text(name)) => Ok(name),
        _ => Err(ts.raise(Builtin::Type, "__import__() argument 1 must be string")),
    }
}

fn to_integer(ts: &ThreadState, value: &Value) -> ScriptResult<i64> {
    match value {
        Value::Bool(b) => Ok(*b as i64),
        Value::Int(i) | Value::Long(i) => Ok(*i),
        Value::Float(f) => {
            if !f.is_finite() || f.trunc() >= i64::MAX as f64 || f.trunc() < i64::MIN as f64 {
                return Err(ts.raise(Builtin::Overflow, "cannot convert float to integer"));
            }
            Ok(f.trunc() as i64)
        }
        Value::Text(text) => text.trim().parse::<i64>().map_err(|_| {
            ts.raise(
                Builtin::Value,
                format!("invalid literal for int() with base 10: '{text}'"),
            )
        }),
        other => Err(ts.raise(
            Builtin::Type,
            format!("int() argument must be a string or a number, not '{}'", other.type_name()),
        )),
    }
}

fn to_float(ts: &ThreadState, value: &Value) -> ScriptResult<f64> {
    match value {
        Value::Bool(b) => Ok(*b as i64 as f64),
        Value::Int(i) | Value::Long(i) => Ok(*i as f64),
        Value::Float(f) => Ok(*f),
        Value::Text(text) => text.trim().parse::<f64>().map_err(|_| {
            ts.raise(
                Builtin::Value,
                format!("could not convert string to float: {text}"),
            )
        }),
        other => Err(ts.raise(
            Builtin::Type,
            format!("float() argument must be a string or a number, not '{}'", other.type_name()),
        )),
    }
}

//==================================================
// Section 2.0 - Native modules
//==================================================

/// The `math` module shared by every sub-interpreter.
pub fn math_module() -> ModuleRef {
    let math = Module::new("math", ModuleOrigin::Native);
    math.set("pi", Value::Float(std::f64::consts::PI));
    math.set("e", Value::Float(std::f64::consts::E));
    let unary: [(&str, fn(f64) -> f64); 4] = [
        ("sqrt", f64::sqrt),
        ("floor", f64::floor),
        ("ceil", f64::ceil),
        ("fabs", f64::abs),
    ];
    for (name, op) in unary {
        math.set(name, Value::native(name, move |ts, args| {
            let x = to_float(ts, single(ts, "math function", args)?)?;
            Ok(Value::Float(op(x)))
        }));
    }
    math
}
