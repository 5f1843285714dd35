//==================================================
// File: host/bootstrap.rs
//==================================================
// Author: ZobieLabs
// License: Duality Public License (DPL v1.0)
// Goal: Minimal Host class library for the in-process host
// Objective: Provide the lang classes, wrappers, throwables, class loader,
//            class-list service and the collections the bridge relies on
//==================================================

use super::in_process::{InProcessHost, LoaderSpec};
use super::{
    CLASS_LIST_CLASS, ClassBuilder, ClassRef, EMBED_EXCEPTION_CLASS, HostClass, HostEnv, HostRef,
    HostValue, Payload, Throw,
};
use parking_lot::Mutex;

const PRIMITIVES: [&str; 9] = [
    "boolean", "byte", "char", "short", "int", "long", "float", "double", "void",
];

const WRAPPERS: [(&str, &str); 9] = [
    ("java.lang.Boolean", "boolean"),
    ("java.lang.Byte", "byte"),
    ("java.lang.Character", "char"),
    ("java.lang.Short", "short"),
    ("java.lang.Integer", "int"),
    ("java.lang.Long", "long"),
    ("java.lang.Float", "float"),
    ("java.lang.Double", "double"),
    ("java.lang.Void", "void"),
];

/// (class, parent) in registration order.
const THROWABLES: [(&str, &str); 18] = [
    ("java.lang.Exception", "java.lang.Throwable"),
    ("java.lang.Error", "java.lang.Throwable"),
    ("java.lang.RuntimeException", "java.lang.Exception"),
    ("java.lang.IllegalArgumentException", "java.lang.RuntimeException"),
    ("java.lang.NumberFormatException", "java.lang.IllegalArgumentException"),
    ("java.lang.NullPointerException", "java.lang.RuntimeException"),
    ("java.lang.ClassCastException", "java.lang.RuntimeException"),
    ("java.lang.IndexOutOfBoundsException", "java.lang.RuntimeException"),
    ("java.lang.ArithmeticException", "java.lang.RuntimeException"),
    ("java.lang.ClassNotFoundException", "java.lang.Exception"),
    ("java.lang.NoSuchMethodException", "java.lang.Exception"),
    ("java.lang.InstantiationException", "java.lang.Exception"),
    ("java.lang.NoClassDefFoundError", "java.lang.Error"),
    ("java.lang.NoSuchMethodError", "java.lang.Error"),
    ("java.lang.AbstractMethodError", "java.lang.Error"),
    ("java.lang.OutOfMemoryError", "java.lang.Error"),
    ("java.lang.StackOverflowError", "java.lang.Error"),
    (EMBED_EXCEPTION_CLASS, "java.lang.Exception"),
];

pub(super) fn install(host: &InProcessHost) {
    let object = object_class();
    host.register_class(object.clone());
    host.register_class(class_class(&object));
    for name in PRIMITIVES {
        host.register_class(HostClass::primitive(name));
    }
    host.register_class(string_class(&object));

    let number = number_class(&object);
    host.register_class(number.clone());
    for (wrapper, primitive) in WRAPPERS {
        let parent = if matches!(primitive, "boolean" | "char" | "void") {
            &object
        } else {
            &number
        };
        let mirror = host.class_mirror(&host.require(primitive));
        host.register_class(wrapper_class(wrapper, primitive, parent, mirror));
    }
    host.register_class(math_class(&object));

    host.register_class(throwable_class(&object));
    for (name, parent) in THROWABLES {
        let parent = host.require(parent);
        host.register_class(throwable_subclass(name, &parent));
    }

    host.register_class(loader_class(&object));
    host.register_class(class_list_class(host, &object));

    let collection = collection_interface();
    host.register_class(collection.clone());
    let list = list_interface(&collection);
    host.register_class(list.clone());
    host.register_class(array_list_class(&object, &list));
    let map = map_interface();
    host.register_class(map.clone());
    host.register_class(hash_map_class(&object, &map));
}

//==================================================
// Section 1.0 - Argument helpers
//==================================================

fn arg_ref<'a>(args: &'a [HostValue], index: usize) -> Result<&'a HostRef, Throw> {
    args.get(index)
        .and_then(HostValue::as_ref)
        .ok_or_else(|| Throw::bare("java.lang.NullPointerException"))
}

fn arg_string(env: &dyn HostEnv, args: &[HostValue], index: usize) -> Result<String, Throw> {
    let text = arg_ref(args, index)?;
    Ok(env.string_chars(text)?)
}

fn this<'a>(target: Option<&'a HostRef>) -> Result<&'a HostRef, Throw> {
    target.ok_or_else(|| Throw::bare("java.lang.NullPointerException"))
}

fn string_value(env: &dyn HostEnv, text: &str) -> HostValue {
    HostValue::Ref(env.new_string(text))
}

fn render_boxed(value: &HostValue) -> String {
    match value {
        HostValue::Boolean(v) => v.to_string(),
        HostValue::Byte(v) => v.to_string(),
        HostValue::Char(v) => char::from_u32(*v as u32).unwrap_or('\u{fffd}').to_string(),
        HostValue::Short(v) => v.to_string(),
        HostValue::Int(v) => v.to_string(),
        HostValue::Long(v) => v.to_string(),
        HostValue::Float(v) => format_float(*v as f64),
        HostValue::Double(v) => format_float(*v),
        HostValue::Null | HostValue::Void => "null".to_string(),
        HostValue::Ref(_) => "<ref>".to_string(),
    }
}

fn format_float(value: f64) -> String {
    if value.fract() == 0.0 && value.is_finite() {
        format!("{value:.1}")
    } else {
        value.to_string()
    }
}

/// Narrows a constructor argument to the wrapper's primitive.
fn narrow(primitive: &str, value: &HostValue) -> Result<HostValue, Throw> {
    let wrong = || Throw::new("java.lang.IllegalArgumentException", "argument type mismatch");
    Ok(match primitive {
        "boolean" => match value {
            HostValue::Boolean(v) => HostValue::Boolean(*v),
            _ => return Err(wrong()),
        },
        "char" => match value {
            HostValue::Char(v) => HostValue::Char(*v),
            _ => return Err(wrong()),
        },
        "byte" => HostValue::Byte(value.as_i64().ok_or_else(wrong)? as i8),
        "short" => HostValue::Short(value.as_i64().ok_or_else(wrong)? as i16),
        "int" => HostValue::Int(value.as_i64().ok_or_else(wrong)? as i32),
        "long" => HostValue::Long(value.as_i64().ok_or_else(wrong)?),
        "float" => HostValue::Float(value.as_f64().ok_or_else(wrong)? as f32),
        "double" => HostValue::Double(value.as_f64().ok_or_else(wrong)?),
        _ => return Err(wrong()),
    })
}

//==================================================
// Section 2.0 - java.lang core
//==================================================

fn object_class() -> ClassRef {
    ClassBuilder::new("java.lang.Object")
        .constructor(&[], |_, class, _| Ok(Payload::plain_for(class)))
        .method("toString", &[], "java.lang.String", |env, target, _| {
            let target = this(target)?;
            let rendered = format!("{}@{:x}", target.class().name(), target.identity());
            Ok(string_value(env, &rendered))
        })
        .method("equals", &["java.lang.Object"], "boolean", |_, target, args| {
            let target = this(target)?;
            let same = args
                .first()
                .and_then(HostValue::as_ref)
                .is_some_and(|other| other.identity() == target.identity());
            Ok(HostValue::Boolean(same))
        })
        .method("hashCode", &[], "int", |_, target, _| {
            Ok(HostValue::Int(this(target)?.identity() as i32))
        })
        .method("getClass", &[], "java.lang.Class", |env, target, _| {
            Ok(HostValue::Ref(env.class_mirror(this(target)?.class())))
        })
        .build()
}

fn class_class(object: &ClassRef) -> ClassRef {
    fn described(target: Option<&HostRef>) -> Result<ClassRef, Throw> {
        this(target)?
            .as_mirror()
            .cloned()
            .ok_or_else(|| Throw::bare("java.lang.ClassCastException"))
    }

    ClassBuilder::new("java.lang.Class")
        .extends(object)
        .method("getName", &[], "java.lang.String", |env, target, _| {
            Ok(string_value(env, described(target)?.name()))
        })
        .method("isArray", &[], "boolean", |_, target, _| {
            Ok(HostValue::Boolean(described(target)?.is_array()))
        })
        .method("toString", &[], "java.lang.String", |env, target, _| {
            let class = described(target)?;
            let rendered = if class.is_primitive() {
                class.name().to_string()
            } else if class.is_interface() {
                format!("interface {}", class.name())
            } else {
                format!("class {}", class.name())
            };
            Ok(string_value(env, &rendered))
        })
        .method("equals", &["java.lang.Object"], "boolean", |_, target, args| {
            let class = described(target)?;
            let same = args
                .first()
                .and_then(HostValue::as_ref)
                .and_then(|other| other.as_mirror())
                .is_some_and(|other| other.id() == class.id());
            Ok(HostValue::Boolean(same))
        })
        .build()
}

fn string_class(object: &ClassRef) -> ClassRef {
    fn text(env: &dyn HostEnv, target: Option<&HostRef>) -> Result<String, Throw> {
        Ok(env.string_chars(this(target)?)?)
    }

    ClassBuilder::new("java.lang.String")
        .extends(object)
        .constructor(&[], |_, _, _| Ok(Payload::Str(String::new())))
        .constructor(&["java.lang.String"], |env, _, args| {
            Ok(Payload::Str(arg_string(env, args, 0)?))
        })
        .method("length", &[], "int", |env, target, _| {
            Ok(HostValue::Int(text(env, target)?.chars().count() as i32))
        })
        .method("isEmpty", &[], "boolean", |env, target, _| {
            Ok(HostValue::Boolean(text(env, target)?.is_empty()))
        })
        .method("charAt", &["int"], "char", |env, target, args| {
            let index = args.first().and_then(HostValue::as_i64).unwrap_or(-1);
            let text = text(env, target)?;
            let found = usize::try_from(index).ok().and_then(|i| text.chars().nth(i));
            match found {
                Some(c) => Ok(HostValue::Char(c as u32 as u16)),
                None => Err(Throw::new(
                    "java.lang.IndexOutOfBoundsException",
                    format!("index {index}"),
                )),
            }
        })
        .method("toUpperCase", &[], "java.lang.String", |env, target, _| {
            Ok(string_value(env, &text(env, target)?.to_uppercase()))
        })
        .method("concat", &["java.lang.String"], "java.lang.String", |env, target, args| {
            let joined = text(env, target)? + &arg_string(env, args, 0)?;
            Ok(string_value(env, &joined))
        })
        .method("toString", &[], "java.lang.String", |_, target, _| {
            Ok(HostValue::Ref(this(target)?.clone()))
        })
        .method("equals", &["java.lang.Object"], "boolean", |_, target, args| {
            let mine = this(target)?.as_str();
            let theirs = args.first().and_then(HostValue::as_ref).and_then(|o| o.as_str());
            Ok(HostValue::Boolean(mine.is_some() && mine == theirs))
        })
        .build()
}

fn number_class(object: &ClassRef) -> ClassRef {
    fn boxed(target: Option<&HostRef>) -> Result<HostValue, Throw> {
        this(target)?
            .boxed()
            .cloned()
            .ok_or_else(|| Throw::bare("java.lang.ClassCastException"))
    }
    fn numeric(target: Option<&HostRef>, primitive: &str) -> Result<HostValue, Throw> {
        narrow(primitive, &boxed(target)?)
    }

    ClassBuilder::new("java.lang.Number")
        .extends(object)
        .method("byteValue", &[], "byte", |_, t, _| numeric(t, "byte"))
        .method("shortValue", &[], "short", |_, t, _| numeric(t, "short"))
        .method("intValue", &[], "int", |_, t, _| numeric(t, "int"))
        .method("longValue", &[], "long", |_, t, _| numeric(t, "long"))
        .method("floatValue", &[], "float", |_, t, _| numeric(t, "float"))
        .method("doubleValue", &[], "double", |_, t, _| numeric(t, "double"))
        .build()
}

fn wrapper_class(name: &str, primitive: &'static str, parent: &ClassRef, mirror: HostRef) -> ClassRef {
    let mut builder = ClassBuilder::new(name)
        .extends(parent)
        .static_field("TYPE", "java.lang.Class", HostValue::Ref(mirror));
    if primitive != "void" {
        builder = builder
            .constructor(&[primitive], move |_, _, args| {
                let value = args.first().cloned().unwrap_or_default();
                Ok(Payload::Boxed(narrow(primitive, &value)?))
            })
            .method("toString", &[], "java.lang.String", |env, target, _| {
                let value = this(target)?.boxed().cloned().unwrap_or_default();
                Ok(string_value(env, &render_boxed(&value)))
            })
            .method("equals", &["java.lang.Object"], "boolean", |_, target, args| {
                let target = this(target)?;
                let same = args
                    .first()
                    .and_then(HostValue::as_ref)
                    .filter(|other| other.class().id() == target.class().id())
                    .is_some_and(|other| {
                        format!("{:?}", other.boxed()) == format!("{:?}", target.boxed())
                    });
                Ok(HostValue::Boolean(same))
            });
    }
    let builder = match primitive {
        "boolean" => builder.method("booleanValue", &[], "boolean", |_, target, _| {
            narrow("boolean", this(target)?.boxed().unwrap_or(&HostValue::Void))
        }),
        "char" => builder.method("charValue", &[], "char", |_, target, _| {
            narrow("char", this(target)?.boxed().unwrap_or(&HostValue::Void))
        }),
        "int" => builder
            .static_method("parseInt", &["java.lang.String"], "int", |env, _, args| {
                let text = arg_string(env, args, 0)?;
                text.trim().parse::<i32>().map(HostValue::Int).map_err(|_| {
                    Throw::new(
                        "java.lang.NumberFormatException",
                        format!("For input string: \"{text}\""),
                    )
                })
            })
            .throws(&["java.lang.NumberFormatException"]),
        _ => builder,
    };
    builder.build()
}

fn math_class(object: &ClassRef) -> ClassRef {
    ClassBuilder::new("java.lang.Math")
        .extends(object)
        .static_method("max", &["int", "int"], "int", |_, _, args| {
            let a = args[0].as_i64().unwrap_or_default();
            let b = args[1].as_i64().unwrap_or_default();
            Ok(HostValue::Int(a.max(b) as i32))
        })
        .static_method("max", &["long", "long"], "long", |_, _, args| {
            let a = args[0].as_i64().unwrap_or_default();
            let b = args[1].as_i64().unwrap_or_default();
            Ok(HostValue::Long(a.max(b)))
        })
        .static_method("max", &["double", "double"], "double", |_, _, args| {
            let a = args[0].as_f64().unwrap_or_default();
            let b = args[1].as_f64().unwrap_or_default();
            Ok(HostValue::Double(a.max(b)))
        })
        .static_method("abs", &["int"], "int", |_, _, args| {
            Ok(HostValue::Int(args[0].as_i64().unwrap_or_default().abs() as i32))
        })
        .build()
}

//==================================================
// Section 3.0 - Throwables
//==================================================

fn throwable_class(object: &ClassRef) -> ClassRef {
    with_throwable_constructors(ClassBuilder::new("java.lang.Throwable").extends(object))
        .method("getMessage", &[], "java.lang.String", |env, target, _| {
            Ok(match this(target)?.throwable_message() {
                Some(message) => string_value(env, message),
                None => HostValue::Null,
            })
        })
        .method("getCause", &[], "java.lang.Throwable", |_, target, _| {
            Ok(HostValue::from_ref(this(target)?.throwable_cause().cloned()))
        })
        .method("toString", &[], "java.lang.String", |env, target, _| {
            let target = this(target)?;
            let rendered = match target.throwable_message() {
                Some(message) => format!("{}: {}", target.class().name(), message),
                None => target.class().name().to_string(),
            };
            Ok(string_value(env, &rendered))
        })
        .build()
}

fn throwable_subclass(name: &str, parent: &ClassRef) -> ClassRef {
    with_throwable_constructors(ClassBuilder::new(name).extends(parent)).build()
}

fn with_throwable_constructors(builder: ClassBuilder) -> ClassBuilder {
    builder
        .constructor(&[], |_, _, _| {
            Ok(Payload::Throwable {
                message: None,
                cause: None,
            })
        })
        .constructor(&["java.lang.String"], |env, _, args| {
            let message = match args.first().and_then(HostValue::as_ref) {
                Some(text) => Some(env.string_chars(text)?),
                None => None,
            };
            Ok(Payload::Throwable {
                message,
                cause: None,
            })
        })
        .constructor(&["java.lang.String", "java.lang.Throwable"], |env, _, args| {
            let message = match args.first().and_then(HostValue::as_ref) {
                Some(text) => Some(env.string_chars(text)?),
                None => None,
            };
            let cause = args.get(1).and_then(HostValue::as_ref).cloned();
            Ok(Payload::Throwable { message, cause })
        })
}

//==================================================
// Section 4.0 - Loading and enumeration
//==================================================

fn loader_class(object: &ClassRef) -> ClassRef {
    ClassBuilder::new("java.lang.ClassLoader")
        .extends(object)
        .method("loadClass", &["java.lang.String"], "java.lang.Class", |env, target, args| {
            let spec = this(target)?
                .native::<LoaderSpec>()
                .cloned()
                .ok_or_else(|| Throw::bare("java.lang.ClassCastException"))?;
            let name = arg_string(env, args, 0)?;
            match env.lookup_class(&name) {
                Some(class) if spec.permits(class.name()) => {
                    Ok(HostValue::Ref(env.class_mirror(&class)))
                }
                _ => Err(Throw::new("java.lang.ClassNotFoundException", name)),
            }
        })
        .throws(&["java.lang.ClassNotFoundException"])
        .build()
}

fn class_list_class(host: &InProcessHost, object: &ClassRef) -> ClassRef {
    let index = host.package_index();
    ClassBuilder::new(CLASS_LIST_CLASS)
        .extends(object)
        .static_method("get", &["java.lang.String"], "java.lang.String[]", move |env, _, args| {
            let package = arg_string(env, args, 0)?;
            let names: Vec<HostValue> = index
                .read()
                .get(&package)
                .map(|members| members.iter().map(|name| string_value(env, name)).collect())
                .unwrap_or_default();
            let string = env.find_class("java.lang.String")?;
            Ok(HostValue::Ref(env.new_array(&string, names)))
        })
        .build()
}

//==================================================
// Section 5.0 - java.util
//==================================================

type ListState = Mutex<Vec<HostValue>>;

fn collection_interface() -> ClassRef {
    ClassBuilder::new("java.util.Collection")
        .interface()
        .abstract_method("size", &[], "int")
        .abstract_method("isEmpty", &[], "boolean")
        .abstract_method("contains", &["java.lang.Object"], "boolean")
        .abstract_method("add", &["java.lang.Object"], "boolean")
        .build()
}

fn list_interface(collection: &ClassRef) -> ClassRef {
    ClassBuilder::new("java.util.List")
        .interface()
        .implements(collection)
        .abstract_method("get", &["int"], "java.lang.Object")
        .abstract_method("set", &["int", "java.lang.Object"], "java.lang.Object")
        .build()
}

fn map_interface() -> ClassRef {
    ClassBuilder::new("java.util.Map")
        .interface()
        .abstract_method("size", &[], "int")
        .abstract_method("isEmpty", &[], "boolean")
        .abstract_method("get", &["java.lang.Object"], "java.lang.Object")
        .abstract_method("put", &["java.lang.Object", "java.lang.Object"], "java.lang.Object")
        .abstract_method("containsKey", &["java.lang.Object"], "boolean")
        .abstract_method("remove", &["java.lang.Object"], "java.lang.Object")
        .build()
}

/// Host equality: `equals` for objects, identity of value for the rest.
fn same_value(env: &dyn HostEnv, a: &HostValue, b: &HostValue) -> Result<bool, Throw> {
    Ok(match (a, b) {
        (HostValue::Ref(a), HostValue::Ref(b)) => env.equals(a, b)?,
        (HostValue::Null | HostValue::Void, HostValue::Null | HostValue::Void) => true,
        (HostValue::Ref(_), _) | (_, HostValue::Ref(_)) => false,
        (a, b) => render_boxed(a) == render_boxed(b),
    })
}

fn render_item(env: &dyn HostEnv, item: &HostValue) -> Result<String, Throw> {
    Ok(match item {
        HostValue::Ref(object) => env.to_string(object)?,
        HostValue::Null | HostValue::Void => "null".to_string(),
        other => render_boxed(other),
    })
}

fn out_of_bounds(index: i64, size: usize) -> Throw {
    Throw::new(
        "java.lang.IndexOutOfBoundsException",
        format!("Index: {index}, Size: {size}"),
    )
}

fn array_list_class(object: &ClassRef, list: &ClassRef) -> ClassRef {
    fn state(target: Option<&HostRef>) -> Result<&ListState, Throw> {
        this(target)?
            .native::<ListState>()
            .ok_or_else(|| Throw::bare("java.lang.ClassCastException"))
    }

    ClassBuilder::new("java.util.ArrayList")
        .extends(object)
        .implements(list)
        .constructor(&[], |_, _, _| Ok(Payload::native(ListState::default())))
        .method("add", &["java.lang.Object"], "boolean", |_, target, args| {
            let value = args.first().cloned().unwrap_or(HostValue::Null);
            state(target)?.lock().push(value);
            Ok(HostValue::Boolean(true))
        })
        .method("get", &["int"], "java.lang.Object", |_, target, args| {
            let index = args.first().and_then(HostValue::as_i64).unwrap_or(-1);
            let items = state(target)?.lock();
            usize::try_from(index)
                .ok()
                .and_then(|i| items.get(i).cloned())
                .ok_or_else(|| out_of_bounds(index, items.len()))
        })
        .method("set", &["int", "java.lang.Object"], "java.lang.Object", |_, target, args| {
            let index = args.first().and_then(HostValue::as_i64).unwrap_or(-1);
            let value = args.get(1).cloned().unwrap_or(HostValue::Null);
            let mut items = state(target)?.lock();
            let size = items.len();
            let Some(at) = usize::try_from(index).ok().filter(|at| *at < size) else {
                return Err(out_of_bounds(index, size));
            };
            Ok(std::mem::replace(&mut items[at], value))
        })
        .method("contains", &["java.lang.Object"], "boolean", |env, target, args| {
            let wanted = args.first().cloned().unwrap_or(HostValue::Null);
            let items = state(target)?.lock().clone();
            for item in &items {
                if same_value(env, item, &wanted)? {
                    return Ok(HostValue::Boolean(true));
                }
            }
            Ok(HostValue::Boolean(false))
        })
        .method("size", &[], "int", |_, target, _| {
            Ok(HostValue::Int(state(target)?.lock().len() as i32))
        })
        .method("isEmpty", &[], "boolean", |_, target, _| {
            Ok(HostValue::Boolean(state(target)?.lock().is_empty()))
        })
        .method("toString", &[], "java.lang.String", |env, target, _| {
            let items = state(target)?.lock().clone();
            let mut rendered = Vec::with_capacity(items.len());
            for item in &items {
                rendered.push(render_item(env, item)?);
            }
            Ok(string_value(env, &format!("[{}]", rendered.join(", "))))
        })
        .build()
}

type MapState = Mutex<Vec<(HostValue, HostValue)>>;

fn hash_map_class(object: &ClassRef, map: &ClassRef) -> ClassRef {
    fn state(target: Option<&HostRef>) -> Result<&MapState, Throw> {
        this(target)?
            .native::<MapState>()
            .ok_or_else(|| Throw::bare("java.lang.ClassCastException"))
    }

    /// Slot of `key`, compared on a snapshot so `equals` runs unlocked.
    fn slot(env: &dyn HostEnv, target: Option<&HostRef>, key: &HostValue) -> Result<Option<usize>, Throw> {
        let entries = state(target)?.lock().clone();
        for (at, (candidate, _)) in entries.iter().enumerate() {
            if same_value(env, candidate, key)? {
                return Ok(Some(at));
            }
        }
        Ok(None)
    }

    fn key(args: &[HostValue]) -> HostValue {
        args.first().cloned().unwrap_or(HostValue::Null)
    }

    ClassBuilder::new("java.util.HashMap")
        .extends(object)
        .implements(map)
        .constructor(&[], |_, _, _| Ok(Payload::native(MapState::default())))
        .method("size", &[], "int", |_, target, _| {
            Ok(HostValue::Int(state(target)?.lock().len() as i32))
        })
        .method("isEmpty", &[], "boolean", |_, target, _| {
            Ok(HostValue::Boolean(state(target)?.lock().is_empty()))
        })
        .method("get", &["java.lang.Object"], "java.lang.Object", |env, target, args| {
            let found = slot(env, target, &key(args))?;
            let entries = state(target)?.lock();
            Ok(found
                .and_then(|at| entries.get(at))
                .map(|(_, value)| value.clone())
                .unwrap_or(HostValue::Null))
        })
        .method("containsKey", &["java.lang.Object"], "boolean", |env, target, args| {
            Ok(HostValue::Boolean(slot(env, target, &key(args))?.is_some()))
        })
        .method(
            "put",
            &["java.lang.Object", "java.lang.Object"],
            "java.lang.Object",
            |env, target, args| {
                let key = key(args);
                let value = args.get(1).cloned().unwrap_or(HostValue::Null);
                let found = slot(env, target, &key)?;
                let mut entries = state(target)?.lock();
                match found.filter(|at| *at < entries.len()) {
                    Some(at) => Ok(std::mem::replace(&mut entries[at].1, value)),
                    None => {
                        entries.push((key, value));
                        Ok(HostValue::Null)
                    }
                }
            },
        )
        .method("remove", &["java.lang.Object"], "java.lang.Object", |env, target, args| {
            let found = slot(env, target, &key(args))?;
            let mut entries = state(target)?.lock();
            match found.filter(|at| *at < entries.len()) {
                Some(at) => Ok(entries.remove(at).1),
                None => Ok(HostValue::Null),
            }
        })
        .method("toString", &[], "java.lang.String", |env, target, _| {
            let entries = state(target)?.lock().clone();
            let mut rendered = Vec::with_capacity(entries.len());
            for (key, value) in &entries {
                rendered.push(format!("{}={}", render_item(env, key)?, render_item(env, value)?));
            }
            Ok(string_value(env, &format!("{{{}}}", rendered.join(", "))))
        })
        .build()
}
