//! Demo standard-library modules (spec.md §6, SPEC_FULL.md §F): `math`,
//! `string`, `array`, and `json`, built on the [`mycel::native_fn`] ABI the
//! same way any embedder's own libraries would be. These exist to exercise
//! the ABI end to end, not to be a complete stdlib (SPEC_FULL.md explicitly
//! leaves "a full standard library" out of scope).

use mycel::errors::{ErrorCode, ErrorInfo};
use mycel::heap::{Heap, HeapData};
use mycel::native_fn::{BuiltinFunction, Library};
use mycel::value::Value;

pub fn demo_libraries() -> Vec<Library> {
    vec![math_library(), string_library(), array_library(), json_library()]
}

fn type_error(expected: &str, got: &Value, heap: &Heap) -> ErrorInfo {
    ErrorInfo::new(
        ErrorCode::TypeMismatch,
        format!("expected {expected}, got {}", got.type_name(heap)),
        Default::default(),
    )
}

fn as_number(v: &Value, heap: &Heap) -> Result<f64, ErrorInfo> {
    match v {
        Value::Number(n) => Ok(*n),
        other => Err(type_error("Number", other, heap)),
    }
}

fn as_str(v: &Value, heap: &Heap) -> Result<std::rc::Rc<str>, ErrorInfo> {
    match v {
        Value::Str(s) => Ok(s.clone()),
        other => Err(type_error("String", other, heap)),
    }
}

fn math_library() -> Library {
    let mut lib = Library::new("math");
    lib.register(BuiltinFunction::new("sqrt", Some(1), |args, heap| Ok(Value::Number(as_number(&args[0], heap)?.sqrt()))));
    lib.register(BuiltinFunction::new("abs", Some(1), |args, heap| Ok(Value::Number(as_number(&args[0], heap)?.abs()))));
    lib.register(BuiltinFunction::new("floor", Some(1), |args, heap| Ok(Value::Number(as_number(&args[0], heap)?.floor()))));
    lib.register(BuiltinFunction::new("ceil", Some(1), |args, heap| Ok(Value::Number(as_number(&args[0], heap)?.ceil()))));
    lib.register(BuiltinFunction::new("round", Some(1), |args, heap| Ok(Value::Number(as_number(&args[0], heap)?.round()))));
    lib.register(BuiltinFunction::new("pow", Some(2), |args, heap| {
        Ok(Value::Number(as_number(&args[0], heap)?.powf(as_number(&args[1], heap)?)))
    }));
    lib.register(BuiltinFunction::new("min", Some(2), |args, heap| {
        Ok(Value::Number(as_number(&args[0], heap)?.min(as_number(&args[1], heap)?)))
    }));
    lib.register(BuiltinFunction::new("max", Some(2), |args, heap| {
        Ok(Value::Number(as_number(&args[0], heap)?.max(as_number(&args[1], heap)?)))
    }));
    lib
}

fn string_library() -> Library {
    let mut lib = Library::new("string");
    lib.register(BuiltinFunction::new("len", Some(1), |args, heap| {
        Ok(Value::Number(as_str(&args[0], heap)?.chars().count() as f64))
    }));
    lib.register(BuiltinFunction::new("upper", Some(1), |args, heap| Ok(Value::Str(as_str(&args[0], heap)?.to_uppercase().into()))));
    lib.register(BuiltinFunction::new("lower", Some(1), |args, heap| Ok(Value::Str(as_str(&args[0], heap)?.to_lowercase().into()))));
    lib.register(BuiltinFunction::new("trim", Some(1), |args, heap| Ok(Value::Str(as_str(&args[0], heap)?.trim().into()))));
    lib.register(BuiltinFunction::new("contains", Some(2), |args, heap| {
        Ok(Value::Bool(as_str(&args[0], heap)?.contains(as_str(&args[1], heap)?.as_ref())))
    }));
    lib.register(BuiltinFunction::new("split", Some(2), |args, heap| {
        let s = as_str(&args[0], heap)?;
        let sep = as_str(&args[1], heap)?;
        let parts: Vec<Value> = if sep.is_empty() {
            s.chars().map(|c| Value::Str(c.to_string().into())).collect()
        } else {
            s.split(sep.as_ref()).map(|p| Value::Str(p.into())).collect()
        };
        Ok(Value::Array(heap.alloc(HeapData::Array(parts))))
    }));
    lib
}

fn array_library() -> Library {
    let mut lib = Library::new("array");
    lib.register(BuiltinFunction::new("len", Some(1), |args, heap| match &args[0] {
        Value::Array(id) => match heap.get(*id) {
            Some(HeapData::Array(items)) => Ok(Value::Number(items.len() as f64)),
            _ => Err(type_error("Array", &args[0], heap)),
        },
        other => Err(type_error("Array", other, heap)),
    }));
    lib.register(BuiltinFunction::new("push", Some(2), |args, heap| {
        let Value::Array(id) = &args[0] else { return Err(type_error("Array", &args[0], heap)) };
        let Some(HeapData::Array(items)) = heap.get(*id) else { return Err(type_error("Array", &args[0], heap)) };
        let mut items = items.clone();
        items.push(args[1].clone());
        Ok(Value::Array(heap.alloc(HeapData::Array(items))))
    }));
    lib.register(BuiltinFunction::new("join", Some(2), |args, heap| {
        let Value::Array(id) = &args[0] else { return Err(type_error("Array", &args[0], heap)) };
        let Some(HeapData::Array(items)) = heap.get(*id) else { return Err(type_error("Array", &args[0], heap)) };
        let sep = as_str(&args[1], heap)?;
        let parts: Vec<String> = items.iter().map(|v| v.to_display_string(heap)).collect();
        Ok(Value::Str(parts.join(sep.as_ref()).into()))
    }));
    lib.register(BuiltinFunction::new("sort", Some(1), |args, heap| {
        let Value::Array(id) = &args[0] else { return Err(type_error("Array", &args[0], heap)) };
        let Some(HeapData::Array(items)) = heap.get(*id) else { return Err(type_error("Array", &args[0], heap)) };
        let mut sorted = items.clone();
        sorted.sort_by(|a, b| match (a, b) {
            (Value::Number(x), Value::Number(y)) => x.total_cmp(y),
            (Value::Str(x), Value::Str(y)) => x.cmp(y),
            _ => std::cmp::Ordering::Equal,
        });
        Ok(Value::Array(heap.alloc(HeapData::Array(sorted))))
    }));
    lib
}

fn json_library() -> Library {
    let mut lib = Library::new("json");
    lib.register(BuiltinFunction::new("parse", Some(1), |args, heap| {
        let s = as_str(&args[0], heap)?;
        let parsed: serde_json::Value = serde_json::from_str(&s)
            .map_err(|e| ErrorInfo::new(ErrorCode::SemanticInvalidOperation, format!("invalid JSON: {e}"), Default::default()))?;
        Ok(json_to_value(&parsed, heap))
    }));
    lib.register(BuiltinFunction::new("stringify", Some(1), |args, heap| {
        let json = value_to_json(&args[0], heap);
        Ok(Value::Str(json.to_string().into()))
    }));
    lib
}

fn json_to_value(json: &serde_json::Value, heap: &mut Heap) -> Value {
    match json {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(b) => Value::Bool(*b),
        serde_json::Value::Number(n) => Value::Number(n.as_f64().unwrap_or(f64::NAN)),
        serde_json::Value::String(s) => Value::Str(s.as_str().into()),
        serde_json::Value::Array(items) => {
            let values: Vec<Value> = items.iter().map(|v| json_to_value(v, heap)).collect();
            Value::Array(heap.alloc(HeapData::Array(values)))
        }
        serde_json::Value::Object(map) => {
            let properties: Vec<(String, Value)> = map.iter().map(|(k, v)| (k.clone(), json_to_value(v, heap))).collect();
            Value::Object(heap.alloc(HeapData::Object(mycel::heap::ObjectData { properties })))
        }
    }
}

fn value_to_json(value: &Value, heap: &Heap) -> serde_json::Value {
    match value {
        Value::Null => serde_json::Value::Null,
        Value::Bool(b) => serde_json::Value::Bool(*b),
        Value::Number(n) => serde_json::Number::from_f64(*n).map_or(serde_json::Value::Null, serde_json::Value::Number),
        Value::Str(s) => serde_json::Value::String(s.to_string()),
        Value::Array(id) => match heap.get(*id) {
            Some(HeapData::Array(items)) => serde_json::Value::Array(items.iter().map(|v| value_to_json(v, heap)).collect()),
            _ => serde_json::Value::Null,
        },
        Value::Object(id) => match heap.get(*id) {
            Some(HeapData::Object(obj)) => {
                serde_json::Value::Object(obj.properties.iter().map(|(k, v)| (k.clone(), value_to_json(v, heap))).collect())
            }
            _ => serde_json::Value::Null,
        },
        _ => serde_json::Value::Null,
    }
}
