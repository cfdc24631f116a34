//! Value marshaling between the host and the runtime
//!
//! Conversion dispatches on the `Value` tag only. Records recurse with a depth
//! bound, so a pathological host structure fails with `CyclicValue` instead of
//! looping. Runtime objects that have no lossless host shape (attributes,
//! unnamed lists, opaque payloads) fail with `UnrepresentableType`.

use crate::errors::BridgeError;
use crate::robject::{RData, RObject};
use crate::value::{Value, Vector};
use indexmap::IndexMap;
use std::collections::HashSet;

/// Largest magnitude below which every integral double prints exactly
const EXACT_INTEGER_LIMIT: f64 = 9_007_199_254_740_992.0;

/// Marshal a host value into its runtime representation
pub fn to_embedded(value: &Value, max_depth: usize) -> Result<RObject, BridgeError> {
    to_embedded_at(value, 0, max_depth)
}

fn to_embedded_at(value: &Value, depth: usize, max_depth: usize) -> Result<RObject, BridgeError> {
    let object = match value {
        Value::Null => RObject::null(),
        Value::Bool(b) => RObject::logical(vec![*b]),
        Value::Number(n) => RObject::double(vec![*n]),
        Value::Text(s) => RObject::character(vec![checked_string(s)?]),
        Value::Vector(Vector::Numeric(v)) => RObject::double(v.clone()),
        Value::Vector(Vector::Logical(v)) => RObject::logical(v.clone()),
        Value::Vector(Vector::Character(v)) => RObject::character(
            v.iter()
                .map(|s| checked_string(s))
                .collect::<Result<_, _>>()?,
        ),
        Value::Record(fields) => {
            if depth >= max_depth {
                return Err(BridgeError::CyclicValue { depth: max_depth });
            }
            let mut names = Vec::with_capacity(fields.len());
            let mut values = Vec::with_capacity(fields.len());
            for (name, field) in fields {
                if name.is_empty() {
                    return Err(BridgeError::UnrepresentableType(
                        "record field with an empty name".to_string(),
                    ));
                }
                names.push(checked_string(name)?);
                values.push(to_embedded_at(field, depth + 1, max_depth)?);
            }
            RObject::list(values, Some(names))
        }
        Value::Opaque(class) => {
            return Err(BridgeError::UnrepresentableType(format!(
                "opaque {} values cannot be sent back to R",
                class
            )));
        }
    };
    Ok(object)
}

fn checked_string(s: &str) -> Result<String, BridgeError> {
    if s.contains('\0') {
        return Err(BridgeError::UnrepresentableType(
            "R strings cannot contain NUL".to_string(),
        ));
    }
    Ok(s.to_string())
}

/// Marshal a runtime object into an independent host value
pub fn from_embedded(object: &RObject, max_depth: usize) -> Result<Value, BridgeError> {
    from_embedded_at(object, 0, max_depth)
}

fn unrepresentable(object: &RObject) -> BridgeError {
    BridgeError::UnrepresentableType(format!(
        "R object of class '{}' has no lossless host representation",
        object.class_name()
    ))
}

fn from_embedded_at(object: &RObject, depth: usize, max_depth: usize) -> Result<Value, BridgeError> {
    if object.attrs.dim.is_some() {
        return Err(unrepresentable(object));
    }
    let is_atomic = matches!(
        object.data,
        RData::Logical(_) | RData::Double(_) | RData::Character(_)
    );
    if is_atomic && object.attrs.names.is_some() {
        return Err(unrepresentable(object));
    }

    let value = match &object.data {
        RData::Null => Value::Null,
        RData::Logical(v) => match v.as_slice() {
            [b] => Value::Bool(*b),
            _ => Value::Vector(Vector::Logical(v.clone())),
        },
        RData::Double(v) => match v.as_slice() {
            [n] => Value::Number(*n),
            _ => Value::Vector(Vector::Numeric(v.clone())),
        },
        RData::Character(v) => match v.as_slice() {
            [s] => Value::Text(s.clone()),
            _ => Value::Vector(Vector::Character(v.clone())),
        },
        RData::List(items) => {
            let Some(names) = object.attrs.names.as_ref() else {
                return Err(unrepresentable(object));
            };
            let mut seen = HashSet::with_capacity(names.len());
            if names.len() != items.len()
                || names.iter().any(|n| n.is_empty() || !seen.insert(n.as_str()))
            {
                return Err(unrepresentable(object));
            }
            if depth >= max_depth {
                return Err(BridgeError::CyclicValue { depth: max_depth });
            }
            let mut record = IndexMap::with_capacity(items.len());
            for (name, item) in names.iter().zip(items) {
                record.insert(name.clone(), from_embedded_at(item, depth + 1, max_depth)?);
            }
            Value::Record(record)
        }
        RData::Opaque(_) => return Err(unrepresentable(object)),
    };
    Ok(value)
}

/// Render a runtime object as R source that evaluates to an identical object
///
/// Strings are ASCII-escaped (`\u{..}` for anything else) and non-integral
/// doubles use hexadecimal float literals, so the text is bit exact.
pub fn to_r_source(object: &RObject) -> Result<String, BridgeError> {
    let base = match &object.data {
        RData::Null => "NULL".to_string(),
        RData::Logical(v) => atomic_source("logical", v, |b| {
            let literal = if *b { "TRUE" } else { "FALSE" };
            literal.to_string()
        }),
        RData::Double(v) => atomic_source("numeric", v, |n| r_double_literal(*n)),
        RData::Character(v) => atomic_source("character", v, |s| r_string_literal(s)),
        RData::List(items) => {
            let parts = items
                .iter()
                .map(to_r_source)
                .collect::<Result<Vec<_>, _>>()?;
            format!("list({})", parts.join(", "))
        }
        RData::Opaque(_) => return Err(unrepresentable(object)),
    };

    if object.attrs.is_empty() {
        return Ok(base);
    }
    let mut source = format!("structure({}", base);
    if let Some(names) = &object.attrs.names {
        let names: Vec<String> = names.iter().map(|n| r_string_literal(n)).collect();
        source.push_str(&format!(", names = {}", combine("character", &names)));
    }
    if let Some(dim) = &object.attrs.dim {
        let dim: Vec<String> = dim.iter().map(|d| format!("{}L", d)).collect();
        source.push_str(&format!(", dim = {}", combine("integer", &dim)));
    }
    source.push(')');
    Ok(source)
}

fn atomic_source<T>(empty: &str, values: &[T], render: impl Fn(&T) -> String) -> String {
    let parts: Vec<String> = values.iter().map(render).collect();
    combine(empty, &parts)
}

fn combine(empty: &str, parts: &[String]) -> String {
    match parts {
        [] => format!("{}(0)", empty),
        [single] => single.clone(),
        _ => format!("c({})", parts.join(", ")),
    }
}

/// Escape a string as a double-quoted R literal
pub fn r_string_literal(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            ' '..='~' => out.push(c),
            c if (c as u32) <= 0xffff => out.push_str(&format!("\\u{{{:04x}}}", c as u32)),
            c => out.push_str(&format!("\\U{{{:08x}}}", c as u32)),
        }
    }
    out.push('"');
    out
}

/// Render a double so that R parses back the identical bit pattern
pub fn r_double_literal(x: f64) -> String {
    if x.is_nan() {
        return "NaN".to_string();
    }
    if x.is_infinite() {
        return if x > 0.0 { "Inf" } else { "-Inf" }.to_string();
    }
    if x == 0.0 && x.is_sign_negative() {
        return "-0".to_string();
    }
    if x.fract() == 0.0 && x.abs() < EXACT_INTEGER_LIMIT {
        return format!("{}", x as i64);
    }
    hex_float(x)
}

fn hex_float(x: f64) -> String {
    let bits = x.to_bits();
    let sign = if bits >> 63 == 1 { "-" } else { "" };
    let exponent = ((bits >> 52) & 0x7ff) as i64;
    let mantissa = bits & 0x000f_ffff_ffff_ffff;
    if exponent == 0 {
        // Subnormal
        format!("{}0x0.{:013x}p-1022", sign, mantissa)
    } else {
        format!("{}0x1.{:013x}p{}", sign, mantissa, exponent - 1023)
    }
}
