//! Structural WASM validation performed at publish time.
//!
//! The validator decides whether a task *could* execute: the module must be
//! a well-formed WASM v1 binary, the declared entry point must be a
//! user-visible function export, and the supplied argument vector must match
//! the function's arity and value-type signature. Actual execution happens
//! in the worker pool; nothing here runs guest code.
//!
//! The export list is recovered with a hand-rolled walk over the binary's
//! section layout so rejection messages can enumerate what *is* exported,
//! but the authoritative parameter-type list always comes from a full
//! wasmtime compilation of the module.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde_json::Value;
use wasmtime::{Engine, ExternType, Module, ValType};

use crate::error::ValidationError;

const WASM_MAGIC: [u8; 4] = [0x00, b'a', b's', b'm'];
const SUPPORTED_VERSION: u32 = 1;
const EXPORT_SECTION_ID: u8 = 7;
const EXPORT_KIND_FUNC: u8 = 0;

/// Exports injected by language runtimes rather than the task author.
const INTERNAL_NAMES: [&str; 4] = [
    "_start",
    "__wasm_call_ctors",
    "__wasm_apply_data_relocs",
    "__wasm_init_memory",
];
const INTERNAL_PREFIXES: [&str; 2] = ["runtime.", "__"];

/// Validate a published task against its module's call contract.
///
/// Deterministic for identical inputs; the compilation arena is dropped on
/// every exit path.
pub fn validate_task(
    wasm_module_base64: &str,
    func: &str,
    args: &Value,
) -> Result<(), ValidationError> {
    let wasm_bytes = BASE64
        .decode(wasm_module_base64)
        .map_err(|err| ValidationError::InvalidBase64(err.to_string()))?;

    let exports = parse_function_exports(&wasm_bytes)?;
    let available = filter_user_exports(&exports);
    if !available.iter().any(|name| name == func) {
        return Err(ValidationError::FunctionNotExported {
            func: func.to_string(),
            available,
        });
    }

    let params = resolve_param_types(&wasm_bytes, func, available)?;
    check_args(&params, args)
}

/// Walk the section layout and collect function export names in wire order.
///
/// Only the header and the export section are interpreted; every other
/// section is skipped by its declared size. Truncated or malformed entries
/// end the walk rather than erroring, matching a permissive streaming read.
fn parse_function_exports(wasm_bytes: &[u8]) -> Result<Vec<String>, ValidationError> {
    if wasm_bytes.len() < 8 {
        return Err(ValidationError::InvalidWasm(
            "binary too short for a WASM header".into(),
        ));
    }
    if wasm_bytes[0..4] != WASM_MAGIC {
        return Err(ValidationError::InvalidWasm("bad magic number".into()));
    }
    let version = u32::from_le_bytes([wasm_bytes[4], wasm_bytes[5], wasm_bytes[6], wasm_bytes[7]]);
    if version != SUPPORTED_VERSION {
        return Err(ValidationError::InvalidWasm(format!(
            "unsupported WASM version: {}",
            version
        )));
    }

    let mut exports = Vec::new();
    let mut pos = 8usize;

    while pos < wasm_bytes.len() {
        let section_id = wasm_bytes[pos];
        pos += 1;

        let Some((size, read)) = read_uleb128(&wasm_bytes[pos..]) else {
            break;
        };
        pos += read;

        if section_id != EXPORT_SECTION_ID {
            match pos.checked_add(size as usize) {
                Some(next) if next <= wasm_bytes.len() => pos = next,
                _ => break,
            }
            continue;
        }

        let Some((count, read)) = read_uleb128(&wasm_bytes[pos..]) else {
            break;
        };
        pos += read;

        for _ in 0..count {
            let Some((name_len, read)) = read_uleb128(&wasm_bytes[pos..]) else {
                break;
            };
            pos += read;

            let Some(name_end) = pos.checked_add(name_len as usize) else {
                break;
            };
            if name_end > wasm_bytes.len() {
                break;
            }
            let name = String::from_utf8_lossy(&wasm_bytes[pos..name_end]).into_owned();
            pos = name_end;

            if pos >= wasm_bytes.len() {
                break;
            }
            let kind = wasm_bytes[pos];
            pos += 1;

            let Some((_index, read)) = read_uleb128(&wasm_bytes[pos..]) else {
                break;
            };
            pos += read;

            if kind == EXPORT_KIND_FUNC {
                exports.push(name);
            }
        }
        break;
    }

    Ok(exports)
}

/// Decode one unsigned LEB128 value; `None` on truncation or overflow.
fn read_uleb128(data: &[u8]) -> Option<(u64, usize)> {
    let mut result = 0u64;
    let mut shift = 0u32;
    let mut read = 0usize;

    for &byte in data {
        read += 1;
        result |= u64::from(byte & 0x7f) << shift;
        if byte & 0x80 == 0 {
            return Some((result, read));
        }
        shift += 7;
        if shift >= 64 {
            return None;
        }
    }

    None
}

/// Drop runtime-internal exports so callers only ever see task entry points.
fn filter_user_exports(all_exports: &[String]) -> Vec<String> {
    all_exports
        .iter()
        .filter(|name| !INTERNAL_NAMES.contains(&name.as_str()))
        .filter(|name| !INTERNAL_PREFIXES.iter().any(|p| name.starts_with(p)))
        .cloned()
        .collect()
}

/// Compile the module and resolve the entry function's parameter types.
///
/// Compilation is the single source of truth for arity and value types; the
/// section walk above only feeds error messages.
fn resolve_param_types(
    wasm_bytes: &[u8],
    func: &str,
    available: Vec<String>,
) -> Result<Vec<ValType>, ValidationError> {
    let engine = Engine::default();
    let module = Module::new(&engine, wasm_bytes)
        .map_err(|err| ValidationError::InvalidWasm(err.to_string()))?;

    let export = module
        .exports()
        .find(|export| export.name() == func)
        .map(|export| export.ty());

    match export {
        Some(ExternType::Func(func_ty)) => Ok(func_ty.params().collect()),
        _ => Err(ValidationError::FunctionNotExported {
            func: func.to_string(),
            available,
        }),
    }
}

/// Coerce the schema-less argument value into an ordered scalar sequence.
///
/// `null` is the empty sequence, an array is taken as-is, and any other
/// shape is treated as a single argument.
fn coerce_args(args: &Value) -> Vec<Value> {
    match args {
        Value::Null => Vec::new(),
        Value::Array(items) => items.clone(),
        other => vec![other.clone()],
    }
}

fn check_args(params: &[ValType], args: &Value) -> Result<(), ValidationError> {
    let args = coerce_args(args);

    if params.len() != args.len() {
        return Err(ValidationError::InvalidFunctionArgs(format!(
            "expected {} parameters, got {}",
            params.len(),
            args.len()
        )));
    }

    for (index, (param, arg)) in params.iter().zip(args.iter()).enumerate() {
        check_scalar(arg, param)
            .map_err(|reason| {
                ValidationError::InvalidFunctionArgs(format!("parameter {}: {}", index, reason))
            })?;
    }

    Ok(())
}

/// Check one argument against one WASM value type.
///
/// Integers accept any JSON number or an integer-valued string; floats
/// accept any JSON number or a float-valued string.
fn check_scalar(arg: &Value, expected: &ValType) -> Result<(), String> {
    match expected {
        ValType::I32 | ValType::I64 => match arg {
            Value::Number(_) => Ok(()),
            Value::String(text) => text
                .parse::<i64>()
                .map(|_| ())
                .map_err(|_| format!("cannot convert string {:?} to {}", text, type_name(expected))),
            other => Err(format!(
                "cannot convert {} to {}",
                json_kind(other),
                type_name(expected)
            )),
        },
        ValType::F32 | ValType::F64 => match arg {
            Value::Number(_) => Ok(()),
            Value::String(text) => text
                .parse::<f64>()
                .map(|_| ())
                .map_err(|_| format!("cannot convert string {:?} to {}", text, type_name(expected))),
            other => Err(format!(
                "cannot convert {} to {}",
                json_kind(other),
                type_name(expected)
            )),
        },
        other => Err(format!("unsupported WASM value type: {}", other)),
    }
}

fn type_name(ty: &ValType) -> &'static str {
    match ty {
        ValType::I32 => "i32",
        ValType::I64 => "i64",
        ValType::F32 => "f32",
        ValType::F64 => "f64",
        _ => "unsupported",
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn header(version: u32) -> Vec<u8> {
        let mut bytes = WASM_MAGIC.to_vec();
        bytes.extend_from_slice(&version.to_le_bytes());
        bytes
    }

    /// Hand-assemble an export section declaring the given function names.
    fn export_section(names: &[&str]) -> Vec<u8> {
        let mut payload = vec![names.len() as u8];
        for (index, name) in names.iter().enumerate() {
            payload.push(name.len() as u8);
            payload.extend_from_slice(name.as_bytes());
            payload.push(EXPORT_KIND_FUNC);
            payload.push(index as u8);
        }
        let mut section = vec![EXPORT_SECTION_ID, payload.len() as u8];
        section.extend_from_slice(&payload);
        section
    }

    #[test]
    fn uleb128_single_and_multi_byte() {
        assert_eq!(read_uleb128(&[0x00]), Some((0, 1)));
        assert_eq!(read_uleb128(&[0x7f]), Some((127, 1)));
        assert_eq!(read_uleb128(&[0x80, 0x01]), Some((128, 2)));
        assert_eq!(read_uleb128(&[0xe5, 0x8e, 0x26]), Some((624485, 3)));
    }

    #[test]
    fn uleb128_rejects_truncation_and_overflow() {
        assert_eq!(read_uleb128(&[]), None);
        assert_eq!(read_uleb128(&[0x80]), None);
        // 10 continuation bytes push shift past 64 bits.
        assert_eq!(read_uleb128(&[0x80; 10]), None);
    }

    #[test]
    fn rejects_short_binary_and_bad_magic() {
        assert!(matches!(
            parse_function_exports(&[0x00, 0x61]),
            Err(ValidationError::InvalidWasm(_))
        ));
        assert!(matches!(
            parse_function_exports(&[0xde, 0xad, 0xbe, 0xef, 1, 0, 0, 0]),
            Err(ValidationError::InvalidWasm(_))
        ));
    }

    #[test]
    fn rejects_unsupported_version() {
        let err = parse_function_exports(&header(2)).unwrap_err();
        assert!(err.to_string().contains("unsupported WASM version: 2"));
    }

    #[test]
    fn collects_function_exports_in_wire_order() {
        let mut bytes = header(1);
        bytes.extend_from_slice(&export_section(&["add", "mul", "sub"]));
        let exports = parse_function_exports(&bytes).unwrap();
        assert_eq!(exports, vec!["add", "mul", "sub"]);
    }

    #[test]
    fn skips_non_function_exports() {
        let mut bytes = header(1);
        // One memory export (kind 2) followed by one function export.
        let payload = [2u8, 3, b'm', b'e', b'm', 2, 0, 3, b'a', b'd', b'd', 0, 0];
        bytes.push(EXPORT_SECTION_ID);
        bytes.push(payload.len() as u8);
        bytes.extend_from_slice(&payload);

        let exports = parse_function_exports(&bytes).unwrap();
        assert_eq!(exports, vec!["add"]);
    }

    #[test]
    fn skips_unknown_sections_by_size() {
        let mut bytes = header(1);
        // Custom section (id 0) of 3 opaque bytes, then the export section.
        bytes.extend_from_slice(&[0, 3, 0xaa, 0xbb, 0xcc]);
        bytes.extend_from_slice(&export_section(&["add"]));
        assert_eq!(parse_function_exports(&bytes).unwrap(), vec!["add"]);
    }

    #[test]
    fn truncated_export_section_yields_partial_list() {
        let mut bytes = header(1);
        let mut section = export_section(&["add"]);
        // Claim two entries but provide one.
        section[2] = 2;
        bytes.extend_from_slice(&section);
        assert_eq!(parse_function_exports(&bytes).unwrap(), vec!["add"]);
    }

    #[test]
    fn filters_runtime_internal_exports() {
        let exports: Vec<String> = [
            "add",
            "_start",
            "__wasm_call_ctors",
            "__wasm_apply_data_relocs",
            "__wasm_init_memory",
            "__internal_helper",
            "runtime.alloc",
            "mul",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();

        assert_eq!(filter_user_exports(&exports), vec!["add", "mul"]);
    }

    #[test]
    fn coerces_null_array_and_scalar_shapes() {
        assert!(coerce_args(&Value::Null).is_empty());
        assert_eq!(coerce_args(&json!([1, 2])).len(), 2);
        assert_eq!(coerce_args(&json!(7)).len(), 1);
        assert_eq!(coerce_args(&json!({"a": 1})).len(), 1);
    }

    #[test]
    fn scalar_checks_follow_numeric_string_rules() {
        assert!(check_scalar(&json!(42), &ValType::I32).is_ok());
        assert!(check_scalar(&json!(2.5), &ValType::I32).is_ok());
        assert!(check_scalar(&json!("42"), &ValType::I32).is_ok());
        assert!(check_scalar(&json!("2.5"), &ValType::I32).is_err());
        assert!(check_scalar(&json!("2.5"), &ValType::F64).is_ok());
        assert!(check_scalar(&json!("abc"), &ValType::F64).is_err());
        assert!(check_scalar(&json!(true), &ValType::I64).is_err());
        assert!(check_scalar(&json!([1]), &ValType::F32).is_err());
    }

    #[test]
    fn arity_mismatch_is_reported_with_counts() {
        let err = check_args(&[ValType::I32, ValType::I32], &json!([1])).unwrap_err();
        assert!(err.to_string().contains("expected 2 parameters, got 1"));
    }

    #[test]
    fn invalid_base64_is_rejected_before_parsing() {
        let err = validate_task("not-base64!!!", "add", &Value::Null).unwrap_err();
        assert!(matches!(err, ValidationError::InvalidBase64(_)));
    }
}
