//! Validator acceptance and rejection matrix over real WASM binaries.

use serde_json::{json, Value};
use wasmq::{validate_task, ValidationError};
use wasmq_testkit::{
    add_i32_module, const_i32_module, internal_only_module, module_base64, mul_f64_module,
    unsupported_version_module,
};

#[test]
fn accepts_matching_integer_args() {
    let module = module_base64(&add_i32_module());
    validate_task(&module, "add", &json!([2, 3])).unwrap();
}

#[test]
fn accepts_integer_valued_strings_for_int_params() {
    let module = module_base64(&add_i32_module());
    validate_task(&module, "add", &json!(["2", "3"])).unwrap();
}

#[test]
fn accepts_any_number_for_int_params() {
    // Numbers are accepted wholesale for integer parameters; only string
    // arguments are narrowed by their literal shape.
    let module = module_base64(&add_i32_module());
    validate_task(&module, "add", &json!([2.5, 3])).unwrap();
}

#[test]
fn rejects_float_valued_strings_for_int_params() {
    let module = module_base64(&add_i32_module());
    let err = validate_task(&module, "add", &json!(["2.5", "3"])).unwrap_err();
    assert!(matches!(err, ValidationError::InvalidFunctionArgs(_)));
    assert!(err.to_string().contains("parameter 0"));
}

#[test]
fn float_params_accept_ints_floats_and_float_strings() {
    let module = module_base64(&mul_f64_module());
    validate_task(&module, "mul", &json!([2, 3])).unwrap();
    validate_task(&module, "mul", &json!([2.5, 3.5])).unwrap();
    validate_task(&module, "mul", &json!(["2.5", "3"])).unwrap();

    let err = validate_task(&module, "mul", &json!(["abc", 1.0])).unwrap_err();
    assert!(matches!(err, ValidationError::InvalidFunctionArgs(_)));
}

#[test]
fn rejects_non_numeric_argument_kinds() {
    let module = module_base64(&add_i32_module());
    for bad in [json!([true, 1]), json!([[1], 2]), json!([{"v": 1}, 2])] {
        let err = validate_task(&module, "add", &bad).unwrap_err();
        assert!(matches!(err, ValidationError::InvalidFunctionArgs(_)));
    }
}

#[test]
fn arity_mismatch_reports_counts() {
    let module = module_base64(&add_i32_module());
    let err = validate_task(&module, "add", &json!([1])).unwrap_err();
    assert!(err.to_string().contains("expected 2 parameters, got 1"));

    let err = validate_task(&module, "add", &Value::Null).unwrap_err();
    assert!(err.to_string().contains("expected 2 parameters, got 0"));
}

#[test]
fn zero_arity_accepts_null_and_empty_array() {
    let module = module_base64(&const_i32_module("answer"));
    validate_task(&module, "answer", &Value::Null).unwrap();
    validate_task(&module, "answer", &json!([])).unwrap();

    let err = validate_task(&module, "answer", &json!([1])).unwrap_err();
    assert!(err.to_string().contains("expected 0 parameters, got 1"));
}

#[test]
fn non_array_args_are_treated_as_a_single_argument() {
    let module = module_base64(&add_i32_module());
    // An object marshals to one argument, so a two-parameter function
    // rejects it on arity.
    let err = validate_task(&module, "add", &json!({"a": 1})).unwrap_err();
    assert!(err.to_string().contains("expected 2 parameters, got 1"));
}

#[test]
fn missing_export_lists_available_functions() {
    let module = module_base64(&add_i32_module());
    let err = validate_task(&module, "frob", &Value::Null).unwrap_err();

    match err {
        ValidationError::FunctionNotExported { func, available } => {
            assert_eq!(func, "frob");
            assert_eq!(available, vec!["add"]);
        }
        other => panic!("expected FunctionNotExported, got {other:?}"),
    }
}

#[test]
fn runtime_internal_exports_are_not_callable() {
    let module = module_base64(&internal_only_module());

    for name in ["_start", "__wasm_call_ctors", "main"] {
        let err = validate_task(&module, name, &Value::Null).unwrap_err();
        match err {
            ValidationError::FunctionNotExported { available, .. } => {
                assert!(available.is_empty(), "internal names must be filtered");
            }
            other => panic!("expected FunctionNotExported, got {other:?}"),
        }
    }
}

#[test]
fn rejects_invalid_base64() {
    let err = validate_task("@@not-base64@@", "add", &Value::Null).unwrap_err();
    assert!(matches!(err, ValidationError::InvalidBase64(_)));
}

#[test]
fn rejects_unsupported_version() {
    let module = module_base64(&unsupported_version_module());
    let err = validate_task(&module, "add", &Value::Null).unwrap_err();
    match err {
        ValidationError::InvalidWasm(msg) => {
            assert!(msg.contains("unsupported WASM version: 2"));
        }
        other => panic!("expected InvalidWasm, got {other:?}"),
    }
}

#[test]
fn rejects_garbage_bytes() {
    let module = module_base64(b"definitely not wasm at all");
    let err = validate_task(&module, "add", &Value::Null).unwrap_err();
    assert!(matches!(err, ValidationError::InvalidWasm(_)));
}

#[test]
fn decisions_are_deterministic() {
    let module = module_base64(&add_i32_module());
    let first = validate_task(&module, "frob", &Value::Null)
        .unwrap_err()
        .to_string();
    let second = validate_task(&module, "frob", &Value::Null)
        .unwrap_err()
        .to_string();
    assert_eq!(first, second);
}
