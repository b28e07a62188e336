//! Hand-assembled WASM binaries with known export signatures.
//!
//! The fixtures are real, loadable modules: a type section, a function
//! section, an export section, and a code section whose bodies actually
//! validate, so they survive full compilation by the queue's validator and
//! not just its header walk.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;

const HEADER: [u8; 8] = [0x00, b'a', b's', b'm', 0x01, 0x00, 0x00, 0x00];

const SECTION_TYPE: u8 = 1;
const SECTION_FUNCTION: u8 = 3;
const SECTION_EXPORT: u8 = 7;
const SECTION_CODE: u8 = 10;

const FUNC_TYPE: u8 = 0x60;
const EXPORT_KIND_FUNC: u8 = 0x00;
const OPCODE_END: u8 = 0x0b;

/// WASM number types usable in fixture signatures.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum NumType {
    I32,
    I64,
    F32,
    F64,
}

impl NumType {
    fn code(self) -> u8 {
        match self {
            NumType::I32 => 0x7f,
            NumType::I64 => 0x7e,
            NumType::F32 => 0x7d,
            NumType::F64 => 0x7c,
        }
    }

    /// Instruction bytes pushing a zero constant of this type.
    fn const_zero(self) -> Vec<u8> {
        match self {
            NumType::I32 => vec![0x41, 0x00],
            NumType::I64 => vec![0x42, 0x00],
            NumType::F32 => vec![0x43, 0x00, 0x00, 0x00, 0x00],
            NumType::F64 => vec![0x44, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00],
        }
    }
}

/// One exported function in a fixture module.
#[derive(Clone, Debug)]
pub struct FixtureFunc {
    pub name: String,
    pub params: Vec<NumType>,
    pub result: Option<NumType>,
    /// Body instruction bytes, without locals or the trailing `end`.
    /// Defaults to pushing a zero constant of the result type.
    pub body: Option<Vec<u8>>,
}

impl FixtureFunc {
    pub fn new(name: impl Into<String>, params: Vec<NumType>, result: Option<NumType>) -> Self {
        Self {
            name: name.into(),
            params,
            result,
            body: None,
        }
    }

    pub fn with_body(mut self, body: Vec<u8>) -> Self {
        self.body = Some(body);
        self
    }
}

fn write_uleb(out: &mut Vec<u8>, mut value: u64) {
    loop {
        let mut byte = (value & 0x7f) as u8;
        value >>= 7;
        if value != 0 {
            byte |= 0x80;
        }
        out.push(byte);
        if value == 0 {
            break;
        }
    }
}

fn write_section(out: &mut Vec<u8>, id: u8, payload: &[u8]) {
    out.push(id);
    write_uleb(out, payload.len() as u64);
    out.extend_from_slice(payload);
}

/// Assemble a module exporting the given functions, one type per function.
pub fn build_module(funcs: &[FixtureFunc]) -> Vec<u8> {
    let mut module = HEADER.to_vec();

    let mut types = Vec::new();
    write_uleb(&mut types, funcs.len() as u64);
    for func in funcs {
        types.push(FUNC_TYPE);
        write_uleb(&mut types, func.params.len() as u64);
        for param in &func.params {
            types.push(param.code());
        }
        match func.result {
            Some(result) => {
                write_uleb(&mut types, 1);
                types.push(result.code());
            }
            None => write_uleb(&mut types, 0),
        }
    }
    write_section(&mut module, SECTION_TYPE, &types);

    let mut functions = Vec::new();
    write_uleb(&mut functions, funcs.len() as u64);
    for index in 0..funcs.len() {
        write_uleb(&mut functions, index as u64);
    }
    write_section(&mut module, SECTION_FUNCTION, &functions);

    let mut exports = Vec::new();
    write_uleb(&mut exports, funcs.len() as u64);
    for (index, func) in funcs.iter().enumerate() {
        write_uleb(&mut exports, func.name.len() as u64);
        exports.extend_from_slice(func.name.as_bytes());
        exports.push(EXPORT_KIND_FUNC);
        write_uleb(&mut exports, index as u64);
    }
    write_section(&mut module, SECTION_EXPORT, &exports);

    let mut code = Vec::new();
    write_uleb(&mut code, funcs.len() as u64);
    for func in funcs {
        let instrs = match &func.body {
            Some(body) => body.clone(),
            None => func.result.map(NumType::const_zero).unwrap_or_default(),
        };
        let mut body = Vec::new();
        write_uleb(&mut body, 0); // no local declarations
        body.extend_from_slice(&instrs);
        body.push(OPCODE_END);

        write_uleb(&mut code, body.len() as u64);
        code.extend_from_slice(&body);
    }
    write_section(&mut module, SECTION_CODE, &code);

    module
}

/// Module exporting `add(i32, i32) -> i32`, which really adds.
pub fn add_i32_module() -> Vec<u8> {
    build_module(&[FixtureFunc::new(
        "add",
        vec![NumType::I32, NumType::I32],
        Some(NumType::I32),
    )
    .with_body(vec![0x20, 0x00, 0x20, 0x01, 0x6a])])
}

/// Zero-arity module exporting `name() -> i32` returning 42.
pub fn const_i32_module(name: &str) -> Vec<u8> {
    build_module(&[
        FixtureFunc::new(name, vec![], Some(NumType::I32)).with_body(vec![0x41, 0x2a])
    ])
}

/// Module exporting `mul(f64, f64) -> f64`.
pub fn mul_f64_module() -> Vec<u8> {
    build_module(&[FixtureFunc::new(
        "mul",
        vec![NumType::F64, NumType::F64],
        Some(NumType::F64),
    )
    .with_body(vec![0x20, 0x00, 0x20, 0x01, 0xa2])])
}

/// Module exporting only runtime-internal names.
pub fn internal_only_module() -> Vec<u8> {
    build_module(&[
        FixtureFunc::new("_start", vec![], None),
        FixtureFunc::new("__wasm_call_ctors", vec![], None),
    ])
}

/// A header claiming WASM version 2, with no sections.
pub fn unsupported_version_module() -> Vec<u8> {
    vec![0x00, b'a', b's', b'm', 0x02, 0x00, 0x00, 0x00]
}

/// Base64-encode a module the way publishers submit them.
pub fn module_base64(module: &[u8]) -> String {
    BASE64.encode(module)
}
