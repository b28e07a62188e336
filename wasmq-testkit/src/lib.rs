//! Test support for wasmq: an in-memory implementation of every storage
//! capability set, plus hand-assembled WASM binaries with known export
//! signatures for exercising the validator end to end.

pub mod store;
pub mod wasm;

pub use store::MemoryStore;
pub use wasm::{
    add_i32_module, build_module, const_i32_module, internal_only_module, module_base64,
    mul_f64_module, unsupported_version_module, FixtureFunc, NumType,
};
