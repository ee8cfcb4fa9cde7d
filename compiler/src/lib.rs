// wgslc — WGSL kernel compiler
//
// Library root. Leaf modules first: types and ids, the IR input contract,
// layout and binding records, then the emitter, packaging and orchestration.

pub mod aot;
pub mod assemble;
pub mod attribs;
pub mod binding;
pub mod codegen;
pub mod diag;
pub mod id;
pub mod ir;
pub mod pipeline;
pub mod snippets;
pub mod types;
