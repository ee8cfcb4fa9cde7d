// pipeline.rs — Module compilation and build provenance
//
// Parses a JSON module, runs code generation for every kernel in source
// order, registers exported fields, and renders the requested output.
//
// Preconditions: input is a serialized `ModuleIr`.
// Postconditions: returns a populated `AotModuleBuilder`, or the first error.
// Failure modes: JSON errors, any codegen or packaging error.
// Side effects: DEBUG log per phase with elapsed time.

use std::fmt::Write as _;
use std::time::Instant;

use crate::aot::AotModuleBuilder;
use crate::attribs::KernelAttributes;
use crate::codegen::CodegenOptions;
use crate::diag::Result;
use crate::ir::ModuleIr;

// ── Provenance ─────────────────────────────────────────────────────────────

/// Provenance metadata for hermetic builds and cache-key use.
///
/// `source_hash`: SHA-256 of the raw input text.
/// `module_fingerprint`: SHA-256 of the compact JSON re-serialization of the
/// parsed module, stable under formatting changes of the input.
/// `compiler_version`: crate version from `Cargo.toml`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Provenance {
    pub source_hash: [u8; 32],
    pub module_fingerprint: [u8; 32],
    pub compiler_version: &'static str,
}

impl Provenance {
    pub fn source_hash_hex(&self) -> String {
        bytes_to_hex(&self.source_hash)
    }

    pub fn module_fingerprint_hex(&self) -> String {
        bytes_to_hex(&self.module_fingerprint)
    }

    /// Serialize provenance as a JSON string for `--emit build-info`.
    pub fn to_json(&self) -> String {
        format!(
            "{{\n  \"source_hash\": \"{}\",\n  \"module_fingerprint\": \"{}\",\n  \"compiler_version\": \"{}\"\n}}\n",
            self.source_hash_hex(),
            self.module_fingerprint_hex(),
            self.compiler_version
        )
    }
}

fn bytes_to_hex(bytes: &[u8; 32]) -> String {
    let mut s = String::with_capacity(64);
    for b in bytes {
        let _ = write!(s, "{:02x}", b);
    }
    s
}

fn sha256(data: &[u8]) -> [u8; 32] {
    use sha2::{Digest, Sha256};

    let mut hasher = Sha256::new();
    hasher.update(data);
    let result = hasher.finalize();
    let mut hash = [0u8; 32];
    hash.copy_from_slice(&result);
    hash
}

pub fn compute_provenance(source: &str, module: &ModuleIr) -> Result<Provenance> {
    let canonical = serde_json::to_string(module)?;
    Ok(Provenance {
        source_hash: sha256(source.as_bytes()),
        module_fingerprint: sha256(canonical.as_bytes()),
        compiler_version: env!("CARGO_PKG_VERSION"),
    })
}

// ── Compilation ────────────────────────────────────────────────────────────

pub fn parse_module(source: &str) -> Result<ModuleIr> {
    let start = Instant::now();
    let module: ModuleIr = serde_json::from_str(source)?;
    tracing::debug!(
        kernels = module.kernels.len(),
        trees = module.trees.len(),
        elapsed_us = start.elapsed().as_micros() as u64,
        "parsed module"
    );
    Ok(module)
}

/// Generate every kernel and register every field of `module`.
pub fn compile_module(module: &ModuleIr, options: CodegenOptions) -> Result<AotModuleBuilder<'_>> {
    let start = Instant::now();
    let mut builder = AotModuleBuilder::new(&module.trees, &module.textures, options);
    for kernel in &module.kernels {
        builder.add_kernel(&kernel.name, kernel)?;
    }
    for field in &module.fields {
        builder.add_field(field)?;
    }
    tracing::debug!(
        kernels = module.kernels.len(),
        fields = module.fields.len(),
        elapsed_us = start.elapsed().as_micros() as u64,
        "compiled module"
    );
    Ok(builder)
}

/// All task programs, each preceded by a `// {task}` marker line.
pub fn render_wgsl(builder: &AotModuleBuilder<'_>) -> String {
    let mut out = String::new();
    for kernel in builder.kernel_attributes() {
        let programs = builder.task_programs(&kernel.name).unwrap_or_default();
        for (task, program) in kernel.tasks.iter().zip(programs) {
            if !out.is_empty() {
                out.push('\n');
            }
            let _ = writeln!(out, "// {}", task.name);
            out.push_str(program);
        }
    }
    out
}

pub fn render_attributes(builder: &AotModuleBuilder<'_>) -> Result<String> {
    let attribs: Vec<&KernelAttributes> = builder.kernel_attributes().collect();
    let mut json = serde_json::to_string_pretty(&attribs)?;
    json.push('\n');
    Ok(json)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MODULE: &str = r#"{
        "trees": [{"root": 0, "root_size": 64, "nodes": [
            {"id": 0, "cell_stride": 64, "mem_offset_in_parent_cell": 0, "children": [1]},
            {"id": 1, "cell_stride": 4, "mem_offset_in_parent_cell": 0, "parent": 0}
        ]}],
        "kernels": [{
            "name": "zero",
            "stmts": [
                {"ty": "i32", "kind": {"stmt": "loop_index", "scope": "task"}},
                {"kind": {"stmt": "get_root", "snode": 0}},
                {"kind": {"stmt": "snode_lookup", "snode": 1, "input_snode": 1, "input_index": 0}},
                {"ty": "i32", "kind": {"stmt": "const", "value": 0}},
                {"kind": {"stmt": "global_store", "dest": 2, "val": 3}}
            ],
            "tasks": [{"kind": "range_for", "body": [0, 1, 2, 3, 4], "block_dim": 16,
                       "range": {"begin": {"const": 0}, "end": {"const": 16}}}]
        }]
    }"#;

    #[test]
    fn compiles_json_module() {
        let module = parse_module(MODULE).unwrap();
        let builder = compile_module(&module, CodegenOptions::default()).unwrap();
        let wgsl = render_wgsl(&builder);
        assert!(wgsl.starts_with("// zero_t00\n@compute @workgroup_size(16, 1, 1)\n"), "{}", wgsl);
        assert!(wgsl.contains("root_buffer_0_.member[tmp2] = bitcast<i32>(tmp3);"), "{}", wgsl);

        let attribs = render_attributes(&builder).unwrap();
        assert!(attribs.contains("\"advisory_total_num_threads\": 16"), "{}", attribs);
    }

    #[test]
    fn provenance_is_stable_and_hex() {
        let module = parse_module(MODULE).unwrap();
        let a = compute_provenance(MODULE, &module).unwrap();
        let b = compute_provenance(MODULE, &module).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.source_hash_hex().len(), 64);
        assert!(a.to_json().contains("\"compiler_version\""));
    }

    #[test]
    fn fingerprint_ignores_formatting() {
        let module = parse_module(MODULE).unwrap();
        let compact = serde_json::to_string(&module).unwrap();
        let reparsed = parse_module(&compact).unwrap();
        let a = compute_provenance(MODULE, &module).unwrap();
        let b = compute_provenance(&compact, &reparsed).unwrap();
        assert_ne!(a.source_hash, b.source_hash);
        assert_eq!(a.module_fingerprint, b.module_fingerprint);
    }

    #[test]
    fn malformed_json_is_reported() {
        let err = parse_module("{ not json").unwrap_err();
        assert_eq!(err.code().0, "E0401");
    }
}
