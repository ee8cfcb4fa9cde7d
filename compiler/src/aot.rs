// aot.rs — Ahead-of-time module packaging
//
// Collects generated kernels and exported fields into a `ModuleData`
// bundle: per-task program text plus the metadata a runtime needs to bind
// buffers and dispatch tasks without recompiling.
//
// Preconditions: memory tree 0 is the tree exported fields live in.
// Postconditions: `dump` writes `metadata.json` and one `{task}.wgsl` per task.
// Failure modes: codegen errors, non-dense fields, duplicate kernel
//                identifiers, I/O errors.
// Side effects: `dump` writes files under the output directory.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::Serialize;

use crate::attribs::{KernelAttributes, TaskAttributes};
use crate::codegen::{generate_kernel, CodegenOptions, ModuleEnv};
use crate::diag::{CodegenError, Result};
use crate::id::SNodeId;
use crate::ir::{FieldDecl, Kernel, MemoryTree, Texture};

// ── Module data ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompiledTask {
    #[serde(rename = "type")]
    pub task_type: String,
    pub name: String,
    /// Element count of a fully constant range-for.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub range_hint: Option<String>,
    pub gpu_block_size: u32,
    pub source_file: String,
    #[serde(skip)]
    pub code: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScalarArg {
    pub dtype_name: String,
    pub offset_in_args_buf: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompiledKernel {
    pub tasks: Vec<CompiledTask>,
    pub args_count: usize,
    pub rets_count: usize,
    pub args_buffer_size: u32,
    pub rets_buffer_size: u32,
    pub scalar_args: BTreeMap<usize, ScalarArg>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompiledField {
    pub field_name: String,
    pub is_scalar: bool,
    pub dtype_name: String,
    pub shape: Vec<i32>,
    pub mem_offset_in_parent: u32,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub element_shape: Vec<i32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModuleData {
    pub kernels: BTreeMap<String, CompiledKernel>,
    pub fields: Vec<CompiledField>,
    pub root_buffer_size: u64,
}

impl ModuleData {
    pub fn to_json(&self) -> Result<String> {
        let mut json = serde_json::to_string_pretty(self)?;
        json.push('\n');
        Ok(json)
    }
}

fn compile_task(attribs: &TaskAttributes, code: &str) -> CompiledTask {
    CompiledTask {
        task_type: attribs.task_type.name().to_string(),
        name: attribs.name.clone(),
        range_hint: attribs
            .range_for
            .and_then(|r| r.num_elems())
            .map(|n| n.max(0).to_string()),
        gpu_block_size: attribs.advisory_num_threads_per_group,
        source_file: format!("{}.wgsl", attribs.name),
        code: code.to_string(),
    }
}

fn compile_kernel(attribs: &KernelAttributes, programs: &[String]) -> CompiledKernel {
    CompiledKernel {
        tasks: attribs
            .tasks
            .iter()
            .zip(programs)
            .map(|(t, code)| compile_task(t, code))
            .collect(),
        args_count: attribs.ctx.args.len(),
        rets_count: attribs.ctx.rets.len(),
        args_buffer_size: attribs.ctx.args_bytes,
        rets_buffer_size: attribs.ctx.rets_bytes,
        scalar_args: attribs
            .ctx
            .args
            .iter()
            .map(|a| {
                (
                    a.index,
                    ScalarArg {
                        dtype_name: a.dt.name().to_string(),
                        offset_in_args_buf: a.offset_in_mem,
                    },
                )
            })
            .collect(),
    }
}

// ── Builder ─────────────────────────────────────────────────────────────────

pub struct AotModuleBuilder<'a> {
    env: ModuleEnv<'a>,
    options: CodegenOptions,
    kernels: Vec<(KernelAttributes, Vec<String>)>,
    fields: Vec<CompiledField>,
}

impl<'a> AotModuleBuilder<'a> {
    pub fn new(trees: &'a [MemoryTree], textures: &'a [Texture], options: CodegenOptions) -> Self {
        AotModuleBuilder {
            env: ModuleEnv::new(trees, textures),
            options,
            kernels: Vec::new(),
            fields: Vec::new(),
        }
    }

    /// Generate `kernel` and register it under `identifier`. Task names
    /// (and so source file names) derive from the identifier.
    pub fn add_kernel(&mut self, identifier: &str, kernel: &Kernel) -> Result<()> {
        if self.kernels.iter().any(|(k, _)| k.name == identifier) {
            return Err(CodegenError::Aot {
                reason: format!("kernel `{}` added twice", identifier),
            });
        }
        let renamed;
        let kernel = if kernel.name == identifier {
            kernel
        } else {
            renamed = Kernel {
                name: identifier.to_string(),
                ..kernel.clone()
            };
            &renamed
        };
        let generated = generate_kernel(kernel, &self.env, &self.options)?;
        let attribs = generated.attribs;
        tracing::debug!(kernel = identifier, tasks = attribs.tasks.len(), "added kernel");
        self.kernels.push((attribs, generated.task_programs));
        Ok(())
    }

    /// Register a field. Only fields whose container chain is dense up to
    /// the root can be exported.
    pub fn add_field(&mut self, field: &FieldDecl) -> Result<()> {
        let tree = self.env.trees.first().ok_or_else(|| CodegenError::Aot {
            reason: "no memory tree to export fields from".to_string(),
        })?;
        let place = tree.node(field.snode).ok_or_else(|| CodegenError::Aot {
            reason: format!("field `{}`: unknown snode {}", field.name, field.snode.0),
        })?;
        let container_id = place.parent.ok_or_else(|| CodegenError::Aot {
            reason: format!("field `{}`: place snode has no container", field.name),
        })?;
        if !all_dense_to_root(tree, container_id) {
            return Err(CodegenError::Aot {
                reason: format!("only dense fields are supported (field `{}`)", field.name),
            });
        }
        let container = tree.node(container_id).ok_or_else(|| CodegenError::Aot {
            reason: format!("field `{}`: unknown snode {}", field.name, container_id.0),
        })?;
        self.fields.push(CompiledField {
            field_name: field.name.clone(),
            is_scalar: field.is_scalar,
            dtype_name: field.dtype.name().to_string(),
            shape: field.shape.clone(),
            mem_offset_in_parent: container.mem_offset_in_parent_cell,
            element_shape: if field.is_scalar {
                Vec::new()
            } else {
                vec![field.row_num, field.column_num]
            },
        });
        Ok(())
    }

    pub fn kernel_attributes(&self) -> impl Iterator<Item = &KernelAttributes> {
        self.kernels.iter().map(|(k, _)| k)
    }

    /// Generated programs of kernel `identifier`, in task order.
    pub fn task_programs(&self, identifier: &str) -> Option<&[String]> {
        self.kernels
            .iter()
            .find(|(k, _)| k.name == identifier)
            .map(|(_, p)| p.as_slice())
    }

    pub fn module_data(&self) -> ModuleData {
        ModuleData {
            kernels: self
                .kernels
                .iter()
                .map(|(attribs, programs)| (attribs.name.clone(), compile_kernel(attribs, programs)))
                .collect(),
            fields: self.fields.clone(),
            root_buffer_size: self.env.trees.first().map_or(0, |t| t.root_size),
        }
    }

    pub fn compiled_kernel(&self, identifier: &str) -> Result<CompiledKernel> {
        self.kernels
            .iter()
            .find(|(k, _)| k.name == identifier)
            .map(|(attribs, programs)| compile_kernel(attribs, programs))
            .ok_or_else(|| CodegenError::Aot {
                reason: format!("no kernel named `{}`", identifier),
            })
    }

    pub fn dump(&self, output_dir: &Path) -> Result<()> {
        fs::create_dir_all(output_dir)?;
        let data = self.module_data();
        for kernel in data.kernels.values() {
            for task in &kernel.tasks {
                fs::write(output_dir.join(&task.source_file), &task.code)?;
            }
        }
        fs::write(output_dir.join("metadata.json"), data.to_json()?)?;
        tracing::debug!(dir = %output_dir.display(), kernels = data.kernels.len(), "dumped module");
        Ok(())
    }
}

/// A parent chain longer than the node list has a cycle and is rejected.
fn all_dense_to_root(tree: &MemoryTree, start: SNodeId) -> bool {
    let mut current = Some(start);
    for _ in 0..=tree.nodes.len() {
        match current {
            None => return true,
            Some(id) => match tree.node(id) {
                Some(node) if node.dense => current = node.parent,
                _ => return false,
            },
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{KernelBuilder, RangeBound, SNodeDescriptor, Task};
    use crate::types::PrimitiveType;

    fn node(id: i32, parent: Option<i32>, children: Vec<i32>, dense: bool) -> SNodeDescriptor {
        SNodeDescriptor {
            id: SNodeId(id),
            cell_stride: 4,
            mem_offset_in_parent_cell: 4 * id as u32,
            children: children.into_iter().map(SNodeId).collect(),
            parent: parent.map(SNodeId),
            dense,
        }
    }

    fn trees(dense_container: bool) -> Vec<MemoryTree> {
        vec![MemoryTree {
            root: SNodeId(0),
            root_size: 256,
            nodes: vec![
                node(0, None, vec![1], true),
                node(1, Some(0), vec![2], dense_container),
                node(2, Some(1), vec![], true),
            ],
        }]
    }

    fn field() -> FieldDecl {
        FieldDecl {
            name: "x".into(),
            snode: SNodeId(2),
            is_scalar: true,
            dtype: PrimitiveType::F32,
            shape: vec![64],
            row_num: 0,
            column_num: 0,
        }
    }

    #[test]
    fn range_hint_only_for_constant_ranges() {
        let t = trees(true);
        let mut b = AotModuleBuilder::new(&t, &[], CodegenOptions::default());
        let mut kb = KernelBuilder::new("k");
        kb.task(Task::range_for(RangeBound::Const(0), RangeBound::Const(64), 32, vec![]));
        kb.task(Task::range_for(
            RangeBound::Const(0),
            RangeBound::Dynamic { offset: 4 },
            32,
            vec![],
        ));
        b.add_kernel("init", &kb.build()).unwrap();
        let ck = b.compiled_kernel("init").unwrap();
        assert_eq!(ck.tasks[0].range_hint.as_deref(), Some("64"));
        assert_eq!(ck.tasks[1].range_hint, None);
        assert_eq!(ck.tasks[0].gpu_block_size, 32);
        assert_eq!(ck.tasks[0].source_file, "init_t00.wgsl");
        assert_eq!(ck.tasks[0].task_type, "range_for");
    }

    #[test]
    fn scalar_args_and_buffer_sizes() {
        let t = trees(true);
        let mut b = AotModuleBuilder::new(&t, &[], CodegenOptions::default());
        let mut kb = KernelBuilder::new("k");
        kb.arg(PrimitiveType::I32, false);
        kb.arg(PrimitiveType::F32, false);
        kb.ret(PrimitiveType::F32);
        kb.task(Task::serial(vec![]));
        b.add_kernel("k", &kb.build()).unwrap();
        let ck = b.compiled_kernel("k").unwrap();
        assert_eq!(ck.args_count, 2);
        assert_eq!(ck.rets_count, 1);
        assert_eq!(ck.args_buffer_size, 8);
        assert_eq!(ck.rets_buffer_size, 4);
        assert_eq!(ck.scalar_args[&1].dtype_name, "f32");
        assert_eq!(ck.scalar_args[&1].offset_in_args_buf, 4);
    }

    #[test]
    fn duplicate_kernels_rejected() {
        let t = trees(true);
        let mut b = AotModuleBuilder::new(&t, &[], CodegenOptions::default());
        let mut kb = KernelBuilder::new("k");
        kb.task(Task::serial(vec![]));
        let k = kb.build();
        b.add_kernel("k", &k).unwrap();
        let err = b.add_kernel("k", &k).unwrap_err();
        assert!(err.to_string().contains("added twice"), "{}", err);
    }

    #[test]
    fn dense_field_exported() {
        let t = trees(true);
        let mut b = AotModuleBuilder::new(&t, &[], CodegenOptions::default());
        b.add_field(&field()).unwrap();
        let data = b.module_data();
        assert_eq!(data.fields[0].field_name, "x");
        assert_eq!(data.fields[0].mem_offset_in_parent, 4);
        assert!(data.fields[0].element_shape.is_empty());
        assert_eq!(data.root_buffer_size, 256);
    }

    #[test]
    fn sparse_container_rejected() {
        let t = trees(false);
        let mut b = AotModuleBuilder::new(&t, &[], CodegenOptions::default());
        let err = b.add_field(&field()).unwrap_err();
        assert_eq!(err.to_string(), "AOT: only dense fields are supported (field `x`)");
    }

    #[test]
    fn parent_cycle_is_not_dense() {
        let t = vec![MemoryTree {
            root: SNodeId(0),
            root_size: 256,
            nodes: vec![
                node(0, Some(1), vec![1], true),
                node(1, Some(0), vec![2], true),
                node(2, Some(1), vec![], true),
            ],
        }];
        let mut b = AotModuleBuilder::new(&t, &[], CodegenOptions::default());
        let err = b.add_field(&field()).unwrap_err();
        assert_eq!(err.to_string(), "AOT: only dense fields are supported (field `x`)");
    }

    #[test]
    fn matrix_field_element_shape() {
        let t = trees(true);
        let mut b = AotModuleBuilder::new(&t, &[], CodegenOptions::default());
        let f = FieldDecl {
            is_scalar: false,
            row_num: 3,
            column_num: 2,
            ..field()
        };
        b.add_field(&f).unwrap();
        assert_eq!(b.module_data().fields[0].element_shape, vec![3, 2]);
    }
}
