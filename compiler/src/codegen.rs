// codegen.rs — WGSL code generation for kernel IR
//
// Lowers each task of a kernel into one WGSL program plus its attribute
// record. `KernelCodegen` walks tasks in source order and creates a fresh
// `TaskCodegen` per task; the task codegen picks the kernel shape (serial,
// grid-strided range-for, vertex, fragment) and drives the statement
// emitter over the task body.
//
// Preconditions: kernel IR is fully lowered and typed; every pointer
//                statement names a node of one of the given memory trees.
// Postconditions: one program per task; task attributes in task order.
// Failure modes: unsupported statements, operators, types or task kinds,
//                and broken IR invariants abort with `CodegenError`.
// Side effects: DEBUG log per kernel and per task.

use std::collections::HashMap;
use std::fmt::Write as _;

use crate::assemble::ProgramFragments;
use crate::attribs::{
    task_name, ContextAttributes, KernelAttributes, RangeForAttributes, TaskAttributes,
};
use crate::binding::{BindingTable, ResourceDescriptor, ResourceKind};
use crate::diag::{CodegenError, Result};
use crate::id::{SNodeId, StmtId, TextureId};
use crate::ir::{
    snode_to_root, AtomicOp, BinaryOp, BuiltIn, ConstValue, Kernel, LoopScope, MemoryTree,
    RangeBound, Stmt, StmtKind, Task, TaskKind, Texture, TextureFunc, UnaryOp,
};
use crate::snippets::{self, AddressSpace, BufferDecl, Stage};
use crate::types::{scalar_or_vector_type_name, PrimitiveType};

// ── Public types ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodegenOptions {
    /// Advisory dispatch size when a range bound is only known at run time.
    pub max_invocations: u32,
    /// Byte size of the global temporaries buffer.
    pub global_tmps_bytes: u32,
    /// Number of per-invocation RNG states.
    pub rand_states_count: u32,
    /// Workgroup size of range-for tasks that do not request one.
    pub default_block_dim: u32,
}

impl Default for CodegenOptions {
    fn default() -> Self {
        CodegenOptions {
            max_invocations: 65536,
            global_tmps_bytes: 65536,
            rand_states_count: 65536,
            default_block_dim: 128,
        }
    }
}

/// Memory trees and textures shared by every kernel of a module.
#[derive(Debug)]
pub struct ModuleEnv<'a> {
    pub trees: &'a [MemoryTree],
    pub textures: &'a [Texture],
    snode_to_root: HashMap<SNodeId, usize>,
}

impl<'a> ModuleEnv<'a> {
    pub fn new(trees: &'a [MemoryTree], textures: &'a [Texture]) -> Self {
        ModuleEnv {
            trees,
            textures,
            snode_to_root: snode_to_root(trees),
        }
    }

    fn texture(&self, id: TextureId) -> Option<&'a Texture> {
        self.textures.iter().find(|t| t.id == id)
    }
}

#[derive(Debug, Clone)]
pub struct GeneratedKernel {
    /// One WGSL program per task, in task order.
    pub task_programs: Vec<String>,
    pub attribs: KernelAttributes,
}

// ── Public entry point ──────────────────────────────────────────────────────

pub fn generate_kernel(
    kernel: &Kernel,
    env: &ModuleEnv<'_>,
    options: &CodegenOptions,
) -> Result<GeneratedKernel> {
    KernelCodegen::new(kernel, env, options).run()
}

// ── Kernel codegen ──────────────────────────────────────────────────────────

pub struct KernelCodegen<'a> {
    kernel: &'a Kernel,
    env: &'a ModuleEnv<'a>,
    options: &'a CodegenOptions,
}

impl<'a> KernelCodegen<'a> {
    pub fn new(kernel: &'a Kernel, env: &'a ModuleEnv<'a>, options: &'a CodegenOptions) -> Self {
        KernelCodegen {
            kernel,
            env,
            options,
        }
    }

    pub fn run(&self) -> Result<GeneratedKernel> {
        self.kernel.validate()?;
        let ctx = ContextAttributes::new(self.kernel);
        let mut task_programs = Vec::with_capacity(self.kernel.tasks.len());
        let mut tasks: Vec<TaskAttributes> = Vec::with_capacity(self.kernel.tasks.len());

        for (index, task) in self.kernel.tasks.iter().enumerate() {
            let binding_base = match tasks.last() {
                Some(prev)
                    if task.kind == TaskKind::FragmentFor
                        && prev.task_type == TaskKind::VertexFor =>
                {
                    prev.bindings.next_binding()
                }
                _ => 0,
            };
            let tcg = TaskCodegen::new(
                self.kernel,
                self.env,
                &ctx,
                self.options,
                task,
                task_name(&self.kernel.name, index),
                binding_base,
            );
            let (wgsl, attribs) = tcg.run()?;
            task_programs.push(wgsl);
            tasks.push(attribs);
        }

        tracing::debug!(
            kernel = %self.kernel.name,
            tasks = tasks.len(),
            args_bytes = ctx.args_bytes,
            rets_bytes = ctx.rets_bytes,
            "generated kernel"
        );

        Ok(GeneratedKernel {
            task_programs,
            attribs: KernelAttributes {
                name: self.kernel.name.clone(),
                tasks,
                ctx,
                is_jit_evaluator: self.kernel.is_evaluator,
            },
        })
    }
}

// ── Task codegen ────────────────────────────────────────────────────────────

/// Which backing buffer a pointer-valued statement indexes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PointerInfo {
    /// Tree index for root-relative pointers, `None` for global temporaries.
    root: Option<usize>,
}

struct TaskCodegen<'a> {
    kernel: &'a Kernel,
    env: &'a ModuleEnv<'a>,
    ctx: &'a ContextAttributes,
    options: &'a CodegenOptions,
    task: &'a Task,
    name: String,
    out: ProgramFragments,
    bindings: BindingTable,
    indent: usize,
    pointers: HashMap<StmtId, PointerInfo>,
    root_stmts: HashMap<usize, StmtId>,
    temp_counter: usize,
    rand_declared: bool,
}

impl<'a> TaskCodegen<'a> {
    fn new(
        kernel: &'a Kernel,
        env: &'a ModuleEnv<'a>,
        ctx: &'a ContextAttributes,
        options: &'a CodegenOptions,
        task: &'a Task,
        name: String,
        binding_base: u32,
    ) -> Self {
        TaskCodegen {
            kernel,
            env,
            ctx,
            options,
            task,
            name,
            out: ProgramFragments::default(),
            bindings: BindingTable::new(binding_base),
            indent: 1,
            pointers: HashMap::new(),
            root_stmts: HashMap::new(),
            temp_counter: 0,
            rand_declared: false,
        }
    }

    fn run(mut self) -> Result<(String, TaskAttributes)> {
        let mut range_for = None;
        let (total, per_group) = match self.task.kind {
            TaskKind::Serial => self.generate_serial_kernel()?,
            TaskKind::RangeFor => {
                let (attribs, total, per_group) = self.generate_range_for_kernel()?;
                range_for = Some(attribs);
                (total, per_group)
            }
            TaskKind::VertexFor => self.generate_graphics_kernel(Stage::Vertex)?,
            TaskKind::FragmentFor => self.generate_graphics_kernel(Stage::Fragment)?,
            kind @ (TaskKind::StructFor
            | TaskKind::MeshFor
            | TaskKind::Listgen
            | TaskKind::Gc) => {
                return Err(CodegenError::UnsupportedTask {
                    kernel: self.kernel.name.clone(),
                    kind: kind.name().to_string(),
                });
            }
        };

        let wgsl = self.out.assemble();
        tracing::debug!(
            task = %self.name,
            kind = self.task.kind.name(),
            bindings = self.bindings.len(),
            bytes = wgsl.len(),
            "generated task"
        );

        let mut attribs = TaskAttributes::new(self.name, self.task.kind, self.bindings);
        attribs.range_for = range_for;
        attribs.advisory_total_num_threads = total;
        attribs.advisory_num_threads_per_group = per_group;
        Ok((wgsl, attribs))
    }

    fn is_graphics(&self) -> bool {
        self.task.kind.is_graphics()
    }

    // ── Kernel shapes ───────────────────────────────────────────────────────

    fn generate_serial_kernel(&mut self) -> Result<(u32, u32)> {
        self.out.signature = snippets::compute_signature(1);
        let task = self.task;
        self.emit_block(&task.body)?;
        Ok((1, 1))
    }

    fn generate_range_for_kernel(&mut self) -> Result<(RangeForAttributes, u32, u32)> {
        let range = self
            .task
            .range
            .ok_or_else(|| self.contract("range_for task without range bounds"))?;
        let block_size = if self.task.block_dim == 0 {
            self.options.default_block_dim
        } else {
            self.task.block_dim
        };
        let bound_value = |b: RangeBound| match b {
            RangeBound::Const(v) => v,
            RangeBound::Dynamic { offset } => offset as i32,
        };
        let attribs = RangeForAttributes {
            const_begin: range.begin.is_const(),
            const_end: range.end.is_const(),
            begin: bound_value(range.begin),
            end: bound_value(range.end),
        };
        self.out.signature = snippets::compute_signature(block_size);

        let (begin_expr, end_expr, total_elems, advisory_total) = match attribs.num_elems() {
            Some(num_elems) => {
                // Reversed bounds are an empty range.
                let total = i32::try_from(num_elems.max(0)).map_err(|_| {
                    self.contract(format!(
                        "constant range {}..{} has more than {} elements",
                        attribs.begin,
                        attribs.end,
                        i32::MAX
                    ))
                })?;
                (
                    attribs.begin.to_string(),
                    attribs.end.to_string(),
                    total.to_string(),
                    total.unsigned_abs(),
                )
            }
            None => {
                let begin_expr = self.range_bound_expr(range.begin, "begin_idx")?;
                let end_expr = self.range_bound_expr(range.end, "end_idx")?;
                (
                    begin_expr,
                    end_expr,
                    "end_ - begin_".to_string(),
                    self.options.max_invocations,
                )
            }
        };

        self.emit_let("begin_", "i32", &begin_expr);
        self.emit_let("end_", "i32", &end_expr);
        self.emit_let("total_elems", "i32", &total_elems);
        self.emit_let(
            "total_invocs",
            "i32",
            &format!("{} * i32(n_workgroups.x)", block_size),
        );
        self.line("var ii : i32 = i32(gid3.x) + begin_;");
        self.line("loop {");
        self.indent += 1;
        self.line("if (ii >= end_) { break; }");
        let task = self.task;
        self.emit_block(&task.body)?;
        self.line("continuing {");
        self.indent += 1;
        self.line("ii = ii + total_invocs;");
        self.indent -= 1;
        self.line("}");
        self.indent -= 1;
        self.line("}");

        Ok((attribs, advisory_total, block_size))
    }

    /// Constant literal, or a read of the global temporaries buffer at the
    /// bound's word index held in `idx_name`.
    fn range_bound_expr(&mut self, bound: RangeBound, idx_name: &str) -> Result<String> {
        match bound {
            RangeBound::Const(v) => Ok(v.to_string()),
            RangeBound::Dynamic { offset } => {
                self.emit_let(idx_name, "i32", &(offset / 4).to_string());
                let member = self.buffer_member(ResourceDescriptor::singleton(
                    ResourceKind::GlobalTemps,
                ))?;
                Ok(format!("{}[{}]", member, idx_name))
            }
        }
    }

    fn generate_graphics_kernel(&mut self, stage: Stage) -> Result<(u32, u32)> {
        let task = self.task;
        self.emit_block(&task.body)?;
        self.out.push_global(snippets::vec4_component_helper());
        let has_input = !self.out.stage_in.is_empty();
        let has_output = !self.out.stage_out.is_empty();
        self.out.signature = snippets::graphics_signature(stage, has_input, has_output);
        if has_output {
            self.out.prologue = "  var stage_output: StageOutput;\n".to_string();
            self.out.epilogue = "  return stage_output;\n".to_string();
        }
        Ok((1, 1))
    }

    // ── Statement emitter ───────────────────────────────────────────────────

    fn emit_block(&mut self, block: &[StmtId]) -> Result<()> {
        for &id in block {
            self.emit_stmt(id)?;
        }
        Ok(())
    }

    fn emit_stmt(&mut self, id: StmtId) -> Result<()> {
        let kernel = self.kernel;
        let stmt = kernel.stmt(id)?;
        match &stmt.kind {
            StmtKind::Const { value } => self.emit_const(id, stmt, *value),
            StmtKind::Rand => self.emit_rand(id, stmt),
            StmtKind::Unary { op, operand } => self.emit_unary(id, stmt, *op, *operand),
            StmtKind::Binary { op, lhs, rhs } => self.emit_binary(id, stmt, *op, *lhs, *rhs),
            StmtKind::RangeFor { begin, end, body } => {
                let var = id.raw_name();
                self.line(&format!("var {} : i32 = {};", var, begin.raw_name()));
                self.line("loop {");
                self.indent += 1;
                self.line(&format!("if ({} >= {}) {{ break; }}", var, end.raw_name()));
                self.emit_block(body)?;
                self.line("continuing {");
                self.indent += 1;
                self.line(&format!("{} = {} + 1;", var, var));
                self.indent -= 1;
                self.line("}");
                self.indent -= 1;
                self.line("}");
                Ok(())
            }
            StmtKind::If {
                cond,
                then_body,
                else_body,
            } => {
                self.line(&format!("if (bool({})) {{", cond.raw_name()));
                self.indent += 1;
                if let Some(body) = then_body {
                    self.emit_block(body)?;
                }
                self.indent -= 1;
                if let Some(body) = else_body {
                    self.line("} else {");
                    self.indent += 1;
                    self.emit_block(body)?;
                    self.indent -= 1;
                }
                self.line("}");
                Ok(())
            }
            StmtKind::While { body } => {
                self.line("loop {");
                self.indent += 1;
                self.emit_block(body)?;
                self.indent -= 1;
                self.line("}");
                Ok(())
            }
            StmtKind::WhileControl => {
                self.line("break;");
                Ok(())
            }
            StmtKind::Continue { scope } => {
                if *scope == LoopScope::Task && self.task.kind != TaskKind::RangeFor {
                    return Err(self.contract(format!(
                        "continue of the task loop in a {} task",
                        self.task.kind.name()
                    )));
                }
                // The grid-stride step lives in the loop's continuing block.
                self.line("continue;");
                Ok(())
            }
            StmtKind::Alloca => {
                let ty = self.wgsl_type(id, stmt, "alloca")?;
                self.line(&format!("var {} : {};", id.raw_name(), ty));
                Ok(())
            }
            StmtKind::LocalLoad { src } => {
                let ty = self.wgsl_type(id, stmt, "local load")?;
                self.emit_let(&id.raw_name(), ty, &src.raw_name());
                Ok(())
            }
            StmtKind::LocalStore { dest, val } => {
                self.line(&format!("{} = {};", dest.raw_name(), val.raw_name()));
                Ok(())
            }
            StmtKind::GetRoot { snode } => {
                let root = self.root_of(*snode)?;
                self.emit_let(&id.raw_name(), "i32", "0");
                self.pointers.insert(id, PointerInfo { root: Some(root) });
                self.root_stmts.insert(root, id);
                Ok(())
            }
            StmtKind::GetCh {
                input_ptr,
                input_snode,
                output_snode,
                chid,
            } => self.emit_get_ch(id, *input_ptr, *input_snode, *output_snode, *chid),
            StmtKind::SNodeLookup {
                snode,
                input_snode,
                input_index,
            } => self.emit_snode_lookup(id, *snode, *input_snode, *input_index),
            StmtKind::GlobalTemporary { offset } => {
                self.emit_let(&id.raw_name(), "i32", &(offset / 4).to_string());
                self.pointers.insert(id, PointerInfo { root: None });
                Ok(())
            }
            StmtKind::GlobalLoad { src } => self.emit_global_load(id, stmt, *src),
            StmtKind::GlobalStore { dest, val } => self.emit_global_store(*dest, *val),
            StmtKind::Atomic { op, dest, val } => self.emit_atomic(id, stmt, *op, *dest, *val),
            StmtKind::LoopIndex { scope, index } => self.emit_loop_index(id, *scope, *index),
            StmtKind::ArgLoad { arg_id, is_ptr } => self.emit_arg_load(id, *arg_id, *is_ptr),
            StmtKind::Return { values } => self.emit_return(values),
            StmtKind::VertexInput { location } | StmtKind::FragmentInput { location } => {
                self.require_graphics(stmt)?;
                let prim = self.stmt_type(id, stmt)?;
                let ty = self.type_name(prim, "stage input")?;
                let member = format!("in_{}_{}", location, ty);
                let interpolate = if prim.is_real() {
                    ""
                } else {
                    " @interpolate(flat)"
                };
                self.out.add_stage_in(format!(
                    "@location({}){} {}: {}",
                    location, interpolate, member, ty
                ));
                self.emit_let(&id.raw_name(), ty, &format!("stage_input.{}", member));
                Ok(())
            }
            StmtKind::VertexOutput { location, value } => {
                self.require_graphics(stmt)?;
                let prim = self.operand_type(*value)?;
                let ty = self.type_name(prim, "vertex output")?;
                let member = format!("out_{}_{}", location, ty);
                let interpolate = if prim.is_real() {
                    ""
                } else {
                    " @interpolate(flat)"
                };
                self.out.add_stage_out(format!(
                    "@location({}){} {}: {}",
                    location, interpolate, member, ty
                ));
                self.line(&format!("stage_output.{} = {};", member, value.raw_name()));
                Ok(())
            }
            StmtKind::BuiltInOutput {
                builtin,
                location,
                values,
            } => self.emit_builtin_output(stmt, *builtin, *location, values),
            StmtKind::Discard => {
                self.line("discard;");
                Ok(())
            }
            StmtKind::Texture {
                texture,
                func,
                operands,
            } => self.emit_texture(id, *texture, *func, operands),
            StmtKind::CompositeExtract { base, index } => {
                let ty = self.wgsl_type(id, stmt, "composite extract")?;
                let lane = match index {
                    0 => "x",
                    1 => "y",
                    2 => "z",
                    3 => "w",
                    _ => {
                        return Err(self.unsupported_op("composite extract index", index));
                    }
                };
                self.emit_let(&id.raw_name(), ty, &format!("{}.{}", base.raw_name(), lane));
                Ok(())
            }
            StmtKind::Ternary { .. } | StmtKind::ExternalPtr { .. } | StmtKind::Print { .. } => {
                Err(self.unsupported_stmt(stmt.kind.name()))
            }
        }
    }

    fn emit_const(&mut self, id: StmtId, stmt: &Stmt, value: ConstValue) -> Result<()> {
        let prim = self.stmt_type(id, stmt)?;
        let literal = match (prim, value) {
            (PrimitiveType::F32, v) => {
                let f = match v {
                    ConstValue::Float(f) => f as f32,
                    ConstValue::Int(i) => i as f32,
                };
                if !f.is_finite() {
                    return Err(self.unsupported_op("constant", f));
                }
                format!("{:?}f", f)
            }
            (PrimitiveType::I32, ConstValue::Int(i)) => {
                let v = i32::try_from(i)
                    .map_err(|_| self.contract(format!("constant {} out of i32 range", i)))?;
                if v == i32::MIN {
                    "(-2147483647 - 1)".to_string()
                } else {
                    v.to_string()
                }
            }
            (PrimitiveType::U32, ConstValue::Int(i)) => {
                let v = u32::try_from(i)
                    .map_err(|_| self.contract(format!("constant {} out of u32 range", i)))?;
                format!("{}u", v)
            }
            (PrimitiveType::I32 | PrimitiveType::U32, ConstValue::Float(f)) => {
                return Err(self.contract(format!("float constant {} typed {}", f, prim)));
            }
            (other, _) => {
                return Err(self.unsupported_type(other, "constant"));
            }
        };
        self.emit_let(&id.raw_name(), prim_name(prim), &literal);
        Ok(())
    }

    fn emit_rand(&mut self, id: StmtId, stmt: &Stmt) -> Result<()> {
        if self.is_graphics() {
            return Err(self.unsupported_in_graphics(stmt));
        }
        let prim = self.stmt_type(id, stmt)?;
        let func = match prim {
            PrimitiveType::I32 => "rand_i32",
            PrimitiveType::U32 => "rand_u32",
            PrimitiveType::F32 => "rand_f32",
            other => return Err(self.unsupported_type(other, "rand")),
        };
        self.init_rand()?;
        self.emit_let(&id.raw_name(), prim_name(prim), &format!("{}(gid3.x)", func));
        Ok(())
    }

    fn emit_unary(&mut self, id: StmtId, stmt: &Stmt, op: UnaryOp, operand: StmtId) -> Result<()> {
        let ty = self.wgsl_type(id, stmt, "unary op")?;
        let x = operand.raw_name();
        let intrinsic = |f: &str| format!("{}({})", f, x);
        let value = match op {
            UnaryOp::Sqrt => intrinsic("sqrt"),
            UnaryOp::Round => intrinsic("round"),
            UnaryOp::Floor => intrinsic("floor"),
            UnaryOp::Ceil => intrinsic("ceil"),
            UnaryOp::Abs => intrinsic("abs"),
            UnaryOp::Sgn => intrinsic("sign"),
            UnaryOp::Sin => intrinsic("sin"),
            UnaryOp::Asin => intrinsic("asin"),
            UnaryOp::Cos => intrinsic("cos"),
            UnaryOp::Acos => intrinsic("acos"),
            UnaryOp::Tan => intrinsic("tan"),
            UnaryOp::Tanh => intrinsic("tanh"),
            UnaryOp::Exp => intrinsic("exp"),
            UnaryOp::Log => intrinsic("log"),
            UnaryOp::Rsqrt => intrinsic("inverseSqrt"),
            UnaryOp::Neg => format!("-{}", x),
            UnaryOp::LogicNot => {
                let zero = zero_literal(self.operand_type(operand)?);
                format!("{}({} == {})", ty, x, zero)
            }
            UnaryOp::BitNot => format!("~{}", x),
            UnaryOp::Inv | UnaryOp::Rcp => format!("(1.0f / f32({}))", x),
            UnaryOp::CastValue => format!("{}({})", ty, x),
            UnaryOp::CastBits => format!("bitcast<{}>({})", ty, x),
        };
        self.emit_let(&id.raw_name(), ty, &format!("{}({})", ty, value));
        Ok(())
    }

    fn emit_binary(
        &mut self,
        id: StmtId,
        stmt: &Stmt,
        op: BinaryOp,
        lhs: StmtId,
        rhs: StmtId,
    ) -> Result<()> {
        let ty = self.wgsl_type(id, stmt, "binary op")?;
        let (l, r) = (lhs.raw_name(), rhs.raw_name());
        let infix = |tok: &str| format!("{} {} {}", l, tok, r);
        let func = |f: &str| format!("{}({}, {})", f, l, r);
        let value = match op {
            BinaryOp::Mul => infix("*"),
            BinaryOp::Add => infix("+"),
            BinaryOp::Sub => infix("-"),
            BinaryOp::Mod => infix("%"),
            BinaryOp::BitAnd => infix("&"),
            BinaryOp::BitOr => infix("|"),
            BinaryOp::BitXor => infix("^"),
            BinaryOp::CmpLt => infix("<"),
            BinaryOp::CmpLe => infix("<="),
            BinaryOp::CmpGt => infix(">"),
            BinaryOp::CmpGe => infix(">="),
            BinaryOp::CmpEq => infix("=="),
            BinaryOp::CmpNe => infix("!="),
            BinaryOp::BitShl => format!("{} << u32({})", l, r),
            BinaryOp::BitSar => format!("{} >> u32({})", l, r),
            BinaryOp::BitShr => {
                if self.operand_type(lhs)?.is_signed() {
                    format!("bitcast<i32>(bitcast<u32>({}) >> u32({}))", l, r)
                } else {
                    format!("{} >> u32({})", l, r)
                }
            }
            BinaryOp::Pow => func("pow"),
            BinaryOp::Atan2 => func("atan2"),
            BinaryOp::Max => func("max"),
            BinaryOp::Min => func("min"),
            BinaryOp::Div => format!("{} / {}", l, r),
            BinaryOp::Truediv => format!("1.0 * {}", self.real_quotient(lhs, rhs)?),
            BinaryOp::Floordiv => format!("floor(1.0 * {})", self.real_quotient(lhs, rhs)?),
        };
        self.emit_let(&id.raw_name(), ty, &format!("{}({})", ty, value));
        Ok(())
    }

    /// `lhs / rhs` with integer operands promoted to f32.
    fn real_quotient(&self, lhs: StmtId, rhs: StmtId) -> Result<String> {
        let promote = |id: StmtId, prim: PrimitiveType| {
            if prim.is_real() {
                id.raw_name()
            } else {
                format!("f32({})", id.raw_name())
            }
        };
        Ok(format!(
            "{} / {}",
            promote(lhs, self.operand_type(lhs)?),
            promote(rhs, self.operand_type(rhs)?)
        ))
    }

    fn emit_get_ch(
        &mut self,
        id: StmtId,
        input_ptr: StmtId,
        input_snode: SNodeId,
        output_snode: SNodeId,
        chid: usize,
    ) -> Result<()> {
        let tree = self.tree_of(input_snode)?;
        let parent = tree
            .node(input_snode)
            .ok_or_else(|| self.contract(format!("unknown snode {}", input_snode.0)))?;
        if parent.children.get(chid) != Some(&output_snode) {
            return Err(self.contract(format!(
                "snode {} is not child {} of snode {}",
                output_snode.0, chid, input_snode.0
            )));
        }
        let child = tree
            .node(output_snode)
            .ok_or_else(|| self.contract(format!("unknown snode {}", output_snode.0)))?;
        let info = self.pointer(input_ptr)?;
        self.emit_let(
            &id.raw_name(),
            "i32",
            &format!(
                "{} + {}",
                input_ptr.raw_name(),
                child.mem_offset_in_parent_cell / 4
            ),
        );
        self.pointers.insert(id, info);
        Ok(())
    }

    fn emit_snode_lookup(
        &mut self,
        id: StmtId,
        snode: SNodeId,
        input_snode: Option<StmtId>,
        input_index: StmtId,
    ) -> Result<()> {
        let root = self.root_of(snode)?;
        let parent = match input_snode {
            Some(p) => p,
            None => *self.root_stmts.get(&root).ok_or_else(|| {
                self.contract(format!("lookup of snode {} before its root pointer", snode.0))
            })?,
        };
        let stride = self
            .tree_of(snode)?
            .node(snode)
            .ok_or_else(|| self.contract(format!("unknown snode {}", snode.0)))?
            .cell_stride;
        let info = self.pointer(parent)?;
        self.emit_let(
            &id.raw_name(),
            "i32",
            &format!(
                "{} + ({} * {})",
                parent.raw_name(),
                stride / 4,
                input_index.raw_name()
            ),
        );
        self.pointers.insert(id, info);
        Ok(())
    }

    fn emit_global_load(&mut self, id: StmtId, stmt: &Stmt, src: StmtId) -> Result<()> {
        let ty = self.wgsl_type(id, stmt, "global load")?;
        let member = self.pointee_member(src)?;
        let p = src.raw_name();
        if self.is_graphics() {
            let word = self.temp("vec4_component");
            self.emit_let(
                &word,
                "i32",
                &format!("find_vec4_component({}[{} >> 2u], {})", member, p, p),
            );
            self.emit_let(&id.raw_name(), ty, &format!("bitcast<{}>({})", ty, word));
        } else {
            self.emit_let(&id.raw_name(), ty, &format!("bitcast<{}>({}[{}])", ty, member, p));
        }
        Ok(())
    }

    fn emit_global_store(&mut self, dest: StmtId, val: StmtId) -> Result<()> {
        if self.is_graphics() {
            return Err(self.unsupported_stmt("global_store (graphics stage)"));
        }
        let member = self.pointee_member(dest)?;
        self.line(&format!(
            "{}[{}] = bitcast<i32>({});",
            member,
            dest.raw_name(),
            val.raw_name()
        ));
        Ok(())
    }

    fn emit_atomic(
        &mut self,
        id: StmtId,
        stmt: &Stmt,
        op: AtomicOp,
        dest: StmtId,
        val: StmtId,
    ) -> Result<()> {
        if self.is_graphics() {
            return Err(self.unsupported_in_graphics(stmt));
        }
        let prim = self.stmt_type(id, stmt)?;
        let root = self
            .pointer(dest)?
            .root
            .ok_or_else(|| self.contract(format!("atomic on non-root pointer {}", dest)))?;
        let member =
            self.buffer_member(ResourceDescriptor::new(ResourceKind::RootAtomicI32, root as i32))?;
        let ptr = format!("&({}[{}])", member, dest.raw_name());
        let v = val.raw_name();

        match prim {
            PrimitiveType::I32 => {
                let func = match op {
                    AtomicOp::Add => "atomicAdd",
                    AtomicOp::Sub => "atomicSub",
                    AtomicOp::Max => "atomicMax",
                    AtomicOp::Min => "atomicMin",
                    AtomicOp::BitAnd => "atomicAnd",
                    AtomicOp::BitOr => "atomicOr",
                    AtomicOp::BitXor => "atomicXor",
                };
                let result = self.temp("atomic_op_result");
                self.line(&format!("var {} : i32;", result));
                self.line(&format!("{} = {}({}, {});", result, func, ptr, v));
                self.emit_let(&id.raw_name(), "i32", &result);
            }
            PrimitiveType::F32 => {
                let result = self.temp("atomic_op_result");
                let old_val = self.temp("old_val");
                let new_val = self.temp("new_val");
                let new_expr = match op {
                    AtomicOp::Add => format!("{} + {}", old_val, v),
                    AtomicOp::Sub => format!("{} - {}", old_val, v),
                    AtomicOp::Max => format!("max({}, {})", old_val, v),
                    AtomicOp::Min => format!("min({}, {})", old_val, v),
                    other => return Err(self.unsupported_op("f32 atomic op", format!("{:?}", other))),
                };
                self.line(&format!("var {} : f32;", result));
                self.line("loop {");
                self.indent += 1;
                self.emit_let(&old_val, "f32", &format!("bitcast<f32>(atomicLoad({}))", ptr));
                self.emit_let(&new_val, "f32", &new_expr);
                self.line(&format!(
                    "if (atomicCompareExchangeWeak({}, bitcast<i32>({}), bitcast<i32>({})).exchanged) {{",
                    ptr, old_val, new_val
                ));
                self.indent += 1;
                self.line(&format!("{} = {};", result, old_val));
                self.line("break;");
                self.indent -= 1;
                self.line("}");
                self.indent -= 1;
                self.line("}");
                self.emit_let(&id.raw_name(), "f32", &result);
            }
            other => return Err(self.unsupported_type(other, "atomic op")),
        }
        Ok(())
    }

    fn emit_loop_index(&mut self, id: StmtId, scope: LoopScope, index: u32) -> Result<()> {
        if index != 0 {
            return Err(self.contract(format!("loop index {} of a 1-D loop", index)));
        }
        let value = match scope {
            LoopScope::Task if self.task.kind == TaskKind::RangeFor => "ii".to_string(),
            LoopScope::Task => {
                return Err(self.contract(format!(
                    "task loop index in a {} task",
                    self.task.kind.name()
                )));
            }
            LoopScope::Stmt(loop_id) => match self.kernel.stmt(loop_id)?.kind {
                StmtKind::RangeFor { .. } => loop_id.raw_name(),
                ref other => {
                    return Err(self.contract(format!(
                        "loop index of a {} statement",
                        other.name()
                    )));
                }
            },
        };
        self.emit_let(&id.raw_name(), "i32", &value);
        Ok(())
    }

    fn emit_arg_load(&mut self, id: StmtId, arg_id: usize, is_ptr: bool) -> Result<()> {
        let ctx = self.ctx;
        let arg = ctx
            .args
            .get(arg_id)
            .ok_or_else(|| self.contract(format!("argument {} out of range", arg_id)))?;
        if is_ptr {
            return Err(self.unsupported_op("argument kind", "pointer"));
        }
        if arg.is_array {
            return Err(self.unsupported_op("argument kind", "array"));
        }
        let ty = self.type_name(arg.dt, "argument")?;
        let member = self.buffer_member(ResourceDescriptor::singleton(ResourceKind::Args))?;
        let word = arg.offset_in_mem / 4;
        if self.is_graphics() {
            let tmp = self.temp("vec4_component");
            self.emit_let(
                &tmp,
                "i32",
                &format!("find_vec4_component({}[{}], {})", member, word / 4, word),
            );
            self.emit_let(&id.raw_name(), ty, &format!("bitcast<{}>({})", ty, tmp));
        } else {
            self.emit_let(&id.raw_name(), ty, &format!("bitcast<{}>({}[{}])", ty, member, word));
        }
        Ok(())
    }

    fn emit_return(&mut self, values: &[StmtId]) -> Result<()> {
        if self.is_graphics() {
            return Err(self.unsupported_stmt("return (graphics stage)"));
        }
        let member = self.buffer_member(ResourceDescriptor::singleton(ResourceKind::Rets))?;
        for (k, value) in values.iter().enumerate() {
            let word = self.ctx.ret_word_index(k).ok_or_else(|| {
                self.contract(format!(
                    "return value {} exceeds {} declared returns",
                    k,
                    self.ctx.rets.len()
                ))
            })?;
            let expr = if self.operand_type(*value)? == PrimitiveType::I32 {
                value.raw_name()
            } else {
                format!("bitcast<i32>({})", value.raw_name())
            };
            self.line(&format!("{}[{}] = {};", member, word, expr));
        }
        Ok(())
    }

    fn emit_builtin_output(
        &mut self,
        stmt: &Stmt,
        builtin: BuiltIn,
        location: u32,
        values: &[StmtId],
    ) -> Result<()> {
        self.require_graphics(stmt)?;
        let first = values
            .first()
            .ok_or_else(|| self.contract("builtin output without values"))?;
        let prim = self.type_name(self.operand_type(*first)?, "builtin output")?;
        let ty = scalar_or_vector_type_name(prim, values.len());
        let expr = vector_expr(values, &ty);
        let (member, decl) = match builtin {
            BuiltIn::Color => {
                let name = format!("color_{}", location);
                let decl = format!("@location({}) {}: {}", location, name, ty);
                (name, decl)
            }
            BuiltIn::Position => (
                "position".to_string(),
                format!("@builtin(position) position: {}", ty),
            ),
            BuiltIn::FragDepth => (
                "frag_depth".to_string(),
                format!("@builtin(frag_depth) frag_depth: {}", ty),
            ),
        };
        self.out.add_stage_out(decl);
        self.line(&format!("stage_output.{} = {};", member, expr));
        Ok(())
    }

    fn emit_texture(
        &mut self,
        id: StmtId,
        texture_id: TextureId,
        func: TextureFunc,
        operands: &[StmtId],
    ) -> Result<()> {
        let texture = self
            .env
            .texture(texture_id)
            .ok_or_else(|| self.contract(format!("unknown texture {}", texture_id.0)))?;
        if texture.is_depth {
            return Err(self.unsupported_op("texture", "depth"));
        }
        let n_coords = texture.dimensionality.coords_components();
        if operands.len() < n_coords {
            return Err(self.contract(format!(
                "texture op with {} operands for {} coordinates",
                operands.len(),
                n_coords
            )));
        }
        let (coords, rest) = operands.split_at(n_coords);
        let coords_prim = self.type_name(self.operand_type(coords[0])?, "texture coordinates")?;
        let coords_expr = vector_expr(coords, &scalar_or_vector_type_name(coords_prim, n_coords));
        let texel_ty =
            scalar_or_vector_type_name(self.type_name(texture.primitive, "texel")?, 4);

        match func {
            TextureFunc::Sample => {
                let tex = self.texture_name(texture, false)?;
                let smp = self.sampler_name(texture)?;
                self.emit_let(
                    &id.raw_name(),
                    &texel_ty,
                    &format!("textureSample({}, {}, {})", tex, smp, coords_expr),
                );
            }
            TextureFunc::Load => {
                let tex = self.texture_name(texture, false)?;
                self.emit_let(
                    &id.raw_name(),
                    &texel_ty,
                    &format!("textureLoad({}, {}, 0)", tex, coords_expr),
                );
            }
            TextureFunc::Store => {
                let first = rest
                    .first()
                    .ok_or_else(|| self.contract("texture store without a value"))?;
                let value_prim = self.type_name(self.operand_type(*first)?, "texel value")?;
                let value_expr =
                    vector_expr(rest, &scalar_or_vector_type_name(value_prim, rest.len()));
                let tex = self.texture_name(texture, true)?;
                self.line(&format!(
                    "textureStore({}, {}, {});",
                    tex, coords_expr, value_expr
                ));
            }
        }
        Ok(())
    }

    // ── Resources ───────────────────────────────────────────────────────────

    /// `name.member` of a buffer resource, declaring it on first use.
    fn buffer_member(&mut self, resource: ResourceDescriptor) -> Result<String> {
        let graphics = self.is_graphics();
        let (raw_type, raw_size) = if graphics { ("vec4<i32>", 16) } else { ("i32", 4) };
        let (name, element_type, element_count) = match resource.kind {
            ResourceKind::RootNormal => (
                format!("root_buffer_{}_", resource.id),
                raw_type.to_string(),
                self.word_count(self.root_size(resource.id)?, raw_size)?,
            ),
            ResourceKind::RootAtomicI32 => (
                format!("root_buffer_{}_atomic_", resource.id),
                "atomic<i32>".to_string(),
                self.word_count(self.root_size(resource.id)?, 4)?,
            ),
            ResourceKind::GlobalTemps => (
                "global_tmps_".to_string(),
                raw_type.to_string(),
                self.word_count(self.options.global_tmps_bytes as u64, raw_size)?,
            ),
            ResourceKind::RandStates => (
                "rand_states_".to_string(),
                "RandState".to_string(),
                self.options.rand_states_count,
            ),
            ResourceKind::Args => (
                "args_".to_string(),
                raw_type.to_string(),
                self.word_count(self.ctx.args_bytes as u64, raw_size)?,
            ),
            ResourceKind::Rets => (
                "rets_".to_string(),
                raw_type.to_string(),
                self.word_count(self.ctx.rets_bytes as u64, raw_size)?,
            ),
            kind => {
                return Err(self.contract(format!("{} is not a buffer", kind.name())));
            }
        };

        let (binding, is_new) = self.bindings.get_or_insert(resource);
        if is_new {
            let space = if graphics && resource.kind != ResourceKind::RootAtomicI32 {
                AddressSpace::Uniform
            } else {
                AddressSpace::Storage
            };
            self.out.push_global(snippets::buffer_decl(&BufferDecl {
                name: &name,
                binding,
                element_type: &element_type,
                element_count,
                space,
            }));
        }
        Ok(format!("{}.member", name))
    }

    fn texture_name(&mut self, texture: &Texture, storage: bool) -> Result<String> {
        let dim = texture.dimensionality.suffix();
        let (kind, name, type_name) = if storage {
            if texture.format.is_empty() {
                return Err(self.contract(format!(
                    "storage texture {} without a texel format",
                    texture.id.0
                )));
            }
            (
                ResourceKind::StorageTexture,
                format!("texture_{}_storage_", texture.id.0),
                format!("texture_storage_{}<{}, write>", dim, texture.format),
            )
        } else {
            let prim = self.type_name(texture.primitive, "texture")?;
            (
                ResourceKind::Texture,
                format!("texture_{}_", texture.id.0),
                format!("texture_{}<{}>", dim, prim),
            )
        };
        let (binding, is_new) = self
            .bindings
            .get_or_insert(ResourceDescriptor::new(kind, texture.id.0));
        if is_new {
            self.out
                .push_global(snippets::handle_decl(&name, binding, &type_name));
        }
        Ok(name)
    }

    fn sampler_name(&mut self, texture: &Texture) -> Result<String> {
        let name = format!("sampler_{}_", texture.id.0);
        let (binding, is_new) = self
            .bindings
            .get_or_insert(ResourceDescriptor::new(ResourceKind::Sampler, texture.id.0));
        if is_new {
            self.out
                .push_global(snippets::handle_decl(&name, binding, "sampler"));
        }
        Ok(name)
    }

    fn init_rand(&mut self) -> Result<()> {
        if self.rand_declared {
            return Ok(());
        }
        self.out.push_global(snippets::rand_state_struct());
        let member = self.buffer_member(ResourceDescriptor::singleton(ResourceKind::RandStates))?;
        self.out.push_global(snippets::rand_functions(&member));
        self.rand_declared = true;
        Ok(())
    }

    // ── Lookups ─────────────────────────────────────────────────────────────

    fn root_of(&self, snode: SNodeId) -> Result<usize> {
        self.env
            .snode_to_root
            .get(&snode)
            .copied()
            .ok_or_else(|| self.contract(format!("snode {} belongs to no memory tree", snode.0)))
    }

    fn tree_of(&self, snode: SNodeId) -> Result<&'a MemoryTree> {
        let root = self.root_of(snode)?;
        let env = self.env;
        env.trees
            .get(root)
            .ok_or_else(|| self.contract(format!("memory tree {} missing", root)))
    }

    fn root_size(&self, root: i32) -> Result<u64> {
        self.env
            .trees
            .get(root as usize)
            .map(|t| t.root_size)
            .ok_or_else(|| self.contract(format!("memory tree {} missing", root)))
    }

    fn pointer(&self, ptr: StmtId) -> Result<PointerInfo> {
        self.pointers
            .get(&ptr)
            .copied()
            .ok_or_else(|| self.contract(format!("no pointer provenance for {}", ptr)))
    }

    /// Buffer member indexed by a pointer statement.
    fn pointee_member(&mut self, ptr: StmtId) -> Result<String> {
        let resource = match self.pointer(ptr)?.root {
            Some(root) => ResourceDescriptor::new(ResourceKind::RootNormal, root as i32),
            None => ResourceDescriptor::singleton(ResourceKind::GlobalTemps),
        };
        self.buffer_member(resource)
    }

    fn stmt_type(&self, id: StmtId, stmt: &Stmt) -> Result<PrimitiveType> {
        stmt.ty
            .ok_or_else(|| self.contract(format!("{} ({}) has no type", id, stmt.kind.name())))
    }

    fn operand_type(&self, id: StmtId) -> Result<PrimitiveType> {
        let stmt = self.kernel.stmt(id)?;
        self.stmt_type(id, stmt)
    }

    fn type_name(&self, prim: PrimitiveType, context: &'static str) -> Result<&'static str> {
        prim.wgsl_name()
            .ok_or_else(|| self.unsupported_type(prim, context))
    }

    fn wgsl_type(&self, id: StmtId, stmt: &Stmt, context: &'static str) -> Result<&'static str> {
        self.type_name(self.stmt_type(id, stmt)?, context)
    }

    fn require_graphics(&self, stmt: &Stmt) -> Result<()> {
        if self.is_graphics() {
            Ok(())
        } else {
            Err(self.contract(format!(
                "{} outside a vertex or fragment task",
                stmt.kind.name()
            )))
        }
    }

    // ── Output helpers ──────────────────────────────────────────────────────

    fn line(&mut self, text: &str) {
        let _ = writeln!(self.out.body, "{}{}", "  ".repeat(self.indent), text);
    }

    fn emit_let(&mut self, name: &str, ty: &str, expr: &str) {
        self.line(&format!("let {} : {} = {};", name, ty, expr));
    }

    fn temp(&mut self, hint: &str) -> String {
        let name = format!("_{}{}", hint, self.temp_counter);
        self.temp_counter += 1;
        name
    }

    // ── Errors ──────────────────────────────────────────────────────────────

    fn contract(&self, reason: impl Into<String>) -> CodegenError {
        CodegenError::contract(format!("task {}", self.name), reason)
    }

    /// Number of `raw_size` elements covering `bytes`.
    fn word_count(&self, bytes: u64, raw_size: u64) -> Result<u32> {
        u32::try_from(bytes.div_ceil(raw_size)).map_err(|_| {
            self.contract(format!(
                "buffer of {} bytes exceeds the addressable element count",
                bytes
            ))
        })
    }

    fn unsupported_stmt(&self, stmt: &str) -> CodegenError {
        CodegenError::UnsupportedStmt {
            task: self.name.clone(),
            stmt: stmt.to_string(),
        }
    }

    fn unsupported_in_graphics(&self, stmt: &Stmt) -> CodegenError {
        self.unsupported_stmt(&format!("{} (graphics stage)", stmt.kind.name()))
    }

    fn unsupported_op(&self, what: &'static str, op: impl ToString) -> CodegenError {
        CodegenError::UnsupportedOp {
            task: self.name.clone(),
            what,
            op: op.to_string(),
        }
    }

    fn unsupported_type(&self, prim: PrimitiveType, context: &'static str) -> CodegenError {
        CodegenError::UnsupportedType {
            task: self.name.clone(),
            ty: prim.name().to_string(),
            context,
        }
    }
}

fn prim_name(prim: PrimitiveType) -> &'static str {
    prim.wgsl_name().unwrap_or("i32")
}

fn zero_literal(prim: PrimitiveType) -> &'static str {
    match prim {
        PrimitiveType::F32 => "0.0f",
        PrimitiveType::U32 => "0u",
        _ => "0",
    }
}

/// A single value name, or a `vecN<T>(..)` constructor over several.
fn vector_expr(values: &[StmtId], type_name: &str) -> String {
    match values {
        [single] => single.raw_name(),
        _ => {
            let parts: Vec<String> = values.iter().map(|v| v.raw_name()).collect();
            format!("{}({})", type_name, parts.join(", "))
        }
    }
}
