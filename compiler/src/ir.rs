// ir.rs — Kernel IR, the input contract of the WGSL backend
//
// A `Kernel` holds an arena of statements addressed by `StmtId` and an
// ordered list of tasks, each task owning a root block of that arena. The
// IR arrives fully lowered: every pointer statement names a concrete
// memory-tree node and every argument and return value has a type.
//
// The module tree deserializes from JSON so an external front end can hand
// kernels to the `wgslc` binary. `KernelBuilder` is the programmatic
// equivalent used by tests and benchmarks.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::diag::{CodegenError, Result};
use crate::id::{IdAllocator, SNodeId, StmtId, TextureId};
use crate::types::PrimitiveType;

// ── Module ─────────────────────────────────────────────────────────────────

/// Everything needed to compile a set of kernels into one AOT module.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModuleIr {
    #[serde(default)]
    pub trees: Vec<MemoryTree>,
    #[serde(default)]
    pub textures: Vec<Texture>,
    pub kernels: Vec<Kernel>,
    #[serde(default)]
    pub fields: Vec<FieldDecl>,
}

// ── Memory trees ───────────────────────────────────────────────────────────

/// Compiled layout of one memory-tree root. All root-relative pointers
/// index the flat word buffer of exactly one tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryTree {
    pub root: SNodeId,
    /// Total byte size of the root buffer.
    pub root_size: u64,
    pub nodes: Vec<SNodeDescriptor>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SNodeDescriptor {
    pub id: SNodeId,
    /// Byte stride between consecutive cells of this node.
    pub cell_stride: u32,
    /// Byte offset of this node's component inside one parent cell.
    pub mem_offset_in_parent_cell: u32,
    /// Child nodes in component order (`chid` indexes this list).
    #[serde(default)]
    pub children: Vec<SNodeId>,
    #[serde(default)]
    pub parent: Option<SNodeId>,
    #[serde(default = "default_true")]
    pub dense: bool,
}

fn default_true() -> bool {
    true
}

impl MemoryTree {
    pub fn node(&self, id: SNodeId) -> Option<&SNodeDescriptor> {
        self.nodes.iter().find(|n| n.id == id)
    }
}

/// Map every node of every tree to the index of its tree.
pub fn snode_to_root(trees: &[MemoryTree]) -> HashMap<SNodeId, usize> {
    let mut map = HashMap::new();
    for (root, tree) in trees.iter().enumerate() {
        map.insert(tree.root, root);
        for node in &tree.nodes {
            map.insert(node.id, root);
        }
    }
    map
}

// ── Textures ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TextureDim {
    #[serde(rename = "1d")]
    Dim1d,
    #[serde(rename = "2d")]
    Dim2d,
    #[serde(rename = "3d")]
    Dim3d,
}

impl TextureDim {
    pub fn coords_components(self) -> usize {
        match self {
            TextureDim::Dim1d => 1,
            TextureDim::Dim2d => 2,
            TextureDim::Dim3d => 3,
        }
    }

    pub fn suffix(self) -> &'static str {
        match self {
            TextureDim::Dim1d => "1d",
            TextureDim::Dim2d => "2d",
            TextureDim::Dim3d => "3d",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Texture {
    pub id: TextureId,
    pub dimensionality: TextureDim,
    /// Texel component type.
    pub primitive: PrimitiveType,
    #[serde(default)]
    pub is_depth: bool,
    /// Storage texel format, e.g. `rgba8unorm`. Only used by storage textures.
    #[serde(default)]
    pub format: String,
}

// ── Fields ─────────────────────────────────────────────────────────────────

/// A field exported through the AOT module.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDecl {
    pub name: String,
    /// Representative place node of the field.
    pub snode: SNodeId,
    pub is_scalar: bool,
    pub dtype: PrimitiveType,
    pub shape: Vec<i32>,
    #[serde(default)]
    pub row_num: i32,
    #[serde(default)]
    pub column_num: i32,
}

// ── Kernels ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KernelArg {
    pub dt: PrimitiveType,
    #[serde(default)]
    pub is_array: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KernelRet {
    pub dt: PrimitiveType,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Kernel {
    pub name: String,
    #[serde(default)]
    pub args: Vec<KernelArg>,
    #[serde(default)]
    pub rets: Vec<KernelRet>,
    #[serde(default)]
    pub is_evaluator: bool,
    /// Statement arena; `StmtId(n)` addresses `stmts[n]`.
    pub stmts: Vec<Stmt>,
    pub tasks: Vec<Task>,
}

impl Kernel {
    pub fn stmt(&self, id: StmtId) -> Result<&Stmt> {
        self.stmts.get(id.index()).ok_or_else(|| {
            CodegenError::contract(
                format!("kernel {}", self.name),
                format!(
                    "statement handle {} out of bounds (arena size: {})",
                    id.index(),
                    self.stmts.len()
                ),
            )
        })
    }

    /// Check that every statement handle reachable from a task resolves.
    pub fn validate(&self) -> Result<()> {
        for task in &self.tasks {
            for &id in &task.body {
                self.stmt(id)?;
            }
        }
        for stmt in &self.stmts {
            for id in stmt.kind.operands() {
                self.stmt(id)?;
            }
            for block in stmt.kind.blocks() {
                for &id in block {
                    self.stmt(id)?;
                }
            }
        }
        Ok(())
    }
}

// ── Tasks ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    Serial,
    RangeFor,
    StructFor,
    MeshFor,
    Listgen,
    Gc,
    VertexFor,
    FragmentFor,
}

impl TaskKind {
    pub fn name(self) -> &'static str {
        match self {
            TaskKind::Serial => "serial",
            TaskKind::RangeFor => "range_for",
            TaskKind::StructFor => "struct_for",
            TaskKind::MeshFor => "mesh_for",
            TaskKind::Listgen => "listgen",
            TaskKind::Gc => "gc",
            TaskKind::VertexFor => "vertex_for",
            TaskKind::FragmentFor => "fragment_for",
        }
    }

    pub fn is_graphics(self) -> bool {
        matches!(self, TaskKind::VertexFor | TaskKind::FragmentFor)
    }
}

/// One range bound: a compile-time constant or an i32 loaded from the
/// global temporaries buffer at a byte offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RangeBound {
    Const(i32),
    Dynamic { offset: u32 },
}

impl RangeBound {
    pub fn is_const(self) -> bool {
        matches!(self, RangeBound::Const(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RangeBounds {
    pub begin: RangeBound,
    pub end: RangeBound,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub kind: TaskKind,
    pub body: Block,
    /// Threads per workgroup requested by the front end; 0 = backend default.
    #[serde(default)]
    pub block_dim: u32,
    #[serde(default)]
    pub range: Option<RangeBounds>,
}

impl Task {
    pub fn serial(body: Block) -> Self {
        Task {
            kind: TaskKind::Serial,
            body,
            block_dim: 1,
            range: None,
        }
    }

    pub fn range_for(begin: RangeBound, end: RangeBound, block_dim: u32, body: Block) -> Self {
        Task {
            kind: TaskKind::RangeFor,
            body,
            block_dim,
            range: Some(RangeBounds { begin, end }),
        }
    }

    pub fn vertex(body: Block) -> Self {
        Task {
            kind: TaskKind::VertexFor,
            body,
            block_dim: 1,
            range: None,
        }
    }

    pub fn fragment(body: Block) -> Self {
        Task {
            kind: TaskKind::FragmentFor,
            body,
            block_dim: 1,
            range: None,
        }
    }
}

// ── Statements ─────────────────────────────────────────────────────────────

pub type Block = Vec<StmtId>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stmt {
    /// Element type of the value this statement produces (pointee type for
    /// pointer statements). `None` for statements without a value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ty: Option<PrimitiveType>,
    pub kind: StmtKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConstValue {
    Int(i64),
    Float(f64),
}

/// The loop a `LoopIndex` or `Continue` refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopScope {
    /// The task-level (grid-strided) range-for.
    Task,
    /// An inner `RangeFor` / `While` statement.
    Stmt(StmtId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnaryOp {
    Neg,
    Sqrt,
    Round,
    Floor,
    Ceil,
    Abs,
    Sgn,
    Sin,
    Asin,
    Cos,
    Acos,
    Tan,
    Tanh,
    Exp,
    Log,
    Rsqrt,
    LogicNot,
    BitNot,
    Inv,
    Rcp,
    CastValue,
    CastBits,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BinaryOp {
    Mul,
    Add,
    Sub,
    /// Truncating division.
    Div,
    /// Floating ("true") division.
    Truediv,
    Floordiv,
    Mod,
    Max,
    Min,
    BitAnd,
    BitOr,
    BitXor,
    BitShl,
    BitShr,
    BitSar,
    CmpLt,
    CmpLe,
    CmpGt,
    CmpGe,
    CmpEq,
    CmpNe,
    Pow,
    Atan2,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AtomicOp {
    Add,
    Sub,
    Max,
    Min,
    BitAnd,
    BitOr,
    BitXor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TextureFunc {
    Sample,
    Load,
    Store,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuiltIn {
    Position,
    Color,
    FragDepth,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "stmt", rename_all = "snake_case")]
pub enum StmtKind {
    Const {
        value: ConstValue,
    },
    Rand,
    Unary {
        op: UnaryOp,
        operand: StmtId,
    },
    Binary {
        op: BinaryOp,
        lhs: StmtId,
        rhs: StmtId,
    },
    Ternary {
        cond: StmtId,
        lhs: StmtId,
        rhs: StmtId,
    },
    RangeFor {
        begin: StmtId,
        end: StmtId,
        body: Block,
    },
    If {
        cond: StmtId,
        #[serde(default)]
        then_body: Option<Block>,
        #[serde(default)]
        else_body: Option<Block>,
    },
    While {
        body: Block,
    },
    /// Exit the innermost `While`.
    WhileControl,
    Continue {
        scope: LoopScope,
    },
    Alloca,
    LocalLoad {
        src: StmtId,
    },
    LocalStore {
        dest: StmtId,
        val: StmtId,
    },
    GetRoot {
        snode: SNodeId,
    },
    GetCh {
        input_ptr: StmtId,
        input_snode: SNodeId,
        output_snode: SNodeId,
        chid: usize,
    },
    SNodeLookup {
        snode: SNodeId,
        /// Parent cell pointer; the tree's `GetRoot` when absent.
        #[serde(default)]
        input_snode: Option<StmtId>,
        input_index: StmtId,
    },
    GlobalTemporary {
        offset: u32,
    },
    GlobalLoad {
        src: StmtId,
    },
    GlobalStore {
        dest: StmtId,
        val: StmtId,
    },
    Atomic {
        op: AtomicOp,
        dest: StmtId,
        val: StmtId,
    },
    LoopIndex {
        scope: LoopScope,
        #[serde(default)]
        index: u32,
    },
    ArgLoad {
        arg_id: usize,
        #[serde(default)]
        is_ptr: bool,
    },
    Return {
        values: Vec<StmtId>,
    },
    ExternalPtr {
        arg_id: usize,
        indices: Vec<StmtId>,
    },
    Print {
        contents: Vec<StmtId>,
    },
    VertexInput {
        location: u32,
    },
    FragmentInput {
        location: u32,
    },
    VertexOutput {
        location: u32,
        value: StmtId,
    },
    BuiltInOutput {
        builtin: BuiltIn,
        #[serde(default)]
        location: u32,
        values: Vec<StmtId>,
    },
    Discard,
    Texture {
        texture: TextureId,
        func: TextureFunc,
        operands: Vec<StmtId>,
    },
    CompositeExtract {
        base: StmtId,
        index: u32,
    },
}

impl StmtKind {
    /// Short name of the statement kind, for diagnostics.
    pub fn name(&self) -> &'static str {
        match self {
            StmtKind::Const { .. } => "const",
            StmtKind::Rand => "rand",
            StmtKind::Unary { .. } => "unary",
            StmtKind::Binary { .. } => "binary",
            StmtKind::Ternary { .. } => "ternary",
            StmtKind::RangeFor { .. } => "range_for",
            StmtKind::If { .. } => "if",
            StmtKind::While { .. } => "while",
            StmtKind::WhileControl => "while_control",
            StmtKind::Continue { .. } => "continue",
            StmtKind::Alloca => "alloca",
            StmtKind::LocalLoad { .. } => "local_load",
            StmtKind::LocalStore { .. } => "local_store",
            StmtKind::GetRoot { .. } => "get_root",
            StmtKind::GetCh { .. } => "get_ch",
            StmtKind::SNodeLookup { .. } => "snode_lookup",
            StmtKind::GlobalTemporary { .. } => "global_temporary",
            StmtKind::GlobalLoad { .. } => "global_load",
            StmtKind::GlobalStore { .. } => "global_store",
            StmtKind::Atomic { .. } => "atomic",
            StmtKind::LoopIndex { .. } => "loop_index",
            StmtKind::ArgLoad { .. } => "arg_load",
            StmtKind::Return { .. } => "return",
            StmtKind::ExternalPtr { .. } => "external_ptr",
            StmtKind::Print { .. } => "print",
            StmtKind::VertexInput { .. } => "vertex_input",
            StmtKind::FragmentInput { .. } => "fragment_input",
            StmtKind::VertexOutput { .. } => "vertex_output",
            StmtKind::BuiltInOutput { .. } => "builtin_output",
            StmtKind::Discard => "discard",
            StmtKind::Texture { .. } => "texture",
            StmtKind::CompositeExtract { .. } => "composite_extract",
        }
    }

    /// Value operands (edges into other statements), excluding nested blocks.
    pub fn operands(&self) -> Vec<StmtId> {
        match self {
            StmtKind::Const { .. }
            | StmtKind::Rand
            | StmtKind::WhileControl
            | StmtKind::Alloca
            | StmtKind::GetRoot { .. }
            | StmtKind::GlobalTemporary { .. }
            | StmtKind::ArgLoad { .. }
            | StmtKind::VertexInput { .. }
            | StmtKind::FragmentInput { .. }
            | StmtKind::Discard
            | StmtKind::While { .. } => Vec::new(),
            StmtKind::Unary { operand, .. } => vec![*operand],
            StmtKind::Binary { lhs, rhs, .. } => vec![*lhs, *rhs],
            StmtKind::Ternary { cond, lhs, rhs } => vec![*cond, *lhs, *rhs],
            StmtKind::RangeFor { begin, end, .. } => vec![*begin, *end],
            StmtKind::If { cond, .. } => vec![*cond],
            StmtKind::Continue { scope } | StmtKind::LoopIndex { scope, .. } => match scope {
                LoopScope::Task => Vec::new(),
                LoopScope::Stmt(id) => vec![*id],
            },
            StmtKind::LocalLoad { src } | StmtKind::GlobalLoad { src } => vec![*src],
            StmtKind::LocalStore { dest, val }
            | StmtKind::GlobalStore { dest, val }
            | StmtKind::Atomic { dest, val, .. } => vec![*dest, *val],
            StmtKind::GetCh { input_ptr, .. } => vec![*input_ptr],
            StmtKind::SNodeLookup {
                input_snode,
                input_index,
                ..
            } => input_snode.iter().copied().chain([*input_index]).collect(),
            StmtKind::Return { values } | StmtKind::BuiltInOutput { values, .. } => values.clone(),
            StmtKind::ExternalPtr { indices, .. } => indices.clone(),
            StmtKind::Print { contents } => contents.clone(),
            StmtKind::VertexOutput { value, .. } => vec![*value],
            StmtKind::Texture { operands, .. } => operands.clone(),
            StmtKind::CompositeExtract { base, .. } => vec![*base],
        }
    }

    /// Nested statement blocks, in emission order.
    pub fn blocks(&self) -> Vec<&Block> {
        match self {
            StmtKind::RangeFor { body, .. } | StmtKind::While { body } => vec![body],
            StmtKind::If {
                then_body,
                else_body,
                ..
            } => then_body.iter().chain(else_body.iter()).collect(),
            _ => Vec::new(),
        }
    }
}

// ── Builder ────────────────────────────────────────────────────────────────

/// Incremental constructor for a `Kernel` and its statement arena.
pub struct KernelBuilder {
    name: String,
    args: Vec<KernelArg>,
    rets: Vec<KernelRet>,
    is_evaluator: bool,
    stmts: Vec<Stmt>,
    ids: IdAllocator,
    tasks: Vec<Task>,
}

impl KernelBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        KernelBuilder {
            name: name.into(),
            args: Vec::new(),
            rets: Vec::new(),
            is_evaluator: false,
            stmts: Vec::new(),
            ids: IdAllocator::new(),
            tasks: Vec::new(),
        }
    }

    /// Declare a kernel argument and return its index.
    pub fn arg(&mut self, dt: PrimitiveType, is_array: bool) -> usize {
        self.args.push(KernelArg { dt, is_array });
        self.args.len() - 1
    }

    pub fn ret(&mut self, dt: PrimitiveType) -> usize {
        self.rets.push(KernelRet { dt });
        self.rets.len() - 1
    }

    pub fn evaluator(&mut self, is_evaluator: bool) -> &mut Self {
        self.is_evaluator = is_evaluator;
        self
    }

    pub fn push(&mut self, ty: Option<PrimitiveType>, kind: StmtKind) -> StmtId {
        let id = self.ids.alloc_stmt();
        debug_assert_eq!(id.index(), self.stmts.len());
        self.stmts.push(Stmt { ty, kind });
        id
    }

    pub fn const_i32(&mut self, v: i32) -> StmtId {
        self.push(
            Some(PrimitiveType::I32),
            StmtKind::Const {
                value: ConstValue::Int(v as i64),
            },
        )
    }

    pub fn const_u32(&mut self, v: u32) -> StmtId {
        self.push(
            Some(PrimitiveType::U32),
            StmtKind::Const {
                value: ConstValue::Int(v as i64),
            },
        )
    }

    pub fn const_f32(&mut self, v: f32) -> StmtId {
        self.push(
            Some(PrimitiveType::F32),
            StmtKind::Const {
                value: ConstValue::Float(v as f64),
            },
        )
    }

    pub fn unary(&mut self, op: UnaryOp, ty: PrimitiveType, operand: StmtId) -> StmtId {
        self.push(Some(ty), StmtKind::Unary { op, operand })
    }

    pub fn binary(&mut self, op: BinaryOp, ty: PrimitiveType, lhs: StmtId, rhs: StmtId) -> StmtId {
        self.push(Some(ty), StmtKind::Binary { op, lhs, rhs })
    }

    pub fn get_root(&mut self, snode: SNodeId) -> StmtId {
        self.push(None, StmtKind::GetRoot { snode })
    }

    pub fn lookup(&mut self, snode: SNodeId, parent: Option<StmtId>, index: StmtId) -> StmtId {
        self.push(
            None,
            StmtKind::SNodeLookup {
                snode,
                input_snode: parent,
                input_index: index,
            },
        )
    }

    pub fn get_ch(
        &mut self,
        ty: PrimitiveType,
        input_ptr: StmtId,
        input_snode: SNodeId,
        output_snode: SNodeId,
        chid: usize,
    ) -> StmtId {
        self.push(
            Some(ty),
            StmtKind::GetCh {
                input_ptr,
                input_snode,
                output_snode,
                chid,
            },
        )
    }

    pub fn global_tmp(&mut self, ty: PrimitiveType, offset: u32) -> StmtId {
        self.push(Some(ty), StmtKind::GlobalTemporary { offset })
    }

    pub fn load(&mut self, ty: PrimitiveType, src: StmtId) -> StmtId {
        self.push(Some(ty), StmtKind::GlobalLoad { src })
    }

    pub fn store(&mut self, dest: StmtId, val: StmtId) -> StmtId {
        self.push(None, StmtKind::GlobalStore { dest, val })
    }

    pub fn atomic(&mut self, op: AtomicOp, ty: PrimitiveType, dest: StmtId, val: StmtId) -> StmtId {
        self.push(Some(ty), StmtKind::Atomic { op, dest, val })
    }

    pub fn arg_load(&mut self, arg_id: usize, ty: PrimitiveType) -> StmtId {
        self.push(
            Some(ty),
            StmtKind::ArgLoad {
                arg_id,
                is_ptr: false,
            },
        )
    }

    pub fn return_values(&mut self, values: Vec<StmtId>) -> StmtId {
        self.push(None, StmtKind::Return { values })
    }

    pub fn loop_index(&mut self, scope: LoopScope) -> StmtId {
        self.push(
            Some(PrimitiveType::I32),
            StmtKind::LoopIndex { scope, index: 0 },
        )
    }

    pub fn rand(&mut self, ty: PrimitiveType) -> StmtId {
        self.push(Some(ty), StmtKind::Rand)
    }

    pub fn task(&mut self, task: Task) -> &mut Self {
        self.tasks.push(task);
        self
    }

    pub fn build(self) -> Kernel {
        Kernel {
            name: self.name,
            args: self.args,
            rets: self.rets,
            is_evaluator: self.is_evaluator,
            stmts: self.stmts,
            tasks: self.tasks,
        }
    }
}
