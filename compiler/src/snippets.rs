// snippets.rs — Structured builders for boilerplate WGSL
//
// Each builder takes its parameters by name and returns finished text.
// Nothing here is a template with placeholder tokens.
//
// Side effects: none.

use std::fmt::Write as _;

/// Memory space of a context or root buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressSpace {
    Storage,
    Uniform,
}

impl AddressSpace {
    fn spelling(self) -> &'static str {
        match self {
            AddressSpace::Storage => "storage, read_write",
            AddressSpace::Uniform => "uniform",
        }
    }
}

pub struct BufferDecl<'a> {
    pub name: &'a str,
    pub binding: u32,
    pub element_type: &'a str,
    pub element_count: u32,
    pub space: AddressSpace,
}

/// Struct wrapper plus variable declaration of one buffer resource.
pub fn buffer_decl(decl: &BufferDecl<'_>) -> String {
    let mut s = String::new();
    let _ = writeln!(s, "struct {}_type {{", decl.name);
    let _ = writeln!(
        s,
        "  member: array<{}, {}>,",
        decl.element_type,
        decl.element_count.max(1)
    );
    let _ = writeln!(s, "}}");
    let _ = writeln!(s, "@group(0) @binding({})", decl.binding);
    let _ = writeln!(
        s,
        "var<{}> {}: {}_type;",
        decl.space.spelling(),
        decl.name,
        decl.name
    );
    s
}

/// `var name: type_name<template_args>;`, used for textures and samplers.
pub fn handle_decl(name: &str, binding: u32, type_name: &str) -> String {
    format!("@group(0) @binding({})\nvar {}: {};\n", binding, name, type_name)
}

pub fn compute_signature(block_size_x: u32) -> String {
    format!(
        "@compute @workgroup_size({}, 1, 1)\n\
         fn main(\n  \
         @builtin(global_invocation_id) gid3 : vec3<u32>,\n  \
         @builtin(num_workgroups) n_workgroups : vec3<u32>\n\
         ) {{\n",
        block_size_x
    )
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Vertex,
    Fragment,
}

impl Stage {
    pub fn attribute(self) -> &'static str {
        match self {
            Stage::Vertex => "@vertex",
            Stage::Fragment => "@fragment",
        }
    }
}

pub fn graphics_signature(stage: Stage, has_input: bool, has_output: bool) -> String {
    let input = if has_input {
        "stage_input: StageInput"
    } else {
        ""
    };
    let output = if has_output { " -> StageOutput" } else { "" };
    format!("{}\nfn main({}){} {{\n", stage.attribute(), input, output)
}

/// `struct Name { members }` with one member per line.
pub fn struct_decl(name: &str, members: &[String]) -> String {
    let mut s = String::new();
    let _ = writeln!(s, "struct {} {{", name);
    for m in members {
        let _ = writeln!(s, "  {},", m);
    }
    let _ = writeln!(s, "}}");
    s
}

/// Select a lane of a 16-byte uniform element by word index.
pub fn vec4_component_helper() -> String {
    let mut s = String::new();
    s.push_str("fn find_vec4_component(v: vec4<i32>, index: i32) -> i32 {\n");
    for (lane, field) in ["x", "y", "z"].iter().enumerate() {
        let _ = writeln!(s, "  if ((index & 3) == {}) {{", lane);
        let _ = writeln!(s, "    return v.{};", field);
        s.push_str("  }\n");
    }
    s.push_str("  return v.w;\n");
    s.push_str("}\n");
    s
}

pub fn rand_state_struct() -> String {
    struct_decl(
        "RandState",
        &[
            "x: u32".to_string(),
            "y: u32".to_string(),
            "z: u32".to_string(),
            "w: u32".to_string(),
        ],
    )
}

/// xorshift128 generator over a per-invocation state buffer. A state that
/// is all zero is seeded from the invocation id on first draw.
pub fn rand_functions(states_member: &str) -> String {
    let mut s = String::new();
    s.push_str("fn rand_u32(id: u32) -> u32 {\n");
    let _ = writeln!(s, "  var state : RandState = {}[id];", states_member);
    s.push_str("  if (state.x == 0u && state.y == 0u && state.z == 0u && state.w == 0u) {\n");
    s.push_str("    state.x = 123456789u * id * 1000000007u;\n");
    s.push_str("    state.y = 362436069u;\n");
    s.push_str("    state.z = 521288629u;\n");
    s.push_str("    state.w = 88675123u;\n");
    s.push_str("  }\n");
    s.push_str("  let t : u32 = state.x ^ (state.x << 11u);\n");
    s.push_str("  state.x = state.y;\n");
    s.push_str("  state.y = state.z;\n");
    s.push_str("  state.z = state.w;\n");
    s.push_str("  state.w = (state.w ^ (state.w >> 19u)) ^ (t ^ (t >> 8u));\n");
    s.push_str("  let result : u32 = state.w * 1000000007u;\n");
    let _ = writeln!(s, "  {}[id] = state;", states_member);
    s.push_str("  return result;\n");
    s.push_str("}\n\n");

    s.push_str("fn rand_f32(id: u32) -> f32 {\n");
    s.push_str("  let u32_res : u32 = rand_u32(id);\n");
    s.push_str("  return f32(u32_res) * (1.0f / 4294967296.0f);\n");
    s.push_str("}\n\n");

    s.push_str("fn rand_i32(id: u32) -> i32 {\n");
    s.push_str("  let u32_res : u32 = rand_u32(id);\n");
    s.push_str("  return i32(u32_res);\n");
    s.push_str("}\n");
    s
}
