// assemble.rs — Program assembler
//
// A task's program is built in separate fragments that are filled in any
// order during emission and concatenated once at the end:
// globals, stage input struct, stage output struct, signature, prologue,
// body, epilogue, closing brace.
//
// Side effects: none.

use crate::snippets::struct_decl;

#[derive(Debug, Default)]
pub struct ProgramFragments {
    /// Module-scope declarations in first-declared order.
    pub globals: Vec<String>,
    pub stage_in: Vec<String>,
    pub stage_out: Vec<String>,
    pub signature: String,
    pub prologue: String,
    pub body: String,
    pub epilogue: String,
}

impl ProgramFragments {
    pub fn push_global(&mut self, decl: String) {
        self.globals.push(decl);
    }

    /// Add a stage struct member once; repeated reads of one location share it.
    pub fn add_stage_in(&mut self, member: String) {
        if !self.stage_in.contains(&member) {
            self.stage_in.push(member);
        }
    }

    pub fn add_stage_out(&mut self, member: String) {
        if !self.stage_out.contains(&member) {
            self.stage_out.push(member);
        }
    }

    pub fn assemble(&self) -> String {
        let mut out = String::new();
        for decl in &self.globals {
            out.push_str(decl);
            out.push('\n');
        }
        if !self.stage_in.is_empty() {
            out.push_str(&struct_decl("StageInput", &self.stage_in));
            out.push('\n');
        }
        if !self.stage_out.is_empty() {
            out.push_str(&struct_decl("StageOutput", &self.stage_out));
            out.push('\n');
        }
        out.push_str(&self.signature);
        out.push_str(&self.prologue);
        out.push_str(&self.body);
        out.push_str(&self.epilogue);
        out.push_str("}\n");
        out
    }
}
