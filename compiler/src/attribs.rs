// attribs.rs — Kernel, task and context attributes
//
// The attribute records describe the external contract of generated programs:
// where each argument and return value lives in the packed context buffers,
// which bindings each task uses, and how large a dispatch should be.
//
// Preconditions: kernel argument and return types are fixed.
// Postconditions: every slot offset is a multiple of its element size;
//                 offsets are non-decreasing; returns follow arguments.
// Failure modes: none.
// Side effects: TRACE log per laid-out slot.

use serde::Serialize;

use crate::binding::BindingTable;
use crate::ir::{Kernel, TaskKind};
use crate::types::PrimitiveType;

// ── Context layout ──────────────────────────────────────────────────────────

/// One argument or return slot of the packed context buffer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SlotAttributes {
    pub dt: PrimitiveType,
    /// Bytes occupied by the slot. Array arguments occupy one element.
    pub stride: u32,
    /// Byte offset from the start of the context region.
    pub offset_in_mem: u32,
    /// Position in the argument (or return) list.
    pub index: usize,
    pub is_array: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ContextAttributes {
    pub args: Vec<SlotAttributes>,
    pub rets: Vec<SlotAttributes>,
    pub args_bytes: u32,
    pub rets_bytes: u32,
}

fn align_up(value: u32, align: u32) -> u32 {
    value.div_ceil(align) * align
}

impl ContextAttributes {
    pub fn new(kernel: &Kernel) -> Self {
        Self::from_types(
            kernel.args.iter().map(|a| (a.dt, a.is_array)),
            kernel.rets.iter().map(|r| r.dt),
        )
    }

    /// Lay out arguments then returns in one running byte cursor. The
    /// argument region is padded to the first return's alignment so that
    /// `args_bytes` is the offset of the first return slot.
    pub fn from_types(
        args: impl IntoIterator<Item = (PrimitiveType, bool)>,
        rets: impl IntoIterator<Item = PrimitiveType>,
    ) -> Self {
        let mut cursor = 0u32;
        let mut out = ContextAttributes::default();

        for (index, (dt, is_array)) in args.into_iter().enumerate() {
            let slot = place(&mut cursor, dt, index, is_array);
            tracing::trace!(index, dt = %dt, offset = slot.offset_in_mem, "arg slot");
            out.args.push(slot);
        }

        let rets: Vec<PrimitiveType> = rets.into_iter().collect();
        if let Some(first) = rets.first() {
            cursor = align_up(cursor, first.size());
        }
        out.args_bytes = cursor;

        for (index, dt) in rets.into_iter().enumerate() {
            let slot = place(&mut cursor, dt, index, false);
            tracing::trace!(index, dt = %dt, offset = slot.offset_in_mem, "ret slot");
            out.rets.push(slot);
        }
        out.rets_bytes = cursor - out.args_bytes;
        out
    }

    pub fn has_rets(&self) -> bool {
        self.rets_bytes > 0
    }

    pub fn total_bytes(&self) -> u32 {
        self.args_bytes + self.rets_bytes
    }

    /// Word index of return slot `index` inside the return buffer.
    pub fn ret_word_index(&self, index: usize) -> Option<u32> {
        self.rets
            .get(index)
            .map(|r| (r.offset_in_mem - self.args_bytes) / 4)
    }
}

fn place(cursor: &mut u32, dt: PrimitiveType, index: usize, is_array: bool) -> SlotAttributes {
    let stride = dt.size();
    *cursor = align_up(*cursor, stride);
    let slot = SlotAttributes {
        dt,
        stride,
        offset_in_mem: *cursor,
        index,
        is_array,
    };
    *cursor += stride;
    slot
}

// ── Task attributes ─────────────────────────────────────────────────────────

/// Range of a range-for task. For a dynamic bound the value is the byte
/// offset of the bound in the global temporaries buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RangeForAttributes {
    pub const_begin: bool,
    pub const_end: bool,
    pub begin: i32,
    pub end: i32,
}

impl RangeForAttributes {
    pub fn const_range(&self) -> bool {
        self.const_begin && self.const_end
    }

    /// Signed element count of a constant range, widened so that any pair
    /// of `i32` bounds is representable.
    pub fn num_elems(&self) -> Option<i64> {
        self.const_range()
            .then(|| i64::from(self.end) - i64::from(self.begin))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TaskAttributes {
    pub name: String,
    pub task_type: TaskKind,
    pub bindings: BindingTable,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub range_for: Option<RangeForAttributes>,
    pub advisory_total_num_threads: u32,
    pub advisory_num_threads_per_group: u32,
}

impl TaskAttributes {
    pub fn new(name: String, task_type: TaskKind, bindings: BindingTable) -> Self {
        TaskAttributes {
            name,
            task_type,
            bindings,
            range_for: None,
            advisory_total_num_threads: 1,
            advisory_num_threads_per_group: 1,
        }
    }
}

/// `{kernel}_t{NN}`.
pub fn task_name(kernel: &str, index: usize) -> String {
    format!("{}_t{:02}", kernel, index)
}

#[derive(Debug, Clone, Serialize)]
pub struct KernelAttributes {
    pub name: String,
    pub tasks: Vec<TaskAttributes>,
    pub ctx: ContextAttributes,
    pub is_jit_evaluator: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use PrimitiveType::*;

    #[test]
    fn aligned_offsets() {
        let ctx = ContextAttributes::from_types([(I8, false), (I32, false), (F64, false)], []);
        let offsets: Vec<u32> = ctx.args.iter().map(|a| a.offset_in_mem).collect();
        assert_eq!(offsets, vec![0, 4, 8]);
        assert_eq!(ctx.args_bytes, 16);
        assert!(!ctx.has_rets());
    }

    #[test]
    fn returns_follow_arguments() {
        let ctx = ContextAttributes::from_types([(I32, false), (F32, false)], [I32, F32]);
        assert_eq!(ctx.args_bytes, 8);
        assert_eq!(ctx.rets[0].offset_in_mem, 8);
        assert_eq!(ctx.rets[1].offset_in_mem, 12);
        assert_eq!(ctx.rets_bytes, 8);
        assert_eq!(ctx.ret_word_index(1), Some(1));
        assert_eq!(ctx.total_bytes(), 16);
    }

    #[test]
    fn args_region_padded_to_first_return() {
        let ctx = ContextAttributes::from_types([(U8, false)], [F32]);
        assert_eq!(ctx.args_bytes, 4);
        assert_eq!(ctx.rets[0].offset_in_mem, ctx.args_bytes);
    }

    #[test]
    fn array_args_use_element_stride() {
        let ctx = ContextAttributes::from_types([(F32, true), (I32, false)], []);
        assert_eq!(ctx.args[0].stride, 4);
        assert!(ctx.args[0].is_array);
        assert_eq!(ctx.args[1].offset_in_mem, 4);
    }

    #[test]
    fn range_attribs() {
        let r = RangeForAttributes {
            const_begin: true,
            const_end: true,
            begin: 10,
            end: 110,
        };
        assert_eq!(r.num_elems(), Some(100));
        let r = RangeForAttributes {
            const_end: false,
            ..r
        };
        assert_eq!(r.num_elems(), None);
    }

    #[test]
    fn full_i32_span_does_not_overflow() {
        let r = RangeForAttributes {
            const_begin: true,
            const_end: true,
            begin: i32::MIN,
            end: i32::MAX,
        };
        assert_eq!(r.num_elems(), Some(u32::MAX as i64));
        let r = RangeForAttributes {
            begin: i32::MAX,
            end: -2,
            ..r
        };
        assert_eq!(r.num_elems(), Some(-2 - i32::MAX as i64));
    }

    #[test]
    fn task_names_are_zero_padded() {
        assert_eq!(task_name("fill", 0), "fill_t00");
        assert_eq!(task_name("fill", 12), "fill_t12");
    }
}
