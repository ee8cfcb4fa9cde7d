// Property-based tests for layout and emission invariants.
//
// Four categories:
// 1. Context layout: slot offsets are aligned, ordered and non-overlapping
// 2. Binding allocation: first use decides the slot, repeats reuse it
// 3. Constant literals: every finite value emits a WGSL literal that reads back
// 4. Range-for dispatch: constant ranges advertise exactly their element count
//
// Uses proptest with explicit configuration to prevent CI flakiness.

use proptest::prelude::*;
use wgslc::attribs::ContextAttributes;
use wgslc::binding::{BindingTable, ResourceDescriptor, ResourceKind};
use wgslc::codegen::{generate_kernel, CodegenOptions, ModuleEnv};
use wgslc::ir::{KernelBuilder, LoopScope, RangeBound, Task};
use wgslc::types::{PrimitiveType, ALL_PRIMITIVE_TYPES};

// ── Generators ──────────────────────────────────────────────────────────────

fn arb_primitive() -> impl Strategy<Value = PrimitiveType> {
    (0..ALL_PRIMITIVE_TYPES.len()).prop_map(|i| ALL_PRIMITIVE_TYPES[i])
}

fn arb_resource() -> impl Strategy<Value = ResourceDescriptor> {
    let kind = prop_oneof![
        Just(ResourceKind::RootNormal),
        Just(ResourceKind::RootAtomicI32),
        Just(ResourceKind::GlobalTemps),
        Just(ResourceKind::RandStates),
        Just(ResourceKind::Args),
        Just(ResourceKind::Rets),
        Just(ResourceKind::Texture),
        Just(ResourceKind::StorageTexture),
        Just(ResourceKind::Sampler),
    ];
    (kind, 0..3i32).prop_map(|(kind, id)| ResourceDescriptor::new(kind, id))
}

fn ci_config() -> ProptestConfig {
    ProptestConfig {
        cases: 256,
        ..ProptestConfig::default()
    }
}

// ── Context layout ──────────────────────────────────────────────────────────

proptest! {
    #![proptest_config(ci_config())]

    #[test]
    fn layout_slots_are_aligned_and_ordered(
        args in prop::collection::vec(arb_primitive(), 0..8),
        rets in prop::collection::vec(arb_primitive(), 0..4),
    ) {
        let ctx = ContextAttributes::from_types(
            args.iter().map(|&dt| (dt, false)),
            rets.iter().copied(),
        );
        prop_assert_eq!(ctx.args.len(), args.len());
        prop_assert_eq!(ctx.rets.len(), rets.len());

        let mut end = 0u32;
        for slot in ctx.args.iter().chain(ctx.rets.iter()) {
            prop_assert_eq!(slot.offset_in_mem % slot.stride, 0);
            prop_assert!(slot.offset_in_mem >= end, "slot overlaps its predecessor");
            end = slot.offset_in_mem + slot.stride;
        }
        prop_assert_eq!(ctx.total_bytes(), end);

        for slot in &ctx.args {
            prop_assert!(slot.offset_in_mem + slot.stride <= ctx.args_bytes);
        }
        match ctx.rets.first() {
            Some(first) => prop_assert_eq!(first.offset_in_mem, ctx.args_bytes),
            None => prop_assert_eq!(ctx.rets_bytes, 0),
        }
    }

    #[test]
    fn ret_word_indices_are_relative_to_rets(
        rets in prop::collection::vec(Just(PrimitiveType::I32), 1..6),
        n_args in 0usize..5,
    ) {
        let ctx = ContextAttributes::from_types(
            std::iter::repeat((PrimitiveType::F32, false)).take(n_args),
            rets.iter().copied(),
        );
        for k in 0..rets.len() {
            prop_assert_eq!(ctx.ret_word_index(k), Some(k as u32));
        }
        prop_assert_eq!(ctx.ret_word_index(rets.len()), None);
    }
}

// ── Binding allocation ──────────────────────────────────────────────────────

proptest! {
    #![proptest_config(ci_config())]

    #[test]
    fn bindings_follow_first_use(
        base in 0u32..8,
        uses in prop::collection::vec(arb_resource(), 0..24),
    ) {
        let mut table = BindingTable::new(base);
        let mut first_seen: Vec<ResourceDescriptor> = Vec::new();
        for r in &uses {
            let (binding, is_new) = table.get_or_insert(*r);
            match first_seen.iter().position(|s| s == r) {
                Some(pos) => {
                    prop_assert!(!is_new);
                    prop_assert_eq!(binding, base + pos as u32);
                }
                None => {
                    prop_assert!(is_new);
                    prop_assert_eq!(binding, base + first_seen.len() as u32);
                    first_seen.push(*r);
                }
            }
        }
        prop_assert_eq!(table.len(), first_seen.len());
        prop_assert_eq!(table.next_binding(), base + first_seen.len() as u32);
        for (entry, r) in table.entries().iter().zip(&first_seen) {
            prop_assert_eq!(&entry.resource, r);
        }
    }
}

// ── Constant literals ───────────────────────────────────────────────────────

fn single_const_program(build: impl FnOnce(&mut KernelBuilder) -> wgslc::id::StmtId) -> String {
    let mut kb = KernelBuilder::new("c");
    let c = build(&mut kb);
    kb.task(Task::serial(vec![c]));
    let env = ModuleEnv::new(&[], &[]);
    generate_kernel(&kb.build(), &env, &CodegenOptions::default())
        .unwrap_or_else(|e| panic!("codegen failed: {}", e))
        .task_programs
        .remove(0)
}

fn literal_of(wgsl: &str, ty: &str) -> String {
    let prefix = format!("  let tmp0 : {} = ", ty);
    let line = wgsl
        .lines()
        .find(|l| l.starts_with(&prefix))
        .unwrap_or_else(|| panic!("no constant line in\n{}", wgsl));
    line[prefix.len()..line.len() - 1].to_string()
}

proptest! {
    #![proptest_config(ci_config())]

    #[test]
    fn i32_literals_read_back(v in (i32::MIN + 1)..=i32::MAX) {
        let wgsl = single_const_program(|kb| kb.const_i32(v));
        prop_assert_eq!(literal_of(&wgsl, "i32").parse::<i32>().unwrap(), v);
    }

    #[test]
    fn u32_literals_carry_suffix(v in any::<u32>()) {
        let wgsl = single_const_program(|kb| kb.const_u32(v));
        let lit = literal_of(&wgsl, "u32");
        prop_assert!(lit.ends_with('u'), "{}", lit);
        prop_assert_eq!(lit.trim_end_matches('u').parse::<u32>().unwrap(), v);
    }

    #[test]
    fn f32_literals_read_back(v in -1.0e30f32..1.0e30f32) {
        let wgsl = single_const_program(|kb| kb.const_f32(v));
        let lit = literal_of(&wgsl, "f32");
        prop_assert!(lit.ends_with('f'), "{}", lit);
        prop_assert_eq!(lit.trim_end_matches('f').parse::<f32>().unwrap(), v);
    }
}

// ── Range-for dispatch ──────────────────────────────────────────────────────

proptest! {
    #![proptest_config(ci_config())]

    #[test]
    fn const_ranges_dispatch_their_length(
        begin in -1000i32..1000,
        len in 0i32..100_000,
        block in prop_oneof![Just(0u32), Just(32u32), Just(64u32), Just(256u32)],
    ) {
        let mut kb = KernelBuilder::new("r");
        let i = kb.loop_index(LoopScope::Task);
        kb.task(Task::range_for(
            RangeBound::Const(begin),
            RangeBound::Const(begin + len),
            block,
            vec![i],
        ));
        let env = ModuleEnv::new(&[], &[]);
        let options = CodegenOptions::default();
        let out = generate_kernel(&kb.build(), &env, &options).unwrap();
        let task = &out.attribs.tasks[0];
        prop_assert_eq!(task.advisory_total_num_threads, len as u32);
        let expected_block = if block == 0 { options.default_block_dim } else { block };
        prop_assert_eq!(task.advisory_num_threads_per_group, expected_block);
        let expected_begin = format!("let begin_ : i32 = {};", begin);
        let expected_end = format!("let end_ : i32 = {};", begin + len);
        prop_assert!(out.task_programs[0].contains(&expected_begin));
        prop_assert!(out.task_programs[0].contains(&expected_end));
    }
}

proptest! {
    #![proptest_config(ci_config())]

    #[test]
    fn any_constant_range_either_dispatches_or_is_rejected(
        begin in any::<i32>(),
        end in any::<i32>(),
    ) {
        let mut kb = KernelBuilder::new("r");
        let i = kb.loop_index(LoopScope::Task);
        kb.task(Task::range_for(RangeBound::Const(begin), RangeBound::Const(end), 64, vec![i]));
        let env = ModuleEnv::new(&[], &[]);
        let span = i64::from(end) - i64::from(begin);
        match generate_kernel(&kb.build(), &env, &CodegenOptions::default()) {
            Ok(out) => {
                prop_assert!(span <= i64::from(i32::MAX));
                prop_assert_eq!(
                    i64::from(out.attribs.tasks[0].advisory_total_num_threads),
                    span.max(0)
                );
            }
            Err(err) => {
                prop_assert!(span > i64::from(i32::MAX), "{}", err);
                prop_assert_eq!(err.code().0, "E0200");
            }
        }
    }
}
