use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::path::Path;
use wgslc::codegen::{generate_kernel, CodegenOptions, ModuleEnv};
use wgslc::id::SNodeId;
use wgslc::ir::{
    BinaryOp, Kernel, KernelBuilder, LoopScope, MemoryTree, RangeBound, SNodeDescriptor, Task,
};
use wgslc::pipeline;
use wgslc::types::PrimitiveType;

// KPI-aligned benchmark scenarios: the module fixture end to end, and
// single-kernel emission at growing body sizes.

fn fixture_source() -> String {
    let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/saxpy.json");
    std::fs::read_to_string(path).expect("benchmark fixture must exist")
}

fn flat_tree() -> Vec<MemoryTree> {
    vec![MemoryTree {
        root: SNodeId(0),
        root_size: 1 << 20,
        nodes: vec![
            SNodeDescriptor {
                id: SNodeId(0),
                cell_stride: 1 << 20,
                mem_offset_in_parent_cell: 0,
                children: vec![SNodeId(1)],
                parent: None,
                dense: true,
            },
            SNodeDescriptor {
                id: SNodeId(1),
                cell_stride: 4,
                mem_offset_in_parent_cell: 0,
                children: vec![SNodeId(2)],
                parent: Some(SNodeId(0)),
                dense: true,
            },
            SNodeDescriptor {
                id: SNodeId(2),
                cell_stride: 4,
                mem_offset_in_parent_cell: 0,
                children: vec![],
                parent: Some(SNodeId(1)),
                dense: true,
            },
        ],
    }]
}

/// Range-for kernel that loads one element and folds `n_ops` additions
/// into it before storing it back.
fn generate_scaling_kernel(n_ops: usize) -> Kernel {
    let mut kb = KernelBuilder::new("scale");
    let i = kb.loop_index(LoopScope::Task);
    let root = kb.get_root(SNodeId(0));
    let cell = kb.lookup(SNodeId(1), Some(root), i);
    let ptr = kb.get_ch(PrimitiveType::F32, cell, SNodeId(1), SNodeId(2), 0);
    let mut acc = kb.load(PrimitiveType::F32, ptr);
    let mut body = vec![i, root, cell, ptr, acc];
    for k in 0..n_ops {
        let c = kb.const_f32(k as f32 * 0.5);
        acc = kb.binary(BinaryOp::Add, PrimitiveType::F32, acc, c);
        body.extend([c, acc]);
    }
    body.push(kb.store(ptr, acc));
    kb.task(Task::range_for(RangeBound::Const(0), RangeBound::Const(1 << 18), 128, body));
    kb.build()
}

// KPI: parse + generate + package the fixture module.
fn bench_kpi_module_compile_latency(c: &mut Criterion) {
    let source = fixture_source();
    c.bench_function("kpi/module_compile_latency", |b| {
        b.iter(|| {
            let module = pipeline::parse_module(black_box(&source)).unwrap();
            let builder = pipeline::compile_module(&module, CodegenOptions::default()).unwrap();
            black_box(pipeline::render_wgsl(&builder));
        });
    });
}

// KPI: emitter scaling vs kernel body size.
fn bench_kpi_codegen_scaling(c: &mut Criterion) {
    let mut group = c.benchmark_group("kpi/codegen_scaling");
    let trees = flat_tree();
    let env = ModuleEnv::new(&trees, &[]);
    let opts = CodegenOptions::default();

    for n_ops in [10_usize, 100, 1000, 5000] {
        let kernel = generate_scaling_kernel(n_ops);
        group.bench_with_input(
            BenchmarkId::from_parameter(format!("{}ops", n_ops)),
            &kernel,
            |b, kernel| {
                b.iter(|| black_box(generate_kernel(black_box(kernel), &env, &opts).unwrap()));
            },
        );
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_kpi_module_compile_latency,
    bench_kpi_codegen_scaling,
);
criterion_main!(benches);
