//! Call-Site Resolution Benchmarks
//!
//! Measures the per-call-site cost of the resolution pipeline.
//!
//! # Benchmark Categories
//!
//! 1. **Classification**: descriptor to call kind
//! 2. **Devirtualization**: build + process with an exact receiver
//! 3. **Guarded Devirtualization**: build + process with profile guesses, K = 1..3

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use prism_callsite::handles::ExprId;
use prism_callsite::services::{CallResolution, ClassAttributes, MethodAttributes};
use prism_callsite::site::ReceiverExpr;
use prism_callsite::{
    CallDescriptor, CallSiteId, CallSitePipeline, CallerContext, ClassHandle, MethodHandle,
    PipelineConfig, ProfileRegistry, RuntimePolicy, SigType, Signature, TypeRegistry, classify,
};
use std::sync::Arc;

// =============================================================================
// Benchmark Helpers
// =============================================================================

struct Hierarchy {
    types: Arc<TypeRegistry>,
    profile: Arc<ProfileRegistry>,
    runtime: Arc<RuntimePolicy>,
    base_method: MethodHandle,
    leaves: Vec<ClassHandle>,
}

/// One open base class with `n` sealed leaves, each overriding the base method.
fn build_hierarchy(n: usize) -> Hierarchy {
    let types = Arc::new(TypeRegistry::new());
    let sig = Signature::new(&[SigType::I4], SigType::I4).with_this();
    let base = types.define_class(ClassAttributes::default(), None);
    let base_method = types.define_method(MethodAttributes::virtual_method(base), sig.clone());

    let leaves = (0..n)
        .map(|_| {
            let leaf = types.define_class(
                ClassAttributes {
                    is_sealed: true,
                    ..Default::default()
                },
                Some(base),
            );
            let m = types.define_method(MethodAttributes::virtual_method(leaf), sig.clone());
            types.add_override(base_method, leaf, m);
            leaf
        })
        .collect();

    Hierarchy {
        types,
        profile: Arc::new(ProfileRegistry::new()),
        runtime: Arc::new(RuntimePolicy::new()),
        base_method,
        leaves,
    }
}

fn virtual_desc(h: &Hierarchy) -> CallDescriptor {
    CallDescriptor {
        is_virtual: true,
        ..CallDescriptor::token(
            h.base_method,
            Signature::new(&[SigType::I4], SigType::I4).with_this(),
        )
    }
}

fn caller() -> CallerContext {
    CallerContext::new(MethodHandle::new(u32::MAX), Signature::new(&[], SigType::I4))
}

// =============================================================================
// Classification Benchmarks
// =============================================================================

fn bench_classify(c: &mut Criterion) {
    let mut group = c.benchmark_group("classify");
    let id = CallSiteId::new(MethodHandle::new(1), 0);
    let desc = CallDescriptor::token(MethodHandle::new(2), Signature::default());

    group.bench_function("vtable", |b| {
        b.iter(|| {
            classify(
                black_box(id),
                black_box(&desc),
                Some(CallResolution::VTableSlot { slot: 3 }),
            )
        })
    });

    let calli = CallDescriptor::calli(Signature::default());
    group.bench_function("calli", |b| {
        b.iter(|| classify(black_box(id), black_box(&calli), None))
    });

    group.finish();
}

// =============================================================================
// Devirtualization Benchmarks
// =============================================================================

fn bench_devirtualize_exact(c: &mut Criterion) {
    let h = build_hierarchy(8);
    let pipeline = CallSitePipeline::new(
        PipelineConfig::tier1(),
        h.types.clone(),
        h.profile.clone(),
        h.runtime.clone(),
    );
    let desc = virtual_desc(&h);
    let id = CallSiteId::new(MethodHandle::new(u32::MAX), 0);
    let leaf = h.leaves[3];

    c.bench_function("devirtualize_exact_receiver", |b| {
        b.iter(|| {
            let mut site = pipeline
                .build(id, &desc)
                .expect("classifies")
                .with_receiver_expr(ReceiverExpr::typed(ExprId(0), leaf, true));
            black_box(pipeline.process(&mut site, &mut caller(), 0))
        })
    });
}

// =============================================================================
// Guarded Devirtualization Benchmarks
// =============================================================================

fn bench_guarded(c: &mut Criterion) {
    let mut group = c.benchmark_group("guarded_devirtualization");
    let h = build_hierarchy(8);
    let id = CallSiteId::new(MethodHandle::new(u32::MAX), 4);
    for (i, &leaf) in h.leaves.iter().enumerate() {
        h.profile.record_class(id, leaf, 100 >> i.min(6));
    }
    let desc = virtual_desc(&h);

    for k in 1..=3usize {
        let pipeline = CallSitePipeline::new(
            PipelineConfig::default().with_max_guesses(k),
            h.types.clone(),
            h.profile.clone(),
            h.runtime.clone(),
        );
        group.bench_with_input(BenchmarkId::new("max_guesses", k), &k, |b, _| {
            b.iter(|| {
                let mut site = pipeline
                    .build(id, &desc)
                    .expect("classifies")
                    .with_receiver_expr(ReceiverExpr::opaque(ExprId(0)));
                black_box(pipeline.process(&mut site, &mut caller(), 0))
            })
        });
    }

    group.finish();
}

// =============================================================================
// Criterion Groups
// =============================================================================

criterion_group!(
    pipeline_benches,
    bench_classify,
    bench_devirtualize_exact,
    bench_guarded,
);

criterion_main!(pipeline_benches);
