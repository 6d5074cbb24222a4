//! Resolution benchmarks

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use fluentai_di::{Composer, ScopeContext, ScopeRegistry};

struct Service {
    value: u64,
}

fn registry_with_services(count: usize) -> ScopeRegistry {
    let registry = ScopeRegistry::new();
    for i in 0..count {
        registry
            .register(
                Composer::builder::<u64>()
                    .id(format!("service-{}", i))
                    .scoped("tenant")
                    .when("tenant", format!("t{}", i))
                    .supplier(move || i as u64)
                    .unwrap(),
            )
            .unwrap();
    }
    registry
        .register(
            Composer::builder::<Service>()
                .supplier(|| Service { value: 42 })
                .unwrap(),
        )
        .unwrap();
    registry
}

fn benchmark_cached_resolution(c: &mut Criterion) {
    let mut group = c.benchmark_group("cached_resolution");

    for count in [1, 10, 100] {
        let registry = registry_with_services(count);
        let tenant = registry
            .ensure_scope(
                "tenant-0",
                "tenant",
                None,
                Some(ScopeContext::from([("tenant", "t0")])),
            )
            .unwrap();
        tenant.resolve::<u64>().unwrap();

        group.bench_with_input(BenchmarkId::new("own_scope", count), &tenant, |b, tenant| {
            b.iter(|| black_box(tenant.resolve::<u64>().unwrap()));
        });
        group.bench_with_input(BenchmarkId::new("delegated", count), &tenant, |b, tenant| {
            b.iter(|| black_box(tenant.resolve::<Service>().unwrap().value));
        });
    }

    group.finish();
}

fn benchmark_scope_lifecycle(c: &mut Criterion) {
    let registry = registry_with_services(10);

    c.bench_function("ensure_resolve_clear", |b| {
        b.iter(|| {
            let tenant = registry
                .ensure_scope(
                    "tenant-3",
                    "tenant",
                    None,
                    Some(ScopeContext::from([("tenant", "t3")])),
                )
                .unwrap();
            black_box(tenant.resolve::<u64>().unwrap());
            registry.clear_scope("tenant-3");
        });
    });
}

criterion_group!(benches, benchmark_cached_resolution, benchmark_scope_lifecycle);
criterion_main!(benches);
