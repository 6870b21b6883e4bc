use cacheme_core::{CacheMe, CacheOptions, CallContext, ChangeKind, ChangeSource, EntityChange};
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use std::hint::black_box;

fn engine_with_users(users: u64) -> (CacheMe, Vec<CallContext>) {
    let engine = CacheMe::default();
    let contexts: Vec<CallContext> = (0..users)
        .map(|id| CallContext::new().with("id", &id))
        .collect();
    (engine, contexts)
}

fn user_options() -> CacheOptions<String> {
    CacheOptions::new(|ctx| format!("User:{}", ctx.text("id")))
        .invalidation_keys(|ctx| format!("User:{}", ctx.text("id")))
        .sources([ChangeSource::entity("User")])
}

fn bench_hit(c: &mut Criterion) {
    let (engine, contexts) = engine_with_users(100);
    let profile = engine
        .register("profile", user_options(), |ctx: &CallContext| {
            format!("profile {}", ctx.text("id"))
        })
        .unwrap();
    for ctx in &contexts {
        profile.call(ctx.clone()).unwrap();
    }

    c.bench_function("hit", |b| {
        let mut i = 0;
        b.iter(|| {
            let ctx = contexts[i % contexts.len()].clone();
            i += 1;
            black_box(profile.call(ctx).unwrap())
        });
    });
}

fn bench_miss(c: &mut Criterion) {
    let (engine, _) = engine_with_users(0);
    let profile = engine
        .register("profile", user_options(), |ctx: &CallContext| {
            format!("profile {}", ctx.text("id"))
        })
        .unwrap();

    c.bench_function("miss", |b| {
        let mut id = 0u64;
        b.iter(|| {
            id += 1;
            black_box(profile.call(CallContext::new().with("id", &id)).unwrap())
        });
    });
}

fn bench_fire(c: &mut Criterion) {
    let mut group = c.benchmark_group("fire");

    for dependents in [1usize, 10, 100].iter() {
        group.bench_with_input(
            BenchmarkId::new("dependents", dependents),
            dependents,
            |b, &dependents| {
                let engine = CacheMe::default();
                engine.dispatcher().subscribe(&ChangeSource::entity("User"));
                for i in 0..dependents {
                    engine
                        .index()
                        .link("User:1", &format!("CMview:{i}"))
                        .unwrap();
                }
                let change = EntityChange::new("User", "User:1", ChangeKind::Updated);
                b.iter(|| black_box(engine.dispatch(&change).unwrap()));
            },
        );
    }

    group.finish();
}

criterion_group!(benches, bench_hit, bench_miss, bench_fire);
criterion_main!(benches);
