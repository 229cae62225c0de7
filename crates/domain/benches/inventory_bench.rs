use common::{IdempotencyKey, Money};
use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use domain::{InventoryError, InventoryGuard};
use storage::{InMemoryStore, Product, StockLine};

fn bench_reserve_release(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let store = rt.block_on(InMemoryStore::with_products([Product::new(
        "SKU-BENCH",
        "Benchmark Widget",
        Money::from_cents(1000),
        1_000_000,
    )]));
    let guard = InventoryGuard::new(store);
    let mut n = 0u64;

    c.bench_function("inventory/reserve_release", |b| {
        b.iter(|| {
            n += 1;
            rt.block_on(async {
                let token = guard
                    .reserve(
                        &IdempotencyKey::new(format!("bench-{n}")),
                        vec![StockLine::new("SKU-BENCH", 1)],
                    )
                    .await
                    .unwrap();
                guard.release(token.id).await.unwrap();
            });
        });
    });
}

fn bench_contended_reserve(c: &mut Criterion) {
    let rt = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(4)
        .enable_all()
        .build()
        .unwrap();
    let mut group = c.benchmark_group("inventory/contended_reserve");

    for reservers in [8usize, 64, 256] {
        group.bench_with_input(
            BenchmarkId::from_parameter(reservers),
            &reservers,
            |b, &reservers| {
                b.iter(|| {
                    rt.block_on(async {
                        let store = InMemoryStore::with_products([Product::new(
                            "SKU-HOT",
                            "Hot Item",
                            Money::from_cents(1000),
                            (reservers / 2) as u32,
                        )])
                        .await;
                        let guard = InventoryGuard::new(store);

                        let handles: Vec<_> = (0..reservers)
                            .map(|i| {
                                let guard = guard.clone();
                                tokio::spawn(async move {
                                    guard
                                        .reserve(
                                            &IdempotencyKey::new(format!("k{i}")),
                                            vec![StockLine::new("SKU-HOT", 1)],
                                        )
                                        .await
                                })
                            })
                            .collect();

                        for handle in handles {
                            match handle.await.unwrap() {
                                Ok(_) | Err(InventoryError::InsufficientStock { .. }) => {}
                                Err(e) => panic!("{e}"),
                            }
                        }
                    });
                });
            },
        );
    }
    group.finish();
}

criterion_group!(benches, bench_reserve_release, bench_contended_reserve);
criterion_main!(benches);
