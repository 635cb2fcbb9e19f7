use core::alloc::Layout;
use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::alloc::{GlobalAlloc, System};
use std::thread;

fn bench_alloc_free_pair(c: &mut Criterion) {
    let mut group = c.benchmark_group("alloc_free_pair");

    for size in [16usize, 64, 256, 1024, 8192] {
        group.bench_function(format!("talus_{size}"), |b| {
            b.iter(|| {
                let ptr = talus::allocate(black_box(size));
                unsafe { talus::deallocate(ptr, size) };
            })
        });

        group.bench_function(format!("system_{size}"), |b| {
            let layout = Layout::from_size_align(size, 16).unwrap();
            b.iter(|| unsafe {
                let ptr = System.alloc(black_box(layout));
                System.dealloc(ptr, layout);
            })
        });
    }
    group.finish();
}

fn bench_batch_1000(c: &mut Criterion) {
    const BATCH: usize = 1000;
    let mut group = c.benchmark_group("batch_1000_x64B");
    group.throughput(Throughput::Elements(BATCH as u64));

    group.bench_function("talus", |b| {
        let mut ptrs = Vec::with_capacity(BATCH);
        b.iter(|| {
            for _ in 0..BATCH {
                ptrs.push(talus::allocate(64));
            }
            for ptr in ptrs.drain(..).rev() {
                unsafe { talus::deallocate(ptr, 64) };
            }
        })
    });

    group.bench_function("system_box", |b| {
        let mut boxes: Vec<Box<[u8; 64]>> = Vec::with_capacity(BATCH);
        b.iter(|| {
            for _ in 0..BATCH {
                boxes.push(Box::new([0u8; 64]));
            }
            boxes.clear();
        })
    });
    group.finish();
}

fn bench_mixed_sizes(c: &mut Criterion) {
    const BATCH: usize = 1000;
    let mut rng = StdRng::seed_from_u64(99);
    let sizes: Vec<usize> = (0..BATCH).map(|_| rng.gen_range(16..=2048)).collect();

    let mut group = c.benchmark_group("mixed_sizes_1000");
    group.throughput(Throughput::Elements(BATCH as u64));

    group.bench_function("talus", |b| {
        let mut ptrs = Vec::with_capacity(BATCH);
        b.iter(|| {
            for &size in &sizes {
                ptrs.push((talus::allocate(size), size));
            }
            for (ptr, size) in ptrs.drain(..) {
                unsafe { talus::deallocate(ptr, size) };
            }
        })
    });
    group.finish();
}

fn bench_threaded_churn(c: &mut Criterion) {
    const OPS: usize = 10_000;
    let mut group = c.benchmark_group("threaded_churn_x64B");
    group.sample_size(10);

    for threads in [2usize, 4] {
        group.throughput(Throughput::Elements((OPS * threads) as u64));
        group.bench_function(format!("talus_{threads}_threads"), |b| {
            b.iter(|| {
                thread::scope(|s| {
                    for _ in 0..threads {
                        s.spawn(|| {
                            for _ in 0..OPS {
                                let ptr = talus::allocate(64);
                                unsafe {
                                    ptr.write(0xCC);
                                    talus::deallocate(ptr, 64);
                                }
                            }
                        });
                    }
                });
            })
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_alloc_free_pair,
    bench_batch_1000,
    bench_mixed_sizes,
    bench_threaded_churn
);
criterion_main!(benches);
