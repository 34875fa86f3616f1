use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};
use jobtree::Job;

fn bench_single_job_cancel(c: &mut Criterion) {
    c.bench_function("cancel a job with no listeners or children", |b| {
        b.iter_batched(
            || {
                let job = Job::root();
                job.start();
                job
            },
            |job| {
                black_box(job.cancel(None));
            },
            BatchSize::SmallInput,
        )
    });
}

fn bench_job_with_listeners_cancel(c: &mut Criterion) {
    c.bench_function("cancel a job with 100 registered listeners", |b| {
        b.iter_batched(
            || {
                let job = Job::root();
                job.start();
                for _ in 0..100 {
                    job.invoke_on_completion(false, true, |_cause| {});
                }
                job
            },
            |job| {
                black_box(job.cancel(None));
            },
            BatchSize::SmallInput,
        )
    });
}

fn bench_tree_cancel(c: &mut Criterion) {
    let mut group = c.benchmark_group("cancel a parent with a tree of children");
    for breadth in [1usize, 4, 16] {
        group.bench_function(format!("breadth={breadth}"), |b| {
            b.iter_batched(
                || {
                    let root = Job::root();
                    root.start();
                    for _ in 0..breadth {
                        let child = Job::child_of(&root);
                        child.start();
                        for _ in 0..breadth {
                            let grandchild = Job::child_of(&child);
                            grandchild.start();
                        }
                    }
                    root
                },
                |root| {
                    // cancel() alone cascades down through every attached
                    // child and grandchild; no separate draining pass needed.
                    black_box(root.cancel(None));
                },
                BatchSize::SmallInput,
            )
        });
    }
    group.finish();
}

fn bench_invoke_on_completion_registration(c: &mut Criterion) {
    c.bench_function("register a listener on an active job", |b| {
        let job = Job::root();
        job.start();
        b.iter(|| {
            let handle = job.invoke_on_completion(false, true, |_cause| {});
            handle.dispose();
        });
    });
}

criterion_group!(
    benches,
    bench_single_job_cancel,
    bench_job_with_listeners_cancel,
    bench_tree_cancel,
    bench_invoke_on_completion_registration,
);
criterion_main!(benches);
