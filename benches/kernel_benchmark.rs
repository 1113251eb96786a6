use combi::kernel::KernelMatrix;
use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use ndarray::Array2;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Feature-outer accumulation: for each column, add its outer product to the kernel.
fn feature_outer(chunk: &Array2<f32>, kernel: &mut [f64]) {
    let n = chunk.nrows();
    for column in chunk.columns() {
        for r in 0..n {
            let a = f64::from(column[r]);
            if a == 0.0 {
                continue;
            }
            for c in r..n {
                kernel[r * n + c] += a * f64::from(column[c]);
            }
        }
    }
}

/// Genotypic one-hot rows, three columns per marker.
fn random_chunk(samples: usize, markers: usize) -> Array2<f32> {
    let mut rng = StdRng::seed_from_u64(0x5EED_C0B1 + samples as u64);
    let mut chunk = Array2::zeros((samples, markers * 3));
    for mut row in chunk.rows_mut() {
        for m in 0..markers {
            row[m * 3 + rng.gen_range(0..3)] = 1.0;
        }
    }
    chunk
}

fn benchmark_kernel(c: &mut Criterion) {
    let markers = 500;
    let chunks: Vec<_> = [100_usize, 200, 400]
        .iter()
        .map(|&samples| (samples, random_chunk(samples, markers)))
        .collect();

    let mut group = c.benchmark_group("kernel_accumulation");
    for (samples, chunk) in chunks.iter() {
        group.throughput(Throughput::Elements((*samples * *samples * markers * 3) as u64 / 2));

        group.bench_with_input(BenchmarkId::new("row_col_feature", samples), chunk, |b, input| {
            b.iter(|| {
                let mut kernel = KernelMatrix::zeroed(input.nrows(), None).unwrap();
                kernel.accumulate_chunk(black_box(input.view())).unwrap();
                black_box(kernel);
            });
        });

        group.bench_with_input(BenchmarkId::new("feature_outer", samples), chunk, |b, input| {
            b.iter(|| {
                let mut kernel = vec![0.0f64; input.nrows() * input.nrows()];
                feature_outer(black_box(input), &mut kernel);
                black_box(kernel);
            });
        });
    }
    group.finish();
}

criterion_group!(kernel_benchmark, benchmark_kernel);
criterion_main!(kernel_benchmark);
