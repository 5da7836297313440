use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};

use inferq_ai::{DatasetParser, DatasetSchema};

/// Build a CSV payload with `rows` rows of `dim`-wide embeddings.
fn payload(rows: usize, dim: usize) -> String {
    let mut out: Vec<String> = (0..dim).map(|i| format!("emb_{i}")).collect();
    out.push("last_price".to_string());
    let mut csv = out.join(",");
    csv.push('\n');

    for r in 0..rows {
        for c in 0..dim {
            csv.push_str(&format!("{:.6},", ((r * dim + c) % 97) as f32 / 97.0));
        }
        csv.push_str(&format!("{:.2}\n", 30.0 + r as f64 * 0.01));
    }
    csv
}

fn bench_parse(c: &mut Criterion) {
    let parser = DatasetParser::new(DatasetSchema::default());
    let mut group = c.benchmark_group("dataset_parse");

    for rows in [20usize, 250, 2_000] {
        let csv = payload(rows, 128);
        group.throughput(Throughput::Bytes(csv.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(rows), &csv, |b, csv| {
            b.iter(|| {
                let parsed = parser.parse(black_box(csv.as_bytes())).unwrap();
                black_box(parsed.len())
            })
        });
    }

    group.finish();
}

criterion_group!(benches, bench_parse);
criterion_main!(benches);
