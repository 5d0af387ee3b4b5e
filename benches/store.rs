use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rand::{Rng, SeedableRng};
use std::sync::Arc;
use stored_fields::*;

const NUM_DOCS: u32 = 10_000;

/// Log-like documents: a level, a timestamp, a short message and an occasional payload.
fn log_docs() -> Vec<Vec<(usize, FieldValue)>> {
    let mut rng = rand::rngs::StdRng::seed_from_u64(0x5EED);
    let levels = ["TRACE", "DEBUG", "INFO", "WARN", "ERROR"];
    let words = ["chunk", "flushed", "segment", "merge", "opened", "index", "reader", "commit"];
    let mut ts = 1_700_000_000_000i64;
    (0..NUM_DOCS)
        .map(|_| {
            ts += rng.gen_range(0..5000);
            let msg: Vec<&str> = (0..rng.gen_range(3..12))
                .map(|_| words[rng.gen_range(0..words.len())])
                .collect();
            let mut doc = vec![
                (0, FieldValue::from(levels[rng.gen_range(0..levels.len())])),
                (1, FieldValue::Long(ts)),
                (2, FieldValue::String(msg.join(" "))),
            ];
            if rng.gen_bool(0.1) {
                doc.push((3, FieldValue::Binary((0..256).map(|_| rng.gen()).collect())));
            }
            doc
        })
        .collect()
}

fn field_infos() -> (FieldInfos, Vec<FieldInfo>) {
    let mut infos = FieldInfos::new();
    let fields = ["level", "timestamp", "message", "payload"]
        .iter()
        .map(|n| infos.add(n))
        .collect();
    (infos, fields)
}

fn write_segment(
    dir: &Arc<dyn Directory>,
    format: &StoredFieldsFormat,
    fields: &[FieldInfo],
    docs: &[Vec<(usize, FieldValue)>],
) {
    let mut writer = format.fields_writer(dir, "_0").unwrap();
    for doc in docs {
        writer.start_document();
        for (field, value) in doc {
            writer.write_field(&fields[*field], value).unwrap();
        }
        writer.finish_document().unwrap();
    }
    writer.finish(docs.len() as u32).unwrap();
    writer.close().unwrap();
}

fn modes() -> [(&'static str, CompressionMode); 3] {
    [
        ("none", CompressionMode::None),
        ("fast", CompressionMode::fast()),
        ("high", CompressionMode::high_compression()),
    ]
}

fn bench_write(c: &mut Criterion) {
    let docs = log_docs();
    let (_, fields) = field_infos();
    let mut group = c.benchmark_group("write");
    group.throughput(Throughput::Elements(NUM_DOCS as u64));
    group.sample_size(20);
    for (name, mode) in modes() {
        let format = StoredFieldsFormat::new(
            "Bench",
            "",
            StoredFieldsConfig {
                compression: mode,
                ..Default::default()
            },
        );
        group.bench_function(BenchmarkId::from_parameter(name), |b| {
            b.iter(|| {
                let dir: Arc<dyn Directory> = Arc::new(RamDirectory::new());
                write_segment(&dir, &format, &fields, &docs);
                black_box(dir)
            })
        });
    }
    group.finish();
}

fn bench_random_read(c: &mut Criterion) {
    let docs = log_docs();
    let (infos, fields) = field_infos();
    let infos = Arc::new(infos);
    let mut group = c.benchmark_group("random_read");
    group.throughput(Throughput::Elements(1000));
    for (name, mode) in modes() {
        let format = StoredFieldsFormat::new(
            "Bench",
            "",
            StoredFieldsConfig {
                compression: mode,
                ..Default::default()
            },
        );
        let dir: Arc<dyn Directory> = Arc::new(RamDirectory::new());
        write_segment(&dir, &format, &fields, &docs);
        let mut reader = format
            .fields_reader(&dir, &SegmentInfo::new("_0", NUM_DOCS), infos.clone())
            .unwrap();
        let mut rng = rand::rngs::StdRng::seed_from_u64(7);
        let ids: Vec<DocId> = (0..1000).map(|_| rng.gen_range(0..NUM_DOCS)).collect();

        group.bench_function(BenchmarkId::new("document", name), |b| {
            b.iter(|| {
                for &id in &ids {
                    black_box(reader.document(id).unwrap());
                }
            })
        });
        group.bench_function(BenchmarkId::new("one_field", name), |b| {
            b.iter(|| {
                for &id in &ids {
                    let mut visitor = DocumentVisitor::with_fields(["level"]);
                    reader.visit_document(id, &mut visitor).unwrap();
                    black_box(visitor.into_document());
                }
            })
        });
    }
    group.finish();
}

criterion_group!(benches, bench_write, bench_random_read);
criterion_main!(benches);
