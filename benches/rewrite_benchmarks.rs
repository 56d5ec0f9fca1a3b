use bytes::BytesMut;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use sqlmask_proxy::protocol::{Frame, MySqlCodec};
use sqlmask_proxy::rewrite::extract_table_name;
use sqlmask_proxy::{MaskingRule, MaskingType, RuleStore, SqlRewriter};
use tokio_util::codec::{Decoder, Encoder};

fn rule_store(columns: usize) -> RuleStore {
    let store = RuleStore::new();
    let rules = (0..columns)
        .map(|i| {
            let masking_type = match i % 4 {
                0 => MaskingType::FullMask,
                1 => MaskingType::PartialMask,
                2 => MaskingType::Hash,
                _ => MaskingType::Replace,
            };
            MaskingRule::new("customer_info", &format!("col_{}", i), masking_type)
        })
        .collect();
    store.set_rules("customer_info", rules);
    store
}

fn bench_table_extraction(c: &mut Criterion) {
    let mut group = c.benchmark_group("TableExtraction");

    for (name, sql) in [
        ("simple", "SELECT * FROM users WHERE id = 1"),
        (
            "join",
            "select a.*, b.total from orders o join users u on o.uid = u.id where u.active = 1",
        ),
    ] {
        group.bench_function(name, |b| b.iter(|| extract_table_name(black_box(sql))));
    }

    group.finish();
}

fn bench_rewrite(c: &mut Criterion) {
    let mut group = c.benchmark_group("SqlRewriter");
    let rewriter = SqlRewriter::new();

    for columns in [1usize, 4, 16] {
        let store = rule_store(columns);
        let projection: Vec<String> = (0..columns).map(|i| format!("c.col_{}", i)).collect();
        let sql = format!(
            "SELECT {} FROM customer_info c WHERE c.id = 42",
            projection.join(", ")
        );

        group.bench_with_input(BenchmarkId::new("masked", columns), &sql, |b, sql| {
            b.iter(|| rewriter.rewrite_with_store(black_box(sql), &store))
        });
    }

    let store = rule_store(4);
    group.bench_function("pass_through", |b| {
        b.iter(|| rewriter.rewrite_with_store(black_box("SELECT id FROM orders WHERE id = 1"), &store))
    });

    group.finish();
}

fn bench_codec(c: &mut Criterion) {
    let mut group = c.benchmark_group("MySqlCodec");
    let frame = Frame::query(0, "SELECT phone, email FROM customer_info WHERE id = 42");

    group.bench_function("encode_decode", |b| {
        let mut codec = MySqlCodec::new();
        let mut buf = BytesMut::with_capacity(128);
        b.iter(|| {
            codec.encode(black_box(frame.clone()), &mut buf).unwrap();
            black_box(codec.decode(&mut buf).unwrap())
        });
    });

    group.finish();
}

criterion_group!(benches, bench_table_extraction, bench_rewrite, bench_codec);
criterion_main!(benches);
