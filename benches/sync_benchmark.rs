//! Benchmarks for meilisync-pg hot paths.

use chrono::{TimeZone, Utc};
use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use meilisync_pg::Document;
use meilisync_pg::document::encode_batch;
use meilisync_pg::source::{PageQuery, Watermark};
use serde_json::{Value as JsonValue, json};

fn documents(count: usize) -> Vec<Document> {
    (0..count)
        .map(|id| match json!({
            "id": id,
            "name": format!("user {}", id),
            "active": id % 2 == 0,
            "score": id as f64 * 1.5,
            "tags": ["a", "b"],
            "profile": {"city": "Berlin", "zip": "10115"},
            "updated_at": "2024-05-01T08:30:00Z",
        }) {
            JsonValue::Object(map) => map,
            _ => unreachable!(),
        })
        .collect()
}

/// Benchmark batch serialization.
fn bench_encode_batch(c: &mut Criterion) {
    let mut group = c.benchmark_group("encode_batch");
    for size in [100usize, 1000] {
        let batch = documents(size);
        group.bench_with_input(BenchmarkId::from_parameter(size), &batch, |b, batch| {
            b.iter(|| black_box(encode_batch(batch).unwrap()))
        });
    }
    group.finish();
}

/// Benchmark page query rendering.
fn bench_page_query(c: &mut Criterion) {
    let query = PageQuery {
        table: "public.users".into(),
        order_by: "id".into(),
        watermark: Some(Watermark {
            column: "updated_at".into(),
            after: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        }),
        limit: 1000,
        offset: 250_000,
    };

    c.bench_function("page_query_to_sql", |b| b.iter(|| black_box(query.to_sql())));
}

criterion_group!(benches, bench_encode_batch, bench_page_query);
criterion_main!(benches);
