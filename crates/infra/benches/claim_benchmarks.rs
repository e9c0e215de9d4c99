use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use chrono::{Duration, Utc};
use serde_json::json;

use promptq_core::{ClientId, WorkerId};
use promptq_infra::jobs::{InMemoryJobStore, JobFilter, JobSort, JobStore};
use promptq_jobs::{lifecycle, Job, NewJob};
use promptq_llm::parse_structured;

fn pending_job(client: ClientId, priority: i32) -> Job {
    let new = NewJob {
        operation: "summarize".to_string(),
        prompts: vec!["default".to_string()],
        working_prompts: None,
        model: "test-model".to_string(),
        temperature: 0.5,
        max_tokens: None,
        priority,
        request_data: json!({ "text": "benchmark" }),
        client_reference: None,
    };
    Job::create(client, new, Utc::now())
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("tokio runtime")
}

async fn seeded_store(jobs: usize) -> InMemoryJobStore {
    let store = InMemoryJobStore::new();
    let client = ClientId::new();
    for i in 0..jobs {
        store
            .create(pending_job(client, (i % 1000) as i32 + 1))
            .await
            .expect("seed job");
    }
    store
}

/// Poll + claim every candidate, the way one worker cycle does.
fn bench_claim_cycle(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("claim_cycle");

    for size in [50usize, 500, 5_000] {
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            b.iter_batched(
                || rt.block_on(seeded_store(size)),
                |store| {
                    rt.block_on(async {
                        let now = Utc::now();
                        let worker = WorkerId::new("bench-worker");
                        let candidates = store
                            .query(&JobFilter::claimable(now), JobSort::PriorityThenAge, Some(size))
                            .await
                            .expect("query");
                        let mut claimed = 0usize;
                        for job in &candidates {
                            let (expected, patch) = lifecycle::claim(&worker, now, Duration::seconds(300));
                            if store.atomic_update_if(job.id, &expected, &patch).await.expect("claim") {
                                claimed += 1;
                            }
                        }
                        black_box(claimed)
                    })
                },
                criterion::BatchSize::LargeInput,
            );
        });
    }

    group.finish();
}

/// A lost claim: the job is already PROCESSING.
fn bench_contended_claim(c: &mut Criterion) {
    let rt = runtime();
    let store = rt.block_on(seeded_store(1));
    let job = rt
        .block_on(store.query(&JobFilter::new(), JobSort::Newest, Some(1)))
        .expect("query")
        .remove(0);
    let now = Utc::now();
    let (expected, patch) = lifecycle::claim(&WorkerId::new("first"), now, Duration::seconds(300));
    rt.block_on(store.atomic_update_if(job.id, &expected, &patch))
        .expect("first claim");

    c.bench_function("claim_lost", |b| {
        b.iter(|| {
            let (expected, patch) = lifecycle::claim(&WorkerId::new("second"), now, Duration::seconds(300));
            rt.block_on(store.atomic_update_if(black_box(job.id), &expected, &patch))
                .expect("claim attempt")
        })
    });
}

fn bench_json_repair(c: &mut Criterion) {
    let mut group = c.benchmark_group("json_repair");

    let valid = r#"{"summary": "ok", "items": [1, 2, 3]}"#;
    let fenced = "```json\n{\"summary\": \"ok\", \"items\": [1, 2, 3],}\n```";
    let quoted = r#"{"html": "<a href="https://example.com">link</a>", "note": "she said "hi" twice"}"#;

    group.bench_function("valid", |b| b.iter(|| parse_structured(black_box(valid))));
    group.bench_function("fenced_trailing_comma", |b| b.iter(|| parse_structured(black_box(fenced))));
    group.bench_function("inner_quotes", |b| b.iter(|| parse_structured(black_box(quoted))));

    group.finish();
}

criterion_group!(benches, bench_claim_cycle, bench_contended_claim, bench_json_repair);
criterion_main!(benches);
