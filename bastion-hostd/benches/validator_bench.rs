use bastion_hostd::app::boundary::{AuditTrail, ChannelValidator, RateLimiter};
use bastion_hostd::app::boundary::payload::canonicalize;
use bastion_hostd::domain::boundary::{CorrelationId, Whitelist};
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

fn builtin_validator() -> ChannelValidator {
    ChannelValidator::new(
        Arc::new(Whitelist::builtin().unwrap()),
        Arc::new(RateLimiter::new(Duration::from_secs(300))),
        Arc::new(AuditTrail::new(1_000, None)),
        None,
    )
}

fn validate_exact_channel(c: &mut Criterion) {
    let validator = builtin_validator();
    let corr = CorrelationId::new();
    let payload = json!({});

    c.bench_function("validate_exact_channel", |b| {
        b.iter(|| {
            let _ = black_box(validator.validate(
                black_box("system:status"),
                black_box(&payload),
                &corr,
            ));
        })
    });
}

fn validate_wildcard_channel(c: &mut Criterion) {
    let validator = builtin_validator();
    let corr = CorrelationId::new();
    let payload = json!({ "id": 42, "fields": ["title", "owner"] });

    c.bench_function("validate_wildcard_channel", |b| {
        b.iter(|| {
            let _ = black_box(validator.validate(
                black_box("task:update"),
                black_box(&payload),
                &corr,
            ));
        })
    });
}

fn validate_rejected_channel(c: &mut Criterion) {
    let validator = builtin_validator();
    let corr = CorrelationId::new();
    let payload = json!(null);

    c.bench_function("validate_rejected_channel", |b| {
        b.iter(|| {
            let _ = black_box(validator.validate(
                black_box("fs:read"),
                black_box(&payload),
                &corr,
            ));
        })
    });
}

fn canonicalize_nested_payload(c: &mut Criterion) {
    let rows: Vec<_> = (0..200)
        .map(|i| json!({ "id": i, "name": format!("row-{i}"), "__proto__": { "x": 1 } }))
        .collect();
    let payload = json!({ "rows": rows, "meta": { "page": 1, "size": 200 } });

    c.bench_function("canonicalize_nested_payload", |b| {
        b.iter(|| black_box(canonicalize(black_box(&payload))))
    });
}

criterion_group!(
    benches,
    validate_exact_channel,
    validate_wildcard_channel,
    validate_rejected_channel,
    canonicalize_nested_payload
);
criterion_main!(benches);
