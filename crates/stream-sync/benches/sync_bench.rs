use common::{ChangeEvent, Record, RecordId, StreamId};
use criterion::{BatchSize, Criterion, criterion_group, criterion_main};
use serde_json::json;
use stream_sync::{MaterializedView, SyncCore};

fn attendance_row(id: i64) -> Record {
    Record::from_row(
        StreamId::Attendance,
        json!({
            "id": id,
            "card_uid": format!("CARD-{id:05}"),
            "role": "student",
            "check_in": "2024-05-01T08:00:00Z",
            "check_out": null,
        }),
    )
    .unwrap()
}

/// Newest-first snapshot of `n` rows, as the store returns it.
fn snapshot(n: i64) -> Vec<Record> {
    (1..=n).rev().map(attendance_row).collect()
}

fn bench_seed_10k_rows(c: &mut Criterion) {
    let rows = snapshot(10_000);

    c.bench_function("view/seed_10000_rows", |b| {
        b.iter_batched(
            || rows.clone(),
            |rows| {
                let mut view = MaterializedView::new(StreamId::Attendance);
                view.seed(rows);
                view
            },
            BatchSize::LargeInput,
        );
    });
}

fn bench_live_insert(c: &mut Criterion) {
    let mut view = MaterializedView::new(StreamId::Attendance);
    view.seed(snapshot(10_000));
    let mut next = 10_001;

    c.bench_function("view/apply_insert_on_10000_rows", |b| {
        b.iter(|| {
            view.apply(ChangeEvent::Insert(attendance_row(next)));
            next += 1;
        });
    });
}

fn bench_update_and_publish(c: &mut Criterion) {
    let mut view = MaterializedView::new(StreamId::Attendance);
    view.seed(snapshot(1_000));

    c.bench_function("view/update_then_share_1000_rows", |b| {
        b.iter(|| {
            view.apply(ChangeEvent::Update(attendance_row(500)));
            view.to_shared()
        });
    });
}

fn bench_flush_buffered_events(c: &mut Criterion) {
    let rows = snapshot(1_000);
    let events: Vec<ChangeEvent> = (1_001..=1_500)
        .map(|id| ChangeEvent::Insert(attendance_row(id)))
        .chain((1..=100).map(|id| ChangeEvent::Delete {
            stream: StreamId::Attendance,
            id: RecordId::new(id),
        }))
        .collect();

    c.bench_function("core/seed_with_600_buffered_events", |b| {
        b.iter_batched(
            || {
                let mut core = SyncCore::new(StreamId::Attendance);
                for event in events.clone() {
                    core.receive(event).unwrap();
                }
                (core, rows.clone())
            },
            |(mut core, rows)| {
                core.seed(rows).unwrap();
                core
            },
            BatchSize::LargeInput,
        );
    });
}

criterion_group!(
    benches,
    bench_seed_10k_rows,
    bench_live_insert,
    bench_update_and_publish,
    bench_flush_buffered_events,
);
criterion_main!(benches);
