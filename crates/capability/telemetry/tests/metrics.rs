use ems_telemetry::{metrics, record_collect_batch, record_no_data_event};

#[test]
fn counters_accumulate() {
    let before = metrics().snapshot();
    record_collect_batch(3);
    record_no_data_event();
    let after = metrics().snapshot();
    assert!(after.collect_batches >= before.collect_batches + 1);
    assert!(after.collected_points >= before.collected_points + 3);
    assert!(after.no_data_events >= before.no_data_events + 1);
}
