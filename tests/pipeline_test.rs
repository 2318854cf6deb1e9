mod common;

use meterlink::config::{ControlPolicy, PipelineConfig};
use meterlink::pipeline::pipeline;
use std::time::Duration;

fn config(policy: ControlPolicy) -> PipelineConfig {
    PipelineConfig {
        control_capacity: 4,
        control_policy: policy,
        export_capacity: 64,
        sink_queue_capacity: 8,
    }
}

#[tokio::test]
async fn stalled_consumer_sees_newest_snapshots() {
    let (mut tx, mut control, mut export) = pipeline(&config(ControlPolicy::DropOldest));

    for i in 0..9u8 {
        tx.send(common::power_snapshot(f64::from(i), 0.0))
            .await
            .unwrap();
    }
    assert_eq!(tx.overflow_count(), 5);
    assert_eq!(control.len(), 4);
    drop(tx);

    let mut seen = Vec::new();
    while let Some(snapshot) = control.recv().await {
        seen.push(snapshot.consumption_kw);
    }
    assert_eq!(seen, vec![5.0, 6.0, 7.0, 8.0]);
    assert_eq!(control.overflow_count(), 5);

    // The export lane is lossless
    let mut exported = 0;
    while export.recv().await.is_some() {
        exported += 1;
    }
    assert_eq!(exported, 9);
}

#[tokio::test]
async fn block_policy_holds_the_producer() {
    let (mut tx, mut control, _export) = pipeline(&config(ControlPolicy::Block));

    for i in 0..4u8 {
        tx.send(common::power_snapshot(f64::from(i), 0.0))
            .await
            .unwrap();
    }
    let fifth = tokio::time::timeout(
        Duration::from_millis(50),
        tx.send(common::power_snapshot(4.0, 0.0)),
    )
    .await;
    assert!(fifth.is_err());

    let first = control.recv().await.unwrap();
    assert_eq!(first.consumption_kw, 0.0);
    tx.send(common::power_snapshot(5.0, 0.0)).await.unwrap();
    assert_eq!(tx.overflow_count(), 0);
}
