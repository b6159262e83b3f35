// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::time::Duration;

use super::*;

#[tokio::test]
async fn report_is_delivered_in_order() -> anyhow::Result<()> {
    let (sink, mut rx) = FailureSink::channel(8);
    sink.report("queue", "first");
    sink.report("presence", format!("second {}", 2));

    let a = rx.recv().await.ok_or_else(|| anyhow::anyhow!("closed"))?;
    let b = rx.recv().await.ok_or_else(|| anyhow::anyhow!("closed"))?;
    assert_eq!((a.source, a.error.as_str()), ("queue", "first"));
    assert_eq!((b.source, b.error.as_str()), ("presence", "second 2"));
    assert_eq!(sink.dropped(), 0);
    Ok(())
}

#[tokio::test]
async fn full_channel_drops_without_blocking() {
    let (sink, _rx) = FailureSink::channel(2);
    for i in 0..5 {
        sink.report("test", i);
    }
    assert_eq!(sink.dropped(), 3);
}

#[tokio::test]
async fn closed_channel_is_swallowed() {
    let (sink, rx) = FailureSink::channel(2);
    drop(rx);
    sink.report("test", "nobody listening");
    assert_eq!(sink.dropped(), 1);
}

#[tokio::test]
async fn reporter_drains_until_senders_drop() -> anyhow::Result<()> {
    let (sink, rx) = FailureSink::channel(4);
    let handle = spawn_reporter(rx, None, CancellationToken::new());
    sink.report("test", "logged");
    drop(sink);
    tokio::time::timeout(Duration::from_secs(5), handle).await??;
    Ok(())
}

#[tokio::test]
async fn reporter_stops_on_shutdown() -> anyhow::Result<()> {
    let (_sink, rx) = FailureSink::channel(4);
    let shutdown = CancellationToken::new();
    let handle = spawn_reporter(rx, None, shutdown.clone());
    shutdown.cancel();
    tokio::time::timeout(Duration::from_secs(5), handle).await??;
    Ok(())
}

#[tokio::test]
async fn queued_failures_are_reported_on_shutdown() -> anyhow::Result<()> {
    let (sink, rx) = FailureSink::channel(8);
    for i in 0..3 {
        sink.report("test", format!("pending {i}"));
    }
    let shutdown = CancellationToken::new();
    shutdown.cancel();

    let handle = spawn_reporter(rx, None, shutdown);
    let handled = tokio::time::timeout(Duration::from_secs(5), handle).await??;
    assert_eq!(handled, 3);

    // The receiver is gone, so later reports count as dropped.
    sink.report("test", "late");
    assert_eq!(sink.dropped(), 1);
    Ok(())
}

#[test]
fn subject_uses_prefix() {
    assert_eq!(nats::failure_subject("relay"), "relay.events.failure");
}
