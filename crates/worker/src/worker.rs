//! Local message transport: one message body per input line.

use anyhow::{Context, Result};
use dagworker_core::consumer::{ConsumeResult, WorkflowConsumer};
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// Counts of handled messages
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ConsumeStats {
    pub acked: usize,
    pub dropped: usize,
}

/// Feed every non-empty line of `input` to `consumer`, running at most
/// `limit` messages at once.
///
/// Returns when the input ends and all in-flight messages are handled, or
/// when `shutdown` fires; in that case in-flight messages still finish.
pub async fn consume_lines<R>(
    input: R,
    consumer: Arc<WorkflowConsumer>,
    limit: usize,
    shutdown: CancellationToken,
) -> Result<ConsumeStats>
where
    R: AsyncBufRead + Unpin,
{
    let permits = Arc::new(Semaphore::new(limit.max(1)));
    let mut in_flight = JoinSet::new();
    let mut stats = ConsumeStats::default();
    let mut lines = input.lines();

    loop {
        let line = tokio::select! {
            _ = shutdown.cancelled() => {
                tracing::info!("Shutdown requested, waiting for in-flight messages");
                break;
            }
            line = lines.next_line() => line.context("Failed to read message")?,
        };
        let Some(line) = line else {
            break;
        };

        let body = line.trim().to_string();
        if body.is_empty() {
            continue;
        }

        let permit = permits
            .clone()
            .acquire_owned()
            .await
            .context("Consumer semaphore closed")?;

        // collect whatever already finished so the set does not grow unbounded
        while let Some(done) = in_flight.try_join_next() {
            record(&mut stats, done);
        }

        let consumer = consumer.clone();
        in_flight.spawn(async move {
            let result = consumer.consume(body.as_bytes()).await;
            drop(permit);
            result
        });
    }

    while let Some(done) = in_flight.join_next().await {
        record(&mut stats, done);
    }

    tracing::info!(
        "Consumer finished: acked={}, dropped={}",
        stats.acked,
        stats.dropped
    );
    Ok(stats)
}

fn record(stats: &mut ConsumeStats, done: Result<ConsumeResult, tokio::task::JoinError>) {
    match done {
        Ok(ConsumeResult::Ack) => stats.acked += 1,
        Ok(ConsumeResult::Drop) => stats.dropped += 1,
        Err(e) => {
            tracing::error!("Message handler aborted: {}", e);
            stats.dropped += 1;
        }
    }
}
