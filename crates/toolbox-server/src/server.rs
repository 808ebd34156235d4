//! Newline-delimited JSON-RPC loop over a pair of byte streams.
//!
//! Each request is handled on its own task so a slow downstream call never
//! blocks the others. A single writer task owns the output, which keeps
//! responses from interleaving.

use crate::handler::ToolboxHandler;
use crate::protocol::{self, OutgoingResponse, Parsed};
use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::timeout;
use tracing::{debug, trace, warn};

const OUTBOX_CAPACITY: usize = 64;

/// How long requests still running at end of input get to finish.
pub const DRAIN_GRACE: Duration = Duration::from_secs(5);

/// Serve until `input` reaches end of stream and in-flight requests are
/// answered or [`DRAIN_GRACE`] runs out.
pub async fn serve<R, W>(handler: Arc<ToolboxHandler>, input: R, output: W) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    serve_with_grace(handler, input, output, DRAIN_GRACE).await
}

/// [`serve`] with an explicit drain grace period; requests still running
/// when it ends are aborted without a response.
pub async fn serve_with_grace<R, W>(
    handler: Arc<ToolboxHandler>,
    input: R,
    output: W,
    grace: Duration,
) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::channel::<OutgoingResponse>(OUTBOX_CAPACITY);
    let writer = tokio::spawn(write_responses(rx, output));

    let mut lines = BufReader::new(input).lines();
    let mut in_flight = JoinSet::new();

    while let Some(line) = lines.next_line().await.context("Failed to read request")? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        trace!("RX: {}", line);

        match protocol::parse_line(line) {
            Parsed::Message(message) => {
                let handler = Arc::clone(&handler);
                let tx = tx.clone();
                in_flight.spawn(async move {
                    if let Some(response) = handler.handle(message).await {
                        // Only fails once the writer is gone
                        let _ = tx.send(response).await;
                    }
                });
            }
            Parsed::Reject(response) => {
                warn!("rejected input: {:?}", response.error);
                let _ = tx.send(response).await;
            }
            Parsed::Ignore => debug!("ignoring unsolicited response"),
        }

        while let Some(finished) = in_flight.try_join_next() {
            if let Err(e) = finished {
                warn!("request task failed: {}", e);
            }
        }
    }

    debug!("input closed, waiting for {} request(s)", in_flight.len());
    let drain = async {
        while let Some(finished) = in_flight.join_next().await {
            if let Err(e) = finished {
                warn!("request task failed: {}", e);
            }
        }
    };
    if timeout(grace, drain).await.is_err() {
        warn!(
            abandoned = in_flight.len(),
            "requests still running after input closed, aborting"
        );
        in_flight.abort_all();
        while in_flight.join_next().await.is_some() {}
    }

    drop(tx);
    writer.await.context("response writer panicked")?
}

async fn write_responses<W>(mut rx: mpsc::Receiver<OutgoingResponse>, mut output: W) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(response) = rx.recv().await {
        let mut line = serde_json::to_string(&response)?;
        trace!("TX: {}", line);
        line.push('\n');
        output
            .write_all(line.as_bytes())
            .await
            .context("Failed to write response")?;
        output.flush().await.context("Failed to flush response")?;
    }
    Ok(())
}
