//! The stdio read loop.
//!
//! One request line is read, executed on a blocking thread, and answered
//! before the next line is read. The idle sweep timer shares the `select!`
//! with the reader, so it only ever fires between commands.

use std::sync::Arc;

use anyhow::{Context, Result};
use keepsake_core::{MediaError, Response};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use crate::dispatch::{self, Control, Inbound};
use crate::state::WorkerState;

/// Serve requests from `input` until `shutdown` or end of input, then clear
/// the session.
pub async fn serve<R, W>(state: Arc<WorkerState>, input: R, mut output: W) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let result = read_loop(&state, input, &mut output).await;
    state.end_session();
    result
}

async fn read_loop<R, W>(state: &Arc<WorkerState>, input: R, output: &mut W) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = input.lines();
    let mut sweep = tokio::time::interval(state.config.sweep_interval());
    sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);
    sweep.tick().await;

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("reading request line")? else {
                    info!("input closed; shutting down");
                    return Ok(());
                };
                if line.trim().is_empty() {
                    continue;
                }
                let (id, command) = match dispatch::parse_line(&line) {
                    Inbound::Command { id, command } => (id, command),
                    Inbound::Reject(response) => {
                        write_response(output, &response).await?;
                        continue;
                    }
                    Inbound::Skip => continue,
                };

                debug!(id, command = command.name(), "request");
                let worker_state = state.clone();
                let (response, control) =
                    tokio::task::spawn_blocking(move || dispatch::execute(&worker_state, id, command))
                        .await
                        .unwrap_or_else(|e| {
                            tracing::error!(id, "handler panicked: {e}");
                            (
                                Response::err(id, &MediaError::internal("handler panicked")),
                                Control::Continue,
                            )
                        });
                write_response(output, &response).await?;

                if control == Control::Shutdown {
                    info!("shutdown requested");
                    return Ok(());
                }
            }
            _ = sweep.tick() => {
                state.sweep_idle();
            }
        }
    }
}

async fn write_response<W: AsyncWrite + Unpin>(output: &mut W, response: &Response) -> Result<()> {
    let mut line = serde_json::to_vec(response).context("encoding response")?;
    line.push(b'\n');
    output.write_all(&line).await.context("writing response")?;
    output.flush().await.context("flushing response")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::tests::{put, state_with};
    use keepsake_core::config::WorkerConfig;
    use keepsake_core::protocol::{EvictionsPayload, MediaPathPayload, ShutdownPayload};

    fn responses(out: &[u8]) -> Vec<Response> {
        String::from_utf8_lossy(out)
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn test_serves_until_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let state = Arc::new(state_with(dir.path(), WorkerConfig::default()));
        let address = put(&state, b"clip");
        let input = format!(
            concat!(
                "{{\"id\":1,\"command\":\"media-path\",\"payload\":{{\"address\":\"{}\",\"mimeHint\":\"video/mp4\"}}}}\n",
                "\n",
                "garbage\n",
                "{{\"id\":2,\"command\":\"nope\",\"payload\":{{}}}}\n",
                "{{\"id\":3,\"command\":\"shutdown\",\"payload\":{{}}}}\n",
                "{{\"id\":4,\"command\":\"drain-evictions\",\"payload\":{{}}}}\n",
            ),
            address
        );
        let mut out = Vec::new();

        serve(state.clone(), input.as_bytes(), &mut out).await.unwrap();

        let resps = responses(&out);
        assert_eq!(resps.iter().map(|r| r.id).collect::<Vec<_>>(), vec![1, 2, 3]);

        let path: MediaPathPayload = resps[0].clone().into_payload().unwrap();
        assert!(!path.path.exists(), "session files are removed on shutdown");
        assert!(!resps[1].ok);
        let bye: ShutdownPayload = resps[2].clone().into_payload().unwrap();
        assert!(bye.shutdown);
        assert!(state.cache().is_empty());
    }

    #[tokio::test]
    async fn test_end_of_input_is_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let state = Arc::new(state_with(dir.path(), WorkerConfig::default()));
        let input = "{\"id\":7,\"command\":\"drain-evictions\",\"payload\":{}}\n";
        let mut out = Vec::new();

        serve(state, input.as_bytes(), &mut out).await.unwrap();

        let resps = responses(&out);
        assert_eq!(resps.len(), 1);
        let drained: EvictionsPayload = resps[0].clone().into_payload().unwrap();
        assert!(drained.addresses.is_empty());
    }
}
