//! One live connection to a worker process.
//!
//! Requests may be in flight concurrently. Each is parked in the pending map
//! under its id until the reader task sees a response line with that id.
//! When the worker's stdout closes, every parked request fails at once.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use keepsake_core::{Command, MediaError, MediaResult, Response};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

type Writer = Box<dyn AsyncWrite + Send + Unpin>;

#[derive(Default)]
struct Pending {
    alive: bool,
    slots: HashMap<u64, oneshot::Sender<Response>>,
}

pub struct Connection {
    writer: tokio::sync::Mutex<Writer>,
    pending: Arc<Mutex<Pending>>,
    reader: JoinHandle<()>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("alive", &self.is_alive())
            .field("in_flight", &self.in_flight())
            .finish()
    }
}

impl Connection {
    /// Wrap a worker's stdout (`reader`) and stdin (`writer`). Must be
    /// called inside a tokio runtime.
    pub fn new<R, W>(reader: R, writer: W) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let pending = Arc::new(Mutex::new(Pending {
            alive: true,
            slots: HashMap::new(),
        }));
        let reader = tokio::spawn(read_responses(reader, pending.clone()));
        Self {
            writer: tokio::sync::Mutex::new(Box::new(writer)),
            pending,
            reader,
        }
    }

    pub fn is_alive(&self) -> bool {
        lock(&self.pending).alive
    }

    /// Requests written and not yet answered.
    pub fn in_flight(&self) -> usize {
        lock(&self.pending).slots.len()
    }

    /// Send `command` under `id` and wait up to `timeout` for its response.
    ///
    /// The deadline covers the write as well as the wait, so a worker that
    /// stops reading its stdin cannot stall the caller. A timeout abandons
    /// the slot; a late response for it is discarded by the reader.
    pub async fn request(
        &self,
        id: u64,
        command: Command,
        timeout: Duration,
    ) -> MediaResult<Response> {
        let name = command.name();
        let mut line = serde_json::to_vec(&command.into_request(id)?)
            .map_err(|e| MediaError::internal(format!("encoding request: {e}")))?;
        line.push(b'\n');

        let rx = {
            let mut pending = lock(&self.pending);
            if !pending.alive {
                return Err(MediaError::worker_unavailable("worker connection closed"));
            }
            let (tx, rx) = oneshot::channel();
            pending.slots.insert(id, tx);
            rx
        };

        // set while a line is partly on the pipe; a timeout then leaves the
        // stream torn and the connection unusable
        let writing = AtomicBool::new(false);
        let exchange = async {
            let mut writer = self.writer.lock().await;
            if !self.is_alive() {
                return Err(MediaError::worker_unavailable("worker connection closed"));
            }
            writing.store(true, Ordering::Release);
            let written = write_line(&mut writer, &line).await;
            writing.store(false, Ordering::Release);
            drop(writer);
            if let Err(e) = written {
                self.mark_dead();
                return Err(MediaError::worker_unavailable(format!(
                    "writing {name} request: {e}"
                )));
            }
            rx.await.map_err(|_| {
                MediaError::worker_unavailable(format!("worker exited before answering {name}"))
            })
        };

        match tokio::time::timeout(timeout, exchange).await {
            Ok(result) => {
                if result.is_err() {
                    self.abandon(id);
                }
                result
            }
            Err(_) => {
                self.abandon(id);
                if writing.load(Ordering::Acquire) {
                    warn!(id, command = name, "worker stopped reading its input");
                    self.mark_dead();
                }
                Err(MediaError::timeout(format!(
                    "{name} did not complete within {}ms",
                    timeout.as_millis()
                )))
            }
        }
    }

    fn abandon(&self, id: u64) {
        lock(&self.pending).slots.remove(&id);
    }

    fn mark_dead(&self) {
        fail_all(&self.pending);
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

async fn write_line(writer: &mut Writer, line: &[u8]) -> std::io::Result<()> {
    writer.write_all(line).await?;
    writer.flush().await
}

async fn read_responses<R>(reader: R, pending: Arc<Mutex<Pending>>)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if line.trim().is_empty() {
                    continue;
                }
                let response: Response = match serde_json::from_str(&line) {
                    Ok(response) => response,
                    Err(e) => {
                        warn!("ignoring malformed worker output: {e}");
                        continue;
                    }
                };
                let slot = lock(&pending).slots.remove(&response.id);
                match slot {
                    // the requester may have timed out in between
                    Some(tx) => {
                        let _ = tx.send(response);
                    }
                    None => debug!(id = response.id, "discarding response for unknown id"),
                }
            }
            Ok(None) => {
                debug!("worker stdout closed");
                break;
            }
            Err(e) => {
                warn!("reading worker output: {e}");
                break;
            }
        }
    }
    fail_all(&pending);
}

/// Mark the connection dead and drop every parked sender, which wakes each
/// waiter with a receive error.
fn fail_all(pending: &Mutex<Pending>) {
    let mut pending = lock(pending);
    pending.alive = false;
    let failed = pending.slots.len();
    pending.slots.clear();
    if failed > 0 {
        debug!(failed, "failing in-flight requests");
    }
}

fn lock(pending: &Mutex<Pending>) -> MutexGuard<'_, Pending> {
    pending.lock().unwrap_or_else(|p| p.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use keepsake_core::protocol::EvictionsPayload;
    use keepsake_core::{ErrorKind, Request};
    use tokio::io::{DuplexStream, Lines};

    const WAIT: Duration = Duration::from_secs(5);

    /// A connection plus the far ends of its pipes, standing in for the worker.
    fn pair() -> (Connection, Lines<BufReader<DuplexStream>>, DuplexStream) {
        let (host_out, worker_in) = tokio::io::duplex(64 * 1024);
        let (worker_out, host_in) = tokio::io::duplex(64 * 1024);
        let conn = Connection::new(host_in, host_out);
        (conn, BufReader::new(worker_in).lines(), worker_out)
    }

    async fn next_request(lines: &mut Lines<BufReader<DuplexStream>>) -> Request {
        let line = lines.next_line().await.unwrap().unwrap();
        serde_json::from_str(&line).unwrap()
    }

    async fn answer(out: &mut DuplexStream, response: &Response) {
        let mut line = serde_json::to_vec(response).unwrap();
        line.push(b'\n');
        out.write_all(&line).await.unwrap();
    }

    #[tokio::test]
    async fn responses_are_matched_by_id_not_order() {
        let (conn, mut requests, mut out) = pair();
        let conn = Arc::new(conn);

        let first = tokio::spawn({
            let conn = conn.clone();
            async move { conn.request(1, Command::DrainEvictions, WAIT).await }
        });
        let req1 = next_request(&mut requests).await;
        let second = tokio::spawn({
            let conn = conn.clone();
            async move { conn.request(2, Command::ClearCache, WAIT).await }
        });
        let req2 = next_request(&mut requests).await;
        assert_eq!((req1.id, req2.id), (1, 2));
        assert_eq!(conn.in_flight(), 2);

        answer(&mut out, &Response::ok(2, &serde_json::json!({"cleared": true}))).await;
        answer(&mut out, &Response::ok(1, &EvictionsPayload::default())).await;

        let r1 = first.await.unwrap().unwrap();
        let r2 = second.await.unwrap().unwrap();
        assert_eq!(r1.id, 1);
        assert_eq!(r2.id, 2);
        assert!(r1.into_payload::<EvictionsPayload>().unwrap().addresses.is_empty());
        assert_eq!(conn.in_flight(), 0);
    }

    #[tokio::test]
    async fn timeout_abandons_slot_and_late_reply_is_ignored() {
        let (conn, mut requests, mut out) = pair();

        let err = conn
            .request(5, Command::DrainEvictions, Duration::from_millis(50))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Timeout);
        assert_eq!(conn.in_flight(), 0);

        let req = next_request(&mut requests).await;
        answer(&mut out, &Response::ok(req.id, &EvictionsPayload::default())).await;

        // the late reply must not be delivered to the next request
        let next = tokio::spawn(async move {
            let resp = conn.request(6, Command::ClearCache, WAIT).await;
            (conn, resp)
        });
        let req = next_request(&mut requests).await;
        assert_eq!(req.id, 6);
        answer(&mut out, &Response::ok(6, &serde_json::json!({"cleared": true}))).await;
        let (conn, resp) = next.await.unwrap();
        assert_eq!(resp.unwrap().id, 6);
        assert!(conn.is_alive());
    }

    #[tokio::test]
    async fn worker_exit_fails_in_flight_and_later_requests() {
        let (conn, mut requests, out) = pair();
        let conn = Arc::new(conn);

        let waiting = tokio::spawn({
            let conn = conn.clone();
            async move { conn.request(1, Command::DrainEvictions, WAIT).await }
        });
        next_request(&mut requests).await;
        drop(out);

        let err = waiting.await.unwrap().unwrap_err();
        assert_eq!(err.kind, ErrorKind::WorkerUnavailable);
        assert!(!conn.is_alive());

        let err = conn
            .request(2, Command::DrainEvictions, WAIT)
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::WorkerUnavailable);
    }

    #[tokio::test]
    async fn stalled_worker_input_times_out() {
        // nobody reads the worker's stdin and the pipe holds less than a line
        let (host_out, _worker_in) = tokio::io::duplex(16);
        let (_worker_out, host_in) = tokio::io::duplex(1024);
        let conn = Arc::new(Connection::new(host_in, host_out));
        let short = Duration::from_millis(50);

        let first = tokio::spawn({
            let conn = conn.clone();
            async move { conn.request(1, Command::DrainEvictions, short).await }
        });
        let queued = tokio::spawn({
            let conn = conn.clone();
            async move { conn.request(2, Command::ClearCache, short).await }
        });

        let first = tokio::time::timeout(WAIT, first)
            .await
            .expect("request outlived its timeout")
            .unwrap();
        assert_eq!(first.unwrap_err().kind, ErrorKind::Timeout);

        let queued = tokio::time::timeout(WAIT, queued)
            .await
            .expect("queued request outlived its timeout")
            .unwrap();
        let kind = queued.unwrap_err().kind;
        assert!(
            matches!(kind, ErrorKind::Timeout | ErrorKind::WorkerUnavailable),
            "{kind:?}"
        );

        // a half-written line leaves the stream unusable
        assert!(!conn.is_alive());
        assert_eq!(conn.in_flight(), 0);
    }

    #[tokio::test]
    async fn malformed_output_is_skipped() {
        let (conn, mut requests, mut out) = pair();
        let conn = Arc::new(conn);

        let waiting = tokio::spawn({
            let conn = conn.clone();
            async move { conn.request(3, Command::DrainEvictions, WAIT).await }
        });
        next_request(&mut requests).await;
        out.write_all(b"panic at the disco\n\n").await.unwrap();
        answer(&mut out, &Response::ok(3, &EvictionsPayload::default())).await;

        assert_eq!(waiting.await.unwrap().unwrap().id, 3);
        assert!(conn.is_alive());
    }
}
