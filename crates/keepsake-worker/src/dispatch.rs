//! Line → command → handler → response.

use keepsake_core::protocol::ShutdownPayload;
use keepsake_core::{Command, MediaError, MediaResult, Request, Response};
use serde::Serialize;

use crate::handlers;
use crate::state::WorkerState;

/// What the read loop should do after answering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    Continue,
    Shutdown,
}

/// A parsed input line.
#[derive(Debug)]
pub enum Inbound {
    Command { id: u64, command: Command },
    /// Malformed but carrying an id, so the host still gets an answer.
    Reject(Response),
    /// Not even an id to answer to.
    Skip,
}

pub fn parse_line(line: &str) -> Inbound {
    match serde_json::from_str::<Request>(line) {
        Ok(request) => match Command::from_request(&request) {
            Ok(command) => Inbound::Command {
                id: request.id,
                command,
            },
            Err(e) => Inbound::Reject(Response::err(request.id, &e)),
        },
        Err(e) => {
            let id = serde_json::from_str::<serde_json::Value>(line)
                .ok()
                .and_then(|v| v.get("id").and_then(|id| id.as_u64()));
            match id {
                Some(id) => Inbound::Reject(Response::err(
                    id,
                    &MediaError::invalid_request(format!("malformed request: {e}")),
                )),
                None => {
                    tracing::warn!("dropping unparseable request line: {e}");
                    Inbound::Skip
                }
            }
        }
    }
}

/// Run one command to completion.
pub fn execute(state: &WorkerState, id: u64, command: Command) -> (Response, Control) {
    let name = command.name();
    let response = match command {
        Command::Thumbnail(req) => reply(id, name, handlers::thumbnail(state, &req)),
        Command::MediaPath(req) => reply(id, name, handlers::media_path(state, &req)),
        Command::DataUrl(req) => reply(id, name, handlers::data_url(state, &req)),
        Command::ClearCache => Response::ok(id, &handlers::clear_cache(state)),
        Command::DrainEvictions => Response::ok(id, &handlers::drain_evictions(state)),
        Command::Shutdown => {
            return (
                Response::ok(id, &ShutdownPayload { shutdown: true }),
                Control::Shutdown,
            )
        }
    };
    (response, Control::Continue)
}

fn reply<T: Serialize>(id: u64, command: &str, result: MediaResult<T>) -> Response {
    match result {
        Ok(payload) => Response::ok(id, &payload),
        Err(e) => {
            tracing::debug!(id, command, kind = %e.kind, "request failed: {}", e.message);
            Response::err(id, &e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::tests::state_with;
    use keepsake_core::config::WorkerConfig;
    use keepsake_core::protocol::EvictionsPayload;
    use keepsake_core::ErrorKind;

    #[test]
    fn test_parse_valid_line() {
        let line = r#"{"id":3,"command":"drain-evictions","payload":{}}"#;
        assert!(matches!(
            parse_line(line),
            Inbound::Command {
                id: 3,
                command: Command::DrainEvictions
            }
        ));
    }

    #[test]
    fn test_unknown_command_rejected_with_id() {
        let line = r#"{"id":11,"command":"format-disk","payload":{}}"#;
        match parse_line(line) {
            Inbound::Reject(resp) => {
                assert_eq!(resp.id, 11);
                assert!(resp.error.unwrap().starts_with("INVALID_REQUEST: "));
            }
            other => panic!("expected reject, got {other:?}"),
        }
    }

    #[test]
    fn test_missing_command_field_rejected_with_id() {
        match parse_line(r#"{"id":12}"#) {
            Inbound::Reject(resp) => assert_eq!(resp.id, 12),
            other => panic!("expected reject, got {other:?}"),
        }
    }

    #[test]
    fn test_garbage_is_skipped() {
        assert!(matches!(parse_line("not json"), Inbound::Skip));
        assert!(matches!(parse_line(r#"{"command":"shutdown"}"#), Inbound::Skip));
    }

    #[test]
    fn test_execute_shutdown_and_drain() {
        let dir = tempfile::tempdir().unwrap();
        let state = state_with(dir.path(), WorkerConfig::default());

        let (resp, control) = execute(&state, 1, Command::DrainEvictions);
        assert_eq!(control, Control::Continue);
        let payload: EvictionsPayload = resp.into_payload().unwrap();
        assert!(payload.addresses.is_empty());

        let (resp, control) = execute(&state, 2, Command::Shutdown);
        assert_eq!(control, Control::Shutdown);
        assert!(resp.ok);
    }

    #[test]
    fn test_execute_reports_error_kind() {
        let dir = tempfile::tempdir().unwrap();
        let state = state_with(dir.path(), WorkerConfig::default());
        let req = keepsake_core::protocol::MediaPathRequest {
            address: keepsake_core::ContentAddress::from_digest(&[1; 32]),
            mime_hint: None,
        };
        let (resp, _) = execute(&state, 9, Command::MediaPath(req));
        let err = resp.into_payload::<serde_json::Value>().unwrap_err();
        assert_eq!(err.kind, ErrorKind::NotFound);
    }
}
