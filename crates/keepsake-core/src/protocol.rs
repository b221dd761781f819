//! Worker wire protocol: one JSON object per line over the worker's stdio.
//!
//! ```text
//! host → worker  {"id":7,"command":"thumbnail","payload":{"address":"…","mimeHint":"image/jpeg","maxDimension":256}}
//! worker → host  {"id":7,"ok":true,"payload":{"dataUrl":"data:image/jpeg;base64,…","cached":false},"error":null}
//! worker → host  {"id":8,"ok":false,"payload":null,"error":"NOT_FOUND: no blob for …"}
//! ```
//!
//! The envelope keeps `command` as a plain string so a request naming an
//! unknown command can still be answered with its own id.

use std::path::PathBuf;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{MediaError, MediaResult};
use crate::types::ContentAddress;

/// Request envelope as it appears on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub id: u64,
    pub command: String,
    #[serde(default)]
    pub payload: Value,
}

/// Response envelope as it appears on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub id: u64,
    pub ok: bool,
    pub payload: Option<Value>,
    pub error: Option<String>,
}

impl Response {
    pub fn ok<T: Serialize>(id: u64, payload: &T) -> Self {
        match serde_json::to_value(payload) {
            Ok(value) => Self {
                id,
                ok: true,
                payload: Some(value),
                error: None,
            },
            Err(e) => Self::err(id, &MediaError::internal(format!("encoding payload: {e}"))),
        }
    }

    pub fn err(id: u64, error: &MediaError) -> Self {
        Self {
            id,
            ok: false,
            payload: None,
            error: Some(error.to_wire()),
        }
    }

    /// Decode a successful payload, or surface the worker's error with its kind.
    pub fn into_payload<T: DeserializeOwned>(self) -> MediaResult<T> {
        if !self.ok {
            let raw = self.error.unwrap_or_else(|| "worker returned no error detail".into());
            return Err(MediaError::from_wire(&raw));
        }
        let value = self.payload.unwrap_or(Value::Null);
        serde_json::from_value(value)
            .map_err(|e| MediaError::internal(format!("malformed worker payload: {e}")))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThumbnailRequest {
    pub address: ContentAddress,
    #[serde(default)]
    pub mime_hint: Option<String>,
    pub max_dimension: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaPathRequest {
    pub address: ContentAddress,
    #[serde(default)]
    pub mime_hint: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataUrlRequest {
    pub address: ContentAddress,
    pub mime_hint: String,
    /// Caller-side cap; the worker applies the lower of this and its own ceiling.
    #[serde(default)]
    pub max_bytes: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThumbnailPayload {
    pub data_url: String,
    /// True when served from the on-disk derived cache without re-deriving.
    pub cached: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaPathPayload {
    pub path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataUrlPayload {
    pub data_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EvictionsPayload {
    pub addresses: Vec<ContentAddress>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClearedPayload {
    pub cleared: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShutdownPayload {
    pub shutdown: bool,
}

/// Timeout class of a command; the host waits differently per class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandClass {
    /// clear-cache, drain-evictions
    Quick,
    Shutdown,
    Thumbnail,
    /// media-path, data-url: may decrypt hundreds of megabytes
    Media,
}

/// The closed set of worker commands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Thumbnail(ThumbnailRequest),
    MediaPath(MediaPathRequest),
    DataUrl(DataUrlRequest),
    ClearCache,
    DrainEvictions,
    Shutdown,
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::Thumbnail(_) => "thumbnail",
            Command::MediaPath(_) => "media-path",
            Command::DataUrl(_) => "data-url",
            Command::ClearCache => "clear-cache",
            Command::DrainEvictions => "drain-evictions",
            Command::Shutdown => "shutdown",
        }
    }

    pub fn class(&self) -> CommandClass {
        match self {
            Command::Thumbnail(_) => CommandClass::Thumbnail,
            Command::MediaPath(_) | Command::DataUrl(_) => CommandClass::Media,
            Command::ClearCache | Command::DrainEvictions => CommandClass::Quick,
            Command::Shutdown => CommandClass::Shutdown,
        }
    }

    pub fn into_request(self, id: u64) -> MediaResult<Request> {
        let command = self.name().to_string();
        let payload = match self {
            Command::Thumbnail(req) => serde_json::to_value(req)?,
            Command::MediaPath(req) => serde_json::to_value(req)?,
            Command::DataUrl(req) => serde_json::to_value(req)?,
            Command::ClearCache | Command::DrainEvictions | Command::Shutdown => {
                Value::Object(Default::default())
            }
        };
        Ok(Request {
            id,
            command,
            payload,
        })
    }

    pub fn from_request(req: &Request) -> MediaResult<Self> {
        Ok(match req.command.as_str() {
            "thumbnail" => Command::Thumbnail(parse_payload(&req.payload)?),
            "media-path" => Command::MediaPath(parse_payload(&req.payload)?),
            "data-url" => Command::DataUrl(parse_payload(&req.payload)?),
            "clear-cache" => Command::ClearCache,
            "drain-evictions" => Command::DrainEvictions,
            "shutdown" => Command::Shutdown,
            other => {
                return Err(MediaError::invalid_request(format!(
                    "unknown command '{other}'"
                )))
            }
        })
    }
}

fn parse_payload<T: DeserializeOwned>(payload: &Value) -> MediaResult<T> {
    T::deserialize(payload)
        .map_err(|e| MediaError::invalid_request(format!("bad payload: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn addr() -> ContentAddress {
        ContentAddress::parse(&"a1".repeat(32)).unwrap()
    }

    #[test]
    fn thumbnail_request_wire_shape() {
        let cmd = Command::Thumbnail(ThumbnailRequest {
            address: addr(),
            mime_hint: Some("image/png".into()),
            max_dimension: 256,
        });
        let line = serde_json::to_string(&cmd.into_request(7).unwrap()).unwrap();
        let value: Value = serde_json::from_str(&line).unwrap();
        assert_eq!(value["id"], 7);
        assert_eq!(value["command"], "thumbnail");
        assert_eq!(value["payload"]["mimeHint"], "image/png");
        assert_eq!(value["payload"]["maxDimension"], 256);
    }

    #[test]
    fn request_parses_back_into_command() {
        let cmd = Command::DataUrl(DataUrlRequest {
            address: addr(),
            mime_hint: "image/jpeg".into(),
            max_bytes: Some(1024),
        });
        let req = cmd.clone().into_request(1).unwrap();
        assert_eq!(Command::from_request(&req).unwrap(), cmd);
    }

    #[test]
    fn unit_commands_carry_empty_object() {
        let req = Command::DrainEvictions.into_request(3).unwrap();
        assert_eq!(req.payload, Value::Object(Default::default()));
        assert_eq!(Command::from_request(&req).unwrap(), Command::DrainEvictions);
    }

    #[test]
    fn unknown_command_is_invalid_request() {
        let req: Request =
            serde_json::from_str(r#"{"id":9,"command":"explode","payload":{}}"#).unwrap();
        let err = Command::from_request(&req).unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidRequest);
    }

    #[test]
    fn bad_address_in_payload_is_invalid_request() {
        let req: Request = serde_json::from_str(
            r#"{"id":2,"command":"media-path","payload":{"address":"../../x"}}"#,
        )
        .unwrap();
        let err = Command::from_request(&req).unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidRequest);
    }

    #[test]
    fn error_response_keeps_kind() {
        let resp = Response::err(4, &MediaError::not_found("no blob"));
        let line = serde_json::to_string(&resp).unwrap();
        let back: Response = serde_json::from_str(&line).unwrap();
        let err = back.into_payload::<MediaPathPayload>().unwrap_err();
        assert_eq!(err.kind, ErrorKind::NotFound);
        assert_eq!(err.message, "no blob");
    }

    #[test]
    fn ok_response_decodes_payload() {
        let resp = Response::ok(
            5,
            &EvictionsPayload {
                addresses: vec![addr()],
            },
        );
        let payload: EvictionsPayload = resp.into_payload().unwrap();
        assert_eq!(payload.addresses, vec![addr()]);
    }

    #[test]
    fn command_classes() {
        assert_eq!(Command::ClearCache.class(), CommandClass::Quick);
        assert_eq!(Command::Shutdown.class(), CommandClass::Shutdown);
        let media = Command::MediaPath(MediaPathRequest {
            address: addr(),
            mime_hint: None,
        });
        assert_eq!(media.class(), CommandClass::Media);
    }
}
