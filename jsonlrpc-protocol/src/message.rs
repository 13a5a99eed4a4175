//! Envelope and reply body types.
//!
//! Every call is two JSON values in each direction: a header followed by a
//! body. Header keys use the `ServiceMethod` / `Seq` / `Error` spelling on the
//! wire; the decoder also accepts camel-case aliases.

use crate::error::CodecError;
use crate::rows::{RowSink, RowSource};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;
use serde_json::Value;
use std::fmt;

/// Request envelope. `seq` identifies one outstanding call on a connection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestHeader {
    #[serde(rename = "ServiceMethod", alias = "serviceMethod", default)]
    pub service_method: String,

    #[serde(rename = "Seq", alias = "seq", default)]
    pub seq: u64,
}

impl RequestHeader {
    pub fn new(service_method: impl Into<String>, seq: u64) -> Self {
        Self {
            service_method: service_method.into(),
            seq,
        }
    }
}

/// Response envelope. `seq` echoes the originating request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseHeader {
    #[serde(rename = "ServiceMethod", alias = "serviceMethod", default)]
    pub service_method: String,

    #[serde(rename = "Seq", alias = "seq", default)]
    pub seq: u64,

    /// Empty when the call succeeded.
    #[serde(rename = "Error", alias = "error", default)]
    pub error: String,
}

impl ResponseHeader {
    /// Builds a successful header answering `request`.
    pub fn for_request(request: &RequestHeader) -> Self {
        Self {
            service_method: request.service_method.clone(),
            seq: request.seq,
            error: String::new(),
        }
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = error.into();
        self
    }

    pub fn is_error(&self) -> bool {
        !self.error.is_empty()
    }

    pub fn error_message(&self) -> Option<&str> {
        if self.error.is_empty() {
            None
        } else {
            Some(&self.error)
        }
    }
}

/// Status fields shared by every reply body.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplyStatus {
    #[serde(default)]
    pub code: i64,

    #[serde(default)]
    pub msg: String,

    /// Whether a row sequence follows the body.
    #[serde(rename = "has-jsonls", alias = "hasRows", default)]
    pub has_rows: bool,
}

/// Reply body as decoded on the client.
#[derive(Debug, Deserialize)]
pub struct ReplyBody {
    #[serde(default)]
    pub code: i64,

    #[serde(default)]
    pub msg: String,

    #[serde(rename = "has-jsonls", alias = "hasRows", default)]
    pub has_rows: bool,

    #[serde(default)]
    pub result: Option<Box<RawValue>>,
}

/// Client-side reply target.
///
/// `result` keeps the exact bytes the server produced. When `rows` is set,
/// rows that follow the body are forwarded to it in arrival order; the sender
/// is dropped once the sentinel has been read.
#[derive(Debug, Default)]
pub struct ClientReply {
    pub status: ReplyStatus,
    pub result: Option<Box<RawValue>>,
    pub rows: Option<RowSink>,
    /// Number of rows drained for this reply.
    pub rows_received: u64,
}

impl ClientReply {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rows(mut self, sink: RowSink) -> Self {
        self.rows = Some(sink);
        self
    }

    /// Raw JSON text of `result`, if any.
    pub fn raw_result(&self) -> Option<&str> {
        self.result.as_deref().map(RawValue::get)
    }

    /// Deserializes `result` into `T`. A missing result decodes as JSON `null`.
    pub fn result_as<T: DeserializeOwned>(&self) -> Result<T, CodecError> {
        let raw = self.raw_result().unwrap_or("null");
        serde_json::from_str(raw).map_err(|source| CodecError::TypeMismatch {
            expected: std::any::type_name::<T>(),
            source,
        })
    }

    /// Copies a decoded body into this target, keeping the row sink.
    pub fn apply_body(&mut self, body: ReplyBody) {
        self.status = ReplyStatus {
            code: body.code,
            msg: body.msg,
            has_rows: body.has_rows,
        };
        self.result = body.result;
        self.rows_received = 0;
    }
}

/// Server-side reply: status, inline result and an optional lazy row source.
#[derive(Serialize)]
pub struct ServerReply {
    #[serde(flatten)]
    pub status: ReplyStatus,

    pub result: Value,

    #[serde(skip)]
    pub rows: Option<RowSource>,
}

impl ServerReply {
    pub fn ok(result: Value) -> Self {
        Self {
            status: ReplyStatus::default(),
            result,
            rows: None,
        }
    }

    pub fn error(code: i64, msg: impl Into<String>) -> Self {
        Self {
            status: ReplyStatus {
                code,
                msg: msg.into(),
                has_rows: false,
            },
            result: Value::Null,
            rows: None,
        }
    }

    /// Attaches a row sequence; marks the reply as followed by rows.
    pub fn with_rows(mut self, rows: RowSource) -> Self {
        self.status.has_rows = true;
        self.rows = Some(rows);
        self
    }

    pub fn has_rows(&self) -> bool {
        self.status.has_rows || self.rows.is_some()
    }
}

impl Default for ServerReply {
    fn default() -> Self {
        Self::ok(Value::Null)
    }
}

impl fmt::Debug for ServerReply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerReply")
            .field("status", &self.status)
            .field("result", &self.result)
            .field("rows", &self.rows.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_header_wire_names() {
        let header = RequestHeader::new("Calc.Add", 1);
        let json = serde_json::to_string(&header).unwrap();
        assert_eq!(json, r#"{"ServiceMethod":"Calc.Add","Seq":1}"#);
    }

    #[test]
    fn test_request_header_aliases() {
        let header: RequestHeader =
            serde_json::from_str(r#"{"serviceMethod":"Calc.Add","seq":7}"#).unwrap();
        assert_eq!(header, RequestHeader::new("Calc.Add", 7));
    }

    #[test]
    fn test_response_header_error() {
        let request = RequestHeader::new("Calc.Div", 4);
        let header = ResponseHeader::for_request(&request);
        assert!(!header.is_error());
        assert_eq!(header.error_message(), None);
        assert_eq!(header.seq, 4);

        let header = header.with_error("division by zero");
        assert!(header.is_error());
        assert_eq!(header.error_message(), Some("division by zero"));

        let json = serde_json::to_value(&header).unwrap();
        assert_eq!(
            json,
            json!({"ServiceMethod": "Calc.Div", "Seq": 4, "Error": "division by zero"})
        );
    }

    #[test]
    fn test_response_header_missing_error_defaults_empty() {
        let header: ResponseHeader =
            serde_json::from_str(r#"{"ServiceMethod":"A.B","Seq":2}"#).unwrap();
        assert!(!header.is_error());
    }

    #[test]
    fn test_server_reply_serialization() {
        let reply = ServerReply::ok(json!(5));
        let json = serde_json::to_string(&reply).unwrap();
        assert_eq!(json, r#"{"code":0,"msg":"","has-jsonls":false,"result":5}"#);
    }

    #[test]
    fn test_server_reply_with_rows_sets_flag() {
        let reply = ServerReply::ok(json!({"count": 2}))
            .with_rows(RowSource::from_rows(vec![json!(1), json!(2)]));
        assert!(reply.has_rows());
        let json = serde_json::to_value(&reply).unwrap();
        assert_eq!(json["has-jsonls"], json!(true));
        assert!(json.get("rows").is_none());
    }

    #[test]
    fn test_server_reply_error() {
        let reply = ServerReply::error(404, "no such table");
        assert_eq!(reply.status.code, 404);
        assert_eq!(reply.status.msg, "no such table");
        assert_eq!(reply.result, Value::Null);
        assert!(!reply.has_rows());
    }

    #[test]
    fn test_reply_body_preserves_raw_result() {
        let body: ReplyBody = serde_json::from_str(
            r#"{"code":0,"msg":"","has-jsonls":false,"result":{"b":1,"a":"<&>"}}"#,
        )
        .unwrap();
        let mut reply = ClientReply::new();
        reply.apply_body(body);
        assert_eq!(reply.raw_result(), Some(r#"{"b":1,"a":"<&>"}"#));
    }

    #[test]
    fn test_reply_body_has_rows_alias() {
        let body: ReplyBody =
            serde_json::from_str(r#"{"code":0,"msg":"","hasRows":true,"result":null}"#).unwrap();
        assert!(body.has_rows);
        assert!(body.result.is_none());
    }

    #[test]
    fn test_result_as() {
        let body: ReplyBody = serde_json::from_str(r#"{"result":5}"#).unwrap();
        let mut reply = ClientReply::new();
        reply.apply_body(body);
        assert_eq!(reply.result_as::<i64>().unwrap(), 5);

        let err = reply.result_as::<String>().unwrap_err();
        assert!(matches!(err, CodecError::TypeMismatch { .. }));
    }

    #[test]
    fn test_result_as_missing_result_is_null() {
        let reply = ClientReply::new();
        assert_eq!(reply.result_as::<Option<i64>>().unwrap(), None);
    }
}
