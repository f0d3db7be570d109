//! Length-prefixed JSON framing for the control connection.
//!
//! Every message is a 4-byte big-endian length followed by that many bytes
//! of UTF-8 JSON. The framing is symmetric: clients send `Request`, the
//! daemon answers with `Response`.

use std::io::{self, Read, Write};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Upper bound on a single framed message. Checked against the header
/// before any body bytes are read.
pub const MAX_MESSAGE_SIZE: usize = 10 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Ping,
    SendKeys,
    SendKey,
    CapturePane,
    HasSession,
    KillSession,
    SetOption,
    PipePane,
    /// Anything this build doesn't recognize. Decoding to a variant keeps
    /// the connection alive so the daemon can answer with an error.
    Unknown,
}

impl Action {
    fn as_str(self) -> &'static str {
        match self {
            Action::Ping => "ping",
            Action::SendKeys => "send_keys",
            Action::SendKey => "send_key",
            Action::CapturePane => "capture_pane",
            Action::HasSession => "has_session",
            Action::KillSession => "kill_session",
            Action::SetOption => "set_option",
            Action::PipePane => "pipe_pane",
            Action::Unknown => "unknown",
        }
    }

    fn from_str(s: &str) -> Self {
        match s {
            "ping" => Action::Ping,
            "send_keys" => Action::SendKeys,
            "send_key" => Action::SendKey,
            "capture_pane" => Action::CapturePane,
            "has_session" => Action::HasSession,
            "kill_session" => Action::KillSession,
            "set_option" => Action::SetOption,
            "pipe_pane" => Action::PipePane,
            _ => Action::Unknown,
        }
    }
}

impl Serialize for Action {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Action {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(Action::from_str(&s))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub action: Action,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub text: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub key: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub literal: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub send_enter: bool,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub lines: i64,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub alternate: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub join: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub option: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub value: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub shell_cmd: String,
}

fn is_zero(n: &i64) -> bool {
    *n == 0
}

impl Request {
    /// A request carrying only an action; the remaining fields take their
    /// wire defaults.
    pub fn new(action: Action) -> Self {
        Request {
            action,
            text: String::new(),
            key: String::new(),
            literal: false,
            send_enter: false,
            lines: 0,
            alternate: false,
            join: false,
            option: String::new(),
            value: String::new(),
            shell_cmd: String::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exists: Option<bool>,
}

impl Response {
    pub fn ok() -> Self {
        Response { ok: true, error: None, output: None, exists: None }
    }

    pub fn err(msg: impl Into<String>) -> Self {
        Response { ok: false, error: Some(msg.into()), output: None, exists: None }
    }
}

/// Serialize `v` as JSON and write it with the length header.
pub fn write_message<W: Write, T: Serialize>(w: &mut W, v: &T) -> io::Result<()> {
    let data = serde_json::to_vec(v)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, format!("encode: {e}")))?;
    if data.len() > MAX_MESSAGE_SIZE {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("message too large: {} bytes (max {})", data.len(), MAX_MESSAGE_SIZE),
        ));
    }
    w.write_all(&(data.len() as u32).to_be_bytes())?;
    w.write_all(&data)?;
    w.flush()
}

/// Read one length-prefixed JSON message. EOF inside the header or body
/// is an error; so is a header that claims more than `MAX_MESSAGE_SIZE`.
pub fn read_message<R: Read, T: DeserializeOwned>(r: &mut R) -> io::Result<T> {
    let mut header = [0u8; 4];
    r.read_exact(&mut header)?;
    let len = u32::from_be_bytes(header) as usize;
    if len > MAX_MESSAGE_SIZE {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("message too large: {len} bytes (max {MAX_MESSAGE_SIZE})"),
        ));
    }
    let mut body = vec![0u8; len];
    r.read_exact(&mut body)?;
    serde_json::from_slice(&body)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, format!("decode: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn request_round_trip() {
        let mut buf = Vec::new();
        let mut req = Request::new(Action::SendKeys);
        req.text = "hello world".into();
        req.literal = true;
        write_message(&mut buf, &req).unwrap();

        let got: Request = read_message(&mut Cursor::new(buf)).unwrap();
        assert_eq!(got.action, Action::SendKeys);
        assert_eq!(got.text, "hello world");
        assert!(got.literal);
    }

    #[test]
    fn response_round_trip() {
        let mut buf = Vec::new();
        let resp = Response {
            ok: true,
            error: None,
            output: Some("captured output\nline 2".into()),
            exists: None,
        };
        write_message(&mut buf, &resp).unwrap();

        let got: Response = read_message(&mut Cursor::new(buf)).unwrap();
        assert!(got.ok);
        assert_eq!(got.output.as_deref(), Some("captured output\nline 2"));
    }

    #[test]
    fn response_with_error() {
        let mut buf = Vec::new();
        write_message(&mut buf, &Response::err("session not found")).unwrap();

        let got: Response = read_message(&mut Cursor::new(buf)).unwrap();
        assert!(!got.ok);
        assert_eq!(got.error.as_deref(), Some("session not found"));
    }

    #[test]
    fn all_actions_round_trip() {
        let actions = [
            Action::Ping,
            Action::SendKeys,
            Action::SendKey,
            Action::CapturePane,
            Action::HasSession,
            Action::KillSession,
            Action::SetOption,
            Action::PipePane,
        ];
        for action in actions {
            let mut buf = Vec::new();
            write_message(&mut buf, &Request::new(action)).unwrap();
            let got: Request = read_message(&mut Cursor::new(buf)).unwrap();
            assert_eq!(got.action, action);
        }
    }

    #[test]
    fn unknown_action_decodes() {
        let body = br#"{"action":"frobnicate"}"#;
        let mut buf = (body.len() as u32).to_be_bytes().to_vec();
        buf.extend_from_slice(body);
        let got: Request = read_message(&mut Cursor::new(buf)).unwrap();
        assert_eq!(got.action, Action::Unknown);
    }

    #[test]
    fn oversized_header_rejected() {
        // Claims 16 MiB; must fail before a body read is attempted.
        let header = [0x01, 0x00, 0x00, 0x00];
        let err = read_message::<_, Request>(&mut Cursor::new(header.to_vec())).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn empty_input_rejected() {
        assert!(read_message::<_, Request>(&mut Cursor::new(Vec::new())).is_err());
    }

    #[test]
    fn truncated_body_rejected() {
        let mut buf = vec![0x00, 0x00, 0x00, 0x10]; // claims 16 bytes
        buf.extend_from_slice(b"{}");
        assert!(read_message::<_, Request>(&mut Cursor::new(buf)).is_err());
    }

    #[test]
    fn multiple_messages_on_one_stream() {
        let mut buf = Vec::new();
        for _ in 0..10 {
            let mut req = Request::new(Action::Ping);
            req.text = "ping".into();
            write_message(&mut buf, &req).unwrap();
        }
        let mut cursor = Cursor::new(buf);
        for _ in 0..10 {
            let got: Request = read_message(&mut cursor).unwrap();
            assert_eq!(got.action, Action::Ping);
            assert_eq!(got.text, "ping");
        }
    }

    #[test]
    fn capture_fields_survive() {
        let mut buf = Vec::new();
        let mut req = Request::new(Action::CapturePane);
        req.lines = 100;
        req.join = true;
        write_message(&mut buf, &req).unwrap();

        let got: Request = read_message(&mut Cursor::new(buf)).unwrap();
        assert_eq!(got.lines, 100);
        assert!(got.join);
        assert!(!got.alternate);
    }

    #[test]
    fn utf8_text_round_trip() {
        let mut buf = Vec::new();
        let mut req = Request::new(Action::SendKeys);
        req.text = "héllo wörld — ünïcode ★".into();
        write_message(&mut buf, &req).unwrap();
        let got: Request = read_message(&mut Cursor::new(buf)).unwrap();
        assert_eq!(got.text, "héllo wörld — ünïcode ★");
    }
}
