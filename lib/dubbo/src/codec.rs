//! Generic-invocation request and response payloads.
//!
//! A request body carries, in order: the Dubbo version, the target service,
//! the generic-method version, `$invokeWithJsonArgs`, the parameter-type
//! descriptor, and the three-element argument vector
//! `[method, null type hints, escaped JSON args]`, followed by a null in
//! place of attachments (attachments are accepted from the caller but not
//! serialized).

use crate::buffer::Buffer;
use crate::frame::{self, Header};
use crate::hessian;
use crate::shared::{ErrorType, NetworkError, NetworkResult};
use serde_json::Value;
use std::io::Cursor;
use std::sync::atomic::{AtomicI64, Ordering};

pub const DUBBO_VERSION: &str = "3.1.0-RELEASE";
pub const GENERIC_METHOD_NAME: &str = "$invokeWithJsonArgs";
pub const GENERIC_METHOD_VERSION: &str = "0.0.0";

const PARAM_TYPES_STRING: &str = "Ljava/lang/String;[Ljava/lang/String;Ljava/lang/String;";
const PARAM_TYPES_BYTES: &str = "Ljava/lang/String;[Ljava/lang/String;[B;";

const REQUEST_BUF_SIZE: usize = 8192;

static NEXT_REQID: AtomicI64 = AtomicI64::new(0);

/// Allocates the next request id; ids stay positive and wrap back to 1
/// before reaching `i64::MAX`.
fn next_reqid() -> i64 {
    bump_reqid(&NEXT_REQID)
}

fn bump_reqid(counter: &AtomicI64) -> i64 {
    let id = counter.fetch_add(1, Ordering::Relaxed) + 1;
    if id == i64::max_value() {
        counter.store(1, Ordering::Relaxed);
        return 1;
    }
    id
}

/// How the JSON argument payload travels on the wire: as a Hessian string
/// (the `String` descriptor) or as Hessian binary (the `byte[]` descriptor).
/// Servers differ; the string form is the common one.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum CodecStyle {
    Strings,
    Bytes,
}

impl CodecStyle {
    fn param_types(self) -> &'static str {
        match self {
            CodecStyle::Strings => PARAM_TYPES_STRING,
            CodecStyle::Bytes => PARAM_TYPES_BYTES,
        }
    }
}

/// A single `$invokeWithJsonArgs` call, ready to be framed.
pub struct Request {
    reqid: i64,
    twoway: bool,
    event: bool,
    service: String,
    method: String,
    /// Compact, ASCII-escaped JSON argument array.
    args: String,
    /// Raw attachment object from the caller. Carried for reference only:
    /// the wire encoder emits a Hessian null in its place.
    #[allow(dead_code)]
    attach: Option<String>,
    style: CodecStyle,
}

impl Request {
    /// Builds a two-way user call. `json_args` must parse as a JSON array
    /// or object; an object contributes its member values in order.
    pub fn new(
        service: &str,
        method: &str,
        json_args: &str,
        json_attach: Option<&str>,
    ) -> NetworkResult<Request> {
        let args = rebuild_json_args(json_args)?;

        Ok(Request {
            reqid: next_reqid(),
            twoway: true,
            event: false,
            service: service.to_string(),
            method: method.to_string(),
            args,
            attach: json_attach.map(str::to_string),
            style: CodecStyle::Strings,
        })
    }

    pub fn with_style(mut self, style: CodecStyle) -> Request {
        self.style = style;
        self
    }

    #[inline]
    pub fn reqid(&self) -> i64 {
        self.reqid
    }

    /// Encodes the call into a fresh buffer: body first, then the 16-byte
    /// header prepended in front of it.
    pub fn encode(&self) -> NetworkResult<Buffer> {
        let mut buf = Buffer::with_prepend(REQUEST_BUF_SIZE, frame::HEADER_SIZE);

        self.encode_body(&mut buf)?;

        let header = Header::for_request(self.reqid, self.twoway, self.event, buf.readable());
        header.prepend_to(&mut buf);

        Ok(buf)
    }

    fn encode_body(&self, buf: &mut Buffer) -> NetworkResult<()> {
        hessian::encode_string(buf, DUBBO_VERSION)?;
        hessian::encode_string(buf, &self.service)?;
        hessian::encode_string(buf, GENERIC_METHOD_VERSION)?;
        hessian::encode_string(buf, GENERIC_METHOD_NAME)?;
        hessian::encode_string(buf, self.style.param_types())?;

        // The generic argument vector: method name, null type hints
        // (overload resolution unsupported), escaped JSON args.
        hessian::encode_string(buf, &self.method)?;
        hessian::encode_null(buf);
        match self.style {
            CodecStyle::Strings => hessian::encode_string(buf, &self.args)?,
            CodecStyle::Bytes => hessian::encode_binary(buf, self.args.as_bytes()),
        }

        // Attachments are not serialized.
        hessian::encode_null(buf);

        Ok(())
    }
}

/// Parses the user's JSON, flattens it to an argument array (objects keep
/// member order) and escapes it down to ASCII so byte and character counts
/// agree on the wire.
fn rebuild_json_args(json: &str) -> NetworkResult<String> {
    let root: Value =
        serde_json::from_str(json).map_err(|_| NetworkError::Fatal(ErrorType::BadJson))?;

    let items: Vec<&Value> = match &root {
        Value::Array(items) => items.iter().collect(),
        Value::Object(map) => map.values().collect(),
        _ => return Err(NetworkError::Fatal(ErrorType::BadJson)),
    };

    let compact =
        serde_json::to_string(&items).map_err(|_| NetworkError::Fatal(ErrorType::BadJson))?;
    hessian::utf8_to_ascii(compact.as_bytes())
}

/// Result marker carried in the first body byte of an OK response.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ResponseKind {
    Exception,
    Value,
    Null,
}

#[derive(Debug)]
pub struct Response {
    pub reqid: i64,
    pub is_event: bool,
    /// Transport-level success: status byte 20.
    pub ok: bool,
    /// Unset for events.
    pub kind: Option<ResponseKind>,
    pub desc: &'static str,
    pub data: Option<Vec<u8>>,
    /// Response attachments are not consumed; always `None`.
    pub attach: Option<Vec<u8>>,
}

impl Response {
    /// Payload rendered for display: pretty-printed when it parses as JSON,
    /// raw text otherwise.
    pub fn render_data(&self) -> String {
        let data = match &self.data {
            Some(data) => data,
            None => return "NULL".to_string(),
        };

        let text = String::from_utf8_lossy(data);
        if text.starts_with('[') || text.starts_with('{') {
            if let Ok(value) = serde_json::from_str::<Value>(&text) {
                if let Ok(pretty) = serde_json::to_string_pretty(&value) {
                    return pretty;
                }
            }
        }
        text.into_owned()
    }
}

/// Decodes one complete frame off the receive buffer: header, then a
/// borrowed view of exactly `body_len` readable bytes, which is consumed
/// once body decoding is done.
pub fn decode_response(buf: &mut Buffer, style: CodecStyle) -> NetworkResult<Response> {
    if frame::remaining(buf)? != 0 {
        return Err(NetworkError::Wait);
    }

    let header = Header::decode(buf)?;

    let result = {
        let body = &buf.peek()[..header.body_len];
        decode_response_body(&header, body, style)
    };

    buf.retrieve(header.body_len);
    result
}

fn decode_response_body(
    header: &Header,
    body: &[u8],
    style: CodecStyle,
) -> NetworkResult<Response> {
    let mut cur = Cursor::new(body);

    let mut response = Response {
        reqid: header.reqid,
        is_event: header.is_event(),
        ok: header.status == frame::STATUS_OK,
        kind: None,
        desc: frame::status_desc(header.status),
        data: None,
        attach: None,
    };

    if header.status != frame::STATUS_OK {
        // Failed call: the body is a Hessian string describing the error.
        response.data = Some(hessian::decode_string(&mut cur)?.into_bytes());
        return Ok(response);
    }

    if response.is_event {
        // Heartbeat; no body to decode.
        return Ok(response);
    }

    // The result flag is a single-byte Hessian int.
    let raw = match body.first() {
        Some(&raw) => raw,
        None => return Err(NetworkError::Fatal(ErrorType::BadTag)),
    };
    if !(0x80..=0xbf).contains(&raw) {
        return Err(NetworkError::Fatal(ErrorType::BadTag));
    }
    cur.set_position(1);

    match i32::from(raw) - 0x90 {
        2 => response.kind = Some(ResponseKind::Null),
        0 => {
            response.kind = Some(ResponseKind::Exception);
            response.data = Some(hessian::decode_string(&mut cur)?.into_bytes());
        }
        1 => {
            response.kind = Some(ResponseKind::Value);
            response.data = Some(match style {
                CodecStyle::Strings => hessian::decode_string(&mut cur)?.into_bytes(),
                CodecStyle::Bytes => hessian::decode_binary(&mut cur)?,
            });
        }
        _ => return Err(NetworkError::Fatal(ErrorType::BadTag)),
    }

    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{HEADER_SIZE, HESSIAN2_SERIALIZATION_ID, STATUS_OK};
    use byteorder::{BigEndian, ByteOrder};

    fn response_buf(status: u8, flag_extra: u8, reqid: i64, body: &[u8]) -> Buffer {
        let mut buf = Buffer::with_prepend(512, HEADER_SIZE);
        buf.append(body);
        Header {
            flag: HESSIAN2_SERIALIZATION_ID | flag_extra,
            status,
            reqid,
            body_len: body.len(),
        }
        .prepend_to(&mut buf);
        buf
    }

    fn value_body(json: &str) -> Vec<u8> {
        let mut body = Buffer::new(0);
        body.append_u8(0x91);
        hessian::encode_string(&mut body, json).unwrap();
        body.peek().to_vec()
    }

    #[test]
    fn test_reqid_wraps_to_one() {
        let counter = AtomicI64::new(i64::max_value() - 2);
        assert_eq!(bump_reqid(&counter), i64::max_value() - 1);
        assert_eq!(bump_reqid(&counter), 1);
        assert_eq!(bump_reqid(&counter), 2);
    }

    #[test]
    fn test_reqids_are_monotonic() {
        let first = next_reqid();
        let second = next_reqid();
        assert!(second > first);
        assert!(first > 0);
    }

    #[test]
    fn test_rebuild_args_array() {
        assert_eq!(rebuild_json_args("[1, true, \"x\"]").unwrap(), "[1,true,\"x\"]");
        assert_eq!(rebuild_json_args("[]").unwrap(), "[]");
    }

    #[test]
    fn test_rebuild_args_object_keeps_member_order() {
        assert_eq!(
            rebuild_json_args("{\"z\": 1, \"a\": [2]}").unwrap(),
            "[1,[2]]"
        );
    }

    #[test]
    fn test_rebuild_args_escapes_non_ascii() {
        assert_eq!(
            rebuild_json_args("[\"héllo\"]").unwrap(),
            "[\"h\\u00e9llo\"]"
        );
    }

    #[test]
    fn test_rebuild_args_rejects_scalars() {
        assert_eq!(
            rebuild_json_args("42").unwrap_err(),
            NetworkError::Fatal(ErrorType::BadJson)
        );
        assert!(rebuild_json_args("not json").is_err());
    }

    #[test]
    fn test_minimal_request_frame() {
        let req = Request::new("S", "m", "[]", Some("{}")).unwrap();
        let buf = req.encode().unwrap();
        let bytes = buf.peek();

        assert_eq!(&bytes[..2], &[0xda, 0xbb]);
        assert_eq!(bytes[2], 0xc2);
        assert_eq!(bytes[3], 0x00);

        let reqid = BigEndian::read_i64(&bytes[4..12]);
        assert_eq!(reqid, req.reqid());

        let body_len = BigEndian::read_u32(&bytes[12..16]) as usize;
        assert_eq!(body_len, bytes.len() - HEADER_SIZE);

        assert!(frame::is_frame(&buf));
        assert_eq!(frame::remaining(&buf).unwrap(), 0);
    }

    #[test]
    fn test_request_body_field_order() {
        let req = Request::new("com.demo.Svc", "say", "[]", None).unwrap();
        let buf = req.encode().unwrap();
        let body = &buf.peek()[HEADER_SIZE..];

        let mut cur = Cursor::new(body);
        assert_eq!(hessian::decode_string(&mut cur).unwrap(), DUBBO_VERSION);
        assert_eq!(hessian::decode_string(&mut cur).unwrap(), "com.demo.Svc");
        assert_eq!(
            hessian::decode_string(&mut cur).unwrap(),
            GENERIC_METHOD_VERSION
        );
        assert_eq!(
            hessian::decode_string(&mut cur).unwrap(),
            GENERIC_METHOD_NAME
        );
        assert_eq!(
            hessian::decode_string(&mut cur).unwrap(),
            PARAM_TYPES_STRING
        );
        assert_eq!(hessian::decode_string(&mut cur).unwrap(), "say");
        hessian::decode_null(&mut cur).unwrap();
        assert_eq!(hessian::decode_string(&mut cur).unwrap(), "[]");
        hessian::decode_null(&mut cur).unwrap();
        assert_eq!(cur.position() as usize, body.len());
    }

    #[test]
    fn test_request_bytes_style_descriptor() {
        let req = Request::new("S", "m", "[]", None)
            .unwrap()
            .with_style(CodecStyle::Bytes);
        let buf = req.encode().unwrap();
        let body = &buf.peek()[HEADER_SIZE..];

        let mut cur = Cursor::new(body);
        for _ in 0..4 {
            hessian::decode_string(&mut cur).unwrap();
        }
        assert_eq!(hessian::decode_string(&mut cur).unwrap(), PARAM_TYPES_BYTES);
        hessian::decode_string(&mut cur).unwrap();
        hessian::decode_null(&mut cur).unwrap();
        assert_eq!(hessian::decode_binary(&mut cur).unwrap(), b"[]");
    }

    #[test]
    fn test_decode_value_response() {
        let mut buf = response_buf(STATUS_OK, 0, 5, &value_body("{\"n\":1}"));

        let res = decode_response(&mut buf, CodecStyle::Strings).unwrap();

        assert_eq!(res.reqid, 5);
        assert!(res.ok);
        assert!(!res.is_event);
        assert_eq!(res.kind, Some(ResponseKind::Value));
        assert_eq!(res.data.as_deref(), Some(&b"{\"n\":1}"[..]));
        assert_eq!(res.desc, "OK");
        assert_eq!(buf.readable(), 0);
    }

    #[test]
    fn test_decode_null_response() {
        let mut buf = response_buf(STATUS_OK, 0, 6, &[0x92]);

        let res = decode_response(&mut buf, CodecStyle::Strings).unwrap();

        assert!(res.ok);
        assert_eq!(res.kind, Some(ResponseKind::Null));
        assert_eq!(res.data, None);
        assert_eq!(res.render_data(), "NULL");
    }

    #[test]
    fn test_decode_exception_response() {
        let mut body = Buffer::new(0);
        body.append_u8(0x90);
        hessian::encode_string(&mut body, "boom").unwrap();
        let mut buf = response_buf(STATUS_OK, 0, 7, &body.peek().to_vec());

        let res = decode_response(&mut buf, CodecStyle::Strings).unwrap();

        assert!(res.ok);
        assert_eq!(res.kind, Some(ResponseKind::Exception));
        assert_eq!(res.data.as_deref(), Some(&b"boom"[..]));
    }

    #[test]
    fn test_decode_event_response_has_no_body() {
        let mut buf = response_buf(STATUS_OK, frame::FLAG_EVENT, 0, &[b'N']);

        let res = decode_response(&mut buf, CodecStyle::Strings).unwrap();

        assert!(res.is_event);
        assert_eq!(res.kind, None);
        assert_eq!(res.data, None);
    }

    #[test]
    fn test_decode_failed_status_reads_error_text() {
        let mut body = Buffer::new(0);
        hessian::encode_string(&mut body, "no such service").unwrap();
        let mut buf = response_buf(60, 0, 8, &body.peek().to_vec());

        let res = decode_response(&mut buf, CodecStyle::Strings).unwrap();

        assert!(!res.ok);
        assert_eq!(res.kind, None);
        assert_eq!(res.desc, "SERVICE NOT FOUND");
        assert_eq!(res.data.as_deref(), Some(&b"no such service"[..]));
    }

    #[test]
    fn test_decode_rejects_bad_result_flag() {
        let mut buf = response_buf(STATUS_OK, 0, 9, &[0x95]);
        assert_eq!(
            decode_response(&mut buf, CodecStyle::Strings).unwrap_err(),
            NetworkError::Fatal(ErrorType::BadTag)
        );

        let mut buf = response_buf(STATUS_OK, 0, 10, &[0x42]);
        assert!(decode_response(&mut buf, CodecStyle::Strings).is_err());
    }

    #[test]
    fn test_decode_incomplete_frame_waits() {
        let full = response_buf(STATUS_OK, 0, 11, &value_body("[]"));
        let mut partial = Buffer::new(64);
        partial.append(&full.peek()[..HEADER_SIZE + 1]);

        assert_eq!(
            decode_response(&mut partial, CodecStyle::Strings).unwrap_err(),
            NetworkError::Wait
        );
        // Nothing consumed while waiting.
        assert_eq!(partial.readable(), HEADER_SIZE + 1);
    }

    #[test]
    fn test_render_data_pretty_prints_json() {
        let res = Response {
            reqid: 1,
            is_event: false,
            ok: true,
            kind: Some(ResponseKind::Value),
            desc: "OK",
            data: Some(b"{\"a\":1}".to_vec()),
            attach: None,
        };
        assert_eq!(res.render_data(), "{\n  \"a\": 1\n}");

        let res = Response {
            data: Some(b"plain".to_vec()),
            ..res
        };
        assert_eq!(res.render_data(), "plain");
    }
}
