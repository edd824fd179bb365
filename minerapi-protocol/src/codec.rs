/// Request encoding and reply framing
use std::io::{self, ErrorKind, Read, Write};

use serde_json::Value;

use crate::{
    error::{DrainError, ReplyError},
    protocol::{
        ApiRequest, ApiStatus, Drain, PlainItem, PlainReply, PlainSection, RequestEncoding,
        Severity,
    },
};

const SECTION_SEPARATOR: char = '|';
const ITEM_SEPARATOR: char = ',';
const VALUE_SEPARATOR: char = '=';
const STATUS: &str = "STATUS";

/// Removes every NUL byte. The daemon terminates and pads its replies with them.
pub fn strip_nul(raw: &[u8]) -> Vec<u8> {
    raw.iter().copied().filter(|b| *b != 0).collect()
}

/// Strips NUL padding and parses the rest as a single JSON value.
pub fn decode_json_reply(raw: &[u8]) -> Result<Value, ReplyError> {
    let body = strip_nul(raw);
    if body.trim_ascii().is_empty() {
        return Err(ReplyError::Empty);
    }
    Ok(serde_json::from_slice(&body)?)
}

impl ApiRequest {
    pub fn write_to(&self, writer: &mut impl Write, encoding: RequestEncoding) -> io::Result<()> {
        match encoding {
            RequestEncoding::Json(policy) => {
                serde_json::to_writer(&mut *writer, &self.with_policy(policy))?;
            }
            RequestEncoding::Plain => write!(writer, "{}", self)?,
        }
        writer.flush()
    }

    pub fn to_bytes(&self, encoding: RequestEncoding) -> serde_json::Result<Vec<u8>> {
        match encoding {
            RequestEncoding::Json(policy) => serde_json::to_vec(&self.with_policy(policy)),
            RequestEncoding::Plain => Ok(self.to_string().into_bytes()),
        }
    }
}

impl Drain {
    /// Reads a reply from `reader` according to this strategy.
    pub fn read_from(&self, reader: &mut impl Read) -> Result<Vec<u8>, DrainError> {
        let chunk = self.chunk();
        let mut reply = Vec::with_capacity(chunk);
        let mut buf = vec![0u8; chunk];
        loop {
            let n = match reader.read(&mut buf) {
                Ok(n) => n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(source) => {
                    return Err(DrainError {
                        partial: reply,
                        source,
                    });
                }
            };
            reply.extend_from_slice(&buf[..n]);
            match self {
                Drain::SingleRead { .. } => break,
                _ if n == 0 => break,
                Drain::UntilNul { .. } if buf[n - 1] == 0 => break,
                _ => {}
            }
        }
        Ok(reply)
    }
}

impl PlainReply {
    /// Parses a reply in the plain text format.
    pub fn from_bytes(raw: &[u8]) -> Result<PlainReply, ReplyError> {
        let body = strip_nul(raw);
        let text = str::from_utf8(&body)?;
        let reply = PlainReply::new(
            text.split(SECTION_SEPARATOR)
                .filter(|section| !section.trim().is_empty())
                .map(parse_section)
                .collect(),
        );
        if reply.is_empty() {
            return Err(ReplyError::Empty);
        }
        Ok(reply)
    }
}

fn parse_section(section: &str) -> PlainSection {
    let mut title = String::new();
    let mut items = Vec::new();
    // Empty items are skipped but still count towards the index of bare values
    for (index, item) in section.split(ITEM_SEPARATOR).enumerate() {
        if item.is_empty() {
            continue;
        }
        let (name, value) = match item.split_once(VALUE_SEPARATOR) {
            Some((name, value)) => (name.to_string(), value.to_string()),
            None => (index.to_string(), item.to_string()),
        };
        if index == 0 {
            title = match item.split_once(VALUE_SEPARATOR) {
                Some((name, value)) if value.starts_with(|c: char| c.is_ascii_digit()) => {
                    format!("{}{}", name, value)
                }
                Some((name, _)) => name.to_string(),
                None => item.to_string(),
            };
        }
        items.push(PlainItem { name, value });
    }
    PlainSection::new(title, items)
}

impl ApiStatus {
    /// Reads the STATUS section of a JSON reply.
    pub fn from_json(reply: &Value) -> Result<ApiStatus, ReplyError> {
        let object = reply.as_object().ok_or(ReplyError::NotAnObject)?;
        let status = match object.get(STATUS).ok_or(ReplyError::MissingField(STATUS))? {
            Value::Array(sections) => sections.first().ok_or(ReplyError::MissingField(STATUS))?,
            other => other,
        };
        let status = status.as_object().ok_or(ReplyError::NotAnObject)?;

        let severity = status
            .get(STATUS)
            .and_then(Value::as_str)
            .ok_or(ReplyError::MissingField(STATUS))?;
        let severity = Severity::from_code(severity).ok_or_else(|| ReplyError::InvalidField {
            field: STATUS,
            value: severity.to_string(),
        })?;
        let code = status
            .get("Code")
            .and_then(Value::as_i64)
            .ok_or(ReplyError::MissingField("Code"))?;
        let msg = match status.get("Msg").ok_or(ReplyError::MissingField("Msg"))? {
            Value::String(msg) => msg.clone(),
            other => other.to_string(),
        };
        let description = status
            .get("Description")
            .and_then(Value::as_str)
            .map(str::to_string);

        Ok(ApiStatus {
            severity,
            code,
            msg,
            description,
        })
    }

    /// Reads the STATUS section of a plain text reply.
    pub fn from_plain(reply: &PlainReply) -> Result<ApiStatus, ReplyError> {
        let section = reply
            .sections()
            .iter()
            .find(|section| section.title() == STATUS)
            .ok_or(ReplyError::MissingField(STATUS))?;

        let severity = section.get(STATUS).ok_or(ReplyError::MissingField(STATUS))?;
        let severity = Severity::from_code(severity).ok_or_else(|| ReplyError::InvalidField {
            field: STATUS,
            value: severity.to_string(),
        })?;
        let code = section.get("Code").ok_or(ReplyError::MissingField("Code"))?;
        let code = code.parse::<i64>().map_err(|_| ReplyError::InvalidField {
            field: "Code",
            value: code.to_string(),
        })?;
        let msg = section.get("Msg").ok_or(ReplyError::MissingField("Msg"))?;

        Ok(ApiStatus {
            severity,
            code,
            msg: msg.to_string(),
            description: section.get("Description").map(str::to_string),
        })
    }
}

#[cfg(feature = "tokio")]
pub use tokio_codec::ReplyCodec;

#[cfg(feature = "tokio")]
mod tokio_codec {
    use std::io;

    use bytes::{BufMut, BytesMut};
    use tokio_util::codec::{Decoder, Encoder};

    use crate::protocol::{ApiRequest, Drain, RequestEncoding};

    /// Codec for a single request/reply exchange on an async stream.
    ///
    /// Decoding yields exactly one frame: the raw reply, NUL padding included,
    /// framed according to the configured [`Drain`].
    #[derive(Debug, Clone)]
    pub struct ReplyCodec {
        encoding: RequestEncoding,
        drain: Drain,
        done: bool,
    }

    impl ReplyCodec {
        pub fn new(encoding: RequestEncoding, drain: Drain) -> ReplyCodec {
            ReplyCodec {
                encoding,
                drain,
                done: false,
            }
        }

        /// The number of bytes to reserve for the next read
        pub fn read_hint(&self) -> usize {
            self.drain.chunk()
        }
    }

    impl<'a> Encoder<&'a ApiRequest> for ReplyCodec {
        type Error = io::Error;

        fn encode(&mut self, item: &'a ApiRequest, dst: &mut BytesMut) -> Result<(), Self::Error> {
            let mut writer = dst.writer();
            item.write_to(&mut writer, self.encoding)
        }
    }

    impl Decoder for ReplyCodec {
        type Item = Vec<u8>;
        type Error = io::Error;

        fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
            if self.done || src.is_empty() {
                return Ok(None);
            }
            match self.drain {
                Drain::UntilClose { .. } => Ok(None),
                Drain::SingleRead { chunk } => {
                    self.done = true;
                    let len = chunk.min(src.len());
                    let frame = src.split_to(len).to_vec();
                    src.clear();
                    Ok(Some(frame))
                }
                Drain::UntilNul { .. } => {
                    if src.last() == Some(&0) {
                        self.done = true;
                        Ok(Some(src.split().to_vec()))
                    } else {
                        Ok(None)
                    }
                }
            }
        }

        fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
            if self.done {
                return Ok(None);
            }
            self.done = true;
            let frame = match self.drain {
                Drain::SingleRead { chunk } => {
                    let len = chunk.min(src.len());
                    src.split_to(len).to_vec()
                }
                _ => src.split().to_vec(),
            };
            src.clear();
            Ok(Some(frame))
        }
    }

}

#[cfg(test)]
mod test {
    use std::io::{self, Cursor, Read};

    use serde_json::json;

    use crate::error::ReplyError;
    use crate::protocol::{
        ApiRequest, ApiStatus, Drain, ParameterPolicy, PlainReply, RequestEncoding, Severity,
    };

    use super::{decode_json_reply, strip_nul};

    /// Hands out the data in fixed pieces, like a socket receiving several segments.
    struct Segmented {
        segments: Vec<Vec<u8>>,
    }

    impl Read for Segmented {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.segments.is_empty() {
                return Ok(0);
            }
            let segment = &mut self.segments[0];
            let n = segment.len().min(buf.len());
            buf[..n].copy_from_slice(&segment[..n]);
            segment.drain(..n);
            if segment.is_empty() {
                self.segments.remove(0);
            }
            Ok(n)
        }
    }

    struct FailingReader {
        before: Option<Vec<u8>>,
    }

    impl Read for FailingReader {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self.before.take() {
                Some(data) => {
                    buf[..data.len()].copy_from_slice(&data);
                    Ok(data.len())
                }
                None => Err(io::Error::from(io::ErrorKind::ConnectionReset)),
            }
        }
    }

    /// Delivers `before`, then times out like a socket with a read timeout.
    struct StallingReader {
        before: Option<Vec<u8>>,
    }

    impl Read for StallingReader {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self.before.take() {
                Some(data) => {
                    buf[..data.len()].copy_from_slice(&data);
                    Ok(data.len())
                }
                None => Err(io::Error::from(io::ErrorKind::WouldBlock)),
            }
        }
    }

    #[test]
    fn write_json_request_always_present() {
        let request = ApiRequest::new("summary", None);
        let out = request
            .to_bytes(RequestEncoding::Json(ParameterPolicy::AlwaysPresent))
            .unwrap();
        assert_eq!(out, br#"{"command":"summary","parameter":""}"#.to_vec());
    }

    #[test]
    fn write_json_request_omit_when_absent() {
        let request = ApiRequest::new("summary", None);
        let out = request
            .to_bytes(RequestEncoding::Json(ParameterPolicy::OmitWhenAbsent))
            .unwrap();
        assert_eq!(out, br#"{"command":"summary"}"#.to_vec());

        let request = ApiRequest::parse("pga|0", '|');
        let out = request
            .to_bytes(RequestEncoding::Json(ParameterPolicy::OmitWhenAbsent))
            .unwrap();
        assert_eq!(out, br#"{"command":"pga","parameter":"0"}"#.to_vec());
    }

    #[test]
    fn write_plain_request() {
        let request = ApiRequest::new("pga", Some("0".to_string()));
        assert_eq!(request.to_bytes(RequestEncoding::Plain).unwrap(), b"pga|0".to_vec());
    }

    #[test]
    fn strip_nul_is_idempotent() {
        let raw = b"\0{\"a\"\0:1}\0\0\0";
        let once = strip_nul(raw);
        assert_eq!(once, b"{\"a\":1}".to_vec());
        assert_eq!(strip_nul(&once), once);
    }

    #[test]
    fn decode_padded_reply() {
        let value = decode_json_reply(b"{\"STATUS\":[{\"STATUS\":\"S\"}],\"id\":1}\0\0").unwrap();
        assert_eq!(value, json!({"STATUS": [{"STATUS": "S"}], "id": 1}));
    }

    #[test]
    fn decode_empty_reply() {
        assert!(matches!(decode_json_reply(b""), Err(ReplyError::Empty)));
        assert!(matches!(decode_json_reply(b"\0\0"), Err(ReplyError::Empty)));
    }

    #[test]
    fn decode_invalid_reply() {
        match decode_json_reply(b"STATUS=S,Code=11|\0") {
            Err(ReplyError::InvalidJson(_)) => {}
            other => panic!("expected InvalidJson, got {:?}", other),
        }
    }

    #[test]
    fn until_close_concatenates() {
        let mut reader = Segmented {
            segments: vec![b"{\"a\"".to_vec(), b":1}".to_vec(), b"\0".to_vec()],
        };
        let reply = Drain::until_close().read_from(&mut reader).unwrap();
        assert_eq!(reply, b"{\"a\":1}\0".to_vec());
    }

    #[test]
    fn single_read_takes_first_segment_only() {
        let mut reader = Segmented {
            segments: vec![b"{\"a\"".to_vec(), b":1}".to_vec()],
        };
        let reply = Drain::single_read().read_from(&mut reader).unwrap();
        assert_eq!(reply, b"{\"a\"".to_vec());
    }

    #[test]
    fn single_read_truncates_to_chunk() {
        let data = vec![b'x'; 3000];
        let mut cursor = Cursor::new(data);
        let reply = Drain::single_read().read_from(&mut cursor).unwrap();
        assert_eq!(reply.len(), 1024);
    }

    #[test]
    fn single_read_accepts_empty() {
        let mut cursor = Cursor::new(Vec::new());
        let reply = Drain::single_read().read_from(&mut cursor).unwrap();
        assert!(reply.is_empty());
    }

    #[test]
    fn until_nul_stops_at_terminator() {
        let mut reader = Segmented {
            segments: vec![b"STATUS=S|".to_vec(), b"\0".to_vec(), b"ignored".to_vec()],
        };
        let reply = Drain::until_nul().read_from(&mut reader).unwrap();
        assert_eq!(reply, b"STATUS=S|\0".to_vec());
    }

    #[test]
    fn drain_error_reports_received_bytes() {
        let mut reader = FailingReader {
            before: Some(b"{\"a\"".to_vec()),
        };
        let err = Drain::until_close().read_from(&mut reader).unwrap_err();
        assert_eq!(err.received(), 4);
        assert_eq!(err.partial, b"{\"a\"".to_vec());
        assert_eq!(err.source.kind(), io::ErrorKind::ConnectionReset);
        assert!(!err.is_timeout());

        let mut reader = FailingReader { before: None };
        let err = Drain::until_close().read_from(&mut reader).unwrap_err();
        assert_eq!(err.received(), 0);
    }

    #[test]
    fn drain_timeout_keeps_partial_reply() {
        let mut reader = StallingReader {
            before: Some(b"{\"id\":1}\0\0".to_vec()),
        };
        let err = Drain::until_close().read_from(&mut reader).unwrap_err();
        assert!(err.is_timeout());
        assert_eq!(decode_json_reply(&err.partial).unwrap(), json!({"id": 1}));
    }

    #[test]
    fn parse_plain_reply() {
        let raw = b"STATUS=S,When=1,Code=9,Msg=1 GPU(s),Description=cgminer 4.9|GPU=0,Enabled=Y,Status=Alive|\0";
        let reply = PlainReply::from_bytes(raw).unwrap();
        assert_eq!(reply.sections().len(), 2);
        assert_eq!(reply.sections()[0].title(), "STATUS");
        assert_eq!(reply.sections()[1].title(), "GPU0");
        assert_eq!(reply.sections()[1].get("Status"), Some("Alive"));

        let status = ApiStatus::from_plain(&reply).unwrap();
        assert_eq!(status.severity, Severity::Success);
        assert_eq!(status.code, 9);
        assert_eq!(status.msg, "1 GPU(s)");
        assert_eq!(status.description.as_deref(), Some("cgminer 4.9"));
    }

    #[test]
    fn plain_items_without_name_use_index() {
        let reply = PlainReply::from_bytes(b"BYE,later|").unwrap();
        let section = &reply.sections()[0];
        assert_eq!(section.title(), "BYE");
        assert_eq!(section.items()[1].name, "1");
        assert_eq!(section.items()[1].value, "later");
    }

    #[test]
    fn plain_reply_without_sections_is_empty() {
        assert!(matches!(
            PlainReply::from_bytes(b"\0\0"),
            Err(ReplyError::Empty)
        ));
        assert!(matches!(
            PlainReply::from_bytes(b"| |\n|\0"),
            Err(ReplyError::Empty)
        ));
    }

    #[test]
    fn write_to_matches_to_bytes() {
        let request = ApiRequest::parse("pga|0", '|');
        for encoding in [
            RequestEncoding::Json(ParameterPolicy::AlwaysPresent),
            RequestEncoding::Plain,
        ] {
            let mut written = Vec::new();
            request.write_to(&mut written, encoding).unwrap();
            assert_eq!(written, request.to_bytes(encoding).unwrap());
        }
    }

    #[test]
    fn empty_plain_items_are_skipped() {
        let reply = PlainReply::from_bytes(b",,later,When=5|GPU=1,,Enabled=Y|").unwrap();
        let untitled = &reply.sections()[0];
        assert_eq!(untitled.title(), "");
        assert_eq!(untitled.items().len(), 2);
        assert_eq!(untitled.items()[0].name, "2");
        assert_eq!(untitled.items()[0].value, "later");
        assert_eq!(untitled.get("When"), Some("5"));

        let gpu = &reply.sections()[1];
        assert_eq!(gpu.title(), "GPU1");
        assert_eq!(gpu.items().len(), 2);
        assert_eq!(
            reply.to_string(),
            "(\n   [2] => later\n   [When] => 5\n)\n[GPU1] =>\n(\n   [GPU] => 1\n   [Enabled] => Y\n)\n"
        );
    }

    #[test]
    fn display_plain_reply() {
        let reply = PlainReply::from_bytes(b"STATUS=S,Code=11|").unwrap();
        assert_eq!(
            reply.to_string(),
            "[STATUS] =>\n(\n   [STATUS] => S\n   [Code] => 11\n)\n"
        );
    }

    #[test]
    fn status_from_json() {
        let reply = json!({
            "STATUS": [{"STATUS": "E", "When": 1, "Code": 14, "Msg": "Invalid command", "Description": "cgminer"}],
            "id": 1
        });
        let status = ApiStatus::from_json(&reply).unwrap();
        assert_eq!(status.severity, Severity::Error);
        assert!(!status.severity.is_ok());
        assert_eq!(status.code, 14);
        assert_eq!(status.msg, "Invalid command");
    }

    #[test]
    fn status_lookup_on_non_object() {
        assert!(matches!(
            ApiStatus::from_json(&json!([1, 2])),
            Err(ReplyError::NotAnObject)
        ));
        assert!(matches!(
            ApiStatus::from_json(&json!({"id": 1})),
            Err(ReplyError::MissingField("STATUS"))
        ));
    }
}
