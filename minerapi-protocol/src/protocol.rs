use std::fmt::Display;

use serde::Serialize;

/// The TCP port the API daemon listens on unless configured otherwise.
pub const DEFAULT_API_PORT: u16 = 4028;

/// Separator between command and parameter in a command token such as `pga|0`.
pub const DEFAULT_SEPARATOR: char = '|';

/// Decides how a request without a parameter is encoded.
///
/// Clients in the wild disagree on this: some always send a `parameter` key
/// (empty when there is nothing to send), others leave it out. Daemons accept
/// both, so both are available.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum ParameterPolicy {
    /// `{"command":"summary","parameter":""}`
    AlwaysPresent,
    /// `{"command":"summary"}`
    #[default]
    OmitWhenAbsent,
}

/// The two request encodings a daemon understands.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum RequestEncoding {
    /// A JSON object, answered with a JSON document.
    Json(ParameterPolicy),
    /// The bare command text (`pga|0`), answered in the plain reply format.
    Plain,
}

impl Default for RequestEncoding {
    fn default() -> Self {
        RequestEncoding::Json(ParameterPolicy::default())
    }
}

/// How the reply is read off the socket.
///
/// The daemon writes a single reply, pads it with NUL bytes and closes the
/// connection. Different clients rely on different parts of that behavior.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Drain {
    /// Read chunks of at most `chunk` bytes until the peer closes.
    UntilClose { chunk: usize },
    /// Issue exactly one read of at most `chunk` bytes.
    /// Longer replies are truncated.
    SingleRead { chunk: usize },
    /// Read until the peer closes or a chunk ends in a NUL byte.
    UntilNul { chunk: usize },
}

impl Drain {
    pub const UNTIL_CLOSE_CHUNK: usize = 4096;
    pub const SINGLE_READ_CHUNK: usize = 1024;
    pub const UNTIL_NUL_CHUNK: usize = 65535;

    pub fn until_close() -> Drain {
        Drain::UntilClose {
            chunk: Self::UNTIL_CLOSE_CHUNK,
        }
    }

    pub fn single_read() -> Drain {
        Drain::SingleRead {
            chunk: Self::SINGLE_READ_CHUNK,
        }
    }

    pub fn until_nul() -> Drain {
        Drain::UntilNul {
            chunk: Self::UNTIL_NUL_CHUNK,
        }
    }

    /// The size of a single read
    pub fn chunk(&self) -> usize {
        match self {
            Drain::UntilClose { chunk } | Drain::SingleRead { chunk } | Drain::UntilNul { chunk } => {
                *chunk
            }
        }
    }
}

impl Default for Drain {
    fn default() -> Self {
        Drain::until_close()
    }
}

/// A single API request. Each request is answered by exactly one reply,
/// after which the daemon closes the connection.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct ApiRequest {
    command: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    parameter: Option<String>,
}

impl ApiRequest {
    pub fn new(command: impl Into<String>, parameter: Option<String>) -> ApiRequest {
        ApiRequest {
            command: command.into(),
            parameter,
        }
    }

    /// Splits a command token like `pga|0` at the first `separator`.
    /// Everything after the first separator is the parameter.
    pub fn parse(token: &str, separator: char) -> ApiRequest {
        match token.split_once(separator) {
            Some((command, parameter)) => ApiRequest::new(command, Some(parameter.to_string())),
            None => ApiRequest::new(token, None),
        }
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn parameter(&self) -> Option<&str> {
        self.parameter.as_deref()
    }

    /// Returns the request as it is put on the wire under `policy`.
    pub(crate) fn with_policy(&self, policy: ParameterPolicy) -> ApiRequest {
        match policy {
            ParameterPolicy::AlwaysPresent => ApiRequest {
                command: self.command.clone(),
                parameter: Some(self.parameter.clone().unwrap_or_default()),
            },
            ParameterPolicy::OmitWhenAbsent => self.clone(),
        }
    }
}

impl Display for ApiRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.parameter {
            Some(parameter) => write!(f, "{}{}{}", self.command, DEFAULT_SEPARATOR, parameter),
            None => write!(f, "{}", self.command),
        }
    }
}

#[test]
fn parse_command_token() {
    assert_eq!(ApiRequest::parse("summary", '|'), ApiRequest::new("summary", None));
    assert_eq!(
        ApiRequest::parse("pga|0", '|'),
        ApiRequest::new("pga", Some("0".to_string()))
    );
    assert_eq!(
        ApiRequest::parse("pgaset:0,clock,200", ':'),
        ApiRequest::new("pgaset", Some("0,clock,200".to_string()))
    );
    assert_eq!(
        ApiRequest::parse("a|b|c", '|'),
        ApiRequest::new("a", Some("b|c".to_string()))
    );
}

/// Severity of a STATUS section.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Severity {
    Success,
    Info,
    Warning,
    Error,
    /// The daemon did not recognise its own message code
    Fatal,
}

impl Severity {
    pub fn from_code(code: &str) -> Option<Severity> {
        match code {
            "S" => Some(Severity::Success),
            "I" => Some(Severity::Info),
            "W" => Some(Severity::Warning),
            "E" => Some(Severity::Error),
            "F" => Some(Severity::Fatal),
            _ => None,
        }
    }

    pub fn code(&self) -> char {
        match self {
            Severity::Success => 'S',
            Severity::Info => 'I',
            Severity::Warning => 'W',
            Severity::Error => 'E',
            Severity::Fatal => 'F',
        }
    }

    /// Whether the daemon executed the command
    pub fn is_ok(&self) -> bool {
        matches!(self, Severity::Success | Severity::Info)
    }
}

impl Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// The STATUS section every reply starts with.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ApiStatus {
    pub severity: Severity,
    pub code: i64,
    pub msg: String,
    pub description: Option<String>,
}

/// A single `name=value` item of a plain text reply.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PlainItem {
    pub name: String,
    pub value: String,
}

/// A section of a plain text reply, e.g. `STATUS=S,Code=11,Msg=Summary`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PlainSection {
    title: String,
    items: Vec<PlainItem>,
}

impl PlainSection {
    pub fn new(title: String, items: Vec<PlainItem>) -> PlainSection {
        PlainSection { title, items }
    }

    /// Name of the first item, with its value appended when that value is a
    /// device index (`GPU=0` gives `GPU0`). Empty when the first item is empty.
    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn items(&self) -> &[PlainItem] {
        &self.items
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.items
            .iter()
            .find(|item| item.name == name)
            .map(|item| item.value.as_str())
    }
}

/// A reply in the plain text format: `|`-separated sections of
/// comma-separated items.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct PlainReply {
    sections: Vec<PlainSection>,
}

impl PlainReply {
    pub fn new(sections: Vec<PlainSection>) -> PlainReply {
        PlainReply { sections }
    }

    pub fn sections(&self) -> &[PlainSection] {
        &self.sections
    }

    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }
}

impl Display for PlainReply {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for section in &self.sections {
            if !section.title.is_empty() {
                writeln!(f, "[{}] =>", section.title)?;
            }
            writeln!(f, "(")?;
            for item in &section.items {
                writeln!(f, "   [{}] => {}", item.name, item.value)?;
            }
            writeln!(f, ")")?;
        }
        Ok(())
    }
}
