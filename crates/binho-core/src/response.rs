//! Response classification
//!
//! Every line read from the adapter is sorted into one of five kinds:
//!
//! 1. `-OK...` is an [`ResponseKind::Ack`] with no payload.
//! 2. `-<TAG> ...` matching the pending command's expected prefix is
//!    [`ResponseKind::Data`]; the payload is whatever follows the prefix.
//! 3. Any other `-` line while a command is pending is an
//!    [`ResponseKind::Error`] (firmware error or desynchronisation).
//! 4. `!<SOURCE>[ <VALUE>]` is an [`ResponseKind::Interrupt`].
//! 5. Everything else is [`ResponseKind::Unsolicited`].
//!
//! The classifier knows nothing about payload formats; drivers parse them.

/// Reply prefix for a successful command without data
pub const ACK: &str = "-OK";

/// Leading character of every synchronous reply
pub const REPLY_MARKER: char = '-';

/// Leading character of an interrupt notification
pub const INTERRUPT_MARKER: char = '!';

/// How a line relates to the request/response cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResponseKind {
    /// Command succeeded without data
    Ack,
    /// Reply line that does not match the pending command
    Error,
    /// Reply carrying data for the pending command
    Data,
    /// Asynchronous notification from the adapter
    Interrupt,
    /// Log/status chatter or a reply with nothing waiting for it
    Unsolicited,
}

/// One classified line from the adapter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    raw: String,
    kind: ResponseKind,
    payload: Option<String>,
}

impl Response {
    /// Build a response from its parts
    pub fn new(raw: impl Into<String>, kind: ResponseKind, payload: Option<String>) -> Self {
        Self {
            raw: raw.into(),
            kind,
            payload,
        }
    }

    /// Line exactly as received (terminator stripped)
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// Classification of the line
    pub fn kind(&self) -> ResponseKind {
        self.kind
    }

    /// Text following the matched prefix, if any
    pub fn payload(&self) -> Option<&str> {
        self.payload.as_deref()
    }

    /// Consume the response, returning the payload or an empty string
    pub fn into_payload(self) -> String {
        self.payload.unwrap_or_default()
    }
}

/// Classify `line` against the expected prefix of the pending command
///
/// `expected` is `None` when no exchange is outstanding; reply lines are
/// then unsolicited rather than errors.
pub fn classify(line: &str, expected: Option<&str>) -> Response {
    if line.starts_with(ACK) {
        return Response::new(line, ResponseKind::Ack, None);
    }

    if line.starts_with(REPLY_MARKER) {
        let Some(expected) = expected else {
            return Response::new(line, ResponseKind::Unsolicited, None);
        };
        if expected != ACK && has_subsystem_tag(line) {
            if let Some(payload) = strip_reply_prefix(line, expected) {
                return Response::new(line, ResponseKind::Data, Some(payload.to_string()));
            }
        }
        return Response::new(line, ResponseKind::Error, None);
    }

    if let Some((_, value)) = parse_interrupt(line) {
        return Response::new(line, ResponseKind::Interrupt, Some(value.to_string()));
    }

    Response::new(line, ResponseKind::Unsolicited, None)
}

/// Split an interrupt line into its source tag and value
///
/// Returns `None` unless the line is `!` followed by an alphanumeric tag,
/// optionally followed by whitespace and a value.
pub fn parse_interrupt(line: &str) -> Option<(&str, &str)> {
    let body = line.strip_prefix(INTERRUPT_MARKER)?;
    let (source, value) = match body.split_once(' ') {
        Some((source, value)) => (source, value.trim()),
        None => (body, ""),
    };
    if is_tag(source) {
        Some((source, value))
    } else {
        None
    }
}

fn has_subsystem_tag(line: &str) -> bool {
    let body = &line[REPLY_MARKER.len_utf8()..];
    let tag = body.split(' ').next().unwrap_or_default();
    is_tag(tag)
}

fn is_tag(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_alphanumeric())
}

/// Remove `prefix` from `line` if it ends on a token boundary
fn strip_reply_prefix<'a>(line: &'a str, prefix: &str) -> Option<&'a str> {
    let rest = line.strip_prefix(prefix)?;
    if rest.is_empty() {
        Some(rest)
    } else if rest.starts_with(' ') || prefix.ends_with(' ') {
        Some(rest.trim_start())
    } else {
        None
    }
}
