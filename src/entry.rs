//! Core value types plus the `Op` tagged mutation record and its
//! self-describing textual codec.
//!
//! Records are encoded as balanced-parenthesis s-expressions, parsed
//! with `nom` in the same combinator style the teacher's DSL parsers
//! use for their own textual grammars. `decode` never panics on bad
//! input: a structurally invalid or trailing-garbage record yields
//! `None`, per `spec.md` §4.A/§7 ("decode returns a nullable result").

use std::fmt;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use nom::branch::alt;
use nom::bytes::complete::escaped_transform;
use nom::character::complete::{char, multispace0, none_of, one_of};
use nom::combinator::{all_consuming, map, opt, recognize, value};
use nom::multi::{many0, many1};
use nom::sequence::{delimited, preceded, terminated};
use nom::IResult;

// ── Value types ──────────────────────────────────────────────

/// Opaque identity of the connection that produced or owns something.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub String);

impl ConnectionId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Name of a queue. Queues are keyed by this newtype, not by raw `String`,
/// so that `Directory`'s maps cannot be accidentally indexed by the wrong
/// kind of string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QueueName(pub String);

impl QueueName {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Does this name start with `prefix`? Used by `Directory::list`.
    pub fn starts_with(&self, prefix: &str) -> bool {
        self.0.starts_with(prefix)
    }
}

impl fmt::Display for QueueName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// `(queue_name, sequence)` — see `spec.md` §3. `sequence` is a 64-bit
/// counter allocated per queue, never reused even across removals.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MessageId {
    pub queue: QueueName,
    pub sequence: u64,
}

/// Request/response hint carried verbatim in `Message`; the core never
/// branches on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Request,
    Response,
}

/// Opaque payload plus the routing hints a transport attaches. The core
/// stores this verbatim and never inspects `payload`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub kind: MessageKind,
    pub reply_to: Option<MessageId>,
    pub origin: ConnectionId,
    pub payload: Vec<u8>,
}

/// One stored message plus the metadata the core itself attaches at
/// `send` time: a monotonic timestamp and the producing connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub timestamp_ns: u64,
    pub origin: ConnectionId,
    pub message: Message,
}

/// One journalled mutation. Exactly four variants, matching `spec.md` §4.A.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Op {
    Add {
        owner: Option<ConnectionId>,
        name: QueueName,
    },
    Remove {
        name: QueueName,
    },
    Ack {
        id: MessageId,
    },
    Send {
        origin: ConnectionId,
        name: QueueName,
        id: u64,
        message: Message,
    },
}

// ── Encoding ─────────────────────────────────────────────────

fn encode_atom(out: &mut String, s: &str) {
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            _ => out.push(c),
        }
    }
    out.push('"');
}

fn encode_owner(out: &mut String, owner: &Option<ConnectionId>) {
    match owner {
        None => out.push_str("()"),
        Some(c) => {
            out.push_str("(owner ");
            encode_atom(out, c.as_str());
            out.push(')');
        }
    }
}

fn encode_mid(out: &mut String, id: &MessageId) {
    out.push_str("(mid ");
    encode_atom(out, id.queue.as_str());
    out.push(' ');
    out.push_str(&id.sequence.to_string());
    out.push(')');
}

fn encode_reply_to(out: &mut String, reply_to: &Option<MessageId>) {
    match reply_to {
        None => out.push_str("()"),
        Some(id) => encode_mid(out, id),
    }
}

fn encode_message(out: &mut String, message: &Message) {
    out.push_str("(kind ");
    out.push_str(match message.kind {
        MessageKind::Request => "request",
        MessageKind::Response => "response",
    });
    out.push_str(") (reply-to ");
    encode_reply_to(out, &message.reply_to);
    out.push_str(") (origin ");
    encode_atom(out, message.origin.as_str());
    out.push_str(") (payload ");
    encode_atom(out, &BASE64.encode(&message.payload));
    out.push(')');
}

/// Renders `op` to its textual record. `decode(&encode(op)) == Some(op)`
/// for every well-formed `Op`.
pub fn encode(op: &Op) -> String {
    let mut out = String::new();
    match op {
        Op::Add { owner, name } => {
            out.push_str("(add ");
            encode_owner(&mut out, owner);
            out.push(' ');
            encode_atom(&mut out, name.as_str());
            out.push(')');
        }
        Op::Remove { name } => {
            out.push_str("(remove ");
            encode_atom(&mut out, name.as_str());
            out.push(')');
        }
        Op::Ack { id } => {
            out.push_str("(ack ");
            encode_mid(&mut out, id);
            out.push(')');
        }
        Op::Send {
            origin,
            name,
            id,
            message,
        } => {
            out.push_str("(send ");
            encode_atom(&mut out, origin.as_str());
            out.push(' ');
            encode_atom(&mut out, name.as_str());
            out.push(' ');
            out.push_str(&id.to_string());
            out.push(' ');
            encode_message(&mut out, message);
            out.push(')');
        }
    }
    out
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", encode(self))
    }
}

// ── Parsing (generic s-expression tree) ─────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
enum Elem {
    Atom(String),
    List(Vec<Elem>),
}

fn quoted_atom(input: &str) -> IResult<&str, String> {
    delimited(
        char('"'),
        map(
            opt(escaped_transform(
                none_of("\"\\"),
                '\\',
                alt((value('\\', char('\\')), value('"', char('"')))),
            )),
            |s: Option<String>| s.unwrap_or_default(),
        ),
        char('"'),
    )(input)
}

fn bare_atom(input: &str) -> IResult<&str, String> {
    map(
        recognize(many1(one_of(
            "abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789_.:-",
        ))),
        |s: &str| s.to_string(),
    )(input)
}

fn element(input: &str) -> IResult<&str, Elem> {
    preceded(
        multispace0,
        alt((
            map(quoted_atom, Elem::Atom),
            map(bare_atom, Elem::Atom),
            map(list, Elem::List),
        )),
    )(input)
}

fn list(input: &str) -> IResult<&str, Vec<Elem>> {
    delimited(
        char('('),
        many0(element),
        preceded(multispace0, char(')')),
    )(input)
}

fn root(input: &str) -> IResult<&str, Elem> {
    terminated(map(list, Elem::List), multispace0)(input)
}

// ── Decoding ─────────────────────────────────────────────────

fn as_atom(e: &Elem) -> Option<&str> {
    match e {
        Elem::Atom(s) => Some(s),
        Elem::List(_) => None,
    }
}

fn as_list(e: &Elem) -> Option<&[Elem]> {
    match e {
        Elem::List(parts) => Some(parts),
        Elem::Atom(_) => None,
    }
}

fn decode_owner(e: &Elem) -> Option<Option<ConnectionId>> {
    let parts = as_list(e)?;
    match parts {
        [] => Some(None),
        [tag_elem, value_elem] if as_atom(tag_elem)? == "owner" => {
            Some(Some(ConnectionId::new(as_atom(value_elem)?)))
        }
        _ => None,
    }
}

fn decode_mid(e: &Elem) -> Option<MessageId> {
    let parts = as_list(e)?;
    let [tag_elem, name_elem, seq_elem] = parts else {
        return None;
    };
    if as_atom(tag_elem)? != "mid" {
        return None;
    }
    let queue = QueueName::new(as_atom(name_elem)?);
    let sequence = as_atom(seq_elem)?.parse::<u64>().ok()?;
    Some(MessageId { queue, sequence })
}

fn decode_reply_to(e: &Elem) -> Option<Option<MessageId>> {
    let parts = as_list(e)?;
    if parts.is_empty() {
        Some(None)
    } else {
        Some(Some(decode_mid(e)?))
    }
}

fn decode_kind(e: &Elem) -> Option<MessageKind> {
    let parts = as_list(e)?;
    let [tag_elem, kind_elem] = parts else {
        return None;
    };
    if as_atom(tag_elem)? != "kind" {
        return None;
    }
    match as_atom(kind_elem)? {
        "request" => Some(MessageKind::Request),
        "response" => Some(MessageKind::Response),
        _ => None,
    }
}

fn decode_tagged_atom(e: &Elem, expected_tag: &str) -> Option<String> {
    let parts = as_list(e)?;
    let [tag_elem, value_elem] = parts else {
        return None;
    };
    if as_atom(tag_elem)? != expected_tag {
        return None;
    }
    Some(as_atom(value_elem)?.to_string())
}

fn decode_message(parts: &[Elem]) -> Option<Message> {
    let [kind_elem, reply_elem, origin_elem, payload_elem] = parts else {
        return None;
    };
    let kind = decode_kind(kind_elem)?;
    let reply_to = decode_reply_to(reply_elem)?;
    let origin = ConnectionId::new(decode_tagged_atom(origin_elem, "origin")?);
    let payload_b64 = decode_tagged_atom(payload_elem, "payload")?;
    let payload = BASE64.decode(payload_b64.as_bytes()).ok()?;
    Some(Message {
        kind,
        reply_to,
        origin,
        payload,
    })
}

fn decode_elem(elem: &Elem) -> Option<Op> {
    let parts = as_list(elem)?;
    let (tag_elem, rest) = parts.split_first()?;
    match as_atom(tag_elem)? {
        "add" => {
            let [owner_elem, name_elem] = rest else {
                return None;
            };
            Some(Op::Add {
                owner: decode_owner(owner_elem)?,
                name: QueueName::new(as_atom(name_elem)?),
            })
        }
        "remove" => {
            let [name_elem] = rest else { return None };
            Some(Op::Remove {
                name: QueueName::new(as_atom(name_elem)?),
            })
        }
        "ack" => {
            let [mid_elem] = rest else { return None };
            Some(Op::Ack {
                id: decode_mid(mid_elem)?,
            })
        }
        "send" => {
            let [origin_elem, name_elem, id_elem, rest_message @ ..] = rest else {
                return None;
            };
            let origin = ConnectionId::new(as_atom(origin_elem)?);
            let name = QueueName::new(as_atom(name_elem)?);
            let id = as_atom(id_elem)?.parse::<u64>().ok()?;
            let message = decode_message(rest_message)?;
            Some(Op::Send {
                origin,
                name,
                id,
                message,
            })
        }
        _ => None,
    }
}

/// Parses an encoded record back into an `Op`. Returns `None` — never
/// panics — on malformed or trailing-garbage input; the caller drops
/// the record and logs, per `spec.md` §7.
pub fn decode(input: &str) -> Option<Op> {
    let (_, elem) = all_consuming(root)(input).ok()?;
    decode_elem(&elem)
}
