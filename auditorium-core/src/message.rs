//! Auditorium value types: host pointers, messages and message pointers.

use std::fmt;

use crate::identity::CryptoError;
use crate::wire::{Expr, Pattern};

/// Message type of a join request.
pub const JOIN: &str = "join";
/// Message type of the reply to a join request.
pub const JOIN_REPLY: &str = "join-reply";
/// Message type of a broadcast announcement.
pub const ANNOUNCE: &str = "announce";

/// A value that does not have the expected shape.
#[derive(Debug, thiserror::Error)]
pub enum FormatError {
    #[error("{got} doesn't match the pattern {expected}")]
    Mismatch { expected: String, got: String },
    #[error("invalid port {0:?}")]
    Port(String),
    #[error("signature check failed: {0}")]
    Crypto(#[from] CryptoError),
}

impl FormatError {
    pub fn mismatch(expected: &Pattern, got: &Expr) -> Self {
        FormatError::Mismatch {
            expected: expected.to_string(),
            got: got.to_string(),
        }
    }
}

/// Match `expr` against `pattern` or fail with a [`FormatError`].
pub(crate) fn expect(pattern: &Pattern, expr: &Expr) -> Result<Vec<Expr>, FormatError> {
    pattern
        .matches(expr)
        .ok_or_else(|| FormatError::mismatch(pattern, expr))
}

/// Text of an atom. Anything that is not valid UTF-8 is refused rather than
/// repaired, so a parsed value encodes back to the same bytes.
pub(crate) fn text(e: &Expr) -> Result<String, FormatError> {
    e.as_text()
        .map(str::to_owned)
        .ok_or_else(|| FormatError::mismatch(&Pattern::AnyAtom, e))
}

/// Peer identity: node id plus the address its listener is reachable on.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HostPointer {
    id: String,
    address: String,
    port: u16,
}

impl HostPointer {
    pub fn pattern() -> Pattern {
        Pattern::List(vec![
            Pattern::literal("host"),
            Pattern::AnyAtom,
            Pattern::AnyAtom,
            Pattern::AnyAtom,
        ])
    }

    pub fn new(id: impl Into<String>, address: impl Into<String>, port: u16) -> Self {
        Self {
            id: id.into(),
            address: address.into(),
            port,
        }
    }

    pub fn from_expr(expr: &Expr) -> Result<Self, FormatError> {
        let b = expect(&Self::pattern(), expr)?;
        let raw = text(&b[2])?;
        let port: u16 = match raw.parse() {
            Ok(p) => p,
            Err(_) => return Err(FormatError::Port(raw)),
        };
        if port.to_string() != raw {
            return Err(FormatError::Port(raw));
        }
        Ok(Self {
            id: text(&b[0])?,
            address: text(&b[1])?,
            port,
        })
    }

    pub fn to_expr(&self) -> Expr {
        Expr::list([
            Expr::atom("host"),
            Expr::atom(&self.id),
            Expr::atom(&self.address),
            Expr::atom(self.port.to_string()),
        ])
    }

    pub fn node_id(&self) -> &str {
        &self.id
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Same identity and address, different port.
    pub fn with_port(&self, port: u16) -> Self {
        Self {
            port,
            ..self.clone()
        }
    }
}

impl fmt::Display for HostPointer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}:{}", self.id, self.address, self.port)
    }
}

/// Everything sent between hosts: `(type (host ...) sequence datum)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    kind: String,
    from: HostPointer,
    sequence: String,
    datum: Expr,
}

impl Message {
    pub fn pattern() -> Pattern {
        Pattern::List(vec![
            Pattern::AnyAtom,
            HostPointer::pattern(),
            Pattern::AnyAtom,
            Pattern::Any,
        ])
    }

    pub fn new(
        kind: impl Into<String>,
        from: HostPointer,
        sequence: impl Into<String>,
        datum: Expr,
    ) -> Self {
        Self {
            kind: kind.into(),
            from,
            sequence: sequence.into(),
            datum,
        }
    }

    pub fn from_expr(expr: &Expr) -> Result<Self, FormatError> {
        expect(&Self::pattern(), expr)?;
        // Pattern guarantees a four element list.
        let items = expr.as_list().unwrap_or_default();
        Ok(Self {
            kind: text(&items[0])?,
            from: HostPointer::from_expr(&items[1])?,
            sequence: text(&items[2])?,
            datum: items[3].clone(),
        })
    }

    pub fn to_expr(&self) -> Expr {
        Expr::list([
            Expr::atom(&self.kind),
            self.from.to_expr(),
            Expr::atom(&self.sequence),
            self.datum.clone(),
        ])
    }

    /// SHA-1 of the canonical encoding of [`Message::to_expr`].
    pub fn hash(&self) -> [u8; 20] {
        self.to_expr().sha1()
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn from(&self) -> &HostPointer {
        &self.from
    }

    pub fn sequence(&self) -> &str {
        &self.sequence
    }

    pub fn datum(&self) -> &Expr {
        &self.datum
    }

    /// Same envelope around a different datum.
    pub fn with_datum(&self, datum: Expr) -> Self {
        Self {
            datum,
            ..self.clone()
        }
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_expr())
    }
}

/// Reference to a message without its body: `(ptr node number hash)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MessagePointer {
    node_id: String,
    number: String,
    hash: Vec<u8>,
}

impl MessagePointer {
    pub fn pattern() -> Pattern {
        Pattern::List(vec![
            Pattern::literal("ptr"),
            Pattern::AnyAtom,
            Pattern::AnyAtom,
            Pattern::AnyAtom,
        ])
    }

    pub fn new(node_id: impl Into<String>, number: impl Into<String>, hash: Vec<u8>) -> Self {
        Self {
            node_id: node_id.into(),
            number: number.into(),
            hash,
        }
    }

    pub fn from_expr(expr: &Expr) -> Result<Self, FormatError> {
        let b = expect(&Self::pattern(), expr)?;
        Ok(Self {
            node_id: text(&b[0])?,
            number: text(&b[1])?,
            hash: b[2].as_atom().unwrap_or_default().to_vec(),
        })
    }

    pub fn to_expr(&self) -> Expr {
        Expr::list([
            Expr::atom("ptr"),
            Expr::atom(&self.node_id),
            Expr::atom(&self.number),
            Expr::Atom(self.hash.clone()),
        ])
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn number(&self) -> &str {
        &self.number
    }

    pub fn hash(&self) -> &[u8] {
        &self.hash
    }
}

impl From<&Message> for MessagePointer {
    fn from(m: &Message) -> Self {
        Self {
            node_id: m.from.id.clone(),
            number: m.sequence.clone(),
            hash: m.hash().to_vec(),
        }
    }
}

impl fmt::Display for MessagePointer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{machine:{} message:{}}}", self.node_id, self.number)
    }
}
