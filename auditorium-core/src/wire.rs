//! Wire codec: canonical S-expressions ("verbatim" form) and structural patterns.
//!
//! An atom is encoded as `<decimal length>:<bytes>`, a list as `(` items `)`.
//! There is no whitespace and no framing beyond the expression itself, so a
//! stream is simply a concatenation of encoded values.

use std::fmt;

use sha1::{Digest, Sha1};

/// Largest encoded value accepted, atoms and whole lists alike.
pub const MAX_EXPR_LEN: usize = 16 * 1024 * 1024; // 16 MiB
const MAX_DEPTH: usize = 256;

/// A value on the wire: a byte-string atom or a list of values.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Expr {
    Atom(Vec<u8>),
    List(Vec<Expr>),
}

impl Expr {
    /// Atom from anything string-like.
    pub fn atom(s: impl AsRef<[u8]>) -> Self {
        Expr::Atom(s.as_ref().to_vec())
    }

    pub fn list(items: impl IntoIterator<Item = Expr>) -> Self {
        Expr::List(items.into_iter().collect())
    }

    pub fn empty_list() -> Self {
        Expr::List(Vec::new())
    }

    pub fn as_atom(&self) -> Option<&[u8]> {
        match self {
            Expr::Atom(b) => Some(b),
            Expr::List(_) => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Expr]> {
        match self {
            Expr::List(items) => Some(items),
            Expr::Atom(_) => None,
        }
    }

    /// Atom contents as UTF-8 text. Lists and non-UTF-8 atoms yield `None`.
    pub fn as_text(&self) -> Option<&str> {
        self.as_atom().and_then(|b| std::str::from_utf8(b).ok())
    }

    /// Canonical encoding.
    pub fn to_verbatim(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.write_verbatim(&mut out);
        out
    }

    fn write_verbatim(&self, out: &mut Vec<u8>) {
        match self {
            Expr::Atom(bytes) => {
                out.extend_from_slice(bytes.len().to_string().as_bytes());
                out.push(b':');
                out.extend_from_slice(bytes);
            }
            Expr::List(items) => {
                out.push(b'(');
                for item in items {
                    item.write_verbatim(out);
                }
                out.push(b')');
            }
        }
    }

    /// SHA-1 over the canonical encoding. Used for message hashes.
    pub fn sha1(&self) -> [u8; 20] {
        Sha1::digest(self.to_verbatim()).into()
    }
}

impl From<&str> for Expr {
    fn from(s: &str) -> Self {
        Expr::atom(s)
    }
}

impl From<String> for Expr {
    fn from(s: String) -> Self {
        Expr::Atom(s.into_bytes())
    }
}

fn is_token(bytes: &[u8]) -> bool {
    !bytes.is_empty()
        && bytes
            .iter()
            .all(|b| b.is_ascii_graphic() && !matches!(b, b'(' | b')' | b'"' | b'#'))
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Atom(bytes) if is_token(bytes) => {
                f.write_str(&String::from_utf8_lossy(bytes))
            }
            Expr::Atom(bytes) if bytes.is_empty() => f.write_str("\"\""),
            Expr::Atom(bytes) => write!(f, "#{}#", hex::encode(bytes)),
            Expr::List(items) => {
                f.write_str("(")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str(")")
            }
        }
    }
}

/// Error decoding a value (need more bytes, too large, or a stream that can never parse).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("need more bytes")]
    NeedMore,
    #[error("expression too large")]
    TooLarge,
    #[error("invalid verbatim stream: {0}")]
    Invalid(&'static str),
}

/// Decode one value from the front of `bytes`. Returns the value and the number of bytes consumed.
/// Call with a partial buffer; `NeedMore` means the prefix is valid so far.
pub fn decode(bytes: &[u8]) -> Result<(Expr, usize), DecodeError> {
    let mut pos = 0;
    let expr = decode_at(bytes, &mut pos, 0)?;
    Ok((expr, pos))
}

/// Decode a buffer that must hold exactly one value.
pub fn decode_exact(bytes: &[u8]) -> Result<Expr, DecodeError> {
    match decode(bytes) {
        Ok((expr, n)) if n == bytes.len() => Ok(expr),
        Ok(_) => Err(DecodeError::Invalid("trailing bytes")),
        Err(e) => Err(e),
    }
}

fn decode_at(bytes: &[u8], pos: &mut usize, depth: usize) -> Result<Expr, DecodeError> {
    if depth > MAX_DEPTH {
        return Err(DecodeError::Invalid("nesting too deep"));
    }
    if *pos >= MAX_EXPR_LEN {
        return Err(DecodeError::TooLarge);
    }
    let Some(&first) = bytes.get(*pos) else {
        return Err(DecodeError::NeedMore);
    };
    match first {
        b'(' => {
            *pos += 1;
            let mut items = Vec::new();
            loop {
                if *pos >= MAX_EXPR_LEN {
                    return Err(DecodeError::TooLarge);
                }
                match bytes.get(*pos) {
                    None => return Err(DecodeError::NeedMore),
                    Some(b')') => {
                        *pos += 1;
                        return Ok(Expr::List(items));
                    }
                    Some(_) => items.push(decode_at(bytes, pos, depth + 1)?),
                }
            }
        }
        b'0'..=b'9' => {
            let start = *pos;
            let mut len: usize = 0;
            loop {
                match bytes.get(*pos) {
                    None => return Err(DecodeError::NeedMore),
                    Some(b':') => break,
                    Some(d @ b'0'..=b'9') => {
                        if *pos > start && bytes[start] == b'0' {
                            return Err(DecodeError::Invalid("leading zero in length"));
                        }
                        len = len * 10 + usize::from(d - b'0');
                        if len > MAX_EXPR_LEN {
                            return Err(DecodeError::TooLarge);
                        }
                        *pos += 1;
                    }
                    Some(_) => return Err(DecodeError::Invalid("bad byte in atom length")),
                }
            }
            *pos += 1; // ':'
            let end = *pos + len;
            if end > MAX_EXPR_LEN {
                return Err(DecodeError::TooLarge);
            }
            if bytes.len() < end {
                return Err(DecodeError::NeedMore);
            }
            let atom = bytes[*pos..end].to_vec();
            *pos = end;
            Ok(Expr::Atom(atom))
        }
        b')' => Err(DecodeError::Invalid("unbalanced ')'")),
        _ => Err(DecodeError::Invalid("unexpected byte")),
    }
}

/// Structural pattern over [`Expr`]. Wildcards bind the value they matched.
#[derive(Debug, Clone)]
pub enum Pattern {
    /// Exactly this atom; binds nothing.
    Literal(Vec<u8>),
    /// Any atom.
    AnyAtom,
    /// Any value.
    Any,
    /// A list of exactly these elements.
    List(Vec<Pattern>),
    /// A list (possibly empty) whose every element matches; binds the whole list.
    ListOf(Box<Pattern>),
}

impl Pattern {
    pub fn literal(s: &str) -> Self {
        Pattern::Literal(s.as_bytes().to_vec())
    }

    /// Match `expr`, returning the bindings in order, or `None` for no match.
    pub fn matches(&self, expr: &Expr) -> Option<Vec<Expr>> {
        let mut bindings = Vec::new();
        if self.match_into(expr, &mut bindings) {
            Some(bindings)
        } else {
            None
        }
    }

    fn match_into(&self, expr: &Expr, bindings: &mut Vec<Expr>) -> bool {
        match (self, expr) {
            (Pattern::Literal(want), Expr::Atom(got)) => want == got,
            (Pattern::AnyAtom, Expr::Atom(_)) | (Pattern::Any, _) => {
                bindings.push(expr.clone());
                true
            }
            (Pattern::List(pats), Expr::List(items)) => {
                pats.len() == items.len()
                    && pats
                        .iter()
                        .zip(items)
                        .all(|(p, e)| p.match_into(e, bindings))
            }
            (Pattern::ListOf(inner), Expr::List(items)) => {
                let mut scratch = Vec::new();
                if items.iter().all(|e| inner.match_into(e, &mut scratch)) {
                    bindings.push(expr.clone());
                    true
                } else {
                    false
                }
            }
            _ => false,
        }
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Pattern::Literal(b) => write!(f, "{}", Expr::Atom(b.clone())),
            Pattern::AnyAtom => f.write_str("#string"),
            Pattern::Any => f.write_str("#any"),
            Pattern::List(items) => {
                f.write_str("(")?;
                for (i, p) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" ")?;
                    }
                    write!(f, "{p}")?;
                }
                f.write_str(")")
            }
            Pattern::ListOf(inner) => write!(f, "#list:{inner}"),
        }
    }
}
