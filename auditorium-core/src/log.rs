//! Append-only causal log: seen-set for deduplication plus the causal frontier.
//!
//! Each persisted entry is `(entry (ptr node number hash) chain)` where
//! `chain = SHA-256(previous chain || canonical pointer)`, so rewriting or
//! dropping an earlier entry breaks every later link.

use std::collections::HashSet;
use std::fs::OpenOptions;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::message::{Message, MessagePointer};
use crate::wire::{self, DecodeError, Expr, Pattern};

const GENESIS: &[u8] = b"0000000000";

#[derive(Debug, thiserror::Error)]
pub enum LogError {
    #[error("log I/O: {0}")]
    Io(#[from] std::io::Error),
    #[error("corrupt log entry {index}: {reason}")]
    Corrupt { index: usize, reason: String },
    #[error("hash chain broken at entry {0}")]
    BrokenChain(usize),
    #[error("log is closed")]
    Closed,
    #[error("log stopped after a failed write")]
    Failed,
}

fn genesis() -> [u8; 32] {
    Sha256::digest(GENESIS).into()
}

fn next_chain(prev: &[u8; 32], ptr: &MessagePointer) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(prev);
    hasher.update(ptr.to_expr().to_verbatim());
    hasher.finalize().into()
}

fn entry_pattern() -> Pattern {
    Pattern::List(vec![
        Pattern::literal("entry"),
        Pattern::Any,
        Pattern::AnyAtom,
    ])
}

type Sink = BufWriter<Box<dyn Write + Send>>;

struct LogState {
    seen: HashSet<MessagePointer>,
    frontier: Vec<MessagePointer>,
    sink: Option<Sink>,
    chain: [u8; 32],
    closed: bool,
    failed: bool,
}

impl LogState {
    fn new(seen: HashSet<MessagePointer>, sink: Option<Sink>, chain: [u8; 32]) -> Self {
        Self {
            seen,
            frontier: Vec::new(),
            sink,
            chain,
            closed: false,
            failed: false,
        }
    }

    /// Write one entry. On error the sink is dropped along with anything
    /// still buffered, so no half-recorded entry reaches the file later.
    fn append(&mut self, entry: &[u8]) -> Result<(), LogError> {
        let Some(sink) = self.sink.as_mut() else {
            return Ok(());
        };
        let written = sink.write_all(entry).and_then(|()| sink.flush());
        if let Err(e) = written {
            if let Some(sink) = self.sink.take() {
                let _ = sink.into_parts();
            }
            self.failed = true;
            return Err(e.into());
        }
        Ok(())
    }
}

/// Per-host log. All operations take `&self`; the state sits behind one mutex.
pub struct Log {
    path: Option<PathBuf>,
    state: Mutex<LogState>,
}

impl Log {
    /// Open (or create) the log file at `path`, replaying and checking any existing entries.
    /// Replayed pointers count as seen but are not part of the frontier.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, LogError> {
        let path = path.as_ref().to_path_buf();
        let (seen, chain) = match std::fs::read(&path) {
            Ok(bytes) => replay(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => (Vec::new(), genesis()),
            Err(e) => return Err(e.into()),
        };
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        debug!(path = %path.display(), replayed = seen.len(), "log opened");
        let sink: Box<dyn Write + Send> = Box::new(file);
        Ok(Self {
            path: Some(path),
            state: Mutex::new(LogState::new(
                seen.into_iter().collect(),
                Some(BufWriter::new(sink)),
                chain,
            )),
        })
    }

    /// Log with no backing file.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            state: Mutex::new(LogState::new(HashSet::new(), None, genesis())),
        }
    }

    /// Empty log persisting entries to `writer`.
    pub fn with_writer(writer: impl Write + Send + 'static) -> Self {
        let sink: Box<dyn Write + Send> = Box::new(writer);
        Self {
            path: None,
            state: Mutex::new(LogState::new(
                HashSet::new(),
                Some(BufWriter::new(sink)),
                genesis(),
            )),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Record `message`. Returns `false` (and changes nothing) if it was already logged.
    pub fn log_announcement(&self, message: &Message) -> Result<bool, LogError> {
        self.log_pointer(MessagePointer::from(message))
    }

    /// Record a pointer whose body this host may not hold (join-reply bootstrap).
    /// After a failed write the log refuses further inserts with [`LogError::Failed`].
    pub fn log_pointer(&self, ptr: MessagePointer) -> Result<bool, LogError> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(LogError::Closed);
        }
        if state.failed {
            return Err(LogError::Failed);
        }
        if state.seen.contains(&ptr) {
            return Ok(false);
        }
        let chain = next_chain(&state.chain, &ptr);
        let entry = Expr::list([Expr::atom("entry"), ptr.to_expr(), Expr::Atom(chain.to_vec())]);
        state.append(&entry.to_verbatim())?;
        debug!(%ptr, "logged");
        state.chain = chain;
        state.seen.insert(ptr.clone());
        state.frontier.push(ptr);
        Ok(true)
    }

    /// Drop `ptr` from the frontier; it has been acknowledged. Returns whether it was there.
    pub fn remove_from_frontier(&self, ptr: &MessagePointer) -> bool {
        let mut state = self.state.lock();
        let before = state.frontier.len();
        state.frontier.retain(|p| p != ptr);
        state.frontier.len() != before
    }

    /// Snapshot of the frontier in insertion order.
    pub fn frontier(&self) -> Vec<MessagePointer> {
        self.state.lock().frontier.clone()
    }

    pub fn contains(&self, ptr: &MessagePointer) -> bool {
        self.state.lock().seen.contains(ptr)
    }

    /// Number of distinct pointers seen (including replayed ones).
    pub fn len(&self) -> usize {
        self.state.lock().seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current head of the hash chain.
    pub fn chain_head(&self) -> [u8; 32] {
        self.state.lock().chain
    }

    pub fn flush(&self) -> Result<(), LogError> {
        if let Some(sink) = self.state.lock().sink.as_mut() {
            sink.flush()?;
        }
        Ok(())
    }

    /// Flush and release the backing file, if any. Further inserts fail
    /// with [`LogError::Closed`].
    pub fn close(&self) -> Result<(), LogError> {
        let mut state = self.state.lock();
        state.closed = true;
        if let Some(mut sink) = state.sink.take() {
            sink.flush()?;
        }
        Ok(())
    }
}

fn replay(bytes: &[u8]) -> Result<(Vec<MessagePointer>, [u8; 32]), LogError> {
    let pattern = entry_pattern();
    let mut chain = genesis();
    let mut pointers = Vec::new();
    let mut pos = 0;
    while pos < bytes.len() {
        let index = pointers.len();
        let corrupt = |reason: String| LogError::Corrupt { index, reason };
        let (expr, n) = wire::decode(&bytes[pos..]).map_err(|e| match e {
            DecodeError::NeedMore => corrupt("truncated entry".into()),
            other => corrupt(other.to_string()),
        })?;
        pos += n;
        let b = pattern
            .matches(&expr)
            .ok_or_else(|| corrupt(format!("{expr} is not an entry")))?;
        let ptr = MessagePointer::from_expr(&b[0]).map_err(|e| corrupt(e.to_string()))?;
        let expected = next_chain(&chain, &ptr);
        if b[1].as_atom() != Some(&expected[..]) {
            return Err(LogError::BrokenChain(index));
        }
        chain = expected;
        pointers.push(ptr);
    }
    Ok((pointers, chain))
}

/// Audit a log file offline. Returns the number of entries on success.
pub fn verify_log(path: impl AsRef<Path>) -> Result<usize, LogError> {
    let bytes = std::fs::read(path)?;
    replay(&bytes).map(|(pointers, _)| pointers.len())
}
