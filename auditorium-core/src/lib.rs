//! Auditorium protocol core: the broadcast/audit layer shared by every machine in a precinct.
//! No sockets here; the node crate drives links and hands parsed messages to the host.

pub mod host;
pub mod identity;
pub mod integrity;
pub mod keystore;
pub mod layer;
pub mod log;
pub mod message;
pub mod temporal;
pub mod wire;

pub use host::{AuditoriumHost, LinkId};
pub use identity::{Cert, CryptoError, Key, Signature};
pub use integrity::IntegrityLayer;
pub use keystore::{DirKeyStore, KeyStore, MemoryKeyStore};
pub use layer::{BottomLayer, Layer, LayerStack};
pub use log::{Log, LogError};
pub use message::{FormatError, HostPointer, Message, MessagePointer};
pub use temporal::TemporalLayer;
pub use wire::{decode, DecodeError, Expr, Pattern};
