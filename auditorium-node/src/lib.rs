//! Auditorium node: TCP links between precinct machines, the host that
//! drives the layer stack over them, and UDP discovery.

pub mod config;
pub mod discovery;
pub mod host;
pub mod link;
pub mod transport;

pub use config::Config;
pub use host::{Host, HostError};
pub use link::Link;
