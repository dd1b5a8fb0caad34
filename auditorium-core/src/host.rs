//! The narrow view of a host that layers and links are allowed to see.

use crate::log::Log;
use crate::message::Message;

/// Identifies one link within its host.
pub type LinkId = u64;

/// Capabilities a host exposes to its layers and links. Implemented by the
/// networked host and by lightweight fakes in tests.
pub trait AuditoriumHost: Send + Sync {
    fn node_id(&self) -> &str;

    fn log(&self) -> &Log;

    /// Next sequence number for a message sent by this host.
    fn next_sequence(&self) -> String;

    /// A link parsed a message off the wire. Called from link tasks.
    fn receive_announcement(&self, message: Message);

    /// A link stopped on its own (peer closed, bad stream, write failure).
    fn remove_link(&self, link: LinkId);
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    /// Host that only owns a log; everything else is unused by layers.
    pub(crate) struct LogOnlyHost {
        pub(crate) log: Log,
    }

    impl LogOnlyHost {
        pub(crate) fn new() -> Self {
            Self {
                log: Log::in_memory(),
            }
        }
    }

    impl AuditoriumHost for LogOnlyHost {
        fn node_id(&self) -> &str {
            "0"
        }

        fn log(&self) -> &Log {
            &self.log
        }

        fn next_sequence(&self) -> String {
            unreachable!("layers do not allocate sequence numbers")
        }

        fn receive_announcement(&self, _message: Message) {
            unreachable!("layers do not receive messages")
        }

        fn remove_link(&self, _link: LinkId) {
            unreachable!("layers do not own links")
        }
    }
}
