//! Temporal layer: causal ordering through the log frontier.
//!
//! Every outbound announcement names the current frontier as its
//! predecessors; every inbound announcement acknowledges the pointers it
//! names, removing them from the frontier. Joiners are seeded with a
//! snapshot of the frontier instead of the full history.

use tracing::warn;

use crate::host::AuditoriumHost;
use crate::identity::CryptoError;
use crate::layer::Layer;
use crate::message::{self, FormatError, MessagePointer};
use crate::wire::{Expr, Pattern};

pub const SUCCEEDS: &str = "succeeds";

pub struct TemporalLayer;

impl TemporalLayer {
    pub fn pattern() -> Pattern {
        Pattern::List(vec![
            Pattern::literal(SUCCEEDS),
            Self::pointers_pattern(),
            Pattern::Any,
        ])
    }

    pub fn pointers_pattern() -> Pattern {
        Pattern::ListOf(Box::new(MessagePointer::pattern()))
    }

    fn frontier_expr(host: &dyn AuditoriumHost) -> Expr {
        Expr::list(host.log().frontier().iter().map(MessagePointer::to_expr))
    }

    fn parse_pointers(list: &Expr) -> Result<Vec<MessagePointer>, FormatError> {
        list.as_list()
            .unwrap_or_default()
            .iter()
            .map(MessagePointer::from_expr)
            .collect()
    }
}

impl Layer for TemporalLayer {
    fn name(&self) -> &'static str {
        "temporal"
    }

    fn make_announcement(
        &self,
        host: &dyn AuditoriumHost,
        datum: Expr,
    ) -> Result<Expr, CryptoError> {
        Ok(Expr::list([
            Expr::atom(SUCCEEDS),
            Self::frontier_expr(host),
            datum,
        ]))
    }

    fn make_join_reply(
        &self,
        host: &dyn AuditoriumHost,
        _datum: Expr,
    ) -> Result<Expr, CryptoError> {
        Ok(Self::frontier_expr(host))
    }

    fn receive_announcement(
        &self,
        host: &dyn AuditoriumHost,
        datum: Expr,
    ) -> Result<Expr, FormatError> {
        let mut b = message::expect(&Self::pattern(), &datum)?;
        let pointers = Self::parse_pointers(&b[0])?;
        for ptr in &pointers {
            host.log().remove_from_frontier(ptr);
        }
        Ok(b.swap_remove(1))
    }

    fn receive_join_reply(
        &self,
        host: &dyn AuditoriumHost,
        datum: Expr,
    ) -> Result<Expr, FormatError> {
        let b = message::expect(&Self::pointers_pattern(), &datum)?;
        for ptr in Self::parse_pointers(&b[0])? {
            if let Err(e) = host.log().log_pointer(ptr.clone()) {
                warn!(%ptr, "could not log join-reply pointer: {e}");
            }
        }
        Ok(Expr::empty_list())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::testing::LogOnlyHost;
    use crate::message::{HostPointer, Message};

    fn msg(seq: &str) -> Message {
        Message::new(
            "announce",
            HostPointer::new("1", "127.0.0.1", 9700),
            seq,
            Expr::atom(format!("event-{seq}")),
        )
    }

    fn host_with(messages: &[&Message]) -> LogOnlyHost {
        let host = LogOnlyHost::new();
        for m in messages {
            host.log.log_announcement(m).unwrap();
        }
        host
    }

    fn ptrs(messages: &[&Message]) -> Expr {
        Expr::list(messages.iter().map(|m| MessagePointer::from(*m).to_expr()))
    }

    #[test]
    fn announcement_carries_frontier() {
        let (m1, m2) = (msg("1"), msg("2"));
        let host = host_with(&[&m1, &m2]);
        let out = TemporalLayer
            .make_announcement(&host, Expr::atom("X"))
            .unwrap();
        assert_eq!(
            out,
            Expr::list([Expr::atom(SUCCEEDS), ptrs(&[&m1, &m2]), Expr::atom("X")])
        );
        // Making an announcement does not consume the frontier.
        assert_eq!(host.log.frontier().len(), 2);
    }

    #[test]
    fn receiving_shrinks_frontier() {
        let (m1, m2) = (msg("1"), msg("2"));
        let host = host_with(&[&m1, &m2]);
        let incoming = Expr::list([Expr::atom(SUCCEEDS), ptrs(&[&m1]), Expr::atom("Y")]);
        assert_eq!(
            TemporalLayer.receive_announcement(&host, incoming).unwrap(),
            Expr::atom("Y")
        );
        assert_eq!(host.log.frontier(), vec![MessagePointer::from(&m2)]);
    }

    #[test]
    fn unknown_predecessors_are_ignored() {
        let m1 = msg("1");
        let host = host_with(&[&m1]);
        let incoming = Expr::list([Expr::atom(SUCCEEDS), ptrs(&[&msg("9")]), Expr::empty_list()]);
        assert!(TemporalLayer.receive_announcement(&host, incoming).is_ok());
        assert_eq!(host.log.frontier().len(), 1);
    }

    #[test]
    fn malformed_announcements_are_rejected_without_side_effects() {
        let (m1, m2) = (msg("1"), msg("2"));
        let host = host_with(&[&m1, &m2]);
        let good_ptr = MessagePointer::from(&m1).to_expr();
        for bad in [
            Expr::atom(""),
            Expr::empty_list(),
            Expr::list([Expr::atom("Test"), Expr::atom("Message")]),
            Expr::list([Expr::atom("precedes"), ptrs(&[&m1]), Expr::atom("Y")]),
            Expr::list([Expr::atom(SUCCEEDS), Expr::atom("notalist"), Expr::atom("Y")]),
            Expr::list([Expr::atom(SUCCEEDS), ptrs(&[&m1])]),
            Expr::list([Expr::atom(SUCCEEDS), ptrs(&[&m1]), Expr::atom("Y"), Expr::atom("Z")]),
            Expr::list([
                Expr::atom(SUCCEEDS),
                Expr::list([good_ptr.clone(), Expr::list([Expr::atom("ptr"), Expr::atom("x")])]),
                Expr::atom("Y"),
            ]),
        ] {
            assert!(TemporalLayer.receive_announcement(&host, bad).is_err());
        }
        assert_eq!(host.log.frontier().len(), 2);
        let ok = Expr::list([Expr::atom(SUCCEEDS), Expr::list([good_ptr]), Expr::atom("Y")]);
        assert!(TemporalLayer.receive_announcement(&host, ok).is_ok());
        assert_eq!(host.log.frontier().len(), 1);
    }

    #[test]
    fn join_reply_seeds_new_peer() {
        let (m1, m2) = (msg("1"), msg("2"));
        let a = host_with(&[&m1, &m2]);
        let reply = TemporalLayer
            .make_join_reply(&a, Expr::atom("ignored"))
            .unwrap();
        assert_eq!(reply, ptrs(&[&m1, &m2]));

        let b = LogOnlyHost::new();
        assert_eq!(
            TemporalLayer.receive_join_reply(&b, reply).unwrap(),
            Expr::empty_list()
        );
        assert!(b.log.contains(&MessagePointer::from(&m1)));
        assert!(b.log.contains(&MessagePointer::from(&m2)));
        assert_eq!(b.log.frontier().len(), 2);
    }

    #[test]
    fn join_reply_rejects_any_bad_element() {
        let m1 = msg("1");
        let b = LogOnlyHost::new();
        let mixed = Expr::list([MessagePointer::from(&m1).to_expr(), Expr::atom("junk")]);
        assert!(TemporalLayer.receive_join_reply(&b, mixed).is_err());
        assert!(TemporalLayer
            .receive_join_reply(&b, Expr::atom("junk"))
            .is_err());
        assert!(b.log.is_empty());
        // An empty frontier is a valid reply from a fresh host.
        assert!(TemporalLayer
            .receive_join_reply(&b, Expr::empty_list())
            .is_ok());
    }

    #[test]
    fn join_passes_through() {
        let host = LogOnlyHost::new();
        let d = Expr::atom("");
        assert_eq!(TemporalLayer.make_join(&host, d.clone()).unwrap(), d);
        assert_eq!(TemporalLayer.receive_join(&host, d.clone()).unwrap(), d);
    }
}
