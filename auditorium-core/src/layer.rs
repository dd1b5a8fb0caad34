//! Layer stack: symmetric outbound (`make_*`) and inbound (`receive_*`) transforms.
//!
//! Layers are ordered outermost first and the list always ends with
//! [`BottomLayer`]. Outbound values pass innermost to outermost, so the
//! outermost layer wraps last; inbound values pass outermost to innermost.

use crate::host::AuditoriumHost;
use crate::identity::CryptoError;
use crate::message::FormatError;
use crate::wire::Expr;

/// One stage of the stack. Every operation defaults to the identity transform.
pub trait Layer: Send + Sync {
    fn name(&self) -> &'static str;

    fn make_announcement(
        &self,
        _host: &dyn AuditoriumHost,
        datum: Expr,
    ) -> Result<Expr, CryptoError> {
        Ok(datum)
    }

    fn make_join(&self, _host: &dyn AuditoriumHost, datum: Expr) -> Result<Expr, CryptoError> {
        Ok(datum)
    }

    fn make_join_reply(
        &self,
        _host: &dyn AuditoriumHost,
        datum: Expr,
    ) -> Result<Expr, CryptoError> {
        Ok(datum)
    }

    fn receive_announcement(
        &self,
        _host: &dyn AuditoriumHost,
        datum: Expr,
    ) -> Result<Expr, FormatError> {
        Ok(datum)
    }

    fn receive_join(&self, _host: &dyn AuditoriumHost, datum: Expr) -> Result<Expr, FormatError> {
        Ok(datum)
    }

    fn receive_join_reply(
        &self,
        _host: &dyn AuditoriumHost,
        datum: Expr,
    ) -> Result<Expr, FormatError> {
        Ok(datum)
    }
}

/// Terminal identity layer.
pub struct BottomLayer;

impl Layer for BottomLayer {
    fn name(&self) -> &'static str {
        "bottom"
    }
}

/// Ordered layers, outermost first, terminated by [`BottomLayer`].
pub struct LayerStack {
    layers: Vec<Box<dyn Layer>>,
}

impl LayerStack {
    pub fn new(layers: Vec<Box<dyn Layer>>) -> Self {
        let mut layers = layers;
        layers.push(Box::new(BottomLayer));
        Self { layers }
    }

    /// Layer names, outermost first.
    pub fn names(&self) -> Vec<&'static str> {
        self.layers.iter().map(|l| l.name()).collect()
    }

    pub fn layer(&self, name: &str) -> Option<&dyn Layer> {
        self.layers
            .iter()
            .find(|l| l.name() == name)
            .map(|l| l.as_ref())
    }

    fn outbound<F>(&self, datum: Expr, f: F) -> Result<Expr, CryptoError>
    where
        F: Fn(&dyn Layer, Expr) -> Result<Expr, CryptoError>,
    {
        self.layers
            .iter()
            .rev()
            .try_fold(datum, |acc, layer| f(layer.as_ref(), acc))
    }

    fn inbound<F>(&self, datum: Expr, f: F) -> Result<Expr, FormatError>
    where
        F: Fn(&dyn Layer, Expr) -> Result<Expr, FormatError>,
    {
        self.layers
            .iter()
            .try_fold(datum, |acc, layer| f(layer.as_ref(), acc))
    }

    pub fn make_announcement(
        &self,
        host: &dyn AuditoriumHost,
        datum: Expr,
    ) -> Result<Expr, CryptoError> {
        self.outbound(datum, |l, d| l.make_announcement(host, d))
    }

    pub fn make_join(&self, host: &dyn AuditoriumHost, datum: Expr) -> Result<Expr, CryptoError> {
        self.outbound(datum, |l, d| l.make_join(host, d))
    }

    pub fn make_join_reply(
        &self,
        host: &dyn AuditoriumHost,
        datum: Expr,
    ) -> Result<Expr, CryptoError> {
        self.outbound(datum, |l, d| l.make_join_reply(host, d))
    }

    pub fn receive_announcement(
        &self,
        host: &dyn AuditoriumHost,
        datum: Expr,
    ) -> Result<Expr, FormatError> {
        self.inbound(datum, |l, d| l.receive_announcement(host, d))
    }

    pub fn receive_join(&self, host: &dyn AuditoriumHost, datum: Expr) -> Result<Expr, FormatError> {
        self.inbound(datum, |l, d| l.receive_join(host, d))
    }

    pub fn receive_join_reply(
        &self,
        host: &dyn AuditoriumHost,
        datum: Expr,
    ) -> Result<Expr, FormatError> {
        self.inbound(datum, |l, d| l.receive_join_reply(host, d))
    }
}
