//! Integrity layer: signs outbound announcements and verifies inbound ones against the CA.

use std::sync::Arc;

use tracing::debug;

use crate::host::AuditoriumHost;
use crate::identity::{self, Cert, CryptoError, Key, Signature, CA_ANNOTATION};
use crate::keystore::KeyStore;
use crate::layer::Layer;
use crate::message::{self, FormatError};
use crate::wire::{Expr, Pattern};

pub const SIGNED_MESSAGE: &str = "signed-message";

/// Outbound: `(signed-message cert signature)`. Join traffic is not signed.
pub struct IntegrityLayer {
    keystore: Arc<dyn KeyStore>,
    key: Key,
    cert: Cert,
}

impl IntegrityLayer {
    pub fn pattern() -> Pattern {
        Pattern::List(vec![
            Pattern::literal(SIGNED_MESSAGE),
            Pattern::Any,
            Pattern::Any,
        ])
    }

    /// Load this node's key and certificate and check that they belong together.
    pub fn new(node_id: &str, keystore: Arc<dyn KeyStore>) -> Result<Self, CryptoError> {
        let key = keystore.load_key(node_id)?;
        if !key.is_private() {
            return Err(CryptoError::NotPrivate(node_id.to_string()));
        }
        let cert = keystore.load_cert(node_id)?;
        let check = identity::sign(&Expr::atom("test"), &key)?;
        identity::verify(&check, &cert)?;
        debug!(node = node_id, fingerprint = %key.fingerprint(), "integrity layer ready");
        Ok(Self {
            keystore,
            key,
            cert,
        })
    }

    pub fn cert(&self) -> &Cert {
        &self.cert
    }

    /// The certificate must be issued by a key annotated as a CA.
    fn check_issuer(&self, cert: &Cert) -> Result<(), CryptoError> {
        let signer = cert.signature().id();
        let issuer = self.keystore.load_cert(signer)?;
        if issuer.key().annotation() != CA_ANNOTATION {
            return Err(CryptoError::UntrustedSigner {
                signer: signer.to_string(),
                annotation: issuer.key().annotation().to_string(),
            });
        }
        identity::verify(cert.signature(), &issuer)
    }
}

impl Layer for IntegrityLayer {
    fn name(&self) -> &'static str {
        "integrity"
    }

    fn make_announcement(
        &self,
        _host: &dyn AuditoriumHost,
        datum: Expr,
    ) -> Result<Expr, CryptoError> {
        let sig = identity::sign(&datum, &self.key)?;
        Ok(Expr::list([
            Expr::atom(SIGNED_MESSAGE),
            self.cert.to_expr(),
            sig.to_expr(),
        ]))
    }

    fn receive_announcement(
        &self,
        _host: &dyn AuditoriumHost,
        datum: Expr,
    ) -> Result<Expr, FormatError> {
        let b = message::expect(&Self::pattern(), &datum)?;
        let cert = Cert::from_expr(&b[0])?;
        let sig = Signature::from_expr(&b[1])?;
        identity::verify(&sig, &cert)?;
        self.check_issuer(&cert)?;
        Ok(sig.payload().clone())
    }
}
