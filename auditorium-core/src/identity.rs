//! Node identity and crypto: Ed25519 keys, signatures over canonical expressions, certificates.

use std::fmt;

use ed25519_dalek::{Signer, SigningKey, VerifyingKey};
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};

use crate::message::{text, FormatError};
use crate::wire::{Expr, Pattern};

/// Annotation carried by certificate authority keys.
pub const CA_ANNOTATION: &str = "ca";

#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("no {what} for node {node:?}")]
    UnknownNode { node: String, what: &'static str },
    #[error("malformed {what}: {reason}")]
    Malformed { what: &'static str, reason: String },
    #[error("key {0:?} is not a private key")]
    NotPrivate(String),
    #[error("signature by {0:?} does not verify")]
    BadSignature(String),
    #[error("certificate signed by non-authoritative key {signer:?} (annotation {annotation:?})")]
    UntrustedSigner { signer: String, annotation: String },
    #[error("keystore I/O: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum KeyKind {
    Public,
    Private,
}

/// Ed25519 key material tagged with the owning node id and an annotation (`ca`, `booth`, ...).
#[derive(Clone, PartialEq, Eq)]
pub struct Key {
    id: String,
    annotation: String,
    kind: KeyKind,
    material: [u8; 32],
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Key")
            .field("id", &self.id)
            .field("annotation", &self.annotation)
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

impl Key {
    fn pattern(tag: &str) -> Pattern {
        Pattern::List(vec![
            Pattern::literal(tag),
            Pattern::AnyAtom,
            Pattern::AnyAtom,
            Pattern::AnyAtom,
        ])
    }

    fn tag(&self) -> &'static str {
        match self.kind {
            KeyKind::Public => "key",
            KeyKind::Private => "private-key",
        }
    }

    /// Parse `(key id annotation bytes)` or `(private-key id annotation seed)`.
    pub fn from_expr(expr: &Expr) -> Result<Self, FormatError> {
        let (kind, b) = if let Some(b) = Self::pattern("key").matches(expr) {
            (KeyKind::Public, b)
        } else {
            (KeyKind::Private, crate::message::expect(&Self::pattern("private-key"), expr)?)
        };
        let raw = b[2].as_atom().unwrap_or_default();
        let material: [u8; 32] = raw.try_into().map_err(|_| {
            FormatError::from(CryptoError::Malformed {
                what: "key",
                reason: format!("expected 32 bytes, got {}", raw.len()),
            })
        })?;
        if kind == KeyKind::Public {
            VerifyingKey::from_bytes(&material).map_err(|e| CryptoError::Malformed {
                what: "key",
                reason: e.to_string(),
            })?;
        }
        Ok(Self {
            id: text(&b[0])?,
            annotation: text(&b[1])?,
            kind,
            material,
        })
    }

    pub fn to_expr(&self) -> Expr {
        Expr::list([
            Expr::atom(self.tag()),
            Expr::atom(&self.id),
            Expr::atom(&self.annotation),
            Expr::Atom(self.material.to_vec()),
        ])
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn annotation(&self) -> &str {
        &self.annotation
    }

    pub fn is_private(&self) -> bool {
        self.kind == KeyKind::Private
    }

    /// Public half. Identity for public keys.
    pub fn public(&self) -> Key {
        match self.kind {
            KeyKind::Public => self.clone(),
            KeyKind::Private => Key {
                kind: KeyKind::Public,
                material: SigningKey::from_bytes(&self.material)
                    .verifying_key()
                    .to_bytes(),
                ..self.clone()
            },
        }
    }

    /// Short hex digest of the public key, for logs.
    pub fn fingerprint(&self) -> String {
        let public = self.public();
        let digest = Sha256::digest(public.material);
        hex::encode(&digest[..8])
    }
}

/// Generate a fresh private key for `id`.
pub fn generate_key(id: &str, annotation: &str) -> Key {
    let signing = SigningKey::generate(&mut OsRng);
    Key {
        id: id.to_string(),
        annotation: annotation.to_string(),
        kind: KeyKind::Private,
        material: signing.to_bytes(),
    }
}

/// `(signature id sigdata payload)`: `sigdata` signs the canonical encoding of `payload`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    id: String,
    sig_data: Vec<u8>,
    payload: Expr,
}

impl Signature {
    pub fn pattern() -> Pattern {
        Pattern::List(vec![
            Pattern::literal("signature"),
            Pattern::AnyAtom,
            Pattern::AnyAtom,
            Pattern::Any,
        ])
    }

    pub fn new(id: impl Into<String>, sig_data: Vec<u8>, payload: Expr) -> Self {
        Self {
            id: id.into(),
            sig_data,
            payload,
        }
    }

    pub fn from_expr(expr: &Expr) -> Result<Self, FormatError> {
        let b = crate::message::expect(&Self::pattern(), expr)?;
        let mut b = b.into_iter();
        let id = match b.next() {
            Some(e) => text(&e)?,
            None => String::new(),
        };
        let sig_data = b
            .next()
            .and_then(|e| e.as_atom().map(<[u8]>::to_vec))
            .unwrap_or_default();
        let payload = b.next().unwrap_or_else(Expr::empty_list);
        Ok(Self {
            id,
            sig_data,
            payload,
        })
    }

    pub fn to_expr(&self) -> Expr {
        Expr::list([
            Expr::atom("signature"),
            Expr::atom(&self.id),
            Expr::Atom(self.sig_data.clone()),
            self.payload.clone(),
        ])
    }

    /// Id of the signing key.
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn sig_data(&self) -> &[u8] {
        &self.sig_data
    }

    pub fn payload(&self) -> &Expr {
        &self.payload
    }
}

/// Sign `data` with a private key.
pub fn sign(data: &Expr, key: &Key) -> Result<Signature, CryptoError> {
    if !key.is_private() {
        return Err(CryptoError::NotPrivate(key.id.clone()));
    }
    let signing = SigningKey::from_bytes(&key.material);
    let sig = signing.sign(&data.to_verbatim());
    Ok(Signature::new(
        key.id.clone(),
        sig.to_bytes().to_vec(),
        data.clone(),
    ))
}

/// Check that `signature` was made by the key certified in `cert`.
pub fn verify(signature: &Signature, cert: &Cert) -> Result<(), CryptoError> {
    let bad = || CryptoError::BadSignature(signature.id.clone());
    let verifying = VerifyingKey::from_bytes(&cert.key.material).map_err(|_| bad())?;
    let sig = ed25519_dalek::Signature::from_slice(&signature.sig_data).map_err(|_| bad())?;
    verifying
        .verify_strict(&signature.payload.to_verbatim(), &sig)
        .map_err(|_| bad())
}

/// `(cert (signature signer sigdata (key ...)))`: a public key vouched for by a signer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cert {
    signature: Signature,
    key: Key,
}

impl Cert {
    pub fn pattern() -> Pattern {
        Pattern::List(vec![Pattern::literal("cert"), Pattern::Any])
    }

    /// Wrap a signature whose payload must be a public key.
    pub fn from_signature(signature: Signature) -> Result<Self, FormatError> {
        let key = Key::from_expr(signature.payload())?;
        if key.is_private() {
            return Err(CryptoError::Malformed {
                what: "certificate",
                reason: "payload is a private key".into(),
            }
            .into());
        }
        Ok(Self { signature, key })
    }

    pub fn from_expr(expr: &Expr) -> Result<Self, FormatError> {
        let b = crate::message::expect(&Self::pattern(), expr)?;
        Self::from_signature(Signature::from_expr(&b[0])?)
    }

    /// Certify the public half of `subject` with `signer`.
    pub fn issue(signer: &Key, subject: &Key) -> Result<Self, CryptoError> {
        let signature = sign(&subject.public().to_expr(), signer)?;
        let key = subject.public();
        Ok(Self { signature, key })
    }

    pub fn to_expr(&self) -> Expr {
        Expr::list([Expr::atom("cert"), self.signature.to_expr()])
    }

    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    pub fn key(&self) -> &Key {
        &self.key
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_verify_roundtrip() {
        let ca = generate_key("ca", CA_ANNOTATION);
        let cert = Cert::issue(&ca, &ca).unwrap();
        let data = Expr::list([Expr::atom("polls-open"), Expr::atom("")]);
        let sig = sign(&data, &ca).unwrap();
        assert_eq!(sig.payload(), &data);
        verify(&sig, &cert).unwrap();
    }

    #[test]
    fn verify_rejects_wrong_key() {
        let a = generate_key("a", "booth");
        let b = generate_key("b", "booth");
        let cert_b = Cert::issue(&b, &b).unwrap();
        let sig = sign(&Expr::atom("x"), &a).unwrap();
        assert!(matches!(
            verify(&sig, &cert_b),
            Err(CryptoError::BadSignature(_))
        ));
    }

    #[test]
    fn verify_rejects_tampered_payload_and_bytes() {
        let k = generate_key("a", "booth");
        let cert = Cert::issue(&k, &k).unwrap();
        let sig = sign(&Expr::atom("x"), &k).unwrap();
        let swapped = Signature::new("a", sig.sig_data().to_vec(), Expr::atom("y"));
        assert!(verify(&swapped, &cert).is_err());
        for i in 0..sig.sig_data().len() {
            let mut bytes = sig.sig_data().to_vec();
            bytes[i] ^= 0x01;
            let flipped = Signature::new("a", bytes, sig.payload().clone());
            assert!(verify(&flipped, &cert).is_err(), "byte {i}");
        }
        let short = Signature::new("a", vec![1, 2, 3], Expr::atom("x"));
        assert!(verify(&short, &cert).is_err());
    }

    #[test]
    fn public_key_cannot_sign() {
        let k = generate_key("a", "booth").public();
        assert!(matches!(
            sign(&Expr::atom("x"), &k),
            Err(CryptoError::NotPrivate(_))
        ));
    }

    #[test]
    fn key_expr_roundtrip() {
        let k = generate_key("7", "booth");
        assert_eq!(Key::from_expr(&k.to_expr()).unwrap(), k);
        let p = k.public();
        assert_eq!(Key::from_expr(&p.to_expr()).unwrap(), p);
        assert_eq!(k.fingerprint(), p.fingerprint());
    }

    #[test]
    fn signature_and_cert_roundtrip() {
        let ca = generate_key("ca", CA_ANNOTATION);
        let node = generate_key("1", "booth");
        let cert = Cert::issue(&ca, &node).unwrap();
        assert_eq!(Cert::from_expr(&cert.to_expr()).unwrap(), cert);
        assert_eq!(cert.signature().id(), "ca");
        assert_eq!(cert.key(), &node.public());
        let sig = cert.signature().clone();
        assert_eq!(Signature::from_expr(&sig.to_expr()).unwrap(), sig);
    }

    #[test]
    fn cert_requires_public_key_payload() {
        let ca = generate_key("ca", CA_ANNOTATION);
        let not_a_key = sign(&Expr::atom("hello"), &ca).unwrap();
        assert!(Cert::from_signature(not_a_key).is_err());
        let private = sign(&generate_key("1", "booth").to_expr(), &ca).unwrap();
        assert!(Cert::from_signature(private).is_err());
        let short = Expr::list([
            Expr::atom("key"),
            Expr::atom("1"),
            Expr::atom("booth"),
            Expr::atom("abc"),
        ]);
        assert!(Cert::from_signature(sign(&short, &ca).unwrap()).is_err());
    }

    #[test]
    fn non_utf8_ids_are_refused() {
        let k = generate_key("7", "booth").public();
        let mut items = k.to_expr().as_list().unwrap().to_vec();
        items[1] = Expr::Atom(vec![0xff]);
        assert!(Key::from_expr(&Expr::List(items)).is_err());

        let sig = sign(&Expr::atom("x"), &generate_key("7", "booth")).unwrap();
        let mut items = sig.to_expr().as_list().unwrap().to_vec();
        items[1] = Expr::Atom(vec![b'7', 0xc0]);
        assert!(Signature::from_expr(&Expr::List(items)).is_err());
    }

    #[test]
    fn cert_rejects_wrong_tag() {
        let ca = generate_key("ca", CA_ANNOTATION);
        let cert = Cert::issue(&ca, &ca).unwrap();
        let e = Expr::list([Expr::atom("certificate"), cert.signature().to_expr()]);
        assert!(Cert::from_expr(&e).is_err());
        assert!(Cert::from_expr(&Expr::empty_list()).is_err());
    }
}
