//! Keystores: where a node finds its own private key and everybody's certificates.

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};

use parking_lot::Mutex;

use crate::identity::{generate_key, Cert, CryptoError, Key, CA_ANNOTATION};
use crate::wire::{self, Expr};

/// Lookup of keys and certificates by node id. Injected into the integrity layer.
pub trait KeyStore: Send + Sync {
    fn load_key(&self, node_id: &str) -> Result<Key, CryptoError>;
    fn load_cert(&self, node_id: &str) -> Result<Cert, CryptoError>;
}

/// Directory of `<id>.key` and `<id>.cert` files in canonical encoding. Results are cached.
pub struct DirKeyStore {
    dir: PathBuf,
    keys: Mutex<HashMap<String, Key>>,
    certs: Mutex<HashMap<String, Cert>>,
}

impl DirKeyStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            keys: Mutex::new(HashMap::new()),
            certs: Mutex::new(HashMap::new()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// `<dir>/<id>.<ext>`, or `None` if `node_id` could name a file outside the directory.
    fn file(&self, node_id: &str, ext: &str) -> Option<PathBuf> {
        let plain = !node_id.is_empty()
            && !node_id.contains(['/', '\\', '\0'])
            && !node_id.contains("..");
        let name = format!("{node_id}.{ext}");
        let mut components = Path::new(&name).components();
        match (plain, components.next(), components.next()) {
            (true, Some(Component::Normal(_)), None) => Some(self.dir.join(&name)),
            _ => None,
        }
    }

    fn load(&self, node_id: &str, ext: &str, what: &'static str) -> Result<Expr, CryptoError> {
        let unknown = || CryptoError::UnknownNode {
            node: node_id.to_string(),
            what,
        };
        let path = self.file(node_id, ext).ok_or_else(unknown)?;
        let bytes = match std::fs::read(&path) {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Err(unknown()),
            Err(e) => return Err(e.into()),
        };
        wire::decode_exact(&bytes).map_err(|e| CryptoError::Malformed {
            what,
            reason: format!("{}: {e}", path.display()),
        })
    }

    /// Write a key and certificate for `node_id` into the directory.
    pub fn store(&self, key: &Key, cert: &Cert) -> std::io::Result<()> {
        let paths = (self.file(key.id(), "key"), self.file(key.id(), "cert"));
        let (Some(key_path), Some(cert_path)) = paths else {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("node id {:?} is not a plain file name", key.id()),
            ));
        };
        std::fs::create_dir_all(&self.dir)?;
        std::fs::write(key_path, key.to_expr().to_verbatim())?;
        std::fs::write(cert_path, cert.to_expr().to_verbatim())
    }
}

fn malformed(what: &'static str, e: impl std::fmt::Display) -> CryptoError {
    CryptoError::Malformed {
        what,
        reason: e.to_string(),
    }
}

impl KeyStore for DirKeyStore {
    fn load_key(&self, node_id: &str) -> Result<Key, CryptoError> {
        if let Some(k) = self.keys.lock().get(node_id) {
            return Ok(k.clone());
        }
        let expr = self.load(node_id, "key", "key")?;
        let key = Key::from_expr(&expr).map_err(|e| malformed("key", e))?;
        self.keys.lock().insert(node_id.to_string(), key.clone());
        Ok(key)
    }

    fn load_cert(&self, node_id: &str) -> Result<Cert, CryptoError> {
        if let Some(c) = self.certs.lock().get(node_id) {
            return Ok(c.clone());
        }
        let expr = self.load(node_id, "cert", "certificate")?;
        let cert = Cert::from_expr(&expr).map_err(|e| malformed("certificate", e))?;
        self.certs.lock().insert(node_id.to_string(), cert.clone());
        Ok(cert)
    }
}

/// In-memory keystore, for provisioning tests and simulations.
#[derive(Default)]
pub struct MemoryKeyStore {
    keys: Mutex<HashMap<String, Key>>,
    certs: Mutex<HashMap<String, Cert>>,
}

impl MemoryKeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Provision a CA (`ca`) plus a key and CA-issued certificate for each node id.
    pub fn with_nodes(node_ids: &[&str]) -> Self {
        let store = Self::new();
        let ca = generate_key("ca", CA_ANNOTATION);
        // Issuing with a freshly generated private key cannot fail.
        if let Ok(cert) = Cert::issue(&ca, &ca) {
            store.add_cert("ca", cert);
        }
        for id in node_ids {
            let key = generate_key(id, "booth");
            if let Ok(cert) = Cert::issue(&ca, &key) {
                store.add_cert(id, cert);
            }
            store.add_key(key);
        }
        store.add_key(ca);
        store
    }

    pub fn add_key(&self, key: Key) {
        self.keys.lock().insert(key.id().to_string(), key);
    }

    pub fn add_cert(&self, node_id: &str, cert: Cert) {
        self.certs.lock().insert(node_id.to_string(), cert);
    }
}

impl KeyStore for MemoryKeyStore {
    fn load_key(&self, node_id: &str) -> Result<Key, CryptoError> {
        self.keys
            .lock()
            .get(node_id)
            .cloned()
            .ok_or_else(|| CryptoError::UnknownNode {
                node: node_id.to_string(),
                what: "key",
            })
    }

    fn load_cert(&self, node_id: &str) -> Result<Cert, CryptoError> {
        self.certs
            .lock()
            .get(node_id)
            .cloned()
            .ok_or_else(|| CryptoError::UnknownNode {
                node: node_id.to_string(),
                what: "certificate",
            })
    }
}
