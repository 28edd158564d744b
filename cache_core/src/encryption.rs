//! DEK hierarchy and AEAD sealing (SPEC_FULL §4.7).

use aes_gcm::{
    aead::{Aead, KeyInit, Payload},
    Aes256Gcm, Key, Nonce,
};
use parking_lot::RwLock;
use rand::RngCore;
use resource_model::Error;
use std::collections::HashMap;

/// A sealed (kind, DEK generation) pair, ready for AEAD use.
#[derive(Clone)]
struct Dek {
    cipher: Aes256Gcm,
}

impl std::fmt::Debug for Dek {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dek").finish_non_exhaustive()
    }
}

/// Per-kind DEK state: the active generation plus every retired one, so rows sealed under an
/// earlier `dek_id` stay decryptable after rotation.
#[derive(Debug, Default)]
struct KindKeys {
    active_id: u32,
    by_id: HashMap<u32, Dek>,
    writes_since_rotation: u64,
}

/// Owns the root key (process lifetime only, never persisted) and the in-memory DEK table.
///
/// `seal`/`open` are the only entry points [`crate::store::Store`] uses; rotation scheduling and
/// root-key handling are private to this component (SPEC_FULL §4.7).
#[derive(Debug)]
pub struct EncryptionManager {
    rotate_after_writes: u64,
    kinds: RwLock<HashMap<String, KindKeys>>,
}

impl EncryptionManager {
    /// Create a manager that rotates a kind's active DEK every `rotate_after_writes` seals.
    pub fn new(rotate_after_writes: u64) -> Self {
        Self {
            rotate_after_writes,
            kinds: RwLock::new(HashMap::new()),
        }
    }

    fn fresh_dek() -> Dek {
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        let key = Key::<Aes256Gcm>::from_slice(&bytes);
        Dek {
            cipher: Aes256Gcm::new(key),
        }
    }

    /// Seal `plaintext` under `kind`'s active DEK, rotating first if the write budget is spent.
    ///
    /// Returns `(dek_id, nonce, ciphertext)`. The kind identifier and `dek_id` are mixed into the
    /// GCM associated data so a ciphertext cannot be replayed against a different kind or DEK
    /// generation than the one it was sealed under.
    pub fn seal(&self, kind: &str, plaintext: &[u8]) -> Result<(u32, [u8; 12], Vec<u8>), Error> {
        let mut kinds = self.kinds.write();
        let entry = kinds.entry(kind.to_string()).or_insert_with(|| {
            let mut k = KindKeys::default();
            k.by_id.insert(0, Self::fresh_dek());
            k
        });

        if entry.writes_since_rotation >= self.rotate_after_writes {
            entry.active_id += 1;
            entry.by_id.insert(entry.active_id, Self::fresh_dek());
            entry.writes_since_rotation = 0;
        }

        let dek_id = entry.active_id;
        let dek = entry.by_id.get(&dek_id).expect("active dek always present");

        let mut nonce_bytes = [0u8; 12];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);
        let aad = associated_data(kind, dek_id);

        let ciphertext = dek
            .cipher
            .encrypt(
                nonce,
                Payload {
                    msg: plaintext,
                    aad: &aad,
                },
            )
            .map_err(|e| Error::decode(kind, format!("seal failed: {e}")))?;

        entry.writes_since_rotation += 1;

        Ok((dek_id, nonce_bytes, ciphertext))
    }

    /// Decrypt a ciphertext sealed under `kind`'s `dek_id` generation.
    pub fn open(
        &self,
        kind: &str,
        dek_id: u32,
        nonce: &[u8; 12],
        ciphertext: &[u8],
    ) -> Result<Vec<u8>, Error> {
        let kinds = self.kinds.read();
        let entry = kinds
            .get(kind)
            .ok_or_else(|| Error::decode(kind, "no DEK table for kind"))?;
        let dek = entry
            .by_id
            .get(&dek_id)
            .ok_or_else(|| Error::decode(kind, format!("unknown dek_id {dek_id}")))?;

        let aad = associated_data(kind, dek_id);
        dek.cipher
            .decrypt(
                Nonce::from_slice(nonce),
                Payload {
                    msg: ciphertext,
                    aad: &aad,
                },
            )
            .map_err(|e| Error::decode(kind, format!("open failed: {e}")))
    }
}

fn associated_data(kind: &str, dek_id: u32) -> Vec<u8> {
    let mut aad = kind.as_bytes().to_vec();
    aad.extend_from_slice(&dek_id.to_be_bytes());
    aad
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seal_then_open_round_trips() {
        let mgr = EncryptionManager::new(150_000);
        let (dek_id, nonce, ct) = mgr.seal("secrets", b"hello world").unwrap();
        let pt = mgr.open("secrets", dek_id, &nonce, &ct).unwrap();
        assert_eq!(pt, b"hello world");
    }

    #[test]
    fn distinct_seals_produce_distinct_ciphertexts_and_nonces() {
        let mgr = EncryptionManager::new(150_000);
        let (_, n1, c1) = mgr.seal("secrets", b"same plaintext").unwrap();
        let (_, n2, c2) = mgr.seal("secrets", b"same plaintext").unwrap();
        assert_ne!(n1, n2);
        assert_ne!(c1, c2);
    }

    #[test]
    fn rotation_increments_dek_id_and_keeps_old_rows_decryptable() {
        let mgr = EncryptionManager::new(2);
        let (dek_id_1, nonce_1, ct_1) = mgr.seal("secrets", b"a").unwrap();
        mgr.seal("secrets", b"b").unwrap();
        let (dek_id_3, _, _) = mgr.seal("secrets", b"c").unwrap();

        assert_eq!(dek_id_1, 0);
        assert_eq!(dek_id_3, 1);
        assert_eq!(mgr.open("secrets", dek_id_1, &nonce_1, &ct_1).unwrap(), b"a");
    }

    #[test]
    fn ciphertext_cannot_be_opened_under_wrong_kind() {
        let mgr = EncryptionManager::new(150_000);
        let (dek_id, nonce, ct) = mgr.seal("secrets", b"hello").unwrap();
        mgr.seal("configmaps", b"other").unwrap();
        assert!(mgr.open("configmaps", dek_id, &nonce, &ct).is_err());
    }
}
