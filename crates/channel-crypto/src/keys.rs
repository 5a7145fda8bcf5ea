//! Ephemeral key agreement

use rand::rngs::OsRng;
use x25519_dalek::{EphemeralSecret, PublicKey};
use zeroize::Zeroizing;

use crate::{PUBLIC_KEY_SIZE, SHARED_SECRET_SIZE};

/// Key pair for ephemeral key exchange
///
/// The secret half is consumed by [`KeyPair::diffie_hellman`] and wiped when
/// dropped, so a key pair can only ever produce one shared secret.
pub struct KeyPair {
    secret: EphemeralSecret,
    public: PublicKey,
}

impl KeyPair {
    /// Generate a new ephemeral key pair
    pub fn generate() -> Self {
        let secret = EphemeralSecret::random_from_rng(OsRng);
        let public = PublicKey::from(&secret);
        Self { secret, public }
    }

    /// Get the public key bytes
    pub fn public_key_bytes(&self) -> [u8; PUBLIC_KEY_SIZE] {
        *self.public.as_bytes()
    }

    /// Precompute the shared secret with the peer's public key
    ///
    /// The peer key is taken as-is; there is no identity check.
    pub fn diffie_hellman(self, their_public: &[u8; PUBLIC_KEY_SIZE]) -> SharedKey {
        let their_public = PublicKey::from(*their_public);
        let shared = self.secret.diffie_hellman(&their_public);
        SharedKey(Zeroizing::new(*shared.as_bytes()))
    }
}

/// Symmetric key shared by both ends of a channel
pub struct SharedKey(Zeroizing<[u8; SHARED_SECRET_SIZE]>);

impl SharedKey {
    pub fn as_bytes(&self) -> &[u8; SHARED_SECRET_SIZE] {
        &self.0
    }
}

impl std::fmt::Debug for SharedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SharedKey(..)")
    }
}
