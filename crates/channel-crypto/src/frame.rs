//! Frame sealing with XChaCha20Poly1305
//!
//! A sealed frame is `nonce (24 bytes) || ciphertext || tag (16 bytes)`.
//! Every frame draws a fresh random nonce; the 192-bit nonce space makes
//! collisions under one key negligible without any shared counter state.

use chacha20poly1305::{
    XChaCha20Poly1305, XNonce,
    aead::{Aead, KeyInit},
};
use rand::{RngCore, rngs::OsRng};

use crate::{CryptoError, CryptoResult, FRAME_OVERHEAD, NONCE_SIZE, SharedKey};

/// Seals and opens frames under one shared key
///
/// Holds no mutable state, so one instance can be shared by the reader and
/// writer pipelines of a channel.
pub struct FrameCipher {
    cipher: XChaCha20Poly1305,
}

impl FrameCipher {
    /// Build the cipher once from the precomputed shared key
    pub fn new(key: &SharedKey) -> CryptoResult<Self> {
        let cipher = XChaCha20Poly1305::new_from_slice(key.as_bytes())
            .map_err(|e| CryptoError::KeySetup(e.to_string()))?;

        Ok(Self { cipher })
    }

    /// Seal `plaintext` under a fresh random nonce
    pub fn seal(&self, plaintext: &[u8]) -> CryptoResult<Vec<u8>> {
        let mut nonce = [0u8; NONCE_SIZE];
        OsRng.fill_bytes(&mut nonce);
        self.seal_with_nonce(&nonce, plaintext)
    }

    /// Seal `plaintext` under the given nonce
    ///
    /// Callers must never reuse a nonce with the same key.
    pub fn seal_with_nonce(
        &self,
        nonce: &[u8; NONCE_SIZE],
        plaintext: &[u8],
    ) -> CryptoResult<Vec<u8>> {
        let ciphertext = self
            .cipher
            .encrypt(XNonce::from_slice(nonce), plaintext)
            .map_err(|e| CryptoError::Encryption(e.to_string()))?;

        let mut frame = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        frame.extend_from_slice(nonce);
        frame.extend_from_slice(&ciphertext);

        Ok(frame)
    }

    /// Verify and decrypt one sealed frame
    pub fn open(&self, frame: &[u8]) -> CryptoResult<Vec<u8>> {
        if frame.len() < FRAME_OVERHEAD {
            return Err(CryptoError::DecryptionFailed);
        }

        let (nonce, ciphertext) = frame.split_at(NONCE_SIZE);

        self.cipher
            .decrypt(XNonce::from_slice(nonce), ciphertext)
            .map_err(|_| CryptoError::DecryptionFailed)
    }
}

/// Nonce carried by a sealed frame, if it is long enough to have one
pub fn frame_nonce(frame: &[u8]) -> Option<[u8; NONCE_SIZE]> {
    frame.get(..NONCE_SIZE)?.try_into().ok()
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;
    use crate::{KeyPair, TAG_SIZE};

    fn cipher_pair() -> (FrameCipher, FrameCipher) {
        let alice = KeyPair::generate();
        let bob = KeyPair::generate();
        let alice_public = alice.public_key_bytes();
        let bob_public = bob.public_key_bytes();

        let alice_cipher = FrameCipher::new(&alice.diffie_hellman(&bob_public)).unwrap();
        let bob_cipher = FrameCipher::new(&bob.diffie_hellman(&alice_public)).unwrap();
        (alice_cipher, bob_cipher)
    }

    #[test]
    fn test_round_trip_up_to_chunk_bound() {
        let (alice, bob) = cipher_pair();
        let nonce = [7u8; NONCE_SIZE];

        for len in [0usize, 1, 5, 16, 23, 24, 25, 512, 1023, 1024] {
            let message: Vec<u8> = (0..len).map(|i| (i * 31 % 251) as u8).collect();
            let frame = alice.seal_with_nonce(&nonce, &message).unwrap();

            assert_eq!(frame.len(), len + FRAME_OVERHEAD);
            assert_eq!(&frame[..NONCE_SIZE], &nonce);
            assert_eq!(bob.open(&frame).unwrap(), message);
        }
    }

    #[test]
    fn test_any_flipped_bit_fails_authentication() {
        let (alice, bob) = cipher_pair();
        let frame = alice.seal(b"hello").unwrap();

        for byte in 0..frame.len() {
            for bit in 0..8 {
                let mut tampered = frame.clone();
                tampered[byte] ^= 1 << bit;
                assert!(
                    matches!(bob.open(&tampered), Err(CryptoError::DecryptionFailed)),
                    "bit {bit} of byte {byte} went undetected"
                );
            }
        }
    }

    #[test]
    fn test_truncated_frames_are_rejected() {
        let (alice, bob) = cipher_pair();
        let frame = alice.seal(b"hello").unwrap();

        assert!(bob.open(&frame[..NONCE_SIZE + TAG_SIZE - 1]).is_err());
        assert!(bob.open(&frame[..frame.len() - 1]).is_err());
        assert!(bob.open(&[]).is_err());
    }

    #[test]
    fn test_wrong_key_is_rejected() {
        let (alice, _) = cipher_pair();
        let (_, stranger) = cipher_pair();
        let frame = alice.seal(b"hello").unwrap();

        assert!(stranger.open(&frame).is_err());
    }

    #[test]
    fn test_random_nonces_do_not_repeat() {
        let (alice, _) = cipher_pair();
        let mut seen = HashSet::new();

        for _ in 0..10_000 {
            let frame = alice.seal(b"same message").unwrap();
            assert!(seen.insert(frame_nonce(&frame).unwrap()));
        }
    }

    #[test]
    fn test_frame_nonce_needs_full_nonce() {
        assert!(frame_nonce(&[0u8; NONCE_SIZE - 1]).is_none());
        assert_eq!(frame_nonce(&[9u8; NONCE_SIZE]), Some([9u8; NONCE_SIZE]));
    }
}
