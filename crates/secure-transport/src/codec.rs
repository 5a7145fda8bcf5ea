//! Length-delimited sealed frame codec
//!
//! Wire layout per frame: `u32 big-endian length || nonce || ciphertext`.
//! The length prefix keeps frame boundaries intact no matter how the
//! transport splits or coalesces writes.

use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use channel_crypto::{CryptoError, FrameCipher};
use channel_protocol::LENGTH_PREFIX_SIZE;
use tokio_util::codec::{Decoder, Encoder, LengthDelimitedCodec};

use crate::ChannelError;

pub(crate) struct SealedFrameCodec {
    length_codec: LengthDelimitedCodec,
    cipher: Arc<FrameCipher>,
}

impl SealedFrameCodec {
    pub fn new(cipher: Arc<FrameCipher>, max_frame_size: usize) -> Self {
        let length_codec = LengthDelimitedCodec::builder()
            .length_field_length(LENGTH_PREFIX_SIZE)
            .max_frame_length(max_frame_size)
            .new_codec();

        Self {
            length_codec,
            cipher,
        }
    }
}

impl Decoder for SealedFrameCodec {
    type Item = Bytes;
    type Error = ChannelError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let Some(frame) = self.length_codec.decode(src)? else {
            return Ok(None);
        };

        self.cipher
            .open(&frame)
            .map(|plaintext| Some(Bytes::from(plaintext)))
            .map_err(|e| match e {
                CryptoError::DecryptionFailed => ChannelError::AuthenticationFailed,
                other => ChannelError::Crypto(other),
            })
    }
}

impl Encoder<Bytes> for SealedFrameCodec {
    type Error = ChannelError;

    fn encode(&mut self, item: Bytes, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let frame = self.cipher.seal(&item)?;

        self.length_codec
            .encode(Bytes::from(frame), dst)
            .map_err(ChannelError::from)
    }
}
