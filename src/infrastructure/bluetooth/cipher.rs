//! Per-device message cipher.
//!
//! Cubes encrypt every notification and expect every command encrypted with
//! AES-128-CBC under a key derived from a static model key and the device
//! MAC. Only the first and the last 16-byte windows of a message are
//! transformed, each as an independent single-block CBC pass; for messages
//! between 17 and 31 bytes the two windows overlap.

use crate::infrastructure::bluetooth::protocol::{CipherKey, MacAddress};
use aes::Aes128;
use cbc::cipher::{block_padding::NoPadding, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use thiserror::Error;

type Aes128CbcEnc = cbc::Encryptor<Aes128>;
type Aes128CbcDec = cbc::Decryptor<Aes128>;

pub const BLOCK_SIZE: usize = 16;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CipherError {
    #[error("message of {0} bytes is shorter than one cipher block")]
    MessageTooShort(usize),
    #[error("block transform failed")]
    Block,
}

/// Salted key and IV for one device. Immutable for the session lifetime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CipherContext {
    key: [u8; 16],
    iv: [u8; 16],
}

impl CipherContext {
    /// Add the reversed MAC bytes to the first six key and IV bytes, mod 255
    pub fn derive(base: &CipherKey, mac: &MacAddress) -> Self {
        let mut key = base.key;
        let mut iv = base.iv;
        for (i, salt) in mac.salt().into_iter().enumerate() {
            key[i] = ((u16::from(base.key[i]) + u16::from(salt)) % 0xFF) as u8;
            iv[i] = ((u16::from(base.iv[i]) + u16::from(salt)) % 0xFF) as u8;
        }
        Self { key, iv }
    }

    pub fn key(&self) -> &[u8; 16] {
        &self.key
    }

    pub fn iv(&self) -> &[u8; 16] {
        &self.iv
    }
}

#[derive(Debug, Clone)]
pub struct GanCipher {
    context: CipherContext,
}

impl GanCipher {
    pub fn new(context: CipherContext) -> Self {
        Self { context }
    }

    pub fn for_device(base: &CipherKey, mac: &MacAddress) -> Self {
        Self::new(CipherContext::derive(base, mac))
    }

    pub fn encrypt(&self, data: &[u8]) -> Result<Vec<u8>, CipherError> {
        if data.len() < BLOCK_SIZE {
            return Err(CipherError::MessageTooShort(data.len()));
        }
        let mut out = data.to_vec();
        self.encrypt_window(&mut out[..BLOCK_SIZE])?;
        if out.len() > BLOCK_SIZE {
            let offset = out.len() - BLOCK_SIZE;
            self.encrypt_window(&mut out[offset..])?;
        }
        Ok(out)
    }

    /// Inverse of [`encrypt`](Self::encrypt): last window first, then the first
    pub fn decrypt(&self, data: &[u8]) -> Result<Vec<u8>, CipherError> {
        if data.len() < BLOCK_SIZE {
            return Err(CipherError::MessageTooShort(data.len()));
        }
        let mut out = data.to_vec();
        if out.len() > BLOCK_SIZE {
            let offset = out.len() - BLOCK_SIZE;
            self.decrypt_window(&mut out[offset..])?;
        }
        self.decrypt_window(&mut out[..BLOCK_SIZE])?;
        Ok(out)
    }

    fn encrypt_window(&self, window: &mut [u8]) -> Result<(), CipherError> {
        Aes128CbcEnc::new(&self.context.key.into(), &self.context.iv.into())
            .encrypt_padded_mut::<NoPadding>(window, BLOCK_SIZE)
            .map(|_| ())
            .map_err(|_| CipherError::Block)
    }

    fn decrypt_window(&self, window: &mut [u8]) -> Result<(), CipherError> {
        Aes128CbcDec::new(&self.context.key.into(), &self.context.iv.into())
            .decrypt_padded_mut::<NoPadding>(window)
            .map(|_| ())
            .map_err(|_| CipherError::Block)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::bluetooth::protocol::GAN_CIPHER_KEY;

    fn test_cipher() -> GanCipher {
        let mac: MacAddress = "AB:12:CD:34:56:78".parse().unwrap();
        GanCipher::for_device(&GAN_CIPHER_KEY, &mac)
    }

    #[test]
    fn test_salted_key_derivation() {
        let mac: MacAddress = "AB:12:CD:34:56:78".parse().unwrap();
        let context = CipherContext::derive(&GAN_CIPHER_KEY, &mac);
        assert_eq!(
            hex::encode(context.key()),
            "795876f5433d16072005185442111253"
        );
        assert_eq!(hex::encode(context.iv()), "895966f533ac76272095781432120243");
    }

    #[test]
    fn test_known_answer() {
        let cipher = test_cipher();
        let plain: Vec<u8> = (0u8..16).collect();
        assert_eq!(
            hex::encode(cipher.encrypt(&plain).unwrap()),
            "c24553b3e53f8fb831ecac1f463ee9e2"
        );

        let plain: Vec<u8> = (0u8..20).collect();
        assert_eq!(
            hex::encode(cipher.encrypt(&plain).unwrap()),
            "c24553b3799a096f5e9a83d8b1a7ae5d90bf759d"
        );
    }

    #[test]
    fn test_round_trip_single_and_overlapping_blocks() {
        let cipher = test_cipher();
        for len in [16usize, 17, 20, 31, 32] {
            let plain: Vec<u8> = (0..len).map(|i| (i * 7 + 3) as u8).collect();
            let encrypted = cipher.encrypt(&plain).unwrap();
            assert_ne!(encrypted, plain);
            assert_eq!(cipher.decrypt(&encrypted).unwrap(), plain);
            assert_eq!(cipher.encrypt(&cipher.decrypt(&plain).unwrap()).unwrap(), plain);
        }
    }

    #[test]
    fn test_interior_blocks_pass_through() {
        let cipher = test_cipher();
        let plain: Vec<u8> = (0u8..48).collect();
        let encrypted = cipher.encrypt(&plain).unwrap();
        assert_eq!(&encrypted[16..32], &plain[16..32]);
        assert_ne!(&encrypted[..16], &plain[..16]);
        assert_ne!(&encrypted[32..], &plain[32..]);
        assert_eq!(cipher.decrypt(&encrypted).unwrap(), plain);
    }

    #[test]
    fn test_short_message_rejected() {
        let cipher = test_cipher();
        assert_eq!(cipher.encrypt(&[0u8; 15]), Err(CipherError::MessageTooShort(15)));
        assert_eq!(cipher.decrypt(&[]), Err(CipherError::MessageTooShort(0)));
    }
}
