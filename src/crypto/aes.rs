//! AES-128 CBC encryption provider implementation

use aes::Aes128;
use cipher::{BlockDecrypt, BlockEncrypt, KeyInit};
use generic_array::GenericArray;
use rand::{thread_rng, RngCore};

use super::CryptoProvider;
use crate::error::{PDFOptError, PDFOptResult};

const BLOCK_SIZE: usize = 16;

/// AES-128 CBC provider. The 16-byte IV is prepended to the ciphertext;
/// plaintext is PKCS#7 padded.
pub(crate) struct AESProvider {
    key_length: usize,
}

impl AESProvider {
    pub fn new(key_length: usize) -> Self {
        Self { key_length }
    }
}

impl CryptoProvider for AESProvider {
    fn encrypt(&self, data: &[u8], key: &[u8]) -> PDFOptResult<Vec<u8>> {
        if key.len() != self.key_length {
            return Err(PDFOptError::InvalidKeyLength(key.len()));
        }

        let cipher = Aes128::new(GenericArray::from_slice(key));

        let mut buf = data.to_vec();
        let pad = BLOCK_SIZE - buf.len() % BLOCK_SIZE;
        buf.extend(std::iter::repeat(pad as u8).take(pad));

        let mut iv = [0u8; BLOCK_SIZE];
        thread_rng().fill_bytes(&mut iv);

        let mut prev = iv.to_vec();
        for chunk in buf.chunks_mut(BLOCK_SIZE) {
            for (b, p) in chunk.iter_mut().zip(prev.iter()) {
                *b ^= p;
            }
            let block = GenericArray::from_mut_slice(chunk);
            cipher.encrypt_block(block);
            prev.copy_from_slice(chunk);
        }

        let mut out = iv.to_vec();
        out.extend_from_slice(&buf);
        Ok(out)
    }

    fn decrypt(&self, data: &[u8], key: &[u8]) -> PDFOptResult<Vec<u8>> {
        if key.len() != self.key_length {
            return Err(PDFOptError::InvalidKeyLength(key.len()));
        }
        if data.len() < 2 * BLOCK_SIZE || data.len() % BLOCK_SIZE != 0 {
            return Err(PDFOptError::InvalidDataLength {
                operation: "AES decrypt".to_string(),
            });
        }

        let cipher = Aes128::new(GenericArray::from_slice(key));

        let (iv, ciphertext) = data.split_at(BLOCK_SIZE);
        let mut buf = ciphertext.to_vec();

        let mut prev = iv.to_vec();
        for chunk in buf.chunks_mut(BLOCK_SIZE) {
            let saved = chunk.to_vec();
            let block = GenericArray::from_mut_slice(chunk);
            cipher.decrypt_block(block);
            for (b, p) in chunk.iter_mut().zip(prev.iter()) {
                *b ^= p;
            }
            prev = saved;
        }

        match buf.last().copied() {
            Some(pad) if pad as usize >= 1 && pad as usize <= BLOCK_SIZE && pad as usize <= buf.len() => {
                buf.truncate(buf.len() - pad as usize);
                Ok(buf)
            }
            _ => Err(PDFOptError::InvalidDataLength {
                operation: "AES unpad".to_string(),
            }),
        }
    }
}
