//! RC4 encryption provider implementation

use generic_array::GenericArray;
use rc4::consts::{U10, U16, U5};
use rc4::{KeyInit, Rc4, StreamCipher};

use super::CryptoProvider;
use crate::error::{PDFOptError, PDFOptResult};

/// RC4 keystream provider.
///
/// Key lengths in use: 5 bytes (40-bit file keys), 10 bytes (40-bit
/// per-object keys) and 16 bytes (128-bit keys).
pub(crate) struct RC4Provider;

pub(crate) fn apply_keystream(key: &[u8], data: &mut [u8]) -> PDFOptResult<()> {
    match key.len() {
        5 => Rc4::<U5>::new(GenericArray::from_slice(key)).apply_keystream(data),
        10 => Rc4::<U10>::new(GenericArray::from_slice(key)).apply_keystream(data),
        16 => Rc4::<U16>::new(GenericArray::from_slice(key)).apply_keystream(data),
        n => return Err(PDFOptError::InvalidKeyLength(n)),
    }
    Ok(())
}

impl CryptoProvider for RC4Provider {
    fn encrypt(&self, data: &[u8], key: &[u8]) -> PDFOptResult<Vec<u8>> {
        let mut out = data.to_vec();
        apply_keystream(key, &mut out)?;
        Ok(out)
    }

    fn decrypt(&self, data: &[u8], key: &[u8]) -> PDFOptResult<Vec<u8>> {
        // RC4 is symmetric
        self.encrypt(data, key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rc4_round_trip() {
        let provider = RC4Provider;
        let key = hex::decode("0102030405").unwrap();
        let data = b"Test RC4 encryption".to_vec();

        let encrypted = provider.encrypt(&data, &key).unwrap();
        assert_ne!(encrypted, data);

        let decrypted = provider.decrypt(&encrypted, &key).unwrap();
        assert_eq!(decrypted, data);
    }

    #[test]
    fn test_rc4_key_lengths() {
        let provider = RC4Provider;
        for len in [5usize, 10, 16] {
            let key = vec![7u8; len];
            assert!(provider.encrypt(b"data", &key).is_ok());
        }
    }

    #[test]
    fn test_invalid_key_length() {
        let provider = RC4Provider;
        let key = vec![1, 2, 3];
        assert!(matches!(
            provider.encrypt(b"Test data", &key),
            Err(PDFOptError::InvalidKeyLength(3))
        ));
    }
}
