use crate::common::TransferError;
use crate::crypto::types::{EncryptionKey, Nonce};
use aes_gcm::{
    aead::{generic_array::GenericArray, Aead, AeadInPlace, KeyInit},
    Aes256Gcm,
};
use std::sync::Arc;

// Encrypt and decrypt using AES-256-GCM
// Same cipher is used for every chunk of a transfer

/// AES-256-GCM bound to one transfer key, shared read-only by all chunk workers
#[derive(Clone)]
pub struct ChunkCipher {
    cipher: Arc<Aes256Gcm>,
}

impl ChunkCipher {
    pub fn new(key: &EncryptionKey) -> Self {
        Self {
            cipher: Arc::new(Aes256Gcm::new(GenericArray::from_slice(key.as_bytes()))),
        }
    }

    pub fn encrypt(
        &self,
        nonce_base: &Nonce,
        counter: u32,
        plaintext: &[u8],
    ) -> Result<Vec<u8>, TransferError> {
        encrypt_chunk_at_position(&self.cipher, nonce_base, plaintext, counter)
    }

    /// Encrypt `buffer` in place, appending the tag
    pub fn encrypt_in_place(
        &self,
        nonce_base: &Nonce,
        counter: u32,
        buffer: &mut Vec<u8>,
    ) -> Result<(), TransferError> {
        encrypt_chunk_in_place(&self.cipher, nonce_base, buffer, counter)
    }

    /// Fails closed: a tag mismatch is reported against `(file_index, counter)`
    pub fn decrypt(
        &self,
        nonce_base: &Nonce,
        file_index: u32,
        counter: u32,
        ciphertext: &[u8],
    ) -> Result<Vec<u8>, TransferError> {
        decrypt_chunk_at_position(&self.cipher, nonce_base, ciphertext, counter).map_err(|_| {
            TransferError::AuthenticationFailure {
                file_index,
                chunk_index: counter,
            }
        })
    }
}

pub fn decrypt_chunk_at_position(
    cipher: &Aes256Gcm,
    nonce_base: &Nonce,
    encrypted_data: &[u8],
    counter: u32,
) -> Result<Vec<u8>, aes_gcm::Error> {
    let full_nonce = nonce_base.with_counter(counter);
    let nonce_array = GenericArray::from_slice(&full_nonce);

    cipher.decrypt(nonce_array, encrypted_data)
}

pub fn encrypt_chunk_at_position(
    cipher: &Aes256Gcm,
    nonce_base: &Nonce,
    plaintext: &[u8],
    counter: u32,
) -> Result<Vec<u8>, TransferError> {
    let full_nonce = nonce_base.with_counter(counter);
    let nonce_array = GenericArray::from_slice(&full_nonce);

    cipher
        .encrypt(nonce_array, plaintext)
        .map_err(|e| TransferError::protocol(format!("encryption failed: {e:?}")))
}

pub fn encrypt_chunk_in_place(
    cipher: &Aes256Gcm,
    nonce_base: &Nonce,
    buffer: &mut Vec<u8>,
    counter: u32,
) -> Result<(), TransferError> {
    let full_nonce = nonce_base.with_counter(counter);
    let nonce_array = GenericArray::from_slice(&full_nonce);

    cipher
        .encrypt_in_place(nonce_array, b"", buffer)
        .map_err(|e| TransferError::protocol(format!("encryption failed: {e:?}")))
}
