pub mod encryption;
pub mod hash;
pub mod types;

pub use encryption::{
    decrypt_chunk_at_position, encrypt_chunk_at_position, encrypt_chunk_in_place, ChunkCipher,
};
pub use hash::{calculate_file_hash, verify_digest, ContentHasher, Sha256Digest};
pub use types::{EncryptionKey, Nonce, TAG_LEN};
