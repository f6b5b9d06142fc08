use base64::{engine::general_purpose::STANDARD, Engine as _};
use sha2::{Digest, Sha512};

/// Base64 (standard alphabet, padded) encoding of SHA-512 over `bytes`
pub fn content_hash(bytes: &[u8]) -> String {
    STANDARD.encode(Sha512::digest(bytes))
}
