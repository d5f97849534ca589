pub mod keys;
pub mod encryption;
mod phi_audit;

pub use keys::*;
pub use encryption::*;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("Encryption failed")]
    EncryptionFailed,

    #[error("Decryption failed: wrong key or corrupted data")]
    DecryptionFailed,

    #[error("Decrypted token is not valid UTF-8")]
    MalformedToken,

    #[error("Encryption secret is missing or empty")]
    MissingSecret,
}
