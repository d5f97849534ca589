use aes_gcm::aead::consts::U16;
use aes_gcm::aead::rand_core::RngCore;
use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::aes::Aes256;
use aes_gcm::{AesGcm, Nonce};

use super::keys::FieldKey;
use super::CryptoError;

/// IV length in bytes. Hex-encoded, the IV part of a token is twice this.
pub const IV_LENGTH: usize = 16;

/// AES-256-GCM with a 16-byte IV.
type FieldCipher = AesGcm<Aes256, U16>;

/// Codec for the single sensitive text field of a record.
///
/// Tokens look like `<ivHex>:<cipherHex>`. A fresh IV is drawn for every
/// call to [`FieldCodec::encrypt`], so the same plaintext never encrypts to
/// the same token twice.
#[derive(Debug)]
pub struct FieldCodec {
    key: FieldKey,
}

impl FieldCodec {
    pub fn new(key: FieldKey) -> Self {
        Self { key }
    }

    /// Build a codec straight from the configured secret.
    pub fn from_secret(secret: &str) -> Result<Self, CryptoError> {
        Ok(Self::new(FieldKey::from_secret(secret)?))
    }

    /// Encrypt plaintext into a self-describing token.
    pub fn encrypt(&self, plaintext: &str) -> Result<String, CryptoError> {
        let cipher = self.cipher()?;

        let mut iv = [0u8; IV_LENGTH];
        OsRng.fill_bytes(&mut iv);

        let ciphertext = cipher
            .encrypt(Nonce::<U16>::from_slice(&iv), plaintext.as_bytes())
            .map_err(|_| CryptoError::EncryptionFailed)?;

        Ok(format!("{}:{}", hex::encode(iv), hex::encode(ciphertext)))
    }

    /// Decrypt a stored value.
    ///
    /// Values that are not tokens are legacy plaintext and come back
    /// unchanged. A token that fails to decrypt is logged and also comes
    /// back unchanged; this never errors.
    pub fn decrypt(&self, stored: &str) -> String {
        match self.try_decrypt(stored) {
            Ok(Some(plaintext)) => plaintext,
            Ok(None) => stored.to_string(),
            Err(e) => {
                tracing::warn!(error = %e, "Stored token could not be decrypted, returning stored value");
                stored.to_string()
            }
        }
    }

    /// Strict variant: `Ok(None)` for non-token input, `Err` when a token
    /// does not decrypt under this key.
    pub fn try_decrypt(&self, stored: &str) -> Result<Option<String>, CryptoError> {
        let Some((iv, ciphertext)) = parse_token(stored) else {
            return Ok(None);
        };

        let cipher = self.cipher()?;
        let bytes = cipher
            .decrypt(Nonce::<U16>::from_slice(&iv), ciphertext.as_ref())
            .map_err(|_| CryptoError::DecryptionFailed)?;

        String::from_utf8(bytes)
            .map(Some)
            .map_err(|_| CryptoError::MalformedToken)
    }

    fn cipher(&self) -> Result<FieldCipher, CryptoError> {
        FieldCipher::new_from_slice(self.key.as_bytes()).map_err(|_| CryptoError::EncryptionFailed)
    }
}

/// Whether a stored value has the shape of an encrypted token.
pub fn is_token(value: &str) -> bool {
    parse_token(value).is_some()
}

/// Split `<ivHex>:<cipherHex>` into raw IV and ciphertext bytes.
fn parse_token(value: &str) -> Option<([u8; IV_LENGTH], Vec<u8>)> {
    let (iv_hex, cipher_hex) = value.split_once(':')?;
    if iv_hex.len() != IV_LENGTH * 2 || cipher_hex.is_empty() || cipher_hex.contains(':') {
        return None;
    }

    let mut iv = [0u8; IV_LENGTH];
    hex::decode_to_slice(iv_hex, &mut iv).ok()?;
    let ciphertext = hex::decode(cipher_hex).ok()?;

    Some((iv, ciphertext))
}
