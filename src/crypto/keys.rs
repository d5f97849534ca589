use zeroize::Zeroize;

use super::CryptoError;

pub const KEY_LENGTH: usize = 32; // AES-256

/// Field encryption key, zeroed on drop.
///
/// Built once at startup from the configured secret and handed to the
/// [`FieldCodec`](super::FieldCodec); never stored in a global.
#[derive(Zeroize)]
#[zeroize(drop)]
pub struct FieldKey {
    pub(super) key_bytes: [u8; KEY_LENGTH],
}

impl FieldKey {
    /// Derive the key from a configured secret.
    ///
    /// The secret's bytes are truncated to 32 bytes, or right-padded with
    /// zero bytes when shorter. The same secret always yields the same key.
    pub fn from_secret(secret: &str) -> Result<Self, CryptoError> {
        if secret.is_empty() {
            return Err(CryptoError::MissingSecret);
        }
        let mut key_bytes = [0u8; KEY_LENGTH];
        let source = secret.as_bytes();
        let len = source.len().min(KEY_LENGTH);
        key_bytes[..len].copy_from_slice(&source[..len]);
        Ok(Self { key_bytes })
    }

    /// Access the raw key bytes (internal use only)
    pub(crate) fn as_bytes(&self) -> &[u8; KEY_LENGTH] {
        &self.key_bytes
    }
}

impl std::fmt::Debug for FieldKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("FieldKey(..)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_secret_produces_same_key() {
        let k1 = FieldKey::from_secret("hospital-exchange-secret").unwrap();
        let k2 = FieldKey::from_secret("hospital-exchange-secret").unwrap();
        assert_eq!(k1.key_bytes, k2.key_bytes);
    }

    #[test]
    fn short_secret_is_zero_padded() {
        let key = FieldKey::from_secret("abc").unwrap();
        assert_eq!(&key.key_bytes[..3], b"abc");
        assert!(key.key_bytes[3..].iter().all(|b| *b == 0));
    }

    #[test]
    fn long_secret_is_truncated() {
        let secret = "x".repeat(40);
        let key = FieldKey::from_secret(&secret).unwrap();
        assert_eq!(key.key_bytes, [b'x'; KEY_LENGTH]);

        // Bytes past 32 do not influence the key
        let other = FieldKey::from_secret(&format!("{}{}", "x".repeat(32), "different")).unwrap();
        assert_eq!(key.key_bytes, other.key_bytes);
    }

    #[test]
    fn empty_secret_is_rejected() {
        assert!(matches!(
            FieldKey::from_secret(""),
            Err(CryptoError::MissingSecret)
        ));
    }

    #[test]
    fn debug_does_not_print_key_material() {
        let key = FieldKey::from_secret("super-secret").unwrap();
        assert_eq!(format!("{key:?}"), "FieldKey(..)");
    }
}
