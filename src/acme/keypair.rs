use ring::{
    rand::SystemRandom,
    signature::{EcdsaKeyPair, KeyPair as _, Signature, ECDSA_P256_SHA256_FIXED_SIGNING},
};

use crate::error::Error;

/// ES256 account key. The pkcs8 document is kept alongside the parsed key
/// so the exact material can be persisted and later restored for a resumed
/// order.
pub(crate) struct KeyPair {
    inner: EcdsaKeyPair,
    pkcs8: Vec<u8>,
}

impl KeyPair {
    pub(crate) fn from_pkcs8(pkcs8: Vec<u8>) -> Result<Self, Error> {
        let rng = SystemRandom::new();
        let inner = EcdsaKeyPair::from_pkcs8(&ECDSA_P256_SHA256_FIXED_SIGNING, &pkcs8, &rng)
            .map_err(|_| Error::Key("failed to load account key pair".to_string()))?;
        Ok(KeyPair { inner, pkcs8 })
    }

    pub(crate) fn generate() -> Result<Self, Error> {
        let rng = SystemRandom::new();
        let document = EcdsaKeyPair::generate_pkcs8(&ECDSA_P256_SHA256_FIXED_SIGNING, &rng)
            .map_err(|_| Error::Key("failed to generate account key pair".to_string()))?;
        Self::from_pkcs8(document.as_ref().to_vec())
    }

    pub(crate) fn sign(&self, message: impl AsRef<[u8]>) -> Result<Signature, Error> {
        self.inner
            .sign(&SystemRandom::new(), message.as_ref())
            .map_err(|_| Error::Key("failed to sign message".to_string()))
    }

    pub(crate) fn public_key(&self) -> &[u8] {
        self.inner.public_key().as_ref()
    }

    /// The serialized key material, suitable for the order store.
    pub(crate) fn pkcs8(&self) -> &[u8] {
        &self.pkcs8
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_round_trips_through_pkcs8() {
        let key = KeyPair::generate().unwrap();
        let restored = KeyPair::from_pkcs8(key.pkcs8().to_vec()).unwrap();
        assert_eq!(key.public_key(), restored.public_key());
    }

    #[test]
    fn from_pkcs8_rejects_garbage() {
        assert!(KeyPair::from_pkcs8(vec![0u8; 16]).is_err());
    }
}
