//! Credentials and key material supplied by the caller

use drivenet_crypto::{hash_password, TransferKey};
use secrecy::{ExposeSecret, SecretString};

use crate::error::{TransferError, TransferResult};

/// Bridge user and plaintext password
pub struct Credentials {
    pub user: String,
    pub password: SecretString,
}

impl Credentials {
    pub fn new(user: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            password: SecretString::from(password.into()),
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("user", &self.user)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

/// How a bridge request is authorized
#[derive(Debug)]
pub enum Authorization {
    Bearer(SecretString),
    /// HTTP basic auth with the SHA-256 password digest as the secret
    Basic { user: String, secret: SecretString },
}

impl Authorization {
    pub fn from_credentials(creds: &Credentials) -> Self {
        Authorization::Basic {
            user: creds.user.clone(),
            secret: SecretString::from(hash_password(creds.password.expose_secret())),
        }
    }

    pub fn bearer(token: &SecretString) -> Self {
        Authorization::Bearer(SecretString::from(token.expose_secret().to_owned()))
    }

    /// Exactly one of `token` and `creds` must be present.
    pub fn resolve(
        token: Option<&SecretString>,
        creds: Option<&Credentials>,
    ) -> TransferResult<Self> {
        match (token, creds) {
            (Some(token), None) => Ok(Self::bearer(token)),
            (None, Some(creds)) => Ok(Self::from_credentials(creds)),
            (Some(_), Some(_)) => Err(TransferError::Configuration(
                "both a bearer token and user/pass credentials were supplied; pass exactly one"
                    .into(),
            )),
            (None, None) => Err(TransferError::Configuration(
                "no authorization supplied: pass a bearer token or user/pass credentials".into(),
            )),
        }
    }
}

/// What the decrypt key is obtained from
#[derive(Debug)]
pub enum KeyMaterial {
    /// Derive the key per file from the account mnemonic
    Mnemonic(SecretString),
    /// Use this key as is
    RawKey(TransferKey),
}

impl KeyMaterial {
    /// Exactly one of `mnemonic` and `raw_key` must be present; a raw key
    /// must be 32 bytes.
    pub fn resolve(
        mnemonic: Option<&SecretString>,
        raw_key: Option<&[u8]>,
    ) -> TransferResult<Self> {
        match (mnemonic, raw_key) {
            (Some(m), None) => Ok(KeyMaterial::Mnemonic(SecretString::from(
                m.expose_secret().to_owned(),
            ))),
            (None, Some(raw)) => TransferKey::from_slice(raw)
                .map(KeyMaterial::RawKey)
                .map_err(|e| TransferError::Configuration(format!("raw encryption key: {e}"))),
            (Some(_), Some(_)) => Err(TransferError::Configuration(
                "both a mnemonic and a raw encryption key were supplied; pass exactly one".into(),
            )),
            (None, None) => Err(TransferError::Configuration(
                "no key material supplied: pass a mnemonic or a 32-byte encryption key".into(),
            )),
        }
    }
}
