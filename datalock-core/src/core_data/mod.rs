//! Data sealing and signing with a lock-key
//!
//! Application data is sealed to the lock-key's encryption public key (only
//! the holder of the key can open it) and signed with its signing key.
//! Inputs are bytes, text or JSON values; JSON strings are taken as text and
//! any other JSON value is serialized first.

use crate::core_crypto::{self, CryptoError, SIGNATURE_LEN};
use crate::core_lockkey::LockKey;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde_json::Value;
use std::borrow::Cow;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Data sealing errors
#[derive(Debug, Error)]
pub enum DataError {
    #[error("Non-empty data required.")]
    EmptyInput,

    #[error("Data encryption failed.")]
    Encryption(#[source] CryptoError),

    #[error("Data decryption failed.")]
    Decryption(#[source] CryptoError),

    #[error("Sealed data is not valid base64")]
    Encoding(#[source] base64::DecodeError),

    #[error("Decrypted data is not valid UTF-8")]
    Utf8(#[source] std::string::FromUtf8Error),

    #[error("Data is not valid JSON")]
    Json(#[source] serde_json::Error),

    #[error("Data signing failed.")]
    Signing(#[source] CryptoError),

    #[error("Malformed signature: expected {expected} bytes, got {found}")]
    MalformedSignature { expected: usize, found: usize },

    #[error("Unrecognized data format ('{0}')")]
    UnrecognizedFormat(String),
}

pub type DataResult<T> = Result<T, DataError>;

/// Data to seal or sign
#[derive(Debug, Clone, Copy)]
pub enum DataInput<'a> {
    Bytes(&'a [u8]),
    Text(&'a str),
    Json(&'a Value),
}

impl<'a> DataInput<'a> {
    fn to_bytes(self) -> DataResult<Cow<'a, [u8]>> {
        match self {
            DataInput::Bytes(bytes) => Ok(Cow::Borrowed(bytes)),
            DataInput::Text(text) => Ok(Cow::Borrowed(text.as_bytes())),
            DataInput::Json(Value::Null) => Err(DataError::EmptyInput),
            DataInput::Json(Value::String(text)) => Ok(Cow::Borrowed(text.as_bytes())),
            DataInput::Json(value) => serde_json::to_vec(value)
                .map(Cow::Owned)
                .map_err(DataError::Json),
        }
    }
}

impl<'a> From<&'a [u8]> for DataInput<'a> {
    fn from(bytes: &'a [u8]) -> Self {
        DataInput::Bytes(bytes)
    }
}

impl<'a, const N: usize> From<&'a [u8; N]> for DataInput<'a> {
    fn from(bytes: &'a [u8; N]) -> Self {
        DataInput::Bytes(bytes)
    }
}

impl<'a> From<&'a Vec<u8>> for DataInput<'a> {
    fn from(bytes: &'a Vec<u8>) -> Self {
        DataInput::Bytes(bytes)
    }
}

impl<'a> From<&'a str> for DataInput<'a> {
    fn from(text: &'a str) -> Self {
        DataInput::Text(text)
    }
}

impl<'a> From<&'a String> for DataInput<'a> {
    fn from(text: &'a String) -> Self {
        DataInput::Text(text)
    }
}

impl<'a> From<&'a Value> for DataInput<'a> {
    fn from(value: &'a Value) -> Self {
        DataInput::Json(value)
    }
}

/// Encoding of sealed output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    #[default]
    Base64,
    Raw,
}

impl FromStr for OutputFormat {
    type Err = DataError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "base64" | "base-64" => Ok(OutputFormat::Base64),
            "raw" => Ok(OutputFormat::Raw),
            _ => Err(DataError::UnrecognizedFormat(s.to_string())),
        }
    }
}

/// Encoding of unlocked output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UnlockFormat {
    #[default]
    Utf8,
    Raw,
}

impl FromStr for UnlockFormat {
    type Err = DataError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "utf8" | "utf-8" => Ok(UnlockFormat::Utf8),
            "raw" => Ok(UnlockFormat::Raw),
            _ => Err(DataError::UnrecognizedFormat(s.to_string())),
        }
    }
}

/// Options for [`unlock_data`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnlockOptions {
    pub format: UnlockFormat,
    /// Parse UTF-8 output as JSON
    pub parse_json: bool,
}

impl Default for UnlockOptions {
    fn default() -> Self {
        UnlockOptions {
            format: UnlockFormat::Utf8,
            parse_json: true,
        }
    }
}

/// Sealed data
#[derive(Clone, PartialEq, Eq)]
pub enum Sealed {
    Base64(String),
    Raw(Vec<u8>),
}

impl Sealed {
    /// Sealed bytes, decoding base64 if needed
    pub fn to_bytes(&self) -> DataResult<Vec<u8>> {
        match self {
            Sealed::Base64(text) => STANDARD.decode(text).map_err(DataError::Encoding),
            Sealed::Raw(bytes) => Ok(bytes.clone()),
        }
    }
}

impl fmt::Debug for Sealed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Sealed::Base64(text) => write!(f, "Sealed::Base64({} chars)", text.len()),
            Sealed::Raw(bytes) => write!(f, "Sealed::Raw({} bytes)", bytes.len()),
        }
    }
}

/// Sealed data to open; text is base64
#[derive(Debug, Clone, Copy)]
pub enum SealedInput<'a> {
    Base64(&'a str),
    Raw(&'a [u8]),
}

impl<'a> From<&'a str> for SealedInput<'a> {
    fn from(text: &'a str) -> Self {
        SealedInput::Base64(text)
    }
}

impl<'a> From<&'a String> for SealedInput<'a> {
    fn from(text: &'a String) -> Self {
        SealedInput::Base64(text)
    }
}

impl<'a> From<&'a [u8]> for SealedInput<'a> {
    fn from(bytes: &'a [u8]) -> Self {
        SealedInput::Raw(bytes)
    }
}

impl<'a> From<&'a Vec<u8>> for SealedInput<'a> {
    fn from(bytes: &'a Vec<u8>) -> Self {
        SealedInput::Raw(bytes)
    }
}

impl<'a> From<&'a Sealed> for SealedInput<'a> {
    fn from(sealed: &'a Sealed) -> Self {
        match sealed {
            Sealed::Base64(text) => SealedInput::Base64(text),
            Sealed::Raw(bytes) => SealedInput::Raw(bytes),
        }
    }
}

/// Unlocked data
#[derive(Debug, Clone, PartialEq)]
pub enum Unlocked {
    Json(Value),
    Text(String),
    Raw(Vec<u8>),
}

impl Unlocked {
    pub fn as_json(&self) -> Option<&Value> {
        match self {
            Unlocked::Json(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Unlocked::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn into_bytes(self) -> Vec<u8> {
        match self {
            Unlocked::Json(value) => value.to_string().into_bytes(),
            Unlocked::Text(text) => text.into_bytes(),
            Unlocked::Raw(bytes) => bytes,
        }
    }
}

/// Seal data so only the holder of `key` can open it
pub fn lock_data<'a>(
    data: impl Into<DataInput<'a>>,
    key: &LockKey,
    format: OutputFormat,
) -> DataResult<Sealed> {
    let plaintext = data.into().to_bytes()?;
    let sealed = core_crypto::seal(&plaintext, key.enc_pk()).map_err(DataError::Encryption)?;

    Ok(match format {
        OutputFormat::Base64 => Sealed::Base64(STANDARD.encode(sealed)),
        OutputFormat::Raw => Sealed::Raw(sealed),
    })
}

/// Open data sealed by [`lock_data`]
pub fn unlock_data<'a>(
    sealed: impl Into<SealedInput<'a>>,
    key: &LockKey,
    options: UnlockOptions,
) -> DataResult<Unlocked> {
    let decoded;
    let bytes = match sealed.into() {
        SealedInput::Base64(text) => {
            decoded = STANDARD.decode(text).map_err(DataError::Encoding)?;
            decoded.as_slice()
        }
        SealedInput::Raw(bytes) => bytes,
    };

    let plaintext =
        core_crypto::open(bytes, key.enc_pk(), key.enc_sk()).map_err(DataError::Decryption)?;

    match options.format {
        UnlockFormat::Raw => Ok(Unlocked::Raw(plaintext)),
        UnlockFormat::Utf8 => {
            let text = String::from_utf8(plaintext).map_err(DataError::Utf8)?;
            if options.parse_json {
                serde_json::from_str(&text)
                    .map(Unlocked::Json)
                    .map_err(DataError::Json)
            } else {
                Ok(Unlocked::Text(text))
            }
        }
    }
}

/// Detached signature over data with the lock-key's signing key
pub fn sign_data<'a>(data: impl Into<DataInput<'a>>, key: &LockKey) -> DataResult<Vec<u8>> {
    let message = data.into().to_bytes()?;
    core_crypto::sign_detached(key.private_key(), &message)
        .map(|signature| signature.to_vec())
        .map_err(DataError::Signing)
}

/// Check a detached signature made by [`sign_data`]
pub fn verify_data<'a>(
    data: impl Into<DataInput<'a>>,
    key: &LockKey,
    signature: &[u8],
) -> DataResult<bool> {
    if signature.len() != SIGNATURE_LEN {
        return Err(DataError::MalformedSignature {
            expected: SIGNATURE_LEN,
            found: signature.len(),
        });
    }

    let message = data.into().to_bytes()?;
    core_crypto::verify_detached(key.public_key(), &message, signature).map_err(DataError::Signing)
}
