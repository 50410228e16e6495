//! Conversions between domain encodings and storage encodings.
//!
//! Transactions carry kind-specific fields in their wire/domain form (for
//! example a public key as a hexadecimal string). Storage keeps raw bytes.
//! Every conversion here returns a typed [`EncodingError`] so callers can tell a
//! malformed payload apart from a storage failure.

use thiserror::Error;

/// A kind-specific field could not be converted to its storage form.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EncodingError {
    /// Field is not valid hexadecimal.
    #[error("field `{field}` is not valid hex: {reason}")]
    InvalidHex { field: &'static str, reason: String },
    /// Field decoded to the wrong number of bytes.
    #[error("field `{field}` must be {expected} bytes, got {actual}")]
    InvalidLength {
        field: &'static str,
        expected: usize,
        actual: usize,
    },
    /// Field decoded but does not hold a valid value (e.g. not a curve point).
    #[error("field `{field}` holds an invalid value: {reason}")]
    InvalidValue { field: &'static str, reason: String },
    /// Stored row could not be decoded back into its domain form.
    #[error("stored row in `{partition}` is malformed: {reason}")]
    MalformedRow {
        partition: &'static str,
        reason: String,
    },
}

/// Decodes a hexadecimal field into raw bytes.
pub fn hex_to_bytes(field: &'static str, value: &str) -> Result<Vec<u8>, EncodingError> {
    hex::decode(value).map_err(|e| EncodingError::InvalidHex {
        field,
        reason: e.to_string(),
    })
}

/// Decodes a hexadecimal field that must be exactly `N` bytes long.
pub fn hex_to_array<const N: usize>(
    field: &'static str,
    value: &str,
) -> Result<[u8; N], EncodingError> {
    let bytes = hex_to_bytes(field, value)?;
    let actual = bytes.len();
    bytes.try_into().map_err(|_| EncodingError::InvalidLength {
        field,
        expected: N,
        actual,
    })
}
