//! Public-key normalization.
//!
//! Sync-engine keys reach the gateway in several textual forms: with or
//! without a leading `@` alias marker, and with or without a `.suffix`
//! certificate part. Grants are stored under every form so a lookup
//! succeeds whichever one the caller presents. [`key_variants`] is the only
//! place that decides what those forms are.

use base64::{engine::general_purpose::STANDARD, Engine};

use crate::KeyError;

/// Strip a leading `@` and truncate at the first `.`.
pub fn strip_key(key: &str) -> &str {
    let key = key.strip_prefix('@').unwrap_or(key);
    match key.find('.') {
        Some(idx) => &key[..idx],
        None => key,
    }
}

/// All textual forms a single logical key may be presented in.
///
/// Returns the `@`-stripped key, its dot-truncated form, and the
/// `@`-prefixed versions of both, deduplicated in that order. The raw key
/// is always one of them, so there are at most four entries.
pub fn key_variants(key: &str) -> Vec<String> {
    let bare = key.strip_prefix('@').unwrap_or(key);
    let truncated = strip_key(key);

    let mut variants: Vec<String> = Vec::with_capacity(4);
    for candidate in [
        bare.to_string(),
        truncated.to_string(),
        format!("@{bare}"),
        format!("@{truncated}"),
    ] {
        if !candidate.is_empty() && candidate != "@" && !variants.contains(&candidate) {
            variants.push(candidate);
        }
    }
    variants
}

/// Convert a sync-engine key into the hex encoding the membership registry expects.
///
/// The key is stripped with [`strip_key`], converted from base64url to
/// standard base64 (`-` to `+`, `_` to `/`, padded to a multiple of 4),
/// decoded, and hex-encoded.
///
/// # Errors
///
/// Returns [`KeyError`] if nothing remains after stripping or the key
/// proper is not decodable.
pub fn membership_hex(key: &str) -> Result<String, KeyError> {
    let proper = strip_key(key.trim());
    if proper.is_empty() {
        return Err(KeyError::Empty);
    }

    let mut b64: String = proper
        .chars()
        .map(|c| match c {
            '-' => '+',
            '_' => '/',
            other => other,
        })
        .collect();
    while b64.len() % 4 != 0 {
        b64.push('=');
    }

    let bytes = STANDARD
        .decode(b64.as_bytes())
        .map_err(|e| KeyError::Encoding(e.to_string()))?;
    Ok(hex::encode(bytes))
}
