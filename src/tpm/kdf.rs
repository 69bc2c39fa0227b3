//! Key derivation functions from TPM 2.0 Part 1, section 11.4.10.
//!
//! `KDFa` is the SP800-108 counter-mode KDF with HMAC, `KDFe` is the
//! SP800-56A concatenation KDF. Both are fixed to SHA-256 here, which is the
//! name algorithm of every object the engine wraps.

use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use crate::error::{KeyFileError, KeyFileResult};
use crate::tpm::structures::EccCurve;

type HmacSha256 = Hmac<Sha256>;

const SHA256_LEN: usize = 32;

/// `KDFa(SHA-256, key, label, contextU, contextV, bits)`
pub fn kdfa(
    key: &[u8],
    label: &str,
    context_u: &[u8],
    context_v: &[u8],
    bits: u32,
) -> KeyFileResult<Zeroizing<Vec<u8>>> {
    let len = output_len(bits)?;
    let mut out = Zeroizing::new(Vec::with_capacity(len + SHA256_LEN));
    let mut counter: u32 = 0;
    while out.len() < len {
        counter += 1;
        let mut mac = HmacSha256::new_from_slice(key)
            .map_err(|e| KeyFileError::crypto_failure("KDFa", &e.to_string()))?;
        mac.update(&counter.to_be_bytes());
        mac.update(label.as_bytes());
        mac.update(&[0]);
        mac.update(context_u);
        mac.update(context_v);
        mac.update(&bits.to_be_bytes());
        out.extend_from_slice(&mac.finalize().into_bytes());
    }
    out.truncate(len);
    Ok(out)
}

/// `KDFe(SHA-256, Z, label, partyUInfo, partyVInfo, bits)`
pub fn kdfe(
    z: &[u8],
    label: &str,
    party_u: &[u8],
    party_v: &[u8],
    bits: u32,
) -> KeyFileResult<Zeroizing<Vec<u8>>> {
    let len = output_len(bits)?;
    let mut out = Zeroizing::new(Vec::with_capacity(len + SHA256_LEN));
    let mut counter: u32 = 0;
    while out.len() < len {
        counter += 1;
        let mut hasher = Sha256::new();
        hasher.update(counter.to_be_bytes());
        hasher.update(z);
        hasher.update(label.as_bytes());
        hasher.update([0]);
        hasher.update(party_u);
        hasher.update(party_v);
        out.extend_from_slice(&hasher.finalize());
    }
    out.truncate(len);
    Ok(out)
}

fn output_len(bits: u32) -> KeyFileResult<usize> {
    if bits == 0 || bits % 8 != 0 {
        return Err(KeyFileError::invalid_parameter(
            "bits",
            "a non-zero multiple of 8",
            &bits.to_string(),
        ));
    }
    Ok((bits / 8) as usize)
}

/// Left-pad a big-endian field element to the curve's field length.
///
/// Leading zero bytes beyond the field length are dropped; a value that is
/// still too long is rejected.
pub fn pad_to_curve_size(curve: EccCurve, bytes: &[u8]) -> KeyFileResult<Vec<u8>> {
    let size = curve.field_len();
    let first = bytes.iter().position(|&b| b != 0).unwrap_or(bytes.len());
    let significant = &bytes[first.min(bytes.len().saturating_sub(size))..];
    if significant.len() > size {
        return Err(KeyFileError::invalid_parameter(
            "curve coordinate",
            &format!("at most {} bytes for {}", size, curve.name()),
            &format!("{} bytes", bytes.len()),
        ));
    }
    let mut out = vec![0u8; size - significant.len()];
    out.extend_from_slice(significant);
    Ok(out)
}
