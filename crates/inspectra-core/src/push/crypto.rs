// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Web Push message encryption (RFC 8291, `aes128gcm` content coding of RFC 8188).
//!
//! ```text
//! ecdh      = ECDH(as_private, ua_public)
//! PRK_key   = HMAC-SHA256(auth_secret, ecdh)
//! IKM       = HKDF-Expand(PRK_key, "WebPush: info\0" || ua_public || as_public, 32)
//! PRK       = HMAC-SHA256(salt, IKM)
//! CEK       = HKDF-Expand(PRK, "Content-Encoding: aes128gcm\0", 16)
//! NONCE     = HKDF-Expand(PRK, "Content-Encoding: nonce\0", 12)
//! body      = salt(16) || rs(4, BE) || idlen(1) || as_public(65) || AES-128-GCM(plaintext || 0x02)
//! ```
//!
//! Messages are always a single record.

use aes_gcm::aead::Aead;
use aes_gcm::{Aes128Gcm, KeyInit, Nonce};
use hmac::{Hmac, Mac};
use p256::elliptic_curve::sec1::ToEncodedPoint;
use p256::{PublicKey, SecretKey};
use rand::RngCore;
use rand::rngs::OsRng;
use sha2::Sha256;

use super::PushError;

type HmacSha256 = Hmac<Sha256>;

/// Record size advertised in the header.
pub const RECORD_SIZE: u32 = 4096;

/// Length of an uncompressed P-256 point.
pub const PUBLIC_KEY_LEN: usize = 65;

/// Length of the client auth secret.
pub const AUTH_SECRET_LEN: usize = 16;

const SALT_LEN: usize = 16;
const TAG_LEN: usize = 16;
const HEADER_LEN: usize = SALT_LEN + 4 + 1 + PUBLIC_KEY_LEN;

/// Largest plaintext that fits in one record (tag and delimiter excluded).
pub const MAX_PLAINTEXT_LEN: usize = RECORD_SIZE as usize - TAG_LEN - 1;

fn hmac(key: &[u8], parts: &[&[u8]]) -> [u8; 32] {
    let mut mac = match <HmacSha256 as Mac>::new_from_slice(key) {
        Ok(mac) => mac,
        Err(_) => unreachable!("HMAC accepts keys of any length"),
    };
    for part in parts {
        mac.update(part);
    }
    mac.finalize().into_bytes().into()
}

/// Single-block HKDF-Expand; every length used here is at most 32 bytes.
fn hkdf_expand<const N: usize>(prk: &[u8], info: &[u8]) -> [u8; N] {
    let block = hmac(prk, &[info, &[0x01]]);
    let mut out = [0u8; N];
    out.copy_from_slice(&block[..N]);
    out
}

/// Parse a client public key (uncompressed SEC1 point).
pub fn parse_public_key(bytes: &[u8]) -> Result<PublicKey, PushError> {
    if bytes.len() != PUBLIC_KEY_LEN {
        return Err(PushError::InvalidKey(format!(
            "p256dh must be {} bytes, got {}",
            PUBLIC_KEY_LEN,
            bytes.len()
        )));
    }
    PublicKey::from_sec1_bytes(bytes)
        .map_err(|_| PushError::InvalidKey("p256dh is not a valid P-256 point".to_string()))
}

/// Encrypt `plaintext` for a subscriber with a fresh ephemeral key and salt.
pub fn encrypt(plaintext: &[u8], ua_public: &[u8], auth_secret: &[u8]) -> Result<Vec<u8>, PushError> {
    let as_secret = SecretKey::random(&mut OsRng);
    let mut salt = [0u8; SALT_LEN];
    OsRng.fill_bytes(&mut salt);
    encrypt_with(plaintext, ua_public, auth_secret, &as_secret, salt)
}

pub(crate) fn encrypt_with(
    plaintext: &[u8],
    ua_public: &[u8],
    auth_secret: &[u8],
    as_secret: &SecretKey,
    salt: [u8; SALT_LEN],
) -> Result<Vec<u8>, PushError> {
    if plaintext.len() > MAX_PLAINTEXT_LEN {
        return Err(PushError::PayloadTooLarge(plaintext.len()));
    }
    if auth_secret.len() != AUTH_SECRET_LEN {
        return Err(PushError::InvalidKey(format!(
            "auth must be {} bytes, got {}",
            AUTH_SECRET_LEN,
            auth_secret.len()
        )));
    }

    let ua_key = parse_public_key(ua_public)?;
    let as_public = as_secret.public_key().to_encoded_point(false);
    let as_public = as_public.as_bytes();

    let shared = p256::ecdh::diffie_hellman(as_secret.to_nonzero_scalar(), ua_key.as_affine());

    let (cek, nonce) = derive_keys(
        shared.raw_secret_bytes().as_slice(),
        auth_secret,
        ua_public,
        as_public,
        &salt,
    );

    let mut record = Vec::with_capacity(plaintext.len() + 1);
    record.extend_from_slice(plaintext);
    record.push(0x02);

    let cipher = Aes128Gcm::new_from_slice(&cek)
        .map_err(|e| PushError::Encryption(e.to_string()))?;
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce), record.as_slice())
        .map_err(|e| PushError::Encryption(e.to_string()))?;

    let mut body = Vec::with_capacity(HEADER_LEN + ciphertext.len());
    body.extend_from_slice(&salt);
    body.extend_from_slice(&RECORD_SIZE.to_be_bytes());
    body.push(PUBLIC_KEY_LEN as u8);
    body.extend_from_slice(as_public);
    body.extend_from_slice(&ciphertext);
    Ok(body)
}

fn derive_keys(
    ecdh_secret: &[u8],
    auth_secret: &[u8],
    ua_public: &[u8],
    as_public: &[u8],
    salt: &[u8],
) -> ([u8; 16], [u8; 12]) {
    let prk_key = hmac(auth_secret, &[ecdh_secret]);
    let ikm: [u8; 32] = hkdf_expand(&prk_key, &[&b"WebPush: info\0"[..], ua_public, as_public].concat());
    let prk = hmac(salt, &[&ikm]);
    let cek = hkdf_expand(&prk, b"Content-Encoding: aes128gcm\0");
    let nonce = hkdf_expand(&prk, b"Content-Encoding: nonce\0");
    (cek, nonce)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Receiver side, used to check what the sender produced.
    fn decrypt(body: &[u8], ua_secret: &SecretKey, auth_secret: &[u8]) -> Vec<u8> {
        let salt = &body[..SALT_LEN];
        let rs = u32::from_be_bytes(body[SALT_LEN..SALT_LEN + 4].try_into().unwrap());
        assert_eq!(rs, RECORD_SIZE);
        assert_eq!(body[SALT_LEN + 4] as usize, PUBLIC_KEY_LEN);
        let as_public = &body[SALT_LEN + 5..HEADER_LEN];

        let as_key = PublicKey::from_sec1_bytes(as_public).unwrap();
        let shared = p256::ecdh::diffie_hellman(ua_secret.to_nonzero_scalar(), as_key.as_affine());
        let ua_public = ua_secret.public_key().to_encoded_point(false);

        let (cek, nonce) = derive_keys(
            shared.raw_secret_bytes().as_slice(),
            auth_secret,
            ua_public.as_bytes(),
            as_public,
            salt,
        );
        let cipher = Aes128Gcm::new_from_slice(&cek).unwrap();
        let mut record = cipher
            .decrypt(Nonce::from_slice(&nonce), &body[HEADER_LEN..])
            .unwrap();
        assert_eq!(record.pop(), Some(0x02), "last record delimiter");
        record
    }

    fn subscriber() -> (SecretKey, Vec<u8>, [u8; 16]) {
        let secret = SecretKey::random(&mut OsRng);
        let public = secret.public_key().to_encoded_point(false).as_bytes().to_vec();
        let mut auth = [0u8; 16];
        OsRng.fill_bytes(&mut auth);
        (secret, public, auth)
    }

    #[test]
    fn test_hkdf_expand_matches_rfc5869_case1() {
        let ikm = [0x0bu8; 22];
        let salt: Vec<u8> = (0x00u8..=0x0c).collect();
        let info: Vec<u8> = (0xf0u8..=0xf9).collect();

        let prk = hmac(&salt, &[&ikm]);
        assert_eq!(
            hex::encode(prk),
            "077709362c2e32df0ddc3f0dc47bba6390b6c73bb50f9c3122ec844ad7c2b3e5"
        );
        let okm: [u8; 32] = hkdf_expand(&prk, &info);
        assert_eq!(
            hex::encode(okm),
            "3cb25f25faacd57a90434f64d0362f2a2d2d0a90cf1a5a4c5db02d56ecc4c5bf"
        );
    }

    #[test]
    fn test_subscriber_can_decrypt() {
        let (ua_secret, ua_public, auth) = subscriber();
        let plaintext = br#"{"title":"Inspection failed"}"#;

        let body = encrypt(plaintext, &ua_public, &auth).unwrap();
        assert_eq!(body.len(), HEADER_LEN + plaintext.len() + 1 + TAG_LEN);
        assert_eq!(decrypt(&body, &ua_secret, &auth), plaintext);
    }

    #[test]
    fn test_fresh_salt_and_key_per_message() {
        let (_, ua_public, auth) = subscriber();
        let a = encrypt(b"same", &ua_public, &auth).unwrap();
        let b = encrypt(b"same", &ua_public, &auth).unwrap();
        assert_ne!(a[..HEADER_LEN], b[..HEADER_LEN]);
    }

    #[test]
    fn test_rejects_bad_inputs() {
        let (_, ua_public, auth) = subscriber();

        assert!(matches!(
            encrypt(b"x", &ua_public[..33], &auth),
            Err(PushError::InvalidKey(_))
        ));
        assert!(matches!(
            encrypt(b"x", &ua_public, &auth[..8]),
            Err(PushError::InvalidKey(_))
        ));
        let oversized = vec![0u8; MAX_PLAINTEXT_LEN + 1];
        assert!(matches!(
            encrypt(&oversized, &ua_public, &auth),
            Err(PushError::PayloadTooLarge(_))
        ));
        assert!(encrypt(&oversized[1..], &ua_public, &auth).is_ok());
    }
}
