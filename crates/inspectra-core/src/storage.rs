// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Object storage for signature images.
//!
//! Objects are addressed by a stable key. Keys are never handed to clients
//! directly; reads go through short-lived URLs signed with HMAC-SHA256 over
//! `"<key>\n<expires>"`, which the HTTP layer verifies before serving bytes.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::Serialize;
use sha2::Sha256;
use tracing::debug;

use crate::error::CoreError;

type HmacSha256 = Hmac<Sha256>;

/// Shortest lifetime of a retrieval URL.
pub const MIN_URL_TTL: Duration = Duration::from_secs(5 * 60);
/// Longest lifetime of a retrieval URL.
pub const MAX_URL_TTL: Duration = Duration::from_secs(60 * 60);

/// Clamp a requested URL lifetime into the allowed window.
pub fn clamp_ttl(ttl: Duration) -> Duration {
    ttl.clamp(MIN_URL_TTL, MAX_URL_TTL)
}

/// A short-lived retrieval URL.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SignedUrl {
    /// Absolute URL including `expires` and `signature` query parameters.
    pub url: String,
    /// When the URL stops being accepted.
    pub expires_at: DateTime<Utc>,
}

/// Byte storage keyed by path-like strings.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Store `bytes` under `key`, replacing anything already there.
    async fn put(&self, key: &str, bytes: &[u8]) -> Result<(), CoreError>;

    /// Read an object; `None` when absent.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CoreError>;

    /// Remove an object. Missing objects are not an error.
    async fn delete(&self, key: &str) -> Result<(), CoreError>;

    /// Mint a retrieval URL valid for `ttl` (clamped to 5 minutes .. 1 hour).
    fn signed_url(&self, key: &str, ttl: Duration) -> Result<SignedUrl, CoreError>;

    /// Check the `expires` / `signature` pair of a retrieval URL.
    fn verify_signed_url(&self, key: &str, expires: i64, signature: &str) -> bool;
}

/// Replace anything outside `[A-Za-z0-9._-]` so the value is usable as a key segment.
pub fn key_segment(raw: &str) -> String {
    let cleaned: String = raw
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() || cleaned.chars().all(|c| c == '.') {
        "_".to_string()
    } else {
        cleaned
    }
}

/// Reject keys that could escape the store root or are not URL-safe.
pub fn validate_key(key: &str) -> Result<(), CoreError> {
    let invalid = |message: &str| CoreError::validation("key", message);

    if key.is_empty() {
        return Err(invalid("must not be empty"));
    }
    if key.starts_with('/') || key.ends_with('/') {
        return Err(invalid("must not start or end with '/'"));
    }
    for segment in key.split('/') {
        if segment.is_empty() || segment == "." || segment == ".." {
            return Err(invalid("contains an empty or relative segment"));
        }
        if !segment
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
        {
            return Err(invalid("contains characters outside [A-Za-z0-9._-/]"));
        }
    }
    Ok(())
}

/// HMAC signer for retrieval URLs.
#[derive(Clone)]
pub struct UrlSigner {
    base_url: String,
    secret: Vec<u8>,
}

impl UrlSigner {
    /// `base_url` is the public origin serving `/objects/{key}`.
    pub fn new(base_url: impl Into<String>, secret: impl AsRef<[u8]>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            secret: secret.as_ref().to_vec(),
        }
    }

    fn mac(&self, key: &str, expires: i64) -> HmacSha256 {
        let mut mac = match HmacSha256::new_from_slice(&self.secret) {
            Ok(mac) => mac,
            Err(_) => unreachable!("HMAC accepts keys of any length"),
        };
        mac.update(key.as_bytes());
        mac.update(b"\n");
        mac.update(expires.to_string().as_bytes());
        mac
    }

    /// Signed URL for `key` valid for the clamped `ttl` from `now`.
    pub fn sign(&self, key: &str, ttl: Duration, now: DateTime<Utc>) -> Result<SignedUrl, CoreError> {
        validate_key(key)?;
        let ttl = chrono::Duration::from_std(clamp_ttl(ttl)).map_err(|e| {
            CoreError::InternalError {
                details: format!("invalid ttl: {}", e),
            }
        })?;
        let expires_at = now + ttl;
        let expires = expires_at.timestamp();
        let signature = hex::encode(self.mac(key, expires).finalize().into_bytes());

        Ok(SignedUrl {
            url: format!(
                "{}/objects/{}?expires={}&signature={}",
                self.base_url, key, expires, signature
            ),
            expires_at,
        })
    }

    /// Constant-time check of a signature that has not expired at `now`.
    pub fn verify(&self, key: &str, expires: i64, signature: &str, now: DateTime<Utc>) -> bool {
        if expires < now.timestamp() {
            return false;
        }
        let Ok(provided) = hex::decode(signature) else {
            return false;
        };
        self.mac(key, expires).verify_slice(&provided).is_ok()
    }
}

/// Filesystem-backed store rooted at a directory.
pub struct FsObjectStore {
    root: PathBuf,
    signer: UrlSigner,
}

impl FsObjectStore {
    /// Create a store rooted at `root` (created lazily on first write).
    pub fn new(root: impl Into<PathBuf>, signer: UrlSigner) -> Self {
        Self {
            root: root.into(),
            signer,
        }
    }

    /// Root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, CoreError> {
        validate_key(key)?;
        Ok(self.root.join(key))
    }
}

fn storage_error(key: &str, e: impl std::fmt::Display) -> CoreError {
    CoreError::StorageError {
        key: key.to_string(),
        details: e.to_string(),
    }
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    async fn put(&self, key: &str, bytes: &[u8]) -> Result<(), CoreError> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| storage_error(key, e))?;
        }
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|e| storage_error(key, e))?;
        debug!(key = %key, size = bytes.len(), "Stored object");
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CoreError> {
        let path = self.path_for(key)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(storage_error(key, e)),
        }
    }

    async fn delete(&self, key: &str) -> Result<(), CoreError> {
        let path = self.path_for(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(storage_error(key, e)),
        }
    }

    fn signed_url(&self, key: &str, ttl: Duration) -> Result<SignedUrl, CoreError> {
        self.signer.sign(key, ttl, Utc::now())
    }

    fn verify_signed_url(&self, key: &str, expires: i64, signature: &str) -> bool {
        self.signer.verify(key, expires, signature, Utc::now())
    }
}

/// In-memory store, for tests and single-process demos.
pub struct MemoryObjectStore {
    objects: RwLock<HashMap<String, Vec<u8>>>,
    signer: UrlSigner,
}

impl MemoryObjectStore {
    /// Empty store signing URLs with `signer`.
    pub fn new(signer: UrlSigner) -> Self {
        Self {
            objects: RwLock::new(HashMap::new()),
            signer,
        }
    }

    /// Number of stored objects.
    pub fn len(&self) -> usize {
        self.objects.read().map(|m| m.len()).unwrap_or(0)
    }

    /// Whether the store holds no objects.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn poisoned(key: &str) -> CoreError {
        storage_error(key, "object map lock poisoned")
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn put(&self, key: &str, bytes: &[u8]) -> Result<(), CoreError> {
        validate_key(key)?;
        self.objects
            .write()
            .map_err(|_| Self::poisoned(key))?
            .insert(key.to_string(), bytes.to_vec());
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CoreError> {
        validate_key(key)?;
        Ok(self
            .objects
            .read()
            .map_err(|_| Self::poisoned(key))?
            .get(key)
            .cloned())
    }

    async fn delete(&self, key: &str) -> Result<(), CoreError> {
        validate_key(key)?;
        self.objects
            .write()
            .map_err(|_| Self::poisoned(key))?
            .remove(key);
        Ok(())
    }

    fn signed_url(&self, key: &str, ttl: Duration) -> Result<SignedUrl, CoreError> {
        self.signer.sign(key, ttl, Utc::now())
    }

    fn verify_signed_url(&self, key: &str, expires: i64, signature: &str) -> bool {
        self.signer.verify(key, expires, signature, Utc::now())
    }
}
