// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Signature capture with per-signer uniqueness.
//!
//! An actor signs a given instance at most once. The pre-check catches the
//! common case; the unique constraint on `(instance_id, signed_by)` catches a
//! concurrent second submission, whose already-uploaded image is then removed.

use std::time::Duration;

use serde::Serialize;
use serde_json::{Value, json};
use sqlx::types::Json;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::error::CoreError;
use crate::events;
use crate::lifecycle::get_instance;
use crate::persistence::SignatureRecord;
use crate::state::EngineState;
use crate::storage::{SignedUrl, key_segment};
use crate::types::{self, Actor, Capability, EventType};

/// Largest accepted signature image.
pub const MAX_IMAGE_BYTES: usize = 2 * 1024 * 1024;

/// Default lifetime of URLs returned by [`list_signatures`].
pub const DEFAULT_URL_TTL: Duration = Duration::from_secs(15 * 60);

/// Uploaded signature image.
#[derive(Debug, Clone)]
pub struct SignatureImage {
    /// Raw image bytes.
    pub bytes: Vec<u8>,
    /// Declared MIME type, if the client sent one.
    pub content_type: Option<String>,
}

impl SignatureImage {
    /// Image with no declared content type.
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            bytes: bytes.into(),
            content_type: None,
        }
    }

    /// Set the declared content type.
    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    /// File extension for the image, from its declared type or its magic bytes.
    /// Only raster formats are accepted.
    fn extension(&self) -> Result<&'static str, CoreError> {
        let declared = self
            .content_type
            .as_deref()
            .map(|ct| ct.split(';').next().unwrap_or(ct).trim().to_ascii_lowercase());

        match declared.as_deref() {
            Some("image/png") => Ok("png"),
            Some("image/jpeg") | Some("image/jpg") => Ok("jpg"),
            Some("image/webp") => Ok("webp"),
            None | Some("application/octet-stream") => sniff(&self.bytes).ok_or_else(|| {
                CoreError::validation("signature", "unrecognized image format")
            }),
            Some(other) => Err(CoreError::validation(
                "signature",
                format!("unsupported content type '{}'", other),
            )),
        }
    }
}

fn sniff(bytes: &[u8]) -> Option<&'static str> {
    if bytes.starts_with(b"\x89PNG\r\n\x1a\n") {
        Some("png")
    } else if bytes.starts_with(&[0xff, 0xd8, 0xff]) {
        Some("jpg")
    } else if bytes.len() >= 12 && &bytes[..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
        Some("webp")
    } else {
        None
    }
}

/// Signature metadata plus a short-lived URL to its image.
#[derive(Debug, Clone, Serialize)]
pub struct SignatureView {
    /// Stored signature.
    #[serde(flatten)]
    pub signature: SignatureRecord,
    /// Retrieval URL for the image.
    pub image: SignedUrl,
}

/// Record `actor`'s signature on an instance.
///
/// Does not append the `signed` event; call [`record_signed`] afterwards.
#[instrument(skip(state, actor, image, points, device), fields(actor_id = %actor.id, bytes = image.bytes.len()))]
pub async fn sign(
    state: &EngineState,
    instance_id: &str,
    actor: &Actor,
    image: SignatureImage,
    points: Option<Value>,
    device: Option<Value>,
) -> Result<SignatureRecord, CoreError> {
    actor.require(Capability::Perform)?;
    let instance = get_instance(state, instance_id).await?;
    actor.require_location(&instance.location_id)?;

    if image.bytes.is_empty() {
        return Err(CoreError::validation("signature", "image must not be empty"));
    }
    if image.bytes.len() > MAX_IMAGE_BYTES {
        return Err(CoreError::validation(
            "signature",
            format!("image exceeds {} bytes", MAX_IMAGE_BYTES),
        ));
    }
    let extension = image.extension()?;

    if state
        .persistence
        .find_signature(instance_id, &actor.id)
        .await?
        .is_some()
    {
        return Err(already_signed(instance_id, actor));
    }

    let signed_at = types::now();
    let storage_key = format!(
        "signatures/{}/{}-{}.{}",
        key_segment(instance_id),
        key_segment(&actor.id),
        signed_at.timestamp_millis(),
        extension
    );
    state.objects.put(&storage_key, &image.bytes).await?;

    let signature = SignatureRecord {
        id: Uuid::new_v4().to_string(),
        instance_id: instance_id.to_string(),
        signed_by: actor.id.clone(),
        signed_at,
        storage_key,
        points: Json(points.unwrap_or(Value::Null)),
        device: Json(device.unwrap_or(Value::Null)),
    };

    if let Err(e) = state.persistence.insert_signature(&signature).await {
        remove_orphan(state, &signature).await;
        return Err(e);
    }

    info!(instance_id = %instance_id, signature_id = %signature.id, "Signature recorded");
    Ok(signature)
}

/// Delete the image of a signature whose row was not stored.
///
/// Two submissions in the same millisecond share a key; the image is kept
/// when the stored row points at it.
async fn remove_orphan(state: &EngineState, signature: &SignatureRecord) {
    let key = &signature.storage_key;
    match state
        .persistence
        .find_signature(&signature.instance_id, &signature.signed_by)
        .await
    {
        Ok(Some(stored)) if &stored.storage_key == key => return,
        Ok(_) => {}
        Err(e) => {
            warn!(key = %key, error = %e, "Could not check signature before cleanup; keeping image");
            return;
        }
    }
    if let Err(e) = state.objects.delete(key).await {
        warn!(key = %key, error = %e, "Failed to remove orphaned signature image");
    }
}

fn already_signed(instance_id: &str, actor: &Actor) -> CoreError {
    CoreError::AlreadySigned {
        instance_id: instance_id.to_string(),
        actor_id: actor.id.clone(),
    }
}

/// Append the `signed` event and emit `instance.signed` in the background.
pub fn record_signed(state: &EngineState, signature: &SignatureRecord) {
    state.notifier.spawn(events::append_logged(
        state.persistence.clone(),
        signature.instance_id.clone(),
        EventType::Signed,
        Some(signature.signed_by.clone()),
        Some(json!({ "signature_id": signature.id })),
        signature.signed_at,
    ));
    state.notifier.webhook("instance.signed", json!({ "signature": signature }));
}

/// Mint a retrieval URL for one signature's image.
pub async fn signature_url(
    state: &EngineState,
    signature_id: &str,
    ttl: Duration,
) -> Result<SignedUrl, CoreError> {
    let signature = state
        .persistence
        .get_signature(signature_id)
        .await?
        .ok_or_else(|| CoreError::not_found("signature", signature_id))?;
    state.objects.signed_url(&signature.storage_key, ttl)
}

/// Signatures on an instance, each with a fresh retrieval URL.
pub async fn list_signatures(
    state: &EngineState,
    instance_id: &str,
    ttl: Duration,
) -> Result<Vec<SignatureView>, CoreError> {
    get_instance(state, instance_id).await?;
    state
        .persistence
        .list_signatures(instance_id)
        .await?
        .into_iter()
        .map(|signature| {
            let image = state.objects.signed_url(&signature.storage_key, ttl)?;
            Ok(SignatureView { signature, image })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::Persistence;
    use crate::storage::{MAX_URL_TTL, MIN_URL_TTL, ObjectStore};
    use crate::testing::{Fixture, actor};
    use crate::types::{Frequency, InstanceStatus, Role};

    const PNG: &[u8] = b"\x89PNG\r\n\x1a\nrest-of-image";

    async fn fixture() -> Fixture {
        let fx = Fixture::new().await;
        fx.template("t-1", Frequency::Weekly).await;
        fx.instance("i-1", "t-1", InstanceStatus::InProgress).await;
        fx
    }

    #[tokio::test]
    async fn test_sign_stores_image_and_row() {
        let fx = fixture().await;
        let inspector = actor("p-1", Role::Inspector);

        let signature = sign(
            &fx.state,
            "i-1",
            &inspector,
            SignatureImage::new(PNG).with_content_type("image/png"),
            Some(json!([[0, 0], [1, 1]])),
            None,
        )
        .await
        .unwrap();

        assert!(signature.storage_key.starts_with("signatures/i-1/p-1-"));
        assert!(signature.storage_key.ends_with(".png"));
        assert_eq!(signature.device.0, Value::Null);
        assert_eq!(
            fx.objects.get(&signature.storage_key).await.unwrap().as_deref(),
            Some(PNG)
        );

        let serialized = serde_json::to_value(&signature).unwrap();
        assert!(serialized.get("storage_key").is_none());
    }

    #[tokio::test]
    async fn test_double_signing_is_rejected() {
        let fx = fixture().await;
        let inspector = actor("p-1", Role::Inspector);

        sign(&fx.state, "i-1", &inspector, SignatureImage::new(PNG), None, None)
            .await
            .unwrap();
        let err = sign(&fx.state, "i-1", &inspector, SignatureImage::new(PNG), None, None)
            .await
            .unwrap_err();

        assert_eq!(err.error_code(), "ALREADY_SIGNED");
        assert_eq!(fx.persistence.list_signatures("i-1").await.unwrap().len(), 1);
        assert_eq!(fx.objects.len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_signing_leaves_one_row_and_one_image() {
        let fx = fixture().await;
        let inspector = actor("p-1", Role::Inspector);

        let (a, b) = tokio::join!(
            sign(&fx.state, "i-1", &inspector, SignatureImage::new(PNG), None, None),
            sign(&fx.state, "i-1", &inspector, SignatureImage::new(PNG), None, None),
        );
        let results = [a, b];
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        let err = results.into_iter().find_map(Result::err).unwrap();
        assert_eq!(err.error_code(), "ALREADY_SIGNED");
        assert_eq!(fx.persistence.list_signatures("i-1").await.unwrap().len(), 1);
        assert_eq!(fx.objects.len(), 1);
    }

    #[tokio::test]
    async fn test_other_signers_are_independent() {
        let fx = fixture().await;
        for id in ["p-1", "p-2"] {
            sign(&fx.state, "i-1", &actor(id, Role::Inspector), SignatureImage::new(PNG), None, None)
                .await
                .unwrap();
        }
        assert_eq!(fx.persistence.list_signatures("i-1").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_sign_validation() {
        let fx = fixture().await;
        let inspector = actor("p-1", Role::Inspector);

        let err = sign(&fx.state, "missing", &inspector, SignatureImage::new(PNG), None, None)
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "NOT_FOUND");

        let err = sign(&fx.state, "i-1", &inspector, SignatureImage::new(Vec::new()), None, None)
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "VALIDATION_ERROR");

        let err = sign(
            &fx.state,
            "i-1",
            &inspector,
            SignatureImage::new(PNG).with_content_type("application/pdf"),
            None,
            None,
        )
        .await
        .unwrap_err();
        assert_eq!(err.error_code(), "VALIDATION_ERROR");

        let err = sign(&fx.state, "i-1", &inspector, SignatureImage::new(b"plain text".to_vec()), None, None)
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "VALIDATION_ERROR");
        assert!(fx.objects.is_empty());
    }

    #[test]
    fn test_extension() {
        let jpeg = SignatureImage::new(vec![0xff, 0xd8, 0xff, 0xe0]);
        assert_eq!(jpeg.extension().unwrap(), "jpg");
        let png = SignatureImage::new(PNG).with_content_type("image/PNG; charset=binary");
        assert_eq!(png.extension().unwrap(), "png");
    }

    #[test]
    fn test_svg_is_rejected() {
        let declared = SignatureImage::new(b"<svg onload=\"x()\"></svg>".to_vec())
            .with_content_type("image/svg+xml");
        assert_eq!(declared.extension().unwrap_err().error_code(), "VALIDATION_ERROR");
        let sniffed = SignatureImage::new(b"<?xml version=\"1.0\"?><svg/>".to_vec());
        assert_eq!(sniffed.extension().unwrap_err().error_code(), "VALIDATION_ERROR");
    }

    #[tokio::test]
    async fn test_viewer_cannot_sign() {
        let fx = fixture().await;
        let err = sign(&fx.state, "i-1", &actor("p-view", Role::Viewer), SignatureImage::new(PNG), None, None)
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "FORBIDDEN");
        assert!(fx.persistence.list_signatures("i-1").await.unwrap().is_empty());
        assert!(fx.objects.is_empty());
    }

    #[tokio::test]
    async fn test_sign_requires_same_location() {
        let fx = fixture().await;
        let mut outsider = actor("p-2", Role::Inspector);
        outsider.location_id = Some("loc-2".to_string());

        let err = sign(&fx.state, "i-1", &outsider, SignatureImage::new(PNG), None, None)
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "FORBIDDEN");
        assert!(fx.objects.is_empty());
    }

    #[tokio::test]
    async fn test_signature_urls_are_clamped_and_verifiable() {
        let fx = fixture().await;
        let signature = sign(
            &fx.state,
            "i-1",
            &actor("p-1", Role::Inspector),
            SignatureImage::new(PNG),
            None,
            None,
        )
        .await
        .unwrap();

        let before = chrono::Utc::now();
        let short = signature_url(&fx.state, &signature.id, Duration::from_secs(1))
            .await
            .unwrap();
        let min = chrono::Duration::from_std(MIN_URL_TTL).unwrap();
        assert!(short.expires_at >= before + min - chrono::Duration::seconds(1));

        let views = list_signatures(&fx.state, "i-1", Duration::from_secs(24 * 3600))
            .await
            .unwrap();
        assert_eq!(views.len(), 1);
        let max = chrono::Duration::from_std(MAX_URL_TTL).unwrap();
        assert!(views[0].image.expires_at <= chrono::Utc::now() + max);
        assert!(views[0].image.url.contains("signature="));

        let err = signature_url(&fx.state, "missing", DEFAULT_URL_TTL)
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "NOT_FOUND");
    }

    #[tokio::test]
    async fn test_record_signed_appends_event() {
        let fx = fixture().await;
        let signature = sign(
            &fx.state,
            "i-1",
            &actor("p-1", Role::Inspector),
            SignatureImage::new(PNG),
            None,
            None,
        )
        .await
        .unwrap();

        record_signed(&fx.state, &signature);
        fx.state.notifier.flush().await;

        let events = events::list(&fx.state, "i-1").await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, EventType::Signed);
        assert_eq!(events[0].payload.0["signature_id"], signature.id.as_str());
    }
}
