use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use parking_lot::Mutex;
use tracing::{debug, warn};

use super::storage_service::ObjectStorage;
use crate::settings::AppConfig;

/// How the completion API should reference a piece of media
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Image,
    Video,
}

impl MediaKind {
    fn from_mime(mime: &str) -> Option<Self> {
        if mime.starts_with("image/") {
            Some(MediaKind::Image)
        } else if mime.starts_with("video/") {
            Some(MediaKind::Video)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedMedia {
    pub url: String,
    pub kind: MediaKind,
}

const URL_SCHEMES: [&str; 3] = ["http://", "https://", "data:"];

/// Whether a file reference is already something the model can fetch.
pub fn is_url(file_ref: &str) -> bool {
    URL_SCHEMES.iter().any(|scheme| file_ref.starts_with(scheme))
}

/// Turns user file references into URLs for the completion API.
///
/// URLs pass through untouched. Local files are uploaded and signed when a
/// storage backend is configured, otherwise (or when storage fails) they are
/// inlined as base64 data URLs. Signed URLs are cached per path for the
/// lifetime of the resolver.
pub struct MediaResolver {
    storage: Option<Arc<dyn ObjectStorage>>,
    upload_prefix: String,
    ttl_secs: u64,
    cache: Mutex<HashMap<String, ResolvedMedia>>,
}

impl MediaResolver {
    pub fn new(storage: Option<Arc<dyn ObjectStorage>>, upload_prefix: &str, ttl_secs: u64) -> Self {
        Self {
            storage,
            upload_prefix: upload_prefix.trim_end_matches('/').to_string(),
            ttl_secs,
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_config(config: &AppConfig, storage: Option<Arc<dyn ObjectStorage>>) -> Self {
        Self::new(storage, &config.upload_prefix, config.signed_url_ttl_secs)
    }

    /// Inline-only resolver.
    pub fn inline() -> Self {
        Self::new(None, "", 0)
    }

    pub fn cached(&self, file_ref: &str) -> Option<ResolvedMedia> {
        self.cache.lock().get(file_ref).cloned()
    }

    /// Resolve one file reference.
    ///
    /// Returns `None` for local files that are missing or are neither image
    /// nor video; such references are skipped by the transcript.
    pub async fn resolve(&self, file_ref: &str) -> Option<ResolvedMedia> {
        if is_url(file_ref) {
            return Some(ResolvedMedia {
                url: file_ref.to_string(),
                kind: classify_url(file_ref),
            });
        }

        if let Some(hit) = self.cached(file_ref) {
            return Some(hit);
        }

        let path = Path::new(file_ref);
        let mime = mime_guess::from_path(path).first_or_octet_stream();
        let Some(kind) = MediaKind::from_mime(mime.essence_str()) else {
            debug!(path = %file_ref, mime = %mime, "Skipping non-media attachment");
            return None;
        };
        if !path.is_file() {
            warn!(path = %file_ref, "Attachment not found, skipping");
            return None;
        }

        if let Some(storage) = &self.storage {
            match self.upload_and_sign(storage.as_ref(), path).await {
                Ok(url) => {
                    let resolved = ResolvedMedia { url, kind };
                    self.cache
                        .lock()
                        .insert(file_ref.to_string(), resolved.clone());
                    return Some(resolved);
                }
                Err(e) => {
                    warn!(path = %file_ref, error = ?e, "Upload failed, falling back to inline encoding");
                }
            }
        }

        match inline_data_url(path, mime.essence_str()).await {
            Ok(url) => Some(ResolvedMedia { url, kind }),
            Err(e) => {
                warn!(path = %file_ref, error = ?e, "Failed to inline attachment, skipping");
                None
            }
        }
    }

    async fn upload_and_sign(&self, storage: &dyn ObjectStorage, path: &Path) -> anyhow::Result<String> {
        let object_name = match path.extension().and_then(|ext| ext.to_str()) {
            Some(ext) => format!("{}/{}.{}", self.upload_prefix, uuid::Uuid::new_v4(), ext),
            None => format!("{}/{}", self.upload_prefix, uuid::Uuid::new_v4()),
        };
        let object_id = storage
            .upload(path, &object_name)
            .await
            .context("upload failed")?;
        let url = storage
            .sign(&object_id, self.ttl_secs)
            .await
            .context("signing failed")?;
        debug!(path = %path.display(), object = %object_id, "Uploaded attachment");
        Ok(url)
    }
}

/// Classify a remote reference. Anything that doesn't look like video is sent as an image.
fn classify_url(url: &str) -> MediaKind {
    if let Some(rest) = url.strip_prefix("data:") {
        let mime = rest.split([';', ',']).next().unwrap_or_default();
        return MediaKind::from_mime(mime).unwrap_or(MediaKind::Image);
    }
    let path = url.split(['?', '#']).next().unwrap_or(url);
    mime_guess::from_path(path)
        .first()
        .and_then(|mime| MediaKind::from_mime(mime.essence_str()))
        .unwrap_or(MediaKind::Image)
}

async fn inline_data_url(path: &Path, mime: &str) -> anyhow::Result<String> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    Ok(format!("data:{};base64,{}", mime, BASE64_STANDARD.encode(bytes)))
}
