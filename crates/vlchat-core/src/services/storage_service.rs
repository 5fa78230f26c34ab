use std::path::Path;

use anyhow::Result;
use async_trait::async_trait;

/// Object storage that can host media and hand out time-limited URLs.
///
/// Used when the completion endpoint cannot read local files directly.
#[async_trait]
pub trait ObjectStorage: Send + Sync {
    /// Upload a local file under `object_name`, returning the stored object id.
    async fn upload(&self, local_path: &Path, object_name: &str) -> Result<String>;

    /// Produce a signed download URL valid for `ttl_secs` seconds.
    async fn sign(&self, object_id: &str, ttl_secs: u64) -> Result<String>;
}
