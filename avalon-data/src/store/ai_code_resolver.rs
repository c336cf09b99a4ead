use std::path::PathBuf;

use anyhow::Result;
use async_trait::async_trait;
use uuid::Uuid;

/// Resolves an `AiCode` id to the filesystem path of its bot source, per `spec.md` §6.
///
/// The core treats the returned path as opaque; it neither validates the file's contents nor
/// persists anything about it. On-disk storage of uploaded bot source is out of scope for this
/// crate (`spec.md` §1) and lives entirely behind this trait.
#[async_trait]
pub trait AiCodeResolver: Send + Sync {
    /// Resolves the absolute filesystem path for the given `ai_code_id`, or `None` if unknown.
    async fn path_for(&self, ai_code_id: Uuid) -> Result<Option<PathBuf>>;
}
