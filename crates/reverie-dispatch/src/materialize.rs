//! Materialization pipeline: turn a completion payload into a persisted
//! artifact, stamped for future deduplication.

use std::path::PathBuf;
use std::sync::Arc;

use tempfile::TempDir;
use tokio::fs;
use tracing::{debug, info};

use reverie_client::PlaylistApi;
use reverie_core::{CompletionPayload, Error, Fingerprint, Result};

/// Where finished artifacts land.
#[derive(Debug, Clone)]
pub enum Destination {
    /// Upload into a playlist, stamping the fingerprint into clip metadata.
    Playlist(String),
    /// Persist into a local directory (no ledger write possible).
    Folder(PathBuf),
}

/// Originating context carried alongside a handle so the artifact can be
/// named and cross-linked after completion.
#[derive(Debug, Clone)]
pub struct JobContext {
    /// Iteration index within the batch, for logs and default naming.
    pub index: usize,
    pub fingerprint: Fingerprint,
    /// Deterministic display name derived from the iteration axes.
    pub display_name: String,
    /// Source keyframe to upload and cross-link (image-to-video batches).
    pub keyframe: Option<PathBuf>,
    /// Artifact file extension for this batch's algorithm.
    pub extension: &'static str,
}

/// Downloads completed artifacts into scoped temporary storage and persists
/// them to the configured destination.
pub struct Materializer {
    api: Arc<dyn PlaylistApi>,
    destination: Destination,
    work_dir: TempDir,
}

impl Materializer {
    /// Create a materializer with a fresh scoped temp directory. The
    /// directory is released when the materializer is dropped, whether or
    /// not individual jobs succeeded.
    pub fn new(api: Arc<dyn PlaylistApi>, destination: Destination) -> Result<Self> {
        let work_dir = TempDir::with_prefix("reverie_batch_")?;
        Ok(Self {
            api,
            destination,
            work_dir,
        })
    }

    /// Materialize one completed job.
    ///
    /// Any failure returns `Error::Materialization`; the orchestrator
    /// re-queues the handle for another attempt on the next poll cycle. The
    /// downloaded temp file is removed unconditionally.
    pub async fn materialize(
        &self,
        payload: &CompletionPayload,
        handle: &str,
        ctx: &JobContext,
    ) -> Result<()> {
        let url = payload
            .artifact_url()
            .ok_or_else(|| Error::Materialization("payload carries no artifact reference".to_string()))?;

        let temp_path = self
            .work_dir
            .path()
            .join(format!("artifact_{}.{}", handle, ctx.extension));

        let result = self.persist(url, &temp_path, ctx).await;

        // Scoped storage is released whether the steps above succeeded or not.
        let _ = fs::remove_file(&temp_path).await;

        result
    }

    async fn persist(&self, url: &str, temp_path: &PathBuf, ctx: &JobContext) -> Result<()> {
        self.api
            .download_file(url, temp_path)
            .await
            .map_err(|e| Error::Materialization(format!("download: {}", e)))?;

        match &self.destination {
            Destination::Playlist(playlist_uuid) => {
                let clip = self
                    .api
                    .add_file_to_playlist(playlist_uuid, temp_path, Some(&ctx.display_name))
                    .await
                    .map_err(|e| Error::Materialization(format!("upload: {}", e)))?;

                // Ledger write: embed the fingerprint tag in the clip metadata.
                let description = match clip.description.as_deref() {
                    Some(existing) if !existing.is_empty() => {
                        format!("{} {}", existing, ctx.fingerprint.tag())
                    }
                    _ => ctx.fingerprint.tag(),
                };
                self.api
                    .update_clip_description(&clip.uuid, &description)
                    .await
                    .map_err(|e| Error::Materialization(format!("ledger stamp: {}", e)))?;

                if let Some(keyframe) = &ctx.keyframe {
                    self.api
                        .set_clip_keyframe(&clip.uuid, keyframe)
                        .await
                        .map_err(|e| Error::Materialization(format!("keyframe link: {}", e)))?;
                }

                info!(
                    clip = %clip.uuid,
                    name = %ctx.display_name,
                    fingerprint = %ctx.fingerprint,
                    "materialized into playlist"
                );
            }
            Destination::Folder(dir) => {
                fs::create_dir_all(dir)
                    .await
                    .map_err(|e| Error::Materialization(format!("output dir: {}", e)))?;

                let final_path = dir.join(format!("{}.{}", ctx.display_name, ctx.extension));
                // Copy rather than rename: the temp dir may be on another
                // filesystem.
                fs::copy(temp_path, &final_path)
                    .await
                    .map_err(|e| Error::Materialization(format!("persist: {}", e)))?;

                debug!(path = %final_path.display(), "materialized to folder");
            }
        }

        Ok(())
    }
}
