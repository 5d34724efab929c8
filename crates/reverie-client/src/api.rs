//! Service trait for the playlist backend.
//!
//! Abstracting the backend behind a trait keeps the dispatch crate testable
//! without HTTP: integration tests drive the orchestrator against in-memory
//! implementations.

use std::path::Path;

use async_trait::async_trait;

use reverie_core::Result;

use crate::types::{Clip, CreatePlaylistRequest, Playlist, PlaylistItem, PlaylistItemsPage};

/// Capability set of the remote collection service.
///
/// All calls are synchronous request/response and may fail with a generic
/// remote error; callers treat failures as non-fatal per-job conditions.
#[async_trait]
pub trait PlaylistApi: Send + Sync {
    /// Create a new playlist.
    async fn create_playlist(&self, req: &CreatePlaylistRequest) -> Result<Playlist>;

    /// Fetch a playlist by uuid.
    async fn get_playlist(&self, uuid: &str) -> Result<Playlist>;

    /// List one page of a playlist's items.
    async fn playlist_items(&self, uuid: &str, take: i64, skip: i64) -> Result<PlaylistItemsPage>;

    /// Upload a local file into a playlist as a new clip, optionally with a
    /// display name.
    async fn add_file_to_playlist(
        &self,
        uuid: &str,
        path: &Path,
        name: Option<&str>,
    ) -> Result<Clip>;

    /// Fetch a clip by uuid.
    async fn get_clip(&self, uuid: &str) -> Result<Clip>;

    /// Replace a clip's description metadata.
    async fn update_clip_description(&self, uuid: &str, description: &str) -> Result<()>;

    /// Upload a secondary asset (reference keyframe) and link it to a clip.
    async fn set_clip_keyframe(&self, clip_uuid: &str, path: &Path) -> Result<()>;

    /// Reorder a playlist's items.
    async fn reorder_playlist(&self, uuid: &str, item_ids: &[i64]) -> Result<()>;

    /// Download a remote artifact to a local path.
    async fn download_file(&self, url: &str, dest: &Path) -> Result<()>;
}

/// Fetch every item of a playlist, following take/skip pagination.
pub async fn fetch_all_items(api: &dyn PlaylistApi, uuid: &str) -> Result<Vec<PlaylistItem>> {
    let take = reverie_core::defaults::LEDGER_PAGE_SIZE;
    let mut skip = 0;
    let mut all = Vec::new();

    loop {
        let page = api.playlist_items(uuid, take, skip).await?;
        let fetched = page.items.len() as i64;
        all.extend(page.items);

        if fetched < take || (page.total_count > 0 && all.len() as i64 >= page.total_count) {
            break;
        }
        skip += take;
    }

    Ok(all)
}
