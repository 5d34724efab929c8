//! Reqwest implementation of the playlist backend API.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::multipart;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use reverie_core::defaults::DOWNLOAD_TIMEOUT_SECS;
use reverie_core::{Error, Result, Settings};

use crate::api::PlaylistApi;
use crate::types::{Clip, CreatePlaylistRequest, Playlist, PlaylistItem, PlaylistItemsPage};

/// HTTP client for the playlist backend.
#[derive(Clone)]
pub struct BackendClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl BackendClient {
    /// Create a client from resolved settings.
    pub fn new(settings: &Settings) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(DOWNLOAD_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            http,
            base_url: settings.backend_url.trim_end_matches('/').to_string(),
            api_key: settings.api_key.clone(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        self.http
            .request(method, self.url(path))
            .header("X-Api-Key", &self.api_key)
    }

    /// Check the response status, mapping failures to `Error::Request` with
    /// the body text attached.
    async fn checked(response: reqwest::Response) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(Error::Request(format!("backend returned {}: {}", status, body)))
    }

    async fn file_part(path: &Path) -> Result<multipart::Part> {
        let data = fs::read(path).await?;
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "upload.bin".to_string());
        multipart::Part::bytes(data)
            .file_name(filename)
            .mime_str("application/octet-stream")
            .map_err(|e| Error::Internal(format!("failed to build upload part: {}", e)))
    }
}

#[async_trait]
impl PlaylistApi for BackendClient {
    async fn create_playlist(&self, req: &CreatePlaylistRequest) -> Result<Playlist> {
        let response = self
            .request(reqwest::Method::POST, "/playlists")
            .json(req)
            .send()
            .await?;
        Ok(Self::checked(response).await?.json().await?)
    }

    async fn get_playlist(&self, uuid: &str) -> Result<Playlist> {
        let response = self
            .request(reqwest::Method::GET, &format!("/playlists/{}", uuid))
            .send()
            .await?;
        Ok(Self::checked(response).await?.json().await?)
    }

    async fn playlist_items(&self, uuid: &str, take: i64, skip: i64) -> Result<PlaylistItemsPage> {
        let response = self
            .request(reqwest::Method::GET, &format!("/playlists/{}/items", uuid))
            .query(&[("take", take), ("skip", skip)])
            .send()
            .await?;
        Ok(Self::checked(response).await?.json().await?)
    }

    async fn add_file_to_playlist(
        &self,
        uuid: &str,
        path: &Path,
        name: Option<&str>,
    ) -> Result<Clip> {
        debug!(playlist = uuid, file = %path.display(), "uploading clip");

        let mut form = multipart::Form::new().part("file", Self::file_part(path).await?);
        if let Some(name) = name {
            form = form.text("name", name.to_string());
        }

        let response = self
            .request(reqwest::Method::POST, &format!("/playlists/{}/items", uuid))
            .multipart(form)
            .send()
            .await?;
        Ok(Self::checked(response).await?.json().await?)
    }

    async fn get_clip(&self, uuid: &str) -> Result<Clip> {
        let response = self
            .request(reqwest::Method::GET, &format!("/clips/{}", uuid))
            .send()
            .await?;
        Ok(Self::checked(response).await?.json().await?)
    }

    async fn update_clip_description(&self, uuid: &str, description: &str) -> Result<()> {
        let response = self
            .request(reqwest::Method::PATCH, &format!("/clips/{}", uuid))
            .json(&serde_json::json!({ "description": description }))
            .send()
            .await?;
        Self::checked(response).await?;
        Ok(())
    }

    async fn set_clip_keyframe(&self, clip_uuid: &str, path: &Path) -> Result<()> {
        debug!(clip = clip_uuid, file = %path.display(), "uploading keyframe");

        let form = multipart::Form::new().part("file", Self::file_part(path).await?);
        let response = self
            .request(reqwest::Method::PUT, &format!("/clips/{}/keyframe", clip_uuid))
            .multipart(form)
            .send()
            .await?;
        Self::checked(response).await?;
        Ok(())
    }

    async fn reorder_playlist(&self, uuid: &str, item_ids: &[i64]) -> Result<()> {
        let response = self
            .request(reqwest::Method::PUT, &format!("/playlists/{}/order", uuid))
            .json(&serde_json::json!({ "items": item_ids }))
            .send()
            .await?;
        Self::checked(response).await?;
        Ok(())
    }

    async fn download_file(&self, url: &str, dest: &Path) -> Result<()> {
        debug!(url, dest = %dest.display(), "downloading artifact");

        let response = Self::checked(self.http.get(url).send().await?).await?;

        // Stream to disk; artifacts can be large video files.
        let mut file = fs::File::create(dest).await?;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| Error::Request(e.to_string()))?;
            file.write_all(&chunk).await?;
        }
        file.flush().await?;

        Ok(())
    }
}

/// Resolve the destination playlist from a batch's playlist spec: reuse an
/// existing playlist when a uuid is given (falling back to creation if the
/// fetch fails), otherwise create a new one.
pub async fn resolve_playlist(
    api: &dyn PlaylistApi,
    spec: &reverie_core::PlaylistSpec,
) -> Result<Playlist> {
    if let Some(uuid) = &spec.existing_uuid {
        match api.get_playlist(uuid).await {
            Ok(playlist) => return Ok(playlist),
            Err(e) => {
                tracing::warn!(uuid, error = %e, "existing playlist not found, creating a new one");
            }
        }
    }

    let name = spec
        .name
        .clone()
        .ok_or_else(|| Error::Config("playlist requires a name or an existing_uuid".to_string()))?;

    api.create_playlist(&CreatePlaylistRequest {
        name,
        description: spec.description.clone(),
        nsfw: spec.nsfw,
    })
    .await
}

/// Extract the clips from a playlist item listing, skipping non-clip entries.
pub fn clips_of(items: &[PlaylistItem]) -> Vec<&Clip> {
    items
        .iter()
        .filter(|item| item.item_type == "clip")
        .filter_map(|item| item.clip_item.as_ref())
        .collect()
}
