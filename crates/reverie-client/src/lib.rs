//! # reverie-client
//!
//! HTTP client for the playlist backend and artifact transfer.
//!
//! The [`PlaylistApi`] trait is the seam between reverie and the remote
//! collection service; [`BackendClient`] is the production implementation.

pub mod api;
pub mod backend;
pub mod types;

pub use api::{fetch_all_items, PlaylistApi};
pub use backend::{clips_of, resolve_playlist, BackendClient};
pub use types::{Clip, CreatePlaylistRequest, Playlist, PlaylistItem, PlaylistItemsPage};
