//! Dedup ledger: fingerprints already materialized into the destination.
//!
//! The ledger is read once at batch start from clip descriptions in the
//! destination playlist. Read failures degrade to an empty set — dedup then
//! knows nothing, but the batch is never blocked.

use std::collections::HashSet;

use tracing::{debug, warn};

use reverie_client::{clips_of, fetch_all_items, PlaylistApi};
use reverie_core::Fingerprint;

/// Collect the fingerprints embedded in a playlist's clip metadata.
pub async fn known_fingerprints(api: &dyn PlaylistApi, playlist_uuid: &str) -> HashSet<Fingerprint> {
    let items = match fetch_all_items(api, playlist_uuid).await {
        Ok(items) => items,
        Err(e) => {
            warn!(playlist = playlist_uuid, error = %e, "ledger read failed, deduplication disabled for this run");
            return HashSet::new();
        }
    };

    let fingerprints: HashSet<Fingerprint> = clips_of(&items)
        .into_iter()
        .filter_map(|clip| clip.description.as_deref().and_then(Fingerprint::find_in))
        .collect();

    debug!(
        playlist = playlist_uuid,
        known = fingerprints.len(),
        "loaded dedup ledger"
    );

    fingerprints
}
