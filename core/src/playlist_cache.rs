//! Read-through playlist cache (C12, spec §4.12). Revives the `lru` dependency
//! the teacher declared but never wired up, giving it a real consumer here.

use std::path::Path;

use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;

use crate::error::{CoreError, Result};
use crate::ids::{VariantLabel, VideoId};

const EVENT_TAG: &str = "#EXT-X-PLAYLIST-TYPE:EVENT";
const VOD_TAG: &str = "#EXT-X-PLAYLIST-TYPE:VOD";

/// Requested playlist variant: as produced (`EVENT`, appendable) or rewritten
/// to look finished (`VOD`), per the `playlistType` query parameter (spec §4.12).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaylistType {
    AsProduced,
    Vod,
}

/// Caches recently-read playlist bytes, keyed by `(videoId, variant, type)`.
/// Entries are invalidated by mtime, so a still-growing EVENT playlist is
/// always re-read rather than served stale. Playlists are never mutated on
/// disk by this component (spec §4.12): the VOD substitution happens only on
/// the in-memory copy handed back to the caller.
pub struct PlaylistCache {
    entries: Mutex<LruCache<(VideoId, VariantLabel, PlaylistType), CachedPlaylist>>,
}

#[derive(Debug, Clone)]
struct CachedPlaylist {
    bytes: Vec<u8>,
    mtime: std::time::SystemTime,
}

impl PlaylistCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::new(1).unwrap());
        PlaylistCache {
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Return playlist bytes for `(video_id, variant)` if the file exists and
    /// is stable on disk, substituting the playlist-type tag if requested.
    /// Returns `CoreError::NotReady` if the file does not exist yet.
    pub async fn get_playlist(
        &self,
        video_id: &VideoId,
        variant: &VariantLabel,
        path: &Path,
        playlist_type: PlaylistType,
    ) -> Result<Vec<u8>> {
        let meta = tokio::fs::metadata(path).await.map_err(|_| {
            CoreError::not_ready(format!("playlist for {}/{} not yet produced", video_id, variant))
        })?;
        let mtime = meta.modified().unwrap_or(std::time::SystemTime::UNIX_EPOCH);

        let key = (video_id.clone(), variant.clone(), playlist_type);
        if let Some(cached) = self.entries.lock().get(&key) {
            if cached.mtime == mtime {
                return Ok(cached.bytes.clone());
            }
        }

        let raw = tokio::fs::read(path).await?;
        let bytes = match playlist_type {
            PlaylistType::AsProduced => raw,
            PlaylistType::Vod => rewrite_as_vod(&raw),
        };

        self.entries.lock().put(
            key,
            CachedPlaylist {
                bytes: bytes.clone(),
                mtime,
            },
        );
        Ok(bytes)
    }

    pub fn invalidate(&self, video_id: &VideoId, variant: &VariantLabel) {
        let mut entries = self.entries.lock();
        entries.pop(&(video_id.clone(), variant.clone(), PlaylistType::AsProduced));
        entries.pop(&(video_id.clone(), variant.clone(), PlaylistType::Vod));
    }
}

fn rewrite_as_vod(raw: &[u8]) -> Vec<u8> {
    match std::str::from_utf8(raw) {
        Ok(text) => text.replace(EVENT_TAG, VOD_TAG).into_bytes(),
        Err(_) => raw.to_vec(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn vod_query_substitutes_tag() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("playlist.m3u8");
        tokio::fs::write(&path, b"#EXTM3U\n#EXT-X-PLAYLIST-TYPE:EVENT\n#EXTINF:5,\n000.ts\n")
            .await
            .unwrap();

        let cache = PlaylistCache::new(8);
        let id = VideoId::sanitize("movie");
        let variant = VariantLabel::new("720p");
        let bytes = cache
            .get_playlist(&id, &variant, &path, PlaylistType::Vod)
            .await
            .unwrap();
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.contains(VOD_TAG));
        assert!(!text.contains(EVENT_TAG));
    }

    #[tokio::test]
    async fn as_produced_query_keeps_event_tag_untouched() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("playlist.m3u8");
        tokio::fs::write(&path, b"#EXTM3U\n#EXT-X-PLAYLIST-TYPE:EVENT\n")
            .await
            .unwrap();

        let cache = PlaylistCache::new(8);
        let id = VideoId::sanitize("movie");
        let variant = VariantLabel::new("720p");
        let bytes = cache
            .get_playlist(&id, &variant, &path, PlaylistType::AsProduced)
            .await
            .unwrap();
        assert!(String::from_utf8(bytes).unwrap().contains(EVENT_TAG));
    }

    #[tokio::test]
    async fn missing_playlist_is_not_ready() {
        let cache = PlaylistCache::new(8);
        let id = VideoId::sanitize("movie");
        let variant = VariantLabel::new("720p");
        let result = cache
            .get_playlist(&id, &variant, Path::new("/no/such/playlist.m3u8"), PlaylistType::AsProduced)
            .await;
        assert!(matches!(result, Err(CoreError::NotReady(_))));
    }

    #[tokio::test]
    async fn disk_file_is_never_mutated() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("playlist.m3u8");
        let original = b"#EXTM3U\n#EXT-X-PLAYLIST-TYPE:EVENT\n".to_vec();
        tokio::fs::write(&path, &original).await.unwrap();

        let cache = PlaylistCache::new(8);
        let id = VideoId::sanitize("movie");
        let variant = VariantLabel::new("720p");
        let _ = cache
            .get_playlist(&id, &variant, &path, PlaylistType::Vod)
            .await
            .unwrap();

        let on_disk = tokio::fs::read(&path).await.unwrap();
        assert_eq!(on_disk, original);
    }
}
