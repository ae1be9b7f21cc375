//! Embedded cover-art extraction and caching.
//!
//! Covers are pulled out of audio files with ffmpeg into a capped cache
//! directory, keyed by a content fingerprint of the file path. Lookups by
//! artist/album resolve through play history to a file first. Client-named
//! files must live under one of the configured music roots. A bundled
//! default image stands in when nothing can be extracted.

use crate::store::{ArtworkEntry, RadioStore, StoreError};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use sha2::{Digest, Sha256};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};

const EXTRACT_TIMEOUT: Duration = Duration::from_secs(5);

/// 1x1 transparent PNG served when a track has no extractable art.
pub const DEFAULT_COVER: &[u8] = &[
    0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0x00, 0x00, 0x00, 0x0D, 0x49, 0x48, 0x44,
    0x52, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x01, 0x08, 0x06, 0x00, 0x00, 0x00, 0x1F,
    0x15, 0xC4, 0x89, 0x00, 0x00, 0x00, 0x0A, 0x49, 0x44, 0x41, 0x54, 0x78, 0x9C, 0x63, 0x00,
    0x01, 0x00, 0x00, 0x05, 0x00, 0x01, 0x0D, 0x0A, 0x2D, 0xB4, 0x00, 0x00, 0x00, 0x00, 0x49,
    0x45, 0x4E, 0x44, 0xAE, 0x42, 0x60, 0x82,
];

pub const DEFAULT_COVER_MIME: &str = "image/png";

/// Content fingerprint used as the cache key for a source path or an
/// artist|album pair.
pub fn fingerprint(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Characters kept verbatim in query values; everything else is
/// percent-encoded so paths and artist names with `&`, `#`, `%` or `+`
/// survive the round trip through the cover endpoint.
const QUERY_VALUE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'/')
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

pub fn cover_url_for_file(path: &str) -> String {
    format!("/api/cover?file={}", utf8_percent_encode(path, QUERY_VALUE))
}

pub fn cover_url_for_album(artist: &str, album: &str) -> String {
    format!(
        "/api/cover?artist={}&album={}",
        utf8_percent_encode(artist, QUERY_VALUE),
        utf8_percent_encode(album, QUERY_VALUE)
    )
}

fn sniff_mime(bytes: &[u8]) -> Option<&'static str> {
    match infer::get(bytes) {
        Some(kind) if kind.mime_type().starts_with("image/") => Some(match kind.mime_type() {
            "image/png" => "image/png",
            "image/gif" => "image/gif",
            _ => "image/jpeg",
        }),
        _ => None,
    }
}

pub struct ArtworkService {
    store: Arc<dyn RadioStore>,
    cache_dir: PathBuf,
    ffmpeg_path: String,
    music_roots: Vec<PathBuf>,
}

impl ArtworkService {
    pub fn new(
        store: Arc<dyn RadioStore>,
        cache_dir: PathBuf,
        ffmpeg_path: String,
        music_roots: Vec<PathBuf>,
    ) -> Self {
        Self {
            store,
            cache_dir,
            ffmpeg_path,
            music_roots,
        }
    }

    /// A file may only be opened when it sits under one of the configured
    /// music roots. Paths are compared canonicalized where possible so
    /// symlinks cannot escape a root; with no roots configured every
    /// lookup is refused.
    fn is_allowed_path(&self, path: &Path) -> bool {
        if !path.is_absolute()
            || path
                .components()
                .any(|c| matches!(c, Component::ParentDir))
        {
            return false;
        }
        let resolved = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
        self.music_roots.iter().any(|root| {
            let root = root.canonicalize().unwrap_or_else(|_| root.clone());
            resolved.starts_with(&root)
        })
    }

    /// Cover bytes for an audio file, extracting and caching on first use.
    pub async fn cover_for_file(&self, file: &str) -> Option<(Vec<u8>, &'static str)> {
        if !self.is_allowed_path(Path::new(file)) {
            debug!(file = %file, "Cover lookup outside music roots refused");
            return None;
        }
        let key = fingerprint(file);

        if let Ok(Some(entry)) = self.store.get_artwork(&key) {
            match tokio::fs::read(&entry.local_path).await {
                Ok(bytes) => {
                    let _ = self.store.touch_artwork(&key);
                    let mime = sniff_mime(&bytes).unwrap_or("image/jpeg");
                    return Some((bytes, mime));
                }
                Err(e) => {
                    debug!(key = %key, error = %e, "Cached cover file missing, re-extracting");
                }
            }
        }

        if !Path::new(file).exists() {
            return None;
        }

        let bytes = self.extract(file, &key).await?;
        let mime = sniff_mime(&bytes)?;
        Some((bytes, mime))
    }

    /// Cover bytes for an artist/album pair, resolved through play history.
    pub async fn cover_for_album(&self, artist: &str, album: &str) -> Option<(Vec<u8>, &'static str)> {
        let file = self
            .store
            .lookup_album_file(artist, album)
            .ok()
            .flatten()?;
        self.cover_for_file(&file).await
    }

    async fn extract(&self, file: &str, key: &str) -> Option<Vec<u8>> {
        if let Err(e) = tokio::fs::create_dir_all(&self.cache_dir).await {
            warn!(error = %e, "Cannot create artwork cache dir");
            return None;
        }
        let tmp_path = self.cache_dir.join(format!("{}.tmp", key));

        let result = tokio::time::timeout(
            EXTRACT_TIMEOUT,
            Command::new(&self.ffmpeg_path)
                .args([
                    "-v", "quiet", "-y", "-i", file, "-an", "-codec:v", "copy", "-frames:v", "1",
                    "-f", "image2",
                ])
                .arg(&tmp_path)
                .output(),
        )
        .await;

        match result {
            Ok(Ok(output)) if output.status.success() => {}
            Ok(Ok(_)) | Ok(Err(_)) | Err(_) => {
                let _ = tokio::fs::remove_file(&tmp_path).await;
                return None;
            }
        }

        let bytes = tokio::fs::read(&tmp_path).await.ok()?;
        let Some(mime) = sniff_mime(&bytes) else {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return None;
        };

        let ext = if mime == "image/png" { "png" } else { "jpg" };
        let final_path = self.cache_dir.join(format!("{}.{}", key, ext));
        if tokio::fs::rename(&tmp_path, &final_path).await.is_err() {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return None;
        }

        let now = crate::now_ms();
        let entry = ArtworkEntry {
            key: key.to_string(),
            artist: None,
            album: None,
            source_uri: Some(file.to_string()),
            local_path: final_path.to_string_lossy().to_string(),
            size_bytes: bytes.len() as i64,
            cached_at: now,
            last_used_at: now,
        };
        if let Err(e) = self.store.put_artwork(&entry) {
            warn!(error = %e, "Failed to record artwork cache entry");
        }
        Some(bytes)
    }

    /// Evict least-recently-used entries above the cap and delete their
    /// files. Returns the number of entries evicted.
    pub async fn enforce_cap(&self, cap_bytes: i64) -> Result<usize, StoreError> {
        let evicted = self.store.evict_artwork_over(cap_bytes)?;
        for entry in &evicted {
            if let Err(e) = tokio::fs::remove_file(&entry.local_path).await {
                debug!(path = %entry.local_path, error = %e, "Evicted cover file already gone");
            }
        }
        Ok(evicted.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SqliteRadioStore;
    use tempfile::TempDir;

    #[test]
    fn fingerprint_is_deterministic_and_hex() {
        let a = fingerprint("/music/a.mp3");
        let b = fingerprint("/music/a.mp3");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(fingerprint("/music/b.mp3"), a);
    }

    #[test]
    fn default_cover_is_a_valid_png() {
        assert_eq!(sniff_mime(DEFAULT_COVER), Some("image/png"));
    }

    #[test]
    fn cover_urls_embed_lookup_fields() {
        assert_eq!(
            cover_url_for_file("/music/a.mp3"),
            "/api/cover?file=/music/a.mp3"
        );
        assert!(cover_url_for_album("Artist", "Album").contains("artist=Artist"));
    }

    #[test]
    fn cover_urls_percent_encode_reserved_characters() {
        assert_eq!(
            cover_url_for_album("Hall & Oates", "Rock 'n Soul"),
            "/api/cover?artist=Hall%20%26%20Oates&album=Rock%20%27n%20Soul"
        );
        assert_eq!(
            cover_url_for_file("/music/AC%DC/Back in Black #1.mp3"),
            "/api/cover?file=/music/AC%25DC/Back%20in%20Black%20%231.mp3"
        );
    }

    #[tokio::test]
    async fn cached_cover_is_served_and_touched() {
        let tmp = TempDir::new().unwrap();
        let store = Arc::new(SqliteRadioStore::new(tmp.path().join("r.db")).unwrap());
        let service = ArtworkService::new(
            store.clone(),
            tmp.path().join("covers"),
            "ffmpeg".to_string(),
            vec![PathBuf::from("/music")],
        );

        let cover_path = tmp.path().join("cover.png");
        std::fs::write(&cover_path, DEFAULT_COVER).unwrap();
        let key = fingerprint("/music/a.mp3");
        store
            .put_artwork(&ArtworkEntry {
                key: key.clone(),
                artist: None,
                album: None,
                source_uri: Some("/music/a.mp3".to_string()),
                local_path: cover_path.to_string_lossy().to_string(),
                size_bytes: DEFAULT_COVER.len() as i64,
                cached_at: 1,
                last_used_at: 1,
            })
            .unwrap();

        let (bytes, mime) = service.cover_for_file("/music/a.mp3").await.unwrap();
        assert_eq!(bytes, DEFAULT_COVER);
        assert_eq!(mime, "image/png");

        // The hit refreshed last_used_at.
        let entry = store.get_artwork(&key).unwrap().unwrap();
        assert!(entry.last_used_at > 1);
    }

    #[tokio::test]
    async fn missing_file_yields_none() {
        let tmp = TempDir::new().unwrap();
        let store = Arc::new(SqliteRadioStore::new(tmp.path().join("r.db")).unwrap());
        let service = ArtworkService::new(
            store,
            tmp.path().join("covers"),
            "ffmpeg".to_string(),
            vec![PathBuf::from("/no")],
        );
        assert!(service.cover_for_file("/no/such/file.mp3").await.is_none());
    }

    #[tokio::test]
    async fn paths_outside_music_roots_are_refused() {
        let tmp = TempDir::new().unwrap();
        let store = Arc::new(SqliteRadioStore::new(tmp.path().join("r.db")).unwrap());

        // A real, readable file that is NOT under the configured root.
        let secret = tmp.path().join("secret.txt");
        std::fs::write(&secret, b"not a cover").unwrap();

        let service = ArtworkService::new(
            store,
            tmp.path().join("covers"),
            "ffmpeg".to_string(),
            vec![tmp.path().join("music")],
        );
        assert!(service
            .cover_for_file(secret.to_str().unwrap())
            .await
            .is_none());
        // Relative and parent-escaping paths never qualify.
        assert!(service.cover_for_file("music/a.mp3").await.is_none());
        let escape = tmp.path().join("music/../secret.txt");
        assert!(service
            .cover_for_file(escape.to_str().unwrap())
            .await
            .is_none());
    }

    #[tokio::test]
    async fn no_configured_roots_refuses_every_lookup() {
        let tmp = TempDir::new().unwrap();
        let store = Arc::new(SqliteRadioStore::new(tmp.path().join("r.db")).unwrap());
        let probe = tmp.path().join("a.mp3");
        std::fs::write(&probe, b"audio").unwrap();

        let service = ArtworkService::new(
            store,
            tmp.path().join("covers"),
            "ffmpeg".to_string(),
            Vec::new(),
        );
        assert!(service
            .cover_for_file(probe.to_str().unwrap())
            .await
            .is_none());
    }
}
