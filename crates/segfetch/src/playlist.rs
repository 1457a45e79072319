//! Manifest loading, local renaming and rewriting.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::time::Duration;

use m3u8_rs::{Key, Map, MediaPlaylist, Playlist, parse_playlist_res};
use reqwest::Client;
use tracing::{debug, info};
use url::Url;

use crate::error::FetchError;

pub const PLAYLIST_FILE: &str = "index.m3u8";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobKind {
    Key,
    Init,
    Segment,
}

/// One file to fetch: its local name and remote URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentJob {
    pub file: String,
    pub url: String,
    pub kind: JobKind,
}

/// A media playlist whose URIs point at local files.
#[derive(Debug, Clone)]
pub struct PreparedPlaylist {
    /// URL of the media playlist, after following a variant
    pub url: String,
    pub playlist: MediaPlaylist,
    /// Keys and init sections first, then segments in playlist order
    pub jobs: Vec<SegmentJob>,
}

impl PreparedPlaylist {
    pub fn segment_count(&self) -> usize {
        self.playlist.segments.len()
    }

    /// The playlist without the segments whose local file failed.
    ///
    /// A key, init section or discontinuity attached to a dropped segment
    /// moves to the next kept segment so decryption state stays correct.
    pub fn rewrite(&self, failed: &HashSet<String>) -> MediaPlaylist {
        let mut playlist = self.playlist.clone();
        let mut kept = Vec::with_capacity(playlist.segments.len());
        let mut pending_key: Option<Key> = None;
        let mut pending_map: Option<Map> = None;
        let mut pending_discontinuity = false;

        for mut segment in std::mem::take(&mut playlist.segments) {
            if failed.contains(&segment.uri) {
                if segment.key.is_some() {
                    pending_key = segment.key.take();
                }
                if segment.map.is_some() {
                    pending_map = segment.map.take();
                }
                pending_discontinuity |= segment.discontinuity;
                continue;
            }
            if segment.key.is_none() {
                segment.key = pending_key.take();
            } else {
                pending_key = None;
            }
            if segment.map.is_none() {
                segment.map = pending_map.take();
            } else {
                pending_map = None;
            }
            segment.discontinuity |= std::mem::take(&mut pending_discontinuity);
            kept.push(segment);
        }

        playlist.segments = kept;
        playlist
    }

    /// Segments that downloaded but cannot be decoded because the key or
    /// init section in effect for them is in `failed`, each with the
    /// missing file.
    pub fn orphaned_segments(&self, failed: &HashSet<String>) -> Vec<(&SegmentJob, String)> {
        let mut active_key: Option<&str> = None;
        let mut active_map: Option<&str> = None;
        let mut orphaned = Vec::new();
        let segment_jobs = self.jobs.iter().filter(|job| job.kind == JobKind::Segment);

        for (segment, job) in self.playlist.segments.iter().zip(segment_jobs) {
            if let Some(key) = &segment.key {
                active_key = key.uri.as_deref();
            }
            if let Some(map) = &segment.map {
                active_map = Some(map.uri.as_str());
            }
            if failed.contains(&job.file) {
                continue;
            }
            let missing = [active_key, active_map]
                .into_iter()
                .flatten()
                .find(|file| failed.contains(*file));
            if let Some(missing) = missing {
                orphaned.push((job, missing.to_string()));
            }
        }
        orphaned
    }

    /// Write the rewritten playlist into `dir`.
    pub fn write_rewritten(
        &self,
        dir: &Path,
        failed: &HashSet<String>,
    ) -> Result<std::path::PathBuf, FetchError> {
        let path = dir.join(PLAYLIST_FILE);
        let mut buf = Vec::new();
        self.rewrite(failed).write_to(&mut buf)?;
        std::fs::write(&path, buf).map_err(|e| FetchError::path_io(&path, e))?;
        Ok(path)
    }
}

/// Fetch `url` and resolve it to a media playlist ready for download.
pub async fn load_playlist(
    client: &Client,
    url: &str,
    timeout: Duration,
) -> Result<PreparedPlaylist, FetchError> {
    let manifest_url = Url::parse(url).map_err(|e| FetchError::invalid_url(url, e.to_string()))?;
    let body = fetch_text(client, &manifest_url, timeout).await?;

    let (media_url, playlist) = match parse(&body, &manifest_url)? {
        Playlist::MediaPlaylist(pl) => (manifest_url, pl),
        Playlist::MasterPlaylist(master) => {
            let variant = master
                .variants
                .iter()
                .filter(|v| !v.is_i_frame)
                .max_by_key(|v| v.bandwidth)
                .ok_or_else(|| FetchError::playlist("master playlist has no variants"))?;
            let variant_url = manifest_url.join(&variant.uri).map_err(|e| {
                FetchError::playlist(format!("bad variant URI {}: {e}", variant.uri))
            })?;
            info!(
                variant = %variant_url,
                bandwidth = variant.bandwidth,
                "following highest-bandwidth variant"
            );
            let body = fetch_text(client, &variant_url, timeout).await?;
            match parse(&body, &variant_url)? {
                Playlist::MediaPlaylist(pl) => (variant_url, pl),
                Playlist::MasterPlaylist(_) => {
                    return Err(FetchError::playlist(format!(
                        "variant {variant_url} is another master playlist"
                    )));
                }
            }
        }
    };

    if playlist.segments.is_empty() {
        return Err(FetchError::NoSegments {
            url: media_url.to_string(),
        });
    }
    prepare(media_url, playlist)
}

async fn fetch_text(client: &Client, url: &Url, timeout: Duration) -> Result<String, FetchError> {
    debug!(url = %url, "fetching playlist");
    let response = client.get(url.clone()).timeout(timeout).send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(FetchError::http_status(status, url.as_str(), "playlist"));
    }
    Ok(response.text().await?)
}

fn parse(body: &str, url: &Url) -> Result<Playlist, FetchError> {
    let body = body.trim_start_matches('\u{feff}');
    if body.trim().is_empty() {
        return Err(FetchError::EmptyPlaylist {
            url: url.to_string(),
        });
    }
    parse_playlist_res(body.as_bytes())
        .map_err(|e| FetchError::playlist(format!("cannot parse {url}: {e}")))
}

/// Rename every key, init section and segment to a local file name.
pub fn prepare(url: Url, mut playlist: MediaPlaylist) -> Result<PreparedPlaylist, FetchError> {
    let absolute = |uri: &str| {
        url.join(uri)
            .map(String::from)
            .map_err(|e| FetchError::playlist(format!("bad URI {uri}: {e}")))
    };

    let mut resources = Vec::new();
    let mut keys: HashMap<String, String> = HashMap::new();
    let mut maps: HashMap<String, String> = HashMap::new();
    let mut segments = Vec::with_capacity(playlist.segments.len());

    for (i, segment) in playlist.segments.iter_mut().enumerate() {
        if let Some(key) = segment.key.as_mut()
            && let Some(uri) = key.uri.as_mut()
        {
            let remote = absolute(uri)?;
            let local = match keys.get(&remote) {
                Some(local) => local.clone(),
                None => {
                    let local = format!("key{}.enc", keys.len());
                    keys.insert(remote.clone(), local.clone());
                    resources.push(SegmentJob {
                        file: local.clone(),
                        url: remote,
                        kind: JobKind::Key,
                    });
                    local
                }
            };
            *uri = local;
        }

        if let Some(map) = segment.map.as_mut() {
            let remote = absolute(&map.uri)?;
            let local = match maps.get(&remote) {
                Some(local) => local.clone(),
                None => {
                    let local = format!("init{}.mp4", maps.len());
                    maps.insert(remote.clone(), local.clone());
                    resources.push(SegmentJob {
                        file: local.clone(),
                        url: remote,
                        kind: JobKind::Init,
                    });
                    local
                }
            };
            map.uri = local;
        }

        let remote = absolute(&segment.uri)?;
        segment.uri = format!("{i}.ts");
        segments.push(SegmentJob {
            file: segment.uri.clone(),
            url: remote,
            kind: JobKind::Segment,
        });
    }

    resources.extend(segments);
    Ok(PreparedPlaylist {
        url: url.to_string(),
        playlist,
        jobs: resources,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const MEDIA: &str = "#EXTM3U
#EXT-X-VERSION:3
#EXT-X-TARGETDURATION:10
#EXT-X-KEY:METHOD=AES-128,URI=\"/keys/a.key\"
#EXTINF:10.0,
seg-0.ts
#EXTINF:10.0,
seg-1.ts
#EXT-X-DISCONTINUITY
#EXT-X-KEY:METHOD=AES-128,URI=\"https://k.example/b.key\"
#EXTINF:10.0,
https://cdn.example/other/seg-2.ts
#EXTINF:10.0,
seg-3.ts
#EXT-X-ENDLIST
";

    fn prepared() -> PreparedPlaylist {
        let url = Url::parse("https://v.example/hls/live/index.m3u8").unwrap();
        let playlist = match parse(MEDIA, &url).unwrap() {
            Playlist::MediaPlaylist(pl) => pl,
            Playlist::MasterPlaylist(_) => panic!("expected media playlist"),
        };
        prepare(url, playlist).unwrap()
    }

    #[test]
    fn renames_keys_and_segments() {
        let prepared = prepared();
        let files: Vec<_> = prepared.jobs.iter().map(|j| j.file.as_str()).collect();
        assert_eq!(files, ["key0.enc", "key1.enc", "0.ts", "1.ts", "2.ts", "3.ts"]);
        assert_eq!(prepared.jobs[0].url, "https://v.example/keys/a.key");
        assert_eq!(prepared.jobs[2].url, "https://v.example/hls/live/seg-0.ts");
        assert_eq!(prepared.jobs[4].url, "https://cdn.example/other/seg-2.ts");
        assert_eq!(prepared.segment_count(), 4);
    }

    #[test]
    fn rewrite_moves_key_and_discontinuity_forward() {
        let prepared = prepared();
        let failed: HashSet<String> = ["0.ts".to_string(), "2.ts".to_string()].into();
        let rewritten = prepared.rewrite(&failed);
        let uris: Vec<_> = rewritten.segments.iter().map(|s| s.uri.as_str()).collect();
        assert_eq!(uris, ["1.ts", "3.ts"]);
        assert_eq!(
            rewritten.segments[0].key.as_ref().and_then(|k| k.uri.as_deref()),
            Some("key0.enc")
        );
        assert!(rewritten.segments[1].discontinuity);
        assert_eq!(
            rewritten.segments[1].key.as_ref().and_then(|k| k.uri.as_deref()),
            Some("key1.enc")
        );
    }

    #[test]
    fn segments_behind_a_failed_key_are_orphaned() {
        let prepared = prepared();
        let failed: HashSet<String> = ["key0.enc".to_string(), "1.ts".to_string()].into();
        let orphaned: Vec<_> = prepared
            .orphaned_segments(&failed)
            .into_iter()
            .map(|(job, missing)| (job.file.as_str(), missing))
            .collect();
        assert_eq!(orphaned, [("0.ts", "key0.enc".to_string())]);

        let mut dropped = failed.clone();
        dropped.extend(orphaned.iter().map(|(file, _)| file.to_string()));
        let rewritten = prepared.rewrite(&dropped);
        let uris: Vec<_> = rewritten.segments.iter().map(|s| s.uri.as_str()).collect();
        assert_eq!(uris, ["2.ts", "3.ts"]);
        assert_eq!(
            rewritten.segments[0].key.as_ref().and_then(|k| k.uri.as_deref()),
            Some("key1.enc")
        );
        assert!(prepared.orphaned_segments(&HashSet::from(["2.ts".to_string()])).is_empty());
    }

    #[test]
    fn written_playlist_only_references_local_files() {
        let dir = tempfile::tempdir().unwrap();
        let prepared = prepared();
        let path = prepared
            .write_rewritten(dir.path(), &HashSet::from(["1.ts".to_string()]))
            .unwrap();
        let text = std::fs::read_to_string(path).unwrap();
        assert!(text.contains("0.ts") && !text.contains("\n1.ts"));
        assert!(!text.contains("https://"));
        assert!(text.contains("#EXT-X-ENDLIST"));
    }

    #[test]
    fn empty_body_is_a_manifest_error() {
        let url = Url::parse("https://v.example/a.m3u8").unwrap();
        let err = parse("  \n", &url).unwrap_err();
        assert!(err.is_manifest_error());
        let err = parse("<html>not a playlist</html>", &url).unwrap_err();
        assert!(err.is_manifest_error());
    }
}
