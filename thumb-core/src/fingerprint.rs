//! Identifies a thumbnail request for cache keying and coalescing. See spec.md §3.
use std::path::PathBuf;

/// Which underlying source a fingerprint addresses.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FingerprintKind {
    LocalFile,
    AlbumArt,
    ArtistArt,
}

/// Requested output box, `(width, height)` in pixels. `(0, 0)` keeps the
/// original size; a zero component clamps to the other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestedSize {
    pub width: u32,
    pub height: u32,
}

impl RequestedSize {
    pub const ORIGINAL: RequestedSize = RequestedSize { width: 0, height: 0 };
}

/// The fields that uniquely identify a thumbnail request: kind, identity
/// (path+mtime+inode for local files, artist+album for remote art), and the
/// requested box.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestFingerprint {
    pub kind: FingerprintKind,
    identity: Identity,
    pub target_size: RequestedSize,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum Identity {
    LocalFile { path: PathBuf, mtime_ms: i64, inode: u64 },
    RemoteArt { artist: String, album: String },
}

impl RequestFingerprint {
    pub fn local_file(path: PathBuf, mtime_ms: i64, inode: u64, target_size: RequestedSize) -> Self {
        Self { kind: FingerprintKind::LocalFile, identity: Identity::LocalFile { path, mtime_ms, inode }, target_size }
    }

    pub fn album_art(artist: impl Into<String>, album: impl Into<String>, target_size: RequestedSize) -> Self {
        Self {
            kind: FingerprintKind::AlbumArt,
            identity: Identity::RemoteArt { artist: artist.into(), album: album.into() },
            target_size,
        }
    }

    pub fn artist_art(artist: impl Into<String>, album: impl Into<String>, target_size: RequestedSize) -> Self {
        Self {
            kind: FingerprintKind::ArtistArt,
            identity: Identity::RemoteArt { artist: artist.into(), album: album.into() },
            target_size,
        }
    }

    /// `thumb_key = fingerprint + requested_size` — the cache key for the
    /// scaled result, distinct per requested size.
    pub fn thumb_key(&self) -> Vec<u8> {
        let mut key = self.source_key();
        key.extend_from_slice(b"|size=");
        key.extend_from_slice(format!("{}x{}", self.target_size.width, self.target_size.height).as_bytes());
        key
    }

    /// `source_key = fingerprint` (size-independent) — the cache key for the
    /// full-size original, shared across every requested size of the same source.
    pub fn source_key(&self) -> Vec<u8> {
        match &self.identity {
            Identity::LocalFile { path, mtime_ms, inode } => {
                format!("local|{}|{mtime_ms}|{inode}", path.display()).into_bytes()
            }
            Identity::RemoteArt { artist, album } => {
                let kind = match self.kind {
                    FingerprintKind::AlbumArt => "album",
                    FingerprintKind::ArtistArt => "artist",
                    FingerprintKind::LocalFile => unreachable!("remote identity with LocalFile kind"),
                };
                format!("{kind}|{artist}|{album}").into_bytes()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thumb_key_varies_by_size_source_key_does_not() {
        let a = RequestFingerprint::album_art("Artist", "Album", RequestedSize { width: 100, height: 100 });
        let b = RequestFingerprint::album_art("Artist", "Album", RequestedSize { width: 200, height: 200 });
        assert_eq!(a.source_key(), b.source_key());
        assert_ne!(a.thumb_key(), b.thumb_key());
    }

    #[test]
    fn different_identity_gives_different_keys() {
        let a = RequestFingerprint::album_art("A", "X", RequestedSize::ORIGINAL);
        let b = RequestFingerprint::album_art("B", "X", RequestedSize::ORIGINAL);
        assert_ne!(a.source_key(), b.source_key());
    }

    #[test]
    fn local_file_identity_includes_mtime_and_inode() {
        let a = RequestFingerprint::local_file(PathBuf::from("/tmp/x.jpg"), 100, 5, RequestedSize::ORIGINAL);
        let b = RequestFingerprint::local_file(PathBuf::from("/tmp/x.jpg"), 200, 5, RequestedSize::ORIGINAL);
        assert_ne!(a.source_key(), b.source_key());
    }
}
