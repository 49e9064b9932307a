//! Torrent and detail builders for recovery scenarios.

use revive_torrent_core::{
    ErrorClass, ErrorEnvelope, TorrentDetail, TorrentFileDetail, TorrentId, TorrentSnapshot,
    TorrentState,
};

/// Paused torrent without an error envelope, stored under `path`.
#[must_use]
pub fn healthy_torrent(id: &str, path: &str) -> TorrentSnapshot {
    let mut torrent = TorrentSnapshot::new(id, format!("torrent-{id}"));
    torrent.save_path = Some(path.to_string());
    torrent
}

/// Torrent halted with `class`, stored under `path`.
#[must_use]
pub fn errored_torrent(id: &str, class: ErrorClass, path: &str) -> TorrentSnapshot {
    let mut torrent = healthy_torrent(id, path);
    torrent.state = TorrentState::Error;
    torrent.error = Some(
        ErrorEnvelope::new(class).with_message(format!("{} reported by daemon", class.as_str())),
    );
    torrent
}

/// Torrent halted with missing files, stored under `path`.
#[must_use]
pub fn missing_files_torrent(id: &str, path: &str) -> TorrentSnapshot {
    errored_torrent(id, ErrorClass::MissingFiles, path)
}

/// Single-file detail reporting `on_disk` of `expected` bytes present.
#[must_use]
pub fn detail(id: &str, dir: &str, expected: u64, on_disk: u64) -> TorrentDetail {
    TorrentDetail {
        id: TorrentId::from(id),
        state: TorrentState::Error,
        download_dir: Some(dir.to_string()),
        files: vec![TorrentFileDetail {
            path: format!("payload-{id}.bin"),
            length: expected,
            bytes_completed: on_disk,
        }],
    }
}
