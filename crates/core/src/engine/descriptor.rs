//! `.torrent` file parsing.
//!
//! Uses librqbit-core to decode the bencoded metainfo without adding the
//! torrent anywhere.

use librqbit_core::torrent_metainfo::{torrent_from_bytes, TorrentMetaV1Owned};

use super::{EngineError, TorrentFile, TorrentMetadata};

/// Parse raw `.torrent` bytes into torrent metadata.
///
/// Multi-file paths are prefixed with the torrent's root folder name, as
/// engines lay them out on disk.
pub fn parse_torrent_file(bytes: &[u8]) -> Result<TorrentMetadata, EngineError> {
    if bytes.first() != Some(&b'd') {
        return Err(EngineError::InvalidTorrent(
            "not a bencoded dictionary".to_string(),
        ));
    }

    let torrent: TorrentMetaV1Owned =
        torrent_from_bytes(bytes).map_err(|e| EngineError::InvalidTorrent(e.to_string()))?;
    let info = &torrent.info;

    let name = info
        .name
        .as_ref()
        .map(|b| bytes_to_string(b.as_ref()))
        .unwrap_or_else(|| "unknown".to_string());

    let sizes_and_paths: Vec<(String, u64)> = if let Some(ref files) = info.files {
        files
            .iter()
            .map(|file| {
                let mut parts = vec![name.clone()];
                parts.extend(file.path.iter().map(|p| bytes_to_string(p.as_ref())));
                (parts.join("/"), file.length)
            })
            .collect()
    } else if let Some(length) = info.length {
        vec![(name.clone(), length)]
    } else {
        Vec::new()
    };

    if sizes_and_paths.is_empty() {
        return Err(EngineError::InvalidTorrent("torrent has no files".to_string()));
    }

    let files: Vec<TorrentFile> = sizes_and_paths
        .into_iter()
        .enumerate()
        .map(|(index, (path, size))| TorrentFile {
            index,
            path,
            size,
            offset: 0,
        })
        .collect();

    Ok(TorrentMetadata {
        name,
        info_hash: torrent.info_hash.as_string(),
        total_size: files.iter().map(|f| f.size).sum(),
        piece_length: Some(info.piece_length as u64),
        files,
    }
    .with_sequential_offsets())
}

fn bytes_to_string(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}
