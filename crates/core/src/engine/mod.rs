//! Peer-to-peer engine abstraction.
//!
//! A `PeerEngine` adds torrents and hands back an `EngineHandle` per job;
//! backends are qBittorrent (remote WebUI) and librqbit (embedded).

mod config;
mod descriptor;
mod librqbit;
mod magnet;
mod qbittorrent;
mod types;

pub use self::librqbit::{LibrqbitEngine, LibrqbitHandle};
pub use config::{LibrqbitConfig, QBittorrentConfig};
pub use descriptor::parse_torrent_file;
pub use magnet::{parse_magnet, MagnetInfo, PLACEHOLDER_NAME};
pub use qbittorrent::{QBittorrentEngine, QBittorrentHandle};
pub use types::*;
