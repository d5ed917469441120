//! Pure parsing used by decorator nodes. No I/O happens here.

mod metainfo;
mod refresh;

pub use metainfo::{InfoHash, TorrentMeta, parse_torrent};
pub use refresh::{find_meta_refresh, resolve_refresh};

#[cfg(test)]
pub(crate) use metainfo::tests::single_file_torrent;
