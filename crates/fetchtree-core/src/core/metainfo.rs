use std::fmt;

use bytes::Bytes;
use serde::Deserialize;
use serde_bencode::value::Value;
use serde_bytes::ByteBuf;
use sha1::{Digest, Sha1};

use crate::error::{FetchError, Result};

/// SHA-1 of the bencoded `info` dictionary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InfoHash(pub [u8; 20]);

impl InfoHash {
    pub fn to_hex(&self) -> String { hex::encode(self.0) }
}

impl fmt::Display for InfoHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(&self.to_hex()) }
}

/// A parsed single-file torrent descriptor.
#[derive(Debug, Clone)]
pub struct TorrentMeta {
    pub info_hash:    InfoHash,
    pub name:         String,
    pub length:       u64,
    pub piece_length: u64,
    pub announce:     Option<String>,
    /// The original bytes, handed unchanged to the engine.
    pub raw:          Bytes,
}

#[derive(Deserialize)]
struct RawTorrent {
    info:     RawInfo,
    #[serde(default)]
    announce: Option<String>,
}

#[derive(Deserialize)]
struct RawInfo {
    name:         String,
    #[serde(default)]
    length:       Option<u64>,
    #[serde(default)]
    files:        Option<Vec<RawFile>>,
    #[serde(rename = "piece length")]
    piece_length: u64,
    #[allow(dead_code)]
    pieces:       ByteBuf,
}

#[derive(Deserialize)]
struct RawFile {
    #[allow(dead_code)]
    length: u64,
}

/// Parses `.torrent` bytes, rejecting multi-file ("non-simple") torrents.
pub fn parse_torrent(raw: Bytes) -> Result<TorrentMeta> {
    let info_hash = info_hash(&raw)?;
    let torrent: RawTorrent = serde_bencode::from_bytes(&raw)
        .map_err(|e| FetchError::UnsupportedFormat(format!("malformed torrent: {e}")))?;
    let info = torrent.info;

    if info.files.is_some() {
        return Err(FetchError::UnsupportedFormat(format!(
            "non-simple torrent '{}': only single-file torrents are supported",
            info.name
        )));
    }
    let length = info
        .length
        .ok_or_else(|| FetchError::UnsupportedFormat("torrent has no length".into()))?;

    Ok(TorrentMeta {
        info_hash,
        name: info.name,
        length,
        piece_length: info.piece_length,
        announce: torrent.announce,
        raw,
    })
}

fn info_hash(raw: &[u8]) -> Result<InfoHash> {
    let value: Value = serde_bencode::from_bytes(raw)
        .map_err(|e| FetchError::UnsupportedFormat(format!("not bencoded: {e}")))?;
    let Value::Dict(root) = value else {
        return Err(FetchError::UnsupportedFormat("torrent root is not a dictionary".into()));
    };
    let info = root
        .get(&b"info"[..])
        .ok_or_else(|| FetchError::UnsupportedFormat("torrent has no info dictionary".into()))?;
    let encoded = serde_bencode::to_bytes(info)
        .map_err(|e| FetchError::UnsupportedFormat(format!("info dictionary: {e}")))?;
    Ok(InfoHash(Sha1::digest(&encoded).into()))
}
