//! Composable resource downloads over a tree of single-use nodes.
//!
//! # Architecture
//!
//! - `data` - the [`Resource`] payload handle, [`Properties`] and [`FetchConfig`]
//! - `core` - pure parsing (torrent descriptors, meta refresh tags)
//! - [`transport`] and [`engine`] - traits for the outside world, with local
//!   and HTTP transports built in
//! - [`Node`] - leaves plus the retry, timeout, alternate, delayed,
//!   meta-refresh and torrent decorators, built through [`Factory`]
//!
//! # Key Features
//!
//! - **Fork per attempt**: decorators never restart a node; each attempt is a
//!   fresh fork, so a node delivers exactly one terminal outcome
//! - **Late listeners**: a listener added after the outcome gets it replayed
//! - **Blocking and async**: [`Node::download`], [`Node::download_blocking`]
//!   and [`Node::async_download`] share one state machine
//! - **Shared torrent descriptor**: a torrent node and all its forks fetch and
//!   parse the `.torrent` once

#![forbid(unsafe_code)]

mod core;
mod data;
pub mod engine;
mod error;
mod factory;
mod listener;
mod node;
pub mod transport;

pub use crate::core::{InfoHash, TorrentMeta, find_meta_refresh, parse_torrent, resolve_refresh};
pub use data::{
    FetchConfig, PR_CONTENT_DISPOSITION, PR_CONTENT_TYPE, PR_SIZE, PR_URL, Properties,
    REQUEST_PREFIX, Resource,
};
pub use error::{FetchError, Result};
pub use factory::Factory;
pub use listener::{Listener, ListenerId};
pub use node::{DelayedFactory, LeafOptions, Lifecycle, Node};
