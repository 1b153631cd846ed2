//! LocalSync: a tracker-mediated, LAN-oriented directory synchronizer.
//!
//! A tracker process holds the merged view of every peer's watched
//! directory and broadcasts it to all connected peers; each peer watches
//! its own directory, reports local changes to the tracker, and pulls
//! files it's missing directly from whichever peer has them.

pub mod config;
pub mod download;
pub mod event;
pub mod fileinfo;
pub mod index;
pub mod monitor;
pub mod observer;
pub mod peer;
pub mod peer_table;
pub mod protocol;
pub mod queue;
pub mod tracker;
pub mod upload;
