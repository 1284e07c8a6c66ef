//! Whirl: realtime random-match and friend chat client engine.

pub mod api;
pub mod config;
pub mod connection;
pub mod event;
pub mod format;
pub mod friends;
pub mod random;
pub mod session;
pub mod storage;
pub mod transport;
