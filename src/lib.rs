//! Snoop on Twitter handles and fan new tweets out to Telegram chats.
//!
//! The crate is split along the component seams: `db` owns the entity
//! lifecycles, `api` exposes them over HTTP, `poller` drives the periodic
//! fetch-and-dispatch sweep, and `bot` is the chat command frontend.

pub mod api;
pub mod bot;
pub mod checkpoint;
pub mod config;
pub mod db;
pub mod feed;
pub mod notify;
pub mod poller;
