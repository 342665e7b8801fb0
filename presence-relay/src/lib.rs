//! Multi-user chat relay with presence tracking, over TCP or UDP.
//!
//! Each module focuses on a concrete responsibility:
//!
//! - [`codec`] encodes and decodes the `[alias] payload` line protocol and
//!   its `__HELLO__` / `__LEAVE__` / `__USERS__` control payloads.
//! - [`registry`] maps live peers to their aliases behind a single lock.
//! - [`broadcast`] fans a frame out to every registered peer except the
//!   sender, isolating per-recipient failures.
//! - [`server`] runs the per-connection (TCP) or per-datagram (UDP)
//!   lifecycle: registration, presence seed, join/leave announcements.
//! - [`presence`] keeps a client's local view of who is online.
//! - [`client`], [`commands`] and [`palette`] make up the terminal client.
//! - [`cli`] parses the command-line interface for both modes.

pub mod broadcast;
pub mod cli;
pub mod client;
pub mod codec;
pub mod commands;
pub mod palette;
pub mod presence;
pub mod registry;
pub mod server;
