//! Text chat relay over a stream (TCP) and a datagram (UDP) transport.
//!
//! Stream clients pick a unique username during a line-based handshake and
//! then exchange chat lines, private messages and commands. Datagram senders
//! are attached to an already-registered username by their origin address.
//!
//! - [`registry`] keeps the directory of connected identities behind one lock.
//! - [`session`] runs the per-connection handshake, message loop and teardown.
//! - [`datagram`] demultiplexes datagrams and binds senders to identities.
//! - [`dispatcher`] implements broadcast, private delivery and `/users`.
//! - [`lifecycle`] and [`server`] bind the transports and orchestrate shutdown.
//! - [`config`], [`logging`], [`console`], [`cli`] and [`client`] are the
//!   process plumbing around the relay.

pub mod cli;
pub mod client;
pub mod config;
pub mod console;
pub mod datagram;
pub mod dispatcher;
pub mod error;
pub mod lifecycle;
pub mod logging;
pub mod message;
pub mod registry;
pub mod server;
pub mod session;
