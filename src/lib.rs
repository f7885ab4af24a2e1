//! Server-side async WebSockets implementation for the Tokio stack.
//!
//! This crate implements the server half of [RFC 6455](https://datatracker.ietf.org/doc/html/rfc6455):
//! the opening handshake, frame encoding/decoding, masking, fragmentation
//! and control-frame handling, on top of a plain `tokio::net::TcpStream`.
//!
//! Bind a [`listener::WsListener`], register handlers on each accepted
//! [`connection::Connection`], and call `run` to drive it.

pub mod close;
pub mod config;
pub mod connection;
pub mod decoder;
pub mod encoder;
pub mod error;
pub mod frame;
pub mod handshake;
pub mod listener;
pub mod utf8;
