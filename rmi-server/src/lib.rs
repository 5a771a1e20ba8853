//! # rmi-server: device-resident RMI command server
//!
//! Serves the length-prefixed RMI command protocol to one desktop
//! client at a time: authenticated sessions, idle heartbeats, file
//! transfer, key injection, screen capture, and self-replacement with
//! in-place restart.

pub mod config;
pub mod fs_ops;
pub mod input;
pub mod screencap;
pub mod server;
pub mod session;
