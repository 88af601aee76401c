//! airdac library - synchronization core of a network audio receiver
//!
//! This module exports internal components for integration testing.

pub mod audio;
pub mod cli;
pub mod config;
pub mod error;
pub mod rtp;
pub mod session;
