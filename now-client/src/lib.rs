//! # now-client
//!
//! Async client engine for NOW-proto.
//!
//! This crate provides:
//! - Capability negotiation over any tokio byte stream
//! - A single-task worker that owns the transport and all correlation state
//! - Execution sessions, message boxes, window recording and RDM sessions
//! - Heartbeat supervision
//! - An RDM host for the server side of the RDM sub-protocol
//! - YAML/env configuration

pub mod channel;
pub mod client;
mod command;
pub mod config;
pub mod error;
pub mod exec;
pub mod host;
pub mod msgbox;
pub mod negotiate;
pub mod rdm;
mod worker;

pub use channel::{EncodedMessage, NowChannel, Transport};
pub use client::NowClient;
pub use config::{ClientConfig, Config, ConfigError};
pub use error::ClientError;
pub use exec::{CancelOutcome, ExecEvent, ExecRequest, ExecSession, ExecState};
pub use host::{HostEvent, HostHandle, RdmHost};
pub use msgbox::PendingMsgBox;
pub use negotiate::{accept_client, negotiate};
pub use rdm::{RdmCapabilities, RdmSession, RdmSessionState};
pub use worker::HEARTBEAT_LEEWAY;
