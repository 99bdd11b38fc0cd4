//! Credential-capture kernel for the Duux setup flow.
//!
//! The Duux mobile app talks to the cloud API with a bearer token the
//! vendor never exposes. This crate captures that token transparently:
//! it runs an intercepting proxy (mitmdump) with a small capture addon
//! attached, the user points their phone at the proxy, and the first
//! request to the device status endpoint yields the device id and token.
//!
//! Pieces:
//!
//! - [`ports`] — ephemeral port allocation for the proxy
//! - [`matcher`] — the detection rules (host, bearer header, status path)
//! - [`handoff`] — single-slot first-write-wins credential hand-off
//!   (in-memory and marker-file variants)
//! - [`manager`] — proxy process lifecycle (start, grace-period health
//!   check, graceful/forced stop, bounded credential wait)
//! - [`config`] — TOML-backed capture settings
//!
//! One capture session at a time; every exit path tears the proxy down
//! and clears the hand-off slot.

pub mod addon;
pub mod config;
pub mod error;
pub mod handoff;
pub mod manager;
pub mod matcher;
pub mod ports;

pub use config::CaptureConfig;
pub use error::{CaptureError, Result};
pub use handoff::{FileHandoff, Handoff, MemoryHandoff, default_handoff_path};
pub use manager::{ProxyEndpoint, ProxyManager};
pub use matcher::{CaptureMatcher, Credential, DUUX_API_HOST};
pub use ports::{find_free_port, resolve_port};
