//! Loopback HTTP callback for out-of-flow credential capture.
//!
//! When the capture proxy runs on the user's own machine (via the
//! `duux-extract` tool) rather than next to the setup flow, the tool
//! pushes the captured credential back over HTTP: the flow starts a
//! [`CallbackServer`] on an ephemeral loopback port, the tool POSTs
//! `{device_id, jwt_token}` to `/credentials`, and the waiting flow is
//! signalled through the same hand-off contract the in-process variant
//! uses.

pub mod error;
pub mod routes;
pub mod server;

pub use error::{CallbackError, Result};
pub use routes::{AppState, StatusEnvelope, receive_credentials, router};
pub use server::CallbackServer;
