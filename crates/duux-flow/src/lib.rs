//! Interactive setup flow for the Duux fan.
//!
//! Drives the capture kernel and the validation client through the
//! choose-method → capture → validate → done sequence, with manual entry
//! as the fallback path and capture timeouts surfaced as retry offers.

pub mod error;
pub mod flow;

pub use error::{FlowError, Result};
pub use flow::{
    AlreadyConfigured, ErrorCode, FlowConfig, FlowEvent, FlowState, SetupEntry, SetupFlow,
    SetupMethod,
};
