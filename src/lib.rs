//! Single-shot IEC 60870-5-104 control command client.
//!
//! Connects to an RTU, activates data transfer, issues one single or double
//! command at a given information object address and waits for the RTU's
//! activation confirmation. The [`issue::CommandIssuer`] drives the whole
//! sequence; the [`protocol`] tree provides the 104 transport and codec
//! underneath it.

pub mod classifier;
pub mod config;
pub mod issue;
pub mod latch;
pub mod protocol;

pub use self::{
    classifier::EventClassifier,
    config::IssueConfig,
    issue::{CommandIssuer, CommandKind, CommandRequest, IssueError, IssuePhase},
    latch::{CommandOutcome, Latch, OutcomeCell},
};
