//! Error types for graph editing and template registration

use crate::node::NodeHandle;
use crate::template::TemplateId;
use thiserror::Error;

/// Result type for netlist operations
pub type Result<T> = std::result::Result<T, NetlistError>;

/// Errors returned by netlist mutations. None of them leave the graph
/// partially modified.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NetlistError {
    /// Handle refers to a node that was deleted, or was never created here
    #[error("Invalid node handle: {0:?}")]
    InvalidHandle(NodeHandle),

    /// Slot index past the node's declared slot count
    #[error("Slot {slot} out of range (node has {count})")]
    SlotOutOfRange { slot: u32, count: u32 },

    /// Destination input already has a driver
    #[error("Input slot {slot} is already driven")]
    SlotOccupied { slot: u32 },

    /// No wire matches the requested endpoints
    #[error("No such wire")]
    WireNotFound,

    /// Source and destination are the same node
    #[error("Cannot wire a node to itself")]
    SelfConnection,

    /// Compound kind names a template that is not registered
    #[error("Unknown template: {0:?}")]
    UnknownTemplate(TemplateId),

    /// Template body is inconsistent
    #[error("Malformed template: {0}")]
    MalformedTemplate(String),
}
