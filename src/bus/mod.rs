//! Messaging: the plain pub/sub substrate (`base`), the wire envelope
//! (`envelope`), and the phase-aware priority bus built on top (`enhanced`).

pub mod base;
pub mod enhanced;
pub mod envelope;

pub use base::{BaseMessageBus, BusEvent as BaseBusEvent, Handler};
pub use enhanced::{
    ApprovalDecision, ApprovalRequest, ApprovalStatus, BusEvent as EnhancedBusEvent, BusSnapshot, DeadLetterEntry,
    EnhancedMessageBus, Metrics, PhaseTransitionOutcome, QueueStats,
};
pub use envelope::{MessageEnvelope, MessageKind};
