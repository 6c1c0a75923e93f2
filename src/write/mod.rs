//! Optimistic write flow: permission check, build, sign, local commit,
//! publish, and the pending-write lifecycle that tracks confirmation.

pub mod collaborators;
pub mod flow;

pub use collaborators::{
    Clock, DestinationPublisher, FanoutPublisher, NoopPublisher, NoopSigner, Publisher, Signer,
    SystemClock,
};
pub use flow::{
    CreateReaction, CreateReply, CreateReport, CreateThread, WriteFlowService, WriteOutcome,
    WriteResult, DEFAULT_REPORT_LABEL,
};
