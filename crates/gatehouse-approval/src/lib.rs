//! Human-in-the-loop approval channel.
//!
//! Decouples the dispatch path from an arbitrary approver: pending calls are
//! enqueued with a single-use reply rendezvous, and a consumer answers them
//! in arrival order. The channel itself imposes no timeout — the caller's
//! deadline is authoritative.

mod approver;
mod channel;

pub use approver::ConsoleApprover;
pub use channel::{approval_channel, AllowAll, ApprovalReceiver, ApprovalRequest, QueueInterceptor};
