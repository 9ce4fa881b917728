//! Bulk messaging to a selected set of members.
//!
//! A broadcast resolves a [`RecipientSelection`] against the member list,
//! drops recipients with no address on the chosen [`Channel`], then delivers
//! through a [`MessageSender`] in fixed-size batches with a pause between
//! them. Progress is published on a `tokio::sync::watch` channel so a
//! renderer can follow along, be hidden, or be dropped without affecting the
//! dispatch.

pub mod dispatcher;
pub mod progress;
pub mod recipients;
pub mod sender;

pub use dispatcher::{
    batch_count, Broadcast, BroadcastHandle, BroadcastOptions, DEFAULT_BATCH_DELAY_MS, DEFAULT_BATCH_SIZE,
};
pub use progress::{BroadcastProgress, BroadcastReport, DeliveryFailure};
pub use recipients::{partition_eligible, RecipientSelection};
pub use sender::{Channel, DeliveryError, DirectMessageSender, EmailSender, MessageSender, OutgoingMessage, Recipient};
