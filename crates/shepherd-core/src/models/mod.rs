//! Data models for church records.
//!
//! Records live in the document database and are plain serde structs with
//! camelCase wire names:
//!
//! - `Member`, `Family`, `Address`: people and households
//! - `District`: pastoral-care groups and member assignment
//! - `Ministry`: serving teams
//! - `Visitor`, `PipelineStage`: connect-card follow-up pipeline
//! - `Event`, `Registration`, `Checkout`: events with paid registration
//! - `DirectMessage`, `Notification`: in-app messaging

pub mod district;
pub mod event;
pub mod message;
pub mod ministry;
pub mod person;
pub mod visitor;

pub use district::{assign_districts, Assignment, AssignmentStrategy, District, LetterRange};
pub use event::{Checkout, Event, LineItem, Registration, RegistrationStatus};
pub use message::{DirectMessage, Notification};
pub use ministry::Ministry;
pub use person::{sort_members, Address, Family, Member};
pub use visitor::{move_visitor, PipelineBoard, PipelineStage, Visitor, STAGE_PATCH_TIMESTAMPS};
