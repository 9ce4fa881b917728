//! Clients for the external services the church app is built on.
//!
//! - `ApiClient`: the Firestore document database (REST)
//! - `GmailClient`: transactional email via Gmail `messages.send`
//! - `PaymentsClient`: payment intent creation for event registration
//! - `PlacesClient`: address autocomplete and structured address lookup
//!
//! All of them authenticate with the OAuth access token of the signed-in
//! user, except Places which uses an API key.

pub mod client;
pub mod error;
pub mod firestore;
pub mod gmail;
pub mod payments;
pub mod places;

pub use client::{collections, ApiClient, DocumentWriter};
pub use error::ApiError;
pub use gmail::{EmailMessage, EmailTransport, GmailClient};
pub use payments::{PaymentIntent, PaymentIntentRequest, PaymentsClient};
pub use places::{PlacesClient, Prediction};
