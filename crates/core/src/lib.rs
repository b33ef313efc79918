//! Domain types and rules shared by the storage layer and the HTTP application.
//!
//! Nothing in this crate touches I/O: state transitions, audience matching and
//! payment status mapping are plain functions so they can be checked in isolation.

pub mod company;
pub mod invitation;
pub mod jobs;
pub mod ledger;
pub mod notification;
pub mod payment;
