//! # rulebridge-domain
//!
//! Pure domain model for the rulebridge connection core.
//!
//! ## Responsibilities
//! - Foundational types: error conventions, timestamps
//! - Define **connection statuses** (`startup`, `setup`, …, `shutdown`)
//! - Define the **status transition table** and its request flags
//! - Define **status events** published when a connection settles
//!
//! ## Dependency rule
//! This crate has **no internal dependencies**.
//! It must never import anything from `app`, adapters, or external IO crates.
//! All IO boundaries are expressed as traits in the `app` crate (ports).

pub mod error;
pub mod time;

pub mod connection_status;
pub mod event;
pub mod status_transitions;
