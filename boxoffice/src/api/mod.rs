//! HTTP handlers, one module per resource.
//!
//! Handlers only translate between JSON and the services in [`crate::app`];
//! every decision lives in the services.

pub mod admin;
pub mod jobs;
pub mod payments;
pub mod reservations;
pub mod tickets;
pub mod tiers;
