#![deny(unsafe_code)]

//! Terminal chat front end for a Frappe/ERPNext knowledge backend.

/// Chat domain: conversation state, turn lifecycle and the controller.
pub mod chat;
/// Command line entry points.
pub mod cli;
/// Settings persistence.
pub mod settings;
