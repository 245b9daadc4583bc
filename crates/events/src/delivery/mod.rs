//! External delivery channels for job results.
//!
//! Only webhooks are supported; the signing helpers are shared so that a
//! future channel can reuse them.

pub mod signing;
pub mod webhook;
