//! # Omnidesk Gateway
//!
//! Webhook termination and realtime fan-out for the Omnidesk omnichannel
//! inbox.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod broadcast;
mod server;
mod twilio_sig;

pub use broadcast::{ClientInterest, WsBroadcaster};
pub use server::{AppState, GatewayError, router, serve};
pub use twilio_sig::validate as validate_twilio_signature;
