//! The AI side of the bridge: WebSocket client and wire messages.
//!
//! The AI is a black box that accepts caller audio and emits audio plus
//! turn-taking events. This module owns the connection; audio frames hand
//! off to the egress pump over a single-subscriber channel, and everything
//! else dispatches through the [`AiEventHandler`] trait.

pub mod client;
pub mod messages;

pub use client::{AiClient, AiClientConfig, AiEventHandler, AudioEvent};
