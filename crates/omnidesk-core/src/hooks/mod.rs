//! Automation handoff.
//!
//! The flow executor is an external collaborator. Adapters hand persisted
//! inbound messages to it through [`AutomationHook`]; callers catch and log
//! hook errors so downstream automation can never fail message ingestion.

use async_trait::async_trait;

use crate::types::{Conversation, Message};

/// Downstream automation seam, invoked after an inbound message persists.
#[async_trait]
pub trait AutomationHook: Send + Sync {
    /// Hand a persisted inbound message to the flow executor.
    ///
    /// # Errors
    ///
    /// Implementations may fail freely; callers swallow the error.
    async fn message_received(
        &self,
        conversation: &Conversation,
        message: &Message,
    ) -> anyhow::Result<()>;
}

/// Hook that does nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullHook;

#[async_trait]
impl AutomationHook for NullHook {
    async fn message_received(
        &self,
        _conversation: &Conversation,
        _message: &Message,
    ) -> anyhow::Result<()> {
        Ok(())
    }
}
