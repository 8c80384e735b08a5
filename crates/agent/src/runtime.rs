use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::llm::{
    DecideRequest, FinishRequest, OracleDecision, OracleError, OracleReply, ReasoningOracle,
};
use crate::session::{OracleCheckpoint, Session, SessionGate, SessionId, SessionStore};
use crate::tools::{ActionOutcome, ActionRegistry};

/// Reply sent to the caller when the oracle cannot be reached at all.
pub const FALLBACK_REPLY: &str =
    "Sorry, I'm having trouble responding right now. Please try again in a moment.";

pub const DEFAULT_ORACLE_TIMEOUT: Duration = Duration::from_secs(60);

pub const SYSTEM_INSTRUCTIONS: &str = "You are a helpful assistant that manages user registrations.

RULES:
1. Only call create_registration when you have ALL required values: full_name, email, phone and date_of_birth. Address is optional, but ask for it.
2. If any required value is missing, ask the user for it conversationally. Do not call the action.
3. Never make up, assume or default a value.
4. Never use example values such as 'John Doe', 'john.doe@example.com' or '1234567890'.
5. Never write action calls as JSON in your reply text. Either call the action or ask.

Dates of birth use the YYYY-MM-DD format.

ERROR HANDLING:
- When an action result contains an error starting with 'TELL THE USER:', reply with the text after that marker exactly. Do not paraphrase it.
- Never claim to have information the user has not given you.
- If an email is already registered, ask the user for a different email.";

#[derive(Debug, Error)]
pub enum ChatError {
    #[error(transparent)]
    Oracle(#[from] OracleError),
}

impl ChatError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Oracle(OracleError::Timeout))
    }
}

/// Per-turn control loop: decide, optionally execute one action, finish, record.
pub struct DialogueOrchestrator {
    oracle: Arc<dyn ReasoningOracle>,
    actions: ActionRegistry,
    sessions: Arc<dyn SessionStore>,
    gate: SessionGate,
    instructions: String,
    oracle_timeout: Duration,
}

impl DialogueOrchestrator {
    pub fn new(
        oracle: Arc<dyn ReasoningOracle>,
        actions: ActionRegistry,
        sessions: Arc<dyn SessionStore>,
    ) -> Self {
        Self {
            oracle,
            actions,
            sessions,
            gate: SessionGate::default(),
            instructions: SYSTEM_INSTRUCTIONS.to_string(),
            oracle_timeout: DEFAULT_ORACLE_TIMEOUT,
        }
    }

    pub fn with_oracle_timeout(mut self, timeout: Duration) -> Self {
        self.oracle_timeout = timeout;
        self
    }

    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = instructions.into();
        self
    }

    pub fn sessions(&self) -> &Arc<dyn SessionStore> {
        &self.sessions
    }

    async fn bounded<T>(
        &self,
        call: impl Future<Output = Result<T, OracleError>>,
    ) -> Result<T, OracleError> {
        tokio::time::timeout(self.oracle_timeout, call).await.map_err(|_| OracleError::Timeout)?
    }

    /// Runs one chat turn. Only a failed decision escapes as an error; everything after
    /// an action ran degrades to a reply.
    pub async fn handle_message(
        &self,
        session_id: &SessionId,
        message: &str,
    ) -> Result<String, ChatError> {
        let message = message.trim();
        let _turn = self.gate.acquire(session_id).await;
        let mut session =
            self.sessions.get(session_id).await.unwrap_or_else(|| Session::new(session_id.clone()));

        debug!(event_name = "chat.phase", phase = "await_decision", session_id = %session_id);
        let specs = self.actions.specs();
        let decision = self
            .bounded(self.oracle.decide(DecideRequest {
                instructions: &self.instructions,
                turns: &session.turns,
                checkpoint: session.checkpoint.as_ref(),
                actions: &specs,
                message,
            }))
            .await
            .map_err(|error| {
                warn!(
                    event_name = "chat.oracle.failed",
                    session_id = %session_id,
                    error = %error,
                    "oracle decision failed"
                );
                error
            })?;

        let (reply, checkpoint, action) = match decision {
            OracleDecision::Reply(reply) => {
                debug!(event_name = "chat.phase", phase = "reply_direct", session_id = %session_id);
                (reply.text, reply.checkpoint, None)
            }
            OracleDecision::Act { call, checkpoint } => {
                debug!(
                    event_name = "chat.phase",
                    phase = "execute_action",
                    session_id = %session_id,
                    action = %call.name
                );
                let outcome = self.actions.dispatch(&call).await;
                let result = outcome.encode();

                debug!(event_name = "chat.phase", phase = "await_final_reply", session_id = %session_id);
                let finished = self
                    .bounded(self.oracle.finish(FinishRequest {
                        instructions: &self.instructions,
                        turns: &session.turns,
                        checkpoint: checkpoint.as_ref(),
                        message,
                        call: &call,
                        result: &result,
                    }))
                    .await;

                let (reply, checkpoint) = match finished {
                    Ok(reply) => relay_guard(&outcome, reply),
                    Err(error) => {
                        warn!(
                            event_name = "chat.oracle.finish_failed",
                            session_id = %session_id,
                            error = %error,
                            "falling back to action outcome text"
                        );
                        // The half-finished transcript is dropped; the next turn rebuilds
                        // from recorded turns.
                        (outcome.summary(), None)
                    }
                };
                (reply, checkpoint, Some((call.name, outcome.label())))
            }
        };

        session.record_turn(message, reply.clone());
        session.checkpoint = checkpoint;
        let turns = session.turns.len();
        self.sessions.put(session).await;

        debug!(event_name = "chat.phase", phase = "done", session_id = %session_id);
        match action {
            Some((action, outcome)) => info!(
                event_name = "chat.turn.completed",
                session_id = %session_id,
                turns,
                action = %action,
                outcome,
                "chat turn completed"
            ),
            None => info!(
                event_name = "chat.turn.completed",
                session_id = %session_id,
                turns,
                "chat turn completed"
            ),
        }

        Ok(reply)
    }
}

/// Relay-marked outcomes must reach the user verbatim, whatever the oracle wrote. An
/// overridden reply also drops the checkpoint, which still holds the oracle's wording;
/// the next turn rebuilds from recorded turns instead.
fn relay_guard(
    outcome: &ActionOutcome,
    reply: OracleReply,
) -> (String, Option<OracleCheckpoint>) {
    match outcome.relay_text() {
        Some(relay) if !reply.text.contains(relay) => (relay.to_string(), None),
        _ => (reply.text, reply.checkpoint),
    }
}
