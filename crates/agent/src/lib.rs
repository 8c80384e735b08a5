//! Conversational registration agent.
//!
//! Each chat turn runs a constrained loop:
//! 1. **Decide** (`llm`) - the reasoning oracle either replies or asks for one action
//! 2. **Guardrails** (`guardrails`) - placeholder, completeness and field checks
//! 3. **Action execution** (`actions`, `tools`) - store operations behind typed outcomes
//! 4. **Finish** - the oracle phrases the outcome; relay-marked text reaches the user verbatim
//!
//! Session continuity lives in `session`; the loop itself in `runtime`.
//!
//! The oracle is strictly a translator. It never decides whether data is valid or
//! whether a record may be written; those checks run procedurally before the store
//! is touched.

pub mod actions;
pub mod guardrails;
pub mod llm;
pub mod runtime;
pub mod session;
pub mod tools;

pub use guardrails::GuardrailPolicy;
pub use llm::{OllamaOracle, OracleDecision, OracleError, OracleReply, ReasoningOracle};
pub use runtime::{ChatError, DialogueOrchestrator, FALLBACK_REPLY};
pub use session::{InMemorySessionStore, SessionGate, SessionId, SessionStore};
pub use tools::{ActionCall, ActionName, ActionOutcome, ActionRegistry, ActionSpec};
