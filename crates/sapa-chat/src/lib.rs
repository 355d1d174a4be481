//! Conversational engine for Sapa.
//!
//! Ties retrieval, prompt assembly, the tool-calling generation loop,
//! follow-up suggestions and session persistence into a single
//! [`Orchestrator::handle_turn`] call.

pub mod error;
pub mod followup;
pub mod orchestrator;
pub mod prompt;

pub use error::ChatError;
pub use followup::FollowUpGenerator;
pub use orchestrator::{Orchestrator, SourceRef, TurnOutcome, TurnResponse};
