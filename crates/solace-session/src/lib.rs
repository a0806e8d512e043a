//! Chat session engine for Solace.
//!
//! Holds the reducer-driven session state machine, the streaming
//! response protocol spoken with inference backends, the follow-up
//! suggestion engine, and the controller that ties them to the
//! conversation store and the voice loop.

pub mod controller;
pub mod error;
pub mod protocol;
pub mod state;
pub mod suggestions;

pub use controller::{ChatSessionController, MAX_MESSAGE_CHARS};
pub use error::SessionError;
pub use protocol::{
    InferenceRequest, InferenceService, ReflectiveResponder, ScriptedInference, StreamEvent,
};
pub use state::{reduce, Action, ChatState, MessagePatch};
pub use suggestions::SuggestionEngine;
