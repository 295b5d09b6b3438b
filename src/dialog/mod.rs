//! Scripted qualification dialog driven by an LLM with tool calls.

pub mod engine;
pub mod llm;
pub mod script;

pub use engine::{CallOutcome, DialogEngine, DialogTurn};
pub use llm::{ChatApi, ChatClient};
pub use script::ScriptStep;
