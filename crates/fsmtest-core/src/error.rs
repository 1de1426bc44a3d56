use thiserror::Error;

/// Errors surfaced by model parsing and by operations with structural
/// preconditions. Algorithmic dead-ends (e.g. a distinguishing trace that
/// is expected but cannot be derived) are not errors: those paths log a
/// diagnostic and return an empty trace instead.
#[derive(Debug, Error)]
pub enum FsmError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed model file: {0}")]
    Parse(String),

    #[error("invalid JSON model: {0}")]
    Json(#[from] serde_json::Error),

    #[error("undefined {kind} symbol `{name}`")]
    UndefinedSymbol { kind: &'static str, name: String },

    #[error("cannot build a DFSM table for a nondeterministic FSM")]
    Nondeterministic,

    #[error("FSM is not observable")]
    NotObservable,
}
