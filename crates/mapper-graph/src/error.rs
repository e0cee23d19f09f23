use thiserror::Error;

/// Malformed-message / unknown-property failures (§7 "Protocol errors").
/// The bus-dispatch boundary in the root crate logs these at `warn` and
/// discards the message; nothing here ever propagates to a `poll` caller.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("unknown property key {0:?}")]
    UnknownProperty(String),
    #[error("message on path {0:?} is missing required field {1:?}")]
    MissingField(String, &'static str),
    #[error("type mismatch on path {0:?}: expected {1}")]
    TypeMismatch(String, &'static str),
}
