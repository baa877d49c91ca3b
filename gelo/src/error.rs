//! Error taxonomy and the control signals threaded through evaluation.

use thiserror::Error;

use crate::list::List;
use crate::span::Pos;

/// Identifier of a VM inside its [`Runtime`](crate::Runtime).
pub type VmId = u64;

/// Id used for errors raised by host code outside of any VM.
pub const HOST_ID: VmId = 0;

/// A syntax error with the position where the parser stopped.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message} at {pos}")]
pub struct ParseError {
    pub message: String,
    pub pos: Pos,
}

impl ParseError {
    pub fn new(message: impl Into<String>, pos: Pos) -> Self {
        Self {
            message: message.into(),
            pos,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeErrorKind {
    Generic,
    TypeMismatch,
    Argument,
    VariableUndefined,
    Killed,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error("Syntax error: {0}")]
    Syntax(#[from] ParseError),

    #[error("Runtime error: {message}")]
    Runtime {
        kind: RuntimeErrorKind,
        from: VmId,
        message: String,
    },

    /// Static misuse of the embedding API, such as driving a destroyed VM.
    #[error("Programmer error: {message}")]
    Programmer { from: VmId, message: String },

    /// Broken internal invariant.
    #[error("System error: {message}")]
    System { from: VmId, message: String },
}

impl Error {
    pub fn runtime(from: VmId, message: impl Into<String>) -> Self {
        Error::Runtime {
            kind: RuntimeErrorKind::Generic,
            from,
            message: message.into(),
        }
    }

    pub fn type_mismatch(
        from: VmId,
        expected: impl std::fmt::Display,
        got: impl std::fmt::Display,
    ) -> Self {
        Error::Runtime {
            kind: RuntimeErrorKind::TypeMismatch,
            from,
            message: format!("Type mismatch. Expected: {expected} Got: {got}"),
        }
    }

    pub fn argument(from: VmId, name: &str, expected: &str, got: &List) -> Self {
        let got = if got.is_empty() {
            "no arguments".to_string()
        } else {
            got.iter()
                .map(|w| String::from_utf8_lossy(w.ser().as_bytes()).into_owned())
                .collect::<Vec<_>>()
                .join(" ")
        };
        Error::Runtime {
            kind: RuntimeErrorKind::Argument,
            from,
            message: format!("Illegal arguments. {name} expected: {expected} Got: {got}"),
        }
    }

    pub fn undefined(from: VmId, name: &[u8]) -> Self {
        let name = if name.is_empty() {
            "<<the null string>>".into()
        } else {
            String::from_utf8_lossy(name)
        };
        Error::Runtime {
            kind: RuntimeErrorKind::VariableUndefined,
            from,
            message: format!("Undefined variable: {name}"),
        }
    }

    pub fn killed(from: VmId) -> Self {
        Error::Runtime {
            kind: RuntimeErrorKind::Killed,
            from,
            message: "VM killed".to_string(),
        }
    }

    pub fn programmer(from: VmId, message: impl Into<String>) -> Self {
        Error::Programmer {
            from,
            message: message.into(),
        }
    }

    pub fn system(from: VmId, message: impl Into<String>) -> Self {
        Error::System {
            from,
            message: message.into(),
        }
    }

    /// Whether scripts may catch this error at an invocation boundary.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Error::Syntax(_) | Error::Runtime { .. })
    }

    pub fn kind(&self) -> Option<RuntimeErrorKind> {
        match self {
            Error::Runtime { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    pub fn from_id(&self) -> VmId {
        match self {
            Error::Syntax(_) => HOST_ID,
            Error::Runtime { from, .. }
            | Error::Programmer { from, .. }
            | Error::System { from, .. } => *from,
        }
    }

    pub fn message(&self) -> String {
        match self {
            Error::Syntax(e) => e.to_string(),
            Error::Runtime { message, .. }
            | Error::Programmer { message, .. }
            | Error::System { message, .. } => message.clone(),
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Error::Syntax(_) => "*SYNTAX-ERROR*",
            _ => "*RUNTIME-ERROR*",
        }
    }

    /// Script-level equality: same category and same message.
    pub fn same_as(&self, other: &Error) -> bool {
        std::mem::discriminant(self) == std::mem::discriminant(other)
            && self.message() == other.message()
    }
}

/// Non-local exits out of the evaluator.
///
/// `Halt` and `Kill` are not data errors: they pass through every script
/// level boundary and are only resolved by the VM entry points.
#[derive(Debug, Clone)]
pub enum Signal {
    Error(Error),
    Halt(List),
    Kill,
}

impl From<Error> for Signal {
    /// A killed nested run keeps unwinding as a kill.
    fn from(e: Error) -> Self {
        match e.kind() {
            Some(RuntimeErrorKind::Killed) => Signal::Kill,
            _ => Signal::Error(e),
        }
    }
}

impl From<ParseError> for Signal {
    fn from(e: ParseError) -> Self {
        Signal::Error(Error::Syntax(e))
    }
}

pub type Flow<T> = Result<T, Signal>;
