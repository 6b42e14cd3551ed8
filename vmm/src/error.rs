use composita_syscall::SysError;
use thiserror::Error;

/// Errors that abort a run.
///
/// Every variant is fatal to the interpreting step; the scheduler stops and
/// `Runtime::execute` returns the error.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum VmError {
    /// The IL broke a contract a correct code generator never breaks.
    #[error("malformed IL: {0}")]
    MalformedIl(String),
    #[error("type mismatch: {0}")]
    TypeMismatch(String),
    #[error("unsupported: {0}")]
    Unsupported(String),
    #[error("{}", assertion_message(.code))]
    Assertion { code: Option<i64> },
    #[error("Halt called. Id: {0}")]
    Halt(i64),
    #[error("division by zero")]
    DivisionByZero,
    #[error("evaluation stack underflow")]
    StackUnderflow,
    #[error("invalid pointer: no active value at address {0}")]
    InvalidPointer(usize),
    #[error("connection error: {0}")]
    Connection(String),
    #[error("turn limit of {0} exceeded")]
    TurnLimitExceeded(u64),
    #[error("system call failed: {0}")]
    SystemCall(SysError),
}

fn assertion_message(code: &Option<i64>) -> String {
    match code {
        Some(code) => format!("Assertion failed. Code {}.", code),
        None => "Assertion failed.".to_string(),
    }
}

impl From<SysError> for VmError {
    fn from(err: SysError) -> Self {
        match err {
            SysError::AssertionFailed { code } => VmError::Assertion { code },
            SysError::Halted(code) => VmError::Halt(code),
            SysError::Unsupported(message) => VmError::Unsupported(message),
            other => VmError::SystemCall(other),
        }
    }
}

pub type VmResult<T> = Result<T, VmError>;
