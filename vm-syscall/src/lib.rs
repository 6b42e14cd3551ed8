//! Composita system calls
//!
//! Built-in operations the interpreter delegates to through the SYSTEM-CALL
//! instruction: output, assertions, arithmetic helpers, conversions and
//! randomness. Calls are looked up by operator and argument count, so the
//! one and two argument forms of INC, DEC and ASSERT are separate entries.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use thiserror::Error;

pub mod stdlib;

/// Operators the IL can name in a SYSTEM-CALL instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SystemCallOperator {
    Write,
    WriteLine,
    WriteHex,
    Assert,
    Halt,
    Inc,
    Dec,
    Length,
    Sqrt,
    Sin,
    Cos,
    Tan,
    ArcSin,
    ArcCos,
    ArcTan,
    Min,
    Max,
    ToCharacter,
    ToText,
    ToInteger,
    ToReal,
    Random,
    Passivate,
    Count,
    LoadForEachDesignators,
}

impl SystemCallOperator {
    pub const ALL: [SystemCallOperator; 25] = [
        Self::Write,
        Self::WriteLine,
        Self::WriteHex,
        Self::Assert,
        Self::Halt,
        Self::Inc,
        Self::Dec,
        Self::Length,
        Self::Sqrt,
        Self::Sin,
        Self::Cos,
        Self::Tan,
        Self::ArcSin,
        Self::ArcCos,
        Self::ArcTan,
        Self::Min,
        Self::Max,
        Self::ToCharacter,
        Self::ToText,
        Self::ToInteger,
        Self::ToReal,
        Self::Random,
        Self::Passivate,
        Self::Count,
        Self::LoadForEachDesignators,
    ];

    /// Source-level spelling of the operator.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Write => "WRITE",
            Self::WriteLine => "WRITELINE",
            Self::WriteHex => "WRITEHEX",
            Self::Assert => "ASSERT",
            Self::Halt => "HALT",
            Self::Inc => "INC",
            Self::Dec => "DEC",
            Self::Length => "LENGTH",
            Self::Sqrt => "SQRT",
            Self::Sin => "SIN",
            Self::Cos => "COS",
            Self::Tan => "TAN",
            Self::ArcSin => "ARCSIN",
            Self::ArcCos => "ARCCOS",
            Self::ArcTan => "ARCTAN",
            Self::Min => "MIN",
            Self::Max => "MAX",
            Self::ToCharacter => "CHARACTER",
            Self::ToText => "TEXT",
            Self::ToInteger => "INTEGER",
            Self::ToReal => "REAL",
            Self::Random => "RANDOM",
            Self::Passivate => "PASSIVATE",
            Self::Count => "COUNT",
            Self::LoadForEachDesignators => "LOADFOREACHDESIGNATORS",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|op| op.name() == name)
    }
}

impl fmt::Display for SystemCallOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A built-in value as seen by a system call.
#[derive(Debug, Clone, PartialEq)]
pub enum SysValue {
    Integer(i64),
    Float(f64),
    Text(String),
    Character(char),
    Boolean(bool),
    Undefined,
}

impl SysValue {
    pub fn type_name(&self) -> &'static str {
        match self {
            SysValue::Integer(_) => "INTEGER",
            SysValue::Float(_) => "REAL",
            SysValue::Text(_) => "TEXT",
            SysValue::Character(_) => "CHARACTER",
            SysValue::Boolean(_) => "BOOLEAN",
            SysValue::Undefined => "UNDEFINED",
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            SysValue::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            SysValue::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_boolean(&self) -> Option<bool> {
        match self {
            SysValue::Boolean(b) => Some(*b),
            _ => None,
        }
    }
}

/// One argument of a system call.
///
/// Arguments that were loaded from a variable cell can be assigned to; the
/// interpreter writes the assignment back into the cell after the call.
#[derive(Debug, Clone, PartialEq)]
pub struct SysArg {
    value: SysValue,
    variable: bool,
    assigned: Option<SysValue>,
}

impl SysArg {
    pub fn from_value(value: SysValue) -> Self {
        Self {
            value,
            variable: false,
            assigned: None,
        }
    }

    pub fn from_variable(value: SysValue) -> Self {
        Self {
            value,
            variable: true,
            assigned: None,
        }
    }

    pub fn value(&self) -> &SysValue {
        &self.value
    }

    pub fn is_variable(&self) -> bool {
        self.variable
    }

    pub fn assign(&mut self, operator: SystemCallOperator, value: SysValue) -> Result<(), SysError> {
        if !self.variable {
            return Err(SysError::ArgumentType {
                operator,
                expected: "variable",
                got: self.value.type_name(),
            });
        }
        self.value = value.clone();
        self.assigned = Some(value);
        Ok(())
    }

    /// The value written by the call, if any.
    pub fn assignment(&self) -> Option<&SysValue> {
        self.assigned.as_ref()
    }
}

pub type SysResult = Result<Option<SysValue>, SysError>;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SysError {
    #[error("{operator} expects {expected} argument(s), got {got}")]
    ArgumentCount {
        operator: SystemCallOperator,
        expected: usize,
        got: usize,
    },
    #[error("{operator}: expected {expected} argument, got {got}")]
    ArgumentType {
        operator: SystemCallOperator,
        expected: &'static str,
        got: &'static str,
    },
    #[error("{}", assertion_message(.code))]
    AssertionFailed { code: Option<i64> },
    #[error("Halt called. Id: {0}")]
    Halted(i64),
    #[error("{operator}: {message}")]
    Runtime {
        operator: SystemCallOperator,
        message: String,
    },
    #[error("no system call {operator} taking {arity} argument(s)")]
    NotFound {
        operator: SystemCallOperator,
        arity: usize,
    },
    #[error("{0}")]
    Unsupported(String),
}

fn assertion_message(code: &Option<i64>) -> String {
    match code {
        Some(code) => format!("Assertion failed. Code {}.", code),
        None => "Assertion failed.".to_string(),
    }
}

/// Side effects a system call may request from the runtime.
pub trait SystemHandle {
    fn print(&mut self, text: &str);
    /// Uniform sample in `[0, 1)`.
    fn random_unit(&mut self) -> f64;
}

/// A built-in operation callable through SYSTEM-CALL.
pub trait SystemCall: Send + Sync {
    fn call(&self, handle: &mut dyn SystemHandle, args: &mut [SysArg]) -> SysResult;
    fn operator(&self) -> SystemCallOperator;
    fn arity(&self) -> usize;
    fn description(&self) -> Option<&str> {
        None
    }
}

/// System calls keyed by operator and arity.
pub struct SyscallRegistry {
    calls: HashMap<(SystemCallOperator, usize), Arc<dyn SystemCall>>,
}

impl SyscallRegistry {
    pub fn new() -> Self {
        Self {
            calls: HashMap::new(),
        }
    }

    pub fn register<C: SystemCall + 'static>(&mut self, call: C) {
        let key = (call.operator(), call.arity());
        self.calls.insert(key, Arc::new(call));
    }

    pub fn call(
        &self,
        operator: SystemCallOperator,
        handle: &mut dyn SystemHandle,
        args: &mut [SysArg],
    ) -> SysResult {
        if operator == SystemCallOperator::LoadForEachDesignators {
            return Err(SysError::Unsupported(format!(
                "system call {} is not supported",
                operator
            )));
        }
        match self.calls.get(&(operator, args.len())) {
            Some(call) => call.call(handle, args),
            None => Err(SysError::NotFound {
                operator,
                arity: args.len(),
            }),
        }
    }

    pub fn get_call_info(
        &self,
        operator: SystemCallOperator,
        arity: usize,
    ) -> Option<(SystemCallOperator, usize, Option<&str>)> {
        self.calls
            .get(&(operator, arity))
            .map(|c| (c.operator(), c.arity(), c.description()))
    }

    /// Registered (operator, arity) pairs in operator order.
    pub fn list_calls(&self) -> Vec<(SystemCallOperator, usize)> {
        let mut keys: Vec<_> = self.calls.keys().copied().collect();
        keys.sort();
        keys
    }

    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        stdlib::register_all(&mut registry);
        registry
    }

    pub fn with_modules(modules: &[&str]) -> Self {
        let mut registry = Self::new();
        stdlib::register_modules(&mut registry, modules);
        registry
    }
}

impl Default for SyscallRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Formats a REAL the way WRITE prints it: integral values without a
/// fraction, non-finite values spelled out.
pub fn format_real(value: f64) -> String {
    if value.is_nan() {
        "NaN".to_string()
    } else if value.is_infinite() {
        if value > 0.0 {
            "Infinity".to_string()
        } else {
            "-Infinity".to_string()
        }
    } else if value == 0.0 {
        "0".to_string()
    } else {
        format!("{}", value)
    }
}
