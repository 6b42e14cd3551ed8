//! Process VM for the Composita component language.
//!
//! Components instantiate, run their lifecycle sections, exchange messages
//! through typed interfaces and coordinate through one exclusive lock, all
//! interleaved one instruction per scheduler turn on a single thread.

pub mod active;
pub mod builder;
pub mod config;
pub mod error;
pub mod evalstack;
pub mod il;
pub mod il_text;
pub mod interpreter;
pub mod memory;
pub mod rng;
pub mod runtime;
pub mod scheduler;
pub mod syscall_bridge;
pub mod value;

#[cfg(test)]
mod integration_tests;

// Re-export commonly used types
pub use builder::{Code, ComponentBuilder, ImplementationBuilder, ProcedureBuilder, ProgramBuilder};
pub use config::RuntimeConfig;
pub use error::{VmError, VmResult};
pub use il::{Instruction, Program, TypeDescriptor};
pub use interpreter::{ExecutionResult, Interpreter};
pub use runtime::{HaltHandle, Runtime};
pub use value::{ComponentPointer, Pointer, ServicePointer, Value};

pub use composita_syscall::SystemCallOperator;
