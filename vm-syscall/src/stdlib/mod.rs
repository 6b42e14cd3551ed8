//! Built-in system calls, grouped by concern.

/// Declares a unit struct implementing [`SystemCall`](crate::SystemCall)
/// for one (operator, arity) pair, with the argument count checked up front.
macro_rules! system_call {
    ($name:ident, $operator:ident, $arity:expr, $description:expr, |$handle:ident, $args:ident| $body:expr) => {
        pub struct $name;

        impl $crate::SystemCall for $name {
            fn call(
                &self,
                $handle: &mut dyn $crate::SystemHandle,
                $args: &mut [$crate::SysArg],
            ) -> $crate::SysResult {
                if $args.len() != $arity {
                    return Err($crate::SysError::ArgumentCount {
                        operator: $crate::SystemCallOperator::$operator,
                        expected: $arity,
                        got: $args.len(),
                    });
                }
                $body
            }

            fn operator(&self) -> $crate::SystemCallOperator {
                $crate::SystemCallOperator::$operator
            }

            fn arity(&self) -> usize {
                $arity
            }

            fn description(&self) -> Option<&str> {
                Some($description)
            }
        }
    };
}

pub mod control;
pub mod convert;
pub mod io;
pub mod math;

use crate::{SysArg, SysError, SyscallRegistry, SystemCallOperator};

pub fn register_all(registry: &mut SyscallRegistry) {
    io::register_io_calls(registry);
    math::register_math_calls(registry);
    convert::register_convert_calls(registry);
    control::register_control_calls(registry);
}

pub fn available_modules() -> Vec<&'static str> {
    vec!["io", "math", "convert", "control"]
}

pub fn register_modules(registry: &mut SyscallRegistry, modules: &[&str]) {
    for module in modules {
        match *module {
            "io" => io::register_io_calls(registry),
            "math" => math::register_math_calls(registry),
            "convert" => convert::register_convert_calls(registry),
            "control" => control::register_control_calls(registry),
            _ => log::warn!("unknown system call module '{}'", module),
        }
    }
}

pub(crate) fn expect_integer(operator: SystemCallOperator, arg: &SysArg) -> Result<i64, SysError> {
    arg.value().as_integer().ok_or(SysError::ArgumentType {
        operator,
        expected: "INTEGER",
        got: arg.value().type_name(),
    })
}

pub(crate) fn expect_float(operator: SystemCallOperator, arg: &SysArg) -> Result<f64, SysError> {
    arg.value().as_float().ok_or(SysError::ArgumentType {
        operator,
        expected: "REAL",
        got: arg.value().type_name(),
    })
}

pub(crate) fn expect_boolean(operator: SystemCallOperator, arg: &SysArg) -> Result<bool, SysError> {
    arg.value().as_boolean().ok_or(SysError::ArgumentType {
        operator,
        expected: "BOOLEAN",
        got: arg.value().type_name(),
    })
}
