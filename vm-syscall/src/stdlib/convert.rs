//! Type conversion system calls

use std::sync::LazyLock;

use regex::Regex;

use crate::{SysError, SysValue, SyscallRegistry, SystemCallOperator};

use super::expect_integer;

system_call!(ToCharacter, ToCharacter, 1, "Character with the given code point", |_handle, args| {
    let code = expect_integer(SystemCallOperator::ToCharacter, &args[0])?;
    u32::try_from(code)
        .ok()
        .and_then(char::from_u32)
        .map(|c| Some(SysValue::Character(c)))
        .ok_or_else(|| SysError::Runtime {
            operator: SystemCallOperator::ToCharacter,
            message: format!("{} is not a character code", code),
        })
});

system_call!(ToText, ToText, 1, "Text holding a single character", |_handle, args| {
    match args[0].value() {
        SysValue::Character(c) => Ok(Some(SysValue::Text(c.to_string()))),
        other => Err(SysError::ArgumentType {
            operator: SystemCallOperator::ToText,
            expected: "CHARACTER",
            got: other.type_name(),
        }),
    }
});

system_call!(ToInteger, ToInteger, 1, "Integer from a REAL, CHARACTER or TEXT", |_handle, args| {
    match args[0].value() {
        SysValue::Float(f) => Ok(Some(SysValue::Integer(f.trunc() as i64))),
        SysValue::Character(c) => Ok(Some(SysValue::Integer(*c as i64))),
        SysValue::Text(s) => parse_integer(s).map(|i| Some(SysValue::Integer(i))),
        other => Err(SysError::ArgumentType {
            operator: SystemCallOperator::ToInteger,
            expected: "REAL, CHARACTER or TEXT",
            got: other.type_name(),
        }),
    }
});

system_call!(ToReal, ToReal, 1, "REAL from an INTEGER", |_handle, args| {
    let value = expect_integer(SystemCallOperator::ToReal, &args[0])?;
    Ok(Some(SysValue::Float(value as f64)))
});

system_call!(Length, Length, 1, "Number of characters in a TEXT", |_handle, args| {
    match args[0].value() {
        SysValue::Text(s) => Ok(Some(SysValue::Integer(s.chars().count() as i64))),
        other => Err(SysError::ArgumentType {
            operator: SystemCallOperator::Length,
            expected: "TEXT",
            got: other.type_name(),
        }),
    }
});

static LEADING_INTEGER: LazyLock<Result<Regex, regex::Error>> =
    LazyLock::new(|| Regex::new(r"^\s*([+-]?\d+)"));

/// Leading signed decimal integer; surrounding text after the digits is ignored.
fn parse_integer(text: &str) -> Result<i64, SysError> {
    let runtime = |message: String| SysError::Runtime {
        operator: SystemCallOperator::ToInteger,
        message,
    };
    let re = LEADING_INTEGER
        .as_ref()
        .map_err(|e| runtime(e.to_string()))?;
    let digits = re
        .captures(text)
        .and_then(|caps| caps.get(1))
        .ok_or_else(|| runtime(format!("'{}' is not an integer", text)))?;
    digits
        .as_str()
        .parse::<i64>()
        .map_err(|e| runtime(format!("'{}': {}", digits.as_str(), e)))
}

pub fn register_convert_calls(registry: &mut SyscallRegistry) {
    registry.register(ToCharacter);
    registry.register(ToText);
    registry.register(ToInteger);
    registry.register(ToReal);
    registry.register(Length);
}
