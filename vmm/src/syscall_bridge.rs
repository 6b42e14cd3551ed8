//! Conversions between VM values and system call values.

use composita_syscall::{SysArg, SysValue};

use crate::error::{VmError, VmResult};
use crate::evalstack::StackValue;
use crate::value::{Value, VariableCell};

pub fn to_sys_value(value: &Value) -> VmResult<SysValue> {
    match value {
        Value::Integer(i) => Ok(SysValue::Integer(*i)),
        Value::Float(f) => Ok(SysValue::Float(*f)),
        Value::Text(s) => Ok(SysValue::Text(s.clone())),
        Value::Character(c) => Ok(SysValue::Character(*c)),
        Value::Boolean(b) => Ok(SysValue::Boolean(*b)),
        Value::Undefined => Ok(SysValue::Undefined),
        Value::Component(_) | Value::Service(_) => Err(VmError::Unsupported(format!(
            "{} cannot be passed to a system call",
            value
        ))),
    }
}

pub fn from_sys_value(value: SysValue) -> Value {
    match value {
        SysValue::Integer(i) => Value::Integer(i),
        SysValue::Float(f) => Value::Float(f),
        SysValue::Text(s) => Value::Text(s),
        SysValue::Character(c) => Value::Character(c),
        SysValue::Boolean(b) => Value::Boolean(b),
        SysValue::Undefined => Value::Undefined,
    }
}

/// Turns popped stack entries into call arguments. Variable entries keep
/// their cell so assignments can be written back.
pub fn to_sys_args(entries: Vec<StackValue>) -> VmResult<(Vec<SysArg>, Vec<Option<VariableCell>>)> {
    let mut args = Vec::with_capacity(entries.len());
    let mut cells = Vec::with_capacity(entries.len());
    for entry in entries {
        match entry {
            StackValue::Value(value) => {
                args.push(SysArg::from_value(to_sys_value(&value)?));
                cells.push(None);
            }
            StackValue::Variable(cell) => {
                let value = to_sys_value(&cell.borrow().value)?;
                args.push(SysArg::from_variable(value));
                cells.push(Some(cell));
            }
            other => {
                return Err(VmError::MalformedIl(format!(
                    "{:?} is not a system call argument",
                    other
                )));
            }
        }
    }
    Ok((args, cells))
}

/// Stores what the call assigned to variable arguments.
pub fn write_back(args: &[SysArg], cells: &[Option<VariableCell>]) -> VmResult<()> {
    for (arg, cell) in args.iter().zip(cells) {
        if let (Some(value), Some(cell)) = (arg.assignment(), cell) {
            cell.borrow_mut().store(from_sys_value(value.clone()))?;
        }
    }
    Ok(())
}
