//! Output system calls

use crate::{SysError, SysValue, SyscallRegistry, SystemCallOperator, format_real};

use super::expect_integer;

system_call!(Write, Write, 1, "Print a built-in value", |handle, args| {
    let text = match args[0].value() {
        SysValue::Integer(i) => i.to_string(),
        SysValue::Float(f) => format_real(*f),
        SysValue::Text(s) => s.clone(),
        SysValue::Character(c) => c.to_string(),
        other => {
            return Err(SysError::Unsupported(format!(
                "WRITE of {} is not supported",
                other.type_name()
            )));
        }
    };
    handle.print(&text);
    Ok(None)
});

system_call!(WriteLine, WriteLine, 0, "Print a line break", |handle, _args| {
    handle.print("\n");
    Ok(None)
});

system_call!(WriteHex, WriteHex, 1, "Print an integer in hexadecimal", |handle, args| {
    let value = expect_integer(SystemCallOperator::WriteHex, &args[0])?;
    let text = if value < 0 {
        format!("-{:x}", value.unsigned_abs())
    } else {
        format!("{:x}", value)
    };
    handle.print(&text);
    Ok(None)
});

pub fn register_io_calls(registry: &mut SyscallRegistry) {
    registry.register(Write);
    registry.register(WriteLine);
    registry.register(WriteHex);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stdlib::testing::RecordingHandle;
    use crate::{SysArg, SystemCall};

    fn write(handle: &mut RecordingHandle, value: SysValue) -> Result<(), SysError> {
        let registry = SyscallRegistry::with_modules(&["io"]);
        registry
            .call(
                SystemCallOperator::Write,
                handle,
                &mut [SysArg::from_value(value)],
            )
            .map(|_| ())
    }

    #[test]
    fn test_write_builtins() {
        let mut handle = RecordingHandle::default();
        write(&mut handle, SysValue::Integer(-8)).unwrap();
        write(&mut handle, SysValue::Text(" x ".to_string())).unwrap();
        write(&mut handle, SysValue::Float(1.5)).unwrap();
        write(&mut handle, SysValue::Character('c')).unwrap();
        write(&mut handle, SysValue::Float(-1.0)).unwrap();
        assert_eq!(handle.output, "-8 x 1.5c-1");
    }

    #[test]
    fn test_write_boolean_is_unsupported() {
        let mut handle = RecordingHandle::default();
        let result = write(&mut handle, SysValue::Boolean(true));
        assert!(matches!(result, Err(SysError::Unsupported(_))));
        assert!(handle.output.is_empty());
    }

    #[test]
    fn test_write_line_and_hex() {
        let registry = SyscallRegistry::with_builtins();
        let mut handle = RecordingHandle::default();
        registry
            .call(
                SystemCallOperator::WriteHex,
                &mut handle,
                &mut [SysArg::from_value(SysValue::Integer(255))],
            )
            .unwrap();
        registry
            .call(SystemCallOperator::WriteLine, &mut handle, &mut [])
            .unwrap();
        registry
            .call(
                SystemCallOperator::WriteHex,
                &mut handle,
                &mut [SysArg::from_value(SysValue::Integer(-26))],
            )
            .unwrap();
        assert_eq!(handle.output, "ff\n-1a");
    }

    #[test]
    fn test_write_arity() {
        let mut handle = RecordingHandle::default();
        let result = Write.call(&mut handle, &mut []);
        assert!(matches!(result, Err(SysError::ArgumentCount { expected: 1, got: 0, .. })));
    }
}
