//! Assertions, halting and the scheduling hints that are accepted but ignored

use log::warn;

use crate::{SysError, SyscallRegistry, SystemCallOperator};

use super::{expect_boolean, expect_integer};

system_call!(Assert, Assert, 1, "Fail unless the condition holds", |_handle, args| {
    if expect_boolean(SystemCallOperator::Assert, &args[0])? {
        Ok(None)
    } else {
        Err(SysError::AssertionFailed { code: None })
    }
});

system_call!(AssertCode, Assert, 2, "Fail with a code unless the condition holds", |_handle, args| {
    let holds = expect_boolean(SystemCallOperator::Assert, &args[0])?;
    let code = expect_integer(SystemCallOperator::Assert, &args[1])?;
    if holds {
        Ok(None)
    } else {
        Err(SysError::AssertionFailed { code: Some(code) })
    }
});

system_call!(Halt, Halt, 1, "Stop the program", |_handle, args| {
    let code = expect_integer(SystemCallOperator::Halt, &args[0])?;
    Err(SysError::Halted(code))
});

system_call!(Passivate, Passivate, 1, "Not supported, ignored", |_handle, args| {
    warn!("PASSIVATE({:?}) is not supported and has no effect", args[0].value());
    Ok(None)
});

system_call!(Count, Count, 1, "Not supported, ignored", |_handle, args| {
    warn!("COUNT({:?}) is not supported and has no effect", args[0].value());
    Ok(None)
});

pub fn register_control_calls(registry: &mut SyscallRegistry) {
    registry.register(Assert);
    registry.register(AssertCode);
    registry.register(Halt);
    registry.register(Passivate);
    registry.register(Count);
}
