//! Arithmetic system calls

use crate::{SysValue, SyscallRegistry, SystemCallOperator};

use super::{expect_float, expect_integer};

macro_rules! real_function {
    ($name:ident, $description:expr, $f:expr) => {
        system_call!($name, $name, 1, $description, |_handle, args| {
            let x = expect_float(SystemCallOperator::$name, &args[0])?;
            let f: fn(f64) -> f64 = $f;
            Ok(Some(SysValue::Float(f(x))))
        });
    };
}

real_function!(Sqrt, "Square root of a REAL", f64::sqrt);
real_function!(Sin, "Sine of a REAL in radians", f64::sin);
real_function!(Cos, "Cosine of a REAL in radians", f64::cos);
real_function!(Tan, "Tangent of a REAL in radians", f64::tan);
real_function!(ArcSin, "Arc sine of a REAL", f64::asin);
real_function!(ArcCos, "Arc cosine of a REAL", f64::acos);
real_function!(ArcTan, "Arc tangent of a REAL", f64::atan);

// REAL sentinels whatever the argument.
system_call!(Min, Min, 1, "Smallest positive REAL", |_handle, _args| {
    Ok(Some(SysValue::Float(f64::from_bits(1))))
});

system_call!(Max, Max, 1, "Largest finite REAL", |_handle, _args| {
    Ok(Some(SysValue::Float(f64::MAX)))
});

system_call!(Random, Random, 2, "Integer in [low, low + high)", |handle, args| {
    let low = expect_integer(SystemCallOperator::Random, &args[0])?;
    let high = expect_integer(SystemCallOperator::Random, &args[1])?;
    let offset = (handle.random_unit() * high as f64).trunc() as i64;
    Ok(Some(SysValue::Integer(low.wrapping_add(offset))))
});

system_call!(Inc, Inc, 1, "Increment an INTEGER variable by one", |_handle, args| {
    let value = expect_integer(SystemCallOperator::Inc, &args[0])?;
    args[0].assign(SystemCallOperator::Inc, SysValue::Integer(value.wrapping_add(1)))?;
    Ok(None)
});

system_call!(IncBy, Inc, 2, "Increment an INTEGER variable", |_handle, args| {
    let value = expect_integer(SystemCallOperator::Inc, &args[0])?;
    let by = expect_integer(SystemCallOperator::Inc, &args[1])?;
    args[0].assign(SystemCallOperator::Inc, SysValue::Integer(value.wrapping_add(by)))?;
    Ok(None)
});

system_call!(Dec, Dec, 1, "Decrement an INTEGER variable by one", |_handle, args| {
    let value = expect_integer(SystemCallOperator::Dec, &args[0])?;
    args[0].assign(SystemCallOperator::Dec, SysValue::Integer(value.wrapping_sub(1)))?;
    Ok(None)
});

system_call!(DecBy, Dec, 2, "Decrement an INTEGER variable", |_handle, args| {
    let value = expect_integer(SystemCallOperator::Dec, &args[0])?;
    let by = expect_integer(SystemCallOperator::Dec, &args[1])?;
    args[0].assign(SystemCallOperator::Dec, SysValue::Integer(value.wrapping_sub(by)))?;
    Ok(None)
});

pub fn register_math_calls(registry: &mut SyscallRegistry) {
    registry.register(Sqrt);
    registry.register(Sin);
    registry.register(Cos);
    registry.register(Tan);
    registry.register(ArcSin);
    registry.register(ArcCos);
    registry.register(ArcTan);
    registry.register(Min);
    registry.register(Max);
    registry.register(Random);
    registry.register(Inc);
    registry.register(IncBy);
    registry.register(Dec);
    registry.register(DecBy);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stdlib::testing::RecordingHandle;
    use crate::{SysArg, SysError, SystemCall};

    fn real(call: &dyn SystemCall, x: f64) -> f64 {
        let mut handle = RecordingHandle::default();
        let result = call
            .call(&mut handle, &mut [SysArg::from_value(SysValue::Float(x))])
            .unwrap();
        match result {
            Some(SysValue::Float(f)) => f,
            other => panic!("expected REAL, got {:?}", other),
        }
    }

    #[test]
    fn test_trigonometry() {
        assert_eq!(real(&Cos, std::f64::consts::PI), -1.0);
        assert_eq!(real(&ArcSin, 0.0), 0.0);
        assert_eq!(real(&Sqrt, 2.25), 1.5);
        assert!(real(&Sqrt, -1.0).is_nan());
    }

    #[test]
    fn test_real_function_rejects_integer() {
        let mut handle = RecordingHandle::default();
        let result = Sin.call(&mut handle, &mut [SysArg::from_value(SysValue::Integer(1))]);
        assert_eq!(
            result,
            Err(SysError::ArgumentType {
                operator: SystemCallOperator::Sin,
                expected: "REAL",
                got: "INTEGER",
            })
        );
    }

    #[test]
    fn test_min_max_are_real_sentinels() {
        let mut handle = RecordingHandle::default();
        for arg in [SysValue::Integer(0), SysValue::Float(2.5), SysValue::Text("x".to_string())] {
            assert_eq!(
                Min.call(&mut handle, &mut [SysArg::from_value(arg.clone())]),
                Ok(Some(SysValue::Float(5e-324)))
            );
            assert_eq!(
                Max.call(&mut handle, &mut [SysArg::from_value(arg)]),
                Ok(Some(SysValue::Float(f64::MAX)))
            );
        }
        assert!(Max.call(&mut handle, &mut []).is_err());
    }

    #[test]
    fn test_random_range() {
        let mut handle = RecordingHandle {
            sample: 0.99,
            ..Default::default()
        };
        let mut args = [
            SysArg::from_value(SysValue::Integer(10)),
            SysArg::from_value(SysValue::Integer(5)),
        ];
        assert_eq!(
            Random.call(&mut handle, &mut args).unwrap(),
            Some(SysValue::Integer(14))
        );
        handle.sample = 0.0;
        assert_eq!(
            Random.call(&mut handle, &mut args).unwrap(),
            Some(SysValue::Integer(10))
        );
    }

    #[test]
    fn test_inc_dec_write_back() {
        let mut handle = RecordingHandle::default();
        let mut args = [SysArg::from_variable(SysValue::Integer(4))];
        Inc.call(&mut handle, &mut args).unwrap();
        assert_eq!(args[0].assignment(), Some(&SysValue::Integer(5)));

        let mut args = [
            SysArg::from_variable(SysValue::Integer(4)),
            SysArg::from_value(SysValue::Integer(10)),
        ];
        DecBy.call(&mut handle, &mut args).unwrap();
        assert_eq!(args[0].assignment(), Some(&SysValue::Integer(-6)));
    }

    #[test]
    fn test_inc_requires_variable() {
        let mut handle = RecordingHandle::default();
        let mut args = [SysArg::from_value(SysValue::Integer(4))];
        assert!(Inc.call(&mut handle, &mut args).is_err());
    }
}
