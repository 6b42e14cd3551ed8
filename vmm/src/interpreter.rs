use std::cmp::Ordering;

use composita_syscall::SyscallRegistry;
use log::{trace, warn};

use crate::error::{VmError, VmResult};
use crate::evalstack::{EvaluationStack, StackValue};
use crate::il::{Instruction, MessageId, Program, TypeDescriptor, VariableId};
use crate::il_text::instruction_to_text;
use crate::memory::PendingOperation;
use crate::runtime::Runtime;
use crate::syscall_bridge::{from_sys_value, to_sys_args, write_back};
use crate::value::{
    ArrayCell, ComponentPointer, IndexKey, MessageValue, Pointer, ServicePointer, Value,
    VariableCell, VariableSlot,
};

/// Outcome of one interpreter step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionResult {
    /// An instruction (or a pending operation) completed.
    Continue,
    /// A pending operation could not complete yet.
    Blocked,
    /// Nothing to run this turn, e.g. Activity held by the readiness gate.
    Idle,
    /// The active value is done.
    Exited,
}

/// Fetch/decode/execute loop body, one instruction per call.
pub struct Interpreter {
    syscalls: SyscallRegistry,
}

impl Interpreter {
    pub fn new(syscalls: SyscallRegistry) -> Self {
        Self { syscalls }
    }

    pub fn syscalls(&self) -> &SyscallRegistry {
        &self.syscalls
    }

    /// Advances the process at `pointer` by one step. A pending blocking
    /// operation is retried instead of fetching a new instruction.
    pub fn process(&self, runtime: &mut Runtime, pointer: Pointer) -> VmResult<ExecutionResult> {
        let address = pointer
            .address()
            .ok_or_else(|| VmError::MalformedIl("the root has no code".to_string()))?;
        let program = runtime.program()?;
        let process = runtime.load_mut(address)?;
        if process.value.is_done() {
            return Ok(ExecutionResult::Exited);
        }

        if let Some(operation) = process.pending.take() {
            if self.poll(runtime, &program, address, &operation)? {
                return Ok(ExecutionResult::Continue);
            }
            runtime.load_mut(address)?.pending = Some(operation);
            return Ok(ExecutionResult::Blocked);
        }

        let Some(instruction) = process.value.fetch(&program)? else {
            return Ok(if process.value.is_done() {
                ExecutionResult::Exited
            } else {
                ExecutionResult::Idle
            });
        };
        trace!("{}: {}", pointer, instruction_to_text(instruction, &program));
        self.execute(runtime, &program, address, instruction)
    }

    fn execute(
        &self,
        runtime: &mut Runtime,
        program: &Program,
        address: usize,
        instruction: &Instruction,
    ) -> VmResult<ExecutionResult> {
        match instruction {
            Instruction::Add
            | Instruction::Subtract
            | Instruction::Multiply
            | Instruction::Divide
            | Instruction::Modulo => {
                let stack = stack_mut(runtime, address)?;
                let right = stack.pop_value()?;
                let left = stack.pop_value()?;
                stack.push(arithmetic(instruction, left, right)?);
            }
            Instruction::Negate => {
                let stack = stack_mut(runtime, address)?;
                let value = match stack.pop_value()? {
                    Value::Integer(i) => Value::Integer(i.wrapping_neg()),
                    Value::Float(f) => Value::Float(-f),
                    other => {
                        return Err(VmError::TypeMismatch(format!(
                            "cannot negate {}",
                            other.kind_name()
                        )));
                    }
                };
                stack.push(value);
            }
            Instruction::Equal
            | Instruction::NotEqual
            | Instruction::Less
            | Instruction::LessEqual
            | Instruction::Greater
            | Instruction::GreaterEqual => {
                let stack = stack_mut(runtime, address)?;
                let right = stack.pop_value()?;
                let left = stack.pop_value()?;
                stack.push(Value::Boolean(compare(instruction, &left, &right)?));
            }
            Instruction::Not => {
                let stack = stack_mut(runtime, address)?;
                let value = pop_boolean(stack, "NOT")?;
                stack.push(Value::Boolean(!value));
            }
            Instruction::And | Instruction::Or => {
                let stack = stack_mut(runtime, address)?;
                let right = pop_boolean(stack, "AND/OR")?;
                let left = pop_boolean(stack, "AND/OR")?;
                let result = match instruction {
                    Instruction::And => left && right,
                    _ => left || right,
                };
                stack.push(Value::Boolean(result));
            }

            Instruction::New { ty, arguments } => {
                let stack = stack_mut(runtime, address)?;
                let cell = match stack.pop()? {
                    StackValue::Variable(cell) => cell,
                    StackValue::Array(array) => {
                        let key = pop_index(stack, &array)?;
                        array.borrow_mut().element(key)
                    }
                    other => {
                        return Err(VmError::MalformedIl(format!(
                            "NEW target is {:?}",
                            other
                        )));
                    }
                };
                stack.pop_entries(*arguments)?;
                self.instantiate(runtime, address, ty, &cell)?;
            }
            Instruction::Delete => {
                let stack = stack_mut(runtime, address)?;
                match stack.pop()? {
                    StackValue::Variable(cell) => {
                        if !cell.borrow().is_mutable() {
                            return Err(VmError::MalformedIl(format!(
                                "cannot DELETE constant {}",
                                cell.borrow().descriptor
                            )));
                        }
                        let held = cell.borrow().value.clone();
                        match held {
                            Value::Component(component) => runtime.finalize(component)?,
                            _ => cell.borrow_mut().clear(),
                        }
                    }
                    StackValue::Array(array) => {
                        let key = pop_index(stack, &array)?;
                        let held = array
                            .borrow()
                            .get(&key)
                            .map(|cell| cell.borrow().value.clone());
                        match held {
                            Some(Value::Component(component)) => runtime.finalize(component)?,
                            _ => {
                                array.borrow_mut().remove(&key);
                            }
                        }
                    }
                    other => {
                        return Err(VmError::MalformedIl(format!(
                            "DELETE target is {:?}",
                            other
                        )));
                    }
                }
            }

            Instruction::Send(message) => {
                let descriptor = program.message(*message)?;
                let stack = stack_mut(runtime, address)?;
                let service = pop_service(stack)?;
                let fields = stack.pop_values(descriptor.fields.len())?;
                for (value, ty) in fields.iter().zip(&descriptor.fields) {
                    if !value.matches_type(ty) {
                        return Err(VmError::MalformedIl(format!(
                            "{} sent as field of type {} of {}",
                            value.kind_name(),
                            ty.name(),
                            descriptor.name
                        )));
                    }
                }
                runtime.send(
                    service,
                    MessageValue {
                        descriptor: *message,
                        fields,
                    },
                )?;
            }
            Instruction::Receive(message) => {
                let service = pop_service(stack_mut(runtime, address)?)?;
                let operation = PendingOperation::Receive {
                    service,
                    message: *message,
                };
                return self.block(runtime, program, address, operation);
            }
            Instruction::ReceiveTest(message) => {
                let service = pop_service(stack_mut(runtime, address)?)?;
                let operation = PendingOperation::ReceiveTest {
                    service,
                    message: *message,
                };
                return self.block(runtime, program, address, operation);
            }
            Instruction::InputTest(message) => {
                let service = pop_service(stack_mut(runtime, address)?)?;
                let head = runtime.peek(service)?;
                let matched = head.is_some_and(|head| head == *message || *message == MessageId::ANY);
                stack_mut(runtime, address)?.push(Value::Boolean(matched));
            }
            Instruction::Connect | Instruction::Disconnect => {
                let stack = stack_mut(runtime, address)?;
                let component = pop_component(stack)?;
                let service = pop_service(stack)?;
                if *instruction == Instruction::Connect {
                    runtime.connect(component, service)?;
                } else {
                    runtime.disconnect(component, service)?;
                }
            }

            Instruction::SystemCall {
                operator,
                arguments,
            } => {
                let entries = stack_mut(runtime, address)?.pop_entries(*arguments)?;
                let (mut args, cells) = to_sys_args(entries)?;
                let result = self.syscalls.call(*operator, runtime, &mut args)?;
                write_back(&args, &cells)?;
                if let Some(result) = result {
                    stack_mut(runtime, address)?.push(from_sys_value(result));
                }
            }

            Instruction::ProcedureCall(procedure) => {
                let count = program.procedure(*procedure)?.parameters.len();
                let process = runtime.load_mut(address)?;
                let arguments = process.stack.pop_values(count)?;
                process.value.call(program, *procedure, arguments)?;
            }
            Instruction::Return => {
                let process = runtime.load_mut(address)?;
                let procedure = process.value.innermost_procedure().ok_or_else(|| {
                    VmError::MalformedIl("RETURN outside of a procedure".to_string())
                })?;
                if program.procedure(procedure)?.return_type.is_some() {
                    // detach the result from the callee's locals before they reset
                    let value = process.stack.pop_value()?;
                    process.stack.push(value);
                }
                process.value.mark_returned()?;
            }

            Instruction::LoadBoolean(b) => stack_mut(runtime, address)?.push(Value::Boolean(*b)),
            Instruction::LoadText(s) => stack_mut(runtime, address)?.push(Value::Text(s.clone())),
            Instruction::LoadCharacter(c) => {
                stack_mut(runtime, address)?.push(Value::Character(*c))
            }
            Instruction::LoadFloat(f) => stack_mut(runtime, address)?.push(Value::Float(*f)),
            Instruction::LoadInteger(i) => stack_mut(runtime, address)?.push(Value::Integer(*i)),

            Instruction::Move => return Err(VmError::Unsupported("MOVE".to_string())),
            Instruction::StoreVariable => {
                let stack = stack_mut(runtime, address)?;
                let value = stack.pop_value()?;
                let target = stack.pop_variable()?;
                target.borrow_mut().store(value)?;
            }

            Instruction::LoadVariable(id) => match lookup(runtime, address, *id)? {
                VariableSlot::Scalar(cell) => {
                    stack_mut(runtime, address)?.push(StackValue::Variable(cell))
                }
                VariableSlot::Array(_) => {
                    return Err(VmError::MalformedIl(format!(
                        "{} is indexed",
                        program.variable(*id)?.name
                    )));
                }
            },
            Instruction::LoadArrayVariable(id) => {
                let entry = match lookup(runtime, address, *id)? {
                    VariableSlot::Array(array) => StackValue::Array(array),
                    VariableSlot::Scalar(cell) if cell.borrow().ty == TypeDescriptor::Text => {
                        StackValue::Variable(cell)
                    }
                    VariableSlot::Scalar(_) => {
                        return Err(VmError::MalformedIl(format!(
                            "{} is not indexed",
                            program.variable(*id)?.name
                        )));
                    }
                };
                stack_mut(runtime, address)?.push(entry);
            }
            Instruction::LoadArrayVariableElement(id) => {
                let VariableSlot::Array(array) = lookup(runtime, address, *id)? else {
                    return Err(VmError::MalformedIl(format!(
                        "{} is not indexed",
                        program.variable(*id)?.name
                    )));
                };
                let stack = stack_mut(runtime, address)?;
                let key = pop_index(stack, &array)?;
                let cell = array.borrow_mut().element(key);
                stack.push(StackValue::Variable(cell));
            }
            Instruction::LoadService(interface) => {
                let component = pop_component(stack_mut(runtime, address)?)?;
                let service = runtime.get_service(*interface, component)?;
                stack_mut(runtime, address)?.push(Value::Service(service));
            }
            Instruction::LoadThis => {
                let process = runtime.load_mut(address)?;
                let this = match process.pointer {
                    Pointer::Component(component) => Value::Component(component),
                    Pointer::Service(service) => Value::Service(service),
                    Pointer::Root => {
                        return Err(VmError::MalformedIl("THIS of the root".to_string()));
                    }
                };
                process.stack.push(this);
            }

            Instruction::AcquireShared | Instruction::ReleaseShared => {
                warn!(
                    "{} is not supported, ignored",
                    instruction_to_text(instruction, program)
                );
            }
            Instruction::AcquireExclusive => {
                return self.block(runtime, program, address, PendingOperation::AcquireExclusive);
            }
            Instruction::ReleaseExclusive => {
                return self.block(runtime, program, address, PendingOperation::ReleaseExclusive);
            }

            Instruction::Branch(offset) => runtime.load_mut(address)?.value.jump(*offset)?,
            Instruction::BranchTrue(offset) | Instruction::BranchFalse(offset) => {
                let process = runtime.load_mut(address)?;
                let condition = pop_boolean(&mut process.stack, "a branch")?;
                let expected = matches!(instruction, Instruction::BranchTrue(_));
                if condition == expected {
                    process.value.jump(*offset)?;
                }
            }

            Instruction::IsType(component) => {
                let stack = stack_mut(runtime, address)?;
                let expected = TypeDescriptor::Component(*component);
                let result = match stack.pop()? {
                    StackValue::Variable(cell) => {
                        let variable = cell.borrow();
                        match &variable.value {
                            Value::Component(pointer) => pointer.descriptor == *component,
                            _ => variable.ty == expected,
                        }
                    }
                    StackValue::Array(array) => array.borrow().ty == expected,
                    StackValue::Value(Value::Component(pointer)) => {
                        pointer.descriptor == *component
                    }
                    StackValue::Value(_) => false,
                    StackValue::Cursor(_) => {
                        return Err(VmError::MalformedIl(
                            "IS-TYPE of a FOREACH cursor".to_string(),
                        ));
                    }
                };
                stack.push(Value::Boolean(result));
            }
            Instruction::ExistsTest => {
                let stack = stack_mut(runtime, address)?;
                let defined = stack.pop_value()?.is_defined();
                stack.push(Value::Boolean(defined));
            }

            Instruction::BeginForEach => stack_mut(runtime, address)?.push(StackValue::Cursor(0)),
            Instruction::EndForEach => {
                stack_mut(runtime, address)?.pop_cursor()?;
            }
            Instruction::AssignArrayIndex => {
                let stack = stack_mut(runtime, address)?;
                assign_array_index(stack)?;
            }
        }
        Ok(ExecutionResult::Continue)
    }

    /// Tries a blocking operation now; parks it on the process if it cannot
    /// complete.
    fn block(
        &self,
        runtime: &mut Runtime,
        program: &Program,
        address: usize,
        operation: PendingOperation,
    ) -> VmResult<ExecutionResult> {
        if self.poll(runtime, program, address, &operation)? {
            return Ok(ExecutionResult::Continue);
        }
        runtime.load_mut(address)?.pending = Some(operation);
        Ok(ExecutionResult::Blocked)
    }

    /// Returns whether `operation` completed.
    fn poll(
        &self,
        runtime: &mut Runtime,
        program: &Program,
        address: usize,
        operation: &PendingOperation,
    ) -> VmResult<bool> {
        match operation {
            PendingOperation::Receive { service, message } => {
                let Some(received) = runtime.receive(*service, *message)? else {
                    return Ok(false);
                };
                let expected = program.message(*message)?.fields.len();
                let stack = stack_mut(runtime, address)?;
                let destinations = stack.pop_entries(expected)?;
                if received.descriptor == *message && *message != MessageId::ANY {
                    for (destination, value) in destinations.into_iter().zip(received.fields) {
                        match destination {
                            StackValue::Variable(cell) => cell.borrow_mut().store(value)?,
                            other => {
                                return Err(VmError::MalformedIl(format!(
                                    "RECEIVE destination is {:?}",
                                    other
                                )));
                            }
                        }
                    }
                }
                Ok(true)
            }
            PendingOperation::ReceiveTest { service, message } => {
                let Some(head) = runtime.peek(*service)? else {
                    return Ok(false);
                };
                let matched = head == *message || *message == MessageId::ANY;
                stack_mut(runtime, address)?.push(Value::Boolean(matched));
                Ok(true)
            }
            PendingOperation::AcquireExclusive => {
                let held = runtime.load(address)?.exclusive_lock;
                match runtime.acquire_exclusive(held) {
                    Some(id) => {
                        runtime.load_mut(address)?.exclusive_lock = Some(id);
                        Ok(true)
                    }
                    None => Ok(false),
                }
            }
            PendingOperation::ReleaseExclusive => {
                let held = runtime.load(address)?.exclusive_lock;
                if runtime.release_exclusive(held) {
                    runtime.load_mut(address)?.exclusive_lock = None;
                    Ok(true)
                } else {
                    Ok(false)
                }
            }
        }
    }

    fn instantiate(
        &self,
        runtime: &mut Runtime,
        address: usize,
        ty: &TypeDescriptor,
        cell: &VariableCell,
    ) -> VmResult<()> {
        match ty {
            TypeDescriptor::Component(descriptor) => {
                if !cell.borrow().is_mutable() {
                    return Err(VmError::MalformedIl(format!(
                        "cannot NEW into constant {}",
                        cell.borrow().descriptor
                    )));
                }
                let held = cell.borrow().value.clone();
                if let Value::Component(previous) = held {
                    runtime.finalize(previous)?;
                }
                let container = runtime.load(address)?.pointer;
                let created = runtime.create_component(*descriptor, container)?;
                cell.borrow_mut().store(Value::Component(created))?;
            }
            TypeDescriptor::Text => cell.borrow_mut().store(Value::Text(String::new()))?,
            TypeDescriptor::AnyComponent => {
                return Err(VmError::MalformedIl(
                    "NEW needs a concrete component type".to_string(),
                ));
            }
            other => warn!("NEW of {} is not supported, ignored", other.name()),
        }
        Ok(())
    }
}

fn stack_mut(runtime: &mut Runtime, address: usize) -> VmResult<&mut EvaluationStack> {
    Ok(&mut runtime.load_mut(address)?.stack)
}

/// Resolves a variable from the running process outwards through its
/// containers.
fn lookup(runtime: &Runtime, address: usize, id: VariableId) -> VmResult<VariableSlot> {
    let value = &runtime.load(address)?.value;
    if let Some(slot) = value.lookup(id) {
        return Ok(slot);
    }
    let mut parent = value.parent;
    while let Some(address) = parent.address() {
        let value = &runtime.load(address)?.value;
        if let Some(slot) = value.lookup_own(id) {
            return Ok(slot);
        }
        parent = value.parent;
    }
    Err(VmError::MalformedIl(format!("{} is not visible", id)))
}

fn pop_boolean(stack: &mut EvaluationStack, context: &str) -> VmResult<bool> {
    match stack.pop_value()? {
        Value::Boolean(b) => Ok(b),
        other => Err(VmError::TypeMismatch(format!(
            "{} needs a BOOLEAN, got {}",
            context,
            other.kind_name()
        ))),
    }
}

fn pop_service(stack: &mut EvaluationStack) -> VmResult<ServicePointer> {
    match stack.pop_value()? {
        Value::Service(service) => Ok(service),
        other => Err(VmError::MalformedIl(format!(
            "expected a service, got {}",
            other.kind_name()
        ))),
    }
}

fn pop_component(stack: &mut EvaluationStack) -> VmResult<ComponentPointer> {
    match stack.pop_value()? {
        Value::Component(component) => Ok(component),
        other => Err(VmError::MalformedIl(format!(
            "expected a component, got {}",
            other.kind_name()
        ))),
    }
}

fn pop_index(stack: &mut EvaluationStack, array: &ArrayCell) -> VmResult<IndexKey> {
    let count = array.borrow().index_types.len();
    let values = stack.pop_values(count)?;
    IndexKey::from_values(&values)
}

/// `[cursor, index variables..., array]` to `[cursor', assigned]`.
fn assign_array_index(stack: &mut EvaluationStack) -> VmResult<()> {
    let array = match stack.pop()? {
        StackValue::Array(array) => array,
        other => {
            return Err(VmError::MalformedIl(format!(
                "FOREACH over {:?}",
                other
            )));
        }
    };
    let count = array.borrow().index_types.len();
    let variables = stack
        .pop_entries(count)?
        .into_iter()
        .map(|entry| match entry {
            StackValue::Variable(cell) => Ok(cell),
            other => Err(VmError::MalformedIl(format!(
                "FOREACH index is {:?}",
                other
            ))),
        })
        .collect::<VmResult<Vec<_>>>()?;
    let cursor = stack.pop_cursor()?;

    let key = array.borrow().key_at(cursor).cloned();
    match key {
        Some(key) => {
            for (variable, part) in variables.iter().zip(key.parts()) {
                variable.borrow_mut().assign_index(part)?;
            }
            stack.push(StackValue::Cursor(cursor + 1));
            stack.push(Value::Boolean(true));
        }
        None => {
            stack.push(StackValue::Cursor(cursor));
            stack.push(Value::Boolean(false));
        }
    }
    Ok(())
}

fn arithmetic(instruction: &Instruction, left: Value, right: Value) -> VmResult<Value> {
    match (left, right) {
        (Value::Integer(a), Value::Integer(b)) => {
            let result = match instruction {
                Instruction::Add => a.wrapping_add(b),
                Instruction::Subtract => a.wrapping_sub(b),
                Instruction::Multiply => a.wrapping_mul(b),
                Instruction::Divide | Instruction::Modulo if b == 0 => {
                    return Err(VmError::DivisionByZero);
                }
                // truncates toward zero
                Instruction::Divide => a.wrapping_div(b),
                _ => a.wrapping_rem(b),
            };
            Ok(Value::Integer(result))
        }
        (Value::Float(a), Value::Float(b)) => Ok(Value::Float(match instruction {
            Instruction::Add => a + b,
            Instruction::Subtract => a - b,
            Instruction::Multiply => a * b,
            Instruction::Divide => a / b,
            _ => a % b,
        })),
        (Value::Text(a), Value::Text(b)) if *instruction == Instruction::Add => {
            Ok(Value::Text(a + &b))
        }
        (left, right) => Err(VmError::TypeMismatch(format!(
            "{:?} of {} and {}",
            instruction,
            left.kind_name(),
            right.kind_name()
        ))),
    }
}

fn compare(instruction: &Instruction, left: &Value, right: &Value) -> VmResult<bool> {
    let equality_only = matches!(instruction, Instruction::Equal | Instruction::NotEqual);
    let ordering = match (left, right) {
        (Value::Integer(a), Value::Integer(b)) => a.partial_cmp(b),
        (Value::Float(a), Value::Float(b)) => a.partial_cmp(b),
        (Value::Text(a), Value::Text(b)) => a.partial_cmp(b),
        (Value::Character(a), Value::Character(b)) => a.partial_cmp(b),
        (Value::Boolean(a), Value::Boolean(b)) if equality_only => a.partial_cmp(b),
        _ => {
            return Err(VmError::TypeMismatch(format!(
                "{:?} of {} and {}",
                instruction,
                left.kind_name(),
                right.kind_name()
            )));
        }
    };
    Ok(match instruction {
        Instruction::Equal => ordering == Some(Ordering::Equal),
        Instruction::NotEqual => ordering != Some(Ordering::Equal),
        Instruction::Less => ordering == Some(Ordering::Less),
        Instruction::LessEqual => matches!(ordering, Some(Ordering::Less | Ordering::Equal)),
        Instruction::Greater => ordering == Some(Ordering::Greater),
        _ => matches!(ordering, Some(Ordering::Greater | Ordering::Equal)),
    })
}
