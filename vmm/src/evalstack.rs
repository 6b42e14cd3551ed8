use crate::error::{VmError, VmResult};
use crate::value::{ArrayCell, Value, VariableCell};

/// An entry of the evaluation stack.
#[derive(Debug, Clone)]
pub enum StackValue {
    Value(Value),
    Variable(VariableCell),
    Array(ArrayCell),
    /// Position of a running FOREACH.
    Cursor(usize),
}

impl From<Value> for StackValue {
    fn from(value: Value) -> Self {
        StackValue::Value(value)
    }
}

/// Operand stack of one process.
#[derive(Debug, Default)]
pub struct EvaluationStack {
    values: Vec<StackValue>,
}

impl EvaluationStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, value: impl Into<StackValue>) {
        self.values.push(value.into());
    }

    pub fn pop(&mut self) -> VmResult<StackValue> {
        self.values.pop().ok_or(VmError::StackUnderflow)
    }

    /// Pops a value, reading through a variable cell.
    pub fn pop_value(&mut self) -> VmResult<Value> {
        match self.pop()? {
            StackValue::Value(value) => Ok(value),
            StackValue::Variable(cell) => Ok(cell.borrow().value.clone()),
            StackValue::Array(cell) => Err(VmError::TypeMismatch(format!(
                "indexed variable {} used as a value",
                cell.borrow().descriptor
            ))),
            StackValue::Cursor(_) => Err(VmError::MalformedIl(
                "FOREACH cursor used as a value".to_string(),
            )),
        }
    }

    /// Pops `count` values pushed in declaration order and returns them in
    /// that order.
    pub fn pop_values(&mut self, count: usize) -> VmResult<Vec<Value>> {
        let mut values = (0..count)
            .map(|_| self.pop_value())
            .collect::<VmResult<Vec<_>>>()?;
        values.reverse();
        Ok(values)
    }

    /// Like [`pop_values`](Self::pop_values) without reading through cells.
    pub fn pop_entries(&mut self, count: usize) -> VmResult<Vec<StackValue>> {
        let mut entries = (0..count)
            .map(|_| self.pop())
            .collect::<VmResult<Vec<_>>>()?;
        entries.reverse();
        Ok(entries)
    }

    pub fn pop_variable(&mut self) -> VmResult<VariableCell> {
        match self.pop()? {
            StackValue::Variable(cell) => Ok(cell),
            other => Err(VmError::MalformedIl(format!(
                "expected a variable on the stack, found {:?}",
                other
            ))),
        }
    }

    pub fn pop_cursor(&mut self) -> VmResult<usize> {
        match self.pop()? {
            StackValue::Cursor(position) => Ok(position),
            other => Err(VmError::MalformedIl(format!(
                "expected a FOREACH cursor on the stack, found {:?}",
                other
            ))),
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn clear(&mut self) {
        self.values.clear();
    }
}
