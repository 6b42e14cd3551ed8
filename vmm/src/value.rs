use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use composita_syscall::format_real;
use indexmap::IndexMap;

use crate::error::{VmError, VmResult};
use crate::il::{ComponentId, InterfaceId, MessageId, TypeDescriptor, VariableId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ComponentPointer {
    pub address: usize,
    pub descriptor: ComponentId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ServicePointer {
    pub address: usize,
    pub interface: InterfaceId,
}

/// Identity of an active value in the runtime registry.
///
/// Addresses are issued once and never reused. `Root` is the container of
/// the entry components and has no address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Pointer {
    Root,
    Component(ComponentPointer),
    Service(ServicePointer),
}

impl Pointer {
    pub fn address(&self) -> Option<usize> {
        match self {
            Pointer::Root => None,
            Pointer::Component(p) => Some(p.address),
            Pointer::Service(p) => Some(p.address),
        }
    }
}

impl fmt::Display for ComponentPointer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "component@{}", self.address)
    }
}

impl fmt::Display for ServicePointer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "service@{}", self.address)
    }
}

impl fmt::Display for Pointer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Pointer::Root => write!(f, "root"),
            Pointer::Component(p) => p.fmt(f),
            Pointer::Service(p) => p.fmt(f),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Integer(i64),
    Float(f64),
    Text(String),
    Character(char),
    Boolean(bool),
    Component(ComponentPointer),
    Service(ServicePointer),
    Undefined,
}

impl Value {
    /// Initial value of a freshly declared variable.
    pub fn default_for(ty: &TypeDescriptor) -> Value {
        match ty {
            TypeDescriptor::Integer => Value::Integer(0),
            TypeDescriptor::Float => Value::Float(0.0),
            TypeDescriptor::Text => Value::Text(String::new()),
            TypeDescriptor::Character => Value::Character('\0'),
            TypeDescriptor::Boolean => Value::Boolean(false),
            TypeDescriptor::Component(_) | TypeDescriptor::AnyComponent => Value::Undefined,
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::Integer(_) => "INTEGER",
            Value::Float(_) => "REAL",
            Value::Text(_) => "TEXT",
            Value::Character(_) => "CHARACTER",
            Value::Boolean(_) => "BOOLEAN",
            Value::Component(_) => "COMPONENT",
            Value::Service(_) => "SERVICE",
            Value::Undefined => "UNDEFINED",
        }
    }

    pub fn same_kind(&self, other: &Value) -> bool {
        std::mem::discriminant(self) == std::mem::discriminant(other)
    }

    pub fn is_defined(&self) -> bool {
        !matches!(self, Value::Undefined)
    }

    /// Strict match of a value against a declared type.
    pub fn matches_type(&self, ty: &TypeDescriptor) -> bool {
        match (self, ty) {
            (Value::Integer(_), TypeDescriptor::Integer)
            | (Value::Float(_), TypeDescriptor::Float)
            | (Value::Text(_), TypeDescriptor::Text)
            | (Value::Character(_), TypeDescriptor::Character)
            | (Value::Boolean(_), TypeDescriptor::Boolean)
            | (Value::Component(_), TypeDescriptor::AnyComponent) => true,
            (Value::Component(p), TypeDescriptor::Component(id)) => p.descriptor == *id,
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Integer(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{}", format_real(*x)),
            Value::Text(s) => write!(f, "{:?}", s),
            Value::Character(c) => write!(f, "{:?}", c),
            Value::Boolean(b) => write!(f, "{}", if *b { "TRUE" } else { "FALSE" }),
            Value::Component(p) => p.fmt(f),
            Value::Service(p) => p.fmt(f),
            Value::Undefined => write!(f, "UNDEFINED"),
        }
    }
}

pub type VariableCell = Rc<RefCell<VariableValue>>;
pub type ArrayCell = Rc<RefCell<ArrayVariableValue>>;

/// A scalar variable.
///
/// Variables stay writable until their owner leaves its Init section;
/// from then on `mutable` follows the descriptor.
#[derive(Debug, Clone, PartialEq)]
pub struct VariableValue {
    pub descriptor: VariableId,
    pub ty: TypeDescriptor,
    pub value: Value,
    mutable: bool,
}

impl VariableValue {
    pub fn new(descriptor: VariableId, ty: TypeDescriptor) -> Self {
        Self {
            descriptor,
            ty,
            value: Value::default_for(&ty),
            mutable: true,
        }
    }

    /// A lazily created array element, undefined until first stored.
    pub fn element(descriptor: VariableId, ty: TypeDescriptor) -> Self {
        Self {
            descriptor,
            ty,
            value: Value::Undefined,
            mutable: true,
        }
    }

    pub fn with_value(descriptor: VariableId, ty: TypeDescriptor, value: Value, mutable: bool) -> Self {
        Self {
            descriptor,
            ty,
            value,
            mutable,
        }
    }

    pub fn into_cell(self) -> VariableCell {
        Rc::new(RefCell::new(self))
    }

    pub fn is_mutable(&self) -> bool {
        self.mutable
    }

    pub fn fix_access(&mut self, mutable: bool) {
        self.mutable = mutable;
    }

    /// Back to the declaration state: default value, writable.
    pub fn reset(&mut self) {
        self.value = Value::default_for(&self.ty);
        self.mutable = true;
    }

    pub fn clear(&mut self) {
        self.value = Value::Undefined;
    }

    /// Stores a value, keeping the kind the variable already holds.
    pub fn store(&mut self, value: Value) -> VmResult<()> {
        if !self.mutable {
            return Err(VmError::MalformedIl(format!(
                "cannot assign to constant {}",
                self.descriptor
            )));
        }
        let accepted = match (&self.value, &value) {
            (_, Value::Service(_)) => false,
            (_, Value::Undefined) => self.ty.is_component(),
            (Value::Undefined, _) => true,
            (current, new) => current.same_kind(new),
        };
        if !accepted {
            return Err(VmError::TypeMismatch(format!(
                "cannot store {} into {} holding {}",
                value.kind_name(),
                self.descriptor,
                self.value.kind_name()
            )));
        }
        self.value = value;
        Ok(())
    }

    /// Assigns a decoded FOREACH index part.
    pub fn assign_index(&mut self, part: &IndexPart) -> VmResult<()> {
        let value = part.to_value();
        if !value.matches_type(&self.ty) {
            return Err(VmError::TypeMismatch(format!(
                "index {} does not fit {} of type {}",
                value,
                self.descriptor,
                self.ty.name()
            )));
        }
        self.value = value;
        Ok(())
    }
}

/// One component of an array index.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum IndexPart {
    Integer(i64),
    /// Bit pattern of the REAL, with -0.0 folded into 0.0.
    Float(u64),
    Text(String),
    Character(char),
    Boolean(bool),
    Component(ComponentPointer),
}

impl IndexPart {
    pub fn from_value(value: &Value) -> VmResult<Self> {
        match value {
            Value::Integer(i) => Ok(IndexPart::Integer(*i)),
            Value::Float(f) => {
                let f = if *f == 0.0 { 0.0 } else { *f };
                Ok(IndexPart::Float(f.to_bits()))
            }
            Value::Text(s) => Ok(IndexPart::Text(s.clone())),
            Value::Character(c) => Ok(IndexPart::Character(*c)),
            Value::Boolean(b) => Ok(IndexPart::Boolean(*b)),
            Value::Component(p) => Ok(IndexPart::Component(*p)),
            Value::Undefined => Err(VmError::TypeMismatch("index value is undefined".to_string())),
            Value::Service(_) => Err(VmError::TypeMismatch(
                "a service cannot be used as an index".to_string(),
            )),
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            IndexPart::Integer(i) => Value::Integer(*i),
            IndexPart::Float(bits) => Value::Float(f64::from_bits(*bits)),
            IndexPart::Text(s) => Value::Text(s.clone()),
            IndexPart::Character(c) => Value::Character(*c),
            IndexPart::Boolean(b) => Value::Boolean(*b),
            IndexPart::Component(p) => Value::Component(*p),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IndexKey(pub Vec<IndexPart>);

impl IndexKey {
    pub fn from_values(values: &[Value]) -> VmResult<Self> {
        values
            .iter()
            .map(IndexPart::from_value)
            .collect::<VmResult<Vec<_>>>()
            .map(IndexKey)
    }

    pub fn parts(&self) -> &[IndexPart] {
        &self.0
    }
}

/// An indexed variable. Entries keep their first insertion order.
#[derive(Debug, Clone, PartialEq)]
pub struct ArrayVariableValue {
    pub descriptor: VariableId,
    pub ty: TypeDescriptor,
    pub index_types: Vec<TypeDescriptor>,
    entries: IndexMap<IndexKey, VariableCell>,
}

impl ArrayVariableValue {
    pub fn new(descriptor: VariableId, ty: TypeDescriptor, index_types: Vec<TypeDescriptor>) -> Self {
        Self {
            descriptor,
            ty,
            index_types,
            entries: IndexMap::new(),
        }
    }

    pub fn into_cell(self) -> ArrayCell {
        Rc::new(RefCell::new(self))
    }

    /// The element cell at `key`, created undefined on first access.
    pub fn element(&mut self, key: IndexKey) -> VariableCell {
        let (descriptor, ty) = (self.descriptor, self.ty);
        self.entries
            .entry(key)
            .or_insert_with(|| VariableValue::element(descriptor, ty).into_cell())
            .clone()
    }

    pub fn get(&self, key: &IndexKey) -> Option<VariableCell> {
        self.entries.get(key).cloned()
    }

    pub fn remove(&mut self, key: &IndexKey) -> Option<VariableCell> {
        self.entries.shift_remove(key)
    }

    pub fn key_at(&self, position: usize) -> Option<&IndexKey> {
        self.entries.get_index(position).map(|(key, _)| key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &IndexKey> {
        self.entries.keys()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

/// A declared variable of an active value.
#[derive(Debug, Clone)]
pub enum VariableSlot {
    Scalar(VariableCell),
    Array(ArrayCell),
}

impl VariableSlot {
    pub fn descriptor(&self) -> VariableId {
        match self {
            VariableSlot::Scalar(cell) => cell.borrow().descriptor,
            VariableSlot::Array(cell) => cell.borrow().descriptor,
        }
    }
}

/// An immutable message in a service queue.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageValue {
    pub descriptor: MessageId,
    pub fields: Vec<Value>,
}

impl MessageValue {
    pub fn finish() -> Self {
        Self {
            descriptor: MessageId::FINISH,
            fields: Vec::new(),
        }
    }

    pub fn is_finish(&self) -> bool {
        self.descriptor == MessageId::FINISH
    }
}
