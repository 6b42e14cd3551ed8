//! Intermediate language consumed by the VM.
//!
//! A [`Program`] is produced by an external compiler (or by
//! [`ProgramBuilder`](crate::builder::ProgramBuilder)) and is read-only for
//! the whole run. Descriptors refer to each other through typed ids, so
//! descriptor identity is id equality.

use std::fmt;

use composita_syscall::SystemCallOperator;

use crate::error::{VmError, VmResult};

macro_rules! descriptor_id {
    ($name:ident, $prefix:expr) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub usize);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}{}", $prefix, self.0)
            }
        }
    };
}

descriptor_id!(ComponentId, "component#");
descriptor_id!(InterfaceId, "interface#");
descriptor_id!(MessageId, "message#");
descriptor_id!(ProcedureId, "procedure#");
descriptor_id!(VariableId, "variable#");

impl MessageId {
    /// End-of-interaction sentinel, carries no fields.
    pub const FINISH: MessageId = MessageId(0);
    /// Wildcard accepted by RECEIVE and the receive tests.
    pub const ANY: MessageId = MessageId(1);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeDescriptor {
    Integer,
    Float,
    Text,
    Character,
    Boolean,
    Component(ComponentId),
    /// A component variable not bound to one component type.
    AnyComponent,
}

impl TypeDescriptor {
    pub fn is_component(&self) -> bool {
        matches!(self, TypeDescriptor::Component(_) | TypeDescriptor::AnyComponent)
    }

    pub fn name(&self) -> String {
        match self {
            TypeDescriptor::Integer => "INTEGER".to_string(),
            TypeDescriptor::Float => "REAL".to_string(),
            TypeDescriptor::Text => "TEXT".to_string(),
            TypeDescriptor::Character => "CHARACTER".to_string(),
            TypeDescriptor::Boolean => "BOOLEAN".to_string(),
            TypeDescriptor::Component(id) => id.to_string(),
            TypeDescriptor::AnyComponent => "ANY".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct VariableDescriptor {
    pub name: String,
    pub ty: TypeDescriptor,
    pub mutable: bool,
    /// Non-empty for indexed variables. TEXT variables are always scalar.
    pub index_types: Vec<TypeDescriptor>,
}

impl VariableDescriptor {
    pub fn is_indexed(&self) -> bool {
        !self.index_types.is_empty() && self.ty != TypeDescriptor::Text
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MessageDescriptor {
    pub name: String,
    pub fields: Vec<TypeDescriptor>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InterfaceDescriptor {
    pub name: String,
    pub messages: Vec<MessageId>,
}

/// Declarations shared by components, implementations and procedures.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Declarations {
    /// Initialisation code, run before BEGIN.
    pub init: Vec<Instruction>,
    pub variables: Vec<VariableId>,
    pub procedures: Vec<ProcedureId>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProcedureDescriptor {
    pub name: String,
    pub parameters: Vec<VariableId>,
    pub return_type: Option<TypeDescriptor>,
    pub declarations: Declarations,
    pub begin: Vec<Instruction>,
}

/// Service code of a component for one interface.
#[derive(Debug, Clone, PartialEq)]
pub struct ImplementationDescriptor {
    pub interface: InterfaceId,
    pub declarations: Declarations,
    pub begin: Vec<Instruction>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ComponentDescriptor {
    pub name: String,
    pub offers: Vec<InterfaceId>,
    pub requires: Vec<InterfaceId>,
    pub implementations: Vec<ImplementationDescriptor>,
    pub declarations: Declarations,
    pub begin: Vec<Instruction>,
    pub activity: Vec<Instruction>,
    pub finally: Vec<Instruction>,
}

impl ComponentDescriptor {
    pub fn implementation_index(&self, interface: InterfaceId) -> Option<usize> {
        self.implementations
            .iter()
            .position(|implementation| implementation.interface == interface)
    }
}

/// IL instruction set
///
/// The VM is a stack machine. Each process owns one evaluation stack shared
/// by its lifecycle sections and procedure calls.
///
/// # Operand order
///
/// Multi-value operands (message fields, procedure arguments, receive
/// destinations, array indices, system call arguments) are pushed in
/// declaration order. Single operands named "on top" are pushed last.
///
/// # Jumps
///
/// Branch offsets are relative to the instruction after the branch.
#[derive(Debug, Clone, PartialEq)]
pub enum Instruction {
    /// Pop right, pop left, push `left + right`.
    ///
    /// Integers wrap, reals add, texts concatenate.
    Add,
    /// Pop right, pop left, push `left - right`.
    Subtract,
    /// Pop right, pop left, push `left * right`.
    Multiply,
    /// Pop right, pop left, push `left / right`.
    ///
    /// Integer division truncates toward zero; dividing by zero is fatal.
    Divide,
    /// Pop right, pop left, push the remainder, truncated toward zero.
    Modulo,
    /// Pop a number, push its negation.
    Negate,

    Equal,
    NotEqual,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,

    Not,
    /// Strict: both operands are already evaluated.
    And,
    Or,

    /// Pop a target variable (with its index for indexed variables) and
    /// `arguments` ignored values, then instantiate `ty` into it.
    ///
    /// Components are created and scheduled; a component previously held by
    /// the target is finalized first. TEXT targets are reset to "".
    New { ty: TypeDescriptor, arguments: usize },
    /// Pop a target variable. A held component is finalized, any other
    /// value is cleared.
    Delete,

    /// Pop a service (on top) and the message fields, enqueue the message.
    Send(MessageId),
    /// Pop a service; once a matching message is at the head of its queue,
    /// dequeue it and store the fields into the destination variables
    /// below the service. Suspends while no matching message is present.
    Receive(MessageId),
    /// Pop a service, wait for any message, push whether the head matches.
    ReceiveTest(MessageId),
    /// Like [`Instruction::ReceiveTest`] but answers immediately.
    InputTest(MessageId),
    /// Pop a component (on top) and a service, connect them.
    Connect,
    /// Pop a component (on top) and a service, drop the association.
    Disconnect,

    /// Pop `arguments` values and invoke a built-in; push its result if any.
    SystemCall {
        operator: SystemCallOperator,
        arguments: usize,
    },

    /// Pop the procedure's arguments and enter it.
    ProcedureCall(ProcedureId),
    /// Leave the innermost procedure. A return value, if any, stays on the stack.
    Return,

    LoadBoolean(bool),
    LoadText(String),
    LoadCharacter(char),
    LoadFloat(f64),
    LoadInteger(i64),

    /// Not supported; executing it is fatal.
    Move,
    /// Pop a value (on top) and a target variable, store the value.
    StoreVariable,

    /// Push a scalar variable cell.
    LoadVariable(VariableId),
    /// Push an indexed variable (or a TEXT variable).
    LoadArrayVariable(VariableId),
    /// Pop the index, push the element cell, creating it on first access.
    LoadArrayVariableElement(VariableId),
    /// Pop a component, push its service for the interface.
    LoadService(InterfaceId),
    /// Push the pointer of the running component or service.
    LoadThis,

    /// Not supported; logged and ignored.
    AcquireShared,
    /// Not supported; logged and ignored.
    ReleaseShared,
    /// Take the global exclusive lock, suspending while someone else holds it.
    AcquireExclusive,
    /// Give the global exclusive lock back, suspending while the release is refused.
    ReleaseExclusive,

    Branch(i64),
    /// Pop a boolean, jump if it is true.
    BranchTrue(i64),
    /// Pop a boolean, jump if it is false.
    BranchFalse(i64),

    /// Pop a variable, push whether it holds (or is declared as) the component type.
    IsType(ComponentId),
    /// Pop a value, push whether it is defined.
    ExistsTest,

    /// Push a fresh FOREACH cursor.
    BeginForEach,
    /// Pop the FOREACH cursor.
    EndForEach,
    /// Pop the indexed variable (on top), its index variables and the
    /// cursor. Assign the next populated index to the index variables, push
    /// the advanced cursor and whether an entry was assigned.
    AssignArrayIndex,
}

/// A complete program: descriptor tables plus the entry components.
#[derive(Debug, Clone, PartialEq)]
pub struct Program {
    pub components: Vec<ComponentDescriptor>,
    pub interfaces: Vec<InterfaceDescriptor>,
    pub messages: Vec<MessageDescriptor>,
    pub procedures: Vec<ProcedureDescriptor>,
    pub variables: Vec<VariableDescriptor>,
    pub entry_points: Vec<ComponentId>,
}

impl Program {
    /// An empty program holding only the reserved messages.
    pub fn new() -> Self {
        Self {
            components: Vec::new(),
            interfaces: Vec::new(),
            messages: vec![
                MessageDescriptor {
                    name: "FINISH".to_string(),
                    fields: Vec::new(),
                },
                MessageDescriptor {
                    name: "ANY".to_string(),
                    fields: Vec::new(),
                },
            ],
            procedures: Vec::new(),
            variables: Vec::new(),
            entry_points: Vec::new(),
        }
    }

    pub fn component(&self, id: ComponentId) -> VmResult<&ComponentDescriptor> {
        self.components
            .get(id.0)
            .ok_or_else(|| VmError::MalformedIl(format!("unknown {}", id)))
    }

    pub fn interface(&self, id: InterfaceId) -> VmResult<&InterfaceDescriptor> {
        self.interfaces
            .get(id.0)
            .ok_or_else(|| VmError::MalformedIl(format!("unknown {}", id)))
    }

    pub fn message(&self, id: MessageId) -> VmResult<&MessageDescriptor> {
        self.messages
            .get(id.0)
            .ok_or_else(|| VmError::MalformedIl(format!("unknown {}", id)))
    }

    pub fn procedure(&self, id: ProcedureId) -> VmResult<&ProcedureDescriptor> {
        self.procedures
            .get(id.0)
            .ok_or_else(|| VmError::MalformedIl(format!("unknown {}", id)))
    }

    pub fn variable(&self, id: VariableId) -> VmResult<&VariableDescriptor> {
        self.variables
            .get(id.0)
            .ok_or_else(|| VmError::MalformedIl(format!("unknown {}", id)))
    }

    pub fn implementation(
        &self,
        component: ComponentId,
        index: usize,
    ) -> VmResult<&ImplementationDescriptor> {
        self.component(component)?
            .implementations
            .get(index)
            .ok_or_else(|| {
                VmError::MalformedIl(format!("{} has no implementation {}", component, index))
            })
    }

    pub fn component_by_name(&self, name: &str) -> Option<ComponentId> {
        self.components
            .iter()
            .position(|component| component.name == name)
            .map(ComponentId)
    }
}

impl Default for Program {
    fn default() -> Self {
        Self::new()
    }
}
