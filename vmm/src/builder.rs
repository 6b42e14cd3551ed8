//! Programmatic construction of IL programs.
//!
//! Stands in for the external compiler: tests, the demos and the CLI build
//! their programs here.
//!
//! ```
//! use composita_vm::builder::{Code, ComponentBuilder, ProgramBuilder};
//! use composita_vm::il::Instruction;
//!
//! let mut builder = ProgramBuilder::new();
//! let main = builder.component(
//!     ComponentBuilder::new("Main").begin(Code::new().write(Instruction::LoadText("hi".into()))),
//! );
//! builder.entry_point(main);
//! let program = builder.build().unwrap();
//! assert_eq!(program.entry_points.len(), 1);
//! ```

use composita_syscall::SystemCallOperator;

use crate::error::{VmError, VmResult};
use crate::il::{
    ComponentDescriptor, ComponentId, Declarations, ImplementationDescriptor, Instruction,
    InterfaceDescriptor, InterfaceId, MessageDescriptor, MessageId, ProcedureDescriptor,
    ProcedureId, Program, TypeDescriptor, VariableDescriptor, VariableId,
};

/// A jump target inside one [`Code`] section.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Label(usize);

/// Instruction list with symbolic branch targets.
#[derive(Debug, Clone, Default)]
pub struct Code {
    instructions: Vec<Instruction>,
    labels: Vec<Option<usize>>,
    fixups: Vec<(usize, Label)>,
}

impl Code {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    pub fn emit(mut self, instruction: Instruction) -> Self {
        self.instructions.push(instruction);
        self
    }

    pub fn emit_all(mut self, instructions: impl IntoIterator<Item = Instruction>) -> Self {
        self.instructions.extend(instructions);
        self
    }

    /// A new unbound label.
    pub fn label(&mut self) -> Label {
        self.labels.push(None);
        Label(self.labels.len() - 1)
    }

    /// Binds `label` to the next emitted instruction.
    pub fn bind(mut self, label: Label) -> Self {
        if let Some(slot) = self.labels.get_mut(label.0) {
            *slot = Some(self.instructions.len());
        }
        self
    }

    fn branch_to(mut self, instruction: Instruction, label: Label) -> Self {
        self.fixups.push((self.instructions.len(), label));
        self.instructions.push(instruction);
        self
    }

    pub fn branch(self, label: Label) -> Self {
        self.branch_to(Instruction::Branch(0), label)
    }

    pub fn branch_true(self, label: Label) -> Self {
        self.branch_to(Instruction::BranchTrue(0), label)
    }

    pub fn branch_false(self, label: Label) -> Self {
        self.branch_to(Instruction::BranchFalse(0), label)
    }

    pub fn syscall(self, operator: SystemCallOperator, arguments: usize) -> Self {
        self.emit(Instruction::SystemCall {
            operator,
            arguments,
        })
    }

    /// `variable := <value>` where `value` is one loading instruction.
    pub fn assign(self, variable: VariableId, value: Instruction) -> Self {
        self.emit(Instruction::LoadVariable(variable))
            .emit(value)
            .emit(Instruction::StoreVariable)
    }

    /// `WRITE(<value>)`.
    pub fn write(self, value: Instruction) -> Self {
        self.emit(value).syscall(SystemCallOperator::Write, 1)
    }

    pub fn write_line(self) -> Self {
        self.syscall(SystemCallOperator::WriteLine, 0)
    }

    /// Resolves labels into relative offsets.
    pub fn finish(self) -> VmResult<Vec<Instruction>> {
        let mut instructions = self.instructions;
        for (index, label) in self.fixups {
            let target = self
                .labels
                .get(label.0)
                .copied()
                .flatten()
                .ok_or_else(|| VmError::MalformedIl(format!("label {} is never bound", label.0)))?;
            let offset = target as i64 - (index as i64 + 1);
            instructions[index] = match instructions[index] {
                Instruction::BranchTrue(_) => Instruction::BranchTrue(offset),
                Instruction::BranchFalse(_) => Instruction::BranchFalse(offset),
                _ => Instruction::Branch(offset),
            };
        }
        Ok(instructions)
    }
}

fn declarations(
    variables: Vec<VariableId>,
    procedures: Vec<ProcedureId>,
    init: Code,
) -> VmResult<Declarations> {
    Ok(Declarations {
        init: init.finish()?,
        variables,
        procedures,
    })
}

#[derive(Debug, Clone)]
pub struct ProcedureBuilder {
    name: String,
    parameters: Vec<VariableId>,
    return_type: Option<TypeDescriptor>,
    variables: Vec<VariableId>,
    procedures: Vec<ProcedureId>,
    init: Code,
    begin: Code,
}

impl ProcedureBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            parameters: Vec::new(),
            return_type: None,
            variables: Vec::new(),
            procedures: Vec::new(),
            init: Code::new(),
            begin: Code::new(),
        }
    }

    pub fn parameter(mut self, id: VariableId) -> Self {
        self.parameters.push(id);
        self
    }

    pub fn returns(mut self, ty: TypeDescriptor) -> Self {
        self.return_type = Some(ty);
        self
    }

    pub fn variable(mut self, id: VariableId) -> Self {
        self.variables.push(id);
        self
    }

    pub fn procedure(mut self, id: ProcedureId) -> Self {
        self.procedures.push(id);
        self
    }

    pub fn init(mut self, code: Code) -> Self {
        self.init = code;
        self
    }

    pub fn begin(mut self, code: Code) -> Self {
        self.begin = code;
        self
    }

    fn build(self) -> VmResult<ProcedureDescriptor> {
        Ok(ProcedureDescriptor {
            name: self.name,
            parameters: self.parameters,
            return_type: self.return_type,
            declarations: declarations(self.variables, self.procedures, self.init)?,
            begin: self.begin.finish()?,
        })
    }
}

/// Service code of a component for one interface.
#[derive(Debug, Clone)]
pub struct ImplementationBuilder {
    interface: InterfaceId,
    variables: Vec<VariableId>,
    procedures: Vec<ProcedureId>,
    init: Code,
    begin: Code,
}

impl ImplementationBuilder {
    pub fn new(interface: InterfaceId) -> Self {
        Self {
            interface,
            variables: Vec::new(),
            procedures: Vec::new(),
            init: Code::new(),
            begin: Code::new(),
        }
    }

    pub fn variable(mut self, id: VariableId) -> Self {
        self.variables.push(id);
        self
    }

    pub fn procedure(mut self, id: ProcedureId) -> Self {
        self.procedures.push(id);
        self
    }

    pub fn init(mut self, code: Code) -> Self {
        self.init = code;
        self
    }

    pub fn begin(mut self, code: Code) -> Self {
        self.begin = code;
        self
    }

    fn build(self) -> VmResult<ImplementationDescriptor> {
        Ok(ImplementationDescriptor {
            interface: self.interface,
            declarations: declarations(self.variables, self.procedures, self.init)?,
            begin: self.begin.finish()?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct ComponentBuilder {
    name: String,
    offers: Vec<InterfaceId>,
    requires: Vec<InterfaceId>,
    implementations: Vec<ImplementationBuilder>,
    variables: Vec<VariableId>,
    procedures: Vec<ProcedureId>,
    init: Code,
    begin: Code,
    activity: Code,
    finally: Code,
}

impl ComponentBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            offers: Vec::new(),
            requires: Vec::new(),
            implementations: Vec::new(),
            variables: Vec::new(),
            procedures: Vec::new(),
            init: Code::new(),
            begin: Code::new(),
            activity: Code::new(),
            finally: Code::new(),
        }
    }

    pub fn offers(mut self, interface: InterfaceId) -> Self {
        self.offers.push(interface);
        self
    }

    pub fn requires(mut self, interface: InterfaceId) -> Self {
        self.requires.push(interface);
        self
    }

    pub fn implementation(mut self, implementation: ImplementationBuilder) -> Self {
        self.implementations.push(implementation);
        self
    }

    pub fn variable(mut self, id: VariableId) -> Self {
        self.variables.push(id);
        self
    }

    pub fn procedure(mut self, id: ProcedureId) -> Self {
        self.procedures.push(id);
        self
    }

    pub fn init(mut self, code: Code) -> Self {
        self.init = code;
        self
    }

    pub fn begin(mut self, code: Code) -> Self {
        self.begin = code;
        self
    }

    pub fn activity(mut self, code: Code) -> Self {
        self.activity = code;
        self
    }

    pub fn finally(mut self, code: Code) -> Self {
        self.finally = code;
        self
    }

    fn build(self) -> VmResult<ComponentDescriptor> {
        Ok(ComponentDescriptor {
            name: self.name,
            offers: self.offers,
            requires: self.requires,
            implementations: self
                .implementations
                .into_iter()
                .map(ImplementationBuilder::build)
                .collect::<VmResult<Vec<_>>>()?,
            declarations: declarations(self.variables, self.procedures, self.init)?,
            begin: self.begin.finish()?,
            activity: self.activity.finish()?,
            finally: self.finally.finish()?,
        })
    }
}

/// Collects descriptors and assigns their ids.
#[derive(Debug, Default)]
pub struct ProgramBuilder {
    program: Program,
    procedures: Vec<ProcedureBuilder>,
    components: Vec<(String, Option<ComponentBuilder>)>,
}

impl ProgramBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn message(&mut self, name: impl Into<String>, fields: Vec<TypeDescriptor>) -> MessageId {
        self.program.messages.push(MessageDescriptor {
            name: name.into(),
            fields,
        });
        MessageId(self.program.messages.len() - 1)
    }

    pub fn interface(&mut self, name: impl Into<String>, messages: Vec<MessageId>) -> InterfaceId {
        self.program.interfaces.push(InterfaceDescriptor {
            name: name.into(),
            messages,
        });
        InterfaceId(self.program.interfaces.len() - 1)
    }

    fn declare_variable(
        &mut self,
        name: impl Into<String>,
        ty: TypeDescriptor,
        mutable: bool,
        index_types: Vec<TypeDescriptor>,
    ) -> VariableId {
        self.program.variables.push(VariableDescriptor {
            name: name.into(),
            ty,
            mutable,
            index_types,
        });
        VariableId(self.program.variables.len() - 1)
    }

    pub fn variable(&mut self, name: impl Into<String>, ty: TypeDescriptor) -> VariableId {
        self.declare_variable(name, ty, true, Vec::new())
    }

    /// Writable during Init only.
    pub fn constant(&mut self, name: impl Into<String>, ty: TypeDescriptor) -> VariableId {
        self.declare_variable(name, ty, false, Vec::new())
    }

    pub fn array(
        &mut self,
        name: impl Into<String>,
        ty: TypeDescriptor,
        index_types: Vec<TypeDescriptor>,
    ) -> VariableId {
        self.declare_variable(name, ty, true, index_types)
    }

    pub fn procedure(&mut self, procedure: ProcedureBuilder) -> ProcedureId {
        self.procedures.push(procedure);
        ProcedureId(self.procedures.len() - 1)
    }

    /// Reserves an id so components can refer to each other before they
    /// are defined.
    pub fn declare_component(&mut self, name: impl Into<String>) -> ComponentId {
        self.components.push((name.into(), None));
        ComponentId(self.components.len() - 1)
    }

    pub fn define_component(&mut self, id: ComponentId, component: ComponentBuilder) {
        if let Some(slot) = self.components.get_mut(id.0) {
            slot.1 = Some(component);
        }
    }

    pub fn component(&mut self, component: ComponentBuilder) -> ComponentId {
        let id = self.declare_component(component.name.clone());
        self.define_component(id, component);
        id
    }

    pub fn entry_point(&mut self, id: ComponentId) {
        self.program.entry_points.push(id);
    }

    pub fn build(self) -> VmResult<Program> {
        let mut program = self.program;
        program.procedures = self
            .procedures
            .into_iter()
            .map(ProcedureBuilder::build)
            .collect::<VmResult<Vec<_>>>()?;
        program.components = self
            .components
            .into_iter()
            .map(|(name, component)| {
                component
                    .ok_or_else(|| {
                        VmError::MalformedIl(format!("component {} is never defined", name))
                    })?
                    .build()
            })
            .collect::<VmResult<Vec<_>>>()?;
        Ok(program)
    }
}
