//! Lifecycle state machine shared by components, services and procedures.
//!
//! ```text
//! Init -> Begin -> Activity -> Finally -> Done
//!   \       |         /
//!    +-> Procedure --+      (returns to the calling section)
//! ```
//!
//! Every section keeps its own instruction pointer. Procedures are nested
//! contexts pre-allocated per declared procedure; while a call is active the
//! owner sits in `Section::Procedure` and delegates fetches to the callee.

use std::collections::{BTreeMap, VecDeque};

use log::debug;

use crate::error::{VmError, VmResult};
use crate::il::{
    ComponentId, Declarations, Instruction, InterfaceId, ProcedureId, Program, VariableId,
};
use crate::value::{
    ArrayVariableValue, ComponentPointer, MessageValue, Pointer, ServicePointer, Value,
    VariableCell, VariableSlot, VariableValue,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Section {
    Init,
    Begin,
    Activity,
    Finally,
    Procedure,
}

/// Per-variant part of the state machine.
pub trait SectionCode {
    /// Instructions of `section`; empty when the variant has no such section.
    fn code<'p>(&self, program: &'p Program, section: Section) -> VmResult<&'p [Instruction]>;

    /// Whether Activity may run.
    fn is_ready(&self) -> bool {
        true
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ComponentState {
    pub descriptor: ComponentId,
    pub offered: BTreeMap<InterfaceId, Option<ServicePointer>>,
    pub required: BTreeMap<InterfaceId, Option<ServicePointer>>,
}

impl SectionCode for ComponentState {
    fn code<'p>(&self, program: &'p Program, section: Section) -> VmResult<&'p [Instruction]> {
        let component = program.component(self.descriptor)?;
        Ok(match section {
            Section::Init => &component.declarations.init,
            Section::Begin => &component.begin,
            Section::Activity => &component.activity,
            Section::Finally => &component.finally,
            Section::Procedure => &[],
        })
    }

    fn is_ready(&self) -> bool {
        self.required.values().all(Option::is_some)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ServiceState {
    pub owner: ComponentPointer,
    /// Index into the owner's implementations.
    pub implementation: usize,
    pub queue: VecDeque<MessageValue>,
}

impl SectionCode for ServiceState {
    fn code<'p>(&self, program: &'p Program, section: Section) -> VmResult<&'p [Instruction]> {
        let implementation = program.implementation(self.owner.descriptor, self.implementation)?;
        Ok(match section {
            Section::Init => &implementation.declarations.init,
            Section::Begin => &implementation.begin,
            _ => &[],
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProcedureState {
    pub descriptor: ProcedureId,
    pub parameters: Vec<VariableCell>,
    pub has_returned: bool,
}

impl SectionCode for ProcedureState {
    fn code<'p>(&self, program: &'p Program, section: Section) -> VmResult<&'p [Instruction]> {
        let procedure = program.procedure(self.descriptor)?;
        Ok(match section {
            Section::Init => &procedure.declarations.init,
            Section::Begin => &procedure.begin,
            _ => &[],
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ActiveKind {
    Component(ComponentState),
    Service(ServiceState),
    Procedure(ProcedureState),
}

impl ActiveKind {
    fn state(&self) -> &dyn SectionCode {
        match self {
            ActiveKind::Component(state) => state,
            ActiveKind::Service(state) => state,
            ActiveKind::Procedure(state) => state,
        }
    }

    fn label(&self) -> String {
        match self {
            ActiveKind::Component(state) => state.descriptor.to_string(),
            ActiveKind::Service(state) => format!("service of {}", state.owner),
            ActiveKind::Procedure(state) => state.descriptor.to_string(),
        }
    }
}

/// A runnable execution context.
#[derive(Debug, Clone)]
pub struct ActiveValue {
    /// Enclosing active value used for variable lookup.
    pub parent: Pointer,
    pub kind: ActiveKind,
    variables: Vec<VariableSlot>,
    procedures: Vec<ActiveValue>,
    section: Section,
    previous: Section,
    /// Indexed by `Section as usize`; the Procedure slot holds the active
    /// procedure's index.
    pointers: [usize; 5],
    done: bool,
}

impl ActiveValue {
    pub fn component(
        program: &Program,
        this: ComponentPointer,
        parent: Pointer,
    ) -> VmResult<Self> {
        let component = program.component(this.descriptor)?;
        let state = ComponentState {
            descriptor: this.descriptor,
            offered: component.offers.iter().map(|id| (*id, None)).collect(),
            required: component.requires.iter().map(|id| (*id, None)).collect(),
        };
        let mut value = Self::declare(
            program,
            &component.declarations,
            Pointer::Component(this),
            ActiveKind::Component(state),
        )?;
        value.parent = parent;
        Ok(value)
    }

    pub fn service(
        program: &Program,
        this: ServicePointer,
        owner: ComponentPointer,
        implementation: usize,
    ) -> VmResult<Self> {
        let declarations = &program
            .implementation(owner.descriptor, implementation)?
            .declarations;
        let state = ServiceState {
            owner,
            implementation,
            queue: VecDeque::new(),
        };
        let mut value = Self::declare(
            program,
            declarations,
            Pointer::Service(this),
            ActiveKind::Service(state),
        )?;
        value.parent = Pointer::Component(owner);
        Ok(value)
    }

    fn procedure(program: &Program, descriptor: ProcedureId, owner: Pointer) -> VmResult<Self> {
        let state = ProcedureState {
            descriptor,
            parameters: Vec::new(),
            has_returned: false,
        };
        let declarations = &program.procedure(descriptor)?.declarations;
        Self::declare(program, declarations, owner, ActiveKind::Procedure(state))
    }

    /// Allocates the declared variables and procedures. Nested procedures
    /// see `owner` as their parent.
    fn declare(
        program: &Program,
        declarations: &Declarations,
        owner: Pointer,
        kind: ActiveKind,
    ) -> VmResult<Self> {
        let variables = declarations
            .variables
            .iter()
            .map(|id| declare_variable(program, *id))
            .collect::<VmResult<Vec<_>>>()?;
        let procedures = declarations
            .procedures
            .iter()
            .map(|id| Self::procedure(program, *id, owner))
            .collect::<VmResult<Vec<_>>>()?;
        Ok(Self {
            parent: owner,
            kind,
            variables,
            procedures,
            section: Section::Init,
            previous: Section::Init,
            pointers: [0; 5],
            done: false,
        })
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    pub fn section(&self) -> Section {
        self.section
    }

    pub fn variables(&self) -> &[VariableSlot] {
        &self.variables
    }

    pub fn component_state(&self) -> Option<&ComponentState> {
        match &self.kind {
            ActiveKind::Component(state) => Some(state),
            _ => None,
        }
    }

    pub fn component_state_mut(&mut self) -> Option<&mut ComponentState> {
        match &mut self.kind {
            ActiveKind::Component(state) => Some(state),
            _ => None,
        }
    }

    pub fn service_state(&self) -> Option<&ServiceState> {
        match &self.kind {
            ActiveKind::Service(state) => Some(state),
            _ => None,
        }
    }

    pub fn service_state_mut(&mut self) -> Option<&mut ServiceState> {
        match &mut self.kind {
            ActiveKind::Service(state) => Some(state),
            _ => None,
        }
    }

    pub fn procedure_id(&self) -> Option<ProcedureId> {
        match &self.kind {
            ActiveKind::Procedure(state) => Some(state.descriptor),
            _ => None,
        }
    }

    /// The procedure whose code is currently running, if any.
    pub fn innermost_procedure(&self) -> Option<ProcedureId> {
        if self.section != Section::Procedure {
            return None;
        }
        let child = self.procedures.get(self.pointers[Section::Procedure as usize])?;
        child.innermost_procedure().or(child.procedure_id())
    }

    fn has_returned(&self) -> bool {
        matches!(&self.kind, ActiveKind::Procedure(state) if state.has_returned)
    }

    fn active_procedure_mut(&mut self) -> VmResult<&mut ActiveValue> {
        let index = self.pointers[Section::Procedure as usize];
        self.procedures
            .get_mut(index)
            .ok_or_else(|| VmError::MalformedIl(format!("no procedure at index {}", index)))
    }

    /// Looks a variable up in the running procedure chain, innermost first,
    /// then among this value's own declarations.
    pub fn lookup(&self, id: VariableId) -> Option<VariableSlot> {
        if self.section == Section::Procedure {
            let nested = self
                .procedures
                .get(self.pointers[Section::Procedure as usize])
                .and_then(|child| child.lookup(id));
            if nested.is_some() {
                return nested;
            }
        }
        self.lookup_own(id)
    }

    /// Own declarations only (and parameters, for a procedure).
    pub fn lookup_own(&self, id: VariableId) -> Option<VariableSlot> {
        if let ActiveKind::Procedure(state) = &self.kind {
            if let Some(parameter) = state
                .parameters
                .iter()
                .find(|cell| cell.borrow().descriptor == id)
            {
                return Some(VariableSlot::Scalar(parameter.clone()));
            }
        }
        self.variables
            .iter()
            .find(|slot| slot.descriptor() == id)
            .cloned()
    }

    /// Next instruction, or `None` when done or waiting for readiness.
    pub fn fetch<'p>(&mut self, program: &'p Program) -> VmResult<Option<&'p Instruction>> {
        self.update_section(program)?;
        if self.done {
            return Ok(None);
        }
        if self.section == Section::Procedure {
            return self.active_procedure_mut()?.fetch(program);
        }
        if self.section == Section::Activity && !self.kind.state().is_ready() {
            return Ok(None);
        }
        let slot = self.section as usize;
        let code = self.kind.state().code(program, self.section)?;
        match code.get(self.pointers[slot]) {
            Some(instruction) => {
                self.pointers[slot] += 1;
                Ok(Some(instruction))
            }
            None => Ok(None),
        }
    }

    /// Advances past exhausted sections until one has code left, the
    /// readiness gate holds Begin, or the value is done.
    fn update_section(&mut self, program: &Program) -> VmResult<()> {
        loop {
            if self.done {
                return Ok(());
            }
            let next = match self.section {
                Section::Procedure => {
                    let child = self.active_procedure_mut()?;
                    child.update_section(program)?;
                    if !(child.done || child.has_returned()) {
                        return Ok(());
                    }
                    child.reset();
                    let resume = self.previous;
                    self.previous = Section::Procedure;
                    self.section = resume;
                    continue;
                }
                section => {
                    let length = self.kind.state().code(program, section)?.len();
                    if self.pointers[section as usize] < length {
                        return Ok(());
                    }
                    match section {
                        Section::Init => {
                            self.fix_constants(program)?;
                            Section::Begin
                        }
                        Section::Begin if !self.kind.state().is_ready() => return Ok(()),
                        Section::Begin => Section::Activity,
                        Section::Activity => Section::Finally,
                        _ => {
                            self.previous = Section::Finally;
                            self.done = true;
                            debug!("{} done", self.kind.label());
                            return Ok(());
                        }
                    }
                }
            };
            debug!("{}: {:?} -> {:?}", self.kind.label(), self.section, next);
            self.previous = self.section;
            self.section = next;
        }
    }

    fn fix_constants(&mut self, program: &Program) -> VmResult<()> {
        for slot in &self.variables {
            if let VariableSlot::Scalar(cell) = slot {
                let mut variable = cell.borrow_mut();
                let mutable = program.variable(variable.descriptor)?.mutable;
                variable.fix_access(mutable);
            }
        }
        Ok(())
    }

    /// Relative jump in the running section.
    pub fn jump(&mut self, offset: i64) -> VmResult<()> {
        if self.done {
            return Ok(());
        }
        if self.section == Section::Procedure {
            return self.active_procedure_mut()?.jump(offset);
        }
        let slot = self.section as usize;
        let target = i64::try_from(self.pointers[slot])
            .ok()
            .and_then(|pointer| pointer.checked_add(offset))
            .and_then(|target| usize::try_from(target).ok())
            .ok_or_else(|| {
                VmError::MalformedIl(format!(
                    "jump by {} leaves the {:?} section",
                    offset, self.section
                ))
            })?;
        self.pointers[slot] = target;
        Ok(())
    }

    /// Enters `procedure` with `arguments` in parameter order. While a call
    /// is already running the callee is looked up in the running procedure.
    pub fn call(
        &mut self,
        program: &Program,
        procedure: ProcedureId,
        arguments: Vec<Value>,
    ) -> VmResult<()> {
        if self.done {
            return Ok(());
        }
        if self.section == Section::Procedure {
            return self.active_procedure_mut()?.call(program, procedure, arguments);
        }
        let index = self
            .procedures
            .iter()
            .position(|candidate| candidate.procedure_id() == Some(procedure))
            .ok_or_else(|| {
                VmError::MalformedIl(format!("{} is not declared in this scope", procedure))
            })?;
        self.procedures[index].bind(program, arguments)?;
        self.previous = self.section;
        self.section = Section::Procedure;
        self.pointers[Section::Procedure as usize] = index;
        Ok(())
    }

    fn bind(&mut self, program: &Program, arguments: Vec<Value>) -> VmResult<()> {
        let ActiveKind::Procedure(state) = &mut self.kind else {
            return Err(VmError::MalformedIl("call of a non-procedure".to_string()));
        };
        let descriptor = program.procedure(state.descriptor)?;
        if arguments.len() != descriptor.parameters.len() {
            return Err(VmError::MalformedIl(format!(
                "{} takes {} argument(s), got {}",
                descriptor.name,
                descriptor.parameters.len(),
                arguments.len()
            )));
        }
        let mut parameters = Vec::with_capacity(arguments.len());
        for (id, value) in descriptor.parameters.iter().zip(arguments) {
            let parameter = program.variable(*id)?;
            let fits = if value.is_defined() {
                value.matches_type(&parameter.ty)
            } else {
                parameter.ty.is_component()
            };
            if !fits {
                return Err(VmError::TypeMismatch(format!(
                    "argument {} does not fit parameter {} of type {}",
                    value,
                    parameter.name,
                    parameter.ty.name()
                )));
            }
            parameters.push(
                VariableValue::with_value(*id, parameter.ty, value, parameter.mutable).into_cell(),
            );
        }
        state.parameters = parameters;
        state.has_returned = false;
        Ok(())
    }

    /// Marks the innermost running procedure as returned; the caller's
    /// section is restored on the next fetch.
    pub fn mark_returned(&mut self) -> VmResult<()> {
        if self.section != Section::Procedure {
            return Err(VmError::MalformedIl(
                "RETURN outside of a procedure".to_string(),
            ));
        }
        let child = self.active_procedure_mut()?;
        if child.section == Section::Procedure {
            return child.mark_returned();
        }
        if let ActiveKind::Procedure(state) = &mut child.kind {
            state.has_returned = true;
        }
        Ok(())
    }

    /// Forces the Finally section. A running Finally is never restarted.
    /// Returns whether the section changed.
    pub fn finalize(&mut self) -> bool {
        if self.done || self.section == Section::Finally {
            return false;
        }
        if self.section == Section::Procedure {
            if self.previous == Section::Finally {
                return false;
            }
            let index = self.pointers[Section::Procedure as usize];
            if let Some(child) = self.procedures.get_mut(index) {
                child.reset();
            }
        }
        debug!("{}: finalize from {:?}", self.kind.label(), self.section);
        self.previous = self.section;
        self.section = Section::Finally;
        true
    }

    /// Back to the declaration state, ready for the next call.
    fn reset(&mut self) {
        self.section = Section::Init;
        self.previous = Section::Init;
        self.pointers = [0; 5];
        self.done = false;
        if let ActiveKind::Procedure(state) = &mut self.kind {
            state.parameters.clear();
            state.has_returned = false;
        }
        for slot in &self.variables {
            match slot {
                VariableSlot::Scalar(cell) => cell.borrow_mut().reset(),
                VariableSlot::Array(cell) => cell.borrow_mut().clear(),
            }
        }
        for child in &mut self.procedures {
            child.reset();
        }
    }
}

pub fn declare_variable(program: &Program, id: VariableId) -> VmResult<VariableSlot> {
    let descriptor = program.variable(id)?;
    Ok(if descriptor.is_indexed() {
        VariableSlot::Array(
            ArrayVariableValue::new(id, descriptor.ty, descriptor.index_types.clone()).into_cell(),
        )
    } else {
        VariableSlot::Scalar(VariableValue::new(id, descriptor.ty).into_cell())
    })
}
