//! Textual rendering of IL for traces and the disassembler.

use std::fmt::Write;

use crate::il::{
    ComponentId, Declarations, Instruction, InterfaceId, MessageId, ProcedureId, Program,
    TypeDescriptor, VariableId,
};

fn variable_name(program: &Program, id: VariableId) -> String {
    program
        .variable(id)
        .map(|variable| variable.name.clone())
        .unwrap_or_else(|_| id.to_string())
}

fn message_name(program: &Program, id: MessageId) -> String {
    program
        .message(id)
        .map(|message| message.name.clone())
        .unwrap_or_else(|_| id.to_string())
}

fn interface_name(program: &Program, id: InterfaceId) -> String {
    program
        .interface(id)
        .map(|interface| interface.name.clone())
        .unwrap_or_else(|_| id.to_string())
}

fn component_name(program: &Program, id: ComponentId) -> String {
    program
        .component(id)
        .map(|component| component.name.clone())
        .unwrap_or_else(|_| id.to_string())
}

fn procedure_name(program: &Program, id: ProcedureId) -> String {
    program
        .procedure(id)
        .map(|procedure| procedure.name.clone())
        .unwrap_or_else(|_| id.to_string())
}

fn type_name(program: &Program, ty: &TypeDescriptor) -> String {
    match ty {
        TypeDescriptor::Component(id) => component_name(program, *id),
        other => other.name(),
    }
}

/// Convert an instruction to its textual form, resolving descriptor names.
pub fn instruction_to_text(instruction: &Instruction, program: &Program) -> String {
    match instruction {
        Instruction::Add => "ADD".to_string(),
        Instruction::Subtract => "SUB".to_string(),
        Instruction::Multiply => "MUL".to_string(),
        Instruction::Divide => "DIV".to_string(),
        Instruction::Modulo => "MOD".to_string(),
        Instruction::Negate => "NEGATE".to_string(),
        Instruction::Equal => "EQUAL".to_string(),
        Instruction::NotEqual => "NOT_EQUAL".to_string(),
        Instruction::Less => "LESS".to_string(),
        Instruction::LessEqual => "LESS_EQUAL".to_string(),
        Instruction::Greater => "GREATER".to_string(),
        Instruction::GreaterEqual => "GREATER_EQUAL".to_string(),
        Instruction::Not => "NOT".to_string(),
        Instruction::And => "AND".to_string(),
        Instruction::Or => "OR".to_string(),
        Instruction::New { ty, arguments } => {
            format!("NEW {}, {}", type_name(program, ty), arguments)
        }
        Instruction::Delete => "DELETE".to_string(),
        Instruction::Send(message) => format!("SEND {}", message_name(program, *message)),
        Instruction::Receive(message) => format!("RECEIVE {}", message_name(program, *message)),
        Instruction::ReceiveTest(message) => {
            format!("RECEIVE_TEST {}", message_name(program, *message))
        }
        Instruction::InputTest(message) => {
            format!("INPUT_TEST {}", message_name(program, *message))
        }
        Instruction::Connect => "CONNECT".to_string(),
        Instruction::Disconnect => "DISCONNECT".to_string(),
        Instruction::SystemCall {
            operator,
            arguments,
        } => format!("SYSTEM_CALL {}, {}", operator, arguments),
        Instruction::ProcedureCall(procedure) => {
            format!("CALL {}", procedure_name(program, *procedure))
        }
        Instruction::Return => "RETURN".to_string(),
        Instruction::LoadBoolean(b) => format!("LOAD_BOOLEAN {}", if *b { "TRUE" } else { "FALSE" }),
        Instruction::LoadText(s) => format!("LOAD_TEXT {:?}", s),
        Instruction::LoadCharacter(c) => format!("LOAD_CHARACTER {:?}", c),
        Instruction::LoadFloat(f) => format!("LOAD_REAL {:?}", f),
        Instruction::LoadInteger(i) => format!("LOAD_INTEGER {}", i),
        Instruction::Move => "MOVE".to_string(),
        Instruction::StoreVariable => "STORE".to_string(),
        Instruction::LoadVariable(id) => format!("LOAD_VAR {}", variable_name(program, *id)),
        Instruction::LoadArrayVariable(id) => {
            format!("LOAD_ARRAY_VAR {}", variable_name(program, *id))
        }
        Instruction::LoadArrayVariableElement(id) => {
            format!("LOAD_ARRAY_ELEMENT {}", variable_name(program, *id))
        }
        Instruction::LoadService(interface) => {
            format!("LOAD_SERVICE {}", interface_name(program, *interface))
        }
        Instruction::LoadThis => "LOAD_THIS".to_string(),
        Instruction::AcquireShared => "ACQUIRE_SHARED".to_string(),
        Instruction::ReleaseShared => "RELEASE_SHARED".to_string(),
        Instruction::AcquireExclusive => "ACQUIRE_EXCLUSIVE".to_string(),
        Instruction::ReleaseExclusive => "RELEASE_EXCLUSIVE".to_string(),
        Instruction::Branch(offset) => format!("BRANCH {}", offset),
        Instruction::BranchTrue(offset) => format!("BRANCH_TRUE {}", offset),
        Instruction::BranchFalse(offset) => format!("BRANCH_FALSE {}", offset),
        Instruction::IsType(component) => format!("IS_TYPE {}", component_name(program, *component)),
        Instruction::ExistsTest => "EXISTS_TEST".to_string(),
        Instruction::BeginForEach => "BEGIN_FOREACH".to_string(),
        Instruction::EndForEach => "END_FOREACH".to_string(),
        Instruction::AssignArrayIndex => "ASSIGN_ARRAY_INDEX".to_string(),
    }
}

/// One numbered instruction per line.
pub fn code_to_text(code: &[Instruction], program: &Program) -> String {
    let mut text = String::new();
    for (index, instruction) in code.iter().enumerate() {
        let _ = writeln!(text, "    {:4}  {}", index, instruction_to_text(instruction, program));
    }
    text
}

fn section_to_text(out: &mut String, name: &str, code: &[Instruction], program: &Program) {
    if code.is_empty() {
        return;
    }
    let _ = writeln!(out, "  {}:", name);
    out.push_str(&code_to_text(code, program));
}

fn declarations_to_text(out: &mut String, declarations: &Declarations, program: &Program) {
    for id in &declarations.variables {
        if let Ok(variable) = program.variable(*id) {
            let keyword = if variable.mutable { "VARIABLE" } else { "CONSTANT" };
            let index = if variable.index_types.is_empty() {
                String::new()
            } else {
                let types = variable
                    .index_types
                    .iter()
                    .map(|ty| type_name(program, ty))
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("[{}]", types)
            };
            let _ = writeln!(
                out,
                "  {} {}{}: {}",
                keyword,
                variable.name,
                index,
                type_name(program, &variable.ty)
            );
        }
    }
    for id in &declarations.procedures {
        let _ = writeln!(out, "  PROCEDURE {}", procedure_name(program, *id));
    }
    section_to_text(out, "INIT", &declarations.init, program);
}

/// Disassembles the whole program.
pub fn program_to_text(program: &Program) -> String {
    let mut out = String::new();
    for (index, message) in program.messages.iter().enumerate().skip(2) {
        let fields = message
            .fields
            .iter()
            .map(|ty| type_name(program, ty))
            .collect::<Vec<_>>()
            .join(", ");
        let _ = writeln!(out, "MESSAGE {} ({}) #{}", message.name, fields, index);
    }
    for interface in &program.interfaces {
        let messages = interface
            .messages
            .iter()
            .map(|id| message_name(program, *id))
            .collect::<Vec<_>>()
            .join(", ");
        let _ = writeln!(out, "INTERFACE {} {{ {} }}", interface.name, messages);
    }
    for procedure in &program.procedures {
        let parameters = procedure
            .parameters
            .iter()
            .map(|id| variable_name(program, *id))
            .collect::<Vec<_>>()
            .join(", ");
        let returns = procedure
            .return_type
            .map(|ty| format!(": {}", type_name(program, &ty)))
            .unwrap_or_default();
        let _ = writeln!(out, "PROCEDURE {}({}){}", procedure.name, parameters, returns);
        declarations_to_text(&mut out, &procedure.declarations, program);
        section_to_text(&mut out, "BEGIN", &procedure.begin, program);
    }
    for (index, component) in program.components.iter().enumerate() {
        let entry = if program.entry_points.contains(&ComponentId(index)) {
            " (entry)"
        } else {
            ""
        };
        let _ = writeln!(out, "COMPONENT {}{}", component.name, entry);
        for id in &component.offers {
            let _ = writeln!(out, "  OFFERS {}", interface_name(program, *id));
        }
        for id in &component.requires {
            let _ = writeln!(out, "  REQUIRES {}", interface_name(program, *id));
        }
        declarations_to_text(&mut out, &component.declarations, program);
        for implementation in &component.implementations {
            let _ = writeln!(
                out,
                "  IMPLEMENTATION {}",
                interface_name(program, implementation.interface)
            );
            declarations_to_text(&mut out, &implementation.declarations, program);
            section_to_text(&mut out, "BEGIN", &implementation.begin, program);
        }
        section_to_text(&mut out, "BEGIN", &component.begin, program);
        section_to_text(&mut out, "ACTIVITY", &component.activity, program);
        section_to_text(&mut out, "FINALLY", &component.finally, program);
    }
    out
}
