use std::collections::HashMap;

use crate::active::ActiveValue;
use crate::error::{VmError, VmResult};
use crate::evalstack::EvaluationStack;
use crate::il::MessageId;
use crate::value::{Pointer, ServicePointer};

/// A blocking instruction waiting to be retried on the next turn.
#[derive(Debug, Clone, PartialEq)]
pub enum PendingOperation {
    Receive {
        service: ServicePointer,
        message: MessageId,
    },
    ReceiveTest {
        service: ServicePointer,
        message: MessageId,
    },
    AcquireExclusive,
    ReleaseExclusive,
}

/// An active value plus the execution state the interpreter keeps for it.
#[derive(Debug)]
pub struct Process {
    pub pointer: Pointer,
    pub value: ActiveValue,
    pub stack: EvaluationStack,
    pub pending: Option<PendingOperation>,
    /// Holder id of the exclusive lock, kept across acquire and release.
    pub exclusive_lock: Option<u64>,
}

impl Process {
    pub fn new(pointer: Pointer, value: ActiveValue) -> Self {
        Self {
            pointer,
            value,
            stack: EvaluationStack::new(),
            pending: None,
            exclusive_lock: None,
        }
    }

    /// Forces Finally. Work suspended in the interrupted section is dropped.
    pub fn finalize(&mut self) -> bool {
        let changed = self.value.finalize();
        if changed {
            self.pending = None;
            self.stack.clear();
        }
        changed
    }
}

/// Address-keyed registry of every process created during a run.
///
/// Finalized processes stay registered so pointers held elsewhere keep
/// resolving.
#[derive(Debug, Default)]
pub struct Memory {
    next_address: usize,
    processes: HashMap<usize, Process>,
}

impl Memory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allocate(&mut self) -> usize {
        let address = self.next_address;
        self.next_address += 1;
        address
    }

    pub fn insert(&mut self, address: usize, process: Process) {
        self.processes.insert(address, process);
    }

    pub fn contains(&self, address: usize) -> bool {
        self.processes.contains_key(&address)
    }

    pub fn process(&self, address: usize) -> VmResult<&Process> {
        self.processes
            .get(&address)
            .ok_or(VmError::InvalidPointer(address))
    }

    pub fn process_mut(&mut self, address: usize) -> VmResult<&mut Process> {
        self.processes
            .get_mut(&address)
            .ok_or(VmError::InvalidPointer(address))
    }

    pub fn len(&self) -> usize {
        self.processes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processes.is_empty()
    }
}
