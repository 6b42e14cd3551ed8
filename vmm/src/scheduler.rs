use std::collections::VecDeque;

use log::trace;

use crate::error::VmResult;
use crate::interpreter::{ExecutionResult, Interpreter};
use crate::runtime::Runtime;
use crate::value::Pointer;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Ready,
    Running,
    /// Waiting on a pending operation; still polled every turn.
    Paused,
    Done,
}

/// Scheduling handle of one process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Task {
    pub pointer: Pointer,
    pub state: TaskState,
}

impl Task {
    pub fn new(pointer: Pointer) -> Self {
        Self {
            pointer,
            state: TaskState::Ready,
        }
    }

    pub fn is_done(&self) -> bool {
        self.state == TaskState::Done
    }

    /// Runs exactly one interpreter step for this task.
    pub fn execute(&mut self, interpreter: &Interpreter, runtime: &mut Runtime) -> VmResult<()> {
        if self.is_done() {
            return Ok(());
        }
        self.state = TaskState::Running;
        let result = interpreter.process(runtime, self.pointer)?;
        trace!("{} -> {:?}", self.pointer, result);
        self.state = match result {
            ExecutionResult::Exited => TaskState::Done,
            ExecutionResult::Blocked => TaskState::Paused,
            ExecutionResult::Continue | ExecutionResult::Idle => TaskState::Ready,
        };
        Ok(())
    }
}

/// Round-robin ready queue. No priorities; a blocked task keeps its turn.
#[derive(Debug, Default)]
pub struct Scheduler {
    active: Option<Task>,
    ready: VecDeque<Task>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&mut self, task: Task) {
        self.ready.push_back(task);
    }

    /// Requeues the previous task unless it is done, then takes the head.
    pub fn next(&mut self) -> Option<Task> {
        if let Some(task) = self.active.take() {
            if !task.is_done() {
                self.ready.push_back(task);
            }
        }
        self.ready.pop_front()
    }

    /// Hands a task back after its turn.
    pub fn complete(&mut self, task: Task) {
        self.active = Some(task);
    }

    pub fn len(&self) -> usize {
        self.ready.len() + usize::from(self.active.is_some())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&mut self) {
        self.active = None;
        self.ready.clear();
    }
}
