//! Execution context of one program run.
//!
//! The runtime owns everything a run mutates: the process registry, the
//! scheduler, the connection tables and the exclusive lock. Nothing is
//! global, so independent runtimes can coexist in one thread.

use std::cell::Cell;
use std::collections::{HashMap, HashSet, VecDeque};
use std::rc::Rc;

use composita_syscall::{SyscallRegistry, SystemHandle};
use log::{debug, trace};

use crate::active::{ActiveValue, ComponentState};
use crate::config::RuntimeConfig;
use crate::error::{VmError, VmResult};
use crate::il::{ComponentId, InterfaceId, MessageId, Program};
use crate::interpreter::Interpreter;
use crate::memory::{Memory, Process};
use crate::rng::RngStream;
use crate::scheduler::{Scheduler, Task};
use crate::value::{ComponentPointer, MessageValue, Pointer, ServicePointer};

pub type OutputSink = Box<dyn FnMut(&str)>;
pub type RunningHook = Box<dyn FnMut(bool)>;

/// Stops a run at the next scheduler turn. Clones share the flag.
#[derive(Debug, Clone, Default)]
pub struct HaltHandle(Rc<Cell<bool>>);

impl HaltHandle {
    pub fn halt(&self) {
        self.0.set(true);
    }

    pub fn is_halted(&self) -> bool {
        self.0.get()
    }

    fn clear(&self) {
        self.0.set(false);
    }
}

pub struct Runtime {
    config: RuntimeConfig,
    interpreter: Rc<Interpreter>,
    program: Option<Rc<Program>>,
    memory: Memory,
    scheduler: Scheduler,
    /// One service pointer per (interface, implementing component).
    services: HashMap<(InterfaceId, ComponentPointer), ServicePointer>,
    service_owners: HashMap<ServicePointer, ComponentPointer>,
    client_to_server: HashMap<ComponentPointer, Vec<ServicePointer>>,
    connected: HashSet<ServicePointer>,
    exclusive_lock: Option<u64>,
    next_holder_id: u64,
    output: OutputSink,
    running_hook: RunningHook,
    rng: RngStream,
    halt: HaltHandle,
    turns: u64,
}

impl Runtime {
    pub fn new() -> Self {
        Self::with_config(RuntimeConfig::default())
    }

    pub fn with_config(config: RuntimeConfig) -> Self {
        Self {
            rng: RngStream::new(config.random_seed),
            config,
            interpreter: Rc::new(Interpreter::new(SyscallRegistry::with_builtins())),
            program: None,
            memory: Memory::new(),
            scheduler: Scheduler::new(),
            services: HashMap::new(),
            service_owners: HashMap::new(),
            client_to_server: HashMap::new(),
            connected: HashSet::new(),
            exclusive_lock: None,
            next_holder_id: 0,
            output: Box::new(|text| print!("{}", text)),
            running_hook: Box::new(|_| {}),
            halt: HaltHandle::default(),
            turns: 0,
        }
    }

    /// Replaces the system calls available to programs.
    pub fn with_syscalls(mut self, syscalls: SyscallRegistry) -> Self {
        self.interpreter = Rc::new(Interpreter::new(syscalls));
        self
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Redirects WRITE output. The default sink prints to stdout.
    pub fn change_output(&mut self, sink: impl FnMut(&str) + 'static) {
        self.output = Box::new(sink);
    }

    /// Called with `true` when a run starts and `false` when it ends.
    pub fn is_running_update(&mut self, hook: impl FnMut(bool) + 'static) {
        self.running_hook = Box::new(hook);
    }

    pub fn halt(&self) {
        self.halt.halt();
    }

    pub fn halt_handle(&self) -> HaltHandle {
        self.halt.clone()
    }

    /// Scheduler turns of the current or last run.
    pub fn turns(&self) -> u64 {
        self.turns
    }

    pub fn exclusive_holder(&self) -> Option<u64> {
        self.exclusive_lock
    }

    /// Drops every process, connection and lock of the previous run.
    /// Output sink, running hook and configuration are kept.
    pub fn reset(&mut self) {
        self.program = None;
        self.memory = Memory::new();
        self.scheduler.clear();
        self.services.clear();
        self.service_owners.clear();
        self.client_to_server.clear();
        self.connected.clear();
        self.exclusive_lock = None;
        self.next_holder_id = 0;
        self.rng = RngStream::new(self.config.random_seed);
        self.halt.clear();
        self.turns = 0;
    }

    /// Runs `program` until every task is done.
    pub fn execute(&mut self, program: &Program) -> VmResult<()> {
        self.reset();
        let program = Rc::new(program.clone());
        self.program = Some(program.clone());
        for entry in &program.entry_points {
            self.create_component(*entry, Pointer::Root)?;
        }

        (self.running_hook)(true);
        let result = self.run();
        (self.running_hook)(false);

        match &result {
            Ok(()) => debug!("run finished after {} turns", self.turns),
            Err(err) => debug!("run aborted after {} turns: {}", self.turns, err),
        }
        result
    }

    fn run(&mut self) -> VmResult<()> {
        let interpreter = self.interpreter.clone();
        while let Some(mut task) = self.scheduler.next() {
            if self.halt.is_halted() {
                debug!("halted");
                break;
            }
            self.turns += 1;
            if let Some(limit) = self.config.max_turns {
                if self.turns > limit {
                    return Err(VmError::TurnLimitExceeded(limit));
                }
            }
            trace!("turn {}: {}", self.turns, task.pointer);
            task.execute(&interpreter, self)?;
            self.scheduler.complete(task);
        }
        Ok(())
    }

    pub fn program(&self) -> VmResult<Rc<Program>> {
        self.program
            .clone()
            .ok_or_else(|| VmError::MalformedIl("no program loaded".to_string()))
    }

    /// The process behind `address`.
    pub fn load(&self, address: usize) -> VmResult<&Process> {
        self.memory.process(address)
    }

    pub fn load_mut(&mut self, address: usize) -> VmResult<&mut Process> {
        self.memory.process_mut(address)
    }

    /// Instantiates a component inside `container` and schedules it.
    pub fn create_component(
        &mut self,
        descriptor: ComponentId,
        container: Pointer,
    ) -> VmResult<ComponentPointer> {
        let program = self.program()?;
        let pointer = ComponentPointer {
            address: self.memory.allocate(),
            descriptor,
        };
        let value = ActiveValue::component(&program, pointer, container)?;
        self.memory
            .insert(pointer.address, Process::new(Pointer::Component(pointer), value));
        self.scheduler.enqueue(Task::new(Pointer::Component(pointer)));
        debug!(
            "created {} {} in {}",
            program.component(descriptor)?.name,
            pointer,
            container
        );
        Ok(pointer)
    }

    /// Runs the Finally section of `component` next.
    pub fn finalize(&mut self, component: ComponentPointer) -> VmResult<()> {
        if self.memory.process_mut(component.address)?.finalize() {
            debug!("finalizing {}", component);
        }
        Ok(())
    }

    fn component_state_mut(
        &mut self,
        component: ComponentPointer,
    ) -> VmResult<&mut ComponentState> {
        self.memory
            .process_mut(component.address)?
            .value
            .component_state_mut()
            .ok_or_else(|| VmError::MalformedIl(format!("{} is not a component", component)))
    }

    /// The service `component` provides or is connected to for `interface`.
    pub fn get_service(
        &mut self,
        interface: InterfaceId,
        component: ComponentPointer,
    ) -> VmResult<ServicePointer> {
        if let Some(service) = self.services.get(&(interface, component)) {
            return Ok(*service);
        }
        let program = self.program()?;
        let implements = program
            .component(component.descriptor)?
            .implementation_index(interface)
            .is_some();
        if implements {
            let service = ServicePointer {
                address: self.memory.allocate(),
                interface,
            };
            self.services.insert((interface, component), service);
            self.service_owners.insert(service, component);
            debug!("{} provides {} as {}", component, interface, service);
            return Ok(service);
        }

        let state = self
            .memory
            .process(component.address)?
            .value
            .component_state()
            .ok_or_else(|| VmError::MalformedIl(format!("{} is not a component", component)))?;
        state
            .offered
            .get(&interface)
            .copied()
            .flatten()
            .or_else(|| state.required.get(&interface).copied().flatten())
            .ok_or_else(|| {
                VmError::Connection(format!(
                    "{} has no service for {}",
                    component, interface
                ))
            })
    }

    /// Binds `service` to `to`. The service context is created and scheduled
    /// on its first connection.
    pub fn connect(&mut self, to: ComponentPointer, service: ServicePointer) -> VmResult<()> {
        if self.connected.contains(&service) {
            return Err(VmError::Connection(format!(
                "{} is already connected",
                service
            )));
        }
        let owner = *self.service_owners.get(&service).ok_or_else(|| {
            VmError::Connection(format!("no component implements {}", service))
        })?;
        let program = self.program()?;
        let implementation = program
            .component(owner.descriptor)?
            .implementation_index(service.interface)
            .ok_or_else(|| {
                VmError::Connection(format!("{} does not implement {}", owner, service.interface))
            })?;
        let to_implements = program
            .component(to.descriptor)?
            .implementation_index(service.interface)
            .is_some();

        let interface = service.interface;
        if to_implements {
            self.component_state_mut(to)?
                .offered
                .insert(interface, Some(service));
            self.component_state_mut(owner)?
                .required
                .insert(interface, Some(service));
        } else {
            self.component_state_mut(to)?
                .required
                .insert(interface, Some(service));
            self.component_state_mut(owner)?
                .offered
                .insert(interface, Some(service));
        }

        if !self.memory.contains(service.address) {
            let value = ActiveValue::service(&program, service, owner, implementation)?;
            self.memory
                .insert(service.address, Process::new(Pointer::Service(service), value));
            self.scheduler.enqueue(Task::new(Pointer::Service(service)));
        }
        self.connected.insert(service);
        self.client_to_server.entry(to).or_default().push(service);
        debug!("connected {} to {}", service, to);
        Ok(())
    }

    /// Drops the association between `from` and `service`. Unknown
    /// associations are ignored.
    pub fn disconnect(&mut self, from: ComponentPointer, service: ServicePointer) -> VmResult<()> {
        let Some(servers) = self.client_to_server.get_mut(&from) else {
            return Ok(());
        };
        let Some(position) = servers.iter().position(|server| *server == service) else {
            return Ok(());
        };
        servers.remove(position);
        self.connected.remove(&service);

        let state = self.component_state_mut(from)?;
        for slot in state.offered.values_mut().chain(state.required.values_mut()) {
            if *slot == Some(service) {
                *slot = None;
            }
        }
        debug!("disconnected {} from {}", service, from);
        Ok(())
    }

    fn queue_mut(
        &mut self,
        service: ServicePointer,
    ) -> VmResult<&mut VecDeque<MessageValue>> {
        if !self.memory.contains(service.address) {
            return Err(VmError::Connection(format!("{} is not connected", service)));
        }
        self.memory
            .process_mut(service.address)?
            .value
            .service_state_mut()
            .map(|state| &mut state.queue)
            .ok_or_else(|| VmError::MalformedIl(format!("{} is not a service", service)))
    }

    pub fn send(&mut self, service: ServicePointer, message: MessageValue) -> VmResult<()> {
        trace!("send {} to {}", message.descriptor, service);
        self.queue_mut(service)?.push_back(message);
        Ok(())
    }

    /// Dequeues the head message if it is `descriptor`, if `descriptor` is
    /// ANY, or if it is FINISH.
    pub fn receive(
        &mut self,
        service: ServicePointer,
        descriptor: MessageId,
    ) -> VmResult<Option<MessageValue>> {
        let queue = self.queue_mut(service)?;
        let accepted = queue.front().is_some_and(|head| {
            head.descriptor == descriptor || descriptor == MessageId::ANY || head.is_finish()
        });
        Ok(if accepted { queue.pop_front() } else { None })
    }

    pub fn peek(&mut self, service: ServicePointer) -> VmResult<Option<MessageId>> {
        Ok(self.queue_mut(service)?.front().map(|head| head.descriptor))
    }

    /// Takes the exclusive lock for `old`, or issues a new holder id when
    /// the lock is free. `None` while somebody else holds it.
    pub fn acquire_exclusive(&mut self, old: Option<u64>) -> Option<u64> {
        match self.exclusive_lock {
            Some(holder) if Some(holder) == old => Some(holder),
            Some(_) => None,
            None => {
                let id = self.next_holder_id;
                self.next_holder_id += 1;
                self.exclusive_lock = Some(id);
                debug!("exclusive lock taken by holder {}", id);
                Some(id)
            }
        }
    }

    /// Releases the exclusive lock. Refused unless `id` is the current
    /// holder; with the lock free only a release without an id succeeds.
    pub fn release_exclusive(&mut self, id: Option<u64>) -> bool {
        match (self.exclusive_lock, id) {
            (Some(holder), Some(id)) if holder == id => {
                self.exclusive_lock = None;
                debug!("exclusive lock released by holder {}", id);
                true
            }
            (None, None) => true,
            _ => false,
        }
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemHandle for Runtime {
    fn print(&mut self, text: &str) {
        (self.output)(text);
    }

    fn random_unit(&mut self) -> f64 {
        self.rng.uniform()
    }
}
