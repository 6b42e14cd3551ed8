//! Bundled programs, built with the IL builder in place of a compiler.

use composita_vm::builder::{
    Code, ComponentBuilder, ImplementationBuilder, ProcedureBuilder, ProgramBuilder,
};
use composita_vm::il::{Instruction, Program, TypeDescriptor};
use composita_vm::{SystemCallOperator as Sys, VmResult};

use Instruction::*;
use TypeDescriptor::{Boolean, Character, Component, Integer, Text};

/// A named sample program.
pub struct Demo {
    pub name: &'static str,
    pub description: &'static str,
    build: fn() -> VmResult<Program>,
}

impl Demo {
    pub fn build(&self) -> VmResult<Program> {
        (self.build)()
    }
}

pub const DEMOS: &[Demo] = &[
    Demo {
        name: "hello",
        description: "Prints a greeting",
        build: hello,
    },
    Demo {
        name: "arithmetic",
        description: "Evaluates 5 - 3 * 7 + 8",
        build: arithmetic,
    },
    Demo {
        name: "loop",
        description: "Counts from 1 to 3 with a FOR-style loop",
        build: counting_loop,
    },
    Demo {
        name: "lifecycle",
        description: "Deletes a busy component twice; FINALLY runs once",
        build: lifecycle,
    },
    Demo {
        name: "producer-consumer",
        description: "A producer feeding consumers through a round-robin buffer",
        build: producer_consumer,
    },
    Demo {
        name: "foreach",
        description: "Iterates a three-dimensional array in insertion order",
        build: foreach,
    },
    Demo {
        name: "procedures",
        description: "Calls procedures with parameters and return values",
        build: procedures,
    },
    Demo {
        name: "lock",
        description: "Two components interleaving under the exclusive lock",
        build: lock,
    },
];

pub fn find(name: &str) -> Option<&'static Demo> {
    DEMOS.iter().find(|demo| demo.name == name)
}

fn text(s: &str) -> Instruction {
    LoadText(s.to_string())
}

fn single(main: ComponentBuilder) -> VmResult<Program> {
    let mut builder = ProgramBuilder::new();
    let main = builder.component(main);
    builder.entry_point(main);
    builder.build()
}

pub fn hello() -> VmResult<Program> {
    single(ComponentBuilder::new("Hello").begin(Code::new().write(text("Hello World")).write_line()))
}

pub fn arithmetic() -> VmResult<Program> {
    let code = Code::new()
        .emit_all([LoadInteger(5), LoadInteger(3), LoadInteger(7), Multiply, Subtract])
        .emit_all([LoadInteger(8), Add])
        .syscall(Sys::Write, 1)
        .write_line();
    single(ComponentBuilder::new("Arithmetic").begin(code))
}

pub fn counting_loop() -> VmResult<Program> {
    let mut builder = ProgramBuilder::new();
    let i = builder.variable("i", Integer);

    let mut code = Code::new();
    let top = code.label();
    let end = code.label();
    let code = code
        .assign(i, LoadInteger(1))
        .bind(top)
        .emit_all([LoadVariable(i), LoadInteger(3), LessEqual])
        .branch_false(end)
        .write(text("Hello World"))
        .write_line()
        .emit(LoadVariable(i))
        .syscall(Sys::Inc, 1)
        .branch(top)
        .bind(end);

    let main = builder.component(ComponentBuilder::new("Loop").variable(i).begin(code));
    builder.entry_point(main);
    builder.build()
}

pub fn lifecycle() -> VmResult<Program> {
    let mut builder = ProgramBuilder::new();
    let mut activity = Code::new();
    let spin = activity.label();
    let worker = builder.component(
        ComponentBuilder::new("Worker")
            .activity(activity.bind(spin).branch(spin))
            .finally(Code::new().write(text("worker finalized")).write_line()),
    );
    let w = builder.variable("w", Component(worker));

    let code = Code::new()
        .emit_all([LoadVariable(w), New { ty: Component(worker), arguments: 0 }])
        .emit_all([LoadVariable(w), Delete])
        .emit_all([LoadVariable(w), Delete]);
    let main = builder.component(ComponentBuilder::new("Lifecycle").variable(w).begin(code));
    builder.entry_point(main);
    builder.build()
}

const ELEMENTS: i64 = 10;
const CONSUMERS: i64 = 3;

/// Producer -> Buffer -> Consumers. The buffer hands elements to its
/// consumers in turn and forwards the end marker to all of them.
pub fn producer_consumer() -> VmResult<Program> {
    let mut b = ProgramBuilder::new();
    let element = b.message("Element", vec![Integer]);
    let finished = b.message("Finished", vec![]);
    let input = b.interface("Input", vec![element, finished]);
    let sink = b.interface("Sink", vec![element, finished]);

    let item = b.variable("item", Integer);
    let consume = {
        let mut code = Code::new();
        let top = code.label();
        let done = code.label();
        code.bind(top)
            .emit_all([LoadThis, ReceiveTest(element)])
            .branch_false(done)
            .emit_all([LoadVariable(item), LoadThis, Receive(element)])
            .emit(AcquireExclusive)
            .write(text("consumed "))
            .write(LoadVariable(item))
            .write_line()
            .emit(ReleaseExclusive)
            .branch(top)
            .bind(done)
            .emit_all([LoadThis, Receive(finished)])
    };
    let consumer = b.component(
        ComponentBuilder::new("Consumer")
            .offers(sink)
            .implementation(ImplementationBuilder::new(sink).variable(item).begin(consume)),
    );

    let consumers = b.array("consumers", Component(consumer), vec![Integer]);
    // set once every consumer is connected; the Input service waits for it
    let ready = b.variable("ready", Boolean);
    let k = b.variable("k", Integer);
    let setup = {
        let mut code = Code::new();
        let top = code.label();
        let end = code.label();
        code.assign(k, LoadInteger(0))
            .bind(top)
            .emit_all([LoadVariable(k), LoadInteger(CONSUMERS), Less])
            .branch_false(end)
            .emit_all([LoadVariable(k), LoadArrayVariable(consumers)])
            .emit(New { ty: Component(consumer), arguments: 0 })
            .emit_all([LoadVariable(k), LoadArrayVariableElement(consumers), LoadService(sink)])
            .emit_all([LoadThis, Connect])
            .emit(LoadVariable(k))
            .syscall(Sys::Inc, 1)
            .branch(top)
            .bind(end)
            .assign(ready, LoadBoolean(true))
    };

    let value = b.variable("value", Integer);
    let next = b.variable("next", Integer);
    let target = |index| [LoadVariable(index), LoadArrayVariableElement(consumers), LoadService(sink)];
    let forward = {
        let mut code = Code::new();
        let wait = code.label();
        let top = code.label();
        let done = code.label();
        let notify = code.label();
        let end = code.label();
        code.bind(wait)
            .emit(LoadVariable(ready))
            .branch_false(wait)
            .bind(top)
            .emit_all([LoadThis, ReceiveTest(element)])
            .branch_false(done)
            .emit_all([LoadVariable(value), LoadThis, Receive(element)])
            .emit(LoadVariable(value))
            .emit_all(target(next))
            .emit(Send(element))
            .emit_all([LoadVariable(next), LoadVariable(next), LoadInteger(1), Add])
            .emit_all([LoadInteger(CONSUMERS), Modulo, StoreVariable])
            .branch(top)
            .bind(done)
            .emit_all([LoadThis, Receive(finished)])
            .assign(next, LoadInteger(0))
            .bind(notify)
            .emit_all([LoadVariable(next), LoadInteger(CONSUMERS), Less])
            .branch_false(end)
            .emit_all(target(next))
            .emit(Send(finished))
            .emit(LoadVariable(next))
            .syscall(Sys::Inc, 1)
            .branch(notify)
            .bind(end)
    };
    let buffer = b.component(
        ComponentBuilder::new("Buffer")
            .offers(input)
            .implementation(
                ImplementationBuilder::new(input)
                    .variable(value)
                    .variable(next)
                    .begin(forward),
            )
            .variable(consumers)
            .variable(ready)
            .variable(k)
            .begin(setup),
    );

    let i = b.variable("i", Integer);
    let produce = {
        let mut code = Code::new();
        let top = code.label();
        let end = code.label();
        code.assign(i, LoadInteger(1))
            .bind(top)
            .emit_all([LoadVariable(i), LoadInteger(ELEMENTS), LessEqual])
            .branch_false(end)
            .emit_all([LoadVariable(i), LoadThis, LoadService(input), Send(element)])
            .emit(LoadVariable(i))
            .syscall(Sys::Inc, 1)
            .branch(top)
            .bind(end)
            .emit_all([LoadThis, LoadService(input), Send(finished)])
    };
    let producer = b.component(
        ComponentBuilder::new("Producer")
            .requires(input)
            .variable(i)
            .activity(produce),
    );

    let buffer_var = b.variable("buffer", Component(buffer));
    let producer_var = b.variable("producer", Component(producer));
    let code = Code::new()
        .emit_all([LoadVariable(buffer_var), New { ty: Component(buffer), arguments: 0 }])
        .emit_all([LoadVariable(producer_var), New { ty: Component(producer), arguments: 0 }])
        .emit_all([LoadVariable(buffer_var), LoadService(input)])
        .emit_all([LoadVariable(producer_var), Connect]);
    let main = b.component(
        ComponentBuilder::new("ProducerConsumer")
            .variable(buffer_var)
            .variable(producer_var)
            .begin(code),
    );
    b.entry_point(main);
    b.build()
}

pub fn foreach() -> VmResult<Program> {
    let mut b = ProgramBuilder::new();
    let table = b.array("table", Integer, vec![Integer, Text, Character]);
    let i = b.variable("i", Integer);
    let number = b.variable("number", Integer);
    let name = b.variable("name", Text);
    let letter = b.variable("letter", Character);

    let mut code = Code::new();
    let fill = code.label();
    let filled = code.label();
    let walk = code.label();
    let walked = code.label();
    let code = code
        .assign(i, LoadInteger(0))
        .bind(fill)
        .emit_all([LoadVariable(i), LoadInteger(10), Less])
        .branch_false(filled)
        .emit_all([LoadVariable(i), text("k"), LoadCharacter('c'), LoadArrayVariableElement(table)])
        .emit_all([LoadVariable(i), LoadVariable(i), Multiply, StoreVariable])
        .emit(LoadVariable(i))
        .syscall(Sys::Inc, 1)
        .branch(fill)
        .bind(filled)
        .emit_all([LoadInteger(42), text("z"), LoadCharacter('q'), LoadArrayVariableElement(table)])
        .emit_all([LoadInteger(1), StoreVariable])
        .emit_all([LoadInteger(3), text("k"), LoadCharacter('c'), LoadArrayVariableElement(table)])
        .emit_all([LoadInteger(100), StoreVariable])
        .emit(BeginForEach)
        .bind(walk)
        .emit_all([LoadVariable(number), LoadVariable(name), LoadVariable(letter)])
        .emit_all([LoadArrayVariable(table), AssignArrayIndex])
        .branch_false(walked)
        .write(LoadVariable(number))
        .write(text(", "))
        .write(LoadVariable(name))
        .write(text(", "))
        .write(LoadVariable(letter))
        .write(text(" -> "))
        .emit_all([LoadVariable(number), LoadVariable(name), LoadVariable(letter)])
        .emit(LoadArrayVariableElement(table))
        .syscall(Sys::Write, 1)
        .write_line()
        .branch(walk)
        .bind(walked)
        .emit(EndForEach);

    let main = b.component(
        ComponentBuilder::new("ForEach")
            .variable(table)
            .variable(i)
            .variable(number)
            .variable(name)
            .variable(letter)
            .begin(code),
    );
    b.entry_point(main);
    b.build()
}

pub fn procedures() -> VmResult<Program> {
    let mut b = ProgramBuilder::new();
    let n = b.variable("n", Integer);
    let square = b.procedure(
        ProcedureBuilder::new("Square")
            .parameter(n)
            .returns(Integer)
            .begin(Code::new().emit_all([LoadVariable(n), LoadVariable(n), Multiply, Return])),
    );
    let who = b.variable("who", Text);
    let greet = b.procedure(
        ProcedureBuilder::new("Greet").parameter(who).begin(
            Code::new()
                .emit_all([text("Hello, "), LoadVariable(who), Add])
                .syscall(Sys::Write, 1)
                .write_line(),
        ),
    );

    let code = Code::new()
        .emit_all([text("procedures"), ProcedureCall(greet)])
        .write(text("7 * 7 = "))
        .emit_all([LoadInteger(7), ProcedureCall(square)])
        .syscall(Sys::Write, 1)
        .write_line();
    let main = b.component(
        ComponentBuilder::new("Procedures")
            .procedure(square)
            .procedure(greet)
            .begin(code),
    );
    b.entry_point(main);
    b.build()
}

pub fn lock() -> VmResult<Program> {
    let mut b = ProgramBuilder::new();
    let writer = |b: &mut ProgramBuilder, name: &str| {
        let round = b.variable(format!("{}_round", name), Integer);
        let mut code = Code::new();
        let top = code.label();
        let end = code.label();
        let code = code
            .bind(top)
            .emit_all([LoadVariable(round), LoadInteger(3), Less])
            .branch_false(end)
            .emit(AcquireExclusive)
            .write(text(name))
            .write(text(": round "))
            .write(LoadVariable(round))
            .write_line()
            .emit(ReleaseExclusive)
            .emit(LoadVariable(round))
            .syscall(Sys::Inc, 1)
            .branch(top)
            .bind(end);
        b.component(ComponentBuilder::new(name).variable(round).begin(code))
    };
    let left = writer(&mut b, "Left");
    let right = writer(&mut b, "Right");
    let l = b.variable("left", Component(left));
    let r = b.variable("right", Component(right));

    let code = Code::new()
        .emit_all([LoadVariable(l), New { ty: Component(left), arguments: 0 }])
        .emit_all([LoadVariable(r), New { ty: Component(right), arguments: 0 }]);
    let main = b.component(ComponentBuilder::new("Lock").variable(l).variable(r).begin(code));
    b.entry_point(main);
    b.build()
}
