//! End-to-end runs of complete programs through the runtime.
//!
//! Every test builds its IL with the builder, executes it on a fresh
//! runtime and checks the captured WRITE output or the error that aborted
//! the run.

use std::cell::RefCell;
use std::rc::Rc;

use composita_syscall::{SysError, SystemCallOperator as Sys};

use crate::builder::{Code, ComponentBuilder, ImplementationBuilder, ProcedureBuilder, ProgramBuilder};
use crate::config::RuntimeConfig;
use crate::error::{VmError, VmResult};
use crate::il::{ComponentId, Instruction, Program, TypeDescriptor};
use crate::runtime::Runtime;

use Instruction::*;
use TypeDescriptor::{Boolean, Character, Component, Integer, Text};

const TEST_TURNS: u64 = 200_000;

fn text(s: &str) -> Instruction {
    LoadText(s.to_string())
}

fn capture(runtime: &mut Runtime) -> Rc<RefCell<String>> {
    let output = Rc::new(RefCell::new(String::new()));
    let sink = output.clone();
    runtime.change_output(move |text| sink.borrow_mut().push_str(text));
    output
}

fn run_with(program: &Program, config: RuntimeConfig) -> (VmResult<()>, String) {
    let mut runtime = Runtime::with_config(config);
    let output = capture(&mut runtime);
    let result = runtime.execute(program);
    let output = output.borrow().clone();
    (result, output)
}

fn run(program: &Program) -> (VmResult<()>, String) {
    run_with(program, RuntimeConfig::default().with_max_turns(TEST_TURNS))
}

/// A program whose only entry point is `main`.
fn with_main(mut builder: ProgramBuilder, main: ComponentBuilder) -> Program {
    let main = builder.component(main);
    builder.entry_point(main);
    builder.build().unwrap()
}

fn main_only(begin: Code) -> Program {
    with_main(ProgramBuilder::new(), ComponentBuilder::new("Main").begin(begin))
}

#[test]
fn test_arithmetic_expression() {
    // WRITE(5 - 3 * 7 + 8)
    let program = main_only(
        Code::new()
            .emit_all([LoadInteger(5), LoadInteger(3), LoadInteger(7), Multiply, Subtract])
            .emit_all([LoadInteger(8), Add])
            .syscall(Sys::Write, 1),
    );
    let (result, output) = run(&program);
    assert_eq!(result, Ok(()));
    assert_eq!(output, "-8");
}

#[test]
fn test_counting_loop() {
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

    let program = with_main(builder, ComponentBuilder::new("Main").variable(i).begin(code));
    let (result, output) = run(&program);
    assert_eq!(result, Ok(()));
    assert_eq!(output, "Hello World\n".repeat(3));
}

/// A component that spins in Activity until it is deleted.
fn spinning_worker(builder: &mut ProgramBuilder) -> ComponentId {
    let mut activity = Code::new();
    let spin = activity.label();
    builder.component(
        ComponentBuilder::new("Worker")
            .activity(activity.bind(spin).branch(spin))
            .finally(Code::new().write(text("FINALLY;"))),
    )
}

#[test]
fn test_delete_runs_finally_once() {
    let mut builder = ProgramBuilder::new();
    let worker = spinning_worker(&mut builder);
    let w = builder.variable("w", Component(worker));

    let code = Code::new()
        .emit_all([LoadVariable(w), New { ty: Component(worker), arguments: 0 }])
        .emit_all([LoadVariable(w), Delete])
        .emit_all([LoadVariable(w), Delete]);
    let program = with_main(builder, ComponentBuilder::new("Main").variable(w).begin(code));

    let (result, output) = run(&program);
    assert_eq!(result, Ok(()));
    assert_eq!(output, "FINALLY;");
}

#[test]
fn test_new_over_live_component_finalizes_it() {
    let mut builder = ProgramBuilder::new();
    let worker = spinning_worker(&mut builder);
    let w = builder.variable("w", Component(worker));

    let new = [LoadVariable(w), New { ty: Component(worker), arguments: 0 }];
    let code = Code::new()
        .emit_all(new.clone())
        .emit_all(new)
        .emit_all([LoadVariable(w), Delete]);
    let program = with_main(builder, ComponentBuilder::new("Main").variable(w).begin(code));

    let (result, output) = run(&program);
    assert_eq!(result, Ok(()));
    assert_eq!(output, "FINALLY;FINALLY;");
}

/// Producer -> Buffer -> `consumers` Consumers, forwarding round robin.
fn producer_consumer(elements: i64, consumers: i64) -> Program {
    let mut b = ProgramBuilder::new();
    let element = b.message("Element", vec![Integer]);
    let finished = b.message("Finished", vec![]);
    let input = b.interface("Input", vec![element, finished]);
    let sink = b.interface("Sink", vec![element, finished]);

    let x = b.variable("x", Integer);
    let consume = {
        let mut code = Code::new();
        let top = code.label();
        let done = code.label();
        code.bind(top)
            .emit_all([LoadThis, ReceiveTest(element)])
            .branch_false(done)
            .emit_all([LoadVariable(x), LoadThis, Receive(element)])
            .emit(AcquireExclusive)
            .write(LoadVariable(x))
            .write_line()
            .emit(ReleaseExclusive)
            .branch(top)
            .bind(done)
            .emit_all([LoadThis, Receive(finished)])
            .emit(AcquireExclusive)
            .write(text("F"))
            .write_line()
            .emit(ReleaseExclusive)
    };
    let consumer = b.component(
        ComponentBuilder::new("Consumer")
            .offers(sink)
            .implementation(ImplementationBuilder::new(sink).variable(x).begin(consume)),
    );

    let pool = b.array("consumers", Component(consumer), vec![Integer]);
    let ready = b.variable("ready", Boolean);
    let k = b.variable("k", Integer);
    let create = {
        let mut code = Code::new();
        let top = code.label();
        let end = code.label();
        code.assign(k, LoadInteger(0))
            .bind(top)
            .emit_all([LoadVariable(k), LoadInteger(consumers), Less])
            .branch_false(end)
            .emit_all([LoadVariable(k), LoadArrayVariable(pool)])
            .emit(New { ty: Component(consumer), arguments: 0 })
            .emit_all([LoadVariable(k), LoadArrayVariableElement(pool), LoadService(sink)])
            .emit_all([LoadThis, Connect])
            .emit(LoadVariable(k))
            .syscall(Sys::Inc, 1)
            .branch(top)
            .bind(end)
            .assign(ready, LoadBoolean(true))
    };

    let y = b.variable("y", Integer);
    let next = b.variable("next", Integer);
    let j = b.variable("j", Integer);
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
            .emit_all([LoadVariable(y), LoadThis, Receive(element)])
            .emit(LoadVariable(y))
            .emit_all([LoadVariable(next), LoadArrayVariableElement(pool), LoadService(sink)])
            .emit(Send(element))
            .emit_all([LoadVariable(next), LoadVariable(next), LoadInteger(1), Add])
            .emit_all([LoadInteger(consumers), Modulo, StoreVariable])
            .branch(top)
            .bind(done)
            .emit_all([LoadThis, Receive(finished)])
            .assign(j, LoadInteger(0))
            .bind(notify)
            .emit_all([LoadVariable(j), LoadInteger(consumers), Less])
            .branch_false(end)
            .emit_all([LoadVariable(j), LoadArrayVariableElement(pool), LoadService(sink)])
            .emit(Send(finished))
            .emit(LoadVariable(j))
            .syscall(Sys::Inc, 1)
            .branch(notify)
            .bind(end)
    };
    let buffer = b.component(
        ComponentBuilder::new("Buffer")
            .offers(input)
            .implementation(
                ImplementationBuilder::new(input)
                    .variable(y)
                    .variable(next)
                    .variable(j)
                    .begin(forward),
            )
            .variable(pool)
            .variable(ready)
            .variable(k)
            .begin(create),
    );

    let i = b.variable("i", Integer);
    let produce = {
        let mut code = Code::new();
        let top = code.label();
        let end = code.label();
        code.assign(i, LoadInteger(1))
            .bind(top)
            .emit_all([LoadVariable(i), LoadInteger(elements), LessEqual])
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
    let main = Code::new()
        .emit_all([LoadVariable(buffer_var), New { ty: Component(buffer), arguments: 0 }])
        .emit_all([LoadVariable(producer_var), New { ty: Component(producer), arguments: 0 }])
        .emit_all([LoadVariable(buffer_var), LoadService(input)])
        .emit_all([LoadVariable(producer_var), Connect]);
    with_main(
        b,
        ComponentBuilder::new("Main")
            .variable(buffer_var)
            .variable(producer_var)
            .begin(main),
    )
}

#[test]
fn test_single_consumer_receives_in_fifo_order() {
    let (result, output) = run(&producer_consumer(6, 1));
    assert_eq!(result, Ok(()));
    assert_eq!(output, "1\n2\n3\n4\n5\n6\nF\n");
}

#[test]
fn test_producer_consumer_delivers_every_element() {
    let (result, output) = run(&producer_consumer(20, 3));
    assert_eq!(result, Ok(()));

    let lines: Vec<&str> = output.lines().collect();
    let mut numbers: Vec<i64> = lines
        .iter()
        .filter(|line| **line != "F")
        .map(|line| line.parse().unwrap())
        .collect();
    numbers.sort();
    assert_eq!(numbers, (1..=20).collect::<Vec<_>>());
    assert_eq!(lines.iter().filter(|line| **line == "F").count(), 3);
}

#[test]
fn test_multi_dimensional_array_iteration() {
    let mut b = ProgramBuilder::new();
    let a = b.array("a", Integer, vec![Integer, Text, Character]);
    let i = b.variable("i", Integer);
    let x = b.variable("x", Integer);
    let s = b.variable("s", Text);
    let c = b.variable("c", Character);

    let element = |key: i64, name: &str, ch: char| {
        [LoadInteger(key), text(name), LoadCharacter(ch), LoadArrayVariableElement(a)]
    };

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
        .emit_all([LoadVariable(i), text("k"), LoadCharacter('c'), LoadArrayVariableElement(a)])
        .emit_all([LoadVariable(i), LoadVariable(i), Multiply, StoreVariable])
        .emit(LoadVariable(i))
        .syscall(Sys::Inc, 1)
        .branch(fill)
        .bind(filled)
        .emit_all(element(42, "z", 'q'))
        .emit_all([LoadInteger(1), StoreVariable])
        .emit_all(element(3, "k", 'c'))
        .emit_all([LoadInteger(100), StoreVariable])
        .emit(BeginForEach)
        .bind(walk)
        .emit_all([LoadVariable(x), LoadVariable(s), LoadVariable(c), LoadArrayVariable(a)])
        .emit(AssignArrayIndex)
        .branch_false(walked)
        .write(LoadVariable(x))
        .write(text(":"))
        .emit_all([LoadVariable(x), LoadVariable(s), LoadVariable(c), LoadArrayVariableElement(a)])
        .syscall(Sys::Write, 1)
        .write(text(";"))
        .branch(walk)
        .bind(walked)
        .emit(EndForEach);

    let main = ComponentBuilder::new("Main")
        .variable(a)
        .variable(i)
        .variable(x)
        .variable(s)
        .variable(c)
        .begin(code);
    let (result, output) = run(&with_main(b, main));
    assert_eq!(result, Ok(()));
    assert_eq!(output, "0:0;1:1;2:4;3:100;4:16;5:25;6:36;7:49;8:64;9:81;42:1;");
}

/// `Client` requires `Link` and writes "A" once it is connected.
fn gated_client(b: &mut ProgramBuilder) -> (ComponentId, ComponentId, crate::il::InterfaceId) {
    let link = b.interface("Link", vec![]);
    let server = b.component(
        ComponentBuilder::new("Server")
            .offers(link)
            .implementation(ImplementationBuilder::new(link)),
    );
    let client = b.component(
        ComponentBuilder::new("Client")
            .requires(link)
            .activity(Code::new().write(text("A"))),
    );
    (server, client, link)
}

#[test]
fn test_activity_waits_for_required_connections() {
    let mut b = ProgramBuilder::new();
    let (server, client, link) = gated_client(&mut b);
    let s = b.variable("s", Component(server));
    let c = b.variable("c", Component(client));

    let code = Code::new()
        .emit_all([LoadVariable(c), New { ty: Component(client), arguments: 0 }])
        .write(text("M"))
        .emit_all([LoadVariable(s), New { ty: Component(server), arguments: 0 }])
        .emit_all([LoadVariable(s), LoadService(link), LoadVariable(c), Connect]);
    let main = ComponentBuilder::new("Main").variable(s).variable(c).begin(code);

    let (result, output) = run(&with_main(b, main));
    assert_eq!(result, Ok(()));
    assert_eq!(output, "MA");
}

#[test]
fn test_unconnected_client_never_starts_activity() {
    let mut b = ProgramBuilder::new();
    let (_, client, _) = gated_client(&mut b);
    let c = b.variable("c", Component(client));

    let code = Code::new()
        .emit_all([LoadVariable(c), New { ty: Component(client), arguments: 0 }])
        .write(text("B"));
    let program = with_main(b, ComponentBuilder::new("Main").variable(c).begin(code));

    let (result, output) = run_with(&program, RuntimeConfig::default().with_max_turns(500));
    assert_eq!(result, Err(VmError::TurnLimitExceeded(500)));
    assert_eq!(output, "B");
}

#[test]
fn test_exclusive_lock_keeps_writes_together() {
    let mut b = ProgramBuilder::new();
    let writer = |b: &mut ProgramBuilder, name: &str| {
        let count = b.variable(format!("{}_count", name), Integer);
        let mut code = Code::new();
        let top = code.label();
        let end = code.label();
        let code = code
            .bind(top)
            .emit_all([LoadVariable(count), LoadInteger(3), Less])
            .branch_false(end)
            .emit(AcquireExclusive)
            .write(text("<"))
            .write(text(">"))
            .emit(ReleaseExclusive)
            .emit(LoadVariable(count))
            .syscall(Sys::Inc, 1)
            .branch(top)
            .bind(end);
        b.component(ComponentBuilder::new(name).variable(count).begin(code))
    };
    let left = writer(&mut b, "Left");
    let right = writer(&mut b, "Right");
    let l = b.variable("l", Component(left));
    let r = b.variable("r", Component(right));

    let code = Code::new()
        .emit_all([LoadVariable(l), New { ty: Component(left), arguments: 0 }])
        .emit_all([LoadVariable(r), New { ty: Component(right), arguments: 0 }]);
    let main = ComponentBuilder::new("Main").variable(l).variable(r).begin(code);

    let (result, output) = run(&with_main(b, main));
    assert_eq!(result, Ok(()));
    assert_eq!(output, "<>".repeat(6));
}

#[test]
fn test_procedure_returns_a_value() {
    let mut b = ProgramBuilder::new();
    let n = b.variable("n", Integer);
    let square = b.procedure(
        ProcedureBuilder::new("Square")
            .parameter(n)
            .returns(Integer)
            .begin(Code::new().emit_all([LoadVariable(n), LoadVariable(n), Multiply, Return])),
    );
    let code = Code::new()
        .emit_all([LoadInteger(7), ProcedureCall(square)])
        .syscall(Sys::Write, 1);
    let main = ComponentBuilder::new("Main").procedure(square).begin(code);

    let (result, output) = run(&with_main(b, main));
    assert_eq!(result, Ok(()));
    assert_eq!(output, "49");
}

#[test]
fn test_procedure_locals_reset_between_calls() {
    let mut b = ProgramBuilder::new();
    let count = b.variable("count", Integer);
    let bump = b.procedure(
        ProcedureBuilder::new("Bump").variable(count).begin(
            Code::new()
                .emit(LoadVariable(count))
                .syscall(Sys::Inc, 1)
                .write(LoadVariable(count)),
        ),
    );
    let code = Code::new()
        .emit(ProcedureCall(bump))
        .emit(ProcedureCall(bump));
    let main = ComponentBuilder::new("Main").procedure(bump).begin(code);

    let (result, output) = run(&with_main(b, main));
    assert_eq!(result, Ok(()));
    assert_eq!(output, "11");
}

#[test]
fn test_procedure_calls_nested_procedure() {
    let mut b = ProgramBuilder::new();
    let inner = b.procedure(ProcedureBuilder::new("Inner").begin(Code::new().write(text("x"))));
    let n = b.variable("n", Integer);
    let outer = b.procedure(
        ProcedureBuilder::new("Outer")
            .parameter(n)
            .procedure(inner)
            .begin(
                Code::new()
                    .write(LoadVariable(n))
                    .emit(ProcedureCall(inner))
                    .write(text("!")),
            ),
    );
    let code = Code::new().emit_all([LoadInteger(9), ProcedureCall(outer)]);
    let main = ComponentBuilder::new("Main").procedure(outer).begin(code);

    let (result, output) = run(&with_main(b, main));
    assert_eq!(result, Ok(()));
    assert_eq!(output, "9x!");
}

#[test]
fn test_nested_procedure_is_not_visible_to_caller() {
    let mut b = ProgramBuilder::new();
    let inner = b.procedure(ProcedureBuilder::new("Inner").begin(Code::new().write(text("x"))));
    let outer = b.procedure(ProcedureBuilder::new("Outer").procedure(inner));
    let code = Code::new().emit(ProcedureCall(inner));
    let main = ComponentBuilder::new("Main").procedure(outer).begin(code);

    let (result, output) = run(&with_main(b, main));
    assert!(matches!(result, Err(VmError::MalformedIl(_))));
    assert_eq!(output, "");
}

#[test]
fn test_delete_during_finally_procedure_is_ignored() {
    let mut b = ProgramBuilder::new();
    let wrap_up = b.procedure(
        ProcedureBuilder::new("WrapUp").begin(
            Code::new()
                .write(text("A"))
                .write(text("B"))
                .write(text("C"))
                .write(text("D")),
        ),
    );
    let mut activity = Code::new();
    let spin = activity.label();
    let worker = b.component(
        ComponentBuilder::new("Worker")
            .procedure(wrap_up)
            .activity(activity.bind(spin).branch(spin))
            .finally(Code::new().emit(ProcedureCall(wrap_up)).write(text(";"))),
    );
    let w = b.variable("w", Component(worker));

    let mut code = Code::new().emit_all([LoadVariable(w), New { ty: Component(worker), arguments: 0 }]);
    for _ in 0..8 {
        code = code.emit_all([LoadVariable(w), Delete]);
    }
    let main = ComponentBuilder::new("Main").variable(w).begin(code);

    let (result, output) = run(&with_main(b, main));
    assert_eq!(result, Ok(()));
    assert_eq!(output, "ABCD;");
}

#[test]
fn test_message_fields_land_in_declared_order() {
    let mut b = ProgramBuilder::new();
    let pair = b.message("Pair", vec![Integer, Text]);
    let link = b.interface("Link", vec![pair]);

    let number = b.variable("number", Integer);
    let word = b.variable("word", Text);
    let serve = Code::new()
        .emit_all([LoadVariable(number), LoadVariable(word), LoadThis, Receive(pair)])
        .write(LoadVariable(number))
        .write(LoadVariable(word));
    let server = b.component(
        ComponentBuilder::new("Server").offers(link).implementation(
            ImplementationBuilder::new(link)
                .variable(number)
                .variable(word)
                .begin(serve),
        ),
    );

    let s = b.variable("s", Component(server));
    let code = Code::new()
        .emit_all([LoadVariable(s), New { ty: Component(server), arguments: 0 }])
        .emit_all([LoadVariable(s), LoadService(link), LoadThis, Connect])
        .emit_all([LoadInteger(1), text("two"), LoadThis, LoadService(link), Send(pair)]);
    let main = ComponentBuilder::new("Main").requires(link).variable(s).begin(code);

    let (result, output) = run(&with_main(b, main));
    assert_eq!(result, Ok(()));
    assert_eq!(output, "1two");
}

#[test]
fn test_builtin_system_calls() {
    let separator = || text(";");
    let program = main_only(
        Code::new()
            .write(LoadFloat(1.5))
            .write(separator())
            .emit(LoadInteger(7))
            .syscall(Sys::ToReal, 1)
            .syscall(Sys::Write, 1)
            .write(separator())
            .emit(LoadInteger(255))
            .syscall(Sys::WriteHex, 1)
            .write(separator())
            .emit(text("hello"))
            .syscall(Sys::Length, 1)
            .syscall(Sys::Write, 1)
            .write(separator())
            .emit(text(" 42abc"))
            .syscall(Sys::ToInteger, 1)
            .syscall(Sys::Write, 1)
            .write(separator())
            .emit(LoadInteger(65))
            .syscall(Sys::ToCharacter, 1)
            .syscall(Sys::Write, 1)
            .write(separator())
            .emit(LoadCharacter('a'))
            .syscall(Sys::ToInteger, 1)
            .syscall(Sys::Write, 1)
            .write(separator())
            .emit(LoadInteger(0))
            .syscall(Sys::Max, 1)
            .syscall(Sys::ToInteger, 1)
            .syscall(Sys::Write, 1)
            .write(separator())
            .emit(LoadFloat(16.0))
            .syscall(Sys::Sqrt, 1)
            .syscall(Sys::Write, 1),
    );
    let (result, output) = run(&program);
    assert_eq!(result, Ok(()));
    assert_eq!(output, "1.5;7;ff;5;42;A;97;9223372036854775807;4");
}

#[test]
fn test_system_calls_write_back_variables() {
    let mut b = ProgramBuilder::new();
    let count = b.variable("count", Integer);
    let code = Code::new()
        .assign(count, LoadInteger(5))
        .emit_all([LoadVariable(count), LoadInteger(3)])
        .syscall(Sys::Inc, 2)
        .write(LoadVariable(count))
        .write(text(","))
        .emit(LoadVariable(count))
        .syscall(Sys::Dec, 1)
        .write(LoadVariable(count));
    let main = ComponentBuilder::new("Main").variable(count).begin(code);

    let (result, output) = run(&with_main(b, main));
    assert_eq!(result, Ok(()));
    assert_eq!(output, "8,7");
}

#[test]
fn test_new_text_clears_the_variable() {
    let mut b = ProgramBuilder::new();
    let t = b.variable("t", Text);
    let code = Code::new()
        .assign(t, text("abc"))
        .emit_all([LoadVariable(t), New { ty: Text, arguments: 0 }])
        .emit(LoadVariable(t))
        .syscall(Sys::Length, 1)
        .syscall(Sys::Write, 1);
    let main = ComponentBuilder::new("Main").variable(t).begin(code);

    let (result, output) = run(&with_main(b, main));
    assert_eq!(result, Ok(()));
    assert_eq!(output, "0");
}

#[test]
fn test_exists_and_type_tests() {
    let mut b = ProgramBuilder::new();
    let first = b.component(ComponentBuilder::new("First"));
    let second = b.component(ComponentBuilder::new("Second"));
    let v = b.variable("v", Component(first));

    let check = |code: Code, id: i64| code.emit(LoadInteger(id)).syscall(Sys::Assert, 2);
    let mut code = Code::new().emit_all([LoadVariable(v), ExistsTest, Not]);
    code = check(code, 1);
    code = code.emit_all([LoadVariable(v), New { ty: Component(first), arguments: 0 }]);
    code = check(code.emit_all([LoadVariable(v), ExistsTest]), 2);
    code = check(code.emit_all([LoadVariable(v), IsType(first)]), 3);
    code = check(code.emit_all([LoadVariable(v), IsType(second), Not]), 4);
    let code = code.write(text("ok"));
    let main = ComponentBuilder::new("Main").variable(v).begin(code);

    let (result, output) = run(&with_main(b, main));
    assert_eq!(result, Ok(()));
    assert_eq!(output, "ok");
}

#[test]
fn test_input_test_does_not_block() {
    let mut b = ProgramBuilder::new();
    let ping = b.message("Ping", vec![]);
    let link = b.interface("Link", vec![ping]);
    let own_service = [LoadThis, LoadService(link)];

    let code = Code::new()
        .emit_all(own_service.clone())
        .emit_all([LoadThis, Connect])
        .emit_all(own_service.clone())
        .emit_all([InputTest(ping), Not, LoadInteger(1)])
        .syscall(Sys::Assert, 2)
        .emit_all(own_service.clone())
        .emit(Send(ping))
        .emit_all(own_service)
        .emit_all([InputTest(ping), LoadInteger(2)])
        .syscall(Sys::Assert, 2)
        .write(text("ok"));
    let main = ComponentBuilder::new("Main")
        .offers(link)
        .implementation(ImplementationBuilder::new(link))
        .begin(code);

    let (result, output) = run(&with_main(b, main));
    assert_eq!(result, Ok(()));
    assert_eq!(output, "ok");
}

#[test]
fn test_disconnect_allows_reconnect() {
    let mut b = ProgramBuilder::new();
    let (server, client, link) = gated_client(&mut b);
    let s = b.variable("s", Component(server));
    let c = b.variable("c", Component(client));

    let binding = [LoadVariable(s), LoadService(link), LoadVariable(c)];
    let code = Code::new()
        .emit_all([LoadVariable(s), New { ty: Component(server), arguments: 0 }])
        .emit_all([LoadVariable(c), New { ty: Component(client), arguments: 0 }])
        .emit_all(binding.clone())
        .emit(Connect)
        .emit_all(binding.clone())
        .emit(Disconnect)
        .emit_all(binding)
        .emit(Connect);
    let main = ComponentBuilder::new("Main").variable(s).variable(c).begin(code);

    let (result, output) = run(&with_main(b, main));
    assert_eq!(result, Ok(()));
    assert_eq!(output, "A");
}

#[test]
fn test_double_connect_is_an_error() {
    let mut b = ProgramBuilder::new();
    let (server, client, link) = gated_client(&mut b);
    let s = b.variable("s", Component(server));
    let c = b.variable("c", Component(client));

    let binding = [LoadVariable(s), LoadService(link), LoadVariable(c), Connect];
    let code = Code::new()
        .emit_all([LoadVariable(s), New { ty: Component(server), arguments: 0 }])
        .emit_all([LoadVariable(c), New { ty: Component(client), arguments: 0 }])
        .emit_all(binding.clone())
        .emit_all(binding);
    let main = ComponentBuilder::new("Main").variable(s).variable(c).begin(code);

    let (result, _) = run(&with_main(b, main));
    assert!(matches!(result, Err(VmError::Connection(_))));
}

#[test]
fn test_send_to_unconnected_service_is_an_error() {
    let mut b = ProgramBuilder::new();
    let ping = b.message("Ping", vec![]);
    let link = b.interface("Link", vec![ping]);
    let server = b.component(
        ComponentBuilder::new("Server")
            .offers(link)
            .implementation(ImplementationBuilder::new(link)),
    );
    let s = b.variable("s", Component(server));
    let code = Code::new()
        .emit_all([LoadVariable(s), New { ty: Component(server), arguments: 0 }])
        .emit_all([LoadVariable(s), LoadService(link), Send(ping)]);
    let main = ComponentBuilder::new("Main").variable(s).begin(code);

    let (result, _) = run(&with_main(b, main));
    assert!(matches!(result, Err(VmError::Connection(_))));
}

#[test]
fn test_assertions_and_halt() {
    let assert_plain = main_only(Code::new().emit(LoadBoolean(false)).syscall(Sys::Assert, 1));
    assert_eq!(run(&assert_plain).0, Err(VmError::Assertion { code: None }));

    let assert_code = main_only(
        Code::new()
            .emit_all([LoadBoolean(false), LoadInteger(7)])
            .syscall(Sys::Assert, 2),
    );
    let (result, _) = run(&assert_code);
    assert_eq!(result, Err(VmError::Assertion { code: Some(7) }));
    assert_eq!(result.unwrap_err().to_string(), "Assertion failed. Code 7.");

    let passing = main_only(
        Code::new()
            .emit(LoadBoolean(true))
            .syscall(Sys::Assert, 1)
            .write(text("ok")),
    );
    assert_eq!(run(&passing), (Ok(()), "ok".to_string()));

    let halt = main_only(
        Code::new()
            .write(text("before"))
            .emit(LoadInteger(3))
            .syscall(Sys::Halt, 1)
            .write(text("after")),
    );
    assert_eq!(run(&halt), (Err(VmError::Halt(3)), "before".to_string()));
}

#[test]
fn test_runtime_errors() {
    let mismatch = main_only(Code::new().emit_all([LoadInteger(1), text("x"), Add]));
    assert!(matches!(run(&mismatch).0, Err(VmError::TypeMismatch(_))));

    let division = main_only(Code::new().emit_all([LoadInteger(1), LoadInteger(0), Divide]));
    assert_eq!(run(&division).0, Err(VmError::DivisionByZero));

    let underflow = main_only(Code::new().emit(Add));
    assert_eq!(run(&underflow).0, Err(VmError::StackUnderflow));

    let bad_jump = main_only(Code::new().emit(Branch(-5)));
    assert!(matches!(run(&bad_jump).0, Err(VmError::MalformedIl(_))));

    let arity = main_only(
        Code::new()
            .emit_all([LoadInteger(1), LoadInteger(2)])
            .syscall(Sys::Write, 2),
    );
    assert!(matches!(
        run(&arity).0,
        Err(VmError::SystemCall(SysError::NotFound { .. }))
    ));
}

#[test]
fn test_unsupported_operations_abort() {
    let moved = main_only(Code::new().emit(Move));
    assert!(matches!(run(&moved).0, Err(VmError::Unsupported(_))));

    let designators = main_only(Code::new().syscall(Sys::LoadForEachDesignators, 0));
    assert!(matches!(run(&designators).0, Err(VmError::Unsupported(_))));

    let boolean = main_only(Code::new().write(LoadBoolean(true)));
    assert!(matches!(run(&boolean).0, Err(VmError::Unsupported(_))));
}

#[test]
fn test_ignored_operations_continue() {
    let mut b = ProgramBuilder::new();
    let n = b.variable("n", Integer);
    let code = Code::new()
        .emit(LoadInteger(1))
        .syscall(Sys::Passivate, 1)
        .emit_all([AcquireShared, ReleaseShared])
        .emit_all([LoadVariable(n), New { ty: Integer, arguments: 0 }])
        .write(text("ok"));
    let main = ComponentBuilder::new("Main").variable(n).begin(code);

    assert_eq!(run(&with_main(b, main)), (Ok(()), "ok".to_string()));
}

#[test]
fn test_constants_are_writable_during_init_only() {
    let mut b = ProgramBuilder::new();
    let limit = b.constant("limit", Integer);
    let main = ComponentBuilder::new("Main")
        .variable(limit)
        .init(Code::new().assign(limit, LoadInteger(4)))
        .begin(
            Code::new()
                .write(LoadVariable(limit))
                .assign(limit, LoadInteger(5)),
        );

    let (result, output) = run(&with_main(b, main));
    assert!(matches!(result, Err(VmError::MalformedIl(_))));
    assert_eq!(output, "4");
}

fn endless_writer() -> Program {
    let mut code = Code::new();
    let top = code.label();
    main_only(code.bind(top).write(text("x")).branch(top))
}

#[test]
fn test_turn_limit_stops_endless_programs() {
    let (result, output) = run_with(&endless_writer(), RuntimeConfig::default().with_max_turns(30));
    assert_eq!(result, Err(VmError::TurnLimitExceeded(30)));
    assert!(!output.is_empty() && output.len() <= 10);
    assert!(output.chars().all(|c| c == 'x'));
}

#[test]
fn test_halt_handle_stops_the_run() {
    let mut runtime = Runtime::with_config(RuntimeConfig::default().with_max_turns(TEST_TURNS));
    let output = Rc::new(RefCell::new(String::new()));
    let sink = output.clone();
    let handle = runtime.halt_handle();
    runtime.change_output(move |text| {
        sink.borrow_mut().push_str(text);
        if sink.borrow().len() >= 3 {
            handle.halt();
        }
    });

    assert_eq!(runtime.execute(&endless_writer()), Ok(()));
    assert_eq!(*output.borrow(), "xxx");
}

#[test]
fn test_running_hook_brackets_the_run() {
    let mut runtime = Runtime::new();
    capture(&mut runtime);
    let events = Rc::new(RefCell::new(Vec::new()));
    let recorded = events.clone();
    runtime.is_running_update(move |running| recorded.borrow_mut().push(running));

    runtime.execute(&main_only(Code::new().write(text("hi")))).unwrap();
    assert_eq!(*events.borrow(), vec![true, false]);
}

#[test]
fn test_executing_twice_starts_from_scratch() {
    let program = producer_consumer(5, 2);
    let mut runtime = Runtime::with_config(RuntimeConfig::default().with_max_turns(TEST_TURNS));
    let output = capture(&mut runtime);

    runtime.execute(&program).unwrap();
    let first = output.borrow().clone();
    let turns = runtime.turns();
    output.borrow_mut().clear();

    runtime.execute(&program).unwrap();
    assert_eq!(*output.borrow(), first);
    assert_eq!(runtime.turns(), turns);
    assert_eq!(runtime.exclusive_holder(), None);
}

#[test]
fn test_random_is_reproducible_per_seed() {
    let mut b = ProgramBuilder::new();
    let i = b.variable("i", Integer);
    let mut code = Code::new();
    let top = code.label();
    let end = code.label();
    let code = code
        .bind(top)
        .emit_all([LoadVariable(i), LoadInteger(20), Less])
        .branch_false(end)
        .emit_all([LoadInteger(10), LoadInteger(5)])
        .syscall(Sys::Random, 2)
        .syscall(Sys::Write, 1)
        .write(text(";"))
        .emit(LoadVariable(i))
        .syscall(Sys::Inc, 1)
        .branch(top)
        .bind(end);
    let program = with_main(b, ComponentBuilder::new("Main").variable(i).begin(code));

    let config = RuntimeConfig::default()
        .with_max_turns(TEST_TURNS)
        .with_random_seed(7);
    let (first, output) = run_with(&program, config.clone());
    let (second, again) = run_with(&program, config);
    assert_eq!((first, second), (Ok(()), Ok(())));
    assert_eq!(output, again);

    let values: Vec<i64> = output
        .split(';')
        .filter(|part| !part.is_empty())
        .map(|part| part.parse().unwrap())
        .collect();
    assert_eq!(values.len(), 20);
    assert!(values.iter().all(|value| (10..15).contains(value)));
}
