use clap::{Parser as ClapParser, ValueEnum};
use std::{process, time::Duration};

use bytecode::{BytecodeBuilder, Instruction, disassemble};
use heap::{ClassDef, HandlerDef, HeapSettings};
use object::{HandlerRef, HandlerView, Visibility};

use vm::{Position, StackSettings, Vm, VmError, VmSettings, describe};

const STEP_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Demo {
    /// Sum 1..=10 through a counter object
    Counter,
    /// Catch a fault and a thrown exception
    Exceptions,
    /// Route unknown messages through a default handler
    Dispatch,
}

#[derive(ClapParser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Image to build and run
    #[arg(value_enum, default_value_t = Demo::Counter)]
    demo: Demo,

    /// Heap size in words
    #[arg(long, default_value_t = 1 << 16)]
    heap_words: u32,

    /// Execution stack limit in words
    #[arg(long, default_value_t = 1 << 16)]
    max_stack_words: usize,

    /// Print the code of every handler the demo defines
    #[arg(long, help = "Disassemble handlers before running")]
    disassemble: bool,

    /// Run on an interpreter thread and single-step this many instructions
    #[arg(long)]
    step: Option<u32>,
}

/// Append `selector` as a string literal and send it.
fn send(b: &mut BytecodeBuilder, vm: &Vm, selector: &str) -> Result<(), VmError> {
    b.push_string(vm.intern(selector)?).send();
    Ok(())
}

fn counter(vm: &Vm) -> Result<Vec<ClassDef>, VmError> {
    // add:1 adds argument 1 to field 0
    let mut add = BytecodeBuilder::new();
    add.load_field(0).load_argument(1);
    send(&mut add, vm, "add:1")?;
    add.store_field(0).return_void();

    let mut total = BytecodeBuilder::new();
    total.load_field(0).return_();

    let mut reset = BytecodeBuilder::new();
    reset.push_int(0).store_field(0).return_void();

    // l0 = counter, l1 = i
    let mut main = BytecodeBuilder::new();
    main.push_string(vm.intern("Counter")?).new_instance().store_local(0);
    main.load_local(0);
    send(&mut main, vm, "reset:0")?;
    main.push_int(10).store_local(1);
    let top = main.current_offset();
    main.load_local(1);
    let done = main.jump_if_false();
    main.load_local(0).load_local(1);
    send(&mut main, vm, "add:1")?;
    main.load_local(1).push_int(1);
    send(&mut main, vm, "sub:1")?;
    main.store_local(1);
    main.jump_back(top);
    main.bind(done);
    main.load_local(0);
    send(&mut main, vm, "total:0")?;
    main.dup();
    send(&mut main, vm, "print:0")?;
    main.return_();

    Ok(vec![
        ClassDef::new("Counter")
            .fields(1)
            .handler(HandlerDef::vmil("add:1", 0, add.into_words()?))
            .handler(HandlerDef::vmil("total:0", 0, total.into_words()?))
            .handler(HandlerDef::vmil("reset:0", 0, reset.into_words()?).visibility(Visibility::Protected)),
        ClassDef::new("CounterDemo")
            .extends("Counter")
            .handler(HandlerDef::vmil("main:0", 2, main.into_words()?).entrypoint()),
    ])
}

fn exceptions(vm: &Vm) -> Result<Vec<ClassDef>, VmError> {
    let mut main = BytecodeBuilder::new();

    // a fault: integers do not understand frobnicate:0
    let region = main.try_();
    main.push_int(3);
    send(&mut main, vm, "frobnicate:0")?;
    main.pop();
    let handler = main.catch(region);
    send(&mut main, vm, "message:0")?;
    send(&mut main, vm, "print:0")?;
    main.end_try_catch(handler);

    // a user exception thrown two frames down
    let region = main.try_();
    main.load_argument(0);
    send(&mut main, vm, "fail:0")?;
    let handler = main.catch(region);
    main.return_();
    main.end_try_catch(handler);
    main.push_int(0).return_();

    let mut fail = BytecodeBuilder::new();
    fail.load_argument(0);
    send(&mut fail, vm, "explode:0")?;
    fail.return_void();

    let mut explode = BytecodeBuilder::new();
    explode.push_string(vm.intern("Failure")?).new_instance().throw();

    Ok(vec![
        ClassDef::new("Failure")
            .extends(vm.settings().root_exception.as_str())
            .handler(HandlerDef::native("message:0", "exception.message")),
        ClassDef::new("ExceptionDemo")
            .handler(HandlerDef::vmil("main:0", 0, main.into_words()?).entrypoint())
            .handler(HandlerDef::vmil("fail:0", 0, fail.into_words()?))
            .handler(HandlerDef::vmil("explode:0", 0, explode.into_words()?).visibility(Visibility::Protected)),
    ])
}

fn dispatch(vm: &Vm) -> Result<Vec<ClassDef>, VmError> {
    // (selector, arguments) → prints the selector, answers the arguments
    let mut fallback = BytecodeBuilder::new();
    fallback.load_argument(1);
    send(&mut fallback, vm, "print:0")?;
    fallback.load_argument(2).return_();

    let mut main = BytecodeBuilder::new();
    main.load_argument(0).push_int(4).push_int(5);
    send(&mut main, vm, "anything:with:2")?;
    main.dup();
    send(&mut main, vm, "print:0")?;
    main.return_();

    Ok(vec![
        ClassDef::new("DispatchDemo")
            .handler(HandlerDef::vmil("main:0", 0, main.into_words()?).entrypoint())
            .default_handler(HandlerDef::vmil("fallback", 0, fallback.into_words()?)),
    ])
}

fn print_code(defs: &[ClassDef]) {
    for def in defs {
        for handler in def.handlers.iter().chain(&def.default_handler) {
            if let heap::HandlerSource::Vmil(code) = &handler.source {
                println!("{}>>{}", def.name, handler.selector);
                print!("{}", disassemble(code));
            }
        }
    }
}

fn describe_position(vm: &Vm, position: Position) -> String {
    let instruction = HandlerView::new(&**vm.heap(), position.handler.obj())
        .ok()
        .and_then(|view| view.instruction(position.instruction_offset).ok().flatten())
        .and_then(|word| Instruction::decode(word).ok());
    match instruction {
        Some(instruction) => format!("{:>4}: {instruction}", position.instruction_offset),
        None => format!("{:>4}: <end>", position.instruction_offset),
    }
}

fn step_through(vm: &Vm, entry: HandlerRef, receiver: object::Value, steps: u32) -> Result<object::Value, VmError> {
    let mut thread = vm.spawn(entry, receiver, Vec::new())?;
    thread.debug().set_breakpoint(entry, 0);
    thread.start()?;

    if let Some(mut position) = thread.debug().wait_paused(STEP_TIMEOUT) {
        for _ in 0..steps {
            println!("[{}] {}", position.handler.addr(), describe_position(vm, position));
            match thread.debug().step_one() {
                Ok(Some(next)) => position = next,
                _ => break,
            }
        }
    }
    thread.debug().detach();
    thread.join()
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let cli = Cli::parse();

    let settings = VmSettings {
        heap: HeapSettings {
            size_words: cli.heap_words,
        },
        stack: StackSettings {
            initial_words: 256.min(cli.max_stack_words),
            max_words: cli.max_stack_words,
        },
        ..Default::default()
    };

    if let Err(err) = run(&cli, settings) {
        eprintln!("error: {err}");
        process::exit(1);
    }
}

fn run(cli: &Cli, settings: VmSettings) -> Result<(), VmError> {
    let vm = Vm::new(settings)?;
    let (defs, entry_class) = match cli.demo {
        Demo::Counter => (counter(&vm)?, "CounterDemo"),
        Demo::Exceptions => (exceptions(&vm)?, "ExceptionDemo"),
        Demo::Dispatch => (dispatch(&vm)?, "DispatchDemo"),
    };
    if cli.disassemble {
        print_code(&defs);
    }
    for def in &defs {
        vm.define_class(def)?;
    }

    let entry = vm.entrypoint(entry_class)?;
    let receiver = vm.instantiate(entry_class)?;
    let result = match cli.step {
        Some(steps) => step_through(&vm, entry, receiver, steps)?,
        None => vm.run(entry, receiver, &[])?,
    };
    println!("=> {}", describe(vm.heap(), result));
    Ok(())
}
