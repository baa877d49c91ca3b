use crate::{
    error::{Flow, Signal},
    list::List,
    quote::Quote,
    vm::Vm,
    word::Word,
};

use super::NativeCommand;

pub(super) const COMMANDS: &[(&str, NativeCommand)] = &[
    ("eval", eval),
    ("safe-eval", safe_eval),
    ("go", go),
];

/// Run a command line in a scope of its own. Anything visible from the
/// caller is read-only to it. Script errors and halts come back as words.
fn eval(vm: &mut Vm, args: List, ac: usize) -> Flow<Word> {
    if ac == 0 {
        return Err(vm.argument_error("eval", "code argument*", &args));
    }
    let saved = vm.ns().clone();
    vm.ns_mut().push_boundary();
    let result = vm.invoke_or_else(args);
    *vm.ns_mut() = saved;
    match result {
        Ok(w) => Ok(w),
        Err(Signal::Halt(payload)) => Ok(Word::List(payload)),
        Err(Signal::Error(e)) if e.is_recoverable() => Ok(Word::Error(e)),
        Err(signal) => Err(signal),
    }
}

/// A programmed child VM and the arguments to run it with.
///
/// A leading quote is the program and the rest its arguments; any other
/// line becomes a program of its own.
fn spawn_child(vm: &mut Vm, args: List) -> Flow<(Vm, List)> {
    let (program, rest) = match args.head() {
        Some(Word::Quote(q)) => (q.clone(), args.tail()),
        _ => (Quote::from_words(&args), List::new()),
    };
    let mut child = vm.spawn()?;
    if let Err(e) = child.set_program(program) {
        child.destroy();
        return Err(e.into());
    }
    Ok((child, rest))
}

fn safe_eval(vm: &mut Vm, args: List, ac: usize) -> Flow<Word> {
    if ac == 0 {
        return Err(vm.argument_error("safe-eval", "code argument*", &args));
    }
    let (mut child, rest) = spawn_child(vm, args)?;
    let result = child.exec(rest);
    child.destroy();
    Ok(result.unwrap_or_else(Word::Error))
}

fn go_usage(vm: &Vm, args: &List) -> Signal {
    vm.argument_error("go", "[--redirect port]? invokable argument*", args)
}

/// Run a command line in a child VM on its own thread and return the
/// child's id. Failures are sent to the child's port.
fn go(vm: &mut Vm, args: List, ac: usize) -> Flow<Word> {
    if ac == 0 {
        return Err(go_usage(vm, &args));
    }
    let mut line = args.clone();
    let mut port = None;
    if args.head().is_some_and(|w| w.ser() == "--redirect") {
        if ac < 3 {
            return Err(go_usage(vm, &args));
        }
        let tail = args.tail();
        let target = tail.head().cloned().unwrap_or_else(Word::null);
        port = Some(vm.port_or_else(&target)?);
        line = tail.tail();
    }
    let (mut child, rest) = spawn_child(vm, line)?;
    if let Some(port) = port {
        child.redirect(port);
    }
    let id = child.id();
    vm.trace(format_args!("VM {id} started on its own thread"));
    vm.runtime().spawn_thread(child, move |mut child| {
        if let Err(e) = child.exec(rest) {
            // a child that was killed or never ran has nobody to tell
            if !child.is_destroyed() {
                child.send(Word::Error(e));
            }
        }
        child.destroy();
    })?;
    Ok(Word::from(id))
}
