//! Sub-commands of `ns`.

use crate::{
    error::Flow,
    list::List,
    vm::Vm,
    word::{Alien, Word},
};

use super::NativeCommand;

pub(super) const COMMANDS: &[(&str, NativeCommand)] = &[
    ("fork", fork),
    ("unfork", unfork),
    ("capture", capture),
    ("inject!", inject),
    ("locals", locals),
    ("globals", globals),
];

fn fork(vm: &mut Vm, args: List, ac: usize) -> Flow<Word> {
    if ac != 0 {
        return Err(vm.argument_error("ns.fork", "", &args));
    }
    vm.ns_mut().fork();
    vm.trace("Child namespace created");
    Ok(Word::null())
}

fn unfork(vm: &mut Vm, args: List, ac: usize) -> Flow<Word> {
    if ac != 0 {
        return Err(vm.argument_error("ns.unfork", "", &args));
    }
    let Some(dict) = vm.ns_mut().unfork() else {
        return Err(vm.runtime_error("Fatal: Last namespace destroyed"));
    };
    vm.trace("Namespace destroyed");
    Ok(Word::Dict(dict))
}

/// Wrap a quote so that every call runs it in a child of the scope that is
/// current now. The quote must finish in that scope.
fn capture(vm: &mut Vm, args: List, ac: usize) -> Flow<Word> {
    let (1, Some(code)) = (ac, args.head()) else {
        return Err(vm.argument_error("ns.capture", "code-quote", &args));
    };
    let cmd = Word::Quote(vm.quote_or_else(code)?);
    let dict = vm.ns().current_dict();
    vm.trace("current namespace captured");
    Ok(Word::Alien(Alien::new(move |vm, args, _| {
        let scope = vm.ns_mut().fork_with(dict.clone());
        vm.trace("switching to captured namespace");
        let result = vm.invoke_cmd_or_else(cmd.clone(), args);
        let balanced = vm.ns().is_current(&scope);
        if let Some(up) = scope.up() {
            vm.ns_mut().restore(up.clone());
        }
        let value = result?;
        if !balanced {
            return Err(vm.runtime_error(
                "Captured ns's code does not complete at captured ns",
            ));
        }
        Ok(value)
    })))
}

fn inject(vm: &mut Vm, args: List, ac: usize) -> Flow<Word> {
    let (1, Some(item)) = (ac, args.head()) else {
        return Err(vm.argument_error("ns.inject", "dictionary", &args));
    };
    let Word::Dict(dict) = item else {
        return Err(vm.type_mismatch("dictionary", item.type_name()));
    };
    vm.ns().inject(dict);
    Ok(item.clone())
}

fn locals(vm: &mut Vm, args: List, ac: usize) -> Flow<Word> {
    if ac != 0 {
        return Err(vm.argument_error("ns.locals", "", &args));
    }
    Ok(Word::Dict(vm.ns().locals(0)))
}

/// Everything visible from here, nearest binding first.
fn globals(vm: &mut Vm, args: List, ac: usize) -> Flow<Word> {
    if ac != 0 {
        return Err(vm.argument_error("ns.globals", "", &args));
    }
    Ok(Word::Dict(vm.ns().locals(-1)))
}
