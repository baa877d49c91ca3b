//! The core command bundles every VM is expected to carry.

use crate::{
    dict::Dict,
    error::Flow,
    list::List,
    vm::{Bundle, Vm},
    word::{Alien, Word},
};

mod evaluation;
mod namespaces;
mod variables;

/// Plain function form of a native command.
pub type NativeCommand = fn(&mut Vm, List, usize) -> Flow<Word>;

fn natives(table: &[(&'static str, NativeCommand)]) -> Bundle {
    table
        .iter()
        .map(|&(name, f)| (name, Word::Alien(Alien::new(f))))
        .collect()
}

/// Group commands under one name. `name sub args*` runs `sub` with
/// `args`; `name` alone returns the table of sub-commands.
pub fn aggregate(bundle: Bundle) -> Alien {
    let table: Dict = bundle
        .into_iter()
        .map(|(name, item)| (name.as_bytes().to_vec(), item))
        .collect();
    Alien::new(move |vm, args, _| {
        let Some(sub) = args.head() else {
            return Ok(Word::Dict(table.clone()));
        };
        let rest = args.tail();
        match table.get(sub.ser().as_bytes()) {
            Some(cmd) => Ok(vm.tail_invoke_cmd(cmd.clone(), &rest)),
            None => Err(vm.argument_error("<an aggregate>", "command args*", &rest)),
        }
    })
}

pub fn values() -> Bundle {
    vec![("true", Word::Bool(true)), ("false", Word::Bool(false))]
}

pub fn evaluation_commands() -> Bundle {
    let mut bundle = natives(evaluation::COMMANDS);
    bundle.push(("defer", Word::Defer));
    bundle
}

pub fn variable_commands() -> Bundle {
    let mut bundle = natives(variables::COMMANDS);
    bundle.push(("ns", Word::Alien(aggregate(natives(namespaces::COMMANDS)))));
    bundle
}

pub fn core_bundles() -> Vec<Bundle> {
    vec![values(), evaluation_commands(), variable_commands()]
}

/// Every core command in one bundle.
pub fn core_bundle() -> Bundle {
    core_bundles().into_iter().flatten().collect()
}
