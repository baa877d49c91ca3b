//! Shared setup for the integration tests: a VM with the core bundles and
//! a handful of small natives.

#![allow(dead_code)]

use std::sync::Arc;

use gelo::{Alien, Channel, Runtime, RuntimeCreateInfo, Vm, Word, builtins};

fn natives() -> Vec<(&'static str, Word)> {
    vec![
        ("list", Alien::new(|_, args, _| Ok(Word::List(args))).into()),
        ("count", Alien::new(|_, _, ac| Ok(Word::from(ac))).into()),
        (
            "+",
            Alien::new(|vm, args, _| {
                let mut sum = 0.0;
                for w in &args {
                    sum += vm.number_or_else(w)?.value();
                }
                Ok(Word::from(sum))
            })
            .into(),
        ),
        (
            "say",
            Alien::new(|vm, args, _| {
                vm.send(Word::List(args));
                Ok(Word::null())
            })
            .into(),
        ),
        ("fail", Alien::new(|vm, _, _| Err(vm.runtime_error("failed"))).into()),
        ("stop", Alien::new(|vm, args, _| vm.halt(args)).into()),
    ]
}

pub fn runtime() -> Arc<Runtime> {
    Runtime::new(RuntimeCreateInfo::default())
}

/// A root VM on `rt` talking through `io`.
pub fn vm_on(rt: &Arc<Runtime>, io: Arc<Channel>) -> Vm {
    let mut vm = rt.new_vm(io);
    vm.register_bundles(builtins::core_bundles())
        .expect("fresh vm");
    vm.register_bundle(natives()).expect("fresh vm");
    vm
}

pub fn vm() -> Vm {
    vm_on(&runtime(), Arc::new(Channel::new()))
}

/// Run `src` and return the serialized result, panicking on error.
pub fn run(vm: &mut Vm, src: &str) -> String {
    match vm.do_str(src) {
        Ok(w) => w.ser().to_string(),
        Err(e) => panic!("{src:?} failed: {e}"),
    }
}
