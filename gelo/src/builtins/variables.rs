use crate::{
    dict::Dict,
    error::{Flow, Signal},
    list::List,
    vm::Vm,
    word::Word,
};

use super::NativeCommand;

pub(super) const COMMANDS: &[(&str, NativeCommand)] = &[
    ("set!", set),
    ("update!", update),
    ("set?", is_set),
    ("unset!", unset),
    ("swap!", swap),
    ("export!", export),
    ("exports!", exports),
];

fn pair(args: &List) -> Option<(Word, Word)> {
    let first = args.head()?.clone();
    let second = args.tail().head()?.clone();
    Some((first, second))
}

fn set(vm: &mut Vm, args: List, ac: usize) -> Flow<Word> {
    let (2, Some((name, value))) = (ac, pair(&args)) else {
        return Err(vm.argument_error("set!", "symbol value", &args));
    };
    vm.ns().set(name.ser().as_bytes(), value.clone());
    Ok(value)
}

fn update(vm: &mut Vm, args: List, ac: usize) -> Flow<Word> {
    let (2, Some((name, value))) = (ac, pair(&args)) else {
        return Err(vm.argument_error("update!", "symbol value", &args));
    };
    let name = name.ser();
    if !vm.ns().mutate(name.as_bytes(), value.clone()) {
        return Err(vm.undefined(name.as_bytes()));
    }
    Ok(value)
}

fn is_set(vm: &mut Vm, args: List, ac: usize) -> Flow<Word> {
    if ac == 0 {
        return Err(vm.argument_error("set?", "symbol+", &args));
    }
    args.map_or_apply(|w| Ok::<_, Signal>(Word::Bool(vm.ns().has(w.ser().as_bytes()))))
}

fn unset(vm: &mut Vm, args: List, ac: usize) -> Flow<Word> {
    if ac == 0 {
        return Err(vm.argument_error("unset!", "symbol+", &args));
    }
    args.map_or_apply(|w| {
        let name = w.ser();
        vm.ns()
            .del(name.as_bytes())
            .ok_or_else(|| vm.undefined(name.as_bytes()))
    })
}

/// Exchange two bindings. Returns the new value of the first name.
fn swap(vm: &mut Vm, args: List, ac: usize) -> Flow<Word> {
    let (2, Some((first, second))) = (ac, pair(&args)) else {
        return Err(vm.argument_error("swap!", "symbol symbol", &args));
    };
    let (first, second) = (first.ser(), second.ser());
    if let Some((value, _)) = vm.ns().swap(first.as_bytes(), second.as_bytes()) {
        vm.trace(format_args!("swapped the values of {first} and {second}"));
        return Ok(value);
    }
    let ns = vm.ns();
    match (ns.has(first.as_bytes()), ns.has(second.as_bytes())) {
        (false, false) => Err(vm.runtime_error(format!(
            "Neither {first} nor {second} are defined"
        ))),
        (false, true) => Err(vm.undefined(first.as_bytes())),
        (true, false) => Err(vm.undefined(second.as_bytes())),
        // the bindings changed between the attempt and the check
        (true, true) => Err(vm.runtime_error("swap failed but both operands were defined")),
    }
}

/// Reads `up N` and checks that N is a positive integer. `None` when
/// `keyword` is not `up`.
fn up_levels(vm: &Vm, keyword: &Word, count: &Word) -> Flow<Option<isize>> {
    if vm.symbol_or_else(keyword)? != "up" {
        return Ok(None);
    }
    let Some(levels) = vm.number_or_else(count)?.as_int() else {
        return Err(vm.type_mismatch("integer", "real"));
    };
    match levels {
        n if n < 0 => Err(vm.type_mismatch("nonzero positive integer", "negative integer")),
        0 => Err(vm.type_mismatch("nonzero positive integer", "zero")),
        n => Ok(Some(isize::try_from(n).unwrap_or(isize::MAX))),
    }
}

fn not_writeable(vm: &Vm) -> Signal {
    vm.runtime_error("attempted to export to non-writeable namespace")
}

/// Bind a name in an enclosing scope, one level up unless told otherwise.
fn export(vm: &mut Vm, args: List, ac: usize) -> Flow<Word> {
    let vm: &Vm = vm;
    let usage = || vm.argument_error("export!", "[up levels]? name value", &args);
    let (levels, rest) = match ac {
        2 => (1, args.clone()),
        4 => {
            let (keyword, count) = pair(&args).ok_or_else(usage)?;
            let Some(levels) = up_levels(vm, &keyword, &count)? else {
                return Err(usage());
            };
            (levels, args.tail().tail())
        }
        _ => return Err(usage()),
    };
    let (name, value) = pair(&rest).ok_or_else(usage)?;
    let name = vm.symbol_or_else(&name)?;
    if !vm.ns().nset(levels, name.as_bytes(), value.clone()) {
        return Err(not_writeable(vm));
    }
    Ok(value)
}

/// Copy bindings of the current scope into an enclosing one.
fn exports(vm: &mut Vm, args: List, ac: usize) -> Flow<Word> {
    if ac == 0 {
        return Err(vm.argument_error("exports!", "[up levels]? name+", &args));
    }
    let mut names = args.clone();
    let mut levels = 1;
    if ac >= 3 && args.head().is_some_and(|w| w.ser() == "up") {
        if let Some((keyword, count)) = pair(&args) {
            if let Some(n) = up_levels(vm, &keyword, &count)? {
                levels = n;
                names = args.tail().tail();
            }
        }
    }
    let mut exported = Dict::new();
    for w in &names {
        let name = vm.symbol_or_else(w)?;
        let Some(value) = vm.ns().get(name.as_bytes()) else {
            return Err(vm.runtime_error(format!("Cannot export nonexistent symbol {name}")));
        };
        exported.set(name.as_bytes(), value);
    }
    if !vm.ns().ninject(levels, &exported) {
        return Err(not_writeable(vm));
    }
    Ok(Word::null())
}
