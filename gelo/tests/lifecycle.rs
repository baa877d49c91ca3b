mod common;

use std::{sync::Arc, thread};

use common::{run, runtime, vm, vm_on};
use gelo::{Channel, Error, List, Port, Quote, RuntimeErrorKind, VmState, Word};

#[test]
fn test_child_writes_stay_in_the_child() {
    let mut parent = vm();
    run(&mut parent, "set! x parent\nset! y parent\nset! z parent");
    let mut child = parent.spawn().expect("alive");
    assert_eq!(run(&mut child, "update! x child\nx"), "child");
    run(&mut child, "set! y child\nunset! z\nset! only-child 1");
    assert_eq!(run(&mut child, "set? z"), "false");
    child.destroy();

    assert_eq!(run(&mut parent, "list $x $y $z"), "{parent parent parent}");
    assert_eq!(run(&mut parent, "set? only-child"), "false");
}

#[test]
fn test_child_sees_later_parent_writes() {
    let mut parent = vm();
    let mut child = parent.spawn().expect("alive");
    run(&mut parent, "set! late 1");
    assert_eq!(run(&mut child, "late"), "1");
    child.destroy();
}

#[test]
fn test_destroy_cascades_to_go_threads() {
    let rt = runtime();
    let mut parent = vm_on(&rt, Arc::new(Channel::new()));
    run(&mut parent, "set! spin {spin}");
    run(&mut parent, "go spin");
    run(&mut parent, "go spin");
    assert_eq!(rt.children_of(parent.id()).len(), 2);
    parent.destroy();
    rt.join_threads();
    assert_eq!(rt.population(), 0);
}

#[test]
fn test_kill_from_another_thread() {
    let rt = runtime();
    let chan = Arc::new(Channel::new());
    let mut vm = vm_on(&rt, chan.clone());
    let id = vm.id();
    let worker = thread::spawn(move || {
        let result = vm.do_str("set! spin {spin}\nsay ready\nspin");
        (result, vm.state())
    });
    assert_eq!(chan.recv().ser(), "{ready}");
    rt.kill(id);
    let (result, state) = worker.join().expect("worker");
    let err = result.expect_err("killed");
    assert_eq!(err.kind(), Some(RuntimeErrorKind::Killed));
    assert_eq!(state, VmState::Destroyed);
    assert!(!rt.is_alive(id));
}

#[test]
fn test_readers_never_see_a_torn_pair() {
    let rt = runtime();
    let mut parent = vm_on(&rt, Arc::new(Channel::new()));
    let pair = |n: i64| Word::List(List::from(vec![Word::from(n), Word::from(n)]));
    parent.ns().set(b"pair", pair(0));

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let mut child = parent.spawn().expect("alive");
            thread::spawn(move || {
                for _ in 0..200 {
                    let Word::List(items) = child.do_str("pair").expect("bound") else {
                        panic!("pair is a list");
                    };
                    let items: Vec<String> = items.iter().map(|w| w.ser().to_string()).collect();
                    assert_eq!(items.len(), 2);
                    assert_eq!(items[0], items[1]);
                }
                child.destroy();
            })
        })
        .collect();
    for n in 1..=200 {
        parent.ns().set(b"pair", pair(n));
    }
    for reader in readers {
        reader.join().expect("reader");
    }
    assert_eq!(rt.population(), 1);
}

#[test]
fn test_dead_vm_refuses_work() {
    let mut vm = vm();
    let err = vm.exec(List::new()).expect_err("no program");
    assert!(matches!(err, Error::Programmer { .. }));

    vm.set_program(Quote::new(b"list $x".to_vec())).expect("parses");
    run(&mut vm, "set! x 1");
    assert_eq!(vm.exec(List::new()).expect("runs").ser(), "{1}");
    assert_eq!(vm.state(), VmState::Programmed);

    vm.destroy();
    vm.destroy();
    assert!(vm.is_destroyed());
    for err in [
        vm.do_str("x").expect_err("dead"),
        vm.exec(List::new()).expect_err("dead"),
        vm.spawn().map(|_| ()).expect_err("dead"),
        vm.set_program(Quote::noop()).expect_err("dead"),
    ] {
        assert!(matches!(err, Error::Programmer { .. }), "{err}");
        assert!(err.message().starts_with("Dead VM attempted to"));
    }
}

#[test]
fn test_rejected_program_keeps_the_old_one() {
    let mut vm = vm();
    vm.set_program(Quote::new(b"list ok".to_vec())).expect("parses");
    let err = vm.set_program(Quote::new(b"list [".to_vec())).expect_err("broken");
    assert!(matches!(err, Error::Syntax(_)));
    assert_eq!(vm.exec(List::new()).expect("runs").ser(), "{ok}");
}

#[test]
fn test_deep_recursion_in_go_hits_the_depth_limit() {
    let rt = runtime();
    let chan = Arc::new(Channel::new());
    let mut vm = vm_on(&rt, chan.clone());
    run(&mut vm, "set! f {list [f]}\nset! g {g\nx}");
    run(&mut vm, "go f");
    rt.join_threads();
    run(&mut vm, "go g");
    rt.join_threads();
    for _ in 0..2 {
        assert_eq!(
            chan.recv().ser(),
            "Runtime error: Maximum evaluation depth of 1000 exceeded"
        );
    }
    assert!(chan.is_empty());
}

#[test]
fn test_kill_runs_defers_once() {
    let rt = runtime();
    let chan = Arc::new(Channel::new());
    let mut vm = vm_on(&rt, chan.clone());
    let id = vm.id();
    let worker = thread::spawn(move || {
        vm.do_str("set! spin {spin}\n{\ndefer say cleanup\nsay ready\nspin\n}")
    });
    assert_eq!(chan.recv().ser(), "{ready}");
    rt.kill(id);
    let err = worker.join().expect("worker").expect_err("killed");
    assert_eq!(err.kind(), Some(RuntimeErrorKind::Killed));
    assert_eq!(chan.recv().ser(), "{cleanup}");
    assert!(chan.is_empty());
}

#[test]
fn test_child_swaps_a_redefined_name() {
    let mut parent = vm();
    run(&mut parent, "set! a pa\nset! b pb");
    let mut child = parent.spawn().expect("alive");
    assert_eq!(run(&mut child, "unset! a\nset! a own\nb"), "pb");
    assert_eq!(run(&mut child, "swap! a b"), "pb");
    assert_eq!(run(&mut child, "list $a $b"), "{pb own}");
    assert_eq!(run(&mut parent, "list $a $b"), "{pa pb}");
    child.destroy();
}
