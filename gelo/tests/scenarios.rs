mod common;

use std::sync::Arc;

use common::{run, runtime, vm, vm_on};
use gelo::{
    Channel, Error, List, Port, Quote, RuntimeErrorKind, Signal, Word, parse, unparse,
    unparse_code,
};

#[test]
fn test_quote_of_a_clause() {
    let mut vm = vm();
    assert_eq!(run(&mut vm, "{[+ 1 2]}"), "3");
    let line = List::singleton(Word::Quote(Quote::new(b"[+ 1 2]".to_vec())));
    let got = vm.invoke_or_else(line).expect("runs");
    assert_eq!(got.ser(), "3");
}

#[test]
fn test_set_then_read() {
    let mut vm = vm();
    assert_eq!(run(&mut vm, "set! x 5\nx"), "5");
    assert_eq!(vm.read_int("x").expect("alive"), Some(5));
}

#[test]
fn test_splice_gives_positional_arguments() {
    let mut vm = vm();
    assert_eq!(run(&mut vm, "count @[list a b c]"), "3");
    assert_eq!(run(&mut vm, "set! abc [list a b c]\ncount @abc"), "3");
    assert_eq!(run(&mut vm, "count $abc"), "1");
}

#[test]
fn test_broken_quote_fails_the_same_way_every_time() {
    let q = Quote::new(b"bad [unbalanced".to_vec());
    let first = q.fcode().expect_err("unbalanced");
    let second = q.fcode().expect_err("still unbalanced");
    assert_eq!(first, second);
    assert!(q.is_literal());

    let mut vm = vm();
    vm.register("broken", Word::Quote(q)).expect("alive");
    let err = vm.do_str("broken").expect_err("syntax");
    assert!(matches!(err, Error::Syntax(_)));
}

#[test]
fn test_capture_sequential_and_unbalanced() {
    let mut vm = vm();
    let src = "ns fork\n\
               set! greeting hi\n\
               export! greet [ns capture {list $greeting @arguments}]\n\
               export! broken [ns capture {ns fork}]\n\
               ns unfork";
    run(&mut vm, src);
    assert_eq!(run(&mut vm, "greet you"), "{hi you}");
    assert_eq!(run(&mut vm, "greet again"), "{hi again}");
    let err = vm.do_str("broken").expect_err("does not finish where it started");
    assert_eq!(err.kind(), Some(RuntimeErrorKind::Generic));
    assert_eq!(
        err.message(),
        "Captured ns's code does not complete at captured ns"
    );
    assert_eq!(run(&mut vm, "greet still"), "{hi still}");
}

#[test]
fn test_defers_run_once_in_reverse() {
    let rt = runtime();
    let chan = Arc::new(Channel::new());
    let mut vm = vm_on(&rt, chan.clone());
    let err = vm
        .do_str("{\ndefer say one\ndefer say two\nfail\nsay never\n}")
        .expect_err("fails");
    assert_eq!(err.message(), "failed");
    assert_eq!(chan.recv().ser(), "{two}");
    assert_eq!(chan.recv().ser(), "{one}");
    assert!(chan.is_empty());

    run(&mut vm, "{\ndefer say done\nlist ok\n}");
    assert_eq!(chan.recv().ser(), "{done}");
    assert!(chan.is_empty());
}

#[test]
fn test_defer_error_replaces_the_result() {
    let mut vm = vm();
    let err = vm.do_str("{\ndefer fail\nlist ok\n}").expect_err("defer failed");
    assert_eq!(err.message(), "failed");
}

#[test]
fn test_halt_returns_payload_and_allows_rerun() {
    let mut vm = vm();
    assert_eq!(run(&mut vm, "{{stop early exit}\nnever}\nnever"), "{early exit}");
    assert_eq!(vm.state(), gelo::VmState::Halted);
    assert_eq!(run(&mut vm, "list again"), "{again}");
}

#[test]
fn test_halt_passes_through_invoke() {
    let mut vm = vm();
    let got = vm.invoke(List::from(vec![Word::from("stop"), Word::from("x")]));
    assert!(matches!(got, Err(Signal::Halt(_))));
}

#[test]
fn test_unparse_round_trip() {
    let sources = [
        "set! x [list a \"b c\" {q $r}]\ncount @[list 1 2] $x",
        "say \\$literal\\@ ${odd name}\nlist [list [list deep]]",
        "a;b\\*\n   c",
    ];
    for src in sources {
        let code = parse(src.as_bytes()).expect("parses");
        let once = unparse_code(&code);
        let reparsed = parse(&once).expect("unparsed text parses");
        assert_eq!(reparsed.lines.len(), code.lines.len(), "{src:?}");
        assert_eq!(unparse_code(&reparsed), once, "{src:?}");
    }
    let q = Quote::new(b"never [closes".to_vec());
    assert_eq!(unparse(&q), b"never [closes");
}
