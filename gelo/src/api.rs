//! The surface native commands use to talk back to the VM running them:
//! invoking code, coercing arguments, raising errors and doing I/O.

use std::{fmt, sync::Arc};

use crate::{
    dict::Dict,
    error::{Error, Flow, Signal},
    interpreter::Step,
    list::{List, ListBuilder},
    number::Number,
    port::Port,
    quote::Quote,
    runtime::TraceFlags,
    symbol::Symbol,
    vm::Vm,
    word::{Alien, Word},
};

impl Vm {
    /// Resolve `w` to something that can head a command line.
    ///
    /// Symbols are looked up first. Quotes only count when they parse.
    pub fn is_invokable(&self, w: &Word) -> Option<Word> {
        let w = match w {
            Word::Symbol(s) => self.ns.lookup(s.as_bytes())?,
            other => other.clone(),
        };
        match w {
            Word::Quote(ref q) if q.fcode().is_ok() => Some(w),
            Word::Alien(_) | Word::Defer => Some(w),
            _ => None,
        }
    }

    /// The value bound to `name`, honouring scope boundaries.
    pub fn lookup_or_else(&self, name: &[u8]) -> Flow<Word> {
        self.ns.lookup(name).ok_or_else(|| self.undefined(name))
    }

    pub fn invokable_or_else(&self, w: &Word) -> Flow<Word> {
        self.is_invokable(w)
            .ok_or_else(|| self.type_mismatch("invokable", w.type_name()))
    }

    /// Run `line` as a command line and return its value. Every signal is
    /// passed on. The empty line is the no-op.
    pub fn invoke_or_else(&mut self, line: List) -> Flow<Word> {
        if line.is_empty() {
            return Ok(Word::null());
        }
        let ac = line.len() - 1;
        match self.peval(line, ac)? {
            Step::Defer(_) => Err(self.runtime_error("Cannot register a defer via Invoke*")),
            Step::Code(code, args) => self.eval(code, args),
            Step::Value(w) => Ok(w),
        }
    }

    /// Like [`Vm::invoke_or_else`], but script errors are caught and handed
    /// back. Halts and kills still unwind.
    pub fn invoke(&mut self, line: List) -> Flow<Result<Word, Error>> {
        match self.invoke_or_else(line) {
            Err(Signal::Error(e)) if e.is_recoverable() => Ok(Err(e)),
            other => other.map(Ok),
        }
    }

    pub fn invoke_cmd(&mut self, cmd: Word, args: List) -> Flow<Result<Word, Error>> {
        self.invoke(List::cons(cmd, args))
    }

    pub fn invoke_cmd_or_else(&mut self, cmd: Word, args: List) -> Flow<Word> {
        self.invoke_or_else(List::cons(cmd, args))
    }

    /// Invoke `w` if it is invokable, otherwise return it unchanged.
    pub fn invoke_word_or_return(&mut self, w: &Word) -> Flow<Result<Word, Error>> {
        match self.is_invokable(w) {
            Some(cmd) => self.invoke(List::singleton(cmd)),
            None => Ok(Ok(w.clone())),
        }
    }

    /// A result for a native command that makes the evaluator run `line`
    /// in its place, as a tail call.
    ///
    /// Only meaningful as the return value of the calling native.
    pub fn tail_invoke(&self, line: &List) -> Word {
        Word::Quote(Quote::from_words(line))
    }

    pub fn tail_invoke_cmd(&self, cmd: Word, args: &List) -> Word {
        self.tail_invoke(&List::cons(cmd, args.clone()))
    }

    pub fn tail_invoke_word_or_return(&self, w: &Word) -> Word {
        match self.is_invokable(w) {
            Some(cmd) => self.tail_invoke(&List::singleton(cmd)),
            None => w.clone(),
        }
    }

    /// Expand the sigils and clauses of every line of `q` without running
    /// the lines themselves. Yields one list per line, or `None` when `q`
    /// does not parse. The no-op yields a single empty line.
    pub fn partial_eval(&mut self, q: &Quote) -> Flow<Option<List>> {
        let code = match q.fcode() {
            Ok(code) => code,
            Err(_) => return Ok(None),
        };
        let Some(code) = code else {
            return Ok(Some(List::singleton(Word::List(List::new()))));
        };
        let mut lines = ListBuilder::new();
        for line in &code.lines {
            let (words, _) = self.rewrite(line)?;
            lines.push(Word::List(words));
        }
        Ok(Some(lines.build()))
    }

    /// Stop the whole VM, making `payload` the result of the run.
    pub fn halt<T>(&self, payload: List) -> Flow<T> {
        self.sys_trace(format_args!("VM {} halting", self.id()));
        Err(Signal::Halt(payload))
    }

    pub fn send(&self, w: Word) {
        if self.io().closed() {
            self.sys_trace(format_args!("VM {} dropped a send on a closed port", self.id()));
        }
        self.io().send(w);
    }

    pub fn recv(&self) -> Word {
        self.io().recv()
    }

    /// Log a message on the alien channel.
    pub fn trace(&self, message: impl fmt::Display) {
        if self.runtime().tracing(TraceFlags::ALIEN) {
            log::debug!(target: "gelo::alien", "VM {}: {message}", self.id());
        }
    }

    /// A number, or a word whose text reads as one.
    pub fn number_or_else(&self, w: &Word) -> Flow<Number> {
        match w {
            Word::Number(n) => Ok(n.clone()),
            other => Number::parse(other.ser().as_bytes())
                .ok_or_else(|| self.type_mismatch("number", other.type_name())),
        }
    }

    pub fn quote_or_else(&self, w: &Word) -> Flow<Quote> {
        match w {
            Word::Quote(q) => Ok(q.clone()),
            other => Err(self.type_mismatch("quote", other.type_name())),
        }
    }

    /// A list, or a symbol holding a serialized list, or a quote holding
    /// the items of one without the braces.
    pub fn list_or_else(&self, w: &Word) -> Flow<List> {
        let parsed = match w {
            Word::List(l) => return Ok(l.clone()),
            Word::Symbol(s) => List::unserialize(s.as_bytes(), true),
            Word::Quote(q) => List::unserialize(q.source(), false),
            _ => None,
        };
        parsed.ok_or_else(|| self.type_mismatch("list", w.type_name()))
    }

    pub fn dict_or_else(&self, w: &Word) -> Flow<Dict> {
        let parsed = match w {
            Word::Dict(d) => return Ok(d.clone()),
            Word::Symbol(s) => Dict::unserialize(s.as_bytes(), true),
            Word::Quote(q) => Dict::unserialize(q.source(), false),
            _ => None,
        };
        parsed.ok_or_else(|| self.type_mismatch("dict", w.type_name()))
    }

    pub fn port_or_else(&self, w: &Word) -> Flow<Arc<dyn Port>> {
        match w {
            Word::Port(p) => Ok(p.clone()),
            other => Err(self.type_mismatch("port", other.type_name())),
        }
    }

    pub fn bool_or_else(&self, w: &Word) -> Flow<bool> {
        match w {
            Word::Bool(b) => Ok(*b),
            other => Err(self.type_mismatch("bool", other.type_name())),
        }
    }

    pub fn symbol_or_else(&self, w: &Word) -> Flow<Symbol> {
        match w {
            Word::Symbol(s) => Ok(s.clone()),
            other => Err(self.type_mismatch("symbol", other.type_name())),
        }
    }

    pub fn alien_or_else(&self, w: &Word) -> Flow<Alien> {
        match w {
            Word::Alien(a) => Ok(a.clone()),
            other => Err(self.type_mismatch("alien", other.type_name())),
        }
    }

    /// The text of a symbol or quote. Whether the quote happens to parse is
    /// not checked.
    pub fn literal_or_else(&self, w: &Word) -> Flow<Symbol> {
        match w {
            Word::Symbol(s) => Ok(s.clone()),
            Word::Quote(q) => Ok(q.ser()),
            other => Err(self.type_mismatch("symbol or quote", other.type_name())),
        }
    }

    pub fn runtime_error(&self, message: impl Into<String>) -> Signal {
        Error::runtime(self.id(), message).into()
    }

    pub fn type_mismatch(&self, expected: impl fmt::Display, got: impl fmt::Display) -> Signal {
        Error::type_mismatch(self.id(), expected, got).into()
    }

    pub fn argument_error(&self, name: &str, expected: &str, args: &List) -> Signal {
        Error::argument(self.id(), name, expected, args).into()
    }

    pub fn undefined(&self, name: &[u8]) -> Signal {
        Error::undefined(self.id(), name).into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        error::RuntimeErrorKind,
        port::Channel,
        runtime::{Runtime, RuntimeCreateInfo},
    };

    fn vm() -> Vm {
        let rt = Runtime::new(RuntimeCreateInfo::default());
        let mut vm = rt.new_vm(Arc::new(Channel::new()));
        vm.register("list", Alien::new(|_, args, _| Ok(Word::List(args))))
            .expect("alive");
        vm.register("fail", Alien::new(|vm, _, _| Err(vm.runtime_error("nope"))))
            .expect("alive");
        vm
    }

    fn line(words: &[&str]) -> List {
        words.iter().map(|w| Word::from(*w)).collect()
    }

    #[test]
    fn test_is_invokable() {
        let vm = vm();
        vm.ns.set(b"plain", Word::from("x"));
        vm.ns.set(b"code", Word::Quote(Quote::new(b"list a".to_vec())));
        assert!(matches!(vm.is_invokable(&Word::from("list")), Some(Word::Alien(_))));
        assert!(matches!(vm.is_invokable(&Word::from("code")), Some(Word::Quote(_))));
        assert!(vm.is_invokable(&Word::from("plain")).is_none());
        assert!(vm.is_invokable(&Word::from("missing")).is_none());
        assert!(vm.is_invokable(&Word::Quote(Quote::new(b"[oops".to_vec()))).is_none());
        assert!(vm.invokable_or_else(&Word::from(3i64)).is_err());
    }

    #[test]
    fn test_lookup_or_else() {
        let vm = vm();
        vm.ns.set(b"here", Word::from(1i64));
        assert_eq!(vm.lookup_or_else(b"here").unwrap().ser(), "1");
        let Err(Signal::Error(err)) = vm.lookup_or_else(b"gone") else {
            panic!("expected an undefined variable");
        };
        assert_eq!(err.message(), "Undefined variable: gone");
    }

    #[test]
    fn test_invoke_catches_script_errors_only() {
        let mut vm = vm();
        assert_eq!(
            vm.invoke(line(&["list", "a", "b"])).expect("no signal").expect("ok").ser(),
            "{a b}"
        );
        let caught = vm.invoke(line(&["fail"])).expect("caught");
        assert_eq!(caught.expect_err("failed").message(), "nope");
        assert!(matches!(vm.invoke_or_else(line(&["fail"])), Err(Signal::Error(_))));
        assert!(vm.invoke_or_else(List::new()).expect("noop").is_null());
        vm.ns.set(b"stop", Word::Alien(Alien::new(|vm, args, _| vm.halt(args))));
        assert!(matches!(vm.invoke(line(&["stop", "x"])), Err(Signal::Halt(_))));
    }

    #[test]
    fn test_invoke_refuses_defer() {
        let mut vm = vm();
        vm.ns.set(b"defer", Word::Defer);
        let Err(Signal::Error(e)) = vm.invoke_or_else(line(&["defer", "list"])) else {
            panic!("defer must not be invokable here");
        };
        assert_eq!(e.message(), "Cannot register a defer via Invoke*");
    }

    #[test]
    fn test_invoke_word_or_return() {
        let mut vm = vm();
        let w = Word::from("not-a-command");
        assert_eq!(vm.invoke_word_or_return(&w).expect("ok").expect("ok"), w);
        let q = Word::Quote(Quote::new(b"list q".to_vec()));
        assert_eq!(vm.invoke_word_or_return(&q).expect("ok").expect("ok").ser(), "{q}");
        let tail = vm.tail_invoke_word_or_return(&Word::from("list"));
        let Word::Quote(tail) = tail else {
            panic!("expected a tail quote");
        };
        assert!(!tail.is_protected());
    }

    #[test]
    fn test_partial_eval() {
        let mut vm = vm();
        vm.ns.set(b"x", Word::from("ex"));
        let q = Quote::new(b"a $x [list b c]\nd @[list e f] g".to_vec());
        let lines = vm.partial_eval(&q).expect("no signal").expect("parses");
        let lines = lines.to_vec();
        assert_eq!(lines.len(), 2);
        let first = lines[0].as_list().to_vec();
        assert_eq!(first.len(), 3);
        assert_eq!(first[1].ser(), "ex");
        assert_eq!(first[2].ser(), "{b c}");
        assert_eq!(lines[1].ser(), "{d e f g}");
        let noop = vm.partial_eval(&Quote::noop()).expect("ok").expect("noop");
        assert_eq!(noop.len(), 1);
        assert!(vm.partial_eval(&Quote::new(b"{".to_vec())).expect("ok").is_none());
    }

    #[test]
    fn test_coercions() {
        let vm = vm();
        assert_eq!(vm.number_or_else(&Word::from("2.5")).expect("parses").value(), 2.5);
        let err = vm.number_or_else(&Word::from("two")).expect_err("not a number");
        let Signal::Error(err) = err else {
            panic!("expected an error");
        };
        assert_eq!(err.kind(), Some(RuntimeErrorKind::TypeMismatch));
        assert_eq!(err.message(), "Type mismatch. Expected: number Got: *SYMBOL*");

        assert_eq!(vm.list_or_else(&Word::from("{a b}")).expect("enclosed").len(), 2);
        assert!(vm.list_or_else(&Word::from("a b")).is_err());
        let q = Word::Quote(Quote::new(b"a b c".to_vec()));
        assert_eq!(vm.list_or_else(&q).expect("bare").len(), 3);

        let d = vm.dict_or_else(&Word::from("{{k v}}")).expect("enclosed");
        assert_eq!(d.get(b"k"), Some(&Word::from("v")));

        assert!(vm.bool_or_else(&Word::Bool(true)).expect("bool"));
        assert!(vm.bool_or_else(&Word::from("true")).is_err());
        assert_eq!(vm.literal_or_else(&q).expect("quote text"), "a b c");
        assert!(vm.symbol_or_else(&Word::from(1i64)).is_err());
        assert!(vm.port_or_else(&Word::Port(Arc::new(Channel::new()))).is_ok());
        assert!(vm.alien_or_else(&Word::from("list")).is_err());
    }

    #[test]
    fn test_send_and_recv_use_the_port() {
        let vm = vm();
        vm.send(Word::from("ping"));
        assert_eq!(vm.recv().ser(), "ping");
    }

    #[test]
    fn test_send_on_a_closed_port_is_dropped() {
        let vm = vm();
        vm.io().close();
        vm.send(Word::from("lost"));
        assert!(vm.recv().is_null());
    }
}
