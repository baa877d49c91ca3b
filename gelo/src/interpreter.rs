//! The evaluator: line rewriting, head classification and the tail-call
//! loop.

use std::{fmt, sync::Arc};

use crate::{
    ast::{Code, Line, Node},
    error::{Error, Flow, Signal},
    list::{List, ListBuilder},
    namespace::SharedDict,
    quote::Quote,
    runtime::TraceFlags,
    vm::{ARGUMENTS, Vm},
    word::Word,
};

/// What the head of a rewritten line resolved to.
pub(crate) enum Step {
    /// Finished; nothing left to run.
    Value(Word),
    /// Code to run with the given arguments. `None` is the no-op.
    Code(Option<Arc<Code>>, List),
    /// The defer marker and the command it guards.
    Defer(List),
}

/// Per-activation cleanup state.
#[derive(Default)]
struct Activation {
    /// Previous `arguments` binding of each scope the activation wrote to.
    saved: Vec<(SharedDict, Option<Word>)>,
    defers: Vec<List>,
}

impl Vm {
    pub(crate) fn run_trace(&self, args: fmt::Arguments<'_>) {
        if self.runtime().tracing(TraceFlags::RUNTIME) {
            log::trace!(target: "gelo::run", "{args}");
        }
    }

    fn poll_kill(&self) -> Flow<()> {
        if self.killed() {
            self.run_trace(format_args!("VM {} observed kill", self.id()));
            return Err(Signal::Kill);
        }
        Ok(())
    }

    /// Expand one line into its command word and arguments. The count does
    /// not include the command word.
    pub(crate) fn rewrite(&mut self, line: &Line) -> Flow<(List, usize)> {
        let mut out = ListBuilder::new();
        for node in &line.nodes {
            self.rewrite_node(node, &mut out)?;
        }
        let ac = out.len().saturating_sub(1);
        let list = out.build();
        self.run_trace(format_args!("rewrote to {}", list.ser()));
        Ok((list, ac))
    }

    fn rewrite_node(&mut self, node: &Node, out: &mut ListBuilder) -> Flow<()> {
        match node {
            Node::Literal(w) => out.push(w.clone()),
            Node::Quote(q) => out.push(Word::Quote(q.clone())),
            Node::Indirect(inner) => {
                let w = self.deref(inner)?;
                out.push(w);
            }
            Node::Clause(line) => {
                let w = self.eval_clause(line)?;
                out.push(w);
            }
            Node::Splice(inner) => {
                let w = match &**inner {
                    Node::Clause(line) => self.eval_clause(line)?,
                    other => self.deref(other)?,
                };
                let Word::List(items) = w else {
                    return Err(Error::runtime(self.id(), "Attempted to splice nonlist").into());
                };
                out.extend(&items);
            }
        }
        Ok(())
    }

    /// Evaluate `node` to a name and look that name up.
    fn deref(&mut self, node: &Node) -> Flow<Word> {
        let name = match node {
            Node::Clause(line) => match self.eval_clause(line)? {
                Word::Symbol(s) => s,
                Word::Quote(q) => q.ser(),
                other => {
                    return Err(
                        Error::type_mismatch(self.id(), "symbol or quote", other.type_name()).into(),
                    );
                }
            },
            Node::Quote(q) => q.ser(),
            Node::Literal(w) => w.ser(),
            Node::Indirect(_) | Node::Splice(_) => {
                return Err(Error::system(self.id(), "sigil applied to a sigil").into());
            }
        };
        let found = self.ns.lookup(name.as_bytes());
        self.run_trace(format_args!("dereferenced {name}"));
        found.ok_or_else(|| Error::undefined(self.id(), name.as_bytes()).into())
    }

    fn quote_code(&self, q: &Quote) -> Flow<Option<Arc<Code>>> {
        Ok(q.fcode()?)
    }

    /// Classify the head of a rewritten line and run it if it is native.
    pub(crate) fn peval(&mut self, line: List, ac: usize) -> Flow<Step> {
        let Some(head) = line.head().cloned() else {
            return Ok(Step::Value(Word::null()));
        };
        let args = line.tail();
        let target = match head {
            Word::Quote(_) | Word::Alien(_) | Word::Defer => head,
            other => {
                self.run_trace(format_args!("evaluating named command {other}"));
                let name = other.ser();
                match self.ns.lookup(name.as_bytes()) {
                    Some(w @ (Word::Quote(_) | Word::Alien(_) | Word::Defer)) => w,
                    Some(value) if ac == 0 => return Ok(Step::Value(value)),
                    Some(_) => {
                        return Err(
                            Error::type_mismatch(self.id(), "invokable", other.type_name()).into(),
                        );
                    }
                    None if ac == 0 && !matches!(other, Word::Symbol(_)) => {
                        return Ok(Step::Value(other));
                    }
                    None => return Err(Error::undefined(self.id(), name.as_bytes()).into()),
                }
            }
        };
        match target {
            Word::Defer => Ok(Step::Defer(args)),
            Word::Alien(alien) => {
                self.run_trace(format_args!("invoking alien"));
                match alien.call(self, args, ac)? {
                    Word::Quote(q) if !q.is_protected() => {
                        Ok(Step::Code(self.quote_code(&q)?, List::new()))
                    }
                    other => Ok(Step::Value(other)),
                }
            }
            Word::Quote(q) => {
                self.run_trace(format_args!("invoking quote {q:?}"));
                Ok(Step::Code(self.quote_code(&q)?, args))
            }
            _ => Err(Error::system(self.id(), "head resolved to a non-command").into()),
        }
    }

    /// Run a single line found inside `[...]`.
    pub(crate) fn eval_clause(&mut self, line: &Line) -> Flow<Word> {
        let (line, ac) = self.rewrite(line)?;
        match self.peval(line, ac)? {
            Step::Defer(_) => {
                Err(Error::runtime(self.id(), "defer commands must not be in a clause").into())
            }
            Step::Code(code, args) => self.eval(code, args),
            Step::Value(w) => Ok(w),
        }
    }

    /// Run `code` as a new activation with `args` bound to `arguments`.
    ///
    /// Only the body lines nest; the last line is run by looping, so tail
    /// calls take no native stack.
    pub(crate) fn eval(&mut self, code: Option<Arc<Code>>, args: List) -> Flow<Word> {
        let Some(code) = code else {
            return Ok(Word::null());
        };
        let max_depth = self.runtime().max_depth();
        if self.depth >= max_depth {
            return Err(Error::runtime(
                self.id(),
                format!("Maximum evaluation depth of {max_depth} exceeded"),
            )
            .into());
        }
        self.depth += 1;
        let mut activation = Activation::default();
        let result = self.eval_activation(code, args, &mut activation);
        let result = self.close_activation(activation, result);
        self.depth -= 1;
        self.run_trace(format_args!("evaluation finished"));
        result
    }

    fn eval_activation(
        &mut self,
        mut code: Arc<Code>,
        mut args: List,
        activation: &mut Activation,
    ) -> Flow<Word> {
        loop {
            self.bind_arguments(args, activation);
            let Some((tail, body)) = code.lines.split_last() else {
                return Ok(Word::null());
            };
            for line in body {
                let (line, ac) = self.rewrite(line)?;
                match self.peval(line, ac)? {
                    Step::Defer(cmd) => {
                        if cmd.is_empty() {
                            return Err(Error::argument(
                                self.id(),
                                "defer",
                                "No command to defer",
                                &cmd,
                            )
                            .into());
                        }
                        self.run_trace(format_args!("attached defer handler {}", cmd.ser()));
                        activation.defers.push(cmd);
                    }
                    Step::Code(inner, inner_args) => {
                        self.eval(inner, inner_args)?;
                    }
                    Step::Value(_) => {}
                }
            }
            let (line, ac) = self.rewrite(tail)?;
            match self.peval(line, ac)? {
                Step::Defer(_) => {
                    return Err(
                        Error::runtime(self.id(), "defer call cannot be in tail position").into(),
                    );
                }
                Step::Code(Some(next), next_args) => {
                    self.poll_kill()?;
                    code = next;
                    args = next_args;
                }
                Step::Code(None, _) => {
                    self.poll_kill()?;
                    return Ok(Word::null());
                }
                Step::Value(w) => {
                    self.poll_kill()?;
                    return Ok(w);
                }
            }
        }
    }

    fn bind_arguments(&mut self, args: List, activation: &mut Activation) {
        let dict = self.ns.current_dict();
        if !activation.saved.iter().any(|(d, _)| Arc::ptr_eq(d, &dict)) {
            let old = dict.read().get(ARGUMENTS).cloned();
            activation.saved.push((dict.clone(), old));
        }
        dict.write().set(ARGUMENTS, Word::List(args));
    }

    /// Run the defers of an activation, newest first, then put back the
    /// `arguments` bindings it replaced.
    fn close_activation(&mut self, activation: Activation, mut result: Flow<Word>) -> Flow<Word> {
        for cmd in activation.defers.into_iter().rev() {
            self.run_trace(format_args!("invoking defer {}", cmd.ser()));
            if let Err(signal) = self.invoke_or_else(cmd) {
                // halts and kills outrank a failing defer
                if !matches!(result, Err(Signal::Halt(_) | Signal::Kill)) {
                    result = Err(signal);
                }
            }
        }
        for (dict, old) in activation.saved.into_iter().rev() {
            let mut dict = dict.write();
            match old {
                Some(w) => dict.set(ARGUMENTS, w),
                None => {
                    dict.remove(ARGUMENTS);
                }
            }
        }
        result
    }
}
