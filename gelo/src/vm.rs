use std::{collections::BTreeMap, io::Read, sync::Arc};

use crate::{
    error::{Error, Flow, Signal, VmId},
    list::List,
    namespace::Namespace,
    parser,
    port::Port,
    quote::Quote,
    runtime::{KillSwitch, Runtime, TraceFlags},
    word::Word,
};

/// Name bound to the argument list of the running activation.
pub const ARGUMENTS: &[u8] = b"arguments";

/// Named values registered into a VM's root scope in one go.
pub type Bundle = Vec<(&'static str, Word)>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VmState {
    Idle,
    Programmed,
    Running,
    Halted,
    Errored,
    Destroyed,
}

/// One execution context: a view on a scope chain, a program and a port.
pub struct Vm {
    runtime: Arc<Runtime>,
    id: VmId,
    pub(crate) ns: Namespace,
    program: Option<Quote>,
    io: Arc<dyn Port>,
    kill_switch: Arc<KillSwitch>,
    state: VmState,
    /// Nesting of non-tail activations.
    pub(crate) depth: usize,
}

impl Vm {
    pub(crate) fn new(runtime: &Arc<Runtime>, io: Arc<dyn Port>) -> Self {
        let (id, kill_switch) = runtime.register(None);
        let ns = Namespace::root();
        ns.set(ARGUMENTS, Word::null());
        let vm = Self {
            runtime: runtime.clone(),
            id,
            ns,
            program: None,
            io,
            kill_switch,
            state: VmState::Idle,
            depth: 0,
        };
        vm.sys_trace(format_args!("VM {id} created"));
        vm
    }

    pub fn id(&self) -> VmId {
        self.id
    }

    pub fn state(&self) -> VmState {
        self.state
    }

    pub fn runtime(&self) -> &Arc<Runtime> {
        &self.runtime
    }

    pub fn ns(&self) -> &Namespace {
        &self.ns
    }

    pub fn ns_mut(&mut self) -> &mut Namespace {
        &mut self.ns
    }

    pub fn io(&self) -> &Arc<dyn Port> {
        &self.io
    }

    pub fn is_destroyed(&self) -> bool {
        self.state == VmState::Destroyed
    }

    pub(crate) fn killed(&self) -> bool {
        self.kill_switch.is_set()
    }

    pub(crate) fn sys_trace(&self, args: std::fmt::Arguments<'_>) {
        if self.runtime.tracing(TraceFlags::SYSTEM) {
            log::debug!(target: "gelo::sys", "{args}");
        }
    }

    /// Refuse to operate on a dead VM. A VM whose kill switch is set is torn
    /// down first.
    fn sanity(&mut self, action: &str) -> Result<(), Error> {
        // a run in progress is torn down by its own poll
        if !matches!(self.state, VmState::Destroyed | VmState::Running) && self.killed() {
            self.teardown();
        }
        if self.state == VmState::Destroyed {
            return Err(Error::programmer(
                self.id,
                format!("Dead VM attempted to {action}"),
            ));
        }
        Ok(())
    }

    /// A child VM sharing this VM's port, whose view of the scope chain
    /// starts below the current scope.
    pub fn spawn(&mut self) -> Result<Vm, Error> {
        self.sanity("spawn a child")?;
        let (id, kill_switch) = self.runtime.register(Some(self.id));
        self.sys_trace(format_args!("VM {id} spawned from VM {}", self.id));
        Ok(Vm {
            runtime: self.runtime.clone(),
            id,
            ns: self.ns.spawn_child(),
            program: None,
            io: self.io.clone(),
            kill_switch,
            state: VmState::Idle,
            depth: 0,
        })
    }

    /// Stop this VM for good. While running this only requests a kill,
    /// which the evaluator acts on at its next poll. Destroying twice is
    /// harmless.
    pub fn destroy(&mut self) {
        match self.state {
            VmState::Destroyed => {}
            VmState::Running => {
                self.sys_trace(format_args!("VM {} asked to stop", self.id));
                self.kill_switch.set();
            }
            _ => self.teardown(),
        }
    }

    fn teardown(&mut self) {
        self.sys_trace(format_args!("VM {} destroyed", self.id));
        self.kill_switch.set();
        self.runtime.release(self.id);
        self.ns = Namespace::root();
        self.program = None;
        self.state = VmState::Destroyed;
    }

    /// Swap the port, returning the old one.
    pub fn redirect(&mut self, io: Arc<dyn Port>) -> Arc<dyn Port> {
        std::mem::replace(&mut self.io, io)
    }

    pub fn register(&mut self, name: &str, item: impl Into<Word>) -> Result<(), Error> {
        self.sanity("register an item")?;
        self.ns.set(name.as_bytes(), item.into());
        if self.runtime.tracing(TraceFlags::ALIEN) {
            log::debug!(target: "gelo::alien", "Registered: {name}");
        }
        Ok(())
    }

    pub fn register_bundle(&mut self, bundle: Bundle) -> Result<(), Error> {
        for (name, item) in bundle {
            self.register(name, item)?;
        }
        Ok(())
    }

    pub fn register_bundles(&mut self, bundles: Vec<Bundle>) -> Result<(), Error> {
        bundles
            .into_iter()
            .try_for_each(|bundle| self.register_bundle(bundle))
    }

    fn read(&mut self, name: &str, what: &str) -> Result<Option<Word>, Error> {
        self.sanity(&format!("read {what} out"))?;
        Ok(self.ns.copy_out(name.as_bytes()))
    }

    pub fn read_word(&mut self, name: &str) -> Result<Option<Word>, Error> {
        self.read(name, "a word")
    }

    pub fn read_string(&mut self, name: &str) -> Result<Option<String>, Error> {
        Ok(self
            .read(name, "a string")?
            .map(|w| w.ser().to_str_lossy().into_owned()))
    }

    pub fn read_bytes(&mut self, name: &str) -> Result<Option<Vec<u8>>, Error> {
        Ok(self
            .read(name, "a byte string")?
            .map(|w| w.ser().as_bytes().to_vec()))
    }

    pub fn read_bool(&mut self, name: &str) -> Result<Option<bool>, Error> {
        Ok(match self.read(name, "a boolean")? {
            Some(Word::Bool(b)) => Some(b),
            _ => None,
        })
    }

    pub fn read_map(&mut self, name: &str) -> Result<Option<BTreeMap<String, Word>>, Error> {
        Ok(match self.read(name, "a map")? {
            Some(Word::Dict(d)) => Some(d.to_map()),
            _ => None,
        })
    }

    pub fn read_slice(&mut self, name: &str) -> Result<Option<Vec<Word>>, Error> {
        Ok(match self.read(name, "a slice")? {
            Some(Word::List(l)) => Some(l.to_vec()),
            _ => None,
        })
    }

    pub fn read_quote(&mut self, name: &str) -> Result<Option<Quote>, Error> {
        Ok(match self.read(name, "a quote")? {
            Some(Word::Quote(q)) => Some(q),
            _ => None,
        })
    }

    pub fn read_port(&mut self, name: &str) -> Result<Option<Arc<dyn Port>>, Error> {
        Ok(match self.read(name, "a port")? {
            Some(Word::Port(p)) => Some(p),
            _ => None,
        })
    }

    pub fn read_int(&mut self, name: &str) -> Result<Option<i64>, Error> {
        Ok(match self.read(name, "an integer")? {
            Some(Word::Number(n)) => n.as_int(),
            _ => None,
        })
    }

    pub fn read_float(&mut self, name: &str) -> Result<Option<f64>, Error> {
        Ok(match self.read(name, "a number")? {
            Some(Word::Number(n)) => Some(n.value()),
            _ => None,
        })
    }

    /// Use `program` for the following `exec` calls. A program that does not
    /// parse is rejected with its syntax error.
    pub fn set_program(&mut self, program: Quote) -> Result<(), Error> {
        self.sanity("set a new program")?;
        program.fcode()?;
        self.program = Some(program.protect());
        self.state = VmState::Programmed;
        Ok(())
    }

    /// Read a whole program from `input`.
    pub fn parse_program<R: Read>(&mut self, input: R) -> Result<(), Error> {
        self.sanity("parse and set a new program")?;
        self.sys_trace(format_args!("VM {} parsing", self.id));
        let (code, source) = parser::parse_reader(input)?;
        self.program = Some(Quote::with_code(source, code));
        self.state = VmState::Programmed;
        Ok(())
    }

    /// Run the program with `args` bound to `arguments`.
    pub fn exec(&mut self, args: impl Into<List>) -> Result<Word, Error> {
        self.sanity("execute its program")?;
        let Some(program) = self.program.clone() else {
            return Err(Error::programmer(
                self.id,
                "attempted to execute VM with no program",
            ));
        };
        let code = program.fcode()?;
        let args = args.into();
        self.sys_trace(format_args!("VM {} evaluating with arguments {}", self.id, args.ser()));
        let nested = self.enter();
        let result = self.eval(code, args);
        self.finish(result, nested)
    }

    /// Parse and run `source` directly, leaving the program untouched.
    pub fn do_str(&mut self, source: &str) -> Result<Word, Error> {
        self.sanity(&format!("execute: {source}"))?;
        let code = parser::parse(source.as_bytes())?;
        let nested = self.enter();
        let result = self.eval(Some(Arc::new(code)), List::new());
        self.finish(result, nested)
    }

    /// `parse_program` followed by `exec`.
    pub fn run<R: Read>(&mut self, input: R, args: impl Into<List>) -> Result<Word, Error> {
        self.parse_program(input)?;
        self.exec(args)
    }

    /// Start a run. True when a native command of a run already in
    /// progress started this one; depth and state then stay with the
    /// outer run.
    fn enter(&mut self) -> bool {
        if self.state == VmState::Running {
            return true;
        }
        self.state = VmState::Running;
        self.depth = 0;
        false
    }

    fn finish(&mut self, result: Flow<Word>, nested: bool) -> Result<Word, Error> {
        if nested {
            return match result {
                Ok(w) => Ok(w),
                Err(Signal::Halt(payload)) => Ok(Word::List(payload)),
                Err(Signal::Kill) => Err(Error::killed(self.id)),
                Err(Signal::Error(e)) => Err(e),
            };
        }
        self.state = if self.program.is_some() {
            VmState::Programmed
        } else {
            VmState::Idle
        };
        let out = match result {
            Ok(w) => {
                self.sys_trace(format_args!("VM {} finished", self.id));
                Ok(w)
            }
            Err(Signal::Halt(payload)) => {
                self.sys_trace(format_args!("VM {} halted", self.id));
                self.state = VmState::Halted;
                Ok(Word::List(payload))
            }
            Err(Signal::Kill) => {
                self.sys_trace(format_args!("VM {} killed", self.id));
                self.teardown();
                return Err(Error::killed(self.id));
            }
            Err(Signal::Error(e)) => {
                if !e.is_recoverable() {
                    log::error!(target: "gelo::sys", "VM {} failed: {e}", self.id);
                }
                self.state = VmState::Errored;
                Err(e)
            }
        };
        // a destroy requested from inside the run
        if self.killed() {
            self.teardown();
        }
        out
    }
}

impl Drop for Vm {
    fn drop(&mut self) {
        if self.state != VmState::Destroyed {
            self.teardown();
        }
    }
}

impl std::fmt::Debug for Vm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Vm")
            .field("id", &self.id)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}
