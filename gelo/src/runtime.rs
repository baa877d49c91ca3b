use std::{
    collections::{HashMap, HashSet},
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    thread::{self, JoinHandle},
};

use bitflags::bitflags;
use parking_lot::Mutex;

use crate::{
    error::{Error, HOST_ID, VmId},
    port::Port,
    vm::Vm,
};

bitflags! {
    /// Trace channels. Each one maps to a `log` target.
    #[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
    pub struct TraceFlags: u8 {
        /// `gelo::parse`
        const PARSER = 1 << 0;
        /// `gelo::run`
        const RUNTIME = 1 << 1;
        /// `gelo::sys`
        const SYSTEM = 1 << 2;
        /// `gelo::alien`
        const ALIEN = 1 << 3;
    }
}

impl TraceFlags {
    /// Parse a comma separated list of channel names, `all` for every one.
    pub fn from_names(names: &str) -> Option<Self> {
        let mut flags = TraceFlags::empty();
        for name in names.split(',').map(str::trim).filter(|n| !n.is_empty()) {
            flags |= match name {
                "parse" => TraceFlags::PARSER,
                "run" => TraceFlags::RUNTIME,
                "sys" => TraceFlags::SYSTEM,
                "alien" => TraceFlags::ALIEN,
                "all" => TraceFlags::all(),
                _ => return None,
            };
        }
        Some(flags)
    }

    /// The `log` targets of the enabled channels.
    pub fn targets(self) -> impl Iterator<Item = &'static str> {
        [
            (TraceFlags::PARSER, "gelo::parse"),
            (TraceFlags::RUNTIME, "gelo::run"),
            (TraceFlags::SYSTEM, "gelo::sys"),
            (TraceFlags::ALIEN, "gelo::alien"),
        ]
        .into_iter()
        .filter(move |(flag, _)| self.contains(*flag))
        .map(|(_, target)| target)
    }
}

#[derive(Debug, Clone)]
pub struct RuntimeCreateInfo {
    pub traces: TraceFlags,
    /// Nesting limit for non-tail evaluation.
    pub max_depth: usize,
}

/// Native stack reserved per level of `max_depth` for VM threads.
const STACK_PER_LEVEL: usize = 128 * 1024;
const MIN_STACK: usize = 2 * 1024 * 1024;

impl Default for RuntimeCreateInfo {
    fn default() -> Self {
        Self {
            traces: TraceFlags::empty(),
            max_depth: 1_000,
        }
    }
}

/// Cooperative cancellation flag polled by a running VM.
#[derive(Debug, Default)]
pub struct KillSwitch(AtomicBool);

impl KillSwitch {
    pub fn set(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

#[derive(Debug)]
struct Process {
    parent: Option<VmId>,
    children: HashSet<VmId>,
    kill_switch: Arc<KillSwitch>,
}

/// Process-wide context shared by a family of VMs: id allocation, the
/// process tree, trace settings and the threads started by `go`.
#[derive(Debug)]
pub struct Runtime {
    traces: TraceFlags,
    max_depth: usize,
    id_gen: AtomicU64,
    processes: Mutex<HashMap<VmId, Process>>,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl Runtime {
    pub fn new(info: RuntimeCreateInfo) -> Arc<Self> {
        Arc::new(Self {
            traces: info.traces,
            max_depth: info.max_depth,
            id_gen: AtomicU64::new(HOST_ID),
            processes: Mutex::new(HashMap::new()),
            threads: Mutex::new(Vec::new()),
        })
    }

    /// A root VM talking through `io`.
    pub fn new_vm(self: &Arc<Self>, io: Arc<dyn Port>) -> Vm {
        Vm::new(self, io)
    }

    pub fn traces(&self) -> TraceFlags {
        self.traces
    }

    pub fn tracing(&self, channel: TraceFlags) -> bool {
        self.traces.intersects(channel)
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    /// Stack size for a thread that runs a VM, large enough that the depth
    /// limit trips before the native stack runs out.
    pub fn stack_size(&self) -> usize {
        self.max_depth
            .saturating_mul(STACK_PER_LEVEL)
            .max(MIN_STACK)
    }

    pub(crate) fn register(&self, parent: Option<VmId>) -> (VmId, Arc<KillSwitch>) {
        let id = self.id_gen.fetch_add(1, Ordering::Relaxed) + 1;
        let kill_switch = Arc::new(KillSwitch::default());
        let mut processes = self.processes.lock();
        if let Some(p) = parent.and_then(|p| processes.get_mut(&p)) {
            p.children.insert(id);
        }
        processes.insert(
            id,
            Process {
                parent,
                children: HashSet::new(),
                kill_switch: kill_switch.clone(),
            },
        );
        (id, kill_switch)
    }

    /// Forget `id`, detaching it from its parent. Its children are killed.
    pub(crate) fn release(&self, id: VmId) {
        let mut processes = self.processes.lock();
        let Some(process) = processes.remove(&id) else {
            return;
        };
        if let Some(parent) = process.parent.and_then(|p| processes.get_mut(&p)) {
            parent.children.remove(&id);
        }
        let mut pending: Vec<VmId> = process.children.into_iter().collect();
        while let Some(child) = pending.pop() {
            if let Some(p) = processes.get(&child) {
                p.kill_switch.set();
                pending.extend(p.children.iter().copied());
            }
        }
    }

    /// Ask a VM to stop. Safe to call on an id that is already gone.
    pub fn kill(&self, id: VmId) {
        if let Some(p) = self.processes.lock().get(&id) {
            if self.tracing(TraceFlags::SYSTEM) {
                log::debug!(target: "gelo::sys", "VM {id} sent kill signal");
            }
            p.kill_switch.set();
        }
    }

    /// Whether `id` has been created and not yet destroyed.
    pub fn is_alive(&self, id: VmId) -> bool {
        self.processes.lock().contains_key(&id)
    }

    pub fn children_of(&self, id: VmId) -> Vec<VmId> {
        self.processes
            .lock()
            .get(&id)
            .map(|p| p.children.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn parent_of(&self, id: VmId) -> Option<VmId> {
        self.processes.lock().get(&id).and_then(|p| p.parent)
    }

    /// Number of live VMs.
    pub fn population(&self) -> usize {
        self.processes.lock().len()
    }

    /// Run `vm` to completion on its own native thread.
    pub(crate) fn spawn_thread<F>(&self, vm: Vm, f: F) -> Result<(), Error>
    where
        F: FnOnce(Vm) + Send + 'static,
    {
        let id = vm.id();
        let handle = thread::Builder::new()
            .name(format!("gelo-vm-{id}"))
            .stack_size(self.stack_size())
            .spawn(move || f(vm))
            .map_err(|e| Error::system(id, format!("could not start thread: {e}")))?;
        self.threads.lock().push(handle);
        Ok(())
    }

    /// Wait for every thread started so far, including ones started while
    /// waiting.
    pub fn join_threads(&self) {
        loop {
            let handles: Vec<_> = self.threads.lock().drain(..).collect();
            if handles.is_empty() {
                return;
            }
            for handle in handles {
                if handle.join().is_err() {
                    log::error!(target: "gelo::sys", "VM thread panicked");
                }
            }
        }
    }
}
