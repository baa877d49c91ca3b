use std::{
    collections::VecDeque,
    fmt,
    io::{BufRead, Write},
};

use parking_lot::{Condvar, Mutex};

use crate::word::Word;

/// A message endpoint a VM talks through.
///
/// Implementations must be usable from several VMs at once.
pub trait Port: Send + Sync + fmt::Debug {
    fn send(&self, w: Word);
    fn recv(&self) -> Word;
    fn close(&self);
    fn closed(&self) -> bool;

    fn type_name(&self) -> &'static str {
        "*PORT*"
    }
}

#[derive(Debug, Default)]
struct ChannelState {
    queue: VecDeque<Word>,
    closed: bool,
}

/// An unbounded in-memory queue.
///
/// Words are deep copied on the way in and on the way out, so the two ends
/// never share a container.
#[derive(Debug, Default)]
pub struct Channel {
    state: Mutex<ChannelState>,
    ready: Condvar,
}

impl Channel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.state.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Port for Channel {
    fn send(&self, w: Word) {
        let mut state = self.state.lock();
        if state.closed {
            return;
        }
        state.queue.push_back(w.deep_copy());
        self.ready.notify_one();
    }

    /// Blocks until a word arrives. A closed and drained channel yields
    /// the empty symbol.
    fn recv(&self) -> Word {
        let mut state = self.state.lock();
        loop {
            if let Some(w) = state.queue.pop_front() {
                return w.deep_copy();
            }
            if state.closed {
                return Word::null();
            }
            self.ready.wait(&mut state);
        }
    }

    fn close(&self) {
        self.state.lock().closed = true;
        self.ready.notify_all();
    }

    fn closed(&self) -> bool {
        self.state.lock().closed
    }

    fn type_name(&self) -> &'static str {
        "*CHAN*"
    }
}

/// The process' standard streams.
#[derive(Debug, Default)]
pub struct Stdio {
    closed: Mutex<bool>,
}

impl Stdio {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Port for Stdio {
    fn send(&self, w: Word) {
        if self.closed() {
            return;
        }
        let mut out = std::io::stdout().lock();
        let res = out
            .write_all(w.ser().as_bytes())
            .and_then(|_| out.write_all(b"\n"))
            .and_then(|_| out.flush());
        if let Err(e) = res {
            log::error!(target: "gelo::sys", "stdout write failed: {e}");
        }
    }

    fn recv(&self) -> Word {
        if self.closed() {
            return Word::null();
        }
        let mut line = Vec::new();
        match std::io::stdin().lock().read_until(b'\n', &mut line) {
            Ok(_) => {
                if line.last() == Some(&b'\n') {
                    line.pop();
                }
                Word::from(line.as_slice())
            }
            Err(e) => {
                log::error!(target: "gelo::sys", "stdin read failed: {e}");
                Word::null()
            }
        }
    }

    fn close(&self) {
        *self.closed.lock() = true;
    }

    fn closed(&self) -> bool {
        *self.closed.lock()
    }

    fn type_name(&self) -> &'static str {
        "*STDIO*"
    }
}
