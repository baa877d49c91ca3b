//! Scope chains shared between VMs.
//!
//! Each VM sees a chain of scopes running from its current scope up to the
//! root. A spawned VM continues its parent's chain: the parent's scopes sit
//! above a *boundary* and belong to the parent. Reading a name that lives
//! above a boundary yields a deep copy, writing it shadows the binding in
//! the highest scope the VM owns, and deleting it hides the name behind the
//! boundary's blacklist.
//!
//! Every scope guards its dictionary with its own lock. Searches that may
//! end in a write take an upgradable read, so at most one writer is ever
//! waiting to upgrade a given scope.

use std::{collections::HashSet, sync::Arc};

use parking_lot::{Mutex, RwLock, RwLockUpgradableReadGuard, RwLockWriteGuard};

use crate::{dict::Dict, word::Word};

pub type ScopeRef = Arc<Scope>;
pub type SharedDict = Arc<RwLock<Dict>>;

pub struct Scope {
    up: Option<ScopeRef>,
    dict: SharedDict,
}

impl Scope {
    fn new(up: Option<ScopeRef>) -> ScopeRef {
        Self::with_dict(up, Arc::new(RwLock::new(Dict::new())))
    }

    fn with_dict(up: Option<ScopeRef>, dict: SharedDict) -> ScopeRef {
        Arc::new(Scope { up, dict })
    }

    pub fn up(&self) -> Option<&ScopeRef> {
        self.up.as_ref()
    }

    pub fn dict(&self) -> &SharedDict {
        &self.dict
    }
}

/// Where one VM's ownership of a chain ends.
#[derive(Clone)]
struct Boundary {
    top: ScopeRef,
    blacklist: Arc<Mutex<HashSet<Vec<u8>>>>,
}

impl Boundary {
    fn new(top: ScopeRef) -> Self {
        Self {
            top,
            blacklist: Arc::default(),
        }
    }

    fn blocks(&self, name: &[u8]) -> bool {
        self.blacklist.lock().contains(name)
    }
}

struct Step<'a> {
    scope: &'a Scope,
    /// Boundaries whose top is this scope.
    crossing: &'a [Boundary],
    /// Whether this scope belongs to another VM.
    above: bool,
}

impl Step<'_> {
    fn blocks(&self, name: &[u8]) -> bool {
        self.crossing.iter().any(|b| b.blocks(name))
    }
}

struct Walk<'a> {
    next: Option<&'a Scope>,
    boundaries: &'a [Boundary],
    crossed: usize,
}

impl<'a> Iterator for Walk<'a> {
    type Item = Step<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let scope = self.next?;
        self.next = scope.up.as_deref();
        let all = self.boundaries;
        let start = self.crossed;
        while all
            .get(self.crossed)
            .is_some_and(|b| std::ptr::eq(&*b.top, scope))
        {
            self.crossed += 1;
        }
        Some(Step {
            scope,
            crossing: &all[start..self.crossed],
            above: self.crossed > 0,
        })
    }
}

/// One VM's view of a scope chain.
#[derive(Clone)]
pub struct Namespace {
    current: ScopeRef,
    /// Innermost first.
    boundaries: Vec<Boundary>,
}

impl Namespace {
    /// A fresh chain of one scope, owned entirely.
    pub fn root() -> Self {
        Self {
            current: Scope::new(None),
            boundaries: Vec::new(),
        }
    }

    /// The view of a child VM: everything visible from here lies above its
    /// boundary, and it starts in a new scope of its own.
    pub fn spawn_child(&self) -> Namespace {
        let mut boundaries = Vec::with_capacity(self.boundaries.len() + 1);
        boundaries.push(Boundary::new(self.current.clone()));
        boundaries.extend(self.boundaries.iter().cloned());
        Namespace {
            current: Scope::new(Some(self.current.clone())),
            boundaries,
        }
    }

    /// Make the current scope read-only for this view and continue in a
    /// new scope below it.
    pub fn push_boundary(&mut self) {
        self.boundaries.insert(0, Boundary::new(self.current.clone()));
        self.fork();
    }

    pub fn current(&self) -> &ScopeRef {
        &self.current
    }

    pub fn is_current(&self, scope: &ScopeRef) -> bool {
        Arc::ptr_eq(&self.current, scope)
    }

    /// Jump to `scope`, which must be on this chain below the boundary.
    pub fn restore(&mut self, scope: ScopeRef) {
        self.current = scope;
    }

    pub fn current_dict(&self) -> SharedDict {
        self.current.dict.clone()
    }

    fn own_top(&self) -> Option<&Scope> {
        self.boundaries.first().map(|b| &*b.top)
    }

    fn walk(&self) -> Walk<'_> {
        Walk {
            next: Some(&*self.current),
            boundaries: &self.boundaries,
            crossed: 0,
        }
    }

    /// Scopes this view may write to, current first.
    fn owned(&self) -> impl Iterator<Item = &Scope> {
        self.walk().take_while(|s| !s.above).map(|s| s.scope)
    }

    pub fn fork(&mut self) {
        self.current = Scope::new(Some(self.current.clone()));
    }

    /// Fork into a scope backed by an existing dictionary.
    pub fn fork_with(&mut self, dict: SharedDict) -> ScopeRef {
        self.current = Scope::with_dict(Some(self.current.clone()), dict);
        self.current.clone()
    }

    /// Leave the current scope, returning its contents. Refuses to leave
    /// the last owned scope.
    pub fn unfork(&mut self) -> Option<Dict> {
        let up = self.current.up.clone()?;
        if self.own_top().is_some_and(|top| std::ptr::eq(top, &*up)) {
            return None;
        }
        let dict = self.current.dict.read().clone();
        self.current = up;
        Some(dict)
    }

    pub fn depth(&self) -> usize {
        self.walk().count()
    }

    pub fn local_depth(&self) -> usize {
        self.owned().count()
    }

    /// 1-based distance of the scope defining `name`.
    pub fn depth_of(&self, name: &[u8]) -> Option<usize> {
        for (i, step) in self.walk().enumerate() {
            if step.blocks(name) {
                return None;
            }
            if step.scope.dict.read().has(name) {
                return Some(i + 1);
            }
        }
        None
    }

    pub fn has(&self, name: &[u8]) -> bool {
        self.depth_of(name).is_some()
    }

    pub fn lookup(&self, name: &[u8]) -> Option<Word> {
        for step in self.walk() {
            if step.blocks(name) {
                return None;
            }
            if let Some(w) = step.scope.dict.read().get(name) {
                return Some(if step.above { w.deep_copy() } else { w.clone() });
            }
        }
        None
    }

    /// Deep copy of the nearest binding, ignoring boundaries.
    pub fn copy_out(&self, name: &[u8]) -> Option<Word> {
        self.walk()
            .find_map(|s| s.scope.dict.read().get(name).map(Word::deep_copy))
    }

    /// Current scope only.
    pub fn get(&self, name: &[u8]) -> Option<Word> {
        self.current.dict.read().get(name).cloned()
    }

    pub fn set(&self, name: &[u8], value: Word) {
        self.current.dict.write().set(name, value);
    }

    /// Remove a binding from the current scope only.
    pub fn remove(&self, name: &[u8]) -> Option<Word> {
        self.current.dict.write().remove(name)
    }

    /// The merged bindings of the nearest `levels + 1` scopes, or of all of
    /// them when `levels` is negative. Nearer bindings win.
    pub fn locals(&self, levels: isize) -> Dict {
        let take = usize::try_from(levels).map_or(usize::MAX, |n| n.saturating_add(1));
        let mut out = Dict::new();
        let mut hidden: Vec<&Boundary> = Vec::new();
        for step in self.walk().take(take) {
            hidden.extend(step.crossing);
            let dict = step.scope.dict.read();
            for (k, v) in dict.iter() {
                if out.has(k) {
                    continue;
                }
                if step.above {
                    if hidden.iter().any(|b| b.blocks(k)) {
                        continue;
                    }
                    out.set(k, v.deep_copy());
                } else {
                    out.set(k, v.clone());
                }
            }
        }
        out
    }

    /// The `level`-th owned scope counting up from the current one; a
    /// negative level picks the highest owned scope.
    fn nth(&self, level: isize) -> Option<&Scope> {
        match usize::try_from(level) {
            Ok(n) => self.owned().nth(n),
            Err(_) => self.owned().last(),
        }
    }

    pub fn nset(&self, level: isize, name: &[u8], value: Word) -> bool {
        match self.nth(level) {
            Some(scope) => {
                scope.dict.write().set(name, value);
                true
            }
            None => false,
        }
    }

    /// Merge `dict` into the current scope. Nothing is copied.
    pub fn inject(&self, dict: &Dict) {
        self.current.dict.write().extend(dict);
    }

    pub fn ninject(&self, level: isize, dict: &Dict) -> bool {
        match self.nth(level) {
            Some(scope) => {
                scope.dict.write().extend(dict);
                true
            }
            None => false,
        }
    }

    /// Delete the nearest binding of `name`, returning its value.
    ///
    /// Owned bindings are removed. A binding above the boundary is left in
    /// place and blacklisted for this view and its descendants instead.
    pub fn del(&self, name: &[u8]) -> Option<Word> {
        for step in self.walk() {
            if step.blocks(name) {
                return None;
            }
            if !step.above {
                let dict = step.scope.dict.upgradable_read();
                if dict.has(name) {
                    return RwLockUpgradableReadGuard::upgrade(dict).remove(name);
                }
                continue;
            }
            let found = step.scope.dict.read().get(name).map(Word::deep_copy);
            if let Some(w) = found {
                if let Some(own) = self.boundaries.first() {
                    own.blacklist.lock().insert(name.to_vec());
                }
                return Some(w);
            }
        }
        None
    }

    /// Replace the nearest binding of `name` with `f` of its value and
    /// return the old value; `f` returning `None` leaves it alone.
    ///
    /// A binding above the boundary is shadowed in the highest owned scope,
    /// which stays write locked from the moment the search crosses the
    /// boundary until the update is done. `f` runs under the lock and must
    /// not touch this namespace.
    pub fn mutate_by(&self, name: &[u8], f: impl FnOnce(&Word) -> Option<Word>) -> Option<Word> {
        let mut below: Option<&Scope> = None;
        let mut redirect: Option<RwLockWriteGuard<'_, Dict>> = None;
        for step in self.walk() {
            if !step.above {
                below = Some(step.scope);
                let dict = step.scope.dict.upgradable_read();
                if let Some(old) = dict.get(name).cloned() {
                    if let Some(new) = f(&old) {
                        RwLockUpgradableReadGuard::upgrade(dict).set(name, new);
                    }
                    return Some(old);
                }
                continue;
            }
            if step.blocks(name) {
                return None;
            }
            let target = below?;
            let guard = redirect.get_or_insert_with(|| target.dict.write());
            let old = if Arc::ptr_eq(&step.scope.dict, &target.dict) {
                guard.get(name).map(Word::deep_copy)
            } else {
                step.scope.dict.read().get(name).map(Word::deep_copy)
            };
            if let Some(old) = old {
                if let Some(new) = f(&old) {
                    guard.set(name, new);
                }
                return Some(old);
            }
        }
        None
    }

    /// Rebind the nearest `name` to `value`. False if it is undefined.
    pub fn mutate(&self, name: &[u8], value: Word) -> bool {
        self.mutate_by(name, |_| Some(value)).is_some()
    }

    /// Exchange the values of two names, returning their new values.
    ///
    /// Every owned scope is write locked, current first, for the whole
    /// exchange; a name found above the boundary is written to the highest
    /// owned scope.
    pub fn swap(&self, first: &[u8], second: &[u8]) -> Option<(Word, Word)> {
        let mut guards: Vec<(&SharedDict, RwLockWriteGuard<'_, Dict>)> = Vec::new();
        for scope in self.owned() {
            if guards.iter().all(|(d, _)| !Arc::ptr_eq(d, &scope.dict)) {
                guards.push((&scope.dict, scope.dict.write()));
            }
        }
        let highest = guards.len().checked_sub(1)?;
        let find_owned = |name: &[u8]| {
            guards
                .iter()
                .enumerate()
                .find_map(|(i, (_, d))| d.get(name).map(|w| (i, w.clone())))
        };
        let mut left = find_owned(first);
        let mut right = find_owned(second);
        // a name is settled once found or hidden by a blacklist
        let (mut left_done, mut right_done) = (left.is_some(), right.is_some());
        for step in self.walk().filter(|s| s.above) {
            if left_done && right_done {
                break;
            }
            left_done |= step.blocks(first);
            right_done |= step.blocks(second);
            if guards.iter().any(|(d, _)| Arc::ptr_eq(d, &step.scope.dict)) {
                continue;
            }
            let dict = step.scope.dict.read();
            if !left_done {
                left = dict.get(first).map(|w| (highest, w.deep_copy()));
                left_done = left.is_some();
            }
            if !right_done {
                right = dict.get(second).map(|w| (highest, w.deep_copy()));
                right_done = right.is_some();
            }
        }
        let ((li, lw), (ri, rw)) = (left?, right?);
        guards[li].1.set(first, rw.clone());
        guards[ri].1.set(second, lw.clone());
        Some((rw, lw))
    }
}
