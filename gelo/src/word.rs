use std::{collections::BTreeMap, fmt, sync::Arc};

use crate::{
    dict::Dict,
    error::{Error, Flow},
    list::List,
    number::Number,
    port::Port,
    quote::Quote,
    symbol::Symbol,
    vm::Vm,
};

/// Calling convention of native commands: the VM, the arguments after the
/// command word, and how many there are.
pub type NativeFunction = dyn Fn(&mut Vm, List, usize) -> Flow<Word> + Send + Sync;

/// A native command.
#[derive(Clone)]
pub struct Alien(Arc<NativeFunction>);

impl Alien {
    pub fn new(f: impl Fn(&mut Vm, List, usize) -> Flow<Word> + Send + Sync + 'static) -> Self {
        Alien(Arc::new(f))
    }

    pub fn call(&self, vm: &mut Vm, args: List, ac: usize) -> Flow<Word> {
        (self.0)(vm, args, ac)
    }

    pub fn same(&self, other: &Alien) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for Alien {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "*ALIEN*@{:p}", Arc::as_ptr(&self.0) as *const ())
    }
}

/// Every value a script can see.
#[derive(Clone)]
pub enum Word {
    Symbol(Symbol),
    Number(Number),
    Bool(bool),
    List(List),
    Dict(Dict),
    Quote(Quote),
    Alien(Alien),
    Port(Arc<dyn Port>),
    Error(Error),
    /// Marker bound to `defer`.
    Defer,
}

impl Word {
    /// The empty symbol.
    pub fn null() -> Self {
        Word::Symbol(Symbol::null())
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Word::Symbol(s) if s.is_null())
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Word::Symbol(_) => "*SYMBOL*",
            Word::Number(_) => "*NUMBER*",
            Word::Bool(_) => "*BOOLEAN*",
            Word::List(_) => "*LIST*",
            Word::Dict(_) => "*DICT*",
            Word::Quote(_) => "*QUOTE*",
            Word::Alien(_) => "*ALIEN*",
            Word::Port(p) => p.type_name(),
            Word::Error(e) => e.type_name(),
            Word::Defer => "*DEFER*",
        }
    }

    pub fn ser(&self) -> Symbol {
        match self {
            Word::Symbol(s) => s.clone(),
            Word::Number(n) => n.ser(),
            Word::Bool(true) => Symbol::interned(&b"true"[..]),
            Word::Bool(false) => Symbol::interned(&b"false"[..]),
            Word::List(l) => l.ser(),
            Word::Dict(d) => d.ser(),
            Word::Quote(q) => q.ser(),
            Word::Error(e) => Symbol::from(e.to_string()),
            Word::Alien(_) | Word::Port(_) | Word::Defer => Symbol::interned(self.type_name().as_bytes()),
        }
    }

    /// Shallow copy: fresh containers, shared items.
    pub fn copy(&self) -> Word {
        match self {
            Word::Symbol(s) => Word::Symbol(s.copy()),
            Word::List(l) => Word::List(l.copy()),
            Word::Dict(d) => Word::Dict(d.copy()),
            other => other.clone(),
        }
    }

    pub fn deep_copy(&self) -> Word {
        match self {
            Word::Symbol(s) => Word::Symbol(s.copy()),
            Word::List(l) => Word::List(l.deep_copy()),
            Word::Dict(d) => Word::Dict(d.deep_copy()),
            other => other.clone(),
        }
    }

    /// Script-level equality.
    pub fn equals(&self, other: &Word) -> bool {
        match (self, other) {
            (Word::Symbol(s), o) => s.as_bytes() == o.ser().as_bytes(),
            (Word::Number(a), Word::Number(b)) => a == b,
            (Word::Bool(a), Word::Bool(b)) => a == b,
            (Word::List(a), Word::List(b)) => a.equals(b),
            (Word::Dict(a), Word::Dict(b)) => a.equals(b),
            (Word::Quote(a), Word::Quote(b)) => a == b,
            (Word::Alien(a), Word::Alien(b)) => a.same(b),
            (Word::Port(a), Word::Port(b)) => std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b)),
            (Word::Error(a), Word::Error(b)) => a.same_as(b),
            (Word::Defer, Word::Defer) => true,
            _ => false,
        }
    }

    /// A list as itself, anything else as a singleton.
    pub fn as_list(&self) -> List {
        match self {
            Word::List(l) => l.clone(),
            other => List::singleton(other.clone()),
        }
    }
}

impl PartialEq for Word {
    /// Strict structural equality: the variants must match.
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Word::Symbol(a), Word::Symbol(b)) => a == b,
            (Word::List(a), Word::List(b)) => a == b,
            (Word::Dict(a), Word::Dict(b)) => a == b,
            (Word::Error(a), Word::Error(b)) => a == b,
            (a, b) if std::mem::discriminant(a) == std::mem::discriminant(b) => a.equals(b),
            _ => false,
        }
    }
}

impl fmt::Debug for Word {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Word::Symbol(s) => write!(f, "{s:?}"),
            Word::Number(n) => write!(f, "{n:?}"),
            Word::Bool(b) => write!(f, "{b}"),
            Word::List(l) => write!(f, "{l:?}"),
            Word::Dict(d) => write!(f, "{d:?}"),
            Word::Quote(q) => write!(f, "{q:?}"),
            Word::Alien(a) => write!(f, "{a:?}"),
            Word::Port(p) => write!(f, "{p:?}"),
            Word::Error(e) => write!(f, "{e}"),
            Word::Defer => write!(f, "*DEFER*"),
        }
    }
}

impl fmt::Display for Word {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.ser())
    }
}

impl From<Symbol> for Word {
    fn from(s: Symbol) -> Self {
        Word::Symbol(s)
    }
}

impl From<&str> for Word {
    fn from(s: &str) -> Self {
        Word::Symbol(Symbol::from(s))
    }
}

impl From<String> for Word {
    fn from(s: String) -> Self {
        Word::Symbol(Symbol::from(s))
    }
}

impl From<&[u8]> for Word {
    fn from(s: &[u8]) -> Self {
        Word::Symbol(Symbol::from(s))
    }
}

impl From<Number> for Word {
    fn from(n: Number) -> Self {
        Word::Number(n)
    }
}

impl From<f64> for Word {
    fn from(n: f64) -> Self {
        Word::Number(Number::from(n))
    }
}

macro_rules! word_from_int {
    ($($t:ty),*) => {
        $(impl From<$t> for Word {
            fn from(n: $t) -> Self {
                Word::Number(Number::from(n as i64))
            }
        })*
    };
}

word_from_int!(i8, i16, i32, i64, u8, u16, u32, u64, isize, usize);

impl From<bool> for Word {
    fn from(b: bool) -> Self {
        Word::Bool(b)
    }
}

impl From<List> for Word {
    fn from(l: List) -> Self {
        Word::List(l)
    }
}

impl From<Vec<Word>> for Word {
    fn from(items: Vec<Word>) -> Self {
        Word::List(List::from(items))
    }
}

impl From<Vec<&str>> for Word {
    fn from(items: Vec<&str>) -> Self {
        Word::List(items.into_iter().map(Word::from).collect())
    }
}

impl From<Dict> for Word {
    fn from(d: Dict) -> Self {
        Word::Dict(d)
    }
}

impl From<BTreeMap<String, Word>> for Word {
    fn from(map: BTreeMap<String, Word>) -> Self {
        Word::Dict(Dict::from(map))
    }
}

impl From<Quote> for Word {
    fn from(q: Quote) -> Self {
        Word::Quote(q)
    }
}

impl From<Alien> for Word {
    fn from(a: Alien) -> Self {
        Word::Alien(a)
    }
}

impl From<Error> for Word {
    fn from(e: Error) -> Self {
        Word::Error(e)
    }
}

impl From<Arc<dyn Port>> for Word {
    fn from(p: Arc<dyn Port>) -> Self {
        Word::Port(p)
    }
}
