mod api;
mod ast;
pub mod builtins;
mod dict;
pub mod error;
mod escape;
mod interpreter;
mod list;
mod namespace;
mod number;
mod parser;
pub mod port;
mod quote;
mod runtime;
mod span;
mod symbol;
mod unparse;
mod vm;
mod word;

pub use ast::{Code, Line, Node};
pub use dict::Dict;
pub use error::{Error, Flow, HOST_ID, ParseError, RuntimeErrorKind, Signal, VmId};
pub use escape::{escape_item, unescape_item};
pub use list::{List, ListBuilder};
pub use namespace::{Namespace, Scope, ScopeRef, SharedDict};
pub use number::Number;
pub use parser::{parse, parse_reader};
pub use port::{Channel, Port, Stdio};
pub use quote::Quote;
pub use runtime::{KillSwitch, Runtime, RuntimeCreateInfo, TraceFlags};
pub use span::Pos;
pub use symbol::Symbol;
pub use unparse::{unparse, unparse_code};
pub use vm::{ARGUMENTS, Bundle, Vm, VmState};
pub use word::{Alien, NativeFunction, Word};
