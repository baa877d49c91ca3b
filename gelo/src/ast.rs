use crate::{quote::Quote, word::Word};

/// A parsed program: one entry per non-empty source line.
#[derive(Debug, Clone, Default)]
pub struct Code {
    pub lines: Vec<Line>,
}

/// The tokens of one command, head first.
#[derive(Debug, Clone, Default)]
pub struct Line {
    pub nodes: Vec<Node>,
}

#[derive(Debug, Clone)]
pub enum Node {
    /// A bare word, number or string.
    Literal(Word),
    /// `{...}`, its body left unparsed.
    Quote(Quote),
    /// `$x`: evaluate, then look up the result by name.
    Indirect(Box<Node>),
    /// `@x`: evaluate, then inline the resulting list.
    Splice(Box<Node>),
    /// `[...]`, evaluated eagerly during rewrite.
    Clause(Line),
}
