use std::{
    fmt,
    sync::{Arc, OnceLock},
};

use crate::{
    ast::{Code, Line, Node},
    error::ParseError,
    escape::escape_item,
    list::List,
    parser,
    symbol::Symbol,
    word::Word,
};

type Parsed = Result<Option<Arc<Code>>, ParseError>;

struct QuoteData {
    source: Box<[u8]>,
    code: OnceLock<Parsed>,
    #[cfg(test)]
    parses: std::sync::atomic::AtomicUsize,
}

/// Source text plus its lazily parsed code.
///
/// The body of a quote is parsed the first time it is run, and the outcome
/// is kept for the life of the quote: a quote that fails to parse is never
/// parsed again and keeps reporting the same syntax error. All clones share
/// the cache.
///
/// Quotes seen by scripts and hosts are protected. An unprotected quote
/// returned from a native command asks the evaluator to run it in place
/// of the command's result.
#[derive(Clone)]
pub struct Quote {
    data: Arc<QuoteData>,
    protected: bool,
}

impl Quote {
    pub fn new(source: impl Into<Box<[u8]>>) -> Self {
        Self::with_cache(source.into(), OnceLock::new())
    }

    /// The no-op quote, `{}`.
    pub fn noop() -> Self {
        Self::new(Vec::new())
    }

    /// A quote whose code is already known.
    pub(crate) fn with_code(source: impl Into<Box<[u8]>>, code: Code) -> Self {
        Self::with_cache(source.into(), OnceLock::from(Ok(Some(Arc::new(code)))))
    }

    fn with_cache(source: Box<[u8]>, code: OnceLock<Parsed>) -> Self {
        Quote {
            data: Arc::new(QuoteData {
                source,
                code,
                #[cfg(test)]
                parses: Default::default(),
            }),
            protected: true,
        }
    }

    /// An unprotected quote that runs `words` as a single command line.
    ///
    /// The words are carried as literals, so natives and other values with
    /// no textual form survive the trip.
    pub fn from_words(words: &List) -> Self {
        let mut source = Vec::new();
        let mut nodes = Vec::new();
        for (i, w) in words.iter().enumerate() {
            if i > 0 {
                source.push(b' ');
            }
            source.extend_from_slice(&escape_item(w.ser().as_bytes()));
            nodes.push(match w {
                Word::Quote(q) => Node::Quote(q.protect()),
                other => Node::Literal(other.clone()),
            });
        }
        let code = if nodes.is_empty() {
            None
        } else {
            Some(Arc::new(Code {
                lines: vec![Line { nodes }],
            }))
        };
        let mut q = Self::with_cache(source.into(), OnceLock::from(Ok(code)));
        q.protected = false;
        q
    }

    pub fn source(&self) -> &[u8] {
        &self.data.source
    }

    pub fn ser(&self) -> Symbol {
        Symbol::new(self.source())
    }

    pub fn is_noop(&self) -> bool {
        self.data.source.is_empty()
    }

    /// Parsed code, parsing on first use. `Ok(None)` is the no-op.
    pub fn fcode(&self) -> Result<Option<Arc<Code>>, ParseError> {
        self.data
            .code
            .get_or_init(|| {
                if self.data.source.is_empty() {
                    return Ok(None);
                }
                #[cfg(test)]
                self.data
                    .parses
                    .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                log::trace!(target: "gelo::parse", "parsing quote of {} bytes", self.data.source.len());
                parser::parse(&self.data.source).map(|code| Some(Arc::new(code)))
            })
            .clone()
    }

    /// Whether the quote is known not to parse. Never triggers a parse.
    pub fn is_literal(&self) -> bool {
        matches!(self.data.code.get(), Some(Err(_)))
    }

    pub fn is_protected(&self) -> bool {
        self.protected
    }

    pub fn protect(&self) -> Quote {
        Quote {
            data: self.data.clone(),
            protected: true,
        }
    }

    #[cfg(test)]
    fn parse_count(&self) -> usize {
        self.data.parses.load(std::sync::atomic::Ordering::Relaxed)
    }
}

impl PartialEq for Quote {
    fn eq(&self, other: &Self) -> bool {
        self.source() == other.source()
    }
}

impl fmt::Debug for Quote {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{{}}}", String::from_utf8_lossy(self.source()))
    }
}
