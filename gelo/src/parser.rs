//! Lexer and parser for program text.
//!
//! Parsing works byte by byte over any [`Read`] source. Lines split on
//! newline and `;`. Words, strings and `[...]` clauses become nodes
//! straight away. A `{...}` body is only brace-balanced and kept as source
//! text; it gets parsed the first time the quote runs.
//!
//! # Escapes
//!
//! | Context     | `\x` becomes                                          |
//! |-------------|-------------------------------------------------------|
//! | bare words  | control byte for `n r f t a b v`, else `x`            |
//! | `"..."`     | `"` for `\"`, otherwise kept verbatim with the `\`    |
//! | `{...}`     | kept verbatim                                         |
//!
//! Outside of quotes `\*` swallows the following whitespace, newlines
//! included, so a command can continue on the next line.
use std::io::Read;

use crate::{
    ast::{Code, Line, Node},
    error::ParseError,
    number::Number,
    quote::Quote,
    span::Pos,
    symbol::Symbol,
    word::Word,
};

const CHUNK: usize = 4096;

/// Byte-at-a-time reader over any `Read`, with position tracking.
///
/// Optionally keeps a copy of everything it hands out so a program read
/// from a stream can keep its source text.
struct ReadBuf<R: Read> {
    reader: R,
    buf: Box<[u8]>,
    start: usize,
    filled: usize,
    reader_eof: bool,
    error: Option<std::io::Error>,
    recorded: Option<Vec<u8>>,
    pos: Pos,
}

impl<R: Read> ReadBuf<R> {
    fn new(reader: R) -> Self {
        Self {
            reader,
            buf: vec![0u8; CHUNK].into_boxed_slice(),
            start: 0,
            filled: 0,
            reader_eof: false,
            error: None,
            recorded: None,
            pos: Pos::origin(),
        }
    }

    fn recording(reader: R) -> Self {
        let mut rb = Self::new(reader);
        rb.recorded = Some(Vec::new());
        rb
    }

    /// Top up the buffer once it has been drained.
    fn fill(&mut self) {
        while self.start == self.filled && !self.reader_eof {
            self.start = 0;
            self.filled = 0;
            match self.reader.read(&mut self.buf) {
                Ok(0) => self.reader_eof = true,
                Ok(n) => self.filled = n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
                Err(e) => {
                    self.error = Some(e);
                    self.reader_eof = true;
                }
            }
        }
    }

    /// Position of the next byte.
    fn pos(&self) -> Pos {
        self.pos
    }

    /// Consume one byte and return it, updating position tracking.
    fn advance(&mut self) -> Option<u8> {
        self.fill();
        if self.start == self.filled {
            return None;
        }
        let b = self.buf[self.start];
        self.start += 1;
        self.pos = self.pos.step(b);
        if let Some(rec) = self.recorded.as_mut() {
            rec.push(b);
        }
        Some(b)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lexeme {
    Eol,
    Eof,
    /// Non-newline whitespace.
    Space,
    Indirect,
    Splice,
    Str,
    OpenClause,
    CloseClause,
    OpenQuote,
    CloseQuote,
    Comment,
    /// Everything else.
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Escape {
    Reg,
    Str,
    Quote,
}

fn control_char(b: u8) -> Option<u8> {
    Some(match b {
        b'n' => b'\n',
        b'r' => b'\r',
        b'f' => 0x0c,
        b't' => b'\t',
        b'a' => 0x07,
        b'b' => 0x08,
        b'v' => 0x0b,
        _ => return None,
    })
}

/// Deepest `[` nesting accepted in one line.
const MAX_CLAUSE_NESTING: usize = 256;

struct Parser<R: Read> {
    input: ReadBuf<R>,
    /// Class of the current byte.
    ch: Lexeme,
    /// The current byte, after escape processing.
    cur: u8,
    /// Position of the current byte.
    at: Pos,
    escape: Escape,
    /// When set, each byte is pushed to `buf` as it is stepped over.
    record: bool,
    buf: Vec<u8>,
    /// Clauses currently open.
    nesting: usize,
}

impl<R: Read> Parser<R> {
    fn new(input: ReadBuf<R>) -> Self {
        Self {
            input,
            ch: Lexeme::Eol,
            cur: 0,
            at: Pos::origin(),
            escape: Escape::Reg,
            record: false,
            buf: Vec::new(),
            nesting: 0,
        }
    }

    fn error(&self, message: &str) -> ParseError {
        ParseError::new(message, self.at)
    }

    /// Load the next raw byte into `cur` without classifying it.
    fn adv(&mut self) {
        if self.ch == Lexeme::Eof {
            return;
        }
        self.at = self.input.pos();
        match self.input.advance() {
            Some(b) => self.cur = b,
            None => self.ch = Lexeme::Eof,
        }
    }

    fn classify(&mut self) {
        self.ch = match self.cur {
            b'\n' | b';' => Lexeme::Eol,
            b' ' | b'\t' | 0x0c => Lexeme::Space,
            b'#' => Lexeme::Comment,
            b'$' => Lexeme::Indirect,
            b'@' => Lexeme::Splice,
            b'"' => Lexeme::Str,
            b'[' => Lexeme::OpenClause,
            b']' => Lexeme::CloseClause,
            b'{' => Lexeme::OpenQuote,
            b'}' => Lexeme::CloseQuote,
            _ => Lexeme::Other,
        };
    }

    /// Step over the current byte, recording it if asked to, and process
    /// any escape that follows.
    fn next(&mut self) -> Result<(), ParseError> {
        if self.ch != Lexeme::Eof && self.record {
            self.buf.push(self.cur);
        }
        self.adv();
        if self.ch == Lexeme::Eof {
            return Ok(());
        }
        if self.cur != b'\\' {
            self.classify();
            return Ok(());
        }

        self.adv();
        if self.ch == Lexeme::Eof {
            return Err(self.error("Cannot escape the end of file"));
        }
        let escaped = self.cur;
        if self.escape != Escape::Quote && escaped == b'*' {
            loop {
                self.adv();
                if self.ch == Lexeme::Eof {
                    return Ok(());
                }
                if !matches!(self.cur, b' ' | b'\n' | b'\t' | 0x0c) {
                    self.classify();
                    return Ok(());
                }
            }
        }
        match self.escape {
            Escape::Reg => {
                if let Some(c) = control_char(escaped) {
                    self.cur = c;
                }
            }
            Escape::Str => {
                if escaped != b'"' {
                    self.buf.push(b'\\');
                }
            }
            Escape::Quote => {
                if self.record {
                    self.buf.push(b'\\');
                }
            }
        }
        self.ch = Lexeme::Other;
        Ok(())
    }

    /// Stop recording and hand over what was recorded.
    fn read_out(&mut self) -> Vec<u8> {
        self.record = false;
        std::mem::take(&mut self.buf)
    }

    fn skip_space(&mut self) -> Result<(), ParseError> {
        while self.ch == Lexeme::Space {
            self.next()?;
        }
        Ok(())
    }

    fn parse_code(&mut self) -> Result<Code, ParseError> {
        self.next()?;
        let mut lines = Vec::new();
        while self.ch != Lexeme::Eof {
            if let Some(line) = self.parse_line()? {
                lines.push(line);
            }
        }
        Ok(Code { lines })
    }

    fn parse_line(&mut self) -> Result<Option<Line>, ParseError> {
        self.skip_space()?;
        match self.ch {
            Lexeme::Eol | Lexeme::Eof => {
                self.next()?;
                return Ok(None);
            }
            Lexeme::Comment => self.skip_comment()?,
            _ => {}
        }
        let nodes = self.parse_nodes(false)?;
        Ok((!nodes.is_empty()).then_some(Line { nodes }))
    }

    /// Comments run to the end of the line but must keep `{}` balanced,
    /// since they may sit inside a quote that has not been parsed yet.
    fn skip_comment(&mut self) -> Result<(), ParseError> {
        while self.ch != Lexeme::Eol {
            match self.ch {
                Lexeme::Eof => return Ok(()),
                Lexeme::OpenQuote => self.rquote(false)?,
                _ => {}
            }
            self.next()?;
        }
        Ok(())
    }

    fn parse_nodes(&mut self, clause: bool) -> Result<Vec<Node>, ParseError> {
        let mut nodes = Vec::new();
        loop {
            self.skip_space()?;
            match self.ch {
                Lexeme::CloseQuote => return Err(self.error("} before {")),
                Lexeme::Eol | Lexeme::Eof => {
                    if clause {
                        return Err(self.error("[ without ]"));
                    }
                    self.next()?;
                    return Ok(nodes);
                }
                Lexeme::CloseClause => {
                    if !clause {
                        return Err(self.error("] before ["));
                    }
                    self.next()?;
                    return Ok(nodes);
                }
                Lexeme::OpenClause => {
                    self.next()?;
                    nodes.push(self.parse_clause()?);
                }
                Lexeme::Str => nodes.push(self.parse_string()?),
                Lexeme::OpenQuote => nodes.push(self.parse_quote()?),
                _ => nodes.push(self.parse_word()?),
            }
        }
    }

    /// Parse a clause body; the opening `[` has been stepped over.
    fn parse_clause(&mut self) -> Result<Node, ParseError> {
        if self.nesting >= MAX_CLAUSE_NESTING {
            return Err(self.error("clauses nested too deeply"));
        }
        self.skip_space()?;
        match self.ch {
            Lexeme::CloseClause => Err(self.error("[] invalid. Use {} for no-op")),
            Lexeme::Eol | Lexeme::Eof => Err(self.error("[ without ]")),
            _ => {
                self.nesting += 1;
                let nodes = self.parse_nodes(true);
                self.nesting -= 1;
                Ok(Node::Clause(Line { nodes: nodes? }))
            }
        }
    }

    fn parse_word(&mut self) -> Result<Node, ParseError> {
        let sigil = match self.ch {
            Lexeme::Indirect => Some(Lexeme::Indirect),
            Lexeme::Splice => Some(Lexeme::Splice),
            _ => None,
        };
        let Some(sigil) = sigil else {
            return self.parse_bare_word();
        };
        self.next()?;
        let inner = match self.ch {
            Lexeme::Eol
            | Lexeme::Eof
            | Lexeme::Space
            | Lexeme::CloseClause
            | Lexeme::CloseQuote => return Err(self.error("Sigil precedes nothing")),
            Lexeme::OpenClause => {
                self.next()?;
                self.parse_clause()?
            }
            Lexeme::OpenQuote => self.parse_quote()?,
            Lexeme::Str => self.parse_string()?,
            _ => self.parse_bare_word()?,
        };
        Ok(match sigil {
            Lexeme::Splice => Node::Splice(Box::new(inner)),
            _ => Node::Indirect(Box::new(inner)),
        })
    }

    fn parse_bare_word(&mut self) -> Result<Node, ParseError> {
        self.record = true;
        let numeric = self.cur.is_ascii_digit() || matches!(self.cur, b'-' | b'+' | b'.');
        loop {
            match self.ch {
                Lexeme::Eol
                | Lexeme::Eof
                | Lexeme::Space
                | Lexeme::OpenQuote
                | Lexeme::CloseQuote
                | Lexeme::OpenClause
                | Lexeme::CloseClause
                | Lexeme::Str => break,
                _ => self.next()?,
            }
        }
        let raw = self.read_out();
        if numeric {
            if let Some(n) = Number::parse(&raw) {
                return Ok(Node::Literal(Word::Number(n)));
            }
        }
        Ok(Node::Literal(Word::Symbol(Symbol::interned(raw))))
    }

    /// Brace-balance a quote body, leaving `}` as the current byte.
    fn rquote(&mut self, record: bool) -> Result<(), ParseError> {
        let mut depth = 1usize;
        self.escape = Escape::Quote;
        self.record = record;
        // the opening { must not be recorded, so the first byte is
        // loaded by hand and only escapes need special care
        self.adv();
        if self.ch == Lexeme::Eof {
            return Err(self.error("{ without }"));
        }
        if self.cur == b'\\' {
            self.adv();
            if self.ch == Lexeme::Eof {
                return Err(self.error("Cannot escape the end of file"));
            }
            if record {
                self.buf.push(b'\\');
            }
            self.ch = Lexeme::Other;
        } else {
            self.classify();
        }
        loop {
            match self.ch {
                Lexeme::OpenQuote => depth += 1,
                Lexeme::CloseQuote => {
                    depth -= 1;
                    if depth == 0 {
                        self.escape = Escape::Reg;
                        return Ok(());
                    }
                }
                Lexeme::Eof => return Err(self.error("{ without }")),
                _ => {}
            }
            self.next()?;
        }
    }

    fn parse_quote(&mut self) -> Result<Node, ParseError> {
        self.rquote(true)?;
        let body = self.read_out();
        self.next()?;
        Ok(Node::Quote(if body.is_empty() {
            Quote::noop()
        } else {
            Quote::new(body)
        }))
    }

    fn parse_string(&mut self) -> Result<Node, ParseError> {
        self.escape = Escape::Str;
        self.next()?;
        if self.ch == Lexeme::Str {
            self.escape = Escape::Reg;
            self.next()?;
            return Ok(Node::Literal(Word::null()));
        }
        self.record = true;
        while self.ch != Lexeme::Str {
            if self.ch == Lexeme::Eof {
                return Err(self.error("\" without \""));
            }
            self.next()?;
        }
        let body = self.read_out();
        self.escape = Escape::Reg;
        self.next()?;
        Ok(Node::Literal(Word::Symbol(Symbol::interned(body))))
    }

    fn finish(&mut self) -> Result<(), ParseError> {
        match self.input.error.take() {
            Some(e) => Err(ParseError::new(format!("Read failed: {e}"), self.at)),
            None => Ok(()),
        }
    }
}

/// Parse a complete program.
pub fn parse(source: &[u8]) -> Result<Code, ParseError> {
    let mut p = Parser::new(ReadBuf::new(source));
    let code = p.parse_code()?;
    log::trace!(target: "gelo::parse", "parsed {} lines", code.lines.len());
    Ok(code)
}

/// Parse a program from a stream, returning the code and the source text.
pub fn parse_reader<R: Read>(reader: R) -> Result<(Code, Vec<u8>), ParseError> {
    let mut p = Parser::new(ReadBuf::recording(reader));
    let code = p.parse_code()?;
    p.finish()?;
    let source = p.input.recorded.take().unwrap_or_default();
    log::trace!(target: "gelo::parse", "parsed {} lines from a stream", code.lines.len());
    Ok((code, source))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_str(src: &str) -> Code {
        parse(src.as_bytes()).unwrap()
    }

    fn literal(node: &Node) -> String {
        match node {
            Node::Literal(w) => w.ser().to_string(),
            other => panic!("expected literal, got {:?}", other),
        }
    }

    fn parse_err(src: &str) -> String {
        parse(src.as_bytes()).unwrap_err().message
    }

    #[test]
    fn test_lines_and_words() {
        let code = parse_str("a b c\n\n  d;e\n");
        assert_eq!(code.lines.len(), 3);
        let words: Vec<String> = code.lines[0].nodes.iter().map(literal).collect();
        assert_eq!(words, vec!["a", "b", "c"]);
        assert_eq!(literal(&code.lines[1].nodes[0]), "d");
        assert_eq!(literal(&code.lines[2].nodes[0]), "e");
    }

    #[test]
    fn test_numbers() {
        let code = parse_str("1 -2.50 +x .5 3a");
        let nodes = &code.lines[0].nodes;
        assert!(matches!(&nodes[0], Node::Literal(Word::Number(_))));
        match &nodes[1] {
            Node::Literal(Word::Number(n)) => {
                assert_eq!(n.value(), -2.5);
                assert_eq!(n.ser(), "-2.50");
            }
            other => panic!("expected number, got {:?}", other),
        }
        assert!(matches!(&nodes[2], Node::Literal(Word::Symbol(_))));
        assert!(matches!(&nodes[3], Node::Literal(Word::Number(_))));
        assert!(matches!(&nodes[4], Node::Literal(Word::Symbol(_))));
    }

    #[test]
    fn test_quote_body_is_not_parsed() {
        let code = parse_str("set! f {a [b\n c} {}");
        let nodes = &code.lines[0].nodes;
        match &nodes[2] {
            Node::Quote(q) => {
                assert_eq!(q.source(), b"a [b\n c");
                assert!(q.fcode().is_err());
            }
            other => panic!("expected quote, got {:?}", other),
        }
        match &nodes[3] {
            Node::Quote(q) => assert!(q.is_noop()),
            other => panic!("expected quote, got {:?}", other),
        }
    }

    #[test]
    fn test_nested_quotes_and_escapes() {
        let code = parse_str("x {{a} \\} b}");
        match &code.lines[0].nodes[1] {
            Node::Quote(q) => assert_eq!(q.source(), b"{a} \\} b"),
            other => panic!("expected quote, got {:?}", other),
        }
        let code = parse_str("x {\\{ y}");
        match &code.lines[0].nodes[1] {
            Node::Quote(q) => assert_eq!(q.source(), b"\\{ y"),
            other => panic!("expected quote, got {:?}", other),
        }
    }

    #[test]
    fn test_strings() {
        let code = parse_str("say \"hello world\" \"\" \"a\\\"b\\n\"");
        let nodes = &code.lines[0].nodes;
        assert_eq!(literal(&nodes[1]), "hello world");
        assert_eq!(literal(&nodes[2]), "");
        assert_eq!(literal(&nodes[3]), "a\"b\\n");
    }

    #[test]
    fn test_word_escapes() {
        let code = parse_str("a\\tb \\{x \\$y");
        let nodes = &code.lines[0].nodes;
        assert_eq!(literal(&nodes[0]), "a\tb");
        assert_eq!(literal(&nodes[1]), "{x");
        assert_eq!(literal(&nodes[2]), "$y");
    }

    #[test]
    fn test_continuation() {
        let code = parse_str("a \\*\n    b\nc");
        assert_eq!(code.lines.len(), 2);
        assert_eq!(code.lines[0].nodes.len(), 2);
        assert_eq!(literal(&code.lines[0].nodes[1]), "b");
    }

    #[test]
    fn test_sigils_and_clauses() {
        let code = parse_str("f $x @[list a] [g $[h]]");
        let nodes = &code.lines[0].nodes;
        assert!(matches!(&nodes[1], Node::Indirect(inner) if matches!(**inner, Node::Literal(_))));
        assert!(matches!(&nodes[2], Node::Splice(inner) if matches!(**inner, Node::Clause(_))));
        match &nodes[3] {
            Node::Clause(line) => {
                assert_eq!(line.nodes.len(), 2);
                assert!(matches!(&line.nodes[1], Node::Indirect(_)));
            }
            other => panic!("expected clause, got {:?}", other),
        }
    }

    #[test]
    fn test_comments() {
        let code = parse_str("# a comment {with braces}\nx # not a comment\n  # {\n}\ny");
        assert_eq!(code.lines.len(), 2);
        assert_eq!(code.lines[0].nodes.len(), 5);
        assert_eq!(literal(&code.lines[1].nodes[0]), "y");
        assert!(parse_str("# only a comment").lines.is_empty());
    }

    #[test]
    fn test_syntax_errors() {
        assert_eq!(parse_err("a {b"), "{ without }");
        assert_eq!(parse_err("a \"b"), "\" without \"");
        assert_eq!(parse_err("a [b"), "[ without ]");
        assert_eq!(parse_err("a [b\nc]"), "[ without ]");
        assert_eq!(parse_err("a []"), "[] invalid. Use {} for no-op");
        assert_eq!(parse_err("a }"), "} before {");
        assert_eq!(parse_err("a ]"), "] before [");
        assert_eq!(parse_err("a $ b"), "Sigil precedes nothing");
        assert_eq!(parse_err("a \\"), "Cannot escape the end of file");
        assert_eq!(parse_err("# {"), "{ without }");
    }

    #[test]
    fn test_clause_nesting_limit() {
        let nested = |n: usize| format!("{}x{}", "[".repeat(n), "]".repeat(n));
        let code = parse_str(&nested(MAX_CLAUSE_NESTING));
        assert_eq!(code.lines.len(), 1);
        assert_eq!(
            parse_err(&nested(MAX_CLAUSE_NESTING + 1)),
            "clauses nested too deeply"
        );
        assert_eq!(parse_err(&nested(200_000)), "clauses nested too deeply");
        let quoted = format!("f {{{}}}", nested(200_000));
        assert!(parse(quoted.as_bytes()).is_ok());
    }

    #[test]
    fn test_error_position() {
        let err = parse(b"ok\n  ]").unwrap_err();
        assert_eq!(err.pos.line, 2);
        assert_eq!(err.pos.column, 3);
    }

    #[test]
    fn test_parse_reader_keeps_source() {
        let src = "a b\nc {d}\n";
        let (code, source) = parse_reader(src.as_bytes()).unwrap();
        assert_eq!(code.lines.len(), 2);
        assert_eq!(source, src.as_bytes());
    }
}
