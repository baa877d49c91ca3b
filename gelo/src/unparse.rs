//! Render parsed code back into source text.

use crate::{
    ast::{Code, Line, Node},
    escape::escape_item,
    quote::Quote,
};

/// Source text for a quote's code; a quote that does not parse is
/// returned as its own source.
pub fn unparse(quote: &Quote) -> Vec<u8> {
    match quote.fcode() {
        Ok(Some(code)) => unparse_code(&code),
        Ok(None) => Vec::new(),
        Err(_) => quote.source().to_vec(),
    }
}

pub fn unparse_code(code: &Code) -> Vec<u8> {
    let mut out = Vec::new();
    for (i, line) in code.lines.iter().enumerate() {
        if i > 0 {
            out.push(b'\n');
        }
        unparse_line(line, &mut out);
    }
    out
}

fn unparse_line(line: &Line, out: &mut Vec<u8>) {
    for (i, node) in line.nodes.iter().enumerate() {
        if i > 0 {
            out.push(b' ');
        }
        unparse_node(node, out);
    }
}

fn unparse_node(node: &Node, out: &mut Vec<u8>) {
    match node {
        Node::Literal(w) => {
            let text = escape_item(w.ser().as_bytes());
            // characters the parser would read as structure
            if matches!(text.first(), Some(b'$' | b'@' | b'#')) {
                out.push(b'\\');
            }
            for b in text {
                if matches!(b, b'[' | b']' | b';' | b'\n') {
                    out.push(b'\\');
                }
                out.push(b);
            }
        }
        Node::Quote(q) => {
            out.push(b'{');
            out.extend_from_slice(q.source());
            out.push(b'}');
        }
        Node::Indirect(inner) => {
            out.push(b'$');
            unparse_node(inner, out);
        }
        Node::Splice(inner) => {
            out.push(b'@');
            unparse_node(inner, out);
        }
        Node::Clause(line) => {
            out.push(b'[');
            unparse_line(line, out);
            out.push(b']');
        }
    }
}
