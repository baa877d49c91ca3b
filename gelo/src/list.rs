use std::{collections::VecDeque, fmt, sync::Arc};

use crate::{
    escape::{escape_item, slurp_ws, unescape_item},
    symbol::Symbol,
    word::Word,
};

/// An immutable singly linked list.
///
/// Cells are shared between lists, so `clone` is O(1) and a tail can be
/// handed out without copying. Lists must never be made cyclic.
#[derive(Clone, Default)]
pub struct List(Option<Arc<Cons>>);

struct Cons {
    value: Word,
    next: List,
}

impl List {
    pub const fn new() -> Self {
        List(None)
    }

    pub fn singleton(value: Word) -> Self {
        List::cons(value, List::new())
    }

    pub fn cons(value: Word, next: List) -> Self {
        List(Some(Arc::new(Cons { value, next })))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_none()
    }

    pub fn head(&self) -> Option<&Word> {
        self.0.as_ref().map(|c| &c.value)
    }

    pub fn tail(&self) -> List {
        match &self.0 {
            Some(c) => c.next.clone(),
            None => List::new(),
        }
    }

    pub fn iter(&self) -> Iter<'_> {
        Iter { cur: self }
    }

    pub fn len(&self) -> usize {
        self.iter().count()
    }

    pub fn to_vec(&self) -> Vec<Word> {
        self.iter().cloned().collect()
    }

    pub fn map(&self, f: impl FnMut(&Word) -> Word) -> List {
        self.iter().map(f).collect()
    }

    /// Apply `f` to a singleton's only item, or map it over a longer list.
    /// The empty list yields the empty symbol.
    pub fn map_or_apply<E>(
        &self,
        mut f: impl FnMut(&Word) -> Result<Word, E>,
    ) -> Result<Word, E> {
        match (self.head(), self.tail().is_empty()) {
            (None, _) => Ok(Word::null()),
            (Some(only), true) => f(only),
            (Some(_), false) => Ok(Word::List(self.iter().map(f).collect::<Result<List, E>>()?)),
        }
    }

    pub fn ser(&self) -> Symbol {
        let mut out = vec![b'{'];
        for (i, w) in self.iter().enumerate() {
            if i > 0 {
                out.push(b' ');
            }
            out.extend_from_slice(&escape_item(w.ser().as_bytes()));
        }
        out.push(b'}');
        Symbol::new(out)
    }

    pub fn copy(&self) -> List {
        self.iter().cloned().collect()
    }

    pub fn deep_copy(&self) -> List {
        self.iter().map(Word::deep_copy).collect()
    }

    /// Item-wise script equality.
    pub fn equals(&self, other: &List) -> bool {
        let mut a = self.iter();
        let mut b = other.iter();
        loop {
            match (a.next(), b.next()) {
                (None, None) => return true,
                (Some(x), Some(y)) if x.equals(y) => {}
                _ => return false,
            }
        }
    }

    /// Read a serialized list of symbols back.
    ///
    /// With `enclosed` the text must be wrapped in `{}`.
    pub fn unserialize(ser: &[u8], enclosed: bool) -> Option<List> {
        let mut pos = slurp_ws(ser, 0);
        if enclosed {
            if ser.get(pos) != Some(&b'{') {
                return None;
            }
            pos = slurp_ws(ser, pos + 1);
        }
        let mut items = ListBuilder::new();
        loop {
            match ser.get(pos) {
                None if enclosed => return None,
                None => break,
                Some(b'}') if enclosed => {
                    pos = slurp_ws(ser, pos + 1);
                    break;
                }
                Some(_) => {
                    let (item, next) = unescape_item(ser, pos)?;
                    if next == pos {
                        // a stray } in a bare list
                        return None;
                    }
                    items.push(Word::Symbol(Symbol::new(item)));
                    pos = slurp_ws(ser, next);
                }
            }
        }
        (pos == ser.len()).then(|| items.build())
    }
}

impl Drop for List {
    fn drop(&mut self) {
        // unlink iteratively so long lists cannot overflow the stack
        let mut next = self.0.take();
        while let Some(cell) = next {
            match Arc::try_unwrap(cell) {
                Ok(mut cons) => next = cons.next.0.take(),
                Err(_) => break,
            }
        }
    }
}

pub struct Iter<'a> {
    cur: &'a List,
}

impl<'a> Iterator for Iter<'a> {
    type Item = &'a Word;

    fn next(&mut self) -> Option<Self::Item> {
        let cell = self.cur.0.as_deref()?;
        self.cur = &cell.next;
        Some(&cell.value)
    }
}

impl<'a> IntoIterator for &'a List {
    type Item = &'a Word;
    type IntoIter = Iter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl FromIterator<Word> for List {
    fn from_iter<I: IntoIterator<Item = Word>>(iter: I) -> Self {
        let items: Vec<Word> = iter.into_iter().collect();
        items
            .into_iter()
            .rev()
            .fold(List::new(), |tail, w| List::cons(w, tail))
    }
}

impl From<Vec<Word>> for List {
    fn from(items: Vec<Word>) -> Self {
        items.into_iter().collect()
    }
}

impl PartialEq for List {
    fn eq(&self, other: &Self) -> bool {
        self.iter().eq(other.iter())
    }
}

impl fmt::Debug for List {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}

/// Accumulates words at either end before producing a [`List`].
#[derive(Debug, Default)]
pub struct ListBuilder {
    items: VecDeque<Word>,
}

impl ListBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, w: Word) {
        self.items.push_back(w);
    }

    pub fn push_front(&mut self, w: Word) {
        self.items.push_front(w);
    }

    pub fn extend(&mut self, list: &List) {
        self.items.extend(list.iter().cloned());
    }

    pub fn extend_front(&mut self, list: &List) {
        for w in list.to_vec().into_iter().rev() {
            self.items.push_front(w);
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn build(self) -> List {
        self.items
            .into_iter()
            .rev()
            .fold(List::new(), |tail, w| List::cons(w, tail))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn syms(items: &[&str]) -> List {
        items.iter().map(|s| Word::from(*s)).collect()
    }

    #[test]
    fn test_ser() {
        assert_eq!(List::new().ser(), "{}");
        assert_eq!(syms(&["a", "b", "c"]).ser(), "{a b c}");
        assert_eq!(syms(&["a b", ""]).ser(), "{\"a b\" \"\"}");
        let nested: List = vec![Word::List(syms(&["x"])), Word::from("y")].into();
        assert_eq!(nested.ser(), "{\\{x\\} y}");
    }

    #[test]
    fn test_unserialize() {
        let l = List::unserialize(b"{a \"b c\" d}", true).expect("list");
        assert!(l.equals(&syms(&["a", "b c", "d"])));
        let l = List::unserialize(b"a b", false).expect("list");
        assert_eq!(l.len(), 2);
        assert!(List::unserialize(b"{}", true).expect("list").is_empty());
        assert!(List::unserialize(b"{a b", true).is_none());
        assert!(List::unserialize(b"a}", false).is_none());
    }

    #[test]
    fn test_map_or_apply() {
        let one = syms(&["a"]);
        let r: Result<Word, ()> = one.map_or_apply(|w| Ok(Word::from(format!("{}!", w.ser()))));
        assert_eq!(r.expect("apply").ser(), "a!");
        let many = syms(&["a", "b"]);
        let r: Result<Word, ()> = many.map_or_apply(|w| Ok(w.clone()));
        assert_eq!(r.expect("map").ser(), "{a b}");
        let r: Result<Word, ()> = List::new().map_or_apply(|w| Ok(w.clone()));
        assert!(r.expect("null").is_null());
    }

    #[test]
    fn test_builder() {
        let mut b = ListBuilder::new();
        b.push(Word::from("b"));
        b.push_front(Word::from("a"));
        b.extend(&syms(&["c", "d"]));
        b.extend_front(&syms(&["x", "y"]));
        assert_eq!(b.build().ser(), "{x y a b c d}");
    }

    #[test]
    fn test_long_list_drops() {
        let l: List = (0..200_000).map(|i| Word::from(i as i64)).collect();
        assert_eq!(l.len(), 200_000);
        drop(l);
    }

    #[test]
    fn test_tail_shares_cells() {
        let l = syms(&["a", "b"]);
        let t = l.tail();
        assert_eq!(t.head(), Some(&Word::from("b")));
        assert_eq!(List::cons(Word::from("z"), t).ser(), "{z b}");
    }
}
