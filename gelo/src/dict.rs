use std::{
    collections::BTreeMap,
    fmt,
    sync::{Arc, OnceLock},
};

use crate::{
    escape::{escape_item, slurp_ws, unescape_item},
    symbol::Symbol,
    word::Word,
};

/// A map from byte-string keys to words.
///
/// Storage is copy-on-write: cloning is cheap and the first mutation of a
/// shared dict detaches it. Keys iterate in byte order so the serialization
/// is deterministic; it is cached until the next mutation.
#[derive(Clone, Default)]
pub struct Dict {
    rep: Arc<BTreeMap<Vec<u8>, Word>>,
    ser: OnceLock<Symbol>,
}

impl Dict {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.rep.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rep.is_empty()
    }

    pub fn get(&self, key: &[u8]) -> Option<&Word> {
        self.rep.get(key)
    }

    pub fn has(&self, key: &[u8]) -> bool {
        self.rep.contains_key(key)
    }

    pub fn set(&mut self, key: &[u8], value: Word) {
        self.ser = OnceLock::new();
        Arc::make_mut(&mut self.rep).insert(key.to_vec(), value);
    }

    pub fn remove(&mut self, key: &[u8]) -> Option<Word> {
        if !self.has(key) {
            return None;
        }
        self.ser = OnceLock::new();
        Arc::make_mut(&mut self.rep).remove(key)
    }

    /// Copy every entry of `other` into this dict, overwriting.
    pub fn extend(&mut self, other: &Dict) {
        if other.is_empty() {
            return;
        }
        self.ser = OnceLock::new();
        let rep = Arc::make_mut(&mut self.rep);
        for (k, v) in other.iter() {
            rep.insert(k.to_vec(), v.clone());
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&[u8], &Word)> {
        self.rep.iter().map(|(k, v)| (k.as_slice(), v))
    }

    pub fn keys(&self) -> impl Iterator<Item = &[u8]> {
        self.rep.keys().map(Vec::as_slice)
    }

    pub fn ser(&self) -> Symbol {
        self.ser
            .get_or_init(|| {
                let mut out = vec![b'{'];
                for (k, v) in self.iter() {
                    out.push(b'{');
                    out.extend_from_slice(&escape_item(k));
                    out.push(b' ');
                    out.extend_from_slice(&escape_item(v.ser().as_bytes()));
                    out.push(b'}');
                }
                out.push(b'}');
                Symbol::new(out)
            })
            .clone()
    }

    pub fn copy(&self) -> Dict {
        self.clone()
    }

    pub fn deep_copy(&self) -> Dict {
        let rep = self
            .rep
            .iter()
            .map(|(k, v)| (k.clone(), v.deep_copy()))
            .collect();
        Dict {
            rep: Arc::new(rep),
            ser: OnceLock::new(),
        }
    }

    pub fn equals(&self, other: &Dict) -> bool {
        self.len() == other.len()
            && self
                .iter()
                .all(|(k, v)| other.get(k).is_some_and(|o| v.equals(o)))
    }

    /// Owned copy of the entries with lossily decoded keys.
    pub fn to_map(&self) -> BTreeMap<String, Word> {
        self.iter()
            .map(|(k, v)| (String::from_utf8_lossy(k).into_owned(), v.clone()))
            .collect()
    }

    /// Read a serialized dict back; values come back as symbols.
    ///
    /// With `enclosed` the entries must be wrapped in an outer `{}`.
    pub fn unserialize(ser: &[u8], enclosed: bool) -> Option<Dict> {
        let mut pos = slurp_ws(ser, 0);
        if enclosed {
            if ser.get(pos) != Some(&b'{') {
                return None;
            }
            pos = slurp_ws(ser, pos + 1);
        }
        let mut dict = Dict::new();
        loop {
            match ser.get(pos) {
                None if enclosed => return None,
                None => break,
                Some(b'}') if enclosed => {
                    pos = slurp_ws(ser, pos + 1);
                    break;
                }
                Some(b'{') => {
                    let (key, next) = unescape_item(ser, slurp_ws(ser, pos + 1))?;
                    let (value, next) = unescape_item(ser, slurp_ws(ser, next))?;
                    pos = slurp_ws(ser, next);
                    if ser.get(pos) != Some(&b'}') {
                        return None;
                    }
                    dict.set(&key, Word::Symbol(Symbol::new(value)));
                    pos = slurp_ws(ser, pos + 1);
                }
                Some(_) => return None,
            }
        }
        (pos == ser.len()).then_some(dict)
    }
}

impl PartialEq for Dict {
    fn eq(&self, other: &Self) -> bool {
        self.rep == other.rep
    }
}

impl fmt::Debug for Dict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.iter().map(|(k, v)| (String::from_utf8_lossy(k), v)))
            .finish()
    }
}

impl From<BTreeMap<String, Word>> for Dict {
    fn from(map: BTreeMap<String, Word>) -> Self {
        let rep = map.into_iter().map(|(k, v)| (k.into_bytes(), v)).collect();
        Dict {
            rep: Arc::new(rep),
            ser: OnceLock::new(),
        }
    }
}

impl FromIterator<(Vec<u8>, Word)> for Dict {
    fn from_iter<I: IntoIterator<Item = (Vec<u8>, Word)>>(iter: I) -> Self {
        Dict {
            rep: Arc::new(iter.into_iter().collect()),
            ser: OnceLock::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ser_is_sorted_and_cached() {
        let mut d = Dict::new();
        d.set(b"b", Word::from("two words"));
        d.set(b"a", Word::from(1i64));
        assert_eq!(d.ser(), "{{a 1}{b \"two words\"}}");
        d.remove(b"b");
        assert_eq!(d.ser(), "{{a 1}}");
        assert_eq!(Dict::new().ser(), "{}");
    }

    #[test]
    fn test_copy_on_write() {
        let mut a = Dict::new();
        a.set(b"x", Word::from("1"));
        let mut b = a.copy();
        b.set(b"x", Word::from("2"));
        assert_eq!(a.get(b"x"), Some(&Word::from("1")));
        assert_eq!(b.get(b"x"), Some(&Word::from("2")));
    }

    #[test]
    fn test_unserialize() {
        let d = Dict::unserialize(b"{{a 1} {b \"c d\"}}", true).expect("dict");
        assert_eq!(d.len(), 2);
        assert_eq!(d.get(b"b"), Some(&Word::from("c d")));
        let d = Dict::unserialize(b"{k v}", false).expect("dict");
        assert_eq!(d.get(b"k"), Some(&Word::from("v")));
        assert!(Dict::unserialize(b"", false).expect("dict").is_empty());
        assert!(Dict::unserialize(b"{}", true).expect("dict").is_empty());
        assert!(Dict::unserialize(b"{{a 1}", true).is_none());
        assert!(Dict::unserialize(b"{a 1", false).is_none());
    }

    #[test]
    fn test_numeric_spellings_are_distinct_keys() {
        let mut d = Dict::new();
        let one = Word::Number(crate::Number::parse(b"1").expect("number"));
        let one_point = Word::Number(crate::Number::parse(b"1.0").expect("number"));
        d.set(one.ser().as_bytes(), Word::from("int"));
        d.set(one_point.ser().as_bytes(), Word::from("float"));
        assert_eq!(d.len(), 2);
        assert!(one.equals(&one_point));
    }
}
