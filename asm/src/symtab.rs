use std::collections::hash_map::Iter;

use fxhash::FxHashMap;

use crate::assembler::SourceLoc;

/// Resolved symbol values for one assembly pass.
///
/// The evaluator only ever reads from it; the line driver adds bindings as
/// labels and constants are defined.
#[derive(Default, Debug)]
pub struct Symtab {
    inner: FxHashMap<String, i32>,
    hits: FxHashMap<String, SourceLoc>,
}

impl Symtab {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn insert<K: Into<String>>(&mut self, key: K, value: i32) -> Option<i32> {
        self.inner.insert(key.into(), value)
    }

    /// Remembers the first place `key` was referenced.
    #[inline]
    pub fn touch(&mut self, key: &str, loc: SourceLoc) {
        if !self.hits.contains_key(key) {
            self.hits.insert(key.to_string(), loc);
        }
    }

    #[inline]
    pub fn first_reference(&self, key: &str) -> Option<&SourceLoc> {
        self.hits.get(key)
    }

    #[inline]
    pub fn get(&self, key: &str) -> Option<i32> {
        self.inner.get(key).copied()
    }

    #[inline]
    pub fn contains(&self, key: &str) -> bool {
        self.inner.contains_key(key)
    }

    #[inline]
    pub fn references(&self) -> SymtabRefIter<'_> {
        SymtabRefIter {
            inner: self.hits.iter(),
        }
    }
}

impl<'a> IntoIterator for &'a Symtab {
    type IntoIter = SymtabIter<'a>;
    type Item = (&'a str, i32);

    fn into_iter(self) -> Self::IntoIter {
        SymtabIter {
            inner: self.inner.iter(),
        }
    }
}

pub struct SymtabIter<'a> {
    inner: Iter<'a, String, i32>,
}

impl<'a> Iterator for SymtabIter<'a> {
    type Item = (&'a str, i32);

    #[inline]
    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().map(|(key, value)| (key.as_str(), *value))
    }
}

pub struct SymtabRefIter<'a> {
    inner: Iter<'a, String, SourceLoc>,
}

impl<'a> Iterator for SymtabRefIter<'a> {
    type Item = (&'a str, &'a SourceLoc);

    #[inline]
    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().map(|(key, loc)| (key.as_str(), loc))
    }
}
