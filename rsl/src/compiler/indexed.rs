//! Containers with strongly-typed indexes, used by the compiler's arenas
use std::marker::PhantomData;

/// A `Vec` that may only be indexed by `Index`
///
/// `Index` is a wrapper around a `usize` (see [`define_index!`]); handing out
/// typed indexes keeps node ids and symbol ids from being mixed up.
#[derive(Clone, Debug)]
pub struct IndexVec<Value, Index> {
    data: Vec<Value>,
    _phantom: PhantomData<fn() -> Index>,
}

impl<Value, Index> Default for IndexVec<Value, Index> {
    fn default() -> Self {
        Self {
            data: vec![],
            _phantom: PhantomData,
        }
    }
}

impl<Value, Index> IndexVec<Value, Index>
where
    Index: Copy + From<usize>,
    usize: From<Index>,
{
    pub fn len(&self) -> usize {
        self.data.len()
    }
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
    /// Appends a value, returning its index
    pub fn push(&mut self, v: Value) -> Index {
        let out = Index::from(self.data.len());
        self.data.push(v);
        out
    }
    pub fn get(&self, i: Index) -> Option<&Value> {
        self.data.get(usize::from(i))
    }
    pub fn iter(&self) -> impl Iterator<Item = (Index, &Value)> {
        self.data.iter().enumerate().map(|(i, v)| (Index::from(i), v))
    }
    pub fn values(&self) -> impl Iterator<Item = &Value> {
        self.data.iter()
    }
}

impl<Value, Index> std::ops::Index<Index> for IndexVec<Value, Index>
where
    usize: From<Index>,
{
    type Output = Value;
    fn index(&self, i: Index) -> &Value {
        &self.data[usize::from(i)]
    }
}

impl<Value, Index> std::ops::IndexMut<Index> for IndexVec<Value, Index>
where
    usize: From<Index>,
{
    fn index_mut(&mut self, i: Index) -> &mut Value {
        &mut self.data[usize::from(i)]
    }
}

impl<Value, Index> From<Vec<Value>> for IndexVec<Value, Index> {
    fn from(data: Vec<Value>) -> Self {
        Self {
            data,
            _phantom: PhantomData,
        }
    }
}

////////////////////////////////////////////////////////////////////////////////

macro_rules! define_index {
    ($name:ident, $doc:literal) => {
        #[doc = $doc]
        #[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
        pub struct $name(usize);
        impl From<usize> for $name {
            fn from(v: usize) -> Self {
                Self(v)
            }
        }
        impl From<$name> for usize {
            fn from(v: $name) -> Self {
                v.0
            }
        }
    };
}
pub(crate) use define_index;

#[cfg(test)]
mod test {
    use super::*;

    define_index!(Id, "Test index");

    #[test]
    fn test_push_and_index() {
        let mut v: IndexVec<&str, Id> = IndexVec::default();
        let a = v.push("a");
        let b = v.push("b");
        assert_eq!(v[a], "a");
        assert_eq!(v[b], "b");
        assert_eq!(v.len(), 2);
        v[a] = "c";
        let all: Vec<_> = v.iter().map(|(i, s)| (usize::from(i), *s)).collect();
        assert_eq!(all, vec![(0, "c"), (1, "b")]);
    }
}
