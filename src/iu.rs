//! Information units: typed column references in a query plan.
//!
//! An [`Iu`] is a named, typed handle introduced by exactly one operator
//! (scans introduce table columns, map its derived column, aggregation its
//! result columns). Everything downstream refers to the same handle, so
//! equality, hashing and ordering all use identity rather than the name.
//! [`IuSet`] keeps its members sorted by identity, which makes iteration
//! order stable across equal sets; packed-tuple layouts and key orderings
//! computed in different pipelines therefore agree.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::ops::{BitAnd, BitOr, Sub};
use std::sync::Arc;

use crate::types::TypeKind;

struct IuInner {
    name: String,
    ty: TypeKind,
}

/// A typed column reference with identity semantics.
#[derive(Clone)]
pub struct Iu(Arc<IuInner>);

impl Iu {
    pub fn new(name: impl Into<String>, ty: TypeKind) -> Iu {
        Iu(Arc::new(IuInner {
            name: name.into(),
            ty,
        }))
    }

    pub fn name(&self) -> &str {
        &self.0.name
    }

    pub fn ty(&self) -> TypeKind {
        self.0.ty
    }

    /// Identity key; stable for the lifetime of the plan.
    pub(crate) fn ident(&self) -> usize {
        Arc::as_ptr(&self.0) as usize
    }
}

impl PartialEq for Iu {
    fn eq(&self, other: &Iu) -> bool {
        self.ident() == other.ident()
    }
}

impl Eq for Iu {}

impl Hash for Iu {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.ident().hash(state);
    }
}

impl PartialOrd for Iu {
    fn partial_cmp(&self, other: &Iu) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Iu {
    fn cmp(&self, other: &Iu) -> std::cmp::Ordering {
        self.ident().cmp(&other.ident())
    }
}

impl fmt::Debug for Iu {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{:?}", self.0.name, self.0.ty)
    }
}

/// An ordered set of IUs, sorted by identity. No duplicates.
#[derive(Clone, Debug, Default)]
pub struct IuSet {
    v: Vec<Iu>,
}

impl IuSet {
    pub fn new() -> IuSet {
        IuSet::default()
    }

    /// Build a set from arbitrary handles; duplicates collapse.
    pub fn from_slice(ius: &[Iu]) -> IuSet {
        let mut v = ius.to_vec();
        v.sort();
        v.dedup();
        IuSet { v }
    }

    pub fn add(&mut self, iu: Iu) {
        match self.v.binary_search(&iu) {
            Ok(_) => {}
            Err(pos) => self.v.insert(pos, iu),
        }
    }

    pub fn contains(&self, iu: &Iu) -> bool {
        self.v.binary_search(iu).is_ok()
    }

    pub fn len(&self) -> usize {
        self.v.len()
    }

    pub fn is_empty(&self) -> bool {
        self.v.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Iu> {
        self.v.iter()
    }

    pub fn as_slice(&self) -> &[Iu] {
        &self.v
    }
}

impl<'a> IntoIterator for &'a IuSet {
    type Item = &'a Iu;
    type IntoIter = std::slice::Iter<'a, Iu>;

    fn into_iter(self) -> Self::IntoIter {
        self.v.iter()
    }
}

impl PartialEq for IuSet {
    fn eq(&self, other: &IuSet) -> bool {
        self.v == other.v
    }
}

impl Eq for IuSet {}

impl BitOr for &IuSet {
    type Output = IuSet;

    fn bitor(self, rhs: &IuSet) -> IuSet {
        let mut v = Vec::with_capacity(self.v.len() + rhs.v.len());
        v.extend_from_slice(&self.v);
        v.extend_from_slice(&rhs.v);
        v.sort();
        v.dedup();
        IuSet { v }
    }
}

impl BitAnd for &IuSet {
    type Output = IuSet;

    fn bitand(self, rhs: &IuSet) -> IuSet {
        IuSet {
            v: self.v.iter().filter(|iu| rhs.contains(iu)).cloned().collect(),
        }
    }
}

impl Sub for &IuSet {
    type Output = IuSet;

    fn sub(self, rhs: &IuSet) -> IuSet {
        IuSet {
            v: self
                .v
                .iter()
                .filter(|iu| !rhs.contains(iu))
                .cloned()
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_not_name_equality() {
        let a = Iu::new("x", TypeKind::Int32);
        let b = Iu::new("x", TypeKind::Int32);
        assert_ne!(a, b);
        assert_eq!(a, a.clone());
    }

    #[test]
    fn set_algebra() {
        let a = Iu::new("a", TypeKind::Int32);
        let b = Iu::new("b", TypeKind::Double);
        let c = Iu::new("c", TypeKind::Int64);
        let ab = IuSet::from_slice(&[a.clone(), b.clone()]);
        let bc = IuSet::from_slice(&[b.clone(), c.clone()]);

        let union = &ab | &bc;
        assert_eq!(union.len(), 3);
        let inter = &ab & &bc;
        assert_eq!(inter.len(), 1);
        assert!(inter.contains(&b));
        let diff = &ab - &bc;
        assert_eq!(diff.len(), 1);
        assert!(diff.contains(&a));
    }

    #[test]
    fn iteration_order_stable_across_equal_sets() {
        let a = Iu::new("a", TypeKind::Int32);
        let b = Iu::new("b", TypeKind::Double);
        let s1 = IuSet::from_slice(&[a.clone(), b.clone()]);
        let s2 = IuSet::from_slice(&[b, a]);
        assert_eq!(s1, s2);
        let o1: Vec<_> = s1.iter().map(Iu::ident).collect();
        let o2: Vec<_> = s2.iter().map(Iu::ident).collect();
        assert_eq!(o1, o2);
    }
}
