//! Packed tuple layouts.
//!
//! A layout assigns a byte offset to every IU of a set. Fields are placed
//! in decreasing alignment order to minimize padding, and the total size is
//! rounded up to the largest field alignment. Because [`crate::iu::IuSet`]
//! iterates in a stable order, two pipelines computing the layout of the
//! same set always agree on every offset.

use std::collections::HashMap;

use crate::iu::{Iu, IuSet};

/// Immutable IU → byte offset mapping over a set.
#[derive(Debug, Clone)]
pub struct TupleLayout {
    offsets: HashMap<Iu, u32>,
    size: u32,
    align: u32,
}

impl TupleLayout {
    /// Compute the packed layout of `ius`.
    pub fn pack(ius: &IuSet) -> TupleLayout {
        let mut sorted: Vec<Iu> = ius.iter().cloned().collect();
        sorted.sort_by(|a, b| b.ty().alignment().cmp(&a.ty().alignment()));

        let mut offsets = HashMap::with_capacity(sorted.len());
        let mut offset = 0u32;
        let mut align = 1u32;
        for iu in &sorted {
            align = align.max(iu.ty().alignment());
            offsets.insert(iu.clone(), offset);
            offset += iu.ty().size();
        }
        TupleLayout {
            offsets,
            size: (offset + align - 1) & !(align - 1),
            align,
        }
    }

    /// Byte offset of `iu` within the packed tuple.
    pub fn offset(&self, iu: &Iu) -> u32 {
        self.offsets[iu]
    }

    /// Total packed size, a multiple of [`TupleLayout::alignment`].
    pub fn size(&self) -> u32 {
        self.size
    }

    pub fn alignment(&self) -> u32 {
        self.align
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TypeKind;
    use proptest::prelude::*;

    fn layout_of(kinds: &[TypeKind]) -> (Vec<Iu>, TupleLayout) {
        let ius: Vec<Iu> = kinds
            .iter()
            .enumerate()
            .map(|(i, &t)| Iu::new(format!("c{i}"), t))
            .collect();
        let layout = TupleLayout::pack(&IuSet::from_slice(&ius));
        (ius, layout)
    }

    #[test]
    fn descending_alignment_eliminates_padding() {
        let (ius, layout) = layout_of(&[
            TypeKind::Char,
            TypeKind::Double,
            TypeKind::Int32,
            TypeKind::Int64,
        ]);
        // 8 + 8 + 4 + 1 = 21, rounded to alignment 8
        assert_eq!(layout.size(), 24);
        for iu in &ius {
            assert_eq!(layout.offset(iu) % iu.ty().alignment(), 0);
        }
    }

    #[test]
    fn equal_sets_get_identical_layouts() {
        let a = Iu::new("a", TypeKind::Int32);
        let b = Iu::new("b", TypeKind::String);
        let l1 = TupleLayout::pack(&IuSet::from_slice(&[a.clone(), b.clone()]));
        let l2 = TupleLayout::pack(&IuSet::from_slice(&[b.clone(), a.clone()]));
        assert_eq!(l1.offset(&a), l2.offset(&a));
        assert_eq!(l1.offset(&b), l2.offset(&b));
        assert_eq!(l1.size(), l2.size());
    }

    proptest! {
        #[test]
        fn size_bounds_and_alignment(kinds in proptest::collection::vec(
            prop_oneof![
                Just(TypeKind::Int32), Just(TypeKind::Int64), Just(TypeKind::Char),
                Just(TypeKind::Bool), Just(TypeKind::Double), Just(TypeKind::Date),
                Just(TypeKind::String),
            ],
            1..12,
        )) {
            let (ius, layout) = layout_of(&kinds);
            let payload: u32 = ius.iter().map(|iu| iu.ty().size()).sum();
            prop_assert!(layout.size() >= payload);
            prop_assert_eq!(layout.size() % layout.alignment(), 0);

            // offsets are a bijection: fields never overlap
            let mut spans: Vec<(u32, u32)> = ius
                .iter()
                .map(|iu| (layout.offset(iu), layout.offset(iu) + iu.ty().size()))
                .collect();
            spans.sort();
            for w in spans.windows(2) {
                prop_assert!(w[0].1 <= w[1].0);
            }
        }
    }
}
