//! Field layout.
//!
//! Fields are placed references first, then by decreasing primitive size,
//! each group in field index order. Alignment padding is remembered as gaps
//! and handed to later, narrower fields before the end of the object grows.
use crate::{
    linker::ClassLinker,
    types::{
        class::{CLASS_HEADER_SIZE, CLASS_WALK_SUPER, MAX_BITMAP_REFERENCES, OBJECT_HEADER_SIZE},
        descriptor::REFERENCE_SIZE,
        Class, Field,
    },
    utils::{align_up, is_aligned, sync::Arc},
    value::Value,
};
use std::{cmp::Ordering, collections::BinaryHeap, collections::VecDeque};
use tracing::trace;

/// A hole left by alignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FieldGap {
    start_offset: u32,
    size: u32,
}

impl Ord for FieldGap {
    /// Largest gap first; among equal sizes the lowest offset.
    fn cmp(&self, other: &Self) -> Ordering {
        self.size
            .cmp(&other.size)
            .then_with(|| other.start_offset.cmp(&self.start_offset))
    }
}

impl PartialOrd for FieldGap {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

type FieldGaps = BinaryHeap<FieldGap>;

/// Splits `[gap_start, gap_end)` into naturally aligned pieces.
fn add_field_gap(gap_start: u32, gap_end: u32, gaps: &mut FieldGaps) {
    let mut current = gap_start;
    while current != gap_end {
        let remaining = gap_end - current;
        let size = if remaining >= 4 && is_aligned(current, 4) {
            4
        } else if remaining >= 2 && is_aligned(current, 2) {
            2
        } else {
            1
        };
        gaps.push(FieldGap {
            start_offset: current,
            size,
        });
        current += size;
    }
}

/// Places every leading field of at least `n` bytes, preferring gaps.
fn shuffle_forward(
    n: u32,
    offset: &mut u32,
    fields: &mut VecDeque<Arc<Field>>,
    gaps: &mut FieldGaps,
) {
    while let Some(field) = fields.front() {
        if field.size() < n {
            break;
        }
        if !is_aligned(*offset, n) {
            let old = *offset;
            *offset = align_up(*offset, n);
            add_field_gap(old, *offset, gaps);
        }
        let Some(field) = fields.pop_front() else {
            break;
        };
        match gaps.peek().copied() {
            Some(gap) if gap.size >= n => {
                gaps.pop();
                field.set_offset(gap.start_offset);
                if gap.size > n {
                    add_field_gap(gap.start_offset + n, gap.start_offset + gap.size, gaps);
                }
            }
            _ => {
                field.set_offset(*offset);
                *offset += n;
            }
        }
        trace!(field = field.name(), offset = field.offset(), "field placed");
    }
}

/// Assigns offsets to `fields` starting at `start`. Returns the end offset
/// and the number of reference fields.
pub(crate) fn layout_fields(fields: &[Arc<Field>], start: u32) -> (u32, u32) {
    let mut sorted: Vec<Arc<Field>> = fields.to_vec();
    sorted.sort_by(|a, b| {
        b.is_reference()
            .cmp(&a.is_reference())
            .then_with(|| b.size().cmp(&a.size()))
            .then_with(|| a.field_idx().cmp(&b.field_idx()))
    });
    let mut queue: VecDeque<Arc<Field>> = sorted.into();
    let mut gaps = FieldGaps::new();
    let mut offset = start;

    let mut num_references = 0;
    while queue.front().is_some_and(|f| f.is_reference()) {
        if !is_aligned(offset, REFERENCE_SIZE) {
            let old = offset;
            offset = align_up(offset, REFERENCE_SIZE);
            add_field_gap(old, offset, &mut gaps);
        }
        let Some(field) = queue.pop_front() else {
            break;
        };
        field.set_offset(offset);
        trace!(field = field.name(), offset, "reference field placed");
        offset += REFERENCE_SIZE;
        num_references += 1;
    }

    for n in [8, 4, 2, 1] {
        shuffle_forward(n, &mut offset, &mut queue, &mut gaps);
    }
    debug_assert!(queue.is_empty(), "unplaced fields remain");
    (offset, num_references)
}

impl ClassLinker {
    pub(crate) fn link_instance_fields(&self, class: &Class) {
        let start = class
            .super_class()
            .map(|s| s.object_size())
            .unwrap_or(OBJECT_HEADER_SIZE);
        let mut linkage = class.linkage_mut();
        let (size, references) = layout_fields(&linkage.instance_fields, start);
        linkage.object_size = size;
        linkage.num_reference_instance_fields = references;
    }

    /// Lays out the statics after the type object's header and allocates
    /// their storage, zeroed.
    pub(crate) fn link_static_fields(&self, class: &Class) {
        let zeroes = {
            let mut linkage = class.linkage_mut();
            let (size, references) = layout_fields(&linkage.static_fields, CLASS_HEADER_SIZE);
            linkage.class_size = size;
            linkage.num_reference_static_fields = references;
            linkage
                .static_fields
                .iter()
                .map(|f| Value::zero_for(f.type_descriptor()))
                .collect()
        };
        class.allocate_statics(zeroes);
    }

    /// Summarizes reference field positions as one bit per reference slot
    /// after the header, inherited from the super type.
    pub(crate) fn create_reference_instance_offsets(&self, class: &Class) {
        let Some(super_class) = class.super_class() else {
            class.linkage_mut().reference_instance_offsets = 0;
            return;
        };
        let mut offsets = super_class.reference_instance_offsets();
        let mut linkage = class.linkage_mut();
        let count = linkage.num_reference_instance_fields;
        if offsets != CLASS_WALK_SUPER && count != 0 {
            let start = align_up(super_class.object_size(), REFERENCE_SIZE);
            let start_bit = (start - OBJECT_HEADER_SIZE) / REFERENCE_SIZE;
            if start_bit + count > MAX_BITMAP_REFERENCES {
                offsets = CLASS_WALK_SUPER;
            } else {
                let end_bit = start_bit + count;
                offsets |= (u32::MAX << start_bit) & (u32::MAX >> (32 - end_bit));
            }
        }
        linkage.reference_instance_offsets = offsets;
    }
}
