// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

#![cfg(test)]
//! CONTEXT: Property-based tests for per-hart stack carving
//! OWNERS: @kernel-arch-team
//! NOTE: Tests only; no kernel logic.
//!
//! TEST_SCOPE:
//!   - Boot stacks of distinct harts are disjoint and stay inside the region
//!   - Every carved stack top keeps 16-byte alignment
//!
//! TEST_SCENARIOS:
//!   - boot_stacks_disjoint(): any two harts in a valid layout never overlap
//!   - stack_tops_aligned(): aligned region top yields aligned per-hart tops

use super::{boot_stack_range, HartId, StackLayout, HART_STACK_SIZE, MAX_HARTS, STACK_ALIGN};
use proptest::prelude::*;

fn arb_top() -> impl Strategy<Value = usize> {
    (0x8000_0000usize..0x9000_0000usize).prop_map(|top| top & !(STACK_ALIGN - 1))
}

proptest! {
    #[test]
    fn boot_stacks_disjoint(top in arb_top(), harts in 1usize..=MAX_HARTS, a in 0usize..MAX_HARTS, b in 0usize..MAX_HARTS) {
        let layout = StackLayout::new(top - harts * HART_STACK_SIZE, top, harts).expect("layout");
        let (Some(ha), Some(hb)) = (HartId::new(a), HartId::new(b)) else { unreachable!() };
        match (layout.stack(ha), layout.stack(hb)) {
            (Some(ra), Some(rb)) => {
                prop_assert!(ra.start >= layout.bottom() && ra.end <= layout.top());
                if a != b {
                    prop_assert!(ra.end <= rb.start || rb.end <= ra.start);
                } else {
                    prop_assert_eq!(ra, rb);
                }
            }
            (sa, sb) => {
                prop_assert_eq!(sa.is_none(), a >= harts);
                prop_assert_eq!(sb.is_none(), b >= harts);
            }
        }
    }

    #[test]
    fn stack_tops_aligned(top in arb_top(), raw in 0usize..MAX_HARTS) {
        let hart = HartId::new(raw).expect("hart");
        let range = boot_stack_range(top, hart);
        prop_assert_eq!(range.end % STACK_ALIGN, 0);
        prop_assert_eq!(range.end - range.start, HART_STACK_SIZE);
    }
}
