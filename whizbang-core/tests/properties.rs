//! Property tests for the invariants §8 calls out: partition hashing is
//! deterministic and bounded, `StatusFlags` claimability matches its two
//! terminal bits, and `FailureReason` round-trips through its wire code for
//! every possible byte, including the reserved gap.

use proptest::prelude::*;
use uuid::Uuid;
use whizbang_core::ids::StreamKey;
use whizbang_core::partition::compute_partition;
use whizbang_core::status::{FailureReason, StatusFlags};

fn stream_key() -> impl Strategy<Value = StreamKey> {
    any::<u128>().prop_map(|bits| StreamKey::from_external(Uuid::from_u128(bits)))
}

proptest! {
    #[test]
    fn partition_is_deterministic_and_in_range(stream_id in stream_key(), partition_count in 1u32..10_000) {
        let first = compute_partition(stream_id, partition_count);
        let second = compute_partition(stream_id, partition_count);
        prop_assert_eq!(first, second);
        prop_assert!(first < partition_count);
    }

    #[test]
    fn status_flags_are_claimable_iff_neither_terminal_bit_is_set(bits in any::<u16>()) {
        let flags = StatusFlags::from_bits(bits);
        let expected = !flags.contains(StatusFlags::TERMINAL_FAILURE) && !flags.contains(StatusFlags::COMPLETED);
        prop_assert_eq!(flags.is_claimable_status(), expected);
    }

    #[test]
    fn mark_completed_always_clears_catching_up(bits in any::<u16>()) {
        let mut flags = StatusFlags::from_bits(bits);
        flags.mark_completed();
        prop_assert!(flags.contains(StatusFlags::COMPLETED));
        prop_assert!(!flags.contains(StatusFlags::CATCHING_UP));
    }

    #[test]
    fn failure_reason_round_trips_every_byte(code in any::<u8>()) {
        let reason = FailureReason::from_code(code);
        prop_assert_eq!(reason.code(), code);
    }
}
