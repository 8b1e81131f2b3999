//! Property-based test generators using proptest.
//!
//! Provides strategies for generating journal inputs that respect the
//! journal's rules: non-decreasing ASQNs, bounded payloads and operation
//! sequences a single writer could issue.

use proptest::prelude::*;
use seglog_core::ASQN_IGNORE;

/// Strategy for record payloads (arbitrary bytes, possibly empty).
pub fn payload_strategy(max_len: usize) -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..=max_len)
}

/// Strategy for `len` ASQNs that never decrease, with some left unset.
pub fn asqn_sequence_strategy(len: usize) -> impl Strategy<Value = Vec<i64>> {
    prop::collection::vec((any::<bool>(), 0i64..5), len).prop_map(|steps| {
        let mut current = 0i64;
        steps
            .into_iter()
            .map(|(set, step)| {
                current += step;
                if set {
                    current
                } else {
                    ASQN_IGNORE
                }
            })
            .collect()
    })
}

/// A single writer operation on a journal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JournalOp {
    /// Append a record with this payload.
    Append(Vec<u8>),
    /// Flush appended records.
    Flush,
    /// Truncate to `last_index - back`.
    TruncateBack(u64),
    /// Compact up to `first_index + ahead`.
    CompactAhead(u64),
}

/// Strategy for a sequence of writer operations, mostly appends.
pub fn journal_ops_strategy(max_ops: usize, max_payload: usize) -> impl Strategy<Value = Vec<JournalOp>> {
    let op = prop_oneof![
        8 => payload_strategy(max_payload).prop_map(JournalOp::Append),
        2 => Just(JournalOp::Flush),
        1 => (0u64..6).prop_map(JournalOp::TruncateBack),
        1 => (0u64..12).prop_map(JournalOp::CompactAhead),
    ];
    prop::collection::vec(op, 0..max_ops)
}
