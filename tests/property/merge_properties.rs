//! Property-based tests for the k-way merge

use proptest::prelude::*;
use strata::merge::KMerge;

fn sorted_streams() -> impl Strategy<Value = Vec<Vec<String>>> {
    prop::collection::vec(
        prop::collection::vec("[a-d/]{0,6}", 0..12).prop_map(|mut v| {
            v.sort();
            v
        }),
        0..6,
    )
}

proptest! {
    /// Merging sorted streams yields every item, in order.
    #[test]
    fn merge_is_sorted_permutation(streams in sorted_streams()) {
        let mut expected: Vec<String> = streams.iter().flatten().cloned().collect();
        expected.sort();

        let merged: Vec<String> = KMerge::new(streams.into_iter().map(|s| s.into_iter())).collect();
        prop_assert_eq!(merged, expected);
    }

    /// The merge pulls lazily: taking a prefix never needs more than one
    /// head per source beyond what was emitted.
    #[test]
    fn merge_prefix_matches_full_merge(streams in sorted_streams(), n in 0usize..20) {
        let full: Vec<String> =
            KMerge::new(streams.clone().into_iter().map(|s| s.into_iter())).collect();
        let prefix: Vec<String> =
            KMerge::new(streams.into_iter().map(|s| s.into_iter())).take(n).collect();
        prop_assert_eq!(&prefix[..], &full[..n.min(full.len())]);
    }
}
