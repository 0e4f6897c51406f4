use proptest::prelude::*;
use replset_admin::{OpTime, Timestamp};

fn optime() -> impl Strategy<Value = OpTime> {
    (0u32..1000, 0u32..10, -1i64..5)
        .prop_map(|(secs, inc, term)| OpTime::new(Timestamp::new(secs, inc), term))
}

proptest! {
    #[test]
    fn ordering_is_total_and_antisymmetric(a in optime(), b in optime()) {
        let forward = a.cmp(&b);
        prop_assert_eq!(forward, b.cmp(&a).reverse());
        prop_assert_eq!(forward == std::cmp::Ordering::Equal, a == b);
    }

    #[test]
    fn ordering_is_transitive(a in optime(), b in optime(), c in optime()) {
        if a <= b && b <= c {
            prop_assert!(a <= c);
        }
    }

    #[test]
    fn higher_term_always_wins(a in optime(), b in optime()) {
        prop_assume!(a.term != b.term);
        prop_assert_eq!(a < b, a.term < b.term);
    }
}
