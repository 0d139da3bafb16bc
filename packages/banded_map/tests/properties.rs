//! Properties that must hold for arbitrary sequences of map operations.

use std::collections::HashMap;
use std::num::NonZero;

use banded_map::BandedMap;
use proptest::prelude::*;

#[derive(Clone, Debug)]
enum Op {
    AddOrUpdate(u16, u32),
    Remove(u16),
}

fn arb_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => (any::<u16>(), any::<u32>()).prop_map(|(k, v)| Op::AddOrUpdate(k, v)),
        1 => any::<u16>().prop_map(Op::Remove),
    ]
}

proptest! {
    #[test]
    fn behaves_like_std_map(
        initial_capacity in 1_usize..16,
        ops in prop::collection::vec(arb_op(), 0..300),
    ) {
        let mut map = BandedMap::new(NonZero::new(initial_capacity).unwrap());
        let mut expected = HashMap::new();

        for op in ops {
            match op {
                Op::AddOrUpdate(key, value) => {
                    prop_assert_eq!(map.add_or_update(key, value), expected.insert(key, value));
                }
                Op::Remove(key) => {
                    prop_assert_eq!(map.remove(&key), expected.remove(&key));
                }
            }
        }

        prop_assert_eq!(map.len(), expected.len());
        prop_assert_eq!(map.capacity() % initial_capacity, 0);

        for (key, value) in &expected {
            prop_assert!(map.contains_key(key));
            prop_assert_eq!(map[key], *value);
        }

        let mut listed = map.iter().map(|(&k, &v)| (k, v)).collect::<Vec<_>>();
        listed.sort_unstable();

        let mut wanted = expected.into_iter().collect::<Vec<_>>();
        wanted.sort_unstable();

        prop_assert_eq!(listed, wanted);
    }

    #[test]
    fn growth_never_loses_keys(
        initial_capacity in 1_usize..32,
        seed in any::<u64>(),
    ) {
        let mut map = BandedMap::new(NonZero::new(initial_capacity).unwrap());

        // One more key than fits in the initial generation forces at least one growth.
        let keys = (0..=u64::try_from(initial_capacity).unwrap())
            .map(|i| seed.wrapping_add(i.wrapping_mul(0x1000_0000_01B3)))
            .collect::<Vec<_>>();

        for (i, &key) in keys.iter().enumerate() {
            map.add(key, i);

            for (j, earlier) in keys.iter().take(i + 1).enumerate() {
                prop_assert_eq!(map.get(earlier), Some(&j));
            }
        }

        prop_assert!(map.generations() >= 2);
    }
}
