use std::borrow::Borrow;
use std::fmt;
use std::hash::{BuildHasher, Hash};
use std::iter::FusedIterator;
use std::num::NonZero;
use std::ops::Index;
use std::slice;

use foldhash::fast::FixedState;
use tracing::debug;

/// Mixed into every hash before it is reduced to a slot index, so that hashers which return
/// small values for small keys still spread over the whole slot range.
const MIX: u64 = 0x9E37_79B9_7F4A_7C15;

/// An open-addressed hash map that probes across successively larger modulus bands.
///
/// The slots of the map form a sequence of equally sized generations of `initial_capacity`
/// slots each. A key is probed at one slot per band: for band `b` the slot index is the mixed
/// hash of the key modulo `initial_capacity * b`, for `b` from 1 up to the number of
/// generations. The first band therefore only reaches the first generation, while the last band
/// reaches the whole map.
///
/// When no band offers an empty slot for a new key, the map doubles its number of generations.
/// The probe index of a band does not depend on the total capacity, so existing entries keep
/// their slots and remain reachable through the same bands as before. Growth appends empty
/// slots and never moves or rehashes entries.
///
/// Lookups visit every band rather than stopping at the first empty slot, so removal simply
/// empties the slot and needs no tombstones.
///
/// # Example
///
/// ```
/// use std::num::NonZero;
///
/// use banded_map::BandedMap;
///
/// let mut map = BandedMap::new(NonZero::new(8).unwrap());
///
/// map.add("north", 0);
/// map.add("east", 90);
/// map.add_or_update("north", 360);
///
/// assert_eq!(map["north"], 360);
/// assert_eq!(map.get("south"), None);
/// assert_eq!(map.remove("east"), Some(90));
/// assert_eq!(map.len(), 1);
/// ```
///
/// # Hashing
///
/// By default keys are hashed with a fixed-seed [`foldhash`] hasher, which makes slot placement
/// reproducible from run to run. Use [`with_hasher()`][Self::with_hasher] to supply another
/// [`BuildHasher`].
pub struct BandedMap<K, V, S = FixedState> {
    /// Always `initial_capacity * generations` long. `None` is an empty slot.
    slots: Vec<Option<(K, V)>>,

    initial_capacity: NonZero<usize>,

    len: usize,

    hasher: S,
}

impl<K, V> BandedMap<K, V, FixedState>
where
    K: Hash + Eq,
{
    /// Creates an empty map with a single generation of `initial_capacity` slots.
    #[must_use]
    pub fn new(initial_capacity: NonZero<usize>) -> Self {
        Self::with_hasher(initial_capacity, FixedState::default())
    }
}

impl<K, V, S> BandedMap<K, V, S>
where
    K: Hash + Eq,
    S: BuildHasher,
{
    /// Creates an empty map with a single generation of `initial_capacity` slots that hashes
    /// keys with `hasher`.
    ///
    /// The hasher decides whether inserts can always succeed. A key whose hash, after mixing,
    /// is below the current capacity reduces to the same slot in every band, so if that slot
    /// is taken there is no capacity at which the key fits and [`add()`][Self::add] panics.
    /// The default hasher spreads hashes over the full 64-bit range, which makes this
    /// practically unreachable. A custom hasher that produces small values does not.
    #[must_use]
    pub fn with_hasher(initial_capacity: NonZero<usize>, hasher: S) -> Self {
        let mut slots = Vec::with_capacity(initial_capacity.get());
        slots.resize_with(initial_capacity.get(), || None);

        Self {
            slots,
            initial_capacity,
            len: 0,
            hasher,
        }
    }

    /// The number of entries in the map.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the map has no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The number of slots in the map. Always a multiple of the initial capacity.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// The number of slots in one generation.
    #[must_use]
    pub fn initial_capacity(&self) -> NonZero<usize> {
        self.initial_capacity
    }

    /// The number of generations, which is also the number of bands every key is probed in.
    #[must_use]
    pub fn generations(&self) -> usize {
        self.slots
            .len()
            .checked_div(self.initial_capacity.get())
            .expect("initial capacity is never zero")
    }

    /// Finds the slot of the first band that is empty for `key`.
    ///
    /// Returns `None` if the slot is taken in every band, in which case adding a new key with
    /// the same hash requires the map to grow. Whether `key` is already present is not checked.
    #[must_use]
    pub fn try_find_empty_index_for<Q>(&self, key: &Q) -> Option<usize>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.probe(self.mixed_hash(key))
            .find(|&index| matches!(self.slots.get(index), Some(None)))
    }

    /// Finds the slot that holds `key`, if the key is present.
    #[must_use]
    pub fn try_find_index_for<Q>(&self, key: &Q) -> Option<usize>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.probe(self.mixed_hash(key)).find(|&index| {
            self.slots
                .get(index)
                .and_then(Option::as_ref)
                .is_some_and(|(existing, _)| existing.borrow() == key)
        })
    }

    /// Inserts a new entry, growing the map if no band has an empty slot for it.
    ///
    /// # Panics
    ///
    /// Panics if the key is already present. Use [`add_or_update()`][Self::add_or_update] to
    /// overwrite existing entries.
    ///
    /// Panics if the mixed hash of the key is below the current capacity and the one slot it
    /// reduces to is occupied, as no amount of growth can make room for it. See
    /// [`with_hasher()`][Self::with_hasher].
    pub fn add(&mut self, key: K, value: V) {
        assert!(
            self.try_find_index_for(&key).is_none(),
            "key is already present in the map"
        );

        self.insert_new(key, value);
    }

    /// Inserts an entry or replaces the value of an existing one.
    ///
    /// Returns the previous value if the key was already present.
    ///
    /// # Panics
    ///
    /// Panics under the same hash conditions as [`add()`][Self::add] when the key is new.
    pub fn add_or_update(&mut self, key: K, value: V) -> Option<V> {
        if let Some(index) = self.try_find_index_for(&key) {
            let (_, existing) = self
                .slots
                .get_mut(index)
                .and_then(Option::as_mut)
                .expect("try_find_index_for() only returns occupied slots");

            return Some(std::mem::replace(existing, value));
        }

        self.insert_new(key, value);
        None
    }

    /// Removes an entry, returning its value if the key was present.
    pub fn remove<Q>(&mut self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let index = self.try_find_index_for(key)?;

        let (_, value) = self
            .slots
            .get_mut(index)
            .and_then(Option::take)
            .expect("try_find_index_for() only returns occupied slots");

        self.len = self
            .len
            .checked_sub(1)
            .expect("an entry was just removed, so the map was not empty");

        Some(value)
    }

    /// Whether the map has an entry for `key`.
    #[must_use]
    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.try_find_index_for(key).is_some()
    }

    /// The value for `key`, if present.
    #[must_use]
    pub fn get<Q>(&self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let index = self.try_find_index_for(key)?;

        self.slots
            .get(index)
            .and_then(Option::as_ref)
            .map(|(_, value)| value)
    }

    /// The value for `key`, mutably, if present.
    #[must_use]
    pub fn get_mut<Q>(&mut self, key: &Q) -> Option<&mut V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let index = self.try_find_index_for(key)?;

        self.slots
            .get_mut(index)
            .and_then(Option::as_mut)
            .map(|(_, value)| value)
    }

    /// Removes all entries. The capacity is kept.
    pub fn clear(&mut self) {
        self.slots.fill_with(|| None);
        self.len = 0;
    }

    fn insert_new(&mut self, key: K, value: V) {
        let mixed = self.mixed_hash(&key);

        let index = loop {
            if let Some(index) = self
                .probe(mixed)
                .find(|&index| matches!(self.slots.get(index), Some(None)))
            {
                break index;
            }

            self.grow(mixed);
        };

        *self
            .slots
            .get_mut(index)
            .expect("probe() only returns indexes within the map") = Some((key, value));

        self.len = self
            .len
            .checked_add(1)
            .expect("map cannot hold more entries than fit in memory");
    }

    /// Doubles the number of generations. Existing entries stay where they are.
    fn grow(&mut self, mixed: u64) {
        let old_capacity = self.slots.len();

        // Bands added by growth have a modulus larger than the current capacity. A mixed hash
        // below the current capacity reduces to itself in all of them, so growing cannot
        // produce a new slot for it.
        assert!(
            u64::try_from(old_capacity).is_ok_and(|capacity| mixed >= capacity),
            "mixed hash {mixed} reduces to an occupied slot in every band, at any capacity"
        );

        let new_capacity = old_capacity
            .checked_mul(2)
            .expect("map capacity cannot exceed the size of the address space");

        self.slots.resize_with(new_capacity, || None);

        debug!(
            old_capacity,
            new_capacity,
            generations = self.generations(),
            len = self.len,
            "grew banded map"
        );
    }

    fn mixed_hash<Q>(&self, key: &Q) -> u64
    where
        Q: Hash + ?Sized,
    {
        self.hasher.hash_one(key) ^ MIX
    }

    /// The slot index of each band for a mixed hash, band 1 first.
    fn probe(&self, mixed: u64) -> impl Iterator<Item = usize> + use<K, V, S> {
        let initial_capacity = self.initial_capacity.get();

        (1..=self.generations()).map(move |band| {
            let modulus = initial_capacity
                .checked_mul(band)
                .expect("band modulus is at most the capacity of the map");

            let modulus =
                u64::try_from(modulus).expect("usize always fits in u64 on supported platforms");

            usize::try_from(
                mixed
                    .checked_rem(modulus)
                    .expect("band modulus is never zero"),
            )
            .expect("remainder is smaller than a usize modulus")
        })
    }
}

impl<K, V, S> BandedMap<K, V, S> {
    /// Iterates over all entries in slot order, which is unrelated to insertion order.
    pub fn iter(&self) -> Iter<'_, K, V> {
        Iter {
            slots: self.slots.iter(),
        }
    }
}

impl<K, V, S, Q> Index<&Q> for BandedMap<K, V, S>
where
    K: Hash + Eq + Borrow<Q>,
    Q: Hash + Eq + ?Sized,
    S: BuildHasher,
{
    type Output = V;

    /// # Panics
    ///
    /// Panics if the key is not present.
    fn index(&self, key: &Q) -> &Self::Output {
        self.get(key).expect("key not found in map")
    }
}

impl<K, V, S> Extend<(K, V)> for BandedMap<K, V, S>
where
    K: Hash + Eq,
    S: BuildHasher,
{
    fn extend<T: IntoIterator<Item = (K, V)>>(&mut self, iter: T) {
        for (key, value) in iter {
            self.add_or_update(key, value);
        }
    }
}

impl<'a, K, V, S> IntoIterator for &'a BandedMap<K, V, S> {
    type Item = (&'a K, &'a V);
    type IntoIter = Iter<'a, K, V>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl<K, V, S> fmt::Debug for BandedMap<K, V, S>
where
    K: fmt::Debug,
    V: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

/// Iterator over the entries of a [`BandedMap`], in slot order.
#[derive(Debug)]
pub struct Iter<'a, K, V> {
    slots: slice::Iter<'a, Option<(K, V)>>,
}

impl<'a, K, V> Iterator for Iter<'a, K, V> {
    type Item = (&'a K, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        self.slots
            .by_ref()
            .find_map(|slot| slot.as_ref().map(|(key, value)| (key, value)))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, self.slots.size_hint().1)
    }
}

impl<K, V> FusedIterator for Iter<'_, K, V> {}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::hash::Hasher;

    use static_assertions::assert_impl_all;

    use super::*;

    assert_impl_all!(BandedMap<u64, String>: Send, Sync, fmt::Debug);

    /// Hashes integers to their own value, which makes slot placement predictable.
    #[derive(Clone, Copy, Debug, Default)]
    struct IdentityState;

    #[derive(Default)]
    struct IdentityHasher(u64);

    impl Hasher for IdentityHasher {
        fn finish(&self) -> u64 {
            self.0
        }

        fn write(&mut self, bytes: &[u8]) {
            for &byte in bytes {
                self.0 = (self.0 << 8) | u64::from(byte);
            }
        }

        fn write_u64(&mut self, value: u64) {
            self.0 = value;
        }
    }

    impl BuildHasher for IdentityState {
        type Hasher = IdentityHasher;

        fn build_hasher(&self) -> Self::Hasher {
            IdentityHasher::default()
        }
    }

    fn identity_map(initial_capacity: usize) -> BandedMap<u64, &'static str, IdentityState> {
        BandedMap::with_hasher(NonZero::new(initial_capacity).unwrap(), IdentityState)
    }

    #[test]
    fn new_map_is_empty() {
        let map = BandedMap::<u64, u64>::new(NonZero::new(4).unwrap());

        assert!(map.is_empty());
        assert_eq!(map.len(), 0);
        assert_eq!(map.capacity(), 4);
        assert_eq!(map.initial_capacity().get(), 4);
        assert_eq!(map.generations(), 1);
        assert_eq!(map.iter().count(), 0);
    }

    #[test]
    fn exhausted_bands_trigger_growth() {
        let mut map = identity_map(4);

        for key in 0..4 {
            map.add(key, "old");
        }

        // All four keys fit in the first generation without growth.
        assert_eq!(map.capacity(), 4);
        assert_eq!(map.try_find_empty_index_for(&4), None);

        map.add(4, "new");

        assert!(map.capacity() >= 8);
        assert_eq!(map.capacity() % 4, 0);
        assert_eq!(map.len(), 5);

        for key in 0..4 {
            assert_eq!(map[&key], "old");
        }
        assert_eq!(map[&4], "new");
    }

    #[test]
    fn growth_keeps_entries_in_place() {
        let mut map = identity_map(4);

        for key in 0..4 {
            map.add(key, "x");
        }

        let before = (0..4)
            .map(|key| map.try_find_index_for(&key))
            .collect::<Vec<_>>();

        map.add(4, "y");

        let after = (0..4)
            .map(|key| map.try_find_index_for(&key))
            .collect::<Vec<_>>();

        assert_eq!(before, after);
    }

    #[test]
    fn add_or_update_replaces_value() {
        let mut map = identity_map(4);

        assert_eq!(map.add_or_update(1, "a"), None);
        assert_eq!(map.add_or_update(1, "b"), Some("a"));

        assert_eq!(map.len(), 1);
        assert_eq!(map[&1], "b");
    }

    #[test]
    #[should_panic]
    fn add_duplicate_panics() {
        let mut map = identity_map(4);

        map.add(1, "a");
        map.add(1, "b");
    }

    #[test]
    #[should_panic]
    fn small_mixed_hash_on_occupied_slot_panics() {
        let mut map = identity_map(4);

        // Mixed hashes 5 and 1 both reduce to slot 1 in every band, and 1 stays below any
        // capacity the map could grow to.
        map.add(MIX ^ 5, "a");
        map.add(MIX ^ 1, "b");
    }

    #[test]
    fn small_mixed_hash_on_free_slot_is_stored() {
        let mut map = identity_map(4);

        map.add(MIX ^ 1, "a");

        assert_eq!(map.try_find_index_for(&(MIX ^ 1)), Some(1));
        assert_eq!(map.capacity(), 4);
    }

    #[test]
    fn remove_frees_slot() {
        let mut map = identity_map(4);

        map.add(1, "a");
        let index = map.try_find_index_for(&1).unwrap();

        assert_eq!(map.remove(&1), Some("a"));
        assert_eq!(map.remove(&1), None);
        assert!(!map.contains_key(&1));
        assert!(map.is_empty());
        assert_eq!(map.try_find_empty_index_for(&1), Some(index));
    }

    #[test]
    fn removal_does_not_hide_keys_in_later_bands() {
        let mut map = identity_map(4);

        for key in 0..5 {
            map.add(key, "v");
        }

        // Key 4 shares its first-band slot with key 0.
        assert_eq!(map.remove(&0), Some("v"));

        assert!(map.contains_key(&4));
        assert_eq!(map.len(), 4);
    }

    #[test]
    #[should_panic]
    fn indexing_missing_key_panics() {
        let map = identity_map(4);

        _ = map[&7];
    }

    #[test]
    fn get_mut_modifies_value() {
        let mut map = BandedMap::new(NonZero::new(2).unwrap());

        map.add("k".to_string(), 1);
        *map.get_mut("k").unwrap() += 1;

        assert_eq!(map.get("k"), Some(&2));
        assert_eq!(map.get_mut("missing"), None);
    }

    #[test]
    fn iteration_skips_empty_slots() {
        let mut map = identity_map(8);

        map.extend([(1, "a"), (2, "b"), (3, "c")]);
        map.remove(&2);

        let mut entries = map.iter().map(|(&k, &v)| (k, v)).collect::<Vec<_>>();
        entries.sort_unstable();

        assert_eq!(entries, vec![(1, "a"), (3, "c")]);
        assert_eq!((&map).into_iter().count(), 2);
    }

    #[test]
    fn iteration_is_in_slot_order() {
        let mut map = identity_map(4);

        map.extend([(0, "a"), (1, "b"), (2, "c"), (3, "d")]);

        let keys = map.iter().map(|(&k, _)| k).collect::<Vec<_>>();
        let mut by_slot = keys.clone();
        by_slot.sort_by_key(|key| map.try_find_index_for(key));

        assert_eq!(keys, by_slot);
    }

    #[test]
    fn clear_keeps_capacity() {
        let mut map = identity_map(4);

        map.extend((0..5).map(|key| (key, "v")));
        let capacity = map.capacity();

        map.clear();

        assert!(map.is_empty());
        assert_eq!(map.capacity(), capacity);
        assert!(!map.contains_key(&3));
    }

    #[test]
    fn debug_lists_entries() {
        let mut map = identity_map(4);
        map.add(1, "a");

        assert_eq!(format!("{map:?}"), r#"{1: "a"}"#);
    }
}
