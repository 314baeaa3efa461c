//! Fixed-capacity slot table: one record per addressable churn file.
//!
//! Slots live in one contiguous `Vec` and are referenced only by index, so a
//! fill or clear is O(1) and the occupancy bitmap is one linear pass.

#![allow(missing_docs)]

use serde::Serialize;

use crate::core::errors::{ChurnError, Result};

/// Bits per packed bitmap word.
pub const BITMAP_WORD_BITS: usize = 64;
/// Largest pool the engine will size. `blockinfo` carries one character per slot.
pub const MAX_SLOTS: usize = 1 << 22;

// ──────────────────── slot ────────────────────

/// One addressable file position. Occupancy is derived from `size`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Slot {
    pub index: usize,
    pub size: u64,
    /// Unix seconds of the last fill; 0 once cleared.
    pub last_change: i64,
}

impl Slot {
    const fn empty(index: usize) -> Self {
        Self {
            index,
            size: 0,
            last_change: 0,
        }
    }

    #[must_use]
    pub const fn is_occupied(&self) -> bool {
        self.size > 0
    }
}

// ──────────────────── pool ────────────────────

/// Flat arena of slots indexed `0..capacity`. Capacity is fixed at creation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SlotPool {
    slots: Vec<Slot>,
}

impl SlotPool {
    /// Allocate `capacity` empty slots. A zero capacity is a configuration error.
    pub fn create(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(ChurnError::InvalidConfig {
                details: "slot pool capacity must be greater than zero".to_string(),
            });
        }
        let too_large = || ChurnError::InvalidConfig {
            details: format!(
                "pool of {capacity} slots cannot be allocated; raise max_file_size or set slot_count"
            ),
        };
        if capacity > MAX_SLOTS {
            return Err(too_large());
        }
        let mut slots = Vec::new();
        slots.try_reserve_exact(capacity).map_err(|_| too_large())?;
        slots.extend((0..capacity).map(Slot::empty));
        Ok(Self { slots })
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn get(&self, index: usize) -> Option<&Slot> {
        self.slots.get(index)
    }

    /// Mark `index` occupied with `size` bytes stamped at `now`. A zero size is ignored.
    pub fn fill(&mut self, index: usize, size: u64, now: i64) -> Result<()> {
        let slot = self.slot_mut(index)?;
        if size == 0 {
            return Ok(());
        }
        slot.size = size;
        slot.last_change = now;
        Ok(())
    }

    /// Mark `index` empty. Clearing an empty slot changes nothing.
    pub fn clear(&mut self, index: usize) -> Result<()> {
        let slot = self.slot_mut(index)?;
        if slot.is_occupied() {
            slot.size = 0;
            slot.last_change = 0;
        }
        Ok(())
    }

    pub fn slots(&self) -> &[Slot] {
        &self.slots
    }

    pub fn iter_occupied(&self) -> impl Iterator<Item = &Slot> {
        self.slots.iter().filter(|s| s.is_occupied())
    }

    pub fn occupied_count(&self) -> usize {
        self.iter_occupied().count()
    }

    pub fn total_occupied_bytes(&self) -> u64 {
        self.slots.iter().map(|s| s.size).sum()
    }

    /// Pack occupancy into 64-bit words; see [`OccupancyBitmap`] for bit order.
    pub fn occupancy_bitmap(&self) -> OccupancyBitmap {
        let mut words = vec![0_u64; self.slots.len().div_ceil(BITMAP_WORD_BITS)];
        for slot in self.iter_occupied() {
            words[slot.index / BITMAP_WORD_BITS] |= 1_u64 << (slot.index % BITMAP_WORD_BITS);
        }
        OccupancyBitmap {
            words,
            len: self.slots.len(),
        }
    }

    fn slot_mut(&mut self, index: usize) -> Result<&mut Slot> {
        let capacity = self.slots.len();
        self.slots
            .get_mut(index)
            .ok_or(ChurnError::SlotOutOfRange { index, capacity })
    }
}

// ──────────────────── bitmap ────────────────────

/// Packed occupancy bits.
///
/// Slot `i` lives in word `i / 64` at bit `i % 64` (value `1 << (i % 64)`).
/// The last word is rounded up; its bits at or beyond `len` are always zero.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OccupancyBitmap {
    words: Vec<u64>,
    len: usize,
}

impl OccupancyBitmap {
    pub fn words(&self) -> &[u64] {
        &self.words
    }

    /// Number of slots described.
    pub const fn len(&self) -> usize {
        self.len
    }

    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Whether slot `index` is occupied; out-of-range indices read as empty.
    pub fn get(&self, index: usize) -> bool {
        index < self.len
            && self.words[index / BITMAP_WORD_BITS] & (1_u64 << (index % BITMAP_WORD_BITS)) != 0
    }

    pub fn count_ones(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    pub fn iter_occupied(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.len).filter(|&i| self.get(i))
    }

    /// `'1'` for occupied, `'0'` for empty, one character per slot in index order.
    pub fn to_bit_string(&self) -> String {
        (0..self.len)
            .map(|i| if self.get(i) { '1' } else { '0' })
            .collect()
    }
}

// ──────────────────── tests ────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn create_rejects_zero_capacity() {
        let err = SlotPool::create(0).unwrap_err();
        assert_eq!(err.code(), "DCH-1001");
    }

    #[test]
    fn create_rejects_oversized_pool() {
        for capacity in [MAX_SLOTS + 1, usize::MAX] {
            let err = SlotPool::create(capacity).unwrap_err();
            assert_eq!(err.code(), "DCH-1001");
            assert!(err.to_string().contains("slot_count"));
        }
    }

    #[test]
    fn new_pool_is_empty_with_stable_indices() {
        let pool = SlotPool::create(10).unwrap();
        assert_eq!(pool.capacity(), 10);
        assert_eq!(pool.occupied_count(), 0);
        assert_eq!(pool.total_occupied_bytes(), 0);
        for (i, slot) in pool.slots().iter().enumerate() {
            assert_eq!(slot.index, i);
            assert!(!slot.is_occupied());
        }
    }

    #[test]
    fn get_out_of_range_is_none() {
        let pool = SlotPool::create(3).unwrap();
        assert!(pool.get(2).is_some());
        assert!(pool.get(3).is_none());
    }

    #[test]
    fn fill_then_clear() {
        let mut pool = SlotPool::create(4).unwrap();
        pool.fill(2, 512, 1_700_000_000).unwrap();
        let slot = pool.get(2).unwrap();
        assert!(slot.is_occupied());
        assert_eq!(slot.size, 512);
        assert_eq!(slot.last_change, 1_700_000_000);

        pool.clear(2).unwrap();
        let slot = pool.get(2).unwrap();
        assert!(!slot.is_occupied());
        assert_eq!(slot.size, 0);
        assert_eq!(slot.last_change, 0);
    }

    #[test]
    fn zero_fill_and_double_clear_are_noops() {
        let mut pool = SlotPool::create(4).unwrap();
        pool.fill(1, 100, 7).unwrap();
        let before = pool.clone();

        pool.fill(0, 0, 99).unwrap();
        pool.clear(3).unwrap();
        assert_eq!(pool, before);
    }

    #[test]
    fn mutation_out_of_range_errors() {
        let mut pool = SlotPool::create(2).unwrap();
        let err = pool.fill(5, 1, 0).unwrap_err();
        assert!(matches!(
            err,
            ChurnError::SlotOutOfRange {
                index: 5,
                capacity: 2
            }
        ));
        assert!(pool.clear(2).is_err());
    }

    #[test]
    fn aggregates_sum_occupied_slots() {
        let mut pool = SlotPool::create(5).unwrap();
        pool.fill(0, 10, 1).unwrap();
        pool.fill(4, 30, 1).unwrap();
        assert_eq!(pool.occupied_count(), 2);
        assert_eq!(pool.total_occupied_bytes(), 40);
    }

    #[test]
    fn bitmap_string_for_alternating_pool() {
        let mut pool = SlotPool::create(3).unwrap();
        pool.fill(0, 1, 1).unwrap();
        pool.fill(2, 1, 1).unwrap();
        let bitmap = pool.occupancy_bitmap();
        assert_eq!(bitmap.to_bit_string(), "101");
        assert_eq!(bitmap.words(), &[0b101]);
    }

    #[test]
    fn bitmap_rounds_last_word_up() {
        let mut pool = SlotPool::create(65).unwrap();
        pool.fill(64, 1, 1).unwrap();
        let bitmap = pool.occupancy_bitmap();
        assert_eq!(bitmap.words().len(), 2);
        assert_eq!(bitmap.words()[0], 0);
        assert_eq!(bitmap.words()[1], 1);
        assert!(bitmap.get(64));
        assert!(!bitmap.get(65));
    }

    proptest! {
        #[test]
        fn bitmap_round_trips_occupancy(
            capacity in 1_usize..300,
            picks in proptest::collection::vec(any::<prop::sample::Index>(), 0..120),
        ) {
            let mut pool = SlotPool::create(capacity).unwrap();
            for pick in &picks {
                pool.fill(pick.index(capacity), 4096, 1).unwrap();
            }
            let bitmap = pool.occupancy_bitmap();

            prop_assert_eq!(bitmap.len(), capacity);
            prop_assert_eq!(bitmap.words().len(), capacity.div_ceil(64));
            let decoded: Vec<usize> = bitmap.iter_occupied().collect();
            let expected: Vec<usize> = pool.iter_occupied().map(|s| s.index).collect();
            prop_assert_eq!(decoded, expected);
            prop_assert_eq!(bitmap.count_ones(), pool.occupied_count());

            let tail_bits = capacity % 64;
            if tail_bits != 0 {
                let last = *bitmap.words().last().unwrap();
                prop_assert_eq!(last >> tail_bits, 0);
            }
        }
    }
}
