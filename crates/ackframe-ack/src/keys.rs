//! Compact membership store for idempotency keys.

/// A closed range of keys, `min..=max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyRange {
    pub min: u32,
    pub max: u32,
}

impl KeyRange {
    fn single(key: u32) -> Self {
        Self { min: key, max: key }
    }

    pub fn contains(&self, key: u32) -> bool {
        self.min <= key && key <= self.max
    }

    /// Number of keys in the range.
    pub fn len(&self) -> u64 {
        u64::from(self.max - self.min) + 1
    }
}

/// Set of keys stored as sorted, disjoint, non-adjacent ranges.
///
/// Keys handed out by a counter arrive mostly in increasing order, so a
/// long run of handled keys collapses into a single range. Insertion walks
/// from the highest range down; lookups walk from the lowest range up.
/// Both are O(number of gaps), which degrades to O(n) when every other key
/// is missing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IntervalSet {
    ranges: Vec<KeyRange>,
    highest: u32,
}

impl IntervalSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `key`. Returns `true` if it was not already present.
    pub fn put(&mut self, key: u32) -> bool {
        // First index whose range starts above `key`.
        let mut idx = self.ranges.len();
        while idx > 0 && self.ranges[idx - 1].min > key {
            idx -= 1;
        }

        if idx > 0 {
            let below = &mut self.ranges[idx - 1];
            if key <= below.max {
                return false;
            }
            if key - 1 == below.max {
                below.max = key;
                if idx < self.ranges.len() && self.ranges[idx].min - 1 == key {
                    self.ranges[idx - 1].max = self.ranges[idx].max;
                    self.ranges.remove(idx);
                }
                self.raise_watermark(key);
                return true;
            }
        }

        match self.ranges.get_mut(idx) {
            Some(above) if above.min - 1 == key => above.min = key,
            _ => self.ranges.insert(idx, KeyRange::single(key)),
        }
        self.raise_watermark(key);
        true
    }

    fn raise_watermark(&mut self, key: u32) {
        if key > self.highest {
            self.highest = key;
        }
    }

    pub fn has_key(&self, key: u32) -> bool {
        if key > self.highest {
            return false;
        }
        for range in &self.ranges {
            if range.contains(key) {
                return true;
            }
            if range.min > key {
                return false;
            }
        }
        false
    }

    /// Drop every key and reset the watermark.
    pub fn clear(&mut self) {
        self.ranges.clear();
        self.highest = 0;
    }

    /// Largest key ever inserted since the last clear (0 when empty).
    pub fn highest(&self) -> u32 {
        self.highest
    }

    /// Number of keys in the set.
    pub fn len(&self) -> u64 {
        self.ranges.iter().map(KeyRange::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    pub fn range_count(&self) -> usize {
        self.ranges.len()
    }

    pub fn ranges(&self) -> &[KeyRange] {
        &self.ranges
    }

    /// Every key, ascending.
    pub fn iter(&self) -> impl Iterator<Item = u32> + '_ {
        self.ranges.iter().flat_map(|range| range.min..=range.max)
    }
}

impl Extend<u32> for IntervalSet {
    fn extend<I: IntoIterator<Item = u32>>(&mut self, keys: I) {
        for key in keys {
            self.put(key);
        }
    }
}

impl FromIterator<u32> for IntervalSet {
    fn from_iter<I: IntoIterator<Item = u32>>(keys: I) -> Self {
        let mut set = Self::new();
        set.extend(keys);
        set
    }
}
