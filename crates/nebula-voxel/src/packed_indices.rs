//! Fixed-width palette index storage packed into `u64` words.
//!
//! Unlike a fully tight bit stream, an index never straddles two words:
//! each word holds `64 / bits` entries and the remaining high bits stay zero.
//! That keeps `get`/`set` to a single word access.

/// Compact storage of `len` palette indices, each `bits` wide.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PackedIndices {
    words: Vec<u64>,
    bits: u8,
    per_word: usize,
    len: usize,
}

impl PackedIndices {
    /// Creates zeroed storage for `len` entries of `bits` bits each.
    ///
    /// A width of 0 stores nothing; every entry reads back as 0.
    pub fn new(bits: u8, len: usize) -> Self {
        debug_assert!(bits <= 16, "palette indices are at most 16 bits");
        if bits == 0 {
            return Self {
                words: Vec::new(),
                bits,
                per_word: 0,
                len,
            };
        }
        let per_word = 64 / bits as usize;
        Self {
            words: vec![0; len.div_ceil(per_word)],
            bits,
            per_word,
            len,
        }
    }

    /// Returns the entry at `index`.
    pub fn get(&self, index: usize) -> u16 {
        debug_assert!(index < self.len, "index {index} out of bounds");
        if self.bits == 0 {
            return 0;
        }
        let (word, shift) = self.locate(index);
        ((self.words[word] >> shift) & self.mask()) as u16
    }

    /// Stores `value` at `index`.
    pub fn set(&mut self, index: usize, value: u16) {
        debug_assert!(index < self.len, "index {index} out of bounds");
        if self.bits == 0 {
            debug_assert_eq!(value, 0, "zero-width storage only holds 0");
            return;
        }
        debug_assert!(u64::from(value) <= self.mask());
        let (word, shift) = self.locate(index);
        let mask = self.mask();
        self.words[word] = (self.words[word] & !(mask << shift)) | (u64::from(value) << shift);
    }

    /// Copies every entry into new storage of a different width.
    ///
    /// Values that don't fit the narrower width are truncated, so callers
    /// must remap indices before shrinking.
    pub fn resized(&self, bits: u8) -> Self {
        let mut out = Self::new(bits, self.len);
        if bits > 0 && self.bits > 0 {
            for i in 0..self.len {
                out.set(i, self.get(i) & ((1u32 << bits) - 1) as u16);
            }
        }
        out
    }

    /// Width of a single entry in bits.
    pub fn bits(&self) -> u8 {
        self.bits
    }

    /// Number of logical entries.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns `true` if the storage holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Heap bytes used by the packed words.
    pub fn storage_bytes(&self) -> usize {
        self.words.len() * std::mem::size_of::<u64>()
    }

    fn mask(&self) -> u64 {
        (1u64 << self.bits) - 1
    }

    fn locate(&self, index: usize) -> (usize, u32) {
        let word = index / self.per_word;
        let shift = (index % self.per_word) as u32 * u32::from(self.bits);
        (word, shift)
    }
}
