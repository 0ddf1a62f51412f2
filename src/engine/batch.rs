//! # Enable-bit batching
//!
//! Turns a chunk's enable bit sets into the ordered list of contiguous row
//! ranges that satisfy a query clause.
//!
//! ## Algorithm
//!
//! 1. Build one combined mask over `[0, count)`:
//!    `AND(required_enabled[i]) & AND(!required_disabled[j])`.
//! 2. Scan the mask word by word, using `trailing_zeros` / `trailing_ones`
//!    to jump over runs. A run that reaches the top of a word continues into
//!    the next word, so runs crossing word boundaries come out whole.
//!
//! There is no cap on the number of batches: every selected row appears in
//! exactly one batch, in ascending row order.

/// Contiguous range of selected rows in one chunk.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Batch {
    /// First row.
    pub start: usize,
    /// Number of rows.
    pub len: usize,
}

impl Batch {
    /// Creates a batch of `len` rows starting at `start`.
    #[inline]
    pub fn new(start: usize, len: usize) -> Self {
        Self { start, len }
    }

    /// Row range covered by this batch.
    #[inline]
    pub fn range(&self) -> std::ops::Range<usize> {
        self.start..self.start + self.len
    }
}

/// Number of `u64` words needed for `count` bits.
#[inline]
pub fn words_for(count: usize) -> usize {
    count.div_ceil(64)
}

/// Computes the combined selection mask over `[0, count)`.
///
/// Each input slice must hold at least `words_for(count)` words. Bits past
/// `count` in the result are cleared.

pub fn combined_mask(required_enabled: &[&[u64]], required_disabled: &[&[u64]], count: usize) -> Vec<u64> {
    let words = words_for(count);
    let mut mask = vec![u64::MAX; words];

    for bits in required_enabled {
        for (m, w) in mask.iter_mut().zip(bits.iter()) {
            *m &= *w;
        }
    }
    for bits in required_disabled {
        for (m, w) in mask.iter_mut().zip(bits.iter()) {
            *m &= !*w;
        }
    }

    let tail = count % 64;
    if tail != 0 {
        if let Some(last) = mask.last_mut() {
            *last &= (1u64 << tail) - 1;
        }
    }
    mask
}

/// Emits one batch per maximal run of set bits in `mask`, limited to `[0, count)`.
pub fn find_batches(mask: &[u64], count: usize) -> Vec<Batch> {
    let mut batches = Vec::new();
    let mut open: Option<usize> = None;
    let close = |start: usize, end: usize, batches: &mut Vec<Batch>| {
        let end = end.min(count);
        if end > start {
            batches.push(Batch::new(start, end - start));
        }
    };

    for (word_index, &word) in mask.iter().enumerate() {
        let base = word_index * 64;
        if base >= count {
            break;
        }
        let mut bit = 0usize;

        while bit < 64 {
            let shifted = word >> bit;
            match open {
                None => {
                    if shifted == 0 {
                        break;
                    }
                    bit += shifted.trailing_zeros() as usize;
                    open = Some(base + bit);
                }
                Some(start) => {
                    bit += shifted.trailing_ones() as usize;
                    if bit < 64 {
                        close(start, base + bit, &mut batches);
                        open = None;
                    }
                }
            }
        }
    }

    if let Some(start) = open {
        close(start, mask.len() * 64, &mut batches);
    }
    batches
}

/// Computes the batches of one chunk for the given enableable constraints.
///
/// With no constraints the whole live range is one batch.

pub fn chunk_batches(required_enabled: &[&[u64]], required_disabled: &[&[u64]], count: usize) -> Vec<Batch> {
    if count == 0 {
        return Vec::new();
    }
    if required_enabled.is_empty() && required_disabled.is_empty() {
        return vec![Batch::new(0, count)];
    }
    let mask = combined_mask(required_enabled, required_disabled, count);
    find_batches(&mask, count)
}
