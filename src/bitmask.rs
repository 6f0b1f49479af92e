//! Token bitmask utilities.
//!
//! A bitmask is a `Vec<u32>` where bit `i` indicates whether token `i` is allowed.
//! Bit 1 = allowed, bit 0 = rejected. Interpreters hand masks to the parser in this
//! form, and [`crate::grammar::ByteClass`] uses the same layout for its 256 bits.

/// Compute the number of `u32` words needed for a bitmask of `vocab_size` tokens.
pub fn bitmask_size(vocab_size: usize) -> usize {
    vocab_size.div_ceil(32)
}

/// Set bit `i` in the bitmask (mark token as allowed).
#[inline]
pub fn set_bit(bitmask: &mut [u32], i: usize) {
    bitmask[i / 32] |= 1 << (i % 32);
}

/// Get bit `i` from the bitmask. Out-of-range ids are rejected.
#[inline]
pub fn get_bit(bitmask: &[u32], i: usize) -> bool {
    match bitmask.get(i / 32) {
        Some(word) => (word >> (i % 32)) & 1 == 1,
        None => false,
    }
}

/// Build a bitmask for `vocab_size` tokens with exactly `ids` allowed.
///
/// Ids outside the vocabulary are ignored.
pub fn from_token_ids(ids: impl IntoIterator<Item = u32>, vocab_size: usize) -> Vec<u32> {
    let mut bitmask = vec![0u32; bitmask_size(vocab_size)];
    for id in ids {
        if (id as usize) < vocab_size {
            set_bit(&mut bitmask, id as usize);
        }
    }
    bitmask
}

/// Iterate allowed token ids in ascending order.
pub fn iter_allowed(bitmask: &[u32]) -> impl Iterator<Item = u32> + '_ {
    bitmask.iter().enumerate().flat_map(|(word_idx, &word)| {
        let mut rest = word;
        std::iter::from_fn(move || {
            if rest == 0 {
                return None;
            }
            let bit = rest.trailing_zeros();
            rest &= rest - 1;
            Some(word_idx as u32 * 32 + bit)
        })
    })
}

/// Number of allowed tokens.
pub fn count_allowed(bitmask: &[u32]) -> usize {
    bitmask.iter().map(|w| w.count_ones() as usize).sum()
}

/// Apply the token bitmask to logits in-place.
/// Sets logits to `-inf` for rejected tokens, including ids past the end of the mask.
pub fn apply_token_bitmask_inplace(logits: &mut [f32], bitmask: &[u32]) {
    for (i, logit) in logits.iter_mut().enumerate() {
        if !get_bit(bitmask, i) {
            *logit = f32::NEG_INFINITY;
        }
    }
}
