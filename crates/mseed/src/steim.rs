//! Steim-1 and Steim-2 difference compression.
//!
//! Data is a sequence of 64-byte frames of sixteen big-endian words.
//! Word 0 of each frame packs sixteen 2-bit control nibbles, one per
//! word. In the first frame, words 1 and 2 hold the forward and reverse
//! integration constants (first and last sample).

use tracing::warn;

use crate::error::{DecodeError, Result};

const FRAME_BYTES: usize = 64;
const WORDS_PER_FRAME: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Variant {
    Steim1,
    Steim2,
}

impl Variant {
    /// Most differences one data word can carry
    fn max_per_word(self) -> usize {
        match self {
            Variant::Steim1 => 4,
            Variant::Steim2 => 7,
        }
    }
}

fn sign_extend(value: u32, bits: u32) -> i32 {
    let shift = 32 - bits;
    ((value << shift) as i32) >> shift
}

/// Push `count` fields of `bits` width, most significant first
fn push_fields(diffs: &mut Vec<i32>, word: u32, count: u32, bits: u32) {
    let mask = if bits == 32 { u32::MAX } else { (1u32 << bits) - 1 };
    for i in (0..count).rev() {
        diffs.push(sign_extend((word >> (i * bits)) & mask, bits));
    }
}

fn unpack_word(variant: Variant, nibble: u32, word: u32, diffs: &mut Vec<i32>) -> Result<()> {
    match (variant, nibble) {
        (_, 0) => {}
        (_, 1) => push_fields(diffs, word, 4, 8),
        (Variant::Steim1, 2) => push_fields(diffs, word, 2, 16),
        (Variant::Steim1, 3) => push_fields(diffs, word, 1, 32),
        (Variant::Steim2, 2) => match word >> 30 {
            1 => push_fields(diffs, word, 1, 30),
            2 => push_fields(diffs, word, 2, 15),
            3 => push_fields(diffs, word, 3, 10),
            dnib => return Err(DecodeError::parse(format!("invalid Steim-2 dnib {} for nibble 2", dnib))),
        },
        (Variant::Steim2, 3) => match word >> 30 {
            0 => push_fields(diffs, word, 5, 6),
            1 => push_fields(diffs, word, 6, 5),
            2 => push_fields(diffs, word, 7, 4),
            dnib => return Err(DecodeError::parse(format!("invalid Steim-2 dnib {} for nibble 3", dnib))),
        },
        (_, n) => return Err(DecodeError::parse(format!("invalid Steim nibble {}", n))),
    }
    Ok(())
}

/// Decode `count` integer samples from Steim frames
pub fn decode(data: &[u8], count: usize, variant: Variant) -> Result<Vec<i32>> {
    let frames = data.len() / FRAME_BYTES;
    if frames == 0 {
        return Err(DecodeError::parse("Steim data shorter than one frame"));
    }

    let capacity = frames * (WORDS_PER_FRAME - 1) * variant.max_per_word();
    if count > capacity {
        return Err(DecodeError::parse(format!(
            "{} Steim frames hold at most {} samples, header declares {}",
            frames, capacity, count
        )));
    }

    let mut diffs: Vec<i32> = Vec::with_capacity(count + 7);
    let mut x0 = 0i32;
    let mut xn = 0i32;

    'frames: for f in 0..frames {
        let frame = &data[f * FRAME_BYTES..(f + 1) * FRAME_BYTES];
        let word = |w: usize| {
            u32::from_be_bytes([frame[w * 4], frame[w * 4 + 1], frame[w * 4 + 2], frame[w * 4 + 3]])
        };
        let nibbles = word(0);

        let mut first_data_word = 1;
        if f == 0 {
            x0 = word(1) as i32;
            xn = word(2) as i32;
            first_data_word = 3;
        }

        for w in first_data_word..WORDS_PER_FRAME {
            let nibble = (nibbles >> (30 - 2 * w as u32)) & 0x3;
            unpack_word(variant, nibble, word(w), &mut diffs)?;
            if diffs.len() >= count {
                break 'frames;
            }
        }
    }

    if diffs.len() < count {
        return Err(DecodeError::parse(format!(
            "Steim frames hold {} differences, header declares {} samples",
            diffs.len(),
            count
        )));
    }

    let mut samples = Vec::with_capacity(count);
    samples.push(x0);
    for diff in &diffs[1..count] {
        let prev = samples[samples.len() - 1];
        samples.push(prev.wrapping_add(*diff));
    }

    if let Some(&last) = samples.last() {
        if last != xn {
            warn!(last, reverse_constant = xn, "Steim integration constant mismatch");
        }
    }

    Ok(samples)
}
