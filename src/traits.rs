use std::{
    cmp,
    io::{Error, ErrorKind, Result},
};

/// number of contexts needed by the tree binarization of a byte (one per internal node of a
/// complete binary tree of depth 8)
pub const TREE_CONTEXTS: usize = 255;

/// the Exp-Golomb prefix can never grow the order beyond this for a u32 value
const MAX_EXP_GOLOMB_ORDER: u32 = 32;

/// implementation of a context aware binary arithmetic encoder
pub trait CabacWriter<Context> {
    /// write using bypass bin for bits that aren't worth encoding
    fn put_bypass(&mut self, bin_value: bool) -> Result<()>;

    /// write bits using given context for probability
    fn put(&mut self, value: bool, cur_ctx: &mut Context) -> Result<()>;

    /// flush any remaining state
    fn finish(&mut self) -> Result<()>;

    /// default implementation to write num_bits of the lower bits, the last context is
    /// shared by all bits above A
    fn put_n_bits<const A: usize>(
        &mut self,
        bits: u64,
        num_bits: usize,
        contexts: &mut [Context; A],
    ) -> Result<()> {
        for i in (0..num_bits).rev() {
            self.put(
                (bits & (1 << i)) != 0,
                &mut contexts[cmp::min(A - 1, i)],
            )?;
        }

        Ok(())
    }

    /// default implementation to write unary encoded value
    fn put_unary_encoded<const A: usize>(
        &mut self,
        v: usize,
        contexts: &mut [Context; A],
    ) -> Result<()> {
        for i in 0..=v {
            let cur_bit = v != i;

            self.put(cur_bit, &mut contexts[cmp::min(A - 1, i)])?;
            if !cur_bit {
                break;
            }
        }

        Ok(())
    }

    /// writes a byte as 8 decisions, most significant first, walking down a binary tree of
    /// contexts. Each node of the tree has its own context, so the probability of every bit
    /// is conditioned on all the bits above it.
    fn put_tree(&mut self, v: u8, contexts: &mut [Context; TREE_CONTEXTS]) -> Result<()> {
        let mut next_model = 0;
        let mut level_offset = 0;
        let mut inverted = 0;

        for i in 0..8 {
            let cur_bit = (v >> (7 - i)) & 1 != 0;

            self.put(cur_bit, &mut contexts[next_model])?;

            // nodes of level i + 1 start at 2^(i + 1) - 1, the path so far is stored
            // least significant bit first
            inverted |= usize::from(cur_bit) << i;
            level_offset += 1 << i;
            next_model = level_offset + inverted;
        }

        Ok(())
    }

    /// writes k-th order Exp-Golomb code using only bypass bins
    fn put_exp_golomb_bypass(&mut self, v: u32, k: u32) -> Result<()> {
        assert!(k < MAX_EXP_GOLOMB_ORDER);

        let mut value = u64::from(v);
        let mut k = k;

        while value >= (1u64 << k) {
            self.put_bypass(true)?;
            value -= 1u64 << k;
            k += 1;
        }

        self.put_bypass(false)?;

        while k > 0 {
            k -= 1;
            self.put_bypass((value >> k) & 1 != 0)?;
        }

        Ok(())
    }
}

/// implementation of a context aware binary arithmetic decoder
pub trait CabacReader<Context> {
    /// read from bypass bin
    fn get_bypass(&mut self) -> Result<bool>;

    /// read using given context for probability
    fn get(&mut self, cur_ctx: &mut Context) -> Result<bool>;

    /// reads as unary encoded which mean that the number of true bits is equal to the value with
    /// a terminating false bit
    fn get_unary_encoded<const A: usize>(&mut self, contexts: &mut [Context; A]) -> Result<usize> {
        let mut value = 0;

        loop {
            let cur_bit = self.get(&mut contexts[cmp::min(A - 1, value)])?;
            if !cur_bit {
                break;
            }

            value += 1;
        }

        return Ok(value);
    }

    /// reads num_bits of the lower bits of a known size
    fn get_n_bits<const A: usize>(
        &mut self,
        num_bits: usize,
        contexts: &mut [Context; A],
    ) -> Result<u64> {
        let mut coef = 0;
        for i in (0..num_bits).rev() {
            coef |= u64::from(self.get(&mut contexts[cmp::min(A - 1, i)])?) << i;
        }

        return Ok(coef);
    }

    /// reads a byte written by `put_tree`, visiting the tree nodes in the same order
    fn get_tree(&mut self, contexts: &mut [Context; TREE_CONTEXTS]) -> Result<u8> {
        let mut next_model = 0;
        let mut level_offset = 0;
        let mut inverted = 0;
        let mut value = 0u8;

        for i in 0..8 {
            let cur_bit = self.get(&mut contexts[next_model])?;

            value |= u8::from(cur_bit) << (7 - i);
            inverted |= usize::from(cur_bit) << i;
            level_offset += 1 << i;
            next_model = level_offset + inverted;
        }

        Ok(value)
    }

    /// reads k-th order Exp-Golomb code written by `put_exp_golomb_bypass`
    fn get_exp_golomb_bypass(&mut self, k: u32) -> Result<u32> {
        let mut value = 0u32;
        let mut k = k;

        while self.get_bypass()? {
            if k >= MAX_EXP_GOLOMB_ORDER {
                return Err(Error::new(
                    ErrorKind::InvalidData,
                    "exp-golomb prefix too long",
                ));
            }

            value += 1 << k;
            k += 1;
        }

        let mut suffix = 0u32;
        while k > 0 {
            k -= 1;
            suffix |= u32::from(self.get_bypass()?) << k;
        }

        value
            .checked_add(suffix)
            .ok_or_else(|| Error::new(ErrorKind::InvalidData, "exp-golomb value overflow"))
    }
}
