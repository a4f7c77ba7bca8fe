///! implementation of the H.264 CABAC arithmetic coder (the "M-coder"). Uses a 6 bit state plus an
///! explicit most probable symbol to track probabilities, a 9 bit range and outstanding-bit carry
///! resolution on the encoder side.
///
/*
 * H.264/H.265 video codec.
 * Copyright (c) 2013-2014 struktur AG, Dirk Farin <farin@struktur.de>
 *
 * This file is part of libde265.
 *
 * libde265 is free software: you can redistribute it and/or modify
 * it under the terms of the GNU Lesser General Public License as
 * published by the Free Software Foundation, either version 3 of
 * the License, or (at your option) any later version.
 *
 * libde265 is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU Lesser General Public License for more details.
 *
 * You should have received a copy of the GNU Lesser General Public License
 * along with libde265.  If not, see <http://www.gnu.org/licenses/>.
 */
use std::cmp;
use std::io::{Read, Result, Write};

use bytemuck::{Pod, Zeroable};
use log::{debug, trace};

use crate::bitio::{BitWriter, ByteSource};
use crate::traits::{CabacReader, CabacWriter};

/// highest state an adaptive context can reach. State 63 is reserved for the terminating bin.
pub const MAX_STATE: u8 = 62;

const INITIAL_RANGE: u32 = 510;
const RENORM_FLOOR: u32 = 256;

/// next state after coding the least probable symbol
const TRANS_IDX_LPS: [u8; 64] = [
    0, 0, 1, 2, 2, 4, 4, 5, 6, 7, 8, 9, 9, 11, 11, 12, 13, 13, 15, 15, 16, 16, 18, 18, 19, 19, 21,
    21, 22, 22, 23, 24, 24, 25, 26, 26, 27, 27, 28, 29, 29, 30, 30, 30, 31, 32, 32, 33, 33, 33, 34,
    34, 35, 35, 35, 36, 36, 36, 37, 37, 37, 38, 38, 63,
];

/// width of the LPS sub-interval, indexed by state and by bits 7..6 of the range
const RANGE_TAB_LPS: [[u8; 4]; 64] = [
    [128, 176, 208, 240],
    [128, 167, 197, 227],
    [128, 158, 187, 216],
    [123, 150, 178, 205],
    [116, 142, 169, 195],
    [111, 135, 160, 185],
    [105, 128, 152, 175],
    [100, 122, 144, 166],
    [95, 116, 137, 158],
    [90, 110, 130, 150],
    [85, 104, 123, 142],
    [81, 99, 117, 135],
    [77, 94, 111, 128],
    [73, 89, 105, 122],
    [69, 85, 100, 116],
    [66, 80, 95, 110],
    [62, 76, 90, 104],
    [59, 72, 86, 99],
    [56, 69, 81, 94],
    [53, 65, 77, 89],
    [51, 62, 73, 85],
    [48, 59, 69, 80],
    [46, 56, 66, 76],
    [43, 53, 63, 72],
    [41, 50, 59, 69],
    [39, 48, 56, 65],
    [37, 45, 54, 62],
    [35, 43, 51, 59],
    [33, 41, 48, 56],
    [32, 39, 46, 53],
    [30, 37, 43, 50],
    [29, 35, 41, 48],
    [27, 33, 39, 45],
    [26, 31, 37, 43],
    [24, 30, 35, 41],
    [23, 28, 33, 39],
    [22, 27, 32, 37],
    [21, 26, 30, 35],
    [20, 24, 29, 33],
    [19, 23, 27, 31],
    [18, 22, 26, 30],
    [17, 21, 25, 28],
    [16, 20, 23, 27],
    [15, 19, 22, 25],
    [14, 18, 21, 24],
    [14, 17, 20, 23],
    [13, 16, 19, 22],
    [12, 15, 18, 21],
    [12, 14, 17, 20],
    [11, 14, 16, 19],
    [11, 13, 15, 18],
    [10, 12, 15, 17],
    [10, 12, 14, 16],
    [9, 11, 13, 15],
    [9, 11, 12, 14],
    [8, 10, 12, 14],
    [8, 9, 11, 13],
    [7, 9, 11, 12],
    [7, 9, 10, 12],
    [7, 8, 10, 11],
    [6, 8, 9, 11],
    [6, 7, 9, 10],
    [6, 7, 8, 9],
    [2, 2, 2, 2],
];

/// number of doublings needed to bring an LPS range back above the floor, indexed by lps >> 3
const RENORM_TABLE: [u8; 32] = [
    6, 5, 4, 4, 3, 3, 3, 3, 2, 2, 2, 2, 2, 2, 2, 2, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1,
];

/// adaptive probability state: a 6 bit index into the transition tables plus the bit that is
/// currently considered most probable.
#[repr(C)]
#[derive(Default, Copy, Clone, Debug, Eq, PartialEq, Pod, Zeroable)]
pub struct H264Context {
    state: u8,
    mps: u8,
}

impl H264Context {
    pub fn new(state: u8, mps: bool) -> Self {
        assert!(state <= MAX_STATE);
        H264Context {
            state,
            mps: u8::from(mps),
        }
    }

    /// initializes from the (m, n) pair of the standard's context initialization tables
    /// for the given slice QP
    pub fn from_init_values(m: i32, n: i32, slice_qp: i32) -> Self {
        let qp = slice_qp.clamp(0, 51);
        let pre_ctx_state = (((m * qp) >> 4) + n).clamp(1, 126);

        if pre_ctx_state <= 63 {
            H264Context {
                state: (63 - pre_ctx_state) as u8,
                mps: 0,
            }
        } else {
            H264Context {
                state: (pre_ctx_state - 64) as u8,
                mps: 1,
            }
        }
    }

    pub fn state(&self) -> u8 {
        self.state
    }

    pub fn mps(&self) -> bool {
        self.mps != 0
    }

    pub(crate) fn is_valid(&self) -> bool {
        self.state <= MAX_STATE && self.mps <= 1
    }

    #[inline(always)]
    fn lps_range(&self, range: u32) -> u32 {
        u32::from(RANGE_TAB_LPS[usize::from(self.state)][((range >> 6) & 3) as usize])
    }

    #[inline(always)]
    fn update_mps(&mut self) {
        self.state = cmp::min(self.state + 1, MAX_STATE);
    }

    #[inline(always)]
    fn update_lps(&mut self) {
        if self.state == 0 {
            self.mps ^= 1;
        }
        self.state = TRANS_IDX_LPS[usize::from(self.state)];
    }
}

/// CABAC encoder from H.264. Carries are resolved with an outstanding-bit counter instead of
/// touching bytes that were already written.
pub struct H264Writer<W> {
    writer: BitWriter<W>,
    low: u32,
    range: u32,
    outstanding: u64,
    first_bit: bool,
    terminated: bool,
}

impl<W: Write> H264Writer<W> {
    pub fn new(writer: W) -> Self {
        H264Writer {
            writer: BitWriter::new(writer),
            low: 0,
            range: INITIAL_RANGE,
            outstanding: 0,
            first_bit: true,
            terminated: false,
        }
    }

    /// encodes the terminating bin. A true value marks the end of the segment and must be
    /// followed by `finish`.
    pub fn put_terminate(&mut self, value: bool) -> Result<()> {
        self.range -= 2;

        if value {
            self.low += self.range;
            self.range = 2;
            self.terminated = true;
        }

        self.renormalize()
    }

    /// number of bits committed to the sink so far
    pub fn bits_written(&self) -> u64 {
        self.writer.bits_written()
    }

    /// returns the sink, only meaningful after `finish`
    pub fn into_inner(self) -> W {
        self.writer.into_inner()
    }

    /// the very first bit coming out of the 10 bit low register is always zero and
    /// is never written, the decoder only reads 9 bits to start
    #[inline(always)]
    fn put_bit(&mut self, bit: bool) -> Result<()> {
        if self.first_bit {
            self.first_bit = false;
        } else {
            self.writer.put_bit(bit)?;
        }

        if self.outstanding > 0 {
            self.writer.put_repeated(!bit, self.outstanding)?;
            self.outstanding = 0;
        }

        Ok(())
    }

    #[inline(always)]
    fn renormalize(&mut self) -> Result<()> {
        while self.range < RENORM_FLOOR {
            if self.low < 256 {
                self.put_bit(false)?;
            } else if self.low >= 512 {
                self.low -= 512;
                self.put_bit(true)?;
            } else {
                self.low -= 256;
                self.outstanding += 1;
            }

            self.range <<= 1;
            self.low <<= 1;
        }

        Ok(())
    }
}

impl<W: Write> CabacWriter<H264Context> for H264Writer<W> {
    fn put_bypass(&mut self, value: bool) -> Result<()> {
        self.low <<= 1;
        if value {
            self.low += self.range;
        }

        if self.low >= 1024 {
            self.low -= 1024;
            self.put_bit(true)?;
        } else if self.low < 512 {
            self.put_bit(false)?;
        } else {
            self.low -= 512;
            self.outstanding += 1;
        }

        Ok(())
    }

    fn put(&mut self, value: bool, cur_ctx: &mut H264Context) -> Result<()> {
        let lps = cur_ctx.lps_range(self.range);

        self.range -= lps;

        if value != cur_ctx.mps() {
            self.low += self.range;
            self.range = lps;

            cur_ctx.update_lps();
        } else {
            cur_ctx.update_mps();

            if self.range >= RENORM_FLOOR {
                return Ok(());
            }
        }

        self.renormalize()
    }

    fn finish(&mut self) -> Result<()> {
        if !self.terminated {
            // pick the bottom of the current interval so the final value needs no extra precision
            self.range = 2;
            self.renormalize()?;
        }

        self.put_bit((self.low >> 9) & 1 != 0)?;
        self.writer.put_bit((self.low >> 8) & 1 != 0)?;

        // stop bit, then zeros up to the byte boundary
        self.writer.put_bit(true)?;
        self.writer.pad_to_byte()?;
        self.writer.flush()?;

        debug!(
            "h264 segment finished: {0} bytes, terminated={1}",
            self.writer.bits_written() / 8,
            self.terminated
        );

        Ok(())
    }
}

/// CABAC decoder from H.264. The code register holds the 9 bit offset scaled by 2^7 with up
/// to 7 bits of lookahead below it.
pub struct H264Reader<R> {
    reader: ByteSource<R>,
    value: u32,
    range: u32,
    bits_needed: i32,
}

impl<R: Read> H264Reader<R> {
    pub fn new(reader: R) -> Result<Self> {
        let mut r = H264Reader {
            reader: ByteSource::new(reader),
            value: 0,
            range: INITIAL_RANGE,
            bits_needed: 8,
        };

        r.value = (u32::from(r.reader.next_byte_or_zero()?) << 8)
            | u32::from(r.reader.next_byte_or_zero()?);
        r.bits_needed -= 16;

        trace!("h264 reader primed, value={0:#x}", r.value);

        Ok(r)
    }

    /// decodes the terminating bin. True means the segment ended and nothing else is read.
    pub fn get_terminate(&mut self) -> Result<bool> {
        self.range -= 2;

        let scaled_range = self.range << 7;

        if self.value < scaled_range {
            if self.range < RENORM_FLOOR {
                self.range <<= 1;
                self.shift_in_one()?;
            }

            Ok(false)
        } else {
            trace!("h264 end of segment after {0} bytes", self.reader.bytes_consumed());
            Ok(true)
        }
    }

    /// true once the decoder has started substituting padding for missing input
    pub fn is_exhausted(&self) -> bool {
        self.reader.is_exhausted()
    }

    #[inline(always)]
    fn shift_in_one(&mut self) -> Result<()> {
        self.value <<= 1;
        self.bits_needed += 1;

        if self.bits_needed == 0 {
            self.bits_needed = -8;
            self.value |= u32::from(self.reader.next_byte_or_zero()?);
        }

        Ok(())
    }
}

impl<R: Read> CabacReader<H264Context> for H264Reader<R> {
    fn get_bypass(&mut self) -> Result<bool> {
        self.shift_in_one()?;

        let scaled_range = self.range << 7;

        let r = self.value.overflowing_sub(scaled_range);

        if r.1 {
            Ok(false)
        } else {
            self.value = r.0;
            Ok(true)
        }
    }

    fn get(&mut self, cur_ctx: &mut H264Context) -> Result<bool> {
        let lps = cur_ctx.lps_range(self.range);

        let mut range = self.range - lps;

        let scaled_range = range << 7;

        let r = self.value.overflowing_sub(scaled_range);

        let bit;

        if r.1 {
            // MPS path

            bit = cur_ctx.mps();

            cur_ctx.update_mps();

            self.range = range;

            if range < RENORM_FLOOR {
                // a single doubling always suffices after an MPS
                self.range = range << 1;
                self.shift_in_one()?;
            }
        } else {
            // LPS path

            let num_bits = RENORM_TABLE[(lps >> 3) as usize];
            let mut value = r.0 << num_bits;
            range = lps << num_bits;

            bit = !cur_ctx.mps();

            cur_ctx.update_lps();

            self.bits_needed += i32::from(num_bits);

            if self.bits_needed >= 0 {
                value |= u32::from(self.reader.next_byte_or_zero()?) << self.bits_needed;
                self.bits_needed -= 8;
            }

            self.range = range;
            self.value = value;
        }

        Ok(bit)
    }
}

#[cfg(test)]
fn encode_sequence(bits: &[bool], ctx: &mut H264Context) -> Vec<u8> {
    let mut writer = H264Writer::new(Vec::new());
    for &b in bits {
        writer.put(b, ctx).unwrap();
    }
    writer.finish().unwrap();
    writer.into_inner()
}

#[test]
fn single_context_scenario() {
    let bits = [false, false, true, false, true, true, false, true];

    let mut enc_ctx = H264Context::new(0, false);
    let output = encode_sequence(&bits, &mut enc_ctx);

    let mut dec_ctx = H264Context::new(0, false);
    let mut reader = H264Reader::new(&output[..]).unwrap();
    for &b in bits.iter() {
        assert_eq!(reader.get(&mut dec_ctx).unwrap(), b);
    }

    assert_eq!(enc_ctx, dec_ctx);

    // a second independent run must land in exactly the same place
    let mut again = H264Context::new(0, false);
    assert_eq!(encode_sequence(&bits, &mut again), output);
    assert_eq!(again, enc_ctx);
}

#[test]
fn state_zero_lps_flips_mps() {
    let mut ctx = H264Context::new(0, false);
    ctx.update_lps();
    assert_eq!(ctx, H264Context::new(0, true));

    let mut ctx = H264Context::new(10, true);
    ctx.update_lps();
    assert_eq!(ctx, H264Context::new(8, true));

    let mut ctx = H264Context::new(MAX_STATE, false);
    ctx.update_mps();
    assert_eq!(ctx.state(), MAX_STATE);
}

#[test]
fn init_values_follow_the_standard_formula() {
    // (m, n) = (0, 64) is the equiprobable initialization
    assert_eq!(H264Context::from_init_values(0, 64, 26), H264Context::new(0, true));
    assert_eq!(H264Context::from_init_values(0, 63, 26), H264Context::new(0, false));

    // ((20 * 26) >> 4) - 15 = 17 -> state 46 with mps 0
    assert_eq!(H264Context::from_init_values(20, -15, 26), H264Context::new(46, false));

    // clipped at the upper end
    assert_eq!(H264Context::from_init_values(0, 200, 26), H264Context::new(MAX_STATE, true));
    assert_eq!(H264Context::from_init_values(0, -200, 26), H264Context::new(MAX_STATE, false));
}

#[test]
fn terminate_then_finish() {
    let mut ctx = H264Context::default();
    let mut writer = H264Writer::new(Vec::new());
    for i in 0..300 {
        writer.put(i % 7 == 0, &mut ctx).unwrap();
        writer.put_terminate(false).unwrap();
    }
    writer.put_terminate(true).unwrap();
    writer.finish().unwrap();
    let output = writer.into_inner();

    let mut ctx = H264Context::default();
    let mut reader = H264Reader::new(&output[..]).unwrap();
    for i in 0..300 {
        assert_eq!(reader.get(&mut ctx).unwrap(), i % 7 == 0);
        assert!(!reader.get_terminate().unwrap());
    }
    assert!(reader.get_terminate().unwrap());
}

#[test]
fn empty_segment() {
    let mut writer = H264Writer::new(Vec::new());
    writer.put_terminate(true).unwrap();
    writer.finish().unwrap();
    let output = writer.into_inner();

    let mut reader = H264Reader::new(&output[..]).unwrap();
    assert!(reader.get_terminate().unwrap());
}

#[test]
fn truncated_input_decodes_as_zero_bits() {
    let mut reader = H264Reader::new(&[][..]).unwrap();
    let mut ctx = H264Context::default();
    for _ in 0..100 {
        let _ = reader.get(&mut ctx).unwrap();
        let _ = reader.get_bypass().unwrap();
    }
    assert!(reader.is_exhausted());
}
