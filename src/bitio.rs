//! Bit and byte level plumbing shared by the arithmetic coders.
//!
//! `ByteSource` hands out input one byte at a time and reports exhaustion instead of failing,
//! `BitWriter` packs bits MSB-first onto any `Write` sink, and `BitRun` is a small two-word
//! accumulator used when codewords have to be reassembled or reversed before they are emitted.
use std::io::{ErrorKind, Read, Result, Write};

use byteorder::{ReadBytesExt, WriteBytesExt};
use log::trace;

/// sequential byte source. Running off the end is not an error, it is reported as `None`
/// so the coders can substitute their own padding.
pub struct ByteSource<R> {
    reader: R,
    consumed: u64,
    exhausted: bool,
}

impl<R: Read> ByteSource<R> {
    pub fn new(reader: R) -> Self {
        ByteSource {
            reader,
            consumed: 0,
            exhausted: false,
        }
    }

    /// returns the next byte, or `None` once the underlying reader has no more data
    #[inline(always)]
    pub fn next_byte(&mut self) -> Result<Option<u8>> {
        if self.exhausted {
            return Ok(None);
        }

        match self.reader.read_u8() {
            Ok(b) => {
                self.consumed += 1;
                Ok(Some(b))
            }
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => {
                trace!("input exhausted after {0} bytes", self.consumed);
                self.exhausted = true;
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// returns the next byte, substituting zero once the input is exhausted
    #[inline(always)]
    pub fn next_byte_or_zero(&mut self) -> Result<u8> {
        Ok(self.next_byte()?.unwrap_or(0))
    }

    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    /// number of real bytes handed out so far (padding not included)
    pub fn bytes_consumed(&self) -> u64 {
        self.consumed
    }

}

/// MSB-first bit packer on top of a byte sink
pub struct BitWriter<W> {
    writer: W,
    acc: u8,
    used: u32,
    bytes_written: u64,
}

impl<W: Write> BitWriter<W> {
    pub fn new(writer: W) -> Self {
        BitWriter {
            writer,
            acc: 0,
            used: 0,
            bytes_written: 0,
        }
    }

    #[inline(always)]
    pub fn put_bit(&mut self, bit: bool) -> Result<()> {
        self.acc = (self.acc << 1) | u8::from(bit);
        self.used += 1;

        if self.used == 8 {
            self.writer.write_u8(self.acc)?;
            self.bytes_written += 1;
            self.acc = 0;
            self.used = 0;
        }

        Ok(())
    }

    /// writes the lower `num_bits` of `value`, most significant first
    pub fn put_bits(&mut self, value: u32, num_bits: u32) -> Result<()> {
        assert!(num_bits <= 32);

        for i in (0..num_bits).rev() {
            self.put_bit((value >> i) & 1 != 0)?;
        }

        Ok(())
    }

    /// writes `count` copies of `bit`. Whole bytes are written directly once the
    /// accumulator is aligned, so very long runs stay cheap.
    pub fn put_repeated(&mut self, bit: bool, count: u64) -> Result<()> {
        let mut count = count;

        while count > 0 && self.used != 0 {
            self.put_bit(bit)?;
            count -= 1;
        }

        let fill = if bit { 0xff } else { 0x00 };
        let chunk = [fill; 256];
        let mut whole = count / 8;

        while whole > 0 {
            let n = whole.min(chunk.len() as u64);
            self.writer.write_all(&chunk[..n as usize])?;
            self.bytes_written += n;
            whole -= n;
        }

        for _ in 0..count % 8 {
            self.put_bit(bit)?;
        }

        Ok(())
    }

    /// completes a partial byte with zero bits
    pub fn pad_to_byte(&mut self) -> Result<()> {
        if self.used > 0 {
            self.writer.write_u8(self.acc << (8 - self.used))?;
            self.bytes_written += 1;
            self.acc = 0;
            self.used = 0;
        }

        Ok(())
    }

    pub fn is_aligned(&self) -> bool {
        self.used == 0
    }

    pub fn bits_written(&self) -> u64 {
        self.bytes_written * 8 + u64::from(self.used)
    }

    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush()
    }

    /// returns the sink. Bits that have not formed a complete byte yet are dropped,
    /// call `pad_to_byte` first to keep them.
    pub fn into_inner(self) -> W {
        self.writer
    }
}

/// run of up to 64 bits held in a pair of 32 bit words, first bit in the most significant
/// occupied position. Used to stitch codewords together when their order has to be changed
/// before they reach the bitstream.
#[derive(Default, Copy, Clone, Debug, Eq, PartialEq)]
pub struct BitRun {
    hi: u32,
    lo: u32,
    len: u32,
}

#[inline(always)]
fn shl_pair(hi: u32, lo: u32, n: u32) -> (u32, u32) {
    match n {
        0 => (hi, lo),
        1..=31 => ((hi << n) | (lo >> (32 - n)), lo << n),
        32..=63 => (lo << (n - 32), 0),
        _ => (0, 0),
    }
}

#[inline(always)]
fn shr_pair(hi: u32, lo: u32, n: u32) -> (u32, u32) {
    match n {
        0 => (hi, lo),
        1..=31 => (hi >> n, (lo >> n) | (hi << (32 - n))),
        32..=63 => (0, hi >> (n - 32)),
        _ => (0, 0),
    }
}

impl BitRun {
    pub const MAX_BITS: u32 = 64;

    pub fn new() -> Self {
        BitRun::default()
    }

    /// run made of the lower `len` bits of `value`
    pub fn from_bits(value: u32, len: u32) -> Self {
        let mut r = BitRun::new();
        r.push_bits(value, len);
        r
    }

    pub fn len(&self) -> u32 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// bit at `index`, counted from the first bit of the run
    pub fn bit(&self, index: u32) -> bool {
        assert!(index < self.len);

        let pos = self.len - 1 - index;
        if pos >= 32 {
            (self.hi >> (pos - 32)) & 1 != 0
        } else {
            (self.lo >> pos) & 1 != 0
        }
    }

    pub fn push(&mut self, bit: bool) {
        self.push_bits(u32::from(bit), 1);
    }

    /// appends the lower `num_bits` of `value`, most significant first
    pub fn push_bits(&mut self, value: u32, num_bits: u32) {
        assert!(num_bits <= 32);
        assert!(self.len + num_bits <= Self::MAX_BITS, "bit run overflow");

        if num_bits == 0 {
            return;
        }

        let masked = if num_bits == 32 {
            value
        } else {
            value & ((1 << num_bits) - 1)
        };

        let (hi, lo) = shl_pair(self.hi, self.lo, num_bits);
        self.hi = hi;
        self.lo = lo | masked;
        self.len += num_bits;
    }

    /// appends all bits of `other` after the bits of this run
    pub fn append(&mut self, other: &BitRun) {
        assert!(self.len + other.len <= Self::MAX_BITS, "bit run overflow");

        let (hi, lo) = shl_pair(self.hi, self.lo, other.len);
        self.hi = hi | other.hi;
        self.lo = lo | other.lo;
        self.len += other.len;
    }

    pub fn concat(mut self, other: &BitRun) -> BitRun {
        self.append(other);
        self
    }

    /// reverses the order of the bits in the run
    pub fn reverse(&mut self) {
        let (hi, lo) = shr_pair(
            self.lo.reverse_bits(),
            self.hi.reverse_bits(),
            Self::MAX_BITS - self.len,
        );
        self.hi = hi;
        self.lo = lo;
    }

    /// drops the last `num_bits` bits that were pushed
    pub fn rewind(&mut self, num_bits: u32) {
        assert!(num_bits <= self.len);

        let (hi, lo) = shr_pair(self.hi, self.lo, num_bits);
        self.hi = hi;
        self.lo = lo;
        self.len -= num_bits;
    }

    /// removes and returns the first `num_bits` bits of the run
    pub fn split_front(&mut self, num_bits: u32) -> BitRun {
        assert!(num_bits <= self.len);

        let rest = self.len - num_bits;
        let (hi, lo) = shr_pair(self.hi, self.lo, rest);
        let front = BitRun { hi, lo, len: num_bits };

        let (mhi, mlo) = shl_pair(hi, lo, rest);
        self.hi ^= mhi;
        self.lo ^= mlo;
        self.len = rest;

        front
    }

    pub fn write_to<W: Write>(&self, writer: &mut BitWriter<W>) -> Result<()> {
        if self.len > 32 {
            writer.put_bits(self.hi, self.len - 32)?;
            writer.put_bits(self.lo, 32)
        } else {
            writer.put_bits(self.lo, self.len)
        }
    }
}

#[test]
fn bit_writer_packs_msb_first() {
    let mut w = BitWriter::new(Vec::new());
    w.put_bits(0b101, 3).unwrap();
    w.put_repeated(true, 13).unwrap();
    w.put_bit(false).unwrap();
    assert_eq!(w.bits_written(), 17);
    w.pad_to_byte().unwrap();
    assert!(w.is_aligned());

    assert_eq!(w.into_inner(), vec![0b1011_1111, 0b1111_1111, 0b0000_0000]);
}

#[test]
fn bit_writer_long_runs() {
    let mut w = BitWriter::new(Vec::new());
    w.put_bit(true).unwrap();
    w.put_repeated(false, 7 + 8 * 600 + 3).unwrap();
    w.put_repeated(true, 5).unwrap();

    let out = w.into_inner();
    assert_eq!(out.len(), 602);
    assert_eq!(out[0], 0x80);
    assert!(out[1..601].iter().all(|&b| b == 0));
    assert_eq!(out[601], 0b0001_1111);
}

#[test]
fn byte_source_reports_exhaustion() {
    let data = [7u8, 9];
    let mut s = ByteSource::new(&data[..]);

    assert_eq!(s.next_byte().unwrap(), Some(7));
    assert_eq!(s.next_byte_or_zero().unwrap(), 9);
    assert_eq!(s.next_byte().unwrap(), None);
    assert_eq!(s.next_byte_or_zero().unwrap(), 0);
    assert!(s.is_exhausted());
    assert_eq!(s.bytes_consumed(), 2);
}

#[test]
fn bit_run_append_and_reverse() {
    let mut a = BitRun::from_bits(0b1101, 4);
    let b = BitRun::from_bits(0xdead_beef, 32);
    a.append(&b);
    a.push_bits(0x3ffff, 18);
    assert_eq!(a.len(), 54);
    assert!(a.bit(0) && a.bit(1) && !a.bit(2) && a.bit(3));

    let mut r = a;
    r.reverse();
    for i in 0..a.len() {
        assert_eq!(a.bit(i), r.bit(a.len() - 1 - i), "bit {0}", i);
    }

    r.reverse();
    assert_eq!(r, a);
}

#[test]
fn bit_run_rewind_and_split() {
    let mut a = BitRun::from_bits(0b1011, 4).concat(&BitRun::from_bits(0x1234_5678, 32));
    a.rewind(8);
    assert_eq!(a.len(), 28);

    let front = a.split_front(4);
    assert_eq!(front, BitRun::from_bits(0b1011, 4));
    assert_eq!(a, BitRun::from_bits(0x0012_3456, 24));

    let mut w = BitWriter::new(Vec::new());
    front.write_to(&mut w).unwrap();
    a.write_to(&mut w).unwrap();
    w.pad_to_byte().unwrap();
    assert_eq!(w.into_inner(), vec![0xb1, 0x23, 0x45, 0x60]);
}
