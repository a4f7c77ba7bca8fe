//! MQ arithmetic coder as used by JPEG2000 (ITU-T T.800 Annex C) and JBIG2 (ITU-T T.88 Annex E).
//!
//! Compared to the H.264 coder the range register is 16 bits wide, the LPS probability only depends
//! on the state, and carries are absorbed by bit stuffing: after a 0xFF byte the next byte only
//! carries 7 bits so a carry can never ripple further back and no marker (0xFF followed by a byte
//! above 0x8F) can appear in the coded data.
use std::io::{Read, Result, Write};

use byteorder::WriteBytesExt;
use bytemuck::{Pod, Zeroable};
use log::{debug, trace};

use crate::bitio::ByteSource;
use crate::traits::{CabacReader, CabacWriter};

/// number of probability states
pub const NUM_STATES: usize = 47;

const INITIAL_RANGE: u32 = 0x8000;
const STUFFING_BYTE: u8 = 0xff;

/// one row of the probability estimation table
struct QeEntry {
    qe: u32,
    nmps: u8,
    nlps: u8,
    switch: bool,
}

macro_rules! qe {
    ($qe:expr, $nmps:expr, $nlps:expr, $sw:expr) => {
        QeEntry {
            qe: $qe,
            nmps: $nmps,
            nlps: $nlps,
            switch: $sw != 0,
        }
    };
}

#[rustfmt::skip]
static QE_TABLE: [QeEntry; NUM_STATES] = [
    qe!(0x5601, 1, 1, 1),
    qe!(0x3401, 2, 6, 0),
    qe!(0x1801, 3, 9, 0),
    qe!(0x0ac1, 4, 12, 0),
    qe!(0x0521, 5, 29, 0),
    qe!(0x0221, 38, 33, 0),
    qe!(0x5601, 7, 6, 1),
    qe!(0x5401, 8, 14, 0),
    qe!(0x4801, 9, 14, 0),
    qe!(0x3801, 10, 14, 0),
    qe!(0x3001, 11, 17, 0),
    qe!(0x2401, 12, 18, 0),
    qe!(0x1c01, 13, 20, 0),
    qe!(0x1601, 29, 21, 0),
    qe!(0x5601, 15, 14, 1),
    qe!(0x5401, 16, 14, 0),
    qe!(0x5101, 17, 15, 0),
    qe!(0x4801, 18, 16, 0),
    qe!(0x3801, 19, 17, 0),
    qe!(0x3401, 20, 18, 0),
    qe!(0x3001, 21, 19, 0),
    qe!(0x2801, 22, 19, 0),
    qe!(0x2401, 23, 20, 0),
    qe!(0x2201, 24, 21, 0),
    qe!(0x1c01, 25, 22, 0),
    qe!(0x1801, 26, 23, 0),
    qe!(0x1601, 27, 24, 0),
    qe!(0x1401, 28, 25, 0),
    qe!(0x1201, 29, 26, 0),
    qe!(0x1101, 30, 27, 0),
    qe!(0x0ac1, 31, 28, 0),
    qe!(0x09c1, 32, 29, 0),
    qe!(0x08a1, 33, 30, 0),
    qe!(0x0521, 34, 31, 0),
    qe!(0x0441, 35, 32, 0),
    qe!(0x02a1, 36, 33, 0),
    qe!(0x0221, 37, 34, 0),
    qe!(0x0141, 38, 35, 0),
    qe!(0x0111, 39, 36, 0),
    qe!(0x0085, 40, 37, 0),
    qe!(0x0049, 41, 38, 0),
    qe!(0x0025, 42, 39, 0),
    qe!(0x0015, 43, 40, 0),
    qe!(0x0009, 44, 41, 0),
    qe!(0x0005, 45, 42, 0),
    qe!(0x0001, 45, 43, 0),
    qe!(0x5601, 46, 46, 0),
];

/// probability state of the MQ coder: index into the Qe table plus the current MPS
#[repr(C)]
#[derive(Default, Copy, Clone, Debug, Eq, PartialEq, Pod, Zeroable)]
pub struct MqContext {
    state: u8,
    mps: u8,
}

impl MqContext {
    /// non-adapting context with a probability of one half, used for bypass bins
    pub const UNIFORM: MqContext = MqContext { state: 46, mps: 0 };

    /// initial state of the JPEG2000 run-length context
    pub const RUN_LENGTH: MqContext = MqContext { state: 3, mps: 0 };

    /// initial state of the JPEG2000 significance context with all neighbours insignificant
    pub const ZERO_NEIGHBORS: MqContext = MqContext { state: 4, mps: 0 };

    pub fn new(state: u8, mps: bool) -> Self {
        assert!(usize::from(state) < NUM_STATES);
        MqContext {
            state,
            mps: u8::from(mps),
        }
    }

    pub fn state(&self) -> u8 {
        self.state
    }

    pub fn mps(&self) -> bool {
        self.mps != 0
    }

    pub(crate) fn is_valid(&self) -> bool {
        usize::from(self.state) < NUM_STATES && self.mps <= 1
    }

    #[inline(always)]
    fn entry(&self) -> &'static QeEntry {
        &QE_TABLE[usize::from(self.state)]
    }

    #[inline(always)]
    fn switch_to_mps(&mut self, entry: &QeEntry) {
        self.state = entry.nmps;
    }

    #[inline(always)]
    fn switch_to_lps(&mut self, entry: &QeEntry) {
        if entry.switch {
            self.mps ^= 1;
        }
        self.state = entry.nlps;
    }
}

/// MQ encoder. The most recent output byte is held back so that a carry out of the code
/// register can still be added to it.
pub struct MqWriter<W> {
    writer: W,
    a: u32,
    c: u32,
    ct: u32,
    b: u8,
    has_pending: bool,
    bytes_written: u64,
}

impl<W: Write> MqWriter<W> {
    pub fn new(writer: W) -> Self {
        MqWriter {
            writer,
            a: INITIAL_RANGE,
            c: 0,
            ct: 12,
            b: 0,
            has_pending: false,
            bytes_written: 0,
        }
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    /// returns the sink, only meaningful after `finish`
    pub fn into_inner(self) -> W {
        self.writer
    }

    fn commit_pending(&mut self) -> Result<()> {
        if self.has_pending {
            self.writer.write_u8(self.b)?;
            self.bytes_written += 1;
        }
        self.has_pending = true;
        Ok(())
    }

    /// moves the next byte out of the code register, with only 7 bits of payload after 0xff
    fn byte_out(&mut self) -> Result<()> {
        if self.b == STUFFING_BYTE {
            return self.emit_stuffed();
        }

        if self.c >= 0x800_0000 {
            // carry into the pending byte. The initial dummy byte never sees one.
            self.b += 1;

            if self.b == STUFFING_BYTE {
                self.c &= 0x7ff_ffff;
                return self.emit_stuffed();
            }
        }

        self.commit_pending()?;
        self.b = (self.c >> 19) as u8;
        self.c &= 0x7_ffff;
        self.ct = 8;
        Ok(())
    }

    fn emit_stuffed(&mut self) -> Result<()> {
        self.commit_pending()?;
        self.b = (self.c >> 20) as u8;
        self.c &= 0xf_ffff;
        self.ct = 7;
        Ok(())
    }

    #[inline(always)]
    fn renormalize(&mut self) -> Result<()> {
        loop {
            self.a <<= 1;
            self.c <<= 1;
            self.ct -= 1;

            if self.ct == 0 {
                self.byte_out()?;
            }

            if self.a & 0x8000 != 0 {
                return Ok(());
            }
        }
    }
}

impl<W: Write> CabacWriter<MqContext> for MqWriter<W> {
    fn put_bypass(&mut self, value: bool) -> Result<()> {
        let mut uniform = MqContext::UNIFORM;
        self.put(value, &mut uniform)
    }

    fn put(&mut self, value: bool, cur_ctx: &mut MqContext) -> Result<()> {
        let entry = cur_ctx.entry();
        let qe = entry.qe;

        self.a -= qe;

        if value == cur_ctx.mps() {
            if self.a & 0x8000 != 0 {
                self.c += qe;
                return Ok(());
            }

            // conditional exchange: the MPS gets the larger of the two sub-intervals
            if self.a < qe {
                self.a = qe;
            } else {
                self.c += qe;
            }

            cur_ctx.switch_to_mps(entry);
        } else {
            if self.a < qe {
                self.c += qe;
            } else {
                self.a = qe;
            }

            cur_ctx.switch_to_lps(entry);
        }

        self.renormalize()
    }

    fn finish(&mut self) -> Result<()> {
        // pick the value inside [C, C + A) with the most trailing one bits
        let temp_c = self.c + self.a;
        self.c |= 0xffff;
        if self.c >= temp_c {
            self.c -= 0x8000;
        }

        self.c <<= self.ct;
        self.byte_out()?;
        self.c <<= self.ct;
        self.byte_out()?;

        // a trailing 0xff is implied by the decoder's end of data handling
        if self.b != STUFFING_BYTE {
            self.commit_pending()?;
        }

        self.writer.flush()?;

        debug!("mq segment finished: {0} bytes", self.bytes_written);

        Ok(())
    }
}

/// MQ decoder following the software conventions of T.88 Annex G: the code register keeps the
/// complement of the code stream, so padding at the end of data means adding nothing.
pub struct MqReader<R> {
    reader: ByteSource<R>,
    a: u32,
    c: u32,
    ct: u32,
    last: u8,
    at_end: bool,
}

impl<R: Read> MqReader<R> {
    pub fn new(reader: R) -> Result<Self> {
        let mut r = MqReader {
            reader: ByteSource::new(reader),
            a: INITIAL_RANGE,
            c: 0,
            ct: 0,
            last: STUFFING_BYTE,
            at_end: false,
        };

        match r.reader.next_byte()? {
            Some(b) => {
                r.last = b;
                r.c = u32::from(b ^ 0xff) << 16;
            }
            None => r.at_end = true,
        }

        r.byte_in()?;
        r.c <<= 7;
        r.ct -= 7;

        trace!("mq reader primed, c={0:#x}", r.c);

        Ok(r)
    }

    /// true once a marker or the end of input has been reached
    pub fn is_at_end(&self) -> bool {
        self.at_end
    }

    fn byte_in(&mut self) -> Result<()> {
        if self.at_end {
            self.ct = 8;
            return Ok(());
        }

        match self.reader.next_byte()? {
            None => {
                trace!("mq input exhausted");
                self.at_end = true;
                self.ct = 8;
            }
            Some(b) if self.last == STUFFING_BYTE => {
                if b > 0x8f {
                    trace!("mq marker {0:#04x} terminates the code stream", b);
                    self.at_end = true;
                    self.ct = 8;
                } else {
                    self.last = b;
                    self.c = self
                        .c
                        .wrapping_add(0xfe00)
                        .wrapping_sub(u32::from(b) << 9);
                    self.ct = 7;
                }
            }
            Some(b) => {
                self.last = b;
                self.c = self
                    .c
                    .wrapping_add(0xff00)
                    .wrapping_sub(u32::from(b) << 8);
                self.ct = 8;
            }
        }

        Ok(())
    }

    #[inline(always)]
    fn renormalize(&mut self) -> Result<()> {
        loop {
            if self.ct == 0 {
                self.byte_in()?;
            }

            self.a <<= 1;
            self.c <<= 1;
            self.ct -= 1;

            if self.a & 0x8000 != 0 {
                return Ok(());
            }
        }
    }
}

impl<R: Read> CabacReader<MqContext> for MqReader<R> {
    fn get_bypass(&mut self) -> Result<bool> {
        let mut uniform = MqContext::UNIFORM;
        self.get(&mut uniform)
    }

    fn get(&mut self, cur_ctx: &mut MqContext) -> Result<bool> {
        let entry = cur_ctx.entry();
        let qe = entry.qe;

        self.a -= qe;

        let bit;

        if (self.c >> 16) < self.a {
            if self.a & 0x8000 != 0 {
                return Ok(cur_ctx.mps());
            }

            // MPS exchange
            if self.a < qe {
                bit = !cur_ctx.mps();
                cur_ctx.switch_to_lps(entry);
            } else {
                bit = cur_ctx.mps();
                cur_ctx.switch_to_mps(entry);
            }
        } else {
            self.c -= self.a << 16;

            // LPS exchange
            if self.a < qe {
                bit = cur_ctx.mps();
                cur_ctx.switch_to_mps(entry);
            } else {
                bit = !cur_ctx.mps();
                cur_ctx.switch_to_lps(entry);
            }

            self.a = qe;
        }

        self.renormalize()?;

        Ok(bit)
    }
}

#[cfg(test)]
fn mq_encode(bits: &[(bool, usize)], contexts: &mut [MqContext]) -> Vec<u8> {
    let mut writer = MqWriter::new(Vec::new());
    for &(b, c) in bits {
        writer.put(b, &mut contexts[c]).unwrap();
    }
    writer.finish().unwrap();
    writer.into_inner()
}

#[test]
fn table_is_closed() {
    for (i, e) in QE_TABLE.iter().enumerate() {
        assert!(usize::from(e.nmps) < NUM_STATES, "nmps of {0}", i);
        assert!(usize::from(e.nlps) < NUM_STATES, "nlps of {0}", i);
        assert!(e.qe < 0x8000);
    }

    let uniform = &QE_TABLE[usize::from(MqContext::UNIFORM.state)];
    assert_eq!((uniform.nmps, uniform.nlps, uniform.switch), (46, 46, false));
}

#[test]
fn no_marker_in_output() {
    let mut seq = Vec::new();
    for i in 0..20000usize {
        seq.push((i % 3 != 0 || i % 17 == 0, i % 5));
    }

    let mut contexts = [MqContext::default(); 5];
    let output = mq_encode(&seq, &mut contexts);

    for w in output.windows(2) {
        assert!(!(w[0] == 0xff && w[1] > 0x8f), "marker in coded data");
    }

    let mut dec_contexts = [MqContext::default(); 5];
    let mut reader = MqReader::new(&output[..]).unwrap();
    for &(b, c) in seq.iter() {
        assert_eq!(reader.get(&mut dec_contexts[c]).unwrap(), b);
    }
    assert_eq!(contexts, dec_contexts);
}

#[test]
fn trailing_marker_stops_input() {
    let seq: Vec<(bool, usize)> = (0..500).map(|i| (i % 11 == 0, 0)).collect();
    let mut contexts = [MqContext::default()];
    let mut output = mq_encode(&seq, &mut contexts);

    // JBIG2 style end of stripe marker, followed by garbage that must never be read
    output.extend_from_slice(&[0xff, 0xac, 0x12, 0x34, 0x56]);

    let mut contexts = [MqContext::default()];
    let mut reader = MqReader::new(&output[..]).unwrap();
    for &(b, c) in seq.iter() {
        assert_eq!(reader.get(&mut contexts[c]).unwrap(), b);
    }
}

#[test]
fn lps_on_state_zero_switches_mps() {
    let mut ctx = MqContext::default();
    let entry = ctx.entry();
    ctx.switch_to_lps(entry);
    assert_eq!(ctx, MqContext::new(1, true));

    let mut ctx = MqContext::new(2, true);
    let entry = ctx.entry();
    ctx.switch_to_lps(entry);
    assert_eq!(ctx, MqContext::new(9, true));
}

#[test]
fn empty_segment() {
    let output = mq_encode(&[], &mut []);
    assert_eq!(output, [0xff, 0x7f]);

    let reader = MqReader::new(&output[..]).unwrap();
    assert!(!reader.is_at_end());
}

#[test]
fn empty_input_decodes() {
    let mut reader = MqReader::new(&[][..]).unwrap();
    assert!(reader.is_at_end());

    let mut ctx = MqContext::default();
    let first: Vec<bool> = (0..200).map(|_| reader.get(&mut ctx).unwrap()).collect();

    let mut reader = MqReader::new(&[][..]).unwrap();
    let mut ctx = MqContext::default();
    let again: Vec<bool> = (0..200).map(|_| reader.get(&mut ctx).unwrap()).collect();

    assert_eq!(first, again);
}

#[test]
fn truncated_input_decodes() {
    let seq: Vec<(bool, usize)> = (0..6000).map(|i| (i % 7 == 0 || i % 13 == 0, i % 3)).collect();
    let mut contexts = [MqContext::default(); 3];
    let output = mq_encode(&seq, &mut contexts);

    for cut in [0, 1, 2, 3, output.len() / 2] {
        let decode = || {
            let mut contexts = [MqContext::default(); 3];
            let mut reader = MqReader::new(&output[..cut]).unwrap();
            let bits: Vec<bool> = seq
                .iter()
                .map(|&(_, c)| reader.get(&mut contexts[c]).unwrap())
                .collect();
            assert!(reader.is_at_end());
            bits
        };

        assert_eq!(decode(), decode(), "cut at {0}", cut);
    }
}
