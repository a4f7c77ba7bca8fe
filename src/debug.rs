//! Tracing implementation of the cabac reader and writer.
//!
//! Instead of coding anything it records, for every bin, which context was used and what value
//! was written. The reader checks that it is handed the same context at the same position. A
//! binarization whose decoder walks its contexts in a different order than its encoder produces
//! streams that mostly decode fine and then silently diverge, so this is the cheapest way to
//! catch that class of bug.
use std::io::{Error, ErrorKind, Read, Result, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::traits::{CabacReader, CabacWriter};

const TAG_CONTEXT: u8 = 1;
const TAG_BYPASS: u8 = 2;

/// identity of a context. Gets a fresh id the first time it is used and a new one after every
/// use, so that handing in a copy or a neighbouring context is detected.
#[derive(Default, Clone, Copy, Debug)]
pub struct DebugContext {
    id: u32,
}

/// counts ids so that writer and reader hand them out identically
struct IdSource {
    counter: u32,
}

impl IdSource {
    fn touch(&mut self, ctx: &mut DebugContext) -> u32 {
        if ctx.id == 0 {
            self.counter += 1;
            ctx.id = self.counter;
        }

        let seen = ctx.id;
        self.counter += 1;
        ctx.id = self.counter;
        seen
    }
}

fn mismatch(position: u64, what: String) -> Error {
    Error::new(
        ErrorKind::InvalidData,
        format!("bin {0}: {1}", position, what),
    )
}

/// Decoder for debugging purposes only. Fails with `InvalidData` at the first bin whose kind or
/// context differs from what the writer recorded.
pub struct DebugReader<R> {
    reader: R,
    ids: IdSource,
    position: u64,
}

impl<R: Read> DebugReader<R> {
    pub fn new(reader: R) -> Self {
        DebugReader {
            reader,
            ids: IdSource { counter: 100 },
            position: 0,
        }
    }

    fn expect_tag(&mut self, tag: u8) -> Result<()> {
        let found = self.reader.read_u8()?;
        if found != tag {
            return Err(mismatch(
                self.position,
                format!("expected bin kind {0}, stream has {1}", tag, found),
            ));
        }
        Ok(())
    }
}

impl<R: Read> CabacReader<DebugContext> for DebugReader<R> {
    fn get(&mut self, branch: &mut DebugContext) -> Result<bool> {
        self.expect_tag(TAG_CONTEXT)?;

        let expected = self.reader.read_u32::<LittleEndian>()?;
        let seen = self.ids.touch(branch);
        if seen != expected {
            return Err(mismatch(
                self.position,
                format!("context {0} used where {1} was written", seen, expected),
            ));
        }

        self.position += 1;
        Ok(self.reader.read_u8()? != 0)
    }

    fn get_bypass(&mut self) -> Result<bool> {
        self.expect_tag(TAG_BYPASS)?;

        self.position += 1;
        Ok(self.reader.read_u8()? != 0)
    }
}

/// Encoder for debugging purposes only.
pub struct DebugWriter<W> {
    writer: W,
    ids: IdSource,
}

impl<W: Write> DebugWriter<W> {
    pub fn new(writer: W) -> Self {
        DebugWriter {
            writer,
            ids: IdSource { counter: 100 },
        }
    }
}

impl<W: Write> CabacWriter<DebugContext> for DebugWriter<W> {
    fn put(&mut self, value: bool, branch: &mut DebugContext) -> Result<()> {
        let seen = self.ids.touch(branch);

        self.writer.write_u8(TAG_CONTEXT)?;
        self.writer.write_u32::<LittleEndian>(seen)?;
        self.writer.write_u8(u8::from(value))?;
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        self.writer.flush()
    }

    fn put_bypass(&mut self, value: bool) -> Result<()> {
        self.writer.write_u8(TAG_BYPASS)?;
        self.writer.write_u8(u8::from(value))?;
        Ok(())
    }
}

#[test]
fn binarizations_visit_mirrored_contexts() {
    let mut output = Vec::with_capacity(1000);
    let mut writer = DebugWriter::new(&mut output);
    let mut context = [DebugContext::default(); 8];
    let mut tree = [DebugContext::default(); 255];

    for i in 0..100 {
        writer.put(i & 1 == 1, &mut context[i % 4]).unwrap();
        writer.put_bypass(i & 1 == 1).unwrap();
        writer.put_n_bits(0x456, 24, &mut context).unwrap();
        writer.put_unary_encoded(i, &mut context).unwrap();
        writer.put_tree((i * 3) as u8, &mut tree).unwrap();
        writer.put_exp_golomb_bypass(i as u32 * 77, 2).unwrap();
    }

    writer.finish().unwrap();

    let mut reader = DebugReader::new(&output[..]);
    context.fill(DebugContext::default());
    tree.fill(DebugContext::default());

    for i in 0..100 {
        assert_eq!(reader.get(&mut context[i % 4]).unwrap(), i & 1 == 1);
        assert_eq!(reader.get_bypass().unwrap(), i & 1 == 1);
        assert_eq!(reader.get_n_bits(24, &mut context).unwrap(), 0x456);
        assert_eq!(reader.get_unary_encoded(&mut context).unwrap(), i);
        assert_eq!(reader.get_tree(&mut tree).unwrap(), (i * 3) as u8);
        assert_eq!(reader.get_exp_golomb_bypass(2).unwrap(), i as u32 * 77);
    }
}

#[test]
fn wrong_context_is_reported() {
    let mut output = Vec::new();
    let mut writer = DebugWriter::new(&mut output);
    let mut context = [DebugContext::default(); 2];
    writer.put(true, &mut context[0]).unwrap();
    writer.put(true, &mut context[1]).unwrap();
    writer.put(false, &mut context[0]).unwrap();
    writer.finish().unwrap();

    let mut reader = DebugReader::new(&output[..]);
    let mut context = [DebugContext::default(); 2];
    assert!(reader.get(&mut context[0]).unwrap());
    assert!(reader.get(&mut context[1]).unwrap());

    let err = reader.get(&mut context[1]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidData);
}

#[test]
fn bypass_in_place_of_context_is_reported() {
    let mut output = Vec::new();
    let mut writer = DebugWriter::new(&mut output);
    writer.put_bypass(true).unwrap();
    writer.finish().unwrap();

    let mut reader = DebugReader::new(&output[..]);
    let mut ctx = DebugContext::default();
    assert!(reader.get(&mut ctx).is_err());
}
