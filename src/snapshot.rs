//! Saving and restoring sets of contexts as plain bytes.
//!
//! Contexts outlive a single coded segment, and some formats restart a segment from a
//! previously stored adaptation state (or hand the state to an independent coder). The stored
//! form is simply the `(state, mps)` byte pairs in order.
use std::io::{Error, ErrorKind, Result};

use bytemuck::Pod;

use crate::h264::H264Context;
use crate::mq::MqContext;

/// context type that can be stored as raw bytes and checked when it comes back
pub trait ContextState: Pod {
    /// true if the state indexes validly into the transition tables of its coder
    fn is_valid(&self) -> bool;
}

impl ContextState for H264Context {
    fn is_valid(&self) -> bool {
        H264Context::is_valid(self)
    }
}

impl ContextState for MqContext {
    fn is_valid(&self) -> bool {
        MqContext::is_valid(self)
    }
}

/// byte view of a context set
pub fn as_bytes<C: ContextState>(contexts: &[C]) -> &[u8] {
    bytemuck::cast_slice(contexts)
}

pub fn save<C: ContextState>(contexts: &[C]) -> Vec<u8> {
    as_bytes(contexts).to_vec()
}

/// overwrites `contexts` with a previously saved set. Nothing is modified unless the whole
/// set has the right size and every entry is a valid state.
pub fn restore<C: ContextState>(bytes: &[u8], contexts: &mut [C]) -> Result<()> {
    if bytes.len() != size_of_val(contexts) {
        return Err(Error::new(
            ErrorKind::InvalidData,
            format!(
                "saved context set has {0} bytes, expected {1}",
                bytes.len(),
                size_of_val(contexts)
            ),
        ));
    }

    let saved: &[C] = bytemuck::try_cast_slice(bytes)
        .map_err(|e| Error::new(ErrorKind::InvalidData, format!("{e:?}")))?;

    if let Some(i) = saved.iter().position(|c| !c.is_valid()) {
        return Err(Error::new(
            ErrorKind::InvalidData,
            format!("saved context {0} is out of range", i),
        ));
    }

    contexts.copy_from_slice(saved);
    Ok(())
}

#[test]
fn save_and_restore_h264() {
    use crate::h264::H264Writer;
    use crate::traits::CabacWriter;

    let mut contexts = [H264Context::default(); 16];
    let mut writer = H264Writer::new(Vec::new());
    for i in 0..1000 {
        writer.put(i % 3 == 0, &mut contexts[i % 16]).unwrap();
    }

    let saved = save(&contexts);
    assert_eq!(saved.len(), 32);

    let mut restored = [H264Context::default(); 16];
    restore(&saved, &mut restored).unwrap();
    assert_eq!(restored, contexts);
}

#[test]
fn restore_rejects_bad_input() {
    let mut contexts = [MqContext::default(); 4];

    assert!(restore(&[0u8; 7], &mut contexts).is_err());

    let mut saved = save(&[MqContext::UNIFORM; 4]);
    saved[2] = 47;
    assert_eq!(
        restore(&saved, &mut contexts).unwrap_err().kind(),
        ErrorKind::InvalidData
    );
    assert_eq!(contexts, [MqContext::default(); 4]);

    saved[2] = 46;
    saved[3] = 2;
    assert!(restore(&saved, &mut contexts).is_err());

    saved[3] = 1;
    restore(&saved, &mut contexts).unwrap();
    assert_eq!(contexts[1], MqContext::new(46, true));
}
