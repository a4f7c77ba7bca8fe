use std::io::Cursor;

use bincoder::h264::{H264Context, H264Reader, H264Writer};
use bincoder::mq::{MqContext, MqReader, MqWriter};
use bincoder::traits::{CabacReader, CabacWriter, TREE_CONTEXTS};

fn set_bits<CONTEXT, CW: CabacWriter<CONTEXT>>(
    writer: &mut CW,
    context: &mut CONTEXT,
    pattern: u64,
    num_bits: u8,
    bypass_index: u8,
) {
    for i in 0..num_bits {
        let v = (pattern & (1 << i)) != 0;
        if i == bypass_index {
            writer.put_bypass(v).unwrap();
        } else {
            writer.put(v, context).unwrap();
        }
    }

    writer.finish().unwrap();
}

fn test_bits<CONTEXT, CR: CabacReader<CONTEXT>>(
    reader: &mut CR,
    context: &mut CONTEXT,
    pattern: u64,
    num_bits: u8,
    bypass_index: u8,
) {
    for i in 0..num_bits {
        let bit;
        if i == bypass_index {
            bit = reader.get_bypass().unwrap();
        } else {
            bit = reader.get(context).unwrap();
        }

        assert!(
            ((pattern & (1 << i)) != 0) == bit,
            "Pattern {0:b}-{1} iter {2} fail was {3}",
            pattern,
            num_bits,
            i,
            bit
        );
    }
}

fn test_permutation_h264(pattern: u64, num_bits: u8, bypass_index: u8) {
    let mut output = Vec::new();
    {
        let mut context = H264Context::default();
        let mut writer = H264Writer::new(&mut output);
        set_bits(&mut writer, &mut context, pattern, num_bits, bypass_index);
    }

    // now try reading it
    {
        let mut context = H264Context::default();
        let mut reader = H264Reader::new(Cursor::new(&output)).unwrap();

        test_bits(&mut reader, &mut context, pattern, num_bits, bypass_index);
    }
}

fn test_permutation_mq(pattern: u64, num_bits: u8, bypass_index: u8) {
    let mut output = Vec::new();
    {
        let mut context = MqContext::default();
        let mut writer = MqWriter::new(&mut output);
        set_bits(&mut writer, &mut context, pattern, num_bits, bypass_index);
    }

    {
        let mut context = MqContext::default();
        let mut reader = MqReader::new(Cursor::new(&output)).unwrap();

        test_bits(&mut reader, &mut context, pattern, num_bits, bypass_index);
    }
}

#[derive(Clone, Copy, Debug)]
enum Seq {
    Normal(bool, usize),
    Bypass(bool),
}

const NUM_CONTEXTS: usize = 16;

fn encode_seq_h264(seq: &[Seq]) -> (Vec<u8>, Vec<H264Context>) {
    let mut output = Vec::new();
    let mut context = vec![H264Context::default(); NUM_CONTEXTS];
    let mut writer = H264Writer::new(&mut output);

    for &s in seq {
        match s {
            Seq::Normal(b, c) => writer.put(b, &mut context[c]).unwrap(),
            Seq::Bypass(b) => writer.put_bypass(b).unwrap(),
        }
    }

    writer.finish().unwrap();
    (output, context)
}

fn test_seq_h264(seq: &[Seq]) {
    let (output, enc_context) = encode_seq_h264(seq);

    let mut context = vec![H264Context::default(); NUM_CONTEXTS];
    let mut reader = H264Reader::new(Cursor::new(&output)).unwrap();

    for &s in seq {
        match s {
            Seq::Normal(b, c) => {
                assert_eq!(b, reader.get(&mut context[c]).unwrap())
            }
            Seq::Bypass(b) => {
                assert_eq!(b, reader.get_bypass().unwrap())
            }
        }
    }

    assert_eq!(enc_context, context);
}

fn encode_seq_mq(seq: &[Seq]) -> (Vec<u8>, Vec<MqContext>) {
    let mut output = Vec::new();
    let mut context = vec![MqContext::default(); NUM_CONTEXTS];
    let mut writer = MqWriter::new(&mut output);

    for &s in seq {
        match s {
            Seq::Normal(b, c) => writer.put(b, &mut context[c]).unwrap(),
            Seq::Bypass(b) => writer.put_bypass(b).unwrap(),
        }
    }

    writer.finish().unwrap();
    (output, context)
}

fn test_seq_mq(seq: &[Seq]) {
    let (output, enc_context) = encode_seq_mq(seq);

    let mut context = vec![MqContext::default(); NUM_CONTEXTS];
    let mut reader = MqReader::new(Cursor::new(&output)).unwrap();

    for &s in seq {
        match s {
            Seq::Normal(b, c) => {
                assert_eq!(b, reader.get(&mut context[c]).unwrap())
            }
            Seq::Bypass(b) => {
                assert_eq!(b, reader.get_bypass().unwrap())
            }
        }
    }

    assert_eq!(enc_context, context);
}

#[test]
fn bypass_h264() {
    let mut output = Vec::new();
    {
        let mut writer = H264Writer::new(&mut output);
        for i in 0..1024 {
            writer.put_bypass((i & 1) != 0).unwrap();
        }

        writer.finish().unwrap();
    }

    {
        let mut reader = H264Reader::new(Cursor::new(&output)).unwrap();
        for i in 0..1024 {
            assert_eq!(reader.get_bypass().unwrap(), (i & 1) != 0);
        }
    }

    // bypass bins cost exactly one bit each, plus the flush
    assert!(output.len() <= 1024 / 8 + 4);
}

#[test]
fn bypass_mq() {
    let mut output = Vec::new();
    {
        let mut writer = MqWriter::new(&mut output);
        for i in 0..1024 {
            writer.put_bypass((i % 3) != 0).unwrap();
        }

        writer.finish().unwrap();
    }

    {
        let mut reader = MqReader::new(Cursor::new(&output)).unwrap();
        for i in 0..1024 {
            assert_eq!(reader.get_bypass().unwrap(), (i % 3) != 0);
        }
    }
}

#[test]
fn test_basic_permutations_h264() {
    for k in 1..10 {
        for i in 0..(1 << (k - 1)) {
            test_permutation_h264(i, k, k / 2);
        }
    }
}

#[test]
fn test_basic_permutations_mq() {
    for k in 1..10 {
        for i in 0..(1 << (k - 1)) {
            test_permutation_mq(i, k, k / 2);
        }
    }
}

#[test]
fn test_random_sequences() {
    use rand::Rng;

    let mut rng = rand::thread_rng();

    let probs: [f64; NUM_CONTEXTS] = [
        0.001, 0.01, 0.1, 0.11, 0.2, 0.3, 0.4, 0.5, 0.6, 0.7, 0.9, 0.91, 0.99, 0.999, 0.9999, 1.0,
    ];

    for _ in 1..300 {
        let mut seq = Vec::new();

        for _ in 0..1000 {
            let ctx = rng.gen_range(0..NUM_CONTEXTS);

            seq.push(match rng.gen_range(0..4) {
                0 | 1 => Seq::Normal(rng.gen_bool(probs[ctx]), ctx),
                2 => Seq::Bypass(false),
                _ => Seq::Bypass(true),
            });
        }

        test_seq_h264(&seq);
        test_seq_mq(&seq);
    }
}

#[test]
fn test_deterministic_output() {
    let seq: Vec<Seq> = (0..5000)
        .map(|i| {
            if i % 7 == 3 {
                Seq::Bypass(i % 2 == 0)
            } else {
                Seq::Normal(i % 13 < 4, i % NUM_CONTEXTS)
            }
        })
        .collect();

    assert_eq!(encode_seq_h264(&seq), encode_seq_h264(&seq));
    assert_eq!(encode_seq_mq(&seq), encode_seq_mq(&seq));
}

#[test]
fn test_all_0() {
    // long MPS runs keep the coder parked at the band boundaries, which exercises the
    // outstanding-bit and bit-stuffing paths
    let all_0 = vec![Seq::Normal(false, 0); 100000];

    test_seq_h264(&all_0);
    test_seq_mq(&all_0);
}

#[test]
fn test_all_1() {
    let all_1 = vec![Seq::Normal(true, 0); 100000];

    test_seq_h264(&all_1);
    test_seq_mq(&all_1);
}

#[test]
fn test_alt() {
    let mut seq = Vec::new();
    for i in 0..10000 {
        seq.push(Seq::Normal(i % 2 == 0, 0));
    }
    test_seq_h264(&seq);
    test_seq_mq(&seq);
}

#[test]
fn test_long_bypass_runs() {
    // a run of ones in bypass mode holds the low register in the middle band, so the
    // outstanding counter grows for as long as the run lasts
    let mut seq = vec![Seq::Bypass(true); 20000];
    seq.push(Seq::Normal(true, 1));
    seq.extend(vec![Seq::Bypass(false); 20000]);
    seq.push(Seq::Normal(false, 1));

    test_seq_h264(&seq);
    test_seq_mq(&seq);
}

#[test]
fn test_carry_into_ff_bytes() {
    // sequences that produce many 0xff bytes in the output force stuffing and carries
    // through runs of ones on both coders
    for period in [2usize, 3, 5, 64, 255] {
        let seq: Vec<Seq> = (0..30000)
            .map(|i| {
                if i % period == 0 {
                    Seq::Normal(false, 2)
                } else {
                    Seq::Normal(true, 2)
                }
            })
            .collect();

        test_seq_h264(&seq);
        test_seq_mq(&seq);

        let (output, _) = encode_seq_mq(&seq);
        for w in output.windows(2) {
            assert!(!(w[0] == 0xff && w[1] > 0x8f));
        }
    }
}

#[test]
fn test_scenario_single_context() {
    let bits = [false, false, true, false, true, true, false, true];

    let mut output = Vec::new();
    let mut enc_ctx = H264Context::new(0, false);
    {
        let mut writer = H264Writer::new(&mut output);
        for &b in bits.iter() {
            writer.put(b, &mut enc_ctx).unwrap();
        }
        writer.finish().unwrap();
    }

    let mut dec_ctx = H264Context::new(0, false);
    let mut reader = H264Reader::new(Cursor::new(&output)).unwrap();
    let decoded: Vec<bool> = bits.iter().map(|_| reader.get(&mut dec_ctx).unwrap()).collect();

    assert_eq!(&decoded[..], &bits[..]);
    assert_eq!((enc_ctx.state(), enc_ctx.mps()), (dec_ctx.state(), dec_ctx.mps()));
}

#[test]
fn test_terminate_ends_segment() {
    let mut output = Vec::new();
    {
        let mut writer = H264Writer::new(&mut output);
        let mut ctx = [H264Context::default(); 4];
        for i in 0..2000 {
            writer.put(i % 5 == 0, &mut ctx[i % 4]).unwrap();
        }
        writer.put_terminate(true).unwrap();
        writer.finish().unwrap();
    }

    let mut reader = H264Reader::new(Cursor::new(&output)).unwrap();
    let mut ctx = [H264Context::default(); 4];
    for i in 0..2000 {
        assert_eq!(reader.get(&mut ctx[i % 4]).unwrap(), i % 5 == 0);
    }
    assert!(reader.get_terminate().unwrap());
}

#[test]
fn test_terminate_zero_continues() {
    let mut output = Vec::new();
    {
        let mut writer = H264Writer::new(&mut output);
        let mut ctx = H264Context::default();
        for i in 0..500 {
            writer.put_terminate(false).unwrap();
            writer.put(i % 9 == 0, &mut ctx).unwrap();
            writer.put_bypass(i % 2 == 0).unwrap();
        }
        writer.put_terminate(true).unwrap();
        writer.finish().unwrap();
    }

    let mut reader = H264Reader::new(Cursor::new(&output)).unwrap();
    let mut ctx = H264Context::default();
    for i in 0..500 {
        assert!(!reader.get_terminate().unwrap());
        assert_eq!(reader.get(&mut ctx).unwrap(), i % 9 == 0);
        assert_eq!(reader.get_bypass().unwrap(), i % 2 == 0);
    }
    assert!(reader.get_terminate().unwrap());
}

#[test]
fn test_tree_single_value() {
    let mut output = Vec::new();
    {
        let mut contexts = [H264Context::default(); TREE_CONTEXTS];
        let mut writer = H264Writer::new(&mut output);
        writer.put_tree(200, &mut contexts).unwrap();
        writer.finish().unwrap();
    }

    let mut contexts = [H264Context::default(); TREE_CONTEXTS];
    let mut reader = H264Reader::new(Cursor::new(&output)).unwrap();
    assert_eq!(reader.get_tree(&mut contexts).unwrap(), 200);
}

#[test]
fn test_tree_all_values_h264() {
    let mut output = Vec::new();
    {
        let mut contexts = [H264Context::default(); TREE_CONTEXTS];
        let mut writer = H264Writer::new(&mut output);
        for v in 0..=255u8 {
            writer.put_tree(v, &mut contexts).unwrap();
        }
        writer.finish().unwrap();
    }

    let mut contexts = [H264Context::default(); TREE_CONTEXTS];
    let mut reader = H264Reader::new(Cursor::new(&output)).unwrap();
    for v in 0..=255u8 {
        assert_eq!(reader.get_tree(&mut contexts).unwrap(), v);
    }
}

#[test]
fn test_tree_all_values_mq() {
    let mut output = Vec::new();
    {
        let mut contexts = [MqContext::default(); TREE_CONTEXTS];
        let mut writer = MqWriter::new(&mut output);
        for v in (0..=255u8).rev() {
            writer.put_tree(v, &mut contexts).unwrap();
        }
        writer.finish().unwrap();
    }

    let mut contexts = [MqContext::default(); TREE_CONTEXTS];
    let mut reader = MqReader::new(Cursor::new(&output)).unwrap();
    for v in (0..=255u8).rev() {
        assert_eq!(reader.get_tree(&mut contexts).unwrap(), v);
    }
}

#[test]
fn test_tree_skewed_source_compresses() {
    // a skewed byte source must come out well below 8 bits per symbol
    let values: Vec<u8> = (0..4096u32).map(|i| if i % 10 == 0 { 17 } else { 3 }).collect();

    let mut output = Vec::new();
    {
        let mut contexts = [H264Context::default(); TREE_CONTEXTS];
        let mut writer = H264Writer::new(&mut output);
        for &v in values.iter() {
            writer.put_tree(v, &mut contexts).unwrap();
        }
        writer.finish().unwrap();
    }

    assert!(output.len() < values.len() / 4);

    let mut contexts = [H264Context::default(); TREE_CONTEXTS];
    let mut reader = H264Reader::new(Cursor::new(&output)).unwrap();
    for &v in values.iter() {
        assert_eq!(reader.get_tree(&mut contexts).unwrap(), v);
    }
}

#[test]
fn test_exp_golomb_bypass() {
    let values = [0u32, 1, 2, 3, 7, 8, 100, 65535, 1 << 20, u32::MAX - 1, u32::MAX];

    for k in [0u32, 1, 3] {
        let mut output = Vec::new();
        {
            let mut writer = H264Writer::new(&mut output);
            for &v in values.iter() {
                writer.put_exp_golomb_bypass(v, k).unwrap();
            }
            writer.finish().unwrap();
        }

        let mut reader = H264Reader::new(Cursor::new(&output)).unwrap();
        for &v in values.iter() {
            assert_eq!(reader.get_exp_golomb_bypass(k).unwrap(), v);
        }
    }
}

#[test]
fn test_contexts_carry_across_segments() {
    // contexts outlive a segment: a second segment coded with the adapted contexts round trips
    // as long as the decoder carries its contexts over the same way
    let first: Vec<bool> = (0..3000).map(|i| i % 19 == 0).collect();
    let second: Vec<bool> = (0..3000).map(|i| i % 23 != 0).collect();

    let mut enc_ctx = MqContext::ZERO_NEIGHBORS;
    let mut segments = Vec::new();
    for bits in [&first, &second] {
        let mut output = Vec::new();
        let mut writer = MqWriter::new(&mut output);
        for &b in bits.iter() {
            writer.put(b, &mut enc_ctx).unwrap();
        }
        writer.finish().unwrap();
        segments.push(output);
    }

    let mut dec_ctx = MqContext::ZERO_NEIGHBORS;
    for (bits, data) in [&first, &second].iter().zip(segments.iter()) {
        let mut reader = MqReader::new(Cursor::new(data)).unwrap();
        for &b in bits.iter() {
            assert_eq!(reader.get(&mut dec_ctx).unwrap(), b);
        }
    }

    assert_eq!(enc_ctx, dec_ctx);
}

#[test]
fn test_h264_sink_failure_propagates() {
    struct FailingSink;

    impl std::io::Write for FailingSink {
        fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
            Err(std::io::Error::new(std::io::ErrorKind::Other, "sink failed"))
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    let mut writer = H264Writer::new(FailingSink);
    let mut ctx = H264Context::default();
    let mut result = Ok(());
    for i in 0..1000 {
        result = writer.put(i % 3 == 0, &mut ctx);
        if result.is_err() {
            break;
        }
    }

    assert!(result.is_err());

    let mut writer = MqWriter::new(FailingSink);
    let mut ctx = MqContext::default();
    let mut result = Ok(());
    for i in 0..1000 {
        result = writer.put(i % 3 == 0, &mut ctx);
        if result.is_err() {
            break;
        }
    }

    assert!(result.is_err());
}

#[test]
fn test_mq_t88_annex_h2_vector() {
    // the encoder test sequence of ITU-T T.88 Annex H.2, coded bit by bit under one context
    let input = [
        0x00u8, 0x02, 0x00, 0x51, 0x00, 0x00, 0x00, 0xC0, 0x03, 0x52, 0x87, 0x2A, 0xAA, 0xAA, 0xAA,
        0xAA, 0x82, 0xC0, 0x20, 0x00, 0xFC, 0xD7, 0x9E, 0xF6, 0xBF, 0x7F, 0xED, 0x90, 0x4F, 0x46,
        0xA3, 0xBF,
    ];

    let expected = [
        0x84u8, 0xC7, 0x3B, 0xFC, 0xE1, 0xA1, 0x43, 0x04, 0x02, 0x20, 0x00, 0x00, 0x41, 0x0D, 0xBB,
        0x86, 0xF4, 0x31, 0x7F, 0xFF, 0x88, 0xFF, 0x37, 0x47, 0x1A, 0xDB, 0x6A, 0xDF,
    ];

    let mut output = Vec::new();
    {
        let mut context = MqContext::default();
        let mut writer = MqWriter::new(&mut output);
        for &byte in input.iter() {
            for i in (0..8).rev() {
                writer.put((byte >> i) & 1 != 0, &mut context).unwrap();
            }
        }
        writer.finish().unwrap();
    }

    assert_eq!(&output[..], &expected[..]);

    // decode the vector as it appears in a real stream, terminated by a marker
    let mut stream = expected.to_vec();
    stream.extend_from_slice(&[0xFF, 0xAC]);

    let mut context = MqContext::default();
    let mut reader = MqReader::new(Cursor::new(&stream)).unwrap();
    for &byte in input.iter() {
        let mut decoded = 0u8;
        for _ in 0..8 {
            decoded = (decoded << 1) | u8::from(reader.get(&mut context).unwrap());
        }
        assert_eq!(decoded, byte);
    }
}

#[test]
fn test_h264_fixed_output() {
    // same bins as test_scenario_single_context, the coded bytes must not drift
    let bits = [false, false, true, false, true, true, false, true];

    let mut output = Vec::new();
    let mut ctx = H264Context::new(0, false);
    {
        let mut writer = H264Writer::new(&mut output);
        for &b in bits.iter() {
            writer.put(b, &mut ctx).unwrap();
        }
        writer.finish().unwrap();
    }

    assert_eq!(output, [0x34, 0x01]);
    assert_eq!(ctx, H264Context::new(0, false));

    // context bins, bypass bins and the terminating bin together
    let mut output = Vec::new();
    let mut ctx = H264Context::default();
    {
        let mut writer = H264Writer::new(&mut output);
        for i in 0..16 {
            writer.put(i % 3 == 0, &mut ctx).unwrap();
            writer.put_bypass(i % 2 == 1).unwrap();
        }
        writer.put_terminate(true).unwrap();
        writer.finish().unwrap();
    }

    assert_eq!(output, [0xb6, 0xf4, 0x3f, 0x68, 0x0b, 0x80]);
    assert_eq!(ctx, H264Context::new(2, false));

    let mut ctx = H264Context::default();
    let mut reader = H264Reader::new(Cursor::new(&output)).unwrap();
    for i in 0..16 {
        assert_eq!(reader.get(&mut ctx).unwrap(), i % 3 == 0);
        assert_eq!(reader.get_bypass().unwrap(), i % 2 == 1);
    }
    assert!(reader.get_terminate().unwrap());

    // segments without bins
    let mut output = Vec::new();
    H264Writer::new(&mut output).finish().unwrap();
    assert_eq!(output, [0x00, 0x80]);

    let mut output = Vec::new();
    {
        let mut writer = H264Writer::new(&mut output);
        writer.put_terminate(true).unwrap();
        writer.finish().unwrap();
    }
    assert_eq!(output, [0xfe, 0x80]);
}
