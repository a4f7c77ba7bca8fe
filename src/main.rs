use std::io::{Cursor, Result};
use std::time::Instant;

use bincoder::{
    h264::{H264Context, H264Reader, H264Writer},
    mq::{MqContext, MqReader, MqWriter},
    traits::{CabacReader, CabacWriter},
};
use clap::{Parser, ValueEnum};
use log::info;

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Coder {
    H264,
    Mq,
    Both,
}

#[derive(Parser, Debug)]
#[command(about = "Encodes and decodes synthetic bin sequences and reports sizes and timings", long_about = None)]
struct Args {
    /// which coder family to exercise
    #[arg(long, value_enum, default_value_t = Coder::Both)]
    coder: Coder,

    /// number of encode/decode rounds
    #[arg(long, default_value_t = 64)]
    iterations: u32,

    /// number of bins per round
    #[arg(long, default_value_t = 100 * 1024)]
    bins: i32,

    /// code every bin as a bypass bin
    #[arg(long)]
    bypass: bool,
}

fn pattern(i: i32) -> bool {
    i % 111 == 0
}

fn put_pattern<C: Default, CW: CabacWriter<C>>(writer: &mut CW, bins: i32, bypass: bool) -> Result<()> {
    let mut context = C::default();
    for i in 0..bins {
        if bypass {
            writer.put_bypass(pattern(i))?;
        } else {
            writer.put(pattern(i), &mut context)?;
        }
    }

    writer.finish()
}

fn check_pattern<C: Default, CR: CabacReader<C>>(reader: &mut CR, bins: i32, bypass: bool) -> Result<()> {
    let mut context = C::default();
    for i in 0..bins {
        let bit = if bypass {
            reader.get_bypass()?
        } else {
            reader.get(&mut context)?
        };
        assert_eq!(bit, pattern(i), "mismatch at bin {0}", i);
    }

    Ok(())
}

fn run(name: &str, args: &Args, f: impl Fn(i32, bool) -> Result<usize>) -> Result<()> {
    let start = Instant::now();
    let mut size = 0;
    for _ in 0..args.iterations {
        size = f(args.bins, args.bypass)?;
    }

    info!(
        "{0}: {1} bins -> {2} bits, {3:?} per round",
        name,
        args.bins,
        size * 8,
        start.elapsed() / args.iterations.max(1)
    );

    Ok(())
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    if args.coder != Coder::Mq {
        run("h264", &args, |bins, bypass| {
            let mut output = Vec::with_capacity(1000);
            let mut writer = H264Writer::new(&mut output);
            put_pattern::<H264Context, _>(&mut writer, bins, bypass)?;

            let mut reader = H264Reader::new(Cursor::new(&output))?;
            check_pattern::<H264Context, _>(&mut reader, bins, bypass)?;
            Ok(output.len())
        })?;
    }

    if args.coder != Coder::H264 {
        run("mq", &args, |bins, bypass| {
            let mut output = Vec::with_capacity(1000);
            let mut writer = MqWriter::new(&mut output);
            put_pattern::<MqContext, _>(&mut writer, bins, bypass)?;

            let mut reader = MqReader::new(Cursor::new(&output))?;
            check_pattern::<MqContext, _>(&mut reader, bins, bypass)?;
            Ok(output.len())
        })?;
    }

    Ok(())
}
