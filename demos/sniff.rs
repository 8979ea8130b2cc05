use std::fs::File;

use clap::Parser;
use simd_csv_tokenizer::{Dialect, PushbackBuffer, RowEnding, RowEndingSniffer};

#[derive(Parser, Debug)]
struct Args {
    /// Path to target CSV file
    path: String,

    /// Byte used to quote values
    #[arg(short, long, default_value_t = '"')]
    quote: char,

    /// Byte marking comment rows, if any
    #[arg(short, long)]
    comment: Option<char>,

    /// Size of the read buffer
    #[arg(long, default_value_t = 8192)]
    capacity: usize,
}

fn name(row_ending: RowEnding) -> &'static str {
    match row_ending {
        RowEnding::CarriageReturn => "CR",
        RowEnding::LineFeed => "LF",
        RowEnding::CarriageReturnLineFeed => "CRLF",
    }
}

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let args = Args::parse();

    let mut dialect = Dialect::new();
    dialect
        .quote(Some(args.quote as u8))
        .comment(args.comment.map(|c| c as u8));

    let mut file = File::open(&args.path)?;
    let mut buffer = PushbackBuffer::with_capacity(args.capacity)?;
    let sniffed = RowEndingSniffer::new(&dialect).sniff(&mut buffer, &mut file)?;

    match sniffed.ending() {
        Some(row_ending) => println!(
            "{} (first row is {} bytes long)",
            name(row_ending),
            sniffed.consumed()
        ),
        None => println!(
            "no row ending found, defaulting to {}",
            name(sniffed.or(dialect.get_default_row_ending()))
        ),
    }

    let read = buffer.fill(&mut file)?;

    if read > 0 {
        println!(
            "second row starts with: {:?}",
            String::from_utf8_lossy(&buffer.filled()?[..read.min(32)])
        );
    }

    Ok(())
}
