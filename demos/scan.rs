use std::fs::File;
use std::time::Instant;

use clap::Parser;
use memmap2::Mmap;
use simd_csv_tokenizer::{scanner_simd_instructions, Dialect, EncodingScanner};

#[derive(Parser, Debug)]
struct Args {
    /// Path to target file
    path: String,

    /// Separator, possibly spanning multiple bytes
    #[arg(short, long, default_value = ",")]
    separator: String,

    /// Whether to disable SIMD acceleration
    #[arg(long)]
    scalar: bool,

    /// Count every byte requiring encoding instead of stopping at the first one
    #[arg(long)]
    count: bool,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let args = Args::parse();

    if args.separator.is_empty() {
        anyhow::bail!("separator cannot be empty!");
    }

    let mut dialect = Dialect::new();
    dialect.separator(args.separator.as_bytes());

    let scanner = if args.scalar {
        EncodingScanner::scalar(&dialect)
    } else {
        EncodingScanner::new(&dialect)
    };

    eprintln!(
        "using {} instructions (available: {})",
        scanner.instructions(),
        scanner_simd_instructions()
    );

    let file = File::open(&args.path)?;
    let map = unsafe { Mmap::map(&file)? };
    let haystack = &map[..];

    let timer = Instant::now();

    if args.count {
        let mut count: u64 = 0;
        let mut pos: usize = 0;

        while let Some(offset) = scanner.first_index_requiring_encoding(&haystack[pos..]) {
            count += 1;
            pos += offset + 1;
        }

        println!("{}", count);
    } else {
        match scanner.first_index_requiring_encoding(haystack) {
            Some(index) => println!("{}", index),
            None => println!("none"),
        }
    }

    eprintln!("took {:?}", timer.elapsed());

    Ok(())
}
