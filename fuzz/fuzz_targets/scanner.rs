#![no_main]

use libfuzzer_sys::fuzz_target;

use simd_csv_tokenizer::{Dialect, EncodingScanner};

fuzz_target!(|data: &[u8]| {
    let Some((&separator_len, data)) = data.split_first() else {
        return;
    };

    let separator_len = (separator_len as usize % 3) + 1;

    if data.len() < separator_len {
        return;
    }

    let (separator, haystack) = data.split_at(separator_len);

    let mut dialect = Dialect::new();
    dialect.separator(separator).comment(Some(b'#'));

    let vectorized = EncodingScanner::new(&dialect);
    let scalar = EncodingScanner::scalar(&dialect);

    assert_eq!(
        vectorized.first_index_requiring_encoding(haystack),
        scalar.first_index_requiring_encoding(haystack)
    );
});
