#![no_main]

use libfuzzer_sys::fuzz_target;

use simd_csv_tokenizer::{ColumnNameStore, Dialect, Escaper};

fuzz_target!(|data: &[u8]| {
    // Escaped forms must remain addressable by 16-bit offsets
    if data.len() > 8192 {
        return;
    }

    let escaper = Escaper::new(&Dialect::new());
    let mut store = ColumnNameStore::new();

    let names = data.split(|b| *b == b'\n').collect::<Vec<_>>();

    for name in names.iter() {
        store.push_escaped(name, &escaper).unwrap();
    }

    assert_eq!(store.count(), names.len());

    for (i, name) in names.iter().enumerate() {
        let mut encoded = Vec::new();
        escaper.escape_into(name, &mut encoded);

        assert_eq!(store.column_at(i).unwrap(), *name);
        assert_eq!(store.encoded_column_at(i).unwrap(), encoded);
    }
});
