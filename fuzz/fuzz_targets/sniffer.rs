#![no_main]

use libfuzzer_sys::fuzz_target;

use simd_csv_tokenizer::{Dialect, PushbackBuffer, RowEndingSniffer};

fuzz_target!(|data: &[u8]| {
    let Some((&capacity, data)) = data.split_first() else {
        return;
    };

    let mut dialect = Dialect::new();
    dialect.comment(Some(b'#'));

    let mut source = data;
    let mut buffer = PushbackBuffer::with_capacity(capacity as usize + 1).unwrap();
    let sniffed = RowEndingSniffer::new(&dialect)
        .sniff(&mut buffer, &mut source)
        .unwrap();

    let consumed = sniffed.consumed() as usize;

    if let Some(row_ending) = sniffed.ending() {
        assert!(data[..consumed].ends_with(row_ending.as_bytes()));
    }

    // Nothing is lost nor duplicated
    let mut rest = Vec::new();

    loop {
        let read = buffer.fill(&mut source).unwrap();

        if read == 0 {
            break;
        }

        rest.extend_from_slice(buffer.filled().unwrap());
    }

    assert_eq!(rest, &data[consumed..]);
});
