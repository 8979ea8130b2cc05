use log::debug;

use crate::dialect::Dialect;

/// Outcome of the vectorized part of a scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scan {
    Found(usize),
    // Offset from which the scalar path must take over
    Remainder(usize),
}

/// Bytes every backend broadcasts.
///
/// Unconfigured quote & comment bytes are replaced by `\r`, which is matched
/// anyway, so that vectorized loops never branch on configuration.
#[derive(Debug, Clone, Copy)]
struct Needles {
    definite: [u8; 5],
    // First byte of a multi-byte separator, to be verified
    lead: Option<u8>,
}

impl Needles {
    fn new(separator: &[u8], quote: Option<u8>, comment: Option<u8>) -> Self {
        let single = if separator.len() == 1 {
            separator[0]
        } else {
            b'\r'
        };

        Self {
            definite: [
                b'\r',
                b'\n',
                quote.unwrap_or(b'\r'),
                comment.unwrap_or(b'\r'),
                single,
            ],
            lead: (separator.len() > 1).then(|| separator[0]),
        }
    }
}

// Given the move masks of a block starting at `block_start`, find the first
// position requiring encoding. `shift` converts bit indices into byte offsets
// for backends whose masks use more than one bit per byte.
#[inline(always)]
fn resolve_block(
    haystack: &[u8],
    block_start: usize,
    definite: u64,
    mut candidates: u64,
    shift: u32,
    separator: &[u8],
) -> Option<usize> {
    let limit = if definite != 0 {
        definite.trailing_zeros()
    } else {
        u64::BITS
    };

    while candidates != 0 {
        let bit = candidates.trailing_zeros();

        if bit >= limit {
            break;
        }

        let pos = block_start + (bit >> shift) as usize;

        // NOTE: this can read past the block, which is how separators
        // straddling two blocks are found.
        if haystack[pos..].starts_with(separator) {
            return Some(pos);
        }

        candidates = clear_least_significant_bit(candidates);
    }

    (definite != 0).then(|| block_start + (limit >> shift) as usize)
}

#[inline(always)]
fn clear_least_significant_bit(mask: u64) -> u64 {
    mask & (mask - 1)
}

#[cfg(target_arch = "x86_64")]
mod x86_64 {
    use super::{resolve_block, Needles, Scan};

    use crate::ext::Pointer;

    pub mod sse2 {
        use super::*;

        use core::arch::x86_64::{
            __m128i, _mm_cmpeq_epi8, _mm_loadu_si128, _mm_movemask_epi8, _mm_or_si128,
            _mm_set1_epi8,
        };

        pub const SSE2_STEP: usize = 16;

        #[derive(Debug, Clone)]
        pub struct SSE2Scanner {
            v1: __m128i,
            v2: __m128i,
            v3: __m128i,
            v4: __m128i,
            v5: __m128i,
            lead: Option<__m128i>,
        }

        impl SSE2Scanner {
            #[inline]
            pub unsafe fn new(needles: &Needles) -> Self {
                let [n1, n2, n3, n4, n5] = needles.definite;

                Self {
                    v1: _mm_set1_epi8(n1 as i8),
                    v2: _mm_set1_epi8(n2 as i8),
                    v3: _mm_set1_epi8(n3 as i8),
                    v4: _mm_set1_epi8(n4 as i8),
                    v5: _mm_set1_epi8(n5 as i8),
                    lead: needles.lead.map(|n| _mm_set1_epi8(n as i8)),
                }
            }

            pub unsafe fn scan(&self, haystack: &[u8], separator: &[u8]) -> Scan {
                if haystack.len() < SSE2_STEP {
                    return Scan::Remainder(0);
                }

                let start = haystack.as_ptr();
                let vectorized_end = start.add(haystack.len() - SSE2_STEP);
                let mut current = start;

                while current <= vectorized_end {
                    let chunk = _mm_loadu_si128(current as *const __m128i);
                    let cmp1 = _mm_cmpeq_epi8(chunk, self.v1);
                    let cmp2 = _mm_cmpeq_epi8(chunk, self.v2);
                    let cmp3 = _mm_cmpeq_epi8(chunk, self.v3);
                    let cmp4 = _mm_cmpeq_epi8(chunk, self.v4);
                    let cmp5 = _mm_cmpeq_epi8(chunk, self.v5);
                    let cmp = _mm_or_si128(cmp1, cmp2);
                    let cmp = _mm_or_si128(cmp, cmp3);
                    let cmp = _mm_or_si128(cmp, cmp4);
                    let cmp = _mm_or_si128(cmp, cmp5);

                    let definite = _mm_movemask_epi8(cmp) as u32 as u64;
                    let candidates = match self.lead {
                        Some(lead) => _mm_movemask_epi8(_mm_cmpeq_epi8(chunk, lead)) as u32 as u64,
                        None => 0,
                    };

                    if definite | candidates != 0 {
                        let block_start = current.distance(start);

                        if let Some(pos) = resolve_block(
                            haystack,
                            block_start,
                            definite,
                            candidates,
                            0,
                            separator,
                        ) {
                            return Scan::Found(pos);
                        }
                    }

                    current = current.add(SSE2_STEP);
                }

                Scan::Remainder(current.distance(start))
            }
        }
    }

    pub mod avx2 {
        use super::*;

        use core::arch::x86_64::{
            __m256i, _mm256_cmpeq_epi8, _mm256_loadu_si256, _mm256_movemask_epi8,
            _mm256_or_si256, _mm256_set1_epi8,
        };

        pub const AVX2_STEP: usize = 32;

        #[derive(Debug, Clone)]
        pub struct AVX2Scanner {
            v1: __m256i,
            v2: __m256i,
            v3: __m256i,
            v4: __m256i,
            v5: __m256i,
            lead: Option<__m256i>,
        }

        impl AVX2Scanner {
            #[inline]
            #[target_feature(enable = "avx2")]
            pub unsafe fn new(needles: &Needles) -> Self {
                let [n1, n2, n3, n4, n5] = needles.definite;

                Self {
                    v1: _mm256_set1_epi8(n1 as i8),
                    v2: _mm256_set1_epi8(n2 as i8),
                    v3: _mm256_set1_epi8(n3 as i8),
                    v4: _mm256_set1_epi8(n4 as i8),
                    v5: _mm256_set1_epi8(n5 as i8),
                    lead: needles.lead.map(|n| _mm256_set1_epi8(n as i8)),
                }
            }

            #[target_feature(enable = "avx2")]
            pub unsafe fn scan(&self, haystack: &[u8], separator: &[u8]) -> Scan {
                if haystack.len() < AVX2_STEP {
                    return Scan::Remainder(0);
                }

                let start = haystack.as_ptr();
                let vectorized_end = start.add(haystack.len() - AVX2_STEP);
                let mut current = start;

                while current <= vectorized_end {
                    let chunk = _mm256_loadu_si256(current as *const __m256i);
                    let cmp1 = _mm256_cmpeq_epi8(chunk, self.v1);
                    let cmp2 = _mm256_cmpeq_epi8(chunk, self.v2);
                    let cmp3 = _mm256_cmpeq_epi8(chunk, self.v3);
                    let cmp4 = _mm256_cmpeq_epi8(chunk, self.v4);
                    let cmp5 = _mm256_cmpeq_epi8(chunk, self.v5);
                    let cmp = _mm256_or_si256(cmp1, cmp2);
                    let cmp = _mm256_or_si256(cmp, cmp3);
                    let cmp = _mm256_or_si256(cmp, cmp4);
                    let cmp = _mm256_or_si256(cmp, cmp5);

                    let definite = _mm256_movemask_epi8(cmp) as u32 as u64;
                    let candidates = match self.lead {
                        Some(lead) => {
                            _mm256_movemask_epi8(_mm256_cmpeq_epi8(chunk, lead)) as u32 as u64
                        }
                        None => 0,
                    };

                    if definite | candidates != 0 {
                        let block_start = current.distance(start);

                        if let Some(pos) = resolve_block(
                            haystack,
                            block_start,
                            definite,
                            candidates,
                            0,
                            separator,
                        ) {
                            return Scan::Found(pos);
                        }
                    }

                    current = current.add(AVX2_STEP);
                }

                Scan::Remainder(current.distance(start))
            }
        }
    }
}

#[cfg(target_arch = "aarch64")]
mod aarch64 {
    use core::arch::aarch64::{
        uint8x16_t, vceqq_u8, vdupq_n_u8, vget_lane_u64, vld1q_u8, vorrq_u8, vreinterpret_u64_u8,
        vreinterpretq_u16_u8, vshrn_n_u16,
    };

    use super::{resolve_block, Needles, Scan};

    use crate::ext::Pointer;

    pub const NEON_STEP: usize = 16;

    // Four bits per byte, only the highest one of each nibble being kept.
    #[inline(always)]
    unsafe fn neon_movemask(v: uint8x16_t) -> u64 {
        let asu16s = vreinterpretq_u16_u8(v);
        let mask = vshrn_n_u16(asu16s, 4);
        let asu64 = vreinterpret_u64_u8(mask);
        let scalar64 = vget_lane_u64(asu64, 0);

        scalar64 & 0x8888888888888888
    }

    #[derive(Debug, Clone)]
    pub struct NeonScanner {
        v1: uint8x16_t,
        v2: uint8x16_t,
        v3: uint8x16_t,
        v4: uint8x16_t,
        v5: uint8x16_t,
        lead: Option<uint8x16_t>,
    }

    impl NeonScanner {
        #[inline]
        pub unsafe fn new(needles: &Needles) -> Self {
            let [n1, n2, n3, n4, n5] = needles.definite;

            Self {
                v1: vdupq_n_u8(n1),
                v2: vdupq_n_u8(n2),
                v3: vdupq_n_u8(n3),
                v4: vdupq_n_u8(n4),
                v5: vdupq_n_u8(n5),
                lead: needles.lead.map(|n| vdupq_n_u8(n)),
            }
        }

        pub unsafe fn scan(&self, haystack: &[u8], separator: &[u8]) -> Scan {
            if haystack.len() < NEON_STEP {
                return Scan::Remainder(0);
            }

            let start = haystack.as_ptr();
            let vectorized_end = start.add(haystack.len() - NEON_STEP);
            let mut current = start;

            while current <= vectorized_end {
                let chunk = vld1q_u8(current);
                let cmp1 = vceqq_u8(chunk, self.v1);
                let cmp2 = vceqq_u8(chunk, self.v2);
                let cmp3 = vceqq_u8(chunk, self.v3);
                let cmp4 = vceqq_u8(chunk, self.v4);
                let cmp5 = vceqq_u8(chunk, self.v5);
                let cmp = vorrq_u8(cmp1, cmp2);
                let cmp = vorrq_u8(cmp, cmp3);
                let cmp = vorrq_u8(cmp, cmp4);
                let cmp = vorrq_u8(cmp, cmp5);

                let definite = neon_movemask(cmp);
                let candidates = match self.lead {
                    Some(lead) => neon_movemask(vceqq_u8(chunk, lead)),
                    None => 0,
                };

                if definite | candidates != 0 {
                    let block_start = current.distance(start);

                    if let Some(pos) =
                        resolve_block(haystack, block_start, definite, candidates, 2, separator)
                    {
                        return Scan::Found(pos);
                    }
                }

                current = current.add(NEON_STEP);
            }

            Scan::Remainder(current.distance(start))
        }
    }
}

#[derive(Debug, Clone)]
enum Backend {
    #[cfg(target_arch = "x86_64")]
    AVX2(x86_64::avx2::AVX2Scanner),

    #[cfg(target_arch = "x86_64")]
    SSE2(x86_64::sse2::SSE2Scanner),

    #[cfg(target_arch = "aarch64")]
    Neon(aarch64::NeonScanner),

    Scalar,
}

impl Backend {
    fn best(needles: &Needles) -> Self {
        #[cfg(target_arch = "x86_64")]
        {
            if is_x86_feature_detected!("avx2") {
                unsafe { Self::AVX2(x86_64::avx2::AVX2Scanner::new(needles)) }
            } else {
                unsafe { Self::SSE2(x86_64::sse2::SSE2Scanner::new(needles)) }
            }
        }

        #[cfg(target_arch = "aarch64")]
        {
            unsafe { Self::Neon(aarch64::NeonScanner::new(needles)) }
        }

        #[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
        {
            let _ = needles;
            Self::Scalar
        }
    }

    fn instructions(&self) -> &'static str {
        match self {
            #[cfg(target_arch = "x86_64")]
            Self::AVX2(_) => "avx2",

            #[cfg(target_arch = "x86_64")]
            Self::SSE2(_) => "sse2",

            #[cfg(target_arch = "aarch64")]
            Self::Neon(_) => "neon",

            Self::Scalar => "none",
        }
    }

    fn block_len(&self) -> usize {
        match self {
            #[cfg(target_arch = "x86_64")]
            Self::AVX2(_) => x86_64::avx2::AVX2_STEP,

            #[cfg(target_arch = "x86_64")]
            Self::SSE2(_) => x86_64::sse2::SSE2_STEP,

            #[cfg(target_arch = "aarch64")]
            Self::Neon(_) => aarch64::NEON_STEP,

            Self::Scalar => 1,
        }
    }
}

/// Returns the SIMD instructions set the [`EncodingScanner`] would use on
/// this machine.
pub fn scanner_simd_instructions() -> &'static str {
    #[cfg(target_arch = "x86_64")]
    {
        if is_x86_feature_detected!("avx2") {
            "avx2"
        } else {
            "sse2"
        }
    }

    #[cfg(target_arch = "aarch64")]
    {
        "neon"
    }

    #[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
    {
        "none"
    }
}

/// Finds the first byte of a value that forces it to be quoted when written:
/// `\r`, `\n`, the quote, the comment byte or the start of the separator.
///
/// Full blocks of the input are compared at once using the widest SIMD
/// instructions available, the remainder being handled by scalar code.
/// Multi-byte separators are found by vectorized matching of their first
/// byte, each candidate then being verified with a plain comparison that may
/// extend over the next block.
#[derive(Debug, Clone)]
pub struct EncodingScanner {
    separator: Vec<u8>,
    table: [bool; 256],
    lead: Option<u8>,
    backend: Backend,
}

impl EncodingScanner {
    pub fn new(dialect: &Dialect) -> Self {
        let needles = Needles::new(&dialect.separator, dialect.quote, dialect.comment);
        let scanner = Self::with_backend(dialect, Backend::best(&needles));

        debug!(
            "encoding scanner using {} instructions",
            scanner.instructions()
        );

        scanner
    }

    /// A scanner never using SIMD instructions.
    pub fn scalar(dialect: &Dialect) -> Self {
        Self::with_backend(dialect, Backend::Scalar)
    }

    fn with_backend(dialect: &Dialect, backend: Backend) -> Self {
        let needles = Needles::new(&dialect.separator, dialect.quote, dialect.comment);
        let mut table = [false; 256];

        for byte in needles.definite {
            table[byte as usize] = true;
        }

        Self {
            separator: dialect.separator.clone(),
            table,
            lead: needles.lead,
            backend,
        }
    }

    /// Name of the SIMD instructions set used by this scanner.
    #[inline]
    pub fn instructions(&self) -> &'static str {
        self.backend.instructions()
    }

    /// Number of bytes processed at once by the vectorized path. Inputs
    /// shorter than this are handled by scalar code only.
    #[inline]
    pub fn block_len(&self) -> usize {
        self.backend.block_len()
    }

    fn scalar_from(&self, haystack: &[u8], offset: usize) -> Option<usize> {
        for (i, byte) in haystack[offset..].iter().copied().enumerate() {
            if self.table[byte as usize] {
                return Some(offset + i);
            }

            if self.lead == Some(byte) && haystack[offset + i..].starts_with(&self.separator) {
                return Some(offset + i);
            }
        }

        None
    }

    /// Returns the index of the first byte of `haystack` requiring the value
    /// to be encoded, if any.
    pub fn first_index_requiring_encoding(&self, haystack: &[u8]) -> Option<usize> {
        let scan = match &self.backend {
            #[cfg(target_arch = "x86_64")]
            Backend::AVX2(inner) => unsafe { inner.scan(haystack, &self.separator) },

            #[cfg(target_arch = "x86_64")]
            Backend::SSE2(inner) => unsafe { inner.scan(haystack, &self.separator) },

            #[cfg(target_arch = "aarch64")]
            Backend::Neon(inner) => unsafe { inner.scan(haystack, &self.separator) },

            Backend::Scalar => Scan::Remainder(0),
        };

        match scan {
            Scan::Found(pos) => Some(pos),
            Scan::Remainder(offset) => self.scalar_from(haystack, offset),
        }
    }

    #[inline]
    pub fn requires_encoding(&self, haystack: &[u8]) -> bool {
        self.first_index_requiring_encoding(haystack).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dialect(separator: &[u8], quote: Option<u8>, comment: Option<u8>) -> Dialect {
        let mut dialect = Dialect::new();
        dialect.separator(separator).quote(quote).comment(comment);
        dialect
    }

    // Every backend this machine supports, scalar one included
    fn scanners(dialect: &Dialect) -> Vec<EncodingScanner> {
        let needles = Needles::new(&dialect.separator, dialect.quote, dialect.comment);

        #[allow(unused_mut)]
        let mut scanners = vec![EncodingScanner::scalar(dialect)];

        #[cfg(target_arch = "x86_64")]
        {
            scanners.push(EncodingScanner::with_backend(dialect, unsafe {
                Backend::SSE2(x86_64::sse2::SSE2Scanner::new(&needles))
            }));

            if is_x86_feature_detected!("avx2") {
                scanners.push(EncodingScanner::with_backend(dialect, unsafe {
                    Backend::AVX2(x86_64::avx2::AVX2Scanner::new(&needles))
                }));
            }
        }

        #[cfg(target_arch = "aarch64")]
        {
            scanners.push(EncodingScanner::with_backend(dialect, unsafe {
                Backend::Neon(aarch64::NeonScanner::new(&needles))
            }));
        }

        let _ = needles;

        scanners
    }

    #[test]
    fn test_instructions() {
        let scanner = EncodingScanner::new(&Dialect::new());

        assert_eq!(scanner.instructions(), scanner_simd_instructions());
        assert_eq!(EncodingScanner::scalar(&Dialect::new()).instructions(), "none");
    }

    #[test]
    fn test_clean_values() {
        for scanner in scanners(&dialect(b",", Some(b'"'), Some(b'#'))) {
            assert_eq!(scanner.first_index_requiring_encoding(b""), None);
            assert_eq!(scanner.first_index_requiring_encoding(b"john"), None);
            assert_eq!(
                scanner.first_index_requiring_encoding("b".repeat(75).as_bytes()),
                None
            );
            assert_eq!(
                scanner.first_index_requiring_encoding("béatrice".repeat(20).as_bytes()),
                None
            );
        }
    }

    #[test]
    fn test_every_position_and_length() {
        let specials = [b'\r', b'\n', b'"', b'#', b','];

        for scanner in scanners(&dialect(b",", Some(b'"'), Some(b'#'))) {
            for len in 1..100 {
                for pos in 0..len {
                    for special in specials {
                        let mut haystack = vec![b'a'; len];
                        haystack[pos] = special;

                        assert_eq!(
                            scanner.first_index_requiring_encoding(&haystack),
                            Some(pos),
                            "backend={} len={} pos={} special={:?}",
                            scanner.instructions(),
                            len,
                            pos,
                            special as char
                        );
                    }
                }
            }
        }
    }

    #[test]
    fn test_earliest_wins() {
        for scanner in scanners(&Dialect::new()) {
            let mut haystack = vec![b'x'; 70];
            haystack[40] = b'\n';
            haystack[20] = b'"';
            haystack[65] = b',';

            assert_eq!(scanner.first_index_requiring_encoding(&haystack), Some(20));

            haystack[3] = b'\r';
            assert_eq!(scanner.first_index_requiring_encoding(&haystack), Some(3));
        }
    }

    #[test]
    fn test_unconfigured_bytes_are_ignored() {
        for scanner in scanners(&dialect(b"\t", None, None)) {
            let haystack = "\"quoted\",#not a comment, really".repeat(3);

            assert_eq!(
                scanner.first_index_requiring_encoding(haystack.as_bytes()),
                None
            );
            assert_eq!(
                scanner.first_index_requiring_encoding(format!("{}\t", haystack).as_bytes()),
                Some(haystack.len())
            );
        }
    }

    #[test]
    fn test_multi_byte_separator() {
        for scanner in scanners(&dialect(b"<|>", Some(b'"'), None)) {
            // Lone lead bytes are not enough
            let haystack = "a<b<|c|>".repeat(10);
            assert_eq!(
                scanner.first_index_requiring_encoding(haystack.as_bytes()),
                None
            );

            assert_eq!(scanner.first_index_requiring_encoding(b"<|>"), Some(0));
            assert_eq!(scanner.first_index_requiring_encoding(b"ab<|"), None);

            // Separator at every position, with decoy leads before it
            for len in 3..100 {
                for pos in 0..=len - 3 {
                    let mut haystack = vec![b'<'; len];

                    haystack[pos..pos + 3].copy_from_slice(b"<|>");

                    assert_eq!(
                        scanner.first_index_requiring_encoding(&haystack),
                        Some(pos),
                        "backend={} len={} pos={}",
                        scanner.instructions(),
                        len,
                        pos
                    );
                }
            }
        }
    }

    #[test]
    fn test_multi_byte_separator_straddling_blocks() {
        for scanner in scanners(&dialect(b"::", None, None)) {
            let block = scanner.block_len().max(16);

            for start in [block - 1, 2 * block - 1] {
                let mut haystack = vec![b'x'; 3 * block];
                haystack[start] = b':';
                haystack[start + 1] = b':';

                assert_eq!(
                    scanner.first_index_requiring_encoding(&haystack),
                    Some(start),
                    "backend={} start={}",
                    scanner.instructions(),
                    start
                );
            }

            // Separator truncated by the end of input
            let mut haystack = vec![b'x'; 2 * block];
            haystack[2 * block - 1] = b':';

            assert_eq!(scanner.first_index_requiring_encoding(&haystack), None);
        }
    }

    #[test]
    fn test_multi_byte_separator_vs_definite_bytes() {
        for scanner in scanners(&dialect(b"ab", Some(b'"'), None)) {
            let mut haystack = vec![b'a'; 64];
            haystack[10] = b'b';
            haystack[30] = b'\n';

            assert_eq!(scanner.first_index_requiring_encoding(&haystack), Some(9));

            haystack[5] = b'"';
            assert_eq!(scanner.first_index_requiring_encoding(&haystack), Some(5));
        }
    }

    #[test]
    fn test_backends_agree_on_csv() {
        let complex = b"name,surname,age\n\"john\",\"landy, the \"\"everlasting\"\" bastard\",45\nlucy,rose,\"67\"\njermaine,jackson,\"89\"\n\nkarine,loucan,\"52\"\nrose,\"glib\",12\n\"guillaume\",\"plique\",\"42\"\r\n";

        let dialect = Dialect::new();
        let reference = EncodingScanner::scalar(&dialect);

        for scanner in scanners(&dialect) {
            for start in 0..complex.len() {
                assert_eq!(
                    scanner.first_index_requiring_encoding(&complex[start..]),
                    reference.first_index_requiring_encoding(&complex[start..]),
                    "backend={} start={}",
                    scanner.instructions(),
                    start
                );
            }
        }
    }
}
