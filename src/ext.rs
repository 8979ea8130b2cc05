/// Pointer arithmetic used by the vectorized scanning loops.
pub(crate) trait Pointer {
    /// Number of elements between `origin` and `self`, `self` being in the
    /// same allocation and never before `origin`.
    unsafe fn distance(self, origin: Self) -> usize;
}

impl<T> Pointer for *const T {
    #[inline(always)]
    unsafe fn distance(self, origin: *const T) -> usize {
        debug_assert!(self >= origin, "pointer is before its origin");

        self.offset_from(origin) as usize
    }
}
