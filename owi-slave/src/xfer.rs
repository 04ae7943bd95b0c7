use core::ptr;

/// A non-owning, bounded view of a transfer buffer.
///
/// The engine holds one of these for the lifetime of an armed transfer and
/// consumes it bit-by-bit from interrupt context, so the view deliberately
/// carries no lifetime: the borrow checker cannot see across the interrupt
/// boundary. The constructors are `unsafe` instead, and the caller promises
/// that the referenced memory stays valid, unmoved and untouched until the
/// transfer-complete (or command-ready) event for that transfer has been
/// observed in the foreground.
#[derive(Debug)]
pub struct XferBuf {
    ptr: *mut u8,
    len: usize,
}

// The view crosses from the foreground into interrupt context on the same
// core; there is no true parallelism in the single-interrupt-priority model.
unsafe impl Send for XferBuf {}

impl XferBuf {
    /// An empty view. This is what the engine holds between transfers.
    pub const fn empty() -> Self {
        Self {
            ptr: ptr::null_mut(),
            len: 0,
        }
    }

    /// Create a read-only view for `send`/`search` transfers.
    ///
    /// The engine never writes through a view created this way.
    ///
    /// # Safety
    /// `slice` must remain valid, unmoved and unmodified until the completion
    /// event of the transfer armed with this view has been observed.
    pub unsafe fn shared(slice: &[u8]) -> Self {
        Self {
            ptr: slice.as_ptr() as *mut u8,
            len: slice.len(),
        }
    }

    /// Create a writable view for `receive` transfers.
    ///
    /// # Safety
    /// `slice` must remain valid, unmoved and unaccessed until the completion
    /// event of the transfer armed with this view has been observed.
    pub unsafe fn exclusive(slice: &mut [u8]) -> Self {
        Self {
            ptr: slice.as_mut_ptr(),
            len: slice.len(),
        }
    }

    /// Number of bytes covered by the view.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the view covers no bytes.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub(crate) fn get(&self, idx: usize) -> u8 {
        debug_assert!(idx < self.len);
        // Upheld by the constructor contract; idx stays below len by the
        // engine's byte counting.
        unsafe { *self.ptr.add(idx) }
    }

    pub(crate) fn set(&mut self, idx: usize, val: u8) {
        debug_assert!(idx < self.len);
        unsafe { *self.ptr.add(idx) = val }
    }
}
