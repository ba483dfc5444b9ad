//! GC tracing descriptor decoding.
//!
//! The runtime stores a compact description of which slots of an instance hold GC references
//! in the memory immediately *preceding* each pointer-containing method table: a signed
//! series count in the slot just below the table, then `2 x |count|` pointer-sized slots.
//! A positive count is a list of `(size, offset)` series; a negative count switches to the
//! repeating form used for value-type arrays, where each series carries `(pointers, skip)`
//! half-word pairs that tile across the elements.
//!
//! [`GcDesc`] holds a copy of that region and walks a concrete object with it, reporting
//! every contained object reference. The heap builds one lazily per type and treats an
//! unreadable descriptor region as "no pointers" rather than an error - the target may be
//! inconsistent and tracing must never crash.

/// Decoded GC descriptor for one type.
///
/// The byte buffer is the raw descriptor region below the method table, laid
/// out exactly as the runtime wrote it; all offsets into it are computed the
/// way the runtime's own object walker computes them.
#[derive(Debug, Clone)]
pub struct GcDesc {
    data: Vec<u8>,
    pointer_size: usize,
}

impl GcDesc {
    /// Wrap a raw descriptor region. `data` must end with the series-count
    /// slot (i.e. it is the `(1 + 2 x |count|)` pointer-sized slots directly
    /// below the method table).
    #[must_use]
    pub fn new(data: Vec<u8>, pointer_size: usize) -> Self {
        GcDesc { data, pointer_size }
    }

    fn read_slot(&self, offset: usize) -> i64 {
        match self.pointer_size {
            4 => {
                let bytes: [u8; 4] = match self.data.get(offset..offset + 4) {
                    Some(slice) => slice.try_into().unwrap_or([0; 4]),
                    None => return 0,
                };
                i64::from(i32::from_le_bytes(bytes))
            }
            _ => {
                let bytes: [u8; 8] = match self.data.get(offset..offset + 8) {
                    Some(slice) => slice.try_into().unwrap_or([0; 8]),
                    None => return 0,
                };
                i64::from_le_bytes(bytes)
            }
        }
    }

    fn read_half_slot(&self, offset: usize) -> u32 {
        match self.pointer_size {
            4 => {
                let bytes: [u8; 2] = match self.data.get(offset..offset + 2) {
                    Some(slice) => slice.try_into().unwrap_or([0; 2]),
                    None => return 0,
                };
                u32::from(u16::from_le_bytes(bytes))
            }
            _ => {
                let bytes: [u8; 4] = match self.data.get(offset..offset + 4) {
                    Some(slice) => slice.try_into().unwrap_or([0; 4]),
                    None => return 0,
                };
                u32::from_le_bytes(bytes)
            }
        }
    }

    fn num_series(&self) -> i64 {
        self.read_slot(self.data.len().saturating_sub(self.pointer_size))
    }

    fn highest_series(&self) -> usize {
        self.data.len().saturating_sub(self.pointer_size * 3)
    }

    fn lowest_series(&self, series: i64) -> usize {
        let bytes = self.pointer_size + (series.unsigned_abs() as usize) * 2 * self.pointer_size;
        self.data.len().saturating_sub(bytes)
    }

    fn series_size(&self, curr: usize) -> i64 {
        self.read_slot(curr)
    }

    fn series_offset(&self, curr: usize) -> u64 {
        self.read_slot(curr + self.pointer_size) as u64
    }

    fn pointers(&self, curr: usize, i: i64) -> u32 {
        // In the repeating form each slot pair is reused as half-width
        // (pointers, skip) counters.
        let offset = curr.wrapping_add((i as usize).wrapping_mul(self.pointer_size));
        self.read_half_slot(offset)
    }

    fn skip(&self, curr: usize, i: i64) -> u32 {
        let offset = curr
            .wrapping_add((i as usize).wrapping_mul(self.pointer_size))
            .wrapping_add(self.pointer_size / 2);
        self.read_half_slot(offset)
    }

    /// Walk the object at `addr` of total size `size`, invoking `callback`
    /// with `(reference_value, offset_within_object)` for every nonzero
    /// object-reference slot.
    ///
    /// `read_pointer` reads one pointer from the target; returning `None`
    /// skips the slot and keeps walking.
    pub fn walk_object<R, F>(&self, addr: u64, size: u64, read_pointer: R, mut callback: F)
    where
        R: Fn(u64) -> Option<u64>,
        F: FnMut(u64, u64),
    {
        let series = self.num_series();
        if series == 0 {
            return;
        }

        let ptr_size = self.pointer_size as u64;
        let mut curr = self.highest_series();

        if series > 0 {
            let lowest = self.lowest_series(series);
            loop {
                let mut ptr = addr.wrapping_add(self.series_offset(curr));
                let stop = ptr
                    .wrapping_add(self.series_size(curr) as u64)
                    .wrapping_add(size);
                while ptr < stop {
                    if let Some(value) = read_pointer(ptr) {
                        if value != 0 {
                            callback(value, ptr - addr);
                        }
                    }
                    ptr = ptr.wrapping_add(ptr_size);
                }

                if curr < lowest + 2 * self.pointer_size {
                    break;
                }
                curr -= 2 * self.pointer_size;
            }
        } else {
            // Repeating form: tile the (pointers, skip) pairs across the
            // array payload until the end of the object.
            let mut ptr = addr.wrapping_add(self.series_offset(curr));
            let end = addr.wrapping_add(size).wrapping_sub(ptr_size);
            while ptr < end {
                let mut i = 0;
                while i > series {
                    let nptrs = self.pointers(curr, i);
                    let skip = self.skip(curr, i);
                    let stop = ptr.wrapping_add(u64::from(nptrs) * ptr_size);
                    if nptrs == 0 && skip == 0 {
                        // Corrupt descriptor; bail rather than spin.
                        return;
                    }
                    while ptr < stop && ptr < end {
                        if let Some(value) = read_pointer(ptr) {
                            if value != 0 {
                                callback(value, ptr - addr);
                            }
                        }
                        ptr = ptr.wrapping_add(ptr_size);
                    }
                    ptr = ptr.wrapping_add(u64::from(skip));
                    i -= 1;
                }
            }
        }
    }
}
