// Copyright 2022 Ryan Seipp
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Growable, contiguous byte buffer used for connection input and owned output bytes.

use std::{
    alloc::{self, Layout},
    borrow::{Borrow, BorrowMut},
    io::Write,
    ops::{Deref, DerefMut},
    ptr::{copy, copy_nonoverlapping, NonNull},
};

/// A growable, contiguous byte buffer with independent read and write cursors.
#[derive(Debug)]
pub struct Buffer {
    ptr: NonNull<u8>,
    cap: usize,
    read_offset: usize,
    write_offset: usize,
    desired_capacity: usize,
}

impl Buffer {
    /// Creates a new `Buffer`, eagerly allocating at least `desired_capacity` bytes.
    pub fn new(desired_capacity: usize) -> Self {
        let mut result = Self {
            ptr: NonNull::dangling(),
            cap: 0, // `grow_to_capacity` will set this
            read_offset: 0,
            write_offset: 0,
            desired_capacity: desired_capacity.next_power_of_two(),
        };

        if desired_capacity > 0 {
            result.desired_capacity = 2;
            result.grow();
        }
        result
    }

    /// Reserves at least `capacity` additional bytes.
    pub fn reserve(&mut self, capacity: usize) {
        self.grow_to_capacity(self.cap + capacity);
    }

    /// Bytes available to be read.
    pub fn remaining(&self) -> usize {
        self.write_offset - self.read_offset
    }

    /// Bytes of capacity available for writing before a reallocation is needed.
    pub fn remaining_mut(&self) -> usize {
        self.cap - self.write_offset
    }

    /// The current write position.
    pub fn write_pos(&self) -> usize {
        self.write_offset
    }

    /// Gets the current read position as a pointer. Use `remaining` to obtain the length.
    pub fn read_ptr(&self) -> *mut u8 {
        // Safety: both `ptr` and the resulting ptr are guaranteed to be within the allocated
        // object due to checks when compacting and mutating offsets. The offset will not overflow
        // `isize::MAX` as we never allocate more than that.
        unsafe { self.ptr.as_ptr().add(self.read_offset) }
    }

    /// Gets the current write position as a pointer. Use `remaining_mut` to obtain the length.
    pub fn write_ptr(&self) -> *mut u8 {
        // Safety: both `ptr` and the resulting ptr are guaranteed to be within the allocated
        // object due to checks when compacting and mutating offsets. The offset will not overflow
        // `isize::MAX` as we never allocate more than that.
        unsafe { self.ptr.as_ptr().add(self.write_offset) }
    }

    /// Marks `amount` bytes read, freeing them for reuse. Skipping this after a read causes the
    /// next read to observe the same bytes again.
    pub fn mark_read(&mut self, amount: usize) {
        self.read_offset = self.write_offset.min(self.read_offset + amount);
        self.compact();
    }

    /// Marks `amount` bytes written. Skipping this after a write causes the next write to
    /// overwrite the previously written data.
    pub fn mark_written(&mut self, amount: usize) {
        self.write_offset = self.cap.min(self.write_offset + amount);
    }

    /// Drops the buffer's contents and resets both cursors to zero, retaining capacity.
    pub fn reset(&mut self) {
        self.read_offset = 0;
        self.write_offset = 0;
    }

    fn grow(&mut self) {
        let new_cap = if self.cap == 0 {
            self.desired_capacity
        } else {
            2 * self.cap
        };

        self.grow_to_capacity(new_cap);
    }

    /// Grows to at least `capacity` bytes (rounded up to the next power of two).
    ///
    /// Aborts the process if memory allocation fails.
    fn grow_to_capacity(&mut self, capacity: usize) {
        assert!(capacity <= isize::MAX as usize);

        let new_cap = capacity.next_power_of_two().min(isize::MAX as usize);
        if new_cap <= self.cap {
            return;
        }

        let new_layout = Layout::array::<u8>(new_cap).unwrap();
        let new_ptr = if self.cap == 0 {
            // Safety: allocation failure is handled below, layout is not zero-sized.
            unsafe { alloc::alloc(new_layout) }
        } else {
            let old_layout = Layout::array::<u8>(self.cap).unwrap();
            let old_ptr = self.ptr.as_ptr();

            // Safety: allocation failure is handled below, layout is not zero-sized.
            unsafe { alloc::realloc(old_ptr, old_layout, new_layout.size()) }
        };

        self.ptr = match NonNull::new(new_ptr) {
            Some(p) => p,
            None => alloc::handle_alloc_error(new_layout),
        };
        self.cap = new_cap;
    }

    /// Reset the buffer to a clean initial state and frees excess capacity.
    fn clear(&mut self) {
        self.read_offset = 0;
        self.write_offset = 0;

        if self.cap > self.desired_capacity {
            let layout = Layout::array::<u8>(self.cap).unwrap();

            // Safety: allocation failure is handled below, layout is not zero-sized.
            let new_ptr =
                unsafe { alloc::realloc(self.ptr.as_ptr(), layout, self.desired_capacity) };

            self.ptr = match NonNull::new(new_ptr) {
                Some(p) => p,
                None => alloc::handle_alloc_error(layout),
            };
            self.cap = self.desired_capacity;
        }
    }

    /// Slides unread bytes to the front of the allocation once the read cursor has drifted past
    /// the buffer's steady-state capacity, bounding growth for long-lived connections.
    fn compact(&mut self) {
        if self.remaining() == 0 {
            self.clear();
            return;
        }

        if self.cap == self.desired_capacity {
            return;
        }

        if self.read_offset > self.desired_capacity {
            if self.remaining() < self.read_offset {
                // Safety: `read_ptr()` and `ptr` are valid for `remaining()` and are aligned to
                // u8. The regions do not overlap since the read region is smaller than the
                // offset being vacated.
                unsafe {
                    copy_nonoverlapping(self.read_ptr(), self.ptr.as_ptr(), self.remaining())
                }
            } else {
                // Safety: `read_ptr()` and `ptr` are valid for `remaining()` and are aligned to
                // u8; overlapping regions are handled by `copy`.
                unsafe { copy(self.read_ptr(), self.ptr.as_ptr(), self.remaining()) }
            }

            self.write_offset = self.remaining();
            self.read_offset = 0;
        }
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        if self.cap != 0 {
            let layout = Layout::array::<u8>(self.cap).unwrap();
            // Safety: `ptr`/`cap` describe the single allocation made by `grow_to_capacity`.
            unsafe { alloc::dealloc(self.ptr.as_ptr(), layout) }
        }
    }
}

// Safety: `Buffer` owns its allocation exclusively; there is no shared mutable state.
unsafe impl Send for Buffer {}

impl Borrow<[u8]> for Buffer {
    fn borrow(&self) -> &[u8] {
        // Safety: see `read_ptr`/`remaining`.
        unsafe { std::slice::from_raw_parts(self.read_ptr(), self.remaining()) }
    }
}

impl BorrowMut<[u8]> for Buffer {
    fn borrow_mut(&mut self) -> &mut [u8] {
        // Safety: see `write_ptr`/`remaining_mut`.
        unsafe { std::slice::from_raw_parts_mut(self.write_ptr(), self.remaining_mut()) }
    }
}

impl Deref for Buffer {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        self.borrow()
    }
}

impl DerefMut for Buffer {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.borrow_mut()
    }
}

impl Write for Buffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        if self.remaining_mut() < buf.len() {
            self.reserve(buf.len());
        }
        self.deref_mut()[0..buf.len()].clone_from_slice(buf);
        self.mark_written(buf.len());
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_read_round_trips() {
        let mut buf = Buffer::new(16);
        buf.write_all(b"hello world").unwrap();
        assert_eq!(&buf[..], b"hello world");
        buf.mark_read(6);
        assert_eq!(&buf[..], b"world");
    }

    #[test]
    fn draining_to_empty_resets_cursors() {
        let mut buf = Buffer::new(16);
        buf.write_all(b"hi").unwrap();
        buf.mark_read(2);
        assert_eq!(buf.remaining(), 0);
        buf.write_all(b"again").unwrap();
        assert_eq!(&buf[..], b"again");
    }

    #[test]
    fn grows_past_initial_capacity() {
        let mut buf = Buffer::new(4);
        let data = vec![7u8; 1000];
        buf.write_all(&data).unwrap();
        assert_eq!(buf.remaining(), 1000);
        assert_eq!(&buf[..], &data[..]);
    }

    #[test]
    fn compacts_long_lived_read_drift() {
        let mut buf = Buffer::new(16);
        for _ in 0..100 {
            buf.write_all(b"0123456789").unwrap();
            buf.mark_read(10);
        }
        assert_eq!(buf.remaining(), 0);
    }
}
