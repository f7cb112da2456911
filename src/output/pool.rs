// SPDX-FileCopyrightText: The usbmidi authors
// SPDX-License-Identifier: MPL-2.0

use strum::{EnumCount, EnumIter, IntoEnumIterator as _};

/// Fixed buffer sizes for pooled packets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumCount, EnumIter)]
pub enum SizeClass {
    /// A single 32-bit word
    Packet32,
    /// Two 32-bit words
    Packet64,
    /// Four 32-bit words
    Packet128,
}

impl SizeClass {
    #[must_use]
    pub const fn len(self) -> usize {
        match self {
            Self::Packet32 => 4,
            Self::Packet64 => 8,
            Self::Packet128 => 16,
        }
    }

    /// The smallest class that fits `len` bytes.
    #[must_use]
    pub fn for_len(len: usize) -> Option<Self> {
        Self::iter().find(|class| class.len() >= len)
    }

    const fn index(self) -> usize {
        self as usize
    }
}

/// Pre-allocated packet buffers, one free list per size class.
///
/// Buffers are never allocated after construction. A buffer is either
/// in its free list or owned by a sender.
#[derive(Debug)]
pub struct BufferPool {
    capacity: usize,
    free: [Vec<Vec<u8>>; SizeClass::COUNT],
}

impl BufferPool {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let free = [SizeClass::Packet32, SizeClass::Packet64, SizeClass::Packet128].map(|class| {
            std::iter::repeat_with(|| vec![0; class.len()])
                .take(capacity)
                .collect()
        });
        Self { capacity, free }
    }

    /// Initial number of buffers per size class.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    #[must_use]
    pub fn free_count(&self, class: SizeClass) -> usize {
        self.free[class.index()].len()
    }

    /// Take a zeroed buffer.
    #[must_use]
    pub fn try_acquire(&mut self, class: SizeClass) -> Option<Vec<u8>> {
        let mut buf = self.free[class.index()].pop()?;
        buf.fill(0);
        Some(buf)
    }

    pub fn release(&mut self, class: SizeClass, buf: Vec<u8>) {
        debug_assert_eq!(class.len(), buf.len());
        let free = &mut self.free[class.index()];
        if free.len() >= self.capacity {
            log::warn!("Discarding surplus {class:?} buffer");
            return;
        }
        free.push(buf);
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new(super::DEFAULT_POOL_CAPACITY)
    }
}
