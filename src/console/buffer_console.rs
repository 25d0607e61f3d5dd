// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2023-2025 The windlass developers

//! A console that buffers output into memory.
//!
//! The default sink on the hosted model. A real board would register a UART in its place during
//! the init phase.

use super::interface;
use crate::synchronization::{interface::Mutex, NullLock};
use core::fmt;

//--------------------------------------------------------------------------------------------------
// Private Definitions
//--------------------------------------------------------------------------------------------------

const BUF_SIZE: usize = 1024 * 64;

pub struct BufferConsoleInner {
    buf: [char; BUF_SIZE],
    write_ptr: usize,
}

//--------------------------------------------------------------------------------------------------
// Public Definitions
//--------------------------------------------------------------------------------------------------

pub struct BufferConsole {
    inner: NullLock<BufferConsoleInner>,
}

//--------------------------------------------------------------------------------------------------
// Global instances
//--------------------------------------------------------------------------------------------------

pub static BUFFER_CONSOLE: BufferConsole = BufferConsole {
    inner: NullLock::new(BufferConsoleInner {
        // Use the null character, so this lands in .bss and does not waste space in the binary.
        buf: ['\0'; BUF_SIZE],
        write_ptr: 0,
    }),
};

//--------------------------------------------------------------------------------------------------
// Private Code
//--------------------------------------------------------------------------------------------------

impl BufferConsoleInner {
    fn write_char(&mut self, c: char) {
        if self.write_ptr < (BUF_SIZE - 1) {
            self.buf[self.write_ptr] = c;
            self.write_ptr += 1;
        }
    }
}

impl fmt::Write for BufferConsoleInner {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        for c in s.chars() {
            self.write_char(c);
        }

        Ok(())
    }
}

//--------------------------------------------------------------------------------------------------
// Public Code
//--------------------------------------------------------------------------------------------------

impl interface::Write for BufferConsole {
    fn write_char(&self, c: char) {
        self.inner.lock(|inner| inner.write_char(c));
    }

    fn write_fmt(&self, args: fmt::Arguments) -> fmt::Result {
        self.inner.lock(|inner| fmt::Write::write_fmt(inner, args))
    }

    fn flush(&self) {}
}

impl interface::Statistics for BufferConsole {
    fn chars_written(&self) -> usize {
        self.inner.lock(|inner| inner.write_ptr)
    }
}

impl interface::All for BufferConsole {}
