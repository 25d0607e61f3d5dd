// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2023-2025 The windlass developers

//! Printing.

use crate::console;
use core::fmt;

//--------------------------------------------------------------------------------------------------
// Public Code
//--------------------------------------------------------------------------------------------------

#[doc(hidden)]
pub fn _print(args: fmt::Arguments) {
    use console::interface::Write;

    console::console().write_fmt(args).unwrap();
}

/// Prints without a newline.
///
/// Carbon copy from <https://doc.rust-lang.org/src/std/macros.rs.html>
#[macro_export]
macro_rules! print {
    ($($arg:tt)*) => ($crate::print::_print(format_args!($($arg)*)));
}

/// Prints with a newline.
#[macro_export]
macro_rules! println {
    () => ($crate::print!("\n"));
    ($string:expr) => ({
        $crate::print::_print(format_args!(concat!($string, "\n")));
    });
    ($format_string:expr, $($arg:tt)*) => ({
        $crate::print::_print(format_args!(concat!($format_string, "\n"), $($arg)*));
    })
}

/// Prints an info, with a newline.
#[macro_export]
macro_rules! info {
    ($string:expr) => ({
        $crate::print::_print(format_args!(concat!("[ I ] ", $string, "\n")));
    });
    ($format_string:expr, $($arg:tt)*) => ({
        $crate::print::_print(format_args!(
            concat!("[ I ] ", $format_string, "\n"),
            $($arg)*
        ));
    })
}

/// Prints a warning, with a newline.
#[macro_export]
macro_rules! warn {
    ($string:expr) => ({
        $crate::print::_print(format_args!(concat!("[ W ] ", $string, "\n")));
    });
    ($format_string:expr, $($arg:tt)*) => ({
        $crate::print::_print(format_args!(
            concat!("[ W ] ", $format_string, "\n"),
            $($arg)*
        ));
    })
}
