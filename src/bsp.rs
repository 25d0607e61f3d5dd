// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2023-2025 The windlass developers

//! Conditional reexporting of Board Support Packages.

mod sim;

pub use sim::*;
