// SPDX-License-Identifier: CEPL-1.0
//! Windowing layer. The app consumes winit through this crate so the
//! event-loop surface stays in one place.

pub use winit;
