// SPDX-License-Identifier: CEPL-1.0
use anyhow::Result;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};

/// Framebuffer size in pixels, as reported by the windowing layer.
#[derive(Clone, Copy, Debug)]
pub struct RenderSize {
    pub width: u32,
    pub height: u32,
}

pub trait Renderer {
    fn new(
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
        size: RenderSize,
    ) -> Result<Self>
    where
        Self: Sized;

    /// One render tick; `elapsed` is the time in seconds since the previous
    /// tick. Invoked once per display refresh by the event loop, never
    /// reentrantly.
    fn render(&mut self, elapsed: f64) -> Result<()>;
}
