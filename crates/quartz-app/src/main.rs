// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]
use anyhow::Result;
use clap::Parser;
use quartz_core::{init_tracing, FrameClock};
use quartz_render::{RenderSize, Renderer};
use quartz_render_vk::{VkConfig, VkRenderer};
use tracing::{error, info};

use quartz_platform::winit::{
    application::ApplicationHandler,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, ControlFlow, EventLoop},
    raw_window_handle::{HasDisplayHandle, HasWindowHandle},
    window::{Window, WindowId},
};

use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Enable the Vulkan validation layer and debug messenger
    #[arg(long)]
    diagnostics: bool,

    /// Path to the config file
    #[arg(long, default_value = "quartz.toml")]
    config: PathBuf,
}

#[derive(Debug, Deserialize, Clone, Copy)]
struct RenderCfg {
    #[serde(default)]
    diagnostics: bool,
    /// Bound in milliseconds for the per-frame fence waits; 0 waits forever.
    #[serde(default = "default_frame_timeout_ms")]
    frame_timeout_ms: u64,
}

impl Default for RenderCfg {
    fn default() -> Self {
        RenderCfg {
            diagnostics: false,
            frame_timeout_ms: default_frame_timeout_ms(),
        }
    }
}

fn default_frame_timeout_ms() -> u64 {
    5_000
}

#[derive(Debug, Deserialize, Default)]
struct AppCfg {
    #[serde(default)]
    render: RenderCfg,
}

fn load_cfg(path: &Path) -> AppCfg {
    match fs::read_to_string(path) {
        Ok(s) => toml::from_str::<AppCfg>(&s).unwrap_or_default(),
        Err(_) => AppCfg::default(),
    }
}

struct App {
    cfg: AppCfg,
    window: Option<Window>,
    renderer: Option<VkRenderer>,
    clock: FrameClock,

    exiting: bool,
    frames: u32,
    last_fps_instant: std::time::Instant,
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_none() {
            let window = event_loop
                .create_window(Window::default_attributes().with_title("quartz"))
                .expect("create_window");

            let size = window.inner_size();
            let render_size = RenderSize {
                width: size.width.max(1),
                height: size.height.max(1),
            };

            let wh = window.window_handle().expect("window_handle");
            let dh = window.display_handle().expect("display_handle");

            let config = VkConfig {
                diagnostics: self.cfg.render.diagnostics,
                frame_timeout: match self.cfg.render.frame_timeout_ms {
                    0 => None,
                    ms => Some(Duration::from_millis(ms)),
                },
            };

            match VkRenderer::with_config(&wh, &dh, render_size, config) {
                Ok(renderer) => self.renderer = Some(renderer),
                Err(e) => {
                    error!("vk init failed: {e}");
                    event_loop.exit();
                    return;
                }
            }

            info!("diagnostics = {}", config.diagnostics);
            self.window = Some(window);
        }

        event_loop.set_control_flow(ControlFlow::Wait);
        if let Some(w) = &self.window {
            w.request_redraw();
        }
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        window_id: WindowId,
        event: WindowEvent,
    ) {
        if let Some(window) = &self.window {
            if window_id != window.id() {
                return;
            }
        }

        match event {
            WindowEvent::CloseRequested => {
                info!("CloseRequested");
                self.exiting = true;
                // Renderer drop drains the device before any teardown.
                self.renderer = None;
                self.window = None;
                event_loop.exit();
            }

            WindowEvent::Resized(new_size) => {
                // Resize handling is not implemented; a stale swapchain is
                // reported (and the frame skipped) by the renderer.
                info!("Resized → {}x{}", new_size.width, new_size.height);
            }

            WindowEvent::RedrawRequested => {
                if self.exiting {
                    return;
                }

                if let Some(renderer) = &mut self.renderer {
                    let elapsed = self.clock.tick();
                    match renderer.render(elapsed) {
                        Ok(()) => {
                            // count only frames that were actually rendered
                            self.frames = self.frames.saturating_add(1);
                        }
                        Err(e) => {
                            error!("render error: {e}");
                            event_loop.exit();
                        }
                    }
                }
            }

            _ => {}
        }
    }

    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        if self.exiting {
            return;
        }

        // Block until events, then redraw once per wakeup.
        event_loop.set_control_flow(ControlFlow::Wait);
        if let Some(w) = &self.window {
            w.request_redraw();
        }

        let now = std::time::Instant::now();
        if now.duration_since(self.last_fps_instant).as_secs_f32() >= 1.0 {
            info!("fps ~ {}", self.frames);
            self.frames = 0;
            self.last_fps_instant = now;
        }
    }
}

fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();

    let mut cfg = load_cfg(&args.config);
    if args.diagnostics {
        cfg.render.diagnostics = true;
    }

    let event_loop: EventLoop<()> = EventLoop::new()?;

    let mut app = App {
        cfg,
        window: None,
        renderer: None,
        clock: FrameClock::start(),
        exiting: false,
        frames: 0,
        last_fps_instant: std::time::Instant::now(),
    };

    event_loop.run_app(&mut app)?;
    Ok(())
}
