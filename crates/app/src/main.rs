//! vkframe demo entry point.
//!
//! Opens a window and drives the offscreen, post and UI passes every frame,
//! recreating the swapchain as the window is resized or minimized.

use std::time::Instant;

use anyhow::Result;
use glam::{Mat4, Vec3};
use tracing::{error, info};
use winit::application::ApplicationHandler;
use winit::event::WindowEvent;
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::window::WindowId;

use vkframe_core::{FrameTimer, RendererConfig};
use vkframe_platform::Window;
use vkframe_renderer::{
    BeginFrame, CameraUniform, ClearValues, DEFAULT_CLEAR_COLOR, EndFrame, Renderer,
    RendererResult,
};

struct App {
    config: RendererConfig,
    window: Option<Window>,
    renderer: Option<Renderer>,
    timer: FrameTimer,
    start: Instant,
    /// Fatal error that ended the event loop, returned from `main`.
    fatal: Option<anyhow::Error>,
}

impl App {
    fn new(config: RendererConfig) -> Self {
        Self {
            config,
            window: None,
            renderer: None,
            timer: FrameTimer::new(),
            start: Instant::now(),
            fatal: None,
        }
    }

    fn draw_frame(&mut self) -> RendererResult<()> {
        let Some(renderer) = self.renderer.as_mut() else {
            return Ok(());
        };

        let BeginFrame::Ready(_) = renderer.begin_frame()? else {
            return Ok(());
        };

        let extent = renderer.extent();
        let aspect = extent.width as f32 / extent.height.max(1) as f32;
        let angle = self.start.elapsed().as_secs_f32() * 0.5;
        let eye = Vec3::new(angle.cos() * 4.0, 2.0, angle.sin() * 4.0);
        let camera = CameraUniform::new(
            Mat4::look_at_rh(eye, Vec3::ZERO, Vec3::Y),
            Mat4::perspective_rh(45f32.to_radians(), aspect, 0.1, 100.0),
            eye,
        );
        renderer.update_camera(&camera)?;

        for pass in renderer.passes() {
            renderer.begin_pass(pass, &ClearValues::for_pass(pass, DEFAULT_CLEAR_COLOR))?;
            renderer.end_pass();
        }

        if renderer.end_frame()? == EndFrame::Recreated {
            info!("Swapchain recreated, now {}x{}", renderer.extent().width, renderer.extent().height);
        }

        let (_, stats) = self.timer.tick();
        if let Some(stats) = stats {
            info!(
                "{:.1} fps ({:.2} ms/frame, {} frames)",
                stats.fps, stats.frame_time_ms, stats.frames
            );
        }
        Ok(())
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, error: anyhow::Error) {
        self.record_fatal(error);
        self.shutdown(event_loop);
    }

    /// Keeps the first fatal error; later ones are only logged.
    fn record_fatal(&mut self, error: anyhow::Error) {
        error!("{:#}", error);
        if self.fatal.is_none() {
            self.fatal = Some(error);
        }
    }

    /// Drops the renderer, idling the device, and reports how the run ended.
    fn finish(mut self) -> Result<()> {
        drop(self.renderer.take());
        match self.fatal.take() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn shutdown(&mut self, event_loop: &ActiveEventLoop) {
        if let Some(renderer) = self.renderer.as_mut()
            && let Err(e) = renderer.wait_idle()
        {
            error!("Failed to idle device on shutdown: {}", e);
        }
        event_loop.exit();
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        let window = match Window::new(event_loop, &self.config) {
            Ok(window) => window,
            Err(e) => {
                self.fail(event_loop, anyhow::Error::new(e).context("failed to create window"));
                return;
            }
        };

        match Renderer::new(&window, self.config.clone()) {
            Ok(renderer) => {
                info!("Initialization complete, entering main loop");
                self.renderer = Some(renderer);
                self.window = Some(window);
            }
            Err(e) => {
                self.fail(event_loop, anyhow::Error::new(e).context("failed to create renderer"));
            }
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => {
                info!("Close requested, shutting down");
                self.shutdown(event_loop);
            }
            WindowEvent::Resized(size) => {
                info!("Window resized to {}x{}", size.width, size.height);
                if let Some(window) = &self.window {
                    window.mark_resized();
                }
            }
            WindowEvent::RedrawRequested => {
                if self.window.as_ref().is_some_and(Window::is_minimized) {
                    return;
                }
                if let Err(e) = self.draw_frame() {
                    self.fail(event_loop, anyhow::Error::new(e).context("render error"));
                }
            }
            _ => {}
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(window) = &self.window {
            window.request_redraw();
        }
    }
}

fn main() -> Result<()> {
    vkframe_core::init_logging();
    info!("Starting vkframe");

    let config = RendererConfig::from_env()?;
    info!("{:?}", config);

    let event_loop = EventLoop::new()?;
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut app = App::new(config);
    event_loop.run_app(&mut app)?;
    app.finish()
}
