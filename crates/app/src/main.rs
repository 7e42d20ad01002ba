//! Kiln - Main Entry Point
//!
//! Loads `kiln.toml` (or the path given as the first argument), opens a
//! window and drives the renderer from the winit event loop.

use std::path::PathBuf;

use anyhow::{Context, Result};
use tracing::{debug, error, info, warn};
use winit::application::ApplicationHandler;
use winit::event::WindowEvent;
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::window::WindowId;

use kiln_core::{EngineConfig, Timer};
use kiln_platform::Window;
use kiln_renderer::{FrameStatus, Renderer, SceneAssets};
use kiln_resources::{MeshData, TextureData, load_spirv};

const DEFAULT_CONFIG_PATH: &str = "kiln.toml";

/// Checkerboard used when no texture is configured.
const CHECKERBOARD_SIZE: u32 = 256;
const CHECKERBOARD_CELL: u32 = 32;

/// Seconds between frame-rate log lines.
const FPS_LOG_INTERVAL: f32 = 5.0;

struct App {
    config: EngineConfig,
    window: Option<Window>,
    renderer: Option<Renderer>,
    timer: Timer,
    last_fps_log: f32,
}

impl App {
    fn new(config: EngineConfig) -> Self {
        Self {
            config,
            window: None,
            renderer: None,
            timer: Timer::new(),
            last_fps_log: 0.0,
        }
    }

    fn initialize(&mut self, event_loop: &ActiveEventLoop) -> Result<()> {
        let window =
            Window::new(event_loop, &self.config.window).context("Failed to create window")?;
        let scene = load_scene(&self.config).context("Failed to load scene assets")?;
        let renderer = Renderer::initialize(&window, &self.config, scene)
            .context("Failed to initialize renderer")?;

        self.window = Some(window);
        self.renderer = Some(renderer);
        Ok(())
    }

    fn log_frame_rate(&mut self) {
        let elapsed = self.timer.elapsed_secs();
        if elapsed - self.last_fps_log >= FPS_LOG_INTERVAL {
            self.last_fps_log = elapsed;
            info!(
                "{} frames, {:.1} fps average",
                self.timer.frame_count(),
                self.timer.average_fps()
            );
        }
    }
}

/// Reads shaders, model and texture named by the asset config.
fn load_scene(config: &EngineConfig) -> Result<SceneAssets> {
    let assets = &config.assets;

    let vertex_spirv = load_spirv(&assets.vertex_shader)
        .with_context(|| format!("vertex shader {}", assets.vertex_shader.display()))?;
    let fragment_spirv = load_spirv(&assets.fragment_shader)
        .with_context(|| format!("fragment shader {}", assets.fragment_shader.display()))?;

    let mesh = match &assets.model {
        Some(path) => MeshData::load_obj(path)
            .with_context(|| format!("model {}", path.display()))?,
        None => MeshData::textured_quads(),
    };

    let texture = match &assets.texture {
        Some(path) => {
            TextureData::load(path).with_context(|| format!("texture {}", path.display()))?
        }
        None => TextureData::checkerboard(CHECKERBOARD_SIZE, CHECKERBOARD_CELL),
    };

    Ok(SceneAssets {
        mesh,
        texture,
        vertex_spirv,
        fragment_spirv,
    })
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        match self.initialize(event_loop) {
            Ok(()) => info!("Initialization complete, entering main loop"),
            Err(e) => {
                error!("Startup failed: {:#}", e);
                event_loop.exit();
            }
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => {
                info!("Close requested, shutting down");
                event_loop.exit();
            }
            WindowEvent::Resized(size) => {
                info!("Window resized to {}x{}", size.width, size.height);
                if let Some(ref window) = self.window {
                    window.mark_resized();
                }
            }
            WindowEvent::RedrawRequested => {
                let Some(ref mut renderer) = self.renderer else {
                    return;
                };

                match renderer.draw_frame() {
                    Ok(FrameStatus::Presented { .. }) => {
                        self.timer.tick();
                        self.log_frame_rate();
                    }
                    Ok(FrameStatus::Skipped) => {}
                    Err(e) => {
                        error!("Fatal frame error: {}", e);
                        event_loop.exit();
                    }
                }
            }
            _ => {}
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(ref window) = self.window {
            window.request_redraw();
        }
    }

    fn exiting(&mut self, _event_loop: &ActiveEventLoop) {
        // Renderer first: it waits for the device and owns the surface.
        self.renderer = None;
        self.window = None;
    }
}

fn main() -> Result<()> {
    let config_path = std::env::args_os()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));

    let config = EngineConfig::load(&config_path)
        .with_context(|| format!("Failed to load config {}", config_path.display()))?;

    kiln_core::init_logging(&config.logging.filter);
    info!("Starting Kiln with config {}", config_path.display());
    if !config_path.exists() {
        warn!("No config at {}, using defaults", config_path.display());
    }
    debug!("Config: {:?}", config);

    let event_loop = EventLoop::new()?;
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut app = App::new(config);
    event_loop.run_app(&mut app)?;

    Ok(())
}
