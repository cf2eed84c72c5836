#![cfg(feature = "play")]
use std::path::Path;
use std::time::Instant;

use anyhow::{anyhow, Context, Result};
use pixels::{Pixels, SurfaceTexture};
use winit::dpi::LogicalSize;
use winit::event::{ElementState, Event as WinitEvent, MouseScrollDelta, WindowEvent};
use winit::event_loop::{ControlFlow, EventLoop};
use winit::keyboard::{KeyCode, PhysicalKey};
use winit::window::WindowBuilder;

use crate::renderer::{StageRenderer, TickScene, Viewport};
use crate::schema::ExperienceConfig;
use crate::visualizer::Visualizer;

const INITIAL_WIDTH: f64 = 1280.0;
const INITIAL_HEIGHT: f64 = 720.0;

/// One wheel line advances progress by this much before damping.
const WHEEL_LINE_STEP: f32 = 0.03;
/// Pixel-delta wheels cover the full range over this many pixels.
const WHEEL_PIXEL_RANGE: f32 = 2400.0;
const KEY_STEP: f32 = 0.05;
const PAGE_STEP: f32 = 0.2;

/// Stand-in for the page's scroll-smoothing collaborator: accumulates a
/// target in [0,1] and eases the published value toward it.
struct ScrollInput {
    target: f32,
    smoothed: f32,
}

impl ScrollInput {
    const DAMPING: f32 = 6.0;

    fn new() -> Self {
        Self {
            target: 0.0,
            smoothed: 0.0,
        }
    }

    fn nudge(&mut self, delta: f32) {
        self.target = (self.target + delta).clamp(0.0, 1.0);
    }

    fn jump(&mut self, target: f32) {
        self.target = target.clamp(0.0, 1.0);
    }

    fn step(&mut self, dt: f32) -> f32 {
        self.smoothed += (self.target - self.smoothed) * (1.0 - (-Self::DAMPING * dt).exp());
        self.smoothed.clamp(0.0, 1.0)
    }
}

pub fn run_play(assets_dir: &Path, config: &ExperienceConfig) -> Result<()> {
    let mut visualizer = Visualizer::new(assets_dir, config)?;

    let event_loop = EventLoop::new().context("failed to create play event loop")?;
    let window = WindowBuilder::new()
        .with_title(format!("SSV Play - {}", assets_dir.display()))
        .with_inner_size(LogicalSize::new(INITIAL_WIDTH, INITIAL_HEIGHT))
        .build(&event_loop)
        .context("failed to create play window")?;

    let size = window.inner_size();
    let scale_factor = window.scale_factor() as f32;
    let viewport = Viewport::from_physical(size.width, size.height, scale_factor)?;
    let mut stage = StageRenderer::new(viewport, config.theme)?;

    let surface_texture = SurfaceTexture::new(size.width.max(1), size.height.max(1), &window);
    let mut pixels = Pixels::new(
        stage.physical_width(),
        stage.physical_height(),
        surface_texture,
    )
    .context("failed to create surface pixel buffer")?;

    let mut scroll = ScrollInput::new();
    let started = Instant::now();
    let mut last_tick = Instant::now();

    eprintln!(
        "[SSV] play: {} frame(s) from {} ({}x{} @ {:.2}x)",
        visualizer.store().frame_count(),
        assets_dir.display(),
        size.width,
        size.height,
        scale_factor
    );
    eprintln!("[SSV] Controls: scroll wheel / Up/Down scrub, Home/End jump, Esc quit");

    event_loop
        .run(move |event, target| {
            target.set_control_flow(ControlFlow::Poll);

            match event {
                WinitEvent::WindowEvent { window_id, event } if window_id == window.id() => {
                    match event {
                        WindowEvent::CloseRequested => target.exit(),
                        WindowEvent::KeyboardInput { event, .. } => {
                            if event.state == ElementState::Pressed {
                                match event.physical_key {
                                    PhysicalKey::Code(KeyCode::Escape) => target.exit(),
                                    PhysicalKey::Code(KeyCode::ArrowDown) => {
                                        scroll.nudge(KEY_STEP)
                                    }
                                    PhysicalKey::Code(KeyCode::ArrowUp) => scroll.nudge(-KEY_STEP),
                                    PhysicalKey::Code(KeyCode::PageDown) => scroll.nudge(PAGE_STEP),
                                    PhysicalKey::Code(KeyCode::PageUp) => scroll.nudge(-PAGE_STEP),
                                    PhysicalKey::Code(KeyCode::Home) => scroll.jump(0.0),
                                    PhysicalKey::Code(KeyCode::End) => scroll.jump(1.0),
                                    _ => {}
                                }
                            }
                        }
                        WindowEvent::MouseWheel { delta, .. } => match delta {
                            // Scrolling down advances the experience.
                            MouseScrollDelta::LineDelta(_, y) => {
                                scroll.nudge(-y * WHEEL_LINE_STEP)
                            }
                            MouseScrollDelta::PixelDelta(position) => {
                                scroll.nudge(-(position.y as f32) / WHEEL_PIXEL_RANGE)
                            }
                        },
                        WindowEvent::Resized(new_size) => {
                            if new_size.width > 0 && new_size.height > 0 {
                                let scale_factor = window.scale_factor() as f32;
                                match Viewport::from_physical(
                                    new_size.width,
                                    new_size.height,
                                    scale_factor,
                                )
                                .and_then(|viewport| stage.resize(viewport))
                                {
                                    Ok(()) => {
                                        if pixels
                                            .resize_surface(new_size.width, new_size.height)
                                            .and_then(|_| {
                                                pixels.resize_buffer(
                                                    stage.physical_width(),
                                                    stage.physical_height(),
                                                )
                                            })
                                            .is_err()
                                        {
                                            eprintln!("[SSV] play: surface resize failed");
                                            target.exit();
                                        }
                                    }
                                    Err(error) => {
                                        eprintln!("[SSV] play: resize error: {error:#}");
                                    }
                                }
                            }
                        }
                        WindowEvent::RedrawRequested => {
                            let now = Instant::now();
                            let dt = (now - last_tick).as_secs_f32().min(0.1);
                            last_tick = now;

                            visualizer.advance(now);
                            let scroll_progress = scroll.step(dt);
                            let state = visualizer.scene(now, scroll_progress);
                            let scene = TickScene {
                                time_secs: started.elapsed().as_secs_f64(),
                                frame: state.frame,
                                particles: visualizer.particles(),
                                loading_percent: state.loading_percent,
                            };
                            if let Err(error) = stage.render_tick(&scene) {
                                eprintln!("[SSV] play: render error: {error:#}");
                                return;
                            }

                            let source = stage.surface().data();
                            let frame_buffer = pixels.frame_mut();
                            if frame_buffer.len() == source.len() {
                                frame_buffer.copy_from_slice(source);
                            }
                            if let Err(error) = pixels.render() {
                                eprintln!("[SSV] play: present error: {error}");
                                target.exit();
                            }
                        }
                        _ => {}
                    }
                }
                WinitEvent::AboutToWait => {
                    window.request_redraw();
                }
                WinitEvent::LoopExiting => {
                    visualizer.shutdown();
                    eprintln!("[SSV] play: stopped");
                }
                _ => {}
            }
        })
        .map_err(|error| anyhow!("play event loop terminated: {error}"))
}
