use std::f32::consts::TAU;

use anyhow::{anyhow, Result};
use tiny_skia::{
    Color, ColorU8, FillRule, FilterQuality, GradientStop, Paint, PathBuilder, Pattern, Pixmap,
    Point, RadialGradient, Rect, SpreadMode, Stroke, Transform,
};

use crate::particles::ParticleField;
use crate::schema::Theme;

/// The frame occupies this share of the limiting viewport dimension.
pub const STAGE_FIT: f32 = 0.8;
/// Vertical float oscillation amplitude in logical pixels.
const FLOAT_AMPLITUDE: f64 = 15.0;
/// Glow center alpha, fading to transparent at the gradient edge.
const GLOW_CENTER_ALPHA: u8 = 0x22;
const SHADOW_ALPHA: f32 = 0.5;
const SHADOW_SIGMA: f32 = 25.0;
/// The shadow mask is blurred at reduced resolution and scaled back up.
const SHADOW_DOWNSCALE: f32 = 4.0;

const SPINNER_RADIUS: f32 = 24.0;
const SPINNER_OFFSET_Y: f32 = 40.0;
const LOADING_BAR_WIDTH: f32 = 240.0;
const LOADING_BAR_HEIGHT: f32 = 2.0;

/// Logical viewport dimensions plus the device scale factor; the backing
/// store is allocated at physical (scaled) resolution.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub width: f32,
    pub height: f32,
    pub scale_factor: f32,
}

impl Viewport {
    pub fn new(width: f32, height: f32, scale_factor: f32) -> Result<Self> {
        if !(width.is_finite() && height.is_finite() && scale_factor.is_finite()) {
            return Err(anyhow!("viewport dimensions must be finite"));
        }
        if width < 1.0 || height < 1.0 || scale_factor <= 0.0 {
            return Err(anyhow!(
                "invalid viewport {}x{} at scale {}",
                width,
                height,
                scale_factor
            ));
        }
        Ok(Self {
            width,
            height,
            scale_factor,
        })
    }

    pub fn from_physical(width: u32, height: u32, scale_factor: f32) -> Result<Self> {
        if scale_factor <= 0.0 || !scale_factor.is_finite() {
            return Err(anyhow!("invalid scale factor {scale_factor}"));
        }
        Self::new(
            (width.max(1) as f32 / scale_factor).max(1.0),
            (height.max(1) as f32 / scale_factor).max(1.0),
            scale_factor,
        )
    }

    pub fn physical_width(&self) -> u32 {
        (self.width * self.scale_factor).ceil().max(1.0) as u32
    }

    pub fn physical_height(&self) -> u32 {
        (self.height * self.scale_factor).ceil().max(1.0) as u32
    }
}

/// Centered, aspect-preserving placement in logical coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FitRect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

/// Fits an image into the viewport at [`STAGE_FIT`] of the limiting
/// dimension, centered.
pub fn fit_rect(image_width: u32, image_height: u32, view_width: f32, view_height: f32) -> FitRect {
    let image_ratio = image_width as f32 / image_height as f32;
    let view_ratio = view_width / view_height;

    let (width, height) = if view_ratio > image_ratio {
        let height = view_height * STAGE_FIT;
        (height * image_ratio, height)
    } else {
        let width = view_width * STAGE_FIT;
        (width, width / image_ratio)
    };

    FitRect {
        x: (view_width - width) / 2.0,
        y: (view_height - height) / 2.0,
        width,
        height,
    }
}

/// Everything the stage needs for one tick. Time is supplied by the caller so
/// identical scenes render identically.
pub struct TickScene<'a> {
    pub time_secs: f64,
    pub frame: Option<&'a Pixmap>,
    pub particles: &'a ParticleField,
    /// Drawn while preloading; `None` once ready.
    pub loading_percent: Option<u32>,
}

struct ShadowCache {
    key: (u32, u32),
    mask: Pixmap,
    margin: f32,
}

/// CPU stage renderer. Clears, draws the current frame with glow/shadow/float,
/// overlays the particle field, and draws the loading indicator while assets
/// resolve.
pub struct StageRenderer {
    theme: Theme,
    viewport: Viewport,
    surface: Pixmap,
    shadow: Option<ShadowCache>,
}

impl StageRenderer {
    pub fn new(viewport: Viewport, theme: Theme) -> Result<Self> {
        let surface = Pixmap::new(viewport.physical_width(), viewport.physical_height())
            .ok_or_else(|| {
                anyhow!(
                    "cannot allocate {}x{} stage surface",
                    viewport.physical_width(),
                    viewport.physical_height()
                )
            })?;
        Ok(Self {
            theme,
            viewport,
            surface,
            shadow: None,
        })
    }

    pub fn viewport(&self) -> Viewport {
        self.viewport
    }

    pub fn physical_width(&self) -> u32 {
        self.surface.width()
    }

    pub fn physical_height(&self) -> u32 {
        self.surface.height()
    }

    pub fn surface(&self) -> &Pixmap {
        &self.surface
    }

    /// Reallocates the backing store for a new viewport (window resize or
    /// scale factor change). Cached derived surfaces are dropped.
    pub fn resize(&mut self, viewport: Viewport) -> Result<()> {
        if viewport == self.viewport {
            return Ok(());
        }
        self.surface = Pixmap::new(viewport.physical_width(), viewport.physical_height())
            .ok_or_else(|| {
                anyhow!(
                    "cannot allocate {}x{} stage surface",
                    viewport.physical_width(),
                    viewport.physical_height()
                )
            })?;
        self.viewport = viewport;
        self.shadow = None;
        Ok(())
    }

    pub fn render_tick(&mut self, scene: &TickScene<'_>) -> Result<()> {
        let transform =
            Transform::from_scale(self.viewport.scale_factor, self.viewport.scale_factor);

        self.surface.fill(to_color(self.theme.background, 0xFF));

        if let Some(frame) = scene.frame {
            if frame.width() > 0 && frame.height() > 0 {
                let fit = fit_rect(
                    frame.width(),
                    frame.height(),
                    self.viewport.width,
                    self.viewport.height,
                );
                let float_y = (scene.time_secs.sin() * FLOAT_AMPLITUDE) as f32;
                self.draw_glow(&fit, transform);
                self.draw_shadow(&fit, float_y, transform)?;
                self.draw_frame(frame, &fit, float_y, transform);
            }
        }

        self.draw_particles(scene.particles, scene.time_secs, transform);

        if let Some(percent) = scene.loading_percent {
            self.draw_loading(percent, scene.time_secs, transform);
        }
        Ok(())
    }

    /// Radial glow behind the frame: primary accent at the center fading to
    /// transparent at a radius equal to the draw width.
    fn draw_glow(&mut self, fit: &FitRect, transform: Transform) {
        let center = Point::from_xy(self.viewport.width / 2.0, self.viewport.height / 2.0);
        let stops = vec![
            GradientStop::new(0.0, to_color(self.theme.primary, GLOW_CENTER_ALPHA)),
            GradientStop::new(1.0, to_color(self.theme.primary, 0)),
        ];
        let Some(shader) = RadialGradient::new(
            center,
            center,
            fit.width.max(1.0),
            stops,
            SpreadMode::Pad,
            Transform::identity(),
        ) else {
            return;
        };

        let mut paint = Paint::default();
        paint.shader = shader;
        if let Some(rect) = Rect::from_xywh(0.0, 0.0, self.viewport.width, self.viewport.height) {
            self.surface.fill_rect(rect, &paint, transform, None);
        }
    }

    fn draw_shadow(&mut self, fit: &FitRect, float_y: f32, transform: Transform) -> Result<()> {
        let key = (fit.width.round() as u32, fit.height.round() as u32);
        if key.0 == 0 || key.1 == 0 {
            return Ok(());
        }
        if self.shadow.as_ref().map(|cache| cache.key) != Some(key) {
            self.shadow = Some(build_shadow_mask(key.0, key.1)?);
        }
        let Some(cache) = self.shadow.as_ref() else {
            return Ok(());
        };

        let dest_width = fit.width + 2.0 * cache.margin;
        let dest_height = fit.height + 2.0 * cache.margin;
        let dest_x = fit.x - cache.margin;
        let dest_y = fit.y + float_y - cache.margin;

        let pattern_transform = Transform::from_row(
            dest_width / cache.mask.width() as f32,
            0.0,
            0.0,
            dest_height / cache.mask.height() as f32,
            dest_x,
            dest_y,
        );
        let mut paint = Paint::default();
        paint.shader = Pattern::new(
            cache.mask.as_ref(),
            SpreadMode::Pad,
            FilterQuality::Bilinear,
            1.0,
            pattern_transform,
        );
        if let Some(rect) = Rect::from_xywh(dest_x, dest_y, dest_width, dest_height) {
            self.surface.fill_rect(rect, &paint, transform, None);
        }
        Ok(())
    }

    fn draw_frame(&mut self, frame: &Pixmap, fit: &FitRect, float_y: f32, transform: Transform) {
        let pattern_transform = Transform::from_row(
            fit.width / frame.width() as f32,
            0.0,
            0.0,
            fit.height / frame.height() as f32,
            fit.x,
            fit.y + float_y,
        );
        let mut paint = Paint::default();
        paint.shader = Pattern::new(
            frame.as_ref(),
            SpreadMode::Pad,
            FilterQuality::Bilinear,
            1.0,
            pattern_transform,
        );
        if let Some(rect) = Rect::from_xywh(fit.x, fit.y + float_y, fit.width, fit.height) {
            self.surface.fill_rect(rect, &paint, transform, None);
        }
    }

    fn draw_particles(&mut self, particles: &ParticleField, time_secs: f64, transform: Transform) {
        for (index, particle) in particles.iter().enumerate() {
            let (px, py) =
                particle.position_at(index, time_secs, self.viewport.width, self.viewport.height);
            let alpha = (particle.alpha_at(time_secs) * 255.0).round() as u8;

            let mut builder = PathBuilder::new();
            builder.push_circle(px, py, particle.base_size);
            let Some(path) = builder.finish() else {
                continue;
            };

            let mut paint = Paint::default();
            paint.anti_alias = true;
            paint.set_color_rgba8(
                particle.color.red(),
                particle.color.green(),
                particle.color.blue(),
                alpha,
            );
            self.surface
                .fill_path(&path, &paint, FillRule::Winding, transform, None);
        }
    }

    /// Textless loading indicator: a dim spinner ring with an orbiting dot
    /// plus a progress bar filled to `percent`.
    fn draw_loading(&mut self, percent: u32, time_secs: f64, transform: Transform) {
        let center_x = self.viewport.width / 2.0;
        let center_y = self.viewport.height / 2.0;
        let ring_y = center_y - SPINNER_OFFSET_Y;

        let mut builder = PathBuilder::new();
        builder.push_circle(center_x, ring_y, SPINNER_RADIUS);
        if let Some(ring) = builder.finish() {
            let mut track = Paint::default();
            track.anti_alias = true;
            track.set_color_rgba8(
                self.theme.primary.red(),
                self.theme.primary.green(),
                self.theme.primary.blue(),
                0x33,
            );
            let stroke = Stroke {
                width: 2.0,
                ..Stroke::default()
            };
            self.surface
                .stroke_path(&ring, &track, &stroke, transform, None);
        }

        let angle = (time_secs as f32 * TAU) % TAU;
        let dot_x = center_x + angle.cos() * SPINNER_RADIUS;
        let dot_y = ring_y + angle.sin() * SPINNER_RADIUS;
        let mut builder = PathBuilder::new();
        builder.push_circle(dot_x, dot_y, 3.0);
        if let Some(dot) = builder.finish() {
            let mut paint = Paint::default();
            paint.anti_alias = true;
            paint.set_color_rgba8(
                self.theme.primary.red(),
                self.theme.primary.green(),
                self.theme.primary.blue(),
                0xFF,
            );
            self.surface
                .fill_path(&dot, &paint, FillRule::Winding, transform, None);
        }

        let bar_x = center_x - LOADING_BAR_WIDTH / 2.0;
        let bar_y = center_y + SPINNER_OFFSET_Y;
        let mut track = Paint::default();
        track.set_color_rgba8(
            self.theme.accent.red(),
            self.theme.accent.green(),
            self.theme.accent.blue(),
            0x28,
        );
        if let Some(rect) = Rect::from_xywh(bar_x, bar_y, LOADING_BAR_WIDTH, LOADING_BAR_HEIGHT) {
            self.surface.fill_rect(rect, &track, transform, None);
        }

        let fill_width = LOADING_BAR_WIDTH * (percent.min(100) as f32 / 100.0);
        if fill_width >= 1.0 {
            let mut fill = Paint::default();
            fill.set_color_rgba8(
                self.theme.primary.red(),
                self.theme.primary.green(),
                self.theme.primary.blue(),
                0xFF,
            );
            if let Some(rect) = Rect::from_xywh(bar_x, bar_y, fill_width, LOADING_BAR_HEIGHT) {
                self.surface.fill_rect(rect, &fill, transform, None);
            }
        }
    }
}

fn to_color(color: ColorU8, alpha: u8) -> Color {
    Color::from_rgba8(color.red(), color.green(), color.blue(), alpha)
}

/// Builds the soft shadow under the frame once per frame size: a filled
/// rectangle blurred at reduced resolution, scaled back up at draw time.
fn build_shadow_mask(width: u32, height: u32) -> Result<ShadowCache> {
    let margin = SHADOW_SIGMA * 3.0;
    let sigma = SHADOW_SIGMA / SHADOW_DOWNSCALE;
    let radius = (sigma * 3.0).ceil() as usize;

    let mask_width = (((width as f32 + 2.0 * margin) / SHADOW_DOWNSCALE).ceil() as usize).max(1);
    let mask_height = (((height as f32 + 2.0 * margin) / SHADOW_DOWNSCALE).ceil() as usize).max(1);

    let rect_x0 = (margin / SHADOW_DOWNSCALE) as usize;
    let rect_y0 = rect_x0;
    let rect_x1 = (rect_x0 + (width as f32 / SHADOW_DOWNSCALE) as usize).min(mask_width);
    let rect_y1 = (rect_y0 + (height as f32 / SHADOW_DOWNSCALE) as usize).min(mask_height);

    let mut alpha = vec![0u8; mask_width * mask_height];
    for y in rect_y0..rect_y1 {
        let row = y * mask_width;
        for value in &mut alpha[row + rect_x0..row + rect_x1] {
            *value = 255;
        }
    }

    let kernel = gaussian_kernel_q16(radius, sigma)?;
    let mut scratch = vec![0u8; alpha.len()];
    blur_pass_horizontal(&alpha, &mut scratch, mask_width, mask_height, &kernel);
    blur_pass_vertical(&scratch, &mut alpha, mask_width, mask_height, &kernel);

    let mut mask = Pixmap::new(mask_width as u32, mask_height as u32)
        .ok_or_else(|| anyhow!("cannot allocate {mask_width}x{mask_height} shadow mask"))?;
    for (dst, value) in mask.data_mut().chunks_exact_mut(4).zip(&alpha) {
        // Premultiplied black at half strength.
        dst[0] = 0;
        dst[1] = 0;
        dst[2] = 0;
        dst[3] = (*value as f32 * SHADOW_ALPHA) as u8;
    }

    Ok(ShadowCache {
        key: (width, height),
        mask,
        margin,
    })
}

/// Q16 fixed-point Gaussian kernel normalized to 65536.
fn gaussian_kernel_q16(radius: usize, sigma: f32) -> Result<Vec<u32>> {
    if radius == 0 {
        return Ok(vec![1 << 16]);
    }
    if !sigma.is_finite() || sigma <= 0.0 {
        return Err(anyhow!("blur sigma must be > 0"));
    }

    let r = radius as i32;
    let sigma = sigma as f64;
    let denom = 2.0 * sigma * sigma;
    let mut weights_f = Vec::with_capacity((2 * r + 1) as usize);
    let mut sum = 0.0f64;
    for i in -r..=r {
        let x = i as f64;
        let w = (-x * x / denom).exp();
        weights_f.push(w);
        sum += w;
    }

    let mut weights = Vec::with_capacity(weights_f.len());
    let mut acc: i64 = 0;
    for &wf in &weights_f {
        let q = ((wf / sum) * 65536.0).round() as i64;
        let q = q.clamp(0, 65536);
        weights.push(q as u32);
        acc += q;
    }
    // Push rounding error into the center tap so the kernel stays normalized.
    let delta = 65536 - acc;
    if delta != 0 {
        let mid = weights.len() / 2;
        let adjusted = (i64::from(weights[mid]) + delta).clamp(0, 65536);
        weights[mid] = adjusted as u32;
    }
    Ok(weights)
}

fn blur_pass_horizontal(src: &[u8], dst: &mut [u8], width: usize, height: usize, kernel: &[u32]) {
    let radius = (kernel.len() / 2) as i32;
    let w = width as i32;
    for y in 0..height {
        let row = y * width;
        for x in 0..w {
            let mut acc = 0u64;
            for (tap, &weight) in kernel.iter().enumerate() {
                let sx = (x + tap as i32 - radius).clamp(0, w - 1) as usize;
                acc += u64::from(weight) * u64::from(src[row + sx]);
            }
            dst[row + x as usize] = q16_to_u8(acc);
        }
    }
}

fn blur_pass_vertical(src: &[u8], dst: &mut [u8], width: usize, height: usize, kernel: &[u32]) {
    let radius = (kernel.len() / 2) as i32;
    let h = height as i32;
    for y in 0..h {
        for x in 0..width {
            let mut acc = 0u64;
            for (tap, &weight) in kernel.iter().enumerate() {
                let sy = (y + tap as i32 - radius).clamp(0, h - 1) as usize;
                acc += u64::from(weight) * u64::from(src[sy * width + x]);
            }
            dst[y as usize * width + x] = q16_to_u8(acc);
        }
    }
}

fn q16_to_u8(acc: u64) -> u8 {
    ((acc + 32768) >> 16).min(255) as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::particles::ParticleField;
    use crate::schema::Theme;

    #[test]
    fn fit_uses_eighty_percent_of_the_limiting_dimension() {
        // Wide viewport, square image: height limits.
        let fit = fit_rect(100, 100, 2000.0, 1000.0);
        assert!((fit.height - 800.0).abs() < 0.01);
        assert!((fit.width - 800.0).abs() < 0.01);
        assert!((fit.x - 600.0).abs() < 0.01);
        assert!((fit.y - 100.0).abs() < 0.01);

        // Tall viewport, square image: width limits.
        let fit = fit_rect(100, 100, 1000.0, 2000.0);
        assert!((fit.width - 800.0).abs() < 0.01);
        assert!((fit.height - 800.0).abs() < 0.01);
    }

    #[test]
    fn fit_preserves_aspect_ratio() {
        let fit = fit_rect(200, 100, 1000.0, 1000.0);
        assert!((fit.width / fit.height - 2.0).abs() < 0.001);
        // Centered in both axes.
        assert!((fit.x + fit.width / 2.0 - 500.0).abs() < 0.01);
        assert!((fit.y + fit.height / 2.0 - 500.0).abs() < 0.01);
    }

    #[test]
    fn viewport_scales_backing_store_by_device_ratio() {
        let viewport = Viewport::new(800.0, 600.0, 2.0).expect("viewport");
        assert_eq!(viewport.physical_width(), 1600);
        assert_eq!(viewport.physical_height(), 1200);

        let from_physical = Viewport::from_physical(1600, 1200, 2.0).expect("viewport");
        assert_eq!(from_physical.physical_width(), 1600);
        assert_eq!(from_physical.physical_height(), 1200);

        assert!(Viewport::new(0.0, 600.0, 1.0).is_err());
        assert!(Viewport::new(800.0, 600.0, 0.0).is_err());
    }

    #[test]
    fn missing_frame_still_renders_particles() {
        let theme = Theme::default();
        let particles = ParticleField::new(50, 9, &theme);
        let viewport = Viewport::new(320.0, 240.0, 1.0).expect("viewport");
        let mut stage = StageRenderer::new(viewport, theme).expect("stage");

        let scene = TickScene {
            time_secs: 2.0,
            frame: None,
            particles: &particles,
            loading_percent: None,
        };
        stage.render_tick(&scene).expect("tick should render");

        let background = stage.surface().data()[0..4].to_vec();
        let changed = stage
            .surface()
            .data()
            .chunks_exact(4)
            .any(|pixel| pixel != background.as_slice());
        assert!(changed, "particles should leave marks on the surface");
    }

    #[test]
    fn resize_reallocates_the_surface() {
        let theme = Theme::default();
        let viewport = Viewport::new(100.0, 100.0, 1.0).expect("viewport");
        let mut stage = StageRenderer::new(viewport, theme).expect("stage");
        assert_eq!(stage.physical_width(), 100);

        let doubled = Viewport::new(100.0, 100.0, 2.0).expect("viewport");
        stage.resize(doubled).expect("resize");
        assert_eq!(stage.physical_width(), 200);
        assert_eq!(stage.physical_height(), 200);
    }

    #[test]
    fn shadow_mask_fades_outwards() {
        let cache = build_shadow_mask(200, 100).expect("shadow");
        let data = cache.mask.data();
        let width = cache.mask.width() as usize;
        let height = cache.mask.height() as usize;

        let center = ((height / 2) * width + width / 2) * 4 + 3;
        let corner = 3;
        assert!(data[center] > data[corner], "center should be darkest");
        assert!(data[corner] <= 2, "far corner should be near transparent");
    }

    #[test]
    fn gaussian_kernel_is_normalized() {
        let kernel = gaussian_kernel_q16(5, 2.0).expect("kernel");
        assert_eq!(kernel.len(), 11);
        let sum: u64 = kernel.iter().map(|&w| u64::from(w)).sum();
        assert_eq!(sum, 65536);
    }
}
