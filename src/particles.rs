use std::f32::consts::TAU;

use tiny_skia::ColorU8;

use crate::schema::Theme;

/// Ambient drift radius in logical pixels.
const DRIFT_RADIUS: f32 = 50.0;
/// Seconds -> particle time. Matches the original's millisecond clock scaled
/// by 0.0005.
const TIME_SCALE: f32 = 0.5;
const BASE_ALPHA: f32 = 0.15;
const PULSE_ALPHA: f32 = 0.1;
/// The alpha pulse runs at three times the drift time scale.
const PULSE_RATE: f32 = 3.0;
/// xorshift64 cannot leave a zero state; remap to the same default the
/// particle RNGs elsewhere in this family use.
const FALLBACK_SEED: u64 = 0x5DEECE66D;

#[derive(Debug, Clone, Copy)]
pub struct Particle {
    /// Normalized base position in [0,1).
    pub x: f32,
    pub y: f32,
    /// Radius in logical pixels, [1,3).
    pub base_size: f32,
    pub color: ColorU8,
    /// Alpha pulse offset in [0, 2*pi).
    pub phase: f32,
    /// Part of the particle's declared shape; the drift formula does not
    /// consume it.
    pub velocity: f32,
}

impl Particle {
    /// Derived per-tick position: base position drifted on a circle and
    /// wrapped into the viewport. Never stored back.
    pub fn position_at(&self, index: usize, time_secs: f64, width: f32, height: f32) -> (f32, f32) {
        let t = time_secs as f32 * TIME_SCALE + index as f32;
        let px = wrap(self.x * width + t.cos() * DRIFT_RADIUS, width);
        let py = wrap(self.y * height + t.sin() * DRIFT_RADIUS, height);
        (px, py)
    }

    /// Base alpha 0.15 with a +/-0.1 sinusoidal pulse offset by `phase`.
    pub fn alpha_at(&self, time_secs: f64) -> f32 {
        let t = time_secs as f32 * TIME_SCALE;
        (BASE_ALPHA + (t * PULSE_RATE + self.phase).sin() * PULSE_ALPHA).clamp(0.0, 1.0)
    }
}

/// Fixed set of decorative particles, generated once per session. The stored
/// set is immutable; only derived positions and alphas change per tick.
#[derive(Debug, Clone)]
pub struct ParticleField {
    particles: Vec<Particle>,
}

impl ParticleField {
    pub fn new(count: usize, seed: u64, theme: &Theme) -> Self {
        let mut rng = XorShift64::new(seed);
        let particles = (0..count)
            .map(|index| Particle {
                x: rng.next_f32(),
                y: rng.next_f32(),
                base_size: 1.0 + rng.next_f32() * 2.0,
                color: if index % 2 == 0 {
                    theme.accent
                } else {
                    theme.primary
                },
                phase: rng.next_f32() * TAU,
                velocity: 0.02 + rng.next_f32() * 0.05,
            })
            .collect();
        Self { particles }
    }

    pub fn len(&self) -> usize {
        self.particles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.particles.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Particle> {
        self.particles.iter()
    }
}

/// Euclidean wrap into [0, range). rem_euclid alone can round up to exactly
/// `range` for tiny negative inputs.
fn wrap(value: f32, range: f32) -> f32 {
    let wrapped = value.rem_euclid(range);
    if wrapped >= range {
        0.0
    } else {
        wrapped
    }
}

struct XorShift64 {
    state: u64,
}

impl XorShift64 {
    fn new(seed: u64) -> Self {
        Self {
            state: if seed == 0 { FALLBACK_SEED } else { seed },
        }
    }

    /// Uniform in [0, 1): top 24 bits of the state over 2^24.
    fn next_f32(&mut self) -> f32 {
        self.state ^= self.state << 13;
        self.state ^= self.state >> 7;
        self.state ^= self.state << 17;
        ((self.state >> 40) as f32) / ((1u64 << 24) as f32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Theme;

    #[test]
    fn field_has_exact_cardinality_and_ranges() {
        let theme = Theme::default();
        let field = ParticleField::new(50, 7, &theme);
        assert_eq!(field.len(), 50);

        for particle in field.iter() {
            assert!(particle.x >= 0.0 && particle.x < 1.0);
            assert!(particle.y >= 0.0 && particle.y < 1.0);
            assert!(particle.base_size >= 1.0 && particle.base_size < 3.0);
            assert!(particle.phase >= 0.0 && particle.phase < TAU);
            assert!(particle.velocity >= 0.02 && particle.velocity < 0.07);
        }
    }

    #[test]
    fn colors_alternate_by_index_parity() {
        let theme = Theme::default();
        let field = ParticleField::new(6, 1, &theme);
        for (index, particle) in field.iter().enumerate() {
            let expected = if index % 2 == 0 {
                theme.accent
            } else {
                theme.primary
            };
            assert_eq!(particle.color, expected);
        }
    }

    #[test]
    fn same_seed_reproduces_the_field() {
        let theme = Theme::default();
        let first = ParticleField::new(50, 42, &theme);
        let second = ParticleField::new(50, 42, &theme);
        for (a, b) in first.iter().zip(second.iter()) {
            assert_eq!(a.x, b.x);
            assert_eq!(a.y, b.y);
            assert_eq!(a.base_size, b.base_size);
            assert_eq!(a.phase, b.phase);
        }
    }

    #[test]
    fn seed_zero_produces_valid_variation() {
        let theme = Theme::default();
        let field = ParticleField::new(2, 0, &theme);
        let particles: Vec<_> = field.iter().collect();
        assert!(
            (particles[0].x - particles[1].x).abs() > 0.0001
                || (particles[0].y - particles[1].y).abs() > 0.0001,
            "zero seed should not degenerate into identical particles"
        );
    }

    #[test]
    fn derived_positions_wrap_into_the_viewport() {
        let theme = Theme::default();
        let field = ParticleField::new(50, 3, &theme);
        for (index, particle) in field.iter().enumerate() {
            for &time in &[0.0_f64, 1.7, 42.0, 1000.5] {
                let (px, py) = particle.position_at(index, time, 800.0, 600.0);
                assert!(px >= 0.0 && px < 800.0, "px {px} out of range");
                assert!(py >= 0.0 && py < 600.0, "py {py} out of range");

                let alpha = particle.alpha_at(time);
                assert!(alpha >= 0.05 - 1e-6 && alpha <= 0.25 + 1e-6);
            }
        }
    }
}
