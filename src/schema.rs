use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{de::Error as DeError, Deserialize, Deserializer};
use tiny_skia::ColorU8;

/// Frame numbers are 1-based and zero-padded to this width in file names.
pub const FRAME_NUMBER_WIDTH: usize = 3;

const MAX_FRAME_COUNT: usize = 999;
const MAX_PARTICLE_COUNT: usize = 10_000;
const MAX_PRELOAD_WORKERS: usize = 64;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExperienceConfig {
    #[serde(default)]
    pub sequence: SequenceSettings,
    #[serde(default)]
    pub intro: IntroSettings,
    #[serde(default)]
    pub particles: ParticleSettings,
    #[serde(default)]
    pub preload: PreloadSettings,
    #[serde(default)]
    pub theme: Theme,
}

impl ExperienceConfig {
    pub fn validate(&self) -> Result<()> {
        self.sequence.validate()?;
        self.intro.validate()?;
        self.particles.validate()?;
        self.preload.validate()?;
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SequenceSettings {
    /// File name prefix before the zero-padded frame number.
    #[serde(default = "default_frame_prefix")]
    pub prefix: String,
    /// File extension without the leading dot.
    #[serde(default = "default_frame_extension")]
    pub extension: String,
    /// Total number of frames; fixed for the lifetime of the process.
    #[serde(default = "default_frame_count")]
    pub frame_count: usize,
}

impl Default for SequenceSettings {
    fn default() -> Self {
        Self {
            prefix: default_frame_prefix(),
            extension: default_frame_extension(),
            frame_count: default_frame_count(),
        }
    }
}

impl SequenceSettings {
    pub fn validate(&self) -> Result<()> {
        if self.frame_count == 0 {
            bail!("sequence frame_count must be > 0");
        }
        if self.frame_count > MAX_FRAME_COUNT {
            bail!(
                "sequence frame_count {} exceeds the {}-digit numbering limit of {}",
                self.frame_count,
                FRAME_NUMBER_WIDTH,
                MAX_FRAME_COUNT
            );
        }
        if self.prefix.contains('/') || self.prefix.contains('\\') {
            bail!(
                "sequence prefix '{}' cannot contain path separators",
                self.prefix
            );
        }
        if self.extension.is_empty() {
            bail!("sequence extension cannot be empty");
        }
        if self.extension.contains('.') {
            bail!(
                "sequence extension '{}' must not include the dot",
                self.extension
            );
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IntroSettings {
    /// One-shot auto-play duration before scroll takes over.
    #[serde(default = "default_intro_duration_ms")]
    pub duration_ms: u64,
}

impl Default for IntroSettings {
    fn default() -> Self {
        Self {
            duration_ms: default_intro_duration_ms(),
        }
    }
}

impl IntroSettings {
    pub fn validate(&self) -> Result<()> {
        if self.duration_ms == 0 {
            bail!("intro duration_ms must be > 0");
        }
        Ok(())
    }

    pub fn duration(&self) -> Duration {
        Duration::from_millis(self.duration_ms)
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ParticleSettings {
    #[serde(default = "default_particle_count")]
    pub count: usize,
    /// Seed for the deterministic particle stream. 0 selects a built-in seed.
    #[serde(default)]
    pub seed: u64,
}

impl Default for ParticleSettings {
    fn default() -> Self {
        Self {
            count: default_particle_count(),
            seed: 0,
        }
    }
}

impl ParticleSettings {
    pub fn validate(&self) -> Result<()> {
        if self.count == 0 {
            bail!("particles count must be > 0");
        }
        if self.count > MAX_PARTICLE_COUNT {
            bail!(
                "particles count {} exceeds the limit of {}",
                self.count,
                MAX_PARTICLE_COUNT
            );
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PreloadSettings {
    #[serde(default = "default_preload_workers")]
    pub workers: usize,
    /// When set, pending loads are abandoned (marked failed) after this many
    /// milliseconds so readiness still latches. Unset preserves the original
    /// contract: a load that never settles leaves readiness false forever.
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

impl Default for PreloadSettings {
    fn default() -> Self {
        Self {
            workers: default_preload_workers(),
            timeout_ms: None,
        }
    }
}

impl PreloadSettings {
    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            bail!("preload workers must be > 0");
        }
        if self.workers > MAX_PRELOAD_WORKERS {
            bail!(
                "preload workers {} exceeds the limit of {}",
                self.workers,
                MAX_PRELOAD_WORKERS
            );
        }
        if let Some(timeout_ms) = self.timeout_ms {
            if timeout_ms == 0 {
                bail!("preload timeout_ms must be > 0 when set");
            }
        }
        Ok(())
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Theme {
    #[serde(default = "default_background", deserialize_with = "de_hex_color")]
    pub background: ColorU8,
    #[serde(default = "default_primary", deserialize_with = "de_hex_color")]
    pub primary: ColorU8,
    #[serde(default = "default_accent", deserialize_with = "de_hex_color")]
    pub accent: ColorU8,
}

impl Default for Theme {
    fn default() -> Self {
        Self {
            background: default_background(),
            primary: default_primary(),
            accent: default_accent(),
        }
    }
}

/// Parse `#RRGGBB` or `#RRGGBBAA`.
pub fn parse_hex_color(raw: &str) -> Result<ColorU8> {
    let digits = raw
        .strip_prefix('#')
        .ok_or_else(|| anyhow::anyhow!("color '{}' must start with '#'", raw))?;
    if digits.len() != 6 && digits.len() != 8 {
        bail!("color '{}' must be #RRGGBB or #RRGGBBAA", raw);
    }

    let channel = |offset: usize| -> Result<u8> {
        u8::from_str_radix(&digits[offset..offset + 2], 16)
            .with_context(|| format!("color '{}' has invalid hex digits", raw))
    };

    let r = channel(0)?;
    let g = channel(2)?;
    let b = channel(4)?;
    let a = if digits.len() == 8 { channel(6)? } else { 0xFF };
    Ok(ColorU8::from_rgba(r, g, b, a))
}

fn de_hex_color<'de, D>(deserializer: D) -> std::result::Result<ColorU8, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_hex_color(&raw).map_err(|error| DeError::custom(format!("{error:#}")))
}

pub fn load_and_validate_config(path: &Path) -> Result<ExperienceConfig> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("failed to read config {}", path.display()))?;
    let config: ExperienceConfig = serde_json::from_str(&content)
        .with_context(|| format!("failed to parse config JSON {}", path.display()))?;
    config
        .validate()
        .with_context(|| format!("invalid config {}", path.display()))?;
    Ok(config)
}

fn default_frame_prefix() -> String {
    "frame-".to_owned()
}

fn default_frame_extension() -> String {
    "jpg".to_owned()
}

fn default_frame_count() -> usize {
    120
}

fn default_intro_duration_ms() -> u64 {
    3000
}

fn default_particle_count() -> usize {
    50
}

fn default_preload_workers() -> usize {
    8
}

fn default_background() -> ColorU8 {
    ColorU8::from_rgba(0x00, 0x00, 0x00, 0xFF)
}

fn default_primary() -> ColorU8 {
    ColorU8::from_rgba(0xFF, 0xB3, 0x00, 0xFF)
}

fn default_accent() -> ColorU8 {
    ColorU8::from_rgba(0xFF, 0xF8, 0xE1, 0xFF)
}
