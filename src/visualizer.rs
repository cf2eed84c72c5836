use std::path::Path;
use std::time::Instant;

use anyhow::Result;
use tiny_skia::Pixmap;

use crate::frames::FrameStore;
use crate::particles::ParticleField;
use crate::preload::Preloader;
use crate::schema::ExperienceConfig;
use crate::sequencer::{frame_index_for, IntroSequencer, ProgressSource};

/// Resolved state for one tick: which producer drove progress, the frame it
/// mapped to, and the image to draw (absent while loading or for frames that
/// failed to resolve).
pub struct SceneState<'a> {
    pub source: ProgressSource,
    pub frame_index: usize,
    pub frame: Option<&'a Pixmap>,
    pub loading_percent: Option<u32>,
}

/// Owns the visualizer core and wires its control flow: the preloader fills
/// the store, readiness starts the intro exactly once, and every tick selects
/// intro or scroll progress to pick the frame.
pub struct Visualizer {
    store: FrameStore,
    preloader: Preloader,
    intro: IntroSequencer,
    particles: ParticleField,
}

impl Visualizer {
    pub fn new(assets_dir: &Path, config: &ExperienceConfig) -> Result<Self> {
        config.validate()?;
        let store = FrameStore::new(assets_dir, config.sequence.clone())?;
        let preloader = Preloader::spawn(&store, config.preload.workers, config.preload.timeout())?;
        Ok(Self {
            store,
            preloader,
            intro: IntroSequencer::new(config.intro.duration()),
            particles: ParticleField::new(config.particles.count, config.particles.seed, &config.theme),
        })
    }

    /// Per-tick bookkeeping: pump pending loads and advance the intro latch.
    pub fn advance(&mut self, now: Instant) {
        if self.preloader.pump(&mut self.store) {
            self.intro.start(now);
        }
        self.intro.tick(now);
    }

    pub fn ready(&self) -> bool {
        self.preloader.ready()
    }

    pub fn loading_percent(&self) -> Option<u32> {
        if self.preloader.ready() {
            None
        } else {
            Some(self.preloader.percent())
        }
    }

    pub fn store(&self) -> &FrameStore {
        &self.store
    }

    pub fn particles(&self) -> &ParticleField {
        &self.particles
    }

    pub fn intro_done(&self) -> bool {
        self.intro.is_done()
    }

    pub fn scene(&self, now: Instant, scroll_progress: f32) -> SceneState<'_> {
        let source = self.intro.select(now, scroll_progress);
        let frame_index = frame_index_for(source.value(), self.store.frame_count());
        // The stage stays empty until every asset has resolved.
        let frame = if self.ready() {
            self.store.drawable_image(frame_index)
        } else {
            None
        };
        SceneState {
            source,
            frame_index,
            frame,
            loading_percent: self.loading_percent(),
        }
    }

    /// Joins preload workers. Called from teardown paths; dropping the
    /// visualizer does the same.
    pub fn shutdown(&mut self) {
        self.preloader.shutdown();
    }
}
