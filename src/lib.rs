pub mod frames;
pub mod particles;
pub mod preload;
pub mod renderer;
pub mod schema;
pub mod sequencer;
pub mod visualizer;

#[cfg(feature = "play")]
pub mod play;
