use std::path::Path;
use std::thread;
use std::time::{Duration, Instant};

use ssv::frames::{FrameStore, LoadState};
use ssv::preload::Preloader;
use ssv::renderer::{StageRenderer, TickScene, Viewport};
use ssv::schema::{ExperienceConfig, SequenceSettings};
use ssv::sequencer::ProgressSource;
use ssv::visualizer::Visualizer;

fn write_frame(path: &Path, width: u32, height: u32, tint: u8) {
    let mut buffer = image::RgbaImage::new(width, height);
    for pixel in buffer.pixels_mut() {
        *pixel = image::Rgba([tint, 160, 60, 255]);
    }
    buffer.save(path).expect("test frame should save");
}

fn png_sequence(frame_count: usize) -> SequenceSettings {
    SequenceSettings {
        prefix: "frame-".to_owned(),
        extension: "png".to_owned(),
        frame_count,
    }
}

fn settle(preloader: &mut Preloader, store: &mut FrameStore) -> usize {
    let deadline = Instant::now() + Duration::from_secs(60);
    let mut ready_transitions = 0;
    while !preloader.ready() {
        if preloader.pump(store) {
            ready_transitions += 1;
        }
        assert!(
            Instant::now() < deadline,
            "preload did not settle within the deadline"
        );
        thread::sleep(Duration::from_millis(2));
    }
    // Extra pumps after readiness must not latch again.
    for _ in 0..3 {
        assert!(!preloader.pump(store));
    }
    ready_transitions
}

#[test]
fn full_sequence_with_one_missing_frame_reaches_readiness() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut store = FrameStore::new(dir.path(), png_sequence(120)).expect("store");
    for index in 0..120 {
        if index == 45 {
            continue;
        }
        write_frame(
            &store.frame_path(index).expect("path"),
            4,
            4,
            (index % 255) as u8,
        );
    }

    let mut preloader = Preloader::spawn(&store, 8, None).expect("spawn");
    let ready_transitions = settle(&mut preloader, &mut store);

    assert_eq!(ready_transitions, 1, "readiness must latch exactly once");
    assert_eq!(preloader.completed(), 120);
    assert_eq!(preloader.percent(), 100);

    let counts = store.counts();
    assert_eq!(counts.loaded, 119);
    assert_eq!(counts.failed, 1);
    assert_eq!(counts.pending, 0);
    assert_eq!(store.get(45).expect("in range").state, LoadState::Failed);
    assert!(!store.is_drawable(45));
    assert!(store.is_drawable(44));
    assert!(store.is_drawable(46));
}

#[test]
fn visualizer_skips_failed_frame_but_still_draws_particles() {
    let dir = tempfile::tempdir().expect("tempdir");

    let mut config = ExperienceConfig::default();
    config.sequence = png_sequence(120);
    config.intro.duration_ms = 1;

    {
        let store = FrameStore::new(dir.path(), config.sequence.clone()).expect("store");
        for index in 0..120 {
            if index == 45 {
                continue;
            }
            write_frame(&store.frame_path(index).expect("path"), 4, 4, 90);
        }
    }

    let mut visualizer = Visualizer::new(dir.path(), &config).expect("visualizer");

    let deadline = Instant::now() + Duration::from_secs(60);
    while !visualizer.ready() {
        visualizer.advance(Instant::now());
        assert!(
            Instant::now() < deadline,
            "preload did not settle within the deadline"
        );
        thread::sleep(Duration::from_millis(2));
    }

    // Let the 1ms intro finish so scroll progress becomes authoritative.
    let after_intro = Instant::now() + Duration::from_millis(50);
    visualizer.advance(after_intro);
    assert!(visualizer.intro_done());

    // Progress mapping to the failed frame 45: floor(p * 119) = 45.
    let progress = 45.5 / 119.0;
    let state = visualizer.scene(after_intro, progress);
    assert_eq!(state.source, ProgressSource::Scroll(progress));
    assert_eq!(state.frame_index, 45);
    assert!(state.frame.is_none(), "failed frames are never drawable");
    assert!(state.loading_percent.is_none());

    // The tick still renders: background plus particles, no image, no crash.
    let viewport = Viewport::new(320.0, 240.0, 1.0).expect("viewport");
    let mut stage = StageRenderer::new(viewport, config.theme).expect("stage");
    let scene = TickScene {
        time_secs: 1.25,
        frame: state.frame,
        particles: visualizer.particles(),
        loading_percent: state.loading_percent,
    };
    stage.render_tick(&scene).expect("tick should render");

    let data = stage.surface().data();
    let background = &data[0..4];
    assert!(
        data.chunks_exact(4).any(|pixel| pixel != background),
        "particles should still be drawn"
    );

    // A neighboring frame is drawable and selected normally.
    let neighbor = visualizer.scene(after_intro, 46.5 / 119.0);
    assert_eq!(neighbor.frame_index, 46);
    assert!(neighbor.frame.is_some());

    visualizer.shutdown();
}

#[test]
fn visualizer_holds_frames_back_until_ready() {
    let dir = tempfile::tempdir().expect("tempdir");

    let mut config = ExperienceConfig::default();
    config.sequence = png_sequence(6);

    {
        let store = FrameStore::new(dir.path(), config.sequence.clone()).expect("store");
        for index in 0..6 {
            write_frame(&store.frame_path(index).expect("path"), 4, 4, 200);
        }
    }

    let visualizer = Visualizer::new(dir.path(), &config).expect("visualizer");

    // Before any pump the experience is loading: intro not started, no frame.
    let now = Instant::now();
    let state = visualizer.scene(now, 0.8);
    assert_eq!(state.source, ProgressSource::Intro(0.0));
    assert!(state.frame.is_none());
    assert!(state.loading_percent.is_some());
}

#[test]
fn bounded_timeout_abandons_unresolvable_loads() {
    let dir = tempfile::tempdir().expect("tempdir");
    // No files at all: every load fails fast, but exercise the sweep with a
    // short timeout anyway to confirm readiness always latches.
    let mut store = FrameStore::new(dir.path(), png_sequence(8)).expect("store");
    let mut preloader =
        Preloader::spawn(&store, 2, Some(Duration::from_millis(200))).expect("spawn");

    let transitions = settle(&mut preloader, &mut store);
    assert_eq!(transitions, 1);
    assert_eq!(preloader.completed(), 8);
    assert_eq!(store.counts().failed, 8);
}
