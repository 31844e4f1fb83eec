use std::sync::Arc;
use std::time::Instant;

use image::{Rgba, RgbaImage};
use parking_lot::Mutex;

use shadow_fx::config::{ModelFamily, PipelineConfig};
use shadow_fx::control::Controls;
use shadow_fx::error::FrameError;
use shadow_fx::frame::Frame;
use shadow_fx::gpu::effects::{AuxResource, EffectMode, Kernel};
use shadow_fx::gpu::{ControlOffset, ReferenceBackend, TextureHandle};
use shadow_fx::inference::{InferenceEngine, KeyingModel, ModelOutput};
use shadow_fx::pipeline::{Compositor, FrameWorker, PipelineState, RedrawRequester, StateCell};
use shadow_fx::source::{self, Orientation, SyntheticSource, SYNTHETIC_BACKDROP};

struct Rig {
    compositor: Compositor<ReferenceBackend>,
    controls: Arc<Controls>,
}

fn rig(family: ModelFamily, mask: (u32, u32)) -> Rig {
    let mut config = PipelineConfig::default();
    config.model.family = family;
    config.model.mask_width = mask.0;
    config.model.mask_height = mask.1;
    config.gpu.blur_sigma = 1.5;
    config.gpu.glow_sigma = 2.0;
    let controls = Arc::new(Controls::default());
    let compositor = Compositor::new(
        ReferenceBackend::new(),
        &config,
        controls.clone(),
        Arc::new(StateCell::new()),
        &RgbaImage::from_pixel(32, 32, Rgba([40, 60, 200, 255])),
    )
    .unwrap();
    Rig { compositor, controls }
}

fn gradient(width: u32, height: u32) -> Frame {
    let image = RgbaImage::from_fn(width, height, |x, y| {
        Rgba([(x * 7 % 256) as u8, (y * 5 % 256) as u8, ((x + y) % 256) as u8, 255])
    });
    Frame::new(image, Instant::now())
}

fn output(rig: &Rig, handle: TextureHandle) -> RgbaImage {
    rig.compositor.cache().texture(handle).unwrap().read().to_rgba8()
}

#[test]
fn mask_colours_paint_every_pixel_with_the_class_colour() {
    let mut rig = rig(ModelFamily::Softmax, (16, 16));
    rig.compositor
        .compose(gradient(640, 480), ModelOutput::Classes(vec![9; 256]))
        .unwrap();
    let p = rig.compositor.present(Instant::now()).unwrap().unwrap();
    assert_eq!(p.kernels, vec![Kernel::MaskColors]);

    let out = output(&rig, p.output);
    assert_eq!(out.dimensions(), (640, 480));
    assert!(out.pixels().all(|px| *px == Rgba([0, 120, 0, 255])));
}

#[test]
fn mode_switch_applies_on_the_next_cycle() {
    let mut rig = rig(ModelFamily::Softmax, (8, 8));
    rig.compositor
        .compose(gradient(40, 30), ModelOutput::Classes(vec![0; 64]))
        .unwrap();

    rig.controls.set_mode(EffectMode::Shadow);
    let shadow = rig.compositor.present(Instant::now()).unwrap().unwrap();
    assert_eq!(shadow.kernels, vec![Kernel::Shadow]);
    assert_eq!(shadow.aux, AuxResource::Background);

    rig.controls.set_mode(EffectMode::Pixelate);
    let pixelate = rig.compositor.present(Instant::now()).unwrap().unwrap();
    assert_eq!(pixelate.mode, EffectMode::Pixelate);
    assert_eq!(pixelate.kernels, vec![Kernel::Pixelate]);
    assert_eq!(pixelate.aux, AuxResource::None);
    assert!(pixelate.commands.iter().all(|s| s.kernel == Kernel::Pixelate));
}

#[test]
fn dropped_frame_leaves_previous_output_on_screen() {
    let mut rig = rig(ModelFamily::Softmax, (8, 8));
    rig.controls.set_mode(EffectMode::Saturation);
    rig.compositor
        .compose(gradient(24, 18), ModelOutput::Classes(vec![0; 64]))
        .unwrap();
    let first = rig.compositor.present(Instant::now()).unwrap().unwrap();
    let before = output(&rig, first.output);

    let err = rig
        .compositor
        .compose(
            Frame::new(RgbaImage::from_pixel(24, 18, Rgba([255, 255, 255, 255])), Instant::now()),
            ModelOutput::Classes(vec![0; 10]),
        )
        .unwrap_err();
    assert!(matches!(err, FrameError::MalformedBuffer { .. }));

    let again = rig.compositor.present(Instant::now()).unwrap().unwrap();
    assert!(!again.fresh);
    assert_eq!(output(&rig, again.output), before);
}

#[test]
fn non_divisible_frames_are_fully_covered() {
    let mut rig = rig(ModelFamily::Softmax, (8, 8));
    rig.controls.set_mode(EffectMode::Saturation);
    rig.compositor
        .compose(gradient(641, 479), ModelOutput::Classes(vec![0; 64]))
        .unwrap();
    let p = rig.compositor.present(Instant::now()).unwrap().unwrap();
    let main = p.commands.last().unwrap();
    assert_eq!(main.writes, 641 * 479);
    assert!(main.invocations >= main.writes);
}

#[test]
fn sigmoid_probabilities_are_thresholded_into_the_mask() {
    let mut rig = rig(ModelFamily::Sigmoid, (8, 8));
    let probabilities: Vec<f32> = (0..64).map(|i| if i % 8 < 4 { 0.9 } else { 0.1 }).collect();
    rig.compositor
        .compose(gradient(16, 16), ModelOutput::Probabilities(probabilities))
        .unwrap();
    let p = rig.compositor.present(Instant::now()).unwrap().unwrap();
    assert_eq!(p.kernels, vec![Kernel::ConvertProbabilitiesToMask, Kernel::MaskColors]);

    let out = output(&rig, p.output);
    // Class 15 on the left half, class 0 on the right.
    assert_eq!(*out.get_pixel(0, 5), Rgba([240, 0, 0, 255]));
    assert_eq!(*out.get_pixel(15, 5), Rgba([0, 0, 0, 255]));
}

#[test]
fn blur_at_minimum_strength_returns_the_input() {
    let mut rig = rig(ModelFamily::Softmax, (8, 8));
    rig.controls.set_mode(EffectMode::Blur);
    rig.controls
        .set_offset(ControlOffset { dx: -1.0, dy: 0.0 }, Instant::now());
    let frame = gradient(20, 20);
    let expected = frame.image.clone();
    rig.compositor
        .compose(frame, ModelOutput::Classes(vec![0; 64]))
        .unwrap();
    let p = rig.compositor.present(Instant::now()).unwrap().unwrap();
    assert_eq!(p.kernels, vec![Kernel::BlurColor, Kernel::Composite]);
    assert_eq!(output(&rig, p.output), expected);
}

#[test]
fn person_pixels_pass_through_untouched() {
    let mut rig = rig(ModelFamily::Softmax, (8, 8));
    let frame = gradient(30, 20);
    let expected = frame.image.clone();
    rig.compositor
        .compose(frame, ModelOutput::Classes(vec![15; 64]))
        .unwrap();
    rig.controls
        .set_offset(ControlOffset { dx: 0.7, dy: -0.3 }, Instant::now());
    for mode in [EffectMode::Shadow, EffectMode::Saturation, EffectMode::Pixelate, EffectMode::Blur] {
        rig.controls.set_mode(mode);
        let p = rig.compositor.present(Instant::now()).unwrap().unwrap();
        assert_eq!(output(&rig, p.output), expected, "{mode:?}");
    }
}

fn uniform(width: u32, height: u32, rgb: [u8; 3]) -> Frame {
    Frame::new(
        RgbaImage::from_pixel(width, height, Rgba([rgb[0], rgb[1], rgb[2], 255])),
        Instant::now(),
    )
}

fn present_with(rig: &mut Rig, mode: EffectMode, dx: f32, dy: f32) -> RgbaImage {
    rig.controls.set_mode(mode);
    rig.controls.set_offset(ControlOffset { dx, dy }, Instant::now());
    let p = rig.compositor.present(Instant::now()).unwrap().unwrap();
    output(rig, p.output)
}

fn rgb_row(image: &RgbaImage, y: u32) -> Vec<[u8; 3]> {
    (0..image.width())
        .map(|x| {
            let px = image.get_pixel(x, y);
            [px[0], px[1], px[2]]
        })
        .collect()
}

#[test]
fn mask_colours_fade_into_the_camera_image() {
    let mut rig = rig(ModelFamily::Softmax, (8, 8));
    rig.compositor
        .compose(uniform(12, 12, [200, 100, 50]), ModelOutput::Classes(vec![9; 64]))
        .unwrap();

    let cases = [
        (0.0, [0, 120, 0]),
        (0.5, [100, 110, 25]),
        (-0.5, [100, 110, 25]),
        (-1.0, [200, 100, 50]),
    ];
    for (dx, expected) in cases {
        let out = present_with(&mut rig, EffectMode::MaskColors, dx, 0.0);
        let [r, g, b, _] = out.get_pixel(6, 6).0;
        assert_eq!([r, g, b], expected, "dx={dx}");
    }
}

#[test]
fn shadow_falls_on_the_background_shifted_by_the_offset() {
    // Person in mask columns 2 and 3, so frame columns 4..8.
    let mask: Vec<i32> = (0..64).map(|i| if matches!(i % 8, 2 | 3) { 15 } else { 0 }).collect();
    let mut rig = rig(ModelFamily::Softmax, (8, 8));
    rig.compositor
        .compose(uniform(16, 16, [90, 90, 90]), ModelOutput::Classes(mask))
        .unwrap();

    let bg = [40, 60, 200];
    let person = [90, 90, 90];
    let shade = [16, 24, 80];

    // dx = 0.5 moves the silhouette two pixels right.
    let row = rgb_row(&present_with(&mut rig, EffectMode::Shadow, 0.5, 0.0), 5);
    let mut expected = vec![bg; 16];
    expected[4..8].fill(person);
    expected[8..10].fill(shade);
    assert_eq!(row, expected);

    let row = rgb_row(&present_with(&mut rig, EffectMode::Shadow, -0.5, 0.0), 5);
    let mut expected = vec![bg; 16];
    expected[2..4].fill(shade);
    expected[4..8].fill(person);
    assert_eq!(row, expected);
}

fn pixelated(source: &RgbaImage, block: u32) -> RgbaImage {
    let (w, h) = source.dimensions();
    RgbaImage::from_fn(w, h, |x, y| {
        let cx = ((x / block) * block + block / 2).min(w - 1);
        let cy = ((y / block) * block + block / 2).min(h - 1);
        *source.get_pixel(cx, cy)
    })
}

#[test]
fn pixelate_block_size_follows_the_offset() {
    let mut rig = rig(ModelFamily::Softmax, (8, 8));
    let frame = gradient(20, 20);
    let source = frame.image.clone();
    rig.compositor
        .compose(frame, ModelOutput::Classes(vec![0; 64]))
        .unwrap();

    for (dx, block) in [(-1.0, 2), (0.0, 17), (1.0, 32)] {
        let out = present_with(&mut rig, EffectMode::Pixelate, dx, 0.0);
        assert_eq!(out, pixelated(&source, block), "dx={dx}");
    }
}

#[test]
fn glow_rings_the_person_and_scales_with_the_offset() {
    // 2x2 person in a 16x16 mask, frame pixels 4..8 on both axes.
    let mask: Vec<i32> = (0..256)
        .map(|i| {
            let (mx, my) = (i % 16, i / 16);
            if (2..4).contains(&mx) && (2..4).contains(&my) {
                15
            } else {
                0
            }
        })
        .collect();
    let mut rig = rig(ModelFamily::Softmax, (16, 16));
    let frame = uniform(32, 32, [0, 0, 0]);
    let black = frame.image.clone();
    rig.compositor
        .compose(frame, ModelOutput::Classes(mask))
        .unwrap();

    let off = present_with(&mut rig, EffectMode::Glow, -1.0, 0.0);
    assert_eq!(off, black);

    let base = present_with(&mut rig, EffectMode::Glow, 0.0, 0.0);
    assert_eq!(*base.get_pixel(5, 5), Rgba([0, 0, 0, 255]));
    assert_eq!(*base.get_pixel(31, 31), Rgba([0, 0, 0, 255]));
    let edge = base.get_pixel(8, 4);
    assert!(edge[0] > 0 && edge[1] > 0 && edge[2] > 0, "{edge:?}");

    let strong = present_with(&mut rig, EffectMode::Glow, 0.5, 0.0);
    assert_eq!(*strong.get_pixel(5, 5), Rgba([0, 0, 0, 255]));
    let (lo, hi) = (edge[1] as f32, strong.get_pixel(8, 4)[1] as f32);
    assert!((hi - lo * 1.5).abs() <= 1.5, "halo {lo} -> {hi}");

    let cold = present_with(&mut rig, EffectMode::Glow, 0.0, -1.0);
    let cold = cold.get_pixel(8, 4);
    assert!(cold[2] > cold[0], "{cold:?}");
    let warm = present_with(&mut rig, EffectMode::Glow, 0.0, 1.0);
    let warm = warm.get_pixel(8, 4);
    assert!(warm[0] > warm[2], "{warm:?}");
}

struct NoRedraw;

impl RedrawRequester for NoRedraw {
    fn request_redraw(&self) {}
}

#[test]
fn synthetic_frames_flow_through_the_worker() {
    let mut config = PipelineConfig::default();
    config.model.input_width = 32;
    config.model.input_height = 32;
    config.model.mask_width = 16;
    config.model.mask_height = 16;

    let state = Arc::new(StateCell::new());
    let compositor = Arc::new(Mutex::new(
        Compositor::new(
            ReferenceBackend::new(),
            &config,
            Arc::new(Controls::default()),
            state.clone(),
            &RgbaImage::new(4, 4),
        )
        .unwrap(),
    ));

    let (sink, receiver) = source::frame_slot();
    let engine = KeyingModel::new(&config.model, SYNTHETIC_BACKDROP);
    assert_eq!(engine.input_size(), (32, 32));
    let worker = FrameWorker::new(receiver, engine, compositor.clone(), state.clone(), Arc::new(NoRedraw));
    let stats = worker.stats();

    let image = SyntheticSource::render(64, 48, Orientation::Portrait, 0.0);
    assert!(sink.deliver(Frame::new(image, Instant::now())));
    drop(sink);
    worker.run().unwrap();

    assert_eq!(stats.composed(), 1);
    assert_eq!(state.get(), PipelineState::Presenting);
    let mut compositor = compositor.lock();
    let p = compositor.present(Instant::now()).unwrap().unwrap();
    assert!(p.fresh);
    assert_eq!((p.output.width, p.output.height), (48, 64));
    assert_eq!(state.get(), PipelineState::Idle);
}
