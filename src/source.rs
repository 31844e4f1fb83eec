//! Frame sources and the single-slot hand-off to the frame worker.
//!
//! Sources run on their own thread and push frames through a [`FrameSink`].
//! The slot holds at most one pending frame: a newer frame replaces an
//! unclaimed one (discard-late-frames), so a slow inference never builds a
//! queue behind it.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam::channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use image::{imageops, Rgba, RgbaImage};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::config::CaptureConfig;
use crate::error::{PipelineError, PipelineResult};
use crate::frame::Frame;

/// Output orientation relative to the sensor, which delivers landscape
/// frames (`LandscapeRight` is the identity).
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Orientation {
    #[default]
    Portrait,
    PortraitUpsideDown,
    LandscapeLeft,
    LandscapeRight,
}

impl Orientation {
    /// Size of an oriented frame for a `width x height` sensor.
    pub fn oriented_size(self, width: u32, height: u32) -> (u32, u32) {
        match self {
            Orientation::Portrait | Orientation::PortraitUpsideDown => (height, width),
            Orientation::LandscapeLeft | Orientation::LandscapeRight => (width, height),
        }
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum CameraPosition {
    /// User-facing; frames are mirrored.
    #[default]
    Front,
    Back,
}

impl CameraPosition {
    pub fn toggled(self) -> Self {
        match self {
            CameraPosition::Front => CameraPosition::Back,
            CameraPosition::Back => CameraPosition::Front,
        }
    }
}

/// Rotate a sensor frame into `orientation` and mirror it for the front camera.
pub fn orient(image: RgbaImage, orientation: Orientation, position: CameraPosition) -> RgbaImage {
    let rotated = match orientation {
        Orientation::Portrait => imageops::rotate90(&image),
        Orientation::PortraitUpsideDown => imageops::rotate270(&image),
        Orientation::LandscapeLeft => imageops::rotate180(&image),
        Orientation::LandscapeRight => image,
    };
    match position {
        CameraPosition::Front => imageops::flip_horizontal(&rotated),
        CameraPosition::Back => rotated,
    }
}

/// Producer end of the frame slot, owned by a source thread.
#[derive(Clone)]
pub struct FrameSink {
    sender: Sender<Frame>,
    // Second receiver used only to evict a pending frame.
    pending: Receiver<Frame>,
    dropped: Arc<AtomicU64>,
    closed: Arc<AtomicBool>,
}

impl FrameSink {
    /// Offer a frame, replacing any frame the worker has not taken yet.
    /// Returns `false` once the worker is gone; the source should stop.
    pub fn deliver(&self, frame: Frame) -> bool {
        if self.closed.load(Ordering::Acquire) {
            return false;
        }
        let mut frame = frame;
        for _ in 0..2 {
            match self.sender.try_send(frame) {
                Ok(()) => return true,
                Err(TrySendError::Full(back)) => {
                    if self.pending.try_recv().is_ok() {
                        self.dropped.fetch_add(1, Ordering::Relaxed);
                        tracing::trace!("Discarded late frame");
                    }
                    frame = back;
                }
                Err(TrySendError::Disconnected(_)) => return false,
            }
        }
        // The worker raced us for the slot and a fresh frame is already pending.
        self.dropped.fetch_add(1, Ordering::Relaxed);
        true
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

/// Consumer end of the frame slot, owned by the frame worker.
pub struct FrameReceiver {
    receiver: Receiver<Frame>,
    dropped: Arc<AtomicU64>,
    closed: Arc<AtomicBool>,
}

impl FrameReceiver {
    /// Block until a frame arrives. `None` once every sink is gone.
    pub fn recv(&self) -> Option<Frame> {
        self.receiver.recv().ok()
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Result<Frame, RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }

    /// Frames replaced before the worker could take them.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl Drop for FrameReceiver {
    fn drop(&mut self) {
        self.closed.store(true, Ordering::Release);
    }
}

/// A bounded(1) channel with replace-pending semantics.
pub fn frame_slot() -> (FrameSink, FrameReceiver) {
    let (sender, receiver) = bounded::<Frame>(1);
    let dropped = Arc::new(AtomicU64::new(0));
    let closed = Arc::new(AtomicBool::new(false));
    (
        FrameSink {
            sender,
            pending: receiver.clone(),
            dropped: dropped.clone(),
            closed: closed.clone(),
        },
        FrameReceiver {
            receiver,
            dropped,
            closed,
        },
    )
}

/// Anything that delivers timestamped frames on its own thread.
pub trait FrameSource: Send {
    fn start(&mut self, sink: FrameSink) -> PipelineResult<()>;

    /// Stop delivering and join the capture thread.
    fn stop(&mut self);

    fn set_orientation_and_position(&mut self, orientation: Orientation, position: CameraPosition);

    fn orientation_and_position(&self) -> (Orientation, CameraPosition);

    fn switch_camera(&mut self) {
        let (orientation, position) = self.orientation_and_position();
        self.set_orientation_and_position(orientation, position.toggled());
    }
}

type SharedPose = Arc<Mutex<(Orientation, CameraPosition)>>;

/// Thread plumbing shared by the concrete sources.
struct CaptureThread {
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl CaptureThread {
    fn idle() -> Self {
        Self {
            running: Arc::new(AtomicBool::new(false)),
            handle: None,
        }
    }

    fn is_running(&self) -> bool {
        self.handle.is_some()
    }

    fn stop(&mut self, name: &str) {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::error!(source = name, "Capture thread panicked");
            }
            tracing::info!(source = name, "Frame source stopped");
        }
    }
}

/// Backdrop colour of the synthetic scene; the keying model treats it as
/// background.
pub const SYNTHETIC_BACKDROP: [u8; 3] = [0, 177, 64];

/// Generates a moving figure over a flat key-coloured backdrop.
pub struct SyntheticSource {
    width: u32,
    height: u32,
    fps: u32,
    pose: SharedPose,
    thread: CaptureThread,
}

impl SyntheticSource {
    pub fn new(config: &CaptureConfig) -> Self {
        Self {
            width: config.width,
            height: config.height,
            fps: config.fps.max(1),
            pose: Arc::new(Mutex::new((config.orientation, config.position))),
            thread: CaptureThread::idle(),
        }
    }

    /// Render the scene `t` seconds in, already upright for `orientation`.
    pub fn render(width: u32, height: u32, orientation: Orientation, t: f32) -> RgbaImage {
        let (w, h) = orientation.oriented_size(width, height);
        let (wf, hf) = (w as f32, h as f32);
        let cx = wf * 0.5 + (t * 0.8).sin() * wf * 0.2;
        let head_y = hf * 0.3;
        let head_r = wf.min(hf) * 0.1;
        let body_top = head_y + head_r * 0.9;
        let body_half = wf.min(hf) * 0.16;
        let [kr, kg, kb] = SYNTHETIC_BACKDROP;

        RgbaImage::from_fn(w, h, |x, y| {
            let (xf, yf) = (x as f32, y as f32);
            let in_head = (xf - cx).powi(2) + (yf - head_y).powi(2) <= head_r * head_r;
            let in_body = yf >= body_top && (xf - cx).abs() <= body_half * (1.0 + (yf - body_top) / hf);
            if in_head {
                Rgba([224, 172, 140, 255])
            } else if in_body {
                Rgba([196, 58, 64, 255])
            } else {
                // Faint vertical shading; stays within the keying tolerance.
                let shade = (yf / hf * 12.0) as u8;
                Rgba([kr, kg.saturating_sub(shade), kb, 255])
            }
        })
    }
}

impl FrameSource for SyntheticSource {
    fn start(&mut self, sink: FrameSink) -> PipelineResult<()> {
        if self.thread.is_running() {
            return Ok(());
        }
        self.thread.running.store(true, Ordering::Release);
        let running = self.thread.running.clone();
        let pose = self.pose.clone();
        let (width, height) = (self.width, self.height);
        let period = Duration::from_secs_f64(1.0 / self.fps as f64);

        let handle = std::thread::Builder::new()
            .name("synthetic-source".into())
            .spawn(move || {
                let t0 = Instant::now();
                while running.load(Ordering::Acquire) {
                    let tick = Instant::now();
                    let (orientation, position) = *pose.lock();
                    let image = Self::render(width, height, orientation, t0.elapsed().as_secs_f32());
                    let image = match position {
                        CameraPosition::Front => imageops::flip_horizontal(&image),
                        CameraPosition::Back => image,
                    };
                    if !sink.deliver(Frame::new(image, tick)) {
                        tracing::debug!("Frame worker gone, synthetic source exiting");
                        break;
                    }
                    if let Some(rest) = period.checked_sub(tick.elapsed()) {
                        std::thread::sleep(rest);
                    }
                }
            })
            .map_err(|e| PipelineError::Source(e.to_string()))?;

        self.thread.handle = Some(handle);
        tracing::info!(width, height, fps = self.fps, "Synthetic source started");
        Ok(())
    }

    fn stop(&mut self) {
        self.thread.stop("synthetic");
    }

    fn set_orientation_and_position(&mut self, orientation: Orientation, position: CameraPosition) {
        *self.pose.lock() = (orientation, position);
    }

    fn orientation_and_position(&self) -> (Orientation, CameraPosition) {
        *self.pose.lock()
    }
}

impl Drop for SyntheticSource {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(feature = "camera")]
pub use camera::CameraSource;

#[cfg(feature = "camera")]
mod camera {
    use super::*;

    use nokhwa::pixel_format::RgbFormat;
    use nokhwa::utils::{
        CameraFormat, CameraIndex, FrameFormat, RequestedFormat, RequestedFormatType, Resolution,
    };
    use nokhwa::Camera;

    /// A capture device through nokhwa. The camera handle lives on the
    /// capture thread; only the open result crosses back.
    pub struct CameraSource {
        index: u32,
        width: u32,
        height: u32,
        fps: u32,
        pose: SharedPose,
        thread: CaptureThread,
    }

    impl CameraSource {
        pub fn new(index: u32, config: &CaptureConfig) -> Self {
            Self {
                index,
                width: config.width,
                height: config.height,
                fps: config.fps,
                pose: Arc::new(Mutex::new((config.orientation, config.position))),
                thread: CaptureThread::idle(),
            }
        }
    }

    fn open(index: u32, width: u32, height: u32, fps: u32) -> Result<Camera, String> {
        let format = CameraFormat::new(Resolution::new(width, height), FrameFormat::MJPEG, fps);
        let requested = RequestedFormat::new::<RgbFormat>(RequestedFormatType::Closest(format));
        let mut camera = Camera::new(CameraIndex::Index(index), requested)
            .map_err(|e| format!("create camera: {e}"))?;
        camera.open_stream().map_err(|e| format!("open stream: {e}"))?;
        Ok(camera)
    }

    fn grab(camera: &mut Camera) -> Result<RgbaImage, String> {
        let buffer = camera.frame().map_err(|e| format!("fetch frame: {e}"))?;
        let decoded = buffer
            .decode_image::<RgbFormat>()
            .map_err(|e| format!("decode RGB: {e}"))?;
        let (w, h) = decoded.dimensions();
        let rgb = image::RgbImage::from_raw(w, h, decoded.into_raw())
            .ok_or_else(|| format!("short RGB buffer for {w}x{h}"))?;
        Ok(image::DynamicImage::ImageRgb8(rgb).to_rgba8())
    }

    impl FrameSource for CameraSource {
        fn start(&mut self, sink: FrameSink) -> PipelineResult<()> {
            if self.thread.is_running() {
                return Ok(());
            }
            self.thread.running.store(true, Ordering::Release);
            let running = self.thread.running.clone();
            let pose = self.pose.clone();
            let (index, width, height, fps) = (self.index, self.width, self.height, self.fps);
            let (opened_tx, opened_rx) = bounded::<Result<(u32, u32), String>>(1);

            let handle = std::thread::Builder::new()
                .name("camera-source".into())
                .spawn(move || {
                    let mut camera = match open(index, width, height, fps) {
                        Ok(camera) => camera,
                        Err(e) => {
                            let _ = opened_tx.send(Err(e));
                            return;
                        }
                    };
                    let actual = camera.resolution();
                    let _ = opened_tx.send(Ok((actual.width(), actual.height())));

                    while running.load(Ordering::Acquire) {
                        let image = match grab(&mut camera) {
                            Ok(image) => image,
                            Err(e) => {
                                tracing::warn!(error = %e, "Dropping camera frame");
                                continue;
                            }
                        };
                        let timestamp = Instant::now();
                        let (orientation, position) = *pose.lock();
                        if !sink.deliver(Frame::new(orient(image, orientation, position), timestamp)) {
                            break;
                        }
                    }
                    if let Err(e) = camera.stop_stream() {
                        tracing::warn!(error = %e, "Camera stream did not stop cleanly");
                    }
                })
                .map_err(|e| PipelineError::Source(e.to_string()))?;

            match opened_rx.recv() {
                Ok(Ok((w, h))) => {
                    self.thread.handle = Some(handle);
                    tracing::info!(index, width = w, height = h, "Camera started");
                    Ok(())
                }
                Ok(Err(reason)) => {
                    let _ = handle.join();
                    Err(PipelineError::Source(reason))
                }
                Err(_) => {
                    let _ = handle.join();
                    Err(PipelineError::Source("camera thread exited during startup".into()))
                }
            }
        }

        fn stop(&mut self) {
            self.thread.stop("camera");
        }

        fn set_orientation_and_position(&mut self, orientation: Orientation, position: CameraPosition) {
            *self.pose.lock() = (orientation, position);
        }

        fn orientation_and_position(&self) -> (Orientation, CameraPosition) {
            *self.pose.lock()
        }
    }

    impl Drop for CameraSource {
        fn drop(&mut self) {
            self.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(tag: u8) -> Frame {
        Frame::new(RgbaImage::from_pixel(1, 1, Rgba([tag, 0, 0, 255])), Instant::now())
    }

    #[test]
    fn newer_frame_replaces_pending_one() {
        let (sink, receiver) = frame_slot();
        assert!(sink.deliver(frame(1)));
        assert!(sink.deliver(frame(2)));
        assert!(sink.deliver(frame(3)));
        let got = receiver.recv_timeout(Duration::from_millis(100)).unwrap();
        assert_eq!(got.image.get_pixel(0, 0)[0], 3);
        assert_eq!(receiver.dropped(), 2);
        assert!(receiver.recv_timeout(Duration::from_millis(10)).is_err());
    }

    #[test]
    fn sink_reports_closed_receiver() {
        let (sink, receiver) = frame_slot();
        drop(receiver);
        assert!(sink.is_closed());
        assert!(!sink.deliver(frame(1)));
    }

    #[test]
    fn receiver_ends_when_sinks_drop() {
        let (sink, receiver) = frame_slot();
        sink.deliver(frame(7));
        drop(sink);
        assert!(receiver.recv().is_some());
        assert!(receiver.recv().is_none());
    }

    #[test]
    fn portrait_swaps_dimensions() {
        let img = RgbaImage::new(4, 2);
        let out = orient(img, Orientation::Portrait, CameraPosition::Back);
        assert_eq!(out.dimensions(), (2, 4));
        assert_eq!(Orientation::Portrait.oriented_size(1280, 720), (720, 1280));
    }

    #[test]
    fn front_camera_is_mirrored() {
        let mut img = RgbaImage::new(2, 1);
        img.put_pixel(0, 0, Rgba([255, 0, 0, 255]));
        let out = orient(img, Orientation::LandscapeRight, CameraPosition::Front);
        assert_eq!(out.get_pixel(1, 0)[0], 255);
    }

    #[test]
    fn synthetic_source_delivers_frames() {
        let config = CaptureConfig {
            width: 64,
            height: 48,
            fps: 60,
            ..CaptureConfig::default()
        };
        let (sink, receiver) = frame_slot();
        let mut source = SyntheticSource::new(&config);
        source.start(sink).unwrap();
        let frame = receiver.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(frame.image.dimensions(), (48, 64));
        source.stop();
    }

    #[test]
    fn switch_camera_toggles_position() {
        let mut source = SyntheticSource::new(&CaptureConfig::default());
        assert_eq!(source.orientation_and_position().1, CameraPosition::Front);
        source.switch_camera();
        assert_eq!(source.orientation_and_position().1, CameraPosition::Back);
    }
}
