//! Frame worker: pulls frames off the slot, runs inference and hands the
//! result to the compositor.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::Mutex;

use super::compositor::Compositor;
use super::state::{PipelineState, StateCell};
use crate::error::{FrameError, PipelineError, PipelineResult};
use crate::frame::Frame;
use crate::gpu::GpuBackend;
use crate::inference::InferenceEngine;
use crate::source::FrameReceiver;

/// Asks the display to draw again. Redraws are pulled, never pushed.
pub trait RedrawRequester: Send + Sync {
    fn request_redraw(&self);
}

impl RedrawRequester for eframe::egui::Context {
    fn request_redraw(&self) {
        self.request_repaint();
    }
}

#[derive(Debug, Default)]
pub struct WorkerStats {
    composed: AtomicU64,
    dropped: AtomicU64,
}

impl WorkerStats {
    pub fn composed(&self) -> u64 {
        self.composed.load(Ordering::Relaxed)
    }

    /// Frames lost to recoverable errors.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

pub struct FrameWorker<B: GpuBackend, E: InferenceEngine> {
    receiver: FrameReceiver,
    engine: E,
    compositor: Arc<Mutex<Compositor<B>>>,
    state: Arc<StateCell>,
    redraw: Arc<dyn RedrawRequester>,
    stats: Arc<WorkerStats>,
}

impl<B, E> FrameWorker<B, E>
where
    B: GpuBackend,
    E: InferenceEngine,
{
    pub fn new(
        receiver: FrameReceiver,
        engine: E,
        compositor: Arc<Mutex<Compositor<B>>>,
        state: Arc<StateCell>,
        redraw: Arc<dyn RedrawRequester>,
    ) -> Self {
        Self {
            receiver,
            engine,
            compositor,
            state,
            redraw,
            stats: Arc::new(WorkerStats::default()),
        }
    }

    pub fn stats(&self) -> Arc<WorkerStats> {
        self.stats.clone()
    }

    /// One cycle for one frame. Inference runs without holding the
    /// compositor lock so the display keeps presenting meanwhile.
    pub fn process(&mut self, frame: Frame) -> Result<(), FrameError> {
        let result = self.cycle(frame);
        match &result {
            Ok(()) => {
                self.stats.composed.fetch_add(1, Ordering::Relaxed);
                self.redraw.request_redraw();
            }
            Err(_) => {
                self.state.set(PipelineState::Idle);
            }
        }
        result
    }

    fn cycle(&mut self, frame: Frame) -> Result<(), FrameError> {
        self.state.set(PipelineState::AwaitingInference);
        let (iw, ih) = self.engine.input_size();
        let resized = frame.resized_for_model(iw, ih)?;
        let output = self.engine.infer(&resized)?;

        let mut compositor = self.compositor.lock();
        self.state.set(PipelineState::ComposingFrame);
        compositor.compose(frame, output)?;
        self.state.set(PipelineState::Presenting);
        Ok(())
    }

    /// Process frames until every sink is gone. Recoverable errors drop the
    /// frame; a fatal one ends the loop and is returned.
    pub fn run(mut self) -> PipelineResult<()> {
        tracing::info!("Frame worker started");
        while let Some(frame) = self.receiver.recv() {
            match self.process(frame) {
                Ok(()) => {}
                Err(FrameError::Pipeline(e)) => {
                    tracing::error!(error = %e, "Fatal pipeline error in frame worker");
                    return Err(e);
                }
                Err(e) => {
                    self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(error = %e, "Dropping frame");
                }
            }
        }
        tracing::info!(
            composed = self.stats.composed(),
            dropped = self.stats.dropped(),
            late = self.receiver.dropped(),
            "Frame worker finished"
        );
        Ok(())
    }

    pub fn spawn(self) -> PipelineResult<JoinHandle<PipelineResult<()>>>
    where
        Compositor<B>: Send,
        B: 'static,
        E: 'static,
    {
        thread::Builder::new()
            .name("frame-worker".into())
            .spawn(move || self.run())
            .map_err(|e| PipelineError::Source(format!("spawn frame worker: {e}")))
    }
}
