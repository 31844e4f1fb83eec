//! Ventana principal: menú de modos, FPS, control 2-D y la superficie de
//! presentación que pinta la textura de salida mediante un callback de wgpu.

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use eframe::{egui, egui_wgpu, wgpu};
use parking_lot::Mutex;

use crate::assets;
use crate::config::{PipelineConfig, SourceKind};
use crate::control::{ControlPad, Controls};
use crate::error::{PipelineError, PipelineResult};
use crate::gpu::effects::EffectMode;
use crate::gpu::{DisplayPipeline, WgpuBackend};
use crate::inference::KeyingModel;
use crate::pipeline::{Compositor, FrameWorker, StateCell};
use crate::source::{self, FrameSource, SyntheticSource, SYNTHETIC_BACKDROP};

type SharedCompositor = Arc<Mutex<Compositor<WgpuBackend>>>;

/// Display state kept in egui's callback resources.
struct DisplayResources {
    pipeline: DisplayPipeline,
    bind_group: Option<wgpu::BindGroup>,
    /// Generation of the output texture `bind_group` points at.
    bound_generation: Option<u64>,
}

struct EffectCallback {
    compositor: SharedCompositor,
    fatal: Arc<Mutex<Option<String>>>,
}

impl EffectCallback {
    fn fail(&self, error: PipelineError) {
        tracing::error!(error = %error, "Presentation failed");
        *self.fatal.lock() = Some(error.to_string());
    }
}

impl egui_wgpu::CallbackTrait for EffectCallback {
    fn prepare(
        &self,
        device: &wgpu::Device,
        _queue: &wgpu::Queue,
        _screen_descriptor: &egui_wgpu::ScreenDescriptor,
        _egui_encoder: &mut wgpu::CommandEncoder,
        callback_resources: &mut egui_wgpu::CallbackResources,
    ) -> Vec<wgpu::CommandBuffer> {
        let Some(display) = callback_resources.get_mut::<DisplayResources>() else {
            return Vec::new();
        };
        let mut compositor = self.compositor.lock();
        let presentation = match compositor.present(Instant::now()) {
            Ok(Some(p)) => p,
            Ok(None) => return Vec::new(),
            Err(e) => {
                self.fail(e);
                return Vec::new();
            }
        };

        let generation = presentation.output.generation();
        if display.bound_generation != Some(generation) {
            match compositor.cache().texture(presentation.output) {
                Ok(texture) => {
                    display.bind_group = Some(display.pipeline.bind_group(device, texture));
                    display.bound_generation = Some(generation);
                    tracing::debug!(
                        width = presentation.output.width,
                        height = presentation.output.height,
                        "Rebound output texture"
                    );
                }
                Err(e) => {
                    self.fail(e);
                    return Vec::new();
                }
            }
        }
        vec![presentation.commands]
    }

    fn paint<'a>(
        &'a self,
        _info: egui::PaintCallbackInfo,
        render_pass: &mut wgpu::RenderPass<'a>,
        callback_resources: &'a egui_wgpu::CallbackResources,
    ) {
        let Some(display) = callback_resources.get::<DisplayResources>() else {
            return;
        };
        if let Some(bind_group) = &display.bind_group {
            display.pipeline.draw(render_pass, bind_group);
        }
    }
}

fn make_source(config: &PipelineConfig) -> PipelineResult<Box<dyn FrameSource>> {
    match config.capture.source {
        SourceKind::Synthetic => Ok(Box::new(SyntheticSource::new(&config.capture))),
        #[cfg(feature = "camera")]
        SourceKind::Camera { index } => Ok(Box::new(source::CameraSource::new(index, &config.capture))),
        #[cfg(not(feature = "camera"))]
        SourceKind::Camera { index } => Err(PipelineError::Source(format!(
            "camera {index} requested but built without the `camera` feature"
        ))),
    }
}

pub struct ShadowApp {
    controls: Arc<Controls>,
    compositor: SharedCompositor,
    source: Box<dyn FrameSource>,
    worker: Option<JoinHandle<PipelineResult<()>>>,
    pad: ControlPad,
    hide_after: Duration,
    show_camera: bool,
    camera_texture: Option<(u64, egui::TextureHandle)>,
    fatal: Arc<Mutex<Option<String>>>,
}

impl ShadowApp {
    /// Build the whole pipeline against the render state eframe created.
    pub fn new(cc: &eframe::CreationContext<'_>, config: &PipelineConfig) -> PipelineResult<Self> {
        let render_state = cc
            .wgpu_render_state
            .as_ref()
            .ok_or_else(|| PipelineError::GpuUnavailable("eframe started without wgpu".into()))?;
        let info = render_state.adapter.get_info();
        tracing::info!(adapter = %info.name, backend = ?info.backend, "Using GPU");

        let background = assets::load_background(config.background.as_deref())?;
        let controls = Arc::new(Controls::new(config.initial_mode));
        let state = Arc::new(StateCell::new());
        let backend = WgpuBackend::new(render_state.device.clone(), render_state.queue.clone());
        let compositor = Arc::new(Mutex::new(Compositor::new(
            backend,
            config,
            controls.clone(),
            state.clone(),
            &background,
        )?));

        render_state
            .renderer
            .write()
            .callback_resources
            .insert(DisplayResources {
                pipeline: DisplayPipeline::new(&render_state.device, render_state.target_format),
                bind_group: None,
                bound_generation: None,
            });

        let (sink, receiver) = source::frame_slot();
        let engine = KeyingModel::new(&config.model, SYNTHETIC_BACKDROP);
        let worker = FrameWorker::new(
            receiver,
            engine,
            compositor.clone(),
            state,
            Arc::new(cc.egui_ctx.clone()),
        )
        .spawn()?;

        let mut source = make_source(config)?;
        source.start(sink)?;

        Ok(Self {
            controls,
            compositor,
            source,
            worker: Some(worker),
            pad: ControlPad::new(&config.control),
            hide_after: Duration::from_secs_f32(config.control.hide_after_secs.max(0.0)),
            show_camera: false,
            camera_texture: None,
            fatal: Arc::new(Mutex::new(None)),
        })
    }

    /// Fatal errors from the worker or the paint callback end the process.
    fn check_fatal(&mut self) {
        if let Some(reason) = self.fatal.lock().take() {
            tracing::error!(%reason, "Stopping after fatal pipeline error");
            std::process::exit(1);
        }
        if self.worker.as_ref().is_some_and(|w| w.is_finished()) {
            if let Some(handle) = self.worker.take() {
                match handle.join() {
                    Ok(Ok(())) => tracing::info!("Frame worker exited"),
                    Ok(Err(e)) => {
                        tracing::error!(error = %e, "Frame worker stopped on a fatal error");
                        std::process::exit(1);
                    }
                    Err(_) => {
                        tracing::error!("Frame worker panicked");
                        std::process::exit(1);
                    }
                }
            }
        }
    }

    fn top_bar(&mut self, ui: &mut egui::Ui) {
        ui.horizontal(|ui| {
            let mut mode = self.controls.mode();
            egui::ComboBox::from_id_source("effect_mode")
                .selected_text(mode.label())
                .show_ui(ui, |ui| {
                    for m in EffectMode::ALL {
                        ui.selectable_value(&mut mode, m, m.label());
                    }
                });
            self.controls.set_mode(mode);

            if ui.button("⟲ Camera").on_hover_text("Switch camera").clicked() {
                self.source.switch_camera();
            }
            ui.checkbox(&mut self.show_camera, "Raw preview");

            ui.with_layout(egui::Layout::right_to_left(egui::Align::Center), |ui| {
                let fps = self.compositor.lock().fps();
                ui.monospace(format!("{fps:5.1} FPS"));
            });
        });
    }

    fn frame_size(&self) -> Option<(u32, u32)> {
        self.compositor
            .lock()
            .last_frame()
            .map(|f| (f.width(), f.height()))
    }

    fn camera_texture(&mut self, ctx: &egui::Context) -> Option<egui::TextureId> {
        let compositor = self.compositor.lock();
        let seq = compositor.frames_composed();
        let frame = compositor.last_frame()?;
        let stale = self.camera_texture.as_ref().map_or(true, |(s, _)| *s != seq);
        if stale {
            let size = [frame.width() as usize, frame.height() as usize];
            let image = egui::ColorImage::from_rgba_unmultiplied(size, frame.image.as_raw());
            drop(compositor);
            match &mut self.camera_texture {
                Some((s, texture)) => {
                    texture.set(image, egui::TextureOptions::LINEAR);
                    *s = seq;
                }
                None => {
                    let texture = ctx.load_texture("camera_frame", image, egui::TextureOptions::LINEAR);
                    self.camera_texture = Some((seq, texture));
                }
            }
        }
        self.camera_texture.as_ref().map(|(_, t)| t.id())
    }

    fn surface(&mut self, ui: &mut egui::Ui) {
        let (rect, response) = ui.allocate_exact_size(ui.available_size(), egui::Sense::drag());
        let Some((fw, fh)) = self.frame_size() else {
            ui.painter().text(
                rect.center(),
                egui::Align2::CENTER_CENTER,
                "Waiting for frames…",
                egui::FontId::proportional(16.0),
                egui::Color32::GRAY,
            );
            return;
        };

        // Aspect-fit the frame into the panel.
        let scale = (rect.width() / fw as f32).min(rect.height() / fh as f32);
        let view = egui::Rect::from_center_size(
            rect.center(),
            egui::vec2(fw as f32 * scale, fh as f32 * scale),
        );

        if self.show_camera {
            if let Some(id) = self.camera_texture(ui.ctx()) {
                ui.painter().image(
                    id,
                    view,
                    egui::Rect::from_min_max(egui::pos2(0.0, 0.0), egui::pos2(1.0, 1.0)),
                    egui::Color32::WHITE,
                );
            }
        } else {
            ui.painter().add(egui_wgpu::Callback::new_paint_callback(
                view,
                EffectCallback {
                    compositor: self.compositor.clone(),
                    fatal: self.fatal.clone(),
                },
            ));
        }

        let center = [view.center().x, view.center().y];
        let now = Instant::now();
        if let Some(pos) = response.interact_pointer_pos() {
            let offset = self.pad.offset_for([pos.x, pos.y], center);
            self.controls.set_offset(offset, now);
        }

        if self.pad.is_visible(self.controls.last_used(), now) {
            let [kx, ky] = self.pad.knob_position(self.controls.offset(), center);
            let painter = ui.painter();
            painter.circle_stroke(
                view.center(),
                6.0,
                egui::Stroke::new(1.0, egui::Color32::from_white_alpha(120)),
            );
            painter.circle_filled(egui::pos2(kx, ky), 14.0, egui::Color32::from_white_alpha(180));
            // Wake up again to hide the knob.
            ui.ctx().request_repaint_after(self.hide_after);
        }
    }
}

impl eframe::App for ShadowApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        self.check_fatal();

        egui::TopBottomPanel::top("toolbar").show(ctx, |ui| self.top_bar(ui));
        egui::CentralPanel::default()
            .frame(egui::Frame::none().fill(egui::Color32::BLACK))
            .show(ctx, |ui| self.surface(ui));
    }
}

impl Drop for ShadowApp {
    fn drop(&mut self) {
        // Stopping the source drops the sink, which ends the worker loop.
        self.source.stop();
        if let Some(handle) = self.worker.take() {
            let _ = handle.join();
        }
    }
}
