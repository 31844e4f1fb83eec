use anyhow::Result;
use shadow_fx::{ui::ShadowApp, PipelineConfig};
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,wgpu_core=warn,wgpu_hal=warn,naga=warn")),
        )
        .init();

    let config = PipelineConfig::load(std::env::args_os().nth(1).map(Into::into))?;
    tracing::info!(
        mode = config.initial_mode.label(),
        family = config.model.family.name(),
        "Starting shadow-fx"
    );

    let native_options = eframe::NativeOptions {
        renderer: eframe::Renderer::Wgpu,
        viewport: eframe::egui::ViewportBuilder::default()
            .with_title("Shadow FX")
            .with_inner_size([720.0, 960.0]),
        ..Default::default()
    };
    eframe::run_native(
        "Shadow FX",
        native_options,
        Box::new(move |cc| -> Box<dyn eframe::App> {
            match ShadowApp::new(cc, &config) {
                Ok(app) => Box::new(app),
                Err(e) => {
                    tracing::error!(error = %e, "Pipeline startup failed");
                    std::process::exit(1);
                }
            }
        }),
    )
    .map_err(|e| anyhow::anyhow!("event loop failed: {e}"))?;
    Ok(())
}
