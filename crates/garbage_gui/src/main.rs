mod app;

use eframe::{NativeOptions, egui};
use garbage_core::AppConfig;

use app::UiApp;

fn main() {
    tracing_subscriber::fmt::init();

    let config = match AppConfig::load(None) {
        Ok(cfg) => cfg,
        Err(e) => {
            tracing::error!("Config could not be read, using defaults: {e}");
            AppConfig::default()
        }
    };

    let options = NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_inner_size([520.0, 680.0])
            .with_drag_and_drop(true),
        ..NativeOptions::default()
    };
    let title = format!("Garbage Sorter {}", env!("GARBAGE_SORTER_VERSION"));
    if let Err(e) = eframe::run_native(
        &title,
        options,
        Box::new(move |_cc| {
            Ok::<_, Box<dyn std::error::Error + Send + Sync>>(Box::new(UiApp::new(config)))
        }),
    ) {
        eprintln!("Application stopped with error: {e}");
    }
}
