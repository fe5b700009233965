mod preview;
mod settings;
mod worker;

use std::path::PathBuf;
use std::sync::Arc;

use eframe::{App, Frame, egui};
use garbage_core::{
    AppConfig, ClassifyStage, Device, IMAGE_EXTENSIONS, ModelHandle, get_device, is_supported_image,
};
use rfd::FileDialog;

use preview::{PREVIEW_SIZE, load_preview};
use worker::{ClassificationJob, WorkerEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Panel {
    Classify,
    Model,
}

pub(crate) struct UiApp {
    config: AppConfig,
    device: Device,
    model: Arc<ModelHandle>,
    panel: Panel,
    file_path: Option<PathBuf>,
    preview: Option<egui::TextureHandle>,
    preview_dirty: bool,
    job: Option<ClassificationJob>,
    progress: f32,
    result_text: String,
    status: String,
    model_path_input: String,
    app_version: &'static str,
}

impl UiApp {
    pub(crate) fn new(config: AppConfig) -> Self {
        let device = get_device();
        let model = Arc::new(ModelHandle::load(&config.classifier, &device));
        let status = match model.as_ref() {
            ModelHandle::Loaded(_) => String::new(),
            ModelHandle::Unavailable { reason } => format!("Model unavailable: {reason}"),
        };
        let model_path_input = config.classifier.model_path.display().to_string();
        Self {
            config,
            device,
            model,
            panel: Panel::Classify,
            file_path: None,
            preview: None,
            preview_dirty: false,
            job: None,
            progress: 0.0,
            result_text: String::new(),
            status,
            model_path_input,
            app_version: env!("GARBAGE_SORTER_VERSION"),
        }
    }

    fn busy(&self) -> bool {
        self.job.is_some()
    }

    fn select_file(&mut self, path: PathBuf) {
        if !is_supported_image(&path) {
            tracing::warn!("Dropped file is not a supported image: {}", path.display());
        }
        self.file_path = Some(path);
        self.preview_dirty = true;
        self.progress = 0.0;
        self.result_text.clear();
    }

    fn start_classification(&mut self, ctx: &egui::Context) {
        let Some(path) = self.file_path.clone() else {
            return;
        };
        self.progress = 0.0;
        self.result_text = "Analyzing...".to_string();
        let repaint = ctx.clone();
        self.job = Some(ClassificationJob::spawn(
            Arc::clone(&self.model),
            path,
            move || repaint.request_repaint(),
        ));
    }

    fn poll_job(&mut self) {
        let Some(job) = &self.job else {
            return;
        };
        let mut finished = None;
        for event in job.poll() {
            match event {
                WorkerEvent::Stage(stage) => self.progress = stage.fraction(),
                WorkerEvent::Done(text) => finished = Some(text),
            }
        }
        if let Some(text) = finished {
            self.progress = ClassifyStage::Finished.fraction();
            self.result_text = format!("Result: {text}");
            self.job = None;
        }
    }

    fn handle_dropped_files(&mut self, ctx: &egui::Context) {
        let dropped = ctx.input(|i| i.raw.dropped_files.first().and_then(|f| f.path.clone()));
        if let Some(path) = dropped
            && !self.busy()
        {
            self.select_file(path);
        }
    }

    fn render_classify_panel(&mut self, ctx: &egui::Context, ui: &mut egui::Ui) {
        ui.horizontal(|ui| {
            if ui
                .add_enabled(!self.busy(), egui::Button::new("Open image..."))
                .clicked()
                && let Some(path) = FileDialog::new()
                    .add_filter("Images", &IMAGE_EXTENSIONS)
                    .pick_file()
            {
                self.select_file(path);
            }
            let can_classify = self.file_path.is_some() && !self.busy();
            if ui
                .add_enabled(can_classify, egui::Button::new("Classify"))
                .clicked()
            {
                self.start_classification(ctx);
            }
        });
        ui.add_space(8.0);

        if self.preview_dirty {
            self.preview = self.file_path.as_deref().and_then(|p| load_preview(ctx, p));
            self.preview_dirty = false;
        }

        let side = PREVIEW_SIZE as f32;
        let (resp, painter) =
            ui.allocate_painter(egui::Vec2::new(side, side), egui::Sense::hover());
        let r = resp.rect;
        if let Some(tex) = &self.preview {
            let uv = egui::Rect::from_min_max(egui::pos2(0.0, 0.0), egui::pos2(1.0, 1.0));
            painter.image(tex.id(), r, uv, egui::Color32::WHITE);
        } else {
            let hovering = ctx.input(|i| !i.raw.hovered_files.is_empty());
            let fill = if hovering { 70 } else { 40 };
            painter.rect_filled(r, 4.0, egui::Color32::from_gray(fill));
            painter.rect_stroke(
                r,
                4.0,
                egui::Stroke::new(1.0, egui::Color32::DARK_GRAY),
                egui::StrokeKind::Inside,
            );
            painter.text(
                r.center(),
                egui::Align2::CENTER_CENTER,
                "Drop an image here",
                egui::FontId::proportional(16.0),
                egui::Color32::LIGHT_GRAY,
            );
        }
        if let Some(path) = &self.file_path {
            ui.label(path.display().to_string());
        }

        ui.add_space(8.0);
        ui.add(
            egui::ProgressBar::new(self.progress)
                .show_percentage()
                .animate(self.busy()),
        );
        ui.add_space(8.0);
        if !self.result_text.is_empty() {
            ui.label(egui::RichText::new(&self.result_text).size(20.0));
        }
    }
}

impl App for UiApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut Frame) {
        self.handle_dropped_files(ctx);
        self.poll_job();

        egui::TopBottomPanel::top("top").show(ctx, |ui| {
            ui.horizontal(|ui| {
                ui.selectable_value(&mut self.panel, Panel::Classify, "Classify");
                ui.selectable_value(&mut self.panel, Panel::Model, "Model");
                if !self.status.is_empty() {
                    ui.separator();
                    ui.label(&self.status);
                }
            });
        });

        egui::CentralPanel::default().show(ctx, |ui| match self.panel {
            Panel::Classify => self.render_classify_panel(ctx, ui),
            Panel::Model => self.render_model_panel(ui),
        });
    }
}
