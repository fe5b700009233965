//! Model panel: status, label order and reloading from another file.

use std::path::PathBuf;
use std::sync::Arc;

use super::UiApp;
use eframe::egui;
use garbage_core::ModelHandle;
use rfd::FileDialog;

impl UiApp {
    pub(super) fn render_model_panel(&mut self, ui: &mut egui::Ui) {
        ui.heading("Model");
        ui.add_space(8.0);
        match self.model.as_ref() {
            ModelHandle::Loaded(classifier) => {
                ui.label(format!(
                    "Loaded, input {0}x{0}",
                    classifier.input_size()
                ));
                ui.label(format!("Labels: {}", classifier.labels().join(", ")));
            }
            ModelHandle::Unavailable { reason } => {
                ui.colored_label(egui::Color32::LIGHT_RED, format!("Unavailable: {reason}"));
            }
        }

        ui.add_space(12.0);
        ui.horizontal(|ui| {
            ui.label("Model file");
            ui.text_edit_singleline(&mut self.model_path_input);
            if ui.button("Browse...").clicked()
                && let Some(path) = FileDialog::new()
                    .add_filter("Safetensors", &["safetensors"])
                    .pick_file()
            {
                self.model_path_input = path.display().to_string();
            }
        });
        ui.add_space(6.0);
        if ui
            .add_enabled(!self.busy(), egui::Button::new("Reload model"))
            .clicked()
        {
            self.reload_model();
        }

        ui.add_space(16.0);
        ui.separator();
        ui.label(format!("App version: {}", self.app_version));
    }

    fn reload_model(&mut self) {
        let path = PathBuf::from(self.model_path_input.trim());
        if path != self.config.classifier.model_path {
            self.config.classifier.model_path = path;
            self.config.classifier.manifest_path = None;
        }
        self.model = Arc::new(ModelHandle::load(&self.config.classifier, &self.device));
        self.status = match self.model.as_ref() {
            ModelHandle::Loaded(_) => "Model loaded.".to_string(),
            ModelHandle::Unavailable { reason } => format!("Model unavailable: {reason}"),
        };
    }
}
