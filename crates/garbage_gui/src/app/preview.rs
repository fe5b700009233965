use std::path::Path;

use eframe::egui;

/// Side length of the preview square; the image is stretched to fit.
pub(crate) const PREVIEW_SIZE: u32 = 320;

pub(crate) fn load_preview(ctx: &egui::Context, path: &Path) -> Option<egui::TextureHandle> {
    match image::open(path) {
        Ok(img) => {
            let thumb = image::imageops::thumbnail(&img.to_rgba8(), PREVIEW_SIZE, PREVIEW_SIZE);
            let (w, h) = thumb.dimensions();
            let size = [w as usize, h as usize];
            let pixels = thumb.into_raw();
            let color = egui::ColorImage::from_rgba_unmultiplied(size, &pixels);
            let name = format!("preview:{}", path.display());
            Some(ctx.load_texture(name, color, egui::TextureOptions::LINEAR))
        }
        Err(e) => {
            tracing::warn!("Failed to load preview for {}: {}", path.display(), e);
            None
        }
    }
}
