//! Shellboard Desktop: application entry.

use eframe::egui;

mod app;

fn main() -> eframe::Result<()> {
    let options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_inner_size([1100.0, 760.0])
            .with_min_inner_size([760.0, 520.0]),
        ..Default::default()
    };
    eframe::run_native(
        "Shellboard",
        options,
        Box::new(|cc| Box::new(app::ShellboardApp::new(cc))),
    )
}
