//! OnCourse Desktop: application entry.

mod app;

use eframe::egui;

fn main() -> anyhow::Result<()> {
    let runtime = tokio::runtime::Runtime::new()?;
    let options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_inner_size([1000.0, 760.0])
            .with_min_inner_size([640.0, 480.0]),
        ..Default::default()
    };
    eframe::run_native(
        "OnCourse",
        options,
        Box::new(move |cc| Box::new(app::OnCourseApp::new(cc, runtime))),
    )
    .map_err(|e| anyhow::anyhow!("desktop app failed: {}", e))
}
