//! Shellboard Desktop: egui app state and UI.

use eframe::egui;
use lib::client::ApiClient;
use lib::console::{Console, ConsoleState, EntryKind};
use lib::gate::SCRIPT_REGISTRY;
use lib::system_info::SystemSnapshot;
use std::collections::VecDeque;
use std::future::Future;
use std::io::BufRead;
use std::net::ToSocketAddrs;
use std::path::PathBuf;
use std::process::{Child, Stdio};
use std::sync::mpsc;
use std::sync::{Mutex, OnceLock};
use std::time::Duration;

const LOG_BUFFER_MAX_LINES: usize = 2000;

/// Ring buffer of log lines for the Logs screen. Written by DesktopLogger and the server output readers.
static LOG_LINES: OnceLock<Mutex<VecDeque<String>>> = OnceLock::new();

fn log_buffer() -> &'static Mutex<VecDeque<String>> {
    LOG_LINES.get_or_init(|| Mutex::new(VecDeque::new()))
}

fn push_log_line(line: String) {
    if let Ok(mut buf) = log_buffer().lock() {
        buf.push_back(line);
        while buf.len() > LOG_BUFFER_MAX_LINES {
            buf.pop_front();
        }
    }
}

/// Logger that appends to LOG_LINES for display in the Logs screen.
struct DesktopLogger;

impl log::Log for DesktopLogger {
    fn enabled(&self, _: &log::Metadata) -> bool {
        true
    }

    fn log(&self, record: &log::Record) {
        let line = format!(
            "{} [{}] {}",
            chrono::Local::now().format("%H:%M:%S%.3f"),
            record.level(),
            record.args()
        );
        push_log_line(line);
    }

    fn flush(&self) {}
}

static LOGGER: DesktopLogger = DesktopLogger;

#[derive(Clone, Copy, PartialEq, Eq, Default)]
enum Screen {
    #[default]
    Console,
    System,
    Logs,
}

/// Frames between server probes (probe at ~1 Hz if 60 fps).
const PROBE_INTERVAL_FRAMES: u32 = 60;

/// Run one request on a worker thread with its own runtime; the UI polls the receiver each frame.
fn spawn_request<T, F, Fut>(make: F) -> mpsc::Receiver<Result<T, String>>
where
    T: Send + 'static,
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = Result<T, String>>,
{
    let (tx, rx) = mpsc::channel();
    std::thread::spawn(move || {
        let result = match tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
        {
            Ok(rt) => rt.block_on(make()),
            Err(e) => Err(format!("failed to start runtime: {}", e)),
        };
        let _ = tx.send(result);
    });
    rx
}

/// Client for the configured server; falls back to defaults when the config cannot be read.
fn configured_client() -> ApiClient {
    let config = match lib::config::load_config(None) {
        Ok((config, _)) => config,
        Err(e) => {
            log::warn!("failed to load config, using defaults: {}", e);
            lib::config::Config::default()
        }
    };
    ApiClient::from_config(&config)
}

/// Resolve the shellboard CLI binary: same directory as this executable, or "shellboard" from PATH.
fn resolve_shellboard_binary() -> PathBuf {
    let name = if cfg!(windows) {
        "shellboard.exe"
    } else {
        "shellboard"
    };
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.join(name)))
        .filter(|candidate| candidate.exists())
        .unwrap_or_else(|| PathBuf::from(name))
}

/// Where exported transcripts go: the Downloads folder, else home, else the working directory.
fn export_dir() -> PathBuf {
    dirs::download_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
}

fn entry_color(kind: EntryKind) -> egui::Color32 {
    match kind {
        EntryKind::Command => egui::Color32::from_rgb(0x88, 0xc0, 0xd0),
        EntryKind::Output => egui::Color32::from_rgb(0xd8, 0xde, 0xe9),
        EntryKind::Error => egui::Color32::from_rgb(0xe0, 0x6c, 0x75),
    }
}

pub struct ShellboardApp {
    /// When Some, the server subprocess is running. Cleared when process exits or we stop it.
    server_process: Option<Child>,
    /// Last error from start server (e.g. spawn failed).
    server_error: Option<String>,
    /// True if the configured address accepted a TCP connection (we or someone else).
    server_responds: bool,
    /// True once at least one probe has finished.
    probe_completed: bool,
    probe_receiver: Option<mpsc::Receiver<Result<bool, String>>>,
    frames_since_probe: u32,
    console: Console,
    /// When Some, a command or script call is in flight.
    reply_receiver: Option<mpsc::Receiver<Result<lib::client::ApiReply, String>>>,
    system_info: Option<SystemSnapshot>,
    system_error: Option<String>,
    system_receiver: Option<mpsc::Receiver<Result<SystemSnapshot, String>>>,
    /// Result line from the last export.
    export_status: Option<String>,
    current_screen: Screen,
}

impl Default for ShellboardApp {
    fn default() -> Self {
        Self {
            server_process: None,
            server_error: None,
            server_responds: false,
            probe_completed: false,
            probe_receiver: None,
            frames_since_probe: PROBE_INTERVAL_FRAMES,
            console: Console::new(),
            reply_receiver: None,
            system_info: None,
            system_error: None,
            system_receiver: None,
            export_status: None,
            current_screen: Screen::default(),
        }
    }
}

impl ShellboardApp {
    const SCREEN_TITLE_BOTTOM_SPACING: f32 = 18.0;
    const SCREEN_FOOTER_SPACING: f32 = 24.0;

    pub fn new(_cc: &eframe::CreationContext<'_>) -> Self {
        let _ = LOG_LINES.get_or_init(|| Mutex::new(VecDeque::new()));
        let _ = log::set_logger(&LOGGER);
        log::set_max_level(log::LevelFilter::Debug);
        log::info!("desktop started");
        Self::default()
    }

    /// Poll for probe result and optionally start a new probe. Call each frame.
    fn poll_server_probe(&mut self) {
        if let Some(rx) = &self.probe_receiver {
            match rx.try_recv() {
                Ok(result) => {
                    self.probe_completed = true;
                    self.server_responds = result.unwrap_or(false);
                    self.probe_receiver = None;
                }
                Err(mpsc::TryRecvError::Disconnected) => self.probe_receiver = None,
                Err(mpsc::TryRecvError::Empty) => {}
            }
        }
        self.frames_since_probe = self.frames_since_probe.saturating_add(1);
        if self.probe_receiver.is_none() && self.frames_since_probe >= PROBE_INTERVAL_FRAMES {
            self.frames_since_probe = 0;
            let (tx, rx) = mpsc::channel();
            std::thread::spawn(move || {
                let client = configured_client();
                let authority = client
                    .base_url()
                    .trim_start_matches("http://")
                    .to_string();
                let ok = authority
                    .to_socket_addrs()
                    .ok()
                    .and_then(|mut addrs| addrs.next())
                    .and_then(|addr| {
                        std::net::TcpStream::connect_timeout(&addr, Duration::from_millis(800)).ok()
                    })
                    .is_some();
                let _ = tx.send(Ok(ok));
            });
            self.probe_receiver = Some(rx);
        }
    }

    /// True if we started the server and it is still running (we can stop it).
    fn server_owned(&mut self) -> bool {
        if let Some(ref mut child) = self.server_process {
            if child.try_wait().ok().flatten().is_some() {
                self.server_process = None;
                return false;
            }
            return true;
        }
        false
    }

    fn start_server(&mut self) {
        self.server_error = None;
        let port = match lib::config::load_config(None) {
            Ok((config, _)) => config.server.port,
            Err(e) => {
                self.server_error = Some(format!("failed to load config: {}", e));
                return;
            }
        };
        let binary = resolve_shellboard_binary();
        let child = std::process::Command::new(&binary)
            .args(["serve", "--port", &port.to_string()])
            .env("RUST_LOG", "info")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn();
        match child {
            Ok(mut c) => {
                if let Some(stderr) = c.stderr.take() {
                    std::thread::spawn(move || {
                        for line in std::io::BufReader::new(stderr).lines().map_while(Result::ok) {
                            push_log_line(format!("[server] {}", line));
                        }
                    });
                }
                if let Some(stdout) = c.stdout.take() {
                    std::thread::spawn(move || {
                        for line in std::io::BufReader::new(stdout).lines().map_while(Result::ok) {
                            push_log_line(format!("[server] {}", line));
                        }
                    });
                }
                log::info!("started {} serve --port {}", binary.display(), port);
                self.server_process = Some(c);
            }
            Err(e) => {
                self.server_error = Some(format!("failed to start server: {}", e));
            }
        }
    }

    fn stop_server(&mut self) {
        if let Some(mut child) = self.server_process.take() {
            let _ = child.kill();
            let _ = child.wait();
            log::info!("server stopped");
        }
        self.server_error = None;
    }

    fn submit_command(&mut self) {
        if let Some(submission) = self.console.submit_command() {
            self.dispatch(submission);
        }
    }

    fn submit_script(&mut self, name: &str) {
        if let Some(submission) = self.console.submit_script(name) {
            self.dispatch(submission);
        }
    }

    fn dispatch(&mut self, submission: lib::client::Submission) {
        log::debug!("submitting {:?}", submission);
        self.reply_receiver = Some(spawn_request(move || async move {
            configured_client()
                .submit(&submission)
                .await
                .map_err(|e| e.to_string())
        }));
    }

    fn poll_reply(&mut self) {
        let Some(rx) = &self.reply_receiver else {
            return;
        };
        let result = match rx.try_recv() {
            Ok(result) => result,
            Err(mpsc::TryRecvError::Empty) => return,
            Err(mpsc::TryRecvError::Disconnected) => Err("request worker exited".to_string()),
        };
        self.reply_receiver = None;
        if let Err(e) = &result {
            log::warn!("request failed: {}", e);
        }
        self.console.complete(result);
    }

    fn refresh_system_info(&mut self) {
        if self.system_receiver.is_some() {
            return;
        }
        self.system_receiver = Some(spawn_request(|| async {
            configured_client()
                .system_info()
                .await
                .map_err(|e| e.to_string())
        }));
    }

    fn poll_system_info(&mut self) {
        let Some(rx) = &self.system_receiver else {
            return;
        };
        let result = match rx.try_recv() {
            Ok(result) => result,
            Err(mpsc::TryRecvError::Empty) => return,
            Err(mpsc::TryRecvError::Disconnected) => Err("request worker exited".to_string()),
        };
        self.system_receiver = None;
        match result {
            Ok(info) => {
                self.system_info = Some(info);
                self.system_error = None;
            }
            Err(e) => self.system_error = Some(e),
        }
    }

    fn export_log(&mut self) {
        let epoch_ms = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or(0);
        let export = self.console.export_log(epoch_ms);
        let path = export_dir().join(&export.file_name);
        self.export_status = Some(match std::fs::write(&path, export.contents) {
            Ok(()) => {
                log::info!("exported transcript to {}", path.display());
                format!("Saved {}", path.display())
            }
            Err(e) => format!("Failed to save {}: {}", path.display(), e),
        });
    }

    fn ui_console_screen(&mut self, ui: &mut egui::Ui, running: bool) {
        ui.add_space(24.0);
        ui.horizontal(|ui| {
            ui.heading("Console");
            ui.with_layout(egui::Layout::right_to_left(egui::Align::Center), |ui| {
                if ui.button("Export log").clicked() {
                    self.export_log();
                }
                if ui.button("Clear").clicked() {
                    self.console.clear();
                    self.export_status = None;
                }
            });
        });
        ui.add_space(Self::SCREEN_TITLE_BOTTOM_SPACING);

        if !running {
            ui.label("Start the server to run commands.");
            ui.add_space(8.0);
        }

        let idle = self.console.state() == ConsoleState::Idle;
        ui.horizontal_wrapped(|ui| {
            for (name, _) in SCRIPT_REGISTRY {
                if ui
                    .add_enabled(idle && running, egui::Button::new(*name))
                    .clicked()
                {
                    self.submit_script(name);
                }
            }
        });
        ui.add_space(12.0);

        let input_height = 36.0;
        let scroll_height =
            (ui.available_height() - input_height - Self::SCREEN_FOOTER_SPACING).max(80.0);
        egui::ScrollArea::vertical()
            .max_height(scroll_height)
            .stick_to_bottom(true)
            .auto_shrink([false, false])
            .show(ui, |ui| {
                for entry in self.console.transcript().entries() {
                    ui.horizontal_wrapped(|ui| {
                        ui.label(
                            egui::RichText::new(format!("[{}]", entry.timestamp))
                                .family(egui::FontFamily::Monospace)
                                .weak(),
                        );
                        ui.label(
                            egui::RichText::new(entry.text.as_str())
                                .family(egui::FontFamily::Monospace)
                                .color(entry_color(entry.kind)),
                        );
                    });
                }
                if self.console.transcript().is_empty() {
                    ui.label("No output yet.");
                }
            });

        ui.add_space(8.0);
        ui.horizontal(|ui| {
            let response = ui.add_enabled(
                idle,
                egui::TextEdit::singleline(&mut self.console.input)
                    .font(egui::TextStyle::Monospace)
                    .hint_text("ls -la")
                    .desired_width(ui.available_width() - 80.0),
            );
            let enter = response.lost_focus() && ui.input(|i| i.key_pressed(egui::Key::Enter));
            let run_clicked = ui
                .add_enabled(running && self.console.can_submit(), egui::Button::new("Run"))
                .clicked();
            if running && (enter || run_clicked) {
                self.submit_command();
                response.request_focus();
            }
        });

        if let Some(status) = &self.export_status {
            ui.add_space(6.0);
            ui.label(status.as_str());
        }
    }

    fn ui_system_screen(&mut self, ui: &mut egui::Ui, running: bool) {
        ui.add_space(24.0);
        ui.horizontal(|ui| {
            ui.heading("System");
            ui.with_layout(egui::Layout::right_to_left(egui::Align::Center), |ui| {
                if ui
                    .add_enabled(
                        running && self.system_receiver.is_none(),
                        egui::Button::new("Refresh"),
                    )
                    .clicked()
                {
                    self.refresh_system_info();
                }
            });
        });
        ui.add_space(Self::SCREEN_TITLE_BOTTOM_SPACING);

        if let Some(err) = &self.system_error {
            ui.colored_label(entry_color(EntryKind::Error), err.as_str());
            ui.add_space(8.0);
        }
        let Some(info) = &self.system_info else {
            ui.label(if running {
                "Press Refresh to load system information."
            } else {
                "Start the server to load system information."
            });
            return;
        };
        egui::Grid::new("system_info_grid")
            .num_columns(2)
            .spacing([24.0, 8.0])
            .show(ui, |ui| {
                let rows = [
                    ("Hostname", info.hostname.clone()),
                    ("Platform", info.platform.clone()),
                    ("Architecture", info.arch.clone()),
                    ("CPU", info.cpu_model.clone()),
                    ("Cores", info.cpu_cores.to_string()),
                    ("Total memory", info.total_memory.clone()),
                    ("Free memory", info.free_memory.clone()),
                    ("Uptime", info.uptime.clone()),
                ];
                for (label, value) in rows {
                    ui.label(egui::RichText::new(label).weak());
                    ui.label(value);
                    ui.end_row();
                }
            });
    }

    fn ui_logs_screen(&self, ui: &mut egui::Ui) {
        ui.add_space(24.0);
        ui.heading("Logs");
        ui.add_space(Self::SCREEN_TITLE_BOTTOM_SPACING);

        let lines: Vec<String> = log_buffer()
            .lock()
            .map(|b| b.iter().cloned().collect())
            .unwrap_or_default();

        let scroll_height = (ui.available_height() - Self::SCREEN_FOOTER_SPACING).max(0.0);
        egui::ScrollArea::vertical()
            .max_height(scroll_height)
            .stick_to_bottom(true)
            .show(ui, |ui| {
                for line in &lines {
                    ui.label(
                        egui::RichText::new(line.as_str()).family(egui::FontFamily::Monospace),
                    );
                }
                if lines.is_empty() {
                    ui.label("No log output yet.");
                }
            });
    }
}

impl eframe::App for ShellboardApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        self.poll_server_probe();
        self.poll_reply();
        self.poll_system_info();
        let owned = self.server_owned();
        let running = owned || self.server_responds;

        egui::TopBottomPanel::top("header").show(ctx, |ui| {
            egui::Frame::none()
                .inner_margin(egui::Margin::symmetric(24.0, 0.0))
                .show(ui, |ui| {
                    ui.add_space(16.0);
                    ui.horizontal(|ui| {
                        ui.heading("Shellboard");
                        ui.with_layout(egui::Layout::right_to_left(egui::Align::Center), |ui| {
                            if !self.probe_completed {
                                ui.add_enabled(false, egui::Button::new("Start server"));
                            } else if owned {
                                if ui.button("Stop server").clicked() {
                                    self.stop_server();
                                }
                            } else if running {
                                ui.add_enabled(false, egui::Button::new("Server running"));
                            } else if ui.button("Start server").clicked() {
                                self.start_server();
                            }
                            if let Some(err) = &self.server_error {
                                ui.colored_label(entry_color(EntryKind::Error), err.as_str());
                            }
                        });
                    });
                    ui.add_space(16.0);
                });
        });

        let current_screen = &mut self.current_screen;
        egui::SidePanel::left("sidebar")
            .resizable(false)
            .exact_width(140.0)
            .show(ctx, |ui| {
                egui::Frame::none()
                    .inner_margin(egui::Margin::symmetric(24.0, 0.0))
                    .show(ui, |ui| {
                        ui.add_space(24.0);
                        for (screen, label) in [
                            (Screen::Console, "Console"),
                            (Screen::System, "System"),
                            (Screen::Logs, "Logs"),
                        ] {
                            if ui.selectable_label(*current_screen == screen, label).clicked() {
                                *current_screen = screen;
                            }
                            ui.add_space(12.0);
                        }
                    });
            });

        egui::CentralPanel::default().show(ctx, |ui| {
            egui::Frame::none()
                .inner_margin(egui::Margin::symmetric(24.0, 0.0))
                .show(ui, |ui| match self.current_screen {
                    Screen::Console => self.ui_console_screen(ui, running),
                    Screen::System => self.ui_system_screen(ui, running),
                    Screen::Logs => self.ui_logs_screen(ui),
                });
        });

        // Keep polling background receivers even when there is no input.
        ctx.request_repaint_after(Duration::from_millis(100));
    }
}

impl Drop for ShellboardApp {
    fn drop(&mut self) {
        self.stop_server();
    }
}
