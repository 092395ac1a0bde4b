//! OnCourse Desktop: egui app state and UI.

use eframe::egui;
use lib::api::{ApiClient, PatientRecord};
use lib::auth::{self, LoginOutcome};
use lib::config::{load_config, resolve_base_url, resolve_credentials_path, Config};
use lib::conversation::{
    ChannelOptions, ConversationChannel, ConversationView, Message, NavigationChromeController,
    ViewState,
};
use lib::credentials::Credentials;
use std::cell::Cell;
use std::collections::VecDeque;
use std::path::PathBuf;
use std::rc::Rc;
use std::sync::mpsc;
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

const CHAT_INPUT_HEIGHT: f32 = 36.0;
const CHAT_MESSAGES_MIN_HEIGHT: f32 = 80.0;
const NARRATIVE_MAX_HEIGHT: f32 = 100.0;
const LOG_BUFFER_MAX_LINES: usize = 2000;
/// Keep polling the conversation while nothing else triggers a repaint.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Ring buffer of log lines for the Logs screen. Written by DesktopLogger.
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
    Login,
    Patients,
    Chat,
    Logs,
}

/// The left sidebar. Hidden while a conversation is open.
#[derive(Clone)]
struct TabBar(Rc<Cell<bool>>);

impl NavigationChromeController for TabBar {
    fn hide(&self) {
        self.0.set(false);
    }

    fn show(&self) {
        self.0.set(true);
    }
}

enum AuthReply {
    StoredLogin(Option<Credentials>),
    Login(LoginOutcome),
    Registered(Credentials),
}

#[derive(Default)]
struct LoginForm {
    email: String,
    password: String,
    error: Option<String>,
    /// Set after a login attempt for an unknown email; offers registration.
    offer_register: bool,
}

pub struct OnCourseApp {
    /// Open conversation. Declared before the runtime so it shuts down first.
    chat: Option<ConversationView<TabBar>>,
    /// Error from opening a conversation (e.g. missing login).
    chat_error: Option<String>,
    runtime: tokio::runtime::Runtime,
    config: Config,
    credentials_path: PathBuf,
    api: ApiClient,
    current_screen: Screen,
    /// Sidebar visibility, driven by the conversation view.
    tab_bar: Rc<Cell<bool>>,
    user: Option<Credentials>,
    login: LoginForm,
    /// When Some, a login / register / stored-login check is in flight.
    auth_receiver: Option<mpsc::Receiver<Result<AuthReply, String>>>,
    patients: Vec<PatientRecord>,
    patients_error: Option<String>,
    /// When Some, the patient list is loading.
    patients_receiver: Option<mpsc::Receiver<Result<Vec<PatientRecord>, String>>>,
}

impl OnCourseApp {
    /// Space between the main screen title and the content below.
    const SCREEN_TITLE_BOTTOM_SPACING: f32 = 18.0;
    /// Space between the bottom of the content and the window edge.
    const SCREEN_FOOTER_SPACING: f32 = 48.0;

    pub fn new(_cc: &eframe::CreationContext<'_>, runtime: tokio::runtime::Runtime) -> Self {
        let _ = log::set_logger(&LOGGER);
        log::set_max_level(log::LevelFilter::Debug);
        log::info!("desktop started");

        let config = match load_config(None) {
            Ok((config, path)) => {
                log::info!("loaded config from {}", path.display());
                config
            }
            Err(e) => {
                log::error!("config: {:#}; using defaults", e);
                Config::default()
            }
        };
        let mut app = Self {
            chat: None,
            chat_error: None,
            runtime,
            credentials_path: resolve_credentials_path(&config),
            api: ApiClient::new(resolve_base_url(&config)),
            config,
            current_screen: Screen::default(),
            tab_bar: Rc::new(Cell::new(true)),
            user: None,
            login: LoginForm::default(),
            auth_receiver: None,
            patients: Vec::new(),
            patients_error: None,
            patients_receiver: None,
        };
        app.check_stored_login();
        app
    }

    fn check_stored_login(&mut self) {
        let api = self.api.clone();
        let path = self.credentials_path.clone();
        self.spawn_auth(async move {
            auth::check_stored_login(&api, &path)
                .await
                .map(AuthReply::StoredLogin)
        });
    }

    fn start_login(&mut self) {
        let api = self.api.clone();
        let path = self.credentials_path.clone();
        let (email, password) = (self.login.email.clone(), self.login.password.clone());
        self.spawn_auth(async move {
            auth::login(&api, &path, &email, &password)
                .await
                .map(AuthReply::Login)
        });
    }

    fn start_register(&mut self) {
        let api = self.api.clone();
        let path = self.credentials_path.clone();
        let (email, password) = (self.login.email.clone(), self.login.password.clone());
        self.spawn_auth(async move {
            auth::register(&api, &path, &email, &password)
                .await
                .map(AuthReply::Registered)
        });
    }

    fn spawn_auth<F>(&mut self, work: F)
    where
        F: std::future::Future<Output = Result<AuthReply, auth::AuthError>> + Send + 'static,
    {
        let (tx, rx) = mpsc::channel();
        self.login.error = None;
        self.runtime.spawn(async move {
            let _ = tx.send(work.await.map_err(|e| e.to_string()));
        });
        self.auth_receiver = Some(rx);
    }

    fn poll_auth(&mut self) {
        let Some(rx) = &self.auth_receiver else {
            return;
        };
        let reply = match rx.try_recv() {
            Ok(reply) => reply,
            Err(mpsc::TryRecvError::Empty) => return,
            Err(mpsc::TryRecvError::Disconnected) => Err("login task ended".to_string()),
        };
        self.auth_receiver = None;
        match reply {
            Ok(AuthReply::StoredLogin(Some(creds)))
            | Ok(AuthReply::Login(LoginOutcome::LoggedIn(creds)))
            | Ok(AuthReply::Registered(creds)) => self.logged_in(creds),
            Ok(AuthReply::StoredLogin(None)) => {}
            Ok(AuthReply::Login(LoginOutcome::WrongPassword)) => {
                self.login.error = Some("Incorrect password.".to_string());
            }
            Ok(AuthReply::Login(LoginOutcome::NotRegistered)) => {
                self.login.error = Some(format!(
                    "No account for {}. Register it?",
                    self.login.email.trim()
                ));
                self.login.offer_register = true;
            }
            Err(e) => {
                log::error!("login: {}", e);
                self.login.error = Some(e);
            }
        }
    }

    fn logged_in(&mut self, creds: Credentials) {
        log::info!("signed in as {}", creds.user_email);
        self.user = Some(creds);
        self.login = LoginForm::default();
        self.current_screen = Screen::Patients;
        self.refresh_patients();
    }

    fn logout(&mut self) {
        self.close_chat();
        if let Err(e) = auth::logout(&self.credentials_path) {
            log::error!("logout: {}", e);
        }
        self.user = None;
        self.patients.clear();
        self.current_screen = Screen::Login;
    }

    fn refresh_patients(&mut self) {
        let api = self.api.clone();
        let (tx, rx) = mpsc::channel();
        self.patients_error = None;
        self.runtime.spawn(async move {
            let _ = tx.send(api.list_patients().await.map_err(|e| e.to_string()));
        });
        self.patients_receiver = Some(rx);
    }

    fn poll_patients(&mut self) {
        let Some(rx) = &self.patients_receiver else {
            return;
        };
        let result = match rx.try_recv() {
            Ok(result) => result,
            Err(mpsc::TryRecvError::Empty) => return,
            Err(mpsc::TryRecvError::Disconnected) => Err("patient list task ended".to_string()),
        };
        self.patients_receiver = None;
        match result {
            Ok(patients) => self.patients = patients,
            Err(e) => {
                log::error!("error fetching patients: {}", e);
                self.patients_error = Some(e);
            }
        }
    }

    fn open_chat(&mut self, patient_id: u64) {
        self.close_chat();
        self.chat_error = None;
        let Some(creds) = self.user.as_ref().filter(|c| c.is_complete()) else {
            self.chat_error = Some("Log in to start an interview.".to_string());
            return;
        };
        let opened = creds
            .session_identity(patient_id)
            .map_err(|e| e.to_string())
            .and_then(|identity| {
                ConversationChannel::open(
                    identity,
                    Arc::new(self.api.clone()),
                    ChannelOptions::from_config(&self.config),
                    self.runtime.handle().clone(),
                )
                .map_err(|e| e.to_string())
            });
        match opened {
            Ok(channel) => {
                let mut view = ConversationView::new(channel, TabBar(self.tab_bar.clone()));
                view.mount();
                self.chat = Some(view);
                self.current_screen = Screen::Chat;
            }
            Err(e) => {
                log::error!("could not open conversation: {}", e);
                self.chat_error = Some(e);
            }
        }
    }

    fn close_chat(&mut self) {
        if let Some(mut view) = self.chat.take() {
            view.close();
        }
        if self.current_screen == Screen::Chat {
            self.current_screen = Screen::Patients;
        }
    }

    fn ui_login_screen(&mut self, ui: &mut egui::Ui) {
        ui.add_space(24.0);
        ui.heading("Log in");
        ui.add_space(Self::SCREEN_TITLE_BOTTOM_SPACING);

        let busy = self.auth_receiver.is_some();
        let mut submit = false;
        egui::Grid::new("login_form")
            .num_columns(2)
            .spacing([12.0, 8.0])
            .show(ui, |ui| {
                ui.label("Email");
                let email = ui.add_enabled(
                    !busy,
                    egui::TextEdit::singleline(&mut self.login.email).desired_width(280.0),
                );
                if email.changed() {
                    self.login.offer_register = false;
                }
                ui.end_row();
                ui.label("Password");
                let password = ui.add_enabled(
                    !busy,
                    egui::TextEdit::singleline(&mut self.login.password)
                        .password(true)
                        .desired_width(280.0),
                );
                if password.lost_focus() && ui.input(|i| i.key_pressed(egui::Key::Enter)) {
                    submit = true;
                }
                ui.end_row();
            });
        ui.add_space(12.0);
        ui.horizontal(|ui| {
            if ui.add_enabled(!busy, egui::Button::new("Log in")).clicked() {
                submit = true;
            }
            if self.login.offer_register
                && ui.add_enabled(!busy, egui::Button::new("Register")).clicked()
            {
                self.start_register();
            }
            if busy {
                ui.spinner();
            }
        });
        if submit && !busy {
            self.start_login();
        }
        if let Some(ref err) = self.login.error {
            ui.add_space(8.0);
            ui.colored_label(egui::Color32::RED, err);
        }
    }

    fn ui_patients_screen(&mut self, ui: &mut egui::Ui) {
        ui.add_space(24.0);
        ui.horizontal(|ui| {
            ui.heading("Patients");
            ui.with_layout(egui::Layout::right_to_left(egui::Align::Center), |ui| {
                if ui.button("Log out").clicked() {
                    self.logout();
                }
                if ui
                    .add_enabled(self.patients_receiver.is_none(), egui::Button::new("Refresh"))
                    .clicked()
                {
                    self.refresh_patients();
                }
            });
        });
        ui.add_space(Self::SCREEN_TITLE_BOTTOM_SPACING);

        if let Some(ref user) = self.user {
            ui.label(format!("Signed in as {}", user.user_email));
            ui.add_space(8.0);
        }
        if self.patients_receiver.is_some() {
            ui.spinner();
        }
        for err in self.patients_error.iter().chain(self.chat_error.iter()) {
            ui.colored_label(egui::Color32::RED, err);
        }

        let mut open = None;
        egui::ScrollArea::vertical().show(ui, |ui| {
            for p in &self.patients {
                egui::Frame::group(ui.style()).show(ui, |ui| {
                    ui.set_width(ui.available_width());
                    ui.horizontal(|ui| {
                        ui.vertical(|ui| {
                            ui.label(egui::RichText::new(&p.name).strong());
                            for (label, value) in p.card_fields() {
                                ui.label(
                                    egui::RichText::new(format!("{}: {}", label, value)).weak(),
                                );
                            }
                        });
                        ui.with_layout(egui::Layout::right_to_left(egui::Align::Center), |ui| {
                            if ui.button("Interview").clicked() {
                                open = Some(p.id);
                            }
                        });
                    });
                });
                ui.add_space(8.0);
            }
            if self.patients.is_empty() && self.patients_receiver.is_none() {
                ui.label("No patients available.");
            }
        });
        if let Some(id) = open {
            self.open_chat(id);
        }
    }

    /// Renders one transcript entry: user turns strong on the extreme background, patient turns plain.
    fn render_chat_message(ui: &mut egui::Ui, m: &Message) {
        let is_user = m.is_user();
        let frame = egui::Frame::none()
            .fill(if is_user {
                ui.style().visuals.extreme_bg_color
            } else {
                ui.style().visuals.panel_fill
            })
            .stroke(egui::Stroke::new(
                1.0,
                ui.style().visuals.widgets.noninteractive.bg_stroke.color,
            ))
            .rounding(egui::Rounding::same(8.0))
            .inner_margin(egui::Margin::same(8.0));

        let layout = if is_user {
            egui::Layout::top_down(egui::Align::Max)
        } else {
            egui::Layout::top_down(egui::Align::Min)
        };
        ui.with_layout(layout, |ui| {
            frame.show(ui, |ui| {
                ui.set_max_width(ui.available_width() * 0.8);
                ui.label(
                    egui::RichText::new(format!(
                        "{} · {}",
                        if is_user { "You" } else { "Patient" },
                        m.created_at().with_timezone(&chrono::Local).format("%H:%M")
                    ))
                    .small()
                    .weak(),
                );
                if is_user {
                    ui.label(egui::RichText::new(m.text()).strong());
                } else {
                    ui.label(m.text());
                }
            });
        });
    }

    /// Render the open conversation. Returns false when the user closed it.
    fn ui_chat(ui: &mut egui::Ui, view: &mut ConversationView<TabBar>) -> bool {
        let state = view.state();

        ui.add_space(24.0);
        let mut keep_open = true;
        ui.horizontal(|ui| {
            ui.heading(view.header().unwrap_or_else(|| "Loading patient…".to_string()));
            ui.with_layout(egui::Layout::right_to_left(egui::Align::Center), |ui| {
                if ui.button("✕").on_hover_text("End interview").clicked() {
                    keep_open = false;
                }
            });
        });
        if !keep_open {
            return false;
        }
        ui.add_space(Self::SCREEN_TITLE_BOTTOM_SPACING);

        if state.is_blocking() {
            ui.vertical_centered(|ui| {
                ui.add_space(48.0);
                ui.add(egui::Spinner::new().size(32.0));
                ui.add_space(12.0);
                match &state {
                    ViewState::Degraded { reason, .. } => {
                        ui.colored_label(egui::Color32::YELLOW, reason);
                    }
                    _ => {
                        ui.label("Connecting…");
                    }
                }
            });
            return true;
        }
        if let ViewState::Degraded { reason, .. } = &state {
            ui.colored_label(egui::Color32::YELLOW, format!("⚠ {}", reason));
            ui.add_space(8.0);
        }

        if let Some(narrative) = view.narrative().map(str::to_string) {
            egui::CollapsingHeader::new("Patient details")
                .default_open(true)
                .show(ui, |ui| {
                    egui::ScrollArea::vertical()
                        .id_source("narrative")
                        .max_height(NARRATIVE_MAX_HEIGHT)
                        .show(ui, |ui| {
                            ui.label(narrative);
                        });
                });
            ui.add_space(8.0);
        }

        let row_height = ui.spacing().interact_size.y + 8.0;
        let bottom_section_height = CHAT_INPUT_HEIGHT + row_height + Self::SCREEN_FOOTER_SPACING;
        let messages_height =
            (ui.available_height() - bottom_section_height).max(CHAT_MESSAGES_MIN_HEIGHT);

        let scroll_to_latest = view.take_scroll_request();
        let output = egui::ScrollArea::vertical()
            .id_source("transcript")
            .max_height(messages_height)
            .auto_shrink([false, false])
            .stick_to_bottom(true)
            .show(ui, |ui| {
                for m in view.channel().transcript() {
                    Self::render_chat_message(ui, m);
                    ui.add_space(8.0);
                }
                if scroll_to_latest {
                    ui.scroll_to_cursor(Some(egui::Align::BOTTOM));
                }
            });
        view.on_content_height(output.content_size.y);

        ui.add_space(8.0);
        let mut send_now = false;
        ui.horizontal(|ui| {
            let send_width = 80.0;
            let input = ui.add_sized(
                [ui.available_width() - send_width - 8.0, CHAT_INPUT_HEIGHT],
                egui::TextEdit::singleline(view.input_mut()).hint_text("Ask the patient…"),
            );
            view.on_input_focus(input.has_focus());
            if input.lost_focus() && ui.input(|i| i.key_pressed(egui::Key::Enter)) {
                send_now = true;
                input.request_focus();
            }
            if ui
                .add_sized([send_width, CHAT_INPUT_HEIGHT], egui::Button::new("Send"))
                .clicked()
            {
                send_now = true;
            }
        });
        if send_now {
            view.submit();
        }
        ui.add_space(Self::SCREEN_FOOTER_SPACING);
        true
    }

    fn ui_logs_screen(&self, ui: &mut egui::Ui) {
        ui.add_space(24.0);
        ui.heading("Logs");
        ui.add_space(Self::SCREEN_TITLE_BOTTOM_SPACING);

        let lines: Vec<String> = log_buffer()
            .lock()
            .map(|b| b.iter().cloned().collect())
            .unwrap_or_default();

        let available = ui.available_height();
        let scroll_height = (available - Self::SCREEN_FOOTER_SPACING).max(0.0);
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
        ui.add_space(Self::SCREEN_FOOTER_SPACING);
    }
}

impl eframe::App for OnCourseApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        self.poll_auth();
        self.poll_patients();
        if let Some(view) = self.chat.as_mut() {
            view.poll();
        }
        if self.chat.is_some() || self.auth_receiver.is_some() || self.patients_receiver.is_some() {
            ctx.request_repaint_after(POLL_INTERVAL);
        }

        egui::TopBottomPanel::top("header").show(ctx, |ui| {
            egui::Frame::none()
                .inner_margin(egui::Margin::symmetric(24.0, 0.0))
                .show(ui, |ui| {
                    ui.add_space(16.0);
                    ui.horizontal(|ui| {
                        ui.heading("OnCourse");
                        ui.with_layout(egui::Layout::right_to_left(egui::Align::Center), |ui| {
                            if let Some(ref user) = self.user {
                                ui.label(&user.user_email);
                            }
                        });
                    });
                    ui.add_space(16.0);
                });
        });

        if self.tab_bar.get() {
            let logged_in = self.user.is_some();
            let current_screen = &mut self.current_screen;
            egui::SidePanel::left("sidebar")
                .resizable(false)
                .exact_width(140.0)
                .show(ctx, |ui| {
                    egui::Frame::none()
                        .inner_margin(egui::Margin::symmetric(24.0, 0.0))
                        .show(ui, |ui| {
                            ui.add_space(24.0);
                            let home = if logged_in { Screen::Patients } else { Screen::Login };
                            let label = if logged_in { "Patients" } else { "Log in" };
                            if ui.selectable_label(*current_screen == home, label).clicked() {
                                *current_screen = home;
                            }
                            ui.add_space(12.0);
                            if ui.selectable_label(*current_screen == Screen::Logs, "Logs").clicked() {
                                *current_screen = Screen::Logs;
                            }
                        });
                });
        }

        egui::CentralPanel::default().show(ctx, |ui| {
            egui::Frame::none()
                .inner_margin(egui::Margin::symmetric(24.0, 0.0))
                .show(ui, |ui| match self.current_screen {
                    Screen::Login => self.ui_login_screen(ui),
                    Screen::Patients => self.ui_patients_screen(ui),
                    Screen::Logs => self.ui_logs_screen(ui),
                    Screen::Chat => {
                        let keep_open = match self.chat.as_mut() {
                            Some(view) => Self::ui_chat(ui, view),
                            None => false,
                        };
                        if !keep_open {
                            self.close_chat();
                        }
                    }
                });
        });
    }
}
