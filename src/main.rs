mod classifier;
mod config;
mod controller;
mod history;
mod session;
mod storage;

use iced::{
    widget::{button, column, container, row, scrollable, text, text_input, text_input::Id},
    Element, Length, Task, Theme, Subscription,
    time,
    keyboard::{self, Key},
    event::{self, Event as IcedEvent},
    alignment, Size,
    window,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::Level;

use crate::classifier::HttpClassifier;
use crate::config::Config;
use crate::controller::{Completion, RequestState};
use crate::session::Session;
use crate::storage::SqliteStorage;

const SPINNER_FRAMES: [&str; 10] = ["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"];

fn init_tracing() {
    let log_level = match std::env::var("MAILGUARD_LOG").as_deref() {
        Ok("TRACE") => Level::TRACE,
        Ok("DEBUG") => Level::DEBUG,
        Ok("WARN") => Level::WARN,
        Ok("ERROR") => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = tracing_subscriber::FmtSubscriber::builder()
        .with_max_level(log_level)
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!(
            "Initialization of tracing subscriber failed with error: {}",
            e
        );
    }
}

fn open_storage(config: &Config) -> anyhow::Result<SqliteStorage> {
    let path = config.storage_path();
    match SqliteStorage::open(&path) {
        Ok(storage) => {
            tracing::info!("history storage at {}", path.display());
            Ok(storage)
        }
        Err(e) => {
            tracing::error!(
                "Could not open {}: {}. History will not survive restart.",
                path.display(),
                e
            );
            Ok(SqliteStorage::open_in_memory()?)
        }
    }
}

fn build_session(config: &Config) -> anyhow::Result<Session<SqliteStorage>> {
    let storage = open_storage(config)?;
    let classifier = HttpClassifier::with_config(&config.classifier)?;
    tracing::info!("classifying against {}", classifier.endpoint());
    Ok(Session::new(storage, &config.storage.key, Arc::new(classifier)))
}

fn main() -> iced::Result {
    init_tracing();

    let config = Config::load();
    let session = match build_session(&config) {
        Ok(session) => session,
        Err(e) => {
            tracing::error!("Failed to start: {:#}", e);
            std::process::exit(1);
        }
    };

    iced::application("MailGuard AI", App::update, App::view)
        .theme(App::theme)
        .subscription(App::subscription)
        .window(window::Settings {
            size: Size::new(config.window.width as f32, config.window.height as f32),
            min_size: Some(Size::new(
                config.window.min_width as f32,
                config.window.min_height as f32,
            )),
            position: window::Position::Centered,
            ..Default::default()
        })
        .run_with(move || App::new(session))
}

#[derive(Debug, Clone)]
enum Message {
    InputChanged(String),
    Submit,
    Finished(Completion),
    Cancel,
    DeleteItem(usize),
    ClearHistory,
    Tick,
}

struct App {
    session: Session<SqliteStorage>,
    loading_frame: usize,
    input_id: Id,
}

impl App {
    fn new(session: Session<SqliteStorage>) -> (Self, Task<Message>) {
        let input_id = Id::unique();

        let app = App {
            session,
            loading_frame: 0,
            input_id: input_id.clone(),
        };

        (app, text_input::focus(input_id))
    }

    fn update(&mut self, message: Message) -> Task<Message> {
        match message {
            Message::InputChanged(value) => {
                self.session.set_input(value);
                Task::none()
            }
            Message::Submit => match self.session.begin_query() {
                Ok(submission) => {
                    self.loading_frame = 0;
                    Task::perform(submission.run(), Message::Finished)
                }
                Err(reason) => {
                    tracing::debug!(?reason, "submit ignored");
                    Task::none()
                }
            },
            Message::Finished(completion) => {
                if let Some(label) = self.session.complete_query(completion) {
                    tracing::debug!(%label, "displaying classification");
                }
                text_input::focus(self.input_id.clone())
            }
            Message::Cancel => {
                self.session.cancel_query();
                Task::none()
            }
            Message::DeleteItem(index) => {
                if let Err(e) = self.session.delete_history_item(index) {
                    tracing::warn!("Could not delete history item {}: {}", index, e);
                }
                Task::none()
            }
            Message::ClearHistory => {
                if let Err(e) = self.session.clear_history() {
                    tracing::warn!("Could not clear history: {}", e);
                }
                Task::none()
            }
            Message::Tick => {
                if self.session.is_pending() {
                    self.loading_frame = (self.loading_frame + 1) % SPINNER_FRAMES.len();
                }
                Task::none()
            }
        }
    }

    fn subscription(&self) -> Subscription<Message> {
        let timer = if self.session.is_pending() {
            time::every(Duration::from_millis(80)).map(|_| Message::Tick)
        } else {
            Subscription::none()
        };

        let events = event::listen_with(|event, _status, _id| {
            if let IcedEvent::Keyboard(keyboard::Event::KeyPressed {
                key: Key::Named(keyboard::key::Named::Escape),
                ..
            }) = event
            {
                Some(Message::Cancel)
            } else {
                None
            }
        });

        Subscription::batch([timer, events])
    }

    fn view_history(&self) -> Element<Message> {
        let history = self.session.history();

        let items: Element<Message> = if history.is_empty() {
            text("No search history available.").size(14).into()
        } else {
            column(history.iter().enumerate().map(|(index, record)| {
                row![
                    text(record.to_string()).size(14).width(Length::Fill),
                    button(text("×").size(14))
                        .on_press(Message::DeleteItem(index))
                        .style(button::danger)
                        .padding([2, 8]),
                ]
                .spacing(8)
                .align_y(alignment::Vertical::Center)
                .into()
            }))
            .spacing(8)
            .into()
        };

        let mut sidebar = column![
            text("Search History").size(20),
            scrollable(items).height(Length::Fill),
        ]
        .spacing(12)
        .padding(16)
        .width(Length::Fixed(280.0));

        if !history.is_empty() {
            sidebar = sidebar.push(
                button(text("Clear History").width(Length::Fill).align_x(alignment::Horizontal::Center))
                    .on_press(Message::ClearHistory)
                    .style(button::danger)
                    .width(Length::Fill)
                    .padding(10),
            );
        }

        sidebar.into()
    }

    fn view(&self) -> Element<Message> {
        let pending = self.session.is_pending();

        let input = text_input("Paste an email to classify...", self.session.input())
            .on_input(Message::InputChanged)
            .on_submit(Message::Submit)
            .padding(12)
            .size(16)
            .id(self.input_id.clone());

        let search = button(text("Search").size(16))
            .on_press_maybe((!pending).then_some(Message::Submit))
            .padding(12);

        let status: Element<Message> = if pending {
            row![
                text(SPINNER_FRAMES[self.loading_frame]).size(24),
                text("Classifying...").size(16),
                button(text("Cancel").size(14))
                    .on_press(Message::Cancel)
                    .style(button::secondary)
                    .padding([4, 10]),
            ]
            .spacing(12)
            .align_y(alignment::Vertical::Center)
            .into()
        } else if let Some(label) = self.session.current_classification() {
            text(format!("Classification: {}", label)).size(18).into()
        } else if *self.session.request_state() == RequestState::Cancelled {
            text("Request cancelled.").size(16).into()
        } else {
            text("").into()
        };

        let main_panel = container(
            column![
                text("MailGuard AI").size(36),
                text("Spam detection for your inbox").size(16),
                row![input, search].spacing(0).align_y(alignment::Vertical::Center),
                status,
            ]
            .spacing(20)
            .max_width(720.0)
            .align_x(alignment::Horizontal::Center),
        )
        .width(Length::Fill)
        .height(Length::Fill)
        .padding(32)
        .align_x(alignment::Horizontal::Center)
        .align_y(alignment::Vertical::Center);

        row![self.view_history(), main_panel].into()
    }

    fn theme(&self) -> Theme {
        Theme::TokyoNight
    }
}
