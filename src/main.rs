mod attachment;
mod config;
mod conversation;
mod geometry;
mod gesture;
mod health;
mod local;
mod panel;
mod remote;
mod reveal;
mod store;

use chrono::TimeZone;
use iced::{
    alignment::{Horizontal, Vertical},
    event::{self, Event as IcedEvent},
    keyboard::{self, Key},
    mouse,
    widget::{
        button, column, container, mouse_area, row, scrollable, stack, text, text_input, Column,
        Space,
    },
    time, window, Border, Color, Element, Length, Padding, Point, Size, Subscription, Task, Theme,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, warn};
use tracing_subscriber::EnvFilter;

use attachment::{Attachment, AttachmentKind};
use conversation::{Message as ChatMessage, Mode, Role, TurnResponse};
use geometry::{GestureKind, ResizeDirection};
use gesture::PointerEvent;
use health::ConnectionStatus;
use panel::{Effect, Panel};
use remote::{RemoteClient, RemoteError};
use store::PanelStore;

const HANDLE_THICKNESS: f32 = 6.0;
const CORNER_SIZE: f32 = 16.0;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("ASSISTANT_PANEL_LOG")
                .unwrap_or_else(|_| EnvFilter::new("assistant_panel=info")),
        )
        .init();

    let config = config::Config::load();

    let db_path = config::Config::state_db_path();
    let store = PanelStore::open(&db_path).or_else(|e| {
        warn!(
            "Could not open {}: {:#}. Panel state will not persist.",
            db_path.display(),
            e
        );
        PanelStore::open_in_memory()
    })?;

    let window = window::Settings {
        size: Size::new(config.window.width as f32, config.window.height as f32),
        position: window::Position::Centered,
        exit_on_close_request: false,
        ..Default::default()
    };

    iced::application("Assistant Panel", App::update, App::view)
        .theme(App::theme)
        .subscription(App::subscription)
        .window(window)
        .run_with(move || App::new(config, store))?;

    Ok(())
}

#[derive(Debug, Clone)]
enum Message {
    TogglePanel,
    ClosePanel,
    InputChanged(String),
    Submit,
    TurnFinished(TurnResponse),
    RetryConnection,
    ProbeFinished(Result<(), RemoteError>),
    ToggleMode,
    SwitchToLocal,
    ClearRequested,
    ClearConfirmed,
    ClearDismissed,
    ToggleAttachMenu,
    Attach(AttachmentKind),
    Attached(Vec<Attachment>),
    RemoveAttachment(usize),
    BeginGesture(GestureKind),
    Pointer(PointerEvent),
    CursorMoved(Point),
    ViewportResized(Size),
    ToggleMaximize,
    RevealTick,
    CloseRequested,
}

struct App {
    panel: Panel,
    client: Option<Arc<RemoteClient>>,
    cursor: Point,
    tick: Duration,
    confirm_clear: bool,
    show_attach_menu: bool,
    input_id: text_input::Id,
    scroll_id: scrollable::Id,
}

impl App {
    fn new(config: config::Config, store: PanelStore) -> (Self, Task<Message>) {
        let client = match RemoteClient::with_config(&config.remote) {
            Ok(client) => Some(Arc::new(client)),
            Err(e) => {
                error!("remote client unavailable: {:#}", e);
                None
            }
        };

        let mut app = App {
            panel: Panel::load(store, &config),
            client,
            cursor: Point::ORIGIN,
            tick: Duration::from_millis(config.reveal.tick_ms.max(1)),
            confirm_clear: false,
            show_attach_menu: false,
            input_id: text_input::Id::unique(),
            scroll_id: scrollable::Id::unique(),
        };

        let probe = app
            .panel
            .request_probe()
            .map(|effect| app.perform(effect))
            .unwrap_or_else(Task::none);
        let viewport = window::get_latest()
            .and_then(window::get_size)
            .map(Message::ViewportResized);

        (app, Task::batch([probe, viewport]))
    }

    fn perform(&self, effect: Effect) -> Task<Message> {
        let client = self.client.clone();
        match effect {
            Effect::Probe => Task::perform(
                async move {
                    match client {
                        Some(client) => client.probe().await,
                        None => Err(RemoteError::Other("HTTP client unavailable".to_string())),
                    }
                },
                Message::ProbeFinished,
            ),
            Effect::Remote(request) => match client {
                Some(client) => Task::perform(request.run(client), Message::TurnFinished),
                None => Task::done(Message::TurnFinished(TurnResponse {
                    turn: request.turn,
                    recovered: false,
                    result: Err(RemoteError::Other("HTTP client unavailable".to_string())),
                })),
            },
            Effect::Local { turn, query } => {
                Task::perform(local::respond(turn, query), Message::TurnFinished)
            }
        }
    }

    /// Closing drops any half-finished prompt along with the panel.
    fn close_panel(&mut self) {
        self.panel.close();
        self.confirm_clear = false;
        self.show_attach_menu = false;
    }

    fn scroll_to_end(&self) -> Task<Message> {
        scrollable::snap_to(self.scroll_id.clone(), scrollable::RelativeOffset::END)
    }

    fn update(&mut self, message: Message) -> Task<Message> {
        match message {
            Message::TogglePanel => {
                if self.panel.is_open() {
                    self.close_panel();
                    Task::none()
                } else {
                    self.panel.open();
                    Task::batch([text_input::focus(self.input_id.clone()), self.scroll_to_end()])
                }
            }
            Message::ClosePanel => {
                self.close_panel();
                Task::none()
            }
            Message::InputChanged(value) => {
                self.panel.set_input(value);
                Task::none()
            }
            Message::Submit => match self.panel.submit() {
                Some(effect) => Task::batch([self.perform(effect), self.scroll_to_end()]),
                None => Task::none(),
            },
            Message::TurnFinished(response) => {
                self.panel.turn_finished(response);
                self.scroll_to_end()
            }
            Message::RetryConnection => self
                .panel
                .request_probe()
                .map(|effect| self.perform(effect))
                .unwrap_or_else(Task::none),
            Message::ProbeFinished(result) => {
                self.panel.probe_finished(result);
                Task::none()
            }
            Message::ToggleMode => {
                self.panel.toggle_mode();
                Task::none()
            }
            Message::SwitchToLocal => {
                self.panel.set_mode(Mode::Local);
                Task::none()
            }
            Message::ClearRequested => {
                self.confirm_clear = true;
                Task::none()
            }
            Message::ClearConfirmed => {
                self.confirm_clear = false;
                self.panel.clear_history();
                Task::none()
            }
            Message::ClearDismissed => {
                self.confirm_clear = false;
                Task::none()
            }
            Message::ToggleAttachMenu => {
                self.show_attach_menu = !self.show_attach_menu;
                Task::none()
            }
            Message::Attach(kind) => {
                self.show_attach_menu = false;
                Task::perform(attachment::pick(kind), Message::Attached)
            }
            Message::Attached(attachments) => {
                self.panel.attach(attachments);
                Task::none()
            }
            Message::RemoveAttachment(index) => {
                self.panel.remove_attachment(index);
                Task::none()
            }
            Message::BeginGesture(kind) => {
                self.panel.begin_gesture(kind, self.cursor);
                Task::none()
            }
            Message::Pointer(event) => {
                self.panel.pointer(event);
                Task::none()
            }
            Message::CursorMoved(position) => {
                self.cursor = position;
                Task::none()
            }
            Message::ViewportResized(size) => {
                self.panel.set_viewport(size);
                Task::none()
            }
            Message::ToggleMaximize => {
                self.panel.toggle_maximize();
                Task::none()
            }
            Message::RevealTick => {
                self.panel.tick();
                self.scroll_to_end()
            }
            Message::CloseRequested => {
                self.panel.flush();
                iced::exit()
            }
        }
    }

    fn subscription(&self) -> Subscription<Message> {
        let reveal = if self.panel.is_revealing() {
            time::every(self.tick).map(|_| Message::RevealTick)
        } else {
            Subscription::none()
        };

        let gesture = if self.panel.gesture_active() {
            event::listen_with(gesture_events)
        } else {
            Subscription::none()
        };

        Subscription::batch([reveal, gesture, event::listen_with(app_events)])
    }

    fn view(&self) -> Element<Message> {
        let launcher = container(
            button(text("AI").size(18))
                .on_press(Message::TogglePanel)
                .padding(14),
        )
        .width(Length::Fill)
        .height(Length::Fill)
        .align_x(Horizontal::Right)
        .align_y(Vertical::Bottom)
        .padding(24);

        let mut layers = stack![
            container(Space::new(Length::Fill, Length::Fill))
                .width(Length::Fill)
                .height(Length::Fill),
            launcher
        ];

        if self.panel.is_open() {
            let position = self.panel.geometry().position;
            layers = layers.push(
                container(self.panel_view())
                    .width(Length::Fill)
                    .height(Length::Fill)
                    .align_x(Horizontal::Right)
                    .align_y(Vertical::Bottom)
                    .padding(Padding {
                        top: 0.0,
                        right: position.right,
                        bottom: position.bottom,
                        left: 0.0,
                    }),
            );
        }

        layers.into()
    }

    fn panel_view(&self) -> Element<Message> {
        let size = self.panel.geometry().size;

        let mut body = column![self.header()].spacing(0);
        if self.confirm_clear {
            body = body.push(self.clear_prompt());
        }
        body = body.push(self.messages_view());
        if !self.panel.pending().is_empty() {
            body = body.push(self.pending_view());
        }
        body = body.push(self.input_view());

        let frame = container(body)
            .width(Length::Fixed(size.width))
            .height(Length::Fixed(size.height))
            .style(panel_style);

        if self.panel.geometry().is_maximized() {
            frame.into()
        } else {
            stack![frame, resize_handles(size)].into()
        }
    }

    fn header(&self) -> Element<Message> {
        let mode = self.panel.mode();
        let status = self.panel.status();
        let (label, color) = match (mode, status) {
            (Mode::Local, _) => ("Local knowledge", GREEN),
            (Mode::Remote, ConnectionStatus::Online) => ("Online AI service", GREEN),
            (Mode::Remote, ConnectionStatus::Offline) => ("AI service unavailable", RED),
            (Mode::Remote, ConnectionStatus::Unknown) => ("Status unknown", YELLOW),
        };

        let mut status_row = row![text("●").size(10).color(color), text(label).size(12).color(color)]
            .spacing(6)
            .align_y(Vertical::Center);
        if mode == Mode::Remote && status != ConnectionStatus::Online {
            let retry = if self.panel.is_probing() { "…" } else { "↻" };
            status_row = status_row.push(
                button(text(retry).size(12))
                    .on_press_maybe((!self.panel.is_probing()).then_some(Message::RetryConnection))
                    .padding(2)
                    .style(button::text),
            );
        }

        let busy = self.panel.is_busy();
        let mode_label = match mode {
            Mode::Remote => "Use local",
            Mode::Local => "Use online",
        };
        let maximize_label = if self.panel.geometry().is_maximized() {
            "Restore"
        } else {
            "Maximize"
        };

        let controls = row![
            header_button(mode_label, (!busy).then_some(Message::ToggleMode)),
            header_button("Clear", Some(Message::ClearRequested)),
            header_button(maximize_label, Some(Message::ToggleMaximize)),
            header_button("✕", Some(Message::ClosePanel)),
        ]
        .spacing(4)
        .align_y(Vertical::Center);

        let content = row![
            column![text("Xiao IN Assistant").size(18), status_row].spacing(2),
            Space::with_width(Length::Fill),
            controls
        ]
        .align_y(Vertical::Center)
        .padding(12);

        mouse_area(content)
            .on_press(Message::BeginGesture(GestureKind::Drag))
            .interaction(match self.panel.gesture_kind() {
                _ if self.panel.geometry().is_maximized() => mouse::Interaction::Idle,
                Some(GestureKind::Drag) => mouse::Interaction::Grabbing,
                _ => mouse::Interaction::Grab,
            })
            .into()
    }

    fn clear_prompt(&self) -> Element<Message> {
        container(
            row![
                text("Clear the whole chat history?").size(13),
                Space::with_width(Length::Fill),
                button(text("Clear").size(13)).on_press(Message::ClearConfirmed),
                button(text("Cancel").size(13))
                    .on_press(Message::ClearDismissed)
                    .style(button::secondary),
            ]
            .spacing(8)
            .align_y(Vertical::Center),
        )
        .padding(Padding::from([6, 12]))
        .into()
    }

    fn messages_view(&self) -> Element<Message> {
        let mode = self.panel.mode();
        let mut list = Column::new().spacing(12).padding(16);

        if mode == Mode::Remote && self.panel.status() == ConnectionStatus::Offline {
            list = list.push(self.offline_banner());
        }

        if self.panel.messages().is_empty() && !self.panel.is_busy() {
            if mode == Mode::Local {
                list = list.push(
                    container(
                        column![
                            text("Local knowledge mode").size(14),
                            text("Answers come from stored reference material; the online AI service is not contacted.")
                                .size(12),
                        ]
                        .spacing(4),
                    )
                    .padding(10)
                    .style(container::rounded_box),
                );
            }
            list = list.push(
                container(text("Hello, I'm Xiao IN. How can I help you?").size(15))
                    .width(Length::Fill)
                    .align_x(Horizontal::Center)
                    .padding(40),
            );
        }

        let bubble_width = self.panel.geometry().size.width * 0.8;
        for message in self.panel.messages() {
            list = list.push(message_view(message, bubble_width));
        }

        if let Some(partial) = self.panel.revealing_text() {
            list = list.push(
                container(
                    container(text(format!("{partial}▍")).size(15))
                        .padding(10)
                        .max_width(bubble_width)
                        .style(container::rounded_box),
                )
                .width(Length::Fill)
                .align_x(Horizontal::Left),
            );
        } else if self.panel.is_busy() {
            list = list.push(text("Thinking…").size(13));
        }

        scrollable(list)
            .id(self.scroll_id.clone())
            .height(Length::Fill)
            .into()
    }

    fn offline_banner(&self) -> Element<Message> {
        let retry_label = if self.panel.is_probing() {
            "Retrying…"
        } else {
            "Retry connection"
        };
        container(
            column![
                text("AI service connection problem").size(14).color(RED),
                text("Unable to reach the AI server. Please check your network connection or try again later.")
                    .size(12),
                row![
                    button(text(retry_label).size(12))
                        .on_press_maybe((!self.panel.is_probing()).then_some(Message::RetryConnection)),
                    button(text("Switch to local knowledge").size(12))
                        .on_press(Message::SwitchToLocal)
                        .style(button::secondary),
                ]
                .spacing(8),
            ]
            .spacing(6),
        )
        .padding(10)
        .width(Length::Fill)
        .style(container::rounded_box)
        .into()
    }

    fn pending_view(&self) -> Element<Message> {
        let items = self
            .panel
            .pending()
            .iter()
            .enumerate()
            .map(|(index, attachment)| {
                row![
                    text(attachment_label(attachment)).size(12),
                    button(text("✕").size(11))
                        .on_press(Message::RemoveAttachment(index))
                        .padding(2)
                        .style(button::text),
                ]
                .spacing(4)
                .align_y(Vertical::Center)
                .into()
            });

        container(Column::with_children(items).spacing(4))
            .padding(Padding::from([6, 16]))
            .into()
    }

    fn input_view(&self) -> Element<Message> {
        let busy = self.panel.is_busy();

        let mut input = text_input("Ask a question...", self.panel.input())
            .id(self.input_id.clone())
            .padding(10)
            .size(15);
        if !busy {
            input = input
                .on_input(Message::InputChanged)
                .on_submit(Message::Submit);
        }

        let mut controls = column![row![
            button(text("+").size(16)).on_press(Message::ToggleAttachMenu),
            input,
            button(text("Send").size(14)).on_press_maybe((!busy).then_some(Message::Submit)),
        ]
        .spacing(8)
        .align_y(Vertical::Center)]
        .spacing(6);

        if self.show_attach_menu {
            controls = controls.push(
                row![
                    button(text("Image").size(12))
                        .on_press(Message::Attach(AttachmentKind::Image))
                        .style(button::secondary),
                    button(text("File").size(12))
                        .on_press(Message::Attach(AttachmentKind::File))
                        .style(button::secondary),
                ]
                .spacing(6),
            );
        }

        container(controls).padding(12).into()
    }

    fn theme(&self) -> Theme {
        Theme::TokyoNight
    }
}

const GREEN: Color = Color::from_rgb(0.3, 0.8, 0.45);
const RED: Color = Color::from_rgb(0.95, 0.4, 0.4);
const YELLOW: Color = Color::from_rgb(0.95, 0.8, 0.3);

fn gesture_events(event: IcedEvent, _status: event::Status, _id: window::Id) -> Option<Message> {
    gesture::pointer_event(&event).map(Message::Pointer)
}

fn app_events(event: IcedEvent, _status: event::Status, _id: window::Id) -> Option<Message> {
    match event {
        IcedEvent::Mouse(mouse::Event::CursorMoved { position }) => Some(Message::CursorMoved(position)),
        IcedEvent::Window(window::Event::Resized(size)) => Some(Message::ViewportResized(size)),
        IcedEvent::Window(window::Event::CloseRequested) => Some(Message::CloseRequested),
        IcedEvent::Keyboard(keyboard::Event::KeyPressed {
            key: Key::Named(keyboard::key::Named::Escape),
            ..
        }) => Some(Message::ClosePanel),
        _ => None,
    }
}

fn header_button(label: &str, on_press: Option<Message>) -> Element<'_, Message> {
    button(text(label).size(12))
        .on_press_maybe(on_press)
        .padding(Padding::from([4, 8]))
        .style(button::text)
        .into()
}

fn attachment_label(attachment: &Attachment) -> String {
    let icon = match attachment.kind {
        AttachmentKind::Image => "🖼",
        AttachmentKind::File => "📎",
    };
    format!(
        "{} {} ({} KB)",
        icon,
        attachment.name,
        attachment.byte_len().div_ceil(1024)
    )
}

fn format_time(timestamp: i64) -> String {
    chrono::Local
        .timestamp_millis_opt(timestamp)
        .single()
        .map(|time| time.format("%H:%M:%S").to_string())
        .unwrap_or_default()
}

fn message_view(message: &ChatMessage, max_width: f32) -> Element<'_, Message> {
    let mut bubble = Column::new().spacing(6);
    if !message.text.is_empty() {
        bubble = bubble.push(text(&message.text).size(15));
    }
    for attachment in &message.attachments {
        bubble = bubble.push(text(attachment_label(attachment)).size(12));
    }
    bubble = bubble.push(text(format_time(message.timestamp)).size(10));

    let align = match message.role {
        Role::User => Horizontal::Right,
        Role::Assistant => Horizontal::Left,
    };

    container(
        container(bubble)
            .padding(10)
            .max_width(max_width)
            .style(container::rounded_box),
    )
    .width(Length::Fill)
    .align_x(align)
    .into()
}

fn resize_handle(direction: ResizeDirection, width: f32, height: f32) -> Element<'static, Message> {
    let interaction = match direction {
        ResizeDirection::Left | ResizeDirection::Right => mouse::Interaction::ResizingHorizontally,
        ResizeDirection::Bottom => mouse::Interaction::ResizingVertically,
        _ => mouse::Interaction::Crosshair,
    };
    mouse_area(Space::new(Length::Fixed(width), Length::Fixed(height)))
        .on_press(Message::BeginGesture(GestureKind::Resize(direction)))
        .interaction(interaction)
        .into()
}

fn place(
    content: Element<'static, Message>,
    size: geometry::Size,
    x: Horizontal,
    y: Vertical,
) -> Element<'static, Message> {
    container(content)
        .width(Length::Fixed(size.width))
        .height(Length::Fixed(size.height))
        .align_x(x)
        .align_y(y)
        .into()
}

/// Edge strips and corner squares laid over the panel frame.
fn resize_handles(size: geometry::Size) -> Element<'static, Message> {
    let edge = HANDLE_THICKNESS;
    let corner = CORNER_SIZE;
    stack![
        place(resize_handle(ResizeDirection::Left, edge, size.height), size, Horizontal::Left, Vertical::Top),
        place(resize_handle(ResizeDirection::Right, edge, size.height), size, Horizontal::Right, Vertical::Top),
        place(resize_handle(ResizeDirection::Bottom, size.width, edge), size, Horizontal::Left, Vertical::Bottom),
        place(resize_handle(ResizeDirection::Corner, corner, corner), size, Horizontal::Right, Vertical::Bottom),
        place(resize_handle(ResizeDirection::LeftTop, corner, corner), size, Horizontal::Left, Vertical::Top),
        place(resize_handle(ResizeDirection::LeftBottom, corner, corner), size, Horizontal::Left, Vertical::Bottom),
    ]
    .into()
}

fn panel_style(theme: &Theme) -> container::Style {
    let palette = theme.extended_palette();
    container::Style {
        background: Some(palette.background.base.color.into()),
        border: Border {
            color: palette.background.strong.color,
            width: 1.0,
            radius: 16.0.into(),
        },
        ..Default::default()
    }
}
