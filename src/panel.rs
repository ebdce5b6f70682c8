//! The floating assistant panel, minus rendering.
//!
//! `Panel` owns every piece of engine state and is the only writer to the
//! store: each mutation that changes persisted state saves it before
//! returning. Work that has to leave the UI thread comes back out as an
//! `Effect` for the application to run.

use iced::{Point, Size as Viewport};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::attachment::Attachment;
use crate::config::Config;
use crate::conversation::{Message, Mode, Orchestrator, Resolution, Route, TurnId, TurnResponse};
use crate::geometry::{GestureKind, WindowGeometry};
use crate::gesture::{GestureCapture, PointerEvent};
use crate::health::{ConnectionStatus, HealthMonitor};
use crate::remote::{chat_entries, ChatEntry, RemoteClient, RemoteError, DEFAULT_SYSTEM_PROMPT};
use crate::reveal::{RevealAnimator, Tick};
use crate::store::PanelStore;

#[derive(Debug, Clone)]
pub struct RemoteRequest {
    pub turn: TurnId,
    pub entries: Vec<ChatEntry>,
    pub retry_probe: bool,
    pub cancel: CancellationToken,
}

impl RemoteRequest {
    /// Optional retry probe, then the send. Cancelling the token drops
    /// whichever call is outstanding.
    pub async fn run(self, client: Arc<RemoteClient>) -> TurnResponse {
        let turn = self.turn;
        let work = async {
            let mut recovered = false;
            if self.retry_probe {
                if let Err(e) = client.probe().await {
                    warn!("retry probe before send failed: {}", e);
                    return TurnResponse {
                        turn,
                        recovered: false,
                        result: Err(RemoteError::Unreachable),
                    };
                }
                recovered = true;
            }
            TurnResponse {
                turn,
                recovered,
                result: client.chat(&self.entries).await,
            }
        };

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => TurnResponse {
                turn,
                recovered: false,
                result: Err(RemoteError::Cancelled),
            },
            response = work => response,
        }
    }
}

#[derive(Debug, Clone)]
pub enum Effect {
    Probe,
    Remote(RemoteRequest),
    Local { turn: TurnId, query: String },
}

pub struct Panel {
    open: bool,
    geometry: WindowGeometry,
    gesture: GestureCapture,
    conversation: Orchestrator,
    reveal: RevealAnimator,
    health: HealthMonitor,
    store: PanelStore,
    viewport: Viewport,
    input: String,
    system_prompt: String,
    turn_cancel: Option<CancellationToken>,
    /// The current turn's retry probe holds the health monitor's probe slot.
    turn_probe: bool,
}

impl Panel {
    /// Hydrates geometry and log from the store, falling back to defaults.
    pub fn load(store: PanelStore, config: &Config) -> Self {
        let mut geometry = WindowGeometry::from_config(&config.window);
        if let Some(record) = store.load_geometry() {
            geometry = geometry.with_record(record);
        }
        let log = store.load_log();
        info!(messages = log.len(), "panel state loaded");

        Panel {
            open: false,
            geometry,
            gesture: GestureCapture::new(),
            conversation: Orchestrator::new(log),
            reveal: RevealAnimator::new(),
            health: HealthMonitor::new(),
            store,
            viewport: Viewport::new(config.window.width as f32, config.window.height as f32),
            input: String::new(),
            system_prompt: config
                .remote
                .system_prompt
                .clone()
                .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string()),
            turn_cancel: None,
            turn_probe: false,
        }
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    pub fn geometry(&self) -> &WindowGeometry {
        &self.geometry
    }

    pub fn messages(&self) -> &[Message] {
        self.conversation.messages()
    }

    pub fn pending(&self) -> &[Attachment] {
        self.conversation.pending()
    }

    pub fn mode(&self) -> Mode {
        self.conversation.mode()
    }

    pub fn status(&self) -> ConnectionStatus {
        self.health.status()
    }

    pub fn is_probing(&self) -> bool {
        self.health.is_probing()
    }

    pub fn is_busy(&self) -> bool {
        self.conversation.is_busy()
    }

    pub fn input(&self) -> &str {
        &self.input
    }

    pub fn revealing_text(&self) -> Option<&str> {
        self.reveal.visible()
    }

    pub fn is_revealing(&self) -> bool {
        self.reveal.is_revealing()
    }

    pub fn gesture_active(&self) -> bool {
        self.gesture.is_active()
    }

    pub fn gesture_kind(&self) -> Option<GestureKind> {
        self.gesture.active_kind()
    }

    pub fn open(&mut self) {
        self.open = true;
    }

    /// Closing keeps geometry and history but tears down any gesture,
    /// reveal, or request belonging to the visible panel.
    pub fn close(&mut self) {
        self.open = false;
        if self.gesture.is_active() {
            self.gesture.cancel();
            self.persist_geometry();
        }
        self.abandon_turn();
    }

    pub fn set_input(&mut self, value: String) {
        self.input = value;
    }

    pub fn set_viewport(&mut self, viewport: Viewport) {
        self.viewport = viewport;
    }

    pub fn set_mode(&mut self, mode: Mode) -> bool {
        let changed = self.conversation.set_mode(mode);
        if changed {
            info!(?mode, "assistant mode changed");
        }
        changed
    }

    pub fn toggle_mode(&mut self) -> bool {
        self.set_mode(self.mode().toggled())
    }

    pub fn attach(&mut self, attachments: Vec<Attachment>) {
        self.conversation.attach(attachments);
    }

    pub fn remove_attachment(&mut self, index: usize) {
        self.conversation.remove_attachment(index);
    }

    pub fn request_probe(&mut self) -> Option<Effect> {
        self.health.begin_probe().then_some(Effect::Probe)
    }

    pub fn probe_finished(&mut self, result: Result<(), RemoteError>) {
        self.health.finish_probe(result);
    }

    pub fn submit(&mut self) -> Option<Effect> {
        let submission = self.conversation.submit(&self.input, self.health.status())?;
        self.input.clear();
        self.persist_log();

        let effect = match submission.route {
            Route::Local { query } => Effect::Local {
                turn: submission.turn,
                query,
            },
            Route::Remote { history, retry_probe } => {
                // An outstanding probe already answers the question; send
                // without a second one.
                let retry_probe = retry_probe && self.health.begin_probe();
                self.turn_probe = retry_probe;
                let cancel = CancellationToken::new();
                self.turn_cancel = Some(cancel.clone());
                Effect::Remote(RemoteRequest {
                    turn: submission.turn,
                    entries: chat_entries(&self.system_prompt, &history),
                    retry_probe,
                    cancel,
                })
            }
        };
        debug!(turn = ?submission.turn, "turn submitted");
        Some(effect)
    }

    pub fn turn_finished(&mut self, response: TurnResponse) {
        let turn = response.turn;
        let recovered = response.recovered;
        let resolution = self.conversation.resolve(response);
        if resolution == Resolution::Stale {
            debug!(?turn, "discarding response for abandoned turn");
            return;
        }

        self.turn_cancel = None;
        if std::mem::take(&mut self.turn_probe) {
            let outcome = if recovered {
                Ok(())
            } else {
                Err(RemoteError::Unreachable)
            };
            self.health.finish_probe(outcome);
        }
        match resolution {
            Resolution::Reveal(text) => self.reveal.start(turn, text),
            Resolution::Failed(error) => {
                if error.marks_offline() {
                    self.health.mark_unreachable();
                }
                self.persist_log();
            }
            Resolution::Stale => {}
        }
    }

    pub fn tick(&mut self) {
        if let Tick::Finished { turn, text } = self.reveal.tick() {
            if self.conversation.commit(turn, text) {
                self.persist_log();
            }
        }
    }

    pub fn clear_history(&mut self) {
        self.abandon_turn();
        self.conversation.clear();
        if let Err(e) = self.store.clear_log() {
            warn!("failed to remove stored conversation: {:#}", e);
        }
        info!("conversation history cleared");
    }

    pub fn begin_gesture(&mut self, kind: GestureKind, pointer: Point) -> bool {
        self.gesture.start(kind, pointer, &self.geometry)
    }

    pub fn pointer(&mut self, event: PointerEvent) {
        if self.gesture.handle(event, &mut self.geometry) {
            self.persist_geometry();
        }
    }

    pub fn toggle_maximize(&mut self) {
        self.gesture.cancel();
        self.geometry.toggle_maximize(self.viewport);
        self.persist_geometry();
    }

    /// Final write before the application exits.
    pub fn flush(&mut self) {
        self.persist_geometry();
        if !self.messages().is_empty() {
            self.persist_log();
        }
    }

    fn abandon_turn(&mut self) {
        self.reveal.cancel();
        if let Some(cancel) = self.turn_cancel.take() {
            cancel.cancel();
        }
        if std::mem::take(&mut self.turn_probe) {
            self.health.release_probe();
        }
        if let Some(turn) = self.conversation.abandon() {
            debug!(?turn, "turn abandoned");
        }
    }

    fn persist_geometry(&self) {
        if let Err(e) = self.store.save_geometry(&self.geometry.record()) {
            warn!("failed to save panel geometry: {:#}", e);
        }
    }

    fn persist_log(&self) {
        if let Err(e) = self.store.save_log(self.conversation.messages()) {
            warn!("failed to save conversation: {:#}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::Role;
    use crate::geometry::{ResizeDirection, Size};
    use crate::remote::test_server;
    use crate::store::LOG_KEY;
    use crate::{local, remote};

    fn panel() -> Panel {
        Panel::load(PanelStore::open_in_memory().unwrap(), &Config::default())
    }

    fn reply(turn: TurnId, text: &str) -> TurnResponse {
        TurnResponse {
            turn,
            recovered: false,
            result: Ok(text.to_string()),
        }
    }

    fn drain_reveal(panel: &mut Panel) -> usize {
        let mut ticks = 0;
        while panel.is_revealing() {
            panel.tick();
            ticks += 1;
        }
        ticks
    }

    fn remote_turn(effect: Option<Effect>) -> RemoteRequest {
        match effect {
            Some(Effect::Remote(request)) => request,
            other => panic!("expected remote effect, got {other:?}"),
        }
    }

    #[test]
    fn test_defaults_on_first_mount() {
        let panel = panel();
        assert_eq!(panel.geometry().size, Size { width: 400.0, height: 600.0 });
        assert!(panel.messages().is_empty());
        assert_eq!(panel.status(), ConnectionStatus::Unknown);
        assert_eq!(panel.mode(), Mode::Remote);
    }

    #[test]
    fn test_full_turn_reveals_then_commits_once() {
        let mut panel = panel();
        panel.set_input("hello".to_string());
        let request = remote_turn(panel.submit());
        assert_eq!(panel.input(), "");
        assert_eq!(request.entries.len(), 2);
        assert_eq!(request.entries[0].role, "system");

        panel.turn_finished(reply(request.turn, "Hi there"));
        assert_eq!(panel.messages().len(), 1);
        assert!(panel.is_busy());

        panel.set_input("again".to_string());
        assert!(panel.submit().is_none());

        let ticks = drain_reveal(&mut panel);
        assert_eq!(ticks, "Hi there".chars().count());
        assert_eq!(panel.messages().len(), 2);
        assert_eq!(panel.messages()[1].role, Role::Assistant);
        assert_eq!(panel.messages()[1].text, "Hi there");
        assert!(!panel.is_busy());
        assert_eq!(panel.input(), "again");
    }

    #[test]
    fn test_offline_send_with_failed_retry_appends_one_failure() {
        let mut panel = panel();
        panel.request_probe();
        panel.probe_finished(Err(RemoteError::Timeout));
        assert_eq!(panel.status(), ConnectionStatus::Offline);

        panel.set_input("hello".to_string());
        let request = remote_turn(panel.submit());
        assert!(request.retry_probe);

        panel.turn_finished(TurnResponse {
            turn: request.turn,
            recovered: false,
            result: Err(RemoteError::Unreachable),
        });
        assert!(!panel.is_revealing());
        let assistant: Vec<&Message> = panel
            .messages()
            .iter()
            .filter(|m| m.role == Role::Assistant)
            .collect();
        assert_eq!(assistant.len(), 1);
        assert_eq!(assistant[0].text, RemoteError::Unreachable.user_message());
        assert_eq!(panel.status(), ConnectionStatus::Offline);
    }

    #[test]
    fn test_successful_retry_marks_online() {
        let mut panel = panel();
        panel.request_probe();
        panel.probe_finished(Err(RemoteError::Timeout));
        panel.set_input("hello".to_string());
        let request = remote_turn(panel.submit());
        panel.turn_finished(TurnResponse {
            turn: request.turn,
            recovered: true,
            result: Ok("back".to_string()),
        });
        assert_eq!(panel.status(), ConnectionStatus::Online);
    }

    #[test]
    fn test_timeout_marks_offline_but_auth_does_not() {
        let mut panel = panel();
        panel.request_probe();
        panel.probe_finished(Ok(()));

        panel.set_input("a".to_string());
        let request = remote_turn(panel.submit());
        panel.turn_finished(TurnResponse {
            turn: request.turn,
            recovered: false,
            result: Err(RemoteError::Auth),
        });
        assert_eq!(panel.status(), ConnectionStatus::Online);

        panel.set_input("b".to_string());
        let request = remote_turn(panel.submit());
        panel.turn_finished(TurnResponse {
            turn: request.turn,
            recovered: false,
            result: Err(RemoteError::Timeout),
        });
        assert_eq!(panel.status(), ConnectionStatus::Offline);
    }

    #[test]
    fn test_local_mode_never_goes_remote() {
        let mut panel = panel();
        assert!(panel.toggle_mode());
        for status in [Err(RemoteError::Timeout), Ok(())] {
            panel.request_probe();
            panel.probe_finished(status);
            panel.set_input("question".to_string());
            match panel.submit() {
                Some(Effect::Local { turn, query }) => {
                    assert_eq!(query, "question");
                    panel.turn_finished(TurnResponse {
                        turn,
                        recovered: false,
                        result: Ok(local::answer(&query)),
                    });
                }
                other => panic!("expected local effect, got {other:?}"),
            }
            drain_reveal(&mut panel);
        }
        assert_eq!(panel.messages().len(), 4);
    }

    #[tokio::test]
    async fn test_local_responder_drives_a_turn() {
        let mut panel = panel();
        panel.set_mode(Mode::Local);
        panel.set_input("gpa".to_string());
        let Some(Effect::Local { turn, query }) = panel.submit() else {
            panic!("expected local effect");
        };
        panel.turn_finished(local::respond(turn, query).await);
        drain_reveal(&mut panel);
        assert!(panel.messages()[1].text.contains("\"gpa\""));
    }

    #[test]
    fn test_clear_during_reveal_cancels_without_commit() {
        let mut panel = panel();
        panel.set_input("hello".to_string());
        let request = remote_turn(panel.submit());
        panel.turn_finished(reply(request.turn, "a long answer"));
        panel.tick();
        assert!(panel.revealing_text().is_some());

        panel.clear_history();
        assert!(!panel.is_revealing());
        assert!(!panel.is_busy());
        drain_reveal(&mut panel);
        panel.tick();
        assert!(panel.messages().is_empty());
        assert!(panel.store.get_raw(LOG_KEY).unwrap().is_none());
    }

    #[test]
    fn test_close_mid_request_drops_late_response() {
        let mut panel = panel();
        panel.open();
        panel.set_input("hello".to_string());
        let request = remote_turn(panel.submit());
        panel.close();
        assert!(request.cancel.is_cancelled());
        assert!(!panel.is_busy());

        panel.turn_finished(reply(request.turn, "late"));
        assert!(!panel.is_revealing());
        assert_eq!(panel.messages().len(), 1);

        panel.open();
        panel.set_input("next".to_string());
        assert!(panel.submit().is_some());
    }

    #[test]
    fn test_clear_then_reload_yields_empty_log() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("panel.sqlite");
        {
            let mut panel = Panel::load(PanelStore::open(&path).unwrap(), &Config::default());
            panel.set_input("remember me".to_string());
            let request = remote_turn(panel.submit());
            panel.turn_finished(TurnResponse {
                turn: request.turn,
                recovered: false,
                result: Err(RemoteError::RateLimited),
            });
            panel.clear_history();
        }
        let panel = Panel::load(PanelStore::open(&path).unwrap(), &Config::default());
        assert!(panel.messages().is_empty());
    }

    #[test]
    fn test_geometry_and_log_survive_restart() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("panel.sqlite");
        {
            let mut panel = Panel::load(PanelStore::open(&path).unwrap(), &Config::default());
            panel.open();
            assert!(panel.begin_gesture(
                GestureKind::Resize(ResizeDirection::Corner),
                Point::new(400.0, 600.0)
            ));
            panel.pointer(PointerEvent::Moved(Point::new(450.0, 650.0)));
            panel.pointer(PointerEvent::Released);

            panel.set_input("hi".to_string());
            let request = remote_turn(panel.submit());
            panel.turn_finished(reply(request.turn, "yo"));
            drain_reveal(&mut panel);
        }

        let panel = Panel::load(PanelStore::open(&path).unwrap(), &Config::default());
        assert_eq!(panel.geometry().size, Size { width: 450.0, height: 650.0 });
        let texts: Vec<&str> = panel.messages().iter().map(|m| m.text.as_str()).collect();
        assert_eq!(texts, ["hi", "yo"]);
    }

    #[test]
    fn test_maximized_geometry_persists_restore_size() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("panel.sqlite");
        {
            let mut panel = Panel::load(PanelStore::open(&path).unwrap(), &Config::default());
            panel.set_viewport(Viewport::new(1600.0, 900.0));
            panel.toggle_maximize();
            assert_eq!(panel.geometry().size, Size { width: 1560.0, height: 860.0 });
            assert!(!panel.begin_gesture(GestureKind::Drag, Point::ORIGIN));
            panel.flush();
        }
        let panel = Panel::load(PanelStore::open(&path).unwrap(), &Config::default());
        assert_eq!(panel.geometry().size, Size { width: 400.0, height: 600.0 });
        assert!(!panel.geometry().is_maximized());
    }

    #[test]
    fn test_remote_history_excludes_attachment_messages() {
        let mut panel = panel();
        panel.attach(vec![Attachment::file("cv.pdf", b"%PDF")]);
        panel.set_input("see attached".to_string());
        let request = remote_turn(panel.submit());
        assert!(panel.pending().is_empty());
        panel.turn_finished(reply(request.turn, "got it"));
        drain_reveal(&mut panel);

        panel.set_input("thanks".to_string());
        let request = remote_turn(panel.submit());
        let expected = remote::chat_entries(DEFAULT_SYSTEM_PROMPT, &panel.messages()[1..]);
        assert_eq!(request.entries, expected);
    }

    fn offline_panel() -> Panel {
        let mut panel = panel();
        panel.request_probe();
        panel.probe_finished(Err(RemoteError::Timeout));
        assert_eq!(panel.status(), ConnectionStatus::Offline);
        panel
    }

    #[test]
    fn test_submit_during_outstanding_probe_sends_without_retry() {
        let mut panel = offline_panel();
        assert!(matches!(panel.request_probe(), Some(Effect::Probe)));

        panel.set_input("hello".to_string());
        let request = remote_turn(panel.submit());
        assert!(!request.retry_probe);
        assert!(panel.is_probing());

        panel.probe_finished(Ok(()));
        assert!(!panel.is_probing());
        assert_eq!(panel.status(), ConnectionStatus::Online);

        panel.turn_finished(reply(request.turn, "hi"));
        assert!(!panel.is_probing());
    }

    #[test]
    fn test_retry_probe_holds_the_probe_slot() {
        let mut panel = offline_panel();
        panel.set_input("hello".to_string());
        let request = remote_turn(panel.submit());
        assert!(request.retry_probe);
        assert!(panel.is_probing());
        assert!(panel.request_probe().is_none());

        panel.turn_finished(TurnResponse {
            turn: request.turn,
            recovered: true,
            result: Ok("back".to_string()),
        });
        assert!(!panel.is_probing());
        assert_eq!(panel.status(), ConnectionStatus::Online);
        assert!(panel.request_probe().is_some());
    }

    #[test]
    fn test_abandoned_turn_releases_probe_slot() {
        let mut panel = offline_panel();
        panel.open();
        panel.set_input("hello".to_string());
        let request = remote_turn(panel.submit());
        assert!(panel.is_probing());

        panel.close();
        assert!(!panel.is_probing());
        assert_eq!(panel.status(), ConnectionStatus::Offline);

        panel.turn_finished(TurnResponse {
            turn: request.turn,
            recovered: false,
            result: Err(RemoteError::Cancelled),
        });
        assert!(!panel.is_probing());
        assert!(panel.request_probe().is_some());
    }

    #[test]
    fn test_drag_is_reported_while_active() {
        let mut panel = panel();
        assert_eq!(panel.gesture_kind(), None);
        assert!(panel.begin_gesture(GestureKind::Drag, Point::new(10.0, 10.0)));
        assert_eq!(panel.gesture_kind(), Some(GestureKind::Drag));
        panel.pointer(PointerEvent::Released);
        assert_eq!(panel.gesture_kind(), None);
    }

    #[tokio::test]
    async fn test_failed_retry_probe_skips_chat() {
        let client = Arc::new(test_server::client(&test_server::closed_port().await));
        let mut panel = offline_panel();
        panel.set_input("hello".to_string());
        let request = remote_turn(panel.submit());
        assert!(request.retry_probe);

        let response = request.run(client).await;
        assert!(!response.recovered);
        assert_eq!(response.result, Err(RemoteError::Unreachable));

        panel.turn_finished(response);
        assert!(!panel.is_revealing());
        assert!(!panel.is_probing());
        assert_eq!(panel.status(), ConnectionStatus::Offline);
        assert_eq!(panel.messages().len(), 2);
        assert_eq!(panel.messages()[1].text, RemoteError::Unreachable.user_message());
    }

    #[tokio::test]
    async fn test_successful_retry_probe_then_chat() {
        let (base_url, server) = test_server::serve(vec![
            ("200 OK", r#"{"data":[]}"#),
            (
                "200 OK",
                r#"{"choices":[{"message":{"role":"assistant","content":"Welcome back"}}]}"#,
            ),
        ])
        .await;
        let client = Arc::new(test_server::client(&base_url));
        let mut panel = offline_panel();
        panel.set_input("hello".to_string());
        let request = remote_turn(panel.submit());

        let response = request.run(client).await;
        assert!(response.recovered);
        assert_eq!(response.result, Ok("Welcome back".to_string()));

        let requests = server.await.unwrap();
        assert!(requests[0].starts_with("GET /models"));
        assert!(requests[1].starts_with("POST /chat/completions"));

        panel.turn_finished(response);
        assert_eq!(panel.status(), ConnectionStatus::Online);
        drain_reveal(&mut panel);
        assert_eq!(panel.messages()[1].text, "Welcome back");
    }

    #[tokio::test]
    async fn test_cancelled_request_resolves_as_cancelled() {
        let client = Arc::new(
            RemoteClient::with_config(&crate::config::RemoteConfig {
                base_url: "http://127.0.0.1:9".to_string(),
                ..Default::default()
            })
            .unwrap(),
        );
        let mut panel = panel();
        panel.set_input("hello".to_string());
        let request = remote_turn(panel.submit());
        request.cancel.cancel();
        let response = request.run(client).await;
        assert_eq!(response.result, Err(RemoteError::Cancelled));
    }
}
