use iced::{mouse, window, Event, Point};

use crate::geometry::{Baseline, GestureKind, WindowGeometry};

/// Pointer input that matters while a gesture is running.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PointerEvent {
    Moved(Point),
    Released,
}

/// Maps a window-wide event to gesture input. Losing focus counts as a
/// release so a button let go outside the window cannot leave a gesture stuck.
pub fn pointer_event(event: &Event) -> Option<PointerEvent> {
    match event {
        Event::Mouse(mouse::Event::CursorMoved { position }) => Some(PointerEvent::Moved(*position)),
        Event::Mouse(mouse::Event::ButtonReleased(mouse::Button::Left)) => Some(PointerEvent::Released),
        Event::Window(window::Event::Unfocused) => Some(PointerEvent::Released),
        _ => None,
    }
}

/// At most one drag or resize at a time. While a gesture is active the
/// application keeps exactly one window-wide pointer listener alive; it is
/// dropped as soon as `release` or `cancel` runs.
#[derive(Debug, Default)]
pub struct GestureCapture {
    active: Option<Baseline>,
}

impl GestureCapture {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    pub fn active_kind(&self) -> Option<GestureKind> {
        self.active.map(|baseline| baseline.kind)
    }

    /// Returns false when the start is rejected: panel maximized or
    /// another gesture already running.
    pub fn start(&mut self, kind: GestureKind, pointer: Point, geometry: &WindowGeometry) -> bool {
        if geometry.is_maximized() || self.active.is_some() {
            return false;
        }
        self.active = Some(geometry.begin(kind, pointer));
        true
    }

    /// Feeds one pointer event. Returns true when the gesture ended.
    pub fn handle(&mut self, event: PointerEvent, geometry: &mut WindowGeometry) -> bool {
        match event {
            PointerEvent::Moved(pointer) => {
                if let Some(baseline) = &self.active {
                    geometry.apply_delta(baseline, pointer);
                }
                false
            }
            PointerEvent::Released => self.release().is_some(),
        }
    }

    pub fn release(&mut self) -> Option<GestureKind> {
        self.active.take().map(|baseline| baseline.kind)
    }

    pub fn cancel(&mut self) {
        self.active = None;
    }
}
