//! Floating panel geometry.
//!
//! Position is stored as distances from the right and bottom edges of the
//! viewport, so moving the pointer right or down shrinks the offsets.
//! Every mutation goes through the size clamp; nothing here can fail.

use iced::{Point, Size as Viewport};
use serde::{Deserialize, Serialize};

use crate::config::WindowConfig;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Position {
    pub right: f32,
    pub bottom: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Size {
    pub width: f32,
    pub height: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Snapshot {
    pub position: Position,
    pub size: Size,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResizeDirection {
    /// Bottom-right corner.
    Corner,
    Right,
    Bottom,
    Left,
    LeftTop,
    LeftBottom,
}

impl ResizeDirection {
    pub const ALL: [ResizeDirection; 6] = [
        ResizeDirection::Corner,
        ResizeDirection::Right,
        ResizeDirection::Bottom,
        ResizeDirection::Left,
        ResizeDirection::LeftTop,
        ResizeDirection::LeftBottom,
    ];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GestureKind {
    Drag,
    Resize(ResizeDirection),
}

/// Pointer and geometry captured when a gesture starts. All deltas are
/// measured against this, never against the previous move.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Baseline {
    pub kind: GestureKind,
    pub pointer: Point,
    pub snapshot: Snapshot,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Limits {
    pub min_width: f32,
    pub min_height: f32,
    pub maximize_margin: f32,
}

impl Limits {
    fn clamp(&self, size: Size) -> Size {
        Size {
            width: size.width.max(self.min_width),
            height: size.height.max(self.min_height),
        }
    }
}

/// On-disk shape of the geometry key.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeometryRecord {
    pub width: f32,
    pub height: f32,
    #[serde(rename = "edgeOffsetA")]
    pub edge_offset_a: f32,
    #[serde(rename = "edgeOffsetB")]
    pub edge_offset_b: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WindowGeometry {
    pub position: Position,
    pub size: Size,
    maximized: bool,
    pre_maximize: Option<Snapshot>,
    limits: Limits,
}

impl WindowGeometry {
    pub fn new(position: Position, size: Size, limits: Limits) -> Self {
        WindowGeometry {
            position,
            size: limits.clamp(size),
            maximized: false,
            pre_maximize: None,
            limits,
        }
    }

    pub fn from_config(window: &WindowConfig) -> Self {
        Self::new(
            Position {
                right: window.default_right,
                bottom: window.default_bottom,
            },
            Size {
                width: window.default_width,
                height: window.default_height,
            },
            Limits {
                min_width: window.min_width,
                min_height: window.min_height,
                maximize_margin: window.maximize_margin,
            },
        )
    }

    pub fn with_record(mut self, record: GeometryRecord) -> Self {
        self.position = Position {
            right: record.edge_offset_a.max(0.0),
            bottom: record.edge_offset_b.max(0.0),
        };
        self.size = self.limits.clamp(Size {
            width: record.width,
            height: record.height,
        });
        self.maximized = false;
        self.pre_maximize = None;
        self
    }

    /// The user's own geometry: the restore snapshot while maximized.
    pub fn record(&self) -> GeometryRecord {
        let snapshot = self.pre_maximize.unwrap_or_else(|| self.snapshot());
        GeometryRecord {
            width: snapshot.size.width,
            height: snapshot.size.height,
            edge_offset_a: snapshot.position.right,
            edge_offset_b: snapshot.position.bottom,
        }
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            position: self.position,
            size: self.size,
        }
    }

    pub fn is_maximized(&self) -> bool {
        self.maximized
    }

    pub fn begin(&self, kind: GestureKind, pointer: Point) -> Baseline {
        Baseline {
            kind,
            pointer,
            snapshot: self.snapshot(),
        }
    }

    pub fn apply_delta(&mut self, baseline: &Baseline, pointer: Point) {
        let dx = pointer.x - baseline.pointer.x;
        let dy = pointer.y - baseline.pointer.y;
        let start = baseline.snapshot;

        match baseline.kind {
            GestureKind::Drag => {
                self.position = Position {
                    right: (start.position.right - dx).max(0.0),
                    bottom: (start.position.bottom - dy).max(0.0),
                };
            }
            GestureKind::Resize(direction) => {
                let (width, height) = match direction {
                    ResizeDirection::Corner => (start.size.width + dx, start.size.height + dy),
                    ResizeDirection::Right => (start.size.width + dx, start.size.height),
                    ResizeDirection::Bottom => (start.size.width, start.size.height + dy),
                    ResizeDirection::Left => (start.size.width - dx, start.size.height),
                    ResizeDirection::LeftTop => (start.size.width - dx, start.size.height - dy),
                    ResizeDirection::LeftBottom => (start.size.width - dx, start.size.height + dy),
                };
                // The panel is anchored bottom-right, so offsets stay put and
                // only the size follows the pointer.
                self.size = self.limits.clamp(Size { width, height });
                self.position = start.position;
            }
        }
    }

    pub fn toggle_maximize(&mut self, viewport: Viewport) {
        if self.maximized {
            if let Some(snapshot) = self.pre_maximize.take() {
                self.position = snapshot.position;
                self.size = snapshot.size;
            }
            self.maximized = false;
        } else {
            self.pre_maximize = Some(self.snapshot());
            let margin = self.limits.maximize_margin;
            self.size = self.limits.clamp(Size {
                width: viewport.width - margin * 2.0,
                height: viewport.height - margin * 2.0,
            });
            self.position = Position {
                right: margin,
                bottom: margin,
            };
            self.maximized = true;
        }
    }
}
