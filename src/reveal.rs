//! Typewriter reveal of a finished reply.
//!
//! The partially shown text is render state only. The reply enters the
//! conversation log once, when the last character has been shown.

use crate::conversation::TurnId;

#[derive(Debug)]
struct Revealing {
    turn: TurnId,
    full: String,
    /// Byte offset of the shown prefix, always on a char boundary.
    shown: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Tick {
    Idle,
    Progress,
    Finished { turn: TurnId, text: String },
}

#[derive(Debug, Default)]
pub struct RevealAnimator {
    active: Option<Revealing>,
}

impl RevealAnimator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_revealing(&self) -> bool {
        self.active.is_some()
    }

    /// Replaces any reveal already running.
    pub fn start(&mut self, turn: TurnId, full: String) {
        self.active = Some(Revealing {
            turn,
            full,
            shown: 0,
        });
    }

    pub fn visible(&self) -> Option<&str> {
        self.active.as_ref().map(|r| &r.full[..r.shown])
    }

    /// Shows one more character. The tick that shows the last one ends the
    /// reveal and hands the full text back for committing.
    pub fn tick(&mut self) -> Tick {
        let Some(revealing) = self.active.as_mut() else {
            return Tick::Idle;
        };

        if let Some(next) = revealing.full[revealing.shown..].chars().next() {
            revealing.shown += next.len_utf8();
        }

        if revealing.shown < revealing.full.len() {
            return Tick::Progress;
        }

        match self.active.take() {
            Some(done) => Tick::Finished {
                turn: done.turn,
                text: done.full,
            },
            None => Tick::Idle,
        }
    }

    /// Stops the reveal without producing a message.
    pub fn cancel(&mut self) -> bool {
        self.active.take().is_some()
    }
}
