//! Input events delivered by the platform's pointer/touch listeners.

use kurbo::Point;
use serde::{Deserialize, Serialize};

/// Mouse button identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MouseButton {
    Left,
    Right,
    Middle,
}

/// Pointer and touch events in canvas coordinates.
///
/// Pointer-up, pointer-move and the touch move/end events must be captured
/// globally by the caller, not only over the box: the pointer routinely leaves
/// the box while it is held.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum InputEvent {
    PointerDown {
        position: Point,
        button: MouseButton,
        /// Whether the press landed on the box.
        on_object: bool,
    },
    PointerMove {
        position: Point,
        /// Whether the primary button is still down.
        primary_down: bool,
    },
    PointerUp {
        position: Point,
        button: MouseButton,
    },
    /// The pointer left the canvas.
    PointerLeave,
    TouchStart {
        /// Active touch points, in the order the platform reports them.
        touches: Vec<Point>,
        on_object: bool,
    },
    TouchMove {
        touches: Vec<Point>,
    },
    TouchEnd {
        /// Touches still active after this one ended.
        touches: Vec<Point>,
    },
}

impl InputEvent {
    /// The first active touch point, if this is a touch event that has one.
    pub fn primary_touch(&self) -> Option<Point> {
        match self {
            InputEvent::TouchStart { touches, .. }
            | InputEvent::TouchMove { touches }
            | InputEvent::TouchEnd { touches } => touches.first().copied(),
            _ => None,
        }
    }
}

/// What the caller should do with an event after the core has seen it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventDisposition {
    /// The core used the event; suppress default gestures and stop propagation.
    Consumed,
    /// Let the event through.
    PassThrough,
}

impl EventDisposition {
    pub fn is_consumed(self) -> bool {
        self == EventDisposition::Consumed
    }
}
