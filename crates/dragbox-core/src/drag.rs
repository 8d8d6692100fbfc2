//! Drag arbitration: local input to document writes, plus the shared
//! "who is dragging" highlight.
//!
//! The `is_selecting` presence flag is advisory. Nothing stops two clients from
//! holding the box at once; both write `origin` and the document's
//! last-writer-wins rule decides where it ends up. The highlight only surfaces
//! one of them.

use crate::color::Color;
use crate::crdt::{DocumentResult, SharedDocument};
use crate::identity::ClientId;
use crate::input::{EventDisposition, InputEvent, MouseButton};
use crate::presence::{PresenceField, PresenceRegistry, Presences};
use kurbo::{Point, Vec2};

/// Local drag state.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum DragState {
    #[default]
    Idle,
    /// The box is held; `hold_offset` is pointer minus origin at pick-up.
    Held { hold_offset: Vec2 },
}

impl DragState {
    pub fn is_held(&self) -> bool {
        matches!(self, DragState::Held { .. })
    }
}

/// Long-lived handler for every input event of one client.
#[derive(Debug, Default)]
pub struct DragArbiter {
    state: DragState,
}

impl DragArbiter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> DragState {
        self.state
    }

    /// Feed one input event through the state machine.
    ///
    /// Returns whether the event was consumed; the only error is a failed
    /// document write.
    pub fn handle(
        &mut self,
        event: &InputEvent,
        document: &mut SharedDocument,
        presence: &mut PresenceRegistry,
    ) -> DocumentResult<EventDisposition> {
        match event {
            InputEvent::PointerDown {
                position,
                button: MouseButton::Left,
                on_object: true,
            } => Ok(self.pick_up(*position, document, presence)),
            InputEvent::PointerDown { .. } | InputEvent::PointerLeave => Ok(EventDisposition::PassThrough),
            InputEvent::PointerMove {
                position,
                primary_down,
            } => {
                if !self.state.is_held() {
                    return Ok(EventDisposition::PassThrough);
                }
                if !*primary_down {
                    // The button was released somewhere we never saw the pointer-up.
                    return Ok(self.release(presence));
                }
                self.drag_to(*position, document)
            }
            InputEvent::PointerUp { .. } | InputEvent::TouchEnd { .. } => Ok(self.release(presence)),
            InputEvent::TouchStart { on_object, .. } => match event.primary_touch() {
                Some(position) if *on_object => Ok(self.pick_up(position, document, presence)),
                _ => Ok(EventDisposition::PassThrough),
            },
            InputEvent::TouchMove { .. } => match event.primary_touch() {
                Some(position) if self.state.is_held() => self.drag_to(position, document),
                _ => Ok(EventDisposition::PassThrough),
            },
        }
    }

    /// Drop the box without a pointer-up, e.g. when the session closes.
    pub fn cancel(&mut self, presence: &mut PresenceRegistry) {
        self.release(presence);
    }

    fn pick_up(
        &mut self,
        position: Point,
        document: &SharedDocument,
        presence: &mut PresenceRegistry,
    ) -> EventDisposition {
        let Some(origin) = document.origin() else {
            log::debug!("Ignoring pick-up before the document is seeded");
            return EventDisposition::PassThrough;
        };

        self.state = DragState::Held {
            hold_offset: position - origin,
        };
        presence.set_local_field(PresenceField::IsSelecting(true));
        EventDisposition::PassThrough
    }

    fn drag_to(&mut self, position: Point, document: &mut SharedDocument) -> DocumentResult<EventDisposition> {
        let DragState::Held { hold_offset } = self.state else {
            return Ok(EventDisposition::PassThrough);
        };
        document.set_origin(position - hold_offset)?;
        Ok(EventDisposition::Consumed)
    }

    fn release(&mut self, presence: &mut PresenceRegistry) -> EventDisposition {
        if self.state.is_held() {
            self.state = DragState::Idle;
            presence.set_local_field(PresenceField::IsSelecting(false));
        }
        EventDisposition::PassThrough
    }
}

/// The first peer (in client id order, local excluded) whose flag is set.
pub fn active_selector(local_id: ClientId, entries: &Presences) -> Option<ClientId> {
    entries
        .iter()
        .find(|(id, entry)| **id != local_id && entry.is_selecting)
        .map(|(id, _)| *id)
}

/// Border color of the box: the active selector's color, or transparent.
pub fn highlight_color(local_id: ClientId, entries: &Presences) -> Color {
    active_selector(local_id, entries)
        .and_then(|id| entries.get(&id))
        .map(|entry| entry.color)
        .unwrap_or(Color::TRANSPARENT)
}
