use ratatui::layout::{Position, Rect};

/// Gap, in cells, between the bottom edge of the trigger and the top of the
/// panel.
pub const DEFAULT_ANCHOR_MARGIN: u16 = 1;

#[derive(Debug, Clone, Copy, Eq, PartialEq, Default)]
pub struct Anchor {
    pub top: u16,
    pub left: u16,
}

/// Computes the anchor for a panel opened below `trigger`.
pub fn anchor_below(trigger: Rect, margin: u16) -> Anchor {
    Anchor {
        top: trigger.bottom().saturating_add(margin),
        left: trigger.left(),
    }
}

/// Outside-pointer listener. It only exists while a menu is open and only
/// reacts to events sequenced after the one that opened the menu.
#[derive(Debug)]
struct OutsideClickListener {
    armed_after: u64,
}

impl OutsideClickListener {
    fn observes(&self, event_seq: u64) -> bool {
        event_seq > self.armed_after
    }
}

#[derive(Debug, Default)]
pub struct MenuState {
    anchor: Anchor,
    trigger: Option<Rect>,
    panel: Option<Rect>,
    highlighted: usize,
    listener: Option<OutsideClickListener>,
}

impl MenuState {
    pub fn is_open(&self) -> bool {
        self.listener.is_some()
    }

    pub fn anchor(&self) -> Anchor {
        self.anchor
    }

    pub fn highlighted(&self) -> usize {
        self.highlighted
    }

    pub fn panel(&self) -> Option<Rect> {
        self.panel
    }

    /// Opens the menu below `trigger`. The position is fixed until the menu
    /// is closed again.
    pub fn open(&mut self, trigger: Rect, margin: u16, event_seq: u64) -> Anchor {
        self.anchor = anchor_below(trigger, margin);
        self.trigger = Some(trigger);
        self.panel = None;
        self.highlighted = 0;
        self.listener = Some(OutsideClickListener {
            armed_after: event_seq,
        });
        self.anchor
    }

    pub fn close(&mut self) {
        self.listener = None;
        self.panel = None;
        self.trigger = None;
    }

    /// Records where the panel ended up on screen after clamping.
    pub fn set_panel(&mut self, panel: Rect) {
        if self.is_open() {
            self.panel = Some(panel);
        }
    }

    /// The trigger scrolled out of view or its row went away.
    pub fn forget_trigger(&mut self) {
        self.trigger = None;
    }

    pub fn move_highlight(&mut self, delta: isize, items: usize) {
        if items == 0 {
            self.highlighted = 0;
            return;
        }
        let next = (self.highlighted as isize + delta).rem_euclid(items as isize);
        self.highlighted = next as usize;
    }

    pub fn hits_panel(&self, pointer: Position) -> bool {
        self.panel.is_some_and(|panel| panel.contains(pointer))
    }

    pub fn hits_trigger(&self, pointer: Position) -> bool {
        self.trigger.is_some_and(|trigger| trigger.contains(pointer))
    }

    /// True when a pointer-down at `pointer` should dismiss the menu.
    pub fn should_close(&self, pointer: Position, event_seq: u64) -> bool {
        let Some(listener) = &self.listener else {
            return false;
        };
        listener.observes(event_seq) && !self.hits_panel(pointer) && !self.hits_trigger(pointer)
    }

    /// Index of the item row under `pointer`, for a bordered panel with one
    /// item per line.
    pub fn item_at(&self, pointer: Position, items: usize) -> Option<usize> {
        let panel = self.panel?;
        if !panel.contains(pointer) || pointer.y <= panel.y {
            return None;
        }
        let index = usize::from(pointer.y - panel.y - 1);
        (index < items).then_some(index)
    }
}
