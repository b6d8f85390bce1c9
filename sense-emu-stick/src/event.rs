//! Joystick events and their evdev wire record
//!
//! Every datagram on the bus is one `struct input_event` as the kernel would
//! deliver it from a real joystick: `{tv_sec, tv_usec, type, code, value}`
//! in native byte order and layout.

use std::ffi::c_long;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

/// Input subsystem constants carried on the wire
pub mod wire {
    /// Event class for key events (`EV_KEY`)
    pub const EV_KEY: u16 = 0x01;

    /// Key codes of the five joystick positions
    pub mod key {
        pub const ENTER: u16 = 28;
        pub const UP: u16 = 103;
        pub const LEFT: u16 = 105;
        pub const RIGHT: u16 = 106;
        pub const DOWN: u16 = 108;
    }

    /// Key event values
    pub mod state {
        pub const RELEASE: u32 = 0;
        pub const PRESS: u32 = 1;
        pub const HOLD: u32 = 2;
    }
}

/// Joystick direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Up,
    Down,
    Left,
    Right,
    Middle,
}

impl Direction {
    pub const ALL: [Direction; 5] = [
        Direction::Up,
        Direction::Down,
        Direction::Left,
        Direction::Right,
        Direction::Middle,
    ];

    /// Key code sent on the wire
    pub fn code(self) -> u16 {
        match self {
            Direction::Up => wire::key::UP,
            Direction::Down => wire::key::DOWN,
            Direction::Left => wire::key::LEFT,
            Direction::Right => wire::key::RIGHT,
            Direction::Middle => wire::key::ENTER,
        }
    }

    pub fn from_code(code: u16) -> Option<Self> {
        match code {
            wire::key::UP => Some(Direction::Up),
            wire::key::DOWN => Some(Direction::Down),
            wire::key::LEFT => Some(Direction::Left),
            wire::key::RIGHT => Some(Direction::Right),
            wire::key::ENTER => Some(Direction::Middle),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Direction::Up => "up",
            Direction::Down => "down",
            Direction::Left => "left",
            Direction::Right => "right",
            Direction::Middle => "middle",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What happened to the joystick
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    Pressed,
    Released,
    Held,
}

impl Action {
    pub fn value(self) -> u32 {
        match self {
            Action::Released => wire::state::RELEASE,
            Action::Pressed => wire::state::PRESS,
            Action::Held => wire::state::HOLD,
        }
    }

    pub fn from_value(value: u32) -> Option<Self> {
        match value {
            wire::state::RELEASE => Some(Action::Released),
            wire::state::PRESS => Some(Action::Pressed),
            wire::state::HOLD => Some(Action::Held),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Action::Pressed => "pressed",
            Action::Released => "released",
            Action::Held => "held",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A decoded joystick event
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InputEvent {
    /// Seconds since the Unix epoch
    pub timestamp: f64,
    pub direction: Direction,
    pub action: Action,
}

impl InputEvent {
    pub fn new(timestamp: f64, direction: Direction, action: Action) -> Self {
        Self {
            timestamp,
            direction,
            action,
        }
    }

    /// Event stamped with the current wall-clock time
    pub fn now(direction: Direction, action: Action) -> Self {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0);
        Self::new(timestamp, direction, action)
    }
}

impl fmt::Display for InputEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} @ {:.6}", self.direction, self.action, self.timestamp)
    }
}

/// Native `struct input_event`
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct EventRecord {
    pub tv_sec: c_long,
    pub tv_usec: c_long,
    pub kind: u16,
    pub code: u16,
    pub value: u32,
}

impl EventRecord {
    pub const SIZE: usize = std::mem::size_of::<Self>();

    /// Parse one datagram; `None` unless it is exactly one record
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        Self::read_from_bytes(bytes).ok()
    }

    /// Decode into an [`InputEvent`]
    ///
    /// Non-key event classes and unknown key codes or values yield `None`.
    pub fn to_event(&self) -> Option<InputEvent> {
        if self.kind != wire::EV_KEY {
            return None;
        }
        let direction = Direction::from_code(self.code)?;
        let action = Action::from_value(self.value)?;
        let timestamp = self.tv_sec as f64 + self.tv_usec as f64 / 1_000_000.0;
        Some(InputEvent::new(timestamp, direction, action))
    }
}

impl From<&InputEvent> for EventRecord {
    fn from(event: &InputEvent) -> Self {
        let secs = event.timestamp.trunc();
        let usecs = ((event.timestamp - secs) * 1_000_000.0).round();
        Self {
            tv_sec: secs as c_long,
            tv_usec: usecs as c_long,
            kind: wire::EV_KEY,
            code: event.direction.code(),
            value: event.action.value(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_is_native_input_event() {
        let expected = 2 * std::mem::size_of::<c_long>() + 8;
        assert_eq!(EventRecord::SIZE, expected);
    }

    #[test]
    fn test_event_wire_codes() {
        let event = InputEvent::new(1_700_000_000.25, Direction::Left, Action::Held);
        let record = EventRecord::from(&event);
        assert_eq!(record.kind, wire::EV_KEY);
        assert_eq!(record.code, 105);
        assert_eq!(record.value, 2);
        assert_eq!(record.tv_sec, 1_700_000_000);
        assert_eq!(record.tv_usec, 250_000);

        let decoded = EventRecord::parse(record.as_bytes())
            .and_then(|r| r.to_event())
            .unwrap();
        assert_eq!(decoded.direction, Direction::Left);
        assert_eq!(decoded.action, Action::Held);
        assert!((decoded.timestamp - event.timestamp).abs() < 1e-6);
    }

    #[test]
    fn test_middle_is_enter_key() {
        assert_eq!(Direction::Middle.code(), wire::key::ENTER);
        for direction in Direction::ALL {
            assert_eq!(Direction::from_code(direction.code()), Some(direction));
        }
    }

    #[test]
    fn test_foreign_records_dropped() {
        let mut record = EventRecord::from(&InputEvent::new(0.0, Direction::Up, Action::Pressed));
        record.kind = 0; // EV_SYN
        assert!(record.to_event().is_none());

        record.kind = wire::EV_KEY;
        record.code = 30;
        assert!(record.to_event().is_none());

        record.code = wire::key::UP;
        record.value = 7;
        assert!(record.to_event().is_none());
    }

    #[test]
    fn test_short_datagram_rejected() {
        assert!(EventRecord::parse(b"hello").is_none());
        assert!(EventRecord::parse(&[0u8; EventRecord::SIZE + 1]).is_none());
    }
}
