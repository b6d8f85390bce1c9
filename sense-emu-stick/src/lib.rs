//! Joystick event bus for the emulated Sense HAT
//!
//! One writer process owns a datagram socket at a well-known address and
//! broadcasts joystick events; any number of readers register by sending a
//! single `hello` datagram and from then on receive every event. Event
//! datagrams carry the same record a Linux evdev joystick device produces,
//! so readers decode them exactly like genuine hardware input.
//!
//! ```text
//! [StickServer] --event records--> [StickClient] x N
//!      ^                                |
//!      +------------- "hello" ----------+   (repeated every second)
//! ```

pub mod client;
pub mod error;
pub mod event;
pub mod server;
pub mod socket;

pub use client::{Binding, Callback, StickClient};
pub use error::StickError;
pub use event::{Action, Direction, EventRecord, InputEvent};
pub use server::StickServer;
pub use socket::{StickAddress, HELLO};
