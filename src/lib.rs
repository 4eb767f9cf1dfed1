//! Core of joymux: the input polling and action-dispatch engine that remaps a
//! physical game controller onto a virtual joystick, mouse and keyboard
//! according to a user-editable profile.
//!
//! Hardware access, virtual-device injection, profile (de)serialization and
//! every UI surface live outside this crate, behind the collaborator traits
//! in [`controller`] and [`frontend`].

pub mod action;
pub mod controller;
pub mod engine;
pub mod frontend;
pub mod output;
pub mod profile;
pub mod sim;

pub use engine::{Engine, EngineContext, VIRTUAL_AXIS_COUNT, VirtualAxis};
pub use output::{KeyStroke, OutputParams, SharedOutput};
pub use profile::{Mode, Profile};
