//! The profile data model: modes, the mode-change mapping and global
//! settings.
//!
//! Profiles are constructed by the (external) editor or deserializer and
//! handed to the engine fully built; this crate neither parses nor
//! serializes them.

use uuid::Uuid;

use crate::action::{Action, ModeAction};

type HashMap<K, V> = rustc_hash::FxHashMap<K, V>;

/// Identity of the distinguished default mode, index 0 of every profile.
pub const DEFAULT_MODE_UUID: Uuid = Uuid::from_u128(0x0fc4_ce23_50ee_4e7c_b37e_c6b12e4c7dcd);

/// Identity of the distinguished on-screen keyboard mode, index 1 when
/// present.
pub const ON_SCREEN_KEYBOARD_MODE_UUID: Uuid =
    Uuid::from_u128(0xdaf5_4f9d_2cf1_4cc4_bfd1_e406a9e69d2f);

/// A named bundle of physical-input-to-action mappings. Identity is the UUID:
/// it is never reused, survives cloning, and two modes are equal iff their
/// UUIDs match. Actions are owned by value, so a clone is a deep copy that
/// can be mutated independently.
#[derive(Debug, Clone)]
pub struct Mode {
    uuid: Uuid,
    description: String,
    axis_actions: HashMap<u16, Vec<Action>>,
    button_actions: HashMap<u16, Vec<Action>>,
}

impl Mode {
    pub fn new(description: impl Into<String>) -> Self {
        Self::with_uuid(Uuid::new_v4(), description)
    }

    pub fn with_uuid(uuid: Uuid, description: impl Into<String>) -> Self {
        Self {
            uuid,
            description: description.into(),
            axis_actions: HashMap::default(),
            button_actions: HashMap::default(),
        }
    }

    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn set_description(&mut self, description: impl Into<String>) {
        self.description = description.into();
    }

    /// Appends an action to the given physical axis. Insertion order within
    /// the list is significant: actions run in list order on every tick.
    pub fn add_axis_action(&mut self, axis: u16, action: Action) {
        self.axis_actions.entry(axis).or_default().push(action);
    }

    pub fn add_button_action(&mut self, button: u16, action: Action) {
        self.button_actions.entry(button).or_default().push(action);
    }

    pub fn axis_actions(&self) -> &HashMap<u16, Vec<Action>> {
        &self.axis_actions
    }

    pub fn button_actions(&self) -> &HashMap<u16, Vec<Action>> {
        &self.button_actions
    }

    pub(crate) fn axis_actions_mut(&mut self) -> &mut HashMap<u16, Vec<Action>> {
        &mut self.axis_actions
    }

    pub(crate) fn button_actions_mut(&mut self) -> &mut HashMap<u16, Vec<Action>> {
        &mut self.button_actions
    }

    /// Iterates every action in this mode, axis actions first.
    pub fn all_actions_mut(&mut self) -> impl Iterator<Item = &mut Action> {
        self.axis_actions
            .values_mut()
            .chain(self.button_actions.values_mut())
            .flat_map(|actions| actions.iter_mut())
    }
}

impl PartialEq for Mode {
    fn eq(&self, other: &Self) -> bool {
        self.uuid == other.uuid
    }
}

impl Eq for Mode {}

/// Profile-global settings, editable outside the engine.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Interval in milliseconds at which the output target repeats held
    /// keystrokes.
    pub key_repeat_interval_ms: u64,
    pub show_overlay: bool,
    pub show_vr_overlay: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            key_repeat_interval_ms: 30,
            show_overlay: true,
            show_vr_overlay: false,
        }
    }
}

/// An ordered collection of modes plus the global button→mode-change mapping.
///
/// The mode list invariant (default mode first, on-screen keyboard mode
/// second when present, the rest sorted by description) is established when
/// the engine accepts the profile, not at construction time.
#[derive(Debug, Clone)]
pub struct Profile {
    modes: Vec<Mode>,
    mode_actions: HashMap<u16, Vec<ModeAction>>,
    settings: Settings,
}

impl Profile {
    pub fn new() -> Self {
        Self {
            modes: vec![Mode::with_uuid(DEFAULT_MODE_UUID, "Default mode")],
            mode_actions: HashMap::default(),
            settings: Settings::default(),
        }
    }

    pub fn modes(&self) -> &[Mode] {
        &self.modes
    }

    pub fn modes_mut(&mut self) -> &mut Vec<Mode> {
        &mut self.modes
    }

    pub fn add_mode(&mut self, mode: Mode) {
        self.modes.push(mode);
    }

    pub fn mode_index(&self, uuid: Uuid) -> Option<usize> {
        self.modes.iter().position(|mode| mode.uuid() == uuid)
    }

    /// Binds a mode-change action to a physical button. These bindings are
    /// global: they apply regardless of which mode is active.
    pub fn add_mode_action(&mut self, button: u16, action: ModeAction) {
        self.mode_actions.entry(button).or_default().push(action);
    }

    pub fn mode_actions(&self) -> &HashMap<u16, Vec<ModeAction>> {
        &self.mode_actions
    }

    pub(crate) fn mode_actions_mut(&mut self) -> &mut HashMap<u16, Vec<ModeAction>> {
        &mut self.mode_actions
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn settings_mut(&mut self) -> &mut Settings {
        &mut self.settings
    }

    /// Establishes the mode list order: default mode first, on-screen
    /// keyboard mode second, remaining modes alphabetically by description.
    pub(crate) fn sort_modes(&mut self) {
        self.modes.sort_by(|a, b| {
            use std::cmp::Ordering;
            let rank = |mode: &Mode| match mode.uuid() {
                DEFAULT_MODE_UUID => 0,
                ON_SCREEN_KEYBOARD_MODE_UUID => 1,
                _ => 2,
            };
            match rank(a).cmp(&rank(b)) {
                Ordering::Equal => a.description().cmp(b.description()),
                unequal => unequal,
            }
        });
    }
}

impl Default for Profile {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::action::Action;
    use crate::engine::VirtualAxis;

    #[test]
    fn mode_equality_is_uuid_only() {
        let a = Mode::new("one");
        let mut b = a.clone();
        b.set_description("two");
        assert_eq!(a, b);
        assert_ne!(Mode::new("one"), Mode::new("one"));
    }

    #[test]
    fn mode_clone_is_deep() {
        let mut mode = Mode::new("base");
        mode.add_axis_action(0, Action::axis_to_axis(VirtualAxis::X));
        let mut copy = mode.clone();
        match copy.axis_actions_mut().get_mut(&0).unwrap()[0] {
            Action::AxisToAxis { ref mut invert, .. } => *invert = true,
            _ => unreachable!(),
        }
        match mode.axis_actions()[&0][0] {
            Action::AxisToAxis { invert, .. } => assert!(!invert),
            _ => unreachable!(),
        }
    }

    #[test]
    fn modes_sort_with_distinguished_modes_first() {
        let mut profile = Profile::new();
        profile.add_mode(Mode::new("zulu"));
        profile.add_mode(Mode::new("alpha"));
        profile.add_mode(Mode::with_uuid(ON_SCREEN_KEYBOARD_MODE_UUID, "keyboard"));
        profile.sort_modes();

        let uuids: Vec<_> = profile.modes().iter().map(Mode::uuid).collect();
        assert_eq!(uuids[0], DEFAULT_MODE_UUID);
        assert_eq!(uuids[1], ON_SCREEN_KEYBOARD_MODE_UUID);
        let descriptions: Vec<_> = profile.modes()[2..]
            .iter()
            .map(Mode::description)
            .collect();
        assert_eq!(descriptions, vec!["alpha", "zulu"]);
    }
}
