//! Concrete action variants and the execution contract they satisfy.
//!
//! Every action is one variant of the closed [`Action`] enum, carrying its
//! own configuration and transient state by value. Dispatch happens through
//! [`Action::handle_axis`] / [`Action::handle_button`]; the optional
//! capabilities (init, reset, long-press classification, suspendability) are
//! plain methods that are no-ops for variants that do not opt in. Cloning an
//! action clones its state, which is what makes a [`crate::profile::Mode`]
//! clone a deep copy.

use std::time::{Duration, Instant};

use crate::engine::{EngineContext, VirtualAxis};
use crate::output::KeyStroke;

mod mode;
pub use mode::ModeAction;

/// How long a button must be held before a long-press classified action
/// recognizes the hold and captures the button.
pub(crate) const LONG_PRESS_DURATION: Duration = Duration::from_millis(500);

/// The mouse axis a cursor action drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorAxis {
    X,
    Y,
}

/// Long-press classification state shared by the button-to-* variants.
///
/// When enabled, the owning action only sees a "pressed" value once the hold
/// passes [`LONG_PRESS_DURATION`]; at that moment the button is captured in
/// the engine context so later, non-long-press actions in the same list (the
/// ordering rule of profile acceptance puts them after this one) observe the
/// button as released for the remainder of the hold.
#[derive(Debug, Clone, Default)]
pub struct LongPress {
    pub enabled: bool,
    press_start: Option<Instant>,
}

impl LongPress {
    pub fn classified() -> Self {
        Self {
            enabled: true,
            press_start: None,
        }
    }

    /// Maps the raw pressed value to the value the owning action should act
    /// on, updating capture state as a side effect.
    fn filter(&mut self, ctx: &mut EngineContext, button: u16, pressed: bool) -> bool {
        if !self.enabled {
            return pressed && !ctx.is_button_captured(button);
        }
        if pressed {
            let start = *self.press_start.get_or_insert(ctx.now());
            if ctx.now().duration_since(start) >= LONG_PRESS_DURATION {
                ctx.capture_button(button);
                true
            } else {
                false
            }
        } else {
            self.press_start = None;
            ctx.release_button_capture(button);
            false
        }
    }

    fn reset(&mut self) {
        self.press_start = None;
    }
}

#[derive(Debug, Clone)]
pub enum Action {
    /// Absolute mapping of a physical axis onto a virtual axis.
    AxisToAxis {
        virtual_axis: VirtualAxis,
        invert: bool,
        haptic_feedback: bool,
        detent: Option<f32>,
    },
    /// Rate-multiplied incremental motion of a virtual axis, scaled by
    /// sensitivity. Deflections finer than one integer step (the planck
    /// length) are dropped to avoid jitter around center.
    AxisToRelativeAxis {
        virtual_axis: VirtualAxis,
        sensitivity: f32,
        invert: bool,
        haptic_feedback: bool,
        detent: Option<f32>,
    },
    /// Presses a virtual button while the axis value is inside the
    /// activation window.
    AxisToButton {
        button_id: u16,
        min_axis_value: f32,
        max_axis_value: f32,
    },
    /// Drives a mouse button from an axis activation window, either held for
    /// the duration of the deflection or as a one-shot press-release.
    AxisToMouseButton {
        mouse_button: u8,
        min_axis_value: f32,
        max_axis_value: f32,
        down_up: bool,
        was_up: bool,
        initiator: bool,
    },
    /// Accumulates rate-multiplied cursor movement on one mouse axis.
    AxisToCursor {
        cursor_axis: CursorAxis,
        sensitivity: f32,
        deadzone: f32,
        remainder: f32,
    },
    /// Converts deflection into scroll clicks for the current tick.
    AxisToScroll {
        clicks: i32,
        deadzone: f32,
        invert: bool,
    },
    ButtonToButton {
        button_id: u16,
        long_press: LongPress,
    },
    ButtonToKeyStroke {
        key_stroke: KeyStroke,
        down_up: bool,
        was_up: bool,
        long_press: LongPress,
    },
    ButtonToMouseButton {
        mouse_button: u8,
        down_up: bool,
        was_up: bool,
        initiator: bool,
        long_press: LongPress,
    },
    /// Toggles a lock key (caps/num/scroll) on each press edge.
    ButtonToLockKey {
        key: u16,
        on: bool,
        was_down: bool,
    },
    /// Runs the next of an owned list of sub-actions on each press cycle.
    ButtonToCycle {
        actions: Vec<Action>,
        index: usize,
        was_down: bool,
    },
    /// Feeds the axis smoother toward a target value while held, producing
    /// rate-limited travel instead of a jump.
    ButtonToRelativeAxis {
        virtual_axis: VirtualAxis,
        target_value: f32,
    },
}

impl Action {
    pub fn axis_to_axis(virtual_axis: VirtualAxis) -> Self {
        Self::AxisToAxis {
            virtual_axis,
            invert: false,
            haptic_feedback: false,
            detent: None,
        }
    }

    pub fn axis_to_button(button_id: u16) -> Self {
        Self::AxisToButton {
            button_id,
            min_axis_value: 0.5,
            max_axis_value: 1.0,
        }
    }

    pub fn button_to_button(button_id: u16) -> Self {
        Self::ButtonToButton {
            button_id,
            long_press: LongPress::default(),
        }
    }

    pub fn button_to_button_long_press(button_id: u16) -> Self {
        Self::ButtonToButton {
            button_id,
            long_press: LongPress::classified(),
        }
    }

    pub fn button_to_key_stroke(key_stroke: KeyStroke) -> Self {
        Self::ButtonToKeyStroke {
            key_stroke,
            down_up: false,
            was_up: false,
            long_press: LongPress::default(),
        }
    }

    /// Whether this action is long-press classified. Profile acceptance
    /// stably sorts long-press actions ahead of plain ones per button.
    pub fn is_long_press(&self) -> bool {
        match self {
            Action::ButtonToButton { long_press, .. }
            | Action::ButtonToKeyStroke { long_press, .. }
            | Action::ButtonToMouseButton { long_press, .. } => long_press.enabled,
            _ => false,
        }
    }

    /// One-time setup when the engine is attached. Variants without the
    /// capability are skipped, which is normal.
    pub fn init(&mut self, _ctx: &EngineContext) {
        if let Action::AxisToCursor { remainder, .. } = self {
            *remainder = 0.0;
        }
    }

    /// Clears transient state so a stopped engine starts clean.
    pub fn reset(&mut self) {
        match self {
            Action::AxisToMouseButton {
                was_up, initiator, ..
            } => {
                *was_up = false;
                *initiator = false;
            }
            Action::AxisToCursor { remainder, .. } => *remainder = 0.0,
            Action::ButtonToButton { long_press, .. } => long_press.reset(),
            Action::ButtonToKeyStroke {
                was_up, long_press, ..
            } => {
                *was_up = false;
                long_press.reset();
            }
            Action::ButtonToMouseButton {
                was_up,
                initiator,
                long_press,
                ..
            } => {
                *was_up = false;
                *initiator = false;
                long_press.reset();
            }
            Action::ButtonToLockKey { was_down, .. } => *was_down = false,
            Action::ButtonToCycle {
                actions,
                index,
                was_down,
            } => {
                *index = 0;
                *was_down = false;
                for action in actions {
                    action.reset();
                }
            }
            _ => {}
        }
    }

    /// Executes this action for one physical-axis sample. Button-side
    /// variants configured on an axis are skipped.
    pub fn handle_axis(&mut self, ctx: &mut EngineContext, axis: u16, value: f32) {
        match self {
            Action::AxisToAxis {
                virtual_axis,
                invert,
                haptic_feedback,
                detent,
            } => {
                let value = if *invert { -value } else { value };
                ctx.set_axis(*virtual_axis, value, *haptic_feedback, *detent);
            }
            Action::AxisToRelativeAxis {
                virtual_axis,
                sensitivity,
                invert,
                haptic_feedback,
                detent,
            } => {
                if ctx.is_axis_suspended(axis) {
                    return;
                }
                let value = if *invert { -value } else { value };
                let delta = value * *sensitivity * ctx.rate_multiplier();
                if delta.abs() < ctx.planck_length() {
                    return;
                }
                let target = (ctx.axis_value_normalized(*virtual_axis) + delta).clamp(-1.0, 1.0);
                ctx.set_axis(*virtual_axis, target, *haptic_feedback, *detent);
            }
            Action::AxisToButton {
                button_id,
                min_axis_value,
                max_axis_value,
            } => {
                let down = !ctx.is_axis_suspended(axis)
                    && value >= *min_axis_value
                    && value <= *max_axis_value;
                ctx.set_button(*button_id, down);
            }
            Action::AxisToMouseButton {
                mouse_button,
                min_axis_value,
                max_axis_value,
                down_up,
                was_up,
                initiator,
            } => {
                let active = !ctx.is_axis_suspended(axis)
                    && value >= *min_axis_value
                    && value <= *max_axis_value;
                if active {
                    if *down_up {
                        if *was_up {
                            ctx.shared().tap_mouse_button(*mouse_button);
                            *initiator = true;
                            *was_up = false;
                        }
                    } else {
                        ctx.shared().press_mouse_button(*mouse_button);
                        *initiator = true;
                    }
                } else if *down_up {
                    *was_up = true;
                } else if *initiator {
                    ctx.shared().release_mouse_button(*mouse_button);
                    *initiator = false;
                }
            }
            Action::AxisToCursor {
                cursor_axis,
                sensitivity,
                deadzone,
                remainder,
            } => {
                if ctx.is_axis_suspended(axis) || value.abs() <= *deadzone {
                    return;
                }
                let travel = value * *sensitivity * ctx.rate_multiplier() + *remainder;
                let whole = travel.trunc();
                *remainder = travel - whole;
                if whole != 0.0 {
                    match cursor_axis {
                        CursorAxis::X => ctx.shared().add_cursor_delta(whole as i32, 0),
                        CursorAxis::Y => ctx.shared().add_cursor_delta(0, whole as i32),
                    }
                }
            }
            Action::AxisToScroll {
                clicks,
                deadzone,
                invert,
            } => {
                if ctx.is_axis_suspended(axis) || value.abs() <= *deadzone {
                    ctx.shared().set_scroll_clicks(0);
                    return;
                }
                let value = if *invert { -value } else { value };
                ctx.shared().set_scroll_clicks((value * *clicks as f32) as i32);
            }
            _ => {}
        }
    }

    /// Executes this action for one physical-button sample. Axis-side
    /// variants configured on a button are skipped.
    pub fn handle_button(&mut self, ctx: &mut EngineContext, button: u16, pressed: bool) {
        match self {
            Action::ButtonToButton {
                button_id,
                long_press,
            } => {
                let pressed = long_press.filter(ctx, button, pressed);
                ctx.set_button(*button_id, pressed);
            }
            Action::ButtonToKeyStroke {
                key_stroke,
                down_up,
                was_up,
                long_press,
            } => {
                let pressed = long_press.filter(ctx, button, pressed);
                if *down_up {
                    if pressed {
                        if *was_up {
                            ctx.shared().tap_key_stroke(key_stroke.clone());
                            *was_up = false;
                        }
                    } else {
                        *was_up = true;
                    }
                } else if pressed {
                    ctx.shared().press_key_stroke(key_stroke.clone());
                } else {
                    ctx.shared().release_key_stroke(key_stroke);
                }
            }
            Action::ButtonToMouseButton {
                mouse_button,
                down_up,
                was_up,
                initiator,
                long_press,
            } => {
                let pressed = long_press.filter(ctx, button, pressed);
                if *down_up {
                    if pressed {
                        if *was_up {
                            ctx.shared().tap_mouse_button(*mouse_button);
                            *was_up = false;
                        }
                    } else {
                        *was_up = true;
                    }
                } else if pressed {
                    ctx.shared().press_mouse_button(*mouse_button);
                    *initiator = true;
                } else if *initiator {
                    ctx.shared().release_mouse_button(*mouse_button);
                    *initiator = false;
                }
            }
            Action::ButtonToLockKey { key, on, was_down } => {
                if pressed && !*was_down {
                    ctx.shared().set_lock_key(*key, *on);
                }
                *was_down = pressed;
            }
            Action::ButtonToCycle {
                actions,
                index,
                was_down,
            } => {
                if actions.is_empty() {
                    return;
                }
                if pressed && !*was_down {
                    actions[*index].handle_button(ctx, button, true);
                } else if !pressed && *was_down {
                    actions[*index].handle_button(ctx, button, false);
                    *index = (*index + 1) % actions.len();
                }
                *was_down = pressed;
            }
            Action::ButtonToRelativeAxis {
                virtual_axis,
                target_value,
            } => {
                if pressed {
                    ctx.move_axis(*virtual_axis, *target_value);
                }
            }
            _ => {}
        }
    }

    pub fn description(&self) -> String {
        match self {
            Action::AxisToAxis { virtual_axis, .. } => {
                format!("axis to virtual axis {virtual_axis:?}")
            }
            Action::AxisToRelativeAxis { virtual_axis, .. } => {
                format!("axis to relative virtual axis {virtual_axis:?}")
            }
            Action::AxisToButton { button_id, .. } => {
                format!("axis to virtual button {button_id}")
            }
            Action::AxisToMouseButton { mouse_button, .. } => {
                format!("axis to mouse button {mouse_button}")
            }
            Action::AxisToCursor { cursor_axis, .. } => {
                format!("axis to cursor {cursor_axis:?}")
            }
            Action::AxisToScroll { .. } => "axis to scroll".into(),
            Action::ButtonToButton { button_id, .. } => {
                format!("button to virtual button {button_id}")
            }
            Action::ButtonToKeyStroke { .. } => "button to keystroke".into(),
            Action::ButtonToMouseButton { mouse_button, .. } => {
                format!("button to mouse button {mouse_button}")
            }
            Action::ButtonToLockKey { key, .. } => format!("button to lock key {key}"),
            Action::ButtonToCycle { actions, .. } => {
                format!("button cycling {} actions", actions.len())
            }
            Action::ButtonToRelativeAxis { virtual_axis, .. } => {
                format!("button to relative virtual axis {virtual_axis:?}")
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::engine::test_support::test_context;

    #[test]
    fn axis_to_button_window() {
        let mut ctx = test_context();
        let mut action = Action::axis_to_button(3);
        action.handle_axis(&mut ctx, 0, 0.8);
        assert!(ctx.button(3));
        action.handle_axis(&mut ctx, 0, 0.2);
        assert!(!ctx.button(3));
    }

    #[test]
    fn axis_to_button_respects_suspension() {
        let mut ctx = test_context();
        ctx.suspend_axis(0);
        let mut action = Action::axis_to_button(3);
        action.handle_axis(&mut ctx, 0, 0.8);
        assert!(!ctx.button(3));
    }

    #[test]
    fn axis_to_mouse_button_down_up_fires_once_per_activation() {
        let mut ctx = test_context();
        let mut action = Action::AxisToMouseButton {
            mouse_button: 1,
            min_axis_value: 0.5,
            max_axis_value: 1.0,
            down_up: true,
            was_up: false,
            initiator: false,
        };
        // The axis rests at center first, arming the one-shot.
        action.handle_axis(&mut ctx, 0, 0.0);
        action.handle_axis(&mut ctx, 0, 0.9);
        action.handle_axis(&mut ctx, 0, 0.9);
        assert_eq!(ctx.shared().take_down_up_mouse_buttons(), vec![1]);
        action.handle_axis(&mut ctx, 0, 0.0);
        action.handle_axis(&mut ctx, 0, 0.9);
        assert_eq!(ctx.shared().take_down_up_mouse_buttons(), vec![1]);
    }

    #[test]
    fn button_to_mouse_button_releases_only_if_initiator() {
        let mut ctx = test_context();
        let mut action = Action::ButtonToMouseButton {
            mouse_button: 2,
            down_up: false,
            was_up: false,
            initiator: false,
            long_press: LongPress::default(),
        };
        // Another writer holds the button down; a release pass of this action
        // must not clear it.
        ctx.shared().press_mouse_button(2);
        action.handle_button(&mut ctx, 0, false);
        assert!(ctx.shared().is_mouse_button_down(2));

        action.handle_button(&mut ctx, 0, true);
        action.handle_button(&mut ctx, 0, false);
        assert!(!ctx.shared().is_mouse_button_down(2));
    }

    #[test]
    fn cycle_advances_on_release() {
        let mut ctx = test_context();
        let mut action = Action::ButtonToCycle {
            actions: vec![Action::button_to_button(10), Action::button_to_button(11)],
            index: 0,
            was_down: false,
        };
        action.handle_button(&mut ctx, 0, true);
        assert!(ctx.button(10));
        action.handle_button(&mut ctx, 0, false);
        action.handle_button(&mut ctx, 0, true);
        assert!(ctx.button(11));
    }

    #[test]
    fn lock_key_fires_on_press_edge_only() {
        let mut ctx = test_context();
        let mut action = Action::ButtonToLockKey {
            key: 20,
            on: true,
            was_down: false,
        };
        action.handle_button(&mut ctx, 0, true);
        action.handle_button(&mut ctx, 0, true);
        assert_eq!(ctx.shared().take_on_lock_keys(), vec![20]);
        assert!(ctx.shared().take_on_lock_keys().is_empty());
    }

    #[test]
    fn reset_restores_cycle_index() {
        let mut ctx = test_context();
        let mut action = Action::ButtonToCycle {
            actions: vec![Action::button_to_button(10), Action::button_to_button(11)],
            index: 0,
            was_down: false,
        };
        action.handle_button(&mut ctx, 0, true);
        action.handle_button(&mut ctx, 0, false);
        action.reset();
        action.handle_button(&mut ctx, 0, true);
        assert!(ctx.button(10));
    }
}
