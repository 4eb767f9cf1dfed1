//! The mode-change action bound at profile level to physical buttons.

use uuid::Uuid;

use crate::engine::EngineContext;

/// Switches the active mode by pushing/popping a layer on the engine's mode
/// stack. Momentary actions hold the layer while the button is down; toggle
/// actions flip it on each press edge.
#[derive(Debug, Clone)]
pub struct ModeAction {
    target_mode: Uuid,
    toggle: bool,
    was_down: bool,
    active: bool,
}

impl ModeAction {
    pub fn new(target_mode: Uuid) -> Self {
        Self {
            target_mode,
            toggle: false,
            was_down: false,
            active: false,
        }
    }

    pub fn toggle(target_mode: Uuid) -> Self {
        Self {
            toggle: true,
            ..Self::new(target_mode)
        }
    }

    pub fn target_mode(&self) -> Uuid {
        self.target_mode
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn handle_button(&mut self, ctx: &mut EngineContext, button: u16, pressed: bool) {
        if self.toggle {
            if pressed && !self.was_down {
                if self.active {
                    self.deactivate(ctx, button);
                } else {
                    self.activate(ctx, button);
                }
            }
        } else if pressed {
            if !self.active {
                self.activate(ctx, button);
            }
        } else if self.active {
            self.deactivate(ctx, button);
        }
        self.was_down = pressed;
    }

    fn activate(&mut self, ctx: &mut EngineContext, button: u16) {
        if ctx.active_mode_uuid() == Some(self.target_mode) {
            return;
        }
        if ctx.mode_index(self.target_mode).is_none() {
            log::warn!(
                "mode-change action on button {button} targets unknown mode {}",
                self.target_mode
            );
            return;
        }
        ctx.enter_mode_layer(button, self.target_mode);
        self.active = true;
        ctx.request_repeat_mode_action_walk();
    }

    fn deactivate(&mut self, ctx: &mut EngineContext, button: u16) {
        ctx.leave_mode_layer(button, self.target_mode);
        self.active = false;
        ctx.request_repeat_mode_action_walk();
    }

    pub fn reset(&mut self) {
        self.was_down = false;
        self.active = false;
    }

    pub fn description(&self) -> String {
        if self.toggle {
            format!("toggle mode {}", self.target_mode)
        } else {
            format!("hold mode {}", self.target_mode)
        }
    }
}
