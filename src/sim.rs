//! Scripted controller playback for driving the engine without hardware.
//!
//! A simulation script is a plain-text sequence of whitespace-separated
//! events, replayed by the `joymux` binary against a real engine instance:
//!
//! ```text
//! # comments run to end of line
//! a:0:1.0     set physical axis 0 to full deflection
//! d:3         press physical button 3
//! t:250       let the engine poll for 250 ms
//! u:3         release physical button 3
//! ```

use std::sync::Arc;

use anyhow::{Result, anyhow, bail};
use parking_lot::Mutex;

use crate::controller::{
    AXIS_COUNT, BUTTON_COUNT, ControllerBackend, ControllerId, ControllerInfo, GamepadState,
};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SimEvent {
    /// Keep polling for this many milliseconds.
    Wait(u64),
    /// Set a physical axis to a value in `[-1, 1]`.
    Axis(usize, f32),
    ButtonDown(usize),
    ButtonUp(usize),
}

/// Parses a simulation script. Errors carry the offending line number.
pub fn parse_script(script: &str) -> Result<Vec<SimEvent>> {
    let mut events = Vec::new();
    for (line_index, line) in script.lines().enumerate() {
        let line = line.split('#').next().unwrap_or_default();
        for token in line.split_whitespace() {
            events.push(
                parse_event(token)
                    .map_err(|e| anyhow!("line {}: {e}", line_index + 1))?,
            );
        }
    }
    Ok(events)
}

fn parse_event(token: &str) -> Result<SimEvent> {
    let (kind, rest) = token
        .split_once(':')
        .ok_or_else(|| anyhow!("malformed event {token:?}, expected kind:value"))?;
    match kind {
        "t" => Ok(SimEvent::Wait(rest.parse()?)),
        "a" => {
            let (index, value) = rest
                .split_once(':')
                .ok_or_else(|| anyhow!("malformed axis event {token:?}, expected a:index:value"))?;
            let index: usize = index.parse()?;
            let value: f32 = value.parse()?;
            if index >= AXIS_COUNT {
                bail!("axis index {index} out of range");
            }
            if !(-1.0..=1.0).contains(&value) {
                bail!("axis value {value} outside [-1, 1]");
            }
            Ok(SimEvent::Axis(index, value))
        }
        "d" | "u" => {
            let index: usize = rest.parse()?;
            if index >= BUTTON_COUNT {
                bail!("button index {index} out of range");
            }
            if kind == "d" {
                Ok(SimEvent::ButtonDown(index))
            } else {
                Ok(SimEvent::ButtonUp(index))
            }
        }
        _ => bail!("unknown event kind {kind:?}"),
    }
}

/// A controller backend fed from a script instead of hardware. The driver
/// mutates [`ScriptedController::state`] between polls; clones share the
/// same state.
#[derive(Clone)]
pub struct ScriptedController {
    pub state: Arc<Mutex<GamepadState>>,
    info: ControllerInfo,
}

impl ScriptedController {
    pub fn new(info: ControllerInfo) -> Self {
        Self {
            state: Arc::new(Mutex::new(GamepadState::default())),
            info,
        }
    }

    /// Applies one script event to the controller state. `Wait` events are
    /// the driver's concern and are ignored here.
    pub fn apply(&self, event: SimEvent) {
        let mut state = self.state.lock();
        match event {
            SimEvent::Wait(_) => {}
            SimEvent::Axis(index, value) => state.axes[index] = value,
            SimEvent::ButtonDown(index) => state.buttons[index] = true,
            SimEvent::ButtonUp(index) => state.buttons[index] = false,
        }
    }
}

impl ControllerBackend for ScriptedController {
    fn poll_state(&mut self, id: ControllerId, state: &mut GamepadState) -> bool {
        if id != self.info.id {
            return false;
        }
        *state = *self.state.lock();
        true
    }

    fn present_controllers(&self) -> Vec<ControllerInfo> {
        vec![self.info.clone()]
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parses_events_and_comments() {
        let events = parse_script("a:0:0.5 d:3\nt:100 # hold\nu:3\n").unwrap();
        assert_eq!(
            events,
            vec![
                SimEvent::Axis(0, 0.5),
                SimEvent::ButtonDown(3),
                SimEvent::Wait(100),
                SimEvent::ButtonUp(3),
            ]
        );
    }

    #[test]
    fn rejects_out_of_range_indices() {
        let err = parse_script("a:9:0.5").unwrap_err().to_string();
        assert!(err.contains("line 1"), "{err}");
        assert!(parse_script("d:99").is_err());
        assert!(parse_script("a:0:1.5").is_err());
        assert!(parse_script("x:1").is_err());
    }

    #[test]
    fn scripted_controller_replays_applied_state() {
        let info = ControllerInfo {
            id: 0,
            name: "scripted".into(),
        };
        let mut controller = ScriptedController::new(info);
        controller.apply(SimEvent::Axis(1, -0.25));
        controller.apply(SimEvent::ButtonDown(2));

        let mut state = GamepadState::default();
        assert!(controller.poll_state(0, &mut state));
        assert_eq!(state.axes[1], -0.25);
        assert!(state.buttons[2]);
        assert!(!controller.poll_state(1, &mut state));
    }
}
