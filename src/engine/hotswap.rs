//! Controller hot-swap detection.
//!
//! When several controllers of the supported class are present and a hot-swap
//! button is configured, the engine samples the *other* controllers' button
//! at a fixed sub-interval, decoupled from the main tick rate. A press
//! followed by a release on another controller hands the session over to it.

use std::time::{Duration, Instant};

use super::{Engine, HashSet};
use crate::controller::{BUTTON_COUNT, ControllerId, GamepadState};

const HOT_SWAP_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Grace period after engine creation before hot-swap sampling starts, so a
/// button held through a restart does not immediately swap back.
const HOT_SWAP_INITIAL_SUSPENSION: Duration = Duration::from_secs(2);

#[derive(Debug)]
pub(super) struct HotSwapState {
    button: Option<u16>,
    down_ids: HashSet<ControllerId>,
    next_poll: Instant,
}

impl HotSwapState {
    pub(super) fn new(now: Instant) -> Self {
        Self {
            button: None,
            down_ids: HashSet::default(),
            next_poll: now + HOT_SWAP_INITIAL_SUSPENSION,
        }
    }

    pub(super) fn arm(&mut self, button: Option<u16>) {
        self.button = button.filter(|&b| (b as usize) < BUTTON_COUNT);
    }

    pub(super) fn is_armed(&self) -> bool {
        self.button.is_some()
    }
}

impl Engine {
    /// Resolves the hot-swap configuration from the frontend. Only meaningful
    /// when more than one controller is present.
    pub(super) fn init_hot_swap(&mut self) {
        if self.backend.present_controllers().len() > 1 {
            self.hot_swap.arm(self.frontend.hot_swap_button());
        }
    }

    /// One hot-swap sampling pass, rate-limited to the sub-interval. A rising
    /// edge on another controller's designated button is recorded; the
    /// subsequent falling edge triggers the hand-off: the trigger is disarmed
    /// and the frontend asked to rebuild the engine around the new controller
    /// off the polling path.
    pub(super) fn poll_hot_swap(&mut self, now: Instant) {
        let Some(button) = self.hot_swap.button else {
            return;
        };
        if now < self.hot_swap.next_poll {
            return;
        }

        let mut state = GamepadState::default();
        for other in self.backend.present_controllers() {
            if other.id == self.controller.id {
                continue;
            }
            if !self.backend.poll_state(other.id, &mut state) {
                continue;
            }

            if state.buttons[button as usize] {
                self.hot_swap.down_ids.insert(other.id);
            } else if self.hot_swap.down_ids.contains(&other.id) {
                log::info!("initiating hot swap to '{}' ({})", other.name, other.id);
                self.hot_swap.button = None;
                self.frontend.request_controller_swap(other);
                break;
            }
        }

        self.hot_swap.next_poll = now + HOT_SWAP_POLL_INTERVAL;
    }
}
