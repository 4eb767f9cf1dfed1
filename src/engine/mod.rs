//! The input polling and action-dispatch engine.
//!
//! One [`Engine`] instance is driven by a single polling loop owned by the
//! active output target. Every [`Engine::poll`] call runs one full
//! sample/dispatch cycle: suspension bookkeeping, axis smoothing,
//! circular-to-square stick correction, mode-stack action resolution, action
//! execution and the mode-change sweep, in that order. Actions never see the
//! engine itself; they operate on the [`EngineContext`] passed into every
//! invocation.

use std::sync::Arc;
use std::time::{Duration, Instant};

use uuid::Uuid;

use crate::controller::{
    AXIS_COUNT, BUTTON_COUNT, ControllerBackend, ControllerInfo, GamepadState, axis as physical,
};
use crate::frontend::{Frontend, Haptics, OnScreenKeyboard};
use crate::output::{MAX_N_BUTTONS, OutputParams, SharedOutput};
use crate::profile::{Mode, Profile};

mod axis;
mod hotswap;

pub use axis::{VirtualAxis, map_circular_to_square, normalize};

use hotswap::HotSwapState;

type HashMap<K, V> = rustc_hash::FxHashMap<K, V>;
type HashSet<T> = rustc_hash::FxHashSet<T>;

/// Number of virtual output axes.
pub const VIRTUAL_AXIS_COUNT: usize = 8;

/// Raw axis magnitude at or below which a pending suspension is cancelled:
/// the user has visibly released the axis.
const ABORT_SUSPENSION_DEADZONE: f32 = 0.25;

/// How long a suspended axis stays suspended unless cancelled early.
const SUSPENSION_TIME: Duration = Duration::from_millis(500);

/// Upper bound on mode-change sweep repetitions within one tick. Two
/// mode-change actions that kept re-triggering each other would otherwise
/// loop forever.
const MAX_MODE_ACTION_WALKS: usize = 8;

/// One entered layer on the mode stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModeLayer {
    /// Physical button whose mode-change action entered this layer.
    pub button: u16,
    /// The layer's target mode.
    pub mode: Uuid,
}

/// Stack of active mode layers. Entry 0 is the base (no layering) marker and
/// never holds a layer; entered layers sit above it, most recent first.
#[derive(Debug)]
pub struct ModeStack {
    layers: Vec<Option<ModeLayer>>,
}

impl ModeStack {
    fn new() -> Self {
        Self {
            layers: vec![None],
        }
    }

    pub fn is_layered(&self) -> bool {
        self.layers.len() > 1
    }

    /// Entered layers, most recent first. The base marker is skipped.
    pub fn entered(&self) -> impl Iterator<Item = &ModeLayer> {
        self.layers[1..].iter().flatten()
    }

    fn push(&mut self, layer: ModeLayer) {
        self.layers.insert(1, Some(layer));
    }

    fn remove(&mut self, button: u16, mode: Uuid) {
        if let Some(pos) = self.layers[1..]
            .iter()
            .position(|l| *l == Some(ModeLayer { button, mode }))
        {
            self.layers.remove(pos + 1);
        }
    }

    fn top(&self) -> Option<ModeLayer> {
        self.layers.get(1).copied().flatten()
    }

    fn clear(&mut self) {
        self.layers.truncate(1);
    }
}

/// Mutable engine state handed by reference into every action invocation and
/// into the on-screen keyboard's injection pass. This is the entire surface
/// an action may touch; there are no ambient globals.
pub struct EngineContext {
    axes: [i32; VIRTUAL_AXIS_COUNT],
    pending_axis_targets: HashMap<VirtualAxis, i32>,
    suspended_axes: HashMap<u16, Instant>,
    mode_stack: ModeStack,
    active_mode_index: usize,
    /// UUID of each profile mode by list index, refreshed on profile
    /// acceptance so mode-change actions can resolve targets without
    /// touching the profile mid-dispatch.
    mode_uuids: Vec<Uuid>,
    /// Physical axes mapped by each profile mode, used to suspend them when
    /// the mode's layer is left.
    mode_axis_keys: Vec<Vec<u16>>,
    buttons: Vec<bool>,
    captured_buttons: HashSet<u16>,
    output: Option<OutputParams>,
    shared: Arc<SharedOutput>,
    haptics: Option<Box<dyn Haptics>>,
    planck_length: f32,
    rate_multiplier: f32,
    now: Instant,
    repeat_walk_requested: bool,
}

impl EngineContext {
    fn new(shared: Arc<SharedOutput>) -> Self {
        Self {
            axes: [0; VIRTUAL_AXIS_COUNT],
            pending_axis_targets: HashMap::default(),
            suspended_axes: HashMap::default(),
            mode_stack: ModeStack::new(),
            active_mode_index: 0,
            mode_uuids: Vec::new(),
            mode_axis_keys: Vec::new(),
            buttons: Vec::new(),
            captured_buttons: HashSet::default(),
            output: None,
            shared,
            haptics: None,
            planck_length: 0.0,
            rate_multiplier: 0.0,
            now: Instant::now(),
            repeat_walk_requested: false,
        }
    }

    /// Timestamp of the tick currently being processed.
    pub fn now(&self) -> Instant {
        self.now
    }

    /// Elapsed seconds since the previous tick; rate-based actions scale
    /// their per-tick contribution by this.
    pub fn rate_multiplier(&self) -> f32 {
        self.rate_multiplier
    }

    /// Float-space size of one integer axis step.
    pub fn planck_length(&self) -> f32 {
        self.planck_length
    }

    pub fn shared(&self) -> &SharedOutput {
        &self.shared
    }

    /// Parameters of the attached output target. Polling before an output
    /// target is attached is a contract violation, hence the hard failure.
    pub fn output(&self) -> OutputParams {
        self.output
            .expect("output target must be attached before polling")
    }

    /// Sets a virtual-button value for this tick. Writes past the attached
    /// output's button count are dropped.
    pub fn set_button(&mut self, id: u16, value: bool) {
        match self.buttons.get_mut(id as usize) {
            Some(slot) => *slot = value,
            None => log::warn!("unable to set value for non-existent virtual button {id}"),
        }
    }

    pub fn button(&self, id: u16) -> bool {
        self.buttons.get(id as usize).copied().unwrap_or(false)
    }

    /// Disables ordinary action routing for a physical axis until the
    /// suspension expires or the axis returns to center.
    pub fn suspend_axis(&mut self, axis: u16) {
        self.suspended_axes.insert(axis, self.now + SUSPENSION_TIME);
    }

    pub fn is_axis_suspended(&self, axis: u16) -> bool {
        self.suspended_axes.contains_key(&axis)
    }

    /// Marks a button as owned by a recognized long press. Later actions in
    /// the same dispatch list observe the button as released.
    pub fn capture_button(&mut self, button: u16) {
        self.captured_buttons.insert(button);
    }

    pub fn release_button_capture(&mut self, button: u16) {
        self.captured_buttons.remove(&button);
    }

    pub fn is_button_captured(&self, button: u16) -> bool {
        self.captured_buttons.contains(&button)
    }

    pub fn mode_stack(&self) -> &ModeStack {
        &self.mode_stack
    }

    pub fn active_mode_index(&self) -> usize {
        self.active_mode_index
    }

    pub fn active_mode_uuid(&self) -> Option<Uuid> {
        self.mode_uuids.get(self.active_mode_index).copied()
    }

    pub fn mode_index(&self, mode: Uuid) -> Option<usize> {
        self.mode_uuids.iter().position(|&uuid| uuid == mode)
    }

    /// Enters a mode layer and makes its target mode active. Called by
    /// mode-change actions on activation.
    pub fn enter_mode_layer(&mut self, button: u16, mode: Uuid) {
        let Some(index) = self.mode_index(mode) else {
            return;
        };
        self.mode_stack.push(ModeLayer { button, mode });
        self.active_mode_index = index;
    }

    /// Leaves a mode layer, suspends every physical axis the departing mode
    /// mapped (residual stick deflection must not leak into the underlying
    /// mode) and re-activates the surviving top layer's mode or the default.
    pub fn leave_mode_layer(&mut self, button: u16, mode: Uuid) {
        self.mode_stack.remove(button, mode);
        if let Some(index) = self.mode_index(mode) {
            let axes: Vec<u16> = self.mode_axis_keys[index].clone();
            for axis in axes {
                self.suspend_axis(axis);
            }
        }
        self.active_mode_index = self
            .mode_stack
            .top()
            .and_then(|layer| self.mode_index(layer.mode))
            .unwrap_or(0);
    }

    /// Asks the engine to run the mode-change sweep once more this tick,
    /// because a layer transition made another binding on the same button
    /// relevant. At most one repeat per action per tick takes effect.
    pub fn request_repeat_mode_action_walk(&mut self) {
        self.repeat_walk_requested = true;
    }

    fn sync_profile(&mut self, profile: &Profile) {
        self.mode_uuids = profile.modes().iter().map(Mode::uuid).collect();
        self.mode_axis_keys = profile
            .modes()
            .iter()
            .map(|mode| mode.axis_actions().keys().copied().collect())
            .collect();
        self.mode_stack.clear();
        self.active_mode_index = 0;
    }
}

/// Which of a mode's two mapping tables to resolve against.
#[derive(Debug, Clone, Copy)]
enum Component {
    Axis,
    Button,
}

/// The polling engine. See the module docs for the tick structure.
pub struct Engine {
    controller: ControllerInfo,
    backend: Box<dyn ControllerBackend>,
    frontend: Box<dyn Frontend>,
    on_screen_keyboard: Option<Box<dyn OnScreenKeyboard>>,
    profile: Profile,
    ctx: EngineContext,
    last_poll: Option<Instant>,
    prev_mode_index: usize,
    hot_swap: HotSwapState,
    initialized: bool,
    skip_axis_initialization: bool,
}

impl Engine {
    pub fn new(
        controller: ControllerInfo,
        backend: Box<dyn ControllerBackend>,
        frontend: Box<dyn Frontend>,
    ) -> Self {
        let mut ctx = EngineContext::new(SharedOutput::new());
        let profile = Profile::new();
        ctx.sync_profile(&profile);
        Self {
            controller,
            backend,
            frontend,
            on_screen_keyboard: None,
            profile,
            ctx,
            last_poll: None,
            prev_mode_index: 0,
            hot_swap: HotSwapState::new(Instant::now()),
            initialized: false,
            skip_axis_initialization: false,
        }
    }

    /// Builds an engine that carries over virtual-axis values from a previous
    /// engine, the hot-swap hand-off path: outputs must not jump when the
    /// active controller changes.
    pub fn with_axes(
        controller: ControllerInfo,
        backend: Box<dyn ControllerBackend>,
        frontend: Box<dyn Frontend>,
        axes: [i32; VIRTUAL_AXIS_COUNT],
    ) -> Self {
        let mut engine = Self::new(controller, backend, frontend);
        engine.ctx.axes = axes;
        engine.skip_axis_initialization = true;
        engine
    }

    /// Attaches the output target's parameters. Must happen before the first
    /// [`Engine::poll`].
    pub fn attach_output(&mut self, params: OutputParams) {
        self.ctx.buttons = vec![false; params.n_buttons.min(MAX_N_BUTTONS)];
        self.ctx.output = Some(params);
    }

    pub fn set_haptics(&mut self, haptics: Option<Box<dyn Haptics>>) {
        self.ctx.haptics = haptics;
    }

    pub fn set_on_screen_keyboard(&mut self, keyboard: Option<Box<dyn OnScreenKeyboard>>) {
        self.on_screen_keyboard = keyboard;
    }

    /// One-time setup after the output target is attached: resolves the
    /// hot-swap configuration, computes the planck length and runs every
    /// initializable action.
    pub fn init(&mut self) {
        let params = self.ctx.output();
        self.ctx.planck_length = 2.0 / params.axis_range() as f32;

        self.init_hot_swap();

        let Self { profile, ctx, .. } = self;
        for mode in profile.modes_mut() {
            for action in mode.all_actions_mut() {
                action.init(ctx);
            }
        }
        self.initialized = true;
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// True when this engine carried axis values over from a predecessor;
    /// the output target must not re-center axes on start in that case.
    pub fn skips_axis_initialization(&self) -> bool {
        self.skip_axis_initialization
    }

    /// True while a hot-swap trigger is configured and armed.
    pub fn is_hot_swap_armed(&self) -> bool {
        self.hot_swap.is_armed()
    }

    pub fn controller(&self) -> &ControllerInfo {
        &self.controller
    }

    pub fn profile(&self) -> &Profile {
        &self.profile
    }

    pub fn active_mode(&self) -> &Mode {
        &self.profile.modes()[self.ctx.active_mode_index]
    }

    pub fn shared(&self) -> Arc<SharedOutput> {
        self.ctx.shared.clone()
    }

    pub fn axis_value(&self, virtual_axis: VirtualAxis) -> i32 {
        self.ctx.axes[virtual_axis.index()]
    }

    pub fn axes(&self) -> [i32; VIRTUAL_AXIS_COUNT] {
        self.ctx.axes
    }

    pub fn buttons(&self) -> &[bool] {
        &self.ctx.buttons
    }

    pub fn rate_multiplier(&self) -> f32 {
        self.ctx.rate_multiplier
    }

    pub fn key_repeat_interval_ms(&self) -> u64 {
        self.profile.settings().key_repeat_interval_ms
    }

    pub fn move_axis(&mut self, virtual_axis: VirtualAxis, target: f32) {
        self.ctx.move_axis(virtual_axis, target);
    }

    pub fn set_axis(
        &mut self,
        virtual_axis: VirtualAxis,
        value: f32,
        haptic_feedback: bool,
        detent: Option<f32>,
    ) {
        self.ctx.set_axis(virtual_axis, value, haptic_feedback, detent);
    }

    pub fn suspend_axis(&mut self, axis: u16) {
        self.ctx.suspend_axis(axis);
    }

    pub fn is_axis_suspended(&self, axis: u16) -> bool {
        self.ctx.is_axis_suspended(axis)
    }

    /// Validates and adopts a new profile. Returns false (leaving the
    /// previous profile active) if any referenced physical index is out of
    /// range for the controller class. On acceptance the mode list order and
    /// the per-button long-press-first action order are established, and the
    /// mode stack is cleared.
    ///
    /// Must not be called while a `poll` is in flight.
    pub fn set_profile(&mut self, mut profile: Profile) -> bool {
        let valid_button = |button: u16| (button as usize) < BUTTON_COUNT;
        let valid_axis = |axis: u16| (axis as usize) < AXIS_COUNT;

        if profile.modes().is_empty() {
            log::warn!("rejecting profile: no modes");
            return false;
        }
        for &button in profile.mode_actions().keys() {
            if !valid_button(button) {
                log::warn!("rejecting profile: mode-change binding on invalid button {button}");
                return false;
            }
        }
        for mode in profile.modes() {
            for &axis in mode.axis_actions().keys() {
                if !valid_axis(axis) {
                    log::warn!(
                        "rejecting profile: mode '{}' maps invalid axis {axis}",
                        mode.description()
                    );
                    return false;
                }
            }
            for &button in mode.button_actions().keys() {
                if !valid_button(button) {
                    log::warn!(
                        "rejecting profile: mode '{}' maps invalid button {button}",
                        mode.description()
                    );
                    return false;
                }
            }
        }

        profile.sort_modes();
        for mode in profile.modes_mut() {
            for actions in mode.button_actions_mut().values_mut() {
                // Stable: equal-classified actions keep their insertion order.
                actions.sort_by_key(|action| !action.is_long_press());
            }
        }

        self.ctx.sync_profile(&profile);
        self.profile = profile;
        self.prev_mode_index = 0;
        true
    }

    /// Returns the engine to a freshly-attached state without discarding the
    /// profile. Must not be called while a `poll` is in flight.
    pub fn reset(&mut self) {
        self.ctx.shared.take_clear_scheduled();
        self.ctx.repeat_walk_requested = false;
        self.initialized = false;
        self.skip_axis_initialization = false;
        self.last_poll = None;
        self.ctx.rate_multiplier = 0.0;
        self.ctx.pending_axis_targets.clear();
        self.ctx.suspended_axes.clear();
        self.ctx.captured_buttons.clear();
        self.ctx.mode_stack.clear();
        self.ctx.active_mode_index = 0;
        self.prev_mode_index = 0;
        self.hot_swap = HotSwapState::new(Instant::now());

        for actions in self.profile.mode_actions_mut().values_mut() {
            for action in actions {
                action.reset();
            }
        }
        for mode in self.profile.modes_mut() {
            for action in mode.all_actions_mut() {
                action.reset();
            }
        }
    }

    /// Runs one sampling/dispatch cycle. Returns false if the controller
    /// sample could not be obtained; the caller should treat that as a
    /// disconnect and stop the output target.
    pub fn poll(&mut self) -> bool {
        self.poll_at(Instant::now())
    }

    pub(crate) fn poll_at(&mut self, now: Instant) -> bool {
        assert!(
            self.ctx.output.is_some(),
            "output target must be attached before polling"
        );

        // 1. Elapsed time. The first tick uses the output's nominal poll
        // interval so the rate multiplier never sees a zero or huge jump.
        let elapsed_ms = match self.last_poll {
            Some(prev) => now.duration_since(prev).as_millis() as u64,
            None => self.ctx.output().poll_interval_ms,
        };
        self.last_poll = Some(now);
        self.ctx.now = now;
        self.ctx.rate_multiplier = elapsed_ms as f32 / 1000.0;

        // 2. Suspension GC.
        self.ctx.suspended_axes.retain(|_, expiry| *expiry > now);

        self.poll_hot_swap(now);

        // 3. Raw sample. Nothing further is mutated on failure.
        let mut state = GamepadState::default();
        if !self.backend.poll_state(self.controller.id, &mut state) {
            return false;
        }

        // 4. The one-shot button array is fully recomputed every tick.
        self.ctx.buttons.fill(false);

        // 5. Deferred full-state clear.
        if self.ctx.shared.take_clear_scheduled() {
            self.ctx.shared.clear_down_state();
            if let Some(keyboard) = self.on_screen_keyboard.as_mut() {
                keyboard.force_repoll();
            }
        }

        // 6. On-screen keyboard injection, ahead of ordinary dispatch.
        if let Some(keyboard) = self.on_screen_keyboard.as_mut() {
            if keyboard.is_visible() {
                keyboard.poll(&mut self.ctx);
            }
        }

        // 7. Axis smoothing.
        self.ctx.step_axis_smoothing();

        // 8. Circular-to-square correction for both stick pairs.
        correct_stick_pair(&mut state, physical::LEFT_X, physical::LEFT_Y);
        correct_stick_pair(&mut state, physical::RIGHT_X, physical::RIGHT_Y);

        {
            let Self { profile, ctx, .. } = self;

            // 9. Per-axis dispatch.
            for axis in 0..AXIS_COUNT as u16 {
                let value = state.axes[axis as usize];

                if value.abs() <= ABORT_SUSPENSION_DEADZONE {
                    ctx.suspended_axes.remove(&axis);
                }

                if let Some(mode_index) = resolve_mode(profile, ctx, Component::Axis, axis) {
                    let actions = profile.modes_mut()[mode_index]
                        .axis_actions_mut()
                        .get_mut(&axis)
                        .expect("resolved mode maps this axis");
                    for action in actions.iter_mut() {
                        action.handle_axis(ctx, axis, value);
                    }
                }
            }

            // 10. Per-button dispatch.
            for button in 0..BUTTON_COUNT as u16 {
                let pressed = state.buttons[button as usize];

                if let Some(mode_index) = resolve_mode(profile, ctx, Component::Button, button) {
                    let actions = profile.modes_mut()[mode_index]
                        .button_actions_mut()
                        .get_mut(&button)
                        .expect("resolved mode maps this button");
                    for action in actions.iter_mut() {
                        action.handle_button(ctx, button, pressed);
                    }
                }
            }

            // 11. Mode-change sweep, re-run while transitions request it.
            let mut walks = 0;
            loop {
                ctx.repeat_walk_requested = false;
                for button in 0..BUTTON_COUNT as u16 {
                    if let Some(actions) = profile.mode_actions_mut().get_mut(&button) {
                        let pressed = state.buttons[button as usize];
                        for action in actions.iter_mut() {
                            action.handle_button(ctx, button, pressed);
                        }
                    }
                }
                if !ctx.repeat_walk_requested {
                    break;
                }
                walks += 1;
                if walks >= MAX_MODE_ACTION_WALKS {
                    log::warn!(
                        "mode-change actions kept re-triggering each other, \
                         stopping the sweep after {MAX_MODE_ACTION_WALKS} walks"
                    );
                    break;
                }
            }
        }

        if self.ctx.active_mode_index != self.prev_mode_index {
            self.prev_mode_index = self.ctx.active_mode_index;
            log::info!(
                "entered mode '{}'",
                self.profile.modes()[self.ctx.active_mode_index].description()
            );
        }

        // 12. Publish. The frontend re-queries indicator values at its
        // leisure; this must never block the tick.
        self.ctx.publish_axis_indicators();
        self.frontend.notify_axis_indicators();

        true
    }
}

/// Resolves which mode's table applies to a physical index: the active mode,
/// else the first entered layer (newest first) whose target mode maps the
/// index, else the default mode at list index 0.
fn resolve_mode(
    profile: &Profile,
    ctx: &EngineContext,
    component: Component,
    index: u16,
) -> Option<usize> {
    let maps_index = |mode: &Mode| match component {
        Component::Axis => mode
            .axis_actions()
            .get(&index)
            .is_some_and(|actions| !actions.is_empty()),
        Component::Button => mode
            .button_actions()
            .get(&index)
            .is_some_and(|actions| !actions.is_empty()),
    };

    let modes = profile.modes();
    if maps_index(&modes[ctx.active_mode_index]) {
        return Some(ctx.active_mode_index);
    }
    for layer in ctx.mode_stack.entered() {
        if let Some(i) = profile.mode_index(layer.mode) {
            if maps_index(&modes[i]) {
                return Some(i);
            }
        }
    }
    if maps_index(&modes[0]) { Some(0) } else { None }
}

fn correct_stick_pair(state: &mut GamepadState, x_index: usize, y_index: usize) {
    let (x, y) = map_circular_to_square(state.axes[x_index], state.axes[y_index]);
    state.axes[x_index] = x;
    state.axes[y_index] = y;
}


#[cfg(test)]
mod test {
    use super::*;
    use crate::action::{Action, ModeAction};
    use crate::controller::ControllerId;
    use crate::output::KeyStroke;
    use crate::profile::DEFAULT_MODE_UUID;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[derive(Default)]
    struct BackendState {
        gamepad: Mutex<GamepadState>,
        others: Mutex<Vec<(ControllerInfo, GamepadState)>>,
        fail: AtomicBool,
    }

    struct TestBackend(Arc<BackendState>);

    impl ControllerBackend for TestBackend {
        fn poll_state(&mut self, id: ControllerId, state: &mut GamepadState) -> bool {
            if id == 0 {
                if self.0.fail.load(Ordering::Relaxed) {
                    return false;
                }
                *state = *self.0.gamepad.lock();
                return true;
            }
            for (info, other_state) in self.0.others.lock().iter() {
                if info.id == id {
                    *state = *other_state;
                    return true;
                }
            }
            false
        }

        fn present_controllers(&self) -> Vec<ControllerInfo> {
            let mut present = vec![ControllerInfo {
                id: 0,
                name: "primary".into(),
            }];
            present.extend(self.0.others.lock().iter().map(|(info, _)| info.clone()));
            present
        }
    }

    #[derive(Default)]
    struct FrontendState {
        swap_requests: Mutex<Vec<ControllerInfo>>,
        hot_swap_button: Option<u16>,
    }

    struct TestFrontend(Arc<FrontendState>);

    impl Frontend for TestFrontend {
        fn hot_swap_button(&self) -> Option<u16> {
            self.0.hot_swap_button
        }

        fn request_controller_swap(&self, target: ControllerInfo) {
            self.0.swap_requests.lock().push(target);
        }
    }

    fn test_output_params() -> OutputParams {
        OutputParams {
            min_axis_value: -32768,
            max_axis_value: 32767,
            n_buttons: 64,
            poll_interval_ms: 16,
        }
    }

    fn test_engine() -> (Engine, Arc<BackendState>, Arc<FrontendState>) {
        let backend_state = Arc::new(BackendState::default());
        let frontend_state = Arc::new(FrontendState::default());
        let mut engine = Engine::new(
            ControllerInfo {
                id: 0,
                name: "primary".into(),
            },
            Box::new(TestBackend(backend_state.clone())),
            Box::new(TestFrontend(frontend_state.clone())),
        );
        engine.attach_output(test_output_params());
        (engine, backend_state, frontend_state)
    }

    fn tick(engine: &mut Engine, now: Instant) -> bool {
        engine.poll_at(now)
    }

    #[test]
    fn poll_fails_without_sample() {
        let (mut engine, backend, _) = test_engine();
        backend.fail.store(true, Ordering::Relaxed);
        assert!(!engine.poll_at(Instant::now()));
    }

    #[test]
    fn axis_to_button_drives_virtual_button() {
        let (mut engine, backend, _) = test_engine();
        let mut profile = Profile::new();
        profile.modes_mut()[0].add_axis_action(4, Action::axis_to_button(3));
        assert!(engine.set_profile(profile));

        backend.gamepad.lock().axes[4] = 0.8;
        assert!(engine.poll_at(Instant::now()));
        assert!(engine.buttons()[3]);

        backend.gamepad.lock().axes[4] = 0.0;
        assert!(engine.poll_at(Instant::now()));
        assert!(!engine.buttons()[3]);
    }

    #[test]
    fn stacked_layer_wins_over_default_mode() {
        let (mut engine, backend, _) = test_engine();

        let mut profile = Profile::new();
        profile.modes_mut()[0].add_axis_action(4, Action::axis_to_button(3));
        let mut lower = Mode::new("lower layer");
        lower.add_axis_action(4, Action::axis_to_button(4));
        let upper = Mode::new("upper layer");
        profile.add_mode_action(0, ModeAction::new(lower.uuid()));
        profile.add_mode_action(1, ModeAction::new(upper.uuid()));
        profile.add_mode(lower);
        profile.add_mode(upper);
        assert!(engine.set_profile(profile));

        // First tick enters both layers via the mode-change sweep.
        let t0 = Instant::now();
        {
            let mut gamepad = backend.gamepad.lock();
            gamepad.buttons[0] = true;
            gamepad.buttons[1] = true;
        }
        assert!(tick(&mut engine, t0));
        assert_eq!(engine.mode_stack_depth(), 3);
        assert_eq!(engine.active_mode().description(), "upper layer");

        // The active (upper) layer leaves axis 4 unmapped; the stacked lower
        // layer must win over the default mode.
        backend.gamepad.lock().axes[4] = 0.9;
        assert!(tick(&mut engine, t0 + Duration::from_millis(16)));
        assert!(engine.buttons()[4]);
        assert!(!engine.buttons()[3]);
    }

    #[test]
    fn suspension_clears_inside_deadzone_only() {
        let (mut engine, backend, _) = test_engine();
        let t0 = Instant::now();

        engine.suspend_axis(4);
        backend.gamepad.lock().axes[4] = 0.9;
        assert!(tick(&mut engine, t0));
        assert!(engine.is_axis_suspended(4));

        backend.gamepad.lock().axes[4] = 0.1;
        assert!(tick(&mut engine, t0 + Duration::from_millis(16)));
        assert!(!engine.is_axis_suspended(4));
    }

    #[test]
    fn suspension_expires_after_timeout() {
        let (mut engine, backend, _) = test_engine();
        let t0 = Instant::now();

        engine.ctx.now = t0;
        engine.suspend_axis(4);
        backend.gamepad.lock().axes[4] = 0.9;
        assert!(tick(&mut engine, t0));
        assert!(engine.is_axis_suspended(4));
        assert!(tick(&mut engine, t0 + Duration::from_millis(600)));
        assert!(!engine.is_axis_suspended(4));
    }

    #[test]
    fn set_profile_rejects_out_of_range_button() {
        let (mut engine, _, _) = test_engine();

        let mut good = Profile::new();
        good.modes_mut()[0].set_description("accepted");
        assert!(engine.set_profile(good));

        let mut bad = Profile::new();
        bad.add_mode_action(999, ModeAction::new(DEFAULT_MODE_UUID));
        assert!(!engine.set_profile(bad));
        assert_eq!(engine.profile().modes()[0].description(), "accepted");

        let mut bad_axis = Profile::new();
        bad_axis.modes_mut()[0].add_axis_action(6, Action::axis_to_button(0));
        assert!(!engine.set_profile(bad_axis));
        assert_eq!(engine.profile().modes()[0].description(), "accepted");
    }

    #[test]
    fn long_press_actions_sort_first() {
        let (mut engine, _, _) = test_engine();
        let mut profile = Profile::new();
        profile.modes_mut()[0].add_button_action(0, Action::button_to_button(1));
        profile.modes_mut()[0].add_button_action(0, Action::button_to_button_long_press(2));
        assert!(engine.set_profile(profile));

        let actions = &engine.profile().modes()[0].button_actions()[&0];
        assert!(actions[0].is_long_press());
        assert!(!actions[1].is_long_press());
    }

    #[test]
    fn long_press_suppresses_plain_action_once_recognized() {
        let (mut engine, backend, _) = test_engine();
        let mut profile = Profile::new();
        profile.modes_mut()[0].add_button_action(0, Action::button_to_button(1));
        profile.modes_mut()[0].add_button_action(
            0,
            Action::ButtonToKeyStroke {
                key_stroke: KeyStroke::new(vec![30], vec![]),
                down_up: false,
                was_up: false,
                long_press: crate::action::LongPress::classified(),
            },
        );
        assert!(engine.set_profile(profile));

        let t0 = Instant::now();
        backend.gamepad.lock().buttons[0] = true;
        assert!(tick(&mut engine, t0));
        // Short hold: the plain action fires, the long press does not.
        assert!(engine.buttons()[1]);
        assert!(engine.shared().down_key_strokes().is_empty());

        assert!(tick(&mut engine, t0 + Duration::from_millis(600)));
        // Recognized hold: the keystroke is down and the button captured.
        assert!(!engine.buttons()[1]);
        assert_eq!(engine.shared().down_key_strokes().len(), 1);

        backend.gamepad.lock().buttons[0] = false;
        assert!(tick(&mut engine, t0 + Duration::from_millis(620)));
        assert!(!engine.buttons()[1]);
        assert!(engine.shared().down_key_strokes().is_empty());
    }

    #[test]
    fn move_axis_converges_without_overshoot() {
        let (mut engine, _, _) = test_engine();
        engine.move_axis(VirtualAxis::X, 1.0);

        let t0 = Instant::now();
        let mut now = t0;
        let mut previous = engine.axis_value(VirtualAxis::X);
        assert!(tick(&mut engine, now));
        let first = engine.axis_value(VirtualAxis::X);
        assert!(first > previous);
        assert!(first <= 32767);

        let mut ticks = 0;
        loop {
            previous = engine.axis_value(VirtualAxis::X);
            now += Duration::from_millis(16);
            assert!(tick(&mut engine, now));
            let current = engine.axis_value(VirtualAxis::X);
            assert!(current >= previous, "smoothing must be monotonic");
            assert!(current <= 32767, "smoothing must not overshoot");
            if current == 32767 {
                break;
            }
            ticks += 1;
            assert!(ticks < 10_000, "smoothing must converge");
        }
    }

    #[test]
    fn mode_layer_release_restores_default_and_suspends_axes() {
        let (mut engine, backend, _) = test_engine();

        let mut profile = Profile::new();
        let mut layer = Mode::new("held layer");
        layer.add_axis_action(4, Action::axis_to_button(4));
        profile.add_mode_action(0, ModeAction::new(layer.uuid()));
        profile.add_mode(layer);
        assert!(engine.set_profile(profile));

        let t0 = Instant::now();
        backend.gamepad.lock().buttons[0] = true;
        assert!(tick(&mut engine, t0));
        assert_eq!(engine.active_mode().description(), "held layer");

        backend.gamepad.lock().buttons[0] = false;
        assert!(tick(&mut engine, t0 + Duration::from_millis(16)));
        assert_eq!(engine.active_mode().uuid(), DEFAULT_MODE_UUID);
        assert!(engine.is_axis_suspended(4));
    }

    #[test]
    fn deferred_clear_wipes_down_state_on_next_poll() {
        let (mut engine, _, _) = test_engine();
        let shared = engine.shared();
        shared.press_key_stroke(KeyStroke::new(vec![30], vec![]));
        shared.press_mouse_button(1);
        shared.schedule_clear_on_next_poll();

        assert!(engine.poll_at(Instant::now()));
        assert!(shared.down_key_strokes().is_empty());
        assert!(shared.down_mouse_buttons().is_empty());
    }

    #[test]
    fn hot_swap_fires_on_release_edge_and_disarms() {
        let (mut engine, backend, frontend_state) = test_engine();

        let other = ControllerInfo {
            id: 7,
            name: "second".into(),
        };
        backend
            .others
            .lock()
            .push((other.clone(), GamepadState::default()));
        engine.hot_swap.arm(Some(2));

        // Past the initial grace suspension.
        let t0 = Instant::now() + Duration::from_secs(3);
        backend.others.lock()[0].1.buttons[2] = true;
        assert!(tick(&mut engine, t0));
        backend.others.lock()[0].1.buttons[2] = false;
        assert!(tick(&mut engine, t0 + Duration::from_millis(60)));

        let requests = frontend_state.swap_requests.lock();
        assert_eq!(requests.as_slice(), &[other]);
        assert!(!engine.hot_swap.is_armed());
    }

    #[test]
    fn with_axes_carries_values_over() {
        let backend_state = Arc::new(BackendState::default());
        let frontend_state = Arc::new(FrontendState::default());
        let mut engine = Engine::with_axes(
            ControllerInfo {
                id: 0,
                name: "primary".into(),
            },
            Box::new(TestBackend(backend_state)),
            Box::new(TestFrontend(frontend_state)),
            [100, -200, 300, 0, 0, 0, 0, 0],
        );
        engine.attach_output(test_output_params());
        assert!(engine.skips_axis_initialization());
        assert_eq!(engine.axis_value(VirtualAxis::X), 100);
        assert_eq!(engine.axis_value(VirtualAxis::Y), -200);
        assert_eq!(engine.axis_value(VirtualAxis::Z), 300);
    }

    struct InjectingKeyboard;

    impl OnScreenKeyboard for InjectingKeyboard {
        fn is_visible(&self) -> bool {
            true
        }

        fn poll(&mut self, ctx: &mut EngineContext) {
            ctx.set_button(9, true);
            ctx.move_axis(VirtualAxis::S0, 1.0);
        }

        fn force_repoll(&mut self) {}
    }

    #[test]
    fn on_screen_keyboard_injects_before_dispatch() {
        let (mut engine, _, _) = test_engine();
        engine.set_on_screen_keyboard(Some(Box::new(InjectingKeyboard)));

        assert!(engine.poll_at(Instant::now()));
        // The injected button survives the per-tick reset (it runs after),
        // and the injected smoothing target was stepped this same tick.
        assert!(engine.buttons()[9]);
        assert!(engine.axis_value(VirtualAxis::S0) > 0);
    }

    #[test]
    fn reset_clears_runtime_state() {
        let (mut engine, backend, _) = test_engine();

        let mut profile = Profile::new();
        let layer = Mode::new("held layer");
        profile.add_mode_action(0, ModeAction::new(layer.uuid()));
        profile.add_mode(layer);
        assert!(engine.set_profile(profile));

        backend.gamepad.lock().buttons[0] = true;
        engine.move_axis(VirtualAxis::X, 1.0);
        engine.suspend_axis(3);
        assert!(engine.poll_at(Instant::now()));
        assert_ne!(engine.active_mode().uuid(), DEFAULT_MODE_UUID);

        engine.reset();
        assert_eq!(engine.active_mode().uuid(), DEFAULT_MODE_UUID);
        assert!(!engine.is_axis_suspended(3));
        assert_eq!(engine.mode_stack_depth(), 1);
        assert_eq!(engine.rate_multiplier(), 0.0);
    }

    impl Engine {
        fn mode_stack_depth(&self) -> usize {
            self.ctx.mode_stack.layers.len()
        }
    }
}
