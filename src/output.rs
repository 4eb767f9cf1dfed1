//! Output-side state: the parameters supplied by the active output target and
//! the shared block that actions write into and the output collaborator
//! drains every tick.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};

use parking_lot::Mutex;

use crate::engine::VIRTUAL_AXIS_COUNT;

type HashSet<T> = rustc_hash::FxHashSet<T>;

/// Upper bound on virtual buttons, regardless of what the output target
/// reports.
pub const MAX_N_BUTTONS: usize = 128;

/// Parameters the active output target supplies when it is attached to the
/// engine. The engine deliberately holds these values instead of a reference
/// back to the output object; the output owns the polling loop and drains
/// engine state itself, so a back-reference would only create a cycle.
#[derive(Debug, Clone, Copy)]
pub struct OutputParams {
    pub min_axis_value: i32,
    pub max_axis_value: i32,
    pub n_buttons: usize,
    pub poll_interval_ms: u64,
}

impl OutputParams {
    pub fn axis_range(&self) -> i32 {
        self.max_axis_value - self.min_axis_value
    }
}

/// A keystroke: one or more key codes pressed together with a set of modifier
/// codes. Key code values use the convention of the active output target.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct KeyStroke {
    pub key_codes: Vec<u16>,
    pub modifier_codes: Vec<u16>,
}

impl KeyStroke {
    pub fn new(key_codes: Vec<u16>, modifier_codes: Vec<u16>) -> Self {
        Self {
            key_codes,
            modifier_codes,
        }
    }
}

/// State shared between the polling thread and the UI/event thread.
///
/// The polling thread is the sole consumer of the read-then-clear fields
/// (cursor deltas, scroll clicks, the deferred-clear flag); both threads may
/// add and remove entries of the down-sets concurrently, e.g. the on-screen
/// keyboard pressing a mouse button from the UI thread while an action
/// releases it from the polling thread.
#[derive(Debug)]
pub struct SharedOutput {
    axis_indicators: [AtomicI32; VIRTUAL_AXIS_COUNT],
    down_key_strokes: Mutex<HashSet<KeyStroke>>,
    down_up_key_strokes: Mutex<HashSet<KeyStroke>>,
    down_mouse_buttons: Mutex<HashSet<u8>>,
    down_up_mouse_buttons: Mutex<HashSet<u8>>,
    on_lock_keys: Mutex<HashSet<u16>>,
    off_lock_keys: Mutex<HashSet<u16>>,
    cursor_delta_x: AtomicI32,
    cursor_delta_y: AtomicI32,
    scroll_clicks: AtomicI32,
    clear_scheduled: AtomicBool,
}

impl SharedOutput {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            axis_indicators: std::array::from_fn(|_| AtomicI32::new(0)),
            down_key_strokes: Mutex::new(HashSet::default()),
            down_up_key_strokes: Mutex::new(HashSet::default()),
            down_mouse_buttons: Mutex::new(HashSet::default()),
            down_up_mouse_buttons: Mutex::new(HashSet::default()),
            on_lock_keys: Mutex::new(HashSet::default()),
            off_lock_keys: Mutex::new(HashSet::default()),
            cursor_delta_x: AtomicI32::new(0),
            cursor_delta_y: AtomicI32::new(0),
            scroll_clicks: AtomicI32::new(0),
            clear_scheduled: AtomicBool::new(false),
        })
    }

    /// Requests that all currently-down keys and mouse buttons be cleared at
    /// the start of the next polling tick. Safe to call from any thread.
    pub fn schedule_clear_on_next_poll(&self) {
        self.clear_scheduled.store(true, Ordering::Release);
    }

    pub(crate) fn take_clear_scheduled(&self) -> bool {
        self.clear_scheduled.swap(false, Ordering::AcqRel)
    }

    pub(crate) fn clear_down_state(&self) {
        self.down_key_strokes.lock().clear();
        self.down_mouse_buttons.lock().clear();
    }

    pub fn press_key_stroke(&self, key_stroke: KeyStroke) {
        self.down_key_strokes.lock().insert(key_stroke);
    }

    pub fn release_key_stroke(&self, key_stroke: &KeyStroke) {
        self.down_key_strokes.lock().remove(key_stroke);
    }

    pub fn is_key_stroke_down(&self, key_stroke: &KeyStroke) -> bool {
        self.down_key_strokes.lock().contains(key_stroke)
    }

    /// Queues a one-shot press-then-release keystroke for the output target.
    pub fn tap_key_stroke(&self, key_stroke: KeyStroke) {
        self.down_up_key_strokes.lock().insert(key_stroke);
    }

    pub fn down_key_strokes(&self) -> Vec<KeyStroke> {
        self.down_key_strokes.lock().iter().cloned().collect()
    }

    /// Drains the queued one-shot keystrokes. Called by the output target.
    pub fn take_down_up_key_strokes(&self) -> Vec<KeyStroke> {
        self.down_up_key_strokes.lock().drain().collect()
    }

    pub fn press_mouse_button(&self, button: u8) {
        self.down_mouse_buttons.lock().insert(button);
    }

    pub fn release_mouse_button(&self, button: u8) {
        self.down_mouse_buttons.lock().remove(&button);
    }

    pub fn is_mouse_button_down(&self, button: u8) -> bool {
        self.down_mouse_buttons.lock().contains(&button)
    }

    pub fn tap_mouse_button(&self, button: u8) {
        self.down_up_mouse_buttons.lock().insert(button);
    }

    pub fn down_mouse_buttons(&self) -> Vec<u8> {
        self.down_mouse_buttons.lock().iter().copied().collect()
    }

    pub fn take_down_up_mouse_buttons(&self) -> Vec<u8> {
        self.down_up_mouse_buttons.lock().drain().collect()
    }

    pub fn set_lock_key(&self, key: u16, on: bool) {
        if on {
            self.on_lock_keys.lock().insert(key);
        } else {
            self.off_lock_keys.lock().insert(key);
        }
    }

    pub fn take_on_lock_keys(&self) -> Vec<u16> {
        self.on_lock_keys.lock().drain().collect()
    }

    pub fn take_off_lock_keys(&self) -> Vec<u16> {
        self.off_lock_keys.lock().drain().collect()
    }

    pub fn add_cursor_delta(&self, dx: i32, dy: i32) {
        self.cursor_delta_x.fetch_add(dx, Ordering::AcqRel);
        self.cursor_delta_y.fetch_add(dy, Ordering::AcqRel);
    }

    /// Drains the accumulated cursor movement. Called by the output target.
    pub fn take_cursor_delta(&self) -> (i32, i32) {
        (
            self.cursor_delta_x.swap(0, Ordering::AcqRel),
            self.cursor_delta_y.swap(0, Ordering::AcqRel),
        )
    }

    pub fn set_scroll_clicks(&self, clicks: i32) {
        self.scroll_clicks.store(clicks, Ordering::Release);
    }

    pub fn scroll_clicks(&self) -> i32 {
        self.scroll_clicks.load(Ordering::Acquire)
    }

    pub(crate) fn publish_axis_indicator(&self, index: usize, value: i32) {
        self.axis_indicators[index].store(value, Ordering::Release);
    }

    /// Last published value of a virtual axis, for overlay indicators. May lag
    /// the engine's internal value by up to one tick.
    pub fn axis_indicator(&self, index: usize) -> i32 {
        self.axis_indicators[index].load(Ordering::Acquire)
    }
}
