//! Virtual-axis identities, value-range plumbing, circular-to-square stick
//! correction and the rate-limited axis smoother.

use super::{EngineContext, VIRTUAL_AXIS_COUNT};

/// One of the 8 fixed logical output channels, independent of the physical
/// controller layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VirtualAxis {
    X,
    Y,
    Z,
    Rx,
    Ry,
    Rz,
    S0,
    S1,
}

impl VirtualAxis {
    pub const ALL: [VirtualAxis; VIRTUAL_AXIS_COUNT] = [
        VirtualAxis::X,
        VirtualAxis::Y,
        VirtualAxis::Z,
        VirtualAxis::Rx,
        VirtualAxis::Ry,
        VirtualAxis::Rz,
        VirtualAxis::S0,
        VirtualAxis::S1,
    ];

    pub fn index(self) -> usize {
        self as usize
    }
}

/// Smallest fraction of the axis range the smoother moves per second, applied
/// to tiny corrections.
const AXIS_MOVEMENT_MIN_DELTA_FACTOR: f32 = 0.1;

/// Largest fraction of the axis range the smoother moves per second, applied
/// to full-range corrections.
const AXIS_MOVEMENT_MAX_DELTA_FACTOR: f32 = 4.0;

/// Linear map of `value` from `[in_min, in_max]` onto `[out_min, out_max]`.
/// Degenerate input ranges map everything to `out_min`.
pub fn normalize(value: f32, in_min: f32, in_max: f32, out_min: f32, out_max: f32) -> f32 {
    let old_range = in_max - in_min;
    if old_range == 0.0 {
        return out_min;
    }
    (value - in_min) * (out_max - out_min) / old_range + out_min
}

/// Square-root arguments that come out a hair negative are floating-point
/// error, never a real negative; floor them to zero.
fn correct_numerical_imprecision(d: f64) -> f64 {
    if d < 1e-7 { 0.0 } else { d }
}

/// Maps a circular-constrained stick pair onto square-constrained axes via
/// the Fernandez elliptical-grid mapping, so diagonal deflection reaches the
/// full range of both axes.
pub fn map_circular_to_square(u: f32, v: f32) -> (f32, f32) {
    let u = f64::from(u.clamp(-1.0, 1.0));
    let v = f64::from(v.clamp(-1.0, 1.0));

    let u2 = u * u;
    let v2 = v * v;

    let subterm_x = 2.0 + u2 - v2;
    let subterm_y = 2.0 - u2 + v2;

    let two_sqrt_2 = 2.0 * std::f64::consts::SQRT_2;

    let term_x1 = correct_numerical_imprecision(subterm_x + u * two_sqrt_2);
    let term_x2 = correct_numerical_imprecision(subterm_x - u * two_sqrt_2);
    let term_y1 = correct_numerical_imprecision(subterm_y + v * two_sqrt_2);
    let term_y2 = correct_numerical_imprecision(subterm_y - v * two_sqrt_2);

    let x = 0.5 * term_x1.sqrt() - 0.5 * term_x2.sqrt();
    let y = 0.5 * term_y1.sqrt() - 0.5 * term_y2.sqrt();

    ((x as f32).clamp(-1.0, 1.0), (y as f32).clamp(-1.0, 1.0))
}

impl EngineContext {
    /// Converts a `[-1, 1]` float onto the output target's integer range.
    pub fn float_to_int_axis_value(&self, value: f32) -> i32 {
        let value = value.clamp(-1.0, 1.0);
        let params = self.output();
        normalize(
            value,
            -1.0,
            1.0,
            params.min_axis_value as f32,
            params.max_axis_value as f32,
        ) as i32
    }

    pub fn axis_value(&self, virtual_axis: VirtualAxis) -> i32 {
        self.axes[virtual_axis.index()]
    }

    /// Current axis value mapped back onto `[-1, 1]`.
    pub fn axis_value_normalized(&self, virtual_axis: VirtualAxis) -> f32 {
        let params = self.output();
        normalize(
            self.axes[virtual_axis.index()] as f32,
            params.min_axis_value as f32,
            params.max_axis_value as f32,
            -1.0,
            1.0,
        )
    }

    /// Sets a virtual axis immediately, clamped to the output range. With
    /// `haptic_feedback`, a changed value rumbles strongly when it lands on
    /// either extreme and lightly when it crosses the detent value.
    pub fn set_axis(
        &mut self,
        virtual_axis: VirtualAxis,
        value: f32,
        haptic_feedback: bool,
        detent: Option<f32>,
    ) {
        let value = self.float_to_int_axis_value(value);
        let detent = detent.map(|d| self.float_to_int_axis_value(d));
        self.set_axis_int(virtual_axis, value, haptic_feedback, detent);
    }

    pub(crate) fn set_axis_int(
        &mut self,
        virtual_axis: VirtualAxis,
        value: i32,
        haptic_feedback: bool,
        detent: Option<i32>,
    ) {
        let params = self.output();
        let value = value.clamp(params.min_axis_value, params.max_axis_value);

        let prev = self.axes[virtual_axis.index()];
        self.axes[virtual_axis.index()] = value;

        if haptic_feedback && prev != value {
            if let Some(haptics) = self.haptics.as_mut() {
                if value == params.min_axis_value || value == params.max_axis_value {
                    haptics.rumble_strong();
                } else if let Some(detent) = detent {
                    if (prev > detent && value <= detent) || (prev < detent && value >= detent) {
                        haptics.rumble_light();
                    }
                }
            }
        }
    }

    /// Records a smoothing target for the axis. The value is only pending if
    /// it differs from the current one; each tick then moves the axis toward
    /// it at a rate proportional to the remaining distance.
    pub fn move_axis(&mut self, virtual_axis: VirtualAxis, target: f32) {
        let target = self.float_to_int_axis_value(target);
        if self.axes[virtual_axis.index()] != target {
            self.pending_axis_targets.insert(virtual_axis, target);
        }
    }

    /// One smoothing step for every pending target. Steps are clamped so the
    /// value settles exactly on the target without oscillating.
    pub(crate) fn step_axis_smoothing(&mut self) {
        if self.pending_axis_targets.is_empty() {
            return;
        }
        let axis_range = self.output().axis_range();

        let pending = std::mem::take(&mut self.pending_axis_targets);
        for (virtual_axis, target) in pending {
            let current = self.axes[virtual_axis.index()];
            let delta = target - current;
            if delta == 0 {
                continue;
            }

            let delta_factor = normalize(
                delta.abs() as f32,
                0.0,
                axis_range as f32,
                AXIS_MOVEMENT_MIN_DELTA_FACTOR,
                AXIS_MOVEMENT_MAX_DELTA_FACTOR,
            );
            let step = delta.signum() * (axis_range as f32 * delta_factor * self.rate_multiplier) as i32;

            let mut new_value = current + step;
            if delta > 0 {
                new_value = new_value.min(target);
            } else {
                new_value = new_value.max(target);
            }

            self.set_axis_int(virtual_axis, new_value, false, None);

            if new_value != target {
                self.pending_axis_targets.insert(virtual_axis, target);
            }
        }
    }

    pub(crate) fn publish_axis_indicators(&self) {
        for virtual_axis in VirtualAxis::ALL {
            self.shared
                .publish_axis_indicator(virtual_axis.index(), self.axes[virtual_axis.index()]);
        }
    }
}
