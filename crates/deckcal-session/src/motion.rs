//! Motion controller seam and an in-memory gantry for tests and dry runs.

use crate::types::Axis;
use deckcal_core::Transform;
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

/// Hardware-level motion failure. Passed through to the caller unmodified.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MotionError {
    #[error("motor stalled on axis {axis}")]
    Stall { axis: Axis },
    #[error("motion timed out")]
    Timeout,
    #[error("gantry is not homed")]
    NotHomed,
}

/// Drives the gantry carriage. Positions are the physical carriage pose in
/// machine coordinates; implementations block until the motion completes.
pub trait MotionController: Send + Sync {
    fn move_to(&self, target: &Transform) -> Result<(), MotionError>;
    fn move_relative(&self, axis: Axis, distance: f64) -> Result<(), MotionError>;
    fn current_position(&self) -> Transform;
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Default)]
struct GateState {
    open: bool,
    waiting: usize,
}

/// Holds motions back until opened. Lets tests observe a motion in flight.
#[derive(Debug, Default)]
pub struct MotionGate {
    state: Mutex<GateState>,
    changed: Condvar,
}

impl MotionGate {
    pub fn closed() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn open(&self) {
        lock(&self.state).open = true;
        self.changed.notify_all();
    }

    /// Block until at least `n` motions are parked on the gate.
    pub fn wait_for_waiters(&self, n: usize) {
        let mut state = lock(&self.state);
        while state.waiting < n {
            state = self
                .changed
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    fn pass(&self) {
        let mut state = lock(&self.state);
        state.waiting += 1;
        self.changed.notify_all();
        while !state.open {
            state = self
                .changed
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
        state.waiting -= 1;
    }
}

#[derive(Debug)]
struct GantryState {
    position: Transform,
    homed: bool,
    faults: VecDeque<MotionError>,
    motions: usize,
}

/// Frictionless gantry: every motion lands exactly where commanded.
#[derive(Debug)]
pub struct SimulatedGantry {
    state: Mutex<GantryState>,
    gate: Option<Arc<MotionGate>>,
}

impl Default for SimulatedGantry {
    fn default() -> Self {
        Self::homed_at(Transform::identity())
    }
}

impl SimulatedGantry {
    pub fn homed_at(position: Transform) -> Self {
        Self {
            state: Mutex::new(GantryState {
                position,
                homed: true,
                faults: VecDeque::new(),
                motions: 0,
            }),
            gate: None,
        }
    }

    pub fn unhomed() -> Self {
        let gantry = Self::default();
        lock(&gantry.state).homed = false;
        gantry
    }

    pub fn with_gate(mut self, gate: Arc<MotionGate>) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn home(&self, position: Transform) {
        let mut state = lock(&self.state);
        state.position = position;
        state.homed = true;
    }

    /// Queue a failure for the next motion. Failed motions leave the
    /// carriage where it was.
    pub fn inject_fault(&self, fault: MotionError) {
        lock(&self.state).faults.push_back(fault);
    }

    /// Number of motions that completed successfully.
    pub fn motion_count(&self) -> usize {
        lock(&self.state).motions
    }

    fn run(&self, apply: impl FnOnce(&mut Transform)) -> Result<(), MotionError> {
        if let Some(gate) = &self.gate {
            gate.pass();
        }
        let mut state = lock(&self.state);
        if !state.homed {
            return Err(MotionError::NotHomed);
        }
        if let Some(fault) = state.faults.pop_front() {
            debug!("simulated gantry fault: {fault}");
            return Err(fault);
        }
        apply(&mut state.position);
        state.motions += 1;
        Ok(())
    }
}

impl MotionController for SimulatedGantry {
    fn move_to(&self, target: &Transform) -> Result<(), MotionError> {
        self.run(|pos| *pos = *target)
    }

    fn move_relative(&self, axis: Axis, distance: f64) -> Result<(), MotionError> {
        self.run(|pos| {
            let mut delta = [0.0; 3];
            delta[axis.index()] = distance;
            *pos = Transform::from_translation(delta[0], delta[1], delta[2]) * *pos;
        })
    }

    fn current_position(&self) -> Transform {
        lock(&self.state).position
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use std::thread;

    #[test]
    fn relative_moves_accumulate_in_machine_frame() {
        let gantry = SimulatedGantry::homed_at(Transform::from_translation(10.0, 20.0, 30.0));
        gantry.move_relative(Axis::X, 1.5).expect("x");
        gantry.move_relative(Axis::Z, -4.5).expect("z");
        let p = gantry.current_position().position();
        assert_abs_diff_eq!(p.x, 11.5, epsilon = 1e-12);
        assert_abs_diff_eq!(p.y, 20.0, epsilon = 1e-12);
        assert_abs_diff_eq!(p.z, 25.5, epsilon = 1e-12);
        assert_eq!(gantry.motion_count(), 2);
    }

    #[test]
    fn injected_faults_fire_once_and_keep_position() {
        let gantry = SimulatedGantry::default();
        gantry.inject_fault(MotionError::Stall { axis: Axis::Y });
        let target = Transform::from_translation(5.0, 5.0, 5.0);
        assert_eq!(
            gantry.move_to(&target),
            Err(MotionError::Stall { axis: Axis::Y })
        );
        assert_eq!(gantry.current_position(), Transform::identity());
        gantry.move_to(&target).expect("second attempt");
        assert_eq!(gantry.current_position(), target);
    }

    #[test]
    fn unhomed_gantry_refuses_motion() {
        let gantry = SimulatedGantry::unhomed();
        assert_eq!(
            gantry.move_relative(Axis::X, 1.0),
            Err(MotionError::NotHomed)
        );
        gantry.home(Transform::identity());
        assert!(gantry.move_relative(Axis::X, 1.0).is_ok());
    }

    #[test]
    fn gate_parks_motion_until_opened() {
        let gate = MotionGate::closed();
        let gantry = Arc::new(SimulatedGantry::default().with_gate(Arc::clone(&gate)));

        let worker = {
            let gantry = Arc::clone(&gantry);
            thread::spawn(move || gantry.move_relative(Axis::Y, 2.0))
        };
        gate.wait_for_waiters(1);
        assert_eq!(gantry.motion_count(), 0);
        gate.open();
        worker.join().expect("join").expect("motion");
        assert_eq!(gantry.motion_count(), 1);
    }
}
