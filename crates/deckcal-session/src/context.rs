//! The calibration context: one guarded session slot, the pose tree of the
//! gantry and the hardware seams, passed around by reference.
//!
//! Frames: the root node `deck` holds the deck correction `C` (nominal deck →
//! physical machine). The motion controller reports the physical carriage
//! pose `P`; the `gantry` node stores `C⁻¹·P` so that composing from the root
//! yields physical positions for every tool. Moves aim the configured
//! critical point at `C·N` for a nominal point `N`.

use crate::config::DeckCalibrationConfig;
use crate::error::CalibrationError;
use crate::motion::{MotionController, MotionError};
use crate::persist::DeckCalibrationFile;
use crate::pipette::{ConfigError, ModelRegistry, PipetteIdentityResolver, PipetteModel};
use crate::session::CalibrationSession;
use crate::types::{Axis, Mount, MoveTarget, PipetteIdentity, PointLabel, SessionToken};
use deckcal_core::{fit_deck_transform, CriticalPoint, DeckFit, PoseTree, Transform};
use log::{debug, info, warn};
use nalgebra::{Point2, Point3};
use serde::Serialize;
use std::sync::{
    Arc, Condvar, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard,
};
use std::time::{Duration, Instant};

#[cfg(feature = "tracing")]
use tracing::instrument;

pub const DECK_NODE: &str = "deck";
pub const GANTRY_NODE: &str = "gantry";

/// Returned by a successful start.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct StartResponse {
    pub token: SessionToken,
    pub pipette: PipetteIdentity,
    pub channels: u32,
}

struct ActiveSession {
    session: CalibrationSession,
    generation: u64,
    last_activity: Instant,
}

#[derive(Default)]
struct Slot {
    active: Option<ActiveSession>,
    motion_in_flight: bool,
    next_generation: u64,
}

impl Slot {
    fn holds(&self, token: &SessionToken) -> bool {
        self.active
            .as_ref()
            .is_some_and(|a| a.session.token() == token)
    }

    fn session_mut(&mut self, token: &SessionToken) -> Result<&mut ActiveSession, CalibrationError> {
        self.active
            .as_mut()
            .filter(|a| a.session.token() == token)
            .ok_or(CalibrationError::InvalidToken)
    }
}

/// Clears `motion_in_flight` and wakes waiters if a motion unwinds before
/// its completion ran.
struct InFlight<'a> {
    ctx: &'a DeckContext,
    armed: bool,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.ctx.lock_slot().motion_in_flight = false;
            self.ctx.motion_done.notify_all();
        }
    }
}

fn gantry_local(correction: &Transform, carriage: &Transform) -> Result<Transform, CalibrationError> {
    let inv = correction
        .inverse()
        .ok_or_else(|| ConfigError::Invalid("deck correction is not invertible".into()))?;
    Ok(inv * *carriage)
}

pub struct DeckContext {
    config: DeckCalibrationConfig,
    registry: ModelRegistry,
    motion: Arc<dyn MotionController>,
    pipettes: Arc<dyn PipetteIdentityResolver>,
    tree: RwLock<PoseTree>,
    slot: Mutex<Slot>,
    motion_done: Condvar,
}

impl DeckContext {
    /// Build the pose tree, load a stored calibration if one exists and
    /// register the pipettes currently attached.
    pub fn new(
        config: DeckCalibrationConfig,
        registry: ModelRegistry,
        motion: Arc<dyn MotionController>,
        pipettes: Arc<dyn PipetteIdentityResolver>,
    ) -> Result<Self, CalibrationError> {
        config.validate()?;

        let correction = match &config.calibration_path {
            Some(path) if path.exists() => {
                let file = DeckCalibrationFile::load_json(path)?;
                info!("loaded deck calibration from {}", path.display());
                file.gantry_calibration
            }
            _ => Transform::identity(),
        };

        let mut tree = PoseTree::with_root_transform(DECK_NODE, correction);
        tree.attach(
            GANTRY_NODE,
            DECK_NODE,
            gantry_local(&correction, &motion.current_position())?,
        )?;
        for mount in Mount::ALL {
            tree.attach(
                mount.mount_node(),
                GANTRY_NODE,
                config.mount_offsets.transform(mount),
            )?;
            tree.attach(mount.pipette_node(), mount.mount_node(), Transform::identity())?;
        }

        let ctx = Self {
            config,
            registry,
            motion,
            pipettes,
            tree: RwLock::new(tree),
            slot: Mutex::new(Slot::default()),
            motion_done: Condvar::new(),
        };
        for mount in Mount::ALL {
            if let Err(err) = ctx.refresh_pipette(mount) {
                warn!("pipette on {mount} mount left unregistered: {err}");
            }
        }
        Ok(ctx)
    }

    pub fn config(&self) -> &DeckCalibrationConfig {
        &self.config
    }

    pub fn registry(&self) -> &ModelRegistry {
        &self.registry
    }

    fn lock_slot(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn tree_read(&self) -> RwLockReadGuard<'_, PoseTree> {
        self.tree.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn tree_write(&self) -> RwLockWriteGuard<'_, PoseTree> {
        self.tree.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Re-read the pipette on `mount` and update its pose-tree node.
    ///
    /// Refused while the active session calibrates with that mount.
    pub fn refresh_pipette(&self, mount: Mount) -> Result<Option<PipetteModel>, CalibrationError> {
        let slot = self.lock_slot();
        if slot
            .active
            .as_ref()
            .is_some_and(|a| a.session.target().mount == mount)
        {
            return Err(CalibrationError::SessionConflict);
        }

        let model = match self.pipettes.attached_pipette(mount) {
            Some(identity) => Some(self.registry.resolve(&identity.model)?.clone()),
            None => None,
        };
        let node = mount.pipette_node();
        let mut tree = self.tree_write();
        match &model {
            Some(m) => {
                tree.set_local_transform(node, m.offset_transform())?;
                tree.set_end_effector(node, m.critical_points())?;
            }
            None => {
                tree.set_local_transform(node, Transform::identity())?;
                tree.clear_end_effector(node)?;
            }
        }
        drop(tree);
        drop(slot);
        debug!(
            "{mount} mount: {}",
            model.as_ref().map_or("empty", |m| m.name.as_str())
        );
        Ok(model)
    }

    /// Open a session on `mount`.
    #[cfg_attr(feature = "tracing", instrument(level = "info", skip(self)))]
    pub fn start(&self, mount: Mount) -> Result<StartResponse, CalibrationError> {
        let mut slot = self.lock_slot();
        self.reap_locked(&mut slot);
        if slot.active.is_some() {
            return Err(CalibrationError::SessionConflict);
        }
        self.open_session(&mut slot, mount)
    }

    /// Open a session on the first mount carrying a pipette. With `force`,
    /// an active session is released first.
    #[cfg_attr(feature = "tracing", instrument(level = "info", skip(self)))]
    pub fn start_any(&self, mount: Option<Mount>, force: bool) -> Result<StartResponse, CalibrationError> {
        let mut slot = self.lock_slot();
        self.reap_locked(&mut slot);
        if let Some(active) = slot.active.take() {
            if !force {
                slot.active = Some(active);
                return Err(CalibrationError::SessionConflict);
            }
            warn!(
                "force-releasing calibration session {}",
                active.session.token()
            );
            self.remove_tip(active.session.target());
        }
        let mount = match mount {
            Some(m) => m,
            None => Mount::ALL
                .into_iter()
                .find(|&m| self.pipettes.attached_pipette(m).is_some())
                .ok_or(CalibrationError::NoPipetteAttached(Mount::Left))?,
        };
        self.open_session(&mut slot, mount)
    }

    fn open_session(&self, slot: &mut Slot, mount: Mount) -> Result<StartResponse, CalibrationError> {
        let identity = self
            .pipettes
            .attached_pipette(mount)
            .ok_or(CalibrationError::NoPipetteAttached(mount))?;
        let model = self.registry.resolve(&identity.model)?;
        let target = PipetteIdentity {
            model: model.name.clone(),
            ..identity
        };

        {
            let node = mount.pipette_node();
            let mut tree = self.tree_write();
            tree.set_local_transform(node, model.offset_transform())?;
            tree.set_end_effector(node, model.critical_points())?;
        }

        let session = CalibrationSession::new(target);
        let response = StartResponse {
            token: *session.token(),
            pipette: session.target().clone(),
            channels: model.channels,
        };
        let generation = slot.next_generation;
        slot.next_generation += 1;
        slot.active = Some(ActiveSession {
            session,
            generation,
            last_activity: Instant::now(),
        });
        info!(
            "calibration session {} started on {mount} mount ({})",
            response.token, response.pipette.model
        );
        Ok(response)
    }

    /// Wait out any motion in flight and return the slot, provided `token`
    /// still names the active session.
    fn acquire(&self, token: &SessionToken) -> Result<MutexGuard<'_, Slot>, CalibrationError> {
        let mut slot = self.lock_slot();
        loop {
            self.reap_locked(&mut slot);
            if !slot.holds(token) {
                return Err(CalibrationError::InvalidToken);
            }
            if !slot.motion_in_flight {
                return Ok(slot);
            }
            slot = self
                .motion_done
                .wait(slot)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    fn with_session<T>(
        &self,
        token: &SessionToken,
        operation: &'static str,
        f: impl FnOnce(&mut CalibrationSession) -> Result<T, CalibrationError>,
    ) -> Result<T, CalibrationError> {
        let mut slot = self.acquire(token)?;
        let active = slot.session_mut(token)?;
        active.last_activity = Instant::now();
        let result = f(&mut active.session);
        active.session.record(operation, &result);
        if let Err(err) = &result {
            debug!("`{operation}` rejected: {err}");
        }
        result
    }

    /// Plan under the slot lock, drive the gantry without it, then apply the
    /// outcome only if the same session is still active.
    fn run_motion<T>(
        &self,
        token: &SessionToken,
        operation: &'static str,
        prepare: impl FnOnce(&CalibrationSession) -> Result<T, CalibrationError>,
        drive: impl FnOnce(&T) -> Result<(), MotionError>,
        complete: impl FnOnce(&mut CalibrationSession, &T),
    ) -> Result<T, CalibrationError> {
        let (generation, plan) = {
            let mut slot = self.acquire(token)?;
            let active = slot.session_mut(token)?;
            active.last_activity = Instant::now();
            let plan = match prepare(&active.session) {
                Ok(plan) => plan,
                Err(err) => {
                    debug!("`{operation}` rejected: {err}");
                    let failed = Err(err);
                    active.session.record(operation, &failed);
                    return failed;
                }
            };
            let generation = active.generation;
            slot.motion_in_flight = true;
            (generation, plan)
        };
        let mut in_flight = InFlight {
            ctx: self,
            armed: true,
        };

        let outcome = drive(&plan).map_err(CalibrationError::from);

        let mut slot = self.lock_slot();
        slot.motion_in_flight = false;
        in_flight.armed = false;
        if let Err(err) = self.sync_gantry() {
            warn!("gantry node not synced after `{operation}`: {err}");
        }
        match slot.active.as_mut() {
            Some(active) if active.generation == generation => {
                if outcome.is_ok() {
                    complete(&mut active.session, &plan);
                }
                active.session.record(operation, &outcome);
                active.last_activity = Instant::now();
            }
            _ => warn!("`{operation}` finished after its session was released; result discarded"),
        }
        drop(slot);
        self.motion_done.notify_all();

        outcome.map(|()| plan)
    }

    #[cfg_attr(feature = "tracing", instrument(level = "info", skip(self)))]
    pub fn attach_tip(&self, token: &SessionToken, tip_length: f64) -> Result<(), CalibrationError> {
        self.with_session(token, "attach tip", |session| {
            session.attach_tip(tip_length)?;
            let target = session.target();
            let points = self
                .registry
                .resolve(&target.model)?
                .critical_points()
                .with_tip(tip_length);
            self.tree_write()
                .set_end_effector(target.mount.pipette_node(), points)?;
            Ok(())
        })
    }

    /// Nominal deck position a move target refers to.
    pub fn nominal_position(&self, target: MoveTarget) -> Point3<f64> {
        let points = &self.config.points;
        let z_ref = points.z_reference();
        match target {
            MoveTarget::SafeZ => Point3::new(z_ref.x, z_ref.y, z_ref.z + self.config.safe_height),
            MoveTarget::Point(label) => {
                let p = points.nominal(label);
                Point3::new(p.x, p.y, z_ref.z + self.config.point_height)
            }
        }
    }

    /// Carriage pose that puts the critical point on `target` under the
    /// current deck correction.
    fn carriage_target(&self, mount: Mount, target: MoveTarget) -> Result<Transform, CalibrationError> {
        let nominal = self.nominal_position(target);
        let tree = self.tree_read();
        let physical = tree.root_transform().transform_point(&nominal);
        let tool = tree.relative_to(mount.pipette_node(), GANTRY_NODE, self.config.critical_point)?;
        let carriage = physical.coords - tool.translation();
        Ok(Transform::from_translation(carriage.x, carriage.y, carriage.z))
    }

    /// Move the critical point to a calibration point or above the Z
    /// reference. Returns the commanded carriage pose.
    #[cfg_attr(feature = "tracing", instrument(level = "info", skip(self)))]
    pub fn move_to_point(&self, token: &SessionToken, target: MoveTarget) -> Result<Transform, CalibrationError> {
        self.run_motion(
            token,
            "move",
            |session| {
                session.check_move()?;
                self.carriage_target(session.target().mount, target)
            },
            |carriage| self.motion.move_to(carriage),
            |session, _| session.complete_move(target),
        )
    }

    /// Relative move of `step` mm along `axis`; the sign of `direction`
    /// picks the way. Returns the distance travelled.
    #[cfg_attr(feature = "tracing", instrument(level = "debug", skip(self)))]
    pub fn jog(
        &self,
        token: &SessionToken,
        axis: Axis,
        direction: i8,
        step: f64,
    ) -> Result<f64, CalibrationError> {
        let distance = f64::from(direction.signum()) * step;
        self.run_motion(
            token,
            "jog",
            |session| {
                session.check_jog()?;
                if !step.is_finite() {
                    return Err(CalibrationError::BadRequest(format!(
                        "jog step must be finite, got {step}"
                    )));
                }
                Ok(distance)
            },
            |d| self.motion.move_relative(axis, *d),
            |session, d| session.complete_jog(axis, *d),
        )
    }

    /// Record the Z offset at the current position (after `move safeZ` and
    /// jogging down to the deck).
    #[cfg_attr(feature = "tracing", instrument(level = "info", skip(self)))]
    pub fn save_z(&self, token: &SessionToken) -> Result<f64, CalibrationError> {
        self.with_session(token, "save z", |session| {
            session.check_save_z()?;
            let tip = self.tool_position(session.target().mount, self.config.critical_point)?;
            let offset = session.save_z(tip.z, self.config.points.z_reference[2])?;
            debug!("z offset {offset:.4} mm");
            Ok(offset)
        })
    }

    /// Record the current XY of the critical point as the measured position
    /// of `label`.
    #[cfg_attr(feature = "tracing", instrument(level = "info", skip(self)))]
    pub fn save_xy(&self, token: &SessionToken, label: PointLabel) -> Result<Point2<f64>, CalibrationError> {
        self.with_session(token, "save xy", |session| {
            session.check_save_xy(label)?;
            let tip = self.tool_position(session.target().mount, self.config.critical_point)?;
            let measured = tip.xy();
            session.save_xy(label, measured)?;
            debug!("point {label} measured at ({:.4}, {:.4})", measured.x, measured.y);
            Ok(measured)
        })
    }

    /// Fit, persist and install the deck correction.
    ///
    /// The root transform is replaced only after the fit succeeded and the
    /// calibration file was written.
    #[cfg_attr(feature = "tracing", instrument(level = "info", skip(self)))]
    pub fn save_transform(&self, token: &SessionToken) -> Result<DeckFit, CalibrationError> {
        self.with_session(token, "save transform", |session| {
            let (measured, z_offset) = session.fit_inputs()?;
            let fit = fit_deck_transform(&self.config.points.nominal_set(), &measured, z_offset)?;
            if fit.max_residual() > self.config.residual_warning_mm {
                warn!(
                    "deck fit residual {:.3} mm exceeds {:.3} mm; check the measured points",
                    fit.max_residual(),
                    self.config.residual_warning_mm
                );
            }

            if let Some(path) = &self.config.calibration_path {
                let mut file = DeckCalibrationFile::new(fit.transform);
                file.pipette = Some(session.target().clone());
                file.rms_residual = Some(fit.rms_residual);
                file.write_json(path)?;
                info!("deck calibration written to {}", path.display());
            }

            self.install_correction(fit.transform)?;
            session.mark_transform_computed();
            info!(
                "deck transform committed: rotation {:.4} deg, rms {:.4} mm",
                fit.rotation_rad.to_degrees(),
                fit.rms_residual
            );
            Ok(fit)
        })
    }

    fn install_correction(&self, correction: Transform) -> Result<(), CalibrationError> {
        let gantry = gantry_local(&correction, &self.motion.current_position())?;
        let mut tree = self.tree_write();
        tree.set_root_transform(correction);
        tree.set_local_transform(GANTRY_NODE, gantry)?;
        Ok(())
    }

    /// Discard the session named by `token` and take its tip off. Never
    /// waits for motion. Returns `false` when `token` is not the active one.
    #[cfg_attr(feature = "tracing", instrument(level = "info", skip(self)))]
    pub fn release(&self, token: &SessionToken) -> bool {
        let mut slot = self.lock_slot();
        if !slot.holds(token) {
            debug!("release of inactive session {token} ignored");
            return false;
        }
        if let Some(mut active) = slot.active.take() {
            active.session.mark_released();
            self.remove_tip(active.session.target());
            info!("calibration session {token} released");
        }
        true
    }

    fn remove_tip(&self, target: &PipetteIdentity) {
        let node = target.mount.pipette_node();
        let mut tree = self.tree_write();
        if let Ok(Some(points)) = tree.end_effector(node) {
            if let Err(err) = tree.set_end_effector(node, points.without_tip()) {
                warn!("could not remove calibration tip from {node}: {err}");
            }
        }
    }

    fn reap_locked(&self, slot: &mut Slot) -> Option<SessionToken> {
        let timeout = Duration::from_secs(self.config.session_timeout_secs?);
        if slot.motion_in_flight {
            return None;
        }
        let expired = slot
            .active
            .as_ref()
            .is_some_and(|a| a.last_activity.elapsed() >= timeout);
        if !expired {
            return None;
        }
        let active = slot.active.take()?;
        let token = *active.session.token();
        self.remove_tip(active.session.target());
        warn!("calibration session {token} abandoned; released after {timeout:?} idle");
        Some(token)
    }

    /// Release the active session if it has been idle past the configured
    /// timeout.
    pub fn reap_abandoned(&self) -> Option<SessionToken> {
        let mut slot = self.lock_slot();
        self.reap_locked(&mut slot)
    }

    /// Snapshot of the active session, if any.
    pub fn session(&self) -> Option<CalibrationSession> {
        self.lock_slot()
            .active
            .as_ref()
            .map(|a| a.session.clone())
    }

    /// Copy the carriage pose from the motion controller into the tree.
    pub fn sync_gantry(&self) -> Result<Transform, CalibrationError> {
        let carriage = self.motion.current_position();
        let mut tree = self.tree_write();
        let local = gantry_local(&tree.root_transform(), &carriage)?;
        tree.set_local_transform(GANTRY_NODE, local)?;
        Ok(local)
    }

    /// Current deck correction held by the root node.
    pub fn deck_correction(&self) -> Transform {
        self.tree_read().root_transform()
    }

    /// Absolute pose of any node of the gantry tree.
    pub fn absolute(&self, node: &str, cp: CriticalPoint) -> Result<Transform, CalibrationError> {
        Ok(self.tree_read().absolute_at(node, cp)?)
    }

    /// Physical position of `cp` on the pipette of `mount`, with the gantry
    /// node refreshed from the controller first.
    pub fn tool_position(&self, mount: Mount, cp: CriticalPoint) -> Result<Point3<f64>, CalibrationError> {
        self.sync_gantry()?;
        Ok(self.absolute(mount.pipette_node(), cp)?.position())
    }
}
