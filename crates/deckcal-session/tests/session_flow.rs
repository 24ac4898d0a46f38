use approx::assert_abs_diff_eq;
use deckcal_core::{CriticalPoint, Transform};
use deckcal_session::{
    Axis, CalibrationError, DeckCalibrationConfig, DeckCalibrationFile, DeckContext,
    ModelRegistry, Mount, MotionError, MoveTarget, PipetteIdentity, PointLabel, SessionState,
    SessionToken, SimulatedGantry, StaticPipettes,
};
use nalgebra::Point2;
use std::sync::Arc;

const TIP_LENGTH: f64 = 51.7;
const MEASURED: [[f64; 2]; 3] = [
    [13.16824337, 8.30855312],
    [380.50507635, -23.82925545],
    [34.87002331, 256.36103295],
];

fn context_with(config: DeckCalibrationConfig) -> (DeckContext, Arc<SimulatedGantry>) {
    let gantry = Arc::new(SimulatedGantry::homed_at(config.home_transform()));
    let pipettes = Arc::new(StaticPipettes::new([PipetteIdentity::new(
        Mount::Left,
        "p300_multi_v1",
    )
    .with_id("P3HMV2018071201")]));
    let ctx = DeckContext::new(
        config,
        ModelRegistry::builtin(),
        gantry.clone(),
        pipettes,
    )
    .expect("context");
    (ctx, gantry)
}

fn context() -> (DeckContext, Arc<SimulatedGantry>) {
    context_with(DeckCalibrationConfig::default())
}

fn tool(ctx: &DeckContext) -> nalgebra::Point3<f64> {
    ctx.tool_position(Mount::Left, ctx.config().critical_point)
        .expect("tool position")
}

/// Jog along `axis` until the tool coordinate reaches `target`.
fn jog_to(ctx: &DeckContext, token: &SessionToken, axis: Axis, target: f64) {
    let delta = target - tool(ctx)[axis.index()];
    let direction = if delta < 0.0 { -1 } else { 1 };
    ctx.jog(token, axis, direction, delta.abs()).expect("jog");
}

fn started(ctx: &DeckContext) -> SessionToken {
    let token = ctx.start(Mount::Left).expect("start").token;
    ctx.attach_tip(&token, TIP_LENGTH).expect("attach tip");
    token
}

fn collect_points(ctx: &DeckContext, token: &SessionToken) {
    ctx.move_to_point(token, MoveTarget::SafeZ).expect("move safeZ");
    ctx.jog(token, Axis::Z, -1, 4.5).expect("jog down");
    assert_abs_diff_eq!(ctx.save_z(token).expect("save z"), 0.5, epsilon = 1e-9);

    for (label, [x, y]) in PointLabel::ALL.into_iter().zip(MEASURED) {
        ctx.move_to_point(token, MoveTarget::Point(label))
            .expect("move to point");
        jog_to(ctx, token, Axis::X, x);
        jog_to(ctx, token, Axis::Y, y);
        let saved = ctx.save_xy(token, label).expect("save xy");
        assert_abs_diff_eq!(saved.x, x, epsilon = 1e-9);
        assert_abs_diff_eq!(saved.y, y, epsilon = 1e-9);
    }
}

fn five_degree_transform() -> Transform {
    let (s5, c5) = 5.0_f64.to_radians().sin_cos();
    Transform::from_array([
        [c5, s5, 0.0, 0.3],
        [-s5, c5, 0.0, 0.4],
        [0.0, 0.0, 1.0, 0.5],
        [0.0, 0.0, 0.0, 1.0],
    ])
    .expect("affine")
}

#[test]
fn recovers_five_degree_deck_skew_end_to_end() {
    let dir = tempfile::tempdir().expect("tempdir");
    let cal_path = dir.path().join("deck_calibration.json");
    let mut config = DeckCalibrationConfig::default();
    config.calibration_path = Some(cal_path.clone());
    let (ctx, _gantry) = context_with(config.clone());

    let token = started(&ctx);
    collect_points(&ctx, &token);

    let before = tool(&ctx);
    let fit = ctx.save_transform(&token).expect("save transform");
    let expected = five_degree_transform();
    assert!(
        fit.transform.approx_eq(&expected, 1e-6),
        "got {:?}",
        fit.transform.to_array()
    );
    assert!(ctx.deck_correction().approx_eq(&expected, 1e-6));
    assert!(fit.rms_residual < 1e-6);

    // committing changes the frame, not where the tool physically is
    let after = tool(&ctx);
    assert_abs_diff_eq!((after - before).norm(), 0.0, epsilon = 1e-9);

    let session = ctx.session().expect("session");
    assert_eq!(session.state(), SessionState::TransformComputed);
    assert!(matches!(
        ctx.move_to_point(&token, MoveTarget::SafeZ),
        Err(CalibrationError::StateConflict { .. })
    ));

    let stored = DeckCalibrationFile::load_json(&cal_path).expect("calibration file");
    assert!(stored.gantry_calibration.approx_eq(&expected, 1e-6));
    assert_eq!(
        stored.pipette.as_ref().map(|p| p.model.as_str()),
        Some("p300_multi_v1")
    );

    assert!(ctx.release(&token));
    let (reloaded, _) = context_with(config);
    assert!(reloaded.deck_correction().approx_eq(&expected, 1e-6));
}

#[test]
fn moves_after_commit_land_on_the_physical_crosses() {
    let (ctx, _gantry) = context();
    let token = started(&ctx);
    collect_points(&ctx, &token);
    ctx.save_transform(&token).expect("save transform");
    ctx.release(&token);

    let token = started(&ctx);
    ctx.move_to_point(&token, MoveTarget::Point(PointLabel::Two))
        .expect("move");
    let p = tool(&ctx);
    assert_abs_diff_eq!(p.x, MEASURED[1][0], epsilon = 1e-6);
    assert_abs_diff_eq!(p.y, MEASURED[1][1], epsilon = 1e-6);
    assert_abs_diff_eq!(p.z, ctx.config().point_height + 0.5, epsilon = 1e-6);

    let resolved = ctx
        .absolute("pipette.left", CriticalPoint::FrontNozzle)
        .expect("absolute");
    assert_abs_diff_eq!(resolved.position().x, p.x, epsilon = 1e-9);
}

#[test]
fn second_start_conflicts_and_keeps_the_first_session() {
    let (ctx, _gantry) = context();
    let token = ctx.start(Mount::Left).expect("start");
    assert!(matches!(
        ctx.start(Mount::Left),
        Err(CalibrationError::SessionConflict)
    ));
    assert!(matches!(
        ctx.start(Mount::Right),
        Err(CalibrationError::SessionConflict)
    ));
    ctx.attach_tip(&token.token, TIP_LENGTH)
        .expect("original token still valid");
}

#[test]
fn start_resolves_the_pipette_or_fails() {
    let gantry = Arc::new(SimulatedGantry::default());
    let pipettes = Arc::new(StaticPipettes::new([PipetteIdentity::new(
        Mount::Right,
        "p10_single",
    )]));
    let ctx = DeckContext::new(
        DeckCalibrationConfig::default(),
        ModelRegistry::builtin(),
        gantry,
        pipettes,
    )
    .expect("context");

    assert!(matches!(
        ctx.start(Mount::Left),
        Err(CalibrationError::NoPipetteAttached(Mount::Left))
    ));
    let start = ctx.start_any(None, false).expect("auto mount");
    assert_eq!(start.pipette.mount, Mount::Right);
    assert_eq!(start.pipette.model, "p10_single_v1");
    assert_eq!(start.channels, 1);

    let forced = ctx.start_any(Some(Mount::Right), true).expect("forced");
    assert_ne!(forced.token, start.token);
    assert!(matches!(
        ctx.attach_tip(&start.token, TIP_LENGTH),
        Err(CalibrationError::InvalidToken)
    ));
}

#[test]
fn wrong_token_changes_nothing() {
    let (ctx, gantry) = context();
    let token = started(&ctx);
    ctx.move_to_point(&token, MoveTarget::SafeZ).expect("move");
    let moves = gantry.motion_count();
    let snapshot = ctx.session().expect("session");

    let (other, _) = context();
    let stranger = other.start(Mount::Left).expect("other start").token;

    assert!(matches!(
        ctx.jog(&stranger, Axis::Z, -1, 1.0),
        Err(CalibrationError::InvalidToken)
    ));
    assert!(matches!(
        ctx.save_z(&stranger),
        Err(CalibrationError::InvalidToken)
    ));
    assert!(matches!(
        ctx.move_to_point(&stranger, MoveTarget::Point(PointLabel::One)),
        Err(CalibrationError::InvalidToken)
    ));
    assert!(!ctx.release(&stranger));

    let after = ctx.session().expect("session");
    assert_eq!(gantry.motion_count(), moves);
    assert_eq!(after.state(), snapshot.state());
    assert_eq!(after.last_move(), snapshot.last_move());
    assert_eq!(after.log().len(), snapshot.log().len());
}

#[test]
fn incomplete_points_leave_the_root_alone() {
    let (ctx, _gantry) = context();
    let token = ctx.start(Mount::Left).expect("start").token;
    let root = ctx.deck_correction();

    match ctx.save_transform(&token) {
        Err(CalibrationError::IncompletePoints {
            missing_points,
            z_offset_missing,
        }) => {
            assert_eq!(missing_points.len(), 3);
            assert!(z_offset_missing);
        }
        other => panic!("unexpected {other:?}"),
    }

    ctx.attach_tip(&token, TIP_LENGTH).expect("tip");
    ctx.move_to_point(&token, MoveTarget::Point(PointLabel::One))
        .expect("move");
    ctx.save_xy(&token, PointLabel::One).expect("save");
    assert!(matches!(
        ctx.save_transform(&token),
        Err(CalibrationError::IncompletePoints { .. })
    ));
    assert_eq!(ctx.deck_correction(), root);
    assert_eq!(
        ctx.session().expect("session").state(),
        SessionState::PointCollection
    );
}

#[test]
fn failed_calibration_write_keeps_the_previous_correction() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut config = DeckCalibrationConfig::default();
    config.calibration_path = Some(dir.path().join("missing").join("deck_calibration.json"));
    let (ctx, _gantry) = context_with(config);

    let token = started(&ctx);
    collect_points(&ctx, &token);
    let root = ctx.deck_correction();

    let err = ctx.save_transform(&token).expect_err("unwritable path");
    assert_eq!(err.code(), "io_error");
    assert_eq!(ctx.deck_correction(), root);
    assert_eq!(root, Transform::identity());
    let session = ctx.session().expect("session");
    assert_eq!(session.state(), SessionState::PointCollection);
    assert!(!session.log().last().expect("log entry").success);
}

#[test]
fn collinear_measurements_are_refused() {
    let (ctx, _gantry) = context();
    let token = started(&ctx);
    ctx.move_to_point(&token, MoveTarget::SafeZ).expect("safe z");
    ctx.save_z(&token).expect("z");
    for label in PointLabel::ALL {
        ctx.move_to_point(&token, MoveTarget::Point(label))
            .expect("move");
        // pin every point onto the same horizontal line
        jog_to(&ctx, &token, Axis::Y, 100.0);
        ctx.save_xy(&token, label).expect("save");
    }
    let err = ctx.save_transform(&token).expect_err("collinear");
    assert_eq!(err.code(), "ill_conditioned_calibration");
    assert_eq!(ctx.deck_correction(), Transform::identity());
}

#[test]
fn saves_need_the_matching_move() {
    let (ctx, _gantry) = context();
    let token = started(&ctx);
    assert!(matches!(
        ctx.jog(&token, Axis::X, 1, 1.0),
        Err(CalibrationError::StateConflict { command: "jog", .. })
    ));
    ctx.move_to_point(&token, MoveTarget::Point(PointLabel::One))
        .expect("move");
    assert!(matches!(
        ctx.save_z(&token),
        Err(CalibrationError::NoPriorMove { .. })
    ));
    assert!(matches!(
        ctx.save_xy(&token, PointLabel::Two),
        Err(CalibrationError::NoPriorMove { .. })
    ));
    ctx.save_xy(&token, PointLabel::One).expect("matching save");
}

#[test]
fn release_invalidates_the_token_and_drops_the_tip() {
    let (ctx, _gantry) = context();
    let token = started(&ctx);
    let with_tip = ctx
        .absolute("pipette.left", CriticalPoint::Tip)
        .expect("tip");

    assert!(ctx.release(&token));
    assert!(!ctx.release(&token));
    assert!(ctx.session().is_none());

    let bare = ctx
        .absolute("pipette.left", CriticalPoint::Tip)
        .expect("bare");
    assert_abs_diff_eq!(
        bare.position().z - with_tip.position().z,
        TIP_LENGTH,
        epsilon = 1e-9
    );
    for result in [
        ctx.attach_tip(&token, TIP_LENGTH),
        ctx.save_z(&token).map(|_| ()),
        ctx.save_transform(&token).map(|_| ()),
    ] {
        assert!(matches!(result, Err(CalibrationError::InvalidToken)));
    }
}

#[test]
fn motion_errors_pass_through_unmodified() {
    let (ctx, gantry) = context();
    let token = started(&ctx);

    gantry.inject_fault(MotionError::Stall { axis: Axis::Y });
    match ctx.move_to_point(&token, MoveTarget::SafeZ) {
        Err(CalibrationError::Motion(MotionError::Stall { axis })) => assert_eq!(axis, Axis::Y),
        other => panic!("unexpected {other:?}"),
    }
    let session = ctx.session().expect("session");
    assert_eq!(session.state(), SessionState::TipAttached);
    assert_eq!(session.last_move(), None);
    assert!(!session.log().last().expect("log entry").success);

    ctx.move_to_point(&token, MoveTarget::SafeZ).expect("retry");
    gantry.inject_fault(MotionError::Timeout);
    let err = ctx.jog(&token, Axis::Z, -1, 2.0).expect_err("timeout");
    assert_eq!(err.code(), "motion_timeout");
    assert_eq!(ctx.session().expect("session").pending_jog().z, 0.0);
}

#[test]
fn abandoned_sessions_are_reaped() {
    let mut config = DeckCalibrationConfig::default();
    config.session_timeout_secs = Some(0);
    let (ctx, _gantry) = context_with(config);

    let token = ctx.start(Mount::Left).expect("start").token;
    assert!(matches!(
        ctx.attach_tip(&token, TIP_LENGTH),
        Err(CalibrationError::InvalidToken)
    ));
    let next = ctx.start(Mount::Left).expect("slot is free again").token;
    assert_eq!(ctx.reap_abandoned(), Some(next));
    assert_eq!(ctx.reap_abandoned(), None);
}

#[test]
fn pipettes_cannot_be_swapped_under_an_active_session() {
    let (ctx, _gantry) = context();
    let token = ctx.start(Mount::Left).expect("start").token;
    assert!(matches!(
        ctx.refresh_pipette(Mount::Left),
        Err(CalibrationError::SessionConflict)
    ));
    assert!(ctx.refresh_pipette(Mount::Right).expect("right").is_none());
    ctx.release(&token);
    let model = ctx.refresh_pipette(Mount::Left).expect("left");
    assert_eq!(model.map(|m| m.channels), Some(8));
}

#[test]
fn measured_xy_is_recorded_in_physical_coordinates() {
    let (ctx, _gantry) = context();
    let token = started(&ctx);
    ctx.move_to_point(&token, MoveTarget::Point(PointLabel::Three))
        .expect("move");
    let saved = ctx.save_xy(&token, PointLabel::Three).expect("save");
    let nominal = ctx.config().points.nominal(PointLabel::Three);
    assert_abs_diff_eq!(saved, Point2::new(nominal.x, nominal.y), epsilon = 1e-9);
}
