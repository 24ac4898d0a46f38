use approx::assert_abs_diff_eq;
use deckcal_core::{fit_deck_transform, CriticalPoint, CriticalPoints, PoseTree, Transform};
use nalgebra::{Point2, Point3};

const NOMINAL: [[f64; 2]; 3] = [[12.13, 9.0], [380.87, 9.0], [12.13, 258.0]];

fn gantry_tree(correction: Transform, carriage: Transform) -> PoseTree {
    let mut tree = PoseTree::with_root_transform("deck", correction);
    let local = correction.inverse().expect("rigid") * carriage;
    tree.attach("gantry", "deck", local).expect("gantry");
    tree.attach("mount.left", "gantry", Transform::from_translation(-34.0, 0.0, 0.0))
        .expect("mount");
    tree.attach(
        "pipette.left",
        "mount.left",
        Transform::from_translation(0.0, 31.5, -25.8),
    )
    .expect("pipette");
    tree.set_end_effector("pipette.left", CriticalPoints::new(8, 9.0).with_tip(51.7))
        .expect("effector");
    tree
}

#[test]
fn carriage_pose_survives_a_new_correction() {
    let carriage = Transform::from_translation(200.0, 150.0, 120.0);
    let before = gantry_tree(Transform::identity(), carriage)
        .absolute_at("pipette.left", CriticalPoint::FrontNozzle)
        .expect("before");

    let correction = Transform::from_translation(0.3, 0.4, 0.5) * Transform::from_rotation_z(-0.087);
    let after = gantry_tree(correction, carriage)
        .absolute_at("pipette.left", CriticalPoint::FrontNozzle)
        .expect("after");

    assert_abs_diff_eq!(
        (after.position() - before.position()).norm(),
        0.0,
        epsilon = 1e-9
    );
    assert_abs_diff_eq!(before.position().x, 166.0, epsilon = 1e-12);
    assert_abs_diff_eq!(before.position().y, 150.0 + 31.5 - 63.0, epsilon = 1e-12);
    assert_abs_diff_eq!(before.position().z, 120.0 - 25.8 - 51.7, epsilon = 1e-12);
}

#[test]
fn fitted_correction_aims_the_tool_at_the_physical_crosses() {
    let truth = Transform::from_translation(-1.2, 0.8, 0.25) * Transform::from_rotation_z(0.01);
    let nominal = NOMINAL.map(|[x, y]| Point2::new(x, y));
    let measured = nominal.map(|n| truth.transform_point(&Point3::new(n.x, n.y, 0.0)).xy());
    let fit = fit_deck_transform(&nominal, &measured, 0.25).expect("fit");

    let probe = gantry_tree(fit.transform, Transform::identity());
    let tool = probe
        .relative_to("pipette.left", "gantry", CriticalPoint::FrontNozzle)
        .expect("tool offset");

    for n in nominal {
        let goal = fit.transform.transform_point(&Point3::new(n.x, n.y, 0.0));
        let carriage = goal.coords - tool.translation();
        let tree = gantry_tree(
            fit.transform,
            Transform::from_translation(carriage.x, carriage.y, carriage.z),
        );
        let reached = tree
            .absolute_at("pipette.left", CriticalPoint::FrontNozzle)
            .expect("resolve")
            .position();
        let expected = truth.transform_point(&Point3::new(n.x, n.y, 0.0));
        assert_abs_diff_eq!(reached, expected, epsilon = 1e-6);
    }
}
