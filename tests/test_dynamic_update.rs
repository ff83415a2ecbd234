// tests/test_dynamic_update.rs
// Per-frame updates: a moved instance costs one async copy, keeps every address and refits the BVH
// RELEVANT FILES:src/upload/mod.rs,src/upload/managed.rs,src/accel/mod.rs

use anyhow::Result;
use glam::{Mat4, Vec3};
use pathwave::accel::Ray;
use pathwave::scene::{Camera, Light, Material, Mesh, Scene, SceneGraphLeaf};
use pathwave::{AccelKind, PathTracerParams, RtScene, SceneParameters, WavefrontPathTracer};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn two_boxes() -> Scene {
    let mut scene = Scene::new(Camera::look_at(Vec3::new(0.0, 0.5, 6.0), Vec3::ZERO, 40.0));
    let red = scene.add_material(Material::diffuse(Vec3::new(0.8, 0.2, 0.2)));
    scene.add_mesh_instance(Mesh::cuboid(Vec3::splat(-0.5), Vec3::splat(0.5)).with_material(red));
    scene.add_mesh_instance(
        Mesh::cuboid(Vec3::new(1.5, -0.5, -0.5), Vec3::new(2.5, 0.5, 0.5)).with_material(red),
    );
    scene.add_light(Light::point(Vec3::new(0.0, 4.0, 3.0), Vec3::splat(30.0)));
    scene
}

#[test]
fn moving_one_instance_is_a_single_async_copy() -> Result<()> {
    init_logging();
    for accel in [AccelKind::SingleLevel, AccelKind::MultiLevel] {
        let scene = two_boxes();
        let mut rt = RtScene::with_host_memory(SceneParameters {
            accel,
            ..SceneParameters::default()
        });
        rt.upload_scene_data(&scene)?;

        let addresses: Vec<_> = rt
            .upload_sequence()
            .iter()
            .map(|&leaf| rt.managed_ptr(leaf))
            .collect();
        let scene_data = rt.get_scene_data();
        let before = rt.memory().transfer_stats();

        let moved = Mat4::from_translation(Vec3::new(0.0, 3.0, 0.0));
        scene.instances[0].modify(|inst| inst.transform = moved);
        assert_eq!(rt.update_scene_data()?, 1);

        let after = rt.memory().transfer_stats();
        assert_eq!(after.async_copies - before.async_copies, 1, "{accel}");
        assert_eq!(after.blocking_copies, before.blocking_copies, "{accel}");
        assert_eq!(after.allocations, before.allocations, "{accel}");
        assert!(!scene.instances[0].is_updated());

        let again: Vec<_> = rt
            .upload_sequence()
            .iter()
            .map(|&leaf| rt.managed_ptr(leaf))
            .collect();
        assert_eq!(addresses, again);
        assert_eq!(rt.get_scene_data(), scene_data);

        rt.update_accel_structure()?;
        rt.synchronize()?;
        let accel_after = rt.accel().expect("built accel");
        assert_eq!(accel_after.traversable(), scene_data.traversable);
        let through_old_spot = Ray::new(Vec3::new(0.0, 0.0, 5.0), Vec3::NEG_Z);
        assert!(accel_after.intersect(&through_old_spot, f32::INFINITY).is_none(), "{accel}");
        let through_new_spot = Ray::new(Vec3::new(0.0, 3.0, 5.0), Vec3::NEG_Z);
        let hit = accel_after
            .intersect(&through_new_spot, f32::INFINITY)
            .expect("moved instance");
        assert_eq!(hit.instance, 0);
        assert!((hit.t - 4.5).abs() < 1e-4);
    }
    Ok(())
}

#[test]
fn render_follows_updated_light() -> Result<()> {
    init_logging();
    let scene = two_boxes();
    let mut rt = RtScene::with_host_memory(SceneParameters::default());
    rt.upload_scene_data(&scene)?;
    let params = PathTracerParams {
        max_depth: 2,
        seed: 3,
        ..PathTracerParams::default()
    };

    let mut tracer = WavefrontPathTracer::new(16, 16, params.clone())?;
    let lit = tracer.render(&rt, &scene.camera, 1)?.mean();
    assert!(lit > 0.0);

    scene.lights[0].modify(|light| light.transform = Mat4::from_translation(Vec3::new(0.0, 0.0, -40.0)));
    assert_eq!(rt.update_scene_data()?, 1);
    rt.synchronize()?;

    let mut tracer = WavefrontPathTracer::new(16, 16, params)?;
    let far = tracer.render(&rt, &scene.camera, 1)?.mean();
    assert!(far < lit * 0.5, "lit {lit} far {far}");
    Ok(())
}
