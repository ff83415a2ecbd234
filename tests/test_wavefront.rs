// tests/test_wavefront.rs
// End-to-end wavefront renders: mesh lights, empty light lists, media, MIS agreement and the queue ledger
// RELEVANT FILES:src/path_tracing/wavefront/mod.rs,src/path_tracing/wavefront/stages.rs,src/path_tracing/bound.rs

use anyhow::Result;
use glam::Vec3;
use pathwave::rt::MediumKind;
use pathwave::scene::{Camera, GridValues, Light, Material, Medium, Mesh, MeshInstance, Scene};
use pathwave::{AccelKind, FrameStats, PathTracerParams, RtScene, SceneParameters, WavefrontPathTracer};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn camera() -> Camera {
    Camera::look_at(Vec3::new(0.0, 1.0, 4.0), Vec3::new(0.0, 0.5, 0.0), 50.0)
}

/// Diffuse floor lit only by an emissive quad facing the camera.
fn mesh_light_scene() -> Scene {
    let mut scene = Scene::new(camera());
    let gray = scene.add_material(Material::diffuse(Vec3::splat(0.6)));
    let glow = scene.add_material(Material::emissive(Vec3::splat(5.0)));
    let floor = scene.add_mesh(Mesh::quad(Vec3::ZERO, Vec3::X * 4.0, Vec3::Z * 4.0).with_material(gray));
    scene.add_instance(MeshInstance::new(floor));
    let panel = scene.add_mesh(
        Mesh::quad(Vec3::new(0.0, 1.0, -1.0), Vec3::X, Vec3::Y * 0.75).with_material(glow),
    );
    scene.add_instance(MeshInstance::new(panel));
    scene
}

fn upload(scene: &Scene, accel: AccelKind) -> Result<RtScene> {
    let mut rt = RtScene::with_host_memory(SceneParameters {
        accel,
        ..SceneParameters::default()
    });
    rt.upload_scene_data(scene)?;
    Ok(rt)
}

fn params(spp: u32) -> PathTracerParams {
    PathTracerParams {
        spp,
        seed: 7,
        ..PathTracerParams::default()
    }
}

fn assert_ledger(stats: &FrameStats, pixels: u64, spp: u64) {
    assert_eq!(stats.camera_rays, pixels * spp);
    assert_eq!(stats.ray_queue_entries, stats.terminated() + stats.re_entries, "{stats:?}");
    assert_eq!(stats.camera_rays, stats.terminated(), "{stats:?}");
    assert_eq!(
        stats.shadow_spawned,
        stats.shadow_contributed + stats.shadow_occluded,
        "{stats:?}"
    );
    assert!(stats.is_conserved());
}

#[test]
fn emissive_mesh_lights_the_scene_without_explicit_lights() -> Result<()> {
    init_logging();
    let scene = mesh_light_scene();
    for accel in [AccelKind::SingleLevel, AccelKind::MultiLevel] {
        let rt = upload(&scene, accel)?;
        assert_eq!(rt.upload_stats().mesh_lights, 2);
        assert_eq!(rt.upload_stats().explicit_lights, 0);

        let mut tracer = WavefrontPathTracer::new(24, 16, params(2))?;
        let stats = tracer.render_frame(&rt, &scene.camera)?;
        assert_ledger(&stats, 24 * 16, 2);
        assert!(stats.hit_light > 0, "{accel}: {stats:?}");
        assert!(stats.shadow_contributed > 0, "{accel}: {stats:?}");

        let image = tracer.image();
        assert!(image.is_finite());
        assert!(!image.is_black());
        // The panel is seen head-on through the center of the frame.
        let [r, g, b] = image.pixel(12, 7).expect("center pixel");
        assert!(r > 1.0 && g > 1.0 && b > 1.0, "center = {:?}", [r, g, b]);
    }
    Ok(())
}

#[test]
fn scene_without_lights_renders_black() -> Result<()> {
    init_logging();
    let mut scene = Scene::new(camera());
    let gray = scene.add_material(Material::diffuse(Vec3::splat(0.6)));
    scene.add_mesh_instance(Mesh::cuboid(Vec3::splat(-0.5), Vec3::splat(0.5)).with_material(gray));
    let rt = upload(&scene, AccelKind::SingleLevel)?;
    assert_eq!(rt.upload_stats().total_lights(), 0);

    let mut tracer = WavefrontPathTracer::new(16, 16, params(1))?;
    let stats = tracer.render_frame(&rt, &scene.camera)?;
    assert_ledger(&stats, 256, 1);
    assert_eq!(stats.shadow_spawned, 0);
    assert!(tracer.image().is_black());
    Ok(())
}

#[test]
fn empty_scene_counts_every_camera_ray_as_a_miss() -> Result<()> {
    init_logging();
    let scene = Scene::new(camera());
    let rt = upload(&scene, AccelKind::MultiLevel)?;
    let mut tracer = WavefrontPathTracer::new(8, 4, params(1))?;
    let stats = tracer.render_frame(&rt, &scene.camera)?;
    assert_eq!(stats.miss, 32);
    assert_eq!(stats.re_entries, 0);
    assert_eq!(stats.iterations, 1);
    assert!(tracer.image().is_black());
    Ok(())
}

#[test]
fn environment_light_reaches_escaped_rays() -> Result<()> {
    init_logging();
    let mut scene = Scene::new(camera());
    scene.add_light(Light::infinite(Vec3::new(0.25, 0.5, 1.0)));
    let rt = upload(&scene, AccelKind::SingleLevel)?;
    let mut tracer = WavefrontPathTracer::new(4, 4, params(1))?;
    tracer.render_frame(&rt, &scene.camera)?;
    let image = tracer.image();
    for pixel in &image.pixels {
        assert!((pixel[0] - 0.25).abs() < 1e-5 && (pixel[2] - 1.0).abs() < 1e-5);
    }
    Ok(())
}

#[test]
fn nee_and_bsdf_sampling_agree() -> Result<()> {
    init_logging();
    let scene = mesh_light_scene();
    let rt = upload(&scene, AccelKind::SingleLevel)?;

    let mut with_nee = WavefrontPathTracer::new(24, 24, params(48))?;
    with_nee.render_frame(&rt, &scene.camera)?;
    let mut without_nee = WavefrontPathTracer::new(
        24,
        24,
        PathTracerParams {
            nee: false,
            ..params(48)
        },
    )?;
    let stats = without_nee.render_frame(&rt, &scene.camera)?;
    assert_eq!(stats.shadow_spawned, 0);

    let a = with_nee.image().mean();
    let b = without_nee.image().mean();
    assert!(a > 0.0 && b > 0.0);
    assert!((a / b - 1.0).abs() < 0.25, "nee {a} vs bsdf {b}");
    Ok(())
}

#[test]
fn point_light_behind_an_occluder_is_shadowed() -> Result<()> {
    init_logging();
    let mut scene = Scene::new(Camera::look_at(Vec3::new(0.0, 3.0, 0.01), Vec3::ZERO, 30.0));
    let gray = scene.add_material(Material::diffuse(Vec3::splat(0.8)));
    scene.add_mesh_instance(Mesh::quad(Vec3::ZERO, Vec3::X * 10.0, Vec3::Z * 10.0).with_material(gray));
    // A blocker between the light and the visible patch of floor.
    scene.add_mesh_instance(Mesh::quad(Vec3::new(0.0, 4.0, 0.0), Vec3::X * 6.0, Vec3::Z * 6.0).with_material(gray));
    scene.add_light(Light::point(Vec3::new(0.0, 6.0, 0.0), Vec3::splat(50.0)));
    let rt = upload(&scene, AccelKind::MultiLevel)?;

    let mut tracer = WavefrontPathTracer::new(
        8,
        8,
        PathTracerParams {
            max_depth: 1,
            ..params(1)
        },
    )?;
    let stats = tracer.render_frame(&rt, &scene.camera)?;
    assert_ledger(&stats, 64, 1);
    assert_eq!(stats.depth_terminated, 64);
    assert_eq!(stats.shadow_spawned, 64);
    assert_eq!(stats.shadow_occluded, 64);
    assert!(tracer.image().is_black());
    Ok(())
}

#[test]
fn homogeneous_medium_scatters_and_absorbs() -> Result<()> {
    init_logging();
    let mut scene = mesh_light_scene();
    let fog = scene.add_medium(Medium::homogeneous(Vec3::splat(0.4), Vec3::splat(1.2), 0.2));
    scene.add_mesh_instance(
        Mesh::cuboid(Vec3::new(-0.8, 0.05, -0.5), Vec3::new(0.8, 1.2, 0.8)).with_media(Some(fog), None),
    );
    scene.add_light(Light::point(Vec3::new(0.5, 2.5, 1.0), Vec3::splat(8.0)));
    let rt = upload(&scene, AccelKind::SingleLevel)?;

    let mut tracer = WavefrontPathTracer::new(16, 16, params(4))?;
    let stats = tracer.render_frame(&rt, &scene.camera)?;
    assert_ledger(&stats, 256, 4);
    assert!(stats.medium_samples > 0, "{stats:?}");
    assert!(stats.medium_scatters > 0, "{stats:?}");
    assert!(stats.absorbed > 0, "{stats:?}");
    assert!(stats.re_entries > 0);
    let image = tracer.image();
    assert!(image.is_finite());
    assert!(!image.is_black());
    Ok(())
}

/// Floor under a point light, optionally with camera, floor and light all inside a purely absorbing box.
fn absorbing_room(fog: bool) -> Scene {
    let mut scene = Scene::new(Camera::look_at(Vec3::new(0.0, 0.3, 2.0), Vec3::ZERO, 40.0));
    let gray = scene.add_material(Material::diffuse(Vec3::splat(0.6)));
    scene.add_mesh_instance(Mesh::quad(Vec3::ZERO, Vec3::X * 10.0, Vec3::Z * 10.0).with_material(gray));
    scene.add_light(Light::point(Vec3::new(0.0, 5.0, 0.0), Vec3::splat(50.0)));
    if fog {
        let ink = scene.add_medium(Medium::homogeneous(Vec3::ONE, Vec3::ZERO, 0.0));
        scene.add_mesh_instance(
            Mesh::cuboid(Vec3::new(-12.0, -1.0, -12.0), Vec3::new(12.0, 6.0, 12.0))
                .with_media(Some(ink), None),
        );
        scene.camera.medium = Some(ink);
    }
    scene
}

#[test]
fn surfaces_inside_a_medium_keep_it_for_shadow_rays() -> Result<()> {
    init_logging();
    let render = |fog: bool| -> Result<(f32, FrameStats)> {
        let scene = absorbing_room(fog);
        let rt = upload(&scene, AccelKind::SingleLevel)?;
        let mut tracer = WavefrontPathTracer::new(
            16,
            16,
            PathTracerParams {
                max_depth: 1,
                ..params(4)
            },
        )?;
        let stats = tracer.render_frame(&rt, &scene.camera)?;
        assert_ledger(&stats, 256, 4);
        Ok((tracer.image().mean(), stats))
    };

    let (clear, _) = render(false)?;
    let (fog, stats) = render(true)?;
    assert!(clear > 0.02, "clear {clear}");
    assert!(stats.absorbed > 0 && stats.shadow_spawned > 0, "{stats:?}");
    // The light is at least 5 units from the floor, all of it through the absorber.
    assert!(fog < clear * 0.02, "clear {clear} fog {fog}");
    Ok(())
}

/// Mesh-light scene with a density grid filling a box in front of the panel.
fn grid_scene(values: GridValues) -> Scene {
    let mut scene = mesh_light_scene();
    let (min, max) = (Vec3::new(-0.8, 0.05, -0.5), Vec3::new(0.8, 1.2, 0.8));
    let cloud = scene.add_medium(Medium::grid(
        [4, 4, 4],
        values,
        Vec3::splat(0.3),
        Vec3::splat(1.5),
        (min, max),
        0.3,
    ));
    scene.add_mesh_instance(Mesh::cuboid(min, max).with_media(Some(cloud), None));
    scene.add_light(Light::point(Vec3::new(0.5, 2.5, 1.0), Vec3::splat(8.0)));
    scene
}

fn render_grid(scene: &Scene, kind: MediumKind) -> Result<()> {
    for accel in [AccelKind::SingleLevel, AccelKind::MultiLevel] {
        let rt = upload(scene, accel)?;
        assert_eq!(rt.upload_stats().skipped_entities, 0);
        assert_eq!(rt.medium_storage().count_of(kind), 1);

        let mut tracer = WavefrontPathTracer::new(16, 16, params(4))?;
        let stats = tracer.render_frame(&rt, &scene.camera)?;
        assert_ledger(&stats, 256, 4);
        assert!(stats.medium_samples > 0, "{accel}: {stats:?}");
        assert!(stats.medium_scatters > 0, "{accel}: {stats:?}");
        assert!(stats.shadow_contributed > 0, "{accel}: {stats:?}");
        let image = tracer.image();
        assert!(image.is_finite());
        assert!(!image.is_black());
    }
    Ok(())
}

#[test]
fn scalar_density_grid_renders() -> Result<()> {
    init_logging();
    // Density ramps from empty to 2 along x.
    let values = (0..64).map(|i| (i % 4) as f32 * 2.0 / 3.0).collect();
    render_grid(&grid_scene(GridValues::Scalar(values)), MediumKind::GridScalar)
}

#[test]
fn rgb_density_grid_renders() -> Result<()> {
    init_logging();
    let values = (0..64)
        .map(|i| {
            let d = 0.5 + (i % 3) as f32 * 0.5;
            [d * 0.4, d, d * 1.6]
        })
        .collect();
    render_grid(&grid_scene(GridValues::Rgb(values)), MediumKind::GridRgb)
}

#[test]
fn camera_inside_a_medium_starts_in_it() -> Result<()> {
    init_logging();
    let mut scene = mesh_light_scene();
    let fog = scene.add_medium(Medium::homogeneous(Vec3::splat(0.05), Vec3::splat(0.3), 0.0));
    scene.add_mesh_instance(Mesh::cuboid(Vec3::splat(-6.0), Vec3::splat(6.0)).with_media(Some(fog), None));
    scene.camera.medium = Some(fog);
    let rt = upload(&scene, AccelKind::MultiLevel)?;

    let mut tracer = WavefrontPathTracer::new(8, 8, params(1))?;
    let stats = tracer.render_frame(&rt, &scene.camera)?;
    assert_ledger(&stats, 64, 1);
    assert!(stats.medium_samples >= 64);
    assert!(tracer.image().is_finite());

    scene.camera.medium = Some(9);
    let mut rt = RtScene::with_host_memory(SceneParameters::default());
    assert!(rt.upload_scene_data(&scene).is_err());
    Ok(())
}

#[test]
fn same_seed_renders_identical_images() -> Result<()> {
    init_logging();
    let scene = mesh_light_scene();
    let rt = upload(&scene, AccelKind::SingleLevel)?;
    let mut a = WavefrontPathTracer::new(12, 12, params(2))?;
    let mut b = WavefrontPathTracer::new(12, 12, params(2))?;
    let stats_a = a.render_frame(&rt, &scene.camera)?;
    let stats_b = b.render_frame(&rt, &scene.camera)?;
    assert_eq!(stats_a, stats_b);
    assert_eq!(a.image(), b.image());
    Ok(())
}

#[test]
fn accumulation_averages_frames_and_resets() -> Result<()> {
    init_logging();
    let scene = mesh_light_scene();
    let rt = upload(&scene, AccelKind::SingleLevel)?;
    let mut tracer = WavefrontPathTracer::new(8, 8, params(1))?;
    let image = tracer.render(&rt, &scene.camera, 3)?;
    assert_eq!(tracer.frame_index(), 3);
    assert!(!image.is_black());
    tracer.reset_accumulation();
    assert_eq!(tracer.frame_index(), 0);
    assert!(tracer.image().is_black());

    tracer.resize(4, 2)?;
    assert_eq!(tracer.render(&rt, &scene.camera, 1)?.pixels.len(), 8);
    assert!(tracer.resize(0, 2).is_err());
    assert!(WavefrontPathTracer::new(4, 4, PathTracerParams { rr: 0.0, ..params(1) }).is_err());
    Ok(())
}
