// tests/test_config_backends.rs
// JSON configuration driving a full upload and render, plus the wgpu device heap when an adapter exists
// RELEVANT FILES:src/config.rs,src/device/host.rs,src/device/gpu.rs

use anyhow::Result;
use glam::Vec3;
use pathwave::device::{DeviceMemory, HostMemory, TypedBuffer};
use pathwave::scene::{Camera, Light, Material, Mesh, Scene};
use pathwave::{AccelKind, RenderError, RendererConfig, RtScene, WavefrontPathTracer};
use std::sync::Arc;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn lit_box() -> Scene {
    let mut scene = Scene::new(Camera::look_at(Vec3::new(2.0, 2.0, 4.0), Vec3::ZERO, 45.0));
    let white = scene.add_material(Material::diffuse(Vec3::splat(0.7)));
    scene.add_mesh_instance(Mesh::cuboid(Vec3::splat(-0.5), Vec3::splat(0.5)).with_material(white));
    scene.add_light(Light::directional(Vec3::new(-0.3, -1.0, -0.2), Vec3::splat(2.0)));
    scene
}

#[test]
fn config_from_json_drives_a_render() -> Result<()> {
    init_logging();
    let config = RendererConfig::from_json_str(
        r#"{
            "scene": { "accel": "multi", "bvh_max_leaf_size": 2 },
            "path_tracer": { "max_depth": 4, "spp": 2, "seed": 11 }
        }"#,
    )?;
    assert_eq!(config.scene.accel, AccelKind::MultiLevel);

    let scene = lit_box();
    let mut rt = RtScene::with_host_memory(config.scene.clone());
    rt.upload_scene_data(&scene)?;
    assert_eq!(rt.accel().map(|a| a.kind()), Some(AccelKind::MultiLevel));

    let mut tracer = WavefrontPathTracer::new(10, 10, config.path_tracer.clone())?;
    let stats = tracer.render_frame(&rt, &scene.camera)?;
    assert_eq!(stats.camera_rays, 200);
    assert!(stats.is_conserved());
    assert!(!tracer.image().is_black());

    let round_trip = RendererConfig::from_json_str(&config.to_json_string()?)?;
    assert_eq!(round_trip, config);
    Ok(())
}

#[test]
fn malformed_config_is_a_config_error() {
    let err = RendererConfig::from_json_str(r#"{"path_tracer": {"spp": "many"}}"#).unwrap_err();
    assert!(matches!(err, RenderError::Config(_)));
    let err = RendererConfig::from_json_str(r#"{"scene": {"bvh_max_leaf_size": 0}}"#).unwrap_err();
    assert!(matches!(err, RenderError::Config(_)));
}

#[test]
fn device_budget_limits_uploads() {
    init_logging();
    let memory = Arc::new(HostMemory::with_budget(64));
    let small = TypedBuffer::<u32>::alloc_and_copy_from_host(memory.clone(), &[1, 2, 3, 4]);
    assert!(small.is_ok());
    let large = TypedBuffer::<u32>::alloc_and_copy_from_host(memory.clone(), &[0; 64]);
    assert!(matches!(large.err(), Some(RenderError::Device(_))));
    assert_eq!(memory.allocated_bytes(), 16);
}

#[cfg(feature = "gpu")]
mod gpu {
    use super::*;
    use pathwave::device::GpuMemory;
    use pathwave::SceneParameters;

    /// Get a GPU heap for testing, or skip if no adapter is available
    fn gpu_memory_or_skip() -> Option<GpuMemory> {
        let memory = GpuMemory::from_shared_context();
        if memory.is_none() {
            eprintln!("no wgpu adapter; skipping");
        }
        memory
    }

    #[test]
    fn scene_uploads_to_a_real_adapter() -> Result<()> {
        init_logging();
        let Some(memory) = gpu_memory_or_skip() else {
            return Ok(());
        };
        let scene = lit_box();
        let mut rt = RtScene::new(Arc::new(memory), SceneParameters::default());
        rt.upload_scene_data(&scene)?;
        for &leaf in rt.upload_sequence() {
            let ptr = rt.managed_ptr(leaf).expect("managed pointer");
            let staged = rt.staged_bytes(leaf).expect("staged bytes");
            assert_eq!(rt.memory().copy_to_host(ptr, staged.len())?.as_slice(), staged);
        }
        let mut tracer = WavefrontPathTracer::new(8, 8, Default::default())?;
        let stats = tracer.render_frame(&rt, &scene.camera)?;
        assert!(stats.is_conserved());
        Ok(())
    }
}
