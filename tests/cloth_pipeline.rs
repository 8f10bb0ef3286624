//! Integration tests for the cloth pipeline.
//!
//! Everything runs against the `DummyBackend`, which records commands and applies
//! buffer writes and copies on the CPU. The wgpu test needs an adapter and is ignored
//! by default.
//!
//! ```bash
//! cargo test --test cloth_pipeline
//! cargo test --test cloth_pipeline -- --ignored
//! ```

use cloth_engine::backend::RecordedCommand;
use cloth_engine::{
    ClothEngineConfig, ClothGridMesh, ClothSettings, ClothSystem, DummyBackend, SphereCollider,
    SphereColliderRegistry, Transform,
};
use glam::Vec3;
use rstest::rstest;

const DT: f32 = 1.0 / 60.0;

fn settings(rows: u32, columns: u32) -> ClothSettings {
    ClothSettings {
        num_row: rows,
        num_column: columns,
        ..Default::default()
    }
}

fn dummy_system(config: &ClothEngineConfig) -> ClothSystem<DummyBackend> {
    ClothSystem::new(DummyBackend::new(), config).unwrap()
}

/// Create `count` registered meshes laid out along X
fn spawn_meshes(system: &ClothSystem<DummyBackend>, count: usize, rows: u32) -> Vec<ClothGridMesh> {
    let sender = system.command_sender();
    (0..count)
        .map(|i| {
            let mut mesh = ClothGridMesh::new(
                format!("Cloth {i}"),
                Transform::from_position(Vec3::new(i as f32 * 500.0, 0.0, 0.0)),
            );
            mesh.init_cloth_settings(settings(rows, 2)).unwrap();
            mesh.register(Some(&sender)).unwrap();
            mesh
        })
        .collect()
}

// ============================================================================
// Batch gating
// ============================================================================

#[rstest]
#[case::one_of_one(1, 1, 1)]
#[case::two_of_three(3, 2, 0)]
#[case::three_of_three(3, 3, 1)]
#[case::full_batch(16, 16, 1)]
fn test_batch_waits_for_every_registered_mesh(
    #[case] registered: usize,
    #[case] submitting: usize,
    #[case] expected_submissions: usize,
) {
    let mut system = dummy_system(&ClothEngineConfig::default());
    let mut meshes = spawn_meshes(&system, registered, 1);
    system.process_commands().unwrap();

    let mut wind = ClothEngineConfig::default().wind();
    for mesh in meshes.iter_mut().take(submitting) {
        assert!(mesh.send_render_dynamic_data(DT, &mut wind, &[]).unwrap());
    }
    system.process_commands().unwrap();

    assert_eq!(system.backend().submissions(), expected_submissions);
    let pending = if expected_submissions == 1 { 0 } else { submitting };
    assert_eq!(system.registry().pending_count(), pending);
}

#[test]
fn test_one_simulation_dispatch_per_batch() {
    let mut system = dummy_system(&ClothEngineConfig::default());
    let mut meshes = spawn_meshes(&system, 3, 2);
    system.process_commands().unwrap();

    let mut wind = ClothEngineConfig::default().wind();
    for mesh in &mut meshes {
        mesh.send_render_dynamic_data(DT, &mut wind, &[]).unwrap();
    }
    system.process_commands().unwrap();

    let simulation_passes = system
        .backend()
        .commands()
        .iter()
        .filter(|c| **c == RecordedCommand::BeginComputePass(Some("Cloth Simulation".into())))
        .count();
    assert_eq!(simulation_passes, 1);
    // Three meshes simulated together, then one tangent dispatch each
    assert_eq!(
        system.backend().dispatches(),
        vec![(3, 1, 1), (1, 1, 1), (1, 1, 1), (1, 1, 1)]
    );
}

// ============================================================================
// Working buffer slots
// ============================================================================

#[test]
fn test_slots_are_disjoint_and_never_compacted() {
    let mut system = dummy_system(&ClothEngineConfig::default());
    let mut meshes = spawn_meshes(&system, 3, 2);
    system.process_commands().unwrap();

    let ids: Vec<_> = meshes.iter().map(|m| m.id().unwrap()).collect();
    let slots: Vec<_> = ids
        .iter()
        .map(|&id| system.registry().slot(id).unwrap())
        .collect();
    assert_eq!(slots[0].range(), 0..9);
    assert_eq!(slots[1].range(), 9..18);
    assert_eq!(slots[2].range(), 18..27);

    // Removing the middle mesh leaves a hole; later meshes keep their offsets
    meshes.remove(1);
    let mut late = spawn_meshes(&system, 1, 2);
    system.process_commands().unwrap();

    assert_eq!(system.registry().slot(ids[2]).unwrap().offset, 18);
    let late_slot = system.registry().slot(late[0].id().unwrap()).unwrap();
    assert_eq!(late_slot.offset, 27);
    assert_eq!(system.registry().capacity(), 36);

    let mut wind = ClothEngineConfig::default().wind();
    for mesh in meshes.iter_mut().chain(late.iter_mut()) {
        mesh.send_render_dynamic_data(DT, &mut wind, &[]).unwrap();
    }
    system.process_commands().unwrap();
    assert_eq!(system.backend().submissions(), 1);
    assert_eq!(system.deformer().work_capacity(), 36);
}

#[test]
fn test_seventeenth_mesh_is_refused() {
    let mut system = dummy_system(&ClothEngineConfig::default());
    let mut meshes = spawn_meshes(&system, 17, 1);
    system.process_commands().unwrap();

    let refused = meshes[16].id().unwrap();
    assert_eq!(system.registry().registered_count(), 16);
    assert!(system.mesh_buffers(refused).is_none());
    assert!(system.is_refused(refused));

    // The refused mesh keeps sending; the sixteen registered ones still batch
    let mut wind = ClothEngineConfig::default().wind();
    for mesh in &mut meshes {
        mesh.send_render_dynamic_data(DT, &mut wind, &[]).unwrap();
    }
    system.process_commands().unwrap();
    assert_eq!(system.backend().submissions(), 1);
    assert_eq!(system.backend().dispatches()[0], (16, 1, 1));

    meshes.pop();
    system.process_commands().unwrap();
    assert!(!system.is_refused(refused));
}

#[test]
fn test_failed_flush_leaves_no_transients_behind() {
    let mut system = dummy_system(&ClothEngineConfig::default());
    let mut meshes = spawn_meshes(&system, 2, 1);
    system.process_commands().unwrap();
    let mut wind = ClothEngineConfig::default().wind();

    // First flush allocates the working buffers
    for mesh in &mut meshes {
        mesh.send_render_dynamic_data(DT, &mut wind, &[]).unwrap();
    }
    system.process_commands().unwrap();
    let baseline = system.backend().live_buffer_count();

    system.backend_mut().fail_buffer_creation_after(Some(1));
    for mesh in &mut meshes {
        mesh.send_render_dynamic_data(DT, &mut wind, &[]).unwrap();
    }
    assert!(system.process_commands().is_err());
    assert_eq!(system.backend().live_buffer_count(), baseline);

    system.backend_mut().fail_buffer_creation_after(None);
    for mesh in &mut meshes {
        mesh.send_render_dynamic_data(DT, &mut wind, &[]).unwrap();
    }
    system.process_commands().unwrap();
    assert_eq!(system.backend().submissions(), 2);
    assert_eq!(system.backend().live_buffer_count(), baseline);
    assert_eq!(system.backend().overflowing_writes(), 0);
}

// ============================================================================
// Frame barrier
// ============================================================================

#[test]
fn test_end_frame_flushes_partial_batch_and_reports_stale_meshes() {
    let config = ClothEngineConfig {
        stale_frame_threshold: 2,
        ..Default::default()
    };
    let mut system = dummy_system(&config);
    let mut meshes = spawn_meshes(&system, 2, 1);
    let silent = meshes[1].id().unwrap();
    let mut wind = config.wind();

    let mut reports = Vec::new();
    for _ in 0..3 {
        system.begin_frame().unwrap();
        meshes[0].send_render_dynamic_data(DT, &mut wind, &[]).unwrap();
        reports.push(system.end_frame().unwrap());
    }

    for report in &reports {
        assert_eq!(report.flushed, 1);
        assert_eq!(report.missing, vec![silent]);
    }
    assert!(reports[0].stale.is_empty());
    assert!(reports[1].stale.is_empty());
    assert_eq!(reports[2].stale, vec![silent]);
    assert_eq!(system.backend().submissions(), 3);

    // Submitting again clears the audit
    system.begin_frame().unwrap();
    for mesh in &mut meshes {
        mesh.send_render_dynamic_data(DT, &mut wind, &[]).unwrap();
    }
    let report = system.end_frame().unwrap();
    assert_eq!(report.flushed, 0);
    assert!(report.missing.is_empty());
    assert_eq!(system.registry().missed_frames(silent), Some(0));
    assert_eq!(system.backend().submissions(), 4);
}

#[test]
fn test_mesh_dropped_mid_frame_releases_the_batch() {
    let mut system = dummy_system(&ClothEngineConfig::default());
    let mut meshes = spawn_meshes(&system, 2, 1);
    system.process_commands().unwrap();

    let mut wind = ClothEngineConfig::default().wind();
    meshes[0].send_render_dynamic_data(DT, &mut wind, &[]).unwrap();
    system.process_commands().unwrap();
    assert_eq!(system.backend().submissions(), 0);

    meshes.pop();
    system.process_commands().unwrap();
    assert_eq!(system.backend().submissions(), 1);
}

// ============================================================================
// Colliders
// ============================================================================

#[test]
fn test_collider_snapshot_feeds_the_batch() {
    let mut system = dummy_system(&ClothEngineConfig::default());
    let mut meshes = spawn_meshes(&system, 1, 2);
    system.process_commands().unwrap();

    let registry = SphereColliderRegistry::shared();
    let mut colliders: Vec<SphereCollider> = (0..20)
        .map(|i| SphereCollider::new(Vec3::new(i as f32 * 10.0, 0.0, -50.0)))
        .collect();
    for collider in &mut colliders {
        collider.attach(Some(&registry));
    }
    let snapshot = registry.read().snapshot();
    assert_eq!(snapshot.len(), 20);

    // Over-full snapshots are truncated per mesh, not rejected
    let mut wind = ClothEngineConfig::default().wind();
    assert!(meshes[0]
        .send_render_dynamic_data(DT, &mut wind, &snapshot)
        .unwrap());
    system.process_commands().unwrap();
    assert_eq!(system.backend().submissions(), 1);

    colliders.clear();
    assert!(registry.read().is_empty());
}

// ============================================================================
// wgpu
// ============================================================================

#[test]
#[ignore = "needs a GPU adapter"]
fn test_wgpu_gravity_moves_free_vertices() {
    let config = ClothEngineConfig::default();
    let mut system = match config.create_wgpu_system() {
        Ok(system) => system,
        Err(err) => {
            eprintln!("wgpu backend not available, skipping: {err}");
            return;
        }
    };
    let sender = system.command_sender();
    eprintln!("running on {}", system.backend().adapter_info().name);

    let mut mesh = ClothGridMesh::new("Flag", Transform::default());
    mesh.init_cloth_settings(settings(4, 4)).unwrap();
    mesh.register(Some(&sender)).unwrap();
    let id = mesh.id().unwrap();
    system.process_commands().unwrap();
    let position = system.mesh_buffers(id).unwrap().position;
    assert!(system.backend().raw_buffer(position).is_some());
    let initial = system.read_positions(id).unwrap();

    let mut wind = config.wind();
    for _ in 0..10 {
        system.begin_frame().unwrap();
        mesh.send_render_dynamic_data(DT, &mut wind, &[]).unwrap();
        system.end_frame().unwrap();
    }

    let positions = system.read_positions(id).unwrap();
    assert_eq!(positions.len(), initial.len());
    // Row 0 is pinned
    for column in 0..=4 {
        assert_eq!(positions[column], initial[column]);
    }
    let last = positions.len() - 1;
    assert!(positions.iter().all(|p| p.is_finite()));
    assert!(positions[last].z < initial[last].z);
}
