use anyhow::Result;
use sonara_core::ambisonic::channel_count;
use sonara_core::scene::{FaceType, IoSerializer, MeshGroup};
use sonara_core::spatial::QuadBinauralInput;
use sonara_core::{
    AmbisonicFormat, BoxRoomParameters, EnableFlag, MaterialPreset, PerformanceCounter, RayCaster,
    RayHit, ReflectionModel, SonaraContext, SonaraContextDesc, SpatializationStatus, Vec3,
    mono_to_ambisonic, process_quad_binaural,
};
use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;

const SAMPLE_RATE: u32 = 48_000;
const BLOCK: usize = 512;

pub fn run_scenarios() -> Result<()> {
    log::info!("=== Impulse Scenario ===");
    impulse_scenario()?;

    log::info!("=== Status Transitions ===");
    status_transitions()?;

    log::info!("=== Shoebox Reverb ===");
    shoebox_reverb()?;

    log::info!("=== Dynamic Room ===");
    dynamic_room()?;

    log::info!("=== Propagation ===");
    propagation()?;

    log::info!("=== Ambisonics ===");
    ambisonics()?;

    log::info!("=== Quad Binaural ===");
    quad_binaural()?;

    Ok(())
}

/// Format a time value with an appropriate unit
fn format_time_auto(time_us: f64) -> String {
    if time_us < 1_000.0 {
        format!("{:.2} µs", time_us)
    } else if time_us < 1_000_000.0 {
        format!("{:.2} ms", time_us / 1_000.0)
    } else {
        format!("{:.2} s", time_us / 1_000_000.0)
    }
}

fn energy(buffer: &[f32]) -> f32 {
    buffer.iter().map(|s| s * s).sum()
}

fn context(sources: usize) -> Result<SonaraContext> {
    let desc = SonaraContextDesc::new()
        .max_sources(sources)
        .sample_rate(SAMPLE_RATE)
        .buffer_length(BLOCK);
    Ok(SonaraContext::new(desc)?)
}

fn impulse() -> Vec<f32> {
    let mut input = vec![0.0; BLOCK];
    input[0] = 1.0;
    input
}

fn log_counters(ctx: &SonaraContext) {
    for counter in PerformanceCounter::ALL {
        let sample = ctx.performance_counter(counter);
        let mean = if sample.count > 0 {
            sample.time_us / sample.count as f64
        } else {
            0.0
        };
        log::info!(
            "{:?}: {} calls, {} total, {} per call",
            counter,
            sample.count,
            format_time_auto(sample.time_us),
            format_time_auto(mean)
        );
    }
}

fn impulse_scenario() -> Result<()> {
    let mut ctx = context(1)?;
    ctx.set_source_position(0, Vec3::new(1.0, 0.0, 0.0))?;

    let (mut left, mut right) = (vec![0.0; BLOCK], vec![0.0; BLOCK]);
    let status = ctx.spatialize_mono_lr(0, &impulse(), &mut left, &mut right)?;
    log::info!(
        "Source at (1, 0, 0): status {:?}, left energy {:.5}, right energy {:.5}",
        status,
        energy(&left),
        energy(&right)
    );
    log_counters(&ctx);
    Ok(())
}

fn status_transitions() -> Result<()> {
    let mut ctx = context(1)?;
    ctx.set_source_position(0, Vec3::new(0.0, 0.0, -20.0))?;
    ctx.set_source_flags(
        0,
        sonara_core::SourceFlags::from_bits(sonara_core::SourceFlags::DIRECT_TIME_OF_ARRIVAL)?,
    )?;

    let mut out = vec![0.0; 2 * BLOCK];
    let mut input = impulse();
    let mut previous = None;
    for block in 0..12 {
        let status = ctx.spatialize_mono_interleaved(0, &input, &mut out)?;
        if previous != Some(status) {
            log::info!(
                "Block {}: {:?} (output energy {:.3e})",
                block,
                status,
                energy(&out)
            );
            previous = Some(status);
        }
        if status == SpatializationStatus::Finished {
            break;
        }
        input.fill(0.0);
    }
    Ok(())
}

fn shoebox_reverb() -> Result<()> {
    let mut ctx = context(1)?;
    ctx.set_enabled(EnableFlag::SimpleRoomModeling, true);
    ctx.set_enabled(EnableFlag::LateReverberation, true);
    ctx.set_reflection_model(ReflectionModel::StaticShoeBox);
    ctx.set_simple_box_room_parameters(&BoxRoomParameters {
        reflections: [0.9; 6],
        dimensions: [10.0, 4.0, 8.0],
    })?;
    ctx.set_source_position(0, Vec3::new(1.0, 0.0, -2.0))?;
    ctx.set_source_reverb_send(0, 1.0)?;

    let room = ctx.room_dimensions();
    log::info!("Room {:?} m, RT60 {:.2} s", room.dimensions, room.rt60());

    let mut input = impulse();
    let mut out = vec![0.0; 2 * BLOCK];
    for block in 0..48 {
        out.fill(0.0);
        ctx.spatialize_mono_interleaved(0, &input, &mut out)?;
        let dry = energy(&out);
        let status = ctx.mix_in_shared_reverb_interleaved(&mut out)?;
        if block % 8 == 0 {
            log::info!(
                "Block {:>2}: dry {:.3e}, with reverb {:.3e}, reverb {:?}",
                block,
                dry,
                energy(&out),
                status
            );
        }
        input.fill(0.0);
    }
    log_counters(&ctx);
    Ok(())
}

/// An axis-aligned room seen from the inside.
struct BoxCaster {
    min: Vec3,
    max: Vec3,
    reflection: f32,
}

impl RayCaster for BoxCaster {
    fn cast_ray(&self, origin: Vec3, direction: Vec3) -> Option<RayHit> {
        let mut best: Option<(f32, Vec3)> = None;
        for axis in 0..3 {
            let d = direction[axis];
            if d.abs() < 1e-6 {
                continue;
            }
            let (bound, normal_sign) = if d > 0.0 {
                (self.max[axis], -1.0)
            } else {
                (self.min[axis], 1.0)
            };
            let t = (bound - origin[axis]) / d;
            if t > 0.0 && best.is_none_or(|(b, _)| t < b) {
                let mut normal = Vec3::ZERO;
                normal[axis] = normal_sign;
                best = Some((t, normal));
            }
        }
        best.map(|(t, normal)| RayHit::new(origin + direction * t, normal, [self.reflection; 4]))
    }
}

fn dynamic_room() -> Result<()> {
    let mut ctx = context(1)?;
    ctx.set_enabled(EnableFlag::SimpleRoomModeling, true);
    ctx.set_reflection_model(ReflectionModel::DynamicRoomModeling);
    ctx.set_dynamic_room_rays_per_second(8_000)?;
    ctx.set_dynamic_room_interp_speed(0.5)?;
    ctx.assign_raycast_callback(Some(Arc::new(BoxCaster {
        min: Vec3::new(-6.0, -1.5, -4.0),
        max: Vec3::new(6.0, 2.5, 4.0),
        reflection: 0.8,
    })));

    let input = vec![0.0; BLOCK];
    let (mut left, mut right) = (vec![0.0; BLOCK], vec![0.0; BLOCK]);
    for step in 0..10 {
        ctx.spatialize_mono_lr(0, &input, &mut left, &mut right)?;
        let room = ctx.room_dimensions();
        log::info!(
            "Step {}: room {:.2?} m at {:.2?}, {} hits",
            step,
            room.dimensions,
            room.position,
            ctx.raycast_hits(256)?.len()
        );
        std::thread::sleep(Duration::from_millis(100));
    }
    Ok(())
}

fn propagation() -> Result<()> {
    let mut ctx = context(1)?;
    ctx.set_enabled(EnableFlag::SimpleRoomModeling, true);
    ctx.set_reflection_model(ReflectionModel::PropagationSystem);
    ctx.set_propagation_quality(0.5)?;

    let walls = ctx.create_material_from_preset(MaterialPreset::PlasterOnBrick)?;
    let floor = ctx.create_material_from_preset(MaterialPreset::WoodFloor)?;
    let geometry = ctx.create_geometry()?;

    // 10 x 4 x 8 room, faces wound inward
    let (x, y, z) = (5.0, 4.0, 4.0);
    let vertices = [
        -x, 0.0, -z, x, 0.0, -z, x, 0.0, z, -x, 0.0, z, //
        -x, y, -z, x, y, -z, x, y, z, -x, y, z,
    ];
    let indices = [
        0, 1, 2, 3, // floor
        4, 7, 6, 5, // ceiling
        0, 4, 5, 1, // front
        3, 2, 6, 7, // back
        0, 3, 7, 4, // left
        1, 5, 6, 2, // right
    ];
    let groups = [
        MeshGroup {
            index_offset: 0,
            face_count: 1,
            face_type: FaceType::Quads,
            material: Some(floor),
        },
        MeshGroup {
            index_offset: 4,
            face_count: 5,
            face_type: FaceType::Quads,
            material: Some(walls),
        },
    ];
    ctx.upload_mesh_arrays(geometry, &vertices, &indices, &groups)?;
    ctx.set_listener_vectors(Vec3::new(0.0, 1.7, 0.0), Vec3::NEG_Z, Vec3::Y)?;

    let input = vec![0.0; BLOCK];
    let (mut left, mut right) = (vec![0.0; BLOCK], vec![0.0; BLOCK]);
    for step in 0..6 {
        ctx.spatialize_mono_lr(0, &input, &mut left, &mut right)?;
        let room = ctx.room_dimensions();
        log::info!(
            "Step {}: room {:.2?} m, reflections {:.2?}",
            step,
            room.dimensions,
            room.reflections
        );
        std::thread::sleep(Duration::from_millis(150));
    }

    let mut writer = IoSerializer::new(Cursor::new(Vec::new()));
    ctx.write_geometry(geometry, &mut writer)?;
    let bytes = writer.into_inner().into_inner();
    let copy = ctx.create_geometry()?;
    ctx.read_geometry(copy, &mut IoSerializer::new(Cursor::new(bytes.clone())))?;
    log::info!(
        "Geometry serialized to {} bytes and read back with {} faces ({} materials now loaded)",
        bytes.len(),
        ctx.geometry(copy)?.face_count(),
        ctx.material_count()
    );
    Ok(())
}

fn ambisonics() -> Result<()> {
    let ctx = context(1)?;
    let order = 1;
    let channels = channel_count(order)?;
    let tone: Vec<f32> = (0..BLOCK)
        .map(|i| (std::f32::consts::TAU * 500.0 * i as f32 / SAMPLE_RATE as f32).sin())
        .collect();

    let mut stream = ctx.create_ambisonic_stream(SAMPLE_RATE, BLOCK, AmbisonicFormat::AmbiX, order)?;
    for (name, direction) in [("front", Vec3::NEG_Z), ("left", Vec3::NEG_X), ("right", Vec3::X)] {
        let mut encoded = vec![0.0; BLOCK * channels];
        mono_to_ambisonic(&tone, direction, AmbisonicFormat::AmbiX, order, &mut encoded, BLOCK)?;
        let mut decoded = vec![0.0; 2 * BLOCK];
        stream.reset();
        ctx.process_ambisonic_stream(&mut stream, &encoded, &mut decoded, BLOCK)?;
        let left: Vec<f32> = decoded.iter().step_by(2).copied().collect();
        let right: Vec<f32> = decoded.iter().skip(1).step_by(2).copied().collect();
        log::info!(
            "Encoded from {}: left energy {:.2}, right energy {:.2}",
            name,
            energy(&left),
            energy(&right)
        );
    }
    Ok(())
}

fn quad_binaural() -> Result<()> {
    // Each recording is a constant level so the blend weights are visible
    let frames = 64;
    let level = |v: f32| vec![v; frames * 2];
    let (forward, right, back, left) = (level(1.0), level(2.0), level(3.0), level(4.0));
    let input = QuadBinauralInput {
        forward: &forward,
        right: &right,
        back: &back,
        left: &left,
    };
    let mut output = vec![0.0; frames * 2];
    for (name, look) in [
        ("forward", Vec3::NEG_Z),
        ("right", Vec3::X),
        ("between forward and right", Vec3::new(1.0, 0.0, -1.0)),
    ] {
        process_quad_binaural(&input, look, frames, &mut output)?;
        log::info!("Looking {}: blended level {:.2}", name, output[0]);
    }
    Ok(())
}
