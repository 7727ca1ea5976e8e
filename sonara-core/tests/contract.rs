use sonara_core::scene::{FaceType, IoSerializer, MeshGroup};
use sonara_core::{
    MaterialPreset, MaterialProperty, SonaraContext, SonaraContextDesc, SonaraError, SourceFlags,
    SpatializationStatus, Vec3, get_reflection_bands,
};
use std::io::Cursor;

const BLOCK: usize = 512;

fn context() -> SonaraContext {
    let _ = env_logger::builder().is_test(true).try_init();
    let desc = SonaraContextDesc::new()
        .max_sources(1)
        .sample_rate(48_000)
        .buffer_length(BLOCK);
    SonaraContext::new(desc).unwrap()
}

fn energy(buffer: &[f32]) -> f32 {
    buffer.iter().map(|s| s * s).sum()
}

#[test]
fn test_impulse_to_the_side_reaches_both_ears() {
    let mut ctx = context();
    ctx.set_source_position(0, Vec3::new(1.0, 0.0, 0.0)).unwrap();

    let mut input = vec![0.0f32; BLOCK];
    input[0] = 1.0;
    let (mut left, mut right) = (vec![0.0f32; BLOCK], vec![0.0f32; BLOCK]);
    let status = ctx
        .spatialize_mono_lr(0, &input, &mut left, &mut right)
        .unwrap();

    assert!(matches!(
        status,
        SpatializationStatus::Working | SpatializationStatus::Finished
    ));
    assert!(energy(&left) > 0.0);
    assert!(energy(&right) > 0.0);
    assert!(energy(&right) > energy(&left), "near ear is louder");
}

#[test]
fn test_status_finishes_after_silence() {
    let mut ctx = context();
    ctx.set_source_position(0, Vec3::new(0.0, 0.0, -1.0)).unwrap();
    let mut input = vec![0.0f32; BLOCK];
    input[0] = 1.0;
    let mut out = vec![0.0f32; 2 * BLOCK];

    let first = ctx.spatialize_mono_interleaved(0, &input, &mut out).unwrap();
    assert_eq!(first, SpatializationStatus::Working);

    input[0] = 0.0;
    let second = ctx.spatialize_mono_interleaved(0, &input, &mut out).unwrap();
    assert_eq!(second, SpatializationStatus::Finished);
}

#[test]
fn test_delayed_arrival_keeps_working_on_silent_input() {
    let mut ctx = context();
    // 20 m away: about 2800 samples of propagation delay
    ctx.set_source_position(0, Vec3::new(0.0, 0.0, -20.0)).unwrap();
    ctx.set_source_flags(
        0,
        SourceFlags::from_bits(SourceFlags::DIRECT_TIME_OF_ARRIVAL).unwrap(),
    )
    .unwrap();

    let mut input = vec![0.0f32; BLOCK];
    input[0] = 1.0;
    let mut out = vec![0.0f32; 2 * BLOCK];
    assert_eq!(
        ctx.spatialize_mono_interleaved(0, &input, &mut out).unwrap(),
        SpatializationStatus::Working
    );
    input[0] = 0.0;

    let mut heard_while_silent = false;
    let mut finished_at = None;
    for block in 1..16 {
        let status = ctx.spatialize_mono_interleaved(0, &input, &mut out).unwrap();
        if energy(&out) > 0.0 {
            assert_eq!(status, SpatializationStatus::Working);
            heard_while_silent = true;
        }
        if status == SpatializationStatus::Finished {
            finished_at = Some(block);
            break;
        }
    }
    assert!(heard_while_silent);
    assert!(finished_at.is_some_and(|b| b > 5), "{:?}", finished_at);
}

#[test]
fn test_preset_reflection_bands_exact() {
    let mut bands = [0.0f32; 4];
    get_reflection_bands(MaterialPreset::Brick as i32, &mut bands).unwrap();
    assert_eq!(bands, [0.975468814, 0.972064495, 0.949180186, 0.930105388]);
    get_reflection_bands(MaterialPreset::Snow as i32, &mut bands).unwrap();
    assert_eq!(bands, [0.532252669, 0.154535770, 0.0509644151, 0.0500000119]);
    get_reflection_bands(MaterialPreset::SoundProof as i32, &mut bands).unwrap();
    assert_eq!(bands, [0.0; 4]);

    for (i, preset) in MaterialPreset::ALL.iter().enumerate() {
        get_reflection_bands(i as i32, &mut bands).unwrap();
        assert_eq!(bands, preset.reflection_bands(), "{:?}", preset);
    }
}

#[test]
fn test_invalid_preset_or_buffer_zeroes_bands() {
    let mut bands = [0.7f32; 4];
    let err = get_reflection_bands(MaterialPreset::COUNT as i32, &mut bands).unwrap_err();
    assert!(matches!(err, SonaraError::InvalidParam(_)));
    assert_eq!(bands, [0.0; 4]);

    let mut bands = [0.7f32; 4];
    assert!(get_reflection_bands(-1, &mut bands).is_err());
    assert_eq!(bands, [0.0; 4]);

    let mut short = [0.7f32; 3];
    assert!(get_reflection_bands(0, &mut short).is_err());
    assert_eq!(short, [0.0; 3]);
}

#[cfg(feature = "propagation")]
#[test]
fn test_materials_conserve_energy() {
    let mut ctx = context();
    let frequencies = [125.0f32, 500.0, 1000.0, 2000.0, 8000.0];

    let mut materials = vec![ctx.create_material().unwrap()];
    for preset in MaterialPreset::ALL {
        materials.push(ctx.create_material_from_preset(preset).unwrap());
    }

    for id in materials {
        for f in frequencies {
            ctx.material_set_frequency(id, MaterialProperty::Absorption, f, 0.2)
                .unwrap();
            ctx.material_set_frequency(id, MaterialProperty::Transmission, f, 0.6)
                .unwrap();
            let a = ctx
                .material_get_frequency(id, MaterialProperty::Absorption, f)
                .unwrap();
            let t = ctx
                .material_get_frequency(id, MaterialProperty::Transmission, f)
                .unwrap();
            assert!(1.0 - a + t <= 1.0 + 1e-6, "a {} t {} at {} Hz", a, t, f);
        }
    }
}

#[cfg(feature = "propagation")]
fn box_geometry(ctx: &mut SonaraContext) -> (sonara_core::GeometryId, sonara_core::MaterialId) {
    let concrete = ctx
        .create_material_from_preset(MaterialPreset::Concrete)
        .unwrap();
    let geometry = ctx.create_geometry().unwrap();
    let vertices = [
        -1.0, -1.0, -1.0, 1.0, -1.0, -1.0, 1.0, 1.0, -1.0, -1.0, 1.0, -1.0, //
        -1.0, -1.0, 1.0, 1.0, -1.0, 1.0, 1.0, 1.0, 1.0, -1.0, 1.0, 1.0,
    ];
    let indices = [0, 1, 2, 3, 4, 5, 6, 7, 0, 1, 5, 4];
    let groups = [
        MeshGroup {
            index_offset: 0,
            face_count: 2,
            face_type: FaceType::Quads,
            material: Some(concrete),
        },
        MeshGroup {
            index_offset: 8,
            face_count: 1,
            face_type: FaceType::Quads,
            material: None,
        },
    ];
    ctx.upload_mesh_arrays(geometry, &vertices, &indices, &groups)
        .unwrap();
    (geometry, concrete)
}

#[cfg(feature = "propagation")]
#[test]
fn test_geometry_round_trip_through_serializer() {
    let mut ctx = context();
    let (geometry, concrete) = box_geometry(&mut ctx);
    let mut transform = [0.0f32; 16];
    transform[0] = 2.0;
    transform[5] = 1.0;
    transform[10] = 1.0;
    transform[15] = 1.0;
    ctx.set_geometry_transform(geometry, &transform).unwrap();

    let mut writer = IoSerializer::new(Cursor::new(Vec::new()));
    ctx.write_geometry(geometry, &mut writer).unwrap();
    let bytes = writer.into_inner().into_inner();
    assert!(!bytes.is_empty());

    let materials_before = ctx.material_count();
    let restored = ctx.create_geometry().unwrap();
    let mut reader = IoSerializer::new(Cursor::new(bytes));
    ctx.read_geometry(restored, &mut reader).unwrap();

    let original = ctx.geometry(geometry).unwrap().clone();
    let copy = ctx.geometry(restored).unwrap();
    assert_eq!(copy.mesh().vertices(), original.mesh().vertices());
    assert_eq!(copy.mesh().indices(), original.mesh().indices());
    assert_eq!(copy.transform(), original.transform());
    assert_eq!(copy.face_count(), 3);

    let (a, b) = (original.mesh().groups(), copy.mesh().groups());
    assert_eq!(a.len(), b.len());
    for (x, y) in a.iter().zip(b) {
        assert_eq!(x.index_offset, y.index_offset);
        assert_eq!(x.face_count, y.face_count);
        assert_eq!(x.face_type, y.face_type);
        assert_eq!(x.material.is_some(), y.material.is_some());
    }

    // Materials are recreated, not shared.
    let copied = b[0].material.unwrap();
    assert_ne!(copied, concrete);
    assert!(ctx.material_count() > materials_before);
    assert_eq!(
        ctx.material(copied).unwrap().reflection_bands(),
        ctx.material(concrete).unwrap().reflection_bands()
    );
}

#[cfg(feature = "propagation")]
#[test]
fn test_quality_change_keeps_scene() {
    let mut ctx = context();
    let (geometry, concrete) = box_geometry(&mut ctx);
    let faces = ctx.geometry(geometry).unwrap().face_count();
    let materials = ctx.material_count();
    let bands = ctx.material(concrete).unwrap().reflection_bands();

    ctx.set_propagation_quality(0.1).unwrap();
    ctx.set_propagation_quality(1.0).unwrap();
    assert!(ctx.set_propagation_quality(1.5).is_err());

    assert_eq!(ctx.geometry(geometry).unwrap().face_count(), faces);
    assert_eq!(ctx.material_count(), materials);
    assert_eq!(ctx.material(concrete).unwrap().reflection_bands(), bands);
}
