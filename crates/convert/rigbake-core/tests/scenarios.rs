use glam::{Mat4, Quat, Vec3};
use rigbake_core::import::SceneDocument;
use rigbake_core::{
    mark_needed, parse_scene_json, BoneId, ConvertConfig, Converter, Scene, Warning,
};

fn approx(a: f32, b: f32, eps: f32) {
    assert!((a - b).abs() <= eps, "left={a} right={b} eps={eps}");
}

fn scene(name: &str) -> Scene {
    let json = rigbake_test_fixtures::scenes::json(name).expect("load scene fixture");
    parse_scene_json(&json).expect("parse scene fixture")
}

#[test]
fn arm_chain_keeps_unweighted_ancestors() {
    let scene = scene("arm_chain");
    let needed = mark_needed(&scene);
    let names: Vec<&str> = needed.iter().map(|id| scene.node(id).name.as_str()).collect();
    assert_eq!(names, vec!["root", "armA", "armB"]);

    let out = Converter::default().build(&scene, "arm_chain").expect("build");
    let skel = &out.skeleton;
    assert_eq!(skel.len(), 3);
    let root = skel.bone_index("root").expect("root bone");
    let arm_a = skel.bone_index("armA").expect("armA bone");
    let arm_b = skel.bone_index("armB").expect("armB bone");
    assert_eq!(skel.bone(root).parent, None);
    assert_eq!(skel.bone(arm_a).parent, Some(root));
    assert_eq!(skel.bone(arm_b).parent, Some(arm_a));
    assert!(skel.bone_index("prop").is_none());

    // armB sits two units up in model space.
    let t = skel.bone(arm_b).world.w_axis.truncate();
    assert!(t.abs_diff_eq(Vec3::new(0.0, 2.0, 0.0), 1e-6));
    assert!(skel.bone(arm_b).offset.is_some());
}

#[test]
fn arm_chain_mesh_is_skinned_to_arm_b() {
    let scene = scene("arm_chain");
    let out = Converter::default().build(&scene, "arm_chain").expect("build");
    assert_eq!(out.submeshes.len(), 1);
    let sub = &out.submeshes[0];
    assert_eq!(sub.name, "arm/skin");
    assert!(sub.skinned);
    let arm_b = out.skeleton.bone_index("armB").expect("armB");
    for v in &sub.vertices {
        assert_eq!(v.bone_indices[0], arm_b.0);
        approx(v.bone_weights[0], 1.0, 1e-6);
        assert!(v.uv.is_some());
    }
    // Skinned geometry stays in mesh space.
    assert_eq!(sub.vertices[1].position, Vec3::new(0.1, 2.0, 0.0));
}

#[test]
fn ten_faces_split_six_and_four() {
    let scene = scene("two_materials");
    let out = Converter::default().build(&scene, "two_materials").expect("build");
    assert_eq!(out.submeshes.len(), 2);

    let wood = &out.submeshes[0];
    let metal = &out.submeshes[1];
    assert_eq!(wood.name, "panel/wood");
    assert_eq!(metal.name, "panel/metal");
    assert_eq!(wood.triangle_count(), 6);
    assert_eq!(metal.triangle_count(), 4);

    // Faces are partitioned exactly: rebuild every source triangle from the
    // submesh buffers and compare as sets of baked positions.
    let mesh = &scene.meshes[0];
    let offset = Vec3::new(5.0, 0.0, 0.0);
    let mut expected: Vec<[Vec3; 3]> = mesh
        .faces
        .iter()
        .map(|f| f.indices.map(|i| mesh.positions[i as usize] + offset))
        .collect();
    let mut got: Vec<[Vec3; 3]> = out
        .submeshes
        .iter()
        .flat_map(|s| {
            s.indices
                .chunks(3)
                .map(move |tri| [0, 1, 2].map(|k| s.vertices[tri[k] as usize].position))
        })
        .collect();
    let key = |t: &[Vec3; 3]| {
        t.iter()
            .flat_map(|v| v.to_array())
            .map(|x| (x * 1000.0).round() as i64)
            .collect::<Vec<_>>()
    };
    expected.sort_by_key(key);
    got.sort_by_key(key);
    assert_eq!(expected.len(), got.len());
    for (e, g) in expected.iter().zip(&got) {
        for k in 0..3 {
            assert!(e[k].abs_diff_eq(g[k], 1e-5));
        }
    }

    // Compact buffers: each submesh only holds vertices it references.
    for s in &out.submeshes {
        let mut used = vec![false; s.vertices.len()];
        for &i in &s.indices {
            used[i as usize] = true;
        }
        assert!(used.into_iter().all(|u| u));
        assert!(!s.skinned);
        for v in &s.vertices {
            assert!(s.bounds.contains(v.position));
        }
    }
}

#[test]
fn six_influences_keep_largest_four() {
    let scene = scene("over_influenced");
    let out = Converter::default().build(&scene, "over_influenced").expect("build");
    let sub = &out.submeshes[0];
    assert!(sub.skinned);

    let v0 = &sub.vertices[0];
    let bone = |n: &str| out.skeleton.bone_index(n).expect("bone").0;
    assert_eq!(v0.bone_indices, [bone("b0"), bone("b1"), bone("b2"), bone("b3")]);
    let kept = 0.30 + 0.25 + 0.20 + 0.10;
    approx(v0.bone_weights[0], 0.30 / kept, 1e-5);
    approx(v0.bone_weights[3], 0.10 / kept, 1e-5);
    approx(v0.bone_weights.iter().sum::<f32>(), 1.0, 1e-5);

    // Vertex 2 has no influences and falls back to the bone above the mesh node.
    let v2 = &sub.vertices[2];
    assert_eq!(v2.bone_indices[0], BoneId(0).0);
    approx(v2.bone_weights[0], 1.0, 1e-6);
    assert_eq!(v2.influence_count(), 1);

    let warnings: Vec<&Warning> = out.warnings.iter().collect();
    assert!(warnings.iter().any(|w| matches!(
        w,
        Warning::OverInfluencedVertex { vertices: 1, max_influences: 6, .. }
    )));
    assert!(warnings
        .iter()
        .any(|w| matches!(w, Warning::UnweightedVertex { vertices: 1, .. })));
}

#[test]
fn repeated_bindings_share_one_slot() {
    let doc: SceneDocument =
        rigbake_test_fixtures::scenes::load("split_bindings").expect("load scene document");
    let scene = doc.into_scene().expect("flat node list");
    let out = Converter::default().build(&scene, "split").expect("build");
    assert!(out.warnings.is_empty(), "{:?}", out.warnings);

    // b0 is bound three times on vertex 0; the four distinct bones all fit.
    let v0 = &out.submeshes[0].vertices[0];
    let bone = |n: &str| out.skeleton.bone_index(n).expect("bone").0;
    assert_eq!(v0.influence_count(), 4);
    assert_eq!(v0.bone_indices, [bone("b0"), bone("b1"), bone("b2"), bone("b3")]);
    approx(v0.bone_weights[0], 0.5 / 0.8, 1e-5);
    approx(v0.bone_weights[3], 0.1 / 0.8, 1e-5);
}

#[test]
fn trailing_static_keys_are_cut() {
    let scene = scene("arm_chain");
    let cfg = ConvertConfig {
        cut_trailing_static_animation: true,
        ..ConvertConfig::default()
    };
    let out = Converter::new(cfg).build(&scene, "arm_chain").expect("build");
    let anim = &out.animations()[0];
    assert_eq!(anim.name, "wave");

    let arm_a = anim.tracks.iter().find(|t| t.bone == "armA").expect("armA track");
    let times: Vec<f32> = arm_a.keys.iter().map(|k| k.time).collect();
    assert_eq!(times, vec![0.0, 1.0, 2.0]);
    // Relative to the bind translation (0, 1, 0).
    assert!(arm_a.keys[2]
        .translation
        .abs_diff_eq(Vec3::new(2.0, 0.0, 0.0), 1e-6));

    // armB keeps both keys; the longest track sets the length.
    let arm_b = anim.tracks.iter().find(|t| t.bone == "armB").expect("armB track");
    assert_eq!(arm_b.keys.len(), 2);
    let end = arm_b.keys[1].rotation;
    assert!(end.abs_diff_eq(Quat::from_rotation_z(std::f32::consts::FRAC_PI_2), 1e-5));
    approx(anim.length, 4.0, 1e-6);

    // Non-bone channels never produce tracks.
    assert!(anim.tracks.iter().all(|t| t.bone != "prop"));
}

#[test]
fn static_mesh_bakes_node_transform() {
    let scene = scene("two_materials");
    let out = Converter::default().build(&scene, "two_materials").expect("build");
    assert!(out.skeleton.is_empty());
    let first = out.submeshes[0].vertices[0].position;
    assert!(first.abs_diff_eq(Vec3::new(5.0, 0.0, 0.0), 1e-6));
    assert_eq!(
        out.transforms().world(scene.find("panel").expect("panel")),
        Mat4::from_translation(Vec3::new(5.0, 0.0, 0.0))
    );
}
