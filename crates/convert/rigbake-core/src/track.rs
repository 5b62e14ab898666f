//! Keyframe tracks from per-node animation channels.
//!
//! Model:
//! - A channel has independent position/rotation/scaling key lists in ticks.
//! - The track's key times are the union of the three lists; each component is
//!   sampled at every time (linear for vectors, shortest-arc nlerp for
//!   rotations, held at the ends). Missing components take the bind value.
//! - Times become seconds (`ticks / ticks_per_second`) and are divided by the
//!   speed modifier.
//! - With a bind transform, keys are stored relative to it: translation as an
//!   offset, rotation as `bind⁻¹ * r`, scale as a ratio.
//!
//! Trailing cut: walking back from the end, a key equal to the one before it
//! is dropped; the walk stops at the first key that differs.

use glam::{Mat4, Quat, Vec3};
use hashbrown::HashSet;
use serde::Serialize;

use crate::config::ConvertConfig;
use crate::diagnostics::{Diagnostics, Warning};
use crate::scene::{Animation, NodeChannel, QuatKey, VectorKey};
use crate::skeleton::Skeleton;
use crate::transform::NodeTransforms;

/// Used when the source leaves ticks-per-second unset.
pub const DEFAULT_TICKS_PER_SECOND: f64 = 25.0;

/// Component tolerance when comparing two poses.
pub const KEY_EPSILON: f32 = 1e-5;

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct Keyframe {
    /// Seconds from the start of the animation.
    pub time: f32,
    pub translation: Vec3,
    pub rotation: Quat,
    pub scale: Vec3,
}

impl Keyframe {
    /// Same pose within `eps`; `q` and `-q` count as the same rotation.
    pub fn same_pose(&self, other: &Keyframe, eps: f32) -> bool {
        let rotation = if self.rotation.dot(other.rotation) < 0.0 {
            -other.rotation
        } else {
            other.rotation
        };
        self.translation.abs_diff_eq(other.translation, eps)
            && self.scale.abs_diff_eq(other.scale, eps)
            && self.rotation.abs_diff_eq(rotation, eps)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct AnimationTrack {
    /// Target bone name.
    pub bone: String,
    pub keys: Vec<Keyframe>,
}

impl AnimationTrack {
    /// Time of the last key.
    pub fn length(&self) -> f32 {
        self.keys.last().map(|k| k.time).unwrap_or(0.0)
    }

    pub fn is_static(&self) -> bool {
        match self.keys.first() {
            Some(first) => self.keys.iter().all(|k| k.same_pose(first, KEY_EPSILON)),
            None => true,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SkeletonAnimation {
    pub name: String,
    /// Seconds.
    pub length: f32,
    pub tracks: Vec<AnimationTrack>,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TrackPolicy {
    pub speed_modifier: f32,
    pub cut_trailing_static: bool,
    pub omit_static: bool,
    pub relative_to_bind_pose: bool,
}

impl Default for TrackPolicy {
    fn default() -> Self {
        Self {
            speed_modifier: 1.0,
            cut_trailing_static: false,
            omit_static: false,
            relative_to_bind_pose: true,
        }
    }
}

impl From<&ConvertConfig> for TrackPolicy {
    fn from(cfg: &ConvertConfig) -> Self {
        Self {
            speed_modifier: cfg.animation_speed_modifier,
            cut_trailing_static: cfg.cut_trailing_static_animation,
            omit_static: cfg.omit_static_tracks,
            relative_to_bind_pose: cfg.relative_to_bind_pose,
        }
    }
}

impl TrackPolicy {
    fn seconds(&self, ticks: f64, ticks_per_second: f64) -> f32 {
        let tps = if ticks_per_second > 0.0 {
            ticks_per_second
        } else {
            DEFAULT_TICKS_PER_SECOND
        };
        (ticks / tps / self.speed_modifier as f64) as f32
    }
}

/// Drop trailing keys that repeat their predecessor. Idempotent; a fully
/// static track collapses to its first key.
pub fn cut_trailing(keys: &mut Vec<Keyframe>, eps: f32) {
    while keys.len() > 1 {
        let n = keys.len();
        if keys[n - 1].same_pose(&keys[n - 2], eps) {
            keys.pop();
        } else {
            break;
        }
    }
}

/// Build the track for `node`. `None` when the animation has no channel for
/// it, the channel has no keys, or the track is static and the policy omits
/// static tracks. `bind` is the node's local bind transform; when given,
/// keys are made relative to it and it fills in missing components.
pub fn build_track(
    animation: &Animation,
    node: &str,
    policy: &TrackPolicy,
    bind: Option<Mat4>,
    diag: &mut Diagnostics,
) -> Option<AnimationTrack> {
    let channel = animation.channel(node)?;
    let channel = clean_channel(animation, channel, diag)?;

    let (bind_s, bind_r, bind_t) = bind
        .map(|m| m.to_scale_rotation_translation())
        .unwrap_or((Vec3::ONE, Quat::IDENTITY, Vec3::ZERO));
    let bind_r_inv = bind_r.inverse();

    let mut times: Vec<f64> = channel
        .position_keys
        .iter()
        .map(|k| k.time)
        .chain(channel.rotation_keys.iter().map(|k| k.time))
        .chain(channel.scaling_keys.iter().map(|k| k.time))
        .collect();
    times.sort_by(f64::total_cmp);
    times.dedup();

    let position_times = key_times(&channel.position_keys, |k| k.time);
    let rotation_times = key_times(&channel.rotation_keys, |k| k.time);
    let scaling_times = key_times(&channel.scaling_keys, |k| k.time);

    let mut keys: Vec<Keyframe> = times
        .into_iter()
        .map(|t| {
            let translation =
                sample_vec3(&channel.position_keys, &position_times, t).unwrap_or(bind_t);
            let rotation =
                sample_quat(&channel.rotation_keys, &rotation_times, t).unwrap_or(bind_r);
            let scale = sample_vec3(&channel.scaling_keys, &scaling_times, t).unwrap_or(bind_s);
            let time = policy.seconds(t, animation.ticks_per_second);
            if bind.is_some() {
                Keyframe {
                    time,
                    translation: translation - bind_t,
                    rotation: (bind_r_inv * rotation).normalize(),
                    scale: ratio(scale, bind_s),
                }
            } else {
                Keyframe {
                    time,
                    translation,
                    rotation,
                    scale,
                }
            }
        })
        .collect();

    if policy.cut_trailing_static {
        cut_trailing(&mut keys, KEY_EPSILON);
    }
    let track = AnimationTrack {
        bone: node.to_string(),
        keys,
    };
    if policy.omit_static && track.is_static() {
        return None;
    }
    Some(track)
}

/// Build every bone track of one animation, in channel order.
pub fn build_animation(
    animation: &Animation,
    index: usize,
    skeleton: &Skeleton,
    transforms: &NodeTransforms,
    policy: &TrackPolicy,
    name_override: Option<&str>,
    diag: &mut Diagnostics,
) -> SkeletonAnimation {
    let name = match name_override {
        Some(n) => n.to_string(),
        None if animation.name.is_empty() => format!("animation_{index}"),
        None => animation.name.clone(),
    };

    let mut seen = HashSet::new();
    let mut tracks = Vec::new();
    for channel in &animation.channels {
        if !seen.insert(channel.node.as_str()) {
            continue;
        }
        let Some(bone) = skeleton.bone_index(&channel.node) else {
            log::debug!("animation '{name}': node '{}' is not a bone", channel.node);
            continue;
        };
        let bind = policy
            .relative_to_bind_pose
            .then(|| transforms.local(skeleton.bone(bone).node));
        if let Some(track) = build_track(animation, &channel.node, policy, bind, diag) {
            tracks.push(track);
        }
    }

    let longest = tracks.iter().map(AnimationTrack::length).fold(0.0, f32::max);
    let length = if policy.cut_trailing_static {
        longest
    } else {
        policy
            .seconds(animation.duration, animation.ticks_per_second)
            .max(longest)
    };

    SkeletonAnimation {
        name,
        length,
        tracks,
    }
}

/// Sorted, finite-time, last-wins copy of a channel; `None` if nothing usable is left.
fn clean_channel(
    animation: &Animation,
    channel: &NodeChannel,
    diag: &mut Diagnostics,
) -> Option<NodeChannel> {
    let mut warn = |reason: &str| {
        diag.push(Warning::MalformedAnimation {
            animation: animation.name.clone(),
            node: channel.node.clone(),
            reason: reason.to_string(),
        })
    };

    let mut out = channel.clone();
    let before = out.position_keys.len() + out.rotation_keys.len() + out.scaling_keys.len();
    out.position_keys.retain(|k| k.time.is_finite());
    out.rotation_keys.retain(|k| k.time.is_finite());
    out.scaling_keys.retain(|k| k.time.is_finite());
    let after = out.position_keys.len() + out.rotation_keys.len() + out.scaling_keys.len();
    if after < before {
        warn("dropped keys with non-finite time");
    }
    if out.is_empty() {
        warn("channel has no keys; skipped");
        return None;
    }

    let unsorted = !is_sorted(out.position_keys.iter().map(|k| k.time))
        || !is_sorted(out.rotation_keys.iter().map(|k| k.time))
        || !is_sorted(out.scaling_keys.iter().map(|k| k.time));
    if unsorted {
        warn("key times not monotonic; sorted");
        out.position_keys.sort_by(|a, b| a.time.total_cmp(&b.time));
        out.rotation_keys.sort_by(|a, b| a.time.total_cmp(&b.time));
        out.scaling_keys.sort_by(|a, b| a.time.total_cmp(&b.time));
    }
    dedup_keep_last(&mut out.position_keys, |k| k.time);
    dedup_keep_last(&mut out.rotation_keys, |k| k.time);
    dedup_keep_last(&mut out.scaling_keys, |k| k.time);
    Some(out)
}

fn is_sorted(mut times: impl Iterator<Item = f64>) -> bool {
    let Some(mut last) = times.next() else {
        return true;
    };
    for t in times {
        if t < last {
            return false;
        }
        last = t;
    }
    true
}

fn dedup_keep_last<K>(keys: &mut Vec<K>, time: impl Fn(&K) -> f64) {
    keys.reverse();
    keys.dedup_by(|a, b| time(a) == time(b));
    keys.reverse();
}

/// Locate `t` in sorted key times: `(i0, i1, local_t)`, with `i0 == i1` when
/// `t` is outside the key range or there is a single key.
fn find_segment(times: &[f64], t: f64) -> (usize, usize, f32) {
    let n = times.len();
    if n == 1 || t <= times[0] {
        return (0, 0, 0.0);
    }
    if t >= times[n - 1] {
        return (n - 1, n - 1, 0.0);
    }
    let i1 = times.partition_point(|&k| k <= t);
    let i0 = i1 - 1;
    let span = (times[i1] - times[i0]).max(f64::EPSILON);
    (i0, i1, ((t - times[i0]) / span) as f32)
}

fn key_times<K>(keys: &[K], time: impl Fn(&K) -> f64) -> Vec<f64> {
    keys.iter().map(time).collect()
}

/// `times` holds the key times of `keys`, computed once per channel.
fn sample_vec3(keys: &[VectorKey], times: &[f64], t: f64) -> Option<Vec3> {
    if keys.is_empty() {
        return None;
    }
    let (i0, i1, lt) = find_segment(times, t);
    Some(keys[i0].value.lerp(keys[i1].value, lt))
}

fn sample_quat(keys: &[QuatKey], times: &[f64], t: f64) -> Option<Quat> {
    if keys.is_empty() {
        return None;
    }
    let (i0, i1, lt) = find_segment(times, t);
    Some(nlerp(keys[i0].value, keys[i1].value, lt))
}

/// Normalized lerp along the shorter arc.
fn nlerp(a: Quat, b: Quat, t: f32) -> Quat {
    let b = if a.dot(b) < 0.0 { -b } else { b };
    let q = a + (b - a) * t;
    if q.length_squared() > 0.0 {
        q.normalize()
    } else {
        a
    }
}

fn ratio(value: Vec3, base: Vec3) -> Vec3 {
    let safe = |v: f32, b: f32| if b.abs() > f32::EPSILON { v / b } else { v };
    Vec3::new(
        safe(value.x, base.x),
        safe(value.y, base.y),
        safe(value.z, base.z),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(time: f32, x: f32) -> Keyframe {
        Keyframe {
            time,
            translation: Vec3::new(x, 0.0, 0.0),
            rotation: Quat::IDENTITY,
            scale: Vec3::ONE,
        }
    }

    #[test]
    fn cut_keeps_first_of_trailing_run() {
        let mut keys = vec![key(0.0, 0.0), key(1.0, 1.0), key(2.0, 2.0), key(3.0, 2.0)];
        cut_trailing(&mut keys, KEY_EPSILON);
        assert_eq!(keys.len(), 3);
        assert_eq!(keys[2].time, 2.0);
    }

    #[test]
    fn cut_stops_at_first_difference() {
        // Equal keys in the middle are not trailing.
        let mut keys = vec![key(0.0, 1.0), key(1.0, 1.0), key(2.0, 3.0)];
        cut_trailing(&mut keys, KEY_EPSILON);
        assert_eq!(keys.len(), 3);
    }

    #[test]
    fn opposite_quaternions_are_same_pose() {
        let mut a = key(0.0, 0.0);
        let mut b = key(1.0, 0.0);
        a.rotation = Quat::from_rotation_y(0.3);
        b.rotation = -a.rotation;
        assert!(a.same_pose(&b, KEY_EPSILON));
    }

    #[test]
    fn segment_lookup() {
        let times = [0.0, 10.0, 20.0];
        assert_eq!(find_segment(&times, -1.0), (0, 0, 0.0));
        assert_eq!(find_segment(&times, 25.0), (2, 2, 0.0));
        let (i0, i1, lt) = find_segment(&times, 15.0);
        assert_eq!((i0, i1), (1, 2));
        assert!((lt - 0.5).abs() < 1e-6);
        // Exactly on a key: segment starting at that key.
        assert_eq!(find_segment(&times, 10.0), (1, 2, 0.0));
    }

    #[test]
    fn nlerp_takes_short_arc() {
        let a = Quat::from_rotation_z(0.1);
        let b = -Quat::from_rotation_z(0.3);
        let mid = nlerp(a, b, 0.5);
        let expected = Quat::from_rotation_z(0.2);
        assert!(mid.dot(expected).abs() > 0.9999);
    }

    #[test]
    fn long_channels_sample_each_component_on_its_own_times() {
        let channel = NodeChannel {
            node: "spine".into(),
            position_keys: (0..20_000)
                .map(|t| VectorKey {
                    time: t as f64,
                    value: Vec3::new(t as f32, 0.0, 0.0),
                })
                .collect(),
            rotation_keys: (0..20_000)
                .step_by(10)
                .map(|t| QuatKey {
                    time: t as f64 + 0.5,
                    value: Quat::IDENTITY,
                })
                .collect(),
            scaling_keys: Vec::new(),
        };
        let animation = Animation {
            name: "long".into(),
            ticks_per_second: 10.0,
            duration: 20_004.0,
            channels: vec![channel],
        };
        let track = build_track(
            &animation,
            "spine",
            &TrackPolicy::default(),
            None,
            &mut Diagnostics::new(),
        )
        .expect("track");

        // Rotation keys at 0.5, 10.5, ... add half-tick times between position keys.
        assert_eq!(track.keys.len(), 20_000 + 2_000);
        assert_eq!(track.keys[1].translation.x, 0.5);
        assert!((track.keys[1].time - 0.05).abs() < 1e-6);
        let tail = track.keys.last().expect("last key");
        assert!((tail.time - 1999.9).abs() < 1e-3);
        assert_eq!(tail.translation.x, 19_999.0);
        assert_eq!(tail.scale, Vec3::ONE);
    }

    #[test]
    fn zero_ticks_per_second_defaults() {
        let p = TrackPolicy::default();
        assert_eq!(p.seconds(50.0, 0.0), 2.0);
        assert_eq!(p.seconds(50.0, 50.0), 1.0);
    }
}
