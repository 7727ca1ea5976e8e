//! Math types for Sonara

pub use glam::{Mat4, Quat, Vec3};

/// Speed of sound in air at 20°C, in metres per second.
pub const SPEED_OF_SOUND: f32 = 343.0;

/// Listener position and orientation in world space.
///
/// Stored as explicit vectors because that is how callers hand the pose in;
/// `forward` and `up` are kept orthonormal.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ListenerPose {
    pub position: Vec3,
    forward: Vec3,
    up: Vec3,
}

impl ListenerPose {
    /// Builds a pose from raw vectors, re-orthogonalizing `up` against `forward`.
    ///
    /// Returns `None` if either vector is degenerate or the two are parallel.
    pub fn from_vectors(position: Vec3, forward: Vec3, up: Vec3) -> Option<Self> {
        if !position.is_finite() {
            return None;
        }
        let forward = forward.try_normalize()?;
        let right = forward.cross(up).try_normalize()?;
        let up = right.cross(forward);
        Some(Self {
            position,
            forward,
            up,
        })
    }

    /// Builds a pose from an orientation quaternion and a position.
    ///
    /// The quaternion is normalized first. Returns `None` for a zero-length
    /// or non-finite quaternion.
    pub fn from_orientation(position: Vec3, orientation: Quat) -> Option<Self> {
        if !position.is_finite() || !orientation.is_finite() {
            return None;
        }
        let length = orientation.length();
        if length < 1e-6 {
            return None;
        }
        let q = orientation / length;
        Some(Self {
            position,
            forward: q * -Vec3::Z,
            up: q * Vec3::Y,
        })
    }

    pub fn identity() -> Self {
        Self {
            position: Vec3::ZERO,
            forward: -Vec3::Z,
            up: Vec3::Y,
        }
    }

    pub fn from_position(position: Vec3) -> Self {
        Self {
            position,
            ..Self::identity()
        }
    }

    pub fn forward(&self) -> Vec3 {
        self.forward
    }

    pub fn up(&self) -> Vec3 {
        self.up
    }

    pub fn right(&self) -> Vec3 {
        self.forward.cross(self.up)
    }

    /// Expresses a world-space direction in listener space
    /// (`x` = right, `y` = up, `z` = forward).
    pub fn direction_to_local(&self, direction: Vec3) -> Vec3 {
        Vec3::new(
            direction.dot(self.right()),
            direction.dot(self.up),
            direction.dot(self.forward),
        )
    }

    /// Listener-space vector from the listener to `point`.
    pub fn point_to_local(&self, point: Vec3) -> Vec3 {
        self.direction_to_local(point - self.position)
    }
}

impl Default for ListenerPose {
    fn default() -> Self {
        Self::identity()
    }
}

/// Builds an orthonormal frame from look/up vectors, falling back to the
/// identity frame for degenerate input. Columns are right, up, forward.
pub fn frame_from_look_up(look: Vec3, up: Vec3) -> [Vec3; 3] {
    match ListenerPose::from_vectors(Vec3::ZERO, look, up) {
        Some(pose) => [pose.right(), pose.up(), pose.forward()],
        None => [Vec3::X, Vec3::Y, -Vec3::Z],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_pose_axes() {
        let pose = ListenerPose::identity();
        assert_eq!(pose.forward(), -Vec3::Z);
        assert_eq!(pose.up(), Vec3::Y);
        assert!((pose.right() - Vec3::X).length() < 1e-6);
    }

    #[test]
    fn test_point_to_local() {
        let pose = ListenerPose::identity();
        let local = pose.point_to_local(Vec3::new(1.0, 0.0, 0.0));
        assert!((local - Vec3::X).length() < 1e-6);

        let ahead = pose.point_to_local(Vec3::new(0.0, 0.0, -2.0));
        assert!((ahead - Vec3::new(0.0, 0.0, 2.0)).length() < 1e-6);
    }

    #[test]
    fn test_pose_from_orientation() {
        let turn = Quat::from_rotation_y(std::f32::consts::FRAC_PI_2);
        let pose = ListenerPose::from_orientation(Vec3::new(1.0, 2.0, 3.0), turn * 2.0).unwrap();
        assert!((pose.forward() - -Vec3::X).length() < 1e-5);
        assert!((pose.up() - Vec3::Y).length() < 1e-5);
        assert_eq!(pose.position, Vec3::new(1.0, 2.0, 3.0));

        let still = ListenerPose::from_orientation(Vec3::ZERO, Quat::IDENTITY).unwrap();
        assert_eq!(still, ListenerPose::identity());

        assert!(ListenerPose::from_orientation(Vec3::ZERO, Quat::from_xyzw(0.0, 0.0, 0.0, 0.0)).is_none());
        assert!(ListenerPose::from_orientation(Vec3::ZERO, Quat::from_xyzw(f32::NAN, 0.0, 0.0, 1.0)).is_none());
    }

    #[test]
    fn test_degenerate_vectors_rejected() {
        assert!(ListenerPose::from_vectors(Vec3::ZERO, Vec3::ZERO, Vec3::Y).is_none());
        assert!(ListenerPose::from_vectors(Vec3::ZERO, Vec3::Y, Vec3::Y).is_none());
    }

    #[test]
    fn test_up_is_orthogonalized() {
        let pose =
            ListenerPose::from_vectors(Vec3::ZERO, -Vec3::Z, Vec3::new(0.0, 1.0, 0.5)).unwrap();
        assert!(pose.up().dot(pose.forward()).abs() < 1e-6);
        assert!((pose.up().length() - 1.0).abs() < 1e-6);
    }
}
