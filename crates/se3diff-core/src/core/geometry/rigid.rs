use super::rotation::{Rotation, rotation_to_rotvec, rotvec_to_rotation};
use crate::core::batch::{Batch, ShapeError};
use nalgebra::{Quaternion, UnitQuaternion, Vector3};

/// Placement of a batch in memory. Threaded through constructors and never inspected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Device {
    #[default]
    Cpu,
    Accelerator(u32),
}

/// A single rigid-body frame: `x ↦ R·x + t`.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Rigid {
    pub rotation: Rotation,
    pub translation: Vector3<f64>,
}

impl Rigid {
    pub fn new(rotation: Rotation, translation: Vector3<f64>) -> Self {
        Self {
            rotation,
            translation,
        }
    }

    /// Flat `(w, x, y, z, tx, ty, tz)` encoding.
    pub fn to_tensor_7(&self) -> [f64; 7] {
        let q = self.rotation.to_quaternion();
        let t = self.translation;
        [q.w, q.i, q.j, q.k, t.x, t.y, t.z]
    }

    /// Inverse of [`Rigid::to_tensor_7`]; the quaternion part is normalized.
    pub fn from_tensor_7(values: &[f64; 7]) -> Self {
        let q = UnitQuaternion::from_quaternion(Quaternion::new(
            values[0], values[1], values[2], values[3],
        ));
        Self {
            rotation: Rotation::from_quaternion(&q),
            translation: Vector3::new(values[4], values[5], values[6]),
        }
    }
}

/// A batch of rigid frames together with its compute placement.
#[derive(Debug, Clone, PartialEq)]
pub struct RigidBatch {
    rigids: Batch<Rigid>,
    device: Device,
}

impl RigidBatch {
    pub fn new(rigids: Batch<Rigid>, device: Device) -> Self {
        Self { rigids, device }
    }

    pub fn from_tensor_7(flat: &Batch<[f64; 7]>, device: Device) -> Self {
        Self {
            rigids: flat.par_map(Rigid::from_tensor_7),
            device,
        }
    }

    pub fn to_tensor_7(&self) -> Batch<[f64; 7]> {
        self.rigids.par_map(Rigid::to_tensor_7)
    }

    pub fn rigids(&self) -> &Batch<Rigid> {
        &self.rigids
    }

    pub fn shape(&self) -> &[usize] {
        self.rigids.shape()
    }

    pub fn len(&self) -> usize {
        self.rigids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rigids.is_empty()
    }

    pub fn device(&self) -> Device {
        self.device
    }

    pub fn to_device(mut self, device: Device) -> Self {
        self.device = device;
        self
    }

    pub fn rotations(&self) -> Batch<Rotation> {
        self.rigids.map(|r| r.rotation)
    }

    pub fn translations(&self) -> Batch<Vector3<f64>> {
        self.rigids.map(|r| r.translation)
    }
}

/// Splits a rigid batch into `(translations, rotation vectors)`, both plain host arrays.
pub fn decompose(rigids: &RigidBatch) -> (Batch<Vector3<f64>>, Batch<Vector3<f64>>) {
    let translations = rigids.translations();
    let rotvecs = rotation_to_rotvec(&rigids.rotations());
    (translations, rotvecs)
}

/// Reassembles a rigid batch from rotation vectors and translations of identical shape.
pub fn compose(
    rotvecs: &Batch<Vector3<f64>>,
    translations: &Batch<Vector3<f64>>,
    device: Option<Device>,
) -> Result<RigidBatch, ShapeError> {
    let rotations = rotvec_to_rotation(rotvecs);
    let rigids = rotations.try_zip_map(translations, |rotation, translation| {
        Rigid::new(*rotation, *translation)
    })?;
    Ok(RigidBatch::new(rigids, device.unwrap_or_default()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOLERANCE: f64 = 1e-9;

    fn sample_batch() -> RigidBatch {
        let rotvecs = Batch::new(
            vec![2, 2],
            vec![
                Vector3::new(0.1, 0.2, 0.3),
                Vector3::new(-1.0, 0.5, 0.0),
                Vector3::zeros(),
                Vector3::new(0.0, 0.0, 3.0),
            ],
        )
        .unwrap();
        let translations = Batch::new(
            vec![2, 2],
            vec![
                Vector3::new(1.0, 2.0, 3.0),
                Vector3::new(-4.0, 0.0, 1.5),
                Vector3::new(0.0, 0.0, 0.0),
                Vector3::new(10.0, -10.0, 5.0),
            ],
        )
        .unwrap();
        compose(&rotvecs, &translations, None).unwrap()
    }

    #[test]
    fn compose_then_decompose_recovers_components() {
        let rotvecs = Batch::from_vec(vec![Vector3::new(0.4, -0.3, 1.2), Vector3::new(2.5, 0.0, 0.1)]);
        let translations =
            Batch::from_vec(vec![Vector3::new(1.0, -1.0, 0.5), Vector3::new(3.0, 2.0, -7.0)]);
        let rigids = compose(&rotvecs, &translations, Some(Device::Accelerator(1))).unwrap();
        assert_eq!(rigids.device(), Device::Accelerator(1));

        let (trans, rots) = decompose(&rigids);
        assert_eq!(trans, translations);
        for (a, b) in rots.iter().zip(rotvecs.iter()) {
            assert!((a - b).norm() < TOLERANCE);
        }
    }

    #[test]
    fn compose_defaults_to_cpu_and_preserves_shape() {
        let rigids = sample_batch();
        assert_eq!(rigids.device(), Device::Cpu);
        assert_eq!(rigids.shape(), &[2, 2]);
    }

    #[test]
    fn compose_rejects_mismatched_leading_shapes() {
        let rotvecs = Batch::new(vec![2, 2], vec![Vector3::zeros(); 4]).unwrap();
        let translations = Batch::new(vec![4], vec![Vector3::zeros(); 4]).unwrap();
        assert!(matches!(
            compose(&rotvecs, &translations, None),
            Err(ShapeError::Mismatch { .. })
        ));
    }

    #[test]
    fn tensor_7_round_trip_preserves_frames() {
        let rigids = sample_batch();
        let flat = rigids.to_tensor_7();
        assert_eq!(flat.shape(), &[2, 2]);
        let back = RigidBatch::from_tensor_7(&flat, Device::Cpu);
        for (a, b) in rigids.rigids().iter().zip(back.rigids().iter()) {
            assert!((a.rotation.matrix() - b.rotation.matrix()).abs().max() < TOLERANCE);
            assert_eq!(a.translation, b.translation);
        }
    }

    #[test]
    fn from_tensor_7_normalizes_quaternion() {
        let rigid = Rigid::from_tensor_7(&[2.0, 0.0, 0.0, 0.0, 1.0, 2.0, 3.0]);
        assert!((rigid.rotation.matrix() - nalgebra::Matrix3::identity()).abs().max() < TOLERANCE);
        assert_eq!(rigid.translation, Vector3::new(1.0, 2.0, 3.0));
    }
}
