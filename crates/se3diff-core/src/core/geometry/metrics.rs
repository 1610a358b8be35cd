use super::rigid::RigidBatch;

/// Per-frame distances between two rigid batches of equal length.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameDeviation {
    pub rotation_rad: f64,
    pub translation: f64,
}

/// Summed geodesic rotation distance and summed Euclidean translation distance.
pub fn se3_deviation(a: &RigidBatch, b: &RigidBatch) -> Option<FrameDeviation> {
    if a.shape() != b.shape() || a.is_empty() {
        return None;
    }
    let (rotation_rad, translation) = a
        .rigids()
        .iter()
        .zip(b.rigids().iter())
        .fold((0.0, 0.0), |(rot, trans), (ra, rb)| {
            (
                rot + ra.rotation.angle_to(&rb.rotation),
                trans + (ra.translation - rb.translation).norm(),
            )
        });
    Some(FrameDeviation {
        rotation_rad,
        translation,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::batch::Batch;
    use crate::core::geometry::rigid::compose;
    use nalgebra::Vector3;

    fn batch(rotvecs: Vec<Vector3<f64>>, translations: Vec<Vector3<f64>>) -> RigidBatch {
        compose(&Batch::from_vec(rotvecs), &Batch::from_vec(translations), None).unwrap()
    }

    #[test]
    fn se3_deviation_sums_rotation_and_translation_distances() {
        let a = batch(
            vec![Vector3::zeros(), Vector3::zeros()],
            vec![Vector3::zeros(), Vector3::zeros()],
        );
        let b = batch(
            vec![Vector3::new(0.0, 0.0, 0.5), Vector3::new(0.25, 0.0, 0.0)],
            vec![Vector3::new(3.0, 4.0, 0.0), Vector3::zeros()],
        );
        let deviation = se3_deviation(&a, &b).unwrap();
        assert!((deviation.rotation_rad - 0.75).abs() < 1e-9);
        assert!((deviation.translation - 5.0).abs() < 1e-12);
    }
}
