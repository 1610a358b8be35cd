use crate::core::batch::{Batch, ShapeError};
use crate::core::geometry::rotation::Rotation;
use nalgebra::Vector3;
use ndarray::Zip;

/// Broadcasts an optional diffuse mask against the leading shape of the frames.
pub(crate) fn resolve(
    mask: Option<&Batch<f64>>,
    shape: &[usize],
) -> Result<Option<Batch<f64>>, ShapeError> {
    mask.map(|m| m.broadcast_to(shape)).transpose()
}

/// `mask · diffused + (1 − mask) · fixed`, per entry.
pub(crate) fn blend(
    mask: &Batch<f64>,
    diffused: &Batch<Vector3<f64>>,
    fixed: &Batch<Vector3<f64>>,
) -> Result<Batch<Vector3<f64>>, ShapeError> {
    mask.ensure_same_shape(diffused)?;
    diffused.ensure_same_shape(fixed)?;
    let data = Zip::from(mask.as_array())
        .and(diffused.as_array())
        .and(fixed.as_array())
        .map_collect(|&m, d, f| d * m + f * (1.0 - m));
    Ok(Batch::from_array(data))
}

/// Score blend: masked-out entries report zero.
pub(crate) fn blend_score(
    mask: &Batch<f64>,
    score: &Batch<Vector3<f64>>,
) -> Result<Batch<Vector3<f64>>, ShapeError> {
    score.try_zip_map(mask, |s, &m| s * m)
}

/// Rotation blend over rotation vectors.
///
/// Entries with weight exactly 0 or 1 take the fixed or diffused rotation as is, so
/// selected frames do not pick up a round trip through the rotation-vector chart.
pub(crate) fn blend_rotations(
    mask: &Batch<f64>,
    diffused_rotvecs: &Batch<Vector3<f64>>,
    diffused: &Batch<Rotation>,
    fixed_rotvecs: &Batch<Vector3<f64>>,
    fixed: &Batch<Rotation>,
) -> Result<Batch<Rotation>, ShapeError> {
    let blended = blend(mask, diffused_rotvecs, fixed_rotvecs)?;
    diffused.ensure_same_shape(&blended)?;
    fixed.ensure_same_shape(&blended)?;
    let data = Zip::from(mask.as_array())
        .and(blended.as_array())
        .and(diffused.as_array())
        .and(fixed.as_array())
        .map_collect(|&m, v, d, f| {
            if m == 0.0 {
                *f
            } else if m == 1.0 {
                *d
            } else {
                Rotation::from_rotvec(v)
            }
        });
    Ok(Batch::from_array(data))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blend_selects_fixed_values_exactly_where_mask_is_zero() {
        let mask = Batch::from_bools(vec![3], &[true, false, true]).unwrap();
        let diffused = Batch::from_vec(vec![Vector3::new(1.0, 1.0, 1.0); 3]);
        let fixed = Batch::from_vec(vec![
            Vector3::new(0.1, 0.2, 0.3),
            Vector3::new(0.4, 0.5, 0.6),
            Vector3::new(0.7, 0.8, 0.9),
        ]);
        let out = blend(&mask, &diffused, &fixed).unwrap();
        assert_eq!(out[0], diffused[0]);
        assert_eq!(out[1], fixed[1]);
        assert_eq!(out[2], diffused[2]);
    }

    #[test]
    fn fractional_mask_interpolates() {
        let mask = Batch::from_vec(vec![0.25]);
        let diffused = Batch::from_vec(vec![Vector3::new(4.0, 0.0, 0.0)]);
        let fixed = Batch::from_vec(vec![Vector3::zeros()]);
        let out = blend(&mask, &diffused, &fixed).unwrap();
        assert!((out[0].x - 1.0).abs() < 1e-12);
    }

    #[test]
    fn blend_score_zeroes_masked_out_entries() {
        let mask = Batch::from_bools(vec![2], &[false, true]).unwrap();
        let score = Batch::from_vec(vec![Vector3::new(3.0, -2.0, 1.0); 2]);
        let out = blend_score(&mask, &score).unwrap();
        assert_eq!(out[0], Vector3::zeros());
        assert_eq!(out[1], score[1]);
    }

    #[test]
    fn blend_rotations_keeps_fixed_rotation_untouched() {
        let mask = Batch::from_bools(vec![2], &[false, true]).unwrap();
        let fixed = Batch::from_vec(vec![
            Rotation::from_rotvec(&Vector3::new(0.3, -0.1, 2.9)),
            Rotation::identity(),
        ]);
        let fixed_rotvecs = fixed.map(Rotation::to_rotvec);
        let diffused_rotvecs = Batch::from_vec(vec![Vector3::new(0.0, 1.0, 0.0); 2]);
        let diffused = diffused_rotvecs.map(Rotation::from_rotvec);
        let out =
            blend_rotations(&mask, &diffused_rotvecs, &diffused, &fixed_rotvecs, &fixed).unwrap();
        assert_eq!(out[0], fixed[0]);
        assert_eq!(out[1], diffused[1]);
    }

    #[test]
    fn blend_rotations_interpolates_fractional_weights() {
        let mask = Batch::from_vec(vec![0.5]);
        let fixed = Batch::from_vec(vec![Rotation::identity()]);
        let fixed_rotvecs = fixed.map(Rotation::to_rotvec);
        let diffused_rotvecs = Batch::from_vec(vec![Vector3::new(0.0, 0.0, 1.0)]);
        let diffused = diffused_rotvecs.map(Rotation::from_rotvec);
        let out =
            blend_rotations(&mask, &diffused_rotvecs, &diffused, &fixed_rotvecs, &fixed).unwrap();
        assert!((out[0].angle() - 0.5).abs() < 1e-12);
    }

    #[test]
    fn resolve_broadcasts_sequence_mask() {
        let mask = Batch::from_bools(vec![2], &[true, false]).unwrap();
        let resolved = resolve(Some(&mask), &[3, 2]).unwrap().unwrap();
        assert_eq!(resolved.shape(), &[3, 2]);
        assert!(resolve(None, &[3, 2]).unwrap().is_none());
        assert!(resolve(Some(&mask), &[3, 4]).is_err());
    }
}
