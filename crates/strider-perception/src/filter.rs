//! Point-cloud filtering seam.
//!
//! The front end hands every raw scan to a [`PointCloudFilter`] before
//! registration, passing along whether the scan was classified as open
//! space so the filter can thin it more aggressively.

use strider_types::PointCloud;

pub trait PointCloudFilter: Send + Sync {
    fn filter(&self, cloud: &PointCloud, open_space: bool) -> PointCloud;
}

/// Leaves the cloud untouched.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassThroughFilter;

impl PointCloudFilter for PassThroughFilter {
    fn filter(&self, cloud: &PointCloud, _open_space: bool) -> PointCloud {
        cloud.clone()
    }
}

/// Drops non-finite points and points outside `[min_range, max_range]`
/// from the sensor origin. In open space every `open_space_stride`-th
/// surviving point is kept.
#[derive(Debug, Clone, Copy)]
pub struct RangeFilter {
    pub min_range: f64,
    pub max_range: f64,
    pub open_space_stride: usize,
}

impl Default for RangeFilter {
    fn default() -> Self {
        Self {
            min_range: 0.5,
            max_range: 100.0,
            open_space_stride: 2,
        }
    }
}

impl PointCloudFilter for RangeFilter {
    fn filter(&self, cloud: &PointCloud, open_space: bool) -> PointCloud {
        let stride = if open_space { self.open_space_stride.max(1) } else { 1 };
        let points = cloud
            .points
            .iter()
            .filter(|p| p.coords.iter().all(|v| v.is_finite()))
            .filter(|p| {
                let range = p.coords.norm();
                range >= self.min_range && range <= self.max_range
            })
            .step_by(stride)
            .copied()
            .collect();
        PointCloud::new(cloud.header.clone(), points)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Point3;
    use strider_types::Header;

    fn cloud() -> PointCloud {
        PointCloud::new(
            Header::new(3, 1.0, "lidar"),
            vec![
                Point3::new(0.1, 0.0, 0.0),
                Point3::new(1.0, 0.0, 0.0),
                Point3::new(f64::NAN, 0.0, 0.0),
                Point3::new(2.0, 0.0, 0.0),
                Point3::new(3.0, 0.0, 0.0),
                Point3::new(500.0, 0.0, 0.0),
            ],
        )
    }

    #[test]
    fn pass_through_keeps_everything() {
        let input = cloud();
        let out = PassThroughFilter.filter(&input, true);
        assert_eq!(out.len(), input.len());
        assert_eq!(out.header, input.header);
    }

    #[test]
    fn range_filter_drops_near_far_and_nan() {
        let out = RangeFilter::default().filter(&cloud(), false);
        let xs: Vec<f64> = out.points.iter().map(|p| p.x).collect();
        assert_eq!(xs, vec![1.0, 2.0, 3.0]);
        assert_eq!(out.header.seq, 3);
    }

    #[test]
    fn open_space_thins_cloud() {
        let out = RangeFilter::default().filter(&cloud(), true);
        let xs: Vec<f64> = out.points.iter().map(|p| p.x).collect();
        assert_eq!(xs, vec![1.0, 3.0]);
    }
}
