//! Camera and telescope identification
//!
//! Capture software rarely records the hardware by name, so the catalog infers
//! it: cameras from sensor width, telescopes from focal length. Both lookups
//! walk the configured table in order and stop at the first exact match.

use crate::config::{CameraProfile, TelescopeProfile};

/// Name used when a camera or telescope is not in the lookup table
pub const UNKNOWN: &str = "<unknown>";

/// Identify the camera from the reported image width and binning
pub fn classify_camera(cameras: &[CameraProfile], x_pixels: Option<i64>, binning: i64) -> String {
    // A width too large to unbin can't belong to any known sensor
    let Some(sensor_width) = x_pixels.and_then(|x| x.checked_mul(binning)) else {
        return UNKNOWN.to_string();
    };

    cameras
        .iter()
        .find(|c| c.x_pixels == sensor_width)
        .map(|c| c.name.clone())
        .unwrap_or_else(|| UNKNOWN.to_string())
}

/// Identify the telescope or lens from its focal length
///
/// Returns `None` when the header carried no focal length at all.
pub fn classify_telescope(telescopes: &[TelescopeProfile], focal_length: Option<f64>) -> Option<String> {
    let focal_length = focal_length?;

    Some(
        telescopes
            .iter()
            .find(|t| t.focal_length_mm == focal_length)
            .map(|t| t.name.clone())
            .unwrap_or_else(|| UNKNOWN.to_string()),
    )
}
