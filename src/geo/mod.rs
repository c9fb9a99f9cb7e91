//! Walking-time estimation between points inside the mall.
//!
//! Distances are small (a few hundred meters), so a planar approximation of
//! the latitude/longitude grid is used instead of a full haversine.

use serde::{Deserialize, Serialize};

use crate::{GuideError, Result};

/// Meters per degree of latitude (and of longitude at the equator).
const METERS_PER_DEGREE: f64 = 111_320.0;

/// Calibrated walking speed for mall conditions, in meters per minute.
pub const WALKING_SPEED_M_PER_MIN: f64 = 69.0;

/// A geographic point location.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinate {
    #[inline]
    pub fn new(latitude: f64, longitude: f64) -> Result<Self> {
        let coord = Self {
            latitude,
            longitude,
        };
        coord.validate()?;
        Ok(coord)
    }

    #[inline]
    pub fn validate(&self) -> Result<()> {
        if !self.latitude.is_finite() || !self.longitude.is_finite() {
            return Err(GuideError::InvalidInput(format!(
                "coordinate is not finite: ({}, {})",
                self.latitude, self.longitude
            )));
        }
        if !(-90.0..=90.0).contains(&self.latitude) {
            return Err(GuideError::InvalidInput(format!(
                "latitude out of range: {}",
                self.latitude
            )));
        }
        if !(-180.0..=180.0).contains(&self.longitude) {
            return Err(GuideError::InvalidInput(format!(
                "longitude out of range: {}",
                self.longitude
            )));
        }
        Ok(())
    }
}

/// Straight-line distance in meters between two points, using a planar
/// approximation with longitude scaled by the cosine of the mean latitude.
fn distance_meters(from: Coordinate, to: Coordinate) -> f64 {
    let avg_lat = ((from.latitude + to.latitude) / 2.0).to_radians();
    let lat_m = (to.latitude - from.latitude) * METERS_PER_DEGREE;
    let lon_m = (to.longitude - from.longitude) * METERS_PER_DEGREE * avg_lat.cos();
    lat_m.hypot(lon_m)
}

/// Estimated walking time in minutes between two points, rounded to one
/// decimal place. Fails with `InvalidInput` if either coordinate is out of
/// range.
#[inline]
pub fn walking_time_minutes(from: Coordinate, to: Coordinate) -> Result<f64> {
    from.validate()?;
    to.validate()?;

    let minutes = distance_meters(from, to) / WALKING_SPEED_M_PER_MIN;
    Ok((minutes * 10.0).round() / 10.0)
}
