//! Geofence validation.
//!
//! Great-circle distance from the claimed point to each anchor of the active
//! policy. The claim passes when it falls inside at least one anchor's radius
//! and the reported GPS accuracy is no worse than the policy requires.

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::policy::LocationPolicy;
use crate::types::GeoPoint;

/// Mean Earth radius (IUGG), meters.
pub const EARTH_RADIUS_M: f64 = 6_371_008.8;

/// Haversine distance between two points, in meters.
#[must_use]
pub fn haversine_distance_m(a: GeoPoint, b: GeoPoint) -> f64 {
    let (lat1, lat2) = (a.latitude.to_radians(), b.latitude.to_radians());
    let d_lat = lat2 - lat1;
    let d_lon = (b.longitude - a.longitude).to_radians();

    let h = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_M * h.sqrt().min(1.0).asin()
}

/// Point reached travelling `distance_m` from `origin` on initial bearing
/// `bearing_deg` (clockwise from north).
#[must_use]
pub fn destination_point(origin: GeoPoint, bearing_deg: f64, distance_m: f64) -> GeoPoint {
    let delta = distance_m / EARTH_RADIUS_M;
    let theta = bearing_deg.to_radians();
    let lat1 = origin.latitude.to_radians();
    let lon1 = origin.longitude.to_radians();

    let lat2 = (lat1.sin() * delta.cos() + lat1.cos() * delta.sin() * theta.cos()).asin();
    let lon2 = lon1
        + (theta.sin() * delta.sin() * lat1.cos()).atan2(delta.cos() - lat1.sin() * lat2.sin());

    let lon2 = (lon2.to_degrees() + 540.0) % 360.0 - 180.0;
    GeoPoint::new(lat2.to_degrees(), lon2)
}

/// Anchor a claim matched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeofenceMatch {
    /// Anchor name.
    pub anchor: String,
    /// Distance to it in meters.
    pub distance_m: f64,
    /// Its radius in meters.
    pub radius_m: f64,
}

/// Geofence validator. Stateless.
#[derive(Debug, Default, Clone, Copy)]
pub struct GeofenceValidator;

impl GeofenceValidator {
    /// Validate a claimed point and accuracy against `policy`.
    ///
    /// The distance check runs first. A rejection reports the anchor whose
    /// boundary is closest to the claim, with its distance and radius.
    pub fn validate(
        &self,
        point: GeoPoint,
        accuracy_m: f64,
        policy: &LocationPolicy,
    ) -> Result<GeofenceMatch, ValidationError> {
        check_coordinates(point, accuracy_m)?;

        let mut inside: Option<GeofenceMatch> = None;
        let mut nearest: Option<GeofenceMatch> = None;

        for anchor in &policy.anchors {
            let distance_m =
                haversine_distance_m(point, GeoPoint::new(anchor.latitude, anchor.longitude));
            let candidate = GeofenceMatch {
                anchor: anchor.name.clone(),
                distance_m,
                radius_m: anchor.radius_m,
            };

            if distance_m <= anchor.radius_m {
                if inside.as_ref().map_or(true, |m| distance_m < m.distance_m) {
                    inside = Some(candidate);
                }
            } else if nearest
                .as_ref()
                .map_or(true, |m| distance_m - anchor.radius_m < m.distance_m - m.radius_m)
            {
                nearest = Some(candidate);
            }
        }

        let matched = match (inside, nearest) {
            (Some(m), _) => m,
            (None, Some(n)) => {
                return Err(ValidationError::OutOfRange {
                    distance_m: n.distance_m,
                    radius_m: n.radius_m,
                    anchor: n.anchor,
                })
            },
            (None, None) => {
                return Err(ValidationError::InvalidCoordinates {
                    reason: "policy has no anchors".into(),
                })
            },
        };

        // Smaller is more precise.
        if accuracy_m > policy.required_accuracy_m {
            return Err(ValidationError::AccuracyTooLow {
                accuracy_m,
                required_m: policy.required_accuracy_m,
            });
        }

        Ok(matched)
    }
}

fn check_coordinates(point: GeoPoint, accuracy_m: f64) -> Result<(), ValidationError> {
    let reason = if !point.latitude.is_finite() || !(-90.0..=90.0).contains(&point.latitude) {
        format!("latitude {} is out of range", point.latitude)
    } else if !point.longitude.is_finite() || !(-180.0..=180.0).contains(&point.longitude) {
        format!("longitude {} is out of range", point.longitude)
    } else if !accuracy_m.is_finite() || accuracy_m < 0.0 {
        format!("accuracy {accuracy_m} is not a valid radius")
    } else {
        return Ok(());
    };
    Err(ValidationError::InvalidCoordinates { reason })
}
