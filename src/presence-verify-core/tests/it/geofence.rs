//! Property-based tests for the geofence.

use proptest::prelude::*;

use presence_verify_core::error::ValidationError;
use presence_verify_core::geofence::{destination_point, haversine_distance_m, GeofenceValidator};
use presence_verify_core::GeoPoint;

use crate::support::{scenario_policy, HQ};

/// Strategy for points anywhere except the poles, where bearings degenerate.
fn any_point() -> impl Strategy<Value = GeoPoint> {
    (-85.0f64..85.0, -180.0f64..180.0).prop_map(|(lat, lon)| GeoPoint::new(lat, lon))
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 128,
        max_shrink_iters: 500,
        ..ProptestConfig::default()
    })]

    /// Distance is symmetric and never negative.
    #[test]
    fn haversine_symmetric(a in any_point(), b in any_point()) {
        let ab = haversine_distance_m(a, b);
        let ba = haversine_distance_m(b, a);
        prop_assert!(ab >= 0.0);
        prop_assert!((ab - ba).abs() < 1e-6);
    }

    /// Projecting a point and measuring back recovers the distance.
    #[test]
    fn destination_round_trip(
        origin in any_point(),
        bearing in 0.0f64..360.0,
        distance in 0.0f64..50_000.0
    ) {
        let projected = destination_point(origin, bearing, distance);
        let measured = haversine_distance_m(origin, projected);
        prop_assert!((measured - distance).abs() < 0.01, "{} vs {}", measured, distance);
    }

    /// Any claim farther than the radius from every anchor is rejected, with
    /// the measured distance and radius reported.
    #[test]
    fn out_of_range_always_rejected(
        bearing in 0.0f64..360.0,
        distance in 100.5f64..20_000.0,
        accuracy in 0.0f64..20.0
    ) {
        let policy = scenario_policy();
        let claim = destination_point(HQ, bearing, distance);
        match GeofenceValidator.validate(claim, accuracy, &policy) {
            Err(ValidationError::OutOfRange { distance_m, radius_m, .. }) => {
                prop_assert!((distance_m - distance).abs() < 0.01);
                prop_assert_eq!(radius_m, 100.0);
            },
            other => prop_assert!(false, "expected OutOfRange, got {:?}", other),
        }
    }

    /// Inside the radius, accuracy worse than required is rejected and
    /// accuracy within it is accepted.
    #[test]
    fn accuracy_threshold_enforced(
        bearing in 0.0f64..360.0,
        distance in 0.0f64..99.0,
        accuracy in 0.0f64..200.0
    ) {
        let policy = scenario_policy();
        let claim = destination_point(HQ, bearing, distance);
        let result = GeofenceValidator.validate(claim, accuracy, &policy);
        if accuracy > policy.required_accuracy_m {
            let is_accuracy_error = matches!(result, Err(ValidationError::AccuracyTooLow { .. }));
            prop_assert!(is_accuracy_error);
        } else {
            prop_assert!(result.is_ok());
        }
    }
}

#[test]
fn test_scenario_distances() {
    let policy = scenario_policy();

    let far = destination_point(HQ, 90.0, 120.0);
    let err = GeofenceValidator.validate(far, 15.0, &policy).unwrap_err();
    let (measured, threshold) = err.measurement().unwrap();
    assert!((measured - 120.0).abs() < 0.5);
    assert_eq!(threshold, 100.0);

    let near = destination_point(HQ, 90.0, 80.0);
    let matched = GeofenceValidator.validate(near, 15.0, &policy).unwrap();
    assert_eq!(matched.anchor, "HQ");
    assert!((matched.distance_m - 80.0).abs() < 0.5);
}

#[test]
fn test_invalid_coordinates() {
    let policy = scenario_policy();
    for (lat, lon, acc) in [
        (f64::NAN, 106.8, 5.0),
        (91.0, 106.8, 5.0),
        (-6.2, 181.0, 5.0),
        (-6.2, 106.8, -1.0),
    ] {
        let err = GeofenceValidator
            .validate(GeoPoint::new(lat, lon), acc, &policy)
            .unwrap_err();
        assert!(matches!(err, ValidationError::InvalidCoordinates { .. }), "{err:?}");
    }
}
