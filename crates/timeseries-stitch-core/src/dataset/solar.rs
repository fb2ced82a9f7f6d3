//! Apparent sun position for an observer.

use chrono::{DateTime, Timelike, Utc};
use serde::{Deserialize, Serialize};

/// Observer location on Earth.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Observer {
    /// Degrees north of the equator.
    pub latitude: f64,
    /// Degrees east of Greenwich.
    pub longitude: f64,
    /// Metres above sea level. Recorded with the location; it does not
    /// change the computed position.
    #[serde(default)]
    pub height: f64,
}

impl Observer {
    /// Observer at the given coordinates.
    pub fn new(latitude: f64, longitude: f64, height: f64) -> Self {
        Observer {
            latitude,
            longitude,
            height,
        }
    }
}

/// Sun position in degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SunPosition {
    /// Angle above the horizon, refraction corrected. Negative below it.
    pub elevation: f64,
    /// Compass bearing, clockwise from north, in `[0, 360)`.
    pub azimuth: f64,
}

/// Computes where the sun is for an observer at an instant.
pub trait SolarPosition: Send + Sync {
    /// Sun position seen by `observer` at `at`.
    fn position(&self, observer: &Observer, at: DateTime<Utc>) -> SunPosition;
}

/// NOAA solar calculator equations, with atmospheric refraction applied to
/// the elevation.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoaaSolarPosition;

const UNIX_EPOCH_JULIAN_DAY: f64 = 2_440_587.5;
const J2000_JULIAN_DAY: f64 = 2_451_545.0;
const SECONDS_PER_DAY: f64 = 86_400.0;

impl SolarPosition for NoaaSolarPosition {
    fn position(&self, observer: &Observer, at: DateTime<Utc>) -> SunPosition {
        let julian_day = at.timestamp() as f64 / SECONDS_PER_DAY + UNIX_EPOCH_JULIAN_DAY;
        let jc = (julian_day - J2000_JULIAN_DAY) / 36_525.0;

        let mean_long = (280.46646 + jc * (36_000.76983 + jc * 0.0003032)).rem_euclid(360.0);
        let mean_anom = 357.52911 + jc * (35_999.05029 - 0.0001537 * jc);
        let eccentricity = 0.016708634 - jc * (0.000042037 + 0.0000001267 * jc);

        let m = mean_anom.to_radians();
        let center = m.sin() * (1.914602 - jc * (0.004817 + 0.000014 * jc))
            + (2.0 * m).sin() * (0.019993 - 0.000101 * jc)
            + (3.0 * m).sin() * 0.000289;
        let true_long = mean_long + center;
        let omega = (125.04 - 1934.136 * jc).to_radians();
        let apparent_long = true_long - 0.00569 - 0.00478 * omega.sin();

        let mean_obliquity =
            23.0 + (26.0 + (21.448 - jc * (46.815 + jc * (0.00059 - jc * 0.001813))) / 60.0) / 60.0;
        let obliquity = mean_obliquity + 0.00256 * omega.cos();

        let declination = (obliquity.to_radians().sin() * apparent_long.to_radians().sin()).asin();

        let y = (obliquity.to_radians() / 2.0).tan().powi(2);
        let l0 = mean_long.to_radians();
        let equation_of_time = 4.0
            * (y * (2.0 * l0).sin() - 2.0 * eccentricity * m.sin()
                + 4.0 * eccentricity * y * m.sin() * (2.0 * l0).cos()
                - 0.5 * y * y * (4.0 * l0).sin()
                - 1.25 * eccentricity * eccentricity * (2.0 * m).sin())
            .to_degrees();

        let minutes_of_day = at.num_seconds_from_midnight() as f64 / 60.0;
        let true_solar_time =
            (minutes_of_day + equation_of_time + 4.0 * observer.longitude).rem_euclid(1440.0);
        let hour_angle = (true_solar_time / 4.0 - 180.0).to_radians();

        let latitude = observer.latitude.to_radians();
        let cos_zenith = (latitude.sin() * declination.sin()
            + latitude.cos() * declination.cos() * hour_angle.cos())
        .clamp(-1.0, 1.0);
        let zenith = cos_zenith.acos();

        let azimuth_denominator = latitude.cos() * zenith.sin();
        let azimuth = if azimuth_denominator.abs() > 1e-3 {
            let cos_az = ((latitude.sin() * cos_zenith - declination.sin()) / azimuth_denominator)
                .clamp(-1.0, 1.0);
            let az = cos_az.acos().to_degrees();
            if hour_angle > 0.0 {
                (az + 180.0).rem_euclid(360.0)
            } else {
                (540.0 - az).rem_euclid(360.0)
            }
        } else if observer.latitude > 0.0 {
            180.0
        } else {
            0.0
        };

        let elevation = 90.0 - zenith.to_degrees();
        SunPosition {
            elevation: elevation + refraction(elevation),
            azimuth,
        }
    }
}

/// Atmospheric refraction correction in degrees for a geometric elevation.
fn refraction(elevation: f64) -> f64 {
    if elevation > 85.0 {
        return 0.0;
    }
    let t = elevation.to_radians().tan();
    let arcsec = if elevation > 5.0 {
        58.1 / t - 0.07 / t.powi(3) + 0.000086 / t.powi(5)
    } else if elevation > -0.575 {
        1735.0 + elevation * (-518.2 + elevation * (103.4 + elevation * (-12.79 + elevation * 0.711)))
    } else {
        -20.774 / t
    };
    arcsec / 3600.0
}
