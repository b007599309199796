//! Lambert Conformal Conic (two standard parallels) on the Clarke 1866
//! ellipsoid, the projection the source track data is delivered in.
//!
//! Forward maps (lon, lat) degrees to (x, y) meters; inverse maps back.
//! Formulas follow Snyder, "Map Projections: A Working Manual", pp. 107-109.

use std::f64::consts::FRAC_PI_2;
use std::f64::consts::FRAC_PI_4;

/// Clarke 1866 semi-major axis (meters), the NAD27 reference ellipsoid
const CLARKE_1866_A: f64 = 6_378_206.4;
/// Clarke 1866 semi-minor axis (meters)
const CLARKE_1866_B: f64 = 6_356_583.8;

/// Latitude iteration cutoff; converges to well under a centimeter
const INVERSE_EPSILON: f64 = 1e-12;
const INVERSE_MAX_ITERATIONS: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LambertConformalConic {
    /// Semi-major axis (meters)
    a: f64,
    /// First eccentricity
    e: f64,
    /// Cone constant
    n: f64,
    /// Scaling constant F
    f: f64,
    /// Radius of the latitude of origin
    rho0: f64,
    /// Central meridian (radians)
    lon0: f64,
    pub false_easting: f64,
    pub false_northing: f64,
}

impl LambertConformalConic {
    /// Construct on the Clarke 1866 ellipsoid with standard parallels
    /// `lat1`/`lat2`, latitude of origin `lat0` and central meridian `lon0`,
    /// all in degrees.
    pub fn nad27(lat1: f64, lat2: f64, lat0: f64, lon0: f64) -> Self {
        Self::new(CLARKE_1866_A, CLARKE_1866_B, lat1, lat2, lat0, lon0, 0.0, 0.0)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn new(
        a: f64,
        b: f64,
        lat1: f64,
        lat2: f64,
        lat0: f64,
        lon0: f64,
        false_easting: f64,
        false_northing: f64,
    ) -> Self {
        let e = (1.0 - (b * b) / (a * a)).sqrt();

        let lat1 = lat1.to_radians();
        let lat2 = lat2.to_radians();
        let lat0 = lat0.to_radians();

        let m1 = m(lat1, e);
        let m2 = m(lat2, e);
        let t0 = t(lat0, e);
        let t1 = t(lat1, e);
        let t2 = t(lat2, e);

        // Single-parallel cones degenerate to n = sin(lat1)
        let n = if (lat1 - lat2).abs() < f64::EPSILON {
            lat1.sin()
        } else {
            (m1.ln() - m2.ln()) / (t1.ln() - t2.ln())
        };
        let f = m1 / (n * t1.powf(n));
        let rho0 = a * f * t0.powf(n);

        Self {
            a,
            e,
            n,
            f,
            rho0,
            lon0: lon0.to_radians(),
            false_easting,
            false_northing,
        }
    }

    /// Geographic (lon, lat) degrees to projected (x, y) meters
    pub fn forward(&self, lon: f64, lat: f64) -> (f64, f64) {
        let lat = lat.to_radians();
        let lon = lon.to_radians();

        let rho = self.a * self.f * t(lat, self.e).powf(self.n);
        let theta = self.n * (lon - self.lon0);

        let x = rho * theta.sin() + self.false_easting;
        let y = self.rho0 - rho * theta.cos() + self.false_northing;
        (x, y)
    }

    /// Projected (x, y) meters back to geographic (lon, lat) degrees
    pub fn inverse(&self, x: f64, y: f64) -> (f64, f64) {
        let x = x - self.false_easting;
        let y = y - self.false_northing;

        let rho = (x * x + (self.rho0 - y) * (self.rho0 - y))
            .sqrt()
            .copysign(self.n);
        let theta = x.atan2(self.rho0 - y);
        let lon = theta / self.n + self.lon0;

        if rho == 0.0 {
            // At the pole the meridian is indeterminate; latitude is +-90
            return (lon.to_degrees(), FRAC_PI_2.copysign(self.n).to_degrees());
        }

        let t = (rho / (self.a * self.f)).powf(1.0 / self.n);

        // Latitude has no closed form on the ellipsoid; iterate from the
        // spherical solution
        let mut lat = FRAC_PI_2 - 2.0 * t.atan();
        for _ in 0..INVERSE_MAX_ITERATIONS {
            let es = self.e * lat.sin();
            let next =
                FRAC_PI_2 - 2.0 * (t * ((1.0 - es) / (1.0 + es)).powf(self.e / 2.0)).atan();
            if (next - lat).abs() < INVERSE_EPSILON {
                lat = next;
                break;
            }
            lat = next;
        }

        (lon.to_degrees(), lat.to_degrees())
    }
}

/// m(phi) = cos(phi) / sqrt(1 - e^2 sin^2(phi))
fn m(lat: f64, e: f64) -> f64 {
    let es = e * lat.sin();
    lat.cos() / (1.0 - es * es).sqrt()
}

/// t(phi) = tan(pi/4 - phi/2) / ((1 - e sin phi) / (1 + e sin phi))^(e/2)
fn t(lat: f64, e: f64) -> f64 {
    let es = e * lat.sin();
    (FRAC_PI_4 - lat / 2.0).tan() / ((1.0 - es) / (1.0 + es)).powf(e / 2.0)
}

#[cfg(test)]
mod tests {
    use float_cmp::assert_approx_eq;

    use super::*;

    fn projection() -> LambertConformalConic {
        LambertConformalConic::nad27(49.0, 77.0, 49.0, -95.0)
    }

    #[test]
    fn test_origin_maps_to_origin() {
        let proj = projection();
        let (x, y) = proj.forward(-95.0, 49.0);
        assert_approx_eq!(f64, x, 0.0, epsilon = 1e-6);
        assert_approx_eq!(f64, y, 0.0, epsilon = 1e-6);
    }

    #[test]
    fn test_quadrants() {
        let proj = projection();

        // West of the central meridian projects to negative x
        let (x, _) = proj.forward(-106.0, 52.0);
        assert!(x < 0.0);

        // North of the origin latitude projects to positive y
        let (_, y) = proj.forward(-95.0, 55.0);
        assert!(y > 0.0);

        // South of it, negative
        let (_, y) = proj.forward(-95.0, 45.0);
        assert!(y < 0.0);
    }

    #[test]
    fn test_forward_inverse_round_trips_under_a_centimeter() {
        let proj = projection();
        let samples = [
            (-110.0, 49.0),
            (-101.0, 60.0),
            (-106.67, 52.13), // Saskatoon
            (-104.61, 50.45), // Regina
            (-95.0, 49.0),
            (-108.0, 55.5),
        ];
        for (lon, lat) in samples {
            let (x, y) = proj.forward(lon, lat);
            let (lon2, lat2) = proj.inverse(x, y);
            let (x2, y2) = proj.forward(lon2, lat2);
            let dx = x2 - x;
            let dy = y2 - y;
            assert!(
                (dx * dx + dy * dy).sqrt() < 0.01,
                "round trip drifted {dx}/{dy} m at ({lon}, {lat})"
            );
        }
    }

    #[test]
    fn test_one_degree_of_latitude_is_about_111_km() {
        let proj = projection();
        let (_, y1) = proj.forward(-106.0, 52.0);
        let (_, y2) = proj.forward(-106.0, 53.0);
        let dy = y2 - y1;
        assert!((105_000.0..118_000.0).contains(&dy), "dy = {dy}");
    }
}
