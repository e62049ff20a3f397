use crate::models::driver::GeoPoint;

const EARTH_RADIUS_KM: f64 = 6_371.0;

/// Great-circle distance between two points, in kilometres.
pub fn great_circle_km(a: &GeoPoint, b: &GeoPoint) -> f64 {
    let lat_a = a.lat.to_radians();
    let lat_b = b.lat.to_radians();
    let d_lat = (b.lat - a.lat).to_radians();
    let d_lng = (b.lng - a.lng).to_radians();

    let half_lat = (d_lat / 2.0).sin();
    let half_lng = (d_lng / 2.0).sin();

    let h = half_lat * half_lat + lat_a.cos() * lat_b.cos() * half_lng * half_lng;
    let angle = 2.0 * h.sqrt().asin();

    EARTH_RADIUS_KM * angle
}

pub fn within_km(a: &GeoPoint, b: &GeoPoint, radius_km: f64) -> bool {
    great_circle_km(a, b) <= radius_km
}
