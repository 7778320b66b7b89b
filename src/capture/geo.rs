use std::f64::consts::FRAC_PI_2;

use crate::domain::GeoPoint;

pub const EARTH_RADIUS_M: f64 = 6_371_008.8;

/// Axis-aligned geographic box. Longitudes are not normalised, so a box that
/// crosses the antimeridian has `east > 180`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoBounds {
    pub south: f64,
    pub west: f64,
    pub north: f64,
    pub east: f64,
}

impl GeoBounds {
    pub fn north_west(&self) -> GeoPoint {
        GeoPoint::new(self.north, self.west)
    }

    pub fn south_east(&self) -> GeoPoint {
        GeoPoint::new(self.south, self.east)
    }
}

/// Latitude extent is exact along the meridian. Longitude extent uses the
/// tangent meridians `asin(sin d / cos lat)`, which sit slightly poleward of the
/// due-east/west points. When the circle covers a pole the box spans all
/// longitudes.
pub fn circle_bounds(center: GeoPoint, radius_m: f64) -> GeoBounds {
    let angular = radius_m.max(0.0) / EARTH_RADIUS_M;
    let lat = center.lat.to_radians();
    let lng = center.lng.to_radians();

    let mut south = lat - angular;
    let mut north = lat + angular;

    let (west, east) = if south > -FRAC_PI_2 && north < FRAC_PI_2 {
        let delta = (angular.sin() / lat.cos()).clamp(-1.0, 1.0).asin();
        ((lng - delta).to_degrees(), (lng + delta).to_degrees())
    } else {
        south = south.max(-FRAC_PI_2);
        north = north.min(FRAC_PI_2);
        (-180.0, 180.0)
    };

    GeoBounds {
        south: south.to_degrees(),
        west,
        north: north.to_degrees(),
        east,
    }
}

pub fn destination(origin: GeoPoint, bearing_deg: f64, distance_m: f64) -> GeoPoint {
    let angular = distance_m / EARTH_RADIUS_M;
    let bearing = bearing_deg.to_radians();
    let lat1 = origin.lat.to_radians();
    let lng1 = origin.lng.to_radians();

    let lat2 = (lat1.sin() * angular.cos() + lat1.cos() * angular.sin() * bearing.cos()).asin();
    let lng2 = lng1
        + (bearing.sin() * angular.sin() * lat1.cos())
            .atan2(angular.cos() - lat1.sin() * lat2.sin());

    GeoPoint::new(lat2.to_degrees(), lng2.to_degrees())
}
