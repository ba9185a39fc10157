//! H3 cell helpers.

use h3o::{CellIndex, LatLng, Resolution};

use crate::TripError;

/// Converts a raw resolution number.
///
/// # Errors
///
/// Returns [`TripError::Resolution`] above 15.
pub fn resolution(res: u8) -> Result<Resolution, TripError> {
    Ok(Resolution::try_from(res)?)
}

/// Cell containing a coordinate, or `None` for a non-finite or
/// out-of-range coordinate.
#[must_use]
pub fn cell_at(lat: f64, lng: f64, res: Resolution) -> Option<CellIndex> {
    if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lng) {
        return None;
    }
    LatLng::new(lat, lng).ok().map(|coord| coord.to_cell(res))
}

/// Cell boundary as a closed GeoJSON polygon with `[lng, lat]` positions.
///
/// # Errors
///
/// Returns [`TripError::Json`] if serialization fails.
pub fn boundary_geojson(cell: CellIndex) -> Result<String, TripError> {
    let mut ring: Vec<Vec<f64>> = cell
        .boundary()
        .iter()
        .map(|v| vec![v.lng(), v.lat()])
        .collect();

    if let Some(first) = ring.first().cloned() {
        ring.push(first);
    }

    let geometry = geojson::Geometry::new(geojson::Value::Polygon(vec![ring]));
    Ok(serde_json::to_string(&geometry)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    const TIMES_SQUARE: (f64, f64) = (40.758, -73.9855);

    #[test]
    fn same_coordinate_same_cell() {
        let res = resolution(10).unwrap();
        let a = cell_at(TIMES_SQUARE.0, TIMES_SQUARE.1, res).unwrap();
        let b = cell_at(TIMES_SQUARE.0, TIMES_SQUARE.1, res).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.resolution(), res);
        assert_eq!(a.to_string().len(), 15);
    }

    #[test]
    fn rejects_invalid_coordinates() {
        let res = resolution(10).unwrap();
        assert!(cell_at(f64::NAN, TIMES_SQUARE.1, res).is_none());
        assert!(resolution(16).is_err());
    }

    #[test]
    fn rejects_out_of_range_coordinates() {
        let res = resolution(10).unwrap();
        assert!(cell_at(100.0, TIMES_SQUARE.1, res).is_none());
        assert!(cell_at(-90.5, TIMES_SQUARE.1, res).is_none());
        assert!(cell_at(TIMES_SQUARE.0, 181.0, res).is_none());
        assert!(cell_at(90.0, 180.0, res).is_some());
    }

    #[test]
    fn boundary_is_closed_hexagon() {
        let res = resolution(10).unwrap();
        let cell = cell_at(TIMES_SQUARE.0, TIMES_SQUARE.1, res).unwrap();
        let json: serde_json::Value =
            serde_json::from_str(&boundary_geojson(cell).unwrap()).unwrap();

        assert_eq!(json["type"], "Polygon");
        let ring = json["coordinates"][0].as_array().unwrap();
        assert_eq!(ring.len(), 7);
        assert_eq!(ring.first(), ring.last());

        let lng = ring[0][0].as_f64().unwrap();
        let lat = ring[0][1].as_f64().unwrap();
        assert!((lng - TIMES_SQUARE.1).abs() < 0.01);
        assert!((lat - TIMES_SQUARE.0).abs() < 0.01);
    }
}
