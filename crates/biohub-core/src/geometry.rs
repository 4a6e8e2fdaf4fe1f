//! Spatial values: GeoJSON in, [`geo`] geometries out.
//!
//! Every indexed geometry is stored in a single fixed reference system,
//! [`DEFAULT_SRID`]. Nothing is ever reprojected; a geometry declaring another
//! system is rejected with [`Error::GeometryReferenceMismatch`].

use geo::{Geometry, GeometryCollection, Intersects as _};
use geojson::GeoJson;
use serde_json::Value;

use crate::{Error, Result};

/// EPSG code of the reference system all indexed geometries use (WGS 84).
pub const DEFAULT_SRID: u32 = 4326;

/// A geometry tagged with the EPSG code of its reference system.
#[derive(Debug, Clone, PartialEq)]
pub struct SpatialValue {
  pub srid:     u32,
  pub geometry: Geometry<f64>,
}

impl SpatialValue {
  pub fn new(geometry: Geometry<f64>) -> Self {
    Self { srid: DEFAULT_SRID, geometry }
  }

  /// Parse a GeoJSON Geometry, Feature or FeatureCollection. The reference
  /// system is read from a legacy `crs` member when present, otherwise it is
  /// [`DEFAULT_SRID`].
  pub fn from_geojson(value: &Value) -> Result<Self> {
    let srid = declared_srid(value)?.unwrap_or(DEFAULT_SRID);
    let geojson = GeoJson::from_json_value(value.clone())
      .map_err(|e| Error::InvalidGeometry(e.to_string()))?;

    let geometry = match geojson {
      GeoJson::Geometry(g) => to_geo(g)?,
      GeoJson::Feature(f) => match f.geometry {
        Some(g) => to_geo(g)?,
        None => {
          return Err(Error::InvalidGeometry("feature has no geometry".into()));
        }
      },
      GeoJson::FeatureCollection(fc) => {
        let parts = fc
          .features
          .into_iter()
          .filter_map(|f| f.geometry)
          .map(to_geo)
          .collect::<Result<Vec<_>>>()?;
        Geometry::GeometryCollection(GeometryCollection(parts))
      }
    };

    Ok(Self { srid, geometry })
  }

  /// Like [`Self::from_geojson`] but rejects any system other than `srid`.
  pub fn from_geojson_in(value: &Value, srid: u32) -> Result<Self> {
    let parsed = Self::from_geojson(value)?;
    parsed.ensure_srid(srid)?;
    Ok(parsed)
  }

  /// Serialise the geometry (without reference system) as GeoJSON text.
  pub fn to_geojson_string(&self) -> Result<String> {
    let geometry = geojson::Geometry::new(geojson::Value::from(&self.geometry));
    Ok(serde_json::to_string(&geometry)?)
  }

  /// Parse GeoJSON text written by [`Self::to_geojson_string`].
  pub fn from_geojson_str(text: &str, srid: u32) -> Result<Self> {
    let value: Value = serde_json::from_str(text)?;
    let mut parsed = Self::from_geojson(&value)?;
    parsed.srid = srid;
    Ok(parsed)
  }

  fn ensure_srid(&self, expected: u32) -> Result<()> {
    if self.srid != expected {
      return Err(Error::GeometryReferenceMismatch {
        expected,
        actual: self.srid,
      });
    }
    Ok(())
  }

  /// Spatial intersection. Both sides must share a reference system.
  pub fn intersects(&self, other: &SpatialValue) -> Result<bool> {
    other.ensure_srid(self.srid)?;
    Ok(self.geometry.intersects(&other.geometry))
  }
}

fn to_geo(g: geojson::Geometry) -> Result<Geometry<f64>> {
  Geometry::<f64>::try_from(g).map_err(|e| Error::InvalidGeometry(e.to_string()))
}

/// Read an EPSG code from a legacy GeoJSON `crs` member, e.g.
/// `{"type": "name", "properties": {"name": "urn:ogc:def:crs:EPSG::3005"}}`.
fn declared_srid(value: &Value) -> Result<Option<u32>> {
  let Some(name) = value
    .get("crs")
    .and_then(|crs| crs.get("properties"))
    .and_then(|props| props.get("name"))
    .and_then(Value::as_str)
  else {
    return Ok(None);
  };

  // CRS84 is WGS 84 with longitude first, which is what GeoJSON mandates.
  if name.ends_with("CRS84") {
    return Ok(Some(DEFAULT_SRID));
  }

  name
    .rsplit(':')
    .next()
    .and_then(|code| code.parse::<u32>().ok())
    .map(Some)
    .ok_or_else(|| Error::InvalidGeometry(format!("unrecognised crs {name:?}")))
}

#[cfg(test)]
mod tests {
  use serde_json::json;

  use super::*;

  fn square() -> SpatialValue {
    SpatialValue::from_geojson(&json!({
      "type": "Polygon",
      "coordinates": [[[100.0, 400.0], [150.0, 400.0], [150.0, 500.0], [100.0, 500.0], [100.0, 400.0]]]
    }))
    .unwrap()
  }

  #[test]
  fn point_inside_polygon_intersects() {
    let inside =
      SpatialValue::from_geojson(&json!({"type": "Point", "coordinates": [123, 456]}))
        .unwrap();
    assert!(inside.intersects(&square()).unwrap());
  }

  #[test]
  fn point_outside_polygon_does_not_intersect() {
    let outside =
      SpatialValue::from_geojson(&json!({"type": "Point", "coordinates": [10, 20]}))
        .unwrap();
    assert!(!outside.intersects(&square()).unwrap());
  }

  #[test]
  fn feature_collection_becomes_collection() {
    let v = SpatialValue::from_geojson(&json!({
      "type": "FeatureCollection",
      "features": [
        {"type": "Feature", "properties": {}, "geometry": {"type": "Point", "coordinates": [1, 1]}},
        {"type": "Feature", "properties": {}, "geometry": {"type": "Point", "coordinates": [123, 456]}}
      ]
    }))
    .unwrap();
    assert!(matches!(v.geometry, Geometry::GeometryCollection(_)));
    assert!(v.intersects(&square()).unwrap());
  }

  #[test]
  fn declared_crs_is_read_and_enforced() {
    let bc_albers = json!({
      "type": "Point",
      "coordinates": [1_200_000.0, 500_000.0],
      "crs": {"type": "name", "properties": {"name": "urn:ogc:def:crs:EPSG::3005"}}
    });
    let parsed = SpatialValue::from_geojson(&bc_albers).unwrap();
    assert_eq!(parsed.srid, 3005);

    let err = SpatialValue::from_geojson_in(&bc_albers, DEFAULT_SRID).unwrap_err();
    assert!(matches!(
      err,
      Error::GeometryReferenceMismatch { expected: 4326, actual: 3005 }
    ));
    assert!(matches!(
      parsed.intersects(&square()),
      Err(Error::GeometryReferenceMismatch { .. })
    ));
  }

  #[test]
  fn text_round_trip_preserves_geometry() {
    let original = square();
    let text = original.to_geojson_string().unwrap();
    let back = SpatialValue::from_geojson_str(&text, DEFAULT_SRID).unwrap();
    assert_eq!(back, original);
  }

  #[test]
  fn malformed_geojson_is_invalid() {
    let err = SpatialValue::from_geojson(&json!({"type": "Point"})).unwrap_err();
    assert!(matches!(err, Error::InvalidGeometry(_)));
  }
}
