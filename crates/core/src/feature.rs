//! Features, attribute values, and the feature-source boundary.
//!
//! A [`FeatureSource`] hands the pipeline features one at a time for a
//! [`Query`]. Attributes arrive as [`AttributeValue`]s, which may be nested;
//! before they reach a tile builder they are flattened into scalar
//! [`PropertyValue`]s under dotted names.

use std::cmp::Ordering;

use geo::{BoundingRect, Geometry};
use geojson::GeoJson;

use crate::crs::Crs;
use crate::envelope::Envelope;
use crate::property_filter::PropertyFilter;
use crate::{Error, Result};

/// An attribute value as delivered by a feature source.
#[derive(Debug, Clone, PartialEq)]
pub enum AttributeValue {
    Null,
    Bool(bool),
    Int(i64),
    UInt(u64),
    Double(f64),
    String(String),
    /// Ordered list, written as a JSON string
    List(Vec<AttributeValue>),
    /// Nested attributes, flattened to dotted names
    Complex(Vec<(String, AttributeValue)>),
    /// A secondary geometry attribute, never written
    Geometry(Geometry<f64>),
}

impl AttributeValue {
    pub fn from_json(value: &serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => AttributeValue::Null,
            serde_json::Value::Bool(b) => AttributeValue::Bool(*b),
            serde_json::Value::Number(n) => {
                if let Some(u) = n.as_u64() {
                    AttributeValue::UInt(u)
                } else if let Some(i) = n.as_i64() {
                    AttributeValue::Int(i)
                } else {
                    AttributeValue::Double(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            serde_json::Value::String(s) => AttributeValue::String(s.clone()),
            serde_json::Value::Array(items) => {
                AttributeValue::List(items.iter().map(AttributeValue::from_json).collect())
            }
            serde_json::Value::Object(map) => AttributeValue::Complex(
                map.iter()
                    .map(|(k, v)| (k.clone(), AttributeValue::from_json(v)))
                    .collect(),
            ),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            AttributeValue::Null | AttributeValue::Geometry(_) => serde_json::Value::Null,
            AttributeValue::Bool(b) => serde_json::Value::Bool(*b),
            AttributeValue::Int(i) => serde_json::Value::from(*i),
            AttributeValue::UInt(u) => serde_json::Value::from(*u),
            AttributeValue::Double(d) => serde_json::Number::from_f64(*d)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            AttributeValue::String(s) => serde_json::Value::String(s.clone()),
            AttributeValue::List(items) => {
                serde_json::Value::Array(items.iter().map(AttributeValue::to_json).collect())
            }
            AttributeValue::Complex(members) => serde_json::Value::Object(
                members
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
        }
    }

    /// Ordering used for sort-by queries. Nulls sort first, numbers compare
    /// numerically across variants, everything else by its JSON text.
    pub fn sort_cmp(&self, other: &Self) -> Ordering {
        match (self.as_f64(), other.as_f64()) {
            (Some(a), Some(b)) => a.total_cmp(&b),
            _ => match (self, other) {
                (AttributeValue::Null, AttributeValue::Null) => Ordering::Equal,
                (AttributeValue::Null, _) => Ordering::Less,
                (_, AttributeValue::Null) => Ordering::Greater,
                (AttributeValue::String(a), AttributeValue::String(b)) => a.cmp(b),
                (a, b) => a.to_json().to_string().cmp(&b.to_json().to_string()),
            },
        }
    }

    fn as_f64(&self) -> Option<f64> {
        match self {
            AttributeValue::Int(i) => Some(*i as f64),
            AttributeValue::UInt(u) => Some(*u as f64),
            AttributeValue::Double(d) => Some(*d),
            _ => None,
        }
    }
}

/// A flattened, scalar property value handed to tile builders.
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    Null,
    String(String),
    Double(f64),
    Int(i64),
    UInt(u64),
    Bool(bool),
}

impl PropertyValue {
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            PropertyValue::Null => serde_json::Value::Null,
            PropertyValue::String(s) => serde_json::Value::String(s.clone()),
            PropertyValue::Double(d) => serde_json::Number::from_f64(*d)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            PropertyValue::Int(i) => serde_json::Value::from(*i),
            PropertyValue::UInt(u) => serde_json::Value::from(*u),
            PropertyValue::Bool(b) => serde_json::Value::Bool(*b),
        }
    }
}

/// Ordered name → value pairs
pub type Properties = Vec<(String, PropertyValue)>;

/// Flatten attributes into scalar properties.
///
/// Nested attributes get dotted names, geometry-valued attributes and the
/// attribute named `geometry_name` are skipped, and `filter` decides which of
/// the remaining names are kept. Nulls are kept.
pub fn flatten_attributes(
    attributes: &[(String, AttributeValue)],
    geometry_name: &str,
    filter: &PropertyFilter,
) -> Properties {
    let mut properties = Vec::with_capacity(attributes.len());
    for (name, value) in attributes {
        if name == geometry_name {
            continue;
        }
        flatten_into(name, value, filter, &mut properties);
    }
    properties
}

fn flatten_into(
    name: &str,
    value: &AttributeValue,
    filter: &PropertyFilter,
    out: &mut Properties,
) {
    let scalar = match value {
        AttributeValue::Geometry(_) => return,
        AttributeValue::Complex(members) => {
            for (child, child_value) in members {
                flatten_into(&format!("{}.{}", name, child), child_value, filter, out);
            }
            return;
        }
        AttributeValue::Null => PropertyValue::Null,
        AttributeValue::Bool(b) => PropertyValue::Bool(*b),
        AttributeValue::Int(i) => PropertyValue::Int(*i),
        AttributeValue::UInt(u) => PropertyValue::UInt(*u),
        AttributeValue::Double(d) => PropertyValue::Double(*d),
        AttributeValue::String(s) => PropertyValue::String(s.clone()),
        AttributeValue::List(_) => PropertyValue::String(value.to_json().to_string()),
    };
    if filter.should_include(name) {
        out.push((name.to_string(), scalar));
    }
}

/// A feature as delivered by a [`FeatureSource`].
#[derive(Debug, Clone, PartialEq)]
pub struct Feature {
    pub id: String,
    pub geometry: Option<Geometry<f64>>,
    pub attributes: Vec<(String, AttributeValue)>,
}

impl Feature {
    pub fn new(id: impl Into<String>, geometry: Geometry<f64>) -> Self {
        Self {
            id: id.into(),
            geometry: Some(geometry),
            attributes: Vec::new(),
        }
    }

    pub fn with_attribute(mut self, name: impl Into<String>, value: AttributeValue) -> Self {
        self.attributes.push((name.into(), value));
        self
    }

    pub fn attribute(&self, name: &str) -> Option<&AttributeValue> {
        self.attributes
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }

    pub fn envelope(&self) -> Option<Envelope> {
        self.geometry
            .as_ref()
            .and_then(|g| g.bounding_rect())
            .map(|r| Envelope::from_rect(&r))
    }

    /// Convert a GeoJSON feature. Features without an id are numbered by `index`.
    pub fn from_geojson(feature: geojson::Feature, index: usize) -> Result<Self> {
        let id = match &feature.id {
            Some(geojson::feature::Id::String(s)) => s.clone(),
            Some(geojson::feature::Id::Number(n)) => n.to_string(),
            None => index.to_string(),
        };
        let geometry = match feature.geometry {
            Some(geometry) => Some(Geometry::<f64>::try_from(geometry).map_err(|e| {
                Error::FeatureSource(format!("feature {}: {}", id, e))
            })?),
            None => None,
        };
        let attributes = feature
            .properties
            .map(|props| {
                props
                    .iter()
                    .map(|(k, v)| (k.clone(), AttributeValue::from_json(v)))
                    .collect()
            })
            .unwrap_or_default();
        Ok(Self {
            id,
            geometry,
            attributes,
        })
    }

    /// Numeric id for formats that need one: the digits after the last `.`
    /// (`roads.42` → 42), or the whole id if it is a number.
    pub fn numeric_id(id: &str) -> Option<u64> {
        let tail = id.rsplit('.').next().unwrap_or(id);
        tail.parse().ok()
    }
}

/// A feature request
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Query {
    /// Only features whose envelope intersects this, in source CRS
    pub bbox: Option<Envelope>,
    /// Attribute names to return, `None` for all
    pub property_names: Option<Vec<String>>,
    /// Attribute names to sort by, ascending
    pub sort_by: Vec<String>,
}

impl Query {
    pub fn with_bbox(mut self, bbox: Envelope) -> Self {
        self.bbox = Some(bbox);
        self
    }

    pub fn with_property_names(mut self, names: Option<Vec<String>>) -> Self {
        self.property_names = names;
        self
    }

    pub fn with_sort_by(mut self, sort_by: Vec<String>) -> Self {
        self.sort_by = sort_by;
        self
    }
}

pub type FeatureIter<'a> = Box<dyn Iterator<Item = Result<Feature>> + Send + 'a>;

/// Where features come from.
pub trait FeatureSource: Send + Sync {
    /// CRS of the returned geometries
    fn crs(&self) -> Crs;

    /// Name of the default geometry attribute
    fn geometry_name(&self) -> &str;

    fn features(&self, query: &Query) -> Result<FeatureIter<'_>>;
}

/// A feature source backed by a `Vec`.
#[derive(Debug, Clone)]
pub struct MemoryFeatureSource {
    crs: Crs,
    geometry_name: String,
    features: Vec<Feature>,
}

impl MemoryFeatureSource {
    pub fn new(crs: Crs, features: Vec<Feature>) -> Self {
        Self {
            crs,
            geometry_name: "geometry".to_string(),
            features,
        }
    }

    pub fn with_geometry_name(mut self, name: impl Into<String>) -> Self {
        self.geometry_name = name.into();
        self
    }

    /// Load a GeoJSON `FeatureCollection`, `Feature` or bare geometry.
    pub fn from_geojson_str(input: &str, crs: Crs) -> Result<Self> {
        let geojson: GeoJson = input
            .parse()
            .map_err(|e: geojson::Error| Error::FeatureSource(e.to_string()))?;
        let features = match geojson {
            GeoJson::FeatureCollection(fc) => fc
                .features
                .into_iter()
                .enumerate()
                .map(|(i, f)| Feature::from_geojson(f, i))
                .collect::<Result<Vec<_>>>()?,
            GeoJson::Feature(f) => vec![Feature::from_geojson(f, 0)?],
            GeoJson::Geometry(g) => vec![Feature::from_geojson(
                geojson::Feature {
                    geometry: Some(g),
                    ..Default::default()
                },
                0,
            )?],
        };
        log::debug!("loaded {} features from GeoJSON", features.len());
        Ok(Self::new(crs, features))
    }

    pub fn push(&mut self, feature: Feature) {
        self.features.push(feature);
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }
}

impl FeatureSource for MemoryFeatureSource {
    fn crs(&self) -> Crs {
        self.crs
    }

    fn geometry_name(&self) -> &str {
        &self.geometry_name
    }

    fn features(&self, query: &Query) -> Result<FeatureIter<'_>> {
        let mut selected: Vec<&Feature> = self
            .features
            .iter()
            .filter(|f| match (&query.bbox, f.envelope()) {
                (Some(bbox), Some(env)) => bbox.intersects(&env),
                (Some(_), None) => false,
                (None, _) => true,
            })
            .collect();

        if !query.sort_by.is_empty() {
            // stable, so ties keep source order
            selected.sort_by(|a, b| {
                query
                    .sort_by
                    .iter()
                    .map(|key| {
                        let null = AttributeValue::Null;
                        let va = a.attribute(key).unwrap_or(&null);
                        let vb = b.attribute(key).unwrap_or(&null);
                        va.sort_cmp(vb)
                    })
                    .find(|o| *o != Ordering::Equal)
                    .unwrap_or(Ordering::Equal)
            });
        }

        let names = query.property_names.clone();
        Ok(Box::new(selected.into_iter().map(move |f| {
            let mut feature = f.clone();
            if let Some(names) = &names {
                feature.attributes.retain(|(n, _)| names.contains(n));
            }
            Ok(feature)
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::point;

    fn poi(id: &str, x: f64, y: f64, rank: i64) -> Feature {
        Feature::new(id, Geometry::Point(point!(x: x, y: y)))
            .with_attribute("rank", AttributeValue::Int(rank))
            .with_attribute("name", AttributeValue::String(id.to_string()))
    }

    #[test]
    fn test_flatten_nested_attributes() {
        let attrs = vec![
            ("name".to_string(), AttributeValue::String("Main".into())),
            (
                "address".to_string(),
                AttributeValue::Complex(vec![
                    ("city".to_string(), AttributeValue::String("Rome".into())),
                    ("zip".to_string(), AttributeValue::UInt(184)),
                ]),
            ),
            ("missing".to_string(), AttributeValue::Null),
            (
                "centroid".to_string(),
                AttributeValue::Geometry(Geometry::Point(point!(x: 0.0, y: 0.0))),
            ),
            (
                "geometry".to_string(),
                AttributeValue::String("ignored".into()),
            ),
        ];
        let props = flatten_attributes(&attrs, "geometry", &PropertyFilter::None);
        assert_eq!(
            props,
            vec![
                ("name".to_string(), PropertyValue::String("Main".into())),
                ("address.city".to_string(), PropertyValue::String("Rome".into())),
                ("address.zip".to_string(), PropertyValue::UInt(184)),
                ("missing".to_string(), PropertyValue::Null),
            ]
        );
    }

    #[test]
    fn test_flatten_applies_filter() {
        let attrs = vec![
            ("name".to_string(), AttributeValue::String("Main".into())),
            ("secret".to_string(), AttributeValue::Int(7)),
            (
                "tags".to_string(),
                AttributeValue::List(vec![AttributeValue::Int(1), AttributeValue::Int(2)]),
            ),
        ];
        let filter = PropertyFilter::include(vec!["name", "tags"]);
        let props = flatten_attributes(&attrs, "geometry", &filter);
        assert_eq!(
            props,
            vec![
                ("name".to_string(), PropertyValue::String("Main".into())),
                ("tags".to_string(), PropertyValue::String("[1,2]".into())),
            ]
        );
    }

    #[test]
    fn test_memory_source_bbox_filter() {
        let source = MemoryFeatureSource::new(
            Crs::Wgs84,
            vec![poi("a", 1.0, 1.0, 1), poi("b", 50.0, 50.0, 2)],
        );
        let query = Query::default().with_bbox(Envelope::new(0.0, 0.0, 10.0, 10.0));
        let ids: Vec<String> = source
            .features(&query)
            .unwrap()
            .map(|f| f.unwrap().id)
            .collect();
        assert_eq!(ids, vec!["a".to_string()]);
    }

    #[test]
    fn test_memory_source_sort_and_project() {
        let source = MemoryFeatureSource::new(
            Crs::Wgs84,
            vec![
                poi("c", 0.0, 0.0, 3),
                poi("a", 0.0, 0.0, 1),
                poi("b", 0.0, 0.0, 2),
            ],
        );
        let query = Query::default()
            .with_sort_by(vec!["rank".to_string()])
            .with_property_names(Some(vec!["name".to_string()]));
        let features: Vec<Feature> = source
            .features(&query)
            .unwrap()
            .collect::<Result<_>>()
            .unwrap();
        let ids: Vec<&str> = features.iter().map(|f| f.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert!(features.iter().all(|f| f.attributes.len() == 1));
        assert!(features[0].attribute("rank").is_none());
    }

    #[test]
    fn test_from_geojson_str() {
        let input = r#"{
            "type": "FeatureCollection",
            "features": [
                {"type": "Feature", "id": "roads.7",
                 "geometry": {"type": "LineString", "coordinates": [[0, 0], [1, 1]]},
                 "properties": {"kind": "primary", "lanes": 2, "meta": {"source": "osm"}}},
                {"type": "Feature",
                 "geometry": {"type": "Point", "coordinates": [3.5, 4.5]},
                 "properties": null}
            ]
        }"#;
        let source = MemoryFeatureSource::from_geojson_str(input, Crs::Wgs84).unwrap();
        assert_eq!(source.len(), 2);

        let all: Vec<Feature> = source
            .features(&Query::default())
            .unwrap()
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(all[0].id, "roads.7");
        assert_eq!(all[0].attribute("lanes"), Some(&AttributeValue::UInt(2)));
        assert!(matches!(
            all[0].attribute("meta"),
            Some(AttributeValue::Complex(_))
        ));
        assert_eq!(all[1].id, "1");
        assert!(matches!(all[1].geometry, Some(Geometry::Point(_))));
    }

    #[test]
    fn test_invalid_geojson_is_error() {
        assert!(matches!(
            MemoryFeatureSource::from_geojson_str("{not json", Crs::Wgs84),
            Err(Error::FeatureSource(_))
        ));
    }

    #[test]
    fn test_numeric_id() {
        assert_eq!(Feature::numeric_id("roads.42"), Some(42));
        assert_eq!(Feature::numeric_id("17"), Some(17));
        assert_eq!(Feature::numeric_id("abc"), None);
    }

    #[test]
    fn test_sort_cmp_mixed_numbers() {
        assert_eq!(
            AttributeValue::Int(2).sort_cmp(&AttributeValue::Double(2.5)),
            Ordering::Less
        );
        assert_eq!(
            AttributeValue::Null.sort_cmp(&AttributeValue::String("a".into())),
            Ordering::Less
        );
    }
}
