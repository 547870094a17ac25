use anyhow::{Context, Result};
use geo::{BoundingRect, Contains, Coord, LineString, MultiPolygon, Point, Polygon};
use geojson::{Feature, FeatureCollection, GeoJson, JsonObject};
use log::{debug, info};
use serde::Deserialize;
use std::collections::HashMap;

use crate::collect::http::Downloader;
use crate::config::Settings;
use crate::error::TractError;
use crate::geo_core::BoundingBox;

/// One OSM building with polygonal geometry.
#[derive(Debug, Clone)]
pub struct OsmFeature {
    /// `way/123` or `relation/456`
    pub id: String,
    pub geometry: MultiPolygon<f64>,
    pub tags: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct OverpassResponse {
    #[serde(default)]
    elements: Vec<Element>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
struct LatLon {
    lat: f64,
    lon: f64,
}

impl From<LatLon> for Coord<f64> {
    fn from(p: LatLon) -> Self {
        Coord { x: p.lon, y: p.lat }
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum Element {
    Way {
        id: i64,
        #[serde(default)]
        geometry: Vec<Option<LatLon>>,
        #[serde(default)]
        tags: HashMap<String, String>,
    },
    Relation {
        id: i64,
        #[serde(default)]
        members: Vec<Member>,
        #[serde(default)]
        tags: HashMap<String, String>,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct Member {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    role: String,
    #[serde(default)]
    geometry: Vec<Option<LatLon>>,
}

fn coords(points: &[Option<LatLon>]) -> Vec<Coord<f64>> {
    points.iter().flatten().map(|p| Coord::from(*p)).collect()
}

fn is_closed_ring(coords: &[Coord<f64>]) -> bool {
    coords.len() >= 4 && coords.first() == coords.last()
}

/// Stitch open ways end-to-end into closed rings. Chains that never close are dropped.
pub fn assemble_rings(mut segments: Vec<Vec<Coord<f64>>>) -> Vec<LineString<f64>> {
    let mut rings = Vec::new();
    segments.retain(|s| s.len() >= 2);

    while let Some(mut current) = segments.pop() {
        loop {
            if is_closed_ring(&current) {
                rings.push(LineString::from(current));
                break;
            }
            let (Some(&start), Some(&end)) = (current.first(), current.last()) else {
                break;
            };
            let next = segments.iter().position(|s| {
                s.first() == Some(&end)
                    || s.last() == Some(&end)
                    || s.first() == Some(&start)
                    || s.last() == Some(&start)
            });
            let Some(idx) = next else {
                debug!("dropping unclosed ring with {} points", current.len());
                break;
            };
            let mut segment = segments.swap_remove(idx);
            if segment.first() == Some(&end) {
                current.extend(segment.into_iter().skip(1));
            } else if segment.last() == Some(&end) {
                segment.reverse();
                current.extend(segment.into_iter().skip(1));
            } else if segment.last() == Some(&start) {
                segment.extend(current.into_iter().skip(1));
                current = segment;
            } else {
                segment.reverse();
                segment.extend(current.into_iter().skip(1));
                current = segment;
            }
        }
    }
    rings
}

/// Build polygons from outer rings, attaching each inner ring to the outer that contains it.
fn polygons_from_rings(outers: Vec<LineString<f64>>, inners: Vec<LineString<f64>>) -> MultiPolygon<f64> {
    let mut polygons: Vec<Polygon<f64>> = outers
        .into_iter()
        .map(|ring| Polygon::new(ring, vec![]))
        .collect();
    for inner in inners {
        let Some(probe) = inner.0.first().map(|c| Point::from(*c)) else {
            continue;
        };
        let owner = polygons
            .iter_mut()
            .find(|p| Polygon::new(p.exterior().clone(), vec![]).contains(&probe));
        if let Some(owner) = owner {
            owner.interiors_push(inner);
        }
    }
    MultiPolygon(polygons)
}

/// Parse an Overpass `out geom` JSON response into polygonal buildings.
/// Non-area ways (open lines) and nodes are dropped.
pub fn parse_overpass(bytes: &[u8]) -> Result<Vec<OsmFeature>> {
    let response: OverpassResponse =
        serde_json::from_slice(bytes).context("Failed to parse Overpass response")?;

    let mut features = Vec::new();
    for element in response.elements {
        match element {
            Element::Way { id, geometry, tags } => {
                let ring = coords(&geometry);
                if !is_closed_ring(&ring) {
                    continue;
                }
                features.push(OsmFeature {
                    id: format!("way/{}", id),
                    geometry: MultiPolygon(vec![Polygon::new(LineString::from(ring), vec![])]),
                    tags,
                });
            }
            Element::Relation { id, members, tags } => {
                let mut outer = Vec::new();
                let mut inner = Vec::new();
                for member in members.iter().filter(|m| m.kind == "way") {
                    let segment = coords(&member.geometry);
                    if member.role == "inner" {
                        inner.push(segment);
                    } else {
                        outer.push(segment);
                    }
                }
                let geometry = polygons_from_rings(assemble_rings(outer), assemble_rings(inner));
                if geometry.0.is_empty() {
                    continue;
                }
                features.push(OsmFeature {
                    id: format!("relation/{}", id),
                    geometry,
                    tags,
                });
            }
            Element::Other => {}
        }
    }
    Ok(features)
}

/// Overpass QL selecting every building way and multipolygon relation in a bbox.
pub fn building_query(bbox: &BoundingBox) -> String {
    let b = bbox.to_overpass();
    format!(
        "[out:json][timeout:180];\n(\n  way[\"building\"]({b});\n  relation[\"building\"][\"type\"=\"multipolygon\"]({b});\n);\nout geom;"
    )
}

/// Boundary polygon of the first Nominatim match (requested as GeoJSON).
pub fn parse_nominatim(bytes: &[u8], place: &str) -> Result<MultiPolygon<f64>> {
    let text = std::str::from_utf8(bytes).context("Nominatim response is not valid UTF-8")?;
    let geojson: GeoJson = text.parse().context("Failed to parse Nominatim GeoJSON")?;
    let GeoJson::FeatureCollection(fc) = geojson else {
        anyhow::bail!("Nominatim did not return a FeatureCollection for {}", place);
    };
    let feature = fc
        .features
        .into_iter()
        .next()
        .with_context(|| format!("Nominatim found no match for {}", place))?;
    let geometry = feature
        .geometry
        .with_context(|| format!("Nominatim match for {} has no geometry", place))?;
    let geometry: geo::Geometry<f64> = geometry
        .try_into()
        .context("Failed to convert Nominatim geometry")?;
    match geometry {
        geo::Geometry::Polygon(p) => Ok(MultiPolygon(vec![p])),
        geo::Geometry::MultiPolygon(mp) => Ok(mp),
        other => Err(TractError::UnsupportedGeometry(geometry_name(&other).to_string()).into()),
    }
}

pub(crate) fn geometry_name(geometry: &geo::Geometry<f64>) -> &'static str {
    match geometry {
        geo::Geometry::Point(_) => "Point",
        geo::Geometry::Line(_) => "Line",
        geo::Geometry::LineString(_) => "LineString",
        geo::Geometry::Polygon(_) => "Polygon",
        geo::Geometry::MultiPoint(_) => "MultiPoint",
        geo::Geometry::MultiLineString(_) => "MultiLineString",
        geo::Geometry::MultiPolygon(_) => "MultiPolygon",
        geo::Geometry::GeometryCollection(_) => "GeometryCollection",
        geo::Geometry::Rect(_) => "Rect",
        geo::Geometry::Triangle(_) => "Triangle",
    }
}

/// GeoJSON FeatureCollection with the `building` tag and OSM id as properties.
pub fn to_feature_collection(features: &[OsmFeature]) -> FeatureCollection {
    let features = features
        .iter()
        .map(|f| {
            let mut properties = JsonObject::new();
            properties.insert("osmid".to_string(), f.id.clone().into());
            if let Some(building) = f.tags.get("building") {
                properties.insert("building".to_string(), building.clone().into());
            }
            Feature {
                bbox: None,
                geometry: Some(geojson::Geometry::new(geojson::Value::from(&f.geometry))),
                id: None,
                properties: Some(properties),
                foreign_members: None,
            }
        })
        .collect();
    FeatureCollection {
        bbox: None,
        features,
        foreign_members: None,
    }
}

/// Client for the Overpass and Nominatim APIs.
pub struct OverpassClient {
    downloader: Downloader,
    overpass_url: String,
    nominatim_url: String,
}

impl OverpassClient {
    pub fn new(settings: &Settings) -> Result<Self> {
        Ok(OverpassClient {
            downloader: Downloader::new(settings)?,
            overpass_url: settings.overpass_url.clone(),
            nominatim_url: settings.nominatim_url.clone(),
        })
    }

    pub fn buildings_in_bbox(&self, bbox: &BoundingBox) -> Result<Vec<OsmFeature>> {
        let query = building_query(bbox);
        let body = self
            .downloader
            .post_form(&self.overpass_url, &[("data", query.as_str())])
            .context("Overpass building query failed")?;
        let features = parse_overpass(&body)?;
        info!("overpass returned {} building features", features.len());
        Ok(features)
    }

    pub fn geocode_place(&self, place: &str) -> Result<MultiPolygon<f64>> {
        let url = format!(
            "{}?q={}&format=geojson&polygon_geojson=1&limit=1",
            self.nominatim_url,
            urlencoding::encode(place)
        );
        let body = self.downloader.get_bytes(&url)?;
        parse_nominatim(&body, place)
    }

    /// Buildings intersecting the boundary of a named place.
    pub fn buildings_in_place(&self, place: &str) -> Result<Vec<OsmFeature>> {
        use geo::Intersects;

        let boundary = self.geocode_place(place)?;
        let rect = boundary
            .bounding_rect()
            .with_context(|| format!("Boundary of {} is empty", place))?;
        let bbox = BoundingBox::from_rect(rect);
        let mut features = self.buildings_in_bbox(&bbox)?;
        features.retain(|f| f.geometry.intersects(&boundary));
        Ok(features)
    }
}
