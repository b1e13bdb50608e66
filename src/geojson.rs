use serde_json::{json, Value};

use crate::map::{MapBackend, MapBounds, MarkerIcon};

#[derive(Debug, Clone)]
struct Feature {
    id: String,
    position: (f64, f64),
    icon: MarkerIcon,
    popup: String,
}

/// A map backend that keeps its markers as GeoJSON point features.
#[derive(Debug, Default)]
pub struct GeoJsonBackend {
    center: (f64, f64),
    zoom: u8,
    viewport: Option<MapBounds>,
    features: Vec<Option<Feature>>,
}

impl GeoJsonBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn zoom(&self) -> u8 {
        self.zoom
    }

    /// The current markers as a FeatureCollection. GeoJSON orders positions lng, lat.
    pub fn to_geojson(&self) -> Value {
        let features: Vec<Value> = self
            .features
            .iter()
            .flatten()
            .map(|feature| {
                json!({
                    "type": "Feature",
                    "geometry": {
                        "type": "Point",
                        "coordinates": [feature.position.1, feature.position.0],
                    },
                    "properties": {
                        "id": feature.id,
                        "icon": format!("{:?}", feature.icon).to_lowercase(),
                        "marker-color": feature.icon.color(),
                        "popup": feature.popup,
                    },
                })
            })
            .collect();
        let mut collection = json!({
            "type": "FeatureCollection",
            "features": features,
        });
        if let Some(bounds) = self.viewport {
            collection["bbox"] = json!([bounds.west, bounds.south, bounds.east, bounds.north]);
        }
        collection
    }
}

// Rough viewport for a web-mercator tile zoom level.
fn viewport_around(center: (f64, f64), zoom: u8) -> MapBounds {
    let scale = 2f64.powi(i32::from(zoom.min(24)));
    let half_lng = 180.0 / scale;
    let half_lat = 90.0 / scale;
    MapBounds {
        north: (center.0 + half_lat).min(90.0),
        south: (center.0 - half_lat).max(-90.0),
        east: center.1 + half_lng,
        west: center.1 - half_lng,
    }
}

impl MapBackend for GeoJsonBackend {
    type Marker = usize;

    fn create_map(&mut self, center: (f64, f64), zoom: u8) {
        self.set_view(center, zoom);
    }

    fn set_view(&mut self, center: (f64, f64), zoom: u8) {
        self.center = center;
        self.zoom = zoom;
        self.viewport = Some(viewport_around(center, zoom));
    }

    fn fit_bounds(&mut self, bounds: MapBounds) {
        self.center = (
            (bounds.north + bounds.south) / 2.0,
            (bounds.east + bounds.west) / 2.0,
        );
        self.viewport = Some(bounds);
    }

    fn add_marker(
        &mut self,
        id: &str,
        position: (f64, f64),
        icon: MarkerIcon,
        popup: &str,
    ) -> usize {
        self.features.push(Some(Feature {
            id: id.to_owned(),
            position,
            icon,
            popup: popup.to_owned(),
        }));
        self.features.len() - 1
    }

    fn remove_marker(&mut self, marker: usize) {
        if let Some(slot) = self.features.get_mut(marker) {
            *slot = None;
        }
    }

    fn set_icon(&mut self, marker: &usize, icon: MarkerIcon) {
        if let Some(Some(feature)) = self.features.get_mut(*marker) {
            feature.icon = icon;
        }
    }

    fn bind_popup(&mut self, marker: &usize, popup: &str) {
        if let Some(Some(feature)) = self.features.get_mut(*marker) {
            feature.popup = popup.to_owned();
        }
    }

    fn open_popup(&mut self, _marker: &usize) {}

    fn bounds(&self) -> MapBounds {
        self.viewport
            .unwrap_or_else(|| viewport_around(self.center, self.zoom))
    }

    fn center(&self) -> (f64, f64) {
        self.center
    }

    fn invalidate_size(&mut self) {}
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::map::{MapView, CURRENT_LOCATION_ID};
    use crate::types::{Place, Status};

    fn shop(id: &str, lat: f64, lng: f64) -> Place {
        Place {
            place_id: Some(id.to_owned()),
            name: id.to_uppercase(),
            lat: Some(lat),
            lng: Some(lng),
            ..Default::default()
        }
    }

    #[test]
    fn renders_markers_as_features() {
        let mut view = MapView::new(GeoJsonBackend::new());
        view.init((25.03, 121.56), 10);
        let places = vec![shop("a", 25.0, 121.0), shop("b", 24.0, 120.0)];
        let statuses: HashMap<String, Status> = [("a".to_string(), Status::Visited)].into();
        view.update_markers(&places, &statuses);
        view.update_markers(&places[..1], &statuses);
        view.add_current_location(25.05, 121.5);

        let geojson = view.backend().to_geojson();
        let features = geojson["features"].as_array().unwrap();
        assert_eq!(features.len(), 2);
        assert_eq!(features[0]["properties"]["id"], "a");
        assert_eq!(features[0]["properties"]["icon"], "visited");
        assert_eq!(features[0]["geometry"]["coordinates"], json!([121.0, 25.0]));
        assert_eq!(features[1]["properties"]["id"], CURRENT_LOCATION_ID);
    }

    #[test]
    fn status_change_rewrites_feature_in_place() {
        let mut view = MapView::new(GeoJsonBackend::new());
        view.init((25.0, 121.0), 12);
        let places = vec![shop("a", 25.0, 121.0)];
        view.update_markers(&places, &HashMap::new());
        let statuses: HashMap<String, Status> = [("a".to_string(), Status::Want)].into();
        view.update_markers(&places, &statuses);

        let geojson = view.backend().to_geojson();
        let feature = &geojson["features"][0];
        assert_eq!(feature["properties"]["marker-color"], "gold");
        assert!(feature["properties"]["popup"]
            .as_str()
            .unwrap()
            .contains("想去"));
    }

    #[test]
    fn viewport_follows_view_changes() {
        let mut backend = GeoJsonBackend::new();
        backend.create_map((25.0, 121.0), 1);
        let bounds = backend.bounds();
        assert!(bounds.contains(25.0, 121.0));
        assert_eq!(backend.zoom(), 1);

        let fitted = MapBounds {
            north: 26.0,
            south: 24.0,
            east: 122.0,
            west: 120.0,
        };
        backend.fit_bounds(fitted);
        assert_eq!(backend.bounds(), fitted);
        assert_eq!(backend.center(), (25.0, 121.0));
        assert_eq!(backend.to_geojson()["bbox"], json!([120.0, 24.0, 122.0, 26.0]));
    }
}
