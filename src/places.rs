use std::collections::HashMap;
use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{FetchError, LoadError};
use crate::types::{Place, PlaceDocument};

/// One configured place list. The first configured source is the primary one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaceSource {
    pub label: String,
    pub location: String,
}

impl PlaceSource {
    pub fn new(label: &str, location: &str) -> Self {
        PlaceSource {
            label: label.to_owned(),
            location: location.to_owned(),
        }
    }
}

pub trait DocumentFetcher {
    fn fetch(
        &self,
        location: &str,
    ) -> impl Future<Output = Result<PlaceDocument, FetchError>> + Send;
}

/// Fetches place lists over HTTP, relative locations resolved against `base_url`.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
    base_url: String,
}

impl HttpFetcher {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("gluttony/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()?;
        Ok(HttpFetcher {
            client,
            base_url: base_url.trim_end_matches('/').to_owned(),
        })
    }

    fn resolve(&self, location: &str) -> String {
        if location.starts_with("http://") || location.starts_with("https://") {
            location.to_owned()
        } else {
            format!("{}/{}", self.base_url, location.trim_start_matches('/'))
        }
    }
}

impl DocumentFetcher for HttpFetcher {
    async fn fetch(&self, location: &str) -> Result<PlaceDocument, FetchError> {
        let url = self.resolve(location);
        debug!(%url, "fetching place list");
        let response = self
            .client
            .get(&url)
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|source| FetchError::Http {
                location: url.clone(),
                source,
            })?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                location: url,
                status,
            });
        }
        let body = response.bytes().await.map_err(|source| FetchError::Http {
            location: url.clone(),
            source,
        })?;
        serde_json::from_slice(&body).map_err(|source| FetchError::Parse {
            location: url,
            source,
        })
    }
}

/// Reads place lists from a local directory.
#[derive(Debug, Clone)]
pub struct FileFetcher {
    data_dir: PathBuf,
}

impl FileFetcher {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        FileFetcher {
            data_dir: data_dir.into(),
        }
    }
}

impl DocumentFetcher for FileFetcher {
    async fn fetch(&self, location: &str) -> Result<PlaceDocument, FetchError> {
        let path = self.data_dir.join(location.trim_start_matches('/'));
        let location = path.display().to_string();
        debug!(%location, "reading place list");
        let body = tokio::fs::read(&path)
            .await
            .map_err(|source| FetchError::Io {
                location: location.clone(),
                source,
            })?;
        serde_json::from_slice(&body).map_err(|source| FetchError::Parse { location, source })
    }
}

/// Runtime choice between the two transports.
#[derive(Debug, Clone)]
pub enum SourceFetcher {
    Http(HttpFetcher),
    File(FileFetcher),
}

impl DocumentFetcher for SourceFetcher {
    async fn fetch(&self, location: &str) -> Result<PlaceDocument, FetchError> {
        match self {
            SourceFetcher::Http(fetcher) => fetcher.fetch(location).await,
            SourceFetcher::File(fetcher) => fetcher.fetch(location).await,
        }
    }
}

pub struct PlaceStore<F> {
    fetcher: F,
    sources: Vec<PlaceSource>,
}

impl<F: DocumentFetcher> PlaceStore<F> {
    pub fn new(fetcher: F, sources: Vec<PlaceSource>) -> Self {
        PlaceStore { fetcher, sources }
    }

    /// Fetch every source at once, then merge them in priority order.
    ///
    /// Only a failing primary source fails the load. Any other source that
    /// cannot be fetched contributes nothing.
    pub async fn load(&self) -> Result<Vec<Place>, LoadError> {
        if self.sources.is_empty() {
            return Err(LoadError::NoSources);
        }
        let results = join_all(
            self.sources
                .iter()
                .map(|source| self.fetcher.fetch(&source.location)),
        )
        .await;

        let mut merger = PlaceMerger::default();
        for (index, (source, result)) in self.sources.iter().zip(results).enumerate() {
            match result {
                Ok(document) => {
                    info!(
                        label = %source.label,
                        title = %document.title,
                        places = document.places.len(),
                        "loaded place list"
                    );
                    merger.extend(&source.label, document.places);
                }
                Err(e) if index == 0 => {
                    return Err(LoadError::Primary {
                        label: source.label.clone(),
                        source: e,
                    });
                }
                Err(e) => {
                    warn!(label = %source.label, error = %e, "skipping place list");
                }
            }
        }
        let places = merger.into_places();
        debug!(count = places.len(), "merged place lists");
        Ok(places)
    }
}

/// Accumulates places from several lists, folding records that describe the
/// same place into one entry.
///
/// Records match on place id, then on coordinates rounded to four decimals,
/// then on the derived id (place id, else name). The last rule keeps ids
/// unique in the output, so two different places without a place id that
/// share a name collapse into one.
#[derive(Debug, Default)]
pub struct PlaceMerger {
    places: Vec<Place>,
    by_place_id: HashMap<String, usize>,
    by_coordinates: HashMap<String, usize>,
    by_id: HashMap<String, usize>,
}

impl PlaceMerger {
    pub fn extend(&mut self, label: &str, places: impl IntoIterator<Item = Place>) {
        for place in places {
            self.add(label, place);
        }
    }

    pub fn add(&mut self, label: &str, place: Place) {
        let place = normalize(place);
        let index = match self.find(&place) {
            Some(index) => {
                overlay(&mut self.places[index], place);
                index
            }
            None => {
                let mut place = place;
                place.source = None;
                self.places.push(place);
                self.places.len() - 1
            }
        };
        self.places[index].add_source(label);
        self.register(index);
    }

    pub fn into_places(self) -> Vec<Place> {
        self.places
    }

    fn find(&self, place: &Place) -> Option<usize> {
        if let Some(index) = place
            .place_id
            .as_ref()
            .and_then(|id| self.by_place_id.get(id))
        {
            return Some(*index);
        }
        if let Some(index) = coordinate_key(place).and_then(|key| self.by_coordinates.get(&key)) {
            return Some(*index);
        }
        if place.id().is_empty() {
            return None;
        }
        self.by_id.get(place.id()).copied()
    }

    fn register(&mut self, index: usize) {
        let place = &self.places[index];
        if let Some(id) = &place.place_id {
            self.by_place_id.entry(id.clone()).or_insert(index);
        }
        if let Some(key) = coordinate_key(place) {
            self.by_coordinates.entry(key).or_insert(index);
        }
        if !place.id().is_empty() {
            self.by_id.entry(place.id().to_owned()).or_insert(index);
        }
    }
}

/// Rounded coordinate string, about 11 m of precision.
pub fn coordinate_key(place: &Place) -> Option<String> {
    place
        .coordinates()
        .map(|(lat, lng)| format!("{lat:.4},{lng:.4}"))
}

fn normalize(mut place: Place) -> Place {
    place.name = place.name.trim().to_owned();
    if place.coordinates().is_none() {
        if let Some((lat, lng)) = place.url.as_deref().and_then(coordinates_from_url) {
            place.lat = Some(lat);
            place.lng = Some(lng);
        }
    }
    place
}

/// Pull `lat,lng` out of a map link such as `https://maps.example/place/x/@25.03,121.56,17z`.
pub fn coordinates_from_url(url: &str) -> Option<(f64, f64)> {
    let (_, rest) = url.split_once('@')?;
    let mut parts = rest.split(',');
    let lat: f64 = parts.next()?.trim().parse().ok()?;
    let lng: f64 = parts.next()?.trim().parse().ok()?;
    let resolved = Place {
        lat: Some(lat),
        lng: Some(lng),
        ..Default::default()
    };
    resolved.coordinates()
}

fn replace_if_some<T>(target: &mut Option<T>, value: Option<T>) {
    if value.is_some() {
        *target = value;
    }
}

// Field by field: whatever the newer record carries wins, gaps keep the older value.
fn overlay(existing: &mut Place, newer: Place) {
    let coordinates = newer.coordinates();
    if !newer.name.is_empty() {
        existing.name = newer.name;
    }
    replace_if_some(&mut existing.place_id, newer.place_id);
    replace_if_some(&mut existing.category, newer.category);
    replace_if_some(&mut existing.description, newer.description);
    replace_if_some(&mut existing.url, newer.url);
    if let Some((lat, lng)) = coordinates {
        existing.lat = Some(lat);
        existing.lng = Some(lng);
    }
    replace_if_some(&mut existing.recent_visitors, newer.recent_visitors);
    replace_if_some(&mut existing.county, newer.county);
    replace_if_some(&mut existing.city, newer.city);
    replace_if_some(&mut existing.image_url, newer.image_url);
    replace_if_some(&mut existing.permanently_closed, newer.permanently_closed);
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::io;

    use super::*;

    struct MemoryFetcher {
        documents: HashMap<String, String>,
    }

    impl MemoryFetcher {
        fn new(documents: &[(&str, &str)]) -> Self {
            MemoryFetcher {
                documents: documents
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
            }
        }
    }

    impl DocumentFetcher for MemoryFetcher {
        async fn fetch(&self, location: &str) -> Result<PlaceDocument, FetchError> {
            let body = self
                .documents
                .get(location)
                .ok_or_else(|| FetchError::Io {
                    location: location.to_owned(),
                    source: io::Error::from(io::ErrorKind::NotFound),
                })?;
            serde_json::from_str(body).map_err(|source| FetchError::Parse {
                location: location.to_owned(),
                source,
            })
        }
    }

    fn place(place_id: &str, name: &str) -> Place {
        Place {
            place_id: (!place_id.is_empty()).then(|| place_id.to_owned()),
            name: name.to_owned(),
            ..Default::default()
        }
    }

    fn at(mut place: Place, lat: f64, lng: f64) -> Place {
        place.lat = Some(lat);
        place.lng = Some(lng);
        place
    }

    fn identities(places: &[Place]) -> HashSet<String> {
        places
            .iter()
            .map(|p| p.place_id.clone().unwrap_or_else(|| p.name.clone()))
            .collect()
    }

    #[test]
    fn merge_overlays_fields_instead_of_replacing_records() {
        let mut merger = PlaceMerger::default();
        merger.add("A", at(place("p1", "Shop"), 25.03, 121.56));
        let mut food = place("p1", "Shop");
        food.category = Some("food".into());
        merger.add("B", food);

        let places = merger.into_places();
        assert_eq!(places.len(), 1);
        assert_eq!(places[0].source.as_deref(), Some("A · B"));
        assert_eq!(places[0].category.as_deref(), Some("food"));
        // B carried no coordinates, so A's survive.
        assert_eq!(places[0].coordinates(), Some((25.03, 121.56)));
    }

    #[test]
    fn later_source_wins_on_conflicting_fields() {
        let mut a = place("p1", "Old name");
        a.description = Some("from A".into());
        let mut b = place("p1", "New name");
        b.description = Some("from B".into());

        let mut merger = PlaceMerger::default();
        merger.add("A", a.clone());
        merger.add("B", b.clone());
        assert_eq!(merger.into_places()[0].description.as_deref(), Some("from B"));

        let mut merger = PlaceMerger::default();
        merger.add("B", b);
        merger.add("A", a);
        let places = merger.into_places();
        assert_eq!(places[0].description.as_deref(), Some("from A"));
        assert_eq!(places[0].name, "Old name");
        assert_eq!(places[0].source.as_deref(), Some("B · A"));
    }

    #[test]
    fn matches_on_rounded_coordinates() {
        let mut merger = PlaceMerger::default();
        merger.add("A", at(place("", "Noodles"), 25.033_01, 121.564_99));
        merger.add("B", at(place("", "Noodle House"), 25.033_04, 121.565_02));
        merger.add("B", at(place("", "Elsewhere"), 25.1, 121.5));

        let places = merger.into_places();
        assert_eq!(places.len(), 2);
        assert_eq!(places[0].name, "Noodle House");
        assert_eq!(places[0].source.as_deref(), Some("A · B"));
        assert_eq!(places[1].source.as_deref(), Some("B"));
    }

    #[test]
    fn source_label_is_not_repeated_within_one_list() {
        let mut merger = PlaceMerger::default();
        merger.add("A", place("p1", "Shop"));
        merger.add("A", place("p1", "Shop"));
        assert_eq!(merger.into_places()[0].source.as_deref(), Some("A"));
    }

    #[test]
    fn merged_ids_are_unique_and_order_independent() {
        let a = vec![
            at(place("p1", "One"), 25.0, 121.0),
            place("p2", "Two"),
            at(place("", "Three"), 24.5, 120.5),
            place("", "Four"),
        ];
        let b = vec![
            place("p2", "Two again"),
            at(place("", "Three b"), 24.5, 120.5),
            place("", "Four"),
            place("p5", "Five"),
        ];

        let mut forward = PlaceMerger::default();
        forward.extend("A", a.clone());
        forward.extend("B", b.clone());
        let forward = forward.into_places();

        let mut backward = PlaceMerger::default();
        backward.extend("B", b);
        backward.extend("A", a);
        let backward = backward.into_places();

        assert_eq!(forward.len(), 5);
        assert_eq!(backward.len(), 5);
        let keys: Vec<_> = forward.iter().map(|p| p.id().to_owned()).collect();
        let unique: HashSet<_> = keys.iter().collect();
        assert_eq!(keys.len(), unique.len());
        assert_eq!(identities(&forward).len(), identities(&backward).len());
    }

    #[test]
    fn output_keeps_first_appearance_order() {
        let mut merger = PlaceMerger::default();
        merger.extend("A", vec![place("p2", "Two"), place("p1", "One")]);
        merger.extend("B", vec![place("p3", "Three"), place("p1", "One")]);
        let ids: Vec<_> = merger
            .into_places()
            .iter()
            .map(|p| p.id().to_owned())
            .collect();
        assert_eq!(ids, vec!["p2", "p1", "p3"]);
    }

    // Known limitation: two unrelated places with the same name and no id or
    // coordinates are folded together.
    #[test]
    fn same_name_without_signals_collapses() {
        let mut first = place("", "Lucky Noodles");
        first.city = Some("Taipei".into());
        let mut second = place("", "Lucky Noodles");
        second.city = Some("Tainan".into());

        let mut merger = PlaceMerger::default();
        merger.add("A", first);
        merger.add("B", second);
        let places = merger.into_places();
        assert_eq!(places.len(), 1);
        assert_eq!(places[0].city.as_deref(), Some("Tainan"));
    }

    #[test]
    fn name_matches_places_with_coordinates_in_either_order() {
        let mut merger = PlaceMerger::default();
        merger.add("A", at(place("", "Cafe"), 25.0, 121.0));
        merger.add("B", place("", "Cafe"));
        let places = merger.into_places();
        assert_eq!(places.len(), 1);
        assert_eq!(places[0].coordinates(), Some((25.0, 121.0)));

        let mut merger = PlaceMerger::default();
        merger.add("B", place("", "Cafe"));
        merger.add("A", at(place("", "Cafe"), 25.0, 121.0));
        assert_eq!(merger.into_places().len(), 1);
    }

    // Same name, no place id, far apart: ids must stay unique, so they fold.
    #[test]
    fn same_name_at_different_coordinates_keeps_ids_unique() {
        let mut merger = PlaceMerger::default();
        merger.add("A", at(place("", "Cafe"), 25.0, 121.0));
        merger.add("B", at(place("", "Cafe"), 22.0, 120.0));
        let places = merger.into_places();
        let ids: Vec<_> = places.iter().map(Place::id).collect();
        assert_eq!(ids, vec!["Cafe"]);
        assert_eq!(places[0].coordinates(), Some((22.0, 120.0)));
        assert_eq!(places[0].source.as_deref(), Some("A · B"));
    }

    #[test]
    fn zero_coordinates_are_not_an_identity() {
        let mut merger = PlaceMerger::default();
        merger.add("A", at(place("", "North"), 0.0, 0.0));
        merger.add("A", at(place("", "South"), 0.0, 0.0));
        let places = merger.into_places();
        assert_eq!(places.len(), 2);
        assert_eq!(coordinate_key(&places[0]), None);
        assert_eq!(places[1].coordinates(), None);
    }

    #[test]
    fn coordinates_are_recovered_from_map_links() {
        assert_eq!(
            coordinates_from_url("https://www.google.com/maps/place/x/@25.0330,121.5654,17z/data"),
            Some((25.033, 121.5654))
        );
        assert_eq!(coordinates_from_url("https://example.com/no-coords"), None);

        let mut island = place("i1", "Island");
        island.url = Some("https://maps.example/@22.05,121.55,12z".into());
        let mut merger = PlaceMerger::default();
        merger.add("Islands", island);
        assert_eq!(merger.into_places()[0].coordinates(), Some((22.05, 121.55)));
    }

    #[tokio::test]
    async fn load_merges_sources_in_priority_order() {
        let fetcher = MemoryFetcher::new(&[
            (
                "a.json",
                r#"{"title":"A","places":[{"place_id":"p1","name":"Shop","lat":25.03,"lng":121.56}]}"#,
            ),
            (
                "b.json",
                r#"{"title":"B","places":[{"place_id":"p1","name":"Shop","category":"food"},{"place_id":"p2","name":"Other"}]}"#,
            ),
        ]);
        let store = PlaceStore::new(
            fetcher,
            vec![PlaceSource::new("A", "a.json"), PlaceSource::new("B", "b.json")],
        );
        let places = store.load().await.unwrap();
        assert_eq!(places.len(), 2);
        assert_eq!(places[0].source.as_deref(), Some("A · B"));
        assert_eq!(places[0].category.as_deref(), Some("food"));
        assert_eq!(places[1].source.as_deref(), Some("B"));
    }

    #[tokio::test]
    async fn secondary_failure_is_an_empty_contribution() {
        let fetcher = MemoryFetcher::new(&[
            ("a.json", r#"{"title":"A","places":[{"place_id":"p1","name":"Shop"}]}"#),
            ("broken.json", "not json"),
        ]);
        let store = PlaceStore::new(
            fetcher,
            vec![
                PlaceSource::new("A", "a.json"),
                PlaceSource::new("Missing", "missing.json"),
                PlaceSource::new("Broken", "broken.json"),
            ],
        );
        let places = store.load().await.unwrap();
        assert_eq!(places.len(), 1);
        assert_eq!(places[0].source.as_deref(), Some("A"));
    }

    #[tokio::test]
    async fn primary_failure_fails_the_load() {
        let fetcher = MemoryFetcher::new(&[(
            "b.json",
            r#"{"title":"B","places":[{"place_id":"p1","name":"Shop"}]}"#,
        )]);
        let store = PlaceStore::new(
            fetcher,
            vec![PlaceSource::new("A", "a.json"), PlaceSource::new("B", "b.json")],
        );
        match store.load().await {
            Err(LoadError::Primary { label, source }) => {
                assert_eq!(label, "A");
                assert!(matches!(
                    source,
                    FetchError::Io { source: ref err, .. } if err.kind() == io::ErrorKind::NotFound
                ));
            }
            other => panic!("expected primary failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn no_sources_is_an_error() {
        let store = PlaceStore::new(MemoryFetcher::new(&[]), Vec::new());
        assert!(matches!(store.load().await, Err(LoadError::NoSources)));
    }

    #[tokio::test]
    async fn file_fetcher_reads_from_data_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("gluttony.json"),
            r#"{"title":"G","places":[{"place_id":"p1","name":"Shop","lat":"25.1","lng":"121.2"}]}"#,
        )
        .unwrap();
        let fetcher = FileFetcher::new(dir.path());
        let document = fetcher.fetch("/gluttony.json").await.unwrap();
        assert_eq!(document.title, "G");
        assert_eq!(document.places[0].coordinates(), Some((25.1, 121.2)));
        assert!(matches!(
            fetcher.fetch("absent.json").await,
            Err(FetchError::Io { .. })
        ));
    }

    #[test]
    fn http_fetcher_resolves_relative_locations() {
        let fetcher = HttpFetcher::new("https://example.com/byw-mit/", Duration::from_secs(1)).unwrap();
        assert_eq!(
            fetcher.resolve("/gluttony.json"),
            "https://example.com/byw-mit/gluttony.json"
        );
        assert_eq!(
            fetcher.resolve("https://cdn.example.com/x.json"),
            "https://cdn.example.com/x.json"
        );
    }
}
