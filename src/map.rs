use std::collections::{HashMap, HashSet};

use tracing::debug;

use crate::types::{Place, Status};

/// Id of the marker showing the user's own position. Reconciliation never prunes it.
pub const CURRENT_LOCATION_ID: &str = "current-location";

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MapBounds {
    pub north: f64,
    pub south: f64,
    pub east: f64,
    pub west: f64,
}

impl MapBounds {
    pub fn contains(&self, lat: f64, lng: f64) -> bool {
        lat <= self.north && lat >= self.south && lng <= self.east && lng >= self.west
    }

    /// Smallest box around every point, or `None` for no points.
    pub fn around(points: impl IntoIterator<Item = (f64, f64)>) -> Option<Self> {
        points.into_iter().fold(None, |bounds, (lat, lng)| {
            Some(match bounds {
                None => MapBounds {
                    north: lat,
                    south: lat,
                    east: lng,
                    west: lng,
                },
                Some(b) => MapBounds {
                    north: b.north.max(lat),
                    south: b.south.min(lat),
                    east: b.east.max(lng),
                    west: b.west.min(lng),
                },
            })
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MarkerIcon {
    Default,
    Want,
    Visited,
    Like,
    Dislike,
    CurrentLocation,
}

impl MarkerIcon {
    pub fn for_status(status: Status) -> Self {
        match status {
            Status::None => MarkerIcon::Default,
            Status::Want => MarkerIcon::Want,
            Status::Visited => MarkerIcon::Visited,
            Status::Like => MarkerIcon::Like,
            Status::Dislike => MarkerIcon::Dislike,
        }
    }

    pub fn color(&self) -> &'static str {
        match self {
            MarkerIcon::Default => "blue",
            MarkerIcon::Want => "gold",
            MarkerIcon::Visited => "green",
            MarkerIcon::Like => "red",
            MarkerIcon::Dislike => "grey",
            MarkerIcon::CurrentLocation => "#007bff",
        }
    }
}

/// Events a backend reports back to the view.
#[derive(Debug, Clone, PartialEq)]
pub enum MapEvent {
    MoveEnd,
    PopupOpen(String),
    PopupClose,
}

/// What the view needs from a mapping library.
pub trait MapBackend {
    type Marker;

    fn create_map(&mut self, center: (f64, f64), zoom: u8);
    fn set_view(&mut self, center: (f64, f64), zoom: u8);
    fn fit_bounds(&mut self, bounds: MapBounds);
    fn add_marker(
        &mut self,
        id: &str,
        position: (f64, f64),
        icon: MarkerIcon,
        popup: &str,
    ) -> Self::Marker;
    fn remove_marker(&mut self, marker: Self::Marker);
    fn set_icon(&mut self, marker: &Self::Marker, icon: MarkerIcon);
    fn bind_popup(&mut self, marker: &Self::Marker, popup: &str);
    fn open_popup(&mut self, marker: &Self::Marker);
    fn bounds(&self) -> MapBounds;
    fn center(&self) -> (f64, f64);
    fn invalidate_size(&mut self);
}

struct MarkerEntry<M> {
    marker: M,
    icon: MarkerIcon,
}

/// Counts of what one reconciliation pass changed.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MarkerChanges {
    pub added: usize,
    pub updated: usize,
    pub removed: usize,
}

impl MarkerChanges {
    pub fn is_empty(&self) -> bool {
        self.added == 0 && self.updated == 0 && self.removed == 0
    }
}

type MoveEndCallback = Box<dyn FnMut(MapBounds)>;
type FocusCallback = Box<dyn FnMut(Option<&str>)>;

/// Keeps a marker per place in sync with a [`MapBackend`].
pub struct MapView<B: MapBackend> {
    backend: B,
    initialized: bool,
    markers: HashMap<String, MarkerEntry<B::Marker>>,
    on_move_end: Option<MoveEndCallback>,
    on_focus: Option<FocusCallback>,
}

impl<B: MapBackend> MapView<B> {
    pub fn new(backend: B) -> Self {
        MapView {
            backend,
            initialized: false,
            markers: HashMap::new(),
            on_move_end: None,
            on_focus: None,
        }
    }

    /// Create the map. Calling it again is a no-op.
    pub fn init(&mut self, center: (f64, f64), zoom: u8) {
        if self.initialized {
            return;
        }
        self.backend.create_map(center, zoom);
        self.initialized = true;
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn marker_count(&self) -> usize {
        self.markers.len()
    }

    pub fn has_marker(&self, id: &str) -> bool {
        self.markers.contains_key(id)
    }

    pub fn marker_icon(&self, id: &str) -> Option<MarkerIcon> {
        self.markers.get(id).map(|entry| entry.icon)
    }

    pub fn set_view(&mut self, center: (f64, f64), zoom: u8) {
        if self.initialized {
            self.backend.set_view(center, zoom);
        }
    }

    pub fn fit_bounds(&mut self, bounds: MapBounds) {
        if self.initialized {
            self.backend.fit_bounds(bounds);
        }
    }

    /// Fit the viewport around every place that has coordinates.
    pub fn fit_places(&mut self, places: &[Place]) {
        if let Some(bounds) = MapBounds::around(places.iter().filter_map(Place::coordinates)) {
            self.fit_bounds(bounds);
        }
    }

    pub fn bounds(&self) -> Option<MapBounds> {
        self.initialized.then(|| self.backend.bounds())
    }

    pub fn center(&self) -> Option<(f64, f64)> {
        self.initialized.then(|| self.backend.center())
    }

    pub fn invalidate_size(&mut self) {
        if self.initialized {
            self.backend.invalidate_size();
        }
    }

    pub fn on_move_end(&mut self, callback: impl FnMut(MapBounds) + 'static) {
        self.on_move_end = Some(Box::new(callback));
    }

    pub fn on_focus(&mut self, callback: impl FnMut(Option<&str>) + 'static) {
        self.on_focus = Some(Box::new(callback));
    }

    /// Route an event from the backend to the registered callbacks.
    pub fn handle_event(&mut self, event: MapEvent) {
        if !self.initialized {
            return;
        }
        match event {
            MapEvent::MoveEnd => {
                let bounds = self.backend.bounds();
                if let Some(callback) = self.on_move_end.as_mut() {
                    callback(bounds);
                }
            }
            MapEvent::PopupOpen(id) => {
                if id == CURRENT_LOCATION_ID || !self.markers.contains_key(&id) {
                    return;
                }
                if let Some(callback) = self.on_focus.as_mut() {
                    callback(Some(id.as_str()));
                }
            }
            MapEvent::PopupClose => {
                if let Some(callback) = self.on_focus.as_mut() {
                    callback(None);
                }
            }
        }
    }

    /// Reconcile markers against `places`.
    ///
    /// Markers for vanished ids go, new ids get a marker, and a marker whose
    /// status icon changed gets the new icon and popup. Everything else is
    /// left alone, so repeating a call with the same input changes nothing.
    pub fn update_markers(
        &mut self,
        places: &[Place],
        statuses: &HashMap<String, Status>,
    ) -> MarkerChanges {
        let mut changes = MarkerChanges::default();
        if !self.initialized {
            return changes;
        }

        let wanted: HashSet<&str> = places.iter().map(Place::id).collect();
        let stale: Vec<String> = self
            .markers
            .keys()
            .filter(|id| id.as_str() != CURRENT_LOCATION_ID && !wanted.contains(id.as_str()))
            .cloned()
            .collect();
        for id in stale {
            if let Some(entry) = self.markers.remove(&id) {
                self.backend.remove_marker(entry.marker);
                changes.removed += 1;
            }
        }

        for place in places {
            let Some(position) = place.coordinates() else {
                continue;
            };
            let status = statuses.get(place.id()).copied().unwrap_or_default();
            let icon = MarkerIcon::for_status(status);
            match self.markers.get_mut(place.id()) {
                Some(entry) if entry.icon == icon => {}
                Some(entry) => {
                    self.backend.set_icon(&entry.marker, icon);
                    self.backend.bind_popup(&entry.marker, &popup_content(place, status));
                    entry.icon = icon;
                    changes.updated += 1;
                }
                None => {
                    let marker = self.backend.add_marker(
                        place.id(),
                        position,
                        icon,
                        &popup_content(place, status),
                    );
                    self.markers
                        .insert(place.id().to_owned(), MarkerEntry { marker, icon });
                    changes.added += 1;
                }
            }
        }

        if !changes.is_empty() {
            debug!(
                added = changes.added,
                updated = changes.updated,
                removed = changes.removed,
                "reconciled markers"
            );
        }
        changes
    }

    /// Show the user's position, replacing any earlier one.
    pub fn add_current_location(&mut self, lat: f64, lng: f64) {
        if !self.initialized {
            return;
        }
        if let Some(entry) = self.markers.remove(CURRENT_LOCATION_ID) {
            self.backend.remove_marker(entry.marker);
        }
        let marker = self.backend.add_marker(
            CURRENT_LOCATION_ID,
            (lat, lng),
            MarkerIcon::CurrentLocation,
            "📍 你在這裡",
        );
        self.markers.insert(
            CURRENT_LOCATION_ID.to_owned(),
            MarkerEntry {
                marker,
                icon: MarkerIcon::CurrentLocation,
            },
        );
    }

    pub fn open_popup(&mut self, id: &str) {
        if let Some(entry) = self.markers.get(id) {
            self.backend.open_popup(&entry.marker);
        }
    }
}

pub fn status_label(status: Status) -> &'static str {
    match status {
        Status::None => "⬜ 未踩點",
        Status::Want => "📌 想去",
        Status::Visited => "✅ 已踩點",
        Status::Like => "👍 喜歡",
        Status::Dislike => "👎 不喜歡",
    }
}

pub fn popup_content(place: &Place, status: Status) -> String {
    format!(
        "<b>{}</b><br>{}<br>{}",
        escape_html(&place.name),
        escape_html(place.category.as_deref().unwrap_or("")),
        status_label(status)
    )
}

fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            c => escaped.push(c),
        }
    }
    escaped
}
