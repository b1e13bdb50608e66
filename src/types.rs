use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize};

/// Separator placed between source labels when a place appears in several lists.
pub const SOURCE_SEPARATOR: &str = " · ";

/// A place list document as published next to the site, `{ title, places }`.
#[derive(Default, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaceDocument {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub places: Vec<Place>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extracted_at: Option<String>,
}

#[derive(Default, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Place {
    #[serde(default, deserialize_with = "blank_as_none")]
    pub place_id: Option<String>,
    #[serde(default)]
    pub name: String,
    #[serde(default, deserialize_with = "blank_as_none")]
    pub category: Option<String>,
    #[serde(default, deserialize_with = "blank_as_none")]
    pub description: Option<String>,
    #[serde(default, deserialize_with = "blank_as_none")]
    pub url: Option<String>,
    #[serde(default, deserialize_with = "coordinate")]
    pub lat: Option<f64>,
    #[serde(default, deserialize_with = "coordinate")]
    pub lng: Option<f64>,
    #[serde(default, deserialize_with = "blank_as_none")]
    pub recent_visitors: Option<String>,
    #[serde(default, deserialize_with = "blank_as_none")]
    pub county: Option<String>,
    #[serde(default, deserialize_with = "blank_as_none")]
    pub city: Option<String>,
    #[serde(default, deserialize_with = "blank_as_none")]
    pub image_url: Option<String>,
    #[serde(default)]
    pub permanently_closed: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

impl Place {
    /// Stable identifier: the place id when there is one, otherwise the name.
    pub fn id(&self) -> &str {
        self.place_id.as_deref().unwrap_or(&self.name)
    }

    /// Both coordinates, or nothing when the place is unresolved. Zero counts as unresolved.
    pub fn coordinates(&self) -> Option<(f64, f64)> {
        match (self.lat, self.lng) {
            (Some(lat), Some(lng)) if is_resolved(lat) && is_resolved(lng) => Some((lat, lng)),
            _ => None,
        }
    }

    /// Source labels this place has been seen in, in order of arrival.
    pub fn sources(&self) -> impl Iterator<Item = &str> {
        self.source
            .as_deref()
            .unwrap_or("")
            .split(SOURCE_SEPARATOR)
            .filter(|label| !label.is_empty())
    }

    /// Record `label` as a source unless it is already listed.
    pub fn add_source(&mut self, label: &str) {
        if self.sources().any(|existing| existing == label) {
            return;
        }
        self.source = Some(match self.source.take() {
            Some(existing) if !existing.is_empty() => {
                format!("{existing}{SOURCE_SEPARATOR}{label}")
            }
            _ => label.to_owned(),
        });
    }
}

/// Per-place user state.
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    #[default]
    None,
    Want,
    Visited,
    Like,
    Dislike,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::None => "none",
            Status::Want => "want",
            Status::Visited => "visited",
            Status::Like => "like",
            Status::Dislike => "dislike",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Status {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "none" | "" => Ok(Status::None),
            "want" => Ok(Status::Want),
            "visited" => Ok(Status::Visited),
            "like" => Ok(Status::Like),
            "dislike" => Ok(Status::Dislike),
            other => Err(format!(
                "unknown status '{other}', expected one of none, want, visited, like, dislike"
            )),
        }
    }
}

/// A place with its `recent_visitors` text parsed once up front.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessedPlace {
    pub place: Place,
    pub visitor_set: HashSet<String>,
    pub visitors: Vec<String>,
    pub visitor_count: usize,
}

/// A visited place that contributed to a recommendation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SimilarShop {
    pub visited_id: String,
    pub visited_name: String,
    pub similarity: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecommendedPlace {
    pub place: ProcessedPlace,
    pub cf_score: f64,
    pub similar_to: Vec<SimilarShop>,
}

fn is_resolved(value: f64) -> bool {
    value.is_finite() && value != 0.0
}

fn blank_as_none<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<String>::deserialize(deserializer)?;
    Ok(value
        .map(|s| s.trim().to_owned())
        .filter(|s| !s.is_empty()))
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawCoordinate {
    Number(f64),
    Text(String),
}

// Lists store coordinates either as numbers or as numeric strings; 0 means unresolved.
fn coordinate<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = match Option::<RawCoordinate>::deserialize(deserializer)? {
        Some(RawCoordinate::Number(v)) => Some(v),
        Some(RawCoordinate::Text(s)) => s.trim().parse::<f64>().ok(),
        None => None,
    };
    Ok(value.filter(|v| is_resolved(*v)))
}
