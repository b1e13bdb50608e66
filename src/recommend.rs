use std::collections::HashSet;

use rand::seq::SliceRandom;
use rand::Rng;

use crate::types::{Place, ProcessedPlace, RecommendedPlace};

pub const MAX_RECOMMENDATIONS: usize = 10;

/// Parse each place's `recent_visitors` once so recommendation calls don't.
pub fn preprocess_places(places: &[Place]) -> Vec<ProcessedPlace> {
    places
        .iter()
        .map(|place| {
            let visitors: Vec<String> = place
                .recent_visitors
                .as_deref()
                .unwrap_or("")
                .split(',')
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_owned)
                .collect();
            let visitor_set: HashSet<String> = visitors.iter().cloned().collect();
            ProcessedPlace {
                place: place.clone(),
                visitor_count: visitors.len(),
                visitor_set,
                visitors,
            }
        })
        .collect()
}

/// Up to [`MAX_RECOMMENDATIONS`] random places whose ids are not in `excluded`.
///
/// There is no visit history to score against yet, so every result carries a
/// zero score and no similar places.
pub fn recommend<R: Rng + ?Sized>(
    places: &[ProcessedPlace],
    excluded: &HashSet<String>,
    rng: &mut R,
) -> Vec<RecommendedPlace> {
    let mut candidates: Vec<&ProcessedPlace> = places
        .iter()
        .filter(|p| !excluded.contains(p.place.id()))
        .collect();
    candidates.shuffle(rng);
    candidates
        .into_iter()
        .take(MAX_RECOMMENDATIONS)
        .map(|p| RecommendedPlace {
            place: p.clone(),
            cf_score: 0.0,
            similar_to: Vec::new(),
        })
        .collect()
}
