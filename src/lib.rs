//! Place directory engine: merges place lists, tracks visit status and
//! recommends somewhere new.

pub mod config;
pub mod error;
pub mod geojson;
pub mod map;
pub mod places;
pub mod recommend;
pub mod store;
pub mod types;
