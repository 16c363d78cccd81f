//! Online feature retrieval core: feature view projections and the online store
//! abstraction that serves materialized feature values.

pub mod config;
pub mod error;
pub mod feast;
pub mod key_serialization;
pub mod model;
pub mod onlinestore;
mod util;

pub use error::OnlineStoreError;
pub use model::{FeatureDatum, FeatureGroup, FeatureReference, FeatureView};
pub use onlinestore::{OnlineStore, OnlineStoreFactory, OnlineStoreRegistry, get_online_store};
