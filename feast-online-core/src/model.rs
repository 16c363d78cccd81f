use crate::feast::core::FeatureView as FeatureViewProto;
use crate::feast::types::value::Val;
use crate::feast::types::{EntityKey, Value};
use crate::util::prost_duration_to_duration;
use anyhow::{Context, Error, Result, anyhow};
use chrono::{DateTime, Duration, Utc};
use prost::Message;
use rustc_hash::FxHashSet as HashSet;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Entity name every entity-less feature view is keyed by.
pub const DUMMY_ENTITY_NAME: &str = "__dummy";
/// Join key carried on the wire for the dummy entity.
pub const DUMMY_ENTITY_ID: &str = "__dummy_id";
pub const DUMMY_ENTITY_VAL: &str = "";

pub fn dummy_entity_value() -> Value {
    Value {
        val: Some(Val::StringVal(DUMMY_ENTITY_VAL.to_string())),
    }
}

/// Entity key used to look up rows of entity-less feature views.
pub fn dummy_entity_key() -> EntityKey {
    EntityKey {
        join_keys: vec![DUMMY_ENTITY_ID.to_string()],
        entity_values: vec![dummy_entity_value()],
    }
}

/// Named, ordered list of features sharing a materialization source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeatureGroup {
    pub name: Arc<str>,
    pub features: Vec<String>,
}

impl FeatureGroup {
    pub fn new<I, S>(name: impl Into<Arc<str>>, features: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            features: features.into_iter().map(Into::into).collect(),
        }
    }
}

/// Feature group together with its freshness window and entity key set.
///
/// Views are immutable: `with_features` and `with_group` build new views that
/// share the ttl and entity set of the source view.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureView {
    group: Arc<FeatureGroup>,
    ttl: Duration,
    entity_keys: Arc<HashSet<String>>,
}

impl FeatureView {
    /// Builds a view keyed by `entity_names`. An empty list keys the view by the
    /// dummy entity.
    pub fn new<I, S>(group: FeatureGroup, ttl: Duration, entity_names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut entity_keys: HashSet<String> = entity_names.into_iter().map(Into::into).collect();
        if entity_keys.is_empty() {
            entity_keys.insert(DUMMY_ENTITY_NAME.to_string());
        }
        Self {
            group: Arc::new(group),
            ttl: ttl.max(Duration::zero()),
            entity_keys: Arc::new(entity_keys),
        }
    }

    /// Projects the view onto `features`, keeping name, ttl and entity keys.
    pub fn with_features<I, S>(&self, features: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.with_group(FeatureGroup::new(self.group.name.clone(), features))
    }

    pub fn with_group(&self, group: FeatureGroup) -> Self {
        Self {
            group: Arc::new(group),
            ttl: self.ttl,
            entity_keys: Arc::clone(&self.entity_keys),
        }
    }

    pub fn name(&self) -> &str {
        &self.group.name
    }

    pub fn features(&self) -> &[String] {
        &self.group.features
    }

    pub fn group(&self) -> &FeatureGroup {
        &self.group
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn entity_keys(&self) -> &HashSet<String> {
        &self.entity_keys
    }

    pub fn is_entity_less(&self) -> bool {
        self.entity_keys.len() == 1 && self.entity_keys.contains(DUMMY_ENTITY_NAME)
    }

    pub fn feature_references(&self) -> Vec<FeatureReference> {
        self.group
            .features
            .iter()
            .map(|feature| FeatureReference::new(self.group.name.clone(), feature.as_str()))
            .collect()
    }

    /// Zero ttl never expires, nor does a window reaching past the end of time.
    pub fn is_expired(&self, event_ts: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        if self.ttl.is_zero() {
            return false;
        }
        match event_ts.checked_add_signed(self.ttl) {
            Some(expiry) => now > expiry,
            None => false,
        }
    }

    pub fn status_of(&self, datum: &FeatureDatum, now: DateTime<Utc>) -> FeatureStatus {
        match &datum.value.val {
            None => FeatureStatus::NotFound,
            Some(Val::NullVal(_)) => FeatureStatus::NullValue,
            Some(_) if self.is_expired(datum.event_ts, now) => FeatureStatus::OutsideMaxAge,
            Some(_) => FeatureStatus::Present,
        }
    }
}

impl TryFrom<FeatureViewProto> for FeatureView {
    type Error = Error;

    fn try_from(feature_view_proto: FeatureViewProto) -> Result<Self> {
        let spec = feature_view_proto
            .spec
            .ok_or(anyhow!("Missing feature view spec"))?;
        let ttl = match spec.ttl.as_ref() {
            Some(ttl) => prost_duration_to_duration(ttl)
                .with_context(|| format!("Invalid ttl of feature view {}", spec.name))?,
            None => Duration::zero(),
        };
        let group = FeatureGroup::new(
            spec.name,
            spec.features.into_iter().map(|feature| feature.name),
        );
        Ok(FeatureView::new(group, ttl, spec.entities))
    }
}

impl TryFrom<Vec<u8>> for FeatureView {
    type Error = Error;

    fn try_from(value: Vec<u8>) -> Result<Self> {
        let proto = FeatureViewProto::decode(value.as_slice())?;
        FeatureView::try_from(proto)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FeatureReference {
    pub feature_view_name: Arc<str>,
    pub feature_name: Arc<str>,
}

impl FeatureReference {
    pub fn new(feature_view_name: impl Into<Arc<str>>, feature_name: impl Into<Arc<str>>) -> Self {
        Self {
            feature_view_name: feature_view_name.into(),
            feature_name: feature_name.into(),
        }
    }

    pub fn full_name(&self) -> String {
        format!("{}__{}", self.feature_view_name, self.feature_name)
    }
}

impl fmt::Display for FeatureReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.feature_view_name, self.feature_name)
    }
}

impl TryFrom<&str> for FeatureReference {
    type Error = Error;

    fn try_from(s: &str) -> Result<Self> {
        match s.split_once(':') {
            Some((view, feature)) if !view.is_empty() && !feature.is_empty() => {
                Ok(Self::new(view, feature))
            }
            _ => Err(anyhow!(
                "Invalid feature reference '{}', expected <feature_view>:<feature>",
                s
            )),
        }
    }
}

/// Result of one (entity, feature) lookup.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureDatum {
    pub reference: FeatureReference,
    pub event_ts: DateTime<Utc>,
    pub value: Value,
}

impl FeatureDatum {
    pub fn new(reference: FeatureReference, event_ts: DateTime<Utc>, value: Value) -> Self {
        Self {
            reference,
            event_ts,
            value,
        }
    }

    /// Placeholder for a feature with no materialized value.
    pub fn absent(reference: FeatureReference) -> Self {
        Self {
            reference,
            event_ts: DateTime::<Utc>::UNIX_EPOCH,
            value: Value::default(),
        }
    }

    pub fn is_absent(&self) -> bool {
        self.value.val.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FeatureStatus {
    Present,
    NullValue,
    NotFound,
    OutsideMaxAge,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feast::core::{FeatureSpecV2, FeatureViewSpec};

    fn driver_stats() -> FeatureView {
        FeatureView::new(
            FeatureGroup::new("driver_stats", ["conv_rate", "acc_rate"]),
            Duration::seconds(3600),
            ["driver_id"],
        )
    }

    fn names(view: &FeatureView) -> Vec<&str> {
        let mut names: Vec<&str> = view.entity_keys().iter().map(String::as_str).collect();
        names.sort();
        names
    }

    #[test]
    fn declared_entities_key_the_view() {
        let view = driver_stats();
        assert_eq!(names(&view), vec!["driver_id"]);
        assert!(!view.is_entity_less());
        assert_eq!(view.ttl(), Duration::seconds(3600));
    }

    #[test]
    fn duplicate_entities_collapse() {
        let view = FeatureView::new(
            FeatureGroup::new("trips", ["count"]),
            Duration::zero(),
            ["rider_id", "driver_id", "rider_id"],
        );
        assert_eq!(names(&view), vec!["driver_id", "rider_id"]);
    }

    #[test]
    fn empty_entities_use_dummy_entity() {
        let view = FeatureView::new(
            FeatureGroup::new("global_stats", ["total_requests"]),
            Duration::zero(),
            Vec::<String>::new(),
        );
        assert_eq!(names(&view), vec![DUMMY_ENTITY_NAME]);
        assert!(view.is_entity_less());
    }

    #[test]
    fn derived_view_leaves_source_untouched() {
        let view = driver_stats();
        let derived = view.with_features(["acc_rate"]);

        assert_eq!(view.features(), ["conv_rate", "acc_rate"]);
        assert_eq!(view.ttl(), Duration::seconds(3600));
        assert_eq!(names(&view), vec!["driver_id"]);

        assert_eq!(derived.name(), "driver_stats");
        assert_eq!(derived.features(), ["acc_rate"]);
        assert_eq!(derived.ttl(), view.ttl());
        assert_eq!(derived.entity_keys(), view.entity_keys());
        assert!(Arc::ptr_eq(&derived.entity_keys, &view.entity_keys));
    }

    #[test]
    fn derived_views_are_shared_across_threads() {
        let view = Arc::new(driver_stats());
        let handles: Vec<_> = (0..4)
            .map(|i| {
                let view = Arc::clone(&view);
                std::thread::spawn(move || {
                    let derived = view.with_features([format!("feature_{}", i)]);
                    derived.entity_keys().contains("driver_id") && derived.features().len() == 1
                })
            })
            .collect();
        for handle in handles {
            assert!(handle.join().unwrap());
        }
        assert_eq!(view.features().len(), 2);
    }

    #[test]
    fn from_proto_applies_dummy_entity() -> Result<()> {
        let proto = FeatureViewProto {
            spec: Some(FeatureViewSpec {
                name: "global_stats".to_string(),
                project: "demo".to_string(),
                entities: vec![],
                features: vec![FeatureSpecV2 {
                    name: "total_requests".to_string(),
                    value_type: 4,
                }],
                ttl: Some(prost_types::Duration {
                    seconds: 60,
                    nanos: 0,
                }),
            }),
        };
        let view = FeatureView::try_from(proto.encode_to_vec())?;
        assert_eq!(view.name(), "global_stats");
        assert_eq!(view.features(), ["total_requests"]);
        assert_eq!(view.ttl(), Duration::seconds(60));
        assert!(view.is_entity_less());
        Ok(())
    }

    #[test]
    fn from_proto_without_spec_fails() {
        assert!(FeatureView::try_from(FeatureViewProto { spec: None }).is_err());
    }

    #[test]
    fn staleness_follows_ttl() {
        let view = driver_stats();
        let now = Utc::now();
        let reference = FeatureReference::new("driver_stats", "conv_rate");
        let value = Value {
            val: Some(Val::DoubleVal(0.5)),
        };

        let fresh = FeatureDatum::new(reference.clone(), now - Duration::seconds(10), value.clone());
        let stale = FeatureDatum::new(reference.clone(), now - Duration::hours(2), value);
        assert_eq!(view.status_of(&fresh, now), FeatureStatus::Present);
        assert_eq!(view.status_of(&stale, now), FeatureStatus::OutsideMaxAge);
        assert_eq!(
            view.status_of(&FeatureDatum::absent(reference.clone()), now),
            FeatureStatus::NotFound
        );

        let unbounded = FeatureView::new(view.group().clone(), Duration::zero(), ["driver_id"]);
        assert_eq!(unbounded.status_of(&stale, now), FeatureStatus::Present);
    }

    #[test]
    fn staleness_boundary_is_inclusive() {
        let view = driver_stats();
        let now = Utc::now();
        let value = Value {
            val: Some(Val::DoubleVal(0.5)),
        };
        let reference = FeatureReference::new("driver_stats", "conv_rate");
        let at_edge = FeatureDatum::new(reference.clone(), now - view.ttl(), value.clone());
        let past_edge = FeatureDatum::new(
            reference,
            now - view.ttl() - Duration::nanoseconds(1),
            value,
        );
        assert_eq!(view.status_of(&at_edge, now), FeatureStatus::Present);
        assert_eq!(view.status_of(&past_edge, now), FeatureStatus::OutsideMaxAge);
    }

    #[test]
    fn null_value_has_own_status() {
        let view = driver_stats();
        let now = Utc::now();
        let null = FeatureDatum::new(
            FeatureReference::new("driver_stats", "conv_rate"),
            now - Duration::hours(5),
            Value {
                val: Some(Val::NullVal(0)),
            },
        );
        assert_eq!(view.status_of(&null, now), FeatureStatus::NullValue);
    }

    #[test]
    fn huge_ttl_never_expires() {
        let view = FeatureView::new(
            driver_stats().group().clone(),
            Duration::days(999_999_999),
            ["driver_id"],
        );
        let now = Utc::now();
        let datum = FeatureDatum::new(
            FeatureReference::new("driver_stats", "conv_rate"),
            now - Duration::days(3650),
            Value {
                val: Some(Val::Int64Val(1)),
            },
        );
        assert_eq!(view.status_of(&datum, now), FeatureStatus::Present);
        assert!(!view.is_expired(DateTime::<Utc>::MAX_UTC - Duration::days(1), now));
    }

    #[test]
    fn from_proto_rejects_out_of_range_ttl() {
        let proto = FeatureViewProto {
            spec: Some(FeatureViewSpec {
                name: "driver_stats".to_string(),
                ttl: Some(prost_types::Duration {
                    seconds: i64::MAX,
                    nanos: 0,
                }),
                ..Default::default()
            }),
        };
        assert!(FeatureView::try_from(proto).is_err());
    }

    #[test]
    fn parse_feature_reference() -> Result<()> {
        let reference = FeatureReference::try_from("driver_stats:conv_rate")?;
        assert_eq!(reference, FeatureReference::new("driver_stats", "conv_rate"));
        assert_eq!(reference.full_name(), "driver_stats__conv_rate");
        assert_eq!(reference.to_string(), "driver_stats:conv_rate");
        assert!(FeatureReference::try_from("conv_rate").is_err());
        assert!(FeatureReference::try_from(":conv_rate").is_err());
        Ok(())
    }

    #[test]
    fn absent_datum_has_epoch_timestamp() {
        let datum = FeatureDatum::absent(FeatureReference::new("driver_stats", "acc_rate"));
        assert!(datum.is_absent());
        assert_eq!(datum.event_ts, DateTime::<Utc>::UNIX_EPOCH);
    }

    #[test]
    fn dummy_key_uses_wire_join_key() {
        let key = dummy_entity_key();
        assert_eq!(key.join_keys, vec![DUMMY_ENTITY_ID.to_string()]);
        assert_eq!(key.entity_values, vec![dummy_entity_value()]);
    }
}
