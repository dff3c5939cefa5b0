use geojson::{JsonObject, JsonValue};
use tracing::warn;

pub const FEATURE: &str = "Feature";
pub const FEATURE_COLLECTION: &str = "FeatureCollection";

/// How far nested feature collections are unwrapped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FlattenDepth {
    /// Unwrap collections in the top-level list only. Collections found
    /// inside them are reported and dropped.
    #[default]
    Single,
    /// Unwrap collections at any depth.
    Recursive,
}

/// The result of flattening a feature list.
#[derive(Debug, Default, PartialEq)]
pub struct Flattened {
    pub features: Vec<JsonObject>,
    /// Type labels of the dropped entries, in input order.
    pub unsupported: Vec<String>,
    /// Number of feature collections that were unwrapped.
    pub collections: usize,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum FlattenError {
    #[error("feature collection within entry {index} has no `features` array")]
    MalformedCollection { index: usize },
}

/// Outcome of [`rewrite_identifier`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rewrite {
    /// A `key: value` member was added to the properties.
    Applied { key: String, value: String },
    /// `id` already matched the first prefix.
    Unchanged,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RewriteError {
    #[error("feature has no `properties` object")]
    MissingProperties,
    #[error("properties have no `{0}` member")]
    MissingKey(&'static str),
    #[error("`prefix` is not an array")]
    PrefixNotSequence,
    #[error("`prefix` is empty")]
    EmptyPrefix,
}

enum Kind {
    Feature,
    Collection,
    Other,
}

fn kind_of(value: &JsonValue) -> Kind {
    match value.get("type").and_then(JsonValue::as_str) {
        Some(FEATURE) => Kind::Feature,
        Some(FEATURE_COLLECTION) => Kind::Collection,
        _ => Kind::Other,
    }
}

/// Printable form of an entry's `type` member, `null` when there is none.
pub fn type_label(value: &JsonValue) -> String {
    match value.get("type") {
        Some(JsonValue::String(kind)) => kind.clone(),
        Some(other) => other.to_string(),
        None => "null".to_string(),
    }
}

fn collection_children(collection: JsonValue) -> Option<Vec<JsonValue>> {
    match collection {
        JsonValue::Object(mut object) => match object.remove("features") {
            Some(JsonValue::Array(children)) => Some(children),
            _ => None,
        },
        _ => None,
    }
}

/// Replaces feature collections in `entries` with the features they hold.
///
/// Features keep their relative order and the children of a collection are
/// spliced in where the collection stood. Entries that are neither a
/// `Feature` nor a `FeatureCollection` are logged and dropped.
pub fn flatten(entries: Vec<JsonValue>, depth: FlattenDepth) -> Result<Flattened, FlattenError> {
    let mut flattened = Flattened::default();

    for (index, entry) in entries.into_iter().enumerate() {
        match kind_of(&entry) {
            Kind::Feature => flattened.push_feature(entry),
            Kind::Collection => {
                let children = collection_children(entry)
                    .ok_or(FlattenError::MalformedCollection { index })?;
                flattened.collections += 1;
                flattened.splice(children, depth, index)?;
            }
            Kind::Other => flattened.drop_unsupported(entry),
        }
    }

    Ok(flattened)
}

impl Flattened {
    fn push_feature(&mut self, feature: JsonValue) {
        if let JsonValue::Object(object) = feature {
            self.features.push(object);
        }
    }

    fn splice(
        &mut self,
        children: Vec<JsonValue>,
        depth: FlattenDepth,
        index: usize,
    ) -> Result<(), FlattenError> {
        for child in children {
            match (kind_of(&child), depth) {
                (Kind::Feature, _) => self.push_feature(child),
                (Kind::Collection, FlattenDepth::Recursive) => {
                    let nested = collection_children(child)
                        .ok_or(FlattenError::MalformedCollection { index })?;
                    self.collections += 1;
                    self.splice(nested, depth, index)?;
                }
                (Kind::Collection, FlattenDepth::Single) => {
                    warn!(index, feature = %child, "nested feature collection is not flattened, dropping it");
                    self.unsupported.push(FEATURE_COLLECTION.to_string());
                }
                (Kind::Other, _) => self.drop_unsupported(child),
            }
        }
        Ok(())
    }

    fn drop_unsupported(&mut self, entry: JsonValue) {
        let label = type_label(&entry);
        warn!(feature_type = %label, feature = %entry, "unsupported feature type");
        self.unsupported.push(label);
    }
}

/// Borrows the `properties` object of a feature.
pub fn feature_properties(feature: &mut JsonObject) -> Result<&mut JsonObject, RewriteError> {
    match feature.get_mut("properties") {
        Some(JsonValue::Object(properties)) => Ok(properties),
        _ => Err(RewriteError::MissingProperties),
    }
}

// Raw text for strings, JSON text for everything else
fn value_text(value: &JsonValue) -> String {
    match value {
        JsonValue::String(text) => text.clone(),
        other => other.to_string(),
    }
}

/// Adds `"<id>": "<id>_<prefix>"` to `properties` unless `id` equals the
/// first element of `prefix`.
///
/// `id` and `prefix` themselves are left alone.
pub fn rewrite_identifier(properties: &mut JsonObject) -> Result<Rewrite, RewriteError> {
    let id = properties.get("id").ok_or(RewriteError::MissingKey("id"))?;
    let prefix = match properties.get("prefix") {
        Some(JsonValue::Array(prefixes)) => prefixes.first().ok_or(RewriteError::EmptyPrefix)?,
        Some(_) => return Err(RewriteError::PrefixNotSequence),
        None => return Err(RewriteError::MissingKey("prefix")),
    };

    if id == prefix {
        return Ok(Rewrite::Unchanged);
    }

    let key = value_text(id);
    let value = format!("{key}_{}", value_text(prefix));
    properties.insert(key.clone(), JsonValue::String(value.clone()));

    Ok(Rewrite::Applied { key, value })
}

#[cfg(test)]
mod tests {
    use std::io;
    use std::sync::{Arc, Mutex};

    use serde_json::json;

    use super::*;

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Captured {
        fn text(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    // Runs `f` with log output going into the returned buffer
    fn capture_logs<T>(f: impl FnOnce() -> T) -> (T, String) {
        let captured = Captured::default();
        let writer = captured.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .finish();

        let result = tracing::subscriber::with_default(subscriber, f);
        (result, captured.text())
    }

    fn feature(id: &str) -> JsonValue {
        json!({"type": "Feature", "properties": {"id": id, "prefix": [id]}, "geometry": null})
    }

    fn ids(flattened: &Flattened) -> Vec<&str> {
        flattened
            .features
            .iter()
            .map(|f| f["properties"]["id"].as_str().unwrap())
            .collect()
    }

    fn properties(value: JsonValue) -> JsonObject {
        match value {
            JsonValue::Object(object) => object,
            other => panic!("expected an object, got {other}"),
        }
    }

    #[test]
    fn flat_input_is_unchanged() {
        let entries = vec![feature("A"), feature("B"), feature("C")];
        let flattened = flatten(entries.clone(), FlattenDepth::Single).unwrap();

        let features: Vec<JsonValue> = flattened.features.into_iter().map(JsonValue::Object).collect();
        assert_eq!(features, entries);
        assert!(flattened.unsupported.is_empty());
        assert_eq!(flattened.collections, 0);
    }

    #[test]
    fn collection_children_are_spliced_in_place() {
        let entries = vec![
            feature("A"),
            json!({"type": "FeatureCollection", "features": [feature("B"), feature("C")]}),
            feature("D"),
        ];
        let flattened = flatten(entries, FlattenDepth::Single).unwrap();

        assert_eq!(ids(&flattened), ["A", "B", "C", "D"]);
        assert_eq!(flattened.collections, 1);
    }

    #[test]
    fn empty_collection_contributes_nothing() {
        let entries = vec![
            json!({"type": "FeatureCollection", "features": []}),
            feature("A"),
        ];
        let flattened = flatten(entries, FlattenDepth::Single).unwrap();

        assert_eq!(ids(&flattened), ["A"]);
        assert_eq!(flattened.collections, 1);
    }

    #[test]
    fn unsupported_types_are_dropped() {
        let entries = vec![
            feature("A"),
            json!({"type": "Other", "properties": {}}),
            json!({"properties": {}}),
            json!(42),
        ];
        let flattened = flatten(entries, FlattenDepth::Single).unwrap();

        assert_eq!(ids(&flattened), ["A"]);
        assert_eq!(flattened.unsupported, ["Other", "null", "null"]);
    }

    #[test]
    fn unsupported_type_is_logged_with_entry() {
        let other = json!({"type": "Other", "properties": {"id": "X"}});
        let entries = vec![feature("A"), other.clone()];

        let (flattened, logs) = capture_logs(|| flatten(entries, FlattenDepth::Single).unwrap());

        assert_eq!(flattened.unsupported, ["Other"]);
        assert!(logs.contains("WARN"));
        assert!(logs.contains("unsupported feature type"));
        assert!(logs.contains("feature_type=Other"));
        assert!(logs.contains(&other.to_string()));
    }

    #[test]
    fn dropped_nested_collection_is_logged_with_entry() {
        let nested = json!({"type": "FeatureCollection", "features": [feature("B")]});
        let entries = vec![json!({"type": "FeatureCollection", "features": [nested.clone()]})];

        let (_, logs) = capture_logs(|| flatten(entries, FlattenDepth::Single).unwrap());

        assert!(logs.contains("nested feature collection is not flattened"));
        assert!(logs.contains(&nested.to_string()));
    }

    #[test]
    fn non_string_type_is_labelled_as_json() {
        assert_eq!(type_label(&json!({"type": 7})), "7");
        assert_eq!(type_label(&json!({"type": "Feature"})), "Feature");
    }

    #[test]
    fn nested_collection_is_dropped_at_single_depth() {
        let entries = vec![json!({
            "type": "FeatureCollection",
            "features": [
                feature("A"),
                {"type": "FeatureCollection", "features": [feature("B")]},
                feature("C"),
            ]
        })];
        let flattened = flatten(entries, FlattenDepth::Single).unwrap();

        assert_eq!(ids(&flattened), ["A", "C"]);
        assert_eq!(flattened.unsupported, ["FeatureCollection"]);
        assert_eq!(flattened.collections, 1);
    }

    #[test]
    fn nested_collection_is_unwrapped_recursively() {
        let entries = vec![
            feature("A"),
            json!({
                "type": "FeatureCollection",
                "features": [
                    feature("B"),
                    {"type": "FeatureCollection", "features": [feature("C"), feature("D")]},
                    feature("E"),
                ]
            }),
            feature("F"),
        ];
        let flattened = flatten(entries, FlattenDepth::Recursive).unwrap();

        assert_eq!(ids(&flattened), ["A", "B", "C", "D", "E", "F"]);
        assert_eq!(flattened.collections, 2);
        assert!(flattened.unsupported.is_empty());
    }

    #[test]
    fn collection_without_features_is_fatal() {
        let entries = vec![feature("A"), json!({"type": "FeatureCollection"})];
        assert_eq!(
            flatten(entries, FlattenDepth::Single).unwrap_err(),
            FlattenError::MalformedCollection { index: 1 }
        );
    }

    #[test]
    fn malformed_nested_collection_names_its_top_level_entry() {
        let entries = vec![
            feature("A"),
            json!({"type": "FeatureCollection", "features": [{"type": "FeatureCollection"}]}),
        ];
        let err = flatten(entries, FlattenDepth::Recursive).unwrap_err();

        assert_eq!(err, FlattenError::MalformedCollection { index: 1 });
        assert_eq!(
            err.to_string(),
            "feature collection within entry 1 has no `features` array"
        );
    }

    #[test]
    fn rewrite_adds_identifier_key() {
        let mut props = properties(json!({"id": "X", "prefix": ["Y", "Z"]}));

        let rewrite = rewrite_identifier(&mut props).unwrap();

        assert_eq!(
            rewrite,
            Rewrite::Applied {
                key: "X".to_string(),
                value: "X_Y".to_string()
            }
        );
        assert_eq!(
            JsonValue::Object(props),
            json!({"id": "X", "prefix": ["Y", "Z"], "X": "X_Y"})
        );
    }

    #[test]
    fn rewrite_skipped_when_id_matches_prefix() {
        let mut props = properties(json!({"id": "X", "prefix": ["X"]}));
        let before = props.clone();

        assert_eq!(rewrite_identifier(&mut props).unwrap(), Rewrite::Unchanged);
        assert_eq!(props, before);
    }

    #[test]
    fn rewrite_uses_json_text_for_non_strings() {
        let mut props = properties(json!({"id": 5, "prefix": ["N90"]}));

        rewrite_identifier(&mut props).unwrap();

        assert_eq!(props["5"], "5_N90");
        assert_eq!(props["id"], 5);
    }

    #[test]
    fn rewrite_requires_id_and_prefix() {
        let mut no_id = properties(json!({"prefix": ["X"]}));
        let mut no_prefix = properties(json!({"id": "X"}));
        let mut empty = properties(json!({"id": "X", "prefix": []}));
        let mut scalar = properties(json!({"id": "X", "prefix": "X"}));

        assert_eq!(rewrite_identifier(&mut no_id), Err(RewriteError::MissingKey("id")));
        assert_eq!(rewrite_identifier(&mut no_prefix), Err(RewriteError::MissingKey("prefix")));
        assert_eq!(rewrite_identifier(&mut empty), Err(RewriteError::EmptyPrefix));
        assert_eq!(rewrite_identifier(&mut scalar), Err(RewriteError::PrefixNotSequence));
    }

    #[test]
    fn feature_properties_must_be_an_object() {
        let mut with = properties(feature("A"));
        let mut null = properties(json!({"type": "Feature", "properties": null}));

        assert!(feature_properties(&mut with).is_ok());
        assert_eq!(
            feature_properties(&mut null).unwrap_err(),
            RewriteError::MissingProperties
        );
    }
}
