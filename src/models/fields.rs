//! Flat field maps
//!
//! Session records are stored as hashes, so every record has to flatten to a
//! string-keyed map of strings. These helpers derive that map from any serde
//! type: each non-null field is stored as its JSON text and read back from
//! it. Values that are not valid JSON (hand-written entries, plain numbers
//! written by other tools) are read as bare strings.

use super::RecordError;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;

/// Flat string map stored as a backend hash
pub type FieldMap = HashMap<String, String>;

/// Flatten a serializable struct into a field map
///
/// # Errors
/// Returns `RecordError::NotAnObject` if `value` does not serialize to a JSON
/// object (e.g. a tuple or a bare string).
pub fn to_field_map<T: Serialize>(value: &T) -> Result<FieldMap, RecordError> {
    let Value::Object(object) = serde_json::to_value(value)? else {
        return Err(RecordError::NotAnObject);
    };

    Ok(object
        .into_iter()
        .filter(|(_, v)| !v.is_null())
        .map(|(k, v)| (k, v.to_string()))
        .collect())
}

/// Rebuild a struct from a field map produced by [`to_field_map`]
///
/// Fields unknown to `T` (such as the reserved expiration field) are ignored
/// unless `T` denies unknown fields.
pub fn from_field_map<T: DeserializeOwned>(fields: &FieldMap) -> Result<T, RecordError> {
    let object: Map<String, Value> = fields
        .iter()
        .map(|(k, v)| {
            let value = serde_json::from_str(v).unwrap_or_else(|_| Value::String(v.clone()));
            (k.clone(), value)
        })
        .collect();

    Ok(serde_json::from_value(Value::Object(object))?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Profile {
        name: String,
        age: u32,
        nickname: Option<String>,
        admin: bool,
    }

    #[test]
    fn test_strings_are_json_encoded() {
        let profile = Profile {
            name: "alice".to_string(),
            age: 30,
            nickname: None,
            admin: true,
        };

        let fields = to_field_map(&profile).unwrap();

        assert_eq!(fields.get("name"), Some(&"\"alice\"".to_string()));
        assert_eq!(fields.get("age"), Some(&"30".to_string()));
        assert_eq!(fields.get("admin"), Some(&"true".to_string()));
        // None is left out entirely
        assert!(!fields.contains_key("nickname"));
        assert_eq!(from_field_map::<Profile>(&fields).unwrap(), profile);
    }

    #[test]
    fn test_numeric_looking_strings_survive() {
        let profile = Profile {
            name: "12345".to_string(),
            age: 1,
            nickname: Some("true".to_string()),
            admin: false,
        };

        let fields = to_field_map(&profile).unwrap();
        assert_eq!(from_field_map::<Profile>(&fields).unwrap(), profile);
    }

    #[test]
    fn test_bare_strings_are_accepted() {
        let mut fields = FieldMap::new();
        fields.insert("name".to_string(), "bob".to_string());
        fields.insert("age".to_string(), "41".to_string());
        fields.insert("admin".to_string(), "false".to_string());
        fields.insert("expiration".to_string(), "1700000000".to_string());

        let profile: Profile = from_field_map(&fields).unwrap();
        assert_eq!(profile.name, "bob");
        assert_eq!(profile.age, 41);
        assert_eq!(profile.nickname, None);
    }

    #[test]
    fn test_missing_field_is_an_error() {
        let mut fields = FieldMap::new();
        fields.insert("name".to_string(), "\"carol\"".to_string());

        assert!(matches!(from_field_map::<Profile>(&fields), Err(RecordError::Decode(_))));
    }

    #[test]
    fn test_non_object_is_rejected() {
        assert!(matches!(to_field_map(&"just a string"), Err(RecordError::NotAnObject)));
        assert!(matches!(to_field_map(&(1, 2)), Err(RecordError::NotAnObject)));
    }
}
