//! Connection parameters and their canonical, hashable identity.
//!
//! Callers describe a connection with a loose map of [`ParamValue`]s. Nested
//! maps (charset conversion tables, TLS options) are ordinary `HashMap`s and
//! therefore neither hashable nor stable in iteration order, so before a
//! parameter set can select a pool it is normalized into a [`ConnectionKey`]:
//! every map becomes a sorted `BTreeMap` and floats are reduced to their bit
//! pattern. Two parameter sets that are value-equal always produce equal keys
//! with equal hashes.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use serde::{Deserialize, Serialize};

/// Parameter names whose values are never rendered by `Debug`/`Display`.
const REDACTED_PARAMS: &[&str] = &["password", "passwd"];

/// A single connection parameter value, as supplied by the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<ParamValue>),
    Map(HashMap<String, ParamValue>),
}

impl From<&str> for ParamValue {
    fn from(value: &str) -> Self {
        ParamValue::Str(value.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(value: String) -> Self {
        ParamValue::Str(value)
    }
}

impl From<bool> for ParamValue {
    fn from(value: bool) -> Self {
        ParamValue::Bool(value)
    }
}

impl From<i64> for ParamValue {
    fn from(value: i64) -> Self {
        ParamValue::Int(value)
    }
}

impl From<i32> for ParamValue {
    fn from(value: i32) -> Self {
        ParamValue::Int(value.into())
    }
}

impl From<u16> for ParamValue {
    fn from(value: u16) -> Self {
        ParamValue::Int(value.into())
    }
}

impl From<f64> for ParamValue {
    fn from(value: f64) -> Self {
        ParamValue::Float(value)
    }
}

impl From<Vec<ParamValue>> for ParamValue {
    fn from(value: Vec<ParamValue>) -> Self {
        ParamValue::List(value)
    }
}

impl From<HashMap<String, ParamValue>> for ParamValue {
    fn from(value: HashMap<String, ParamValue>) -> Self {
        ParamValue::Map(value)
    }
}

/// The parameter set handed to `connect()`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionParams(HashMap<String, ParamValue>);

impl ConnectionParams {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder method: add or replace a parameter.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        self.0.insert(name.into(), value.into());
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<ParamValue>) -> Option<ParamValue> {
        self.0.insert(name.into(), value.into())
    }

    pub fn get(&self, name: &str) -> Option<&ParamValue> {
        self.0.get(name)
    }

    pub fn remove(&mut self, name: &str) -> Option<ParamValue> {
        self.0.remove(name)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ParamValue)> {
        self.0.iter()
    }
}

impl<K: Into<String>, V: Into<ParamValue>> FromIterator<(K, V)> for ConnectionParams {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

/// Canonical, hashable form of a [`ParamValue`].
#[derive(Clone, PartialEq, Eq, Hash)]
pub enum KeyValue {
    Null,
    Bool(bool),
    Int(i64),
    /// IEEE-754 bits; `-0.0` folds into `0.0` and every NaN into one pattern.
    Float(u64),
    Str(String),
    List(Vec<KeyValue>),
    Map(BTreeMap<String, KeyValue>),
}

impl KeyValue {
    fn normalize(value: &ParamValue) -> Self {
        match value {
            ParamValue::Null => KeyValue::Null,
            ParamValue::Bool(b) => KeyValue::Bool(*b),
            ParamValue::Int(i) => KeyValue::Int(*i),
            ParamValue::Float(f) => KeyValue::Float(float_bits(*f)),
            ParamValue::Str(s) => KeyValue::Str(s.clone()),
            ParamValue::List(items) => KeyValue::List(items.iter().map(KeyValue::normalize).collect()),
            ParamValue::Map(map) => KeyValue::Map(
                map.iter()
                    .map(|(k, v)| (k.clone(), KeyValue::normalize(v)))
                    .collect(),
            ),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            KeyValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            KeyValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            KeyValue::Float(bits) => Some(f64::from_bits(*bits)),
            KeyValue::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, KeyValue>> {
        match self {
            KeyValue::Map(map) => Some(map),
            _ => None,
        }
    }
}

fn float_bits(f: f64) -> u64 {
    if f == 0.0 {
        0.0f64.to_bits()
    } else if f.is_nan() {
        f64::NAN.to_bits()
    } else {
        f.to_bits()
    }
}

impl fmt::Debug for KeyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl fmt::Display for KeyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyValue::Null => write!(f, "null"),
            KeyValue::Bool(b) => write!(f, "{b}"),
            KeyValue::Int(i) => write!(f, "{i}"),
            KeyValue::Float(bits) => write!(f, "{}", f64::from_bits(*bits)),
            KeyValue::Str(s) => write!(f, "{s:?}"),
            KeyValue::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
            KeyValue::Map(map) => {
                write!(f, "{{")?;
                for (i, (k, v)) in map.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{k}: {v}")?;
                }
                write!(f, "}}")
            }
        }
    }
}

/// Immutable identity of a parameter set; one pool exists per distinct key.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct ConnectionKey {
    params: BTreeMap<String, KeyValue>,
}

impl ConnectionKey {
    /// Normalize `params` into a key. Pure; equal inputs give equal keys.
    pub fn normalize(params: &ConnectionParams) -> Self {
        Self {
            params: params
                .iter()
                .map(|(name, value)| (name.clone(), KeyValue::normalize(value)))
                .collect(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&KeyValue> {
        self.params.get(name)
    }

    pub fn str_param(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(KeyValue::as_str)
    }

    pub fn int_param(&self, name: &str) -> Option<i64> {
        self.get(name).and_then(KeyValue::as_int)
    }

    pub fn map_param(&self, name: &str) -> Option<&BTreeMap<String, KeyValue>> {
        self.get(name).and_then(KeyValue::as_map)
    }

    /// Parameters in sorted name order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &KeyValue)> {
        self.params.iter()
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }
}

impl From<&ConnectionParams> for ConnectionKey {
    fn from(params: &ConnectionParams) -> Self {
        Self::normalize(params)
    }
}

impl fmt::Display for ConnectionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (name, value)) in self.params.iter().enumerate() {
            if i > 0 {
                write!(f, " ")?;
            }
            if REDACTED_PARAMS.contains(&name.as_str()) {
                write!(f, "{name}=***")?;
            } else {
                write!(f, "{name}={value}")?;
            }
        }
        Ok(())
    }
}

impl fmt::Debug for ConnectionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ConnectionKey({self})")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};

    fn hash_of<T: Hash>(value: &T) -> u64 {
        let mut hasher = DefaultHasher::new();
        value.hash(&mut hasher);
        hasher.finish()
    }

    fn ssl_map(entries: &[(&str, &str)]) -> ParamValue {
        ParamValue::Map(
            entries
                .iter()
                .map(|(k, v)| (k.to_string(), ParamValue::from(*v)))
                .collect(),
        )
    }

    #[test]
    fn equal_params_give_equal_keys() {
        let a = ConnectionParams::new()
            .with("host", "db.local")
            .with("port", 3306)
            .with("user", "app");
        let b = ConnectionParams::new()
            .with("user", "app")
            .with("port", 3306)
            .with("host", "db.local");

        let ka = ConnectionKey::normalize(&a);
        let kb = ConnectionKey::normalize(&b);
        assert_eq!(ka, kb);
        assert_eq!(hash_of(&ka), hash_of(&kb));
    }

    #[test]
    fn nested_maps_in_different_order_are_equal() {
        let a = ConnectionParams::new()
            .with("host", "db.local")
            .with("ssl", ssl_map(&[("ca", "/ca.pem"), ("cert", "/c.pem"), ("key", "/k.pem")]));
        let b = ConnectionParams::new()
            .with("ssl", ssl_map(&[("key", "/k.pem"), ("ca", "/ca.pem"), ("cert", "/c.pem")]))
            .with("host", "db.local");

        let ka = ConnectionKey::normalize(&a);
        let kb = ConnectionKey::normalize(&b);
        assert_eq!(ka, kb);
        assert_eq!(hash_of(&ka), hash_of(&kb));
    }

    #[test]
    fn nested_map_contents_matter() {
        let a = ConnectionParams::new().with("ssl", ssl_map(&[("ca", "/ca.pem")]));
        let b = ConnectionParams::new().with("ssl", ssl_map(&[("ca", "/other.pem")]));
        assert_ne!(ConnectionKey::normalize(&a), ConnectionKey::normalize(&b));
    }

    #[test]
    fn deeply_nested_maps_are_normalized() {
        let inner_a: HashMap<String, ParamValue> =
            HashMap::from([("x".to_string(), 1.into()), ("y".to_string(), 2.into())]);
        let inner_b: HashMap<String, ParamValue> =
            HashMap::from([("y".to_string(), 2.into()), ("x".to_string(), 1.into())]);
        let conv_a = ParamValue::Map(HashMap::from([("inner".to_string(), inner_a.into())]));
        let conv_b = ParamValue::Map(HashMap::from([("inner".to_string(), inner_b.into())]));

        let ka = ConnectionKey::normalize(&ConnectionParams::new().with("conv", conv_a));
        let kb = ConnectionKey::normalize(&ConnectionParams::new().with("conv", conv_b));
        assert_eq!(ka, kb);
        assert_eq!(hash_of(&ka), hash_of(&kb));
    }

    #[test]
    fn list_order_is_significant() {
        let a = ConnectionParams::new().with("hosts", vec![ParamValue::from("a"), ParamValue::from("b")]);
        let b = ConnectionParams::new().with("hosts", vec![ParamValue::from("b"), ParamValue::from("a")]);
        assert_ne!(ConnectionKey::normalize(&a), ConnectionKey::normalize(&b));
    }

    #[test]
    fn signed_zero_floats_hash_alike() {
        let a = ConnectionParams::new().with("weight", 0.0);
        let b = ConnectionParams::new().with("weight", -0.0);
        let ka = ConnectionKey::normalize(&a);
        let kb = ConnectionKey::normalize(&b);
        assert_eq!(ka, kb);
        assert_eq!(hash_of(&ka), hash_of(&kb));
    }

    #[test]
    fn keys_work_as_map_keys() {
        let params = ConnectionParams::new().with("host", "h").with("port", 5432);
        let mut pools = HashMap::new();
        pools.insert(ConnectionKey::normalize(&params), 7);
        assert_eq!(pools.get(&ConnectionKey::normalize(&params.clone())), Some(&7));
    }

    #[test]
    fn typed_accessors() {
        let key = ConnectionKey::normalize(
            &ConnectionParams::new()
                .with("host", "db.local")
                .with("port", 3306)
                .with("ssl", ssl_map(&[("ca", "/ca.pem")])),
        );
        assert_eq!(key.str_param("host"), Some("db.local"));
        assert_eq!(key.int_param("port"), Some(3306));
        assert_eq!(key.int_param("host"), None);
        let ssl = key.map_param("ssl").unwrap();
        assert_eq!(ssl.get("ca").and_then(KeyValue::as_str), Some("/ca.pem"));
    }

    #[test]
    fn display_redacts_password() {
        let key = ConnectionKey::normalize(
            &ConnectionParams::new()
                .with("user", "app")
                .with("password", "hunter2"),
        );
        let rendered = format!("{key} {key:?}");
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("password=***"));
        assert!(rendered.contains("user=\"app\""));
    }

    #[test]
    fn params_deserialize_from_toml() {
        let params: ConnectionParams = toml::from_str(
            r#"
host = "db.local"
port = 3306
compress = true

[ssl]
ca = "/ca.pem"
"#,
        )
        .unwrap();
        let key = ConnectionKey::normalize(&params);
        assert_eq!(key.int_param("port"), Some(3306));
        assert_eq!(key.get("compress"), Some(&KeyValue::Bool(true)));
        assert!(key.map_param("ssl").is_some());
    }
}
