//! Capture bookkeeping shared by the parsers and the generation tree.

use std::fmt;

use rustc_hash::FxHashMap;

/// A captured value: a single value, or the ordered values of a list-append capture.
#[derive(Debug, Clone, PartialEq)]
pub enum Capture<T> {
    Scalar(T),
    List(Vec<T>),
}

impl<T> Capture<T> {
    pub fn as_scalar(&self) -> Option<&T> {
        match self {
            Capture::Scalar(v) => Some(v),
            Capture::List(_) => None,
        }
    }

    pub fn as_list(&self) -> Option<&[T]> {
        match self {
            Capture::Scalar(_) => None,
            Capture::List(items) => Some(items),
        }
    }

    pub fn is_list(&self) -> bool {
        matches!(self, Capture::List(_))
    }

    /// Same shape, mapped values.
    pub fn map<U>(&self, mut f: impl FnMut(&T) -> U) -> Capture<U> {
        match self {
            Capture::Scalar(v) => Capture::Scalar(f(v)),
            Capture::List(items) => Capture::List(items.iter().map(f).collect()),
        }
    }
}

impl From<String> for Capture<String> {
    fn from(value: String) -> Self {
        Capture::Scalar(value)
    }
}

impl From<Vec<String>> for Capture<String> {
    fn from(items: Vec<String>) -> Self {
        Capture::List(items)
    }
}

impl From<&str> for Capture<String> {
    fn from(value: &str) -> Self {
        Capture::Scalar(value.to_string())
    }
}

impl From<Vec<&str>> for Capture<String> {
    fn from(items: Vec<&str>) -> Self {
        Capture::List(items.into_iter().map(str::to_string).collect())
    }
}

/// Captured values with parallel log-probabilities.
///
/// The first write to a name fixes its shape: once a list, every later value is
/// appended; once a scalar, every later value overwrites it.
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureMap<V, P> {
    values: FxHashMap<String, Capture<V>>,
    log_probs: FxHashMap<String, Capture<P>>,
}

impl<V, P> Default for CaptureMap<V, P> {
    fn default() -> Self {
        Self {
            values: FxHashMap::default(),
            log_probs: FxHashMap::default(),
        }
    }
}

impl<V, P> CaptureMap<V, P> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one capture event.
    pub fn record(&mut self, name: &str, value: V, log_prob: P, list_append: bool) {
        match (self.values.get_mut(name), self.log_probs.get_mut(name)) {
            (Some(Capture::List(items)), Some(Capture::List(probs))) => {
                items.push(value);
                probs.push(log_prob);
            }
            (Some(Capture::Scalar(slot)), Some(Capture::Scalar(prob))) => {
                *slot = value;
                *prob = log_prob;
            }
            _ => {
                let (value, log_prob) = if list_append {
                    (Capture::List(vec![value]), Capture::List(vec![log_prob]))
                } else {
                    (Capture::Scalar(value), Capture::Scalar(log_prob))
                };
                self.values.insert(name.to_string(), value);
                self.log_probs.insert(name.to_string(), log_prob);
            }
        }
    }

    /// Replace the entry for `name` outright, shape included.
    pub fn set(&mut self, name: impl Into<String>, value: Capture<V>, log_prob: Capture<P>) {
        let name = name.into();
        self.values.insert(name.clone(), value);
        self.log_probs.insert(name, log_prob);
    }

    pub fn remove(&mut self, name: &str) -> Option<(Capture<V>, Capture<P>)> {
        let value = self.values.remove(name)?;
        let log_prob = self.log_probs.remove(name)?;
        Some((value, log_prob))
    }

    pub fn get(&self, name: &str) -> Option<&Capture<V>> {
        self.values.get(name)
    }

    pub fn log_prob(&self, name: &str) -> Option<&Capture<P>> {
        self.log_probs.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn values(&self) -> &FxHashMap<String, Capture<V>> {
        &self.values
    }

    pub fn log_probs(&self) -> &FxHashMap<String, Capture<P>> {
        &self.log_probs
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Capture<V>, &Capture<P>)> + '_ {
        self.values.iter().filter_map(move |(name, value)| {
            let log_prob = self.log_probs.get(name)?;
            Some((name.as_str(), value, log_prob))
        })
    }
}

/// A captured byte string, decoded to text when it is valid UTF-8.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureData {
    Text(String),
    Bytes(Vec<u8>),
}

impl CaptureData {
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        match String::from_utf8(bytes) {
            Ok(text) => CaptureData::Text(text),
            Err(err) => CaptureData::Bytes(err.into_bytes()),
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            CaptureData::Text(text) => Some(text),
            CaptureData::Bytes(_) => None,
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        match self {
            CaptureData::Text(text) => text.as_bytes(),
            CaptureData::Bytes(bytes) => bytes,
        }
    }
}

impl fmt::Display for CaptureData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CaptureData::Text(text) => f.write_str(text),
            CaptureData::Bytes(bytes) => write!(f, "{}", String::from_utf8_lossy(bytes)),
        }
    }
}

impl From<&str> for CaptureData {
    fn from(text: &str) -> Self {
        CaptureData::Text(text.to_string())
    }
}
