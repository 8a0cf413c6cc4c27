// Request parameters and their form encoding
use chrono::NaiveDate;
use url::form_urlencoded;

// A single parameter value. Lists are sent with bracketed indices, nested as
// deep as the value goes (`b[0][1]=...`).
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    Text(String),
    List(Vec<ParamValue>),
}

impl ParamValue {
    pub fn is_empty_text(&self) -> bool {
        matches!(self, ParamValue::Text(text) if text.is_empty())
    }

    fn encode_into(&self, key: &str, serializer: &mut form_urlencoded::Serializer<'_, String>) {
        match self {
            ParamValue::Text(text) => {
                serializer.append_pair(key, text);
            }
            ParamValue::List(items) => {
                for (index, item) in items.iter().enumerate() {
                    item.encode_into(&format!("{}[{}]", key, index), serializer);
                }
            }
        }
    }
}

impl From<&str> for ParamValue {
    fn from(value: &str) -> Self {
        ParamValue::Text(value.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(value: String) -> Self {
        ParamValue::Text(value)
    }
}

impl From<&String> for ParamValue {
    fn from(value: &String) -> Self {
        ParamValue::Text(value.clone())
    }
}

// false becomes "" and is dropped before sending, so the service falls back
// to its own default for the flag
impl From<bool> for ParamValue {
    fn from(value: bool) -> Self {
        ParamValue::Text(if value { "1" } else { "" }.to_string())
    }
}

impl From<f64> for ParamValue {
    fn from(value: f64) -> Self {
        ParamValue::Text(value.to_string())
    }
}

impl From<NaiveDate> for ParamValue {
    fn from(value: NaiveDate) -> Self {
        ParamValue::Text(value.format("%Y-%m-%d").to_string())
    }
}

macro_rules! impl_from_integer {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for ParamValue {
                fn from(value: $ty) -> Self {
                    ParamValue::Text(value.to_string())
                }
            }
        )*
    };
}

impl_from_integer!(u8, u16, u32, u64, usize, i8, i16, i32, i64, isize);

impl<T: Into<ParamValue>> From<Vec<T>> for ParamValue {
    fn from(values: Vec<T>) -> Self {
        ParamValue::List(values.into_iter().map(Into::into).collect())
    }
}

/// Insertion-ordered parameter mapping. Inserting an existing key replaces
/// its value in place.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Params {
    entries: Vec<(String, ParamValue)>,
}

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<ParamValue>) -> &mut Self {
        let key = key.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(existing, _)| *existing == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key, value)),
        }
        self
    }

    pub fn insert_opt<V: Into<ParamValue>>(
        &mut self,
        key: impl Into<String>,
        value: Option<V>,
    ) -> &mut Self {
        if let Some(value) = value {
            self.insert(key, value);
        }
        self
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&ParamValue> {
        self.entries
            .iter()
            .find(|(existing, _)| existing == key)
            .map(|(_, value)| value)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ParamValue)> {
        self.entries.iter().map(|(key, value)| (key.as_str(), value))
    }

    // Drops every entry whose value is an empty string
    pub fn strip_empty(&mut self) {
        self.entries.retain(|(_, value)| !value.is_empty_text());
    }

    // application/x-www-form-urlencoded, used both for GET query strings and
    // POST bodies
    pub fn to_query_string(&self) -> String {
        let mut serializer = form_urlencoded::Serializer::new(String::new());
        for (key, value) in &self.entries {
            value.encode_into(key, &mut serializer);
        }
        serializer.finish()
    }
}

impl<K: Into<String>, V: Into<ParamValue>> FromIterator<(K, V)> for Params {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut params = Params::new();
        for (key, value) in iter {
            params.insert(key, value);
        }
        params
    }
}
