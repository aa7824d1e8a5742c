use chrono::{DateTime, SubsecRound, Utc};
use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// The kind of interaction an [`OperationRecord`] describes
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Click,
    Input,
    Scroll,
    /// Structural-metadata rebuild requested from the host
    BuildDomTree,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Click => "click",
            Action::Input => "input",
            Action::Scroll => "scroll",
            Action::BuildDomTree => "build_dom_tree",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Attribute name/value pairs in DOM order.
///
/// Serialized as a JSON object whose keys keep the order they were captured in.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttributeMap(Vec<(String, String)>);

impl AttributeMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an attribute. Re-inserting an existing name replaces the value in place.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.0.iter_mut().find(|(existing, _)| *existing == name) {
            Some(slot) => slot.1 = value,
            None => self.0.push((name, value)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(existing, _)| existing == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|(k, _)| k.as_str())
    }
}

impl FromIterator<(String, String)> for AttributeMap {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        let mut map = AttributeMap::new();
        for (name, value) in iter {
            map.insert(name, value);
        }
        map
    }
}

impl Serialize for AttributeMap {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (name, value) in &self.0 {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for AttributeMap {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct AttributeMapVisitor;

        impl<'de> Visitor<'de> for AttributeMapVisitor {
            type Value = AttributeMap;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("an object of attribute names to string values")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                let mut map = AttributeMap::new();
                while let Some((name, value)) = access.next_entry::<String, String>()? {
                    map.insert(name, value);
                }
                Ok(map)
            }
        }

        deserializer.deserialize_map(AttributeMapVisitor)
    }
}

/// The element an interaction was aimed at
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TargetInfo {
    /// Positional locator; empty when the element could not be located
    pub xpath: String,

    /// Tag plus class tokens. A hint, not a unique selector
    pub css_selector: String,

    /// Raw tag name as reported by the DOM
    pub tag_name: String,

    pub element_text: String,

    pub attributes: AttributeMap,

    /// Current form value, only present on input records
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

/// Page state at capture time
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PageContext {
    pub url: String,
    pub title: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tab_id: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scroll_x: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scroll_y: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ActionResult {
    pub success: bool,
    pub error: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extracted_content: Option<String>,
}

impl ActionResult {
    /// Capture only records that the DOM event fired, so every captured result is a success
    pub fn fired() -> Self {
        Self {
            success: true,
            error: None,
            extracted_content: None,
        }
    }
}

/// One observed interaction
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OperationRecord {
    #[serde(with = "iso_millis")]
    pub timestamp: DateTime<Utc>,

    pub action: Action,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<TargetInfo>,

    pub context: PageContext,

    pub result: ActionResult,
}

impl OperationRecord {
    pub fn new(action: Action, target: Option<TargetInfo>, context: PageContext) -> Self {
        Self {
            // stored at the precision it is serialized with
            timestamp: Utc::now().trunc_subsecs(3),
            action,
            target,
            context,
            result: ActionResult::fired(),
        }
    }

    /// The timestamp in the serialized ISO-8601 form
    pub fn timestamp_iso(&self) -> String {
        iso_millis::format(&self.timestamp)
    }
}

/// ISO-8601 UTC with millisecond precision, e.g. `2024-05-01T10:00:00.123Z`
pub(crate) mod iso_millis {
    use chrono::{DateTime, SecondsFormat, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn format(timestamp: &DateTime<Utc>) -> String {
        timestamp.to_rfc3339_opts(SecondsFormat::Millis, true)
    }

    pub fn serialize<S: Serializer>(timestamp: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&format(timestamp))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(d)?;
        DateTime::parse_from_rfc3339(&raw)
            .map(|t| t.with_timezone(&Utc))
            .map_err(serde::de::Error::custom)
    }
}
