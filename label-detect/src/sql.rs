//! MySQL insert scripts for persisting an analysis.
//!
//! A script inserts the analysed `image`, one `analysis` row, and for each
//! analysed item an `object` row with its flattened `attribute` rows. Rows
//! are chained through `LAST_INSERT_ID()` session variables so the script
//! can run as a single batch.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{error::Error, types::AnalysisResult};

/// Everything needed to persist one analysis
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalysisRecord {
    #[serde(default)]
    pub bucket_url: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub hash: String,
    #[serde(default)]
    pub ip: String,
    #[serde(default)]
    pub created_at: String,
    #[serde(default)]
    pub analysis_content: Vec<Map<String, Value>>,
}

impl AnalysisRecord {
    /// Record whose analysed items are the labels of `result`
    pub fn from_result(
        result: &AnalysisResult,
        bucket_url: impl Into<String>,
        name: impl Into<String>,
        hash: impl Into<String>,
        ip: impl Into<String>,
        created_at: impl Into<String>,
    ) -> Result<Self, Error> {
        let analysis_content = result
            .labels
            .iter()
            .map(|label| match serde_json::to_value(label)? {
                Value::Object(map) => Ok(map),
                other => Ok(Map::from_iter([("value".to_string(), other)])),
            })
            .collect::<Result<Vec<_>, serde_json::Error>>()?;

        Ok(Self {
            bucket_url: bucket_url.into(),
            name: name.into(),
            hash: hash.into(),
            ip: ip.into(),
            created_at: created_at.into(),
            analysis_content,
        })
    }

    fn validate(&self) -> Result<(), Error> {
        let required = [
            (
                &self.bucket_url,
                r#"No bucket url given, try to add "bucket_url": "s3://kfc.kentuky.com/nugget.jpg""#,
            ),
            (&self.name, r#"No name given, try to add "name": "example_1""#),
            (
                &self.hash,
                r#"No hash given, try to add "hash": "5683b32d9da3fe83cef1e284dc210e768d02b7cf""#,
            ),
            (&self.ip, r#"No ip given, try to add "ip": "8.8.8.8""#),
            (
                &self.created_at,
                r#"No created_at given, try to add "created_at": "2018-12-25 09:27:53""#,
            ),
        ];

        for (value, hint) in required {
            if value.trim().is_empty() {
                return Err(Error::InvalidRecord(hint.to_string()));
            }
        }
        Ok(())
    }
}

/// Storage class of an attribute value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttributeType {
    String,
    Number,
    Boolean,
    None,
}

impl AttributeType {
    pub fn of(value: &Value) -> Self {
        match value {
            Value::String(_) => AttributeType::String,
            Value::Number(_) => AttributeType::Number,
            Value::Bool(_) => AttributeType::Boolean,
            _ => AttributeType::None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AttributeType::String => "string",
            AttributeType::Number => "number",
            AttributeType::Boolean => "boolean",
            AttributeType::None => "none",
        }
    }
}

/// Build the insert script for `record`
pub fn generate_insert_script(record: &AnalysisRecord) -> Result<String, Error> {
    record.validate()?;

    let mut script = String::new();

    script.push_str(&insert(
        "image",
        &["url", "name", "hash"],
        &[
            quote(&record.bucket_url),
            quote(&record.name),
            quote(&record.hash),
        ],
    ));
    script.push_str("SET @IMAGE = LAST_INSERT_ID();");

    script.push_str(&insert(
        "analysis",
        &["image_id", "ip", "created_at", "updated_at"],
        &[
            "@IMAGE".to_string(),
            format!("INET_ATON({})", quote(&record.ip)),
            quote(&record.created_at),
            "NOW()".to_string(),
        ],
    ));
    script.push_str("SET @ANALYSIS = LAST_INSERT_ID();");

    for item in &record.analysis_content {
        script.push_str(&insert(
            "object",
            &["analysis_id", "name", "category"],
            &[
                "@ANALYSIS".to_string(),
                quote("label_object"),
                quote("label"),
            ],
        ));
        script.push_str("SET @OBJECT = LAST_INSERT_ID();");

        for (name, value) in flatten_attributes(item) {
            script.push_str(&attribute_insert(&name, value));
        }
    }

    Ok(script)
}

/// Flatten an analysed item into `(name, scalar)` pairs.
///
/// Nested objects become `key.sub`, arrays of objects `key.index.sub`, and
/// every element of an array of scalars is stored under `key`. Flattening
/// stops one level deep; deeper values are stored as their JSON text.
fn flatten_attributes(item: &Map<String, Value>) -> Vec<(String, &Value)> {
    let mut attributes = Vec::new();

    for (key, value) in item {
        match value {
            Value::Object(fields) => {
                for (field, field_value) in fields {
                    attributes.push((format!("{}.{}", key, field), field_value));
                }
            }
            Value::Array(elements) => {
                for (index, element) in elements.iter().enumerate() {
                    match element {
                        Value::Object(fields) => {
                            for (field, field_value) in fields {
                                attributes
                                    .push((format!("{}.{}.{}", key, index, field), field_value));
                            }
                        }
                        scalar => attributes.push((key.clone(), scalar)),
                    }
                }
            }
            scalar => attributes.push((key.clone(), scalar)),
        }
    }

    attributes
}

fn attribute_insert(name: &str, value: &Value) -> String {
    let attribute_type = AttributeType::of(value);
    let mut columns = ["NULL".to_string(), "NULL".to_string(), "NULL".to_string()];

    let slot = match attribute_type {
        AttributeType::String => Some(0),
        AttributeType::Number => Some(1),
        AttributeType::Boolean => Some(2),
        AttributeType::None => None,
    };
    if let Some(slot) = slot {
        columns[slot] = quote(&scalar_text(value));
    } else if !value.is_null() {
        // Nested beyond one level: keep the JSON text
        columns[0] = quote(&value.to_string());
    }

    let [value_string, value_number, value_boolean] = columns;
    insert(
        "attribute",
        &[
            "object_id",
            "name",
            "value_type",
            "value_string",
            "value_number",
            "value_boolean",
        ],
        &[
            "@OBJECT".to_string(),
            quote(name),
            quote(attribute_type.as_str()),
            value_string,
            value_number,
            value_boolean,
        ],
    )
}

fn scalar_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

fn insert(table: &str, columns: &[&str], values: &[String]) -> String {
    let columns = columns
        .iter()
        .map(|column| format!("`{}`", column))
        .collect::<Vec<_>>()
        .join(",");
    format!(
        "INSERT INTO `{}` ({}) VALUES ({});",
        table,
        columns,
        values.join(",")
    )
}

fn quote(value: &str) -> String {
    format!("'{}'", value.replace('\\', "\\\\").replace('\'', "''"))
}
