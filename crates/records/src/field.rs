//! Fields are owned by the metadata layer; this crate only reads them to know how to interpret cells.
use serde_json::Value;

/// The declared type of a field.
///
/// Unknown type names survive a round trip through [FieldType::Other] so that newer metadata doesn't break older
/// readers.
#[derive(Clone, Debug, Eq, PartialEq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(from = "String", into = "String")]
pub enum FieldType {
    SingleLineText,
    LongText,
    RichText,
    Email,
    Url,
    PhoneNumber,
    Number,
    Currency,
    Percent,
    Rating,
    Duration,
    Date,
    DateTime,
    SingleSelect,
    MultiSelect,
    Checkbox,
    Link,
    Attachment,
    Collaborator,
    Barcode,
    AutoNumber,
    Formula,
    Rollup,
    Lookup,
    Count,
    CreatedTime,
    LastModifiedTime,
    CreatedBy,
    LastModifiedBy,
    Other(String),
}

const NAMES: &[(&str, FieldType)] = &[
    ("single_line_text", FieldType::SingleLineText),
    ("long_text", FieldType::LongText),
    ("rich_text", FieldType::RichText),
    ("email", FieldType::Email),
    ("url", FieldType::Url),
    ("phone_number", FieldType::PhoneNumber),
    ("number", FieldType::Number),
    ("currency", FieldType::Currency),
    ("percent", FieldType::Percent),
    ("rating", FieldType::Rating),
    ("duration", FieldType::Duration),
    ("date", FieldType::Date),
    ("datetime", FieldType::DateTime),
    ("single_select", FieldType::SingleSelect),
    ("multi_select", FieldType::MultiSelect),
    ("checkbox", FieldType::Checkbox),
    ("link", FieldType::Link),
    ("attachment", FieldType::Attachment),
    ("collaborator", FieldType::Collaborator),
    ("barcode", FieldType::Barcode),
    ("autonumber", FieldType::AutoNumber),
    ("formula", FieldType::Formula),
    ("rollup", FieldType::Rollup),
    ("lookup", FieldType::Lookup),
    ("count", FieldType::Count),
    ("created_time", FieldType::CreatedTime),
    ("last_modified_time", FieldType::LastModifiedTime),
    ("created_by", FieldType::CreatedBy),
    ("last_modified_by", FieldType::LastModifiedBy),
];

impl FieldType {
    pub fn as_str(&self) -> &str {
        if let FieldType::Other(name) = self {
            return name;
        }

        NAMES
            .iter()
            .find(|(_, t)| t == self)
            .map(|(n, _)| *n)
            .unwrap_or("unknown")
    }

    pub fn parse(name: &str) -> FieldType {
        NAMES
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, t)| t.clone())
            .unwrap_or_else(|| FieldType::Other(name.to_string()))
    }

    /// Free-form text the search box should look at.
    pub fn is_text_like(&self) -> bool {
        matches!(
            self,
            FieldType::SingleLineText
                | FieldType::LongText
                | FieldType::RichText
                | FieldType::Email
                | FieldType::Url
                | FieldType::PhoneNumber
                | FieldType::Barcode
        )
    }

    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            FieldType::Number
                | FieldType::Currency
                | FieldType::Percent
                | FieldType::Rating
                | FieldType::Duration
                | FieldType::AutoNumber
                | FieldType::Count
        )
    }

    pub fn is_date(&self) -> bool {
        matches!(
            self,
            FieldType::Date
                | FieldType::DateTime
                | FieldType::CreatedTime
                | FieldType::LastModifiedTime
        )
    }

    /// Values of computed fields are derived elsewhere and never written by users.
    pub fn is_computed(&self) -> bool {
        matches!(
            self,
            FieldType::Formula
                | FieldType::Rollup
                | FieldType::Lookup
                | FieldType::Count
                | FieldType::AutoNumber
                | FieldType::CreatedTime
                | FieldType::LastModifiedTime
                | FieldType::CreatedBy
                | FieldType::LastModifiedBy
        )
    }
}

impl From<String> for FieldType {
    fn from(name: String) -> Self {
        FieldType::parse(&name)
    }
}

impl From<FieldType> for String {
    fn from(t: FieldType) -> Self {
        t.as_str().to_string()
    }
}

impl std::fmt::Display for FieldType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A user-defined column.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Field {
    pub id: String,
    pub table_id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    /// Type-specific options, for example the choices of a select.
    #[serde(default)]
    pub options: Value,
}

impl Field {
    pub fn new(id: impl Into<String>, name: impl Into<String>, field_type: FieldType) -> Self {
        Field {
            id: id.into(),
            table_id: String::new(),
            name: name.into(),
            field_type,
            options: Value::Null,
        }
    }
}
