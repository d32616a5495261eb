//! User records and the creation payload

use std::fmt;
use std::str::FromStr;

use mongodb::bson::oid::ObjectId;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

use super::ValidationError;

/// Store-assigned identifier of a user (a MongoDB ObjectId).
///
/// Serialised to clients as its 24-character hex form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UserId(ObjectId);

impl UserId {
    /// Parse a 24-character hex identifier.
    pub fn parse(raw: &str) -> Result<Self, ValidationError> {
        ObjectId::parse_str(raw)
            .map(Self)
            .map_err(|_| ValidationError::InvalidFormat {
                field: "id",
                reason: "Invalid user ID format",
            })
    }

    /// Generate a fresh identifier (used by the in-memory store).
    pub fn generate() -> Self {
        Self(ObjectId::new())
    }

    pub fn object_id(&self) -> ObjectId {
        self.0
    }

    pub fn to_hex(&self) -> String {
        self.0.to_hex()
    }
}

impl From<ObjectId> for UserId {
    fn from(oid: ObjectId) -> Self {
        Self(oid)
    }
}

impl FromStr for UserId {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.to_hex())
    }
}

impl Serialize for UserId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0.to_hex())
    }
}

impl<'de> Deserialize<'de> for UserId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}

/// A stored user as returned to readers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    #[serde(rename = "_id")]
    pub id: UserId,
    pub name: String,
    pub email: String,
    pub age: i64,
    /// Attributes beyond the required ones, passed through unvalidated
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A validated creation payload, not yet persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct NewUser {
    pub name: String,
    pub email: String,
    pub age: i64,
    pub extra: Map<String, Value>,
}

impl NewUser {
    /// Build a payload from explicit fields with no extra attributes.
    pub fn new(name: impl Into<String>, email: impl Into<String>, age: i64) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
            age,
            extra: Map::new(),
        }
    }

    /// Attach an extra pass-through attribute.
    pub fn with_attr(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }

    /// Validate a raw JSON body.
    ///
    /// `name` and `email` must be non-empty strings and `age` an integral
    /// number. Any other attribute is kept as-is, except `_id`, which the
    /// store assigns.
    pub fn from_json(body: Value) -> Result<Self, ValidationError> {
        let Value::Object(mut fields) = body else {
            return Err(ValidationError::InvalidFormat {
                field: "body",
                reason: "expected a JSON object",
            });
        };

        let name = take_string(&mut fields, "name")?;
        let email = take_string(&mut fields, "email")?;
        let age = take_age(&mut fields)?;
        fields.remove("_id");

        Ok(Self {
            name,
            email,
            age,
            extra: fields,
        })
    }

    /// Attach the store-assigned id.
    pub fn into_user(self, id: UserId) -> User {
        User {
            id,
            name: self.name,
            email: self.email,
            age: self.age,
            extra: self.extra,
        }
    }
}

fn take_string(fields: &mut Map<String, Value>, field: &'static str) -> Result<String, ValidationError> {
    match fields.remove(field) {
        None | Some(Value::Null) => Err(ValidationError::Missing { field }),
        Some(Value::String(s)) if s.trim().is_empty() => Err(ValidationError::Empty { field }),
        Some(Value::String(s)) => Ok(s),
        Some(_) => Err(ValidationError::InvalidFormat {
            field,
            reason: "must be a string",
        }),
    }
}

fn take_age(fields: &mut Map<String, Value>) -> Result<i64, ValidationError> {
    const FIELD: &str = "age";
    match fields.remove(FIELD) {
        None | Some(Value::Null) => Err(ValidationError::Missing { field: FIELD }),
        Some(Value::Number(n)) => {
            if let Some(age) = n.as_i64() {
                return Ok(age);
            }
            match n.as_f64() {
                Some(f) if f.fract() == 0.0 && f >= i64::MIN as f64 && f <= i64::MAX as f64 => {
                    Ok(f as i64)
                }
                _ => Err(ValidationError::NotNumeric { field: FIELD }),
            }
        }
        Some(_) => Err(ValidationError::NotNumeric { field: FIELD }),
    }
}
