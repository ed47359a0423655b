//! Declarative field schemas for protocol configurations.
//!
//! Each protocol worker advertises a list of [`FieldSchema`]s describing the
//! fields its `config` map accepts: type, required/optional, default value,
//! and validation rules (numeric bounds, regex pattern, custom predicate).
//! The config validator walks these schemas to type-check a monitor's config
//! and to fill in defaults.
//!
//! # Example
//!
//! ```
//! use argos::schema::FieldSchema;
//! use serde_json::json;
//!
//! let url = FieldSchema::string("url").required().pattern("^https?://.+");
//! assert!(url.validate(&json!("http://localhost:8080")).is_empty());
//! assert!(!url.validate(&json!("ftp://nope")).is_empty());
//! ```

use std::sync::Arc;

use regex::Regex;
use serde_json::Value;

/// Custom validation predicate: ok, or a reason string.
pub type CustomRule = Arc<dyn Fn(&Value) -> Result<(), String> + Send + Sync>;

/// The closed set of field types a schema can declare.
#[derive(Debug, Clone)]
pub enum FieldType {
    String,
    Integer,
    Float,
    Boolean,
    Map,
    /// Homogeneous list; every element must match the inner type.
    List(Box<FieldType>),
    /// String restricted to a fixed set of values.
    Enum(Vec<String>),
}

impl FieldType {
    /// Human-readable name used in validation messages.
    pub fn describe(&self) -> String {
        match self {
            FieldType::String => "a string".to_string(),
            FieldType::Integer => "an integer".to_string(),
            FieldType::Float => "a number".to_string(),
            FieldType::Boolean => "a boolean".to_string(),
            FieldType::Map => "an object".to_string(),
            FieldType::List(inner) => format!("a list of {}", inner.describe_plural()),
            FieldType::Enum(values) => format!("one of {}", values.join(", ")),
        }
    }

    fn describe_plural(&self) -> String {
        match self {
            FieldType::String => "strings".to_string(),
            FieldType::Integer => "integers".to_string(),
            FieldType::Float => "numbers".to_string(),
            FieldType::Boolean => "booleans".to_string(),
            FieldType::Map => "objects".to_string(),
            other => other.describe(),
        }
    }

    /// Whether `value` inhabits this type.
    pub fn matches(&self, value: &Value) -> bool {
        match self {
            FieldType::String => value.is_string(),
            FieldType::Integer => value.is_i64() || value.is_u64(),
            FieldType::Float => value.is_number(),
            FieldType::Boolean => value.is_boolean(),
            FieldType::Map => value.is_object(),
            FieldType::List(inner) => value
                .as_array()
                .is_some_and(|items| items.iter().all(|v| inner.matches(v))),
            FieldType::Enum(values) => value
                .as_str()
                .is_some_and(|s| values.iter().any(|v| v == s)),
        }
    }
}

/// Declarative description of one expected config field.
///
/// Built with the constructor-per-type + chained-rule style:
///
/// ```
/// use argos::schema::FieldSchema;
///
/// let interval = FieldSchema::integer("interval").required().min(100.0).max(3_600_000.0);
/// let method = FieldSchema::string("method").default_value("GET");
/// ```
#[derive(Clone)]
pub struct FieldSchema {
    name: String,
    kind: FieldType,
    required: bool,
    default: Option<Value>,
    min: Option<f64>,
    max: Option<f64>,
    pattern: Option<Regex>,
    custom: Option<CustomRule>,
}

impl FieldSchema {
    /// Create a schema for a field of the given type. Optional by default.
    pub fn new(name: impl Into<String>, kind: FieldType) -> Self {
        Self {
            name: name.into(),
            kind,
            required: false,
            default: None,
            min: None,
            max: None,
            pattern: None,
            custom: None,
        }
    }

    pub fn string(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::String)
    }

    pub fn integer(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::Integer)
    }

    pub fn float(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::Float)
    }

    pub fn boolean(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::Boolean)
    }

    pub fn map(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::Map)
    }

    pub fn list(name: impl Into<String>, inner: FieldType) -> Self {
        Self::new(name, FieldType::List(Box::new(inner)))
    }

    pub fn enumeration(name: impl Into<String>, values: &[&str]) -> Self {
        Self::new(
            name,
            FieldType::Enum(values.iter().map(|s| s.to_string()).collect()),
        )
    }

    /// Mark the field required (no default applies).
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Value used when the operator omits the field.
    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    /// Inclusive numeric lower bound.
    pub fn min(mut self, min: f64) -> Self {
        self.min = Some(min);
        self
    }

    /// Inclusive numeric upper bound.
    pub fn max(mut self, max: f64) -> Self {
        self.max = Some(max);
        self
    }

    /// Regex the string value must match.
    ///
    /// # Panics
    ///
    /// Panics if `pattern` is not a valid regex — schemas are authored in
    /// code by worker implementations, so a bad pattern is a programming
    /// error caught at startup.
    pub fn pattern(mut self, pattern: &str) -> Self {
        self.pattern = Some(Regex::new(pattern).expect("field schema pattern must be a valid regex"));
        self
    }

    /// Custom predicate run after all structural checks pass.
    pub fn custom(
        mut self,
        rule: impl Fn(&Value) -> Result<(), String> + Send + Sync + 'static,
    ) -> Self {
        self.custom = Some(Arc::new(rule));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> &FieldType {
        &self.kind
    }

    pub fn is_required(&self) -> bool {
        self.required
    }

    pub fn default(&self) -> Option<&Value> {
        self.default.as_ref()
    }

    /// Validate a present value against this schema.
    ///
    /// Returns the list of reasons the value is invalid (empty = valid).
    /// A type mismatch short-circuits the remaining rules — bounds and
    /// patterns against a wrong-typed value would only produce noise.
    pub fn validate(&self, value: &Value) -> Vec<String> {
        if !self.kind.matches(value) {
            return vec![format!("must be {}", self.kind.describe())];
        }

        let mut reasons = Vec::new();

        if let Some(n) = value.as_f64() {
            if let Some(min) = self.min {
                if n < min {
                    reasons.push(format!("must be >= {}", min));
                }
            }
            if let Some(max) = self.max {
                if n > max {
                    reasons.push(format!("must be <= {}", max));
                }
            }
        }

        if let (Some(re), Some(s)) = (&self.pattern, value.as_str()) {
            if !re.is_match(s) {
                reasons.push(format!("does not match pattern {}", re.as_str()));
            }
        }

        if let Some(rule) = &self.custom {
            if let Err(reason) = rule(value) {
                reasons.push(reason);
            }
        }

        reasons
    }
}

impl std::fmt::Debug for FieldSchema {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FieldSchema")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("required", &self.required)
            .field("default", &self.default)
            .field("min", &self.min)
            .field("max", &self.max)
            .field("pattern", &self.pattern.as_ref().map(|r| r.as_str()))
            .field("has_custom", &self.custom.is_some())
            .finish()
    }
}
