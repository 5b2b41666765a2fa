//! Job parameters, their identifying signature, incrementers and validators

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use crate::error::{BatchError, Result};

/// Typed value of a single job parameter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum ParameterValue {
    String(String),
    Long(i64),
    Double(f64),
    Date(DateTime<Utc>),
}

impl ParameterValue {
    pub fn type_name(&self) -> &'static str {
        match self {
            ParameterValue::String(_) => "string",
            ParameterValue::Long(_) => "long",
            ParameterValue::Double(_) => "double",
            ParameterValue::Date(_) => "date",
        }
    }

    fn parse(type_name: &str, raw: &str) -> Result<Self> {
        let invalid = |e: &dyn fmt::Display| {
            BatchError::InvalidParameters(format!("cannot parse '{}' as {}: {}", raw, type_name, e))
        };
        match type_name {
            "string" => Ok(ParameterValue::String(raw.to_string())),
            "long" => raw.parse().map(ParameterValue::Long).map_err(|e| invalid(&e)),
            "double" => raw.parse().map(ParameterValue::Double).map_err(|e| invalid(&e)),
            "date" => DateTime::parse_from_rfc3339(raw)
                .map(|d| ParameterValue::Date(d.with_timezone(&Utc)))
                .map_err(|e| invalid(&e)),
            other => Err(BatchError::InvalidParameters(format!(
                "unknown parameter type: {}",
                other
            ))),
        }
    }
}

impl fmt::Display for ParameterValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParameterValue::String(v) => write!(f, "{}", v),
            ParameterValue::Long(v) => write!(f, "{}", v),
            ParameterValue::Double(v) => write!(f, "{}", v),
            ParameterValue::Date(v) => write!(f, "{}", v.to_rfc3339()),
        }
    }
}

/// A parameter value plus whether it contributes to the instance identity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobParameter {
    pub value: ParameterValue,
    #[serde(default = "default_identifying")]
    pub identifying: bool,
}

fn default_identifying() -> bool {
    true
}

impl JobParameter {
    pub fn identifying(value: ParameterValue) -> Self {
        Self {
            value,
            identifying: true,
        }
    }

    pub fn non_identifying(value: ParameterValue) -> Self {
        Self {
            value,
            identifying: false,
        }
    }
}

/// Parameters of one job run.
///
/// Backed by a sorted map so the identifying signature does not depend on
/// insertion order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobParameters {
    parameters: BTreeMap<String, JobParameter>,
}

impl JobParameters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn builder() -> JobParametersBuilder {
        JobParametersBuilder::default()
    }

    pub fn get(&self, key: &str) -> Option<&JobParameter> {
        self.parameters.get(key)
    }

    pub fn get_string(&self, key: &str) -> Option<&str> {
        match self.parameters.get(key).map(|p| &p.value) {
            Some(ParameterValue::String(v)) => Some(v),
            _ => None,
        }
    }

    pub fn get_long(&self, key: &str) -> Option<i64> {
        match self.parameters.get(key).map(|p| &p.value) {
            Some(ParameterValue::Long(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn get_double(&self, key: &str) -> Option<f64> {
        match self.parameters.get(key).map(|p| &p.value) {
            Some(ParameterValue::Double(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn get_date(&self, key: &str) -> Option<DateTime<Utc>> {
        match self.parameters.get(key).map(|p| &p.value) {
            Some(ParameterValue::Date(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn insert(&mut self, key: impl Into<String>, parameter: JobParameter) {
        self.parameters.insert(key.into(), parameter);
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.parameters.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.parameters.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &JobParameter)> {
        self.parameters.iter()
    }

    pub fn len(&self) -> usize {
        self.parameters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parameters.is_empty()
    }

    /// Parameters that take part in the instance identity
    pub fn identifying(&self) -> JobParameters {
        JobParameters {
            parameters: self
                .parameters
                .iter()
                .filter(|(_, p)| p.identifying)
                .map(|(k, p)| (k.clone(), p.clone()))
                .collect(),
        }
    }

    /// Stable identity key for a job instance: SHA-256 over the sorted
    /// identifying parameters. Keys and values are length-prefixed so no
    /// value can imitate a separator.
    pub fn identifying_signature(&self) -> String {
        let mut canonical = String::new();
        for (key, parameter) in self.parameters.iter().filter(|(_, p)| p.identifying) {
            let value = parameter.value.to_string();
            canonical.push_str(&format!(
                "{}:{}|{}|{}:{};",
                key.len(),
                key,
                parameter.value.type_name(),
                value.len(),
                value
            ));
        }
        hex::encode(Sha256::digest(canonical.as_bytes()))
    }
}

const ESCAPE: char = '\\';

fn escape_key(key: &str) -> String {
    let mut escaped = String::with_capacity(key.len());
    for (i, ch) in key.chars().enumerate() {
        if matches!(ch, ESCAPE | ',' | '=' | '(' | ')') || (i == 0 && ch == '-') {
            escaped.push(ESCAPE);
        }
        escaped.push(ch);
    }
    escaped
}

fn escape_value(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for ch in value.chars() {
        if matches!(ch, ESCAPE | ',' | '=') {
            escaped.push(ESCAPE);
        }
        escaped.push(ch);
    }
    escaped
}

fn unescape(raw: &str) -> String {
    let mut unescaped = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(ch) = chars.next() {
        match ch {
            ESCAPE => unescaped.extend(chars.next()),
            other => unescaped.push(other),
        }
    }
    unescaped
}

/// Byte offset of the first `target` not preceded by the escape character
fn find_unescaped(raw: &str, target: char) -> Option<usize> {
    let mut escaped = false;
    for (index, ch) in raw.char_indices() {
        if escaped {
            escaped = false;
        } else if ch == ESCAPE {
            escaped = true;
        } else if ch == target {
            return Some(index);
        }
    }
    None
}

fn split_unescaped(raw: &str, separator: char) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut rest = raw;
    while let Some(index) = find_unescaped(rest, separator) {
        parts.push(&rest[..index]);
        rest = &rest[index + separator.len_utf8()..];
    }
    parts.push(rest);
    parts
}

/// Formats as `key(type)=value` pairs; non-identifying keys are prefixed
/// with `-`. Separators inside keys and values are escaped with `\`.
impl fmt::Display for JobParameters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rendered: Vec<String> = self
            .parameters
            .iter()
            .map(|(key, p)| {
                format!(
                    "{}{}({})={}",
                    if p.identifying { "" } else { "-" },
                    escape_key(key),
                    p.value.type_name(),
                    escape_value(&p.value.to_string())
                )
            })
            .collect();
        write!(f, "{}", rendered.join(","))
    }
}

impl FromStr for JobParameters {
    type Err = BatchError;

    fn from_str(s: &str) -> Result<Self> {
        let mut parameters = JobParameters::new();
        for token in split_unescaped(s, ',').into_iter().map(str::trim).filter(|t| !t.is_empty()) {
            let split = find_unescaped(token, '=').ok_or_else(|| {
                BatchError::InvalidParameters(format!("expected key=value, got '{}'", token))
            })?;
            let (raw_key, raw_value) = (&token[..split], &token[split + 1..]);
            let (identifying, raw_key) = match raw_key.strip_prefix('-') {
                Some(rest) => (false, rest),
                None => (true, raw_key),
            };
            let (key, type_name) = match find_unescaped(raw_key, '(') {
                Some(open) => {
                    let type_name = raw_key[open + 1..].strip_suffix(')').ok_or_else(|| {
                        BatchError::InvalidParameters(format!("unterminated type in '{}'", token))
                    })?;
                    (unescape(&raw_key[..open]), type_name.to_lowercase())
                }
                None => (unescape(raw_key), "string".to_string()),
            };
            if key.is_empty() {
                return Err(BatchError::InvalidParameters(format!(
                    "empty parameter name in '{}'",
                    token
                )));
            }
            let value = ParameterValue::parse(&type_name, &unescape(raw_value))?;
            parameters.insert(key, JobParameter { value, identifying });
        }
        Ok(parameters)
    }
}

/// Builder for job parameters
#[derive(Debug, Default)]
pub struct JobParametersBuilder {
    parameters: JobParameters,
}

impl JobParametersBuilder {
    pub fn from_parameters(parameters: &JobParameters) -> Self {
        Self {
            parameters: parameters.clone(),
        }
    }

    pub fn add_string(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters
            .insert(key, JobParameter::identifying(ParameterValue::String(value.into())));
        self
    }

    pub fn add_long(mut self, key: impl Into<String>, value: i64) -> Self {
        self.parameters
            .insert(key, JobParameter::identifying(ParameterValue::Long(value)));
        self
    }

    pub fn add_double(mut self, key: impl Into<String>, value: f64) -> Self {
        self.parameters
            .insert(key, JobParameter::identifying(ParameterValue::Double(value)));
        self
    }

    pub fn add_date(mut self, key: impl Into<String>, value: DateTime<Utc>) -> Self {
        self.parameters
            .insert(key, JobParameter::identifying(ParameterValue::Date(value)));
        self
    }

    pub fn add_parameter(mut self, key: impl Into<String>, parameter: JobParameter) -> Self {
        self.parameters.insert(key, parameter);
        self
    }

    pub fn build(self) -> JobParameters {
        self.parameters
    }
}

/// Derives the parameters of the next instance from the previous ones
pub trait JobParametersIncrementer: Send + Sync {
    fn get_next(&self, previous: Option<&JobParameters>) -> JobParameters;
}

/// Increments a long `run.id` parameter, starting at 1
#[derive(Debug, Clone)]
pub struct RunIdIncrementer {
    key: String,
}

impl RunIdIncrementer {
    pub const DEFAULT_KEY: &'static str = "run.id";

    pub fn new() -> Self {
        Self {
            key: Self::DEFAULT_KEY.to_string(),
        }
    }

    pub fn with_key(key: impl Into<String>) -> Self {
        Self { key: key.into() }
    }
}

impl Default for RunIdIncrementer {
    fn default() -> Self {
        Self::new()
    }
}

impl JobParametersIncrementer for RunIdIncrementer {
    fn get_next(&self, previous: Option<&JobParameters>) -> JobParameters {
        let previous = previous.cloned().unwrap_or_default();
        let next_id = previous.get_long(&self.key).map(|id| id + 1).unwrap_or(1);
        JobParametersBuilder::from_parameters(&previous)
            .add_long(self.key.clone(), next_id)
            .build()
    }
}

/// Checks parameters before an execution is created
pub trait JobParametersValidator: Send + Sync {
    fn validate(&self, parameters: &JobParameters) -> Result<()>;
}

/// Validates required keys and, when optional keys are declared, rejects
/// anything not listed.
#[derive(Debug, Clone, Default)]
pub struct DefaultJobParametersValidator {
    required_keys: BTreeSet<String>,
    optional_keys: BTreeSet<String>,
}

impl DefaultJobParametersValidator {
    pub fn new<R, O>(required_keys: R, optional_keys: O) -> Self
    where
        R: IntoIterator,
        R::Item: Into<String>,
        O: IntoIterator,
        O::Item: Into<String>,
    {
        Self {
            required_keys: required_keys.into_iter().map(Into::into).collect(),
            optional_keys: optional_keys.into_iter().map(Into::into).collect(),
        }
    }
}

impl JobParametersValidator for DefaultJobParametersValidator {
    fn validate(&self, parameters: &JobParameters) -> Result<()> {
        let missing: Vec<&str> = self
            .required_keys
            .iter()
            .filter(|k| !parameters.contains_key(k))
            .map(String::as_str)
            .collect();
        if !missing.is_empty() {
            return Err(BatchError::InvalidParameters(format!(
                "missing required keys: {}",
                missing.join(", ")
            )));
        }

        if !self.optional_keys.is_empty() {
            let unexpected: Vec<&str> = parameters
                .keys()
                .filter(|k| !self.required_keys.contains(*k) && !self.optional_keys.contains(*k))
                .map(String::as_str)
                .collect();
            if !unexpected.is_empty() {
                return Err(BatchError::InvalidParameters(format!(
                    "unexpected keys: {}",
                    unexpected.join(", ")
                )));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signature_ignores_insertion_order() {
        let first = JobParameters::builder()
            .add_long("runId", 1)
            .add_string("region", "eu")
            .add_double("ratio", 0.5)
            .build();
        let second = JobParameters::builder()
            .add_double("ratio", 0.5)
            .add_string("region", "eu")
            .add_long("runId", 1)
            .build();

        assert_eq!(first.identifying_signature(), second.identifying_signature());
    }

    #[test]
    fn test_signature_ignores_non_identifying() {
        let base = JobParameters::builder().add_long("runId", 1).build();
        let with_extra = JobParametersBuilder::from_parameters(&base)
            .add_parameter(
                "attempt",
                JobParameter::non_identifying(ParameterValue::Long(7)),
            )
            .build();

        assert_eq!(base.identifying_signature(), with_extra.identifying_signature());
    }

    #[test]
    fn test_signature_distinguishes_types() {
        let long = JobParameters::builder().add_long("id", 1).build();
        let string = JobParameters::builder().add_string("id", "1").build();
        assert_ne!(long.identifying_signature(), string.identifying_signature());
    }

    #[test]
    fn test_parse_and_format() {
        let parameters: JobParameters = "runId(long)=3, region=eu, -ratio(double)=0.25"
            .parse()
            .unwrap();

        assert_eq!(parameters.get_long("runId"), Some(3));
        assert_eq!(parameters.get_string("region"), Some("eu"));
        assert_eq!(parameters.get_double("ratio"), Some(0.25));
        assert!(!parameters.get("ratio").unwrap().identifying);

        let reparsed: JobParameters = parameters.to_string().parse().unwrap();
        assert_eq!(reparsed, parameters);
    }

    #[test]
    fn test_signature_separators_in_values() {
        let packed = JobParameters::builder().add_string("a", "x;b=string:y").build();
        let split = JobParameters::builder()
            .add_string("a", "x")
            .add_string("b", "y")
            .build();
        assert_ne!(packed.identifying_signature(), split.identifying_signature());

        let shifted = JobParameters::builder().add_string("a:1", "x").build();
        let plain = JobParameters::builder().add_string("a", "1:x").build();
        assert_ne!(shifted.identifying_signature(), plain.identifying_signature());
    }

    #[test]
    fn test_format_escapes_separators() {
        let parameters = JobParameters::builder()
            .add_string("input.file", "a,b.csv")
            .add_string("filter", r"status=open\closed")
            .add_string("-weird(key)", "x")
            .add_parameter(
                "note",
                JobParameter::non_identifying(ParameterValue::String("one, two".to_string())),
            )
            .build();

        let rendered = parameters.to_string();
        assert!(rendered.contains(r"input.file(string)=a\,b.csv"));

        let reparsed: JobParameters = rendered.parse().unwrap();
        assert_eq!(reparsed, parameters);
        assert_eq!(reparsed.get_string("input.file"), Some("a,b.csv"));
        assert!(!reparsed.get("note").unwrap().identifying);
    }

    #[test]
    fn test_parse_rejects_bad_values() {
        assert!("runId(long)=abc".parse::<JobParameters>().is_err());
        assert!("runId(uuid)=1".parse::<JobParameters>().is_err());
        assert!("novalue".parse::<JobParameters>().is_err());
    }

    #[test]
    fn test_run_id_incrementer() {
        let incrementer = RunIdIncrementer::new();
        let first = incrementer.get_next(None);
        assert_eq!(first.get_long("run.id"), Some(1));

        let previous = JobParameters::builder()
            .add_long("run.id", 41)
            .add_string("region", "eu")
            .build();
        let next = incrementer.get_next(Some(&previous));
        assert_eq!(next.get_long("run.id"), Some(42));
        assert_eq!(next.get_string("region"), Some("eu"));
    }

    #[test]
    fn test_default_validator() {
        let validator = DefaultJobParametersValidator::new(["input"], ["run.id"]);

        let ok = JobParameters::builder()
            .add_string("input", "orders.csv")
            .add_long("run.id", 1)
            .build();
        assert!(validator.validate(&ok).is_ok());

        let missing = JobParameters::builder().add_long("run.id", 1).build();
        assert!(matches!(
            validator.validate(&missing),
            Err(BatchError::InvalidParameters(_))
        ));

        let unexpected = JobParameters::builder()
            .add_string("input", "orders.csv")
            .add_string("extra", "x")
            .build();
        assert!(validator.validate(&unexpected).is_err());
    }
}
