//! Expression and domain trees, and their JSON wire form.
//!
//! Expressions are stored configuration: a contribution can attach a dynamic
//! default, a constraint, or a filter domain to an attribute without embedding
//! executable code. The trees here are immutable once constructed, and the
//! codec ([`encode`]/[`decode`]) is kept strictly separate from evaluation so
//! the representation can cross a process boundary.
//!
//! Wire shapes:
//! - literals are bare JSON values (`42`, `"x"`, `true`, `null`, arrays,
//!   objects without an `"op"` key)
//! - variable references are `{"op": "eval", "path": "a.b"}`
//! - operator applications are `{"op": "<tag>", "args": [...]}`
//! - datetimes are `{"op": "datetime", "value": "<RFC 3339>"}`
//! - domains are ordered arrays of `[path, operator, operand]` clauses or
//!   nested arrays led by an `"AND"`/`"OR"` combinator string

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{json, Map as JsonMap, Value as JsonValue};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AstError {
    #[error("cannot decode expression: {0}")]
    Decode(String),
    #[error("cannot decode domain: {0}")]
    DecodeDomain(String),
}

pub type AstResult<T> = Result<T, AstError>;

/// Dotted lookup path into the execution context, e.g. `party.address.city`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct KeyPath(pub Vec<String>);

impl KeyPath {
    pub fn parse(path: &str) -> Self {
        KeyPath(path.split('.').map(str::to_string).collect())
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }
}

impl fmt::Display for KeyPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.join("."))
    }
}

impl From<&str> for KeyPath {
    fn from(path: &str) -> Self {
        KeyPath::parse(path)
    }
}

/// Operator tags. The strum serialization is the wire tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumString)]
pub enum Operator {
    #[strum(serialize = "+")]
    Add,
    #[strum(serialize = "-")]
    Subtract,
    #[strum(serialize = "*")]
    Multiply,
    #[strum(serialize = "/")]
    Divide,
    #[strum(serialize = "=")]
    Equal,
    #[strum(serialize = "!=")]
    NotEqual,
    #[strum(serialize = "<")]
    LessThan,
    #[strum(serialize = ">")]
    GreaterThan,
    #[strum(serialize = "<=")]
    LessThanEqual,
    #[strum(serialize = ">=")]
    GreaterThanEqual,
    #[strum(serialize = "and")]
    And,
    #[strum(serialize = "or")]
    Or,
    #[strum(serialize = "not")]
    Not,
    #[strum(serialize = "bool")]
    Bool,
    #[strum(serialize = "in")]
    In,
    #[strum(serialize = "if")]
    If,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub enum Literal {
    Integer(i64),
    Float(f64),
    String(String),
    Boolean(bool),
    DateTime(DateTime<Utc>),
    List(Vec<Literal>),
    Map(BTreeMap<String, Literal>),
    #[default]
    Null,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    Literal(Literal),
    /// Variable reference resolved against the current context.
    Eval(KeyPath),
    /// Operator application. Boolean reduction operators (`and`, `or`) take
    /// any number of operands; the rest validate arity at evaluation time.
    Op { op: Operator, args: Vec<Expression> },
}

impl Expression {
    pub fn literal(literal: impl Into<Literal>) -> Self {
        Expression::Literal(literal.into())
    }

    pub fn eval(path: &str) -> Self {
        Expression::Eval(KeyPath::parse(path))
    }

    pub fn op(op: Operator, args: Vec<Expression>) -> Self {
        Expression::Op { op, args }
    }
}

impl From<i64> for Literal {
    fn from(value: i64) -> Self {
        Literal::Integer(value)
    }
}

impl From<f64> for Literal {
    fn from(value: f64) -> Self {
        Literal::Float(value)
    }
}

impl From<&str> for Literal {
    fn from(value: &str) -> Self {
        Literal::String(value.to_string())
    }
}

impl From<String> for Literal {
    fn from(value: String) -> Self {
        Literal::String(value)
    }
}

impl From<bool> for Literal {
    fn from(value: bool) -> Self {
        Literal::Boolean(value)
    }
}

impl From<DateTime<Utc>> for Literal {
    fn from(value: DateTime<Utc>) -> Self {
        Literal::DateTime(value)
    }
}

impl From<Literal> for Expression {
    fn from(value: Literal) -> Self {
        Expression::Literal(value)
    }
}

impl From<i64> for Expression {
    fn from(value: i64) -> Self {
        Expression::Literal(value.into())
    }
}

impl From<f64> for Expression {
    fn from(value: f64) -> Self {
        Expression::Literal(value.into())
    }
}

impl From<&str> for Expression {
    fn from(value: &str) -> Self {
        Expression::Literal(value.into())
    }
}

impl From<String> for Expression {
    fn from(value: String) -> Self {
        Expression::Literal(value.into())
    }
}

impl From<bool> for Expression {
    fn from(value: bool) -> Self {
        Expression::Literal(value.into())
    }
}

impl From<DateTime<Utc>> for Expression {
    fn from(value: DateTime<Utc>) -> Self {
        Expression::Literal(value.into())
    }
}

/// Produce the transportable representation of an expression.
pub fn encode(expr: &Expression) -> JsonValue {
    match expr {
        Expression::Literal(literal) => encode_literal(literal),
        Expression::Eval(path) => json!({"op": "eval", "path": path.to_string()}),
        Expression::Op { op, args } => json!({
            "op": op.to_string(),
            "args": args.iter().map(encode).collect::<Vec<_>>(),
        }),
    }
}

fn encode_literal(literal: &Literal) -> JsonValue {
    match literal {
        Literal::Integer(i) => json!(i),
        Literal::Float(f) => json!(f),
        Literal::String(s) => json!(s),
        Literal::Boolean(b) => json!(b),
        Literal::DateTime(dt) => json!({"op": "datetime", "value": dt.to_rfc3339()}),
        Literal::List(items) => JsonValue::Array(items.iter().map(encode_literal).collect()),
        Literal::Map(entries) => {
            let map: JsonMap<String, JsonValue> = entries
                .iter()
                .map(|(key, value)| (key.clone(), encode_literal(value)))
                .collect();
            // A bare object is read back as a literal map unless it carries an
            // "op" key; maps that do are wrapped to keep the codec invertible.
            if map.contains_key("op") {
                json!({"op": "map", "value": JsonValue::Object(map)})
            } else {
                JsonValue::Object(map)
            }
        }
        Literal::Null => JsonValue::Null,
    }
}

/// Exact inverse of [`encode`].
pub fn decode(value: &JsonValue) -> AstResult<Expression> {
    match value {
        JsonValue::Object(map) => match map.get("op") {
            Some(JsonValue::String(tag)) => decode_node(tag, map),
            _ => Ok(Expression::Literal(decode_literal(value)?)),
        },
        other => Ok(Expression::Literal(decode_literal(other)?)),
    }
}

fn decode_node(tag: &str, map: &JsonMap<String, JsonValue>) -> AstResult<Expression> {
    match tag {
        "eval" => {
            let path = map
                .get("path")
                .and_then(JsonValue::as_str)
                .ok_or_else(|| AstError::Decode("eval node without a string path".to_string()))?;
            Ok(Expression::Eval(KeyPath::parse(path)))
        }
        "datetime" | "map" => Ok(Expression::Literal(decode_literal_node(tag, map)?)),
        _ => {
            let op = tag
                .parse::<Operator>()
                .map_err(|_| AstError::Decode(format!("unknown operator tag: {}", tag)))?;
            let args = map
                .get("args")
                .and_then(JsonValue::as_array)
                .ok_or_else(|| {
                    AstError::Decode(format!("operator {} without an args array", tag))
                })?;
            let args = args.iter().map(decode).collect::<AstResult<Vec<_>>>()?;
            Ok(Expression::Op { op, args })
        }
    }
}

fn decode_literal_node(tag: &str, map: &JsonMap<String, JsonValue>) -> AstResult<Literal> {
    match tag {
        "datetime" => {
            let raw = map.get("value").and_then(JsonValue::as_str).ok_or_else(|| {
                AstError::Decode("datetime node without a string value".to_string())
            })?;
            let parsed = DateTime::parse_from_rfc3339(raw)
                .map_err(|e| AstError::Decode(format!("invalid datetime {}: {}", raw, e)))?;
            Ok(Literal::DateTime(parsed.with_timezone(&Utc)))
        }
        "map" => {
            let inner = map.get("value").and_then(JsonValue::as_object).ok_or_else(|| {
                AstError::Decode("map node without an object value".to_string())
            })?;
            decode_literal_map(inner)
        }
        _ => Err(AstError::Decode(format!("unknown literal tag: {}", tag))),
    }
}

fn decode_literal_map(map: &JsonMap<String, JsonValue>) -> AstResult<Literal> {
    let entries = map
        .iter()
        .map(|(key, value)| Ok((key.clone(), decode_literal(value)?)))
        .collect::<AstResult<BTreeMap<_, _>>>()?;
    Ok(Literal::Map(entries))
}

fn decode_literal(value: &JsonValue) -> AstResult<Literal> {
    match value {
        JsonValue::Null => Ok(Literal::Null),
        JsonValue::Bool(b) => Ok(Literal::Boolean(*b)),
        JsonValue::Number(n) => {
            if let Some(i) = n.as_i64() {
                Ok(Literal::Integer(i))
            } else if let Some(f) = n.as_f64() {
                Ok(Literal::Float(f))
            } else {
                Err(AstError::Decode(format!("unrepresentable number: {}", n)))
            }
        }
        JsonValue::String(s) => Ok(Literal::String(s.clone())),
        JsonValue::Array(items) => {
            let items = items
                .iter()
                .map(decode_literal)
                .collect::<AstResult<Vec<_>>>()?;
            Ok(Literal::List(items))
        }
        JsonValue::Object(map) => match map.get("op") {
            Some(JsonValue::String(tag)) => decode_literal_node(tag, map),
            _ => decode_literal_map(map),
        },
    }
}

impl Serialize for Expression {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        encode(self).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Expression {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = JsonValue::deserialize(deserializer)?;
        decode(&value).map_err(serde::de::Error::custom)
    }
}

/// Combinator between the entries of a nested domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::EnumString)]
pub enum Combinator {
    #[strum(serialize = "AND")]
    And,
    #[strum(serialize = "OR")]
    Or,
}

/// One filter triple. The operator tag is opaque to the kernel: the external
/// query layer interprets it, the kernel only resolves the operand.
#[derive(Debug, Clone, PartialEq)]
pub struct DomainClause {
    pub path: String,
    pub operator: String,
    pub operand: Expression,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DomainEntry {
    Clause(DomainClause),
    Nested {
        combinator: Combinator,
        domain: Domain,
    },
}

/// Ordered filter clauses; top-level entries combine with AND.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Domain(pub Vec<DomainEntry>);

impl Domain {
    pub fn new() -> Self {
        Domain(Vec::new())
    }

    pub fn with_clause(
        mut self,
        path: impl Into<String>,
        operator: impl Into<String>,
        operand: impl Into<Expression>,
    ) -> Self {
        self.0.push(DomainEntry::Clause(DomainClause {
            path: path.into(),
            operator: operator.into(),
            operand: operand.into(),
        }));
        self
    }

    pub fn with_nested(mut self, combinator: Combinator, domain: Domain) -> Self {
        self.0.push(DomainEntry::Nested { combinator, domain });
        self
    }

    pub fn entries(&self) -> &[DomainEntry] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Produce the transportable representation of a domain.
pub fn encode_domain(domain: &Domain) -> JsonValue {
    JsonValue::Array(domain.0.iter().map(encode_entry).collect())
}

fn encode_entry(entry: &DomainEntry) -> JsonValue {
    match entry {
        DomainEntry::Clause(clause) => json!([
            clause.path.clone(),
            clause.operator.clone(),
            encode(&clause.operand),
        ]),
        DomainEntry::Nested { combinator, domain } => {
            let mut items = vec![json!(combinator.to_string())];
            items.extend(domain.0.iter().map(encode_entry));
            JsonValue::Array(items)
        }
    }
}

/// Exact inverse of [`encode_domain`].
pub fn decode_domain(value: &JsonValue) -> AstResult<Domain> {
    let entries = value
        .as_array()
        .ok_or_else(|| AstError::DecodeDomain(format!("expected an array, got {}", value)))?;
    let entries = entries
        .iter()
        .map(decode_entry)
        .collect::<AstResult<Vec<_>>>()?;
    Ok(Domain(entries))
}

fn decode_entry(value: &JsonValue) -> AstResult<DomainEntry> {
    let items = value
        .as_array()
        .ok_or_else(|| AstError::DecodeDomain(format!("expected an array entry, got {}", value)))?;

    // A leading "AND"/"OR" string tags a nested domain. A clause path named
    // exactly AND or OR is not representable; rename such a field instead.
    if let Some(combinator) = items
        .first()
        .and_then(JsonValue::as_str)
        .and_then(|tag| tag.parse::<Combinator>().ok())
    {
        let domain = items[1..]
            .iter()
            .map(decode_entry)
            .collect::<AstResult<Vec<_>>>()?;
        return Ok(DomainEntry::Nested {
            combinator,
            domain: Domain(domain),
        });
    }

    if items.len() == 3 {
        if let (Some(path), Some(operator)) = (items[0].as_str(), items[1].as_str()) {
            return Ok(DomainEntry::Clause(DomainClause {
                path: path.to_string(),
                operator: operator.to_string(),
                operand: decode(&items[2])?,
            }));
        }
    }

    // An untagged sub-array is a nested domain with the default combinator.
    Ok(DomainEntry::Nested {
        combinator: Combinator::And,
        domain: decode_domain(value)?,
    })
}

impl Serialize for Domain {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        encode_domain(self).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Domain {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = JsonValue::deserialize(deserializer)?;
        decode_domain(&value).map_err(serde::de::Error::custom)
    }
}
