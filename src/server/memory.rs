//! In-memory database service.
//!
//! Serves canned results registered per statement text, and evaluates
//! `RETURN` of literals and parameters on its own:
//!
//! ```text
//! RETURN 1, 'a' AS letter, $name, [1, 2.5, null]
//! ```
//!
//! Anything else is a syntax error.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use super::engine::{
    DatabaseService, RecordConsumer, StatementProcessor, StatementResult, TerminationFlag,
};
use crate::bolt::error::{Status, StatusError};
use crate::bolt::packstream::{Value, ValueMap};

/// A prepared result for one statement text.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CannedResult {
    pub fields: Vec<String>,
    pub records: Vec<Vec<Value>>,
    /// Reported through `on_metadata` after the last record.
    pub metadata: ValueMap,
}

impl CannedResult {
    pub fn new(fields: Vec<&str>) -> Self {
        Self {
            fields: fields.into_iter().map(str::to_string).collect(),
            records: Vec::new(),
            metadata: ValueMap::new(),
        }
    }

    pub fn with_record(mut self, record: Vec<Value>) -> Self {
        self.records.push(record);
        self
    }

    pub fn with_metadata(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }
}

#[derive(Debug, Clone)]
enum Canned {
    Rows(CannedResult),
    Failure(StatusError),
}

type Statements = Arc<RwLock<HashMap<String, Canned>>>;

/// Database service keeping everything in memory.
#[derive(Debug, Clone)]
pub struct InMemoryDatabase {
    databases: HashSet<String>,
    statements: Statements,
}

impl Default for InMemoryDatabase {
    fn default() -> Self {
        Self::new(["neo4j", "system"])
    }
}

impl InMemoryDatabase {
    /// Create a service hosting the named databases.
    pub fn new<I, S>(databases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            databases: databases.into_iter().map(Into::into).collect(),
            statements: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn add_database(&mut self, name: impl Into<String>) {
        self.databases.insert(name.into());
    }

    /// Register the result returned for `statement`.
    pub fn register(&self, statement: &str, result: CannedResult) {
        self.statements
            .write()
            .insert(statement.trim().to_string(), Canned::Rows(result));
    }

    /// Make `statement` fail on RUN with `error`.
    pub fn register_failure(&self, statement: &str, error: StatusError) {
        self.statements
            .write()
            .insert(statement.trim().to_string(), Canned::Failure(error));
    }

    pub fn with_result(self, statement: &str, result: CannedResult) -> Self {
        self.register(statement, result);
        self
    }
}

impl DatabaseService for InMemoryDatabase {
    fn version(&self) -> &str {
        concat!("in-memory/", env!("CARGO_PKG_VERSION"))
    }

    fn open_statement_processor(
        &self,
        database: &str,
        principal: &str,
        termination: TerminationFlag,
    ) -> Result<Box<dyn StatementProcessor>, StatusError> {
        if !self.databases.contains(database) {
            return Err(StatusError::new(
                Status::DatabaseNotFound,
                format!("Database does not exist. Database name: '{}'.", database),
            ));
        }
        debug!(database, principal, "statement processor opened");
        Ok(Box::new(MemoryStatementProcessor {
            database: database.to_string(),
            statements: Arc::clone(&self.statements),
            termination,
            pending: None,
        }))
    }
}

struct MemoryStatementProcessor {
    database: String,
    statements: Statements,
    termination: TerminationFlag,
    pending: Option<CannedResult>,
}

impl StatementProcessor for MemoryStatementProcessor {
    fn database(&self) -> &str {
        &self.database
    }

    fn run(&mut self, statement: &str, parameters: &ValueMap) -> Result<StatementResult, StatusError> {
        if self.termination.is_terminated() {
            return Err(TerminationFlag::terminated_error());
        }
        let canned = self.statements.read().get(statement.trim()).cloned();
        let result = match canned {
            Some(Canned::Rows(result)) => result,
            Some(Canned::Failure(error)) => return Err(error),
            None => evaluate_return(statement, parameters)?,
        };
        let fields = result.fields.clone();
        self.pending = Some(result);
        Ok(StatementResult { fields })
    }

    fn stream_result(&mut self, consumer: &mut dyn RecordConsumer) -> Result<(), StatusError> {
        let result = self.pending.take().ok_or_else(|| {
            StatusError::new(Status::Invalid, "There is no result to consume.")
        })?;
        for record in result.records {
            if self.termination.is_terminated() {
                return Err(TerminationFlag::terminated_error());
            }
            consumer.on_record(record)?;
        }
        if !result.metadata.contains_key("type") {
            consumer.on_metadata("type", Value::from("r"));
        }
        for (key, value) in result.metadata {
            consumer.on_metadata(&key, value);
        }
        Ok(())
    }

    fn reset(&mut self) -> Result<(), StatusError> {
        self.pending = None;
        Ok(())
    }
}

// ============================================================================
// RETURN evaluation
// ============================================================================

fn syntax_error(message: impl Into<String>) -> StatusError {
    StatusError::new(Status::SyntaxError, message)
}

fn evaluate_return(statement: &str, parameters: &ValueMap) -> Result<CannedResult, StatusError> {
    let text = statement.trim();
    let body = text
        .get(..7)
        .filter(|head| head.eq_ignore_ascii_case("RETURN "))
        .map(|_| text[7..].trim())
        .ok_or_else(|| syntax_error(format!("Invalid input '{}'", text)))?;

    let mut fields = Vec::new();
    let mut record = Vec::new();
    for item in split_top_level(body)? {
        let (expr, alias) = split_alias(item);
        record.push(parse_expression(expr, parameters)?);
        fields.push(alias.unwrap_or(expr).to_string());
    }
    if fields.is_empty() {
        return Err(syntax_error("RETURN needs at least one expression"));
    }
    Ok(CannedResult {
        fields,
        records: vec![record],
        metadata: ValueMap::new(),
    })
}

/// Split on commas outside quotes and brackets.
fn split_top_level(text: &str) -> Result<Vec<&str>, StatusError> {
    let mut items = Vec::new();
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut start = 0;
    for (i, c) in text.char_indices() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '\'' | '"') => quote = Some(c),
            (None, '[') => depth += 1,
            (None, ']') => {
                depth = depth
                    .checked_sub(1)
                    .ok_or_else(|| syntax_error("Unbalanced ']'"))?
            }
            (None, ',') if depth == 0 => {
                items.push(text[start..i].trim());
                start = i + 1;
            }
            _ => {}
        }
    }
    if quote.is_some() {
        return Err(syntax_error("Unterminated string literal"));
    }
    if depth != 0 {
        return Err(syntax_error("Unbalanced '['"));
    }
    let last = text[start..].trim();
    if !last.is_empty() || !items.is_empty() {
        items.push(last);
    }
    if items.iter().any(|item| item.is_empty()) {
        return Err(syntax_error("Empty expression"));
    }
    Ok(items)
}

fn split_alias(item: &str) -> (&str, Option<&str>) {
    let lower = item.to_ascii_lowercase();
    match lower.rfind(" as ") {
        Some(pos) => {
            let alias = item[pos + 4..].trim();
            let is_identifier = !alias.is_empty()
                && alias.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
            if is_identifier {
                (item[..pos].trim(), Some(alias))
            } else {
                (item, None)
            }
        }
        None => (item, None),
    }
}

fn parse_expression(expr: &str, parameters: &ValueMap) -> Result<Value, StatusError> {
    let expr = expr.trim();
    if let Some(name) = expr.strip_prefix('$') {
        return parameters.get(name).cloned().ok_or_else(|| {
            StatusError::new(
                Status::ParameterMissing,
                format!("Expected parameter(s): {}", name),
            )
        });
    }
    if let Some(inner) = expr.strip_prefix('[').and_then(|e| e.strip_suffix(']')) {
        let inner = inner.trim();
        if inner.is_empty() {
            return Ok(Value::List(Vec::new()));
        }
        return split_top_level(inner)?
            .into_iter()
            .map(|item| parse_expression(item, parameters))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::List);
    }
    for quote in ['\'', '"'] {
        if expr.len() >= 2 && expr.starts_with(quote) && expr.ends_with(quote) {
            return Ok(Value::String(expr[1..expr.len() - 1].to_string()));
        }
    }
    match expr.to_ascii_lowercase().as_str() {
        "null" => return Ok(Value::Null),
        "true" => return Ok(Value::Boolean(true)),
        "false" => return Ok(Value::Boolean(false)),
        _ => {}
    }
    if let Ok(i) = expr.parse::<i64>() {
        return Ok(Value::Integer(i));
    }
    if let Ok(f) = expr.parse::<f64>() {
        if expr.chars().any(|c| c.is_ascii_digit()) {
            return Ok(Value::Float(f));
        }
    }
    Err(syntax_error(format!("Invalid input '{}'", expr)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Collect {
        records: Vec<Vec<Value>>,
        metadata: ValueMap,
    }

    impl RecordConsumer for Collect {
        fn on_record(&mut self, fields: Vec<Value>) -> Result<(), StatusError> {
            self.records.push(fields);
            Ok(())
        }

        fn on_metadata(&mut self, key: &str, value: Value) {
            self.metadata.insert(key.to_string(), value);
        }
    }

    fn processor(db: &InMemoryDatabase) -> Box<dyn StatementProcessor> {
        db.open_statement_processor("neo4j", "tester", TerminationFlag::new())
            .unwrap()
    }

    #[test]
    fn test_return_literals() {
        let db = InMemoryDatabase::default();
        let mut p = processor(&db);
        let mut params = ValueMap::new();
        params.insert("name".to_string(), Value::from("Ann"));

        let result = p
            .run("RETURN 1, 'a, b' AS text, $name, [1, 2.5, null], true", &params)
            .unwrap();
        assert_eq!(result.fields, vec!["1", "text", "$name", "[1, 2.5, null]", "true"]);

        let mut out = Collect::default();
        p.stream_result(&mut out).unwrap();
        assert_eq!(
            out.records,
            vec![vec![
                Value::Integer(1),
                Value::from("a, b"),
                Value::from("Ann"),
                Value::List(vec![Value::Integer(1), Value::Float(2.5), Value::Null]),
                Value::Boolean(true),
            ]]
        );
        assert_eq!(out.metadata.get("type"), Some(&Value::from("r")));
    }

    #[test]
    fn test_missing_parameter() {
        let db = InMemoryDatabase::default();
        let err = processor(&db).run("RETURN $x", &ValueMap::new()).unwrap_err();
        assert_eq!(err.status, Status::ParameterMissing);
    }

    #[test]
    fn test_syntax_error() {
        let db = InMemoryDatabase::default();
        let mut p = processor(&db);
        assert_eq!(
            p.run("MATCH (n) RETURN n", &ValueMap::new()).unwrap_err().status,
            Status::SyntaxError
        );
        assert_eq!(
            p.run("RETURN 'open", &ValueMap::new()).unwrap_err().status,
            Status::SyntaxError
        );
        assert_eq!(
            p.run("RETURN ", &ValueMap::new()).unwrap_err().status,
            Status::SyntaxError
        );
    }

    #[test]
    fn test_canned_result_and_failure() {
        let db = InMemoryDatabase::default().with_result(
            "MATCH (n) RETURN n.name",
            CannedResult::new(vec!["n.name"])
                .with_record(vec![Value::from("a")])
                .with_record(vec![Value::from("b")])
                .with_metadata("type", "r"),
        );
        db.register_failure("BOOM", StatusError::new(Status::ExecutionFailed, "boom"));

        let mut p = processor(&db);
        p.run("MATCH (n) RETURN n.name", &ValueMap::new()).unwrap();
        let mut out = Collect::default();
        p.stream_result(&mut out).unwrap();
        assert_eq!(out.records.len(), 2);

        assert_eq!(
            p.run("BOOM", &ValueMap::new()).unwrap_err().status,
            Status::ExecutionFailed
        );
    }

    #[test]
    fn test_unknown_database() {
        let db = InMemoryDatabase::default();
        let err = db
            .open_statement_processor("nope", "tester", TerminationFlag::new())
            .err()
            .unwrap();
        assert_eq!(err.status, Status::DatabaseNotFound);
    }

    #[test]
    fn test_termination_stops_stream() {
        let db = InMemoryDatabase::default();
        let flag = TerminationFlag::new();
        let mut p = db
            .open_statement_processor("neo4j", "tester", flag.clone())
            .unwrap();
        p.run("RETURN 1", &ValueMap::new()).unwrap();
        flag.terminate();
        let err = p.stream_result(&mut Collect::default()).unwrap_err();
        assert!(err.is_client_disconnect());
    }

    #[test]
    fn test_reset_drops_pending() {
        let db = InMemoryDatabase::default();
        let mut p = processor(&db);
        p.run("RETURN 1", &ValueMap::new()).unwrap();
        p.reset().unwrap();
        assert!(p.stream_result(&mut Collect::default()).is_err());
    }
}
