//! Transaction requests

use crate::error::{SchedulerError, SchedulerResult};
use crate::function::{Condition, Function, OutputSlot, SuccessCounter};
use crate::types::AccessPattern;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use tpg_primitives::{Bid, PrimaryKey, RecordKey, Value};
use tpg_storage::TableCatalog;

/// One operation of a transaction, as submitted
///
/// Built with a constructor and `with_*` setters:
///
/// ```ignore
/// let success = SuccessCounter::new();
/// let req = Request::new(Bid(7), AccessPattern::ReadWriteCond, "accounts", PrimaryKey(1))
///     .with_function(Dec(Value::Long(30)))
///     .with_condition(Condition::greater_than(30))
///     .with_source("accounts", PrimaryKey(1))
///     .with_success(success.clone());
/// ```
#[derive(Clone)]
pub struct Request {
    /// Transaction batch id
    pub bid: Bid,
    /// Access pattern
    pub pattern: AccessPattern,
    /// Destination table
    pub table: String,
    /// Destination key
    pub key: PrimaryKey,
    /// Function applied to the destination
    pub function: Option<Arc<dyn Function>>,
    /// Guard on the source value
    pub condition: Option<Condition>,
    /// Source records read
    pub sources: Vec<(String, PrimaryKey)>,
    /// Shared success counter
    pub success: Option<SuccessCounter>,
    /// Slot receiving a read result
    pub output: Option<OutputSlot>,
    /// Static value for write-only requests
    pub value: Option<Value>,
}

impl Request {
    /// Create a request with no optional fields
    pub fn new(bid: Bid, pattern: AccessPattern, table: impl Into<String>, key: PrimaryKey) -> Self {
        Self {
            bid,
            pattern,
            table: table.into(),
            key,
            function: None,
            condition: None,
            sources: Vec::new(),
            success: None,
            output: None,
            value: None,
        }
    }

    /// Overwrite a record with a static value
    pub fn write_only(bid: Bid, table: impl Into<String>, key: PrimaryKey, value: impl Into<Value>) -> Self {
        Self::new(bid, AccessPattern::WriteOnly, table, key).with_value(value)
    }

    /// Unconditional read-modify-write
    pub fn read_write(
        bid: Bid,
        table: impl Into<String>,
        key: PrimaryKey,
        function: impl Function + 'static,
    ) -> Self {
        Self::new(bid, AccessPattern::ReadWrite, table, key).with_function(function)
    }

    /// Set the function
    pub fn with_function(mut self, function: impl Function + 'static) -> Self {
        self.function = Some(Arc::new(function));
        self
    }

    /// Set the guard
    pub fn with_condition(mut self, condition: Condition) -> Self {
        self.condition = Some(condition);
        self
    }

    /// Add a source record
    pub fn with_source(mut self, table: impl Into<String>, key: PrimaryKey) -> Self {
        self.sources.push((table.into(), key));
        self
    }

    /// Set the success counter
    pub fn with_success(mut self, success: SuccessCounter) -> Self {
        self.success = Some(success);
        self
    }

    /// Set the output slot
    pub fn with_output(mut self, output: OutputSlot) -> Self {
        self.output = Some(output);
        self
    }

    /// Set the static value
    pub fn with_value(mut self, value: impl Into<Value>) -> Self {
        self.value = Some(value.into());
        self
    }

    /// Check the pattern's mandatory fields
    pub fn validate(&self) -> SchedulerResult<()> {
        let missing = |field: &str| {
            Err(SchedulerError::InvalidRequest(format!(
                "{} request on {}:{} missing {}",
                self.pattern.name(),
                self.table,
                self.key,
                field
            )))
        };
        let needs_function = !matches!(self.pattern, AccessPattern::WriteOnly);
        if needs_function && self.function.is_none() {
            return missing("function");
        }
        match self.pattern {
            AccessPattern::WriteOnly => {
                if self.value.is_none() {
                    return missing("value");
                }
            }
            AccessPattern::ReadWrite => {}
            AccessPattern::ReadWriteRead => {
                if self.output.is_none() {
                    return missing("output");
                }
            }
            AccessPattern::ReadWriteCond | AccessPattern::ReadWriteCondRead => {
                if self.condition.is_none() {
                    return missing("condition");
                }
                if self.sources.is_empty() {
                    return missing("source");
                }
                if self.success.is_none() {
                    return missing("success counter");
                }
                if self.pattern == AccessPattern::ReadWriteCondRead && self.output.is_none() {
                    return missing("output");
                }
            }
            AccessPattern::ReadWriteCondReadN => {
                if self.sources.is_empty() {
                    return missing("source");
                }
                if self.success.is_none() {
                    return missing("success counter");
                }
                if self.output.is_none() {
                    return missing("output");
                }
            }
        }
        Ok(())
    }
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("bid", &self.bid)
            .field("pattern", &self.pattern)
            .field("table", &self.table)
            .field("key", &self.key)
            .field("function", &self.function.as_ref().map(|func| func.name()))
            .field("sources", &self.sources)
            .finish()
    }
}

/// A request with its records resolved against the catalogue
#[derive(Debug)]
pub(crate) struct ResolvedRequest {
    pub key: RecordKey,
    pub sources: Vec<RecordKey>,
    pub request: Request,
}

/// Validate a transaction and resolve its records
///
/// Every request must carry the same bid and write a distinct record.
/// Sources are deduplicated in declaration order.
pub(crate) fn resolve_transaction(
    catalog: &TableCatalog,
    requests: Vec<Request>,
) -> SchedulerResult<Vec<ResolvedRequest>> {
    let bid = match requests.first() {
        Some(first) => first.bid,
        None => return Ok(Vec::new()),
    };
    let mut written = HashSet::with_capacity(requests.len());
    let mut resolved = Vec::with_capacity(requests.len());
    for request in requests {
        request.validate()?;
        if request.bid != bid {
            return Err(SchedulerError::InvalidRequest(format!(
                "transaction mixes bids {} and {}",
                bid, request.bid
            )));
        }
        let key = resolve_key(catalog, &request.table, request.key)?;
        if !written.insert(key) {
            return Err(SchedulerError::InvalidRequest(format!(
                "transaction {} writes {} twice",
                bid, key
            )));
        }
        let mut sources: Vec<RecordKey> = Vec::with_capacity(request.sources.len());
        for (table, source) in &request.sources {
            let source = resolve_key(catalog, table, *source)?;
            if !sources.contains(&source) {
                sources.push(source);
            }
        }
        resolved.push(ResolvedRequest {
            key,
            sources,
            request,
        });
    }
    Ok(resolved)
}

pub(crate) fn resolve_key(
    catalog: &TableCatalog,
    table: &str,
    key: PrimaryKey,
) -> SchedulerResult<RecordKey> {
    let table_id = catalog
        .resolve(table)
        .map_err(|_| SchedulerError::UnknownTable(table.to_string()))?;
    Ok(RecordKey::new(table_id, key))
}
