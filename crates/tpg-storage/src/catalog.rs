//! Table catalogue

use crate::error::{StorageError, StorageResult};
use std::collections::HashMap;
use tpg_primitives::TableId;

/// Ordered set of table names
///
/// The position of a name is its `TableId`.
#[derive(Clone, Debug, Default)]
pub struct TableCatalog {
    names: Vec<String>,
    index: HashMap<String, TableId>,
}

impl TableCatalog {
    /// Create a catalogue from table names
    pub fn new<I, S>(names: I) -> StorageResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut catalog = Self::default();
        for name in names {
            let name = name.into();
            if catalog.index.contains_key(&name) {
                return Err(StorageError::DuplicateTable(name));
            }
            catalog.index.insert(name.clone(), TableId::from(catalog.names.len()));
            catalog.names.push(name);
        }
        Ok(catalog)
    }

    /// Resolve a table name
    pub fn resolve(&self, name: &str) -> StorageResult<TableId> {
        self.index
            .get(name)
            .copied()
            .ok_or_else(|| StorageError::UnknownTable(name.to_string()))
    }

    /// Name of a table
    pub fn name(&self, table: TableId) -> Option<&str> {
        self.names.get(table.index()).map(String::as_str)
    }

    /// Number of tables
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Check if there are no tables
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Iterate over (id, name) pairs in catalogue order
    pub fn iter(&self) -> impl Iterator<Item = (TableId, &str)> {
        self.names
            .iter()
            .enumerate()
            .map(|(i, n)| (TableId::from(i), n.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve() {
        let catalog = TableCatalog::new(["accounts", "book_entries"]).unwrap();
        assert_eq!(catalog.resolve("accounts").unwrap(), TableId(0));
        assert_eq!(catalog.resolve("book_entries").unwrap(), TableId(1));
        assert_eq!(catalog.name(TableId(1)), Some("book_entries"));
        assert_eq!(catalog.len(), 2);
    }

    #[test]
    fn test_unknown_table() {
        let catalog = TableCatalog::new(["accounts"]).unwrap();
        assert!(matches!(
            catalog.resolve("missing"),
            Err(StorageError::UnknownTable(name)) if name == "missing"
        ));
    }

    #[test]
    fn test_duplicate_table() {
        assert!(matches!(
            TableCatalog::new(["a", "b", "a"]),
            Err(StorageError::DuplicateTable(_))
        ));
    }
}
