//! Catalog - the registry of tables known to a database.
//!
//! Maps table ids to the [`HeapFile`] that stores each table and its name.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use crate::common::{Error, Result};
use crate::storage::HeapFile;

struct TableInfo {
    file: Arc<HeapFile>,
    name: String,
}

/// Table registry.
///
/// # Thread Safety
/// Lookups take a shared lock; registering a table takes it exclusively.
#[derive(Default)]
pub struct Catalog {
    tables: RwLock<HashMap<u32, TableInfo>>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a table, returning its id.
    ///
    /// Adding a file whose id is already registered, or a name already in
    /// use, replaces the earlier entry.
    pub fn add_table(&self, file: Arc<HeapFile>, name: impl Into<String>) -> u32 {
        let name = name.into();
        let table_id = file.id();

        let mut tables = self.tables.write();
        tables.retain(|&id, info| id == table_id || info.name != name);
        debug!(table = table_id, name = %name, "catalog.add_table");
        tables.insert(table_id, TableInfo { file, name });
        table_id
    }

    /// Heap file of a table.
    ///
    /// # Errors
    /// `Error::TableNotFound` if no such table is registered.
    pub fn database_file(&self, table_id: u32) -> Result<Arc<HeapFile>> {
        self.tables
            .read()
            .get(&table_id)
            .map(|info| Arc::clone(&info.file))
            .ok_or(Error::TableNotFound { table_id })
    }

    pub fn table_name(&self, table_id: u32) -> Result<String> {
        self.tables
            .read()
            .get(&table_id)
            .map(|info| info.name.clone())
            .ok_or(Error::TableNotFound { table_id })
    }

    /// Id of the table called `name`.
    pub fn table_id(&self, name: &str) -> Result<u32> {
        self.tables
            .read()
            .iter()
            .find(|(_, info)| info.name == name)
            .map(|(&id, _)| id)
            .ok_or_else(|| Error::TableNameNotFound {
                name: name.to_string(),
            })
    }

    /// Ids of all registered tables, ascending.
    pub fn table_ids(&self) -> Vec<u32> {
        let mut ids: Vec<u32> = self.tables.read().keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Forget every table.
    pub fn clear(&self) {
        self.tables.write().clear();
    }
}

impl std::fmt::Debug for Catalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Catalog")
            .field("tables", &self.table_ids())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn heap_file(dir: &tempfile::TempDir, name: &str) -> Arc<HeapFile> {
        Arc::new(HeapFile::open(dir.path().join(name), 8, 256).unwrap())
    }

    #[test]
    fn test_add_and_lookup() {
        let dir = tempdir().unwrap();
        let catalog = Catalog::new();

        let file = heap_file(&dir, "users.dat");
        let id = catalog.add_table(Arc::clone(&file), "users");

        assert_eq!(id, file.id());
        assert_eq!(catalog.table_name(id).unwrap(), "users");
        assert_eq!(catalog.table_id("users").unwrap(), id);
        assert_eq!(catalog.database_file(id).unwrap().id(), id);
    }

    #[test]
    fn test_unknown_table() {
        let catalog = Catalog::new();
        assert!(matches!(
            catalog.database_file(5),
            Err(Error::TableNotFound { table_id: 5 })
        ));
        assert!(matches!(
            catalog.table_id("missing"),
            Err(Error::TableNameNotFound { .. })
        ));
    }

    #[test]
    fn test_name_reuse_replaces_table() {
        let dir = tempdir().unwrap();
        let catalog = Catalog::new();

        let old = catalog.add_table(heap_file(&dir, "a.dat"), "t");
        let new = catalog.add_table(heap_file(&dir, "b.dat"), "t");

        assert_eq!(catalog.table_id("t").unwrap(), new);
        assert!(catalog.database_file(old).is_err());
        assert_eq!(catalog.table_ids(), vec![new]);
    }

    #[test]
    fn test_clear() {
        let dir = tempdir().unwrap();
        let catalog = Catalog::new();
        catalog.add_table(heap_file(&dir, "a.dat"), "a");
        catalog.add_table(heap_file(&dir, "b.dat"), "b");
        assert_eq!(catalog.table_ids().len(), 2);

        catalog.clear();
        assert!(catalog.table_ids().is_empty());
    }
}
