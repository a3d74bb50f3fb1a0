use std::path::Path;
use std::sync::{Arc, Mutex};
use sled::{Db, Tree};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("Database error: {0}")]
    DbError(#[from] sled::Error),

    #[error("Transaction aborted: {0}")]
    TransactionAborted(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Deserialization error: {0}")]
    DeserializationError(String),
}

/// Key-value database backed by sled, with one named tree per record kind.
pub struct Database {
    /// The sled instance
    db: Arc<Db>,

    /// Cache of opened trees
    trees: Arc<Mutex<std::collections::HashMap<String, Tree>>>,
}

impl Database {
    /// Opens (or creates) the database at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, DatabaseError> {
        let db = sled::open(path)?;

        Ok(Self {
            db: Arc::new(db),
            trees: Arc::new(Mutex::new(std::collections::HashMap::new())),
        })
    }

    /// Returns the named tree, opening it on first use.
    pub fn get_tree(&self, name: &str) -> Result<Tree, DatabaseError> {
        {
            let trees = self.trees.lock().unwrap();
            if let Some(tree) = trees.get(name) {
                return Ok(tree.clone());
            }
        }

        let tree = self.db.open_tree(name)?;

        {
            let mut trees = self.trees.lock().unwrap();
            trees.insert(name.to_string(), tree.clone());
        }

        Ok(tree)
    }

    /// Reads a raw value.
    pub fn get(&self, tree: &str, key: &[u8]) -> Result<Option<Vec<u8>>, DatabaseError> {
        let tree = self.get_tree(tree)?;

        match tree.get(key)? {
            Some(value) => Ok(Some(value.to_vec())),
            None => Ok(None),
        }
    }

    /// Writes a raw value. A single-key insert fully replaces the previous
    /// record; callers never observe a partial overwrite.
    pub fn put(&self, tree: &str, key: &[u8], value: &[u8]) -> Result<(), DatabaseError> {
        let tree = self.get_tree(tree)?;
        tree.insert(key, value)?;
        Ok(())
    }

    /// Removes a key.
    pub fn delete(&self, tree: &str, key: &[u8]) -> Result<(), DatabaseError> {
        let tree = self.get_tree(tree)?;
        tree.remove(key)?;
        Ok(())
    }

    /// Iterates key/value pairs under a prefix.
    pub fn scan_prefix(
        &self,
        tree: &str,
        prefix: &[u8],
    ) -> Result<impl Iterator<Item = (Vec<u8>, Vec<u8>)>, DatabaseError> {
        let tree = self.get_tree(tree)?;

        let iter = tree
            .scan_prefix(prefix)
            .filter_map(|res| res.ok())
            .map(|(key, value)| (key.to_vec(), value.to_vec()));

        Ok(iter)
    }

    /// All keys in a tree. Unlike `scan_prefix`, an iteration failure
    /// propagates instead of silently truncating the listing, so a
    /// caller deleting by key can trust the list is complete.
    pub fn keys(&self, tree: &str) -> Result<Vec<Vec<u8>>, DatabaseError> {
        let tree = self.get_tree(tree)?;

        let mut keys = Vec::new();
        for entry in tree.iter() {
            let (key, _) = entry?;
            keys.push(key.to_vec());
        }

        Ok(keys)
    }

    /// Removes the given keys from the given trees in one atomic
    /// transaction. `keys[i]` is removed from `tree_names[i]`'s tree;
    /// either every listed key is gone afterwards or none are.
    pub fn remove_atomically(
        &self,
        tree_names: &[&str],
        keys: &[Vec<Vec<u8>>],
    ) -> Result<(), DatabaseError> {
        use sled::transaction::ConflictableTransactionError;
        use sled::Transactional;

        let trees = tree_names
            .iter()
            .map(|name| self.get_tree(name))
            .collect::<Result<Vec<Tree>, DatabaseError>>()?;
        let tree_refs: Vec<&Tree> = trees.iter().collect();

        let result = tree_refs[..].transaction(|txs| {
            for (tx, tree_keys) in txs.iter().zip(keys.iter()) {
                for key in tree_keys {
                    tx.remove(key.as_slice())?;
                }
            }
            Ok::<(), ConflictableTransactionError<()>>(())
        });

        match result {
            Ok(()) => Ok(()),
            Err(sled::transaction::TransactionError::Storage(e)) => Err(DatabaseError::DbError(e)),
            Err(sled::transaction::TransactionError::Abort(())) => Err(
                DatabaseError::TransactionAborted("multi-tree removal aborted".to_string()),
            ),
        }
    }

    /// Flushes pending writes and clears the tree cache.
    pub fn close(&self) -> Result<(), DatabaseError> {
        {
            let mut trees = self.trees.lock().unwrap();
            trees.clear();
        }

        self.db.flush()?;

        Ok(())
    }

    /// Reads and bincode-decodes a value.
    pub fn get_serialized<T: serde::de::DeserializeOwned>(
        &self,
        tree: &str,
        key: &[u8],
    ) -> Result<Option<T>, DatabaseError> {
        match self.get(tree, key)? {
            Some(value) => bincode::deserialize(&value)
                .map_err(|e| DatabaseError::DeserializationError(e.to_string()))
                .map(Some),
            None => Ok(None),
        }
    }

    /// Bincode-encodes and writes a value.
    pub fn put_serialized<T: serde::Serialize>(
        &self,
        tree: &str,
        key: &[u8],
        value: &T,
    ) -> Result<(), DatabaseError> {
        let data = bincode::serialize(value)
            .map_err(|e| DatabaseError::SerializationError(e.to_string()))?;

        self.put(tree, key, &data)
    }
}

impl Clone for Database {
    fn clone(&self) -> Self {
        Self {
            db: self.db.clone(),
            trees: self.trees.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_db() -> (tempfile::TempDir, Database) {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(dir.path().join("db")).unwrap();
        (dir, db)
    }

    #[test]
    fn test_keys_lists_every_record() {
        let (_dir, db) = new_db();

        db.put("a", b"k1", b"v1").unwrap();
        db.put("a", b"k2", b"v2").unwrap();
        db.put("b", b"k3", b"v3").unwrap();

        let mut keys = db.keys("a").unwrap();
        keys.sort();
        assert_eq!(keys, vec![b"k1".to_vec(), b"k2".to_vec()]);
        assert_eq!(db.keys("b").unwrap(), vec![b"k3".to_vec()]);
        assert!(db.keys("empty").unwrap().is_empty());
    }

    #[test]
    fn test_remove_atomically_clears_listed_keys() {
        let (_dir, db) = new_db();

        db.put("a", b"k1", b"v1").unwrap();
        db.put("a", b"k2", b"v2").unwrap();
        db.put("b", b"k3", b"v3").unwrap();

        let keys = vec![db.keys("a").unwrap(), db.keys("b").unwrap()];
        db.remove_atomically(&["a", "b"], &keys).unwrap();

        assert!(db.keys("a").unwrap().is_empty());
        assert!(db.keys("b").unwrap().is_empty());
    }
}
