use std::sync::{Arc, Mutex};

// other keepers use HashSet or HashMap
use core::hash::BuildHasherDefault;
use seahash::SeaHasher;

use chrono::{DateTime, Utc};
use rusqlite::{Connection, Transaction};
use tracing::{debug, info};

use crate::association::AssociationGraph;
use crate::clock::{Clock, SystemClock};
use crate::error::{CrmockError, Result};
use crate::persist::{PersistenceMode, Persistor};
use crate::property::PropertyCatalog;
use crate::record::RecordStore;
use crate::registry::{self, ObjectType, TypeKeeper, TypeRegistry};
use crate::search::SearchCompiler;
use crate::seed;

pub type OtherHasher = BuildHasherDefault<SeaHasher>;

// This sets up the database with the necessary structures
pub struct Database {
    // the single serialized connection every operation funnels through
    pub persistor: Arc<Mutex<Persistor>>,
    // owns the object types, restored from the persisted ones on startup
    type_keeper: Arc<Mutex<TypeKeeper>>,
    clock: Arc<dyn Clock>,
}

impl Database {
    pub fn new(mode: PersistenceMode) -> Result<Self> {
        Self::with_clock(mode, Arc::new(SystemClock::new()))
    }

    pub fn with_clock(mode: PersistenceMode, clock: Arc<dyn Clock>) -> Result<Self> {
        let mut persistor = Persistor::new(&mode)?;
        let now = clock.now();
        let mut type_keeper = TypeKeeper::new();
        {
            let tx = persistor.transaction()?;
            seed::seed(&tx, &now)?;
            for object_type in registry::restore(&tx)? {
                type_keeper.keep(object_type);
            }
            tx.commit()?;
        }
        info!(?mode, types = type_keeper.len(), "database ready");
        Ok(Self {
            persistor: Arc::new(Mutex::new(persistor)),
            type_keeper: Arc::new(Mutex::new(type_keeper)),
            clock,
        })
    }

    pub fn types(&self) -> TypeRegistry<'_> {
        TypeRegistry::new(self)
    }
    pub fn properties(&self) -> PropertyCatalog<'_> {
        PropertyCatalog::new(self)
    }
    pub fn records(&self) -> RecordStore<'_> {
        RecordStore::new(self)
    }
    pub fn associations(&self) -> AssociationGraph<'_> {
        AssociationGraph::new(self)
    }
    pub fn search(&self) -> SearchCompiler<'_> {
        SearchCompiler::new(self)
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }
    pub fn type_keeper(&self) -> Arc<Mutex<TypeKeeper>> {
        self.type_keeper.clone()
    }

    /// Name first, then id; archived types never resolve.
    pub fn resolve(&self, token: &str) -> Result<Arc<ObjectType>> {
        self.type_keeper
            .lock()?
            .resolve(token)
            .ok_or_else(|| CrmockError::not_found(format!("object type {token}")))
    }

    /// Runs `f` against the connection without a transaction.
    pub(crate) fn read<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let persistor = self.persistor.lock()?;
        f(persistor.connection())
    }

    /// Runs `f` inside a transaction that commits only if `f` succeeds.
    pub(crate) fn write<T>(&self, f: impl FnOnce(&Transaction<'_>) -> Result<T>) -> Result<T> {
        self.write_batch(|tx| f(tx))
    }

    /// Like [`Database::write`], but hands out the transaction mutably so
    /// batch items can each run in their own savepoint.
    pub(crate) fn write_batch<T>(
        &self,
        f: impl FnOnce(&mut Transaction<'_>) -> Result<T>,
    ) -> Result<T> {
        let mut persistor = self.persistor.lock()?;
        let mut tx = persistor.transaction()?;
        let result = f(&mut tx)?;
        tx.commit()?;
        debug!("transaction committed");
        Ok(result)
    }

    pub fn table_counts(&self) -> Result<Vec<(&'static str, i64)>> {
        self.persistor.lock()?.table_counts()
    }
}
