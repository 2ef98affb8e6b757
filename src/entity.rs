use crate::error::CodecError;
use crate::p4rt::pipeconf::{CatalogRef, PipelineCatalog};
use rusty_p4_shell_proto::proto::v1 as p4;

pub mod counter;
pub mod table_entry;

pub use counter::{CounterEntry, CounterRecord, CounterValue};
pub use table_entry::{TableEntry, TableEntryBuilder};

pub type ProtoEntity = p4::Entity;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum UpdateType {
    Insert,
    Modify,
    Delete,
}

impl From<UpdateType> for p4::update::Type {
    fn from(update: UpdateType) -> Self {
        match update {
            UpdateType::Insert => p4::update::Type::Insert,
            UpdateType::Modify => p4::update::Type::Modify,
            UpdateType::Delete => p4::update::Type::Delete,
        }
    }
}

pub trait ToEntity {
    fn to_proto_entity(&self, catalog: &PipelineCatalog) -> Result<ProtoEntity, CodecError>;
}

/// Builds entries by symbolic name against one pipeline catalog.
#[derive(Clone, Debug)]
pub struct EntryRepository {
    catalog: CatalogRef,
}

impl EntryRepository {
    pub fn new(catalog: CatalogRef) -> EntryRepository {
        EntryRepository { catalog }
    }

    pub fn catalog(&self) -> &CatalogRef {
        &self.catalog
    }

    /// Starts an entry of `table` running `action`. Both names are resolved
    /// now, so a typo fails here rather than at send time.
    pub fn table_entry(&self, table: &str, action: &str) -> Result<TableEntryBuilder, CodecError> {
        TableEntryBuilder::new(self.catalog.clone(), table, Some(action))
    }

    /// An entry carrying only a key, for deletes and reads.
    pub fn table_entry_without_action(&self, table: &str) -> Result<TableEntryBuilder, CodecError> {
        TableEntryBuilder::new(self.catalog.clone(), table, None)
    }

    pub fn counter_entry(&self, counter: &str) -> Result<CounterEntry, CodecError> {
        let info = self.catalog.counter(counter)?;
        Ok(CounterEntry {
            counter: info.name.clone(),
            size: info.size,
            index: None,
        })
    }
}
