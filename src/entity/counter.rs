use crate::entity::{ProtoEntity, ToEntity};
use crate::error::{CodecError, Error, Result};
use crate::p4rt::codec::decode_counter_entry;
use crate::p4rt::pipeconf::PipelineCatalog;
use crate::p4rt::session::Session;
use futures::StreamExt;
use log::debug;
use rusty_p4_shell_proto::proto::v1 as p4;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct CounterValue {
    pub packets: i64,
    pub bytes: i64,
}

impl From<p4::CounterData> for CounterValue {
    fn from(data: p4::CounterData) -> Self {
        CounterValue {
            packets: data.packet_count,
            bytes: data.byte_count,
        }
    }
}

/// One counter cell as returned by a read.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct CounterRecord {
    pub counter: String,
    pub index: Option<i64>,
    pub value: CounterValue,
}

impl Display for CounterRecord {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self.index {
            Some(index) => write!(f, "{}[{}]", self.counter, index)?,
            None => write!(f, "{}", self.counter)?,
        }
        write!(
            f,
            ": {} packets, {} bytes",
            self.value.packets, self.value.bytes
        )
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CounterEntry {
    pub counter: String,
    pub(crate) size: i64,
    pub index: Option<i64>,
}

impl CounterEntry {
    /// Restricts the read to one cell. Without an index every cell is read.
    pub fn with_index(mut self, index: i64) -> std::result::Result<Self, CodecError> {
        if index < 0 || (self.size > 0 && index >= self.size) {
            return Err(CodecError::InvalidValue {
                field: self.counter.clone(),
                value: index.to_string(),
                reason: format!("counter has {} cells", self.size),
            });
        }
        self.index = Some(index);
        Ok(self)
    }

    /// Issues one `Read` and calls `callback` once per returned record.
    /// Returns how many records were delivered.
    pub async fn read<F>(&self, session: &Session, mut callback: F) -> Result<usize>
    where
        F: FnMut(CounterRecord),
    {
        let entity = self.to_proto_entity(session.catalog())?;
        let mut stream = session.read(vec![entity]);
        let mut count = 0;
        while let Some(entity) = stream.next().await {
            match entity?.entity {
                Some(p4::entity::Entity::CounterEntry(entry)) => {
                    let record = decode_counter_entry(&entry, session.catalog())?;
                    debug!(target: "counter", "{}", record);
                    callback(record);
                    count += 1;
                }
                other => {
                    return Err(Error::Codec(CodecError::Decode {
                        what: "counter entry",
                        reason: format!("unexpected entity {:?}", other),
                    }))
                }
            }
        }
        Ok(count)
    }

    pub async fn read_all(&self, session: &Session) -> Result<Vec<CounterRecord>> {
        let mut records = vec![];
        self.read(session, |r| records.push(r)).await?;
        Ok(records)
    }
}

impl ToEntity for CounterEntry {
    fn to_proto_entity(&self, catalog: &PipelineCatalog) -> std::result::Result<ProtoEntity, CodecError> {
        let info = catalog.counter(&self.counter)?;
        Ok(ProtoEntity {
            entity: Some(p4::entity::Entity::CounterEntry(p4::CounterEntry {
                counter_id: info.id,
                index: self.index.map(|index| p4::Index { index }),
                data: None,
            })),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::EntryRepository;
    use crate::p4rt::session::ConnectionOption;
    use crate::sim::{program, SimDevice};
    use std::sync::Arc;

    #[test]
    fn test_index_bounds() {
        let repo = EntryRepository::new(Arc::new(PipelineCatalog::new(program::p4info())));
        let c = repo.counter_entry("ingress.in_pkts").unwrap();
        assert!(c.clone().with_index(3).is_ok());
        assert!(c.clone().with_index(4).is_err());
        assert!(c.with_index(-1).is_err());
        assert!(repo.counter_entry("ingress.nope").is_err());
    }

    #[tokio::test]
    async fn test_read_single_index() {
        let device = SimDevice::with_pipeline(1, program::p4info());
        device.bump_counter("ingress.in_pkts", 2, 5, 320);
        let session = Session::setup(Arc::new(device), &ConnectionOption::default(), None)
            .await
            .unwrap();
        let entry = session
            .repository()
            .counter_entry("in_pkts")
            .unwrap()
            .with_index(2)
            .unwrap();
        let records = entry.read_all(&session).await.unwrap();
        assert_eq!(
            records,
            vec![CounterRecord {
                counter: "ingress.in_pkts".to_owned(),
                index: Some(2),
                value: CounterValue {
                    packets: 5,
                    bytes: 320
                },
            }]
        );
        assert_eq!(records[0].to_string(), "ingress.in_pkts[2]: 5 packets, 320 bytes");
        session.teardown().await;
    }
}
