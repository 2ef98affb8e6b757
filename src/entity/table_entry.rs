use crate::entity::{ProtoEntity, ToEntity, UpdateType};
use crate::error::{CodecError, Error, Result, SymbolKind};
use crate::p4rt::codec::{
    decode_table_entry, normalize_match, normalize_param, parse_match, parse_param,
    table_entry_to_proto, table_entry_to_read_proto,
};
use crate::p4rt::pipeconf::{CatalogRef, PipelineCatalog};
use crate::p4rt::pure::new_update;
use crate::p4rt::session::Session;
use crate::util::value::{to_hex, Encode, MatchValue};
use bytes::Bytes;
use futures::stream::BoxStream;
use futures::{StreamExt, TryStreamExt};
use rusty_p4_shell_proto::proto::v1 as p4;
use std::fmt::{Display, Formatter};

#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct FieldValue {
    pub name: String,
    pub value: MatchValue,
}

#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct ParamValue {
    pub name: String,
    pub value: Bytes,
}

#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct ActionCall {
    pub name: String,
    pub params: Vec<ParamValue>,
}

/// A table entry with every name resolved against the catalog it was built
/// from. Matches are kept in the table's declared field order.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct TableEntry {
    pub table: String,
    pub matches: Vec<FieldValue>,
    pub action: Option<ActionCall>,
    pub priority: i32,
}

impl Display for TableEntry {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}(", self.table)?;
        for (i, m) in self.matches.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}={}", m.name, m.value)?;
        }
        write!(f, ")")?;
        if let Some(action) = &self.action {
            write!(f, " -> {}(", action.name)?;
            for (i, p) in action.params.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{}={}", p.name, to_hex(&p.value))?;
            }
            write!(f, ")")?;
        }
        if self.priority != 0 {
            write!(f, " priority {}", self.priority)?;
        }
        Ok(())
    }
}

impl ToEntity for TableEntry {
    fn to_proto_entity(&self, catalog: &PipelineCatalog) -> std::result::Result<ProtoEntity, CodecError> {
        Ok(ProtoEntity {
            entity: Some(p4::entity::Entity::TableEntry(table_entry_to_proto(self, catalog)?)),
        })
    }
}

impl TableEntry {
    pub async fn insert(&self, session: &Session) -> Result<()> {
        self.write(session, UpdateType::Insert).await
    }

    pub async fn modify(&self, session: &Session) -> Result<()> {
        self.write(session, UpdateType::Modify).await
    }

    pub async fn delete(&self, session: &Session) -> Result<()> {
        self.write(session, UpdateType::Delete).await
    }

    /// One `Write` RPC carrying this entry.
    pub async fn write(&self, session: &Session, update: UpdateType) -> Result<()> {
        let entity = self.to_proto_entity(session.catalog())?;
        session.write(vec![new_update(update, entity)]).await
    }

    /// Wildcard read: every entry of the table matching the fields set here.
    ///
    /// Nothing is sent until the stream is polled; calling `read` again issues
    /// a fresh RPC.
    pub fn read(&self, session: &Session) -> BoxStream<'static, Result<TableEntry>> {
        let filter = match table_entry_to_read_proto(self, session.catalog()) {
            Ok(filter) => filter,
            Err(e) => return futures::stream::once(async move { Err::<TableEntry, _>(Error::from(e)) }).boxed(),
        };
        let catalog = session.catalog().clone();
        session
            .read(vec![ProtoEntity {
                entity: Some(p4::entity::Entity::TableEntry(filter)),
            }])
            .and_then(move |entity| {
                let decoded = match entity.entity {
                    Some(p4::entity::Entity::TableEntry(entry)) => {
                        decode_table_entry(&entry, &catalog).map_err(Error::from)
                    }
                    other => Err(Error::Codec(CodecError::Decode {
                        what: "table entry",
                        reason: format!("unexpected entity {:?}", other),
                    })),
                };
                futures::future::ready(decoded)
            })
            .boxed()
    }

    pub async fn read_all(&self, session: &Session) -> Result<Vec<TableEntry>> {
        self.read(session).try_collect().await
    }
}

/// Collects match and action-parameter assignments for one table.
///
/// Every name and value is checked when it is set; [`build`](Self::build)
/// then checks the entry as a whole.
#[derive(Clone, Debug)]
pub struct TableEntryBuilder {
    catalog: CatalogRef,
    table: String,
    action: Option<String>,
    matches: Vec<FieldValue>,
    params: Vec<ParamValue>,
    priority: i32,
    partial: bool,
}

impl TableEntryBuilder {
    pub(crate) fn new(
        catalog: CatalogRef,
        table: &str,
        action: Option<&str>,
    ) -> std::result::Result<Self, CodecError> {
        let info = catalog.table(table)?;
        let action = match action {
            Some(action) => Some(catalog.table_action(info, action)?.name.clone()),
            None => None,
        };
        Ok(TableEntryBuilder {
            table: info.name.clone(),
            action,
            matches: vec![],
            params: vec![],
            priority: 0,
            partial: false,
            catalog,
        })
    }

    fn set_match(mut self, name: String, value: MatchValue) -> Self {
        self.matches.retain(|m| m.name != name);
        self.matches.push(FieldValue { name, value });
        self
    }

    fn set_param(mut self, name: String, value: Bytes) -> Self {
        self.params.retain(|p| p.name != name);
        self.params.push(ParamValue { name, value });
        self
    }

    fn field(&self, name: &str) -> std::result::Result<&crate::p4rt::pipeconf::MatchFieldInfo, CodecError> {
        self.catalog
            .table(&self.table)?
            .match_field(name)
            .ok_or_else(|| CodecError::UnknownSymbol {
                kind: SymbolKind::MatchField,
                name: name.to_owned(),
            })
    }

    fn param(&self, name: &str) -> std::result::Result<&crate::p4rt::pipeconf::ParamInfo, CodecError> {
        let unknown = || CodecError::UnknownSymbol {
            kind: SymbolKind::ActionParam,
            name: name.to_owned(),
        };
        let action = self.action.as_deref().ok_or_else(unknown)?;
        self.catalog.action(action)?.param(name).ok_or_else(unknown)
    }

    /// Sets a match from its text form (`"0x6162"`, `"10.0.0.0/8"`, ...).
    pub fn with_match(self, name: &str, value: &str) -> std::result::Result<Self, CodecError> {
        let value = parse_match(self.field(name)?, value)?;
        Ok(self.set_match(name.to_owned(), value))
    }

    pub fn with_match_value(self, name: &str, value: MatchValue) -> std::result::Result<Self, CodecError> {
        let shown = value.to_string();
        let value = normalize_match(self.field(name)?, value, &shown)?;
        Ok(self.set_match(name.to_owned(), value))
    }

    pub fn with_param(self, name: &str, value: &str) -> std::result::Result<Self, CodecError> {
        let value = parse_param(self.param(name)?, value)?;
        Ok(self.set_param(name.to_owned(), value))
    }

    pub fn with_param_value<T: Encode>(self, name: &str, value: T) -> std::result::Result<Self, CodecError> {
        let value = normalize_param(self.param(name)?, value.encode())?;
        Ok(self.set_param(name.to_owned(), value))
    }

    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Skips the mandatory-field and priority checks, for wildcard reads.
    pub fn allow_partial_match(mut self) -> Self {
        self.partial = true;
        self
    }

    pub fn build(self) -> std::result::Result<TableEntry, CodecError> {
        let mut matches = self.matches;
        let table = self.catalog.table(&self.table)?;
        matches.sort_by_key(|m| table.match_fields.iter().position(|f| f.name == m.name));
        let entry = TableEntry {
            table: self.table,
            matches,
            action: self.action.map(|name| ActionCall {
                name,
                params: self.params,
            }),
            priority: self.priority,
        };
        if self.partial {
            table_entry_to_read_proto(&entry, &self.catalog)?;
        } else {
            table_entry_to_proto(&entry, &self.catalog)?;
        }
        Ok(entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::EntryRepository;
    use crate::p4rt::codec::encode_table_entry;
    use crate::p4rt::codec::decode_table_entry_bytes;
    use crate::sim::program;
    use crate::util::value::{exact, ternary};
    use std::net::Ipv4Addr;
    use std::sync::Arc;

    fn repo() -> EntryRepository {
        EntryRepository::new(Arc::new(PipelineCatalog::new(program::p4info())))
    }

    #[test]
    fn test_build_switching_entry() {
        let entry = repo()
            .table_entry("ingress.tbl_switching", "forward")
            .unwrap()
            .with_match("headers.vlan_tag.vlan_id", "1")
            .unwrap()
            .with_match("headers.ethernet.dst_addr", "42")
            .unwrap()
            .with_param("output_port", "0x6162")
            .unwrap()
            .build()
            .unwrap();
        assert_eq!(entry.table, "ingress.tbl_switching");
        assert_eq!(entry.matches[0].name, "headers.ethernet.dst_addr");
        assert_eq!(
            entry.matches[0].value,
            MatchValue::Exact(Bytes::from_static(&[0, 0, 0, 0, 0, 42]))
        );
        let action = entry.action.as_ref().unwrap();
        assert_eq!(action.name, "ingress.forward");
        assert_eq!(action.params[0].value.as_ref(), &[0x61, 0x62]);
        assert_eq!(
            entry.to_string(),
            "ingress.tbl_switching(headers.ethernet.dst_addr=0x00000000002a, headers.vlan_tag.vlan_id=0x0001) -> ingress.forward(output_port=0x6162)"
        );
    }

    #[test]
    fn test_names_fail_fast() {
        let r = repo();
        assert!(matches!(
            r.table_entry("ingress.tbl_nope", "forward"),
            Err(CodecError::UnknownSymbol { kind: SymbolKind::Table, .. })
        ));
        assert!(matches!(
            r.table_entry("ingress.tbl_switching", "fly"),
            Err(CodecError::UnknownSymbol { kind: SymbolKind::Action, .. })
        ));
        let b = r.table_entry("ingress.tbl_switching", "forward").unwrap();
        assert!(matches!(
            b.clone().with_match("headers.ethernet.src_addr", "1"),
            Err(CodecError::UnknownSymbol { kind: SymbolKind::MatchField, .. })
        ));
        assert!(matches!(
            b.with_param("port", "1"),
            Err(CodecError::UnknownSymbol { kind: SymbolKind::ActionParam, .. })
        ));
        let b = r.table_entry_without_action("ingress.tbl_switching").unwrap();
        assert!(b.with_param("output_port", "1").is_err());
    }

    #[test]
    fn test_value_range_rejected() {
        let b = repo().table_entry("ingress.tbl_switching", "forward").unwrap();
        assert!(matches!(
            b.clone().with_param("output_port", "0x10000"),
            Err(CodecError::ValueRange { bitwidth: 16, .. })
        ));
        assert!(matches!(
            b.with_match("headers.ethernet.dst_addr", "281474976710656"),
            Err(CodecError::ValueRange { bitwidth: 48, .. })
        ));
    }

    #[test]
    fn test_mandatory_fields_and_partial_reads() {
        let r = repo();
        let missing = r
            .table_entry("ingress.tbl_switching", "forward")
            .unwrap()
            .with_match("headers.ethernet.dst_addr", "1")
            .unwrap()
            .with_param("output_port", "1")
            .unwrap()
            .build();
        assert_eq!(
            missing.unwrap_err(),
            CodecError::MissingMatchField {
                table: "ingress.tbl_switching".to_owned(),
                field: "headers.vlan_tag.vlan_id".to_owned()
            }
        );
        let filter = r
            .table_entry_without_action("ingress.tbl_switching")
            .unwrap()
            .with_match("headers.vlan_tag.vlan_id", "1")
            .unwrap()
            .allow_partial_match()
            .build()
            .unwrap();
        assert_eq!(filter.matches.len(), 1);
        assert!(filter.action.is_none());
    }

    #[test]
    fn test_missing_param_rejected() {
        let err = repo()
            .table_entry("ingress.tbl_switching", "forward")
            .unwrap()
            .with_match("headers.ethernet.dst_addr", "1")
            .unwrap()
            .with_match("headers.vlan_tag.vlan_id", "1")
            .unwrap()
            .build()
            .unwrap_err();
        assert!(matches!(err, CodecError::InvalidValue { field, .. } if field == "output_port"));
    }

    #[test]
    fn test_acl_entry_round_trip() {
        let r = repo();
        let entry = r
            .table_entry("ingress.tbl_acl", "drop")
            .unwrap()
            .with_match_value(
                "headers.ipv4.src_addr",
                ternary(Ipv4Addr::new(10, 0, 0, 7), Ipv4Addr::new(255, 255, 255, 0)),
            )
            .unwrap()
            .with_match("headers.ipv4.dst_addr", "192.168.0.0/16")
            .unwrap()
            .with_match("headers.tcp.dst_port", "1000..2000")
            .unwrap()
            .with_match_value("headers.vlan_tag.$valid$", exact(1u8))
            .unwrap()
            .priority(10)
            .build()
            .unwrap();
        assert_eq!(
            entry.matches[3].value,
            MatchValue::Optional(Bytes::from_static(&[1]))
        );

        let catalog = r.catalog();
        let bytes = encode_table_entry(&entry, catalog).unwrap();
        assert_eq!(decode_table_entry_bytes(&bytes, catalog).unwrap(), entry);

        let err = r
            .table_entry("ingress.tbl_acl", "drop")
            .unwrap()
            .with_match("headers.ipv4.dst_addr", "10.0.0.0/8")
            .unwrap()
            .build()
            .unwrap_err();
        assert!(matches!(err, CodecError::InvalidPriority { priority: 0, .. }));
    }

    #[test]
    fn test_decode_widens_canonical_values() {
        let r = repo();
        let catalog = r.catalog();
        let table = catalog.table("ingress.tbl_switching").unwrap();
        let forward = catalog.action("ingress.forward").unwrap();
        let proto = p4::TableEntry {
            table_id: table.id,
            r#match: table
                .match_fields
                .iter()
                .map(|f| p4::FieldMatch {
                    field_id: f.id,
                    field_match_type: Some(p4::field_match::FieldMatchType::Exact(
                        p4::field_match::Exact {
                            value: Bytes::from_static(&[7]),
                        },
                    )),
                })
                .collect(),
            action: Some(p4::TableAction {
                r#type: Some(p4::table_action::Type::Action(p4::Action {
                    action_id: forward.id,
                    params: vec![p4::action::Param {
                        param_id: forward.params[0].id,
                        value: Bytes::from_static(&[1]),
                    }],
                })),
            }),
            ..Default::default()
        };
        let entry = decode_table_entry(&proto, catalog).unwrap();
        assert_eq!(
            entry.matches[0].value,
            MatchValue::Exact(Bytes::from_static(&[0, 0, 0, 0, 0, 7]))
        );
        assert_eq!(entry.action.unwrap().params[0].value.as_ref(), &[0, 1]);
    }
}
