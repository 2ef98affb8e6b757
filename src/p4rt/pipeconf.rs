use crate::error::{CodecError, Error, Result, SymbolKind};
use bytes::Bytes;
use log::debug;
use rusty_p4_shell_proto::proto::config::v1::{match_field, P4Info, Preamble};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt::Debug;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Paths of a compiled pipeline: the binary-encoded P4Info and the opaque
/// target config blob pushed alongside it.
#[derive(Clone, Debug, Serialize, Deserialize, Eq, PartialEq)]
pub struct FwdPipeConfig {
    pub p4info: PathBuf,
    pub device_config: PathBuf,
}

impl FwdPipeConfig {
    pub fn new<T: AsRef<Path>>(p4info: T, device_config: T) -> FwdPipeConfig {
        FwdPipeConfig {
            p4info: p4info.as_ref().to_path_buf(),
            device_config: device_config.as_ref().to_path_buf(),
        }
    }

    pub async fn load(&self) -> Result<(P4Info, Bytes)> {
        let p4info = read_file(&self.p4info).await?;
        let p4info: P4Info = prost::Message::decode(p4info.as_ref())
            .map_err(|e| Error::Pipeline(format!("{}: {}", self.p4info.display(), e)))?;
        let device_config = read_file(&self.device_config).await?;
        debug!(target: "pipeconf", "loaded p4info {:?}, device config {} bytes", &self.p4info, device_config.len());
        Ok((p4info, Bytes::from(device_config)))
    }
}

async fn read_file(path: &Path) -> Result<Vec<u8>> {
    tokio::fs::read(path).await.map_err(|error| Error::ConfigFile {
        path: path.display().to_string(),
        error,
    })
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum MatchKind {
    Exact,
    Lpm,
    Ternary,
    Range,
    Optional,
    Unsupported,
}

impl MatchKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchKind::Exact => "exact",
            MatchKind::Lpm => "lpm",
            MatchKind::Ternary => "ternary",
            MatchKind::Range => "range",
            MatchKind::Optional => "optional",
            MatchKind::Unsupported => "unsupported",
        }
    }

    /// Tables holding any of these kinds order their entries by priority.
    pub fn needs_priority(&self) -> bool {
        matches!(self, MatchKind::Ternary | MatchKind::Range | MatchKind::Optional)
    }
}

impl From<Option<&match_field::Match>> for MatchKind {
    fn from(m: Option<&match_field::Match>) -> Self {
        match m {
            Some(match_field::Match::MatchType(t)) => match match_field::MatchType::try_from(*t) {
                Ok(match_field::MatchType::Exact) => MatchKind::Exact,
                Ok(match_field::MatchType::Lpm) => MatchKind::Lpm,
                Ok(match_field::MatchType::Ternary) => MatchKind::Ternary,
                Ok(match_field::MatchType::Range) => MatchKind::Range,
                Ok(match_field::MatchType::Optional) => MatchKind::Optional,
                _ => MatchKind::Unsupported,
            },
            _ => MatchKind::Unsupported,
        }
    }
}

#[derive(Clone, Debug)]
pub struct MatchFieldInfo {
    pub id: u32,
    pub name: String,
    pub bitwidth: i32,
    pub kind: MatchKind,
}

#[derive(Clone, Debug)]
pub struct ParamInfo {
    pub id: u32,
    pub name: String,
    pub bitwidth: i32,
}

#[derive(Clone, Debug)]
pub struct TableInfo {
    pub id: u32,
    pub name: String,
    pub alias: String,
    pub match_fields: Vec<MatchFieldInfo>,
    pub action_ids: Vec<u32>,
    pub size: i64,
}

impl TableInfo {
    pub fn match_field(&self, name: &str) -> Option<&MatchFieldInfo> {
        self.match_fields.iter().find(|m| m.name == name)
    }

    pub fn match_field_by_id(&self, id: u32) -> Option<&MatchFieldInfo> {
        self.match_fields.iter().find(|m| m.id == id)
    }

    pub fn needs_priority(&self) -> bool {
        self.match_fields.iter().any(|m| m.kind.needs_priority())
    }
}

#[derive(Clone, Debug)]
pub struct ActionInfo {
    pub id: u32,
    pub name: String,
    pub alias: String,
    pub params: Vec<ParamInfo>,
}

impl ActionInfo {
    pub fn param(&self, name: &str) -> Option<&ParamInfo> {
        self.params.iter().find(|p| p.name == name)
    }

    pub fn param_by_id(&self, id: u32) -> Option<&ParamInfo> {
        self.params.iter().find(|p| p.id == id)
    }
}

#[derive(Clone, Debug)]
pub struct CounterInfo {
    pub id: u32,
    pub name: String,
    pub alias: String,
    pub size: i64,
}

/// Immutable name/id index over a P4Info, built once per session.
#[derive(Debug)]
pub struct PipelineCatalog {
    p4info: P4Info,
    tables: Vec<TableInfo>,
    actions: Vec<ActionInfo>,
    counters: Vec<CounterInfo>,
    names: HashMap<(SymbolKind, String), usize>,
    ids: HashMap<(SymbolKind, u32), usize>,
}

pub type CatalogRef = Arc<PipelineCatalog>;

fn preamble(p: &Option<Preamble>) -> (u32, String, String) {
    p.as_ref()
        .map(|p| (p.id, p.name.clone(), p.alias.clone()))
        .unwrap_or_default()
}

impl PipelineCatalog {
    pub fn new(p4info: P4Info) -> PipelineCatalog {
        let tables: Vec<TableInfo> = p4info
            .tables
            .iter()
            .filter(|t| t.preamble.is_some())
            .map(|t| {
                let (id, name, alias) = preamble(&t.preamble);
                TableInfo {
                    id,
                    name,
                    alias,
                    match_fields: t
                        .match_fields
                        .iter()
                        .map(|m| MatchFieldInfo {
                            id: m.id,
                            name: m.name.clone(),
                            bitwidth: m.bitwidth,
                            kind: m.r#match.as_ref().into(),
                        })
                        .collect(),
                    action_ids: t.action_refs.iter().map(|a| a.id).collect(),
                    size: t.size,
                }
            })
            .collect();
        let actions: Vec<ActionInfo> = p4info
            .actions
            .iter()
            .filter(|a| a.preamble.is_some())
            .map(|a| {
                let (id, name, alias) = preamble(&a.preamble);
                ActionInfo {
                    id,
                    name,
                    alias,
                    params: a
                        .params
                        .iter()
                        .map(|p| ParamInfo {
                            id: p.id,
                            name: p.name.clone(),
                            bitwidth: p.bitwidth,
                        })
                        .collect(),
                }
            })
            .collect();
        let counters: Vec<CounterInfo> = p4info
            .counters
            .iter()
            .filter(|c| c.preamble.is_some())
            .map(|c| {
                let (id, name, alias) = preamble(&c.preamble);
                CounterInfo {
                    id,
                    name,
                    alias,
                    size: c.size,
                }
            })
            .collect();

        let mut names = HashMap::new();
        let mut ids = HashMap::new();
        let entries = tables
            .iter()
            .enumerate()
            .map(|(i, t)| (SymbolKind::Table, i, t.id, &t.name, &t.alias))
            .chain(
                actions
                    .iter()
                    .enumerate()
                    .map(|(i, a)| (SymbolKind::Action, i, a.id, &a.name, &a.alias)),
            )
            .chain(
                counters
                    .iter()
                    .enumerate()
                    .map(|(i, c)| (SymbolKind::Counter, i, c.id, &c.name, &c.alias)),
            );
        for (kind, index, id, name, alias) in entries {
            ids.insert((kind, id), index);
            names.insert((kind, name.clone()), index);
            if !alias.is_empty() {
                // full names win over an alias that happens to collide with one
                names.entry((kind, alias.clone())).or_insert(index);
            }
        }

        PipelineCatalog {
            p4info,
            tables,
            actions,
            counters,
            names,
            ids,
        }
    }

    pub fn p4info(&self) -> &P4Info {
        &self.p4info
    }

    pub fn tables(&self) -> &[TableInfo] {
        &self.tables
    }

    pub fn counters(&self) -> &[CounterInfo] {
        &self.counters
    }

    fn lookup(&self, kind: SymbolKind, name: &str) -> std::result::Result<usize, CodecError> {
        self.names
            .get(&(kind, name.to_owned()))
            .copied()
            .ok_or_else(|| CodecError::UnknownSymbol {
                kind,
                name: name.to_owned(),
            })
    }

    pub fn table(&self, name: &str) -> std::result::Result<&TableInfo, CodecError> {
        self.lookup(SymbolKind::Table, name).map(|i| &self.tables[i])
    }

    pub fn action(&self, name: &str) -> std::result::Result<&ActionInfo, CodecError> {
        self.lookup(SymbolKind::Action, name).map(|i| &self.actions[i])
    }

    pub fn counter(&self, name: &str) -> std::result::Result<&CounterInfo, CodecError> {
        self.lookup(SymbolKind::Counter, name).map(|i| &self.counters[i])
    }

    pub fn table_by_id(&self, id: u32) -> Option<&TableInfo> {
        self.ids.get(&(SymbolKind::Table, id)).map(|i| &self.tables[*i])
    }

    pub fn action_by_id(&self, id: u32) -> Option<&ActionInfo> {
        self.ids.get(&(SymbolKind::Action, id)).map(|i| &self.actions[*i])
    }

    pub fn counter_by_id(&self, id: u32) -> Option<&CounterInfo> {
        self.ids.get(&(SymbolKind::Counter, id)).map(|i| &self.counters[*i])
    }

    /// Resolves `action` and checks the table lists it among its action refs.
    pub fn table_action(
        &self,
        table: &TableInfo,
        action: &str,
    ) -> std::result::Result<&ActionInfo, CodecError> {
        let info = self.action(action)?;
        if table.action_ids.contains(&info.id) {
            Ok(info)
        } else {
            Err(CodecError::UnknownSymbol {
                kind: SymbolKind::Action,
                name: format!("{} (in table {})", action, table.name),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::program;

    #[test]
    fn test_lookup_by_name_and_alias() {
        let catalog = PipelineCatalog::new(program::p4info());
        let t = catalog.table("ingress.tbl_switching").unwrap();
        assert_eq!(catalog.table("tbl_switching").unwrap().id, t.id);
        assert_eq!(t.match_field("headers.ethernet.dst_addr").unwrap().bitwidth, 48);
        assert!(!t.needs_priority());

        let forward = catalog.table_action(t, "forward").unwrap();
        assert_eq!(forward.name, "ingress.forward");
        assert_eq!(forward.param("output_port").unwrap().bitwidth, 16);

        assert_eq!(catalog.counter("ingress.in_pkts").unwrap().size, 4);
        assert!(catalog.table_by_id(t.id).is_some());
    }

    #[test]
    fn test_unknown_symbols() {
        let catalog = PipelineCatalog::new(program::p4info());
        assert_eq!(
            catalog.table("ingress.nope").unwrap_err(),
            CodecError::UnknownSymbol {
                kind: SymbolKind::Table,
                name: "ingress.nope".to_owned()
            }
        );
        let t = catalog.table("egress.tbl_vlan_egress").unwrap();
        assert!(catalog.table_action(t, "forward").is_err());
        assert!(catalog.counter("in_bytes").is_err());
    }

    #[tokio::test]
    async fn test_load_fwd_pipe_config() {
        let dir = tempfile::tempdir().unwrap();
        let p4info_path = dir.path().join("p4info.bin");
        let config_path = dir.path().join("out.o");
        std::fs::write(&p4info_path, prost::Message::encode_to_vec(&program::p4info())).unwrap();
        std::fs::write(&config_path, b"\x7fELF").unwrap();

        let (p4info, blob) = FwdPipeConfig::new(&p4info_path, &config_path).load().await.unwrap();
        assert_eq!(p4info, program::p4info());
        assert_eq!(blob.as_ref(), b"\x7fELF");

        let missing = FwdPipeConfig::new(dir.path().join("none"), config_path);
        assert!(matches!(missing.load().await, Err(Error::ConfigFile { .. })));
    }
}
