//! Timed insert/delete scenarios and the append-only benchmark log.

use crate::batch::{BatchExecutor, BatchReport, EntryOutcome, SubmitMode};
use crate::entity::{EntryRepository, TableEntry};
use crate::error::{Error, Result};
use crate::p4rt::session::Session;
use log::info;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;

/// One line per batch: `"<label>; <seconds>\n"` with a comma as decimal separator.
#[derive(Clone, Debug)]
pub struct BenchLog {
    path: PathBuf,
}

impl BenchLog {
    pub fn new<P: AsRef<Path>>(path: P) -> BenchLog {
        BenchLog {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Seconds always carry a fractional part, `2` is written as `2,0`.
    pub fn format_line(label: &str, elapsed: Duration) -> String {
        let mut seconds = elapsed.as_secs_f64().to_string();
        if !seconds.contains('.') {
            seconds.push_str(".0");
        }
        format!("{}; {}\n", label, seconds.replace('.', ","))
    }

    pub async fn append(&self, label: &str, elapsed: Duration) -> Result<()> {
        let config_error = |error| Error::ConfigFile {
            path: self.path.display().to_string(),
            error,
        };
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(config_error)?;
        file.write_all(Self::format_line(label, elapsed).as_bytes())
            .await
            .map_err(config_error)?;
        file.flush().await.map_err(config_error)
    }
}

/// A generated batch: `count` entries of `table`, where `{i}` in any match or
/// parameter value is replaced by the entry's sequence number.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Scenario {
    pub table: String,
    pub action: String,
    #[serde(default)]
    pub matches: Vec<(String, String)>,
    #[serde(default)]
    pub params: Vec<(String, String)>,
    #[serde(default)]
    pub priority: i32,
    pub count: usize,
    /// Label written to the benchmark log, the table name when absent.
    #[serde(default)]
    pub label: Option<String>,
}

fn pairs(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

impl Scenario {
    pub fn switching(count: usize) -> Scenario {
        Scenario {
            table: "ingress.tbl_switching".to_owned(),
            action: "forward".to_owned(),
            matches: pairs(&[
                ("headers.ethernet.dst_addr", "{i}"),
                ("headers.vlan_tag.vlan_id", "1"),
            ]),
            params: pairs(&[("output_port", "0x6162")]),
            priority: 0,
            count,
            label: None,
        }
    }

    pub fn ingress_vlan(count: usize) -> Scenario {
        Scenario {
            table: "ingress.tbl_ingress_vlan".to_owned(),
            action: "push_vlan".to_owned(),
            matches: pairs(&[
                ("standard_metadata.ingress_port", "{i}"),
                ("headers.vlan_tag.$valid$", "1"),
            ]),
            params: vec![],
            priority: 0,
            count,
            label: None,
        }
    }

    pub fn egress_vlan(count: usize) -> Scenario {
        Scenario {
            table: "egress.tbl_vlan_egress".to_owned(),
            action: "strip_vlan".to_owned(),
            matches: pairs(&[("istd.egress_port", "{i}")]),
            params: vec![],
            priority: 0,
            count,
            label: None,
        }
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Scenario> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|error| Error::ConfigFile {
            path: path.display().to_string(),
            error,
        })?;
        serde_json::from_str(&text).map_err(|e| Error::ConfigFile {
            path: path.display().to_string(),
            error: e.into(),
        })
    }

    pub fn label(&self) -> &str {
        self.label.as_deref().unwrap_or(&self.table)
    }

    pub fn build_entries(&self, repo: &EntryRepository) -> Result<Vec<TableEntry>> {
        (0..self.count)
            .map(|i| -> Result<TableEntry> {
                let i = i.to_string();
                let mut builder = repo.table_entry(&self.table, &self.action)?;
                for (name, value) in self.matches.iter() {
                    builder = builder.with_match(name, &value.replace("{i}", &i))?;
                }
                for (name, value) in self.params.iter() {
                    builder = builder.with_param(name, &value.replace("{i}", &i))?;
                }
                Ok(builder.priority(self.priority).build()?)
            })
            .collect()
    }
}

#[derive(Debug)]
pub struct BenchResult {
    pub insert: BatchReport,
    pub delete: BatchReport,
}

/// Inserts every entry of `scenario`, logs the insert time, then deletes
/// whatever was applied.
pub async fn run_insert_delete(
    session: &Session,
    scenario: &Scenario,
    mode: SubmitMode,
    log: Option<&BenchLog>,
) -> Result<BenchResult> {
    let entries = scenario.build_entries(&session.repository())?;
    let executor = BatchExecutor::new(session).mode(mode);

    let insert = executor.insert_all(&entries).await;
    info!(target: "batch", "{}: inserted {} entries in {:?}", scenario.label(), insert.applied(), insert.elapsed);
    if let Some(log) = log {
        log.append(scenario.label(), insert.elapsed).await?;
    }

    let applied: Vec<TableEntry> = entries
        .into_iter()
        .zip(insert.outcomes.iter())
        .filter(|(_, o)| matches!(o, EntryOutcome::Applied))
        .map(|(e, _)| e)
        .collect();
    let delete = executor.delete_all(&applied).await;
    Ok(BenchResult { insert, delete })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_line_uses_comma() {
        assert_eq!(
            BenchLog::format_line("egress.tbl_vlan_egress", Duration::from_millis(1500)),
            "egress.tbl_vlan_egress; 1,5\n"
        );
        assert_eq!(BenchLog::format_line("t", Duration::from_secs(2)), "t; 2,0\n");
        assert_eq!(BenchLog::format_line("t", Duration::ZERO), "t; 0,0\n");
    }

    #[test]
    fn test_scenario_from_json() {
        let s: Scenario = serde_json::from_str(
            r#"{"table": "ingress.tbl_switching", "action": "forward",
                "matches": [["headers.ethernet.dst_addr", "{i}"], ["headers.vlan_tag.vlan_id", "1"]],
                "params": [["output_port", "0x6162"]], "count": 1000}"#,
        )
        .unwrap();
        assert_eq!(s, Scenario::switching(1000));
        assert_eq!(s.label(), "ingress.tbl_switching");
    }
}
