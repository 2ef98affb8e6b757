//! Conversion between resolved entries and P4Runtime messages.
//!
//! Values are normalized against the catalog on every encode: widths are
//! checked and padded, ternary/LPM values are masked, and don't-care matches
//! are rejected. Normalizing an already normalized value is a no-op, so entries
//! built through [`crate::entity::EntryRepository`] encode unchanged.

use crate::entity::counter::{CounterRecord, CounterValue};
use crate::entity::table_entry::{ActionCall, FieldValue, ParamValue, TableEntry};
use crate::error::{CodecError, SymbolKind};
use crate::p4rt::pipeconf::{MatchFieldInfo, MatchKind, ParamInfo, PipelineCatalog, TableInfo};
use crate::util::value::{
    adjust_value, and, bytes_len, fit, is_zero, max_value, prefix_mask, Encode, MatchValue, MAC,
};
use bytes::Bytes;
use rusty_p4_shell_proto::proto::v1 as p4;
use rusty_p4_shell_proto::proto::v1::field_match::{self, FieldMatchType};
use std::net::{Ipv4Addr, Ipv6Addr};

type CodecResult<T> = std::result::Result<T, CodecError>;

fn invalid(field: &str, value: &str, reason: impl Into<String>) -> CodecError {
    CodecError::InvalidValue {
        field: field.to_owned(),
        value: value.to_owned(),
        reason: reason.into(),
    }
}

fn fit_field(field: &str, shown: &str, value: Bytes, bitwidth: i32) -> CodecResult<Bytes> {
    fit(value, bitwidth).ok_or_else(|| CodecError::ValueRange {
        field: field.to_owned(),
        value: shown.to_owned(),
        bitwidth,
    })
}

/// Parses one scalar: `0x` hex, decimal, MAC, IPv4 or IPv6. The result is the
/// minimal big-endian representation; widths are checked by the caller.
pub fn parse_scalar(field: &str, text: &str) -> CodecResult<Bytes> {
    let t = text.trim();
    if t.is_empty() {
        return Err(invalid(field, text, "empty value"));
    }
    if let Some(h) = t.strip_prefix("0x").or_else(|| t.strip_prefix("0X")) {
        if h.is_empty() {
            return Err(invalid(field, text, "empty hex literal"));
        }
        let h = if h.len() % 2 == 1 {
            format!("0{}", h)
        } else {
            h.to_owned()
        };
        return hex::decode(h)
            .map(Bytes::from)
            .map_err(|e| invalid(field, text, e.to_string()));
    }
    if t.bytes().all(|b| b.is_ascii_digit()) {
        return Ok(parse_decimal(t));
    }
    if let Some(mac) = MAC::parse(t) {
        return Ok(mac.encode());
    }
    if t.contains('.') {
        return t
            .parse::<Ipv4Addr>()
            .map(Encode::encode)
            .map_err(|e| invalid(field, text, e.to_string()));
    }
    if t.contains(':') {
        return t
            .parse::<Ipv6Addr>()
            .map(Encode::encode)
            .map_err(|e| invalid(field, text, e.to_string()));
    }
    Err(invalid(field, text, "expected hex, decimal, MAC or IP address"))
}

/// Arbitrary-length decimal to big-endian bytes.
fn parse_decimal(digits: &str) -> Bytes {
    let mut out: Vec<u8> = vec![0];
    for d in digits.bytes().map(|b| (b - b'0') as u32) {
        let mut carry = d;
        for byte in out.iter_mut().rev() {
            let v = *byte as u32 * 10 + carry;
            *byte = (v & 0xff) as u8;
            carry = v >> 8;
        }
        while carry > 0 {
            out.insert(0, (carry & 0xff) as u8);
            carry >>= 8;
        }
    }
    Bytes::from(out)
}

/// Parses the text form of a match value according to the field's declared kind:
/// `v&&&m` for ternary, `v/len` for LPM, `lo..hi` for range; a plain scalar
/// otherwise.
pub fn parse_match(field: &MatchFieldInfo, text: &str) -> CodecResult<MatchValue> {
    let name = field.name.as_str();
    let value = match field.kind {
        MatchKind::Ternary if text.contains("&&&") => {
            let (v, m) = text.split_once("&&&").unwrap_or((text, ""));
            MatchValue::Ternary {
                value: parse_scalar(name, v)?,
                mask: parse_scalar(name, m)?,
            }
        }
        MatchKind::Lpm if text.contains('/') => {
            let (v, l) = text.split_once('/').unwrap_or((text, ""));
            let prefix_len = l
                .trim()
                .parse::<i32>()
                .map_err(|e| invalid(name, text, format!("bad prefix length: {}", e)))?;
            MatchValue::Lpm {
                value: parse_scalar(name, v)?,
                prefix_len,
            }
        }
        MatchKind::Range if text.contains("..") => {
            let (lo, hi) = text.split_once("..").unwrap_or((text, ""));
            MatchValue::Range {
                low: parse_scalar(name, lo)?,
                high: parse_scalar(name, hi)?,
            }
        }
        _ => MatchValue::Exact(parse_scalar(name, text)?),
    };
    normalize_match(field, value, text)
}

/// Checks `value` against the field's kind and width and brings it to its wire
/// form. A plain value given for a ternary, LPM, range or optional field is
/// widened to a full-width match.
pub fn normalize_match(
    field: &MatchFieldInfo,
    value: MatchValue,
    shown: &str,
) -> CodecResult<MatchValue> {
    let name = field.name.as_str();
    let bw = field.bitwidth;
    let dont_care = || invalid(name, shown, "don't care match must be omitted");
    match (field.kind, value) {
        (MatchKind::Exact, MatchValue::Exact(v)) => {
            Ok(MatchValue::Exact(fit_field(name, shown, v, bw)?))
        }
        (MatchKind::Optional, MatchValue::Exact(v)) | (MatchKind::Optional, MatchValue::Optional(v)) => {
            Ok(MatchValue::Optional(fit_field(name, shown, v, bw)?))
        }
        (MatchKind::Ternary, MatchValue::Exact(v)) => Ok(MatchValue::Ternary {
            value: fit_field(name, shown, v, bw)?,
            mask: max_value(bw),
        }),
        (MatchKind::Ternary, MatchValue::Ternary { value, mask }) => {
            let value = fit_field(name, shown, value, bw)?;
            let mask = fit_field(name, shown, mask, bw)?;
            if is_zero(&mask) {
                return Err(dont_care());
            }
            Ok(MatchValue::Ternary {
                value: and(&value, &mask),
                mask,
            })
        }
        (MatchKind::Lpm, MatchValue::Exact(v)) => Ok(MatchValue::Lpm {
            value: fit_field(name, shown, v, bw)?,
            prefix_len: bw,
        }),
        (MatchKind::Lpm, MatchValue::Lpm { value, prefix_len }) => {
            if prefix_len < 0 || prefix_len > bw {
                return Err(invalid(
                    name,
                    shown,
                    format!("prefix length must be within 0..={}", bw),
                ));
            }
            if prefix_len == 0 {
                return Err(dont_care());
            }
            let value = fit_field(name, shown, value, bw)?;
            Ok(MatchValue::Lpm {
                value: and(&value, &prefix_mask(bw, prefix_len)),
                prefix_len,
            })
        }
        (MatchKind::Range, MatchValue::Exact(v)) => {
            let v = fit_field(name, shown, v, bw)?;
            Ok(MatchValue::Range {
                low: v.clone(),
                high: v,
            })
        }
        (MatchKind::Range, MatchValue::Range { low, high }) => {
            let low = fit_field(name, shown, low, bw)?;
            let high = fit_field(name, shown, high, bw)?;
            // equal lengths, so byte order is numeric order
            if low > high {
                return Err(invalid(name, shown, "low bound exceeds high bound"));
            }
            if is_zero(&low) && high == max_value(bw) {
                return Err(dont_care());
            }
            Ok(MatchValue::Range { low, high })
        }
        (kind, value) => Err(CodecError::MatchKind {
            field: name.to_owned(),
            declared: kind.as_str(),
            given: value.kind(),
        }),
    }
}

pub fn parse_param(param: &ParamInfo, text: &str) -> CodecResult<Bytes> {
    let v = parse_scalar(&param.name, text)?;
    fit_field(&param.name, text, v, param.bitwidth)
}

pub fn normalize_param(param: &ParamInfo, value: Bytes) -> CodecResult<Bytes> {
    let shown = crate::util::value::to_hex(&value);
    fit_field(&param.name, &shown, value, param.bitwidth)
}

/// Priority rules: tables with ternary, range or optional fields need a
/// positive priority, exact/LPM-only tables take none.
pub fn check_priority(table: &TableInfo, priority: i32) -> CodecResult<()> {
    let reason = if priority < 0 {
        Some("priority must not be negative")
    } else if table.needs_priority() && priority == 0 {
        Some("entries of tables with ternary, range or optional fields need a priority")
    } else if !table.needs_priority() && priority != 0 {
        Some("entries of exact and lpm tables take no priority")
    } else {
        None
    };
    match reason {
        Some(reason) => Err(CodecError::InvalidPriority {
            table: table.name.clone(),
            priority,
            reason,
        }),
        None => Ok(()),
    }
}

pub fn check_mandatory(table: &TableInfo, entry: &TableEntry) -> CodecResult<()> {
    for f in table.match_fields.iter().filter(|f| f.kind == MatchKind::Exact) {
        if !entry.matches.iter().any(|m| m.name == f.name) {
            return Err(CodecError::MissingMatchField {
                table: table.name.clone(),
                field: f.name.clone(),
            });
        }
    }
    Ok(())
}

fn field_match_to_proto(id: u32, value: MatchValue) -> p4::FieldMatch {
    let field_match_type = match value {
        MatchValue::Exact(value) => FieldMatchType::Exact(field_match::Exact { value }),
        MatchValue::Ternary { value, mask } => {
            FieldMatchType::Ternary(field_match::Ternary { value, mask })
        }
        MatchValue::Lpm { value, prefix_len } => {
            FieldMatchType::Lpm(field_match::Lpm { value, prefix_len })
        }
        MatchValue::Range { low, high } => FieldMatchType::Range(field_match::Range { low, high }),
        MatchValue::Optional(value) => FieldMatchType::Optional(field_match::Optional { value }),
    };
    p4::FieldMatch {
        field_id: id,
        field_match_type: Some(field_match_type),
    }
}

fn encode_entry(
    entry: &TableEntry,
    catalog: &PipelineCatalog,
    partial: bool,
) -> CodecResult<p4::TableEntry> {
    let table = catalog.table(&entry.table)?;
    if !partial {
        check_mandatory(table, entry)?;
        check_priority(table, entry.priority)?;
    }

    let mut r#match = Vec::with_capacity(entry.matches.len());
    for m in entry.matches.iter() {
        let field = table
            .match_field(&m.name)
            .ok_or_else(|| CodecError::UnknownSymbol {
                kind: SymbolKind::MatchField,
                name: m.name.clone(),
            })?;
        let value = normalize_match(field, m.value.clone(), &m.value.to_string())?;
        r#match.push(field_match_to_proto(field.id, value));
    }

    let action = match &entry.action {
        Some(call) => {
            let info = catalog.table_action(table, &call.name)?;
            let mut params = Vec::with_capacity(call.params.len());
            for p in call.params.iter() {
                let param = info.param(&p.name).ok_or_else(|| CodecError::UnknownSymbol {
                    kind: SymbolKind::ActionParam,
                    name: p.name.clone(),
                })?;
                params.push(p4::action::Param {
                    param_id: param.id,
                    value: normalize_param(param, p.value.clone())?,
                });
            }
            if !partial {
                if let Some(missing) = info
                    .params
                    .iter()
                    .find(|d| !call.params.iter().any(|p| p.name == d.name))
                {
                    return Err(invalid(&missing.name, "", "action parameter not set"));
                }
            }
            Some(p4::TableAction {
                r#type: Some(p4::table_action::Type::Action(p4::Action {
                    action_id: info.id,
                    params,
                })),
            })
        }
        None => None,
    };

    Ok(p4::TableEntry {
        table_id: table.id,
        r#match,
        action,
        priority: entry.priority,
        counter_data: None,
        is_default_action: false,
        metadata: Bytes::new(),
    })
}

/// Builds the `p4.v1.TableEntry` for a write, rejecting entries that miss a
/// mandatory field or break the priority rules.
pub fn table_entry_to_proto(
    entry: &TableEntry,
    catalog: &PipelineCatalog,
) -> CodecResult<p4::TableEntry> {
    encode_entry(entry, catalog, false)
}

/// Builds the `p4.v1.TableEntry` used as a read filter; unset fields are wildcards.
pub fn table_entry_to_read_proto(
    entry: &TableEntry,
    catalog: &PipelineCatalog,
) -> CodecResult<p4::TableEntry> {
    encode_entry(entry, catalog, true)
}

/// Protobuf binary form of the entry.
pub fn encode_table_entry(entry: &TableEntry, catalog: &PipelineCatalog) -> CodecResult<Bytes> {
    let proto = table_entry_to_proto(entry, catalog)?;
    Ok(Bytes::from(prost::Message::encode_to_vec(&proto)))
}

fn decode_err(what: &'static str, reason: impl Into<String>) -> CodecError {
    CodecError::Decode {
        what,
        reason: reason.into(),
    }
}

/// Devices may return values without leading zero bytes.
fn widen(value: Bytes, bitwidth: i32) -> Bytes {
    adjust_value(value, bytes_len(bitwidth))
}

pub fn decode_table_entry(
    proto: &p4::TableEntry,
    catalog: &PipelineCatalog,
) -> CodecResult<TableEntry> {
    let table = catalog
        .table_by_id(proto.table_id)
        .ok_or_else(|| decode_err("table entry", format!("unknown table id {}", proto.table_id)))?;

    let mut matches = Vec::with_capacity(proto.r#match.len());
    for m in proto.r#match.iter() {
        let field = table.match_field_by_id(m.field_id).ok_or_else(|| {
            decode_err(
                "table entry",
                format!("unknown match field id {} in {}", m.field_id, table.name),
            )
        })?;
        let bw = field.bitwidth;
        let value = match m.field_match_type.clone() {
            Some(FieldMatchType::Exact(e)) => MatchValue::Exact(widen(e.value, bw)),
            Some(FieldMatchType::Ternary(t)) => MatchValue::Ternary {
                value: widen(t.value, bw),
                mask: widen(t.mask, bw),
            },
            Some(FieldMatchType::Lpm(l)) => MatchValue::Lpm {
                value: widen(l.value, bw),
                prefix_len: l.prefix_len,
            },
            Some(FieldMatchType::Range(r)) => MatchValue::Range {
                low: widen(r.low, bw),
                high: widen(r.high, bw),
            },
            Some(FieldMatchType::Optional(o)) => MatchValue::Optional(widen(o.value, bw)),
            None => return Err(decode_err("table entry", format!("empty match for {}", field.name))),
        };
        matches.push(FieldValue {
            name: field.name.clone(),
            value,
        });
    }
    matches.sort_by_key(|m| table.match_fields.iter().position(|f| f.name == m.name));

    let action = match proto.action.as_ref().and_then(|a| a.r#type.as_ref()) {
        Some(p4::table_action::Type::Action(a)) => {
            let info = catalog
                .action_by_id(a.action_id)
                .ok_or_else(|| decode_err("table entry", format!("unknown action id {}", a.action_id)))?;
            let mut params = Vec::with_capacity(a.params.len());
            for p in a.params.iter() {
                let param = info.param_by_id(p.param_id).ok_or_else(|| {
                    decode_err(
                        "table entry",
                        format!("unknown param id {} in {}", p.param_id, info.name),
                    )
                })?;
                params.push(ParamValue {
                    name: param.name.clone(),
                    value: widen(p.value.clone(), param.bitwidth),
                });
            }
            Some(ActionCall {
                name: info.name.clone(),
                params,
            })
        }
        None => None,
    };

    Ok(TableEntry {
        table: table.name.clone(),
        matches,
        action,
        priority: proto.priority,
    })
}

pub fn decode_table_entry_bytes(bytes: &[u8], catalog: &PipelineCatalog) -> CodecResult<TableEntry> {
    let proto: p4::TableEntry =
        prost::Message::decode(bytes).map_err(|e| decode_err("table entry", e.to_string()))?;
    decode_table_entry(&proto, catalog)
}

/// Decodes a protobuf-encoded `p4.v1.CounterData`.
pub fn decode_counter_value(bytes: &[u8]) -> CodecResult<CounterValue> {
    let data: p4::CounterData =
        prost::Message::decode(bytes).map_err(|e| decode_err("counter data", e.to_string()))?;
    Ok(data.into())
}

pub fn decode_counter_entry(
    proto: &p4::CounterEntry,
    catalog: &PipelineCatalog,
) -> CodecResult<CounterRecord> {
    let counter = catalog.counter_by_id(proto.counter_id).ok_or_else(|| {
        decode_err("counter entry", format!("unknown counter id {}", proto.counter_id))
    })?;
    Ok(CounterRecord {
        counter: counter.name.clone(),
        index: proto.index.as_ref().map(|i| i.index),
        value: proto.data.clone().map(CounterValue::from).unwrap_or_default(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::program;
    use crate::util::value::{exact, lpm};

    fn catalog() -> PipelineCatalog {
        PipelineCatalog::new(program::p4info())
    }

    fn field<'a>(c: &'a PipelineCatalog, table: &str, name: &str) -> &'a MatchFieldInfo {
        c.table(table).unwrap().match_field(name).unwrap()
    }

    #[test]
    fn test_parse_scalar_formats() {
        assert_eq!(parse_scalar("f", "0x6162").unwrap().as_ref(), &[0x61, 0x62]);
        assert_eq!(parse_scalar("f", "0xabc").unwrap().as_ref(), &[0x0a, 0xbc]);
        assert_eq!(parse_scalar("f", "999").unwrap().as_ref(), &[0x03, 0xe7]);
        assert_eq!(parse_scalar("f", "0").unwrap().as_ref(), &[0]);
        assert_eq!(parse_scalar("f", "10.0.0.1").unwrap().as_ref(), &[10, 0, 0, 1]);
        assert_eq!(
            parse_scalar("f", "00:00:00:00:00:2a").unwrap().as_ref(),
            &[0, 0, 0, 0, 0, 0x2a]
        );
        assert_eq!(
            parse_decimal("340282366920938463463374607431768211456").len(),
            17
        );
        assert!(matches!(
            parse_scalar("f", "-1"),
            Err(CodecError::InvalidValue { .. })
        ));
        assert!(matches!(
            parse_scalar("f", "0xzz"),
            Err(CodecError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_parse_exact_pads_to_width() {
        let c = catalog();
        let f = field(&c, "ingress.tbl_switching", "headers.ethernet.dst_addr");
        assert_eq!(
            parse_match(f, "1").unwrap(),
            MatchValue::Exact(Bytes::from_static(&[0, 0, 0, 0, 0, 1]))
        );
        let f = field(&c, "ingress.tbl_switching", "headers.vlan_tag.vlan_id");
        assert_eq!(
            parse_match(f, "4095").unwrap(),
            MatchValue::Exact(Bytes::from_static(&[0x0f, 0xff]))
        );
        assert_eq!(
            parse_match(f, "4096").unwrap_err(),
            CodecError::ValueRange {
                field: "headers.vlan_tag.vlan_id".to_owned(),
                value: "4096".to_owned(),
                bitwidth: 12
            }
        );
    }

    #[test]
    fn test_parse_ternary_lpm_range() {
        let c = catalog();
        let t = "ingress.tbl_acl";
        let f = field(&c, t, "headers.ipv4.src_addr");
        assert_eq!(
            parse_match(f, "10.1.2.3&&&255.255.0.0").unwrap(),
            MatchValue::Ternary {
                value: Bytes::from_static(&[10, 1, 0, 0]),
                mask: Bytes::from_static(&[255, 255, 0, 0]),
            }
        );
        assert!(matches!(
            parse_match(f, "10.1.2.3&&&0"),
            Err(CodecError::InvalidValue { .. })
        ));

        let f = field(&c, t, "headers.ipv4.dst_addr");
        assert_eq!(
            parse_match(f, "192.168.7.9/16").unwrap(),
            MatchValue::Lpm {
                value: Bytes::from_static(&[192, 168, 0, 0]),
                prefix_len: 16
            }
        );
        assert!(parse_match(f, "0.0.0.0/0").is_err());
        assert!(parse_match(f, "1.2.3.4/33").is_err());

        let f = field(&c, t, "headers.tcp.dst_port");
        assert_eq!(
            parse_match(f, "80..8080").unwrap(),
            MatchValue::Range {
                low: Bytes::from_static(&[0, 80]),
                high: Bytes::from_static(&[0x1f, 0x90]),
            }
        );
        assert!(parse_match(f, "0..0xffff").is_err());
        assert!(parse_match(f, "90..80").is_err());
    }

    #[test]
    fn test_typed_value_kind_mismatch() {
        let c = catalog();
        let f = field(&c, "ingress.tbl_switching", "headers.vlan_tag.vlan_id");
        let err = normalize_match(f, lpm(1u16, 4), "").unwrap_err();
        assert_eq!(
            err,
            CodecError::MatchKind {
                field: "headers.vlan_tag.vlan_id".to_owned(),
                declared: "exact",
                given: "lpm"
            }
        );
        assert!(normalize_match(f, exact(1u32), "1").is_ok());
    }

    #[test]
    fn test_priority_rules() {
        let c = catalog();
        let acl = c.table("ingress.tbl_acl").unwrap();
        let switching = c.table("ingress.tbl_switching").unwrap();
        assert!(check_priority(acl, 10).is_ok());
        assert!(check_priority(acl, 0).is_err());
        assert!(check_priority(switching, 0).is_ok());
        assert!(matches!(
            check_priority(switching, 1),
            Err(CodecError::InvalidPriority { priority: 1, .. })
        ));
    }

    #[test]
    fn test_decode_counter_value() {
        let data = p4::CounterData {
            byte_count: 1500,
            packet_count: 3,
        };
        let v = decode_counter_value(&prost::Message::encode_to_vec(&data)).unwrap();
        assert_eq!(v, CounterValue { packets: 3, bytes: 1500 });
        assert!(decode_counter_value(&[0xff]).is_err());
    }
}
