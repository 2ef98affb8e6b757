//! P4Info of the VLAN switch pipeline the benchmark scenarios run against.
//!
//! Ports are 32 bits wide as on PSA targets.

use rusty_p4_shell_proto::proto::config::v1::{
    action, action_ref, counter_spec, match_field, Action, ActionRef, Counter, CounterSpec,
    MatchField, P4Info, Preamble, Table,
};

pub const TBL_SWITCHING: u32 = 0x0200_0001;
pub const TBL_INGRESS_VLAN: u32 = 0x0200_0002;
pub const TBL_ACL: u32 = 0x0200_0003;
pub const TBL_VLAN_EGRESS: u32 = 0x0200_0004;

pub const NO_ACTION: u32 = 0x0100_0001;
pub const FORWARD: u32 = 0x0100_0002;
pub const PUSH_VLAN: u32 = 0x0100_0003;
pub const DROP: u32 = 0x0100_0004;
pub const STRIP_VLAN: u32 = 0x0100_0005;

pub const IN_PKTS: u32 = 0x1200_0001;
pub const IN_PKTS_SIZE: i64 = 4;

fn preamble(id: u32, name: &str, alias: &str) -> Option<Preamble> {
    Some(Preamble {
        id,
        name: name.to_owned(),
        alias: alias.to_owned(),
        annotations: vec![],
    })
}

fn field(id: u32, name: &str, bitwidth: i32, kind: match_field::MatchType) -> MatchField {
    MatchField {
        id,
        name: name.to_owned(),
        annotations: vec![],
        bitwidth,
        r#match: Some(match_field::Match::MatchType(kind as i32)),
    }
}

fn action_refs(ids: &[u32]) -> Vec<ActionRef> {
    ids.iter()
        .map(|id| ActionRef {
            id: *id,
            scope: action_ref::Scope::TableAndDefault as i32,
        })
        .collect()
}

fn table(id: u32, name: &str, alias: &str, fields: Vec<MatchField>, actions: &[u32]) -> Table {
    Table {
        preamble: preamble(id, name, alias),
        match_fields: fields,
        action_refs: action_refs(actions),
        const_default_action_id: 0,
        direct_resource_ids: vec![],
        size: 4096,
        is_const_table: false,
    }
}

fn param(id: u32, name: &str, bitwidth: i32) -> action::Param {
    action::Param {
        id,
        name: name.to_owned(),
        bitwidth,
    }
}

pub fn p4info() -> P4Info {
    use match_field::MatchType::*;
    P4Info {
        tables: vec![
            table(
                TBL_SWITCHING,
                "ingress.tbl_switching",
                "tbl_switching",
                vec![
                    field(1, "headers.ethernet.dst_addr", 48, Exact),
                    field(2, "headers.vlan_tag.vlan_id", 12, Exact),
                ],
                &[FORWARD, NO_ACTION],
            ),
            table(
                TBL_INGRESS_VLAN,
                "ingress.tbl_ingress_vlan",
                "tbl_ingress_vlan",
                vec![
                    field(1, "standard_metadata.ingress_port", 32, Exact),
                    field(2, "headers.vlan_tag.$valid$", 1, Exact),
                ],
                &[PUSH_VLAN, NO_ACTION],
            ),
            table(
                TBL_ACL,
                "ingress.tbl_acl",
                "tbl_acl",
                vec![
                    field(1, "headers.ipv4.src_addr", 32, Ternary),
                    field(2, "headers.ipv4.dst_addr", 32, Lpm),
                    field(3, "headers.tcp.dst_port", 16, Range),
                    field(4, "headers.vlan_tag.$valid$", 1, Optional),
                ],
                &[DROP, NO_ACTION],
            ),
            table(
                TBL_VLAN_EGRESS,
                "egress.tbl_vlan_egress",
                "tbl_vlan_egress",
                vec![field(1, "istd.egress_port", 32, Exact)],
                &[STRIP_VLAN, NO_ACTION],
            ),
        ],
        actions: vec![
            Action {
                preamble: preamble(NO_ACTION, "NoAction", "NoAction"),
                params: vec![],
            },
            Action {
                preamble: preamble(FORWARD, "ingress.forward", "forward"),
                params: vec![param(1, "output_port", 16)],
            },
            Action {
                preamble: preamble(PUSH_VLAN, "ingress.push_vlan", "push_vlan"),
                params: vec![],
            },
            Action {
                preamble: preamble(DROP, "ingress.drop", "drop"),
                params: vec![],
            },
            Action {
                preamble: preamble(STRIP_VLAN, "egress.strip_vlan", "strip_vlan"),
                params: vec![],
            },
        ],
        counters: vec![Counter {
            preamble: preamble(IN_PKTS, "ingress.in_pkts", "in_pkts"),
            spec: Some(CounterSpec {
                unit: counter_spec::Unit::Both as i32,
            }),
            size: IN_PKTS_SIZE,
        }],
        direct_counters: vec![],
    }
}
