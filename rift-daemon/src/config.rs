//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::BTreeSet;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use ipnetwork::IpNetwork;
use rift::instance::InstanceCfg;
use rift::interface::InterfaceCfg;
use rift::packet::{PrefixAttrs, PrefixMap, SystemId};
use rift::ztp::LevelSymbol;
use serde::Deserialize;

// Topology configuration document.
//
// The schema follows the YAML topology files used by existing RIFT
// implementations: global constants, then shards of nodes with their
// interfaces and advertised prefixes.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(rename = "const", default)]
    pub constants: GlobalConstants,
    #[serde(default)]
    pub shards: Vec<Shard>,
}

#[derive(Debug, Default, Deserialize)]
pub struct GlobalConstants {
    pub tx_src_address: Option<Ipv4Addr>,
    pub lie_mcast_address: Option<Ipv4Addr>,
}

#[derive(Debug, Deserialize)]
pub struct Shard {
    pub id: u64,
    #[serde(default)]
    pub nodes: Vec<NodeConfig>,
}

#[derive(Debug, Deserialize)]
pub struct NodeConfig {
    pub name: String,
    #[serde(default)]
    pub passive: bool,
    #[serde(default)]
    pub level: LevelSymbol,
    #[serde(rename = "systemid")]
    pub system_id: u64,
    pub rx_lie_mcast_address: Option<Ipv4Addr>,
    pub rx_lie_port: Option<u16>,
    pub kernel_route_table: Option<String>,
    #[serde(default)]
    pub interfaces: Vec<InterfaceConfig>,
    #[serde(default)]
    pub v4prefixes: Vec<V4Prefix>,
    #[serde(default)]
    pub v6prefixes: Vec<V6Prefix>,
}

#[derive(Debug, Deserialize)]
pub struct InterfaceConfig {
    pub name: String,
    pub address: Option<Ipv4Addr>,
    pub metric: Option<u32>,
    pub pod: Option<u32>,
    pub mtu: Option<u32>,
    pub rx_lie_port: Option<u16>,
    pub tx_lie_port: Option<u16>,
    pub rx_tie_port: Option<u16>,
    pub rx_lie_mcast_address: Option<Ipv4Addr>,
    pub tx_lie_mcast_address: Option<Ipv4Addr>,
}

#[derive(Debug, Deserialize)]
pub struct V4Prefix {
    pub address: Ipv4Addr,
    pub mask: u8,
    pub metric: u32,
    #[serde(default)]
    pub tags: Vec<u64>,
}

#[derive(Debug, Deserialize)]
pub struct V6Prefix {
    pub address: Ipv6Addr,
    pub mask: u8,
    pub metric: u32,
    #[serde(default)]
    pub tags: Vec<u64>,
}

// ===== impl Config =====

impl Config {
    pub fn load(path: &str) -> Result<Config, String> {
        let contents = std::fs::read_to_string(path)
            .map_err(|error| format!("failed to read {path}: {error}"))?;
        serde_yaml::from_str(&contents)
            .map_err(|error| format!("failed to parse {path}: {error}"))
    }

    pub fn nodes(&self) -> impl Iterator<Item = &NodeConfig> {
        self.shards.iter().flat_map(|shard| shard.nodes.iter())
    }
}

// ===== impl NodeConfig =====

impl NodeConfig {
    // Resolves this node's configuration into the instance and interface
    // configurations consumed by the protocol library.
    pub fn resolve(
        &self,
        constants: &GlobalConstants,
    ) -> (InstanceCfg, Vec<InterfaceCfg>) {
        let instance_cfg = InstanceCfg {
            system_id: SystemId::from(self.system_id),
            level: self.level,
            passive: self.passive,
            overload: false,
            tx_src_addr: constants.tx_src_address,
            v4prefixes: prefix_map(
                self.v4prefixes.iter().map(|prefix| {
                    (
                        IpAddr::V4(prefix.address),
                        prefix.mask,
                        prefix.metric,
                        &prefix.tags,
                    )
                }),
            ),
            v6prefixes: prefix_map(
                self.v6prefixes.iter().map(|prefix| {
                    (
                        IpAddr::V6(prefix.address),
                        prefix.mask,
                        prefix.metric,
                        &prefix.tags,
                    )
                }),
            ),
            kernel_route_table: self.kernel_route_table.clone(),
        };

        let interface_cfgs = self
            .interfaces
            .iter()
            .map(|iface| {
                let mut cfg = InterfaceCfg::new(
                    &iface.name,
                    iface.address.unwrap_or(Ipv4Addr::LOCALHOST),
                );
                if let Some(metric) = iface.metric {
                    cfg.metric = metric;
                }
                if let Some(pod) = iface.pod {
                    cfg.pod = pod;
                }
                if let Some(mtu) = iface.mtu {
                    cfg.mtu = mtu;
                }
                if let Some(port) = iface.rx_lie_port.or(self.rx_lie_port) {
                    cfg.rx_lie_port = port;
                }
                if let Some(port) = iface.tx_lie_port {
                    cfg.tx_lie_port = port;
                }
                if let Some(port) = iface.rx_tie_port {
                    cfg.rx_tie_port = port;
                }
                if let Some(addr) = iface
                    .rx_lie_mcast_address
                    .or(self.rx_lie_mcast_address)
                    .or(constants.lie_mcast_address)
                {
                    cfg.rx_lie_mcast_addr = addr;
                }
                if let Some(addr) = iface
                    .tx_lie_mcast_address
                    .or(constants.lie_mcast_address)
                {
                    cfg.tx_lie_mcast_addr = addr;
                }
                cfg
            })
            .collect();

        (instance_cfg, interface_cfgs)
    }
}

// ===== helper functions =====

fn prefix_map<'a>(
    prefixes: impl Iterator<Item = (IpAddr, u8, u32, &'a Vec<u64>)>,
) -> PrefixMap {
    prefixes
        .filter_map(|(address, mask, metric, tags)| {
            let prefix = IpNetwork::new(address, mask).ok()?;
            let attrs = PrefixAttrs {
                metric,
                tags: tags.iter().copied().collect::<BTreeSet<_>>(),
            };
            Some((prefix, attrs))
        })
        .collect()
}
