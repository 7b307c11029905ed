use crate::domain::errors::ConfigError;
use crate::features::event_source::SubscriptionFilter;
use crate::features::normalize;
use crate::storage::projection::ProjectionSettings;
use crate::timing::{
    secs_to_ns, DEFAULT_DISPLAY_LIMIT, DEFAULT_LEDGER_CAPACITY, DEFAULT_MAX_VISIBLE_TOASTS,
    DEFAULT_STALL_AFTER_SECS, DEFAULT_TOAST_TTL_MS, MAX_LEDGER_CAPACITY,
};
use alloy_primitives::Address;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

pub const SEPOLIA_CHAIN_ID: u64 = 11_155_111;
pub const DEFAULT_NETWORK: &str = "sepolia";

const MANAGER_ADDRESS_ENV: &str = "AGENTFI_MANAGER_ADDRESS";
const CHAIN_ID_ENV: &str = "AGENTFI_CHAIN_ID";
const NETWORK_ENV: &str = "AGENTFI_NETWORK";
const EXPLORER_BASE_ENV: &str = "AGENTFI_EXPLORER_BASE";
const LEDGER_CAPACITY_ENV: &str = "AGENTFI_LEDGER_CAPACITY";
const STALL_AFTER_SECS_ENV: &str = "AGENTFI_STALL_AFTER_SECS";

const KNOWN_EXPLORERS: &[(&str, &str, &str)] = &[
    ("sepolia", "https://sepolia.etherscan.io", "Sepolia"),
    ("somnia", "https://shannon-explorer.somnia.network", "Somnia"),
];

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(default, rename_all = "camelCase")]
pub struct DashboardConfig {
    pub manager_address: Option<Address>,
    pub target_chain_id: u64,
    pub network: String,
    pub explorer_base: Option<String>,
    pub ledger_capacity: usize,
    pub display_limit: usize,
    pub max_visible_toasts: usize,
    pub toast_ttl_ms: u64,
    pub stall_after_secs: u64,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            manager_address: None,
            target_chain_id: SEPOLIA_CHAIN_ID,
            network: DEFAULT_NETWORK.to_string(),
            explorer_base: None,
            ledger_capacity: DEFAULT_LEDGER_CAPACITY,
            display_limit: DEFAULT_DISPLAY_LIMIT,
            max_visible_toasts: DEFAULT_MAX_VISIBLE_TOASTS,
            toast_ttl_ms: DEFAULT_TOAST_TTL_MS,
            stall_after_secs: DEFAULT_STALL_AFTER_SECS,
        }
    }
}

impl DashboardConfig {
    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self =
            serde_json::from_str(raw).map_err(|error| ConfigError::Json(error.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults overlaid with any `AGENTFI_*` variables that are set and
    /// non-empty.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Some(raw) = env_value(MANAGER_ADDRESS_ENV) {
            config.manager_address = Some(parse_address(MANAGER_ADDRESS_ENV, &raw)?);
        }
        if let Some(raw) = env_value(CHAIN_ID_ENV) {
            config.target_chain_id = parse_number(CHAIN_ID_ENV, &raw)?;
        }
        if let Some(raw) = env_value(NETWORK_ENV) {
            config.network = raw.to_ascii_lowercase();
        }
        if let Some(raw) = env_value(EXPLORER_BASE_ENV) {
            config.explorer_base = Some(raw);
        }
        if let Some(raw) = env_value(LEDGER_CAPACITY_ENV) {
            config.ledger_capacity = parse_number(LEDGER_CAPACITY_ENV, &raw)?;
        }
        if let Some(raw) = env_value(STALL_AFTER_SECS_ENV) {
            config.stall_after_secs = parse_number(STALL_AFTER_SECS_ENV, &raw)?;
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=MAX_LEDGER_CAPACITY).contains(&self.ledger_capacity) {
            return Err(ConfigError::InvalidValue {
                key: "ledgerCapacity",
                reason: format!(
                    "{} is outside 1..={MAX_LEDGER_CAPACITY}",
                    self.ledger_capacity
                ),
            });
        }
        if self.display_limit == 0 {
            return Err(ConfigError::InvalidValue {
                key: "displayLimit",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.max_visible_toasts == 0 {
            return Err(ConfigError::InvalidValue {
                key: "maxVisibleToasts",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.toast_ttl_ms == 0 {
            return Err(ConfigError::InvalidValue {
                key: "toastTtlMs",
                reason: "must be positive".to_string(),
            });
        }
        if self.target_chain_id == 0 {
            return Err(ConfigError::InvalidValue {
                key: "targetChainId",
                reason: "must be positive".to_string(),
            });
        }
        if self.network.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "network",
                reason: "cannot be empty".to_string(),
            });
        }
        if let Some(base) = &self.explorer_base {
            let trimmed = base.trim();
            if !(trimmed.starts_with("https://") || trimmed.starts_with("http://")) {
                return Err(ConfigError::InvalidValue {
                    key: "explorerBase",
                    reason: "must be an http(s) url".to_string(),
                });
            }
        }
        Ok(())
    }

    pub fn subscription_filter(&self) -> SubscriptionFilter {
        SubscriptionFilter {
            contract: self.manager_address,
        }
    }

    pub fn projection_settings(&self) -> ProjectionSettings {
        ProjectionSettings {
            display_limit: self.display_limit,
            stall_after_ns: secs_to_ns(self.stall_after_secs),
        }
    }

    pub fn explorer(&self) -> Explorer {
        Explorer::resolve(&self.network, self.explorer_base.as_deref())
    }
}

fn env_value(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn parse_address(key: &'static str, raw: &str) -> Result<Address, ConfigError> {
    normalize::parse_address(raw, key).map_err(|reason| ConfigError::InvalidValue { key, reason })
}

fn parse_number<T: FromStr>(key: &'static str, raw: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    raw.parse::<T>().map_err(|error| ConfigError::InvalidValue {
        key,
        reason: error.to_string(),
    })
}

/// Block-explorer link builder.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Explorer {
    pub base: String,
    pub label: String,
}

impl Explorer {
    /// An explicit base wins (trailing slash trimmed, labelled with the network
    /// name). Otherwise the network's default explorer; unknown networks fall
    /// back to Sepolia.
    pub fn resolve(network: &str, explicit_base: Option<&str>) -> Self {
        let network = network.trim().to_ascii_lowercase();
        if let Some(base) = explicit_base.map(str::trim).filter(|base| !base.is_empty()) {
            return Self {
                base: base.strip_suffix('/').unwrap_or(base).to_string(),
                label: network,
            };
        }
        let (_, base, label) = KNOWN_EXPLORERS
            .iter()
            .find(|(name, _, _)| *name == network)
            .unwrap_or(&KNOWN_EXPLORERS[0]);
        Self {
            base: (*base).to_string(),
            label: (*label).to_string(),
        }
    }

    pub fn tx_url(&self, tx_hash: &str) -> String {
        format!("{}/tx/{tx_hash}", self.base)
    }

    pub fn address_url(&self, address: &str) -> String {
        format!("{}/address/{address}", self.base)
    }

    pub fn contract_url(&self, contract: &str, method: &str, params: Option<&str>) -> String {
        match params.filter(|params| !params.is_empty()) {
            Some(params) => format!(
                "{}/address/{contract}#readContract#F{method}?{params}",
                self.base
            ),
            None => format!("{}/address/{contract}#readContract#F{method}", self.base),
        }
    }
}
