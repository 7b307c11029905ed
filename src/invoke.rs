//! Builds the payable `invokeAgent` call from the dashboard form.

use crate::config::DashboardConfig;
use crate::domain::errors::InvokeError;
use crate::domain::types::WalletContext;
use crate::features::normalize::parse_decimal_u256;
use alloy_primitives::{keccak256, Address, Bytes, U256};
use serde::{Deserialize, Serialize};

pub const INVOKE_AGENT_SIGNATURE: &str = "invokeAgent(uint256)";
const WEI_DECIMALS: usize = 18;

/// Raw form input, exactly as typed.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct InvocationForm {
    pub agent_id: String,
    pub amount_eth: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct InvocationRequest {
    pub manager: Address,
    pub from: Address,
    pub agent_id: u64,
    pub value_wei: U256,
    pub calldata: Bytes,
}

/// Checks run in the order the dashboard surfaces them: wallet, network,
/// manager, then form fields. `WrongChain` means the host should offer a
/// network switch rather than submit.
pub fn prepare_invocation(
    form: &InvocationForm,
    wallet: &WalletContext,
    config: &DashboardConfig,
) -> Result<InvocationRequest, InvokeError> {
    let from = wallet.account.ok_or(InvokeError::NotConnected)?;
    if wallet.chain_id != Some(config.target_chain_id) {
        return Err(InvokeError::WrongChain {
            expected: config.target_chain_id,
            actual: wallet.chain_id,
        });
    }
    let manager = config
        .manager_address
        .ok_or(InvokeError::ManagerNotConfigured)?;
    let agent_id = parse_agent_id(&form.agent_id)?;
    let value_wei = parse_ether(&form.amount_eth).map_err(InvokeError::InvalidAmount)?;

    Ok(InvocationRequest {
        manager,
        from,
        agent_id,
        value_wei,
        calldata: invoke_agent_calldata(agent_id),
    })
}

fn parse_agent_id(raw: &str) -> Result<u64, InvokeError> {
    let trimmed = raw.trim();
    let agent_id = trimmed
        .parse::<u64>()
        .map_err(|_| InvokeError::InvalidAgentId(format!("`{trimmed}` is not a whole number")))?;
    if agent_id == 0 {
        return Err(InvokeError::InvalidAgentId(
            "agent id must be positive".to_string(),
        ));
    }
    Ok(agent_id)
}

pub fn invoke_agent_selector() -> [u8; 4] {
    let hash = keccak256(INVOKE_AGENT_SIGNATURE.as_bytes());
    [hash[0], hash[1], hash[2], hash[3]]
}

pub fn invoke_agent_calldata(agent_id: u64) -> Bytes {
    let mut calldata = Vec::with_capacity(36);
    calldata.extend_from_slice(&invoke_agent_selector());
    calldata.extend_from_slice(&U256::from(agent_id).to_be_bytes::<32>());
    Bytes::from(calldata)
}

/// Parses a decimal ETH amount ("0.001", "2", ".5") into wei.
pub fn parse_ether(raw: &str) -> Result<U256, String> {
    let trimmed = raw.trim();
    let (whole, fraction) = trimmed.split_once('.').unwrap_or((trimmed, ""));
    if whole.is_empty() && fraction.is_empty() {
        return Err("amount cannot be empty".to_string());
    }
    if fraction.len() > WEI_DECIMALS {
        return Err(format!("at most {WEI_DECIMALS} decimal places are allowed"));
    }
    let whole = if whole.is_empty() { "0" } else { whole };
    let padded = format!("{fraction:0<width$}", width = WEI_DECIMALS);
    let digits = format!("{whole}{padded}");
    parse_decimal_u256(&digits, "amount")
}

/// Renders wei as ETH with trailing zeros trimmed; zero renders as "-".
pub fn pretty_eth(wei: U256) -> String {
    if wei.is_zero() {
        return "-".to_string();
    }
    let digits = format!("{:0>width$}", wei.to_string(), width = WEI_DECIMALS + 1);
    let (whole, fraction) = digits.split_at(digits.len() - WEI_DECIMALS);
    let fraction = fraction.trim_end_matches('0');
    if fraction.is_empty() {
        format!("{whole} ETH")
    } else {
        format!("{whole}.{fraction} ETH")
    }
}
