//! Wallet balance threshold alerts on EVM chains.
//!
//! A target encodes the whole rule, `<chain>:<address>:<token>:<below|above>:<threshold>`,
//! so the fingerprint only needs to remember whether the rule currently holds.

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use log::info;
use serde::Deserialize;
use serde_json::Map;
use serde_json::Value;
use serde_json::json;

use crate::entity::ConnectorKind;
use crate::entity::Fingerprint;
use crate::entity::ObservedState;
use crate::entity::ObservedStateBuilder;
use crate::source::BaseConnector;
use crate::source::ConnectorInfo;
use crate::source::SourceConnector;
use crate::source::error::SourceError;

pub const TRIGGERED: &str = "triggered";
pub const CLEAR: &str = "clear";

/// Chains with a built-in RPC endpoint.
pub const CHAIN_NAMES: [&str; 4] = ["arbitrum", "base", "polygon", "optimism"];

/// `balanceOf(address)`
const BALANCE_OF_SELECTOR: &str = "0x70a08231";

const TEMPLATE: &str = r#"💰 <b>Balance alert: {{ name | html }}</b>

{{ state.extra.token }} on {{ state.extra.chain }} is now <b>{{ state.extra.balance }}</b>, {{ state.extra.direction }} your threshold of {{ state.extra.threshold }}.

👛 <code>{{ state.extra.address | html }}</code>
🔗 <a href="{{ state.url | html }}">View on explorer</a>"#;

#[derive(Clone, Debug)]
pub struct Token {
    pub symbol: &'static str,
    /// `None` for the chain's native coin.
    pub contract: Option<&'static str>,
    pub decimals: u32,
}

#[derive(Clone, Debug)]
pub struct Chain {
    pub rpc_url: String,
    pub explorer_url: &'static str,
    pub tokens: Vec<Token>,
}

impl Chain {
    fn token(&self, symbol: &str) -> Option<&Token> {
        self.tokens
            .iter()
            .find(|t| t.symbol.eq_ignore_ascii_case(symbol))
    }
}

fn native(symbol: &'static str) -> Token {
    Token {
        symbol,
        contract: None,
        decimals: 18,
    }
}

fn erc20(symbol: &'static str, contract: &'static str, decimals: u32) -> Token {
    Token {
        symbol,
        contract: Some(contract),
        decimals,
    }
}

fn default_chains() -> BTreeMap<String, Chain> {
    let mut chains = BTreeMap::new();
    chains.insert(
        "arbitrum".to_string(),
        Chain {
            rpc_url: "https://arb1.arbitrum.io/rpc".to_string(),
            explorer_url: "https://arbiscan.io",
            tokens: vec![
                native("ETH"),
                erc20("USDC", "0xaf88d065e77c8cC2239327C5EDb3A432268e5831", 6),
                erc20("USDT", "0xFd086bC7CD5C481DCC9C85ebE478A1C0b69FCbb9", 6),
                erc20("ARB", "0x912CE59144191C1204E64559FE8253a0e49E6548", 18),
            ],
        },
    );
    chains.insert(
        "base".to_string(),
        Chain {
            rpc_url: "https://mainnet.base.org".to_string(),
            explorer_url: "https://basescan.org",
            tokens: vec![
                native("ETH"),
                erc20("USDC", "0x833589fCD6eDb6E08f4c7C32D4f71b54bdA02913", 6),
            ],
        },
    );
    chains.insert(
        "polygon".to_string(),
        Chain {
            rpc_url: "https://polygon-rpc.com".to_string(),
            explorer_url: "https://polygonscan.com",
            tokens: vec![
                native("MATIC"),
                erc20("USDC", "0x3c499c542cEF5E3811e1192ce70d8cC03d5c3359", 6),
                erc20("USDT", "0xc2132D05D31c914a87C6611C10748AEb04B58e8F", 6),
            ],
        },
    );
    chains.insert(
        "optimism".to_string(),
        Chain {
            rpc_url: "https://mainnet.optimism.io".to_string(),
            explorer_url: "https://optimistic.etherscan.io",
            tokens: vec![
                native("ETH"),
                erc20("USDC", "0x0b2C639c533813f4Aa9D7837CAf62653d097Ff85", 6),
                erc20("USDT", "0x94b008aA00579c1307B0EF2c499aD98a8ce58e58", 6),
            ],
        },
    );
    chains
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    Below,
    Above,
}

impl Direction {
    fn as_str(&self) -> &'static str {
        match self {
            Direction::Below => "below",
            Direction::Above => "above",
        }
    }
}

/// A parsed balance target.
#[derive(Clone, Debug, PartialEq)]
pub struct BalanceRule {
    pub chain: String,
    pub address: String,
    pub token: String,
    pub direction: Direction,
    pub threshold: f64,
}

impl BalanceRule {
    pub fn holds(&self, balance: f64) -> bool {
        match self.direction {
            Direction::Below => balance < self.threshold,
            Direction::Above => balance > self.threshold,
        }
    }
}

impl fmt::Display for BalanceRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}:{}:{}",
            self.chain,
            self.address,
            self.token,
            self.direction.as_str(),
            self.threshold
        )
    }
}

impl FromStr for BalanceRule {
    type Err = SourceError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = raw.trim().split(':').map(str::trim).collect();
        let [chain, address, token, direction, threshold] = parts.as_slice() else {
            return Err(SourceError::invalid_target(
                raw,
                "expected <chain>:<address>:<token>:<below|above>:<threshold>",
            ));
        };

        let is_address = address.len() == 42
            && address.starts_with("0x")
            && address[2..].chars().all(|c| c.is_ascii_hexdigit());
        if !is_address {
            return Err(SourceError::invalid_target(
                raw,
                "address must be 0x followed by 40 hex digits",
            ));
        }

        let direction = match direction.to_ascii_lowercase().as_str() {
            "below" => Direction::Below,
            "above" => Direction::Above,
            _ => {
                return Err(SourceError::invalid_target(
                    raw,
                    "direction must be `below` or `above`",
                ));
            }
        };

        let threshold = threshold
            .parse::<f64>()
            .ok()
            .filter(|t| t.is_finite() && *t >= 0.0)
            .ok_or_else(|| {
                SourceError::invalid_target(raw, "threshold must be a non-negative number")
            })?;

        Ok(Self {
            chain: chain.to_ascii_lowercase(),
            address: address.to_ascii_lowercase(),
            token: token.to_ascii_uppercase(),
            direction,
            threshold,
        })
    }
}

#[derive(Deserialize, Debug)]
struct RpcResponse {
    result: Option<String>,
    error: Option<RpcError>,
}

#[derive(Deserialize, Debug)]
struct RpcError {
    message: String,
}

/// Converts a hex quantity in base units into a decimal amount.
pub fn hex_to_amount(hex: &str, decimals: u32) -> Result<f64, SourceError> {
    let digits = hex.strip_prefix("0x").unwrap_or(hex);
    let mut value = 0f64;
    for c in digits.chars() {
        let digit = c.to_digit(16).ok_or_else(|| SourceError::UnexpectedResult {
            message: format!("`{hex}` is not a hex quantity"),
        })?;
        value = value * 16.0 + f64::from(digit);
    }
    Ok(value / 10f64.powi(decimals as i32))
}

pub struct BalanceSource {
    pub base: BaseConnector,
    /// Chain name to RPC endpoint and known tokens.
    pub chains: BTreeMap<String, Chain>,
}

impl BalanceSource {
    pub fn new(rpc_overrides: &HashMap<String, String>) -> Self {
        let info = ConnectorInfo {
            kind: ConnectorKind::Balance,
            name: "Wallet Balance".to_string(),
            api_url: String::new(),
            interval: Duration::from_secs(30),
            target_delay: Duration::from_secs(1),
            template: TEMPLATE,
        };

        let mut chains = default_chains();
        for (name, url) in rpc_overrides {
            if let Some(chain) = chains.get_mut(&name.to_ascii_lowercase()) {
                chain.rpc_url = url.clone();
            }
        }

        Self {
            base: BaseConnector::new(info, 120),
            chains,
        }
    }

    fn chain(&self, name: &str) -> Result<&Chain, SourceError> {
        self.chains
            .get(name)
            .ok_or_else(|| SourceError::invalid_target(name, "unsupported chain"))
    }

    async fn rpc_call(&self, chain: &Chain, method: &str, params: Value) -> Result<String, SourceError> {
        let body = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params,
        });
        let request = self.base.client.post(&chain.rpc_url).json(&body);
        let response: RpcResponse = self.base.send_json(request).await?;

        if let Some(error) = response.error {
            return Err(SourceError::ApiError {
                message: error.message,
            });
        }
        response.result.ok_or_else(|| SourceError::MissingField {
            field: "result".to_string(),
        })
    }

    /// Reads the balance the rule refers to, in whole tokens.
    pub async fn read_balance(&self, rule: &BalanceRule) -> Result<f64, SourceError> {
        let chain = self.chain(&rule.chain)?;
        let token = chain
            .token(&rule.token)
            .ok_or_else(|| SourceError::invalid_target(&rule.token, "unknown token"))?;

        debug!("Reading {} balance of {} on {}", token.symbol, rule.address, rule.chain);
        let raw = match token.contract {
            None => {
                self.rpc_call(chain, "eth_getBalance", json!([rule.address, "latest"]))
                    .await?
            }
            Some(contract) => {
                let data = format!(
                    "{BALANCE_OF_SELECTOR}{:0>64}",
                    rule.address.trim_start_matches("0x")
                );
                self.rpc_call(
                    chain,
                    "eth_call",
                    json!([{ "to": contract, "data": data }, "latest"]),
                )
                .await?
            }
        };
        hex_to_amount(&raw, token.decimals)
    }
}

#[async_trait]
impl SourceConnector for BalanceSource {
    fn info(&self) -> &ConnectorInfo {
        &self.base.info
    }

    fn normalize_target(&self, raw: &str) -> Result<String, SourceError> {
        let rule: BalanceRule = raw.parse()?;
        let chain = self.chain(&rule.chain)?;
        if chain.token(&rule.token).is_none() {
            let known: Vec<&str> = chain.tokens.iter().map(|t| t.symbol).collect();
            return Err(SourceError::invalid_target(
                raw,
                format!("token must be one of {}", known.join(", ")),
            ));
        }
        Ok(rule.to_string())
    }

    async fn verify_target(&self, target: &str) -> Result<Option<String>, SourceError> {
        let rule: BalanceRule = target.parse()?;
        self.read_balance(&rule).await?;
        Ok(None)
    }

    async fn fetch_current_state(&self, target: &str) -> Result<ObservedState, SourceError> {
        let rule: BalanceRule = target.parse()?;
        let balance = self.read_balance(&rule).await?;
        let triggered = rule.holds(balance);
        let chain = self.chain(&rule.chain)?;

        info!(
            "Balance of {} {} on {}: {balance} ({})",
            rule.address,
            rule.token,
            rule.chain,
            if triggered { TRIGGERED } else { CLEAR }
        );

        let mut extra = Map::new();
        extra.insert("chain".to_string(), Value::from(rule.chain.clone()));
        extra.insert("address".to_string(), Value::from(rule.address.clone()));
        extra.insert("token".to_string(), Value::from(rule.token.clone()));
        extra.insert("balance".to_string(), Value::from(balance));
        extra.insert("threshold".to_string(), Value::from(rule.threshold));
        extra.insert(
            "direction".to_string(),
            Value::from(rule.direction.as_str()),
        );

        Ok(ObservedStateBuilder::default()
            .target_id(target)
            .item_id(if triggered { TRIGGERED } else { CLEAR })
            .title(format!(
                "{} {} {} {}",
                rule.token,
                rule.direction.as_str(),
                rule.threshold,
                rule.chain
            ))
            .url(format!("{}/address/{}", chain.explorer_url, rule.address))
            .extra(extra)
            .build()?)
    }

    /// Alerts when the rule starts to hold, not again until it has cleared.
    fn has_changed(&self, old: &Fingerprint, new: &Fingerprint) -> bool {
        old.as_str() != TRIGGERED && new.as_str() == TRIGGERED
    }
}

impl Default for BalanceSource {
    fn default() -> Self {
        Self::new(&HashMap::new())
    }
}
