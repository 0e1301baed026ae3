//! Trade request and its route encoding.
//!
//! A route looks like `/:network/:market/:outcome/:action/:queryparams`
//! where the last segment is a form-encoded query carrying `amount`,
//! `price`, `redirect` and `creationTX`.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use trampoline_ledger::{Address, TxHash, MAINNET, RINKEBY};
use url::form_urlencoded;

const NETWORK_NAMES: [(&str, &str); 2] = [("Rinkeby", RINKEBY), ("mainnet", MAINNET)];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RequestError {
    #[error("route must have the form /:network/:market/:outcome/:action/:queryparams, got '{0}'")]
    MalformedRoute(String),

    #[error("missing required parameter '{0}'")]
    Missing(&'static str),

    #[error("invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

fn invalid(field: &'static str, reason: impl fmt::Display) -> RequestError {
    RequestError::Invalid {
        field,
        reason: reason.to_string(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeAction {
    Buy,
    Sell,
}

impl TradeAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Buy => "buy",
            Self::Sell => "sell",
        }
    }
}

impl fmt::Display for TradeAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TradeAction {
    type Err = RequestError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        match text {
            "buy" => Ok(Self::Buy),
            "sell" => Ok(Self::Sell),
            other => Err(invalid("action", format!("'{}' is neither buy nor sell", other))),
        }
    }
}

/// The route parameters exactly as received, before validation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawRequest {
    pub network: String,
    pub market: String,
    pub outcome: String,
    pub action: String,
    pub amount: Option<String>,
    pub price: Option<String>,
    pub redirect: Option<String>,
    pub creation_tx: Option<String>,
}

/// A validated trade request. Created once, never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Request {
    pub network_id: String,
    pub market: Address,
    pub creation_tx: TxHash,
    pub outcome: u32,
    pub action: TradeAction,
    pub amount: String,
    pub price: String,
    pub redirect_url: String,
}

fn required(value: Option<String>, name: &'static str) -> Result<String, RequestError> {
    match value {
        Some(value) if !value.is_empty() => Ok(value),
        _ => Err(RequestError::Missing(name)),
    }
}

fn decimal(value: String, name: &'static str) -> Result<String, RequestError> {
    let mut parts = value.splitn(2, '.');
    let whole = parts.next().unwrap_or_default();
    let fraction = parts.next();
    let digits = |part: &str| part.chars().all(|c| c.is_ascii_digit());
    let valid = digits(whole)
        && fraction.map_or(true, |f| !f.is_empty() && digits(f))
        && !whole.is_empty();
    if valid {
        Ok(value)
    } else {
        Err(invalid(name, format!("'{}' is not a decimal number", value)))
    }
}

/// Map a network name from a route to its id; ids pass through.
pub fn network_id_for(segment: &str) -> String {
    NETWORK_NAMES
        .iter()
        .find(|(name, _)| *name == segment)
        .map(|(_, id)| id.to_string())
        .unwrap_or_else(|| segment.to_string())
}

/// Route segment for a network id: the name when one is known.
pub fn network_segment(network_id: &str) -> &str {
    NETWORK_NAMES
        .iter()
        .find(|(_, id)| *id == network_id)
        .map(|(name, _)| *name)
        .unwrap_or(network_id)
}

impl TryFrom<RawRequest> for Request {
    type Error = RequestError;

    fn try_from(raw: RawRequest) -> Result<Self, Self::Error> {
        let network_id = required(Some(network_id_for(&raw.network)), "network")?;
        let market = required(Some(raw.market), "market")?
            .parse()
            .map_err(|e| invalid("market", e))?;
        let outcome = required(Some(raw.outcome), "outcome")?
            .parse()
            .map_err(|e| invalid("outcome", e))?;
        let action = required(Some(raw.action), "action")?.parse()?;
        let creation_tx = required(raw.creation_tx, "creationTX")?
            .parse()
            .map_err(|e| invalid("creationTX", e))?;

        Ok(Self {
            network_id,
            market,
            creation_tx,
            outcome,
            action,
            amount: decimal(required(raw.amount, "amount")?, "amount")?,
            price: decimal(required(raw.price, "price")?, "price")?,
            redirect_url: required(raw.redirect, "redirect")?,
        })
    }
}

impl Request {
    /// Parse a route path such as
    /// `/Rinkeby/0xabc.../1/buy/amount=1&price=0.5&redirect=...&creationTX=0x...`.
    pub fn from_route(route: &str) -> Result<Self, RequestError> {
        let path = route.strip_prefix('/').unwrap_or(route);
        let segments: Vec<&str> = path.splitn(5, '/').collect();
        let [network, market, outcome, action, query] = segments.as_slice() else {
            return Err(RequestError::MalformedRoute(route.to_string()));
        };
        if [network, market, outcome, action].iter().any(|s| s.is_empty()) {
            return Err(RequestError::MalformedRoute(route.to_string()));
        }

        let mut raw = RawRequest {
            network: network.to_string(),
            market: market.to_string(),
            outcome: outcome.to_string(),
            action: action.to_string(),
            ..RawRequest::default()
        };
        for (key, value) in form_urlencoded::parse(query.trim_start_matches('?').as_bytes()) {
            let slot = match &*key {
                "amount" => &mut raw.amount,
                "price" => &mut raw.price,
                "redirect" => &mut raw.redirect,
                "creationTX" => &mut raw.creation_tx,
                _ => continue,
            };
            *slot = Some(value.into_owned());
        }
        Self::try_from(raw)
    }

    pub fn to_route(&self) -> String {
        let query = form_urlencoded::Serializer::new(String::new())
            .append_pair("amount", &self.amount)
            .append_pair("price", &self.price)
            .append_pair("redirect", &self.redirect_url)
            .append_pair("creationTX", &self.creation_tx.to_string())
            .finish();
        format!(
            "/{}/{}/{}/{}/{}",
            network_segment(&self.network_id),
            self.market,
            self.outcome,
            self.action,
            query
        )
    }
}
