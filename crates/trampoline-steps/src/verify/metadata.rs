//! Verified subject metadata and its assembly from on-chain sources.

use crate::error::StageError;
use serde::{Deserialize, Serialize};
use trampoline_ledger::{Address, Int256, MarketCreated, Uint256, H256};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SubjectKind {
    YesNo,
    Categorical,
    Scalar,
}

impl TryFrom<u8> for SubjectKind {
    type Error = StageError;

    fn try_from(tag: u8) -> Result<Self, Self::Error> {
        match tag {
            0 => Ok(Self::YesNo),
            1 => Ok(Self::Categorical),
            2 => Ok(Self::Scalar),
            other => Err(StageError::malformed(format!(
                "unknown market type {}",
                other
            ))),
        }
    }
}

/// Creator-supplied JSON carried in the event's `extraInfo` field.
#[derive(Debug, Deserialize)]
struct ExtraInfo {
    #[serde(rename = "longDescription")]
    long_description: String,
    #[serde(rename = "resolutionSource", default)]
    resolution_source: Option<String>,
    #[serde(rename = "_scalarDenomination", default)]
    scalar_denomination: Option<String>,
}

/// Values read directly from the market contract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OnChainState {
    pub number_of_outcomes: Uint256,
    pub num_ticks: Uint256,
    pub denomination_token: Address,
    pub end_time: Uint256,
    pub is_finalized: bool,
}

/// The verified record. Only produced once every check passed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubjectMetadata {
    pub market: Address,
    pub number_of_outcomes: Uint256,
    pub num_ticks: Uint256,
    pub denomination_token: Address,
    pub end_time: Uint256,
    pub is_finalized: bool,
    pub description: String,
    pub long_description: String,
    pub resolution_source: String,
    pub outcomes: Vec<String>,
    pub market_creation_fee: Uint256,
    pub min_price: Int256,
    pub max_price: Int256,
    pub kind: SubjectKind,
    pub scalar_denomination: Option<String>,
}

/// A `bytes32` short string: UTF-8, right-padded with zero bytes.
pub fn decode_short_string(word: &H256) -> Result<String, StageError> {
    let bytes = word.as_bytes();
    let end = bytes.iter().rposition(|b| *b != 0).map_or(0, |i| i + 1);
    String::from_utf8(bytes[..end].to_vec())
        .map_err(|_| StageError::malformed(format!("outcome {} is not a short string", word)))
}

/// Combine contract state and the creation event. Rejects malformed extra
/// info instead of defaulting it; only the resolution source and scalar unit
/// may be absent.
pub fn assemble(
    market: Address,
    state: OnChainState,
    event: &MarketCreated,
) -> Result<SubjectMetadata, StageError> {
    let extra: ExtraInfo = serde_json::from_str(&event.extra_info)
        .map_err(|e| StageError::malformed(format!("extraInfo: {}", e)))?;
    let outcomes = event
        .outcomes
        .iter()
        .map(decode_short_string)
        .collect::<Result<Vec<_>, _>>()?;

    Ok(SubjectMetadata {
        market,
        number_of_outcomes: state.number_of_outcomes,
        num_ticks: state.num_ticks,
        denomination_token: state.denomination_token,
        end_time: state.end_time,
        is_finalized: state.is_finalized,
        description: event.description.clone(),
        long_description: extra.long_description,
        resolution_source: extra.resolution_source.unwrap_or_default(),
        outcomes,
        market_creation_fee: event.market_creation_fee,
        min_price: event.min_price,
        max_price: event.max_price,
        kind: SubjectKind::try_from(event.market_type)?,
        scalar_denomination: extra.scalar_denomination,
    })
}
