//! Trusted contract surface: market getters, the namespace membership
//! predicate and the `MarketCreated` event.

use crate::abi::{AbiError, DecodedEvent, Event, EventParam, Function, ParamType, Token};
use crate::client::{LedgerClient, LedgerError, LogEntry, RemovalMark};
use crate::primitives::{Address, Int256, Uint256, H256};

pub mod market {
    use super::*;

    pub fn get_number_of_outcomes() -> Function {
        Function::new("getNumberOfOutcomes", vec![], vec![ParamType::Uint(256)])
    }

    pub fn get_num_ticks() -> Function {
        Function::new("getNumTicks", vec![], vec![ParamType::Uint(256)])
    }

    pub fn get_denomination_token() -> Function {
        Function::new("getDenominationToken", vec![], vec![ParamType::Address])
    }

    pub fn get_end_time() -> Function {
        Function::new("getEndTime", vec![], vec![ParamType::Uint(256)])
    }

    pub fn is_finalized() -> Function {
        Function::new("isFinalized", vec![], vec![ParamType::Bool])
    }
}

pub mod namespace {
    use super::*;

    pub fn is_container_for_market() -> Function {
        Function::new(
            "isContainerForMarket",
            vec![ParamType::Address],
            vec![ParamType::Bool],
        )
    }
}

async fn call_single(
    client: &dyn LedgerClient,
    to: &Address,
    function: &Function,
    args: &[Token],
) -> Result<Token, LedgerError> {
    let data = function.encode_call(args)?;
    let reply = client.call(to, &data).await?;
    let [token] = single_output(function, function.decode_output(&reply)?)?;
    Ok(token)
}

fn single_output(function: &Function, tokens: Vec<Token>) -> Result<[Token; 1], AbiError> {
    <[Token; 1]>::try_from(tokens).map_err(|tokens| AbiError::OutputCount {
        function: function.signature(),
        expected: 1,
        actual: tokens.len(),
    })
}

fn typed_output<T>(token: Option<T>, function: &Function) -> Result<T, LedgerError> {
    token.ok_or_else(|| AbiError::Field(function.name.clone()).into())
}

/// Read-only view of a market contract at an address claimed by the user.
pub struct MarketContract<'a> {
    client: &'a dyn LedgerClient,
    address: Address,
}

impl<'a> MarketContract<'a> {
    pub fn at(client: &'a dyn LedgerClient, address: Address) -> Self {
        Self { client, address }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    async fn uint(&self, function: Function) -> Result<Uint256, LedgerError> {
        let token = call_single(self.client, &self.address, &function, &[]).await?;
        typed_output(token.as_uint(), &function)
    }

    pub async fn number_of_outcomes(&self) -> Result<Uint256, LedgerError> {
        self.uint(market::get_number_of_outcomes()).await
    }

    pub async fn num_ticks(&self) -> Result<Uint256, LedgerError> {
        self.uint(market::get_num_ticks()).await
    }

    pub async fn end_time(&self) -> Result<Uint256, LedgerError> {
        self.uint(market::get_end_time()).await
    }

    pub async fn denomination_token(&self) -> Result<Address, LedgerError> {
        let function = market::get_denomination_token();
        let token = call_single(self.client, &self.address, &function, &[]).await?;
        typed_output(token.as_address(), &function)
    }

    pub async fn is_finalized(&self) -> Result<bool, LedgerError> {
        let function = market::is_finalized();
        let token = call_single(self.client, &self.address, &function, &[]).await?;
        typed_output(token.as_bool(), &function)
    }
}

/// The trusted namespace ("universe") contract.
pub struct NamespaceContract<'a> {
    client: &'a dyn LedgerClient,
    address: Address,
}

impl<'a> NamespaceContract<'a> {
    pub fn at(client: &'a dyn LedgerClient, address: Address) -> Self {
        Self { client, address }
    }

    /// Membership predicate. Only a canonical ABI bool decodes; any other
    /// reply is an [`AbiError`].
    pub async fn is_container_for_market(&self, market: Address) -> Result<bool, LedgerError> {
        let function = namespace::is_container_for_market();
        let token = call_single(
            self.client,
            &self.address,
            &function,
            &[Token::Address(market)],
        )
        .await?;
        typed_output(token.as_bool(), &function)
    }
}

pub const MARKET_CREATED: &str = "MarketCreated";

pub fn market_created_event() -> Event {
    Event::new(
        MARKET_CREATED,
        vec![
            EventParam::new("topic", ParamType::FixedBytes(32), true),
            EventParam::new("description", ParamType::String, false),
            EventParam::new("extraInfo", ParamType::String, false),
            EventParam::new("universe", ParamType::Address, true),
            EventParam::new("market", ParamType::Address, false),
            EventParam::new("marketCreator", ParamType::Address, true),
            EventParam::new(
                "outcomes",
                ParamType::Array(Box::new(ParamType::FixedBytes(32))),
                false,
            ),
            EventParam::new("marketCreationFee", ParamType::Uint(256), false),
            EventParam::new("minPrice", ParamType::Int(256), false),
            EventParam::new("maxPrice", ParamType::Int(256), false),
            EventParam::new("marketType", ParamType::Uint(8), false),
        ],
    )
}

/// Typed `MarketCreated` event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarketCreated {
    pub topic: H256,
    pub description: String,
    /// Free-form JSON supplied by the market creator.
    pub extra_info: String,
    pub universe: Address,
    pub market: Address,
    pub market_creator: Address,
    pub outcomes: Vec<H256>,
    pub market_creation_fee: Uint256,
    pub min_price: Int256,
    pub max_price: Int256,
    pub market_type: u8,
}

fn word(bytes: &[u8]) -> Option<H256> {
    <[u8; 32]>::try_from(bytes).ok().map(H256::new)
}

impl MarketCreated {
    pub fn from_event(event: &DecodedEvent) -> Result<Self, AbiError> {
        let field = |name: &str| {
            event
                .get(name)
                .ok_or_else(|| AbiError::Field(name.to_string()))
        };
        let typed = |name: &str| AbiError::Field(name.to_string());

        let outcomes = field("outcomes")?
            .as_array()
            .ok_or_else(|| typed("outcomes"))?
            .iter()
            .map(|item| item.as_fixed_bytes().and_then(word).ok_or_else(|| typed("outcomes")))
            .collect::<Result<Vec<_>, _>>()?;
        let market_type = field("marketType")?
            .as_uint()
            .and_then(|value| value.to_u64())
            .and_then(|value| u8::try_from(value).ok())
            .ok_or_else(|| typed("marketType"))?;

        Ok(Self {
            topic: field("topic")?
                .as_fixed_bytes()
                .and_then(word)
                .ok_or_else(|| typed("topic"))?,
            description: field("description")?
                .as_str()
                .ok_or_else(|| typed("description"))?
                .to_string(),
            extra_info: field("extraInfo")?
                .as_str()
                .ok_or_else(|| typed("extraInfo"))?
                .to_string(),
            universe: field("universe")?.as_address().ok_or_else(|| typed("universe"))?,
            market: field("market")?.as_address().ok_or_else(|| typed("market"))?,
            market_creator: field("marketCreator")?
                .as_address()
                .ok_or_else(|| typed("marketCreator"))?,
            outcomes,
            market_creation_fee: field("marketCreationFee")?
                .as_uint()
                .ok_or_else(|| typed("marketCreationFee"))?,
            min_price: field("minPrice")?.as_int().ok_or_else(|| typed("minPrice"))?,
            max_price: field("maxPrice")?.as_int().ok_or_else(|| typed("maxPrice"))?,
            market_type,
        })
    }

    /// The log entry `emitter` writes for this event.
    pub fn to_log(&self, emitter: Address) -> Result<LogEntry, AbiError> {
        let values = vec![
            Token::FixedBytes(self.topic.as_bytes().to_vec()),
            Token::String(self.description.clone()),
            Token::String(self.extra_info.clone()),
            Token::Address(self.universe),
            Token::Address(self.market),
            Token::Address(self.market_creator),
            Token::Array(
                self.outcomes
                    .iter()
                    .map(|outcome| Token::FixedBytes(outcome.as_bytes().to_vec()))
                    .collect(),
            ),
            Token::Uint(self.market_creation_fee),
            Token::Int(self.min_price),
            Token::Int(self.max_price),
            Token::Uint(Uint256::from(u64::from(self.market_type))),
        ];
        let (topics, data) = market_created_event().encode_log(&values)?;
        Ok(LogEntry {
            address: emitter,
            topics,
            data,
            removed: RemovalMark::NotRemoved,
            log_type: Some("mined".to_string()),
        })
    }
}
