#![allow(dead_code)]

use std::marker::PhantomData;
use std::sync::Arc;
use trampoline_engine::{PipelineError, Step, StepContext, StepExternalState, StepOutput, StepProps};
use trampoline_ledger::abi::encode;
use trampoline_ledger::contracts::{market, namespace};
use trampoline_ledger::{
    pinned_addresses, Address, AddressBook, ContractAddresses, Function, Int256, LedgerClient,
    LogEntry, MarketCreated, RemovalMark, ScriptedLedger, Token, TransactionReceipt, TxHash,
    Uint256, H256, RINKEBY,
};
use trampoline_steps::{Connected, Connection, ConnectorConfig, Identified, Request};

pub const MARKET: &str = "0x00000000000000000000000000000000000000aa";
pub const CREATION_TX: &str =
    "0x1111111111111111111111111111111111111111111111111111111111111111";
pub const LOCAL_NETWORK: &str = "1541460000";

pub fn request(network: &str) -> Request {
    Request::from_route(&format!(
        "/{}/{}/0/buy/amount=10&price=0.5&redirect=https%3A%2F%2Fexample.com&creationTX={}",
        network, MARKET, CREATION_TX
    ))
    .unwrap()
}

/// Plan without the injected candidate: the local endpoint, then `public`.
pub fn plan_config(local: &str, public: &[&str]) -> ConnectorConfig {
    ConnectorConfig {
        include_injected: false,
        local_endpoint: local.to_string(),
        public_endpoints: public.iter().map(|url| url.to_string()).collect(),
        ..ConnectorConfig::default()
    }
}

pub fn label(text: &str) -> H256 {
    let mut word = [0u8; 32];
    word[..text.len()].copy_from_slice(text.as_bytes());
    H256::new(word)
}

fn call(function: Function, args: &[Token]) -> Vec<u8> {
    function.encode_call(args).unwrap()
}

/// A market as a ledger would present it, genuine unless modified.
pub struct MarketFixture {
    pub network_id: String,
    pub trusted: ContractAddresses,
    pub market: Address,
    pub creation_tx: TxHash,
    pub membership_reply: Vec<u8>,
    pub denomination: Address,
    pub event: MarketCreated,
    pub logs: Vec<LogEntry>,
    pub accounts: Vec<Address>,
}

impl MarketFixture {
    pub fn genuine(network_id: &str) -> Self {
        let trusted = pinned_addresses(RINKEBY).unwrap();
        let market: Address = MARKET.parse().unwrap();
        let event = MarketCreated {
            topic: label("weather"),
            description: "Will it rain in Lisbon tomorrow?".into(),
            extra_info: r#"{"longDescription":"Any rain counts.","resolutionSource":"https://weather.example"}"#.into(),
            universe: trusted.trusted_namespace,
            market,
            market_creator: Address::new([0x42; 20]),
            outcomes: vec![label("Yes"), label("No")],
            market_creation_fee: Uint256::from(10_000_000_000_000_000u64),
            min_price: Int256::from(0i64),
            max_price: Int256::from(1_000_000_000_000_000_000i64),
            market_type: 0,
        };
        let log = event.to_log(trusted.core).unwrap();
        Self {
            network_id: network_id.to_string(),
            trusted,
            market,
            creation_tx: CREATION_TX.parse().unwrap(),
            membership_reply: encode(&[Token::Bool(true)]),
            denomination: trusted.token,
            event,
            logs: vec![log],
            accounts: vec![Address::new([0xa1; 20]), Address::new([0xa2; 20])],
        }
    }

    /// Another copy of the creation event, logged by `emitter`.
    pub fn logged_by(&self, emitter: Address) -> LogEntry {
        self.event.to_log(emitter).unwrap()
    }

    pub fn address_book(&self) -> Arc<AddressBook> {
        Arc::new(AddressBook::pinned().with_table(&self.network_id, self.trusted))
    }

    pub fn ledger(&self) -> ScriptedLedger {
        let uint = |value: u64| encode(&[Token::Uint(Uint256::from(value))]);
        ScriptedLedger::new(&self.network_id)
            .with_block_number(4_200_000)
            .with_accounts(self.accounts.clone())
            .with_call(
                self.trusted.trusted_namespace,
                call(
                    namespace::is_container_for_market(),
                    &[Token::Address(self.market)],
                ),
                self.membership_reply.clone(),
            )
            .with_call(self.market, call(market::get_number_of_outcomes(), &[]), uint(2))
            .with_call(self.market, call(market::get_num_ticks(), &[]), uint(10_000))
            .with_call(
                self.market,
                call(market::get_denomination_token(), &[]),
                encode(&[Token::Address(self.denomination)]),
            )
            .with_call(self.market, call(market::get_end_time(), &[]), uint(1_700_000_000))
            .with_call(
                self.market,
                call(market::is_finalized(), &[]),
                encode(&[Token::Bool(false)]),
            )
            .with_receipt(TransactionReceipt {
                transaction_hash: self.creation_tx,
                block_number: Some(4_100_000),
                logs: self.logs.clone(),
            })
    }

    /// `ledger` with every market getter answered by an empty reply, as a
    /// node does for an address without contract code.
    pub fn without_market_code(&self, ledger: ScriptedLedger) -> ScriptedLedger {
        [
            market::get_number_of_outcomes(),
            market::get_num_ticks(),
            market::get_denomination_token(),
            market::get_end_time(),
            market::is_finalized(),
        ]
        .into_iter()
        .fold(ledger, |ledger, getter| {
            ledger.with_call(self.market, call(getter, &[]), Vec::new())
        })
    }

    pub fn connection(&self) -> Connection {
        let client: Arc<dyn LedgerClient> = Arc::new(self.ledger());
        Connection {
            client,
            description: "http://scripted".to_string(),
            network_id: self.network_id.clone(),
        }
    }

    pub fn identified(&self) -> Identified {
        Identified {
            request: Arc::new(request(&self.network_id)),
            connection: self.connection(),
            identity: self.accounts[0],
        }
    }

    pub fn connected(&self) -> Connected {
        Connected {
            request: Arc::new(request(&self.network_id)),
            connection: self.connection(),
        }
    }
}

pub fn unmarked(mut log: LogEntry, removed: RemovalMark, log_type: Option<&str>) -> LogEntry {
    log.removed = removed;
    log.log_type = log_type.map(str::to_string);
    log
}

/// Passes its input straight through and holds the pipeline lock until told
/// otherwise, so every stage behind it runs immutable.
pub struct Lock<T>(PhantomData<fn() -> T>);

impl<T> Lock<T> {
    pub fn new() -> Self {
        Self(PhantomData)
    }
}

/// `true` takes the lock, `false` releases it.
#[derive(Debug, Clone, Copy)]
pub struct Hold(pub bool);

impl<T: Send + Sync + 'static> Step for Lock<T> {
    type Input = T;
    type Output = T;
    type Message = Hold;
    type State = StepOutput<T>;
    type View = ();

    fn mount(
        &self,
        props: StepProps<T>,
        ctx: &mut StepContext<Hold, T>,
    ) -> Result<StepOutput<T>, PipelineError> {
        let output = StepOutput::shared(props.input);
        ctx.publish(StepExternalState::new(output.clone(), true));
        Ok(output)
    }

    fn activate(
        &self,
        _state: &mut StepOutput<T>,
        _props: StepProps<T>,
        _ctx: &mut StepContext<Hold, T>,
    ) -> Result<(), PipelineError> {
        Ok(())
    }

    fn update(
        &self,
        state: &mut StepOutput<T>,
        Hold(exclusive): Hold,
        ctx: &mut StepContext<Hold, T>,
    ) -> Result<(), PipelineError> {
        ctx.publish(StepExternalState::new(state.clone(), exclusive));
        Ok(())
    }

    fn unmount(&self, _state: &mut StepOutput<T>) {}

    fn view(&self, _state: &StepOutput<T>) {}
}
