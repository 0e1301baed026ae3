//! Contract ABI codec.
//!
//! Decoding is strict on purpose: a bool must be exactly the word `0` or
//! `1`, an address word must carry twelve zero bytes, narrow integers must
//! fit, and static return data must have exactly the expected length. Data
//! reaching this module is untrusted; anything non-canonical is an error.

use crate::primitives::{Address, Int256, Uint256, H256};
use sha3::{Digest, Keccak256};
use std::fmt;
use thiserror::Error;

const WORD: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AbiError {
    #[error("data too short: need {needed} bytes at offset {offset}, have {available}")]
    OutOfBounds {
        offset: usize,
        needed: usize,
        available: usize,
    },

    #[error("non-canonical bool word {0}")]
    InvalidBool(String),

    #[error("address word has non-zero high bytes: {0}")]
    InvalidAddress(String),

    #[error("value does not fit {0}")]
    Overflow(String),

    #[error("non-zero padding after {0}")]
    DirtyPadding(String),

    #[error("string is not valid UTF-8")]
    InvalidUtf8,

    #[error("expected {expected} bytes of return data, got {actual}")]
    Length { expected: usize, actual: usize },

    #[error("log is not a {0} event")]
    TopicMismatch(String),

    #[error("{event} expects {expected} topics, got {actual}")]
    TopicCount {
        event: String,
        expected: usize,
        actual: usize,
    },

    #[error("argument {index} is not a {expected}")]
    ArgumentMismatch { index: usize, expected: String },

    #[error("missing or mistyped field '{0}'")]
    Field(String),

    #[error("{function} returns {actual} values, expected {expected}")]
    OutputCount {
        function: String,
        expected: usize,
        actual: usize,
    },
}

pub fn keccak256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    hasher.update(data);
    hasher.finalize().into()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParamType {
    Address,
    Bool,
    Uint(usize),
    Int(usize),
    FixedBytes(usize),
    Bytes,
    String,
    Array(Box<ParamType>),
}

impl ParamType {
    pub fn is_dynamic(&self) -> bool {
        matches!(self, Self::Bytes | Self::String | Self::Array(_))
    }
}

impl fmt::Display for ParamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Address => f.write_str("address"),
            Self::Bool => f.write_str("bool"),
            Self::Uint(bits) => write!(f, "uint{}", bits),
            Self::Int(bits) => write!(f, "int{}", bits),
            Self::FixedBytes(len) => write!(f, "bytes{}", len),
            Self::Bytes => f.write_str("bytes"),
            Self::String => f.write_str("string"),
            Self::Array(inner) => write!(f, "{}[]", inner),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    Address(Address),
    Bool(bool),
    Uint(Uint256),
    Int(Int256),
    FixedBytes(Vec<u8>),
    Bytes(Vec<u8>),
    String(String),
    Array(Vec<Token>),
}

impl Token {
    pub fn is_dynamic(&self) -> bool {
        matches!(self, Self::Bytes(_) | Self::String(_) | Self::Array(_))
    }

    pub fn matches(&self, kind: &ParamType) -> bool {
        match (self, kind) {
            (Self::Address(_), ParamType::Address)
            | (Self::Bool(_), ParamType::Bool)
            | (Self::Uint(_), ParamType::Uint(_))
            | (Self::Int(_), ParamType::Int(_))
            | (Self::Bytes(_), ParamType::Bytes)
            | (Self::String(_), ParamType::String) => true,
            (Self::FixedBytes(bytes), ParamType::FixedBytes(len)) => bytes.len() == *len,
            (Self::Array(items), ParamType::Array(inner)) => {
                items.iter().all(|item| item.matches(inner))
            }
            _ => false,
        }
    }

    pub fn as_address(&self) -> Option<Address> {
        match self {
            Self::Address(address) => Some(*address),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_uint(&self) -> Option<Uint256> {
        match self {
            Self::Uint(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<Int256> {
        match self {
            Self::Int(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_fixed_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::FixedBytes(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Token]> {
        match self {
            Self::Array(items) => Some(items),
            _ => None,
        }
    }

    /// One-word encoding of a static token.
    fn static_word(&self) -> [u8; 32] {
        let mut word = [0u8; 32];
        match self {
            Self::Address(address) => word[12..].copy_from_slice(address.as_bytes()),
            Self::Bool(value) => word[31] = u8::from(*value),
            Self::Uint(value) => word = value.to_be_bytes(),
            Self::Int(value) => word = value.to_be_bytes(),
            Self::FixedBytes(bytes) => {
                let len = bytes.len().min(WORD);
                word[..len].copy_from_slice(&bytes[..len]);
            }
            Self::Bytes(_) | Self::String(_) | Self::Array(_) => {}
        }
        word
    }
}

fn usize_word(value: usize) -> [u8; 32] {
    let mut word = [0u8; 32];
    word[24..].copy_from_slice(&(value as u64).to_be_bytes());
    word
}

fn padded(bytes: &[u8]) -> Vec<u8> {
    let mut out = usize_word(bytes.len()).to_vec();
    out.extend_from_slice(bytes);
    let rem = bytes.len() % WORD;
    if rem != 0 {
        out.resize(out.len() + WORD - rem, 0);
    }
    out
}

/// Head/tail encoding of a parameter list.
pub fn encode(tokens: &[Token]) -> Vec<u8> {
    let head_len = tokens.len() * WORD;
    let mut head = Vec::with_capacity(head_len);
    let mut tail = Vec::new();
    for token in tokens {
        if token.is_dynamic() {
            head.extend_from_slice(&usize_word(head_len + tail.len()));
            tail.extend(encode_dynamic(token));
        } else {
            head.extend_from_slice(&token.static_word());
        }
    }
    head.extend(tail);
    head
}

fn encode_dynamic(token: &Token) -> Vec<u8> {
    match token {
        Token::Bytes(bytes) => padded(bytes),
        Token::String(text) => padded(text.as_bytes()),
        Token::Array(items) => {
            let mut out = usize_word(items.len()).to_vec();
            out.extend(encode(items));
            out
        }
        other => other.static_word().to_vec(),
    }
}

fn read_word(data: &[u8], offset: usize) -> Result<[u8; 32], AbiError> {
    let end = offset.checked_add(WORD).filter(|end| *end <= data.len());
    match end {
        Some(end) => {
            let mut word = [0u8; 32];
            word.copy_from_slice(&data[offset..end]);
            Ok(word)
        }
        None => Err(AbiError::OutOfBounds {
            offset,
            needed: WORD,
            available: data.len(),
        }),
    }
}

fn read_usize(data: &[u8], offset: usize) -> Result<usize, AbiError> {
    let word = read_word(data, offset)?;
    let value = Uint256::from_be_bytes(word)
        .to_u64()
        .and_then(|value| usize::try_from(value).ok());
    value.ok_or(AbiError::OutOfBounds {
        offset,
        needed: usize::MAX,
        available: data.len(),
    })
}

fn slice(data: &[u8], offset: usize, len: usize) -> Result<&[u8], AbiError> {
    offset
        .checked_add(len)
        .filter(|end| *end <= data.len())
        .map(|end| &data[offset..end])
        .ok_or(AbiError::OutOfBounds {
            offset,
            needed: len,
            available: data.len(),
        })
}

fn decode_static(kind: &ParamType, word: [u8; 32]) -> Result<Token, AbiError> {
    match kind {
        ParamType::Address => {
            if word[..12].iter().any(|b| *b != 0) {
                return Err(AbiError::InvalidAddress(hex::encode(word)));
            }
            let mut bytes = [0u8; 20];
            bytes.copy_from_slice(&word[12..]);
            Ok(Token::Address(Address::new(bytes)))
        }
        ParamType::Bool => {
            let (high, last) = word.split_at(31);
            match (high.iter().all(|b| *b == 0), last[0]) {
                (true, 0) => Ok(Token::Bool(false)),
                (true, 1) => Ok(Token::Bool(true)),
                _ => Err(AbiError::InvalidBool(hex::encode(word))),
            }
        }
        ParamType::Uint(bits) => {
            let unused = WORD - bits / 8;
            if word[..unused].iter().any(|b| *b != 0) {
                return Err(AbiError::Overflow(kind.to_string()));
            }
            Ok(Token::Uint(Uint256::from_be_bytes(word)))
        }
        ParamType::Int(bits) => {
            let unused = WORD - bits / 8;
            let fill = if word[unused] & 0x80 != 0 { 0xff } else { 0 };
            if word[..unused].iter().any(|b| *b != fill) {
                return Err(AbiError::Overflow(kind.to_string()));
            }
            Ok(Token::Int(Int256::from_be_bytes(word)))
        }
        ParamType::FixedBytes(len) => {
            if word[*len..].iter().any(|b| *b != 0) {
                return Err(AbiError::DirtyPadding(kind.to_string()));
            }
            Ok(Token::FixedBytes(word[..*len].to_vec()))
        }
        ParamType::Bytes | ParamType::String | ParamType::Array(_) => {
            Err(AbiError::Field(kind.to_string()))
        }
    }
}

fn decode_dynamic(kind: &ParamType, data: &[u8], offset: usize) -> Result<Token, AbiError> {
    let len = read_usize(data, offset)?;
    let body = offset + WORD;
    match kind {
        ParamType::Bytes => Ok(Token::Bytes(slice(data, body, len)?.to_vec())),
        ParamType::String => {
            let bytes = slice(data, body, len)?;
            String::from_utf8(bytes.to_vec())
                .map(Token::String)
                .map_err(|_| AbiError::InvalidUtf8)
        }
        ParamType::Array(inner) => {
            let region = slice(data, body, data.len().saturating_sub(body))?;
            // Every element occupies at least one head word.
            if len.saturating_mul(WORD) > region.len() {
                return Err(AbiError::OutOfBounds {
                    offset: body,
                    needed: len.saturating_mul(WORD),
                    available: region.len(),
                });
            }
            let kinds = vec![(**inner).clone(); len];
            decode(&kinds, region).map(Token::Array)
        }
        static_kind => decode_static(static_kind, read_word(data, offset)?),
    }
}

/// Decode a parameter list laid out with head/tail encoding.
pub fn decode(kinds: &[ParamType], data: &[u8]) -> Result<Vec<Token>, AbiError> {
    kinds
        .iter()
        .enumerate()
        .map(|(index, kind)| {
            let head = index * WORD;
            if kind.is_dynamic() {
                let offset = read_usize(data, head)?;
                decode_dynamic(kind, data, offset)
            } else {
                decode_static(kind, read_word(data, head)?)
            }
        })
        .collect()
}

/// A read-only contract function.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Function {
    pub name: String,
    pub inputs: Vec<ParamType>,
    pub outputs: Vec<ParamType>,
}

impl Function {
    pub fn new(name: &str, inputs: Vec<ParamType>, outputs: Vec<ParamType>) -> Self {
        Self {
            name: name.to_string(),
            inputs,
            outputs,
        }
    }

    pub fn signature(&self) -> String {
        signature(&self.name, self.inputs.iter())
    }

    pub fn selector(&self) -> [u8; 4] {
        let hash = keccak256(self.signature().as_bytes());
        [hash[0], hash[1], hash[2], hash[3]]
    }

    pub fn encode_call(&self, args: &[Token]) -> Result<Vec<u8>, AbiError> {
        if args.len() != self.inputs.len() {
            return Err(AbiError::ArgumentMismatch {
                index: args.len().min(self.inputs.len()),
                expected: self.signature(),
            });
        }
        for (index, (arg, kind)) in args.iter().zip(&self.inputs).enumerate() {
            if !arg.matches(kind) {
                return Err(AbiError::ArgumentMismatch {
                    index,
                    expected: kind.to_string(),
                });
            }
        }
        let mut call = self.selector().to_vec();
        call.extend(encode(args));
        Ok(call)
    }

    /// Decode return data. All-static outputs must fill the data exactly.
    pub fn decode_output(&self, data: &[u8]) -> Result<Vec<Token>, AbiError> {
        if self.outputs.iter().all(|kind| !kind.is_dynamic()) {
            let expected = self.outputs.len() * WORD;
            if data.len() != expected {
                return Err(AbiError::Length {
                    expected,
                    actual: data.len(),
                });
            }
        }
        decode(&self.outputs, data)
    }
}

fn signature<'a>(name: &str, kinds: impl Iterator<Item = &'a ParamType>) -> String {
    let kinds: Vec<String> = kinds.map(ToString::to_string).collect();
    format!("{}({})", name, kinds.join(","))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventParam {
    pub name: String,
    pub kind: ParamType,
    pub indexed: bool,
}

impl EventParam {
    pub fn new(name: &str, kind: ParamType, indexed: bool) -> Self {
        Self {
            name: name.to_string(),
            kind,
            indexed,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub name: String,
    pub params: Vec<EventParam>,
}

/// Event fields by name, in declaration order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedEvent {
    pub name: String,
    pub fields: Vec<(String, Token)>,
}

impl DecodedEvent {
    pub fn get(&self, name: &str) -> Option<&Token> {
        self.fields
            .iter()
            .find(|(field, _)| field == name)
            .map(|(_, token)| token)
    }
}

impl Event {
    pub fn new(name: &str, params: Vec<EventParam>) -> Self {
        Self {
            name: name.to_string(),
            params,
        }
    }

    pub fn signature(&self) -> String {
        signature(&self.name, self.params.iter().map(|param| &param.kind))
    }

    pub fn topic(&self) -> H256 {
        H256::new(keccak256(self.signature().as_bytes()))
    }

    pub fn matches(&self, topics: &[H256]) -> bool {
        topics.first() == Some(&self.topic())
    }

    pub fn decode_log(&self, topics: &[H256], data: &[u8]) -> Result<DecodedEvent, AbiError> {
        if !self.matches(topics) {
            return Err(AbiError::TopicMismatch(self.name.clone()));
        }
        let indexed = self.params.iter().filter(|param| param.indexed).count();
        if topics.len() != indexed + 1 {
            return Err(AbiError::TopicCount {
                event: self.name.clone(),
                expected: indexed + 1,
                actual: topics.len(),
            });
        }

        let kinds: Vec<ParamType> = self
            .params
            .iter()
            .filter(|param| !param.indexed)
            .map(|param| param.kind.clone())
            .collect();
        let mut data_values = decode(&kinds, data)?.into_iter();
        let mut topic_values = topics[1..].iter();

        let mut fields = Vec::with_capacity(self.params.len());
        for param in &self.params {
            let token = if param.indexed {
                let topic = topic_values
                    .next()
                    .ok_or_else(|| AbiError::Field(param.name.clone()))?;
                if param.kind.is_dynamic() {
                    // Only the hash of an indexed dynamic value is logged.
                    Token::FixedBytes(topic.as_bytes().to_vec())
                } else {
                    decode_static(&param.kind, *topic.as_bytes())?
                }
            } else {
                data_values
                    .next()
                    .ok_or_else(|| AbiError::Field(param.name.clone()))?
            };
            fields.push((param.name.clone(), token));
        }

        Ok(DecodedEvent {
            name: self.name.clone(),
            fields,
        })
    }

    /// Build the topics and data a contract emitting this event would log.
    pub fn encode_log(&self, values: &[Token]) -> Result<(Vec<H256>, Vec<u8>), AbiError> {
        if values.len() != self.params.len() {
            return Err(AbiError::ArgumentMismatch {
                index: values.len().min(self.params.len()),
                expected: self.signature(),
            });
        }
        let mut topics = vec![self.topic()];
        let mut data = Vec::new();
        for (index, (param, value)) in self.params.iter().zip(values).enumerate() {
            if !value.matches(&param.kind) {
                return Err(AbiError::ArgumentMismatch {
                    index,
                    expected: param.kind.to_string(),
                });
            }
            if !param.indexed {
                data.push(value.clone());
            } else if value.is_dynamic() {
                topics.push(H256::new(keccak256(&encode_dynamic(value))));
            } else {
                topics.push(H256::new(value.static_word()));
            }
        }
        Ok((topics, encode(&data)))
    }
}
