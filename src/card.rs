//! Event card definitions and tracked tokens
//!
//! An event card is a declarative description of one on-chain event a token
//! wants surfaced as user-visible activity. Cards are loaded from metadata
//! definitions and are immutable once loaded; one token may have zero or more.

use crate::records::ServerId;
use alloy_primitives::{keccak256, Address, B256};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// One parameter of an event's ABI signature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventParameter {
    /// Parameter name as declared in the card ("from", "to", "value", ...)
    pub name: String,
    /// Solidity type string ("address", "uint256", ...)
    #[serde(rename = "type")]
    pub solidity_type: String,
    /// Whether the parameter is indexed (i.e. carried in a log topic)
    #[serde(default)]
    pub indexed: bool,
}

/// Declarative description of one on-chain event of interest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventCard {
    /// Contract that emits the event; may differ from the token contract
    pub origin_contract: Address,
    /// Event name ("Transfer", "Approval", ...)
    pub event_name: String,
    /// Canonical ABI signature, e.g. "Transfer(address,address,uint256)"
    pub abi_signature: String,
    /// Event parameters in signature order
    pub parameters: Vec<EventParameter>,
    /// Name of the parameter the card filters on
    pub filter_name: String,
    /// Filter value expression, usually an implicit attribute like "${ownerAddress}"
    pub filter_value: String,
}

impl EventCard {
    /// The event signature topic (topic0) for this card.
    pub fn topic0(&self) -> B256 {
        keccak256(self.abi_signature.as_bytes())
    }

    /// The card's indexed parameters, in signature order.
    pub fn indexed_parameters(&self) -> impl Iterator<Item = &EventParameter> {
        self.parameters.iter().filter(|p| p.indexed)
    }
}

/// Which server(s) a token definition applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefinitionServer {
    /// A single specific server
    Specific(ServerId),
    /// Every currently enabled server
    AnyEnabled,
}

impl Serialize for DefinitionServer {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            DefinitionServer::Specific(id) => serializer.serialize_u64(id.0),
            DefinitionServer::AnyEnabled => serializer.serialize_str("any"),
        }
    }
}

impl<'de> Deserialize<'de> for DefinitionServer {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Id(u64),
            Tag(String),
        }
        match Raw::deserialize(deserializer)? {
            Raw::Id(id) => Ok(DefinitionServer::Specific(ServerId(id))),
            Raw::Tag(tag) if tag == "any" => Ok(DefinitionServer::AnyEnabled),
            Raw::Tag(tag) => Err(D::Error::custom(format!(
                "Expected a chain id or \"any\", got \"{}\"",
                tag
            ))),
        }
    }
}

/// Per-contract metadata definition: the event cards plus the server scope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenDefinition {
    /// Server scope the definition applies to
    pub server: DefinitionServer,
    /// Event cards declared by the definition
    pub cards: Vec<EventCard>,
}

/// A named placeholder resolved at filter-build time to a runtime value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImplicitAttribute {
    TokenId,
    OwnerAddress,
    Label,
    ContractAddress,
    Symbol,
}

impl ImplicitAttribute {
    /// Parse an implicit attribute expression like "${ownerAddress}".
    ///
    /// Returns None for anything else, including compound expressions such
    /// as "prefix-${tokenId}" which the filter builder deliberately skips.
    pub fn parse(s: &str) -> Option<Self> {
        let inner = s.strip_prefix("${")?.strip_suffix('}')?;
        match inner {
            "tokenId" => Some(ImplicitAttribute::TokenId),
            "ownerAddress" => Some(ImplicitAttribute::OwnerAddress),
            "label" => Some(ImplicitAttribute::Label),
            "contractAddress" => Some(ImplicitAttribute::ContractAddress),
            "symbol" => Some(ImplicitAttribute::Symbol),
            _ => None,
        }
    }
}
