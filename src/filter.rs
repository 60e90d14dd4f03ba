//! Event query filter builder
//!
//! Pure construction of a chain query filter from an event card, the wallet
//! identity, and the last block a match was recorded at. No I/O happens here;
//! the builder only decides what (if anything) is worth asking the chain for.

use crate::card::{EventCard, ImplicitAttribute};
use alloy_primitives::{Address, B256};

/// Ethereum allows at most 4 topics: the signature plus 3 indexed params.
const MAX_TOPICS: usize = 4;

/// Upper bound of a log query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToBlock {
    /// Query up to the chain head
    Latest,
    /// Query up to a specific block (inclusive)
    Number(u64),
}

/// A fully constructed `eth_getLogs` filter for one fetch cycle.
///
/// Built fresh per cycle, never persisted. `topics[0]` is the event
/// signature; later positions carry resolved indexed-parameter values or
/// None for wildcards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventQueryFilter {
    pub from_block: u64,
    pub to_block: ToBlock,
    pub address: Address,
    pub topics: Vec<Option<B256>>,
    /// Human-readable description of the filter, persisted on each record
    pub filter_text: String,
}

/// Result of a filter build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterOutcome {
    /// No indexed parameter resolved to a concrete value; the fetch cycle
    /// short-circuits without contacting the chain. Distinct from an
    /// empty-but-valid filter.
    NothingToQuery,
    /// A usable filter.
    Query(EventQueryFilter),
}

/// A resolved indexed-parameter filter with its display form.
struct ResolvedTopic {
    value: B256,
    text_equivalent: String,
}

/// Build the query filter for one (card, wallet) pair.
///
/// `last_matched_block` is the highest block among persisted matches for
/// this group; the filter starts strictly after it. `max_block_range` is
/// the server's sweep-width cap, None for unbounded.
pub fn build_filter(
    card: &EventCard,
    wallet: Address,
    last_matched_block: Option<u64>,
    max_block_range: Option<u64>,
) -> FilterOutcome {
    let resolved: Vec<Option<ResolvedTopic>> = card
        .indexed_parameters()
        .map(|param| resolve_indexed_parameter(param, &card.filter_name, &card.filter_value, wallet))
        .collect();

    // A card with no resolvable indexed filter (or no indexed parameters at
    // all) has nothing to ask the chain for.
    if resolved.iter().all(|r| r.is_none()) {
        return FilterOutcome::NothingToQuery;
    }

    let filter_text = resolved
        .iter()
        .flatten()
        .map(|r| r.text_equivalent.clone())
        .next()
        .unwrap_or_else(|| format!("{}={}", card.filter_name, card.filter_value));

    let mut topics: Vec<Option<B256>> = Vec::with_capacity(MAX_TOPICS);
    topics.push(Some(card.topic0()));
    for entry in resolved {
        if topics.len() == MAX_TOPICS {
            break;
        }
        topics.push(entry.map(|r| r.value));
    }

    let from_block = match last_matched_block {
        Some(block) => block.saturating_add(1),
        None => 0,
    };
    let to_block = match max_block_range {
        Some(range) => ToBlock::Number(from_block.saturating_add(range)),
        None => ToBlock::Latest,
    };

    FilterOutcome::Query(EventQueryFilter {
        from_block,
        to_block,
        address: card.origin_contract,
        topics,
        filter_text,
    })
}

/// Try to resolve one indexed parameter to a concrete filter value.
///
/// Only the parameter named by the card's filter resolves, and only when
/// the declared value is an implicit attribute with a runtime equivalent
/// (today: the owner address). Everything else yields None and the
/// parameter stays a wildcard rather than failing the fetch.
fn resolve_indexed_parameter(
    param: &crate::card::EventParameter,
    filter_name: &str,
    filter_value: &str,
    wallet: Address,
) -> Option<ResolvedTopic> {
    if param.name != filter_name {
        return None;
    }
    match ImplicitAttribute::parse(filter_value)? {
        ImplicitAttribute::OwnerAddress => Some(ResolvedTopic {
            value: address_topic(wallet),
            text_equivalent: format!("{}=0x{:x}", filter_name, wallet),
        }),
        // Other implicit attributes have no event-filter equivalent.
        ImplicitAttribute::TokenId
        | ImplicitAttribute::Label
        | ImplicitAttribute::ContractAddress
        | ImplicitAttribute::Symbol => None,
    }
}

/// Left-pad an address to the 32-byte topic encoding.
pub fn address_topic(addr: Address) -> B256 {
    let mut topic = [0u8; 32];
    topic[12..].copy_from_slice(addr.as_slice());
    B256::from(topic)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::card::testutil::transfer_card;
    use alloy_primitives::address;

    fn wallet() -> Address {
        address!("0742d35cc6634c0532925a3b844bc9e7595f0beb")
    }

    fn expect_query(outcome: FilterOutcome) -> EventQueryFilter {
        match outcome {
            FilterOutcome::Query(filter) => filter,
            FilterOutcome::NothingToQuery => panic!("expected a query filter"),
        }
    }

    #[test]
    fn test_owner_address_filter_resolves() {
        let card = transfer_card();
        let filter = expect_query(build_filter(&card, wallet(), None, None));

        assert_eq!(filter.address, card.origin_contract);
        assert_eq!(filter.from_block, 0);
        assert_eq!(filter.to_block, ToBlock::Latest);
        // topic0 = signature, topic1 = "from" wildcard, topic2 = "to" = wallet
        assert_eq!(filter.topics.len(), 3);
        assert_eq!(filter.topics[0], Some(card.topic0()));
        assert_eq!(filter.topics[1], None);
        assert_eq!(filter.topics[2], Some(address_topic(wallet())));
        assert_eq!(
            filter.filter_text,
            format!("to=0x{:x}", wallet())
        );
    }

    #[test]
    fn test_from_block_is_strictly_after_last_match() {
        let card = transfer_card();

        let filter = expect_query(build_filter(&card, wallet(), Some(105), None));
        assert_eq!(filter.from_block, 106);

        // from_block never goes at or below the recorded block
        for last in [0u64, 1, 99, 1_000_000] {
            let filter = expect_query(build_filter(&card, wallet(), Some(last), None));
            assert!(filter.from_block > last);
            assert_eq!(filter.from_block, last + 1);
        }
    }

    #[test]
    fn test_block_range_cap() {
        let card = transfer_card();
        let filter = expect_query(build_filter(&card, wallet(), Some(99), Some(10_000)));
        assert_eq!(filter.from_block, 100);
        assert_eq!(filter.to_block, ToBlock::Number(10_100));
    }

    #[test]
    fn test_unresolvable_attribute_short_circuits() {
        let mut card = transfer_card();
        card.filter_value = "${tokenId}".to_string();
        assert_eq!(
            build_filter(&card, wallet(), None, None),
            FilterOutcome::NothingToQuery
        );

        card.filter_value = "prefix-${tokenId}".to_string();
        assert_eq!(
            build_filter(&card, wallet(), None, None),
            FilterOutcome::NothingToQuery
        );
    }

    #[test]
    fn test_filter_name_without_indexed_match_short_circuits() {
        let mut card = transfer_card();
        // "value" is not indexed, so no indexed parameter can resolve.
        card.filter_name = "value".to_string();
        assert_eq!(
            build_filter(&card, wallet(), None, None),
            FilterOutcome::NothingToQuery
        );
    }

    #[test]
    fn test_card_without_indexed_parameters_short_circuits() {
        let mut card = transfer_card();
        for param in &mut card.parameters {
            param.indexed = false;
        }
        assert_eq!(
            build_filter(&card, wallet(), None, None),
            FilterOutcome::NothingToQuery
        );
    }

    #[test]
    fn test_address_topic_padding() {
        let topic = address_topic(wallet());
        assert_eq!(&topic.as_slice()[..12], &[0u8; 12]);
        assert_eq!(&topic.as_slice()[12..], wallet().as_slice());
    }
}
