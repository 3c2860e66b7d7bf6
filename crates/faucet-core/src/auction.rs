//! Ad-auction read side.
//!
//! The auction contract itself is an external collaborator; this module only
//! reads it (`eth_call`) and reconstructs bid history from token-transfer
//! events into the contract address. History enrichment is best effort: for
//! each inbound transfer the placing transaction's receipt is fetched and a
//! bid event decoded from its logs. There is no consistency guarantee between
//! the transfer amount and the event's claimed bid amount; the decoded event
//! value takes precedence when present, and the tagged [`BidValue`] keeps the
//! provenance explicit.
#![forbid(unsafe_code)]

use crate::address::EthAddress;
use crate::chain::{ChainClient, ChainClientError, TransferFilter, TransferRecord, TxLog};
use ethers::abi::{self, ParamType, Token};
use ethers::types::{H256, U256};
use ethers::utils::{id, keccak256};
use once_cell::sync::Lazy;
use std::sync::Arc;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tracing::warn;

/// `AdBidPlaced(address indexed bidder, uint256 bidAmount, string imageUrl,
/// string altText, string hrefUrl)`
static AD_BID_PLACED_TOPIC: Lazy<H256> = Lazy::new(|| {
    H256::from(keccak256(
        "AdBidPlaced(address,uint256,string,string,string)",
    ))
});

/// Fallback token metadata when the contract reads fail.
const FALLBACK_TOKEN_SYMBOL: &str = "POL";
const FALLBACK_TOKEN_DECIMALS: u8 = 18;

/// Submitted bids occasionally carry image URLs that never render (sharing
/// links instead of direct assets); known offenders are remapped here.
const IMAGE_URL_REWRITES: &[(&str, &str)] = &[(
    "https://drive.google.com/file/d/1xBsNosSi2nDfnFr_CsIuQrgkJbEA8vsg/view?usp=drive_link",
    "https://prcdn.freetls.fastly.net/release_image/46288/150/46288-150-4068449046755ead34a8b0c5252c2b82-1280x720.jpg?width=1950&height=1350&quality=85%2C75&format=jpeg&auto=webp&fit=bounds&bg-color=fff",
)];

pub fn rewrite_image_url(url: &str) -> &str {
    IMAGE_URL_REWRITES
        .iter()
        .find(|(bad, _)| *bad == url)
        .map(|(_, good)| *good)
        .unwrap_or(url)
}

/// The ad currently displayed, as reported by the contract.
#[derive(Debug, Clone, PartialEq)]
pub struct CurrentAd {
    pub bidder: EthAddress,
    pub bid_amount: U256,
    pub image_url: String,
    pub alt_text: String,
    pub href_url: String,
    pub timestamp: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenInfo {
    pub symbol: String,
    pub decimals: u8,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MinBid {
    pub amount: U256,
    pub formatted: String,
    pub symbol: String,
}

/// A bid amount with explicit provenance: decoded from the bid event when
/// possible, otherwise carried over from the raw transfer.
#[derive(Debug, Clone, PartialEq)]
pub enum BidValue {
    Event { amount: U256 },
    RawTransfer { value: String },
}

impl BidValue {
    pub fn value_string(&self) -> String {
        match self {
            BidValue::Event { amount } => amount.to_string(),
            BidValue::RawTransfer { value } => value.clone(),
        }
    }

    pub fn source(&self) -> &'static str {
        match self {
            BidValue::Event { .. } => "event",
            BidValue::RawTransfer { .. } => "rawTransfer",
        }
    }
}

/// One reconstructed bid, keyed by the transaction that placed it.
#[derive(Debug, Clone, PartialEq)]
pub struct BidRecord {
    pub tx_hash: Option<H256>,
    pub block_number: Option<u64>,
    /// Unix seconds, when the indexer supplied block metadata.
    pub timestamp: Option<i64>,
    pub bidder: Option<String>,
    pub value: BidValue,
    pub token_symbol: String,
    pub image_url: Option<String>,
    pub alt_text: Option<String>,
    pub href_url: Option<String>,
}

/// Calldata for a `placeBid` transaction, for wallet-side signing. The token
/// approval against the auction's payment token stays with the caller.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedBid {
    pub to: EthAddress,
    pub value: U256,
    pub data: Vec<u8>,
}

#[derive(Debug)]
struct DecodedBid {
    bidder: Option<EthAddress>,
    amount: U256,
    image_url: String,
    alt_text: String,
    href_url: String,
}

pub struct AdAuctionReader {
    chain: Arc<dyn ChainClient>,
    contract: EthAddress,
}

impl AdAuctionReader {
    pub fn new(chain: Arc<dyn ChainClient>, contract: EthAddress) -> Self {
        Self { chain, contract }
    }

    pub fn contract(&self) -> &EthAddress {
        &self.contract
    }

    /// `getCurrentAd()` on the auction contract.
    pub async fn current_ad(&self) -> Result<CurrentAd, ChainClientError> {
        let data = self
            .chain
            .call(&self.contract, id("getCurrentAd()").to_vec())
            .await?;
        let tokens = abi::decode(
            &[
                ParamType::Address,
                ParamType::Uint(256),
                ParamType::String,
                ParamType::String,
                ParamType::String,
                ParamType::Uint(256),
            ],
            &data,
        )
        .map_err(|e| ChainClientError::Decode(format!("getCurrentAd return: {e}")))?;

        match &tokens[..] {
            [Token::Address(bidder), Token::Uint(amount), Token::String(image_url), Token::String(alt_text), Token::String(href_url), Token::Uint(timestamp)] => {
                Ok(CurrentAd {
                    bidder: EthAddress::from(*bidder),
                    bid_amount: *amount,
                    image_url: image_url.clone(),
                    alt_text: alt_text.clone(),
                    href_url: href_url.clone(),
                    timestamp: timestamp.low_u64(),
                })
            }
            _ => Err(ChainClientError::Decode(
                "getCurrentAd return: unexpected token layout".to_string(),
            )),
        }
    }

    /// Payment-token metadata, fetched concurrently. Read failures fall back
    /// to native-token display values rather than failing the caller.
    pub async fn token_info(&self) -> TokenInfo {
        let (symbol, decimals) = tokio::join!(self.read_token_symbol(), self.read_token_decimals());
        match (symbol, decimals) {
            (Ok(symbol), Ok(decimals)) => TokenInfo { symbol, decimals },
            (symbol, decimals) => {
                warn!(
                    symbol_err = ?symbol.err(),
                    decimals_err = ?decimals.err(),
                    "token metadata read failed; using fallback"
                );
                TokenInfo {
                    symbol: FALLBACK_TOKEN_SYMBOL.to_string(),
                    decimals: FALLBACK_TOKEN_DECIMALS,
                }
            }
        }
    }

    /// `getMinBidAmount()` plus display formatting.
    pub async fn min_bid(&self) -> Result<MinBid, ChainClientError> {
        let (amount, info) = tokio::join!(self.read_min_bid_amount(), self.token_info());
        let amount = amount?;
        let formatted = ethers::utils::format_units(amount, u32::from(info.decimals))
            .unwrap_or_else(|_| amount.to_string());
        Ok(MinBid {
            amount,
            formatted,
            symbol: info.symbol,
        })
    }

    /// Resolve the auction's payment token. `None` on read failure or when
    /// the contract reports the zero address; bid history then falls back to
    /// unfiltered token transfers.
    pub async fn erc20_token_address(&self) -> Option<EthAddress> {
        let data = match self
            .chain
            .call(&self.contract, id("getERC20TokenAddress()").to_vec())
            .await
        {
            Ok(data) => data,
            Err(e) => {
                warn!(error = %e, "could not resolve auction payment token");
                return None;
            }
        };
        match abi::decode(&[ParamType::Address], &data).ok()?.first() {
            Some(Token::Address(a)) if *a != ethers::types::Address::zero() => {
                Some(EthAddress::from(*a))
            }
            _ => None,
        }
    }

    /// Reconstruct bid history from token transfers into the contract,
    /// newest first.
    pub async fn bid_history(
        &self,
        token_override: Option<EthAddress>,
    ) -> Result<Vec<BidRecord>, ChainClientError> {
        let token = match token_override {
            Some(t) => Some(t),
            None => self.erc20_token_address().await,
        };
        let filter = TransferFilter::erc20_into(self.contract.clone(), token);
        let transfers = self.chain.get_asset_transfers(&filter).await?;

        let mut history = Vec::with_capacity(transfers.len());
        for transfer in transfers {
            history.push(self.enrich(transfer).await);
        }
        history.sort_by(|a, b| {
            b.block_number
                .unwrap_or(0)
                .cmp(&a.block_number.unwrap_or(0))
        });
        Ok(history)
    }

    async fn enrich(&self, transfer: TransferRecord) -> BidRecord {
        let mut value = raw_bid_value(&transfer);
        let mut bidder = transfer.from.clone();
        let mut image_url = None;
        let mut alt_text = None;
        let mut href_url = None;

        if let Some(hash) = transfer.tx_hash {
            match self.chain.get_transaction_receipt(hash).await {
                Ok(Some(logs)) => {
                    if let Some(bid) = decode_bid_placed(&logs) {
                        value = BidValue::Event { amount: bid.amount };
                        image_url = Some(rewrite_image_url(&bid.image_url).to_string());
                        alt_text = Some(bid.alt_text);
                        href_url = Some(bid.href_url);
                        if let Some(b) = bid.bidder {
                            bidder = Some(b.to_string());
                        }
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(tx_hash = ?hash, error = %e, "receipt lookup failed; bid left unenriched");
                }
            }
        }

        BidRecord {
            tx_hash: transfer.tx_hash,
            block_number: transfer.block_number,
            timestamp: transfer.timestamp.as_deref().and_then(unix_timestamp),
            bidder,
            value,
            token_symbol: transfer.asset.unwrap_or_else(|| "Unknown".to_string()),
            image_url,
            alt_text,
            href_url,
        }
    }

    /// Calldata for `placeBid(string,string,string,uint256)`.
    pub fn prepare_bid(
        &self,
        image_url: &str,
        alt_text: &str,
        href_url: &str,
        amount: U256,
    ) -> PreparedBid {
        let mut data = id("placeBid(string,string,string,uint256)").to_vec();
        data.extend(abi::encode(&[
            Token::String(image_url.to_string()),
            Token::String(alt_text.to_string()),
            Token::String(href_url.to_string()),
            Token::Uint(amount),
        ]));
        PreparedBid {
            to: self.contract.clone(),
            value: amount,
            data,
        }
    }

    async fn read_token_symbol(&self) -> Result<String, ChainClientError> {
        let data = self
            .chain
            .call(&self.contract, id("getTokenSymbol()").to_vec())
            .await?;
        match abi::decode(&[ParamType::String], &data)
            .map_err(|e| ChainClientError::Decode(format!("getTokenSymbol return: {e}")))?
            .into_iter()
            .next()
        {
            Some(Token::String(s)) => Ok(s),
            _ => Err(ChainClientError::Decode(
                "getTokenSymbol return: unexpected token layout".to_string(),
            )),
        }
    }

    async fn read_token_decimals(&self) -> Result<u8, ChainClientError> {
        let data = self
            .chain
            .call(&self.contract, id("getTokenDecimals()").to_vec())
            .await?;
        match abi::decode(&[ParamType::Uint(8)], &data)
            .map_err(|e| ChainClientError::Decode(format!("getTokenDecimals return: {e}")))?
            .into_iter()
            .next()
        {
            Some(Token::Uint(u)) => u8::try_from(u.low_u64()).map_err(|_| {
                ChainClientError::Decode("getTokenDecimals return: out of range".to_string())
            }),
            _ => Err(ChainClientError::Decode(
                "getTokenDecimals return: unexpected token layout".to_string(),
            )),
        }
    }

    async fn read_min_bid_amount(&self) -> Result<U256, ChainClientError> {
        let data = self
            .chain
            .call(&self.contract, id("getMinBidAmount()").to_vec())
            .await?;
        match abi::decode(&[ParamType::Uint(256)], &data)
            .map_err(|e| ChainClientError::Decode(format!("getMinBidAmount return: {e}")))?
            .into_iter()
            .next()
        {
            Some(Token::Uint(u)) => Ok(u),
            _ => Err(ChainClientError::Decode(
                "getMinBidAmount return: unexpected token layout".to_string(),
            )),
        }
    }
}

/// Amount carried by the transfer itself: the raw base-units value when the
/// indexer reports it, otherwise the decimal value string, otherwise zero.
fn raw_bid_value(transfer: &TransferRecord) -> BidValue {
    if let Some(raw) = transfer.raw_value {
        BidValue::RawTransfer {
            value: raw.to_string(),
        }
    } else if let Some(v) = &transfer.value {
        BidValue::RawTransfer { value: v.clone() }
    } else {
        BidValue::RawTransfer {
            value: "0".to_string(),
        }
    }
}

fn decode_bid_placed(logs: &[TxLog]) -> Option<DecodedBid> {
    let log = logs
        .iter()
        .find(|l| l.topics.first() == Some(&*AD_BID_PLACED_TOPIC))?;
    // Indexed bidder sits in the second topic, address right-padded to 32 bytes.
    let bidder = log
        .topics
        .get(1)
        .map(|t| ethers::types::Address::from_slice(&t.as_bytes()[12..]));
    let tokens = abi::decode(
        &[
            ParamType::Uint(256),
            ParamType::String,
            ParamType::String,
            ParamType::String,
        ],
        &log.data,
    )
    .ok()?;
    if let [Token::Uint(amount), Token::String(image_url), Token::String(alt_text), Token::String(href_url)] =
        &tokens[..]
    {
        Some(DecodedBid {
            bidder: bidder.map(EthAddress::from),
            amount: *amount,
            image_url: image_url.clone(),
            alt_text: alt_text.clone(),
            href_url: href_url.clone(),
        })
    } else {
        None
    }
}

/// RFC 3339 block timestamp -> unix seconds.
pub fn unix_timestamp(rfc3339: &str) -> Option<i64> {
    OffsetDateTime::parse(rfc3339, &Rfc3339)
        .ok()
        .map(|t| t.unix_timestamp())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::mock_client::MockChainClient;
    use crate::chain::TransferCategory;

    fn addr(s: &str) -> EthAddress {
        EthAddress::parse(s).unwrap()
    }

    fn contract() -> EthAddress {
        addr("0x3333333333333333333333333333333333333333")
    }

    fn setup() -> (Arc<MockChainClient>, AdAuctionReader) {
        let mock = Arc::new(MockChainClient::new());
        let reader = AdAuctionReader::new(mock.clone(), contract());
        (mock, reader)
    }

    fn bid_placed_log(bidder: EthAddress, amount: u64, image: &str) -> TxLog {
        let mut bidder_topic = [0u8; 32];
        bidder_topic[12..].copy_from_slice(bidder.h160().as_bytes());
        TxLog {
            address: contract().h160(),
            topics: vec![*AD_BID_PLACED_TOPIC, H256::from(bidder_topic)],
            data: abi::encode(&[
                Token::Uint(U256::from(amount)),
                Token::String(image.to_string()),
                Token::String("alt".to_string()),
                Token::String("https://example.com".to_string()),
            ]),
        }
    }

    #[test]
    fn unix_timestamp_parses_rfc3339() {
        assert_eq!(unix_timestamp("1970-01-01T00:00:00.000Z"), Some(0));
        assert_eq!(unix_timestamp("2025-11-04T10:29:44.000Z"), Some(1762252184));
        assert_eq!(unix_timestamp("yesterday"), None);
    }

    #[test]
    fn rewrite_replaces_only_known_offenders() {
        let bad = "https://drive.google.com/file/d/1xBsNosSi2nDfnFr_CsIuQrgkJbEA8vsg/view?usp=drive_link";
        assert!(rewrite_image_url(bad).starts_with("https://prcdn.freetls.fastly.net/"));
        assert_eq!(rewrite_image_url("https://ok.example/a.png"), "https://ok.example/a.png");
    }

    #[test]
    fn prepare_bid_encodes_selector_and_args() {
        let (_, reader) = setup();
        let prepared = reader.prepare_bid("img", "alt", "href", U256::from(7u64));
        assert_eq!(prepared.to, contract());
        assert_eq!(prepared.value, U256::from(7u64));
        assert_eq!(
            prepared.data[..4],
            id("placeBid(string,string,string,uint256)")
        );
        let tokens = abi::decode(
            &[
                ParamType::String,
                ParamType::String,
                ParamType::String,
                ParamType::Uint(256),
            ],
            &prepared.data[4..],
        )
        .unwrap();
        assert_eq!(tokens[0], Token::String("img".to_string()));
        assert_eq!(tokens[3], Token::Uint(U256::from(7u64)));
    }

    #[test]
    fn decodes_bid_event_from_logs() {
        let bidder = addr("0x4444444444444444444444444444444444444444");
        let logs = vec![bid_placed_log(bidder.clone(), 5_000, "https://img.example/x.png")];
        let bid = decode_bid_placed(&logs).unwrap();
        assert_eq!(bid.amount, U256::from(5_000u64));
        assert_eq!(bid.bidder, Some(bidder));
        assert_eq!(bid.image_url, "https://img.example/x.png");
    }

    #[tokio::test]
    async fn current_ad_decodes_contract_return() {
        let (mock, reader) = setup();
        let bidder = addr("0x4444444444444444444444444444444444444444");
        mock.set_call_result(
            id("getCurrentAd()"),
            abi::encode(&[
                Token::Address(bidder.h160()),
                Token::Uint(U256::from(9_000u64)),
                Token::String("https://img.example/ad.png".to_string()),
                Token::String("an ad".to_string()),
                Token::String("https://sponsor.example".to_string()),
                Token::Uint(U256::from(1_700_000_000u64)),
            ]),
        );

        let ad = reader.current_ad().await.unwrap();
        assert_eq!(ad.bidder, bidder);
        assert_eq!(ad.bid_amount, U256::from(9_000u64));
        assert_eq!(ad.alt_text, "an ad");
        assert_eq!(ad.timestamp, 1_700_000_000);
    }

    #[tokio::test]
    async fn token_info_falls_back_when_reads_fail() {
        let (_, reader) = setup(); // no call results configured: reads revert
        let info = reader.token_info().await;
        assert_eq!(info.symbol, "POL");
        assert_eq!(info.decimals, 18);
    }

    #[tokio::test]
    async fn min_bid_formats_with_token_decimals() {
        let (mock, reader) = setup();
        mock.set_call_result(
            id("getMinBidAmount()"),
            abi::encode(&[Token::Uint(U256::exp10(18) * U256::from(5u64))]),
        );
        mock.set_call_result(
            id("getTokenSymbol()"),
            abi::encode(&[Token::String("JPYC".to_string())]),
        );
        mock.set_call_result(
            id("getTokenDecimals()"),
            abi::encode(&[Token::Uint(U256::from(18u64))]),
        );

        let min = reader.min_bid().await.unwrap();
        assert_eq!(min.amount, U256::exp10(18) * U256::from(5u64));
        assert_eq!(min.symbol, "JPYC");
        assert_eq!(min.formatted, "5.000000000000000000");
    }

    #[tokio::test]
    async fn bid_history_prefers_event_value_over_raw_transfer() {
        let (mock, reader) = setup();
        let bidder = addr("0x4444444444444444444444444444444444444444");
        let with_event = H256::from_low_u64_be(1);
        let without_event = H256::from_low_u64_be(2);

        mock.add_transfer(
            TransferCategory::Erc20,
            None,
            contract(),
            TransferRecord {
                from: Some("0x5555555555555555555555555555555555555555".to_string()),
                raw_value: Some(U256::from(1_000u64)),
                tx_hash: Some(with_event),
                block_number: Some(10),
                asset: Some("JPYC".to_string()),
                ..Default::default()
            },
        );
        mock.add_transfer(
            TransferCategory::Erc20,
            None,
            contract(),
            TransferRecord {
                from: Some("0x6666666666666666666666666666666666666666".to_string()),
                raw_value: Some(U256::from(1_500u64)),
                tx_hash: Some(without_event),
                block_number: Some(20),
                asset: Some("JPYC".to_string()),
                ..Default::default()
            },
        );
        mock.set_receipt_logs(
            with_event,
            vec![bid_placed_log(bidder.clone(), 2_000, "https://img.example/x.png")],
        );

        let history = reader.bid_history(None).await.unwrap();
        assert_eq!(history.len(), 2);

        // Sorted newest-first by block number.
        assert_eq!(history[0].block_number, Some(20));
        assert_eq!(history[0].value, BidValue::RawTransfer { value: "1500".to_string() });
        assert_eq!(history[0].value.source(), "rawTransfer");
        assert!(history[0].image_url.is_none());

        assert_eq!(history[1].block_number, Some(10));
        assert_eq!(history[1].value, BidValue::Event { amount: U256::from(2_000u64) });
        assert_eq!(history[1].value.source(), "event");
        assert_eq!(history[1].bidder.as_deref(), Some(bidder.as_str()));
        assert_eq!(history[1].image_url.as_deref(), Some("https://img.example/x.png"));
    }

    #[tokio::test]
    async fn bid_history_without_raw_value_carries_decimal_string() {
        let (mock, reader) = setup();
        mock.add_transfer(
            TransferCategory::Erc20,
            None,
            contract(),
            TransferRecord {
                value: Some("42.5".to_string()),
                block_number: Some(5),
                ..Default::default()
            },
        );

        let history = reader.bid_history(None).await.unwrap();
        assert_eq!(
            history[0].value,
            BidValue::RawTransfer { value: "42.5".to_string() }
        );
        assert_eq!(history[0].token_symbol, "Unknown");
    }
}
