use crate::{abi, keccak256, rlp, Error, Result};
use holdout_types::{RoundInfo, Wallet};
use k256::ecdsa::SigningKey;
use k256::elliptic_curve::sec1::ToEncodedPoint;
use reqwest::Client as HttpClient;
use serde_json::{json, Value};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};
use url::Url;

/// Timeout for individual RPC requests.
const TIMEOUT: Duration = Duration::from_secs(10);

/// Gas limit for the payout transaction.
const FINALIZE_GAS_LIMIT: u64 = 200_000;

/// Receipt polling cadence and bound for payout confirmation.
const RECEIPT_POLL_INTERVAL: Duration = Duration::from_secs(3);
const RECEIPT_POLL_ATTEMPTS: u32 = 40;

/// Settlement-client configuration.
#[derive(Clone, Debug)]
pub struct Config {
    pub rpc_url: String,
    pub contract_address: String,
    pub chain_id: u64,
    /// How many recent blocks to scan for `Joined` payment events.
    pub payment_lookback_blocks: u64,
    /// Hex-encoded secp256k1 key of the payout authority, if any.
    pub signer_key: Option<String>,
}

struct PayoutSigner {
    key: SigningKey,
    address: [u8; 20],
}

/// JSON-RPC client for the settlement contract.
pub struct Client {
    http: HttpClient,
    rpc_url: Url,
    contract: [u8; 20],
    contract_hex: String,
    chain_id: u64,
    payment_lookback_blocks: u64,
    joined_topic: String,
    signer: Option<PayoutSigner>,
}

impl Client {
    /// Create a new client. The signer is optional: without one the client
    /// can read rounds and payment events but not submit payouts.
    pub fn new(config: Config) -> Result<Self> {
        let rpc_url = Url::parse(&config.rpc_url)?;
        let contract = parse_address(&config.contract_address)?;
        let signer = config.signer_key.as_deref().map(parse_signer).transpose()?;

        let http = HttpClient::builder().timeout(TIMEOUT).build()?;

        Ok(Self {
            http,
            rpc_url,
            contract,
            contract_hex: format!("0x{}", hex::encode(contract)),
            chain_id: config.chain_id,
            payment_lookback_blocks: config.payment_lookback_blocks,
            joined_topic: abi::event_topic("Joined(address,uint256,uint256)"),
            signer,
        })
    }

    /// Whether a payout signing authority is configured.
    pub fn can_finalize(&self) -> bool {
        self.signer.is_some()
    }

    /// Address of the payout authority, if configured.
    pub fn signer_address(&self) -> Option<Wallet> {
        self.signer.as_ref().map(|signer| Wallet::from(signer.address))
    }

    /// Read the contract's current round.
    pub async fn round_info(&self) -> Result<RoundInfo> {
        let data = format!("0x{}", hex::encode(abi::selector("getCurrentRoundInfo()")));
        let result = self
            .rpc(
                "eth_call",
                json!([{ "to": self.contract_hex, "data": data }, "latest"]),
            )
            .await?;
        let words = abi::decode_words(result_str(&result)?)?;
        if words.len() != 5 {
            return Err(Error::Decode(format!(
                "expected 5 words in round info, got {}",
                words.len()
            )));
        }
        Ok(RoundInfo {
            id: abi::word_to_u64(&words[0])?,
            pot_wei: abi::word_to_u128(&words[1])?,
            start: abi::word_to_u64(&words[2])?,
            end: abi::word_to_u64(&words[3])?,
            finalized: abi::word_to_bool(&words[4]),
        })
    }

    /// Whether a `Joined` event exists for (wallet, round) in the lookback
    /// window. Fail-closed: any RPC or decode failure reads as unpaid.
    pub async fn has_paid(&self, wallet: &Wallet, round_id: u64) -> bool {
        match self.find_joined_event(wallet, round_id).await {
            Ok(found) => found,
            Err(err) => {
                warn!(%wallet, round_id, %err, "payment check failed, treating as unpaid");
                false
            }
        }
    }

    async fn find_joined_event(&self, wallet: &Wallet, round_id: u64) -> Result<bool> {
        let latest = parse_quantity(&self.rpc("eth_blockNumber", json!([])).await?)?;
        let from = latest.saturating_sub(u128::from(self.payment_lookback_blocks));
        let filter = json!([{
            "address": self.contract_hex,
            "fromBlock": format!("0x{from:x}"),
            "toBlock": "latest",
            "topics": [
                self.joined_topic,
                abi::topic_address(wallet.as_bytes()),
                abi::topic_u64(round_id),
            ],
        }]);
        let result = self.rpc("eth_getLogs", filter).await?;
        let logs = result
            .as_array()
            .ok_or_else(|| Error::Decode("eth_getLogs result is not an array".into()))?;
        Ok(!logs.is_empty())
    }

    /// Submit `finalizeRound(winner)` and wait for its receipt. Returns the
    /// transaction hash once the chain reports success.
    pub async fn finalize_round(&self, winner: &Wallet) -> Result<String> {
        let signer = self.signer.as_ref().ok_or(Error::NoSigner)?;
        let from = format!("0x{}", hex::encode(signer.address));
        let nonce = parse_quantity(
            &self
                .rpc("eth_getTransactionCount", json!([from, "pending"]))
                .await?,
        )?;
        let gas_price = parse_quantity(&self.rpc("eth_gasPrice", json!([])).await?)?;

        let mut data = abi::selector("finalizeRound(address)").to_vec();
        data.extend_from_slice(&abi::encode_address(winner.as_bytes()));
        let raw = sign_legacy_transaction(
            &signer.key,
            self.chain_id,
            nonce,
            gas_price,
            FINALIZE_GAS_LIMIT,
            &self.contract,
            0,
            &data,
        )?;

        let result = self
            .rpc(
                "eth_sendRawTransaction",
                json!([format!("0x{}", hex::encode(raw))]),
            )
            .await?;
        let tx_hash = result_str(&result)?.to_string();
        debug!(%tx_hash, %winner, "payout transaction submitted");
        self.await_receipt(&tx_hash).await?;
        Ok(tx_hash)
    }

    async fn await_receipt(&self, tx_hash: &str) -> Result<()> {
        for _ in 0..RECEIPT_POLL_ATTEMPTS {
            let receipt = self
                .rpc("eth_getTransactionReceipt", json!([tx_hash]))
                .await?;
            if !receipt.is_null() {
                let status = receipt
                    .get("status")
                    .and_then(Value::as_str)
                    .unwrap_or("0x0");
                if status == "0x1" {
                    return Ok(());
                }
                return Err(Error::Reverted(tx_hash.to_string()));
            }
            sleep(RECEIPT_POLL_INTERVAL).await;
        }
        Err(Error::ConfirmationTimeout(
            tx_hash.to_string(),
            RECEIPT_POLL_INTERVAL * RECEIPT_POLL_ATTEMPTS,
        ))
    }

    async fn rpc(&self, method: &str, params: Value) -> Result<Value> {
        let body = json!({ "jsonrpc": "2.0", "id": 1, "method": method, "params": params });
        debug!(method, "rpc request");
        let response = self.http.post(self.rpc_url.clone()).json(&body).send().await?;
        let payload: Value = response.json().await?;
        if let Some(err) = payload.get("error") {
            return Err(Error::Rpc(err.to_string()));
        }
        payload
            .get("result")
            .cloned()
            .ok_or_else(|| Error::Decode("response has no result".into()))
    }
}

fn result_str(result: &Value) -> Result<&str> {
    result
        .as_str()
        .ok_or_else(|| Error::Decode("result is not a string".into()))
}

fn parse_quantity(result: &Value) -> Result<u128> {
    let raw = result_str(result)?;
    let stripped = raw.strip_prefix("0x").unwrap_or(raw);
    u128::from_str_radix(stripped, 16)
        .map_err(|err| Error::Decode(format!("invalid quantity {raw}: {err}")))
}

fn parse_address(address: &str) -> Result<[u8; 20]> {
    let hex_part = address
        .strip_prefix("0x")
        .ok_or_else(|| Error::InvalidAddress(address.to_string()))?;
    let raw = hex::decode(hex_part).map_err(|_| Error::InvalidAddress(address.to_string()))?;
    raw.try_into()
        .map_err(|_| Error::InvalidAddress(address.to_string()))
}

fn parse_signer(key_hex: &str) -> Result<PayoutSigner> {
    let raw = hex::decode(key_hex.trim_start_matches("0x"))
        .map_err(|err| Error::InvalidSignerKey(err.to_string()))?;
    let key = SigningKey::from_slice(&raw).map_err(|err| Error::InvalidSignerKey(err.to_string()))?;
    let point = key.verifying_key().to_encoded_point(false);
    let digest = keccak256(&point.as_bytes()[1..]);
    let mut address = [0u8; 20];
    address.copy_from_slice(&digest[12..]);
    Ok(PayoutSigner { key, address })
}

#[allow(clippy::too_many_arguments)]
fn sign_legacy_transaction(
    key: &SigningKey,
    chain_id: u64,
    nonce: u128,
    gas_price: u128,
    gas_limit: u64,
    to: &[u8; 20],
    value: u128,
    data: &[u8],
) -> Result<Vec<u8>> {
    let base = [
        rlp::encode_uint(nonce),
        rlp::encode_uint(gas_price),
        rlp::encode_uint(u128::from(gas_limit)),
        rlp::encode_bytes(to),
        rlp::encode_uint(value),
        rlp::encode_bytes(data),
    ];

    let mut unsigned = base.to_vec();
    unsigned.push(rlp::encode_uint(u128::from(chain_id)));
    unsigned.push(rlp::encode_uint(0));
    unsigned.push(rlp::encode_uint(0));
    let sighash = keccak256(&rlp::encode_list(&unsigned));

    let (signature, recovery) = key
        .sign_prehash_recoverable(&sighash)
        .map_err(|err| Error::Signing(err.to_string()))?;
    let (r, s) = signature.split_bytes();
    let v = u128::from(chain_id) * 2 + 35 + u128::from(recovery.to_byte());

    let mut signed = base.to_vec();
    signed.push(rlp::encode_uint(v));
    signed.push(rlp::encode_biguint(r.as_slice()));
    signed.push(rlp::encode_biguint(s.as_slice()));
    Ok(rlp::encode_list(&signed))
}
