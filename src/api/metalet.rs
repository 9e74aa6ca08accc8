//! Metalet wallet API client
//!
//! MVC UTXOs are paginated by an opaque `flag` cursor; DOGE lists come back
//! in one page. Both are filtered for dust before they reach the selector.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{EngineError, EngineResult};
use crate::fees::{FeeRateTier, DEFAULT_MVC_FEE_RATE};
use crate::types::{Chain, Network};
use crate::utils::{ApiEnvelope, HttpClient};
use crate::wallet::Utxo;
use crate::log_debug;

use super::ChainApi;

pub const DEFAULT_METALET_HOST: &str = "https://www.metalet.space";

/// MVC outputs below this are not worth an input
pub const MVC_MIN_UTXO_VALUE: u64 = 600;
/// 0.01 DOGE
pub const DOGE_MIN_UTXO_VALUE: u64 = 1_000_000;

const MAX_UTXO_PAGES: usize = 200;

#[derive(Debug, Deserialize)]
struct UtxoItem {
    txid: String,
    #[serde(rename = "outIndex")]
    out_index: u32,
    value: u64,
    #[serde(default)]
    height: i64,
    #[serde(default)]
    address: Option<String>,
    #[serde(default)]
    flag: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UtxoPage {
    #[serde(default)]
    list: Vec<UtxoItem>,
}

#[derive(Debug, Deserialize)]
struct FeeSummary {
    #[serde(default)]
    list: Vec<FeeRateTier>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct BroadcastBody<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    chain: Option<&'a str>,
    net: &'a str,
    raw_tx: &'a str,
}

#[derive(Debug, Deserialize)]
struct DogeBroadcastReply {
    #[serde(rename = "TxId")]
    tx_id: String,
}

impl UtxoItem {
    fn into_utxo(self, fallback_address: &str) -> Utxo {
        let address = self.address.unwrap_or_else(|| fallback_address.to_string());
        if self.height > 0 {
            Utxo {
                height: self.height,
                ..Utxo::new(self.txid, self.out_index, self.value, address)
            }
        } else {
            Utxo::unconfirmed(self.txid, self.out_index, self.value, address)
        }
    }
}

/// Blocking client for the Metalet wallet API
#[derive(Clone)]
pub struct MetaletApi {
    http: HttpClient,
    host: String,
    network: Network,
}

impl MetaletApi {
    pub fn new(host: impl Into<String>, network: Network, timeout: Duration) -> EngineResult<Self> {
        Ok(Self {
            http: HttpClient::new(timeout)?,
            host: host.into().trim_end_matches('/').to_string(),
            network,
        })
    }

    fn v3(&self, path: &str) -> String {
        format!("{}/wallet-api/v3{}", self.host, path)
    }

    fn v4(&self, path: &str) -> String {
        format!("{}/wallet-api/v4{}", self.host, path)
    }

    fn fetch_mvc_utxos(&self, address: &str) -> EngineResult<Vec<Utxo>> {
        let url = self.v4("/mvc/address/utxo-list");
        let mut utxos = Vec::new();
        let mut flag: Option<String> = None;

        for _ in 0..MAX_UTXO_PAGES {
            let mut query = vec![
                ("address", address.to_string()),
                ("net", self.network.api_name().to_string()),
            ];
            if let Some(ref f) = flag {
                query.push(("flag", f.clone()));
            }

            let page: ApiEnvelope<UtxoPage> = self.http.get_json(&url, &query)?;
            let list = page.into_data("MVC UTXO list")?.list;
            if list.is_empty() {
                break;
            }

            let next = list.last().and_then(|item| item.flag.clone());
            utxos.extend(
                list.into_iter()
                    .filter(|item| item.value >= MVC_MIN_UTXO_VALUE)
                    .map(|item| item.into_utxo(address)),
            );

            if next.is_none() || next == flag {
                break;
            }
            flag = next;
        }

        log_debug!("metalet", "Fetched MVC UTXOs", address = address, count = utxos.len());
        Ok(utxos)
    }

    fn fetch_doge_utxos(&self, address: &str) -> EngineResult<Vec<Utxo>> {
        let query = [
            ("net", self.network.api_name().to_string()),
            ("address", address.to_string()),
        ];
        let page: ApiEnvelope<UtxoPage> = self.http.get_json(&self.v4("/doge/address/utxo-list"), &query)?;
        let utxos: Vec<Utxo> = page
            .into_data("DOGE UTXO list")?
            .list
            .into_iter()
            .filter(|item| item.value >= DOGE_MIN_UTXO_VALUE)
            .map(|item| item.into_utxo(address))
            .collect();

        log_debug!("metalet", "Fetched DOGE UTXOs", address = address, count = utxos.len());
        Ok(utxos)
    }
}

impl ChainApi for MetaletApi {
    fn fetch_utxos(&self, chain: Chain, address: &str) -> EngineResult<Vec<Utxo>> {
        match chain {
            Chain::Mvc => self.fetch_mvc_utxos(address),
            Chain::Doge => self.fetch_doge_utxos(address),
        }
    }

    fn fetch_fee_rates(&self, chain: Chain) -> EngineResult<Vec<FeeRateTier>> {
        match chain {
            // MVC has a flat network rate
            Chain::Mvc => Ok(vec![FeeRateTier {
                title: "Avg".to_string(),
                desc: String::new(),
                fee_rate: DEFAULT_MVC_FEE_RATE,
            }]),
            Chain::Doge => {
                let query = [("net", self.network.api_name().to_string())];
                let summary: ApiEnvelope<FeeSummary> = self.http.get_json(&self.v4("/doge/fee/summary"), &query)?;
                Ok(summary.into_data("DOGE fee summary")?.list)
            }
        }
    }

    fn broadcast(&self, chain: Chain, raw_hex: &str) -> EngineResult<String> {
        let net = self.network.api_name();
        let txid = match chain {
            Chain::Mvc => {
                let body = BroadcastBody {
                    chain: Some(chain.api_name()),
                    net,
                    raw_tx: raw_hex,
                };
                let reply: ApiEnvelope<String> = self.http.post_json(&self.v3("/tx/broadcast"), &body)?;
                reply.into_data("MVC broadcast").map_err(rejected)?
            }
            Chain::Doge => {
                let body = BroadcastBody {
                    chain: None,
                    net,
                    raw_tx: raw_hex,
                };
                let reply: ApiEnvelope<DogeBroadcastReply> =
                    self.http.post_json(&self.v4("/doge/tx/broadcast"), &body)?;
                reply.into_data("DOGE broadcast").map_err(rejected)?.tx_id
            }
        };
        Ok(txid)
    }
}

/// A well-formed error envelope on broadcast means the node refused the tx
fn rejected(e: EngineError) -> EngineError {
    EngineError::broadcast_rejected(e.message)
}
