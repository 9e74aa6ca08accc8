//! MetaID Agent
//!
//! One identity (a mnemonic) plus the services it talks to. Every call
//! validates its request, then builds a fresh key ring and operation
//! context; the consolidation registry is the only state shared between
//! calls.

use std::sync::Arc;

use crate::api::{resolve_fee_rate, ChainApi, MetaletApi};
use crate::chunked::{
    self, ChunkedEstimate, CoSignedUpload, DirectUploadReceipt, MetafileApi, MetafileClient, TaskReceipt,
    UploadDescriptor, UploadSaga,
};
use crate::config::EngineConfig;
use crate::consolidation::{self, ConsolidationRegistry, ConsolidationRequest, ConsolidationResult, ConsolidationState};
use crate::context::OperationContext;
use crate::error::EngineResult;
use crate::inscription::{inscribe_batch, InscriptionRequest, InscriptionResult};
use crate::pin::{self, normalize_details, CreatePinRequest, CreatePinResult, MetaidRecord};
use crate::transfer::{run_transfers, TokenTransferBackend, TransferRequest, TransferResult};
use crate::types::{Chain, Receiver};
use crate::wallet::{KeyMaterial, KeyRing};
use crate::log_debug;

pub struct MetaidAgent {
    material: KeyMaterial,
    config: EngineConfig,
    api: Arc<dyn ChainApi>,
    registry: ConsolidationRegistry,
    token_backend: Option<Arc<dyn TokenTransferBackend>>,
}

impl MetaidAgent {
    pub fn new(material: KeyMaterial, config: EngineConfig, api: Arc<dyn ChainApi>) -> Self {
        let registry = ConsolidationRegistry::new(config.consolidation_timeout());
        Self {
            material,
            config,
            api,
            registry,
            token_backend: None,
        }
    }

    /// Agent backed by the Metalet API named in `config`
    pub fn from_config(material: KeyMaterial, config: EngineConfig) -> EngineResult<Self> {
        config.validate()?;
        let api = MetaletApi::new(config.api_host.clone(), config.network, config.http_timeout())?;
        Ok(Self::new(material, config, Arc::new(api)))
    }

    pub fn with_token_backend(mut self, backend: Arc<dyn TokenTransferBackend>) -> Self {
        self.token_backend = Some(backend);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn registry(&self) -> &ConsolidationRegistry {
        &self.registry
    }

    pub fn key_ring(&self) -> EngineResult<KeyRing> {
        KeyRing::with_depth(&self.material, self.config.network, self.config.derivation_depth)?
            .with_primary_index(self.config.address_index)
    }

    pub fn address(&self, chain: Chain) -> EngineResult<String> {
        Ok(self.key_ring()?.address(chain))
    }

    fn run<T>(&self, no_broadcast: bool, op: impl FnOnce(&OperationContext<'_>) -> T) -> EngineResult<T> {
        let ring = self.key_ring()?;
        let ctx = OperationContext::new(self.api.as_ref(), &ring, &self.registry)
            .with_broadcast(self.config.broadcast())
            .dry_run(no_broadcast);
        Ok(op(&ctx))
    }

    /// Pin records on MVC (data carrier) or DOGE (commit/reveal)
    pub fn create_pins(&self, request: &CreatePinRequest) -> EngineResult<CreatePinResult> {
        // Reject bad paths and bodies before touching any key
        normalize_details(&request.data_list)?;
        let mut request = request.clone();
        if request.fee_rate.is_none() && request.chain == Chain::Mvc {
            request.fee_rate = Some(self.config.mvc_fee_rate);
        }
        log_debug!("agent", "Creating pins", chain = request.chain, count = request.data_list.len());
        self.run(request.no_broadcast, |ctx| pin::create_pins(ctx, &request))?
    }

    /// Inscribe records on DOGE, optionally paying a service output once
    pub fn inscribe(
        &self,
        records: Vec<MetaidRecord>,
        fee_rate: Option<u64>,
        service: Option<Receiver>,
        no_broadcast: bool,
    ) -> EngineResult<InscriptionResult> {
        let records = records
            .iter()
            .map(MetaidRecord::normalized)
            .collect::<EngineResult<Vec<_>>>()?;
        let fee_rate = fee_rate.unwrap_or_else(|| {
            resolve_fee_rate(self.api.as_ref(), Chain::Doge, None, self.config.doge_inscription_fee_rate)
        });
        let request = InscriptionRequest {
            records,
            fee_rate,
            reveal_value: None,
            service,
        };
        self.run(no_broadcast, |ctx| inscribe_batch(ctx, &request))?
    }

    pub fn transfer(&self, request: &TransferRequest, no_broadcast: bool) -> EngineResult<TransferResult> {
        let mut request = request.clone();
        if request.fee_rate.is_none() {
            request.fee_rate = Some(match request.chain {
                Chain::Mvc => self.config.mvc_fee_rate,
                Chain::Doge => resolve_fee_rate(
                    self.api.as_ref(),
                    Chain::Doge,
                    Some("Avg"),
                    self.config.doge_transfer_fee_rate,
                ),
            });
        }
        let backend = self.token_backend.as_deref();
        self.run(no_broadcast, |ctx| run_transfers(ctx, &request, backend))?
    }

    /// Sweep the wallet's MVC outputs into `main_address` (the wallet itself when absent)
    pub fn consolidate(&self, main_address: Option<String>, no_broadcast: bool) -> EngineResult<ConsolidationResult> {
        let request = ConsolidationRequest {
            main_address,
            fee_rate: Some(self.config.mvc_fee_rate),
            balance_tolerance: self.config.consolidation_tolerance,
            key_policy: self.config.consolidation_key_policy,
        };
        self.run(no_broadcast, |ctx| consolidation::consolidate(ctx, &request))
    }

    pub fn consolidation_state(&self) -> EngineResult<ConsolidationState> {
        Ok(self.registry.state(&self.address(Chain::Mvc)?))
    }

    pub fn confirm_consolidation(&self, txid: &str) -> EngineResult<()> {
        self.registry.mark_confirmed(&self.address(Chain::Mvc)?, txid)
    }

    pub fn metafile_client(&self) -> EngineResult<MetafileClient> {
        MetafileClient::new(self.config.uploader_url.clone(), self.config.http_timeout())
    }

    /// Fresh saga for `content`, owned by the wallet's MVC address
    pub fn start_upload(
        &self,
        file_name: &str,
        content: &[u8],
        path: &str,
        content_type: &str,
        fee_rate: Option<u64>,
    ) -> EngineResult<UploadSaga> {
        let descriptor = UploadDescriptor::new(
            file_name,
            content,
            path,
            content_type,
            self.address(Chain::Mvc)?,
            fee_rate.unwrap_or(self.config.mvc_fee_rate),
        )?;
        Ok(UploadSaga::new(descriptor))
    }

    /// Drive `saga` to submission; resumes wherever it left off
    pub fn upload(
        &self,
        api: &dyn MetafileApi,
        saga: &mut UploadSaga,
        content: &[u8],
        persist: &mut dyn FnMut(&UploadSaga) -> EngineResult<()>,
    ) -> EngineResult<TaskReceipt> {
        self.run(false, |ctx| chunked::upload_chunked(ctx, api, saga, content, persist))?
    }

    /// Upload a file of at most `DIRECT_UPLOAD_MAX_SIZE` bytes in one request
    pub fn upload_direct(
        &self,
        api: &dyn MetafileApi,
        file_name: &str,
        content: &[u8],
        path: &str,
        content_type: &str,
        fee_rate: Option<u64>,
    ) -> EngineResult<DirectUploadReceipt> {
        let fee_rate = fee_rate.unwrap_or(self.config.mvc_fee_rate);
        self.run(false, |ctx| {
            chunked::upload_direct(ctx, api, file_name, content, path, content_type, fee_rate)
        })?
    }

    /// Co-signed merge and pre-transactions for a quote obtained elsewhere
    pub fn cosign_upload(
        &self,
        estimate: &ChunkedEstimate,
        fee_rate: Option<u64>,
        pre_tx_sighash: u32,
    ) -> EngineResult<CoSignedUpload> {
        let fee_rate = fee_rate.unwrap_or(self.config.mvc_fee_rate);
        self.run(true, |ctx| chunked::cosign_upload(ctx, estimate, fee_rate, pre_tx_sighash))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::InMemoryChainApi;
    use crate::error::ErrorCode;
    use crate::pin::{Operation, PinDetail};
    use crate::tx::{verify_p2pkh_input, PrevOut, TxDraft};
    use crate::types::Network;
    use crate::wallet::Utxo;

    const ABANDON: &str = "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";

    fn agent() -> (MetaidAgent, Arc<InMemoryChainApi>) {
        let api = Arc::new(InMemoryChainApi::new(Network::Mainnet));
        let config = EngineConfig {
            derivation_depth: 5,
            broadcast_retries: 0,
            broadcast_retry_delay_ms: 0,
            ..EngineConfig::default()
        };
        let agent = MetaidAgent::new(KeyMaterial::from_mnemonic(ABANDON).unwrap(), config, api.clone());
        (agent, api)
    }

    #[test]
    fn test_dry_run_pin_does_not_broadcast() {
        let (agent, api) = agent();
        let address = agent.address(Chain::Mvc).unwrap();
        api.fund(Chain::Mvc, Utxo::new("11".repeat(32), 0, 100_000, address));

        let request = CreatePinRequest {
            chain: Chain::Mvc,
            data_list: vec![PinDetail::new(
                MetaidRecord::new(Operation::Create, "/protocols/simplebuzz").with_body("{\"content\":\"hi\"}"),
            )],
            fee_rate: None,
            no_broadcast: true,
            reveal_value: None,
        };
        let result = agent.create_pins(&request).unwrap();
        match result {
            CreatePinResult::Mvc(r) => {
                assert_eq!(r.txids.len(), 1);
                assert_eq!(r.tx_hex_list.len(), 1);
            }
            CreatePinResult::Doge(_) => panic!("expected mvc result"),
        }
        assert!(api.broadcasts().is_empty());
    }

    #[test]
    fn test_consolidate_with_nothing_to_sweep() {
        let (agent, _api) = agent();
        let result = agent.consolidate(None, false).unwrap();
        assert!(!result.success);
        assert_eq!(result.error_code, Some(ErrorCode::InsufficientBalance));
        assert_eq!(agent.consolidation_state().unwrap(), ConsolidationState::Idle);
    }

    #[test]
    fn test_signs_from_configured_address_index() {
        let api = Arc::new(InMemoryChainApi::new(Network::Mainnet));
        let config = EngineConfig {
            derivation_depth: 5,
            address_index: 1,
            broadcast_retries: 0,
            broadcast_retry_delay_ms: 0,
            ..EngineConfig::default()
        };
        let agent = MetaidAgent::new(KeyMaterial::from_mnemonic(ABANDON).unwrap(), config, api.clone());
        let ring = agent.key_ring().unwrap();
        let second = ring.derive(Chain::Mvc, 1).unwrap();
        assert_eq!(agent.address(Chain::Mvc).unwrap(), second.address);

        api.fund(Chain::Mvc, Utxo::new("22".repeat(32), 0, 50_000, second.address.clone()));
        let request = CreatePinRequest {
            chain: Chain::Mvc,
            data_list: vec![PinDetail::new(MetaidRecord::new(Operation::Create, "/info/name").with_body("alice"))],
            fee_rate: None,
            no_broadcast: true,
            reveal_value: None,
        };
        let CreatePinResult::Mvc(result) = agent.create_pins(&request).unwrap() else {
            panic!("expected mvc result");
        };
        let draft = TxDraft::from_hex(
            Chain::Mvc,
            Network::Mainnet,
            &result.tx_hex_list[0],
            vec![PrevOut {
                value: 50_000,
                script_pubkey: second.script_pubkey(),
            }],
        )
        .unwrap();
        verify_p2pkh_input(ring.secp(), &draft, 0).unwrap();
        assert!(draft.value_to(&second.script_pubkey()) > 0);
    }
}
