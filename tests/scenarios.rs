//! End-to-end flows against the in-memory chain

use bitcoin::consensus::encode::deserialize;
use bitcoin::Transaction;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use metaid_engine::api::{ChainApi, InMemoryChainApi};
use metaid_engine::chunked::{
    ChunkedEstimate, CompleteRequest, DirectUploadReceipt, DirectUploadRequest, EstimateRequest, InitiateRequest,
    MetafileApi, MultipartUpload, SagaState, TaskReceipt, TaskRequest, UploadPartRequest, UploadSaga,
};
use metaid_engine::consolidation::ConsolidationState;
use metaid_engine::fees::FeeRateTier;
use metaid_engine::pin::{CreatePinRequest, CreatePinResult, MetaidRecord, Operation, PinDetail};
use metaid_engine::script::decode;
use metaid_engine::transfer::{TransferRequest, TransferTask};
use metaid_engine::wallet::{KeyMaterial, Utxo};
use metaid_engine::{Chain, EngineConfig, EngineResult, ErrorCode, MetaidAgent, Network, Receiver};

const ABANDON: &str = "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";

fn config() -> EngineConfig {
    EngineConfig {
        derivation_depth: 5,
        broadcast_retries: 0,
        broadcast_retry_delay_ms: 0,
        ..EngineConfig::default()
    }
}

fn agent_on(api: Arc<dyn ChainApi>) -> MetaidAgent {
    MetaidAgent::new(KeyMaterial::from_mnemonic(ABANDON).unwrap(), config(), api)
}

fn setup() -> (MetaidAgent, Arc<InMemoryChainApi>) {
    let api = Arc::new(InMemoryChainApi::new(Network::Mainnet));
    (agent_on(api.clone()), api)
}

fn fund(api: &InMemoryChainApi, chain: Chain, address: &str, values: &[u64]) {
    for (i, value) in values.iter().enumerate() {
        api.fund(chain, Utxo::new(format!("{:02x}", i + 1).repeat(32), 0, *value, address));
    }
}

fn tx(raw_hex: &str) -> Transaction {
    deserialize(&hex::decode(raw_hex).unwrap()).unwrap()
}

fn pin(path: &str, body: &str) -> PinDetail {
    PinDetail::new(MetaidRecord::new(Operation::Create, path).with_body(body))
}

#[test]
fn mvc_batch_with_forward_reference() {
    let (agent, api) = setup();
    let address = agent.address(Chain::Mvc).unwrap();
    fund(&api, Chain::Mvc, &address, &[80_000]);

    let mut second = pin("/info/bio", "see {{avatar}}");
    second.options.refs = BTreeMap::from([("{{avatar}}".to_string(), 0)]);
    let request = CreatePinRequest {
        chain: Chain::Mvc,
        data_list: vec![pin("/info/avatar", "img"), second],
        fee_rate: Some(1),
        no_broadcast: false,
        reveal_value: None,
    };

    let result = match agent.create_pins(&request).unwrap() {
        CreatePinResult::Mvc(r) => r,
        CreatePinResult::Doge(_) => panic!("expected an mvc result"),
    };
    assert_eq!(result.txids.len(), 2);
    assert_eq!(result.pin_ids[0], format!("{}i0", result.txids[0]));

    let broadcasts = api.broadcasts();
    assert_eq!(broadcasts.len(), 2);
    let second_hex = &broadcasts[1].1;
    assert!(second_hex.contains(&hex::encode(format!("see {}", result.txids[0]))));

    // The ledger now holds the last change plus the two 1-sat anchors
    let total: u64 = api.utxos(Chain::Mvc).iter().map(|u| u.value).sum();
    assert_eq!(total, 80_000 - result.total_cost);
}

#[test]
fn modify_without_target_is_rejected_before_anything_happens() {
    let (agent, api) = setup();
    let request = CreatePinRequest {
        chain: Chain::Mvc,
        data_list: vec![PinDetail::new(MetaidRecord::new(Operation::Modify, "/info/name").with_body("bob"))],
        fee_rate: None,
        no_broadcast: false,
        reveal_value: None,
    };
    let err = agent.create_pins(&request).unwrap_err();
    assert_eq!(err.code, ErrorCode::InvalidOperationPath);
    assert!(api.broadcasts().is_empty());
}

#[test]
fn partial_broadcast_reports_accepted_txids() {
    let (agent, api) = setup();
    let address = agent.address(Chain::Mvc).unwrap();
    fund(&api, Chain::Mvc, &address, &[80_000]);
    api.reject_after(1);

    let request = CreatePinRequest {
        chain: Chain::Mvc,
        data_list: vec![pin("/a", "1"), pin("/b", "2"), pin("/c", "3")],
        fee_rate: Some(1),
        no_broadcast: false,
        reveal_value: None,
    };
    let err = agent.create_pins(&request).unwrap_err();
    assert_eq!(err.code, ErrorCode::PartialBroadcast);
    assert_eq!(err.broadcast_txids.len(), 1);
    assert!(!err.is_clean_failure());
}

#[test]
fn doge_batch_interleaves_commit_and_reveal() {
    let (agent, api) = setup();
    let address = agent.address(Chain::Doge).unwrap();
    fund(&api, Chain::Doge, &address, &[40_000_000, 40_000_000]);

    let records = vec![
        MetaidRecord::new(Operation::Create, "/protocols/simplebuzz").with_body("first"),
        MetaidRecord::new(Operation::Create, "/protocols/simplebuzz").with_body("second"),
    ];
    let result = agent.inscribe(records, Some(1_000_000), None, false).unwrap();
    assert_eq!(result.commit_tx_ids.len(), 2);
    assert_eq!(result.total_cost, result.commit_cost + result.reveal_cost);

    let broadcasts = api.broadcasts();
    assert_eq!(broadcasts.len(), 4);
    for pair in broadcasts.chunks(2) {
        let commit = tx(&pair[0].1);
        let reveal = tx(&pair[1].1);
        assert_eq!(reveal.input[0].previous_output.txid, commit.compute_txid());
        assert_eq!(reveal.input[0].previous_output.vout, 0);
        assert_eq!(reveal.output[0].value.to_sat(), 1_000_000);
    }
    assert_eq!(result.pin_ids()[1], format!("{}i0", result.reveal_tx_ids[1]));
}

#[test]
fn doge_pins_take_reveal_value_from_request() {
    let (agent, api) = setup();
    let address = agent.address(Chain::Doge).unwrap();
    fund(&api, Chain::Doge, &address, &[40_000_000]);

    let request = CreatePinRequest {
        chain: Chain::Doge,
        data_list: vec![pin("/info/name", "alice")],
        fee_rate: Some(1_000_000),
        no_broadcast: true,
        reveal_value: Some(2_000_000),
    };
    let result = match agent.create_pins(&request).unwrap() {
        CreatePinResult::Doge(r) => r,
        CreatePinResult::Mvc(_) => panic!("expected a doge result"),
    };
    assert_eq!(tx(&result.reveal_txs_hex[0]).output[0].value.to_sat(), 2_000_000);
    assert!(api.broadcasts().is_empty());
}

#[test]
fn doge_pins_reject_refs_and_extra_outputs() {
    let (agent, api) = setup();
    let address = agent.address(Chain::Doge).unwrap();
    fund(&api, Chain::Doge, &address, &[40_000_000]);

    let mut linked = pin("/info/bio", "see {{avatar}}");
    linked.options.refs = BTreeMap::from([("{{avatar}}".to_string(), 0)]);
    let mut paying = pin("/info/bio", "hi");
    paying.options.outputs = vec![Receiver::new(address.clone(), 1_500_000)];

    for detail in [linked, paying] {
        let request = CreatePinRequest {
            chain: Chain::Doge,
            data_list: vec![pin("/info/avatar", "img"), detail],
            fee_rate: Some(1_000_000),
            no_broadcast: false,
            reveal_value: None,
        };
        let err = agent.create_pins(&request).unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidInput);
    }
    assert!(api.broadcasts().is_empty());
}

#[test]
fn doge_transfer_minimum_checked_first() {
    let (agent, api) = setup();
    api.set_fee_tiers(
        Chain::Doge,
        vec![FeeRateTier {
            title: "Avg".into(),
            desc: String::new(),
            fee_rate: 300_000,
        }],
    );
    let to = agent.key_ring().unwrap().derive(Chain::Doge, 1).unwrap().address;
    let request = TransferRequest {
        chain: Chain::Doge,
        tasks: vec![TransferTask::native(vec![Receiver::new(to, 999_999)])],
        fee_rate: None,
    };
    let err = agent.transfer(&request, false).unwrap_err();
    assert_eq!(err.code, ErrorCode::AmountBelowMinimum);
    assert!(api.broadcasts().is_empty());
}

#[test]
fn chained_mvc_transfers_spend_previous_change() {
    let (agent, api) = setup();
    let address = agent.address(Chain::Mvc).unwrap();
    fund(&api, Chain::Mvc, &address, &[50_000, 50_000]);
    let ring = agent.key_ring().unwrap();
    let to = ring.derive(Chain::Mvc, 2).unwrap().address;

    let request = TransferRequest {
        chain: Chain::Mvc,
        tasks: vec![
            TransferTask::native(vec![Receiver::new(to.clone(), 10_000)]),
            TransferTask::native(vec![Receiver::new(to, 5_000)]),
        ],
        fee_rate: Some(1),
    };
    let result = agent.transfer(&request, false).unwrap();
    assert!(result.broadcasted);
    assert_eq!(result.txids.len(), 2);

    let second = tx(&result.results[1].tx_hex);
    assert_eq!(second.input.len(), 1);
    assert_eq!(second.input[0].previous_output.txid.to_string(), result.txids[0]);
}

#[test]
fn consolidation_sweeps_and_locks_the_address() {
    let (agent, api) = setup();
    let address = agent.address(Chain::Mvc).unwrap();
    fund(&api, Chain::Mvc, &address, &[10_000, 20_000, 30_000, 500]);

    let result = agent.consolidate(None, false).unwrap();
    assert!(result.success, "{}", result.message);
    assert_eq!(result.state, ConsolidationState::ConsolidatingPending);
    let txid = result.txid.clone().unwrap();

    let sweep = tx(&api.broadcasts()[0].1);
    assert_eq!(sweep.input.len(), 3);
    assert_eq!(sweep.output.len(), 1);

    // A second attempt fails immediately while the sweep is pending
    let again = agent.consolidate(None, false).unwrap();
    assert!(!again.success);
    assert_eq!(again.error_code, Some(ErrorCode::ConsolidationInProgress));
    assert_eq!(api.broadcasts().len(), 1);

    agent.confirm_consolidation(&txid).unwrap();
    assert_eq!(agent.consolidation_state().unwrap(), ConsolidationState::Completed);
}

#[test]
fn concurrent_consolidations_admit_one() {
    let (agent, api) = setup();
    let address = agent.address(Chain::Mvc).unwrap();
    fund(&api, Chain::Mvc, &address, &[10_000, 20_000]);

    let guard = agent.registry().begin(&address, &address).unwrap();
    let blocked = agent.consolidate(None, false).unwrap();
    assert_eq!(blocked.error_code, Some(ErrorCode::ConsolidationInProgress));
    guard.abandon();

    let agent = Arc::new(agent);
    let results: Vec<_> = (0..4)
        .map(|_| {
            let agent = agent.clone();
            std::thread::spawn(move || agent.consolidate(None, true).unwrap())
        })
        .collect::<Vec<_>>()
        .into_iter()
        .map(|h| h.join().unwrap())
        .collect();
    assert!(results.iter().any(|r| r.success));
    assert!(results
        .iter()
        .filter(|r| !r.success)
        .all(|r| r.error_code == Some(ErrorCode::ConsolidationInProgress)));
    assert!(api.broadcasts().is_empty());
}

#[test]
fn consolidation_aborts_when_balance_moved() {
    let (agent, api) = setup();
    let address = agent.address(Chain::Mvc).unwrap();
    fund(&api, Chain::Mvc, &address, &[10_000, 20_000]);
    api.override_balance(&address, 20_000);

    let result = agent.consolidate(None, false).unwrap();
    assert!(!result.success);
    assert_eq!(result.error_code, Some(ErrorCode::BalanceToleranceExceeded));
    assert_eq!(result.state, ConsolidationState::Idle);
    assert!(api.broadcasts().is_empty());
}

/// Spends the first output behind the engine's back on the second scan
struct Racing {
    inner: InMemoryChainApi,
    scans: AtomicUsize,
}

impl ChainApi for Racing {
    fn fetch_utxos(&self, chain: Chain, address: &str) -> EngineResult<Vec<Utxo>> {
        if self.scans.fetch_add(1, Ordering::SeqCst) == 1 {
            if let Some(first) = self.inner.utxos(chain).first() {
                self.inner.spend_externally(chain, &first.txid, first.output_index);
            }
        }
        self.inner.fetch_utxos(chain, address)
    }

    fn fetch_balance(&self, chain: Chain, address: &str) -> EngineResult<u64> {
        self.inner.fetch_balance(chain, address)
    }

    fn fetch_fee_rates(&self, chain: Chain) -> EngineResult<Vec<FeeRateTier>> {
        self.inner.fetch_fee_rates(chain)
    }

    fn broadcast(&self, chain: Chain, raw_hex: &str) -> EngineResult<String> {
        self.inner.broadcast(chain, raw_hex)
    }
}

#[test]
fn reservation_lost_before_broadcast() {
    let api = Arc::new(Racing {
        inner: InMemoryChainApi::new(Network::Mainnet),
        scans: AtomicUsize::new(0),
    });
    let agent = agent_on(api.clone());
    let address = agent.address(Chain::Mvc).unwrap();
    fund(&api.inner, Chain::Mvc, &address, &[10_000, 20_000]);

    let result = agent.consolidate(None, false).unwrap();
    assert!(!result.success);
    assert_eq!(result.error_code, Some(ErrorCode::ReservationLost));
    assert_eq!(result.state, ConsolidationState::Idle);
    assert!(api.inner.broadcasts().is_empty());
}

#[test]
fn cosigned_pre_txs_stay_open() {
    let (agent, api) = setup();
    let address = agent.address(Chain::Mvc).unwrap();
    fund(&api, Chain::Mvc, &address, &[100_000]);

    let estimate = ChunkedEstimate {
        chunk_pre_tx_fee: 5_000,
        index_pre_tx_fee: 8_000,
        chunk_number: 1,
        total_fee: 13_000,
    };
    let signed = agent
        .cosign_upload(&estimate, Some(1), metaid_engine::tx::SIGHASH_NONE_ANYONECANPAY_FORKID)
        .unwrap();
    assert_eq!(signed.outputs.chunk_value, 5_350);
    assert_eq!(signed.outputs.index_value, 8_350);

    let merge = tx(&signed.merge_tx.raw_hex);
    for (pre_hex, vout) in [
        (&signed.chunk_pre_tx.raw_hex, signed.outputs.chunk_vout),
        (&signed.index_pre_tx.raw_hex, signed.outputs.index_vout),
    ] {
        let pre = tx(pre_hex);
        assert!(pre.output.is_empty());
        assert_eq!(pre.input[0].previous_output.txid, merge.compute_txid());
        assert_eq!(pre.input[0].previous_output.vout, vout);

        let pushes = decode(pre.input[0].script_sig.as_bytes()).unwrap();
        let sig = pushes[0].push_data().unwrap();
        assert_eq!(*sig.last().unwrap(), 0xC2);
    }
    // Nothing is broadcast by the wallet for uploads
    assert!(api.broadcasts().is_empty());
}

#[derive(Default)]
struct FakeUploader {
    parts: Mutex<Vec<u32>>,
    tasks: Mutex<Vec<TaskRequest>>,
    direct: Mutex<Vec<DirectUploadRequest>>,
}

impl MetafileApi for FakeUploader {
    fn initiate(&self, _: &InitiateRequest) -> EngineResult<MultipartUpload> {
        Ok(MultipartUpload {
            upload_id: "up-1".into(),
            key: "files/up-1".into(),
        })
    }

    fn upload_part(&self, request: &UploadPartRequest) -> EngineResult<String> {
        self.parts.lock().unwrap().push(request.part_number);
        Ok(format!("etag-{}", request.part_number))
    }

    fn complete(&self, request: &CompleteRequest) -> EngineResult<String> {
        Ok(format!("{}-done", request.key))
    }

    fn estimate(&self, _: &EstimateRequest) -> EngineResult<ChunkedEstimate> {
        Ok(ChunkedEstimate {
            chunk_pre_tx_fee: 4_000,
            index_pre_tx_fee: 6_000,
            chunk_number: 2,
            total_fee: 10_000,
        })
    }

    fn submit_task(&self, request: &TaskRequest) -> EngineResult<TaskReceipt> {
        self.tasks.lock().unwrap().push(request.clone());
        Ok(TaskReceipt {
            task_id: "task-9".into(),
            status: "pending".into(),
            message: String::new(),
        })
    }

    fn direct_upload(&self, request: &DirectUploadRequest) -> EngineResult<DirectUploadReceipt> {
        self.direct.lock().unwrap().push(request.clone());
        Ok(DirectUploadReceipt {
            tx_id: "dd".repeat(32),
            pin_id: format!("{}i0", "dd".repeat(32)),
            status: "success".into(),
        })
    }
}

#[test]
fn small_file_uploads_directly_from_largest_output() {
    let (agent, api) = setup();
    let address = agent.address(Chain::Mvc).unwrap();
    fund(&api, Chain::Mvc, &address, &[3_000, 90_000, 20_000]);

    let uploader = FakeUploader::default();
    let receipt = agent
        .upload_direct(&uploader, "cat.png", &[7u8; 2048], "/file", "image/png", Some(1))
        .unwrap();
    assert!(receipt.pin_id.ends_with("i0"));
    assert!(uploader.parts.lock().unwrap().is_empty());
    assert!(api.broadcasts().is_empty());

    let sent = uploader.direct.lock().unwrap();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].total_input_amount, 90_000);
    assert_eq!(sent[0].address, address);
    assert_eq!(sent[0].content.len(), 2048);

    let pre = tx(&sent[0].pre_tx_hex);
    assert_eq!(pre.input.len(), 1);
    assert_eq!(pre.output.len(), 1);
    assert_eq!(pre.output[0].value.to_sat(), 1);
    let pushes = decode(pre.input[0].script_sig.as_bytes()).unwrap();
    let sig = pushes[0].push_data().unwrap();
    assert_eq!(*sig.last().unwrap(), 0xC3);
}

#[test]
fn direct_upload_rejects_large_files_and_small_outputs() {
    let (agent, api) = setup();
    let address = agent.address(Chain::Mvc).unwrap();
    fund(&api, Chain::Mvc, &address, &[4_000]);
    let uploader = FakeUploader::default();

    let err = agent
        .upload_direct(&uploader, "cat.png", &[1u8; 16], "/file", "image/png", None)
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::InsufficientBalance);

    let big = vec![0u8; 5 * 1024 * 1024 + 1];
    let err = agent
        .upload_direct(&uploader, "big.bin", &big, "/file", "application/octet-stream", None)
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::InvalidInput);
    assert!(uploader.direct.lock().unwrap().is_empty());
}

#[test]
fn chunked_upload_runs_to_submission() {
    let (agent, api) = setup();
    let address = agent.address(Chain::Mvc).unwrap();
    fund(&api, Chain::Mvc, &address, &[60_000]);

    let content = vec![0xABu8; 1_500_000];
    let mut saga = agent
        .start_upload("movie.bin", &content, "/file", "application/octet-stream", Some(1))
        .unwrap();
    let uploader = FakeUploader::default();
    let mut states = Vec::new();
    let receipt = agent
        .upload(&uploader, &mut saga, &content, &mut |s: &UploadSaga| {
            states.push(s.state);
            Ok(())
        })
        .unwrap();

    assert_eq!(receipt.task_id, "task-9");
    assert_eq!(*uploader.parts.lock().unwrap(), vec![1, 2]);
    assert_eq!(states.last(), Some(&SagaState::Submitted));

    let tasks = uploader.tasks.lock().unwrap();
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].storage_key, "files/up-1-done");
    assert_eq!(tasks[0].content_type, "application/octet-stream;binary");
    assert!(!tasks[0].merge_tx_hex.is_empty());
}
