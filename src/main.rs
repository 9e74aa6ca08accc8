//! metaid-engine CLI
//!
//! Thin shell over `MetaidAgent`. Every command prints JSON on stdout.
//! The mnemonic comes from `--mnemonic` or `METAID_MNEMONIC`.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde_json::json;
use std::path::PathBuf;

use metaid_engine::chunked::{fits_direct_upload, ChunkedEstimate, UploadSaga};
use metaid_engine::pin::{CreatePinRequest, MetaidRecord, Operation, PinDetail};
use metaid_engine::transfer::{TransferRequest, TransferTask};
use metaid_engine::utils::logging;
use metaid_engine::wallet::receiving_index;
use metaid_engine::{Chain, EngineConfig, KeyMaterial, MetaidAgent, Network, Receiver};

#[derive(Parser)]
#[command(name = "metaid-engine")]
#[command(version)]
#[command(about = "Build, sign and broadcast MetaID transactions on MVC and DOGE", long_about = None)]
struct Cli {
    /// JSON config file; METAID_* variables override it
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// BIP39 mnemonic (defaults to METAID_MNEMONIC)
    #[arg(short, long, global = true)]
    mnemonic: Option<String>,

    /// mainnet or testnet
    #[arg(short, long, global = true)]
    network: Option<Network>,

    /// Sign but do not broadcast; print raw transactions
    #[arg(long, global = true)]
    dry_run: bool,

    /// Receiving address index to sign from (0 by default)
    #[arg(long, global = true, conflicts_with = "derivation_path")]
    address_index: Option<u32>,

    /// Receiving path such as m/44'/10001'/0'/0/3, in place of --address-index
    #[arg(long = "derivation-path", global = true)]
    derivation_path: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the wallet's addresses
    Address,

    /// Pin one record, or a batch given as JSON
    Pin {
        #[arg(long, default_value = "mvc")]
        chain: Chain,

        /// init, create, modify or revoke
        #[arg(long, default_value = "create")]
        operation: Operation,

        #[arg(long, required_unless_present = "records", conflicts_with = "records")]
        path: Option<String>,

        #[arg(long, default_value = "", conflicts_with = "records")]
        body: String,

        /// JSON array of {"metaidData": {...}, "options": {...}} entries
        #[arg(long)]
        records: Option<String>,

        /// DOGE reveal output value in satoshis
        #[arg(long)]
        reveal_value: Option<u64>,

        #[arg(long)]
        content_type: Option<String>,

        #[arg(long)]
        fee_rate: Option<u64>,
    },

    /// Inscribe one record on DOGE
    Inscribe {
        #[arg(long)]
        path: String,

        #[arg(long, default_value = "")]
        body: String,

        #[arg(long)]
        content_type: Option<String>,

        #[arg(long)]
        fee_rate: Option<u64>,
    },

    /// Send coins
    Transfer {
        #[arg(long, default_value = "mvc")]
        chain: Chain,

        /// Receiver as ADDRESS:AMOUNT (repeatable)
        #[arg(long = "to", required = true)]
        receivers: Vec<String>,

        #[arg(long)]
        fee_rate: Option<u64>,
    },

    /// Sweep MVC outputs into one
    Consolidate {
        /// Destination address (the wallet itself by default)
        #[arg(long)]
        main_address: Option<String>,
    },

    /// Upload a file; up to 5 MiB goes in one request, larger files in parts
    Upload {
        #[arg(long)]
        file: PathBuf,

        #[arg(long, default_value = "/file")]
        path: String,

        #[arg(long, default_value = "application/octet-stream")]
        content_type: String,

        /// Where progress is kept; rerun with the same file to resume
        #[arg(long)]
        state: Option<PathBuf>,

        /// Use the resumable multipart flow even for small files
        #[arg(long)]
        chunked: bool,

        #[arg(long)]
        fee_rate: Option<u64>,
    },

    /// Build only the co-signed upload transactions for a known quote
    Cosign {
        #[arg(long)]
        chunk_pre_tx_fee: u64,

        #[arg(long)]
        index_pre_tx_fee: u64,

        #[arg(long)]
        fee_rate: Option<u64>,
    },
}

fn main() -> Result<()> {
    logging::init_from_env();
    let cli = Cli::parse();

    // Catch bad records before the mnemonic is even parsed
    let batch = match &cli.command {
        Commands::Pin {
            operation,
            path,
            body,
            content_type,
            records,
            ..
        } => Some(pin_details(*operation, path.clone(), body.clone(), content_type.clone(), records.as_deref())?),
        _ => None,
    };

    let mut config = EngineConfig::load(cli.config.as_deref())?;
    if let Some(network) = cli.network {
        config.network = network;
    }
    if let Some(index) = cli.address_index {
        config.address_index = index;
    }
    if let Some(path) = cli.derivation_path.as_deref() {
        config.address_index = receiving_index(path)?;
    }

    let phrase = match cli.mnemonic.clone() {
        Some(p) => p,
        None => std::env::var("METAID_MNEMONIC").context("No mnemonic: pass --mnemonic or set METAID_MNEMONIC")?,
    };
    let agent = MetaidAgent::from_config(KeyMaterial::from_mnemonic(&phrase)?, config)?;

    let output = match cli.command {
        Commands::Address => json!({
            "mvc": agent.address(Chain::Mvc)?,
            "doge": agent.address(Chain::Doge)?,
        }),
        Commands::Pin {
            chain,
            fee_rate,
            reveal_value,
            ..
        } => {
            let request = CreatePinRequest {
                chain,
                data_list: batch.unwrap_or_default(),
                fee_rate,
                no_broadcast: cli.dry_run,
                reveal_value,
            };
            serde_json::to_value(agent.create_pins(&request)?)?
        }
        Commands::Inscribe {
            path,
            body,
            content_type,
            fee_rate,
        } => {
            let records = vec![record(Operation::Create, path, body, content_type)];
            serde_json::to_value(agent.inscribe(records, fee_rate, None, cli.dry_run)?)?
        }
        Commands::Transfer {
            chain,
            receivers,
            fee_rate,
        } => {
            let receivers = receivers
                .iter()
                .map(|r| parse_receiver(r))
                .collect::<Result<Vec<_>>>()?;
            let request = TransferRequest {
                chain,
                tasks: vec![TransferTask::native(receivers)],
                fee_rate,
            };
            serde_json::to_value(agent.transfer(&request, cli.dry_run)?)?
        }
        Commands::Consolidate { main_address } => serde_json::to_value(agent.consolidate(main_address, cli.dry_run)?)?,
        Commands::Upload {
            file,
            path,
            content_type,
            state,
            chunked,
            fee_rate,
        } => {
            if cli.dry_run {
                bail!("upload has no dry-run mode; use `cosign` to inspect the transactions");
            }
            let content = std::fs::read(&file).with_context(|| format!("Cannot read {}", file.display()))?;
            let file_name = file
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "file".to_string());
            let state = state.unwrap_or_else(|| file.with_extension("upload.json"));
            let client = agent.metafile_client()?;

            // A saved state file means a chunked upload is already under way
            if !chunked && !state.exists() && fits_direct_upload(content.len() as u64) {
                let receipt = agent.upload_direct(&client, &file_name, &content, &path, &content_type, fee_rate)?;
                println!("{}", serde_json::to_string_pretty(&receipt)?);
                return Ok(());
            }

            let mut saga = if state.exists() {
                UploadSaga::load(&state)?
            } else {
                agent.start_upload(&file_name, &content, &path, &content_type, fee_rate)?
            };
            let receipt = agent.upload(&client, &mut saga, &content, &mut |s: &UploadSaga| s.save(&state))?;
            serde_json::to_value(receipt)?
        }
        Commands::Cosign {
            chunk_pre_tx_fee,
            index_pre_tx_fee,
            fee_rate,
        } => {
            let estimate = ChunkedEstimate {
                chunk_pre_tx_fee,
                index_pre_tx_fee,
                chunk_number: 0,
                total_fee: 0,
            };
            let signed = agent.cosign_upload(&estimate, fee_rate, metaid_engine::tx::SIGHASH_NONE_ANYONECANPAY_FORKID)?;
            json!({
                "mergeTxHex": signed.merge_tx.raw_hex,
                "chunkPreTxHex": signed.chunk_pre_tx.raw_hex,
                "indexPreTxHex": signed.index_pre_tx.raw_hex,
            })
        }
    };

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

/// The records a `pin` command carries, normalized so bad input fails early
fn pin_details(
    operation: Operation,
    path: Option<String>,
    body: String,
    content_type: Option<String>,
    records: Option<&str>,
) -> Result<Vec<PinDetail>> {
    let details = match (records, path) {
        (Some(json), _) => {
            let details: Vec<PinDetail> = serde_json::from_str(json).context("--records is not a JSON array of pins")?;
            if details.is_empty() {
                bail!("--records holds no pins");
            }
            details
        }
        (None, Some(path)) => vec![PinDetail::new(record(operation, path, body, content_type))],
        (None, None) => bail!("pin needs --path or --records"),
    };
    for detail in &details {
        detail.metaid_data.normalized()?;
    }
    Ok(details)
}

fn record(operation: Operation, path: String, body: String, content_type: Option<String>) -> MetaidRecord {
    let record = MetaidRecord::new(operation, path).with_body(body);
    match content_type {
        Some(ct) => record.with_content_type(ct),
        None => record,
    }
}

fn parse_receiver(raw: &str) -> Result<Receiver> {
    let Some((address, amount)) = raw.rsplit_once(':') else {
        bail!("Receiver '{}' must look like ADDRESS:AMOUNT", raw);
    };
    let amount = amount
        .parse()
        .with_context(|| format!("Amount in '{}' is not a whole number of satoshis", raw))?;
    Ok(Receiver::new(address, amount))
}
