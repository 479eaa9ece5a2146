/// Transaction building and signing through `cardano-cli`.
///
/// One anchor transaction spends the first UTxO at the payment address back
/// to itself, minus a flat fee, and attaches a CIP-20 message (metadata
/// label 674) naming the report and its fingerprint:
///
/// ```text
/// build-raw ──▶ tx.raw ──▶ sign ──▶ tx.signed ──▶ Blockfrost /tx/submit
/// ```
///
/// Intermediate files live in a temporary directory removed on drop.
use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde_json::json;
use tokio::process::Command;
use tracing::debug;

use super::blockfrost::BlockfrostClient;
use super::SubmissionPayload;
use crate::error::{IntegrityError, Result};

/// Flat fee per anchor transaction, in lovelace.
pub const FEE_LOVELACE: u64 = 200_000;

/// Smallest change output accepted, in lovelace (1 ADA).
pub const MIN_CHANGE_LOVELACE: u64 = 1_000_000;

/// Network selection flags for `cardano-cli`.
pub fn network_args(network: &str) -> Result<Vec<String>> {
    match network {
        "mainnet" => Ok(vec!["--mainnet".into()]),
        "preprod" => Ok(vec!["--testnet-magic".into(), "1".into()]),
        "preview" => Ok(vec!["--testnet-magic".into(), "2".into()]),
        other => Err(IntegrityError::Config(format!("unknown Cardano network: {other}"))),
    }
}

/// CIP-20 metadata for an anchor payload. Each message line stays under
/// the 64-byte metadata string limit, so the fingerprint is truncated.
pub fn anchor_metadata(payload: &SubmissionPayload) -> serde_json::Value {
    let evidence: String = payload.evidence_hash.chars().take(32).collect();
    json!({
        "674": {
            "msg": [
                format!("RRS Report: {}", payload.report_id),
                format!("Evidence: {evidence}..."),
                format!("Category: {}", payload.category),
                format!("Timestamp: {}", payload.timestamp),
            ]
        }
    })
}

/// Text envelope written by `cardano-cli transaction sign`.
#[derive(Debug, Deserialize)]
struct TextEnvelope {
    #[serde(rename = "cborHex")]
    cbor_hex: String,
}

fn decode_envelope(contents: &[u8]) -> Result<Vec<u8>> {
    let envelope: TextEnvelope = serde_json::from_slice(contents)
        .map_err(|e| {
            IntegrityError::Serialization(format!("Invalid signed transaction file: {e}"))
        })?;
    hex::decode(envelope.cbor_hex.trim())
        .map_err(|e| IntegrityError::Serialization(format!("Invalid cborHex: {e}")))
}

#[derive(Debug, Clone)]
pub struct CardanoCliConfig {
    /// Path or name of the `cardano-cli` binary.
    pub binary: PathBuf,
    pub signing_key: PathBuf,
    pub payment_address: String,
    pub network: String,
}

#[derive(Clone)]
pub struct CardanoCliSubmitter {
    config: CardanoCliConfig,
    blockfrost: BlockfrostClient,
}

impl CardanoCliSubmitter {
    pub fn new(config: CardanoCliConfig, blockfrost: BlockfrostClient) -> Result<Self> {
        network_args(&config.network)?;
        Ok(Self { config, blockfrost })
    }

    async fn run(&self, args: &[String]) -> Result<String> {
        debug!(binary = %self.config.binary.display(), args = ?args, "Running cardano-cli");
        // A timed-out submission drops this future; the child goes with it.
        let output = Command::new(&self.config.binary)
            .args(args)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| {
                IntegrityError::AnchorServiceUnavailable(format!("cannot run cardano-cli: {e}"))
            })?;

        if !output.status.success() {
            return Err(IntegrityError::Ledger(format!(
                "cardano-cli {} failed: {}",
                args.get(1).map(String::as_str).unwrap_or_default(),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    /// Build, sign and submit an anchor transaction. Returns its id.
    pub async fn submit(&self, payload: &SubmissionPayload) -> Result<String> {
        let utxos = self
            .blockfrost
            .address_utxos(&self.config.payment_address)
            .await?;
        let utxo = utxos
            .first()
            .ok_or_else(|| IntegrityError::Ledger("No UTxOs available in wallet".into()))?;

        let amount_in = utxo.lovelace();
        let amount_out = amount_in.saturating_sub(FEE_LOVELACE);
        if amount_out < MIN_CHANGE_LOVELACE {
            return Err(IntegrityError::Ledger(format!(
                "Insufficient funds: {amount_in} lovelace available, need {}",
                FEE_LOVELACE + MIN_CHANGE_LOVELACE
            )));
        }

        let workdir = tempfile::tempdir()?;
        let dir = workdir.path();
        let metadata_path = dir.join("metadata.json");
        let raw_path = dir.join("tx.raw");
        let signed_path = dir.join("tx.signed");

        let metadata = serde_json::to_vec(&anchor_metadata(payload))
            .map_err(|e| IntegrityError::Serialization(format!("metadata encoding failed: {e}")))?;
        tokio::fs::write(&metadata_path, metadata).await?;

        self.run(&[
            "transaction".into(),
            "build-raw".into(),
            "--tx-in".into(),
            utxo.tx_in(),
            "--tx-out".into(),
            format!("{}+{amount_out}", self.config.payment_address),
            "--metadata-json-file".into(),
            path_arg(&metadata_path),
            "--fee".into(),
            FEE_LOVELACE.to_string(),
            "--out-file".into(),
            path_arg(&raw_path),
        ])
        .await?;

        let mut sign = vec![
            "transaction".to_string(),
            "sign".into(),
            "--tx-body-file".into(),
            path_arg(&raw_path),
            "--signing-key-file".into(),
            path_arg(&self.config.signing_key),
        ];
        sign.extend(network_args(&self.config.network)?);
        sign.extend(["--out-file".to_string(), path_arg(&signed_path)]);
        self.run(&sign).await?;

        let signed = tokio::fs::read(&signed_path).await?;
        let cbor = decode_envelope(&signed)?;

        match self.blockfrost.submit_cbor(cbor).await? {
            Some(tx_id) => Ok(tx_id),
            None => {
                self.run(&[
                    "transaction".into(),
                    "txid".into(),
                    "--tx-file".into(),
                    path_arg(&signed_path),
                ])
                .await
            }
        }
    }
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn payload() -> SubmissionPayload {
        SubmissionPayload {
            action: "anchor_evidence".into(),
            report_id: "RRS-2025-00001".into(),
            evidence_hash: "a".repeat(64),
            category: "theft".into(),
            is_anonymous: true,
            timestamp: 1_735_689_600_000,
            network: "preview".into(),
            reporter: None,
        }
    }

    #[test]
    fn test_anchor_metadata_lines() {
        let metadata = anchor_metadata(&payload());
        let lines = metadata["674"]["msg"].as_array().unwrap();
        assert_eq!(lines[0], "RRS Report: RRS-2025-00001");
        assert_eq!(lines[1], format!("Evidence: {}...", "a".repeat(32)));
        assert_eq!(lines[3], "Timestamp: 1735689600000");
        assert!(lines.iter().all(|l| l.as_str().unwrap().len() <= 64));
    }

    #[test]
    fn test_network_args() {
        assert_eq!(network_args("preview").unwrap(), vec!["--testnet-magic", "2"]);
        assert_eq!(network_args("preprod").unwrap(), vec!["--testnet-magic", "1"]);
        assert_eq!(network_args("mainnet").unwrap(), vec!["--mainnet"]);
        assert!(network_args("guildnet").is_err());
    }

    #[test]
    fn test_decode_envelope() {
        let envelope = concat!(
            r#"{"type":"Witnessed Tx BabbageEra","#,
            r#""description":"Ledger Cddl Format","cborHex":"84a400"}"#,
        );
        assert_eq!(decode_envelope(envelope.as_bytes()).unwrap(), vec![0x84, 0xa4, 0x00]);
        assert!(decode_envelope(b"{}").is_err());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_abandoned_cli_run_kills_child() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("finished");
        let script = dir.path().join("slow-cli");
        std::fs::write(
            &script,
            format!("#!/bin/sh\nsleep 1\ntouch {}\n", marker.display()),
        )
        .unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let blockfrost =
            BlockfrostClient::new("http://127.0.0.1:9", "preview-test", Duration::from_secs(1))
                .unwrap();
        let submitter = CardanoCliSubmitter::new(
            CardanoCliConfig {
                binary: script,
                signing_key: dir.path().join("payment.skey"),
                payment_address: "addr_test1qz".into(),
                network: "preview".into(),
            },
            blockfrost,
        )
        .unwrap();

        let args = vec!["query".to_string(), "tip".to_string()];
        let run = tokio::time::timeout(Duration::from_millis(200), submitter.run(&args)).await;
        assert!(run.is_err());

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(!marker.exists());
    }
}
