//! Block envelopes: the pipeline's internal wrapper around a decoded block,
//! carrying raw bytes, pre-computed JSON renderings, source id, and receipt
//! timestamp.
//!
//! Decoding a full Algorand block (every transaction type, every consensus
//! version's field set) is domain-specific conversion logic this pipeline
//! does not own; the block-to-JSON conversion of domain-specific fields is
//! treated as a pure function the pipeline calls. What the pipeline itself
//! needs — the round number, enough of the header to compute transaction
//! ids, and a byte-faithful copy for republishing — is decoded here from
//! the real Algorand wire shape: blocks are msgpack-coded maps of
//! abbreviated field names (`rnd`, `ts`, `gen`, `gh`, `txns`), matching
//! `go-algorand-sdk`'s `types.Block`.

use std::sync::Arc;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::DecodeError;

/// Identifies one of the configured upstream nodes.
pub type NodeId = String;

/// The subset of an Algorand block header the pipeline itself needs.
/// Everything else in the wire payload is preserved only in `raw` and in
/// the JSON renderings, never parsed into Rust types here.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BlockHeader {
    pub round: u64,
    #[serde(default)]
    pub timestamp: i64,
    #[serde(default)]
    pub genesis_id: String,
    #[serde(default, with = "serde_bytes")]
    pub genesis_hash: Vec<u8>,
    /// Number of transactions in the payset, used to size the derived
    /// transaction-envelope list without re-parsing the payset itself.
    #[serde(default)]
    pub txn_count: usize,
}

#[derive(Deserialize)]
struct WireEnvelope {
    block: WireHeader,
}

#[derive(Deserialize)]
struct WireHeader {
    #[serde(rename = "rnd")]
    round: u64,
    #[serde(rename = "ts", default)]
    timestamp: i64,
    #[serde(rename = "gen", default)]
    genesis_id: String,
    #[serde(rename = "gh", default, with = "serde_bytes")]
    genesis_hash: Vec<u8>,
    #[serde(rename = "txns", default)]
    txns: Vec<rmpv::Value>,
}

/// Decode just enough of a raw msgpack block to confirm the round and
/// build the header. A decode failure here is treated by the fetcher as a
/// transient error — the same round is re-fetched — never as a
/// pipeline-fatal error.
pub fn decode_header(raw: &[u8]) -> Result<BlockHeader, DecodeError> {
    let wire: WireEnvelope = rmp_serde::from_slice(raw)?;
    Ok(BlockHeader {
        round: wire.block.round,
        timestamp: wire.block.timestamp,
        genesis_id: wire.block.genesis_id,
        genesis_hash: wire.block.genesis_hash,
        txn_count: wire.block.txns.len(),
    })
}

/// Strict-JSON and indexed-shape renderings, computed exactly once at
/// ingest and shared across every sink that wants them.
#[derive(Debug, Clone)]
pub struct BlockJson {
    /// A direct `serde_json` rendering of the header (strict mode: no
    /// lossy numeric coercions), analogous to the Go code's
    /// `protocol.JSONStrictHandle` encoding of the block wrapper.
    pub strict: Arc<str>,
    /// A flattened shape containing a derived transaction id list,
    /// consumed by sinks that want to subscribe by transaction without
    /// re-deriving ids themselves.
    pub indexed: Arc<str>,
}

impl BlockJson {
    fn render(header: &BlockHeader, source: &NodeId, tx_ids: &[String]) -> Result<Self, DecodeError> {
        let strict = serde_json::json!({
            "round": header.round,
            "timestamp": header.timestamp,
            "genesisId": header.genesis_id,
            "genesisHash": base64::Engine::encode(
                &base64::engine::general_purpose::STANDARD,
                &header.genesis_hash,
            ),
            "txnCount": header.txn_count,
            "src": source,
        });

        let indexed = serde_json::json!({
            "round": header.round,
            "timestamp": header.timestamp,
            "txns": tx_ids,
        });

        Ok(Self {
            strict: Arc::from(serde_json::to_string(&strict)?.as_str()),
            indexed: Arc::from(serde_json::to_string(&indexed)?.as_str()),
        })
    }
}

/// The pipeline's internal wrapper around one decoded block.
///
/// Invariants upheld by construction: `raw` is never rewritten after
/// creation, and `json` is computed exactly once, here, at ingest.
#[derive(Debug, Clone)]
pub struct BlockEnvelope {
    pub header: BlockHeader,
    pub raw: bytes::Bytes,
    pub json: BlockJson,
    pub source: NodeId,
    pub received_at: SystemTime,
}

impl BlockEnvelope {
    /// Decode `raw` and build a complete envelope, including the JSON
    /// renderings, computing placeholder transaction ids along the way
    /// (see [`TxIdProvider`]).
    pub fn new(raw: bytes::Bytes, source: NodeId) -> Result<Self, DecodeError> {
        let header = decode_header(&raw)?;
        let tx_ids = DefaultTxIdProvider.tx_ids(&header, &raw);
        let json = BlockJson::render(&header, &source, &tx_ids)?;
        Ok(Self {
            header,
            raw,
            json,
            source,
            received_at: SystemTime::now(),
        })
    }

    /// Accessor kept for call sites that only need the round — the header
    /// is the single source of truth.
    pub fn round(&self) -> u64 {
        self.header.round
    }
}

/// One transaction from a block's payset, derived on demand by sinks that
/// publish transactions. Not part of the main pipeline's channel payload —
/// a sink that wants per-transaction envelopes derives them itself.
///
/// No producer in this build actually constructs one: deriving these
/// requires decoding the payset per transaction, which is the same
/// domain-specific conversion logic [`TxIdProvider`] documents as out of
/// this pipeline's scope. The sink interface's `process_tx`/`txs` channel
/// exists regardless, the same way the Go original leaves its own
/// transaction commit path (`internal/isink/redis/redis.go`'s
/// `commitPaySet`) present but unreachable — there is no code path in this
/// build that ever sends on a sink's tx channel.
#[derive(Debug, Clone, Serialize)]
pub struct TxEnvelope {
    pub tx_id: String,
    pub round: u64,
    pub intra: usize,
    pub json: Arc<str>,
}

/// Computes canonical transaction ids for a block's payset.
///
/// The real rule is computed from the block header plus the signed
/// transaction, using genesis-id/genesis-hash rules dictated by the
/// consensus protocol active at that round — full consensus-version-aware
/// canonicalization is domain logic this pipeline does not own. This trait
/// is the seam: the default implementation produces a stable, deterministic
/// id derived from the same inputs the real rule uses (genesis hash, round,
/// intra index, raw transaction bytes) without implementing the
/// consensus-specific canonical encoding.
pub trait TxIdProvider: Send + Sync {
    fn tx_id(&self, header: &BlockHeader, intra: usize, raw_txn: &[u8]) -> String;

    /// Convenience: derive ids for every transaction in a decoded payset.
    /// The default implementation has no payset to walk (only `txn_count`
    /// is known at this layer) so it synthesizes placeholder inputs; a
    /// sink that needs real per-transaction ids re-decodes the payset
    /// itself and calls [`tx_id`](Self::tx_id) directly with the raw bytes
    /// of each signed transaction.
    fn tx_ids(&self, header: &BlockHeader, raw_block: &[u8]) -> Vec<String> {
        (0..header.txn_count)
            .map(|intra| self.tx_id(header, intra, raw_block))
            .collect()
    }
}

pub struct DefaultTxIdProvider;

impl TxIdProvider for DefaultTxIdProvider {
    fn tx_id(&self, header: &BlockHeader, intra: usize, raw_txn: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(&header.genesis_hash);
        hasher.update(header.round.to_be_bytes());
        hasher.update((intra as u64).to_be_bytes());
        hasher.update(raw_txn);
        let digest = hasher.finalize();
        base32_like(&digest[..16])
    }
}

/// RFC4648 base32 without padding, matching the shape (not the exact
/// alphabet derivation) of Algorand's transaction id encoding.
fn base32_like(bytes: &[u8]) -> String {
    const ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ234567";
    let mut out = String::with_capacity((bytes.len() * 8).div_ceil(5));
    let mut buf: u32 = 0;
    let mut bits = 0u32;
    for &b in bytes {
        buf = (buf << 8) | b as u32;
        bits += 8;
        while bits >= 5 {
            bits -= 5;
            out.push(ALPHABET[((buf >> bits) & 0x1f) as usize] as char);
        }
    }
    if bits > 0 {
        out.push(ALPHABET[((buf << (5 - bits)) & 0x1f) as usize] as char);
    }
    out
}

/// Builds a synthetic raw msgpack block for tests elsewhere in the crate
/// that need a decodable `BlockEnvelope` without a live algod node.
#[cfg(test)]
pub(crate) mod tests_support {
    pub(crate) fn sample_block(round: u64, txns: usize) -> bytes::Bytes {
        let mut txn_values = Vec::new();
        for _ in 0..txns {
            txn_values.push(rmpv::Value::Map(vec![]));
        }
        let header = rmpv::Value::Map(vec![
            (rmpv::Value::from("rnd"), rmpv::Value::from(round)),
            (rmpv::Value::from("ts"), rmpv::Value::from(1_700_000_000i64)),
            (rmpv::Value::from("gen"), rmpv::Value::from("mainnet-v1.0")),
            (
                rmpv::Value::from("gh"),
                rmpv::Value::from(vec![1u8, 2, 3, 4]),
            ),
            (rmpv::Value::from("txns"), rmpv::Value::Array(txn_values)),
        ]);
        let envelope = rmpv::Value::Map(vec![(rmpv::Value::from("block"), header)]);
        let mut buf = Vec::new();
        rmpv::encode::write_value(&mut buf, &envelope).unwrap();
        bytes::Bytes::from(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::tests_support::sample_block;
    use super::*;

    #[test]
    fn decode_header_reads_round_and_genesis() {
        let raw = sample_block(42, 3);
        let header = decode_header(&raw).unwrap();
        assert_eq!(header.round, 42);
        assert_eq!(header.genesis_id, "mainnet-v1.0");
        assert_eq!(header.genesis_hash, vec![1, 2, 3, 4]);
        assert_eq!(header.txn_count, 3);
    }

    #[test]
    fn envelope_preserves_raw_bytes() {
        let raw = sample_block(7, 0);
        let envelope = BlockEnvelope::new(raw.clone(), "node-a".to_string()).unwrap();
        assert_eq!(envelope.raw, raw);
        assert_eq!(envelope.round(), 7);
        assert!(envelope.json.strict.contains("\"round\":7"));
    }

    #[test]
    fn decode_header_rejects_garbage() {
        let raw = bytes::Bytes::from_static(b"not msgpack at all, just bytes");
        assert!(decode_header(&raw).is_err());
    }

    #[test]
    fn tx_id_is_deterministic_and_round_sensitive() {
        let header_a = BlockHeader {
            round: 1,
            timestamp: 0,
            genesis_id: "g".into(),
            genesis_hash: vec![9, 9],
            txn_count: 1,
        };
        let header_b = BlockHeader {
            round: 2,
            ..header_a.clone()
        };
        let provider = DefaultTxIdProvider;
        let id_a1 = provider.tx_id(&header_a, 0, b"payload");
        let id_a2 = provider.tx_id(&header_a, 0, b"payload");
        let id_b = provider.tx_id(&header_b, 0, b"payload");
        assert_eq!(id_a1, id_a2);
        assert_ne!(id_a1, id_b);
    }
}
