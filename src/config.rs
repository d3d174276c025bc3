//! Configuration schema and CLI surface.
//!
//! The pipeline itself only needs a resolved [`PipelineConfig`] — getting
//! there from a path on disk and a handful of flags is ambient plumbing,
//! ported from `internal/config/cfg.go`'s `SteramerConfig`/`SinksCfg` and
//! generalized to a registry-of-kinds model so new sink types don't need
//! new config struct fields.

use std::collections::BTreeMap;
use std::path::Path;

use clap::Parser;
use serde::{Deserialize, Serialize};

use crate::error::PipelineError;

/// Command-line surface layered on top of the config file.
#[derive(Debug, Parser)]
#[command(name = "algostream", about = "Stream finalized Algorand blocks to pluggable sinks")]
pub struct CliArgs {
    /// Configuration file (JSON, `//` and `/* */` comments tolerated).
    #[arg(short = 'f', long = "config", default_value = "config.jsonc")]
    pub config: String,

    /// First round to stream; -1 means "node tip". Unset means "defer to
    /// the config file's `algod.first`," not "-1" — -1 is a meaningful
    /// value an operator can pass explicitly, so it must stay
    /// distinguishable from "flag not given."
    #[arg(short = 'r', long = "first")]
    pub first: Option<i64>,

    /// Last round inclusive; -1 means unbounded. Same "unset defers to the
    /// config file" rule as `first`.
    #[arg(short = 'l', long = "last")]
    pub last: Option<i64>,

    /// Force-enable the stdout sink even if disabled in config.
    #[arg(short = 's', long = "simple")]
    pub simple: bool,

    /// Fail the pipeline instead of blocking when a sink's queue is full.
    #[arg(long = "no-block")]
    pub no_block: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeDef {
    pub address: String,
    #[serde(default)]
    pub token: String,
    pub id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlgodSection {
    pub nodes: Vec<NodeDef>,
    #[serde(default = "default_queue")]
    pub queue: i64,
    #[serde(default = "default_round")]
    pub first: i64,
    #[serde(default = "default_round")]
    pub last: i64,
}

fn default_queue() -> i64 {
    100
}

fn default_round() -> i64 {
    -1
}

/// One entry in the `sinks` map: `type` selects a registered factory, `cfg`
/// is passed verbatim to it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SinkDef {
    pub name: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub cfg: serde_json::Value,
}

fn default_enabled() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub algod: AlgodSection,
    #[serde(default)]
    pub sinks: BTreeMap<String, SinkDef>,
}

impl PipelineConfig {
    /// Load from a JSON(C) file, then apply CLI overrides — an explicitly
    /// passed `-r`/`-l` wins over whatever the file says, but a flag the
    /// operator didn't pass leaves the file's `algod.first`/`algod.last`
    /// alone rather than stomping it with a default. Queue depth below 1
    /// falls back to 100.
    pub fn load(path: &Path, cli: &CliArgs) -> Result<Self, PipelineError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| PipelineError::Config(format!("reading {}: {e}", path.display())))?;
        let stripped = strip_jsonc_comments(&text);
        let mut cfg: PipelineConfig = serde_json::from_str(&stripped)
            .map_err(|e| PipelineError::Config(format!("parsing {}: {e}", path.display())))?;

        if cfg.algod.nodes.is_empty() {
            return Err(PipelineError::Config(
                "algod.nodes must contain at least one node".to_string(),
            ));
        }
        if cfg.algod.queue < 1 {
            cfg.algod.queue = 100;
        }

        if let Some(first) = cli.first {
            cfg.algod.first = first;
        }
        if let Some(last) = cli.last {
            cfg.algod.last = last;
        }

        if cli.simple {
            cfg.sinks
                .entry("stdout".to_string())
                .and_modify(|s| s.enabled = true)
                .or_insert(SinkDef {
                    name: "stdout".to_string(),
                    enabled: true,
                    kind: "stdout".to_string(),
                    cfg: serde_json::Value::Null,
                });
        }

        Ok(cfg)
    }
}

/// Strips `//` line comments and `/* */` block comments outside of string
/// literals. Not a general JSONC grammar — just enough so a reference
/// config file can carry explanatory comments.
fn strip_jsonc_comments(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();
    let mut in_string = false;
    let mut escaped = false;

    while let Some(c) = chars.next() {
        if in_string {
            out.push(c);
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }

        match c {
            '"' => {
                in_string = true;
                out.push(c);
            }
            '/' if chars.peek() == Some(&'/') => {
                for c in chars.by_ref() {
                    if c == '\n' {
                        out.push('\n');
                        break;
                    }
                }
            }
            '/' if chars.peek() == Some(&'*') => {
                chars.next();
                let mut prev = '\0';
                for c in chars.by_ref() {
                    if prev == '*' && c == '/' {
                        break;
                    }
                    prev = c;
                }
            }
            _ => out.push(c),
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_line_and_block_comments() {
        let input = r#"{
            // a comment
            "a": 1, /* inline */ "b": "has // not a comment and /* not a block */ inside"
        }"#;
        let stripped = strip_jsonc_comments(input);
        let parsed: serde_json::Value = serde_json::from_str(&stripped).unwrap();
        assert_eq!(parsed["a"], 1);
        assert_eq!(
            parsed["b"],
            "has // not a comment and /* not a block */ inside"
        );
    }

    #[test]
    fn load_applies_cli_overrides_and_default_queue() {
        let dir = std::env::temp_dir().join(format!("algo-streamer-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.jsonc");
        std::fs::write(
            &path,
            r#"{
                "algod": { "nodes": [{"address": "http://localhost:8080", "id": "n1"}], "queue": 0 },
                "sinks": {}
            }"#,
        )
        .unwrap();

        let cli = CliArgs {
            config: path.to_string_lossy().to_string(),
            first: Some(500),
            last: Some(600),
            simple: true,
            no_block: false,
        };

        let cfg = PipelineConfig::load(&path, &cli).unwrap();
        assert_eq!(cfg.algod.queue, 100);
        assert_eq!(cfg.algod.first, 500);
        assert_eq!(cfg.algod.last, 600);
        assert!(cfg.sinks.contains_key("stdout"));

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn load_leaves_file_round_bounds_alone_when_cli_flags_are_unset() {
        let dir = std::env::temp_dir().join(format!("algo-streamer-test3-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.jsonc");
        std::fs::write(
            &path,
            r#"{
                "algod": {
                    "nodes": [{"address": "http://localhost:8080", "id": "n1"}],
                    "first": 995,
                    "last": 1000
                },
                "sinks": {}
            }"#,
        )
        .unwrap();

        let cli = CliArgs {
            config: path.to_string_lossy().to_string(),
            first: None,
            last: None,
            simple: false,
            no_block: false,
        };

        let cfg = PipelineConfig::load(&path, &cli).unwrap();
        assert_eq!(cfg.algod.first, 995);
        assert_eq!(cfg.algod.last, 1000);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn rejects_empty_node_list() {
        let dir = std::env::temp_dir().join(format!("algo-streamer-test2-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.jsonc");
        std::fs::write(&path, r#"{"algod": {"nodes": []}}"#).unwrap();

        let cli = CliArgs {
            config: path.to_string_lossy().to_string(),
            first: None,
            last: None,
            simple: false,
            no_block: false,
        };

        assert!(PipelineConfig::load(&path, &cli).is_err());
        std::fs::remove_dir_all(&dir).ok();
    }
}
