//! Spread Logger
//!
//! Appends spread and detection records to newline-delimited JSON files for
//! offline research. One JSON object per line, rotated daily.
//!
//! Record shapes:
//!   spread:    {timestamp, poolA, poolB, spotA, spotB, spreadBps}
//!   detection: {timestamp, direction, spreadBps, microInput, microProfit,
//!               profitable, poolASlot, poolBSlot[, optimalInput, optimalProfit]}
//!
//! `timestamp` is milliseconds since the Unix epoch. Raw amounts and slots are
//! written as decimal strings so no JSON reader rounds them through a double.
//!
//! File naming: spreads_YYYYMMDD.jsonl (auto-rotated at midnight UTC)

use chrono::{NaiveDate, Utc};
use serde::{Serialize, Serializer};
use std::fmt::Display;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::types::PoolAddress;

/// Spot-price spread between the pool that just updated (A) and a peer (B)
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpreadRecord {
    pub timestamp: i64,
    pub pool_a: PoolAddress,
    pub pool_b: PoolAddress,
    pub spot_a: f64,
    pub spot_b: f64,
    /// (spotA - spotB) / spotB * 10_000
    pub spread_bps: f64,
}

/// Which way the round trip runs relative to (A, B)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Direction {
    /// Buy on A, sell on B
    #[serde(rename = "A_TO_B")]
    AToB,
    /// Buy on B, sell on A
    #[serde(rename = "B_TO_A")]
    BToA,
}

/// Outcome of one probe round trip, with sizing when the optimizer ran
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectionRecord {
    pub timestamp: i64,
    pub direction: Direction,
    pub spread_bps: f64,
    #[serde(serialize_with = "as_string")]
    pub micro_input: u128,
    #[serde(serialize_with = "as_string")]
    pub micro_profit: i128,
    pub profitable: bool,
    #[serde(rename = "poolASlot", serialize_with = "as_string")]
    pub pool_a_slot: u64,
    #[serde(rename = "poolBSlot", serialize_with = "as_string")]
    pub pool_b_slot: u64,
    #[serde(skip_serializing_if = "Option::is_none", serialize_with = "opt_as_string")]
    pub optimal_input: Option<u128>,
    #[serde(skip_serializing_if = "Option::is_none", serialize_with = "opt_as_string")]
    pub optimal_profit: Option<i128>,
}

fn as_string<T: Display, S: Serializer>(value: &T, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(value)
}

fn opt_as_string<T: Display, S: Serializer>(value: &Option<T>, serializer: S) -> Result<S::Ok, S::Error> {
    match value {
        Some(v) => serializer.collect_str(v),
        None => serializer.serialize_none(),
    }
}

/// Appends spread/detection records to daily NDJSON files
pub struct SpreadLogger {
    log_dir: PathBuf,
    current_date: Option<NaiveDate>,
    file: Option<File>,
}

impl SpreadLogger {
    /// Create a new SpreadLogger. Creates the log directory if it doesn't exist.
    pub fn new(log_dir: impl AsRef<Path>) -> Self {
        let path = log_dir.as_ref().to_path_buf();
        if let Err(e) = fs::create_dir_all(&path) {
            warn!("Failed to create spread log directory {}: {}", path.display(), e);
        }
        info!("SpreadLogger initialized: {}", path.display());

        Self {
            log_dir: path,
            current_date: None,
            file: None,
        }
    }

    pub fn log_spread(&mut self, record: &SpreadRecord) {
        self.append(record);
    }

    pub fn log_detection(&mut self, record: &DetectionRecord) {
        self.append(record);
    }

    /// Path of today's file
    pub fn current_path(&self) -> PathBuf {
        self.log_dir.join(Self::file_name(Utc::now().date_naive()))
    }

    fn file_name(date: NaiveDate) -> String {
        format!("spreads_{}.jsonl", date.format("%Y%m%d"))
    }

    /// IO failures are logged and the record dropped; the pipeline never stops on them
    fn append<T: Serialize>(&mut self, record: &T) {
        let today = Utc::now().date_naive();
        if self.current_date != Some(today) {
            self.rotate_file(today);
        }

        let file = match self.file.as_mut() {
            Some(f) => f,
            None => {
                debug!("SpreadLogger: no open file, skipping");
                return;
            }
        };

        let mut line = match serde_json::to_string(record) {
            Ok(l) => l,
            Err(e) => {
                warn!("SpreadLogger: failed to serialize record: {}", e);
                return;
            }
        };
        line.push('\n');

        if let Err(e) = file.write_all(line.as_bytes()) {
            warn!("SpreadLogger write error: {}", e);
            return;
        }
        if let Err(e) = file.flush() {
            debug!("SpreadLogger flush error: {}", e);
        }
    }

    fn rotate_file(&mut self, date: NaiveDate) {
        self.file = None;
        self.current_date = None;

        let filename = Self::file_name(date);
        let filepath = self.log_dir.join(&filename);

        match OpenOptions::new().create(true).append(true).open(&filepath) {
            Ok(f) => {
                info!("SpreadLogger: writing {}", filename);
                self.file = Some(f);
                self.current_date = Some(date);
            }
            Err(e) => {
                warn!("SpreadLogger: failed to open {}: {}", filename, e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detection(optimal: Option<(u128, i128)>) -> DetectionRecord {
        DetectionRecord {
            timestamp: 1_700_000_000_000,
            direction: Direction::AToB,
            spread_bps: -196.08,
            micro_input: 50_497_525,
            micro_profit: 689_000,
            profitable: true,
            pool_a_slot: 250_000_001,
            pool_b_slot: 250_000_000,
            optimal_input: optimal.map(|o| o.0),
            optimal_profit: optimal.map(|o| o.1),
        }
    }

    #[test]
    fn test_detection_record_wire_format() {
        let json: serde_json::Value = serde_json::to_value(detection(None)).unwrap();
        assert_eq!(json["direction"], "A_TO_B");
        assert_eq!(json["microInput"], "50497525");
        assert_eq!(json["microProfit"], "689000");
        assert_eq!(json["poolASlot"], "250000001");
        assert_eq!(json["poolBSlot"], "250000000");
        assert_eq!(json["profitable"], true);
        assert!(json.get("optimalInput").is_none());
    }

    #[test]
    fn test_wide_values_survive_as_strings() {
        let record = detection(Some((u128::MAX, i128::MIN)));
        let json: serde_json::Value = serde_json::to_value(record).unwrap();
        assert_eq!(json["optimalInput"], u128::MAX.to_string());
        assert_eq!(json["optimalProfit"], i128::MIN.to_string());
    }

    #[test]
    fn test_spread_record_field_names() {
        let record = SpreadRecord {
            timestamp: 1,
            pool_a: PoolAddress::new("A"),
            pool_b: PoolAddress::new("B"),
            spot_a: 0.1,
            spot_b: 0.102,
            spread_bps: -196.0,
        };
        let json: serde_json::Value = serde_json::to_value(record).unwrap();
        for key in ["timestamp", "poolA", "poolB", "spotA", "spotB", "spreadBps"] {
            assert!(json.get(key).is_some(), "missing {}", key);
        }
    }

    #[test]
    fn test_appends_one_line_per_record() {
        let dir = std::env::temp_dir().join(format!("spread_logger_test_{}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);

        let mut logger = SpreadLogger::new(&dir);
        logger.log_detection(&detection(None));
        logger.log_detection(&detection(Some((1_000, 5))));

        let contents = fs::read_to_string(logger.current_path()).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        for line in lines {
            serde_json::from_str::<serde_json::Value>(line).unwrap();
        }

        let _ = fs::remove_dir_all(&dir);
    }
}
