//! Progress lines, result tables and metric sinks.
//!
//! Reporting never feeds back into the accumulated statistics. Sinks are
//! injected into [`crate::trainer::Trainer`] and live for one run.

use serde_json::{Map, Value};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::info;

use crate::error::{TrainError, TrainResult};
use crate::meter::RunningStat;

// ---------------------------------------------------------------------------
// Phase
// ---------------------------------------------------------------------------

/// Which loop produced a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Training epoch.
    Train,
    /// Validation pass.
    Valid,
}

impl Phase {
    /// Prefix used in scalar names (`train/…`, `val/…`).
    pub fn prefix(self) -> &'static str {
        match self {
            Phase::Train => "train",
            Phase::Valid => "val",
        }
    }

    /// Prefix of the per-report series (`train_loss`, `valid_acc_…`).
    pub fn series(self) -> &'static str {
        match self {
            Phase::Train => "train",
            Phase::Valid => "valid",
        }
    }
}

// ---------------------------------------------------------------------------
// Sinks
// ---------------------------------------------------------------------------

/// Receives named scalars for dashboards or log files.
pub trait MetricsSink {
    /// Record one set of scalars at global step `step`.
    fn record(&mut self, phase: Phase, step: u64, scalars: &[(String, f64)]) -> TrainResult<()>;

    /// Flush buffered records.
    fn flush(&mut self) -> TrainResult<()> {
        Ok(())
    }
}

/// Discards every record.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl MetricsSink for NullSink {
    fn record(&mut self, _phase: Phase, _step: u64, _scalars: &[(String, f64)]) -> TrainResult<()> {
        Ok(())
    }
}

/// Logs every record through `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl MetricsSink for TracingSink {
    fn record(&mut self, phase: Phase, step: u64, scalars: &[(String, f64)]) -> TrainResult<()> {
        for (name, value) in scalars {
            info!(phase = phase.prefix(), step, "{name} = {value:.5}");
        }
        Ok(())
    }
}

/// Keeps records in memory.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    /// Every record received, in order.
    pub records: Vec<(Phase, u64, Vec<(String, f64)>)>,
}

impl MemorySink {
    /// Latest value of `name` across all records.
    pub fn last(&self, name: &str) -> Option<f64> {
        self.records
            .iter()
            .rev()
            .flat_map(|(_, _, s)| s.iter())
            .find(|(n, _)| n == name)
            .map(|(_, v)| *v)
    }
}

impl MetricsSink for MemorySink {
    fn record(&mut self, phase: Phase, step: u64, scalars: &[(String, f64)]) -> TrainResult<()> {
        self.records.push((phase, step, scalars.to_vec()));
        Ok(())
    }
}

/// Appends one JSON object per record to a file:
///
/// ```text
/// {"phase":"train","step":3,"scalars":{"train/loss_avg":0.0012,"speed":412.5}}
/// ```
pub struct JsonLinesSink {
    path: PathBuf,
    writer: BufWriter<File>,
}

impl JsonLinesSink {
    /// Open (or create) `path` for appending, creating parent directories.
    pub fn create(path: &Path) -> TrainResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| TrainError::sink(format!("{}: {e}", parent.display())))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| TrainError::sink(format!("{}: {e}", path.display())))?;
        Ok(JsonLinesSink { path: path.to_path_buf(), writer: BufWriter::new(file) })
    }

    /// File the records are written to.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl MetricsSink for JsonLinesSink {
    fn record(&mut self, phase: Phase, step: u64, scalars: &[(String, f64)]) -> TrainResult<()> {
        let values: Map<String, Value> = scalars
            .iter()
            .map(|(n, v)| (n.clone(), Value::from(*v)))
            .collect();
        let mut record = Map::new();
        record.insert("phase".into(), Value::from(phase.prefix()));
        record.insert("step".into(), Value::from(step));
        record.insert("scalars".into(), Value::Object(values));

        serde_json::to_writer(&mut self.writer, &record)?;
        writeln!(self.writer).map_err(|e| TrainError::sink(format!("{}: {e}", self.path.display())))
    }

    fn flush(&mut self) -> TrainResult<()> {
        self.writer
            .flush()
            .map_err(|e| TrainError::sink(format!("{}: {e}", self.path.display())))
    }
}

// ---------------------------------------------------------------------------
// Progress lines
// ---------------------------------------------------------------------------

/// Running accuracy of one scoring group.
#[derive(Debug, Clone)]
pub struct GroupMeter {
    /// Name used in recorded scalars.
    pub name: String,
    /// Label shown in progress lines.
    pub label: String,
    /// Accuracy weighted by valid joint count.
    pub stat: RunningStat,
}

impl GroupMeter {
    /// Fresh meter for one group.
    pub fn new(name: impl Into<String>, label: impl Into<String>) -> Self {
        GroupMeter { name: name.into(), label: label.into(), stat: RunningStat::new() }
    }
}

fn accuracy_fields(groups: &[GroupMeter]) -> String {
    groups
        .iter()
        .map(|g| format!("{} {:.3} ({:.3})", g.label, g.stat.val(), g.stat.avg()))
        .collect::<Vec<_>>()
        .join("\t")
}

/// Timing and loss meters of one loop.
#[derive(Debug, Clone, Copy)]
pub struct ProgressMeters<'a> {
    /// Wall time per batch.
    pub batch_time: &'a RunningStat,
    /// Time spent waiting for data.
    pub data_time: &'a RunningStat,
    /// Loss per sample.
    pub loss: &'a RunningStat,
}

/// Progress line of a training batch.
pub fn train_progress(
    epoch: usize,
    batch: usize,
    num_batches: usize,
    speed: f64,
    meters: ProgressMeters<'_>,
    groups: &[GroupMeter],
) -> String {
    format!(
        "Epoch: [{epoch}][{batch}/{num_batches}]\tTime {:.3}s ({:.3}s)\tSpeed {speed:.1} samples/s\t\
         Data {:.3}s ({:.3}s)\tLoss {:.5} ({:.5})\t{}",
        meters.batch_time.val(),
        meters.batch_time.avg(),
        meters.data_time.val(),
        meters.data_time.avg(),
        meters.loss.val(),
        meters.loss.avg(),
        accuracy_fields(groups),
    )
}

/// Progress line of a validation batch.
pub fn valid_progress(
    batch: usize,
    num_batches: usize,
    batch_time: &RunningStat,
    loss: &RunningStat,
    groups: &[GroupMeter],
) -> String {
    format!(
        "Test: [{batch}/{num_batches}]\tTime {:.3} ({:.3})\tLoss {:.4} ({:.4})\t{}",
        batch_time.val(),
        batch_time.avg(),
        loss.val(),
        loss.avg(),
        accuracy_fields(groups),
    )
}

/// Markdown table of final results, one header row and one value row.
///
/// Architecture names longer than 15 characters are shortened to their first
/// 8 characters followed by `...`.
pub fn name_value_table(name_values: &[(String, f64)], arch: &str) -> Vec<String> {
    let header = std::iter::once("| Arch".to_string())
        .chain(name_values.iter().map(|(n, _)| format!("| {n}")))
        .collect::<Vec<_>>()
        .join(" ");
    let rule = format!("{}|", "|---".repeat(name_values.len() + 1));

    let arch = if arch.chars().count() > 15 {
        format!("{}...", arch.chars().take(8).collect::<String>())
    } else {
        arch.to_string()
    };
    let values = name_values
        .iter()
        .map(|(_, v)| format!("| {v:.3}"))
        .collect::<Vec<_>>()
        .join(" ");

    vec![format!("{header} |"), rule, format!("| {arch} {values} |")]
}
