use crate::error::{Result, RuntimeError};
use crate::traits::LoadSampler;
use dethrottler_core::LoadAverages;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Reads load averages from a `/proc/loadavg`-formatted file
#[derive(Debug, Clone)]
pub struct ProcLoadSampler {
    path: PathBuf,
    cpu_count: u32,
}

impl ProcLoadSampler {
    /// Create a sampler for `path`, detecting the CPU count once
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            cpu_count: detect_cpu_count(),
        }
    }

    #[cfg(test)]
    fn with_cpu_count(path: impl Into<PathBuf>, cpu_count: u32) -> Self {
        Self {
            path: path.into(),
            cpu_count,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl LoadSampler for ProcLoadSampler {
    fn sample(&self) -> Result<LoadAverages> {
        let content = std::fs::read_to_string(&self.path).map_err(|e| {
            RuntimeError::load_source_unreadable(self.path.display().to_string(), e.to_string())
        })?;
        parse_loadavg(&content)
    }

    fn cpu_count(&self) -> u32 {
        self.cpu_count
    }
}

/// Detect the number of logical CPUs.
///
/// Uses the `sys_info` crate, falling back to `available_parallelism` and
/// finally to 1 so the controller can still run.
pub fn detect_cpu_count() -> u32 {
    match sys_info::cpu_num() {
        Ok(n) if n > 0 => n,
        Ok(_) | Err(_) => {
            let fallback = std::thread::available_parallelism()
                .map(|n| n.get() as u32)
                .unwrap_or(1);
            warn!(
                cpu_count = fallback,
                "Failed to detect CPU count via sys_info, using available_parallelism"
            );
            fallback
        }
    }
}

/// Parse the first three fields of `/proc/loadavg` content.
///
/// Anything after the third field (running/total tasks, last PID) is ignored.
pub fn parse_loadavg(content: &str) -> Result<LoadAverages> {
    let fields: Vec<&str> = content.split_whitespace().collect();
    if fields.len() < 3 {
        return Err(RuntimeError::load_parse_failed(format!(
            "expected at least 3 fields, got {}",
            fields.len()
        )));
    }

    let parse = |label: &str, raw: &str| -> Result<f64> {
        let value: f64 = raw.parse().map_err(|e| {
            RuntimeError::load_parse_failed(format!(
                "failed to parse {} load average '{}': {}",
                label, raw, e
            ))
        })?;
        if !value.is_finite() || value < 0.0 {
            return Err(RuntimeError::load_parse_failed(format!(
                "{} load average '{}' is not a non-negative number",
                label, raw
            )));
        }
        Ok(value)
    };

    Ok(LoadAverages {
        load1m: parse("1m", fields[0])?,
        load5m: parse("5m", fields[1])?,
        load15m: parse("15m", fields[2])?,
    })
}

/// Divide each load average by the CPU count.
///
/// A CPU count of zero cannot happen in practice; the raw values are returned
/// unchanged rather than dividing by zero.
pub fn normalize(sample: &LoadAverages, cpu_count: u32) -> LoadAverages {
    if cpu_count == 0 {
        return *sample;
    }
    let cores = f64::from(cpu_count);
    LoadAverages {
        load1m: sample.load1m / cores,
        load5m: sample.load5m / cores,
        load15m: sample.load15m / cores,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_detect_cpu_count() {
        assert!(detect_cpu_count() > 0, "should detect at least 1 CPU");
    }

    #[test]
    fn test_parse_proc_loadavg_line() {
        let load = parse_loadavg("0.52 0.58 0.59 1/467 12345\n").unwrap();
        assert_eq!(load, LoadAverages::new(0.52, 0.58, 0.59));
    }

    #[test]
    fn test_parse_exactly_three_fields() {
        let load = parse_loadavg("1 2.5 3").unwrap();
        assert_eq!(load, LoadAverages::new(1.0, 2.5, 3.0));
    }

    #[test]
    fn test_parse_too_few_fields() {
        let err = parse_loadavg("0.52 0.58").unwrap_err();
        assert!(matches!(err, RuntimeError::LoadParseFailed { .. }));
        assert!(err.to_string().contains("got 2"));

        assert!(parse_loadavg("").is_err());
    }

    #[test]
    fn test_parse_non_numeric_field() {
        let err = parse_loadavg("0.52 abc 0.59 1/467 12345").unwrap_err();
        assert!(matches!(err, RuntimeError::LoadParseFailed { .. }));
        assert!(err.to_string().contains("5m"));
    }

    #[test]
    fn test_parse_rejects_negative_and_nan() {
        assert!(parse_loadavg("-1.0 0.5 0.5").is_err());
        assert!(parse_loadavg("NaN 0.5 0.5").is_err());
        assert!(parse_loadavg("0.5 0.5 inf").is_err());
    }

    #[test]
    fn test_normalize_divides_by_cores() {
        let raw = LoadAverages::new(9.0, 4.0, 2.0);
        let normalized = normalize(&raw, 4);
        assert_eq!(normalized, LoadAverages::new(2.25, 1.0, 0.5));
    }

    #[test]
    fn test_normalize_single_core_is_identity() {
        let raw = LoadAverages::new(0.3, 0.7, 1.1);
        assert_eq!(normalize(&raw, 1), raw);
    }

    #[test]
    fn test_normalize_zero_cores_passes_through() {
        let raw = LoadAverages::new(9.0, 4.0, 2.0);
        assert_eq!(normalize(&raw, 0), raw);
    }

    #[test]
    fn test_proc_sampler_reads_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "3.00 2.00 1.00 2/300 999").unwrap();

        let sampler = ProcLoadSampler::with_cpu_count(file.path(), 2);
        assert_eq!(sampler.cpu_count(), 2);
        assert_eq!(sampler.sample().unwrap(), LoadAverages::new(3.0, 2.0, 1.0));
    }

    #[test]
    fn test_proc_sampler_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let sampler = ProcLoadSampler::with_cpu_count(dir.path().join("loadavg"), 1);
        let err = sampler.sample().unwrap_err();
        assert!(matches!(err, RuntimeError::LoadSourceUnreadable { .. }));
    }
}
