// Statistics reporting for window cache simulation

use crate::models::{CsvResultRow, SimulationResult};
use std::path::Path;

/// Formats and exports the results of a simulation run
pub struct SimulationStats<'a> {
    result: &'a SimulationResult,
}

impl<'a> SimulationStats<'a> {
    pub fn from_result(result: &'a SimulationResult) -> Self {
        Self { result }
    }

    /// Build one CSV row per configuration
    pub fn rows(&self) -> Vec<CsvResultRow> {
        self.result
            .stats
            .iter()
            .map(|(setup, stats)| CsvResultRow {
                setup: setup.as_str().to_string(),
                pattern: self.result.pattern.as_str().to_string(),
                requests: stats.requests,
                hits: stats.hits,
                hit_rate: stats.hit_rate(),
                upstream_fetches: stats.upstream_fetches,
                rows_evicted: stats.rows_evicted,
                segments_purged: stats.segments_purged,
                prefetches: stats.prefetches,
                coalesced_waits: stats.coalesced_waits,
                elapsed_ms: stats.elapsed.as_secs_f64() * 1_000.0,
            })
            .collect()
    }

    /// Print a summary report of the simulation results
    pub fn print_summary(&self) {
        println!("\nWindow Cache Simulation Summary");
        println!("===============================");
        println!("Pattern: {}", self.result.pattern);

        println!(
            "\n{:<14} {:>9} {:>9} {:>8} {:>10} {:>10} {:>10} {:>10} {:>10}",
            "Setup",
            "Requests",
            "Hits",
            "HitRate",
            "Upstream",
            "Evicted",
            "Prefetch",
            "Elapsed",
            "Avg/req"
        );
        println!("{}", "-".repeat(98));

        for (setup, stats) in &self.result.stats {
            println!(
                "{:<14} {:>9} {:>9} {:>7.2}% {:>10} {:>10} {:>10} {:>9.3}s {:>8.1}us",
                setup.as_str(),
                stats.requests,
                stats.hits,
                stats.hit_rate(),
                stats.upstream_fetches,
                stats.rows_evicted,
                stats.prefetches,
                stats.elapsed.as_secs_f64(),
                stats.avg_request_us()
            );
        }
    }

    /// Export results to a CSV file
    pub fn export_csv(&self, path: &Path) -> Result<(), csv::Error> {
        let mut writer = csv::Writer::from_path(path)?;
        for row in self.rows() {
            writer.serialize(row)?;
        }
        writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CacheSetup, Pattern, SetupStats};
    use std::time::Duration;

    #[test]
    fn test_rows_follow_setup_order() {
        let result = SimulationResult {
            pattern: Pattern::Up,
            stats: vec![
                (
                    CacheSetup::Never,
                    SetupStats {
                        requests: 4,
                        hits: 1,
                        ..SetupStats::default()
                    },
                ),
                (
                    CacheSetup::LruPrefetch,
                    SetupStats {
                        requests: 4,
                        hits: 3,
                        prefetches: 2,
                        elapsed: Duration::from_millis(5),
                        ..SetupStats::default()
                    },
                ),
            ],
            duration: Duration::from_millis(10),
        };
        let rows = SimulationStats::from_result(&result).rows();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].setup, "never");
        assert_eq!(rows[0].hit_rate, 25.0);
        assert_eq!(rows[1].setup, "lru+prefetch");
        assert_eq!(rows[1].pattern, "up");
        assert_eq!(rows[1].prefetches, 2);
        assert_eq!(rows[1].elapsed_ms, 5.0);
    }
}
