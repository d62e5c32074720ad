//! 📝 What the CLI leaves behind: an NDJSON file with one record per chunk, and a
//! summary table on stdout for the human who has been staring at the bar.

use std::path::Path;

use anyhow::Context;
use comfy_table::{Cell, CellAlignment, Table, presets::UTF8_FULL};
use folio::{RequestOutcome, SessionStats};
use tokio::io::{AsyncWriteExt, BufWriter};

/// 💾 One JSON object per line, in chunk order. Overwrites whatever was there.
pub async fn write_ndjson(path: &Path, outcomes: &[RequestOutcome]) -> anyhow::Result<()> {
    let file = tokio::fs::File::create(path)
        .await
        .with_context(|| format!("💀 Could not create the results file '{}'", path.display()))?;
    let mut writer = BufWriter::new(file);
    for outcome in outcomes {
        let mut line = serde_json::to_vec(outcome).context("💀 An outcome refused to become JSON")?;
        line.push(b'\n');
        writer.write_all(&line).await.context("💀 Failed writing a results line")?;
    }
    writer.flush().await.context("💀 Failed flushing the results file")?;
    Ok(())
}

/// 📊 The end-of-run scoreboard, as a table.
pub fn summary_table(stats: &SessionStats) -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(vec!["📊 run summary", ""]);
    let rows = [
        ("total time", format!("{:.2}s", stats.total_elapsed.as_secs_f64())),
        ("requests", stats.chunk_count().to_string()),
        ("✅ successful", format!("{}/{}", stats.success_count, stats.chunk_count())),
        ("💀 failed", stats.failure_count.to_string()),
        ("pages", stats.item_count.to_string()),
        ("avg per request", format!("{:.2}s", stats.avg_per_chunk.as_secs_f64())),
        ("avg per page", format!("{:.2}s", stats.avg_per_item.as_secs_f64())),
    ];
    for (label, value) in rows {
        table.add_row(vec![Cell::new(label), Cell::new(value).set_alignment(CellAlignment::Right)]);
    }
    table
}

#[cfg(test)]
mod tests {
    use super::*;
    use folio::OutcomeStatus;
    use std::time::Duration;

    fn an_outcome(chunk_index: usize, ok: bool) -> RequestOutcome {
        RequestOutcome {
            chunk_index,
            item_ids: vec![format!("page_{}", chunk_index + 1)],
            item_count: 1,
            status: if ok {
                OutcomeStatus::Success { text: "hello".into() }
            } else {
                OutcomeStatus::Failure { error: "gave up".into() }
            },
            attempts: if ok { 1 } else { 3 },
            elapsed: Duration::from_millis(250),
        }
    }

    #[tokio::test]
    async fn the_one_where_every_chunk_gets_its_own_line() {
        let dir = tempfile::tempdir().expect("💀 tempdir");
        let path = dir.path().join("results.ndjson");

        write_ndjson(&path, &[an_outcome(0, true), an_outcome(1, false)])
            .await
            .expect("💀 write should work");

        let written = std::fs::read_to_string(&path).expect("💀 read back");
        let records: Vec<serde_json::Value> = written
            .lines()
            .map(|l| serde_json::from_str(l).expect("💀 every line is json"))
            .collect();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0]["status"], "success");
        assert_eq!(records[0]["text"], "hello");
        assert_eq!(records[1]["status"], "failure");
        assert_eq!(records[1]["attempts"], 3);
        assert_eq!(records[1]["elapsed_ms"], 250);
    }

    #[test]
    fn the_one_where_the_summary_says_what_happened() {
        let outcomes = [an_outcome(0, true), an_outcome(1, false)];
        let stats = SessionStats::from_outcomes(&outcomes, Duration::from_secs(4));

        let rendered = summary_table(&stats).to_string();

        assert!(rendered.contains("1/2"));
        assert!(rendered.contains("4.00s"));
        assert!(rendered.contains("2.00s"));
    }
}
