use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use polars::prelude::*;
use std::path::Path;

const TIME_COLUMN: &str = "time_berlin";
const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Outer-join the combined SMARD CSV and the weather CSV on `time_berlin`,
/// then drop every row with a missing value, so only timestamps with
/// complete data from both sources survive.
pub fn merge_csvs_on_time(
    smard_file: &Path,
    weather_file: &Path,
    output_file: &Path,
) -> Result<()> {
    println!("\n🔗 Merging SMARD and Weather Data");
    println!("{}", "=".repeat(60));

    if !smard_file.exists() {
        anyhow::bail!("no SMARD CSV found at {}", smard_file.display());
    }
    if !weather_file.exists() {
        anyhow::bail!("no weather CSV found at {}", weather_file.display());
    }

    let df_smard = with_time_key(read_csv(smard_file)?)
        .with_context(|| format!("bad time column in {}", smard_file.display()))?;
    let df_weather = with_time_key(read_csv(weather_file)?)
        .with_context(|| format!("bad time column in {}", weather_file.display()))?;

    // Both frames carry the same time strings; keep the SMARD copy as the
    // output column and join on the parsed key.
    let df_weather = df_weather.drop(TIME_COLUMN)?;

    let merged = df_smard
        .lazy()
        .join(
            df_weather.lazy(),
            [col("time_key")],
            [col("time_key")],
            JoinArgs::new(JoinType::Outer),
        )
        .sort("time_key", Default::default())
        .drop_nulls(None)
        .collect()?;

    let mut merged = merged.drop("time_key")?;

    CsvWriter::new(std::fs::File::create(output_file)?).finish(&mut merged)?;

    println!(
        "  💾 Merged {} and {} to {} ({} rows)",
        smard_file.display(),
        weather_file.display(),
        output_file.display(),
        merged.height()
    );
    Ok(())
}

fn read_csv(path: &Path) -> Result<DataFrame> {
    let df = CsvReader::new(std::fs::File::open(path)?)
        .has_header(true)
        .finish()?;

    Ok(df)
}

/// Parse the shared time column into an epoch-ms join key. Every value must
/// parse; a malformed or missing timestamp is a structural error.
fn with_time_key(mut df: DataFrame) -> Result<DataFrame> {
    let times = df
        .column(TIME_COLUMN)
        .with_context(|| format!("column '{}' missing", TIME_COLUMN))?
        .utf8()?;

    let mut keys = Vec::with_capacity(df.height());
    for i in 0..times.len() {
        let raw = times
            .get(i)
            .with_context(|| format!("null value in '{}' at row {}", TIME_COLUMN, i))?;
        let parsed = NaiveDateTime::parse_from_str(raw, TIME_FORMAT)
            .with_context(|| format!("unparseable datetime '{}' in '{}'", raw, TIME_COLUMN))?;
        keys.push(parsed.and_utc().timestamp_millis());
    }

    df.with_column(Series::new("time_key", keys))?;
    Ok(df)
}

pub fn merge_datasets() -> Result<()> {
    merge_csvs_on_time(
        Path::new("smard_data/combined_smard_data.csv"),
        Path::new("weather_data/weather_avg_data.csv"),
        Path::new("merged.csv"),
    )
}
