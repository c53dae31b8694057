use anyhow::{Context, Result};
use chrono::{DateTime, Datelike, Duration, NaiveTime, TimeZone, Utc};
use chrono_tz::Europe::Berlin;
use indicatif::{ProgressBar, ProgressStyle};
use reqwest::blocking::Client;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

const BASE_URL: &str = "https://www.smard.de/app/chart_data";
const REGION: &str = "DE";
const RESOLUTION: &str = "hour";

/// SMARD filter ids: wholesale market price and total grid demand.
const FILTER_PRICE: u32 = 4169;
const FILTER_DEMAND: u32 = 410;

const PRICE_COLUMN: &str = "price (MWh)";
const DEMAND_COLUMN: &str = "demand (MW)";

const DAY_MS: i64 = 24 * 60 * 60 * 1000;
const WEEK_MS: i64 = 7 * DAY_MS;
const MAX_DAYS_BACK: i64 = 14;

/// One `[timestamp_ms, value]` pair from the API. Hours not yet published
/// inside the current week come back as null.
type SeriesPoint = (i64, Option<f64>);

#[derive(Debug, Deserialize)]
struct ChartData {
    series: Vec<SeriesPoint>,
}

pub struct SmardExtractor {
    client: Client,
    output_dir: PathBuf,
}

impl SmardExtractor {
    pub fn new(output_dir: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&output_dir)?;

        Ok(Self {
            client: Client::new(),
            output_dir,
        })
    }

    pub fn run(&self, year: i32, month: u32, day: u32) -> Result<()> {
        println!("\n⚡ Extracting SMARD Price & Demand Data");
        println!("{}", "=".repeat(60));

        let start_ts = berlin_midnight_ms(year, month, day)?;
        let anchor = self.find_latest_dataset(start_ts)?;
        println!("  🔎 Anchor dataset timestamp: {}", anchor);

        let weeks = weekly_timestamps(anchor, Utc::now());
        println!("  📅 {} weekly bundles to fetch", weeks.len());

        let pb = ProgressBar::new(weeks.len() as u64);
        pb.set_style(ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})")
            .unwrap());

        for ts in weeks {
            let file_name = format!("data_{}.csv", berlin_day(ts)?.format("%Y_%m_%d"));
            let path = self.output_dir.join(&file_name);

            match (
                self.fetch_series(FILTER_PRICE, ts),
                self.fetch_series(FILTER_DEMAND, ts),
            ) {
                (Ok(prices), Ok(demands)) => {
                    write_week_csv(&path, &prices, &demands)?;
                    pb.println(format!("  💾 CSV saved to {}", path.display()));
                }
                (price_res, demand_res) => {
                    for (name, res) in [("price", &price_res), ("demand", &demand_res)] {
                        if let Err(e) = res {
                            pb.println(format!("  ⚠️  Skipping {}: {} fetch failed: {}", file_name, name, e));
                        }
                    }
                }
            }
            pb.inc(1);
        }
        pb.finish_with_message("Weekly bundles fetched");

        Ok(())
    }

    /// Weekly bundles are announced at specific timestamps; probe backward
    /// day by day until one resolves. A non-200 or transport error just
    /// means the bundle was not published that day.
    fn find_latest_dataset(&self, start_ts: i64) -> Result<i64> {
        for i in 0..MAX_DAYS_BACK {
            let candidate = start_ts - i * DAY_MS;
            let url = dataset_url(FILTER_DEMAND, candidate);

            if let Ok(response) = self.client.get(&url).send() {
                if response.status().is_success() {
                    return Ok(candidate);
                }
            }
        }

        anyhow::bail!(
            "no published SMARD dataset found within the last {} days",
            MAX_DAYS_BACK
        )
    }

    fn fetch_series(&self, filter: u32, timestamp_ms: i64) -> Result<Vec<SeriesPoint>> {
        let url = dataset_url(filter, timestamp_ms);
        let data: ChartData = self
            .client
            .get(&url)
            .send()?
            .error_for_status()?
            .json()?;

        Ok(data.series)
    }
}

fn dataset_url(filter: u32, timestamp_ms: i64) -> String {
    format!(
        "{}/{}/{}/{}_{}_{}_{}.json",
        BASE_URL, filter, REGION, filter, REGION, RESOLUTION, timestamp_ms
    )
}

/// Midnight of the given calendar day in Berlin, as epoch milliseconds.
pub fn berlin_midnight_ms(year: i32, month: u32, day: u32) -> Result<i64> {
    let local = Berlin
        .with_ymd_and_hms(year, month, day, 0, 0, 0)
        .single()
        .with_context(|| format!("invalid or ambiguous Berlin date {}-{}-{}", year, month, day))?;

    Ok(local.timestamp_millis())
}

fn berlin_day(timestamp_ms: i64) -> Result<chrono::NaiveDate> {
    let local = Berlin
        .timestamp_millis_opt(timestamp_ms)
        .single()
        .with_context(|| format!("timestamp {} out of range", timestamp_ms))?;

    Ok(local.date_naive())
}

/// Enumerate 7-day increments from the anchor up to the current week,
/// with "now" floored to this week's Monday 00:00 UTC.
pub fn weekly_timestamps(anchor_ms: i64, now: DateTime<Utc>) -> Vec<i64> {
    let today = now.date_naive();
    let monday = today - Duration::days(today.weekday().num_days_from_monday() as i64);
    let monday_ms = monday.and_time(NaiveTime::MIN).and_utc().timestamp_millis();

    let mut timestamps = Vec::new();
    let mut ts = anchor_ms;
    while ts <= monday_ms {
        timestamps.push(ts);
        ts += WEEK_MS;
    }

    timestamps
}

/// Group the two series by timestamp into one wide table and write it.
/// Rows are ordered by timestamp; a series missing a timestamp leaves
/// that cell empty.
fn write_week_csv(path: &Path, prices: &[SeriesPoint], demands: &[SeriesPoint]) -> Result<()> {
    let mut rows: BTreeMap<i64, (Option<f64>, Option<f64>)> = BTreeMap::new();
    for (ts, value) in prices {
        rows.entry(*ts).or_default().0 = *value;
    }
    for (ts, value) in demands {
        rows.entry(*ts).or_default().1 = *value;
    }

    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record(["timestamp", "datetime_berlin", PRICE_COLUMN, DEMAND_COLUMN])?;

    for (ts, (price, demand)) in &rows {
        let local = Berlin
            .timestamp_millis_opt(*ts)
            .single()
            .with_context(|| format!("timestamp {} out of range", ts))?;

        writer.write_record([
            ts.to_string(),
            local.format("%Y-%m-%d %H:%M:%S").to_string(),
            format_value(*price),
            format_value(*demand),
        ])?;
    }
    writer.flush()?;

    Ok(())
}

fn format_value(value: Option<f64>) -> String {
    match value {
        Some(v) => format!("{:.2}", v),
        None => String::new(),
    }
}

pub fn extract_smard_data() -> Result<()> {
    let extractor = SmardExtractor::new(PathBuf::from("smard_data"))?;
    extractor.run(2025, 9, 2)?;

    Ok(())
}
