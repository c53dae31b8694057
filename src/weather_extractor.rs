use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use indicatif::{ProgressBar, ProgressStyle};
use reqwest::blocking::Client;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::PathBuf;

const ARCHIVE_URL: &str = "https://archive-api.open-meteo.com/v1/archive";
const HOURLY_VARIABLES: &str = "temperature_2m,wind_speed_100m,shortwave_radiation";
const GRID_STEP_DEG: f64 = 2.0;

/// Lat/lon box the grid is laid over. Upper bounds are exclusive.
#[derive(Debug, Clone, Copy)]
pub struct BoundingBox {
    pub lat_min: f64,
    pub lat_max: f64,
    pub lon_min: f64,
    pub lon_max: f64,
}

#[derive(Debug, Deserialize)]
struct ArchiveResponse {
    hourly: HourlyBlock,
}

/// Parallel arrays as returned by the archive endpoint. Variables can carry
/// nulls for hours the station model has no value for.
#[derive(Debug, Deserialize)]
struct HourlyBlock {
    time: Vec<String>,
    temperature_2m: Vec<Option<f64>>,
    wind_speed_100m: Vec<Option<f64>>,
    shortwave_radiation: Vec<Option<f64>>,
}

/// Per-timestamp running sums, one slot per hourly variable
/// (temperature, wind speed, radiation).
#[derive(Debug, Default, Clone)]
struct VariableSums {
    sum: [f64; 3],
    count: [u32; 3],
}

impl VariableSums {
    fn add(&mut self, slot: usize, value: Option<f64>) {
        if let Some(v) = value {
            self.sum[slot] += v;
            self.count[slot] += 1;
        }
    }

    fn mean(&self, slot: usize) -> Option<f64> {
        if self.count[slot] > 0 {
            Some(self.sum[slot] / self.count[slot] as f64)
        } else {
            None
        }
    }
}

pub struct WeatherExtractor {
    bbox: BoundingBox,
    start_date: String,
    end_date: String,
    output_dir: PathBuf,
    client: Client,
}

impl WeatherExtractor {
    pub fn new(
        bbox: BoundingBox,
        start_date: &str,
        end_date: &str,
        output_dir: PathBuf,
    ) -> Result<Self> {
        std::fs::create_dir_all(&output_dir)?;

        Ok(Self {
            bbox,
            start_date: start_date.to_string(),
            end_date: end_date.to_string(),
            output_dir,
            client: Client::new(),
        })
    }

    pub fn run(&self) -> Result<()> {
        println!("\n🌦️  Extracting Area-Averaged Weather Data");
        println!("{}", "=".repeat(60));

        let grid_points = build_grid_points(&self.bbox, GRID_STEP_DEG);
        println!(
            "Grid: {} points over lat {}..{} lon {}..{}, {} to {}",
            grid_points.len(),
            self.bbox.lat_min,
            self.bbox.lat_max,
            self.bbox.lon_min,
            self.bbox.lon_max,
            self.start_date,
            self.end_date
        );

        let pb = ProgressBar::new(grid_points.len() as u64);
        pb.set_style(ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})")
            .unwrap());

        let mut sums: BTreeMap<String, VariableSums> = BTreeMap::new();
        let mut fetched = 0usize;

        for (lat, lon) in &grid_points {
            match self.fetch_point_data(*lat, *lon) {
                Ok(block) => {
                    accumulate_hourly(&mut sums, &block)?;
                    fetched += 1;
                }
                Err(e) => {
                    println!("  ⚠️  Failed at {},{}: {}", lat, lon, e);
                }
            }
            pb.inc(1);
        }
        pb.finish_with_message("Grid points fetched");

        if fetched == 0 {
            anyhow::bail!(
                "all {} grid point fetches failed, nothing to average",
                grid_points.len()
            );
        }
        println!("  📊 Averaging across {} grid points", fetched);

        let output_path = self.output_dir.join("weather_avg_data.csv");
        write_average_csv(&sums, &output_path)?;

        println!("  💾 CSV saved to {}", output_path.display());
        Ok(())
    }

    fn fetch_point_data(&self, lat: f64, lon: f64) -> Result<HourlyBlock> {
        let response: ArchiveResponse = self
            .client
            .get(ARCHIVE_URL)
            .query(&[
                ("latitude", lat.to_string()),
                ("longitude", lon.to_string()),
                ("start_date", self.start_date.clone()),
                ("end_date", self.end_date.clone()),
                ("hourly", HOURLY_VARIABLES.to_string()),
                ("timezone", "Europe/Berlin".to_string()),
            ])
            .send()?
            .error_for_status()?
            .json()?;

        Ok(response.hourly)
    }
}

/// Sample locations on a fixed step, exclusive upper bound on both axes.
pub fn build_grid_points(bbox: &BoundingBox, step: f64) -> Vec<(f64, f64)> {
    let mut points = Vec::new();

    let mut i = 0;
    loop {
        let lat = bbox.lat_min + step * i as f64;
        if lat >= bbox.lat_max {
            break;
        }
        let mut j = 0;
        loop {
            let lon = bbox.lon_min + step * j as f64;
            if lon >= bbox.lon_max {
                break;
            }
            points.push((lat, lon));
            j += 1;
        }
        i += 1;
    }

    points
}

fn accumulate_hourly(sums: &mut BTreeMap<String, VariableSums>, block: &HourlyBlock) -> Result<()> {
    for (i, time) in block.time.iter().enumerate() {
        let key = normalize_time(time)?;
        let entry = sums.entry(key).or_default();
        entry.add(0, block.temperature_2m.get(i).copied().flatten());
        entry.add(1, block.wind_speed_100m.get(i).copied().flatten());
        entry.add(2, block.shortwave_radiation.get(i).copied().flatten());
    }
    Ok(())
}

/// The archive endpoint returns local times like `2025-09-01T13:00`;
/// downstream CSVs all key on `%Y-%m-%d %H:%M:%S`.
fn normalize_time(raw: &str) -> Result<String> {
    let parsed = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M")
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S"))
        .with_context(|| format!("unparseable hourly time '{}'", raw))?;

    Ok(parsed.format("%Y-%m-%d %H:%M:%S").to_string())
}

fn write_average_csv(sums: &BTreeMap<String, VariableSums>, path: &std::path::Path) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record([
        "time_berlin",
        "temperature_2m_°C",
        "wind_speed_100m_km/h",
        "shortwave_radiation_W/m²",
    ])?;

    for (time, entry) in sums {
        writer.write_record([
            time.clone(),
            format_mean(entry.mean(0)),
            format_mean(entry.mean(1)),
            format_mean(entry.mean(2)),
        ])?;
    }
    writer.flush()?;

    Ok(())
}

fn format_mean(value: Option<f64>) -> String {
    match value {
        Some(v) => v.to_string(),
        None => String::new(),
    }
}

pub fn extract_weather_data() -> Result<()> {
    // Germany bounding box
    let bbox = BoundingBox {
        lat_min: 47.2,
        lat_max: 55.1,
        lon_min: 5.9,
        lon_max: 15.0,
    };

    let extractor = WeatherExtractor::new(
        bbox,
        "2025-09-01",
        "2025-09-22",
        PathBuf::from("weather_data"),
    )?;
    extractor.run()?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn germany() -> BoundingBox {
        BoundingBox {
            lat_min: 47.2,
            lat_max: 55.1,
            lon_min: 5.9,
            lon_max: 15.0,
        }
    }

    #[test]
    fn test_grid_point_count_matches_ceil_formula() {
        let bbox = germany();
        let points = build_grid_points(&bbox, 2.0);

        let lat_steps = ((bbox.lat_max - bbox.lat_min) / 2.0).ceil() as usize;
        let lon_steps = ((bbox.lon_max - bbox.lon_min) / 2.0).ceil() as usize;
        assert_eq!(lat_steps, 4);
        assert_eq!(lon_steps, 5);
        assert_eq!(points.len(), lat_steps * lon_steps);
    }

    #[test]
    fn test_grid_points_stay_inside_box() {
        let bbox = germany();
        for (lat, lon) in build_grid_points(&bbox, 2.0) {
            assert!(lat >= bbox.lat_min && lat < bbox.lat_max);
            assert!(lon >= bbox.lon_min && lon < bbox.lon_max);
        }
    }

    #[test]
    fn test_exact_multiple_box_excludes_upper_bound() {
        let bbox = BoundingBox {
            lat_min: 0.0,
            lat_max: 4.0,
            lon_min: 0.0,
            lon_max: 2.0,
        };
        let points = build_grid_points(&bbox, 2.0);
        assert_eq!(points, vec![(0.0, 0.0), (2.0, 0.0)]);
    }

    #[test]
    fn test_normalize_time() {
        assert_eq!(
            normalize_time("2025-09-01T13:00").unwrap(),
            "2025-09-01 13:00:00"
        );
        assert!(normalize_time("not a time").is_err());
    }

    #[test]
    fn test_average_skips_missing_point_values() {
        let block_a = HourlyBlock {
            time: vec!["2025-09-01T00:00".to_string(), "2025-09-01T01:00".to_string()],
            temperature_2m: vec![Some(10.0), Some(12.0)],
            wind_speed_100m: vec![Some(20.0), None],
            shortwave_radiation: vec![Some(0.0), Some(5.0)],
        };
        let block_b = HourlyBlock {
            time: vec!["2025-09-01T00:00".to_string(), "2025-09-01T01:00".to_string()],
            temperature_2m: vec![Some(14.0), Some(16.0)],
            wind_speed_100m: vec![Some(30.0), Some(40.0)],
            shortwave_radiation: vec![None, Some(15.0)],
        };

        let mut sums = BTreeMap::new();
        accumulate_hourly(&mut sums, &block_a).unwrap();
        accumulate_hourly(&mut sums, &block_b).unwrap();

        let first = &sums["2025-09-01 00:00:00"];
        assert_eq!(first.mean(0), Some(12.0));
        assert_eq!(first.mean(1), Some(25.0));
        assert_eq!(first.mean(2), Some(0.0));

        // the hour where one point reported no wind speed averages over
        // the remaining point only
        let second = &sums["2025-09-01 01:00:00"];
        assert_eq!(second.mean(1), Some(40.0));
        assert_eq!(second.mean(2), Some(10.0));
    }

    #[test]
    fn test_written_csv_is_deterministic() {
        let block = HourlyBlock {
            time: vec!["2025-09-01T01:00".to_string(), "2025-09-01T00:00".to_string()],
            temperature_2m: vec![Some(11.5), Some(10.0)],
            wind_speed_100m: vec![Some(22.0), Some(21.0)],
            shortwave_radiation: vec![Some(100.0), None],
        };

        let dir = tempfile::tempdir().unwrap();
        let mut contents = Vec::new();
        for name in ["a.csv", "b.csv"] {
            let mut sums = BTreeMap::new();
            accumulate_hourly(&mut sums, &block).unwrap();
            let path = dir.path().join(name);
            write_average_csv(&sums, &path).unwrap();
            contents.push(std::fs::read(&path).unwrap());
        }
        assert_eq!(contents[0], contents[1]);

        // rows come out time-sorted even though the input arrays were not
        let text = String::from_utf8(contents[0].clone()).unwrap();
        let rows: Vec<&str> = text.lines().collect();
        assert!(rows[1].starts_with("2025-09-01 00:00:00"));
        assert!(rows[2].starts_with("2025-09-01 01:00:00"));
    }
}
