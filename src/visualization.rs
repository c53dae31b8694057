use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use plotters::prelude::*;
use polars::prelude::*;
use std::path::PathBuf;

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

const PANELS: [(&str, RGBColor); 5] = [
    ("price (MWh)", BLUE),
    ("demand (MW)", RED),
    ("temperature_2m_°C", GREEN),
    ("wind_speed_100m_km/h", MAGENTA),
    ("shortwave_radiation_W/m²", BLACK),
];

/// Renders the merged dataset as stacked time-series panels, one per value
/// column. Read-only consumer of the merged-CSV contract.
pub struct MergedPlotter {
    input_file: PathBuf,
    output_dir: PathBuf,
}

impl MergedPlotter {
    pub fn new(input_file: PathBuf, output_dir: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&output_dir)?;

        Ok(Self {
            input_file,
            output_dir,
        })
    }

    pub fn run(&self) -> Result<()> {
        println!("\n📊 Plotting Merged Dataset");
        println!("{}", "=".repeat(60));

        if !self.input_file.exists() {
            anyhow::bail!("no merged CSV found at {}", self.input_file.display());
        }

        let df = CsvReader::new(std::fs::File::open(&self.input_file)?)
            .has_header(true)
            .finish()?;
        if df.height() == 0 {
            anyhow::bail!("{} has no rows to plot", self.input_file.display());
        }
        println!("  📈 Loaded {} merged records", df.height());

        let times = parse_times(&df)?;
        let output_path = self.output_dir.join("merged_overview.png");

        let root = BitMapBackend::new(&output_path, (1200, 1500)).into_drawing_area();
        root.fill(&WHITE)?;
        let areas = root.split_evenly((PANELS.len(), 1));

        for ((column, color), area) in PANELS.iter().zip(areas.iter()) {
            let values = df.column(column)?.f64()?;
            let series: Vec<(NaiveDateTime, f64)> = times
                .iter()
                .zip(values.into_iter())
                .filter_map(|(t, v)| v.map(|v| (*t, v)))
                .collect();

            if series.is_empty() {
                continue;
            }

            let min_t = series.first().unwrap().0;
            let max_t = series.last().unwrap().0;
            let min_v = series.iter().map(|(_, v)| *v).fold(f64::INFINITY, f64::min);
            let max_v = series.iter().map(|(_, v)| *v).fold(f64::NEG_INFINITY, f64::max);
            let pad = ((max_v - min_v) * 0.05).max(1.0);

            let mut chart = ChartBuilder::on(area)
                .caption(*column, ("sans-serif", 22).into_font())
                .margin(10)
                .x_label_area_size(35)
                .y_label_area_size(70)
                .build_cartesian_2d(
                    Into::<RangedDateTime<_>>::into(min_t..max_t),
                    (min_v - pad)..(max_v + pad),
                )?;

            chart
                .configure_mesh()
                .x_labels(8)
                .x_label_formatter(&|t| t.format("%m-%d %H:%M").to_string())
                .draw()?;

            chart.draw_series(LineSeries::new(series.iter().cloned(), color))?;
        }

        root.present()?;
        println!("  💾 Chart saved to {}", output_path.display());
        Ok(())
    }
}

fn parse_times(df: &DataFrame) -> Result<Vec<NaiveDateTime>> {
    let raw = df.column("time_berlin")?.utf8()?;
    let mut times = Vec::with_capacity(df.height());
    for i in 0..raw.len() {
        let s = raw
            .get(i)
            .with_context(|| format!("null time_berlin at row {}", i))?;
        times.push(
            NaiveDateTime::parse_from_str(s, TIME_FORMAT)
                .with_context(|| format!("unparseable time_berlin '{}'", s))?,
        );
    }

    Ok(times)
}

pub fn plot_merged_data() -> Result<()> {
    let plotter = MergedPlotter::new(PathBuf::from("merged.csv"), PathBuf::from("charts"))?;
    plotter.run()?;

    Ok(())
}
