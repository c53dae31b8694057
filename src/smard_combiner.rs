use anyhow::Result;
use glob::glob;
use polars::prelude::*;
use std::path::PathBuf;
use std::sync::Arc;

/// Stitches the per-week SMARD files into the single CSV the merger reads.
/// The weekly files carry `datetime_berlin`; the merged dataset joins on
/// `time_berlin`, so the column is renamed here.
pub struct SmardCombiner {
    input_dir: PathBuf,
    output_path: PathBuf,
}

impl SmardCombiner {
    pub fn new(input_dir: PathBuf, output_path: PathBuf) -> Self {
        Self {
            input_dir,
            output_path,
        }
    }

    pub fn run(&self) -> Result<()> {
        println!("\n🧵 Combining Weekly SMARD Files");
        println!("{}", "=".repeat(60));

        let pattern = self.input_dir.join("data_*.csv");
        let weekly_files: Vec<PathBuf> = glob(pattern.to_str().unwrap())?
            .filter_map(Result::ok)
            .collect();

        if weekly_files.is_empty() {
            anyhow::bail!("no weekly CSV files found in {}", self.input_dir.display());
        }
        println!("  📊 Found {} weekly files", weekly_files.len());

        // Value columns can be entirely empty in a fresh week; force them to
        // Float64 so inference cannot disagree between files.
        let schema = Arc::new(Schema::from_iter([
            Field::new("price (MWh)", DataType::Float64),
            Field::new("demand (MW)", DataType::Float64),
        ]));

        let mut frames = Vec::new();
        for file in &weekly_files {
            let df = CsvReader::new(std::fs::File::open(file)?)
                .has_header(true)
                .with_dtypes(Some(schema.clone()))
                .finish()?;
            frames.push(df.lazy());
        }

        let combined = concat(frames.as_slice(), UnionArgs::default())?
            .select([
                col("datetime_berlin").alias("time_berlin"),
                col("timestamp"),
                col("price (MWh)"),
                col("demand (MW)"),
            ])
            .collect()?;

        // Re-running the extractor rewrites the newest week; keep the last
        // occurrence of each timestamp.
        let unique = combined.unique(
            Some(&["timestamp".to_string()]),
            UniqueKeepStrategy::Last,
            None,
        )?;

        let mut sorted = unique.lazy().sort("timestamp", Default::default()).collect()?;

        CsvWriter::new(std::fs::File::create(&self.output_path)?).finish(&mut sorted)?;

        println!(
            "  💾 Combined {} records into {}",
            sorted.height(),
            self.output_path.display()
        );
        Ok(())
    }
}

pub fn combine_smard_data() -> Result<()> {
    let combiner = SmardCombiner::new(
        PathBuf::from("smard_data"),
        PathBuf::from("smard_data").join("combined_smard_data.csv"),
    );
    combiner.run()?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_file(path: &std::path::Path, contents: &str) {
        std::fs::write(path, contents).unwrap();
    }

    #[test]
    fn test_combine_renames_dedupes_and_sorts() {
        let dir = tempfile::tempdir().unwrap();
        write_file(
            &dir.path().join("data_2025_09_08.csv"),
            "timestamp,datetime_berlin,price (MWh),demand (MW)\n\
             3000,2025-09-08 02:00:00,30.00,300.00\n\
             2000,2025-09-08 01:00:00,99.00,999.00\n",
        );
        write_file(
            &dir.path().join("data_2025_09_01.csv"),
            "timestamp,datetime_berlin,price (MWh),demand (MW)\n\
             1000,2025-09-01 00:00:00,10.00,100.00\n\
             2000,2025-09-01 01:00:00,20.00,200.00\n",
        );

        let output = dir.path().join("combined_smard_data.csv");
        SmardCombiner::new(dir.path().to_path_buf(), output.clone())
            .run()
            .unwrap();

        let mut reader = csv::Reader::from_path(&output).unwrap();
        let headers = reader.headers().unwrap().clone();
        assert_eq!(
            headers.iter().collect::<Vec<_>>(),
            vec!["time_berlin", "timestamp", "price (MWh)", "demand (MW)"]
        );

        let rows: Vec<csv::StringRecord> = reader.records().map(|r| r.unwrap()).collect();
        assert_eq!(rows.len(), 3);
        let timestamps: Vec<i64> = rows.iter().map(|r| r[1].parse().unwrap()).collect();
        assert_eq!(timestamps, vec![1000, 2000, 3000]);

        // timestamp 2000 appears in both weeks; the later file wins
        assert_eq!(rows[1][2], *"99.0");
    }

    #[test]
    fn test_combine_keeps_empty_cells_as_nulls() {
        let dir = tempfile::tempdir().unwrap();
        write_file(
            &dir.path().join("data_2025_09_01.csv"),
            "timestamp,datetime_berlin,price (MWh),demand (MW)\n\
             1000,2025-09-01 00:00:00,10.00,\n\
             2000,2025-09-01 01:00:00,,200.00\n",
        );

        let output = dir.path().join("combined_smard_data.csv");
        SmardCombiner::new(dir.path().to_path_buf(), output.clone())
            .run()
            .unwrap();

        let df = CsvReader::new(std::fs::File::open(&output).unwrap())
            .has_header(true)
            .finish()
            .unwrap();
        assert_eq!(df.column("demand (MW)").unwrap().null_count(), 1);
        assert_eq!(df.column("price (MWh)").unwrap().null_count(), 1);
    }

    #[test]
    fn test_missing_folder_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = SmardCombiner::new(
            dir.path().join("nope"),
            dir.path().join("combined_smard_data.csv"),
        )
        .run();
        assert!(result.is_err());
    }
}
