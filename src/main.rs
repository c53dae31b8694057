use anyhow::Result;

mod data_merger;
mod smard_combiner;
mod smard_extractor;
mod visualization;
mod weather_extractor;

fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();

    if args.len() > 1 && args[1] == "--weather" {
        // Fetch grid-averaged weather history
        weather_extractor::extract_weather_data()?;
    } else if args.len() > 1 && args[1] == "--smard" {
        // Fetch weekly SMARD price/demand bundles
        smard_extractor::extract_smard_data()?;
    } else if args.len() > 1 && args[1] == "--combine" {
        // Stitch weekly SMARD files into one CSV
        smard_combiner::combine_smard_data()?;
    } else if args.len() > 1 && args[1] == "--merge" {
        // Join market and weather data on time_berlin
        data_merger::merge_datasets()?;
    } else if args.len() > 1 && args[1] == "--plot" {
        // Render the merged dataset as a multi-panel chart
        visualization::plot_merged_data()?;
    } else if args.len() > 1 {
        println!("Unknown option: {}", args[1]);
        println!("Usage: smard_weather_pipeline [--weather | --smard | --combine | --merge | --plot]");
        println!("Running with no option executes the full pipeline.");
    } else {
        println!("🚀 SMARD + Weather Data Pipeline");
        println!("{}", "=".repeat(60));

        let start = std::time::Instant::now();

        weather_extractor::extract_weather_data()?;
        smard_extractor::extract_smard_data()?;
        smard_combiner::combine_smard_data()?;
        data_merger::merge_datasets()?;

        println!("\n✅ Pipeline complete in {:?}!", start.elapsed());
    }

    Ok(())
}
