use std::error::Error;
use std::path::PathBuf;

use clap::Parser;
use dicom_series_sort::{
    DicomSeriesReader, DicomTagScanner, DicomVolumeMaterializer, Orientation, ReaderConfig,
};
use log::{info, warn};

#[derive(Parser)]
#[command(name = "dicom-series-sort")]
#[command(about = "Sort DICOM frames into loadable image blocks")]
#[command(version)]
struct Args {
    /// A directory to scan, or explicit DICOM files
    #[arg(required = true)]
    inputs: Vec<PathBuf>,

    /// JSON reader configuration (defaults to sorting by series and position)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Print per-file details of every block
    #[arg(long)]
    details: bool,

    /// Decode the first block and save its center slice as PNG
    #[arg(long)]
    preview: Option<PathBuf>,
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut reader = match &args.config {
        Some(path) => ReaderConfig::load(path)?.build()?,
        None => DicomSeriesReader::classic(),
    };

    let mut files = Vec::new();
    for input in &args.inputs {
        if input.is_dir() {
            files.extend(DicomTagScanner::files_in_directory(input)?);
        } else {
            files.push(input.clone());
        }
    }
    info!("Analyzing {} files", files.len());

    reader.analyze_files(&files)?;
    for (index, block) in reader.outputs().iter().enumerate() {
        let mut text = String::new();
        block.print(&mut text, args.details)?;
        println!("Block {index}\n{text}");
    }

    if let Some(path) = &args.preview {
        if reader.number_of_outputs() == 0 {
            warn!("No image blocks found, nothing to preview");
            return Ok(());
        }
        let block = reader.load_block(0, &DicomVolumeMaterializer::new())?;
        let image = block
            .volume()
            .and_then(|volume| volume.center_preview(Orientation::Axial));
        match image {
            Some(image) => {
                image.save(path)?;
                info!("Saved preview to {}", path.display());
            }
            None => warn!("First block has no slices to preview"),
        }
    }
    Ok(())
}
