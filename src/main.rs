use clap::{App, Arg};
use tracing_subscriber::EnvFilter;

use std::error::Error;

use glpr_rust::augment::ImageAugmentor;
use glpr_rust::codec::{LabelCodec, NUM_CLASSES};
use glpr_rust::dataset::DatasetLoader;
use glpr_rust::generator::DatasetGenerator;
use glpr_rust::{DOWNSAMPLE_FACTOR, IMAGE_HEIGHT, IMAGE_WIDTH, MAX_TEXT_LEN};

/// Runs the whole data path once without the model: container load,
/// augmentation, batch assembly. Useful to eyeball shapes and throughput
/// before starting a training run.
fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let matches = App::new("GLPR")
                    .version("0.1.0")
                    .about("Batch pipeline preview for the license plate recognition corpus")
                    .arg(Arg::with_name("plates")
                        .short("p")
                        .long("plates")
                        .takes_value(true)
                        .default_value("datasets/german_license_plates/glp.ds")
                        .help("plate dataset container"))
                    .arg(Arg::with_name("backgrounds")
                        .short("b")
                        .long("backgrounds")
                        .takes_value(true)
                        .default_value("datasets/german_license_plates/background.ds")
                        .help("background dataset container"))
                    .arg(Arg::with_name("batch_size")
                        .long("batch-size")
                        .takes_value(true)
                        .default_value("64"))
                    .arg(Arg::with_name("batches")
                        .long("batches")
                        .takes_value(true)
                        .default_value("4")
                        .help("number of batches to pull"))
                    .get_matches();

    let plates_path = matches.value_of("plates").ok_or("plates path is required")?;
    let backgrounds_path = matches.value_of("backgrounds").ok_or("backgrounds path is required")?;
    let batch_size: usize = matches.value_of("batch_size").ok_or("batch size is required")?.parse()?;
    let batches: u64 = matches.value_of("batches").ok_or("batch count is required")?.parse()?;

    let (backgrounds, _) = DatasetLoader::new().load(backgrounds_path, true, Some(1000))?;
    let (images, labels) = DatasetLoader::new().load(plates_path, true, None)?;
    println!("plates: {}, backgrounds: {}, model output classes: {}",
        images.len(), backgrounds.len(), NUM_CLASSES);

    let augmentor = ImageAugmentor::new(IMAGE_WIDTH, IMAGE_HEIGHT, backgrounds)?;
    let mut generator = DatasetGenerator::new(images, labels, IMAGE_WIDTH, IMAGE_HEIGHT,
        DOWNSAMPLE_FACTOR, MAX_TEXT_LEN, batch_size, augmentor);

    for (i, batch) in generator.generate(Some(batches)).enumerate() {
        let batch = batch?;
        let first: Vec<usize> = batch.labels.row(0).iter()
            .filter(|v| **v >= 0)
            .map(|v| *v as usize)
            .collect();
        println!("batch {}: inputs {:?}, labels {:?}, first label {:?}",
            i, batch.inputs.dim(), batch.labels.dim(), LabelCodec::decode(&first));
    }

    Ok(())
}
