use clap::{App, Arg};
use image::imageops::{self, FilterType};
use indicatif::{ProgressBar, ProgressStyle};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use tracing::warn;
use tracing_subscriber::EnvFilter;

use std::error::Error;

use glpr_rust::dataset::DatasetWriter;
use glpr_rust::utils::{list_images, square_crop};
use glpr_rust::BACKGROUND_SIZE;

// 8 digit index labels
const LABEL_LEN: usize = 8;

/// Packs a directory of photographs into the background container the
/// augmentor crops from. Images are cut square, resized to the background
/// tile size and stored under an index label.
fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let matches = App::new("build_backgrounds")
                    .version("0.1.0")
                    .about("Builds the background image dataset container")
                    .arg(Arg::with_name("source")
                        .short("s")
                        .long("source")
                        .takes_value(true)
                        .required(true)
                        .help("directory with background photographs"))
                    .arg(Arg::with_name("target")
                        .short("t")
                        .long("target")
                        .takes_value(true)
                        .default_value("datasets/german_license_plates/background.ds")
                        .help("dataset container to build"))
                    .arg(Arg::with_name("items")
                        .short("i")
                        .long("items")
                        .takes_value(true)
                        .default_value("1000")
                        .help("max number of images"))
                    .get_matches();

    let source = matches.value_of("source").ok_or("source path is required")?;
    let target = matches.value_of("target").ok_or("target path is required")?;
    let items: usize = matches.value_of("items").ok_or("item count is required")?.parse()?;

    // random subset of the source directory, not a prefix
    let mut paths = list_images(source)?;
    paths.shuffle(&mut StdRng::from_entropy());
    paths.truncate(items);

    println!("building {} from {} images...", target, paths.len());
    let mut writer = DatasetWriter::create(target, paths.len() as u64,
        BACKGROUND_SIZE, BACKGROUND_SIZE, LABEL_LEN)?;

    let pb = ProgressBar::new(paths.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})")
            .unwrap()
            .progress_chars("#>-"),
    );

    let mut index = 0u64;
    for path in &paths {
        pb.inc(1);

        let image = match image::open(path) {
            Ok(image) => image.to_luma8(),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "open image failed");
                continue;
            }
        };

        let image = square_crop(&image);
        let image = if image.dimensions() != (BACKGROUND_SIZE, BACKGROUND_SIZE) {
            imageops::resize(&image, BACKGROUND_SIZE, BACKGROUND_SIZE, FilterType::Triangle)
        } else {
            image
        };

        writer.add(vec![image], vec![format!("{:08}", index)])?;
        index += 1;
    }

    pb.finish();
    writer.close()?;
    println!("{} images saved to {}", index, target);
    Ok(())
}
