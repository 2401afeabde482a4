use clap::{App, Arg};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::warn;
use tracing_subscriber::EnvFilter;

use std::error::Error;

use glpr_rust::dataset::DatasetWriter;
use glpr_rust::error::GlprErrorKind;
use glpr_rust::utils::list_images;
use glpr_rust::{MAX_TEXT_LEN, PLATE_HEIGHT, PLATE_WIDTH};

/// Packs a directory of rendered plate images into one dataset container.
/// The label is taken from the file name, everything between `#` and the
/// extension (`F#DÜW-AS870.png`). Records with the wrong shape or an
/// oversized label are logged and skipped, the build keeps going.
fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let matches = App::new("build_plate_dataset")
                    .version("0.1.0")
                    .about("Builds the plate image dataset container")
                    .arg(Arg::with_name("image_data")
                        .short("i")
                        .long("image_data")
                        .takes_value(true)
                        .default_value("datasets/german_license_plates/images")
                        .help("directory with rendered plate images"))
                    .arg(Arg::with_name("dataset")
                        .short("d")
                        .long("dataset")
                        .takes_value(true)
                        .default_value("datasets/german_license_plates/glp.ds")
                        .help("dataset container to build"))
                    .get_matches();

    let image_data = matches.value_of("image_data").ok_or("image data path is required")?;
    let dataset = matches.value_of("dataset").ok_or("dataset path is required")?;

    let paths = list_images(image_data)?;
    println!("building {} from {} images...", dataset, paths.len());

    let mut writer = DatasetWriter::create(dataset, paths.len() as u64, PLATE_WIDTH, PLATE_HEIGHT, MAX_TEXT_LEN)?;

    let pb = ProgressBar::new(paths.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})")
            .unwrap()
            .progress_chars("#>-"),
    );

    let mut written = 0u64;
    for path in &paths {
        pb.inc(1);

        let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("");
        let label = match stem.splitn(2, '#').nth(1) {
            Some(label) => label.to_string(),
            None => {
                warn!(path = %path.display(), "file name carries no label");
                continue;
            }
        };

        let image = match image::open(path) {
            Ok(image) => image.to_luma8(),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "open image failed");
                continue;
            }
        };

        match writer.add(vec![image], vec![label]) {
            Ok(()) => written += 1,
            Err(e) => match e.kind() {
                GlprErrorKind::ShapeMismatch { .. } | GlprErrorKind::LabelTooLong { .. } => {
                    warn!(path = %path.display(), error = %e, "record skipped");
                }
                _ => return Err(e.into()),
            },
        }
    }

    pb.finish();
    writer.close()?;
    println!("{} of {} images written to {}", written, paths.len(), dataset);
    Ok(())
}
