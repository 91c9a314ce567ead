//! imagine - command-line interface for synthetic image datasets

use clap::{Args, Parser, Subcommand};
use imageinary::config::{DEFAULT_CHUNK_SIZE, DEFAULT_HEIGHT, DEFAULT_IMAGES_PER_FILE, DEFAULT_WIDTH};
use imageinary::container::directory_info;
use imageinary::{
    GenerationRequest, ImageFormat, ImageGenerator, PoolConfig, RecordBackend, RecordBuilder,
    RecordRequest, Result,
};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "imagine",
    about = "Generate a fake dataset of random images at any resolution",
    long_about = "Generate a fake dataset of various quantities at different resolutions.\n\n\
                  Supported file types: .bmp, .png, and .jpg.\n\
                  Supported record types: TFRecords, and RecordIO.",
    version = env!("CARGO_PKG_VERSION")
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Show progress bar
    #[arg(short = 'p', long, global = true)]
    progress: bool,

    /// Verbose output
    #[arg(short = 'v', long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Generate random images
    #[command(name = "create-images", alias = "create_images")]
    CreateImages(CreateImagesArgs),

    /// Create TFRecords from input images
    #[command(
        name = "create-tfrecord",
        aliases = ["create-tfrecords", "create_tfrecords", "create_tfrecord"]
    )]
    CreateTfrecord(RecordArgs),

    /// Create RecordIO files from input images
    #[command(name = "create-recordio", alias = "create_recordio")]
    CreateRecordio(RecordArgs),
}

#[derive(Args)]
struct CreateImagesArgs {
    /// Path to save images to, created if missing
    #[arg(long)]
    path: PathBuf,

    /// Name to prepend files with, such as "sample_image_"
    #[arg(long)]
    name: String,

    /// The image width in pixels
    #[arg(long, default_value_t = DEFAULT_WIDTH)]
    width: u32,

    /// The image height in pixels
    #[arg(long, default_value_t = DEFAULT_HEIGHT)]
    height: u32,

    /// The number of images to generate
    #[arg(long, default_value_t = 1)]
    count: u64,

    /// The image format to generate (jpg, jpeg, bmp, bitmap, png); unknown formats write png
    #[arg(long = "image_format", visible_alias = "image-format", default_value = "png")]
    image_format: String,

    /// The seed to use while generating random image data
    #[arg(long, default_value_t = 0)]
    seed: u64,

    /// Display the first image size and the directory size for the images
    #[arg(long)]
    size: bool,

    /// Images handed to a worker at once; larger values trade memory for less overhead
    #[arg(long = "chunk-size", visible_alias = "chunk_size", default_value_t = DEFAULT_CHUNK_SIZE)]
    chunk_size: usize,

    /// Worker threads, defaults to the number of available cores
    #[arg(long, default_value_t = 0)]
    workers: usize,
}

#[derive(Args)]
struct RecordArgs {
    /// Path containing valid input images to convert to records
    #[arg(long = "source_path", visible_alias = "source-path")]
    source_path: PathBuf,

    /// Path to save record files to, created if missing
    #[arg(long = "dest_path", visible_alias = "dest-path")]
    dest_path: PathBuf,

    /// Name to prepend files with, such as "sample_record_"
    #[arg(long)]
    name: String,

    /// Number of images per record file
    #[arg(long = "img_per_file", visible_alias = "img-per-file", default_value_t = DEFAULT_IMAGES_PER_FILE)]
    img_per_file: usize,

    /// Worker threads, defaults to the number of available cores
    #[arg(long, default_value_t = 0)]
    workers: usize,
}

impl From<&CreateImagesArgs> for GenerationRequest {
    fn from(args: &CreateImagesArgs) -> Self {
        let image_format = ImageFormat::from_name(&args.image_format);
        if ImageFormat::parse(&args.image_format).is_none() {
            tracing::warn!(
                requested = %args.image_format,
                "unrecognized image format, falling back to {}",
                image_format
            );
        }

        GenerationRequest::new(&args.path, &args.name, image_format)
            .with_dimensions(args.width, args.height)
            .with_count(args.count)
            .with_seed(args.seed)
    }
}

impl From<&RecordArgs> for RecordRequest {
    fn from(args: &RecordArgs) -> Self {
        RecordRequest::new(&args.source_path, &args.dest_path, &args.name)
            .with_images_per_file(args.img_per_file)
    }
}

fn init_logging(verbose: bool) {
    let directive = if verbose {
        "imageinary=debug"
    } else {
        "imageinary=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directive));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn create_images(args: &CreateImagesArgs, progress: bool) -> Result<()> {
    let request = GenerationRequest::from(args);
    println!(
        "Creating {} {} files located at {} of {}x{} resolution with a base filename of {}",
        request.count,
        request.image_format,
        request.output_path.display(),
        request.width,
        request.height,
        request.filename_prefix
    );

    let pool = PoolConfig::new()
        .with_pool_size(args.workers)
        .with_chunk_size(args.chunk_size);
    let mut generator = ImageGenerator::new(request).with_pool(pool);
    if progress {
        generator = generator.with_progress();
    }

    let result = generator.generate()?;
    if args.size {
        directory_info(&result.output_dir)?.print(&result.output_dir);
    }
    result.print_summary();
    Ok(())
}

fn create_records(args: &RecordArgs, backend: RecordBackend, progress: bool) -> Result<()> {
    let request = RecordRequest::from(args);
    println!(
        "Creating {} files at {} from {} targeting {} files per record with a base filename of {}",
        backend,
        request.dest_path.display(),
        request.source_path.display(),
        request.images_per_file,
        request.name_prefix
    );

    let pool = PoolConfig::new()
        .with_pool_size(args.workers)
        .with_chunk_size(1);
    let mut builder = RecordBuilder::new(request, backend).with_pool(pool);
    if progress {
        builder = builder.with_progress();
    }

    let result = builder.build()?;
    result.source_info.print(&args.source_path);
    result.print_summary();
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match &cli.command {
        Command::CreateImages(args) => create_images(args, cli.progress),
        Command::CreateTfrecord(args) => create_records(args, RecordBackend::TfRecord, cli.progress),
        Command::CreateRecordio(args) => create_records(args, RecordBackend::RecordIo, cli.progress),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parsing() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn test_create_images_flags() {
        let cli = Cli::try_parse_from([
            "imagine",
            "create-images",
            "--path",
            "/tmp/out",
            "--name",
            "tmp_",
            "--width",
            "64",
            "--count",
            "10",
            "--image_format",
            "JPEG",
        ])
        .unwrap();

        let Command::CreateImages(args) = &cli.command else {
            panic!("expected create-images");
        };
        let request = GenerationRequest::from(args);
        assert_eq!(request.width, 64);
        assert_eq!(request.height, DEFAULT_HEIGHT);
        assert_eq!(request.count, 10);
        assert_eq!(request.image_format, ImageFormat::Jpg);
    }

    #[test]
    fn test_record_aliases() {
        let cli = Cli::try_parse_from([
            "imagine",
            "create_tfrecords",
            "--source_path",
            "in",
            "--dest_path",
            "out",
            "--name",
            "rec_",
            "--img_per_file",
            "10",
        ])
        .unwrap();

        let Command::CreateTfrecord(args) = &cli.command else {
            panic!("expected create-tfrecord");
        };
        assert_eq!(RecordRequest::from(args).images_per_file, 10);
    }

    #[test]
    fn test_missing_required_option_fails() {
        assert!(Cli::try_parse_from(["imagine", "create-recordio", "--name", "x"]).is_err());
    }
}
