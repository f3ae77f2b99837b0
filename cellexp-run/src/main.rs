use std::path::PathBuf;

use cellexp_rs::{
    config::{self, RawParameters},
    JobContext, Parameters,
};
use clap::Parser;
use log::{debug, error, info, LevelFilter};

/// cellexp-run expands nuclei masks into cell and cytoplasm labels and writes a table of
/// per-region shape and intensity statistics.
#[derive(Parser)]
#[clap(version = "0.1")]
struct Opts {
    /// Directory containing the nuclei masks (and intensity images, unless --intensity-dir is given)
    #[clap(long = "input-dir", alias = "infolder")]
    input_dir: Option<PathBuf>,
    /// Directory the label images and metrics table are written to
    #[clap(long = "output-dir", alias = "outfolder")]
    output_dir: Option<PathBuf>,
    /// Ground truth directory
    #[clap(long = "gt-dir", alias = "gtfolder")]
    gt_dir: Option<PathBuf>,
    /// Temporary directory [default: <output-dir>/tmp]
    #[clap(long = "temp-dir", alias = "tmpfolder")]
    temp_dir: Option<PathBuf>,
    /// Directory containing the intensity images
    #[clap(long = "intensity-dir", alias = "intensity_dir")]
    intensity_dir: Option<PathBuf>,
    /// Only process files with this extension (can be repeated)
    #[clap(long = "suffix")]
    suffixes: Vec<String>,
    /// Accepted for compatibility, has no effect
    #[clap(long)]
    local: bool,

    /// Maximum distance, in pixels, nuclei are expanded by [default: 25]
    #[clap(long = "max-pixels", alias = "max_pixels")]
    max_pixels: Option<u32>,
    /// Remove cells left without cytoplasm (true/false) [default: true]
    #[clap(
        long = "discard-cells-without-cytoplasm",
        alias = "discard_cells_without_cytoplasm",
        parse(try_from_str = parse_flag)
    )]
    discard_cells_without_cytoplasm: Option<bool>,
    /// Index of the channel reported in the unsuffixed intensity columns [default: 0]
    #[clap(long = "nuclei-channel", alias = "nuclei_channel")]
    nuclei_channel: Option<usize>,
    /// Comma separated names for the intensity channels
    #[clap(long = "channel-names", alias = "channel_names")]
    channel_names: Option<String>,
    /// Process images in parallel
    #[clap(long)]
    parallel: bool,

    /// A level of verbosity, and can be used multiple times
    #[clap(short, long, parse(from_occurrences))]
    verbose: usize,
}

fn parse_flag(value: &str) -> Result<bool, String> {
    config::parse_bool(value).map_err(|error| error.to_string())
}

fn level(verbose: usize) -> LevelFilter {
    match verbose {
        0 => LevelFilter::Info,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    }
}

fn run(opts: Opts) -> cellexp_rs::Result<()> {
    if opts.local {
        debug!("--local has no effect, images are always processed locally");
    }

    let context = JobContext::new(opts.input_dir, opts.output_dir)?
        .with_gt_dir(opts.gt_dir)
        .with_temp_dir(opts.temp_dir)
        .with_intensity_dir(opts.intensity_dir)
        .with_suffixes(&opts.suffixes);

    let parameters = Parameters::from(RawParameters {
        max_pixels: opts.max_pixels,
        discard_cells_without_cytoplasm: opts.discard_cells_without_cytoplasm,
        nuclei_channel: opts.nuclei_channel,
        channel_names: opts.channel_names,
        parallel: opts.parallel,
    });

    let summary = cellexp_rs::run(context, parameters)?;

    info!(
        "Processed {} images into {} rows ({} label images written)",
        summary.images,
        summary.rows,
        summary.outputs.len()
    );
    if let Some(table) = &summary.table {
        info!("Metrics table: {:?}", table);
    }

    Ok(())
}

fn main() {
    let opts: Opts = Opts::parse();

    env_logger::Builder::new()
        .filter_level(level(opts.verbose))
        .parse_default_env()
        .init();

    if let Err(error) = run(opts) {
        error!("{}", error);
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_options_are_typed() {
        let opts = Opts::try_parse_from([
            "cellexp-run",
            "--max_pixels",
            "10",
            "--nuclei-channel",
            "2",
            "--discard_cells_without_cytoplasm",
            "No",
        ])
        .unwrap();

        assert_eq!(opts.max_pixels, Some(10));
        assert_eq!(opts.nuclei_channel, Some(2));
        assert_eq!(opts.discard_cells_without_cytoplasm, Some(false));
    }

    #[test]
    fn invalid_values_are_rejected() {
        for args in [
            ["cellexp-run", "--max-pixels", "-1"],
            ["cellexp-run", "--max-pixels", "abc"],
            ["cellexp-run", "--nuclei_channel", "first"],
            ["cellexp-run", "--discard-cells-without-cytoplasm", "maybe"],
        ] {
            assert!(Opts::try_parse_from(args).is_err());
        }
    }

    #[test]
    fn unset_options_take_defaults() {
        let opts = Opts::try_parse_from(["cellexp-run"]).unwrap();

        assert_eq!(opts.max_pixels, None);
        assert_eq!(opts.discard_cells_without_cytoplasm, None);
        assert_eq!(opts.verbose, 0);
    }
}
