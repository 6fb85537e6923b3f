use std::{path::PathBuf, sync::Arc, time::Duration};

use anyhow::Context as _;
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use log::info;
use ropeplot_plotter::{
    config::ChalkSettings,
    sim::{SimRig, SimSettings},
    Grayscale, PlotInput, Plotter, PlotterConfig, Step,
};
use ropeplot_protocol::{replay, Pattern};

mod render;

const TICK: Duration = Duration::from_millis(50);
// Resolution of the progress bar.
const STEPS: u64 = 1000;

/// Runs a drawing on a simulated plotter.
#[derive(Parser)]
struct Args {
    /// Plotter settings, as TOML.
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long, default_value = "circles")]
    pattern: Pattern,
    /// The image to draw, for every pattern except replay.
    #[arg(long)]
    image: Option<PathBuf>,
    /// A coordinate file, for the replay pattern.
    #[arg(long)]
    replay: Option<PathBuf>,
    /// Where to write the drawing.
    #[arg(long)]
    svg: Option<PathBuf>,
    /// Fit a chalk extruder, even if the config doesn't ask for one.
    #[arg(long)]
    chalk: bool,
    /// Press the reload button after the plotter has checked it this many times.
    #[arg(long, default_value_t = 3)]
    ack_after: u32,
}

fn load_config(args: &Args) -> anyhow::Result<PlotterConfig> {
    let mut config = match &args.config {
        Some(path) => PlotterConfig::load(path)
            .with_context(|| format!("failed to load {}", path.display()))?,
        None => PlotterConfig::default(),
    };
    if args.chalk {
        config.chalk.get_or_insert_with(ChalkSettings::default);
    }
    config.validate()?;
    Ok(config)
}

fn load_input(args: &Args) -> anyhow::Result<PlotInput> {
    if args.pattern.needs_image() && args.image.is_none() {
        anyhow::bail!("the {} pattern needs --image", args.pattern);
    }
    if !args.pattern.needs_image() && args.replay.is_none() {
        anyhow::bail!("the {} pattern needs --replay", args.pattern);
    }
    let image = match &args.image {
        Some(path) => Some(Arc::new(
            Grayscale::open(path).with_context(|| format!("failed to open {}", path.display()))?,
        )),
        None => None,
    };
    let points = match &args.replay {
        Some(path) => {
            Some(replay::read(path).with_context(|| format!("failed to read {}", path.display()))?)
        }
        None => None,
    };
    Ok(PlotInput { image, points })
}

fn main() -> anyhow::Result<()> {
    pretty_env_logger::init();
    let args = Args::parse();

    let config = load_config(&args)?;
    let input = load_input(&args)?;
    let reload_poll = config.timing.reload_poll();

    let geometry = ropeplot_geom::Config::new(config.geometry)?;
    let sim = SimRig::new(
        geometry,
        SimSettings {
            chalk: config.chalk.is_some(),
            ..SimSettings::default()
        },
    );
    let mut plotter = Plotter::new(config, sim.rig())?;
    if let Some(volts) = plotter.battery_voltage() {
        info!("battery at {volts:.1}V");
    }

    let bar = ProgressBar::new(STEPS).with_message(args.pattern.to_string());
    bar.set_style(ProgressStyle::with_template(
        "{spinner} [{elapsed_precise}] {wide_bar} {percent:>3}% {msg}",
    )?);
    bar.enable_steady_tick(TICK);

    let mut job = plotter.plot(args.pattern, &input)?;
    let mut polls = 0;
    loop {
        match job.advance()? {
            Step::Progress(fraction) => {
                bar.set_position((fraction as f64 * STEPS as f64).round() as u64);
                if polls > 0 {
                    bar.set_message(args.pattern.to_string());
                    polls = 0;
                }
            }
            Step::AwaitingReload => {
                bar.set_message("waiting for new chalk");
                polls += 1;
                if polls >= args.ack_after {
                    sim.button.press();
                }
                sim.world.advance(reload_poll);
            }
            Step::Done => break,
        }
    }
    drop(job);
    bar.finish_with_message("done");
    info!("finished after {:?} of plotter time", sim.world.now());

    if let Some(path) = &args.svg {
        render::write_svg(path, &sim.world.pen_trace(), plotter.geometry())
            .with_context(|| format!("failed to write {}", path.display()))?;
    }
    Ok(())
}
