use std::{error::Error, process};

use argh::FromArgs;
use log::LevelFilter;
use snafu::{OptionExt as _, ResultExt as _};
use snafu_utils::{GenericError, Locate, Location, Report};
use umem::{Policy, ReserveError, UmemError};

use self::scenario::Scenario;

mod logger;
mod printer;
mod scenario;

/// Run allocator demonstration scenarios and print the resulting arena state.
#[derive(Debug, FromArgs)]
struct Args {
    /// scenarios to run, in order (default: all)
    #[argh(positional)]
    scenarios: Vec<String>,
    /// arena size in bytes, overriding each scenario's own
    #[argh(option)]
    size: Option<usize>,
    /// placement policy (first-fit, best-fit, worst-fit, next-fit),
    /// overriding each scenario's own
    #[argh(option)]
    policy: Option<Policy>,
    /// trace every allocator operation
    #[argh(switch, short = 'v')]
    verbose: bool,
    /// list the available scenarios and exit
    #[argh(switch)]
    list: bool,
}

fn main() {
    let args: Args = argh::from_env();

    if let Err(err) = run(&args) {
        let report = Report::new(err).with_locator(locate);
        eprintln!("{report}");
        process::exit(1);
    }
}

fn locate(source: &(dyn Error + 'static)) -> Option<Location> {
    if let Some(err) = source.downcast_ref::<UmemError>() {
        return err.location();
    }
    source.downcast_ref::<ReserveError>().and_then(ReserveError::location)
}

fn run(args: &Args) -> Result<(), GenericError> {
    let level = if args.verbose {
        LevelFilter::Trace
    } else {
        LevelFilter::Info
    };
    logger::init(level).whatever_context("failed to install the logger")?;

    if args.list {
        printer::print_scenarios(scenario::ALL);
        return Ok(());
    }

    for scenario in select(&args.scenarios)? {
        let size = args.size.unwrap_or(scenario.size);
        let policy = args.policy.unwrap_or(scenario.policy);
        scenario
            .run(size, policy)
            .with_whatever_context(|_| format!("scenario `{}` failed", scenario.name))?;
    }

    Ok(())
}

fn select(names: &[String]) -> Result<Vec<&'static Scenario>, GenericError> {
    if names.is_empty() {
        return Ok(scenario::ALL.iter().collect());
    }
    names
        .iter()
        .map(|name| {
            scenario::find(name)
                .with_whatever_context(|| format!("unknown scenario `{name}` (see --list)"))
        })
        .collect()
}
