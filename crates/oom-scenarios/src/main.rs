use anyhow::Context;
use clap::{value_parser, Arg, ArgAction, Command};
use oom_harness::HarnessError;
use oom_scenarios::scenario::{open_close, resistance};
use oom_scenarios::settings::parse_law;
use oom_scenarios::{logging, Environment, HarnessSettings, ScenarioReport, INJECTOR_UNAVAILABLE};
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;

type ScenarioFn = fn(&mut Environment, &HarnessSettings) -> Result<ScenarioReport, HarnessError>;

const OPEN_CLOSE: (&str, ScenarioFn) = (open_close::NAME, open_close::run);
const RESISTANCE: (&str, ScenarioFn) = (resistance::NAME, resistance::run);

fn cli() -> Command {
    Command::new("oom-scenarios")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Allocation-failure resistance scenarios")
        .arg(
            Arg::new("config")
                .long("config")
                .global(true)
                .value_parser(value_parser!(PathBuf))
                .help("Settings file (TOML)"),
        )
        .arg(
            Arg::new("json")
                .long("json")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Output reports as JSON"),
        )
        .arg(
            Arg::new("max-attempts")
                .long("max-attempts")
                .global(true)
                .value_parser(value_parser!(u32).range(1..))
                .help("Bound on escalation attempts"),
        )
        .arg(
            Arg::new("log-filter")
                .long("log-filter")
                .global(true)
                .help("Log filter used when RUST_LOG is unset"),
        )
        .subcommand(
            Command::new("open-close")
                .about("Open/close under default and step strategies")
                .arg(
                    Arg::new("iterations")
                        .long("iterations")
                        .value_parser(value_parser!(u32))
                        .help("Sessions under the default strategy"),
                ),
        )
        .subcommand(
            Command::new("resistance")
                .about("Full engine surface under a random strategy")
                .arg(
                    Arg::new("rows")
                        .long("rows")
                        .value_parser(value_parser!(u32))
                        .help("Rows inserted per phase"),
                )
                .arg(
                    Arg::new("duty-cycle")
                        .long("duty-cycle")
                        .value_parser(value_parser!(u32).range(1..))
                        .help("Random strategy duty cycle"),
                )
                .arg(
                    Arg::new("seed")
                        .long("seed")
                        .value_parser(value_parser!(u32))
                        .help("Random strategy seed"),
                )
                .arg(
                    Arg::new("law")
                        .long("law")
                        .value_parser(["independent", "periodic"])
                        .help("Random failure law of the simulated injector"),
                ),
        )
        .subcommand(Command::new("all").about("Run every scenario (default)"))
}

fn settings(matches: &clap::ArgMatches) -> anyhow::Result<HarnessSettings> {
    let global = matches.subcommand().map_or(matches, |(_, args)| args);
    let mut settings = match global.get_one::<PathBuf>("config") {
        Some(path) => HarnessSettings::load(path)
            .with_context(|| format!("loading settings from {}", path.display()))?,
        None => HarnessSettings::default(),
    };

    if let Some(filter) = global.get_one::<String>("log-filter") {
        settings.log_filter.clone_from(filter);
    }
    if let Some(limit) = global.get_one::<u32>("max-attempts") {
        settings.max_attempts = Some(*limit);
    }

    match matches.subcommand() {
        Some(("open-close", args)) => {
            if let Some(iterations) = args.get_one::<u32>("iterations") {
                settings.open_close.iterations = *iterations;
            }
        }
        Some(("resistance", args)) => {
            if let Some(rows) = args.get_one::<u32>("rows") {
                settings.resistance.rows = *rows;
            }
            if let Some(duty_cycle) = args.get_one::<u32>("duty-cycle") {
                settings.resistance.duty_cycle = *duty_cycle;
            }
            if let Some(seed) = args.get_one::<u32>("seed") {
                settings.resistance.seed = Some(*seed);
            }
            if let Some(law) = args.get_one::<String>("law").and_then(|l| parse_law(l)) {
                settings.resistance.law = law;
            }
        }
        _ => {}
    }

    settings.validate()?;
    Ok(settings)
}

fn run_guarded(
    name: &'static str,
    scenario: ScenarioFn,
    env: &mut Environment,
    settings: &HarnessSettings,
) -> anyhow::Result<ScenarioReport> {
    match panic::catch_unwind(AssertUnwindSafe(|| scenario(env, settings))) {
        Ok(result) => Ok(result.with_context(|| format!("scenario {name} aborted"))?),
        Err(payload) => {
            let message = payload
                .downcast_ref::<String>()
                .cloned()
                .or_else(|| payload.downcast_ref::<&str>().map(ToString::to_string))
                .unwrap_or_else(|| "scenario panicked".to_string());
            Ok(ScenarioReport::aborted(name, message))
        }
    }
}

fn main() -> anyhow::Result<()> {
    let matches = cli().get_matches();
    let settings = settings(&matches)?;
    logging::init(&settings.log_filter)?;

    let mut env = match Environment::simulated(settings.resistance.law) {
        Ok(env) => env,
        Err(err) => {
            tracing::error!(%err, "{INJECTOR_UNAVAILABLE}");
            eprintln!("{INJECTOR_UNAVAILABLE}: {err}. Nothing to do.");
            std::process::exit(1);
        }
    };

    let selected: Vec<(&'static str, ScenarioFn)> = match matches.subcommand_name() {
        Some("open-close") => vec![OPEN_CLOSE],
        Some("resistance") => vec![RESISTANCE],
        _ => vec![OPEN_CLOSE, RESISTANCE],
    };

    let json = matches
        .subcommand()
        .map_or(&matches, |(_, args)| args)
        .get_flag("json");

    let mut passed = true;
    for (name, scenario) in selected {
        tracing::info!(scenario = name, "running");
        let report = run_guarded(name, scenario, &mut env, &settings)?;
        if json {
            println!("{}", report.to_json()?);
        } else {
            println!("{}", report.generate_text());
        }
        passed &= report.passed();
    }

    std::process::exit(if passed { 0 } else { 1 });
}
