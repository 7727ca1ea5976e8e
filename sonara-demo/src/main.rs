mod cli;
mod output;

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();

    // `--play` streams to the default device; anything else runs the scenarios
    let args: Vec<String> = std::env::args().collect();
    if args.get(1).map(String::as_str) == Some("--play") {
        let seconds = args
            .get(2)
            .and_then(|s| s.parse().ok())
            .unwrap_or(10);
        output::play_orbit(seconds)
    } else {
        cli::run_scenarios()
    }
}
