use clap::ArgMatches;
use server::config::Config;

/// Environment configuration with command line overrides applied.
pub async fn run(matches: &ArgMatches) -> anyhow::Result<()> {
    server::init_tracing();

    let mut config = Config::from_env()?;
    if let Some(port) = matches.get_one::<u16>("port") {
        config.port = *port;
    }
    if let Some(dir) = matches.get_one::<String>("dir") {
        config.upload_dir = dir.into();
    }

    server::run(config).await
}
