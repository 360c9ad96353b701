use std::path::PathBuf;

use clap::{arg, command, crate_name, value_parser, ArgMatches, Command};
use client::UploadParams;

mod cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // a missing .env is fine
    dotenvy::dotenv().ok();

    let cli = build_cli().get_matches();

    match cli.subcommand() {
        Some((cli::VERSION_SUBCOMMAND, _)) => cli::version::run(),
        Some((cli::BUGREPORT_SUBCOMMAND, _)) => cli::bugreport::run(),
        Some((cli::SERVER_SUBCOMMAND, matches)) => cli::server::run(matches).await?,
        Some((cli::UPLOAD_SUBCOMMAND, matches)) => {
            let params = UploadParams {
                uri: required(matches, "uri"),
                file: PathBuf::from(required(matches, "file")),
                token: matches.get_one::<String>("token").cloned(),
                metadata: matches.get_one::<String>("metadata").cloned(),
            };
            cli::client::upload(params).await?;
        }
        Some((cli::GALLERY_SUBCOMMAND, matches)) => {
            let page = matches.get_one::<usize>("page").copied().unwrap_or(1);
            cli::client::gallery(&required(matches, "uri"), page).await?;
        }
        Some((cli::DELETE_SUBCOMMAND, matches)) => {
            cli::client::delete(
                &required(matches, "uri"),
                &required(matches, "id"),
                &required(matches, "admin"),
            )
            .await?;
        }
        Some((cli::CLEAR_SUBCOMMAND, matches)) => {
            cli::client::clear(&required(matches, "uri"), &required(matches, "admin")).await?;
        }
        _ => {}
    }
    Ok(())
}

fn build_cli() -> Command {
    command!(crate_name!())
        .version(clap::crate_version!())
        .about(clap::crate_description!())
        .subcommand(Command::new(cli::VERSION_SUBCOMMAND).about(cli::VERSION_DESCRIPTION))
        .subcommand(Command::new(cli::BUGREPORT_SUBCOMMAND).about(cli::BUGREPORT_DESCRIPTION))
        .subcommand(
            Command::new(cli::SERVER_SUBCOMMAND)
                .about(cli::SERVER_DESCRIPTION)
                .arg(
                    arg!(-p --port <PORT>)
                        .value_parser(value_parser!(u16))
                        .help("Port to listen on. Overrides PHOTOBOX_PORT"),
                )
                .arg(arg!(-d --dir <DIR>).help("Upload directory. Overrides PHOTOBOX_UPLOAD_DIR")),
        )
        .subcommand(
            Command::new(cli::UPLOAD_SUBCOMMAND)
                .about(cli::UPLOAD_DESCRIPTION)
                .arg(arg!(-u --uri <URI>).required(true).help("Photobox server URI"))
                .arg(arg!(-f --file <FILE>).required(true).help("Path to the photo"))
                .arg(
                    arg!(-t --token <TOKEN>)
                        .env("PHOTOBOX_API_KEY")
                        .hide_env_values(true)
                        .help("Bearer token"),
                )
                .arg(arg!(-m --metadata <JSON>).help("JSON object stored with the photo")),
        )
        .subcommand(
            Command::new(cli::GALLERY_SUBCOMMAND)
                .about(cli::GALLERY_DESCRIPTION)
                .arg(arg!(-u --uri <URI>).required(true).help("Photobox server URI"))
                .arg(
                    arg!(-p --page <PAGE>)
                        .value_parser(value_parser!(usize))
                        .default_value("1")
                        .help("Page number, starting from 1"),
                ),
        )
        .subcommand(
            Command::new(cli::DELETE_SUBCOMMAND)
                .about(cli::DELETE_DESCRIPTION)
                .arg(arg!(-u --uri <URI>).required(true).help("Photobox server URI"))
                .arg(arg!(-i --id <ID>).required(true).help("Photo id"))
                .arg(admin_arg()),
        )
        .subcommand(
            Command::new(cli::CLEAR_SUBCOMMAND)
                .about(cli::CLEAR_DESCRIPTION)
                .arg(arg!(-u --uri <URI>).required(true).help("Photobox server URI"))
                .arg(admin_arg()),
        )
        .arg_required_else_help(true)
        .disable_version_flag(true)
}

fn admin_arg() -> clap::Arg {
    arg!(-a --admin <PASSWORD>)
        .required(true)
        .env("PHOTOBOX_ADMIN_PASSWORD")
        .hide_env_values(true)
        .help("Admin password")
}

/// Value of an argument clap already enforces as required.
fn required(matches: &ArgMatches, name: &str) -> String {
    matches.get_one::<String>(name).cloned().unwrap_or_default()
}
