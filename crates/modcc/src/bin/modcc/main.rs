mod cli;

use indexmap::IndexMap;
use modcc::decode::Decoder;
use modcc::diagnostic::Diagnostics;
use modcc::mod_def::Mod;
use modcc::workspace::{load_workspace_from_path, LoadOptions};

fn main() {
    use clap::Parser;
    let cli = cli::Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_env("MODCC_LOG"))
        .with_writer(std::io::stderr)
        .init();

    for new_path in cli.directory.iter() {
        match new_path.canonicalize() {
            Err(e) => {
                eprintln!(
                    "Failed to resolve path for -C/--directory {}\n{}",
                    new_path.display(),
                    e
                );
                std::process::exit(1);
            }
            Ok(cwd) => {
                if let Err(err) = std::env::set_current_dir(&cwd) {
                    eprintln!("Failed to set work directory to {}\n{}", cwd.display(), err,);
                    std::process::exit(1);
                }

                tracing::info!(directory=%cwd.display(), "Changed working directory");
            }
        }
    }

    let command_result = match cli.command {
        cli::Command::Decode(decode_cli) => decode(decode_cli),
        cli::Command::Check(check_cli) => check(check_cli),
        cli::Command::Dev(dev_cli) => dev(dev_cli),
    };

    if let Err(e) = command_result {
        for error in e.chain() {
            eprintln!("{error}")
        }
        std::process::exit(1);
    }
}

pub fn decode(cli: cli::DecodeCommand) -> anyhow::Result<()> {
    let (mod_def, diags) = load(&cli.input)?;
    report(&diags);

    output(&cli.output, &mod_def)?;

    anyhow::ensure!(!diags.has_errors(), "decode failed");
    Ok(())
}

pub fn check(cli: cli::CheckCommand) -> anyhow::Result<()> {
    let (_, diags) = load(&cli.input)?;
    report(&diags);

    anyhow::ensure!(!diags.has_errors(), "check failed");
    println!("ok");
    Ok(())
}

fn load(input: &cli::InputArgs) -> anyhow::Result<(Mod, Diagnostics)> {
    let path = match &input.path {
        Some(path) => path.canonicalize()?,
        None => std::env::current_dir()?,
    };

    let options = LoadOptions {
        variables: parse_vars(&input.vars)?,
        ..Default::default()
    };

    let decoder = Decoder::standard();
    Ok(load_workspace_from_path(&decoder, &path, &options)?)
}

/// Parse `name=value` variable arguments; values parse as JSON where
/// possible and fall back to plain strings
fn parse_vars(vars: &[String]) -> anyhow::Result<IndexMap<String, hcl::Value>> {
    let mut values = IndexMap::new();
    for var in vars {
        let Some((name, raw)) = var.split_once('=') else {
            anyhow::bail!("invalid --var '{var}', expected name=value");
        };
        let value = match serde_json::from_str::<hcl::Value>(raw) {
            Ok(value) => value,
            Err(_) => hcl::Value::String(raw.to_string()),
        };
        values.insert(name.to_string(), value);
    }
    Ok(values)
}

fn report(diags: &Diagnostics) {
    for diag in diags.iter() {
        eprintln!("{diag}");
    }
}

fn output(output: &cli::OutputArgs, mod_def: &Mod) -> anyhow::Result<()> {
    match output.format {
        cli::OutputFormat::Yaml => serde_yaml::to_writer(std::io::stdout(), mod_def)?,
        cli::OutputFormat::Json => serde_json::to_writer_pretty(std::io::stdout(), mod_def)?,
    };

    Ok(())
}

/// (modcc-)developer utilities
///
/// A quick way to expose internal structures for debugging purposes
pub fn dev(cli: cli::DevCommand) -> anyhow::Result<()> {
    use cli::DevSubCommand::*;

    match cli.command {
        Sources => {
            let mut sources = modcc::sources::ModSources::default();
            sources.load_directory(&std::env::current_dir()?)?;
            println!("{sources:#?}")
        }
        Mod => {
            let decoder = Decoder::standard();
            let options = LoadOptions::default();
            let (mod_def, diags) =
                load_workspace_from_path(&decoder, &std::env::current_dir()?, &options)?;
            report(&diags);
            println!("{mod_def:#?}")
        }
    }

    Ok(())
}
