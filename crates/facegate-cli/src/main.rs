mod actions;
mod config;
mod console;
mod engine;
mod menu;

use anyhow::Result;
use clap::{Parser, Subcommand};
use config::{Config, EnrollMode, LivenessMode};
use menu::MenuItem;
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "facegate",
    version,
    about = "Webcam face enrollment and verification with liveness checks"
)]
struct Cli {
    /// Config file (default: $FACEGATE_CONFIG, then ~/.config/facegate/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Interactive menu (default)
    Menu,
    /// Enroll a new person from the camera
    Enroll {
        #[arg(long, value_enum)]
        mode: Option<EnrollMode>,
    },
    /// Liveness check, then identify the faces in view
    Verify {
        #[arg(long, value_enum)]
        liveness: Option<LivenessMode>,
    },
    /// Continuously label faces until 'q' is pressed
    Recognize,
    /// Rebuild the store from a directory of images named after each person
    EncodeDir {
        dir: PathBuf,
    },
    /// List enrolled names
    List,
    /// List V4L2 capture devices
    Devices,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = Config::load(cli.config.as_deref())?;

    match cli.command.unwrap_or(Commands::Menu) {
        Commands::Menu => menu::run(|item| match item {
            MenuItem::AddFace => actions::enroll(&config),
            MenuItem::VerifyFace => actions::verify(&config),
            MenuItem::Exit => Ok(String::new()),
        })?,
        Commands::Enroll { mode } => {
            if let Some(mode) = mode {
                config.enroll_mode = mode;
            }
            println!("{}", actions::enroll(&config)?);
        }
        Commands::Verify { liveness } => {
            if let Some(liveness) = liveness {
                config.liveness = liveness;
            }
            println!("{}", actions::verify(&config)?);
        }
        Commands::Recognize => println!("{}", actions::recognize(&config)?),
        Commands::EncodeDir { dir } => println!("{}", actions::encode_dir(&config, &dir)?),
        Commands::List => println!("{}", actions::list(&config)?),
        Commands::Devices => println!("{}", actions::devices()),
    }

    Ok(())
}
