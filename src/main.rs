use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};

use pneumo::{cli, config};

#[derive(Debug, Parser)]
#[command(name = "pneumo")]
#[command(about = "Chest X-ray pneumonia diagnosis client with explainability reports")]
struct App {
    #[command(subcommand)]
    command: Commands,
}

/// Intake fields shared by `predict` and `explain`.
#[derive(Debug, Args)]
struct Intake {
    /// Chest X-ray image to upload
    image: PathBuf,
    /// Patient name
    #[arg(long)]
    name: String,
    /// Patient ID
    #[arg(long)]
    id: String,
    /// Age in whole years
    #[arg(long)]
    age: String,
    /// Gender: Male, Female or Other
    #[arg(long)]
    gender: String,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Submit an X-ray for prediction and print the diagnosis
    Predict {
        #[command(flatten)]
        intake: Intake,
        /// Output format: table (default), json, csv
        #[arg(long, default_value = "table")]
        format: String,
    },
    /// Predict, then generate the Grad-CAM / LIME / occlusion report
    Explain {
        #[command(flatten)]
        intake: Intake,
        /// Write inline explanation images to this directory
        #[arg(long)]
        save_dir: Option<PathBuf>,
        /// Output format: table (default), json, csv
        #[arg(long, default_value = "table")]
        format: String,
    },
    /// List past reports, optionally for one patient
    History {
        /// Patient ID to filter by (all patients when omitted)
        #[arg(long, default_value = "")]
        patient_id: String,
        /// Output format: table (default), json, csv
        #[arg(long, default_value = "table")]
        format: String,
    },
    /// Launch the local web workspace
    Web {
        /// Listen address (default from config: 127.0.0.1:9747)
        #[arg(long)]
        addr: Option<String>,
        /// Don't open a browser window
        #[arg(long)]
        no_open: bool,
    },
    /// Check config files, backend reachability and the request log
    Health,
    /// Show recent backend requests from the request log
    Activity {
        /// Number of entries to show
        #[arg(long, default_value = "20")]
        limit: usize,
        /// Output format: table (default), json, csv
        #[arg(long, default_value = "table")]
        format: String,
    },
    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Debug, Subcommand)]
enum ConfigAction {
    /// Show the effective configuration
    Show,
    /// Write the default config to ~/.pneumo/config.toml
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
    /// Set a value, e.g. `pneumo config set api.base_url http://gpu-box:5000`
    Set { key: String, value: String },
    /// Reset the global config to defaults
    Reset,
}

impl Intake {
    fn into_form(self) -> Result<pneumo::form::FormInput> {
        cli::form_input(&self.image, &self.name, &self.id, &self.age, &self.gender)
    }
}

fn main() -> Result<()> {
    let app = App::parse();

    match app.command {
        Commands::Predict { intake, format } => {
            let fmt = cli::OutputFormat::from_str_opt(Some(&format));
            cli::run_predict(intake.into_form()?, fmt)
        }
        Commands::Explain {
            intake,
            save_dir,
            format,
        } => {
            let fmt = cli::OutputFormat::from_str_opt(Some(&format));
            cli::run_explain(intake.into_form()?, save_dir.as_deref(), fmt)
        }
        Commands::History { patient_id, format } => {
            let fmt = cli::OutputFormat::from_str_opt(Some(&format));
            cli::run_history(&patient_id, fmt)
        }
        Commands::Web { addr, no_open } => {
            let cfg = config::load();
            let addr = addr.unwrap_or_else(|| cfg.web.addr.clone());
            pneumo::web::serve(&cfg, &addr, cfg.web.open_browser && !no_open)
        }
        Commands::Health => cli::run_health(),
        Commands::Activity { limit, format } => {
            let fmt = cli::OutputFormat::from_str_opt(Some(&format));
            cli::run_activity(limit, fmt)
        }
        Commands::Config { action } => match action {
            ConfigAction::Show => cli::run_config_show(),
            ConfigAction::Init { force } => cli::run_config_init(force),
            ConfigAction::Set { key, value } => cli::run_config_set(&key, &value),
            ConfigAction::Reset => cli::run_config_reset(),
        },
    }
}
