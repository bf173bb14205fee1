#![cfg(not(tarpaulin_include))]

use dashboard::{
    AnalysisQuestion, AxisPair, ChartChoice, Dashboard, DashboardConfig, DatasetChoice, EntityFilter, LoginOutcome,
    SelectionContext, SessionState, Uploads,
};
use std::env;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};

const USAGE: &str = "Usage: dashboard [--config <file>] [--question <id>] [--chart <kind>] [--x <column>] \
[--y <column>]... [--pair <x>:<y>]... [--color <column>] [--size <column>] [--entity <value>] [--upload <csv>] \
[--selection <json>]";

/// Command line options of the dashboard binary
#[derive(Default)]
struct Options {
    config: Option<PathBuf>,
    upload: Option<PathBuf>,
    entity: Option<String>,
    selection: SelectionContext,
}

fn parse_args(args: &[String]) -> Result<Options, String> {
    let mut options = Options::default();
    let mut iter = args.iter();

    while let Some(flag) = iter.next() {
        let mut value = || iter.next().cloned().ok_or_else(|| format!("{} needs a value", flag));
        match flag.as_str() {
            "--config" => options.config = Some(PathBuf::from(value()?)),
            "--upload" => options.upload = Some(PathBuf::from(value()?)),
            "--selection" => {
                let json = value()?;
                options.selection =
                    serde_json::from_str(&json).map_err(|e| format!("invalid selection JSON: {}", e))?;
            }
            "--question" => {
                let id = value()?;
                let question = serde_json::from_value::<AnalysisQuestion>(serde_json::Value::String(id.clone()))
                    .ok()
                    .or_else(|| AnalysisQuestion::from_label(&id))
                    .ok_or_else(|| format!("unknown question '{}'", id))?;
                options.selection.question = Some(question);
            }
            "--chart" => options.selection.chart = ChartChoice::parse(&value()?),
            "--x" => options.selection.x_column = Some(value()?),
            "--y" => options.selection.y_columns.push(value()?),
            "--pair" => {
                let pair = value()?;
                let (x, y) = pair
                    .split_once(':')
                    .ok_or_else(|| format!("--pair expects <x>:<y>, got '{}'", pair))?;
                options.selection.extra_pairs.push(AxisPair {
                    x: x.to_string(),
                    y: y.to_string(),
                });
            }
            "--color" => options.selection.color_column = Some(value()?),
            "--size" => options.selection.size_column = Some(value()?),
            "--entity" => options.entity = Some(value()?),
            "-h" | "--help" => return Err(USAGE.to_string()),
            other => return Err(format!("unknown argument '{}'\n{}", other, USAGE)),
        }
    }

    Ok(options)
}

/// Prompts until the gate unlocks; `None` once stdin is exhausted
fn prompt_login(dashboard: &Dashboard) -> io::Result<Option<SessionState>> {
    let stdin = io::stdin();
    let mut lines = stdin.lock().lines();
    let mut state = SessionState::new();

    loop {
        eprint!("Username: ");
        io::stderr().flush()?;
        let Some(username) = lines.next().transpose()? else {
            return Ok(None);
        };
        eprint!("Password: ");
        io::stderr().flush()?;
        let Some(password) = lines.next().transpose()? else {
            return Ok(None);
        };

        let (next, outcome) = dashboard.login(state, username.trim(), password.trim());
        state = next;
        match outcome {
            LoginOutcome::Unlocked => {
                eprintln!("{}", outcome.message());
                return Ok(Some(state));
            }
            LoginOutcome::Rejected { attempts_left } => {
                eprintln!("{} ({} attempts left)", outcome.message(), attempts_left);
            }
            LoginOutcome::TooManyAttempts | LoginOutcome::CoolingDown { .. } => {
                eprintln!("{}", outcome.message());
            }
        }
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    // Parse command line arguments
    let args: Vec<String> = env::args().skip(1).collect();
    let mut options = match parse_args(&args) {
        Ok(options) => options,
        Err(message) => {
            eprintln!("{}", message);
            std::process::exit(2);
        }
    };

    // Configuration decides which column --entity filters on
    let config = DashboardConfig::load_or_default(options.config.as_deref())?;
    if let Some(value) = options.entity.take() {
        options.selection.entity_filter = Some(EntityFilter::new(config.data.entity_column.clone(), value));
    }
    let dashboard = Dashboard::new(config);

    // Nothing is loaded before the gate unlocks
    let Some(state) = prompt_login(&dashboard)? else {
        eprintln!("No credentials supplied");
        std::process::exit(1);
    };

    // An uploaded file replaces the bundled dataset for this run
    let mut uploads = Uploads::new();
    if let Some(path) = &options.upload {
        let name = Path::new(path)
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("upload.csv")
            .to_string();
        let bytes = std::fs::read(path)?;
        uploads.insert(name.clone(), dashboard.upload(&name, &bytes)?);
        options.selection.dataset = DatasetChoice::Uploaded { name };
    }

    // Resolve and print
    let view = dashboard.refresh(&state, &options.selection, &uploads)?;
    println!("{}", serde_json::to_string_pretty(&view)?);

    Ok(())
}
