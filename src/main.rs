use clap::{Parser, Subcommand};
use pixelrelay::service::Service;
use pixelrelay::{config, output};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "pixelrelay")]
#[command(about = "On-the-fly image transformation driven by URL query parameters")]
#[command(long_about = "\
On-the-fly image transformation driven by URL query parameters

Originals are read from the storage root. A request names one by path and
describes the edits as a query string:

  pixelrelay render /photos/dawn.jpg 'w=800&fm=webp&q=60' -o dawn.webp
  pixelrelay plan   /photos/dawn.jpg 'cb={\"left\":0,\"top\":0,\"width\":400,\"height\":300}&g=1'

Edits are applied in a fixed order regardless of query order:
  resize → operations → color → channel → compositing → encode

Settings come from pixelrelay.toml (optional) and the environment
(DEFAULT_QUALITY, ALLOW_VERBOSE_ERRORS, DEFAULT_CACHE_CONTROL, SLS_IGNORE,
SLS_VALID_PATH_REGEX).

Run 'pixelrelay gen-config' to generate a documented pixelrelay.toml.")]
#[command(version)]
struct Cli {
    /// Directory containing pixelrelay.toml
    #[arg(long, default_value = ".", global = true)]
    config_dir: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Serve one request and write the response body to a file
    Render {
        /// Request path, e.g. /photos/dawn.jpg
        path: String,
        /// Query string with the edits (empty returns the original)
        #[arg(default_value = "")]
        query: String,
        /// Where to write the response body
        #[arg(short, long)]
        output: PathBuf,
    },
    /// Show the steps a request would run, without encoding
    Plan {
        path: String,
        #[arg(default_value = "")]
        query: String,
        /// Print the full plan as JSON
        #[arg(long)]
        json: bool,
    },
    /// Print a stock pixelrelay.toml with all options documented
    GenConfig,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    match cli.command {
        Command::Render {
            path,
            query,
            output: destination,
        } => {
            let service = Service::from_config(config::load_config(&cli.config_dir)?)?;
            let response = service.get(&path, &query);
            if response.is_success() {
                std::fs::write(&destination, &response.body)?;
            }
            output::print_render(&path, &destination, &response);
            if !response.is_success() {
                return Err(format!("request failed with status {}", response.status).into());
            }
        }
        Command::Plan { path, query, json } => {
            let service = Service::from_config(config::load_config(&cli.config_dir)?)?;
            let plan = service.plan(&path, &query)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&plan)?);
            } else {
                output::print_plan(&plan.source, plan.spec.output.format, &plan.options, &plan.steps);
            }
        }
        Command::GenConfig => {
            print!("{}", config::stock_config_toml());
        }
    }

    Ok(())
}
