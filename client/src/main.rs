use std::error::Error;
use std::process::ExitCode;

use chrono::{DateTime, FixedOffset};
use clap::{Parser, Subcommand};
use serde::Deserialize;

mod print_price_table;
use print_price_table::print_price_as_table;

#[derive(Parser, Debug)]
#[command(version, about = "Query trailing-window crypto price averages")]
struct Cli {
    /// Base URL of the price aggregator server.
    #[arg(long, env = "PRICE_SERVER_URL", default_value = "http://localhost:8080")]
    server: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Average price over the last 24 hours
    #[command(name = "24h")]
    Average24h { symbol: String },

    /// Simple moving average of the last `n` samples
    Sma {
        symbol: String,
        n: u32,
        /// Sampling period: 1m, 5m, 30m, 1d or 1w
        p: String,
        /// Window end (RFC 3339), defaults to now
        #[arg(long, short = 's', value_parser = parse_start)]
        start: Option<DateTime<FixedOffset>>,
    },
}

fn parse_start(value: &str) -> Result<DateTime<FixedOffset>, String> {
    DateTime::parse_from_rfc3339(value).map_err(|error| format!("{error}, expected RFC 3339"))
}

#[derive(Deserialize, Debug, PartialEq)]
pub struct PriceResult {
    pub symbol: String,
    pub value: String,
}

#[derive(Deserialize, Debug)]
struct ErrorBody {
    error: String,
    code: String,
}

enum Outcome {
    Price(PriceResult),
    Failed(ErrorBody),
}

async fn query(client: &reqwest::Client, cli: &Cli) -> Result<Outcome, Box<dyn Error>> {
    let base = cli.server.trim_end_matches('/');

    let request = match &cli.command {
        Command::Average24h { symbol } => {
            client.get(format!("{base}/api/price/{symbol}/24hAvgPrice"))
        }
        Command::Sma {
            symbol,
            n,
            p,
            start,
        } => {
            let mut params = vec![("n", n.to_string()), ("p", p.clone())];
            if let Some(start) = start {
                params.push(("s", start.to_rfc3339()));
            }
            client
                .get(format!("{base}/api/price/{symbol}/SimpleMovingAverage"))
                .query(&params)
        }
    };

    let response = request.send().await?;
    let status = response.status();
    let body = response.text().await?;

    if status.is_success() {
        return Ok(Outcome::Price(serde_json::from_str(&body)?));
    }

    match serde_json::from_str::<ErrorBody>(&body) {
        Ok(error) => Ok(Outcome::Failed(error)),
        Err(_) => Err(format!("server answered {status}: {body}").into()),
    }
}

fn describe(command: &Command) -> String {
    match command {
        Command::Average24h { .. } => "24h average".to_string(),
        Command::Sma { n, p, start, .. } => match start {
            Some(start) => format!("SMA n={n} p={p} until {}", start.to_rfc3339()),
            None => format!("SMA n={n} p={p}"),
        },
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode, Box<dyn Error>> {
    let cli = Cli::parse();
    let client = reqwest::Client::new();

    match query(&client, &cli).await? {
        Outcome::Price(result) => {
            print_price_as_table(&describe(&cli.command), &result);
            Ok(ExitCode::SUCCESS)
        }
        Outcome::Failed(error) => {
            eprintln!("error: {} (code: {})", error.error, error.code);
            Ok(ExitCode::FAILURE)
        }
    }
}
