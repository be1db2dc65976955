mod config;

use clap::Parser;
use serde::Deserialize;
use std::time::Duration;

/// Show or update the usage held by a running `quotawatch serve`.
#[derive(Parser, Debug)]
#[command(name = "quotawatch-ui", version, about)]
struct Cli {
    /// Extract usage from the current page before showing it
    #[arg(long, conflicts_with = "set")]
    fetch: bool,

    /// Store usage entered by hand
    #[arg(long, num_args = 2, value_names = ["USED", "LIMIT"], allow_hyphen_values = true)]
    set: Option<Vec<String>>,

    /// Server base URL (overrides quotawatch-ui.toml)
    #[arg(long)]
    endpoint: Option<String>,
}

/// The parts of the server's popup view this client prints.
#[derive(Debug, Deserialize)]
struct PopupView {
    summary: Option<Summary>,
    notice: Option<Notice>,
}

#[derive(Debug, Deserialize)]
struct Summary {
    used: String,
    limit: String,
    percentage: String,
    progress_bar: String,
    last_updated: String,
}

#[derive(Debug, Deserialize)]
struct Notice {
    kind: String,
    message: String,
}

impl PopupView {
    fn render(&self) -> String {
        let mut out = Vec::new();
        if let Some(s) = &self.summary {
            out.push(format!(
                "Messages used:  {}\nMessages limit: {}\nUsage:          {} {}\n{}",
                s.used, s.limit, s.percentage, s.progress_bar, s.last_updated
            ));
        }
        if let Some(n) = &self.notice {
            out.push(n.message.clone());
        }
        out.join("\n")
    }

    fn failed(&self) -> bool {
        self.notice.as_ref().is_some_and(|n| n.kind == "error")
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("quotawatch_ui=warn")),
        )
        .init();

    let cli = Cli::parse();
    let cwd = std::env::current_dir().unwrap_or_default();
    let mut cfg = config::load_config(&cwd);
    if let Some(endpoint) = cli.endpoint.clone() {
        cfg.endpoint = endpoint;
    }

    match run(&cli, &cfg).await {
        Ok(view) => {
            println!("{}", view.render());
            if view.failed() {
                std::process::exit(1);
            }
        }
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    }
}

async fn run(cli: &Cli, cfg: &config::UiConfig) -> Result<PopupView, String> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(cfg.timeout_secs))
        .build()
        .map_err(|e| format!("failed to build HTTP client: {e}"))?;

    let request = match (&cli.set, cli.fetch) {
        (Some(values), _) => {
            let (used, limit) = match values.as_slice() {
                [used, limit] => (used, limit),
                _ => return Err("--set takes USED and LIMIT".to_string()),
            };
            client
                .post(cfg.url("/api/usage"))
                .json(&serde_json::json!({ "used": used, "limit": limit }))
        }
        (None, true) => client.post(cfg.url("/api/fetch")),
        (None, false) => client.get(cfg.url("/api/usage")),
    };

    tracing::debug!(endpoint = %cfg.endpoint, "contacting quotawatch");
    let resp = request
        .send()
        .await
        .map_err(|e| format!("could not reach {}: {e}", cfg.endpoint))?;
    let status = resp.status();
    // 400 still carries a view with the validation notice.
    resp.json::<PopupView>()
        .await
        .map_err(|e| format!("unexpected response ({status}): {e}"))
}
