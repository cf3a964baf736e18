use clap::{Parser, Subcommand};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde_json::{json, Value};

#[derive(Parser)]
#[command(name = "guard-cli")]
#[command(about = "Operator CLI for the gallery security pipeline", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://localhost:3000")]
    url: String,

    #[arg(short, long, env = "GUARD_ADMIN_KEY", default_value = "CHANGE_ME_IN_PRODUCTION")]
    key: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check pipeline status
    Status,
    /// Rate limit statistics and top offenders
    RateLimit,
    /// HTTPS enforcement statistics
    Https,
    /// Security header statistics
    Headers,
    /// Security monitor statistics
    Security,
    /// Error reporter statistics
    Errors,
    /// Recent security events
    Events {
        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },
    /// Block an identity (e.g. `ip:203.0.113.7` or `user:42`)
    Block {
        identity: String,
        #[arg(short, long, default_value = "blocked via guard-cli")]
        reason: String,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = reqwest::Client::new();

    let mut headers = HeaderMap::new();
    headers.insert(
        AUTHORIZATION,
        HeaderValue::from_str(&format!("Bearer {}", cli.key))?,
    );

    let get = |path: String| client.get(format!("{}{}", cli.url, path)).headers(headers.clone());

    let res = match cli.command {
        Commands::Status => get("/admin/status".into()).send().await?,
        Commands::RateLimit => get("/admin/stats/rate-limit".into()).send().await?,
        Commands::Https => get("/admin/stats/https".into()).send().await?,
        Commands::Headers => get("/admin/stats/headers".into()).send().await?,
        Commands::Security => get("/admin/stats/security".into()).send().await?,
        Commands::Errors => get("/admin/stats/errors".into()).send().await?,
        Commands::Events { limit } => get(format!("/admin/events?limit={}", limit)).send().await?,
        Commands::Block { identity, reason } => {
            client
                .post(format!("{}/admin/block", cli.url))
                .headers(headers.clone())
                .json(&json!({ "identity": identity, "reason": reason }))
                .send()
                .await?
        }
    };
    print_response(res).await?;

    Ok(())
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    if !status.is_success() {
        eprintln!("Error: Admin API returned status {}", status);
        if let Ok(text) = res.text().await {
            eprintln!("Response: {}", text);
        }
        return Ok(());
    }

    let json: Value = res.json().await?;
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}
