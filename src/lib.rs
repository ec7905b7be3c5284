pub mod config;
pub mod error;
pub mod interpreter;
pub mod logging;
pub mod model;
pub mod repl;
pub mod request;
pub mod session;
pub mod transport;
pub mod web;

use anyhow::Result;
use std::env;
use std::io::{self, Write};
use tracing::info;

use config::Config;
use repl::run_repl;
use session::ChatSession;
use transport::HttpTransport;

pub async fn run() -> Result<()> {
    dotenvy::dotenv().ok();
    logging::init();

    let cfg = Config::from_env();
    info!(
        base_url = %cfg.base_url,
        model = %cfg.generation.model,
        stream = cfg.generation.stream,
        timeout_secs = cfg.timeout_secs,
        "loaded runtime configuration"
    );

    let transport = HttpTransport::from_config(&cfg)?;
    let mut session = ChatSession::new(
        transport,
        cfg.generation.clone(),
        cfg.system_prompt.clone(),
    );

    let args: Vec<String> = env::args().skip(1).collect();
    match args.as_slice() {
        [] => run_repl(session, &cfg).await,
        [command] if command == "serve" => web::serve(session, &cfg).await,
        _ => {
            let prompt = args.join(" ");
            if cfg.generation.stream {
                let mut print_delta = |delta: &str| {
                    print!("{delta}");
                    let _ = io::stdout().flush();
                };
                session.send_with_observer(&prompt, &mut print_delta).await?;
                println!();
            } else {
                let answer = session.send(&prompt).await?;
                println!("{answer}");
            }
            Ok(())
        }
    }
}
