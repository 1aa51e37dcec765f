use std::process::ExitCode;

use clap::Parser;
use serde_json::json;

use hana_autostart::cli::Cli;
use hana_autostart::config::Config;
use hana_autostart::controller::Controller;
use hana_autostart::error::ControlError;
use hana_autostart::observability::pii::mask_secrets;
use hana_autostart::observability::Logger;
use hana_autostart::report;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let logger = Logger::new(uuid::Uuid::new_v4().to_string(), cli.behaviour.log_level.into());

    match run(&cli, &logger).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            logger.error("Run failed", Some(&json!({"error": e.to_string()})));
            eprintln!("error: {}", mask_secrets(&e.to_string()));
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run(cli: &Cli, logger: &Logger) -> Result<(), ControlError> {
    let config = Config::from_args(&cli.connection, &cli.behaviour)?;
    logger.info(
        "Starting run",
        Some(&json!({
            "action": cli.action.to_string(),
            "instance_name": config.instance_name,
            "dry_run": config.dry_run,
            "wait": config.wait.is_some(),
        })),
    );

    let controller = Controller::new(config, logger.clone())?;
    let outcome = controller.run(cli.action).await?;
    report::print(&outcome, cli.behaviour.output)
}
