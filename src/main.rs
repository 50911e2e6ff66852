use anyhow::Result;
use clap::Parser;

use agreement_flow::cli::commands::attach::AttachCommand;
use agreement_flow::cli::commands::create::CreateCommand;
use agreement_flow::cli::commands::discard::DiscardCommand;
use agreement_flow::cli::commands::list::ListCommand;
use agreement_flow::cli::commands::retry::RetryHandoffsCommand;
use agreement_flow::cli::commands::show::ShowCommand;
use agreement_flow::cli::commands::step::{CompleteStepCommand, RecordStepCommand};
use agreement_flow::cli::commands::{show_how_to_get_started, Command, CommandContext};
use agreement_flow::cli::{Cli, Commands};
use agreement_flow::config::config;
use agreement_flow::errors::{to_exit_code, AgreementError};
use agreement_flow::service::AgreementService;
use agreement_flow::telemetry::init_telemetry;

fn main() {
    let cli = Cli::parse();

    let result = tokio::runtime::Runtime::new()
        .map_err(anyhow::Error::from)
        .and_then(|runtime| runtime.block_on(run(cli)));

    if let Err(e) = result {
        eprintln!("❌ {e:#}");
        let code = e
            .downcast_ref::<AgreementError>()
            .map(to_exit_code)
            .unwrap_or(1);
        std::process::exit(code);
    }
}

async fn run(cli: Cli) -> Result<()> {
    // Default behavior: no subcommand - explain how to get started
    let Some(command) = cli.command else {
        return show_how_to_get_started();
    };

    let mut settings = config()?.clone();
    if let Some(data_dir) = cli.data_dir {
        settings.storage.data_dir = data_dir;
    }
    init_telemetry(&settings.observability)?;

    let ctx = CommandContext {
        service: AgreementService::from_config(&settings).await?,
        json: cli.json,
    };

    match command {
        Commands::Create {
            client,
            agreement_type,
            title,
            description,
            start,
            end,
            amount,
        } => {
            CreateCommand {
                client,
                agreement_type,
                title,
                description,
                start,
                end,
                amount,
            }
            .execute(&ctx)
            .await
        }
        Commands::RecordStep {
            id,
            ordinal,
            date,
            notes,
            attachment,
            approve,
            reject,
        } => {
            let approved = match (approve, reject) {
                (true, _) => Some(true),
                (_, true) => Some(false),
                _ => None,
            };
            RecordStepCommand {
                id,
                ordinal,
                date,
                notes,
                attachment,
                approved,
            }
            .execute(&ctx)
            .await
        }
        Commands::Attach { id, ordinal, file } => {
            AttachCommand { id, ordinal, file }.execute(&ctx).await
        }
        Commands::CompleteStep { id, ordinal } => {
            CompleteStepCommand { id, ordinal }.execute(&ctx).await
        }
        Commands::Show { id } => ShowCommand { id }.execute(&ctx).await,
        Commands::List {
            status,
            client,
            pending_handoff,
            limit,
            after,
        } => {
            ListCommand {
                status,
                client,
                pending_handoff,
                limit,
                after,
            }
            .execute(&ctx)
            .await
        }
        Commands::Discard { id } => DiscardCommand { id }.execute(&ctx).await,
        Commands::RetryHandoffs => RetryHandoffsCommand.execute(&ctx).await,
    }
}
