use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use uuid::Uuid;

pub mod commands;

#[derive(Parser)]
#[command(name = "agreement-flow")]
#[command(about = "Eight-step agreement approval workflow with project handoff")]
#[command(long_about = "Tracks agreements from negotiation to operational handover. \
                       Completing the final step hands the agreement to the project intake. \
                       Start with 'agreement-flow create'.")]
pub struct Cli {
    /// Print machine readable JSON instead of text
    #[arg(long, global = true)]
    pub json: bool,

    /// Data directory (overrides storage.data_dir)
    #[arg(long, global = true, value_name = "DIR")]
    pub data_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create a new agreement at step 1
    Create {
        #[arg(long)]
        client: String,
        #[arg(long = "type", value_name = "TYPE")]
        agreement_type: String,
        #[arg(long)]
        title: String,
        #[arg(long)]
        description: Option<String>,
        /// Start of the agreement period (YYYY-MM-DD)
        #[arg(long)]
        start: Option<NaiveDate>,
        /// End of the agreement period (YYYY-MM-DD)
        #[arg(long)]
        end: Option<NaiveDate>,
        #[arg(long)]
        amount: Option<f64>,
    },
    /// Record date, notes, attachment or approval on a step
    RecordStep {
        id: Uuid,
        ordinal: u8,
        #[arg(long)]
        date: Option<NaiveDate>,
        #[arg(long)]
        notes: Option<String>,
        /// Reference of an already stored attachment
        #[arg(long)]
        attachment: Option<String>,
        #[arg(long, conflicts_with = "reject")]
        approve: bool,
        #[arg(long)]
        reject: bool,
    },
    /// Upload a file for a step and record its reference
    Attach {
        id: Uuid,
        ordinal: u8,
        file: PathBuf,
    },
    /// Complete the current step; completing step 8 hands the agreement off
    CompleteStep { id: Uuid, ordinal: u8 },
    /// Show one agreement with its step checklist
    Show { id: Uuid },
    /// List agreements
    List {
        /// ACTIVE or COMPLETED
        #[arg(long)]
        status: Option<String>,
        #[arg(long)]
        client: Option<String>,
        /// Only completed agreements still waiting for their handoff
        #[arg(long)]
        pending_handoff: bool,
        #[arg(long, default_value = "50")]
        limit: usize,
        /// Continue after this cursor from a previous page
        #[arg(long)]
        after: Option<String>,
    },
    /// Delete an agreement
    Discard { id: Uuid },
    /// Re-attempt the handoff of completed agreements not yet transferred
    RetryHandoffs,
}
