//! `rulesmith ask`: phrase commands.

use anyhow::Result;
use clap::Args;
use serde::Serialize;

use crate::cli::context::AppContext;
use crate::cli::intent::parse_intent;
use crate::cli::output::{output, CommandOutput};
use crate::cli::table::TableFormatter;
use crate::services::IntentResponse;

#[derive(Args, Debug)]
pub struct AskArgs {
    /// Phrase, e.g. "run 3 self-improvement canary loops"
    #[arg(required = true, num_args = 1.., trailing_var_arg = true)]
    pub phrase: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct AskOutput {
    pub phrase: String,
    #[serde(flatten)]
    pub response: IntentResponse,
}

impl CommandOutput for AskOutput {
    fn to_human(&self) -> String {
        let formatter = TableFormatter::new();
        match &self.response {
            IntentResponse::Enqueued { batch } => format!(
                "Queued {} {} loop(s) as batch {}",
                batch.requested_count, batch.loop_type, batch.id
            ),
            IntentResponse::Batches { batches } if batches.is_empty() => {
                "No batches found.".to_string()
            }
            IntentResponse::Batches { batches } => formatter.format_batches(batches),
            IntentResponse::Batch { detail } => {
                let mut out = formatter.format_batches(std::slice::from_ref(&detail.batch));
                if !detail.attempts.is_empty() {
                    out.push('\n');
                    out.push_str(&formatter.format_attempts(&detail.attempts));
                }
                out
            }
        }
    }
}

pub async fn execute(args: AskArgs, ctx: &AppContext, json_mode: bool) -> Result<()> {
    let phrase = args.phrase.join(" ");
    let intent = parse_intent(&phrase, ctx.config.batch.max_requested_count)?;
    tracing::debug!(?intent, "parsed phrase");

    let response = ctx.batch_service().handle_intent(intent).await?;
    output(&AskOutput { phrase, response }, json_mode);
    Ok(())
}
