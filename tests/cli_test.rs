//! CLI parsing and command execution against an in-memory database.

mod common;

use clap::Parser;
use serde_json::json;
use uuid::Uuid;

use common::TestEnv;
use rulesmith::cli::commands::{ask, batch, change, proposal, worker};
use rulesmith::cli::commands::change::ChangeCommands;
use rulesmith::cli::commands::proposal::ProposalCommands;
use rulesmith::cli::context::AppContext;
use rulesmith::cli::{Cli, Commands};
use rulesmith::domain::models::{
    AppliedChangeStatus, ApplyMode, BatchStatus, LoopType, PatchAction, Proposal, ProposalKind,
    ProposalPayload,
};
use rulesmith::domain::ports::{AppliedChangeRepository, BatchRepository, ProposalRepository};

fn context(env: &TestEnv) -> AppContext {
    AppContext::with_pool(env.config.clone(), env.pool.clone())
}

#[test]
fn test_parse_change_rollback() {
    let cli = Cli::try_parse_from([
        "rulesmith",
        "change",
        "rollback",
        "1a2b3c",
        "--reason",
        "bad patch",
    ])
    .unwrap();
    match cli.command {
        Commands::Change(args) => match args.command {
            ChangeCommands::Rollback { id, reason } => {
                assert_eq!(id, "1a2b3c");
                assert_eq!(reason, "bad patch");
            }
            other => panic!("unexpected {other:?}"),
        },
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn test_parse_proposal_filters() {
    let cli = Cli::try_parse_from([
        "rulesmith", "proposal", "list", "--status", "applied", "--run", "run-7", "-l", "5",
    ])
    .unwrap();
    let Commands::Proposal(args) = cli.command else { panic!("expected proposal") };
    let ProposalCommands::List { batch, run, status, limit } = args.command;
    assert!(batch.is_none());
    assert_eq!(run.as_deref(), Some("run-7"));
    assert_eq!(status.as_deref(), Some("applied"));
    assert_eq!(limit, 5);
}

#[test]
fn test_ask_requires_a_phrase() {
    assert!(Cli::try_parse_from(["rulesmith", "ask"]).is_err());
}

#[tokio::test]
async fn test_ask_enqueues_batch() {
    let env = TestEnv::new().await;
    let ctx = context(&env);

    let phrase = ["Run", "2", "self-improvement", "full", "loops"];
    let args = ask::AskArgs {
        phrase: phrase.iter().map(|w| w.to_string()).collect(),
    };
    ask::execute(args, &ctx, true).await.unwrap();

    let batches = env.batches.list(10).await.unwrap();
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].requested_count, 2);
    assert_eq!(batches[0].loop_type, LoopType::Full);
    assert_eq!(batches[0].status, BatchStatus::Queued);
}

#[tokio::test]
async fn test_ask_rejects_count_over_cap() {
    let env = TestEnv::new().await;
    let ctx = context(&env);
    let over = env.config.batch.max_requested_count + 1;

    let args = ask::AskArgs {
        phrase: vec![format!("run {over} self-improvement canary loops")],
    };
    let err = ask::execute(args, &ctx, false).await.unwrap_err();
    assert!(err.to_string().contains("exceeds max allowed"));
    assert!(env.batches.list(10).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_batch_commands_by_prefix() {
    let env = TestEnv::new().await;
    let ctx = context(&env);

    let enqueue = batch::BatchArgs {
        command: batch::BatchCommands::Enqueue {
            count: 1,
            loop_type: "canary".to_string(),
            retry_limit: Some(2),
            policy: Some("never".to_string()),
        },
    };
    batch::execute(enqueue, &ctx, true).await.unwrap();
    let queued = env.batches.list(1).await.unwrap().remove(0);
    assert_eq!(queued.retry_limit, 2);

    let prefix = queued.id.to_string()[..8].to_string();
    let show = batch::BatchArgs {
        command: batch::BatchCommands::Show { id: prefix.clone() },
    };
    batch::execute(show, &ctx, true).await.unwrap();
    let cancel = batch::BatchArgs {
        command: batch::BatchCommands::Cancel { id: prefix },
    };
    batch::execute(cancel, &ctx, true).await.unwrap();
    let cancelled = env.batches.get(queued.id).await.unwrap().unwrap();
    assert_eq!(cancelled.status, BatchStatus::Cancelled);

    let bad_type = batch::BatchArgs {
        command: batch::BatchCommands::Enqueue {
            count: 1,
            loop_type: "turbo".to_string(),
            retry_limit: None,
            policy: None,
        },
    };
    assert!(batch::execute(bad_type, &ctx, true).await.is_err());
}

#[tokio::test]
async fn test_change_rollback_command_restores_file() {
    let env = TestEnv::new().await;
    let ctx = context(&env);
    let original = std::fs::read(env.rules_path()).unwrap();

    let patch = Proposal::new(
        ProposalKind::ThresholdPatch,
        ProposalPayload {
            target_slug: "boots".to_string(),
            field: "min_confidence".to_string(),
            action: PatchAction::Set,
            value: json!(0.4),
            reason: "cli".to_string(),
        },
        "cli",
    )
    .with_scope(Uuid::new_v4(), "run-001");
    env.proposals.insert(&patch).await.unwrap();
    let change = ctx.rule_applier().apply(&patch, ApplyMode::Full).await.unwrap();

    let list = change::ChangeArgs {
        command: ChangeCommands::List { limit: 10 },
    };
    change::execute(list, &ctx, true).await.unwrap();
    let rollback = change::ChangeArgs {
        command: ChangeCommands::Rollback {
            id: change.id.to_string()[..8].to_string(),
            reason: "cli test".to_string(),
        },
    };
    change::execute(rollback, &ctx, true).await.unwrap();

    assert_eq!(std::fs::read(env.rules_path()).unwrap(), original);
    let stored = env.changes.get(change.id).await.unwrap().unwrap();
    assert_eq!(stored.status, AppliedChangeStatus::RolledBack);
    let events = env.changes.list_rollback_events(change.id).await.unwrap();
    assert_eq!(events[0].reason, "cli test");

    let listing = proposal::ProposalArgs {
        command: ProposalCommands::List {
            batch: None,
            run: Some("run-001".to_string()),
            status: Some("rolled_back".to_string()),
            limit: 10,
        },
    };
    proposal::execute(listing, &ctx, true).await.unwrap();
}

#[tokio::test]
async fn test_worker_recover_with_nothing_stale() {
    let env = TestEnv::new().await;
    let ctx = context(&env);
    let args = worker::WorkerArgs { command: worker::WorkerCommands::Recover };
    worker::execute(args, &ctx, true).await.unwrap();
}
