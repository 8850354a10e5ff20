mod cli;
mod commands;
mod ui;

use anyhow::Result;
use clap::Parser;
use nudge::logging;

fn main() -> Result<()> {
    let args = cli::Cli::parse();
    let command = args.command.unwrap_or(cli::Command::Tui);
    if !matches!(command, cli::Command::Tui) {
        logging::init_stderr("warn");
    }
    let ctx = commands::Context::load();
    match command {
        cli::Command::Add {
            message,
            at,
            date,
            in_minutes,
        } => commands::add(&ctx, message, at, date, in_minutes),
        cli::Command::List { all } => commands::list(&ctx, all),
        cli::Command::Edit {
            task,
            message,
            at,
            date,
        } => commands::edit(&ctx, task, message, at, date),
        cli::Command::Delete { task } => commands::delete(&ctx, task),
        cli::Command::Complete { task } => commands::complete(&ctx, task),
        cli::Command::Snooze { task, minutes } => commands::snooze(&ctx, task, minutes),
        cli::Command::Tui => commands::tui(ctx),
    }
}
