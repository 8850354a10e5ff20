use clap::{ArgGroup, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "nudge", version, about = "Reminders that fire on time")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Queue a new reminder
    #[command(group(ArgGroup::new("when").required(true).args(["at", "in_minutes"])))]
    Add {
        /// Text shown when the reminder fires
        message: String,
        /// Time of day in HH:MM (a time already past today means tomorrow)
        #[arg(long)]
        at: Option<String>,
        /// Date in DD-MM-YYYY (defaults to today)
        #[arg(long, requires = "at")]
        date: Option<String>,
        /// Fire this many minutes from now
        #[arg(long = "in", value_name = "MINUTES")]
        in_minutes: Option<i64>,
    },
    /// List upcoming reminders
    List {
        /// Include reminders that are already due
        #[arg(long)]
        all: bool,
    },
    /// Change a reminder's message or time
    Edit {
        /// Reminder id, id prefix or list position
        task: String,
        /// New message
        #[arg(long)]
        message: Option<String>,
        /// New time of day (HH:MM)
        #[arg(long)]
        at: Option<String>,
        /// New date (DD-MM-YYYY)
        #[arg(long)]
        date: Option<String>,
    },
    /// Remove a reminder
    Delete {
        /// Reminder id, id prefix or list position
        task: String,
    },
    /// Mark a reminder as done (removes it)
    Complete {
        /// Reminder id, id prefix or list position
        task: String,
    },
    /// Push a reminder to a few minutes from now
    Snooze {
        /// Reminder id, id prefix or list position
        task: String,
        /// Minutes from now (defaults to the configured snooze)
        #[arg(long)]
        minutes: Option<i64>,
    },
    /// Launch the interactive TUI
    Tui,
}
