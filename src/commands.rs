use crate::ui;
use anyhow::{anyhow, bail, Context as _, Result};
use chrono::{Local, TimeZone};
use nudge::input;
use nudge::model::{sort_by_due, Task};
use nudge::presenter::{format_time_until, pill_for};
use nudge::{Mutations, Settings, TaskStore};

pub struct Context {
    pub settings: Settings,
    pub store: TaskStore,
}

impl Context {
    pub fn load() -> Self {
        let settings = Settings::load();
        let store = TaskStore::open(settings.queue_path()).with_ttl(settings.store.cache_ttl());
        Context { settings, store }
    }
}

pub fn add(
    ctx: &Context,
    message: String,
    at: Option<String>,
    date: Option<String>,
    in_minutes: Option<i64>,
) -> Result<()> {
    let now = Local::now();
    let task = match (at, in_minutes) {
        (Some(at), _) => input::new_task(&message, &at, date.as_deref(), &now)?,
        (None, Some(minutes)) => input::timer_task(&message, minutes, &now)?,
        (None, None) => bail!("either --at or --in is required"),
    };
    if !Mutations::new(&ctx.store).add(task.clone()) {
        bail!("could not write {}", ctx.store.path().display());
    }
    println!(
        "Added {} for {} ({})",
        task.id.as_deref().unwrap_or("-"),
        format_fire(task.fire_at),
        format_time_until(task.fire_at, now.timestamp())
    );
    Ok(())
}

pub fn list(ctx: &Context, all: bool) -> Result<()> {
    let now = Local::now().timestamp();
    let tasks = queue_in_order(&ctx.store);
    let next = tasks.iter().find(|t| t.is_pending(now));
    let pill = pill_for(next, &Local, now);
    match pill.meta {
        Some(meta) => println!("Next: {} ({})", pill.title, meta),
        None => println!("{}", pill.title),
    }
    println!();
    let mut shown = 0;
    for (idx, task) in tasks.iter().enumerate() {
        if !all && !task.is_pending(now) {
            continue;
        }
        print_task(idx + 1, task, now);
        shown += 1;
    }
    if shown == 0 {
        println!("  (no reminders)");
    }
    Ok(())
}

pub fn edit(
    ctx: &Context,
    selector: String,
    message: Option<String>,
    at: Option<String>,
    date: Option<String>,
) -> Result<()> {
    let task = select(&ctx.store, &selector)?;
    let edited = input::edited_task(
        &task,
        message.as_deref(),
        at.as_deref(),
        date.as_deref(),
        &Local::now(),
    )
    .with_context(|| format!("editing {}", selector))?;
    if !Mutations::new(&ctx.store).update(&task, edited.clone()) {
        bail!("could not write {}", ctx.store.path().display());
    }
    println!(
        "Updated \"{}\" for {}",
        edited.message,
        format_fire(edited.fire_at)
    );
    Ok(())
}

pub fn delete(ctx: &Context, selector: String) -> Result<()> {
    let task = select(&ctx.store, &selector)?;
    if !Mutations::new(&ctx.store).delete(&task) {
        bail!("could not write {}", ctx.store.path().display());
    }
    println!("Deleted \"{}\"", task.message);
    Ok(())
}

pub fn complete(ctx: &Context, selector: String) -> Result<()> {
    let task = select(&ctx.store, &selector)?;
    if !Mutations::new(&ctx.store).complete(&task) {
        bail!("could not write {}", ctx.store.path().display());
    }
    println!("Completed \"{}\"", task.message);
    Ok(())
}

pub fn snooze(ctx: &Context, selector: String, minutes: Option<i64>) -> Result<()> {
    let minutes = minutes.unwrap_or(ctx.settings.snooze.minutes);
    input::minutes_ahead(minutes, &Local::now())?;
    let task = select(&ctx.store, &selector)?;
    if !Mutations::new(&ctx.store).snooze(&task, minutes) {
        bail!("could not write {}", ctx.store.path().display());
    }
    println!("Snoozed \"{}\" for {} min", task.message, minutes);
    Ok(())
}

pub fn tui(ctx: Context) -> Result<()> {
    ui::run(ctx.settings, ctx.store)
}

fn queue_in_order(store: &TaskStore) -> Vec<Task> {
    let mut tasks = store.load(true);
    sort_by_due(&mut tasks);
    tasks
}

fn select(store: &TaskStore, selector: &str) -> Result<Task> {
    resolve(&queue_in_order(store), selector)
}

/// Finds a task by list position (1-based), id, or unique id prefix.
fn resolve(tasks: &[Task], selector: &str) -> Result<Task> {
    let selector = selector.trim();
    if let Ok(pos) = selector.parse::<usize>() {
        if let Some(task) = pos.checked_sub(1).and_then(|idx| tasks.get(idx)) {
            return Ok(task.clone());
        }
    }
    if let Some(task) = tasks.iter().find(|t| t.id.as_deref() == Some(selector)) {
        return Ok(task.clone());
    }
    let mut candidates = tasks.iter().filter(|t| {
        t.id
            .as_deref()
            .is_some_and(|id| !selector.is_empty() && id.starts_with(selector))
    });
    match (candidates.next(), candidates.next()) {
        (Some(task), None) => Ok(task.clone()),
        (Some(_), Some(_)) => Err(anyhow!("\"{}\" matches more than one reminder", selector)),
        (None, _) => Err(anyhow!("no reminder matches \"{}\"", selector)),
    }
}

fn format_fire(fire_at: i64) -> String {
    Local
        .timestamp_opt(fire_at, 0)
        .single()
        .map(|dt| dt.format("%d-%m-%Y %H:%M").to_string())
        .unwrap_or_else(|| fire_at.to_string())
}

fn print_task(position: usize, task: &Task, now: i64) {
    println!(
        "{:>3}. {:<12}  {}  {:<10}  {}",
        position,
        task.id.as_deref().unwrap_or("-"),
        format_fire(task.fire_at),
        format_time_until(task.fire_at, now),
        task.message
    );
}
