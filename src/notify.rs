//! Desktop notifications for fired tasks. Fire-and-forget: no ack, no retry.

use crate::config::NotifySettings;
use std::process::{Command, Stdio};
use std::thread;

pub trait Notifier {
    fn notify(&self, title: &str, body: &str);
}

/// Spawns `notify-send` (or a compatible program) and does not wait for it.
#[derive(Debug, Clone)]
pub struct DesktopNotifier {
    program: String,
    urgency: String,
    timeout_ms: u32,
}

impl DesktopNotifier {
    pub fn new(settings: &NotifySettings) -> Self {
        DesktopNotifier {
            program: settings.program.clone(),
            urgency: settings.urgency.clone(),
            timeout_ms: settings.timeout_ms,
        }
    }

    fn command(&self, title: &str, body: &str) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.arg("-u")
            .arg(&self.urgency)
            .arg("-t")
            .arg(self.timeout_ms.to_string())
            .arg(title)
            .arg(body)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        cmd
    }
}

impl Notifier for DesktopNotifier {
    fn notify(&self, title: &str, body: &str) {
        match self.command(title, body).spawn() {
            Ok(mut child) => {
                tracing::debug!(pid = child.id(), "notification sent");
                // reap in the background so a long-lived daemon leaves no zombies
                thread::spawn(move || {
                    let _ = child.wait();
                });
            }
            Err(err) => tracing::warn!("could not run {}: {err}", self.program),
        }
    }
}

impl<N: Notifier + ?Sized> Notifier for &N {
    fn notify(&self, title: &str, body: &str) {
        (**self).notify(title, body)
    }
}
