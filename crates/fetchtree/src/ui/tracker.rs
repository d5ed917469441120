use std::sync::LazyLock;
use std::sync::atomic::{AtomicBool, Ordering};

use fetchtree_core::{FetchError, Listener, Node, Resource};
use indicatif::{ProgressBar, ProgressStyle};

const PB_STYLE: &str =
    "{spinner:.blue} [{elapsed_precise}] {wide_bar:.cyan/blue} {pos:>3}% {wide_msg}";

const TICK: &str = "⠁⠂⠄⡀⢀⠠⠐⠈ ";

const PB_CHARS: &str = "█▓▒░  ";

static PB_TEMPLATE: LazyLock<Option<ProgressStyle>> = LazyLock::new(|| {
    let pb_style = match ProgressStyle::with_template(PB_STYLE) {
        Ok(pb_style) => pb_style.tick_chars(TICK).progress_chars(PB_CHARS),
        Err(_) => return None,
    };

    Some(pb_style)
});

/// Renders a node's reports as a percent bar.
///
/// Nodes that never report a percentage still show activity messages and
/// received byte counts on a spinner.
pub struct ProgressTracker {
    pb:          ProgressBar,
    has_percent: AtomicBool,
}

impl ProgressTracker {
    pub fn new() -> Self {
        let pb = ProgressBar::new(100);
        if let Some(style) = PB_TEMPLATE.as_ref() {
            pb.set_style(style.clone());
        }
        Self {
            pb,
            has_percent: AtomicBool::new(false),
        }
    }

    pub fn finish(&self, msg: Option<String>) {
        match msg {
            Some(msg) => self.pb.finish_with_message(msg),
            None => self.pb.finish(),
        }
    }
}

impl Default for ProgressTracker {
    fn default() -> Self { Self::new() }
}

impl Listener for ProgressTracker {
    fn report_activity(&self, _node: &Node, activity: &str) {
        self.pb.set_message(activity.to_string());
    }

    fn report_percent_complete(&self, _node: &Node, percent: u8) {
        self.has_percent.store(true, Ordering::Relaxed);
        self.pb.set_position(u64::from(percent.min(100)));
    }

    fn report_amount_complete(&self, _node: &Node, bytes: u64) {
        if !self.has_percent.load(Ordering::Relaxed) {
            self.pb.set_message(format!("{bytes} bytes"));
            self.pb.tick();
        }
    }

    fn completed(&self, _node: &Node, _resource: &Resource) -> bool {
        self.pb.set_position(100);
        true
    }

    fn failed(&self, _node: &Node, error: &FetchError) {
        self.pb.abandon_with_message(error.to_string());
    }
}
