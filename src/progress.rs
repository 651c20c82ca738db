use indicatif::{ProgressBar, ProgressStyle};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::view::{ViewChange, ViewTree};

/// Create a spinner for indeterminate progress
pub fn create_spinner(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    let style = ProgressStyle::default_spinner()
        .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏")
        .template("{spinner:.cyan} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner());
    pb.set_style(style);
    pb.set_message(msg.to_string());
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}

/// Live counters shown next to the spinner.
#[derive(Debug, Default)]
pub struct ViewProgress {
    directories: AtomicU64,
    files: AtomicU64,
    faulted: AtomicU64,
}

impl ViewProgress {
    pub fn directories(&self) -> u64 {
        self.directories.load(Ordering::Relaxed)
    }

    pub fn files(&self) -> u64 {
        self.files.load(Ordering::Relaxed)
    }

    pub fn faulted(&self) -> u64 {
        self.faulted.load(Ordering::Relaxed)
    }

    /// Update the counters from one view change. Returns the name of a newly
    /// added directory, if that is what happened.
    pub fn observe(&self, tree: &ViewTree, change: &ViewChange) -> Option<String> {
        match change {
            ViewChange::Added { id, .. } => {
                let node = tree.node(*id)?;
                if node.is_dir() {
                    self.directories.fetch_add(1, Ordering::Relaxed);
                    return Some(node.name.clone());
                }
                self.files.fetch_add(1, Ordering::Relaxed);
            }
            ViewChange::Faulted { .. } => {
                self.faulted.fetch_add(1, Ordering::Relaxed);
            }
            ViewChange::Cleared => {
                self.directories.store(0, Ordering::Relaxed);
                self.files.store(0, Ordering::Relaxed);
                self.faulted.store(0, Ordering::Relaxed);
            }
            ViewChange::SizeChanged { .. } => {}
        }
        None
    }

    pub fn message(&self, current: &str) -> String {
        format!(
            "{} directories, {} files, {} unreadable | {}",
            self.directories(),
            self.files(),
            self.faulted(),
            current
        )
    }
}

/// Drive `pb` from the changes applied to `tree`.
pub fn follow_view(tree: &mut ViewTree, pb: ProgressBar) -> Arc<ViewProgress> {
    let progress = Arc::new(ViewProgress::default());
    let counters = Arc::clone(&progress);
    tree.subscribe(move |tree, change| {
        if let Some(name) = counters.observe(tree, change) {
            pb.set_message(counters.message(&name));
        }
    });
    progress
}

/// Finish and clear progress bar
pub fn finish_and_clear(pb: &ProgressBar) {
    pb.finish_and_clear();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::path_util::PathStyle;
    use crate::size::Size;

    #[test]
    fn test_counters_follow_view_changes() {
        let mut tree = ViewTree::with_style(PathStyle::Unix);
        let progress = follow_view(&mut tree, ProgressBar::hidden());

        tree.add_dir("/r");
        tree.add_dir("/r/sub");
        tree.add_file("/r/sub/a", Size::new(1));
        tree.set_error("/r/sub");
        tree.set_size("/r", Size::new(1));

        assert_eq!(progress.directories(), 2);
        assert_eq!(progress.files(), 1);
        assert_eq!(progress.faulted(), 1);
        assert_eq!(progress.message("sub"), "2 directories, 1 files, 1 unreadable | sub");

        tree.clear();
        assert_eq!(progress.directories(), 0);
    }
}
