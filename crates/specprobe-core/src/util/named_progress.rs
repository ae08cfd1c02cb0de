use indicatif::{MultiProgress, ProgressBar, ProgressStyle};

/// Extension trait for creating named progress bars.
pub trait NamedProgress {
    /// Creates a progress bar style with a name label padded to a fixed column.
    fn named_bar(name: &str) -> Self;
}

impl NamedProgress for ProgressStyle {
    fn named_bar(name: &str) -> Self {
        let fmt = format!(
            "{name:<31} {{wide_bar:40.cyan/blue}} {{pos:>5}}/{{len:<5}} [{{elapsed_precise}} ({{eta}} remaining)] {{msg}}"
        );
        ProgressStyle::default_bar()
            .template(&fmt)
            .unwrap_or(ProgressStyle::default_bar())
    }
}

/// Adds a named bar of length `len` to `progress`, if progress reporting is enabled.
pub fn named_progress_bar(
    progress: Option<&MultiProgress>,
    name: &str,
    len: u64,
) -> Option<ProgressBar> {
    progress.map(|p| {
        let bar = p.add(ProgressBar::new(len));
        bar.set_style(ProgressStyle::named_bar(name));
        bar
    })
}
