
//! Utilities for creating and styling progress indicators using the `indicatif` crate.
//!
//! Bars are used where the amount of work is known up front, such as the reference genomes
//! of the starter bins. Spinners are used for streaming passes over the contig file.

use indicatif::{ProgressBar, ProgressStyle};

/// Create a progress bar of a specified length with desired styling.
pub fn progress_bar(len: u64) -> ProgressBar {
    let progress_bar = ProgressBar::new(len);
    let style = ProgressStyle::default_bar()
        .template("[{elapsed_precise}] {bar:40.cyan/blue} {percent}% [{human_pos}/{human_len}] [Remaining: {eta}] {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar());
    progress_bar.set_style(style);

    progress_bar
}

/// Create a spinner that counts contigs as a file is streamed.
pub fn contig_spinner(msg: &str) -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    let style = ProgressStyle::default_spinner()
        .template("[{elapsed_precise}] {spinner:.cyan} {human_pos} contigs {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner());
    spinner.set_style(style);
    spinner.set_message(msg.to_string());

    spinner
}
