//! Terminal output: API replies, diagnostics and transfer progress

use anyhow::Result;
use console::style;
use kracli_core::ResponseEnvelope;

use crate::exit_code::ExitCode;

/// Output settings shared by all handlers
#[derive(Debug, Clone, Copy, Default)]
pub struct OutputConfig {
    /// Suppress progress bars
    pub quiet: bool,
}

/// Render a reply the way every object action reports it: data as indented
/// JSON, otherwise the message if there is one
pub fn render_envelope(envelope: &ResponseEnvelope) -> Result<Option<String>> {
    match envelope {
        ResponseEnvelope::Data(data) => Ok(Some(serde_json::to_string_pretty(data)?)),
        other => Ok(other.msg().map(str::to_string)),
    }
}

/// Print a reply and return the matching exit code
pub fn print_envelope(envelope: &ResponseEnvelope) -> Result<ExitCode> {
    if let Some(text) = render_envelope(envelope)? {
        println!("{}", text);
    }
    Ok(ExitCode::for_envelope(envelope))
}

/// Print a failure to stderr
pub fn print_error(err: &anyhow::Error) {
    eprintln!("{} {:#}", style("error:").red().bold(), err);
}

/// Progress bar wrapper, hidden in quiet mode
#[derive(Debug)]
pub struct ProgressBar {
    bar: Option<indicatif::ProgressBar>,
}

impl ProgressBar {
    /// Byte progress bar; a spinner with a byte counter when the total is unknown
    pub fn new(config: OutputConfig, total: Option<u64>) -> Self {
        if config.quiet {
            return Self { bar: None };
        }

        let bar = match total {
            Some(total) => {
                let bar = indicatif::ProgressBar::new(total);
                let style = indicatif::ProgressStyle::default_bar()
                    .template("{spinner:.green} [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec}, {eta})")
                    .map(|s| s.progress_chars("#>-"))
                    .unwrap_or_else(|_| indicatif::ProgressStyle::default_bar());
                bar.set_style(style);
                bar
            }
            None => {
                let bar = indicatif::ProgressBar::new_spinner();
                let style = indicatif::ProgressStyle::default_spinner()
                    .template("{spinner:.green} {bytes} ({bytes_per_sec})")
                    .unwrap_or_else(|_| indicatif::ProgressStyle::default_spinner());
                bar.set_style(style);
                bar
            }
        };

        Self { bar: Some(bar) }
    }

    pub fn set_position(&self, pos: u64) {
        if let Some(bar) = &self.bar {
            bar.set_position(pos);
        }
    }

    pub fn finish_and_clear(&self) {
        if let Some(bar) = &self.bar {
            bar.finish_and_clear();
        }
    }

    #[cfg(test)]
    fn is_visible(&self) -> bool {
        self.bar.is_some()
    }
}
