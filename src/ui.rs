//! Terminal output for guise: labels, tables, spinners.
//!
//! Color is disabled, in priority order, by:
//! 1. the `--no-color` flag
//! 2. `NO_COLOR` (any value)
//! 3. `TERM=dumb`
//! 4. `--color never`, or `--color auto` with a non-TTY stdout

use anstream::{eprintln, println};
use anstyle::{AnsiColor, Color, Style};
use comfy_table::{Attribute, Cell, ContentArrangement, Table, presets};
use indicatif::{ProgressBar, ProgressStyle};
use std::borrow::Cow;
use std::io::IsTerminal;
use std::time::Duration;

/// When to emit ANSI colors
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum ColorMode {
    Always,
    #[default]
    Auto,
    Never,
}

/// Semantic color of a piece of output
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tone {
    Good,
    Caution,
    Bad,
    Note,
    Muted,
}

impl Tone {
    fn ansi(self) -> AnsiColor {
        match self {
            Tone::Good => AnsiColor::Green,
            Tone::Caution => AnsiColor::Yellow,
            Tone::Bad => AnsiColor::Red,
            Tone::Note => AnsiColor::Magenta,
            Tone::Muted => AnsiColor::BrightBlack,
        }
    }

    fn table_color(self) -> comfy_table::Color {
        match self {
            Tone::Good => comfy_table::Color::Green,
            Tone::Caution => comfy_table::Color::Yellow,
            Tone::Bad => comfy_table::Color::Red,
            Tone::Note => comfy_table::Color::Magenta,
            Tone::Muted => comfy_table::Color::DarkGrey,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Ui {
    pub color_enabled: bool,
    /// Spinners need both color and a TTY
    pub spinner_enabled: bool,
}

impl Default for Ui {
    fn default() -> Self {
        Self::new(ColorMode::Auto, false)
    }
}

impl Ui {
    pub fn new(mode: ColorMode, force_no_color: bool) -> Self {
        let color_enabled = Self::resolve_color(mode, force_no_color);
        let spinner_enabled = color_enabled && std::io::stdout().is_terminal();

        if !color_enabled {
            anstream::ColorChoice::write_global(anstream::ColorChoice::Never);
        }

        Self {
            color_enabled,
            spinner_enabled,
        }
    }

    fn resolve_color(mode: ColorMode, force_no_color: bool) -> bool {
        if force_no_color || std::env::var_os("NO_COLOR").is_some() {
            return false;
        }
        if std::env::var("TERM").is_ok_and(|t| t == "dumb") {
            return false;
        }

        match mode {
            ColorMode::Always => true,
            ColorMode::Never => false,
            ColorMode::Auto => std::io::stdout().is_terminal(),
        }
    }

    fn style(&self, tone: Tone) -> Style {
        if self.color_enabled {
            Style::new().fg_color(Some(Color::Ansi(tone.ansi())))
        } else {
            Style::new()
        }
    }

    // Labelled status lines

    pub fn ok(&self, msg: impl AsRef<str>) {
        let label = self.style(Tone::Good).bold();
        println!("{label}OK{label:#} {}", msg.as_ref());
    }

    pub fn warn(&self, msg: impl AsRef<str>) {
        let label = self.style(Tone::Caution).bold();
        println!("{label}WARN{label:#} {}", msg.as_ref());
    }

    /// Errors go to stderr
    pub fn err(&self, msg: impl AsRef<str>) {
        let label = self.style(Tone::Bad).bold();
        eprintln!("{label}ERROR{label:#} {}", msg.as_ref());
    }

    pub fn info(&self, msg: impl AsRef<str>) {
        let label = self.style(Tone::Note).bold();
        println!("{label}INFO{label:#} {}", msg.as_ref());
    }

    // Inline styling

    pub fn paint(&self, s: impl AsRef<str>, tone: Tone) -> String {
        if self.color_enabled {
            let st = self.style(tone);
            format!("{st}{}{st:#}", s.as_ref())
        } else {
            s.as_ref().to_string()
        }
    }

    pub fn bold(&self, s: impl AsRef<str>) -> String {
        if self.color_enabled {
            let st = Style::new().bold();
            format!("{st}{}{st:#}", s.as_ref())
        } else {
            s.as_ref().to_string()
        }
    }

    /// Status glyph, with an ASCII fallback when color is off
    pub fn icon(&self, tone: Tone) -> &'static str {
        match (tone, self.color_enabled) {
            (Tone::Good, true) => "✓",
            (Tone::Good, false) => "[OK]",
            (Tone::Caution, true) => "⚠",
            (Tone::Caution, false) => "[!]",
            (Tone::Bad, true) => "✗",
            (Tone::Bad, false) => "[X]",
            (Tone::Note | Tone::Muted, true) => "•",
            (Tone::Note | Tone::Muted, false) => "-",
        }
    }

    /// Marker for the active profile in lists
    pub fn active_marker(&self) -> &'static str {
        if self.color_enabled { "●" } else { "*" }
    }

    // Tables

    /// Bordered table
    pub fn table(&self) -> Table {
        let mut table = Table::new();
        table.set_content_arrangement(ContentArrangement::Dynamic);
        if self.color_enabled {
            table.load_preset(presets::UTF8_FULL_CONDENSED);
        } else {
            table.load_preset(presets::ASCII_MARKDOWN);
        }
        table
    }

    /// Borderless table for key/value blocks and short lists
    pub fn simple_table(&self) -> Table {
        let mut table = Table::new();
        table.set_content_arrangement(ContentArrangement::Dynamic);
        table.load_preset(presets::NOTHING);
        table
    }

    pub fn cell(&self, content: impl Into<String>) -> Cell {
        Cell::new(content.into())
    }

    pub fn header_cell(&self, content: impl Into<String>) -> Cell {
        let cell = Cell::new(content.into());
        if self.color_enabled {
            cell.add_attribute(Attribute::Bold)
        } else {
            cell
        }
    }

    /// Colored through comfy-table itself so column widths stay right
    pub fn tone_cell(&self, content: impl Into<String>, tone: Tone) -> Cell {
        let cell = Cell::new(content.into());
        if self.color_enabled {
            cell.fg(tone.table_color())
        } else {
            cell
        }
    }

    // Spinners

    /// Spinner for filesystem work; hidden when spinners are disabled
    pub fn spinner(&self, message: impl Into<Cow<'static, str>>) -> ProgressBar {
        let pb = if self.spinner_enabled {
            let pb = ProgressBar::new_spinner();
            if let Ok(style) = ProgressStyle::default_spinner()
                .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏")
                .template("{spinner:.magenta} {msg}")
            {
                pb.set_style(style);
            }
            pb.enable_steady_tick(Duration::from_millis(80));
            pb
        } else {
            ProgressBar::hidden()
        };
        pb.set_message(message);
        pb
    }

    pub fn spinner_finish_ok(&self, pb: &ProgressBar, msg: impl Into<Cow<'static, str>>) {
        self.finish(pb, Tone::Good, msg.into());
    }

    pub fn spinner_finish_err(&self, pb: &ProgressBar, msg: impl Into<Cow<'static, str>>) {
        self.finish(pb, Tone::Bad, msg.into());
    }

    fn finish(&self, pb: &ProgressBar, tone: Tone, msg: Cow<'static, str>) {
        if !self.spinner_enabled {
            pb.finish_and_clear();
            match tone {
                Tone::Bad => self.err(msg),
                _ => self.ok(msg),
            }
            return;
        }

        if let Ok(style) = ProgressStyle::default_spinner().template("{msg}") {
            pb.set_style(style);
        }
        let icon = self.paint(self.icon(tone), tone);
        pb.finish_with_message(format!("{icon} {msg}"));
    }

    // Plain output

    pub fn println(&self, msg: impl AsRef<str>) {
        println!("{}", msg.as_ref());
    }

    pub fn newline(&self) {
        println!();
    }

    pub fn section(&self, title: impl AsRef<str>) {
        println!("{}", self.bold(title));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_force_no_color_wins() {
        let ui = Ui::new(ColorMode::Always, true);
        assert!(!ui.color_enabled);
        assert!(!ui.spinner_enabled);
    }

    #[test]
    fn test_never_mode() {
        let ui = Ui::new(ColorMode::Never, false);
        assert!(!ui.color_enabled);
    }

    #[test]
    fn test_plain_icons() {
        let ui = Ui::new(ColorMode::Never, false);
        assert_eq!(ui.icon(Tone::Good), "[OK]");
        assert_eq!(ui.icon(Tone::Bad), "[X]");
        assert_eq!(ui.icon(Tone::Caution), "[!]");
        assert_eq!(ui.icon(Tone::Muted), "-");
        assert_eq!(ui.active_marker(), "*");
    }

    #[test]
    fn test_paint_without_color_is_identity() {
        let ui = Ui::new(ColorMode::Never, false);
        assert_eq!(ui.paint("codex", Tone::Good), "codex");
        assert_eq!(ui.bold("codex"), "codex");
    }

    #[test]
    fn test_tables_render() {
        let ui = Ui::new(ColorMode::Never, false);
        let mut table = ui.table();
        table.set_header(vec![ui.header_cell("Tool")]);
        table.add_row(vec![ui.tone_cell("codex", Tone::Good)]);
        assert!(table.to_string().contains("codex"));
    }

    #[test]
    fn test_hidden_spinner() {
        let ui = Ui::new(ColorMode::Never, false);
        let pb = ui.spinner("switching");
        ui.spinner_finish_ok(&pb, "done");
        assert!(pb.is_finished());
    }
}
