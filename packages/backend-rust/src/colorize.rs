//! `[color]` markup for CLI output.

use std::collections::HashMap;
use std::sync::{Arc, LazyLock};

use regex::{Captures, Regex};

static CODE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\[([a-z0-9_\-]+)\]").expect("color code pattern is a valid regex")
});

static DEFAULT_COLORS: LazyLock<Arc<HashMap<String, String>>> = LazyLock::new(|| {
    let table: &[(&str, &str)] = &[
        ("default", "39"),
        ("_default_", "49"),
        ("black", "30"),
        ("red", "31"),
        ("green", "32"),
        ("yellow", "33"),
        ("blue", "34"),
        ("magenta", "35"),
        ("cyan", "36"),
        ("light_gray", "37"),
        ("dark_gray", "90"),
        ("light_red", "91"),
        ("light_green", "92"),
        ("light_yellow", "93"),
        ("light_blue", "94"),
        ("light_magenta", "95"),
        ("light_cyan", "96"),
        ("white", "97"),
        ("_black_", "40"),
        ("_red_", "41"),
        ("_green_", "42"),
        ("_yellow_", "43"),
        ("_blue_", "44"),
        ("_magenta_", "45"),
        ("_cyan_", "46"),
        ("_light_gray_", "47"),
        ("_dark_gray_", "100"),
        ("_light_red_", "101"),
        ("_light_green_", "102"),
        ("_light_yellow_", "103"),
        ("_light_blue_", "104"),
        ("_light_magenta_", "105"),
        ("_light_cyan_", "106"),
        ("_white_", "107"),
        ("bold", "1"),
        ("dim", "2"),
        ("underline", "4"),
        ("blink_slow", "5"),
        ("blink_fast", "6"),
        ("invert", "7"),
        ("hidden", "8"),
        ("reset", "0"),
        ("reset_bold", "21"),
    ];
    Arc::new(
        table
            .iter()
            .map(|(name, code)| ((*name).to_string(), (*code).to_string()))
            .collect(),
    )
});

/// Replaces `[name]` codes in text with ANSI escape sequences.
///
/// A disabled colorizer strips known codes instead, so the same markup can
/// be rendered to a terminal or a log file. Brackets that do not name a
/// known code are left alone.
#[derive(Debug, Clone)]
pub struct Colorize {
    colors: Arc<HashMap<String, String>>,
    disable: bool,
    reset: bool,
}

impl Colorize {
    /// Enabled colorizer with the default table, appending a reset after
    /// colored output.
    #[must_use]
    pub fn new() -> Self {
        Self {
            colors: Arc::clone(&*DEFAULT_COLORS),
            disable: false,
            reset: true,
        }
    }

    /// Pass-through colorizer with the default table.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            disable: true,
            ..Self::new()
        }
    }

    /// Replace the color table. Names are matched case-insensitively.
    #[must_use]
    pub fn with_colors(mut self, colors: HashMap<String, String>) -> Self {
        self.colors = Arc::new(
            colors
                .into_iter()
                .map(|(name, code)| (name.to_ascii_lowercase(), code))
                .collect(),
        );
        self
    }

    #[must_use]
    pub fn with_reset(mut self, reset: bool) -> Self {
        self.reset = reset;
        self
    }

    #[must_use]
    pub fn is_disabled(&self) -> bool {
        self.disable
    }

    /// Render `text`.
    #[must_use]
    pub fn color(&self, text: &str) -> String {
        let mut colored = false;
        let out = CODE_PATTERN.replace_all(text, |caps: &Captures<'_>| {
            let name = caps[1].to_ascii_lowercase();
            match self.colors.get(&name) {
                Some(_) if self.disable => String::new(),
                Some(code) => {
                    colored = true;
                    format!("\x1b[{code}m")
                }
                None => caps[0].to_string(),
            }
        });

        let mut out = out.into_owned();
        if colored && self.reset {
            out.push_str("\x1b[0m");
        }
        out
    }
}

impl Default for Colorize {
    fn default() -> Self {
        Self::new()
    }
}
