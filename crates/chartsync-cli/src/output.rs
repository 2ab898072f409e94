//! Output formatting for human and JSON consumers

/// Output format selector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Human,
    Json,
}

impl OutputFormat {
    /// Returns true when structured output was requested
    pub fn is_json(&self) -> bool {
        matches!(self, OutputFormat::Json)
    }
}

/// Sink for command output, selected by the global `--json` flag
pub trait OutputFormatter {
    /// Reports a completed action
    fn success(&self, message: &str);
    /// Reports a failure, on stderr
    fn error(&self, message: &str);
    /// Reports a non-fatal problem, on stderr
    fn warn(&self, message: &str);
    /// Prints an indented detail line (human output only)
    fn info(&self, message: &str);
    /// Prints a structured document (JSON output only)
    fn print_json(&self, value: &serde_json::Value);
}

/// Checkmark-and-indent formatter for terminals
pub struct HumanFormatter;

impl OutputFormatter for HumanFormatter {
    fn success(&self, message: &str) {
        println!("\u{2713} {message}");
    }

    fn error(&self, message: &str) {
        eprintln!("\u{2717} Error: {message}");
    }

    fn warn(&self, message: &str) {
        eprintln!("\u{26a0} Warning: {message}");
    }

    fn info(&self, message: &str) {
        println!("  {message}");
    }

    fn print_json(&self, _value: &serde_json::Value) {}
}

/// Formatter emitting one JSON document per message
pub struct JsonFormatter;

impl OutputFormatter for JsonFormatter {
    fn success(&self, message: &str) {
        println!(
            "{}",
            serde_json::json!({"success": true, "message": message})
        );
    }

    fn error(&self, message: &str) {
        eprintln!(
            "{}",
            serde_json::json!({"success": false, "error": message})
        );
    }

    fn warn(&self, message: &str) {
        eprintln!(
            "{}",
            serde_json::json!({"level": "warning", "message": message})
        );
    }

    fn info(&self, _message: &str) {}

    fn print_json(&self, value: &serde_json::Value) {
        println!(
            "{}",
            serde_json::to_string_pretty(value).unwrap_or_default()
        );
    }
}

pub fn get_formatter(json: bool) -> Box<dyn OutputFormatter> {
    if json {
        Box::new(JsonFormatter)
    } else {
        Box::new(HumanFormatter)
    }
}
