//! Colored output helpers for CLI
//!
//! Provides consistent, colored terminal output for the MarketScout CLI.

use owo_colors::OwoColorize;

use crate::events::{EventPayload, SessionEvent};

/// Output style configuration
pub struct Output {
    /// Whether to use colored output
    pub colored: bool,
}

impl Default for Output {
    fn default() -> Self {
        Self::new()
    }
}

impl Output {
    /// Create a new output helper with colors enabled
    pub fn new() -> Self {
        Self { colored: true }
    }

    /// Create a new output helper with colors disabled
    pub fn no_color() -> Self {
        Self { colored: false }
    }

    /// Print the MarketScout banner
    pub fn banner(&self) {
        if self.colored {
            println!(
                "\n   {} {}\n   {}\n",
                "MarketScout".bright_cyan().bold(),
                format!("v{}", env!("CARGO_PKG_VERSION")).dimmed(),
                "Multi-agent market research".bright_white()
            );
        } else {
            println!(
                "\n   MarketScout v{}\n   Multi-agent market research\n",
                env!("CARGO_PKG_VERSION")
            );
        }
    }

    /// Print an info message
    pub fn info(&self, message: &str) {
        if self.colored {
            println!("  {} {}", "•".blue(), message);
        } else {
            println!("  [INFO] {}", message);
        }
    }

    /// Print a warning message
    pub fn warning(&self, message: &str) {
        if self.colored {
            println!("  {} {}", "⚠".yellow().bold(), message.yellow());
        } else {
            println!("  [WARN] {}", message);
        }
    }

    /// Print an error message
    pub fn error(&self, message: &str) {
        if self.colored {
            eprintln!("  {} {}", "✗".red().bold(), message.red());
        } else {
            eprintln!("  [ERROR] {}", message);
        }
    }

    /// Print a file creation message
    pub fn created(&self, file_type: &str, path: &str) {
        if self.colored {
            println!(
                "  {} {} {}",
                "✓".green().bold(),
                file_type.dimmed(),
                path.bright_white()
            );
        } else {
            println!("  [CREATED] {} {}", file_type, path);
        }
    }

    /// Print a file skipped message
    pub fn skipped(&self, path: &str, reason: &str) {
        if self.colored {
            println!(
                "  {} {} {}",
                "○".yellow(),
                path.dimmed(),
                format!("({})", reason).yellow()
            );
        } else {
            println!("  [SKIPPED] {} ({})", path, reason);
        }
    }

    /// Print a directory creation message
    pub fn created_dir(&self, path: &str) {
        if self.colored {
            println!(
                "  {} {} {}",
                "✓".green().bold(),
                "directory".dimmed(),
                path.bright_white()
            );
        } else {
            println!("  [CREATED] directory {}", path);
        }
    }

    /// Print a header for a section
    pub fn header(&self, title: &str) {
        if self.colored {
            println!("\n  {}", title.bright_white().bold().underline());
        } else {
            println!("\n  === {} ===", title);
        }
    }

    /// Print a key-value pair
    pub fn kv(&self, key: &str, value: &str) {
        if self.colored {
            println!("    {}: {}", key.dimmed(), value.bright_white());
        } else {
            println!("    {}: {}", key, value);
        }
    }

    /// Print a hint/tip message
    pub fn hint(&self, message: &str) {
        if self.colored {
            println!("\n  {} {}", "💡".dimmed(), message.dimmed().italic());
        } else {
            println!("\n  [TIP] {}", message);
        }
    }

    /// Print a command suggestion
    pub fn command(&self, cmd: &str) {
        if self.colored {
            println!("     {}", format!("$ {}", cmd).bright_cyan());
        } else {
            println!("     $ {}", cmd);
        }
    }

    /// Print completion message
    pub fn complete(&self, message: &str) {
        if self.colored {
            println!("\n  {} {}", "🚀".green(), message.bright_green().bold());
        } else {
            println!("\n  [DONE] {}", message);
        }
    }

    /// Print one session event as a single line
    pub fn event(&self, event: &SessionEvent) {
        let label = format!("{:<15}", event.event_type());
        let detail = describe(&event.payload);
        let seq = format!("[{:>3}]", event.seq);

        if !self.colored {
            println!("  {} {} {}", seq, label, detail);
            return;
        }

        let label = match &event.payload {
            EventPayload::FinalReport { .. } => label.bright_green().bold().to_string(),
            EventPayload::Error { .. } => label.red().bold().to_string(),
            EventPayload::AgentOutput { .. } => label.bright_white().to_string(),
            EventPayload::AgentStarted { .. } | EventPayload::AgentFinished { .. } => {
                label.cyan().to_string()
            }
            _ => label.blue().to_string(),
        };
        println!("  {} {} {}", seq.dimmed(), label, detail);
    }

    /// Print the final memo body
    pub fn memo(&self, markdown: &str) {
        self.header("Report");
        println!();
        for line in markdown.lines() {
            if self.colored && line.starts_with('#') {
                println!("  {}", line.bright_white().bold());
            } else {
                println!("  {}", line);
            }
        }
    }

    /// Print newline
    pub fn newline(&self) {
        println!();
    }
}

/// One-line summary of an event payload.
pub fn describe(payload: &EventPayload) -> String {
    match payload {
        EventPayload::SessionCreated { id } | EventPayload::RunRequested { id } => id.clone(),
        EventPayload::TaskPlanned { tasks, .. } => tasks
            .iter()
            .map(|t| t.agent.to_string())
            .collect::<Vec<_>>()
            .join(" → "),
        EventPayload::AgentStarted { agent } | EventPayload::AgentFinished { agent } => {
            agent.to_string()
        }
        EventPayload::AgentOutput { agent, content, data } => {
            match data.as_ref().and_then(|d| d.get("error")).and_then(|e| e.as_str()) {
                Some(error) => format!("{}: {} ({})", agent, content, error),
                None => format!("{}: {}", agent, content),
            }
        }
        EventPayload::FinalReport { sources, .. } => format!("{} sources", sources.len()),
        EventPayload::Error { message } => message.clone(),
    }
}
