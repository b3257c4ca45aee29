//! Command line configuration
//!
//! Every flag can also be set through a `BUDGET_CHAT_*` environment variable.

use clap::Parser;

/// Default listen address
pub const DEFAULT_BIND: &str = "0.0.0.0:8899";

/// budgetchat TCP chat server
#[derive(Parser, Debug, Clone)]
#[command(name = "budget_chat", version, about = "Line-oriented TCP chat room server")]
pub struct Config {
    /// Address to bind to
    #[arg(short, long, env = "BUDGET_CHAT_BIND", default_value = DEFAULT_BIND)]
    pub bind: String,

    /// Outbound messages buffered per client before it is dropped as too slow
    #[arg(
        long,
        env = "BUDGET_CHAT_QUEUE_CAPACITY",
        default_value_t = 64,
        value_parser = clap::value_parser!(u16).range(1..)
    )]
    pub queue_capacity: u16,

    /// Longest accepted input line in bytes, excluding the newline
    #[arg(
        long,
        env = "BUDGET_CHAT_MAX_LINE_LEN",
        default_value_t = 8192,
        value_parser = clap::value_parser!(u32).range(1000..)
    )]
    pub max_line_len: u32,

    /// Log level (trace, debug, info, warn, error), overridden by RUST_LOG
    #[arg(long, env = "BUDGET_CHAT_LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

impl Config {
    /// Per-client outbound queue capacity
    pub fn queue_capacity(&self) -> usize {
        usize::from(self.queue_capacity)
    }

    /// Input line limit in bytes
    pub fn max_line_len(&self) -> usize {
        self.max_line_len as usize
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: DEFAULT_BIND.to_string(),
            queue_capacity: 64,
            max_line_len: 8192,
            log_level: "info".to_string(),
        }
    }
}
