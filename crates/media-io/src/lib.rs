mod progress;
mod tool;

pub use progress::{parse_line, parse_timestamp, progress_percent, ProgressLine};
pub use tool::{conversion_args, conversion_command, resolve_tool, ToolError};
