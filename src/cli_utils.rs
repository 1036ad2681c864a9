use std::fmt::{Display, Formatter, Result as FmtResult};
use std::process;
use std::str::FromStr;

/// Output format for get/list commands.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Json,
    Yaml,
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(OutputFormat::Json),
            "yaml" | "yml" => Ok(OutputFormat::Yaml),
            other => Err(format!("unknown output format '{}': use json or yaml", other)),
        }
    }
}

impl Display for OutputFormat {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            OutputFormat::Json => f.write_str("json"),
            OutputFormat::Yaml => f.write_str("yaml"),
        }
    }
}

/// Exits the program with an error message
pub fn exit_with_error(message: &str) -> ! {
    eprintln!("Error: {}", message);
    process::exit(1);
}

/// Exits the program with an error message and usage information
pub fn exit_with_usage_error(message: &str, usage: &str) -> ! {
    eprintln!("Error: {}", message);
    eprintln!("{}", usage);
    process::exit(1);
}

/// Renders `value` in the requested format.
pub fn format_value<T>(value: &T, format: OutputFormat) -> Result<String, String>
where
    T: serde::Serialize,
{
    match format {
        OutputFormat::Json => serde_json::to_string_pretty(value).map_err(|e| e.to_string()),
        OutputFormat::Yaml => serde_yml::to_string(value).map_err(|e| e.to_string()),
    }
}

/// Prints a value in the requested format or exits with error
pub fn print_formatted_or_exit<T>(value: &T, format: OutputFormat, context: &str)
where
    T: serde::Serialize,
{
    match format_value(value, format) {
        Ok(text) => println!("{}", text.trim_end()),
        Err(e) => exit_with_error(&format!("Failed to format {} as {}: {}", context, format, e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn output_formats() {
        assert_eq!("YAML".parse::<OutputFormat>(), Ok(OutputFormat::Yaml));
        assert_eq!("json".parse::<OutputFormat>(), Ok(OutputFormat::Json));
        assert!("toml".parse::<OutputFormat>().is_err());
        assert_eq!(OutputFormat::default().to_string(), "json");
    }

    #[test]
    fn yaml_rendering() {
        let text = format_value(&json!({"name": "Galley"}), OutputFormat::Yaml).unwrap();
        assert_eq!(text.trim(), "name: Galley");
    }
}
