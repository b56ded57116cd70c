use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;

use chrono::{DateTime, TimeZone};
use serde::Serialize;

pub fn render<T: Serialize>(data: &T, format: &str) -> Result<String, Box<dyn std::error::Error>> {
    let text = match format {
        "yaml" => serde_yaml::to_string(data)?,
        "json" | "pretty" | _ => serde_json::to_string_pretty(data)?,
    };
    Ok(text)
}

/// Print to stdout, or write to `output` when given.
pub fn output_data<T: Serialize>(
    data: &T,
    format: &str,
    output: Option<&Path>,
) -> Result<(), Box<dyn std::error::Error>> {
    let text = render(data, format)?;
    match output {
        Some(path) => {
            fs::write(path, text.trim_end().to_string() + "\n")?;
            print_success(&format!("Wrote {}", path.display()));
        }
        None => println!("{}", text.trim_end()),
    }
    Ok(())
}

/// Append `<filename>,<YYYYmmddHHMM>` to the collection log.
pub fn append_collection_log<Tz>(
    log: &Path,
    filename: &str,
    at: &DateTime<Tz>,
) -> std::io::Result<()>
where
    Tz: TimeZone,
    Tz::Offset: std::fmt::Display,
{
    let mut file = OpenOptions::new().create(true).append(true).open(log)?;
    writeln!(file, "{},{}", filename, at.format("%Y%m%d%H%M"))
}

pub fn print_success(message: &str) {
    println!("✅ {}", message);
}

pub fn print_error(message: &str) {
    eprintln!("\x1b[31m❌ Error: {}\x1b[0m", message);
}

pub fn print_warning(message: &str) {
    println!("\x1b[33m⚠️  Warning: {}\x1b[0m", message);
}

pub fn print_info(message: &str) {
    println!("ℹ️  {}", message);
}
