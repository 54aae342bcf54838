use anyhow::{Context, anyhow};
use indicatif::ProgressStyle;
use serde_json::{Map, Value};

use crate::core::render;

pub(crate) fn hex(bytes: &[u8]) -> String {
    use std::fmt::Write;
    let mut acc = String::with_capacity(bytes.len() * 2);

    for byte in bytes {
        // writing into a String can't fail
        let _ = write!(&mut acc, "{:02x}", byte);
    }

    acc
}

pub(crate) fn get_style_rows() -> anyhow::Result<ProgressStyle> {
    Ok(ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}")?
        .progress_chars("=>-"))
}

pub(crate) fn get_style_spinner() -> anyhow::Result<ProgressStyle> {
    Ok(ProgressStyle::default_spinner().template("{spinner:.green} [{elapsed}] {pos} rows {msg}")?)
}

/// Fills a format string with positional and named arguments.
///
/// Supports `{}` (next positional), `{0}` (explicit position), `{name}` and
/// the `{{` / `}}` escapes. Strings are inserted raw and `null` renders as an
/// empty string.
pub fn format_template(template: &str, args: &[Value], kwargs: &Map<String, Value>) -> anyhow::Result<String> {
    let mut out = String::with_capacity(template.len());
    let mut chars = template.chars().peekable();
    let mut next_positional = 0;

    while let Some(c) = chars.next() {
        match c {
            '{' if chars.peek() == Some(&'{') => {
                chars.next();
                out.push('{');
            }
            '}' if chars.peek() == Some(&'}') => {
                chars.next();
                out.push('}');
            }
            '{' => {
                let mut field = String::new();
                loop {
                    match chars.next() {
                        Some('}') => break,
                        Some(c) => field.push(c),
                        None => return Err(anyhow!("unclosed field in format string {template:?}")),
                    }
                }

                let value = if field.is_empty() {
                    let value = args
                        .get(next_positional)
                        .with_context(|| format!("missing positional argument {next_positional}"))?;
                    next_positional += 1;
                    value
                } else if let Ok(position) = field.parse::<usize>() {
                    args.get(position)
                        .with_context(|| format!("missing positional argument {position}"))?
                } else {
                    kwargs
                        .get(&field)
                        .with_context(|| format!("missing named argument {field:?}"))?
                };

                out.push_str(&render(value));
            }
            '}' => return Err(anyhow!("single '}}' in format string {template:?}")),
            c => out.push(c),
        }
    }

    Ok(out)
}

/// Installs a `tracing` subscriber writing to stderr, filtered by `RUST_LOG`.
#[cfg(feature = "logging")]
pub fn init_logging() {
    use tracing_subscriber::EnvFilter;
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init();
}
