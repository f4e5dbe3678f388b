use anyhow::{Context, Result};
use time::format_description::FormatItem;
use time::macros::format_description;
use time::UtcOffset;
use tracing_subscriber::fmt::format::{Format, Full};
use tracing_subscriber::fmt::time::OffsetTime;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Default filter: pipeline progress from this crate only.
pub const DEFAULT_FILTER: &str = "tomo_recon=info,reconstruct_tomogram=info";

/// Install the global subscriber. Events go to stderr so the terminal shows
/// progress while stdout stays free.
pub fn init(filter: impl AsRef<str>) -> Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(log_filter(filter)?)
        .event_format(log_format())
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set logging subscriber")?;

    Ok(())
}

fn log_filter(filter: impl AsRef<str>) -> Result<EnvFilter> {
    let filter = filter.as_ref();
    EnvFilter::builder()
        .parse(filter)
        .context(format!("Failed to parse log filter: {}", filter))
}

fn log_format() -> Format<Full, OffsetTime<&'static [FormatItem<'static>]>> {
    let time_format = format_description!(
        version = 2,
        "[year]-[month]-[day] [hour]:[minute]:[second].[subsecond digits:3]"
    );

    let time_offset = UtcOffset::current_local_offset().unwrap_or(UtcOffset::UTC);

    Format::default()
        .with_timer(OffsetTime::new(time_offset, time_format))
        .with_target(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filters_parse() {
        assert!(log_filter(DEFAULT_FILTER).is_ok());
        assert!(log_filter("tomo_recon=debug").is_ok());
        assert!(log_filter("tomo_recon=loud").is_err());
    }
}
