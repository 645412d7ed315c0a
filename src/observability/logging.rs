use fern::colors::{Color, ColoredLevelConfig};
use log::Level;

/// Initialize fern logging: colored level on stdout, chrono timestamps, and
/// an optional date-based file under `log_dir` when one is configured.
pub fn init_logging(level: Level, log_dir: &str) -> Result<(), fern::InitError> {
	let colors = ColoredLevelConfig::new()
		.error(Color::Red)
		.warn(Color::Yellow)
		.info(Color::Green)
		.debug(Color::BrightBlack)
		.trace(Color::Magenta);

	let mut dispatch = fern::Dispatch::new()
		.format(move |out, message, record| {
			out.finish(format_args!(
				"{} [{}] {}: {}",
				chrono::Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ"),
				colors.color(record.level()),
				record.target(),
				message
			))
		})
		.level(level.to_level_filter())
		.chain(std::io::stdout());

	if !log_dir.is_empty() {
		std::fs::create_dir_all(log_dir)?;
		let prefix = std::path::Path::new(log_dir).join("forseti.log.");
		dispatch = dispatch.chain(fern::DateBased::new(prefix, "%Y-%m-%d"));
	}

	dispatch.apply()?;
	Ok(())
}
