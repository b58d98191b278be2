use tokio::signal::unix::{signal, SignalKind};

/// Resolves on the next SIGINT or SIGTERM.
pub async fn wait_for_shutdown_signal() {
	let mut interrupt = signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");
	let mut terminate = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");

	tokio::select! {
		_ = interrupt.recv() => {}
		_ = terminate.recv() => {}
	}
}

/// Parses durations like `90s`, `30m`, `12h` or `7d`.
pub fn parse_duration(value: &str) -> Result<std::time::Duration, String> {
	let value = value.trim();
	let split = value.len().saturating_sub(1);
	let (amount, unit) = value.split_at(split);

	let amount: u64 = amount
		.parse()
		.map_err(|_| format!("invalid duration: {value:?}"))?;

	let seconds = match unit {
		"s" => amount,
		"m" => amount * 60,
		"h" => amount * 60 * 60,
		"d" => amount * 24 * 60 * 60,
		_ => return Err(format!("invalid duration unit in {value:?}")),
	};

	Ok(std::time::Duration::from_secs(seconds))
}

#[cfg(test)]
mod tests {
	use super::*;

	use std::time::Duration;

	#[test]
	fn parses_suffixed_durations() {
		assert_eq!(parse_duration("90s").unwrap(), Duration::from_secs(90));
		assert_eq!(parse_duration("30m").unwrap(), Duration::from_secs(1800));
		assert_eq!(parse_duration("12h").unwrap(), Duration::from_secs(43200));
		assert_eq!(parse_duration("7d").unwrap(), Duration::from_secs(604800));
	}

	#[test]
	fn rejects_malformed_durations() {
		assert!(parse_duration("").is_err());
		assert!(parse_duration("h").is_err());
		assert!(parse_duration("10x").is_err());
		assert!(parse_duration("ten-minutes").is_err());
	}
}
