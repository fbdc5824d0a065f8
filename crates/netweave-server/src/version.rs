// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

/// Build information for the `version` subcommand and startup log.
#[derive(Debug, Clone, Copy)]
pub struct BuildInfo {
	pub version: &'static str,
	pub platform: &'static str,
	pub arch: &'static str,
}

impl BuildInfo {
	pub fn current() -> Self {
		Self {
			version: env!("CARGO_PKG_VERSION"),
			platform: std::env::consts::OS,
			arch: std::env::consts::ARCH,
		}
	}
}

pub fn format_version_info() -> String {
	let info = BuildInfo::current();
	format!(
		"netweave-server version: {}\n\
         Platform:                {}-{}",
		info.version, info.arch, info.platform,
	)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn version_info_names_the_crate_version() {
		let text = format_version_info();
		assert!(text.contains(env!("CARGO_PKG_VERSION")));
		assert_eq!(text.lines().count(), 2);
	}
}
