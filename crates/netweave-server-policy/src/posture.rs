// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Posture check evaluation.
//!
//! Checks on the same attribute are alternatives: a device passes the
//! attribute when any one of them passes. `os` and `os_family` count as a
//! single attribute. When an attribute fails, every check on it that
//! denied the device becomes a violation.

use std::collections::BTreeMap;

use netweave_common_core::posture::{clean_version, compare_versions};
use netweave_common_core::{DeviceInfo, PostureAttribute, PostureCheck, Severity, Violation};

/// Violations of `device` against `checks`, and the highest severity among
/// them (`Unknown` when compliant).
pub fn evaluate(checks: &[PostureCheck], device: &DeviceInfo) -> (Vec<Violation>, Severity) {
	let mut by_attribute: BTreeMap<PostureAttribute, Vec<&PostureCheck>> = BTreeMap::new();
	for check in checks.iter().filter(|c| c.applies_to(device)) {
		let group = match check.attribute {
			PostureAttribute::OsFamily => PostureAttribute::Os,
			other => other,
		};
		by_attribute.entry(group).or_default().push(check);
	}

	let mut violations = Vec::new();
	for group in by_attribute.values() {
		let denied: Vec<(&PostureCheck, String)> = group
			.iter()
			.filter_map(|c| denial(c, device).map(|reason| (*c, reason)))
			.collect();
		if denied.len() < group.len() {
			continue;
		}
		violations.extend(denied.into_iter().map(|(check, message)| Violation {
			check_id: check.id,
			name: check.name.clone(),
			attribute: check.attribute,
			message,
			severity: check.severity,
		}));
	}

	let severity = violations.iter().map(|v| v.severity).max().unwrap_or_default();
	(violations, severity)
}

/// Why `check` rejects `device`, or `None` if it passes.
pub fn denial(check: &PostureCheck, device: &DeviceInfo) -> Option<String> {
	let minimum = |actual: &str, what: &str| -> Option<String> {
		let min = check.values.first()?;
		compare_versions(clean_version(actual), clean_version(min))
			.is_lt()
			.then(|| format!("{what} '{actual}' is below minimum required version '{min}'"))
	};

	match check.attribute {
		PostureAttribute::ClientLocation => {
			let location = device.client_location.to_uppercase();
			(!check.values.contains(&location))
				.then(|| format!("client location '{}' not allowed", device.client_location))
		}
		PostureAttribute::ClientVersion => minimum(&device.client_version, "client version"),
		PostureAttribute::OsVersion => minimum(&device.os_version, "os version"),
		PostureAttribute::KernelVersion => minimum(&device.kernel_version, "kernel version"),
		PostureAttribute::Os => (!check.values.contains(&device.os))
			.then(|| format!("client os '{}' not allowed", device.os)),
		PostureAttribute::OsFamily => (!check.values.contains(&device.os_family))
			.then(|| format!("os family '{}' not allowed", device.os_family)),
		PostureAttribute::AutoUpdate => {
			let required = check.values.first().is_some_and(|v| v.eq_ignore_ascii_case("true"));
			match (required, device.auto_update) {
				(true, false) => Some("auto update must be enabled".to_string()),
				(false, true) => Some("auto update must be disabled".to_string()),
				_ => None,
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use netweave_common_core::{NetworkId, TagId, UserGroupId};
	use proptest::prelude::*;
	use std::collections::BTreeSet;

	fn check(name: &str, attribute: PostureAttribute, values: &[&str], severity: Severity) -> PostureCheck {
		let mut c = PostureCheck::new(NetworkId::from("n1"), name, attribute, values.iter().copied());
		c.severity = severity;
		c
	}

	fn linux_host() -> DeviceInfo {
		DeviceInfo {
			client_location: "de".to_string(),
			client_version: "v0.30.1".to_string(),
			os: "linux".to_string(),
			os_version: "22.04".to_string(),
			os_family: "debian".to_string(),
			kernel_version: "6.1.0-13-amd64".to_string(),
			auto_update: true,
			..Default::default()
		}
	}

	#[test]
	fn compliant_device_has_no_violations() {
		let checks = vec![
			check("os", PostureAttribute::Os, &["linux", "darwin"], Severity::High),
			check("client", PostureAttribute::ClientVersion, &["0.30.0"], Severity::Low),
			check("kernel", PostureAttribute::KernelVersion, &["6.1"], Severity::Medium),
			check("geo", PostureAttribute::ClientLocation, &["DE", "FR"], Severity::Critical),
			check("updates", PostureAttribute::AutoUpdate, &["true"], Severity::Low),
		];
		let (violations, severity) = evaluate(&checks, &linux_host());
		assert!(violations.is_empty(), "{violations:?}");
		assert_eq!(severity, Severity::Unknown);
	}

	#[test]
	fn old_client_is_reported_with_its_severity() {
		let checks = vec![
			check("client", PostureAttribute::ClientVersion, &["0.31.0"], Severity::High),
			check("geo", PostureAttribute::ClientLocation, &["US"], Severity::Low),
		];
		let (violations, severity) = evaluate(&checks, &linux_host());
		assert_eq!(violations.len(), 2);
		assert_eq!(severity, Severity::High);
		assert!(violations
			.iter()
			.any(|v| v.message == "client version 'v0.30.1' is below minimum required version '0.31.0'"));
		assert!(violations.iter().any(|v| v.message == "client location 'de' not allowed"));
	}

	#[test]
	fn os_family_rescues_a_failed_os_check() {
		let checks = vec![
			check("os", PostureAttribute::Os, &["windows"], Severity::High),
			check("family", PostureAttribute::OsFamily, &["debian"], Severity::High),
		];
		assert!(evaluate(&checks, &linux_host()).0.is_empty());

		let strict = vec![
			check("os", PostureAttribute::Os, &["windows"], Severity::High),
			check("family", PostureAttribute::OsFamily, &["rhel"], Severity::Medium),
		];
		let (violations, severity) = evaluate(&strict, &linux_host());
		assert_eq!(violations.len(), 2);
		assert_eq!(severity, Severity::High);
	}

	#[test]
	fn any_passing_check_on_an_attribute_is_enough() {
		let checks = vec![
			check("new", PostureAttribute::OsVersion, &["24.04"], Severity::High),
			check("lts", PostureAttribute::OsVersion, &["22.04"], Severity::Low),
		];
		assert!(evaluate(&checks, &linux_host()).0.is_empty());
	}

	#[test]
	fn out_of_scope_checks_are_ignored() {
		let mut tagged = check("db", PostureAttribute::Os, &["windows"], Severity::High);
		tagged.tags = BTreeSet::from(["n1.db".to_string()]);
		assert!(evaluate(&[tagged.clone()], &linux_host()).0.is_empty());

		let mut db_host = linux_host();
		db_host.tags = BTreeSet::from([TagId::from("n1.db")]);
		assert_eq!(evaluate(&[tagged], &db_host).0.len(), 1);

		let user = DeviceInfo {
			is_user: true,
			user_groups: BTreeSet::from([UserGroupId::from("n1-user-grp")]),
			..linux_host()
		};
		let updates = check("updates", PostureAttribute::AutoUpdate, &["false"], Severity::High);
		assert!(evaluate(&[updates], &user).0.is_empty());
	}

	proptest! {
		#[test]
		fn disabled_checks_never_produce_violations(
			os in "[a-z]{1,8}",
			allowed in proptest::collection::vec("[a-z]{1,8}", 1..4),
			min in (0u32..10, 0u32..10),
		) {
			let allowed: Vec<&str> = allowed.iter().map(String::as_str).collect();
			let min = format!("{}.{}", min.0, min.1);
			let mut checks = vec![
				check("os", PostureAttribute::Os, &allowed, Severity::High),
				check("client", PostureAttribute::ClientVersion, &[min.as_str()], Severity::Low),
			];
			for c in &mut checks {
				c.enabled = false;
			}
			let device = DeviceInfo { os, client_version: "0.0.1".to_string(), ..Default::default() };
			prop_assert!(evaluate(&checks, &device).0.is_empty());
		}

		#[test]
		fn severity_is_the_worst_violation(levels in proptest::collection::vec(0usize..5, 1..6)) {
			let all = [Severity::Unknown, Severity::Low, Severity::Medium, Severity::High, Severity::Critical];
			let checks: Vec<PostureCheck> = levels
				.iter()
				.enumerate()
				.map(|(i, l)| {
					let attribute = [PostureAttribute::ClientVersion, PostureAttribute::KernelVersion][i % 2];
					check(&format!("c{i}"), attribute, &["99"], all[*l])
				})
				.collect();
			let (violations, severity) = evaluate(&checks, &linux_host());
			prop_assert_eq!(violations.len(), checks.len());
			prop_assert_eq!(severity, levels.iter().map(|l| all[*l]).max().unwrap());
		}
	}
}
