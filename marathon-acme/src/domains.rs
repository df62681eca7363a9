//! Domain extraction from Marathon app definitions
//!
//! Apps advertise the domains they want certificates for through
//! `MARATHON_ACME_{n}_DOMAIN` labels, one per service port, using the same
//! indexed-label convention marathon-lb uses for `HAPROXY_{n}_GROUP`.

use std::collections::BTreeSet;

use crate::marathon::App;

/// App-level label naming the load balancer group.
pub const GROUP_LABEL: &str = "HAPROXY_GROUP";

/// Extract the set of domains this instance is responsible for.
///
/// A port contributes domains when its effective group (the app-level
/// `HAPROXY_GROUP` label, falling back to the per-port `HAPROXY_{n}_GROUP`
/// when the app-level one is absent) matches `group` and its
/// `MARATHON_ACME_{n}_DOMAIN` label is non-empty.
/// Label values may carry a comma/whitespace separated list; with
/// `allow_multiple` every entry counts, otherwise only the first does.
/// Values that are not valid DNS names are dropped with a warning.
pub fn extract(apps: &[App], group: &str, allow_multiple: bool) -> BTreeSet<String> {
    let mut domains = BTreeSet::new();

    for app in apps {
        for port in 0..app.port_count() {
            let Some(value) = app.labels.get(&format!("MARATHON_ACME_{port}_DOMAIN")) else {
                continue;
            };

            let port_group = app
                .labels
                .get(GROUP_LABEL)
                .or_else(|| app.labels.get(&format!("HAPROXY_{port}_GROUP")));
            if port_group.map(String::as_str) != Some(group) {
                tracing::debug!(
                    app = %app.id,
                    port,
                    group = ?port_group,
                    "Skipping port outside the configured group"
                );
                continue;
            }

            let mut entries = value
                .split(|c: char| c == ',' || c.is_whitespace())
                .filter(|entry| !entry.is_empty());

            let selected: Vec<&str> = if allow_multiple {
                entries.collect()
            } else {
                entries.next().into_iter().collect()
            };

            if selected.is_empty() {
                tracing::warn!(
                    app = %app.id,
                    port,
                    "Domain label is present but empty, no certificate will be requested"
                );
                continue;
            }

            for entry in selected {
                let domain = entry.trim().to_ascii_lowercase();
                if let Err(reason) = validate_domain(&domain) {
                    tracing::warn!(
                        app = %app.id,
                        port,
                        domain = %domain,
                        reason,
                        "Dropping invalid domain"
                    );
                    continue;
                }
                if !domains.insert(domain.clone()) {
                    tracing::warn!(
                        app = %app.id,
                        domain = %domain,
                        "Domain is declared by more than one app/port, issuing one certificate"
                    );
                }
            }
        }
    }

    domains
}

/// Check `domain` against DNS hostname syntax.
///
/// Labels are 1-63 characters of `[a-z0-9-]` with no leading or trailing
/// hyphen, the whole name is at most 253 characters and contains at least
/// one dot.
pub fn validate_domain(domain: &str) -> Result<(), &'static str> {
    if domain.is_empty() {
        return Err("empty domain");
    }
    if domain.len() > 253 {
        return Err("domain exceeds 253 characters");
    }
    if !domain.contains('.') {
        return Err("domain has no dot");
    }

    for label in domain.split('.') {
        if label.is_empty() {
            return Err("empty label");
        }
        if label.len() > 63 {
            return Err("label exceeds 63 characters");
        }
        if label.starts_with('-') || label.ends_with('-') {
            return Err("label starts or ends with a hyphen");
        }
        if !label
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        {
            return Err("label contains invalid characters");
        }
    }

    Ok(())
}
