//! Helpers for common checks for the validity of caller-supplied input.

use crate::error::{Error, Result};

/// Longest name the broker accepts for topics and consumer groups.
pub const MAX_NAME_LENGTH: usize = 249;

/// Ensures a required identifier is present.
///
/// Whitespace-only values count as missing.
pub fn require<'a>(field: &str, value: &'a str) -> Result<&'a str> {
    if value.trim().is_empty() {
        return Err(Error::validation(format!("{field} must not be empty")));
    }
    Ok(value)
}

/// Validates a topic name: `[A-Za-z0-9._-]{1,249}`, no leading or trailing dot and no `..`.
pub fn validate_topic_name(name: &str) -> Result<()> {
    require("topic name", name)?;

    if name.len() > MAX_NAME_LENGTH {
        return Err(Error::validation(format!(
            "topic name must not exceed {MAX_NAME_LENGTH} characters"
        )));
    }
    if name.starts_with('.') || name.ends_with('.') {
        return Err(Error::validation(
            "topic name must not start or end with a dot",
        ));
    }
    if name.contains("..") {
        return Err(Error::validation(
            "topic name must not contain consecutive dots",
        ));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
    {
        return Err(Error::validation(
            "topic name may only contain letters, digits, '.', '_' and '-'",
        ));
    }

    Ok(())
}

/// Validates a consumer group id.
pub fn validate_group_id(group_id: &str) -> Result<()> {
    require("consumer group id", group_id)?;

    if group_id.len() > MAX_NAME_LENGTH {
        return Err(Error::validation(format!(
            "consumer group id must not exceed {MAX_NAME_LENGTH} characters"
        )));
    }

    Ok(())
}

/// Validates a display name for a cluster: 2 to 50 characters of `[A-Za-z0-9_-]`.
pub fn validate_cluster_name(name: &str) -> Result<()> {
    require("cluster name", name)?;

    if !(2..=50).contains(&name.len()) {
        return Err(Error::validation(
            "cluster name must be between 2 and 50 characters",
        ));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-'))
    {
        return Err(Error::validation(
            "cluster name may only contain letters, digits, '_' and '-'",
        ));
    }

    Ok(())
}

/// Validates a `host:port[,host:port...]` bootstrap list.
pub fn validate_bootstrap_servers(servers: &str) -> Result<()> {
    require("bootstrap servers", servers)?;

    for server in servers.split(',').map(str::trim) {
        let Some((host, port)) = server.rsplit_once(':') else {
            return Err(Error::validation(format!(
                "bootstrap server '{server}' must have the form host:port"
            )));
        };
        if host.is_empty() || host.contains(':') {
            return Err(Error::validation(format!(
                "bootstrap server '{server}' must have the form host:port"
            )));
        }
        match port.parse::<u32>() {
            Ok(p) if (1..=65535).contains(&p) => {}
            _ => {
                return Err(Error::validation(format!(
                    "port of bootstrap server '{server}' must be between 1 and 65535"
                )));
            }
        }
    }

    Ok(())
}
