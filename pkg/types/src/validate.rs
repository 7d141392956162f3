use anyhow::{Result, bail};

use crate::resource::Resource;

/// Validate a Kubernetes-style resource name (DNS subdomain).
/// Rules: lowercase `[a-z0-9-.]`, max 253 chars, alphanumeric at both ends.
pub fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() {
        bail!("name must not be empty");
    }
    if name.len() > 253 {
        bail!("name '{}' exceeds 253 characters (got {})", name, name.len());
    }
    let edge_ok = |c: Option<char>| c.is_some_and(|c| c.is_ascii_lowercase() || c.is_ascii_digit());
    if !edge_ok(name.chars().next()) || !edge_ok(name.chars().last()) {
        bail!("name '{}' must start and end with a lowercase letter or digit", name);
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '.')
    {
        bail!(
            "name '{}' must contain only lowercase letters, digits, '-' and '.'",
            name
        );
    }
    Ok(())
}

/// Structural checks applied before a resource enters the store.
pub fn validate_resource(res: &Resource) -> Result<()> {
    validate_name(&res.metadata.name)?;
    let kind = res.kind();
    if kind.is_namespaced() {
        if res.metadata.namespace.is_empty() {
            bail!("{} '{}' requires a namespace", kind, res.metadata.name);
        }
        validate_name(&res.metadata.namespace)?;
    } else if !res.metadata.namespace.is_empty() {
        bail!(
            "{} '{}' is cluster-scoped and must not set a namespace",
            kind,
            res.metadata.name
        );
    }
    for key in res.metadata.labels.keys() {
        if key.is_empty() || key.len() > 317 {
            bail!("invalid label key '{}' on {}", key, res.key());
        }
    }
    if res.metadata.owner_references.iter().filter(|o| o.controller).count() > 1 {
        bail!("{} has more than one controller owner reference", res.key());
    }
    Ok(())
}
