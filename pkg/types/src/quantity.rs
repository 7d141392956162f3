//! Parsing of Kubernetes-style resource quantities ("500m", "2", "128Mi").
//!
//! Manifests may spell CPU and memory either as plain integers (millicores /
//! bytes) or as quantity strings; both deserialize to the same `u64`.

use anyhow::{Result, bail};
use serde::{Deserialize, Deserializer};

/// Parse a CPU quantity into millicores. "250m" → 250, "2" → 2000, "0.5" → 500.
pub fn parse_cpu(s: &str) -> Result<u64> {
    let s = s.trim();
    if let Some(m) = s.strip_suffix('m') {
        return m
            .parse::<u64>()
            .map_err(|_| anyhow::anyhow!("invalid cpu quantity '{}'", s));
    }
    match s.parse::<f64>() {
        Ok(cores) if cores >= 0.0 => Ok((cores * 1000.0).round() as u64),
        _ => bail!("invalid cpu quantity '{}'", s),
    }
}

/// Parse a memory quantity into bytes. Supports Ki/Mi/Gi/Ti and k/M/G/T suffixes.
pub fn parse_memory(s: &str) -> Result<u64> {
    let s = s.trim();
    const SUFFIXES: [(&str, u64); 8] = [
        ("Ki", 1 << 10),
        ("Mi", 1 << 20),
        ("Gi", 1 << 30),
        ("Ti", 1 << 40),
        ("k", 1_000),
        ("M", 1_000_000),
        ("G", 1_000_000_000),
        ("T", 1_000_000_000_000),
    ];
    for (suffix, factor) in SUFFIXES {
        if let Some(n) = s.strip_suffix(suffix) {
            let value: f64 = n
                .parse()
                .map_err(|_| anyhow::anyhow!("invalid memory quantity '{}'", s))?;
            if value < 0.0 {
                bail!("invalid memory quantity '{}'", s);
            }
            return Ok((value * factor as f64).round() as u64);
        }
    }
    s.parse::<u64>()
        .map_err(|_| anyhow::anyhow!("invalid memory quantity '{}'", s))
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Quantity {
    Number(u64),
    Text(String),
}

pub fn de_cpu<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<u64, D::Error> {
    match Quantity::deserialize(d)? {
        Quantity::Number(n) => Ok(n),
        Quantity::Text(s) => parse_cpu(&s).map_err(serde::de::Error::custom),
    }
}

pub fn de_memory<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<u64, D::Error> {
    match Quantity::deserialize(d)? {
        Quantity::Number(n) => Ok(n),
        Quantity::Text(s) => parse_memory(&s).map_err(serde::de::Error::custom),
    }
}

pub fn de_opt_cpu<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<Option<u64>, D::Error> {
    match Option::<Quantity>::deserialize(d)? {
        None => Ok(None),
        Some(Quantity::Number(n)) => Ok(Some(n)),
        Some(Quantity::Text(s)) => parse_cpu(&s).map(Some).map_err(serde::de::Error::custom),
    }
}

pub fn de_opt_memory<'de, D: Deserializer<'de>>(
    d: D,
) -> std::result::Result<Option<u64>, D::Error> {
    match Option::<Quantity>::deserialize(d)? {
        None => Ok(None),
        Some(Quantity::Number(n)) => Ok(Some(n)),
        Some(Quantity::Text(s)) => parse_memory(&s).map(Some).map_err(serde::de::Error::custom),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cpu_quantities() {
        assert_eq!(parse_cpu("250m").unwrap(), 250);
        assert_eq!(parse_cpu("2").unwrap(), 2000);
        assert_eq!(parse_cpu("0.5").unwrap(), 500);
        assert!(parse_cpu("lots").is_err());
    }

    #[test]
    fn memory_quantities() {
        assert_eq!(parse_memory("128Mi").unwrap(), 128 * 1024 * 1024);
        assert_eq!(parse_memory("1Gi").unwrap(), 1 << 30);
        assert_eq!(parse_memory("512M").unwrap(), 512_000_000);
        assert_eq!(parse_memory("4096").unwrap(), 4096);
        assert!(parse_memory("12Qi").is_err());
    }
}
