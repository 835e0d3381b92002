use std::fmt;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use connpool_core::{ConnectionKey, PoolConfigFile, PoolSettings};

/// A validated config file.
pub struct CheckReport {
    pub settings: PoolSettings,
    pub key: ConnectionKey,
}

pub fn check(path: &str, format: &str) -> Result<()> {
    if !matches!(format, "text" | "json") {
        bail!("unknown format '{format}', expected text or json");
    }
    let report = load(Path::new(path))?;
    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&report.to_json())?),
        _ => {
            println!("✓ {path} is valid");
            print!("{report}");
        }
    }
    Ok(())
}

pub fn load(path: &Path) -> Result<CheckReport> {
    let file = PoolConfigFile::from_file(path)
        .with_context(|| format!("loading {}", path.display()))?;
    let settings = file.settings()?;
    let key = ConnectionKey::normalize(&file.connection_params());
    Ok(CheckReport { settings, key })
}

fn format_recycle(settings: &PoolSettings) -> String {
    match settings.recycle {
        Some(age) => format!("{age:?}"),
        None => "never".to_string(),
    }
}

fn format_capacity(settings: &PoolSettings) -> String {
    match settings.effective().overflow_limit() {
        Some(limit) => (settings.effective().size as i64 + limit).to_string(),
        None => "unlimited".to_string(),
    }
}

/// Milliseconds, saturating at `u64::MAX`.
fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

impl fmt::Display for CheckReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = &self.settings;
        writeln!(f, "  class:        {}", s.class)?;
        writeln!(f, "  size:         {}", s.size)?;
        writeln!(f, "  max overflow: {}", s.max_overflow)?;
        writeln!(f, "  capacity:     {}", format_capacity(s))?;
        writeln!(f, "  timeout:      {:?}", s.timeout)?;
        writeln!(f, "  recycle:      {}", format_recycle(s))?;
        writeln!(f, "  echo:         {}", s.echo)?;
        writeln!(f, "  pre-ping:     {}", s.pre_ping)?;
        writeln!(f, "  connection:   {}", self.key)?;
        if self.key.int_param("port").is_none() {
            writeln!(f, "  ⚠ connection has no port; the tcp factory will refuse it")?;
        }
        Ok(())
    }
}

impl CheckReport {
    pub fn to_json(&self) -> serde_json::Value {
        let s = &self.settings;
        serde_json::json!({
            "class": s.class.to_string(),
            "size": s.size,
            "max_overflow": s.max_overflow,
            "capacity": format_capacity(s),
            "timeout_ms": millis(s.timeout),
            "recycle_ms": s.recycle.map(millis),
            "echo": s.echo,
            "pre_ping": s.pre_ping,
            "connection": self.key.to_string(),
        })
    }
}
