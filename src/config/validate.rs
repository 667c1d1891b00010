// src/config/validate.rs

use std::collections::BTreeSet;

use globset::Glob;

use crate::config::model::{ConfigFile, RawConfigFile};
use crate::errors::{FleetError, Result};

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = FleetError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        validate_raw_config(&raw)?;
        Ok(ConfigFile::new_unchecked(raw))
    }
}

pub fn validate_raw_config(cfg: &RawConfigFile) -> Result<()> {
    validate_job(cfg)?;
    validate_bus(cfg)?;
    validate_render(cfg)?;
    validate_preflight(cfg)?;
    Ok(())
}

fn validate_job(cfg: &RawConfigFile) -> Result<()> {
    if cfg.job.name.trim().is_empty() {
        return Err(FleetError::ConfigError(
            "[job].name must not be empty".to_string(),
        ));
    }
    if cfg.job.hosts.is_empty() {
        return Err(FleetError::ConfigError(
            "[job].hosts must list at least one host".to_string(),
        ));
    }
    let mut seen = BTreeSet::new();
    for host in &cfg.job.hosts {
        if !seen.insert(host.as_str()) {
            return Err(FleetError::ConfigError(format!(
                "host '{host}' is listed more than once in [job].hosts"
            )));
        }
    }
    Ok(())
}

fn validate_bus(cfg: &RawConfigFile) -> Result<()> {
    Glob::new(&cfg.bus.job_return_tag).map_err(|e| {
        FleetError::ConfigError(format!(
            "[bus].job_return_tag '{}' is not a valid glob: {e}",
            cfg.bus.job_return_tag
        ))
    })?;
    Ok(())
}

fn validate_render(cfg: &RawConfigFile) -> Result<()> {
    if cfg.render.tick_ms == 0 {
        return Err(FleetError::ConfigError(
            "[render].tick_ms must be >= 1 (got 0)".to_string(),
        ));
    }
    Ok(())
}

fn validate_preflight(cfg: &RawConfigFile) -> Result<()> {
    for check in &cfg.preflight {
        if !(1..=99).contains(&check.code) {
            return Err(FleetError::ConfigError(format!(
                "pre-flight check '{}' has code {}, expected 1..=99",
                check.name, check.code
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(toml_src: &str) -> RawConfigFile {
        toml::from_str(toml_src).expect("toml")
    }

    #[test]
    fn minimal_config_gets_defaults() {
        let cfg = ConfigFile::try_from(raw(
            r#"
            [job]
            name = "ceph-salt"
            hosts = ["node1"]
            "#,
        ))
        .expect("valid");
        assert_eq!(cfg.bus.source, "-");
        assert_eq!(cfg.bus.prefix, "ceph-salt");
        assert_eq!(cfg.render.tick_ms, 200);
        assert_eq!(cfg.markers.execution_failed, "ceph-salt:execution:failed");
        assert!(cfg.job.params.as_object().is_some_and(|m| m.is_empty()));
    }

    #[test]
    fn rejects_duplicate_hosts() {
        let err = ConfigFile::try_from(raw(
            r#"
            [job]
            name = "ceph-salt"
            hosts = ["node1", "node1"]
            "#,
        ))
        .unwrap_err();
        assert!(err.to_string().contains("more than once"), "{err}");
    }

    #[test]
    fn rejects_out_of_range_preflight_code() {
        let err = ConfigFile::try_from(raw(
            r#"
            [job]
            name = "ceph-salt"
            hosts = ["node1"]

            [[preflight]]
            name = "ntp"
            cmd = "true"
            code = 0
            "#,
        ))
        .unwrap_err();
        assert!(err.to_string().contains("1..=99"), "{err}");
    }

    #[test]
    fn rejects_bad_glob_and_zero_tick() {
        let err = ConfigFile::try_from(raw(
            r#"
            [job]
            name = "ceph-salt"
            hosts = ["node1"]
            [bus]
            job_return_tag = "salt/job/[/ret"
            "#,
        ))
        .unwrap_err();
        assert!(err.to_string().contains("not a valid glob"), "{err}");

        let err = ConfigFile::try_from(raw(
            r#"
            [job]
            name = "ceph-salt"
            hosts = ["node1"]
            [render]
            tick_ms = 0
            "#,
        ))
        .unwrap_err();
        assert!(err.to_string().contains("tick_ms"), "{err}");
    }
}
