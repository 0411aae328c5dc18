// Written by the IQRF Gateway developers
// (C)Copyright IQRF Tech s.r.o.
// https://iqrf.org

//! Services — init-system detection and service restarts after a restore

use std::process::Command;

use serde::Serialize;
use tracing::{info, warn};

/// Init system driving the gateway's services
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum InitSystem {
    Systemd,
    DockerSupervisor,
    Unknown(String),
}

impl InitSystem {
    /// `auto` probes the host; anything unrecognised is kept as `Unknown`
    pub fn from_setting(value: &str) -> Self {
        match value.trim().to_lowercase().as_str() {
            "auto" | "" => detect(),
            "systemd" => InitSystem::Systemd,
            "docker-supervisor" | "supervisor" => InitSystem::DockerSupervisor,
            other => InitSystem::Unknown(other.to_string()),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            InitSystem::Systemd => "systemd",
            InitSystem::DockerSupervisor => "docker-supervisor",
            InitSystem::Unknown(name) => name,
        }
    }

    /// The command restarting `service`, or `None` if this init system
    /// cannot be driven
    pub fn restart_command(&self, service: &str) -> Option<RestartCommand> {
        let (program, args) = match self {
            InitSystem::Systemd => ("systemctl", vec!["restart".to_string(), service.to_string()]),
            InitSystem::DockerSupervisor => ("supervisorctl", vec!["restart".to_string(), service.to_string()]),
            InitSystem::Unknown(_) => return None,
        };
        Some(RestartCommand {
            service: service.to_string(),
            program: program.to_string(),
            args,
        })
    }
}

impl std::fmt::Display for InitSystem {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Probe the running init system
pub fn detect() -> InitSystem {
    if std::path::Path::new("/run/systemd/system").exists() {
        InitSystem::Systemd
    } else if std::path::Path::new("/etc/supervisor/supervisord.conf").exists()
        || std::path::Path::new("/etc/supervisord.conf").exists()
    {
        InitSystem::DockerSupervisor
    } else {
        // PID 1 name as final fallback
        match std::fs::read_to_string("/proc/1/comm") {
            Ok(comm) if comm.trim() == "systemd" => InitSystem::Systemd,
            Ok(comm) if comm.trim().starts_with("supervisord") => InitSystem::DockerSupervisor,
            Ok(comm) => InitSystem::Unknown(comm.trim().to_string()),
            Err(_) => InitSystem::Unknown("unknown".to_string()),
        }
    }
}

/// One service restart, computed by restore and executed by the caller
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RestartCommand {
    pub service: String,
    pub program: String,
    pub args: Vec<String>,
}

impl std::fmt::Display for RestartCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{} {}", self.program, self.args.join(" "))
    }
}

/// Run a restart command
pub fn restart(cmd: &RestartCommand) -> Result<String, String> {
    let output = Command::new(&cmd.program)
        .args(&cmd.args)
        .output()
        .map_err(|e| format!("Failed to restart {}: {}", cmd.service, e))?;

    if output.status.success() {
        info!("Restarted {}", cmd.service);
        Ok(format!("{} restarted", cmd.service))
    } else {
        Err(String::from_utf8_lossy(&output.stderr).to_string())
    }
}

/// Run every restart, logging failures. Returns the services that failed.
pub fn restart_all(commands: &[RestartCommand]) -> Vec<String> {
    let mut failed = Vec::new();
    for cmd in commands {
        if let Err(e) = restart(cmd) {
            warn!("Failed to restart {}: {}", cmd.service, e.trim());
            failed.push(cmd.service.clone());
        }
    }
    failed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn restart_commands_per_init_system() {
        let systemd = InitSystem::Systemd.restart_command("monit").unwrap();
        assert_eq!(systemd.to_string(), "systemctl restart monit");
        let supervisor = InitSystem::DockerSupervisor.restart_command("iqrf-gateway-daemon").unwrap();
        assert_eq!(supervisor.to_string(), "supervisorctl restart iqrf-gateway-daemon");
        assert!(InitSystem::Unknown("openrc".into()).restart_command("monit").is_none());
    }

    #[test]
    fn settings_values() {
        assert_eq!(InitSystem::from_setting("systemd"), InitSystem::Systemd);
        assert_eq!(InitSystem::from_setting("Docker-Supervisor"), InitSystem::DockerSupervisor);
        assert_eq!(InitSystem::from_setting("openrc"), InitSystem::Unknown("openrc".into()));
    }

    #[test]
    fn failed_restart_is_reported() {
        let cmd = RestartCommand {
            service: "nothing".into(),
            program: "/nonexistent/restart-tool".into(),
            args: vec![],
        };
        assert!(restart(&cmd).is_err());
        assert_eq!(restart_all(&[cmd]), vec!["nothing".to_string()]);
    }
}
